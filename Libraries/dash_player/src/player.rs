use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::buffer::BufferManager;
use crate::config::PlayerConfig;
use crate::error::DashResult;
use crate::mpd::provider::ManifestProvider;
use crate::mpd::Manifest;
use crate::scheduler::Scheduler;

/// Tokio timers resolve milliseconds, shorter sleeps would spin.
const MIN_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Idle,
    Buffering,
    Ready,
    End,
}

pub trait PlayerListener: Send + Sync {
    fn on_state_change(&self, position: f64, old: State, new: State);
}

/// The clock-driven half of the player: advances the playback position and
/// decides between buffering, playing and ending from the buffer level.
pub struct PlaybackStateMachine {
    state: State,
    position: f64,
    /// Set once playback started for the first time.
    started: bool,
    min_start_buffer: f64,
    min_rebuffer: f64,
    buffer: Arc<BufferManager>,
    listeners: Vec<Arc<dyn PlayerListener>>,
}

impl PlaybackStateMachine {
    pub fn new(
        config: &PlayerConfig,
        buffer: Arc<BufferManager>,
        listeners: Vec<Arc<dyn PlayerListener>>,
    ) -> Self {
        Self {
            state: State::Idle,
            position: 0.0,
            started: false,
            min_start_buffer: config.min_start_buffer,
            min_rebuffer: config.min_rebuffer,
            buffer,
            listeners,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn begin(&mut self) {
        if self.state == State::Idle {
            self.transition(State::Buffering);
        }
    }

    /// Runs one clock tick and returns the buffer level after it.
    pub fn step(&mut self, elapsed: f64, paused: bool, scheduler_ended: bool) -> f64 {
        if self.state == State::Ready && !paused {
            self.position += elapsed;
        }
        self.buffer.update_position(self.position);
        let level = self.buffer.level();

        match self.state {
            State::Ready if level <= 0.0 => {
                if scheduler_ended {
                    self.transition(State::End);
                } else {
                    warn!("Stall at {:.3}s", self.position);
                    self.transition(State::Buffering);
                }
            }
            State::Buffering => {
                let threshold = if self.started {
                    self.min_rebuffer
                } else {
                    self.min_start_buffer
                };
                if level > threshold || (scheduler_ended && level > 0.0) {
                    self.started = true;
                    self.transition(State::Ready);
                } else if scheduler_ended {
                    self.transition(State::End);
                }
            }
            _ => {}
        }
        level
    }

    fn transition(&mut self, new: State) {
        let old = self.state;
        if old == new {
            return;
        }
        self.state = new;
        debug!("{:?} -> {:?} at {:.3}s", old, new, self.position);
        for listener in &self.listeners {
            listener.on_state_change(self.position, old, new);
        }
    }
}

/// Plays one manifest: bootstraps it, runs the scheduler and drives the
/// playback clock until the end of the stream.
pub struct DashPlayer {
    tick: Duration,
    buffer: Arc<BufferManager>,
    provider: ManifestProvider,
    scheduler: Scheduler,
    machine: Mutex<PlaybackStateMachine>,
    cancellation_token: CancellationToken,
    paused: AtomicBool,
}

impl DashPlayer {
    pub fn new(
        config: &PlayerConfig,
        buffer: Arc<BufferManager>,
        provider: ManifestProvider,
        scheduler: Scheduler,
        listeners: Vec<Arc<dyn PlayerListener>>,
    ) -> Self {
        Self {
            tick: config.tick_interval(),
            machine: Mutex::new(PlaybackStateMachine::new(config, buffer.clone(), listeners)),
            buffer,
            provider,
            scheduler,
            cancellation_token: CancellationToken::new(),
            paused: AtomicBool::new(false),
        }
    }

    /// Plays `url` until the end of the stream or [`DashPlayer::stop`].
    ///
    /// Fails if the manifest cannot be loaded or a segment download fails.
    #[instrument(skip(self))]
    pub async fn start(&self, url: &str) -> DashResult<()> {
        let manifest = self.provider.start(url).await?;
        info!(
            "Playing {:?} manifest, {} adaptation sets, {:.3}s",
            manifest.presentation_type,
            manifest.adaptation_sets.len(),
            manifest.media_presentation_duration
        );

        let mut updates = self.provider.subscribe();
        updates.mark_unchanged();
        self.scheduler.start(manifest.adaptation_sets.clone());
        self.lock_machine().begin();

        self.run(&mut updates).await;

        let result = self.scheduler.stop().await;
        self.provider.stop().await;
        info!("Playback finished at {:.3}s in state {:?}", self.position(), self.state());
        result
    }

    async fn run(&self, updates: &mut watch::Receiver<Option<Arc<Manifest>>>) {
        let mut last_tick = Instant::now();

        loop {
            if self.scheduler.has_failed() {
                warn!("Leaving playback, the scheduler failed");
                return;
            }
            if updates.has_changed().unwrap_or(false) {
                let latest = updates.borrow_and_update().clone();
                if let Some(manifest) = latest {
                    debug!("Forwarding refreshed manifest to the scheduler");
                    self.scheduler.update(manifest.adaptation_sets.clone());
                }
            }

            let now = Instant::now();
            let elapsed = now.duration_since(last_tick).as_secs_f64();
            last_tick = now;

            let paused = self.paused.load(Ordering::Acquire);
            let (state, level) = {
                let mut machine = self.lock_machine();
                let level = machine.step(elapsed, paused, self.scheduler.is_end());
                (machine.state(), level)
            };
            if state == State::End {
                return;
            }

            let wait = next_wait(level, self.tick);
            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    info!("Playback stopped");
                    return;
                }
                _ = sleep(wait) => {}
            }
        }
    }

    /// Ends the main loop; `start` then shuts everything down and returns.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    /// Freezes the playback clock. The state is left untouched.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn state(&self) -> State {
        self.lock_machine().state()
    }

    pub fn position(&self) -> f64 {
        self.lock_machine().position()
    }

    pub fn buffer_level(&self) -> f64 {
        self.buffer.level()
    }

    fn lock_machine(&self) -> MutexGuard<'_, PlaybackStateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sleeps until the buffer would run dry, at most one tick.
fn next_wait(level: f64, tick: Duration) -> Duration {
    if level > 0.0 {
        Duration::try_from_secs_f64(level)
            .map_or(tick, |level| tick.min(level))
            .max(MIN_SLEEP)
    } else {
        tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Transitions(Mutex<Vec<(State, State)>>);

    impl PlayerListener for Transitions {
        fn on_state_change(&self, _position: f64, old: State, new: State) {
            self.0.lock().unwrap().push((old, new));
        }
    }

    fn machine() -> (PlaybackStateMachine, Arc<BufferManager>, Arc<Transitions>) {
        let buffer = Arc::new(BufferManager::new());
        let transitions = Arc::new(Transitions::default());
        let machine = PlaybackStateMachine::new(
            &PlayerConfig::default(),
            buffer.clone(),
            vec![transitions.clone()],
        );
        (machine, buffer, transitions)
    }

    #[test]
    fn waits_for_the_start_buffer() {
        let (mut machine, buffer, transitions) = machine();
        machine.begin();
        buffer.enqueue(1.0);
        machine.step(0.05, false, false);
        assert_eq!(machine.state(), State::Buffering);

        buffer.enqueue(1.5);
        machine.step(0.05, false, false);
        machine.step(0.05, false, false);
        assert_eq!(machine.state(), State::Ready);
        assert_eq!(
            *transitions.0.lock().unwrap(),
            [(State::Idle, State::Buffering), (State::Buffering, State::Ready)]
        );
    }

    #[test]
    fn empty_buffer_stalls_then_rebuffers() {
        let (mut machine, buffer, _) = machine();
        machine.begin();
        buffer.enqueue(2.5);
        machine.step(0.0, false, false);
        assert_eq!(machine.state(), State::Ready);

        machine.step(2.5, false, false);
        assert_eq!(machine.state(), State::Buffering);

        // Rebuffer threshold (1s) is lower than the start threshold (2s)
        buffer.enqueue(1.2);
        machine.step(0.05, false, false);
        assert_eq!(machine.state(), State::Ready);
        assert!((machine.position() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn empty_buffer_after_last_segment_ends() {
        let (mut machine, buffer, transitions) = machine();
        machine.begin();
        buffer.enqueue(3.0);
        machine.step(0.0, false, true);
        machine.step(3.0, false, true);
        assert_eq!(machine.state(), State::End);
        assert_eq!(transitions.0.lock().unwrap().last(), Some(&(State::Ready, State::End)));
    }

    #[test]
    fn short_stream_plays_below_the_start_threshold() {
        let (mut machine, buffer, _) = machine();
        machine.begin();
        buffer.enqueue(0.5);
        machine.step(0.0, false, true);
        assert_eq!(machine.state(), State::Ready);
    }

    #[test]
    fn paused_clock_keeps_the_position() {
        let (mut machine, buffer, _) = machine();
        machine.begin();
        buffer.enqueue(3.0);
        machine.step(0.0, false, false);
        machine.step(1.0, true, false);
        assert_eq!(machine.position(), 0.0);
        assert_eq!(machine.state(), State::Ready);
    }

    #[test]
    fn wait_is_bounded_by_the_tick_and_the_buffer() {
        let tick = Duration::from_millis(50);
        assert_eq!(next_wait(0.02, tick), Duration::from_millis(20));
        assert_eq!(next_wait(3.0, tick), tick);
        assert_eq!(next_wait(1e-6, tick), MIN_SLEEP);
        assert_eq!(next_wait(-1.0, tick), tick);
        assert_eq!(next_wait(f64::MAX, tick), tick);
        assert_eq!(next_wait(f64::INFINITY, tick), tick);
    }
}
