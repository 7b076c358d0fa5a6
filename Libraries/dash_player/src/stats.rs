//! Quality-of-experience bookkeeping for one playback session.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::abr::SelectionMap;
use crate::bandwidth::BandwidthListener;
use crate::player::{PlayerListener, State};
use crate::scheduler::SchedulerListener;

#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub timestamp: DateTime<Utc>,
    /// Playback position in seconds.
    pub position: f64,
    pub from: State,
    pub to: State,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackReport {
    /// Seconds between leaving IDLE and the first READY.
    pub startup_delay: Option<f64>,
    pub stall_count: usize,
    /// Seconds spent rebuffering after playback started.
    pub total_stall_time: f64,
    pub quality_switches: usize,
    pub segments_downloaded: usize,
    pub ended: bool,
    pub final_position: f64,
    pub state_changes: Vec<StateChange>,
    pub selections: BTreeMap<usize, SelectionMap>,
    /// Bandwidth estimates in bps, in the order they were produced.
    pub bandwidth_estimates: Vec<f64>,
}

#[derive(Debug, Default)]
struct Session {
    buffering_since: Option<Instant>,
    startup_delay: Option<f64>,
    stall_started: Option<Instant>,
    stall_count: usize,
    total_stall_time: f64,
    quality_switches: usize,
    last_selections: Option<SelectionMap>,
    segments_downloaded: usize,
    ended: bool,
    final_position: f64,
    state_changes: Vec<StateChange>,
    selections: BTreeMap<usize, SelectionMap>,
    bandwidth_estimates: Vec<f64>,
}

/// Listens to the player, the scheduler and the bandwidth meter and turns
/// their notifications into a [`PlaybackReport`].
#[derive(Debug, Default)]
pub struct QoeRecorder {
    session: Mutex<Session>,
}

impl QoeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> PlaybackReport {
        let session = self.lock();
        PlaybackReport {
            startup_delay: session.startup_delay,
            stall_count: session.stall_count,
            total_stall_time: session.total_stall_time,
            quality_switches: session.quality_switches,
            segments_downloaded: session.segments_downloaded,
            ended: session.ended,
            final_position: session.final_position,
            state_changes: session.state_changes.clone(),
            selections: session.selections.clone(),
            bandwidth_estimates: session.bandwidth_estimates.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PlayerListener for QoeRecorder {
    fn on_state_change(&self, position: f64, old: State, new: State) {
        let now = Instant::now();
        let mut session = self.lock();
        session.state_changes.push(StateChange {
            timestamp: Utc::now(),
            position,
            from: old,
            to: new,
        });
        session.final_position = position;

        match (old, new) {
            (State::Idle, State::Buffering) => session.buffering_since = Some(now),
            (State::Buffering, State::Ready) if session.startup_delay.is_none() => {
                session.startup_delay = session
                    .buffering_since
                    .map(|since| now.duration_since(since).as_secs_f64());
            }
            (State::Ready, State::Buffering) => {
                session.stall_count += 1;
                session.stall_started = Some(now);
            }
            _ => {}
        }
        if old == State::Buffering {
            if let Some(started) = session.stall_started.take() {
                session.total_stall_time += now.duration_since(started).as_secs_f64();
            }
        }
        if new == State::End {
            session.ended = true;
        }
    }
}

impl SchedulerListener for QoeRecorder {
    fn on_segment_download_start(&self, index: usize, selections: &SelectionMap) {
        let mut session = self.lock();
        if let Some(last) = &session.last_selections {
            let switches = selections
                .iter()
                .filter(|(set, representation)| {
                    last.get(*set).is_some_and(|previous| previous != *representation)
                })
                .count();
            session.quality_switches += switches;
        }
        session.last_selections = Some(selections.clone());
        session.selections.insert(index, selections.clone());
    }

    fn on_segment_download_complete(&self, _index: usize) {
        self.lock().segments_downloaded += 1;
    }
}

impl BandwidthListener for QoeRecorder {
    fn on_bandwidth_update(&self, bps: f64) {
        self.lock().bandwidth_estimates.push(bps);
    }
}
