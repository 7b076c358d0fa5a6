use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct BufferState {
    /// Total media time (seconds) enqueued since playback started.
    enqueued: f64,
    /// Playback position in seconds.
    position: f64,
}

/// Tracks how much media is buffered ahead of the playback position.
///
/// The scheduler enqueues whole segments, the player advances the position.
/// A negative level means playback already ran past the buffered media.
#[derive(Debug, Default)]
pub struct BufferManager {
    state: Mutex<BufferState>,
}

impl BufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `duration` seconds of downloaded media.
    pub fn enqueue(&self, duration: f64) {
        self.lock().enqueued += duration;
    }

    /// Moves the playback position to `position` seconds.
    pub fn update_position(&self, position: f64) {
        self.lock().position = position;
    }

    /// Seconds of media buffered ahead of the position.
    pub fn level(&self) -> f64 {
        let state = self.lock();
        state.enqueued - state.position
    }

    pub fn enqueued(&self) -> f64 {
        self.lock().enqueued
    }

    pub fn position(&self) -> f64 {
        self.lock().position
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
