use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tracing::debug;

use crate::download::TransferListener;

/// Notified with the new estimate (bits per second) after every sample.
pub trait BandwidthListener: Send + Sync {
    fn on_bandwidth_update(&self, bps: f64);
}

#[derive(Debug, Default)]
struct MeterState {
    estimate: Option<f64>,
    bytes: u64,
    started_at: Option<Instant>,
}

/// Exponentially smoothed throughput estimate fed by transfer events.
///
/// The first sample replaces the initial assumption outright, later ones are
/// blended in with `estimate * smoothing + sample * (1 - smoothing)`.
pub struct BandwidthMeter {
    initial_bitrate: f64,
    smoothing_factor: f64,
    listeners: Vec<Arc<dyn BandwidthListener>>,
    state: Mutex<MeterState>,
}

impl BandwidthMeter {
    pub fn new(
        initial_bitrate: f64,
        smoothing_factor: f64,
        listeners: Vec<Arc<dyn BandwidthListener>>,
    ) -> Self {
        Self {
            initial_bitrate,
            smoothing_factor,
            listeners,
            state: Mutex::new(MeterState::default()),
        }
    }

    /// Current estimate in bps, or the initial bitrate before any sample.
    pub fn bandwidth(&self) -> f64 {
        self.estimate().unwrap_or(self.initial_bitrate)
    }

    /// The measured estimate, `None` until a transfer completed.
    pub fn estimate(&self) -> Option<f64> {
        self.lock().estimate
    }

    fn lock(&self) -> MutexGuard<'_, MeterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_transfer(&self, url: &str) {
        let updated = {
            let mut state = self.lock();
            let bytes = std::mem::take(&mut state.bytes);
            let elapsed = state
                .started_at
                .take()
                .map(|start| start.elapsed().as_secs_f64())
                .unwrap_or(0.0);

            if bytes == 0 || elapsed <= 0.0 {
                None
            } else {
                let sample = 8.0 * bytes as f64 / elapsed;
                let estimate = match state.estimate {
                    Some(previous) => {
                        previous * self.smoothing_factor + sample * (1.0 - self.smoothing_factor)
                    }
                    None => sample,
                };
                state.estimate = Some(estimate);
                debug!(
                    "Bandwidth sample {:.0} bps from {}, estimate {:.0} bps",
                    sample, url, estimate
                );
                Some(estimate)
            }
        };

        if let Some(estimate) = updated {
            for listener in &self.listeners {
                listener.on_bandwidth_update(estimate);
            }
        }
    }
}

impl TransferListener for BandwidthMeter {
    fn on_transfer_start(&self, _url: &str) {
        let mut state = self.lock();
        state.bytes = 0;
        state.started_at = Some(Instant::now());
    }

    fn on_bytes_transferred(&self, length: usize, _url: &str, _position: u64, _total: Option<u64>) {
        self.lock().bytes += length as u64;
    }

    fn on_transfer_end(&self, _size: u64, url: &str) {
        self.finish_transfer(url);
    }

    fn on_transfer_canceled(&self, url: &str, _position: u64, _total: Option<u64>) {
        self.finish_transfer(url);
    }
}
