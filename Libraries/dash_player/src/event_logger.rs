use tracing::{debug, info};

use crate::abr::SelectionMap;
use crate::bandwidth::BandwidthListener;
use crate::player::{PlayerListener, State};
use crate::scheduler::SchedulerListener;

/// Logs every player, scheduler and bandwidth notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventLogger;

impl PlayerListener for EventLogger {
    fn on_state_change(&self, position: f64, old: State, new: State) {
        info!("State {:?} -> {:?} at {:.3}s", old, new, position);
    }
}

impl SchedulerListener for EventLogger {
    fn on_segment_download_start(&self, index: usize, selections: &SelectionMap) {
        let selections = selections
            .iter()
            .map(|(set, representation)| format!("{set}:{representation}"))
            .collect::<Vec<_>>()
            .join(", ");
        info!("Downloading segment {} [{}]", index, selections);
    }

    fn on_segment_download_complete(&self, index: usize) {
        debug!("Segment {} downloaded", index);
    }
}

impl BandwidthListener for EventLogger {
    fn on_bandwidth_update(&self, bps: f64) {
        debug!("Bandwidth estimate {:.0} bps", bps);
    }
}
