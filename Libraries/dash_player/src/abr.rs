use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::bandwidth::BandwidthMeter;
use crate::buffer::BufferManager;
use crate::config::PlayerConfig;
use crate::mpd::{
    AdaptationSet, AdaptationSetId, AdaptationSets, ContentType, Representation, RepresentationId,
};

/// Chosen representation id per adaptation set id.
pub type SelectionMap = BTreeMap<AdaptationSetId, RepresentationId>;

/// Share of the budget given to video when both audio and video are played.
const VIDEO_SHARE: f64 = 0.8;

pub trait AbrController: Send {
    /// Picks one representation per adaptation set for the next segment index.
    fn select_representations(&mut self, adaptation_sets: &AdaptationSets) -> SelectionMap;
}

/// Bitrate ladder with buffer-level hysteresis.
///
/// Below the panic level the selection never goes up, above the safe level it
/// never goes down, in between the ideal pick for the bandwidth budget wins.
pub struct DashAbrController {
    bandwidth_fraction: f64,
    initial_bitrate: f64,
    panic_buffer: f64,
    safe_buffer: f64,
    bandwidth_meter: Arc<BandwidthMeter>,
    buffer: Arc<BufferManager>,
    last_selections: Option<SelectionMap>,
}

impl DashAbrController {
    pub fn new(
        config: &PlayerConfig,
        bandwidth_meter: Arc<BandwidthMeter>,
        buffer: Arc<BufferManager>,
    ) -> Self {
        Self {
            bandwidth_fraction: config.bandwidth_fraction,
            initial_bitrate: config.initial_bitrate,
            panic_buffer: config.panic_buffer,
            safe_buffer: config.safe_buffer,
            bandwidth_meter,
            buffer,
            last_selections: None,
        }
    }

    /// Highest bitrate strictly below `budget`, else the cheapest one.
    fn ideal_representation(
        adaptation_set: &AdaptationSet,
        budget: f64,
    ) -> Option<&Representation> {
        adaptation_set
            .by_bitrate_desc()
            .into_iter()
            .find(|r| (r.bandwidth as f64) < budget)
            .or_else(|| adaptation_set.lowest_bitrate())
    }

    fn budgets(&self, adaptation_sets: &AdaptationSets) -> BTreeMap<AdaptationSetId, f64> {
        let estimate = match self.last_selections {
            None => self.initial_bitrate,
            Some(_) => self.bandwidth_meter.bandwidth(),
        };
        let available = estimate * self.bandwidth_fraction;

        let count = |content_type: ContentType| {
            adaptation_sets
                .values()
                .filter(|s| s.content_type == content_type)
                .count()
        };
        let videos = count(ContentType::Video);
        let audios = count(ContentType::Audio);

        adaptation_sets
            .values()
            .map(|set| {
                let share = if videos == 0 || audios == 0 {
                    available / adaptation_sets.len() as f64
                } else {
                    match set.content_type {
                        ContentType::Video => available * VIDEO_SHARE / videos as f64,
                        ContentType::Audio => available * (1.0 - VIDEO_SHARE) / audios as f64,
                    }
                };
                (set.id.clone(), share)
            })
            .collect()
    }
}

impl AbrController for DashAbrController {
    fn select_representations(&mut self, adaptation_sets: &AdaptationSets) -> SelectionMap {
        let budgets = self.budgets(adaptation_sets);
        let level = self.buffer.level();
        let mut selections = SelectionMap::new();

        for (id, adaptation_set) in adaptation_sets {
            let budget = budgets.get(id).copied().unwrap_or(0.0);
            let Some(ideal) = Self::ideal_representation(adaptation_set, budget) else {
                continue;
            };

            let previous = self
                .last_selections
                .as_ref()
                .and_then(|last| last.get(id))
                .and_then(|rep_id| adaptation_set.representations.get(rep_id));

            let chosen = match previous {
                Some(previous)
                    if level < self.panic_buffer && previous.bandwidth < ideal.bandwidth =>
                {
                    previous
                }
                Some(previous)
                    if level > self.safe_buffer && previous.bandwidth > ideal.bandwidth =>
                {
                    previous
                }
                _ => ideal,
            };

            if chosen.id != ideal.id {
                debug!(
                    "Buffer level {:.2}s holds {} on {} instead of {}",
                    level, id, chosen.id, ideal.id
                );
            }
            selections.insert(id.clone(), chosen.id.clone());
        }

        self.last_selections = Some(selections.clone());
        selections
    }
}
