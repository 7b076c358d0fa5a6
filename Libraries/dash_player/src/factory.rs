use std::sync::Arc;

use crate::abr::DashAbrController;
use crate::bandwidth::{BandwidthListener, BandwidthMeter};
use crate::buffer::BufferManager;
use crate::config::PlayerConfig;
use crate::download::{Downloader, HttpDownloader, TransferListener};
use crate::error::DashResult;
use crate::mpd::provider::ManifestProvider;
use crate::player::{DashPlayer, PlayerListener};
use crate::scheduler::{Scheduler, SchedulerListener};

/// Wires a [`DashPlayer`] together from a [`PlayerConfig`] and listeners.
///
/// Each build gets fresh components; nothing is shared between players.
#[derive(Default)]
pub struct DashPlayerBuilder {
    config: PlayerConfig,
    player_listeners: Vec<Arc<dyn PlayerListener>>,
    scheduler_listeners: Vec<Arc<dyn SchedulerListener>>,
    bandwidth_listeners: Vec<Arc<dyn BandwidthListener>>,
}

impl DashPlayerBuilder {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn player_listener(mut self, listener: Arc<dyn PlayerListener>) -> Self {
        self.player_listeners.push(listener);
        self
    }

    pub fn scheduler_listener(mut self, listener: Arc<dyn SchedulerListener>) -> Self {
        self.scheduler_listeners.push(listener);
        self
    }

    pub fn bandwidth_listener(mut self, listener: Arc<dyn BandwidthListener>) -> Self {
        self.bandwidth_listeners.push(listener);
        self
    }

    /// Registers `listener` for all three kinds of notifications.
    pub fn listener<L>(self, listener: Arc<L>) -> Self
    where
        L: PlayerListener + SchedulerListener + BandwidthListener + 'static,
    {
        self.player_listener(listener.clone())
            .scheduler_listener(listener.clone())
            .bandwidth_listener(listener)
    }

    /// Builds a player that fetches everything over HTTP.
    pub fn build(self) -> DashResult<DashPlayer> {
        self.build_with(|listeners| Arc::new(HttpDownloader::new(listeners)) as Arc<dyn Downloader>)
    }

    /// Builds a player on custom downloaders. `downloader` is called once for
    /// the manifest and once for the segments, with the transfer listeners
    /// each one must report to.
    pub fn build_with<F>(self, downloader: F) -> DashResult<DashPlayer>
    where
        F: Fn(Vec<Arc<dyn TransferListener>>) -> Arc<dyn Downloader>,
    {
        let config = self.config;
        config.validate()?;

        let buffer = Arc::new(BufferManager::new());
        let bandwidth_meter = Arc::new(BandwidthMeter::new(
            config.initial_bitrate,
            config.smoothing_factor,
            self.bandwidth_listeners,
        ));

        let meter_listener: Arc<dyn TransferListener> = bandwidth_meter.clone();
        let manifest_downloader = downloader(vec![]);
        let segment_downloader = downloader(vec![meter_listener]);

        let abr = DashAbrController::new(&config, bandwidth_meter, buffer.clone());
        let scheduler = Scheduler::new(
            &config,
            segment_downloader,
            buffer.clone(),
            Box::new(abr),
            self.scheduler_listeners,
        );
        let provider =
            ManifestProvider::new(manifest_downloader, config.manifest_refresh_interval());

        Ok(DashPlayer::new(&config, buffer, provider, scheduler, self.player_listeners))
    }
}
