use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::download::Downloader;
use crate::error::{DashError, DashResult};
use crate::mpd::parser::parse_mpd;
use crate::mpd::Manifest;

pub type ManifestSnapshot = Option<Arc<Manifest>>;

/// Fetches the manifest and, for live presentations, keeps it fresh.
///
/// Every successful fetch is published as a new snapshot on a watch channel;
/// a failed refresh leaves the previous snapshot in place.
pub struct ManifestProvider {
    downloader: Arc<dyn Downloader>,
    refresh_interval: Duration,
    sender: Arc<watch::Sender<ManifestSnapshot>>,
    cancellation_token: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl ManifestProvider {
    /// `refresh_interval` applies to dynamic manifests without `minimumUpdatePeriod`.
    pub fn new(downloader: Arc<dyn Downloader>, refresh_interval: Duration) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            downloader,
            refresh_interval,
            sender: Arc::new(sender),
            cancellation_token: CancellationToken::new(),
            refresher: Mutex::new(None),
        }
    }

    /// Loads the manifest at `url`. Dynamic manifests get a background refresher.
    pub async fn start(&self, url: &str) -> DashResult<Arc<Manifest>> {
        let manifest = Arc::new(fetch(self.downloader.as_ref(), url).await?);
        self.sender.send_replace(Some(manifest.clone()));

        if manifest.is_dynamic() {
            let period = refresh_period(&manifest, self.refresh_interval);
            info!("Dynamic manifest, refreshing every {:?}", period);
            let handle = tokio::spawn(refresh_loop(
                self.downloader.clone(),
                url.to_string(),
                self.sender.clone(),
                self.cancellation_token.clone(),
                period,
                self.refresh_interval,
            ));
            *self.refresher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        } else {
            self.downloader.close().await;
        }

        Ok(manifest)
    }

    /// The latest snapshot, `None` before `start` succeeded.
    pub fn manifest(&self) -> ManifestSnapshot {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ManifestSnapshot> {
        self.sender.subscribe()
    }

    /// Stops refreshing and closes the downloader.
    pub async fn stop(&self) {
        self.cancellation_token.cancel();
        self.downloader.close().await;

        let handle = self
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Manifest refresher ended abnormally: {}", e);
            }
        }
    }
}

fn refresh_period(manifest: &Manifest, fallback: Duration) -> Duration {
    manifest
        .minimum_update_period
        .filter(|period| *period > 0.0)
        .and_then(|period| Duration::try_from_secs_f64(period).ok())
        .unwrap_or(fallback)
}

async fn fetch(downloader: &dyn Downloader, url: &str) -> DashResult<Manifest> {
    let body = downloader.download(url).await?;
    let content = std::str::from_utf8(&body)
        .map_err(|e| DashError::parse(format!("Manifest is not valid UTF-8: {e}")))?;
    parse_mpd(content, url)
}

async fn refresh_loop(
    downloader: Arc<dyn Downloader>,
    url: String,
    sender: Arc<watch::Sender<ManifestSnapshot>>,
    cancellation_token: CancellationToken,
    mut period: Duration,
    fallback: Duration,
) {
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            _ = sleep(period) => {}
        }

        match fetch(downloader.as_ref(), &url).await {
            Ok(manifest) => {
                period = refresh_period(&manifest, fallback);
                let dynamic = manifest.is_dynamic();
                sender.send_replace(Some(Arc::new(manifest)));
                debug!("Manifest refreshed from {}", url);
                if !dynamic {
                    info!("Manifest became static, no more refreshes");
                    break;
                }
            }
            Err(DashError::Canceled(_)) => break,
            Err(e) => warn!("Manifest refresh failed, keeping the previous one: {}", e),
        }
    }
}
