//! Download loop that keeps the buffer filled one segment index at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::abr::{AbrController, SelectionMap};
use crate::buffer::BufferManager;
use crate::config::PlayerConfig;
use crate::download::Downloader;
use crate::error::{DashError, DashResult};
use crate::mpd::AdaptationSets;

pub trait SchedulerListener: Send + Sync {
    fn on_segment_download_start(&self, index: usize, selections: &SelectionMap);
    fn on_segment_download_complete(&self, index: usize);
}

struct SchedulerInner {
    max_buffer_duration: f64,
    tick: Duration,
    downloader: Arc<dyn Downloader>,
    buffer: Arc<BufferManager>,
    abr: Mutex<Box<dyn AbrController>>,
    listeners: Vec<Arc<dyn SchedulerListener>>,
    adaptation_sets: RwLock<Arc<AdaptationSets>>,
    ended: AtomicBool,
    failed: AtomicBool,
}

impl SchedulerInner {
    fn snapshot(&self) -> Arc<AdaptationSets> {
        self.adaptation_sets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn select(&self, adaptation_sets: &AdaptationSets) -> SelectionMap {
        self.abr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .select_representations(adaptation_sets)
    }

    async fn run(&self) -> DashResult<()> {
        let mut index = 0usize;
        // Keyed by representation id and initialization URL
        let mut initialized: HashSet<String> = HashSet::new();

        loop {
            if self.buffer.level() > self.max_buffer_duration {
                sleep(self.tick).await;
                continue;
            }

            let adaptation_sets = self.snapshot();
            let selections = self.select(&adaptation_sets);

            let mut plan = Vec::with_capacity(selections.len());
            for (set_id, rep_id) in &selections {
                let Some(representation) = adaptation_sets
                    .get(set_id)
                    .and_then(|set| set.representations.get(rep_id))
                else {
                    continue;
                };
                match representation.segments.get(index) {
                    Some(segment) => plan.push((representation, segment)),
                    None => {
                        info!(
                            "Representation {} has no segment {}, all segments scheduled",
                            rep_id, index
                        );
                        self.ended.store(true, Ordering::Release);
                        return Ok(());
                    }
                }
            }
            if plan.is_empty() {
                warn!("Nothing selected for segment {}, ending the download loop", index);
                self.ended.store(true, Ordering::Release);
                return Ok(());
            }

            for listener in &self.listeners {
                listener.on_segment_download_start(index, &selections);
            }

            let mut duration = f64::INFINITY;
            for (representation, segment) in plan {
                if let Some(init_url) = &representation.initialization {
                    let key = format!("{}::{}", representation.id, init_url);
                    if !initialized.contains(&key) {
                        debug!("Fetching initialization segment of {}", representation.id);
                        self.downloader.download(init_url).await?;
                        initialized.insert(key);
                    }
                }
                self.downloader.download(&segment.url).await?;
                duration = duration.min(segment.duration);
            }

            for listener in &self.listeners {
                listener.on_segment_download_complete(index);
            }
            index += 1;
            self.buffer.enqueue(duration);
        }
    }
}

/// Runs the download loop on its own task until every segment is fetched,
/// a download fails or [`Scheduler::stop`] is called.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    cancellation_token: CancellationToken,
    task: Mutex<Option<JoinHandle<DashResult<()>>>>,
}

impl Scheduler {
    pub fn new(
        config: &PlayerConfig,
        downloader: Arc<dyn Downloader>,
        buffer: Arc<BufferManager>,
        abr: Box<dyn AbrController>,
        listeners: Vec<Arc<dyn SchedulerListener>>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                max_buffer_duration: config.max_buffer_duration,
                tick: config.tick_interval(),
                downloader,
                buffer,
                abr: Mutex::new(abr),
                listeners,
                adaptation_sets: RwLock::new(Arc::new(AdaptationSets::new())),
                ended: AtomicBool::new(false),
                failed: AtomicBool::new(false),
            }),
            cancellation_token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawns the download loop. Calling it again while the loop exists is a no-op.
    pub fn start(&self, adaptation_sets: Arc<AdaptationSets>) {
        let mut task = self.lock_task();
        if task.is_some() {
            warn!("Scheduler already started");
            return;
        }
        self.update(adaptation_sets);

        let inner = self.inner.clone();
        let token = self.cancellation_token.clone();
        *task = Some(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Scheduler canceled");
                    Ok(())
                }
                result = inner.run() => {
                    if let Err(e) = &result {
                        error!("Scheduler stopped on a failed download: {}", e);
                        inner.failed.store(true, Ordering::Release);
                    }
                    result
                }
            }
        }));
    }

    /// Replaces the manifest snapshot used from the next segment index on.
    pub fn update(&self, adaptation_sets: Arc<AdaptationSets>) {
        *self
            .inner
            .adaptation_sets
            .write()
            .unwrap_or_else(PoisonError::into_inner) = adaptation_sets;
    }

    /// Cancels the loop, closes the downloader and returns the loop outcome.
    pub async fn stop(&self) -> DashResult<()> {
        self.cancellation_token.cancel();
        self.inner.downloader.close().await;

        let handle = self.lock_task().take();
        match handle {
            Some(handle) => handle.await.map_err(|e| DashError::Task(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// True once every segment of the selected representations was fetched.
    pub fn is_end(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    /// True when the loop gave up because a download failed.
    pub fn has_failed(&self) -> bool {
        self.inner.failed.load(Ordering::Acquire)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<DashResult<()>>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
