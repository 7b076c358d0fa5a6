#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dash_player::mpd::builder::MpdBuilder;
use dash_player::{DashError, DashResult, Downloader, TransferListener};
use tokio_util::sync::CancellationToken;

pub const MANIFEST_URL: &str = "http://media.local/vod/manifest.mpd";

/// `segments` one-second segments of a single video representation.
pub fn vod_manifest(segments: u32) -> String {
    MpdBuilder::default()
        .timeline_entry(1, segments as i64 - 1)
        .video_set("0", &[("0", 1_000_000)])
        .build_xml_string()
        .unwrap()
}

/// In-memory stand-in for the network. Documents are served instantly,
/// every other URL is a segment that takes `delay` to arrive in two chunks.
#[derive(Clone)]
pub struct MockNetwork {
    documents: HashMap<String, String>,
    delay: Duration,
    segment_size: usize,
    fail_on: Option<String>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockNetwork {
    pub fn new(delay: Duration) -> Self {
        Self {
            documents: HashMap::new(),
            delay,
            segment_size: 50_000,
            fail_on: None,
            requests: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn with_document(mut self, url: &str, body: String) -> Self {
        self.documents.insert(url.to_string(), body);
        self
    }

    pub fn segment_size(mut self, bytes: usize) -> Self {
        self.segment_size = bytes;
        self
    }

    /// Transfers of URLs containing `pattern` fail.
    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_on = Some(pattern.to_string());
        self
    }

    pub fn downloader(&self, listeners: Vec<Arc<dyn TransferListener>>) -> Arc<dyn Downloader> {
        Arc::new(MockDownloader {
            network: self.clone(),
            listeners,
            closed: CancellationToken::new(),
        })
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count_requests(&self, pattern: &str) -> usize {
        self.requests().iter().filter(|url| url.contains(pattern)).count()
    }
}

pub struct MockDownloader {
    network: MockNetwork,
    listeners: Vec<Arc<dyn TransferListener>>,
    closed: CancellationToken,
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, url: &str) -> DashResult<Bytes> {
        if self.closed.is_cancelled() {
            return Err(DashError::Canceled(url.to_string()));
        }
        self.network.requests.lock().unwrap().push(url.to_string());
        if let Some(body) = self.network.documents.get(url) {
            return Ok(Bytes::from(body.clone()));
        }

        for listener in &self.listeners {
            listener.on_transfer_start(url);
        }
        if self.network.fail_on.as_deref().is_some_and(|pattern| url.contains(pattern)) {
            for listener in &self.listeners {
                listener.on_transfer_canceled(url, 0, None);
            }
            return Err(DashError::transfer(url, "connection reset"));
        }

        let size = self.network.segment_size;
        let total = Some(size as u64);
        let mut position = 0u64;
        for chunk in [size / 2, size - size / 2] {
            tokio::select! {
                _ = self.closed.cancelled() => {
                    for listener in &self.listeners {
                        listener.on_transfer_canceled(url, position, total);
                    }
                    return Err(DashError::Canceled(url.to_string()));
                }
                _ = tokio::time::sleep(self.network.delay / 2) => {}
            }
            position += chunk as u64;
            for listener in &self.listeners {
                listener.on_bytes_transferred(chunk, url, position, total);
            }
        }
        for listener in &self.listeners {
            listener.on_transfer_end(position, url);
        }
        Ok(Bytes::from(vec![0u8; size]))
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

/// Records everything the engine reports, in order.
#[derive(Default)]
pub struct Recorder {
    pub transitions: Mutex<Vec<(dash_player::State, dash_player::State)>>,
    pub started: Mutex<Vec<usize>>,
    pub completed: Mutex<Vec<usize>>,
}

impl Recorder {
    pub fn transitions(&self) -> Vec<(dash_player::State, dash_player::State)> {
        self.transitions.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<usize> {
        self.started.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<usize> {
        self.completed.lock().unwrap().clone()
    }
}

impl dash_player::PlayerListener for Recorder {
    fn on_state_change(&self, _position: f64, old: dash_player::State, new: dash_player::State) {
        self.transitions.lock().unwrap().push((old, new));
    }
}

impl dash_player::SchedulerListener for Recorder {
    fn on_segment_download_start(&self, index: usize, _selections: &dash_player::SelectionMap) {
        self.started.lock().unwrap().push(index);
    }

    fn on_segment_download_complete(&self, index: usize) {
        self.completed.lock().unwrap().push(index);
    }
}

impl dash_player::BandwidthListener for Recorder {
    fn on_bandwidth_update(&self, _bps: f64) {}
}
