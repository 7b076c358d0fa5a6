//! Segment and manifest transfers.
//!
//! A [`Downloader`] fetches whole resources and reports progress to its
//! [`TransferListener`]s while the body streams in. The bandwidth meter is the
//! main listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DashError, DashResult};

/// Receives progress notifications for every transfer of a downloader.
pub trait TransferListener: Send + Sync {
    fn on_transfer_start(&self, url: &str);

    /// `position` counts the bytes received so far, chunk included.
    fn on_bytes_transferred(&self, length: usize, url: &str, position: u64, total: Option<u64>);

    fn on_transfer_end(&self, size: u64, url: &str);

    fn on_transfer_canceled(&self, url: &str, position: u64, total: Option<u64>) {
        let _ = (url, position, total);
    }
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetches the whole resource at `url`.
    async fn download(&self, url: &str) -> DashResult<Bytes>;

    /// Aborts any in-flight transfer. Later downloads fail with
    /// [`DashError::Canceled`].
    async fn close(&self);
}

/// [`Downloader`] over HTTP(S). Transfers are never retried.
pub struct HttpDownloader {
    client: Client,
    listeners: Vec<Arc<dyn TransferListener>>,
    cancellation_token: CancellationToken,
    busy: AtomicBool,
}

impl HttpDownloader {
    pub fn new(listeners: Vec<Arc<dyn TransferListener>>) -> Self {
        Self::with_client(Client::new(), listeners)
    }

    pub fn with_client(client: Client, listeners: Vec<Arc<dyn TransferListener>>) -> Self {
        Self {
            client,
            listeners,
            cancellation_token: CancellationToken::new(),
            busy: AtomicBool::new(false),
        }
    }

    /// True while a transfer is in progress.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    async fn transfer(&self, url: &str) -> DashResult<Bytes> {
        let mut in_flight = InFlight::begin(self, url);

        let request = self.client.get(url).send();
        let mut response = tokio::select! {
            _ = self.cancellation_token.cancelled() => {
                return Err(DashError::Canceled(url.to_string()));
            }
            response = request => response.map_err(|e| DashError::transfer(url, e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DashError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        in_flight.total = response.content_length();
        let mut body = BytesMut::with_capacity(capacity_hint(in_flight.total));

        loop {
            let chunk = tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    return Err(DashError::Canceled(url.to_string()));
                }
                chunk = response.chunk() => chunk,
            };
            match chunk.map_err(|e| DashError::transfer(url, e.to_string()))? {
                Some(chunk) => {
                    in_flight.position += chunk.len() as u64;
                    for listener in &self.listeners {
                        listener.on_bytes_transferred(
                            chunk.len(),
                            url,
                            in_flight.position,
                            in_flight.total,
                        );
                    }
                    body.extend_from_slice(&chunk);
                }
                None => break,
            }
        }

        let size = in_flight.finish();
        debug!("Downloaded {} bytes from {}", size, url);
        Ok(body.freeze())
    }
}

/// Marks the downloader busy for one transfer. Unless [`InFlight::finish`] is
/// called, dropping it reports the transfer as canceled, also when the
/// download future itself is dropped.
struct InFlight<'a> {
    downloader: &'a HttpDownloader,
    url: &'a str,
    position: u64,
    total: Option<u64>,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn begin(downloader: &'a HttpDownloader, url: &'a str) -> Self {
        downloader.busy.store(true, Ordering::Release);
        for listener in &downloader.listeners {
            listener.on_transfer_start(url);
        }
        Self {
            downloader,
            url,
            position: 0,
            total: None,
            finished: false,
        }
    }

    fn finish(mut self) -> u64 {
        self.finished = true;
        for listener in &self.downloader.listeners {
            listener.on_transfer_end(self.position, self.url);
        }
        self.position
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.downloader.busy.store(false, Ordering::Release);
        if !self.finished {
            for listener in &self.downloader.listeners {
                listener.on_transfer_canceled(self.url, self.position, self.total);
            }
        }
    }
}

/// Largest pre-allocation trusted from a `Content-Length` header.
const MAX_CAPACITY_HINT: u64 = 4 << 20;

fn capacity_hint(content_length: Option<u64>) -> usize {
    content_length.map_or(0, |length| length.min(MAX_CAPACITY_HINT) as usize)
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str) -> DashResult<Bytes> {
        if self.cancellation_token.is_cancelled() {
            return Err(DashError::Canceled(url.to_string()));
        }
        let result = self.transfer(url).await;
        if let Err(e) = &result {
            if !matches!(e, DashError::Canceled(_)) {
                warn!("Download of {} failed: {}", url, e);
            }
        }
        result
    }

    async fn close(&self) {
        self.cancellation_token.cancel();
    }
}
