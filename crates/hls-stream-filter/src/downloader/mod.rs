//! Remote byte sources and the retrying downloader built on top of them.
//!
//! [`RemoteSource`] is the seam to the outside world: it opens a URL and hands
//! back a [`RemoteReader`]. [`HttpSource`] is the reqwest-backed
//! implementation used in production; tests plug in their own sources.
//!
//! [`ResourceDownloader`] wraps any source with cancellation, per-request
//! timeouts and bounded retries with exponential backoff.

mod http;
#[cfg(test)]
pub(crate) mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

pub use self::http::HttpSource;
use crate::error::{HlsError, HlsResult};
use crate::settings::HlsSettings;

const READ_CHUNK: usize = 32 * 1024;

/// Opens remote resources.
#[async_trait]
pub trait RemoteSource: Send + Sync + 'static {
    /// Start fetching `url`.
    async fn open(&self, url: &Url) -> HlsResult<Box<dyn RemoteReader>>;
}

/// An open remote resource.
#[async_trait]
pub trait RemoteReader: Send {
    /// Total size as currently known. May change while the body is read.
    fn size(&self) -> Option<u64>;

    /// Read the next bytes into `buf`. `Ok(0)` means end of body.
    async fn read(&mut self, buf: &mut [u8]) -> HlsResult<usize>;
}

/// Downloader for playlists and segments.
///
/// Supports cancellation and bounded retries/backoff. `request_timeout` bounds
/// opening a resource and acts as an idle timeout between reads.
#[derive(Clone)]
pub struct ResourceDownloader {
    source: Arc<dyn RemoteSource>,

    // Request / retry configuration.
    request_timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    max_retry_delay: Duration,

    cancel: CancellationToken,
}

impl std::fmt::Debug for ResourceDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDownloader")
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("max_retry_delay", &self.max_retry_delay)
            .finish_non_exhaustive()
    }
}

impl ResourceDownloader {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        settings: &HlsSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            request_timeout: settings.request_timeout,
            max_retries: settings.max_retries,
            retry_base_delay: settings.retry_base_delay,
            max_retry_delay: settings.max_retry_delay,
            cancel,
        }
    }

    /// Returns the cancellation token used by this downloader.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Downloads a playlist into memory.
    pub async fn download_playlist(&self, url: &Url) -> HlsResult<Bytes> {
        self.retry_with_backoff(url, "playlist", || self.try_download_once(url))
            .await
    }

    /// Downloads a media segment into memory.
    pub async fn download_segment(&self, url: &Url) -> HlsResult<Bytes> {
        self.retry_with_backoff(url, "segment", || self.try_download_once(url))
            .await
    }

    /// Sleep for `delay` unless the downloader is cancelled first.
    pub async fn sleep(&self, delay: Duration) -> HlsResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(HlsError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    // ----------------------------
    // Internals: retry policy
    // ----------------------------

    async fn retry_with_backoff<T, F, Fut>(&self, url: &Url, op_name: &str, mut f: F) -> HlsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = HlsResult<T>>,
    {
        let mut last_error: Option<HlsError> = None;
        let mut delay = self.retry_base_delay;

        for attempt in 0..=self.max_retries {
            if self.cancel.is_cancelled() {
                return Err(HlsError::Cancelled);
            }

            match f().await {
                Ok(v) => {
                    if attempt > 0 {
                        debug!(
                            url = %url,
                            attempts = attempt + 1,
                            operation = op_name,
                            "download succeeded after retry"
                        );
                    }
                    return Ok(v);
                }
                Err(HlsError::Cancelled) => return Err(HlsError::Cancelled),
                Err(e) => {
                    debug!(
                        url = %url,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        operation = op_name,
                        "download attempt failed: {}",
                        e
                    );
                    last_error = Some(e);

                    if attempt < self.max_retries {
                        self.sleep(delay).await?;
                        delay = (delay * 2).min(self.max_retry_delay);
                    }
                }
            }
        }

        debug!(
            url = %url,
            attempts = self.max_retries + 1,
            operation = op_name,
            "download giving up after retries"
        );

        Err(last_error.unwrap_or_else(|| HlsError::msg(format!("download of {url} failed"))))
    }

    // ----------------------------
    // Internals: single attempt
    // ----------------------------

    async fn try_download_once(&self, url: &Url) -> HlsResult<Bytes> {
        let reader = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(HlsError::Cancelled),
            res = timeout(self.request_timeout, self.source.open(url)) => match res {
                Ok(r) => r?,
                Err(_) => return Err(HlsError::timeout(url.as_str())),
            },
        };
        self.transfer(reader, url).await
    }

    /// Read a body to the end. The advertised size is re-checked before every
    /// read and the buffer grows to match; the returned length is what was
    /// actually transferred.
    async fn transfer(&self, mut reader: Box<dyn RemoteReader>, url: &Url) -> HlsResult<Bytes> {
        let initial = reader.size().unwrap_or(READ_CHUNK as u64);
        let mut buf = BytesMut::with_capacity(usize::try_from(initial).unwrap_or(READ_CHUNK));
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            if let Some(size) = reader.size() {
                let want = usize::try_from(size).unwrap_or(usize::MAX);
                if want > buf.capacity() {
                    trace!(url = %url, old = buf.capacity(), new = want, "resource size grew");
                    buf.reserve(want - buf.len());
                }
            }

            let n = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(HlsError::Cancelled),
                res = timeout(self.request_timeout, reader.read(&mut chunk)) => match res {
                    Ok(r) => r?,
                    Err(_) => return Err(HlsError::timeout(url.as_str())),
                },
            };
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        if let Some(size) = reader.size() {
            if size != buf.len() as u64 {
                debug!(url = %url, advertised = size, transferred = buf.len(), "size mismatch");
            }
        }
        Ok(buf.freeze())
    }
}
