//! Background workers of a session and the state they share with the
//! playback cursor.
//!
//! Two coordinators run on dedicated OS threads:
//! - [`download`]: keeps a sliding window of segments materialized ahead of
//!   playback, follows seeks and bandwidth switches.
//! - [`reload`]: live sessions only; refreshes the playlist and merges it
//!   into the store.
//!
//! Network I/O is async and runs on the session's tokio runtime; the threads
//! drive it with [`Handle::block_on`]. The cursor and the download coordinator
//! meet on [`Shared::window`] + [`Shared::cond`].
//!
//! Lock order is window → store → variant → segment.

pub(crate) mod download;
pub(crate) mod reload;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tracing::{debug, info, trace};
use url::Url;

use crate::abr::{self, BandwidthEstimator};
use crate::downloader::ResourceDownloader;
use crate::error::{HlsError, HlsResult};
use crate::events::{EventSink, StreamEvent};
use crate::model::{VariantId, VariantStream};
use crate::settings::HlsSettings;
use crate::store::SegmentStore;

/// Download/playback handshake, guarded by [`Shared::window`].
#[derive(Debug, Clone, Default)]
pub(crate) struct WindowState {
    /// Variant the download coordinator fetches from.
    pub download_stream: usize,
    /// Segment index the download coordinator fetches next.
    pub download_segment: usize,
    /// Pending seek target, consumed by the download coordinator.
    pub seek: Option<usize>,
    /// Variant the cursor reads from.
    pub playback_stream: usize,
    /// Segment index the cursor reads from.
    pub playback_segment: usize,
    /// Furthest segment a blocked `peek` waits for; the download window
    /// stretches up to it.
    pub peek_horizon: Option<usize>,
    /// Session teardown started.
    pub closed: bool,
}

/// State shared by the cursor and both coordinators.
pub(crate) struct Shared {
    pub store: SegmentStore,
    pub settings: HlsSettings,
    pub downloader: ResourceDownloader,
    pub runtime: Handle,
    pub estimator: BandwidthEstimator,
    pub events: EventSink,
    /// Top-level playlist URL, re-fetched on reload.
    pub url: Url,
    /// The top-level playlist listed variants.
    pub meta: bool,
    error: AtomicBool,
    pub window: Mutex<WindowState>,
    pub cond: Condvar,
}

impl Shared {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SegmentStore,
        settings: HlsSettings,
        downloader: ResourceDownloader,
        runtime: Handle,
        events: EventSink,
        url: Url,
        meta: bool,
        start_segment: usize,
    ) -> Self {
        let estimator = BandwidthEstimator::new(0);
        Self {
            store,
            settings,
            downloader,
            runtime,
            estimator,
            events,
            url,
            meta,
            error: AtomicBool::new(false),
            window: Mutex::new(WindowState {
                download_segment: start_segment,
                playback_segment: start_segment,
                ..WindowState::default()
            }),
            cond: Condvar::new(),
        }
    }

    /// Wake every waiter on the handshake condition.
    ///
    /// Takes the window lock so a waiter that just evaluated its predicate
    /// cannot miss the wakeup. Callers already holding the lock must use
    /// `cond.notify_all()` directly.
    pub fn signal(&self) {
        let _guard = self.window.lock();
        self.cond.notify_all();
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    /// Mark the session as failed and wake everyone up.
    pub fn fail(&self, error: &HlsError) {
        self.error.store(true, Ordering::Release);
        self.events.emit(StreamEvent::Error {
            error: error.to_string(),
        });
        self.signal();
    }

    pub fn variant(&self, index: usize) -> HlsResult<Arc<VariantStream>> {
        self.store
            .get(index)
            .ok_or_else(|| HlsError::msg(format!("variant {index} does not exist")))
    }

    /// Run a future on the session runtime from a worker or caller thread.
    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Make sure segment `index` of variant `stream` is materialized.
    ///
    /// Measures throughput and, for meta sessions, may switch the download
    /// variant. The segment lock is only taken to install the payload.
    pub fn fetch_segment(&self, stream: usize, index: usize) -> HlsResult<()> {
        let variant = self.variant(stream)?;
        let segment = variant.segment(index).ok_or_else(|| {
            HlsError::msg(format!("segment {index} of variant {stream} does not exist"))
        })?;

        let (url, duration) = {
            let st = segment.lock();
            if st.payload.is_some() {
                trace!(stream, index, "segment already materialized");
                return Ok(());
            }
            (st.url.clone(), st.duration)
        };

        let estimate = self.estimator.estimate();
        if estimate > 0 {
            abr::check_download_time(duration, variant.bandwidth(), estimate);
        }

        let start = Instant::now();
        let data = self.block_on(self.downloader.download_segment(&url))?;
        let elapsed = start.elapsed();
        let byte_len = data.len() as u64;
        segment.install(data);

        debug!(
            stream,
            index,
            sequence = segment.sequence(),
            byte_len,
            elapsed_ms = elapsed.as_millis() as u64,
            "downloaded segment"
        );
        self.events.emit(StreamEvent::SegmentDownloaded {
            variant_id: variant.id(),
            sequence: segment.sequence(),
            byte_len,
            elapsed,
        });

        let Some(bandwidth) = self.estimator.on_segment_downloaded(byte_len, elapsed) else {
            return Ok(());
        };
        if !(self.meta && self.settings.abr_enabled) {
            return Ok(());
        }
        let variants = self.store.variants();
        if let Some(next) = abr::adapt(&variants, stream, bandwidth) {
            let mut w = self.window.lock();
            if w.download_stream == stream {
                w.download_stream = next;
                let released = variants[stream].release_from(index + 1);
                if released > 0 {
                    debug!(stream, from = index + 1, released, "released abandoned segments");
                }
                info!(
                    from = stream,
                    to = next,
                    bandwidth,
                    "switching to variant with bandwidth {}",
                    variants[next].bandwidth()
                );
                self.events.emit(StreamEvent::VariantChanged {
                    from: VariantId(stream),
                    to: VariantId(next),
                    bandwidth,
                });
            }
        }
        Ok(())
    }

    /// Base reload period: the configured refresh interval, or the target
    /// duration of the variant currently being downloaded.
    pub fn reload_interval(&self) -> Duration {
        if let Some(interval) = self.settings.live_refresh_interval {
            return interval;
        }
        let stream = self.window.lock().download_stream;
        let secs = self.store.get(stream).map_or(0, |v| v.target_duration());
        Duration::from_secs(u64::from(secs.max(1)))
    }
}
