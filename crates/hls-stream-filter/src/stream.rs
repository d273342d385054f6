//! Session construction and the playback cursor.
//!
//! [`HlsStream`] presents the logical concatenation of all segment payloads as
//! one byte stream. Reads block while the download coordinator catches up;
//! seeks are segment-granular and use the estimated `duration × bandwidth / 8`
//! length of each segment.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::runtime::Runtime;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::downloader::{HttpSource, RemoteSource, ResourceDownloader};
use crate::error::{HlsError, HlsResult};
use crate::events::{EventSink, StreamEvent};
use crate::loader;
use crate::model::{Segment, VariantId, VariantStream};
use crate::parser::looks_like_hls;
use crate::settings::HlsSettings;
use crate::store::SegmentStore;
use crate::worker::{self, Shared, WindowState};

/// Outcome of looking up a segment for playback.
enum Resolved {
    Ready {
        variant: usize,
        segment: Arc<Segment>,
    },
    Pending,
    /// A live segment the download coordinator gave up on.
    Skipped,
    EndOfStream,
}

/// A running HLS session exposed as a seekable byte stream.
///
/// Construction is blocking and spins up a private tokio runtime plus the
/// download (and, for live playlists, reload) threads. Do not call
/// [`HlsStream::open`] from inside an async context.
pub struct HlsStream {
    shared: Arc<Shared>,
    offset: u64,
    cancel: CancellationToken,
    download_thread: Option<JoinHandle<()>>,
    reload_thread: Option<JoinHandle<()>>,
    runtime: Option<Runtime>,
}

impl std::fmt::Debug for HlsStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HlsStream")
            .field("url", &self.shared.url.as_str())
            .field("meta", &self.shared.meta)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl HlsStream {
    /// Open `url` over HTTP.
    pub fn open(url: &str, settings: HlsSettings) -> HlsResult<Self> {
        let url = Url::parse(url)?;
        let source = Arc::new(HttpSource::new(&settings)?);
        Self::open_with_source(url, settings, source)
    }

    /// Open `url` using a custom byte source.
    pub fn open_with_source(
        url: Url,
        settings: HlsSettings,
        source: Arc<dyn RemoteSource>,
    ) -> HlsResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(settings.io_threads)
            .thread_name("hls-io")
            .enable_all()
            .build()?;
        let cancel = CancellationToken::new();
        let downloader = ResourceDownloader::new(source, &settings, cancel.clone());

        let loaded = runtime.block_on(async {
            let body = downloader
                .download_playlist(&url)
                .await
                .map_err(|e| e.with_context("fetching playlist"))?;
            if !looks_like_hls(&body) {
                return Err(HlsError::invalid(format!("{url} does not look like HLS")));
            }
            loader::load_from_bytes(&downloader, &url, &body, settings.default_bandwidth).await
        })?;
        info!(
            url = %url,
            meta = loaded.meta,
            variants = loaded.variants.len(),
            "playlist loaded"
        );

        let store = SegmentStore::new(loaded.variants);
        let first = store.get(0).ok_or(HlsError::NoVariants)?;
        let start = choose_segment(&first, &settings);
        let live = first.is_live();
        let events = EventSink::new(settings.event_channel_capacity);

        let shared = Arc::new(Shared::new(
            store,
            settings,
            downloader,
            runtime.handle().clone(),
            events,
            url,
            loaded.meta,
            start,
        ));
        let mut stream = HlsStream {
            shared,
            offset: 0,
            cancel,
            download_thread: None,
            reload_thread: None,
            runtime: Some(runtime),
        };

        stream.prefetch()?;
        stream.spawn_workers(live)?;
        Ok(stream)
    }

    /// Download the start segment (following any bandwidth switch) and the
    /// segments right after it before handing the session out.
    fn prefetch(&mut self) -> HlsResult<()> {
        let shared = &self.shared;
        let (mut stream, start) = {
            let w = shared.window.lock();
            (w.download_stream, w.download_segment)
        };
        if shared.variant(stream)?.segment_count() == 0 {
            return Err(HlsError::NoSegments);
        }

        let mut switches_left = shared.store.len();
        loop {
            shared
                .fetch_segment(stream, start)
                .map_err(|e| e.with_context("prefetching first segment"))?;
            let now = shared.window.lock().download_stream;
            if now == stream || switches_left == 0 {
                break;
            }
            debug!(from = stream, to = now, "prefetch restarts on better variant");
            shared.variant(stream)?.release_from(start);
            switches_left -= 1;
            stream = now;
        }
        {
            let mut w = shared.window.lock();
            w.playback_stream = stream;
            w.download_stream = stream;
        }

        let mut current = stream;
        for index in start..start + shared.settings.prefetch_segments {
            if index >= shared.variant(current)?.segment_count() {
                break;
            }
            shared
                .fetch_segment(current, index)
                .map_err(|e| e.with_context("prefetching segments"))?;
            let mut w = shared.window.lock();
            w.download_segment = index + 1;
            current = w.download_stream;
        }
        Ok(())
    }

    fn spawn_workers(&mut self, live: bool) -> HlsResult<()> {
        if live {
            let shared = Arc::clone(&self.shared);
            self.reload_thread = Some(
                std::thread::Builder::new()
                    .name("hls-reload".into())
                    .spawn(move || worker::reload::run(shared))?,
            );
        }
        let shared = Arc::clone(&self.shared);
        self.download_thread = Some(
            std::thread::Builder::new()
                .name("hls-download".into())
                .spawn(move || worker::download::run(shared))?,
        );
        Ok(())
    }

    // ----------------------------
    // Session info
    // ----------------------------

    /// URL of the top-level playlist.
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// The top-level playlist listed several variants.
    pub fn is_meta(&self) -> bool {
        self.shared.meta
    }

    /// The playing variant has not seen an end-of-list marker.
    pub fn is_live(&self) -> bool {
        self.playback_variant().is_none_or(|v| v.is_live())
    }

    pub fn variant_count(&self) -> usize {
        self.shared.store.len()
    }

    /// Variant currently being played.
    pub fn current_variant(&self) -> VariantId {
        VariantId(self.shared.window.lock().playback_stream)
    }

    /// Last measured throughput in bits per second.
    pub fn bandwidth_estimate(&self) -> u64 {
        self.shared.estimator.estimate()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events.subscribe()
    }

    /// Logical byte offset of the cursor.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Estimated total size in bytes; 0 for live sessions.
    pub fn size(&self) -> u64 {
        match self.playback_variant() {
            Some(v) if !v.is_live() => v.size_estimate(),
            _ => 0,
        }
    }

    /// On-demand sessions can always seek. Live sessions only while the
    /// downloader is more than two segments away from the end of the list.
    pub fn can_seek(&self) -> bool {
        let w = self.shared.window.lock();
        let Some(variant) = self.shared.store.get(w.playback_stream) else {
            return false;
        };
        if !variant.is_live() {
            return true;
        }
        w.download_segment + 2 < variant.segment_count()
    }

    fn playback_variant(&self) -> Option<Arc<VariantStream>> {
        let stream = self.shared.window.lock().playback_stream;
        self.shared.store.get(stream)
    }

    // ----------------------------
    // Read / Peek
    // ----------------------------

    /// Read up to `buf.len()` bytes.
    ///
    /// Blocks until `buf` is full. A short count means the stream ended, a
    /// download failed fatally, or the session is closing.
    pub fn read(&mut self, buf: &mut [u8]) -> HlsResult<usize> {
        let mut copied = 0;
        while copied < buf.len() {
            let Some((variant, segment)) = self.next_segment() else {
                break;
            };

            let n = {
                let mut st = segment.lock();
                let duration = st.duration;
                match st.payload.as_mut() {
                    Some(p) if p.remaining() > 0 => {
                        if p.position() == 0 {
                            info!(variant, sequence = segment.sequence(), duration, "playing segment");
                            self.shared.events.emit(StreamEvent::SegmentStarted {
                                variant_id: VariantId(variant),
                                sequence: segment.sequence(),
                                duration: Duration::from_secs(u64::from(duration)),
                            });
                        }
                        p.read_into(&mut buf[copied..])
                    }
                    _ => 0,
                }
            };

            if n == 0 {
                self.finish_segment(variant, &segment);
                continue;
            }
            copied += n;
            self.offset += n as u64;
        }
        Ok(copied)
    }

    /// Look at up to `len` upcoming bytes without consuming them.
    ///
    /// Blocks like [`HlsStream::read`]: segments after the current one are
    /// waited for until `len` bytes are collected or the stream ends.
    pub fn peek(&mut self, len: usize) -> HlsResult<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }

        let (mut stream, head) = loop {
            let Some((variant, segment)) = self.next_segment() else {
                return Ok(Bytes::new());
            };
            let head = remaining_bytes(&segment);
            if head.is_empty() {
                self.finish_segment(variant, &segment);
                continue;
            }
            break (variant, head);
        };

        if head.len() >= len {
            return Ok(head.slice(..len));
        }

        let mut out = BytesMut::from(&head[..]);

        let shared = &self.shared;
        let mut w = shared.window.lock();
        let mut index = w.playback_segment + 1;
        while out.len() < len {
            match lookup(shared, &w, stream, index) {
                Resolved::Ready { variant, segment } => {
                    stream = variant;
                    let more = remaining_bytes(&segment);
                    let take = more.len().min(len - out.len());
                    out.extend_from_slice(&more[..take]);
                    index += 1;
                }
                Resolved::Skipped => index += 1,
                Resolved::EndOfStream => break,
                Resolved::Pending => {
                    if w.peek_horizon != Some(index) {
                        w.peek_horizon = Some(index);
                        shared.cond.notify_all();
                    }
                    trace!(index, download = w.download_segment, "peek waiting for segment");
                    shared.cond.wait(&mut w);
                }
            }
        }
        w.peek_horizon = None;
        drop(w);

        trace!(requested = len, got = out.len(), "peek");
        Ok(out.freeze())
    }

    /// Resolve the segment due for playback, waiting on the download
    /// coordinator while it is still pending. `None` means end of stream.
    fn next_segment(&self) -> Option<(usize, Arc<Segment>)> {
        let shared = &self.shared;
        let mut w = shared.window.lock();
        loop {
            match resolve(shared, &mut w) {
                Resolved::Ready { variant, segment } => return Some((variant, segment)),
                Resolved::EndOfStream => return None,
                Resolved::Skipped => {
                    warn!(index = w.playback_segment, "segment was skipped by the downloader, skipping");
                    w.playback_segment += 1;
                    shared.cond.notify_all();
                }
                Resolved::Pending => {
                    trace!(
                        playback = w.playback_segment,
                        download = w.download_segment,
                        "waiting for segment"
                    );
                    shared.cond.wait(&mut w);
                }
            }
        }
    }

    /// The current segment is exhausted: release or rewind it, move on to the
    /// next index and wake the download coordinator.
    fn finish_segment(&self, variant: usize, segment: &Segment) {
        let shared = &self.shared;
        let (cache, live) = shared
            .store
            .get(variant)
            .map_or((false, true), |v| (v.allow_cache(), v.is_live()));
        if !cache || live {
            segment.release();
        } else {
            segment.rewind();
        }

        let mut w = shared.window.lock();
        w.playback_segment += 1;
        trace!(
            variant,
            sequence = segment.sequence(),
            next = w.playback_segment,
            "segment finished"
        );
        shared.cond.notify_all();
    }

    // ----------------------------
    // Seek
    // ----------------------------

    /// Move the cursor to logical byte offset `pos`.
    ///
    /// Playback restarts at the beginning of the segment whose estimated byte
    /// range contains `pos`. Offsets beyond the estimated size land on the last
    /// segment. On live sessions the last few segments are never valid targets.
    pub fn seek_to(&mut self, pos: u64) -> HlsResult<()> {
        if !self.can_seek() {
            return Err(HlsError::NotSeekable);
        }
        let shared = &self.shared;
        let variant = self.playback_variant().ok_or(HlsError::NoVariants)?;
        let live = variant.is_live();
        let edge = shared.settings.live_edge_segments;

        let (target, count) = {
            let st = variant.lock();
            let count = st.segments.len();
            let bytes_per_sec = variant.bandwidth() / 8;
            let mut length = 0u64;
            let mut found = None;
            for (i, s) in st.segments.iter().enumerate() {
                length += u64::from(s.duration()) * bytes_per_sec;
                if pos < length {
                    found = Some(i);
                    break;
                }
            }
            let target = match found {
                Some(i) => i,
                None => count.checked_sub(1).ok_or(HlsError::NoSegments)?,
            };
            (target, count)
        };

        if live && count - target <= edge {
            debug!(pos, target, count, "seek target too close to the live edge");
            return Err(HlsError::NotSeekable);
        }

        for v in shared.store.variants() {
            let segments: Vec<_> = v.lock().segments.iter().skip(target).cloned().collect();
            for s in segments {
                s.rewind();
            }
        }

        let mut w = shared.window.lock();
        w.playback_segment = target;
        w.seek = Some(target);
        shared.cond.notify_all();
        info!(pos, segment = target, "seek");

        let want_ahead = shared.settings.seek_prefetch_segments;
        loop {
            if w.closed || shared.has_error() {
                break;
            }
            let count = shared
                .store
                .get(w.download_stream)
                .map_or(0, |v| v.segment_count());
            let ahead = w.download_segment.saturating_sub(w.playback_segment);
            if w.seek.is_none() && (ahead >= want_ahead || w.download_segment >= count) {
                break;
            }
            shared.cond.wait(&mut w);
        }
        let landed = w.playback_stream;
        drop(w);

        if shared.has_error() {
            return Err(HlsError::msg("download failed while seeking"));
        }
        self.offset = pos;
        shared.events.emit(StreamEvent::Seeked {
            variant_id: VariantId(landed),
            segment: target,
        });
        Ok(())
    }
}

/// Find the segment due for playback and follow a variant switch of the
/// download coordinator. Runs with the window lock held.
fn resolve(shared: &Shared, w: &mut WindowState) -> Resolved {
    let index = w.playback_segment;
    let found = lookup(shared, w, w.playback_stream, index);
    if let Resolved::Ready { variant, segment } = &found {
        if *variant != w.playback_stream {
            debug!(from = w.playback_stream, to = *variant, index, "playback follows variant switch");
            if let Some(old) = shared.store.get(w.playback_stream) {
                let released = old.release_from(index);
                if released > 0 {
                    debug!(stream = w.playback_stream, released, "released abandoned segments");
                }
            }
            w.playback_stream = *variant;
        }
        stall_check(shared, w, segment);
    }
    found
}

/// Find segment `index`, preferring variant `stream`. Runs with the window
/// lock held and leaves the cursor alone.
fn lookup(shared: &Shared, w: &WindowState, stream: usize, index: usize) -> Resolved {
    if w.closed || shared.has_error() {
        return Resolved::EndOfStream;
    }
    if w.seek.is_some() {
        return Resolved::Pending;
    }

    if let Some(segment) = shared.store.get(stream).and_then(|v| v.segment(index)) {
        if segment.is_materialized() {
            return Resolved::Ready {
                variant: stream,
                segment,
            };
        }
    }

    // The download coordinator may have switched variants underneath us.
    if w.download_segment > index {
        for (i, v) in shared.store.variants().iter().enumerate() {
            let Some(segment) = v.segment(index) else {
                continue;
            };
            if segment.is_materialized() {
                return Resolved::Ready {
                    variant: i,
                    segment,
                };
            }
        }
    }

    let Some(variant) = shared.store.get(stream) else {
        return Resolved::EndOfStream;
    };
    let count = variant.segment_count();
    if index >= count && variant.is_ended() {
        debug!(index, count, "end of stream");
        return Resolved::EndOfStream;
    }
    if w.download_segment > index {
        if variant.is_live() {
            return Resolved::Skipped;
        }
        error!(index, "segment missing behind the downloader, ending stream");
        return Resolved::EndOfStream;
    }
    Resolved::Pending
}

fn remaining_bytes(segment: &Segment) -> Bytes {
    segment
        .lock()
        .payload
        .as_ref()
        .map(|p| p.remaining_bytes())
        .unwrap_or_default()
}

/// Stall diagnostics for a segment that is about to be read dry.
fn stall_check(shared: &Shared, w: &WindowState, segment: &Segment) {
    let empty = segment
        .lock()
        .payload
        .as_ref()
        .is_none_or(|p| p.remaining() == 0);
    if !empty {
        return;
    }
    let Some(variant) = shared.store.get(w.download_stream) else {
        return;
    };
    let count = variant.segment_count();
    let gap = w.download_segment.saturating_sub(w.playback_segment);
    if gap == 0 && (count != w.download_segment || variant.is_live()) {
        error!(
            download = w.download_segment,
            playback = w.playback_segment,
            "playback will stall"
        );
    } else if gap > 0 && gap < 3 {
        warn!(
            download = w.download_segment,
            playback = w.playback_segment,
            "playback in danger of stalling"
        );
    }
}

/// Index to start playback at. On-demand playlists start at the beginning;
/// live playlists start far enough from the end to cover
/// `live_start_target_multiple` target durations.
fn choose_segment(variant: &VariantStream, settings: &HlsSettings) -> usize {
    if !variant.is_live() {
        return 0;
    }
    let st = variant.lock();
    let budget = u64::from(st.target_duration) * u64::from(settings.live_start_target_multiple);
    let mut duration = 0u64;
    for (i, s) in st.segments.iter().enumerate().rev() {
        let d = s.duration();
        if d > st.target_duration {
            warn!(
                sequence = s.sequence(),
                duration = d,
                target_duration = st.target_duration,
                "segment longer than target duration"
            );
        }
        duration += u64::from(d);
        if duration >= budget {
            debug!(index = i, sequence = s.sequence(), "live playback start");
            return i;
        }
    }
    warn!(
        segments = st.segments.len(),
        "not enough live data to start away from the edge, starting at the first segment"
    );
    0
}

impl Drop for HlsStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        {
            let mut w = self.shared.window.lock();
            w.closed = true;
            self.shared.cond.notify_all();
        }
        for handle in [self.download_thread.take(), self.reload_thread.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        debug!(url = %self.shared.url, "session closed");
    }
}

impl io::Read for HlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        HlsStream::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Seek for HlsStream {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(p) => Some(p),
            io::SeekFrom::Current(d) => self.offset.checked_add_signed(d),
            io::SeekFrom::End(d) => {
                if self.is_live() {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "cannot seek from the end of a live stream",
                    ));
                }
                self.size().checked_add_signed(d)
            }
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;

        if target == self.offset {
            return Ok(target);
        }
        self.seek_to(target)?;
        Ok(self.offset)
    }
}
