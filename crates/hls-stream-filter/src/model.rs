//! Core data model of a session: variants, segments and segment payloads.
//!
//! These types carry their own locks. A [`VariantStream`] guards its segment
//! list and live metadata; a [`Segment`] guards its payload. Neither lock is
//! ever held across network I/O.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use url::Url;

use crate::parser::{MediaPlaylist, MediaSegment};

/// Index of a variant inside the session's segment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantId(pub usize);

/// Downloaded bytes of a segment plus the read cursor over them.
#[derive(Debug, Clone)]
pub struct SegmentPayload {
    data: Bytes,
    pos: usize,
}

impl SegmentPayload {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Unread bytes, without advancing the cursor.
    pub fn remaining_bytes(&self) -> Bytes {
        self.data.slice(self.pos..)
    }

    /// Copy up to `buf.len()` unread bytes into `buf` and advance.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }
}

/// Mutable part of a [`Segment`].
#[derive(Debug)]
pub struct SegmentState {
    /// Duration in whole seconds.
    pub duration: u32,
    pub url: Url,
    /// Byte size; 0 until the segment has been fetched.
    pub size: u64,
    pub payload: Option<SegmentPayload>,
}

/// One media segment.
#[derive(Debug)]
pub struct Segment {
    sequence: u64,
    state: Mutex<SegmentState>,
}

impl Segment {
    pub fn new(sequence: u64, duration: u32, url: Url) -> Self {
        Self {
            sequence,
            state: Mutex::new(SegmentState {
                duration,
                url,
                size: 0,
                payload: None,
            }),
        }
    }

    pub(crate) fn from_media(seg: MediaSegment) -> Self {
        Self::new(seg.sequence, seg.duration, seg.url)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Lock the segment.
    pub fn lock(&self) -> MutexGuard<'_, SegmentState> {
        self.state.lock()
    }

    pub fn duration(&self) -> u32 {
        self.state.lock().duration
    }

    pub fn url(&self) -> Url {
        self.state.lock().url.clone()
    }

    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    pub fn is_materialized(&self) -> bool {
        self.state.lock().payload.is_some()
    }

    /// Install downloaded bytes, replacing any previous payload.
    pub fn install(&self, data: Bytes) {
        let mut st = self.state.lock();
        st.size = data.len() as u64;
        st.payload = Some(SegmentPayload::new(data));
    }

    /// Drop the payload; the segment can be fetched again later.
    pub fn release(&self) {
        self.state.lock().payload = None;
    }

    pub fn rewind(&self) {
        if let Some(p) = self.state.lock().payload.as_mut() {
            p.rewind();
        }
    }
}

/// Mutable part of a [`VariantStream`].
#[derive(Debug)]
pub struct VariantState {
    /// `#EXT-X-TARGETDURATION` in seconds.
    pub target_duration: u32,
    pub media_sequence: u64,
    pub allow_cache: bool,
    /// End-of-list marker seen; a variant that has not ended is live.
    pub ended: bool,
    /// Ordered by strictly increasing sequence number.
    pub segments: Vec<Arc<Segment>>,
}

/// One encoding of the program.
#[derive(Debug)]
pub struct VariantStream {
    id: VariantId,
    program_id: u32,
    bandwidth: u64,
    version: u32,
    url: Url,
    state: Mutex<VariantState>,
}

/// A freshly fetched variant that is not part of a store yet.
#[derive(Debug, Clone)]
pub struct LoadedVariant {
    pub program_id: u32,
    pub bandwidth: u64,
    pub url: Url,
    pub playlist: MediaPlaylist,
}

impl VariantStream {
    pub fn new(id: VariantId, loaded: LoadedVariant) -> Self {
        let LoadedVariant {
            program_id,
            bandwidth,
            url,
            playlist,
        } = loaded;
        Self {
            id,
            program_id,
            bandwidth,
            version: playlist.version,
            url,
            state: Mutex::new(VariantState {
                target_duration: playlist.target_duration,
                media_sequence: playlist.media_sequence,
                allow_cache: playlist.allow_cache,
                ended: playlist.ended,
                segments: playlist
                    .segments
                    .into_iter()
                    .map(|s| Arc::new(Segment::from_media(s)))
                    .collect(),
            }),
        }
    }

    pub fn id(&self) -> VariantId {
        self.id
    }

    pub fn program_id(&self) -> u32 {
        self.program_id
    }

    /// Declared bandwidth in bits per second.
    pub fn bandwidth(&self) -> u64 {
        self.bandwidth
    }

    /// URL of this variant's media playlist.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Lock the variant.
    pub fn lock(&self) -> MutexGuard<'_, VariantState> {
        self.state.lock()
    }

    pub fn segment(&self, index: usize) -> Option<Arc<Segment>> {
        self.state.lock().segments.get(index).cloned()
    }

    /// Drop every downloaded payload from segment `from` onward. Returns how
    /// many were released.
    pub fn release_from(&self, from: usize) -> usize {
        let segments: Vec<_> = self.state.lock().segments.iter().skip(from).cloned().collect();
        let mut released = 0;
        for s in segments {
            if s.is_materialized() {
                s.release();
                released += 1;
            }
        }
        released
    }

    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    pub fn target_duration(&self) -> u32 {
        self.state.lock().target_duration
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    pub fn is_live(&self) -> bool {
        !self.is_ended()
    }

    pub fn allow_cache(&self) -> bool {
        self.state.lock().allow_cache
    }

    /// Estimated byte size of the whole variant: `Σ duration × bandwidth / 8`.
    pub fn size_estimate(&self) -> u64 {
        let bytes_per_sec = self.bandwidth / 8;
        self.state
            .lock()
            .segments
            .iter()
            .map(|s| u64::from(s.duration()) * bytes_per_sec)
            .sum()
    }

    /// Snapshot the variant as a plain media playlist. The media sequence is
    /// that of the first segment still listed.
    pub fn to_media_playlist(&self) -> MediaPlaylist {
        let st = self.state.lock();
        MediaPlaylist {
            version: self.version,
            target_duration: st.target_duration,
            media_sequence: st
                .segments
                .first()
                .map_or(st.media_sequence, |s| s.sequence()),
            allow_cache: st.allow_cache,
            ended: st.ended,
            segments: st
                .segments
                .iter()
                .map(|s| {
                    let seg = s.lock();
                    MediaSegment {
                        sequence: s.sequence(),
                        duration: seg.duration,
                        url: seg.url.clone(),
                    }
                })
                .collect(),
        }
    }
}
