//! Segment store: the session-wide owner of all variants and segments, and
//! the reload merge that folds a refreshed playlist into it.
//!
//! Lock order is store → variant → segment. Nothing here awaits or performs
//! I/O while holding a lock.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::model::{LoadedVariant, Segment, VariantId, VariantStream};
use crate::parser::MediaPlaylist;

/// Outcome of merging one refreshed playlist into a variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Segments appended at the end.
    pub appended: usize,
    /// Known sequence numbers whose duration or URI changed.
    pub replaced: usize,
    /// Appends that skipped over missing sequence numbers.
    pub gaps: usize,
    /// Unknown segments older than the last known one; dropped.
    pub stale: usize,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.appended == 0 && self.replaced == 0
    }

    fn absorb(&mut self, other: MergeReport) {
        self.appended += other.appended;
        self.replaced += other.replaced;
        self.gaps += other.gaps;
        self.stale += other.stale;
    }
}

impl VariantStream {
    /// Fold a refreshed copy of this variant's playlist into the live list.
    ///
    /// Known sequences keep their downloaded payload; if their duration or
    /// URI changed the new values replace the old ones in place. Unknown
    /// sequences after the last known one are appended. The segment list stays
    /// strictly ordered by sequence.
    pub fn merge(&self, incoming: MediaPlaylist) -> MergeReport {
        let mut report = MergeReport::default();
        let mut st = self.lock();

        for seg in incoming.segments {
            let found = st
                .segments
                .binary_search_by_key(&seg.sequence, |s| s.sequence())
                .ok()
                .map(|i| Arc::clone(&st.segments[i]));

            if let Some(existing) = found {
                let mut cur = existing.lock();
                if cur.duration != seg.duration || cur.url != seg.url {
                    warn!(
                        variant = self.id().0,
                        sequence = seg.sequence,
                        old_duration = cur.duration,
                        new_duration = seg.duration,
                        old_url = %cur.url,
                        new_url = %seg.url,
                        "existing segment changed on reload"
                    );
                    cur.duration = seg.duration;
                    cur.url = seg.url;
                    report.replaced += 1;
                }
                continue;
            }

            match st.segments.last().map(|s| s.sequence()) {
                Some(last) if seg.sequence <= last => {
                    error!(
                        variant = self.id().0,
                        sequence = seg.sequence,
                        last,
                        "unknown segment older than the playlist tail, dropping"
                    );
                    report.stale += 1;
                    continue;
                }
                Some(last) if seg.sequence != last + 1 => {
                    warn!(
                        variant = self.id().0,
                        expected = last + 1,
                        got = seg.sequence,
                        "gap in sequence numbers"
                    );
                    report.gaps += 1;
                }
                _ => {}
            }

            st.segments.push(Arc::new(Segment::from_media(seg)));
            report.appended += 1;
        }

        st.target_duration = incoming.target_duration;
        st.media_sequence = incoming.media_sequence;
        st.allow_cache = incoming.allow_cache;
        st.ended = incoming.ended;

        debug!(
            variant = self.id().0,
            appended = report.appended,
            replaced = report.replaced,
            total = st.segments.len(),
            ended = st.ended,
            "merged playlist"
        );
        report
    }
}

/// Every variant of a session.
#[derive(Debug, Default)]
pub struct SegmentStore {
    variants: RwLock<Vec<Arc<VariantStream>>>,
}

impl SegmentStore {
    /// Build a store; variant ids are assigned from list order.
    pub fn new(loaded: Vec<LoadedVariant>) -> Self {
        let variants = loaded
            .into_iter()
            .enumerate()
            .map(|(i, v)| Arc::new(VariantStream::new(VariantId(i), v)))
            .collect();
        Self {
            variants: RwLock::new(variants),
        }
    }

    pub fn len(&self) -> usize {
        self.variants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<VariantStream>> {
        self.variants.read().get(index).cloned()
    }

    /// Snapshot of all variants in store order.
    pub fn variants(&self) -> Vec<Arc<VariantStream>> {
        self.variants.read().clone()
    }

    /// Returns true once every variant has seen its end-of-list marker.
    pub fn all_ended(&self) -> bool {
        self.variants.read().iter().all(|v| v.is_ended())
    }

    /// Merge a freshly loaded set of variants into the store.
    ///
    /// Variants are matched on `(program_id, bandwidth)`. Unmatched variants are
    /// appended with new ids.
    pub fn merge_streams(&self, incoming: Vec<LoadedVariant>) -> MergeReport {
        let mut total = MergeReport::default();
        let mut variants = self.variants.write();

        for loaded in incoming {
            let existing = variants
                .iter()
                .find(|v| v.program_id() == loaded.program_id && v.bandwidth() == loaded.bandwidth)
                .cloned();
            match existing {
                Some(v) => total.absorb(v.merge(loaded.playlist)),
                None => {
                    let id = VariantId(variants.len());
                    warn!(
                        id = id.0,
                        program_id = loaded.program_id,
                        bandwidth = loaded.bandwidth,
                        "new variant appeared on reload"
                    );
                    total.appended += loaded.playlist.segments.len();
                    variants.push(Arc::new(VariantStream::new(id, loaded)));
                }
            }
        }
        total
    }
}
