use std::time::Duration;

use tokio::sync::broadcast;

use crate::model::VariantId;

/// Events emitted by a session (out-of-band metadata).
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// The download coordinator switched to another variant.
    VariantChanged {
        from: VariantId,
        to: VariantId,
        /// Throughput estimate (bits/s) that triggered the switch.
        bandwidth: u64,
    },
    /// A segment has been fetched and is ready for playback.
    SegmentDownloaded {
        variant_id: VariantId,
        sequence: u64,
        byte_len: u64,
        elapsed: Duration,
    },
    /// The playback cursor moved on to a new segment.
    SegmentStarted {
        variant_id: VariantId,
        sequence: u64,
        duration: Duration,
    },
    /// A live playlist was refreshed.
    PlaylistReloaded { appended: usize, replaced: usize },
    /// A live playlist refresh failed; the next one is scheduled sooner or later.
    ReloadFailed { attempt: u32, error: String },
    /// A seek landed on a new segment.
    Seeked { variant_id: VariantId, segment: usize },
    /// The download coordinator stopped after an unrecoverable error.
    Error { error: String },
}

/// Thin wrapper over the broadcast sender; sending never fails when nobody listens.
#[derive(Clone, Debug)]
pub(crate) struct EventSink {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventSink {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn emit(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }
}
