//! Configuration for an HLS stream-filter session.
//!
//! One flat structure covers every tunable of the engine:
//! - HTTP fetch behavior (timeouts, retries, backoff)
//! - sliding-window and seek thresholds of the download coordinator
//! - live start position and live failure handling
//! - bandwidth adaptation
//!
//! The defaults reproduce the classic behavior of the filter: a window of six
//! segments, three segments of seek headroom and a live start three target
//! durations behind the edge.

use std::time::Duration;

/// Settings for an HLS stream-filter session.
#[derive(Clone, Debug)]
pub struct HlsSettings {
    // ----------------------------
    // HTTP fetch
    // ----------------------------
    /// Timeout for establishing a request and for each idle gap while reading a body.
    /// Default: 30 seconds.
    pub request_timeout: Duration,

    /// Maximum number of retry attempts for failed requests.
    /// Default: 3 retries.
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries.
    /// Default: 100ms.
    pub retry_base_delay: Duration,

    /// Maximum backoff delay (cap for exponential growth).
    /// Default: 5 seconds.
    pub max_retry_delay: Duration,

    /// User agent sent with every request.
    pub user_agent: String,

    // ----------------------------
    // Download window
    // ----------------------------
    /// How far the download index may run ahead of playback, in segments.
    /// Default: 6.
    pub window_segments: usize,

    /// Segments that must be materialized ahead of playback after a seek.
    /// Default: 3.
    pub seek_prefetch_segments: usize,

    /// Segments downloaded synchronously before the session is handed out.
    /// Default: 2.
    pub prefetch_segments: usize,

    // ----------------------------
    // Live behavior
    // ----------------------------
    /// Segments at the live edge that may never be seek targets; seeking is
    /// refused once the downloader is this close to the end.
    /// Default: 3.
    pub live_edge_segments: usize,

    /// Distance (in target durations) from the live edge where playback starts.
    /// Default: 3.
    pub live_start_target_multiple: u32,

    /// Optional override for how often live playlists are refreshed.
    /// If not set, `#EXT-X-TARGETDURATION` of the downloading variant is used.
    pub live_refresh_interval: Option<Duration>,

    /// Download cycles a single live segment may fail before it is skipped.
    /// Default: 3.
    pub live_segment_max_attempts: u32,

    // ----------------------------
    // Bandwidth adaptation
    // ----------------------------
    /// Enables switching variants based on measured throughput.
    /// Default: true.
    pub abr_enabled: bool,

    /// Bandwidth (bits/s) assumed for a plain media playlist with no declared bandwidth.
    /// Default: 1 000 000.
    pub default_bandwidth: u64,

    // ----------------------------
    // Runtime
    // ----------------------------
    /// Worker threads of the session's I/O runtime.
    /// Default: 2.
    pub io_threads: usize,

    /// Capacity of the broadcast channel carrying [`crate::StreamEvent`]s.
    /// Default: 64.
    pub event_channel_capacity: usize,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(5),
            user_agent: concat!("hls-stream-filter/", env!("CARGO_PKG_VERSION")).to_string(),

            window_segments: 6,
            seek_prefetch_segments: 3,
            prefetch_segments: 2,

            live_edge_segments: 3,
            live_start_target_multiple: 3,
            live_refresh_interval: None,
            live_segment_max_attempts: 3,

            abr_enabled: true,
            default_bandwidth: 1_000_000,

            io_threads: 2,
            event_channel_capacity: 64,
        }
    }
}

impl HlsSettings {
    // -------------------------
    // Constructors
    // -------------------------

    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings tuned for mobile networks.
    /// - Shorter timeouts
    /// - More aggressive retries
    pub fn mobile(mut self) -> Self {
        self.request_timeout = Duration::from_secs(15);
        self.max_retries = 5;
        self.retry_base_delay = Duration::from_millis(50);
        self.max_retry_delay = Duration::from_secs(3);
        self
    }

    /// Settings tuned for low-latency live streaming.
    /// - Shorter timeouts
    /// - Fewer retries
    /// - Playback starts closer to the live edge
    pub fn low_latency(mut self) -> Self {
        self.request_timeout = Duration::from_secs(5);
        self.max_retries = 1;
        self.retry_base_delay = Duration::from_millis(50);
        self.max_retry_delay = Duration::from_millis(500);
        self.live_start_target_multiple = 2;
        self
    }

    // -------------------------
    // HTTP setters
    // -------------------------

    pub fn request_timeout(mut self, v: Duration) -> Self {
        self.request_timeout = v;
        self
    }

    pub fn max_retries(mut self, v: u32) -> Self {
        self.max_retries = v;
        self
    }

    pub fn retry_base_delay(mut self, v: Duration) -> Self {
        self.retry_base_delay = v;
        self
    }

    pub fn max_retry_delay(mut self, v: Duration) -> Self {
        self.max_retry_delay = v;
        self
    }

    pub fn user_agent(mut self, v: impl Into<String>) -> Self {
        self.user_agent = v.into();
        self
    }

    // -------------------------
    // Window setters
    // -------------------------

    pub fn window_segments(mut self, v: usize) -> Self {
        self.window_segments = v.max(1);
        self
    }

    pub fn seek_prefetch_segments(mut self, v: usize) -> Self {
        self.seek_prefetch_segments = v;
        self
    }

    pub fn prefetch_segments(mut self, v: usize) -> Self {
        self.prefetch_segments = v.max(1);
        self
    }

    // -------------------------
    // Live setters
    // -------------------------

    pub fn live_edge_segments(mut self, v: usize) -> Self {
        self.live_edge_segments = v;
        self
    }

    pub fn live_start_target_multiple(mut self, v: u32) -> Self {
        self.live_start_target_multiple = v;
        self
    }

    pub fn live_refresh_interval(mut self, v: Option<Duration>) -> Self {
        self.live_refresh_interval = v;
        self
    }

    pub fn live_segment_max_attempts(mut self, v: u32) -> Self {
        self.live_segment_max_attempts = v.max(1);
        self
    }

    // -------------------------
    // ABR / runtime setters
    // -------------------------

    pub fn abr_enabled(mut self, v: bool) -> Self {
        self.abr_enabled = v;
        self
    }

    pub fn default_bandwidth(mut self, v: u64) -> Self {
        self.default_bandwidth = v.max(1);
        self
    }

    pub fn io_threads(mut self, v: usize) -> Self {
        self.io_threads = v.max(1);
        self
    }

    pub fn event_channel_capacity(mut self, v: usize) -> Self {
        self.event_channel_capacity = v.max(1);
        self
    }
}
