use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Path;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use bytes::Bytes;
use parking_lot::Mutex;
use url::Url;

/// Segment window of every variant playlist.
#[derive(Clone, Copy, Debug)]
struct Timeline {
    /// Index (and media sequence) of the first listed segment.
    first: usize,
    count: usize,
    ended: bool,
}

/// Minimal in-memory HLS fixture server used by integration tests.
///
/// Payloads are plain text, optionally padded, so tests can check exactly
/// which variant and segment every byte came from.
///
/// Paths served under base (all generated in-memory):
/// - `/master.m3u8` listing every variant with `PROGRAM-ID=1`
/// - `/v{idx}.m3u8` for each variant
/// - `/seg/v{idx}_{n}.bin` media segments
/// - `/{path}` catch-all for anything put with [`HlsFixture::put`]
///
/// Notes:
/// - Optional delay can be injected for v0 media segment responses.
/// - Live fixtures omit `#EXT-X-ENDLIST` until [`HlsFixture::end_live`] and
///   grow through [`HlsFixture::append_live_segment`].
/// - Request counters are tracked per-path (including 404s).
#[derive(Clone)]
pub struct HlsFixture {
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
    timeline: Arc<Mutex<Timeline>>,
    variant_count: usize,
    segment_size: usize,
    slow_v0_segment_delay: Duration,
    request_counts: Arc<Mutex<HashMap<String, u64>>>,
}

impl HlsFixture {
    /// On-demand fixture with `variant_count` variants of `segments` segments each.
    pub fn new(variant_count: usize, segments: usize) -> Self {
        let fixture = Self {
            blobs: Arc::new(Mutex::new(HashMap::new())),
            timeline: Arc::new(Mutex::new(Timeline {
                first: 0,
                count: segments,
                ended: true,
            })),
            variant_count,
            segment_size: 0,
            slow_v0_segment_delay: Duration::ZERO,
            request_counts: Arc::new(Mutex::new(HashMap::new())),
        };
        fixture.rebuild();
        fixture
    }

    /// Single-variant live fixture whose first listed segment has media sequence 100.
    pub fn live(segments: usize) -> Self {
        let fixture = Self::new(1, segments);
        *fixture.timeline.lock() = Timeline {
            first: 100,
            count: segments,
            ended: false,
        };
        fixture.rebuild();
        fixture
    }

    /// Pad every segment payload to at least `size` bytes.
    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self.blobs.lock().retain(|k, _| !k.starts_with("seg/"));
        self.rebuild();
        self
    }

    pub fn with_slow_v0_segment_delay(mut self, d: Duration) -> Self {
        self.slow_v0_segment_delay = d;
        self
    }

    /// Bandwidth advertised for variant `v`.
    pub fn bandwidth(v: usize) -> u64 {
        match v {
            0 => 128_000,
            1 => 2_560_000,
            _ => 2_560_000 + (v as u64 * 640_000),
        }
    }

    /// Payload of segment `n` of variant `v`.
    pub fn segment_payload(&self, v: usize, n: usize) -> Bytes {
        let mut body = format!("V{v}-SEG-{n}|").into_bytes();
        if body.len() < self.segment_size {
            body.resize(self.segment_size, b'.');
        }
        Bytes::from(body)
    }

    /// Concatenation of every listed segment of variant `v`.
    pub fn expected_bytes(&self, v: usize) -> Vec<u8> {
        let t = *self.timeline.lock();
        (t.first..t.first + t.count)
            .flat_map(|n| self.segment_payload(v, n).to_vec())
            .collect()
    }

    /// Publish one more segment on every variant playlist.
    pub fn append_live_segment(&self) {
        self.timeline.lock().count += 1;
        self.rebuild();
    }

    /// Publish `#EXT-X-ENDLIST`.
    pub fn end_live(&self) {
        self.timeline.lock().ended = true;
        self.rebuild();
    }

    pub fn put(&self, path: &str, body: impl Into<Bytes>) {
        self.blobs.lock().insert(path.to_string(), body.into());
    }

    pub fn remove(&self, path: &str) {
        self.blobs.lock().remove(path);
    }

    /// Number of requests seen for `path` (with leading `/`).
    pub fn request_count_for(&self, path: &str) -> u64 {
        self.request_counts.lock().get(path).copied().unwrap_or(0)
    }

    /// Start the fixture server and return the base URL (ending with `/`).
    ///
    /// - bind a `std::net::TcpListener` on `127.0.0.1:0`,
    /// - mark it non-blocking,
    /// - hand it off to `tokio::net::TcpListener::from_std`,
    /// - spawn `axum::serve` in the background.
    pub async fn start(&self) -> Url {
        let app = self.build_router();

        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .expect("failed to bind local fixture server");
        listener
            .set_nonblocking(true)
            .expect("failed to set nonblocking on fixture listener");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener)
                .expect("failed to convert fixture listener to tokio listener");
            axum::serve(listener, app).await.unwrap();
        });

        Url::parse(&format!("http://{}/", addr)).expect("failed to build base url")
    }

    fn build_router(&self) -> Router {
        let blobs = self.blobs.clone();
        let slow_v0_segment_delay = self.slow_v0_segment_delay;
        let request_counts = self.request_counts.clone();

        async fn serve_blob(
            key: String,
            blobs: Arc<Mutex<HashMap<String, Bytes>>>,
            slow_v0_segment_delay: Duration,
            request_counts: Arc<Mutex<HashMap<String, u64>>>,
        ) -> impl IntoResponse {
            let req_path = format!("/{key}");
            tracing::trace!(path = %req_path, "fixture request");
            *request_counts.lock().entry(req_path).or_insert(0) += 1;

            if slow_v0_segment_delay != Duration::ZERO && key.starts_with("seg/v0_") {
                tokio::time::sleep(slow_v0_segment_delay).await;
            }

            let Some(bytes) = blobs.lock().get(&key).cloned() else {
                return (StatusCode::NOT_FOUND, HeaderMap::new(), Bytes::new());
            };

            let mut headers = HeaderMap::new();
            headers.insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static(if key.ends_with(".m3u8") {
                    "application/vnd.apple.mpegurl"
                } else {
                    "application/octet-stream"
                }),
            );
            headers.insert(
                axum::http::header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache"),
            );

            (StatusCode::OK, headers, bytes)
        }

        Router::new()
            .route(
                "/seg/{name}",
                get({
                    let blobs = blobs.clone();
                    let request_counts = request_counts.clone();
                    move |Path(name): Path<String>| {
                        serve_blob(
                            format!("seg/{name}"),
                            blobs.clone(),
                            slow_v0_segment_delay,
                            request_counts.clone(),
                        )
                    }
                }),
            )
            .route(
                "/{path}",
                get({
                    let blobs = blobs.clone();
                    let request_counts = request_counts.clone();
                    move |Path(path): Path<String>| {
                        serve_blob(
                            path,
                            blobs.clone(),
                            slow_v0_segment_delay,
                            request_counts.clone(),
                        )
                    }
                }),
            )
    }

    /// Regenerate playlists and segment payloads from the current timeline.
    fn rebuild(&self) {
        let t = *self.timeline.lock();
        let mut blobs = self.blobs.lock();

        let mut master = String::from("#EXTM3U\n");
        for v in 0..self.variant_count {
            master.push_str(&format!(
                "#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH={}\nv{v}.m3u8\n",
                Self::bandwidth(v)
            ));
        }
        blobs.insert("master.m3u8".to_string(), Bytes::from(master));

        for v in 0..self.variant_count {
            let mut out = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:1\n");
            out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", t.first));
            for n in t.first..t.first + t.count {
                out.push_str(&format!("#EXTINF:1,\nseg/v{v}_{n}.bin\n"));
                blobs
                    .entry(format!("seg/v{v}_{n}.bin"))
                    .or_insert_with(|| self.segment_payload(v, n));
            }
            if t.ended {
                out.push_str("#EXT-X-ENDLIST\n");
            }
            blobs.insert(format!("v{v}.m3u8"), Bytes::from(out));
        }
    }
}
