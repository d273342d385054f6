//! HLS integration tests against a local fixture server.
//!
//! Covers:
//! - meta playlist discovery (variant count, PROGRAM-ID handling)
//! - on-demand byte stream contents and size estimate
//! - bandwidth switching driven by fixture latency
//! - segment-granular seeking
//! - live reloads, end of a live stream, reload events
//! - failure modes: missing segments, encrypted or non-HLS playlists
//!
//! All tests use an in-memory fixture server (no external network). Sessions
//! run their own runtime, so they are opened outside `SERVER_RT.block_on`.

use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use hls_stream_filter::{HlsError, HlsSettings, HlsStream, StreamEvent, VariantId};
use rstest::rstest;
use tokio::sync::broadcast::error::RecvError;
use url::Url;

mod hls_fixture;
mod setup;

use hls_fixture::HlsFixture;

fn start(fixture: &HlsFixture) -> Url {
    setup::SERVER_RT.block_on(fixture.start())
}

fn settings() -> HlsSettings {
    HlsSettings::default()
        .max_retries(0)
        .retry_base_delay(Duration::from_millis(1))
        .max_retry_delay(Duration::from_millis(20))
        .request_timeout(Duration::from_secs(5))
}

fn open(base: &Url, path: &str, settings: HlsSettings) -> Result<HlsStream, HlsError> {
    HlsStream::open(base.join(path).unwrap().as_str(), settings)
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
fn master_playlist_exposes_every_variant(#[case] variant_count: usize) {
    let fixture = HlsFixture::new(variant_count, 2);
    let base = start(&fixture);

    let stream = open(&base, "master.m3u8", settings().abr_enabled(false)).unwrap();
    assert!(stream.is_meta());
    assert!(!stream.is_live());
    assert_eq!(stream.variant_count(), variant_count);
    for v in 0..variant_count {
        assert_eq!(fixture.request_count_for(&format!("/v{v}.m3u8")), 1);
    }
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(8)]
fn on_demand_stream_yields_every_segment_in_order(#[case] segments: usize) {
    let fixture = HlsFixture::new(1, segments);
    let base = start(&fixture);

    let mut stream = open(&base, "v0.m3u8", settings()).unwrap();
    assert!(!stream.is_meta());
    assert_eq!(stream.size(), segments as u64 * 1_000_000 / 8);

    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    assert_eq!(out, fixture.expected_bytes(0));
    assert_eq!(stream.position(), out.len() as u64);
    for n in 0..segments {
        assert_eq!(fixture.request_count_for(&format!("/seg/v0_{n}.bin")), 1);
    }
}

#[rstest]
#[case(false, 0)]
#[case(true, 1)]
fn bandwidth_adaptation_picks_best_fitting_variant(
    #[case] abr_enabled: bool,
    #[case] expected_variant: usize,
) {
    let fixture = HlsFixture::new(2, 4)
        .with_segment_size(64 * 1024)
        .with_slow_v0_segment_delay(Duration::from_millis(20));
    let base = start(&fixture);

    let mut stream = open(&base, "master.m3u8", settings().abr_enabled(abr_enabled)).unwrap();
    assert_eq!(stream.current_variant(), VariantId(expected_variant));

    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    assert_eq!(out.len(), fixture.expected_bytes(expected_variant).len());
    assert!(out == fixture.expected_bytes(expected_variant));
}

#[test]
fn seek_restarts_at_segment_boundary() {
    let fixture = HlsFixture::new(1, 6);
    let base = start(&fixture);
    let per_segment = 1_000_000 / 8;

    let mut stream = open(&base, "v0.m3u8", settings()).unwrap();
    assert!(stream.can_seek());

    let target = 3 * per_segment + 10;
    assert_eq!(stream.seek(SeekFrom::Start(target)).unwrap(), target);
    assert_eq!(stream.position(), target);

    let want = fixture.segment_payload(0, 3);
    let mut buf = vec![0u8; want.len()];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(buf, want);

    stream.seek(SeekFrom::Current(-(target as i64))).unwrap();
    let want = fixture.segment_payload(0, 0);
    let mut buf = vec![0u8; want.len()];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(buf, want);
}

#[test]
fn live_stream_follows_appended_segments_until_end() {
    let fixture = HlsFixture::live(3);
    let base = start(&fixture);
    let settings = settings().live_refresh_interval(Some(Duration::from_millis(50)));

    let mut stream = open(&base, "v0.m3u8", settings).unwrap();
    assert!(stream.is_live());
    assert_eq!(stream.size(), 0);
    assert!(!stream.can_seek());

    let first = fixture.expected_bytes(0);
    let mut buf = vec![0u8; first.len()];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(buf, first);

    fixture.append_live_segment();
    fixture.append_live_segment();
    let mut want = fixture.segment_payload(0, 103).to_vec();
    want.extend_from_slice(&fixture.segment_payload(0, 104));
    let mut buf = vec![0u8; want.len()];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(buf, want);
    assert!(fixture.request_count_for("/v0.m3u8") >= 2);

    fixture.end_live();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
    assert!(!stream.is_live());
}

#[test]
fn live_reload_reports_appended_segments() {
    let fixture = HlsFixture::live(3);
    let base = start(&fixture);
    let settings = settings().live_refresh_interval(Some(Duration::from_millis(20)));

    let stream = open(&base, "v0.m3u8", settings).unwrap();
    let mut rx = stream.subscribe();
    fixture.append_live_segment();

    let mut appended = 0;
    for _ in 0..200 {
        match rx.blocking_recv() {
            Ok(StreamEvent::PlaylistReloaded { appended: n, .. }) if n > 0 => {
                appended = n;
                break;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(e) => panic!("event channel closed: {e}"),
        }
    }
    assert_eq!(appended, 1);
}

#[test]
fn missing_segment_ends_on_demand_stream() {
    let fixture = HlsFixture::new(1, 5);
    fixture.remove("seg/v0_3.bin");
    let base = start(&fixture);

    let mut stream = open(&base, "v0.m3u8", settings()).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();

    let played: Vec<u8> = (0..3)
        .flat_map(|n| fixture.segment_payload(0, n).to_vec())
        .collect();
    assert!(played.starts_with(&out));
    assert_eq!(fixture.request_count_for("/seg/v0_4.bin"), 0);
}

#[test]
fn encrypted_playlist_is_rejected() {
    let fixture = HlsFixture::new(1, 1);
    fixture.put(
        "enc.m3u8",
        "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n#EXTINF:10,\nseg/v0_0.bin\n#EXT-X-ENDLIST\n",
    );
    let base = start(&fixture);

    let err = open(&base, "enc.m3u8", settings()).unwrap_err();
    assert!(err.is_unsupported(), "{err}");
    assert_eq!(fixture.request_count_for("/seg/v0_0.bin"), 0);
}

#[rstest]
#[case("index.html", "invalid playlist")]
#[case("missing.m3u8", "404")]
fn unusable_top_level_resource_fails_open(#[case] path: &str, #[case] needle: &str) {
    let fixture = HlsFixture::new(1, 1);
    fixture.put("index.html", "<html><body>nope</body></html>");
    let base = start(&fixture);

    let err = open(&base, path, settings()).unwrap_err();
    assert!(err.to_string().contains(needle), "{err}");
}
