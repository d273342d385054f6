//! Download coordinator.
//!
//! One loop with four steps:
//! 1. idle-wait while the window is full or there is nothing to fetch, unless
//!    a seek is pending or a blocked peek needs segments past the window;
//! 2. take a pending seek target;
//! 3. fetch the segment at the download index;
//! 4. advance by one (a seek that arrived meanwhile wins) and signal.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, trace, warn};

use super::Shared;

/// What the idle-wait decided.
enum Step {
    Fetch { stream: usize, index: usize },
    Exit,
}

#[instrument(skip(shared), name = "hls-download")]
pub(crate) fn run(shared: Arc<Shared>) {
    info!("download coordinator started");
    let mut failures: u32 = 0;

    loop {
        let (stream, index) = match wait_for_work(&shared) {
            Step::Fetch { stream, index } => (stream, index),
            Step::Exit => break,
        };

        let live = shared.store.get(stream).is_some_and(|v| v.is_live());
        match shared.fetch_segment(stream, index) {
            Ok(()) => failures = 0,
            Err(e) if e.is_cancelled() => break,
            Err(e) if !live => {
                error!(stream, index, error = %e, "segment download failed, stopping");
                shared.fail(&e);
                break;
            }
            Err(e) => {
                failures += 1;
                if failures < shared.settings.live_segment_max_attempts {
                    warn!(stream, index, failures, error = %e, "live segment download failed, retrying");
                    let delay = shared.settings.max_retry_delay;
                    if shared.block_on(shared.downloader.sleep(delay)).is_err() {
                        break;
                    }
                    continue;
                }
                warn!(stream, index, failures, error = %e, "giving up on live segment, skipping");
                failures = 0;
            }
        }

        advance(&shared, index);
    }

    debug!("download coordinator stopped");
}

/// Block until there is a segment to fetch, a seek to follow, or teardown.
fn wait_for_work(shared: &Shared) -> Step {
    let window = shared.settings.window_segments;
    let mut w = shared.window.lock();

    loop {
        if w.closed || shared.has_error() {
            return Step::Exit;
        }
        if let Some(target) = w.seek.take() {
            debug!(from = w.download_segment, to = target, "download follows seek");
            w.download_segment = target;
            shared.cond.notify_all();
            break;
        }

        let variant = shared.store.get(w.download_stream);
        let count = variant.as_ref().map_or(0, |v| v.segment_count());
        let ahead = w.download_segment.saturating_sub(w.playback_segment);
        let peeked = w.peek_horizon.is_some_and(|h| w.download_segment <= h);
        if (ahead <= window || peeked) && w.download_segment < count {
            break;
        }

        trace!(
            download = w.download_segment,
            playback = w.playback_segment,
            count,
            "download window idle"
        );
        match variant {
            Some(v) if v.is_live() => {
                // Reloads also signal, the timeout only covers a missed one.
                let secs = u64::from(v.target_duration().max(1));
                shared.cond.wait_for(&mut w, Duration::from_secs(secs));
            }
            _ => shared.cond.wait(&mut w),
        }
    }

    Step::Fetch {
        stream: w.download_stream,
        index: w.download_segment,
    }
}

fn advance(shared: &Shared, fetched: usize) {
    let mut w = shared.window.lock();
    if w.seek.is_none() && w.download_segment == fetched {
        let count = shared
            .store
            .get(w.download_stream)
            .map_or(0, |v| v.segment_count());
        if w.download_segment < count {
            w.download_segment += 1;
        }
    }
    shared.cond.notify_all();
}
