//! Reload coordinator for live sessions.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::Shared;
use crate::events::StreamEvent;
use crate::loader;

/// Multiple of the target duration to wait before the next reload, given the
/// number of consecutive failed reloads.
pub(crate) fn reload_backoff(failures: u32) -> f64 {
    match failures {
        0 => 1.0,
        1 => 0.5,
        2 => 1.0,
        _ => 3.0,
    }
}

#[instrument(skip(shared), name = "hls-reload")]
pub(crate) fn run(shared: Arc<Shared>) {
    info!("reload coordinator started");
    let mut failures: u32 = 0;
    let mut wait = shared.reload_interval();

    loop {
        if shared.block_on(shared.downloader.sleep(wait)).is_err() {
            break;
        }

        let reloaded = shared.block_on(loader::load(
            &shared.downloader,
            &shared.url,
            shared.settings.default_bandwidth,
        ));
        match reloaded {
            Ok(loaded) => {
                failures = 0;
                let report = shared.store.merge_streams(loaded.variants);
                debug!(
                    appended = report.appended,
                    replaced = report.replaced,
                    gaps = report.gaps,
                    stale = report.stale,
                    "playlist reloaded"
                );
                shared.events.emit(StreamEvent::PlaylistReloaded {
                    appended: report.appended,
                    replaced: report.replaced,
                });
                shared.signal();
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => {
                failures += 1;
                warn!(failures, error = %e, "failed to reload playlist");
                shared.events.emit(StreamEvent::ReloadFailed {
                    attempt: failures,
                    error: e.to_string(),
                });
            }
        }

        if shared.store.all_ended() {
            info!("playlist ended, no more reloads");
            break;
        }

        let target = shared.reload_interval();
        wait = Duration::from_secs_f64(target.as_secs_f64() * reload_backoff(failures));
        debug!(wait_ms = wait.as_millis() as u64, failures, "next reload scheduled");
    }

    debug!("reload coordinator stopped");
}
