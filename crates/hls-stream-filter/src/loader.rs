//! Fetch a top-level playlist and, for meta playlists, every variant it lists.

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::downloader::ResourceDownloader;
use crate::error::{HlsError, HlsResult};
use crate::model::LoadedVariant;
use crate::parser::{Playlist, parse_media_playlist, parse_playlist};

/// Variants of a fully loaded playlist.
#[derive(Debug, Clone)]
pub struct LoadedPlaylist {
    /// The top-level document listed variants.
    pub meta: bool,
    pub variants: Vec<LoadedVariant>,
}

/// Fetch and load `url`.
pub async fn load(
    downloader: &ResourceDownloader,
    url: &Url,
    default_bandwidth: u64,
) -> HlsResult<LoadedPlaylist> {
    let body = downloader
        .download_playlist(url)
        .await
        .map_err(|e| e.with_context("fetching playlist"))?;
    load_from_bytes(downloader, url, &body, default_bandwidth).await
}

/// Load an already fetched top-level document.
///
/// A plain media playlist becomes a single variant with program id 0 and
/// `default_bandwidth`. For a meta playlist every variant playlist is fetched;
/// a variant that fails to load is skipped unless it is encrypted or the
/// session is being torn down.
#[instrument(skip(downloader, body), fields(url = %url))]
pub async fn load_from_bytes(
    downloader: &ResourceDownloader,
    url: &Url,
    body: &Bytes,
    default_bandwidth: u64,
) -> HlsResult<LoadedPlaylist> {
    let meta = match parse_playlist(body, url)? {
        Playlist::Media(playlist) => {
            return Ok(LoadedPlaylist {
                meta: false,
                variants: vec![LoadedVariant {
                    program_id: 0,
                    bandwidth: default_bandwidth,
                    url: url.clone(),
                    playlist,
                }],
            });
        }
        Playlist::Meta(meta) => meta,
    };

    let mut variants = Vec::with_capacity(meta.entries.len());
    for entry in meta.entries {
        let loaded = async {
            let body = downloader.download_playlist(&entry.url).await?;
            parse_media_playlist(&body, &entry.url)
        }
        .await;

        match loaded {
            Ok(playlist) => {
                debug!(
                    program_id = entry.program_id,
                    bandwidth = entry.bandwidth,
                    segments = playlist.segments.len(),
                    "loaded variant"
                );
                variants.push(LoadedVariant {
                    program_id: entry.program_id,
                    bandwidth: entry.bandwidth,
                    url: entry.url,
                    playlist,
                });
            }
            Err(e) if e.is_cancelled() || e.is_unsupported() => return Err(e),
            Err(e) => warn!(
                url = %entry.url,
                bandwidth = entry.bandwidth,
                error = %e,
                "skipping variant that failed to load"
            ),
        }
    }

    if variants.is_empty() {
        return Err(HlsError::NoVariants);
    }
    info!(variants = variants.len(), "loaded meta playlist");
    Ok(LoadedPlaylist {
        meta: true,
        variants,
    })
}
