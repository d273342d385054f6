//! HLS segmented-playlist stream filter.
//!
//! Opens an HTTP Live Streaming playlist and exposes the concatenated segment
//! payloads as one blocking, seekable byte stream. Live playlists are reloaded
//! in the background; meta playlists with several variants switch variant
//! based on measured throughput.
//!
//! The crate is composed of several modules:
//! - `parser`: M3U8 playlist parsing into meta and media playlist values.
//! - `model`: Variant streams and segments as held by a running session.
//! - `store`: The ordered set of variants and the live merge rules.
//! - `downloader`: Retrying, cancellable fetches over a pluggable byte source.
//! - `loader`: Fetching a top-level playlist plus every variant it lists.
//! - `abr`: Throughput estimation and variant selection.
//! - `worker`: Download and reload coordinators.
//! - `stream`: `HlsStream`, the session and its playback cursor.
//! - `events`: Broadcast session events.
//! - `settings`, `error`: Configuration and unified error types.
//!
//! This file acts as a facade: it re-exports the main types and functions
//! from the internal modules to form the public API.
//!
//! ```no_run
//! use std::io::Read;
//!
//! use hls_stream_filter::{HlsSettings, HlsStream};
//!
//! let mut stream = HlsStream::open("http://example.com/live.m3u8", HlsSettings::default())?;
//! let mut buf = [0u8; 4096];
//! let n = stream.read(&mut buf)?;
//! # Ok::<(), hls_stream_filter::HlsError>(())
//! ```

mod abr;
mod downloader;
mod error;
mod events;
mod loader;
mod model;
mod parser;
mod settings;
mod store;
mod stream;
mod worker;

pub use crate::abr::{BandwidthEstimator, adapt, select_variant};
pub use crate::downloader::{HttpSource, RemoteReader, RemoteSource, ResourceDownloader};
pub use crate::error::{HlsError, HlsResult};
pub use crate::events::StreamEvent;
pub use crate::loader::{LoadedPlaylist, load, load_from_bytes};
pub use crate::model::{
    LoadedVariant, Segment, SegmentPayload, SegmentState, VariantId, VariantState, VariantStream,
};
pub use crate::parser::{
    MediaPlaylist, MediaSegment, MetaPlaylist, PROBE_LEN, Playlist, VariantEntry, looks_like_hls,
    parse_media_playlist, parse_playlist, render_media_playlist, resolve_uri,
};
pub use crate::settings::HlsSettings;
pub use crate::store::{MergeReport, SegmentStore};
pub use crate::stream::HlsStream;

pub use bytes::Bytes;
pub use url::Url;
