//! Playlist parser module.
//!
//! Turns `.m3u8` text into the pure playlist types below. The parser is
//! tolerant: anything it can skip is logged and skipped, and only a missing
//! `#EXTM3U` marker, a broken `#EXT-X-STREAM-INF` entry or an encryption
//! method other than `NONE` fail the document.
//!
//! Parsing is split in two steps. [`parse_playlist`] tells meta (variant list)
//! documents apart from media (segment list) documents; the loader then fetches
//! every variant of a meta playlist and parses each with the same function.

use std::fmt::Write as _;

use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{HlsError, HlsResult};

const EXTM3U: &str = "#EXTM3U";

/// Number of leading bytes inspected by [`looks_like_hls`].
pub const PROBE_LEN: usize = 46;

/// Tags that identify an HLS document during probing.
const PROBE_TAGS: &[&str] = &[
    "#EXT-X-TARGETDURATION",
    "#EXT-X-MEDIA-SEQUENCE",
    "#EXT-X-KEY",
    "#EXT-X-ALLOW-CACHE",
    "#EXT-X-ENDLIST",
    "#EXT-X-STREAM-INF",
    "#EXT-X-DISCONTINUITY",
    "#EXT-X-VERSION",
];

/// A parsed top-level document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playlist {
    /// A meta playlist listing variant streams.
    Meta(MetaPlaylist),
    /// A media playlist listing segments.
    Media(MediaPlaylist),
}

/// Variant list of a meta playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaPlaylist {
    pub version: u32,
    pub entries: Vec<VariantEntry>,
}

/// One `#EXT-X-STREAM-INF` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantEntry {
    pub program_id: u32,
    /// Declared bandwidth in bits per second, always > 0.
    pub bandwidth: u64,
    /// Absolute URL of the variant's media playlist.
    pub url: Url,
}

/// Segment list of a media playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPlaylist {
    pub version: u32,
    /// `#EXT-X-TARGETDURATION` in seconds (0 when absent).
    pub target_duration: u32,
    /// `#EXT-X-MEDIA-SEQUENCE` (0 when absent).
    pub media_sequence: u64,
    pub allow_cache: bool,
    /// `#EXT-X-ENDLIST` was present.
    pub ended: bool,
    pub segments: Vec<MediaSegment>,
}

impl MediaPlaylist {
    /// A playlist without an end-of-list marker is live.
    pub fn is_live(&self) -> bool {
        !self.ended
    }
}

/// One `#EXTINF` + URI pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSegment {
    /// `media_sequence + index` within the document.
    pub sequence: u64,
    /// Duration in whole seconds.
    pub duration: u32,
    pub url: Url,
}

/// Returns true if `data` starts like an HLS playlist.
///
/// The document must begin with `#EXTM3U` and one of the well-known `#EXT-X-`
/// tags must appear within the first [`PROBE_LEN`] bytes.
pub fn looks_like_hls(data: &[u8]) -> bool {
    let data = strip_bom(data);
    if !starts_with_marker(data) {
        return false;
    }
    let head = &data[..data.len().min(PROBE_LEN)];
    PROBE_TAGS
        .iter()
        .any(|tag| head.windows(tag.len()).any(|w| w == tag.as_bytes()))
}

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

/// `#EXTM3U` in any case.
fn starts_with_marker(data: &[u8]) -> bool {
    data.get(..EXTM3U.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(EXTM3U.as_bytes()))
}

/// Parse a top-level document fetched from `base`.
///
/// Relative URIs inside the document are resolved against `base`.
pub fn parse_playlist(data: &[u8], base: &Url) -> HlsResult<Playlist> {
    let text = String::from_utf8_lossy(strip_bom(data));
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    match lines.first() {
        Some(first) if starts_with_marker(first.as_bytes()) => {}
        _ => {
            return Err(HlsError::invalid(format!(
                "missing {EXTM3U} marker in {base}"
            )));
        }
    }

    let version = prescan_version(&lines);
    if version != 1 {
        warn!(version, url = %base, "#EXT-X-VERSION should be 1");
    }

    if lines.iter().any(|l| l.starts_with("#EXT-X-STREAM-INF")) {
        parse_meta(&lines, base, version).map(Playlist::Meta)
    } else {
        parse_media(&lines, base, version).map(Playlist::Media)
    }
}

/// Parse a document that must be a media playlist.
pub fn parse_media_playlist(data: &[u8], base: &Url) -> HlsResult<MediaPlaylist> {
    match parse_playlist(data, base)? {
        Playlist::Media(m) => Ok(m),
        Playlist::Meta(_) => Err(HlsError::invalid(format!(
            "nested meta playlist at {base}"
        ))),
    }
}

fn prescan_version(lines: &[&str]) -> u32 {
    lines
        .iter()
        .find_map(|l| l.strip_prefix("#EXT-X-VERSION:"))
        .and_then(|v| match v.trim().parse::<u32>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(value = v, "unparseable #EXT-X-VERSION, assuming 1");
                None
            }
        })
        .unwrap_or(1)
}

fn parse_meta(lines: &[&str], base: &Url, version: u32) -> HlsResult<MetaPlaylist> {
    let mut entries = Vec::new();
    let mut iter = lines.iter().skip(1);

    while let Some(line) = iter.next() {
        let Some(value) = line.strip_prefix("#EXT-X-STREAM-INF") else {
            continue;
        };
        let attrs = parse_attributes(value.strip_prefix(':').unwrap_or(""));

        let program_id = attribute(&attrs, "PROGRAM-ID")
            .ok_or_else(|| HlsError::invalid("#EXT-X-STREAM-INF without PROGRAM-ID"))?
            .parse::<u32>()
            .map_err(|e| HlsError::invalid(format!("bad PROGRAM-ID: {e}")))?;
        let bandwidth = attribute(&attrs, "BANDWIDTH")
            .ok_or_else(|| HlsError::invalid("#EXT-X-STREAM-INF without BANDWIDTH"))?
            .parse::<u64>()
            .map_err(|e| HlsError::invalid(format!("bad BANDWIDTH: {e}")))?;
        if bandwidth == 0 {
            return Err(HlsError::invalid("#EXT-X-STREAM-INF with BANDWIDTH=0"));
        }

        let uri = iter
            .by_ref()
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .ok_or_else(|| HlsError::invalid("#EXT-X-STREAM-INF without variant URI"))?;
        let url = resolve_uri(base, uri)?;

        trace!(program_id, bandwidth, url = %url, "variant entry");
        entries.push(VariantEntry {
            program_id,
            bandwidth,
            url,
        });
    }

    Ok(MetaPlaylist { version, entries })
}

fn parse_media(lines: &[&str], base: &Url, version: u32) -> HlsResult<MediaPlaylist> {
    let mut playlist = MediaPlaylist {
        version,
        target_duration: 0,
        media_sequence: 0,
        allow_cache: true,
        ended: false,
        segments: Vec::new(),
    };
    let mut media_sequence_seen = false;
    let mut pending_duration: Option<u32> = None;

    for &line in lines.iter().skip(1).filter(|l| !l.is_empty()) {
        if !line.starts_with('#') {
            let duration = pending_duration.take().unwrap_or_else(|| {
                warn!(uri = line, "segment URI without #EXTINF, assuming duration 0");
                0
            });
            match resolve_uri(base, line) {
                Ok(url) => playlist.segments.push(MediaSegment {
                    sequence: 0,
                    duration,
                    url,
                }),
                Err(e) => warn!(uri = line, error = %e, "skipping segment with bad URI"),
            }
            continue;
        }

        let (tag, value) = line.split_once(':').unwrap_or((line, ""));
        match tag {
            "#EXTINF" => pending_duration = Some(parse_extinf(value, version)),
            "#EXT-X-TARGETDURATION" => match value.trim().parse::<u32>() {
                Ok(v) => playlist.target_duration = v,
                Err(_) => warn!(value, "ignoring malformed #EXT-X-TARGETDURATION"),
            },
            "#EXT-X-MEDIA-SEQUENCE" => match value.trim().parse::<u64>() {
                Ok(v) if media_sequence_seen => warn!(
                    new = v,
                    old = playlist.media_sequence,
                    "#EXT-X-MEDIA-SEQUENCE already present in playlist"
                ),
                Ok(v) => {
                    playlist.media_sequence = v;
                    media_sequence_seen = true;
                }
                Err(_) => warn!(value, "ignoring malformed #EXT-X-MEDIA-SEQUENCE"),
            },
            "#EXT-X-KEY" => check_key(value, version)?,
            "#EXT-X-PROGRAM-DATE-TIME" => debug!(value, "program date time"),
            "#EXT-X-ALLOW-CACHE" => {
                let v = value.trim();
                if v.is_empty() {
                    warn!("ignoring empty #EXT-X-ALLOW-CACHE");
                } else {
                    playlist.allow_cache = !v.to_ascii_uppercase().starts_with("NO");
                }
            }
            "#EXT-X-DISCONTINUITY" => debug!("discontinuity"),
            "#EXT-X-ENDLIST" => playlist.ended = true,
            "#EXT-X-VERSION" | "#EXTM3U" => {}
            other => trace!(tag = other, "ignoring tag"),
        }
    }

    if pending_duration.is_some() {
        warn!(url = %base, "trailing #EXTINF without segment URI");
    }

    for (i, seg) in playlist.segments.iter_mut().enumerate() {
        seg.sequence = playlist.media_sequence + i as u64;
        if playlist.target_duration > 0 && seg.duration > playlist.target_duration {
            warn!(
                sequence = seg.sequence,
                duration = seg.duration,
                target_duration = playlist.target_duration,
                "segment longer than target duration"
            );
        }
    }

    debug!(
        url = %base,
        segments = playlist.segments.len(),
        media_sequence = playlist.media_sequence,
        target_duration = playlist.target_duration,
        ended = playlist.ended,
        "parsed media playlist"
    );
    Ok(playlist)
}

/// `#EXTINF:<duration>[,<title>]`; protocol version 3 and later allows
/// fractional durations, which are rounded half up.
fn parse_extinf(value: &str, version: u32) -> u32 {
    let raw = value.split(',').next().unwrap_or("").trim();
    match raw.parse::<f64>() {
        Ok(d) if d.is_finite() && d >= 0.0 => {
            let secs = if version >= 3 { (d + 0.5).floor() } else { d.trunc() };
            secs.min(u32::MAX as f64) as u32
        }
        _ => {
            warn!(value, "malformed #EXTINF duration, assuming 0");
            0
        }
    }
}

fn check_key(value: &str, version: u32) -> HlsResult<()> {
    let attrs = parse_attributes(value);
    let Some(method) = attribute(&attrs, "METHOD") else {
        warn!(value, "#EXT-X-KEY without METHOD");
        return Ok(());
    };
    if !method.eq_ignore_ascii_case("NONE") {
        return Err(HlsError::Unsupported(format!(
            "encrypted segments (METHOD={method})"
        )));
    }
    if attribute(&attrs, "URI").is_some() {
        warn!("#EXT-X-KEY METHOD=NONE carries a URI");
    }
    if version >= 2 && attribute(&attrs, "IV").is_some() {
        warn!("#EXT-X-KEY METHOD=NONE carries an IV");
    }
    Ok(())
}

/// Split an attribute list (`KEY=value,KEY="quoted,value"`) into pairs.
///
/// Commas inside double quotes do not separate pairs. Surrounding quotes are
/// stripped from values.
pub(crate) fn parse_attributes(list: &str) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;

    for (i, c) in list.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                split_pair(&list[start..i], &mut out);
                start = i + 1;
            }
            _ => {}
        }
    }
    split_pair(&list[start..], &mut out);
    out
}

fn split_pair<'a>(piece: &'a str, out: &mut Vec<(&'a str, &'a str)>) {
    let piece = piece.trim();
    if piece.is_empty() {
        return;
    }
    match piece.split_once('=') {
        Some((k, v)) => {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(v);
            out.push((k.trim(), v));
        }
        None => trace!(attribute = piece, "attribute without value"),
    }
}

/// Case-insensitive exact key lookup.
pub(crate) fn attribute<'a>(attrs: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| *v)
}

/// Resolve a playlist URI against the URL of the playlist that contains it.
///
/// URIs carrying a scheme separator are taken as is; anything else replaces
/// the last path component of `base`.
pub fn resolve_uri(base: &Url, uri: &str) -> HlsResult<Url> {
    if uri.contains("://") {
        Ok(Url::parse(uri)?)
    } else {
        Ok(base.join(uri)?)
    }
}

/// Serialize a media playlist back to `.m3u8` text.
pub fn render_media_playlist(playlist: &MediaPlaylist) -> String {
    let mut out = String::new();
    out.push_str(EXTM3U);
    out.push('\n');
    let _ = writeln!(out, "#EXT-X-VERSION:{}", playlist.version);
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", playlist.target_duration);
    let first = playlist
        .segments
        .first()
        .map(|s| s.sequence)
        .unwrap_or(playlist.media_sequence);
    let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{first}");
    if !playlist.allow_cache {
        out.push_str("#EXT-X-ALLOW-CACHE:NO\n");
    }
    for seg in &playlist.segments {
        let _ = writeln!(out, "#EXTINF:{},", seg.duration);
        let _ = writeln!(out, "{}", seg.url);
    }
    if playlist.ended {
        out.push_str("#EXT-X-ENDLIST\n");
    }
    out
}
