use std::error::Error;
use std::fs::File;
use std::io::{self, Write};

use hls_stream_filter::{HlsSettings, HlsStream, StreamEvent};
use tracing::{info, metadata::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("hls_stream_filter=info".parse()?)
                .add_directive(LevelFilter::WARN.into()),
        )
        .with_writer(io::stderr)
        .with_line_number(false)
        .with_file(false)
        .init();

    // Args:
    // 1) playlist URL
    // 2) optional output file (default: stdout)
    // 3) optional byte limit, useful for live streams (default: unlimited)
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://streams.radiomast.io/ref-128k-mp3-stereo/hls.m3u8".to_string());
    let output = std::env::args().nth(2);
    let limit: Option<u64> = std::env::args().nth(3).and_then(|s| s.parse().ok());

    let mut stream = HlsStream::open(&url, HlsSettings::default())?;
    info!(
        url = %url,
        variants = stream.variant_count(),
        live = stream.is_live(),
        size = stream.size(),
        "session open"
    );

    let mut events = stream.subscribe();
    std::thread::spawn(move || {
        while let Ok(event) = events.blocking_recv() {
            match event {
                StreamEvent::VariantChanged { from, to, bandwidth } => {
                    info!(from = from.0, to = to.0, bandwidth, "variant changed")
                }
                StreamEvent::PlaylistReloaded { appended, replaced } => {
                    info!(appended, replaced, "playlist reloaded")
                }
                StreamEvent::ReloadFailed { attempt, error } => {
                    warn!(attempt, error = %error, "reload failed")
                }
                StreamEvent::Error { error } => warn!(error = %error, "session error"),
                _ => {}
            }
        }
    });

    let mut sink: Box<dyn Write> = match output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };
    let copied = match limit {
        Some(n) => io::copy(&mut io::Read::take(&mut stream, n), &mut sink)?,
        None => io::copy(&mut stream, &mut sink)?,
    };
    sink.flush()?;
    info!(copied, "done");

    Ok(())
}
