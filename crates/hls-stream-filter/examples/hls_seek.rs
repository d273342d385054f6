use std::error::Error;
use std::io::{Read, Seek, SeekFrom};

use hls_stream_filter::{HlsSettings, HlsStream};
use tracing::{info, metadata::LevelFilter};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::default().add_directive(LevelFilter::INFO.into()))
        .with_line_number(true)
        .with_file(true)
        .init();

    let url = std::env::args().nth(1).unwrap_or_else(|| {
        "https://test-streams.mux.dev/x36xhzz/url_0/193039199_mp4_h264_aac_hd_7.m3u8".to_string()
    });

    let mut stream = HlsStream::open(&url, HlsSettings::default())?;
    if !stream.can_seek() {
        info!("stream refuses seeking right now");
        return Ok(());
    }

    let size = stream.size();
    info!(size, live = stream.is_live(), "estimated size");

    let mut buf = vec![0u8; 188 * 4];
    for fraction in [2, 4, 1] {
        let target = size / fraction;
        let pos = stream.seek(SeekFrom::Start(target))?;
        let n = stream.read(&mut buf)?;
        info!(target, pos, read = n, head = ?&buf[..n.min(8)], "seek");
    }

    Ok(())
}
