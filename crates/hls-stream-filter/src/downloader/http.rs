use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::Client;
use tracing::trace;
use url::Url;

use super::{RemoteReader, RemoteSource};
use crate::error::{HlsError, HlsResult};
use crate::settings::HlsSettings;

/// [`RemoteSource`] over HTTP(S) using a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    /// Build a client configured from `settings`.
    pub fn new(settings: &HlsSettings) -> HlsResult<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.request_timeout)
            .build()
            .map_err(|e| HlsError::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    /// Use an existing client (shared connection pool, custom TLS, proxies).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(url: &Url, e: reqwest::Error) -> HlsError {
    if e.is_timeout() {
        HlsError::timeout(url.as_str())
    } else if let Some(status) = e.status() {
        HlsError::HttpError {
            status: status.as_u16(),
            url: url.to_string(),
        }
    } else {
        HlsError::Io(std::io::Error::other(e))
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn open(&self, url: &Url) -> HlsResult<Box<dyn RemoteReader>> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(HlsError::HttpError {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        trace!(url = %url, content_length = ?resp.content_length(), "opened");
        let size = resp.content_length();
        let body_url = url.clone();
        let body = resp
            .bytes_stream()
            .map(move |r| r.map_err(|e| map_reqwest_error(&body_url, e)))
            .boxed();
        Ok(Box::new(HttpReader {
            size,
            body,
            pending: Bytes::new(),
        }))
    }
}

struct HttpReader {
    size: Option<u64>,
    body: BoxStream<'static, HlsResult<Bytes>>,
    pending: Bytes,
}

#[async_trait]
impl RemoteReader for HttpReader {
    fn size(&self) -> Option<u64> {
        self.size
    }

    async fn read(&mut self, buf: &mut [u8]) -> HlsResult<usize> {
        while self.pending.is_empty() {
            match self.body.next().await {
                Some(chunk) => self.pending = chunk?,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}
