//! In-memory [`RemoteSource`] for unit tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use url::Url;

use super::{RemoteReader, RemoteSource};
use crate::error::{HlsError, HlsResult};

#[derive(Default)]
struct Entry {
    body: Bytes,
    advertised: Option<u64>,
}

/// Serves bodies keyed by URL path (without the leading `/`).
#[derive(Default)]
pub(crate) struct MemorySource {
    entries: Mutex<HashMap<String, Entry>>,
    failures: Mutex<HashMap<String, u32>>,
    counts: Mutex<HashMap<String, u32>>,
    delay: Mutex<Option<Duration>>,
}

impl MemorySource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&self, path: &str, body: impl Into<Bytes>) {
        let body = body.into();
        let advertised = Some(body.len() as u64);
        self.entries
            .lock()
            .insert(path.to_string(), Entry { body, advertised });
    }

    /// Serve `body` while advertising `size` until reading runs past it.
    pub(crate) fn put_with_advertised_size(&self, path: &str, body: impl Into<Bytes>, size: u64) {
        self.entries.lock().insert(
            path.to_string(),
            Entry {
                body: body.into(),
                advertised: Some(size),
            },
        );
    }

    pub(crate) fn remove(&self, path: &str) {
        self.entries.lock().remove(path);
    }

    /// Fail the next `times` requests for `path` with a 503.
    pub(crate) fn fail_next(&self, path: &str, times: u32) {
        self.failures.lock().insert(path.to_string(), times);
    }

    /// Delay every open by `delay`.
    pub(crate) fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub(crate) fn request_count(&self, path: &str) -> u32 {
        self.counts.lock().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RemoteSource for MemorySource {
    async fn open(&self, url: &Url) -> HlsResult<Box<dyn RemoteReader>> {
        let path = url.path().trim_start_matches('/').to_string();
        *self.counts.lock().entry(path.clone()).or_default() += 1;

        let delay = *self.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        {
            let mut failures = self.failures.lock();
            if let Some(left) = failures.get_mut(&path) {
                if *left > 0 {
                    *left -= 1;
                    return Err(HlsError::HttpError {
                        status: 503,
                        url: url.to_string(),
                    });
                }
            }
        }

        let entries = self.entries.lock();
        let entry = entries.get(&path).ok_or_else(|| HlsError::HttpError {
            status: 404,
            url: url.to_string(),
        })?;
        Ok(Box::new(MemoryReader {
            body: entry.body.clone(),
            advertised: entry.advertised,
            pos: 0,
        }))
    }
}

struct MemoryReader {
    body: Bytes,
    advertised: Option<u64>,
    pos: usize,
}

#[async_trait]
impl RemoteReader for MemoryReader {
    fn size(&self) -> Option<u64> {
        match self.advertised {
            Some(s) if self.pos as u64 >= s => Some(self.body.len() as u64),
            other => other,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> HlsResult<usize> {
        let n = buf.len().min(self.body.len() - self.pos);
        buf[..n].copy_from_slice(&self.body[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
