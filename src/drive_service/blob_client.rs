use crate::error::{DriveError, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, RANGE};
use reqwest::{Client, Method, Response, StatusCode};
use std::time::Duration;

/// Request against the blob store. Signing adds headers before execution.
#[derive(Debug, Clone)]
pub struct BlobRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl BlobRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Replace any header with the same (case-insensitive) name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BlobResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl BlobResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sequential reader over a download response body
#[async_trait]
pub trait ByteStream: Send {
    /// Read up to `buf.len()` bytes; `Ok(0)` at end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Transport to the object store used for content reads and uploads
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn execute(&self, request: BlobRequest) -> Result<BlobResponse>;
    /// Open a content stream starting at `offset`.
    async fn open_read(&self, url: &str, offset: u64) -> Result<Box<dyn ByteStream>>;
}

/// reqwest-backed blob store
#[derive(Clone)]
pub struct HttpBlobStore {
    client: Client,
}

impl HttpBlobStore {
    pub fn new(timeout: Duration) -> Result<Self> {
        // no gzip feature enabled: ranges must address raw content bytes
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn execute(&self, request: BlobRequest) -> Result<BlobResponse> {
        debug!("{} {} ({} bytes)", request.method, request.url, request.body.len());
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.body(request.body).send().await?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?.to_vec();
        Ok(BlobResponse {
            status,
            headers,
            body,
        })
    }

    async fn open_read(&self, url: &str, offset: u64) -> Result<Box<dyn ByteStream>> {
        debug!("Opening download at offset {}", offset);
        let mut builder = self.client.get(url);
        if offset > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", offset));
        }
        let response = builder.send().await?;
        let skip = match response.status() {
            StatusCode::PARTIAL_CONTENT => 0,
            // range ignored by the server, discard the leading bytes
            StatusCode::OK => offset,
            status => {
                return Err(DriveError::Backend(format!(
                    "download returned status {}",
                    status
                )))
            }
        };
        Ok(Box::new(HttpByteStream {
            response,
            pending: Vec::new(),
            pending_pos: 0,
            skip,
        }))
    }
}

struct HttpByteStream {
    response: Response,
    pending: Vec<u8>,
    pending_pos: usize,
    skip: u64,
}

impl HttpByteStream {
    async fn fill(&mut self) -> Result<bool> {
        while self.pending_pos >= self.pending.len() {
            let chunk = match self.response.chunk().await? {
                Some(chunk) => chunk,
                None => return Ok(false),
            };
            let mut start = 0;
            if self.skip > 0 {
                let dropped = (self.skip as usize).min(chunk.len());
                self.skip -= dropped as u64;
                start = dropped;
            }
            self.pending = chunk[start..].to_vec();
            self.pending_pos = 0;
        }
        Ok(true)
    }
}

#[async_trait]
impl ByteStream for HttpByteStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || !self.fill().await? {
            return Ok(0);
        }
        let available = &self.pending[self.pending_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_pos += n;
        Ok(n)
    }
}
