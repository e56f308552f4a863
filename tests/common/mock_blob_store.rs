use async_trait::async_trait;
use drive_dav::drive_service::blob_client::{BlobRequest, BlobResponse, BlobStore, ByteStream};
use drive_dav::error::{DriveError, Result};
use reqwest::Method;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const MULTIPART_UPLOAD_ID: &str = "mp-upload-1";

#[derive(Debug, Default)]
struct BlobState {
    requests: Vec<BlobRequest>,
    objects: HashMap<String, Vec<u8>>,
    opened: Vec<(String, u64)>,
    fail_parts_with: Option<u16>,
}

/// Object store stub: answers the multipart protocol and serves ranged reads
#[derive(Clone, Default)]
pub struct MockBlobStore {
    state: Arc<Mutex<BlobState>>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content served for a download URL
    pub fn put_object(&self, url: &str, data: Vec<u8>) {
        self.state.lock().unwrap().objects.insert(url.to_string(), data);
    }

    /// Part uploads answer with this status
    pub fn fail_parts_with(&self, status: u16) {
        self.state.lock().unwrap().fail_parts_with = Some(status);
    }

    pub fn requests(&self) -> Vec<BlobRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Number of download streams opened
    pub fn get_count(&self) -> usize {
        self.state.lock().unwrap().opened.len()
    }

    /// (url, offset) of every opened download
    pub fn opened(&self) -> Vec<(String, u64)> {
        self.state.lock().unwrap().opened.clone()
    }
}

fn query_value<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    let query = url.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == key).then_some(v)
    })
}

fn response(status: u16, headers: Vec<(&str, String)>, body: &[u8]) -> BlobResponse {
    BlobResponse {
        status,
        headers: headers
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect(),
        body: body.to_vec(),
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn execute(&self, request: BlobRequest) -> Result<BlobResponse> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        let url = request.url.as_str();
        if request.method == Method::POST && query_value(url, "uploads").is_some() {
            let xml = format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <InitiateMultipartUploadResult><Bucket>bucket</Bucket><Key>k</Key>\
                 <UploadId>{}</UploadId></InitiateMultipartUploadResult>",
                MULTIPART_UPLOAD_ID
            );
            return Ok(response(200, vec![], xml.as_bytes()));
        }
        if request.method == Method::PUT {
            if let Some(part) = query_value(url, "partNumber") {
                if let Some(status) = state.fail_parts_with {
                    return Ok(response(status, vec![], b"<Error/>"));
                }
                return Ok(response(200, vec![("ETag", format!("\"etag-{}\"", part))], b""));
            }
            return Ok(response(200, vec![], b""));
        }
        if request.method == Method::POST && query_value(url, "uploadId").is_some() {
            return Ok(response(200, vec![], b"<CompleteMultipartUploadResult/>"));
        }
        Ok(response(400, vec![], b"unexpected request"))
    }

    async fn open_read(&self, url: &str, offset: u64) -> Result<Box<dyn ByteStream>> {
        let mut state = self.state.lock().unwrap();
        state.opened.push((url.to_string(), offset));
        let data = state
            .objects
            .get(url)
            .cloned()
            .ok_or_else(|| DriveError::Backend(format!("no object at {}", url)))?;
        let start = (offset as usize).min(data.len());
        Ok(Box::new(MockStream {
            data: data[start..].to_vec(),
            pos: 0,
        }))
    }
}

struct MockStream {
    data: Vec<u8>,
    pos: usize,
}

#[async_trait]
impl ByteStream for MockStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
