use crate::drive_service::blob_client::{BlobRequest, BlobResponse, BlobStore};
use crate::drive_service::drive_client::DriveBackend;
use crate::drive_service::drive_models::{DriveItemInfo, UploadTarget};
use crate::error::{DriveError, Result};
use crate::upload::{content_type, signer};
use chrono::Utc;
use log::{debug, info, warn};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Method;
use std::sync::Arc;
use urlencoding::encode;

/// Chunk threshold increment: the i-th chunk is sent at i * 5MiB buffered
pub const UPLOAD_BLOCK_LEN: usize = 5 * 1024 * 1024;

/// Starts upload sessions against the backend and blob store.
#[derive(Clone)]
pub struct UploadEngine {
    backend: Arc<dyn DriveBackend>,
    blobs: Arc<dyn BlobStore>,
}

impl UploadEngine {
    pub fn new(backend: Arc<dyn DriveBackend>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { backend, blobs }
    }

    /// Session for a brand-new file named `filename` in `parent_id`.
    pub async fn start_new(&self, parent_id: &str, filename: &str) -> Result<UploadSession> {
        let target = self.backend.initiate_upload(parent_id, filename).await?;
        let mut session = UploadSession::new(self.backend.clone(), self.blobs.clone(), target);
        session.content_type = content_type::guess_from_name(filename);
        Ok(session)
    }

    /// Session replacing the content of an existing file.
    pub async fn start_overwrite(&self, item_id: &str, filename: &str) -> Result<UploadSession> {
        let target = self.backend.initiate_overwrite(item_id).await?;
        let mut session = UploadSession::new(self.backend.clone(), self.blobs.clone(), target);
        session.content_type = content_type::guess_from_name(filename);
        Ok(session)
    }
}

/// One in-progress upload. Small uploads end as a single PUT to the
/// pre-signed URL; once a chunk has been sent the upload is multipart.
pub struct UploadSession {
    backend: Arc<dyn DriveBackend>,
    blobs: Arc<dyn BlobStore>,
    target: UploadTarget,
    buffer: Vec<u8>,
    committed: u64,
    etags: Vec<String>,
    threshold: usize,
    content_type: Option<String>,
    multipart_id: Option<String>,
    failure: Option<DriveError>,
}

impl UploadSession {
    fn new(backend: Arc<dyn DriveBackend>, blobs: Arc<dyn BlobStore>, target: UploadTarget) -> Self {
        Self {
            backend,
            blobs,
            target,
            buffer: Vec::new(),
            committed: 0,
            etags: Vec::new(),
            threshold: UPLOAD_BLOCK_LEN,
            content_type: None,
            multipart_id: None,
            failure: None,
        }
    }

    /// Total bytes accepted so far (sent plus buffered).
    pub fn len(&self) -> u64 {
        self.committed + self.buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn chunks_sent(&self) -> usize {
        self.etags.len()
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    /// Append bytes, sending a chunk whenever the buffer reaches the
    /// current threshold.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_failed()?;
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= self.threshold {
            self.send_chunk().await?;
        }
        Ok(data.len())
    }

    /// Finish the upload and register it with the backend. The returned
    /// descriptor is authoritative for the written item.
    pub async fn complete(mut self) -> Result<DriveItemInfo> {
        self.check_failed()?;
        if self.etags.is_empty() {
            self.put_single().await?;
        } else {
            if !self.buffer.is_empty() {
                self.send_chunk().await?;
            }
            self.complete_multipart().await?;
        }
        self.backend.complete_upload(&self.target.complete).await
    }

    fn check_failed(&self) -> Result<()> {
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn resolved_content_type(&mut self) -> String {
        if self.content_type.is_none() {
            self.content_type = Some(content_type::sniff(&self.buffer));
        }
        self.content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }

    async fn put_single(&mut self) -> Result<()> {
        let body = std::mem::take(&mut self.buffer);
        let size = body.len();
        debug!("Uploading {} bytes in a single request", size);
        let request = BlobRequest::new(Method::PUT, self.target.put_url.clone()).body(body);
        let response = self.blobs.execute(request).await?;
        if !response.is_success() {
            return Err(self.fail(format!("upload returned status {}", response.status)));
        }
        self.committed += size as u64;
        Ok(())
    }

    async fn send_chunk(&mut self) -> Result<()> {
        let content_type = self.resolved_content_type();
        let upload_id = match &self.multipart_id {
            Some(id) => id.clone(),
            None => self.initiate_multipart(&content_type).await?,
        };

        let part_number = self.etags.len() + 1;
        let body = std::mem::take(&mut self.buffer);
        let size = body.len();
        let url = format!(
            "{}?partNumber={}&uploadId={}",
            self.target.object_url(),
            part_number,
            encode(&upload_id)
        );
        debug!("Sending part {} ({} bytes)", part_number, size);

        let response = self.signed(BlobRequest::new(Method::PUT, url).body(body)).await?;
        if response.status != 200 {
            return Err(self.fail(format!(
                "part {} upload returned status {}",
                part_number, response.status
            )));
        }
        let etag = match response.header("etag") {
            Some(etag) => etag.to_string(),
            None => return Err(self.fail(format!("part {} response without ETag", part_number))),
        };

        self.etags.push(etag);
        self.committed += size as u64;
        self.threshold += UPLOAD_BLOCK_LEN;
        Ok(())
    }

    async fn initiate_multipart(&mut self, content_type: &str) -> Result<String> {
        let url = format!("{}?uploads=", self.target.object_url());
        let request = BlobRequest::new(Method::POST, url)
            .header("Content-Type", content_type)
            .header("X-Amz-Acl", "private");
        let response = self.signed(request).await?;
        if !response.is_success() {
            return Err(self.fail(format!(
                "multipart initiation returned status {}",
                response.status
            )));
        }
        let body = String::from_utf8_lossy(&response.body);
        let upload_id = match parse_upload_id(&body) {
            Some(id) => id,
            None => return Err(self.fail("multipart initiation response without UploadId")),
        };
        info!("Multipart upload {} started for {}", upload_id, self.target.key);
        self.multipart_id = Some(upload_id.clone());
        Ok(upload_id)
    }

    async fn complete_multipart(&mut self) -> Result<()> {
        let upload_id = match &self.multipart_id {
            Some(id) => id.clone(),
            None => return Err(self.fail("no multipart session to complete")),
        };
        let url = format!("{}?uploadId={}", self.target.object_url(), encode(&upload_id));
        let manifest = completion_manifest(&self.etags);
        let request = BlobRequest::new(Method::POST, url).body(manifest.into_bytes());
        let response = self.signed(request).await?;
        if response.status != 200 {
            return Err(self.fail(format!(
                "multipart completion returned status {}",
                response.status
            )));
        }
        info!(
            "Multipart upload {} completed with {} parts ({} bytes)",
            upload_id,
            self.etags.len(),
            self.committed
        );
        Ok(())
    }

    /// Sign with a fresh timestamp and execute. Any error poisons the session.
    async fn signed(&mut self, mut request: BlobRequest) -> Result<BlobResponse> {
        let signed = signer::sign(
            self.backend.as_ref(),
            &self.target.upload_id,
            &self.target.bucket.region,
            &mut request,
            Utc::now(),
        )
        .await;
        if let Err(e) = signed {
            self.failure = Some(e.clone());
            return Err(e);
        }
        match self.blobs.execute(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.failure = Some(e.clone());
                Err(e)
            }
        }
    }

    fn fail(&mut self, msg: impl Into<String>) -> DriveError {
        let err = DriveError::Backend(msg.into());
        warn!("Upload {} aborted: {}", self.target.upload_id, err);
        self.failure = Some(err.clone());
        err
    }
}

/// `<CompleteMultipartUpload>` body listing parts in ascending order.
pub fn completion_manifest(etags: &[String]) -> String {
    let mut xml = String::from("<CompleteMultipartUpload>");
    for (i, etag) in etags.iter().enumerate() {
        xml.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            i + 1,
            etag
        ));
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

/// Extract `UploadId` from an InitiateMultipartUploadResult document.
pub fn parse_upload_id(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_upload_id = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                in_upload_id = e.local_name().as_ref() == b"UploadId";
            }
            Ok(Event::End(_)) => in_upload_id = false,
            Ok(Event::Text(ref e)) if in_upload_id => {
                let text = String::from_utf8_lossy(e).trim().to_string();
                if !text.is_empty() {
                    return Some(text);
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}
