use crate::drive_service::blob_client::{BlobStore, ByteStream};
use crate::error::{DriveError, Result};
use crate::upload::{UploadEngine, UploadSession};
use crate::vfs::filesystem::OpenOptions;
use crate::vfs::node::{Metadata, Node};
use crate::vfs::tree::NodeTree;
use log::{debug, warn};
use std::io::SeekFrom;
use std::sync::Arc;

/// Forward gaps below this are drained from the open response instead of
/// issuing a new ranged request.
pub const READ_REUSE_WINDOW: u64 = 8 * 1024;

enum HandleTarget {
    Existing(Arc<Node>),
    /// File being created; registered in the parent on close
    Pending { parent: Arc<Node>, name: String },
}

/// Open file. Reads stream from the download URL; writes are append-only
/// and go through an [`UploadSession`] finalized on close.
pub struct FileHandle {
    tree: Arc<NodeTree>,
    blobs: Arc<dyn BlobStore>,
    engine: UploadEngine,
    target: HandleTarget,
    options: OpenOptions,
    upload: Option<UploadSession>,
    /// Set when finalizing failed; reported by every later stat/close
    failure: Option<DriveError>,
    pos: u64,
    stream: Option<Box<dyn ByteStream>>,
    stream_pos: u64,
}

impl FileHandle {
    pub(crate) fn open_existing(
        tree: Arc<NodeTree>,
        blobs: Arc<dyn BlobStore>,
        engine: UploadEngine,
        node: Arc<Node>,
        options: OpenOptions,
        upload: Option<UploadSession>,
    ) -> Self {
        Self::build(tree, blobs, engine, HandleTarget::Existing(node), options, upload)
    }

    pub(crate) fn create(
        tree: Arc<NodeTree>,
        blobs: Arc<dyn BlobStore>,
        engine: UploadEngine,
        parent: Arc<Node>,
        name: String,
        options: OpenOptions,
        upload: UploadSession,
    ) -> Self {
        Self::build(
            tree,
            blobs,
            engine,
            HandleTarget::Pending { parent, name },
            options,
            Some(upload),
        )
    }

    fn build(
        tree: Arc<NodeTree>,
        blobs: Arc<dyn BlobStore>,
        engine: UploadEngine,
        target: HandleTarget,
        options: OpenOptions,
        upload: Option<UploadSession>,
    ) -> Self {
        Self {
            tree,
            blobs,
            engine,
            target,
            options,
            upload,
            failure: None,
            pos: 0,
            stream: None,
            stream_pos: 0,
        }
    }

    /// Node backing this handle; `None` until a new file is closed.
    pub fn node(&self) -> Option<&Arc<Node>> {
        match &self.target {
            HandleTarget::Existing(node) => Some(node),
            HandleTarget::Pending { .. } => None,
        }
    }

    pub fn name(&self) -> String {
        match &self.target {
            HandleTarget::Existing(node) => node.name(),
            HandleTarget::Pending { name, .. } => name.clone(),
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Size as seen through this handle, including unsent bytes.
    pub fn size(&self) -> u64 {
        match (&self.upload, &self.target) {
            (Some(upload), _) => upload.len(),
            (None, HandleTarget::Existing(node)) => node.size(),
            (None, HandleTarget::Pending { .. }) => 0,
        }
    }

    fn append_point(&self) -> u64 {
        self.upload.as_ref().map_or(0, |u| u.len())
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.options.read {
            return Err(DriveError::invalid("handle not opened for reading"));
        }
        let node = match &self.target {
            HandleTarget::Existing(node) => node.clone(),
            HandleTarget::Pending { .. } => {
                return Err(DriveError::invalid("file is still being created"))
            }
        };
        if buf.is_empty() || self.pos >= node.size() {
            return Ok(0);
        }

        if let Some(stream) = self.stream.as_mut() {
            if self.pos > self.stream_pos && self.pos - self.stream_pos < READ_REUSE_WINDOW {
                let mut gap = (self.pos - self.stream_pos) as usize;
                debug!("Draining {} bytes from open download", gap);
                let mut scratch = vec![0u8; gap];
                while gap > 0 {
                    let n = stream.read(&mut scratch[..gap]).await?;
                    if n == 0 {
                        break;
                    }
                    gap -= n;
                    self.stream_pos += n as u64;
                }
            }
            if self.stream_pos == self.pos {
                let n = stream.read(buf).await?;
                self.pos += n as u64;
                self.stream_pos += n as u64;
                return Ok(n);
            }
            self.stream = None;
        }

        let url = match node.download_url() {
            Some(url) => url,
            None => return Ok(0),
        };
        let mut stream = self.blobs.open_read(&url, self.pos).await?;
        let n = stream.read(buf).await?;
        self.stream_pos = self.pos + n as u64;
        self.pos = self.stream_pos;
        self.stream = Some(stream);
        Ok(n)
    }

    /// Append at the current position.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let offset = self.pos;
        self.write_at(offset, data).await
    }

    /// Writes must start exactly where the previous one ended.
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        if !self.options.write {
            return Err(DriveError::invalid("handle not opened for writing"));
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let expected = self.append_point();
        if offset != expected {
            return Err(DriveError::invalid(format!(
                "non-contiguous write at {} (expected {})",
                offset, expected
            )));
        }
        if self.upload.is_none() {
            let node = match &self.target {
                HandleTarget::Existing(node) => node.clone(),
                HandleTarget::Pending { .. } => {
                    return Err(DriveError::invalid("upload already finished"))
                }
            };
            let session = self
                .engine
                .start_overwrite(node.require_id()?, &node.name())
                .await?;
            self.upload = Some(session);
        }
        let upload = self
            .upload
            .as_mut()
            .ok_or_else(|| DriveError::invalid("no upload in progress"))?;
        let n = upload.write(data).await?;
        self.pos = offset + n as u64;
        Ok(n)
    }

    /// Read handles seek freely; write handles stay at the append point.
    pub fn seek(&mut self, from: SeekFrom) -> Result<u64> {
        let target = match from {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => self.size() as i128 + delta as i128,
        };
        let target = u64::try_from(target)
            .map_err(|_| DriveError::invalid(format!("invalid seek position {}", target)))?;
        if self.options.write && target != self.append_point() {
            return Err(DriveError::invalid("cannot seek on a handle opened for writing"));
        }
        self.pos = target;
        Ok(target)
    }

    /// Attributes after flushing any pending upload.
    pub async fn stat(&mut self) -> Result<Metadata> {
        self.finalize().await?;
        match &self.target {
            HandleTarget::Existing(node) => Ok(node.metadata()),
            HandleTarget::Pending { name, .. } => {
                Err(DriveError::invalid(format!("{} was not created", name)))
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.finalize().await
    }

    async fn finalize(&mut self) -> Result<()> {
        self.stream = None;
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let upload = match self.upload.take() {
            Some(upload) => upload,
            None => return Ok(()),
        };
        if let Err(e) = self.commit(upload).await {
            warn!("Upload of {:?} failed: {}", self.name(), e);
            self.failure = Some(e.clone());
            return Err(e);
        }
        Ok(())
    }

    async fn commit(&mut self, upload: UploadSession) -> Result<()> {
        let info = upload.complete().await?;

        let node = match &self.target {
            HandleTarget::Existing(node) => {
                node.update(&info);
                node.clone()
            }
            HandleTarget::Pending { parent, .. } => {
                let parent = parent.clone();
                if let Err(e) = self.tree.reload(&parent).await {
                    warn!("Refresh of {:?} after upload failed: {}", parent.name(), e);
                }
                self.tree.upsert_child(&parent, &info)?
            }
        };
        self.target = HandleTarget::Existing(node);
        Ok(())
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if let Some(upload) = &self.upload {
            warn!(
                "Handle for {:?} dropped without close, discarding {} unsent bytes",
                self.name(),
                upload.len()
            );
        }
    }
}
