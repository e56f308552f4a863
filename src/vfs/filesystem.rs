//! Hierarchical filesystem surface consumed by protocol servers.

use crate::drive_service::blob_client::BlobStore;
use crate::drive_service::drive_client::DriveBackend;
use crate::drive_service::drive_models::ItemKind;
use crate::error::{DriveError, Result};
use crate::upload::UploadEngine;
use crate::vfs::file_handle::FileHandle;
use crate::vfs::node::Metadata;
use crate::vfs::path_utils;
use crate::vfs::tree::NodeTree;
use log::{debug, info};
use std::sync::Arc;

/// Open flags, builder style like `std::fs::OpenOptions`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }
}

/// Snapshot of a folder listing.
#[derive(Debug, Clone)]
pub struct ReadDir {
    entries: Vec<Metadata>,
    pos: usize,
}

impl ReadDir {
    /// Up to `count` further entries; `0` returns everything left.
    pub fn next_batch(&mut self, count: usize) -> Vec<Metadata> {
        let end = if count == 0 {
            self.entries.len()
        } else {
            (self.pos + count).min(self.entries.len())
        };
        let batch = self.entries[self.pos..end].to_vec();
        self.pos = end;
        batch
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Metadata] {
        &self.entries
    }
}

impl Iterator for ReadDir {
    type Item = Metadata;

    fn next(&mut self) -> Option<Metadata> {
        let entry = self.entries.get(self.pos).cloned()?;
        self.pos += 1;
        Some(entry)
    }
}

/// Drive exposed as a filesystem: the synthetic root lists drives, each
/// drive is a folder tree.
#[derive(Clone)]
pub struct DriveFs {
    tree: Arc<NodeTree>,
    blobs: Arc<dyn BlobStore>,
    engine: UploadEngine,
}

impl DriveFs {
    pub fn new(backend: Arc<dyn DriveBackend>, blobs: Arc<dyn BlobStore>, page_size: u32) -> Self {
        let engine = UploadEngine::new(backend.clone(), blobs.clone());
        Self {
            tree: Arc::new(NodeTree::new(backend, page_size)),
            blobs,
            engine,
        }
    }

    pub fn tree(&self) -> &Arc<NodeTree> {
        &self.tree
    }

    pub async fn stat(&self, path: &str) -> Result<Metadata> {
        Ok(self.tree.resolve(path).await?.metadata())
    }

    /// List a folder, refreshing it if the last fetch is old enough.
    pub async fn read_dir(&self, path: &str) -> Result<ReadDir> {
        let node = self.tree.resolve(path).await?;
        if !node.is_dir() {
            return Err(DriveError::invalid(format!("{} is not a folder", path)));
        }
        self.tree.reload(&node).await?;
        let entries: Vec<Metadata> = node
            .children()
            .unwrap_or_default()
            .iter()
            .map(|c| c.metadata())
            .collect();
        debug!("Listed {} entries in {}", entries.len(), path);
        Ok(ReadDir { entries, pos: 0 })
    }

    pub async fn mkdir(&self, path: &str) -> Result<Metadata> {
        let (parent, name) = path_utils::split_parent(path)
            .ok_or_else(|| DriveError::invalid("cannot create the root"))?;
        let node = self.tree.create_folder(&parent, &name).await?;
        info!("Created folder {}", path_utils::normalize(path));
        Ok(node.metadata())
    }

    pub async fn open(&self, path: &str, options: OpenOptions) -> Result<FileHandle> {
        if options.append {
            return Err(DriveError::NotImplemented("append mode".to_string()));
        }
        let (parent_path, name) = path_utils::split_parent(path)
            .ok_or_else(|| DriveError::invalid("cannot open the root as a file"))?;

        match self.tree.resolve(path).await {
            Ok(node) => {
                if node.is_dir() {
                    return Err(DriveError::invalid(format!("{} is a folder", path)));
                }
                if node.kind() == ItemKind::Special && options.write {
                    return Err(DriveError::invalid(format!("{} cannot be written", path)));
                }
                let upload = if options.write && options.truncate {
                    Some(
                        self.engine
                            .start_overwrite(node.require_id()?, &node.name())
                            .await?,
                    )
                } else {
                    None
                };
                Ok(FileHandle::open_existing(
                    self.tree.clone(),
                    self.blobs.clone(),
                    self.engine.clone(),
                    node,
                    options,
                    upload,
                ))
            }
            Err(DriveError::NotFound(_)) if options.create => {
                let parent = self.tree.resolve(&parent_path).await?;
                if parent.is_root() || !parent.is_dir() {
                    return Err(DriveError::invalid(format!(
                        "cannot create {} in {}",
                        name, parent_path
                    )));
                }
                let upload = self.engine.start_new(parent.require_id()?, &name).await?;
                debug!("Creating {}", path_utils::normalize(path));
                Ok(FileHandle::create(
                    self.tree.clone(),
                    self.blobs.clone(),
                    self.engine.clone(),
                    parent,
                    name,
                    options.write(true),
                    upload,
                ))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let node = self.tree.resolve(from).await?;
        let (parent, name) = path_utils::split_parent(to)
            .ok_or_else(|| DriveError::invalid("cannot rename to the root"))?;
        self.tree.rename(&node, &parent, &name).await
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        let node = self.tree.resolve(path).await?;
        self.tree.trash(&node).await?;
        info!("Removed {}", path_utils::normalize(path));
        Ok(())
    }
}
