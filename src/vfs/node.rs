//! In-memory tree entries.
//!
//! A node owns its children; the parent link is a `Weak` so the tree has no
//! ownership cycle. Children maps are guarded per node and the guard is
//! never held across an `.await`.

use crate::drive_service::drive_models::{DriveItemInfo, ItemKind};
use crate::error::{DriveError, Result};
use crate::upload::content_type;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

/// Directory bit of a permission mode
pub const MODE_DIR: u32 = 0o040000;

pub type ChildMap = BTreeMap<String, Arc<Node>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loaded,
    Errored,
}

/// Attributes refreshed from the backend on every listing.
#[derive(Debug, Clone, Default, PartialEq)]
struct ItemMeta {
    size: u64,
    modified: Option<DateTime<Utc>>,
    fingerprint: Option<String>,
    download_url: Option<String>,
    mime: Option<String>,
}

impl From<&DriveItemInfo> for ItemMeta {
    fn from(info: &DriveItemInfo) -> Self {
        Self {
            size: info.size,
            modified: info.last_modified,
            fingerprint: info.blob.clone().filter(|b| !b.is_empty()),
            download_url: info.download_url.clone().filter(|u| !u.is_empty()),
            mime: info.mime.clone().filter(|m| !m.is_empty()),
        }
    }
}

/// Snapshot of a node's attributes as exposed to filesystem callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub name: String,
    pub kind: ItemKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Quoted content fingerprint
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub mode: u32,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }
}

pub struct Node {
    id: Option<String>,
    kind: ItemKind,
    drive_id: Option<String>,
    name: RwLock<String>,
    parent: RwLock<Weak<Node>>,
    meta: RwLock<ItemMeta>,
    children: RwLock<Option<ChildMap>>,
    pub(crate) loaded: OnceCell<Result<()>>,
    pub(crate) refresh_lock: Mutex<()>,
    last_fetch: RwLock<Option<Instant>>,
    error: RwLock<Option<DriveError>>,
}

impl Node {
    /// Synthetic root listing the drives.
    pub fn root() -> Arc<Self> {
        Arc::new(Self::build(None, ItemKind::Folder, None, String::new(), Weak::new(), ItemMeta::default()))
    }

    pub(crate) fn child(
        info: &DriveItemInfo,
        drive_id: Option<String>,
        name: String,
        parent: &Arc<Node>,
    ) -> Arc<Self> {
        Arc::new(Self::build(
            Some(info.id.clone()),
            info.kind,
            drive_id,
            name,
            Arc::downgrade(parent),
            ItemMeta::from(info),
        ))
    }

    fn build(
        id: Option<String>,
        kind: ItemKind,
        drive_id: Option<String>,
        name: String,
        parent: Weak<Node>,
        meta: ItemMeta,
    ) -> Self {
        Self {
            id,
            kind,
            drive_id,
            name: RwLock::new(name),
            parent: RwLock::new(parent),
            meta: RwLock::new(meta),
            children: RwLock::new(None),
            loaded: OnceCell::new(),
            refresh_lock: Mutex::new(()),
            last_fetch: RwLock::new(None),
            error: RwLock::new(None),
        }
    }

    /// Backend identifier, `None` for the synthetic root.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn require_id(&self) -> Result<&str> {
        self.id()
            .ok_or_else(|| DriveError::invalid("operation not supported on the root"))
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn is_root(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Collection the node belongs to.
    pub fn drive_id(&self) -> Option<&str> {
        self.drive_id.as_deref()
    }

    pub fn name(&self) -> String {
        read(&self.name).clone()
    }

    pub fn parent(&self) -> Option<Arc<Node>> {
        read(&self.parent).upgrade()
    }

    /// True for the top-level folder of a drive.
    pub fn is_drive(&self) -> bool {
        self.parent().is_some_and(|p| p.is_root())
    }

    pub fn size(&self) -> u64 {
        read(&self.meta).size
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        read(&self.meta).modified
    }

    pub fn fingerprint(&self) -> Option<String> {
        read(&self.meta).fingerprint.clone()
    }

    pub fn etag(&self) -> Option<String> {
        self.fingerprint().map(|f| format!("\"{}\"", f))
    }

    pub fn download_url(&self) -> Option<String> {
        read(&self.meta).download_url.clone()
    }

    pub fn content_type(&self) -> Option<String> {
        if self.kind != ItemKind::File {
            return None;
        }
        read(&self.meta)
            .mime
            .clone()
            .or_else(|| content_type::guess_from_name(&self.name()))
    }

    pub fn mode(&self) -> u32 {
        match self.kind {
            ItemKind::Folder => MODE_DIR | 0o755,
            ItemKind::File => 0o755,
            ItemKind::Special => 0,
        }
    }

    pub fn metadata(&self) -> Metadata {
        let meta = read(&self.meta).clone();
        Metadata {
            name: if self.is_root() { "/".to_string() } else { self.name() },
            kind: self.kind,
            size: meta.size,
            modified: meta.modified,
            etag: meta.fingerprint.map(|f| format!("\"{}\"", f)),
            content_type: self.content_type(),
            mode: self.mode(),
        }
    }

    pub fn load_state(&self) -> LoadState {
        if self.error().is_some() {
            LoadState::Errored
        } else if self.loaded.initialized() {
            LoadState::Loaded
        } else {
            LoadState::Unloaded
        }
    }

    /// Sticky fetch error, if the node failed to load.
    pub fn error(&self) -> Option<DriveError> {
        read(&self.error).clone()
    }

    /// Child by display name, `None` if absent or not loaded.
    pub fn child_named(&self, name: &str) -> Option<Arc<Node>> {
        read(&self.children).as_ref().and_then(|m| m.get(name).cloned())
    }

    /// Children in name order, `None` until the folder is loaded.
    pub fn children(&self) -> Option<Vec<Arc<Node>>> {
        read(&self.children)
            .as_ref()
            .map(|m| m.values().cloned().collect())
    }

    pub(crate) fn children_mut(&self) -> RwLockWriteGuard<'_, Option<ChildMap>> {
        self.children.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_name(&self, name: &str) {
        *write(&self.name) = name.to_string();
    }

    pub(crate) fn set_parent(&self, parent: &Arc<Node>) {
        *write(&self.parent) = Arc::downgrade(parent);
    }

    pub(crate) fn update(&self, info: &DriveItemInfo) {
        *write(&self.meta) = ItemMeta::from(info);
    }

    pub(crate) fn set_error(&self, err: DriveError) {
        *write(&self.error) = Some(err);
    }

    pub(crate) fn last_fetch(&self) -> Option<Instant> {
        *read(&self.last_fetch)
    }

    pub(crate) fn touch_fetch(&self) {
        *write(&self.last_fetch) = Some(Instant::now());
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
