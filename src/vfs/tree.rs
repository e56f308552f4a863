use crate::drive_service::drive_client::DriveBackend;
use crate::drive_service::drive_models::{DriveItemInfo, ItemKind};
use crate::error::{DriveError, Result};
use crate::vfs::node::{ChildMap, Node};
use crate::vfs::path_utils;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Minimum delay between two forced refreshes of the same folder
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Lazily loaded view of the remote hierarchy.
pub struct NodeTree {
    backend: Arc<dyn DriveBackend>,
    root: Arc<Node>,
    page_size: u32,
}

/// Pick `base`, or `base (n)` with the smallest free n >= 2.
pub fn unique_name(children: &ChildMap, base: &str) -> String {
    if !children.contains_key(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{} ({})", base, n))
        .find(|candidate| !children.contains_key(candidate))
        .unwrap_or_else(|| base.to_string())
}

impl NodeTree {
    pub fn new(backend: Arc<dyn DriveBackend>, page_size: u32) -> Self {
        Self {
            backend,
            root: Node::root(),
            page_size,
        }
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn backend(&self) -> &Arc<dyn DriveBackend> {
        &self.backend
    }

    /// Walk the path from the root, loading every folder on the way.
    pub async fn resolve(&self, path: &str) -> Result<Arc<Node>> {
        let mut current = self.root.clone();
        for segment in path_utils::segments(path) {
            self.load(&current).await?;
            if !current.is_dir() {
                return Err(DriveError::invalid(format!(
                    "{} is not a folder",
                    current.name()
                )));
            }
            let next = current
                .child_named(segment)
                .ok_or_else(|| DriveError::not_found(path_utils::normalize(path)))?;
            current = next;
        }
        self.load(&current).await?;
        Ok(current)
    }

    /// Fetch the node's children once for its lifetime. Failures stick.
    pub async fn load(&self, node: &Arc<Node>) -> Result<()> {
        if let Some(err) = node.error() {
            return Err(err);
        }
        node.loaded
            .get_or_init(|| self.fetch(node))
            .await
            .clone()
    }

    /// Re-run the fetch if the last one is older than [`REFRESH_INTERVAL`].
    pub async fn reload(&self, node: &Arc<Node>) -> Result<()> {
        if !node.loaded.initialized() {
            return self.load(node).await;
        }
        let _guard = node.refresh_lock.lock().await;
        if let Some(err) = node.error() {
            return Err(err);
        }
        if node
            .last_fetch()
            .is_some_and(|last| last.elapsed() < REFRESH_INTERVAL)
        {
            debug!("Skipping refresh of {:?}, fetched recently", node.name());
            return Ok(());
        }
        self.fetch(node).await
    }

    async fn fetch(&self, node: &Arc<Node>) -> Result<()> {
        node.touch_fetch();
        let result = self.fetch_children(node).await;
        if let Err(e) = &result {
            warn!("Failed to load {:?}: {}", node.name(), e);
            node.set_error(e.clone());
        }
        result
    }

    async fn fetch_children(&self, node: &Arc<Node>) -> Result<()> {
        let entries: Vec<(DriveItemInfo, Option<String>, String)> = if node.is_root() {
            self.backend
                .list_drives(self.page_size)
                .await?
                .into_iter()
                .map(|drive| (drive.root, Some(drive.id), drive.name))
                .collect()
        } else {
            match node.kind() {
                ItemKind::File | ItemKind::Special => return Ok(()),
                ItemKind::Folder => {}
            }
            let drive_id = node
                .drive_id()
                .ok_or_else(|| DriveError::invalid("folder without drive"))?;
            let drive_id = drive_id.to_string();
            self.backend
                .list_children(&drive_id, node.require_id()?, self.page_size)
                .await?
                .into_iter()
                .map(|item| {
                    let name = item.name.clone();
                    (item, Some(drive_id.clone()), name)
                })
                .collect()
        };
        debug!("Loaded {} entries under {:?}", entries.len(), node.name());
        self.populate(node, entries);
        Ok(())
    }

    /// Replace the children map, keeping node identity for items already known.
    fn populate(&self, node: &Arc<Node>, entries: Vec<(DriveItemInfo, Option<String>, String)>) {
        let known: HashMap<String, Arc<Node>> = node
            .children()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c.id().map(|id| (id.to_string(), c.clone())))
            .collect();

        let mut map = ChildMap::new();
        for (info, drive_id, preferred) in entries {
            let name = unique_name(&map, &preferred);
            let child = match known.get(&info.id) {
                Some(existing) if existing.kind() == info.kind => {
                    existing.update(&info);
                    existing.set_name(&name);
                    existing.clone()
                }
                _ => Node::child(&info, drive_id, name.clone(), node),
            };
            map.insert(name, child);
        }
        *node.children_mut() = Some(map);
    }

    /// Register a new child under a loaded folder, applying the suffix rule.
    pub fn add_child(
        &self,
        parent: &Arc<Node>,
        info: &DriveItemInfo,
        preferred_name: Option<&str>,
    ) -> Result<Arc<Node>> {
        if !parent.is_dir() {
            return Err(DriveError::invalid(format!("{} is not a folder", parent.name())));
        }
        let mut guard = parent.children_mut();
        let children = guard
            .as_mut()
            .ok_or_else(|| DriveError::invalid(format!("{} is not loaded", parent.name())))?;
        let name = unique_name(children, preferred_name.unwrap_or(&info.name));
        let child = Node::child(info, parent.drive_id().map(str::to_string), name.clone(), parent);
        children.insert(name, child.clone());
        Ok(child)
    }

    /// Update the child with the same backend id, or add it.
    pub fn upsert_child(&self, parent: &Arc<Node>, info: &DriveItemInfo) -> Result<Arc<Node>> {
        let existing = parent
            .children()
            .unwrap_or_default()
            .into_iter()
            .find(|c| c.id() == Some(info.id.as_str()) && c.kind() == info.kind);
        match existing {
            Some(node) => {
                node.update(info);
                Ok(node)
            }
            None => self.add_child(parent, info, None),
        }
    }

    pub async fn create_folder(&self, parent_path: &str, name: &str) -> Result<Arc<Node>> {
        let parent = self.resolve(parent_path).await?;
        if parent.is_root() {
            return Err(DriveError::invalid("cannot create a drive"));
        }
        if !parent.is_dir() {
            return Err(DriveError::invalid(format!("{} is not a folder", parent_path)));
        }
        let info = self.backend.create_folder(parent.require_id()?, name).await?;
        self.add_child(&parent, &info, None)
    }

    /// Rename in place or move under another folder. The name returned by
    /// the server wins.
    pub async fn rename(&self, node: &Arc<Node>, new_parent_path: &str, new_name: &str) -> Result<()> {
        if node.is_root() || node.is_drive() {
            return Err(DriveError::invalid("drives cannot be renamed"));
        }
        let old_parent = node
            .parent()
            .ok_or_else(|| DriveError::invalid("node is detached"))?;
        let target = self.resolve(new_parent_path).await?;
        if target.is_root() || !target.is_dir() {
            return Err(DriveError::invalid(format!(
                "{} is not a valid destination",
                new_parent_path
            )));
        }
        let id = node.require_id()?;
        let old_name = node.name();

        let same_parent = Arc::ptr_eq(&old_parent, &target);
        let info = if same_parent {
            if old_name == new_name {
                return Ok(());
            }
            self.backend.rename_item(id, new_name).await?
        } else {
            self.backend
                .move_item(id, target.require_id()?, new_name)
                .await?
        };
        node.update(&info);

        if !same_parent {
            detach(&old_parent, &old_name, node);
        }
        {
            let mut guard = target.children_mut();
            let children = guard.get_or_insert_with(ChildMap::new);
            if same_parent {
                remove_entry(children, &old_name, node);
            }
            let name = unique_name(children, &info.name);
            node.set_name(&name);
            node.set_parent(&target);
            children.insert(name, node.clone());
        }
        info!("Renamed {:?} to {:?}", old_name, node.name());
        Ok(())
    }

    /// Delete a file or folder. Drives and the root cannot be trashed.
    pub async fn trash(&self, node: &Arc<Node>) -> Result<()> {
        if node.is_root() || node.is_drive() {
            return Err(DriveError::invalid("cannot delete the root or a drive"));
        }
        let parent = node
            .parent()
            .ok_or_else(|| DriveError::invalid("node is detached"))?;
        self.backend.delete_item(node.require_id()?).await?;
        detach(&parent, &node.name(), node);
        Ok(())
    }
}

/// Remove `node` from `parent` if it is still registered under `name`.
fn detach(parent: &Arc<Node>, name: &str, node: &Arc<Node>) {
    let mut guard = parent.children_mut();
    if let Some(children) = guard.as_mut() {
        remove_entry(children, name, node);
    }
}

fn remove_entry(children: &mut ChildMap, name: &str, node: &Arc<Node>) {
    if children.get(name).is_some_and(|c| Arc::ptr_eq(c, node)) {
        children.remove(name);
    }
}
