use async_trait::async_trait;
use drive_dav::drive_service::drive_client::DriveBackend;
use drive_dav::drive_service::drive_models::{
    BucketEndpoint, DriveInfo, DriveItemInfo, ItemKind, UploadTarget,
};
use drive_dav::error::{DriveError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MOCK_AUTHORIZATION: &str = "AWS4-HMAC-SHA256 Credential=mock/signature";
pub const BLOB_HOST: &str = "blob.test";

/// Pending upload registered by initiate_upload / initiate_overwrite
#[derive(Debug, Clone)]
enum UploadOrigin {
    New { parent_id: String, filename: String },
    Overwrite { item_id: String },
}

/// Server-side state of the mock
#[derive(Debug, Default)]
pub struct MockResponses {
    pub drives: Vec<DriveInfo>,
    /// Parent id -> listed children, in server order
    pub children: HashMap<String, Vec<DriveItemInfo>>,
    pub should_fail_operations: Vec<String>,
    pub list_delay: Option<Duration>,
    pub signed_requests: Vec<String>,
    uploads: HashMap<String, UploadOrigin>,
    next_id: usize,
}

/// In-memory implementation of DriveBackend for testing
#[derive(Clone, Default)]
pub struct MockDriveBackend {
    responses: Arc<Mutex<MockResponses>>,
    call_counter: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockDriveBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with drive "MyDrive" holding docs/report.txt (42 bytes, blob "abc")
    /// and a.txt at the drive root.
    pub fn with_sample_tree() -> Self {
        use crate::common::fixtures::{drive, file_item, folder_item};
        let mock = Self::new();
        mock.add_drive(drive("drv-1", "MyDrive", "root-1"));
        mock.add_item("root-1", folder_item("fld-docs", "docs"));
        mock.add_item("root-1", file_item("itm-a", "a.txt", 11, "blob-a"));
        mock.add_item("fld-docs", file_item("itm-report", "report.txt", 42, "abc"));
        mock
    }

    pub fn add_drive(&self, drive: DriveInfo) {
        self.responses.lock().unwrap().drives.push(drive);
    }

    pub fn add_item(&self, parent_id: &str, item: DriveItemInfo) {
        self.responses
            .lock()
            .unwrap()
            .children
            .entry(parent_id.to_string())
            .or_default()
            .push(item);
    }

    /// Slow down listings so concurrent callers overlap
    pub fn set_list_delay(&self, delay: Duration) {
        self.responses.lock().unwrap().list_delay = Some(delay);
    }

    /// Make specific operations fail
    pub fn make_operation_fail(&self, operation: &str) {
        let mut responses = self.responses.lock().unwrap();
        if !responses.should_fail_operations.iter().any(|o| o == operation) {
            responses.should_fail_operations.push(operation.to_string());
        }
    }

    /// Make all operations succeed (clear failure list)
    pub fn clear_operation_failures(&self) {
        self.responses.lock().unwrap().should_fail_operations.clear();
    }

    /// Get call count for a specific operation
    pub fn get_call_count(&self, operation: &str) -> usize {
        let counter = self.call_counter.lock().unwrap();
        counter.get(operation).copied().unwrap_or(0)
    }

    pub fn reset_call_counters(&self) {
        self.call_counter.lock().unwrap().clear();
    }

    /// Canonical requests received by sign_request, in order
    pub fn signed_requests(&self) -> Vec<String> {
        self.responses.lock().unwrap().signed_requests.clone()
    }

    /// Children the server currently holds for a parent
    pub fn server_children(&self, parent_id: &str) -> Vec<DriveItemInfo> {
        self.responses
            .lock()
            .unwrap()
            .children
            .get(parent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Increment the call counter and check if the operation should fail
    fn should_fail_operation(&self, operation: &str) -> Result<()> {
        {
            let mut counter = self.call_counter.lock().unwrap();
            *counter.entry(operation.to_string()).or_insert(0) += 1;
        }
        let responses = self.responses.lock().unwrap();
        if responses.should_fail_operations.iter().any(|o| o == operation) {
            Err(DriveError::Backend(format!("Mock {} failure", operation)))
        } else {
            Ok(())
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut responses = self.responses.lock().unwrap();
        responses.next_id += 1;
        format!("{}-{}", prefix, responses.next_id)
    }

    fn find_item(&self, item_id: &str) -> Option<(String, DriveItemInfo)> {
        let responses = self.responses.lock().unwrap();
        responses.children.iter().find_map(|(parent, items)| {
            items
                .iter()
                .find(|i| i.id == item_id)
                .map(|i| (parent.clone(), i.clone()))
        })
    }

    fn remove_item(&self, item_id: &str) -> Option<DriveItemInfo> {
        let mut responses = self.responses.lock().unwrap();
        for items in responses.children.values_mut() {
            if let Some(pos) = items.iter().position(|i| i.id == item_id) {
                return Some(items.remove(pos));
            }
        }
        None
    }

    async fn list_pause(&self) {
        let delay = self.responses.lock().unwrap().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn upload_target(&self, origin: UploadOrigin) -> UploadTarget {
        let upload_id = self.next_id("upl");
        self.responses
            .lock()
            .unwrap()
            .uploads
            .insert(upload_id.clone(), origin);
        UploadTarget {
            put_url: format!("https://{}/presigned/{}", BLOB_HOST, upload_id),
            complete: format!("Cloud/Aws/Bucket/Upload/{}:handleComplete", upload_id),
            key: format!("uploads/{}", upload_id),
            bucket: BucketEndpoint {
                host: BLOB_HOST.to_string(),
                name: "bucket".to_string(),
                region: "eu-west-1".to_string(),
            },
            upload_id,
        }
    }
}

#[async_trait]
impl DriveBackend for MockDriveBackend {
    async fn list_drives(&self, _page_size: u32) -> Result<Vec<DriveInfo>> {
        self.should_fail_operation("list_drives")?;
        self.list_pause().await;
        Ok(self.responses.lock().unwrap().drives.clone())
    }

    async fn list_children(
        &self,
        _drive_id: &str,
        parent_id: &str,
        _page_size: u32,
    ) -> Result<Vec<DriveItemInfo>> {
        self.should_fail_operation("list_children")?;
        self.list_pause().await;
        Ok(self.server_children(parent_id))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveItemInfo> {
        self.should_fail_operation("create_folder")?;
        let item = DriveItemInfo {
            id: self.next_id("fld"),
            kind: ItemKind::Folder,
            name: name.to_string(),
            size: 0,
            last_modified: None,
            blob: None,
            download_url: None,
            mime: None,
        };
        self.add_item(parent_id, item.clone());
        Ok(item)
    }

    async fn rename_item(&self, item_id: &str, new_name: &str) -> Result<DriveItemInfo> {
        self.should_fail_operation("rename_item")?;
        let mut responses = self.responses.lock().unwrap();
        let item = responses
            .children
            .values_mut()
            .flat_map(|items| items.iter_mut())
            .find(|i| i.id == item_id)
            .ok_or_else(|| DriveError::Backend(format!("no item {}", item_id)))?;
        item.name = new_name.to_string();
        Ok(item.clone())
    }

    async fn move_item(&self, item_id: &str, target_id: &str, new_name: &str) -> Result<DriveItemInfo> {
        self.should_fail_operation("move_item")?;
        let mut item = self
            .remove_item(item_id)
            .ok_or_else(|| DriveError::Backend(format!("no item {}", item_id)))?;
        item.name = new_name.to_string();
        self.add_item(target_id, item.clone());
        Ok(item)
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        self.should_fail_operation("delete_item")?;
        self.remove_item(item_id)
            .map(|_| ())
            .ok_or_else(|| DriveError::Backend(format!("no item {}", item_id)))
    }

    async fn initiate_upload(&self, parent_id: &str, filename: &str) -> Result<UploadTarget> {
        self.should_fail_operation("initiate_upload")?;
        Ok(self.upload_target(UploadOrigin::New {
            parent_id: parent_id.to_string(),
            filename: filename.to_string(),
        }))
    }

    async fn initiate_overwrite(&self, item_id: &str) -> Result<UploadTarget> {
        self.should_fail_operation("initiate_overwrite")?;
        Ok(self.upload_target(UploadOrigin::Overwrite {
            item_id: item_id.to_string(),
        }))
    }

    async fn sign_request(&self, _upload_id: &str, canonical_request: &str) -> Result<String> {
        self.should_fail_operation("sign_request")?;
        self.responses
            .lock()
            .unwrap()
            .signed_requests
            .push(canonical_request.to_string());
        Ok(MOCK_AUTHORIZATION.to_string())
    }

    async fn complete_upload(&self, complete_path: &str) -> Result<DriveItemInfo> {
        self.should_fail_operation("complete_upload")?;
        let upload_id = complete_path
            .trim_start_matches("Cloud/Aws/Bucket/Upload/")
            .trim_end_matches(":handleComplete")
            .to_string();
        let origin = self
            .responses
            .lock()
            .unwrap()
            .uploads
            .remove(&upload_id)
            .ok_or_else(|| DriveError::Backend(format!("unknown upload {}", upload_id)))?;

        match origin {
            UploadOrigin::New { parent_id, filename } => {
                let item = DriveItemInfo {
                    id: format!("itm-{}", upload_id),
                    kind: ItemKind::File,
                    name: filename,
                    size: 0,
                    last_modified: None,
                    blob: Some(format!("blob-{}", upload_id)),
                    download_url: Some(crate::common::fixtures::download_url(&upload_id)),
                    mime: None,
                };
                self.add_item(&parent_id, item.clone());
                Ok(item)
            }
            UploadOrigin::Overwrite { item_id } => {
                let mut responses = self.responses.lock().unwrap();
                let item = responses
                    .children
                    .values_mut()
                    .flat_map(|items| items.iter_mut())
                    .find(|i| i.id == item_id)
                    .ok_or_else(|| DriveError::Backend(format!("no item {}", item_id)))?;
                item.blob = Some(format!("blob-{}", upload_id));
                Ok(item.clone())
            }
        }
    }
}
