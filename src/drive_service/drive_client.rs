use crate::drive_service::drive_models::{DriveInfo, DriveItemInfo, SignResponse, UploadTarget};
use crate::drive_service::http_client::RestClient;
use crate::error::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use urlencoding::encode;

/// Trait defining the drive REST operations used by the node tree and the
/// upload engine
#[async_trait]
pub trait DriveBackend: Send + Sync {
    // Listings
    async fn list_drives(&self, page_size: u32) -> Result<Vec<DriveInfo>>;
    async fn list_children(
        &self,
        drive_id: &str,
        parent_id: &str,
        page_size: u32,
    ) -> Result<Vec<DriveItemInfo>>;

    // Item operations
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveItemInfo>;
    async fn rename_item(&self, item_id: &str, new_name: &str) -> Result<DriveItemInfo>;
    async fn move_item(&self, item_id: &str, target_id: &str, new_name: &str) -> Result<DriveItemInfo>;
    async fn delete_item(&self, item_id: &str) -> Result<()>;

    // Uploads
    async fn initiate_upload(&self, parent_id: &str, filename: &str) -> Result<UploadTarget>;
    async fn initiate_overwrite(&self, item_id: &str) -> Result<UploadTarget>;
    /// Returns the `Authorization` header value for a canonical request
    async fn sign_request(&self, upload_id: &str, canonical_request: &str) -> Result<String>;
    async fn complete_upload(&self, complete_path: &str) -> Result<DriveItemInfo>;
}

/// Drive API client over the REST envelope protocol
#[derive(Clone)]
pub struct DriveClient {
    rest: RestClient,
}

impl DriveClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    fn build_create_folder_body(&self, parent_id: &str, name: &str) -> serde_json::Value {
        serde_json::json!({
            "Name": name,
            "Parent_Drive_Item__": parent_id
        })
    }

    fn build_move_item_body(&self, target_id: &str, new_name: &str) -> serde_json::Value {
        serde_json::json!({
            "target": target_id,
            "rename": new_name
        })
    }

    fn warn_if_truncated(&self, what: &str, count: usize, page_size: u32) {
        if count >= page_size as usize {
            warn!(
                "Listing of {} returned a full page ({} entries), later entries are not visible",
                what, count
            );
        }
    }
}

#[async_trait]
impl DriveBackend for DriveClient {
    async fn list_drives(&self, page_size: u32) -> Result<Vec<DriveInfo>> {
        let drives: Vec<DriveInfo> = self
            .rest
            .get("Drive", &[("results_per_page", page_size.to_string())])
            .await?;
        debug!("Fetched {} drives", drives.len());
        self.warn_if_truncated("drives", drives.len(), page_size);
        Ok(drives)
    }

    async fn list_children(
        &self,
        drive_id: &str,
        parent_id: &str,
        page_size: u32,
    ) -> Result<Vec<DriveItemInfo>> {
        let path = format!("Drive/{}/Item", encode(drive_id));
        let items: Vec<DriveItemInfo> = self
            .rest
            .get(
                &path,
                &[
                    ("Parent_Drive_Item__", parent_id.to_string()),
                    ("results_per_page", page_size.to_string()),
                ],
            )
            .await?;
        debug!("Fetched {} children of {}", items.len(), parent_id);
        self.warn_if_truncated(parent_id, items.len(), page_size);
        Ok(items)
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveItemInfo> {
        let body = self.build_create_folder_body(parent_id, name);
        let item: DriveItemInfo = self.rest.post("Drive/Item", &body).await?;
        info!("Created folder: {} ({})", item.name, item.id);
        Ok(item)
    }

    async fn rename_item(&self, item_id: &str, new_name: &str) -> Result<DriveItemInfo> {
        let path = format!("Drive/Item/{}", encode(item_id));
        let body = serde_json::json!({ "Name": new_name });
        let item: DriveItemInfo = self.rest.patch(&path, &body).await?;
        info!("Renamed item: {} to: {}", item_id, item.name);
        Ok(item)
    }

    async fn move_item(&self, item_id: &str, target_id: &str, new_name: &str) -> Result<DriveItemInfo> {
        let path = format!("Drive/Item/{}:moveTo", encode(item_id));
        let body = self.build_move_item_body(target_id, new_name);
        let item: DriveItemInfo = self.rest.post(&path, &body).await?;
        info!("Moved item: {} to parent: {} as {}", item_id, target_id, item.name);
        Ok(item)
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        let path = format!("Drive/Item/{}", encode(item_id));
        self.rest.delete(&path).await?;
        info!("Deleted item: {}", item_id);
        Ok(())
    }

    async fn initiate_upload(&self, parent_id: &str, filename: &str) -> Result<UploadTarget> {
        let path = format!("Drive/Item/{}:upload", encode(parent_id));
        let body = serde_json::json!({ "filename": filename });
        let target: UploadTarget = self.rest.post(&path, &body).await?;
        debug!("Upload {} started for {} in {}", target.upload_id, filename, parent_id);
        Ok(target)
    }

    async fn initiate_overwrite(&self, item_id: &str) -> Result<UploadTarget> {
        let path = format!("Drive/Item/{}:overwrite", encode(item_id));
        let target: UploadTarget = self.rest.post(&path, &serde_json::json!({})).await?;
        debug!("Overwrite {} started for {}", target.upload_id, item_id);
        Ok(target)
    }

    async fn sign_request(&self, upload_id: &str, canonical_request: &str) -> Result<String> {
        let path = format!("Cloud/Aws/Bucket/Upload/{}:signV4", encode(upload_id));
        let body = serde_json::json!({ "headers": canonical_request });
        let signed: SignResponse = self.rest.post(&path, &body).await?;
        Ok(signed.authorization)
    }

    async fn complete_upload(&self, complete_path: &str) -> Result<DriveItemInfo> {
        let item: DriveItemInfo = self.rest.post(complete_path, &serde_json::json!({})).await?;
        info!("Upload registered as {} ({})", item.name, item.id);
        Ok(item)
    }
}
