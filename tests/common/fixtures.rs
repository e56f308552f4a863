use chrono::{TimeZone, Utc};
use drive_dav::drive_service::drive_models::{DriveInfo, DriveItemInfo, ItemKind};

/// Create a test file item
pub fn file_item(id: &str, name: &str, size: u64, blob: &str) -> DriveItemInfo {
    DriveItemInfo {
        id: id.to_string(),
        kind: ItemKind::File,
        name: name.to_string(),
        size,
        last_modified: Utc.timestamp_opt(1_600_000_000, 0).single(),
        blob: Some(blob.to_string()),
        download_url: Some(download_url(id)),
        mime: None,
    }
}

/// Create a test folder item
pub fn folder_item(id: &str, name: &str) -> DriveItemInfo {
    DriveItemInfo {
        id: id.to_string(),
        kind: ItemKind::Folder,
        name: name.to_string(),
        size: 0,
        last_modified: None,
        blob: None,
        download_url: None,
        mime: None,
    }
}

pub fn special_item(id: &str, name: &str) -> DriveItemInfo {
    DriveItemInfo {
        kind: ItemKind::Special,
        ..folder_item(id, name)
    }
}

pub fn drive(id: &str, name: &str, root_id: &str) -> DriveInfo {
    DriveInfo {
        id: id.to_string(),
        name: name.to_string(),
        root: folder_item(root_id, name),
    }
}

pub fn download_url(id: &str) -> String {
    format!("https://dl.test/content/{}", id)
}

/// Deterministic content of the given length
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
