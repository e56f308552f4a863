#![allow(dead_code)]

pub mod fixtures;
pub mod mock_blob_store;
pub mod mock_drive_backend;
pub mod stub_server;

use drive_dav::vfs::DriveFs;
use mock_blob_store::MockBlobStore;
use mock_drive_backend::MockDriveBackend;
use std::sync::Arc;

pub const TEST_PAGE_SIZE: u32 = 1000;

/// Filesystem over the sample tree, plus handles on both mocks
pub fn sample_fs() -> (DriveFs, MockDriveBackend, MockBlobStore) {
    let backend = MockDriveBackend::with_sample_tree();
    let blobs = MockBlobStore::new();
    let fs = DriveFs::new(
        Arc::new(backend.clone()),
        Arc::new(blobs.clone()),
        TEST_PAGE_SIZE,
    );
    (fs, backend, blobs)
}
