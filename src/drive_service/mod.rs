pub mod blob_client;
pub mod drive_client;
pub mod drive_models;
pub mod http_client;
