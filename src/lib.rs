//! Cloud drive filesystem core
//!
//! Exposes a REST-backed drive as a hierarchical filesystem: lazily loaded
//! node tree, streaming reads, and append-only writes uploaded to the blob
//! store in growing chunks.

pub mod auth;
pub mod config;
pub mod drive_service;
pub mod error;
pub mod log_appender;
pub mod upload;
pub mod vfs;

pub use error::{DriveError, Result};
pub use vfs::{DriveFs, OpenOptions};
