pub mod file_handle;
pub mod filesystem;
pub mod node;
pub mod path_utils;
pub mod tree;

pub use file_handle::FileHandle;
pub use filesystem::{DriveFs, OpenOptions, ReadDir};
pub use node::{LoadState, Metadata, Node};
pub use tree::NodeTree;
