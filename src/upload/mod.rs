pub mod content_type;
pub mod session;
pub mod signer;

pub use session::{UploadEngine, UploadSession, UPLOAD_BLOCK_LEN};
