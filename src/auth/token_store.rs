use crate::error::{DriveError, Result};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// On-disk credential record, one file per client identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl StoredToken {
    /// A record is worth restoring if it is still valid or can be refreshed.
    pub fn is_usable(&self) -> bool {
        Utc::now() < self.expiry || self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

pub struct TokenStore {
    dir: PathBuf,
}

impl TokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_path(&self, client_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", client_id))
    }

    /// Write the record to a temp file in the same directory, then rename it
    /// over the previous one.
    pub fn save_tokens(&self, client_id: &str, token: &StoredToken) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let serialized = serde_json::to_vec(token)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&serialized)?;
        tmp.as_file().sync_all()?;

        let path = self.file_path(client_id);
        tmp.persist(&path).map_err(|e| DriveError::Io(e.error.to_string()))?;
        debug!("Stored credentials in {}", path.display());
        Ok(())
    }

    /// `Ok(None)` when no record exists for this client.
    pub fn load_tokens(&self, client_id: &str) -> Result<Option<StoredToken>> {
        let path = self.file_path(client_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        let token: StoredToken = serde_json::from_str(&data)?;
        Ok(Some(token))
    }
}
