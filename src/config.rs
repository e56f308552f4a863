use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

static SETTINGS_FILE_NAME: &str = "settings.json";

/// Resolved project directories plus the loaded settings.
pub struct ProjectConfig {
    pub settings: Settings,
    pub project_dirs: ProjectDirs,
}

impl ProjectConfig {
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "atonline", "drive-dav")
            .ok_or_else(|| anyhow!("Failed to get project directories"))?;
        for x in [proj_dirs.config_dir(), proj_dirs.cache_dir(), proj_dirs.data_dir()] {
            if !x.exists() {
                fs::create_dir_all(x).context("Failed to create project directory")?;
            }
        }

        let settings = Settings::new(&proj_dirs.config_dir().join(SETTINGS_FILE_NAME))?;
        Ok(Self {
            settings,
            project_dirs: proj_dirs,
        })
    }

    /// Directory holding persisted credentials.
    pub fn credentials_dir(&self) -> PathBuf {
        self.project_dirs.config_dir().to_path_buf()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.project_dirs.data_dir().to_path_buf()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub api: ApiConfig,
    pub oauth: OAuthConfig,
    /// Address the login callback server binds to
    pub listen_address: String,
    /// `results_per_page` sent with every listing call
    pub page_size: u32,
    pub request_timeout: Duration,
    /// log4rs root level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            oauth: OAuthConfig::default(),
            listen_address: "127.0.0.1:50500".to_string(),
            page_size: 1000,
            request_timeout: Duration::from_secs(300),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    pub rest_base: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rest_base: "https://www.atonline.com/_special/rest/".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OAuthConfig {
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            auth_endpoint: "https://hub.atonline.com/_special/rest/OAuth2:auth".to_string(),
            token_endpoint: "https://hub.atonline.com/_special/rest/OAuth2:token".to_string(),
            client_id: "oaap-k4ch3u-kibn-bovo-cb6t-uf463ufi".to_string(),
            redirect_uri: "http://localhost:50500/_login".to_string(),
            scope: "profile Drive".to_string(),
        }
    }
}

impl Settings {
    pub fn new(config_file_path: &Path) -> Result<Self> {
        match Self::load_settings_from_file(config_file_path) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Error loading settings from file - creating default config: {}", e);
                let default = Self::default();
                default.save_to_file(config_file_path)?;
                Ok(default)
            }
        }
    }

    pub fn load_settings_from_file(config_file_path: &Path) -> Result<Self> {
        if !config_file_path.exists() {
            return Err(anyhow!("Config file not found"));
        }
        let data = fs::read_to_string(config_file_path)?;
        let settings: Self = serde_json::from_str(&data)?;
        Ok(settings)
    }

    pub fn save_to_file(&self, config_file_path: &Path) -> Result<()> {
        if let Some(parent_path) = config_file_path.parent() {
            fs::create_dir_all(parent_path).context("Failed to create config directory")?;
        }

        let data = serde_json::to_string_pretty(self)?;
        fs::write(config_file_path, data)?;
        Ok(())
    }
}
