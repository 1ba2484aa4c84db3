//! CLI configuration.
//!
//! Stored as JSON under the platform config directory. Flags and
//! environment variables override the file per invocation.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use slotsync_engine::EngineConfig;

/// Configuration file name.
const CONFIG_FILE: &str = "config.json";

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "slotsync", "slotctl")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// Get the config directory path.
fn config_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the remote label service.
    #[serde(default = "default_remote_url")]
    pub remote_url: String,

    /// Number of physical spaces in the pool.
    #[serde(default)]
    pub total_spaces: u32,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_virtual_pool_prefix")]
    pub virtual_pool_prefix: String,

    /// Attribute keys blanked when a space is vacated.
    #[serde(default = "default_identifying_fields")]
    pub identifying_fields: Vec<String>,

    /// State directory; the platform data directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

fn default_remote_url() -> String {
    EngineConfig::default().remote_url
}

fn default_page_size() -> u32 {
    EngineConfig::default().page_size
}

fn default_retry_attempts() -> u32 {
    EngineConfig::default().retry_attempts
}

fn default_virtual_pool_prefix() -> String {
    EngineConfig::default().virtual_pool_prefix
}

fn default_identifying_fields() -> Vec<String> {
    EngineConfig::default().identifying_fields
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_url: default_remote_url(),
            total_spaces: 0,
            page_size: default_page_size(),
            retry_attempts: default_retry_attempts(),
            virtual_pool_prefix: default_virtual_pool_prefix(),
            identifying_fields: default_identifying_fields(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Load config from disk, or return default.
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join(CONFIG_FILE);

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        let dir = config_dir()?;
        fs::create_dir_all(&dir)?;
        write_private(&dir.join(CONFIG_FILE), &serde_json::to_string_pretty(self)?)
    }

    /// Resolved state directory.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_dir().to_path_buf()),
        }
    }

    /// Engine settings for this invocation.
    pub fn engine(&self) -> Result<EngineConfig> {
        let config = EngineConfig {
            remote_url: self.remote_url.clone(),
            total_spaces: self.total_spaces,
            page_size: self.page_size,
            retry_attempts: self.retry_attempts,
            virtual_pool_prefix: self.virtual_pool_prefix.clone(),
            identifying_fields: self.identifying_fields.clone(),
            data_dir: self.data_dir()?.to_string_lossy().into_owned(),
            ..EngineConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// Write a file readable only by the current user.
fn write_private(path: &std::path::Path, contents: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        file.write_all(contents.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))?;
    }

    Ok(())
}
