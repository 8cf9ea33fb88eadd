//! Server configuration file.

use blocker_core::BlockerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Listener, authentication and limits, plus the engine sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: SocketAddr,
    /// Shared secret for request signatures
    pub shared_key: Option<String>,
    /// File holding the shared secret, read when `shared_key` is unset
    pub shared_key_file: Option<PathBuf>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Largest accepted upload body
    pub max_upload_bytes: usize,
    /// Engine, storage, cipher and metadata sections
    #[serde(flatten)]
    pub blocker: BlockerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8010)),
            shared_key: None,
            shared_key_file: None,
            request_timeout_secs: 300,
            max_upload_bytes: 1024 * 1024 * 1024,
            blocker: BlockerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The signing secret: inline value first, then the key file.
    pub fn resolve_shared_key(&self) -> anyhow::Result<Option<Vec<u8>>> {
        if let Some(key) = self.shared_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(Some(key.as_bytes().to_vec()));
        }
        match &self.shared_key_file {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("cannot read shared key file {}: {}", path.display(), e)
                })?;
                let key = contents.trim();
                if key.is_empty() {
                    anyhow::bail!("shared key file {} is empty", path.display());
                }
                Ok(Some(key.as_bytes().to_vec()))
            }
            None => Ok(None),
        }
    }
}
