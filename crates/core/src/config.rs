use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GatewayError, Result};

const APP_DIR: &str = "gsuite-tools";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// OAuth client id/secret downloaded from the Google Cloud console.
    pub client_secret_path: PathBuf,
    /// Where the access/refresh token pair is persisted.
    pub token_path: PathBuf,
    pub request_timeout_secs: u64,
    pub consent_timeout_secs: u64,
    /// Whether an expired or revoked credential may fall back to the browser
    /// consent flow. Servers without a browser should turn this off.
    pub interactive_consent: bool,
    pub http_bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let base = default_config_dir();
        Self {
            client_secret_path: base.join("credentials.json"),
            token_path: base.join("token.json"),
            request_timeout_secs: 30,
            consent_timeout_secs: 300,
            interactive_consent: true,
            http_bind: "127.0.0.1:8000".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent_timeout_secs)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            GatewayError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(Into::into)
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
