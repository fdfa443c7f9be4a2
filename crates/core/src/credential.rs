use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{GatewayError, Result};

pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";
pub const GMAIL_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

pub const REQUIRED_SCOPES: &[&str] = &[CALENDAR_SCOPE, GMAIL_SCOPE];

/// Tokens this close to expiry are refreshed early.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expiry: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Credential {
    pub fn has_required_scopes(&self) -> bool {
        REQUIRED_SCOPES
            .iter()
            .all(|req| self.scopes.iter().any(|s| s == req))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now + Duration::seconds(EXPIRY_SKEW_SECS)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && self.has_required_scopes() && !self.is_expired()
    }

    pub fn can_refresh(&self) -> bool {
        self.has_required_scopes()
            && self
                .refresh_token
                .as_deref()
                .is_some_and(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::auth(format!(
                "cannot read client secret file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(content)
            .map_err(|e| GatewayError::auth(format!("malformed client secret file: {}", e)))?;
        file.installed.or(file.web).ok_or_else(|| {
            GatewayError::auth("client secret file has no `installed` or `web` section")
        })
    }
}

/// Single-file JSON persistence for the credential.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<Credential> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot read token file");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(cred) => Some(cred),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "ignoring malformed token file"
                );
                None
            }
        }
    }

    /// Writes to a sibling temp file and renames it over the target.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(serde_json::to_string_pretty(credential)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| GatewayError::Io(e.error))?;

        tracing::debug!(path = %self.path.display(), "persisted credential");
        Ok(())
    }
}
