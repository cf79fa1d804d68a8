//! Service account credentials and the access token cache
//!
//! Tokens are cached per profile in `~/.config/kxi/credentials.yaml`,
//! written with owner-only permissions on Unix.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ClientError, Result};

/// Tokens this close to expiry are treated as expired
const EXPIRY_SKEW_SECONDS: i64 = 30;

/// Client credentials for the `client_credentials` grant
#[derive(Clone)]
pub struct ServiceAccount {
    pub client_id: String,
    pub client_secret: String,
}

impl ServiceAccount {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Build from optional parts, failing with a hint when one is missing
    pub fn require(client_id: Option<String>, client_secret: Option<String>) -> Result<Self> {
        match (client_id, client_secret) {
            (Some(id), Some(secret)) => Ok(Self::new(id, secret)),
            (None, _) => Err(ClientError::MissingCredentials {
                message: "set --client-id or INSIGHTS_CLIENT_ID".to_string(),
            }),
            (_, None) => Err(ClientError::MissingCredentials {
                message: "set --client-secret or INSIGHTS_CLIENT_SECRET".to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// An access token with its expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Token endpoint the token was minted by
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub client_id: String,
}

impl CachedToken {
    /// Token valid for `expires_in` seconds from `now`
    pub fn expiring_in(access_token: impl Into<String>, expires_in: i64, now: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: now + Duration::seconds(expires_in),
            issuer: String::new(),
            client_id: String::new(),
        }
    }

    /// Record which endpoint and client the token belongs to
    pub fn issued_by(mut self, issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self.client_id = client_id.into();
        self
    }

    /// Minted by `issuer` for `client_id`
    pub fn belongs_to(&self, issuer: &str, client_id: &str) -> bool {
        self.issuer == issuer && self.client_id == client_id
    }

    /// Usable at `now`, allowing for clock skew
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_SKEW_SECONDS) > now
    }
}

/// Token cache - access tokens keyed by profile name
///
/// An entry is only reused for the endpoint and client it was minted for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default)]
    tokens: HashMap<String, CachedToken>,
}

impl TokenCache {
    /// Load from specific path, empty when the file does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let cache: Self = serde_yaml::from_str(&content)?;
        Ok(cache)
    }

    /// Save to specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut options = std::fs::OpenOptions::new();
            options.write(true).create(true).truncate(true).mode(0o600);
            std::io::Write::write_all(&mut options.open(path)?, content.as_bytes())?;
            Ok(())
        }

        #[cfg(not(unix))]
        {
            std::fs::write(path, content)?;
            Ok(())
        }
    }

    /// Get default token cache path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ClientError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("kxi").join("credentials.yaml"))
    }

    pub fn get(&self, profile: &str) -> Option<&CachedToken> {
        self.tokens.get(profile)
    }

    pub fn set(&mut self, profile: &str, token: CachedToken) {
        self.tokens.insert(profile.to_string(), token);
    }

    pub fn remove(&mut self, profile: &str) -> Option<CachedToken> {
        self.tokens.remove(profile)
    }
}
