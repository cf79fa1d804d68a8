//! CLI profile configuration
//!
//! Stores named profiles in `~/.config/kxi/config.yaml`. A profile fills in
//! options that were not given on the command line or in the environment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ClientError, Result};

/// Name of the profile used when none is selected
pub const DEFAULT_PROFILE: &str = "default";

/// Built-in fallbacks for profile settings
pub mod defaults {
    pub const NAMESPACE: &str = "kxi";
    pub const RELEASE: &str = "insights";
    pub const REALM: &str = "insights";
    pub const CHART_REPO_NAME: &str = "kx-insights";
    pub const CHART_REPO_URL: &str = "https://nexus.dl.kx.com/repository/kx-insights-charts";
    pub const INSTALL_CONFIG_SECRET: &str = "kxi-install-config";
    pub const LICENSE_SECRET: &str = "kxi-license";
    pub const IMAGE_REPOSITORY: &str = "registry.dl.kx.com";
    pub const IMAGE_PULL_SECRET: &str = "kxi-nexus-pull-secret";
    pub const CLIENT_CERT_SECRET: &str = "kxi-certificate";
    pub const KEYCLOAK_SECRET: &str = "kxi-keycloak";
    pub const POSTGRESQL_SECRET: &str = "kxi-postgresql";
    pub const VALUES_OUTPUT_FILE: &str = "values.yaml";
}

/// Configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

/// One named set of defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_repo_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_backup_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_config_secret: Option<String>,
}

impl CliConfig {
    /// Load configuration from default location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ClientError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("kxi").join("config.yaml"))
    }

    /// Profile by name
    ///
    /// The default profile may be absent, in which case it is empty. Any
    /// other name must exist.
    pub fn profile(&self, name: &str) -> Result<Profile> {
        match self.profiles.get(name) {
            Some(profile) => Ok(profile.clone()),
            None if name == DEFAULT_PROFILE => Ok(Profile::default()),
            None => Err(ClientError::ProfileNotFound {
                name: name.to_string(),
            }),
        }
    }

    pub fn set_profile(&mut self, name: &str, profile: Profile) {
        self.profiles.insert(name.to_string(), profile);
    }
}

/// Strip scheme and trailing slashes from a user-supplied hostname
pub fn sanitize_hostname(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

/// `https://<host>/` for a user-supplied hostname
pub fn https_base(hostname: &str) -> Result<url::Url> {
    let host = sanitize_hostname(hostname);
    if host.is_empty() {
        return Err(ClientError::InvalidConfig {
            message: "hostname is required".to_string(),
        });
    }
    let raw = format!("https://{}/", host);
    url::Url::parse(&raw).map_err(|e| ClientError::InvalidUrl {
        url: raw,
        reason: e.to_string(),
    })
}
