//! Install values lookups
//!
//! The platform is installed from a Helm values file, a values document kept
//! in a Kubernetes secret, or both. A few settings the installer itself needs
//! (secret names to copy into the operator namespace) are read from them.

use std::path::Path;

use serde_yaml::Value;

use crate::error::{CoreError, Result};

/// Default name of the image pull secret
pub const DEFAULT_IMAGE_PULL_SECRET: &str = "kxi-nexus-pull-secret";

/// Default name of the kdb+ license secret
pub const DEFAULT_LICENSE_SECRET: &str = "kxi-license";

/// One segment of a lookup path into a values document
#[derive(Debug, Clone, Copy)]
pub enum Key<'a> {
    Field(&'a str),
    Index(usize),
}

const IMAGE_PULL_SECRET_PATH: &[Key<'static>] = &[
    Key::Field("global"),
    Key::Field("imagePullSecrets"),
    Key::Index(0),
    Key::Field("name"),
];

const LICENSE_SECRET_PATH: &[Key<'static>] = &[
    Key::Field("global"),
    Key::Field("license"),
    Key::Field("secretName"),
];

/// Values available to an install or upgrade
#[derive(Debug, Clone, Default)]
pub struct InstallValues {
    /// Parsed values file
    file: Option<Value>,
    /// Raw values document read from the install config secret
    secret_raw: Option<String>,
    secret: Option<Value>,
}

impl InstallValues {
    /// Load from an optional values file and an optional secret document
    pub fn load(file: Option<&Path>, secret: Option<String>) -> Result<Self> {
        let file = match file {
            Some(path) => {
                if !path.exists() {
                    return Err(CoreError::FileNotFound {
                        path: path.display().to_string(),
                    });
                }
                let content = std::fs::read_to_string(path)?;
                Some(serde_yaml::from_str(&content).map_err(|_| CoreError::InvalidValues {
                    message: format!("Invalid values file {}", path.display()),
                })?)
            }
            None => None,
        };

        let parsed_secret = match &secret {
            Some(raw) => Some(serde_yaml::from_str(raw).map_err(|_| CoreError::InvalidValues {
                message: "Invalid values secret".to_string(),
            })?),
            None => None,
        };

        Ok(Self {
            file,
            secret_raw: secret,
            secret: parsed_secret,
        })
    }

    /// True when neither a file nor a secret was supplied
    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.secret.is_none()
    }

    /// Raw secret document, fed to Helm on stdin
    pub fn secret_document(&self) -> Option<&str> {
        self.secret_raw.as_deref()
    }

    /// Look up a string, values file first, then secret
    pub fn lookup(&self, path: &[Key<'_>]) -> Option<String> {
        [self.file.as_ref(), self.secret.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|doc| walk(doc, path))
    }

    /// Image pull secret: explicit name, then values, then default
    pub fn image_pull_secret(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| self.lookup(IMAGE_PULL_SECRET_PATH))
            .unwrap_or_else(|| DEFAULT_IMAGE_PULL_SECRET.to_string())
    }

    /// License secret: explicit name, then values, then default
    pub fn license_secret(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| self.lookup(LICENSE_SECRET_PATH))
            .unwrap_or_else(|| DEFAULT_LICENSE_SECRET.to_string())
    }
}

fn walk(doc: &Value, path: &[Key<'_>]) -> Option<String> {
    let mut current = doc;
    for key in path {
        current = match key {
            Key::Field(name) => current.get(*name)?,
            Key::Index(i) => current.get(*i)?,
        };
    }
    current.as_str().map(str::to_string)
}
