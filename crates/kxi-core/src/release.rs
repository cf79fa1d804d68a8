//! Helm release records
//!
//! Shapes of the JSON Helm prints for `list`, `history` and `search repo`.
//! Helm reports revisions as strings in `list` and as numbers in `history`;
//! both are accepted.

use serde::{Deserialize, Deserializer, Serialize};

/// A deployed Helm release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledRelease {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default, deserialize_with = "revision_from_any")]
    pub revision: u32,

    #[serde(default)]
    pub updated: String,

    #[serde(default)]
    pub status: ReleaseStatus,

    /// Chart name and version, e.g. `insights-1.2.3`
    pub chart: String,

    #[serde(default)]
    pub app_version: String,
}

impl InstalledRelease {
    /// Version part of the chart reference
    pub fn chart_version(&self) -> &str {
        chart_version(&self.chart)
    }
}

/// One entry of `helm history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmRevision {
    #[serde(deserialize_with = "revision_from_any")]
    pub revision: u32,

    #[serde(default)]
    pub updated: String,

    #[serde(default)]
    pub status: ReleaseStatus,

    pub chart: String,

    #[serde(default)]
    pub app_version: String,

    #[serde(default)]
    pub description: String,
}

impl HelmRevision {
    pub fn chart_version(&self) -> &str {
        chart_version(&self.chart)
    }
}

/// One entry of `helm search repo`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartVersion {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub description: String,
}

/// Release status as reported by Helm
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ReleaseStatus {
    Deployed,
    Uninstalled,
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Deployed => "deployed",
            Self::Uninstalled => "uninstalled",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
            Self::Uninstalling => "uninstalling",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::PendingRollback => "pending-rollback",
        };
        write!(f, "{}", s)
    }
}

/// Strip the chart name from `name-version`
///
/// The version starts at the first `-` followed by a digit, so chart names
/// containing dashes (`kxi-operator-1.2.0`) are handled.
pub fn chart_version(chart: &str) -> &str {
    let bytes = chart.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'-' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
            return &chart[i + 1..];
        }
    }
    chart
}

fn revision_from_any<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
