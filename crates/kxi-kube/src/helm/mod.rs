//! Helm collaborator
//!
//! Charts are installed, upgraded and rolled back by running the `helm`
//! binary. [`HelmClient`] is the narrow surface the orchestrator needs;
//! [`HelmCli`] runs the binary and [`MockHelm`] keeps releases in memory.

mod cli;
mod mock;

pub use cli::HelmCli;
pub use mock::{HelmCall, MockHelm};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use kxi_core::{ChartVersion, HelmRevision, InstalledRelease};

use crate::error::Result;

/// A configured chart repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoEntry {
    pub name: String,
    pub url: String,
}

/// Arguments for `helm upgrade --install`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallRequest {
    pub release: String,
    /// `repo/chart`
    pub chart: String,
    pub version: Option<String>,
    pub namespace: String,
    pub values_file: Option<PathBuf>,
    /// Values document piped to `-f -`
    pub values_stdin: Option<String>,
}

impl InstallRequest {
    /// Short description for progress output
    pub fn describe(&self) -> String {
        let version = self
            .version
            .as_deref()
            .map(|v| format!(" version {}", v))
            .unwrap_or_default();
        let source = match (&self.values_stdin, &self.values_file) {
            (Some(_), Some(file)) => format!(
                "values from secret and values file from {}",
                file.display()
            ),
            (None, Some(file)) => format!("values file from {}", file.display()),
            (Some(_), None) => "values from secret".to_string(),
            (None, None) => "default values".to_string(),
        };
        format!("Installing chart {}{} with {}", self.chart, version, source)
    }
}

/// Chart name without its repository prefix
pub fn chart_basename(chart: &str) -> &str {
    chart.rsplit('/').next().unwrap_or(chart)
}

/// Operations on Helm releases and repositories
#[async_trait]
pub trait HelmClient: Send + Sync {
    async fn repo_list(&self) -> Result<Vec<RepoEntry>>;

    async fn repo_add(
        &self,
        name: &str,
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()>;

    async fn repo_update(&self) -> Result<()>;

    /// Search a repository chart; `all_versions` adds `--devel -l`
    async fn search(
        &self,
        chart: &str,
        version: Option<&str>,
        all_versions: bool,
    ) -> Result<Vec<ChartVersion>>;

    /// Deployed releases named `release` in `namespace`
    async fn list_deployed(&self, release: &str, namespace: &str) -> Result<Vec<InstalledRelease>>;

    async fn upgrade_install(&self, request: &InstallRequest) -> Result<()>;

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()>;

    /// Revision history, empty when the release does not exist
    async fn history(&self, release: &str, namespace: &str) -> Result<Vec<HelmRevision>>;

    async fn rollback(&self, release: &str, revision: u32, namespace: &str) -> Result<()>;

    /// Download a chart archive into `destination`, returning its path
    async fn fetch(&self, chart: &str, version: &str, destination: &Path) -> Result<PathBuf>;
}
