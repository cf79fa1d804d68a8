//! In-memory Helm for testing
//!
//! Keeps per-release revision histories and answers `search` from a fixed
//! catalogue. `fetch` writes an operator chart archive carrying stub assembly
//! CRDs so CRD replacement can run end to end.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use kxi_core::version::{parse_minor, parse_version};
use kxi_core::{ChartVersion, HelmRevision, InstalledRelease, ReleaseStatus};

use super::{HelmClient, InstallRequest, RepoEntry, chart_basename};
use crate::crd::{ASSEMBLY_CRDS, build_chart_archive, crd_entry, stub_crd_manifest};
use crate::error::{KubeError, Result};

/// A recorded Helm invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelmCall {
    RepoList,
    RepoAdd { name: String, url: String, username: Option<String> },
    RepoUpdate,
    Search { chart: String, version: Option<String> },
    ListDeployed { release: String, namespace: String },
    UpgradeInstall(InstallRequest),
    Uninstall { release: String, namespace: String },
    History { release: String, namespace: String },
    Rollback { release: String, revision: u32, namespace: String },
    Fetch { chart: String, version: String },
}

impl HelmCall {
    /// True for calls that change the cluster
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::UpgradeInstall(_) | Self::Uninstall { .. } | Self::Rollback { .. }
        )
    }
}

#[derive(Default)]
struct HelmState {
    repos: Vec<RepoEntry>,
    /// chart basename -> available versions
    catalogue: HashMap<String, Vec<String>>,
    /// (release, namespace) -> revisions, oldest first
    releases: HashMap<(String, String), Vec<HelmRevision>>,
    /// operation name -> stderr to fail with
    failures: HashMap<&'static str, String>,
    calls: Vec<HelmCall>,
}

/// In-memory Helm that records every call
#[derive(Clone, Default)]
pub struct MockHelm {
    state: Arc<RwLock<HelmState>>,
}

fn revision(number: u32, chart: &str, version: &str, status: ReleaseStatus) -> HelmRevision {
    HelmRevision {
        revision: number,
        updated: String::new(),
        status,
        chart: format!("{}-{}", chart, version),
        app_version: version.to_string(),
        description: String::new(),
    }
}

impl MockHelm {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, HelmState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: HelmCall) {
        self.write().calls.push(call);
    }

    fn check(&self, op: &'static str, command: &str) -> Result<()> {
        match self.state.read().unwrap_or_else(|e| e.into_inner()).failures.get(op) {
            Some(stderr) => Err(KubeError::Helm {
                command: format!("helm {}", command),
                stderr: stderr.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Add a configured repository
    pub fn with_repo(self, name: &str, url: &str) -> Self {
        self.write().repos.push(RepoEntry {
            name: name.to_string(),
            url: url.to_string(),
        });
        self
    }

    /// Versions available for a chart, by basename
    pub fn with_chart_versions(self, chart: &str, versions: &[&str]) -> Self {
        self.write().catalogue.insert(
            chart.to_string(),
            versions.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    /// A deployed release history; the last version is the deployed one
    pub fn with_release(self, release: &str, namespace: &str, chart: &str, versions: &[&str]) -> Self {
        let count = versions.len();
        let history = versions
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let status = if i + 1 == count {
                    ReleaseStatus::Deployed
                } else {
                    ReleaseStatus::Superseded
                };
                revision(i as u32 + 1, chart, v, status)
            })
            .collect();
        self.write()
            .releases
            .insert((release.to_string(), namespace.to_string()), history);
        self
    }

    /// Fail the named operation (`upgrade`, `rollback`, `uninstall`, ...)
    pub fn fail_on(&self, op: &'static str, stderr: &str) {
        self.write().failures.insert(op, stderr.to_string());
    }

    pub fn calls(&self) -> Vec<HelmCall> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .clone()
    }

    /// Calls that would change the cluster
    pub fn mutations(&self) -> Vec<HelmCall> {
        self.calls().into_iter().filter(HelmCall::is_mutation).collect()
    }

    /// Chart reference of the deployed revision
    pub fn deployed_chart(&self, release: &str, namespace: &str) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .releases
            .get(&(release.to_string(), namespace.to_string()))
            .and_then(|h| h.iter().rev().find(|r| r.status == ReleaseStatus::Deployed))
            .map(|r| r.chart.clone())
    }

    fn push_revision(&self, release: &str, namespace: &str, chart: &str, version: &str) {
        let mut state = self.write();
        let history = state
            .releases
            .entry((release.to_string(), namespace.to_string()))
            .or_default();
        for r in history.iter_mut() {
            if r.status == ReleaseStatus::Deployed {
                r.status = ReleaseStatus::Superseded;
            }
        }
        let next = history.last().map(|r| r.revision + 1).unwrap_or(1);
        history.push(revision(next, chart, version, ReleaseStatus::Deployed));
    }
}

#[async_trait]
impl HelmClient for MockHelm {
    async fn repo_list(&self) -> Result<Vec<RepoEntry>> {
        self.record(HelmCall::RepoList);
        Ok(self.state.read().unwrap_or_else(|e| e.into_inner()).repos.clone())
    }

    async fn repo_add(
        &self,
        name: &str,
        url: &str,
        username: Option<&str>,
        _password: Option<&str>,
    ) -> Result<()> {
        self.record(HelmCall::RepoAdd {
            name: name.to_string(),
            url: url.to_string(),
            username: username.map(str::to_string),
        });
        self.check("repo_add", "repo add")?;
        self.write().repos.push(RepoEntry {
            name: name.to_string(),
            url: url.to_string(),
        });
        Ok(())
    }

    async fn repo_update(&self) -> Result<()> {
        self.record(HelmCall::RepoUpdate);
        self.check("repo_update", "repo update")
    }

    async fn search(
        &self,
        chart: &str,
        version: Option<&str>,
        all_versions: bool,
    ) -> Result<Vec<ChartVersion>> {
        self.record(HelmCall::Search {
            chart: chart.to_string(),
            version: version.map(str::to_string),
        });
        self.check("search", "search repo")?;

        let name = chart_basename(chart);
        let wanted = version.and_then(|v| parse_minor(v).ok());
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<ChartVersion> = state
            .catalogue
            .get(name)
            .into_iter()
            .flatten()
            .filter(|v| wanted.is_none() || parse_minor(v).ok() == wanted)
            .filter(|v| all_versions || parse_version(v).is_ok_and(|p| p.pre.is_empty()))
            .map(|v| ChartVersion {
                name: chart.to_string(),
                version: v.clone(),
                app_version: v.clone(),
                description: String::new(),
            })
            .collect();
        if !all_versions {
            found.truncate(1);
        }
        Ok(found)
    }

    async fn list_deployed(&self, release: &str, namespace: &str) -> Result<Vec<InstalledRelease>> {
        self.record(HelmCall::ListDeployed {
            release: release.to_string(),
            namespace: namespace.to_string(),
        });
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .releases
            .get(&(release.to_string(), namespace.to_string()))
            .and_then(|h| h.iter().rev().find(|r| r.status == ReleaseStatus::Deployed))
            .map(|r| InstalledRelease {
                name: release.to_string(),
                namespace: namespace.to_string(),
                revision: r.revision,
                updated: r.updated.clone(),
                status: ReleaseStatus::Deployed,
                chart: r.chart.clone(),
                app_version: r.app_version.clone(),
            })
            .into_iter()
            .collect())
    }

    async fn upgrade_install(&self, request: &InstallRequest) -> Result<()> {
        self.record(HelmCall::UpgradeInstall(request.clone()));
        self.check("upgrade", "upgrade --install")?;

        let version = request.version.clone().unwrap_or_else(|| "0.0.0".to_string());
        self.push_revision(
            &request.release,
            &request.namespace,
            chart_basename(&request.chart),
            &version,
        );
        Ok(())
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        self.record(HelmCall::Uninstall {
            release: release.to_string(),
            namespace: namespace.to_string(),
        });
        self.check("uninstall", "uninstall")?;
        self.write()
            .releases
            .remove(&(release.to_string(), namespace.to_string()));
        Ok(())
    }

    async fn history(&self, release: &str, namespace: &str) -> Result<Vec<HelmRevision>> {
        self.record(HelmCall::History {
            release: release.to_string(),
            namespace: namespace.to_string(),
        });
        Ok(self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .releases
            .get(&(release.to_string(), namespace.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn rollback(&self, release: &str, revision: u32, namespace: &str) -> Result<()> {
        self.record(HelmCall::Rollback {
            release: release.to_string(),
            revision,
            namespace: namespace.to_string(),
        });
        self.check("rollback", "rollback")?;

        let target = self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .releases
            .get(&(release.to_string(), namespace.to_string()))
            .and_then(|h| h.iter().find(|r| r.revision == revision))
            .cloned()
            .ok_or_else(|| KubeError::Helm {
                command: format!("helm rollback {} {}", release, revision),
                stderr: format!("Error: release: not found revision {}", revision),
            })?;

        let chart = target.chart.clone();
        let version = target.chart_version().to_string();
        let name = chart.strip_suffix(&format!("-{}", version)).unwrap_or(&chart);
        self.push_revision(release, namespace, name, &version);
        Ok(())
    }

    async fn fetch(&self, chart: &str, version: &str, destination: &Path) -> Result<PathBuf> {
        self.record(HelmCall::Fetch {
            chart: chart.to_string(),
            version: version.to_string(),
        });
        self.check("fetch", "fetch")?;

        let path = destination.join(format!("{}-{}.tgz", chart_basename(chart), version));
        let manifests: Vec<(String, String)> = ASSEMBLY_CRDS
            .iter()
            .map(|n| (crd_entry(n), stub_crd_manifest(n)))
            .collect();
        let entries: Vec<(&str, &[u8])> = manifests
            .iter()
            .map(|(p, m)| (p.as_str(), m.as_bytes()))
            .collect();
        build_chart_archive(&path, &entries)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upgrade_and_rollback_history() {
        let helm = MockHelm::new().with_release("insights", "kxi", "insights", &["1.5.0"]);

        helm.upgrade_install(&InstallRequest {
            release: "insights".into(),
            chart: "kx-insights/insights".into(),
            version: Some("1.6.0".into()),
            namespace: "kxi".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(helm.deployed_chart("insights", "kxi").as_deref(), Some("insights-1.6.0"));

        helm.rollback("insights", 1, "kxi").await.unwrap();
        let history = helm.history("insights", "kxi").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].chart, "insights-1.5.0");
        assert_eq!(helm.mutations().len(), 2);
    }

    #[tokio::test]
    async fn test_search_filters_by_minor() {
        let helm = MockHelm::new().with_chart_versions(
            "kxi-operator",
            &["1.6.1", "1.6.1-rc.1", "1.6.0", "1.5.3"],
        );

        let all = helm
            .search("kx-insights/kxi-operator", Some("1.6"), true)
            .await
            .unwrap();
        let versions: Vec<_> = all.iter().map(|c| c.version.as_str()).collect();
        assert_eq!(versions, vec!["1.6.1", "1.6.1-rc.1", "1.6.0"]);

        let latest = helm
            .search("kx-insights/kxi-operator", Some("1.6"), false)
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version, "1.6.1");
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let helm = MockHelm::new();
        helm.fail_on("upgrade", "Error: UPGRADE FAILED: timed out");

        let err = helm
            .upgrade_install(&InstallRequest::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Command 'helm upgrade --install' failed: Error: UPGRADE FAILED: timed out"
        );
    }
}
