//! Assembly CRD replacement
//!
//! CRD manifests ship in the operator chart archive. Helm never upgrades
//! CRDs, so after a chart upgrade or rollback they are deleted and created
//! again from the archive of the operator version now installed.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;
use tar::{Archive, Builder, Header};

use crate::backend::DeleteOutcome;
use crate::cluster::ClusterOps;
use crate::error::{KubeError, Result};
use crate::interact::Interaction;
use crate::poll::PollPolicy;

/// CRDs owned by the operator chart
pub const ASSEMBLY_CRDS: [&str; 2] = [
    "assemblies.insights.kx.com",
    "assemblyresources.insights.kx.com",
];

/// Largest CRD manifest read from an archive
pub const MAX_CRD_BYTES: u64 = 2_000_000;

/// Path of a CRD manifest inside the operator chart archive
pub fn crd_entry(name: &str) -> String {
    let (plural, group) = name.split_once('.').unwrap_or((name, ""));
    format!("kxi-operator/crds/{}_{}.yaml", group, plural)
}

/// Read CRD manifests by name from a gzipped chart archive
///
/// Entries are read in one pass; each is capped at [`MAX_CRD_BYTES`].
pub fn read_crd_manifests(archive_path: &Path, names: &[&str]) -> Result<Vec<(String, Value)>> {
    let wanted: HashMap<String, &str> = names.iter().map(|n| (crd_entry(n), *n)).collect();
    let mut found: HashMap<&str, Value> = HashMap::new();

    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    for entry in archive.entries()? {
        let entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();
        let Some(name) = wanted.get(&path) else {
            continue;
        };

        let mut content = Vec::new();
        entry.take(MAX_CRD_BYTES + 1).read_to_end(&mut content)?;
        if content.len() as u64 > MAX_CRD_BYTES {
            return Err(KubeError::Archive(format!(
                "Refused to load more than {} bytes from {}",
                MAX_CRD_BYTES, path
            )));
        }

        let manifest: Value = serde_yaml::from_slice(&content)?;
        found.insert(*name, manifest);
    }

    names
        .iter()
        .map(|name| {
            found
                .remove(name)
                .map(|manifest| (name.to_string(), manifest))
                .ok_or_else(|| {
                    KubeError::Archive(format!(
                        "File {} not found in {}",
                        crd_entry(name),
                        archive_path.display()
                    ))
                })
        })
        .collect()
}

/// Write a gzipped tar archive holding `entries`
pub fn build_chart_archive(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    let encoder = GzEncoder::new(File::create(path)?, Compression::default());
    let mut builder = Builder::new(encoder);

    for (name, content) in entries {
        let mut header = Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, name, *content)?;
    }

    builder.into_inner()?.finish()?.flush()?;
    Ok(())
}

/// Minimal CRD manifest, for archives built in tests and by the mock Helm
pub fn stub_crd_manifest(name: &str) -> String {
    let (plural, group) = name.split_once('.').unwrap_or((name, ""));
    format!(
        "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: {name}\nspec:\n  group: {group}\n  names:\n    plural: {plural}\n  scope: Namespaced\n"
    )
}

/// Deletes and recreates CRDs
pub struct CrdReplacer {
    cluster: Arc<dyn ClusterOps>,
    ui: Arc<dyn Interaction>,
    poll: PollPolicy,
}

impl CrdReplacer {
    pub fn new(cluster: Arc<dyn ClusterOps>, ui: Arc<dyn Interaction>) -> Self {
        Self {
            cluster,
            ui,
            poll: PollPolicy::fixed(Duration::from_secs(1)),
        }
    }

    /// Replace every assembly CRD from the operator chart archive
    pub async fn replace_from_archive(&self, archive_path: &Path) -> Result<()> {
        for (name, manifest) in read_crd_manifests(archive_path, &ASSEMBLY_CRDS)? {
            self.replace(&name, &manifest).await?;
        }
        Ok(())
    }

    /// Delete `name`, wait for it to disappear, then create it from `manifest`
    pub async fn replace(&self, name: &str, manifest: &Value) -> Result<()> {
        self.ui.info(&format!("Replacing CRD {}", name));

        if self.cluster.delete_crd(name).await? == DeleteOutcome::AlreadyAbsent {
            tracing::debug!(crd = name, "CRD was not installed");
        }

        let progress = self.ui.progress(u64::from(self.poll.max_attempts), "Waiting for CRD deletion");
        let gone = self
            .poll
            .until(
                || async move {
                    match self.cluster.crd_exists(name).await {
                        Ok(exists) => !exists,
                        Err(e) => {
                            tracing::warn!(crd = name, error = %e, "CRD existence check failed");
                            false
                        }
                    }
                },
                &progress,
            )
            .await;

        if !gone {
            return Err(KubeError::Timeout(format!(
                "Timed out waiting for CRD {} to be deleted",
                name
            )));
        }

        self.cluster.create_crd(manifest).await
    }

    /// Names of the assembly CRDs currently installed
    pub async fn existing(&self) -> Result<Vec<String>> {
        let mut existing = Vec::new();
        for name in ASSEMBLY_CRDS {
            if self.cluster.crd_exists(name).await? {
                existing.push(name.to_string());
            }
        }
        Ok(existing)
    }

    /// Delete CRDs without recreating them
    pub async fn delete(&self, names: &[String]) -> Result<()> {
        for name in names {
            self.ui.info(&format!("Deleting CRD {}", name));
            self.cluster.delete_crd(name).await?;
        }
        Ok(())
    }
}
