//! Assembly lifecycle manager
//!
//! Backup, restore, deploy and teardown on top of an [`AssemblyBackend`].
//! Bulk operations run one item at a time in listing order and collect a
//! per-item outcome, so one failing assembly never stops its siblings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kxi_core::{Assembly, AssemblySummary, BackupSet, DEFAULT_BACKUP_FILE};
use serde_json::Value;

use crate::backend::{AssemblyBackend, AssemblyQuery, AssemblyState, DeleteOutcome};
use crate::error::Result;
use crate::interact::Interaction;
use crate::poll::{MAX_ATTEMPTS, PollPolicy};

/// Result of one teardown request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Deleted, and gone if waiting was requested
    Deleted,
    /// Nothing to delete
    AlreadyAbsent,
    /// The user answered no
    Declined,
    /// The backend rejected the request
    Failed(String),
    /// Deleted but still present when polling ran out
    TimedOut,
}

impl TeardownOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Deleted | Self::AlreadyAbsent)
    }
}

/// Result of submitting one assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created,
    /// Created but not ready when polling ran out
    NotReady,
    Failed(String),
}

/// One item of a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub name: String,
    pub outcome: SubmitOutcome,
}

impl Submission {
    pub fn is_success(&self) -> bool {
        self.outcome == SubmitOutcome::Created
    }
}

/// `[a, b]` for messages
pub(crate) fn name_list(names: &[String]) -> String {
    format!("[{}]", names.join(", "))
}

/// Lifecycle operations over one backend
#[derive(Clone)]
pub struct AssemblyManager {
    backend: Arc<dyn AssemblyBackend>,
    ui: Arc<dyn Interaction>,
    poll: PollPolicy,
}

impl AssemblyManager {
    pub fn new(backend: Arc<dyn AssemblyBackend>, ui: Arc<dyn Interaction>) -> Self {
        Self {
            backend,
            ui,
            poll: PollPolicy::default(),
        }
    }

    /// Override the readiness and teardown polling policy
    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn backend(&self) -> &dyn AssemblyBackend {
        self.backend.as_ref()
    }

    /// Summaries of the assemblies in `namespace`
    pub async fn list(&self, namespace: &str) -> Result<Vec<AssemblySummary>> {
        self.backend.list(namespace).await
    }

    /// Full resources matching `query`
    pub async fn list_resources(&self, query: &AssemblyQuery) -> Result<Vec<Assembly>> {
        self.backend.list_resources(query).await
    }

    /// Assemblies in any namespace other than `namespace`
    pub async fn running_elsewhere(&self, namespace: &str) -> Result<Vec<Assembly>> {
        self.backend
            .list_resources(&AssemblyQuery::cluster_excluding(namespace))
            .await
    }

    /// Current status of one assembly
    pub async fn status(&self, namespace: &str, name: &str) -> Result<Option<AssemblyState>> {
        self.backend.status(namespace, name).await
    }

    /// Write the last-applied definitions of every assembly in `namespace`
    ///
    /// Returns the file written, or `None` when there was nothing to back up.
    /// Assemblies without a last-applied annotation are left out and named
    /// in a warning.
    pub async fn backup(
        &self,
        namespace: &str,
        path: Option<&Path>,
        force: bool,
    ) -> Result<Option<PathBuf>> {
        let live = self
            .backend
            .list_resources(&AssemblyQuery::in_namespace(namespace))
            .await?;

        if live.is_empty() {
            self.ui.info("No assemblies to back up");
            return Ok(None);
        }

        let collection = BackupSet::collect(&live);
        if !collection.skipped.is_empty() {
            self.ui.warn(&format!(
                "Refusing to backup assemblies: {}. These assemblies are missing '{}' annotation. Please restart these assemblies manually.",
                name_list(&collection.skipped),
                kxi_core::assembly::CONFIG_ANNOTATION,
            ));
        }
        for (name, reason) in &collection.unreadable {
            tracing::warn!(name = %name, reason = %reason, "unreadable last-applied annotation");
            self.ui.warn(&format!(
                "Refusing to backup assembly {}, its '{}' annotation is invalid: {}",
                name,
                kxi_core::assembly::CONFIG_ANNOTATION,
                reason
            ));
        }
        if collection.set.is_empty() {
            tracing::info!(
                skipped = collection.skipped.len() + collection.unreadable.len(),
                "every assembly was skipped, no backup file written"
            );
            self.ui
                .info("No assemblies to back up, no backup file was written");
            return Ok(None);
        }

        let target = self.backup_target(path, force)?;
        collection.set.save(&target)?;
        tracing::info!(path = %target.display(), count = collection.set.len(), "wrote assembly backup");

        self.ui.info(&format!(
            "Persisted assembly definitions for {} to {}",
            name_list(&collection.backed_up),
            target.display()
        ));
        Ok(Some(target))
    }

    fn backup_target(&self, path: Option<&Path>, force: bool) -> Result<PathBuf> {
        let mut target = match path {
            Some(p) => p.to_path_buf(),
            None => tempfile::Builder::new()
                .prefix("kxi-")
                .tempdir()?
                .keep()
                .join(DEFAULT_BACKUP_FILE),
        };

        while target.exists() && !force {
            let overwrite = self.ui.confirm(
                &format!(
                    "\n{} file exists. Do you want to overwrite it with a new assembly backup file?",
                    target.display()
                ),
                false,
            )?;
            if overwrite {
                break;
            }
            target = PathBuf::from(
                self.ui
                    .prompt("Please enter the path to write the assembly backup file", None)?,
            );
        }
        Ok(target)
    }

    /// Submit every item of a backup or assembly file
    pub async fn restore_file(
        &self,
        namespace: &str,
        path: &Path,
        wait: bool,
    ) -> Result<Vec<Submission>> {
        let set = BackupSet::load(path)?;
        self.ui
            .info(&format!("Submitting assembly from {}", path.display()));
        self.restore(namespace, &set, wait).await
    }

    /// Submit every item of `set` independently
    pub async fn restore(
        &self,
        namespace: &str,
        set: &BackupSet,
        wait: bool,
    ) -> Result<Vec<Submission>> {
        let mut results = Vec::with_capacity(set.len());

        for item in &set.items {
            let name = item_name(item);
            let outcome = match Assembly::from_value(item.clone()) {
                Ok(assembly) => match self.deploy(namespace, assembly, wait).await {
                    Ok(true) => SubmitOutcome::Created,
                    Ok(false) => SubmitOutcome::NotReady,
                    Err(e) => {
                        self.ui.error(&e.to_string());
                        SubmitOutcome::Failed(e.to_string())
                    }
                },
                Err(e) => {
                    self.ui.error(&e.to_string());
                    SubmitOutcome::Failed(e.to_string())
                }
            };
            results.push(Submission { name, outcome });
        }

        Ok(results)
    }

    /// Annotate and submit one assembly, optionally waiting for readiness
    ///
    /// Returns `false` only when waiting ran out before the assembly became
    /// ready.
    pub async fn deploy(&self, namespace: &str, assembly: Assembly, wait: bool) -> Result<bool> {
        let mut assembly = assembly;
        let name = assembly.require_name()?.to_string();
        assembly.strip_resource_version();
        assembly.annotate_last_applied()?;
        let target = assembly.namespace().unwrap_or(namespace).to_string();

        self.ui.info(&format!("Submitting assembly {}", name));
        self.backend.create(&target, &assembly).await?;
        self.ui
            .info(&format!("Custom assembly resource {} created!", name));

        if wait {
            return Ok(self.wait_ready(&target, &name).await);
        }
        Ok(true)
    }

    /// Poll until the assembly reports ready
    pub async fn wait_ready(&self, namespace: &str, name: &str) -> bool {
        let progress = self.ui.progress(
            u64::from(MAX_ATTEMPTS),
            "Waiting for assembly to enter \"Ready\" state",
        );
        let ready = self
            .poll
            .until(
                || async move {
                    match self.backend.status(namespace, name).await {
                        Ok(state) => state.is_some_and(|s| s.ready),
                        Err(e) => {
                            tracing::warn!(name, error = %e, "status check failed");
                            false
                        }
                    }
                },
                &progress,
            )
            .await;

        if !ready {
            tracing::error!(name, "assembly did not become ready");
            self.ui.error("Assembly was not deployed in time, exiting");
        }
        ready
    }

    /// Poll until the assembly no longer exists
    pub async fn wait_gone(&self, namespace: &str, name: &str) -> bool {
        let progress = self
            .ui
            .progress(u64::from(MAX_ATTEMPTS), "Waiting for assembly to be torn down");
        let gone = self
            .poll
            .until(
                || async move {
                    match self.backend.status(namespace, name).await {
                        Ok(state) => state.is_none(),
                        Err(e) if e.is_not_found() => true,
                        Err(e) => {
                            tracing::warn!(name, error = %e, "status check failed");
                            false
                        }
                    }
                },
                &progress,
            )
            .await;

        if !gone {
            tracing::error!(name, "assembly still present");
            self.ui.error("Assembly was not torn down in time, exiting");
        }
        gone
    }

    /// Tear down one assembly
    ///
    /// Asks for confirmation unless `force`. A missing assembly counts as
    /// already torn down.
    pub async fn delete(
        &self,
        namespace: &str,
        name: &str,
        wait: bool,
        force: bool,
    ) -> Result<TeardownOutcome> {
        self.ui.info(&format!("Tearing down assembly {}", name));

        if !force
            && !self
                .ui
                .confirm(&format!("Are you sure you want to teardown {}", name), false)?
        {
            self.ui.info(&format!("Not tearing down assembly {}", name));
            return Ok(TeardownOutcome::Declined);
        }

        match self.backend.delete(namespace, name).await {
            Ok(DeleteOutcome::AlreadyAbsent) => {
                self.ui
                    .info(&format!("Ignoring teardown, {} not found", name));
                Ok(TeardownOutcome::AlreadyAbsent)
            }
            Ok(DeleteOutcome::Deleted) => {
                if wait && !self.wait_gone(namespace, name).await {
                    return Ok(TeardownOutcome::TimedOut);
                }
                Ok(TeardownOutcome::Deleted)
            }
            Err(e) => {
                tracing::error!(name, error = %e, "teardown failed");
                self.ui.error(&e.to_string());
                Ok(TeardownOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Tear down every assembly listed in `namespace`, in listing order
    pub async fn delete_all(
        &self,
        namespace: &str,
        wait: bool,
        force: bool,
    ) -> Result<Vec<(String, TeardownOutcome)>> {
        let mut outcomes = Vec::new();
        for summary in self.backend.list(namespace).await? {
            let outcome = self.delete(namespace, &summary.name, wait, force).await?;
            outcomes.push((summary.name, outcome));
        }
        Ok(outcomes)
    }
}

fn item_name(item: &Value) -> String {
    item.pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string()
}
