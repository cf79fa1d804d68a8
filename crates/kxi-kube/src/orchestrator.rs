//! Install, upgrade, rollback and uninstall orchestration
//!
//! Upgrades and rollbacks replace the charts underneath running assemblies:
//!
//! 1. Version and operator gates run first; a rejected combination stops
//!    before anything in the cluster changes.
//! 2. Assemblies are backed up to a file and torn down.
//! 3. Charts are upgraded (or rolled back) and the assembly CRDs replaced.
//! 4. Every backed-up assembly is submitted again.
//!
//! When a chart step fails the sequence stops before step 4. Assemblies stay
//! torn down and the backup file is left for manual recovery.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kxi_core::version::{
    check_rollback_minor_match, check_upgrade_version, is_minor_compatible, minor_version,
    select_matching_operator_version,
};
use kxi_core::{
    BackupSet, ChartVersion, CoreError, HelmRevision, InstallValues, InstalledRelease,
    ReleaseStatus,
};

use crate::cluster::{ClusterOps, OPERATOR_NAMESPACE};
use crate::crd::CrdReplacer;
use crate::error::{KubeError, Result};
use crate::helm::{HelmClient, InstallRequest};
use crate::interact::Interaction;
use crate::lifecycle::{AssemblyManager, TeardownOutcome, name_list};
use crate::setup::{Setup, SetupOptions, SetupResult};

/// Operator chart name
pub const OPERATOR_CHART: &str = "kxi-operator";

/// Platform chart name
pub const INSIGHTS_CHART: &str = "insights";

/// Key of the values document in the install config secret
pub const VALUES_SECRET_KEY: &str = "values.yaml";

/// A Helm chart repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRepo {
    pub name: String,
    /// Suggested when the repository has to be added
    pub url: String,
}

impl ChartRepo {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// `repo/chart`
    pub fn chart(&self, chart: &str) -> String {
        format!("{}/{}", self.name, chart)
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Complete { version: Option<String> },
    /// The user answered no to a gate; nothing was changed
    Declined,
    /// Stopped part way; `backup` holds the assembly backup if one was written
    Aborted {
        reason: String,
        backup: Option<PathBuf>,
    },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Options for `install run` and `install upgrade`
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub namespace: String,
    pub release: String,
    pub repo: ChartRepo,
    pub version: String,
    /// Explicit operator version, otherwise the best compatible one
    pub operator_version: Option<String>,
    pub values_file: Option<PathBuf>,
    pub install_config_secret: Option<String>,
    pub image_pull_secret: Option<String>,
    pub license_secret: Option<String>,
    pub backup_file: Option<PathBuf>,
    pub force: bool,
}

/// Options for `install rollback`
#[derive(Debug, Clone)]
pub struct RollbackOptions {
    pub namespace: String,
    pub release: String,
    pub repo: ChartRepo,
    /// Target platform revision, default the one before the current
    pub revision: Option<u32>,
    pub operator_revision: Option<u32>,
    pub backup_file: Option<PathBuf>,
    pub force: bool,
}

/// Options for `install delete`
#[derive(Debug, Clone)]
pub struct UninstallOptions {
    pub namespace: String,
    pub release: String,
    pub uninstall_operator: bool,
    pub backup_file: Option<PathBuf>,
    pub force: bool,
}

/// What to do with the operator chart
#[derive(Debug, Clone, PartialEq, Eq)]
enum OperatorPlan {
    Install(String),
    Keep,
}

/// Either carry on with a value or stop with an outcome
enum Gate<T> {
    Proceed(T),
    Stop(Outcome),
}

/// Chart mutation performed between teardown and reapply
enum ChartChange<'a> {
    Upgrade {
        opts: &'a InstallOptions,
        values: &'a InstallValues,
        operator: &'a OperatorPlan,
    },
    Rollback {
        opts: &'a RollbackOptions,
        insights: &'a HelmRevision,
        operator: Option<&'a HelmRevision>,
    },
}

enum TeardownSummary {
    Complete,
    Failed(Vec<String>),
    TimedOut(String),
}

/// Sequences Helm, cluster and assembly operations
pub struct Orchestrator {
    helm: Arc<dyn HelmClient>,
    cluster: Arc<dyn ClusterOps>,
    assemblies: AssemblyManager,
    crds: CrdReplacer,
    ui: Arc<dyn Interaction>,
}

impl Orchestrator {
    pub fn new(
        helm: Arc<dyn HelmClient>,
        cluster: Arc<dyn ClusterOps>,
        assemblies: AssemblyManager,
        ui: Arc<dyn Interaction>,
    ) -> Self {
        let crds = CrdReplacer::new(cluster.clone(), ui.clone());
        Self {
            helm,
            cluster,
            assemblies,
            crds,
            ui,
        }
    }

    /// Deployed platform release, if any
    pub async fn installed(&self, release: &str, namespace: &str) -> Result<Option<InstalledRelease>> {
        Ok(self.helm.list_deployed(release, namespace).await?.into_iter().next())
    }

    /// Values document stored in the install config secret
    pub async fn values_secret(&self, namespace: &str, name: &str) -> Result<Option<String>> {
        self.cluster
            .read_secret_value(namespace, name, VALUES_SECRET_KEY)
            .await
    }

    /// Platform chart versions available in the repository
    pub async fn available_versions(&self, repo: &ChartRepo) -> Result<Vec<ChartVersion>> {
        self.ensure_repo(repo).await?;
        self.helm.search(&repo.chart(INSIGHTS_CHART), None, true).await
    }

    async fn load_values(&self, opts: &InstallOptions) -> Result<InstallValues> {
        if opts.values_file.is_none() && opts.install_config_secret.is_none() {
            return Err(KubeError::InvalidConfig(
                "At least one of --install-config-secret and --filepath options must be provided"
                    .to_string(),
            ));
        }

        let secret = match &opts.install_config_secret {
            Some(name) => {
                let value = self.values_secret(&opts.namespace, name).await?;
                if value.is_none() {
                    self.ui.warn(&format!("Cannot find values secret {}", name));
                }
                value
            }
            None => None,
        };

        let values = InstallValues::load(opts.values_file.as_deref(), secret)?;
        if values.is_empty() {
            return Err(KubeError::InvalidConfig(
                "Must provide one of values file or secret".to_string(),
            ));
        }
        Ok(values)
    }

    /// Make sure the chart repository is configured, then refresh it
    async fn ensure_repo(&self, repo: &ChartRepo) -> Result<()> {
        let configured = self.helm.repo_list().await?;
        if !configured.iter().any(|r| r.name == repo.name) {
            self.ui
                .warn(&format!("Chart repository {} is not configured", repo.name));
            let url = self.ui.prompt(
                "Please enter the chart repository URL to pull charts from",
                Some(&repo.url),
            )?;
            let username = self
                .ui
                .prompt("Please enter the username for the chart repository", None)?;
            let password = self
                .ui
                .prompt_secret("Please enter the password for the chart repository (input hidden)")?;

            tracing::debug!(repo = %repo.name, url = %url, username = %username, "adding chart repository");
            self.helm
                .repo_add(
                    &repo.name,
                    &url,
                    Some(username.as_str()).filter(|u| !u.is_empty()),
                    Some(password.as_str()).filter(|p| !p.is_empty()),
                )
                .await?;
        }
        self.helm.repo_update().await
    }

    /// Decide whether to install or upgrade the operator
    async fn operator_plan(
        &self,
        opts: &InstallOptions,
        mut prompt_install: bool,
    ) -> Result<Gate<OperatorPlan>> {
        let helm_operator = self
            .helm
            .list_deployed(&opts.release, OPERATOR_NAMESPACE)
            .await?
            .into_iter()
            .next();

        match &helm_operator {
            Some(op) => self.ui.info(&format!(
                "kxi-operator already installed with version {}",
                op.chart
            )),
            None => {
                self.ui.info("kxi-operator not found");
                prompt_install = true;
            }
        }

        if helm_operator.is_none() {
            let unmanaged: Vec<_> = self
                .cluster
                .operator_deployments()
                .await?
                .into_iter()
                .filter(|d| !d.is_helm_managed())
                .collect();

            if let Some(existing) = unmanaged.first() {
                self.ui
                    .warn("kxi-operator already installed, but not managed by helm");
                let compatible = existing
                    .version
                    .as_deref()
                    .is_some_and(|v| is_minor_compatible(v, &opts.version));
                if !compatible {
                    let found = existing.version.as_deref().unwrap_or("unknown");
                    let proceed = opts.force
                        || self.ui.confirm(
                            &format!(
                                "kxi-operator version {} in namespace {} is not compatible with version {}. Do you want to continue without upgrading kxi-operator?",
                                found, existing.namespace, opts.version
                            ),
                            false,
                        )?;
                    if !proceed {
                        return Ok(Gate::Stop(Outcome::Aborted {
                            reason: format!(
                                "kxi-operator version {} is not compatible with version {}",
                                found, opts.version
                            ),
                            backup: None,
                        }));
                    }
                }
                self.ui.info("Not installing kxi-operator");
                return Ok(Gate::Proceed(OperatorPlan::Keep));
            }
        }

        let installed_version = helm_operator.as_ref().map(|op| op.chart_version().to_string());
        let selected = match &opts.operator_version {
            Some(explicit) => {
                if !is_minor_compatible(explicit, &opts.version) {
                    self.ui.warn(&format!(
                        "kxi-operator version {} does not match the minor version of insights {}",
                        explicit, opts.version
                    ));
                    let proceed = opts.force
                        || self.ui.confirm(
                            &format!("Do you want to install kxi-operator version {} anyway?", explicit),
                            false,
                        )?;
                    if !proceed {
                        return Ok(Gate::Stop(Outcome::Aborted {
                            reason: format!(
                                "kxi-operator version {} is not compatible with version {}",
                                explicit, opts.version
                            ),
                            backup: None,
                        }));
                    }
                }
                Some(explicit.clone())
            }
            None => {
                let minor = minor_version(&opts.version)?;
                let candidates: Vec<String> = self
                    .helm
                    .search(&opts.repo.chart(OPERATOR_CHART), Some(&minor), true)
                    .await?
                    .into_iter()
                    .map(|c| c.version)
                    .collect();
                tracing::debug!(?candidates, "operator candidates");
                select_matching_operator_version(
                    &opts.version,
                    &candidates,
                    installed_version.as_deref(),
                )
            }
        };

        let Some(selected) = selected else {
            if let Some(installed) = installed_version
                .as_deref()
                .filter(|v| is_minor_compatible(v, &opts.version))
            {
                self.ui.info(&format!(
                    "Compatible kxi-operator version {} is already installed",
                    installed
                ));
                return Ok(Gate::Proceed(OperatorPlan::Keep));
            }
            return Err(KubeError::Core(CoreError::Version(format!(
                "Cannot find operator version matching insights minor version {}",
                minor_version(&opts.version)?
            ))));
        };

        if !(opts.force || prompt_install) {
            return Ok(Gate::Proceed(OperatorPlan::Keep));
        }

        let elsewhere = self.assemblies.running_elsewhere(&opts.namespace).await?;
        if !elsewhere.is_empty() {
            let names: Vec<String> = elsewhere
                .iter()
                .map(|a| format!("{}/{}", a.namespace().unwrap_or_default(), a.name()))
                .collect();
            self.ui.warn(&format!(
                "Assemblies are running in other namespaces: {}. kxi-operator cannot be upgraded",
                name_list(&names)
            ));
            let proceed = opts.force
                || self.ui.confirm(
                    "Do you want to proceed with upgrading kdb Insights Enterprise only?",
                    false,
                )?;
            if !proceed {
                return Ok(Gate::Stop(Outcome::Aborted {
                    reason: "kxi-operator cannot be upgraded while assemblies are running in other namespaces".to_string(),
                    backup: None,
                }));
            }
            return Ok(Gate::Proceed(OperatorPlan::Keep));
        }

        let install = opts.force
            || self.ui.confirm(
                &format!("Do you want to install kxi-operator version {}?", selected),
                true,
            )?;
        if install {
            Ok(Gate::Proceed(OperatorPlan::Install(selected)))
        } else {
            self.ui.info("Not installing kxi-operator");
            Ok(Gate::Proceed(OperatorPlan::Keep))
        }
    }

    /// Interactive install setup against this orchestrator's cluster
    pub async fn setup(&self, opts: &SetupOptions) -> Result<SetupResult> {
        Setup::new(self.cluster.clone(), self.ui.clone())
            .run(opts)
            .await
    }

    /// Install, going through setup first when no values source is given
    pub async fn run_or_setup(
        &self,
        opts: &InstallOptions,
        setup: &SetupOptions,
    ) -> Result<Outcome> {
        if opts.values_file.is_some() || opts.install_config_secret.is_some() {
            return self.run(opts).await;
        }

        self.ui
            .info("No values file provided, invoking \"kxi install setup\"");
        let result = self.setup(setup).await?;
        let opts = InstallOptions {
            values_file: Some(result.values_file),
            ..opts.clone()
        };
        self.run(&opts).await
    }

    /// Install, or offer to upgrade when already installed
    pub async fn run(&self, opts: &InstallOptions) -> Result<Outcome> {
        let values = self.load_values(opts).await?;

        if let Some(current) = self.installed(&opts.release, &opts.namespace).await? {
            let upgrade = self.ui.confirm(
                &format!(
                    "kdb Insights Enterprise is already installed with version {}. Would you like to upgrade to version {}?",
                    current.chart, opts.version
                ),
                false,
            )?;
            if !upgrade {
                return Ok(Outcome::Declined);
            }
            return self.upgrade_with(opts, &values, current).await;
        }

        let outcome = self.fresh_install(opts, &values).await?;
        if !outcome.is_failure() {
            self.ui
                .header(&format!("Install of version {} complete", opts.version));
        }
        Ok(outcome)
    }

    async fn fresh_install(&self, opts: &InstallOptions, values: &InstallValues) -> Result<Outcome> {
        self.ensure_repo(&opts.repo).await?;
        let operator = match self.operator_plan(opts, false).await? {
            Gate::Proceed(plan) => plan,
            Gate::Stop(outcome) => return Ok(outcome),
        };
        self.apply_upgrade(opts, values, &operator, false).await?;
        Ok(Outcome::Complete {
            version: Some(opts.version.clone()),
        })
    }

    /// Upgrade the platform, cycling assemblies around the chart change
    pub async fn upgrade(&self, opts: &InstallOptions) -> Result<Outcome> {
        self.ui.header("Upgrading kdb Insights Enterprise");
        let values = self.load_values(opts).await?;

        let Some(current) = self.installed(&opts.release, &opts.namespace).await? else {
            self.ui
                .info("kdb Insights Enterprise is not deployed. Skipping to install");
            let outcome = self.fresh_install(opts, &values).await?;
            if !outcome.is_failure() {
                self.ui
                    .header(&format!("Upgrade to version {} complete", opts.version));
            }
            return Ok(outcome);
        };

        self.upgrade_with(opts, &values, current).await
    }

    async fn upgrade_with(
        &self,
        opts: &InstallOptions,
        values: &InstallValues,
        current: InstalledRelease,
    ) -> Result<Outcome> {
        check_upgrade_version(current.chart_version(), &opts.version)?;

        self.ensure_repo(&opts.repo).await?;
        let operator = match self.operator_plan(opts, true).await? {
            Gate::Proceed(plan) => plan,
            Gate::Stop(outcome) => return Ok(outcome),
        };

        let change = ChartChange::Upgrade {
            opts,
            values,
            operator: &operator,
        };
        match self
            .cycle_assemblies(
                &opts.namespace,
                opts.backup_file.as_deref(),
                opts.force,
                &change,
            )
            .await?
        {
            Ok(()) => {
                self.ui
                    .header(&format!("Upgrade to version {} complete", opts.version));
                Ok(Outcome::Complete {
                    version: Some(opts.version.clone()),
                })
            }
            Err(outcome) => Ok(outcome),
        }
    }

    /// Roll the platform (and a matching operator) back to an earlier revision
    pub async fn rollback(&self, opts: &RollbackOptions) -> Result<Outcome> {
        self.ui.header("Rolling back kdb Insights Enterprise");

        let history = self.helm.history(&opts.release, &opts.namespace).await?;
        let current = history
            .iter()
            .rev()
            .find(|r| r.status == ReleaseStatus::Deployed)
            .or_else(|| history.last())
            .ok_or_else(|| KubeError::NotFound {
                kind: "Release".to_string(),
                name: format!("{} in namespace {}", opts.release, opts.namespace),
            })?;

        let target_revision = opts
            .revision
            .unwrap_or_else(|| current.revision.saturating_sub(1));
        let target = history
            .iter()
            .find(|r| r.revision == target_revision)
            .ok_or_else(|| {
                KubeError::InvalidConfig(format!(
                    "Revision {} not found in the history of release {}",
                    target_revision, opts.release
                ))
            })?;

        let mut operator = self.operator_rollback_target(opts, target).await?;
        if let Some(op) = &operator {
            check_rollback_minor_match(target.chart_version(), op.chart_version())?;
        }

        let rows = std::iter::once(vec![
            INSIGHTS_CHART.to_string(),
            format!("{} ({})", current.chart_version(), current.revision),
            format!("{} ({})", target.chart_version(), target.revision),
        ])
        .chain(operator.iter().map(|op| {
            vec![
                OPERATOR_CHART.to_string(),
                String::new(),
                format!("{} ({})", op.chart_version(), op.revision),
            ]
        }))
        .collect::<Vec<_>>();
        self.ui.table(&["CHART", "CURRENT (REVISION)", "TARGET (REVISION)"], &rows);

        if operator.is_some() {
            let elsewhere = self.assemblies.running_elsewhere(&opts.namespace).await?;
            if !elsewhere.is_empty() {
                let names: Vec<String> = elsewhere.iter().map(|a| a.name().to_string()).collect();
                self.ui.warn(&format!(
                    "Assemblies are running in other namespaces: {}. kxi-operator cannot be rolled back",
                    name_list(&names)
                ));
                let proceed = opts.force
                    || self.ui.confirm(
                        "Do you want to proceed with rolling back kdb Insights Enterprise only?",
                        false,
                    )?;
                if !proceed {
                    return Ok(Outcome::Aborted {
                        reason: "kxi-operator cannot be rolled back while assemblies are running in other namespaces".to_string(),
                        backup: None,
                    });
                }
                operator = None;
            }
        }

        // Whatever operator is left running must serve the target platform
        match self.operator_after_rollback(opts, operator.as_ref()).await? {
            Some(version) => check_rollback_minor_match(target.chart_version(), &version)?,
            None => self.ui.warn("kxi-operator not found"),
        }

        if !(opts.force || self.ui.confirm("Proceed?", false)?) {
            return Ok(Outcome::Declined);
        }

        if operator.is_some() {
            self.ensure_repo(&opts.repo).await?;
        }

        let change = ChartChange::Rollback {
            opts,
            insights: target,
            operator: operator.as_ref(),
        };
        let version = target.chart_version().to_string();
        match self
            .cycle_assemblies(
                &opts.namespace,
                opts.backup_file.as_deref(),
                opts.force,
                &change,
            )
            .await?
        {
            Ok(()) => {
                self.ui
                    .header(&format!("Rollback to version {} complete", version));
                Ok(Outcome::Complete {
                    version: Some(version),
                })
            }
            Err(outcome) => Ok(outcome),
        }
    }

    /// Operator revision matching the platform target, `None` when nothing to roll back
    async fn operator_rollback_target(
        &self,
        opts: &RollbackOptions,
        insights_target: &HelmRevision,
    ) -> Result<Option<HelmRevision>> {
        let history = self
            .helm
            .history(&opts.release, OPERATOR_NAMESPACE)
            .await?;
        if history.is_empty() {
            tracing::debug!("kxi-operator is not managed by helm, leaving it in place");
            return Ok(None);
        }

        let current = history
            .iter()
            .rev()
            .find(|r| r.status == ReleaseStatus::Deployed);
        let target_version = insights_target.chart_version();

        let target = match opts.operator_revision {
            Some(rev) => history.iter().find(|r| r.revision == rev).ok_or_else(|| {
                KubeError::InvalidConfig(format!(
                    "Revision {} not found in the history of kxi-operator",
                    rev
                ))
            })?,
            None => {
                if current.is_some_and(|c| is_minor_compatible(c.chart_version(), target_version)) {
                    return Ok(None);
                }
                history
                    .iter()
                    .rev()
                    .find(|r| is_minor_compatible(r.chart_version(), target_version))
                    .ok_or_else(|| {
                        KubeError::Core(CoreError::Version(format!(
                            "Cannot find kxi-operator revision matching insights version {}",
                            target_version
                        )))
                    })?
            }
        };

        if current.is_some_and(|c| c.revision == target.revision) {
            return Ok(None);
        }
        Ok(Some(target.clone()))
    }

    /// Operator version running once the rollback is done
    ///
    /// The planned operator target, else the deployed Helm operator release,
    /// else an operator deployment Helm does not manage.
    async fn operator_after_rollback(
        &self,
        opts: &RollbackOptions,
        planned: Option<&HelmRevision>,
    ) -> Result<Option<String>> {
        if let Some(target) = planned {
            return Ok(Some(target.chart_version().to_string()));
        }

        let helm_operator = self
            .helm
            .history(&opts.release, OPERATOR_NAMESPACE)
            .await?
            .into_iter()
            .rev()
            .find(|r| r.status == ReleaseStatus::Deployed);
        if let Some(current) = helm_operator {
            return Ok(Some(current.chart_version().to_string()));
        }

        Ok(self
            .cluster
            .operator_deployments()
            .await?
            .into_iter()
            .find_map(|d| d.version))
    }

    /// Uninstall the platform, and optionally the operator and CRDs
    pub async fn uninstall(&self, opts: &UninstallOptions) -> Result<Outcome> {
        let mut backup = None;

        match self.installed(&opts.release, &opts.namespace).await? {
            None => self.ui.info("kdb Insights Enterprise installation not found"),
            Some(current) => {
                let proceed = opts.force
                    || self.ui.confirm(
                        "\nkdb Insights Enterprise is deployed. Do you want to uninstall?",
                        false,
                    )?;
                if !proceed {
                    return Ok(Outcome::Declined);
                }

                self.ui.header("Backing up assemblies");
                backup = self
                    .assemblies
                    .backup(&opts.namespace, opts.backup_file.as_deref(), opts.force)
                    .await?;

                self.ui.header("Tearing down assemblies");
                let outcomes = self
                    .assemblies
                    .delete_all(&opts.namespace, true, opts.force)
                    .await?;
                let blocked: Vec<String> = outcomes
                    .into_iter()
                    .filter(|(_, o)| !o.is_success())
                    .map(|(name, _)| name)
                    .collect();
                if !blocked.is_empty() {
                    return Ok(Outcome::Aborted {
                        reason: format!(
                            "Not uninstalling, assemblies {} are still running",
                            name_list(&blocked)
                        ),
                        backup,
                    });
                }

                self.ui.info(&format!(
                    "Uninstalling release {} version {} in namespace {}",
                    opts.release,
                    current.chart_version(),
                    opts.namespace
                ));
                self.helm.uninstall(&opts.release, &opts.namespace).await?;
            }
        }

        let crds = self.crds.existing().await?;
        let elsewhere: Vec<String> = if opts.uninstall_operator || !crds.is_empty() {
            self.assemblies
                .running_elsewhere(&opts.namespace)
                .await?
                .iter()
                .map(|a| format!("{}/{}", a.namespace().unwrap_or_default(), a.name()))
                .collect()
        } else {
            Vec::new()
        };

        if opts.uninstall_operator {
            let operator = self
                .helm
                .list_deployed(&opts.release, OPERATOR_NAMESPACE)
                .await?;
            if operator.is_empty() {
                self.ui.info("kxi-operator installation not found");
            } else if !elsewhere.is_empty() {
                self.ui.error(&format!(
                    "Cannot delete kxi-operator, assemblies are running in other namespaces: {}",
                    name_list(&elsewhere)
                ));
                return Ok(Outcome::Aborted {
                    reason: "Cannot delete kxi-operator".to_string(),
                    backup,
                });
            } else if opts.force
                || self.ui.confirm(
                    "\nThe kxi-operator is deployed. Do you want to uninstall?",
                    false,
                )?
            {
                self.ui.info(&format!(
                    "Uninstalling release {} in namespace {}",
                    opts.release, OPERATOR_NAMESPACE
                ));
                self.helm
                    .uninstall(&opts.release, OPERATOR_NAMESPACE)
                    .await?;
            }
        }

        if !crds.is_empty() {
            if !elsewhere.is_empty() {
                self.ui.warn(&format!(
                    "Not deleting assembly CRDs, assemblies are running in other namespaces: {}",
                    name_list(&elsewhere)
                ));
            } else if opts.force
                || self.ui.confirm(
                    &format!(
                        "\nThe assemblies CRDs {} exist. Do you want to delete them?",
                        name_list(&crds)
                    ),
                    false,
                )?
            {
                self.crds.delete(&crds).await?;
            }
        }

        Ok(Outcome::Complete { version: None })
    }

    /// Back up, tear down, change charts, reapply
    ///
    /// `Ok(Err(outcome))` is a controlled stop; `Err` is an unexpected failure.
    async fn cycle_assemblies(
        &self,
        namespace: &str,
        backup_file: Option<&Path>,
        force: bool,
        change: &ChartChange<'_>,
    ) -> Result<std::result::Result<(), Outcome>> {
        self.ui.header("Backing up assemblies");
        let backup = self.assemblies.backup(namespace, backup_file, force).await?;
        let set = match &backup {
            Some(path) => BackupSet::load(path)?,
            None => BackupSet::default(),
        };
        let names: Vec<String> = set
            .assemblies()?
            .iter()
            .map(|a| a.name().to_string())
            .collect();

        self.ui.header("Tearing down assemblies");
        self.ui
            .info("Assembly data will be persisted and state will be recovered afterwards");

        let mut failure = None;
        match self.teardown(namespace, &names, force).await? {
            TeardownSummary::TimedOut(name) => {
                return Ok(Err(self.abort(
                    format!("Assembly {} was not torn down in time", name),
                    backup,
                )));
            }
            TeardownSummary::Failed(failed) => {
                let reason = format!(
                    "Not changing charts, assemblies {} could not be torn down",
                    name_list(&failed)
                );
                self.ui.error(&reason);
                failure = Some(reason);
            }
            TeardownSummary::Complete => {
                self.ui.header(match change {
                    ChartChange::Upgrade { .. } => "Upgrading insights and operator",
                    ChartChange::Rollback { .. } => "Rolling back insights and operator",
                });
                if let Err(e) = self.apply_change(change).await {
                    tracing::error!(error = %e, "chart change failed");
                    return Ok(Err(self.abort(e.to_string(), backup)));
                }
            }
        }

        self.ui.header("Reapplying assemblies");
        if set.is_empty() {
            self.ui.info("No assemblies to reapply");
        } else {
            let results = self.assemblies.restore(namespace, &set, false).await?;
            let failed: Vec<String> = results
                .iter()
                .filter(|r| !r.is_success())
                .map(|r| r.name.clone())
                .collect();
            if !failed.is_empty() {
                self.ui.warn(&format!(
                    "Assemblies {} were not reapplied, resubmit them from {}",
                    name_list(&failed),
                    backup
                        .as_deref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                ));
            }
        }

        match failure {
            Some(reason) => Ok(Err(Outcome::Aborted { reason, backup })),
            None => Ok(Ok(())),
        }
    }

    fn abort(&self, reason: String, backup: Option<PathBuf>) -> Outcome {
        self.ui.error(&reason);
        if let Some(path) = &backup {
            self.ui.error(&format!(
                "Assemblies were not reapplied. Their definitions are saved in {}",
                path.display()
            ));
        }
        Outcome::Aborted { reason, backup }
    }

    async fn teardown(&self, namespace: &str, names: &[String], force: bool) -> Result<TeardownSummary> {
        let mut failed = Vec::new();
        for name in names {
            match self.assemblies.delete(namespace, name, true, force).await? {
                TeardownOutcome::TimedOut => return Ok(TeardownSummary::TimedOut(name.clone())),
                TeardownOutcome::Failed(_) => failed.push(name.clone()),
                TeardownOutcome::Declined => {
                    tracing::info!(name = %name, "teardown declined, assembly left running");
                }
                TeardownOutcome::Deleted | TeardownOutcome::AlreadyAbsent => {}
            }
        }
        if failed.is_empty() {
            Ok(TeardownSummary::Complete)
        } else {
            Ok(TeardownSummary::Failed(failed))
        }
    }

    async fn apply_change(&self, change: &ChartChange<'_>) -> Result<()> {
        match change {
            ChartChange::Upgrade {
                opts,
                values,
                operator,
            } => self.apply_upgrade(opts, values, operator, true).await,
            ChartChange::Rollback {
                opts,
                insights,
                operator,
            } => {
                if let Some(op) = operator {
                    self.ui.info(&format!(
                        "Rolling back kxi-operator to revision {} (version {})",
                        op.revision,
                        op.chart_version()
                    ));
                    self.helm
                        .rollback(&opts.release, op.revision, OPERATOR_NAMESPACE)
                        .await?;
                    self.replace_crds(&opts.repo, op.chart_version()).await?;
                }
                self.ui.info(&format!(
                    "Rolling back {} to revision {} (version {})",
                    opts.release,
                    insights.revision,
                    insights.chart_version()
                ));
                self.helm
                    .rollback(&opts.release, insights.revision, &opts.namespace)
                    .await
            }
        }
    }

    async fn apply_upgrade(
        &self,
        opts: &InstallOptions,
        values: &InstallValues,
        operator: &OperatorPlan,
        replace_crds: bool,
    ) -> Result<()> {
        let values_stdin = values.secret_document().map(str::to_string);

        if let OperatorPlan::Install(version) = operator {
            self.cluster.ensure_namespace(OPERATOR_NAMESPACE).await?;
            for secret in [
                values.image_pull_secret(opts.image_pull_secret.as_deref()),
                values.license_secret(opts.license_secret.as_deref()),
            ] {
                self.cluster
                    .copy_secret(&secret, &opts.namespace, OPERATOR_NAMESPACE)
                    .await?;
            }

            let request = InstallRequest {
                release: opts.release.clone(),
                chart: opts.repo.chart(OPERATOR_CHART),
                version: Some(version.clone()),
                namespace: OPERATOR_NAMESPACE.to_string(),
                values_file: opts.values_file.clone(),
                values_stdin: values_stdin.clone(),
            };
            self.ui.info(&request.describe());
            self.helm.upgrade_install(&request).await?;

            if replace_crds {
                self.replace_crds(&opts.repo, version).await?;
            }
        }

        if let Some(current) = self.installed(&opts.release, &opts.namespace).await? {
            self.ui.info(&format!(
                "kdb Insights Enterprise already installed with version {}",
                current.chart
            ));
        }

        self.cluster.ensure_namespace(&opts.namespace).await?;
        let request = InstallRequest {
            release: opts.release.clone(),
            chart: opts.repo.chart(INSIGHTS_CHART),
            version: Some(opts.version.clone()),
            namespace: opts.namespace.clone(),
            values_file: opts.values_file.clone(),
            values_stdin,
        };
        self.ui.info(&request.describe());
        self.helm.upgrade_install(&request).await
    }

    async fn replace_crds(&self, repo: &ChartRepo, operator_version: &str) -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = self
            .helm
            .fetch(&repo.chart(OPERATOR_CHART), operator_version, dir.path())
            .await?;
        self.crds.replace_from_archive(&archive).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockAssemblyBackend;
    use crate::cluster::{ClusterCall, MockCluster, OperatorDeployment};
    use crate::crd::ASSEMBLY_CRDS;
    use crate::helm::{HelmCall, MockHelm};
    use crate::interact::ScriptedInteraction;
    use kxi_core::Assembly;
    use serde_json::json;

    const NS: &str = "kxi";
    const RELEASE: &str = "insights";
    const REPO: &str = "kx-insights";
    const REPO_URL: &str = "https://nexus.example.com/repository/kx-insights-charts";

    fn live(name: &str, namespace: &str) -> Assembly {
        let mut assembly = Assembly::from_value(json!({
            "apiVersion": "insights.kx.com/v1",
            "kind": "Assembly",
            "metadata": {"name": name, "namespace": namespace},
            "spec": {"elements": {"sp": {"pipelines": {"p1": {"source": "north"}}}}}
        }))
        .unwrap();
        assembly.annotate_last_applied().unwrap();
        assembly
    }

    struct Harness {
        helm: MockHelm,
        cluster: MockCluster,
        backend: MockAssemblyBackend,
        ui: ScriptedInteraction,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(helm: MockHelm, backend: MockAssemblyBackend, ui: ScriptedInteraction) -> Self {
            let cluster = MockCluster::new()
                .with_secret(NS, "kxi-nexus-pull-secret", &[(".dockerconfigjson", "{}")])
                .with_secret(NS, "kxi-license", &[("license", "bGljZW5zZQ==")])
                .with_crd(ASSEMBLY_CRDS[0])
                .with_crd(ASSEMBLY_CRDS[1]);
            Self {
                helm,
                cluster,
                backend,
                ui,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            let assemblies =
                AssemblyManager::new(Arc::new(self.backend.clone()), Arc::new(self.ui.clone()));
            Orchestrator::new(
                Arc::new(self.helm.clone()),
                Arc::new(self.cluster.clone()),
                assemblies,
                Arc::new(self.ui.clone()),
            )
        }

        fn backup_path(&self) -> PathBuf {
            self.dir.path().join("backup.yaml")
        }

        fn install_options(&self, version: &str, force: bool) -> InstallOptions {
            let values = self.dir.path().join("values.yaml");
            std::fs::write(&values, "global:\n  image:\n    repository: registry.example.com\n")
                .unwrap();
            InstallOptions {
                namespace: NS.into(),
                release: RELEASE.into(),
                repo: ChartRepo::new(REPO, REPO_URL),
                version: version.into(),
                operator_version: None,
                values_file: Some(values),
                install_config_secret: None,
                image_pull_secret: None,
                license_secret: None,
                backup_file: Some(self.backup_path()),
                force,
            }
        }

        fn rollback_options(&self, force: bool) -> RollbackOptions {
            RollbackOptions {
                namespace: NS.into(),
                release: RELEASE.into(),
                repo: ChartRepo::new(REPO, REPO_URL),
                revision: None,
                operator_revision: None,
                backup_file: Some(self.backup_path()),
                force,
            }
        }

        fn uninstall_options(&self, uninstall_operator: bool) -> UninstallOptions {
            UninstallOptions {
                namespace: NS.into(),
                release: RELEASE.into(),
                uninstall_operator,
                backup_file: Some(self.backup_path()),
                force: true,
            }
        }
    }

    /// Platform and operator at 1.5.0 with a 1.6.0 operator available
    fn installed_helm(version: &str) -> MockHelm {
        MockHelm::new()
            .with_repo(REPO, REPO_URL)
            .with_chart_versions("kxi-operator", &["1.6.0", "1.5.0"])
            .with_release(RELEASE, NS, "insights", &[version])
            .with_release(RELEASE, OPERATOR_NAMESPACE, "kxi-operator", &[version])
    }

    fn submitted_names(backend: &MockAssemblyBackend) -> Vec<String> {
        backend
            .submitted()
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_downgrade_changes_nothing() {
        let backend = MockAssemblyBackend::with_assemblies(vec![live("a", NS)]);
        let h = Harness::new(installed_helm("1.6.0"), backend, ScriptedInteraction::new());

        let err = h
            .orchestrator()
            .upgrade(&h.install_options("1.5.0", true))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Cannot upgrade from version 1.6.0 to version 1.5.0"));
        assert!(h.helm.mutations().is_empty());
        assert!(h.backend.deleted().is_empty());
        assert!(!h.backup_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_reapplies_declined_teardown() {
        let backend = MockAssemblyBackend::with_assemblies(vec![live("a", NS), live("b", NS)]);
        // operator install, teardown a, keep b running
        let ui = ScriptedInteraction::new().with_confirms([true, true, false]);
        let h = Harness::new(installed_helm("1.5.0"), backend, ui);

        let outcome = h
            .orchestrator()
            .upgrade(&h.install_options("1.6.0", false))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Complete {
                version: Some("1.6.0".into())
            }
        );
        assert_eq!(h.backend.deleted(), vec!["a".to_string()]);
        assert_eq!(submitted_names(&h.backend), vec!["a", "b"]);
        assert_eq!(h.helm.deployed_chart(RELEASE, NS).as_deref(), Some("insights-1.6.0"));
        assert_eq!(
            h.helm.deployed_chart(RELEASE, OPERATOR_NAMESPACE).as_deref(),
            Some("kxi-operator-1.6.0")
        );
        assert!(h.ui.printed("Upgrade to version 1.6.0 complete"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_sequence() {
        let backend = MockAssemblyBackend::with_assemblies(vec![live("a", NS)]);
        let h = Harness::new(installed_helm("1.5.0"), backend, ScriptedInteraction::new());

        h.orchestrator()
            .upgrade(&h.install_options("1.6.0", true))
            .await
            .unwrap();

        let charts: Vec<String> = h
            .helm
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                HelmCall::UpgradeInstall(r) => Some(r.chart),
                HelmCall::Fetch { chart, version } => Some(format!("fetch {}:{}", chart, version)),
                _ => None,
            })
            .collect();
        assert_eq!(
            charts,
            vec![
                "kx-insights/kxi-operator",
                "fetch kx-insights/kxi-operator:1.6.0",
                "kx-insights/insights",
            ]
        );

        let cluster_calls = h.cluster.calls();
        assert!(cluster_calls.contains(&ClusterCall::CopySecret {
            name: "kxi-license".into(),
            from: NS.into(),
            to: OPERATOR_NAMESPACE.into(),
        }));
        assert!(cluster_calls.contains(&ClusterCall::CreateCrd(ASSEMBLY_CRDS[1].into())));
        assert_eq!(h.backend.operation_counts().creates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_helm_failure_skips_reapply() {
        let backend = MockAssemblyBackend::with_assemblies(vec![live("a", NS), live("b", NS)]);
        let h = Harness::new(installed_helm("1.5.0"), backend, ScriptedInteraction::new());
        h.helm.fail_on("upgrade", "Error: UPGRADE FAILED: timed out waiting for the condition");

        let outcome = h
            .orchestrator()
            .upgrade(&h.install_options("1.6.0", true))
            .await
            .unwrap();

        let Outcome::Aborted { reason, backup } = outcome else {
            panic!("expected abort, got {:?}", outcome);
        };
        assert!(reason.contains("UPGRADE FAILED"));
        assert_eq!(backup, Some(h.backup_path()));
        assert!(h.backup_path().exists());
        assert_eq!(h.backend.deleted(), vec!["a".to_string(), "b".to_string()]);
        assert!(h.backend.submitted().is_empty());
        assert!(h.ui.printed("Their definitions are saved in"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_timeout_aborts() {
        let backend = MockAssemblyBackend::with_assemblies(vec![live("a", NS)]);
        backend.linger_after_delete("a", 100);
        let h = Harness::new(installed_helm("1.5.0"), backend, ScriptedInteraction::new());

        let outcome = h
            .orchestrator()
            .upgrade(&h.install_options("1.6.0", true))
            .await
            .unwrap();

        assert!(outcome.is_failure());
        assert!(h.helm.mutations().is_empty());
        assert!(h.backend.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_failure_still_reapplies() {
        let backend = MockAssemblyBackend::with_assemblies(vec![live("a", NS), live("b", NS)]);
        backend.fail_delete("b");
        let h = Harness::new(installed_helm("1.5.0"), backend, ScriptedInteraction::new());

        let outcome = h
            .orchestrator()
            .upgrade(&h.install_options("1.6.0", true))
            .await
            .unwrap();

        assert!(outcome.is_failure());
        assert!(h.helm.mutations().is_empty());
        assert_eq!(submitted_names(&h.backend), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fresh_install() {
        let helm = MockHelm::new()
            .with_repo(REPO, REPO_URL)
            .with_chart_versions("kxi-operator", &["1.6.2", "1.6.1-rc.1", "1.5.0"]);
        let ui = ScriptedInteraction::new().with_confirms([true]);
        let h = Harness::new(helm, MockAssemblyBackend::new(), ui);

        let outcome = h
            .orchestrator()
            .run(&h.install_options("1.6.0", false))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Complete {
                version: Some("1.6.0".into())
            }
        );
        assert_eq!(
            h.ui.confirmations(),
            vec!["Do you want to install kxi-operator version 1.6.2?"]
        );
        assert_eq!(
            h.helm.deployed_chart(RELEASE, OPERATOR_NAMESPACE).as_deref(),
            Some("kxi-operator-1.6.2")
        );
        assert!(!h.helm.calls().iter().any(|c| matches!(c, HelmCall::Fetch { .. })));
        assert!(h.cluster.has_secret(OPERATOR_NAMESPACE, "kxi-nexus-pull-secret"));
    }

    #[tokio::test]
    async fn test_run_without_values_goes_through_setup() {
        let helm = MockHelm::new()
            .with_repo(REPO, REPO_URL)
            .with_chart_versions("kxi-operator", &["1.6.2"]);
        // existing license secret, then the operator install
        let ui = ScriptedInteraction::new()
            .with_confirms([true, true])
            .with_answers(["insights.example.com", "kxi-license", ""]);
        let h = Harness::new(helm, MockAssemblyBackend::new(), ui);
        let mut opts = h.install_options("1.6.0", false);
        opts.values_file = None;
        let setup = SetupOptions {
            keycloak_auth_url: Some("keycloak.example.com".into()),
            gui_client_secret: Some("g".into()),
            operator_client_secret: Some("o".into()),
            output_file: h.dir.path().join("generated.yaml"),
            ..SetupOptions::new(NS)
        };

        let outcome = h.orchestrator().run_or_setup(&opts, &setup).await.unwrap();

        assert!(!outcome.is_failure());
        assert!(h.ui.printed("No values file provided"));
        let installed_with: Vec<_> = h
            .helm
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                HelmCall::UpgradeInstall(req) if req.namespace == NS => req.values_file,
                _ => None,
            })
            .collect();
        assert_eq!(installed_with, vec![h.dir.path().join("generated.yaml")]);
        assert!(h.cluster.has_secret(NS, "kxi-install-config"));
    }

    #[tokio::test]
    async fn test_run_with_values_skips_setup() {
        let helm = MockHelm::new()
            .with_repo(REPO, REPO_URL)
            .with_chart_versions("kxi-operator", &["1.6.2"]);
        let ui = ScriptedInteraction::new().with_confirms([true]);
        let h = Harness::new(helm, MockAssemblyBackend::new(), ui);

        h.orchestrator()
            .run_or_setup(&h.install_options("1.6.0", false), &SetupOptions::new(NS))
            .await
            .unwrap();

        assert!(!h.ui.printed("No values file provided"));
        assert!(!h.cluster.has_secret(NS, "kxi-install-config"));
    }

    #[tokio::test]
    async fn test_run_declines_upgrade() {
        let ui = ScriptedInteraction::new().with_confirms([false]);
        let h = Harness::new(installed_helm("1.5.0"), MockAssemblyBackend::new(), ui);

        let outcome = h
            .orchestrator()
            .run(&h.install_options("1.6.0", false))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Declined);
        assert!(h.helm.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_values_required() {
        let h = Harness::new(installed_helm("1.5.0"), MockAssemblyBackend::new(), ScriptedInteraction::new());
        let mut opts = h.install_options("1.6.0", true);
        opts.values_file = None;

        let err = h.orchestrator().upgrade(&opts).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "At least one of --install-config-secret and --filepath options must be provided"
        );
    }

    #[tokio::test]
    async fn test_missing_operator_version() {
        let helm = MockHelm::new()
            .with_repo(REPO, REPO_URL)
            .with_chart_versions("kxi-operator", &["1.5.0"]);
        let h = Harness::new(helm, MockAssemblyBackend::new(), ScriptedInteraction::new());

        let err = h
            .orchestrator()
            .run(&h.install_options("1.6.0", false))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Cannot find operator version matching insights minor version 1.6"
        );
        assert!(h.helm.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_unmanaged_operator_declined() {
        let helm = MockHelm::new().with_repo(REPO, REPO_URL);
        let ui = ScriptedInteraction::new().with_confirms([false]);
        let mut h = Harness::new(helm, MockAssemblyBackend::new(), ui);
        h.cluster = h.cluster.clone().with_operator(OperatorDeployment {
            namespace: OPERATOR_NAMESPACE.into(),
            name: "kxi-operator".into(),
            version: Some("1.4.0".into()),
            helm_release: None,
        });

        let outcome = h
            .orchestrator()
            .run(&h.install_options("1.6.0", false))
            .await
            .unwrap();

        assert!(outcome.is_failure());
        assert!(h.ui.printed("kxi-operator already installed, but not managed by helm"));
        assert!(h.helm.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_operator_blocked_by_other_namespaces() {
        let backend = MockAssemblyBackend::with_assemblies(vec![live("z", "team-a")]);
        let ui = ScriptedInteraction::new().with_confirms([false]);
        let h = Harness::new(installed_helm("1.5.0"), backend, ui);

        let outcome = h
            .orchestrator()
            .upgrade(&h.install_options("1.6.0", false))
            .await
            .unwrap();

        assert!(outcome.is_failure());
        assert!(h.ui.printed("Assemblies are running in other namespaces: [team-a/z]"));
        assert!(h.helm.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_repo_added_when_missing() {
        let helm = MockHelm::new().with_chart_versions("insights", &["1.6.0", "1.5.0"]);
        let ui = ScriptedInteraction::new().with_answers(["", "alice", "s3cret"]);
        let h = Harness::new(helm, MockAssemblyBackend::new(), ui);

        let versions = h
            .orchestrator()
            .available_versions(&ChartRepo::new(REPO, REPO_URL))
            .await
            .unwrap();

        assert_eq!(versions.len(), 2);
        assert!(h.helm.calls().contains(&HelmCall::RepoAdd {
            name: REPO.into(),
            url: REPO_URL.into(),
            username: Some("alice".into()),
        }));
        assert!(!format!("{:?}", h.ui.lines()).contains("s3cret"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_with_operator() {
        let helm = MockHelm::new()
            .with_repo(REPO, REPO_URL)
            .with_release(RELEASE, NS, "insights", &["1.5.0", "1.6.0"])
            .with_release(RELEASE, OPERATOR_NAMESPACE, "kxi-operator", &["1.5.0", "1.6.0"]);
        let backend = MockAssemblyBackend::with_assemblies(vec![live("a", NS)]);
        let h = Harness::new(helm, backend, ScriptedInteraction::new());

        let outcome = h
            .orchestrator()
            .rollback(&h.rollback_options(true))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Complete {
                version: Some("1.5.0".into())
            }
        );
        assert_eq!(
            h.helm.mutations(),
            vec![
                HelmCall::Rollback {
                    release: RELEASE.into(),
                    revision: 1,
                    namespace: OPERATOR_NAMESPACE.into()
                },
                HelmCall::Rollback {
                    release: RELEASE.into(),
                    revision: 1,
                    namespace: NS.into()
                },
            ]
        );
        assert_eq!(submitted_names(&h.backend), vec!["a"]);
    }

    #[tokio::test]
    async fn test_rollback_minor_mismatch() {
        let helm = MockHelm::new()
            .with_release(RELEASE, NS, "insights", &["1.5.0", "1.6.0"])
            .with_release(RELEASE, OPERATOR_NAMESPACE, "kxi-operator", &["1.6.0", "1.6.1"]);
        let h = Harness::new(helm, MockAssemblyBackend::new(), ScriptedInteraction::new());
        let mut opts = h.rollback_options(true);
        opts.operator_revision = Some(1);

        let err = h.orchestrator().rollback(&opts).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "Insights rollback target version 1.5.0 is incompatible with target operator version 1.6.0. Minor versions must match."
        );
        assert!(h.helm.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_declined() {
        let helm = MockHelm::new().with_release(RELEASE, NS, "insights", &["1.6.0", "1.6.1"]);
        let ui = ScriptedInteraction::new().with_confirms([false]);
        let h = Harness::new(helm, MockAssemblyBackend::new(), ui);

        let outcome = h
            .orchestrator()
            .rollback(&h.rollback_options(false))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Declined);
        assert!(h.helm.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_rejects_unmanaged_operator_mismatch() {
        let helm = MockHelm::new().with_release(RELEASE, NS, "insights", &["1.2.3", "1.4.1"]);
        let backend = MockAssemblyBackend::with_assemblies(vec![live("a", NS)]);
        let mut h = Harness::new(helm, backend, ScriptedInteraction::new());
        h.cluster = h.cluster.clone().with_operator(OperatorDeployment {
            namespace: OPERATOR_NAMESPACE.into(),
            name: "kxi-operator".into(),
            version: Some("1.4.0".into()),
            helm_release: None,
        });

        let err = h
            .orchestrator()
            .rollback(&h.rollback_options(true))
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::Core(CoreError::Version(_))));
        assert_eq!(
            err.to_string(),
            "Insights rollback target version 1.2.3 is incompatible with target operator version 1.4.0. Minor versions must match."
        );
        assert!(h.helm.mutations().is_empty());
        assert!(h.backend.deleted().is_empty());
        assert!(!h.backup_path().exists());
    }

    #[tokio::test]
    async fn test_rollback_rejects_kept_operator_mismatch() {
        let helm = MockHelm::new()
            .with_repo(REPO, REPO_URL)
            .with_release(RELEASE, NS, "insights", &["1.5.0", "1.6.0"])
            .with_release(RELEASE, OPERATOR_NAMESPACE, "kxi-operator", &["1.5.0", "1.6.0"]);
        let backend = MockAssemblyBackend::with_assemblies(vec![live("z", "team-a")]);
        // roll back insights only
        let ui = ScriptedInteraction::new().with_confirms([true]);
        let h = Harness::new(helm, backend, ui);

        let err = h
            .orchestrator()
            .rollback(&h.rollback_options(false))
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::Core(CoreError::Version(_))));
        assert!(err.to_string().contains("target operator version 1.6.0"));
        assert!(h.ui.printed("Assemblies are running in other namespaces: [z]"));
        assert!(h.helm.mutations().is_empty());
        assert!(h.backend.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_operator_version_mismatch_declined() {
        let helm = MockHelm::new()
            .with_repo(REPO, REPO_URL)
            .with_chart_versions("kxi-operator", &["1.5.0"]);
        let ui = ScriptedInteraction::new().with_confirms([false]);
        let h = Harness::new(helm, MockAssemblyBackend::new(), ui);
        let mut opts = h.install_options("1.6.0", false);
        opts.operator_version = Some("1.5.0".into());

        let outcome = h.orchestrator().run(&opts).await.unwrap();

        assert!(outcome.is_failure());
        assert!(h.ui.printed(
            "kxi-operator version 1.5.0 does not match the minor version of insights 1.6.0"
        ));
        assert!(h.helm.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_uninstall_everything() {
        let backend = MockAssemblyBackend::with_assemblies(vec![live("a", NS)]);
        let h = Harness::new(installed_helm("1.6.0"), backend, ScriptedInteraction::new());

        let outcome = h
            .orchestrator()
            .uninstall(&h.uninstall_options(true))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Complete { version: None });
        assert_eq!(h.helm.mutations().len(), 2);
        assert!(h.cluster.crd(ASSEMBLY_CRDS[0]).is_none());
        assert!(h.backup_path().exists());
    }

    #[tokio::test]
    async fn test_uninstall_operator_blocked() {
        let backend = MockAssemblyBackend::with_assemblies(vec![live("a", NS), live("z", "team-a")]);
        let h = Harness::new(installed_helm("1.6.0"), backend, ScriptedInteraction::new());

        let outcome = h
            .orchestrator()
            .uninstall(&h.uninstall_options(true))
            .await
            .unwrap();

        assert!(outcome.is_failure());
        assert_eq!(
            h.helm.mutations(),
            vec![HelmCall::Uninstall {
                release: RELEASE.into(),
                namespace: NS.into()
            }]
        );
        assert!(h.ui.printed("Cannot delete kxi-operator"));
        assert!(h.cluster.crd(ASSEMBLY_CRDS[0]).is_some());
    }

    #[tokio::test]
    async fn test_uninstall_keeps_crds_for_other_namespaces() {
        let backend = MockAssemblyBackend::with_assemblies(vec![live("z", "team-a")]);
        let h = Harness::new(installed_helm("1.6.0"), backend, ScriptedInteraction::new());

        let outcome = h
            .orchestrator()
            .uninstall(&h.uninstall_options(false))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Complete { version: None });
        assert!(h.ui.printed("Not deleting assembly CRDs"));
        assert!(h.cluster.crd(ASSEMBLY_CRDS[1]).is_some());
    }
}
