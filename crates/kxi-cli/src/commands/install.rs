//! Install commands - setup, run, upgrade, rollback, delete, list-versions, get-values

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};

use kxi_client::defaults;
use kxi_kube::{
    AssemblyManager, ChartRepo, HelmCli, InstallOptions, Interaction, KubeBackend, KubeCluster,
    Orchestrator, Outcome, RollbackOptions, SetupOptions, UninstallOptions,
};

use super::{Context, pick};
use crate::error::{CliError, Result};
use crate::terminal::TermInteraction;

#[derive(Subcommand, Debug)]
pub enum InstallCommand {
    /// Create the install secrets and generate a values file
    Setup(SetupArgs),

    /// Install kdb Insights Enterprise, offering an upgrade when already installed
    Run(InstallArgs),

    /// Upgrade kdb Insights Enterprise, cycling assemblies around the chart change
    Upgrade(InstallArgs),

    /// Roll back to an earlier release revision
    Rollback(RollbackArgs),

    /// Uninstall kdb Insights Enterprise
    Delete(DeleteArgs),

    /// List the chart versions available in the repository
    ListVersions(RepoArgs),

    /// Print the values stored in the install config secret
    GetValues(GetValuesArgs),
}

/// Release and namespace selection
#[derive(Args, Debug, Clone, Default)]
pub struct ReleaseArgs {
    /// Kubernetes namespace
    #[arg(short, long, env = "KXI_NAMESPACE")]
    pub namespace: Option<String>,

    /// Helm release name
    #[arg(long, env = "KXI_RELEASE")]
    pub release: Option<String>,

    /// File to back up assembly definitions to
    #[arg(long, env = "KXI_ASSEMBLY_BACKUP_FILEPATH")]
    pub assembly_backup_filepath: Option<PathBuf>,

    /// Answer yes to every prompt
    #[arg(long)]
    pub force: bool,
}

/// Chart repository selection
#[derive(Args, Debug, Clone, Default)]
pub struct RepoArgs {
    /// Name of the Helm chart repository
    #[arg(long, env = "KXI_CHART_REPO_NAME")]
    pub chart_repo_name: Option<String>,

    /// URL offered when the repository has to be added
    #[arg(long, env = "KXI_CHART_REPO_URL")]
    pub chart_repo_url: Option<String>,
}

impl RepoArgs {
    fn resolve(&self, ctx: &Context) -> ChartRepo {
        ChartRepo::new(
            pick(
                self.chart_repo_name.as_deref(),
                ctx.profile.chart_repo_name.as_deref(),
                defaults::CHART_REPO_NAME,
            ),
            pick(
                self.chart_repo_url.as_deref(),
                ctx.profile.chart_repo_url.as_deref(),
                defaults::CHART_REPO_URL,
            ),
        )
    }
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[command(flatten)]
    pub release: ReleaseArgs,

    #[command(flatten)]
    pub repo: RepoArgs,

    /// Platform chart version
    #[arg(long)]
    pub version: String,

    /// Operator chart version, otherwise the best match for --version
    #[arg(long)]
    pub operator_version: Option<String>,

    /// Values file passed to Helm
    #[arg(long, short = 'f')]
    pub filepath: Option<PathBuf>,

    /// Secret holding the install values
    #[arg(long, env = "KXI_INSTALL_CONFIG_SECRET")]
    pub install_config_secret: Option<String>,

    /// Image pull secret to copy to the operator namespace
    #[arg(long, env = "KXI_IMAGE_PULL_SECRET")]
    pub image_pull_secret: Option<String>,

    /// License secret to copy to the operator namespace
    #[arg(long, env = "KXI_LICENSE_SECRET")]
    pub license_secret: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct SetupArgs {
    /// Kubernetes namespace
    #[arg(short, long, env = "KXI_NAMESPACE")]
    pub namespace: Option<String>,

    /// Hostname of the installation, prompted for when missing
    #[arg(long)]
    pub ingress_host: Option<String>,

    /// Secret containing the kdb+ license
    #[arg(long, env = "KXI_LICENSE_SECRET")]
    pub license_secret: Option<String>,

    /// Repository to pull images from
    #[arg(long)]
    pub image_repo: Option<String>,

    /// Secret containing credentials for the image repository
    #[arg(long, env = "KXI_IMAGE_PULL_SECRET")]
    pub image_pull_secret: Option<String>,

    /// Secret containing the TLS cert and key for the client issuer
    #[arg(long)]
    pub client_cert_secret: Option<String>,

    /// Secret containing the Keycloak admin password
    #[arg(long)]
    pub keycloak_secret: Option<String>,

    /// Secret containing the Keycloak postgresql passwords
    #[arg(long)]
    pub keycloak_postgresql_secret: Option<String>,

    /// Auth URL of an external Keycloak
    #[arg(long)]
    pub keycloak_auth_url: Option<String>,

    /// Keycloak client secret for the gui service account
    #[arg(long)]
    pub gui_client_secret: Option<String>,

    /// Keycloak client secret for the operator service account
    #[arg(long)]
    pub operator_client_secret: Option<String>,

    /// Name for the generated values file
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    /// Secret to store the install values in
    #[arg(long, env = "KXI_INSTALL_CONFIG_SECRET")]
    pub install_config_secret: Option<String>,
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    #[command(flatten)]
    pub release: ReleaseArgs,

    #[command(flatten)]
    pub repo: RepoArgs,

    /// Platform revision to roll back to, default the previous one
    pub revision: Option<u32>,

    /// Operator revision to roll back to
    #[arg(long)]
    pub operator_revision: Option<u32>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub release: ReleaseArgs,

    /// Also uninstall kxi-operator
    #[arg(long)]
    pub uninstall_operator: bool,
}

#[derive(Args, Debug)]
pub struct GetValuesArgs {
    /// Kubernetes namespace
    #[arg(short, long, env = "KXI_NAMESPACE")]
    pub namespace: Option<String>,

    /// Secret holding the install values
    #[arg(long, env = "KXI_INSTALL_CONFIG_SECRET")]
    pub install_config_secret: Option<String>,
}

/// Flags merged with the profile
struct Resolved {
    namespace: String,
    release: String,
    backup_file: Option<PathBuf>,
}

fn resolve(ctx: &Context, args: &ReleaseArgs) -> Resolved {
    Resolved {
        namespace: ctx.namespace(args.namespace.as_deref()),
        release: pick(
            args.release.as_deref(),
            ctx.profile.release_name.as_deref(),
            defaults::RELEASE,
        ),
        backup_file: args
            .assembly_backup_filepath
            .clone()
            .or_else(|| ctx.profile.assembly_backup_file.clone()),
    }
}

fn install_options(ctx: &Context, args: &InstallArgs) -> InstallOptions {
    let resolved = resolve(ctx, &args.release);
    InstallOptions {
        namespace: resolved.namespace,
        release: resolved.release,
        repo: args.repo.resolve(ctx),
        version: args.version.clone(),
        operator_version: args.operator_version.clone(),
        values_file: args.filepath.clone(),
        install_config_secret: args
            .install_config_secret
            .clone()
            .or_else(|| ctx.profile.install_config_secret.clone()),
        image_pull_secret: args
            .image_pull_secret
            .clone()
            .or_else(|| ctx.profile.image_pull_secret.clone()),
        license_secret: args
            .license_secret
            .clone()
            .or_else(|| ctx.profile.license_secret.clone()),
        backup_file: resolved.backup_file,
        force: args.release.force,
    }
}

fn setup_options(ctx: &Context, args: &SetupArgs) -> SetupOptions {
    let profile = &ctx.profile;
    let namespace = ctx.namespace(args.namespace.as_deref());
    let base = SetupOptions::new(&namespace);
    let or_default = |flag: &Option<String>, default: String| flag.clone().unwrap_or(default);

    SetupOptions {
        ingress_host: args.ingress_host.clone(),
        license_secret: pick(
            args.license_secret.as_deref(),
            profile.license_secret.as_deref(),
            &base.license_secret,
        ),
        image_repo: or_default(&args.image_repo, base.image_repo),
        image_pull_secret: pick(
            args.image_pull_secret.as_deref(),
            profile.image_pull_secret.as_deref(),
            &base.image_pull_secret,
        ),
        client_cert_secret: or_default(&args.client_cert_secret, base.client_cert_secret),
        keycloak_secret: or_default(&args.keycloak_secret, base.keycloak_secret),
        postgresql_secret: or_default(&args.keycloak_postgresql_secret, base.postgresql_secret),
        keycloak_auth_url: args.keycloak_auth_url.clone(),
        gui_client_secret: args.gui_client_secret.clone(),
        operator_client_secret: args.operator_client_secret.clone(),
        output_file: args.output_file.clone().unwrap_or(base.output_file),
        install_config_secret: pick(
            args.install_config_secret.as_deref(),
            profile.install_config_secret.as_deref(),
            &base.install_config_secret,
        ),
        namespace,
    }
}

fn rollback_options(ctx: &Context, args: &RollbackArgs) -> RollbackOptions {
    let resolved = resolve(ctx, &args.release);
    RollbackOptions {
        namespace: resolved.namespace,
        release: resolved.release,
        repo: args.repo.resolve(ctx),
        revision: args.revision,
        operator_revision: args.operator_revision,
        backup_file: resolved.backup_file,
        force: args.release.force,
    }
}

fn uninstall_options(ctx: &Context, args: &DeleteArgs) -> UninstallOptions {
    let resolved = resolve(ctx, &args.release);
    UninstallOptions {
        namespace: resolved.namespace,
        release: resolved.release,
        uninstall_operator: args.uninstall_operator,
        backup_file: resolved.backup_file,
        force: args.release.force,
    }
}

/// Setup options for `install run` without a values source
fn fallback_setup(ctx: &Context, opts: &InstallOptions) -> SetupOptions {
    setup_options(
        ctx,
        &SetupArgs {
            namespace: Some(opts.namespace.clone()),
            license_secret: opts.license_secret.clone(),
            image_pull_secret: opts.image_pull_secret.clone(),
            ..Default::default()
        },
    )
}

async fn orchestrator(ui: Arc<dyn Interaction>) -> Result<Orchestrator> {
    let cluster = KubeCluster::connect().await?;
    let backend = KubeBackend::connect().await?;
    let assemblies = AssemblyManager::new(Arc::new(backend), ui.clone());
    Ok(Orchestrator::new(
        Arc::new(HelmCli::default()),
        Arc::new(cluster),
        assemblies,
        ui,
    ))
}

/// Exit status for a finished run; a declined prompt is not an error
fn finish(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Complete { version } => {
            tracing::debug!(?version, "completed");
            Ok(())
        }
        Outcome::Declined => Ok(()),
        Outcome::Aborted { reason, backup } => Err(CliError::aborted(reason, backup)),
    }
}

pub async fn run(ctx: &Context, command: InstallCommand) -> Result<()> {
    let ui: Arc<dyn Interaction> = Arc::new(TermInteraction::new());

    match command {
        InstallCommand::Setup(args) => {
            let opts = setup_options(ctx, &args);
            orchestrator(ui).await?.setup(&opts).await?;
            Ok(())
        }
        InstallCommand::Run(args) => {
            let opts = install_options(ctx, &args);
            let setup = fallback_setup(ctx, &opts);
            finish(orchestrator(ui).await?.run_or_setup(&opts, &setup).await?)
        }
        InstallCommand::Upgrade(args) => {
            let opts = install_options(ctx, &args);
            finish(orchestrator(ui).await?.upgrade(&opts).await?)
        }
        InstallCommand::Rollback(args) => {
            let opts = rollback_options(ctx, &args);
            finish(orchestrator(ui).await?.rollback(&opts).await?)
        }
        InstallCommand::Delete(args) => {
            let opts = uninstall_options(ctx, &args);
            finish(orchestrator(ui).await?.uninstall(&opts).await?)
        }
        InstallCommand::ListVersions(args) => {
            let repo = args.resolve(ctx);
            list_versions(&orchestrator(ui.clone()).await?, ui.as_ref(), &repo).await
        }
        InstallCommand::GetValues(args) => {
            let namespace = ctx.namespace(args.namespace.as_deref());
            let secret = pick(
                args.install_config_secret.as_deref(),
                ctx.profile.install_config_secret.as_deref(),
                defaults::INSTALL_CONFIG_SECRET,
            );
            let values = get_values(&orchestrator(ui).await?, &namespace, &secret).await?;
            print!("{}", values);
            Ok(())
        }
    }
}

async fn list_versions(orch: &Orchestrator, ui: &dyn Interaction, repo: &ChartRepo) -> Result<()> {
    let versions = orch.available_versions(repo).await?;
    if versions.is_empty() {
        ui.info(&format!("No versions found in {}", repo.name));
        return Ok(());
    }
    let rows: Vec<Vec<String>> = versions
        .into_iter()
        .map(|v| vec![v.version, v.app_version])
        .collect();
    ui.table(&["VERSION", "APP VERSION"], &rows);
    Ok(())
}

async fn get_values(orch: &Orchestrator, namespace: &str, secret: &str) -> Result<String> {
    orch.values_secret(namespace, secret)
        .await?
        .ok_or_else(|| CliError::usage(format!("Cannot find values secret {}", secret)))
}
