//! Assembly commands - backup, deploy, status, list, teardown

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};

use kxi_kube::{
    AssemblyBackend, AssemblyManager, BackendMode, Interaction, SubmitOutcome, TeardownOutcome,
};

use super::{ConnectionArgs, Context};
use crate::error::{CliError, Result};
use crate::terminal::TermInteraction;

#[derive(Subcommand, Debug)]
pub enum AssemblyCommand {
    /// Back up the definitions of running assemblies to a file
    Backup(BackupArgs),

    /// Create assemblies from a file
    Deploy(DeployArgs),

    /// Print the status of an assembly
    Status(StatusArgs),

    /// List assemblies
    List(ListArgs),

    /// Tear down assemblies
    Teardown(TeardownArgs),
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// File to write the backup to
    #[arg(long, env = "KXI_ASSEMBLY_BACKUP_FILEPATH")]
    pub filepath: Option<PathBuf>,

    /// Overwrite an existing backup file without asking
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Assembly or backup file to submit
    #[arg(long, short = 'f')]
    pub filepath: PathBuf,

    /// Wait for each assembly to become ready
    #[arg(long)]
    pub wait: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Assembly name
    #[arg(long)]
    pub name: String,

    /// Wait for the assembly to become ready
    #[arg(long)]
    pub wait: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct TeardownArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Assembly name
    #[arg(long, required_unless_present = "all", conflicts_with = "all")]
    pub name: Option<String>,

    /// Tear down every assembly in the namespace
    #[arg(long)]
    pub all: bool,

    /// Wait until the assembly is gone
    #[arg(long)]
    pub wait: bool,

    /// Do not ask for confirmation
    #[arg(long)]
    pub force: bool,
}

pub async fn run(ctx: &Context, command: AssemblyCommand) -> Result<()> {
    let ui: Arc<dyn Interaction> = Arc::new(TermInteraction::new());

    match command {
        AssemblyCommand::Backup(args) => {
            let manager = args.connection.manager(ctx, ui.clone()).await?;
            let namespace = ctx.namespace(args.connection.namespace.as_deref());
            let path = args
                .filepath
                .or_else(|| ctx.profile.assembly_backup_file.clone());
            manager.backup(&namespace, path.as_deref(), args.force).await?;
            Ok(())
        }

        AssemblyCommand::Deploy(args) => {
            let manager = args.connection.manager(ctx, ui.clone()).await?;
            let namespace = ctx.namespace(args.connection.namespace.as_deref());
            deploy(&manager, &namespace, &args).await
        }

        AssemblyCommand::Status(args) => {
            let manager = args.connection.manager(ctx, ui.clone()).await?;
            let namespace = ctx.namespace(args.connection.namespace.as_deref());
            status(&manager, ui.as_ref(), &namespace, &args.name, args.wait).await
        }

        AssemblyCommand::List(args) => {
            let manager = args.connection.manager(ctx, ui.clone()).await?;
            let namespace = ctx.namespace(args.connection.namespace.as_deref());
            list(&manager, ui.as_ref(), &namespace).await
        }

        AssemblyCommand::Teardown(args) => {
            let manager = args.connection.manager(ctx, ui.clone()).await?;
            let namespace = ctx.namespace(args.connection.namespace.as_deref());
            teardown(&manager, &namespace, &args).await
        }
    }
}

async fn deploy(manager: &AssemblyManager, namespace: &str, args: &DeployArgs) -> Result<()> {
    let results = manager
        .restore_file(namespace, &args.filepath, args.wait)
        .await?;

    let failed: Vec<&str> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.name.as_str())
        .collect();
    let not_ready = results
        .iter()
        .filter(|r| r.outcome == SubmitOutcome::NotReady)
        .count();
    tracing::debug!(submitted = results.len(), failed = failed.len(), not_ready, "deploy finished");

    if failed.is_empty() {
        Ok(())
    } else {
        Err(CliError::assembly(format!(
            "Failed to deploy assemblies: {}",
            failed.join(", ")
        )))
    }
}

async fn status(
    manager: &AssemblyManager,
    ui: &dyn Interaction,
    namespace: &str,
    name: &str,
    wait: bool,
) -> Result<()> {
    let ready = if wait {
        manager.wait_ready(namespace, name).await
    } else {
        false
    };

    let state = manager.status(namespace, name).await?.ok_or_else(|| {
        CliError::assembly(format!("Assembly {} not found in namespace {}", name, namespace))
    })?;

    if state.is_reported() {
        println!("{}", serde_json::to_string_pretty(&state.report)?);
    } else {
        ui.info("Assembly not yet deployed");
    }

    if ready || state.ready {
        Ok(())
    } else {
        Err(CliError::assembly(format!("Assembly {} is not ready", name)))
    }
}

async fn list(manager: &AssemblyManager, ui: &dyn Interaction, namespace: &str) -> Result<()> {
    let assemblies = manager.list(namespace).await?;
    if assemblies.is_empty() {
        ui.info("No assemblies found");
        return Ok(());
    }

    let flag = |v: Option<bool>| v.map(|b| b.to_string()).unwrap_or_default();
    match manager.backend().mode() {
        BackendMode::Direct => {
            let rows: Vec<Vec<String>> = assemblies
                .into_iter()
                .map(|a| vec![a.name, a.namespace.unwrap_or_default()])
                .collect();
            ui.table(&["ASSEMBLY NAME", "NAMESPACE"], &rows);
        }
        BackendMode::Remote => {
            let rows: Vec<Vec<String>> = assemblies
                .into_iter()
                .map(|a| vec![a.name, flag(a.running), flag(a.ready)])
                .collect();
            ui.table(&["ASSEMBLY NAME", "RUNNING", "READY"], &rows);
        }
    }
    Ok(())
}

async fn teardown(manager: &AssemblyManager, namespace: &str, args: &TeardownArgs) -> Result<()> {
    let outcomes = match &args.name {
        Some(name) => vec![(
            name.clone(),
            manager.delete(namespace, name, args.wait, args.force).await?,
        )],
        None => manager.delete_all(namespace, args.wait, args.force).await?,
    };

    let failed: Vec<String> = outcomes
        .into_iter()
        .filter(|(_, o)| matches!(o, TeardownOutcome::Failed(_) | TeardownOutcome::TimedOut))
        .map(|(name, _)| name)
        .collect();

    if failed.is_empty() {
        Ok(())
    } else {
        Err(CliError::assembly(format!(
            "Failed to tear down assemblies: {}",
            failed.join(", ")
        )))
    }
}
