//! kxi - install, upgrade and manage kdb Insights Enterprise

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use kxi_client::DEFAULT_PROFILE;

mod commands;
mod error;
mod exit_codes;
mod terminal;

use commands::Context;
use commands::assembly::AssemblyCommand;
use commands::configure::ConfigureArgs;
use commands::entitlement::EntitlementCommand;
use commands::install::InstallCommand;

#[derive(Parser)]
#[command(name = "kxi")]
#[command(version)]
#[command(about = "Install, upgrade and manage kdb Insights Enterprise", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Configuration profile to take defaults from
    #[arg(long, global = true, env = "KXI_PROFILE", default_value = DEFAULT_PROFILE)]
    profile: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, back up and tear down assemblies
    #[command(subcommand)]
    Assembly(AssemblyCommand),

    /// Install, upgrade, roll back and uninstall kdb Insights Enterprise
    #[command(subcommand)]
    Install(InstallCommand),

    /// Manage entitlements
    #[command(subcommand)]
    Entitlement(EntitlementCommand),

    /// Write connection defaults to a profile
    Configure(ConfigureArgs),
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

async fn run(cli: Cli) -> error::Result<()> {
    match cli.command {
        Commands::Configure(args) => commands::configure::run(&cli.profile, &args),
        Commands::Assembly(cmd) => commands::assembly::run(&Context::load(&cli.profile)?, cmd).await,
        Commands::Install(cmd) => commands::install::run(&Context::load(&cli.profile)?, cmd).await,
        Commands::Entitlement(cmd) => {
            commands::entitlement::run(&Context::load(&cli.profile)?, cmd).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too
            let code = if e.use_stderr() {
                exit_codes::ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    init_logging(cli.debug);

    let code = match run(cli).await {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(help) = e.help() {
                eprintln!("  {}", style(help).dim());
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}
