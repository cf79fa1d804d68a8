//! Configure command - write connection defaults to a profile

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;

use kxi_client::{CliConfig, Profile, sanitize_hostname};

use crate::error::Result;

#[derive(Args, Debug, Default)]
pub struct ConfigureArgs {
    /// Hostname of the kdb Insights Enterprise deployment
    #[arg(long)]
    pub hostname: Option<String>,

    /// Kubernetes namespace
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Keycloak realm
    #[arg(long)]
    pub realm: Option<String>,

    /// Service account client id
    #[arg(long)]
    pub client_id: Option<String>,

    /// Service account client secret
    #[arg(long)]
    pub client_secret: Option<String>,

    /// Name of the Helm chart repository
    #[arg(long)]
    pub chart_repo_name: Option<String>,

    /// URL of the Helm chart repository
    #[arg(long)]
    pub chart_repo_url: Option<String>,

    /// Helm release name
    #[arg(long)]
    pub release: Option<String>,

    /// File to back up assembly definitions to
    #[arg(long)]
    pub assembly_backup_filepath: Option<PathBuf>,

    /// Image pull secret name
    #[arg(long)]
    pub image_pull_secret: Option<String>,

    /// License secret name
    #[arg(long)]
    pub license_secret: Option<String>,

    /// Install config secret name
    #[arg(long)]
    pub install_config_secret: Option<String>,
}

/// Overlay the given flags on a profile, leaving the rest untouched
fn merge(mut profile: Profile, args: &ConfigureArgs) -> Profile {
    fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
        if value.is_some() {
            slot.clone_from(value);
        }
    }

    if let Some(host) = &args.hostname {
        profile.hostname = Some(sanitize_hostname(host));
    }
    set(&mut profile.namespace, &args.namespace);
    set(&mut profile.realm, &args.realm);
    set(&mut profile.client_id, &args.client_id);
    set(&mut profile.client_secret, &args.client_secret);
    set(&mut profile.chart_repo_name, &args.chart_repo_name);
    set(&mut profile.chart_repo_url, &args.chart_repo_url);
    set(&mut profile.release_name, &args.release);
    set(&mut profile.assembly_backup_file, &args.assembly_backup_filepath);
    set(&mut profile.image_pull_secret, &args.image_pull_secret);
    set(&mut profile.license_secret, &args.license_secret);
    set(&mut profile.install_config_secret, &args.install_config_secret);
    profile
}

fn configure_at(path: &Path, profile_name: &str, args: &ConfigureArgs) -> Result<()> {
    let mut config = if path.exists() {
        CliConfig::load_from(path)?
    } else {
        CliConfig::default()
    };
    let current = config
        .profiles
        .get(profile_name)
        .cloned()
        .unwrap_or_default();
    config.set_profile(profile_name, merge(current, args));
    config.save_to(path)?;
    Ok(())
}

pub fn run(profile_name: &str, args: &ConfigureArgs) -> Result<()> {
    let path = CliConfig::default_path()?;
    configure_at(&path, profile_name, args)?;
    tracing::debug!(path = %path.display(), profile = profile_name, "profile saved");
    println!(
        "{} Profile {} saved to {}",
        style("✓").green().bold(),
        profile_name,
        path.display()
    );
    Ok(())
}
