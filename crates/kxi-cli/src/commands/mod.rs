//! CLI command implementations
//!
//! Every option resolves in the same order: command-line flag, environment
//! variable (handled by clap), the active profile, then the built-in default.

pub mod assembly;
pub mod configure;
pub mod entitlement;
pub mod install;

use std::sync::Arc;

use clap::Args;
use url::Url;

use kxi_client::{
    CacheLocation, CliConfig, ControllerClient, Profile, ServiceAccount, TokenCache, TokenProvider,
    defaults, https_base,
};
use kxi_kube::{AssemblyManager, Interaction, KubeBackend, RemoteBackend};

use crate::error::{CliError, Result};

/// Active profile
pub struct Context {
    pub profile_name: String,
    pub profile: Profile,
}

impl Context {
    pub fn load(profile_name: &str) -> Result<Self> {
        let config = CliConfig::load()?;
        Ok(Self {
            profile_name: profile_name.to_string(),
            profile: config.profile(profile_name)?,
        })
    }

    pub fn namespace(&self, flag: Option<&str>) -> String {
        pick(flag, self.profile.namespace.as_deref(), defaults::NAMESPACE)
    }
}

/// First of flag and profile value, else the default
pub fn pick(flag: Option<&str>, profile: Option<&str>, default: &str) -> String {
    flag.or(profile).unwrap_or(default).to_string()
}

/// Service account and deployment to authenticate against
#[derive(Args, Debug, Clone, Default)]
pub struct AuthArgs {
    /// Hostname of the kdb Insights Enterprise deployment
    #[arg(long, env = "KXI_HOSTNAME")]
    pub hostname: Option<String>,

    /// Keycloak realm
    #[arg(long, env = "KXI_REALM")]
    pub realm: Option<String>,

    /// Service account client id
    #[arg(long, env = "INSIGHTS_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Service account client secret
    #[arg(long, env = "INSIGHTS_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,
}

impl AuthArgs {
    /// Base URL of the deployment and a bearer token for it
    pub async fn connect(&self, ctx: &Context) -> Result<(Url, String)> {
        let hostname = self
            .hostname
            .clone()
            .or_else(|| ctx.profile.hostname.clone())
            .ok_or_else(|| {
                CliError::usage_with_help(
                    "A hostname is required",
                    "set --hostname, KXI_HOSTNAME or hostname in the profile",
                )
            })?;
        let base = https_base(&hostname)?;
        let realm = pick(
            self.realm.as_deref(),
            ctx.profile.realm.as_deref(),
            defaults::REALM,
        );
        let account = ServiceAccount::require(
            self.client_id.clone().or_else(|| ctx.profile.client_id.clone()),
            self.client_secret
                .clone()
                .or_else(|| ctx.profile.client_secret.clone()),
        )?;

        let provider = TokenProvider::new(base.clone(), realm, account)?.with_cache(CacheLocation {
            path: TokenCache::default_path()?,
            profile: ctx.profile_name.clone(),
        });
        let token = provider.token().await?;
        Ok((base, token))
    }
}

/// Options shared by every assembly command
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Kubernetes namespace
    #[arg(short, long, env = "KXI_NAMESPACE")]
    pub namespace: Option<String>,

    /// Use the Kubernetes API directly instead of the controller REST API
    #[arg(long, env = "KXI_USE_KUBECONFIG")]
    pub use_kubeconfig: bool,

    #[command(flatten)]
    pub auth: AuthArgs,
}

impl ConnectionArgs {
    /// Lifecycle manager over the selected backend
    pub async fn manager(&self, ctx: &Context, ui: Arc<dyn Interaction>) -> Result<AssemblyManager> {
        if self.use_kubeconfig {
            tracing::debug!("using the Kubernetes API for assemblies");
            let backend = KubeBackend::connect().await?;
            return Ok(AssemblyManager::new(Arc::new(backend), ui));
        }

        let (base, token) = self.auth.connect(ctx).await?;
        tracing::debug!(base = %base, "using the controller API for assemblies");
        let controller = ControllerClient::new(&base, token)?;
        Ok(AssemblyManager::new(
            Arc::new(RemoteBackend::new(controller)),
            ui,
        ))
    }
}
