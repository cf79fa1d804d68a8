//! kxi REST clients
//!
//! This crate provides everything kxi needs to talk to a deployed platform
//! over HTTPS:
//!
//! - **Profiles**: per-profile defaults in `~/.config/kxi/config.yaml`
//! - **Tokens**: service account tokens with an on-disk cache
//! - **Controller**: remote assembly deploy, status, list and teardown
//! - **Entitlements**: entity CRUD and group membership
//!
//! ## Example
//!
//! ```rust,no_run
//! use kxi_client::{ControllerClient, ServiceAccount, TokenProvider, https_base};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let base = https_base("insights.example.com")?;
//! let tokens = TokenProvider::new(base.clone(), "insights", ServiceAccount::new("id", "secret"))?;
//! let controller = ControllerClient::new(&base, tokens.token().await?)?;
//!
//! for assembly in controller.list().await? {
//!     println!("{} ready={:?}", assembly.name, assembly.ready);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod entitlement;
pub mod error;
pub mod http;

// Re-exports for convenience
pub use auth::{CacheLocation, TokenProvider};
pub use config::{CliConfig, DEFAULT_PROFILE, Profile, defaults, https_base, sanitize_hostname};
pub use controller::{ControllerClient, RemoteStatus};
pub use credentials::{CachedToken, ServiceAccount, TokenCache};
pub use entitlement::{
    Actor, Entitlement, EntitlementClient, EntitlementUpdate, EntityType, NewEntitlement,
    parse_groups,
};
pub use error::{ClientError, Result};
pub use http::ApiClient;
