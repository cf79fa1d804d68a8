//! kxi Kube - cluster integration for kxi
//!
//! This crate provides:
//! - **Assembly Backends**: the assembly custom resource (direct) or the controller REST API (remote)
//! - **Lifecycle Manager**: backup, restore, deploy, wait and teardown of assemblies
//! - **Cluster Operations**: namespaces, secrets, CRDs and operator discovery
//! - **Helm**: chart install, upgrade, rollback and search through the `helm` binary
//! - **CRD Replacement**: assembly CRDs recreated from the operator chart archive
//! - **Orchestrator**: install, upgrade, rollback and uninstall sequencing
//! - **Setup**: install secrets and values gathered interactively
//! - **Interaction**: prompts and output behind a trait, scripted in tests

pub mod backend;
pub mod cluster;
pub mod crd;
pub mod error;
pub mod helm;
pub mod interact;
pub mod lifecycle;
pub mod orchestrator;
pub mod poll;
pub mod setup;

pub use backend::{
    AssemblyBackend, AssemblyQuery, AssemblyState, BackendCounts, BackendMode, DeleteOutcome,
    KubeBackend, MockAssemblyBackend, RemoteBackend,
};
pub use cluster::{
    ClusterCall, ClusterOps, KubeCluster, MockCluster, NewSecret, OperatorDeployment,
};
pub use crd::{ASSEMBLY_CRDS, CrdReplacer};
pub use error::{KubeError, Result};
pub use helm::{HelmCall, HelmCli, HelmClient, InstallRequest, MockHelm, RepoEntry};
pub use interact::{Interaction, Line, ScriptedInteraction, render_table};
pub use lifecycle::{AssemblyManager, SubmitOutcome, Submission, TeardownOutcome};
pub use orchestrator::{
    ChartRepo, InstallOptions, Orchestrator, Outcome, RollbackOptions, UninstallOptions,
};
pub use poll::{Backoff, MAX_ATTEMPTS, PollPolicy};
pub use setup::{Setup, SetupOptions, SetupResult};
