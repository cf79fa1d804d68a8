//! kxi Core - shared types for the kdb Insights Enterprise installer
//!
//! This crate provides the foundational types used throughout kxi:
//! - `Assembly`: The assembly custom resource and its last-applied annotation
//! - `BackupSet`: The on-disk assembly backup format
//! - `InstallValues`: Lookups into Helm values files and secrets
//! - `release`: Helm release, history and chart search records
//! - `version`: Operator/platform version compatibility gating

pub mod assembly;
pub mod backup;
pub mod error;
pub mod release;
pub mod values;
pub mod version;

pub use assembly::{
    Assembly, AssemblyMetadata, AssemblyStatus, AssemblySummary, Condition, ConditionReport,
    ConditionStatus,
};
pub use backup::{BackupCollection, BackupSet, DEFAULT_BACKUP_FILE};
pub use error::{CoreError, Result};
pub use release::{ChartVersion, HelmRevision, InstalledRelease, ReleaseStatus};
pub use values::InstallValues;
