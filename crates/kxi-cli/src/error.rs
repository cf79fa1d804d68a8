//! CLI error types with exit code handling

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use kxi_client::ClientError;
use kxi_core::CoreError;
use kxi_kube::KubeError;

use crate::exit_codes;

/// Errors surfaced by `kxi` commands
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Missing or conflicting options
    #[error("{message}")]
    #[diagnostic(code(kxi::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Cluster, Helm or assembly backend failure
    #[error("{0}")]
    #[diagnostic(code(kxi::cli::kube))]
    Kube(#[from] KubeError),

    /// REST API or configuration failure
    #[error("{0}")]
    #[diagnostic(code(kxi::cli::client))]
    Client(#[from] ClientError),

    /// Model or version gate failure
    #[error("{0}")]
    #[diagnostic(code(kxi::cli::core))]
    Core(#[from] CoreError),

    /// An assembly did not reach the expected state
    #[error("{message}")]
    #[diagnostic(code(kxi::cli::assembly))]
    Assembly { message: String },

    /// Install, upgrade, rollback or uninstall stopped part way
    #[error("{reason}")]
    #[diagnostic(code(kxi::cli::aborted))]
    Aborted {
        reason: String,
        #[help]
        help: Option<String>,
    },

    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(kxi::cli::io))]
    Io(#[from] std::io::Error),

    /// Output could not be serialized
    #[error("Serialization error: {0}")]
    #[diagnostic(code(kxi::cli::serialization))]
    Serialization(#[from] serde_json::Error),
}

impl CliError {
    /// Exit code for this error
    pub fn exit_code(&self) -> i32 {
        exit_codes::ERROR
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: None,
        }
    }

    pub fn usage_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn assembly(message: impl Into<String>) -> Self {
        Self::Assembly {
            message: message.into(),
        }
    }

    /// Abort, pointing at the assembly backup when one was written
    pub fn aborted(reason: impl Into<String>, backup: Option<PathBuf>) -> Self {
        Self::Aborted {
            reason: reason.into(),
            help: backup.map(|path| {
                format!(
                    "Assembly definitions were saved to {}. Resubmit them with `kxi assembly deploy --filepath {}`",
                    path.display(),
                    path.display()
                )
            }),
        }
    }

    /// Help text, if any
    pub fn help(&self) -> Option<&str> {
        match self {
            Self::Usage { help, .. } | Self::Aborted { help, .. } => help.as_deref(),
            _ => None,
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_help_names_backup() {
        let err = CliError::aborted(
            "Command 'helm upgrade --install' failed: timed out",
            Some(PathBuf::from("/tmp/kxi-assembly-state.yaml")),
        );
        assert_eq!(err.exit_code(), exit_codes::ERROR);
        assert!(
            err.help()
                .unwrap()
                .contains("kxi assembly deploy --filepath /tmp/kxi-assembly-state.yaml")
        );
    }

    #[test]
    fn test_wrapped_messages_pass_through() {
        let err: CliError = CoreError::Version("Cannot upgrade from version 1.6.0 to version 1.5.0".into()).into();
        assert_eq!(err.to_string(), "Cannot upgrade from version 1.6.0 to version 1.5.0");
        assert!(err.help().is_none());
    }
}
