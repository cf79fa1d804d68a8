//! Error types for kxi-kube

use thiserror::Error;

use kxi_client::ClientError;
use kxi_core::CoreError;

/// Result type for kxi-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur talking to the cluster, Helm or the controller
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Error response from an assembly backend, unwrapped to one line
    #[error("{message}")]
    Backend { status: u16, message: String },

    /// REST client error (remote mode, tokens)
    #[error("{0}")]
    Client(#[from] ClientError),

    /// Model or version gate error
    #[error("{0}")]
    Core(#[from] CoreError),

    /// Helm exited non-zero
    #[error("Command '{command}' failed: {stderr}")]
    Helm { command: String, stderr: String },

    /// Helm binary could not be started
    #[error("Could not run helm: {0}")]
    HelmUnavailable(String),

    /// A named resource does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Chart archive could not be read
    #[error("{0}")]
    Archive(String),

    /// Operation is not available for the selected backend
    #[error("{0}")]
    Unsupported(String),

    /// Invalid configuration or input
    #[error("{0}")]
    InvalidConfig(String),

    /// Waited too long for the cluster to converge
    #[error("{0}")]
    Timeout(String),

    /// Interactive input could not be read
    #[error("Failed to read input: {0}")]
    Interaction(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => Some(resp.code),
            KubeError::Backend { status, .. } => Some(*status),
            KubeError::Client(e) => e.status(),
            _ => None,
        }
    }

    /// Check if this is a 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::NotFound { .. }) || self.status() == Some(404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// Unwrap a Kubernetes API failure to `reason. message`
    pub fn from_kube(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) => KubeError::Backend {
                status: resp.code,
                message: format!("{}. {}", resp.reason, resp.message),
            },
            other => KubeError::Api(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_from_kube_unwraps_status() {
        let err = KubeError::from_kube(api_error(
            409,
            "AlreadyExists",
            "assemblies.insights.kx.com \"basic\" already exists",
        ));
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "AlreadyExists. assemblies.insights.kx.com \"basic\" already exists"
        );
    }

    #[test]
    fn test_not_found_helpers() {
        assert!(KubeError::Api(api_error(404, "NotFound", "gone")).is_not_found());
        assert!(
            KubeError::NotFound {
                kind: "Secret".into(),
                name: "x".into()
            }
            .is_not_found()
        );
        assert!(!KubeError::Timeout("slow".into()).is_not_found());
    }
}
