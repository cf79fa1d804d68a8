//! Cluster capabilities used by the installer
//!
//! Namespaces, secrets, assembly CRDs and operator discovery. The installer
//! only needs a handful of calls, so they sit behind one trait with a live
//! implementation over `kube` and an in-memory one for tests.

mod api;
mod mock;

pub use api::KubeCluster;
pub use mock::{ClusterCall, MockCluster};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::DeleteOutcome;
use crate::error::Result;

/// Namespace the operator chart is installed into
pub const OPERATOR_NAMESPACE: &str = "kxi-operator";

/// Label identifying operator deployments
pub const OPERATOR_NAME_LABEL: &str = "app.kubernetes.io/name=kxi-operator";

const VERSION_LABEL: &str = "app.kubernetes.io/version";
const HELM_RELEASE_ANNOTATION: &str = "meta.helm.sh/release-name";

/// An operator deployment found in the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorDeployment {
    pub namespace: String,
    pub name: String,
    pub version: Option<String>,
    /// Release name when the deployment is managed by Helm
    pub helm_release: Option<String>,
}

impl OperatorDeployment {
    /// Build from deployment metadata
    pub fn from_metadata(
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            version: labels.get(VERSION_LABEL).cloned(),
            helm_release: annotations.get(HELM_RELEASE_ANNOTATION).cloned(),
        }
    }

    pub fn is_helm_managed(&self) -> bool {
        self.helm_release.is_some()
    }
}

/// Opaque secret type
pub const SECRET_TYPE_OPAQUE: &str = "Opaque";

/// A secret to write, with raw (not base64) data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSecret {
    pub name: String,
    pub secret_type: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl NewSecret {
    pub fn opaque(name: &str) -> Self {
        Self {
            name: name.to_string(),
            secret_type: SECRET_TYPE_OPAQUE.to_string(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// Cluster operations the installer needs
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Create a namespace; an existing one is fine
    async fn ensure_namespace(&self, name: &str) -> Result<()>;

    /// One decoded data key of a secret, `None` if the secret or key is missing
    async fn read_secret_value(&self, namespace: &str, name: &str, key: &str)
    -> Result<Option<String>>;

    /// Copy a secret between namespaces; an existing target is left alone
    async fn copy_secret(&self, name: &str, from: &str, to: &str) -> Result<()>;

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Create a secret, replacing the data of an existing one
    async fn apply_secret(&self, namespace: &str, secret: &NewSecret) -> Result<()>;

    async fn crd_exists(&self, name: &str) -> Result<bool>;

    async fn delete_crd(&self, name: &str) -> Result<DeleteOutcome>;

    /// Create a CRD from its manifest
    async fn create_crd(&self, manifest: &Value) -> Result<()>;

    /// Operator deployments in every namespace
    async fn operator_deployments(&self) -> Result<Vec<OperatorDeployment>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_from_metadata() {
        let labels = BTreeMap::from([(VERSION_LABEL.to_string(), "1.6.0".to_string())]);
        let annotations =
            BTreeMap::from([(HELM_RELEASE_ANNOTATION.to_string(), "insights".to_string())]);

        let managed =
            OperatorDeployment::from_metadata("kxi-operator", "kxi-operator", &labels, &annotations);
        assert_eq!(managed.version.as_deref(), Some("1.6.0"));
        assert!(managed.is_helm_managed());

        let manual =
            OperatorDeployment::from_metadata("ops", "kxi-operator", &labels, &BTreeMap::new());
        assert!(!manual.is_helm_managed());
    }
}
