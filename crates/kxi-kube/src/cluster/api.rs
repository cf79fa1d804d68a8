//! Live cluster operations over the Kubernetes API

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::ByteString;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use serde_json::Value;

use super::{ClusterOps, NewSecret, OPERATOR_NAME_LABEL, OperatorDeployment};
use crate::backend::DeleteOutcome;
use crate::error::{KubeError, Result};

/// Cluster operations backed by a Kubernetes client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the local kubeconfig or in-cluster configuration
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn crds(&self) -> Api<CustomResourceDefinition> {
        Api::all(self.client.clone())
    }
}

/// Treat 409 from a create as success
fn tolerate_conflict<T>(result: std::result::Result<T, kube::Error>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
        Err(e) => Err(KubeError::from_kube(e)),
    }
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        tracing::debug!(namespace = name, "ensuring namespace");
        tolerate_conflict(api.create(&PostParams::default(), &namespace).await)
    }

    async fn read_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let Some(secret) = self
            .secrets(namespace)
            .get_opt(name)
            .await
            .map_err(KubeError::from_kube)?
        else {
            return Ok(None);
        };

        if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
            return Ok(Some(String::from_utf8_lossy(&bytes.0).into_owned()));
        }
        Ok(secret.string_data.and_then(|mut d| d.remove(key)))
    }

    async fn copy_secret(&self, name: &str, from: &str, to: &str) -> Result<()> {
        let source = self
            .secrets(from)
            .get_opt(name)
            .await
            .map_err(KubeError::from_kube)?
            .ok_or_else(|| KubeError::NotFound {
                kind: "Secret".to_string(),
                name: format!("{}/{}", from, name),
            })?;

        let copy = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(to.to_string()),
                ..Default::default()
            },
            data: source.data,
            string_data: source.string_data,
            type_: source.type_,
            immutable: source.immutable,
        };

        tracing::debug!(secret = name, from, to, "copying secret");
        tolerate_conflict(self.secrets(to).create(&PostParams::default(), &copy).await)
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self
            .secrets(namespace)
            .get_opt(name)
            .await
            .map_err(KubeError::from_kube)?
            .is_some())
    }

    async fn apply_secret(&self, namespace: &str, secret: &NewSecret) -> Result<()> {
        let body = Secret {
            metadata: ObjectMeta {
                name: Some(secret.name.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                secret
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                    .collect(),
            ),
            type_: Some(secret.secret_type.clone()),
            ..Default::default()
        };

        let api = self.secrets(namespace);
        match api.create(&PostParams::default(), &body).await {
            Ok(_) => {
                tracing::debug!(secret = %secret.name, namespace, "secret created");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                api.replace(&secret.name, &PostParams::default(), &body)
                    .await
                    .map_err(KubeError::from_kube)?;
                tracing::debug!(secret = %secret.name, namespace, "secret replaced");
                Ok(())
            }
            Err(e) => Err(KubeError::from_kube(e)),
        }
    }

    async fn crd_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .crds()
            .get_opt(name)
            .await
            .map_err(KubeError::from_kube)?
            .is_some())
    }

    async fn delete_crd(&self, name: &str) -> Result<DeleteOutcome> {
        match self.crds().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(KubeError::from_kube(e)),
        }
    }

    async fn create_crd(&self, manifest: &Value) -> Result<()> {
        let crd: CustomResourceDefinition = serde_json::from_value(manifest.clone())?;
        self.crds()
            .create(&PostParams::default(), &crd)
            .await
            .map_err(KubeError::from_kube)?;
        Ok(())
    }

    async fn operator_deployments(&self) -> Result<Vec<OperatorDeployment>> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().labels(OPERATOR_NAME_LABEL))
            .await
            .map_err(KubeError::from_kube)?;

        Ok(list
            .items
            .iter()
            .map(|d| {
                let meta = &d.metadata;
                OperatorDeployment::from_metadata(
                    meta.namespace.as_deref().unwrap_or_default(),
                    meta.name.as_deref().unwrap_or_default(),
                    &meta.labels.clone().unwrap_or_default(),
                    &meta.annotations.clone().unwrap_or_default(),
                )
            })
            .collect())
    }
}
