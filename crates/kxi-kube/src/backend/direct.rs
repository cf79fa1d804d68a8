//! Direct mode: the assembly custom resource via the Kubernetes API

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::Client;

use kxi_core::assembly::{API_GROUP, API_VERSION, KIND, PLURAL};
use kxi_core::{Assembly, AssemblySummary};

use super::{AssemblyBackend, AssemblyQuery, AssemblyState, BackendMode, DeleteOutcome};
use crate::error::{KubeError, Result};

/// Assembly backend over `insights.kx.com/v1` custom objects
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
    resource: ApiResource,
}

impl KubeBackend {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk(API_GROUP, API_VERSION, KIND);
        Self {
            client,
            resource: ApiResource::from_gvk_with_plural(&gvk, PLURAL),
        }
    }

    /// Connect using the default kubeconfig or in-cluster configuration
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn namespaced(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }

    fn to_assembly(obj: DynamicObject) -> Result<Assembly> {
        Ok(Assembly::from_value(serde_json::to_value(obj)?)?)
    }
}

#[async_trait]
impl AssemblyBackend for KubeBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Direct
    }

    async fn create(&self, namespace: &str, assembly: &Assembly) -> Result<()> {
        let mut body = assembly.to_value()?;
        if body.get("apiVersion").is_none() {
            body["apiVersion"] = format!("{}/{}", API_GROUP, API_VERSION).into();
        }
        if body.get("kind").is_none() {
            body["kind"] = KIND.into();
        }
        let obj: DynamicObject = serde_json::from_value(body)?;

        tracing::debug!(namespace, name = assembly.name(), "creating assembly");
        self.namespaced(namespace)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(KubeError::from_kube)?;
        Ok(())
    }

    async fn status(&self, namespace: &str, name: &str) -> Result<Option<AssemblyState>> {
        let Some(obj) = self
            .namespaced(namespace)
            .get_opt(name)
            .await
            .map_err(KubeError::from_kube)?
        else {
            return Ok(None);
        };

        let assembly = Self::to_assembly(obj)?;
        Ok(Some(AssemblyState {
            ready: assembly.is_ready(),
            report: serde_json::to_value(assembly.condition_report())?,
        }))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<AssemblySummary>> {
        let items = self
            .list_resources(&AssemblyQuery::in_namespace(namespace))
            .await?;
        Ok(items
            .iter()
            .filter(|a| !a.name().is_empty())
            .map(AssemblySummary::from_assembly)
            .collect())
    }

    async fn list_resources(&self, query: &AssemblyQuery) -> Result<Vec<Assembly>> {
        let api: Api<DynamicObject> = match &query.namespace {
            Some(ns) => self.namespaced(ns),
            None => Api::all_with(self.client.clone(), &self.resource),
        };

        let mut params = ListParams::default();
        if let Some(labels) = &query.label_selector {
            params = params.labels(labels);
        }
        if let Some(fields) = &query.field_selector {
            params = params.fields(fields);
        }

        let list = api.list(&params).await.map_err(KubeError::from_kube)?;
        list.items.into_iter().map(Self::to_assembly).collect()
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        match self
            .namespaced(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(KubeError::from_kube(e)),
        }
    }
}
