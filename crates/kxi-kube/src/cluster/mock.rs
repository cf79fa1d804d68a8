//! In-memory cluster for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use serde_json::Value;

use super::{ClusterOps, NewSecret, OperatorDeployment};
use crate::backend::DeleteOutcome;
use crate::error::{KubeError, Result};

/// Mutating call recorded by [`MockCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    EnsureNamespace(String),
    CopySecret { name: String, from: String, to: String },
    ApplySecret { namespace: String, name: String },
    DeleteCrd(String),
    CreateCrd(String),
}

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeSet<String>,
    /// (namespace, name) -> decoded data
    secrets: HashMap<(String, String), BTreeMap<String, String>>,
    /// (namespace, name) -> secret type of secrets written through `apply_secret`
    secret_types: HashMap<(String, String), String>,
    crds: BTreeMap<String, Value>,
    /// Existence checks a deleted CRD keeps answering true for
    crd_linger: HashMap<String, usize>,
    terminating_crds: HashMap<String, usize>,
    operators: Vec<OperatorDeployment>,
    calls: Vec<ClusterCall>,
}

/// In-memory cluster that records every mutating call
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<RwLock<ClusterState>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClusterState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a secret with the given data
    pub fn with_secret(self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        let data = data
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.write()
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
        self
    }

    /// Add an installed CRD
    pub fn with_crd(self, name: &str) -> Self {
        self.write().crds.insert(
            name.to_string(),
            serde_json::json!({"metadata": {"name": name}}),
        );
        self
    }

    /// Add an operator deployment
    pub fn with_operator(self, operator: OperatorDeployment) -> Self {
        self.write().operators.push(operator);
        self
    }

    /// Keep `name` reported as existing for `checks` calls after deletion
    pub fn linger_crd(&self, name: &str, checks: usize) {
        self.write().crd_linger.insert(name.to_string(), checks);
    }

    /// Every mutating call in order
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .clone()
    }

    /// Manifest of an installed CRD
    pub fn crd(&self, name: &str) -> Option<Value> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .crds
            .get(name)
            .cloned()
    }

    /// Decoded data of a secret
    pub fn secret(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Type of a secret written through `apply_secret`
    pub fn secret_type(&self, namespace: &str, name: &str) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .secret_types
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn has_secret(&self, namespace: &str, name: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .secrets
            .contains_key(&(namespace.to_string(), name.to_string()))
    }
}

#[async_trait]
impl ClusterOps for MockCluster {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.write();
        state.calls.push(ClusterCall::EnsureNamespace(name.to_string()));
        state.namespaces.insert(name.to_string());
        Ok(())
    }

    async fn read_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|data| data.get(key).cloned()))
    }

    async fn copy_secret(&self, name: &str, from: &str, to: &str) -> Result<()> {
        let mut state = self.write();
        state.calls.push(ClusterCall::CopySecret {
            name: name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });

        let data = state
            .secrets
            .get(&(from.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| KubeError::NotFound {
                kind: "Secret".to_string(),
                name: format!("{}/{}", from, name),
            })?;
        state
            .secrets
            .entry((to.to_string(), name.to_string()))
            .or_insert(data);
        Ok(())
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self.has_secret(namespace, name))
    }

    async fn apply_secret(&self, namespace: &str, secret: &NewSecret) -> Result<()> {
        let key = (namespace.to_string(), secret.name.clone());
        let data = secret
            .data
            .iter()
            .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
            .collect();

        let mut state = self.write();
        state.calls.push(ClusterCall::ApplySecret {
            namespace: namespace.to_string(),
            name: secret.name.clone(),
        });
        state.secrets.insert(key.clone(), data);
        state.secret_types.insert(key, secret.secret_type.clone());
        Ok(())
    }

    async fn crd_exists(&self, name: &str) -> Result<bool> {
        let mut guard = self.write();
        let state = &mut *guard;
        if let Some(remaining) = state.terminating_crds.get_mut(name) {
            if *remaining == 0 {
                state.terminating_crds.remove(name);
                return Ok(false);
            }
            *remaining -= 1;
            return Ok(true);
        }
        Ok(state.crds.contains_key(name))
    }

    async fn delete_crd(&self, name: &str) -> Result<DeleteOutcome> {
        let mut guard = self.write();
        let state = &mut *guard;
        state.calls.push(ClusterCall::DeleteCrd(name.to_string()));
        if state.crds.remove(name).is_none() {
            return Ok(DeleteOutcome::AlreadyAbsent);
        }
        if let Some(checks) = state.crd_linger.get(name).copied() {
            state.terminating_crds.insert(name.to_string(), checks);
        }
        Ok(DeleteOutcome::Deleted)
    }

    async fn create_crd(&self, manifest: &Value) -> Result<()> {
        let name = manifest
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| KubeError::InvalidConfig("CRD manifest has no name".to_string()))?
            .to_string();

        let mut state = self.write();
        state.calls.push(ClusterCall::CreateCrd(name.clone()));
        if state.crds.contains_key(&name) || state.terminating_crds.contains_key(&name) {
            return Err(KubeError::Backend {
                status: 409,
                message: format!("AlreadyExists. customresourcedefinitions \"{}\" already exists", name),
            });
        }
        state.crds.insert(name, manifest.clone());
        Ok(())
    }

    async fn operator_deployments(&self) -> Result<Vec<OperatorDeployment>> {
        Ok(self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .operators
            .clone())
    }
}
