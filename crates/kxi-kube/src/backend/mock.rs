//! In-memory assembly backend for testing
//!
//! Behaves like a cluster that accepts assemblies and reports them ready,
//! with knobs for conflicts, failed deletes, slow readiness and slow
//! teardown. Every call is counted for assertions.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use kxi_core::assembly::READY_CONDITION;
use kxi_core::{Assembly, AssemblyStatus, AssemblySummary, Condition, ConditionStatus};
use serde_json::json;

use super::{AssemblyBackend, AssemblyQuery, AssemblyState, BackendMode, DeleteOutcome};
use crate::error::{KubeError, Result};

/// In-memory assembly backend
#[derive(Clone)]
pub struct MockAssemblyBackend {
    mode: BackendMode,
    state: Arc<RwLock<MockState>>,
    counts: Arc<RwLock<BackendCounts>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackendCounts {
    pub creates: usize,
    pub statuses: usize,
    pub lists: usize,
    pub deletes: usize,
}

#[derive(Default)]
struct MockState {
    /// Live assemblies in list order
    live: Vec<Assembly>,
    /// Every body passed to `create`, accepted or not
    submitted: Vec<Assembly>,
    /// Names whose delete was accepted
    deleted: Vec<String>,
    conflicts: HashSet<String>,
    delete_failures: HashSet<String>,
    /// Status polls before a created assembly reports ready
    pending_ready: HashMap<String, usize>,
    never_ready: HashSet<String>,
    /// Status polls a deleted assembly stays visible for
    linger: HashMap<String, usize>,
    /// Deleted but still visible, with polls remaining
    terminating: HashMap<String, usize>,
}

impl MockState {
    fn position(&self, namespace: &str, name: &str) -> Option<usize> {
        self.live
            .iter()
            .position(|a| a.name() == name && a.namespace().unwrap_or_default() == namespace)
    }
}

fn ready_status(ready: bool) -> AssemblyStatus {
    AssemblyStatus {
        conditions: vec![Condition {
            condition_type: READY_CONDITION.to_string(),
            status: if ready {
                ConditionStatus::True
            } else {
                ConditionStatus::False
            },
            message: None,
            reason: None,
        }],
        extra: Default::default(),
    }
}

impl MockAssemblyBackend {
    /// Create an empty direct-mode backend
    pub fn new() -> Self {
        Self {
            mode: BackendMode::Direct,
            state: Arc::new(RwLock::new(MockState::default())),
            counts: Arc::new(RwLock::new(BackendCounts::default())),
        }
    }

    /// Create an empty backend that reports itself as remote
    pub fn remote() -> Self {
        Self {
            mode: BackendMode::Remote,
            ..Self::new()
        }
    }

    /// Create with pre-populated live assemblies
    pub fn with_assemblies(assemblies: Vec<Assembly>) -> Self {
        let backend = Self::new();
        backend.write().live = assemblies;
        backend
    }

    fn read(&self) -> RwLockReadGuard<'_, MockState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MockState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn count(&self, f: impl FnOnce(&mut BackendCounts)) {
        f(&mut self.counts.write().unwrap_or_else(|e| e.into_inner()));
    }

    /// Reject creation of `name` with a 409
    pub fn fail_create_with_conflict(&self, name: &str) {
        self.write().conflicts.insert(name.to_string());
    }

    /// Reject deletion of `name` with a 500
    pub fn fail_delete(&self, name: &str) {
        self.write().delete_failures.insert(name.to_string());
    }

    /// Report `name` not ready for the first `polls` status calls
    pub fn ready_after(&self, name: &str, polls: usize) {
        self.write().pending_ready.insert(name.to_string(), polls);
    }

    /// Never report `name` ready
    pub fn never_ready(&self, name: &str) {
        self.write().never_ready.insert(name.to_string());
    }

    /// Keep `name` visible for `polls` status calls after it is deleted
    pub fn linger_after_delete(&self, name: &str, polls: usize) {
        self.write().linger.insert(name.to_string(), polls);
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> BackendCounts {
        self.counts.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every body passed to `create`
    pub fn submitted(&self) -> Vec<Assembly> {
        self.read().submitted.clone()
    }

    /// Names whose delete was accepted
    pub fn deleted(&self) -> Vec<String> {
        self.read().deleted.clone()
    }

    /// Names of live assemblies
    pub fn live_names(&self) -> Vec<String> {
        self.read().live.iter().map(|a| a.name().to_string()).collect()
    }
}

impl Default for MockAssemblyBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssemblyBackend for MockAssemblyBackend {
    fn mode(&self) -> BackendMode {
        self.mode
    }

    async fn create(&self, namespace: &str, assembly: &Assembly) -> Result<()> {
        self.count(|c| c.creates += 1);

        let mut guard = self.write();
        let state = &mut *guard;
        state.submitted.push(assembly.clone());

        let name = assembly.name().to_string();
        if state.conflicts.contains(&name) || state.position(namespace, &name).is_some() {
            return Err(KubeError::Backend {
                status: 409,
                message: format!(
                    "AlreadyExists. assemblies.insights.kx.com \"{}\" already exists",
                    name
                ),
            });
        }

        let mut stored = assembly.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.status = Some(ready_status(!state.never_ready.contains(&name)));
        state.live.push(stored);
        Ok(())
    }

    async fn status(&self, namespace: &str, name: &str) -> Result<Option<AssemblyState>> {
        self.count(|c| c.statuses += 1);

        let mut guard = self.write();
        let state = &mut *guard;
        let Some(index) = state.position(namespace, name) else {
            return Ok(None);
        };

        if let Some(remaining) = state.terminating.get_mut(name) {
            if *remaining == 0 {
                state.terminating.remove(name);
                state.live.remove(index);
                return Ok(None);
            }
            *remaining -= 1;
        }

        let mut ready = state.live[index].is_ready();
        if let Some(remaining) = state.pending_ready.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                ready = false;
            }
        }

        let report = match self.mode {
            BackendMode::Direct => serde_json::to_value(state.live[index].condition_report())?,
            BackendMode::Remote => json!({ "running": true, "ready": ready }),
        };
        Ok(Some(AssemblyState { ready, report }))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<AssemblySummary>> {
        self.count(|c| c.lists += 1);

        let state = self.read();
        let query = AssemblyQuery::in_namespace(namespace);
        Ok(state
            .live
            .iter()
            .filter(|a| self.mode == BackendMode::Remote || query.matches(a))
            .map(|a| match self.mode {
                BackendMode::Direct => AssemblySummary::from_assembly(a),
                BackendMode::Remote => AssemblySummary {
                    name: a.name().to_string(),
                    namespace: None,
                    running: Some(true),
                    ready: Some(a.is_ready()),
                },
            })
            .collect())
    }

    async fn list_resources(&self, query: &AssemblyQuery) -> Result<Vec<Assembly>> {
        self.count(|c| c.lists += 1);

        if self.mode == BackendMode::Remote {
            return Err(KubeError::Unsupported(
                "Reading assembly definitions requires direct cluster access, use --use-kubeconfig"
                    .to_string(),
            ));
        }

        let state = self.read();
        Ok(state
            .live
            .iter()
            .filter(|a| !state.terminating.contains_key(a.name()))
            .filter(|a| query.matches(a))
            .cloned()
            .collect())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        self.count(|c| c.deletes += 1);

        let mut guard = self.write();
        let state = &mut *guard;
        if state.delete_failures.contains(name) {
            return Err(KubeError::Backend {
                status: 500,
                message: format!("InternalError. failed to delete {}", name),
            });
        }

        let Some(index) = state.position(namespace, name) else {
            return Ok(DeleteOutcome::AlreadyAbsent);
        };
        if state.terminating.contains_key(name) {
            return Ok(DeleteOutcome::Deleted);
        }

        state.deleted.push(name.to_string());
        match state.linger.get(name).copied() {
            Some(polls) => {
                state.terminating.insert(name.to_string(), polls);
            }
            None => {
                state.live.remove(index);
            }
        }
        Ok(DeleteOutcome::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembly(name: &str) -> Assembly {
        Assembly::from_value(json!({"metadata": {"name": name, "namespace": "kxi"}})).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_status() {
        let backend = MockAssemblyBackend::new();
        backend.create("kxi", &assembly("basic")).await.unwrap();

        let state = backend.status("kxi", "basic").await.unwrap().unwrap();
        assert!(state.ready);
        assert!(backend.status("kxi", "other").await.unwrap().is_none());
        assert_eq!(backend.operation_counts().statuses, 2);
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let backend = MockAssemblyBackend::new();
        backend.create("kxi", &assembly("basic")).await.unwrap();
        let err = backend.create("kxi", &assembly("basic")).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(backend.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_absent() {
        let backend = MockAssemblyBackend::new();
        assert_eq!(
            backend.delete("kxi", "ghost").await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
        assert!(backend.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_lingering_delete() {
        let backend = MockAssemblyBackend::with_assemblies(vec![assembly("basic")]);
        backend.linger_after_delete("basic", 2);

        assert_eq!(backend.delete("kxi", "basic").await.unwrap(), DeleteOutcome::Deleted);
        assert!(backend.status("kxi", "basic").await.unwrap().is_some());
        assert!(backend.status("kxi", "basic").await.unwrap().is_some());
        assert!(backend.status("kxi", "basic").await.unwrap().is_none());
        assert!(backend.live_names().is_empty());
    }

    #[tokio::test]
    async fn test_remote_listing_is_unsupported() {
        let backend = MockAssemblyBackend::remote();
        let err = backend
            .list_resources(&AssemblyQuery::in_namespace("kxi"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Unsupported(_)));
    }
}
