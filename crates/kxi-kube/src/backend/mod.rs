//! Assembly backends
//!
//! Assemblies can be managed two ways:
//! - **Direct**: the `insights.kx.com/v1` custom resource via the Kubernetes API
//! - **Remote**: the platform's controller REST API, authenticated with a token
//!
//! Both sit behind [`AssemblyBackend`], chosen once at construction. Expected
//! absence is returned as a value (`Option`, [`DeleteOutcome`]) rather than an
//! error, so callers branch on data.

mod direct;
mod mock;
mod remote;

pub use direct::KubeBackend;
pub use mock::{BackendCounts, MockAssemblyBackend};
pub use remote::RemoteBackend;

use async_trait::async_trait;
use serde_json::Value;

use kxi_core::assembly::DEFAULT_LABEL_SELECTOR;
use kxi_core::{Assembly, AssemblySummary};

use crate::error::Result;

/// Which API a backend talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Direct,
    Remote,
}

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Observed status of one assembly
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyState {
    pub ready: bool,
    /// Printable status document; empty when nothing has been reported yet
    pub report: Value,
}

impl AssemblyState {
    /// True when the backend has reported any status at all
    pub fn is_reported(&self) -> bool {
        match &self.report {
            Value::Object(map) => !map.is_empty(),
            Value::Null => false,
            _ => true,
        }
    }
}

/// Selector for listing full assembly resources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyQuery {
    /// `None` lists across all namespaces
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl AssemblyQuery {
    /// Assemblies in one namespace, excluding query environments
    pub fn in_namespace(namespace: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            label_selector: Some(DEFAULT_LABEL_SELECTOR.to_string()),
            field_selector: None,
        }
    }

    /// Assemblies in every namespace except `namespace`
    pub fn cluster_excluding(namespace: &str) -> Self {
        Self {
            namespace: None,
            label_selector: None,
            field_selector: Some(format!("metadata.namespace!={}", namespace)),
        }
    }

    /// Whether `assembly` satisfies this query
    ///
    /// Understands the selector forms built above (`key!=value`, `key=value`)
    /// and is used by in-memory backends.
    pub fn matches(&self, assembly: &Assembly) -> bool {
        let ns = assembly.namespace().unwrap_or_default();
        if let Some(wanted) = &self.namespace {
            if wanted != ns {
                return false;
            }
        }

        let labels = &assembly.metadata.labels;
        let label_ok = self.label_selector.as_deref().is_none_or(|selector| {
            selector_terms(selector).all(|(key, op, value)| {
                let actual = labels.get(key).map(String::as_str);
                match op {
                    SelectorOp::NotEqual => actual != Some(value),
                    SelectorOp::Equal => actual == Some(value),
                }
            })
        });

        let field_ok = self.field_selector.as_deref().is_none_or(|selector| {
            selector_terms(selector).all(|(key, op, value)| {
                let actual = match key {
                    "metadata.namespace" => Some(ns),
                    "metadata.name" => Some(assembly.name()),
                    _ => None,
                };
                match op {
                    SelectorOp::NotEqual => actual != Some(value),
                    SelectorOp::Equal => actual == Some(value),
                }
            })
        });

        label_ok && field_ok
    }
}

#[derive(Debug, Clone, Copy)]
enum SelectorOp {
    Equal,
    NotEqual,
}

fn selector_terms(selector: &str) -> impl Iterator<Item = (&str, SelectorOp, &str)> {
    selector.split(',').filter_map(|term| {
        let term = term.trim();
        if let Some((k, v)) = term.split_once("!=") {
            Some((k.trim(), SelectorOp::NotEqual, v.trim()))
        } else {
            term.split_once('=')
                .map(|(k, v)| (k.trim(), SelectorOp::Equal, v.trim_start_matches('=').trim()))
        }
    })
}

/// Uniform assembly operations over the direct and remote APIs
#[async_trait]
pub trait AssemblyBackend: Send + Sync {
    fn mode(&self) -> BackendMode;

    /// Submit an assembly; the body is sent as given
    async fn create(&self, namespace: &str, assembly: &Assembly) -> Result<()>;

    /// Current status, `None` when the assembly does not exist
    async fn status(&self, namespace: &str, name: &str) -> Result<Option<AssemblyState>>;

    /// Summaries for display
    async fn list(&self, namespace: &str) -> Result<Vec<AssemblySummary>>;

    /// Full resources, including annotations, for backup and bulk teardown
    async fn list_resources(&self, query: &AssemblyQuery) -> Result<Vec<Assembly>>;

    /// Request deletion; absence is a distinct outcome
    async fn delete(&self, namespace: &str, name: &str) -> Result<DeleteOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assembly(ns: &str, name: &str, query_env: bool) -> Assembly {
        let mut labels = serde_json::Map::new();
        if query_env {
            labels.insert("insights.kx.com/queryEnvironment".into(), json!("true"));
        }
        Assembly::from_value(json!({
            "metadata": {"name": name, "namespace": ns, "labels": labels}
        }))
        .unwrap()
    }

    #[test]
    fn test_default_query_skips_query_environments() {
        let query = AssemblyQuery::in_namespace("kxi");
        assert!(query.matches(&assembly("kxi", "basic", false)));
        assert!(!query.matches(&assembly("kxi", "qe", true)));
        assert!(!query.matches(&assembly("other", "basic", false)));
    }

    #[test]
    fn test_cluster_excluding() {
        let query = AssemblyQuery::cluster_excluding("kxi");
        assert_eq!(query.field_selector.as_deref(), Some("metadata.namespace!=kxi"));
        assert!(!query.matches(&assembly("kxi", "basic", false)));
        assert!(query.matches(&assembly("team-a", "basic", false)));
        assert!(query.matches(&assembly("team-a", "qe", true)));
    }

    #[test]
    fn test_state_is_reported() {
        let empty = AssemblyState {
            ready: false,
            report: json!({}),
        };
        assert!(!empty.is_reported());

        let reported = AssemblyState {
            ready: true,
            report: json!({"AssemblyReady": {"status": "True"}}),
        };
        assert!(reported.is_reported());
    }
}
