//! Assembly custom resource model
//!
//! An assembly is a namespaced workload definition (`insights.kx.com/v1`,
//! kind `Assembly`). The client only ever writes metadata and spec; status
//! is owned by the control plane and is read-only here.
//!
//! Fields the client does not model are carried through `extra` maps so a
//! fetched or backed-up assembly can be resubmitted without loss.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// API group of the assembly custom resource
pub const API_GROUP: &str = "insights.kx.com";

/// Served version of the assembly custom resource
pub const API_VERSION: &str = "v1";

/// Kind of the assembly custom resource
pub const KIND: &str = "Assembly";

/// Plural resource name used in API paths
pub const PLURAL: &str = "assemblies";

/// Annotation holding the verbatim submitted document
pub const CONFIG_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Default selector, excludes query environments
pub const DEFAULT_LABEL_SELECTOR: &str = "insights.kx.com/queryEnvironment!=true";

/// Condition type reporting readiness
pub const READY_CONDITION: &str = "AssemblyReady";

/// An assembly document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assembly {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default)]
    pub metadata: AssemblyMetadata,

    /// Workload definition, opaque to the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AssemblyStatus>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Object metadata subset the client reads or rewrites
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Status block written by the operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single status condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

impl Assembly {
    /// Build from an untyped document
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Convert back to an untyped document
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Assembly name, empty when the document carries none
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Fail unless the document names itself
    pub fn require_name(&self) -> Result<&str> {
        match self.metadata.name.as_deref() {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(CoreError::InvalidAssembly {
                message: "metadata.name is required".to_string(),
            }),
        }
    }

    /// Raw value of the last-applied annotation
    pub fn last_applied(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(CONFIG_ANNOTATION)
            .map(String::as_str)
    }

    /// Decode the last-applied annotation into the document it records
    pub fn last_applied_document(&self) -> Result<Option<Value>> {
        match self.last_applied() {
            Some(raw) => Ok(Some(serde_json::from_str(raw.trim())?)),
            None => Ok(None),
        }
    }

    /// Record this document as its own last-applied configuration
    ///
    /// Any previous annotation is dropped before serializing, so annotating
    /// the same document twice yields the same value.
    pub fn annotate_last_applied(&mut self) -> Result<()> {
        self.metadata.annotations.remove(CONFIG_ANNOTATION);
        let serialized = serde_json::to_string(self)?;
        self.metadata
            .annotations
            .insert(CONFIG_ANNOTATION.to_string(), format!("\n{}", serialized));
        Ok(())
    }

    /// Drop the server-assigned resourceVersion so resubmission is accepted
    pub fn strip_resource_version(&mut self) {
        self.metadata.resource_version = None;
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// The `AssemblyReady` condition, if the operator has reported one
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions()
            .iter()
            .find(|c| c.condition_type == READY_CONDITION)
    }

    pub fn is_ready(&self) -> bool {
        self.ready_condition()
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Conditions keyed by type, in the shape printed by `assembly status`
    pub fn condition_report(&self) -> BTreeMap<String, ConditionReport> {
        self.conditions()
            .iter()
            .map(|c| {
                (
                    c.condition_type.clone(),
                    ConditionReport {
                        status: c.status,
                        message: c.message.clone(),
                        reason: c.reason.clone(),
                    },
                )
            })
            .collect()
    }
}

/// Printable view of one condition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionReport {
    pub status: ConditionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One row of an assembly listing
///
/// Direct listings know the namespace; remote listings know running/ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblySummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
}

impl AssemblySummary {
    pub fn from_assembly(assembly: &Assembly) -> Self {
        Self {
            name: assembly.name().to_string(),
            namespace: assembly.namespace().map(str::to_string),
            running: None,
            ready: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Assembly {
        Assembly::from_value(json!({
            "apiVersion": "insights.kx.com/v1",
            "kind": "Assembly",
            "metadata": {
                "name": "basic-assembly",
                "namespace": "kxi",
                "resourceVersion": "1234",
                "uid": "abc"
            },
            "spec": {
                "labels": {"region": "us"},
                "elements": {"sm": {"size": 1}}
            },
            "status": {
                "conditions": [
                    {"type": "MountReady", "status": "True"},
                    {"type": "AssemblyReady", "status": "False", "reason": "Pending"}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_unmodelled_fields_survive() {
        let asm = sample();
        let value = asm.to_value().unwrap();
        assert_eq!(value["metadata"]["uid"], "abc");
        assert_eq!(value["spec"]["elements"]["sm"]["size"], 1);
    }

    #[test]
    fn test_ready_condition() {
        let mut asm = sample();
        assert!(!asm.is_ready());
        assert_eq!(
            asm.ready_condition().unwrap().reason.as_deref(),
            Some("Pending")
        );

        asm.status.as_mut().unwrap().conditions[1].status = ConditionStatus::True;
        assert!(asm.is_ready());
    }

    #[test]
    fn test_missing_ready_condition_is_not_ready() {
        let mut asm = sample();
        asm.status = None;
        assert!(asm.ready_condition().is_none());
        assert!(!asm.is_ready());
    }

    #[test]
    fn test_unknown_condition_status() {
        let cond: Condition =
            serde_json::from_value(json!({"type": "AssemblyReady", "status": "Weird"})).unwrap();
        assert_eq!(cond.status, ConditionStatus::Unknown);
    }

    #[test]
    fn test_annotation_is_deterministic() {
        let mut first = sample();
        first.status = None;
        let mut second = first.clone();

        first.annotate_last_applied().unwrap();
        second.annotate_last_applied().unwrap();
        // Annotating again must not nest the previous annotation
        second.annotate_last_applied().unwrap();

        assert_eq!(first.last_applied(), second.last_applied());
        assert!(first.last_applied().unwrap().starts_with('\n'));
    }

    #[test]
    fn test_annotation_records_pre_annotated_document() {
        let mut asm = sample();
        asm.status = None;
        let before = asm.to_value().unwrap();

        asm.annotate_last_applied().unwrap();
        let recorded = asm.last_applied_document().unwrap().unwrap();

        assert_eq!(recorded, before);
    }

    #[test]
    fn test_strip_resource_version() {
        let mut asm = sample();
        asm.strip_resource_version();
        let value = asm.to_value().unwrap();
        assert!(value["metadata"].get("resourceVersion").is_none());
    }

    #[test]
    fn test_require_name() {
        let mut asm = sample();
        assert_eq!(asm.require_name().unwrap(), "basic-assembly");
        asm.metadata.name = None;
        assert!(asm.require_name().is_err());
    }

    #[test]
    fn test_condition_report() {
        let report = sample().condition_report();
        assert_eq!(report.len(), 2);
        assert_eq!(report["MountReady"].status, ConditionStatus::True);
        assert_eq!(report["AssemblyReady"].reason.as_deref(), Some("Pending"));
    }
}
