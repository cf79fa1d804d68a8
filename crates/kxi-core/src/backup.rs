//! Assembly backup set
//!
//! A backup set is a YAML file with a single `items` key holding assembly
//! documents exactly as they were last submitted. It is written before a
//! destructive upgrade and replayed afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assembly::Assembly;
use crate::error::{CoreError, Result};

/// Default file name for assembly backups
pub const DEFAULT_BACKUP_FILE: &str = "kxi-assembly-state.yaml";

/// Ordered collection of assembly documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupSet {
    #[serde(default)]
    pub items: Vec<Value>,
}

/// Outcome of collecting live assemblies into a backup set
#[derive(Debug, Clone, Default)]
pub struct BackupCollection {
    pub set: BackupSet,
    /// Names written to the set
    pub backed_up: Vec<String>,
    /// Names that carry no last-applied annotation
    pub skipped: Vec<String>,
    /// Names whose annotation could not be decoded, with the reason
    pub unreadable: Vec<(String, String)>,
}

impl BackupSet {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Build a backup from live assemblies
    ///
    /// Each item is the decoded last-applied annotation. Assemblies without
    /// the annotation are listed in `skipped`, and ones whose annotation does
    /// not decode in `unreadable`; neither stops the rest being collected.
    pub fn collect<'a>(live: impl IntoIterator<Item = &'a Assembly>) -> BackupCollection {
        let mut collection = BackupCollection::default();

        for assembly in live {
            let Some(name) = assembly.metadata.name.clone() else {
                continue;
            };
            match assembly.last_applied_document() {
                Ok(Some(document)) => {
                    collection.set.items.push(document);
                    collection.backed_up.push(name);
                }
                Ok(None) => collection.skipped.push(name),
                Err(e) => collection.unreadable.push((name, e.to_string())),
            }
        }

        collection
    }

    /// Parse assemblies to submit from YAML
    ///
    /// Accepts a backup set or a single assembly document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(content)?;
        match doc {
            Value::Object(ref map) if map.contains_key("items") => {
                Ok(serde_json::from_value(doc)?)
            }
            Value::Object(_) => Ok(Self::new(vec![doc])),
            Value::Null => Ok(Self::default()),
            _ => Err(CoreError::InvalidAssembly {
                message: "expected an assembly document or a list of items".to_string(),
            }),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Load a backup or assembly file from disk
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            CoreError::YamlParse(_) => CoreError::InvalidAssembly {
                message: format!("invalid assembly file {}", path.display()),
            },
            other => other,
        })
    }

    /// Write the set, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Items decoded as assemblies
    pub fn assemblies(&self) -> Result<Vec<Assembly>> {
        self.items
            .iter()
            .cloned()
            .map(Assembly::from_value)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::CONFIG_ANNOTATION;
    use serde_json::json;

    fn live(name: &str, annotated: bool) -> Assembly {
        let mut asm = Assembly::from_value(json!({
            "apiVersion": "insights.kx.com/v1",
            "kind": "Assembly",
            "metadata": {"name": name, "namespace": "kxi", "resourceVersion": "7"},
            "spec": {"elements": {"sp": {}}}
        }))
        .unwrap();
        if annotated {
            asm.annotate_last_applied().unwrap();
            asm.metadata.resource_version = Some("8".to_string());
        }
        asm
    }

    #[test]
    fn test_collect_skips_unannotated() {
        let assemblies = vec![live("a", true), live("b", false), live("c", true)];
        let collection = BackupSet::collect(&assemblies);

        assert_eq!(collection.set.len(), 2);
        assert_eq!(collection.backed_up, vec!["a", "c"]);
        assert_eq!(collection.skipped, vec!["b"]);
    }

    #[test]
    fn test_collect_uses_annotation_not_live_object() {
        let assemblies = vec![live("a", true)];
        let collection = BackupSet::collect(&assemblies);

        let item = &collection.set.items[0];
        // resourceVersion recorded at submission time, not the live one
        assert_eq!(item["metadata"]["resourceVersion"], "7");
        assert!(item["metadata"].get("annotations").is_none());
    }

    #[test]
    fn test_collect_skips_corrupt_annotation() {
        let mut corrupt = live("b", false);
        corrupt
            .metadata
            .annotations
            .insert(CONFIG_ANNOTATION.to_string(), "\n{not json".to_string());
        let assemblies = vec![live("a", true), corrupt, live("c", true)];

        let collection = BackupSet::collect(&assemblies);

        assert_eq!(collection.backed_up, vec!["a", "c"]);
        assert_eq!(collection.set.len(), 2);
        assert!(collection.skipped.is_empty());
        assert_eq!(collection.unreadable.len(), 1);
        assert_eq!(collection.unreadable[0].0, "b");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_BACKUP_FILE);

        let collection = BackupSet::collect(&[live("a", true), live("b", true)]);
        collection.set.save(&path).unwrap();

        let loaded = BackupSet::load(&path).unwrap();
        assert_eq!(loaded, collection.set);
        assert_eq!(loaded.assemblies().unwrap()[1].name(), "b");
    }

    #[test]
    fn test_single_document_file() {
        let set = BackupSet::from_yaml(
            "apiVersion: insights.kx.com/v1\nkind: Assembly\nmetadata:\n  name: solo\n",
        )
        .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.assemblies().unwrap()[0].name(), "solo");
    }

    #[test]
    fn test_missing_file() {
        let err = BackupSet::load(Path::new("/nonexistent/kxi-backup.yaml")).unwrap_err();
        assert!(matches!(err, CoreError::FileNotFound { .. }));
    }

    #[test]
    fn test_yaml_shape() {
        let set = BackupSet::new(vec![json!({"metadata": {"name": "a"}})]);
        insta::assert_snapshot!(set.to_yaml().unwrap(), @r"
        items:
        - metadata:
            name: a
        ");
    }
}
