//! Schema manifests
//!
//! A manifest declares kinds, ignored kinds, automatic component categories
//! and static id references in TOML or JSON, so content can be validated
//! and loaded without compiled-in prototype types.
//!
//! ```toml
//! ignored = ["editorOnly"]
//!
//! [[kinds]]
//! name = "entity"
//! parent_field = "parent"
//! abstract_field = "abstract"
//!
//! [[kinds.fields]]
//! name = "components"
//! policy = "always_push"
//! merge_key = "type"
//!
//! [component_categories]
//! Battery = ["Powered"]
//!
//! [[static_references]]
//! owner = "ItemSystem::DEFAULT_SPAWN"
//! kind = "entity"
//! value = "Wrench"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::category::ComponentCategoryTable;
use crate::error::{PrototypeError, Result};
use crate::prototype::{KindRegistration, SchemaProvider};
use crate::schema::KindSchema;
use crate::validate::StaticIdField;

/// Serializable description of every kind in a content set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaManifest {
    #[serde(default)]
    pub kinds: Vec<KindSchema>,

    #[serde(default)]
    pub ignored: Vec<String>,

    /// Component name -> categories it implies
    #[serde(default)]
    pub component_categories: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub static_references: Vec<StaticIdField>,
}

impl SchemaManifest {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PrototypeError::Manifest(e.to_string()))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| PrototypeError::Manifest(e.to_string()))
    }

    /// Read a manifest, choosing the format by extension (`.json` or TOML)
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let manifest = if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_toml_str(&text)
        };
        manifest.map_err(|e| PrototypeError::Manifest(format!("{}: {}", path.display(), e)))
    }

    pub fn component_table(&self) -> ComponentCategoryTable {
        self.component_categories
            .iter()
            .flat_map(|(component, categories)| {
                categories.iter().map(move |category| (component.clone(), category.clone()))
            })
            .collect()
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PrototypeError::Manifest(e.to_string()))
    }
}

impl SchemaProvider for SchemaManifest {
    fn registrations(&self) -> Result<Vec<KindRegistration>> {
        Ok(self
            .kinds
            .iter()
            .cloned()
            .map(KindRegistration::dynamic)
            .collect())
    }

    fn ignored_kinds(&self) -> Vec<String> {
        self.ignored.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldCompositionPolicy;
    use serde_json::json;
    use tempfile::tempdir;

    const MANIFEST: &str = r#"
ignored = ["editorOnly"]

[[kinds]]
name = "entity"
parent_field = "parent"
abstract_field = "abstract"

[[kinds.fields]]
name = "components"
policy = "always_push"
merge_key = "type"

[[kinds]]
name = "sound"
load_priority = -1

[component_categories]
Battery = ["Powered", "Electrical"]

[[static_references]]
owner = "ItemSystem::DEFAULT_SPAWN"
kind = "entity"
value = "Wrench"
"#;

    #[test]
    fn test_parse_toml_manifest() {
        let manifest = SchemaManifest::from_toml_str(MANIFEST).unwrap();
        assert_eq!(manifest.kinds.len(), 2);
        assert_eq!(
            manifest.kinds[0].policy_for("components"),
            FieldCompositionPolicy::AlwaysPush
        );
        assert_eq!(manifest.ignored_kinds(), vec!["editorOnly"]);
        assert_eq!(manifest.static_references[0].value, json!("Wrench"));

        let table = manifest.component_table();
        assert_eq!(
            table.categories_for("Battery").collect::<Vec<_>>(),
            vec!["Electrical", "Powered"]
        );
    }

    #[test]
    fn test_registrations_are_dynamic() {
        let manifest = SchemaManifest::from_toml_str(MANIFEST).unwrap();
        let registrations = manifest.registrations().unwrap();
        assert_eq!(registrations.len(), 2);
        assert!(registrations[0].schema.supports_inheritance());
        assert!(!registrations[1].schema.supports_inheritance());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let manifest = SchemaManifest::from_toml_str(MANIFEST).unwrap();

        let toml_path = dir.path().join("schemas.toml");
        fs::write(&toml_path, manifest.to_toml_string().unwrap()).unwrap();
        assert_eq!(SchemaManifest::from_path(&toml_path).unwrap(), manifest);

        let json_path = dir.path().join("schemas.json");
        fs::write(&json_path, serde_json::to_string(&manifest).unwrap()).unwrap();
        assert_eq!(SchemaManifest::from_path(&json_path).unwrap(), manifest);
    }

    #[test]
    fn test_bad_manifest_names_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[[kinds]]\nid_field = 3\n").unwrap();

        let err = SchemaManifest::from_path(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
