//! Category Engine
//!
//! Derives which categories every entity belongs to. Membership is the
//! union of:
//!
//! - categories listed on the entity's own raw record
//! - automatic categories implied by its composed components
//! - categories of its parents whose policy is `Inheritable`
//!
//! The index is immutable and rebuilt wholesale after each resolve pass
//! that touches the entity or category kinds.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::CategoryConfig;
use crate::diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics};
use crate::node::{string_list, DataNode, Mapping};
use crate::registry::{KindData, KindRegistry};

/// Whether a category passes from parent entities to their children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryInheritancePolicy {
    #[default]
    Inheritable,
    NotInheritable,
}

/// A category definition, read from a category-kind record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub id: String,
    pub inheritance: CategoryInheritancePolicy,
    /// Members are hidden from spawn menus
    pub hide_spawn_menu: bool,
}

impl CategoryDef {
    fn from_record(id: &str, data: &Mapping, config: &CategoryConfig) -> Self {
        let inheritable = data
            .get(&config.inheritable_field)
            .and_then(DataNode::as_bool)
            .unwrap_or(true);
        Self {
            id: id.to_string(),
            inheritance: if inheritable {
                CategoryInheritancePolicy::Inheritable
            } else {
                CategoryInheritancePolicy::NotInheritable
            },
            hide_spawn_menu: data
                .get(&config.hide_spawn_menu_field)
                .and_then(DataNode::as_bool)
                .unwrap_or(false),
        }
    }
}

/// Static component name -> automatic categories table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCategoryTable(BTreeMap<String, BTreeSet<String>>);

impl ComponentCategoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, component: impl Into<String>, category: impl Into<String>) {
        self.0.entry(component.into()).or_default().insert(category.into());
    }

    pub fn extend(&mut self, other: ComponentCategoryTable) {
        for (component, categories) in other.0 {
            self.0.entry(component).or_default().extend(categories);
        }
    }

    pub fn categories_for(&self, component: &str) -> impl Iterator<Item = &str> {
        self.0.get(component).into_iter().flatten().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<C: Into<String>, K: Into<String>> FromIterator<(C, K)> for ComponentCategoryTable {
    fn from_iter<I: IntoIterator<Item = (C, K)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (component, category) in iter {
            table.add(component, category);
        }
        table
    }
}

/// Derived category membership
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryIndex {
    definitions: BTreeMap<String, CategoryDef>,
    members: BTreeMap<String, BTreeSet<String>>,
    by_entity: BTreeMap<String, BTreeSet<String>>,
    hidden: BTreeSet<String>,
}

impl CategoryIndex {
    /// Entities in `category`, sorted
    pub fn members(&self, category: &str) -> Vec<&str> {
        self.members
            .get(category)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Categories of `entity`, sorted
    pub fn categories_of(&self, entity: &str) -> Vec<&str> {
        self.by_entity
            .get(entity)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, entity: &str, category: &str) -> bool {
        self.by_entity
            .get(entity)
            .map(|c| c.contains(category))
            .unwrap_or(false)
    }

    pub fn is_hidden(&self, entity: &str) -> bool {
        self.hidden.contains(entity)
    }

    pub fn definition(&self, category: &str) -> Option<&CategoryDef> {
        self.definitions.get(category)
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }
}

struct Builder<'a> {
    entities: &'a KindData,
    definitions: &'a BTreeMap<String, CategoryDef>,
    /// No category kind registered: every name is accepted as inheritable
    open_world: bool,
    table: &'a ComponentCategoryTable,
    config: &'a CategoryConfig,
    memo: HashMap<&'a str, Option<BTreeSet<String>>>,
    diagnostics: Diagnostics,
}

impl<'a> Builder<'a> {
    fn is_defined(&self, category: &str) -> bool {
        self.open_world || self.definitions.contains_key(category)
    }

    fn inherits(&self, category: &str) -> bool {
        self.definitions
            .get(category)
            .map(|d| d.inheritance == CategoryInheritancePolicy::Inheritable)
            .unwrap_or(self.open_world)
    }

    /// Memberships of `id`, parents first; `None` in the memo marks a visit
    /// in progress so a malformed graph cannot recurse forever
    fn categories(&mut self, id: &'a str) -> BTreeSet<String> {
        match self.memo.get(id) {
            Some(Some(done)) => return done.clone(),
            Some(None) => return BTreeSet::new(),
            None => {}
        }
        self.memo.insert(id, None);

        let mut result = BTreeSet::new();
        let entities = self.entities;

        if let Some(raw) = entities.raw.get(id) {
            let declared = raw
                .data
                .get(&self.config.categories_field)
                .and_then(string_list)
                .unwrap_or_default();
            for category in declared {
                if self.is_defined(&category) {
                    result.insert(category);
                } else {
                    self.diagnostics.push(DiagnosticItem::for_record(
                        DiagnosticCode::UnknownCategory,
                        &raw.kind,
                        id,
                        &raw.source,
                        format!("unknown category '{}'", category),
                    ));
                }
            }
        }

        if let Some(composed) = entities.composed.get(id) {
            for component in component_names(composed, self.config) {
                result.extend(self.table.categories_for(component).map(String::from));
            }
        }

        for parent in entities.parents_of(id) {
            for category in self.categories(parent) {
                if self.inherits(&category) {
                    result.insert(category);
                }
            }
        }

        self.memo.insert(id, Some(result.clone()));
        result
    }
}

/// Component names of a composed entity: a sequence of entries carrying the
/// name key, or a mapping keyed by component name
fn component_names<'a>(composed: &'a Mapping, config: &CategoryConfig) -> Vec<&'a str> {
    match composed.get(&config.components_field) {
        Some(DataNode::Array(items)) => items
            .iter()
            .filter_map(|item| item.get(&config.component_name_key)?.as_str())
            .collect(),
        Some(DataNode::Object(map)) => map.keys().map(String::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Build the category index from the current registry state
pub fn build_index(
    registry: &KindRegistry,
    table: &ComponentCategoryTable,
    config: &CategoryConfig,
) -> (CategoryIndex, Diagnostics) {
    let category_kind = registry.kind(&config.category_kind);
    let definitions: BTreeMap<String, CategoryDef> = category_kind
        .map(|kind| {
            kind.raw
                .values()
                .filter(|record| !record.is_abstract)
                .map(|record| {
                    let data = kind.composed.get(&record.id).unwrap_or(&record.data);
                    (record.id.clone(), CategoryDef::from_record(&record.id, data, config))
                })
                .collect()
        })
        .unwrap_or_default();

    let Some(entities) = registry.kind(&config.entity_kind) else {
        return (
            CategoryIndex {
                definitions,
                ..Default::default()
            },
            Diagnostics::new(),
        );
    };

    let mut index = CategoryIndex::default();
    let diagnostics = {
        let mut builder = Builder {
            entities,
            definitions: &definitions,
            open_world: category_kind.is_none(),
            table,
            config,
            memo: HashMap::new(),
            diagnostics: Diagnostics::new(),
        };

        let mut ids: Vec<&str> = entities.raw.keys().map(String::as_str).collect();
        ids.sort_unstable();

        for id in ids {
            let categories = builder.categories(id);
            if !entities.instances.contains_key(id) {
                continue;
            }

            for category in &categories {
                index
                    .members
                    .entry(category.clone())
                    .or_default()
                    .insert(id.to_string());
                if definitions.get(category).map(|d| d.hide_spawn_menu).unwrap_or(false) {
                    index.hidden.insert(id.to_string());
                }
            }
            index.by_entity.insert(id.to_string(), categories);
        }

        builder.diagnostics
    };

    debug!(
        categories = index.members.len(),
        entities = index.by_entity.len(),
        hidden = index.hidden.len(),
        "Rebuilt category index"
    );

    index.definitions = definitions;
    (index, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_string;
    use crate::prototype::KindRegistration;
    use crate::resolver::resolve_all;
    use crate::schema::{FieldSchema, KindSchema};

    fn registry() -> KindRegistry {
        let mut registry = KindRegistry::new();
        registry
            .register(KindRegistration::dynamic(
                KindSchema::new("entity")
                    .inheriting()
                    .with_field(FieldSchema::never_push("categories"))
                    .with_field(FieldSchema::always_push("components").with_merge_key("type")),
            ))
            .unwrap();
        registry
            .register(KindRegistration::dynamic(KindSchema::new("entityCategory").with_priority(-1)))
            .unwrap();
        registry
    }

    const CONTENT: &str = r#"
- type: entityCategory
  id: Tool
- type: entityCategory
  id: Debug
  inheritable: false
  hideSpawnMenu: true
- type: entityCategory
  id: Powered
- type: entity
  id: BaseTool
  abstract: true
  categories: [Tool]
- type: entity
  id: DebugWrench
  parent: BaseTool
  categories: [Debug]
  components:
    - type: Battery
- type: entity
  id: Child
  parent: DebugWrench
- type: entity
  id: Stray
  categories: [Nope]
"#;

    fn index() -> (CategoryIndex, Diagnostics) {
        let mut registry = registry();
        load_string(&mut registry, CONTENT, false).unwrap();
        resolve_all(&mut registry);
        let table: ComponentCategoryTable = [("Battery", "Powered")].into_iter().collect();
        build_index(&registry, &table, &CategoryConfig::default())
    }

    #[test]
    fn test_explicit_inherited_and_automatic_membership() {
        let (index, _) = index();
        assert_eq!(index.categories_of("DebugWrench"), vec!["Debug", "Powered", "Tool"]);
        assert_eq!(index.members("Tool"), vec!["Child", "DebugWrench"]);
    }

    #[test]
    fn test_non_inheritable_category_stays_put() {
        let (index, _) = index();
        assert!(!index.is_member("Child", "Debug"));
        // Child inherits the Battery component, so Powered comes back automatically
        assert!(index.is_member("Child", "Powered"));
        assert!(index.is_member("Child", "Tool"));
    }

    #[test]
    fn test_hidden_and_abstract_entities() {
        let (index, _) = index();
        assert!(index.is_hidden("DebugWrench"));
        assert!(!index.is_hidden("Child"));
        assert!(index.categories_of("BaseTool").is_empty());
        assert!(!index.members("Tool").contains(&"BaseTool"));
    }

    #[test]
    fn test_unknown_category_is_reported() {
        let (index, diagnostics) = index();
        assert!(index.categories_of("Stray").is_empty());
        let unknown: Vec<_> = diagnostics.with_code(DiagnosticCode::UnknownCategory).collect();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].id.as_deref(), Some("Stray"));
    }

    #[test]
    fn test_definitions_are_read() {
        let (index, _) = index();
        let debug = index.definition("Debug").unwrap();
        assert_eq!(debug.inheritance, CategoryInheritancePolicy::NotInheritable);
        assert!(debug.hide_spawn_menu);
        assert_eq!(index.definition("Tool").unwrap().inheritance, CategoryInheritancePolicy::Inheritable);
    }
}
