//! Prototype Manager
//!
//! Owns the kind registry and everything around it: configuration, forced
//! abstract paths, file checksums for hot reload, category tables and
//! reload listeners. Loading queues changes; a resolve pass turns them into
//! instances and notifies listeners.

use include_dir::Dir;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::category::{build_index, CategoryIndex, ComponentCategoryTable};
use crate::checksum::ChecksumTable;
use crate::compose;
use crate::config::EngineConfig;
use crate::diagnostics::{DiagnosticCode, Diagnostics};
use crate::error::{PrototypeError, Result};
use crate::loader::{self, AbstractPaths, LoadReport};
use crate::node::Mapping;
use crate::prototype::{downcast, KindRegistration, Prototype, SchemaProvider};
use crate::registry::{ChangeSet, KindData, KindRegistry, RawRecord};
use crate::resolver::{self, ResolveReport};
use crate::schema::KindSchema;
use crate::validate::{self, known_ids, StaticIdError, StaticIdField, ValidationReport};

/// Sent to listeners after every resolve pass except the first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrototypesReloaded {
    pub modified: ChangeSet,
    pub removed: ChangeSet,
}

pub type ReloadListener = Box<dyn Fn(&PrototypesReloaded) + Send + Sync>;

/// Outcome of [`PrototypeManager::reload_directory`]
#[derive(Debug, Clone, Default)]
pub struct ReloadReport {
    /// Files whose checksum changed or that are new
    pub changed_files: Vec<PathBuf>,
    /// Previously loaded files that no longer exist
    pub deleted_files: Vec<PathBuf>,
    pub load: LoadReport,
    pub resolve: ResolveReport,
}

/// The prototype engine
pub struct PrototypeManager {
    registry: KindRegistry,
    config: EngineConfig,
    abstract_paths: AbstractPaths,
    checksums: ChecksumTable,
    component_categories: ComponentCategoryTable,
    static_fields: Vec<StaticIdField>,
    /// Records loaded since the last resolve pass
    pending: ChangeSet,
    /// Records removed since the last resolve pass
    pending_removed: ChangeSet,
    /// Kinds that need every record re-resolved
    full_kinds: BTreeSet<String>,
    resolved: bool,
    categories: CategoryIndex,
    listeners: Vec<ReloadListener>,
}

impl Default for PrototypeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PrototypeManager {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            registry: KindRegistry::new(),
            config,
            abstract_paths: AbstractPaths::new(),
            checksums: ChecksumTable::new(),
            component_categories: ComponentCategoryTable::new(),
            static_fields: Vec::new(),
            pending: ChangeSet::new(),
            pending_removed: ChangeSet::new(),
            full_kinds: BTreeSet::new(),
            resolved: false,
            categories: CategoryIndex::default(),
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// Whether a resolve pass has run since construction or the last clear
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    // =========================================================================
    // Registration
    // =========================================================================

    pub fn register_kind(&mut self, registration: KindRegistration) -> Result<()> {
        let name = registration.schema.name.clone();
        self.registry.register(registration)?;
        self.full_kinds.insert(name);
        Ok(())
    }

    /// Register every kind a provider supplies; ignored kinds go first
    pub fn register_provider(&mut self, provider: &dyn SchemaProvider) -> Result<()> {
        for kind in provider.ignored_kinds() {
            self.register_ignored_kind(kind);
        }
        for registration in provider.registrations()? {
            self.register_kind(registration)?;
        }
        Ok(())
    }

    pub fn register_ignored_kind(&mut self, name: impl Into<String>) {
        self.registry.register_ignored(name);
    }

    pub fn register_component_categories(&mut self, table: ComponentCategoryTable) {
        self.component_categories.extend(table);
    }

    pub fn register_static_reference(&mut self, field: StaticIdField) {
        self.static_fields.push(field);
    }

    /// Treat every record loaded from `path` as abstract
    pub fn abstract_file(&mut self, path: impl Into<PathBuf>) {
        self.abstract_paths.add_file(path);
    }

    /// Treat every record loaded from under `path` as abstract
    pub fn abstract_directory(&mut self, path: impl Into<PathBuf>) {
        self.abstract_paths.add_directory(path);
    }

    pub fn on_reloaded(&mut self, listener: impl Fn(&PrototypesReloaded) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // =========================================================================
    // Loading
    // =========================================================================

    pub fn load_directory(&mut self, path: impl AsRef<Path>, overwrite: bool) -> Result<LoadReport> {
        let report = loader::load_directory(
            &mut self.registry,
            path.as_ref(),
            overwrite,
            &self.config.loader,
            &self.abstract_paths,
        )?;
        self.checksums.merge(report.checksums.clone());
        Ok(self.queue(report))
    }

    pub fn load_string(&mut self, text: &str, overwrite: bool) -> Result<LoadReport> {
        let report = loader::load_string(&mut self.registry, text, overwrite)?;
        Ok(self.queue(report))
    }

    /// Load content compiled into the binary with `include_dir!`
    pub fn load_embedded(&mut self, dir: &Dir<'_>, overwrite: bool) -> Result<LoadReport> {
        let report = loader::load_embedded(
            &mut self.registry,
            dir,
            overwrite,
            &self.config.loader,
            &self.abstract_paths,
        )?;
        Ok(self.queue(report))
    }

    /// Remove the records named in `text`; their kinds are fully re-resolved
    /// on the next pass
    pub fn remove_string(&mut self, text: &str) -> Result<ChangeSet> {
        let removed = loader::remove_string(&mut self.registry, text)?;
        self.forget(&removed);
        Ok(removed)
    }

    /// Drop every loaded record, keeping registrations, tables and listeners
    pub fn clear(&mut self) {
        self.registry.clear_data();
        self.checksums = ChecksumTable::new();
        self.pending = ChangeSet::new();
        self.pending_removed = ChangeSet::new();
        self.full_kinds = self.registry.kind_names().into_iter().map(String::from).collect();
        self.categories = CategoryIndex::default();
        self.resolved = false;
    }

    /// Re-read the files under `path` whose checksum changed since they were
    /// last loaded, load them with overwrite and run an incremental resolve.
    ///
    /// Records that disappeared from a changed file, or whose file was
    /// deleted, are removed.
    pub fn reload_directory(&mut self, path: impl AsRef<Path>) -> Result<ReloadReport> {
        let root = path.as_ref();
        if !root.is_dir() {
            return Err(PrototypeError::NotADirectory(root.to_path_buf()));
        }

        let files = loader::collect_files(root, &self.config.loader);
        let mut changed_files = Vec::new();
        for file in &files {
            match loader::read_with_retry(file, &self.config.loader.retry) {
                Ok(content) if self.checksums.is_changed(file, &content) => changed_files.push(file.clone()),
                Ok(_) => {}
                Err(e) => warn!(path = %file.display(), error = %e, "Skipping file during reload"),
            }
        }

        let present: HashSet<&Path> = files.iter().map(PathBuf::as_path).collect();
        let deleted_files: Vec<PathBuf> = self
            .checksums
            .paths()
            .filter(|p| p.starts_with(root) && !present.contains(p))
            .map(Path::to_path_buf)
            .collect();
        for file in &deleted_files {
            self.checksums.remove(file);
        }

        info!(
            changed = changed_files.len(),
            deleted = deleted_files.len(),
            unchanged = files.len() - changed_files.len(),
            "Reloading prototype directory"
        );

        let mut load = loader::load_files(
            &mut self.registry,
            &changed_files,
            true,
            &self.config.loader,
            &self.abstract_paths,
        )?;

        // A file caught mid-write keeps its records and old checksum until it parses
        let failed: HashSet<PathBuf> = load
            .diagnostics
            .all()
            .iter()
            .filter(|d| matches!(d.code, DiagnosticCode::ParseFailure | DiagnosticCode::FileSkipped))
            .filter_map(|d| d.location.as_ref()?.file.clone())
            .collect();
        for file in &failed {
            warn!(path = %file.display(), "Keeping previous records of unreadable file");
            load.checksums.remove(file);
        }
        self.checksums.merge(load.checksums.clone());

        let touched: HashSet<PathBuf> = changed_files
            .iter()
            .filter(|file| !failed.contains(*file))
            .chain(&deleted_files)
            .cloned()
            .collect();
        let stale = loader::remove_file_records(&mut self.registry, &touched, &load.changed)?;
        self.forget(&stale);

        let load = self.queue(load);
        let resolve = self.resolve();

        Ok(ReloadReport {
            changed_files,
            deleted_files,
            load,
            resolve,
        })
    }

    fn queue(&mut self, report: LoadReport) -> LoadReport {
        for item in report.diagnostics.errors() {
            warn!(code = %item.code, "{}", item);
        }
        self.pending.extend(report.changed.clone());
        report
    }

    fn forget(&mut self, removed: &ChangeSet) {
        self.full_kinds.extend(removed.kinds().map(String::from));
        self.pending_removed.extend(removed.clone());
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve every record of every kind
    pub fn resolve_all(&mut self) -> ResolveReport {
        let report = resolver::resolve_all(&mut self.registry);
        self.pending = ChangeSet::new();
        self.full_kinds.clear();
        self.finish_pass(report)
    }

    /// Resolve what changed since the last pass
    pub fn resolve(&mut self) -> ResolveReport {
        let changed = std::mem::take(&mut self.pending);
        let full_kinds = std::mem::take(&mut self.full_kinds);
        let report = resolver::resolve(&mut self.registry, &changed, &full_kinds);
        self.finish_pass(report)
    }

    fn finish_pass(&mut self, mut report: ResolveReport) -> ResolveReport {
        report.removed.extend(std::mem::take(&mut self.pending_removed));

        for item in report.diagnostics.errors() {
            warn!(code = %item.code, "{}", item);
        }

        let first = !self.resolved;
        let categories = &self.config.categories;
        let touches_categories = [&categories.entity_kind, &categories.category_kind].iter().any(|kind| {
            report.modified.ids(kind).is_some() || report.removed.ids(kind).is_some()
        });
        if first || touches_categories {
            let (index, diagnostics) = build_index(&self.registry, &self.component_categories, categories);
            self.categories = index;
            report.diagnostics.merge(diagnostics);
        }

        if first {
            self.resolved = true;
        } else {
            let event = PrototypesReloaded {
                modified: report.modified.clone(),
                removed: report.removed.clone(),
            };
            debug!(
                listeners = self.listeners.len(),
                modified = event.modified.len(),
                removed = event.removed.len(),
                "Notifying reload listeners"
            );
            for listener in &self.listeners {
                listener(&event);
            }
        }

        report
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn loaded_kind(&self, kind: &str) -> Result<&KindData> {
        if !self.resolved {
            return Err(PrototypeError::NotLoaded);
        }
        self.registry.expect_kind(kind)
    }

    /// Every instance of `kind`, sorted by id
    pub fn enumerate(&self, kind: &str) -> Result<Vec<&Arc<dyn Prototype>>> {
        let kind_data = self.loaded_kind(kind)?;
        Ok(kind_data
            .instance_ids()
            .into_iter()
            .filter_map(|id| kind_data.instances.get(id))
            .collect())
    }

    pub fn index(&self, kind: &str, id: &str) -> Result<&Arc<dyn Prototype>> {
        self.loaded_kind(kind)?
            .instances
            .get(id)
            .ok_or_else(|| PrototypeError::UnknownPrototype {
                kind: kind.to_string(),
                id: id.to_string(),
            })
    }

    pub fn try_index(&self, kind: &str, id: &str) -> Option<&Arc<dyn Prototype>> {
        self.loaded_kind(kind).ok()?.instances.get(id)
    }

    pub fn has_index(&self, kind: &str, id: &str) -> bool {
        self.try_index(kind, id).is_some()
    }

    /// Typed access to an instance built by a typed registration
    pub fn index_as<T: Prototype + 'static>(&self, kind: &str, id: &str) -> Result<&T> {
        downcast::<T>(self.index(kind, id)?).ok_or_else(|| PrototypeError::TypeMismatch {
            kind: kind.to_string(),
            id: id.to_string(),
        })
    }

    /// Instantiated ancestors of `id`, breadth first. Abstract parents are
    /// neither returned nor walked through.
    pub fn enumerate_parents(&self, kind: &str, id: &str, include_self: bool) -> Result<Vec<&Arc<dyn Prototype>>> {
        let kind_data = self.loaded_kind(kind)?;

        let mut result = Vec::new();
        if include_self {
            result.push(self.index(kind, id)?);
        } else if !kind_data.raw.contains_key(id) {
            return Err(PrototypeError::UnknownPrototype {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }

        let mut seen: HashSet<&str> = HashSet::from([id]);
        let mut queue: VecDeque<&str> = kind_data.parents_of(id).into();
        while let Some(parent) = queue.pop_front() {
            if !seen.insert(parent) {
                continue;
            }
            let Some(instance) = kind_data.instances.get(parent) else {
                continue;
            };
            result.push(instance);
            queue.extend(kind_data.parents_of(parent));
        }

        Ok(result)
    }

    /// Every ancestor of `id`, breadth first, abstract ones included with no
    /// instance
    pub fn enumerate_all_parents(
        &self,
        kind: &str,
        id: &str,
        include_self: bool,
    ) -> Result<Vec<(String, Option<&Arc<dyn Prototype>>)>> {
        let kind_data = self.loaded_kind(kind)?;
        if !kind_data.raw.contains_key(id) {
            return Err(PrototypeError::UnknownPrototype {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }

        let mut result = Vec::new();
        if include_self {
            result.push((id.to_string(), kind_data.instances.get(id)));
        }

        if let Some(graph) = &kind_data.inheritance {
            for ancestor in crate::graph::ancestors_breadth_first(graph, id) {
                let instance = kind_data.instances.get(&ancestor);
                result.push((ancestor, instance));
            }
        }

        Ok(result)
    }

    /// The record as authored, available before any resolve pass
    pub fn raw(&self, kind: &str, id: &str) -> Option<&RawRecord> {
        self.registry.kind(kind)?.raw.get(id)
    }

    /// The composed mapping, abstract records included
    pub fn composed(&self, kind: &str, id: &str) -> Option<&Mapping> {
        self.loaded_kind(kind).ok()?.composed.get(id)
    }

    /// The fields `id` sets itself, recovered from its composed mapping
    pub fn explicit_fields(&self, kind: &str, id: &str) -> Result<Mapping> {
        let kind_data = self.loaded_kind(kind)?;
        let unknown = || PrototypeError::UnknownPrototype {
            kind: kind.to_string(),
            id: id.to_string(),
        };

        let composed = kind_data.composed.get(id).ok_or_else(unknown)?;
        let parents: Vec<&Mapping> = kind_data
            .parents_of(id)
            .into_iter()
            .filter_map(|parent| kind_data.composed.get(parent))
            .collect();

        let authored = kind_data.raw.get(id).map(|record| &record.data);

        Ok(compose::explicit_fields(&kind_data.schema, composed, &parents, authored))
    }

    /// Number of instances of `kind`
    pub fn count(&self, kind: &str) -> Result<usize> {
        Ok(self.loaded_kind(kind)?.instances.len())
    }

    pub fn kind_names(&self) -> Vec<&str> {
        self.registry.kind_names()
    }

    pub fn schema(&self, kind: &str) -> Option<&KindSchema> {
        self.registry.kind(kind).map(|k| &k.schema)
    }

    pub fn categories(&self) -> Result<&CategoryIndex> {
        if !self.resolved {
            return Err(PrototypeError::NotLoaded);
        }
        Ok(&self.categories)
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate a content directory without instantiating anything, then
    /// check every registered static reference
    pub fn validate_directory(&self, path: impl AsRef<Path>) -> Result<ValidationReport> {
        validate::validate_directory(
            &self.registry,
            path.as_ref(),
            &self.config.loader,
            &self.config.validation,
            &self.abstract_paths,
            &self.static_fields,
        )
    }

    /// Check every registered static reference against the loaded ids
    pub fn validate_static_fields(&self) -> Vec<StaticIdError> {
        validate::validate_static_fields(&self.static_fields, &known_ids(&self.registry))
    }

    /// Diagnostics of the category index rebuild, without touching the index
    pub fn check_categories(&self) -> Diagnostics {
        build_index(&self.registry, &self.component_categories, &self.config.categories).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::{DynamicPrototype, HookContext};
    use crate::schema::FieldSchema;
    use serde::Deserialize;
    use serde_json::json;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Debug, Deserialize)]
    struct Tool {
        id: String,
        #[serde(default)]
        damage: i64,
    }

    impl Prototype for Tool {
        fn id(&self) -> &str {
            &self.id
        }

        fn after_instantiate(&mut self, _ctx: &HookContext<'_>) -> Result<()> {
            self.damage = self.damage.max(1);
            Ok(())
        }
    }

    fn manager() -> PrototypeManager {
        let mut manager = PrototypeManager::new();
        manager
            .register_kind(KindRegistration::dynamic(
                KindSchema::new("entity")
                    .inheriting()
                    .with_field(FieldSchema::always_push("components").with_merge_key("type")),
            ))
            .unwrap();
        manager
            .register_kind(KindRegistration::typed::<Tool>(KindSchema::new("tool").inheriting()))
            .unwrap();
        manager
            .register_kind(KindRegistration::dynamic(KindSchema::new("entityCategory").with_priority(-1)))
            .unwrap();
        manager
    }

    const ENTITIES: &str = r#"
- type: entityCategory
  id: Tool
- type: entity
  id: Base
  abstract: true
  categories: [Tool]
  components:
    - type: Sprite
- type: entity
  id: Item
  parent: Base
- type: entity
  id: Wrench
  parent: Item
  components:
    - type: Damage
"#;

    #[test]
    fn test_queries_fail_before_resolve() {
        let mut manager = manager();
        manager.load_string(ENTITIES, false).unwrap();

        assert!(matches!(manager.enumerate("entity"), Err(PrototypeError::NotLoaded)));
        assert!(matches!(manager.categories(), Err(PrototypeError::NotLoaded)));
        assert!(!manager.has_index("entity", "Wrench"));
        assert!(manager.raw("entity", "Wrench").is_some());
    }

    #[test]
    fn test_enumerate_and_index() {
        let mut manager = manager();
        manager.load_string(ENTITIES, false).unwrap();
        manager.resolve();

        let ids: Vec<&str> = manager.enumerate("entity").unwrap().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["Item", "Wrench"]);
        assert_eq!(manager.count("entity").unwrap(), 2);
        assert!(!manager.has_index("entity", "Base"));

        let wrench = manager.index_as::<DynamicPrototype>("entity", "Wrench").unwrap();
        assert_eq!(
            wrench.get("components"),
            Some(&json!([{"type": "Sprite"}, {"type": "Damage"}]))
        );

        assert!(matches!(
            manager.index("entity", "Ghost"),
            Err(PrototypeError::UnknownPrototype { .. })
        ));
        assert!(matches!(
            manager.index_as::<Tool>("entity", "Wrench"),
            Err(PrototypeError::TypeMismatch { .. })
        ));
        assert!(matches!(manager.enumerate("gadget"), Err(PrototypeError::UnregisteredKind(_))));
    }

    #[test]
    fn test_typed_kind_runs_hook() {
        let mut manager = manager();
        manager.load_string("- type: tool\n  id: Hammer\n", false).unwrap();
        manager.resolve_all();

        assert_eq!(manager.index_as::<Tool>("tool", "Hammer").unwrap().damage, 1);
    }

    #[test]
    fn test_enumerate_parents_skips_abstract() {
        let mut manager = manager();
        manager.load_string(ENTITIES, false).unwrap();
        manager.resolve_all();

        let parents: Vec<&str> = manager
            .enumerate_parents("entity", "Wrench", true)
            .unwrap()
            .iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(parents, vec!["Wrench", "Item"]);

        let all: Vec<(String, bool)> = manager
            .enumerate_all_parents("entity", "Wrench", false)
            .unwrap()
            .into_iter()
            .map(|(id, instance)| (id, instance.is_some()))
            .collect();
        assert_eq!(all, vec![("Item".to_string(), true), ("Base".to_string(), false)]);
    }

    #[test]
    fn test_enumerate_parents_of_abstract_record() {
        let mut manager = manager();
        manager.load_string(ENTITIES, false).unwrap();
        manager
            .load_string("- type: entity\n  id: Variant\n  abstract: true\n  parent: Wrench\n", false)
            .unwrap();
        manager.resolve();

        let parents: Vec<&str> = manager
            .enumerate_parents("entity", "Variant", false)
            .unwrap()
            .iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(parents, vec!["Wrench", "Item"]);

        assert!(matches!(
            manager.enumerate_parents("entity", "Variant", true),
            Err(PrototypeError::UnknownPrototype { .. })
        ));
        assert!(matches!(
            manager.enumerate_parents("entity", "Missing", false),
            Err(PrototypeError::UnknownPrototype { .. })
        ));
    }

    #[test]
    fn test_explicit_fields_round_trip() {
        let mut manager = manager();
        manager.load_string(ENTITIES, false).unwrap();
        manager.resolve_all();

        let explicit = manager.explicit_fields("entity", "Wrench").unwrap();
        let raw = &manager.raw("entity", "Wrench").unwrap().data;
        assert_eq!(&explicit, raw);
    }

    #[test]
    fn test_explicit_fields_keep_values_repeated_from_parents() {
        let mut manager = manager();
        manager.load_string(ENTITIES, false).unwrap();
        manager
            .load_string(
                "- type: entity\n  id: Hammer\n  parent: Item\n  categories: [Tool]\n  components:\n    - type: Sprite\n    - type: Damage\n",
                false,
            )
            .unwrap();
        manager.resolve();

        let explicit = manager.explicit_fields("entity", "Hammer").unwrap();
        assert_eq!(explicit["categories"], json!(["Tool"]));
        assert_eq!(explicit["components"], json!([{"type": "Sprite"}, {"type": "Damage"}]));
        assert_eq!(&explicit, &manager.raw("entity", "Hammer").unwrap().data);
    }

    #[test]
    fn test_categories_follow_resolve() {
        let mut manager = manager();
        manager.load_string(ENTITIES, false).unwrap();
        manager.resolve();

        let index = manager.categories().unwrap();
        assert_eq!(index.members("Tool"), vec!["Item", "Wrench"]);
    }

    #[test]
    fn test_listeners_fire_after_first_pass() {
        let mut manager = manager();
        let events: Arc<Mutex<Vec<PrototypesReloaded>>> = Arc::default();
        let sink = Arc::clone(&events);
        manager.on_reloaded(move |event| sink.lock().unwrap().push(event.clone()));

        manager.load_string(ENTITIES, false).unwrap();
        manager.resolve();
        assert!(events.lock().unwrap().is_empty());

        manager
            .load_string("- type: entity\n  id: Item\n  parent: Base\n  name: item\n", true)
            .unwrap();
        manager.resolve();
        manager.remove_string("- type: entity\n  id: Wrench\n").unwrap();
        manager.resolve();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].modified.contains("entity", "Item"));
        assert!(events[0].modified.contains("entity", "Wrench"));
        assert!(events[1].removed.contains("entity", "Wrench"));
        assert!(!manager.has_index("entity", "Wrench"));
        assert_eq!(manager.categories().unwrap().members("Tool"), vec!["Item"]);
    }

    #[test]
    fn test_clear_keeps_registrations() {
        let mut manager = manager();
        manager.load_string(ENTITIES, false).unwrap();
        manager.resolve_all();
        manager.clear();

        assert!(!manager.is_resolved());
        assert_eq!(manager.kind_names(), vec!["entity", "entityCategory", "tool"]);
        manager.load_string(ENTITIES, false).unwrap();
        manager.resolve();
        assert_eq!(manager.count("entity").unwrap(), 2);
    }

    #[test]
    fn test_duplicate_without_overwrite_creates_nothing() {
        let mut manager = manager();
        manager.load_string("- type: entity\n  id: A\n", false).unwrap();
        let err = manager
            .load_string("- type: entity\n  id: A\n  extra: 1\n", false)
            .unwrap_err();
        assert!(matches!(err, PrototypeError::DuplicateId { .. }));

        manager.resolve();
        assert!(manager.composed("entity", "A").unwrap().get("extra").is_none());
    }

    #[test]
    fn test_reload_directory_only_reads_changed_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.yml"), "- type: entity\n  id: A\n  hp: 1\n").unwrap();
        fs::write(
            dir.path().join("b.yml"),
            "- type: entity\n  id: B\n  parent: A\n- type: entity\n  id: Gone\n",
        )
        .unwrap();
        fs::write(dir.path().join("c.yml"), "- type: entity\n  id: C\n").unwrap();

        let mut manager = manager();
        manager.load_directory(dir.path(), false).unwrap();
        manager.resolve_all();

        fs::write(dir.path().join("a.yml"), "- type: entity\n  id: A\n  hp: 2\n").unwrap();
        fs::write(dir.path().join("b.yml"), "- type: entity\n  id: B\n  parent: A\n").unwrap();
        fs::remove_file(dir.path().join("c.yml")).unwrap();

        let report = manager.reload_directory(dir.path()).unwrap();
        assert_eq!(
            report.changed_files,
            vec![dir.path().join("a.yml"), dir.path().join("b.yml")]
        );
        assert_eq!(report.deleted_files, vec![dir.path().join("c.yml")]);

        assert_eq!(manager.composed("entity", "B").unwrap()["hp"], json!(2));
        assert!(!manager.has_index("entity", "Gone"));
        assert!(!manager.has_index("entity", "C"));
        assert!(report.resolve.removed.contains("entity", "Gone"));
        assert!(report.resolve.removed.contains("entity", "C"));

        let again = manager.reload_directory(dir.path()).unwrap();
        assert!(again.changed_files.is_empty());
        assert!(again.resolve.modified.is_empty());
    }

    #[test]
    fn test_reload_keeps_records_of_file_that_fails_to_parse() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.yml");
        fs::write(&file, "- type: entity\n  id: A\n  hp: 1\n").unwrap();

        let mut manager = manager();
        manager.load_directory(dir.path(), false).unwrap();
        manager.resolve();

        fs::write(&file, "name: [unclosed").unwrap();
        let report = manager.reload_directory(dir.path()).unwrap();
        assert_eq!(report.changed_files, vec![file.clone()]);
        assert_eq!(report.load.diagnostics.with_code(DiagnosticCode::ParseFailure).count(), 1);
        assert!(report.resolve.removed.is_empty());
        assert!(manager.has_index("entity", "A"));
        assert_eq!(manager.composed("entity", "A").unwrap()["hp"], json!(1));

        // The old checksum is kept, so the finished write is picked up
        fs::write(&file, "- type: entity\n  id: A\n  hp: 3\n").unwrap();
        let report = manager.reload_directory(dir.path()).unwrap();
        assert_eq!(report.changed_files, vec![file]);
        assert_eq!(manager.composed("entity", "A").unwrap()["hp"], json!(3));
    }

    #[test]
    fn test_abstract_directory_marks_records() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("templates")).unwrap();
        fs::write(dir.path().join("templates/base.yml"), "- type: entity\n  id: Base\n").unwrap();
        fs::write(dir.path().join("items.yml"), "- type: entity\n  id: Item\n  parent: Base\n").unwrap();

        let mut manager = manager();
        manager.abstract_directory(dir.path().join("templates"));
        manager.load_directory(dir.path(), false).unwrap();
        manager.resolve();

        assert!(manager.raw("entity", "Base").unwrap().is_abstract);
        assert!(!manager.has_index("entity", "Base"));
        assert!(manager.has_index("entity", "Item"));
    }

    #[test]
    fn test_static_references() {
        let mut manager = manager();
        manager.register_static_reference(StaticIdField::new("Spawner::DEFAULT", "entity", "Wrench"));
        manager.register_static_reference(StaticIdField::new("Spawner::FALLBACK", "entity", "Wrnch"));
        manager.load_string(ENTITIES, false).unwrap();
        manager.resolve();

        let errors = manager.validate_static_fields();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("did you mean 'Wrench'"));
    }

    #[test]
    fn test_unknown_category_is_reported() {
        let mut manager = manager();
        manager
            .load_string("- type: entity\n  id: Odd\n  categories: [Nope]\n", false)
            .unwrap();
        let report = manager.resolve();
        assert_eq!(report.diagnostics.with_code(DiagnosticCode::UnknownCategory).count(), 1);
        assert_eq!(manager.check_categories().warning_count(), 1);
    }
}
