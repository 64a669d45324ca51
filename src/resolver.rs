//! Resolver
//!
//! Turns raw records into composed mappings and instances. Kinds are handled
//! in ascending load priority; within a kind, records are visited parents
//! first so every parent is composed before its children. Each kind goes
//! through three phases:
//!
//! 1. compose every affected record (abstract ones included)
//! 2. instantiate non-abstract records and run their hooks, with read access
//!    to the registry
//! 3. publish the new instances
//!
//! Failures are reported per record and never abort the pass.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::compose::compose;
use crate::diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics};
use crate::graph::{resolution_order, with_descendants};
use crate::node::Mapping;
use crate::prototype::{HookContext, Prototype};
use crate::registry::{ChangeSet, KindData, KindRegistry};
use crate::validate::check_record;

/// Outcome of a resolve pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolveReport {
    /// Instances created or replaced
    pub modified: ChangeSet,
    /// Instances that no longer exist
    pub removed: ChangeSet,
    pub diagnostics: Diagnostics,
}

/// Resolve every record of every kind
pub fn resolve_all(registry: &mut KindRegistry) -> ResolveReport {
    let all: BTreeSet<String> = registry.kind_names().into_iter().map(String::from).collect();
    resolve(registry, &ChangeSet::new(), &all)
}

/// Resolve the `changed` records and their descendants, plus every record of
/// the kinds in `full_kinds`
pub fn resolve(
    registry: &mut KindRegistry,
    changed: &ChangeSet,
    full_kinds: &BTreeSet<String>,
) -> ResolveReport {
    let started = Instant::now();
    let mut report = ResolveReport::default();

    for kind in registry.resolution_order() {
        let full = full_kinds.contains(&kind);
        if !full && changed.ids(&kind).is_none() {
            continue;
        }

        let Some(kind_data) = registry.kind_mut(&kind) else {
            continue;
        };

        let targets = affected(kind_data, changed, full);
        prune_stale(kind_data, changed, full, &mut report);
        if targets.is_empty() {
            continue;
        }

        let order = match &kind_data.inheritance {
            Some(graph) => resolution_order(graph, &targets),
            None => targets.iter().cloned().collect(),
        };

        let failed = compose_phase(kind_data, &order, &mut report.diagnostics);
        let built = instantiate_phase(registry, &kind, &order, &failed, &mut report.diagnostics);

        let Some(kind_data) = registry.kind_mut(&kind) else {
            continue;
        };
        publish(kind_data, &order, built, &mut report);

        debug!(kind = %kind, records = order.len(), "Resolved kind");
    }

    info!(
        modified = report.modified.len(),
        removed = report.removed.len(),
        errors = report.diagnostics.error_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Resolve pass complete"
    );

    report
}

/// Ids to recompose: changed ids plus descendants, or the whole raw store
fn affected(kind_data: &KindData, changed: &ChangeSet, full: bool) -> BTreeSet<String> {
    let seeds: BTreeSet<String> = if full {
        kind_data.raw.keys().cloned().collect()
    } else {
        changed.ids(kind_data.name()).cloned().unwrap_or_default()
    };

    let mut targets = match &kind_data.inheritance {
        Some(graph) => with_descendants(graph, &seeds),
        None => seeds,
    };
    targets.retain(|id| kind_data.raw.contains_key(id));
    targets
}

/// Drop derived state whose raw record is gone
fn prune_stale(kind_data: &mut KindData, changed: &ChangeSet, full: bool, report: &mut ResolveReport) {
    let stale: Vec<String> = if full {
        kind_data
            .composed
            .keys()
            .chain(kind_data.instances.keys())
            .filter(|id| !kind_data.raw.contains_key(*id))
            .cloned()
            .collect()
    } else {
        changed
            .ids(kind_data.name())
            .into_iter()
            .flatten()
            .filter(|id| !kind_data.raw.contains_key(*id))
            .cloned()
            .collect()
    };

    for id in stale {
        kind_data.composed.remove(&id);
        if kind_data.instances.remove(&id).is_some() {
            report.removed.insert(kind_data.name(), id);
        }
    }
}

/// Compose `order` parents first; returns the ids that could not be composed
fn compose_phase(kind_data: &mut KindData, order: &[String], diagnostics: &mut Diagnostics) -> HashSet<String> {
    let mut failed: HashSet<String> = HashSet::new();

    for id in order {
        let Some(raw) = kind_data.raw.get(id) else {
            continue;
        };
        let parents: Vec<String> = kind_data.parents_of(id).into_iter().map(String::from).collect();

        let mut problem = None;
        for parent in &parents {
            if failed.contains(parent) || (kind_data.raw.contains_key(parent) && !kind_data.composed.contains_key(parent)) {
                problem = Some((DiagnosticCode::ParentFailed, format!("parent '{}' failed to resolve", parent)));
                break;
            }
            if !kind_data.raw.contains_key(parent) {
                problem = Some((DiagnosticCode::UnknownParent, format!("parent '{}' is not defined", parent)));
                break;
            }
        }

        if let Some((code, message)) = problem {
            warn!(kind = %raw.kind, id = %id, location = %raw.source, "{}", message);
            diagnostics.push(DiagnosticItem::for_record(code, &raw.kind, id, &raw.source, message));
            failed.insert(id.clone());
            kind_data.composed.remove(id);
            continue;
        }

        let parent_maps: Vec<&Mapping> = parents.iter().filter_map(|p| kind_data.composed.get(p)).collect();
        let composed = compose(&kind_data.schema, &raw.data, &parent_maps);
        kind_data.composed.insert(id.clone(), composed);
    }

    failed
}

/// What instantiation produced for one record
enum Built {
    Instance(Box<dyn Prototype>),
    Abstract,
    Failed,
}

fn instantiate_phase(
    registry: &KindRegistry,
    kind: &str,
    order: &[String],
    failed: &HashSet<String>,
    diagnostics: &mut Diagnostics,
) -> Vec<Built> {
    let Some(kind_data) = registry.kind(kind) else {
        return Vec::new();
    };
    let ctx = HookContext::new(kind, registry);

    order
        .iter()
        .map(|id| {
            let (Some(raw), Some(composed)) = (kind_data.raw.get(id), kind_data.composed.get(id)) else {
                return Built::Failed;
            };
            if failed.contains(id) {
                return Built::Failed;
            }
            if raw.is_abstract {
                return Built::Abstract;
            }

            let mut report = |code: DiagnosticCode, message: String| {
                warn!(kind = %kind, id = %id, location = %raw.source, "{}", message);
                diagnostics.push(DiagnosticItem::for_record(code, kind, id, &raw.source, message));
                Built::Failed
            };

            let mut data = composed.clone();
            kind_data.schema.apply_defaults(&mut data);

            let problems = check_record(&kind_data.schema, &data, true);
            if let Some((code, message)) = problems.into_iter().next() {
                return report(code, message);
            }

            let mut instance = match (kind_data.factory)(&data) {
                Ok(instance) => instance,
                Err(e) => return report(DiagnosticCode::Instantiation, e.to_string()),
            };
            if instance.id() != id {
                let message = format!("factory produced an instance with id '{}'", instance.id());
                return report(DiagnosticCode::IdMismatch, message);
            }
            if let Err(e) = instance.after_instantiate(&ctx) {
                return report(DiagnosticCode::HookFailed, e.to_string());
            }

            Built::Instance(instance)
        })
        .collect()
}

fn publish(kind_data: &mut KindData, order: &[String], built: Vec<Built>, report: &mut ResolveReport) {
    let kind = kind_data.name().to_string();

    for (id, outcome) in order.iter().zip(built) {
        match outcome {
            Built::Instance(instance) => {
                kind_data.instances.insert(id.clone(), Arc::from(instance));
                report.modified.insert(kind.as_str(), id.as_str());
            }
            Built::Abstract | Built::Failed => {
                if kind_data.instances.remove(id).is_some() {
                    report.removed.insert(kind.as_str(), id.as_str());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PrototypeError, Result};
    use crate::loader::{load_string, remove_string};
    use crate::prototype::{downcast, DynamicPrototype, KindRegistration};
    use crate::schema::{FieldSchema, FieldType, KindSchema};
    use serde::Deserialize;
    use serde_json::json;

    fn registry() -> KindRegistry {
        let mut registry = KindRegistry::new();
        registry
            .register(KindRegistration::dynamic(
                KindSchema::new("widget")
                    .inheriting()
                    .with_field(FieldSchema::new("name"))
                    .with_field(FieldSchema::always_push("tags"))
                    .with_field(FieldSchema::new("size").with_type(FieldType::Integer).with_default(json!(1))),
            ))
            .unwrap();
        registry
    }

    fn widget<'a>(registry: &'a KindRegistry, id: &str) -> &'a DynamicPrototype {
        downcast::<DynamicPrototype>(&registry.kind("widget").unwrap().instances[id]).unwrap()
    }

    #[test]
    fn test_widget_example() {
        let mut registry = registry();
        load_string(
            &mut registry,
            "- type: widget\n  id: A\n  name: A\n  tags: [x]\n- type: widget\n  id: B\n  parent: A\n  name: B\n  tags: [y]\n",
            false,
        )
        .unwrap();

        let report = resolve_all(&mut registry);
        assert!(report.diagnostics.is_empty(), "{}", report.diagnostics);

        let b = widget(&registry, "B");
        assert_eq!(b.get("name"), Some(&json!("B")));
        assert_eq!(b.get("tags"), Some(&json!(["x", "y"])));
        assert_eq!(b.get("size"), Some(&json!(1)));
        assert_eq!(report.modified.len(), 2);
    }

    #[test]
    fn test_defaults_are_not_stored_in_composed() {
        let mut registry = registry();
        load_string(&mut registry, "- type: widget\n  id: A\n", false).unwrap();
        resolve_all(&mut registry);
        assert!(!registry.kind("widget").unwrap().composed["A"].contains_key("size"));
    }

    #[test]
    fn test_abstract_records_compose_but_do_not_instantiate() {
        let mut registry = registry();
        load_string(
            &mut registry,
            "- type: widget\n  id: Base\n  abstract: true\n  name: base\n- type: widget\n  id: Leaf\n  parent: Base\n",
            false,
        )
        .unwrap();

        resolve_all(&mut registry);
        let widgets = registry.kind("widget").unwrap();
        assert!(widgets.composed.contains_key("Base"));
        assert!(!widgets.instances.contains_key("Base"));
        assert_eq!(widget(&registry, "Leaf").get("name"), Some(&json!("base")));
    }

    #[test]
    fn test_failures_are_isolated() {
        let mut registry = registry();
        load_string(
            &mut registry,
            r#"
- type: widget
  id: Bad
  size: huge
- type: widget
  id: Child
  parent: Bad
- type: widget
  id: Orphan
  parent: Missing
- type: widget
  id: Fine
"#,
            false,
        )
        .unwrap();

        let report = resolve_all(&mut registry);
        let widgets = registry.kind("widget").unwrap();
        assert_eq!(widgets.instance_ids(), vec!["Fine"]);
        assert_eq!(report.diagnostics.with_code(DiagnosticCode::TypeMismatch).count(), 2);
        assert_eq!(report.diagnostics.with_code(DiagnosticCode::UnknownParent).count(), 1);

        let orphan = report.diagnostics.with_code(DiagnosticCode::UnknownParent).next().unwrap();
        assert_eq!(orphan.id.as_deref(), Some("Orphan"));
        assert_eq!(orphan.location.as_ref().map(|l| l.record), Some(2));
    }

    #[test]
    fn test_incremental_resolve_recomposes_descendants() {
        let mut registry = registry();
        load_string(
            &mut registry,
            "- type: widget\n  id: A\n  name: old\n- type: widget\n  id: B\n  parent: A\n- type: widget\n  id: Other\n",
            false,
        )
        .unwrap();
        resolve_all(&mut registry);

        let load = load_string(&mut registry, "- type: widget\n  id: A\n  name: new\n", true).unwrap();
        let report = resolve(&mut registry, &load.changed, &BTreeSet::new());

        assert!(report.modified.contains("widget", "A"));
        assert!(report.modified.contains("widget", "B"));
        assert!(!report.modified.contains("widget", "Other"));
        assert_eq!(widget(&registry, "B").get("name"), Some(&json!("new")));
    }

    #[test]
    fn test_removed_records_are_reported() {
        let mut registry = registry();
        load_string(&mut registry, "- type: widget\n  id: A\n- type: widget\n  id: B\n", false).unwrap();
        resolve_all(&mut registry);

        let removed = remove_string(&mut registry, "- type: widget\n  id: A\n").unwrap();
        assert!(removed.contains("widget", "A"));
        let report = resolve_all(&mut registry);
        assert!(registry.kind("widget").unwrap().instances.get("A").is_none());
        assert!(report.removed.is_empty());
        assert!(report.modified.contains("widget", "B"));
    }

    #[derive(Debug, Deserialize)]
    struct Recipe {
        id: String,
        result: String,
        #[serde(skip)]
        resolved: bool,
    }

    impl Prototype for Recipe {
        fn id(&self) -> &str {
            &self.id
        }

        fn after_instantiate(&mut self, ctx: &HookContext<'_>) -> Result<()> {
            if !ctx.has_index("widget", &self.result) {
                return Err(PrototypeError::UnknownPrototype {
                    kind: "widget".to_string(),
                    id: self.result.clone(),
                });
            }
            self.resolved = true;
            Ok(())
        }
    }

    #[test]
    fn test_hooks_see_lower_priority_kinds() {
        let mut registry = registry();
        registry
            .register(KindRegistration::typed::<Recipe>(KindSchema::new("recipe").with_priority(10)))
            .unwrap();
        load_string(
            &mut registry,
            "- type: recipe\n  id: r1\n  result: A\n- type: recipe\n  id: r2\n  result: Nope\n- type: widget\n  id: A\n",
            false,
        )
        .unwrap();

        let report = resolve_all(&mut registry);
        let recipes = registry.kind("recipe").unwrap();
        assert!(downcast::<Recipe>(&recipes.instances["r1"]).unwrap().resolved);
        assert!(!recipes.instances.contains_key("r2"));
        assert_eq!(report.diagnostics.with_code(DiagnosticCode::HookFailed).count(), 1);
    }
}
