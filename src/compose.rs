//! Composer
//!
//! Folds already-composed parents into a child's raw mapping according to the
//! kind's per-field composition policy:
//!
//! - `Normal`: the child's value wins, otherwise the first parent (declared
//!   order) that sets the field
//! - `AlwaysPush`: ancestor and child values are merged structurally.
//!   Mappings merge key by key (child wins on conflicting scalars), sequences
//!   concatenate parent-first without repeating equal entries, and sequences
//!   of mappings with a merge key merge entries that share that key
//! - `NeverPush` and reserved keys: only the child's own value
//!
//! Schema defaults are not applied here; they are filled in at instantiation.

use crate::node::{DataNode, Mapping};
use crate::schema::{FieldCompositionPolicy, KindSchema};

/// Compose `child` with its composed `parents` (declared order)
pub fn compose(schema: &KindSchema, child: &Mapping, parents: &[&Mapping]) -> Mapping {
    let mut result = child.clone();
    if parents.is_empty() {
        return result;
    }

    let mut keys: Vec<&String> = Vec::new();
    for parent in parents {
        for key in parent.keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    for key in keys {
        match schema.policy_for(key) {
            FieldCompositionPolicy::NeverPush => {}
            FieldCompositionPolicy::Normal => {
                if result.contains_key(key) {
                    continue;
                }
                if let Some(value) = parents.iter().find_map(|p| p.get(key)) {
                    result.insert(key.clone(), value.clone());
                }
            }
            FieldCompositionPolicy::AlwaysPush => {
                let merge_key = schema.field(key).and_then(|f| f.merge_key.as_deref());

                let mut inherited: Option<DataNode> = None;
                for value in parents.iter().filter_map(|p| p.get(key)) {
                    inherited = Some(match inherited {
                        None => value.clone(),
                        // Earlier parents win conflicts, entries keep declared order
                        Some(acc) => merge(acc, value.clone(), Prefer::Earlier, merge_key),
                    });
                }

                let Some(inherited) = inherited else { continue };
                let merged = match result.remove(key) {
                    Some(own) => merge(inherited, own, Prefer::Later, merge_key),
                    None => inherited,
                };
                result.insert(key.clone(), merged);
            }
        }
    }

    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefer {
    Earlier,
    Later,
}

fn merge(earlier: DataNode, later: DataNode, prefer: Prefer, merge_key: Option<&str>) -> DataNode {
    match (earlier, later) {
        (DataNode::Object(a), DataNode::Object(b)) => DataNode::Object(merge_mappings(a, b, prefer)),
        (DataNode::Array(a), DataNode::Array(b)) => DataNode::Array(match merge_key {
            Some(field) => merge_keyed(a, b, field, prefer),
            None => concat_unique(a, b),
        }),
        (a, b) => match prefer {
            Prefer::Earlier => a,
            Prefer::Later => b,
        },
    }
}

/// Key-by-key merge; nested mappings recurse, anything else is replaced
fn merge_mappings(mut earlier: Mapping, later: Mapping, prefer: Prefer) -> Mapping {
    for (key, value) in later {
        match earlier.remove(&key) {
            None => {
                earlier.insert(key, value);
            }
            Some(existing @ DataNode::Object(_)) if value.is_object() => {
                let merged = merge(existing, value, prefer, None);
                earlier.insert(key, merged);
            }
            Some(existing) => {
                let kept = match prefer {
                    Prefer::Earlier => existing,
                    Prefer::Later => value,
                };
                earlier.insert(key, kept);
            }
        }
    }
    earlier
}

fn concat_unique(mut earlier: Vec<DataNode>, later: Vec<DataNode>) -> Vec<DataNode> {
    for item in later {
        if !earlier.contains(&item) {
            earlier.push(item);
        }
    }
    earlier
}

fn entry_key<'a>(item: &'a DataNode, field: &str) -> Option<&'a DataNode> {
    item.as_object().and_then(|m| m.get(field))
}

/// Entries sharing a merge key are merged field by field (shallow)
fn merge_keyed(
    mut earlier: Vec<DataNode>,
    later: Vec<DataNode>,
    field: &str,
    prefer: Prefer,
) -> Vec<DataNode> {
    for item in later {
        let position = entry_key(&item, field)
            .and_then(|key| earlier.iter().position(|e| entry_key(e, field) == Some(key)));

        match position {
            Some(index) => {
                let existing = std::mem::take(&mut earlier[index]);
                earlier[index] = match (existing, item) {
                    (DataNode::Object(mut a), DataNode::Object(b)) => {
                        for (key, value) in b {
                            if prefer == Prefer::Later || !a.contains_key(&key) {
                                a.insert(key, value);
                            }
                        }
                        DataNode::Object(a)
                    }
                    (a, b) => match prefer {
                        Prefer::Earlier => a,
                        Prefer::Later => b,
                    },
                };
            }
            None => {
                if !earlier.contains(&item) {
                    earlier.push(item);
                }
            }
        }
    }
    earlier
}

/// Recover the fields a record sets itself from its composed mapping.
///
/// Reserved keys are always kept. Keys present in `authored` keep the
/// authored value, even when a parent supplies the same one. Other fields
/// are kept when composing an empty record with the same parents would not
/// have produced them.
pub fn explicit_fields(
    schema: &KindSchema,
    composed: &Mapping,
    parents: &[&Mapping],
    authored: Option<&Mapping>,
) -> Mapping {
    let inherited = compose(schema, &Mapping::new(), parents);
    let mut explicit = Mapping::new();

    for (key, value) in composed {
        if schema.is_reserved(key) {
            explicit.insert(key.clone(), value.clone());
            continue;
        }
        if let Some(own) = authored.and_then(|a| a.get(key)) {
            explicit.insert(key.clone(), own.clone());
            continue;
        }

        let Some(base) = inherited.get(key) else {
            explicit.insert(key.clone(), value.clone());
            continue;
        };
        if base == value {
            continue;
        }

        let own = match schema.policy_for(key) {
            FieldCompositionPolicy::AlwaysPush => {
                let merge_key = schema.field(key).and_then(|f| f.merge_key.as_deref());
                subtract(value, base, merge_key)
            }
            _ => Some(value.clone()),
        };
        if let Some(own) = own {
            explicit.insert(key.clone(), own);
        }
    }

    explicit
}

/// The part of `value` that `base` does not already provide
fn subtract(value: &DataNode, base: &DataNode, merge_key: Option<&str>) -> Option<DataNode> {
    match (value, base) {
        (DataNode::Object(v), DataNode::Object(b)) => {
            let mut own = Mapping::new();
            for (key, item) in v {
                match b.get(key) {
                    Some(existing) if existing == item => {}
                    Some(existing @ DataNode::Object(_)) if item.is_object() => {
                        if let Some(diff) = subtract(item, existing, None) {
                            own.insert(key.clone(), diff);
                        }
                    }
                    _ => {
                        own.insert(key.clone(), item.clone());
                    }
                }
            }
            (!own.is_empty()).then_some(DataNode::Object(own))
        }
        (DataNode::Array(v), DataNode::Array(b)) => {
            let mut own = Vec::new();
            for item in v {
                if b.contains(item) {
                    continue;
                }
                let matching = merge_key.and_then(|field| {
                    let key = entry_key(item, field)?;
                    b.iter().find(|e| entry_key(e, field) == Some(key)).map(|e| (field, e))
                });
                match matching {
                    Some((field, existing)) => {
                        if let Some(DataNode::Object(mut diff)) = subtract(item, existing, None) {
                            if let Some(key) = entry_key(item, field) {
                                diff.insert(field.to_string(), key.clone());
                            }
                            own.push(DataNode::Object(diff));
                        }
                    }
                    None => own.push(item.clone()),
                }
            }
            (!own.is_empty()).then_some(DataNode::Array(own))
        }
        _ => (value != base).then(|| value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;
    use serde_json::json;

    fn mapping(value: DataNode) -> Mapping {
        value.as_object().unwrap().clone()
    }

    fn widget() -> KindSchema {
        KindSchema::new("widget")
            .inheriting()
            .with_field(FieldSchema::new("name"))
            .with_field(FieldSchema::always_push("tags"))
            .with_field(FieldSchema::always_push("stats"))
            .with_field(FieldSchema::never_push("hidden"))
            .with_field(FieldSchema::always_push("components").with_merge_key("type"))
    }

    #[test]
    fn test_widget_example() {
        let schema = widget();
        let a = mapping(json!({"type": "widget", "id": "A", "name": "A", "tags": ["x"]}));
        let b = mapping(json!({"type": "widget", "id": "B", "parent": "A", "name": "B", "tags": ["y"]}));

        let composed = compose(&schema, &b, &[&a]);
        assert_eq!(composed["name"], "B");
        assert_eq!(composed["tags"], json!(["x", "y"]));
        assert_eq!(composed["id"], "B");
        assert_eq!(composed["parent"], "A");
    }

    #[test]
    fn test_no_parents_returns_child() {
        let schema = widget();
        let child = mapping(json!({"id": "A", "tags": ["x"]}));
        assert_eq!(compose(&schema, &child, &[]), child);
    }

    #[test]
    fn test_normal_field_first_parent_wins() {
        let schema = widget();
        let p1 = mapping(json!({"id": "P1", "name": "first"}));
        let p2 = mapping(json!({"id": "P2", "name": "second", "extra": 2}));
        let child = mapping(json!({"id": "C"}));

        let composed = compose(&schema, &child, &[&p1, &p2]);
        assert_eq!(composed["name"], "first");
        assert_eq!(composed["extra"], 2);
    }

    #[test]
    fn test_explicit_null_is_kept() {
        let schema = widget();
        let parent = mapping(json!({"id": "P", "name": "inherited"}));
        let child = mapping(json!({"id": "C", "name": null}));
        assert_eq!(compose(&schema, &child, &[&parent])["name"], json!(null));
    }

    #[test]
    fn test_never_push_and_reserved_fields_stay_put() {
        let schema = widget();
        let parent = mapping(json!({"type": "widget", "id": "P", "abstract": true, "hidden": true}));
        let child = mapping(json!({"type": "widget", "id": "C"}));

        let composed = compose(&schema, &child, &[&parent]);
        assert!(!composed.contains_key("hidden"));
        assert!(!composed.contains_key("abstract"));
        assert_eq!(composed["id"], "C");
    }

    #[test]
    fn test_always_push_sequences_across_parents() {
        let schema = widget();
        let p1 = mapping(json!({"id": "P1", "tags": ["a", "shared"]}));
        let p2 = mapping(json!({"id": "P2", "tags": ["b", "shared"]}));
        let child = mapping(json!({"id": "C", "tags": ["c"]}));

        let composed = compose(&schema, &child, &[&p1, &p2]);
        assert_eq!(composed["tags"], json!(["a", "shared", "b", "c"]));
    }

    #[test]
    fn test_always_push_mappings_child_wins() {
        let schema = widget();
        let parent = mapping(json!({"id": "P", "stats": {"hp": 10, "speed": 2, "resist": {"fire": 1}}}));
        let child = mapping(json!({"id": "C", "stats": {"hp": 20, "resist": {"cold": 3}}}));

        let composed = compose(&schema, &child, &[&parent]);
        assert_eq!(
            composed["stats"],
            json!({"hp": 20, "speed": 2, "resist": {"fire": 1, "cold": 3}})
        );
    }

    #[test]
    fn test_keyed_sequence_merges_entries() {
        let schema = widget();
        let parent = mapping(json!({
            "id": "P",
            "components": [
                {"type": "Sprite", "sprite": "base.png", "state": "idle"},
                {"type": "Physics", "mass": 5}
            ]
        }));
        let child = mapping(json!({
            "id": "C",
            "components": [
                {"type": "Sprite", "state": "open"},
                {"type": "Light"}
            ]
        }));

        let composed = compose(&schema, &child, &[&parent]);
        assert_eq!(
            composed["components"],
            json!([
                {"type": "Sprite", "sprite": "base.png", "state": "open"},
                {"type": "Physics", "mass": 5},
                {"type": "Light"}
            ])
        );
    }

    #[test]
    fn test_composition_is_deterministic() {
        let schema = widget();
        let parent = mapping(json!({"id": "P", "tags": ["x"], "name": "p"}));
        let child = mapping(json!({"id": "C", "tags": ["y"]}));
        assert_eq!(
            compose(&schema, &child, &[&parent]),
            compose(&schema, &child, &[&parent])
        );
    }

    #[test]
    fn test_explicit_fields_round_trip() {
        let schema = widget();
        let parent = mapping(json!({
            "type": "widget", "id": "P", "name": "p", "tags": ["x"],
            "components": [{"type": "Sprite", "sprite": "base.png"}]
        }));
        let authored = mapping(json!({
            "type": "widget", "id": "C", "parent": "P", "name": "c", "tags": ["y"],
            "components": [{"type": "Sprite", "state": "open"}, {"type": "Light"}]
        }));

        let composed = compose(&schema, &authored, &[&parent]);
        assert_eq!(explicit_fields(&schema, &composed, &[&parent], None), authored);
    }

    #[test]
    fn test_explicit_fields_keep_repeated_values() {
        let schema = widget();
        let parent = mapping(json!({"type": "widget", "id": "A", "name": "n", "tags": ["x"]}));
        let authored = mapping(json!({
            "type": "widget", "id": "B", "parent": "A", "name": "n", "tags": ["x", "y"]
        }));

        let composed = compose(&schema, &authored, &[&parent]);
        assert_eq!(explicit_fields(&schema, &composed, &[&parent], Some(&authored)), authored);

        // Without the authored record a repeated value looks inherited
        let recovered = explicit_fields(&schema, &composed, &[&parent], None);
        assert!(recovered.get("name").is_none());
        assert_eq!(recovered["tags"], json!(["y"]));
    }

    #[test]
    fn test_explicit_fields_without_parents() {
        let schema = widget();
        let authored = mapping(json!({"type": "widget", "id": "A", "name": "a"}));
        assert_eq!(explicit_fields(&schema, &authored, &[], None), authored);
    }
}
