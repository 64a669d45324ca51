//! Kind schemas
//!
//! A schema descriptor tells the engine, for one kind of prototype, which
//! field carries the identifier, which fields carry the parent list and the
//! abstract flag, and how every other field composes across inheritance.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{PrototypeError, Result};
use crate::node::{DataNode, Mapping};

/// Reserved key naming the kind of a record
pub const KIND_FIELD: &str = "type";

/// How a field travels from parent to child during composition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCompositionPolicy {
    /// Child's explicit value wins, otherwise inherited
    #[default]
    Normal,
    /// Parent and child values are structurally merged
    AlwaysPush,
    /// Never inherited
    NeverPush,
}

/// Expected shape of a field value
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Any,
    String,
    Bool,
    Integer,
    Float,
    Sequence,
    Mapping,
    /// Identifier of a prototype of the named kind
    PrototypeId(String),
    /// Sequence of identifiers of the named kind
    PrototypeIdList(String),
}

impl FieldType {
    /// Whether `value` has the shape this type expects
    pub fn accepts(&self, value: &DataNode) -> bool {
        match self {
            FieldType::Any => true,
            FieldType::String | FieldType::PrototypeId(_) => value.is_string(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Sequence => value.is_array(),
            FieldType::Mapping => value.is_object(),
            FieldType::PrototypeIdList(_) => value
                .as_array()
                .map(|items| items.iter().all(DataNode::is_string))
                .unwrap_or(false),
        }
    }

    /// The kind referenced by this field, if it holds prototype identifiers
    pub fn referenced_kind(&self) -> Option<&str> {
        match self {
            FieldType::PrototypeId(kind) | FieldType::PrototypeIdList(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            FieldType::Any => "any".to_string(),
            FieldType::String => "string".to_string(),
            FieldType::Bool => "bool".to_string(),
            FieldType::Integer => "integer".to_string(),
            FieldType::Float => "float".to_string(),
            FieldType::Sequence => "sequence".to_string(),
            FieldType::Mapping => "mapping".to_string(),
            FieldType::PrototypeId(kind) => format!("{} id", kind),
            FieldType::PrototypeIdList(kind) => format!("list of {} ids", kind),
        }
    }
}

/// One field of a kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,

    #[serde(default)]
    pub policy: FieldCompositionPolicy,

    /// Must be present after composition
    #[serde(default)]
    pub required: bool,

    #[serde(default, rename = "type")]
    pub ty: FieldType,

    /// Applied at instantiation when no ancestor sets the field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DataNode>,

    /// For `AlwaysPush` sequences of mappings: entries with equal values
    /// under this key are merged instead of appended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_key: Option<String>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: FieldCompositionPolicy::Normal,
            required: false,
            ty: FieldType::Any,
            default: None,
            merge_key: None,
        }
    }

    pub fn always_push(name: impl Into<String>) -> Self {
        Self::new(name).with_policy(FieldCompositionPolicy::AlwaysPush)
    }

    pub fn never_push(name: impl Into<String>) -> Self {
        Self::new(name).with_policy(FieldCompositionPolicy::NeverPush)
    }

    pub fn with_policy(mut self, policy: FieldCompositionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_type(mut self, ty: FieldType) -> Self {
        self.ty = ty;
        self
    }

    pub fn with_default(mut self, default: DataNode) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_merge_key(mut self, key: impl Into<String>) -> Self {
        self.merge_key = Some(key.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

fn default_id_field() -> String {
    "id".to_string()
}

/// Schema descriptor of a prototype kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindSchema {
    /// Load-time name, the value of the `type` key
    pub name: String,

    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Field carrying the parent list; `None` for non-inheriting kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_field: Option<String>,

    /// Kinds resolve in ascending priority
    #[serde(default)]
    pub load_priority: i32,

    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl KindSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_field: default_id_field(),
            parent_field: None,
            abstract_field: None,
            load_priority: 0,
            fields: Vec::new(),
        }
    }

    /// Enable inheritance with the conventional `parent` / `abstract` keys
    pub fn inheriting(mut self) -> Self {
        self.parent_field = Some("parent".to_string());
        self.abstract_field = Some("abstract".to_string());
        self
    }

    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.load_priority = priority;
        self
    }

    pub fn supports_inheritance(&self) -> bool {
        self.parent_field.is_some()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Keys handled by the engine itself rather than by field policy
    pub fn is_reserved(&self, key: &str) -> bool {
        key == KIND_FIELD
            || key == self.id_field
            || self.parent_field.as_deref() == Some(key)
            || self.abstract_field.as_deref() == Some(key)
    }

    /// Composition policy for a key; reserved keys never push, undeclared
    /// keys compose as `Normal`
    pub fn policy_for(&self, key: &str) -> FieldCompositionPolicy {
        if self.is_reserved(key) {
            return FieldCompositionPolicy::NeverPush;
        }
        self.field(key)
            .map(|f| f.policy)
            .unwrap_or(FieldCompositionPolicy::Normal)
    }

    /// Fill in schema defaults for fields nothing in the chain set
    pub fn apply_defaults(&self, data: &mut Mapping) {
        for field in &self.fields {
            if let Some(default) = &field.default {
                if !data.contains_key(&field.name) {
                    data.insert(field.name.clone(), default.clone());
                }
            }
        }
    }

    /// Check the descriptor is internally consistent
    pub fn check(&self) -> Result<()> {
        let invalid = |reason: String| PrototypeError::InvalidSchema {
            kind: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("kind name is empty".to_string()));
        }
        if self.id_field.is_empty() || self.id_field == KIND_FIELD {
            return Err(invalid(format!("'{}' cannot be the id field", self.id_field)));
        }
        if self.parent_field.as_deref() == Some(self.id_field.as_str()) {
            return Err(invalid("id and parent are bound to the same field".to_string()));
        }
        if self.parent_field.is_some() != self.abstract_field.is_some() {
            return Err(invalid(
                "inheriting kinds need both a parent and an abstract field".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("field '{}' is declared twice", field.name)));
            }
            if self.is_reserved(&field.name) {
                return Err(invalid(format!("field '{}' is reserved", field.name)));
            }
        }

        Ok(())
    }
}
