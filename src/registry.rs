//! Kind Registry
//!
//! Owns every registered kind together with its per-kind storage: the raw
//! store, the composed store, resolved instances and the inheritance graph.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{PrototypeError, Result};
use crate::graph::InheritanceGraph;
use crate::node::{Mapping, SourceLocation};
use crate::prototype::{KindRegistration, Prototype, PrototypeFactory};
use crate::schema::KindSchema;

/// A record as authored, before composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub kind: String,
    /// Declared parents, in declared order
    pub parents: Vec<String>,
    pub data: Mapping,
    pub is_abstract: bool,
    pub source: SourceLocation,
}

/// Storage for one kind
pub struct KindData {
    pub schema: KindSchema,
    pub factory: PrototypeFactory,
    pub raw: HashMap<String, RawRecord>,
    pub composed: HashMap<String, Mapping>,
    pub instances: HashMap<String, Arc<dyn Prototype>>,
    /// Present only for kinds with a parent field
    pub inheritance: Option<InheritanceGraph>,
}

impl fmt::Debug for KindData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindData")
            .field("kind", &self.schema.name)
            .field("raw", &self.raw.len())
            .field("composed", &self.composed.len())
            .field("instances", &self.instances.len())
            .finish()
    }
}

impl KindData {
    fn new(registration: KindRegistration) -> Self {
        let inheritance = registration
            .schema
            .supports_inheritance()
            .then(InheritanceGraph::new);
        Self {
            schema: registration.schema,
            factory: registration.factory,
            raw: HashMap::new(),
            composed: HashMap::new(),
            instances: HashMap::new(),
            inheritance,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn is_abstract(&self, id: &str) -> bool {
        self.raw.get(id).map(|r| r.is_abstract).unwrap_or(false)
    }

    /// Ids of resolved instances, sorted
    pub fn instance_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.instances.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Declared parents of `id`
    pub fn parents_of(&self, id: &str) -> Vec<&str> {
        match &self.inheritance {
            Some(graph) => graph.parents(id),
            None => Vec::new(),
        }
    }

    /// Drop every stored record, keeping the registration
    pub fn clear(&mut self) {
        self.raw.clear();
        self.composed.clear();
        self.instances.clear();
        if let Some(graph) = self.inheritance.as_mut() {
            *graph = InheritanceGraph::new();
        }
    }
}

/// All registered kinds
#[derive(Debug, Default)]
pub struct KindRegistry {
    kinds: HashMap<String, KindData>,
    ignored: HashSet<String>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind; the schema must be consistent and the name unused
    pub fn register(&mut self, registration: KindRegistration) -> Result<()> {
        registration.schema.check()?;

        let name = registration.schema.name.clone();
        if self.kinds.contains_key(&name) || self.ignored.contains(&name) {
            return Err(PrototypeError::DuplicateKind(name));
        }

        self.kinds.insert(name, KindData::new(registration));
        Ok(())
    }

    /// Records of this kind are skipped by the loader
    pub fn register_ignored(&mut self, name: impl Into<String>) {
        self.ignored.insert(name.into());
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<&KindData> {
        self.kinds.get(name)
    }

    pub fn kind_mut(&mut self, name: &str) -> Option<&mut KindData> {
        self.kinds.get_mut(name)
    }

    /// Look up a kind or fail with `UnregisteredKind`
    pub fn expect_kind(&self, name: &str) -> Result<&KindData> {
        self.kinds
            .get(name)
            .ok_or_else(|| PrototypeError::UnregisteredKind(name.to_string()))
    }

    pub fn kind_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Kind names in resolution order: ascending load priority, then name
    pub fn resolution_order(&self) -> Vec<String> {
        let mut kinds: Vec<(&i32, &String)> = self
            .kinds
            .iter()
            .map(|(name, data)| (&data.schema.load_priority, name))
            .collect();
        kinds.sort();
        kinds.into_iter().map(|(_, name)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Clear stored data of every kind; registrations stay
    pub fn clear_data(&mut self) {
        for data in self.kinds.values_mut() {
            data.clear();
        }
    }
}

/// Set of (kind, id) pairs touched by a load or resolve
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet(BTreeMap<String, BTreeSet<String>>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: impl Into<String>, id: impl Into<String>) {
        self.0.entry(kind.into()).or_default().insert(id.into());
    }

    /// Make sure `kind` is present, even with no ids
    pub fn touch(&mut self, kind: impl Into<String>) {
        self.0.entry(kind.into()).or_default();
    }

    pub fn extend(&mut self, other: ChangeSet) {
        for (kind, ids) in other.0 {
            self.0.entry(kind).or_default().extend(ids);
        }
    }

    pub fn contains(&self, kind: &str, id: &str) -> bool {
        self.0.get(kind).map(|ids| ids.contains(id)).unwrap_or(false)
    }

    pub fn ids(&self, kind: &str) -> Option<&BTreeSet<String>> {
        self.0.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.0.iter().map(|(kind, ids)| (kind.as_str(), ids))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }

    /// Number of (kind, id) pairs
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }
}
