//! Static identifier references
//!
//! Program code often hard-codes prototype ids (a default sound, the entity
//! spawned by an item). These are registered as [`StaticIdField`]s and
//! checked against the loaded identifier sets.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::node::{shape_name, string_list, DataNode};

/// A literal id value declared in program code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticIdField {
    /// Where the value is declared, e.g. `"ItemSystem::DEFAULT_SPAWN"`
    pub owner: String,
    /// Kind the value must name
    pub kind: String,
    /// A string or a list of strings
    pub value: DataNode,
}

impl StaticIdField {
    pub fn new(owner: impl Into<String>, kind: impl Into<String>, value: impl Into<DataNode>) -> Self {
        Self {
            owner: owner.into(),
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// A static reference that does not resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum StaticIdError {
    /// Value is neither an id nor a list of ids
    WrongFieldType { owner: String, found: String },
    /// Referenced kind is not registered
    UnknownKind { owner: String, kind: String },
    UnknownId {
        owner: String,
        kind: String,
        id: String,
        suggestion: Option<String>,
    },
}

impl fmt::Display for StaticIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongFieldType { owner, found } => {
                write!(f, "{}: expected a prototype id, found {}", owner, found)
            }
            Self::UnknownKind { owner, kind } => {
                write!(f, "{}: unknown prototype kind '{}'", owner, kind)
            }
            Self::UnknownId { owner, kind, id, suggestion } => {
                write!(f, "{}: unknown {} prototype '{}'", owner, kind, id)?;
                if let Some(suggestion) = suggestion {
                    write!(f, " (did you mean '{}'?)", suggestion)?;
                }
                Ok(())
            }
        }
    }
}

/// Check every static field against `known` (kind -> ids).
///
/// A kind missing from `known` is unknown; a kind present with no ids is
/// registered but empty.
pub fn validate_static_fields(
    fields: &[StaticIdField],
    known: &BTreeMap<String, BTreeSet<String>>,
) -> Vec<StaticIdError> {
    let matcher = SkimMatcherV2::default();
    let mut errors = Vec::new();

    for field in fields {
        let Some(ids) = string_list(&field.value) else {
            errors.push(StaticIdError::WrongFieldType {
                owner: field.owner.clone(),
                found: shape_name(&field.value).to_string(),
            });
            continue;
        };

        let Some(defined) = known.get(&field.kind) else {
            errors.push(StaticIdError::UnknownKind {
                owner: field.owner.clone(),
                kind: field.kind.clone(),
            });
            continue;
        };

        for id in ids {
            if defined.contains(&id) {
                continue;
            }
            errors.push(StaticIdError::UnknownId {
                owner: field.owner.clone(),
                kind: field.kind.clone(),
                suggestion: suggest(&matcher, &id, defined),
                id,
            });
        }
    }

    errors
}

/// Closest defined id, matched in both directions so that both missing and
/// extra characters are caught
pub fn suggest(matcher: &SkimMatcherV2, id: &str, defined: &BTreeSet<String>) -> Option<String> {
    defined
        .iter()
        .filter_map(|candidate| {
            let forward = matcher.fuzzy_match(candidate, id);
            let backward = matcher.fuzzy_match(id, candidate);
            forward.max(backward).map(|score| (score, candidate))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
        .map(|(_, candidate)| candidate.clone())
}
