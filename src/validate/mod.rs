//! Validation
//!
//! Structural, non-instantiating checks of a content directory: every record
//! is parsed, duplicates are reported across the whole directory, records
//! are composed against their parents and the composed mapping is checked
//! against the kind's schema. Errors are collected per source file.

pub mod static_refs;

pub use static_refs::{suggest, validate_static_fields, StaticIdError, StaticIdField};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::compose::compose;
use crate::config::{LoaderConfig, ValidationConfig};
use crate::diagnostics::{DiagnosticCode, DiagnosticItem};
use crate::error::{PrototypeError, Result};
use crate::loader::{collect_files, parse_files, AbstractPaths, UnknownKinds};
use crate::node::{shape_name, DataNode, Mapping};
use crate::registry::{KindRegistry, RawRecord};
use crate::schema::KindSchema;

/// Result of validating a directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Structural errors, grouped by source file
    pub file_errors: BTreeMap<PathBuf, Vec<DiagnosticItem>>,
    /// Unresolvable static id references
    pub static_errors: Vec<StaticIdError>,
    pub files_checked: usize,
    pub records_checked: usize,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.error_count() == 0 && self.static_errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.file_errors
            .values()
            .flatten()
            .filter(|d| d.severity() == crate::diagnostics::Severity::Error)
            .count()
    }

    fn push(&mut self, item: DiagnosticItem) {
        let file = item
            .location
            .as_ref()
            .and_then(|l| l.file.clone())
            .unwrap_or_default();
        self.file_errors.entry(file).or_default().push(item);
    }
}

/// Check a composed mapping against its schema.
///
/// Null values count as explicitly unset: they skip type checks and do not
/// satisfy `required`.
pub fn check_record(schema: &KindSchema, data: &Mapping, allow_unknown: bool) -> Vec<(DiagnosticCode, String)> {
    let mut problems = Vec::new();

    if !allow_unknown {
        for key in data.keys() {
            if !schema.is_reserved(key) && schema.field(key).is_none() {
                problems.push((
                    DiagnosticCode::UnknownField,
                    format!("field '{}' is not declared for kind '{}'", key, schema.name),
                ));
            }
        }
    }

    for field in &schema.fields {
        match data.get(&field.name) {
            None | Some(DataNode::Null) => {
                if field.required {
                    problems.push((
                        DiagnosticCode::MissingRequired,
                        format!("required field '{}' is missing", field.name),
                    ));
                }
            }
            Some(value) if !field.ty.accepts(value) => {
                problems.push((
                    DiagnosticCode::TypeMismatch,
                    format!(
                        "field '{}' expects {}, found {}",
                        field.name,
                        field.ty.name(),
                        shape_name(value)
                    ),
                ));
            }
            Some(_) => {}
        }
    }

    problems
}

/// Ids referenced by `data` through prototype-id fields, as (field, kind, id)
pub fn references<'a>(schema: &'a KindSchema, data: &'a Mapping) -> Vec<(&'a str, &'a str, &'a str)> {
    let mut refs = Vec::new();
    for field in &schema.fields {
        let Some(kind) = field.ty.referenced_kind() else {
            continue;
        };
        match data.get(&field.name) {
            Some(DataNode::String(id)) => refs.push((field.name.as_str(), kind, id.as_str())),
            Some(DataNode::Array(items)) => {
                for id in items.iter().filter_map(DataNode::as_str) {
                    refs.push((field.name.as_str(), kind, id));
                }
            }
            _ => {}
        }
    }
    refs
}

/// Composition state during validation
enum Pushed {
    InProgress,
    Done(Option<Mapping>),
}

struct DirectoryValidator<'a> {
    registry: &'a KindRegistry,
    config: &'a ValidationConfig,
    /// First definition of every (kind, id) seen in the directory
    records: HashMap<(&'a str, &'a str), &'a RawRecord>,
    pushed: HashMap<(&'a str, &'a str), Pushed>,
    /// Ids defined in the directory or already loaded, per kind
    known: BTreeMap<String, BTreeSet<String>>,
    report: ValidationReport,
}

impl<'a> DirectoryValidator<'a> {
    /// Compose a record against its parents, memoized by the "pushed" state
    fn push(&mut self, record: &'a RawRecord) -> Option<Mapping> {
        let key = (record.kind.as_str(), record.id.as_str());
        match self.pushed.get(&key) {
            Some(Pushed::Done(result)) => return result.clone(),
            Some(Pushed::InProgress) => {
                self.report.push(DiagnosticItem::for_record(
                    DiagnosticCode::Cycle,
                    &record.kind,
                    &record.id,
                    &record.source,
                    format!("'{}' inherits from itself", record.id),
                ));
                return None;
            }
            None => {}
        }
        self.pushed.insert(key, Pushed::InProgress);

        let mut parents: Vec<Mapping> = Vec::with_capacity(record.parents.len());
        let mut ok = true;
        for parent in &record.parents {
            if parent == &record.id {
                self.report.push(DiagnosticItem::for_record(
                    DiagnosticCode::SelfParent,
                    &record.kind,
                    &record.id,
                    &record.source,
                    format!("'{}' lists itself as a parent", record.id),
                ));
                ok = false;
                continue;
            }

            let local = self.records.get(&(record.kind.as_str(), parent.as_str())).copied();
            let composed = match local {
                Some(parent_record) => self.push(parent_record),
                None => self.loaded_parent(&record.kind, parent),
            };
            match composed {
                Some(map) => parents.push(map),
                None => {
                    if local.is_none() {
                        self.report.push(DiagnosticItem::for_record(
                            DiagnosticCode::UnknownParent,
                            &record.kind,
                            &record.id,
                            &record.source,
                            format!("parent '{}' is not defined", parent),
                        ));
                    }
                    ok = false;
                }
            }
        }

        let result = ok.then(|| {
            let schema = &self.kind_schema(&record.kind);
            let parent_refs: Vec<&Mapping> = parents.iter().collect();
            compose(schema, &record.data, &parent_refs)
        });
        self.pushed.insert(key, Pushed::Done(result.clone()));
        result
    }

    fn kind_schema(&self, kind: &str) -> KindSchema {
        self.registry
            .kind(kind)
            .map(|k| k.schema.clone())
            .unwrap_or_else(|| KindSchema::new(kind))
    }

    /// Parent already present in the registry (loaded from elsewhere)
    fn loaded_parent(&self, kind: &str, id: &str) -> Option<Mapping> {
        self.registry.kind(kind)?.composed.get(id).cloned()
    }

    fn is_defined(&self, kind: &str, id: &str) -> bool {
        self.known.get(kind).map(|ids| ids.contains(id)).unwrap_or(false)
    }

    fn check(&mut self, record: &'a RawRecord, composed: &Mapping) {
        let registry = self.registry;
        let Some(kind_data) = registry.kind(&record.kind) else {
            return;
        };
        let schema = &kind_data.schema;

        let mut problems = check_record(schema, composed, self.config.allow_unknown_fields);
        if record.is_abstract {
            problems.retain(|(code, _)| *code != DiagnosticCode::MissingRequired);
        }

        if self.config.check_references {
            for (field, kind, id) in references(schema, composed) {
                if registry.kind(kind).is_none() {
                    problems.push((
                        DiagnosticCode::UnknownReference,
                        format!("field '{}' references unknown kind '{}'", field, kind),
                    ));
                } else if !self.is_defined(kind, id) {
                    problems.push((
                        DiagnosticCode::UnknownReference,
                        format!("field '{}' references unknown {} '{}'", field, kind, id),
                    ));
                }
            }
        }

        for (code, message) in problems {
            self.report.push(DiagnosticItem::for_record(
                code,
                &record.kind,
                &record.id,
                &record.source,
                message,
            ));
        }
    }
}

/// Validate every prototype file under `root` without instantiating anything,
/// then check `static_fields` against the registry and directory ids
pub fn validate_directory(
    registry: &KindRegistry,
    root: &Path,
    loader: &LoaderConfig,
    config: &ValidationConfig,
    abstract_paths: &AbstractPaths,
    static_fields: &[StaticIdField],
) -> Result<ValidationReport> {
    if !root.is_dir() {
        return Err(PrototypeError::NotADirectory(root.to_path_buf()));
    }

    let files = collect_files(root, loader);
    let mut report = ValidationReport {
        files_checked: files.len(),
        ..Default::default()
    };

    let mut all_records: Vec<RawRecord> = Vec::new();
    for parsed in parse_files(registry, &files, loader, abstract_paths, UnknownKinds::Report) {
        let parsed = parsed?;
        for item in parsed.extracted.diagnostics {
            report.push(item);
        }
        all_records.extend(parsed.extracted.records);
    }
    report.records_checked = all_records.len();

    let mut records: HashMap<(&str, &str), &RawRecord> = HashMap::new();
    for record in &all_records {
        let key = (record.kind.as_str(), record.id.as_str());
        match records.get(&key) {
            Some(first) => report.push(
                DiagnosticItem::for_record(
                    DiagnosticCode::DuplicateId,
                    &record.kind,
                    &record.id,
                    &record.source,
                    format!("duplicate {} id '{}'", record.kind, record.id),
                )
                .with_context(format!("first defined at {}", first.source)),
            ),
            None => {
                records.insert(key, record);
            }
        }
    }

    let mut known = known_ids(registry);
    for record in records.values().filter(|r| !r.is_abstract) {
        known.entry(record.kind.clone()).or_default().insert(record.id.clone());
    }

    let mut validator = DirectoryValidator {
        registry,
        config,
        records,
        pushed: HashMap::new(),
        known,
        report,
    };

    let mut ordered: Vec<&RawRecord> = validator.records.values().copied().collect();
    ordered.sort_by(|a, b| (&a.kind, &a.id).cmp(&(&b.kind, &b.id)));
    for record in ordered {
        if let Some(composed) = validator.push(record) {
            validator.check(record, &composed);
        }
    }

    validator.report.static_errors = validate_static_fields(static_fields, &validator.known);

    let report = validator.report;
    info!(
        files = report.files_checked,
        records = report.records_checked,
        errors = report.error_count(),
        "Validated prototype directory"
    );
    Ok(report)
}

/// Identifier sets used for static reference checks: every registered kind,
/// with its resolved and raw ids
pub fn known_ids(registry: &KindRegistry) -> BTreeMap<String, BTreeSet<String>> {
    registry
        .kind_names()
        .into_iter()
        .filter_map(|name| registry.kind(name))
        .map(|kind| {
            let ids = kind
                .instances
                .keys()
                .chain(kind.raw.iter().filter(|(_, r)| !r.is_abstract).map(|(id, _)| id))
                .cloned()
                .collect();
            (kind.name().to_string(), ids)
        })
        .collect()
}
