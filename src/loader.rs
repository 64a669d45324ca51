//! Prototype Loading
//!
//! Parses documents into raw records and commits them to the raw store and
//! the inheritance graph. Directory loads read and parse files on scoped
//! worker threads; the results are merged and committed on the calling
//! thread, so the registry is only ever mutated single-threaded.

use include_dir::Dir;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::checksum::{Checksum, ChecksumTable};
use crate::config::{LoaderConfig, RetryConfig};
use crate::diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics};
use crate::error::{PrototypeError, Result};
use crate::node::{document_records, parse_documents, shape_name, string_list, DataNode, SourceLocation};
use crate::registry::{ChangeSet, KindData, KindRegistry, RawRecord};
use crate::schema::KIND_FIELD;

/// Files and directories whose records are always treated as abstract
#[derive(Debug, Clone, Default)]
pub struct AbstractPaths {
    files: HashSet<PathBuf>,
    directories: Vec<PathBuf>,
}

impl AbstractPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>) {
        self.files.insert(path.into());
    }

    pub fn add_directory(&mut self, path: impl Into<PathBuf>) {
        self.directories.push(path.into());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains(path) || self.directories.iter().any(|dir| path.starts_with(dir))
    }
}

/// Outcome of one load call
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// (kind, id) pairs inserted or replaced
    pub changed: ChangeSet,
    pub diagnostics: Diagnostics,
    pub files_read: usize,
    /// Files that could not be read after retrying
    pub skipped_files: Vec<PathBuf>,
    /// Checksums of every file read, for reload change detection
    pub checksums: ChecksumTable,
}

impl LoadReport {
    pub fn merge(&mut self, other: LoadReport) {
        self.changed.extend(other.changed);
        self.diagnostics.merge(other.diagnostics);
        self.files_read += other.files_read;
        self.skipped_files.extend(other.skipped_files);
        self.checksums.merge(other.checksums);
    }
}

/// How extraction treats records of unregistered kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownKinds {
    /// Abort with `UnknownKind`
    Fail,
    /// Report a diagnostic and skip the record
    Report,
}

/// Records extracted from one source
#[derive(Debug, Default)]
pub struct Extracted {
    pub records: Vec<RawRecord>,
    pub diagnostics: Diagnostics,
}

/// Turn parsed documents into raw records.
///
/// Records of ignored kinds are dropped silently. Malformed records (no kind
/// tag, no id, bad parent list) are reported and skipped.
pub fn extract_records(
    registry: &KindRegistry,
    documents: &[DataNode],
    file: Option<&Path>,
    force_abstract: bool,
    unknown: UnknownKinds,
) -> Result<Extracted> {
    let mut out = Extracted::default();
    let locate = |document: usize, record: usize| match file {
        Some(path) => SourceLocation::in_file(path, document, record),
        None => SourceLocation::in_string(document, record),
    };

    for (doc_index, document) in documents.iter().enumerate() {
        for (index, entry) in document_records(document).into_iter().enumerate() {
            let location = locate(doc_index, index);

            let map = match entry {
                Ok(map) => map,
                Err(_) => {
                    let shape = match document {
                        DataNode::Array(items) => shape_name(&items[index]),
                        other => shape_name(other),
                    };
                    out.diagnostics.push(
                        DiagnosticItem::new(
                            DiagnosticCode::InvalidRecord,
                            format!("record is a {}, expected a mapping", shape),
                        )
                        .with_location(location),
                    );
                    continue;
                }
            };

            let Some(kind) = map.get(KIND_FIELD).and_then(DataNode::as_str) else {
                out.diagnostics.push(
                    DiagnosticItem::new(
                        DiagnosticCode::InvalidRecord,
                        format!("record has no '{}' tag", KIND_FIELD),
                    )
                    .with_location(location),
                );
                continue;
            };

            if registry.is_ignored(kind) {
                continue;
            }

            let Some(kind_data) = registry.kind(kind) else {
                match unknown {
                    UnknownKinds::Fail => {
                        return Err(PrototypeError::UnknownKind {
                            kind: kind.to_string(),
                            location,
                        })
                    }
                    UnknownKinds::Report => {
                        out.diagnostics.push(
                            DiagnosticItem::new(
                                DiagnosticCode::UnknownKind,
                                format!("unknown prototype kind '{}'", kind),
                            )
                            .with_kind(kind)
                            .with_location(location),
                        );
                        continue;
                    }
                }
            };
            let schema = &kind_data.schema;

            let Some(id) = map.get(&schema.id_field).and_then(DataNode::as_str) else {
                out.diagnostics.push(
                    DiagnosticItem::new(
                        DiagnosticCode::MissingId,
                        format!("record has no string '{}' field", schema.id_field),
                    )
                    .with_kind(kind)
                    .with_location(location),
                );
                continue;
            };

            let parents = match schema.parent_field.as_ref().and_then(|f| map.get(f)) {
                None | Some(DataNode::Null) => Vec::new(),
                Some(value) => match string_list(value) {
                    Some(parents) => parents,
                    None => {
                        out.diagnostics.push(DiagnosticItem::for_record(
                            DiagnosticCode::InvalidParent,
                            kind,
                            id,
                            &location,
                            format!(
                                "parent must be a string or a list of strings, found {}",
                                shape_name(value)
                            ),
                        ));
                        continue;
                    }
                },
            };

            let declared_abstract = schema
                .abstract_field
                .as_ref()
                .and_then(|f| map.get(f))
                .and_then(DataNode::as_bool)
                .unwrap_or(false);

            out.records.push(RawRecord {
                id: id.to_string(),
                kind: kind.to_string(),
                parents,
                data: map.clone(),
                is_abstract: declared_abstract || force_abstract,
                source: location,
            });
        }
    }

    Ok(out)
}

/// Insert extracted records into the raw store and inheritance graphs.
///
/// Without `overwrite`, any duplicate id (within the batch or against the
/// store) fails the whole call before anything is committed. Cycle and
/// self-parent errors reject only the offending record.
pub fn commit(
    registry: &mut KindRegistry,
    records: Vec<RawRecord>,
    overwrite: bool,
) -> Result<(ChangeSet, Diagnostics)> {
    if !overwrite {
        let mut seen: HashMap<(&str, &str), &SourceLocation> = HashMap::new();
        for record in &records {
            let first = seen
                .get(&(record.kind.as_str(), record.id.as_str()))
                .map(|loc| (*loc).clone())
                .or_else(|| {
                    registry
                        .kind(&record.kind)
                        .and_then(|k| k.raw.get(&record.id))
                        .map(|existing| existing.source.clone())
                });

            if let Some(first) = first {
                return Err(PrototypeError::DuplicateId {
                    kind: record.kind.clone(),
                    id: record.id.clone(),
                    location: record.source.clone(),
                    first,
                });
            }
            seen.insert((record.kind.as_str(), record.id.as_str()), &record.source);
        }
    }

    let mut changed = ChangeSet::new();
    let mut diagnostics = Diagnostics::new();

    for record in records {
        let Some(kind_data) = registry.kind_mut(&record.kind) else {
            continue;
        };

        if let Some(graph) = kind_data.inheritance.as_mut() {
            if let Err(e) = graph.add(&record.id, &record.parents) {
                let code = match e {
                    PrototypeError::SelfParent(_) => DiagnosticCode::SelfParent,
                    _ => DiagnosticCode::Cycle,
                };
                warn!(kind = %record.kind, id = %record.id, location = %record.source, "{}", e);
                diagnostics.push(DiagnosticItem::for_record(
                    code,
                    &record.kind,
                    &record.id,
                    &record.source,
                    e.to_string(),
                ));
                continue;
            }
        }

        changed.insert(record.kind.clone(), record.id.clone());
        kind_data.raw.insert(record.id.clone(), record);
    }

    Ok((changed, diagnostics))
}

/// Load every record of a (possibly multi-document) string
pub fn load_string(registry: &mut KindRegistry, text: &str, overwrite: bool) -> Result<LoadReport> {
    let documents = parse_documents(text).map_err(|message| PrototypeError::Parse {
        location: SourceLocation::in_string(0, 0),
        message,
    })?;

    let extracted = extract_records(registry, &documents, None, false, UnknownKinds::Fail)?;
    let (changed, diagnostics) = commit(registry, extracted.records, overwrite)?;

    let mut report = LoadReport {
        changed,
        diagnostics: extracted.diagnostics,
        ..Default::default()
    };
    report.diagnostics.merge(diagnostics);
    Ok(report)
}

/// Load every prototype file under `root`
pub fn load_directory(
    registry: &mut KindRegistry,
    root: &Path,
    overwrite: bool,
    config: &LoaderConfig,
    abstract_paths: &AbstractPaths,
) -> Result<LoadReport> {
    if !root.is_dir() {
        return Err(PrototypeError::NotADirectory(root.to_path_buf()));
    }

    let files = collect_files(root, config);
    load_files(registry, &files, overwrite, config, abstract_paths)
}

/// Prototype files under `root`, sorted by path
pub fn collect_files(root: &Path, config: &LoaderConfig) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || entry
                    .file_name()
                    .to_str()
                    .map(|name| !config.skips(name))
                    .unwrap_or(false)
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && config.accepts(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}

/// Parse and commit the given files
pub fn load_files(
    registry: &mut KindRegistry,
    files: &[PathBuf],
    overwrite: bool,
    config: &LoaderConfig,
    abstract_paths: &AbstractPaths,
) -> Result<LoadReport> {
    let started = Instant::now();
    let parsed = parse_files(registry, files, config, abstract_paths, UnknownKinds::Fail);

    let mut report = LoadReport::default();
    let mut records = Vec::new();
    for file in parsed {
        let file = file?;
        report.files_read += 1;
        if let Some(checksum) = file.checksum {
            report.checksums.insert(file.path.clone(), checksum);
        } else {
            report.skipped_files.push(file.path.clone());
        }
        report.diagnostics.merge(file.extracted.diagnostics);
        records.extend(file.extracted.records);
    }

    let record_count = records.len();
    let (changed, diagnostics) = commit(registry, records, overwrite)?;
    report.changed.extend(changed);
    report.diagnostics.merge(diagnostics);

    info!(
        files = files.len(),
        records = record_count,
        skipped = report.skipped_files.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Loaded prototype files"
    );

    Ok(report)
}

/// Load prototype files compiled into the binary with `include_dir!`
pub fn load_embedded(
    registry: &mut KindRegistry,
    dir: &Dir<'_>,
    overwrite: bool,
    config: &LoaderConfig,
    abstract_paths: &AbstractPaths,
) -> Result<LoadReport> {
    let mut files: Vec<(&Path, &str)> = Vec::new();
    collect_embedded_files(dir, config, &mut files);
    files.sort_by_key(|(path, _)| *path);

    let mut report = LoadReport::default();
    let mut records = Vec::new();
    for (path, content) in files {
        report.files_read += 1;
        report.checksums.insert(path.to_path_buf(), Checksum::of_text(content));

        let extracted = parse_content(registry, path, content, abstract_paths, UnknownKinds::Fail)?;
        report.diagnostics.merge(extracted.diagnostics);
        records.extend(extracted.records);
    }

    let (changed, diagnostics) = commit(registry, records, overwrite)?;
    report.changed = changed;
    report.diagnostics.merge(diagnostics);

    debug!(files = report.files_read, "Loaded embedded prototype files");
    Ok(report)
}

fn collect_embedded_files<'a>(dir: &'a Dir<'_>, config: &LoaderConfig, files: &mut Vec<(&'a Path, &'a str)>) {
    for file in dir.files() {
        let path = file.path();
        let skipped = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| config.skips(name))
            .unwrap_or(true);
        if skipped || !config.accepts(path) {
            continue;
        }
        match file.contents_utf8() {
            Some(content) => files.push((path, content)),
            None => warn!(path = %path.display(), "Embedded file is not UTF-8, skipping"),
        }
    }

    for subdir in dir.dirs() {
        let skipped = subdir
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| config.skips(name))
            .unwrap_or(false);
        if !skipped {
            collect_embedded_files(subdir, config, files);
        }
    }
}

/// Recover (kind, id) pairs from `text` and remove them everywhere.
///
/// Graph removal is forced, so children lose the removed parent.
pub fn remove_string(registry: &mut KindRegistry, text: &str) -> Result<ChangeSet> {
    let documents = parse_documents(text).map_err(|message| PrototypeError::Parse {
        location: SourceLocation::in_string(0, 0),
        message,
    })?;

    let mut removed = ChangeSet::new();
    for document in &documents {
        for map in document_records(document).into_iter().flatten() {
            let Some(kind) = map.get(KIND_FIELD).and_then(DataNode::as_str) else {
                continue;
            };
            let Some(kind_data) = registry.kind_mut(kind) else {
                debug!(kind, "Ignoring removal of unregistered kind");
                continue;
            };
            let Some(id) = map.get(&kind_data.schema.id_field).and_then(DataNode::as_str) else {
                continue;
            };

            remove_record(kind_data, id)?;
            removed.insert(kind, id);
        }
    }

    Ok(removed)
}

/// Remove every record whose source is one of `files`, except the pairs in
/// `keep`
pub fn remove_file_records(registry: &mut KindRegistry, files: &HashSet<PathBuf>, keep: &ChangeSet) -> Result<ChangeSet> {
    let mut removed = ChangeSet::new();

    for kind in registry.kind_names().into_iter().map(String::from).collect::<Vec<_>>() {
        let Some(kind_data) = registry.kind_mut(&kind) else {
            continue;
        };
        let mut stale: Vec<String> = kind_data
            .raw
            .values()
            .filter(|record| {
                record.source.file.as_ref().map(|f| files.contains(f)).unwrap_or(false)
                    && !keep.contains(&kind, &record.id)
            })
            .map(|record| record.id.clone())
            .collect();
        stale.sort_unstable();

        for id in stale {
            remove_record(kind_data, &id)?;
            removed.insert(kind.as_str(), id);
        }
    }

    Ok(removed)
}

/// Drop one record from every store; graph removal is forced
fn remove_record(kind_data: &mut KindData, id: &str) -> Result<()> {
    if let Some(graph) = kind_data.inheritance.as_mut() {
        if graph.contains(id) {
            graph.remove(id, true)?;
        }
    }
    kind_data.raw.remove(id);
    kind_data.composed.remove(id);
    kind_data.instances.remove(id);
    Ok(())
}

// =============================================================================
// File parsing
// =============================================================================

/// One parsed file
#[derive(Debug)]
pub struct ParsedFile {
    pub path: PathBuf,
    /// `None` when the file could not be read
    pub checksum: Option<Checksum>,
    pub extracted: Extracted,
}

/// Read and parse `files` on scoped worker threads; results keep file order
pub fn parse_files(
    registry: &KindRegistry,
    files: &[PathBuf],
    config: &LoaderConfig,
    abstract_paths: &AbstractPaths,
    unknown: UnknownKinds,
) -> Vec<Result<ParsedFile>> {
    if files.is_empty() {
        return Vec::new();
    }

    let workers = config.worker_count().clamp(1, files.len());
    let chunk_size = files.len().div_ceil(workers);

    std::thread::scope(|s| {
        let handles: Vec<_> = files
            .chunks(chunk_size)
            .map(|chunk| {
                let handle = s.spawn(move || {
                    chunk
                        .iter()
                        .map(|path| parse_file(registry, path, &config.retry, abstract_paths, unknown))
                        .collect::<Vec<_>>()
                });
                (chunk, handle)
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|(chunk, handle)| {
                handle.join().unwrap_or_else(|_| {
                    error!(first = %chunk[0].display(), "Loader worker panicked");
                    vec![Err(PrototypeError::WorkerPanicked(chunk[0].clone()))]
                })
            })
            .collect()
    })
}

fn parse_file(
    registry: &KindRegistry,
    path: &Path,
    retry: &RetryConfig,
    abstract_paths: &AbstractPaths,
    unknown: UnknownKinds,
) -> Result<ParsedFile> {
    let content = match read_with_retry(path, retry) {
        Ok(content) => content,
        Err(e) => {
            let mut extracted = Extracted::default();
            extracted.diagnostics.push(
                DiagnosticItem::new(DiagnosticCode::FileSkipped, format!("could not read file: {}", e))
                    .with_location(SourceLocation::file_only(path)),
            );
            return Ok(ParsedFile {
                path: path.to_path_buf(),
                checksum: None,
                extracted,
            });
        }
    };

    let checksum = Checksum::of_text(&content);
    let extracted = parse_content(registry, path, &content, abstract_paths, unknown)?;
    debug!(path = %path.display(), records = extracted.records.len(), "Parsed prototype file");

    Ok(ParsedFile {
        path: path.to_path_buf(),
        checksum: Some(checksum),
        extracted,
    })
}

/// Parse one file's content; a parse failure skips the file with a diagnostic
fn parse_content(
    registry: &KindRegistry,
    path: &Path,
    content: &str,
    abstract_paths: &AbstractPaths,
    unknown: UnknownKinds,
) -> Result<Extracted> {
    match parse_documents(content) {
        Ok(documents) => extract_records(
            registry,
            &documents,
            Some(path),
            abstract_paths.contains(path),
            unknown,
        ),
        Err(message) => {
            warn!(path = %path.display(), error = %message, "Failed to parse prototype file");
            let mut extracted = Extracted::default();
            extracted.diagnostics.push(
                DiagnosticItem::new(DiagnosticCode::ParseFailure, message)
                    .with_location(SourceLocation::file_only(path)),
            );
            Ok(extracted)
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    !matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput
    )
}

/// Read a file, retrying transient failures with exponential backoff
pub fn read_with_retry(path: &Path, retry: &RetryConfig) -> io::Result<String> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match fs::read_to_string(path) {
            Ok(content) => {
                if attempt > 0 {
                    info!(path = %path.display(), "Read file after {} retries", attempt);
                }
                return Ok(content);
            }
            Err(e) if !is_transient(&e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                return Err(e);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    error!(
                        path = %path.display(),
                        "Failed to read file after {} attempts: {}",
                        max_attempts,
                        e
                    );
                    return Err(e);
                }

                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                let delay = Duration::from_millis(retry.base_delay_ms.saturating_mul(factor));
                warn!(
                    path = %path.display(),
                    "Failed to read file (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                std::thread::sleep(delay);
            }
        }
    }
}
