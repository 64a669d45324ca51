//! Data Trees
//!
//! Authored documents are parsed with `serde_yaml` and converted into
//! `serde_json::Value` trees so the rest of the engine works on one generic
//! representation of mappings, sequences and scalars.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A generic data tree (mapping / sequence / scalar)
pub type DataNode = serde_json::Value;

/// A mapping node, the shape of every prototype record
pub type Mapping = serde_json::Map<String, DataNode>;

/// Where a record was authored
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source file, `None` for in-memory strings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Document index within the stream
    pub document: usize,
    /// Record index within the document
    pub record: usize,
}

impl SourceLocation {
    pub fn in_string(document: usize, record: usize) -> Self {
        Self { file: None, document, record }
    }

    pub fn in_file(path: impl Into<PathBuf>, document: usize, record: usize) -> Self {
        Self { file: Some(path.into()), document, record }
    }

    /// Location of a whole file, used for file-level failures
    pub fn file_only(path: &Path) -> Self {
        Self::in_file(path, 0, 0)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(path) => write!(f, "{}", path.display())?,
            None => write!(f, "<string>")?,
        }
        write!(f, "[doc {}, record {}]", self.document, self.record)
    }
}

/// Parse a (possibly multi-document) YAML stream into data trees.
///
/// Empty documents are dropped.
pub fn parse_documents(text: &str) -> std::result::Result<Vec<DataNode>, String> {
    let mut documents = Vec::new();

    for document in serde_yaml::Deserializer::from_str(text) {
        let yaml = serde_yaml::Value::deserialize(document).map_err(|e| e.to_string())?;
        if yaml.is_null() {
            continue;
        }
        let json = serde_json::to_value(yaml).map_err(|e| e.to_string())?;
        documents.push(json);
    }

    Ok(documents)
}

/// Split a document into its record mappings.
///
/// A document is either a sequence of mappings or a single mapping. Entries
/// that are not mappings are returned as `Err(index)`.
pub fn document_records(document: &DataNode) -> Vec<std::result::Result<&Mapping, usize>> {
    match document {
        DataNode::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| item.as_object().ok_or(index))
            .collect(),
        DataNode::Object(map) => vec![Ok(map)],
        _ => vec![Err(0)],
    }
}

/// Read a value that is either a single string or a sequence of strings
pub fn string_list(value: &DataNode) -> Option<Vec<String>> {
    match value {
        DataNode::String(s) => Some(vec![s.clone()]),
        DataNode::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(String::from))
            .collect(),
        _ => None,
    }
}

/// Short name of a node's shape, for error messages
pub fn shape_name(value: &DataNode) -> &'static str {
    match value {
        DataNode::Null => "null",
        DataNode::Bool(_) => "bool",
        DataNode::Number(n) if n.is_f64() => "float",
        DataNode::Number(_) => "integer",
        DataNode::String(_) => "string",
        DataNode::Array(_) => "sequence",
        DataNode::Object(_) => "mapping",
    }
}
