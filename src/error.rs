//! Error types for the prototype engine

use std::path::PathBuf;

use thiserror::Error;

use crate::node::SourceLocation;

/// Result type for prototype operations
pub type Result<T> = std::result::Result<T, PrototypeError>;

/// Prototype engine errors
#[derive(Error, Debug)]
pub enum PrototypeError {
    // ========== Registration ==========
    #[error("Duplicate prototype kind: {0}")]
    DuplicateKind(String),

    #[error("Invalid schema for kind '{kind}': {reason}")]
    InvalidSchema { kind: String, reason: String },

    #[error("Prototype kind is not registered: {0}")]
    UnregisteredKind(String),

    // ========== Loading ==========
    #[error("Unknown prototype kind '{kind}' at {location}")]
    UnknownKind { kind: String, location: SourceLocation },

    #[error("Duplicate {kind} prototype '{id}' at {location} (first defined at {first})")]
    DuplicateId {
        kind: String,
        id: String,
        location: SourceLocation,
        first: SourceLocation,
    },

    #[error("Missing field '{field}' on {kind} prototype at {location}")]
    MissingField {
        kind: String,
        field: String,
        location: SourceLocation,
    },

    #[error("Failed to parse {location}: {message}")]
    Parse {
        location: SourceLocation,
        message: String,
    },

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Loader worker panicked while parsing {}", .0.display())]
    WorkerPanicked(PathBuf),

    // ========== Inheritance graph ==========
    #[error("Prototype '{0}' cannot be its own parent")]
    SelfParent(String),

    #[error("Adding parent '{parent}' to '{id}' would create an inheritance cycle")]
    Cycle { id: String, parent: String },

    #[error("Cannot remove '{id}': it still has {children} child(ren)")]
    HasChildren { id: String, children: usize },

    #[error("Node not found in inheritance graph: {0}")]
    UnknownNode(String),

    // ========== Resolution & queries ==========
    #[error("No prototypes have been resolved yet")]
    NotLoaded,

    #[error("Unknown {kind} prototype: {id}")]
    UnknownPrototype { kind: String, id: String },

    #[error("{kind} prototype '{id}' is not of the requested type")]
    TypeMismatch { kind: String, id: String },

    // ========== Wrapped ==========
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Manifest error: {0}")]
    Manifest(String),
}
