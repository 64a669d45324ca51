//! Game Prototypes
//!
//! A prototype inheritance and composition engine for data-driven game
//! content. Records ("prototypes") are authored in YAML, grouped by kind,
//! and may inherit from one or more parents of the same kind.
//!
//! ## Features
//!
//! - **Multi-parent inheritance**: a DAG per kind, with cycle and self-parent
//!   rejection
//! - **Field composition policies**: normal, always-push (merging sequences
//!   and mappings) and never-push fields
//! - **Incremental resolve**: only changed records and their descendants are
//!   recomposed, with reload notifications
//! - **Hot reload**: SHA-256 checksums detect changed files
//! - **Categories**: explicit, inherited and component-derived memberships
//! - **Validation**: non-instantiating directory checks and static id
//!   references with "did you mean" suggestions
//!
//! ## Pipeline
//!
//! ```text
//! YAML ──> Loader ──> raw store + inheritance graph
//!                          │
//!                          ▼
//!                      Resolver ──> composed store ──> instances
//!                          │
//!                          ▼
//!                   Category index, reload listeners
//! ```

pub mod category;
pub mod checksum;
pub mod compose;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod node;
pub mod prototype;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod validate;

pub use category::{CategoryDef, CategoryIndex, CategoryInheritancePolicy, ComponentCategoryTable};
pub use checksum::{Checksum, ChecksumTable};
pub use config::EngineConfig;
pub use diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics, Severity};
pub use error::{PrototypeError, Result};
pub use graph::InheritanceGraph;
pub use loader::LoadReport;
pub use manager::{PrototypeManager, PrototypesReloaded, ReloadReport};
pub use manifest::SchemaManifest;
pub use node::{DataNode, Mapping, SourceLocation};
pub use prototype::{downcast, DynamicPrototype, HookContext, KindRegistration, Prototype, SchemaProvider};
pub use registry::{ChangeSet, RawRecord};
pub use resolver::ResolveReport;
pub use schema::{FieldCompositionPolicy, FieldSchema, FieldType, KindSchema};
pub use validate::{StaticIdError, StaticIdField, ValidationReport};
