//! Diagnostics
//!
//! Per-record problems found while loading, resolving and validating.
//! Anything that should not abort a whole pass is collected here instead of
//! being returned as an `Err`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::node::SourceLocation;

// =============================================================================
// Diagnostic Codes
// =============================================================================

/// Diagnostic code for categorizing issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    // === Loading ===
    /// Document could not be parsed
    ParseFailure,
    /// Record is not a mapping or has no kind tag
    InvalidRecord,
    /// Record of a kind that is not registered
    UnknownKind,
    /// Record without an identifier
    MissingId,
    /// Identifier defined more than once
    DuplicateId,
    /// Parent field is neither a string nor a list of strings
    InvalidParent,
    /// Record lists itself as a parent
    SelfParent,
    /// Parent edge would close an inheritance cycle
    Cycle,
    /// File could not be read and was skipped
    FileSkipped,

    // === Resolution ===
    /// Parent is not defined in the raw store
    UnknownParent,
    /// A parent failed to compose, so this record cannot either
    ParentFailed,
    /// Factory rejected the composed record
    Instantiation,
    /// Post-instantiation hook failed
    HookFailed,
    /// Factory produced an instance with a different identifier
    IdMismatch,

    // === Validation ===
    /// Field not declared by the kind's schema
    UnknownField,
    /// Field value has the wrong shape
    TypeMismatch,
    /// Required field missing after composition
    MissingRequired,
    /// Field names a prototype that does not exist
    UnknownReference,

    // === Categories ===
    /// Entity names a category that is not defined
    UnknownCategory,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseFailure => "P001",
            Self::InvalidRecord => "P002",
            Self::UnknownKind => "P003",
            Self::MissingId => "P004",
            Self::DuplicateId => "P005",
            Self::InvalidParent => "P006",
            Self::SelfParent => "G001",
            Self::Cycle => "G002",
            Self::FileSkipped => "W001",
            Self::UnknownParent => "R001",
            Self::ParentFailed => "R002",
            Self::Instantiation => "R003",
            Self::HookFailed => "R004",
            Self::IdMismatch => "R005",
            Self::UnknownField => "V001",
            Self::TypeMismatch => "V002",
            Self::MissingRequired => "V003",
            Self::UnknownReference => "V004",
            Self::UnknownCategory => "W002",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::FileSkipped | Self::UnknownCategory => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// A single diagnostic item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticItem {
    pub code: DiagnosticCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Additional context (related ids, field paths)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl DiagnosticItem {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: None,
            id: None,
            location: None,
            context: Vec::new(),
        }
    }

    /// Diagnostic attached to one record
    pub fn for_record(
        code: DiagnosticCode,
        kind: &str,
        id: &str,
        location: &SourceLocation,
        message: impl Into<String>,
    ) -> Self {
        Self::new(code, message)
            .with_kind(kind)
            .with_id(id)
            .with_location(location.clone())
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.severity(), self.message)?;

        match (&self.kind, &self.id) {
            (Some(kind), Some(id)) => write!(f, " ({} '{}')", kind, id)?,
            (Some(kind), None) => write!(f, " ({})", kind)?,
            _ => {}
        }
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics from a load, resolve or validation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: DiagnosticItem) {
        self.items.push(item);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.severity() == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Warning)
    }

    /// Items carrying the given code
    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(move |i| i.code == code)
    }

    pub fn all(&self) -> &[DiagnosticItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// Merge another Diagnostics into this one
    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// Format all diagnostics for display
    pub fn format_all(&self) -> String {
        let mut output = String::new();

        for item in &self.items {
            output.push_str(&format!("{}\n", item));
        }

        if self.has_errors() {
            output.push_str(&format!(
                "\n{} error(s), {} warning(s)\n",
                self.error_count(),
                self.warning_count()
            ));
        } else if !self.is_empty() {
            output.push_str(&format!("\n{} warning(s)\n", self.warning_count()));
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_all())
    }
}

impl Extend<DiagnosticItem> for Diagnostics {
    fn extend<I: IntoIterator<Item = DiagnosticItem>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl IntoIterator for Diagnostics {
    type Item = DiagnosticItem;
    type IntoIter = std::vec::IntoIter<DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagnosticItem;
    type IntoIter = std::slice::Iter<'a, DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_severity() {
        assert_eq!(DiagnosticCode::Cycle.severity(), Severity::Error);
        assert_eq!(DiagnosticCode::FileSkipped.severity(), Severity::Warning);
    }

    #[test]
    fn test_diagnostics_collection() {
        let mut diags = Diagnostics::new();
        diags.push(DiagnosticItem::for_record(
            DiagnosticCode::UnknownParent,
            "widget",
            "B",
            &SourceLocation::in_string(0, 1),
            "parent 'A' is not defined",
        ));
        diags.push(DiagnosticItem::new(DiagnosticCode::FileSkipped, "locked.yml"));

        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
        assert!(diags.has_errors());
        assert_eq!(diags.with_code(DiagnosticCode::UnknownParent).count(), 1);
    }

    #[test]
    fn test_display_includes_record_and_location() {
        let item = DiagnosticItem::for_record(
            DiagnosticCode::Cycle,
            "widget",
            "A",
            &SourceLocation::in_string(0, 2),
            "cycle",
        )
        .with_context("A -> C -> B -> A");

        let text = item.to_string();
        assert!(text.starts_with("[G002] error: cycle (widget 'A') at <string>[doc 0, record 2]"));
        assert!(text.ends_with("\n  - A -> C -> B -> A"));
    }
}
