//! Diagnostics collection for validation passes.
//!
//! [`NetworkGraph::validate_into`](crate::NetworkGraph::validate_into) and
//! the pre-solve checks report structural findings here instead of failing
//! on the first problem, so callers can present everything at once. Issues
//! carry a severity, a category for grouping, and an optional entity
//! reference such as `"node 14"`.
//!
//! # Example
//!
//! ```
//! use dsat_core::diagnostics::{Diagnostics, Severity};
//!
//! let mut diag = Diagnostics::new();
//! diag.add_warning("structure", "network has no loads");
//! diag.add_error_with_entity("reference", "source bound to unknown node", "source 3");
//!
//! assert_eq!(diag.warning_count(), 1);
//! assert_eq!(diag.error_count(), 1);
//! ```

use serde::Serialize;

/// Severity level for diagnostic issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Unusual but the operation can continue
    Warning,
    /// The graph cannot be solved as-is
    Error,
}

/// A single issue found during validation
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    /// Severity of the issue
    pub severity: Severity,
    /// Category for grouping (e.g. "structure", "reference", "schedule")
    pub category: String,
    /// Human-readable description
    pub message: String,
    /// Optional entity reference (e.g. "node 14", "branch 2")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl DiagnosticIssue {
    /// Create a new diagnostic issue
    pub fn new(severity: Severity, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            entity: None,
        }
    }

    /// Attach an entity reference
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl std::fmt::Display for DiagnosticIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "[{}:{}] {}", severity, self.category, self.message)?;
        if let Some(entity) = &self.entity {
            write!(f, " ({})", entity)?;
        }
        Ok(())
    }
}

/// Ordered collection of issues for one validation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    /// All collected issues, in discovery order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<DiagnosticIssue>,
}

impl Diagnostics {
    /// Create new empty diagnostics
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw issue directly
    pub fn add(&mut self, issue: DiagnosticIssue) {
        self.issues.push(issue);
    }

    /// Add a warning with category and message
    pub fn add_warning(&mut self, category: &str, message: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Warning, category, message));
    }

    /// Add a warning with an entity reference
    pub fn add_warning_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Warning, category, message).with_entity(entity));
    }

    /// Add an error with category and message
    pub fn add_error(&mut self, category: &str, message: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Error, category, message));
    }

    /// Add an error with an entity reference
    pub fn add_error_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Error, category, message).with_entity(entity));
    }

    /// Iterate warnings only
    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    /// Iterate errors only
    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    /// Number of warnings collected
    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// Number of errors collected
    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// True when at least one error was collected
    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_filters() {
        let mut diag = Diagnostics::new();
        diag.add_warning("structure", "no loads");
        diag.add_error("structure", "no slack node");
        diag.add_error_with_entity("reference", "unknown endpoint", "branch 4");

        assert_eq!(diag.warning_count(), 1);
        assert_eq!(diag.error_count(), 2);
        assert!(diag.has_errors());
        assert!(diag.errors().any(|i| i.entity.as_deref() == Some("branch 4")));
    }

    #[test]
    fn display_format() {
        let issue = DiagnosticIssue::new(Severity::Error, "structure", "no slack node")
            .with_entity("island 0");
        let text = issue.to_string();
        assert!(text.starts_with("[error:structure]"));
        assert!(text.contains("island 0"));
    }

    #[test]
    fn serializes_to_json() {
        let mut diag = Diagnostics::new();
        diag.add_warning("structure", "no loads");
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("\"severity\":\"warning\""));
    }
}
