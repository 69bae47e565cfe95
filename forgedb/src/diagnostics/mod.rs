use serde::Serialize;
use std::fmt;

/// Severity of a diagnostic. A table with any `Error` diagnostic is
/// excluded from the snapshot and generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single diagnostic produced during schema validation, data loading,
/// validation, or compilation. Codes are stable strings like
/// `validation/duplicate-primary-key` so tooling can match on them.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Diagnostic {
    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    pub fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    pub fn info(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, message)
    }

    fn new(severity: Severity, code: &'static str, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            code,
            message: message.into(),
            table: None,
            row: None,
            field: None,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.severity, self.code)?;
        if let Some(table) = &self.table {
            write!(f, " {table}")?;
            if let Some(field) = &self.field {
                write!(f, ".{field}")?;
            }
            if let Some(row) = self.row {
                write!(f, " (row {row})")?;
            }
        }
        write!(f, ": {}", self.message)
    }
}

/// Append-only sink for diagnostics. Parallel table workers each fill a
/// local sink, then merge into the shared one under a mutex.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    entries: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn merge(&mut self, other: DiagnosticSink) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Whether any Error-severity diagnostic exists anywhere.
    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Whether the named table has any Error-severity diagnostic.
    pub fn table_has_errors(&self, table: &str) -> bool {
        self.entries
            .iter()
            .any(|d| d.severity == Severity::Error && d.table.as_deref() == Some(table))
    }

    /// Consume the sink and return diagnostics in reporting order:
    /// by table, then row, then field, then code. Diagnostics without a
    /// table (whole-run issues) sort first.
    pub fn into_sorted(self) -> Vec<Diagnostic> {
        let mut entries = self.entries;
        entries.sort_by(|a, b| {
            (&a.table, a.row, &a.field, a.code).cmp(&(&b.table, b.row, &b.field, b.code))
        });
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_errors() {
        let mut sink = DiagnosticSink::new();
        sink.push(Diagnostic::warning("data/unknown-field", "extra field"));
        assert!(!sink.has_errors());

        sink.push(Diagnostic::error("validation/dangling-ref", "missing target"));
        assert!(sink.has_errors());
    }

    #[test]
    fn test_table_has_errors() {
        let mut sink = DiagnosticSink::new();
        sink.push(
            Diagnostic::error("validation/duplicate-primary-key", "dup").with_table("Item"),
        );
        sink.push(Diagnostic::warning("data/unknown-field", "extra").with_table("Player"));

        assert!(sink.table_has_errors("Item"));
        assert!(!sink.table_has_errors("Player"));
    }

    #[test]
    fn test_sorted_order_is_deterministic() {
        let mut sink = DiagnosticSink::new();
        sink.push(Diagnostic::error("b-code", "second").with_table("Zeta").with_row(1));
        sink.push(Diagnostic::error("a-code", "first").with_table("Alpha").with_row(9));
        sink.push(Diagnostic::error("a-code", "run-level"));

        let sorted = sink.into_sorted();
        assert_eq!(sorted[0].table, None);
        assert_eq!(sorted[1].table.as_deref(), Some("Alpha"));
        assert_eq!(sorted[2].table.as_deref(), Some("Zeta"));
    }

    #[test]
    fn test_display_format() {
        let d = Diagnostic::error("validation/duplicate-primary-key", "value 3 repeats")
            .with_table("Item")
            .with_field("Id")
            .with_row(4);
        assert_eq!(
            d.to_string(),
            "error[validation/duplicate-primary-key] Item.Id (row 4): value 3 repeats"
        );
    }
}
