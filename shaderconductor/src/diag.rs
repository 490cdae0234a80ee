//! Diagnostics collected across every compiler phase

use std::fmt;
use std::sync::Arc;

/// How serious a diagnostic is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Error taxonomy shared by all phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Semantic,
    UnsupportedFeature,
    TargetCapability,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Semantic => "semantic error",
            ErrorKind::UnsupportedFeature => "unsupported feature",
            ErrorKind::TargetCapability => "target capability",
            ErrorKind::Internal => "internal error",
        })
    }
}

/// A position in a source file (1-based line and column)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: Arc<str>, line: u32, column: u32) -> Self {
        SourceLocation { file, line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.file, self.line, self.column)
    }
}

/// A single message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: ErrorKind,
    pub location: Option<SourceLocation>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(kind: ErrorKind, location: Option<SourceLocation>, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            kind,
            location,
            message: message.into(),
        }
    }

    pub fn warning(location: Option<SourceLocation>, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            kind: ErrorKind::Semantic,
            location,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {}: {}", loc, self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Ordered list of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics { items: Vec::new() }
    }

    /// A list holding a single error.
    pub fn single(kind: ErrorKind, location: Option<SourceLocation>, message: impl Into<String>) -> Self {
        let mut diags = Diagnostics::new();
        diags.error(kind, location, message);
        diags
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn error(&mut self, kind: ErrorKind, location: Option<SourceLocation>, message: impl Into<String>) {
        self.push(Diagnostic::error(kind, location, message));
    }

    pub fn warning(&mut self, location: Option<SourceLocation>, message: impl Into<String>) {
        self.push(Diagnostic::warning(location, message));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }

    /// First error, if any.
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.items.iter().find(|d| d.is_error())
    }

    /// All messages joined by newlines, in emission order.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Diagnostics {
            items: vec![diagnostic],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_preserves_order() {
        let file: Arc<str> = Arc::from("a.hlsl");
        let mut diags = Diagnostics::new();
        diags.warning(
            Some(SourceLocation::new(file.clone(), 2, 5)),
            "implicit truncation of vector type",
        );
        diags.error(
            ErrorKind::Semantic,
            Some(SourceLocation::new(file, 7, 12)),
            "use of undeclared identifier 'foo'",
        );
        diags.error(ErrorKind::Internal, None, "boom");

        assert_eq!(
            diags.render(),
            "a.hlsl(2,5): warning: implicit truncation of vector type\n\
             a.hlsl(7,12): error: use of undeclared identifier 'foo'\n\
             error: boom"
        );
        assert!(diags.has_errors());
        assert_eq!(diags.first_error().unwrap().kind, ErrorKind::Semantic);
    }

    #[test]
    fn test_warnings_only_is_not_error() {
        let mut diags = Diagnostics::new();
        diags.warning(None, "unused");
        assert!(!diags.has_errors());
        assert_eq!(diags.len(), 1);
    }
}
