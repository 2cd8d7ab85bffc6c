//! Accumulated, non-fatal diagnostics.
//!
//! Semantic analysis never aborts on a bad program. Every rule violation is
//! recorded here and the offending node keeps flowing through the pipeline
//! with an error sentinel type, so a single pass can report everything it
//! finds. The orchestrating driver is expected to check for recorded
//! diagnostics before asking for code generation.

use colored::Colorize;

use crate::frontend::Position;

/// The closed set of diagnostic categories the analysis can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DiagnosticKind {
    /// A name was declared twice in the same scope
    RedefinitionError,
    /// A name could not be found in any enclosing scope
    ResolveSymbolError,
    /// A semantic rule violation found while type checking
    TypeError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub position: Position,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, position: Position, message: impl Into<String>) -> Self {
        Self {
            kind,
            position,
            message: message.into(),
        }
    }

    /// Renders the diagnostic with terminal colors for interactive use
    pub fn render(&self) -> String {
        format!(
            "{}{}{}",
            self.kind.to_string().red(),
            format!("({})", self.position.line).white(),
            format!("[{}]", self.message).normal(),
        )
    }
}

impl core::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})[{}]", self.kind, self.position.line, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_format_as_kind_line_message() {
        let diagnostic = Diagnostic::new(
            DiagnosticKind::TypeError,
            Position::new(12, 4),
            "condition is not a boolean expression",
        );

        assert_eq!(
            diagnostic.to_string(),
            "TypeError(12)[condition is not a boolean expression]"
        );
    }
}
