// diag.rs — Unified diagnostics model
//
// The warning/error sink shared by the element map, the flow analysis and the
// rewrite driver. Recoverable conditions are reported here and the pass keeps
// going; only internal-consistency faults are error-level.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `W0101`, `E0301`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Setup: element map and aligner construction.
    pub const W0101: DiagCode = DiagCode("W0101"); // stage type missing from element map
    pub const W0102: DiagCode = DiagCode("W0102"); // aligner parameters rejected
    pub const W0103: DiagCode = DiagCode("W0103"); // no Classifier traits, fallback flags
    pub const W0104: DiagCode = DiagCode("W0104"); // unparsable flow code

    // Rewrite results.
    pub const W0201: DiagCode = DiagCode("W0201"); // conflicting requirements on a port
    pub const W0202: DiagCode = DiagCode("W0202"); // net Align stages added or removed

    // Internal consistency.
    pub const E0301: DiagCode = DiagCode("E0301"); // fixed point did not converge
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Stage (or stage type) the diagnostic is about, if any.
    pub element: Option<String>,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, element, or hint.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            element: None,
            message: message.into(),
            hint: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        match &self.code {
            Some(code) => write!(f, "{}[{}]: ", level, code)?,
            None => write!(f, "{}: ", level)?,
        }
        if let Some(element) = &self.element {
            write!(f, "{}: ", element)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::error("something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_element() {
        let d = Diagnostic::warning("unknown element class")
            .with_code(codes::W0101)
            .with_element("Frob");
        assert_eq!(format!("{d}"), "warning[W0101]: Frob: unknown element class");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::warning("bad OFFSET")
            .with_code(codes::W0102)
            .with_hint("using the default aligner");
        assert_eq!(d.code, Some(codes::W0102));
        assert_eq!(d.hint.as_deref(), Some("using the default aligner"));
        assert!(!d.is_error());
        assert!(Diagnostic::error("x").is_error());
    }
}
