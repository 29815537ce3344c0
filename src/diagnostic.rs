//! Machine-readable diagnostics.
//!
//! `--message-format json` serializes the final error as one JSON object
//! per line, the shape editor tooling expects: category, message, optional
//! location, and the overload candidate list when one exists.

use crate::error::{CompileError, CompileErrorKind};
use crate::intern::Interner;
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct Diagnostic {
    pub level: &'static str,
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub candidates: Vec<String>,
}

impl Diagnostic {
    pub fn from_failure(failure: &crate::compile::CompileFailure) -> Self {
        let mut diagnostic = Self::from_parts(&failure.error);
        diagnostic.file = failure.file.clone();
        diagnostic
    }

    pub fn from_error(error: &CompileError, interner: &Interner) -> Self {
        let mut diagnostic = Self::from_parts(error);
        diagnostic.file = error.pos.map(|p| interner.resolve(p.filepath).to_string());
        diagnostic
    }

    fn from_parts(error: &CompileError) -> Self {
        let candidates = match &error.kind {
            CompileErrorKind::Overload { candidates, .. } => candidates.clone(),
            _ => Vec::new(),
        };
        let message = match &error.kind {
            CompileErrorKind::Overload { message, .. } => message.clone(),
            _ => error.message(),
        };
        Diagnostic {
            level: "error",
            kind: error.label(),
            message,
            file: None,
            line: error.pos.map(|p| p.line),
            column: error.pos.map(|p| p.column),
            candidates,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"level\":\"error\",\"message\":{:?}}}", self.message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourcePos;

    #[test]
    fn json_carries_location_and_kind() {
        let mut interner = Interner::new();
        let file = interner.intern("demo.argon");
        let error = CompileError::syntax("unexpected '}'", SourcePos::new(file, 4, 7));
        let json = Diagnostic::from_error(&error, &interner).to_json();
        assert!(json.contains("\"kind\":\"syntax error\""));
        assert!(json.contains("\"file\":\"demo.argon\""));
        assert!(json.contains("\"line\":4"));
        assert!(json.contains("\"column\":7"));
    }

    #[test]
    fn overload_candidates_serialize() {
        let interner = Interner::new();
        let error = CompileError::overload(
            "ambiguous call to 'f'",
            vec!["f(Int,Real)".into(), "f(Real,Int)".into()],
            None,
        );
        let json = Diagnostic::from_error(&error, &interner).to_json();
        assert!(json.contains("f(Int,Real)"));
        assert!(json.contains("f(Real,Int)"));
        assert!(!json.contains("\"file\""));
    }
}
