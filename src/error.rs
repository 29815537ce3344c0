//! Error taxonomy for the whole compile.
//!
//! Every fallible stage returns [`Result`]. A single fatal error unwinds to
//! the driver, which renders it and maps the kind to a process exit code:
//! compile errors (syntax, type, overload, template, task) exit 1, I/O
//! errors exit 2, internal invariant violations exit 3.
//!
//! Errors carry a [`SourcePos`] whenever a token was in hand, so the
//! renderer can show the offending line with a caret underline.

use crate::intern::{Interner, Symbol};
use crate::style::Style;
use std::fmt;

/// A position in Argon source: file, 1-based line, 1-based column.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SourcePos {
    pub filepath: Symbol,
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub fn new(filepath: Symbol, line: u32, column: u32) -> Self {
        SourcePos { filepath, line, column }
    }
}

#[derive(Clone, Debug)]
pub enum CompileErrorKind {
    /// Malformed input in the tokenizer, preprocessor, or parser.
    Syntax(String),
    /// Unresolved type, incompatible base, cyclic inheritance, augment or
    /// property conflict.
    Type(String),
    /// No compatible method, or several equally good ones. Carries the
    /// formatted candidate signatures.
    Overload { message: String, candidates: Vec<String> },
    /// Missing specializer, arity mismatch, or runaway instantiation.
    Template(String),
    /// `yield`/`await` somewhere a state machine cannot be built.
    TaskLowering(String),
    /// Source file missing or output path unwritable.
    Io(String),
    /// An invariant the compiler itself relies on was violated.
    Internal(String),
}

#[derive(Clone, Debug)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub pos: Option<SourcePos>,
}

pub type Result<T> = std::result::Result<T, CompileError>;

impl CompileError {
    pub fn new(kind: CompileErrorKind, pos: Option<SourcePos>) -> Self {
        CompileError { kind, pos }
    }

    pub fn syntax(message: impl Into<String>, pos: SourcePos) -> Self {
        CompileError::new(CompileErrorKind::Syntax(message.into()), Some(pos))
    }

    pub fn type_error(message: impl Into<String>, pos: Option<SourcePos>) -> Self {
        CompileError::new(CompileErrorKind::Type(message.into()), pos)
    }

    pub fn overload(message: impl Into<String>, candidates: Vec<String>, pos: Option<SourcePos>) -> Self {
        CompileError::new(
            CompileErrorKind::Overload { message: message.into(), candidates },
            pos,
        )
    }

    pub fn template(message: impl Into<String>, pos: Option<SourcePos>) -> Self {
        CompileError::new(CompileErrorKind::Template(message.into()), pos)
    }

    pub fn task_lowering(message: impl Into<String>, pos: Option<SourcePos>) -> Self {
        CompileError::new(CompileErrorKind::TaskLowering(message.into()), pos)
    }

    pub fn io(message: impl Into<String>) -> Self {
        CompileError::new(CompileErrorKind::Io(message.into()), None)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::new(CompileErrorKind::Internal(message.into()), None)
    }

    /// Short category label used in rendered output and JSON diagnostics.
    pub fn label(&self) -> &'static str {
        match self.kind {
            CompileErrorKind::Syntax(_) => "syntax error",
            CompileErrorKind::Type(_) => "type error",
            CompileErrorKind::Overload { .. } => "overload error",
            CompileErrorKind::Template(_) => "template error",
            CompileErrorKind::TaskLowering(_) => "task error",
            CompileErrorKind::Io(_) => "io error",
            CompileErrorKind::Internal(_) => "internal error",
        }
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> i32 {
        match self.kind {
            CompileErrorKind::Io(_) => 2,
            CompileErrorKind::Internal(_) => 3,
            _ => 1,
        }
    }

    pub fn message(&self) -> String {
        match &self.kind {
            CompileErrorKind::Syntax(m)
            | CompileErrorKind::Type(m)
            | CompileErrorKind::Template(m)
            | CompileErrorKind::TaskLowering(m)
            | CompileErrorKind::Io(m)
            | CompileErrorKind::Internal(m) => m.clone(),
            CompileErrorKind::Overload { message, candidates } => {
                let mut out = message.clone();
                for c in candidates {
                    out.push_str("\n    candidate: ");
                    out.push_str(c);
                }
                out
            }
        }
    }

    /// Renders the error with an excerpt of the offending source line.
    ///
    /// `source` is the text of the file named by `pos.filepath`; pass `None`
    /// when the file is no longer available (the header line still renders).
    pub fn render(&self, interner: &Interner, source: Option<&str>) -> String {
        let path = self.pos.map(|p| interner.resolve(p.filepath).to_string());
        self.render_with(path.as_deref(), source)
    }

    /// Like [`render`](Self::render) but with the file path already
    /// resolved, for callers whose interner is gone.
    pub fn render_with(&self, path: Option<&str>, source: Option<&str>) -> String {
        let mut out = format!("{}: {}", Style::bold_red(self.label()), self.message());

        if let Some(pos) = self.pos {
            let path = path.unwrap_or("<input>");
            out.push_str(&format!(
                "\n  {} {}:{}:{}",
                Style::blue("-->"),
                path,
                pos.line,
                pos.column
            ));
            if let Some(text) = source {
                if let Some(line) = text.lines().nth(pos.line.saturating_sub(1) as usize) {
                    let gutter = Style::blue(&format!("{:4} |", pos.line));
                    let caret_pad = " ".repeat(pos.column.saturating_sub(1) as usize);
                    out.push_str(&format!(
                        "\n{} {}\n     {} {}{}",
                        gutter,
                        line,
                        Style::blue("|"),
                        caret_pad,
                        Style::red("^")
                    ));
                }
            }
        }
        out
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.message())
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_class() {
        assert_eq!(CompileError::io("gone").exit_code(), 2);
        assert_eq!(CompileError::internal("bad").exit_code(), 3);
        assert_eq!(
            CompileError::type_error("mismatch", None).exit_code(),
            1
        );
    }

    #[test]
    fn overload_message_lists_candidates() {
        let err = CompileError::overload(
            "ambiguous call to f",
            vec!["f(Int,Real)".into(), "f(Real,Int)".into()],
            None,
        );
        let msg = err.message();
        assert!(msg.contains("f(Int,Real)"));
        assert!(msg.contains("f(Real,Int)"));
    }

    #[test]
    fn render_includes_excerpt_and_caret() {
        let mut interner = Interner::new();
        let file = interner.intern("demo.argon");
        let err = CompileError::syntax("unterminated string", SourcePos::new(file, 2, 5));
        let rendered = err.render(&interner, Some("class A\nabc \"oops\nendClass"));
        assert!(rendered.contains("demo.argon:2:5"));
        assert!(rendered.contains("oops"));
        assert!(rendered.contains('^'));
    }

    #[test]
    fn render_without_source_still_names_position() {
        let mut interner = Interner::new();
        let file = interner.intern("lib.argon");
        let err = CompileError::syntax("bad escape", SourcePos::new(file, 7, 1));
        let rendered = err.render(&interner, None);
        assert!(rendered.contains("lib.argon:7:1"));
    }
}
