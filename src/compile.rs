//! The compilation pipeline.
//!
//! ```text
//! Argon source (.argon)
//!       │
//!       ▼
//! ┌───────────────────┐
//! │  1. Tokenizer     │ characters → tokens
//! └─────────┬─────────┘
//!           ▼
//! ┌───────────────────┐
//! │  2. Preprocessor  │ $define / $if / include splicing
//! └─────────┬─────────┘
//!           ▼
//! ┌───────────────────┐
//! │  3. Parser        │ templates, augments, requisites
//! └─────────┬─────────┘
//!           ▼
//! ┌───────────────────┐
//! │  4. Resolve       │ instantiate, organize, overloads, tasks
//! └─────────┬─────────┘
//!           ▼
//! ┌───────────────────┐
//! │  5. Cull          │ reachable code only
//! └─────────┬─────────┘
//!           ▼
//! ┌───────────────────┐
//! │  6. Emit          │ C header + implementation
//! └───────────────────┘
//! ```
//!
//! Everything hangs off one [`CompileContext`] (the token-list
//! definitions, include bookkeeping, and the [`Program`] registry), so
//! there is no process-wide state and two compiles never interfere.
//!
//! Include resolution searches the including file's directory, the first
//! source file's directory, then `ARGON_LIBRARIES`.

use crate::codegen_c::{emit_program, CTarget};
use crate::error::{CompileError, Result, SourcePos};
use crate::parser::{parse_module, IncludeKind};
use crate::preprocessor::{Definitions, Preprocessor};
use crate::program::{Program, RequisiteItem};
use crate::source::CharSource;
use crate::tokenizer::tokenize;
use rustc_hash::FxHashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the shared-modules folder consulted during
/// include resolution.
pub const LIBRARIES_ENV: &str = "ARGON_LIBRARIES";

const PRELUDE: &str = include_str!("prelude.argon");

pub struct CompileOptions {
    pub sources: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub emit_main: bool,
    pub requisites: Vec<String>,
}

impl CompileOptions {
    pub fn for_sources(sources: Vec<PathBuf>) -> Self {
        CompileOptions { sources, output: None, emit_main: true, requisites: Vec::new() }
    }
}

#[derive(Debug)]
pub struct CompiledOutput {
    pub header_path: PathBuf,
    pub implementation_path: PathBuf,
}

/// A failed compile, detached from its context: the offending file's name
/// and text are captured before the interner goes away so diagnostics can
/// still show an excerpt.
pub struct CompileFailure {
    pub error: CompileError,
    pub file: Option<String>,
    pub source_text: Option<String>,
}

impl CompileFailure {
    pub fn render(&self) -> String {
        self.error.render_with(self.file.as_deref(), self.source_text.as_deref())
    }

    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

pub struct CompileContext {
    pub program: Program,
    pub definitions: Definitions,
    include_paths: Vec<PathBuf>,
    included: FxHashSet<PathBuf>,
}

impl CompileContext {
    pub fn new() -> Self {
        let mut program = Program::new();
        program.bind_builtins();
        CompileContext {
            program,
            definitions: Definitions::default(),
            include_paths: Vec::new(),
            included: FxHashSet::default(),
        }
    }

    /// Runs the front half of the pipeline over an in-memory buffer.
    /// `is_main` nominates the buffer's first class as the launch class.
    pub fn process_source(&mut self, name: &str, text: &str, is_main: bool) -> Result<()> {
        let filepath = self.program.interner.intern(name);
        let source = CharSource::from_buffer(filepath, text);
        let tokens = tokenize(source, &mut self.program.interner)?;
        let tokens =
            Preprocessor::new(&mut self.definitions, &self.program.interner).process(tokens)?;
        let module = parse_module(tokens, &mut self.program.interner)?;

        if is_main && self.program.main_class_name.is_none() {
            self.program.main_class_name = module.first_class;
        }
        for template in module.templates {
            self.program.add_template(template);
        }
        for augment in module.augments {
            self.program.add_augment(augment);
        }
        self.program.requisites.extend(module.requisites);

        for include in module.includes {
            let path = self.resolve_include(&include.path, include.pos)?;
            match include.kind {
                IncludeKind::Source => {
                    if self.included.insert(path.clone()) {
                        let text = read_file(&path)?;
                        let name = path.to_string_lossy().to_string();
                        self.process_source(&name, &text, false)?;
                    }
                }
                IncludeKind::NativeHeader => {
                    self.program.native_headers.push(read_file(&path)?);
                }
                IncludeKind::NativeCode => {
                    self.program.native_code.push(read_file(&path)?);
                }
            }
        }
        Ok(())
    }

    pub fn process_file(&mut self, path: &Path, is_main: bool) -> Result<()> {
        let canonical = path.to_path_buf();
        if !self.included.insert(canonical.clone()) {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            let parent = parent.to_path_buf();
            if !self.include_paths.contains(&parent) {
                self.include_paths.push(parent);
            }
        }
        let text = read_file(path)?;
        let name = path.to_string_lossy().to_string();
        self.process_source(&name, &text, is_main)
    }

    fn resolve_include(&self, requested: &str, pos: SourcePos) -> Result<PathBuf> {
        let direct = PathBuf::from(requested);
        if direct.is_absolute() && direct.exists() {
            return Ok(direct);
        }
        for base in &self.include_paths {
            let candidate = base.join(requested);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        if let Ok(libraries) = std::env::var(LIBRARIES_ENV) {
            let candidate = PathBuf::from(libraries).join(requested);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(CompileError::new(
            crate::error::CompileErrorKind::Io(format!("cannot find include '{}'", requested)),
            Some(pos),
        ))
    }
}

impl Default for CompileContext {
    fn default() -> Self {
        Self::new()
    }
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| CompileError::io(format!("cannot read '{}': {}", path.display(), e)))
}

/// `Name[.name(T1,T2)]` from the command line.
fn parse_requisite(program: &mut Program, text: &str) -> RequisiteItem {
    match text.split_once('.') {
        Some((type_name, signature)) => {
            let signature = if signature.contains('(') {
                signature.to_string()
            } else {
                format!("{}()", signature)
            };
            RequisiteItem {
                type_name: program.interner.intern(type_name),
                signature: Some(program.interner.intern(&signature)),
                pos: SourcePos::default(),
            }
        }
        None => RequisiteItem {
            type_name: program.interner.intern(text),
            signature: None,
            pos: SourcePos::default(),
        },
    }
}

/// Full pipeline over in-memory source, returning the emitted C texts.
/// This is the seam the test suites drive.
pub fn compile_text(source: &str, emit_main: bool) -> Result<CTarget> {
    let mut program = analyze_text(source)?;
    emit_program(&mut program, "main.h", emit_main)
}

/// Front half of the pipeline over in-memory source: resolve and cull,
/// then hand back the program registry for inspection.
pub fn analyze_text(source: &str) -> Result<Program> {
    let mut context = CompileContext::new();
    context.process_source("<prelude>", PRELUDE, false)?;
    context.process_source("main.argon", source, true)?;
    context.program.resolve()?;
    context.program.cull();
    Ok(context.program)
}

/// Full pipeline over files; writes the header and implementation next to
/// the output base name (default: beside the first source). Failures come
/// back detached so the driver can render them after the context is gone.
pub fn compile_files(options: &CompileOptions) -> std::result::Result<CompiledOutput, CompileFailure> {
    let mut context = CompileContext::new();
    match run_pipeline(&mut context, options) {
        Ok(output) => Ok(output),
        Err(error) => {
            let file = error
                .pos
                .map(|p| context.program.interner.resolve(p.filepath).to_string());
            let source_text = file.as_ref().and_then(|f| fs::read_to_string(f).ok());
            Err(CompileFailure { error, file, source_text })
        }
    }
}

fn run_pipeline(context: &mut CompileContext, options: &CompileOptions) -> Result<CompiledOutput> {
    if options.sources.is_empty() {
        return Err(CompileError::io("no source files given"));
    }
    context.process_source("<prelude>", PRELUDE, false)?;
    for (index, source) in options.sources.iter().enumerate() {
        context.process_file(source, index == 0)?;
    }
    for requisite in &options.requisites {
        let item = parse_requisite(&mut context.program, requisite);
        context.program.requisites.push(item);
    }

    context.program.resolve()?;
    context.program.cull();

    let base = match &options.output {
        Some(output) => output.clone(),
        None => options.sources[0].with_extension(""),
    };
    let header_path = base.with_extension("h");
    let implementation_path = base.with_extension("c");
    let header_name = header_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "out.h".to_string());

    let target = emit_program(&mut context.program, &header_name, options.emit_main)?;

    fs::write(&header_path, &target.header)
        .map_err(|e| CompileError::io(format!("cannot write '{}': {}", header_path.display(), e)))?;
    fs::write(&implementation_path, &target.implementation).map_err(|e| {
        CompileError::io(format!("cannot write '{}': {}", implementation_path.display(), e))
    })?;

    Ok(CompiledOutput { header_path, implementation_path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_world_compiles_to_c() {
        let source = "class Hello\nMETHODS\nmethod init\nprintln \"hi\"\nendClass\n";
        let target = compile_text(source, true).expect("compile failed");
        assert!(target.implementation.contains("int main("));
        assert!(target.implementation.contains("Argon_string_from_utf8(\"hi\")"));
        assert!(target.header.contains("ArgonObject"));
    }

    #[test]
    fn prelude_alone_resolves() {
        let target = compile_text("class Empty\nMETHODS\nmethod init\nendClass\n", false)
            .expect("compile failed");
        assert!(!target.implementation.contains("int main("));
    }

    #[test]
    fn missing_source_is_io_error() {
        let options = CompileOptions::for_sources(vec![PathBuf::from("/no/such/file.argon")]);
        let failure = compile_files(&options).unwrap_err();
        assert_eq!(failure.exit_code(), 2);
    }

    #[test]
    fn requisite_spec_parses_both_forms() {
        let mut program = Program::new();
        let bare = parse_requisite(&mut program, "Widget");
        assert!(bare.signature.is_none());
        let with_signature = parse_requisite(&mut program, "Widget.update(Int)");
        assert_eq!(
            program.interner.resolve(with_signature.signature.unwrap()),
            "update(Int)"
        );
        let zero_arg = parse_requisite(&mut program, "Widget.update");
        assert_eq!(program.interner.resolve(zero_arg.signature.unwrap()), "update()");
    }
}
