//! The Argon compiler.
//!
//! Argon is a statically-typed, object-oriented systems language that
//! compiles to portable C. This crate is its front-end and code
//! generator: tokenizer, preprocessor, recursive-descent parser, template
//! instantiation, multi-pass semantic resolution with overload and
//! operator dispatch, task lowering to explicit state machines, used-code
//! culling, and a C emitter whose output carries its own runtime (object
//! model, tracing collector, slab allocator).
//!
//! The [`compile`] module is the public seam: [`compile::compile_text`]
//! for in-memory pipelines and [`compile::compile_files`] for the CLI.

pub mod ast;
pub mod cli;
pub mod codegen_c;
pub mod compile;
pub mod cull;
pub mod diagnostic;
pub mod error;
pub mod intern;
pub mod method;
pub mod parser;
pub mod preprocessor;
pub mod program;
pub mod resolve;
pub mod scope;
pub mod source;
pub mod style;
pub mod tasks;
pub mod template;
pub mod token;
pub mod tokenizer;
pub mod types;

pub use compile::{compile_files, compile_text, CompileContext, CompileOptions};
pub use error::{CompileError, CompileErrorKind, Result, SourcePos};
pub use intern::{Interner, Symbol};
pub use program::{MethodId, Program, TypeId};
