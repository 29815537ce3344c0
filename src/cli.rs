//! The `argonc` command line.
//!
//! `argonc [flags] source-files...` compiles to a C header and
//! implementation next to the output base name. Exit codes: 0 success,
//! 1 compile error, 2 I/O error, 3 internal error.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::Command;

use crate::codegen_c::is_known_target;
use crate::compile::{compile_files, CompileFailure, CompileOptions};
use crate::diagnostic::Diagnostic;

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum MessageFormat {
    Human,
    Json,
}

#[derive(Parser)]
#[command(name = "argonc")]
#[command(about = "The Argon compiler", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Output base name; the header and implementation are written next
    /// to it.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Code-emission target.
    #[arg(long, default_value = "c")]
    pub target: String,

    /// Wrap emission with a `main` entry that calls `on_launch`.
    #[arg(long)]
    pub main: bool,

    /// After emission, chain to the target's build tool with these
    /// arguments.
    #[arg(long)]
    pub execute: Option<String>,

    /// Pin a type or method as a cull root: `Name[.signature]`.
    #[arg(long = "requisite")]
    pub requisites: Vec<String>,

    /// Diagnostic rendering.
    #[arg(long, value_enum, default_value = "human")]
    pub message_format: MessageFormat,

    /// Argon source files; the first one's directory joins the include
    /// search path and its first class seeds `on_launch`.
    pub sources: Vec<PathBuf>,
}

/// Entry point; returns the process exit code.
pub fn run_cli() -> i32 {
    let cli = Cli::parse();

    if !is_known_target(&cli.target) {
        eprintln!("error: unknown target '{}'", cli.target);
        return 1;
    }
    if cli.sources.is_empty() {
        eprintln!("error: no source files given");
        return 1;
    }

    let options = CompileOptions {
        sources: cli.sources.clone(),
        output: cli.output.clone(),
        emit_main: cli.main,
        requisites: cli.requisites.clone(),
    };

    let output = match compile_files(&options) {
        Ok(output) => output,
        Err(failure) => {
            report(&failure, cli.message_format);
            return failure.exit_code();
        }
    };

    if let Some(arguments) = &cli.execute {
        return execute_build_tool(&output.implementation_path, arguments);
    }
    0
}

/// Chains to the C toolchain after a successful emission.
fn execute_build_tool(implementation: &PathBuf, arguments: &str) -> i32 {
    let mut command = Command::new("cc");
    command.arg(implementation);
    for argument in arguments.split_whitespace() {
        command.arg(argument);
    }
    match command.status() {
        Ok(status) if status.success() => 0,
        Ok(status) => status.code().unwrap_or(2),
        Err(error) => {
            eprintln!("error: cannot run build tool: {}", error);
            2
        }
    }
}

fn report(failure: &CompileFailure, format: MessageFormat) {
    match format {
        MessageFormat::Json => {
            println!("{}", Diagnostic::from_failure(failure).to_json());
        }
        MessageFormat::Human => {
            eprintln!("{}", failure.render());
        }
    }
}
