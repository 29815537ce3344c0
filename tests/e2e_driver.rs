//! Driver-level tests: file I/O, include resolution, preprocessor
//! directives across the whole pipeline, and output placement.

use argon::compile::{compile_files, CompileOptions};
use std::fs;
use tempfile::TempDir;

fn write_source(dir: &TempDir, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).expect("write source");
    path
}

#[test]
fn compiles_files_and_places_outputs() {
    let dir = TempDir::new().unwrap();
    let main = write_source(
        &dir,
        "hello.argon",
        "class Hello METHODS method init println \"hi\" endClass",
    );

    let mut options = CompileOptions::for_sources(vec![main]);
    options.emit_main = true;
    let output = compile_files(&options).unwrap_or_else(|f| panic!("{}", f.render()));

    assert!(output.header_path.ends_with("hello.h"));
    assert!(output.implementation_path.ends_with("hello.c"));
    let header = fs::read_to_string(&output.header_path).unwrap();
    let implementation = fs::read_to_string(&output.implementation_path).unwrap();
    assert!(header.contains("ArgonObject"));
    assert!(implementation.contains("int main("));
}

#[test]
fn output_flag_redirects_the_base_name() {
    let dir = TempDir::new().unwrap();
    let main = write_source(
        &dir,
        "app.argon",
        "class App METHODS method init println \"app\" endClass",
    );

    let mut options = CompileOptions::for_sources(vec![main]);
    options.output = Some(dir.path().join("build/out"));
    fs::create_dir_all(dir.path().join("build")).unwrap();
    let output = compile_files(&options).unwrap_or_else(|f| panic!("{}", f.render()));
    assert!(output.header_path.ends_with("build/out.h"));
    assert!(output.implementation_path.ends_with("build/out.c"));
}

#[test]
fn include_splices_a_sibling_module() {
    let dir = TempDir::new().unwrap();
    write_source(
        &dir,
        "helper.argon",
        "class Helper\nMETHODS\nmethod init\nmethod shout\nprintln \"helper\"\nendClass\n",
    );
    let main = write_source(
        &dir,
        "main.argon",
        "$include \"helper.argon\"\nclass Main\nMETHODS\nmethod init\nHelper().shout\nendClass\n",
    );

    let options = CompileOptions::for_sources(vec![main]);
    let output = compile_files(&options).unwrap_or_else(|f| panic!("{}", f.render()));
    let implementation = fs::read_to_string(&output.implementation_path).unwrap();
    assert!(implementation.contains("f_Helper__shout"));
}

#[test]
fn missing_include_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let main = write_source(
        &dir,
        "main.argon",
        "$include \"nowhere.argon\"\nclass Main\nMETHODS\nmethod init\nendClass\n",
    );

    let options = CompileOptions::for_sources(vec![main]);
    let failure = compile_files(&options).unwrap_err();
    assert_eq!(failure.exit_code(), 2);
    assert!(failure.error.message().contains("nowhere.argon"));
}

#[test]
fn include_native_header_passes_text_through() {
    let dir = TempDir::new().unwrap();
    write_source(&dir, "extra.h", "/* extra native header */\n");
    let main = write_source(
        &dir,
        "main.argon",
        "$includeNativeHeader \"extra.h\"\nclass Main\nMETHODS\nmethod init\nendClass\n",
    );

    let options = CompileOptions::for_sources(vec![main]);
    let output = compile_files(&options).unwrap_or_else(|f| panic!("{}", f.render()));
    let header = fs::read_to_string(&output.header_path).unwrap();
    assert!(header.contains("/* extra native header */"));
}

#[test]
fn preprocessor_definitions_span_the_whole_compile() {
    let dir = TempDir::new().unwrap();
    let main = write_source(
        &dir,
        "main.argon",
        "$define LIMIT 99\nclass Main\nMETHODS\nmethod init\nlocal n = LIMIT\nprintln n.toString\nendClass\n",
    );

    let options = CompileOptions::for_sources(vec![main]);
    let output = compile_files(&options).unwrap_or_else(|f| panic!("{}", f.render()));
    let implementation = fs::read_to_string(&output.implementation_path).unwrap();
    assert!(implementation.contains("99"));
}

#[test]
fn conditional_compilation_drops_dead_branches() {
    let dir = TempDir::new().unwrap();
    let main = write_source(
        &dir,
        "main.argon",
        "$define FANCY true\nclass Main\nMETHODS\nmethod init\n$if FANCY\nprintln \"fancy\"\n$else\nprintln \"plain\"\n$endIf\nendClass\n",
    );

    let options = CompileOptions::for_sources(vec![main]);
    let output = compile_files(&options).unwrap_or_else(|f| panic!("{}", f.render()));
    let implementation = fs::read_to_string(&output.implementation_path).unwrap();
    assert!(implementation.contains("Argon_string_from_utf8(\"fancy\")"));
    assert!(!implementation.contains("Argon_string_from_utf8(\"plain\")"));
}

#[test]
fn cli_requisite_pins_extra_roots() {
    let dir = TempDir::new().unwrap();
    let main = write_source(
        &dir,
        "main.argon",
        "class Main\nMETHODS\nmethod init\nprintln \"go\"\nendClass\nclass Extra\nMETHODS\nmethod init\nmethod ping\nprintln \"ping\"\nendClass\n",
    );

    // Without the pin, Extra is culled entirely.
    let options = CompileOptions::for_sources(vec![main.clone()]);
    let output = compile_files(&options).unwrap_or_else(|f| panic!("{}", f.render()));
    let implementation = fs::read_to_string(&output.implementation_path).unwrap();
    assert!(!implementation.contains("f_Extra__ping"));

    let mut options = CompileOptions::for_sources(vec![main]);
    options.requisites.push("Extra".to_string());
    let output = compile_files(&options).unwrap_or_else(|f| panic!("{}", f.render()));
    let implementation = fs::read_to_string(&output.implementation_path).unwrap();
    assert!(implementation.contains("f_Extra__ping"));
}
