//! Error taxonomy end-to-end: each class of failure carries the right
//! category, message, and exit code.

use argon::compile::{analyze_text, compile_text};
use argon::error::CompileErrorKind;

#[test]
fn ambiguous_overload_lists_both_candidates() {
    let source = "\
class Main
  ROUTINES
    routine f( a:Int, b:Real )
      local t = a
    routine f( a:Real, b:Int )
      local t = b
  METHODS
    method init
      f(1, 2)
endClass
";
    let error = compile_text(source, true).unwrap_err();
    assert_eq!(error.exit_code(), 1);
    match &error.kind {
        CompileErrorKind::Overload { message, candidates } => {
            assert!(message.contains("ambiguous"));
            assert!(candidates.iter().any(|c| c == "f(Int,Real)"), "{:?}", candidates);
            assert!(candidates.iter().any(|c| c == "f(Real,Int)"), "{:?}", candidates);
        }
        other => panic!("expected overload error, got {:?}", other),
    }
}

#[test]
fn no_matching_overload_reports_available() {
    let source = "\
class Main
  ROUTINES
    routine g( a:Logical )
      local t = a
  METHODS
    method init
      g(1.5)
endClass
";
    let error = compile_text(source, true).unwrap_err();
    assert!(error.message().contains("g(Logical)"), "{}", error.message());
}

#[test]
fn unterminated_class_is_a_syntax_error() {
    let error = compile_text("class Lost\nMETHODS\nmethod init\n", true).unwrap_err();
    assert!(matches!(error.kind, CompileErrorKind::Syntax(_)));
    assert!(error.message().contains("endClass"));
}

#[test]
fn undefined_type_is_a_template_error() {
    let source = "class Main\nMETHODS\nmethod init\nlocal x : Ghost = Ghost()\nendClass\n";
    let error = compile_text(source, true).unwrap_err();
    assert!(matches!(error.kind, CompileErrorKind::Template(_)));
    assert!(error.message().contains("Ghost"));
}

#[test]
fn cyclic_inheritance_is_a_type_error() {
    let source = "\
class A : B
endClass
class B : A
endClass
class Main : A
  METHODS
    method init
endClass
";
    let error = compile_text(source, true).unwrap_err();
    assert!(matches!(error.kind, CompileErrorKind::Type(_)));
    assert!(error.message().contains("cyclic"));
}

#[test]
fn specializer_arity_mismatch_is_a_template_error() {
    let source = "\
class Main
  METHODS
    method init
      local x : List<<Int,Int>> = List<<Int,Int>>()
endClass
";
    let error = compile_text(source, true).unwrap_err();
    assert!(matches!(error.kind, CompileErrorKind::Template(_)));
    assert!(error.message().contains("specializers"));
}

#[test]
fn escape_outside_loop_is_rejected() {
    let source = "class Main\nMETHODS\nmethod init\nescape\nendClass\n";
    let error = compile_text(source, true).unwrap_err();
    assert!(error.message().contains("escape"));
}

#[test]
fn assigning_incompatible_types_is_rejected() {
    let source = "class Main\nMETHODS\nmethod init\nlocal n : Int = 1\nn = \"text\"\nendClass\n";
    let error = compile_text(source, true).unwrap_err();
    assert!(matches!(error.kind, CompileErrorKind::Type(_)));
}

#[test]
fn property_narrowing_must_stay_compatible() {
    let source = "\
class Animal
endClass
class Rock
endClass
class Holder
  PROPERTIES
    item : Animal
endClass
class Narrowed : Holder
  PROPERTIES
    item : Rock
endClass
class Main : Narrowed
  METHODS
    method init
endClass
";
    let error = analyze_text(source).unwrap_err();
    assert!(matches!(error.kind, CompileErrorKind::Type(_)));
    assert!(error.message().contains("narrow"));
}

#[test]
fn recursive_macro_expansion_is_bounded() {
    let source = "\
class Main
  METHODS
    method forever [macro]
      forever
    method init
      forever
endClass
";
    let error = compile_text(source, true).unwrap_err();
    assert!(error.message().contains("macro"));
}
