//! Structural invariants over the resolved program registry.

use argon::compile::analyze_text;
use argon::program::Program;

fn type_id(program: &Program, name: &str) -> argon::TypeId {
    let sym = program.interner.lookup(name).expect("type name not interned");
    program.find_type(sym).expect("type not registered")
}

const HIERARCHY: &str = "\
aspect Drawable
  METHODS
    method draw
      println \"drawable\"
endAspect
class Shape
  METHODS
    method area -> Int
      return 0
endClass
class Circle : Shape, Drawable
  METHODS
    method area -> Int
      return 3
endClass
class Square : Shape, Drawable
  METHODS
    method area -> Int
      return 4
endClass
class Main
  METHODS
    method init
      local s : Shape = Circle()
      println s.area.toString
      local d : Drawable = Square()
      d.draw
endClass
";

#[test]
fn instance_of_follows_ancestry_one_way() {
    let program = analyze_text(HIERARCHY).expect("analyze failed");
    let circle = type_id(&program, "Circle");
    let shape = type_id(&program, "Shape");
    let drawable = type_id(&program, "Drawable");
    let square = type_id(&program, "Square");

    assert!(program.instance_of(circle, shape));
    assert!(program.instance_of(circle, drawable));
    assert!(program.instance_of(circle, circle));
    assert!(!program.instance_of(shape, circle));
    assert!(!program.instance_of(circle, square));

    // Every ancestor relation holds for the whole flat list.
    for &ancestor in &program.types[circle.index()].flat_base_types {
        assert!(program.instance_of(circle, ancestor));
        if ancestor != circle {
            assert!(!program.instance_of(ancestor, circle) || ancestor == circle);
        }
    }
}

#[test]
fn flat_base_types_are_deduplicated() {
    let program = analyze_text(HIERARCHY).expect("analyze failed");
    let circle = type_id(&program, "Circle");
    let flat = &program.types[circle.index()].flat_base_types;
    let mut seen = std::collections::HashSet::new();
    for base in flat {
        assert!(seen.insert(*base), "duplicate ancestor in flat list");
    }
}

#[test]
fn override_shares_signature_and_derives_owner() {
    let program = analyze_text(HIERARCHY).expect("analyze failed");
    for method in &program.methods {
        if let Some(base) = method.overridden {
            let base_method = &program.methods[base.index()];
            assert_eq!(
                method.signature, base_method.signature,
                "override changed signature"
            );
            assert!(
                program.instance_of(method.owner, base_method.owner),
                "override owner does not derive from base owner"
            );
            assert!(
                base_method.overriding.contains(&method.id),
                "base does not know its override"
            );
        }
    }
}

#[test]
fn aspect_records_its_incorporators() {
    let program = analyze_text(HIERARCHY).expect("analyze failed");
    let drawable = type_id(&program, "Drawable");
    let circle = type_id(&program, "Circle");
    let square = type_id(&program, "Square");
    let incorporators = &program.types[drawable.index()].incorporating_classes;
    assert!(incorporators.contains(&circle));
    assert!(incorporators.contains(&square));
}

#[test]
fn literal_string_table_round_trips() {
    let source = "\
class Main
  METHODS
    method init
      println \"alpha\"
      println \"beta\"
      println \"alpha\"
endClass
";
    let program = analyze_text(source).expect("analyze failed");
    for (text, &index) in &program.literal_string_lookup {
        assert_eq!(&program.literal_strings[index], text);
    }
    assert_eq!(program.literal_string_lookup.len(), program.literal_strings.len());
}

#[test]
fn culling_is_monotonic_over_static_calls() {
    let source = "\
class Main
  METHODS
    method init
      first
    method first
      second
    method second
      println \"deep\"
    method unreachable
      println \"never\"
endClass
";
    let program = analyze_text(source).expect("analyze failed");
    let main = type_id(&program, "Main");
    let mut used = std::collections::HashMap::new();
    for method in &program.methods {
        if method.owner != main {
            continue;
        }
        let name = program.interner.resolve(method.name).to_string();
        used.entry(name).or_insert(method.is_used);
    }
    assert_eq!(used.get("init"), Some(&true));
    assert_eq!(used.get("first"), Some(&true));
    assert_eq!(used.get("second"), Some(&true));
    assert_eq!(used.get("unreachable"), Some(&false));

    // Monotonicity: every statically-called method of a used method is
    // itself used.
    for method in &program.methods {
        if !method.is_used {
            continue;
        }
        for statement in &method.statements {
            if let argon::ast::Cmd::CallStaticMethod { method: callee, .. } = statement {
                assert!(program.methods[callee.index()].is_used);
            }
        }
    }
}

#[test]
fn requisite_pins_survive_the_cull() {
    let source = "\
$requisite Keeper
class Keeper
  METHODS
    method touch
      println \"kept\"
endClass
class Main
  METHODS
    method init
      println \"go\"
endClass
";
    let program = analyze_text(source).expect("analyze failed");
    let keeper = type_id(&program, "Keeper");
    assert!(program.types[keeper.index()].is_used);
    let touched = program
        .find_method_by_signature_str(keeper, "touch()")
        .expect("touch missing");
    assert!(program.methods[touched.index()].is_used);
}

#[test]
fn tokenizer_integer_round_trip_at_boundaries() {
    use argon::intern::Interner;
    use argon::source::CharSource;
    use argon::token::{Payload, TokenKind};
    use argon::tokenizer::tokenize;

    let mut interner = Interner::new();
    let file = interner.intern("round.argon");

    for value in [0i32, 1, 41, i32::MAX] {
        let text = value.to_string();
        let tokens = tokenize(CharSource::from_buffer(file, &text), &mut interner).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::LiteralInteger);
        assert_eq!(tokens[0].payload, Payload::Integer(value));
    }
    for value in [i32::MAX as i64 + 1, i64::MAX] {
        let text = value.to_string();
        let tokens = tokenize(CharSource::from_buffer(file, &text), &mut interner).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::LiteralLong);
        assert_eq!(tokens[0].payload, Payload::Long(value));
    }
}
