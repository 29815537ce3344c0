//! End-to-end pipeline tests: literal Argon source in, emitted C out.
//!
//! These assert on the structure of the generated header and
//! implementation (runtime preamble, struct layouts, vtable dispatch,
//! literal pool) rather than running a C toolchain.

use argon::compile::compile_text;

#[test]
fn hello_world_emits_runtime_and_main() {
    let source = "class Hello METHODS method init println \"hi\" endClass";
    let target = compile_text(source, true).expect("compile failed");

    assert!(target.header.contains("ArgonObject *next_object"), "object header missing");
    assert!(target.implementation.contains("int main("), "main wrapper missing");
    assert!(
        target.implementation.contains("Argon_string_from_utf8(\"hi\")"),
        "literal pool entry missing:\n{}",
        target.implementation
    );
    assert!(
        target.implementation.contains("Argon_println_string"),
        "println splice missing"
    );
    assert!(target.implementation.contains("Argon_launch"));
}

#[test]
fn integer_overflow_promotes_to_long_literal() {
    let source = "class Main\nMETHODS\nmethod init\nlocal big : Long = 3000000000\nprintln big.toString\nendClass\n";
    let target = compile_text(source, true).expect("compile failed");
    assert!(
        target.implementation.contains("INT64_C(3000000000)"),
        "long literal not emitted:\n{}",
        target.implementation
    );
    assert!(target.implementation.contains("Argon_int64_to_string"));
}

#[test]
fn dynamic_dispatch_goes_through_the_table() {
    let source = "\
class A
  METHODS
    method speak
      println \"A\"
endClass
class B : A
  METHODS
    method speak
      println \"B\"
endClass
class Main
  METHODS
    method init
      local a : A = B()
      a.speak
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(
        target.implementation.contains("Argon_dispatch["),
        "dynamic call not table-based:\n{}",
        target.implementation
    );
    assert!(target.implementation.contains("dispatch_base"));
    // Both implementations survive the cull: the call may land on either.
    assert!(target.implementation.contains("f_A__speak"));
    assert!(target.implementation.contains("f_B__speak"));
}

#[test]
fn augment_injects_method_into_string() {
    let source = "\
augment String
  METHODS
    method shout -> String
      return this + \"!\"
endAugment
class Main
  METHODS
    method init
      println \"hi\".shout
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(
        target.implementation.contains("f_String__shout"),
        "augmented method missing:\n{}",
        target.implementation
    );
    assert!(target.implementation.contains("Argon_string_plus_string"));
}

#[test]
fn class_struct_starts_with_object_header() {
    let source = "\
class Point
  PROPERTIES
    x : Int
    y : Int
  METHODS
    method init( x0:Int, y0:Int )
      x = x0
      y = y0
endClass
class Main
  METHODS
    method init
      local p = Point(3, 4)
      println p.x.toString
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(target.header.contains("struct t_Point {"));
    let struct_start = target.header.find("struct t_Point {").unwrap();
    let after = &target.header[struct_start..];
    let header_field = after.find("ArgonObject header;").unwrap();
    let x_field = after.find("p_x;").unwrap();
    assert!(header_field < x_field, "object header must come first");
}

#[test]
fn compound_is_a_plain_value_struct() {
    let source = "\
compound Vec2
  PROPERTIES
    x : Real
    y : Real
endCompound
class Main
  METHODS
    method init
      local v = Vec2(1.0, 2.0)
      println v.x.toString
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(target.header.contains("typedef struct t_Vec2 {"));
    let struct_start = target.header.find("typedef struct t_Vec2 {").unwrap();
    let struct_end = target.header[struct_start..].find('}').unwrap();
    let body = &target.header[struct_start..struct_start + struct_end];
    assert!(!body.contains("ArgonObject header"), "compounds carry no header");
}

#[test]
fn optional_is_value_plus_exists_flag() {
    let source = "\
class Main
  METHODS
    method init
      local maybe : Int? = Int?(5)
      if maybe
        println \"set\"
      endIf
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(target.header.contains("typedef struct t_Intq {"));
    assert!(target.header.contains("ArgonLogical exists;"));
    assert!(target.implementation.contains(".exists"));
}

#[test]
fn list_literal_chains_through_add() {
    let source = "\
class Main
  METHODS
    method init
      local values = [1, 2, 3]
      println values.count.toString
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(
        target.implementation.contains("f_List_Int__add"),
        "list add missing:\n{}",
        target.implementation
    );
    assert!(target.header.contains("struct t_List_Int {"));
}

#[test]
fn for_each_over_range_compiles_to_counted_loop() {
    let source = "\
class Main
  METHODS
    method init
      local total = 0
      forEach i in 1..10
        total += i
      endForEach
      println total.toString
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(target.implementation.contains("for (;"));
    assert!(target.implementation.contains("l_total_"));
}

#[test]
fn which_lowers_to_if_chain() {
    let source = "\
class Main
  METHODS
    method init( )
      local n = 3
      which n
        case 1, 2
          println \"low\"
        others
          println \"high\"
      endWhich
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(target.implementation.contains("_which_"));
    assert!(target.implementation.contains("if ("));
}

#[test]
fn try_catch_uses_runtime_frames() {
    let source = "\
class Main
  METHODS
    method init
      try
        throw Exception(\"boom\")
      catch err : Exception
        println err.message
      endTry
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(target.implementation.contains("setjmp"));
    assert!(target.implementation.contains("Argon_throw"));
    assert!(target.implementation.contains("Argon_instance_of(Argon_thrown"));
}

#[test]
fn contingent_emits_goto_sections() {
    let source = "\
class Main
  METHODS
    method init
      local n = 4
      contingent
        necessary n > 0
        sufficient n > 100
        println \"checking\"
      satisfied
        println \"ok\"
      unsatisfied
        println \"bad\"
      endContingent
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(target.implementation.contains("_cont_sat_"));
    assert!(target.implementation.contains("_cont_unsat_"));
    assert!(target.implementation.contains("goto"));
}

#[test]
fn native_code_statement_splices_markers() {
    let source = "\
class Main
  PROPERTIES
    count : Int
  METHODS
    method init
      native \"$this->p_count = 42;\"
      println count.toString
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(
        target.implementation.contains("this_->p_count = 42;"),
        "native splice failed:\n{}",
        target.implementation
    );
}

#[test]
fn literal_strings_are_pooled_once() {
    let source = "\
class Main
  METHODS
    method init
      println \"same\"
      println \"same\"
      println \"different\"
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    let occurrences = target
        .implementation
        .matches("Argon_string_from_utf8(\"same\")")
        .count();
    assert_eq!(occurrences, 1, "duplicate literal not pooled");
}

#[test]
fn emitted_runtime_carries_slab_and_gc() {
    let target = compile_text("class Main METHODS method init endClass", true).unwrap();
    assert!(target.implementation.contains("ARGON_PAGE_SIZE"));
    assert!(target.implementation.contains("Argon_gc"));
    assert!(target.implementation.contains("~obj->object_size"));
    assert!(target.implementation.contains("memmove"));
}
