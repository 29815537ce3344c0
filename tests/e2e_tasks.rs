//! Task lowering end-to-end: `yields` methods become generated task
//! classes with an `ip`-dispatched state machine, and the original method
//! becomes a factory.

use argon::compile::{analyze_text, compile_text};

const COUNTER: &str = "\
class Counter
  METHODS
    method counter( n:Int ) yields Int
      forEach i in 1..n
        yield i
      endForEach
endClass
class Main
  METHODS
    method init
      forEach value in Counter().counter(3)
        println value.toString
      endForEach
endClass
";

#[test]
fn task_method_grows_a_state_machine() {
    let target = compile_text(COUNTER, true).expect("compile failed");
    assert!(
        target.implementation.contains("switch (this_->p_ip)"),
        "ip dispatch missing:\n{}",
        target.implementation
    );
    assert!(target.header.contains("struct t_Counter__counter__Task {"));
    assert!(target.header.contains("p_ip;"));
    assert!(target.header.contains("p_value;"));
}

#[test]
fn task_factory_replaces_the_original_body() {
    let target = compile_text(COUNTER, true).expect("compile failed");
    // The factory allocates the task object and hands it to init.
    assert!(target.implementation.contains("Counter__counter__Task"));
    assert!(
        target.implementation.contains("f_Counter__counter__Task__init"),
        "task init missing:\n{}",
        target.implementation
    );
}

#[test]
fn task_locals_become_properties() {
    let program = analyze_text(COUNTER).expect("analyze failed");
    let task_name = program.interner.lookup("Counter__counter__Task").unwrap();
    let task_id = program.find_type(task_name).unwrap();
    let task = &program.types[task_id.index()];
    let names: Vec<&str> = task
        .properties
        .iter()
        .map(|p| program.interner.resolve(p.name))
        .collect();
    assert!(names.contains(&"ip"));
    assert!(names.contains(&"value"));
    assert!(names.contains(&"context"));
    assert!(names.contains(&"n_0"), "parameter not promoted: {:?}", names);
    assert!(names.iter().any(|n| n.starts_with("i_")), "loop counter not promoted");
}

#[test]
fn task_exposes_update_protocol() {
    let program = analyze_text(COUNTER).expect("analyze failed");
    let task_name = program.interner.lookup("Counter__counter__Task").unwrap();
    let task_id = program.find_type(task_name).unwrap();
    assert!(program.find_method_by_signature_str(task_id, "update()").is_some());
    assert!(program.find_method_by_signature_str(task_id, "updateState()").is_some());
}

#[test]
fn yield_sections_store_value_then_suspend() {
    let target = compile_text(COUNTER, true).expect("compile failed");
    // The yield writes the produced value, parks ip, and reports
    // "produced a value".
    assert!(target.implementation.contains("p_value ="));
    assert!(target.implementation.contains("return 1;"));
    assert!(target.implementation.contains("return 0;"));
}

#[test]
fn yield_in_native_method_is_rejected() {
    let source = "\
class Broken
  METHODS
    method bad yields Int [native]
      yield 1
endClass
class Main
  METHODS
    method init
      Broken().bad
endClass
";
    let error = compile_text(source, true).unwrap_err();
    assert_eq!(error.label(), "task error");
}

#[test]
fn await_drives_a_subtask() {
    let source = "\
class Jobs
  METHODS
    method inner yields Int
      yield 1

    method outer yields Int
      await inner
      yield 2
endClass
class Main
  METHODS
    method init
      forEach v in Jobs().outer
        println v.toString
      endForEach
endClass
";
    let target = compile_text(source, true).expect("compile failed");
    assert!(
        target.header.contains("p_awaited_1;"),
        "awaited subtask not promoted:\n{}",
        target.header
    );
    // Awaiting reports "still running" until the subtask finishes.
    assert!(target.implementation.contains("return 2;"));
}
