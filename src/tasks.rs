//! Task lowering.
//!
//! A method that yields (or awaits) becomes three things:
//!
//! 1. a generated task class `Owner__name__Task` whose properties are the
//!    method's locals plus `ip`, `value`, and a `context` back-pointer;
//! 2. an `updateState` method on that class holding the body as an
//!    `ip`-dispatched state machine returning a tri-value
//!    (0 finished / 1 produced a value / 2 still running);
//! 3. the original method rewritten into a factory that constructs the
//!    task object.
//!
//! A public `update` method wraps `updateState`, advancing until a value
//! or completion, so iteration reads as `while task.update(): task.value`.
//!
//! Lowering runs on resolved bodies: `forEach` and `which` are already
//! plain loops and branches, so sectioning only has to understand
//! statement lists, `if`, and loops. Every section ends by either
//! returning a tri-value or storing the next `ip` and re-dispatching.

use crate::ast::Cmd;
use crate::error::{CompileError, Result, SourcePos};
use crate::intern::Symbol;
use crate::method::{MethodAttributes, Property, PropertyAttributes};
use crate::program::{MethodId, Program, TypeId};
use crate::resolve::cmd_contains_yield;

/// Tri-value returned by `updateState`.
const STATE_FINISHED: i32 = 0;
const STATE_VALUE: i32 = 1;
const STATE_RUNNING: i32 = 2;

/// `ip` parked past every section once the task finishes.
const DONE_IP: i32 = i32::MAX;

impl Program {
    /// Creates the public face of a task (its class, `update`,
    /// `updateState` stub, `init`, and properties for `ip`, `value`,
    /// `context`, and the parameters) before the body is lowered, so call
    /// sites can already type the factory's return.
    pub fn create_task_shell(&mut self, method_id: MethodId) -> Result<()> {
        if self.methods[method_id.index()].task_type.is_some() {
            return Ok(());
        }
        let pos = self.methods[method_id.index()].pos;
        let owner = self.methods[method_id.index()].owner;
        let is_routine = self.methods[method_id.index()].is_routine;

        let result_type = match self.methods[method_id.index()].task_result_type_name {
            Some(name) => {
                let id = self.resolve_type_name(pos, name)?;
                self.methods[method_id.index()].task_result_type = Some(id);
                Some(id)
            }
            None => None,
        };

        let task_name = format!(
            "{}__{}__Task",
            self.type_name(owner).to_string(),
            self.interner.resolve(self.methods[method_id.index()].name)
        );
        let task_sym = self.interner.intern(&task_name);
        let task_id = self.type_reference(pos, task_sym);
        {
            let object = self.type_object;
            let ty = &mut self.types[task_id.index()];
            ty.base_class = Some(object);
            ty.flat_base_types = vec![object];
            ty.defined = true;
            ty.organized = true;
            ty.resolved = true;
        }

        self.add_task_property(task_id, "ip", self.type_int, pos);
        if let Some(result) = result_type {
            self.add_task_property(task_id, "value", result, pos);
        }
        if !is_routine {
            self.add_task_property(task_id, "context", owner, pos);
        }
        let parameter_count = self.methods[method_id.index()].parameters.len();
        for i in 0..parameter_count {
            let local = self.methods[method_id.index()].locals[i].clone();
            let local_type = local.resolved_type.unwrap_or(self.type_object);
            let prop_name = self.task_local_property(local.name, i);
            let prop_text = self.interner.resolve(prop_name).to_string();
            self.add_task_property(task_id, &prop_text, local_type, pos);
        }

        // updateState stub: body arrives when the task body is lowered.
        let update_state = self.add_synthetic_method(
            task_id,
            "updateState",
            MethodAttributes::default(),
            false,
            pos,
        );
        self.methods[update_state.index()].return_type = Some(self.type_int);
        self.methods[update_state.index()].is_resolved = true;
        self.methods[update_state.index()].index = 0;
        self.types[task_id.index()].methods.push(update_state);

        // update: advance until a value lands or the task finishes.
        let update = self.add_synthetic_method(
            task_id,
            "update",
            MethodAttributes::default(),
            false,
            pos,
        );
        self.methods[update.index()].return_type = Some(self.type_logical);
        let state_name = self.interner.intern("state");
        let state_local = self.methods[update.index()].add_local(state_name, None, pos);
        self.methods[update.index()].locals[state_local].resolved_type = Some(self.type_int);
        self.methods[update.index()].statements = vec![Cmd::GenericLoop {
            pos,
            condition: None,
            increment: None,
            control_id: 1,
            statements: vec![
                Cmd::LocalDeclaration {
                    pos,
                    local_index: state_local,
                    initial: Some(Box::new(Cmd::CallStaticMethod {
                        pos,
                        context: Box::new(Cmd::This { pos, of_type: Some(task_id) }),
                        method: update_state,
                        args: Vec::new(),
                    })),
                },
                Cmd::If {
                    pos,
                    condition: Box::new(Cmd::CompareEq {
                        pos,
                        lhs: Box::new(Cmd::ReadLocal { pos, local_index: state_local }),
                        rhs: Box::new(Cmd::LiteralInteger { pos, value: STATE_VALUE }),
                    }),
                    then_statements: vec![Cmd::Return {
                        pos,
                        value: Some(Box::new(Cmd::LiteralLogical { pos, value: true })),
                    }],
                    else_statements: Vec::new(),
                },
                Cmd::If {
                    pos,
                    condition: Box::new(Cmd::CompareEq {
                        pos,
                        lhs: Box::new(Cmd::ReadLocal { pos, local_index: state_local }),
                        rhs: Box::new(Cmd::LiteralInteger { pos, value: STATE_FINISHED }),
                    }),
                    then_statements: vec![Cmd::Return {
                        pos,
                        value: Some(Box::new(Cmd::LiteralLogical { pos, value: false })),
                    }],
                    else_statements: Vec::new(),
                },
            ],
        }];
        self.methods[update.index()].control_count = 1;
        self.methods[update.index()].is_resolved = true;
        self.methods[update.index()].index = 1;
        self.types[task_id.index()].methods.push(update);

        // init: store the construction context and parameters.
        let init = self.add_synthetic_method(task_id, "init", MethodAttributes::default(), false, pos);
        let mut init_statements = Vec::new();
        let mut init_parameters = Vec::new();
        if !is_routine {
            init_parameters.push(("context".to_string(), owner));
        }
        for i in 0..parameter_count {
            let local = self.methods[method_id.index()].locals[i].clone();
            let prop_name = self.task_local_property(local.name, i);
            let text = self.interner.resolve(prop_name).to_string();
            init_parameters.push((text, local.resolved_type.unwrap_or(self.type_object)));
        }
        for (slot, (param_name, param_type)) in init_parameters.iter().enumerate() {
            let name_sym = self.interner.intern(param_name);
            let type_name_sym = self.types[param_type.index()].name;
            let local_index = self.methods[init.index()].add_local(name_sym, Some(type_name_sym), pos);
            self.methods[init.index()].locals[local_index].resolved_type = Some(*param_type);
            self.methods[init.index()].parameters.push(crate::method::Parameter {
                name: name_sym,
                declared_type: type_name_sym,
                resolved_type: Some(*param_type),
                default: None,
                pos,
            });
            init_statements.push(Cmd::WriteProperty {
                pos,
                context: Box::new(Cmd::This { pos, of_type: Some(task_id) }),
                owner: task_id,
                name: name_sym,
                value: Box::new(Cmd::ReadLocal { pos, local_index: slot }),
            });
        }
        self.methods[init.index()].min_args = init_parameters.len();
        self.methods[init.index()].statements = init_statements;
        let init_signature = self.methods[init.index()].clone().compute_signature(&mut self.interner);
        self.methods[init.index()].signature = init_signature;
        self.methods[init.index()].is_resolved = true;
        self.methods[init.index()].index = 2;
        self.types[task_id.index()].methods.push(init);

        self.methods[method_id.index()].task_type = Some(task_id);
        self.methods[method_id.index()].return_type = Some(task_id);
        Ok(())
    }

    fn add_task_property(&mut self, task: TypeId, name: &str, of_type: TypeId, pos: SourcePos) {
        let name_sym = self.interner.intern(name);
        if self.types[task.index()].find_property(name_sym).is_some() {
            return;
        }
        let declared = self.types[of_type.index()].name;
        self.types[task.index()].properties.push(Property {
            owner: task,
            name: name_sym,
            declared_type: declared,
            resolved_type: Some(of_type),
            attributes: PropertyAttributes::default(),
            initial_value: None,
            is_used: false,
            pos,
        });
    }

    /// Property name a method local maps to on the task object.
    fn task_local_property(&mut self, name: Symbol, index: usize) -> Symbol {
        let text = format!("{}_{}", self.interner.resolve(name), index);
        self.interner.intern(&text)
    }

    // =========================================================================
    // Lowering
    // =========================================================================

    /// Lowers every task method found after resolution settles.
    pub fn lower_tasks(&mut self) -> Result<()> {
        loop {
            let pending: Vec<MethodId> = self
                .methods
                .iter()
                .filter(|m| m.is_task)
                .map(|m| m.id)
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            for method_id in pending {
                self.lower_task(method_id)?;
            }
        }
    }

    fn lower_task(&mut self, method_id: MethodId) -> Result<()> {
        if self.methods[method_id.index()].attributes.is_native {
            return Err(CompileError::task_lowering(
                "a native method cannot yield",
                Some(self.methods[method_id.index()].pos),
            ));
        }
        self.create_task_shell(method_id)?;
        let task_id = self.methods[method_id.index()].task_type.unwrap();
        let pos = self.methods[method_id.index()].pos;
        let is_routine = self.methods[method_id.index()].is_routine;

        // Every local becomes a task property.
        let locals = self.methods[method_id.index()].locals.clone();
        let mut local_properties = Vec::with_capacity(locals.len());
        for local in &locals {
            let prop = self.task_local_property(local.name, local.index);
            let text = self.interner.resolve(prop).to_string();
            self.add_task_property(
                task_id,
                &text,
                local.resolved_type.unwrap_or(self.type_object),
                local.pos,
            );
            local_properties.push(prop);
        }

        let statements = std::mem::take(&mut self.methods[method_id.index()].statements);
        let context_prop = self.interner.intern("context");
        let value_prop = self.interner.intern("value");
        let owner = self.methods[method_id.index()].owner;

        let mut builder = TaskBuilder {
            program: self,
            origin: method_id,
            task_id,
            pos,
            local_properties,
            context_prop,
            value_prop,
            owner,
            is_routine,
            sections: Vec::new(),
            current: Vec::new(),
            await_count: 0,
        };
        builder.lower_body(statements)?;
        let sections = builder.finish();

        let update_state = self.types[task_id.index()].methods[0];
        self.methods[update_state.index()].statements =
            vec![Cmd::TaskControl { pos, sections }];

        // The original method becomes a factory.
        let init = *self.types[task_id.index()].methods.last().unwrap();
        let mut args = Vec::new();
        if !is_routine {
            args.push(Cmd::This { pos, of_type: Some(owner) });
        }
        let parameter_count = self.methods[method_id.index()].parameters.len();
        for i in 0..parameter_count {
            args.push(Cmd::ReadLocal { pos, local_index: i });
        }
        self.methods[method_id.index()].statements = vec![Cmd::Return {
            pos,
            value: Some(Box::new(Cmd::CreateObject {
                pos,
                of_type: task_id,
                init: Some(init),
                args,
            })),
        }];
        self.methods[method_id.index()].is_task = false;
        Ok(())
    }
}

// =============================================================================
// Section builder
// =============================================================================

struct TaskBuilder<'p> {
    program: &'p mut Program,
    origin: MethodId,
    task_id: TypeId,
    pos: SourcePos,
    local_properties: Vec<Symbol>,
    context_prop: Symbol,
    value_prop: Symbol,
    owner: TypeId,
    is_routine: bool,
    sections: Vec<Cmd>,
    current: Vec<Cmd>,
    await_count: usize,
}

impl<'p> TaskBuilder<'p> {
    fn this(&self, pos: SourcePos) -> Cmd {
        Cmd::This { pos, of_type: Some(self.task_id) }
    }

    fn set_ip(&self, pos: SourcePos, target: usize) -> Cmd {
        self.set_ip_raw(pos, target as i32)
    }

    fn set_ip_raw(&self, pos: SourcePos, target: i32) -> Cmd {
        Cmd::WriteProperty {
            pos,
            context: Box::new(self.this(pos)),
            owner: self.task_id,
            name: self.program.interner.lookup("ip").unwrap_or_default(),
            value: Box::new(Cmd::LiteralInteger { pos, value: target }),
        }
    }

    fn return_state(&self, pos: SourcePos, state: i32) -> Cmd {
        Cmd::Return { pos, value: Some(Box::new(Cmd::LiteralInteger { pos, value: state })) }
    }

    /// `continue;` in the emitted dispatch loop: jump to the section named
    /// by the freshly stored `ip`.
    fn redispatch(&self, pos: SourcePos) -> Cmd {
        Cmd::NextIteration { pos, control_id: 0 }
    }

    fn current_section_index(&self) -> usize {
        self.sections.len()
    }

    /// Seals the current section and opens the next one.
    fn seal_section(&mut self, pos: SourcePos) {
        let statements = std::mem::take(&mut self.current);
        let ip = self.sections.len();
        self.sections.push(Cmd::TaskControlSection { pos, ip, statements });
    }

    fn lower_body(&mut self, statements: Vec<Cmd>) -> Result<()> {
        self.lower_statements(statements)
    }


    fn finish(mut self) -> Vec<Cmd> {
        let pos = self.pos;
        let state = self.return_state(pos, STATE_FINISHED);
        self.current.push(state);
        self.seal_section(pos);
        self.sections
    }

    /// Lowers a statement list in order. Escapes aimed at a sectioned loop
    /// are retargeted once that loop's exit section is known.
    fn lower_statements(&mut self, statements: Vec<Cmd>) -> Result<()> {
        for statement in statements {
            self.lower_statement(statement)?;
        }
        Ok(())
    }

    fn lower_statement(&mut self, statement: Cmd) -> Result<()> {
        match statement {
            Cmd::Yield { pos, value } => {
                if let Some(value) = value {
                    let rewritten = self.rewrite(*value);
                    self.current.push(Cmd::WriteProperty {
                        pos,
                        context: Box::new(self.this(pos)),
                        owner: self.task_id,
                        name: self.value_prop,
                        value: Box::new(rewritten),
                    });
                }
                let next = self.current_section_index() + 1;
                self.current.push(self.set_ip(pos, next));
                self.current.push(self.return_state(pos, STATE_VALUE));
                self.seal_section(pos);
                Ok(())
            }

            Cmd::Await { pos, value } => {
                let awaited_type = match crate::resolve::cmd_type(
                    &value,
                    self.program,
                    self.program.method(self.origin),
                ) {
                    Some(t) => t,
                    None => {
                        return Err(CompileError::task_lowering(
                            "awaited expression has no value",
                            Some(pos),
                        ))
                    }
                };
                let awaited = self.rewrite(*value);
                let update_state = self
                    .program
                    .find_method_by_signature_str(awaited_type, "updateState()")
                    .ok_or_else(|| {
                        CompileError::task_lowering(
                            "only a task object can be awaited",
                            Some(pos),
                        )
                    })?;

                self.await_count += 1;
                let prop = format!("awaited_{}", self.await_count);
                self.program.add_task_property(self.task_id, &prop, awaited_type, pos);
                let prop_sym = self.program.interner.intern(&prop);

                self.current.push(Cmd::WriteProperty {
                    pos,
                    context: Box::new(self.this(pos)),
                    owner: self.task_id,
                    name: prop_sym,
                    value: Box::new(awaited),
                });
                let wait_section = self.current_section_index() + 1;
                self.current.push(self.set_ip(pos, wait_section));
                self.current.push(self.return_state(pos, STATE_RUNNING));
                self.seal_section(pos);

                // Wait section: step the subtask once per resumption.
                let sub_call = Cmd::CallStaticMethod {
                    pos,
                    context: Box::new(Cmd::ReadProperty {
                        pos,
                        context: Box::new(self.this(pos)),
                        owner: self.task_id,
                        name: prop_sym,
                    }),
                    method: update_state,
                    args: Vec::new(),
                };
                self.current.push(Cmd::If {
                    pos,
                    condition: Box::new(Cmd::CompareNe {
                        pos,
                        lhs: Box::new(sub_call),
                        rhs: Box::new(Cmd::LiteralInteger { pos, value: STATE_FINISHED }),
                    }),
                    then_statements: vec![
                        self.set_ip(pos, wait_section),
                        self.return_state(pos, STATE_RUNNING),
                    ],
                    else_statements: Vec::new(),
                });
                Ok(())
            }

            Cmd::Return { pos, .. } => {
                self.current.push(self.set_ip_raw(pos, DONE_IP));
                self.current.push(self.return_state(pos, STATE_FINISHED));
                Ok(())
            }

            Cmd::Block { statements, .. } => self.lower_statements(statements),

            Cmd::If { pos, condition, then_statements, else_statements }
                if statements_yield(&then_statements) || statements_yield(&else_statements) =>
            {
                let condition = self.rewrite(*condition);
                // The branch bodies become their own section runs; the
                // header jumps into whichever applies.
                let else_marker = Cmd::LiteralNull { pos };
                self.current.push(Cmd::If {
                    pos,
                    condition: Box::new(condition),
                    then_statements: Vec::new(),
                    else_statements: vec![else_marker],
                });
                // Patch below once section indices are known: replace the
                // placeholder If with explicit transitions.
                let header_slot = self.current.len() - 1;
                self.seal_section(pos);
                let then_start = self.current_section_index();
                self.lower_statements(then_statements)?;
                let then_jump_slot = self.current.len();
                self.current.push(Cmd::LiteralNull { pos });
                self.current.push(self.redispatch(pos));
                self.seal_section(pos);
                let else_start = self.current_section_index();
                self.lower_statements(else_statements)?;
                let else_jump_slot = self.current.len();
                self.current.push(Cmd::LiteralNull { pos });
                self.current.push(self.redispatch(pos));
                self.seal_section(pos);
                let join = self.current_section_index();

                // Backpatch the header and the two join jumps.
                let then_transition = vec![self.set_ip(pos, then_start), self.redispatch(pos)];
                let else_transition = vec![self.set_ip(pos, else_start), self.redispatch(pos)];
                if let Cmd::TaskControlSection { statements, .. } =
                    &mut self.sections[then_start - 1]
                {
                    statements[header_slot] = Cmd::If {
                        pos,
                        condition: match statements[header_slot].clone() {
                            Cmd::If { condition, .. } => condition,
                            _ => Box::new(Cmd::LiteralLogical { pos, value: true }),
                        },
                        then_statements: then_transition,
                        else_statements: else_transition,
                    };
                }
                let then_jump = self.set_ip(pos, join);
                if let Cmd::TaskControlSection { statements, .. } =
                    &mut self.sections[else_start - 1]
                {
                    statements[then_jump_slot] = then_jump;
                }
                let else_jump = self.set_ip(pos, join);
                if let Cmd::TaskControlSection { statements, .. } = &mut self.sections[join - 1] {
                    statements[else_jump_slot] = else_jump;
                }
                Ok(())
            }

            Cmd::GenericLoop { pos, condition, increment, statements, control_id }
                if statements_yield(&statements) =>
            {
                // Close the running section so the loop head starts fresh.
                let head = self.current_section_index() + 1;
                self.current.push(self.set_ip(pos, head));
                self.current.push(self.redispatch(pos));
                self.seal_section(pos);

                // Head section: test, then run the body inline; the exit
                // index is only known once the body is lowered, so the
                // test is patched afterwards.
                let test_slot = self.current.len();
                self.current.push(Cmd::LiteralNull { pos });

                self.lower_statements(statements)?;
                self.seal_section(pos);

                // Increment section: the `nextIteration` target.
                let incr_section = self.current_section_index();
                if let Some(increment) = increment {
                    let increment = self.rewrite(*increment);
                    self.current.push(increment);
                }
                self.current.push(self.set_ip(pos, head));
                self.current.push(self.redispatch(pos));
                self.seal_section(pos);
                let exit = self.current_section_index();

                // Patch the head test, then retarget this loop's escape
                // and nextIteration statements at any nesting depth.
                let condition_cmd = match condition {
                    Some(c) => self.rewrite(*c),
                    None => Cmd::LiteralLogical { pos, value: true },
                };
                let guard = Cmd::If {
                    pos,
                    condition: Box::new(Cmd::LogicalNot {
                        pos,
                        operand: Box::new(condition_cmd),
                    }),
                    then_statements: vec![self.set_ip(pos, exit), self.redispatch(pos)],
                    else_statements: Vec::new(),
                };
                let ip_name = self.program.interner.lookup("ip").unwrap_or_default();
                let targets = LoopTargets { control_id, head: incr_section, exit, ip_name };
                let task_id = self.task_id;
                for section_index in head..exit {
                    if let Cmd::TaskControlSection { statements, .. } =
                        &mut self.sections[section_index]
                    {
                        if section_index == head {
                            statements[test_slot] = guard.clone();
                        }
                        for statement in statements.iter_mut() {
                            retarget_loop_controls(statement, &targets, task_id);
                        }
                    }
                }
                Ok(())
            }

            other if cmd_contains_yield(&other) => Err(CompileError::task_lowering(
                "'yield' is only supported in plain statements, ifs, and loops",
                Some(other.pos()),
            )),

            other => {
                let rewritten = self.rewrite(other);
                self.current.push(rewritten);
                Ok(())
            }
        }
    }

    /// Rewrites local references into task-property references, and the
    /// original `this` into the stored context.
    fn rewrite(&mut self, cmd: Cmd) -> Cmd {
        rewrite_cmd(
            cmd,
            &RewriteContext {
                task_id: self.task_id,
                owner: self.owner,
                is_routine: self.is_routine,
                context_prop: self.context_prop,
                local_properties: &self.local_properties,
            },
        )
    }
}

fn statements_yield(statements: &[Cmd]) -> bool {
    statements.iter().any(cmd_contains_yield)
}

struct LoopTargets {
    control_id: usize,
    /// `nextIteration` target: the increment section.
    head: usize,
    exit: usize,
    ip_name: Symbol,
}

/// Rewrites `escape`/`nextIteration` aimed at the lowered loop into ip
/// transitions, however deeply they sit inside emitted statements. Inner
/// loops that were not sectioned keep their own control ids and stay
/// untouched.
fn retarget_loop_controls(statement: &mut Cmd, targets: &LoopTargets, task_id: TypeId) {
    let transition = |pos: SourcePos, section: usize| Cmd::Block {
        pos,
        statements: vec![
            Cmd::WriteProperty {
                pos,
                context: Box::new(Cmd::This { pos, of_type: Some(task_id) }),
                owner: task_id,
                name: targets.ip_name,
                value: Box::new(Cmd::LiteralInteger { pos, value: section as i32 }),
            },
            Cmd::NextIteration { pos, control_id: 0 },
        ],
    };
    match statement {
        Cmd::Escape { pos, control_id } if *control_id == targets.control_id => {
            *statement = transition(*pos, targets.exit);
        }
        Cmd::NextIteration { pos, control_id } if *control_id == targets.control_id => {
            *statement = transition(*pos, targets.head);
        }
        Cmd::If { then_statements, else_statements, .. } => {
            for s in then_statements.iter_mut().chain(else_statements.iter_mut()) {
                retarget_loop_controls(s, targets, task_id);
            }
        }
        Cmd::Block { statements, .. } => {
            for s in statements.iter_mut() {
                retarget_loop_controls(s, targets, task_id);
            }
        }
        Cmd::GenericLoop { statements, .. } => {
            for s in statements.iter_mut() {
                retarget_loop_controls(s, targets, task_id);
            }
        }
        Cmd::Which { cases, others, .. } => {
            for case in cases.iter_mut() {
                for s in case.statements.iter_mut() {
                    retarget_loop_controls(s, targets, task_id);
                }
            }
            for s in others.iter_mut() {
                retarget_loop_controls(s, targets, task_id);
            }
        }
        Cmd::Switch { cases, others, .. } => {
            for case in cases.iter_mut() {
                for s in case.statements.iter_mut() {
                    retarget_loop_controls(s, targets, task_id);
                }
            }
            for s in others.iter_mut() {
                retarget_loop_controls(s, targets, task_id);
            }
        }
        _ => {}
    }
}

// =============================================================================
// Local-to-property rewriting
// =============================================================================

struct RewriteContext<'a> {
    task_id: TypeId,
    owner: TypeId,
    is_routine: bool,
    context_prop: Symbol,
    local_properties: &'a [Symbol],
}

fn rewrite_box(cmd: Box<Cmd>, ctx: &RewriteContext<'_>) -> Box<Cmd> {
    Box::new(rewrite_cmd(*cmd, ctx))
}

fn rewrite_vec(cmds: Vec<Cmd>, ctx: &RewriteContext<'_>) -> Vec<Cmd> {
    cmds.into_iter().map(|c| rewrite_cmd(c, ctx)).collect()
}

fn rewrite_opt(cmd: Option<Box<Cmd>>, ctx: &RewriteContext<'_>) -> Option<Box<Cmd>> {
    cmd.map(|c| rewrite_box(c, ctx))
}

fn task_this(pos: SourcePos, ctx: &RewriteContext<'_>) -> Box<Cmd> {
    Box::new(Cmd::This { pos, of_type: Some(ctx.task_id) })
}

fn rewrite_cmd(cmd: Cmd, ctx: &RewriteContext<'_>) -> Cmd {
    use Cmd::*;
    match cmd {
        ReadLocal { pos, local_index } => ReadProperty {
            pos,
            context: task_this(pos, ctx),
            owner: ctx.task_id,
            name: ctx.local_properties[local_index],
        },
        WriteLocal { pos, local_index, value } => WriteProperty {
            pos,
            context: task_this(pos, ctx),
            owner: ctx.task_id,
            name: ctx.local_properties[local_index],
            value: rewrite_box(value, ctx),
        },
        AdjustLocal { pos, local_index, delta } => AdjustProperty {
            pos,
            context: task_this(pos, ctx),
            owner: ctx.task_id,
            name: ctx.local_properties[local_index],
            delta,
        },
        LocalOpWithAssign { pos, local_index, op, value } => OpAssignProperty {
            pos,
            context: task_this(pos, ctx),
            owner: ctx.task_id,
            name: ctx.local_properties[local_index],
            op,
            value: rewrite_box(value, ctx),
        },
        LocalDeclaration { pos, local_index, initial } => match initial {
            Some(value) => WriteProperty {
                pos,
                context: task_this(pos, ctx),
                owner: ctx.task_id,
                name: ctx.local_properties[local_index],
                value: rewrite_box(value, ctx),
            },
            None => Block { pos, statements: Vec::new() },
        },
        This { pos, .. } => {
            if ctx.is_routine {
                This { pos, of_type: Some(ctx.owner) }
            } else {
                ReadProperty {
                    pos,
                    context: task_this(pos, ctx),
                    owner: ctx.task_id,
                    name: ctx.context_prop,
                }
            }
        }

        // Structural recursion over everything that carries children.
        ReadProperty { pos, context, owner, name } => {
            ReadProperty { pos, context: rewrite_box(context, ctx), owner, name }
        }
        WriteProperty { pos, context, owner, name, value } => WriteProperty {
            pos,
            context: rewrite_box(context, ctx),
            owner,
            name,
            value: rewrite_box(value, ctx),
        },
        OpAssignProperty { pos, context, owner, name, op, value } => OpAssignProperty {
            pos,
            context: rewrite_box(context, ctx),
            owner,
            name,
            op,
            value: rewrite_box(value, ctx),
        },
        AdjustProperty { pos, context, owner, name, delta } => AdjustProperty {
            pos,
            context: rewrite_box(context, ctx),
            owner,
            name,
            delta,
        },
        ReadGlobal { .. } | ReadSingleton { .. } | LiteralInteger { .. } | LiteralLong { .. }
        | LiteralReal { .. } | LiteralCharacter { .. } | LiteralLogical { .. }
        | LiteralString { .. } | LiteralNull { .. } | DefaultValue { .. } | NativeCode { .. }
        | Label { .. } | Prior { .. } => cmd,
        WriteGlobal { pos, owner, name, value } => {
            WriteGlobal { pos, owner, name, value: rewrite_box(value, ctx) }
        }
        OpAssignGlobal { pos, owner, name, op, value } => {
            OpAssignGlobal { pos, owner, name, op, value: rewrite_box(value, ctx) }
        }
        ReadArrayElement { pos, array, index } => ReadArrayElement {
            pos,
            array: rewrite_box(array, ctx),
            index: rewrite_box(index, ctx),
        },
        ReadArrayCount { pos, array } => ReadArrayCount { pos, array: rewrite_box(array, ctx) },
        WriteArrayElement { pos, array, index, value } => WriteArrayElement {
            pos,
            array: rewrite_box(array, ctx),
            index: rewrite_box(index, ctx),
            value: rewrite_box(value, ctx),
        },
        CreateCompound { pos, of_type, args } => {
            CreateCompound { pos, of_type, args: rewrite_vec(args, ctx) }
        }
        CreateArray { pos, element_type, count } => {
            CreateArray { pos, element_type, count: rewrite_box(count, ctx) }
        }
        CreateOptionalValue { pos, of_type, value } => {
            CreateOptionalValue { pos, of_type, value: rewrite_opt(value, ctx) }
        }
        CreateObject { pos, of_type, init, args } => {
            CreateObject { pos, of_type, init, args: rewrite_vec(args, ctx) }
        }
        CreateCallback { pos, context, method } => {
            CreateCallback { pos, context: rewrite_opt(context, ctx), method }
        }
        Add { pos, lhs, rhs } => {
            Add { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        Subtract { pos, lhs, rhs } => {
            Subtract { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        Multiply { pos, lhs, rhs } => {
            Multiply { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        Divide { pos, lhs, rhs } => {
            Divide { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        Mod { pos, lhs, rhs } => {
            Mod { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        Power { pos, lhs, rhs } => {
            Power { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        BitwiseXor { pos, lhs, rhs } => {
            BitwiseXor { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        BitwiseOr { pos, lhs, rhs } => {
            BitwiseOr { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        BitwiseAnd { pos, lhs, rhs } => {
            BitwiseAnd { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        ShiftLeft { pos, lhs, rhs } => {
            ShiftLeft { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        ShiftRight { pos, lhs, rhs } => {
            ShiftRight { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        ShiftRightX { pos, lhs, rhs } => {
            ShiftRightX { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        BitwiseNot { pos, operand } => BitwiseNot { pos, operand: rewrite_box(operand, ctx) },
        Negate { pos, operand } => Negate { pos, operand: rewrite_box(operand, ctx) },
        Logicalize { pos, operand } => Logicalize { pos, operand: rewrite_box(operand, ctx) },
        LogicalNot { pos, operand } => LogicalNot { pos, operand: rewrite_box(operand, ctx) },
        LogicalOr { pos, lhs, rhs } => {
            LogicalOr { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        LogicalAnd { pos, lhs, rhs } => {
            LogicalAnd { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        LogicalXor { pos, lhs, rhs } => {
            LogicalXor { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        CompareEq { pos, lhs, rhs } => {
            CompareEq { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        CompareNe { pos, lhs, rhs } => {
            CompareNe { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        CompareLt { pos, lhs, rhs } => {
            CompareLt { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        CompareLe { pos, lhs, rhs } => {
            CompareLe { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        CompareGt { pos, lhs, rhs } => {
            CompareGt { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        CompareGe { pos, lhs, rhs } => {
            CompareGe { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        CompareIs { pos, lhs, rhs } => {
            CompareIs { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        CompareIsNot { pos, lhs, rhs } => {
            CompareIsNot { pos, lhs: rewrite_box(lhs, ctx), rhs: rewrite_box(rhs, ctx) }
        }
        InstanceOf { pos, operand, of_type_name, of_type } => InstanceOf {
            pos,
            operand: rewrite_box(operand, ctx),
            of_type_name,
            of_type,
        },
        NotInstanceOf { pos, operand, of_type_name, of_type } => NotInstanceOf {
            pos,
            operand: rewrite_box(operand, ctx),
            of_type_name,
            of_type,
        },
        CastToType { pos, operand, of_type } => {
            CastToType { pos, operand: rewrite_box(operand, ctx), of_type }
        }
        As { pos, operand, of_type_name, of_type } => As {
            pos,
            operand: rewrite_box(operand, ctx),
            of_type_name,
            of_type,
        },
        ConvertToType { pos, operand, of_type } => {
            ConvertToType { pos, operand: rewrite_box(operand, ctx), of_type }
        }
        ConvertToPrimitiveType { pos, operand, of_type } => {
            ConvertToPrimitiveType { pos, operand: rewrite_box(operand, ctx), of_type }
        }
        Range { pos, low, high } => {
            Range { pos, low: rewrite_box(low, ctx), high: rewrite_box(high, ctx) }
        }
        RangeUpTo { pos, low, high } => {
            RangeUpTo { pos, low: rewrite_box(low, ctx), high: rewrite_box(high, ctx) }
        }
        RangeDownTo { pos, low, high } => {
            RangeDownTo { pos, low: rewrite_box(low, ctx), high: rewrite_box(high, ctx) }
        }
        If { pos, condition, then_statements, else_statements } => If {
            pos,
            condition: rewrite_box(condition, ctx),
            then_statements: rewrite_vec(then_statements, ctx),
            else_statements: rewrite_vec(else_statements, ctx),
        },
        Switch { pos, subject, cases, others } => Switch {
            pos,
            subject: rewrite_box(subject, ctx),
            cases: cases
                .into_iter()
                .map(|c| crate::ast::SwitchCase {
                    pos: c.pos,
                    value: rewrite_cmd(c.value, ctx),
                    statements: rewrite_vec(c.statements, ctx),
                })
                .collect(),
            others: rewrite_vec(others, ctx),
        },
        Contingent { pos, statements, satisfied, unsatisfied, control_id } => Contingent {
            pos,
            statements: rewrite_vec(statements, ctx),
            satisfied: rewrite_vec(satisfied, ctx),
            unsatisfied: rewrite_vec(unsatisfied, ctx),
            control_id,
        },
        Try { pos, statements, catches } => Try {
            pos,
            statements: rewrite_vec(statements, ctx),
            catches: catches
                .into_iter()
                .map(|c| crate::ast::CatchClause {
                    pos: c.pos,
                    name: c.name,
                    local_index: c.local_index,
                    catch_type: c.catch_type,
                    resolved_type: c.resolved_type,
                    statements: rewrite_vec(c.statements, ctx),
                })
                .collect(),
        },
        Throw { pos, value } => Throw { pos, value: rewrite_box(value, ctx) },
        GenericLoop { pos, condition, increment, statements, control_id } => GenericLoop {
            pos,
            condition: rewrite_opt(condition, ctx),
            increment: rewrite_opt(increment, ctx),
            statements: rewrite_vec(statements, ctx),
            control_id,
        },
        Block { pos, statements } => Block { pos, statements: rewrite_vec(statements, ctx) },
        Return { pos, value } => Return { pos, value: rewrite_opt(value, ctx) },
        Trace { pos, text, value } => Trace { pos, text, value: rewrite_opt(value, ctx) },
        CallRoutine { pos, owner, method, args } => {
            CallRoutine { pos, owner, method, args: rewrite_vec(args, ctx) }
        }
        CallStaticMethod { pos, context, method, args } => CallStaticMethod {
            pos,
            context: rewrite_box(context, ctx),
            method,
            args: rewrite_vec(args, ctx),
        },
        CallDynamicMethod { pos, context, method, args } => CallDynamicMethod {
            pos,
            context: rewrite_box(context, ctx),
            method,
            args: rewrite_vec(args, ctx),
        },
        CallAspectMethod { pos, context, method, args } => CallAspectMethod {
            pos,
            context: rewrite_box(context, ctx),
            method,
            args: rewrite_vec(args, ctx),
        },
        CallNativeRoutine { pos, owner, method, args } => {
            CallNativeRoutine { pos, owner, method, args: rewrite_vec(args, ctx) }
        }
        CallInlineNativeRoutine { pos, owner, method, args } => {
            CallInlineNativeRoutine { pos, owner, method, args: rewrite_vec(args, ctx) }
        }
        CallNativeMethod { pos, context, method, args } => CallNativeMethod {
            pos,
            context: rewrite_box(context, ctx),
            method,
            args: rewrite_vec(args, ctx),
        },
        CallInlineNativeMethod { pos, context, method, args } => CallInlineNativeMethod {
            pos,
            context: rewrite_box(context, ctx),
            method,
            args: rewrite_vec(args, ctx),
        },
        CallPriorMethod { pos, method, args } => {
            CallPriorMethod { pos, method, args: rewrite_vec(args, ctx) }
        }
        FormattedString { pos, format, parts } => {
            FormattedString { pos, format, parts: rewrite_vec(parts, ctx) }
        }
        // Shapes resolution has already eliminated, plus the task nodes
        // themselves, pass through untouched.
        other => other,
    }
}
