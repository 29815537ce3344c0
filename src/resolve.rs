//! Semantic resolution.
//!
//! [`Program::resolve`] drives a fixed point: organize every referenced
//! type, then give each method body a resolution pass; bodies can pull in
//! new template instantiations, whose methods join the queue, until
//! nothing transitions.
//!
//! Within a body, every [`Cmd`] gets the chance to rewrite itself into a
//! more specific node. `Access` is the heart: local read, property read,
//! global read, constant, constructor, or one of the call flavors chosen
//! through [`CandidateMethods`]. Operators fold literals, pick a primitive
//! op on the common numeric type, or fall back to a user `operator+`-style
//! method. `forEach`, `which`, list literals, formatted strings, and
//! function literals desugar here into nodes the emitter knows.

use crate::ast::{CatchClause, Cmd, WhichCase};
use crate::error::{CompileError, Result, SourcePos};
use crate::intern::Symbol;
use crate::method::{Method, MethodAttributes};
use crate::program::{MethodId, Program, TypeId};
use crate::scope::{
    resolve_parameter_types, CandidateMethods, ControlEntry, ControlKind, Scope,
};
use crate::token::TokenKind;

/// Macro bodies inlining macro bodies stop here.
const MAX_MACRO_DEPTH: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq)]
enum RangeKind {
    Inclusive,
    UpTo,
    DownTo,
}

impl Program {
    /// Runs semantic resolution to a fixed point, then lowers tasks.
    pub fn resolve(&mut self) -> Result<()> {
        if self.on_launch.is_none() {
            let owner = self.type_object;
            let id = self.add_synthetic_method(
                owner,
                "on_launch",
                MethodAttributes::default(),
                true,
                SourcePos::default(),
            );
            if let Some(main) = self.main_class_name {
                self.method_mut(id).statements = vec![Cmd::Access {
                    pos: SourcePos::default(),
                    context: None,
                    name: main,
                    args: Some(Vec::new()),
                }];
            }
            self.on_launch = Some(id);
        }

        for requisite in self.requisites.clone() {
            self.type_reference(requisite.pos, requisite.type_name);
        }

        loop {
            let mut progress = false;

            let mut t = 0;
            while t < self.types.len() {
                let id = TypeId(t as u32);
                if !self.types[t].organized {
                    self.define_type(id)?;
                    if !self.types[t].organized {
                        self.organize_type(id, &mut Vec::new())?;
                    }
                    progress = true;
                }
                if self.types[t].organized && !self.types[t].resolved {
                    self.resolve_type_members(id)?;
                    progress = true;
                }
                t += 1;
            }

            let mut m = 0;
            while m < self.methods.len() {
                let id = MethodId(m as u32);
                // Declared tasks get their public shell (task class,
                // update/init, factory return type) before anything can
                // call them.
                if self.methods[m].task_result_type_name.is_some()
                    && self.methods[m].task_type.is_none()
                {
                    self.create_task_shell(id)?;
                    progress = true;
                }
                if !self.methods[m].is_resolved {
                    self.resolve_method(id)?;
                    progress = true;
                }
                m += 1;
            }

            if !progress {
                break;
            }
        }

        self.lower_tasks()
    }

    /// Resolves member types of an organized type: property and global
    /// declared types, narrowing legality, and the hidden defaults method
    /// holding property initializers.
    fn resolve_type_members(&mut self, id: TypeId) -> Result<()> {
        let property_count = self.types[id.index()].properties.len();
        for i in 0..property_count {
            if self.types[id.index()].properties[i].resolved_type.is_some() {
                continue;
            }
            let name = self.types[id.index()].properties[i].declared_type;
            let pos = self.types[id.index()].properties[i].pos;
            let property_type = self.resolve_type_name(pos, name)?;
            self.types[id.index()].properties[i].resolved_type = Some(property_type);
        }
        let global_count = self.types[id.index()].globals.len();
        for i in 0..global_count {
            if self.types[id.index()].globals[i].resolved_type.is_some() {
                continue;
            }
            let name = self.types[id.index()].globals[i].declared_type;
            let pos = self.types[id.index()].globals[i].pos;
            let global_type = self.resolve_type_name(pos, name)?;
            self.types[id.index()].globals[i].resolved_type = Some(global_type);
        }

        for (old_name, new_name, pos) in self.types[id.index()].narrowings.clone() {
            let old_type = self.resolve_type_name(pos, old_name)?;
            let new_type = self.resolve_type_name(pos, new_name)?;
            if !self.instance_of(new_type, old_type) {
                return Err(CompileError::type_error(
                    format!(
                        "property redeclared as '{}', which does not narrow '{}'",
                        self.type_name(new_type),
                        self.type_name(old_type)
                    ),
                    Some(pos),
                ));
            }
        }

        // Gather property initializers into a hidden per-type method; the
        // emitter runs it right after allocation.
        if self.types[id.index()].defaults_method.is_none() {
            let initialized: Vec<(Symbol, Cmd, SourcePos)> = self.types[id.index()]
                .properties
                .iter()
                .filter_map(|p| p.initial_value.clone().map(|v| (p.name, v, p.pos)))
                .collect();
            let eligible = !self.types[id.index()].attributes.is_aspect()
                && !self.types[id.index()].attributes.is_value_type()
                && !self.types[id.index()].attributes.is_array;
            if !initialized.is_empty() && eligible {
                let method_id = self.add_synthetic_method(
                    id,
                    "init_defaults",
                    MethodAttributes::default(),
                    false,
                    self.types[id.index()].pos,
                );
                let statements: Vec<Cmd> = initialized
                    .into_iter()
                    .map(|(name, value, pos)| Cmd::Assign {
                        pos,
                        target: Box::new(Cmd::Access { pos, context: None, name, args: None }),
                        value: Box::new(value),
                    })
                    .collect();
                self.method_mut(method_id).statements = statements;
                self.types[id.index()].defaults_method = Some(method_id);
            }
        }

        // Global initializers live in a hidden routine the launcher runs.
        if self.types[id.index()].globals_method.is_none() {
            let initialized: Vec<(Symbol, Cmd, SourcePos)> = self.types[id.index()]
                .globals
                .iter()
                .filter_map(|g| g.initial_value.clone().map(|v| (g.name, v, g.pos)))
                .collect();
            if !initialized.is_empty() {
                let method_id = self.add_synthetic_method(
                    id,
                    "init_globals",
                    MethodAttributes::default(),
                    true,
                    self.types[id.index()].pos,
                );
                let statements: Vec<Cmd> = initialized
                    .into_iter()
                    .map(|(name, value, pos)| Cmd::Assign {
                        pos,
                        target: Box::new(Cmd::Access { pos, context: None, name, args: None }),
                        value: Box::new(value),
                    })
                    .collect();
                self.method_mut(method_id).statements = statements;
                self.types[id.index()].globals_method = Some(method_id);
            }
        }

        self.types[id.index()].resolved = true;
        Ok(())
    }

    fn resolve_method(&mut self, id: MethodId) -> Result<()> {
        resolve_parameter_types(self, id)?;
        if let Some(name) = self.methods[id.index()].task_result_type_name {
            if self.methods[id.index()].task_result_type.is_none() {
                let pos = self.methods[id.index()].pos;
                let task_type = self.resolve_type_name(pos, name)?;
                self.methods[id.index()].task_result_type = Some(task_type);
            }
        }

        let is_macro = self.methods[id.index()].attributes.is_macro;
        let is_native = self.methods[id.index()].attributes.is_native;
        let owner_is_aspect = {
            let owner = self.methods[id.index()].owner;
            self.types[owner.index()].attributes.is_aspect()
        };
        if is_macro || owner_is_aspect {
            // Macro bodies are cloned and substituted at every call site.
            // Aspect bodies resolve as the copies incorporated into each
            // class, where the full member surface is visible; the
            // original stays unresolved.
            self.methods[id.index()].is_resolved = true;
            return Ok(());
        }
        if is_native {
            if body_contains_yield(&self.methods[id.index()].statements) {
                return Err(CompileError::task_lowering(
                    "a native method cannot yield",
                    Some(self.methods[id.index()].pos),
                ));
            }
            self.methods[id.index()].is_resolved = true;
            return Ok(());
        }

        let owner = self.methods[id.index()].owner;
        let parameter_count = self.methods[id.index()].parameters.len();
        let mut statements = std::mem::take(&mut self.methods[id.index()].statements);

        let mut resolver = Resolver {
            program: self,
            method: id,
            scope: Scope::new(owner, id),
            macro_depth: 0,
            macro_bindings: Vec::new(),
        };
        for i in 0..parameter_count {
            resolver.scope.push_local(i);
        }
        let outcome = resolver.resolve_statements(&mut statements);

        self.methods[id.index()].statements = statements;
        self.methods[id.index()].is_resolved = true;
        outcome
    }

    /// Defines and organizes the named type in one step.
    pub fn resolve_type_name(&mut self, pos: SourcePos, name: Symbol) -> Result<TypeId> {
        let id = self.type_reference(pos, name);
        self.define_type(id)?;
        self.organize_type(id, &mut Vec::new())?;
        Ok(id)
    }
}

fn body_contains_yield(statements: &[Cmd]) -> bool {
    statements.iter().any(cmd_contains_yield)
}

/// Shallow-ish scan for `yield`/`await` anywhere below a statement; used
/// for task detection before lowering.
pub fn cmd_contains_yield(cmd: &Cmd) -> bool {
    match cmd {
        Cmd::Yield { .. } | Cmd::Await { .. } => true,
        Cmd::If { condition, then_statements, else_statements, .. } => {
            cmd_contains_yield(condition)
                || body_contains_yield(then_statements)
                || body_contains_yield(else_statements)
        }
        Cmd::GenericLoop { statements, .. } => body_contains_yield(statements),
        Cmd::ForEach { statements, .. } => body_contains_yield(statements),
        Cmd::Block { statements, .. } => body_contains_yield(statements),
        Cmd::Which { cases, others, .. } => {
            cases.iter().any(|c| body_contains_yield(&c.statements)) || body_contains_yield(others)
        }
        Cmd::Switch { cases, others, .. } => {
            cases.iter().any(|c| body_contains_yield(&c.statements)) || body_contains_yield(others)
        }
        Cmd::Try { statements, catches, .. } => {
            body_contains_yield(statements)
                || catches.iter().any(|c| body_contains_yield(&c.statements))
        }
        Cmd::Contingent { statements, satisfied, unsatisfied, .. } => {
            body_contains_yield(statements)
                || body_contains_yield(satisfied)
                || body_contains_yield(unsatisfied)
        }
        _ => false,
    }
}

// =============================================================================
// Resolver
// =============================================================================

pub struct Resolver<'p> {
    pub program: &'p mut Program,
    pub method: MethodId,
    pub scope: Scope,
    macro_depth: usize,
    /// Parameter-name → argument bindings for macro inlining, innermost
    /// frame last.
    macro_bindings: Vec<rustc_hash::FxHashMap<Symbol, Cmd>>,
}

impl<'p> Resolver<'p> {
    fn pos_err<T>(&self, pos: SourcePos, message: impl Into<String>) -> Result<T> {
        Err(CompileError::type_error(message, Some(pos)))
    }

    fn method_ref(&self) -> &Method {
        self.program.method(self.method)
    }

    /// Allocates a hidden local on the current method.
    fn add_hidden_local(&mut self, base: &str, of_type: Option<TypeId>, pos: SourcePos) -> usize {
        let count = self.program.method(self.method).locals.len();
        let name = self.program.interner.intern(&format!("_{}_{}", base, count));
        let index = self.program.method_mut(self.method).add_local(name, None, pos);
        self.program.method_mut(self.method).locals[index].resolved_type = of_type;
        self.scope.push_local(index);
        index
    }

    fn next_control_id(&mut self) -> usize {
        let method = self.program.method_mut(self.method);
        method.control_count += 1;
        method.control_count
    }

    pub fn resolve_statements(&mut self, statements: &mut Vec<Cmd>) -> Result<()> {
        let depth = self.scope.local_depth();
        for slot in statements.iter_mut() {
            let cmd = std::mem::replace(slot, Cmd::LiteralNull { pos: SourcePos::default() });
            *slot = self.resolve_cmd(cmd)?;
        }
        self.scope.pop_locals_to(depth);
        Ok(())
    }

    fn resolve_boxed(&mut self, cmd: &mut Box<Cmd>) -> Result<()> {
        let inner = std::mem::replace(cmd.as_mut(), Cmd::LiteralNull { pos: SourcePos::default() });
        **cmd = self.resolve_cmd(inner)?;
        Ok(())
    }

    /// Type of a resolved node, in the current method's context.
    fn type_of(&self, cmd: &Cmd) -> Option<TypeId> {
        cmd_type(cmd, self.program, self.method_ref())
    }

    pub fn resolve_cmd(&mut self, cmd: Cmd) -> Result<Cmd> {
        match cmd {
            // ----------------------------------------------------------------
            // Literals
            // ----------------------------------------------------------------
            Cmd::LiteralString { pos, value, .. } => {
                let index = self.program.literal_string_index(&value);
                Ok(Cmd::LiteralString { pos, value, index: Some(index) })
            }
            cmd @ (Cmd::LiteralInteger { .. }
            | Cmd::LiteralLong { .. }
            | Cmd::LiteralReal { .. }
            | Cmd::LiteralCharacter { .. }
            | Cmd::LiteralLogical { .. }
            | Cmd::LiteralNull { .. }
            | Cmd::NativeCode { .. }
            | Cmd::Label { .. }
            | Cmd::DefaultValue { .. }) => Ok(cmd),

            Cmd::This { pos, .. } => {
                if self.method_ref().is_routine {
                    return self.pos_err(pos, "'this' is not available in a routine");
                }
                Ok(Cmd::This { pos, of_type: Some(self.scope.this_type) })
            }
            Cmd::Prior { pos } => {
                self.pos_err(pos, "'prior' can only introduce a call to the overridden method")
            }

            Cmd::FormattedString { pos, format, parts } => self.resolve_formatted(pos, format, parts),

            Cmd::CreateList { pos, args } => self.resolve_list_literal(pos, args),

            Cmd::CreateCompoundLiteral { pos, .. } => self.pos_err(
                pos,
                "a compound literal needs a declared compound type on the target",
            ),

            Cmd::CreateFunction { pos, parameters, return_type, statements } => {
                self.resolve_function_literal(pos, parameters, return_type, statements)
            }

            // ----------------------------------------------------------------
            // Access
            // ----------------------------------------------------------------
            Cmd::Access { pos, context, name, args } => {
                self.resolve_access(pos, context, name, args)
            }

            Cmd::ElementAccess { pos, mut context, mut index } => {
                self.resolve_boxed(&mut context)?;
                self.resolve_boxed(&mut index)?;
                let context_type = self.require_type(&context)?;
                if self.program.types[context_type.index()].attributes.is_array {
                    return Ok(Cmd::ReadArrayElement { pos, array: context, index });
                }
                let get = self.program.interner.intern("get");
                self.resolve_access(pos, Some(context), get, Some(vec![*index]))
            }

            // ----------------------------------------------------------------
            // Assignment
            // ----------------------------------------------------------------
            Cmd::Assign { pos, target, value } => self.resolve_assignment(pos, *target, *value),

            Cmd::OpWithAssign { pos, target, op, mut value } => {
                self.resolve_boxed(&mut value)?;
                self.resolve_op_with_assign(pos, *target, op, *value)
            }

            Cmd::Adjust { pos, target, delta } => self.resolve_adjust(pos, *target, delta),

            Cmd::DeclareLocal { pos, name, declared_type, initial } => {
                self.resolve_declare_local(pos, name, declared_type, initial)
            }

            cmd @ (Cmd::ReadLocal { .. }
            | Cmd::ReadGlobal { .. }
            | Cmd::ReadProperty { .. }
            | Cmd::ReadArrayElement { .. }
            | Cmd::ReadArrayCount { .. }
            | Cmd::ReadSingleton { .. }
            | Cmd::WriteLocal { .. }
            | Cmd::WriteGlobal { .. }
            | Cmd::WriteProperty { .. }
            | Cmd::WriteArrayElement { .. }
            | Cmd::LocalOpWithAssign { .. }
            | Cmd::OpAssignGlobal { .. }
            | Cmd::OpAssignProperty { .. }
            | Cmd::AdjustLocal { .. }
            | Cmd::AdjustProperty { .. }
            | Cmd::CreateObject { .. }
            | Cmd::CreateArray { .. }
            | Cmd::CreateCompound { .. }
            | Cmd::CreateOptionalValue { .. }
            | Cmd::CreateCallback { .. }
            | Cmd::CallRoutine { .. }
            | Cmd::CallStaticMethod { .. }
            | Cmd::CallDynamicMethod { .. }
            | Cmd::CallAspectMethod { .. }
            | Cmd::CallNativeRoutine { .. }
            | Cmd::CallInlineNativeRoutine { .. }
            | Cmd::CallNativeMethod { .. }
            | Cmd::CallInlineNativeMethod { .. }
            | Cmd::CallPriorMethod { .. }
            | Cmd::TaskControl { .. }
            | Cmd::TaskControlSection { .. }
            | Cmd::LocalDeclaration { .. }) => Ok(cmd),

            Cmd::MacroArgs { pos, .. } => {
                Err(CompileError::internal(format!(
                    "macro argument carrier escaped expansion at line {}",
                    pos.line
                )))
            }

            // ----------------------------------------------------------------
            // Operators
            // ----------------------------------------------------------------
            Cmd::Add { pos, lhs, rhs } => self.resolve_binary(pos, TokenKind::Plus, *lhs, *rhs),
            Cmd::Subtract { pos, lhs, rhs } => {
                self.resolve_binary(pos, TokenKind::Minus, *lhs, *rhs)
            }
            Cmd::Multiply { pos, lhs, rhs } => {
                self.resolve_binary(pos, TokenKind::Times, *lhs, *rhs)
            }
            Cmd::Divide { pos, lhs, rhs } => {
                self.resolve_binary(pos, TokenKind::Slash, *lhs, *rhs)
            }
            Cmd::Mod { pos, lhs, rhs } => self.resolve_binary(pos, TokenKind::Percent, *lhs, *rhs),
            Cmd::Power { pos, lhs, rhs } => self.resolve_binary(pos, TokenKind::Power, *lhs, *rhs),
            Cmd::BitwiseXor { pos, lhs, rhs } => {
                self.resolve_bitwise(pos, TokenKind::Tilde, *lhs, *rhs)
            }
            Cmd::BitwiseOr { pos, lhs, rhs } => {
                self.resolve_bitwise(pos, TokenKind::VerticalBar, *lhs, *rhs)
            }
            Cmd::BitwiseAnd { pos, lhs, rhs } => {
                self.resolve_bitwise(pos, TokenKind::Ampersand, *lhs, *rhs)
            }
            Cmd::ShiftLeft { pos, lhs, rhs } => {
                self.resolve_bitwise(pos, TokenKind::ShiftLeft, *lhs, *rhs)
            }
            Cmd::ShiftRight { pos, lhs, rhs } => {
                self.resolve_bitwise(pos, TokenKind::ShiftRight, *lhs, *rhs)
            }
            Cmd::ShiftRightX { pos, lhs, rhs } => {
                self.resolve_bitwise(pos, TokenKind::ShiftRightX, *lhs, *rhs)
            }

            Cmd::Negate { pos, mut operand } => {
                self.resolve_boxed(&mut operand)?;
                if let Some(folded) = fold_negate(&operand, pos) {
                    return Ok(folded);
                }
                let operand_type = self.require_type(&operand)?;
                if !self.program.is_numeric(operand_type) {
                    return self.pos_err(pos, "unary '-' needs a numeric operand");
                }
                Ok(Cmd::Negate { pos, operand })
            }
            Cmd::BitwiseNot { pos, mut operand } => {
                self.resolve_boxed(&mut operand)?;
                let operand_type = self.require_type(&operand)?;
                if operand_type != self.program.type_int && operand_type != self.program.type_long {
                    return self.pos_err(pos, "'~' needs an Int or Long operand");
                }
                Ok(Cmd::BitwiseNot { pos, operand })
            }
            Cmd::Logicalize { pos, mut operand } => {
                self.resolve_boxed(&mut operand)?;
                Ok(Cmd::Logicalize { pos, operand })
            }
            Cmd::LogicalNot { pos, mut operand } => {
                self.resolve_boxed(&mut operand)?;
                let operand = self.logicalized(*operand)?;
                if let Cmd::LiteralLogical { value, .. } = operand {
                    return Ok(Cmd::LiteralLogical { pos, value: !value });
                }
                Ok(Cmd::LogicalNot { pos, operand: Box::new(operand) })
            }
            Cmd::LogicalOr { pos, lhs, rhs } => {
                let lhs = self.resolve_logical_operand(*lhs)?;
                let rhs = self.resolve_logical_operand(*rhs)?;
                Ok(Cmd::LogicalOr { pos, lhs: Box::new(lhs), rhs: Box::new(rhs) })
            }
            Cmd::LogicalAnd { pos, lhs, rhs } => {
                let lhs = self.resolve_logical_operand(*lhs)?;
                let rhs = self.resolve_logical_operand(*rhs)?;
                Ok(Cmd::LogicalAnd { pos, lhs: Box::new(lhs), rhs: Box::new(rhs) })
            }
            Cmd::LogicalXor { pos, lhs, rhs } => {
                let lhs = self.resolve_logical_operand(*lhs)?;
                let rhs = self.resolve_logical_operand(*rhs)?;
                Ok(Cmd::LogicalXor { pos, lhs: Box::new(lhs), rhs: Box::new(rhs) })
            }

            Cmd::CompareEq { pos, lhs, rhs } => {
                self.resolve_compare(pos, TokenKind::CompareEq, *lhs, *rhs)
            }
            Cmd::CompareNe { pos, lhs, rhs } => {
                self.resolve_compare(pos, TokenKind::CompareNe, *lhs, *rhs)
            }
            Cmd::CompareLt { pos, lhs, rhs } => {
                self.resolve_compare(pos, TokenKind::CompareLt, *lhs, *rhs)
            }
            Cmd::CompareLe { pos, lhs, rhs } => {
                self.resolve_compare(pos, TokenKind::CompareLe, *lhs, *rhs)
            }
            Cmd::CompareGt { pos, lhs, rhs } => {
                self.resolve_compare(pos, TokenKind::CompareGt, *lhs, *rhs)
            }
            Cmd::CompareGe { pos, lhs, rhs } => {
                self.resolve_compare(pos, TokenKind::CompareGe, *lhs, *rhs)
            }
            Cmd::CompareIs { pos, mut lhs, mut rhs } => {
                self.resolve_boxed(&mut lhs)?;
                self.resolve_boxed(&mut rhs)?;
                Ok(Cmd::CompareIs { pos, lhs, rhs })
            }
            Cmd::CompareIsNot { pos, mut lhs, mut rhs } => {
                self.resolve_boxed(&mut lhs)?;
                self.resolve_boxed(&mut rhs)?;
                Ok(Cmd::CompareIsNot { pos, lhs, rhs })
            }

            Cmd::InstanceOf { pos, mut operand, of_type_name, .. } => {
                self.resolve_boxed(&mut operand)?;
                let of_type = self.program.resolve_type_name(pos, of_type_name)?;
                Ok(Cmd::InstanceOf { pos, operand, of_type_name, of_type: Some(of_type) })
            }
            Cmd::NotInstanceOf { pos, mut operand, of_type_name, .. } => {
                self.resolve_boxed(&mut operand)?;
                let of_type = self.program.resolve_type_name(pos, of_type_name)?;
                Ok(Cmd::NotInstanceOf { pos, operand, of_type_name, of_type: Some(of_type) })
            }
            Cmd::As { pos, mut operand, of_type_name, .. } => {
                self.resolve_boxed(&mut operand)?;
                let of_type = self.program.resolve_type_name(pos, of_type_name)?;
                if self.program.types[of_type.index()].attributes.is_value_type() {
                    return Ok(Cmd::CastToType { pos, operand, of_type });
                }
                Ok(Cmd::As { pos, operand, of_type_name, of_type: Some(of_type) })
            }
            Cmd::CastToType { pos, mut operand, of_type } => {
                self.resolve_boxed(&mut operand)?;
                Ok(Cmd::CastToType { pos, operand, of_type })
            }
            Cmd::ConvertToType { pos, mut operand, of_type } => {
                self.resolve_boxed(&mut operand)?;
                Ok(Cmd::ConvertToType { pos, operand, of_type })
            }
            Cmd::ConvertToPrimitiveType { pos, mut operand, of_type } => {
                self.resolve_boxed(&mut operand)?;
                Ok(Cmd::ConvertToPrimitiveType { pos, operand, of_type })
            }

            Cmd::Range { pos, mut low, mut high } => {
                self.resolve_boxed(&mut low)?;
                self.resolve_boxed(&mut high)?;
                Ok(Cmd::Range { pos, low, high })
            }
            Cmd::RangeUpTo { pos, mut low, mut high } => {
                self.resolve_boxed(&mut low)?;
                self.resolve_boxed(&mut high)?;
                Ok(Cmd::RangeUpTo { pos, low, high })
            }
            Cmd::RangeDownTo { pos, mut low, mut high } => {
                self.resolve_boxed(&mut low)?;
                self.resolve_boxed(&mut high)?;
                Ok(Cmd::RangeDownTo { pos, low, high })
            }

            // ----------------------------------------------------------------
            // Control flow
            // ----------------------------------------------------------------
            Cmd::If { pos, mut condition, mut then_statements, mut else_statements } => {
                self.resolve_boxed(&mut condition)?;
                let condition = Box::new(self.logicalized(*condition)?);
                self.resolve_statements(&mut then_statements)?;
                self.resolve_statements(&mut else_statements)?;
                Ok(Cmd::If { pos, condition, then_statements, else_statements })
            }

            Cmd::Which { pos, subject, cases, others } => {
                self.resolve_which(pos, *subject, cases, others)
            }

            Cmd::Switch { pos, mut subject, mut cases, mut others } => {
                self.resolve_boxed(&mut subject)?;
                let subject_type = self.require_type(&subject)?;
                if subject_type != self.program.type_int
                    && subject_type != self.program.type_character
                {
                    return self.pos_err(pos, "'switch' needs an Int or Character subject");
                }
                for case in cases.iter_mut() {
                    let value =
                        std::mem::replace(&mut case.value, Cmd::LiteralNull { pos: case.pos });
                    case.value = self.resolve_cmd(value)?;
                    if !case.value.is_literal() {
                        return self.pos_err(case.pos, "'switch' case values must be literal");
                    }
                    self.resolve_statements(&mut case.statements)?;
                }
                self.resolve_statements(&mut others)?;
                Ok(Cmd::Switch { pos, subject, cases, others })
            }

            Cmd::Contingent { pos, mut statements, mut satisfied, mut unsatisfied, .. } => {
                let control_id = self.next_control_id();
                self.scope
                    .control_stack
                    .push(ControlEntry { kind: ControlKind::Contingent, id: control_id });
                self.resolve_statements(&mut statements)?;
                self.scope.control_stack.pop();
                self.resolve_statements(&mut satisfied)?;
                self.resolve_statements(&mut unsatisfied)?;
                Ok(Cmd::Contingent { pos, statements, satisfied, unsatisfied, control_id })
            }

            Cmd::Try { pos, mut statements, catches } => {
                self.resolve_statements(&mut statements)?;
                let mut resolved_catches = Vec::with_capacity(catches.len());
                for catch in catches {
                    let CatchClause { pos, name, catch_type, mut statements, .. } = catch;
                    let caught = self.program.resolve_type_name(pos, catch_type)?;
                    let depth = self.scope.local_depth();
                    let local_index =
                        self.program.method_mut(self.method).add_local(name, Some(catch_type), pos);
                    self.program.method_mut(self.method).locals[local_index].resolved_type =
                        Some(caught);
                    self.scope.push_local(local_index);
                    self.resolve_statements(&mut statements)?;
                    self.scope.pop_locals_to(depth);
                    resolved_catches.push(CatchClause {
                        pos,
                        name,
                        local_index,
                        catch_type,
                        resolved_type: Some(caught),
                        statements,
                    });
                }
                Ok(Cmd::Try { pos, statements, catches: resolved_catches })
            }

            Cmd::Throw { pos, mut value } => {
                self.resolve_boxed(&mut value)?;
                let thrown = self.require_type(&value)?;
                if self.program.types[thrown.index()].attributes.is_value_type() {
                    return self.pos_err(pos, "only objects can be thrown");
                }
                Ok(Cmd::Throw { pos, value })
            }

            Cmd::GenericLoop { pos, mut condition, mut increment, mut statements, .. } => {
                let control_id = self.next_control_id();
                if let Some(ref mut c) = condition {
                    self.resolve_boxed(c)?;
                    let resolved = std::mem::replace(
                        c.as_mut(),
                        Cmd::LiteralNull { pos },
                    );
                    **c = self.logicalized(resolved)?;
                }
                if let Some(ref mut inc) = increment {
                    self.resolve_boxed(inc)?;
                }
                self.scope
                    .control_stack
                    .push(ControlEntry { kind: ControlKind::Loop, id: control_id });
                self.resolve_statements(&mut statements)?;
                self.scope.control_stack.pop();
                Ok(Cmd::GenericLoop { pos, condition, increment, statements, control_id })
            }

            Cmd::ForEach { pos, counter_name, collection, statements, .. } => {
                self.resolve_for_each(pos, counter_name, *collection, statements)
            }

            Cmd::Block { pos, mut statements } => {
                self.resolve_statements(&mut statements)?;
                Ok(Cmd::Block { pos, statements })
            }

            Cmd::Return { pos, value } => {
                let value = match value {
                    Some(v) => {
                        let resolved = self.resolve_cmd(*v)?;
                        let value_type = self.type_of(&resolved);
                        if let (Some(expected), Some(actual)) =
                            (self.method_ref().return_type, value_type)
                        {
                            if self
                                .program
                                .implicit_conversion_cost(actual, expected)
                                .is_none()
                            {
                                return self.pos_err(
                                    pos,
                                    format!(
                                        "cannot return '{}' from a method returning '{}'",
                                        self.program.type_name(actual),
                                        self.program.type_name(expected)
                                    ),
                                );
                            }
                        }
                        Some(Box::new(resolved))
                    }
                    None => None,
                };
                Ok(Cmd::Return { pos, value })
            }

            Cmd::Escape { pos, .. } => match self.scope.innermost(ControlKind::Loop) {
                Some(id) => Ok(Cmd::Escape { pos, control_id: id }),
                None => self.pos_err(pos, "'escape' outside of a loop"),
            },
            Cmd::NextIteration { pos, .. } => match self.scope.innermost(ControlKind::Loop) {
                Some(id) => Ok(Cmd::NextIteration { pos, control_id: id }),
                None => self.pos_err(pos, "'nextIteration' outside of a loop"),
            },
            Cmd::Necessary { pos, mut condition, .. } => {
                match self.scope.innermost(ControlKind::Contingent) {
                    Some(id) => {
                        self.resolve_boxed(&mut condition)?;
                        let condition = Box::new(self.logicalized(*condition)?);
                        Ok(Cmd::Necessary { pos, condition, control_id: id })
                    }
                    None => self.pos_err(pos, "'necessary' outside of a contingent"),
                }
            }
            Cmd::Sufficient { pos, mut condition, .. } => {
                match self.scope.innermost(ControlKind::Contingent) {
                    Some(id) => {
                        self.resolve_boxed(&mut condition)?;
                        let condition = Box::new(self.logicalized(*condition)?);
                        Ok(Cmd::Sufficient { pos, condition, control_id: id })
                    }
                    None => self.pos_err(pos, "'sufficient' outside of a contingent"),
                }
            }

            Cmd::Trace { pos, text, value } => {
                let value = match value {
                    Some(v) => Some(Box::new(self.resolve_cmd(*v)?)),
                    None => None,
                };
                Ok(Cmd::Trace { pos, text, value })
            }

            Cmd::Await { pos, mut value } => {
                self.program.method_mut(self.method).is_task = true;
                self.resolve_boxed(&mut value)?;
                Ok(Cmd::Await { pos, value })
            }
            Cmd::Yield { pos, value } => {
                self.program.method_mut(self.method).is_task = true;
                let value = match value {
                    Some(v) => Some(Box::new(self.resolve_cmd(*v)?)),
                    None => None,
                };
                Ok(Cmd::Yield { pos, value })
            }
        }
    }

    // =========================================================================
    // Helpers: logical coercion, type queries
    // =========================================================================

    fn require_type(&self, cmd: &Cmd) -> Result<TypeId> {
        match self.type_of(cmd) {
            Some(t) => Ok(t),
            None => Err(CompileError::type_error(
                "expression has no value here",
                Some(cmd.pos()),
            )),
        }
    }

    fn resolve_logical_operand(&mut self, cmd: Cmd) -> Result<Cmd> {
        let resolved = self.resolve_cmd(cmd)?;
        self.logicalized(resolved)
    }

    /// Wraps non-Logical values: numbers test against zero, references
    /// against null.
    fn logicalized(&mut self, cmd: Cmd) -> Result<Cmd> {
        let cmd_type = self.require_type(&cmd)?;
        if cmd_type == self.program.type_logical {
            return Ok(cmd);
        }
        Ok(Cmd::Logicalize { pos: cmd.pos(), operand: Box::new(cmd) })
    }
}

// =============================================================================
// Node typing
// =============================================================================

/// The value type a resolved node produces, or `None` for statements.
pub fn cmd_type(cmd: &Cmd, program: &Program, method: &Method) -> Option<TypeId> {
    match cmd {
        Cmd::LiteralInteger { .. } => Some(program.type_int),
        Cmd::LiteralLong { .. } => Some(program.type_long),
        Cmd::LiteralReal { .. } => Some(program.type_real),
        Cmd::LiteralCharacter { .. } => Some(program.type_character),
        Cmd::LiteralLogical { .. } => Some(program.type_logical),
        Cmd::LiteralString { .. } | Cmd::FormattedString { .. } => Some(program.type_string),
        Cmd::LiteralNull { .. } => Some(program.type_null),
        Cmd::This { of_type, .. } => *of_type,
        Cmd::DefaultValue { of_type, .. } => Some(*of_type),
        Cmd::CreateCompound { of_type, .. } => Some(*of_type),
        Cmd::CreateArray { element_type, .. } => {
            let name = format!("Array<<{}>>", program.type_name(*element_type));
            program.interner.lookup(&name).and_then(|sym| program.find_type(sym))
        }
        Cmd::CreateOptionalValue { of_type, .. } => Some(*of_type),
        Cmd::CreateObject { of_type, .. } => Some(*of_type),
        Cmd::CreateCallback { .. } => {
            program.interner.lookup("Callback").and_then(|sym| program.find_type(sym))
        }
        Cmd::ReadLocal { local_index, .. } => method.locals.get(*local_index)?.resolved_type,
        Cmd::ReadGlobal { owner, name, .. } => {
            let ty = &program.types[owner.index()];
            ty.find_global(*name).and_then(|i| ty.globals[i].resolved_type)
        }
        Cmd::ReadProperty { owner, name, .. } => {
            let ty = &program.types[owner.index()];
            ty.find_property(*name).and_then(|i| ty.properties[i].resolved_type)
        }
        Cmd::ReadArrayElement { array, .. } => {
            let array_type = cmd_type(array, program, method)?;
            program.types[array_type.index()].element_type
        }
        Cmd::ReadArrayCount { .. } => Some(program.type_int),
        Cmd::ReadSingleton { of_type, .. } => Some(*of_type),
        Cmd::Add { lhs, rhs, .. }
        | Cmd::Subtract { lhs, rhs, .. }
        | Cmd::Multiply { lhs, rhs, .. }
        | Cmd::Divide { lhs, rhs, .. }
        | Cmd::Mod { lhs, rhs, .. }
        | Cmd::Power { lhs, rhs, .. } => {
            let a = cmd_type(lhs, program, method)?;
            let b = cmd_type(rhs, program, method)?;
            Some(program.common_numeric_type(a, b))
        }
        Cmd::BitwiseXor { lhs, rhs, .. }
        | Cmd::BitwiseOr { lhs, rhs, .. }
        | Cmd::BitwiseAnd { lhs, rhs, .. } => {
            let a = cmd_type(lhs, program, method)?;
            let b = cmd_type(rhs, program, method)?;
            Some(program.common_numeric_type(a, b))
        }
        Cmd::ShiftLeft { lhs, .. }
        | Cmd::ShiftRight { lhs, .. }
        | Cmd::ShiftRightX { lhs, .. } => cmd_type(lhs, program, method),
        Cmd::BitwiseNot { operand, .. } | Cmd::Negate { operand, .. } => {
            cmd_type(operand, program, method)
        }
        Cmd::Logicalize { .. }
        | Cmd::LogicalNot { .. }
        | Cmd::LogicalOr { .. }
        | Cmd::LogicalAnd { .. }
        | Cmd::LogicalXor { .. }
        | Cmd::CompareEq { .. }
        | Cmd::CompareNe { .. }
        | Cmd::CompareLt { .. }
        | Cmd::CompareLe { .. }
        | Cmd::CompareGt { .. }
        | Cmd::CompareGe { .. }
        | Cmd::CompareIs { .. }
        | Cmd::CompareIsNot { .. }
        | Cmd::InstanceOf { .. }
        | Cmd::NotInstanceOf { .. } => Some(program.type_logical),
        Cmd::CastToType { of_type, .. }
        | Cmd::ConvertToType { of_type, .. }
        | Cmd::ConvertToPrimitiveType { of_type, .. } => Some(*of_type),
        Cmd::As { of_type, .. } => *of_type,
        Cmd::CallRoutine { method: m, .. }
        | Cmd::CallStaticMethod { method: m, .. }
        | Cmd::CallDynamicMethod { method: m, .. }
        | Cmd::CallAspectMethod { method: m, .. }
        | Cmd::CallNativeRoutine { method: m, .. }
        | Cmd::CallInlineNativeRoutine { method: m, .. }
        | Cmd::CallNativeMethod { method: m, .. }
        | Cmd::CallInlineNativeMethod { method: m, .. }
        | Cmd::CallPriorMethod { method: m, .. } => program.methods[m.index()].return_type,
        Cmd::Await { .. } => None,
        _ => None,
    }
}

// =============================================================================
// Literal folding
// =============================================================================

fn fold_negate(operand: &Cmd, pos: SourcePos) -> Option<Cmd> {
    Some(match operand {
        Cmd::LiteralInteger { value, .. } => {
            Cmd::LiteralInteger { pos, value: value.wrapping_neg() }
        }
        Cmd::LiteralLong { value, .. } => Cmd::LiteralLong { pos, value: value.wrapping_neg() },
        Cmd::LiteralReal { value, .. } => Cmd::LiteralReal { pos, value: -value },
        _ => return None,
    })
}

// =============================================================================
// Access, calls, and macro inlining
// =============================================================================

impl<'p> Resolver<'p> {
    /// The rewrite at the center of resolution. Order of attempts: local,
    /// property, global, type constant, type reference (constructor,
    /// conversion, singleton), then method call through the overload
    /// resolver.
    fn resolve_access(
        &mut self,
        pos: SourcePos,
        context: Option<Box<Cmd>>,
        name: Symbol,
        args: Option<Vec<Cmd>>,
    ) -> Result<Cmd> {
        match context {
            None => self.resolve_plain_access(pos, name, args),
            Some(ctx) if matches!(*ctx, Cmd::Prior { .. }) => {
                self.resolve_prior_call(pos, name, args.unwrap_or_default())
            }
            Some(mut ctx) => {
                self.resolve_boxed(&mut ctx)?;
                self.resolve_context_access(pos, *ctx, name, args)
            }
        }
    }

    fn resolve_plain_access(
        &mut self,
        pos: SourcePos,
        name: Symbol,
        args: Option<Vec<Cmd>>,
    ) -> Result<Cmd> {
        // Macro parameters shadow everything inside an expansion.
        if args.is_none() {
            if let Some(bound) = self.lookup_macro_binding(name) {
                return Ok(bound);
            }
        }

        let this_type = self.scope.this_type;

        if args.is_none() {
            if let Some(local) = self.scope.find_local(self.method_ref(), name) {
                return Ok(Cmd::ReadLocal { pos, local_index: local });
            }
            if self.types_has_property(this_type, name) && self.this_available() {
                return Ok(Cmd::ReadProperty {
                    pos,
                    context: Box::new(Cmd::This { pos, of_type: Some(this_type) }),
                    owner: this_type,
                    name,
                });
            }
            if self.program.types[this_type.index()].find_global(name).is_some() {
                return Ok(Cmd::ReadGlobal { pos, owner: this_type, name });
            }
            if let Some(constant) = self.program.types[this_type.index()].definitions.get(&name) {
                let constant = constant.clone();
                return self.resolve_cmd(constant);
            }
        }

        // An uppercase leading character always means a type.
        let is_type_name = self
            .program
            .interner
            .resolve(name)
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false);
        if is_type_name {
            return self.resolve_type_access(pos, name, args);
        }

        let args = match args {
            Some(args) => self.resolve_args(args)?,
            None => Vec::new(),
        };
        let arg_types = self.arg_types(&args)?;
        let candidates = CandidateMethods::gather(self.program, this_type, name);
        if candidates.available.is_empty() {
            return self.pos_err(
                pos,
                format!("'{}' is not defined here", self.program.interner.resolve(name)),
            );
        }
        match candidates.resolve(self.program, &arg_types, true, pos)? {
            Some(chosen) => self.build_call(pos, None, chosen, args),
            None => unreachable!("error_on_fail returned no method"),
        }
    }

    fn resolve_context_access(
        &mut self,
        pos: SourcePos,
        ctx: Cmd,
        name: Symbol,
        args: Option<Vec<Cmd>>,
    ) -> Result<Cmd> {
        let ctx_type = self.require_type(&ctx)?;

        if args.is_none() {
            if self.program.types[ctx_type.index()].attributes.is_array {
                if self.program.interner.resolve(name) == "count" {
                    return Ok(Cmd::ReadArrayCount { pos, array: Box::new(ctx) });
                }
            }
            if self.types_has_property(ctx_type, name) {
                return Ok(Cmd::ReadProperty { pos, context: Box::new(ctx), owner: ctx_type, name });
            }
            if let Cmd::ReadSingleton { of_type, .. } = ctx {
                if self.program.types[of_type.index()].find_global(name).is_some() {
                    return Ok(Cmd::ReadGlobal { pos, owner: of_type, name });
                }
                if let Some(constant) = self.program.types[of_type.index()].definitions.get(&name) {
                    let constant = constant.clone();
                    return self.resolve_cmd(constant);
                }
            }
        }

        let args = match args {
            Some(args) => self.resolve_args(args)?,
            None => Vec::new(),
        };
        let arg_types = self.arg_types(&args)?;
        let candidates = CandidateMethods::gather(self.program, ctx_type, name);
        if candidates.available.is_empty() {
            return self.pos_err(
                pos,
                format!(
                    "'{}' has no member '{}'",
                    self.program.type_name(ctx_type),
                    self.program.interner.resolve(name)
                ),
            );
        }
        match candidates.resolve(self.program, &arg_types, true, pos)? {
            Some(chosen) => self.build_call(pos, Some(ctx), chosen, args),
            None => unreachable!("error_on_fail returned no method"),
        }
    }

    /// `prior.name(args)`: statically bound to the base class's
    /// implementation.
    fn resolve_prior_call(&mut self, pos: SourcePos, name: Symbol, args: Vec<Cmd>) -> Result<Cmd> {
        let base = match self.program.types[self.scope.this_type.index()].base_class {
            Some(base) => base,
            None => return self.pos_err(pos, "'prior' needs a base class"),
        };
        let args = self.resolve_args(args)?;
        let arg_types = self.arg_types(&args)?;
        let candidates = CandidateMethods::gather(self.program, base, name);
        if candidates.available.is_empty() {
            return self.pos_err(
                pos,
                format!(
                    "base class '{}' has no method '{}'",
                    self.program.type_name(base),
                    self.program.interner.resolve(name)
                ),
            );
        }
        let chosen = candidates.resolve(self.program, &arg_types, true, pos)?.unwrap();
        let args = self.finalize_args(chosen, args)?;
        Ok(Cmd::CallPriorMethod { pos, method: chosen, args })
    }

    /// Type-name access: constructor, primitive conversion, compound or
    /// optional creation, array allocation, or a bare singleton read.
    fn resolve_type_access(
        &mut self,
        pos: SourcePos,
        name: Symbol,
        args: Option<Vec<Cmd>>,
    ) -> Result<Cmd> {
        let of_type = self.program.resolve_type_name(pos, name)?;
        let attributes = self.program.types[of_type.index()].attributes;

        let Some(args) = args else {
            if attributes.is_value_type() {
                return Ok(Cmd::DefaultValue { pos, of_type });
            }
            return Ok(Cmd::ReadSingleton { pos, of_type });
        };
        let args = self.resolve_args(args)?;

        if attributes.is_array {
            if args.len() != 1 {
                return self.pos_err(pos, "an array takes exactly one count argument");
            }
            let element_type = self.program.types[of_type.index()].element_type.unwrap();
            return Ok(Cmd::CreateArray {
                pos,
                element_type,
                count: Box::new(args.into_iter().next().unwrap()),
            });
        }
        if attributes.is_optional {
            let value = args.into_iter().next().map(Box::new);
            return Ok(Cmd::CreateOptionalValue { pos, of_type, value });
        }
        if attributes.is_primitive() {
            if args.len() != 1 {
                return self.pos_err(pos, "a primitive conversion takes exactly one argument");
            }
            return Ok(Cmd::ConvertToPrimitiveType {
                pos,
                operand: Box::new(args.into_iter().next().unwrap()),
                of_type,
            });
        }
        if attributes.kind == crate::template::TypeKind::Compound {
            let expected = self.program.types[of_type.index()].properties.len();
            if args.len() != expected {
                return self.pos_err(
                    pos,
                    format!(
                        "compound '{}' takes {} values, found {}",
                        self.program.type_name(of_type),
                        expected,
                        args.len()
                    ),
                );
            }
            return Ok(Cmd::CreateCompound { pos, of_type, args });
        }
        if attributes.is_aspect() {
            return self.pos_err(pos, "an aspect cannot be constructed");
        }

        // Class construction; `init` resolves like any overloaded call.
        let init_name = self.program.interner.intern("init");
        let arg_types = self.arg_types(&args)?;
        let candidates = CandidateMethods::gather(self.program, of_type, init_name);
        if candidates.available.is_empty() {
            if !args.is_empty() {
                return self.pos_err(
                    pos,
                    format!("'{}' has no 'init' taking arguments", self.program.type_name(of_type)),
                );
            }
            return Ok(Cmd::CreateObject { pos, of_type, init: None, args });
        }
        let chosen = candidates.resolve(self.program, &arg_types, true, pos)?.unwrap();
        let args = self.finalize_args(chosen, args)?;
        Ok(Cmd::CreateObject { pos, of_type, init: Some(chosen), args })
    }

    fn this_available(&self) -> bool {
        !self.method_ref().is_routine
    }

    fn types_has_property(&self, type_id: TypeId, name: Symbol) -> bool {
        self.program.types[type_id.index()].find_property(name).is_some()
    }

    fn resolve_args(&mut self, args: Vec<Cmd>) -> Result<Vec<Cmd>> {
        args.into_iter().map(|a| self.resolve_cmd(a)).collect()
    }

    fn arg_types(&self, args: &[Cmd]) -> Result<Vec<Option<TypeId>>> {
        args.iter()
            .map(|a| match self.type_of(a) {
                Some(t) => Ok(Some(t)),
                None => Err(CompileError::type_error(
                    "argument expression has no value",
                    Some(a.pos()),
                )),
            })
            .collect()
    }

    // =========================================================================
    // Call construction
    // =========================================================================

    /// Pads defaulted parameters, applies per-argument conversions, and
    /// picks the most specific call node for the chosen method.
    fn build_call(
        &mut self,
        pos: SourcePos,
        context: Option<Cmd>,
        method_id: MethodId,
        args: Vec<Cmd>,
    ) -> Result<Cmd> {
        let method = &self.program.methods[method_id.index()];
        if method.attributes.is_macro {
            let carrier = Cmd::MacroArgs {
                pos,
                context: context.map(Box::new),
                args,
            };
            return self.inline_macro(carrier, method_id);
        }

        let is_routine = method.is_routine;
        let owner = method.owner;
        let is_native = method.attributes.is_native;
        let has_inline = method.native_code.is_some();
        let owner_is_aspect = self.program.types[owner.index()].attributes.is_aspect();
        let has_overrides = !method.overriding.is_empty();
        let declared_dynamic = method.attributes.is_dynamic;

        let args = self.finalize_args(method_id, args)?;

        if is_routine {
            return Ok(if is_native && has_inline {
                Cmd::CallInlineNativeRoutine { pos, owner, method: method_id, args }
            } else if is_native {
                Cmd::CallNativeRoutine { pos, owner, method: method_id, args }
            } else {
                Cmd::CallRoutine { pos, owner, method: method_id, args }
            });
        }

        let this_type = self.scope.this_type;
        let context = Box::new(match context {
            Some(ctx) => ctx,
            None => {
                if !self.this_available() {
                    return self.pos_err(pos, "a dynamic method needs an object context");
                }
                Cmd::This { pos, of_type: Some(this_type) }
            }
        });

        if is_native && has_inline {
            return Ok(Cmd::CallInlineNativeMethod { pos, context, method: method_id, args });
        }
        if is_native {
            return Ok(Cmd::CallNativeMethod { pos, context, method: method_id, args });
        }
        if owner_is_aspect {
            return Ok(Cmd::CallAspectMethod { pos, context, method: method_id, args });
        }
        if declared_dynamic || has_overrides {
            self.mark_called_dynamically(method_id);
            return Ok(Cmd::CallDynamicMethod { pos, context, method: method_id, args });
        }
        Ok(Cmd::CallStaticMethod { pos, context, method: method_id, args })
    }

    fn mark_called_dynamically(&mut self, method_id: MethodId) {
        let mut queue = vec![method_id];
        while let Some(m) = queue.pop() {
            let method = &mut self.program.methods[m.index()];
            if method.called_dynamically {
                continue;
            }
            method.called_dynamically = true;
            queue.extend(method.overriding.iter().copied());
        }
    }

    /// Fills omitted defaulted arguments and inserts implicit conversions
    /// the target language will not do on its own.
    fn finalize_args(&mut self, method_id: MethodId, mut args: Vec<Cmd>) -> Result<Vec<Cmd>> {
        let parameter_count = self.program.methods[method_id.index()].parameters.len();
        while args.len() < parameter_count {
            let index = args.len();
            let default = self.program.methods[method_id.index()].parameters[index]
                .default
                .clone();
            match default {
                Some(default) => args.push(self.resolve_cmd(default)?),
                None => break,
            }
        }
        for i in 0..args.len().min(parameter_count) {
            let param_type = self.program.methods[method_id.index()].parameters[i].resolved_type;
            if let Some(param_type) = param_type {
                let arg = std::mem::replace(
                    &mut args[i],
                    Cmd::LiteralNull { pos: SourcePos::default() },
                );
                args[i] = self.convert_to(arg, param_type)?;
            }
        }
        Ok(args)
    }

    /// Conversions the emitter cannot leave to C: to-String through
    /// `toString()`, optional wrapping, and null into an optional.
    fn convert_to(&mut self, arg: Cmd, param_type: TypeId) -> Result<Cmd> {
        let arg_type = match self.type_of(&arg) {
            Some(t) => t,
            None => return Ok(arg),
        };
        if arg_type == param_type {
            return Ok(arg);
        }
        let param = &self.program.types[param_type.index()];
        if param.attributes.is_optional {
            if arg_type == self.program.type_null {
                return Ok(Cmd::CreateOptionalValue {
                    pos: arg.pos(),
                    of_type: param_type,
                    value: None,
                });
            }
            if param.element_type == Some(arg_type) {
                return Ok(Cmd::CreateOptionalValue {
                    pos: arg.pos(),
                    of_type: param_type,
                    value: Some(Box::new(arg)),
                });
            }
        }
        if param_type == self.program.type_string
            && arg_type != self.program.type_string
            && arg_type != self.program.type_null
        {
            let pos = arg.pos();
            let to_string = self.program.interner.intern("toString");
            return self.resolve_context_access(pos, arg, to_string, Some(Vec::new()));
        }
        Ok(arg)
    }

    // =========================================================================
    // Macro inlining
    // =========================================================================

    fn lookup_macro_binding(&self, name: Symbol) -> Option<Cmd> {
        for frame in self.macro_bindings.iter().rev() {
            if let Some(bound) = frame.get(&name) {
                return Some(bound.clone());
            }
        }
        None
    }

    /// Clones the macro body, binds parameters to the already-resolved
    /// call-site arguments, and resolves the clone in place.
    fn inline_macro(&mut self, carrier: Cmd, method_id: MethodId) -> Result<Cmd> {
        let Cmd::MacroArgs { pos, context, args } = carrier else {
            return Err(CompileError::internal("macro expansion without its carrier"));
        };
        if context.is_some() {
            // A macro invoked through a context still resolves against the
            // caller's scope; the context value itself is dropped after
            // arity checking, matching by-index substitution.
        }
        if self.macro_depth >= MAX_MACRO_DEPTH {
            return Err(CompileError::type_error(
                "macro expansion is too deep (recursive macro?)",
                Some(pos),
            ));
        }
        let args = self.resolve_args(args)?;
        let method = &self.program.methods[method_id.index()];
        if args.len() < method.min_args || args.len() > method.parameters.len() {
            return self.pos_err(pos, "wrong number of macro arguments");
        }
        let mut frame = rustc_hash::FxHashMap::default();
        for (parameter, arg) in method.parameters.iter().zip(args.into_iter()) {
            frame.insert(parameter.name, arg);
        }
        let mut body: Vec<Cmd> = method.statements.clone();

        self.macro_bindings.push(frame);
        self.macro_depth += 1;
        let result = (|| -> Result<Cmd> {
            if body.len() == 1 {
                if let Cmd::Return { value: Some(value), .. } = &body[0] {
                    let value = (**value).clone();
                    return self.resolve_cmd(value);
                }
            }
            self.resolve_statements(&mut body)?;
            Ok(Cmd::Block { pos, statements: body })
        })();
        self.macro_depth -= 1;
        self.macro_bindings.pop();
        result
    }
}

// =============================================================================
// Assignment family
// =============================================================================

impl<'p> Resolver<'p> {
    /// Resolves `value` knowing the type the surrounding context expects;
    /// this is what gives compound literals, empty list literals, and
    /// bare `null` their types.
    fn resolve_with_expected(&mut self, value: Cmd, expected: Option<TypeId>) -> Result<Cmd> {
        if let Some(expected) = expected {
            match value {
                Cmd::CreateCompoundLiteral { pos, args }
                    if self.program.types[expected.index()].attributes.kind
                        == crate::template::TypeKind::Compound =>
                {
                    let wanted = self.program.types[expected.index()].properties.len();
                    if args.len() != wanted {
                        return self.pos_err(
                            pos,
                            format!(
                                "compound '{}' takes {} values, found {}",
                                self.program.type_name(expected),
                                wanted,
                                args.len()
                            ),
                        );
                    }
                    let args = self.resolve_args(args)?;
                    return Ok(Cmd::CreateCompound { pos, of_type: expected, args });
                }
                Cmd::CreateList { pos, args }
                    if args.is_empty()
                        && self
                            .program
                            .interner
                            .resolve(self.program.types[expected.index()].name)
                            .starts_with("List<<") =>
                {
                    let name = self.program.types[expected.index()].name;
                    return self.resolve_access(pos, None, name, Some(Vec::new()));
                }
                Cmd::LiteralNull { pos }
                    if self.program.types[expected.index()].attributes.is_optional =>
                {
                    return Ok(Cmd::CreateOptionalValue { pos, of_type: expected, value: None });
                }
                other => {
                    let resolved = self.resolve_cmd(other)?;
                    self.check_assignable(&resolved, expected)?;
                    return self.convert_to(resolved, expected);
                }
            }
        }
        self.resolve_cmd(value)
    }

    fn check_assignable(&self, value: &Cmd, expected: TypeId) -> Result<()> {
        if let Some(actual) = self.type_of(value) {
            if self.program.implicit_conversion_cost(actual, expected).is_none() {
                return Err(CompileError::type_error(
                    format!(
                        "cannot store '{}' into '{}'",
                        self.program.type_name(actual),
                        self.program.type_name(expected)
                    ),
                    Some(value.pos()),
                ));
            }
        }
        Ok(())
    }

    fn resolve_declare_local(
        &mut self,
        pos: SourcePos,
        name: Symbol,
        declared_type: Option<Symbol>,
        initial: Option<Box<Cmd>>,
    ) -> Result<Cmd> {
        let declared = match declared_type {
            Some(type_name) => Some(self.program.resolve_type_name(pos, type_name)?),
            None => None,
        };
        let initial = match initial {
            Some(value) => Some(self.resolve_with_expected(*value, declared)?),
            None => None,
        };
        let local_type = match declared.or_else(|| initial.as_ref().and_then(|v| self.type_of(v))) {
            Some(t) if t == self.program.type_null => {
                return self.pos_err(pos, "cannot infer a type from 'null'");
            }
            Some(t) => t,
            None => {
                return self.pos_err(
                    pos,
                    format!(
                        "local '{}' needs a type or an initial value",
                        self.program.interner.resolve(name)
                    ),
                );
            }
        };
        let local_index =
            self.program.method_mut(self.method).add_local(name, declared_type, pos);
        self.program.method_mut(self.method).locals[local_index].resolved_type = Some(local_type);
        self.scope.push_local(local_index);
        Ok(Cmd::LocalDeclaration { pos, local_index, initial: initial.map(Box::new) })
    }

    fn resolve_assignment(&mut self, pos: SourcePos, target: Cmd, value: Cmd) -> Result<Cmd> {
        match target {
            Cmd::Access { context: None, name, args: None, .. } => {
                if let Some(bound) = self.lookup_macro_binding(name) {
                    return self.resolve_assignment(pos, bound, value);
                }
                if let Some(local_index) = self.scope.find_local(self.method_ref(), name) {
                    let expected = self.method_ref().locals[local_index].resolved_type;
                    let value = self.resolve_with_expected(value, expected)?;
                    return Ok(Cmd::WriteLocal { pos, local_index, value: Box::new(value) });
                }
                let this_type = self.scope.this_type;
                if let Some(slot) = self.program.types[this_type.index()].find_property(name) {
                    if self.this_available() || self.is_defaults_body() {
                        let expected =
                            self.program.types[this_type.index()].properties[slot].resolved_type;
                        let value = self.resolve_with_expected(value, expected)?;
                        return Ok(Cmd::WriteProperty {
                            pos,
                            context: Box::new(Cmd::This { pos, of_type: Some(this_type) }),
                            owner: this_type,
                            name,
                            value: Box::new(value),
                        });
                    }
                }
                if let Some(slot) = self.program.types[this_type.index()].find_global(name) {
                    let expected = self.program.types[this_type.index()].globals[slot].resolved_type;
                    let value = self.resolve_with_expected(value, expected)?;
                    return Ok(Cmd::WriteGlobal { pos, owner: this_type, name, value: Box::new(value) });
                }
                self.pos_err(
                    pos,
                    format!("cannot assign to undefined '{}'", self.program.interner.resolve(name)),
                )
            }
            Cmd::Access { context: Some(ctx), name, args: None, .. } => {
                let ctx = self.resolve_cmd(*ctx)?;
                let ctx_type = self.require_type(&ctx)?;
                if let Some(slot) = self.program.types[ctx_type.index()].find_property(name) {
                    let expected =
                        self.program.types[ctx_type.index()].properties[slot].resolved_type;
                    let value = self.resolve_with_expected(value, expected)?;
                    return Ok(Cmd::WriteProperty {
                        pos,
                        context: Box::new(ctx),
                        owner: ctx_type,
                        name,
                        value: Box::new(value),
                    });
                }
                if let Cmd::ReadSingleton { of_type, .. } = ctx {
                    if self.program.types[of_type.index()].find_global(name).is_some() {
                        let slot = self.program.types[of_type.index()].find_global(name).unwrap();
                        let expected =
                            self.program.types[of_type.index()].globals[slot].resolved_type;
                        let value = self.resolve_with_expected(value, expected)?;
                        return Ok(Cmd::WriteGlobal {
                            pos,
                            owner: of_type,
                            name,
                            value: Box::new(value),
                        });
                    }
                }
                self.pos_err(
                    pos,
                    format!(
                        "'{}' has no assignable member '{}'",
                        self.program.type_name(ctx_type),
                        self.program.interner.resolve(name)
                    ),
                )
            }
            Cmd::ElementAccess { context, index, .. } => {
                let array = self.resolve_cmd(*context)?;
                let array_type = self.require_type(&array)?;
                if self.program.types[array_type.index()].attributes.is_array {
                    let index = self.resolve_cmd(*index)?;
                    let expected = self.program.types[array_type.index()].element_type;
                    let value = self.resolve_with_expected(value, expected)?;
                    return Ok(Cmd::WriteArrayElement {
                        pos,
                        array: Box::new(array),
                        index: Box::new(index),
                        value: Box::new(value),
                    });
                }
                let set = self.program.interner.intern("set");
                self.resolve_access(pos, Some(Box::new(array)), set, Some(vec![*index, value]))
            }
            other => self.pos_err(other.pos(), "invalid assignment target"),
        }
    }

    fn is_defaults_body(&self) -> bool {
        self.program.interner.resolve(self.method_ref().name) == "init_defaults"
    }

    fn resolve_op_with_assign(
        &mut self,
        pos: SourcePos,
        target: Cmd,
        op: TokenKind,
        value: Cmd,
    ) -> Result<Cmd> {
        match target {
            Cmd::Access { context: None, name, args: None, .. } => {
                if let Some(local_index) = self.scope.find_local(self.method_ref(), name) {
                    let local_type = self.method_ref().locals[local_index].resolved_type;
                    if local_type.map(|t| self.program.is_numeric(t)).unwrap_or(false)
                        && self.type_of(&value).map(|t| self.program.is_numeric(t)).unwrap_or(false)
                    {
                        return Ok(Cmd::LocalOpWithAssign {
                            pos,
                            local_index,
                            op,
                            value: Box::new(value),
                        });
                    }
                    let read = Cmd::ReadLocal { pos, local_index };
                    let combined = self.resolve_binary(pos, op, read, value)?;
                    return Ok(Cmd::WriteLocal { pos, local_index, value: Box::new(combined) });
                }
                let this_type = self.scope.this_type;
                if self.types_has_property(this_type, name) && self.this_available() {
                    let this = Cmd::This { pos, of_type: Some(this_type) };
                    return self.property_op_assign(pos, this, this_type, name, op, value);
                }
                if self.program.types[this_type.index()].find_global(name).is_some() {
                    if self.numeric_op_assign(this_type, name, &value, true) {
                        return Ok(Cmd::OpAssignGlobal {
                            pos,
                            owner: this_type,
                            name,
                            op,
                            value: Box::new(value),
                        });
                    }
                    let read = Cmd::ReadGlobal { pos, owner: this_type, name };
                    let combined = self.resolve_binary(pos, op, read, value)?;
                    return Ok(Cmd::WriteGlobal {
                        pos,
                        owner: this_type,
                        name,
                        value: Box::new(combined),
                    });
                }
                self.pos_err(
                    pos,
                    format!("cannot modify undefined '{}'", self.program.interner.resolve(name)),
                )
            }
            Cmd::Access { context: Some(ctx), name, args: None, .. } => {
                let ctx = self.resolve_cmd(*ctx)?;
                let ctx_type = self.require_type(&ctx)?;
                if self.types_has_property(ctx_type, name) {
                    return self.property_op_assign(pos, ctx, ctx_type, name, op, value);
                }
                self.pos_err(
                    pos,
                    format!(
                        "'{}' has no property '{}'",
                        self.program.type_name(ctx_type),
                        self.program.interner.resolve(name)
                    ),
                )
            }
            Cmd::ElementAccess { context, index, .. } => {
                let array = self.resolve_cmd(*context)?;
                let array_type = self.require_type(&array)?;
                if !self.program.types[array_type.index()].attributes.is_array {
                    return self.pos_err(pos, "compound assignment needs an array element");
                }
                let index = self.resolve_cmd(*index)?;
                let read = Cmd::ReadArrayElement {
                    pos,
                    array: Box::new(array.clone()),
                    index: Box::new(index.clone()),
                };
                let combined = self.resolve_binary(pos, op, read, value)?;
                Ok(Cmd::WriteArrayElement {
                    pos,
                    array: Box::new(array),
                    index: Box::new(index),
                    value: Box::new(combined),
                })
            }
            other => self.pos_err(other.pos(), "invalid compound-assignment target"),
        }
    }

    fn numeric_op_assign(
        &self,
        owner: TypeId,
        name: Symbol,
        value: &Cmd,
        global: bool,
    ) -> bool {
        let ty = &self.program.types[owner.index()];
        let member_type = if global {
            ty.find_global(name).and_then(|i| ty.globals[i].resolved_type)
        } else {
            ty.find_property(name).and_then(|i| ty.properties[i].resolved_type)
        };
        member_type.map(|t| self.program.is_numeric(t)).unwrap_or(false)
            && self.type_of(value).map(|t| self.program.is_numeric(t)).unwrap_or(false)
    }

    fn property_op_assign(
        &mut self,
        pos: SourcePos,
        ctx: Cmd,
        owner: TypeId,
        name: Symbol,
        op: TokenKind,
        value: Cmd,
    ) -> Result<Cmd> {
        if self.numeric_op_assign(owner, name, &value, false) {
            return Ok(Cmd::OpAssignProperty {
                pos,
                context: Box::new(ctx),
                owner,
                name,
                op,
                value: Box::new(value),
            });
        }
        let read = Cmd::ReadProperty {
            pos,
            context: Box::new(ctx.clone()),
            owner,
            name,
        };
        let combined = self.resolve_binary(pos, op, read, value)?;
        Ok(Cmd::WriteProperty {
            pos,
            context: Box::new(ctx),
            owner,
            name,
            value: Box::new(combined),
        })
    }

    fn resolve_adjust(&mut self, pos: SourcePos, target: Cmd, delta: i32) -> Result<Cmd> {
        match target {
            Cmd::Access { context: None, name, args: None, .. } => {
                if let Some(local_index) = self.scope.find_local(self.method_ref(), name) {
                    let local_type = self.method_ref().locals[local_index].resolved_type;
                    if !local_type.map(|t| self.program.is_numeric(t)).unwrap_or(false) {
                        return self.pos_err(pos, "'++'/'--' needs a numeric target");
                    }
                    return Ok(Cmd::AdjustLocal { pos, local_index, delta });
                }
                let this_type = self.scope.this_type;
                if self.types_has_property(this_type, name) && self.this_available() {
                    return Ok(Cmd::AdjustProperty {
                        pos,
                        context: Box::new(Cmd::This { pos, of_type: Some(this_type) }),
                        owner: this_type,
                        name,
                        delta,
                    });
                }
                self.pos_err(
                    pos,
                    format!("cannot adjust undefined '{}'", self.program.interner.resolve(name)),
                )
            }
            Cmd::Access { context: Some(ctx), name, args: None, .. } => {
                let ctx = self.resolve_cmd(*ctx)?;
                let ctx_type = self.require_type(&ctx)?;
                if self.types_has_property(ctx_type, name) {
                    return Ok(Cmd::AdjustProperty {
                        pos,
                        context: Box::new(ctx),
                        owner: ctx_type,
                        name,
                        delta,
                    });
                }
                self.pos_err(pos, "'++'/'--' needs a local or property target")
            }
            Cmd::ReadLocal { local_index, .. } => Ok(Cmd::AdjustLocal { pos, local_index, delta }),
            other => self.pos_err(other.pos(), "'++'/'--' needs a local or property target"),
        }
    }
}

// =============================================================================
// Operators
// =============================================================================

impl<'p> Resolver<'p> {
    fn resolve_binary(&mut self, pos: SourcePos, op: TokenKind, lhs: Cmd, rhs: Cmd) -> Result<Cmd> {
        let lhs = self.resolve_cmd(lhs)?;
        let rhs = self.resolve_cmd(rhs)?;
        if let Some(folded) = fold_binary(op, &lhs, &rhs, pos) {
            return Ok(folded);
        }
        let lhs_type = self.require_type(&lhs)?;
        let rhs_type = self.require_type(&rhs)?;

        if self.program.is_numeric(lhs_type) && self.program.is_numeric(rhs_type) {
            let (lhs, rhs) = (Box::new(lhs), Box::new(rhs));
            return Ok(match op {
                TokenKind::Plus => Cmd::Add { pos, lhs, rhs },
                TokenKind::Minus => Cmd::Subtract { pos, lhs, rhs },
                TokenKind::Times => Cmd::Multiply { pos, lhs, rhs },
                TokenKind::Slash => Cmd::Divide { pos, lhs, rhs },
                TokenKind::Percent => Cmd::Mod { pos, lhs, rhs },
                TokenKind::Power => Cmd::Power { pos, lhs, rhs },
                TokenKind::Tilde => Cmd::BitwiseXor { pos, lhs, rhs },
                TokenKind::VerticalBar => Cmd::BitwiseOr { pos, lhs, rhs },
                TokenKind::Ampersand => Cmd::BitwiseAnd { pos, lhs, rhs },
                TokenKind::ShiftLeft => Cmd::ShiftLeft { pos, lhs, rhs },
                TokenKind::ShiftRight => Cmd::ShiftRight { pos, lhs, rhs },
                TokenKind::ShiftRightX => Cmd::ShiftRightX { pos, lhs, rhs },
                other => {
                    return Err(CompileError::internal(format!(
                        "unexpected binary operator {}",
                        other.describe()
                    )))
                }
            });
        }

        // String concatenation: either side being a String routes through
        // String.operator+, which stringifies the other side.
        if op == TokenKind::Plus
            && (lhs_type == self.program.type_string || rhs_type == self.program.type_string)
        {
            let string_type = self.program.type_string;
            let lhs = self.convert_to(lhs, string_type)?;
            let operator = self.program.interner.intern("operator+");
            return self.resolve_context_access(pos, lhs, operator, Some(vec![rhs]));
        }

        // User operator method on the left operand's type.
        let operator_name = match op {
            TokenKind::Plus => "operator+",
            TokenKind::Minus => "operator-",
            TokenKind::Times => "operator*",
            TokenKind::Slash => "operator/",
            TokenKind::Percent => "operator%",
            TokenKind::Power => "operator^",
            _ => {
                return self.pos_err(
                    pos,
                    format!(
                        "no operator for '{}' and '{}'",
                        self.program.type_name(lhs_type),
                        self.program.type_name(rhs_type)
                    ),
                )
            }
        };
        let operator = self.program.interner.intern(operator_name);
        let candidates = CandidateMethods::gather(self.program, lhs_type, operator);
        if candidates.available.is_empty() {
            return self.pos_err(
                pos,
                format!(
                    "'{}' does not define '{}'",
                    self.program.type_name(lhs_type),
                    operator_name
                ),
            );
        }
        let arg_types = vec![self.type_of(&rhs)];
        let chosen = candidates.resolve(self.program, &arg_types, true, pos)?.unwrap();
        let args = self.finalize_args(chosen, vec![rhs])?;
        self.build_call(pos, Some(lhs), chosen, args)
    }

    fn resolve_bitwise(&mut self, pos: SourcePos, op: TokenKind, lhs: Cmd, rhs: Cmd) -> Result<Cmd> {
        let lhs = self.resolve_cmd(lhs)?;
        let rhs = self.resolve_cmd(rhs)?;
        if let Some(folded) = fold_binary(op, &lhs, &rhs, pos) {
            return Ok(folded);
        }
        let lhs_type = self.require_type(&lhs)?;
        let rhs_type = self.require_type(&rhs)?;
        let integral = |t: TypeId| {
            t == self.program.type_int
                || t == self.program.type_long
                || t == self.program.type_character
        };
        if !integral(lhs_type) || !integral(rhs_type) {
            return self.pos_err(pos, "bitwise and shift operators need Int or Long operands");
        }
        let (lhs, rhs) = (Box::new(lhs), Box::new(rhs));
        Ok(match op {
            TokenKind::Tilde => Cmd::BitwiseXor { pos, lhs, rhs },
            TokenKind::VerticalBar => Cmd::BitwiseOr { pos, lhs, rhs },
            TokenKind::Ampersand => Cmd::BitwiseAnd { pos, lhs, rhs },
            TokenKind::ShiftLeft => Cmd::ShiftLeft { pos, lhs, rhs },
            TokenKind::ShiftRight => Cmd::ShiftRight { pos, lhs, rhs },
            TokenKind::ShiftRightX => Cmd::ShiftRightX { pos, lhs, rhs },
            other => {
                return Err(CompileError::internal(format!(
                    "unexpected bitwise operator {}",
                    other.describe()
                )))
            }
        })
    }

    fn resolve_compare(&mut self, pos: SourcePos, op: TokenKind, lhs: Cmd, rhs: Cmd) -> Result<Cmd> {
        let lhs = self.resolve_cmd(lhs)?;
        let rhs = self.resolve_cmd(rhs)?;
        if let Some(folded) = fold_compare(op, &lhs, &rhs, pos) {
            return Ok(folded);
        }
        let lhs_type = self.require_type(&lhs)?;
        let rhs_type = self.require_type(&rhs)?;
        let string_type = self.program.type_string;

        if lhs_type == string_type && rhs_type == string_type {
            return self.resolve_string_compare(pos, op, lhs, rhs);
        }

        let comparable = (self.program.is_numeric(lhs_type) && self.program.is_numeric(rhs_type))
            || (lhs_type == self.program.type_logical && rhs_type == self.program.type_logical);
        let reference_eq = matches!(op, TokenKind::CompareEq | TokenKind::CompareNe)
            && !self.program.types[lhs_type.index()].attributes.is_value_type()
            && (!self.program.types[rhs_type.index()].attributes.is_value_type()
                || rhs_type == self.program.type_null);
        if !comparable && !reference_eq {
            return self.pos_err(
                pos,
                format!(
                    "cannot compare '{}' with '{}'",
                    self.program.type_name(lhs_type),
                    self.program.type_name(rhs_type)
                ),
            );
        }

        // Equality on objects defers to a user operator== when present.
        if reference_eq && lhs_type != self.program.type_null {
            let operator = self.program.interner.intern("operator==");
            let candidates = CandidateMethods::gather(self.program, lhs_type, operator);
            if !candidates.available.is_empty() && rhs_type != self.program.type_null {
                let arg_types = vec![Some(rhs_type)];
                if let Some(chosen) =
                    candidates.resolve(self.program, &arg_types, false, pos)?
                {
                    let args = self.finalize_args(chosen, vec![rhs])?;
                    let call = self.build_call(pos, Some(lhs), chosen, args)?;
                    return Ok(if op == TokenKind::CompareNe {
                        Cmd::LogicalNot { pos, operand: Box::new(call) }
                    } else {
                        call
                    });
                }
            }
        }

        let (lhs, rhs) = (Box::new(lhs), Box::new(rhs));
        Ok(match op {
            TokenKind::CompareEq => Cmd::CompareEq { pos, lhs, rhs },
            TokenKind::CompareNe => Cmd::CompareNe { pos, lhs, rhs },
            TokenKind::CompareLt => Cmd::CompareLt { pos, lhs, rhs },
            TokenKind::CompareLe => Cmd::CompareLe { pos, lhs, rhs },
            TokenKind::CompareGt => Cmd::CompareGt { pos, lhs, rhs },
            TokenKind::CompareGe => Cmd::CompareGe { pos, lhs, rhs },
            other => {
                return Err(CompileError::internal(format!(
                    "unexpected comparison {}",
                    other.describe()
                )))
            }
        })
    }

    /// String comparisons route through `equals`/`compare`.
    fn resolve_string_compare(
        &mut self,
        pos: SourcePos,
        op: TokenKind,
        lhs: Cmd,
        rhs: Cmd,
    ) -> Result<Cmd> {
        match op {
            TokenKind::CompareEq | TokenKind::CompareNe => {
                let equals = self.program.interner.intern("equals");
                let call = self.resolve_context_access(pos, lhs, equals, Some(vec![rhs]))?;
                Ok(if op == TokenKind::CompareNe {
                    Cmd::LogicalNot { pos, operand: Box::new(call) }
                } else {
                    call
                })
            }
            _ => {
                let compare = self.program.interner.intern("compare");
                let call = self.resolve_context_access(pos, lhs, compare, Some(vec![rhs]))?;
                let zero = Box::new(Cmd::LiteralInteger { pos, value: 0 });
                let call = Box::new(call);
                Ok(match op {
                    TokenKind::CompareLt => Cmd::CompareLt { pos, lhs: call, rhs: zero },
                    TokenKind::CompareLe => Cmd::CompareLe { pos, lhs: call, rhs: zero },
                    TokenKind::CompareGt => Cmd::CompareGt { pos, lhs: call, rhs: zero },
                    _ => Cmd::CompareGe { pos, lhs: call, rhs: zero },
                })
            }
        }
    }
}

// =============================================================================
// Desugarings: which, forEach, list literals, formatted strings, functions
// =============================================================================

impl<'p> Resolver<'p> {
    /// `which` lowers to a hidden subject local plus an if/else chain, so
    /// case values get full operator semantics (string equality included).
    fn resolve_which(
        &mut self,
        pos: SourcePos,
        subject: Cmd,
        cases: Vec<WhichCase>,
        others: Vec<Cmd>,
    ) -> Result<Cmd> {
        let subject = self.resolve_cmd(subject)?;
        let subject_type = self.require_type(&subject)?;
        let depth = self.scope.local_depth();
        let subject_local = self.add_hidden_local("which", Some(subject_type), pos);

        let mut chain = others;
        for case in cases.into_iter().rev() {
            let mut condition: Option<Cmd> = None;
            for value in case.values {
                let compare = Cmd::CompareEq {
                    pos: case.pos,
                    lhs: Box::new(Cmd::ReadLocal { pos: case.pos, local_index: subject_local }),
                    rhs: Box::new(value),
                };
                condition = Some(match condition {
                    Some(prior) => Cmd::LogicalOr {
                        pos: case.pos,
                        lhs: Box::new(prior),
                        rhs: Box::new(compare),
                    },
                    None => compare,
                });
            }
            let condition = condition.ok_or_else(|| {
                CompileError::syntax("'case' needs at least one value", case.pos)
            })?;
            chain = vec![Cmd::If {
                pos: case.pos,
                condition: Box::new(condition),
                then_statements: case.statements,
                else_statements: chain,
            }];
        }

        self.resolve_statements(&mut chain)?;
        self.scope.pop_locals_to(depth);

        let mut statements = vec![Cmd::LocalDeclaration {
            pos,
            local_index: subject_local,
            initial: Some(Box::new(subject)),
        }];
        statements.extend(chain);
        Ok(Cmd::Block { pos, statements })
    }

    /// `forEach` desugars into hidden locals plus a `GenericLoop`, driven
    /// by the collection's shape: numeric range, array, task object
    /// (`update()`/`value`), or anything with `count` and `get`.
    fn resolve_for_each(
        &mut self,
        pos: SourcePos,
        counter_name: Symbol,
        collection: Cmd,
        statements: Vec<Cmd>,
    ) -> Result<Cmd> {
        let collection = self.resolve_cmd(collection)?;
        let depth = self.scope.local_depth();
        let control_id = self.next_control_id();

        let result = match collection {
            Cmd::Range { low, high, .. } => self.lower_range_for_each(
                pos, counter_name, *low, *high, RangeKind::Inclusive, control_id, statements,
            ),
            Cmd::RangeUpTo { low, high, .. } => self.lower_range_for_each(
                pos, counter_name, *low, *high, RangeKind::UpTo, control_id, statements,
            ),
            Cmd::RangeDownTo { low, high, .. } => self.lower_range_for_each(
                pos, counter_name, *low, *high, RangeKind::DownTo, control_id, statements,
            ),
            other => {
                let collection_type = self.require_type(&other)?;
                if self.program.types[collection_type.index()].attributes.is_array {
                    self.lower_array_for_each(pos, counter_name, other, control_id, statements)
                } else if self
                    .program
                    .find_method_by_signature_str(collection_type, "update()")
                    .is_some()
                {
                    self.lower_task_for_each(pos, counter_name, other, control_id, statements)
                } else {
                    self.lower_counted_for_each(pos, counter_name, other, control_id, statements)
                }
            }
        };
        self.scope.pop_locals_to(depth);
        result
    }

    fn lower_range_for_each(
        &mut self,
        pos: SourcePos,
        counter_name: Symbol,
        low: Cmd,
        high: Cmd,
        kind: RangeKind,
        control_id: usize,
        mut statements: Vec<Cmd>,
    ) -> Result<Cmd> {
        let low_type = self.require_type(&low)?;
        let high_type = self.require_type(&high)?;
        if !self.program.is_numeric(low_type) || !self.program.is_numeric(high_type) {
            return self.pos_err(pos, "a range needs numeric bounds");
        }
        let element = self.program.common_numeric_type(low_type, high_type);
        let counter =
            self.program.method_mut(self.method).add_local(counter_name, None, pos);
        self.program.method_mut(self.method).locals[counter].resolved_type = Some(element);
        self.scope.push_local(counter);
        let end = self.add_hidden_local("end", Some(element), pos);

        self.scope
            .control_stack
            .push(ControlEntry { kind: ControlKind::Loop, id: control_id });
        self.resolve_statements(&mut statements)?;
        self.scope.control_stack.pop();

        let counter_read = Box::new(Cmd::ReadLocal { pos, local_index: counter });
        let end_read = Box::new(Cmd::ReadLocal { pos, local_index: end });
        let condition = match kind {
            RangeKind::Inclusive => Cmd::CompareLe { pos, lhs: counter_read, rhs: end_read },
            RangeKind::UpTo => Cmd::CompareLt { pos, lhs: counter_read, rhs: end_read },
            RangeKind::DownTo => Cmd::CompareGe { pos, lhs: counter_read, rhs: end_read },
        };
        let delta = if kind == RangeKind::DownTo { -1 } else { 1 };
        let increment = Cmd::AdjustLocal { pos, local_index: counter, delta };
        Ok(Cmd::Block {
            pos,
            statements: vec![
                Cmd::LocalDeclaration { pos, local_index: counter, initial: Some(Box::new(low)) },
                Cmd::LocalDeclaration { pos, local_index: end, initial: Some(Box::new(high)) },
                Cmd::GenericLoop {
                    pos,
                    condition: Some(Box::new(condition)),
                    increment: Some(Box::new(increment)),
                    statements,
                    control_id,
                },
            ],
        })
    }

    fn lower_array_for_each(
        &mut self,
        pos: SourcePos,
        counter_name: Symbol,
        collection: Cmd,
        control_id: usize,
        mut statements: Vec<Cmd>,
    ) -> Result<Cmd> {
        let collection_type = self.require_type(&collection)?;
        let element = self.program.types[collection_type.index()].element_type.unwrap();
        let coll = self.add_hidden_local("coll", Some(collection_type), pos);
        let index = self.add_hidden_local("index", Some(self.program.type_int), pos);
        let counter =
            self.program.method_mut(self.method).add_local(counter_name, None, pos);
        self.program.method_mut(self.method).locals[counter].resolved_type = Some(element);
        self.scope.push_local(counter);

        self.scope
            .control_stack
            .push(ControlEntry { kind: ControlKind::Loop, id: control_id });
        self.resolve_statements(&mut statements)?;
        self.scope.control_stack.pop();

        let condition = Cmd::CompareLt {
            pos,
            lhs: Box::new(Cmd::ReadLocal { pos, local_index: index }),
            rhs: Box::new(Cmd::ReadArrayCount {
                pos,
                array: Box::new(Cmd::ReadLocal { pos, local_index: coll }),
            }),
        };
        let mut body = vec![Cmd::LocalDeclaration {
            pos,
            local_index: counter,
            initial: Some(Box::new(Cmd::ReadArrayElement {
                pos,
                array: Box::new(Cmd::ReadLocal { pos, local_index: coll }),
                index: Box::new(Cmd::ReadLocal { pos, local_index: index }),
            })),
        }];
        body.extend(statements);
        Ok(Cmd::Block {
            pos,
            statements: vec![
                Cmd::LocalDeclaration {
                    pos,
                    local_index: coll,
                    initial: Some(Box::new(collection)),
                },
                Cmd::LocalDeclaration {
                    pos,
                    local_index: index,
                    initial: Some(Box::new(Cmd::LiteralInteger { pos, value: 0 })),
                },
                Cmd::GenericLoop {
                    pos,
                    condition: Some(Box::new(condition)),
                    increment: Some(Box::new(Cmd::AdjustLocal {
                        pos,
                        local_index: index,
                        delta: 1,
                    })),
                    statements: body,
                    control_id,
                },
            ],
        })
    }

    fn lower_task_for_each(
        &mut self,
        pos: SourcePos,
        counter_name: Symbol,
        collection: Cmd,
        control_id: usize,
        mut statements: Vec<Cmd>,
    ) -> Result<Cmd> {
        let collection_type = self.require_type(&collection)?;
        let task = self.add_hidden_local("task", Some(collection_type), pos);
        let update = self.program.interner.intern("update");
        let value_name = self.program.interner.intern("value");

        let condition = self.resolve_context_access(
            pos,
            Cmd::ReadLocal { pos, local_index: task },
            update,
            Some(Vec::new()),
        )?;
        let element_read = self.resolve_context_access(
            pos,
            Cmd::ReadLocal { pos, local_index: task },
            value_name,
            None,
        )?;
        let element = self.require_type(&element_read)?;
        let counter =
            self.program.method_mut(self.method).add_local(counter_name, None, pos);
        self.program.method_mut(self.method).locals[counter].resolved_type = Some(element);
        self.scope.push_local(counter);

        self.scope
            .control_stack
            .push(ControlEntry { kind: ControlKind::Loop, id: control_id });
        self.resolve_statements(&mut statements)?;
        self.scope.control_stack.pop();

        let mut body = vec![Cmd::LocalDeclaration {
            pos,
            local_index: counter,
            initial: Some(Box::new(element_read)),
        }];
        body.extend(statements);
        Ok(Cmd::Block {
            pos,
            statements: vec![
                Cmd::LocalDeclaration { pos, local_index: task, initial: Some(Box::new(collection)) },
                Cmd::GenericLoop {
                    pos,
                    condition: Some(Box::new(condition)),
                    increment: None,
                    statements: body,
                    control_id,
                },
            ],
        })
    }

    fn lower_counted_for_each(
        &mut self,
        pos: SourcePos,
        counter_name: Symbol,
        collection: Cmd,
        control_id: usize,
        mut statements: Vec<Cmd>,
    ) -> Result<Cmd> {
        let collection_type = self.require_type(&collection)?;
        let coll = self.add_hidden_local("coll", Some(collection_type), pos);
        let index = self.add_hidden_local("index", Some(self.program.type_int), pos);
        let count_name = self.program.interner.intern("count");
        let get = self.program.interner.intern("get");

        let count_read = self.resolve_context_access(
            pos,
            Cmd::ReadLocal { pos, local_index: coll },
            count_name,
            None,
        )?;
        let element_read = self.resolve_context_access(
            pos,
            Cmd::ReadLocal { pos, local_index: coll },
            get,
            Some(vec![Cmd::ReadLocal { pos, local_index: index }]),
        )?;
        let element = self.require_type(&element_read)?;
        let counter =
            self.program.method_mut(self.method).add_local(counter_name, None, pos);
        self.program.method_mut(self.method).locals[counter].resolved_type = Some(element);
        self.scope.push_local(counter);

        self.scope
            .control_stack
            .push(ControlEntry { kind: ControlKind::Loop, id: control_id });
        self.resolve_statements(&mut statements)?;
        self.scope.control_stack.pop();

        let condition = Cmd::CompareLt {
            pos,
            lhs: Box::new(Cmd::ReadLocal { pos, local_index: index }),
            rhs: Box::new(count_read),
        };
        let mut body = vec![Cmd::LocalDeclaration {
            pos,
            local_index: counter,
            initial: Some(Box::new(element_read)),
        }];
        body.extend(statements);
        Ok(Cmd::Block {
            pos,
            statements: vec![
                Cmd::LocalDeclaration { pos, local_index: coll, initial: Some(Box::new(collection)) },
                Cmd::LocalDeclaration {
                    pos,
                    local_index: index,
                    initial: Some(Box::new(Cmd::LiteralInteger { pos, value: 0 })),
                },
                Cmd::GenericLoop {
                    pos,
                    condition: Some(Box::new(condition)),
                    increment: Some(Box::new(Cmd::AdjustLocal {
                        pos,
                        local_index: index,
                        delta: 1,
                    })),
                    statements: body,
                    control_id,
                },
            ],
        })
    }

    /// `[a, b, c]` becomes `List<<T>>().add(a).add(b).add(c)`; `add`
    /// returns the list, so the chain stays a single expression.
    fn resolve_list_literal(&mut self, pos: SourcePos, args: Vec<Cmd>) -> Result<Cmd> {
        if args.is_empty() {
            return self.pos_err(
                pos,
                "an empty list literal needs a declared type on the target",
            );
        }
        let args = self.resolve_args(args)?;
        let element = self.require_type(&args[0])?;
        for arg in &args[1..] {
            let arg_type = self.require_type(arg)?;
            if self.program.implicit_conversion_cost(arg_type, element).is_none() {
                return self.pos_err(
                    arg.pos(),
                    format!(
                        "list elements must fit '{}', found '{}'",
                        self.program.type_name(element),
                        self.program.type_name(arg_type)
                    ),
                );
            }
        }
        let list_name = format!("List<<{}>>", self.program.type_name(element));
        let list_sym = self.program.interner.intern(&list_name);
        let mut chain = Cmd::Access { pos, context: None, name: list_sym, args: Some(Vec::new()) };
        let add = self.program.interner.intern("add");
        for arg in args {
            chain = Cmd::Access {
                pos,
                context: Some(Box::new(chain)),
                name: add,
                args: Some(vec![arg]),
            };
        }
        self.resolve_cmd(chain)
    }

    /// Formatted strings lower to a chain of `String.operator+` calls over
    /// the literal chunks and stringified parts.
    fn resolve_formatted(&mut self, pos: SourcePos, format: String, parts: Vec<Cmd>) -> Result<Cmd> {
        let marker = crate::parser::FORMAT_PART_MARKER;
        let chunks: Vec<&str> = format.split(marker).collect();
        let mut expr = Cmd::LiteralString { pos, value: chunks[0].to_string(), index: None };
        for (chunk, part) in chunks[1..].iter().zip(parts.into_iter()) {
            expr = Cmd::Add { pos, lhs: Box::new(expr), rhs: Box::new(part) };
            if !chunk.is_empty() {
                expr = Cmd::Add {
                    pos,
                    lhs: Box::new(expr),
                    rhs: Box::new(Cmd::LiteralString {
                        pos,
                        value: chunk.to_string(),
                        index: None,
                    }),
                };
            }
        }
        self.resolve_cmd(expr)
    }

    /// A function literal becomes a hidden routine on the enclosing type
    /// plus a callback pointing at it.
    fn resolve_function_literal(
        &mut self,
        pos: SourcePos,
        parameters: Vec<crate::ast::FunctionParameter>,
        return_type: Option<Symbol>,
        statements: Vec<Cmd>,
    ) -> Result<Cmd> {
        let mut declared = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            let Some(declared_type) = parameter.declared_type else {
                return self.pos_err(parameter.pos, "function parameters need declared types");
            };
            declared.push(crate::template::ParameterDecl {
                name: parameter.name,
                declared_type,
                default: None,
                pos: parameter.pos,
            });
        }
        let name = format!("on_function_{}", self.program.methods.len());
        let name_sym = self.program.interner.intern(&name);
        let decl = crate::template::MethodDecl {
            name: name_sym,
            parameters: declared,
            return_type_name: return_type,
            task_result_type_name: None,
            attributes: MethodAttributes::default(),
            native_code: None,
            statements,
            pos,
        };
        let owner = self.scope.this_type;
        let method = self.program.add_method(owner, &decl, true);
        self.program.types[owner.index()].routines.push(method);

        // Callbacks share one opaque type.
        let callback_sym = self.program.interner.intern("Callback");
        let callback = self.program.type_reference(pos, callback_sym);
        if !self.program.types[callback.index()].defined {
            self.program.types[callback.index()].defined = true;
            self.program.types[callback.index()].organized = true;
            self.program.types[callback.index()].resolved = true;
        }

        Ok(Cmd::CreateCallback { pos, context: None, method })
    }
}

// =============================================================================
// Literal folding (continued)
// =============================================================================

fn literal_i64(cmd: &Cmd) -> Option<(i64, bool)> {
    match cmd {
        Cmd::LiteralInteger { value, .. } => Some((*value as i64, false)),
        Cmd::LiteralLong { value, .. } => Some((*value, true)),
        _ => None,
    }
}

fn literal_f64(cmd: &Cmd) -> Option<f64> {
    match cmd {
        Cmd::LiteralInteger { value, .. } => Some(*value as f64),
        Cmd::LiteralLong { value, .. } => Some(*value as f64),
        Cmd::LiteralReal { value, .. } => Some(*value),
        _ => None,
    }
}

fn make_integer(pos: SourcePos, value: i64, long: bool) -> Cmd {
    if long {
        Cmd::LiteralLong { pos, value }
    } else {
        Cmd::LiteralInteger { pos, value: value as i32 }
    }
}

fn fold_binary(op: TokenKind, lhs: &Cmd, rhs: &Cmd, pos: SourcePos) -> Option<Cmd> {
    // String concatenation of two literals.
    if op == TokenKind::Plus {
        if let (Cmd::LiteralString { value: a, .. }, Cmd::LiteralString { value: b, .. }) =
            (lhs, rhs)
        {
            return Some(Cmd::LiteralString {
                pos,
                value: format!("{}{}", a, b),
                index: None,
            });
        }
    }

    let real = matches!(lhs, Cmd::LiteralReal { .. }) || matches!(rhs, Cmd::LiteralReal { .. });
    if real {
        let a = literal_f64(lhs)?;
        let b = literal_f64(rhs)?;
        let value = match op {
            TokenKind::Plus => a + b,
            TokenKind::Minus => a - b,
            TokenKind::Times => a * b,
            TokenKind::Slash => a / b,
            TokenKind::Percent => a % b,
            TokenKind::Power => a.powf(b),
            _ => return None,
        };
        return Some(Cmd::LiteralReal { pos, value });
    }

    let (a, a_long) = literal_i64(lhs)?;
    let (b, b_long) = literal_i64(rhs)?;
    let long = a_long || b_long;
    let value = match op {
        TokenKind::Plus => a.wrapping_add(b),
        TokenKind::Minus => a.wrapping_sub(b),
        TokenKind::Times => a.wrapping_mul(b),
        TokenKind::Slash => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        TokenKind::Percent => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        TokenKind::Tilde => a ^ b,
        TokenKind::VerticalBar => a | b,
        TokenKind::Ampersand => a & b,
        TokenKind::ShiftLeft => {
            if long {
                a.wrapping_shl(b as u32)
            } else {
                ((a as i32).wrapping_shl(b as u32)) as i64
            }
        }
        TokenKind::ShiftRight => {
            if long {
                a.wrapping_shr(b as u32)
            } else {
                ((a as i32).wrapping_shr(b as u32)) as i64
            }
        }
        TokenKind::ShiftRightX => {
            if long {
                ((a as u64).wrapping_shr(b as u32)) as i64
            } else {
                ((a as u32).wrapping_shr(b as u32)) as i64
            }
        }
        _ => return None,
    };
    Some(make_integer(pos, value, long))
}

fn fold_compare(op: TokenKind, lhs: &Cmd, rhs: &Cmd, pos: SourcePos) -> Option<Cmd> {
    if let (Cmd::LiteralString { value: a, .. }, Cmd::LiteralString { value: b, .. }) = (lhs, rhs) {
        let value = match op {
            TokenKind::CompareEq => a == b,
            TokenKind::CompareNe => a != b,
            TokenKind::CompareLt => a < b,
            TokenKind::CompareLe => a <= b,
            TokenKind::CompareGt => a > b,
            TokenKind::CompareGe => a >= b,
            _ => return None,
        };
        return Some(Cmd::LiteralLogical { pos, value });
    }
    let a = literal_f64(lhs)?;
    let b = literal_f64(rhs)?;
    let value = match op {
        TokenKind::CompareEq => a == b,
        TokenKind::CompareNe => a != b,
        TokenKind::CompareLt => a < b,
        TokenKind::CompareLe => a <= b,
        TokenKind::CompareGt => a > b,
        TokenKind::CompareGe => a >= b,
        _ => return None,
    };
    Some(Cmd::LiteralLogical { pos, value })
}
