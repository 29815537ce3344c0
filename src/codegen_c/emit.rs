//! Statement and expression emission.
//!
//! Expressions render to strings; statements append indented lines. A
//! statement may first hoist impure sub-expressions (dynamic-call
//! receivers, compound-assignment contexts) into temporaries so nothing
//! with side effects is evaluated twice.

use super::types::{
    c_return_type, c_type, c_zero_value, global_var_name, is_reference, local_var_name,
    method_fn_name, property_field_name, type_struct_name,
};
use crate::ast::Cmd;
use crate::error::{CompileError, Result};
use crate::program::{MethodId, Program, TypeId};
use crate::resolve::cmd_type;
use crate::token::TokenKind;
use rustc_hash::FxHashMap;
use std::fmt::Write as _;

pub(super) struct EmitContext<'p> {
    pub program: &'p Program,
    pub method: MethodId,
    /// Runtime type indices assigned to used types.
    pub type_index: &'p FxHashMap<TypeId, usize>,
    /// Temp declarations hoisted out of the statement being emitted.
    pub temps: Vec<String>,
    pub temp_counter: usize,
    /// Inside an `init`-style method that returns its receiver.
    pub returns_this: bool,
}

impl<'p> EmitContext<'p> {
    pub fn new(
        program: &'p Program,
        method: MethodId,
        type_index: &'p FxHashMap<TypeId, usize>,
    ) -> Self {
        let m = &program.methods[method.index()];
        let returns_this = !m.is_routine
            && m.return_type.is_none()
            && program.interner.resolve(m.name) == "init";
        EmitContext {
            program,
            method,
            type_index,
            temps: Vec::new(),
            temp_counter: 0,
            returns_this,
        }
    }

    fn type_of(&self, cmd: &Cmd) -> Option<TypeId> {
        cmd_type(cmd, self.program, &self.program.methods[self.method.index()])
    }

    fn runtime_index(&self, id: TypeId) -> Result<usize> {
        self.type_index.get(&id).copied().ok_or_else(|| {
            CompileError::internal(format!(
                "type '{}' reached emission without a runtime index",
                self.program.type_name(id)
            ))
        })
    }

    fn local_name(&self, index: usize) -> String {
        let local = &self.program.methods[self.method.index()].locals[index];
        local_var_name(self.program, local.name, index)
    }

    fn hoist(&mut self, expr: String, c_type_text: &str) -> String {
        self.temp_counter += 1;
        let name = format!("_tmp_{}", self.temp_counter);
        self.temps.push(format!("{} {} = {};", c_type_text, name, expr));
        name
    }

    /// Contexts safe to evaluate twice.
    fn is_pure(&self, cmd: &Cmd) -> bool {
        match cmd {
            Cmd::This { .. }
            | Cmd::ReadLocal { .. }
            | Cmd::ReadGlobal { .. }
            | Cmd::LiteralNull { .. } => true,
            Cmd::ReadProperty { context, .. } => self.is_pure(context),
            _ => false,
        }
    }

    /// Emits a context expression once, hoisting when impure.
    fn context_once(&mut self, cmd: &Cmd) -> Result<String> {
        let text = self.expr(cmd)?;
        if self.is_pure(cmd) {
            return Ok(text);
        }
        let context_type = self.type_of(cmd).ok_or_else(|| {
            CompileError::internal("context expression has no type at emission")
        })?;
        let c = c_type(self.program, context_type);
        Ok(self.hoist(text, &c))
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    pub fn expr(&mut self, cmd: &Cmd) -> Result<String> {
        use Cmd::*;
        Ok(match cmd {
            LiteralInteger { value, .. } => format!("{}", value),
            LiteralLong { value, .. } => format!("INT64_C({})", value),
            LiteralReal { value, .. } => {
                let text = format!("{:?}", value);
                text
            }
            LiteralCharacter { value, .. } => {
                format!("((ArgonCharacter){})", *value as u32)
            }
            LiteralLogical { value, .. } => {
                if *value { "true".to_string() } else { "false".to_string() }
            }
            LiteralString { index, .. } => {
                let index = index.ok_or_else(|| {
                    CompileError::internal("literal string missing its pool index")
                })?;
                format!("Argon_literal_strings[{}]", index)
            }
            LiteralNull { .. } => "NULL".to_string(),
            This { .. } => "this_".to_string(),
            DefaultValue { of_type, .. } => c_zero_value(self.program, Some(*of_type)),

            ReadLocal { local_index, .. } => self.local_name(*local_index),
            ReadGlobal { owner, name, .. } => global_var_name(self.program, *owner, *name),
            ReadProperty { context, owner, name, .. } => {
                let accessor = self.member_accessor(*owner);
                format!(
                    "({}){}{}",
                    self.expr(context)?,
                    accessor,
                    property_field_name(self.program, *name)
                )
            }
            ReadSingleton { of_type, .. } => {
                let index = self.runtime_index(*of_type)?;
                format!(
                    "(({}*)Argon_singleton(&Argon_types[{}]))",
                    type_struct_name(self.program, *of_type),
                    index
                )
            }
            ReadArrayElement { array, index, .. } => {
                let element = self.array_element_c_type(array)?;
                format!(
                    "((({}*)Argon_array_data({}))[{}])",
                    element,
                    self.expr(array)?,
                    self.expr(index)?
                )
            }
            ReadArrayCount { array, .. } => format!("(({})->count)", self.expr(array)?),

            AdjustLocal { local_index, delta, .. } => {
                let name = self.local_name(*local_index);
                if *delta >= 0 {
                    format!("{}++", name)
                } else {
                    format!("{}--", name)
                }
            }
            AdjustProperty { context, owner, name, delta, .. } => {
                let target = format!(
                    "({}){}{}",
                    self.context_once(context)?,
                    self.member_accessor(*owner),
                    property_field_name(self.program, *name)
                );
                if *delta >= 0 {
                    format!("{}++", target)
                } else {
                    format!("{}--", target)
                }
            }

            CreateObject { of_type, init, args, .. } => {
                let index = self.runtime_index(*of_type)?;
                let struct_name = type_struct_name(self.program, *of_type);
                let allocation =
                    format!("(({}*)Argon_create_object(&Argon_types[{}]))", struct_name, index);
                match init {
                    Some(init) => {
                        // init may live on a base class; cast the receiver
                        // in and the chained result back out.
                        let init_owner = self.program.methods[init.index()].owner;
                        let mut call = format!(
                            "(({}*){}(({}*){}",
                            struct_name,
                            method_fn_name(self.program, *init),
                            type_struct_name(self.program, init_owner),
                            allocation
                        );
                        for (i, arg) in args.iter().enumerate() {
                            call.push_str(", ");
                            call.push_str(&self.argument(*init, i, arg)?);
                        }
                        call.push_str("))");
                        call
                    }
                    None => allocation,
                }
            }
            CreateArray { element_type, count, .. } => {
                let element = c_type(self.program, *element_type);
                format!(
                    "Argon_create_array({}, (ArgonInt32)sizeof({}), {})",
                    self.expr(count)?,
                    element,
                    if is_reference(self.program, *element_type) { "true" } else { "false" }
                )
            }
            CreateCompound { of_type, args, .. } => {
                let struct_name = type_struct_name(self.program, *of_type);
                if args.is_empty() {
                    format!("(({}){{0}})", struct_name)
                } else {
                    let mut out = format!("(({}){{", struct_name);
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&self.expr(arg)?);
                    }
                    out.push_str("})");
                    out
                }
            }
            CreateOptionalValue { of_type, value, .. } => {
                let struct_name = type_struct_name(self.program, *of_type);
                match value {
                    Some(value) => format!(
                        "(({}){{ {}, true }})",
                        struct_name,
                        self.expr(value)?
                    ),
                    None => format!("(({}){{0}})", struct_name),
                }
            }
            CreateCallback { method, .. } => {
                format!("((void*){})", method_fn_name(self.program, *method))
            }

            Add { lhs, rhs, .. } => self.binary("+", lhs, rhs)?,
            Subtract { lhs, rhs, .. } => self.binary("-", lhs, rhs)?,
            Multiply { lhs, rhs, .. } => self.binary("*", lhs, rhs)?,
            Divide { lhs, rhs, .. } => self.binary("/", lhs, rhs)?,
            Mod { lhs, rhs, .. } => {
                if self.is_real_pair(lhs, rhs) {
                    format!("fmod({}, {})", self.expr(lhs)?, self.expr(rhs)?)
                } else {
                    self.binary("%", lhs, rhs)?
                }
            }
            Power { lhs, rhs, .. } => {
                if self.is_real_pair(lhs, rhs) {
                    format!("pow({}, {})", self.expr(lhs)?, self.expr(rhs)?)
                } else if self.is_long_pair(lhs, rhs) {
                    format!("Argon_pow_int64({}, {})", self.expr(lhs)?, self.expr(rhs)?)
                } else {
                    format!("Argon_pow_int32({}, {})", self.expr(lhs)?, self.expr(rhs)?)
                }
            }
            BitwiseXor { lhs, rhs, .. } => self.binary("^", lhs, rhs)?,
            BitwiseOr { lhs, rhs, .. } => self.binary("|", lhs, rhs)?,
            BitwiseAnd { lhs, rhs, .. } => self.binary("&", lhs, rhs)?,
            ShiftLeft { lhs, rhs, .. } => self.binary("<<", lhs, rhs)?,
            ShiftRight { lhs, rhs, .. } => self.binary(">>", lhs, rhs)?,
            ShiftRightX { lhs, rhs, .. } => {
                if self.is_long_pair(lhs, rhs) {
                    format!(
                        "((ArgonInt64)(((uint64_t)({})) >> ({})))",
                        self.expr(lhs)?,
                        self.expr(rhs)?
                    )
                } else {
                    format!(
                        "((ArgonInt32)(((uint32_t)({})) >> ({})))",
                        self.expr(lhs)?,
                        self.expr(rhs)?
                    )
                }
            }
            BitwiseNot { operand, .. } => format!("(~({}))", self.expr(operand)?),
            Negate { operand, .. } => format!("(-({}))", self.expr(operand)?),
            Logicalize { operand, .. } => self.logicalize(operand)?,
            LogicalNot { operand, .. } => format!("(!({}))", self.expr(operand)?),
            LogicalOr { lhs, rhs, .. } => self.binary("||", lhs, rhs)?,
            LogicalAnd { lhs, rhs, .. } => self.binary("&&", lhs, rhs)?,
            LogicalXor { lhs, rhs, .. } => self.binary("!=", lhs, rhs)?,
            CompareEq { lhs, rhs, .. } | CompareIs { lhs, rhs, .. } => {
                self.compare("==", lhs, rhs)?
            }
            CompareNe { lhs, rhs, .. } | CompareIsNot { lhs, rhs, .. } => {
                self.compare("!=", lhs, rhs)?
            }
            CompareLt { lhs, rhs, .. } => self.binary("<", lhs, rhs)?,
            CompareLe { lhs, rhs, .. } => self.binary("<=", lhs, rhs)?,
            CompareGt { lhs, rhs, .. } => self.binary(">", lhs, rhs)?,
            CompareGe { lhs, rhs, .. } => self.binary(">=", lhs, rhs)?,

            InstanceOf { operand, of_type, .. } => {
                let index = self.runtime_index(of_type.ok_or_else(|| {
                    CompileError::internal("instanceOf reached emission unresolved")
                })?)?;
                format!(
                    "Argon_instance_of((ArgonObject*)({}), {})",
                    self.expr(operand)?,
                    index
                )
            }
            NotInstanceOf { operand, of_type, .. } => {
                let index = self.runtime_index(of_type.ok_or_else(|| {
                    CompileError::internal("notInstanceOf reached emission unresolved")
                })?)?;
                format!(
                    "(!Argon_instance_of((ArgonObject*)({}), {}))",
                    self.expr(operand)?,
                    index
                )
            }
            CastToType { operand, of_type, .. } => {
                let target = c_type(self.program, *of_type);
                if is_reference(self.program, *of_type) {
                    let index = self.runtime_index(*of_type)?;
                    format!(
                        "(({})Argon_check_cast((ArgonObject*)({}), {}))",
                        target,
                        self.expr(operand)?,
                        index
                    )
                } else {
                    format!("(({})({}))", target, self.expr(operand)?)
                }
            }
            As { operand, of_type, .. } => {
                let of_type = of_type.ok_or_else(|| {
                    CompileError::internal("'as' reached emission unresolved")
                })?;
                let index = self.runtime_index(of_type)?;
                format!(
                    "(({})Argon_as((ArgonObject*)({}), {}))",
                    c_type(self.program, of_type),
                    self.expr(operand)?,
                    index
                )
            }
            ConvertToType { operand, of_type, .. }
            | ConvertToPrimitiveType { operand, of_type, .. } => {
                format!("(({})({}))", c_type(self.program, *of_type), self.expr(operand)?)
            }

            CallRoutine { method, args, .. }
            | CallNativeRoutine { method, args, .. } => {
                let mut out = format!("{}(", method_fn_name(self.program, *method));
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.argument(*method, i, arg)?);
                }
                out.push(')');
                out
            }
            CallInlineNativeRoutine { method, args, .. } => {
                self.inline_native(*method, None, args)?
            }
            CallStaticMethod { context, method, args, .. }
            | CallNativeMethod { context, method, args, .. } => {
                self.direct_method_call(*method, context, args)?
            }
            CallInlineNativeMethod { context, method, args, .. } => {
                self.inline_native(*method, Some(context), args)?
            }
            CallPriorMethod { method, args, .. } => {
                let owner = self.program.methods[method.index()].owner;
                let mut out = format!(
                    "{}(({}*)this_",
                    method_fn_name(self.program, *method),
                    type_struct_name(self.program, owner)
                );
                for (i, arg) in args.iter().enumerate() {
                    out.push_str(", ");
                    out.push_str(&self.argument(*method, i, arg)?);
                }
                out.push(')');
                out
            }
            CallDynamicMethod { context, method, args, .. } => {
                self.dynamic_call(*method, context, args)?
            }
            CallAspectMethod { context, method, args, .. } => {
                let mut out = format!(
                    "f_aspect_{}((ArgonObject*)({})",
                    method.index(),
                    self.context_once(context)?
                );
                for (i, arg) in args.iter().enumerate() {
                    out.push_str(", ");
                    out.push_str(&self.argument(*method, i, arg)?);
                }
                out.push(')');
                out
            }

            other => {
                return Err(CompileError::internal(format!(
                    "node not valid as a C expression at line {}",
                    other.pos().line
                )))
            }
        })
    }

    fn member_accessor(&self, owner: TypeId) -> &'static str {
        if self.program.types[owner.index()].attributes.is_value_type() {
            "."
        } else {
            "->"
        }
    }

    fn array_element_c_type(&self, array: &Cmd) -> Result<String> {
        let array_type = self.type_of(array).ok_or_else(|| {
            CompileError::internal("array expression has no type at emission")
        })?;
        let element = self.program.types[array_type.index()].element_type.ok_or_else(|| {
            CompileError::internal("array type without an element type")
        })?;
        Ok(c_type(self.program, element))
    }

    fn is_real_pair(&self, lhs: &Cmd, rhs: &Cmd) -> bool {
        let real = self.program.type_real;
        self.type_of(lhs) == Some(real) || self.type_of(rhs) == Some(real)
    }

    fn is_long_pair(&self, lhs: &Cmd, rhs: &Cmd) -> bool {
        let long = self.program.type_long;
        self.type_of(lhs) == Some(long) || self.type_of(rhs) == Some(long)
    }

    fn binary(&mut self, op: &str, lhs: &Cmd, rhs: &Cmd) -> Result<String> {
        Ok(format!("(({}) {} ({}))", self.expr(lhs)?, op, self.expr(rhs)?))
    }

    /// Equality over references compares as untyped pointers so sibling
    /// types and null mix freely.
    fn compare(&mut self, op: &str, lhs: &Cmd, rhs: &Cmd) -> Result<String> {
        let reference = self
            .type_of(lhs)
            .map(|t| is_reference(self.program, t))
            .unwrap_or(false);
        if reference {
            Ok(format!(
                "((void*)({}) {} (void*)({}))",
                self.expr(lhs)?,
                op,
                self.expr(rhs)?
            ))
        } else {
            self.binary(op, lhs, rhs)
        }
    }

    fn logicalize(&mut self, operand: &Cmd) -> Result<String> {
        let operand_type = self.type_of(operand);
        let text = self.expr(operand)?;
        Ok(match operand_type {
            Some(t) if t == self.program.type_logical => text,
            Some(t) if self.program.types[t.index()].attributes.is_optional => {
                format!("(({}).exists)", text)
            }
            Some(t) if is_reference(self.program, t) => format!("(({}) != NULL)", text),
            _ => format!("(({}) != 0)", text),
        })
    }

    /// An argument, cast to the parameter's C type when both are pointers.
    fn argument(&mut self, method: MethodId, index: usize, arg: &Cmd) -> Result<String> {
        let text = self.expr(arg)?;
        let parameter_type = self.program.methods[method.index()]
            .parameters
            .get(index)
            .and_then(|p| p.resolved_type);
        if let Some(parameter_type) = parameter_type {
            if is_reference(self.program, parameter_type) {
                let arg_type = self.type_of(arg);
                if arg_type != Some(parameter_type) {
                    return Ok(format!("(({})({}))", c_type(self.program, parameter_type), text));
                }
            }
        }
        Ok(text)
    }

    fn direct_method_call(&mut self, method: MethodId, context: &Cmd, args: &[Cmd]) -> Result<String> {
        let owner = self.program.methods[method.index()].owner;
        // Value-type receivers pass by value; references cast to the
        // declaring class's struct.
        let mut out = if self.program.types[owner.index()].attributes.is_value_type() {
            format!("{}({}", method_fn_name(self.program, method), self.expr(context)?)
        } else {
            format!(
                "{}(({}*)({})",
                method_fn_name(self.program, method),
                type_struct_name(self.program, owner),
                self.expr(context)?
            )
        };
        for (i, arg) in args.iter().enumerate() {
            out.push_str(", ");
            out.push_str(&self.argument(method, i, arg)?);
        }
        out.push(')');
        Ok(out)
    }

    /// One fetch from the global dispatch table: the receiver's type gives
    /// the base, the method its slot.
    fn dynamic_call(&mut self, method: MethodId, context: &Cmd, args: &[Cmd]) -> Result<String> {
        let m = &self.program.methods[method.index()];
        let owner = m.owner;
        let slot = m.index;
        let receiver = self.context_once(context)?;

        let mut signature = format!(
            "{} (*)({}*",
            c_return_type(self.program, method),
            type_struct_name(self.program, owner)
        );
        for parameter in &m.parameters {
            signature.push_str(", ");
            signature.push_str(&c_type(
                self.program,
                parameter.resolved_type.unwrap_or(self.program.type_object),
            ));
        }
        signature.push(')');

        let mut out = format!(
            "(({})Argon_dispatch[((ArgonObject*)({}))->type->dispatch_base + {}])(({}*)({})",
            signature,
            receiver,
            slot,
            type_struct_name(self.program, owner),
            receiver
        );
        for (i, arg) in args.iter().enumerate() {
            out.push_str(", ");
            out.push_str(&self.argument(method, i, arg)?);
        }
        out.push(')');
        Ok(out)
    }

    /// Splices an inline native body, substituting `$this` and `$paramN`.
    fn inline_native(
        &mut self,
        method: MethodId,
        context: Option<&Cmd>,
        args: &[Cmd],
    ) -> Result<String> {
        let code = self.program.methods[method.index()]
            .native_code
            .clone()
            .ok_or_else(|| CompileError::internal("inline native call without a body"))?;

        let this_text = match context {
            Some(context) => self.context_once(context)?,
            None => String::new(),
        };
        let mut arg_texts = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let text = self.argument(method, i, arg)?;
            if self.is_pure(arg) || arg.is_literal() {
                arg_texts.push(text);
            } else {
                let arg_type = self
                    .type_of(arg)
                    .map(|t| c_type(self.program, t))
                    .unwrap_or_else(|| "ArgonInt64".to_string());
                arg_texts.push(self.hoist(text, &arg_type));
            }
        }

        let mut out = code;
        // Longest markers first so $param10 is untouched by $param1.
        for i in (0..arg_texts.len()).rev() {
            out = out.replace(&format!("$param{}", i), &arg_texts[i]);
        }
        out = out.replace("$this", &format!("({})", this_text));
        Ok(format!("({})", out))
    }

    // =========================================================================
    // Statements
    // =========================================================================

    pub fn statement(&mut self, cmd: &Cmd, out: &mut String, indent: usize) -> Result<()> {
        let outer = std::mem::take(&mut self.temps);
        let mut body = String::new();
        let outcome = self.statement_inner(cmd, &mut body, indent);
        for temp in self.temps.drain(..) {
            write_line(out, indent, &temp);
        }
        out.push_str(&body);
        self.temps = outer;
        outcome
    }

    fn block(&mut self, statements: &[Cmd], out: &mut String, indent: usize) -> Result<()> {
        for statement in statements {
            self.statement(statement, out, indent)?;
        }
        Ok(())
    }

    fn statement_inner(&mut self, cmd: &Cmd, out: &mut String, indent: usize) -> Result<()> {
        use Cmd::*;
        match cmd {
            Block { statements, .. } => {
                write_line(out, indent, "{");
                self.block(statements, out, indent + 1)?;
                write_line(out, indent, "}");
            }
            LocalDeclaration { local_index, initial, .. } => {
                if let Some(initial) = initial {
                    let value = self.assigned_value(
                        initial,
                        self.program.methods[self.method.index()].locals[*local_index]
                            .resolved_type,
                    )?;
                    write_line(out, indent, &format!("{} = {};", self.local_name(*local_index), value));
                }
            }
            WriteLocal { local_index, value, .. } => {
                let value = self.assigned_value(
                    value,
                    self.program.methods[self.method.index()].locals[*local_index].resolved_type,
                )?;
                write_line(out, indent, &format!("{} = {};", self.local_name(*local_index), value));
            }
            WriteGlobal { owner, name, value, .. } => {
                let global_type = self.program.types[owner.index()]
                    .find_global(*name)
                    .and_then(|i| self.program.types[owner.index()].globals[i].resolved_type);
                let value = self.assigned_value(value, global_type)?;
                write_line(
                    out,
                    indent,
                    &format!("{} = {};", global_var_name(self.program, *owner, *name), value),
                );
            }
            WriteProperty { context, owner, name, value, .. } => {
                let property_type = self.program.types[owner.index()]
                    .find_property(*name)
                    .and_then(|i| self.program.types[owner.index()].properties[i].resolved_type);
                let target = format!(
                    "({}){}{}",
                    self.expr(context)?,
                    self.member_accessor(*owner),
                    property_field_name(self.program, *name)
                );
                let value = self.assigned_value(value, property_type)?;
                write_line(out, indent, &format!("{} = {};", target, value));
            }
            WriteArrayElement { array, index, value, .. } => {
                let element = self.array_element_c_type(array)?;
                write_line(
                    out,
                    indent,
                    &format!(
                        "(({}*)Argon_array_data({}))[{}] = {};",
                        element,
                        self.expr(array)?,
                        self.expr(index)?,
                        self.expr(value)?
                    ),
                );
            }
            LocalOpWithAssign { local_index, op, value, .. } => {
                let name = self.local_name(*local_index);
                let local_type =
                    self.program.methods[self.method.index()].locals[*local_index].resolved_type;
                let line = self.compound_assign(&name, *op, value, local_type)?;
                write_line(out, indent, &line);
            }
            OpAssignGlobal { owner, name, op, value, .. } => {
                let target = global_var_name(self.program, *owner, *name);
                let global_type = self.program.types[owner.index()]
                    .find_global(*name)
                    .and_then(|i| self.program.types[owner.index()].globals[i].resolved_type);
                let line = self.compound_assign(&target, *op, value, global_type)?;
                write_line(out, indent, &line);
            }
            OpAssignProperty { context, owner, name, op, value, .. } => {
                let receiver = self.context_once(context)?;
                let target = format!(
                    "({}){}{}",
                    receiver,
                    self.member_accessor(*owner),
                    property_field_name(self.program, *name)
                );
                let property_type = self.program.types[owner.index()]
                    .find_property(*name)
                    .and_then(|i| self.program.types[owner.index()].properties[i].resolved_type);
                let line = self.compound_assign(&target, *op, value, property_type)?;
                write_line(out, indent, &line);
            }
            AdjustLocal { .. } | AdjustProperty { .. } => {
                let text = self.expr(cmd)?;
                write_line(out, indent, &format!("{};", text));
            }

            If { condition, then_statements, else_statements, .. } => {
                write_line(out, indent, &format!("if ({}) {{", self.expr(condition)?));
                self.block(then_statements, out, indent + 1)?;
                if else_statements.is_empty() {
                    write_line(out, indent, "}");
                } else {
                    write_line(out, indent, "} else {");
                    self.block(else_statements, out, indent + 1)?;
                    write_line(out, indent, "}");
                }
            }
            GenericLoop { condition, increment, statements, .. } => {
                let condition_text = match condition {
                    Some(condition) => self.expr(condition)?,
                    None => String::new(),
                };
                let increment_text = match increment {
                    Some(increment) => self.expr(increment)?,
                    None => String::new(),
                };
                write_line(
                    out,
                    indent,
                    &format!("for (; {}; {}) {{", condition_text, increment_text),
                );
                self.block(statements, out, indent + 1)?;
                write_line(out, indent, "}");
            }
            Switch { subject, cases, others, .. } => {
                write_line(out, indent, &format!("switch ({}) {{", self.expr(subject)?));
                for case in cases {
                    let value = self.expr(&case.value)?;
                    write_line(out, indent + 1, &format!("case {}: {{", value));
                    self.block(&case.statements, out, indent + 2)?;
                    write_line(out, indent + 2, "break;");
                    write_line(out, indent + 1, "}");
                }
                write_line(out, indent + 1, "default: {");
                self.block(others, out, indent + 2)?;
                write_line(out, indent + 2, "break;");
                write_line(out, indent + 1, "}");
                write_line(out, indent, "}");
            }
            Contingent { statements, satisfied, unsatisfied, control_id, .. } => {
                write_line(out, indent, "{");
                self.block(statements, out, indent + 1)?;
                write_line(out, indent + 1, &format!("goto _cont_sat_{};", control_id));
                write_line(out, indent, &format!("_cont_unsat_{}:;", control_id));
                self.block(unsatisfied, out, indent + 1)?;
                write_line(out, indent + 1, &format!("goto _cont_end_{};", control_id));
                write_line(out, indent, &format!("_cont_sat_{}:;", control_id));
                self.block(satisfied, out, indent + 1)?;
                write_line(out, indent, &format!("_cont_end_{}:;", control_id));
                write_line(out, indent, "}");
            }
            Necessary { condition, control_id, .. } => {
                write_line(
                    out,
                    indent,
                    &format!(
                        "if (!({})) goto _cont_unsat_{};",
                        self.expr(condition)?,
                        control_id
                    ),
                );
            }
            Sufficient { condition, control_id, .. } => {
                write_line(
                    out,
                    indent,
                    &format!(
                        "if ({}) goto _cont_sat_{};",
                        self.expr(condition)?,
                        control_id
                    ),
                );
            }
            Try { statements, catches, .. } => {
                let frame = format!("_frame_{}", cmd.pos().line);
                write_line(out, indent, "{");
                write_line(out, indent + 1, &format!("ArgonTryFrame {};", frame));
                write_line(out, indent + 1, &format!("{}.prior = Argon_current_try;", frame));
                write_line(out, indent + 1, &format!("Argon_current_try = &{};", frame));
                write_line(out, indent + 1, &format!("if (!setjmp({}.env)) {{", frame));
                self.block(statements, out, indent + 2)?;
                write_line(out, indent + 2, &format!("Argon_current_try = {}.prior;", frame));
                write_line(out, indent + 1, "} else {");
                write_line(out, indent + 2, &format!("Argon_current_try = {}.prior;", frame));
                let mut first = true;
                for catch in catches {
                    let caught_type = catch.resolved_type.ok_or_else(|| {
                        CompileError::internal("catch clause reached emission unresolved")
                    })?;
                    let index = self.runtime_index(caught_type)?;
                    let keyword = if first { "if" } else { "} else if" };
                    first = false;
                    write_line(
                        out,
                        indent + 2,
                        &format!("{} (Argon_instance_of(Argon_thrown, {})) {{", keyword, index),
                    );
                    write_line(
                        out,
                        indent + 3,
                        &format!(
                            "{} = ({})Argon_thrown;",
                            self.local_name(catch.local_index),
                            c_type(self.program, caught_type)
                        ),
                    );
                    self.block(&catch.statements, out, indent + 3)?;
                }
                if !first {
                    write_line(out, indent + 2, "} else {");
                    write_line(out, indent + 3, "Argon_throw(Argon_thrown);");
                    write_line(out, indent + 2, "}");
                } else {
                    write_line(out, indent + 2, "Argon_throw(Argon_thrown);");
                }
                write_line(out, indent + 1, "}");
                write_line(out, indent, "}");
            }
            Throw { value, .. } => {
                write_line(
                    out,
                    indent,
                    &format!("Argon_throw((ArgonObject*)({}));", self.expr(value)?),
                );
            }
            Return { value, .. } => match value {
                Some(value) => {
                    let return_type = self.program.methods[self.method.index()].return_type;
                    let text = self.assigned_value(value, return_type)?;
                    write_line(out, indent, &format!("return {};", text));
                }
                None => {
                    if self.returns_this {
                        write_line(out, indent, "return this_;");
                    } else {
                        write_line(out, indent, "return;");
                    }
                }
            },
            Escape { .. } => write_line(out, indent, "break;"),
            NextIteration { .. } => write_line(out, indent, "continue;"),
            Label { name, .. } => {
                write_line(
                    out,
                    indent,
                    &format!("LBL_{}:;", super::types::sanitize(self.program.interner.resolve(*name))),
                );
            }
            Trace { text, value, .. } => {
                match value {
                    Some(value) => {
                        let value_type = self.type_of(value);
                        let value_text = self.expr(value)?;
                        let line = if value_type == Some(self.program.type_string) {
                            format!(
                                "fprintf(stderr, \"TRACE {}\\n\"); Argon_println_string({});",
                                escape_c(text),
                                value_text
                            )
                        } else if value_type == Some(self.program.type_real) {
                            format!(
                                "fprintf(stderr, \"TRACE {} = %g\\n\", (double)({}));",
                                escape_c(text),
                                value_text
                            )
                        } else {
                            format!(
                                "fprintf(stderr, \"TRACE {} = %lld\\n\", (long long)({}));",
                                escape_c(text),
                                value_text
                            )
                        };
                        write_line(out, indent, &line);
                    }
                    None => {
                        write_line(
                            out,
                            indent,
                            &format!("fprintf(stderr, \"TRACE {}\\n\");", escape_c(text)),
                        );
                    }
                }
            }
            NativeCode { code, .. } => {
                let spliced = self.splice_native_statement(code);
                for line in spliced.lines() {
                    write_line(out, indent, line);
                }
            }

            TaskControl { sections, .. } => {
                write_line(out, indent, "for (;;) {");
                write_line(out, indent + 1, "switch (this_->p_ip) {");
                for section in sections {
                    if let TaskControlSection { ip, statements, .. } = section {
                        write_line(out, indent + 2, &format!("case {}: {{", ip));
                        self.block(statements, out, indent + 3)?;
                        write_line(out, indent + 2, "}");
                    }
                }
                write_line(out, indent + 2, "default: return 0;");
                write_line(out, indent + 1, "}");
                write_line(out, indent, "}");
            }
            TaskControlSection { .. } => {
                return Err(CompileError::internal(
                    "task section outside its dispatch loop",
                ))
            }

            other => {
                let text = self.expr(other)?;
                write_line(out, indent, &format!("{};", text));
            }
        }
        Ok(())
    }

    /// A value cast to the target's C type when reference kinds differ.
    fn assigned_value(&mut self, value: &Cmd, target: Option<TypeId>) -> Result<String> {
        let text = self.expr(value)?;
        if let Some(target) = target {
            if is_reference(self.program, target) && self.type_of(value) != Some(target) {
                return Ok(format!("(({})({}))", c_type(self.program, target), text));
            }
        }
        Ok(text)
    }

    fn compound_assign(
        &mut self,
        target: &str,
        op: TokenKind,
        value: &Cmd,
        target_type: Option<TypeId>,
    ) -> Result<String> {
        let value_text = self.expr(value)?;
        let is_real = target_type == Some(self.program.type_real);
        Ok(match op {
            TokenKind::Plus => format!("{} += {};", target, value_text),
            TokenKind::Minus => format!("{} -= {};", target, value_text),
            TokenKind::Times => format!("{} *= {};", target, value_text),
            TokenKind::Slash => format!("{} /= {};", target, value_text),
            TokenKind::Percent if is_real => {
                format!("{} = fmod({}, {});", target, target, value_text)
            }
            TokenKind::Percent => format!("{} %= {};", target, value_text),
            TokenKind::Power if is_real => {
                format!("{} = pow({}, {});", target, target, value_text)
            }
            TokenKind::Power if target_type == Some(self.program.type_long) => {
                format!("{} = Argon_pow_int64({}, {});", target, target, value_text)
            }
            TokenKind::Power => {
                format!("{} = Argon_pow_int32({}, {});", target, target, value_text)
            }
            TokenKind::Ampersand => format!("{} &= {};", target, value_text),
            TokenKind::VerticalBar => format!("{} |= {};", target, value_text),
            TokenKind::Tilde => format!("{} ^= {};", target, value_text),
            TokenKind::ShiftLeft => format!("{} <<= {};", target, value_text),
            TokenKind::ShiftRight => format!("{} >>= {};", target, value_text),
            TokenKind::ShiftRightX
                if target_type == Some(self.program.type_long) =>
            {
                format!(
                    "{} = (ArgonInt64)(((uint64_t)({})) >> ({}));",
                    target, target, value_text
                )
            }
            TokenKind::ShiftRightX => format!(
                "{} = (ArgonInt32)(((uint32_t)({})) >> ({}));",
                target, target, value_text
            ),
            other => {
                return Err(CompileError::internal(format!(
                    "unexpected compound-assignment operator {}",
                    other.describe()
                )))
            }
        })
    }

    /// `native` statement splice: `$this` becomes the receiver, `$name`
    /// resolves to a property field, a local, or a type struct name.
    fn splice_native_statement(&self, code: &str) -> String {
        let method = &self.program.methods[self.method.index()];
        let mut out = String::with_capacity(code.len());
        let mut chars = code.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let mut word = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    word.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if word == "this" {
                out.push_str("this_");
            } else if let Some(rest) = word.strip_prefix("param") {
                if let Ok(index) = rest.parse::<usize>() {
                    if index < method.locals.len() {
                        let local = &method.locals[index];
                        out.push_str(&local_var_name(self.program, local.name, index));
                        continue;
                    }
                }
                out.push('$');
                out.push_str(&word);
            } else if let Some(sym) = self.program.interner.lookup(&word) {
                let owner = method.owner;
                if self.program.types[owner.index()].find_property(sym).is_some() {
                    out.push_str("this_->");
                    out.push_str(&property_field_name(self.program, sym));
                } else if let Some(type_id) = self.program.find_type(sym) {
                    out.push_str(&type_struct_name(self.program, type_id));
                } else {
                    out.push('$');
                    out.push_str(&word);
                }
            } else {
                out.push('$');
                out.push_str(&word);
            }
        }
        out
    }
}

pub(super) fn write_line(out: &mut String, indent: usize, text: &str) {
    for _ in 0..indent {
        out.push_str("    ");
    }
    out.push_str(text);
    out.push('\n');
}

pub(super) fn escape_c(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
