//! Used-code culling.
//!
//! Starting from `on_launch`, the requisite list, and anything pinned by a
//! callback, a breadth-first walk over every reachable method body marks
//! the types, methods, properties, and globals the emitter must keep.
//! Dynamic calls mark every override; static calls mark their exact
//! target; aspect calls fan out to each incorporating class's
//! implementation.
//!
//! Property marks propagate along the inheritance chain in both
//! directions: a field read through a base reference must stay in every
//! derived layout, or object prefixes would stop lining up.

use crate::ast::Cmd;
use crate::intern::Symbol;
use crate::program::{MethodId, Program, TypeId};
use rustc_hash::FxHashSet;

#[derive(Default)]
pub(crate) struct Marks {
    types: Vec<TypeId>,
    methods: Vec<MethodId>,
    properties: Vec<(TypeId, Symbol)>,
    globals: Vec<(TypeId, Symbol)>,
}

impl Program {
    /// Runs the cull; afterwards `is_used` is accurate on every type,
    /// method, property, and global, and unused entities carry `culled`.
    pub fn cull(&mut self) {
        let mut queue: Vec<MethodId> = Vec::new();
        let mut queued: FxHashSet<MethodId> = FxHashSet::default();

        if let Some(root) = self.on_launch {
            self.mark_method(root, &mut queue, &mut queued);
        }

        for requisite in self.requisites.clone() {
            let Some(type_id) = self.find_type(requisite.type_name) else { continue };
            match requisite.signature {
                Some(signature) => {
                    if let Some(method) = self.find_method_by_signature(type_id, signature) {
                        self.mark_method(method, &mut queue, &mut queued);
                    }
                    self.mark_type(type_id);
                }
                None => self.mark_whole_type(type_id, &mut queue, &mut queued),
            }
        }

        let requisite_types: Vec<TypeId> = self
            .types
            .iter()
            .filter(|t| t.attributes.is_requisite)
            .map(|t| t.id)
            .collect();
        for type_id in requisite_types {
            self.mark_whole_type(type_id, &mut queue, &mut queued);
        }

        loop {
            while let Some(method_id) = queue.pop() {
                let mut marks = Marks::default();
                let statements = std::mem::take(&mut self.methods[method_id.index()].statements);
                for statement in &statements {
                    trace_used_code(statement, self, &mut marks);
                }
                self.methods[method_id.index()].statements = statements;

                // Parameter and return types shape the emitted signature.
                let method = &self.methods[method_id.index()];
                marks.types.extend(method.parameters.iter().filter_map(|p| p.resolved_type));
                marks.types.extend(method.return_type);
                marks.types.push(method.owner);

                for type_id in marks.types {
                    self.mark_type(type_id);
                }
                for (owner, name) in marks.properties {
                    self.mark_property(owner, name);
                }
                for (owner, name) in marks.globals {
                    if let Some(slot) = self.types[owner.index()].find_global(name) {
                        self.types[owner.index()].globals[slot].is_used = true;
                    }
                }
                for id in marks.methods {
                    self.mark_method(id, &mut queue, &mut queued);
                }
            }

            // Launch runs every used type's global initializers; pulling them
            // in can reach new code, so close over that too.
            let globals_methods: Vec<MethodId> = self
                .types
                .iter()
                .filter(|t| t.is_used)
                .filter_map(|t| t.globals_method)
                .filter(|m| !queued.contains(m))
                .collect();
            if globals_methods.is_empty() {
                break;
            }
            for method in globals_methods {
                self.mark_method(method, &mut queue, &mut queued);
            }
        }

        for ty in self.types.iter_mut() {
            if !ty.is_used {
                ty.culled = true;
            }
        }
        for method in self.methods.iter_mut() {
            if !method.is_used {
                method.statements.clear();
            }
        }
    }

    fn mark_method(
        &mut self,
        method_id: MethodId,
        queue: &mut Vec<MethodId>,
        queued: &mut FxHashSet<MethodId>,
    ) {
        if !queued.insert(method_id) {
            return;
        }
        self.methods[method_id.index()].is_used = true;
        queue.push(method_id);
    }

    /// Marks a type, its ancestry, and its element chain.
    fn mark_type(&mut self, type_id: TypeId) {
        if self.types[type_id.index()].is_used {
            return;
        }
        self.types[type_id.index()].is_used = true;
        let bases = self.types[type_id.index()].flat_base_types.clone();
        for base in bases {
            self.mark_type(base);
        }
        if let Some(element) = self.types[type_id.index()].element_type {
            self.mark_type(element);
        }
    }

    /// Requisite pinning: the type plus every member it declares.
    fn mark_whole_type(
        &mut self,
        type_id: TypeId,
        queue: &mut Vec<MethodId>,
        queued: &mut FxHashSet<MethodId>,
    ) {
        self.mark_type(type_id);
        let methods: Vec<MethodId> = self.types[type_id.index()]
            .methods
            .iter()
            .chain(self.types[type_id.index()].routines.iter())
            .copied()
            .collect();
        for method in methods {
            self.mark_method(method, queue, queued);
        }
        for i in 0..self.types[type_id.index()].properties.len() {
            let name = self.types[type_id.index()].properties[i].name;
            self.mark_property(type_id, name);
        }
        if let Some(defaults) = self.types[type_id.index()].defaults_method {
            self.mark_method(defaults, queue, queued);
        }
    }

    /// Marks a property here and in every related type that shares it, so
    /// base-and-derived layouts keep a common prefix.
    fn mark_property(&mut self, owner: TypeId, name: Symbol) {
        self.mark_type(owner);
        let related: Vec<TypeId> = self
            .types
            .iter()
            .filter(|t| {
                t.id == owner
                    || t.flat_base_types.contains(&owner)
                    || self.types[owner.index()].flat_base_types.contains(&t.id)
            })
            .map(|t| t.id)
            .collect();
        for type_id in related {
            if let Some(slot) = self.types[type_id.index()].find_property(name) {
                self.types[type_id.index()].properties[slot].is_used = true;
            }
        }
    }
}

/// One node's outgoing use edges. Children recurse.
pub(crate) fn trace_used_code(cmd: &Cmd, program: &Program, marks: &mut Marks) {
    use Cmd::*;
    match cmd {
        ReadProperty { context, owner, name, .. } => {
            marks.properties.push((*owner, *name));
            trace_used_code(context, program, marks);
        }
        WriteProperty { context, owner, name, value, .. } => {
            marks.properties.push((*owner, *name));
            trace_used_code(context, program, marks);
            trace_used_code(value, program, marks);
        }
        OpAssignProperty { context, owner, name, value, .. } => {
            marks.properties.push((*owner, *name));
            trace_used_code(context, program, marks);
            trace_used_code(value, program, marks);
        }
        AdjustProperty { context, owner, name, .. } => {
            marks.properties.push((*owner, *name));
            trace_used_code(context, program, marks);
        }
        ReadGlobal { owner, name, .. } => {
            marks.globals.push((*owner, *name));
            marks.types.push(*owner);
        }
        WriteGlobal { owner, name, value, .. } => {
            marks.globals.push((*owner, *name));
            marks.types.push(*owner);
            trace_used_code(value, program, marks);
        }
        OpAssignGlobal { owner, name, value, .. } => {
            marks.globals.push((*owner, *name));
            marks.types.push(*owner);
            trace_used_code(value, program, marks);
        }
        ReadSingleton { of_type, .. } => {
            marks.types.push(*of_type);
            // Constructing the singleton runs defaults and init.
            if let Some(defaults) = program.types[of_type.index()].defaults_method {
                marks.methods.push(defaults);
            }
        }
        This { of_type, .. } => {
            marks.types.extend(*of_type);
        }
        CreateObject { of_type, init, args, .. } => {
            marks.types.push(*of_type);
            if let Some(init) = init {
                marks.methods.push(*init);
            }
            if let Some(defaults) = program.types[of_type.index()].defaults_method {
                marks.methods.push(defaults);
            }
            for arg in args {
                trace_used_code(arg, program, marks);
            }
        }
        CreateCompound { of_type, args, .. } => {
            marks.types.push(*of_type);
            for property in &program.types[of_type.index()].properties {
                marks.properties.push((*of_type, property.name));
            }
            for arg in args {
                trace_used_code(arg, program, marks);
            }
        }
        CreateArray { element_type, count, .. } => {
            marks.types.push(*element_type);
            trace_used_code(count, program, marks);
        }
        CreateOptionalValue { of_type, value, .. } => {
            marks.types.push(*of_type);
            if let Some(value) = value {
                trace_used_code(value, program, marks);
            }
        }
        CreateCallback { context, method, .. } => {
            marks.methods.push(*method);
            if let Some(context) = context {
                trace_used_code(context, program, marks);
            }
        }
        DefaultValue { of_type, .. } => marks.types.push(*of_type),
        CastToType { operand, of_type, .. }
        | ConvertToType { operand, of_type, .. }
        | ConvertToPrimitiveType { operand, of_type, .. } => {
            marks.types.push(*of_type);
            trace_used_code(operand, program, marks);
        }
        As { operand, of_type, .. } => {
            marks.types.extend(*of_type);
            trace_used_code(operand, program, marks);
        }
        InstanceOf { operand, of_type, .. } | NotInstanceOf { operand, of_type, .. } => {
            marks.types.extend(*of_type);
            trace_used_code(operand, program, marks);
        }

        CallRoutine { method, args, .. }
        | CallNativeRoutine { method, args, .. }
        | CallInlineNativeRoutine { method, args, .. }
        | CallPriorMethod { method, args, .. } => {
            marks.methods.push(*method);
            for arg in args {
                trace_used_code(arg, program, marks);
            }
        }
        CallStaticMethod { context, method, args, .. }
        | CallNativeMethod { context, method, args, .. }
        | CallInlineNativeMethod { context, method, args, .. } => {
            marks.methods.push(*method);
            trace_used_code(context, program, marks);
            for arg in args {
                trace_used_code(arg, program, marks);
            }
        }
        CallDynamicMethod { context, method, args, .. } => {
            mark_with_overrides(*method, program, marks);
            trace_used_code(context, program, marks);
            for arg in args {
                trace_used_code(arg, program, marks);
            }
        }
        CallAspectMethod { context, method, args, .. } => {
            marks.methods.push(*method);
            let signature = program.methods[method.index()].signature;
            for &incorporator in &program.methods[method.index()].incorporating_classes {
                marks.types.push(incorporator);
                if let Some(implementation) =
                    program.find_method_by_signature(incorporator, signature)
                {
                    mark_with_overrides(implementation, program, marks);
                }
            }
            trace_used_code(context, program, marks);
            for arg in args {
                trace_used_code(arg, program, marks);
            }
        }

        // Structured statements: children only.
        If { condition, then_statements, else_statements, .. } => {
            trace_used_code(condition, program, marks);
            for s in then_statements.iter().chain(else_statements.iter()) {
                trace_used_code(s, program, marks);
            }
        }
        Which { subject, cases, others, .. } => {
            trace_used_code(subject, program, marks);
            for case in cases {
                for v in &case.values {
                    trace_used_code(v, program, marks);
                }
                for s in &case.statements {
                    trace_used_code(s, program, marks);
                }
            }
            for s in others {
                trace_used_code(s, program, marks);
            }
        }
        Switch { subject, cases, others, .. } => {
            trace_used_code(subject, program, marks);
            for case in cases {
                trace_used_code(&case.value, program, marks);
                for s in &case.statements {
                    trace_used_code(s, program, marks);
                }
            }
            for s in others {
                trace_used_code(s, program, marks);
            }
        }
        Contingent { statements, satisfied, unsatisfied, .. } => {
            for s in statements.iter().chain(satisfied.iter()).chain(unsatisfied.iter()) {
                trace_used_code(s, program, marks);
            }
        }
        Try { statements, catches, .. } => {
            for s in statements {
                trace_used_code(s, program, marks);
            }
            for catch in catches {
                marks.types.extend(catch.resolved_type);
                for s in &catch.statements {
                    trace_used_code(s, program, marks);
                }
            }
        }
        Throw { value, .. } => trace_used_code(value, program, marks),
        GenericLoop { condition, increment, statements, .. } => {
            if let Some(condition) = condition {
                trace_used_code(condition, program, marks);
            }
            if let Some(increment) = increment {
                trace_used_code(increment, program, marks);
            }
            for s in statements {
                trace_used_code(s, program, marks);
            }
        }
        Block { statements, .. } | TaskControl { sections: statements, .. } => {
            for s in statements {
                trace_used_code(s, program, marks);
            }
        }
        TaskControlSection { statements, .. } => {
            for s in statements {
                trace_used_code(s, program, marks);
            }
        }
        LocalDeclaration { initial, .. } => {
            if let Some(initial) = initial {
                trace_used_code(initial, program, marks);
            }
        }
        Return { value, .. } | Yield { value, .. } | Trace { value, .. } => {
            if let Some(value) = value {
                trace_used_code(value, program, marks);
            }
        }
        Await { value, .. } => trace_used_code(value, program, marks),
        ReadArrayElement { array, index, .. } => {
            trace_used_code(array, program, marks);
            trace_used_code(index, program, marks);
        }
        ReadArrayCount { array, .. } => trace_used_code(array, program, marks),
        WriteArrayElement { array, index, value, .. } => {
            trace_used_code(array, program, marks);
            trace_used_code(index, program, marks);
            trace_used_code(value, program, marks);
        }
        WriteLocal { value, .. } | LocalOpWithAssign { value, .. } => {
            trace_used_code(value, program, marks);
        }
        Add { lhs, rhs, .. }
        | Subtract { lhs, rhs, .. }
        | Multiply { lhs, rhs, .. }
        | Divide { lhs, rhs, .. }
        | Mod { lhs, rhs, .. }
        | Power { lhs, rhs, .. }
        | BitwiseXor { lhs, rhs, .. }
        | BitwiseOr { lhs, rhs, .. }
        | BitwiseAnd { lhs, rhs, .. }
        | ShiftLeft { lhs, rhs, .. }
        | ShiftRight { lhs, rhs, .. }
        | ShiftRightX { lhs, rhs, .. }
        | LogicalOr { lhs, rhs, .. }
        | LogicalAnd { lhs, rhs, .. }
        | LogicalXor { lhs, rhs, .. }
        | CompareEq { lhs, rhs, .. }
        | CompareNe { lhs, rhs, .. }
        | CompareLt { lhs, rhs, .. }
        | CompareLe { lhs, rhs, .. }
        | CompareGt { lhs, rhs, .. }
        | CompareGe { lhs, rhs, .. }
        | CompareIs { lhs, rhs, .. }
        | CompareIsNot { lhs, rhs, .. } => {
            trace_used_code(lhs, program, marks);
            trace_used_code(rhs, program, marks);
        }
        BitwiseNot { operand, .. }
        | Negate { operand, .. }
        | Logicalize { operand, .. }
        | LogicalNot { operand, .. } => trace_used_code(operand, program, marks),
        Range { low, high, .. } | RangeUpTo { low, high, .. } | RangeDownTo { low, high, .. } => {
            trace_used_code(low, program, marks);
            trace_used_code(high, program, marks);
        }
        FormattedString { parts, .. } => {
            for part in parts {
                trace_used_code(part, program, marks);
            }
        }

        // Leaves.
        LiteralInteger { .. } | LiteralLong { .. } | LiteralReal { .. }
        | LiteralCharacter { .. } | LiteralLogical { .. } | LiteralString { .. }
        | LiteralNull { .. } | Prior { .. } | ReadLocal { .. } | AdjustLocal { .. }
        | Escape { .. } | NextIteration { .. } | Label { .. } | NativeCode { .. } => {}
        Necessary { condition, .. } | Sufficient { condition, .. } => {
            trace_used_code(condition, program, marks);
        }

        // Unresolved shapes never reach the cull.
        Access { .. } | ElementAccess { .. } | Assign { .. } | OpWithAssign { .. }
        | Adjust { .. } | DeclareLocal { .. } | CreateCompoundLiteral { .. }
        | CreateList { .. } | CreateFunction { .. } | ForEach { .. } | MacroArgs { .. } => {}
    }
}

fn mark_with_overrides(method: MethodId, program: &Program, marks: &mut Marks) {
    marks.methods.push(method);
    for &overriding in &program.methods[method.index()].overriding {
        mark_with_overrides(overriding, program, marks);
    }
}
