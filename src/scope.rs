//! Scopes and overload resolution.
//!
//! A [`Scope`] tracks which of a method's locals are visible at the point
//! being resolved, plus the stack of enclosing loops and `contingent`
//! blocks so `escape`, `nextIteration`, `necessary`, and `sufficient` can
//! find their targets.
//!
//! [`CandidateMethods`] is the overload resolver: gather every visible
//! method with the right name, filter by argument compatibility, then
//! tie-break. Callers that want to probe (`error_on_fail = false`) get
//! `Ok(None)` back and may try another rewrite; otherwise failure formats
//! the full candidate list into an overload error.

use crate::error::{CompileError, Result, SourcePos};
use crate::intern::Symbol;
use crate::method::Method;
use crate::program::{MethodId, Program, TypeId};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ControlKind {
    Loop,
    Contingent,
}

#[derive(Clone, Copy, Debug)]
pub struct ControlEntry {
    pub kind: ControlKind,
    pub id: usize,
}

pub struct Scope {
    pub this_type: TypeId,
    pub this_method: MethodId,
    /// Indices into the method's `locals`, in declaration order.
    pub visible_locals: Vec<usize>,
    pub control_stack: Vec<ControlEntry>,
}

impl Scope {
    pub fn new(this_type: TypeId, this_method: MethodId) -> Self {
        Scope {
            this_type,
            this_method,
            visible_locals: Vec::new(),
            control_stack: Vec::new(),
        }
    }

    pub fn push_local(&mut self, index: usize) {
        self.visible_locals.push(index);
    }

    /// Depth marker for entering a nested statement list.
    pub fn local_depth(&self) -> usize {
        self.visible_locals.len()
    }

    /// Pops locals declared since `depth`; leaving a block ends their
    /// lifetime.
    pub fn pop_locals_to(&mut self, depth: usize) {
        self.visible_locals.truncate(depth);
    }

    /// Innermost visible local with this name; shadowing works by scan
    /// order.
    pub fn find_local(&self, method: &Method, name: Symbol) -> Option<usize> {
        self.visible_locals
            .iter()
            .rev()
            .copied()
            .find(|&index| method.locals[index].name == name)
    }

    pub fn innermost(&self, kind: ControlKind) -> Option<usize> {
        self.control_stack
            .iter()
            .rev()
            .find(|entry| entry.kind == kind)
            .map(|entry| entry.id)
    }
}

// =============================================================================
// Overload resolution
// =============================================================================

pub struct CandidateMethods {
    pub name: Symbol,
    pub available: Vec<MethodId>,
    pub compatible: Vec<MethodId>,
}

impl CandidateMethods {
    /// Gathers methods and routines named `name` visible on `context_type`
    /// (inherited and aspect-incorporated members are already merged into
    /// the type's tables).
    pub fn gather(program: &Program, context_type: TypeId, name: Symbol) -> Self {
        let ty = &program.types[context_type.index()];
        let available: Vec<MethodId> = ty
            .methods
            .iter()
            .chain(ty.routines.iter())
            .copied()
            .filter(|&m| program.methods[m.index()].name == name)
            .collect();
        CandidateMethods { name, available, compatible: Vec::new() }
    }

    /// Narrows `available` by argument count and per-argument implicit
    /// conversion, then applies tie-breaks:
    ///
    /// 1. most-derived parameter types (dominance) across all positions,
    /// 2. fewest implicit conversions,
    /// 3. non-aspect owner over aspect owner,
    /// 4. identical parameter lists resolve to the first declared.
    ///
    /// Anything still tied is ambiguous.
    pub fn resolve(
        mut self,
        program: &mut Program,
        arg_types: &[Option<TypeId>],
        error_on_fail: bool,
        pos: SourcePos,
    ) -> Result<Option<MethodId>> {
        // Parameter types resolve lazily; a parameter naming an unknown
        // type is a real error, so surface it here.
        for &candidate in &self.available {
            resolve_parameter_types(program, candidate)?;
        }

        self.compatible = self
            .available
            .iter()
            .copied()
            .filter(|&m| is_compatible(program, m, arg_types))
            .collect();

        if self.compatible.is_empty() {
            if !error_on_fail {
                return Ok(None);
            }
            let name = program.interner.resolve(self.name).to_string();
            let candidates = self
                .available
                .iter()
                .map(|&m| format_signature(program, m))
                .collect();
            return Err(CompileError::overload(
                format!("no compatible overload of '{}' for the given arguments", name),
                candidates,
                Some(pos),
            ));
        }
        if self.compatible.len() == 1 {
            return Ok(Some(self.compatible[0]));
        }

        // (a) dominance on parameter types
        let dominant: Vec<MethodId> = self
            .compatible
            .iter()
            .copied()
            .filter(|&m| {
                !self
                    .compatible
                    .iter()
                    .any(|&other| other != m && dominates(program, other, m, arg_types.len()))
            })
            .collect();
        let pool = if dominant.is_empty() { self.compatible.clone() } else { dominant };
        if pool.len() == 1 {
            return Ok(Some(pool[0]));
        }

        // (b) fewest conversions
        let cost = |m: MethodId| conversion_total(program, m, arg_types);
        let best = pool.iter().map(|&m| cost(m)).min().unwrap_or(0);
        let cheapest: Vec<MethodId> = pool.into_iter().filter(|&m| cost(m) == best).collect();
        if cheapest.len() == 1 {
            return Ok(Some(cheapest[0]));
        }

        // (c) non-aspect beats aspect
        let concrete: Vec<MethodId> = cheapest
            .iter()
            .copied()
            .filter(|&m| {
                let owner = program.methods[m.index()].owner;
                !program.types[owner.index()].attributes.is_aspect()
            })
            .collect();
        let pool = if concrete.is_empty() { cheapest } else { concrete };
        if pool.len() == 1 {
            return Ok(Some(pool[0]));
        }

        // (d) identical parameter lists: first declared wins.
        let first = pool.iter().copied().min_by_key(|m| m.index()).unwrap();
        if pool
            .iter()
            .all(|&m| same_parameter_types(program, m, first))
        {
            return Ok(Some(first));
        }

        if !error_on_fail {
            return Ok(None);
        }
        let name = program.interner.resolve(self.name).to_string();
        let candidates = pool.iter().map(|&m| format_signature(program, m)).collect();
        Err(CompileError::overload(
            format!("ambiguous call to '{}'", name),
            candidates,
            Some(pos),
        ))
    }
}

/// Resolves the declared parameter and return types of `method` to ids.
pub fn resolve_parameter_types(program: &mut Program, method: MethodId) -> Result<()> {
    let count = program.methods[method.index()].parameters.len();
    for i in 0..count {
        if program.methods[method.index()].parameters[i].resolved_type.is_some() {
            continue;
        }
        let name = program.methods[method.index()].parameters[i].declared_type;
        let pos = program.methods[method.index()].parameters[i].pos;
        let id = program.type_reference(pos, name);
        program.define_type(id)?;
        program.organize_type(id, &mut Vec::new())?;
        program.methods[method.index()].parameters[i].resolved_type = Some(id);
        if let Some(local) = program.methods[method.index()].locals.get(i).map(|l| l.index) {
            program.methods[method.index()].locals[local].resolved_type = Some(id);
        }
    }
    if program.methods[method.index()].return_type.is_none() {
        if let Some(name) = program.methods[method.index()].return_type_name {
            let pos = program.methods[method.index()].pos;
            let id = program.type_reference(pos, name);
            program.define_type(id)?;
            program.organize_type(id, &mut Vec::new())?;
            program.methods[method.index()].return_type = Some(id);
        }
    }
    Ok(())
}

fn is_compatible(program: &Program, method: MethodId, arg_types: &[Option<TypeId>]) -> bool {
    let m = &program.methods[method.index()];
    if !m.accepts_arg_count(arg_types.len()) {
        return false;
    }
    for (arg, parameter) in arg_types.iter().zip(m.parameters.iter()) {
        let Some(param_type) = parameter.resolved_type else { return false };
        match arg {
            Some(arg_type) => {
                if program.implicit_conversion_cost(*arg_type, param_type).is_none() {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

fn conversion_total(program: &Program, method: MethodId, arg_types: &[Option<TypeId>]) -> u32 {
    let m = &program.methods[method.index()];
    arg_types
        .iter()
        .zip(m.parameters.iter())
        .map(|(arg, parameter)| match (arg, parameter.resolved_type) {
            (Some(a), Some(p)) => program.implicit_conversion_cost(*a, p).unwrap_or(u32::MAX),
            _ => u32::MAX,
        })
        .sum()
}

/// `a` dominates `b` when every parameter type of `a` is the same as or
/// derived from `b`'s, and at least one is strictly more derived.
fn dominates(program: &Program, a: MethodId, b: MethodId, arg_count: usize) -> bool {
    let ma = &program.methods[a.index()];
    let mb = &program.methods[b.index()];
    let mut strictly = false;
    for i in 0..arg_count {
        let (Some(pa), Some(pb)) = (
            ma.parameters.get(i).and_then(|p| p.resolved_type),
            mb.parameters.get(i).and_then(|p| p.resolved_type),
        ) else {
            return false;
        };
        if pa == pb {
            continue;
        }
        if program.instance_of(pa, pb) {
            strictly = true;
        } else {
            return false;
        }
    }
    strictly
}

fn same_parameter_types(program: &Program, a: MethodId, b: MethodId) -> bool {
    let ma = &program.methods[a.index()];
    let mb = &program.methods[b.index()];
    ma.parameters.len() == mb.parameters.len()
        && ma
            .parameters
            .iter()
            .zip(mb.parameters.iter())
            .all(|(x, y)| x.resolved_type == y.resolved_type)
}

/// `name(T1,T2)` rendered for diagnostics.
pub fn format_signature(program: &Program, method: MethodId) -> String {
    let m = &program.methods[method.index()];
    program.interner.resolve(m.signature).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::MethodAttributes;
    use crate::template::{MethodDecl, ParameterDecl};

    fn method_decl(
        program: &mut Program,
        name: &str,
        params: &[&str],
    ) -> MethodDecl {
        let name = program.interner.intern(name);
        let parameters = params
            .iter()
            .enumerate()
            .map(|(i, t)| ParameterDecl {
                name: program.interner.intern(&format!("p{}", i)),
                declared_type: program.interner.intern(t),
                default: None,
                pos: SourcePos::default(),
            })
            .collect();
        MethodDecl {
            name,
            parameters,
            return_type_name: None,
            task_result_type_name: None,
            attributes: MethodAttributes::default(),
            native_code: None,
            statements: Vec::new(),
            pos: SourcePos::default(),
        }
    }

    /// Builds a bare organized type carrying the given routines, without
    /// going through templates.
    fn host_type(program: &mut Program, name: &str) -> TypeId {
        let id = program.type_reference_str(SourcePos::default(), name);
        program.types[id.index()].defined = true;
        program.types[id.index()].organized = true;
        id
    }

    fn setup() -> Program {
        let mut program = Program::new();
        program.bind_builtins();
        for id in [
            program.type_object,
            program.type_string,
            program.type_int,
            program.type_long,
            program.type_real,
            program.type_character,
            program.type_logical,
        ] {
            program.types[id.index()].defined = true;
            program.types[id.index()].organized = true;
        }
        program
    }

    #[test]
    fn ambiguous_symmetric_overloads_error() {
        let mut program = setup();
        let host = host_type(&mut program, "Host");
        let f1 = method_decl(&mut program, "f", &["Int", "Real"]);
        let f2 = method_decl(&mut program, "f", &["Real", "Int"]);
        let m1 = program.add_method(host, &f1, true);
        let m2 = program.add_method(host, &f2, true);
        program.types[host.index()].routines = vec![m1, m2];

        let name = program.interner.intern("f");
        let candidates = CandidateMethods::gather(&program, host, name);
        let args = vec![Some(program.type_int), Some(program.type_int)];
        let err = candidates
            .resolve(&mut program, &args, true, SourcePos::default())
            .unwrap_err();
        let message = err.message();
        assert!(message.contains("ambiguous"));
        assert!(message.contains("f(Int,Real)"));
        assert!(message.contains("f(Real,Int)"));
    }

    #[test]
    fn exact_match_beats_widening() {
        let mut program = setup();
        let host = host_type(&mut program, "Host");
        let f1 = method_decl(&mut program, "g", &["Int"]);
        let f2 = method_decl(&mut program, "g", &["Real"]);
        let m1 = program.add_method(host, &f1, true);
        let m2 = program.add_method(host, &f2, true);
        program.types[host.index()].routines = vec![m1, m2];

        let name = program.interner.intern("g");
        let candidates = CandidateMethods::gather(&program, host, name);
        let args = vec![Some(program.type_int)];
        let chosen = candidates
            .resolve(&mut program, &args, true, SourcePos::default())
            .unwrap();
        assert_eq!(chosen, Some(m1));
    }

    #[test]
    fn probe_mode_returns_none() {
        let mut program = setup();
        let host = host_type(&mut program, "Host");
        let name = program.interner.intern("missing");
        let candidates = CandidateMethods::gather(&program, host, name);
        let outcome = candidates
            .resolve(&mut program, &[], false, SourcePos::default())
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[test]
    fn no_match_lists_candidates() {
        let mut program = setup();
        let host = host_type(&mut program, "Host");
        let f1 = method_decl(&mut program, "h", &["String"]);
        let m1 = program.add_method(host, &f1, true);
        program.types[host.index()].routines = vec![m1];

        let name = program.interner.intern("h");
        let candidates = CandidateMethods::gather(&program, host, name);
        let args = vec![Some(program.type_real)];
        let err = candidates
            .resolve(&mut program, &args, true, SourcePos::default())
            .unwrap_err();
        assert!(err.message().contains("h(String)"));
    }

    #[test]
    fn scope_shadowing_finds_innermost() {
        let mut program = setup();
        let host = host_type(&mut program, "Host");
        let decl = method_decl(&mut program, "body", &[]);
        let method_id = program.add_method(host, &decl, false);
        let name = program.interner.intern("x");
        let outer = program.method_mut(method_id).add_local(name, None, SourcePos::default());
        let inner = program.method_mut(method_id).add_local(name, None, SourcePos::default());

        let mut scope = Scope::new(host, method_id);
        scope.push_local(outer);
        let depth = scope.local_depth();
        scope.push_local(inner);
        assert_eq!(scope.find_local(program.method(method_id), name), Some(inner));
        scope.pop_locals_to(depth);
        assert_eq!(scope.find_local(program.method(method_id), name), Some(outer));
    }

    #[test]
    fn control_stack_targets_innermost_kind() {
        let mut scope = Scope::new(TypeId(0), MethodId(0));
        scope.control_stack.push(ControlEntry { kind: ControlKind::Loop, id: 1 });
        scope.control_stack.push(ControlEntry { kind: ControlKind::Contingent, id: 2 });
        scope.control_stack.push(ControlEntry { kind: ControlKind::Loop, id: 3 });
        assert_eq!(scope.innermost(ControlKind::Loop), Some(3));
        assert_eq!(scope.innermost(ControlKind::Contingent), Some(2));
    }
}
