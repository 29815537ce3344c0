//! Methods, routines, properties, and locals.
//!
//! A [`Method`] is either dynamic (dispatched through the method table) or
//! a routine (static, resolved at compile time); the two share one record
//! distinguished by `is_routine`. Parameters double as the first locals of
//! the method, so a parameter's index is its local index.

use crate::ast::Cmd;
use crate::error::SourcePos;
use crate::intern::{Interner, Symbol};
use crate::program::{MethodId, TypeId};

#[derive(Clone, Debug)]
pub struct Local {
    pub name: Symbol,
    pub declared_type: Option<Symbol>,
    pub resolved_type: Option<TypeId>,
    pub index: usize,
    pub pos: SourcePos,
}

#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: Symbol,
    pub declared_type: Symbol,
    pub resolved_type: Option<TypeId>,
    pub default: Option<Cmd>,
    pub pos: SourcePos,
}

/// Declaration attributes written in `[...]` after a member name.
#[derive(Clone, Copy, Debug, Default)]
pub struct MethodAttributes {
    pub is_native: bool,
    pub is_inline: bool,
    pub is_macro: bool,
    pub is_dynamic: bool,
    pub is_requisite: bool,
}

#[derive(Clone, Debug)]
pub struct Method {
    pub id: MethodId,
    pub owner: TypeId,
    pub name: Symbol,
    /// Canonical `name(T1,T2,...)`, interned once the owner organizes.
    pub signature: Symbol,
    pub return_type_name: Option<Symbol>,
    pub return_type: Option<TypeId>,
    /// `yields T` marks a task; the lowered task object produces `T`.
    pub task_result_type_name: Option<Symbol>,
    pub task_result_type: Option<TypeId>,
    pub parameters: Vec<Parameter>,
    pub min_args: usize,
    pub locals: Vec<Local>,
    pub statements: Vec<Cmd>,
    pub attributes: MethodAttributes,
    /// Inline target-language body for `[native]` members.
    pub native_code: Option<String>,
    pub is_routine: bool,
    pub overridden: Option<MethodId>,
    pub overriding: Vec<MethodId>,
    /// For aspect methods: every class that incorporates the aspect.
    pub incorporating_classes: Vec<TypeId>,
    pub is_used: bool,
    pub called_dynamically: bool,
    /// Slot in the owner's dynamic method table.
    pub index: usize,
    pub is_resolved: bool,
    pub is_task: bool,
    /// Generated task class once a `yields` method's shell exists.
    pub task_type: Option<TypeId>,
    /// Loop/contingent counter for allocating control ids during resolve.
    pub control_count: usize,
    pub pos: SourcePos,
}

impl Method {
    /// Builds the canonical signature string from declared parameter types.
    pub fn compute_signature(&self, interner: &mut Interner) -> Symbol {
        let mut text = interner.resolve(self.name).to_string();
        text.push('(');
        for (i, parameter) in self.parameters.iter().enumerate() {
            if i > 0 {
                text.push(',');
            }
            text.push_str(interner.resolve(parameter.declared_type));
        }
        text.push(')');
        interner.intern(&text)
    }

    /// Pushes a local and returns its index. Parameters occupy the lowest
    /// indices, so this is also how parameters register themselves.
    pub fn add_local(
        &mut self,
        name: Symbol,
        declared_type: Option<Symbol>,
        pos: SourcePos,
    ) -> usize {
        let index = self.locals.len();
        self.locals.push(Local {
            name,
            declared_type,
            resolved_type: None,
            index,
            pos,
        });
        index
    }

    pub fn accepts_arg_count(&self, count: usize) -> bool {
        count >= self.min_args && count <= self.parameters.len()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PropertyAttributes {
    pub is_native: bool,
    pub is_requisite: bool,
}

/// An instance property, or a type-level global when stored in the owner's
/// `globals` list.
#[derive(Clone, Debug)]
pub struct Property {
    pub owner: TypeId,
    pub name: Symbol,
    pub declared_type: Symbol,
    pub resolved_type: Option<TypeId>,
    pub attributes: PropertyAttributes,
    pub initial_value: Option<Cmd>,
    pub is_used: bool,
    pub pos: SourcePos,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_method(interner: &mut Interner) -> Method {
        Method {
            id: MethodId(0),
            owner: TypeId(0),
            name: interner.intern("frobnicate"),
            signature: Symbol::EMPTY,
            return_type_name: None,
            return_type: None,
            task_result_type_name: None,
            task_result_type: None,
            parameters: Vec::new(),
            min_args: 0,
            locals: Vec::new(),
            statements: Vec::new(),
            attributes: MethodAttributes::default(),
            native_code: None,
            is_routine: false,
            overridden: None,
            overriding: Vec::new(),
            incorporating_classes: Vec::new(),
            is_used: false,
            called_dynamically: false,
            index: 0,
            is_resolved: false,
            is_task: false,
            task_type: None,
            control_count: 0,
            pos: SourcePos::default(),
        }
    }

    #[test]
    fn signature_lists_parameter_types() {
        let mut interner = Interner::new();
        let mut method = blank_method(&mut interner);
        let int_name = interner.intern("Int");
        let real_name = interner.intern("Real");
        method.parameters.push(Parameter {
            name: interner.intern("a"),
            declared_type: int_name,
            resolved_type: None,
            default: None,
            pos: SourcePos::default(),
        });
        method.parameters.push(Parameter {
            name: interner.intern("b"),
            declared_type: real_name,
            resolved_type: None,
            default: None,
            pos: SourcePos::default(),
        });
        let signature = method.compute_signature(&mut interner);
        assert_eq!(interner.resolve(signature), "frobnicate(Int,Real)");
    }

    #[test]
    fn arg_count_window_uses_min_args() {
        let mut interner = Interner::new();
        let mut method = blank_method(&mut interner);
        let int_name = interner.intern("Int");
        for name in ["a", "b", "c"] {
            method.parameters.push(Parameter {
                name: interner.intern(name),
                declared_type: int_name,
                resolved_type: None,
                default: None,
                pos: SourcePos::default(),
            });
        }
        method.min_args = 1;
        assert!(!method.accepts_arg_count(0));
        assert!(method.accepts_arg_count(1));
        assert!(method.accepts_arg_count(3));
        assert!(!method.accepts_arg_count(4));
    }

    #[test]
    fn locals_index_densely() {
        let mut interner = Interner::new();
        let mut method = blank_method(&mut interner);
        let a = interner.intern("a");
        let b = interner.intern("b");
        assert_eq!(method.add_local(a, None, SourcePos::default()), 0);
        assert_eq!(method.add_local(b, None, SourcePos::default()), 1);
        assert_eq!(method.locals[1].name, b);
    }
}
