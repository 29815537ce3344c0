//! C-side naming and type mapping.
//!
//! Identifier mangling is deterministic: specializer punctuation maps to
//! underscores, predicate `?` becomes `q`, and everything lands in one of
//! three namespaces (`t_` for type structs, `f_` for functions, `p_` for
//! property fields), so Argon names can never collide with C keywords or
//! runtime identifiers.

use crate::program::{MethodId, Program, TypeId};
use crate::template::TypeKind;

/// Maps an Argon name to a C-safe fragment.
pub(super) fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => out.push(c),
            '<' => {
                // `<<` opens a specializer list.
                if chars.peek() == Some(&'<') {
                    chars.next();
                }
                out.push('_');
            }
            '>' => {
                if chars.peek() == Some(&'>') {
                    chars.next();
                }
            }
            ',' => out.push('_'),
            '?' => out.push('q'),
            _ => out.push('_'),
        }
    }
    out
}

/// `t_List_Int`: struct name for a type. `Object` and `String` live in
/// the runtime and keep their runtime struct names.
pub(super) fn type_struct_name(program: &Program, id: TypeId) -> String {
    if id == program.type_object || id == program.type_null {
        return "ArgonObject".to_string();
    }
    if id == program.type_string {
        return "ArgonString".to_string();
    }
    format!("t_{}", sanitize(program.type_name(id)))
}

/// `f_Hello__init_4`: function name for a method; the id suffix keeps
/// overloads apart.
pub(super) fn method_fn_name(program: &Program, id: MethodId) -> String {
    let method = &program.methods[id.index()];
    format!(
        "f_{}__{}_{}",
        sanitize(program.type_name(method.owner)),
        sanitize(program.interner.resolve(method.name)),
        id.index()
    )
}

/// `p_count`: property field name.
pub(super) fn property_field_name(program: &Program, name: crate::intern::Symbol) -> String {
    format!("p_{}", sanitize(program.interner.resolve(name)))
}

/// `g_Stats__total`: global variable name.
pub(super) fn global_var_name(
    program: &Program,
    owner: TypeId,
    name: crate::intern::Symbol,
) -> String {
    format!(
        "g_{}__{}",
        sanitize(program.type_name(owner)),
        sanitize(program.interner.resolve(name))
    )
}

/// `l_total_3`: local variable name; the index keeps shadowed names apart.
pub(super) fn local_var_name(program: &Program, name: crate::intern::Symbol, index: usize) -> String {
    format!("l_{}_{}", sanitize(program.interner.resolve(name)), index)
}

/// The C type an Argon type maps to in declarations and casts.
pub(super) fn c_type(program: &Program, id: TypeId) -> String {
    if id == program.type_int {
        return "ArgonInt32".to_string();
    }
    if id == program.type_long {
        return "ArgonInt64".to_string();
    }
    if id == program.type_real {
        return "ArgonReal64".to_string();
    }
    if id == program.type_character {
        return "ArgonCharacter".to_string();
    }
    if id == program.type_logical {
        return "ArgonLogical".to_string();
    }
    if id == program.type_string {
        return "ArgonString*".to_string();
    }
    if id == program.type_null {
        return "ArgonObject*".to_string();
    }
    let ty = &program.types[id.index()];
    if ty.attributes.is_array {
        return "ArgonArray*".to_string();
    }
    if ty.attributes.is_optional || ty.attributes.kind == TypeKind::Compound {
        return type_struct_name(program, id);
    }
    if ty.attributes.is_aspect() {
        return "ArgonObject*".to_string();
    }
    if ty.attributes.is_primitive() {
        // User primitives alias the widest integer register.
        return "ArgonInt64".to_string();
    }
    if program.type_name(id) == "Callback" {
        return "void*".to_string();
    }
    format!("{}*", type_struct_name(program, id))
}

pub(super) fn c_return_type(program: &Program, id: MethodId) -> String {
    match program.methods[id.index()].return_type {
        Some(t) => c_type(program, t),
        None => "void".to_string(),
    }
}

/// Reference types participate in tracing and null checks.
pub(super) fn is_reference(program: &Program, id: TypeId) -> bool {
    if id == program.type_string || id == program.type_null {
        return true;
    }
    let ty = &program.types[id.index()];
    if ty.attributes.is_array {
        return true;
    }
    if ty.attributes.is_value_type() || ty.attributes.is_primitive() {
        return false;
    }
    if id == program.type_int
        || id == program.type_long
        || id == program.type_real
        || id == program.type_character
        || id == program.type_logical
    {
        return false;
    }
    program.type_name(id) != "Callback"
}

/// Zero value usable as an initializer for any mapped type.
pub(super) fn c_zero_value(program: &Program, id: Option<TypeId>) -> String {
    match id {
        None => "0".to_string(),
        Some(id) => {
            let ty = &program.types[id.index()];
            if is_reference(program, id) {
                "NULL".to_string()
            } else if ty.attributes.is_optional || ty.attributes.kind == TypeKind::Compound {
                format!("(({}){{0}})", type_struct_name(program, id))
            } else if id == program.type_real {
                "0.0".to_string()
            } else {
                "0".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_maps_specializers() {
        assert_eq!(sanitize("List<<Int>>"), "List_Int");
        assert_eq!(sanitize("Table<<String,Int>>"), "Table_String_Int");
        assert_eq!(sanitize("empty?"), "emptyq");
        assert_eq!(sanitize("Int?"), "Intq");
    }

    #[test]
    fn sanitize_is_deterministic_for_nesting() {
        assert_eq!(sanitize("List<<List<<Int>>>>"), "List_List_Int");
    }

    #[test]
    fn builtin_c_types() {
        let mut program = Program::new();
        program.bind_builtins();
        assert_eq!(c_type(&program, program.type_int), "ArgonInt32");
        assert_eq!(c_type(&program, program.type_real), "ArgonReal64");
        assert_eq!(c_type(&program, program.type_string), "ArgonString*");
        assert!(is_reference(&program, program.type_string));
        assert!(!is_reference(&program, program.type_logical));
    }
}
