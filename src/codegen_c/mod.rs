//! Whole-program C emission.
//!
//! [`emit_program`] produces two texts: a header (runtime ABI, type
//! structs, prototypes, externs) and an implementation file (runtime
//! definitions, native splices, literal string pool, trace functions,
//! method bodies, the type-info table, the dynamic dispatch table, and the
//! launcher). The driver writes them next to the requested output base
//! name.
//!
//! Layout rules: a class struct starts with the object header and lists
//! surviving properties base-first; compounds and optionals are plain
//! value structs emitted in field-dependency order; the dispatch table is
//! one flat array of function pointers indexed by
//! `type->dispatch_base + method->index`.

pub(crate) mod emit;
pub(crate) mod runtime;
pub(crate) mod types;

use crate::error::Result;
use crate::program::{MethodId, Program, TypeId};
use emit::{escape_c, write_line, EmitContext};
use rustc_hash::FxHashMap;
use runtime::{C_RUNTIME_HEADER, C_RUNTIME_IMPL};
use types::{
    c_type, c_zero_value, global_var_name, is_reference, local_var_name, method_fn_name,
    property_field_name, type_struct_name,
};

#[derive(Debug)]
pub struct CTarget {
    pub header: String,
    pub implementation: String,
}

/// Registered emission targets; `--target` validates against this set.
pub fn is_known_target(tag: &str) -> bool {
    matches!(tag, "c")
}

fn is_builtin_struct(program: &Program, id: TypeId) -> bool {
    id == program.type_object || id == program.type_string || id == program.type_null
}

fn has_c_struct(program: &Program, id: TypeId) -> bool {
    let ty = &program.types[id.index()];
    if is_builtin_struct(program, id) || ty.attributes.is_array || ty.attributes.is_aspect() {
        return false;
    }
    if ty.attributes.is_primitive() {
        return false;
    }
    if program.type_name(id) == "Callback" {
        return false;
    }
    true
}

fn is_class_like(program: &Program, id: TypeId) -> bool {
    let ty = &program.types[id.index()];
    !ty.attributes.is_value_type()
        && !ty.attributes.is_array
        && !ty.attributes.is_aspect()
        && !ty.attributes.is_primitive()
        && program.type_name(id) != "Callback"
        && id != program.type_null
}

/// A method body is emitted when it survived the cull and is neither a
/// macro nor native (inline natives splice at call sites; extern natives
/// come from native includes). Aspect-owned methods emit nothing either:
/// their bodies live in the incorporating classes' copies and calls fan
/// out through a dispatcher.
fn emits_body(program: &Program, id: MethodId) -> bool {
    let method = &program.methods[id.index()];
    method.is_used
        && !method.attributes.is_macro
        && !method.attributes.is_native
        && !program.types[method.owner.index()].attributes.is_aspect()
}

pub fn emit_program(program: &mut Program, header_name: &str, with_main: bool) -> Result<CTarget> {
    // ---------------------------------------------------------------------
    // Runtime type indices: Object first (raw arrays and strings borrow its
    // entry), everything else in id order.
    // ---------------------------------------------------------------------
    let mut used_types: Vec<TypeId> = Vec::new();
    if program.types[program.type_object.index()].is_used {
        used_types.push(program.type_object);
    }
    for ty in &program.types {
        if ty.is_used && ty.id != program.type_object {
            used_types.push(ty.id);
        }
    }
    let mut type_index: FxHashMap<TypeId, usize> = FxHashMap::default();
    for (index, &id) in used_types.iter().enumerate() {
        type_index.insert(id, index);
    }

    let mut dispatch_base = 0usize;
    for &id in &used_types {
        if is_class_like(program, id) {
            program.types[id.index()].dynamic_table_index = dispatch_base;
            dispatch_base += program.types[id.index()].methods.len();
        }
    }
    let dispatch_size = dispatch_base.max(1);

    let used_methods: Vec<MethodId> = program
        .methods
        .iter()
        .filter(|m| m.is_used)
        .map(|m| m.id)
        .collect();
    let aspect_dispatchers: Vec<MethodId> = used_methods
        .iter()
        .copied()
        .filter(|&m| {
            let owner = program.methods[m.index()].owner;
            program.types[owner.index()].attributes.is_aspect()
        })
        .collect();

    // ---------------------------------------------------------------------
    // Header
    // ---------------------------------------------------------------------
    let mut header = String::with_capacity(16 * 1024);
    header.push_str("#ifndef ARGON_GENERATED_H\n#define ARGON_GENERATED_H\n");
    header.push_str(C_RUNTIME_HEADER);
    header.push('\n');

    for splice in &program.native_headers {
        header.push_str(splice);
        header.push('\n');
    }

    // Forward declarations for every generated class struct.
    for &id in &used_types {
        if has_c_struct(program, id) && is_class_like(program, id) {
            let name = type_struct_name(program, id);
            header.push_str(&format!("typedef struct {} {};\n", name, name));
        }
    }
    header.push('\n');

    emit_value_structs(program, &used_types, &mut header)?;
    emit_class_structs(program, &used_types, &mut header);

    for &id in &used_types {
        for i in 0..program.types[id.index()].globals.len() {
            let global = &program.types[id.index()].globals[i];
            if !global.is_used {
                continue;
            }
            let Some(global_type) = global.resolved_type else { continue };
            header.push_str(&format!(
                "extern {} {};\n",
                c_type(program, global_type),
                global_var_name(program, id, global.name)
            ));
        }
    }
    header.push('\n');

    for &method in &used_methods {
        let m = &program.methods[method.index()];
        if m.attributes.is_macro || m.native_code.is_some() {
            continue;
        }
        if program.types[m.owner.index()].attributes.is_aspect() {
            continue;
        }
        header.push_str(&method_signature(program, method));
        header.push_str(";\n");
    }
    for &method in &aspect_dispatchers {
        header.push_str(&aspect_dispatcher_signature(program, method));
        header.push_str(";\n");
    }
    header.push_str("\nvoid Argon_init_literal_strings(void);\nvoid Argon_launch(void);\n");
    header.push_str("#endif\n");

    // ---------------------------------------------------------------------
    // Implementation
    // ---------------------------------------------------------------------
    let mut out = String::with_capacity(64 * 1024);
    out.push_str(&format!("#include \"{}\"\n", header_name));
    out.push_str(C_RUNTIME_IMPL);
    out.push('\n');

    for splice in &program.native_code {
        out.push_str(splice);
        out.push('\n');
    }

    // Globals and singleton slots.
    for &id in &used_types {
        for i in 0..program.types[id.index()].globals.len() {
            let global = &program.types[id.index()].globals[i];
            if !global.is_used {
                continue;
            }
            let Some(global_type) = global.resolved_type else { continue };
            out.push_str(&format!(
                "{} {} = {};\n",
                c_type(program, global_type),
                global_var_name(program, id, global.name),
                c_zero_value(program, Some(global_type))
            ));
        }
    }
    for &id in &used_types {
        if is_class_like(program, id) {
            out.push_str(&format!("static ArgonObject *s_{};\n", types::sanitize(program.type_name(id))));
        }
    }
    out.push('\n');

    // Literal string pool.
    let pool_size = program.literal_strings.len().max(1);
    out.push_str(&format!("ArgonString *Argon_literal_strings[{}];\n", pool_size));
    out.push_str("void Argon_init_literal_strings(void) {\n");
    for (index, literal) in program.literal_strings.iter().enumerate() {
        out.push_str(&format!(
            "    Argon_literal_strings[{}] = Argon_string_from_utf8(\"{}\");\n",
            index,
            escape_c(literal)
        ));
    }
    out.push_str("}\n\n");

    emit_trace_functions(program, &used_types, &mut out);
    emit_defaults_thunks(program, &used_types, &mut out);

    // Method bodies.
    for &method in &used_methods {
        if emits_body(program, method) {
            emit_method_definition(program, method, &type_index, &mut out)?;
        }
    }

    emit_aspect_dispatchers(program, &aspect_dispatchers, &type_index, &mut out)?;
    emit_type_table(program, &used_types, &type_index, &mut out);
    emit_dispatch_table(program, &used_types, dispatch_size, &mut out);

    // Launcher: string pool, global initializers, then on_launch.
    out.push_str("void Argon_launch(void) {\n    Argon_init_literal_strings();\n");
    for &id in &used_types {
        if let Some(init_globals) = program.types[id.index()].globals_method {
            if program.methods[init_globals.index()].is_used {
                out.push_str(&format!("    {}();\n", method_fn_name(program, init_globals)));
            }
        }
    }
    if let Some(on_launch) = program.on_launch {
        out.push_str(&format!("    {}();\n", method_fn_name(program, on_launch)));
    }
    out.push_str("}\n");

    if with_main {
        out.push_str(
            "\nint main(int argc, char **argv) {\n    (void)argc;\n    (void)argv;\n    \
             Argon_launch();\n    return 0;\n}\n",
        );
    }

    Ok(CTarget { header, implementation: out })
}

// =============================================================================
// Struct layout
// =============================================================================

/// Compounds and optionals, topologically ordered so field types precede
/// their users; cycles fall back to declaration order.
fn emit_value_structs(program: &Program, used_types: &[TypeId], out: &mut String) -> Result<()> {
    let mut remaining: Vec<TypeId> = used_types
        .iter()
        .copied()
        .filter(|&id| {
            has_c_struct(program, id) && program.types[id.index()].attributes.is_value_type()
        })
        .collect();

    while !remaining.is_empty() {
        let before = remaining.len();
        let snapshot = remaining.clone();
        remaining.retain(|&id| {
            let deps_ready = value_field_types(program, id)
                .into_iter()
                .all(|dep| !snapshot.contains(&dep) || dep == id);
            if deps_ready {
                emit_one_value_struct(program, id, out);
                false
            } else {
                true
            }
        });
        if remaining.len() == before {
            for &id in &remaining {
                emit_one_value_struct(program, id, out);
            }
            break;
        }
    }
    Ok(())
}

fn value_field_types(program: &Program, id: TypeId) -> Vec<TypeId> {
    let ty = &program.types[id.index()];
    if ty.attributes.is_optional {
        return ty.element_type.into_iter().collect();
    }
    ty.properties
        .iter()
        .filter(|p| p.is_used)
        .filter_map(|p| p.resolved_type)
        .filter(|&t| program.types[t.index()].attributes.is_value_type())
        .collect()
}

fn emit_one_value_struct(program: &Program, id: TypeId, out: &mut String) {
    let name = type_struct_name(program, id);
    let ty = &program.types[id.index()];
    out.push_str(&format!("typedef struct {} {{\n", name));
    if ty.attributes.is_optional {
        let element = ty.element_type.unwrap_or(program.type_object);
        out.push_str(&format!("    {} value;\n    ArgonLogical exists;\n", c_type(program, element)));
    } else {
        let mut any = false;
        for property in &ty.properties {
            if !property.is_used {
                continue;
            }
            let Some(property_type) = property.resolved_type else { continue };
            out.push_str(&format!(
                "    {} {};\n",
                c_type(program, property_type),
                property_field_name(program, property.name)
            ));
            any = true;
        }
        if !any {
            out.push_str("    char _empty;\n");
        }
    }
    out.push_str(&format!("}} {};\n\n", name));
}

fn emit_class_structs(program: &Program, used_types: &[TypeId], out: &mut String) {
    for &id in used_types {
        if !has_c_struct(program, id) || !is_class_like(program, id) {
            continue;
        }
        let name = type_struct_name(program, id);
        out.push_str(&format!("struct {} {{\n    ArgonObject header;\n", name));
        for property in &program.types[id.index()].properties {
            if !property.is_used {
                continue;
            }
            let Some(property_type) = property.resolved_type else { continue };
            out.push_str(&format!(
                "    {} {};\n",
                c_type(program, property_type),
                property_field_name(program, property.name)
            ));
        }
        out.push_str("};\n\n");
    }
}

// =============================================================================
// Methods
// =============================================================================

fn method_c_return(program: &Program, id: MethodId) -> String {
    let method = &program.methods[id.index()];
    if method.return_type.is_none()
        && !method.is_routine
        && program.interner.resolve(method.name) == "init"
    {
        // init returns its receiver so construction chains.
        let owner = type_struct_name(program, method.owner);
        return format!("{}*", owner);
    }
    types::c_return_type(program, id)
}

fn method_signature(program: &Program, id: MethodId) -> String {
    let method = &program.methods[id.index()];
    let mut out = format!("{} {}(", method_c_return(program, id), method_fn_name(program, id));
    let mut first = true;
    if !method.is_routine {
        let owner = &program.types[method.owner.index()];
        if owner.attributes.is_value_type() {
            out.push_str(&format!("{} this_", type_struct_name(program, method.owner)));
        } else {
            out.push_str(&format!("{}* this_", type_struct_name(program, method.owner)));
        }
        first = false;
    }
    for (index, parameter) in method.parameters.iter().enumerate() {
        if !first {
            out.push_str(", ");
        }
        first = false;
        let parameter_type = parameter.resolved_type.unwrap_or(program.type_object);
        out.push_str(&format!(
            "{} {}",
            c_type(program, parameter_type),
            local_var_name(program, parameter.name, index)
        ));
    }
    if first {
        out.push_str("void");
    }
    out.push(')');
    out
}

fn emit_method_definition(
    program: &Program,
    id: MethodId,
    type_index: &FxHashMap<TypeId, usize>,
    out: &mut String,
) -> Result<()> {
    out.push_str(&method_signature(program, id));
    out.push_str(" {\n");

    let method = &program.methods[id.index()];
    for index in method.parameters.len()..method.locals.len() {
        let local = &method.locals[index];
        out.push_str(&format!(
            "    {} {} = {};\n",
            c_type(program, local.resolved_type.unwrap_or(program.type_object)),
            local_var_name(program, local.name, index),
            c_zero_value(program, local.resolved_type)
        ));
    }

    let mut ctx = EmitContext::new(program, id, type_index);
    let mut body = String::new();
    for statement in &method.statements {
        ctx.statement(statement, &mut body, 1)?;
    }
    out.push_str(&body);

    if ctx.returns_this {
        out.push_str("    return this_;\n");
    }
    out.push_str("}\n\n");
    Ok(())
}

// =============================================================================
// Tracing, defaults, aspect fan-out
// =============================================================================

fn traceable_fields(program: &Program, id: TypeId) -> Vec<(String, TypeId)> {
    program.types[id.index()]
        .properties
        .iter()
        .filter(|p| p.is_used)
        .filter_map(|p| p.resolved_type.map(|t| (property_field_name(program, p.name), t)))
        .filter(|(_, t)| {
            is_reference(program, *t) || program.types[t.index()].attributes.is_optional
        })
        .collect()
}

fn emit_trace_functions(program: &Program, used_types: &[TypeId], out: &mut String) {
    for &id in used_types {
        if !is_class_like(program, id) || is_builtin_struct(program, id) {
            continue;
        }
        let fields = traceable_fields(program, id);
        if fields.is_empty() {
            continue;
        }
        let struct_name = type_struct_name(program, id);
        out.push_str(&format!(
            "static void f_trace_{}(ArgonObject *obj) {{\n    {} *o = ({}*)obj;\n",
            types::sanitize(program.type_name(id)),
            struct_name,
            struct_name
        ));
        for (field, field_type) in fields {
            if program.types[field_type.index()].attributes.is_optional {
                let element = program.types[field_type.index()].element_type;
                if let Some(element) = element {
                    if is_reference(program, element) {
                        out.push_str(&format!(
                            "    if (o->{}.exists) Argon_gc_trace((ArgonObject*)o->{}.value);\n",
                            field, field
                        ));
                    }
                }
            } else {
                out.push_str(&format!("    Argon_gc_trace((ArgonObject*)o->{});\n", field));
            }
        }
        out.push_str("}\n\n");
    }
}

fn emit_defaults_thunks(program: &Program, used_types: &[TypeId], out: &mut String) {
    for &id in used_types {
        if !is_class_like(program, id) {
            continue;
        }
        let Some(defaults) = program.types[id.index()].defaults_method else { continue };
        if !program.methods[defaults.index()].is_used {
            continue;
        }
        let struct_name = type_struct_name(program, id);
        out.push_str(&format!(
            "static void f_defaults_{}(ArgonObject *obj) {{\n    {}(({}*)obj);\n}}\n\n",
            types::sanitize(program.type_name(id)),
            method_fn_name(program, defaults),
            struct_name
        ));
    }
}

fn aspect_dispatcher_signature(program: &Program, method: MethodId) -> String {
    let m = &program.methods[method.index()];
    let mut out = format!(
        "{} f_aspect_{}(ArgonObject *ctx",
        types::c_return_type(program, method),
        method.index()
    );
    for (index, parameter) in m.parameters.iter().enumerate() {
        let parameter_type = parameter.resolved_type.unwrap_or(program.type_object);
        out.push_str(&format!(
            ", {} {}",
            c_type(program, parameter_type),
            local_var_name(program, parameter.name, index)
        ));
    }
    out.push(')');
    out
}

/// An aspect call fans out across every incorporating class at runtime.
fn emit_aspect_dispatchers(
    program: &Program,
    dispatchers: &[MethodId],
    type_index: &FxHashMap<TypeId, usize>,
    out: &mut String,
) -> Result<()> {
    for &method in dispatchers {
        let m = &program.methods[method.index()];
        let returns = m.return_type.is_some();
        out.push_str(&aspect_dispatcher_signature(program, method));
        out.push_str(" {\n    switch (ctx->type->index) {\n");
        let signature = m.signature;
        for &incorporator in &m.incorporating_classes {
            if !program.types[incorporator.index()].is_used {
                continue;
            }
            let Some(&runtime_index) = type_index.get(&incorporator) else { continue };
            let Some(implementation) = program.find_method_by_signature(incorporator, signature)
            else {
                continue;
            };
            if !program.methods[implementation.index()].is_used {
                continue;
            }
            let mut call = format!(
                "{}(({}*)ctx",
                method_fn_name(program, implementation),
                type_struct_name(program, incorporator)
            );
            for (index, parameter) in m.parameters.iter().enumerate() {
                call.push_str(&format!(
                    ", {}",
                    local_var_name(program, parameter.name, index)
                ));
            }
            call.push(')');
            if returns {
                write_line(out, 2, &format!("case {}: return {};", runtime_index, call));
            } else {
                write_line(out, 2, &format!("case {}: {}; return;", runtime_index, call));
            }
        }
        out.push_str("    default:\n        fprintf(stderr, \"no aspect implementation\\n\");\n        exit(3);\n    }\n}\n\n");
    }
    Ok(())
}

// =============================================================================
// Tables
// =============================================================================

fn emit_type_table(
    program: &Program,
    used_types: &[TypeId],
    type_index: &FxHashMap<TypeId, usize>,
    out: &mut String,
) {
    for &id in used_types {
        let bases: Vec<String> = program.types[id.index()]
            .flat_base_types
            .iter()
            .filter_map(|b| type_index.get(b))
            .map(|i| i.to_string())
            .collect();
        out.push_str(&format!(
            "static const ArgonInt32 bases_{}[] = {{{}}};\n",
            types::sanitize(program.type_name(id)),
            if bases.is_empty() { "0".to_string() } else { bases.join(", ") }
        ));
    }

    out.push_str("\nArgonType Argon_types[] = {\n");
    for (index, &id) in used_types.iter().enumerate() {
        let ty = &program.types[id.index()];
        let sanitized = types::sanitize(program.type_name(id));
        let size = if is_class_like(program, id) || ty.attributes.is_value_type() {
            format!("(ArgonInt32)sizeof({})", type_struct_name(program, id))
        } else {
            "(ArgonInt32)sizeof(ArgonObject)".to_string()
        };
        let base_count = ty
            .flat_base_types
            .iter()
            .filter(|b| type_index.contains_key(b))
            .count();
        let trace = if is_class_like(program, id)
            && !is_builtin_struct(program, id)
            && !traceable_fields(program, id).is_empty()
        {
            format!("f_trace_{}", sanitized)
        } else {
            "NULL".to_string()
        };
        let defaults = match ty.defaults_method {
            Some(d) if program.methods[d.index()].is_used => format!("f_defaults_{}", sanitized),
            _ => "NULL".to_string(),
        };
        let singleton = if is_class_like(program, id) {
            format!("&s_{}", sanitized)
        } else {
            "NULL".to_string()
        };
        out.push_str(&format!(
            "    {{ \"{}\", {}, {}, {}, {}, bases_{}, {}, {}, {} }},\n",
            escape_c(program.type_name(id)),
            index,
            size,
            ty.dynamic_table_index,
            base_count,
            sanitized,
            trace,
            defaults,
            singleton
        ));
    }
    out.push_str("};\n");
    out.push_str(&format!(
        "const ArgonInt32 Argon_type_count = {};\n\n",
        used_types.len()
    ));
}

fn emit_dispatch_table(
    program: &Program,
    used_types: &[TypeId],
    dispatch_size: usize,
    out: &mut String,
) {
    out.push_str(&format!("void *Argon_dispatch[{}] = {{\n", dispatch_size));
    for &id in used_types {
        if !is_class_like(program, id) {
            continue;
        }
        for &method in &program.types[id.index()].methods {
            if emits_body(program, method) {
                out.push_str(&format!("    (void*){},\n", method_fn_name(program, method)));
            } else {
                out.push_str("    NULL,\n");
            }
        }
    }
    out.push_str("};\n\n");
}
