//! Types and the organization pass.
//!
//! A type progresses through three states:
//!
//! 1. **referenced**: a placeholder created the first time a name is seen.
//! 2. **defined**: its template has been found and instantiated
//!    (specializers substituted, body parsed into a [`TypeDecl`]).
//! 3. **organized**: bases are organized, augments applied, inherited
//!    members merged, override chains linked, aspect incorporation
//!    recorded, and `flat_base_types` computed.
//!
//! Organization is recursive through bases with an explicit visit stack so
//! inheritance cycles surface as type errors instead of stack overflows.

use crate::ast::Cmd;
use crate::error::{CompileError, Result, SourcePos};
use crate::intern::Symbol;
use crate::method::Property;
use crate::program::{MethodId, Program, TypeId};
use crate::source::CharSource;
use crate::template::{specialized_parts, TypeDecl, TypeKind};
use crate::tokenizer::tokenize;
use rustc_hash::FxHashMap;

#[derive(Clone, Copy, Debug)]
pub struct TypeAttributes {
    pub kind: TypeKind,
    pub is_requisite: bool,
    pub is_array: bool,
    pub is_optional: bool,
}

impl TypeAttributes {
    pub fn class() -> Self {
        TypeAttributes {
            kind: TypeKind::Class,
            is_requisite: false,
            is_array: false,
            is_optional: false,
        }
    }

    pub fn of_kind(kind: TypeKind) -> Self {
        TypeAttributes { kind, ..Self::class() }
    }

    pub fn is_aspect(&self) -> bool {
        self.kind == TypeKind::Aspect
    }

    pub fn is_primitive(&self) -> bool {
        self.kind == TypeKind::Primitive
    }

    /// Value types live without an object header: compounds, primitives,
    /// and optionals.
    pub fn is_value_type(&self) -> bool {
        matches!(self.kind, TypeKind::Compound | TypeKind::Primitive) || self.is_optional
    }
}

#[derive(Clone, Debug)]
pub struct Type {
    pub id: TypeId,
    pub name: Symbol,
    pub attributes: TypeAttributes,
    pub base_class: Option<TypeId>,
    /// Incorporated aspects.
    pub base_types: Vec<TypeId>,
    /// Transitive ancestry in deterministic DFS order, duplicates removed.
    pub flat_base_types: Vec<TypeId>,
    /// For arrays, optionals, and lists: the element/wrapped type.
    pub element_type: Option<TypeId>,
    pub definitions: FxHashMap<Symbol, Cmd>,
    pub globals: Vec<Property>,
    pub properties: Vec<Property>,
    pub routines: Vec<MethodId>,
    /// Dynamic methods in dispatch-table order.
    pub methods: Vec<MethodId>,
    pub dynamic_table_index: usize,
    /// When this type is an aspect: classes incorporating it.
    pub incorporating_classes: Vec<TypeId>,
    /// Property redeclarations awaiting a subtype check once names resolve.
    pub narrowings: Vec<(Symbol, Symbol, SourcePos)>,
    /// Hidden method holding property-initializer statements.
    pub defaults_method: Option<MethodId>,
    /// Hidden routine holding global-initializer statements.
    pub globals_method: Option<MethodId>,
    pub decl: Option<TypeDecl>,
    pub defined: bool,
    pub organized: bool,
    pub resolved: bool,
    pub culled: bool,
    pub is_used: bool,
    pub pos: SourcePos,
}

impl Type {
    pub fn placeholder(id: TypeId, name: Symbol, pos: SourcePos) -> Self {
        Type {
            id,
            name,
            attributes: TypeAttributes::class(),
            base_class: None,
            base_types: Vec::new(),
            flat_base_types: Vec::new(),
            element_type: None,
            definitions: FxHashMap::default(),
            globals: Vec::new(),
            properties: Vec::new(),
            routines: Vec::new(),
            methods: Vec::new(),
            dynamic_table_index: 0,
            incorporating_classes: Vec::new(),
            narrowings: Vec::new(),
            defaults_method: None,
            globals_method: None,
            decl: None,
            defined: false,
            organized: false,
            resolved: false,
            culled: false,
            is_used: false,
            pos,
        }
    }

    /// Property lookup; bases are already merged in, so one scan suffices.
    pub fn find_property(&self, name: Symbol) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub fn find_global(&self, name: Symbol) -> Option<usize> {
        self.globals.iter().position(|p| p.name == name)
    }
}

impl Program {
    // =========================================================================
    // Definition (template instantiation)
    // =========================================================================

    /// Instantiates the template behind `id` if it is still undefined.
    /// Returns `true` when work happened.
    pub fn define_type(&mut self, id: TypeId) -> Result<bool> {
        if self.types[id.index()].defined {
            return Ok(false);
        }
        let name = self.types[id.index()].name;
        let pos = self.types[id.index()].pos;
        let text = self.interner.resolve(name).to_string();

        // Optional types organize trivially: a value wrapper, no bases.
        if let Some(inner) = text.strip_suffix('?') {
            let element = self.type_reference_str(pos, inner);
            let ty = &mut self.types[id.index()];
            ty.attributes.is_optional = true;
            ty.element_type = Some(element);
            ty.defined = true;
            ty.organized = true;
            return Ok(true);
        }

        // Arrays are built in: no template, element type from the name.
        if let Some((base, args)) = specialized_parts(&text) {
            if base == "Array" {
                if args.len() != 1 {
                    return Err(CompileError::template(
                        format!("Array takes one specializer, found {}", args.len()),
                        Some(pos),
                    ));
                }
                let element = self.type_reference_str(pos, &args[0]);
                let object_name = self.interner.intern("Object");
                let ty = &mut self.types[id.index()];
                ty.attributes.is_array = true;
                ty.element_type = Some(element);
                ty.defined = true;
                let mut decl = TypeDecl::default();
                decl.base_type_names.push(object_name);
                ty.decl = Some(decl);
                return Ok(true);
            }
        }

        let template = match self.find_template(name) {
            Some(t) => t.clone(),
            None => {
                let base_exists = specialized_parts(&text)
                    .and_then(|(base, _)| self.interner.lookup(&base))
                    .map(|sym| self.templates.contains_key(&sym))
                    .unwrap_or(false);
                let message = if base_exists {
                    format!("wrong number of specializers for template '{}'", text)
                } else {
                    format!("reference to undefined type '{}'", text)
                };
                return Err(CompileError::template(message, Some(pos)));
            }
        };

        self.count_instantiation(pos)?;

        let tokens = match specialized_parts(&text) {
            Some((_, args)) => {
                let mut arg_tokens = Vec::with_capacity(args.len());
                for arg in &args {
                    let file = self.interner.intern("<specializer>");
                    let source = CharSource::from_buffer(file, arg);
                    arg_tokens.push(tokenize(source, &mut self.interner)?);
                }
                template.substitute(&arg_tokens)
            }
            None => template.tokens.clone(),
        };

        let decl = crate::parser::parse_type_decl(tokens, &mut self.interner)?;
        let ty = &mut self.types[id.index()];
        ty.attributes = TypeAttributes::of_kind(template.kind);
        ty.attributes.is_requisite = template.is_requisite || decl.is_requisite;
        ty.decl = Some(decl);
        ty.defined = true;
        Ok(true)
    }

    // =========================================================================
    // Organization
    // =========================================================================

    pub fn organize_type(&mut self, id: TypeId, stack: &mut Vec<TypeId>) -> Result<()> {
        if self.types[id.index()].organized {
            return Ok(());
        }
        if stack.contains(&id) {
            let name = self.type_name(id).to_string();
            return Err(CompileError::type_error(
                format!("cyclic inheritance involving '{}'", name),
                Some(self.types[id.index()].pos),
            ));
        }
        if !self.types[id.index()].defined {
            self.define_type(id)?;
            if self.types[id.index()].organized {
                return Ok(());
            }
        }
        stack.push(id);

        let pos = self.types[id.index()].pos;
        let mut decl = self.types[id.index()].decl.take().unwrap_or_default();

        // 1. Augments keyed by the exact specialized name and by the
        //    template's base name both apply.
        let name = self.types[id.index()].name;
        let mut augment_keys = vec![name];
        if let Some((base, _)) = specialized_parts(self.interner.resolve(name)) {
            if let Some(base_sym) = self.interner.lookup(&base) {
                augment_keys.push(base_sym);
            }
        }
        for key in augment_keys {
            if let Some(augments) = self.augments.get(&key).cloned() {
                for augment in augments {
                    decl.base_type_names.extend(augment.decl.base_type_names.iter().copied());
                    decl.base_type_names.extend(augment.base_type_names.iter().copied());
                    decl.enumerations.extend(augment.decl.enumerations.iter().cloned());
                    decl.definitions.extend(augment.decl.definitions.iter().cloned());
                    decl.properties.extend(augment.decl.properties.iter().cloned());
                    decl.globals.extend(augment.decl.globals.iter().cloned());
                    decl.methods.extend(augment.decl.methods.iter().cloned());
                    decl.routines.extend(augment.decl.routines.iter().cloned());
                }
            }
        }

        // 2. Bases: define, organize, classify into base class vs aspects.
        let mut base_class: Option<TypeId> = None;
        let mut base_aspects: Vec<TypeId> = Vec::new();
        for &base_name in &decl.base_type_names {
            let base_id = self.type_reference(pos, base_name);
            if base_id == id {
                stack.pop();
                return Err(CompileError::type_error(
                    format!("'{}' cannot extend itself", self.type_name(id)),
                    Some(pos),
                ));
            }
            self.define_type(base_id)?;
            self.organize_type(base_id, stack)?;
            if self.types[base_id.index()].attributes.is_aspect() {
                if !base_aspects.contains(&base_id) {
                    base_aspects.push(base_id);
                }
            } else if let Some(existing) = base_class {
                if existing != base_id {
                    stack.pop();
                    return Err(CompileError::type_error(
                        format!(
                            "'{}' names two base classes: '{}' and '{}'",
                            self.type_name(id),
                            self.type_name(existing),
                            self.type_name(base_id)
                        ),
                        Some(pos),
                    ));
                }
            } else {
                base_class = Some(base_id);
            }
        }

        // Classes other than Object default to extending Object.
        let kind = self.types[id.index()].attributes.kind;
        let is_object = id == self.type_object;
        if base_class.is_none() && kind == TypeKind::Class && !is_object {
            let object = self.type_object;
            self.define_type(object)?;
            self.organize_type(object, stack)?;
            base_class = Some(object);
        }

        // 3. Properties and globals: base first, then own; a redeclared
        //    name narrows in place and is checked once types resolve.
        let mut properties: Vec<Property> = base_class
            .map(|b| self.types[b.index()].properties.clone())
            .unwrap_or_default();
        let mut globals: Vec<Property> = base_class
            .map(|b| self.types[b.index()].globals.clone())
            .unwrap_or_default();
        let mut narrowings = Vec::new();
        for list in [(&mut properties, &decl.properties), (&mut globals, &decl.globals)] {
            let (merged, own) = list;
            for p in own.iter() {
                if let Some(slot) = merged.iter().position(|existing| existing.name == p.name) {
                    if merged[slot].declared_type != p.declared_type {
                        narrowings.push((merged[slot].declared_type, p.declared_type, p.pos));
                    }
                    merged[slot] = Property {
                        owner: id,
                        name: p.name,
                        declared_type: p.declared_type,
                        resolved_type: None,
                        attributes: p.attributes,
                        initial_value: p.initial_value.clone(),
                        is_used: false,
                        pos: p.pos,
                    };
                } else {
                    merged.push(Property {
                        owner: id,
                        name: p.name,
                        declared_type: p.declared_type,
                        resolved_type: None,
                        attributes: p.attributes,
                        initial_value: p.initial_value.clone(),
                        is_used: false,
                        pos: p.pos,
                    });
                }
            }
            for p in merged.iter_mut() {
                p.owner = id;
            }
        }

        // 4. Definitions: inherited, then enumerations, then own.
        let mut definitions: FxHashMap<Symbol, Cmd> = base_class
            .map(|b| self.types[b.index()].definitions.clone())
            .unwrap_or_default();
        let mut counter: i32 = 0;
        for (name, explicit) in &decl.enumerations {
            match explicit {
                Some(Cmd::LiteralInteger { value, .. }) => counter = *value,
                Some(other) => {
                    definitions.insert(*name, other.clone());
                    continue;
                }
                None => {}
            }
            definitions.insert(*name, Cmd::LiteralInteger { pos, value: counter });
            counter += 1;
        }
        for (name, value) in &decl.definitions {
            definitions.insert(*name, value.clone());
        }

        // 5. Routines: later same-signature declarations hide earlier.
        let mut routines: Vec<MethodId> = base_class
            .map(|b| self.types[b.index()].routines.clone())
            .unwrap_or_default();
        for routine_decl in &decl.routines {
            let new_id = self.add_method(id, routine_decl, true);
            let signature = self.methods[new_id.index()].signature;
            if let Some(slot) = routines
                .iter()
                .position(|&m| self.methods[m.index()].signature == signature)
            {
                routines[slot] = new_id;
            } else {
                routines.push(new_id);
            }
        }

        // 6. Dynamic methods: same-signature declarations override and keep
        //    the base slot so dispatch indices line up.
        let mut methods: Vec<MethodId> = base_class
            .map(|b| self.types[b.index()].methods.clone())
            .unwrap_or_default();
        for method_decl in &decl.methods {
            let new_id = self.add_method(id, method_decl, false);
            let signature = self.methods[new_id.index()].signature;
            if let Some(slot) = methods
                .iter()
                .position(|&m| self.methods[m.index()].signature == signature)
            {
                let base_method = methods[slot];
                self.methods[new_id.index()].overridden = Some(base_method);
                self.methods[base_method.index()].overriding.push(new_id);
                methods[slot] = new_id;
            } else {
                methods.push(new_id);
            }
        }

        // 7. Aspect incorporation: record the incorporator on every aspect
        //    method, and copy in default bodies the class does not supply.
        for &aspect_id in &base_aspects {
            if kind != TypeKind::Aspect {
                if !self.types[aspect_id.index()].incorporating_classes.contains(&id) {
                    self.types[aspect_id.index()].incorporating_classes.push(id);
                }
            }
            let aspect_methods = self.types[aspect_id.index()].methods.clone();
            for aspect_method in aspect_methods {
                if kind != TypeKind::Aspect {
                    if !self.methods[aspect_method.index()]
                        .incorporating_classes
                        .contains(&id)
                    {
                        self.methods[aspect_method.index()].incorporating_classes.push(id);
                    }
                }
                let signature = self.methods[aspect_method.index()].signature;
                let already = methods
                    .iter()
                    .any(|&m| self.methods[m.index()].signature == signature);
                if !already {
                    let copied = self.clone_method_for(aspect_method, id);
                    methods.push(copied);
                }
            }
        }

        for (slot, &method_id) in methods.iter().enumerate() {
            self.methods[method_id.index()].index = slot;
        }

        // 8. Flat ancestry: DFS through the base class then aspects,
        //    pulling in their own flat lists, first occurrence wins.
        let mut flat: Vec<TypeId> = Vec::new();
        let mut direct: Vec<TypeId> = Vec::new();
        direct.extend(base_class);
        direct.extend(base_aspects.iter().copied());
        for base in direct {
            if !flat.contains(&base) {
                flat.push(base);
            }
            for &ancestor in &self.types[base.index()].flat_base_types {
                if !flat.contains(&ancestor) {
                    flat.push(ancestor);
                }
            }
        }

        let ty = &mut self.types[id.index()];
        ty.base_class = base_class;
        ty.base_types = base_aspects;
        ty.flat_base_types = flat;
        ty.properties = properties;
        ty.globals = globals;
        ty.definitions = definitions;
        ty.routines = routines;
        ty.methods = methods;
        ty.narrowings = narrowings;
        ty.organized = true;
        stack.pop();
        Ok(())
    }

    /// Deep-copies an aspect method into an incorporating class.
    fn clone_method_for(&mut self, source: MethodId, owner: TypeId) -> MethodId {
        let mut method = self.methods[source.index()].clone();
        let id = MethodId(self.methods.len() as u32);
        method.id = id;
        method.owner = owner;
        method.overridden = None;
        method.overriding = Vec::new();
        method.incorporating_classes = Vec::new();
        method.is_resolved = false;
        method.is_used = false;
        self.methods.push(method);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    #[test]
    fn optional_types_wrap_their_element() {
        let mut program = Program::new();
        program.bind_builtins();
        let id = program.type_reference_str(SourcePos::default(), "Int?");
        program.define_type(id).unwrap();
        let ty = &program.types[id.index()];
        assert!(ty.attributes.is_optional);
        assert!(ty.attributes.is_value_type());
        assert_eq!(ty.element_type, Some(program.type_int));
    }

    #[test]
    fn array_types_record_element() {
        let mut program = Program::new();
        program.bind_builtins();
        let id = program.type_reference_str(SourcePos::default(), "Array<<Real>>");
        program.define_type(id).unwrap();
        let ty = &program.types[id.index()];
        assert!(ty.attributes.is_array);
        assert_eq!(ty.element_type, Some(program.type_real));
    }

    #[test]
    fn undefined_type_reports_template_error() {
        let mut program = Program::new();
        program.bind_builtins();
        let id = program.type_reference_str(SourcePos::default(), "Ghost");
        let err = program.define_type(id).unwrap_err();
        assert!(err.message().contains("Ghost"));
    }
}
