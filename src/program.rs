//! The program registry.
//!
//! [`Program`] owns every type, method, template, augment, and literal
//! string of one compile, and acts as the arena the rest of the compiler
//! points into: cross-references are [`TypeId`]/[`MethodId`] indices, never
//! owning pointers, so the deeply cyclic type ↔ method ↔ body graph needs
//! no reference counting.

use crate::error::{CompileError, Result, SourcePos};
use crate::intern::{Interner, Symbol};
use crate::method::{Method, MethodAttributes, Parameter};
use crate::template::{specialized_parts, Augment, MethodDecl, Template};
use crate::types::{Type, TypeAttributes};
use rustc_hash::FxHashMap;

/// Stable index of a [`Type`] in [`Program::types`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable index of a [`Method`] in [`Program::methods`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MethodId(pub u32);

impl MethodId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A `$requisite Name[.signature]` cull root.
#[derive(Clone, Debug)]
pub struct RequisiteItem {
    pub type_name: Symbol,
    pub signature: Option<Symbol>,
    pub pos: SourcePos,
}

/// Instantiated-type ceiling; exceeding it means runaway recursive
/// instantiation (`Wrap<<Wrap<<...>>>>`).
pub const MAX_INSTANTIATIONS: usize = 4096;

#[derive(Debug)]
pub struct Program {
    pub interner: Interner,
    pub types: Vec<Type>,
    pub type_lookup: FxHashMap<Symbol, TypeId>,
    pub methods: Vec<Method>,
    /// Templates by base name; several arities may share a name.
    pub templates: FxHashMap<Symbol, Vec<Template>>,
    pub augments: FxHashMap<Symbol, Vec<Augment>>,
    pub literal_strings: Vec<String>,
    pub literal_string_lookup: FxHashMap<String, usize>,
    pub native_headers: Vec<String>,
    pub native_code: Vec<String>,
    pub requisites: Vec<RequisiteItem>,
    /// The class whose construction forms the body of `on_launch`: the
    /// first class declared in the main source file.
    pub main_class_name: Option<Symbol>,
    pub on_launch: Option<MethodId>,

    // Built-in type handles, bound after the prelude is parsed.
    pub type_object: TypeId,
    pub type_string: TypeId,
    pub type_int: TypeId,
    pub type_long: TypeId,
    pub type_real: TypeId,
    pub type_character: TypeId,
    pub type_logical: TypeId,
    pub type_null: TypeId,

    instantiation_count: usize,
}

impl Program {
    pub fn new() -> Self {
        Program {
            interner: Interner::new(),
            types: Vec::new(),
            type_lookup: FxHashMap::default(),
            methods: Vec::new(),
            templates: FxHashMap::default(),
            augments: FxHashMap::default(),
            literal_strings: Vec::new(),
            literal_string_lookup: FxHashMap::default(),
            native_headers: Vec::new(),
            native_code: Vec::new(),
            requisites: Vec::new(),
            main_class_name: None,
            on_launch: None,
            type_object: TypeId(0),
            type_string: TypeId(0),
            type_int: TypeId(0),
            type_long: TypeId(0),
            type_real: TypeId(0),
            type_character: TypeId(0),
            type_logical: TypeId(0),
            type_null: TypeId(0),
            instantiation_count: 0,
        }
    }

    // =========================================================================
    // Type references
    // =========================================================================

    /// Returns the type named `name`, creating an undefined placeholder on
    /// first reference. Definition and organization happen lazily in the
    /// resolve loop.
    pub fn type_reference(&mut self, pos: SourcePos, name: Symbol) -> TypeId {
        if let Some(&id) = self.type_lookup.get(&name) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(Type::placeholder(id, name, pos));
        self.type_lookup.insert(name, id);
        id
    }

    pub fn type_reference_str(&mut self, pos: SourcePos, name: &str) -> TypeId {
        let sym = self.interner.intern(name);
        self.type_reference(pos, sym)
    }

    pub fn find_type(&self, name: Symbol) -> Option<TypeId> {
        self.type_lookup.get(&name).copied()
    }

    pub fn type_name(&self, id: TypeId) -> &str {
        self.interner.resolve(self.types[id.index()].name)
    }

    /// Binds the built-in type handles once the prelude's declarations are
    /// registered. The null type never comes from source.
    pub fn bind_builtins(&mut self) {
        let pos = SourcePos::default();
        self.type_object = self.type_reference_str(pos, "Object");
        self.type_string = self.type_reference_str(pos, "String");
        self.type_int = self.type_reference_str(pos, "Int");
        self.type_long = self.type_reference_str(pos, "Long");
        self.type_real = self.type_reference_str(pos, "Real");
        self.type_character = self.type_reference_str(pos, "Character");
        self.type_logical = self.type_reference_str(pos, "Logical");
        let null_name = self.interner.intern("null");
        self.type_null = self.type_reference(pos, null_name);
        let null_id = self.type_null;
        let ty = &mut self.types[null_id.index()];
        ty.attributes = TypeAttributes::class();
        ty.defined = true;
        ty.organized = true;
    }

    // =========================================================================
    // Template instantiation bookkeeping
    // =========================================================================

    pub fn add_template(&mut self, template: Template) {
        self.templates.entry(template.name).or_default().push(template);
    }

    pub fn add_augment(&mut self, augment: Augment) {
        self.augments.entry(augment.target_name).or_default().push(augment);
    }

    /// Looks up the template for `name`, honoring specialization arity.
    pub fn find_template(&self, name: Symbol) -> Option<&Template> {
        let text = self.interner.resolve(name);
        match specialized_parts(text) {
            Some((base, args)) => {
                let base_sym = self.interner.lookup(&base)?;
                self.templates
                    .get(&base_sym)?
                    .iter()
                    .find(|t| t.placeholders.len() == args.len())
            }
            None => self
                .templates
                .get(&name)?
                .iter()
                .find(|t| t.placeholders.is_empty()),
        }
    }

    /// Counts one instantiation against the runaway ceiling.
    pub fn count_instantiation(&mut self, pos: SourcePos) -> Result<()> {
        self.instantiation_count += 1;
        if self.instantiation_count > MAX_INSTANTIATIONS {
            return Err(CompileError::template(
                "template instantiation exceeds its depth ceiling (recursive specialization?)",
                Some(pos),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Methods
    // =========================================================================

    /// Materializes a parsed member declaration as a [`Method`] owned by
    /// `owner`. The signature is computed from the declared parameter
    /// types right away so organization can match overrides.
    pub fn add_method(&mut self, owner: TypeId, decl: &MethodDecl, is_routine: bool) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        let parameters: Vec<Parameter> = decl
            .parameters
            .iter()
            .map(|p| Parameter {
                name: p.name,
                declared_type: p.declared_type,
                resolved_type: None,
                default: p.default.clone(),
                pos: p.pos,
            })
            .collect();
        let min_args = parameters.iter().take_while(|p| p.default.is_none()).count();
        let mut method = Method {
            id,
            owner,
            name: decl.name,
            signature: Symbol::EMPTY,
            return_type_name: decl.return_type_name,
            return_type: None,
            task_result_type_name: decl.task_result_type_name,
            task_result_type: None,
            parameters,
            min_args,
            locals: Vec::new(),
            statements: decl.statements.clone(),
            attributes: decl.attributes,
            native_code: decl.native_code.clone(),
            is_routine,
            overridden: None,
            overriding: Vec::new(),
            incorporating_classes: Vec::new(),
            is_used: false,
            called_dynamically: false,
            index: 0,
            is_resolved: false,
            is_task: decl.task_result_type_name.is_some(),
            task_type: None,
            control_count: 0,
            pos: decl.pos,
        };
        for parameter in method.parameters.clone() {
            method.add_local(parameter.name, Some(parameter.declared_type), parameter.pos);
        }
        method.signature = method.compute_signature(&mut self.interner);
        self.methods.push(method);
        id
    }

    /// Installs a synthesized method (task factories, `on_launch`).
    pub fn add_synthetic_method(
        &mut self,
        owner: TypeId,
        name: &str,
        attributes: MethodAttributes,
        is_routine: bool,
        pos: SourcePos,
    ) -> MethodId {
        let name_sym = self.interner.intern(name);
        let decl = MethodDecl {
            name: name_sym,
            parameters: Vec::new(),
            return_type_name: None,
            task_result_type_name: None,
            attributes,
            native_code: None,
            statements: Vec::new(),
            pos,
        };
        self.add_method(owner, &decl, is_routine)
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.index()]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut Method {
        &mut self.methods[id.index()]
    }

    // =========================================================================
    // Type queries
    // =========================================================================

    /// `instance_of(a, b)`: is `a` the same as or derived from `b`?
    /// Both types must be organized for ancestry to be visible.
    pub fn instance_of(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        self.types[a.index()].flat_base_types.contains(&b)
    }

    pub fn is_numeric(&self, id: TypeId) -> bool {
        id == self.type_int || id == self.type_long || id == self.type_real || id == self.type_character
    }

    fn numeric_rank(&self, id: TypeId) -> u32 {
        if id == self.type_character {
            0
        } else if id == self.type_int {
            1
        } else if id == self.type_long {
            2
        } else {
            3
        }
    }

    /// Wider of two numeric types; `Character` promotes through `Int`.
    pub fn common_numeric_type(&self, a: TypeId, b: TypeId) -> TypeId {
        let winner = if self.numeric_rank(a) >= self.numeric_rank(b) { a } else { b };
        if winner == self.type_character {
            self.type_int
        } else {
            winner
        }
    }

    /// Whether an argument of type `from` fits a parameter of type `to`
    /// without an explicit conversion. Returns the conversion cost: 0 for
    /// exact, 1 for subtype/widening/to-String.
    pub fn implicit_conversion_cost(&self, from: TypeId, to: TypeId) -> Option<u32> {
        if from == to {
            return Some(0);
        }
        let to_type = &self.types[to.index()];
        if from == self.type_null {
            // null fits any reference or optional parameter
            if !self.types[to.index()].attributes.is_value_type() || to_type.attributes.is_optional {
                return Some(1);
            }
            return None;
        }
        if self.is_numeric(from) && self.is_numeric(to) && self.numeric_rank(from) <= self.numeric_rank(to) {
            return Some(1);
        }
        if self.instance_of(from, to) {
            return Some(1);
        }
        // Optional wrap: T fits T?
        if to_type.attributes.is_optional && to_type.element_type == Some(from) {
            return Some(1);
        }
        // Anything with a toString() fits a String parameter.
        if to == self.type_string && self.find_method_by_signature_str(from, "toString()").is_some() {
            return Some(1);
        }
        None
    }

    /// Finds a method on `type_id` (own or inherited) by exact signature.
    pub fn find_method_by_signature(&self, type_id: TypeId, signature: Symbol) -> Option<MethodId> {
        let ty = &self.types[type_id.index()];
        ty.methods
            .iter()
            .chain(ty.routines.iter())
            .copied()
            .find(|&m| self.methods[m.index()].signature == signature)
    }

    pub fn find_method_by_signature_str(&self, type_id: TypeId, signature: &str) -> Option<MethodId> {
        let sig = self.interner.lookup(signature)?;
        self.find_method_by_signature(type_id, sig)
    }

    // =========================================================================
    // Literal strings
    // =========================================================================

    /// Index of `value` in the deduplicated literal-string pool.
    pub fn literal_string_index(&mut self, value: &str) -> usize {
        if let Some(&index) = self.literal_string_lookup.get(value) {
            return index;
        }
        let index = self.literal_strings.len();
        self.literal_strings.push(value.to_string());
        self.literal_string_lookup.insert(value.to_string(), index);
        index
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_reference_is_idempotent() {
        let mut program = Program::new();
        let name = program.interner.intern("Widget");
        let a = program.type_reference(SourcePos::default(), name);
        let b = program.type_reference(SourcePos::default(), name);
        assert_eq!(a, b);
        assert_eq!(program.types.len(), 1);
    }

    #[test]
    fn literal_strings_deduplicate() {
        let mut program = Program::new();
        let a = program.literal_string_index("hello");
        let b = program.literal_string_index("world");
        let c = program.literal_string_index("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(program.literal_strings[a], "hello");
        assert_eq!(program.literal_string_lookup["world"], b);
    }

    #[test]
    fn numeric_ranks_widen_upward() {
        let mut program = Program::new();
        program.bind_builtins();
        assert_eq!(
            program.common_numeric_type(program.type_int, program.type_real),
            program.type_real
        );
        assert_eq!(
            program.common_numeric_type(program.type_long, program.type_int),
            program.type_long
        );
        // Character arithmetic promotes through Int.
        assert_eq!(
            program.common_numeric_type(program.type_character, program.type_character),
            program.type_int
        );
    }

    #[test]
    fn widening_conversion_costs() {
        let mut program = Program::new();
        program.bind_builtins();
        assert_eq!(
            program.implicit_conversion_cost(program.type_int, program.type_int),
            Some(0)
        );
        assert_eq!(
            program.implicit_conversion_cost(program.type_int, program.type_long),
            Some(1)
        );
        assert_eq!(
            program.implicit_conversion_cost(program.type_real, program.type_int),
            None
        );
    }

    #[test]
    fn instantiation_ceiling_trips() {
        let mut program = Program::new();
        program.instantiation_count = MAX_INSTANTIATIONS;
        let err = program.count_instantiation(SourcePos::default()).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::CompileErrorKind::Template(_)
        ));
    }
}
