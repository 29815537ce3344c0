//! Templates, augments, and the declaration records the parser produces.
//!
//! A [`Template`] is an uninstantiated blueprint: the raw token list of a
//! `class`/`aspect`/`compound`/`primitive` body plus its placeholder
//! names. Instantiation substitutes specializer tokens for placeholders and
//! re-parses the result; each specialization is materialized once, keyed by
//! its canonical name (`List<<Int>>`), and shared by every reference.
//!
//! An [`Augment`] carries pre-parsed member declarations that are injected
//! into the target type right before it organizes.

use crate::ast::Cmd;
use crate::error::SourcePos;
use crate::intern::{Interner, Symbol};
use crate::method::{MethodAttributes, PropertyAttributes};
use crate::token::{Token, TokenKind};
use rustc_hash::FxHashMap;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeKind {
    Class,
    Aspect,
    Compound,
    Primitive,
}

#[derive(Clone, Debug)]
pub struct ParameterDecl {
    pub name: Symbol,
    pub declared_type: Symbol,
    pub default: Option<Cmd>,
    pub pos: SourcePos,
}

#[derive(Clone, Debug)]
pub struct MethodDecl {
    pub name: Symbol,
    pub parameters: Vec<ParameterDecl>,
    pub return_type_name: Option<Symbol>,
    pub task_result_type_name: Option<Symbol>,
    pub attributes: MethodAttributes,
    pub native_code: Option<String>,
    pub statements: Vec<Cmd>,
    pub pos: SourcePos,
}

#[derive(Clone, Debug)]
pub struct PropertyDecl {
    pub name: Symbol,
    pub declared_type: Symbol,
    pub attributes: PropertyAttributes,
    pub initial_value: Option<Cmd>,
    pub pos: SourcePos,
}

/// Parsed body of a type (or the member payload of an augment).
#[derive(Clone, Debug, Default)]
pub struct TypeDecl {
    pub base_type_names: Vec<Symbol>,
    pub enumerations: Vec<(Symbol, Option<Cmd>)>,
    pub definitions: Vec<(Symbol, Cmd)>,
    pub properties: Vec<PropertyDecl>,
    pub globals: Vec<PropertyDecl>,
    pub methods: Vec<MethodDecl>,
    pub routines: Vec<MethodDecl>,
    pub is_requisite: bool,
}

#[derive(Clone, Debug)]
pub struct Template {
    pub name: Symbol,
    pub kind: TypeKind,
    pub placeholders: Vec<Symbol>,
    pub tokens: Vec<Token>,
    pub is_requisite: bool,
    pub pos: SourcePos,
}

impl Template {
    /// Replaces placeholder tokens with the matching specializer token
    /// lists. `arguments` pairs with `self.placeholders` by position.
    pub fn substitute(&self, arguments: &[Vec<Token>]) -> Vec<Token> {
        let map: FxHashMap<Symbol, &Vec<Token>> = self
            .placeholders
            .iter()
            .copied()
            .zip(arguments.iter())
            .collect();
        let mut output = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            match token.kind {
                TokenKind::Placeholder => {
                    if let Some(replacement) = map.get(&token.name_or_empty()) {
                        output.extend(replacement.iter().cloned());
                    } else {
                        output.push(token.clone());
                    }
                }
                _ => output.push(token.clone()),
            }
        }
        output
    }
}

#[derive(Clone, Debug)]
pub struct Augment {
    pub target_name: Symbol,
    pub base_type_names: Vec<Symbol>,
    pub decl: TypeDecl,
    pub pos: SourcePos,
}

// =============================================================================
// Canonical specialized names
// =============================================================================

/// Splits `List<<Int,String>>` into `("List", ["Int", "String"])`,
/// respecting nested specializers. Returns `None` for plain names.
pub fn specialized_parts(name: &str) -> Option<(String, Vec<String>)> {
    let open = name.find("<<")?;
    if !name.ends_with(">>") {
        return None;
    }
    let base = name[..open].to_string();
    let inner = &name[open + 2..name.len() - 2];
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let bytes = inner.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if inner[i..].starts_with("<<") {
            depth += 1;
            i += 2;
        } else if inner[i..].starts_with(">>") {
            depth = depth.saturating_sub(1);
            i += 2;
        } else {
            if bytes[i] == b',' && depth == 0 {
                args.push(inner[start..i].trim().to_string());
                start = i + 1;
            }
            i += 1;
        }
    }
    args.push(inner[start..].trim().to_string());
    Some((base, args))
}

/// Builds the canonical name for a specialization.
pub fn specialized_name(interner: &mut Interner, base: Symbol, args: &[Symbol]) -> Symbol {
    let mut text = interner.resolve(base).to_string();
    text.push_str("<<");
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            text.push(',');
        }
        text.push_str(interner.resolve(*arg));
    }
    text.push_str(">>");
    interner.intern(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourcePos;

    #[test]
    fn plain_names_are_not_specialized() {
        assert_eq!(specialized_parts("Object"), None);
    }

    #[test]
    fn splits_single_argument() {
        let (base, args) = specialized_parts("List<<Int>>").unwrap();
        assert_eq!(base, "List");
        assert_eq!(args, vec!["Int"]);
    }

    #[test]
    fn splits_multiple_arguments() {
        let (base, args) = specialized_parts("Table<<String,Int>>").unwrap();
        assert_eq!(base, "Table");
        assert_eq!(args, vec!["String", "Int"]);
    }

    #[test]
    fn respects_nested_specializers() {
        let (base, args) = specialized_parts("List<<Table<<String,Int>>>>").unwrap();
        assert_eq!(base, "List");
        assert_eq!(args, vec!["Table<<String,Int>>"]);
    }

    #[test]
    fn canonical_name_round_trips() {
        let mut interner = Interner::new();
        let base = interner.intern("List");
        let int_name = interner.intern("Int");
        let name = specialized_name(&mut interner, base, &[int_name]);
        assert_eq!(interner.resolve(name), "List<<Int>>");
    }

    #[test]
    fn substitute_replaces_placeholders() {
        let mut interner = Interner::new();
        let data_type = interner.intern("DataType");
        let template = Template {
            name: interner.intern("List"),
            kind: TypeKind::Class,
            placeholders: vec![data_type],
            tokens: vec![
                Token::name(TokenKind::Identifier, SourcePos::default(), interner.intern("x")),
                Token::name(TokenKind::Placeholder, SourcePos::default(), data_type),
            ],
            is_requisite: false,
            pos: SourcePos::default(),
        };
        let int_token = Token::name(
            TokenKind::TypeIdentifier,
            SourcePos::default(),
            interner.intern("Int"),
        );
        let output = template.substitute(&[vec![int_token]]);
        assert_eq!(output.len(), 2);
        assert_eq!(output[1].kind, TokenKind::TypeIdentifier);
        assert_eq!(interner.resolve(output[1].name_or_empty()), "Int");
    }
}
