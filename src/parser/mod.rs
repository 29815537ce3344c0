//! Recursive-descent parser.
//!
//! Two entry points, matching the two parsing moments of a compile:
//!
//! - [`parse_module`] scans a preprocessed token stream for top-level
//!   elements: type declarations become [`Template`]s (raw token bodies,
//!   re-parsed at instantiation), `augment` blocks are parsed into member
//!   declarations immediately, and `$requisite`/`$include` items are
//!   collected for the driver.
//! - [`parse_type_decl`] parses an instantiated template body (specializers
//!   already substituted) into a [`TypeDecl`].
//!
//! Statements terminate at end-of-line or `;`; block keywords (`endIf`,
//! `endClass`, `method`, section headers, ...) close an open statement
//! list without being consumed.

mod expr;

pub use expr::FORMAT_PART_MARKER;

use crate::ast::Cmd;
use crate::error::{CompileError, Result, SourcePos};
use crate::intern::{Interner, Symbol};
use crate::method::{MethodAttributes, PropertyAttributes};
use crate::program::RequisiteItem;
use crate::template::{
    Augment, MethodDecl, ParameterDecl, PropertyDecl, Template, TypeDecl, TypeKind,
};
use crate::token::{Payload, Token, TokenKind};

/// What an `$include`-family directive asks the driver to splice.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IncludeKind {
    Source,
    NativeCode,
    NativeHeader,
}

#[derive(Clone, Debug)]
pub struct IncludeItem {
    pub kind: IncludeKind,
    pub path: String,
    pub pos: SourcePos,
}

/// Top-level contents of one source file.
#[derive(Debug, Default)]
pub struct ParsedModule {
    pub templates: Vec<Template>,
    pub augments: Vec<Augment>,
    pub requisites: Vec<RequisiteItem>,
    pub includes: Vec<IncludeItem>,
    /// First class declared in the file; the main file's first class seeds
    /// `on_launch`.
    pub first_class: Option<Symbol>,
}

pub struct Parser<'i> {
    tokens: Vec<Token>,
    current: usize,
    interner: &'i mut Interner,
    /// Unconsumed `>` units left over from splitting `>>>`-style tokens
    /// while closing nested specializer lists.
    pending_gt: usize,
}

/// Parses the top level of a source file.
pub fn parse_module(tokens: Vec<Token>, interner: &mut Interner) -> Result<ParsedModule> {
    Parser::new(tokens, interner).module()
}

/// Parses an instantiated type body.
pub fn parse_type_decl(tokens: Vec<Token>, interner: &mut Interner) -> Result<TypeDecl> {
    let mut parser = Parser::new(tokens, interner);
    let decl = parser.type_decl()?;
    parser.expect_exhausted()?;
    Ok(decl)
}

impl<'i> Parser<'i> {
    pub(crate) fn new(tokens: Vec<Token>, interner: &'i mut Interner) -> Self {
        Parser { tokens, current: 0, interner, pending_gt: 0 }
    }

    // =========================================================================
    // Cursor helpers
    // =========================================================================

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_ahead(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.current + offset)
    }

    pub(crate) fn pos(&self) -> SourcePos {
        self.peek()
            .map(|t| t.pos)
            .or_else(|| self.tokens.last().map(|t| t.pos))
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.current).cloned();
        if token.is_some() {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance().unwrap())
        } else {
            let found = self
                .peek_kind()
                .map(|k| k.describe())
                .unwrap_or("end of input");
            Err(CompileError::syntax(
                format!("expected {}, found {}", kind.describe(), found),
                self.pos(),
            ))
        }
    }

    fn skip_eols(&mut self) {
        while self.check(TokenKind::EndOfLine) || self.check(TokenKind::Semicolon) {
            self.current += 1;
        }
    }

    fn expect_exhausted(&mut self) -> Result<()> {
        self.skip_eols();
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(CompileError::syntax(
                format!("unexpected {}", t.kind.describe()),
                t.pos,
            )),
        }
    }

    fn syntax<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(CompileError::syntax(message, self.pos()))
    }

    // =========================================================================
    // Top level
    // =========================================================================

    fn module(&mut self) -> Result<ParsedModule> {
        let mut module = ParsedModule::default();
        loop {
            self.skip_eols();
            let Some(kind) = self.peek_kind() else { break };
            match kind {
                TokenKind::Class
                | TokenKind::Aspect
                | TokenKind::Compound
                | TokenKind::Primitive => {
                    let template = self.template_declaration()?;
                    if kind == TokenKind::Class && module.first_class.is_none() {
                        module.first_class = Some(template.name);
                    }
                    module.templates.push(template);
                }
                TokenKind::Augment => {
                    module.augments.push(self.augment_declaration()?);
                }
                TokenKind::DirectiveRequisite => {
                    module.requisites.push(self.requisite_item()?);
                }
                TokenKind::DirectiveInclude
                | TokenKind::DirectiveIncludeNativeCode
                | TokenKind::DirectiveIncludeNativeHeader => {
                    let pos = self.pos();
                    let include_kind = match self.advance().unwrap().kind {
                        TokenKind::DirectiveInclude => IncludeKind::Source,
                        TokenKind::DirectiveIncludeNativeCode => IncludeKind::NativeCode,
                        _ => IncludeKind::NativeHeader,
                    };
                    let path_token = self.expect(TokenKind::LiteralString)?;
                    let path = match path_token.payload {
                        Payload::Str(s) => s,
                        _ => String::new(),
                    };
                    module.includes.push(IncludeItem { kind: include_kind, path, pos });
                }
                other => {
                    return self.syntax(format!(
                        "expected a declaration at top level, found {}",
                        other.describe()
                    ));
                }
            }
        }
        Ok(module)
    }

    /// `class Name[<<$A,$B>>] [attrs] [: bases] ... endClass`; the body
    /// (from the attributes/base clause on) is captured as raw tokens.
    fn template_declaration(&mut self) -> Result<Template> {
        let keyword = self.advance().unwrap();
        let (kind, end_kind) = match keyword.kind {
            TokenKind::Class => (TypeKind::Class, TokenKind::EndClass),
            TokenKind::Aspect => (TypeKind::Aspect, TokenKind::EndAspect),
            TokenKind::Compound => (TypeKind::Compound, TokenKind::EndCompound),
            _ => (TypeKind::Primitive, TokenKind::EndPrimitive),
        };
        let name_token = self.expect(TokenKind::TypeIdentifier)?;
        let name = name_token.name_or_empty();

        let mut placeholders = Vec::new();
        if self.matches(TokenKind::ShiftLeft) {
            loop {
                let placeholder = self.expect(TokenKind::Placeholder)?;
                placeholders.push(placeholder.name_or_empty());
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.expect_specializer_close()?;
        }

        let mut body = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(CompileError::syntax(
                        format!(
                            "'{}' is missing its {}",
                            self.interner.resolve(name),
                            end_kind.describe()
                        ),
                        keyword.pos,
                    ));
                }
                Some(t) if t.kind == end_kind => {
                    self.advance();
                    break;
                }
                Some(_) => body.push(self.advance().unwrap()),
            }
        }

        Ok(Template {
            name,
            kind,
            placeholders,
            tokens: body,
            is_requisite: false,
            pos: keyword.pos,
        })
    }

    /// `augment Name [: bases] ... endAugment`; members parse eagerly,
    /// augments carry no placeholders of their own.
    fn augment_declaration(&mut self) -> Result<Augment> {
        let keyword = self.advance().unwrap();
        let target_name = self.type_reference()?;

        let mut body = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(CompileError::syntax(
                        "'augment' is missing its 'endAugment'",
                        keyword.pos,
                    ));
                }
                Some(t) if t.kind == TokenKind::EndAugment => {
                    self.advance();
                    break;
                }
                Some(_) => body.push(self.advance().unwrap()),
            }
        }

        let decl = parse_type_decl(body, self.interner)?;
        let base_type_names = decl.base_type_names.clone();
        Ok(Augment { target_name, base_type_names, decl, pos: keyword.pos })
    }

    /// `$requisite Name[.name(T1,T2)]`
    fn requisite_item(&mut self) -> Result<RequisiteItem> {
        let keyword = self.advance().unwrap();
        let type_name = self.type_reference()?;
        let mut signature = None;
        if self.matches(TokenKind::Dot) {
            let member = self.expect(TokenKind::Identifier)?;
            let mut text = self.interner.resolve(member.name_or_empty()).to_string();
            text.push('(');
            if self.matches(TokenKind::OpenParen) {
                let mut first = true;
                while !self.check(TokenKind::CloseParen) {
                    if !first {
                        self.expect(TokenKind::Comma)?;
                        text.push(',');
                    }
                    let param_type = self.type_reference()?;
                    text.push_str(self.interner.resolve(param_type));
                    first = false;
                }
                self.expect(TokenKind::CloseParen)?;
            }
            text.push(')');
            signature = Some(self.interner.intern(&text));
        }
        Ok(RequisiteItem { type_name, signature, pos: keyword.pos })
    }

    // =========================================================================
    // Type bodies
    // =========================================================================

    pub(crate) fn type_decl(&mut self) -> Result<TypeDecl> {
        let mut decl = TypeDecl::default();

        self.skip_eols();
        if self.check(TokenKind::OpenBracket) {
            let attrs = self.attribute_list()?;
            decl.is_requisite = attrs.is_requisite;
        }
        self.skip_eols();
        if self.matches(TokenKind::Colon) {
            loop {
                decl.base_type_names.push(self.type_reference()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Section {
            None,
            Enumerate,
            Definitions,
            Properties,
            Globals,
            Methods,
            Routines,
        }
        let mut section = Section::None;

        loop {
            self.skip_eols();
            let Some(kind) = self.peek_kind() else { break };
            match kind {
                TokenKind::SectionEnumerate => {
                    self.advance();
                    section = Section::Enumerate;
                }
                TokenKind::SectionDefinitions => {
                    self.advance();
                    section = Section::Definitions;
                }
                TokenKind::SectionProperties => {
                    self.advance();
                    section = Section::Properties;
                }
                TokenKind::SectionGlobals => {
                    self.advance();
                    section = Section::Globals;
                }
                TokenKind::SectionMethods => {
                    self.advance();
                    section = Section::Methods;
                }
                TokenKind::SectionRoutines => {
                    self.advance();
                    section = Section::Routines;
                }
                TokenKind::Method => {
                    decl.methods.push(self.method_declaration()?);
                }
                TokenKind::Routine => {
                    decl.routines.push(self.method_declaration()?);
                }
                TokenKind::Identifier => match section {
                    Section::Enumerate => {
                        let name_token = self.advance().unwrap();
                        let value = if self.matches(TokenKind::Assign) {
                            Some(self.expression()?)
                        } else {
                            None
                        };
                        decl.enumerations.push((name_token.name_or_empty(), value));
                    }
                    Section::Definitions => {
                        let name_token = self.advance().unwrap();
                        self.expect(TokenKind::Assign)?;
                        let value = self.expression()?;
                        decl.definitions.push((name_token.name_or_empty(), value));
                    }
                    Section::Properties | Section::Globals => {
                        let property = self.property_declaration()?;
                        if section == Section::Properties {
                            decl.properties.push(property);
                        } else {
                            decl.globals.push(property);
                        }
                    }
                    _ => {
                        return self.syntax(
                            "member declarations outside a section must start with \
                             'method' or 'routine'",
                        );
                    }
                },
                other => {
                    return self.syntax(format!(
                        "unexpected {} in type body",
                        other.describe()
                    ));
                }
            }
        }
        Ok(decl)
    }

    /// `name : Type [= initial]`
    fn property_declaration(&mut self) -> Result<PropertyDecl> {
        let name_token = self.expect(TokenKind::Identifier)?;
        self.expect(TokenKind::Colon)?;
        let declared_type = self.type_reference()?;
        let mut attributes = PropertyAttributes::default();
        if self.check(TokenKind::OpenBracket) {
            let attrs = self.attribute_list()?;
            attributes.is_native = attrs.is_native;
            attributes.is_requisite = attrs.is_requisite;
        }
        let initial_value = if self.matches(TokenKind::Assign) {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(PropertyDecl {
            name: name_token.name_or_empty(),
            declared_type,
            attributes,
            initial_value,
            pos: name_token.pos,
        })
    }

    /// `method name[(params)] [: Type | -> Type] [yields Type] [attrs] [:]
    ///  statements`
    fn method_declaration(&mut self) -> Result<MethodDecl> {
        let keyword = self.advance().unwrap();
        let name = self.method_name()?;

        let mut parameters = Vec::new();
        if self.matches(TokenKind::OpenParen) {
            while !self.check(TokenKind::CloseParen) {
                if !parameters.is_empty() {
                    self.expect(TokenKind::Comma)?;
                }
                let param_name = self.expect(TokenKind::Identifier)?;
                self.expect(TokenKind::Colon)?;
                let declared_type = self.type_reference()?;
                let default = if self.matches(TokenKind::Assign) {
                    Some(self.expression()?)
                } else {
                    None
                };
                parameters.push(ParameterDecl {
                    name: param_name.name_or_empty(),
                    declared_type,
                    default,
                    pos: param_name.pos,
                });
            }
            self.expect(TokenKind::CloseParen)?;
        }

        let mut return_type_name = None;
        if self.matches(TokenKind::Arrow) {
            return_type_name = Some(self.type_reference()?);
        } else if self.check(TokenKind::Colon)
            && self.peek_ahead(1).map(|t| t.kind) == Some(TokenKind::TypeIdentifier)
        {
            self.advance();
            return_type_name = Some(self.type_reference()?);
        }

        let mut task_result_type_name = None;
        if self.matches(TokenKind::Yields) {
            task_result_type_name = Some(self.type_reference()?);
        }

        let mut attributes = MethodAttributes::default();
        if self.check(TokenKind::OpenBracket) {
            attributes = self.attribute_list()?;
        }

        // A stray colon may introduce the body.
        self.matches(TokenKind::Colon);

        let statements = self.statement_list()?;

        // A native member whose whole body is one splice carries it inline.
        let mut native_code = None;
        if attributes.is_native {
            if let [Cmd::NativeCode { code, .. }] = statements.as_slice() {
                native_code = Some(code.clone());
            }
        }

        Ok(MethodDecl {
            name,
            parameters,
            return_type_name,
            task_result_type_name,
            attributes,
            native_code,
            statements,
            pos: keyword.pos,
        })
    }

    /// Plain name, or `operator` followed by an operator symbol.
    fn method_name(&mut self) -> Result<Symbol> {
        if self.matches(TokenKind::Operator) {
            let op = self.advance().ok_or_else(|| {
                CompileError::syntax("expected an operator symbol after 'operator'", self.pos())
            })?;
            let text = match op.kind {
                TokenKind::Plus => "operator+",
                TokenKind::Minus => "operator-",
                TokenKind::Times => "operator*",
                TokenKind::Slash => "operator/",
                TokenKind::Percent => "operator%",
                TokenKind::Power => "operator^",
                TokenKind::CompareEq => "operator==",
                TokenKind::CompareLt => "operator<",
                other => {
                    return Err(CompileError::syntax(
                        format!("{} cannot be declared as an operator method", other.describe()),
                        op.pos,
                    ));
                }
            };
            return Ok(self.interner.intern(text));
        }
        let token = self.expect(TokenKind::Identifier)?;
        Ok(token.name_or_empty())
    }

    /// `[name, name, ...]` member attributes. `native` arrives as its
    /// keyword token; the rest are plain identifiers.
    fn attribute_list(&mut self) -> Result<MethodAttributes> {
        self.expect(TokenKind::OpenBracket)?;
        let mut attributes = MethodAttributes::default();
        loop {
            if self.matches(TokenKind::Native) {
                attributes.is_native = true;
            } else {
                let token = self.expect(TokenKind::Identifier)?;
                match self.interner.resolve(token.name_or_empty()) {
                    "inline" => attributes.is_inline = true,
                    "macro" => attributes.is_macro = true,
                    "dynamic" => attributes.is_dynamic = true,
                    "requisite" => attributes.is_requisite = true,
                    other => {
                        return Err(CompileError::syntax(
                            format!("unknown attribute '{}'", other),
                            token.pos,
                        ));
                    }
                }
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::CloseBracket)?;
        Ok(attributes)
    }

    // =========================================================================
    // Type references
    // =========================================================================

    /// Parses a type reference and returns its canonical name:
    /// `Name`, `Name<<Arg,...>>`, trailing `[]` for list sugar, trailing
    /// `?` for optionals.
    pub(crate) fn type_reference(&mut self) -> Result<Symbol> {
        let name_token = self.expect(TokenKind::TypeIdentifier)?;
        let mut text = self.interner.resolve(name_token.name_or_empty()).to_string();

        if self.matches(TokenKind::ShiftLeft) {
            text.push_str("<<");
            let mut first = true;
            loop {
                if !first {
                    text.push(',');
                }
                let argument = self.type_reference()?;
                text.push_str(self.interner.resolve(argument));
                first = false;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.expect_specializer_close()?;
            text.push_str(">>");
        }

        loop {
            if self.check(TokenKind::OpenBracket)
                && self.peek_ahead(1).map(|t| t.kind) == Some(TokenKind::CloseBracket)
            {
                self.advance();
                self.advance();
                text = format!("List<<{}>>", text);
            } else if self.matches(TokenKind::QuestionMark) {
                text.push('?');
            } else {
                break;
            }
        }

        Ok(self.interner.intern(&text))
    }

    /// Consumes one `>>`, splitting `>>>` or paired `>` tokens as needed
    /// when specializer lists nest.
    fn expect_specializer_close(&mut self) -> Result<()> {
        let mut have = self.pending_gt;
        while have < 2 {
            match self.peek_kind() {
                Some(TokenKind::CompareGt) => have += 1,
                Some(TokenKind::ShiftRight) => have += 2,
                Some(TokenKind::ShiftRightX) => have += 3,
                _ => {
                    return self.syntax("expected '>>' to close specializer list");
                }
            }
            self.advance();
        }
        self.pending_gt = have - 2;
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Parses statements until a terminator token (left unconsumed) or the
    /// end of the token list.
    pub(crate) fn statement_list(&mut self) -> Result<Vec<Cmd>> {
        let mut statements = Vec::new();
        loop {
            self.skip_eols();
            match self.peek_kind() {
                None => break,
                Some(kind) if kind.terminates_statements() => break,
                Some(_) => statements.push(self.statement()?),
            }
        }
        Ok(statements)
    }

    fn statement_list_until(&mut self, end: TokenKind) -> Result<Vec<Cmd>> {
        let statements = self.statement_list()?;
        self.expect(end)?;
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Cmd> {
        let pos = self.pos();
        match self.peek_kind().unwrap() {
            TokenKind::Local => {
                self.advance();
                let name_token = self.expect(TokenKind::Identifier)?;
                let declared_type = if self.matches(TokenKind::Colon) {
                    Some(self.type_reference()?)
                } else {
                    None
                };
                let initial = if self.matches(TokenKind::Assign) {
                    Some(Box::new(self.expression()?))
                } else {
                    None
                };
                Ok(Cmd::DeclareLocal {
                    pos,
                    name: name_token.name_or_empty(),
                    declared_type,
                    initial,
                })
            }
            TokenKind::If => self.if_statement(),
            TokenKind::Which => self.which_statement(),
            TokenKind::Switch => self.switch_statement(),
            TokenKind::Contingent => self.contingent_statement(),
            TokenKind::Try => self.try_statement(),
            TokenKind::Loop => {
                self.advance();
                let statements = self.statement_list_until(TokenKind::EndLoop)?;
                Ok(Cmd::GenericLoop { pos, condition: None, increment: None, statements, control_id: 0 })
            }
            TokenKind::While => {
                self.advance();
                let condition = Box::new(self.expression()?);
                let statements = self.statement_list_until(TokenKind::EndWhile)?;
                Ok(Cmd::GenericLoop { pos, condition: Some(condition), increment: None, statements, control_id: 0 })
            }
            TokenKind::ForEach => self.for_each_statement(),
            TokenKind::Return => {
                self.advance();
                let value = if self.statement_done() {
                    None
                } else {
                    Some(Box::new(self.expression()?))
                };
                Ok(Cmd::Return { pos, value })
            }
            TokenKind::Throw => {
                self.advance();
                Ok(Cmd::Throw { pos, value: Box::new(self.expression()?) })
            }
            TokenKind::Escape => {
                self.advance();
                Ok(Cmd::Escape { pos, control_id: 0 })
            }
            TokenKind::NextIteration => {
                self.advance();
                Ok(Cmd::NextIteration { pos, control_id: 0 })
            }
            TokenKind::Necessary => {
                self.advance();
                Ok(Cmd::Necessary { pos, condition: Box::new(self.expression()?), control_id: 0 })
            }
            TokenKind::Sufficient => {
                self.advance();
                Ok(Cmd::Sufficient { pos, condition: Box::new(self.expression()?), control_id: 0 })
            }
            TokenKind::Trace => {
                self.advance();
                let value = if self.statement_done() {
                    None
                } else {
                    Some(Box::new(self.expression()?))
                };
                let text = format!("line {}", pos.line);
                Ok(Cmd::Trace { pos, text, value })
            }
            TokenKind::Yield => {
                self.advance();
                let value = if self.statement_done() {
                    None
                } else {
                    Some(Box::new(self.expression()?))
                };
                Ok(Cmd::Yield { pos, value })
            }
            TokenKind::Await => {
                self.advance();
                Ok(Cmd::Await { pos, value: Box::new(self.expression()?) })
            }
            TokenKind::Native => {
                self.advance();
                let token = self.expect(TokenKind::LiteralString)?;
                let code = match token.payload {
                    Payload::Str(s) => s,
                    _ => String::new(),
                };
                Ok(Cmd::NativeCode { pos, code })
            }
            _ => self.expression_statement(),
        }
    }

    fn statement_done(&self) -> bool {
        match self.peek_kind() {
            None => true,
            Some(TokenKind::EndOfLine) | Some(TokenKind::Semicolon) => true,
            Some(kind) => kind.terminates_statements(),
        }
    }

    fn if_statement(&mut self) -> Result<Cmd> {
        let pos = self.pos();
        self.advance(); // 'if' or 'elseIf'
        let condition = Box::new(self.expression()?);
        let then_statements = self.statement_list()?;
        let else_statements = match self.peek_kind() {
            Some(TokenKind::ElseIf) => vec![self.if_statement()?],
            Some(TokenKind::Else) => {
                self.advance();
                self.statement_list_until(TokenKind::EndIf)?
            }
            Some(TokenKind::EndIf) => {
                self.advance();
                Vec::new()
            }
            _ => return self.syntax("expected 'elseIf', 'else', or 'endIf'"),
        };
        // A nested elseIf owns the endIf.
        Ok(Cmd::If { pos, condition, then_statements, else_statements })
    }

    fn which_statement(&mut self) -> Result<Cmd> {
        let pos = self.pos();
        self.advance();
        let subject = Box::new(self.expression()?);
        let mut cases = Vec::new();
        let mut others = Vec::new();
        loop {
            self.skip_eols();
            match self.peek_kind() {
                Some(TokenKind::Case) => {
                    let case_pos = self.pos();
                    self.advance();
                    let mut values = vec![self.expression()?];
                    while self.matches(TokenKind::Comma) {
                        values.push(self.expression()?);
                    }
                    let statements = self.statement_list()?;
                    cases.push(crate::ast::WhichCase { pos: case_pos, values, statements });
                }
                Some(TokenKind::Others) => {
                    self.advance();
                    others = self.statement_list()?;
                }
                Some(TokenKind::EndWhich) => {
                    self.advance();
                    break;
                }
                _ => return self.syntax("expected 'case', 'others', or 'endWhich'"),
            }
        }
        Ok(Cmd::Which { pos, subject, cases, others })
    }

    fn switch_statement(&mut self) -> Result<Cmd> {
        let pos = self.pos();
        self.advance();
        let subject = Box::new(self.expression()?);
        let mut cases = Vec::new();
        let mut others = Vec::new();
        loop {
            self.skip_eols();
            match self.peek_kind() {
                Some(TokenKind::Case) => {
                    let case_pos = self.pos();
                    self.advance();
                    let value = self.expression()?;
                    let statements = self.statement_list()?;
                    cases.push(crate::ast::SwitchCase { pos: case_pos, value, statements });
                }
                Some(TokenKind::Others) => {
                    self.advance();
                    others = self.statement_list()?;
                }
                Some(TokenKind::EndSwitch) => {
                    self.advance();
                    break;
                }
                _ => return self.syntax("expected 'case', 'others', or 'endSwitch'"),
            }
        }
        Ok(Cmd::Switch { pos, subject, cases, others })
    }

    fn contingent_statement(&mut self) -> Result<Cmd> {
        let pos = self.pos();
        self.advance();
        let statements = self.statement_list()?;
        let mut satisfied = Vec::new();
        let mut unsatisfied = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Satisfied) => {
                    self.advance();
                    satisfied = self.statement_list()?;
                }
                Some(TokenKind::Unsatisfied) => {
                    self.advance();
                    unsatisfied = self.statement_list()?;
                }
                Some(TokenKind::EndContingent) => {
                    self.advance();
                    break;
                }
                _ => {
                    return self.syntax(
                        "expected 'satisfied', 'unsatisfied', or 'endContingent'",
                    )
                }
            }
        }
        Ok(Cmd::Contingent { pos, statements, satisfied, unsatisfied, control_id: 0 })
    }

    fn try_statement(&mut self) -> Result<Cmd> {
        let pos = self.pos();
        self.advance();
        let statements = self.statement_list()?;
        let mut catches = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Catch) => {
                    let catch_pos = self.pos();
                    self.advance();
                    let name_token = self.expect(TokenKind::Identifier)?;
                    self.expect(TokenKind::Colon)?;
                    let catch_type = self.type_reference()?;
                    let body = self.statement_list()?;
                    catches.push(crate::ast::CatchClause {
                        pos: catch_pos,
                        name: name_token.name_or_empty(),
                        local_index: 0,
                        catch_type,
                        resolved_type: None,
                        statements: body,
                    });
                }
                Some(TokenKind::EndTry) => {
                    self.advance();
                    break;
                }
                _ => return self.syntax("expected 'catch' or 'endTry'"),
            }
        }
        Ok(Cmd::Try { pos, statements, catches })
    }

    fn for_each_statement(&mut self) -> Result<Cmd> {
        let pos = self.pos();
        self.advance();
        let parenthesized = self.matches(TokenKind::OpenParen);
        let counter = self.expect(TokenKind::Identifier)?;
        if !self.matches(TokenKind::In) && !self.matches(TokenKind::Of) {
            return self.syntax("expected 'in' or 'of' in forEach");
        }
        let collection = Box::new(self.expression()?);
        if parenthesized {
            self.expect(TokenKind::CloseParen)?;
        }
        let statements = self.statement_list_until(TokenKind::EndForEach)?;
        Ok(Cmd::ForEach {
            pos,
            counter_name: counter.name_or_empty(),
            collection,
            statements,
            control_id: 0,
        })
    }

    /// Expression statement, plus assignment forms and the paren-free
    /// single-argument command call (`println "hi"`).
    fn expression_statement(&mut self) -> Result<Cmd> {
        let pos = self.pos();
        let expr = self.expression()?;

        match self.peek_kind() {
            Some(TokenKind::Assign) => {
                self.advance();
                let value = Box::new(self.expression()?);
                return Ok(Cmd::Assign { pos, target: Box::new(expr), value });
            }
            Some(kind) if kind.op_with_assign_base().is_some() => {
                self.advance();
                let op = kind.op_with_assign_base().unwrap();
                let value = Box::new(self.expression()?);
                return Ok(Cmd::OpWithAssign { pos, target: Box::new(expr), op, value });
            }
            _ => {}
        }

        // `println "hi"`: a bare access followed by the start of another
        // expression on the same line takes it as its one argument.
        if let Cmd::Access { pos, context, name, args: None } = &expr {
            if !self.statement_done() && self.starts_expression() {
                let argument = self.expression()?;
                return Ok(Cmd::Access {
                    pos: *pos,
                    context: context.clone(),
                    name: *name,
                    args: Some(vec![argument]),
                });
            }
        }

        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::CharSource;
    use crate::tokenizer::tokenize;

    fn module(text: &str) -> (ParsedModule, Interner) {
        let mut interner = Interner::new();
        let file = interner.intern("test.argon");
        let tokens = tokenize(CharSource::from_buffer(file, text), &mut interner).unwrap();
        let module = parse_module(tokens, &mut interner).expect("parse failed");
        (module, interner)
    }

    fn type_body(text: &str) -> (TypeDecl, Interner) {
        let mut interner = Interner::new();
        let file = interner.intern("test.argon");
        let tokens = tokenize(CharSource::from_buffer(file, text), &mut interner).unwrap();
        let decl = parse_type_decl(tokens, &mut interner).expect("parse failed");
        (decl, interner)
    }

    #[test]
    fn collects_class_template() {
        let (module, interner) = module("class Hello\nMETHODS\nmethod init\nprintln \"hi\"\nendClass");
        assert_eq!(module.templates.len(), 1);
        let template = &module.templates[0];
        assert_eq!(interner.resolve(template.name), "Hello");
        assert_eq!(template.kind, TypeKind::Class);
        assert_eq!(module.first_class, Some(template.name));
    }

    #[test]
    fn one_line_class_parses() {
        let (module, _) = module("class Hello METHODS method init println \"hi\" endClass");
        assert_eq!(module.templates.len(), 1);
    }

    #[test]
    fn template_placeholders_are_recorded() {
        let (module, interner) = module("class Table<<$Key,$Value>>\nendClass");
        let template = &module.templates[0];
        assert_eq!(template.placeholders.len(), 2);
        assert_eq!(interner.resolve(template.placeholders[0]), "Key");
    }

    #[test]
    fn augment_members_parse_eagerly() {
        let (module, interner) =
            module("augment String\nMETHODS\nmethod shout -> String\nreturn this\nendAugment");
        assert_eq!(module.augments.len(), 1);
        let augment = &module.augments[0];
        assert_eq!(interner.resolve(augment.target_name), "String");
        assert_eq!(augment.decl.methods.len(), 1);
    }

    #[test]
    fn requisite_with_signature() {
        let (module, interner) = module("$requisite Widget.update(Int,Real)\n");
        let requisite = &module.requisites[0];
        assert_eq!(interner.resolve(requisite.type_name), "Widget");
        assert_eq!(
            interner.resolve(requisite.signature.unwrap()),
            "update(Int,Real)"
        );
    }

    #[test]
    fn include_items_pass_through() {
        let (module, _) = module("$include \"core.argon\"\n$includeNativeHeader \"extra.h\"\n");
        assert_eq!(module.includes.len(), 2);
        assert_eq!(module.includes[0].kind, IncludeKind::Source);
        assert_eq!(module.includes[1].kind, IncludeKind::NativeHeader);
        assert_eq!(module.includes[0].path, "core.argon");
    }

    #[test]
    fn sections_route_members() {
        let source = "PROPERTIES\nwidth : Int\nheight : Int = 4\nGLOBALS\ntotal : Long\n\
                      METHODS\nmethod area -> Int\nreturn width\n";
        let (decl, interner) = type_body(source);
        assert_eq!(decl.properties.len(), 2);
        assert_eq!(decl.globals.len(), 1);
        assert_eq!(decl.methods.len(), 1);
        assert!(decl.properties[1].initial_value.is_some());
        assert_eq!(interner.resolve(decl.properties[0].declared_type), "Int");
    }

    #[test]
    fn enumerate_section_auto_numbers_later() {
        let (decl, _) = type_body("ENUMERATE\nred\ngreen\nblue = 10\n");
        assert_eq!(decl.enumerations.len(), 3);
        assert!(decl.enumerations[0].1.is_none());
        assert!(decl.enumerations[2].1.is_some());
    }

    #[test]
    fn method_signature_forms() {
        let (decl, interner) =
            type_body("METHODS\nmethod shout -> String\nreturn this\nmethod counter( n:Int ) yields Int\nyield n\n");
        assert_eq!(decl.methods.len(), 2);
        assert_eq!(
            decl.methods[0].return_type_name.map(|s| interner.resolve(s).to_string()),
            Some("String".to_string())
        );
        let counter = &decl.methods[1];
        assert_eq!(counter.parameters.len(), 1);
        assert_eq!(
            counter.task_result_type_name.map(|s| interner.resolve(s).to_string()),
            Some("Int".to_string())
        );
    }

    #[test]
    fn colon_return_type_form() {
        let (decl, interner) = type_body("METHODS\nmethod shout: String\nreturn this\n");
        assert_eq!(
            decl.methods[0].return_type_name.map(|s| interner.resolve(s).to_string()),
            Some("String".to_string())
        );
    }

    #[test]
    fn native_method_with_inline_body() {
        let (decl, _) =
            type_body("METHODS\nmethod count -> Int [native]\nnative \"$this->count\"\n");
        let method = &decl.methods[0];
        assert!(method.attributes.is_native);
        assert_eq!(method.native_code.as_deref(), Some("$this->count"));
    }

    #[test]
    fn operator_method_names() {
        let (decl, interner) =
            type_body("METHODS\nmethod operator+( other:String ) -> String\nreturn this\n");
        assert_eq!(interner.resolve(decl.methods[0].name), "operator+");
    }

    #[test]
    fn base_clause_and_attributes() {
        let (decl, interner) = type_body("[requisite] : Shape, Drawable\n");
        assert!(decl.is_requisite);
        let names: Vec<_> = decl
            .base_type_names
            .iter()
            .map(|s| interner.resolve(*s).to_string())
            .collect();
        assert_eq!(names, vec!["Shape", "Drawable"]);
    }

    #[test]
    fn nested_specializer_types() {
        let (decl, interner) = type_body("PROPERTIES\ncells : List<<List<<Int>>>>\n");
        assert_eq!(
            interner.resolve(decl.properties[0].declared_type),
            "List<<List<<Int>>>>"
        );
    }

    #[test]
    fn list_sugar_and_optionals() {
        let (decl, interner) = type_body("PROPERTIES\nnames : String[]\nmaybe : Int?\n");
        assert_eq!(interner.resolve(decl.properties[0].declared_type), "List<<String>>");
        assert_eq!(interner.resolve(decl.properties[1].declared_type), "Int?");
    }

    #[test]
    fn statements_nest() {
        let source = "METHODS\nmethod demo( n:Int )\nlocal total = 0\nforEach i in 1..n\n\
                      if i % 2 == 0\ntotal += i\nendIf\nendForEach\nreturn total\n";
        let (decl, _) = type_body(source);
        let body = &decl.methods[0].statements;
        assert_eq!(body.len(), 3);
        assert!(matches!(body[0], Cmd::DeclareLocal { .. }));
        assert!(matches!(body[1], Cmd::ForEach { .. }));
        assert!(matches!(body[2], Cmd::Return { .. }));
    }

    #[test]
    fn which_and_switch_statements() {
        let source = "METHODS\nmethod demo( n:Int )\nwhich n\ncase 1, 2\nreturn 1\nothers\nreturn 0\nendWhich\n\
                      switch n\ncase 3\nreturn 3\nendSwitch\n";
        let (decl, _) = type_body(source);
        let body = &decl.methods[0].statements;
        match &body[0] {
            Cmd::Which { cases, others, .. } => {
                assert_eq!(cases.len(), 1);
                assert_eq!(cases[0].values.len(), 2);
                assert_eq!(others.len(), 1);
            }
            other => panic!("expected which, got {:?}", other),
        }
        assert!(matches!(body[1], Cmd::Switch { .. }));
    }

    #[test]
    fn contingent_and_try_statements() {
        let source = "METHODS\nmethod demo( n:Int )\ncontingent\nnecessary n > 0\nsatisfied\nreturn 1\n\
                      unsatisfied\nreturn 0\nendContingent\ntry\nthrow n\ncatch err : Object\nreturn 2\nendTry\n";
        let (decl, _) = type_body(source);
        let body = &decl.methods[0].statements;
        assert!(matches!(body[0], Cmd::Contingent { .. }));
        match &body[1] {
            Cmd::Try { catches, .. } => assert_eq!(catches.len(), 1),
            other => panic!("expected try, got {:?}", other),
        }
    }

    #[test]
    fn command_call_without_parens() {
        let (decl, _) = type_body("METHODS\nmethod init\nprintln \"hi\"\n");
        match &decl.methods[0].statements[0] {
            Cmd::Access { args: Some(args), .. } => {
                assert_eq!(args.len(), 1);
                assert!(matches!(args[0], Cmd::LiteralString { .. }));
            }
            other => panic!("expected command call, got {:?}", other),
        }
    }

    #[test]
    fn assignment_forms() {
        let (decl, _) = type_body("METHODS\nmethod demo\nx = 1\nx += 2\nx++\n");
        let body = &decl.methods[0].statements;
        assert!(matches!(body[0], Cmd::Assign { .. }));
        assert!(matches!(
            body[1],
            Cmd::OpWithAssign { op: TokenKind::Plus, .. }
        ));
        assert!(matches!(body[2], Cmd::Adjust { delta: 1, .. }));
    }
}
