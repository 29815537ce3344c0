//! Token-stream preprocessor.
//!
//! Runs between the tokenizer and the parser. Three jobs:
//!
//! 1. `$define NAME tokens` / `$undefine NAME` maintain a compile-wide
//!    table of named token lists; any later identifier matching a defined
//!    name is replaced by its stored tokens (recursively, up to
//!    [`MAX_EXPANSION_DEPTH`]).
//! 2. `$if expr ... $elseIf expr ... $else ... $endIf` keeps the tokens of
//!    the first branch whose condition holds and drops the rest. A name in
//!    a condition is true iff it is currently defined.
//! 3. Structural directives (`$include`, `$includeNativeCode`,
//!    `$includeNativeHeader`, `$requisite`) pass through untouched for the
//!    driver and parser to act on.

use crate::error::{CompileError, Result, SourcePos};
use crate::intern::{Interner, Symbol};
use crate::token::{Token, TokenKind};
use rustc_hash::FxHashMap;

/// Expansion recursion limit; beyond this a definition is assumed cyclic.
pub const MAX_EXPANSION_DEPTH: usize = 256;

/// Named token-list definitions, shared across every file of one compile.
pub type Definitions = FxHashMap<Symbol, Vec<Token>>;

pub struct Preprocessor<'d, 'i> {
    definitions: &'d mut Definitions,
    interner: &'i Interner,
}

// State of one `$if`/`$elseIf`/`$else` group.
struct Conditional {
    parent_live: bool,
    branch_live: bool,
    branch_taken: bool,
    pos: SourcePos,
}

impl<'d, 'i> Preprocessor<'d, 'i> {
    pub fn new(definitions: &'d mut Definitions, interner: &'i Interner) -> Self {
        Preprocessor { definitions, interner }
    }

    /// Filters `tokens` into the stream the parser will see.
    pub fn process(&mut self, tokens: Vec<Token>) -> Result<Vec<Token>> {
        let mut output = Vec::with_capacity(tokens.len());
        let mut conditionals: Vec<Conditional> = Vec::new();
        let mut cursor = tokens.into_iter().peekable();

        while let Some(token) = cursor.next() {
            let live = conditionals.iter().all(|c| c.parent_live && c.branch_live);
            match token.kind {
                TokenKind::DirectiveDefine => {
                    let (name, body) = self.read_definition(&mut cursor, token.pos)?;
                    if live {
                        self.definitions.insert(name, body);
                    }
                }
                TokenKind::DirectiveUndefine => {
                    let name = self.read_name(&mut cursor, token.pos)?;
                    self.skip_to_eol(&mut cursor);
                    if live {
                        self.definitions.remove(&name);
                    }
                }
                TokenKind::DirectiveIf => {
                    let condition = self.read_condition(&mut cursor, token.pos)?;
                    conditionals.push(Conditional {
                        parent_live: live,
                        branch_live: condition,
                        branch_taken: condition,
                        pos: token.pos,
                    });
                }
                TokenKind::DirectiveElseIf => {
                    let condition = self.read_condition(&mut cursor, token.pos)?;
                    let group = conditionals.last_mut().ok_or_else(|| {
                        CompileError::syntax("'$elseIf' without matching '$if'", token.pos)
                    })?;
                    group.branch_live = !group.branch_taken && condition;
                    group.branch_taken |= condition;
                }
                TokenKind::DirectiveElse => {
                    self.skip_to_eol(&mut cursor);
                    let group = conditionals.last_mut().ok_or_else(|| {
                        CompileError::syntax("'$else' without matching '$if'", token.pos)
                    })?;
                    group.branch_live = !group.branch_taken;
                    group.branch_taken = true;
                }
                TokenKind::DirectiveEndIf => {
                    self.skip_to_eol(&mut cursor);
                    if conditionals.pop().is_none() {
                        return Err(CompileError::syntax(
                            "'$endIf' without matching '$if'",
                            token.pos,
                        ));
                    }
                }
                TokenKind::Identifier | TokenKind::TypeIdentifier if live => {
                    let name = token.name_or_empty();
                    if self.definitions.contains_key(&name) {
                        self.expand(name, token.pos, &mut output, 0)?;
                    } else {
                        output.push(token);
                    }
                }
                _ if live => output.push(token),
                _ => {}
            }
        }

        if let Some(open) = conditionals.last() {
            return Err(CompileError::syntax("'$if' without matching '$endIf'", open.pos));
        }
        Ok(output)
    }

    fn expand(
        &self,
        name: Symbol,
        pos: SourcePos,
        output: &mut Vec<Token>,
        depth: usize,
    ) -> Result<()> {
        if depth >= MAX_EXPANSION_DEPTH {
            return Err(CompileError::syntax(
                format!(
                    "definition '{}' expands beyond depth {}",
                    self.interner.resolve(name),
                    MAX_EXPANSION_DEPTH
                ),
                pos,
            ));
        }
        let body = self.definitions.get(&name).cloned().unwrap_or_default();
        for token in body {
            match token.kind {
                TokenKind::Identifier | TokenKind::TypeIdentifier
                    if self.definitions.contains_key(&token.name_or_empty()) =>
                {
                    self.expand(token.name_or_empty(), pos, output, depth + 1)?;
                }
                _ => output.push(token),
            }
        }
        Ok(())
    }

    fn read_name(
        &self,
        cursor: &mut std::iter::Peekable<std::vec::IntoIter<Token>>,
        pos: SourcePos,
    ) -> Result<Symbol> {
        match cursor.next() {
            Some(t) if matches!(t.kind, TokenKind::Identifier | TokenKind::TypeIdentifier) => {
                Ok(t.name_or_empty())
            }
            _ => Err(CompileError::syntax("expected a name after directive", pos)),
        }
    }

    fn read_definition(
        &self,
        cursor: &mut std::iter::Peekable<std::vec::IntoIter<Token>>,
        pos: SourcePos,
    ) -> Result<(Symbol, Vec<Token>)> {
        let name = self.read_name(cursor, pos)?;
        let mut body = Vec::new();
        while let Some(t) = cursor.peek() {
            if t.kind == TokenKind::EndOfLine {
                cursor.next();
                break;
            }
            body.push(cursor.next().unwrap());
        }
        Ok((name, body))
    }

    fn skip_to_eol(&self, cursor: &mut std::iter::Peekable<std::vec::IntoIter<Token>>) {
        while let Some(t) = cursor.peek() {
            if t.kind == TokenKind::EndOfLine {
                cursor.next();
                return;
            }
            cursor.next();
        }
    }

    // =========================================================================
    // Condition grammar: or-expr := and-expr (('||' | 'or') and-expr)*
    //                    and-expr := term (('&&' | 'and') term)*
    //                    term := '!' term | 'not' term | '(' or-expr ')'
    //                          | 'true' | 'false' | name
    // =========================================================================

    fn read_condition(
        &self,
        cursor: &mut std::iter::Peekable<std::vec::IntoIter<Token>>,
        pos: SourcePos,
    ) -> Result<bool> {
        let mut line = Vec::new();
        while let Some(t) = cursor.peek() {
            if t.kind == TokenKind::EndOfLine {
                cursor.next();
                break;
            }
            line.push(cursor.next().unwrap());
        }
        if line.is_empty() {
            return Err(CompileError::syntax("missing condition after directive", pos));
        }
        let mut index = 0usize;
        let value = self.parse_or(&line, &mut index, pos)?;
        if index != line.len() {
            return Err(CompileError::syntax("trailing tokens in directive condition", line[index].pos));
        }
        Ok(value)
    }

    fn parse_or(&self, line: &[Token], index: &mut usize, pos: SourcePos) -> Result<bool> {
        let mut value = self.parse_and(line, index, pos)?;
        loop {
            match line.get(*index).map(|t| t.kind) {
                Some(TokenKind::Or) => {
                    *index += 1;
                }
                Some(TokenKind::VerticalBar)
                    if line.get(*index + 1).map(|t| t.kind) == Some(TokenKind::VerticalBar) =>
                {
                    *index += 2;
                }
                _ => return Ok(value),
            }
            let rhs = self.parse_and(line, index, pos)?;
            value = value || rhs;
        }
    }

    fn parse_and(&self, line: &[Token], index: &mut usize, pos: SourcePos) -> Result<bool> {
        let mut value = self.parse_term(line, index, pos)?;
        loop {
            match line.get(*index).map(|t| t.kind) {
                Some(TokenKind::And) => {
                    *index += 1;
                }
                Some(TokenKind::Ampersand)
                    if line.get(*index + 1).map(|t| t.kind) == Some(TokenKind::Ampersand) =>
                {
                    *index += 2;
                }
                _ => return Ok(value),
            }
            let rhs = self.parse_term(line, index, pos)?;
            value = value && rhs;
        }
    }

    fn parse_term(&self, line: &[Token], index: &mut usize, pos: SourcePos) -> Result<bool> {
        let token = line
            .get(*index)
            .ok_or_else(|| CompileError::syntax("unexpected end of directive condition", pos))?;
        *index += 1;
        match token.kind {
            TokenKind::Bang | TokenKind::Not => Ok(!self.parse_term(line, index, pos)?),
            TokenKind::OpenParen => {
                let value = self.parse_or(line, index, pos)?;
                match line.get(*index) {
                    Some(t) if t.kind == TokenKind::CloseParen => {
                        *index += 1;
                        Ok(value)
                    }
                    _ => Err(CompileError::syntax("missing ')' in directive condition", token.pos)),
                }
            }
            TokenKind::True => Ok(true),
            TokenKind::False => Ok(false),
            TokenKind::Identifier | TokenKind::TypeIdentifier => {
                Ok(self.definitions.contains_key(&token.name_or_empty()))
            }
            other => Err(CompileError::syntax(
                format!("unexpected {} in directive condition", other.describe()),
                token.pos,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::CharSource;
    use crate::token::Payload;
    use crate::tokenizer::tokenize;

    fn preprocess(text: &str) -> (Vec<Token>, Interner) {
        let mut interner = Interner::new();
        let file = interner.intern("test.argon");
        let tokens = tokenize(CharSource::from_buffer(file, text), &mut interner).unwrap();
        let mut definitions = Definitions::default();
        let output = Preprocessor::new(&mut definitions, &interner)
            .process(tokens)
            .unwrap();
        (output, interner)
    }

    fn preprocess_err(text: &str) -> CompileError {
        let mut interner = Interner::new();
        let file = interner.intern("test.argon");
        let tokens = tokenize(CharSource::from_buffer(file, text), &mut interner).unwrap();
        let mut definitions = Definitions::default();
        Preprocessor::new(&mut definitions, &interner)
            .process(tokens)
            .unwrap_err()
    }

    #[test]
    fn define_substitutes_token_list() {
        let (tokens, _) = preprocess("$define LIMIT 64\nx = LIMIT");
        let literal = tokens
            .iter()
            .find(|t| t.kind == TokenKind::LiteralInteger)
            .expect("expansion missing");
        assert_eq!(literal.payload, Payload::Integer(64));
    }

    #[test]
    fn undefine_removes_definition() {
        let (tokens, interner) = preprocess("$define NAME 1\n$undefine NAME\nNAME");
        let last = tokens.last().unwrap();
        assert_eq!(last.kind, TokenKind::TypeIdentifier);
        assert_eq!(interner.resolve(last.name_or_empty()), "NAME");
    }

    #[test]
    fn expansion_is_recursive() {
        let (tokens, _) = preprocess("$define A B\n$define B 9\nA");
        assert_eq!(tokens[0].payload, Payload::Integer(9));
    }

    #[test]
    fn cyclic_expansion_hits_depth_limit() {
        let err = preprocess_err("$define A B\n$define B A\nA");
        assert!(err.message().contains("depth"));
    }

    #[test]
    fn if_keeps_true_branch() {
        let (tokens, _) = preprocess("$define TARGET_C true\n$if TARGET_C\n1\n$else\n2\n$endIf");
        let values: Vec<_> = tokens
            .iter()
            .filter_map(|t| match t.payload {
                Payload::Integer(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![1]);
    }

    #[test]
    fn else_branch_when_undefined() {
        let (tokens, _) = preprocess("$if MISSING\n1\n$else\n2\n$endIf");
        let values: Vec<_> = tokens
            .iter()
            .filter_map(|t| match t.payload {
                Payload::Integer(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![2]);
    }

    #[test]
    fn else_if_chains() {
        let source = "$define B 0\n$if A\n1\n$elseIf B\n2\n$elseIf C\n3\n$endIf";
        let (tokens, _) = preprocess(source);
        let values: Vec<_> = tokens
            .iter()
            .filter_map(|t| match t.payload {
                Payload::Integer(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![2]);
    }

    #[test]
    fn condition_operators() {
        let (tokens, _) = preprocess("$define A 0\n$if A and not B\nyes\n$endIf");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Identifier));
        let (tokens, _) = preprocess("$define A 0\n$if A && B\nyes\n$endIf");
        assert!(!tokens.iter().any(|t| t.kind == TokenKind::Identifier));
        let (tokens, _) = preprocess("$if (X || true) and true\nyes\n$endIf");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Identifier));
    }

    #[test]
    fn nested_conditionals() {
        let source = "$define OUTER 1\n$if OUTER\n$if INNER\n1\n$else\n2\n$endIf\n$endIf";
        let (tokens, _) = preprocess(source);
        let values: Vec<_> = tokens
            .iter()
            .filter_map(|t| match t.payload {
                Payload::Integer(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![2]);
    }

    #[test]
    fn unmatched_endif_is_error() {
        let err = preprocess_err("$endIf");
        assert!(err.message().contains("$endIf"));
    }

    #[test]
    fn unterminated_if_is_error() {
        let err = preprocess_err("$if X\n1\n");
        assert!(err.message().contains("$endIf"));
    }

    #[test]
    fn include_sentinels_pass_through() {
        let (tokens, _) = preprocess("$include \"core.argon\"\n");
        assert_eq!(tokens[0].kind, TokenKind::DirectiveInclude);
        assert_eq!(tokens[1].kind, TokenKind::LiteralString);
    }

    #[test]
    fn defines_inside_dead_branch_are_ignored() {
        let (tokens, _) = preprocess("$if MISSING\n$define X 1\n$endIf\nX");
        let last = tokens.last().unwrap();
        assert_eq!(last.kind, TokenKind::TypeIdentifier);
    }
}
