//! Tokenizer: characters in, [`Token`]s out.
//!
//! Works directly on the 16-bit units of a [`CharSource`]. Shape of the
//! output stream:
//!
//! - Spaces and tabs are discarded. A newline becomes a single
//!   [`TokenKind::EndOfLine`] token, but only outside `(` `[` `{` pairs and
//!   never twice in a row.
//! - `#` comments run to end of line; `#{ ... #}` blocks nest.
//! - Identifiers may end with `?` (predicate names like `empty?`); a
//!   leading uppercase letter makes a type name, where the trailing `?`
//!   stays a separate token so `Int?` spells an optional type.
//! - Integer literals that overflow 32 bits quietly become long literals;
//!   overflowing 64 bits is a hard error.
//! - Symbols use longest-match (`>>>=` before `>>=` before `>>` before `>`).
//! - `$word` produces a directive token when `word` is in the directive
//!   table, otherwise a template placeholder token.

use crate::error::{CompileError, Result, SourcePos};
use crate::intern::Interner;
use crate::source::CharSource;
use crate::token::{Token, TokenKind};

pub struct Tokenizer<'i> {
    source: CharSource,
    interner: &'i mut Interner,
    tokens: Vec<Token>,
    bracket_depth: usize,
}

fn is_letter(unit: u16) -> bool {
    let c = unit as u32;
    (c >= 'a' as u32 && c <= 'z' as u32) || (c >= 'A' as u32 && c <= 'Z' as u32)
}

fn is_digit(unit: u16) -> bool {
    let c = unit as u32;
    c >= '0' as u32 && c <= '9' as u32
}

fn is_identifier_start(unit: u16) -> bool {
    is_letter(unit) || unit == b'_' as u16
}

fn is_identifier_part(unit: u16) -> bool {
    is_letter(unit) || is_digit(unit) || unit == b'_' as u16
}

fn is_uppercase(unit: u16) -> bool {
    let c = unit as u32;
    c >= 'A' as u32 && c <= 'Z' as u32
}

fn hex_value(unit: u16) -> Option<u64> {
    let c = unit as u32;
    if c >= '0' as u32 && c <= '9' as u32 {
        Some((c - '0' as u32) as u64)
    } else if c >= 'a' as u32 && c <= 'f' as u32 {
        Some((c - 'a' as u32 + 10) as u64)
    } else if c >= 'A' as u32 && c <= 'F' as u32 {
        Some((c - 'A' as u32 + 10) as u64)
    } else {
        None
    }
}

impl<'i> Tokenizer<'i> {
    pub fn new(source: CharSource, interner: &'i mut Interner) -> Self {
        Tokenizer { source, interner, tokens: Vec::new(), bracket_depth: 0 }
    }

    /// Tokenizes the whole source, or fails at the first malformed input.
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        while self.source.has_more() {
            self.scan_token()?;
        }
        Ok(self.tokens)
    }

    fn push(&mut self, token: Token) {
        if token.kind.opens_bracket() {
            self.bracket_depth += 1;
        } else if token.kind.closes_bracket() {
            self.bracket_depth = self.bracket_depth.saturating_sub(1);
        }
        self.tokens.push(token);
    }

    fn syntax(&self, message: impl Into<String>, pos: SourcePos) -> CompileError {
        CompileError::syntax(message, pos)
    }

    fn scan_token(&mut self) -> Result<()> {
        let pos = self.source.pos();
        let unit = match self.source.peek() {
            Some(u) => u,
            None => return Ok(()),
        };

        match unit {
            u if u == b' ' as u16 || u == b'\t' as u16 || u == b'\r' as u16 => {
                self.source.next();
                Ok(())
            }
            u if u == b'\n' as u16 => {
                self.source.next();
                let suppressed = self.bracket_depth > 0
                    || matches!(self.tokens.last(), None | Some(Token { kind: TokenKind::EndOfLine, .. }));
                if !suppressed {
                    self.push(Token::new(TokenKind::EndOfLine, pos));
                }
                Ok(())
            }
            u if u == b'#' as u16 => self.scan_comment(pos),
            u if is_identifier_start(u) => self.scan_word(pos),
            u if is_digit(u) => self.scan_number(pos),
            u if u == b'\'' as u16 => self.scan_character(pos),
            u if u == b'"' as u16 => self.scan_string(pos),
            u if u == b'$' as u16 => self.scan_directive(pos),
            _ => self.scan_symbol(pos),
        }
    }

    // =========================================================================
    // Comments
    // =========================================================================

    fn scan_comment(&mut self, pos: SourcePos) -> Result<()> {
        self.source.next(); // '#'
        if self.source.consume(b'{' as u16) {
            let mut depth = 1usize;
            loop {
                match self.source.peek() {
                    None => {
                        return Err(self.syntax("unterminated block comment", pos));
                    }
                    Some(u) if u == b'#' as u16 => {
                        self.source.next();
                        if self.source.consume(b'{' as u16) {
                            depth += 1;
                        } else if self.source.consume(b'}' as u16) {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                    }
                    _ => {
                        self.source.next();
                    }
                }
            }
        } else {
            while let Some(u) = self.source.peek() {
                if u == b'\n' as u16 {
                    break;
                }
                self.source.next();
            }
        }
        Ok(())
    }

    // =========================================================================
    // Identifiers and keywords
    // =========================================================================

    fn scan_word(&mut self, pos: SourcePos) -> Result<()> {
        let first = self.source.peek().unwrap_or(0);
        let mut text = String::new();
        while let Some(u) = self.source.peek() {
            if is_identifier_part(u) {
                text.push(char::from_u32(u as u32).unwrap_or('\u{FFFD}'));
                self.source.next();
            } else {
                break;
            }
        }

        if let Some(kind) = TokenKind::from_keyword(&text) {
            self.push(Token::new(kind, pos));
            return Ok(());
        }

        let type_name = is_uppercase(first);
        // Predicate-style trailing '?' belongs to ordinary identifiers only;
        // after a type name it spells an optional type instead.
        if !type_name && self.source.peek() == Some(b'?' as u16) {
            text.push('?');
            self.source.next();
        }

        let sym = self.interner.intern(&text);
        let kind = if type_name { TokenKind::TypeIdentifier } else { TokenKind::Identifier };
        self.push(Token::name(kind, pos, sym));
        Ok(())
    }

    // =========================================================================
    // Numbers
    // =========================================================================

    fn scan_number(&mut self, pos: SourcePos) -> Result<()> {
        if self.source.peek() == Some(b'0' as u16) {
            let radix = match self.source.peek_ahead(1) {
                Some(u) if u == b'x' as u16 => Some(16u64),
                Some(u) if u == b'b' as u16 => Some(2),
                Some(u) if u == b'c' as u16 => Some(8),
                _ => None,
            };
            if let Some(radix) = radix {
                self.source.next();
                self.source.next();
                return self.scan_radix_number(pos, radix);
            }
        }

        let mut value: u64 = 0;
        let mut overflow = false;
        while let Some(u) = self.source.peek() {
            if !is_digit(u) {
                break;
            }
            let digit = (u - b'0' as u16) as u64;
            value = match value.checked_mul(10).and_then(|v| v.checked_add(digit)) {
                Some(v) => v,
                None => {
                    overflow = true;
                    0
                }
            };
            self.source.next();
        }

        // A decimal point only turns the literal real when a digit follows,
        // so range syntax like `1..n` is left alone.
        let is_real = (self.source.peek() == Some(b'.' as u16)
            && self.source.peek_ahead(1).map(is_digit).unwrap_or(false))
            || matches!(self.source.peek(), Some(u) if u == b'e' as u16 || u == b'E' as u16);

        if is_real {
            let mut text = value.to_string();
            if self.source.consume(b'.' as u16) {
                text.push('.');
                while let Some(u) = self.source.peek() {
                    if !is_digit(u) {
                        break;
                    }
                    text.push((u as u8) as char);
                    self.source.next();
                }
            }
            if let Some(u) = self.source.peek() {
                if u == b'e' as u16 || u == b'E' as u16 {
                    text.push('e');
                    self.source.next();
                    if let Some(sign) = self.source.peek() {
                        if sign == b'+' as u16 || sign == b'-' as u16 {
                            text.push((sign as u8) as char);
                            self.source.next();
                        }
                    }
                    let mut saw_digit = false;
                    while let Some(u) = self.source.peek() {
                        if !is_digit(u) {
                            break;
                        }
                        saw_digit = true;
                        text.push((u as u8) as char);
                        self.source.next();
                    }
                    if !saw_digit {
                        return Err(self.syntax("missing exponent digits", pos));
                    }
                }
            }
            let parsed: f64 = text
                .parse()
                .map_err(|_| self.syntax(format!("malformed real literal '{}'", text), pos))?;
            self.push(Token::real(pos, parsed));
            return Ok(());
        }

        let forced_long = self.source.consume(b'L' as u16);
        if overflow || value > i64::MAX as u64 {
            return Err(self.syntax("integer literal exceeds 64-bit range", pos));
        }
        if forced_long || value > i32::MAX as u64 {
            self.push(Token::long(pos, value as i64));
        } else {
            self.push(Token::integer(pos, value as i32));
        }
        Ok(())
    }

    fn scan_radix_number(&mut self, pos: SourcePos, radix: u64) -> Result<()> {
        let mut value: u64 = 0;
        let mut digits = 0usize;
        while let Some(u) = self.source.peek() {
            let digit = match hex_value(u) {
                Some(d) if d < radix => d,
                _ => break,
            };
            value = match value.checked_mul(radix).and_then(|v| v.checked_add(digit)) {
                Some(v) => v,
                None => return Err(self.syntax("integer literal exceeds 64-bit range", pos)),
            };
            digits += 1;
            self.source.next();
        }
        if digits == 0 {
            return Err(self.syntax("missing digits after radix prefix", pos));
        }
        let forced_long = self.source.consume(b'L' as u16);
        if forced_long || value > u32::MAX as u64 {
            self.push(Token::long(pos, value as i64));
        } else {
            // Radix literals are bit patterns: 0xFFFFFFFF is Int -1.
            self.push(Token::integer(pos, value as u32 as i32));
        }
        Ok(())
    }

    // =========================================================================
    // Character and string literals
    // =========================================================================

    fn scan_escape(&mut self, pos: SourcePos) -> Result<char> {
        let unit = self
            .source
            .next()
            .ok_or_else(|| self.syntax("unterminated escape sequence", pos))?;
        let c = match unit {
            u if u == b'n' as u16 => '\n',
            u if u == b'r' as u16 => '\r',
            u if u == b't' as u16 => '\t',
            u if u == b'\\' as u16 => '\\',
            u if u == b'\'' as u16 => '\'',
            u if u == b'"' as u16 => '"',
            u if u == b'0' as u16 => '\0',
            u if u == b'x' as u16 => {
                let hi = self.source.next().and_then(|u| hex_value(u));
                let lo = self.source.next().and_then(|u| hex_value(u));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        char::from_u32((hi * 16 + lo) as u32).unwrap_or('\u{FFFD}')
                    }
                    _ => return Err(self.syntax("malformed \\xHH escape", pos)),
                }
            }
            u if u == b'u' as u16 => {
                let mut value = 0u32;
                for _ in 0..4 {
                    match self.source.next().and_then(|u| hex_value(u)) {
                        Some(d) => value = value * 16 + d as u32,
                        None => return Err(self.syntax("malformed \\uHHHH escape", pos)),
                    }
                }
                char::from_u32(value).unwrap_or('\u{FFFD}')
            }
            other => {
                let shown = char::from_u32(other as u32).unwrap_or('\u{FFFD}');
                return Err(self.syntax(format!("unsupported escape '\\{}'", shown), pos));
            }
        };
        Ok(c)
    }

    fn scan_character(&mut self, pos: SourcePos) -> Result<()> {
        self.source.next(); // opening quote
        let unit = self
            .source
            .next()
            .ok_or_else(|| self.syntax("unterminated character literal", pos))?;
        let value = if unit == b'\\' as u16 {
            self.scan_escape(pos)?
        } else {
            char::from_u32(unit as u32).unwrap_or('\u{FFFD}')
        };
        if !self.source.consume(b'\'' as u16) {
            return Err(self.syntax("unterminated character literal", pos));
        }
        self.push(Token::character(pos, value));
        Ok(())
    }

    fn scan_string(&mut self, pos: SourcePos) -> Result<()> {
        self.source.next(); // opening quote
        if self.source.consume_pair(b'"' as u16, b'"' as u16) {
            return self.scan_verbatim_string(pos);
        }

        let mut text = String::new();
        loop {
            let unit = self
                .source
                .next()
                .ok_or_else(|| self.syntax("unterminated string", pos))?;
            match unit {
                u if u == b'"' as u16 => break,
                u if u == b'\n' as u16 => {
                    return Err(self.syntax("unterminated string", pos));
                }
                u if u == b'\\' as u16 => text.push(self.scan_escape(pos)?),
                u => text.push(char::from_u32(u as u32).unwrap_or('\u{FFFD}')),
            }
        }
        // `$( ... )` markers stay in the payload; the parser rebuilds a
        // formatted string from them once expressions can be parsed.
        self.push(Token::string(pos, text));
        Ok(())
    }

    fn scan_verbatim_string(&mut self, pos: SourcePos) -> Result<()> {
        let mut text = String::new();
        loop {
            if self.source.peek() == Some(b'"' as u16)
                && self.source.peek_ahead(1) == Some(b'"' as u16)
                && self.source.peek_ahead(2) == Some(b'"' as u16)
            {
                self.source.next();
                self.source.next();
                self.source.next();
                break;
            }
            match self.source.next() {
                Some(u) => text.push(char::from_u32(u as u32).unwrap_or('\u{FFFD}')),
                None => return Err(self.syntax("unterminated verbatim string", pos)),
            }
        }
        self.push(Token::string(pos, text));
        Ok(())
    }

    // =========================================================================
    // Directives
    // =========================================================================

    fn scan_directive(&mut self, pos: SourcePos) -> Result<()> {
        self.source.next(); // '$'
        if !self.source.peek().map(is_identifier_start).unwrap_or(false) {
            return Err(self.syntax("expected directive name after '$'", pos));
        }
        let mut word = String::new();
        while let Some(u) = self.source.peek() {
            if !is_identifier_part(u) {
                break;
            }
            word.push(char::from_u32(u as u32).unwrap_or('\u{FFFD}'));
            self.source.next();
        }
        if let Some(kind) = TokenKind::from_directive(&word) {
            self.push(Token::new(kind, pos));
        } else {
            let sym = self.interner.intern(&word);
            self.push(Token::name(TokenKind::Placeholder, pos, sym));
        }
        Ok(())
    }

    // =========================================================================
    // Symbols (longest match)
    // =========================================================================

    fn scan_symbol(&mut self, pos: SourcePos) -> Result<()> {
        use TokenKind::*;
        let first = self.source.next().unwrap_or(0);

        let kind = match first {
            u if u == b'>' as u16 => {
                if self.source.consume_pair(b'>' as u16, b'>' as u16) {
                    if self.source.consume(b'=' as u16) { ShiftRightXAssign } else { ShiftRightX }
                } else if self.source.consume(b'>' as u16) {
                    if self.source.consume(b'=' as u16) { ShiftRightAssign } else { ShiftRight }
                } else if self.source.consume(b'=' as u16) {
                    CompareGe
                } else {
                    CompareGt
                }
            }
            u if u == b'<' as u16 => {
                if self.source.consume(b'<' as u16) {
                    if self.source.consume(b'=' as u16) { ShiftLeftAssign } else { ShiftLeft }
                } else if self.source.consume(b'=' as u16) {
                    CompareLe
                } else {
                    CompareLt
                }
            }
            u if u == b'.' as u16 => {
                if self.source.consume(b'.' as u16) {
                    if self.source.consume(b'<' as u16) {
                        DotDotLess
                    } else if self.source.consume(b'>' as u16) {
                        DotDotGreater
                    } else {
                        DotDot
                    }
                } else {
                    Dot
                }
            }
            u if u == b'+' as u16 => {
                if self.source.consume(b'+' as u16) {
                    Increment
                } else if self.source.consume(b'=' as u16) {
                    PlusAssign
                } else {
                    Plus
                }
            }
            u if u == b'-' as u16 => {
                if self.source.consume(b'-' as u16) {
                    Decrement
                } else if self.source.consume(b'=' as u16) {
                    MinusAssign
                } else if self.source.consume(b'>' as u16) {
                    Arrow
                } else {
                    Minus
                }
            }
            u if u == b'*' as u16 => {
                if self.source.consume(b'=' as u16) { TimesAssign } else { Times }
            }
            u if u == b'/' as u16 => {
                if self.source.consume(b'=' as u16) { SlashAssign } else { Slash }
            }
            u if u == b'%' as u16 => {
                if self.source.consume(b'=' as u16) { PercentAssign } else { Percent }
            }
            u if u == b'^' as u16 => {
                if self.source.consume(b'=' as u16) { PowerAssign } else { Power }
            }
            u if u == b'&' as u16 => {
                if self.source.consume(b'=' as u16) { AmpersandAssign } else { Ampersand }
            }
            u if u == b'|' as u16 => {
                if self.source.consume(b'=' as u16) { VerticalBarAssign } else { VerticalBar }
            }
            u if u == b'~' as u16 => {
                if self.source.consume(b'=' as u16) { TildeAssign } else { Tilde }
            }
            u if u == b'!' as u16 => {
                if self.source.consume(b'=' as u16) { CompareNe } else { Bang }
            }
            u if u == b'=' as u16 => {
                if self.source.consume(b'=' as u16) {
                    CompareEq
                } else if self.source.consume(b'>' as u16) {
                    FatArrow
                } else {
                    Assign
                }
            }
            u if u == b',' as u16 => Comma,
            u if u == b':' as u16 => Colon,
            u if u == b';' as u16 => Semicolon,
            u if u == b'?' as u16 => QuestionMark,
            u if u == b'(' as u16 => OpenParen,
            u if u == b')' as u16 => CloseParen,
            u if u == b'[' as u16 => OpenBracket,
            u if u == b']' as u16 => CloseBracket,
            u if u == b'{' as u16 => OpenBrace,
            u if u == b'}' as u16 => CloseBrace,
            other => {
                let shown = char::from_u32(other as u32).unwrap_or('\u{FFFD}');
                return Err(self.syntax(format!("unrecognized symbol '{}'", shown), pos));
            }
        };
        self.push(Token::new(kind, pos));
        Ok(())
    }
}

/// Convenience entry point used by the preprocessor and tests.
pub fn tokenize(source: CharSource, interner: &mut Interner) -> Result<Vec<Token>> {
    Tokenizer::new(source, interner).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Payload;

    fn lex(text: &str) -> Vec<Token> {
        let mut interner = Interner::new();
        lex_with(text, &mut interner)
    }

    fn lex_with(text: &str, interner: &mut Interner) -> Vec<Token> {
        let file = interner.intern("test.argon");
        let source = CharSource::from_buffer(file, text);
        tokenize(source, interner).expect("tokenize failed")
    }

    fn lex_err(text: &str) -> CompileError {
        let mut interner = Interner::new();
        let file = interner.intern("test.argon");
        let source = CharSource::from_buffer(file, text);
        tokenize(source, &mut interner).unwrap_err()
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        let tokens = lex("class Hello endClass");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Class, TokenKind::TypeIdentifier, TokenKind::EndClass]
        );
    }

    #[test]
    fn case_distinguishes_type_names() {
        let tokens = lex("value Value");
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].kind, TokenKind::TypeIdentifier);
    }

    #[test]
    fn predicate_identifier_keeps_question_mark() {
        let mut interner = Interner::new();
        let tokens = lex_with("empty?", &mut interner);
        assert_eq!(tokens.len(), 1);
        assert_eq!(interner.resolve(tokens[0].name_or_empty()), "empty?");
    }

    #[test]
    fn optional_type_splits_question_mark() {
        let tokens = lex("Int?");
        assert_eq!(kinds(&tokens), vec![TokenKind::TypeIdentifier, TokenKind::QuestionMark]);
    }

    #[test]
    fn integer_promotes_to_long_on_overflow() {
        let tokens = lex("3000000000");
        assert_eq!(tokens[0].kind, TokenKind::LiteralLong);
        assert_eq!(tokens[0].payload, Payload::Long(3_000_000_000));
    }

    #[test]
    fn integer_fits_stays_integer() {
        let tokens = lex("2147483647");
        assert_eq!(tokens[0].kind, TokenKind::LiteralInteger);
        assert_eq!(tokens[0].payload, Payload::Integer(i32::MAX));
    }

    #[test]
    fn long_suffix_forces_long() {
        let tokens = lex("12L");
        assert_eq!(tokens[0].kind, TokenKind::LiteralLong);
        assert_eq!(tokens[0].payload, Payload::Long(12));
    }

    #[test]
    fn long_overflow_is_hard_error() {
        let err = lex_err("99999999999999999999");
        assert!(err.message().contains("64-bit"));
    }

    #[test]
    fn radix_prefixes() {
        let tokens = lex("0x1F 0b101 0c17");
        assert_eq!(tokens[0].payload, Payload::Integer(31));
        assert_eq!(tokens[1].payload, Payload::Integer(5));
        assert_eq!(tokens[2].payload, Payload::Integer(15));
    }

    #[test]
    fn hex_all_bits_is_negative_int() {
        let tokens = lex("0xFFFFFFFF");
        assert_eq!(tokens[0].payload, Payload::Integer(-1));
    }

    #[test]
    fn real_literals() {
        let tokens = lex("3.25 1e3 2.5e-1");
        assert_eq!(tokens[0].payload, Payload::Real(3.25));
        assert_eq!(tokens[1].payload, Payload::Real(1000.0));
        assert_eq!(tokens[2].payload, Payload::Real(0.25));
    }

    #[test]
    fn range_after_integer_is_not_real() {
        let tokens = lex("1..3");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::LiteralInteger, TokenKind::DotDot, TokenKind::LiteralInteger]
        );
    }

    #[test]
    fn character_escapes() {
        let tokens = lex(r"'\n' '\x41' 'π'");
        assert_eq!(tokens[0].payload, Payload::Character('\n'));
        assert_eq!(tokens[1].payload, Payload::Character('A'));
        assert_eq!(tokens[2].payload, Payload::Character('π'));
    }

    #[test]
    fn string_with_escapes() {
        let tokens = lex(r#""a\tb""#);
        assert_eq!(tokens[0].payload, Payload::Str("a\tb".into()));
    }

    #[test]
    fn string_keeps_interpolation_markers() {
        let tokens = lex(r#""total: $(a + b)!""#);
        assert_eq!(tokens[0].payload, Payload::Str("total: $(a + b)!".into()));
    }

    #[test]
    fn verbatim_string_spans_lines() {
        let tokens = lex("\"\"\"two\nlines\"\"\"");
        assert_eq!(tokens[0].payload, Payload::Str("two\nlines".into()));
    }

    #[test]
    fn unterminated_string_is_error() {
        let err = lex_err("\"oops");
        assert!(err.message().contains("unterminated"));
        assert_eq!(err.pos.unwrap().column, 1);
    }

    #[test]
    fn comments_are_discarded() {
        let tokens = lex("a # trailing words\nb");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Identifier, TokenKind::EndOfLine, TokenKind::Identifier]
        );
    }

    #[test]
    fn block_comments_nest() {
        let tokens = lex("a #{ outer #{ inner #} still out #} b");
        assert_eq!(kinds(&tokens), vec![TokenKind::Identifier, TokenKind::Identifier]);
    }

    #[test]
    fn longest_match_shift_symbols() {
        let tokens = lex(">>>= >>> >>= >> >= >");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::ShiftRightXAssign,
                TokenKind::ShiftRightX,
                TokenKind::ShiftRightAssign,
                TokenKind::ShiftRight,
                TokenKind::CompareGe,
                TokenKind::CompareGt
            ]
        );
    }

    #[test]
    fn eol_suppressed_inside_brackets() {
        let tokens = lex("f(1,\n2)\ng");
        assert!(!kinds(&tokens[..5]).contains(&TokenKind::EndOfLine));
        assert_eq!(tokens[tokens.len() - 2].kind, TokenKind::EndOfLine);
    }

    #[test]
    fn consecutive_newlines_collapse() {
        let tokens = lex("a\n\n\nb");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Identifier, TokenKind::EndOfLine, TokenKind::Identifier]
        );
    }

    #[test]
    fn directives_and_placeholders() {
        let mut interner = Interner::new();
        let tokens = lex_with("$if $define $DataType", &mut interner);
        assert_eq!(tokens[0].kind, TokenKind::DirectiveIf);
        assert_eq!(tokens[1].kind, TokenKind::DirectiveDefine);
        assert_eq!(tokens[2].kind, TokenKind::Placeholder);
        assert_eq!(interner.resolve(tokens[2].name_or_empty()), "DataType");
    }

    #[test]
    fn every_token_records_position() {
        let tokens = lex("a\n  b");
        assert_eq!(tokens[0].pos.line, 1);
        assert_eq!(tokens[0].pos.column, 1);
        let b = &tokens[2];
        assert_eq!(b.pos.line, 2);
        assert_eq!(b.pos.column, 3);
    }

    #[test]
    fn unrecognized_symbol_is_error() {
        let err = lex_err("`");
        assert!(err.message().contains("unrecognized symbol"));
    }
}
