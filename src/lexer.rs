use std::rc::Rc;

use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::span::{Position, Spanned};
use crate::token::{Token, TokenKind};

pub struct Lexer<'src> {
    // Implicitly newline-terminated so a trailing `//` comment always closes (§4.1).
    source: Vec<char>,
    file: Rc<str>,
    idx: usize,
    row: u32,
    col: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, file: &str) -> Self {
        let mut chars: Vec<char> = source.chars().collect();
        if chars.last() != Some(&'\n') {
            chars.push('\n');
        }
        Self {
            source: chars,
            file: Rc::from(file),
            idx: 0,
            row: 1,
            col: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.node == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.idx).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.source.get(self.idx + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.idx += 1;
        if c == '\n' {
            self.row += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn here(&self) -> Position {
        Position::new(self.file.clone(), self.row, self.col, self.idx as u32)
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(kind, message.into(), self.here())
    }

    fn make(&self, kind: TokenKind, pos: Position) -> Token {
        Spanned::new(kind, pos)
    }

    fn next_token(&mut self) -> Result<Token, Diagnostic> {
        loop {
            self.skip_whitespace();

            let pos = self.here();
            let ch = match self.peek() {
                Some(c) => c,
                None => return Ok(self.make(TokenKind::Eof, pos)),
            };

            if ch.is_ascii_digit() {
                return self.scan_integer(pos);
            }
            if ch.is_ascii_uppercase() {
                return self.scan_class_name(pos);
            }
            if ch.is_ascii_lowercase() || ch == '_' {
                return self.scan_identifier(pos);
            }
            if ch == '"' {
                return self.scan_string(pos);
            }
            if ch == '/' {
                if let Some(consumed) = self.skip_comment_or_div(pos.clone())? {
                    return Ok(consumed);
                }
                continue;
            }

            return self.scan_symbol(pos);
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.advance();
        }
    }

    /// Returns `None` when a comment was skipped and scanning should retry;
    /// `Some(token)` for `/` actually meaning division.
    fn skip_comment_or_div(&mut self, pos: Position) -> Result<Option<Token>, Diagnostic> {
        self.advance(); // consume '/'
        match self.peek() {
            Some('*') => {
                self.advance();
                loop {
                    match self.advance() {
                        None => {
                            return Err(self.error(
                                ErrorKind::InvalidSyntax,
                                "unterminated block comment: expected '*/'",
                            ))
                        }
                        Some('*') if self.peek() == Some('/') => {
                            self.advance();
                            return Ok(None);
                        }
                        _ => {}
                    }
                }
            }
            Some('/') => {
                while matches!(self.peek(), Some(c) if c != '\n') {
                    self.advance();
                }
                Ok(None)
            }
            _ => Ok(Some(self.make(TokenKind::Slash, pos))),
        }
    }

    fn scan_integer(&mut self, pos: Position) -> Result<Token, Diagnostic> {
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            text.push(self.advance().unwrap());
        }
        let value: i64 = text.parse().map_err(|_| {
            self.error(
                ErrorKind::InvalidSyntax,
                format!("integer literal '{}' out of range", text),
            )
        })?;
        Ok(self.make(TokenKind::Integer(value), pos))
    }

    /// Class-name-ish identifiers are case-folded: first letter uppercase,
    /// the rest lowercase (§3). `Int`/`Bool`/`String`/`Void` are left as
    /// plain identifiers here — the parser disambiguates by spelling.
    fn scan_class_name(&mut self, pos: Position) -> Result<Token, Diagnostic> {
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            text.push(self.advance().unwrap());
        }
        let mut chars = text.chars();
        let folded = match chars.next() {
            Some(first) => {
                first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
            }
            None => text,
        };
        Ok(self.make(TokenKind::ClassName(folded), pos))
    }

    fn scan_identifier(&mut self, pos: Position) -> Result<Token, Diagnostic> {
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            text.push(self.advance().unwrap());
        }
        let folded = text.to_ascii_lowercase();
        if let Some(kw) = TokenKind::from_lowercase_keyword(&folded) {
            return Ok(self.make(kw, pos));
        }
        Ok(self.make(TokenKind::Ident(folded), pos))
    }

    fn scan_string(&mut self, pos: Position) -> Result<Token, Diagnostic> {
        self.advance(); // consume opening '"'
        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self.error(
                        ErrorKind::InvalidSyntax,
                        "unterminated string literal",
                    ))
                }
                Some('\n') => {
                    return Err(self.error(
                        ErrorKind::InvalidSyntax,
                        "illegal line end in string literal",
                    ))
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    value.push(self.scan_escape()?);
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }
        Ok(self.make(TokenKind::Str(value), pos))
    }

    fn scan_escape(&mut self) -> Result<char, Diagnostic> {
        let c = self.peek().ok_or_else(|| {
            self.error(ErrorKind::IllegalEscape, "unterminated escape sequence")
        })?;
        match c {
            't' => {
                self.advance();
                Ok('\t')
            }
            'b' => {
                self.advance();
                Ok('\u{8}')
            }
            'r' => {
                self.advance();
                Ok('\r')
            }
            'f' => {
                self.advance();
                Ok('\u{C}')
            }
            'n' => {
                self.advance();
                Ok('\n')
            }
            '\\' => {
                self.advance();
                Ok('\\')
            }
            '"' => {
                self.advance();
                Ok('"')
            }
            '0' => {
                self.advance();
                self.scan_numeric_escape(10)
            }
            'x' => {
                self.advance();
                self.scan_numeric_escape(16)
            }
            other => Err(self.error(
                ErrorKind::IllegalEscape,
                format!("illegal escape character '{}'", other),
            )),
        }
    }

    fn scan_numeric_escape(&mut self, radix: u32) -> Result<char, Diagnostic> {
        let mut digits = String::new();
        let is_digit = |c: char| {
            if radix == 16 {
                c.is_ascii_hexdigit()
            } else {
                c.is_ascii_digit()
            }
        };
        while matches!(self.peek(), Some(c) if is_digit(c)) {
            digits.push(self.advance().unwrap());
        }
        let ordinal = u32::from_str_radix(&digits, radix).map_err(|_| {
            self.error(ErrorKind::IllegalEscape, "invalid numeric escape sequence")
        })?;
        if ordinal >= 128 {
            return Err(self.error(
                ErrorKind::IllegalEscape,
                "escape sequence does not fit in 7-bit ASCII",
            ));
        }
        Ok(ordinal as u8 as char)
    }

    fn scan_symbol(&mut self, pos: Position) -> Result<Token, Diagnostic> {
        let ch = self.advance().unwrap();
        let kind = match ch {
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '&' => {
                if self.peek() == Some('&') {
                    self.advance();
                    TokenKind::AndAnd
                } else {
                    return Err(self.error(
                        ErrorKind::IllegalToken,
                        "expected '&&', found single '&'",
                    ));
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.advance();
                    TokenKind::OrOr
                } else {
                    return Err(self.error(
                        ErrorKind::IllegalToken,
                        "expected '||', found single '|'",
                    ));
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Ne
                } else {
                    TokenKind::Bang
                }
            }
            other => {
                return Err(self.error(
                    ErrorKind::IllegalToken,
                    format!("illegal token '{}'", other),
                ))
            }
        };
        Ok(self.make(kind, pos))
    }

    #[allow(dead_code)]
    fn peek_ahead_is_digit(&self) -> bool {
        matches!(self.peek_at(1), Some(c) if c.is_ascii_digit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<TokenKind> {
        let tokens = Lexer::new(source, "test.j").tokenize().expect("lex ok");
        tokens.into_iter().map(|t| t.node).collect()
    }

    fn lex_err(source: &str) -> Diagnostic {
        Lexer::new(source, "test.j")
            .tokenize()
            .expect_err("expected lex error")
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            lex("class if else while readln println return this new null true false"),
            vec![
                TokenKind::Class,
                TokenKind::If,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::Readln,
                TokenKind::Println,
                TokenKind::Return,
                TokenKind::This,
                TokenKind::New,
                TokenKind::Null,
                TokenKind::True,
                TokenKind::False,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_symbols() {
        assert_eq!(
            lex("{ } ( ) ; , . + - * / < > <= >= == != && || ! ="),
            vec![
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Semicolon,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::EqEq,
                TokenKind::Ne,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Bang,
                TokenKind::Assign,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_integer_and_identifier() {
        assert_eq!(
            lex("x1 42"),
            vec![
                TokenKind::Ident("x1".to_string()),
                TokenKind::Integer(42),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_class_name_case_folding() {
        assert_eq!(
            lex("fOOBar"),
            vec![TokenKind::ClassName("Foobar".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_identifier_case_folding() {
        assert_eq!(
            lex("fooBAR"),
            vec![TokenKind::Ident("foobar".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_line_comment_to_eof_without_trailing_newline() {
        assert_eq!(
            lex("x // trailing comment with no newline"),
            vec![TokenKind::Ident("x".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_block_comment_non_nesting() {
        assert_eq!(
            lex("a /* outer /* inner */ still_comment */ b"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Ident("still_comment".to_string()),
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Ident("b".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = lex_err("a /* never closes");
        assert_eq!(err.kind, ErrorKind::InvalidSyntax);
    }

    #[test]
    fn test_string_escape_round_trip() {
        assert_eq!(
            lex(r#""a\n\x41""#),
            vec![TokenKind::Str("a\nA".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_string_decimal_escape() {
        assert_eq!(
            lex(r#""\065""#),
            vec![TokenKind::Str("A".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_string_unterminated_on_newline() {
        let err = lex_err("\"abc\ndef\"");
        assert_eq!(err.kind, ErrorKind::InvalidSyntax);
    }

    #[test]
    fn test_illegal_escape_character() {
        let err = lex_err(r#""\q""#);
        assert_eq!(err.kind, ErrorKind::IllegalEscape);
    }

    #[test]
    fn test_illegal_escape_too_large() {
        let err = lex_err(r#""\xFF""#);
        assert_eq!(err.kind, ErrorKind::IllegalEscape);
    }

    #[test]
    fn test_illegal_token() {
        let err = lex_err("@");
        assert_eq!(err.kind, ErrorKind::IllegalToken);
    }

    #[test]
    fn test_single_ampersand_is_illegal() {
        let err = lex_err("a & b");
        assert_eq!(err.kind, ErrorKind::IllegalToken);
    }

    #[test]
    fn test_division_token() {
        assert_eq!(
            lex("a / b"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Slash,
                TokenKind::Ident("b".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_position_tracking() {
        let tokens = Lexer::new("class\nFoo", "test.j").tokenize().unwrap();
        assert_eq!(tokens[0].position.row, 1);
        assert_eq!(tokens[0].position.col, 1);
        assert_eq!(tokens[1].position.row, 2);
        assert_eq!(tokens[1].position.col, 1);
    }
}
