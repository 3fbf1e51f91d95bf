//! Hand-rolled byte scanner: one token per call, whitespace/comments skipped
//! in between. The one piece of state beyond the usual cursor/line is the
//! interpolation-depth stack used to scan `"... $( expr ) ..."` template
//! strings.

use quixil_core::limits::MAX_TEMPLATE_INTERPOLATION_NESTING;

use crate::token::{Token, TokenKind};

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

pub struct Scanner<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: i32,
    /// One entry per currently-open `$( ... )`, counting unmatched `(` within it.
    parens: [u8; MAX_TEMPLATE_INTERPOLATION_NESTING + 1],
    num_parens: usize,
}

impl<'src> Scanner<'src> {
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            start: 0,
            current: 0,
            line: 1,
            parens: [0; MAX_TEMPLATE_INTERPOLATION_NESTING + 1],
            num_parens: 0,
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn byte_at(&self, index: usize) -> u8 {
        self.source.as_bytes()[index]
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.byte_at(self.current)
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.source.len() {
            0
        } else {
            self.byte_at(self.current + 1)
        }
    }

    fn advance(&mut self) -> u8 {
        let c = self.byte_at(self.current);
        self.current += 1;
        c
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.byte_at(self.current) != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn lexeme(&self) -> &'src str {
        &self.source[self.start..self.current]
    }

    fn make(&self, kind: TokenKind) -> Token<'src> {
        Token {
            kind,
            lexeme: self.lexeme(),
            line: self.line,
        }
    }

    fn error(&self, message: &'static str) -> Token<'src> {
        Token {
            kind: TokenKind::Error,
            lexeme: message,
            line: self.line,
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.advance();
                }
                b'\n' => {
                    self.line += 1;
                    self.advance();
                }
                b'/' if self.peek_next() == b'/' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn identifier_kind(&self) -> TokenKind {
        let text = self.lexeme().as_bytes();
        let rest = |start: usize, word: &str| text.len() == start + word.len() && &text[start..] == word.as_bytes();

        match text.first() {
            Some(b'a') if rest(1, "nd") => TokenKind::And,
            Some(b'c') if rest(1, "lass") => TokenKind::Class,
            Some(b'e') if rest(1, "lse") => TokenKind::Else,
            Some(b'f') if text.len() > 1 => match text[1] {
                b'a' if rest(2, "lse") => TokenKind::False,
                b'o' if rest(2, "r") => TokenKind::For,
                b'u' if rest(2, "nction") => TokenKind::Function,
                _ => TokenKind::Identifier,
            },
            Some(b'i') if rest(1, "f") => TokenKind::If,
            Some(b'n') if rest(1, "il") => TokenKind::Nil,
            Some(b'o') if rest(1, "r") => TokenKind::Or,
            Some(b'p') if rest(1, "rint") => TokenKind::Print,
            Some(b'r') if rest(1, "eturn") => TokenKind::Return,
            Some(b's') if rest(1, "uper") => TokenKind::Super,
            Some(b't') if text.len() > 1 => match text[1] {
                b'h' if rest(2, "is") => TokenKind::This,
                b'r' if rest(2, "ue") => TokenKind::True,
                _ => TokenKind::Identifier,
            },
            Some(b'v') if rest(1, "ar") => TokenKind::Var,
            Some(b'w') if text.len() > 2 => {
                if text[1] == b'h' && text[2] == b'i' {
                    if rest(1, "hile") {
                        TokenKind::While
                    } else {
                        TokenKind::Identifier
                    }
                } else if rest(1, "hen") {
                    TokenKind::When
                } else {
                    TokenKind::Identifier
                }
            }
            _ => TokenKind::Identifier,
        }
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || is_digit(self.peek()) {
            self.advance();
        }
        self.make(self.identifier_kind())
    }

    fn number(&mut self) -> Token<'src> {
        while is_digit(self.peek()) {
            self.advance();
        }
        if self.peek() == b'.' && is_digit(self.peek_next()) {
            self.advance();
            while is_digit(self.peek()) {
                self.advance();
            }
        }
        self.make(TokenKind::Number)
    }

    /// Scans a string body (or the tail of one, after an interpolation hole
    /// closes) up to the next `"`, or until `$(` opens a new hole.
    fn string(&mut self) -> Token<'src> {
        let mut kind = TokenKind::String;
        loop {
            if self.is_at_end() {
                return self.error("Unterminated string 1");
            }
            let c = self.advance();
            if c == b'"' {
                break;
            }
            if c == b'\n' {
                self.line += 1;
            }
            if c == b'$' {
                if self.num_parens > MAX_TEMPLATE_INTERPOLATION_NESTING {
                    return self.error("Template strings may only nest 8 levels deep");
                }
                if self.advance() != b'(' {
                    return self.error("Expected '(' after '$'");
                }
                self.parens[self.num_parens] = 1;
                self.num_parens += 1;
                kind = TokenKind::Interop;
                break;
            }
        }
        self.make(kind)
    }

    /// Produces the next token. Call repeatedly until [`TokenKind::Eof`].
    pub fn scan_token(&mut self) -> Token<'src> {
        let token = self.scan_token_inner();
        tracing::trace!(kind = ?token.kind, lexeme = token.lexeme, line = token.line, "scanned token");
        token
    }

    fn scan_token_inner(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make(TokenKind::Eof);
        }

        let c = self.advance();

        if is_alpha(c) {
            return self.identifier();
        }
        if is_digit(c) {
            return self.number();
        }

        match c {
            b'(' => {
                if self.num_parens > 0 {
                    self.parens[self.num_parens - 1] += 1;
                }
                self.make(TokenKind::LeftParen)
            }
            b')' => {
                if self.num_parens > 0 {
                    self.parens[self.num_parens - 1] -= 1;
                    if self.parens[self.num_parens - 1] == 0 {
                        self.num_parens -= 1;
                        // The resumed segment's lexeme must not include the
                        // ')' that just closed the hole.
                        self.start = self.current;
                        return self.string();
                    }
                }
                self.make(TokenKind::RightParen)
            }
            b'{' => self.make(TokenKind::LeftBrace),
            b'}' => self.make(TokenKind::RightBrace),
            b';' => self.make(TokenKind::Semicolon),
            b',' => self.make(TokenKind::Comma),
            b'.' => self.make(TokenKind::Dot),
            b'-' => {
                let kind = if self.matches(b'>') { TokenKind::Arrow } else { TokenKind::Minus };
                self.make(kind)
            }
            b'+' => self.make(TokenKind::Plus),
            b'/' => self.make(TokenKind::Slash),
            b'*' => self.make(TokenKind::Star),
            b'!' => {
                let kind = if self.matches(b'=') { TokenKind::BangEqual } else { TokenKind::Bang };
                self.make(kind)
            }
            b'=' => {
                let kind = if self.matches(b'=') { TokenKind::EqualEqual } else { TokenKind::Equal };
                self.make(kind)
            }
            b'<' => {
                let kind = if self.matches(b'=') { TokenKind::LessEqual } else { TokenKind::Less };
                self.make(kind)
            }
            b'>' => {
                let kind = if self.matches(b'=') { TokenKind::GreaterEqual } else { TokenKind::Greater };
                self.make(kind)
            }
            b'"' => self.string(),
            _ => self.error("Unexpected character"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut out = Vec::new();
        loop {
            let tok = scanner.scan_token();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn keywords_are_recognized() {
        assert_eq!(
            kinds("and class else false for function if nil or print return super this true var while when"),
            vec![
                TokenKind::And,
                TokenKind::Class,
                TokenKind::Else,
                TokenKind::False,
                TokenKind::For,
                TokenKind::Function,
                TokenKind::If,
                TokenKind::Nil,
                TokenKind::Or,
                TokenKind::Print,
                TokenKind::Return,
                TokenKind::Super,
                TokenKind::This,
                TokenKind::True,
                TokenKind::Var,
                TokenKind::While,
                TokenKind::When,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn while_and_when_share_a_prefix() {
        assert_eq!(kinds("while"), vec![TokenKind::While, TokenKind::Eof]);
        assert_eq!(kinds("when"), vec![TokenKind::When, TokenKind::Eof]);
    }

    #[test]
    fn identifiers_that_look_like_keyword_prefixes() {
        assert_eq!(kinds("forest"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(kinds("whence"), vec![TokenKind::Identifier, TokenKind::Eof]);
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("42"), vec![TokenKind::Number, TokenKind::Eof]);
        assert_eq!(kinds("3.14"), vec![TokenKind::Number, TokenKind::Eof]);
        // A trailing dot with no digits after is not consumed as part of the number.
        assert_eq!(kinds("3."), vec![TokenKind::Number, TokenKind::Dot, TokenKind::Eof]);
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            kinds("!= == <= >= ->"),
            vec![
                TokenKind::BangEqual,
                TokenKind::EqualEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::Arrow,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("1 // two\n2"), vec![TokenKind::Number, TokenKind::Number, TokenKind::Eof]);
    }

    #[test]
    fn plain_string_literal() {
        let mut scanner = Scanner::new("\"hello\"");
        let tok = scanner.scan_token();
        assert_eq!(tok.kind, TokenKind::String);
        assert_eq!(tok.lexeme, "\"hello\"");
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let mut scanner = Scanner::new("\"abc");
        let tok = scanner.scan_token();
        assert_eq!(tok.kind, TokenKind::Error);
        assert_eq!(tok.lexeme, "Unterminated string 1");
    }

    #[test]
    fn template_interpolation_splits_into_interop_then_string() {
        assert_eq!(
            kinds("\"hi $(1 + 2) there\""),
            vec![
                TokenKind::Interop,
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::String,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tail_segment_after_a_closing_paren_does_not_leak_the_paren() {
        let mut scanner = Scanner::new("\"hi $(1) there\"");
        let interop = scanner.scan_token();
        assert_eq!(interop.kind, TokenKind::Interop);
        let _number = scanner.scan_token();
        let tail = scanner.scan_token();
        assert_eq!(tail.kind, TokenKind::String);
        assert_eq!(tail.lexeme, " there\"");
    }

    #[test]
    fn nested_parens_inside_interpolation_are_tracked() {
        assert_eq!(
            kinds("\"n $((1 + 2) * 3) end\""),
            vec![
                TokenKind::Interop,
                TokenKind::LeftParen,
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::RightParen,
                TokenKind::Star,
                TokenKind::Number,
                TokenKind::String,
                TokenKind::Eof,
            ]
        );
    }

    /// Wraps `inner` in `depth` nested `"a$( ... )"` template strings.
    fn nested_template(depth: usize) -> String {
        let mut source = "0".to_string();
        for _ in 0..depth {
            source = format!("\"a$({source})\"");
        }
        source
    }

    fn scan_all(source: &str) -> Vec<Token<'_>> {
        let mut scanner = Scanner::new(source);
        let mut out = Vec::new();
        loop {
            let tok = scanner.scan_token();
            let done = matches!(tok.kind, TokenKind::Eof | TokenKind::Error);
            out.push(tok);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn nine_levels_of_interpolation_nesting_is_allowed() {
        let source = nested_template(9);
        let tokens = scan_all(&source);
        assert!(tokens.iter().all(|t| t.kind != TokenKind::Error));
    }

    #[test]
    fn ten_levels_of_interpolation_nesting_errors() {
        let source = nested_template(10);
        let tokens = scan_all(&source);
        let last = tokens.last().unwrap();
        assert_eq!(last.kind, TokenKind::Error);
        assert_eq!(last.lexeme, "Template strings may only nest 8 levels deep");
    }

    #[test]
    fn unexpected_character_is_an_error_token() {
        let mut scanner = Scanner::new("@");
        let tok = scanner.scan_token();
        assert_eq!(tok.kind, TokenKind::Error);
        assert_eq!(tok.lexeme, "Unexpected character");
    }
}
