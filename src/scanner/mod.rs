//! Turns a `Source`'s byte stream into a stream of `Token`s. The scanner
//! never looks more than one character ahead, and never allocates beyond the
//! `Vec` of tokens it's asked to produce — every token is a slice into the
//! original source, combined with a `Span`.

use std::rc::Rc;

use crate::common::source::Source;
use crate::common::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LParen,
    RParen,
    Dot,
    Number,
    String,
    True,
    False,
    Symbol,
    Define,
    Lambda,
    If,
    Set,
    Let,
    Begin,
    Quote,
    CallCc,
    Fail,
    Eof,
}

impl TokenKind {
    /// Whether this kind names one of the language's reserved forms —
    /// everything a bare identifier is not allowed to shadow or be used as a
    /// value (outside of `quote`'s `datum` grammar, where reserved words are
    /// ordinary data).
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            TokenKind::Define
                | TokenKind::Lambda
                | TokenKind::If
                | TokenKind::Set
                | TokenKind::Let
                | TokenKind::Begin
                | TokenKind::Quote
                | TokenKind::CallCc
        )
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn lexeme(&self) -> &str {
        self.span.lexeme()
    }
}

/// A one-character-of-lookahead lexer over a `Source`'s bytes.
pub struct Scanner {
    source: Rc<Source>,
    bytes: Vec<u8>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
}

fn is_symbol_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'$' | b'%' | b'&' | b'*' | b'+' | b'-' | b'.' | b'/' | b':' | b'<' | b'='
                | b'>' | b'?' | b'@' | b'^' | b'_' | b'~'
        )
}

impl Scanner {
    pub fn new(source: Rc<Source>) -> Scanner {
        let bytes = source.contents.as_bytes().to_vec();
        Scanner {
            source,
            bytes,
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.bytes[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.bytes.len() {
            0
        } else {
            self.bytes[self.current + 1]
        }
    }

    fn advance(&mut self) -> u8 {
        let b = self.bytes[self.current];
        self.current += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        b
    }

    fn make(&self, kind: TokenKind) -> Token {
        let span = Span::new(
            &self.source,
            self.start,
            self.current - self.start,
            self.start_line,
            self.start_column,
        );
        Token { kind, span }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' | b'\n' => {
                    self.advance();
                }
                b';' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn number(&mut self) -> Token {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        self.make(TokenKind::Number)
    }

    fn string(&mut self) -> Token {
        while self.peek() != b'"' && !self.is_at_end() {
            self.advance();
        }
        if self.is_at_end() {
            return self.make(TokenKind::Fail);
        }
        self.advance(); // closing quote
        self.make(TokenKind::String)
    }

    fn symbol_or_keyword(&mut self) -> Token {
        while is_symbol_byte(self.peek()) {
            self.advance();
        }
        let lexeme = std::str::from_utf8(&self.bytes[self.start..self.current]).unwrap_or("");
        let kind = match lexeme {
            "define" => TokenKind::Define,
            "lambda" => TokenKind::Lambda,
            "if" => TokenKind::If,
            "set!" => TokenKind::Set,
            "let" => TokenKind::Let,
            "begin" => TokenKind::Begin,
            "quote" => TokenKind::Quote,
            "call/cc" => TokenKind::CallCc,
            _ => TokenKind::Symbol,
        };
        self.make(kind)
    }

    /// Scans and returns the next token, advancing past it.
    pub fn scan_token(&mut self) -> Token {
        self.skip_whitespace();
        self.start = self.current;
        self.start_line = self.line;
        self.start_column = self.column;

        if self.is_at_end() {
            return self.make(TokenKind::Eof);
        }

        let b = self.advance();
        match b {
            b'(' => self.make(TokenKind::LParen),
            b')' => self.make(TokenKind::RParen),
            b'"' => self.string(),
            b'#' if self.peek() == b't' => {
                self.advance();
                self.make(TokenKind::True)
            }
            b'#' if self.peek() == b'f' => {
                self.advance();
                self.make(TokenKind::False)
            }
            b'.' if is_symbol_byte(self.peek()) => self.symbol_or_keyword(),
            b'.' => self.make(TokenKind::Dot),
            b'-' if self.peek().is_ascii_digit() => self.number(),
            d if d.is_ascii_digit() => self.number(),
            s if is_symbol_byte(s) => self.symbol_or_keyword(),
            _ => self.make(TokenKind::Fail),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scan_all(src: &str) -> Vec<TokenKind> {
        let source = Rc::new(Source::source(src));
        let mut scanner = Scanner::new(source);
        let mut kinds = Vec::new();
        loop {
            let token = scanner.scan_token();
            let done = token.kind == TokenKind::Eof;
            kinds.push(token.kind);
            if done {
                break;
            }
        }
        kinds
    }

    // S1: canonical lexemes produce exactly the matching kind.
    #[test]
    fn keywords_scan_to_their_own_kind() {
        assert_eq!(scan_all("lambda"), vec![TokenKind::Lambda, TokenKind::Eof]);
        assert_eq!(scan_all("define"), vec![TokenKind::Define, TokenKind::Eof]);
        assert_eq!(scan_all("if"), vec![TokenKind::If, TokenKind::Eof]);
        assert_eq!(scan_all("set!"), vec![TokenKind::Set, TokenKind::Eof]);
        assert_eq!(scan_all("let"), vec![TokenKind::Let, TokenKind::Eof]);
        assert_eq!(scan_all("begin"), vec![TokenKind::Begin, TokenKind::Eof]);
        assert_eq!(scan_all("quote"), vec![TokenKind::Quote, TokenKind::Eof]);
        assert_eq!(scan_all("call/cc"), vec![TokenKind::CallCc, TokenKind::Eof]);
    }

    // S2: keyword recognition is whole-token, not prefix-based.
    #[test]
    fn keyword_prefix_is_just_a_symbol() {
        assert_eq!(scan_all("lambdas"), vec![TokenKind::Symbol, TokenKind::Eof]);
        assert_eq!(scan_all("iffy"), vec![TokenKind::Symbol, TokenKind::Eof]);
    }

    // S3: an unterminated string produces Fail and can't make further progress.
    #[test]
    fn unterminated_string_fails() {
        let source = Rc::new(Source::source("\"never closed"));
        let mut scanner = Scanner::new(source);
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Fail);
        let next = scanner.scan_token();
        assert_eq!(next.kind, TokenKind::Eof);
    }

    #[test]
    fn negative_number_vs_minus_symbol() {
        assert_eq!(scan_all("-5"), vec![TokenKind::Number, TokenKind::Eof]);
        assert_eq!(scan_all("-"), vec![TokenKind::Symbol, TokenKind::Eof]);
        assert_eq!(scan_all("-foo"), vec![TokenKind::Symbol, TokenKind::Eof]);
    }

    #[test]
    fn lone_dot_is_dot_token() {
        assert_eq!(scan_all("(a . b)"), vec![
            TokenKind::LParen, TokenKind::Symbol, TokenKind::Dot, TokenKind::Symbol, TokenKind::RParen, TokenKind::Eof,
        ]);
    }

    #[test]
    fn floats_and_ints() {
        assert_eq!(scan_all("3.14"), vec![TokenKind::Number, TokenKind::Eof]);
        assert_eq!(scan_all("42"), vec![TokenKind::Number, TokenKind::Eof]);
    }

    #[test]
    fn line_and_column_tracking() {
        let source = Rc::new(Source::source("(foo\n  bar)"));
        let mut scanner = Scanner::new(source);
        let lparen = scanner.scan_token();
        assert_eq!((lparen.span.line, lparen.span.column), (1, 1));
        let foo = scanner.scan_token();
        assert_eq!((foo.span.line, foo.span.column), (1, 2));
        let bar = scanner.scan_token();
        assert_eq!((bar.span.line, bar.span.column), (2, 3));
    }
}
