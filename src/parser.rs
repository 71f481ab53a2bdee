//! Turns a `Token` stream into an s-expression value tree: atoms, `Cons`
//! cells, and `Null`, exactly as they'll later live on the heap. Special
//! forms are not a separate AST — `(if a b c)` parses into a list headed by
//! a `Symbol` tagged `TokenKind::If`, the same shape application forms take.
//! The compiler tells them apart by inspecting the head, the same way the
//! reader and the evaluator share one data representation in the language
//! being implemented.
//!
//! Grammar violations specific to a form (a `lambda` formal that isn't a
//! plain symbol, a `set!` target that isn't either) are caught here, at
//! parse time, with a `Syntax` error pointing at the offending token — not
//! deferred to the compiler.

use std::fmt;
use std::rc::Rc;

use crate::common::error::Syntax;
use crate::common::source::Source;
use crate::common::span::{Span, Spanned};
use crate::scanner::{Scanner, Token, TokenKind};

/// The value tree a `Parser` produces. Atoms and conses are how the
/// language represents both code and `quote`d data, so one type serves for
/// source forms, `datum`, and (eventually) runtime list values.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexpr {
    Number(f64),
    Str(String),
    Bool(bool),
    /// `kind` is `TokenKind::Symbol` for a plain identifier, or the specific
    /// reserved `TokenKind` when this symbol names a special form — kept
    /// even inside `quote`d data, where reserved words are inert.
    Symbol { name: String, kind: TokenKind },
    Cons(Box<Spanned<Sexpr>>, Box<Spanned<Sexpr>>),
    Null,
}

impl Sexpr {
    pub fn symbol(name: impl Into<String>, kind: TokenKind) -> Sexpr {
        Sexpr::Symbol { name: name.into(), kind }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Sexpr::Null)
    }

    pub fn as_cons(&self) -> Option<(&Spanned<Sexpr>, &Spanned<Sexpr>)> {
        match self {
            Sexpr::Cons(car, cdr) => Some((car, cdr)),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<(&str, TokenKind)> {
        match self {
            Sexpr::Symbol { name, kind } => Some((name, *kind)),
            _ => None,
        }
    }

    /// Walks a proper list, collecting its elements. Stops (without error)
    /// at the first non-`Cons` cdr, so an improper (dotted) list yields just
    /// its non-tail elements — callers that care about the tail use
    /// `as_cons` directly instead.
    pub fn elements(&self) -> Vec<&Spanned<Sexpr>> {
        let mut items = Vec::new();
        let mut cursor = self;
        while let Sexpr::Cons(car, cdr) = cursor {
            items.push(car.as_ref());
            cursor = &cdr.item;
        }
        items
    }
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexpr::Number(n) => write!(f, "{}", n),
            Sexpr::Str(s) => write!(f, "\"{}\"", s),
            Sexpr::Bool(true) => write!(f, "#t"),
            Sexpr::Bool(false) => write!(f, "#f"),
            Sexpr::Symbol { name, .. } => write!(f, "{}", name),
            Sexpr::Null => write!(f, "()"),
            Sexpr::Cons(car, cdr) => {
                write!(f, "({}", car.item)?;
                let mut rest = &cdr.item;
                loop {
                    match rest {
                        Sexpr::Cons(car2, cdr2) => {
                            write!(f, " {}", car2.item)?;
                            rest = &cdr2.item;
                        }
                        Sexpr::Null => break,
                        other => {
                            write!(f, " . {}", other)?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
        }
    }
}

/// What one call to `Parser::parse_form` produced. Distinguishing `Eof` from
/// `Err` lets a driving loop (the file runner, the REPL) tell "nothing left
/// to read" from "that form was broken" without inspecting error text.
pub enum ParseOutcome {
    Form(Spanned<Sexpr>),
    Eof,
    Err(Syntax),
}

/// A recursive-descent reader with a two-token window (`this`, `lookahead`)
/// so each production can tell, before committing to it, whether the token
/// after an opening `(` names a special form or starts an application.
pub struct Parser {
    scanner: Scanner,
    this: Token,
    lookahead: Token,
}

impl Parser {
    pub fn new(source: Rc<Source>) -> Parser {
        let mut scanner = Scanner::new(source);
        let this = scanner.scan_token();
        let lookahead = scanner.scan_token();
        Parser { scanner, this, lookahead }
    }

    fn advance(&mut self) -> Token {
        let next = self.scanner.scan_token();
        std::mem::replace(&mut self.this, std::mem::replace(&mut self.lookahead, next))
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.this.kind == kind
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<Token, Syntax> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(Syntax::new(self.this.span.clone(), message))
        }
    }

    fn symbol_node(token: Token, kind: TokenKind) -> Spanned<Sexpr> {
        let name = token.lexeme().to_string();
        Spanned::new(Sexpr::symbol(name, kind), token.span)
    }

    fn build_list(items: Vec<Spanned<Sexpr>>, tail_span: Span) -> Spanned<Sexpr> {
        let mut acc = Spanned::new(Sexpr::Null, tail_span);
        for item in items.into_iter().rev() {
            let span = Span::combine(&item.span, &acc.span);
            acc = Spanned::new(Sexpr::Cons(Box::new(item), Box::new(acc)), span);
        }
        acc
    }

    /// Reads and returns the next top-level form, or `Eof` once the source
    /// is exhausted. Each call leaves the parser ready for the next one,
    /// even after an `Err` — callers that want "stop on first error" just
    /// stop calling; the REPL keeps calling to recover form-by-form.
    pub fn parse_form(&mut self) -> ParseOutcome {
        if self.check(TokenKind::Eof) {
            return ParseOutcome::Eof;
        }
        match self.parse_toplevel() {
            Ok(form) => ParseOutcome::Form(form),
            Err(e) => ParseOutcome::Err(e),
        }
    }

    fn parse_toplevel(&mut self) -> Result<Spanned<Sexpr>, Syntax> {
        if self.check(TokenKind::LParen) && self.lookahead.kind == TokenKind::Define {
            self.parse_definition()
        } else {
            self.parse_expression()
        }
    }

    fn parse_definition(&mut self) -> Result<Spanned<Sexpr>, Syntax> {
        let lp = self.expect(TokenKind::LParen, "expected '('")?;
        let define_tok = self.advance();
        let name_tok = self.expect(TokenKind::Symbol, "define target must be a plain identifier")?;
        let value = self.parse_expression()?;
        let rp = self.expect(TokenKind::RParen, "expected ')' after define")?;

        let define_sym = Self::symbol_node(define_tok, TokenKind::Define);
        let name = Self::symbol_node(name_tok, TokenKind::Symbol);
        let mut list = Self::build_list(vec![define_sym, name, value], rp.span.clone());
        list.span = Span::combine(&lp.span, &rp.span);
        Ok(list)
    }

    fn parse_expression(&mut self) -> Result<Spanned<Sexpr>, Syntax> {
        match self.this.kind {
            TokenKind::Number => {
                let t = self.advance();
                let n: f64 = t
                    .lexeme()
                    .parse()
                    .map_err(|_| Syntax::new(t.span.clone(), "malformed number"))?;
                Ok(Spanned::new(Sexpr::Number(n), t.span))
            }
            TokenKind::String => {
                let t = self.advance();
                let lexeme = t.lexeme();
                let body = &lexeme[1..lexeme.len() - 1];
                Ok(Spanned::new(Sexpr::Str(body.to_string()), t.span))
            }
            TokenKind::True => {
                let t = self.advance();
                Ok(Spanned::new(Sexpr::Bool(true), t.span))
            }
            TokenKind::False => {
                let t = self.advance();
                Ok(Spanned::new(Sexpr::Bool(false), t.span))
            }
            TokenKind::Symbol => {
                let t = self.advance();
                Ok(Self::symbol_node(t, TokenKind::Symbol))
            }
            TokenKind::LParen => self.parse_parenthesized(),
            TokenKind::Fail => Err(Syntax::new(self.this.span.clone(), "unterminated string")),
            TokenKind::Eof => Err(Syntax::new(self.this.span.clone(), "unexpected end of input")),
            other if other.is_reserved() => Err(Syntax::new(
                self.this.span.clone(),
                "reserved word used where an expression was expected",
            )),
            _ => Err(Syntax::new(self.this.span.clone(), "expected an expression")),
        }
    }

    fn parse_parenthesized(&mut self) -> Result<Spanned<Sexpr>, Syntax> {
        let lp_tok = self.advance();
        let lp = lp_tok.span;
        match self.this.kind {
            TokenKind::Quote => self.parse_quote(lp),
            TokenKind::Lambda => self.parse_lambda(lp),
            TokenKind::Let => self.parse_let(lp),
            TokenKind::Begin => self.parse_begin(lp),
            TokenKind::If => self.parse_if(lp),
            TokenKind::Set => self.parse_set(lp),
            TokenKind::CallCc => self.parse_call_cc(lp),
            TokenKind::RParen => Err(Syntax::new(self.this.span.clone(), "empty form")),
            _ => self.parse_application(lp),
        }
    }

    fn parse_quote(&mut self, lp: Span) -> Result<Spanned<Sexpr>, Syntax> {
        let quote_tok = self.advance();
        let datum = self.parse_datum()?;
        let rp = self.expect(TokenKind::RParen, "expected ')' after quoted datum")?;

        let quote_sym = Self::symbol_node(quote_tok, TokenKind::Quote);
        let mut list = Self::build_list(vec![quote_sym, datum], rp.span.clone());
        list.span = Span::combine(&lp, &rp.span);
        Ok(list)
    }

    fn parse_datum(&mut self) -> Result<Spanned<Sexpr>, Syntax> {
        match self.this.kind {
            TokenKind::Number => {
                let t = self.advance();
                let n: f64 = t
                    .lexeme()
                    .parse()
                    .map_err(|_| Syntax::new(t.span.clone(), "malformed number"))?;
                Ok(Spanned::new(Sexpr::Number(n), t.span))
            }
            TokenKind::String => {
                let t = self.advance();
                let lexeme = t.lexeme();
                let body = &lexeme[1..lexeme.len() - 1];
                Ok(Spanned::new(Sexpr::Str(body.to_string()), t.span))
            }
            TokenKind::True => {
                let t = self.advance();
                Ok(Spanned::new(Sexpr::Bool(true), t.span))
            }
            TokenKind::False => {
                let t = self.advance();
                Ok(Spanned::new(Sexpr::Bool(false), t.span))
            }
            TokenKind::Symbol => {
                let t = self.advance();
                Ok(Self::symbol_node(t, TokenKind::Symbol))
            }
            // Reserved words are ordinary data inside a quoted datum.
            kind if kind.is_reserved() => {
                let t = self.advance();
                Ok(Self::symbol_node(t, kind))
            }
            TokenKind::LParen => self.parse_datum_list(),
            TokenKind::Fail => Err(Syntax::new(self.this.span.clone(), "unterminated string")),
            _ => Err(Syntax::new(self.this.span.clone(), "invalid quoted datum")),
        }
    }

    fn parse_datum_list(&mut self) -> Result<Spanned<Sexpr>, Syntax> {
        let lp_tok = self.advance();
        let mut items = Vec::new();
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Dot) && !self.check(TokenKind::Eof) {
            items.push(self.parse_datum()?);
        }

        if self.check(TokenKind::Dot) {
            self.advance();
            let tail = self.parse_datum()?;
            let rp = self.expect(TokenKind::RParen, "expected ')' after dotted datum")?;
            let mut list = items.into_iter().rev().fold(tail, |acc, item| {
                let span = Span::combine(&item.span, &acc.span);
                Spanned::new(Sexpr::Cons(Box::new(item), Box::new(acc)), span)
            });
            list.span = Span::combine(&lp_tok.span, &rp.span);
            Ok(list)
        } else {
            let rp = self.expect(TokenKind::RParen, "expected ')'")?;
            let mut list = Self::build_list(items, rp.span.clone());
            list.span = Span::combine(&lp_tok.span, &rp.span);
            Ok(list)
        }
    }

    fn parse_lambda(&mut self, lp: Span) -> Result<Spanned<Sexpr>, Syntax> {
        let lambda_tok = self.advance();
        let formals = self.parse_formals()?;
        let body = self.parse_body()?;
        let rp = self.expect(TokenKind::RParen, "expected ')' after lambda body")?;

        let lambda_sym = Self::symbol_node(lambda_tok, TokenKind::Lambda);
        let mut items = vec![lambda_sym, formals];
        items.extend(body);
        let mut list = Self::build_list(items, rp.span.clone());
        list.span = Span::combine(&lp, &rp.span);
        Ok(list)
    }

    /// `formals := symbol | "(" symbol* ")"`. No rest-parameter: a formal
    /// list is strictly fixed-arity.
    fn parse_formals(&mut self) -> Result<Spanned<Sexpr>, Syntax> {
        if self.check(TokenKind::Symbol) {
            let t = self.advance();
            return Ok(Self::symbol_node(t, TokenKind::Symbol));
        }
        let lp = self.expect(TokenKind::LParen, "expected a formal parameter list")?;
        let mut items = Vec::new();
        while !self.check(TokenKind::RParen) {
            let t = self.expect(TokenKind::Symbol, "formal parameters must be plain identifiers")?;
            items.push(Self::symbol_node(t, TokenKind::Symbol));
        }
        let rp = self.advance();
        let mut list = Self::build_list(items, rp.span.clone());
        list.span = Span::combine(&lp.span, &rp.span);
        Ok(list)
    }

    /// `body := definition* expression+`.
    fn parse_body(&mut self) -> Result<Vec<Spanned<Sexpr>>, Syntax> {
        let mut forms = Vec::new();
        while self.check(TokenKind::LParen) && self.lookahead.kind == TokenKind::Define {
            forms.push(self.parse_definition()?);
        }
        if self.check(TokenKind::RParen) || self.check(TokenKind::Eof) {
            return Err(Syntax::new(self.this.span.clone(), "expected at least one expression in body"));
        }
        forms.push(self.parse_expression()?);
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            forms.push(self.parse_expression()?);
        }
        Ok(forms)
    }

    fn parse_let(&mut self, lp: Span) -> Result<Spanned<Sexpr>, Syntax> {
        let let_tok = self.advance();
        let bindings = self.parse_bindings()?;
        let body = self.parse_body()?;
        let rp = self.expect(TokenKind::RParen, "expected ')' after let body")?;

        let let_sym = Self::symbol_node(let_tok, TokenKind::Let);
        let mut items = vec![let_sym, bindings];
        items.extend(body);
        let mut list = Self::build_list(items, rp.span.clone());
        list.span = Span::combine(&lp, &rp.span);
        Ok(list)
    }

    fn parse_bindings(&mut self) -> Result<Spanned<Sexpr>, Syntax> {
        let lp = self.expect(TokenKind::LParen, "expected '(' to start a binding list")?;
        let mut items = Vec::new();
        while !self.check(TokenKind::RParen) {
            items.push(self.parse_binding()?);
        }
        let rp = self.advance();
        let mut list = Self::build_list(items, rp.span.clone());
        list.span = Span::combine(&lp.span, &rp.span);
        Ok(list)
    }

    fn parse_binding(&mut self) -> Result<Spanned<Sexpr>, Syntax> {
        let lp = self.expect(TokenKind::LParen, "expected '(' to start a binding")?;
        let name_tok = self.expect(TokenKind::Symbol, "binding name must be a plain identifier")?;
        let value = self.parse_expression()?;
        let rp = self.expect(TokenKind::RParen, "expected ')' after binding")?;

        let name = Self::symbol_node(name_tok, TokenKind::Symbol);
        let mut list = Self::build_list(vec![name, value], rp.span.clone());
        list.span = Span::combine(&lp.span, &rp.span);
        Ok(list)
    }

    fn parse_begin(&mut self, lp: Span) -> Result<Spanned<Sexpr>, Syntax> {
        let begin_tok = self.advance();
        if self.check(TokenKind::RParen) {
            return Err(Syntax::new(self.this.span.clone(), "begin requires at least one expression"));
        }
        let mut items = vec![Self::symbol_node(begin_tok, TokenKind::Begin)];
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            items.push(self.parse_expression()?);
        }
        let rp = self.expect(TokenKind::RParen, "expected ')' after begin")?;
        let mut list = Self::build_list(items, rp.span.clone());
        list.span = Span::combine(&lp, &rp.span);
        Ok(list)
    }

    fn parse_if(&mut self, lp: Span) -> Result<Spanned<Sexpr>, Syntax> {
        let if_tok = self.advance();
        let cond = self.parse_expression()?;
        let then_branch = self.parse_expression()?;
        let else_branch = self.parse_expression()?;
        let rp = self.expect(TokenKind::RParen, "expected ')' after if")?;

        let if_sym = Self::symbol_node(if_tok, TokenKind::If);
        let mut list = Self::build_list(vec![if_sym, cond, then_branch, else_branch], rp.span.clone());
        list.span = Span::combine(&lp, &rp.span);
        Ok(list)
    }

    fn parse_set(&mut self, lp: Span) -> Result<Spanned<Sexpr>, Syntax> {
        let set_tok = self.advance();
        let name_tok = self.expect(TokenKind::Symbol, "set! target must be a plain identifier")?;
        let value = self.parse_expression()?;
        let rp = self.expect(TokenKind::RParen, "expected ')' after set!")?;

        let set_sym = Self::symbol_node(set_tok, TokenKind::Set);
        let name = Self::symbol_node(name_tok, TokenKind::Symbol);
        let mut list = Self::build_list(vec![set_sym, name, value], rp.span.clone());
        list.span = Span::combine(&lp, &rp.span);
        Ok(list)
    }

    fn parse_call_cc(&mut self, lp: Span) -> Result<Spanned<Sexpr>, Syntax> {
        let cc_tok = self.advance();
        let arg = self.parse_expression()?;
        let rp = self.expect(TokenKind::RParen, "expected ')' after call/cc")?;

        let cc_sym = Self::symbol_node(cc_tok, TokenKind::CallCc);
        let mut list = Self::build_list(vec![cc_sym, arg], rp.span.clone());
        list.span = Span::combine(&lp, &rp.span);
        Ok(list)
    }

    fn parse_application(&mut self, lp: Span) -> Result<Spanned<Sexpr>, Syntax> {
        let callee = self.parse_expression()?;
        let mut items = vec![callee];
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            items.push(self.parse_expression()?);
        }
        let rp = self.expect(TokenKind::RParen, "expected ')' after application")?;
        let mut list = Self::build_list(items, rp.span.clone());
        list.span = Span::combine(&lp, &rp.span);
        Ok(list)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_one(src: &str) -> Result<Spanned<Sexpr>, Syntax> {
        let source = Rc::new(Source::source(src));
        let mut parser = Parser::new(source);
        match parser.parse_form() {
            ParseOutcome::Form(form) => Ok(form),
            ParseOutcome::Err(e) => Err(e),
            ParseOutcome::Eof => panic!("expected a form, got eof"),
        }
    }

    // P1: re-serializing a parsed form and reparsing it yields a
    // structurally equal tree.
    #[test]
    fn round_trips_through_display() {
        for src in [
            "(+ 1 2)",
            "(lambda (x y) (+ x y))",
            "(let ((x 1) (y 2)) (+ x y))",
            "(if #t 1 2)",
            "(quote (a b c))",
            "(begin 1 2 3)",
        ] {
            let first = parse_one(src).unwrap();
            let rendered = first.item.to_string();
            let second = parse_one(&rendered).unwrap();
            assert_eq!(first.item, second.item, "mismatch reparsing {:?}", rendered);
        }
    }

    // P2: a dotted datum keeps a non-list cdr, rather than being coerced
    // into a proper list.
    #[test]
    fn quoted_dotted_pair_keeps_improper_cdr() {
        let form = parse_one("(quote (1 . 2))").unwrap();
        let (_, cdr) = form.item.as_cons().unwrap();
        let (_, quoted) = cdr.item.as_cons().unwrap();
        let (car, cdr) = quoted.item.as_cons().unwrap();
        assert_eq!(car.item, Sexpr::Number(1.0));
        assert_eq!(cdr.item, Sexpr::Number(2.0));
    }

    #[test]
    fn quote_of_plain_list_is_proper() {
        let form = parse_one("(quote (1 2 3))").unwrap();
        let (_, cdr) = form.item.as_cons().unwrap();
        let (_, quoted) = cdr.item.as_cons().unwrap();
        let elements = quoted.item.elements();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[2].item, Sexpr::Number(3.0));
    }

    // P3: grammar violations are reported at the precise offending token.
    #[test]
    fn set_target_must_be_a_symbol() {
        let err = parse_one("(set! #t 1)").unwrap_err();
        assert_eq!(err.span.lexeme(), "#t");
    }

    #[test]
    fn lambda_formal_must_be_a_symbol() {
        let err = parse_one("(lambda (1) x)").unwrap_err();
        assert_eq!(err.span.lexeme(), "1");
    }

    #[test]
    fn call_cc_takes_exactly_one_argument() {
        let err = parse_one("(call/cc x y)").unwrap_err();
        assert_eq!(err.span.lexeme(), "y");
    }

    #[test]
    fn reserved_word_rejected_as_bare_expression() {
        let err = parse_one("lambda").unwrap_err();
        assert_eq!(err.span.lexeme(), "lambda");
    }

    #[test]
    fn definition_after_body_start_is_rejected() {
        let err = parse_one("(lambda () 1 (define x 2))").unwrap_err();
        assert_eq!(err.span.lexeme(), "define");
    }

    #[test]
    fn eof_after_last_form() {
        let source = Rc::new(Source::source("1"));
        let mut parser = Parser::new(source);
        assert!(matches!(parser.parse_form(), ParseOutcome::Form(_)));
        assert!(matches!(parser.parse_form(), ParseOutcome::Eof));
    }
}
