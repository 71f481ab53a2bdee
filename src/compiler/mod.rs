//! Lowers one parsed form into a `Function` object on the heap: resolves
//! lexical scope, synthesizes closure upvalues, classifies tail positions,
//! and reifies `quote`d data directly into heap objects.
//!
//! `let` is not its own bytecode shape — it desugars into an immediately
//! invoked lambda (`((lambda (x y) body...) v1 v2)`), which gets scope exit,
//! upvalue closing, and tail-call eligibility for free from the machinery
//! that already exists for ordinary calls, rather than needing a bespoke
//! "discard N locals but keep the result on top" instruction sequence.

pub mod environment;

use crate::common::error::CompileError;
use crate::common::opcode::Opcode;
use crate::common::span::{Span, Spanned};
use crate::common::symbol_table::SymbolTable;
use crate::common::value::Value;
use crate::object::{Heap, Obj, ObjRef};
use crate::parser::Sexpr;
use crate::scanner::TokenKind;

use environment::Environment;

enum Resolved {
    Local(u8),
    Upvalue(u8),
}

/// Lowers forms into bytecode against a borrowed `Heap` and global
/// `SymbolTable`, both owned by the `VM` across the lifetime of many
/// separate `compile_top_level` calls — one per form the driver reads.
struct Compiler<'h> {
    heap: &'h mut Heap,
    globals: &'h mut SymbolTable,
    /// Parallel to `envs`: `funcs[i]` is the `Function` object `envs[i]` is
    /// building. Innermost (currently being emitted into) is last.
    funcs: Vec<ObjRef>,
    envs: Vec<Environment>,
    errors: Vec<CompileError>,
}

impl<'h> Compiler<'h> {
    /// Compiles a single top-level form into a zero-arity script `Function`.
    /// The VM wraps the result in a no-upvalue `Closure` before calling it.
    pub fn compile_top_level(
        form: &Spanned<Sexpr>,
        heap: &'h mut Heap,
        globals: &'h mut SymbolTable,
    ) -> Result<ObjRef, Vec<CompileError>> {
        let function = heap.new_function(0);
        let mut compiler =
            Compiler { heap, globals, funcs: vec![function], envs: vec![Environment::new()], errors: Vec::new() };

        // Slot 0 is reserved for the script's own closure, at scope depth 0
        // — top-level `define` stays classified as global, unlike a
        // lambda's body which bumps the depth before declaring anything.
        let _ = compiler.current_env_mut().declare_local("");
        compiler.current_env_mut().mark_initialized();

        let line = form.span.line as i32;
        if Self::is_definition_form(form) {
            compiler.compile_definition(form);
        } else {
            compiler.compile_expression(form, false);
        }
        compiler.emit_op(Opcode::Return, line);
        compiler.trace_disassemble(function, "<script>");

        if compiler.errors.is_empty() {
            Ok(function)
        } else {
            Err(compiler.errors)
        }
    }

    /// Logs a full disassembly of `function`'s chunk at trace level, the way
    /// a `clox`-style compiler dumps its output under a debug flag.
    fn trace_disassemble(&self, function: ObjRef, label: &str) {
        if log::log_enabled!(log::Level::Trace) {
            let Obj::Function(f) = self.heap.get(function) else { unreachable!() };
            log::trace!("\n{}", f.chunk.disassemble(label, self.heap));
        }
    }

    fn current_env(&self) -> &Environment {
        self.envs.last().expect("compiler always has a current environment")
    }

    fn current_env_mut(&mut self) -> &mut Environment {
        self.envs.last_mut().expect("compiler always has a current environment")
    }

    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.errors.push(CompileError::new(span, message));
    }

    // --- emission -----------------------------------------------------

    fn emit_byte(&mut self, byte: u8, line: i32) {
        let function = *self.funcs.last().expect("compiler always has a current function");
        let Obj::Function(f) = self.heap.get_mut(function) else {
            unreachable!("funcs stack only ever holds Function objects")
        };
        f.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: Opcode, line: i32) {
        log::trace!("compiler: emit {:?} (line {})", op, line);
        self.emit_byte(op as u8, line);
    }

    fn emit_u16(&mut self, value: u16, line: i32) {
        self.emit_byte((value >> 8) as u8, line);
        self.emit_byte(value as u8, line);
    }

    fn emit_u16_placeholder(&mut self, line: i32) -> usize {
        let function = *self.funcs.last().unwrap();
        let Obj::Function(f) = self.heap.get_mut(function) else { unreachable!() };
        let at = f.chunk.code.len();
        f.chunk.write(0xff, line);
        f.chunk.write(0xff, line);
        at
    }

    /// Patches a two-byte placeholder written by `emit_u16_placeholder` with
    /// the distance from just past it to the current end of the chunk.
    fn patch_jump(&mut self, at: usize) {
        let function = *self.funcs.last().unwrap();
        let Obj::Function(f) = self.heap.get_mut(function) else { unreachable!() };
        let jump = f.chunk.code.len() - at - 2;
        f.chunk.patch_u16(at, jump.min(u16::MAX as usize) as u16);
    }

    fn emit_constant(&mut self, value: Value, span: &Span) {
        let line = span.line as i32;
        let function = *self.funcs.last().unwrap();
        let idx = {
            let Obj::Function(f) = self.heap.get_mut(function) else { unreachable!() };
            f.chunk.add_constant(value)
        };
        match idx {
            Some(idx) => {
                self.emit_op(Opcode::Constant, line);
                self.emit_byte(idx, line);
            }
            None => self.error(span.clone(), "too many constants in one chunk (max 256)"),
        }
    }

    fn begin_scope(&mut self) {
        self.current_env_mut().scope_depth += 1;
        log::debug!("compiler: scope push (depth {})", self.current_env().scope_depth);
    }

    fn end_scope(&mut self) {
        log::debug!("compiler: scope pop (depth {})", self.current_env().scope_depth);
        self.current_env_mut().scope_depth -= 1;
    }

    // --- variable resolution --------------------------------------------

    /// Resolves `name` starting from environment `env_index`, recursing
    /// toward the outermost (index 0) environment. A hit in an enclosing
    /// environment is threaded back in as an upvalue at every level between
    /// there and `env_index`, marking the originating local captured.
    fn resolve(&mut self, env_index: usize, name: &str) -> Result<Option<Resolved>, &'static str> {
        if let Some(slot) = self.envs[env_index].resolve_local(name)? {
            return Ok(Some(Resolved::Local(slot)));
        }
        if env_index == 0 {
            return Ok(None);
        }
        match self.resolve(env_index - 1, name)? {
            Some(Resolved::Local(slot)) => {
                self.envs[env_index - 1].locals[slot as usize].is_captured = true;
                let up = self.envs[env_index].add_upvalue(slot, true)?;
                Ok(Some(Resolved::Upvalue(up)))
            }
            Some(Resolved::Upvalue(slot)) => {
                let up = self.envs[env_index].add_upvalue(slot, false)?;
                Ok(Some(Resolved::Upvalue(up)))
            }
            None => Ok(None),
        }
    }

    fn compile_variable_get(&mut self, name: &str, span: &Span) {
        let line = span.line as i32;
        let top = self.envs.len() - 1;
        match self.resolve(top, name) {
            Ok(Some(Resolved::Local(slot))) => {
                self.emit_op(Opcode::GetLocal, line);
                self.emit_byte(slot, line);
            }
            Ok(Some(Resolved::Upvalue(slot))) => {
                self.emit_op(Opcode::GetUpvalue, line);
                self.emit_byte(slot, line);
            }
            Ok(None) => {
                // Not a local or upvalue — falls through to the global
                // table, which declares the slot on first reference rather
                // than requiring it to already exist. This is what lets a
                // top-level `define` refer to a sibling `define` compiled
                // later (mutual recursion): the slot exists at compile
                // time, its value just isn't there yet until that later
                // form runs, which `SymbolTable::get` surfaces as a runtime
                // "undefined variable" error if it's ever read too soon.
                let slot = match self.globals.declare(name) {
                    Ok(s) => s,
                    Err(msg) => {
                        self.error(span.clone(), msg);
                        0
                    }
                };
                self.emit_op(Opcode::GetGlobal, line);
                self.emit_u16(slot, line);
            }
            Err(msg) => self.error(span.clone(), msg),
        }
    }

    fn compile_variable_set(&mut self, name: &str, span: &Span, line: i32) {
        let top = self.envs.len() - 1;
        match self.resolve(top, name) {
            Ok(Some(Resolved::Local(slot))) => {
                self.emit_op(Opcode::SetLocal, line);
                self.emit_byte(slot, line);
            }
            Ok(Some(Resolved::Upvalue(slot))) => {
                self.emit_op(Opcode::SetUpvalue, line);
                self.emit_byte(slot, line);
            }
            Ok(None) => {
                let slot = match self.globals.declare(name) {
                    Ok(s) => s,
                    Err(msg) => {
                        self.error(span.clone(), msg);
                        0
                    }
                };
                self.emit_op(Opcode::SetGlobal, line);
                self.emit_u16(slot, line);
            }
            Err(msg) => self.error(span.clone(), msg),
        }
    }

    // --- forms -----------------------------------------------------------

    fn is_definition_form(form: &Spanned<Sexpr>) -> bool {
        matches!(
            form.item.as_cons(),
            Some((car, _)) if matches!(car.item.as_symbol(), Some((_, TokenKind::Define)))
        )
    }

    fn compile_definition(&mut self, form: &Spanned<Sexpr>) {
        let elements = form.item.elements();
        let (name, _) = elements[1].item.as_symbol().expect("parser guarantees a symbol");
        let name = name.to_string();
        let name_span = elements[1].span.clone();
        let value = elements[2];
        let line = form.span.line as i32;

        if self.current_env().scope_depth == 0 {
            let slot = match self.globals.declare(&name) {
                Ok(s) => s,
                Err(msg) => {
                    self.error(form.span.clone(), msg);
                    0
                }
            };
            self.compile_named_value(value, &name, false);
            self.emit_op(Opcode::SetGlobal, line);
            self.emit_u16(slot, line);
        } else {
            if let Err(msg) = self.current_env_mut().declare_local(&name) {
                self.error(name_span, msg);
            }
            self.compile_named_value(value, &name, false);
            self.current_env_mut().mark_initialized();
        }
    }

    /// Compiles `value`, naming the resulting `Function` after `name` when
    /// `value` is itself a bare `lambda` — purely cosmetic, it only affects
    /// how that procedure is rendered in a stack trace.
    fn compile_named_value(&mut self, value: &Spanned<Sexpr>, name: &str, tail: bool) {
        if let Some((car, _)) = value.item.as_cons() {
            if matches!(car.item.as_symbol(), Some((_, TokenKind::Lambda))) {
                self.compile_lambda(value, Some(name));
                return;
            }
        }
        self.compile_expression(value, tail);
    }

    fn compile_expression(&mut self, form: &Spanned<Sexpr>, tail: bool) {
        let line = form.span.line as i32;
        match &form.item {
            Sexpr::Number(n) => self.emit_constant(Value::Number(*n), &form.span),
            Sexpr::Bool(true) => self.emit_op(Opcode::True, line),
            Sexpr::Bool(false) => self.emit_op(Opcode::False, line),
            Sexpr::Str(s) => {
                let r = self.heap.intern_string(s);
                self.emit_constant(Value::Obj(r), &form.span);
            }
            Sexpr::Null => self.emit_op(Opcode::Null, line),
            Sexpr::Symbol { name, kind } => {
                if kind.is_reserved() {
                    self.error(form.span.clone(), "reserved word used where an expression was expected");
                } else {
                    self.compile_variable_get(name, &form.span);
                }
            }
            Sexpr::Cons(car, _) => {
                let head = car.item.as_symbol().map(|(_, k)| k);
                match head {
                    Some(TokenKind::Quote) => self.compile_quote(form),
                    Some(TokenKind::Lambda) => {
                        self.compile_lambda(form, None);
                    }
                    Some(TokenKind::Let) => self.compile_let(form, tail),
                    Some(TokenKind::Begin) => self.compile_begin(form, tail),
                    Some(TokenKind::If) => self.compile_if(form, tail),
                    Some(TokenKind::Set) => self.compile_set(form),
                    Some(TokenKind::CallCc) => self.compile_call_cc(form),
                    _ => self.compile_application(form, tail),
                }
            }
        }
    }

    /// `definition* expression+`, already split by the parser. Leading
    /// definitions never appear in tail position; only the final expression
    /// inherits `final_tail` (true for a lambda body, false for `let`'s,
    /// per spec: tail propagates into a lambda body's result but not a
    /// `let`'s).
    fn compile_body(&mut self, forms: &[&Spanned<Sexpr>], final_tail: bool) {
        let mut i = 0;
        while i < forms.len() && Self::is_definition_form(forms[i]) {
            self.compile_definition(forms[i]);
            i += 1;
        }
        let exprs = &forms[i..];
        let last = exprs.len().saturating_sub(1);
        for (j, form) in exprs.iter().copied().enumerate() {
            let is_last = j == last;
            let tail = is_last && final_tail;
            self.compile_expression(form, tail);
            if !is_last {
                self.emit_op(Opcode::Pop, form.span.line as i32);
            }
        }
    }

    fn compile_quote(&mut self, form: &Spanned<Sexpr>) {
        let elements = form.item.elements();
        let value = self.reify(elements[1]);
        self.emit_constant(value, &form.span);
    }

    /// Turns a parsed `datum` directly into heap objects (and `Value`
    /// atoms), exactly the representation it would have if read back at
    /// runtime — `quote` doesn't defer to any bytecode beyond pushing this
    /// one reified constant.
    fn reify(&mut self, datum: &Spanned<Sexpr>) -> Value {
        match &datum.item {
            Sexpr::Number(n) => Value::Number(*n),
            Sexpr::Bool(b) => Value::Bool(*b),
            Sexpr::Null => Value::Null,
            Sexpr::Str(s) => Value::Obj(self.heap.intern_string(s)),
            Sexpr::Symbol { name, kind } => {
                Value::Obj(self.heap.new_symbol(name, *kind, datum.span.line as i32, datum.span.column as i32))
            }
            Sexpr::Cons(car, cdr) => {
                let car_v = self.reify(car);
                let cdr_v = self.reify(cdr);
                Value::Obj(self.heap.new_cons(car_v, cdr_v))
            }
        }
    }

    fn formal_names(formals: &Spanned<Sexpr>) -> Vec<(String, Span)> {
        match &formals.item {
            Sexpr::Symbol { name, .. } => vec![(name.clone(), formals.span.clone())],
            Sexpr::Null => Vec::new(),
            Sexpr::Cons(..) => formals
                .item
                .elements()
                .into_iter()
                .map(|e| {
                    let (name, _) = e.item.as_symbol().expect("parser guarantees formals are plain symbols");
                    (name.to_string(), e.span.clone())
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn compile_lambda(&mut self, form: &Spanned<Sexpr>, def_name: Option<&str>) -> ObjRef {
        let elements = form.item.elements();
        let formals = elements[1];
        let body = &elements[2..];

        let params = Self::formal_names(formals);
        if params.len() > 255 {
            self.error(form.span.clone(), "lambda has too many formal parameters (max 255)");
        }
        self.compile_function_body(&params, body, def_name, &form.span)
    }

    /// `let` desugars to an immediately invoked lambda: `((lambda (names)
    /// body) values...)`. Binding values are compiled against the
    /// *enclosing* environment (so one binding can't see its siblings), the
    /// call is tail-eligible exactly like any other application, and scope
    /// exit — including closing any captured bindings — is just `OP_RETURN`
    /// doing what it always does.
    fn compile_let(&mut self, form: &Spanned<Sexpr>, tail: bool) {
        let elements = form.item.elements();
        let bindings_list = elements[1];
        let body = &elements[2..];
        let line = form.span.line as i32;

        let bindings: Vec<(String, Span, &Spanned<Sexpr>)> = bindings_list
            .item
            .elements()
            .into_iter()
            .map(|b| {
                let pair = b.item.elements();
                let (name, _) = pair[0].item.as_symbol().expect("parser guarantees a symbol");
                (name.to_string(), pair[0].span.clone(), pair[1])
            })
            .collect();

        if bindings.len() > 255 {
            self.error(form.span.clone(), "let has too many bindings (max 255)");
        }

        let params: Vec<(String, Span)> = bindings.iter().map(|(n, s, _)| (n.clone(), s.clone())).collect();
        self.compile_function_body(&params, body, None, &form.span);

        for (_, _, value) in &bindings {
            self.compile_expression(*value, false);
        }

        let argc = bindings.len().min(255) as u8;
        self.emit_op(if tail { Opcode::TailCall } else { Opcode::Call }, line);
        self.emit_byte(argc, line);
    }

    /// Shared by `lambda` and `let`'s desugaring: pushes a fresh
    /// environment, declares `params` as locals, compiles `body`, and emits
    /// the `OP_CLOSURE` construction in the *enclosing* chunk.
    fn compile_function_body(
        &mut self,
        params: &[(String, Span)],
        body: &[&Spanned<Sexpr>],
        def_name: Option<&str>,
        span: &Span,
    ) -> ObjRef {
        let line = span.line as i32;
        let arity = params.len().min(255) as u8;

        let function = self.heap.new_function(arity);
        if let Some(name) = def_name {
            let name_ref = self.heap.intern_string(name);
            if let Obj::Function(f) = self.heap.get_mut(function) {
                f.name = Some(name_ref);
            }
        }

        self.funcs.push(function);
        self.envs.push(Environment::new());
        self.begin_scope();
        let _ = self.current_env_mut().declare_local("");
        self.current_env_mut().mark_initialized();

        for (name, pspan) in params {
            if let Err(msg) = self.current_env_mut().declare_local(name) {
                self.error(pspan.clone(), msg);
            }
            self.current_env_mut().mark_initialized();
        }

        self.compile_body(body, true);
        self.emit_op(Opcode::Return, line);
        self.end_scope();

        let env = self.envs.pop().expect("pushed just above");
        self.funcs.pop();
        if let Obj::Function(f) = self.heap.get_mut(function) {
            f.upvalue_count = env.upvalues.len() as u8;
        }

        self.trace_disassemble(function, def_name.unwrap_or("<lambda>"));

        let idx = {
            let outer = *self.funcs.last().expect("the script environment always remains");
            let Obj::Function(f) = self.heap.get_mut(outer) else { unreachable!() };
            f.chunk.add_constant(Value::Obj(function))
        };
        match idx {
            Some(idx) => {
                self.emit_op(Opcode::Closure, line);
                self.emit_byte(idx, line);
                for up in &env.upvalues {
                    self.emit_byte(up.is_local as u8, line);
                    self.emit_byte(up.index, line);
                }
            }
            None => self.error(span.clone(), "too many constants in one chunk (max 256)"),
        }

        function
    }

    fn compile_begin(&mut self, form: &Spanned<Sexpr>, tail: bool) {
        let elements = form.item.elements();
        let exprs = &elements[1..];
        let last = exprs.len().saturating_sub(1);
        for (i, e) in exprs.iter().copied().enumerate() {
            let t = i == last && tail;
            self.compile_expression(e, t);
            if i != last {
                self.emit_op(Opcode::Pop, e.span.line as i32);
            }
        }
    }

    fn compile_if(&mut self, form: &Spanned<Sexpr>, tail: bool) {
        let elements = form.item.elements();
        let (cond, then_branch, else_branch) = (elements[1], elements[2], elements[3]);
        let line = form.span.line as i32;

        self.compile_expression(cond, false);
        self.emit_op(Opcode::JumpIfFalse, line);
        let then_jump = self.emit_u16_placeholder(line);
        self.emit_op(Opcode::Pop, line);
        self.compile_expression(then_branch, tail);
        self.emit_op(Opcode::Jump, line);
        let else_jump = self.emit_u16_placeholder(line);
        self.patch_jump(then_jump);
        self.emit_op(Opcode::Pop, line);
        self.compile_expression(else_branch, tail);
        self.patch_jump(else_jump);
    }

    fn compile_set(&mut self, form: &Spanned<Sexpr>) {
        let elements = form.item.elements();
        let (name, _) = elements[1].item.as_symbol().expect("parser guarantees a symbol");
        let name = name.to_string();
        let name_span = elements[1].span.clone();
        let value = elements[2];
        let line = form.span.line as i32;

        self.compile_expression(value, false);
        self.compile_variable_set(&name, &name_span, line);
    }

    fn compile_call_cc(&mut self, form: &Spanned<Sexpr>) {
        let elements = form.item.elements();
        let line = form.span.line as i32;
        self.compile_expression(elements[1], false);
        self.emit_op(Opcode::Continuation, line);
        self.emit_op(Opcode::Call, line);
        self.emit_byte(1, line);
    }

    fn compile_application(&mut self, form: &Spanned<Sexpr>, tail: bool) {
        let elements = form.item.elements();
        let line = form.span.line as i32;
        self.compile_expression(elements[0], false);
        for arg in elements[1..].iter().copied() {
            self.compile_expression(arg, false);
        }
        let argc = elements.len() - 1;
        if argc > 255 {
            self.error(form.span.clone(), "too many arguments in application (max 255)");
        }
        self.emit_op(if tail { Opcode::TailCall } else { Opcode::Call }, line);
        self.emit_byte(argc.min(255) as u8, line);
    }
}

/// Compiles one top-level form. The public entry point the VM's driver
/// calls once per form it reads.
pub fn compile(form: &Spanned<Sexpr>, heap: &mut Heap, globals: &mut SymbolTable) -> Result<ObjRef, Vec<CompileError>> {
    Compiler::compile_top_level(form, heap, globals)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::source::Source;
    use crate::parser::{ParseOutcome, Parser};
    use std::rc::Rc;

    fn compile_src(src: &str) -> (ObjRef, Heap, SymbolTable) {
        let source = Rc::new(Source::source(src));
        let mut parser = Parser::new(source);
        let form = match parser.parse_form() {
            ParseOutcome::Form(f) => f,
            _ => panic!("expected a form"),
        };
        let mut heap = Heap::new();
        let mut globals = SymbolTable::new();
        let result = compile(&form, &mut heap, &mut globals);
        let function = result.unwrap_or_else(|errors| panic!("compile errors: {:?}", errors));
        (function, heap, globals)
    }

    fn function_of<'a>(heap: &'a Heap, r: ObjRef) -> &'a crate::object::Function {
        let Obj::Function(f) = heap.get(r) else { panic!("not a function") };
        f
    }

    fn nested_function(heap: &Heap, parent: ObjRef) -> ObjRef {
        let f = function_of(heap, parent);
        f.chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Obj(r) if matches!(heap.get(*r), Obj::Function(_)) => Some(*r),
                _ => None,
            })
            .expect("expected a nested Function constant")
    }

    // C1: a call in tail position compiles to TAIL_CALL; the same call used
    // as an argument (non-tail) compiles to CALL.
    #[test]
    fn tail_call_vs_plain_call() {
        let (script, heap, _globals) = compile_src("(lambda () (+ 1 (foo)))");
        let lambda = nested_function(&heap, script);
        let code = &function_of(&heap, lambda).chunk.code;
        assert!(code.contains(&(Opcode::TailCall as u8)), "outer application should be a tail call");
        assert!(code.contains(&(Opcode::Call as u8)), "argument application should be a plain call");
    }

    #[test]
    fn non_tail_lambda_body_still_uses_plain_call_for_non_final_statement() {
        let (script, heap, _globals) = compile_src("(lambda () (foo) (bar))");
        let lambda = nested_function(&heap, script);
        let code = &function_of(&heap, lambda).chunk.code;
        // (foo) is non-final -> CALL; (bar) is final -> TAIL_CALL.
        assert!(code.contains(&(Opcode::Call as u8)));
        assert!(code.contains(&(Opcode::TailCall as u8)));
    }

    // C2: a lambda nested one level deep inside another captures the
    // enclosing local as an upvalue, marking it captured.
    #[test]
    fn single_level_upvalue_capture() {
        let (script, heap, _globals) = compile_src("(lambda (x) (lambda () x))");
        let outer = nested_function(&heap, script);
        let inner = nested_function(&heap, outer);
        assert_eq!(function_of(&heap, inner).upvalue_count, 1);
    }

    // C3: a doubly-nested lambda captures through two levels: the innermost
    // function's upvalue is itself sourced from the middle function's
    // upvalue, not directly from the outer local.
    #[test]
    fn doubly_nested_upvalue_capture() {
        let (script, heap, _globals) = compile_src("(lambda (x) (lambda () (lambda () x)))");
        let outer = nested_function(&heap, script);
        let middle = nested_function(&heap, outer);
        let inner = nested_function(&heap, middle);
        assert_eq!(function_of(&heap, middle).upvalue_count, 1);
        assert_eq!(function_of(&heap, inner).upvalue_count, 1);
    }

    #[test]
    fn let_desugars_to_an_immediately_invoked_call() {
        let (script, heap, _globals) = compile_src("(let ((x 1) (y 2)) (+ x y))");
        let code = &function_of(&heap, script).chunk.code;
        assert!(code.contains(&(Opcode::Closure as u8)));
        assert!(code.contains(&(Opcode::Call as u8)) || code.contains(&(Opcode::TailCall as u8)));
    }

    #[test]
    fn top_level_define_uses_global_slot() {
        let (script, heap, globals) = compile_src("(define x 5)");
        let code = &function_of(&heap, script).chunk.code;
        assert!(code.contains(&(Opcode::SetGlobal as u8)));
        assert_eq!(globals.resolve("x"), Some(0));
    }

    #[test]
    fn mutual_recursion_resolves_forward_global_reference() {
        // Compiling a reference to a global not yet `define`d must not be a
        // compile error — it declares the slot, deferring the "is it
        // actually defined" check to runtime.
        let (_script, _heap, globals) = compile_src("(lambda () (not-yet-defined))");
        assert!(globals.resolve("not-yet-defined").is_some());
    }

    #[test]
    fn quote_reifies_into_heap_cons_cells() {
        let (script, heap, _globals) = compile_src("(quote (1 2 3))");
        let f = function_of(&heap, script);
        let constant = f.chunk.constants.iter().find(|c| matches!(c, Value::Obj(_))).unwrap();
        let Value::Obj(r) = constant else { unreachable!() };
        assert!(matches!(heap.get(*r), Obj::Cons(_)));
    }
}
