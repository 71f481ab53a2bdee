use std::fmt;

use crate::common::span::Span;

/// A scan or parse failure. Carries the location and lexeme that triggered
/// it, formatted the way the original interpreter reports syntax errors:
/// `[line:col] at '<lexeme>': <message>`.
#[derive(Debug, Clone)]
pub struct Syntax {
    pub span: Span,
    pub message: String,
}

impl Syntax {
    pub fn new(span: Span, message: impl Into<String>) -> Syntax {
        Syntax { span, message: message.into() }
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lexeme = self.span.lexeme();
        if lexeme.is_empty() {
            write!(f, "[{}] at end: {}", self.span, self.message)
        } else {
            write!(f, "[{}] at '{}': {}", self.span, lexeme, self.message)
        }
    }
}

impl std::error::Error for Syntax {}

/// A compile-time failure: a form that scanned and parsed fine but could not
/// be lowered to bytecode (unresolved variable, too many locals, etc). A
/// single top-level form may accumulate more than one of these before
/// compilation is abandoned.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub span: Span,
    pub message: String,
}

impl CompileError {
    pub fn new(span: Span, message: impl Into<String>) -> CompileError {
        CompileError { span, message: message.into() }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] compile error: {}", self.span, self.message)
    }
}

impl std::error::Error for CompileError {}

/// One activation record in a runtime stack trace.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub function_id: u64,
    pub function_name: Option<String>,
    pub line: i32,
}

impl fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function_name {
            Some(name) => write!(f, "[line {}] in {}", self.line, name),
            None => write!(f, "[line {}] in #<procedure {}>", self.line, self.function_id),
        }
    }
}

/// A runtime failure, synthesized from the call frames live at the moment
/// the VM's dispatch loop hit a fault (arity mismatch, applying a
/// non-procedure, primitive type error, stack overflow, ...).
#[derive(Debug, Clone)]
pub struct Trace {
    pub message: String,
    pub frames: Vec<FrameInfo>,
}

impl Trace {
    pub fn new(message: impl Into<String>, frames: Vec<FrameInfo>) -> Trace {
        Trace { message: message.into(), frames }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for frame in self.frames.iter().rev() {
            writeln!(f, "{}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for Trace {}

/// The three failure strata `interpret` can return, unified so callers (the
/// CLI, the REPL, tests) can match on one type instead of threading three
/// separate `Result`s through the pipeline.
#[derive(Debug, Clone)]
pub enum LisbError {
    Syntax(Syntax),
    Compile(Vec<CompileError>),
    Runtime(Trace),
}

impl fmt::Display for LisbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LisbError::Syntax(s) => write!(f, "{}", s),
            LisbError::Compile(errors) => {
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
            LisbError::Runtime(t) => write!(f, "{}", t),
        }
    }
}

impl std::error::Error for LisbError {}

impl From<Syntax> for LisbError {
    fn from(s: Syntax) -> LisbError {
        LisbError::Syntax(s)
    }
}

impl From<Vec<CompileError>> for LisbError {
    fn from(errors: Vec<CompileError>) -> LisbError {
        LisbError::Compile(errors)
    }
}

impl From<Trace> for LisbError {
    fn from(t: Trace) -> LisbError {
        LisbError::Runtime(t)
    }
}
