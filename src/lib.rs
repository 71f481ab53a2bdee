//! `lisb`: a small Scheme-like language compiled to bytecode and run on a
//! stack VM with closures, proper tail calls, first-class continuations,
//! and a precise mark-sweep collector.
//!
//! ```text
//! source text -> Scanner -> Parser -> Compiler -> Function (bytecode)
//!                                                      |
//!                                                      v
//!                                                 VM (stack machine)
//! ```

pub mod common;
pub mod compiler;
pub mod object;
pub mod parser;
pub mod scanner;
pub mod vm;

pub use common::error::LisbError;
pub use common::value::Value;
pub use vm::VM;

/// Reads every form out of `source`, evaluating each in turn against `vm`,
/// and returns the value of the last one. A `VM` persists its globals and
/// heap across calls, so running a `define` through one call and referring
/// to it in the next behaves exactly as it would if both had been part of
/// the same source text.
pub fn interpret(vm: &mut VM, source: &str) -> Result<Value, LisbError> {
    let results = vm.eval_source(std::rc::Rc::new(common::source::Source::source(source.to_string())))?;
    Ok(results.last().copied().unwrap_or(Value::Void))
}
