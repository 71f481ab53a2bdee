//! End-to-end snippet tests for the lisb pipeline as a whole: scanner
//! through parser through compiler through VM, run against a fresh
//! interpreter for every case.

use lisb::{interpret, LisbError, Value, VM};

/// Which stratum, if any, a snippet is expected to fail in — mirrors the
/// three-way split of `LisbError` rather than a flat pass/fail bit, so a
/// test that means to exercise a compile error can't quietly pass because
/// the VM raised a runtime error instead.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Success,
    Compile,
    Runtime,
}

fn outcome_of(result: &Result<Value, LisbError>) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(LisbError::Syntax(_)) => Outcome::Compile,
        Err(LisbError::Compile(_)) => Outcome::Compile,
        Err(LisbError::Runtime(_)) => Outcome::Runtime,
    }
}

/// Runs every form in `src` against a fresh `VM`, returning the value of
/// the last one (or the first error encountered).
fn run(src: &str) -> (VM, Result<Value, LisbError>) {
    let mut vm = VM::new();
    let result = interpret(&mut vm, src);
    (vm, result)
}

fn expect_success(src: &str) -> (VM, Value) {
    let (vm, result) = run(src);
    assert_eq!(outcome_of(&result), Outcome::Success, "expected success for: {}", src);
    (vm, result.unwrap())
}

#[test]
fn scenario_1_simple_arithmetic() {
    let (vm, value) = expect_success("(+ 1 2)");
    assert_eq!(vm.display(value), "3");
}

#[test]
fn scenario_2_recursive_factorial() {
    let src = "(define fact (lambda (n) (if (<= n 1) 1 (* n (fact (- n 1)))))) (fact 5)";
    let (vm, value) = expect_success(src);
    assert_eq!(vm.display(value), "120");
}

#[test]
fn scenario_3_let_binding() {
    let (vm, value) = expect_success("(let ((x 10) (y 32)) (+ x y))");
    assert_eq!(vm.display(value), "42");
}

#[test]
fn scenario_4_call_cc_escape_and_later_reinvocation() {
    // (quote ...) stands in for the reader shorthand 'x: this grammar has
    // no apostrophe production, only the explicit special form.
    let mut vm = VM::new();
    let first = interpret(&mut vm, "(define c #f) (+ 1 (call/cc (lambda (k) (set! c k) 10)))").unwrap();
    assert_eq!(vm.display(first), "11");

    let second = interpret(&mut vm, "(c 100)").unwrap();
    assert_eq!(vm.display(second), "101");
}

#[test]
fn scenario_5_closures_capture_their_environment() {
    let src = "(define make-adder (lambda (n) (lambda (x) (+ x n)))) ((make-adder 3) 4)";
    let (vm, value) = expect_success(src);
    assert_eq!(vm.display(value), "7");
}

#[test]
fn scenario_6_deep_tail_recursion_does_not_overflow() {
    let src = "(define loop (lambda (n) (if (= n 0) (quote done) (loop (- n 1))))) (loop 100000)";
    let (vm, value) = expect_success(src);
    assert_eq!(vm.display(value), "done");
}

#[test]
fn unbound_variable_is_a_runtime_error() {
    let (_, result) = run("(this-name-is-never-defined)");
    assert_eq!(outcome_of(&result), Outcome::Runtime);
}

#[test]
fn malformed_special_form_is_a_compile_error() {
    let (_, result) = run("(set! #t 1)");
    assert_eq!(outcome_of(&result), Outcome::Compile);
}

#[test]
fn unterminated_string_is_a_compile_error() {
    let (_, result) = run("(display \"unterminated");
    assert_eq!(outcome_of(&result), Outcome::Compile);
}

#[test]
fn a_vm_persists_globals_across_separate_interpret_calls() {
    let mut vm = VM::new();
    interpret(&mut vm, "(define x 5)").unwrap();
    let value = interpret(&mut vm, "(+ x 1)").unwrap();
    assert_eq!(vm.display(value), "6");
}

#[test]
fn garbage_collector_reclaims_transient_cons_cells_under_stress() {
    let mut vm = VM::new();
    vm.set_gc_stress(true);
    let src = "(define build (lambda (n) (if (= n 0) 0 (begin (cons n n) (build (- n 1))))))
               (build 10000)";
    let value = interpret(&mut vm, src).unwrap();
    assert_eq!(vm.display(value), "0");
    assert!(vm.bytes_allocated() < 1_000_000, "garbage from the loop should have been collected");
}
