//! The primitive procedures installed into every fresh `VM`: arithmetic,
//! comparison, pair/list operations, and the two I/O escape hatches
//! (`display`, `displayln`) a pure bytecode language has no other way to
//! reach the outside world through.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::value::Value;
use crate::object::Obj;
use crate::vm::VM;

pub fn install(vm: &mut VM) {
    vm.define_primitive("+", add);
    vm.define_primitive("-", sub);
    vm.define_primitive("*", mul);
    vm.define_primitive("/", div);
    vm.define_primitive("=", num_eq);
    vm.define_primitive("<", lt);
    vm.define_primitive(">", gt);
    vm.define_primitive("<=", le);
    vm.define_primitive(">=", ge);
    vm.define_primitive("car", car);
    vm.define_primitive("cdr", cdr);
    vm.define_primitive("cons", cons);
    vm.define_primitive("list", list);
    vm.define_primitive("append", append);
    vm.define_primitive("display", display);
    vm.define_primitive("displayln", displayln);
    vm.define_primitive("clock", clock);
}

fn number(v: &Value) -> Result<f64, String> {
    v.as_number().ok_or_else(|| format!("expected a number, got a {}", v.type_name()))
}

fn add(_vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    let mut sum = 0.0;
    for a in args {
        sum += number(a)?;
    }
    Ok(Value::Number(sum))
}

fn mul(_vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    let mut product = 1.0;
    for a in args {
        product *= number(a)?;
    }
    Ok(Value::Number(product))
}

fn sub(_vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    match args {
        [] => Err("'-' needs at least one argument".to_string()),
        [x] => Ok(Value::Number(-number(x)?)),
        [first, rest @ ..] => {
            let mut acc = number(first)?;
            for a in rest {
                acc -= number(a)?;
            }
            Ok(Value::Number(acc))
        }
    }
}

fn div(_vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    match args {
        [] => Err("'/' needs at least one argument".to_string()),
        [x] => {
            let n = number(x)?;
            if n == 0.0 {
                return Err("division by zero".to_string());
            }
            Ok(Value::Number(1.0 / n))
        }
        [first, rest @ ..] => {
            let mut acc = number(first)?;
            for a in rest {
                let n = number(a)?;
                if n == 0.0 {
                    return Err("division by zero".to_string());
                }
                acc /= n;
            }
            Ok(Value::Number(acc))
        }
    }
}

/// Folds a pairwise comparison across consecutive arguments, matching
/// Scheme's chained `(< 1 2 3)` semantics rather than a single binary test.
fn chain_compare(args: &[Value], op: impl Fn(f64, f64) -> bool) -> Result<Value, String> {
    if args.is_empty() {
        return Err("a comparison needs at least one argument".to_string());
    }
    let mut prev = number(&args[0])?;
    for a in &args[1..] {
        let n = number(a)?;
        if !op(prev, n) {
            return Ok(Value::Bool(false));
        }
        prev = n;
    }
    Ok(Value::Bool(true))
}

fn num_eq(_vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    chain_compare(args, |a, b| a == b)
}

fn lt(_vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    chain_compare(args, |a, b| a < b)
}

fn gt(_vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    chain_compare(args, |a, b| a > b)
}

fn le(_vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    chain_compare(args, |a, b| a <= b)
}

fn ge(_vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    chain_compare(args, |a, b| a >= b)
}

fn as_cons(vm: &VM, v: Value) -> Result<(Value, Value), String> {
    match v {
        Value::Obj(r) => match vm.heap().get(r) {
            Obj::Cons(c) => Ok((c.car, c.cdr)),
            other => Err(format!("expected a pair, got a {}", other.type_name())),
        },
        other => Err(format!("expected a pair, got a {}", other.type_name())),
    }
}

fn car(vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    let [v] = args else { return Err(format!("car expects 1 argument, got {}", args.len())) };
    Ok(as_cons(vm, *v)?.0)
}

fn cdr(vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    let [v] = args else { return Err(format!("cdr expects 1 argument, got {}", args.len())) };
    Ok(as_cons(vm, *v)?.1)
}

fn cons(vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    let [a, b] = args else { return Err(format!("cons expects 2 arguments, got {}", args.len())) };
    Ok(Value::Obj(vm.heap_mut().new_cons(*a, *b)))
}

fn list(vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    let mut result = Value::Null;
    for a in args.iter().rev() {
        result = Value::Obj(vm.heap_mut().new_cons(*a, result));
    }
    Ok(result)
}

/// Copies every element of every list but the last onto the front of the
/// last one, which is shared rather than copied — same contract as
/// Scheme's `append`.
fn append(vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    let Some((last, init)) = args.split_last() else { return Ok(Value::Null) };

    let mut elements = Vec::new();
    for list_arg in init {
        let mut cursor = *list_arg;
        loop {
            match cursor {
                Value::Null => break,
                Value::Obj(r) => match vm.heap().get(r) {
                    Obj::Cons(c) => {
                        elements.push(c.car);
                        cursor = c.cdr;
                    }
                    other => return Err(format!("append: expected a list, got a {}", other.type_name())),
                },
                other => return Err(format!("append: expected a list, got a {}", other.type_name())),
            }
        }
    }

    let mut result = *last;
    for value in elements.into_iter().rev() {
        result = Value::Obj(vm.heap_mut().new_cons(value, result));
    }
    Ok(result)
}

fn display(vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    let [v] = args else { return Err(format!("display expects 1 argument, got {}", args.len())) };
    print!("{}", vm.display(*v));
    Ok(Value::Void)
}

fn displayln(vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    let [v] = args else { return Err(format!("displayln expects 1 argument, got {}", args.len())) };
    println!("{}", vm.display(*v));
    Ok(Value::Void)
}

fn clock(_vm: &mut VM, args: &[Value]) -> Result<Value, String> {
    if !args.is_empty() {
        return Err(format!("clock expects 0 arguments, got {}", args.len()));
    }
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is after 1970").as_secs_f64();
    Ok(Value::Number(secs))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::source::Source;
    use std::rc::Rc;

    fn run(src: &str) -> Value {
        let mut vm = VM::new();
        *vm.eval_source(Rc::new(Source::source(src))).unwrap().last().unwrap()
    }

    #[test]
    fn variadic_arithmetic() {
        assert_eq!(run("(+ 1 2 3 4)"), Value::Number(10.0));
        assert_eq!(run("(- 10 1 2)"), Value::Number(7.0));
        assert_eq!(run("(- 5)"), Value::Number(-5.0));
        assert_eq!(run("(* 2 3 4)"), Value::Number(24.0));
    }

    #[test]
    fn chained_comparisons() {
        assert_eq!(run("(< 1 2 3)"), Value::Bool(true));
        assert_eq!(run("(< 1 3 2)"), Value::Bool(false));
    }

    #[test]
    fn pair_and_list_operations() {
        assert_eq!(run("(car (cons 1 2))"), Value::Number(1.0));
        assert_eq!(run("(cdr (cons 1 2))"), Value::Number(2.0));
        assert_eq!(run("(car (cdr (list 1 2 3)))"), Value::Number(2.0));
        assert_eq!(run("(car (append (list 1 2) (list 3 4)))"), Value::Number(1.0));
        assert_eq!(run("(car (cdr (cdr (append (list 1 2) (list 3 4)))))"), Value::Number(3.0));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let mut vm = VM::new();
        let err = vm.eval_source(Rc::new(Source::source("(/ 1 0)"))).unwrap_err();
        assert!(matches!(err, crate::common::error::LisbError::Runtime(_)));
    }
}
