//! The `lisb` command-line front end: run a source file to completion, or
//! drop into a line-editing REPL that accumulates input until parentheses
//! balance before handing a form to the VM.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;

use lisb::common::error::{LisbError, Syntax};
use lisb::common::source::Source;
use lisb::common::span::Spanned;
use lisb::parser::{ParseOutcome, Sexpr};
use lisb::VM;

#[derive(Parser)]
#[command(name = "lisb", version, about = "A small Scheme-like language with closures, tail calls, and call/cc.")]
struct Cli {
    /// A source file to run. Omitted to start an interactive REPL instead.
    path: Option<PathBuf>,

    /// Collect garbage on every allocation, to shake out GC bugs.
    #[arg(long)]
    gc_stress: bool,
}

const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;
const EXIT_USAGE_ERROR: u8 = 64;

fn main() -> ExitCode {
    env_logger::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(EXIT_USAGE_ERROR);
        }
    };

    let mut vm = VM::new();
    vm.set_gc_stress(cli.gc_stress);

    match &cli.path {
        Some(path) => run_file(&mut vm, path),
        None => run_repl(&mut vm),
    }
}

/// Runs every form in `path` in order, stopping at the first error — a
/// script halts the whole process with the exit code matching the stratum
/// of failure, unlike the REPL, which only loses the one broken form.
fn run_file(vm: &mut VM, path: &Path) -> ExitCode {
    let source = match Source::path(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("lisb: can't read {}: {}", path.display(), e);
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };

    match vm.eval_source(Rc::new(source)) {
        Ok(_) => ExitCode::SUCCESS,
        Err(LisbError::Syntax(e)) => {
            eprintln!("{}", e);
            ExitCode::from(EXIT_COMPILE_ERROR)
        }
        Err(LisbError::Compile(errors)) => {
            for e in &errors {
                eprintln!("{}", e);
            }
            ExitCode::from(EXIT_COMPILE_ERROR)
        }
        Err(LisbError::Runtime(trace)) => {
            eprintln!("{}", trace);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

enum FormRead {
    Form(Spanned<Sexpr>),
    Empty,
    Err(Syntax),
}

fn read_one_form(source: &Rc<Source>) -> FormRead {
    let mut parser = lisb::parser::Parser::new(Rc::clone(source));
    match parser.parse_form() {
        ParseOutcome::Form(form) => FormRead::Form(form),
        ParseOutcome::Eof => FormRead::Empty,
        ParseOutcome::Err(e) => FormRead::Err(e),
    }
}

/// Whether `src` has no unclosed `(`, `"`, each tracked outside of `;`
/// comments, and so is ready to hand to the reader. A lone atom with no
/// parens at all is trivially balanced, so single-line input like `(+ 1 2)`
/// or `x` runs immediately; an open `(lambda (x)` waits for more lines.
fn is_balanced(src: &str) -> bool {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut in_comment = false;
    for ch in src.chars() {
        if in_comment {
            if ch == '\n' {
                in_comment = false;
            }
            continue;
        }
        if in_string {
            if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            ';' => in_comment = true,
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return true;
        }
    }
    depth <= 0 && !in_string
}

/// A form that fails only halts itself — the REPL keeps the VM's globals
/// and reads the next prompt, per the file runner's all-or-nothing contract
/// above.
fn run_repl(vm: &mut VM) -> ExitCode {
    let mut editor = rustyline::DefaultEditor::new().expect("terminal supports line editing");
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "lisb> " } else { "....> " };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("lisb: {}", e);
                break;
            }
        };

        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(&line);

        if !is_balanced(&buffer) {
            continue;
        }
        if buffer.trim().is_empty() {
            buffer.clear();
            continue;
        }

        let _ = editor.add_history_entry(buffer.as_str());
        let form_src = std::mem::take(&mut buffer);
        let source = Rc::new(Source::source(form_src));

        match read_one_form(&source) {
            FormRead::Form(form) => match vm.eval_form(&form) {
                Ok(value) => println!("{}", vm.display(value)),
                Err(e) => eprintln!("{}", e),
            },
            FormRead::Empty => {}
            FormRead::Err(e) => eprintln!("{}", e),
        }
    }

    ExitCode::SUCCESS
}
