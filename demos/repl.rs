//! Interactive REPL and file runner.
//!
//! `cargo run --example repl` starts the REPL; `cargo run --example repl -- prog.lisp`
//! imports the file and exits. Enable logging with `RUST_LOG=cellxp=debug` or
//! `RUST_LOG=cellxp=trace`.

use cellxp::Error;
use cellxp::ast::{Value, atom};
use cellxp::builtinops::find_builtin_op;
use cellxp::evaluator::{self, Arity, Environment};
use cellxp::scheme::parse_program;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;

fn main() {
    init_tracing();

    if let Some(path) = std::env::args().nth(1) {
        process::exit(run_file(&path));
    }

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Install a stderr subscriber, only when RUST_LOG is set
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

/// Evaluate `(import "path")` in a fresh global environment
fn run_file(path: &str) -> i32 {
    let mut env = evaluator::create_global_env();
    let path = Value::list([atom("quote"), Value::from_text(path)]);
    let import = Value::list([atom("import"), path]);

    match evaluator::eval(&import, &mut env) {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

fn run_repl() {
    println!("cellxp Lisp interpreter");
    println!("Exact rationals, closures and an explicit scope stack");
    println!("Enter S-expressions like: (+ 1/2 1/3)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Could not initialize REPL: {e}");
            return;
        }
    };
    let mut env = evaluator::create_global_env();

    // Register custom function that can be called from user code for demonstration purposes
    env.register_builtin_function("help", Arity::Exact(0), print_help);

    loop {
        match rl.readline("cellxp> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        let _ = print_help(&[]);
                        continue;
                    }
                    ":env" => {
                        print_environment(&env);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                // A line may hold several expressions; stop at the first failure
                let result = parse_program(line).and_then(|exprs| {
                    exprs.iter().try_for_each(|expr| {
                        let value = evaluator::eval(expr, &mut env)?;
                        println!("{}", display_result(&value));
                        Ok(())
                    })
                });

                if let Err(e) = result {
                    println!("Error: {e}");
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

/// Annotate printable text values with their string form
fn display_result(value: &Value) -> String {
    match value.as_text() {
        Some(text) if !text.is_empty() && !text.chars().any(char::is_control) => {
            format!("{value}  ; \"{text}\"")
        }
        _ => format!("{value}"),
    }
}

fn print_help(_args: &[Value]) -> Result<Value, Error> {
    println!("cellxp REPL commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Language overview:");
    println!("  Numbers: 42, -5, 1/3, 0.25 (all exact)");
    println!("  Booleans: #t/#f; only #f is false in `if`");
    println!("  Strings: \"hi\" reads as the code list (104 105)");
    println!("  Arithmetic: + - * / pow numerator denominator floor ceiling round");
    println!("  Transcendental: log exp sin cos tan asin acos atan sqrt");
    println!("  Comparison: = < > <= >=");
    println!("  Lists: cons car cdr list");
    println!("  Predicates: proc? number? string? atom? null? list? pair?");
    println!("  Control: if quote begin evaluate import read print");
    println!("  Procedures: lambda lambda! mk-lambda mk-lambda! and composition (. f g)");
    println!("  Scope: let! let-parent!");
    println!();
    println!("Examples:");
    println!("  (let! 'square (lambda (x) (* x x)))");
    println!("  ((. square (lambda (x) (+ x 1))) 2)");
    println!("  ((lambda * args) 1 2 3)");
    println!("  (evaluate (read \"(+ 1 2)\"))");
    println!();

    Ok(Value::Null)
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!(
        "Environment bindings ({} total, {} frames):",
        bindings.len(),
        env.depth()
    );
    println!();

    // Separate primitives from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match &value {
            Value::Procedure(p) if find_builtin_op(&name).is_some() && *p.name == *name => {
                builtins.push(name)
            }
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Primitives ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
