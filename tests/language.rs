//! End-to-end behavior through the public API: reader, global environment and
//! evaluator together.

#![expect(clippy::unwrap_used)] // test code OK

use cellxp::Error;
use cellxp::ast::{Number, Value, atom, nil, val};
use cellxp::evaluator::{Environment, create_global_env, eval};
use cellxp::scheme::{parse_program, parse_scheme};
use std::path::PathBuf;

/// Evaluate every expression of `source` in `env`, returning the last result
fn run(source: &str, env: &mut Environment) -> Result<Value, Error> {
    let mut last = Value::Null;
    for expr in parse_program(source)? {
        let depth = env.depth();
        let result = eval(&expr, env);
        assert_eq!(env.depth(), depth, "stack depth changed evaluating {expr}");
        last = result?;
    }
    Ok(last)
}

fn run_fresh(source: &str) -> Result<Value, Error> {
    run(source, &mut create_global_env())
}

fn rational(numer: i64, denom: i64) -> Value {
    Value::Number(Number::new(numer.into(), denom.into()))
}

/// A scratch file under the system temp dir, removed on drop
struct TempSource(PathBuf);

impl TempSource {
    fn new(name: &str, contents: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "cellxp-{}-{name}",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        TempSource(path)
    }

    fn path(&self) -> String {
        self.0.display().to_string()
    }
}

impl Drop for TempSource {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[test]
fn test_exact_rational_round_trip() {
    let operands = [
        ("1/3", "2/7"),
        ("-5/11", "13/17"),
        ("0.1", "0.2"),
        ("123456789012345678901234567890", "1/123456789"),
        ("0", "-3/4"),
    ];

    for (a, b) in operands {
        let source = format!("(- (+ {a} {b}) {b})");
        let expected = parse_scheme(a).unwrap();
        assert_eq!(run_fresh(&source).unwrap(), expected, "{source}");
    }

    assert_eq!(run_fresh("(+ 0.1 0.2)").unwrap(), rational(3, 10));
}

#[test]
fn test_if_evaluates_only_the_taken_branch() {
    assert_eq!(run_fresh("(if (= 1 1) 10 20)").unwrap(), val(10));
    assert_eq!(run_fresh("(if (= 1 2) 10 20)").unwrap(), val(20));

    // `(print 5)` fails with a type error if evaluated
    assert_eq!(run_fresh("(if (= 1 1) 10 (print 5))").unwrap(), val(10));
    assert_eq!(run_fresh("(if (= 1 2) (print 5) 20)").unwrap(), val(20));

    let mut env = create_global_env();
    run("(if (= 1 1) 'then (let! 'side-effect #t))", &mut env).unwrap();
    assert_eq!(
        run("side-effect", &mut env),
        Err(Error::UnboundName("side-effect".into()))
    );
}

#[test]
fn test_lambda_application_is_lexically_scoped() {
    assert_eq!(run_fresh("((lambda (a b) (+ a b)) 3 4)").unwrap(), val(7));

    let mut env = create_global_env();
    run("(let! 'add (lambda (a b) (+ a b)))", &mut env).unwrap();
    let at_top = run("(add 3 4)", &mut env).unwrap();
    // Different bindings for `a` and `b` are active at the second call site
    let nested = run("((lambda (a b) (add 3 4)) 100 200)", &mut env).unwrap();
    assert_eq!(at_top, val(7));
    assert_eq!(nested, at_top);

    // Free names resolve in the defining scope
    run(
        "(let! 'scale 3) (let! 'scaled (lambda (x) (* x scale))) (let! 'scale 1000)",
        &mut env,
    )
    .unwrap();
    assert_eq!(run("(scaled 2)", &mut env).unwrap(), val(6));
    assert_eq!(run("((lambda (scale) (scaled 2)) 50)", &mut env).unwrap(), val(6));
}

#[test]
fn test_string_literals_evaluate_to_their_codes() {
    assert_eq!(run_fresh("\"hi\"").unwrap(), val([104, 105]));
    assert_eq!(run_fresh("(car \"hi\")").unwrap(), val(104));
    assert_eq!(run_fresh("\"\"").unwrap(), nil());
    assert_eq!(run_fresh("(print \"shown\")").unwrap(), val("shown"));
    assert_eq!(
        run_fresh("(read \"(+ 1 2)\")").unwrap(),
        Value::list([atom("+"), val(1), val(2)])
    );
}

#[test]
fn test_pairs() {
    let mut env = create_global_env();
    run("(let! 'p (cons 1 2))", &mut env).unwrap();
    assert_eq!(run("(car p)", &mut env).unwrap(), val(1));
    assert_eq!(run("(cdr p)", &mut env).unwrap(), val(2));
    assert!(matches!(run("(car 5)", &mut env), Err(Error::TypeMismatch(_))));
}

#[test]
fn test_composition_applies_inner_first() {
    let source = "
        (let! 'inc (lambda (x) (+ x 1)))
        (let! 'double (lambda (x) (* x 2)))
        ((. double inc) 3)
    ";
    assert_eq!(run_fresh(source).unwrap(), val(8));
}

#[test]
fn test_scope_bindings() {
    let mut env = create_global_env();
    assert_eq!(run("(let! 'x 5)", &mut env).unwrap(), val(5));
    assert_eq!(run("x", &mut env).unwrap(), val(5));
    assert_eq!(run("(let-parent! 'y 1)", &mut env), Err(Error::NoParentScope));
    assert_eq!(env.depth(), 1);

    // Inside a closure body there is a parent frame to write to
    assert_eq!(
        run("((lambda () (begin (let-parent! 'y 1) y)))", &mut env).unwrap(),
        val(1)
    );
}

#[test]
fn test_variadic_lambda() {
    let mut env = create_global_env();
    run("(let! 'f (lambda (*) (car args)))", &mut env).unwrap();
    assert_eq!(run("(f 9 9)", &mut env).unwrap(), val(9));
    assert!(matches!(run("(f)", &mut env), Err(Error::TypeMismatch(_))));
    assert_eq!(run("((lambda * args))", &mut env).unwrap(), nil());
}

#[test]
fn test_long_lists_and_strings() {
    let source = "
        (let! 'range (lambda (self n acc) (if (= n 0) acc (self self (- n 1) (cons n acc)))))
        (let! 'len (lambda (self xs) (if (null? xs) 0 (+ 1 (self self (cdr xs))))))
        (len len (range range 3000 '()))
    ";
    assert_eq!(run_fresh(source).unwrap(), val(3000));

    let long_text = "a".repeat(100_000);
    let literal = run_fresh(&format!("\"{long_text}\"")).unwrap();
    assert_eq!(literal.as_text().unwrap(), long_text);
    drop(literal);

    let reread = run_fresh(&format!("(evaluate (read \"\\\"{long_text}\\\"\"))")).unwrap();
    assert_eq!(reread.as_text().unwrap().len(), 100_000);
    drop(reread);
}

#[test]
fn test_error_kinds() {
    let cases: Vec<(&str, fn(&Error) -> bool)> = vec![
        ("nope", |e| matches!(e, Error::UnboundName(_))),
        ("((lambda (x) x))", |e| matches!(e, Error::ArityMismatch { .. })),
        ("(car 'a)", |e| matches!(e, Error::TypeMismatch(_))),
        ("(lambda (x x) x)", |e| matches!(e, Error::InvalidForm(_))),
        ("(let-parent! 'a 1)", |e| matches!(e, Error::NoParentScope)),
        ("(1 2 3)", |e| matches!(e, Error::NotCallable(_))),
        ("(/ 1 0)", |e| matches!(e, Error::EvalError(_))),
        ("(read \"(\")", |e| matches!(e, Error::ParseError(_))),
    ];

    for (source, is_expected_kind) in cases {
        let err = run_fresh(source).unwrap_err();
        assert!(is_expected_kind(&err), "{source}: unexpected error {err:?}");
    }
}

#[test]
fn test_import_evaluates_file_in_current_scope() {
    let module = TempSource::new(
        "module.lisp",
        "; helpers\n(let! 'square (lambda (x) (* x x)))\n(let! 'answer (square 7))\nanswer\n",
    );

    let mut env = create_global_env();
    let result = run(&format!("(import \"{}\")", module.path()), &mut env).unwrap();
    assert_eq!(result, val(49));
    assert_eq!(run("(square 1/2)", &mut env).unwrap(), rational(1, 4));
    assert_eq!(run("answer", &mut env).unwrap(), val(49));
}

#[test]
fn test_import_edge_cases() {
    let empty = TempSource::new("empty.lisp", "; nothing here\n");
    assert_eq!(
        run_fresh(&format!("(import \"{}\")", empty.path())).unwrap(),
        nil()
    );

    let broken = TempSource::new("broken.lisp", "(let! 'a 1)\n(+ 1");
    assert!(matches!(
        run_fresh(&format!("(import \"{}\")", broken.path())),
        Err(Error::ParseError(_))
    ));

    // A failing expression stops the import; earlier bindings remain
    let failing = TempSource::new(
        "failing.lisp",
        "(let! 'before 1)\n(car 5)\n(let! 'after 2)",
    );
    let mut env = create_global_env();
    assert!(run(&format!("(import \"{}\")", failing.path()), &mut env).is_err());
    assert_eq!(run("before", &mut env).unwrap(), val(1));
    assert!(run("after", &mut env).is_err());

    assert!(matches!(
        run_fresh("(import \"/definitely/not/here.lisp\")"),
        Err(Error::EvalError(_))
    ));
}

#[test]
fn test_metaprogramming() {
    let source = "
        (let! 'make-op (lambda (op) (mk-lambda '(a b) (list op 'a 'b))))
        (let! 'plus (make-op +))
        (plus 2 3)
    ";
    assert_eq!(run_fresh(source).unwrap(), val(5));

    assert_eq!(
        run_fresh("(to-atom (to-str 'round-trip))").unwrap(),
        atom("round-trip")
    );
    assert_eq!(
        run_fresh("(evaluate (cons '+ (cons 1 (cons 2 '()))))").unwrap(),
        val(3)
    );
    assert_eq!(
        run_fresh("(evaluate (read \"'(1 . 2)\"))").unwrap(),
        Value::cons(val(1), val(2))
    );
}
