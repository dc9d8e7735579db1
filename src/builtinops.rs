//! Built-in operations registry.
//!
//! Every primitive procedure in the global environment is described once here, by
//! name, argument policy and arity. The evaluator turns each entry into a
//! [`Procedure`] value when it builds the global frame, so primitives and closures
//! are called through exactly the same protocol.
//!
//! ```scheme
//! (+ 1/2 1/3)        ; exact arithmetic => 5/6
//! (car '(1 2 3))     ; list access => 1
//! (to-str 'abc)      ; structural stringify => "abc"
//! ```
//!
//! ## Functions vs Special Forms
//!
//! - **Functions** receive evaluated arguments (e.g. `+`, `car`, `let!`)
//! - **Special forms** receive the call-site expressions untouched (`if`, `quote`,
//!   `lambda`, `lambda!`)
//!
//! Either kind may need the live environment stack. Those that do are registered
//! as [`OpKind::WithEnvironment`] and are implemented in the evaluator.
//!
//! ## Error Handling
//!
//! - **Type Safety**: operations reject operands of the wrong shape with
//!   `TypeMismatch` (e.g. `(car 5)`)
//! - **No Truthiness in Arithmetic**: booleans never become numbers
//! - **Arity Checking**: enforced by the evaluator from the registered arity,
//!   before any argument is evaluated
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** following the signature `fn(args: &[Value]) -> Result<Value, Error>`
//! 2. **Add to BUILTIN_OPS** with its identifier, argument policy and arity
//! 3. **Add tests** covering edge cases and error conditions

use crate::Error;
use crate::ast::{Number, Procedure, Value};
use crate::evaluator::{
    Arity, Environment, eval_compose, eval_evaluate, eval_if, eval_import, eval_lambda,
    eval_lambda_unevaluated, eval_let, eval_let_parent, eval_quote,
};
use crate::scheme::parse_scheme;
use num_rational::BigRational;
use num_traits::{ToPrimitive, Zero};
use std::collections::HashMap;
use std::io::Write;
use std::sync::LazyLock;

/// Signature of a primitive that only needs its evaluated arguments
pub type BuiltinFn = fn(&[Value]) -> Result<Value, Error>;

/// Signature of a primitive that needs the environment stack and evaluation depth
pub type EnvironmentFn = fn(Vec<Value>, &mut Environment, usize) -> Result<Value, Error>;

/// Represents the implementation of a built-in operation
#[derive(Clone, Copy)]
pub enum OpKind {
    /// Pure function of its arguments
    Function(BuiltinFn),
    /// Operation with access to the environment stack and current evaluation depth
    WithEnvironment(EnvironmentFn),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::WithEnvironment(_) => write!(f, "WithEnvironment(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The identifier this operation is bound to in the global frame
    pub id: &'static str,
    /// Whether call-site arguments are evaluated before the body runs
    pub evaluate_args: bool,
    /// Expected number of arguments
    pub arity: Arity,
    /// The implementation of this operation
    pub op_kind: OpKind,
}

impl BuiltinOp {
    /// Check if this operation is a special form (suppresses argument evaluation)
    pub fn is_special_form(&self) -> bool {
        !self.evaluate_args
    }

    /// Wrap this operation as a first-class procedure value
    pub(crate) fn to_procedure(&self) -> Value {
        let procedure = match self.op_kind {
            OpKind::Function(func) => Procedure::new(
                self.id,
                self.evaluate_args,
                self.arity,
                move |args: Vec<Value>, _env: &mut Environment, _depth: usize| func(&args),
            ),
            OpKind::WithEnvironment(func) => {
                Procedure::new(self.id, self.evaluate_args, self.arity, func)
            }
        };
        Value::Procedure(procedure)
    }
}

//
// Argument helpers
//

fn one_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value, Error> {
    match args {
        [value] => Ok(value),
        _ => Err(Error::arity_mismatch(name, 1, args.len())),
    }
}

fn number_arg<'a>(name: &str, value: &'a Value) -> Result<&'a Number, Error> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(Error::type_mismatch(format!(
            "{name} requires numbers, got {other}"
        ))),
    }
}

fn one_number<'a>(name: &str, args: &'a [Value]) -> Result<&'a Number, Error> {
    number_arg(name, one_arg(name, args)?)
}

fn two_numbers<'a>(name: &str, args: &'a [Value]) -> Result<(&'a Number, &'a Number), Error> {
    match args {
        [a, b] => Ok((number_arg(name, a)?, number_arg(name, b)?)),
        _ => Err(Error::arity_mismatch(name, 2, args.len())),
    }
}

fn text_arg(name: &str, args: &[Value]) -> Result<String, Error> {
    let value = one_arg(name, args)?;
    value
        .as_text()
        .ok_or_else(|| Error::type_mismatch(format!("{name} requires a string, got {value}")))
}

fn to_float(name: &str, n: &Number) -> Result<f64, Error> {
    n.to_f64()
        .ok_or_else(|| Error::EvalError(format!("{name}: {n} is out of floating-point range")))
}

fn from_float(name: &str, x: f64) -> Result<Value, Error> {
    if !x.is_finite() {
        return Err(Error::EvalError(format!("{name} produced a non-finite result")));
    }
    BigRational::from_float(x)
        .map(Value::Number)
        .ok_or_else(|| Error::EvalError(format!("{name} produced a non-finite result")))
}

//
// Builtin Function Implementations
//

// Macro to generate exact two-operand arithmetic
macro_rules! exact_arithmetic {
    ($name:ident, $id:expr, $op:tt) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            let (a, b) = two_numbers($id, args)?;
            Ok(Value::Number(a $op b))
        }
    };
}

exact_arithmetic!(builtin_add, "+", +);
exact_arithmetic!(builtin_sub, "-", -);
exact_arithmetic!(builtin_mul, "*", *);

fn builtin_div(args: &[Value]) -> Result<Value, Error> {
    let (a, b) = two_numbers("/", args)?;
    if b.is_zero() {
        return Err(Error::EvalError("/: division by zero".into()));
    }
    Ok(Value::Number(a / b))
}

// Macro to generate transcendental functions evaluated in f64
macro_rules! float_function {
    ($name:ident, $id:expr, $func:expr) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            let x = to_float($id, one_number($id, args)?)?;
            from_float($id, $func(x))
        }
    };
}

float_function!(builtin_log, "log", f64::ln);
float_function!(builtin_exp, "exp", f64::exp);
float_function!(builtin_sin, "sin", f64::sin);
float_function!(builtin_cos, "cos", f64::cos);
float_function!(builtin_tan, "tan", f64::tan);
float_function!(builtin_asin, "asin", f64::asin);
float_function!(builtin_acos, "acos", f64::acos);
float_function!(builtin_atan, "atan", f64::atan);
float_function!(builtin_sqrt, "sqrt", f64::sqrt);

/// Largest exact `pow` result, in bits of numerator or denominator
const MAX_EXACT_POW_BITS: u64 = 1 << 20;

/// Exact for integer exponents that fit an `i32`, floating-point otherwise
fn builtin_pow(args: &[Value]) -> Result<Value, Error> {
    let (base, exponent) = two_numbers("pow", args)?;

    if exponent.is_integer()
        && let Some(exp) = exponent.to_integer().to_i32()
    {
        if base.is_zero() && exp < 0 {
            return Err(Error::EvalError("pow: division by zero".into()));
        }
        let magnitude = exp.unsigned_abs();
        let base_bits = base.numer().bits().max(base.denom().bits());
        let result_bits = base_bits.saturating_sub(1).saturating_mul(u64::from(magnitude));
        if result_bits > MAX_EXACT_POW_BITS {
            return Err(Error::EvalError(format!(
                "pow: exact result exceeds {MAX_EXACT_POW_BITS} bits"
            )));
        }
        let numer = base.numer().pow(magnitude);
        let denom = base.denom().pow(magnitude);
        let result = if exp < 0 {
            Number::new(denom, numer)
        } else {
            Number::new(numer, denom)
        };
        return Ok(Value::Number(result));
    }

    let x = to_float("pow", base)?;
    let y = to_float("pow", exponent)?;
    from_float("pow", x.powf(y))
}

// Macro to generate single-number functions that stay exact
macro_rules! exact_unary {
    ($name:ident, $id:expr, $func:expr) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            let n = one_number($id, args)?;
            Ok(Value::Number($func(n)))
        }
    };
}

exact_unary!(builtin_numerator, "numerator", |n: &Number| {
    Number::from_integer(n.numer().clone())
});
exact_unary!(builtin_denominator, "denominator", |n: &Number| {
    Number::from_integer(n.denom().clone())
});
exact_unary!(builtin_floor, "floor", Number::floor);
exact_unary!(builtin_ceiling, "ceiling", Number::ceil);
exact_unary!(builtin_round, "round", Number::round);

// Macro to generate numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $id:expr, $op:tt) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            let (a, b) = two_numbers($id, args)?;
            Ok(Value::Bool(a $op b))
        }
    };
}

numeric_comparison!(builtin_gt, ">", >);
numeric_comparison!(builtin_ge, ">=", >=);
numeric_comparison!(builtin_lt, "<", <);
numeric_comparison!(builtin_le, "<=", <=);

/// Structural equality over any two values; procedures compare by identity
fn builtin_equal(args: &[Value]) -> Result<Value, Error> {
    match args {
        [a, b] => Ok(Value::Bool(a == b)),
        _ => Err(Error::arity_mismatch("=", 2, args.len())),
    }
}

fn builtin_cons(args: &[Value]) -> Result<Value, Error> {
    match args {
        [head, tail] => Ok(Value::cons(head.clone(), tail.clone())),
        _ => Err(Error::arity_mismatch("cons", 2, args.len())),
    }
}

fn builtin_car(args: &[Value]) -> Result<Value, Error> {
    match one_arg("car", args)? {
        Value::Cell(head, _) => Ok(head.as_ref().clone()),
        other => Err(Error::type_mismatch(format!(
            "car requires a pair, got {other}"
        ))),
    }
}

fn builtin_cdr(args: &[Value]) -> Result<Value, Error> {
    match one_arg("cdr", args)? {
        Value::Cell(_, tail) => Ok(tail.as_ref().clone()),
        other => Err(Error::type_mismatch(format!(
            "cdr requires a pair, got {other}"
        ))),
    }
}

fn builtin_list(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::list(args.iter().cloned()))
}

// Macro to generate total one-argument type predicates
macro_rules! predicate {
    ($name:ident, $id:expr, $test:expr) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            let value = one_arg($id, args)?;
            Ok(Value::Bool($test(value)))
        }
    };
}

predicate!(builtin_is_proc, "proc?", |v: &Value| matches!(v, Value::Procedure(_)));
predicate!(builtin_is_number, "number?", |v: &Value| matches!(v, Value::Number(_)));
predicate!(builtin_is_string, "string?", |v: &Value| v.as_text().is_some());
predicate!(builtin_is_atom, "atom?", |v: &Value| matches!(v, Value::Atom(_)));
predicate!(builtin_is_null, "null?", Value::is_null);
predicate!(builtin_is_list, "list?", Value::is_proper_list);
predicate!(builtin_is_pair, "pair?", |v: &Value| matches!(v, Value::Cell(..)));

/// Strings pass through; everything else becomes the text of its printed form
fn builtin_to_str(args: &[Value]) -> Result<Value, Error> {
    let value = one_arg("to-str", args)?;
    if value.as_text().is_some() {
        return Ok(value.clone());
    }
    Ok(Value::from_text(&value.to_string()))
}

/// Atoms pass through, non-empty strings name an atom, anything else is
/// atomized by its printed form
fn builtin_to_atom(args: &[Value]) -> Result<Value, Error> {
    let value = one_arg("to-atom", args)?;
    match value {
        Value::Atom(_) => Ok(value.clone()),
        _ => match value.as_text() {
            Some(text) if !text.is_empty() => Ok(Value::Atom(text)),
            _ => Ok(Value::Atom(value.to_string())),
        },
    }
}

fn builtin_print(args: &[Value]) -> Result<Value, Error> {
    let text = text_arg("print", args)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}").map_err(|e| Error::EvalError(format!("print: {e}")))?;
    Ok(Value::from_text(&text))
}

fn builtin_read(args: &[Value]) -> Result<Value, Error> {
    let source = text_arg("read", args)?;
    parse_scheme(&source)
}

fn builtin_begin(args: &[Value]) -> Result<Value, Error> {
    args.last()
        .cloned()
        .ok_or_else(|| Error::invalid_form("begin requires at least one expression"))
}

/// Global registry of all built-in operations.
///
/// Kept as one contiguous collection for ease of auditing; built once at
/// initialization time via a `LazyLock`.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn function(id: &'static str, arity: Arity, func: BuiltinFn) -> BuiltinOp {
        BuiltinOp {
            id,
            evaluate_args: true,
            arity,
            op_kind: OpKind::Function(func),
        }
    }

    fn with_env(
        id: &'static str,
        evaluate_args: bool,
        arity: Arity,
        func: EnvironmentFn,
    ) -> BuiltinOp {
        BuiltinOp {
            id,
            evaluate_args,
            arity,
            op_kind: OpKind::WithEnvironment(func),
        }
    }

    use Arity::{Any, Exact};

    vec![
        // Arithmetic operations
        function("+", Exact(2), builtin_add),
        function("-", Exact(2), builtin_sub),
        function("*", Exact(2), builtin_mul),
        function("/", Exact(2), builtin_div),
        function("log", Exact(1), builtin_log),
        function("exp", Exact(1), builtin_exp),
        function("sin", Exact(1), builtin_sin),
        function("cos", Exact(1), builtin_cos),
        function("tan", Exact(1), builtin_tan),
        function("asin", Exact(1), builtin_asin),
        function("acos", Exact(1), builtin_acos),
        function("atan", Exact(1), builtin_atan),
        function("sqrt", Exact(1), builtin_sqrt),
        function("pow", Exact(2), builtin_pow),
        function("numerator", Exact(1), builtin_numerator),
        function("denominator", Exact(1), builtin_denominator),
        function("floor", Exact(1), builtin_floor),
        function("ceiling", Exact(1), builtin_ceiling),
        function("round", Exact(1), builtin_round),
        // Comparison operations
        function("=", Exact(2), builtin_equal),
        function(">", Exact(2), builtin_gt),
        function(">=", Exact(2), builtin_ge),
        function("<", Exact(2), builtin_lt),
        function("<=", Exact(2), builtin_le),
        // List operations
        function("cons", Exact(2), builtin_cons),
        function("car", Exact(1), builtin_car),
        function("cdr", Exact(1), builtin_cdr),
        function("list", Any, builtin_list),
        // Type predicates
        function("proc?", Exact(1), builtin_is_proc),
        function("number?", Exact(1), builtin_is_number),
        function("string?", Exact(1), builtin_is_string),
        function("atom?", Exact(1), builtin_is_atom),
        function("null?", Exact(1), builtin_is_null),
        function("list?", Exact(1), builtin_is_list),
        function("pair?", Exact(1), builtin_is_pair),
        // Conversion
        function("to-str", Exact(1), builtin_to_str),
        function("to-atom", Exact(1), builtin_to_atom),
        // I/O and metaprogramming
        function("print", Exact(1), builtin_print),
        function("read", Exact(1), builtin_read),
        // Control flow
        with_env("if", false, Exact(3), eval_if),
        with_env("quote", false, Exact(1), eval_quote),
        with_env("lambda", false, Exact(2), eval_lambda),
        with_env("lambda!", false, Exact(2), eval_lambda_unevaluated),
        with_env("mk-lambda", true, Exact(2), eval_lambda),
        with_env("mk-lambda!", true, Exact(2), eval_lambda_unevaluated),
        with_env("evaluate", true, Exact(1), eval_evaluate),
        with_env("import", true, Exact(1), eval_import),
        function("begin", Any, builtin_begin),
        // Scope
        with_env("let!", true, Exact(2), eval_let),
        with_env("let-parent!", true, Exact(2), eval_let_parent),
        // Composition
        with_env(".", true, Exact(2), eval_compose),
    ]
});

/// Lazy static map from id to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| {
        let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
        ops.iter().map(|op| (op.id, op)).collect()
    });

/// Get all builtin operations (for internal use by evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by its identifier
pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

/// Named constants bound in the global frame alongside the operations
pub(crate) fn builtin_constants() -> Vec<(&'static str, Value)> {
    [("pi", std::f64::consts::PI), ("e", std::f64::consts::E)]
        .into_iter()
        .filter_map(|(name, x)| BigRational::from_float(x).map(|n| (name, Value::Number(n))))
        .collect()
}
