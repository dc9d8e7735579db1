use crate::Error;
use crate::MAX_EVAL_DEPTH;
use crate::ast::{Procedure, Value};
use crate::builtinops::{builtin_constants, get_builtin_ops};
use crate::scheme::parse_program;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Canonical erased procedure body used by the evaluator.
///
/// Bodies receive ownership of their argument vector, the live environment
/// stack and the current evaluation depth.
pub type ProcedureFn =
    dyn Fn(Vec<Value>, &mut Environment, usize) -> Result<Value, Error> + Send + Sync;

/// One scope layer of the environment stack
pub type Frame = HashMap<String, Value>;

/// Name under which a variadic closure sees its collected arguments
pub const VARIADIC_ARGS: &str = "args";

/// Parameter-spec atom that marks a closure as variadic
pub const VARIADIC_MARKER: &str = "*";

/// Declared argument count of a procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments
    Exact(usize),
    /// Any number of arguments (variadic)
    Any,
}

impl Arity {
    /// Check a call-site argument count against this arity
    pub fn validate(&self, name: &str, arg_count: usize) -> Result<(), Error> {
        match self {
            Arity::Exact(expected) if *expected != arg_count => {
                Err(Error::arity_mismatch(name, *expected, arg_count))
            }
            _ => Ok(()),
        }
    }
}

/// Environment stack for variable bindings.
///
/// Frames are ordered outermost first; the last frame is the innermost scope.
/// Each frame sits behind an `Arc` so snapshots taken by closures share storage
/// with the live stack until either side writes (copy-on-write via
/// `Arc::make_mut`).
#[derive(Debug, Clone, Default)]
pub struct Environment {
    frames: Vec<Arc<Frame>>,
}

impl Environment {
    /// An empty stack with no frames
    pub fn new() -> Self {
        Environment { frames: Vec::new() }
    }

    /// Number of frames currently on the stack
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(Arc::new(frame));
    }

    /// Remove the innermost frame. `None` means the stack was already empty,
    /// which correct control flow never produces.
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop().map(Arc::unwrap_or_clone)
    }

    /// A copy of the stack that later writes on either side will not affect
    pub fn snapshot(&self) -> Environment {
        self.clone()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Resolve an atom, innermost frame first
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::UnboundName(name.to_owned()))
    }

    /// Insert or overwrite a binding in the innermost frame (`let!`)
    pub fn bind_innermost(&mut self, name: impl Into<String>, value: Value) -> Result<(), Error> {
        let frame = self.frames.last_mut().ok_or(Error::EmptyStack)?;
        Arc::make_mut(frame).insert(name.into(), value);
        Ok(())
    }

    /// Insert or overwrite a binding in the frame just outside the innermost one (`let-parent!`)
    pub fn bind_parent(&mut self, name: impl Into<String>, value: Value) -> Result<(), Error> {
        let len = self.frames.len();
        if len < 2 {
            return Err(Error::NoParentScope);
        }
        Arc::make_mut(&mut self.frames[len - 2]).insert(name.into(), value);
        Ok(())
    }

    /// Register a host function as a procedure in the innermost frame.
    ///
    /// The function receives evaluated arguments. Arity is enforced before it
    /// runs, so a function registered with `Arity::Exact(2)` always sees a
    /// two-element slice.
    ///
    /// # Example
    /// ```
    /// use cellxp::evaluator::{Arity, create_global_env, eval};
    /// use cellxp::ast::{Value, val};
    /// use cellxp::scheme::parse_scheme;
    /// use cellxp::Error;
    ///
    /// fn count_args(args: &[Value]) -> Result<Value, Error> {
    ///     Ok(val(args.len() as i64))
    /// }
    ///
    /// let mut env = create_global_env();
    /// env.register_builtin_function("count-args", Arity::Any, count_args);
    /// let expr = parse_scheme("(count-args 1 2 3)").unwrap();
    /// assert_eq!(eval(&expr, &mut env).unwrap(), val(3));
    /// ```
    pub fn register_builtin_function(
        &mut self,
        name: &str,
        arity: Arity,
        func: fn(&[Value]) -> Result<Value, Error>,
    ) {
        if self.frames.is_empty() {
            self.push(Frame::new());
        }
        let procedure = Procedure::new(name, true, arity, move |args, _env, _depth| func(&args));
        if let Some(frame) = self.frames.last_mut() {
            Arc::make_mut(frame).insert(name.to_owned(), Value::Procedure(procedure));
        }
    }

    /// Get all visible bindings, inner frames shadowing outer ones.
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();

        for frame in &self.frames {
            for (name, value) in frame.iter() {
                bindings.insert(name.clone(), value.clone());
            }
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

/// Evaluate an expression (public API)
pub fn eval(expr: &Value, env: &mut Environment) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env, 0)
}

/// Grow the native stack when less than this remains
const RED_ZONE: usize = 100 * 1024;

/// Size of each new stack segment
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run `f` with at least `RED_ZONE` bytes of native stack available.
///
/// Nested expressions recurse through the evaluator without bound from the
/// depth counter, which only counts closure applications, `evaluate` and imports.
#[inline]
fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// Evaluate an expression with depth tracking to prevent runaway recursion.
///
/// `depth` counts the closure applications, `evaluate` calls and imports in progress.
pub(crate) fn eval_with_depth_tracking(
    expr: &Value,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    if depth >= MAX_EVAL_DEPTH {
        return Err(Error::EvalError(format!(
            "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
        )));
    }
    ensure_sufficient_stack(|| eval_expr(expr, env, depth))
}

fn eval_expr(expr: &Value, env: &mut Environment, depth: usize) -> Result<Value, Error> {
    match expr {
        // Self-evaluating forms. Procedures only appear here when a program
        // builds an expression out of runtime values.
        Value::Number(_) | Value::Bool(_) | Value::Null | Value::Procedure(_) => {
            Ok(expr.clone())
        }

        Value::Atom(name) => env.lookup(name),

        Value::Cell(head, tail) => {
            eval_call(head, tail, env, depth).map_err(|err| add_context(err, expr))
        }
    }
}

/// Helper function to add expression context to errors
fn add_context(error: Error, expr: &Value) -> Error {
    let context = format!("while evaluating: {expr}");
    match error {
        Error::EvalError(msg) if !msg.contains("Context:") => {
            Error::EvalError(format!("{msg}\n  Context: {context}"))
        }
        Error::TypeMismatch(msg) if !msg.contains("Context:") => {
            Error::TypeMismatch(format!("{msg}\n  Context: {context}"))
        }
        // Other kinds carry their own context; innermost context wins
        other => other,
    }
}

/// Evaluate a call: resolve the operator, then hand the operand expressions to
/// the procedure protocol
fn eval_call(
    head: &Value,
    tail: &Value,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    let operator = eval_with_depth_tracking(head, env, depth)?;
    let Value::Procedure(procedure) = &operator else {
        return Err(Error::NotCallable(format!("{operator}")));
    };

    let arg_exprs = tail.proper_list().ok_or_else(|| {
        Error::invalid_form(format!(
            "improper argument list in call to {}",
            procedure.name
        ))
    })?;

    apply(procedure, arg_exprs, env, depth)
}

/// Helper function to evaluate argument expressions left to right
fn eval_args(args: &[Value], env: &mut Environment, depth: usize) -> Result<Vec<Value>, Error> {
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg, env, depth))
        .collect()
}

/// Apply a procedure to call-site argument expressions: check arity, evaluate
/// the arguments if the procedure asks for it, then run the body.
pub(crate) fn apply(
    procedure: &Procedure,
    arg_exprs: Vec<Value>,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    procedure.arity.validate(&procedure.name, arg_exprs.len())?;

    let args = if procedure.evaluate_args {
        eval_args(&arg_exprs, env, depth)?
    } else {
        arg_exprs
    };

    trace!(procedure = %procedure.name, argc = args.len(), "applying procedure");
    (procedure.body)(args, env, depth)
}

/// Apply a procedure to values that are already results. Arity is still
/// checked; evaluation is suppressed regardless of the procedure's policy.
pub(crate) fn apply_values(
    procedure: &Procedure,
    args: Vec<Value>,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    procedure.arity.validate(&procedure.name, args.len())?;
    (procedure.body)(args, env, depth)
}

/// Destructure an argument vector of known length
pub(crate) fn exact_args<const N: usize>(
    name: &str,
    args: Vec<Value>,
) -> Result<[Value; N], Error> {
    <[Value; N]>::try_from(args).map_err(|args| Error::arity_mismatch(name, N, args.len()))
}

/// Evaluate quote special form
pub(crate) fn eval_quote(
    args: Vec<Value>,
    _env: &mut Environment,
    _depth: usize,
) -> Result<Value, Error> {
    let [expr] = exact_args("quote", args)?;
    Ok(expr)
}

/// Evaluate if special form. Anything but `#f` selects the then-branch, and the
/// untaken branch is never evaluated.
pub(crate) fn eval_if(
    args: Vec<Value>,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    let [condition_expr, then_expr, else_expr] = exact_args("if", args)?;
    match eval_with_depth_tracking(&condition_expr, env, depth)? {
        Value::Bool(false) => eval_with_depth_tracking(&else_expr, env, depth),
        _ => eval_with_depth_tracking(&then_expr, env, depth),
    }
}

/// Shape of a closure's parameter list
#[derive(Debug, Clone, PartialEq)]
enum ParamSpec {
    Fixed(Vec<String>),
    Variadic,
}

impl ParamSpec {
    fn parse(form: &str, spec: &Value) -> Result<ParamSpec, Error> {
        if let Value::Atom(name) = spec
            && name == VARIADIC_MARKER
        {
            return Ok(ParamSpec::Variadic);
        }

        let items = spec.proper_list().ok_or_else(|| {
            Error::invalid_form(format!(
                "{form} parameters must be a proper list of atoms, got {spec}"
            ))
        })?;

        if let [Value::Atom(name)] = items.as_slice()
            && name == VARIADIC_MARKER
        {
            return Ok(ParamSpec::Variadic);
        }

        let mut params: Vec<String> = Vec::with_capacity(items.len());
        for item in &items {
            match item {
                Value::Atom(name) if name == VARIADIC_MARKER => {
                    return Err(Error::invalid_form(format!(
                        "{form}: {VARIADIC_MARKER} must be the only parameter"
                    )));
                }
                Value::Atom(name) => {
                    if params.contains(name) {
                        return Err(Error::invalid_form(format!(
                            "{form}: duplicate parameter name: {name}"
                        )));
                    }
                    params.push(name.clone());
                }
                other => {
                    return Err(Error::invalid_form(format!(
                        "{form} parameters must be atoms, got {other}"
                    )));
                }
            }
        }
        Ok(ParamSpec::Fixed(params))
    }

    fn arity(&self) -> Arity {
        match self {
            ParamSpec::Fixed(params) => Arity::Exact(params.len()),
            ParamSpec::Variadic => Arity::Any,
        }
    }

    /// Build the call frame. Arity has already been validated.
    fn bind(&self, args: Vec<Value>) -> Frame {
        match self {
            ParamSpec::Fixed(params) => params.iter().cloned().zip(args).collect(),
            ParamSpec::Variadic => Frame::from([(VARIADIC_ARGS.to_owned(), Value::list(args))]),
        }
    }
}

/// Build a closure over a snapshot of the current stack
fn make_closure(
    form: &str,
    args: Vec<Value>,
    env: &Environment,
    evaluate_args: bool,
) -> Result<Value, Error> {
    let [param_spec, body] = exact_args(form, args)?;
    let params = ParamSpec::parse(form, &param_spec)?;
    let captured = env.snapshot();
    let name = if evaluate_args { "lambda" } else { "lambda!" };

    Ok(Value::Procedure(Procedure::new(
        name,
        evaluate_args,
        params.arity(),
        move |args, env, depth| call_in_frame(&captured, params.bind(args), &body, env, depth),
    )))
}

/// Run a closure body on `captured ++ [frame]`, then restore the caller's stack.
/// The restore happens on the failure path too, so the caller's depth is unchanged.
fn call_in_frame(
    captured: &Environment,
    frame: Frame,
    body: &Value,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    let mut call_env = captured.clone();
    call_env.push(frame);
    let pushed_depth = call_env.depth();
    let caller_env = std::mem::replace(env, call_env);
    trace!(frames = pushed_depth, "pushed closure frame");

    let result = eval_with_depth_tracking(body, env, depth + 1);

    debug_assert_eq!(env.depth(), pushed_depth, "closure body left the stack unbalanced");
    *env = caller_env;
    trace!(frames = env.depth(), "popped closure frame");
    result
}

/// `lambda` and `mk-lambda`: the closure evaluates its arguments
pub(crate) fn eval_lambda(
    args: Vec<Value>,
    env: &mut Environment,
    _depth: usize,
) -> Result<Value, Error> {
    make_closure("lambda", args, env, true)
}

/// `lambda!` and `mk-lambda!`: the closure receives its arguments unevaluated
pub(crate) fn eval_lambda_unevaluated(
    args: Vec<Value>,
    env: &mut Environment,
    _depth: usize,
) -> Result<Value, Error> {
    make_closure("lambda!", args, env, false)
}

/// Evaluate an already-evaluated argument once more, as code
pub(crate) fn eval_evaluate(
    args: Vec<Value>,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    let [expr] = exact_args("evaluate", args)?;
    eval_with_depth_tracking(&expr, env, depth + 1)
}

fn binding_name(form: &str, name: &Value) -> Result<String, Error> {
    match name {
        Value::Atom(name) => Ok(name.clone()),
        other => Err(Error::invalid_form(format!(
            "{form} requires an atom name, got {other}"
        ))),
    }
}

/// `let!`: bind in the innermost frame and return the bound value
pub(crate) fn eval_let(
    args: Vec<Value>,
    env: &mut Environment,
    _depth: usize,
) -> Result<Value, Error> {
    let [name, value] = exact_args("let!", args)?;
    let name = binding_name("let!", &name)?;
    env.bind_innermost(name, value.clone())?;
    Ok(value)
}

/// `let-parent!`: bind in the frame enclosing the innermost one
pub(crate) fn eval_let_parent(
    args: Vec<Value>,
    env: &mut Environment,
    _depth: usize,
) -> Result<Value, Error> {
    let [name, value] = exact_args("let-parent!", args)?;
    let name = binding_name("let-parent!", &name)?;
    env.bind_parent(name, value.clone())?;
    Ok(value)
}

/// `(. outer inner)`: a procedure with `inner`'s policy and arity that feeds
/// `inner`'s result to `outer`
pub(crate) fn eval_compose(
    args: Vec<Value>,
    _env: &mut Environment,
    _depth: usize,
) -> Result<Value, Error> {
    let [outer, inner] = exact_args(".", args)?;
    let (Value::Procedure(outer), Value::Procedure(inner)) = (&outer, &inner) else {
        return Err(Error::invalid_form(". requires two procedures"));
    };
    let (outer, inner) = (outer.clone(), inner.clone());

    let name = format!("{} . {}", outer.name, inner.name);
    Ok(Value::Procedure(Procedure::new(
        name,
        inner.evaluate_args,
        inner.arity,
        move |args, env, depth| {
            let intermediate = (inner.body)(args, env, depth)?;
            apply_values(&outer, vec![intermediate], env, depth)
        },
    )))
}

/// Load a source file and evaluate its expressions in order in the current stack
pub(crate) fn eval_import(
    args: Vec<Value>,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    let [path] = exact_args("import", args)?;
    let path = path
        .as_text()
        .ok_or_else(|| Error::type_mismatch(format!("import requires a string path, got {path}")))?;

    let source = std::fs::read_to_string(&path)
        .map_err(|e| Error::EvalError(format!("cannot import {path}: {e}")))?;
    let exprs = parse_program(&source)?;
    debug!(path = %path, expressions = exprs.len(), "importing module");

    let mut last = Value::Null;
    for expr in &exprs {
        last = eval_with_depth_tracking(expr, env, depth + 1)?;
    }
    Ok(last)
}

/// Create a global environment: one frame holding every primitive and constant
pub fn create_global_env() -> Environment {
    let mut globals = Frame::new();

    for builtin_op in get_builtin_ops() {
        globals.insert(builtin_op.id.to_owned(), builtin_op.to_procedure());
    }
    for (name, value) in builtin_constants() {
        globals.insert(name.to_owned(), value);
    }

    debug!(bindings = globals.len(), "created global environment");
    let mut env = Environment::new();
    env.push(globals);
    env
}
