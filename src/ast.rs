//! This module defines the expression model shared by the reader, the evaluator and
//! the primitive table. The main enum, [`Value`], is a closed union of atoms, exact
//! rational numbers, booleans, the empty list, cons cells and procedures. Lists are
//! right-nested chains of [`Value::Cell`] terminated by [`Value::Null`], and text is
//! layered on top as a proper list of character codes.
//!
//! Ergonomic helper functions such as [`val`], [`atom`] and [`nil`] are provided for
//! convenient construction in code and tests, together with `From` conversions for
//! Rust integers, booleans, string slices, arrays and vectors. Equality and display
//! follow Lisp conventions: equality is structural except for procedures, which are
//! only equal to themselves.

use crate::Error;
use crate::evaluator::{Arity, Environment, ProcedureFn};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::ToPrimitive;
use std::sync::Arc;

/// Type alias for number values in the interpreter
pub type Number = BigRational;

/// Allowed non-alphanumeric characters in atom names
pub(crate) const ATOM_SPECIAL_CHARS: &str = "+-*/<>=!?_$.%&^~:";

/// Check if a character may appear in an atom name
pub(crate) fn is_atom_char(c: char) -> bool {
    c.is_alphanumeric() || ATOM_SPECIAL_CHARS.contains(c)
}

/// Check if a string is a valid atom name
/// Valid: non-empty, no leading digit, no "-digit" prefix, alphanumeric + ATOM_SPECIAL_CHARS
pub(crate) fn is_valid_atom(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        None => false,
        Some(first_char) => {
            if first_char.is_ascii_digit() {
                return false;
            }

            if first_char == '-'
                && let Some(second_char) = chars.next()
                && second_char.is_ascii_digit()
            {
                return false;
            }

            name.chars().all(is_atom_char)
        }
    }
}

/// A callable value.
///
/// `body` receives the argument list (already evaluated or left as source,
/// according to `evaluate_args`), the current environment stack and the current
/// evaluation depth. Arity is checked by the caller before the body runs.
#[derive(Clone)]
pub struct Procedure {
    pub name: Arc<str>,
    pub evaluate_args: bool,
    pub arity: Arity,
    pub(crate) body: Arc<ProcedureFn>,
}

impl Procedure {
    pub fn new<F>(name: impl Into<Arc<str>>, evaluate_args: bool, arity: Arity, body: F) -> Self
    where
        F: Fn(Vec<Value>, &mut Environment, usize) -> Result<Value, Error> + Send + Sync + 'static,
    {
        Procedure {
            name: name.into(),
            evaluate_args,
            arity,
            body: Arc::new(body),
        }
    }

    /// Identity comparison: two procedures are the same only if they share a body
    pub fn same_as(&self, other: &Procedure) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }
}

impl std::fmt::Debug for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Procedure({}, arity={:?}, evaluate_args={})",
            self.name, self.arity, self.evaluate_args
        )
    }
}

/// Core expression type in the interpreter
///
/// To build expressions, use the ergonomic helper functions:
/// - `val(42)` for numbers, `val(true)` for booleans, `val("hi")` for text
/// - `atom("name")` for atoms, `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![atom("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    /// Symbolic identifier, resolved by environment lookup
    Atom(String),
    /// Exact rational number
    Number(Number),
    /// Boolean values
    Bool(bool),
    /// The empty list
    Null,
    /// Cons pair
    Cell(Arc<Value>, Arc<Value>),
    /// Built-in primitives and closures
    Procedure(Procedure),
}

impl Value {
    pub fn cons(head: Value, tail: Value) -> Value {
        Value::Cell(Arc::new(head), Arc::new(tail))
    }

    /// Build a proper list from the given elements
    pub fn list<I>(items: I) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        Value::list_with_tail(items, Value::Null)
    }

    /// Build a list whose final cdr is `tail` (improper unless `tail` is a list)
    pub fn list_with_tail<I>(items: I, tail: Value) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons(item, acc))
    }

    pub fn integer(n: i64) -> Value {
        Value::Number(Number::from_integer(BigInt::from(n)))
    }

    /// Check if a value represents the empty list
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Iterate over the heads of a cell chain. Iteration stops at the first
    /// non-cell tail; use [`Value::proper_list`] to reject improper chains.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter { current: self }
    }

    /// Check if a value is a `Null`-terminated chain of cells
    pub fn is_proper_list(&self) -> bool {
        let mut iter = self.iter();
        iter.by_ref().for_each(|_| {});
        iter.current.is_null()
    }

    /// Collect the elements of a proper list, or `None` for improper chains
    /// and non-list values
    pub fn proper_list(&self) -> Option<Vec<Value>> {
        let mut iter = self.iter();
        let items: Vec<Value> = iter.by_ref().cloned().collect();
        iter.current.is_null().then_some(items)
    }

    /// Encode host text as a proper list of character codes
    pub fn from_text(text: &str) -> Value {
        let codes: Vec<Value> = text
            .chars()
            .map(|c| Value::integer(i64::from(u32::from(c))))
            .collect();
        Value::list(codes)
    }

    /// Decode a list of character codes back into host text. Returns `None`
    /// unless every element is an integer naming a Unicode scalar value.
    pub fn as_text(&self) -> Option<String> {
        let mut text = String::new();
        let mut iter = self.iter();
        for item in iter.by_ref() {
            let Value::Number(n) = item else {
                return None;
            };
            if !n.is_integer() {
                return None;
            }
            let code = n.to_integer().to_u32()?;
            text.push(char::from_u32(code)?);
        }
        iter.current.is_null().then_some(text)
    }
}

/// Iterator over the heads of a cell chain
pub struct ListIter<'a> {
    current: &'a Value,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current {
            Value::Cell(head, tail) => {
                self.current = tail.as_ref();
                Some(head.as_ref())
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Atom(name) => write!(f, "Atom({name})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Null => write!(f, "Null"),
            Value::Cell(head, tail) => write!(f, "Cell({head:?}, {tail:?})"),
            Value::Procedure(p) => write!(f, "{p:?}"),
        }
    }
}

// From trait implementations for Value - enables .into() conversion

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::Number(n)
    }
}

/// Text converts to its character-code list encoding
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::from_text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::from_text(&s)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(Number::from_integer(BigInt::from(n)))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(i64);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);
impl_from_integer!(u64);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into))
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::list(slice.iter().cloned().map(Into::into))
    }
}

/// Helper function for creating atoms - works great in mixed lists!
pub fn atom<S: AsRef<str>>(name: S) -> Value {
    Value::Atom(name.as_ref().to_owned())
}

/// Helper function for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for the empty list
pub fn nil() -> Value {
    Value::Null
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Atom(name) => write!(f, "{name}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Null => write!(f, "()"),
            Value::Cell(head, tail) => {
                write!(f, "({head}")?;
                let mut rest = tail.as_ref();
                loop {
                    match rest {
                        Value::Null => break,
                        Value::Cell(head, tail) => {
                            write!(f, " {head}")?;
                            rest = tail.as_ref();
                        }
                        other => {
                            write!(f, " . {other}")?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Value::Procedure(p) => write!(f, "#<procedure:{}>", p.name),
        }
    }
}

/// Take a cell out of a uniquely owned slot, leaving `Null` behind
fn take_unique_cell(slot: &mut Arc<Value>) -> Option<Value> {
    let value = Arc::get_mut(slot)?;
    matches!(value, Value::Cell(..)).then(|| std::mem::replace(value, Value::Null))
}

impl Drop for Value {
    // Unlink owned cells onto a work list so long or deep chains drop without
    // recursing once per cell. Shared cells are left to their other owners.
    fn drop(&mut self) {
        let Value::Cell(head, tail) = self else {
            return;
        };
        let mut pending: Vec<Value> = Vec::new();
        pending.extend(take_unique_cell(head));
        pending.extend(take_unique_cell(tail));

        while let Some(mut value) = pending.pop() {
            if let Value::Cell(head, tail) = &mut value {
                pending.extend(take_unique_cell(head));
                pending.extend(take_unique_cell(tail));
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let (mut left, mut right) = (self, other);
        // Walk cell tails iteratively so long lists don't recurse per element
        loop {
            return match (left, right) {
                (Value::Atom(a), Value::Atom(b)) => a == b,
                (Value::Number(a), Value::Number(b)) => a == b,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::Null, Value::Null) => true,
                (Value::Cell(h1, t1), Value::Cell(h2, t2)) => {
                    if h1 != h2 {
                        return false;
                    }
                    left = t1.as_ref();
                    right = t2.as_ref();
                    continue;
                }
                (Value::Procedure(a), Value::Procedure(b)) => a.same_as(b),
                _ => false,
            };
        }
    }
}
