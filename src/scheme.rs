use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace1, not_line_ending},
    combinator::{cut, opt, peek, recognize, value},
    error::ErrorKind,
    multi::many0,
    sequence::{preceded, terminated},
};
use num_bigint::BigInt;
use num_traits::Zero;

use crate::Error;
use crate::MAX_PARSE_DEPTH;
use crate::ast::{Number, Value, is_atom_char, is_valid_atom};

/// Convert nom parsing errors to user-friendly messages
fn parse_error_to_message(input: &str, error: nom::Err<nom::error::Error<&str>>) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            match e.code {
                ErrorKind::Char => format!("Expected character at position {position}"),
                ErrorKind::TooLarge => {
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})")
                }
                _ => {
                    if position < input.len() {
                        let remaining_chars: String =
                            input.chars().skip(position).take(10).collect();
                        format!("Invalid syntax near '{remaining_chars}'")
                    } else {
                        "Unexpected end of input".into()
                    }
                }
            }
        }
        nom::Err::Incomplete(_) => "Incomplete input".into(),
    }
}

/// Skip whitespace and `;` line comments
fn skip_space(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((multispace1, preceded(char(';'), not_line_ending)))),
    )
    .parse(input)
}

fn reject(input: &str, kind: ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Convert a recognized numeric literal into an exact rational
fn number_from_literal(text: &str) -> Option<Number> {
    if let Some((numer, denom)) = text.split_once('/') {
        let numer: BigInt = numer.parse().ok()?;
        let denom: BigInt = denom.parse().ok()?;
        if denom.is_zero() {
            return None;
        }
        return Some(Number::new(numer, denom));
    }

    if let Some((whole, fraction)) = text.split_once('.') {
        // 12.5 reads as 125/10
        let digits: BigInt = format!("{whole}{fraction}").parse().ok()?;
        let scale = BigInt::from(10u32).pow(u32::try_from(fraction.len()).ok()?);
        return Some(Number::new(digits, scale));
    }

    text.parse::<BigInt>().ok().map(Number::from_integer)
}

/// Parse a number: integer, fraction (`1/3`) or exact decimal (`0.25`)
fn parse_number(input: &str) -> IResult<&str, Value> {
    let (remaining, literal) = recognize((
        opt(char('-')),
        digit1,
        opt(alt((
            preceded(char('/'), digit1),
            preceded(char('.'), digit1),
        ))),
    ))
    .parse(input)?;

    // `12abc` and `1/2/3` are neither numbers nor atoms
    if remaining.starts_with(is_atom_char) {
        return Err(reject(input, ErrorKind::Digit));
    }

    match number_from_literal(literal) {
        Some(n) => Ok((remaining, Value::Number(n))),
        None => Err(reject(input, ErrorKind::Digit)),
    }
}

/// Parse a boolean (#t or #f)
fn parse_bool(input: &str) -> IResult<&str, Value> {
    let (remaining, parsed) = alt((
        value(Value::Bool(true), tag("#t")),
        value(Value::Bool(false), tag("#f")),
    ))
    .parse(input)?;

    if remaining.starts_with(is_atom_char) {
        return Err(reject(input, ErrorKind::Tag));
    }
    Ok((remaining, parsed))
}

/// Parse an atom (identifier)
fn parse_atom(input: &str) -> IResult<&str, Value> {
    let (remaining, candidate) = take_while1(is_atom_char).parse(input)?;

    if is_valid_atom(candidate) {
        Ok((remaining, Value::Atom(candidate.into())))
    } else {
        Err(reject(input, ErrorKind::Alpha))
    }
}

/// Parse a string literal into `(quote <character codes>)`, so it evaluates to
/// its own code list
fn parse_string(input: &str) -> IResult<&str, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => {
                let literal = Value::from_text(&text);
                let quoted = Value::list([Value::Atom("quote".into()), literal]);
                return Ok((char_iter.as_str(), quoted));
            }
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    // Unknown escape or backslash at end of input
                    Some(_) | None => return Err(reject(remaining, ErrorKind::Char)),
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = char_iter.as_str();
            }
            // Unterminated
            None => return Err(reject(remaining, ErrorKind::Char)),
        }
    }
}

/// Parse quoted expression ('expr -> (quote expr))
fn parse_quote(input: &str, depth: usize) -> IResult<&str, Value> {
    let (input, _) = char('\'').parse(input)?;
    let (input, expr) = cut(|input| parse_sexpr(input, depth + 1)).parse(input)?;
    Ok((input, Value::list([Value::Atom("quote".into()), expr])))
}

fn close_paren(input: &str) -> IResult<&str, char> {
    char(')').parse(input)
}

/// A lone `.` followed by whitespace separates the final cdr of a dotted list
fn dot_separator(input: &str) -> IResult<&str, char> {
    terminated(char('.'), peek(multispace1)).parse(input)
}

/// Parse a list, including dotted tails such as `(a b . c)`. Once the opening
/// parenthesis is consumed, errors are committed.
fn parse_list(input: &str, depth: usize) -> IResult<&str, Value> {
    let (input, _) = char('(').parse(input)?;
    cut(|input| parse_list_items(input, depth)).parse(input)
}

fn parse_list_items(mut input: &str, depth: usize) -> IResult<&str, Value> {
    let mut items = Vec::new();

    loop {
        let (rest, _) = skip_space(input)?;

        if let Ok((rest, _)) = close_paren(rest) {
            return Ok((rest, Value::list(items)));
        }

        if !items.is_empty()
            && let Ok((after_dot, _)) = dot_separator(rest)
        {
            let (after_tail, tail) = parse_sexpr(after_dot, depth + 1)?;
            let (after_close, _) = preceded(skip_space, close_paren).parse(after_tail)?;
            return Ok((after_close, Value::list_with_tail(items, tail)));
        }

        let (rest, item) = parse_sexpr(rest, depth + 1)?;
        items.push(item);
        input = rest;
    }
}

/// Parse one S-expression, skipping leading whitespace and comments
fn parse_sexpr(input: &str, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        // Failure, not Error, so `alt` does not try the remaining branches
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    preceded(
        skip_space,
        alt((
            |input| parse_quote(input, depth),
            |input| parse_list(input, depth),
            parse_number,
            parse_bool,
            parse_string,
            parse_atom,
        )),
    )
    .parse(input)
}

/// Parse exactly one S-expression from input.
pub fn parse_scheme(input: &str) -> Result<Value, Error> {
    match terminated(|input| parse_sexpr(input, 0), skip_space).parse(input) {
        Ok(("", value)) => Ok(value),
        Ok((remaining, _)) => Err(Error::ParseError(format!(
            "Unexpected remaining input: '{remaining}'"
        ))),
        Err(e) => Err(Error::ParseError(parse_error_to_message(input, e))),
    }
}

/// Parse a whole program: zero or more S-expressions separated by whitespace
/// or comments.
pub fn parse_program(input: &str) -> Result<Vec<Value>, Error> {
    let mut exprs = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, _) = skip_space(remaining)
            .map_err(|e| Error::ParseError(parse_error_to_message(input, e)))?;
        if rest.is_empty() {
            return Ok(exprs);
        }
        let (rest, expr) = parse_sexpr(rest, 0)
            .map_err(|e| Error::ParseError(parse_error_to_message(input, e)))?;
        exprs.push(expr);
        remaining = rest;
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{atom, nil, val};

    /// Test result variants for comprehensive parsing tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(Value),              // Parsing should succeed with this value
        SpecificError(&'static str), // Parsing should fail with error containing this string
        Error,                       // Parsing should fail (any error)
    }
    use ParseTestResult::*;

    /// Helper for successful parse test cases
    fn success<T: Into<Value>>(value: T) -> ParseTestResult {
        Success(value.into())
    }

    fn rational(numer: i64, denom: i64) -> ParseTestResult {
        Success(Value::Number(Number::new(numer.into(), denom.into())))
    }

    fn quoted(value: Value) -> Value {
        val(vec![atom("quote"), value])
    }

    /// A string literal reads as its quoted character-code list
    fn text(s: &str) -> ParseTestResult {
        Success(quoted(val(s)))
    }

    /// Run parse tests; successful parses are also checked to survive
    /// display -> parse -> display unchanged
    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Parse test #{}", i + 1);
            let result = parse_scheme(input);

            match (result, expected) {
                (Ok(actual), Success(expected_val)) => {
                    assert_eq!(actual, *expected_val, "{test_id}: value mismatch for '{input}'");

                    let displayed = format!("{actual}");
                    let reparsed = parse_scheme(&displayed).unwrap_or_else(|e| {
                        panic!("{test_id}: round-trip parse failed for '{displayed}': {e:?}")
                    });
                    let redisplayed = format!("{reparsed}");
                    assert_eq!(
                        displayed, redisplayed,
                        "{test_id}: round-trip display mismatch for '{input}'"
                    );
                }
                (Err(_), Error) => {}
                (Err(err), SpecificError(expected_text)) => {
                    let error_msg = format!("{err:?}");
                    assert!(
                        error_msg.contains(expected_text),
                        "{test_id}: error for '{input}' should contain '{expected_text}', got {error_msg}"
                    );
                }
                (Ok(actual), Error) => {
                    panic!("{test_id}: expected error for '{input}', got {actual:?}");
                }
                (Ok(actual), SpecificError(expected_text)) => {
                    panic!(
                        "{test_id}: expected error containing '{expected_text}', got {actual:?}"
                    );
                }
                (Err(err), Success(_)) => {
                    panic!("{test_id}: expected success for '{input}', got error {err:?}");
                }
            }
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_parser_comprehensive() {
        let test_cases = vec![
            // ===== NUMBER PARSING =====
            ("42", success(42)),
            ("-5", success(-5)),
            ("0", success(0)),
            ("-0", success(0)),
            ("9223372036854775807", success(i64::MAX)),
            ("1/3", rational(1, 3)),
            ("-2/6", rational(-1, 3)),
            ("4/2", success(2)),
            ("0.5", rational(1, 2)),
            ("-1.25", rational(-5, 4)),
            ("3.14", rational(157, 50)),
            ("10.0", success(10)),
            // Arbitrary precision
            (
                "123456789012345678901234567890",
                Success(Value::Number(Number::from_integer(
                    "123456789012345678901234567890".parse().unwrap(),
                ))),
            ),
            // Number parsing failures
            ("1/0", Error),
            ("1/", Error),
            ("1.", Error),
            (".5", success(atom(".5"))),
            ("1/2/3", Error),
            ("1.5.2", Error),
            ("123abc", Error),
            // ===== ATOM PARSING =====
            ("foo", success(atom("foo"))),
            ("+", success(atom("+"))),
            ("-", success(atom("-"))),
            (">=", success(atom(">="))),
            (".", success(atom("."))),
            ("let!", success(atom("let!"))),
            ("let-parent!", success(atom("let-parent!"))),
            ("proc?", success(atom("proc?"))),
            ("to-str", success(atom("to-str"))),
            ("*", success(atom("*"))),
            ("a.b", success(atom("a.b"))),
            ("x%y&z^w~v:u$t_s", success(atom("x%y&z^w~v:u$t_s"))),
            ("-abc", success(atom("-abc"))),
            ("var123", success(atom("var123"))),
            // Invalid atoms
            ("123var", Error),
            ("-42name", Error),
            ("test@home", Error),
            ("test#tag", Error),
            ("test space", Error),
            // ===== BOOLEAN PARSING =====
            ("#t", success(true)),
            ("#f", success(false)),
            ("#T", Error),
            ("#true", Error),
            ("#fx", Error),
            // ===== STRING PARSING =====
            ("\"hello\"", text("hello")),
            ("\"hello world\"", text("hello world")),
            ("\"hi\"", Success(quoted(val([104, 105])))),
            (r#""hello\nworld""#, text("hello\nworld")),
            (r#""tab\there""#, text("tab\there")),
            (r#""carriage\rreturn""#, text("carriage\rreturn")),
            (r#""quote\"test""#, text("quote\"test")),
            (r#""backslash\\test""#, text("backslash\\test")),
            ("\"λ\"", Success(quoted(val([0x3bb])))),
            ("\"\"", Success(quoted(nil()))),
            (r#""other\xchar""#, Error),
            (r#""unterminated"#, Error),
            (r#""unterminated\"#, Error),
            // ===== LIST PARSING =====
            ("()", Success(nil())),
            ("(   )", Success(nil())),
            ("(42)", success([42])),
            ("(1 2 3)", success([1, 2, 3])),
            (
                "(1 hello \"hi\" #t)",
                success(vec![val(1), atom("hello"), quoted(val("hi")), val(true)]),
            ),
            ("((1 2) (3 4))", success([[1, 2], [3, 4]])),
            ("(((1)))", success([val([val([val(1)])])])),
            ("(a(b)c)", success(vec![atom("a"), val([atom("b")]), atom("c")])),
            ("(. f g)", success(vec![atom("."), atom("f"), atom("g")])),
            ("(f .)", success(vec![atom("f"), atom(".")])),
            // Dotted tails
            ("(1 . 2)", Success(Value::cons(val(1), val(2)))),
            (
                "(1 2 . 3)",
                Success(Value::list_with_tail([val(1), val(2)], val(3))),
            ),
            ("(1 . (2 3))", success([1, 2, 3])),
            ("(1 . ())", success([1])),
            ("(1 .5)", success(vec![val(1), atom(".5")])),
            ("( . 1)", success(vec![atom("."), val(1)])),
            ("(1 . )", Error),
            ("(1 . 2 3)", Error),
            // ===== QUOTE PARSING =====
            ("'foo", Success(quoted(atom("foo")))),
            ("'(1 2 3)", Success(quoted(val([1, 2, 3])))),
            ("'()", Success(quoted(nil()))),
            ("''a", Success(quoted(quoted(atom("a"))))),
            ("(quote foo)", Success(quoted(atom("foo")))),
            ("'", Error),
            // ===== WHITESPACE AND COMMENTS =====
            ("  42  ", success(42)),
            ("\t#t\n", success(true)),
            ("( 1   2\t\n3 )", success([1, 2, 3])),
            ("; leading comment\n42", success(42)),
            ("42 ; trailing comment", success(42)),
            ("(1 ; inside\n 2)", success([1, 2])),
            ("(1 2) ;", success([1, 2])),
            // ===== GENERAL ERROR CASES =====
            ("(1 2 3", SpecificError("ParseError")),
            ("((1 2)", SpecificError("ParseError")),
            ("(1 2))", SpecificError("Unexpected remaining input")),
            (")", SpecificError("ParseError")),
            ("", SpecificError("ParseError")),
            ("   ", SpecificError("ParseError")),
            ("; only a comment", SpecificError("ParseError")),
            ("1 2", SpecificError("Unexpected remaining input")),
            ("(+ 1 2) (+ 3 4)", SpecificError("ParseError")),
            ("@invalid", SpecificError("Invalid syntax")),
        ];

        run_parse_tests(test_cases);
    }

    #[test]
    fn test_parser_depth_limits() {
        let parens_under_limit = format!(
            "{}unbound{}",
            "(".repeat(MAX_PARSE_DEPTH - 1),
            ")".repeat(MAX_PARSE_DEPTH - 1)
        );
        let quotes_under_limit = format!("{}unbound", "'".repeat(MAX_PARSE_DEPTH - 1));
        let deep_parens_at_limit = format!(
            "{}1{}",
            "(".repeat(MAX_PARSE_DEPTH),
            ")".repeat(MAX_PARSE_DEPTH)
        );
        let deep_quotes_at_limit = format!("{}a", "'".repeat(MAX_PARSE_DEPTH));

        let depth_test_cases = vec![
            (deep_parens_at_limit.as_str(), SpecificError("too deeply nested")),
            (deep_quotes_at_limit.as_str(), SpecificError("too deeply nested")),
        ];
        run_parse_tests(depth_test_cases);

        assert!(
            parse_scheme(&parens_under_limit).is_ok(),
            "Parens just under depth limit should parse successfully"
        );
        assert!(
            parse_scheme(&quotes_under_limit).is_ok(),
            "Quotes just under depth limit should parse successfully"
        );

        // The limit applies to each expression of a program independently
        let program = format!("{parens_under_limit}\n{parens_under_limit}");
        assert_eq!(parse_program(&program).unwrap().len(), 2);
        assert!(parse_program(&deep_parens_at_limit).is_err());
    }

    #[test]
    fn test_parse_program() {
        let cases: Vec<(&str, Result<Vec<Value>, ()>)> = vec![
            ("", Ok(vec![])),
            ("   \n\t", Ok(vec![])),
            ("; nothing but a comment\n", Ok(vec![])),
            ("42", Ok(vec![val(42)])),
            ("1 2 3", Ok(vec![val(1), val(2), val(3)])),
            (
                "(let! 'x 5)\n; comment between\n(+ x 1)",
                Ok(vec![
                    val(vec![atom("let!"), quoted(atom("x")), val(5)]),
                    val(vec![atom("+"), atom("x"), val(1)]),
                ]),
            ),
            ("(a)(b)", Ok(vec![val([atom("a")]), val([atom("b")])])),
            ("1 (2", Err(())),
            ("1 )", Err(())),
        ];

        for (input, expected) in cases {
            let result = parse_program(input).map_err(|_| ());
            assert_eq!(result, expected, "parse_program({input:?})");
        }
    }

    #[test]
    fn test_parse_error_messages() {
        let err = parse_scheme("(1 2").unwrap_err();
        assert!(matches!(err, crate::Error::ParseError(_)));
        assert_eq!(format!("{err}"), "ParseError: Unexpected end of input");

        let err = parse_scheme("#").unwrap_err();
        assert_eq!(format!("{err}"), "ParseError: Invalid syntax near '#'");
    }
}
