//! Boolean condition evaluation over a device context.
//!
//! Template conditions decide whether a declared register is active for a
//! concrete device instance, e.g.
//! `(meter_type == 'DTSU666' or meter_type == 'DTSU666-20') and phases > 1`.
//!
//! `or` binds looser than `and`; parentheses group sub-expressions. Anything
//! the grammar does not recognize evaluates to false: a malformed expression
//! or a missing context key must make its register inactive, never break the
//! poll path.

use std::cmp::Ordering;

use crate::context::{ContextValue, DeviceContext};

/// Recursion limit. Each `and`/`or` split recurses once per operand, so this
/// also caps the number of clauses in a chain; real templates stay in single
/// digits.
const MAX_DEPTH: usize = 32;

/// Evaluate a condition expression against a device context.
pub fn evaluate(expression: &str, context: &DeviceContext) -> bool {
    evaluate_at(expression, context, 0)
}

fn evaluate_at(expression: &str, context: &DeviceContext, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }
    let expr = strip_outer_parens(expression.trim());
    if expr.is_empty() {
        return false;
    }

    // OR has the lowest precedence, so it splits first.
    if let Some((left, right)) = split_top_level(expr, " or ") {
        return evaluate_at(left, context, depth + 1) || evaluate_at(right, context, depth + 1);
    }
    if let Some((left, right)) = split_top_level(expr, " and ") {
        return evaluate_at(left, context, depth + 1) && evaluate_at(right, context, depth + 1);
    }

    evaluate_comparison(expr, context)
}

/// Remove parentheses that wrap the whole expression, repeatedly.
fn strip_outer_parens(mut expr: &str) -> &str {
    while expr.starts_with('(') && expr.ends_with(')') {
        let mut depth = 0i32;
        let mut outer = true;
        for (i, c) in expr.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 && i < expr.len() - 1 {
                        outer = false;
                        break;
                    }
                }
                _ => {}
            }
        }
        if !outer || depth != 0 {
            break;
        }
        expr = expr[1..expr.len() - 1].trim();
    }
    expr
}

/// Split on the first occurrence of `token` at parenthesis depth zero and
/// outside quotes. Returns None if the token does not occur there.
fn split_top_level<'a>(expr: &'a str, token: &str) -> Option<(&'a str, &'a str)> {
    let bytes = expr.as_bytes();
    let token_bytes = token.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i + token_bytes.len() <= bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                b'\'' | b'"' => quote = Some(c),
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ => {
                    if depth == 0 && &bytes[i..i + token_bytes.len()] == token_bytes {
                        let left = expr[..i].trim();
                        let right = expr[i + token_bytes.len()..].trim();
                        if !left.is_empty() && !right.is_empty() {
                            return Some((left, right));
                        }
                    }
                }
            },
        }
        i += 1;
    }
    None
}

fn evaluate_comparison(expr: &str, context: &DeviceContext) -> bool {
    if let Some((key, rest)) = split_top_level(expr, " not in ") {
        return matches!(membership(key, rest, context), Some(false));
    }
    if let Some((key, rest)) = split_top_level(expr, " in ") {
        return matches!(membership(key, rest, context), Some(true));
    }

    let Some((pos, op)) = find_operator(expr) else {
        return false;
    };
    let key = expr[..pos].trim();
    let Some(actual) = context.get(key) else {
        // Missing context key fails closed.
        return false;
    };
    let Some(literal) = Literal::parse(expr[pos + op.len()..].trim()) else {
        return false;
    };

    match op {
        "==" => literal.matches(&actual),
        "!=" => !literal.matches(&actual),
        ">" => literal.compare(&actual) == Some(Ordering::Greater),
        ">=" => matches!(
            literal.compare(&actual),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "<" => literal.compare(&actual) == Some(Ordering::Less),
        "<=" => matches!(
            literal.compare(&actual),
            Some(Ordering::Less | Ordering::Equal)
        ),
        _ => false,
    }
}

/// Locate the first comparison operator outside quotes, longest match first
/// so `>=` is never read as `>`.
fn find_operator(expr: &str) -> Option<(usize, &'static str)> {
    let bytes = expr.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' | b'"' => quote = Some(c),
            b'=' | b'!' | b'>' | b'<' => {
                let eq_follows = i + 1 < bytes.len() && bytes[i + 1] == b'=';
                let op = match (c, eq_follows) {
                    (b'=', true) => "==",
                    (b'!', true) => "!=",
                    (b'>', true) => ">=",
                    (b'<', true) => "<=",
                    (b'>', false) => ">",
                    (b'<', false) => "<",
                    // A lone '=' or '!' is malformed.
                    _ => return None,
                };
                return Some((i, op));
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Evaluate `key in [a, b, c]` style membership. None means the key is
/// missing or the list is malformed (caller fails closed either way).
fn membership(key: &str, list: &str, context: &DeviceContext) -> Option<bool> {
    let actual = context.get(key.trim())?;
    let list = list.trim();
    let inner = list
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(list);

    let mut found_any_member = false;
    for raw in inner.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let member = Literal::parse(raw)?;
        found_any_member = true;
        if member.matches(&actual) {
            return Some(true);
        }
    }
    if found_any_member { Some(false) } else { None }
}

/// A right-hand-side literal in a comparison.
enum Literal {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Literal {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() >= 2
            && ((raw.starts_with('\'') && raw.ends_with('\''))
                || (raw.starts_with('"') && raw.ends_with('"')))
        {
            return Some(Self::Text(raw[1..raw.len() - 1].to_string()));
        }
        match raw {
            "" => return None,
            "true" | "True" => return Some(Self::Bool(true)),
            "false" | "False" => return Some(Self::Bool(false)),
            _ => {}
        }
        if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            return u64::from_str_radix(hex, 16)
                .ok()
                .map(|n| Self::Number(n as f64));
        }
        if let Ok(n) = raw.parse::<f64>() {
            return Some(Self::Number(n));
        }
        // Bare words act as unquoted strings (`battery_type in [sbr, sbh]`).
        if raw
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Some(Self::Text(raw.to_string()));
        }
        None
    }

    fn matches(&self, actual: &ContextValue) -> bool {
        match self {
            Self::Bool(b) => actual.truthy() == *b,
            Self::Number(n) => actual.as_f64().is_some_and(|a| a == *n),
            Self::Text(s) => actual.as_text() == *s,
        }
    }

    /// Ordering of actual relative to the literal; numeric comparisons only.
    fn compare(&self, actual: &ContextValue) -> Option<Ordering> {
        let Self::Number(n) = self else {
            return None;
        };
        actual.as_f64()?.partial_cmp(n)
    }
}
