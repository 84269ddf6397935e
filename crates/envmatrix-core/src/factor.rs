//! Factor expansion for environment name expressions.
//!
//! An expression like `py{311,312}{,-mindeps}` expands to the cartesian
//! product of its literal segments and brace groups, left to right:
//! `py311`, `py311-mindeps`, `py312`, `py312-mindeps`. Expansion is
//! deterministic and order-preserving — alternatives are emitted in the
//! order they are written.
//!
//! A brace group may contain one empty alternative (the optional-suffix
//! form `{,-mindeps}`), but a group whose alternatives are all empty, an
//! unbalanced brace, or a nested brace is rejected with
//! [`MatrixError::InvalidFactorSyntax`].

use crate::error::{MatrixError, MatrixResult};

/// One parsed piece of a factor expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Group(Vec<String>),
}

/// Expand a single factor expression into concrete names, preserving order.
pub fn expand_factors(expr: &str) -> MatrixResult<Vec<String>> {
    let segments = parse_segments(expr)?;

    let mut names = vec![String::new()];
    for segment in &segments {
        match segment {
            Segment::Literal(lit) => {
                for name in &mut names {
                    name.push_str(lit);
                }
            }
            Segment::Group(alternatives) => {
                let mut next = Vec::with_capacity(names.len() * alternatives.len());
                for name in &names {
                    for alt in alternatives {
                        let mut combined = name.clone();
                        combined.push_str(alt);
                        next.push(combined);
                    }
                }
                names = next;
            }
        }
    }

    Ok(names)
}

/// Expand a list of expressions, concatenating results in input order.
///
/// Duplicates arising from overlapping expressions are dropped, keeping the
/// first occurrence so the overall order stays stable.
pub fn expand_all(exprs: &[String]) -> MatrixResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for expr in exprs {
        for name in expand_factors(expr)? {
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }
    Ok(out)
}

/// Split a comma-separated selection list without breaking brace groups.
///
/// `py{311,312},lint` yields `["py{311,312}", "lint"]`: a comma inside a
/// brace group separates factor alternatives, not list entries. Empty
/// entries (doubled or trailing commas) are dropped. Unbalanced braces are
/// left for [`expand_factors`] to reject.
pub fn split_selection(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in list.chars() {
        match ch {
            '{' => {
                depth += 1;
                current.push(ch);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    parts.push(current);
    parts.retain(|part| !part.is_empty());
    parts
}

/// Split a concrete environment name into its factors (dash-separated parts).
///
/// `py311-mindeps` has the factors `py311` and `mindeps`; dependency-set
/// selectors match against these.
pub fn factors_of(name: &str) -> Vec<String> {
    name.split('-')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_segments(expr: &str) -> MatrixResult<Vec<Segment>> {
    let err = |detail: &str| MatrixError::InvalidFactorSyntax {
        expr: expr.to_string(),
        detail: detail.to_string(),
    };

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut group: Option<Vec<String>> = None;
    let mut current_alt = String::new();

    for ch in expr.chars() {
        match ch {
            '{' => {
                if group.is_some() {
                    return Err(err("nested braces are not supported"));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                group = Some(Vec::new());
            }
            '}' => match group.take() {
                Some(mut alternatives) => {
                    alternatives.push(std::mem::take(&mut current_alt));
                    if alternatives.iter().all(String::is_empty) {
                        return Err(err("brace group has no non-empty alternative"));
                    }
                    segments.push(Segment::Group(alternatives));
                }
                None => return Err(err("unmatched '}'")),
            },
            ',' => match group.as_mut() {
                Some(alternatives) => alternatives.push(std::mem::take(&mut current_alt)),
                None => literal.push(','),
            },
            other => match group.as_mut() {
                Some(_) => current_alt.push(other),
                None => literal.push(other),
            },
        }
    }

    if group.is_some() {
        return Err(err("unmatched '{'"));
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    if segments.is_empty() {
        return Err(err("empty expression"));
    }

    Ok(segments)
}
