//! The affinity/constraint expression language.
//!
//! An expression is `key==value` or `key!=value`. Values support globs
//! (`web-*`), anchored regexes (`/^web-[0-9]+$/` written as `/^web-[0-9]+$`),
//! and exact case-insensitive comparison. Hint prefixes compose with the
//! operator: `!` inverts, `=` asserts (no-op), `~` marks the expression
//! soft — soft expressions influence ranking, never candidacy.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// Operators in scan order: the first one found in an entry wins.
const OPERATORS: &[(&str, Op)] = &[("==", Op::Eq), ("!=", Op::NotEq)];

/// Result type alias for expression parsing.
pub type ExprResult<T> = Result<T, ExprError>;

/// Errors produced while parsing expressions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("key {0:?} is invalid")]
    InvalidKey(String),

    #[error("value {0:?} is invalid")]
    InvalidValue(String),

    #[error("one of operator ==, != is expected in {0:?}")]
    MissingOperator(String),
}

/// Comparison operator of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    NotEq,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Eq => "==",
            Op::NotEq => "!=",
        })
    }
}

/// One parsed predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub key: String,
    pub operator: Op,
    /// Raw value including any hint prefixes.
    pub value: String,
}

fn key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i)[a-z_][a-z0-9\-_]+$").expect("key regex"))
}

fn value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i)[=!/~]?[a-z0-9:\-_\.\*/\(\)\?\+\[\]\\\^\$\|~]+$").expect("value regex")
    })
}

/// Parse a list of raw `key<op>value` entries, e.g. the strings stored in
/// the reserved `affinities`/`constraints` labels. Any malformed entry
/// aborts the whole parse.
pub fn parse_exprs(entries: &[String]) -> ExprResult<Vec<Expr>> {
    entries.iter().map(|entry| parse_expr(entry)).collect()
}

/// Parse env-style entries: every `<prefix>:<payload>` entry is parsed,
/// everything else is ignored.
pub fn parse_env_exprs(prefix: &str, env: &[String]) -> ExprResult<Vec<Expr>> {
    let mut exprs = Vec::new();
    for entry in env {
        if let Some(payload) = entry.strip_prefix(&format!("{prefix}:")) {
            exprs.push(parse_expr(payload)?);
        }
    }
    Ok(exprs)
}

fn parse_expr(entry: &str) -> ExprResult<Expr> {
    for (token, op) in OPERATORS {
        if let Some((key, value)) = entry.split_once(token) {
            if !key_re().is_match(key) {
                return Err(ExprError::InvalidKey(key.to_string()));
            }
            if !value_re().is_match(value) {
                return Err(ExprError::InvalidValue(value.to_string()));
            }
            return Ok(Expr {
                key: key.to_lowercase(),
                operator: *op,
                value: value.to_string(),
            });
        }
    }
    Err(ExprError::MissingOperator(entry.to_string()))
}

impl Expr {
    /// Whether this expression is a soft preference rather than a hard
    /// requirement.
    pub fn is_soft(&self) -> bool {
        let v = self.value.as_str();
        v.starts_with('~') || v.starts_with("=~") || v.starts_with("!~")
    }

    /// Render back to the `key<op>value` form. Round-trips through
    /// [`parse_exprs`] unchanged.
    pub fn render(&self) -> String {
        format!("{}{}{}", self.key, self.operator, self.value)
    }

    /// Evaluate against candidate strings: true iff at least one candidate
    /// satisfies the predicate under the operator semantics.
    pub fn match_values(&self, candidates: &[&str]) -> bool {
        let mut value = self.value.as_str();
        let mut negate = false;

        // Hint prefixes: `~` soft (ranking only, stripped here), `=` an
        // explicit assert, `!` inversion that XORs with the operator.
        loop {
            value = match value.chars().next() {
                Some('~') | Some('=') => &value[1..],
                Some('!') => {
                    negate = !negate;
                    &value[1..]
                }
                _ => break,
            };
        }

        let mut matched = candidates
            .iter()
            .any(|candidate| value_matches(value, candidate));
        if negate {
            matched = !matched;
        }
        match self.operator {
            Op::Eq => matched,
            Op::NotEq => !matched,
        }
    }
}

/// Core value comparison: `/regex`, glob, or case-insensitive equality.
fn value_matches(value: &str, candidate: &str) -> bool {
    if let Some(pattern) = value.strip_prefix('/') {
        // Anchor at both ends; compile errors are logged and treated as
        // non-matching so a bad pattern cannot fail placement wholesale.
        let mut anchored = String::with_capacity(pattern.len() + 2);
        if !pattern.starts_with('^') {
            anchored.push('^');
        }
        anchored.push_str(pattern);
        if !pattern.ends_with('$') {
            anchored.push('$');
        }
        return match Regex::new(&anchored) {
            Ok(re) => re.is_match(candidate),
            Err(e) => {
                warn!(pattern = %anchored, error = %e, "invalid expression regex");
                false
            }
        };
    }

    if value.contains('*') || value.contains('?') {
        let mut pattern = String::with_capacity(value.len() * 2 + 4);
        pattern.push_str("(?i)^");
        for c in value.chars() {
            match c {
                '*' => pattern.push_str(".*"),
                '?' => pattern.push('.'),
                other => pattern.push_str(&regex::escape(&other.to_string())),
            }
        }
        pattern.push('$');
        return match Regex::new(&pattern) {
            Ok(re) => re.is_match(candidate),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "invalid expression glob");
                false
            }
        };
    }

    value.eq_ignore_ascii_case(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(s: &str) -> Expr {
        parse_exprs(&[s.to_string()]).unwrap().remove(0)
    }

    #[test]
    fn parses_both_operators() {
        let eq = parse_one("region==us-east");
        assert_eq!(eq.key, "region");
        assert_eq!(eq.operator, Op::Eq);
        assert_eq!(eq.value, "us-east");

        let neq = parse_one("region!=eu-west");
        assert_eq!(neq.operator, Op::NotEq);
    }

    #[test]
    fn key_is_lowercased() {
        assert_eq!(parse_one("Region==us").key, "region");
    }

    #[test]
    fn parse_errors() {
        // Leading digit in key.
        assert_eq!(
            parse_exprs(&["1region==us".to_string()]).unwrap_err(),
            ExprError::InvalidKey("1region".to_string())
        );
        // Empty value.
        assert_eq!(
            parse_exprs(&["region==".to_string()]).unwrap_err(),
            ExprError::InvalidValue(String::new())
        );
        // No operator at all.
        assert!(matches!(
            parse_exprs(&["region".to_string()]).unwrap_err(),
            ExprError::MissingOperator(_)
        ));
        // One bad entry aborts the whole parse.
        assert!(parse_exprs(&["region==us".to_string(), "!!".to_string()]).is_err());
    }

    #[test]
    fn env_parsing_selects_prefix() {
        let env = vec![
            "constraint:region==us".to_string(),
            "PATH=/usr/bin".to_string(),
            "affinity:container==redis".to_string(),
        ];
        let constraints = parse_env_exprs("constraint", &env).unwrap();
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].key, "region");

        let affinities = parse_env_exprs("affinity", &env).unwrap();
        assert_eq!(affinities.len(), 1);
        assert_eq!(affinities[0].key, "container");
    }

    #[test]
    fn render_round_trips() {
        for s in ["region==us-east", "node!=node-1", "name==~redis", "image==/^ng.nx$"] {
            let parsed = parse_one(s);
            assert_eq!(parse_one(&parsed.render()), parsed);
            assert_eq!(parsed.render(), s);
        }
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let expr = parse_one("region==US-East");
        assert!(expr.match_values(&["us-east"]));
        assert!(!expr.match_values(&["eu-west"]));
        assert!(!expr.match_values(&[]));
    }

    #[test]
    fn any_candidate_suffices() {
        let expr = parse_one("container==redis");
        assert!(expr.match_values(&["web", "redis", "db"]));
    }

    #[test]
    fn regex_values_are_anchored() {
        let expr = parse_one("name==/^foo$");
        assert!(expr.match_values(&["foo"]));
        assert!(!expr.match_values(&["foobar"]));

        let unanchored = parse_one("name==/foo");
        assert!(unanchored.match_values(&["foo"]));
        assert!(!unanchored.match_values(&["xfoox"]));
    }

    #[test]
    fn invalid_regex_never_matches() {
        let expr = parse_one("name==/f[oo");
        assert!(!expr.match_values(&["foo"]));
        // NotEq of a broken pattern therefore matches.
        let neq = parse_one("name!=/f[oo");
        assert!(neq.match_values(&["foo"]));
    }

    #[test]
    fn glob_matching() {
        let expr = parse_one("name==web-*");
        assert!(expr.match_values(&["web-1"]));
        assert!(!expr.match_values(&["db-1"]));

        let any = parse_one("name==*");
        assert!(any.match_values(&["anything"]));

        let single = parse_one("name==web-?");
        assert!(single.match_values(&["web-1"]));
        assert!(!single.match_values(&["web-12"]));
    }

    #[test]
    fn negation_hint_xors_with_operator() {
        let expr = parse_one("name==!foo");
        assert!(!expr.match_values(&["foo"]));
        assert!(expr.match_values(&["bar"]));

        let double = parse_one("name!=!foo");
        assert!(double.match_values(&["foo"]));
    }

    #[test]
    fn not_equal_inverts() {
        let expr = parse_one("region!=us-east");
        assert!(!expr.match_values(&["us-east"]));
        assert!(expr.match_values(&["eu-west"]));
        // Absent key: no candidate matches, so != holds.
        assert!(expr.match_values(&[]));
    }

    #[test]
    fn soft_marker_detection_and_matching() {
        let soft = parse_one("container==~redis");
        assert!(soft.is_soft());
        assert!(soft.match_values(&["redis"]));

        let hard = parse_one("container==redis");
        assert!(!hard.is_soft());
    }
}
