//! Placeholder rewriting.
//!
//! Application SQL may use any of the five DB-API parameter styles. The
//! server only understands `$1, $2, ...`, so each statement is scanned once,
//! left to right, tracking quoting state so that placeholder-looking text in
//! string literals, quoted identifiers and line comments is left alone.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::Value;
use crate::error::{Error, Result};

/// DB-API `paramstyle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamStyle {
    /// `WHERE a = ?`
    Qmark,
    /// `WHERE a = :1`
    Numeric,
    /// `WHERE a = :name`
    Named,
    /// `WHERE a = %s`
    #[default]
    Format,
    /// `WHERE a = %(name)s`
    Pyformat,
}

impl FromStr for ParamStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "qmark" => Ok(ParamStyle::Qmark),
            "numeric" => Ok(ParamStyle::Numeric),
            "named" => Ok(ParamStyle::Named),
            "format" => Ok(ParamStyle::Format),
            "pyformat" => Ok(ParamStyle::Pyformat),
            other => Err(Error::Interface(format!("unknown paramstyle {:?}", other))),
        }
    }
}

/// Arguments supplied with a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Positional(Vec<Value>),
    Named(HashMap<String, Value>),
}

impl Params {
    pub fn none() -> Self {
        Params::Positional(Vec::new())
    }

    fn is_empty(&self) -> bool {
        match self {
            Params::Positional(v) => v.is_empty(),
            Params::Named(m) => m.is_empty(),
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::none()
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl From<HashMap<String, Value>> for Params {
    fn from(values: HashMap<String, Value>) -> Self {
        Params::Named(values)
    }
}

/// Recovers the `$n` argument order from the caller's parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgOrder {
    /// Arguments are already in `$n` order.
    Positional,
    /// `$n` takes the value named `names[n - 1]`.
    Named(Vec<String>),
}

impl ArgOrder {
    pub fn arrange(&self, params: Params) -> Result<Vec<Value>> {
        match (self, params) {
            (ArgOrder::Positional, Params::Positional(values)) => Ok(values),
            (ArgOrder::Named(names), Params::Named(mut values)) => names
                .iter()
                .map(|name| {
                    values.remove(name).ok_or_else(|| {
                        Error::Interface(format!("missing value for parameter {:?}", name))
                    })
                })
                .collect(),
            (ArgOrder::Named(names), params) if names.is_empty() && params.is_empty() => {
                Ok(Vec::new())
            }
            (ArgOrder::Positional, params) if params.is_empty() => Ok(Vec::new()),
            (ArgOrder::Positional, Params::Named(_)) => Err(Error::Interface(
                "named parameters given for a positional placeholder style".to_string(),
            )),
            (ArgOrder::Named(_), Params::Positional(_)) => Err(Error::Interface(
                "positional parameters given for a named placeholder style".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    /// `'...'`
    SingleQuoted,
    /// `"..."`
    QuotedIdent,
    /// `E'...'`, backslash escapes apply
    EscapedString,
    /// `-- ...` up to end of line
    LineComment,
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Index (1-based) of `name`, registering it on first sight.
fn named_index(names: &mut Vec<String>, name: String) -> usize {
    match names.iter().position(|n| *n == name) {
        Some(i) => i + 1,
        None => {
            names.push(name);
            names.len()
        }
    }
}

/// Rewrite `query` written in `style` into `$n` placeholders.
pub fn convert(style: ParamStyle, query: &str) -> Result<(String, ArgOrder)> {
    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len() + 8);
    let mut names: Vec<String> = Vec::new();
    let mut positional = 0usize;
    let mut state = State::Outside;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let prev = i.checked_sub(1).map(|j| chars[j]);
        let next = chars.get(i + 1).copied();

        match state {
            State::Outside => match c {
                '\'' => {
                    out.push(c);
                    let escape_prefix = matches!(prev, Some('E') | Some('e'))
                        && !i.checked_sub(2).map(|j| is_ident(chars[j])).unwrap_or(false);
                    state = if escape_prefix {
                        State::EscapedString
                    } else {
                        State::SingleQuoted
                    };
                }
                '"' => {
                    out.push(c);
                    state = State::QuotedIdent;
                }
                '-' if next == Some('-') => {
                    out.push_str("--");
                    i += 1;
                    state = State::LineComment;
                }
                '?' if style == ParamStyle::Qmark => {
                    positional += 1;
                    let _ = write!(out, "${}", positional);
                }
                ':' if matches!(style, ParamStyle::Numeric | ParamStyle::Named)
                    && prev != Some(':')
                    && !matches!(next, Some(':') | Some('=')) =>
                {
                    match (style, next) {
                        (ParamStyle::Numeric, Some(n)) if n.is_ascii_digit() => out.push('$'),
                        (ParamStyle::Named, Some(n)) if n.is_alphabetic() || n == '_' => {
                            let start = i + 1;
                            let end = chars[start..]
                                .iter()
                                .position(|&c| !is_ident(c))
                                .map_or(chars.len(), |p| start + p);
                            let name: String = chars[start..end].iter().collect();
                            let idx = named_index(&mut names, name);
                            let _ = write!(out, "${}", idx);
                            i = end - 1;
                        }
                        _ => out.push(c),
                    }
                }
                '%' if matches!(style, ParamStyle::Format | ParamStyle::Pyformat) => match next {
                    Some('%') => {
                        out.push('%');
                        i += 1;
                    }
                    Some('s') => {
                        positional += 1;
                        let _ = write!(out, "${}", positional);
                        i += 1;
                    }
                    Some('(') if style == ParamStyle::Pyformat => {
                        let start = i + 2;
                        let close = chars[start..]
                            .iter()
                            .position(|&c| c == ')')
                            .map(|p| start + p)
                            .filter(|&close| chars.get(close + 1) == Some(&'s'))
                            .ok_or_else(|| {
                                Error::Interface(format!(
                                    "unterminated %(name)s placeholder at offset {}",
                                    i
                                ))
                            })?;
                        let name: String = chars[start..close].iter().collect();
                        let idx = named_index(&mut names, name);
                        let _ = write!(out, "${}", idx);
                        i = close + 1;
                    }
                    _ => {
                        return Err(Error::Interface(
                            "only %s, %% and %(name)s are supported in the query".to_string(),
                        ))
                    }
                },
                _ => out.push(c),
            },
            State::SingleQuoted => {
                out.push(c);
                if c == '\'' {
                    if next == Some('\'') {
                        out.push('\'');
                        i += 1;
                    } else {
                        state = State::Outside;
                    }
                }
            }
            State::QuotedIdent => {
                out.push(c);
                if c == '"' {
                    if next == Some('"') {
                        out.push('"');
                        i += 1;
                    } else {
                        state = State::Outside;
                    }
                }
            }
            State::EscapedString => {
                out.push(c);
                if c == '\\' {
                    if let Some(n) = next {
                        out.push(n);
                        i += 1;
                    }
                } else if c == '\'' {
                    if next == Some('\'') {
                        out.push('\'');
                        i += 1;
                    } else {
                        state = State::Outside;
                    }
                }
            }
            State::LineComment => {
                out.push(c);
                if c == '\n' {
                    state = State::Outside;
                }
            }
        }
        i += 1;
    }

    if !names.is_empty() && positional > 0 {
        return Err(Error::Interface(
            "cannot mix named and positional placeholders".to_string(),
        ));
    }

    let order = match style {
        ParamStyle::Named => ArgOrder::Named(names),
        ParamStyle::Pyformat if positional == 0 => ArgOrder::Named(names),
        _ => ArgOrder::Positional,
    };
    Ok((out, order))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(style: ParamStyle, sql: &str) -> String {
        convert(style, sql).unwrap().0
    }

    fn named(pairs: &[(&str, i64)]) -> Params {
        Params::Named(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Value::Int(*v)))
                .collect(),
        )
    }

    #[test]
    fn test_qmark() {
        assert_eq!(
            rewrite(ParamStyle::Qmark, "SELECT * FROM t WHERE a = ? AND b = ?"),
            "SELECT * FROM t WHERE a = $1 AND b = $2"
        );
    }

    #[test]
    fn test_qmark_skips_string_literal_percent() {
        assert_eq!(
            rewrite(ParamStyle::Qmark, "SELECT '100%' FROM t WHERE x=?"),
            "SELECT '100%' FROM t WHERE x=$1"
        );
    }

    #[test]
    fn test_numeric_keeps_casts_and_is_idempotent() {
        let once = rewrite(ParamStyle::Numeric, "SELECT :1::int, :2 WHERE a := 3");
        assert_eq!(once, "SELECT $1::int, $2 WHERE a := 3");
        assert_eq!(rewrite(ParamStyle::Numeric, &once), once);
        assert_eq!(rewrite(ParamStyle::Numeric, "SELECT $1, $2"), "SELECT $1, $2");
    }

    #[test]
    fn test_named_reuses_index_for_repeated_names() {
        let (sql, order) =
            convert(ParamStyle::Named, "SELECT :b, :a, :b, x::text FROM t").unwrap();
        assert_eq!(sql, "SELECT $1, $2, $1, x::text FROM t");
        assert_eq!(order, ArgOrder::Named(vec!["b".to_string(), "a".to_string()]));

        let args = order.arrange(named(&[("a", 1), ("b", 2)])).unwrap();
        assert_eq!(args, vec![Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn test_named_missing_value() {
        let (_, order) = convert(ParamStyle::Named, "SELECT :a").unwrap();
        let err = order.arrange(named(&[("b", 1)])).unwrap_err();
        assert!(matches!(err, Error::Interface(_)));
    }

    #[test]
    fn test_format_and_escaped_percent() {
        assert_eq!(
            rewrite(ParamStyle::Format, "SELECT %s, %s WHERE name LIKE 'a%' AND pct = 5%%"),
            "SELECT $1, $2 WHERE name LIKE 'a%' AND pct = 5%"
        );
    }

    #[test]
    fn test_format_rejects_other_conversions() {
        assert!(matches!(
            convert(ParamStyle::Format, "SELECT %d"),
            Err(Error::Interface(_))
        ));
    }

    #[test]
    fn test_pyformat() {
        let (sql, order) =
            convert(ParamStyle::Pyformat, "INSERT INTO t VALUES (%(x)s, %(y)s, %(x)s)").unwrap();
        assert_eq!(sql, "INSERT INTO t VALUES ($1, $2, $1)");
        let args = order.arrange(named(&[("y", 20), ("x", 10)])).unwrap();
        assert_eq!(args, vec![Value::Int(10), Value::Int(20)]);
    }

    #[test]
    fn test_pyformat_accepts_plain_s() {
        let (sql, order) = convert(ParamStyle::Pyformat, "SELECT %s").unwrap();
        assert_eq!(sql, "SELECT $1");
        assert_eq!(order, ArgOrder::Positional);
    }

    #[test]
    fn test_pyformat_unterminated() {
        assert!(convert(ParamStyle::Pyformat, "SELECT %(x").is_err());
    }

    #[test]
    fn test_quoting_states_are_left_alone() {
        let sql = "SELECT '?', \"col?\", E'it\\'s ?', 'a''?' -- why?\nFROM t WHERE x = ?";
        assert_eq!(
            rewrite(ParamStyle::Qmark, sql),
            "SELECT '?', \"col?\", E'it\\'s ?', 'a''?' -- why?\nFROM t WHERE x = $1"
        );

        let named_sql = "SELECT ':a', \":b\" -- :c\n, :d";
        let (out, order) = convert(ParamStyle::Named, named_sql).unwrap();
        assert_eq!(out, "SELECT ':a', \":b\" -- :c\n, $1");
        assert_eq!(order, ArgOrder::Named(vec!["d".to_string()]));
    }

    #[test]
    fn test_identifier_ending_in_e_is_not_escape_string() {
        // `TYPE'` is not an E'' prefix: the backslash must not escape the quote.
        assert_eq!(
            rewrite(ParamStyle::Qmark, "SELECT TYPE'\\' , ?"),
            "SELECT TYPE'\\' , $1"
        );
    }

    #[test]
    fn test_positional_args_pass_through() {
        let (_, order) = convert(ParamStyle::Qmark, "SELECT ?, ?").unwrap();
        let args = vec![Value::Int(1), Value::Text("x".into())];
        assert_eq!(order.arrange(Params::from(args.clone())).unwrap(), args);
        assert!(order.arrange(named(&[("a", 1)])).is_err());
        assert!(order.arrange(Params::none()).unwrap().is_empty());
    }

    #[test]
    fn test_paramstyle_from_str() {
        assert_eq!("PyFormat".parse::<ParamStyle>().unwrap(), ParamStyle::Pyformat);
        assert!("dollar".parse::<ParamStyle>().is_err());
    }
}
