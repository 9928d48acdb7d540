//! Template expressions.
//!
//! An expression is either a literal or a reference to a bound parameter:
//!
//! ```text
//! 'text'  "text"                 string (escapes: \\ \' \" \n \t)
//! 42  -7                         integer
//! 9.53  -0.5                     decimal
//! true  false                    boolean
//! uuid('…') date('2024-01-31')   typed literals
//! timestamp('…') decimal('…') json('…')
//! params.amount                  parameter reference
//! ```
//!
//! Expressions serialize as their canonical source text.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::param::{ParamDataType, ParamValue, Params, is_identifier};

const PARAMS_PREFIX: &str = "params.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Expr {
    Literal(ParamValue),
    ParamRef(String),
}

impl Expr {
    pub fn literal(&self) -> Option<&ParamValue> {
        match self {
            Expr::Literal(v) => Some(v),
            Expr::ParamRef(_) => None,
        }
    }

    pub fn param_name(&self) -> Option<&str> {
        match self {
            Expr::Literal(_) => None,
            Expr::ParamRef(name) => Some(name),
        }
    }

    /// Resolve against bound parameters and check the result fits `slot`.
    ///
    /// Integers resolved into a decimal slot are widened.
    pub fn evaluate(&self, slot: &str, expected: ParamDataType, params: &Params) -> LedgerResult<ParamValue> {
        let value = match self {
            Expr::Literal(v) => v,
            Expr::ParamRef(name) => params
                .get(name)
                .ok_or_else(|| LedgerError::UnboundParameter(name.clone()))?,
        };
        if !value.data_type().is_assignable_to(expected) {
            return Err(LedgerError::TypeMismatch {
                slot: slot.to_string(),
                expected,
                found: value.data_type(),
            });
        }
        match (value, expected) {
            (ParamValue::Integer(i), ParamDataType::Decimal) => Ok(ParamValue::Decimal(Decimal::from(*i))),
            _ => Ok(value.clone()),
        }
    }
}

impl FromStr for Expr {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let src = s.trim();
        let fail = |reason: &str| LedgerError::invalid_template(format!("invalid expression '{src}': {reason}"));

        if src.is_empty() {
            return Err(fail("empty"));
        }
        if let Some(name) = src.strip_prefix(PARAMS_PREFIX) {
            if !is_identifier(name) {
                return Err(fail("bad parameter name"));
            }
            return Ok(Expr::ParamRef(name.to_string()));
        }

        let mut parser = Parser::new(src);
        let value = parser.literal().map_err(|reason| fail(&reason))?;
        if !parser.at_end() {
            return Err(fail("trailing input"));
        }
        Ok(Expr::Literal(value))
    }
}

impl TryFrom<String> for Expr {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Expr> for String {
    fn from(value: Expr) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::ParamRef(name) => write!(f, "{PARAMS_PREFIX}{name}"),
            Expr::Literal(value) => match value {
                ParamValue::String(s) => write_quoted(f, s),
                ParamValue::Integer(i) => write!(f, "{i}"),
                // A scale-0 decimal would read back as an integer.
                ParamValue::Decimal(d) if d.scale() == 0 => write!(f, "decimal('{d}')"),
                ParamValue::Decimal(d) => write!(f, "{d}"),
                ParamValue::Boolean(b) => write!(f, "{b}"),
                ParamValue::Uuid(u) => write!(f, "uuid('{u}')"),
                ParamValue::Date(d) => write!(f, "date('{}')", d.format("%Y-%m-%d")),
                ParamValue::Timestamp(t) => {
                    write!(f, "timestamp('{}')", t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                }
                ParamValue::Json(j) => {
                    f.write_str("json(")?;
                    write_quoted(f, &j.to_string())?;
                    f.write_str(")")
                }
            },
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\'' => f.write_str("\\'")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("'")
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn literal(&mut self) -> Result<ParamValue, String> {
        match self.peek() {
            Some('\'') | Some('"') => self.quoted().map(ParamValue::String),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.word(),
            Some(c) => Err(format!("unexpected '{c}'")),
            None => Err("unexpected end".to_string()),
        }
    }

    fn quoted(&mut self) -> Result<String, String> {
        let Some(quote) = self.bump() else {
            return Err("expected quote".to_string());
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string".to_string()),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => return Err(format!("unknown escape '\\{c}'")),
                    None => return Err("unterminated escape".to_string()),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<ParamValue, String> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        if seen_dot {
            Decimal::from_str_exact(text)
                .map(ParamValue::Decimal)
                .map_err(|e| format!("bad decimal: {e}"))
        } else {
            text.parse::<i64>()
                .map(ParamValue::Integer)
                .map_err(|e| format!("bad integer: {e}"))
        }
    }

    fn word(&mut self) -> Result<ParamValue, String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let word = &self.src[start..self.pos];
        match word {
            "true" => return Ok(ParamValue::Boolean(true)),
            "false" => return Ok(ParamValue::Boolean(false)),
            _ => {}
        }

        if self.bump() != Some('(') {
            return Err(format!("unknown word '{word}'"));
        }
        let arg = self.quoted()?;
        if self.bump() != Some(')') {
            return Err("expected ')'".to_string());
        }

        match word {
            "uuid" => Uuid::from_str(&arg)
                .map(ParamValue::Uuid)
                .map_err(|e| format!("bad uuid: {e}")),
            "date" => NaiveDate::parse_from_str(&arg, "%Y-%m-%d")
                .map(ParamValue::Date)
                .map_err(|e| format!("bad date: {e}")),
            "timestamp" => DateTime::parse_from_rfc3339(&arg)
                .map(|t| ParamValue::Timestamp(t.with_timezone(&Utc)))
                .map_err(|e| format!("bad timestamp: {e}")),
            "decimal" => Decimal::from_str_exact(&arg)
                .map(ParamValue::Decimal)
                .map_err(|e| format!("bad decimal: {e}")),
            "json" => serde_json::from_str(&arg)
                .map(ParamValue::Json)
                .map_err(|e| format!("bad json: {e}")),
            other => Err(format!("unknown constructor '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lit(src: &str) -> ParamValue {
        src.parse::<Expr>().unwrap().literal().cloned().unwrap()
    }

    #[test]
    fn parses_literals() {
        assert_eq!(lit("'USD'"), ParamValue::String("USD".into()));
        assert_eq!(lit("\"it\\'s\""), ParamValue::String("it's".into()));
        assert_eq!(lit("42"), ParamValue::Integer(42));
        assert_eq!(lit("-7"), ParamValue::Integer(-7));
        assert_eq!(lit("9.53"), ParamValue::Decimal(dec!(9.53)));
        assert_eq!(lit("true"), ParamValue::Boolean(true));
        assert_eq!(
            lit("date('2024-02-29')"),
            ParamValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(lit("json('{\"a\":1}')"), ParamValue::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn parses_parameter_references() {
        let e: Expr = " params.amount ".parse().unwrap();
        assert_eq!(e.param_name(), Some("amount"));
        assert!("params.".parse::<Expr>().is_err());
        assert!("params.a-b".parse::<Expr>().is_err());
    }

    #[test]
    fn bare_words_are_not_references() {
        assert!("amount".parse::<Expr>().is_err());
        assert!("'unterminated".parse::<Expr>().is_err());
        assert!("1.2.3".parse::<Expr>().is_err());
        assert!("uuid('nope')".parse::<Expr>().is_err());
        assert!("date('2024-13-01')".parse::<Expr>().is_err());
    }

    #[test]
    fn display_reparses_to_the_same_expression() {
        for src in [
            "'a\\'b\\nc'",
            "42",
            "9.50",
            "decimal('10')",
            "false",
            "uuid('0191e2a8-8f1e-7cc1-9a67-3b6b0e5c5f1a')",
            "date('2024-01-31')",
            "timestamp('2024-01-31T10:00:00Z')",
            "json('{\"k\":\"v\"}')",
            "params.effective",
        ] {
            let e: Expr = src.parse().unwrap();
            let again: Expr = e.to_string().parse().unwrap();
            assert_eq!(e, again, "{src}");
        }
    }

    #[test]
    fn evaluate_checks_slot_type() {
        let params = Params::new().with("amount", 3i64).with("name", "x");
        let units: Expr = "params.amount".parse().unwrap();
        assert_eq!(
            units.evaluate("units", ParamDataType::Decimal, &params).unwrap(),
            ParamValue::Decimal(dec!(3))
        );

        let wrong: Expr = "params.name".parse().unwrap();
        assert!(matches!(
            wrong.evaluate("units", ParamDataType::Decimal, &params),
            Err(LedgerError::TypeMismatch { .. })
        ));

        let missing: Expr = "params.nope".parse().unwrap();
        assert_eq!(
            missing.evaluate("units", ParamDataType::Decimal, &params),
            Err(LedgerError::UnboundParameter("nope".into()))
        );
    }

    #[test]
    fn serializes_as_source_text() {
        let e: Expr = "params.amount".parse().unwrap();
        assert_eq!(serde_json::to_string(&e).unwrap(), "\"params.amount\"");
    }
}
