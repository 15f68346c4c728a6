//! Option values as they travel between the options file, the CLI, pipe
//! definitions and the segments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tokens that coerce to booleans when read from the options file.
const RIGID_TRUE: &[&str] = &["T", "TRUE", "True"];
const RIGID_FALSE: &[&str] = &["F", "FALSE", "False"];

/// Tokens accepted by `--flag BOOL` style CLI arguments.
const FLEXIBLE_TRUE: &[&str] = &["True", "true", "T", "t", "1"];
const FLEXIBLE_FALSE: &[&str] = &["False", "false", "F", "f", "0"];

/// A single option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

/// A flat key/value option set. Sorted so snapshots and printouts are stable.
pub type Options = BTreeMap<String, OptionValue>;

impl OptionValue {
    pub fn text(value: impl Into<String>) -> Self {
        OptionValue::Text(value.into())
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OptionValue::List(items.into_iter().map(Into::into).collect())
    }

    /// Parse an options-file token, coercing the rigid boolean spellings.
    pub fn from_token(token: &str) -> Self {
        if RIGID_TRUE.contains(&token) {
            OptionValue::Bool(true)
        } else if RIGID_FALSE.contains(&token) {
            OptionValue::Bool(false)
        } else {
            OptionValue::Text(token.to_string())
        }
    }

    /// Parse a CLI boolean argument. Returns `None` for non-boolean tokens.
    pub fn parse_flexible_bool(token: &str) -> Option<bool> {
        if FLEXIBLE_TRUE.contains(&token) {
            Some(true)
        } else if FLEXIBLE_FALSE.contains(&token) {
            Some(false)
        } else {
            None
        }
    }

    /// Truthiness used for `write_*`, `overwrite` and similar switches.
    /// Empty text and the flexible false spellings are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            OptionValue::Bool(b) => *b,
            OptionValue::Text(s) => !(s.is_empty() || FLEXIBLE_FALSE.contains(&s.as_str())),
            OptionValue::List(items) => !items.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            OptionValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// View the value as a list of strings. Scalars become one-element lists.
    pub fn to_list(&self) -> Vec<String> {
        match self {
            OptionValue::List(items) => items.clone(),
            OptionValue::Text(s) => vec![s.clone()],
            OptionValue::Bool(b) => vec![b.to_string()],
        }
    }

    /// Convert a TOML value from `tflow.toml` (defaults or pipe overrides).
    pub fn from_toml(value: &toml::Value) -> Option<Self> {
        match value {
            toml::Value::Boolean(b) => Some(OptionValue::Bool(*b)),
            toml::Value::String(s) => Some(OptionValue::Text(s.clone())),
            toml::Value::Integer(i) => Some(OptionValue::Text(i.to_string())),
            toml::Value::Float(f) => Some(OptionValue::Text(f.to_string())),
            toml::Value::Array(items) => Some(OptionValue::List(
                items
                    .iter()
                    .map(|item| match item {
                        toml::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            )),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(true) => write!(f, "True"),
            OptionValue::Bool(false) => write!(f, "False"),
            OptionValue::Text(s) => write!(f, "{}", s),
            OptionValue::List(items) => write!(f, "{}", items.join(" ")),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        OptionValue::List(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rigid_tokens_coerce_to_bool() {
        assert_eq!(OptionValue::from_token("True"), OptionValue::Bool(true));
        assert_eq!(OptionValue::from_token("T"), OptionValue::Bool(true));
        assert_eq!(OptionValue::from_token("F"), OptionValue::Bool(false));
        assert_eq!(OptionValue::from_token("FALSE"), OptionValue::Bool(false));
        // lowercase is not a rigid boolean
        assert_eq!(OptionValue::from_token("true"), OptionValue::text("true"));
        assert_eq!(OptionValue::from_token("10G"), OptionValue::text("10G"));
    }

    #[test]
    fn flexible_bool_accepts_lowercase_and_digits() {
        assert_eq!(OptionValue::parse_flexible_bool("t"), Some(true));
        assert_eq!(OptionValue::parse_flexible_bool("1"), Some(true));
        assert_eq!(OptionValue::parse_flexible_bool("false"), Some(false));
        assert_eq!(OptionValue::parse_flexible_bool("maybe"), None);
    }

    #[test]
    fn truthiness() {
        assert!(OptionValue::Bool(true).is_truthy());
        assert!(!OptionValue::text("0").is_truthy());
        assert!(!OptionValue::text("").is_truthy());
        assert!(OptionValue::text("yes").is_truthy());
        assert!(!OptionValue::List(vec![]).is_truthy());
    }

    #[test]
    fn display_matches_options_file_spelling() {
        assert_eq!(OptionValue::Bool(true).to_string(), "True");
        assert_eq!(OptionValue::list(["a", "b"]).to_string(), "a b");
    }

    #[test]
    fn from_toml_handles_scalars_and_arrays() {
        let value: toml::Value = toml::Value::Array(vec![
            toml::Value::String("cap3".into()),
            toml::Value::Integer(4),
        ]);
        assert_eq!(
            OptionValue::from_toml(&value),
            Some(OptionValue::list(["cap3", "4"]))
        );
        assert_eq!(
            OptionValue::from_toml(&toml::Value::Integer(15)),
            Some(OptionValue::text("15"))
        );
    }
}
