// src/options.rs

//! Tagged configuration options and listing scopes
//!
//! The set of option kinds is closed, so an option is a plain value with a
//! kind tag and typed accessors.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{AsRefStr, Display, EnumString};

/// Kind tag of an option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum OptionKind {
    Bool,
    String,
    StringList,
}

/// Value of one option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    String(String),
    StringList(Vec<String>),
}

impl OptionValue {
    pub fn kind(&self) -> OptionKind {
        match self {
            OptionValue::Bool(_) => OptionKind::Bool,
            OptionValue::String(_) => OptionKind::String,
            OptionValue::StringList(_) => OptionKind::StringList,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            OptionValue::StringList(l) => Some(l),
            _ => None,
        }
    }

    /// Parse a textual value according to a kind
    ///
    /// Booleans accept the usual yes/no spellings; lists are comma or
    /// whitespace separated.
    pub fn parse(kind: OptionKind, raw: &str) -> Option<Self> {
        match kind {
            OptionKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "yes" | "true" | "on" => Some(OptionValue::Bool(true)),
                "0" | "no" | "false" | "off" => Some(OptionValue::Bool(false)),
                _ => None,
            },
            OptionKind::String => Some(OptionValue::String(raw.to_string())),
            OptionKind::StringList => Some(OptionValue::StringList(
                raw.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            OptionValue::String(s) => write!(f, "{s}"),
            OptionValue::StringList(l) => write!(f, "{}", l.join(", ")),
        }
    }
}

/// Declared option: kind, name, description and default value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub default: OptionValue,
}

impl OptionSpec {
    pub const fn new(name: &'static str, description: &'static str, default: OptionValue) -> Self {
        Self {
            name,
            description,
            default,
        }
    }

    pub fn kind(&self) -> OptionKind {
        self.default.kind()
    }

    /// Parse a raw value for this option, falling back to the default
    pub fn value_or_default(&self, raw: Option<&str>) -> OptionValue {
        raw.and_then(|r| OptionValue::parse(self.kind(), r))
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Which packages a listing query looks at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Scope {
    #[default]
    All,
    Available,
    Installed,
}

impl Scope {
    /// Derive the scope from `--available` / `--installed` style flags
    pub fn from_flags(available: bool, installed: bool) -> Self {
        match (available, installed) {
            (true, false) => Scope::Available,
            (false, true) => Scope::Installed,
            _ => Scope::All,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let v = OptionValue::Bool(true);
        assert_eq!(v.as_bool(), Some(true));
        assert_eq!(v.as_str(), None);
        assert_eq!(v.kind(), OptionKind::Bool);

        let l = OptionValue::parse(OptionKind::StringList, "a, b c").unwrap();
        assert_eq!(l.as_list().unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn test_spec_default() {
        let spec = OptionSpec::new("gpgcheck", "verify signatures", OptionValue::Bool(true));
        assert_eq!(spec.value_or_default(Some("no")), OptionValue::Bool(false));
        assert_eq!(spec.value_or_default(Some("maybe")), OptionValue::Bool(true));
        assert_eq!(spec.value_or_default(None).to_string(), "True");
    }

    #[test]
    fn test_scope_from_flags() {
        assert_eq!(Scope::from_flags(true, false), Scope::Available);
        assert_eq!(Scope::from_flags(false, true), Scope::Installed);
        assert_eq!(Scope::from_flags(false, false), Scope::All);
        assert_eq!(Scope::from_flags(true, true), Scope::All);
    }
}
