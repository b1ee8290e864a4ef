//! Element construction properties.

use std::collections::HashMap;

use crate::caps::Caps;
use crate::error::{Error, Result};

/// Properties passed to an element factory, keyed by property name.
pub type Properties = HashMap<String, PropertyValue>;

/// A property value, as written in a launch description or set from code.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A string value (quoted or unquoted).
    String(String),
    /// An integer value.
    Integer(i64),
    /// A floating-point value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
}

impl PropertyValue {
    /// Get as a string, converting if necessary.
    pub fn as_string(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Integer(i) => i.to_string(),
            PropertyValue::Float(f) => f.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
        }
    }

    /// Try to get as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a u64.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|i| u64::try_from(i).ok())
    }

    /// Try to get as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Integer(i) => Some(*i as f64),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            PropertyValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Parse a string value as caps.
    pub fn as_caps(&self) -> Option<Caps> {
        match self {
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Typed accessors reporting an `InvalidProperty` error on mismatch.
    pub(crate) fn expect_u64(&self, name: &str) -> Result<u64> {
        self.as_u64().ok_or_else(|| invalid(name, self, "unsigned integer"))
    }

    pub(crate) fn expect_i64(&self, name: &str) -> Result<i64> {
        self.as_i64().ok_or_else(|| invalid(name, self, "integer"))
    }

    pub(crate) fn expect_bool(&self, name: &str) -> Result<bool> {
        self.as_bool().ok_or_else(|| invalid(name, self, "boolean"))
    }

    pub(crate) fn expect_caps(&self, name: &str) -> Result<Caps> {
        self.as_caps().ok_or_else(|| invalid(name, self, "caps"))
    }
}

fn invalid(name: &str, value: &PropertyValue, expected: &str) -> Error {
    Error::InvalidProperty {
        name: name.to_string(),
        reason: format!("expected {expected}, got '{}'", value.as_string()),
    }
}

/// Error for a property an element does not have.
pub(crate) fn unknown_property(name: &str) -> Error {
    Error::InvalidProperty {
        name: name.to_string(),
        reason: "no such property".to_string(),
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Integer(i)
    }
}

impl From<i32> for PropertyValue {
    fn from(i: i32) -> Self {
        PropertyValue::Integer(i64::from(i))
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_value_conversions() {
        assert_eq!(PropertyValue::String("42".into()).as_i64(), Some(42));
        assert_eq!(PropertyValue::Integer(-1).as_u64(), None);
        assert_eq!(PropertyValue::String("yes".into()).as_bool(), Some(true));
        assert_eq!(PropertyValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(PropertyValue::Float(1.5).as_string(), "1.5");
    }

    #[test]
    fn test_caps_property() {
        let value = PropertyValue::from("audio/x-raw, rate=(int)8000");
        let caps = value.expect_caps("caps").unwrap();
        assert!(caps.is_fixed());
        let err = PropertyValue::Bool(true).expect_caps("caps").unwrap_err();
        assert!(err.to_string().contains("caps"));
    }
}
