//! Scalar cell values
//!
//! Extracted tables hand the reconciliation core flat records whose values are
//! strings, numbers or nothing at all. [`FieldValue`] is the tagged union for
//! one such cell.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One scalar cell from an extracted record
///
/// Deserializes from any JSON scalar: `null` becomes [`FieldValue::Empty`],
/// integral numbers become [`FieldValue::Int`], other numbers
/// [`FieldValue::Float`], strings [`FieldValue::Text`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// True for `Empty` and for text that is blank after trimming
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Borrow the text of a `Text` value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer view of the value
    ///
    /// Floats convert only when integral; text converts when it parses as an
    /// integer (or an integral float, as spreadsheets tend to emit `3.0`).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(*n),
            FieldValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            FieldValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0 && f.is_finite())
                        .map(|f| f as i64)
                })
            }
            _ => None,
        }
    }

    /// Canonical text used when a value takes part in an identity
    ///
    /// Only the cell type is folded: `Int(3)`, `Float(3.0)` and `Text("3")`
    /// all produce `"3"`. Text is kept verbatim, so `"007"`, `"7.0"` and
    /// `" 7 "` stay distinct from `"7"`.
    pub fn key(&self) -> String {
        match self {
            FieldValue::Float(f) if f.fract() == 0.0 && f.is_finite() => (*f as i64).to_string(),
            FieldValue::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Empty => Ok(()),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(n) => write!(f, "{}", n),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

impl From<u32> for FieldValue {
    fn from(n: u32) -> Self {
        FieldValue::Int(i64::from(n))
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Float(x)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_scalars() {
        let values: Vec<FieldValue> =
            serde_json::from_str(r#"[null, 3, 2.5, "Alive", true]"#).unwrap();
        assert_eq!(
            values,
            vec![
                FieldValue::Empty,
                FieldValue::Int(3),
                FieldValue::Float(2.5),
                FieldValue::Text("Alive".to_string()),
                FieldValue::Bool(true),
            ]
        );
    }

    #[test]
    fn test_serialize_empty_as_null() {
        let json = serde_json::to_string(&FieldValue::Empty).unwrap();
        assert_eq!(json, "null");
    }

    #[test]
    fn test_as_i64_accepts_integral_forms() {
        assert_eq!(FieldValue::Int(4).as_i64(), Some(4));
        assert_eq!(FieldValue::Float(4.0).as_i64(), Some(4));
        assert_eq!(FieldValue::from(" 4 ").as_i64(), Some(4));
        assert_eq!(FieldValue::from("4.0").as_i64(), Some(4));
    }

    #[test]
    fn test_as_i64_rejects_fractions_and_text() {
        assert_eq!(FieldValue::Float(4.5).as_i64(), None);
        assert_eq!(FieldValue::from("four").as_i64(), None);
        assert_eq!(FieldValue::Empty.as_i64(), None);
    }

    #[test]
    fn test_key_folds_numeric_types() {
        assert_eq!(FieldValue::Int(3).key(), "3");
        assert_eq!(FieldValue::Float(3.0).key(), "3");
        assert_eq!(FieldValue::from("3").key(), "3");
        assert_eq!(FieldValue::from("L-3").key(), "L-3");
        assert_eq!(FieldValue::Float(2.5).key(), "2.5");
    }

    #[test]
    fn test_key_keeps_text_verbatim() {
        assert_eq!(FieldValue::from("007").key(), "007");
        assert_eq!(FieldValue::from("7.0").key(), "7.0");
        assert_eq!(FieldValue::from(" 7 ").key(), " 7 ");
        assert_ne!(FieldValue::from("01").key(), FieldValue::Int(1).key());
    }

    #[test]
    fn test_is_empty() {
        assert!(FieldValue::Empty.is_empty());
        assert!(FieldValue::from("   ").is_empty());
        assert!(!FieldValue::Int(0).is_empty());
    }
}
