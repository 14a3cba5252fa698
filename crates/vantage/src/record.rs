//! Field values and the record contract.
//!
//! The engine never interprets a source value beyond two capabilities:
//! extracting named fields (for sorting, filtering, grouping, and id
//! resolution) and an optional domain identity. Both are expressed through
//! the [`Record`] trait, with [`FieldValue`] as the type-erased field
//! container.

use std::cmp::Ordering;
use std::fmt;

/// Type-erased container for a record field.
///
/// `FieldValue` is what [`Record::field`] returns and what group functions
/// produce as group ids. `FieldValue::None` means "no such field" (and, for
/// a group id, "suppress the group header").
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    /// No value.
    #[default]
    None,
    /// A boolean value.
    Bool(bool),
    /// A signed integer value.
    Int(i64),
    /// A floating-point value.
    Float(f64),
    /// A text value.
    Text(String),
}

impl FieldValue {
    /// Returns `true` if this is `FieldValue::None`.
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, FieldValue::None)
    }

    /// Returns the boolean value, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float value, if this is a `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the text value as a string slice, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Consumes the value and returns the text, if this is a `Text`.
    pub fn into_text(self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Compares two field values for sorting.
    ///
    /// Values of different kinds (and `None`s) compare as equal, so a
    /// mixed-kind sort degrades to the previous layer's order instead of
    /// producing an arbitrary interleaving.
    pub fn compare(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Float(a), FieldValue::Float(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::None => Ok(()),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// The contract source values must satisfy to participate in a projection.
///
/// The engine extracts named fields for user sorts, filters, groupers, and
/// id resolution. A record may additionally expose a domain identity via
/// [`identity`](Record::identity); when present it takes precedence over the
/// configured id property for unique-id resolution.
///
/// # Example
///
/// ```
/// use vantage::{FieldValue, Record};
///
/// #[derive(Clone, PartialEq)]
/// struct Person {
///     id: i64,
///     name: String,
/// }
///
/// impl Record for Person {
///     fn field(&self, name: &str) -> FieldValue {
///         match name {
///             "id" => FieldValue::Int(self.id),
///             "name" => FieldValue::from(self.name.as_str()),
///             _ => FieldValue::None,
///         }
///     }
///
///     fn identity(&self) -> FieldValue {
///         FieldValue::Int(self.id)
///     }
/// }
/// ```
pub trait Record: Clone + PartialEq + Send + Sync + 'static {
    /// Returns the value of the named field, or `FieldValue::None` when the
    /// record has no such field.
    fn field(&self, name: &str) -> FieldValue;

    /// Returns the record's domain identity, if it has one.
    ///
    /// The default returns `FieldValue::None`, meaning identity comes from
    /// the configured id property instead.
    fn identity(&self) -> FieldValue {
        FieldValue::None
    }
}

/// Plain strings act as records whose every field is the string itself.
impl Record for String {
    fn field(&self, _name: &str) -> FieldValue {
        FieldValue::Text(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_accessors() {
        assert_eq!(FieldValue::Int(5).as_int(), Some(5));
        assert_eq!(FieldValue::Int(5).as_text(), None);
        assert_eq!(FieldValue::from("abc").as_text(), Some("abc"));
        assert!(FieldValue::None.is_none());
        assert!(!FieldValue::Bool(false).is_none());
    }

    #[test]
    fn test_compare_same_kind() {
        assert_eq!(
            FieldValue::Int(1).compare(&FieldValue::Int(2)),
            Ordering::Less
        );
        assert_eq!(
            FieldValue::from("b").compare(&FieldValue::from("a")),
            Ordering::Greater
        );
        assert_eq!(
            FieldValue::Float(1.5).compare(&FieldValue::Float(1.5)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_compare_mixed_kinds_is_equal() {
        assert_eq!(
            FieldValue::Int(1).compare(&FieldValue::from("1")),
            Ordering::Equal
        );
        assert_eq!(
            FieldValue::None.compare(&FieldValue::Bool(true)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(FieldValue::Int(42).to_string(), "42");
        assert_eq!(FieldValue::from("x").to_string(), "x");
        assert_eq!(FieldValue::None.to_string(), "");
    }

    #[test]
    fn test_string_record() {
        let s = "hello".to_string();
        assert_eq!(s.field("anything"), FieldValue::from("hello"));
        assert!(s.identity().is_none());
    }
}
