//! Dynamic values carried by promises.
//!
//! Command results arrive as JSON, and promise chains freely mix plain data
//! with nested promises, so settled values use a small dynamic type: JSON
//! data plus [`Value::Promise`] and [`Value::Thenable`]. Arrays may be
//! sparse; a `None` slot is a hole.
//!
//! # Thenables
//!
//! Anything implementing [`Thenable`] is treated as promise-like: returning
//! one from a handler or task adopts its eventual state.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Number, Value as JsonValue};

use crate::error::Error;
use crate::promise::Promise;

// ============================================================================
// Thenable
// ============================================================================

/// Capability of a foreign promise-like object.
///
/// Implementors must eventually call at most one of the two callbacks.
/// Calls after the first are ignored by the adopting promise.
pub trait Thenable {
    /// Registers settlement callbacks.
    fn then(&self, on_fulfilled: Box<dyn FnOnce(Value)>, on_rejected: Box<dyn FnOnce(Error)>);
}

// ============================================================================
// Value
// ============================================================================

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    /// No value.
    #[default]
    Undefined,
    /// JSON `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(f64),
    /// String.
    String(String),
    /// Array; `None` slots are holes.
    Array(Vec<Option<Value>>),
    /// Object with sorted keys.
    Object(BTreeMap<String, Value>),
    /// A promise of this library.
    Promise(Promise),
    /// A foreign promise-like object.
    Thenable(Rc<dyn Thenable>),
}

// ============================================================================
// Value - Constructors
// ============================================================================

impl Value {
    /// Builds a dense array.
    pub fn array<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::Array(items.into_iter().map(|item| Some(item.into())).collect())
    }

    /// Builds a possibly sparse array.
    pub fn sparse<T: Into<Value>>(items: impl IntoIterator<Item = Option<T>>) -> Self {
        Self::Array(items.into_iter().map(|item| item.map(Into::into)).collect())
    }

    /// Builds an object.
    pub fn object<K: Into<String>, T: Into<Value>>(
        entries: impl IntoIterator<Item = (K, T)>,
    ) -> Self {
        Self::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Wraps a foreign thenable.
    pub fn thenable(thenable: impl Thenable + 'static) -> Self {
        Self::Thenable(Rc::new(thenable))
    }
}

// ============================================================================
// Value - Predicates and Accessors
// ============================================================================

impl Value {
    /// Scripting truthiness: `undefined`, `null`, `false`, `0`, `NaN` and
    /// `""` are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Promise(_) | Self::Thenable(_) => true,
        }
    }

    /// Returns `true` if this value exposes a callable `then`.
    #[inline]
    #[must_use]
    pub fn has_callable_then(&self) -> bool {
        matches!(self, Self::Promise(_) | Self::Thenable(_))
    }

    /// Returns `true` for [`Value::Undefined`].
    #[inline]
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Returns the boolean, if this is one.
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the number, if this is one.
    #[inline]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the number as an integer, if it is integral.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the array slots, if this is an array.
    #[inline]
    #[must_use]
    pub fn as_array(&self) -> Option<&[Option<Value>]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the object entries, if this is an object.
    #[inline]
    #[must_use]
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// Returns the promise, if this is one.
    #[inline]
    #[must_use]
    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Self::Promise(promise) => Some(promise),
            _ => None,
        }
    }

    /// Looks up a key of an object value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|entries| entries.get(key))
    }

    /// Converts to JSON. Holes, promises and thenables become `null`.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Undefined | Self::Null | Self::Promise(_) | Self::Thenable(_) => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Number(n) => Number::from_f64(*n).map_or(JsonValue::Null, JsonValue::Number),
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|slot| slot.as_ref().map_or(JsonValue::Null, Value::to_json))
                    .collect(),
            ),
            Self::Object(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }
}

// ============================================================================
// Value - Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! number_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Number(value as f64)
                }
            }
        )*
    };
}

number_from!(i32, i64, u32, u64, usize, f32, f64);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Promise> for Value {
    fn from(value: Promise) -> Self {
        Self::Promise(value)
    }
}

impl From<&Promise> for Value {
    fn from(value: &Promise) -> Self {
        Self::Promise(value.clone())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::Undefined
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => Self::array(items),
            JsonValue::Object(entries) => Self::object(entries),
        }
    }
}

impl From<Value> for JsonValue {
    fn from(value: Value) -> Self {
        value.to_json()
    }
}

// ============================================================================
// Value - Equality and Debug
// ============================================================================

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Promise(a), Self::Promise(b)) => a.ptr_eq(b),
            (Self::Thenable(a), Self::Thenable(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Array(items) => {
                let mut list = f.debug_list();
                for slot in items {
                    match slot {
                        Some(value) => list.entry(value),
                        None => list.entry(&format_args!("<hole>")),
                    };
                }
                list.finish()
            }
            Self::Object(entries) => f.debug_map().entries(entries.iter()).finish(),
            Self::Promise(promise) => write!(f, "{promise:?}"),
            Self::Thenable(_) => write!(f, "<thenable>"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(false).is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());

        assert!(Value::from(true).is_truthy());
        assert!(Value::from(-1).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::Array(Vec::new()).is_truthy());
        assert!(Value::Object(BTreeMap::new()).is_truthy());
    }

    #[test]
    fn test_json_conversion() {
        let value = Value::from(json!({"title": "Example", "count": 2, "tags": ["a", null]}));

        assert_eq!(value.get("title").and_then(Value::as_str), Some("Example"));
        assert_eq!(value.get("count").and_then(Value::as_i64), Some(2));
        assert_eq!(
            value.get("tags"),
            Some(&Value::array(vec![Value::from("a"), Value::Null]))
        );
        assert_eq!(
            value.to_json(),
            json!({"title": "Example", "count": 2.0, "tags": ["a", null]})
        );
    }

    #[test]
    fn test_sparse_array_holes() {
        let value = Value::sparse(vec![Some(1), None, Some(3)]);
        let slots = value.as_array().expect("array");

        assert_eq!(slots.len(), 3);
        assert!(slots[1].is_none());
        assert_eq!(value.to_json(), json!([1.0, null, 3.0]));
        assert_eq!(format!("{value:?}"), "[1, <hole>, 3]");
    }

    #[test]
    fn test_has_callable_then() {
        struct Never;
        impl Thenable for Never {
            fn then(&self, _: Box<dyn FnOnce(Value)>, _: Box<dyn FnOnce(Error)>) {}
        }

        assert!(Value::thenable(Never).has_callable_then());
        assert!(!Value::from(1).has_callable_then());
        assert!(!Value::object([("then", 1)]).has_callable_then());
    }

    #[test]
    fn test_integer_accessor_rejects_fractions() {
        assert_eq!(Value::from(2.5).as_i64(), None);
        assert_eq!(Value::from(7u32).as_i64(), Some(7));
    }
}
