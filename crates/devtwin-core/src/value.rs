//! Value type for twin properties and tags
//!
//! A closed set of JSON-compatible values. Arrays and arbitrary objects
//! cannot be represented, so illegal shapes are rejected at the boundary
//! where JSON enters the twin.

use crate::error::{Result, TwinError};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered key/value map used for property trees and diffs
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Core value type for twin state
///
/// `Null` inside an update means "delete this key"; it is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum PropertyValue {
    /// Null value
    #[default]
    Null,

    /// Boolean value
    Bool(bool),

    /// Integer number
    Integer(i64),

    /// Floating point number
    Float(OrderedFloat<f64>),

    /// UTF-8 string
    String(String),

    /// Nested map
    Map(PropertyMap),
}

impl PropertyValue {
    /// Convert to boolean if possible
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert to integer if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert to float if possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(f.into_inner()),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Borrow as string if possible
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as nested map if possible
    pub fn as_map(&self) -> Option<&PropertyMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    /// Type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::Map(_) => "Map",
        }
    }

    /// Copy of this value with every `Null` entry removed from nested maps.
    pub(crate) fn without_nulls(&self) -> Self {
        match self {
            Self::Map(map) => Self::Map(
                map.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.without_nulls()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Convert a JSON value, naming `key` in the error if it holds an array.
    pub fn from_json(key: &str, value: serde_json::Value) -> Result<Self> {
        use serde_json::Value as Json;

        match value {
            Json::Null => Ok(Self::Null),
            Json::Bool(b) => Ok(Self::Bool(b)),
            Json::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(|f| Self::Float(OrderedFloat(f))))
                .ok_or_else(|| TwinError::invalid_value(key, format!("unsupported number {n}"))),
            Json::String(s) => Ok(Self::String(s)),
            Json::Array(_) => Err(TwinError::invalid_value(key, "arrays are not supported")),
            Json::Object(entries) => {
                let mut map = PropertyMap::new();
                for (k, v) in entries {
                    let value = Self::from_json(&k, v)?;
                    map.insert(k, value);
                }
                Ok(Self::Map(map))
            }
        }
    }

    /// Convert to a JSON value. Non-finite floats have no JSON form and become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Integer(i) => Json::from(*i),
            Self::Float(f) => Json::from(f.into_inner()),
            Self::String(s) => Json::String(s.clone()),
            Self::Map(map) => map_to_json(map),
        }
    }
}

/// Convert a property map to a JSON object
pub fn map_to_json(map: &PropertyMap) -> serde_json::Value {
    serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

/// Convert a JSON object to a property map; anything but an object is rejected.
pub fn map_from_json(value: serde_json::Value) -> Result<PropertyMap> {
    match PropertyValue::from_json("", value)? {
        PropertyValue::Map(map) => Ok(map),
        other => Err(TwinError::InvalidArgument(format!(
            "expected a JSON object, got {}",
            other.type_name()
        ))),
    }
}

impl TryFrom<serde_json::Value> for PropertyValue {
    type Error = TwinError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        Self::from_json("", value)
    }
}

impl From<&PropertyValue> for serde_json::Value {
    fn from(value: &PropertyValue) -> Self {
        value.to_json()
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(f.into_inner()),
            Self::String(s) => serializer.serialize_str(s),
            Self::Map(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(fl) => write!(f, "{fl}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

// Conversions from Rust types
impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for PropertyValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<u32> for PropertyValue {
    fn from(i: u32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f32> for PropertyValue {
    fn from(f: f32) -> Self {
        Self::Float(OrderedFloat(f64::from(f)))
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        Self::Float(OrderedFloat(f))
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<PropertyMap> for PropertyValue {
    fn from(map: PropertyMap) -> Self {
        Self::Map(map)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Build a [`PropertyMap`] from `key => value` pairs
///
/// ```
/// use devtwin_core::{props, PropertyValue};
///
/// let map = props! {
///     "temperature" => 21.5,
///     "location" => props! { "room" => "lab" },
///     "obsolete" => PropertyValue::Null,
/// };
/// assert_eq!(map.len(), 3);
/// ```
#[macro_export]
macro_rules! props {
    () => {
        $crate::value::PropertyMap::new()
    };

    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::value::PropertyMap::new();
        $(
            map.insert(
                ::std::string::String::from($key),
                $crate::value::PropertyValue::from($value),
            );
        )+
        map
    }};
}
