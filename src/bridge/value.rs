//! Plain, boundary-safe values
//!
//! Everything that crosses the bridge is a [`Value`]. Engine-native values are
//! converted into this shape by the sanitizer before a reply is posted, so no
//! value ever carries identity shared with the engine side.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::BridgeError;

/// Leaf value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Sanitized value: `Scalar | Sequence<Value> | Record<string, Value> | Binary`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Scalar(Scalar),
    Sequence(Vec<Value>),
    Record(BTreeMap<String, Value>),
    Binary(Vec<u8>),
}

impl Default for Value {
    fn default() -> Self {
        Self::Scalar(Scalar::Null)
    }
}

impl Value {
    pub const NULL: Self = Self::Scalar(Scalar::Null);

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Scalar::Null))
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Scalar(Scalar::Int(v)) => Some(*v),
            Self::Scalar(Scalar::Float(v)) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Scalar(Scalar::Int(v)) => Some(*v as f64),
            Self::Scalar(Scalar::Float(v)) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Scalar(Scalar::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Str(v)) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Take the byte buffer out of a binary value
    #[must_use]
    pub fn into_binary(self) -> Option<Vec<u8>> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Field lookup on a record value
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Record(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Encode any serializable record into a plain value
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, BridgeError> {
        serde_json::to_value(value)
            .map(Self::from_json)
            .map_err(|e| BridgeError::Decode(e.to_string()))
    }

    /// Decode a plain value into a typed record
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, BridgeError> {
        serde_json::from_value(self.into_json()).map_err(|e| BridgeError::Decode(e.to_string()))
    }

    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::NULL,
            serde_json::Value::Bool(b) => Self::Scalar(Scalar::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Scalar(Scalar::Int(i)),
                None => Self::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            serde_json::Value::String(s) => Self::Scalar(Scalar::Str(s)),
            serde_json::Value::Array(items) => {
                Self::Sequence(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(fields) => Self::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Self::Scalar(Scalar::Null) => serde_json::Value::Null,
            Self::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(b),
            Self::Scalar(Scalar::Int(i)) => serde_json::Value::from(i),
            Self::Scalar(Scalar::Float(f)) => serde_json::Value::from(f),
            Self::Scalar(Scalar::Str(s)) => serde_json::Value::String(s),
            Self::Sequence(items) => {
                serde_json::Value::Array(items.into_iter().map(Self::into_json).collect())
            }
            Self::Record(fields) => serde_json::Value::Object(
                fields.into_iter().map(|(k, v)| (k, v.into_json())).collect(),
            ),
            Self::Binary(bytes) => {
                serde_json::Value::Array(bytes.into_iter().map(serde_json::Value::from).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Scalar(Scalar::Bool(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Scalar(Scalar::Int(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Scalar(Scalar::Int(i64::from(v)))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Scalar(Scalar::Int(i64::from(v)))
    }
}

/// Integers past `i64::MAX` degrade to floats
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => Self::Scalar(Scalar::Int(v)),
            Err(_) => Self::Scalar(Scalar::Float(v as f64)),
        }
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::from(v as u64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Scalar(Scalar::Float(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Scalar(Scalar::Float(f64::from(v)))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Scalar(Scalar::Str(v.to_string()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Scalar(Scalar::Str(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Sequence(v)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    #[serde(rename_all = "PascalCase")]
    struct Size {
        width: f32,
        height: f32,
    }

    #[test]
    fn typed_records_survive_encode_and_decode() {
        let size = Size {
            width: 612.0,
            height: 792.0,
        };
        let value = Value::encode(&size).unwrap();
        assert_eq!(value.field("Width").and_then(Value::as_f64), Some(612.0));
        assert_eq!(value.decode::<Size>().unwrap(), size);
    }

    #[test]
    fn decode_reports_shape_mismatch() {
        let err = Value::from("nope").decode::<Size>().unwrap_err();
        assert!(matches!(err, BridgeError::Decode(_)));
    }

    #[test]
    fn unsigned_ints_stay_ints_while_they_fit() {
        assert_eq!(Value::from(42_u64).as_i64(), Some(42));
        assert_eq!(Value::from(7_usize).as_i64(), Some(7));
        assert!(matches!(
            Value::from(u64::MAX),
            Value::Scalar(Scalar::Float(_))
        ));
    }

    #[test]
    fn integral_floats_read_as_ints() {
        assert_eq!(Value::from(3.0_f64).as_i64(), Some(3));
        assert_eq!(Value::from(3.5_f64).as_i64(), None);
    }
}
