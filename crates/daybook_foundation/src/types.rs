//! Data type descriptors for property values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::value::Value;

/// The scalar data types a property can declare.
///
/// Every data property in a metadata document names one of these. Incoming
/// JSON is coerced through [`DataType::coerce_json`] before it is stored, so
/// the cache never holds a value whose shape disagrees with its metadata.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// UTF-8 string.
    String,
}

impl DataType {
    /// Returns true if `value` conforms to this type.
    ///
    /// `Nil` always conforms; nullability is a validation concern, not a
    /// storage one.
    #[must_use]
    pub fn check(self, value: &Value) -> bool {
        match value {
            Value::Nil => true,
            Value::Bool(_) => self == Self::Bool,
            Value::Int(_) => self == Self::Int,
            Value::Float(_) => self == Self::Float,
            Value::String(_) => self == Self::String,
        }
    }

    /// Coerces a value into this type, widening where lossless.
    ///
    /// The only widening performed is `Int` into `Float`. Everything else
    /// must already match.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch error if the value cannot represent this type.
    #[allow(clippy::cast_precision_loss)]
    pub fn coerce(self, value: Value) -> Result<Value> {
        match (self, &value) {
            (_, Value::Nil)
            | (Self::Bool, Value::Bool(_))
            | (Self::Int, Value::Int(_))
            | (Self::Float, Value::Float(_))
            | (Self::String, Value::String(_)) => Ok(value),
            (Self::Float, Value::Int(n)) => Ok(Value::Float(*n as f64)),
            _ => Err(Error::type_mismatch(self, format!("{value:?}"))),
        }
    }

    /// Coerces a JSON scalar into this type.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch error for non-scalar JSON or a scalar of the
    /// wrong shape.
    pub fn coerce_json(self, json: &serde_json::Value) -> Result<Value> {
        let value = match (self, json) {
            (_, serde_json::Value::Null) => Value::Nil,
            (Self::Bool, serde_json::Value::Bool(b)) => Value::Bool(*b),
            (Self::Int, serde_json::Value::Number(n)) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => return Err(Error::type_mismatch(self, n.to_string())),
            },
            (Self::Float, serde_json::Value::Number(n)) => match n.as_f64() {
                Some(f) => Value::Float(f),
                None => return Err(Error::type_mismatch(self, n.to_string())),
            },
            (Self::String, serde_json::Value::String(s)) => Value::String(s.as_str().into()),
            _ => return Err(Error::type_mismatch(self, json.to_string())),
        };
        Ok(value)
    }

    /// Returns the default value for a fresh instance of this type.
    #[must_use]
    pub fn default_value(self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::Float => Value::Float(0.0),
            Self::String => Value::String("".into()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
        }
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bool" => Ok(Self::Bool),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "string" => Ok(Self::String),
            other => Err(Error::new(ErrorKind::MetadataError(format!(
                "unknown data type '{other}'"
            )))),
        }
    }
}
