//! Query parameter values.
//!
//! Every placeholder in a condition, raw statement or mutation is bound from a
//! [`QueryParam`]. Conversions from the common Rust types are provided so call
//! sites can use the [`params!`](crate::params) macro with plain literals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Timestamp (bound natively so timestamp columns accept it)
    Timestamp(DateTime<Utc>),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// JSON document
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    /// Convert a JSON value taken from a serialized model into a parameter.
    ///
    /// Scalars map onto their native parameter type; arrays and objects are
    /// bound as JSON documents. RFC 3339 strings (how chrono serializes
    /// timestamps) are bound as timestamps.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(v) => Self::Bool(v),
            JsonValue::Number(n) => match n.as_i64() {
                Some(v) => Self::Int(v),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            JsonValue::String(v) => match DateTime::parse_from_rfc3339(&v) {
                Ok(ts) => Self::Timestamp(ts.with_timezone(&Utc)),
                Err(_) => Self::String(v),
            },
            other => Self::Json(other),
        }
    }

    /// True for values GORM-style ORMs treat as "unset" primary keys.
    pub fn is_zero_key(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Int(v) => *v == 0,
            Self::String(v) => v.is_empty(),
            _ => false,
        }
    }
}

macro_rules! impl_from_param {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for QueryParam {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )+
    };
}

impl_from_param! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => String,
    DateTime<Utc> => Timestamp,
    Vec<u8> => Bytes,
    JsonValue => Json,
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<&String> for QueryParam {
    fn from(value: &String) -> Self {
        Self::String(value.clone())
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Build a `Vec<QueryParam>` from heterogeneous values.
///
/// ```
/// use ormkit::params;
/// let args = params![1, "alice", true];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::QueryParam>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::QueryParam::from($value)),+]
    };
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_macro_converts_literals() {
        let args = crate::params![1, "alice", 2.5, true, None::<i64>];
        assert_eq!(
            args,
            vec![
                QueryParam::Int(1),
                QueryParam::String("alice".to_string()),
                QueryParam::Float(2.5),
                QueryParam::Bool(true),
                QueryParam::Null,
            ]
        );
    }

    #[test]
    fn test_params_macro_empty() {
        let args = crate::params![];
        assert!(args.is_empty());
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(QueryParam::from_json(json!(null)), QueryParam::Null);
        assert_eq!(QueryParam::from_json(json!(42)), QueryParam::Int(42));
        assert_eq!(QueryParam::from_json(json!(1.5)), QueryParam::Float(1.5));
        assert_eq!(
            QueryParam::from_json(json!("x")),
            QueryParam::String("x".to_string())
        );
        assert_eq!(
            QueryParam::from_json(json!({"a": 1})),
            QueryParam::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn test_from_json_rfc3339_is_timestamp() {
        let param = QueryParam::from_json(json!("2024-03-01T12:00:00+00:00"));
        assert_eq!(param.type_name(), "timestamp");
        assert_eq!(
            QueryParam::from_json(json!("2024-03-01")),
            QueryParam::String("2024-03-01".to_string())
        );
    }

    #[test]
    fn test_is_zero_key() {
        assert!(QueryParam::Null.is_zero_key());
        assert!(QueryParam::Int(0).is_zero_key());
        assert!(!QueryParam::Int(7).is_zero_key());
        assert!(QueryParam::String(String::new()).is_zero_key());
    }

    #[test]
    fn test_type_name() {
        assert_eq!(QueryParam::Null.type_name(), "null");
        assert_eq!(QueryParam::Timestamp(Utc::now()).type_name(), "timestamp");
    }
}
