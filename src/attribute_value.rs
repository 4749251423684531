use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::f64_as_exact_i64;

/// An attribute value represents possible values that can be stored in a [crate::Context].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Stores a string value.
    String(String),
    /// Stores an array of attribute values.
    Array(Vec<AttributeValue>),
    /// Stores a number.
    Number(f64),
    /// Stores a boolean.
    Bool(bool),
    /// Stores a map of attribute values.
    Object(HashMap<String, AttributeValue>),
    /// Stores a null value.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> AttributeValue {
        AttributeValue::String(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> AttributeValue {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> AttributeValue {
        AttributeValue::Bool(b)
    }
}

impl From<i32> for AttributeValue {
    fn from(i: i32) -> Self {
        AttributeValue::Number(i.into())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Number(i as f64)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Number(f)
    }
}

impl<T> From<Vec<T>> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from(v: Vec<T>) -> AttributeValue {
        v.into_iter().collect()
    }
}

impl<T> FromIterator<T> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        AttributeValue::Array(iter.into_iter().map(AttributeValue::from).collect())
    }
}

impl From<&Value> for AttributeValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => match n.as_f64() {
                Some(float) => AttributeValue::Number(float),
                None => {
                    warn!("could not interpret '{:?}' as f64", n);
                    AttributeValue::String(n.to_string())
                }
            },
            Value::String(str) => AttributeValue::String(str.clone()),
            Value::Array(arr) => {
                AttributeValue::Array(arr.iter().map(AttributeValue::from).collect())
            }
            Value::Object(obj) => AttributeValue::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), AttributeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for AttributeValue {
    fn from(v: Value) -> Self {
        AttributeValue::from(&v)
    }
}

impl AttributeValue {
    /// Returns None unless self is a String. It will not convert.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the wrapped value as a float for numeric types and for strings holding a number,
    /// and None otherwise.
    ///
    /// Ordering operators compare both sides through this conversion, so `"3"` is greater than
    /// `2`.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(f) => Some(*f),
            AttributeValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Returns None unless self is a bool. It will not convert.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns None unless self is an array. It will not convert.
    pub fn as_array(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Returns the string used to identify a context when bucketing it into a rollout, or None for
    /// null.
    ///
    /// Whole numbers render without a fraction, so `1`, `1.0` and `"1"` identify the same context;
    /// other numbers use their decimal form (`1.5` is `"1.5"`). Booleans render as `"1"` and `"0"`.
    /// Arrays and objects use their JSON text.
    pub(crate) fn as_identifier(&self) -> Option<String> {
        match self {
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Number(f) => Some(match f64_as_exact_i64(*f) {
                Some(i) => i.to_string(),
                None => f.to_string(),
            }),
            AttributeValue::Bool(true) => Some("1".to_string()),
            AttributeValue::Bool(false) => Some("0".to_string()),
            AttributeValue::Array(_) | AttributeValue::Object(_) => serde_json::to_string(self).ok(),
            AttributeValue::Null => None,
        }
    }
}
