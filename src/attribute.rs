//! Per-node key/value attributes
//!
//! Keys are unique per node. Lookup is by key; display follows insertion
//! order, and replacing a value keeps the key in its original position.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute marking a node invisible in default listings
pub const INVISIBLE: &str = "R.invisible";

/// Attribute holding the class of an integer array (`"factor"`)
pub const CLASS: &str = "R.class";

/// Attribute holding factor level strings
pub const LEVELS: &str = "R.levels";

/// Attribute marking an integer array as logical
pub const LOGICAL: &str = "R.logical";

/// Attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Real(f64),
    Str(String),
    Bool(bool),
    Array(Vec<AttrValue>),
    /// Present but carries no value (e.g. a marker attribute)
    None,
}

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            AttrValue::Real(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Plain JSON rendering (no variant tags)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::Int(v) => serde_json::Value::from(*v),
            AttrValue::Real(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            AttrValue::Str(s) => serde_json::Value::from(s.as_str()),
            AttrValue::Bool(b) => serde_json::Value::from(*b),
            AttrValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(AttrValue::to_json).collect())
            }
            AttrValue::None => serde_json::Value::Null,
        }
    }

    /// Flatten a string or array-of-strings value
    ///
    /// Factor levels are stored either way; non-string items are skipped.
    pub fn string_list(&self) -> Vec<String> {
        match self {
            AttrValue::Str(s) => vec![s.clone()],
            AttrValue::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Real(v) => write!(f, "{}", v),
            AttrValue::Str(s) => write!(f, "{:?}", s),
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::None => write!(f, "NULL"),
            AttrValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(v as i64)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Real(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl<T: Into<AttrValue>> From<Vec<T>> for AttrValue {
    fn from(items: Vec<T>) -> Self {
        AttrValue::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Ordered attribute store of one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Insert or replace; returns the previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Option<AttrValue> {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in display order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// JSON object in display order
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}
