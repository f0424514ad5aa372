//! Option Values & Option Sets
//!
//! [`OptionValue`] is the dynamically typed value carried by stage option
//! maps. It mirrors the small set of semantic types stage configurations use:
//! booleans, integers, floats, enum/string tags and 2-component dimensions.
//!
//! [`OptionSet`] is an immutable, key-ordered mapping of option name to value.
//! Ordering by key keeps every derived artifact (stage properties, reports)
//! byte-stable across runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single stage option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    /// 2-component dimensions such as an output size in pixels.
    Dims([u32; 2]),
    /// Free-form string or enum tag.
    Text(String),
}

impl OptionValue {
    /// Short type name used in diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Dims(_) => "dims",
            Self::Text(_) => "string",
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Converts the value into its JSON form.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Dims([w, h]) => serde_json::Value::from(vec![*w, *h]),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Converts a JSON scalar (or 2-element integer array) back into a value.
    ///
    /// Returns `None` for `null`, objects and arrays of other shapes.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Array(items) if items.len() == 2 => {
                let w = u32::try_from(items[0].as_u64()?).ok()?;
                let h = u32::try_from(items[1].as_u64()?).ok()?;
                Some(Self::Dims([w, h]))
            }
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Dims([w, h]) => write!(f, "({w}, {h})"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for OptionValue {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<[u32; 2]> for OptionValue {
    fn from(v: [u32; 2]) -> Self {
        Self::Dims(v)
    }
}

impl From<(u32, u32)> for OptionValue {
    fn from((w, h): (u32, u32)) -> Self {
        Self::Dims([w, h])
    }
}

// ============================================================================
// OptionSet
// ============================================================================

/// Immutable mapping of option name to value.
///
/// Built once (usually by the scenario matrix) and then only read. The
/// chaining [`with`](Self::with) constructor consumes `self`, so a set that
/// has been handed to a run can no longer change underneath it.
///
/// ```rust,ignore
/// let options = OptionSet::new().with("useNEE", true).with("upperBounceCount", 5);
/// assert_eq!(options.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionSet(BTreeMap<String, OptionValue>);

impl OptionSet {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns a copy of this set with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys whose values differ between `self` and `other`, including keys
    /// present on one side only.
    #[must_use]
    pub fn diff_keys(&self, other: &Self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .0
            .iter()
            .filter(|(k, v)| other.0.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        keys.extend(
            other
                .0
                .keys()
                .filter(|k| !self.0.contains_key(*k))
                .cloned(),
        );
        keys.sort();
        keys
    }
}

impl<K, V> FromIterator<(K, V)> for OptionSet
where
    K: Into<String>,
    V: Into<OptionValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for OptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        f.write_str("}")
    }
}
