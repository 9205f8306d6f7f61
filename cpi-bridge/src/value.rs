//! Typed structured values and their conversion to and from generic JSON.
//!
//! `Struct`, `Value` and `Kind` are the typed schema for free-form blobs
//! (properties, cloud properties, networks, env, metadata). `GenericValue`
//! is the JSON tree that travels to and from plugins.
//!
//! Conversion is total on null, number, string, bool, list and mapping.
//! Anything else is reported as a [`ConversionError`] carrying the path to the
//! offending value.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Generic JSON value exchanged with plugins.
pub type GenericValue = serde_json::Value;

/// Generic JSON mapping (object) exchanged with plugins.
pub type GenericMap = serde_json::Map<String, GenericValue>;

/// 2^53: every integer up to this magnitude is exact in an f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A typed mapping of string keys to [`Value`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Struct {
    pub fields: BTreeMap<String, Value>,
}

/// A typed value. `kind` is `None` when no variant was set by the producer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Value {
    pub kind: Option<Kind>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Null,
    Number(f64),
    String(String),
    Bool(bool),
    Struct(Struct),
    List(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    #[error("value at {path} has no kind set")]
    MissingKind { path: String },

    #[error("number at {path} is not finite: {value}")]
    NonFiniteNumber { path: String, value: f64 },

    /// Only reachable when serde_json's `arbitrary_precision` feature is
    /// enabled somewhere in the dependency graph. Without it every parsed
    /// number already has an f64 form.
    #[error("number at {path} has no float64 representation: {value}")]
    UnrepresentableNumber { path: String, value: String },
}

impl Struct {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Struct {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl Value {
    pub fn null() -> Self {
        Kind::Null.into()
    }

    /// A value with no kind set. Conversion to generic form rejects it.
    pub fn unset() -> Self {
        Self { kind: None }
    }

    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        Kind::List(values.into_iter().collect()).into()
    }
}

impl From<Kind> for Value {
    fn from(kind: Kind) -> Self {
        Self { kind: Some(kind) }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Kind::Number(n).into()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Kind::Bool(b).into()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Kind::String(s.to_string()).into()
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Kind::String(s).into()
    }
}

impl From<Struct> for Value {
    fn from(s: Struct) -> Self {
        Kind::Struct(s).into()
    }
}

/// Location of a value inside a tree, built on the stack while recursing and
/// only rendered when an error is reported.
#[derive(Clone, Copy)]
enum Path<'a> {
    Root,
    Key(&'a Path<'a>, &'a str),
    Index(&'a Path<'a>, usize),
}

impl fmt::Display for Path<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Path::Root => write!(f, "$"),
            Path::Key(parent, key) => write!(f, "{parent}.{key}"),
            Path::Index(parent, i) => write!(f, "{parent}[{i}]"),
        }
    }
}

/// Convert a typed struct into a generic JSON mapping.
pub fn to_generic(s: &Struct) -> Result<GenericMap, ConversionError> {
    struct_to_generic(s, &Path::Root)
}

/// Convert a generic JSON mapping into a typed struct.
pub fn from_generic(map: GenericMap) -> Result<Struct, ConversionError> {
    struct_from_generic(map, &Path::Root)
}

/// Convert a typed value into a generic JSON value.
pub fn value_to_generic(value: &Value) -> Result<GenericValue, ConversionError> {
    value_to_generic_at(value, &Path::Root)
}

/// Convert a generic JSON value into a typed value.
pub fn value_from_generic(value: GenericValue) -> Result<Value, ConversionError> {
    value_from_generic_at(value, &Path::Root)
}

fn struct_to_generic(s: &Struct, path: &Path<'_>) -> Result<GenericMap, ConversionError> {
    let mut map = GenericMap::new();
    for (key, value) in &s.fields {
        let generic = value_to_generic_at(value, &Path::Key(path, key))?;
        map.insert(key.clone(), generic);
    }
    Ok(map)
}

fn value_to_generic_at(value: &Value, path: &Path<'_>) -> Result<GenericValue, ConversionError> {
    let Some(kind) = &value.kind else {
        return Err(ConversionError::MissingKind {
            path: path.to_string(),
        });
    };

    Ok(match kind {
        Kind::Null => GenericValue::Null,
        Kind::Number(n) => number_to_generic(*n, path)?,
        Kind::String(s) => GenericValue::String(s.clone()),
        Kind::Bool(b) => GenericValue::Bool(*b),
        Kind::Struct(s) => GenericValue::Object(struct_to_generic(s, path)?),
        Kind::List(values) => GenericValue::Array(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| value_to_generic_at(v, &Path::Index(path, i)))
                .collect::<Result<_, _>>()?,
        ),
    })
}

/// Integral numbers are emitted as JSON integers so plugins see `5`, not `5.0`.
fn number_to_generic(n: f64, path: &Path<'_>) -> Result<GenericValue, ConversionError> {
    let non_finite = || ConversionError::NonFiniteNumber {
        path: path.to_string(),
        value: n,
    };

    if !n.is_finite() {
        return Err(non_finite());
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Ok(GenericValue::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(GenericValue::Number)
        .ok_or_else(non_finite)
}

fn struct_from_generic(map: GenericMap, path: &Path<'_>) -> Result<Struct, ConversionError> {
    let mut fields = BTreeMap::new();
    for (key, value) in map {
        let typed = value_from_generic_at(value, &Path::Key(path, &key))?;
        fields.insert(key, typed);
    }
    Ok(Struct { fields })
}

fn value_from_generic_at(value: GenericValue, path: &Path<'_>) -> Result<Value, ConversionError> {
    let kind = match value {
        GenericValue::Null => Kind::Null,
        GenericValue::Bool(b) => Kind::Bool(b),
        GenericValue::Number(n) => Kind::Number(n.as_f64().ok_or_else(|| {
            ConversionError::UnrepresentableNumber {
                path: path.to_string(),
                value: n.to_string(),
            }
        })?),
        GenericValue::String(s) => Kind::String(s),
        GenericValue::Array(values) => Kind::List(
            values
                .into_iter()
                .enumerate()
                .map(|(i, v)| value_from_generic_at(v, &Path::Index(path, i)))
                .collect::<Result<_, _>>()?,
        ),
        GenericValue::Object(map) => Kind::Struct(struct_from_generic(map, path)?),
    };
    Ok(kind.into())
}

impl TryFrom<&Struct> for GenericMap {
    type Error = ConversionError;

    fn try_from(s: &Struct) -> Result<Self, Self::Error> {
        to_generic(s)
    }
}

impl TryFrom<GenericMap> for Struct {
    type Error = ConversionError;

    fn try_from(map: GenericMap) -> Result<Self, Self::Error> {
        from_generic(map)
    }
}

// Structs and values travel as plain JSON, the same shape plugins receive.

impl Serialize for Struct {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_generic(self)
            .map_err(<S::Error as serde::ser::Error>::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Struct {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = GenericMap::deserialize(deserializer)?;
        from_generic(map).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        value_to_generic(self)
            .map_err(<S::Error as serde::ser::Error>::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = GenericValue::deserialize(deserializer)?;
        value_from_generic(value).map_err(serde::de::Error::custom)
    }
}
