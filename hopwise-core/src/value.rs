//! Structural values and path addressing.
//!
//! Asset values and tool parameters are tagged structural values rather than
//! untyped dictionaries. A [`FieldPath`] addresses a location inside a value
//! and drives both parameter sub-path reads and result merge-writes.
//!
//! # Merge-write semantics
//!
//! [`Value::set_path`] performs a deep set with replace-at-leaf:
//!
//! - missing (or `Null`) intermediate containers are created
//! - the value at the final segment is replaced wholesale
//! - `Index(i)` with `i == len` appends one element, `i > len` misses
//! - stepping through a scalar misses
//!
//! Writing the same `(path, value)` twice leaves the same structure as
//! writing it once.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Ordered field map used by [`Value::Object`].
pub type ValueMap = IndexMap<String, Value>;

/// Marker key used when a [`FileRef`] is carried through plain JSON.
pub const FILE_MARKER: &str = "$file";

/// Reference to a file-like value (uploaded document, generated export, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl FileRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: None,
            size_bytes: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// A tagged structural value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<Value>),
    Object(ValueMap),
    File(FileRef),
}

impl Value {
    /// Build an object value from `(name, value)` pairs.
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::File(_) => "file",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ValueMap> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Read the value addressed by `path`. The empty path addresses `self`.
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        path.segments()
            .iter()
            .try_fold(self, |current, segment| match (segment, current) {
                (PathSegment::Field(name), Value::Object(map)) => map.get(name),
                (PathSegment::Index(index), Value::Array(items)) => items.get(*index),
                _ => None,
            })
    }

    /// Deep-set `value` at `path` (see the module docs for the exact rules).
    pub fn set_path(&mut self, path: &FieldPath, value: Value) -> Result<(), PathMiss> {
        set_in(self, path.segments(), value, 0)
    }
}

fn set_in(
    target: &mut Value,
    segments: &[PathSegment],
    value: Value,
    depth: usize,
) -> Result<(), PathMiss> {
    let Some((segment, rest)) = segments.split_first() else {
        *target = value;
        return Ok(());
    };

    match segment {
        PathSegment::Field(name) => {
            if target.is_null() {
                *target = Value::Object(ValueMap::new());
            }
            match target {
                Value::Object(map) => {
                    let slot = map.entry(name.clone()).or_insert(Value::Null);
                    set_in(slot, rest, value, depth + 1)
                }
                _ => Err(PathMiss { depth }),
            }
        }
        PathSegment::Index(index) => {
            if target.is_null() {
                *target = Value::Array(Vec::new());
            }
            match target {
                Value::Array(items) if *index < items.len() => {
                    set_in(&mut items[*index], rest, value, depth + 1)
                }
                Value::Array(items) if *index == items.len() => {
                    items.push(Value::Null);
                    set_in(&mut items[*index], rest, value, depth + 1)
                }
                _ => Err(PathMiss { depth }),
            }
        }
    }
}

/// A path write could not step through segment number `depth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("path does not resolve at segment {depth}")]
pub struct PathMiss {
    pub depth: usize,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<FileRef> for Value {
    fn from(file: FileRef) -> Self {
        Value::File(file)
    }
}

/// Integers outside the `i64` range (large `u64`s) become `Float` and may
/// lose precision.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(inner) = map.get(FILE_MARKER) {
                        if let Ok(file) = serde_json::from_value::<FileRef>(inner.clone()) {
                            return Value::File(file);
                        }
                    }
                }
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            // Non-finite floats have no JSON form.
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
            Value::File(file) => {
                let mut map = serde_json::Map::new();
                map.insert(
                    FILE_MARKER.to_string(),
                    serde_json::to_value(file).unwrap_or(serde_json::Value::Null),
                );
                serde_json::Value::Object(map)
            }
        }
    }
}

// ============================================================================
// FIELD PATHS
// ============================================================================

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Address of a location inside a structured value, e.g. `results[0].title`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// The empty path (addresses the whole value).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse the textual form (`a.b[2].c`). The empty string is the root path.
    pub fn parse(input: &str) -> Result<Self, PathParseError> {
        let mut segments = Vec::new();
        let mut rest = input;
        let mut after_dot = false;

        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix('[') {
                if after_dot {
                    return Err(PathParseError::EmptySegment {
                        path: input.to_string(),
                    });
                }
                let close = tail.find(']').ok_or_else(|| PathParseError::UnterminatedIndex {
                    path: input.to_string(),
                })?;
                let digits = &tail[..close];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(PathParseError::InvalidIndex {
                        path: input.to_string(),
                        index: digits.to_string(),
                    });
                }
                let index = digits.parse().map_err(|_| PathParseError::InvalidIndex {
                    path: input.to_string(),
                    index: digits.to_string(),
                })?;
                segments.push(PathSegment::Index(index));
                rest = &tail[close + 1..];
            } else if let Some(tail) = rest.strip_prefix('.') {
                if segments.is_empty() || after_dot {
                    return Err(PathParseError::EmptySegment {
                        path: input.to_string(),
                    });
                }
                after_dot = true;
                rest = tail;
                continue;
            } else if rest.starts_with(']') || (!segments.is_empty() && !after_dot) {
                // A field must follow a '.', and a ']' must close an index.
                let found = rest.chars().next().unwrap_or(']');
                return Err(PathParseError::UnexpectedCharacter {
                    path: input.to_string(),
                    found,
                });
            } else {
                let end = rest
                    .find(|c: char| matches!(c, '.' | '[' | ']'))
                    .unwrap_or(rest.len());
                segments.push(PathSegment::Field(rest[..end].to_string()));
                rest = &rest[end..];
            }
            after_dot = false;
        }

        if after_dot {
            return Err(PathParseError::EmptySegment {
                path: input.to_string(),
            });
        }
        Ok(Self(segments))
    }

    /// Append a field segment.
    ///
    /// Paths are stored in their textual form, so a name must be non-empty
    /// and free of `.`, `[` and `]`.
    pub fn field(mut self, name: impl Into<String>) -> Result<Self, PathParseError> {
        let name = name.into();
        if name.is_empty() || name.contains(['.', '[', ']']) {
            return Err(PathParseError::InvalidFieldName { name });
        }
        self.0.push(PathSegment::Field(name));
        Ok(self)
    }

    /// Append an index segment.
    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `prefix` addresses this location or one of its ancestors.
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Two paths overlap when one addresses an ancestor of (or the same
    /// location as) the other.
    pub fn overlaps(&self, other: &FieldPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Field(name) if i == 0 => write!(f, "{name}")?,
                PathSegment::Field(name) => write!(f, ".{name}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

/// Error when parsing the textual form of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathParseError {
    #[error("Empty segment in path '{path}'")]
    EmptySegment { path: String },

    #[error("Unterminated index in path '{path}'")]
    UnterminatedIndex { path: String },

    #[error("Invalid index '{index}' in path '{path}'")]
    InvalidIndex { path: String, index: String },

    #[error("Unexpected character '{found}' in path '{path}'")]
    UnexpectedCharacter { path: String, found: char },

    #[error("Invalid field name '{name}'")]
    InvalidFieldName { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse_fields_and_indices() {
        let p = path("results[2].title");
        assert_eq!(
            p.segments(),
            &[
                PathSegment::Field("results".to_string()),
                PathSegment::Index(2),
                PathSegment::Field("title".to_string()),
            ]
        );
        assert_eq!(p.to_string(), "results[2].title");
    }

    #[test]
    fn test_parse_leading_index_and_nested_indices() {
        let p = path("[0][1]");
        assert_eq!(p.segments(), &[PathSegment::Index(0), PathSegment::Index(1)]);
        assert_eq!(p.to_string(), "[0][1]");
    }

    #[test]
    fn test_parse_empty_is_root() {
        assert!(path("").is_root());
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        assert!(matches!(FieldPath::parse("a..b"), Err(PathParseError::EmptySegment { .. })));
        assert!(matches!(FieldPath::parse(".a"), Err(PathParseError::EmptySegment { .. })));
        assert!(matches!(FieldPath::parse("a."), Err(PathParseError::EmptySegment { .. })));
        assert!(matches!(FieldPath::parse("a.[0]"), Err(PathParseError::EmptySegment { .. })));
        assert!(matches!(FieldPath::parse("a[0"), Err(PathParseError::UnterminatedIndex { .. })));
        assert!(matches!(FieldPath::parse("a[x]"), Err(PathParseError::InvalidIndex { .. })));
        assert!(matches!(FieldPath::parse("a[]"), Err(PathParseError::InvalidIndex { .. })));
        assert!(matches!(
            FieldPath::parse("a[0]b"),
            Err(PathParseError::UnexpectedCharacter { found: 'b', .. })
        ));
        assert!(matches!(
            FieldPath::parse("a]"),
            Err(PathParseError::UnexpectedCharacter { found: ']', .. })
        ));
    }

    #[test]
    fn test_path_serializes_as_string() {
        let p = path("a.b[1]");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"a.b[1]\"");
        let back: FieldPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert!(serde_json::from_str::<FieldPath>("\"a..b\"").is_err());
    }

    #[test]
    fn test_field_rejects_names_that_change_shape() {
        for name in ["", "a.b", "x[0]", "a]", "[1]"] {
            assert_eq!(
                FieldPath::root().field(name),
                Err(PathParseError::InvalidFieldName {
                    name: name.to_string()
                })
            );
        }
    }

    #[test]
    fn test_built_path_keeps_shape_through_json() {
        let p = FieldPath::root()
            .field("items")
            .unwrap()
            .index(3)
            .field("snake_case-name")
            .unwrap();
        let json = serde_json::to_string(&p).unwrap();
        let back: FieldPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert_eq!(back.len(), 3);
    }

    #[test]
    fn test_overlaps() {
        assert!(path("a.b").overlaps(&path("a")));
        assert!(path("a").overlaps(&path("a.b")));
        assert!(path("a").overlaps(&FieldPath::root()));
        assert!(!path("a.b").overlaps(&path("a.c")));
    }

    #[test]
    fn test_get_path() {
        let v = Value::object([(
            "results",
            Value::Array(vec![Value::object([("title", Value::from("x"))])]),
        )]);
        assert_eq!(v.get_path(&path("results[0].title")), Some(&Value::from("x")));
        assert_eq!(v.get_path(&path("results[1].title")), None);
        assert_eq!(v.get_path(&path("results.title")), None);
        assert_eq!(v.get_path(&FieldPath::root()), Some(&v));
    }

    #[test]
    fn test_set_path_creates_intermediate_objects() {
        let mut v = Value::Null;
        v.set_path(&path("summary.text"), Value::from("hello")).unwrap();
        assert_eq!(
            v,
            Value::object([("summary", Value::object([("text", Value::from("hello"))]))])
        );
    }

    #[test]
    fn test_set_path_replaces_leaf_wholesale() {
        let mut v = Value::object([(
            "meta",
            Value::object([("a", Value::Int(1)), ("b", Value::Int(2))]),
        )]);
        v.set_path(&path("meta"), Value::object([("c", Value::Int(3))]))
            .unwrap();
        assert_eq!(v, Value::object([("meta", Value::object([("c", Value::Int(3))]))]));
    }

    #[test]
    fn test_set_path_keeps_sibling_fields() {
        let mut v = Value::object([("a", Value::Int(1))]);
        v.set_path(&path("b"), Value::Int(2)).unwrap();
        assert_eq!(v, Value::object([("a", Value::Int(1)), ("b", Value::Int(2))]));
    }

    #[test]
    fn test_set_path_array_append_and_replace() {
        let mut v = Value::Array(vec![Value::Int(1)]);
        v.set_path(&path("[1]"), Value::Int(2)).unwrap();
        v.set_path(&path("[0]"), Value::Int(9)).unwrap();
        assert_eq!(v, Value::Array(vec![Value::Int(9), Value::Int(2)]));
        assert_eq!(v.set_path(&path("[5]"), Value::Int(0)), Err(PathMiss { depth: 0 }));
    }

    #[test]
    fn test_set_path_through_scalar_misses() {
        let mut v = Value::object([("name", Value::from("x"))]);
        assert_eq!(
            v.set_path(&path("name.first"), Value::from("y")),
            Err(PathMiss { depth: 1 })
        );
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({
            "n": 3,
            "f": 1.5,
            "list": [true, null],
            "doc": { "$file": { "uri": "s3://bucket/report.pdf", "mime_type": "application/pdf" } }
        });
        let value = Value::from(json.clone());
        assert_eq!(value.get_path(&path("n")), Some(&Value::Int(3)));
        assert_eq!(value.get_path(&path("f")), Some(&Value::Float(1.5)));
        assert!(matches!(value.get_path(&path("doc")), Some(Value::File(_))));
        assert_eq!(serde_json::Value::from(value), json);
    }

    #[test]
    fn test_integer_beyond_i64_becomes_float() {
        let value = Value::from(serde_json::json!(u64::MAX));
        assert_eq!(value, Value::Float(u64::MAX as f64));
        assert_eq!(Value::from(serde_json::json!(i64::MAX)), Value::Int(i64::MAX));
    }

    #[test]
    fn test_non_finite_float_becomes_json_null() {
        assert_eq!(serde_json::Value::from(Value::Float(f64::NAN)), serde_json::Value::Null);
    }
}
