//! Structural type descriptors for Assets.

use crate::value::{FieldPath, PathSegment, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    String,
    Integer,
    /// Integer or floating point.
    Number,
    Boolean,
}

/// Structural type of an Asset value. Fixed at Asset creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetSchema {
    /// Accepts any value
    #[default]
    Any,
    Primitive { primitive: PrimitiveType },
    /// Object with known fields. Fields absent from a value are allowed so
    /// that merge-writes can populate the object incrementally.
    Object { fields: IndexMap<String, AssetSchema> },
    Array { items: Box<AssetSchema> },
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// A record from an external database, carried as an object.
    DatabaseEntity { entity: String },
}

impl AssetSchema {
    pub fn primitive(primitive: PrimitiveType) -> Self {
        AssetSchema::Primitive { primitive }
    }

    pub fn text() -> Self {
        Self::primitive(PrimitiveType::String)
    }

    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, AssetSchema)>,
    {
        AssetSchema::Object {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn array(items: AssetSchema) -> Self {
        AssetSchema::Array {
            items: Box::new(items),
        }
    }

    /// Check that `value` is an instance of this schema.
    pub fn conforms(&self, value: &Value) -> bool {
        match (self, value) {
            (AssetSchema::Any, _) => true,
            (AssetSchema::Primitive { primitive }, value) => match (primitive, value) {
                (PrimitiveType::String, Value::Text(_)) => true,
                (PrimitiveType::Integer, Value::Int(_)) => true,
                (PrimitiveType::Number, Value::Int(_) | Value::Float(_)) => true,
                (PrimitiveType::Boolean, Value::Bool(_)) => true,
                _ => false,
            },
            (AssetSchema::Object { fields }, Value::Object(map)) => {
                map.iter().all(|(name, field_value)| {
                    fields
                        .get(name)
                        .map_or(true, |field_schema| field_schema.conforms(field_value))
                })
            }
            (AssetSchema::Array { items }, Value::Array(values)) => {
                values.iter().all(|v| items.conforms(v))
            }
            (AssetSchema::File { mime_type }, Value::File(file)) => match mime_type {
                Some(expected) => file.mime_type.as_deref() == Some(expected.as_str()),
                None => true,
            },
            (AssetSchema::DatabaseEntity { .. }, Value::Object(_)) => true,
            _ => false,
        }
    }

    /// Schema of the location addressed by `path`, when it is statically known.
    /// Unknown object fields and `Any` resolve to `Any`.
    pub fn at_path(&self, path: &FieldPath) -> Option<&AssetSchema> {
        const ANY: &AssetSchema = &AssetSchema::Any;
        path.segments()
            .iter()
            .try_fold(self, |schema, segment| match (schema, segment) {
                (AssetSchema::Any, _) => Some(ANY),
                (AssetSchema::Object { fields }, PathSegment::Field(name)) => {
                    Some(fields.get(name).unwrap_or(ANY))
                }
                (AssetSchema::DatabaseEntity { .. }, PathSegment::Field(_)) => Some(ANY),
                (AssetSchema::Array { items }, PathSegment::Index(_)) => Some(items.as_ref()),
                _ => None,
            })
    }
}

impl fmt::Display for AssetSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetSchema::Any => f.write_str("any"),
            AssetSchema::Primitive { primitive } => write!(f, "{primitive:?}"),
            AssetSchema::Object { fields } => {
                let names: Vec<&str> = fields.keys().map(String::as_str).collect();
                write!(f, "object{{{}}}", names.join(", "))
            }
            AssetSchema::Array { items } => write!(f, "array<{items}>"),
            AssetSchema::File { mime_type: Some(mime) } => write!(f, "file({mime})"),
            AssetSchema::File { mime_type: None } => f.write_str("file"),
            AssetSchema::DatabaseEntity { entity } => write!(f, "entity({entity})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FileRef;

    #[test]
    fn test_primitive_conformance() {
        assert!(AssetSchema::text().conforms(&Value::from("x")));
        assert!(!AssetSchema::text().conforms(&Value::Int(1)));
        let number = AssetSchema::primitive(PrimitiveType::Number);
        assert!(number.conforms(&Value::Int(1)));
        assert!(number.conforms(&Value::Float(1.5)));
        assert!(!number.conforms(&Value::Null));
    }

    #[test]
    fn test_object_allows_missing_fields_but_checks_present_ones() {
        let schema = AssetSchema::object([
            ("title", AssetSchema::text()),
            ("score", AssetSchema::primitive(PrimitiveType::Number)),
        ]);
        assert!(schema.conforms(&Value::object([("title", Value::from("t"))])));
        assert!(!schema.conforms(&Value::object([("title", Value::Int(3))])));
        assert!(schema.conforms(&Value::object([("extra", Value::Bool(true))])));
        assert!(!schema.conforms(&Value::from("not an object")));
    }

    #[test]
    fn test_array_checks_every_item() {
        let schema = AssetSchema::array(AssetSchema::text());
        assert!(schema.conforms(&Value::Array(vec![Value::from("a"), Value::from("b")])));
        assert!(!schema.conforms(&Value::Array(vec![Value::from("a"), Value::Int(1)])));
    }

    #[test]
    fn test_file_mime_type() {
        let schema = AssetSchema::File {
            mime_type: Some("text/csv".to_string()),
        };
        let csv = Value::File(FileRef::new("file:///tmp/a.csv").with_mime_type("text/csv"));
        let pdf = Value::File(FileRef::new("file:///tmp/a.pdf").with_mime_type("application/pdf"));
        assert!(schema.conforms(&csv));
        assert!(!schema.conforms(&pdf));
    }

    #[test]
    fn test_at_path() {
        let schema = AssetSchema::object([("items", AssetSchema::array(AssetSchema::text()))]);
        let path = FieldPath::parse("items[0]").unwrap();
        assert_eq!(schema.at_path(&path), Some(&AssetSchema::text()));
        let unknown = FieldPath::parse("other.deep").unwrap();
        assert_eq!(schema.at_path(&unknown), Some(&AssetSchema::Any));
        let bad = FieldPath::parse("items.name").unwrap();
        assert_eq!(schema.at_path(&bad), None);
    }

    #[test]
    fn test_schema_serde_shape() {
        let schema = AssetSchema::primitive(PrimitiveType::String);
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "primitive", "primitive": "string"}));
    }
}
