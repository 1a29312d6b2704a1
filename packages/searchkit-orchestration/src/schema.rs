//! Schema descriptors
//!
//! A closed, finite tree describing the shape of stage payloads. The same
//! descriptor serves two purposes:
//! - setup-time contract verification between adjacent stages (see `contract`)
//! - per-request value validation inside a stage adapter (`validate`)
//!
//! Leaf kinds only matter for value validation; contract verification treats
//! every leaf as opaque.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Primitive kind carried by a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafKind {
    Any,
    String,
    Number,
    Integer,
    Boolean,
}

impl LeafKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeafKind::Any => "any",
            LeafKind::String => "string",
            LeafKind::Number => "number",
            LeafKind::Integer => "integer",
            LeafKind::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            LeafKind::Any => !value.is_object() && !value.is_array(),
            LeafKind::String => value.is_string(),
            LeafKind::Number => value.is_number(),
            LeafKind::Integer => value.is_i64() || value.is_u64(),
            LeafKind::Boolean => value.is_boolean(),
        }
    }
}

/// Structural type descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SchemaDescriptor {
    Leaf {
        #[serde(default = "default_leaf_kind")]
        kind: LeafKind,
    },
    Object {
        #[serde(default)]
        fields: IndexMap<String, SchemaDescriptor>,
    },
    Array {
        element: Box<SchemaDescriptor>,
    },
}

fn default_leaf_kind() -> LeafKind {
    LeafKind::Any
}

impl SchemaDescriptor {
    pub fn leaf(kind: LeafKind) -> Self {
        SchemaDescriptor::Leaf { kind }
    }

    /// Any primitive, including `null`. Objects and arrays need their own
    /// descriptor, since a leaf never satisfies an object or array contract.
    pub fn any() -> Self {
        Self::leaf(LeafKind::Any)
    }

    pub fn string() -> Self {
        Self::leaf(LeafKind::String)
    }

    pub fn number() -> Self {
        Self::leaf(LeafKind::Number)
    }

    pub fn integer() -> Self {
        Self::leaf(LeafKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::leaf(LeafKind::Boolean)
    }

    /// Object descriptor; field order follows the iterator
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, SchemaDescriptor)>,
    {
        SchemaDescriptor::Object {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn array(element: SchemaDescriptor) -> Self {
        SchemaDescriptor::Array {
            element: Box::new(element),
        }
    }

    /// Tag name (`leaf`, `object`, `array`)
    pub fn tag(&self) -> &'static str {
        match self {
            SchemaDescriptor::Leaf { .. } => "leaf",
            SchemaDescriptor::Object { .. } => "object",
            SchemaDescriptor::Array { .. } => "array",
        }
    }

    /// Validate a payload against this descriptor.
    ///
    /// Objects must carry every declared field; undeclared fields are allowed.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaViolation> {
        self.validate_at(value, &mut String::from("$"))
    }

    fn validate_at(&self, value: &Value, path: &mut String) -> Result<(), SchemaViolation> {
        match self {
            SchemaDescriptor::Leaf { kind } => {
                if kind.accepts(value) {
                    Ok(())
                } else {
                    Err(SchemaViolation::new(path, kind.as_str(), value))
                }
            }
            SchemaDescriptor::Object { fields } => {
                let object = value
                    .as_object()
                    .ok_or_else(|| SchemaViolation::new(path, "object", value))?;

                for (name, descriptor) in fields {
                    let base = path.len();
                    path.push('.');
                    path.push_str(name);
                    match object.get(name) {
                        Some(field) => descriptor.validate_at(field, path)?,
                        None => {
                            return Err(SchemaViolation {
                                path: path.clone(),
                                expected: descriptor.tag().to_string(),
                                found: "missing".to_string(),
                            })
                        }
                    }
                    path.truncate(base);
                }
                Ok(())
            }
            SchemaDescriptor::Array { element } => {
                let items = value
                    .as_array()
                    .ok_or_else(|| SchemaViolation::new(path, "array", value))?;

                for (i, item) in items.iter().enumerate() {
                    let base = path.len();
                    path.push_str(&format!("[{}]", i));
                    element.validate_at(item, path)?;
                    path.truncate(base);
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaDescriptor::Leaf { kind } => write!(f, "{}", kind.as_str()),
            SchemaDescriptor::Object { fields } => {
                write!(f, "{{")?;
                for (i, (name, descriptor)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, descriptor)?;
                }
                write!(f, "}}")
            }
            SchemaDescriptor::Array { element } => write!(f, "[{}]", element),
        }
    }
}

/// Value-level validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl SchemaViolation {
    fn new(path: &str, expected: &str, value: &Value) -> Self {
        Self {
            path: path.to_string(),
            expected: expected.to_string(),
            found: json_type_name(value).to_string(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, found {}",
            self.path, self.expected, self.found
        )
    }
}

impl std::error::Error for SchemaViolation {}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
