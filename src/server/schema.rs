//! Tool input schemas
//!
//! A schema is an explicit list of named fields, each tagged with the JSON
//! type it expects and whether it is required. Arguments are checked against
//! it structurally before a call is dispatched to a handler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ValidationError;

/// JSON type expected for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldType {
    /// JSON Schema type name
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }

    /// Whether `value` has this type. Integers must be integral.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }
}

/// One field of an input schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub required: bool,
    pub description: Option<String>,
}

/// Input schema of a tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field
    pub fn required(self, name: &str, field_type: FieldType, description: &str) -> Self {
        self.field(name, field_type, true, description)
    }

    /// Add an optional field
    pub fn optional(self, name: &str, field_type: FieldType, description: &str) -> Self {
        self.field(name, field_type, false, description)
    }

    fn field(mut self, name: &str, field_type: FieldType, required: bool, description: &str) -> Self {
        let description = (!description.is_empty()).then(|| description.to_string());
        self.fields.insert(
            name.to_string(),
            FieldSpec {
                field_type,
                required,
                description,
            },
        );
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Validate call arguments.
    ///
    /// `null` is treated as an empty object, and an explicit `null` for an
    /// optional field counts as absent. Fields not in the schema pass through.
    pub fn validate(&self, arguments: &Value) -> Result<Map<String, Value>, ValidationError> {
        let arguments = match arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(ValidationError::NotAnObject {
                    found: json_type_name(other),
                })
            }
        };

        for (name, spec) in &self.fields {
            match arguments.get(name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(ValidationError::MissingField {
                        field: name.clone(),
                    });
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.field_type.accepts(value) => {
                    return Err(ValidationError::TypeMismatch {
                        field: name.clone(),
                        expected: spec.field_type.as_str(),
                        found: json_type_name(value),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(arguments)
    }

    /// Render as JSON Schema for discovery listings
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for (name, spec) in &self.fields {
            let mut property = Map::new();
            if spec.field_type != FieldType::Any {
                property.insert("type".into(), json!(spec.field_type.as_str()));
            }
            if let Some(description) = &spec.description {
                property.insert("description".into(), json!(description));
            }
            properties.insert(name.clone(), Value::Object(property));
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Name of a value's JSON type, for error messages
pub fn json_type_name(value: &Value) -> &'static str {
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
