//! Input field shapes and their validation.
//!
//! A [`Shape`] is an ordered mapping of field name to [`Field`] validator.
//! It validates raw tool-call input into a value holding exactly the
//! declared fields, and converts to a JSON-Schema object for manifests.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// An ordered set of named input fields.
#[derive(Debug, Clone, Default)]
pub struct Shape {
    fields: Vec<(String, Field)>,
}

impl Shape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field. Re-declaring a name replaces the earlier validator
    /// in place.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = field;
        } else {
            self.fields.push((name, field));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate `input` against this shape.
    ///
    /// On success the returned value is an object containing exactly the
    /// declared fields that were present; undeclared keys are stripped and
    /// no coercion is performed.
    pub fn validate(&self, input: &Value) -> Result<Value, SchemaError> {
        let Some(object) = input.as_object() else {
            return Err(SchemaError::single(
                "",
                format!("expected an object, received {}", type_name(input)),
            ));
        };

        let mut issues = Vec::new();
        let mut out = Map::new();
        for (name, field) in &self.fields {
            match object.get(name) {
                None | Some(Value::Null) => {
                    if !field.optional {
                        issues.push(Issue {
                            path: name.clone(),
                            message: "required field is missing".to_string(),
                        });
                    }
                }
                Some(value) => {
                    field.check(name, value, &mut issues);
                    out.insert(name.clone(), value.clone());
                }
            }
        }

        if issues.is_empty() {
            Ok(Value::Object(out))
        } else {
            Err(SchemaError::new(issues))
        }
    }

    /// The JSON-Schema object describing this shape.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, field) in &self.fields {
            properties.insert(name.clone(), field.to_json_schema());
            if !field.optional {
                required.push(Value::String(name.clone()));
            }
        }

        let mut schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        schema
    }
}

/// A single field validator.
#[derive(Debug, Clone)]
pub struct Field {
    ty: FieldType,
    description: Option<String>,
    optional: bool,
}

#[derive(Debug, Clone)]
enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array(Box<Field>),
    Object,
    Any,
}

impl Field {
    fn of(ty: FieldType) -> Self {
        Self {
            ty,
            description: None,
            optional: false,
        }
    }

    pub fn string() -> Self {
        Self::of(FieldType::String)
    }

    pub fn number() -> Self {
        Self::of(FieldType::Number)
    }

    pub fn integer() -> Self {
        Self::of(FieldType::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(FieldType::Boolean)
    }

    /// An array whose items all match `item`.
    pub fn array(item: Field) -> Self {
        Self::of(FieldType::Array(Box::new(item)))
    }

    /// A free-form JSON object.
    pub fn object() -> Self {
        Self::of(FieldType::Object)
    }

    /// Accepts any JSON value.
    pub fn any() -> Self {
        Self::of(FieldType::Any)
    }

    /// Attach a human-readable description, surfaced in the JSON schema.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the field as optional. Optional fields may be absent or null.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    fn check(&self, path: &str, value: &Value, issues: &mut Vec<Issue>) {
        let ok = match &self.ty {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
            FieldType::Array(item) => match value.as_array() {
                Some(values) => {
                    for (i, v) in values.iter().enumerate() {
                        item.check(&format!("{path}[{i}]"), v, issues);
                    }
                    true
                }
                None => false,
            },
        };

        if !ok {
            issues.push(Issue {
                path: path.to_string(),
                message: format!(
                    "expected {}, received {}",
                    self.ty.name(),
                    type_name(value)
                ),
            });
        }
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = match &self.ty {
            FieldType::String => json!({"type": "string"}),
            FieldType::Number => json!({"type": "number"}),
            FieldType::Integer => json!({"type": "integer"}),
            FieldType::Boolean => json!({"type": "boolean"}),
            FieldType::Object => json!({"type": "object"}),
            FieldType::Any => json!({}),
            FieldType::Array(item) => json!({"type": "array", "items": item.to_json_schema()}),
        };
        if let Some(description) = &self.description {
            schema["description"] = Value::String(description.clone());
        }
        schema
    }
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean",
            Self::Array(_) => "an array",
            Self::Object => "an object",
            Self::Any => "any value",
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A single validation problem, addressed by field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

/// Validation failure carrying every issue found.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct SchemaError {
    pub message: String,
    pub issues: Vec<Issue>,
}

impl SchemaError {
    fn new(issues: Vec<Issue>) -> Self {
        let message = issues
            .iter()
            .map(|issue| {
                if issue.path.is_empty() {
                    issue.message.clone()
                } else {
                    format!("{}: {}", issue.path, issue.message)
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
        Self { message, issues }
    }

    fn single(path: &str, message: String) -> Self {
        Self::new(vec![Issue {
            path: path.to_string(),
            message,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_declared_fields_and_strips_unknown_keys() {
        let shape = Shape::new()
            .field("message", Field::string())
            .field("count", Field::integer().optional());

        let out = shape
            .validate(&json!({"message": "hi", "count": 2, "extra": true}))
            .unwrap();
        assert_eq!(out, json!({"message": "hi", "count": 2}));
    }

    #[test]
    fn reports_missing_and_mismatched_fields() {
        let shape = Shape::new()
            .field("a", Field::number())
            .field("b", Field::string());

        let err = shape.validate(&json!({"a": "one"})).unwrap_err();
        assert_eq!(err.issues.len(), 2);
        assert!(err.issues.iter().any(|i| i.path == "a"));
        assert!(err.issues.iter().any(|i| i.path == "b"));
    }

    #[test]
    fn rejects_non_object_input() {
        let shape = Shape::new().field("a", Field::string());
        let err = shape.validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert!(err.message.contains("expected an object"));
    }

    #[test]
    fn array_items_are_validated_with_paths() {
        let shape = Shape::new().field("tags", Field::array(Field::string()));
        let err = shape.validate(&json!({"tags": ["ok", 3]})).unwrap_err();
        assert_eq!(err.issues[0].path, "tags[1]");
    }

    #[test]
    fn json_schema_lists_required_fields_in_order() {
        let shape = Shape::new()
            .field("message", Field::string().describe("The text to process"))
            .field("loud", Field::boolean().optional());

        let schema = shape.to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(
            schema["properties"]["message"],
            json!({"type": "string", "description": "The text to process"})
        );
        assert_eq!(schema["required"], json!(["message"]));
    }

    #[test]
    fn empty_shape_schema_has_no_required_key() {
        let schema = Shape::new().to_json_schema();
        assert_eq!(schema, json!({"type": "object", "properties": {}}));
    }
}
