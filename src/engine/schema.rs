// ABOUTME: Minimal recursive schema validation for tool parameters
// ABOUTME: Covers the five primitive type tags with path-qualified failures

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl std::fmt::Display for SchemaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Object => "object",
            SchemaType::Array => "array",
        };
        write!(f, "{}", name)
    }
}

/// Constrained schema shape: a type tag, object properties with required
/// names, and an array item schema. Additional properties are allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Schema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
}

impl Schema {
    pub fn of(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            properties: HashMap::new(),
            required: Vec::new(),
            items: None,
        }
    }

    pub fn object() -> Self {
        Self::of(SchemaType::Object)
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    pub fn array_of(items: Schema) -> Self {
        let mut schema = Self::of(SchemaType::Array);
        schema.items = Some(Box::new(items));
        schema
    }

    /// Validate a value, returning every failure with its dotted/indexed
    /// path from the root.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<String>> {
        let mut failures = Vec::new();
        self.check(value, "", &mut failures);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }

    fn check(&self, value: &Value, path: &str, failures: &mut Vec<String>) {
        let display_path = if path.is_empty() { "$" } else { path };

        let type_matches = matches!(
            (self.schema_type, value),
            (SchemaType::String, Value::String(_))
                | (SchemaType::Number, Value::Number(_))
                | (SchemaType::Boolean, Value::Bool(_))
                | (SchemaType::Object, Value::Object(_))
                | (SchemaType::Array, Value::Array(_))
        );

        if !type_matches {
            failures.push(format!(
                "{}: expected {}, got {}",
                display_path,
                self.schema_type,
                type_name(value)
            ));
            return;
        }

        match (self.schema_type, value) {
            (SchemaType::Object, Value::Object(map)) => {
                for name in &self.required {
                    if !map.contains_key(name) {
                        failures.push(format!(
                            "{}: missing required property '{}'",
                            display_path, name
                        ));
                    }
                }
                for (name, property_schema) in &self.properties {
                    if let Some(property_value) = map.get(name) {
                        let child_path = if path.is_empty() {
                            name.clone()
                        } else {
                            format!("{}.{}", path, name)
                        };
                        property_schema.check(property_value, &child_path, failures);
                    }
                }
            }
            (SchemaType::Array, Value::Array(elements)) => {
                if let Some(ref item_schema) = self.items {
                    for (index, element) in elements.iter().enumerate() {
                        let child_path = if path.is_empty() {
                            format!("[{}]", index)
                        } else {
                            format!("{}[{}]", path, index)
                        };
                        item_schema.check(element, &child_path, failures);
                    }
                }
            }
            _ => {}
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params_schema() -> Schema {
        Schema::object()
            .with_property("name", Schema::of(SchemaType::String))
            .with_property("count", Schema::of(SchemaType::Number))
            .with_property(
                "tags",
                Schema::array_of(Schema::of(SchemaType::String)),
            )
            .with_required("name")
    }

    #[test]
    fn test_valid_params() {
        let schema = params_schema();
        let result = schema.validate(&json!({"name": "job", "count": 3, "tags": ["a", "b"]}));
        assert!(result.is_ok());
    }

    #[test]
    fn test_additional_properties_allowed() {
        let schema = params_schema();
        assert!(schema.validate(&json!({"name": "job", "extra": true})).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let schema = params_schema();
        let failures = schema.validate(&json!({"count": 3})).unwrap_err();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("missing required property 'name'"));
    }

    #[test]
    fn test_type_mismatch_with_path() {
        let schema = params_schema();
        let failures = schema
            .validate(&json!({"name": "job", "count": "three"}))
            .unwrap_err();
        assert!(failures[0].starts_with("count:"));
        assert!(failures[0].contains("expected number, got string"));
    }

    #[test]
    fn test_array_element_path_is_indexed() {
        let schema = params_schema();
        let failures = schema
            .validate(&json!({"name": "job", "tags": ["ok", 7]}))
            .unwrap_err();
        assert!(failures[0].starts_with("tags[1]:"));
    }

    #[test]
    fn test_nested_object_path_is_dotted() {
        let schema = Schema::object().with_property(
            "inner",
            Schema::object()
                .with_property("flag", Schema::of(SchemaType::Boolean))
                .with_required("flag"),
        );

        let failures = schema
            .validate(&json!({"inner": {"flag": "yes"}}))
            .unwrap_err();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("inner.flag:"));
    }

    #[test]
    fn test_root_mismatch() {
        let schema = params_schema();
        let failures = schema.validate(&json!([1, 2])).unwrap_err();
        assert!(failures[0].starts_with("$:"));
    }

    #[test]
    fn test_schema_serde_roundtrip() {
        let schema = params_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back.schema_type, SchemaType::Object);
        assert!(back.properties.contains_key("tags"));
        assert_eq!(back.required, vec!["name"]);
    }
}
