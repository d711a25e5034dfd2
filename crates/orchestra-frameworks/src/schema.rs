//! Declarative description of a plugin's configuration shape, used by
//! callers building an agent and by any UI rendering a form without
//! hardcoding plugin knowledge.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigField {
    pub key: String,
    pub field_type: FieldType,
    pub required: bool,
    pub description: String,
    pub default: Option<serde_json::Value>,
}

impl ConfigField {
    pub fn required(key: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            key: key.to_string(),
            field_type,
            required: true,
            description: description.to_string(),
            default: None,
        }
    }

    pub fn optional(key: &str, field_type: FieldType, description: &str, default: serde_json::Value) -> Self {
        Self {
            key: key.to_string(),
            field_type,
            required: false,
            description: description.to_string(),
            default: Some(default),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub fields: Vec<ConfigField>,
}

impl ConfigSchema {
    pub fn new(fields: Vec<ConfigField>) -> Self {
        Self { fields }
    }

    /// Checks required keys are present and, where present, the declared
    /// JSON shape matches. Returns every violation found rather than
    /// short-circuiting on the first, so a caller can report a complete
    /// picture.
    pub fn validate(&self, configuration: &serde_json::Value) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let object = configuration.as_object();

        for field in &self.fields {
            let value = object.and_then(|o| o.get(&field.key));
            match value {
                None if field.required => {
                    errors.push(format!("missing required field '{}'", field.key));
                }
                None => {}
                Some(v) if !matches_type(v, field.field_type) => {
                    errors.push(format!("field '{}' must be a {:?}", field.key, field.field_type));
                }
                Some(_) => {}
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn matches_type(value: &serde_json::Value, field_type: FieldType) -> bool {
    match field_type {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_required_field_is_reported() {
        let schema = ConfigSchema::new(vec![ConfigField::required("model", FieldType::String, "model name")]);
        let errors = schema.validate(&json!({})).unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn wrong_type_is_reported() {
        let schema = ConfigSchema::new(vec![ConfigField::required("model", FieldType::String, "model name")]);
        let errors = schema.validate(&json!({"model": 5})).unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn optional_field_may_be_absent() {
        let schema = ConfigSchema::new(vec![ConfigField::optional(
            "temperature",
            FieldType::Number,
            "sampling temperature",
            json!(0.7),
        )]);
        assert!(schema.validate(&json!({})).is_ok());
    }
}
