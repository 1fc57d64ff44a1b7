//! Validation of node configuration against a plugin's JSON Schema

use jsonschema::{JSONSchema, ValidationError};
use serde_json::Value;

/// A plugin's config schema, compiled once at registration.
#[derive(Debug)]
pub struct ConfigSchema {
    raw: Value,
    compiled: JSONSchema,
}

impl ConfigSchema {
    /// Compile `raw`. An invalid schema yields the compiler's message.
    pub fn compile(raw: Value) -> Result<Self, String> {
        let compiled = JSONSchema::compile(&raw).map_err(|e| format!("invalid config schema: {}", e))?;
        Ok(Self { raw, compiled })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Check `config`, returning one message per violation.
    pub fn validate(&self, config: &Value) -> Result<(), Vec<String>> {
        self.compiled
            .validate(config)
            .map_err(|errors| format_validation_errors(errors))
    }
}

fn format_validation_errors<'a>(errors: impl Iterator<Item = ValidationError<'a>>) -> Vec<String> {
    errors
        .map(|error| {
            let path = if error.instance_path.to_string().is_empty() {
                "root".to_string()
            } else {
                error.instance_path.to_string()
            };
            format!("At '{}': {}", path, error)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::compile(json!({
            "type": "object",
            "properties": {
                "operation": {"type": "string", "enum": ["hash", "encrypt"]},
                "data": {"type": "string"}
            },
            "required": ["operation", "data"]
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(schema()
            .validate(&json!({"operation": "hash", "data": "abc"}))
            .is_ok());
    }

    #[test]
    fn test_violations_are_reported_with_paths() {
        let errors = schema()
            .validate(&json!({"operation": "mine"}))
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.starts_with("At '/operation'")));
        assert!(errors.iter().any(|e| e.starts_with("At 'root'") && e.contains("data")));
    }

    #[test]
    fn test_invalid_schema_is_rejected() {
        assert!(ConfigSchema::compile(json!({"type": 12})).is_err());
    }
}
