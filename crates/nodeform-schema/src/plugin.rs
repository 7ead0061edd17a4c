//! Pluggable validator compilation.
//!
//! The node graph never talks to a JSON Schema implementation directly.
//! It hands a stripped schema to a [`ValidatorPlugin`], receives a
//! [`CompiledValidator`], and runs it against enhanced values. A plugin
//! can be supplied per tree build; otherwise the process-wide default
//! (the `jsonschema` crate, Draft 2020-12) applies.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

use crate::issue::{IssueKind, ValidationIssue};

/// Compilation failure reported by a plugin.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// The schema was rejected by the underlying implementation.
    #[error("validator compilation failed: {reason}")]
    Compile {
        /// Human-readable reason from the implementation.
        reason: String,
    },
}

/// Compiles a stripped schema into a reusable validator.
pub trait ValidatorPlugin: Send + Sync {
    /// Compile `schema`. Called once per tree build (or rebuild).
    fn compile(&self, schema: &Value) -> Result<Box<dyn CompiledValidator>, PluginError>;
}

/// A compiled validator, run against the root's enhanced value.
pub trait CompiledValidator {
    /// Validate `value`, returning every violation. An empty vector means
    /// the value is valid. This never fails: broken schemas are handled
    /// at compile time, not per run.
    fn validate(&self, value: &Value) -> Vec<ValidationIssue>;
}

// ---------------------------------------------------------------------------
// Default plugin: jsonschema, Draft 2020-12
// ---------------------------------------------------------------------------

/// The default plugin, backed by the `jsonschema` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaPlugin;

impl ValidatorPlugin for JsonSchemaPlugin {
    fn compile(&self, schema: &Value) -> Result<Box<dyn CompiledValidator>, PluginError> {
        let validator = jsonschema::options()
            .with_draft(jsonschema::Draft::Draft202012)
            .build(schema)
            .map_err(|e| PluginError::Compile {
                reason: e.to_string(),
            })?;
        Ok(Box::new(CompiledJsonSchema { validator }))
    }
}

struct CompiledJsonSchema {
    validator: jsonschema::Validator,
}

impl CompiledValidator for CompiledJsonSchema {
    fn validate(&self, value: &Value) -> Vec<ValidationIssue> {
        self.validator
            .iter_errors(value)
            .map(|err| {
                let schema_path = err.schema_path.to_string();
                ValidationIssue {
                    kind: IssueKind::Validation,
                    keyword: keyword_of(&schema_path),
                    data_path: err.instance_path.to_string(),
                    schema_path,
                    message: err.to_string(),
                    params: None,
                }
            })
            .collect()
    }
}

/// The violated keyword is the last non-index segment of the schema path
/// (`/properties/a/oneOf/1/type` violates `type`).
fn keyword_of(schema_path: &str) -> String {
    schema_path
        .rsplit('/')
        .find(|segment| !segment.is_empty() && segment.parse::<usize>().is_err())
        .unwrap_or("schema")
        .to_string()
}

// ---------------------------------------------------------------------------
// Fallback validator for uncompilable schemas
// ---------------------------------------------------------------------------

/// Permanently-failing validator installed when compilation fails.
///
/// Every `validate()` call reports the same single synthetic issue, so a
/// malformed schema degrades to "always invalid" instead of an unusable
/// tree.
#[derive(Debug, Clone)]
pub struct FallbackValidator {
    issue: ValidationIssue,
}

impl FallbackValidator {
    /// Wrap the synthetic issue every run will report.
    pub fn new(issue: ValidationIssue) -> Self {
        Self { issue }
    }
}

impl CompiledValidator for FallbackValidator {
    fn validate(&self, _value: &Value) -> Vec<ValidationIssue> {
        vec![self.issue.clone()]
    }
}

// ---------------------------------------------------------------------------
// Process-wide default registry
// ---------------------------------------------------------------------------

static DEFAULT_PLUGIN: RwLock<Option<Arc<dyn ValidatorPlugin>>> = RwLock::new(None);

/// Replace the process-wide default plugin used when a tree build does
/// not supply one.
pub fn set_default_plugin(plugin: Arc<dyn ValidatorPlugin>) {
    tracing::debug!("replacing process-wide default validator plugin");
    *DEFAULT_PLUGIN.write() = Some(plugin);
}

/// The current default plugin ([`JsonSchemaPlugin`] unless replaced).
pub fn default_plugin() -> Arc<dyn ValidatorPlugin> {
    if let Some(plugin) = DEFAULT_PLUGIN.read().as_ref() {
        return Arc::clone(plugin);
    }
    Arc::new(JsonSchemaPlugin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_and_validate_valid_value() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let validator = JsonSchemaPlugin.compile(&schema).expect("compile");
        assert!(validator.validate(&json!({"name": "ok"})).is_empty());
    }

    #[test]
    fn test_validate_reports_data_path() {
        let schema = json!({
            "type": "object",
            "properties": {"age": {"type": "number"}}
        });
        let validator = JsonSchemaPlugin.compile(&schema).expect("compile");
        let issues = validator.validate(&json!({"age": "not a number"}));
        assert_eq!(issues.len(), 1, "one type violation expected: {issues:?}");
        assert_eq!(issues[0].data_path, "/age");
        assert_eq!(issues[0].keyword, "type");
        assert_eq!(issues[0].kind, IssueKind::Validation);
    }

    #[test]
    fn test_validate_missing_required() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let validator = JsonSchemaPlugin.compile(&schema).expect("compile");
        let issues = validator.validate(&json!({}));
        assert!(
            issues.iter().any(|i| i.keyword == "required"),
            "should report required violation: {issues:?}"
        );
    }

    #[test]
    fn test_keyword_of_skips_indices() {
        assert_eq!(keyword_of("/properties/a/oneOf/1/type"), "type");
        assert_eq!(keyword_of("/required"), "required");
        assert_eq!(keyword_of(""), "schema");
    }

    #[test]
    fn test_fallback_repeats_one_issue() {
        let fallback = FallbackValidator::new(ValidationIssue::circular_reference("#/defs/x"));
        let first = fallback.validate(&json!({"anything": true}));
        let second = fallback.validate(&json!(42));
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, IssueKind::CircularReference);
    }

    #[test]
    fn test_default_plugin_is_jsonschema() {
        let plugin = default_plugin();
        let schema = json!({"type": "string"});
        let validator = plugin.compile(&schema).expect("compile");
        assert!(validator.validate(&json!("ok")).is_empty());
        assert_eq!(validator.validate(&json!(5)).len(), 1);
    }
}
