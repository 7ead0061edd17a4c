//! Structured validation issues.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of an issue's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    /// Produced by running a compiled validator against a value.
    Validation,
    /// Synthesized at compile time: the schema's `$ref` graph is cyclic.
    CircularReference,
    /// Synthesized at compile time: the schema failed to compile for a
    /// reason other than a reference cycle.
    SchemaCompile,
}

/// One validation violation, addressed to a location in the document.
///
/// The shape mirrors the common JSON Schema error reporting contract:
/// the violated keyword, a JSON Pointer into the instance (`data_path`),
/// a JSON Pointer into the schema (`schema_path`), a human-readable
/// message, and optional keyword parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Origin classification.
    pub kind: IssueKind,
    /// The violated schema keyword (`required`, `type`, ...).
    pub keyword: String,
    /// JSON Pointer to the violating location in the instance.
    pub data_path: String,
    /// JSON Pointer to the violated subschema.
    pub schema_path: String,
    /// Human-readable description.
    pub message: String,
    /// Keyword-specific parameters, when the validator provides them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ValidationIssue {
    /// The synthetic issue installed when a schema's `$ref` graph loops.
    /// Reported at the document root on every validation run.
    pub fn circular_reference(pointer: &str) -> Self {
        Self {
            kind: IssueKind::CircularReference,
            keyword: "$ref".to_string(),
            data_path: String::new(),
            schema_path: pointer.to_string(),
            message: format!("schema contains a circular $ref chain through {pointer}"),
            params: None,
        }
    }

    /// The synthetic issue installed when schema compilation fails for a
    /// non-cycle reason.
    pub fn schema_compile(reason: &str) -> Self {
        Self {
            kind: IssueKind::SchemaCompile,
            keyword: "$schema".to_string(),
            data_path: String::new(),
            schema_path: String::new(),
            message: format!("schema failed to compile: {reason}"),
            params: None,
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}: {}",
            self.keyword,
            if self.data_path.is_empty() {
                "/"
            } else {
                &self.data_path
            },
            self.message
        )
    }
}
