//! Facts read off a schema fragment at build time.

use serde_json::Value;

/// Structural family of a node, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeGroup {
    /// Object-typed: children named by property, value assembled from
    /// child contributions.
    Branch,
    /// Array-typed: children named by index, rebuilt to match the value
    /// length.
    Array,
    /// Scalar leaf: holds its value directly.
    Terminal,
}

/// Declared JSON type of a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
    /// No usable `type` declaration; treated as a terminal that accepts
    /// anything.
    Any,
}

/// Which combinator a variant child belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchScope {
    OneOf,
    AnyOf,
}

/// Resolve the fragment's declared type. A `type` array picks the first
/// non-null entry (the null entry marks nullability, not structure).
/// Fragments without `type` fall back on shape hints.
pub(crate) fn schema_type(schema: &Value) -> SchemaType {
    let declared = match schema.get("type") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .or(Some("null")),
        _ => None,
    };
    match declared {
        Some("object") => SchemaType::Object,
        Some("array") => SchemaType::Array,
        Some("string") => SchemaType::String,
        Some("number") => SchemaType::Number,
        Some("integer") => SchemaType::Integer,
        Some("boolean") => SchemaType::Boolean,
        Some("null") => SchemaType::Null,
        Some(_) => SchemaType::Any,
        None => {
            if schema.get("properties").is_some() || schema.get("oneOf").is_some() || schema.get("anyOf").is_some() {
                SchemaType::Object
            } else if schema.get("items").is_some() {
                SchemaType::Array
            } else {
                SchemaType::Any
            }
        }
    }
}

/// `nullable: true`, or a `type` array listing `"null"`.
pub(crate) fn is_nullable(schema: &Value) -> bool {
    if schema.get("nullable").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    matches!(
        schema.get("type"),
        Some(Value::Array(types)) if types.iter().any(|t| t.as_str() == Some("null"))
    )
}

pub(crate) fn group_of(schema_type: SchemaType) -> NodeGroup {
    match schema_type {
        SchemaType::Object => NodeGroup::Branch,
        SchemaType::Array => NodeGroup::Array,
        _ => NodeGroup::Terminal,
    }
}

/// True when the parent fragment's `required` list names `name`.
pub(crate) fn is_required(parent_schema: &Value, name: &str) -> bool {
    matches!(
        parent_schema.get("required"),
        Some(Value::Array(names)) if names.iter().any(|n| n.as_str() == Some(name))
    )
}
