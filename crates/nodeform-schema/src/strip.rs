//! Extension-keyword stripping and `$ref` cycle detection.
//!
//! Both operate on the raw schema value, before compilation. Stripping
//! walks every object in the schema (properties, items, combinators,
//! definitions alike) because extension keywords may appear at any depth,
//! including inside `oneOf`/`anyOf` branch schemas.

use serde_json::Value;

/// Non-standard keywords removed before a schema reaches the validator.
///
/// `computed` carries the reactive rules (active/visible/derive/branch
/// selectors/watch/inject); the rest are UI hints consumed by binding
/// layers. A standard validator would either reject them or silently
/// misinterpret them as annotations.
pub const EXTENSION_KEYWORDS: &[&str] = &[
    "computed",
    "formType",
    "ui",
    "label",
    "placeholder",
    "options",
    "errorMessages",
];

/// Return a copy of `schema` with every extension keyword removed,
/// recursively. The input is not modified.
pub fn strip_extensions(schema: &Value) -> Value {
    let mut copy = schema.clone();
    strip_in_place(&mut copy);
    copy
}

fn strip_in_place(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for keyword in EXTENSION_KEYWORDS {
                map.remove(*keyword);
            }
            for child in map.values_mut() {
                strip_in_place(child);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                strip_in_place(item);
            }
        }
        _ => {}
    }
}

/// Search for a cyclic local `$ref` chain reachable from the schema root.
///
/// Follows `#/...` references depth-first, keeping the chain of targets
/// currently being expanded; revisiting a target already on the chain is
/// a cycle. Returns the pointer that closed the loop. External references
/// are ignored (the compiling plugin reports those on its own terms).
pub fn find_ref_cycle(schema: &Value) -> Option<String> {
    let mut chain = Vec::new();
    walk(schema, schema, &mut chain)
}

fn walk<'a>(root: &'a Value, value: &'a Value, chain: &mut Vec<&'a str>) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                if let Some(pointer) = reference.strip_prefix('#') {
                    if chain.contains(&pointer) {
                        return Some(format!("#{pointer}"));
                    }
                    if let Some(target) = nodeform_pointer::get(root, pointer) {
                        chain.push(pointer);
                        let found = walk(root, target, chain);
                        chain.pop();
                        if found.is_some() {
                            return found;
                        }
                    }
                }
            }
            for child in map.values() {
                if let Some(found) = walk(root, child, chain) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => {
            for item in items {
                if let Some(found) = walk(root, item, chain) {
                    return Some(found);
                }
            }
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_removes_computed_at_every_depth() {
        let schema = json!({
            "type": "object",
            "computed": {"active": "./x"},
            "properties": {
                "a": {
                    "type": "string",
                    "formType": "textarea",
                    "computed": {"visible": "../b"}
                },
                "b": {
                    "oneOf": [
                        {"type": "string", "computed": {"if": "./a === 'x'"}},
                        {"type": "number", "label": "amount"}
                    ]
                }
            }
        });

        let stripped = strip_extensions(&schema);
        assert_eq!(
            stripped,
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "string"},
                    "b": {
                        "oneOf": [
                            {"type": "string"},
                            {"type": "number"}
                        ]
                    }
                }
            })
        );
        // Source schema is untouched.
        assert!(schema.get("computed").is_some());
    }

    #[test]
    fn test_strip_is_identity_on_plain_schema() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string", "minLength": 1}},
            "required": ["name"],
            "additionalProperties": false
        });
        assert_eq!(strip_extensions(&schema), schema);
    }

    #[test]
    fn test_no_cycle_in_plain_refs() {
        let schema = json!({
            "type": "object",
            "properties": {
                "home": {"$ref": "#/definitions/address"},
                "work": {"$ref": "#/definitions/address"}
            },
            "definitions": {
                "address": {
                    "type": "object",
                    "properties": {"street": {"type": "string"}}
                }
            }
        });
        assert_eq!(find_ref_cycle(&schema), None);
    }

    #[test]
    fn test_direct_cycle_detected() {
        let schema = json!({
            "$ref": "#/definitions/node",
            "definitions": {
                "node": {"$ref": "#/definitions/node"}
            }
        });
        assert_eq!(
            find_ref_cycle(&schema),
            Some("#/definitions/node".to_string())
        );
    }

    #[test]
    fn test_mutual_cycle_detected() {
        let schema = json!({
            "$ref": "#/definitions/a",
            "definitions": {
                "a": {"properties": {"next": {"$ref": "#/definitions/b"}}},
                "b": {"properties": {"back": {"$ref": "#/definitions/a"}}}
            }
        });
        let found = find_ref_cycle(&schema).expect("cycle should be found");
        assert!(found.starts_with("#/definitions/"));
    }

    #[test]
    fn test_external_refs_ignored() {
        let schema = json!({
            "properties": {
                "x": {"$ref": "https://example.com/other.schema.json"}
            }
        });
        assert_eq!(find_ref_cycle(&schema), None);
    }

    #[test]
    fn test_dangling_local_ref_is_not_a_cycle() {
        let schema = json!({
            "properties": {"x": {"$ref": "#/definitions/missing"}}
        });
        assert_eq!(find_ref_cycle(&schema), None);
    }
}
