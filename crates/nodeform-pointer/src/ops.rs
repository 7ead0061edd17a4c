//! RFC 6901 resolution and RFC 6902-style mutation over `serde_json::Value`.
//!
//! These helpers operate on plain JSON values, not on the node graph. The
//! graph uses them for enhancer merging and default-value plumbing; they
//! are also the public get/set/patch surface promised to embedders.

use serde_json::{Map, Value};

/// Escape a single reference token per RFC 6901: `~` becomes `~0`,
/// `/` becomes `~1`.
pub fn escape(token: &str) -> String {
    if !token.contains(['~', '/']) {
        return token.to_string();
    }
    token.replace('~', "~0").replace('/', "~1")
}

/// Unescape a single reference token per RFC 6901.
///
/// The order matters: `~1` must be decoded before `~0` so that `~01`
/// round-trips to `~1` and not `/`.
pub fn unescape(token: &str) -> String {
    if !token.contains('~') {
        return token.to_string();
    }
    token.replace("~1", "/").replace("~0", "~")
}

/// Split a pointer into unescaped reference tokens.
///
/// The empty pointer yields no tokens (it addresses the whole document).
/// A leading `/` is required for non-empty pointers but tolerated when
/// absent, since the node graph builds pointers segment by segment.
fn tokens(pointer: &str) -> Vec<String> {
    let trimmed = pointer.strip_prefix('/').unwrap_or(pointer);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').map(unescape).collect()
}

/// Resolve a pointer against a value, returning `None` when any segment
/// does not exist or the shape does not match (an object key against an
/// array, a non-numeric index, an out-of-range index).
pub fn get<'a>(value: &'a Value, pointer: &str) -> Option<&'a Value> {
    let mut current = value;
    for token in tokens(pointer) {
        current = match current {
            Value::Object(map) => map.get(&token)?,
            Value::Array(items) => items.get(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `new_value` at `pointer`, creating intermediate containers.
///
/// Missing object keys are created; a numeric segment against a missing
/// container creates an array and pads it with `null` up to the index.
/// The `-` token appends to an array per RFC 6902.
pub fn set(target: &mut Value, pointer: &str, new_value: Value) {
    let parts = tokens(pointer);
    if parts.is_empty() {
        *target = new_value;
        return;
    }

    let mut current = target;
    for (i, token) in parts.iter().enumerate() {
        let last = i + 1 == parts.len();

        // Coerce scalars into the container shape the next segment implies.
        let wants_array = token == "-" || token.parse::<usize>().is_ok();
        match current {
            Value::Object(_) | Value::Array(_) => {}
            _ => {
                *current = if wants_array {
                    Value::Array(Vec::new())
                } else {
                    Value::Object(Map::new())
                };
            }
        }

        match current {
            Value::Object(map) => {
                if last {
                    map.insert(token.clone(), new_value);
                    return;
                }
                current = map.entry(token.clone()).or_insert(Value::Null);
            }
            Value::Array(_) => {
                // Decide the index before borrowing the items, so the
                // non-numeric case can rewrite the whole container.
                let parsed = if token == "-" {
                    Ok(None)
                } else {
                    token.parse::<usize>().map(Some)
                };
                let Ok(index) = parsed else {
                    // A non-numeric key against an array: rewrite in place
                    // as an object so the write still lands.
                    *current = Value::Object(Map::new());
                    let Value::Object(map) = current else {
                        unreachable!("just rewritten as an object");
                    };
                    if last {
                        map.insert(token.clone(), new_value);
                        return;
                    }
                    current = map.entry(token.clone()).or_insert(Value::Null);
                    continue;
                };
                let Value::Array(items) = current else {
                    unreachable!("matched as an array above");
                };
                let index = index.unwrap_or(items.len());
                while items.len() <= index {
                    items.push(Value::Null);
                }
                if last {
                    items[index] = new_value;
                    return;
                }
                current = &mut items[index];
            }
            _ => unreachable!("coerced to container above"),
        }
    }
}

/// Remove the value at `pointer`, returning it when present.
///
/// Removing the root pointer replaces the document with `null`. Removing
/// an array element shifts later elements down, per RFC 6902 `remove`.
pub fn remove(target: &mut Value, pointer: &str) -> Option<Value> {
    let parts = tokens(pointer);
    if parts.is_empty() {
        return Some(std::mem::replace(target, Value::Null));
    }

    let Some((last, parents)) = parts.split_last() else {
        return None;
    };
    let mut current = target;
    for token in parents {
        current = match current {
            Value::Object(map) => map.get_mut(token)?,
            Value::Array(items) => items.get_mut(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    match current {
        Value::Object(map) => map.remove(last),
        Value::Array(items) => {
            let index = last.parse::<usize>().ok()?;
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_round_trip() {
        assert_eq!(escape("a/b"), "a~1b");
        assert_eq!(escape("m~n"), "m~0n");
        assert_eq!(unescape(&escape("a/b~c")), "a/b~c");
    }

    #[test]
    fn test_unescape_order() {
        // ~01 must decode to ~1, not /.
        assert_eq!(unescape("~01"), "~1");
    }

    #[test]
    fn test_get_nested() {
        let doc = json!({"a": {"b": [10, 20, 30]}});
        assert_eq!(get(&doc, "/a/b/1"), Some(&json!(20)));
        assert_eq!(get(&doc, ""), Some(&doc));
        assert_eq!(get(&doc, "/a/missing"), None);
        assert_eq!(get(&doc, "/a/b/9"), None);
        assert_eq!(get(&doc, "/a/b/x"), None);
    }

    #[test]
    fn test_get_escaped_key() {
        let doc = json!({"a/b": {"c~d": 1}});
        assert_eq!(get(&doc, "/a~1b/c~0d"), Some(&json!(1)));
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut doc = json!({});
        set(&mut doc, "/a/b/c", json!(7));
        assert_eq!(doc, json!({"a": {"b": {"c": 7}}}));
    }

    #[test]
    fn test_set_array_pad_and_append() {
        let mut doc = json!({"list": [1]});
        set(&mut doc, "/list/3", json!(4));
        assert_eq!(doc, json!({"list": [1, null, null, 4]}));

        set(&mut doc, "/list/-", json!(5));
        assert_eq!(doc, json!({"list": [1, null, null, 4, 5]}));
    }

    #[test]
    fn test_set_root() {
        let mut doc = json!({"old": true});
        set(&mut doc, "", json!(42));
        assert_eq!(doc, json!(42));
    }

    #[test]
    fn test_set_replaces_scalar_with_container() {
        let mut doc = json!({"a": 1});
        set(&mut doc, "/a/b", json!(2));
        assert_eq!(doc, json!({"a": {"b": 2}}));

        let mut doc = json!({"a": 1});
        set(&mut doc, "/a/0", json!("x"));
        assert_eq!(doc, json!({"a": ["x"]}));
    }

    #[test]
    fn test_set_object_key_on_array_rewrites_container() {
        let mut doc = json!({"a": [1, 2]});
        set(&mut doc, "/a/key", json!(true));
        assert_eq!(doc, json!({"a": {"key": true}}));

        let mut doc = json!({"a": [1]});
        set(&mut doc, "/a/key/deeper", json!(1));
        assert_eq!(doc, json!({"a": {"key": {"deeper": 1}}}));
    }

    #[test]
    fn test_remove_object_key_and_array_index() {
        let mut doc = json!({"a": {"b": 1, "c": 2}, "list": [1, 2, 3]});
        assert_eq!(remove(&mut doc, "/a/b"), Some(json!(1)));
        assert_eq!(remove(&mut doc, "/list/1"), Some(json!(2)));
        assert_eq!(doc, json!({"a": {"c": 2}, "list": [1, 3]}));
    }

    #[test]
    fn test_remove_missing_is_none() {
        let mut doc = json!({"a": 1});
        assert_eq!(remove(&mut doc, "/nope"), None);
        assert_eq!(remove(&mut doc, "/a/deeper"), None);
    }

    #[test]
    fn test_remove_root() {
        let mut doc = json!({"a": 1});
        assert_eq!(remove(&mut doc, ""), Some(json!({"a": 1})));
        assert_eq!(doc, Value::Null);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn escape_round_trips(token in "[a-z~/]{0,12}") {
                prop_assert_eq!(unescape(&escape(&token)), token);
            }

            #[test]
            fn set_then_get_returns_value(
                key in "[a-z]{1,8}",
                n in proptest::num::i64::ANY,
            ) {
                let mut doc = serde_json::json!({});
                let pointer = format!("/{key}");
                set(&mut doc, &pointer, serde_json::json!(n));
                prop_assert_eq!(get(&doc, &pointer), Some(&serde_json::json!(n)));
            }
        }
    }
}
