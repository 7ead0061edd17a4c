//! Cross-field injection and cycle suppression.
//!
//! Test strategy:
//! 1. A linear injection chain (a → b → c) must propagate end to end:
//!    distinct targets never suppress each other.
//! 2. A mutual cycle (a → b, b → a) must settle: the second write into
//!    an in-flight path is dropped.
//! 3. The in-flight window clears after the cascade, so the next
//!    mutation injects again.

use nodeform_core::{SetValueOption, Tree, TreeOptions};
use serde_json::json;

fn no_validation() -> TreeOptions {
    TreeOptions {
        validation: false,
        ..TreeOptions::default()
    }
}

#[test]
fn linear_chains_propagate_end_to_end() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "a": {
                    "type": "number",
                    "computed": {"inject": [{"path": "/b", "value": "../a * 2"}]}
                },
                "b": {
                    "type": "number",
                    "computed": {"inject": [{"path": "/c", "value": "../b + 1"}]}
                },
                "c": {"type": "number"}
            }
        }),
        None,
        no_validation(),
    )
    .expect("tree should build");

    tree.find("/a")
        .expect("a node")
        .set_value(Some(json!(3)), SetValueOption::OVERWRITE);
    tree.flush();

    assert_eq!(tree.value(), Some(json!({"a": 3, "b": 6, "c": 7})));
}

#[test]
fn mutual_cycle_settles_after_one_round_trip() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "a": {
                    "type": "number",
                    "computed": {"inject": [{"path": "/b", "value": "../a + 1"}]}
                },
                "b": {
                    "type": "number",
                    "computed": {"inject": [{"path": "/a", "value": "../b + 1"}]}
                }
            }
        }),
        None,
        no_validation(),
    )
    .expect("tree should build");

    tree.find("/a")
        .expect("a node")
        .set_value(Some(json!(1)), SetValueOption::OVERWRITE);
    tree.flush();

    // a=1 writes b=2, b writes a=3, and a's second attempt at /b is
    // suppressed because the path is still in flight.
    assert_eq!(tree.value(), Some(json!({"a": 3, "b": 2})));
}

#[test]
fn guard_window_clears_between_cascades() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "source": {
                    "type": "number",
                    "computed": {"inject": [{"path": "/mirror", "value": "../source"}]}
                },
                "mirror": {"type": "number"}
            }
        }),
        None,
        no_validation(),
    )
    .expect("tree should build");

    let source = tree.find("/source").expect("source node");
    let mirror = tree.find("/mirror").expect("mirror node");

    source.set_value(Some(json!(1)), SetValueOption::OVERWRITE);
    tree.flush();
    assert_eq!(mirror.value(), Some(json!(1)));

    source.set_value(Some(json!(2)), SetValueOption::OVERWRITE);
    tree.flush();
    assert_eq!(
        mirror.value(),
        Some(json!(2)),
        "a fresh cascade starts with a clean in-flight window"
    );
}
