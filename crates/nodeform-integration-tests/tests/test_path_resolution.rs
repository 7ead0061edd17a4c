//! Path expression resolution and rename integrity.
//!
//! Test strategy: exercise every anchor (`.`/relative, `..`, `#`, `@`,
//! absolute) and the wildcard against a live tree, then rename a
//! subtree and assert that all descendant paths are recomputed before
//! any path event fires and that each renamed node gets exactly one
//! event while construction keys stay put.

use std::cell::RefCell;
use std::rc::Rc;

use nodeform_core::{EventPayload, NodeEventType, SetValueOption, Tree, TreeOptions};
use serde_json::json;

fn build_sample() -> Tree {
    Tree::build(
        json!({
            "type": "object",
            "properties": {
                "profile": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "email": {"type": "string"}
                    }
                },
                "tags": {
                    "type": "array",
                    "items": {"type": "string"},
                    "default": ["x", "y", "z"]
                }
            }
        }),
        None,
        TreeOptions {
            context: Some(json!({"locale": "de"})),
            validation: false,
            ..TreeOptions::default()
        },
    )
    .expect("tree should build")
}

#[test]
fn anchors_resolve_from_the_right_starting_points() {
    let tree = build_sample();
    let name = tree.find("/profile/name").expect("name node");

    assert_eq!(name.find("").expect("self"), name);
    assert_eq!(name.find(".").expect("self"), name);
    assert_eq!(
        name.find("..").expect("parent").path(),
        "/profile"
    );
    assert_eq!(
        name.find("../email").expect("sibling").path(),
        "/profile/email"
    );
    assert_eq!(name.find("#").expect("root"), *tree.root());
    assert_eq!(
        name.find("/tags/1").expect("absolute").value(),
        Some(json!("y"))
    );
    assert_eq!(
        name.find("@/locale").expect("context child").value(),
        Some(json!("de"))
    );
}

#[test]
fn misses_yield_nothing_instead_of_errors() {
    let tree = build_sample();
    assert!(tree.find("/nope").is_none());
    assert!(tree.find("/profile/name/child").is_none(), "terminals have no children");
    assert!(tree.root().find("..").is_none(), "the root has no parent");
    assert!(tree.find("/tags/9").is_none(), "out-of-range index");
    assert!(tree.root().find_all("/nope/*").is_empty());
}

#[test]
fn wildcard_matches_every_child_in_tree_order() {
    let tree = build_sample();
    let matches = tree.root().find_all("/tags/*");
    assert_eq!(matches.len(), 3);
    let values: Vec<_> = matches.iter().map(|node| node.value()).collect();
    assert_eq!(
        values,
        vec![Some(json!("x")), Some(json!("y")), Some(json!("z"))]
    );
}

#[test]
fn rename_recomputes_every_descendant_before_events_fire() {
    let tree = build_sample();
    let profile = tree.find("/profile").expect("profile node");
    let name = tree.find("/profile/name").expect("name node");
    let email = tree.find("/profile/email").expect("email node");

    let observed = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&observed);
    let peek_email = email.clone();
    // When the name node's path event arrives, its sibling must
    // already be on the new path too.
    let _sub = name.subscribe(move |event| {
        if let Some(EventPayload::Path { previous, current }) =
            event.payload(NodeEventType::UPDATE_PATH)
        {
            seen.borrow_mut()
                .push((previous.clone(), current.clone(), peek_email.path()));
        }
    });

    profile.rename("account");
    tree.flush();

    assert_eq!(profile.path(), "/account");
    assert_eq!(name.path(), "/account/name");
    let observed = observed.borrow();
    assert_eq!(observed.len(), 1, "one path event per renamed node");
    assert_eq!(
        *observed,
        vec![(
            "/profile/name".to_string(),
            "/account/name".to_string(),
            "/account/email".to_string()
        )]
    );
}

#[test]
fn keys_survive_renames_and_lookups_follow_the_new_path() {
    let tree = build_sample();
    let profile = tree.find("/profile").expect("profile node");
    let key_before = profile.key().to_string();

    profile.rename("account");
    tree.flush();

    assert_eq!(profile.key(), key_before);
    assert!(tree.find("/profile").is_none(), "old path is gone");
    assert_eq!(
        tree.find("/account/email").expect("new path works"),
        tree.root().find("/account").expect("account").find("email").expect("email")
    );
}

#[test]
fn escaped_segments_round_trip_through_paths() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "a/b": {"type": "string", "default": "slash"}
            }
        }),
        None,
        TreeOptions {
            validation: false,
            ..TreeOptions::default()
        },
    )
    .expect("tree should build");

    let node = tree.find("/a~1b").expect("escaped lookup");
    assert_eq!(node.name(), "a/b");
    assert_eq!(node.path(), "/a~1b");
    assert_eq!(node.value(), Some(json!("slash")));
    node.set_value(Some(json!("updated")), SetValueOption::OVERWRITE);
    tree.flush();
    assert_eq!(tree.value(), Some(json!({"a/b": "updated"})));
}
