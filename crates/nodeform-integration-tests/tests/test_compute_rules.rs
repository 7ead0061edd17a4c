//! Computed properties: flags, watches, derivation, activation resets.
//!
//! Test strategy: express each rule kind (`visible`, `readOnly`,
//! `disabled`, `active`, `watch`, `derive`, `pristine`) in a small
//! schema, drive the dependencies, and assert both the computed state
//! and the value protocol consequences (deactivation hides the value,
//! reactivation restores it, derivation overwrites, pristine resets on
//! the rising edge).

use std::cell::RefCell;
use std::rc::Rc;

use nodeform_core::{NodeEventType, SetValueOption, Tree, TreeOptions};
use serde_json::json;

fn no_validation() -> TreeOptions {
    TreeOptions {
        validation: false,
        ..TreeOptions::default()
    }
}

#[test]
fn visibility_read_only_and_disabled_follow_their_rules() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "mode": {"type": "string", "default": "edit"},
                "field": {
                    "type": "string",
                    "computed": {
                        "visible": "../mode !== 'hidden'",
                        "readOnly": "../mode === 'review'",
                        "disabled": "../mode === 'locked'"
                    }
                }
            }
        }),
        None,
        no_validation(),
    )
    .expect("tree should build");

    let field = tree.find("/field").expect("field node");
    let mode = tree.find("/mode").expect("mode node");
    assert!(field.visible());
    assert!(!field.read_only());
    assert!(!field.disabled());

    mode.set_value(Some(json!("review")), SetValueOption::OVERWRITE);
    tree.flush();
    assert!(field.visible() && field.read_only() && !field.disabled());

    mode.set_value(Some(json!("locked")), SetValueOption::OVERWRITE);
    tree.flush();
    assert!(field.visible() && !field.read_only() && field.disabled());

    mode.set_value(Some(json!("hidden")), SetValueOption::OVERWRITE);
    tree.flush();
    assert!(!field.visible());
}

#[test]
fn hidden_nodes_drop_from_the_document_and_return_on_reveal() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "mode": {"type": "string", "default": "edit"},
                "field": {
                    "type": "string",
                    "default": "kept",
                    "computed": {"visible": "../mode !== 'hidden'"}
                }
            }
        }),
        None,
        no_validation(),
    )
    .expect("tree should build");

    assert_eq!(tree.value(), Some(json!({"mode": "edit", "field": "kept"})));

    let mode = tree.find("/mode").expect("mode node");
    mode.set_value(Some(json!("hidden")), SetValueOption::OVERWRITE);
    tree.flush();
    let field = tree.find("/field").expect("field node");
    assert_eq!(tree.value(), Some(json!({"mode": "hidden"})));
    assert_eq!(
        field.value(),
        Some(json!("kept")),
        "hiding gates contribution, not the stored value"
    );

    mode.set_value(Some(json!("edit")), SetValueOption::OVERWRITE);
    tree.flush();
    assert_eq!(tree.value(), Some(json!({"mode": "edit", "field": "kept"})));
}

#[test]
fn watch_values_track_dependencies_in_declaration_order() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "first": {"type": "number"},
                "second": {"type": "number"},
                "observer": {
                    "type": "string",
                    "computed": {"watch": ["../second", "../first"]}
                }
            }
        }),
        None,
        no_validation(),
    )
    .expect("tree should build");

    let observer = tree.find("/observer").expect("observer node");
    assert_eq!(observer.watch_values(), vec![None, None]);

    tree.find("/first")
        .expect("first node")
        .set_value(Some(json!(1)), SetValueOption::OVERWRITE);
    tree.find("/second")
        .expect("second node")
        .set_value(Some(json!(2)), SetValueOption::OVERWRITE);
    tree.flush();

    assert_eq!(
        observer.watch_values(),
        vec![Some(json!(2)), Some(json!(1))],
        "watch order is declaration order, not path order"
    );
}

#[test]
fn deactivation_hides_the_value_and_reactivation_restores_it() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "show": {"type": "boolean", "default": true},
                "details": {
                    "type": "string",
                    "default": "initial",
                    "computed": {"active": "../show"}
                }
            }
        }),
        None,
        no_validation(),
    )
    .expect("tree should build");

    let show = tree.find("/show").expect("show node");
    let details = tree.find("/details").expect("details node");

    details.set_value(Some(json!("edited")), SetValueOption::OVERWRITE);
    tree.flush();
    assert_eq!(
        tree.value(),
        Some(json!({"show": true, "details": "edited"}))
    );

    show.set_value(Some(json!(false)), SetValueOption::OVERWRITE);
    tree.flush();
    assert!(!details.active());
    assert_eq!(details.value(), None, "inactive applied value is undefined");
    assert_eq!(tree.value(), Some(json!({"show": false})));

    show.set_value(Some(json!(true)), SetValueOption::OVERWRITE);
    tree.flush();
    assert!(details.active());
    assert_eq!(
        details.value(),
        Some(json!("edited")),
        "reactivation restores the preserved value"
    );
}

#[test]
fn activation_publishes_an_activated_event() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "on": {"type": "boolean", "default": false},
                "gated": {
                    "type": "string",
                    "computed": {"active": "../on"}
                }
            }
        }),
        None,
        no_validation(),
    )
    .expect("tree should build");

    let gated = tree.find("/gated").expect("gated node");
    assert!(!gated.active());

    let activations = Rc::new(RefCell::new(0));
    let seen = Rc::clone(&activations);
    let _sub = gated.subscribe(move |event| {
        if event.contains(NodeEventType::ACTIVATED) {
            *seen.borrow_mut() += 1;
        }
    });

    tree.find("/on")
        .expect("on node")
        .set_value(Some(json!(true)), SetValueOption::OVERWRITE);
    tree.flush();
    assert_eq!(*activations.borrow(), 1);
}

#[test]
fn derivation_overwrites_on_every_dependency_change() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "net": {"type": "number", "default": 100},
                "rate": {"type": "number", "default": 0.2},
                "gross": {
                    "type": "number",
                    "computed": {"derive": "../net + ../net * ../rate"}
                }
            }
        }),
        None,
        no_validation(),
    )
    .expect("tree should build");

    let gross = tree.find("/gross").expect("gross node");
    assert_eq!(gross.value(), Some(json!(120)));

    tree.find("/net")
        .expect("net node")
        .set_value(Some(json!(50)), SetValueOption::OVERWRITE);
    tree.flush();
    assert_eq!(gross.value(), Some(json!(60)));
}

#[test]
fn pristine_resets_on_the_rising_edge_only() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "wipe": {"type": "boolean", "default": false},
                "field": {
                    "type": "string",
                    "default": "initial",
                    "computed": {"pristine": "../wipe"}
                }
            }
        }),
        None,
        no_validation(),
    )
    .expect("tree should build");

    let field = tree.find("/field").expect("field node");
    let wipe = tree.find("/wipe").expect("wipe node");

    field.set_value(Some(json!("dirty")), SetValueOption::OVERWRITE);
    tree.flush();

    wipe.set_value(Some(json!(true)), SetValueOption::OVERWRITE);
    tree.flush();
    assert_eq!(field.value(), Some(json!("initial")), "rising edge resets");

    field.set_value(Some(json!("dirty again")), SetValueOption::OVERWRITE);
    tree.flush();
    assert_eq!(
        field.value(),
        Some(json!("dirty again")),
        "a held-high pristine flag must not keep resetting"
    );
}

#[test]
fn mutually_derived_values_terminate_the_flush() {
    let tree = Tree::build(
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "number", "computed": {"derive": "../b + 1"}},
                "b": {"type": "number", "computed": {"derive": "../a + 1"}}
            }
        }),
        None,
        no_validation(),
    )
    .expect("tree should build");

    // Kick the cycle off; the scheduler's work cap ends it.
    tree.find("/a")
        .expect("a node")
        .set_value(Some(json!(1)), SetValueOption::OVERWRITE);
    tree.flush();

    // The exact resting values are unspecified; the tree must simply
    // come back usable.
    assert!(tree.find("/a").expect("a node").value().is_some());

    // Abandoning the capped flush must not leave scheduling latches
    // set: later changes still reach the document callback.
    let emissions = Rc::new(RefCell::new(0));
    let seen = Rc::clone(&emissions);
    tree.set_on_change(move |_| *seen.borrow_mut() += 1);
    tree.find("/b")
        .expect("b node")
        .set_value(Some(json!(0)), SetValueOption::OVERWRITE);
    tree.flush();
    assert!(
        *emissions.borrow() >= 1,
        "the tree must keep emitting after a capped flush"
    );
}
