//! Compiled computed-rule sets.
//!
//! A fragment's `computed` object carries rule expressions keyed by the
//! property they drive (`active`, `visible`, `readOnly`, `disabled`,
//! `oneOf`, `derive`, `pristine`), a `watch` list of observed paths, and
//! an `inject` list of cross-field writes. Branch selectors live on the
//! combinator branches themselves (`oneOf[i].computed.if`).
//!
//! All expressions of one node compile against a single shared
//! [`DependencyTable`], so each dependency path is wired exactly once
//! and every rule reads from the same slot array.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use nodeform_expr::{compile, CompiledExpr, DependencyTable};
use nodeform_pointer::PathExpr;
use serde_json::Value;

use crate::error::BuildError;

/// One `inject` entry: when the owning node's value changes, evaluate
/// `expr` and write the result to `target`.
#[derive(Debug, Clone)]
pub(crate) struct InjectionRule {
    pub target: String,
    pub expr: CompiledExpr,
}

/// Every rule of one node, compiled once at build time.
#[derive(Debug, Default)]
pub(crate) struct CompiledRules {
    pub table: DependencyTable,
    pub active: Option<CompiledExpr>,
    pub visible: Option<CompiledExpr>,
    pub read_only: Option<CompiledExpr>,
    pub disabled: Option<CompiledExpr>,
    pub pristine: Option<CompiledExpr>,
    /// Parent-level selector; takes precedence over per-branch `if`s.
    pub one_of: Option<CompiledExpr>,
    pub derive: Option<CompiledExpr>,
    /// Per-branch `oneOf[i].computed.if`, index-aligned with the
    /// combinator. A branch without a selector never self-selects.
    pub one_of_selectors: Vec<Option<CompiledExpr>>,
    pub any_of_selectors: Vec<Option<CompiledExpr>>,
    /// Slot indices of the `watch` list, in declaration order.
    pub watch_slots: Vec<usize>,
    pub injections: Vec<InjectionRule>,
}

impl CompiledRules {
    pub(crate) fn compile(schema: &Value, schema_path: &str) -> Result<Self, BuildError> {
        let mut rules = Self::default();
        let computed = schema.get("computed");

        if let Some(Value::Object(map)) = computed {
            rules.active = compile_rule(map.get("active"), "active", schema_path, &mut rules.table)?;
            rules.visible = compile_rule(map.get("visible"), "visible", schema_path, &mut rules.table)?;
            rules.read_only = compile_rule(map.get("readOnly"), "readOnly", schema_path, &mut rules.table)?;
            rules.disabled = compile_rule(map.get("disabled"), "disabled", schema_path, &mut rules.table)?;
            rules.pristine = compile_rule(map.get("pristine"), "pristine", schema_path, &mut rules.table)?;
            rules.one_of = compile_rule(map.get("oneOf"), "oneOf", schema_path, &mut rules.table)?;
            rules.derive = compile_rule(map.get("derive"), "derive", schema_path, &mut rules.table)?;

            if let Some(Value::Array(paths)) = map.get("watch") {
                for path in paths {
                    let Some(path) = path.as_str() else { continue };
                    PathExpr::parse(path).map_err(|source| BuildError::InvalidPath {
                        expr: path.to_string(),
                        schema_path: schema_path.to_string(),
                        source,
                    })?;
                    rules.watch_slots.push(rules.table.intern(path));
                }
            }

            if let Some(Value::Array(entries)) = map.get("inject") {
                for entry in entries {
                    let (Some(target), Some(source)) = (
                        entry.get("path").and_then(Value::as_str),
                        entry.get("value").and_then(Value::as_str),
                    ) else {
                        continue;
                    };
                    PathExpr::parse(target).map_err(|source| BuildError::InvalidPath {
                        expr: target.to_string(),
                        schema_path: schema_path.to_string(),
                        source,
                    })?;
                    let expr = compile(source, &mut rules.table).map_err(|source| {
                        BuildError::InvalidRule {
                            rule: "inject".to_string(),
                            schema_path: schema_path.to_string(),
                            source,
                        }
                    })?;
                    rules.injections.push(InjectionRule {
                        target: target.to_string(),
                        expr,
                    });
                }
            }
        }

        rules.one_of_selectors = compile_selectors(schema.get("oneOf"), schema_path, &mut rules.table)?;
        rules.any_of_selectors = compile_selectors(schema.get("anyOf"), schema_path, &mut rules.table)?;

        Ok(rules)
    }

    /// True when the node has nothing to compute or wire.
    pub(crate) fn is_inert(&self) -> bool {
        self.table.is_empty()
            && self.one_of_selectors.is_empty()
            && self.any_of_selectors.is_empty()
            && self.injections.is_empty()
    }

    /// Evaluate the `oneOf` selection against the current slots. The
    /// parent-level `oneOf` rule wins when present (any non-numeric
    /// result deselects); otherwise the first branch whose `if` holds is
    /// selected, and `-1` means no branch.
    pub(crate) fn select_one_of(&self, slots: &[Option<Value>]) -> i64 {
        if let Some(rule) = &self.one_of {
            return match rule.evaluate(slots) {
                Some(Value::Number(n)) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .unwrap_or(-1),
                _ => -1,
            };
        }
        for (index, selector) in self.one_of_selectors.iter().enumerate() {
            if let Some(selector) = selector {
                if selector.evaluate_bool(slots) {
                    return index as i64;
                }
            }
        }
        -1
    }

    /// Every `anyOf` branch whose `if` holds, in declaration order.
    pub(crate) fn select_any_of(&self, slots: &[Option<Value>]) -> Vec<usize> {
        self.any_of_selectors
            .iter()
            .enumerate()
            .filter_map(|(index, selector)| {
                selector
                    .as_ref()
                    .filter(|s| s.evaluate_bool(slots))
                    .map(|_| index)
            })
            .collect()
    }
}

fn compile_rule(
    source: Option<&Value>,
    rule: &str,
    schema_path: &str,
    table: &mut DependencyTable,
) -> Result<Option<CompiledExpr>, BuildError> {
    let Some(source) = source.and_then(Value::as_str) else {
        return Ok(None);
    };
    compile(source, table)
        .map(Some)
        .map_err(|source| BuildError::InvalidRule {
            rule: rule.to_string(),
            schema_path: schema_path.to_string(),
            source,
        })
}

fn compile_selectors(
    branches: Option<&Value>,
    schema_path: &str,
    table: &mut DependencyTable,
) -> Result<Vec<Option<CompiledExpr>>, BuildError> {
    let Some(Value::Array(branches)) = branches else {
        return Ok(Vec::new());
    };
    branches
        .iter()
        .map(|branch| {
            let selector = branch
                .get("computed")
                .and_then(|c| c.get("if"))
                .and_then(Value::as_str);
            match selector {
                Some(source) => compile(source, table).map(Some).map_err(|source| {
                    BuildError::InvalidRule {
                        rule: "if".to_string(),
                        schema_path: schema_path.to_string(),
                        source,
                    }
                }),
                None => Ok(None),
            }
        })
        .collect()
}

/// Per-node runtime compute state: the compiled rules plus the live
/// dependency slot array.
pub(crate) struct ComputeState {
    pub rules: Rc<CompiledRules>,
    pub slots: RefCell<Vec<Option<Value>>>,
    /// Last observed `pristine` result, for edge-triggered resets.
    pub prev_pristine: Cell<bool>,
}

impl ComputeState {
    pub(crate) fn new(rules: CompiledRules) -> Self {
        let slot_count = rules.table.len();
        Self {
            rules: Rc::new(rules),
            slots: RefCell::new(vec![None; slot_count]),
            prev_pristine: Cell::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shared_table_across_rules() {
        let schema = json!({
            "computed": {
                "active": "../mode === 'on'",
                "visible": "../mode !== 'hidden'",
                "watch": ["../mode", "/other"]
            }
        });
        let rules = CompiledRules::compile(&schema, "#/properties/x").unwrap();
        // `../mode` appears in three places but is interned once.
        assert_eq!(rules.table.paths(), ["../mode", "/other"]);
        assert_eq!(rules.watch_slots, vec![0, 1]);
    }

    #[test]
    fn test_branch_selectors_align_with_combinator() {
        let schema = json!({
            "oneOf": [
                {"type": "object", "computed": {"if": "../kind === 'a'"}},
                {"type": "object"},
                {"type": "object", "computed": {"if": "../kind === 'c'"}}
            ]
        });
        let rules = CompiledRules::compile(&schema, "#").unwrap();
        assert_eq!(rules.one_of_selectors.len(), 3);
        assert!(rules.one_of_selectors[0].is_some());
        assert!(rules.one_of_selectors[1].is_none());
        assert!(rules.one_of_selectors[2].is_some());

        let slots = vec![Some(json!("c"))];
        assert_eq!(rules.select_one_of(&slots), 2);
        let slots = vec![Some(json!("b"))];
        assert_eq!(rules.select_one_of(&slots), -1, "selectorless branch never self-selects");
    }

    #[test]
    fn test_parent_one_of_rule_overrides_selectors() {
        let schema = json!({
            "computed": {"oneOf": "../choice"},
            "oneOf": [
                {"computed": {"if": "true"}},
                {}
            ]
        });
        let rules = CompiledRules::compile(&schema, "#").unwrap();
        assert_eq!(rules.select_one_of(&[Some(json!(1))]), 1);
        assert_eq!(rules.select_one_of(&[Some(json!("nope"))]), -1);
        assert_eq!(rules.select_one_of(&[None]), -1);
    }

    #[test]
    fn test_any_of_selects_every_matching_branch() {
        let schema = json!({
            "anyOf": [
                {"computed": {"if": "./flags > 0"}},
                {"computed": {"if": "./flags > 10"}},
                {"computed": {"if": "./flags > 100"}}
            ]
        });
        let rules = CompiledRules::compile(&schema, "#").unwrap();
        assert_eq!(rules.select_any_of(&[Some(json!(50))]), vec![0, 1]);
        assert_eq!(rules.select_any_of(&[Some(json!(0))]), Vec::<usize>::new());
    }

    #[test]
    fn test_injections_compile_into_shared_table() {
        let schema = json!({
            "computed": {
                "inject": [
                    {"path": "/summary/total", "value": "./price * ./count"},
                    {"path": "broken", "value": 42},
                ]
            }
        });
        let rules = CompiledRules::compile(&schema, "#/properties/line").unwrap();
        // Non-string entries are skipped, not errors.
        assert_eq!(rules.injections.len(), 1);
        assert_eq!(rules.injections[0].target, "/summary/total");
        assert_eq!(rules.table.paths(), ["./price", "./count"]);
    }

    #[test]
    fn test_bad_rule_reports_location() {
        let schema = json!({"computed": {"active": "./a &&"}});
        let err = CompiledRules::compile(&schema, "#/properties/x").unwrap_err();
        match err {
            BuildError::InvalidRule { rule, schema_path, .. } => {
                assert_eq!(rule, "active");
                assert_eq!(schema_path, "#/properties/x");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_inert_rules() {
        assert!(CompiledRules::compile(&json!({"type": "string"}), "#")
            .unwrap()
            .is_inert());
        assert!(!CompiledRules::compile(
            &json!({"computed": {"visible": "../show"}}),
            "#"
        )
        .unwrap()
        .is_inert());
    }
}
