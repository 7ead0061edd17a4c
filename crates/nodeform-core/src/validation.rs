//! Validation runs and error distribution.
//!
//! The tree validates its *enhanced* value: the root's external value
//! with every virtual entry from the enhancer map written over it. The
//! resulting issues land in two places: the root's global list, and on
//! the individual nodes addressed by each issue's data path. A data
//! path may match several nodes (same-named properties across sibling
//! combinator branches); variant nodes only accept issues whose schema
//! path falls inside their own branch fragment, so errors never bleed
//! into a foreign branch.

use std::collections::BTreeMap;

use nodeform_schema::ValidationIssue;
use serde_json::Value;

use crate::event::{EventPayload, NodeEventType};
use crate::node::{Node, WeakNode};

impl Node {
    /// Run validation now and distribute the results. Delegates to the
    /// root when called on any other node; returns the full issue list.
    /// A no-op (empty) when validation is disabled or no validator was
    /// installed.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let root = self.root();
        let Some(state) = root.0.root_state.as_ref() else {
            return Vec::new();
        };
        if !state.validation.borrow().enabled {
            return Vec::new();
        }

        let document = root.enhanced_value();
        let issues = {
            let validation = state.validation.borrow();
            match validation.validator.as_ref() {
                Some(validator) => validator.validate(&document),
                None => Vec::new(),
            }
        };
        root.distribute_issues(&issues);
        issues
    }

    /// Enable or disable validation runs tree-wide (root only). A full
    /// run (or clear) follows immediately so node errors match the new
    /// setting.
    pub fn set_validation_enabled(&self, enabled: bool) {
        let root = self.root();
        let Some(state) = root.0.root_state.as_ref() else {
            return;
        };
        let was = {
            let mut validation = state.validation.borrow_mut();
            std::mem::replace(&mut validation.enabled, enabled)
        };
        if was == enabled {
            return;
        }
        if enabled {
            root.validate();
        } else {
            root.clear_distributed_issues();
        }
    }

    /// The full issue list of the latest run (root-aggregated).
    pub fn global_errors(&self) -> Vec<ValidationIssue> {
        let root = self.root();
        match root.0.root_state.as_ref() {
            Some(state) => state.global_errors.borrow().clone(),
            None => Vec::new(),
        }
    }

    /// The latest run's issues merged with every external batch attached
    /// to the root (root-aggregated).
    pub fn merged_global_errors(&self) -> Vec<ValidationIssue> {
        let root = self.root();
        let mut merged = root.global_errors();
        for batch in root.0.external_errors.borrow().values() {
            merged.extend(batch.iter().cloned());
        }
        merged
    }

    /// Write a virtual value into the validated document at `pointer`
    /// without touching any node. `None` removes the entry. Virtual
    /// values let rules expose computed fields to schema constraints.
    pub fn set_virtual_value(&self, pointer: &str, value: Option<Value>) {
        let root = self.root();
        let Some(state) = root.0.root_state.as_ref() else {
            return;
        };
        {
            let mut enhancer = state.enhancer.borrow_mut();
            match value {
                Some(value) => {
                    enhancer.insert(pointer.to_string(), value);
                }
                None => {
                    enhancer.remove(pointer);
                }
            }
        }
        let enabled = state.validation.borrow().enabled;
        if enabled {
            root.validate();
        }
    }

    /// The root value with every enhancer entry applied. This is what
    /// the validator sees; an undefined root validates as `null`.
    pub fn enhanced_value(&self) -> Value {
        let root = self.root();
        let mut document = root.value().unwrap_or(Value::Null);
        if let Some(state) = root.0.root_state.as_ref() {
            for (pointer, value) in state.enhancer.borrow().iter() {
                nodeform_pointer::set(&mut document, pointer, value.clone());
            }
        }
        document
    }

    fn distribute_issues(&self, issues: &[ValidationIssue]) {
        let Some(state) = self.0.root_state.as_ref() else {
            return;
        };

        let global_changed = {
            let mut global = state.global_errors.borrow_mut();
            if *global == issues {
                false
            } else {
                *global = issues.to_vec();
                true
            }
        };
        if global_changed {
            self.publish(
                NodeEventType::UPDATE_GLOBAL_ERROR,
                Some(EventPayload::Errors(self.merged_global_errors())),
                None,
            );
        }

        let mut groups: BTreeMap<String, Vec<ValidationIssue>> = BTreeMap::new();
        for issue in issues {
            groups
                .entry(issue.data_path.clone())
                .or_default()
                .push(issue.clone());
        }

        let mut touched: BTreeMap<String, WeakNode> = BTreeMap::new();
        for (data_path, group) in &groups {
            let targets = if data_path.is_empty() {
                vec![self.clone()]
            } else {
                self.find_all(data_path)
            };
            if targets.is_empty() {
                tracing::debug!(%data_path, "no node for reported issue path");
                continue;
            }
            for target in targets {
                let assigned = filter_for_branch(&target, group);
                let has_errors = !assigned.is_empty();
                // An empty assignment still writes: a variant sibling
                // whose branch no longer raises the path's issues must
                // drop the ones it held.
                target.set_errors(assigned);
                if has_errors {
                    touched.insert(target.key().to_string(), target.downgrade());
                }
            }
        }

        // Nodes that carried errors last run but not this one get
        // cleared, so stale errors never outlive the values that
        // caused them.
        let previous = {
            let mut validation = state.validation.borrow_mut();
            std::mem::replace(&mut validation.prev_error_nodes, touched.clone())
        };
        for (key, weak) in previous {
            if touched.contains_key(&key) {
                continue;
            }
            if let Some(target) = weak.upgrade() {
                target.set_errors(Vec::new());
            }
        }
    }

    fn clear_distributed_issues(&self) {
        let Some(state) = self.0.root_state.as_ref() else {
            return;
        };
        let previous = {
            let mut validation = state.validation.borrow_mut();
            std::mem::take(&mut validation.prev_error_nodes)
        };
        for (_, weak) in previous {
            if let Some(target) = weak.upgrade() {
                target.set_errors(Vec::new());
            }
        }
        let had_global = {
            let mut global = state.global_errors.borrow_mut();
            let had = !global.is_empty();
            global.clear();
            had
        };
        if had_global {
            self.publish(
                NodeEventType::UPDATE_GLOBAL_ERROR,
                Some(EventPayload::Errors(self.merged_global_errors())),
                None,
            );
        }
    }
}

/// A node inside a combinator branch only accepts issues raised by its
/// own branch's subschema.
fn filter_for_branch(node: &Node, issues: &[ValidationIssue]) -> Vec<ValidationIssue> {
    if node.variant().is_none() {
        return issues.to_vec();
    }
    let prefix = node.schema_path().trim_start_matches('#');
    issues
        .iter()
        .filter(|issue| issue.schema_path.starts_with(prefix))
        .cloned()
        .collect()
}
