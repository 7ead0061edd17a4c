//! Tree construction: materializing a schema into a live node graph.
//!
//! Building walks the schema top-down. Object fragments become branch
//! nodes with one child per declared property; `oneOf`/`anyOf` branch
//! properties become *variant* children that all coexist in the tree
//! and take turns contributing through branch selection. Array
//! fragments build one child per seeded element and rebuild children as
//! the value grows or shrinks. Everything else is a terminal.
//!
//! Seeding resolves each node's starting value as the input slice for
//! its path, falling back to the fragment's `default`. After the whole
//! tree exists, wiring runs bottom-up (`initialize`), computed
//! properties get their first evaluation, container values are
//! assembled, and the scheduler drains once so the tree is settled
//! before the caller sees it.

use std::collections::HashSet;
use std::sync::Arc;

use nodeform_pointer::escape;
use nodeform_schema::{
    default_plugin, find_ref_cycle, strip_extensions, CompiledValidator, FallbackValidator,
    ValidationIssue, ValidatorPlugin,
};
use serde_json::{json, Map, Value};

use crate::compute::{CompiledRules, ComputeState};
use crate::error::BuildError;
use crate::node::{Node, NodeSeed, ResetOptions, RootState, SetValueOption, WeakNode};
use crate::schema::{self, BranchScope, NodeGroup};

/// Build-time options for [`Tree::build`].
pub struct TreeOptions {
    /// Value materialized into the context node (`@` anchor).
    pub context: Option<Value>,
    /// Whether validation runs (initially and after every change).
    pub validation: bool,
    /// Validator plugin override; the process-wide default otherwise.
    pub plugin: Option<Arc<dyn ValidatorPlugin>>,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            context: None,
            validation: true,
            plugin: None,
        }
    }
}

/// An owned, settled node graph. Dropping the tree tears the graph
/// down.
pub struct Tree {
    root: Node,
}

impl Tree {
    /// Materialize `schema` with `input` as the starting document.
    ///
    /// A schema whose `$ref` graph loops, or that the plugin rejects,
    /// still builds: its validator is replaced by one that reports a
    /// single synthetic issue on every run.
    pub fn build(schema: Value, input: Option<Value>, options: TreeOptions) -> Result<Self, BuildError> {
        let validator = compile_validator(&schema, options.plugin.as_ref());
        let root = build_node(BuildSpec {
            name: String::new(),
            path: String::new(),
            schema_path: "#".to_string(),
            schema: &schema,
            input: input.as_ref(),
            parent: None,
            required: false,
            scope: None,
            variant: None,
            depth: 0,
            root_state: Some(RootState::new(Some(validator), options.validation)),
        })?;
        set_root_recursively(&root, root.downgrade());
        root.install_abandon_hook();

        if let Some(context_value) = options.context {
            let context_schema = synthesize_schema(&context_value);
            let context = build_node(BuildSpec {
                name: String::new(),
                path: String::new(),
                schema_path: "#".to_string(),
                schema: &context_schema,
                input: Some(&context_value),
                parent: None,
                required: false,
                scope: None,
                variant: None,
                depth: 0,
                root_state: Some(RootState::new(None, false)),
            })?;
            set_root_recursively(&context, context.downgrade());
            context.install_abandon_hook();
            context.initialize();
            assemble_initial(&context);
            if let Some(state) = root.0.root_state.as_ref() {
                *state.context.borrow_mut() = Some(context);
            }
        }

        root.initialize();
        root.update_computed_properties_recursively();
        assemble_initial(&root);

        let tree = Self { root };
        tree.flush();
        tree.root.validate();
        tree.flush();
        Ok(tree)
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// The externally observable document value.
    pub fn value(&self) -> Option<Value> {
        self.root.value()
    }

    /// Resolve a path expression from the root.
    pub fn find(&self, expr: &str) -> Option<Node> {
        self.root.find(expr)
    }

    /// Drain all scheduled work: batched event flushes, the change
    /// emission, revalidation, injection-guard clearing.
    pub fn flush(&self) {
        if let Some(scheduler) = self.root.scheduler() {
            scheduler.run_until_idle();
        }
    }

    /// Install the document change callback. Fires once per settled
    /// batch of changes with the current external value.
    pub fn set_on_change(&self, callback: impl Fn(Option<Value>) + 'static) {
        self.root.set_on_change(callback);
    }

    /// Run validation now; see [`Node::validate`].
    pub fn validate(&self) -> Vec<ValidationIssue> {
        self.root.validate()
    }

    /// Reset the whole document to its defaults.
    pub fn reset(&self) {
        self.root.reset(ResetOptions::default());
        self.flush();
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        self.root.clean_up();
    }
}

fn compile_validator(
    schema: &Value,
    plugin: Option<&Arc<dyn ValidatorPlugin>>,
) -> Box<dyn CompiledValidator> {
    if let Some(pointer) = find_ref_cycle(schema) {
        tracing::warn!(%pointer, "schema $ref graph is cyclic, validator degraded");
        return Box::new(FallbackValidator::new(ValidationIssue::circular_reference(
            &pointer,
        )));
    }
    let stripped = strip_extensions(schema);
    let plugin = plugin.map(Arc::clone).unwrap_or_else(default_plugin);
    match plugin.compile(&stripped) {
        Ok(validator) => validator,
        Err(error) => {
            tracing::warn!(%error, "schema failed to compile, validator degraded");
            Box::new(FallbackValidator::new(ValidationIssue::schema_compile(
                &error.to_string(),
            )))
        }
    }
}

struct BuildSpec<'a> {
    name: String,
    path: String,
    schema_path: String,
    schema: &'a Value,
    input: Option<&'a Value>,
    parent: Option<WeakNode>,
    required: bool,
    scope: Option<BranchScope>,
    variant: Option<usize>,
    depth: usize,
    root_state: Option<RootState>,
}

fn build_node(spec: BuildSpec<'_>) -> Result<Node, BuildError> {
    if !spec.schema.is_object() {
        return Err(BuildError::InvalidFragment {
            schema_path: spec.schema_path,
        });
    }

    let schema_type = schema::schema_type(spec.schema);
    let group = schema::group_of(schema_type);
    let rules = CompiledRules::compile(spec.schema, &spec.schema_path)?;
    let compute = (!rules.is_inert()).then(|| ComputeState::new(rules));
    let seed_value = spec
        .input
        .cloned()
        .or_else(|| spec.schema.get("default").cloned());
    let items_schema = match group {
        NodeGroup::Array => spec.schema.get("items").cloned(),
        _ => None,
    };

    let node = Node::from_seed(NodeSeed {
        group,
        schema: spec.schema.clone(),
        schema_type,
        nullable: schema::is_nullable(spec.schema),
        required: spec.required,
        scope: spec.scope,
        variant: spec.variant,
        depth: spec.depth,
        schema_path: spec.schema_path.clone(),
        name: spec.name,
        path: spec.path.clone(),
        parent: spec.parent,
        compute,
        items_schema,
        seed_value: seed_value.clone(),
        root_state: spec.root_state,
    });

    match group {
        NodeGroup::Branch => {
            let seed_object = match &seed_value {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            let mut children = Vec::new();
            let mut claimed = HashSet::new();

            if let Some(Value::Object(properties)) = spec.schema.get("properties") {
                for (child_name, fragment) in properties {
                    claimed.insert(child_name.clone());
                    children.push(build_node(BuildSpec {
                        name: child_name.clone(),
                        path: format!("{}/{}", spec.path, escape(child_name)),
                        schema_path: format!(
                            "{}/properties/{}",
                            spec.schema_path,
                            escape(child_name)
                        ),
                        schema: fragment,
                        input: seed_object.get(child_name),
                        parent: Some(node.downgrade()),
                        required: schema::is_required(spec.schema, child_name),
                        scope: None,
                        variant: None,
                        depth: spec.depth + 1,
                        root_state: None,
                    })?);
                }
            }

            for (scope, keyword) in [(BranchScope::OneOf, "oneOf"), (BranchScope::AnyOf, "anyOf")] {
                let Some(Value::Array(branches)) = spec.schema.get(keyword) else {
                    continue;
                };
                for (index, branch) in branches.iter().enumerate() {
                    let Some(Value::Object(properties)) = branch.get("properties") else {
                        continue;
                    };
                    for (child_name, fragment) in properties {
                        claimed.insert(child_name.clone());
                        children.push(build_node(BuildSpec {
                            name: child_name.clone(),
                            path: format!("{}/{}", spec.path, escape(child_name)),
                            schema_path: format!(
                                "{}/{}/{}/properties/{}",
                                spec.schema_path,
                                keyword,
                                index,
                                escape(child_name)
                            ),
                            schema: fragment,
                            input: seed_object.get(child_name),
                            parent: Some(node.downgrade()),
                            required: schema::is_required(branch, child_name),
                            scope: Some(scope),
                            variant: Some(index),
                            depth: spec.depth + 1,
                            root_state: None,
                        })?);
                    }
                }
            }

            node.adopt_children(children);
            let mut extras = Map::new();
            for (key, value) in seed_object {
                if !claimed.contains(&key) {
                    extras.insert(key, value);
                }
            }
            *node.0.extras.borrow_mut() = extras;
        }
        NodeGroup::Array => {
            let seed_items = match &seed_value {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            let mut children = Vec::new();
            for (index, item) in seed_items.iter().enumerate() {
                children.push(build_element_node(&node, index, Some(item))?);
            }
            node.adopt_children(children);
        }
        NodeGroup::Terminal => {}
    }

    Ok(node)
}

fn build_element_node(parent: &Node, index: usize, input: Option<&Value>) -> Result<Node, BuildError> {
    let items = parent
        .0
        .items_schema
        .clone()
        .ok_or_else(|| BuildError::MissingItems {
            schema_path: parent.schema_path().to_string(),
        })?;
    build_node(BuildSpec {
        name: index.to_string(),
        path: format!("{}/{}", parent.path(), index),
        schema_path: format!("{}/items", parent.schema_path()),
        schema: &items,
        input,
        parent: Some(parent.downgrade()),
        required: false,
        scope: None,
        variant: None,
        depth: parent.depth() + 1,
        root_state: None,
    })
}

/// Build one array element at runtime, wired into the live tree.
pub(crate) fn build_array_element(
    parent: &Node,
    index: usize,
    value: Option<Value>,
) -> Result<Node, BuildError> {
    let child = build_element_node(parent, index, value.as_ref())?;
    set_root_recursively(&child, parent.0.root.borrow().clone());
    if parent.initialized() {
        child.initialize();
        child.update_computed_properties_recursively();
        assemble_initial(&child);
    }
    Ok(child)
}

fn set_root_recursively(node: &Node, root: WeakNode) {
    node.set_root(root.clone());
    for child in node.children() {
        set_root_recursively(&child, root.clone());
    }
}

/// Assemble container values bottom-up, once, after construction. The
/// assembled result (child defaults included, not just the raw seed
/// slice) becomes the container's initial and default value, so a later
/// reset restores the same document the build produced.
fn assemble_initial(node: &Node) {
    for child in node.children() {
        assemble_initial(&child);
    }
    if node.group() != NodeGroup::Terminal {
        node.refresh_assembled(SetValueOption::empty());
        let assembled = node.value();
        *node.0.initial_value.borrow_mut() = assembled.clone();
        *node.0.default_value.borrow_mut() = assembled;
    }
}

/// Context values arrive schemaless; infer just enough structure to
/// navigate them with path expressions.
fn synthesize_schema(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let properties: Map<String, Value> = map
                .iter()
                .map(|(key, child)| (key.clone(), synthesize_schema(child)))
                .collect();
            json!({"type": "object", "properties": properties})
        }
        Value::Array(items) => {
            let items_schema = items.first().map(synthesize_schema).unwrap_or_else(|| json!({}));
            json!({"type": "array", "items": items_schema})
        }
        Value::String(_) => json!({"type": "string"}),
        Value::Number(_) => json!({"type": "number"}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Null => json!({}),
    }
}
