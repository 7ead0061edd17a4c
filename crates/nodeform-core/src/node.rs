//! Live nodes of a materialized schema tree.
//!
//! A [`Node`] is a cheap clone handle (`Rc`) onto shared node state.
//! Parents own their children; every back-reference (parent, root,
//! dependency listeners) is weak, so dropping the tree handle tears the
//! whole graph down without leak cycles.
//!
//! ## Value protocol
//!
//! Values flow two ways. Downward, [`Node::set_value`] with
//! [`SetValueOption::PROPAGATE`] splits a container value across the
//! children that currently belong to the selected branches. Upward,
//! every child change reassembles the parent's value from the
//! contributions of its *enabled* children (active and inside the
//! selected branch); a disabled child's slice reads as undefined
//! outside, while the node itself keeps its latest value for
//! reactivation. `None` is undefined throughout; `Value::Null` is an
//! explicit JSON null.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use nodeform_expr::truthy;
use nodeform_pointer::escape;
use nodeform_schema::{CompiledValidator, ValidationIssue};
use serde_json::{Map, Value};

use crate::compute::ComputeState;
use crate::event::{
    ComputedSnapshot, EventHub, EventPayload, NodeEvent, NodeEventType, Subscription,
};
use crate::guard::InjectionGuard;
use crate::schema::{BranchScope, NodeGroup, SchemaType};
use crate::scheduler::Scheduler;

bitflags! {
    /// How a [`Node::set_value`] call applies its input.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetValueOption: u8 {
        /// Replace the previous value instead of shallow-merging
        /// object inputs into it.
        const REPLACE      = 1 << 0;
        /// Push container slices down into the children.
        const PROPAGATE    = 1 << 1;
        /// Publish a redraw hint alongside the value event.
        const REFRESH      = 1 << 2;
        /// Marker used by reset application: activation flips observed
        /// while this write settles must not trigger another reset.
        const STABLE_RESET = 1 << 3;

        /// Full replacement, the common external write.
        const OVERWRITE = Self::REPLACE.bits() | Self::PROPAGATE.bits() | Self::REFRESH.bits();
        /// Shallow object merge.
        const MERGE = Self::PROPAGATE.bits() | Self::REFRESH.bits();
    }
}

/// How [`Node::reset`] picks the value to restore.
#[derive(Debug, Clone, Default)]
pub struct ResetOptions {
    /// Explicit value to restore; wins over every derivation.
    pub input_value: Option<Option<Value>>,
    /// Prefer the node's latest value (falling back to the preserved
    /// default, then the immutable initial value) over the initial
    /// value alone.
    pub prefer_latest: bool,
    /// With `prefer_latest`, short-circuit to the initial value when
    /// the current value still equals it.
    pub check_initial: bool,
}

// ---------------------------------------------------------------------------
// Root-only state
// ---------------------------------------------------------------------------

pub(crate) struct ValidationState {
    pub validator: Option<Box<dyn CompiledValidator>>,
    pub enabled: bool,
    /// Nodes that carried errors after the previous run, keyed by their
    /// rename-stable key, for stale clearing. Paths would go stale on
    /// rename and collide across same-named variant siblings.
    pub prev_error_nodes: BTreeMap<String, WeakNode>,
}

/// State a tree keeps exactly once, on its root node.
pub(crate) struct RootState {
    pub scheduler: Rc<Scheduler>,
    pub guard: Rc<InjectionGuard>,
    pub validation: RefCell<ValidationState>,
    /// Virtual values merged into the validated document, keyed by
    /// JSON Pointer.
    pub enhancer: RefCell<BTreeMap<String, Value>>,
    pub global_errors: RefCell<Vec<ValidationIssue>>,
    /// Truthy-state reference counts per key, aggregated over the tree.
    pub global_state: RefCell<BTreeMap<String, i64>>,
    pub context: RefCell<Option<Node>>,
    pub on_change: RefCell<Option<Rc<dyn Fn(Option<Value>)>>>,
    pub external_seq: Cell<u64>,
    pub emit_scheduled: Cell<bool>,
}

impl RootState {
    pub(crate) fn new(validator: Option<Box<dyn CompiledValidator>>, enabled: bool) -> Self {
        Self {
            scheduler: Rc::new(Scheduler::new()),
            guard: Rc::new(InjectionGuard::new()),
            validation: RefCell::new(ValidationState {
                validator,
                enabled,
                prev_error_nodes: BTreeMap::new(),
            }),
            enhancer: RefCell::new(BTreeMap::new()),
            global_errors: RefCell::new(Vec::new()),
            global_state: RefCell::new(BTreeMap::new()),
            context: RefCell::new(None),
            on_change: RefCell::new(None),
            external_seq: Cell::new(0),
            emit_scheduled: Cell::new(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

pub(crate) struct NodeInner {
    pub(crate) group: NodeGroup,
    pub(crate) schema: Value,
    pub(crate) schema_type: SchemaType,
    pub(crate) nullable: bool,
    pub(crate) required: bool,
    pub(crate) scope: Option<BranchScope>,
    pub(crate) variant: Option<usize>,
    pub(crate) depth: usize,
    pub(crate) schema_path: String,
    /// Construction-time identity, stable across renames.
    pub(crate) key: String,
    pub(crate) name: RefCell<String>,
    pub(crate) path: RefCell<String>,
    pub(crate) parent: Option<WeakNode>,
    pub(crate) root: RefCell<WeakNode>,
    pub(crate) children: RefCell<Vec<Node>>,
    /// Object keys not claimed by any child schema.
    pub(crate) extras: RefCell<Map<String, Value>>,
    /// True while the stored value (even an empty container) was set
    /// explicitly, so assembly can distinguish `{}` from undefined.
    pub(crate) container_present: Cell<bool>,
    pub(crate) value: RefCell<Option<Value>>,
    pub(crate) default_value: RefCell<Option<Value>>,
    pub(crate) initial_value: RefCell<Option<Value>>,
    pub(crate) active: Cell<bool>,
    pub(crate) visible: Cell<bool>,
    pub(crate) read_only: Cell<bool>,
    pub(crate) disabled: Cell<bool>,
    pub(crate) one_of_index: Cell<i64>,
    pub(crate) any_of_indices: RefCell<Vec<usize>>,
    pub(crate) watch_values: RefCell<Vec<Option<Value>>>,
    pub(crate) state: RefCell<Map<String, Value>>,
    pub(crate) local_errors: RefCell<Vec<ValidationIssue>>,
    pub(crate) external_errors: RefCell<BTreeMap<u64, Vec<ValidationIssue>>>,
    pub(crate) hub: Rc<EventHub>,
    pub(crate) compute: Option<ComputeState>,
    /// Items fragment for array element construction.
    pub(crate) items_schema: Option<Value>,
    pub(crate) subscriptions: RefCell<Vec<Subscription>>,
    pub(crate) initialized: Cell<bool>,
    pub(crate) alive: Cell<bool>,
    pub(crate) in_propagation: Cell<bool>,
    pub(crate) in_stable_reset: Cell<bool>,
    pub(crate) root_state: Option<RootState>,
}

/// Everything the factory decides about a node before it goes live.
pub(crate) struct NodeSeed {
    pub group: NodeGroup,
    pub schema: Value,
    pub schema_type: SchemaType,
    pub nullable: bool,
    pub required: bool,
    pub scope: Option<BranchScope>,
    pub variant: Option<usize>,
    pub depth: usize,
    pub schema_path: String,
    pub name: String,
    pub path: String,
    pub parent: Option<WeakNode>,
    pub compute: Option<ComputeState>,
    pub items_schema: Option<Value>,
    pub seed_value: Option<Value>,
    pub root_state: Option<RootState>,
}

/// A handle onto one live node. Cloning is cheap and aliases the same
/// node.
#[derive(Clone)]
pub struct Node(pub(crate) Rc<NodeInner>);

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Node {}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &*self.0.path.borrow())
            .field("schema_path", &self.0.schema_path)
            .field("group", &self.0.group)
            .finish()
    }
}

/// Weak counterpart of [`Node`], used for every back-reference.
#[derive(Clone, Default)]
pub struct WeakNode(Weak<NodeInner>);

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(Node)
    }
}

impl Node {
    pub(crate) fn from_seed(seed: NodeSeed) -> Self {
        let key = format!("{}@{}", seed.schema_path, seed.path);
        Node(Rc::new(NodeInner {
            group: seed.group,
            schema: seed.schema,
            schema_type: seed.schema_type,
            nullable: seed.nullable,
            required: seed.required,
            scope: seed.scope,
            variant: seed.variant,
            depth: seed.depth,
            schema_path: seed.schema_path,
            key,
            name: RefCell::new(seed.name),
            path: RefCell::new(seed.path),
            parent: seed.parent,
            root: RefCell::new(WeakNode::default()),
            children: RefCell::new(Vec::new()),
            extras: RefCell::new(Map::new()),
            container_present: Cell::new(seed.seed_value.is_some()),
            value: RefCell::new(seed.seed_value.clone()),
            default_value: RefCell::new(seed.seed_value.clone()),
            initial_value: RefCell::new(seed.seed_value),
            active: Cell::new(true),
            visible: Cell::new(true),
            read_only: Cell::new(false),
            disabled: Cell::new(false),
            one_of_index: Cell::new(-1),
            any_of_indices: RefCell::new(Vec::new()),
            watch_values: RefCell::new(Vec::new()),
            state: RefCell::new(Map::new()),
            local_errors: RefCell::new(Vec::new()),
            external_errors: RefCell::new(BTreeMap::new()),
            hub: EventHub::new(),
            compute: seed.compute,
            items_schema: seed.items_schema,
            subscriptions: RefCell::new(Vec::new()),
            initialized: Cell::new(false),
            alive: Cell::new(true),
            in_propagation: Cell::new(false),
            in_stable_reset: Cell::new(false),
            root_state: seed.root_state,
        }))
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode(Rc::downgrade(&self.0))
    }

    pub(crate) fn set_root(&self, root: WeakNode) {
        *self.0.root.borrow_mut() = root;
    }

    pub(crate) fn adopt_children(&self, children: Vec<Node>) {
        *self.0.children.borrow_mut() = children;
    }

    // -- identity & topology ------------------------------------------------

    pub fn group(&self) -> NodeGroup {
        self.0.group
    }

    pub fn schema_type(&self) -> SchemaType {
        self.0.schema_type
    }

    pub fn schema(&self) -> &Value {
        &self.0.schema
    }

    pub fn nullable(&self) -> bool {
        self.0.nullable
    }

    pub fn required(&self) -> bool {
        self.0.required
    }

    /// Which combinator this node's fragment sits under, if any.
    pub fn scope(&self) -> Option<BranchScope> {
        self.0.scope
    }

    /// Branch index inside the parent's combinator, if any.
    pub fn variant(&self) -> Option<usize> {
        self.0.variant
    }

    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn schema_path(&self) -> &str {
        &self.0.schema_path
    }

    /// Construction-time identity: `schemaPath@path`. Unlike
    /// [`path`](Self::path) this never changes, and unlike the path
    /// alone it distinguishes same-named fields of different branches.
    pub fn key(&self) -> &str {
        &self.0.key
    }

    pub fn name(&self) -> String {
        self.0.name.borrow().clone()
    }

    /// Current data path (empty for the root).
    pub fn path(&self) -> String {
        self.0.path.borrow().clone()
    }

    pub fn parent(&self) -> Option<Node> {
        self.0.parent.as_ref().and_then(WeakNode::upgrade)
    }

    pub fn root(&self) -> Node {
        if self.is_root() {
            return self.clone();
        }
        self.0.root.borrow().upgrade().unwrap_or_else(|| self.clone())
    }

    pub fn is_root(&self) -> bool {
        self.0.root_state.is_some()
    }

    pub fn children(&self) -> Vec<Node> {
        self.0.children.borrow().clone()
    }

    /// The tree-wide context node (`@` anchor), if one was supplied.
    pub fn context(&self) -> Option<Node> {
        let root = self.root();
        let state = root.0.root_state.as_ref()?;
        let context = state.context.borrow().clone();
        context
    }

    pub fn initialized(&self) -> bool {
        self.0.initialized.get()
    }

    pub(crate) fn scheduler(&self) -> Option<Rc<Scheduler>> {
        let root = self.root();
        let state = root.0.root_state.as_ref()?;
        Some(Rc::clone(&state.scheduler))
    }

    // -- computed properties ------------------------------------------------

    pub fn active(&self) -> bool {
        self.0.active.get()
    }

    pub fn visible(&self) -> bool {
        self.0.visible.get()
    }

    pub fn read_only(&self) -> bool {
        self.0.read_only.get()
    }

    pub fn disabled(&self) -> bool {
        self.0.disabled.get()
    }

    /// Selected `oneOf` branch of this node's combinator, `-1` for none.
    pub fn one_of_index(&self) -> i64 {
        self.0.one_of_index.get()
    }

    pub fn any_of_indices(&self) -> Vec<usize> {
        self.0.any_of_indices.borrow().clone()
    }

    pub fn watch_values(&self) -> Vec<Option<Value>> {
        self.0.watch_values.borrow().clone()
    }

    /// True when this node sits inside its parent's currently selected
    /// branch (trivially true outside combinators).
    pub fn scoped(&self) -> bool {
        let (Some(scope), Some(variant)) = (self.0.scope, self.0.variant) else {
            return true;
        };
        let Some(parent) = self.parent() else {
            return true;
        };
        match scope {
            BranchScope::OneOf => parent.one_of_index() == variant as i64,
            BranchScope::AnyOf => parent.any_of_indices().contains(&variant),
        }
    }

    /// Active, visible and scoped: the node contributes to the external
    /// value.
    pub fn enabled(&self) -> bool {
        self.0.active.get() && self.0.visible.get() && self.scoped()
    }

    fn computed_snapshot(&self) -> ComputedSnapshot {
        ComputedSnapshot {
            active: self.0.active.get(),
            visible: self.0.visible.get(),
            read_only: self.0.read_only.get(),
            disabled: self.0.disabled.get(),
            one_of_index: self.0.one_of_index.get(),
            any_of_indices: self.any_of_indices(),
            watch_values: self.watch_values(),
        }
    }

    // -- events -------------------------------------------------------------

    /// Attach a listener for this node's events. Batched publications
    /// arrive merged per micro flush; the returned handle detaches on
    /// [`Subscription::unsubscribe`] or drop.
    pub fn subscribe(&self, listener: impl Fn(&NodeEvent) + 'static) -> Subscription {
        self.0.hub.subscribe(listener)
    }

    pub(crate) fn publish(
        &self,
        event_type: NodeEventType,
        payload: Option<EventPayload>,
        options: Option<Value>,
    ) {
        match self.scheduler() {
            Some(scheduler) => self.0.hub.publish(&scheduler, event_type, payload, options),
            // A node detached from any tree still notifies, just
            // without batching.
            None => self.0.hub.publish_immediate(event_type, payload, options),
        }
    }

    // -- values -------------------------------------------------------------

    /// The node's current value; `None` is undefined.
    pub fn value(&self) -> Option<Value> {
        self.0.value.borrow().clone()
    }

    pub fn default_value(&self) -> Option<Value> {
        self.0.default_value.borrow().clone()
    }

    /// The value the node was built with; never changes.
    pub fn initial_value(&self) -> Option<Value> {
        self.0.initial_value.borrow().clone()
    }

    /// Write a value. [`SetValueOption::OVERWRITE`] replaces and
    /// propagates; [`SetValueOption::MERGE`] shallow-merges object
    /// input into the current value first.
    pub fn set_value(&self, value: Option<Value>, options: SetValueOption) {
        let value = if options.contains(SetValueOption::REPLACE) {
            value
        } else {
            merge_objects(self.value(), value)
        };
        self.apply_value(value, options);
    }

    /// Updater form of [`set_value`](Self::set_value): the closure maps
    /// the current value to the next one.
    pub fn update_value(
        &self,
        options: SetValueOption,
        updater: impl FnOnce(Option<Value>) -> Option<Value>,
    ) {
        let next = updater(self.value());
        self.set_value(next, options);
    }

    fn apply_value(&self, value: Option<Value>, options: SetValueOption) {
        match self.0.group {
            NodeGroup::Terminal => {
                let changed = {
                    let mut slot = self.0.value.borrow_mut();
                    if *slot == value {
                        false
                    } else {
                        *slot = value;
                        true
                    }
                };
                if changed {
                    self.after_value_change(options);
                }
            }
            NodeGroup::Branch => self.apply_branch_value(value, options),
            NodeGroup::Array => self.apply_array_value(value, options),
        }
    }

    fn apply_branch_value(&self, value: Option<Value>, options: SetValueOption) {
        self.0.container_present.set(value.is_some());
        let incoming = match value {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let children = self.children();
        let claimed: HashSet<String> = children.iter().map(Node::name).collect();

        if options.contains(SetValueOption::PROPAGATE) {
            self.0.in_propagation.set(true);
            for child in &children {
                if !child.scoped() {
                    continue;
                }
                match incoming.get(&child.name()) {
                    Some(slice) => child.set_value(Some(slice.clone()), options),
                    None if options.contains(SetValueOption::REPLACE) => {
                        child.set_value(None, options)
                    }
                    None => {}
                }
            }
            self.0.in_propagation.set(false);
        }

        let mut extras = if options.contains(SetValueOption::REPLACE) {
            Map::new()
        } else {
            self.0.extras.borrow().clone()
        };
        for (key, slice) in incoming {
            if !claimed.contains(&key) {
                extras.insert(key, slice);
            }
        }
        *self.0.extras.borrow_mut() = extras;

        self.refresh_assembled(options);
    }

    fn apply_array_value(&self, value: Option<Value>, options: SetValueOption) {
        self.0.container_present.set(value.is_some());
        let items: Vec<Value> = match value {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };

        let mut children = self.children();
        let mut structure_changed = false;

        if items.len() < children.len() {
            let removed = children.split_off(items.len());
            *self.0.children.borrow_mut() = children.clone();
            for child in removed {
                child.clean_up();
            }
            structure_changed = true;
        }

        self.0.in_propagation.set(true);
        if options.contains(SetValueOption::PROPAGATE) {
            for (index, child) in children.iter().enumerate() {
                child.set_value(Some(items[index].clone()), options);
            }
        }
        while children.len() < items.len() {
            let index = children.len();
            match crate::tree::build_array_element(self, index, Some(items[index].clone())) {
                Ok(child) => {
                    self.0.children.borrow_mut().push(child.clone());
                    children.push(child);
                    structure_changed = true;
                }
                Err(error) => {
                    tracing::warn!(
                        path = %self.path(),
                        index,
                        %error,
                        "skipping array element the schema cannot describe"
                    );
                    break;
                }
            }
        }
        self.0.in_propagation.set(false);

        if structure_changed {
            self.publish(NodeEventType::UPDATE_CHILDREN, None, None);
        }
        self.refresh_assembled(options);
    }

    /// Reassemble a container value from child contributions (and
    /// stored extras) and bubble if it changed.
    pub(crate) fn refresh_assembled(&self, options: SetValueOption) {
        let assembled = self.assemble();
        let changed = {
            let mut slot = self.0.value.borrow_mut();
            if *slot == assembled {
                false
            } else {
                *slot = assembled;
                true
            }
        };
        if changed {
            self.after_value_change(options);
        }
    }

    fn assemble(&self) -> Option<Value> {
        match self.0.group {
            NodeGroup::Terminal => self.value(),
            NodeGroup::Branch => {
                let mut map = self.0.extras.borrow().clone();
                for child in self.children() {
                    if !child.enabled() {
                        continue;
                    }
                    if let Some(value) = child.value() {
                        map.insert(child.name(), value);
                    }
                }
                if map.is_empty() && !self.0.container_present.get() {
                    None
                } else {
                    Some(Value::Object(map))
                }
            }
            NodeGroup::Array => {
                let children = self.children();
                if children.is_empty() && !self.0.container_present.get() {
                    return None;
                }
                // Arrays are positional: a hole stays null.
                Some(Value::Array(
                    children
                        .iter()
                        .map(|child| {
                            if child.enabled() {
                                child.value().unwrap_or(Value::Null)
                            } else {
                                Value::Null
                            }
                        })
                        .collect(),
                ))
            }
        }
    }

    fn after_value_change(&self, options: SetValueOption) {
        let current = self.value();
        self.publish(
            NodeEventType::UPDATE_VALUE,
            Some(EventPayload::Value(current)),
            None,
        );
        if options.contains(SetValueOption::REFRESH) {
            self.publish(NodeEventType::REFRESH, None, None);
        }
        match self.parent() {
            Some(parent) => parent.child_value_changed(options),
            None if self.is_root() => self.schedule_root_emit(),
            None => {}
        }
    }

    pub(crate) fn child_value_changed(&self, options: SetValueOption) {
        // During a downward propagation the parent reassembles once, at
        // the end, not per child.
        if self.0.in_propagation.get() {
            return;
        }
        self.refresh_assembled(options.difference(SetValueOption::PROPAGATE));
    }

    /// Queue the tree-level change emission (and revalidation, when
    /// enabled) on the micro tier. Multiple same-tick changes collapse
    /// into one emission.
    fn schedule_root_emit(&self) {
        let Some(state) = self.0.root_state.as_ref() else {
            return;
        };
        if state.emit_scheduled.replace(true) {
            return;
        }
        let weak = self.downgrade();
        state.scheduler.enqueue_micro(Box::new(move || {
            let Some(root) = weak.upgrade() else { return };
            let Some(state) = root.0.root_state.as_ref() else {
                return;
            };
            state.emit_scheduled.set(false);
            let callback = state.on_change.borrow().clone();
            if let Some(callback) = callback {
                callback(root.value());
            }
            let enabled = state.validation.borrow().enabled;
            if enabled {
                root.validate();
            }
        }));
    }

    /// Wire the scheduler's abandonment path back to this root, so a
    /// capped drain leaves the tree able to schedule new work.
    pub(crate) fn install_abandon_hook(&self) {
        let Some(state) = self.0.root_state.as_ref() else {
            return;
        };
        let weak = self.downgrade();
        state.scheduler.set_abandon_hook(move || {
            if let Some(root) = weak.upgrade() {
                root.reset_schedule_latches();
            }
        });
    }

    /// Clear every "already scheduled" latch in the tree after the
    /// scheduler dropped the tasks that were going to clear them.
    fn reset_schedule_latches(&self) {
        if let Some(state) = self.0.root_state.as_ref() {
            state.emit_scheduled.set(false);
            state.guard.reset_clear_latch();
        }
        self.0.hub.reset_flush_latch();
        for child in self.children() {
            child.reset_schedule_latches();
        }
    }

    /// Install the tree-level change callback (root only). Replaces any
    /// previous callback.
    pub fn set_on_change(&self, callback: impl Fn(Option<Value>) + 'static) {
        if let Some(state) = self.0.root_state.as_ref() {
            *state.on_change.borrow_mut() = Some(Rc::new(callback));
        }
    }

    // -- reset --------------------------------------------------------------

    /// Restore the node to a default value.
    ///
    /// Resolution order: explicit `input_value`; with `prefer_latest`
    /// the current value, then the preserved default, then the initial
    /// value; otherwise the initial value. An active `derive` rule
    /// recomputes the default. While inactive, the applied value is
    /// undefined and the resolved default is preserved for
    /// reactivation.
    pub fn reset(&self, options: ResetOptions) {
        let mut default = match options.input_value {
            Some(value) => value,
            None if options.prefer_latest => {
                let current = self.value();
                let initial = self.initial_value();
                if options.check_initial && current == initial {
                    initial
                } else {
                    current.or_else(|| self.default_value()).or(initial)
                }
            }
            None => self.initial_value(),
        };

        if self.active() {
            if let Some(compute) = &self.0.compute {
                if let Some(derive) = compute.rules.derive.as_ref() {
                    let slots = compute.slots.borrow().clone();
                    default = derive.evaluate(&slots);
                }
            }
        }

        *self.0.default_value.borrow_mut() = default.clone();
        let target = if self.active() { default } else { None };

        self.0.in_stable_reset.set(true);
        self.set_value(
            target,
            SetValueOption::OVERWRITE | SetValueOption::STABLE_RESET,
        );
        self.0.in_stable_reset.set(false);
    }

    // -- computed-property recomputation ------------------------------------

    /// Re-evaluate every computed rule against the current dependency
    /// slots. With `allow_reset`, an activation flip additionally runs
    /// the reset protocol.
    pub fn update_computed_properties(&self, allow_reset: bool) {
        let Some(compute) = &self.0.compute else { return };
        let rules = Rc::clone(&compute.rules);
        let slots = compute.slots.borrow().clone();

        let was_active = self.0.active.get();
        let was_visible = self.0.visible.get();
        let active = rules
            .active
            .as_ref()
            .map_or(true, |rule| rule.evaluate_bool(&slots));
        let visible = rules
            .visible
            .as_ref()
            .map_or(true, |rule| rule.evaluate_bool(&slots));
        let read_only = rules
            .read_only
            .as_ref()
            .map_or(false, |rule| rule.evaluate_bool(&slots));
        let disabled = rules
            .disabled
            .as_ref()
            .map_or(false, |rule| rule.evaluate_bool(&slots));

        let prev_one_of = self.0.one_of_index.get();
        let one_of = if rules.one_of.is_some() || !rules.one_of_selectors.is_empty() {
            rules.select_one_of(&slots)
        } else {
            prev_one_of
        };
        let prev_any_of = self.any_of_indices();
        let any_of = if rules.any_of_selectors.is_empty() {
            prev_any_of.clone()
        } else {
            rules.select_any_of(&slots)
        };
        let prev_watches = self.watch_values();
        let watches: Vec<Option<Value>> = rules
            .watch_slots
            .iter()
            .map(|&slot| slots.get(slot).cloned().flatten())
            .collect();

        let changed = was_active != active
            || self.0.visible.get() != visible
            || self.0.read_only.get() != read_only
            || self.0.disabled.get() != disabled
            || prev_one_of != one_of
            || prev_any_of != any_of
            || prev_watches != watches;

        self.0.active.set(active);
        self.0.visible.set(visible);
        self.0.read_only.set(read_only);
        self.0.disabled.set(disabled);
        self.0.one_of_index.set(one_of);
        *self.0.any_of_indices.borrow_mut() = any_of.clone();
        *self.0.watch_values.borrow_mut() = watches;

        if changed {
            self.publish(
                NodeEventType::UPDATE_COMPUTED_PROPERTY,
                Some(EventPayload::Computed(self.computed_snapshot())),
                None,
            );
        }
        if active && !was_active {
            self.publish(NodeEventType::ACTIVATED, None, None);
        }

        if prev_one_of != one_of || prev_any_of != any_of {
            self.branch_selection_changed();
        }

        if active != was_active {
            if allow_reset && !self.0.in_stable_reset.get() {
                self.reset(ResetOptions {
                    input_value: None,
                    prefer_latest: true,
                    check_initial: true,
                });
            } else {
                // Enabled flipped without a reset: the parent's
                // assembly changes even though this value did not.
                self.reassemble_after_gating_change();
            }
        } else if visible != was_visible {
            // Visibility gates contribution, not retention, so a
            // visible flip reassembles without the reset protocol.
            self.reassemble_after_gating_change();
        }

        if active {
            if let Some(derive) = rules.derive.as_ref() {
                let derived = derive.evaluate(&slots);
                if derived != self.value() {
                    self.set_value(
                        derived,
                        SetValueOption::OVERWRITE | SetValueOption::STABLE_RESET,
                    );
                }
            }
            if let Some(pristine) = rules.pristine.as_ref() {
                let now = pristine.evaluate_bool(&slots);
                if now && !compute.prev_pristine.get() {
                    self.reset(ResetOptions::default());
                }
                compute.prev_pristine.set(now);
            }
        }
    }

    fn reassemble_after_gating_change(&self) {
        match self.parent() {
            Some(parent) => parent.child_value_changed(SetValueOption::REFRESH),
            None if self.is_root() => self.schedule_root_emit(),
            None => {}
        }
    }

    /// Recompute this node and every descendant, inactive subtrees
    /// included. Used after construction and bulk writes.
    pub fn update_computed_properties_recursively(&self) {
        self.update_computed_properties(false);
        for child in self.children() {
            child.update_computed_properties_recursively();
        }
    }

    fn branch_selection_changed(&self) {
        // Newly scoped variant children come back with their preserved
        // or derived defaults; the rest simply stop contributing.
        for child in self.children() {
            if child.0.scope.is_some() && child.scoped() {
                child.reset(ResetOptions {
                    input_value: None,
                    prefer_latest: true,
                    check_initial: true,
                });
            }
        }
        self.refresh_assembled(SetValueOption::REFRESH);
    }

    // -- initialization & teardown ------------------------------------------

    /// Wire dependency subscriptions and injection triggers, bottom-up.
    /// Runs once; repeated calls are no-ops.
    pub fn initialize(&self) {
        if self.0.initialized.replace(true) {
            return;
        }
        for child in self.children() {
            child.initialize();
        }
        self.wire_dependencies();
        self.wire_injections();
        self.0.hub.publish_immediate(NodeEventType::INITIALIZED, None, None);
    }

    fn wire_dependencies(&self) {
        let Some(compute) = &self.0.compute else { return };
        let paths: Vec<String> = compute.rules.table.paths().to_vec();
        for (slot, path) in paths.iter().enumerate() {
            let Some(target) = self.find(path) else {
                tracing::debug!(
                    node = %self.path(),
                    dependency = %path,
                    "dependency path did not resolve, slot stays undefined"
                );
                continue;
            };
            compute.slots.borrow_mut()[slot] = target.value();

            let weak = self.downgrade();
            let subscription = target.subscribe(move |event| {
                if !event.contains(NodeEventType::UPDATE_VALUE) {
                    return;
                }
                let Some(node) = weak.upgrade() else { return };
                if let Some(EventPayload::Value(value)) =
                    event.payload(NodeEventType::UPDATE_VALUE)
                {
                    if let Some(compute) = &node.0.compute {
                        if let Some(slot_ref) = compute.slots.borrow_mut().get_mut(slot) {
                            *slot_ref = value.clone();
                        }
                    }
                    node.update_computed_properties(true);
                }
            });
            self.0.subscriptions.borrow_mut().push(subscription);
        }
    }

    fn wire_injections(&self) {
        let Some(compute) = &self.0.compute else { return };
        if compute.rules.injections.is_empty() {
            return;
        }
        let weak = self.downgrade();
        let subscription = self.subscribe(move |event| {
            if !event.contains(NodeEventType::UPDATE_VALUE) {
                return;
            }
            if let Some(node) = weak.upgrade() {
                node.run_injections();
            }
        });
        self.0.subscriptions.borrow_mut().push(subscription);
    }

    fn run_injections(&self) {
        let Some(compute) = &self.0.compute else { return };
        let rules = Rc::clone(&compute.rules);
        let slots = compute.slots.borrow().clone();
        let root = self.root();
        let Some(state) = root.0.root_state.as_ref() else {
            return;
        };

        for injection in &rules.injections {
            let Some(target) = self.find(&injection.target) else {
                tracing::debug!(
                    source = %self.path(),
                    target = %injection.target,
                    "injection target did not resolve"
                );
                continue;
            };
            let target_path = target.path();
            if !state.guard.add(&target_path) {
                tracing::debug!(
                    source = %self.path(),
                    target = %target_path,
                    "injection suppressed, target already in flight"
                );
                continue;
            }
            state.guard.schedule_clear(&state.scheduler);
            target.set_value(injection.expr.evaluate(&slots), SetValueOption::OVERWRITE);
        }
    }

    /// Detach every subscription this subtree holds and drop its
    /// listeners. Idempotent; the node stops publishing afterwards.
    pub fn clean_up(&self) {
        if !self.0.alive.replace(false) {
            return;
        }
        for child in self.children() {
            child.clean_up();
        }
        self.0.subscriptions.borrow_mut().clear();
        self.0.hub.clear_listeners();
    }

    pub fn alive(&self) -> bool {
        self.0.alive.get()
    }

    // -- renaming -----------------------------------------------------------

    /// Rename this node. Every descendant's path is recomputed before
    /// any path event goes out, so listeners never observe a half-moved
    /// subtree; each affected node then gets exactly one path event.
    pub fn rename(&self, name: &str) {
        if *self.0.name.borrow() == name {
            return;
        }
        *self.0.name.borrow_mut() = name.to_string();
        let mut renamed = Vec::new();
        self.recompute_paths(&mut renamed);
        for (node, previous, current) in renamed {
            node.publish(
                NodeEventType::UPDATE_PATH,
                Some(EventPayload::Path { previous, current }),
                None,
            );
        }
    }

    fn recompute_paths(&self, renamed: &mut Vec<(Node, String, String)>) {
        let current = match self.parent() {
            Some(parent) => format!("{}/{}", parent.path(), escape(&self.name())),
            None => String::new(),
        };
        let previous = self.0.path.replace(current.clone());
        if previous == current {
            return;
        }
        renamed.push((self.clone(), previous, current));
        for child in self.children() {
            child.recompute_paths(renamed);
        }
    }

    // -- errors -------------------------------------------------------------

    /// Replace this node's own validation errors.
    pub fn set_errors(&self, issues: Vec<ValidationIssue>) {
        let changed = {
            let mut slot = self.0.local_errors.borrow_mut();
            if *slot == issues {
                false
            } else {
                *slot = issues;
                true
            }
        };
        if changed {
            self.publish_errors();
        }
    }

    /// Own validation errors merged with every live external batch.
    pub fn errors(&self) -> Vec<ValidationIssue> {
        let mut merged = self.0.local_errors.borrow().clone();
        for batch in self.0.external_errors.borrow().values() {
            merged.extend(batch.iter().cloned());
        }
        merged
    }

    /// Attach an external error batch (server-side validation and the
    /// like). The returned key removes exactly this batch later.
    pub fn set_external_errors(&self, issues: Vec<ValidationIssue>) -> u64 {
        let key = self.next_external_key();
        self.0.external_errors.borrow_mut().insert(key, issues);
        self.publish_external_change();
        key
    }

    /// Remove the batch added under `key`. Returns false when the key
    /// is unknown (or already removed).
    pub fn remove_external_errors(&self, key: u64) -> bool {
        let removed = self.0.external_errors.borrow_mut().remove(&key).is_some();
        if removed {
            self.publish_external_change();
        }
        removed
    }

    pub fn clear_external_errors(&self) {
        let had_any = {
            let mut slot = self.0.external_errors.borrow_mut();
            let had_any = !slot.is_empty();
            slot.clear();
            had_any
        };
        if had_any {
            self.publish_external_change();
        }
    }

    fn next_external_key(&self) -> u64 {
        let root = self.root();
        match root.0.root_state.as_ref() {
            Some(state) => {
                let key = state.external_seq.get() + 1;
                state.external_seq.set(key);
                key
            }
            // Detached nodes fall back to a local monotonic key built
            // from what they already hold.
            None => {
                self.0
                    .external_errors
                    .borrow()
                    .keys()
                    .next_back()
                    .copied()
                    .unwrap_or(0)
                    + 1
            }
        }
    }

    /// An external batch on the root also feeds the merged global list.
    fn publish_external_change(&self) {
        self.publish_errors();
        if self.is_root() {
            self.publish(
                NodeEventType::UPDATE_GLOBAL_ERROR,
                Some(EventPayload::Errors(self.merged_global_errors())),
                None,
            );
        }
    }

    fn publish_errors(&self) {
        self.publish(
            NodeEventType::UPDATE_ERROR,
            Some(EventPayload::Errors(self.errors())),
            None,
        );
    }

    // -- per-node state -----------------------------------------------------

    /// Set one state entry. Truthy entries are reference-counted into
    /// the root's global state under the same key.
    pub fn set_state(&self, key: &str, value: Value) {
        let was_truthy = truthy(self.0.state.borrow().get(key));
        let is_truthy = truthy(Some(&value));
        self.0.state.borrow_mut().insert(key.to_string(), value);
        self.publish_state();
        if was_truthy != is_truthy {
            self.bump_global_state(key, if is_truthy { 1 } else { -1 });
        }
    }

    /// Remove one state entry.
    pub fn clear_state(&self, key: &str) {
        let removed = self.0.state.borrow_mut().remove(key);
        let Some(removed) = removed else { return };
        self.publish_state();
        if truthy(Some(&removed)) {
            self.bump_global_state(key, -1);
        }
    }

    pub fn state(&self) -> Map<String, Value> {
        self.0.state.borrow().clone()
    }

    /// Tree-wide aggregate: a key is set when any node holds it truthy.
    pub fn global_state(&self) -> Map<String, Value> {
        let root = self.root();
        let Some(state) = root.0.root_state.as_ref() else {
            return Map::new();
        };
        let counts = state.global_state.borrow();
        counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(key, _)| (key.clone(), Value::Bool(true)))
            .collect()
    }

    fn publish_state(&self) {
        self.publish(
            NodeEventType::UPDATE_STATE,
            Some(EventPayload::State(self.state())),
            None,
        );
    }

    fn bump_global_state(&self, key: &str, delta: i64) {
        let root = self.root();
        let Some(state) = root.0.root_state.as_ref() else {
            return;
        };
        {
            let mut counts = state.global_state.borrow_mut();
            let count = counts.entry(key.to_string()).or_insert(0);
            *count += delta;
            if *count <= 0 {
                counts.remove(key);
            }
        }
        root.publish(
            NodeEventType::UPDATE_STATE,
            Some(EventPayload::State(root.global_state())),
            None,
        );
    }
}

/// Shallow merge for the [`SetValueOption::MERGE`] write path: object
/// into object merges keys, anything else replaces.
fn merge_objects(current: Option<Value>, incoming: Option<Value>) -> Option<Value> {
    match (current, incoming) {
        (Some(Value::Object(mut base)), Some(Value::Object(overlay))) => {
            for (key, value) in overlay {
                base.insert(key, value);
            }
            Some(Value::Object(base))
        }
        (_, incoming) => incoming,
    }
}
