//! Per-node event publication.
//!
//! Every node owns an [`EventHub`]. Publications come in two delivery
//! classes:
//!
//! - **batched** (the default): merged into one pending record and
//!   flushed on the micro tier, so N same-tick publications reach each
//!   listener as one event whose type set is the OR of the batch and
//!   whose per-type payload is the latest of that type;
//! - **immediate**: dispatched synchronously, used where ordering
//!   against the current mutation matters (value changes feeding
//!   dependency slots, the one-shot initialization signal).
//!
//! Listeners receive a read-only [`NodeEvent`] snapshot. Subscribing
//! returns a [`Subscription`]; dropping it or calling
//! [`Subscription::unsubscribe`] detaches the listener, and doing either
//! twice is a no-op.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use nodeform_schema::ValidationIssue;
use serde_json::{Map, Value};

use crate::scheduler::Scheduler;

bitflags! {
    /// Event classes a node publishes. A batched flush carries the OR of
    /// everything published since the previous flush.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeEventType: u32 {
        /// One-shot: the node finished wiring its dependencies.
        const INITIALIZED               = 1 << 0;
        /// The node's value changed.
        const UPDATE_VALUE              = 1 << 1;
        /// The node was renamed; its path (and every descendant's)
        /// changed.
        const UPDATE_PATH               = 1 << 2;
        /// The node's child list changed (array growth/shrink).
        const UPDATE_CHILDREN           = 1 << 3;
        /// Arbitrary UI state attached to the node changed.
        const UPDATE_STATE              = 1 << 4;
        /// The node's own validation errors changed.
        const UPDATE_ERROR              = 1 << 5;
        /// The root's aggregated error list changed (root only).
        const UPDATE_GLOBAL_ERROR      = 1 << 6;
        /// One of the computed properties (active, visible, readOnly,
        /// disabled, branch selection, watch values) changed.
        const UPDATE_COMPUTED_PROPERTY  = 1 << 7;
        /// A redraw hint with no structural payload.
        const REFRESH                   = 1 << 8;
        /// The node transitioned from inactive to active.
        const ACTIVATED                 = 1 << 9;
    }
}

/// Snapshot of every computed property, attached to
/// [`NodeEventType::UPDATE_COMPUTED_PROPERTY`] publications.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedSnapshot {
    pub active: bool,
    pub visible: bool,
    pub read_only: bool,
    pub disabled: bool,
    /// Selected `oneOf` branch, `-1` when none matches.
    pub one_of_index: i64,
    /// Selected `anyOf` branches.
    pub any_of_indices: Vec<usize>,
    /// Watched dependency values, in declaration order.
    pub watch_values: Vec<Option<Value>>,
}

/// Typed payload of one publication.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Current value after an `UPDATE_VALUE` (`None` is undefined).
    Value(Option<Value>),
    /// Previous and current path after an `UPDATE_PATH`.
    Path { previous: String, current: String },
    /// Merged error list after an `UPDATE_ERROR` / `UPDATE_GLOBAL_ERROR`.
    Errors(Vec<ValidationIssue>),
    /// Full state map after an `UPDATE_STATE`.
    State(Map<String, Value>),
    /// Computed properties after an `UPDATE_COMPUTED_PROPERTY`.
    Computed(ComputedSnapshot),
}

#[derive(Debug, Clone)]
struct EventEntry {
    event_type: NodeEventType,
    payload: Option<EventPayload>,
    options: Option<Value>,
}

/// The merged record a listener receives.
///
/// `types()` is the OR of every publication in the batch; per-type
/// payload and options hold the latest publication of that type.
#[derive(Debug, Clone, Default)]
pub struct NodeEvent {
    types: NodeEventType,
    entries: Vec<EventEntry>,
}

impl NodeEvent {
    /// OR of every event type in this record.
    pub fn types(&self) -> NodeEventType {
        self.types
    }

    /// True when the record includes `event_type`.
    pub fn contains(&self, event_type: NodeEventType) -> bool {
        self.types.intersects(event_type)
    }

    /// Latest payload published under exactly `event_type`.
    pub fn payload(&self, event_type: NodeEventType) -> Option<&EventPayload> {
        self.entries
            .iter()
            .find(|e| e.event_type == event_type)
            .and_then(|e| e.payload.as_ref())
    }

    /// Latest options published under exactly `event_type`.
    pub fn options(&self, event_type: NodeEventType) -> Option<&Value> {
        self.entries
            .iter()
            .find(|e| e.event_type == event_type)
            .and_then(|e| e.options.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn merge(&mut self, event_type: NodeEventType, payload: Option<EventPayload>, options: Option<Value>) {
        self.types |= event_type;
        let entry = EventEntry {
            event_type,
            payload,
            options,
        };
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|e| e.event_type == event_type)
        {
            *slot = entry;
        } else {
            self.entries.push(entry);
        }
    }

    fn single(event_type: NodeEventType, payload: Option<EventPayload>, options: Option<Value>) -> Self {
        let mut event = Self::default();
        event.merge(event_type, payload, options);
        event
    }
}

struct Listener {
    id: u64,
    callback: Rc<dyn Fn(&NodeEvent)>,
}

/// Handle returned by [`EventHub::subscribe`]. Detaches the listener on
/// [`unsubscribe`](Self::unsubscribe) or drop, idempotently.
pub struct Subscription {
    hub: Weak<EventHub>,
    id: u64,
    detached: Cell<bool>,
}

impl Subscription {
    /// Detach the listener. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if self.detached.replace(true) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.listeners.borrow_mut().retain(|l| l.id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// One node's listener registry plus its pending batched record.
#[derive(Default)]
pub(crate) struct EventHub {
    listeners: RefCell<Vec<Listener>>,
    next_id: Cell<u64>,
    pending: RefCell<NodeEvent>,
    flush_scheduled: Cell<bool>,
}

impl EventHub {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn subscribe(self: &Rc<Self>, listener: impl Fn(&NodeEvent) + 'static) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push(Listener {
            id,
            callback: Rc::new(listener),
        });
        Subscription {
            hub: Rc::downgrade(self),
            id,
            detached: Cell::new(false),
        }
    }

    /// Merge a publication into the pending record and make sure a micro
    /// flush is queued.
    pub(crate) fn publish(
        self: &Rc<Self>,
        scheduler: &Scheduler,
        event_type: NodeEventType,
        payload: Option<EventPayload>,
        options: Option<Value>,
    ) {
        self.pending.borrow_mut().merge(event_type, payload, options);
        if self.flush_scheduled.replace(true) {
            return;
        }
        let hub = Rc::downgrade(self);
        scheduler.enqueue_micro(Box::new(move || {
            if let Some(hub) = hub.upgrade() {
                hub.flush();
            }
        }));
    }

    /// Dispatch a single-type record synchronously, bypassing the batch.
    pub(crate) fn publish_immediate(
        &self,
        event_type: NodeEventType,
        payload: Option<EventPayload>,
        options: Option<Value>,
    ) {
        self.dispatch(&NodeEvent::single(event_type, payload, options));
    }

    /// Dispatch whatever has accumulated. Usually driven by the
    /// scheduled micro task; callers may force it to observe batched
    /// events synchronously.
    pub(crate) fn flush(&self) {
        self.flush_scheduled.set(false);
        let event = std::mem::take(&mut *self.pending.borrow_mut());
        if !event.is_empty() {
            self.dispatch(&event);
        }
    }

    /// Forget a scheduled flush whose micro task was dropped. Whatever
    /// is pending stays pending; the next publication queues a fresh
    /// flush that carries it along.
    pub(crate) fn reset_flush_latch(&self) {
        self.flush_scheduled.set(false);
    }

    pub(crate) fn clear_listeners(&self) {
        self.listeners.borrow_mut().clear();
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    fn dispatch(&self, event: &NodeEvent) {
        // Snapshot so listeners may subscribe/unsubscribe mid-dispatch.
        let callbacks: Vec<Rc<dyn Fn(&NodeEvent)>> = self
            .listeners
            .borrow()
            .iter()
            .map(|l| Rc::clone(&l.callback))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batched_publications_coalesce_into_one_event() {
        let scheduler = Scheduler::new();
        let hub = EventHub::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = Rc::clone(&seen);
        let _sub = hub.subscribe(move |e| s.borrow_mut().push(e.clone()));

        hub.publish(
            &scheduler,
            NodeEventType::UPDATE_VALUE,
            Some(EventPayload::Value(Some(json!(1)))),
            None,
        );
        hub.publish(&scheduler, NodeEventType::REFRESH, None, None);
        hub.publish(
            &scheduler,
            NodeEventType::UPDATE_VALUE,
            Some(EventPayload::Value(Some(json!(2)))),
            None,
        );

        assert!(seen.borrow().is_empty(), "nothing dispatched before flush");
        scheduler.run_until_idle();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1, "three publications, one event");
        assert_eq!(
            seen[0].types(),
            NodeEventType::UPDATE_VALUE | NodeEventType::REFRESH
        );
        // Latest payload of the repeated type wins.
        assert_eq!(
            seen[0].payload(NodeEventType::UPDATE_VALUE),
            Some(&EventPayload::Value(Some(json!(2))))
        );
    }

    #[test]
    fn test_immediate_dispatch_is_synchronous() {
        let hub = EventHub::new();
        let seen = Rc::new(Cell::new(0));

        let s = Rc::clone(&seen);
        let _sub = hub.subscribe(move |e| {
            assert!(e.contains(NodeEventType::INITIALIZED));
            s.set(s.get() + 1);
        });

        hub.publish_immediate(NodeEventType::INITIALIZED, None, None);
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let scheduler = Scheduler::new();
        let hub = EventHub::new();
        let seen = Rc::new(Cell::new(0));

        let s = Rc::clone(&seen);
        let sub = hub.subscribe(move |_| s.set(s.get() + 1));
        assert_eq!(hub.listener_count(), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(hub.listener_count(), 0);

        hub.publish(&scheduler, NodeEventType::REFRESH, None, None);
        scheduler.run_until_idle();
        assert_eq!(seen.get(), 0);
    }

    #[test]
    fn test_drop_detaches_listener() {
        let hub = EventHub::new();
        {
            let _sub = hub.subscribe(|_| {});
            assert_eq!(hub.listener_count(), 1);
        }
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn test_separate_flushes_stay_separate() {
        let scheduler = Scheduler::new();
        let hub = EventHub::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = Rc::clone(&seen);
        let _sub = hub.subscribe(move |e| s.borrow_mut().push(e.types()));

        hub.publish(&scheduler, NodeEventType::UPDATE_VALUE, None, None);
        scheduler.run_until_idle();
        hub.publish(&scheduler, NodeEventType::UPDATE_ERROR, None, None);
        scheduler.run_until_idle();

        assert_eq!(
            *seen.borrow(),
            vec![NodeEventType::UPDATE_VALUE, NodeEventType::UPDATE_ERROR]
        );
    }

    #[test]
    fn test_unsubscribe_during_dispatch_does_not_skip_snapshot() {
        let hub = EventHub::new();
        let calls = Rc::new(Cell::new(0));

        let sub_slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let c = Rc::clone(&calls);
        let slot = Rc::clone(&sub_slot);
        let first = hub.subscribe(move |_| {
            c.set(c.get() + 1);
            // Detach the other listener mid-dispatch; the snapshot for
            // this dispatch still includes it.
            if let Some(sub) = slot.borrow().as_ref() {
                sub.unsubscribe();
            }
        });
        let c = Rc::clone(&calls);
        *sub_slot.borrow_mut() = Some(hub.subscribe(move |_| c.set(c.get() + 1)));

        hub.publish_immediate(NodeEventType::REFRESH, None, None);
        assert_eq!(calls.get(), 2);

        hub.publish_immediate(NodeEventType::REFRESH, None, None);
        assert_eq!(calls.get(), 3, "second dispatch reaches only the survivor");
        drop(first);
    }
}
