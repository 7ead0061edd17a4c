//! In-flight injection tracking.
//!
//! Injection rules write values into other nodes when their source
//! changes. Two nodes injecting into each other would ping-pong forever,
//! so every injection marks its target path in-flight before writing and
//! is suppressed when the target is already marked. The set is cleared
//! on the macro tier, after the whole cascade (including every micro
//! flush it produced) has settled.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use crate::scheduler::Scheduler;

/// Tracks injection target paths for one tree.
#[derive(Default)]
pub struct InjectionGuard {
    in_flight: RefCell<HashSet<String>>,
    clear_scheduled: Cell<bool>,
}

impl InjectionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` in-flight. Returns false when it already was, in
    /// which case the caller must suppress its write.
    pub fn add(&self, path: &str) -> bool {
        self.in_flight.borrow_mut().insert(path.to_string())
    }

    /// True when `path` is currently marked.
    pub fn has(&self, path: &str) -> bool {
        self.in_flight.borrow().contains(path)
    }

    /// Unmark `path` early. Normally the macro-tier clear handles this;
    /// explicit removal exists for hosts that drive injections manually.
    pub fn remove(&self, path: &str) {
        self.in_flight.borrow_mut().remove(path);
    }

    /// Drop every mark immediately.
    pub fn clear(&self) {
        self.in_flight.borrow_mut().clear();
    }

    /// Number of paths currently marked.
    pub fn len(&self) -> usize {
        self.in_flight.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.borrow().is_empty()
    }

    /// Forget a scheduled clear whose macro task was dropped, and empty
    /// the set it was going to clear, so later injections are not
    /// suppressed against marks from an abandoned cascade.
    pub(crate) fn reset_clear_latch(&self) {
        self.clear_scheduled.set(false);
        self.clear();
    }

    /// Schedule a clear on the macro tier. Repeated calls before the
    /// clear runs collapse into one task, so every injection fired
    /// within a single cascade shares one in-flight window.
    pub fn schedule_clear(self: &Rc<Self>, scheduler: &Scheduler) {
        if self.clear_scheduled.get() {
            return;
        }
        self.clear_scheduled.set(true);
        let guard = Rc::clone(self);
        scheduler.enqueue_macro(Box::new(move || {
            guard.clear_scheduled.set(false);
            if !guard.is_empty() {
                tracing::trace!(paths = guard.len(), "clearing in-flight injection paths");
            }
            guard.clear();
        }));
    }
}
