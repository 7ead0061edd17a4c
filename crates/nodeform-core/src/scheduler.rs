//! Two-tier cooperative task scheduler.
//!
//! A tree owns one scheduler. Work enqueued on the *micro* tier is the
//! fine-grained follow-up of the current mutation: coalesced event
//! flushes and root value emission. The *macro* tier is the coarser
//! boundary that outlives a whole cascade: injection-guard clearing runs
//! there, so every injection triggered anywhere inside one cascade sees
//! the same in-flight set.
//!
//! There is no background thread. The embedding host drives the
//! scheduler by calling [`Scheduler::run_until_idle`] after mutating the
//! tree, which drains micro tasks, then macro tasks, then any micro
//! tasks those produced, until both queues are empty.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

type Task = Box<dyn FnOnce()>;

/// Upper bound on macro rounds per drain. A rule set whose derived
/// writes never settle would otherwise spin forever; hitting the cap is
/// logged and the drain stops with work still queued.
pub const MAX_FLUSH_ROUNDS: usize = 1024;

/// Upper bound on micro tasks per drain, for cycles that never reach
/// the macro tier (mutually derived values re-queueing each other).
const MAX_MICRO_TASKS: usize = MAX_FLUSH_ROUNDS * 64;

/// Single-threaded task queues for one tree.
#[derive(Default)]
pub struct Scheduler {
    micro: RefCell<VecDeque<Task>>,
    macros: RefCell<VecDeque<Task>>,
    draining: Cell<bool>,
    abandon_hook: RefCell<Option<Rc<dyn Fn()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue on the micro tier (runs before any pending macro task).
    pub fn enqueue_micro(&self, task: Task) {
        self.micro.borrow_mut().push_back(task);
    }

    /// Enqueue on the macro tier (runs after the micro tier settles).
    pub fn enqueue_macro(&self, task: Task) {
        self.macros.borrow_mut().push_back(task);
    }

    /// True when either tier has queued work.
    pub fn has_pending(&self) -> bool {
        !self.micro.borrow().is_empty() || !self.macros.borrow().is_empty()
    }

    /// Install the callback run after a capped drain abandons its
    /// queues. Dropped tasks never run, so the owner must reset every
    /// "already scheduled" latch those tasks were going to clear.
    pub fn set_abandon_hook(&self, hook: impl Fn() + 'static) {
        *self.abandon_hook.borrow_mut() = Some(Rc::new(hook));
    }

    /// Drain both tiers. Micro tasks always run to exhaustion before the
    /// next macro task; each macro task opens a new round. Re-entrant
    /// calls return immediately, leaving the outer drain in control.
    pub fn run_until_idle(&self) {
        if self.draining.get() {
            return;
        }
        self.draining.set(true);

        let mut rounds = 0usize;
        let mut micro_tasks = 0usize;
        loop {
            while let Some(task) = self.pop_micro() {
                task();
                micro_tasks += 1;
                if micro_tasks >= MAX_MICRO_TASKS {
                    break;
                }
            }
            if micro_tasks >= MAX_MICRO_TASKS {
                tracing::warn!(
                    micro_tasks,
                    "micro tier did not settle, abandoning queued work"
                );
                self.abandon();
                break;
            }
            let Some(task) = self.pop_macro() else { break };
            task();

            rounds += 1;
            if rounds >= MAX_FLUSH_ROUNDS {
                tracing::warn!(
                    rounds,
                    "scheduler drain did not settle, abandoning queued work"
                );
                self.abandon();
                break;
            }
        }

        self.draining.set(false);
    }

    fn abandon(&self) {
        self.micro.borrow_mut().clear();
        self.macros.borrow_mut().clear();
        let hook = self.abandon_hook.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn pop_micro(&self) -> Option<Task> {
        self.micro.borrow_mut().pop_front()
    }

    fn pop_macro(&self) -> Option<Task> {
        self.macros.borrow_mut().pop_front()
    }
}
