//! # nodeform-core — Reactive Schema Node Graph
//!
//! Materializes a JSON Schema into a tree of live nodes. Each node
//! tracks its slice of the document value plus computed UI state
//! (active, visible, readOnly, disabled, branch selection, watched
//! values) driven by small dependency expressions embedded in the
//! schema. Values flow down through propagation and up through
//! assembly; only *enabled* nodes (active, visible and inside the
//! selected combinator branch) contribute to the externally observed
//! document.
//!
//! ## Responsibilities
//!
//! - **Node graph** ([`Node`], [`Tree`]): construction from schema plus
//!   input, the value/reset protocol, renaming with path integrity,
//!   per-node state and error storage.
//! - **Event cascade** ([`NodeEvent`], [`Subscription`]): per-node
//!   publication where same-tick publications coalesce into one merged
//!   record, flushed on the micro tier of the tree's [`Scheduler`].
//! - **Compute engine**: dependency-subscribed re-evaluation of every
//!   computed rule, derived values, edge-triggered pristine resets.
//! - **Injection guard** ([`InjectionGuard`]): cross-field writes with
//!   cycle suppression, cleared on the macro tier so one cascade shares
//!   one in-flight window.
//! - **Pointer resolver** ([`Node::find`] / [`Node::find_all`]):
//!   path-expression lookup against the live tree, including root (`#`)
//!   and context (`@`) anchors and wildcard multi-match.
//! - **Validation**: plugin-compiled validators run against the
//!   enhanced document; issues distribute to the nodes their data paths
//!   address, branch-filtered for combinator variants, with stale
//!   errors cleared on the next run.
//!
//! ## Design
//!
//! The graph is single-threaded by construction: nodes are `Rc` handles
//! and all scheduling is cooperative. Hosts mutate the tree, then call
//! [`Tree::flush`] to drain batched events, the change emission,
//! revalidation and guard clearing. Every back-reference is weak, so
//! dropping a [`Tree`] tears the graph down.

mod compute;
pub mod error;
pub mod event;
pub mod guard;
pub mod node;
mod resolver;
pub mod schema;
pub mod scheduler;
pub mod tree;
mod validation;

pub use error::BuildError;
pub use event::{ComputedSnapshot, EventPayload, NodeEvent, NodeEventType, Subscription};
pub use guard::InjectionGuard;
pub use node::{Node, ResetOptions, SetValueOption, WeakNode};
pub use schema::{BranchScope, NodeGroup, SchemaType};
pub use scheduler::{Scheduler, MAX_FLUSH_ROUNDS};
pub use tree::{Tree, TreeOptions};

pub use nodeform_schema::{IssueKind, ValidationIssue};
