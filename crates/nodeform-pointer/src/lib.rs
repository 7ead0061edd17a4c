//! # nodeform-pointer — JSON Pointer Utilities
//!
//! This crate provides the pointer plumbing used by the nodeform node
//! graph:
//!
//! - **RFC 6901 pointers** ([`escape`], [`unescape`], [`get`]): resolving
//!   a pointer against a `serde_json::Value`.
//! - **RFC 6902-style mutation** ([`set`], [`remove`]): writing a value at
//!   a pointer, creating intermediate objects/array slots as needed.
//! - **Extended path expressions** ([`PathExpr`]): the superset syntax the
//!   node graph resolves against its tree. On top of plain pointers it
//!   understands `.` (self), `..` (parent), `#` (root), `@` (context) and
//!   `*` (wildcard over children).
//!
//! ## Design
//!
//! Parsing never fails for navigation reasons: an expression that points
//! nowhere simply resolves to nothing at lookup time. [`PathExprError`] is
//! reserved for genuinely malformed input (an empty escape sequence, a
//! stray `~`).
//!
//! The extended syntax is deliberately small. The node graph walks
//! [`Segment`]s itself; this crate only tokenizes and normalizes them.

pub mod expr;
pub mod ops;

pub use expr::{Anchor, PathExpr, PathExprError, Segment};
pub use ops::{escape, get, remove, set, unescape};
