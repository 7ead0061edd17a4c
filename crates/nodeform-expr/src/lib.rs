//! # nodeform-expr — Computed-Rule Expressions
//!
//! Schema fragments carry dependency-driven rules (`active`, `visible`,
//! `derive`, branch selectors and so on) as small string expressions:
//!
//! ```text
//! ../category === 'personal' && ./age >= 18
//! /price * /quantity
//! ```
//!
//! This crate compiles such a string once, at tree-build time, into a
//! [`CompiledExpr`]: an AST whose dependency references have been interned
//! into a shared [`DependencyTable`] and rewritten as slot indices.
//! Evaluation takes the current dependency-value slice and returns a JSON
//! value; it allocates only for produced values and never touches the
//! node graph.
//!
//! ## Language
//!
//! - Dependency references: `/abs/path`, `./child`, `../sibling`,
//!   `#/from-root`, `@/context`, or a bare identifier (relative child).
//!   Keys containing `-` need an explicit `./` prefix.
//! - Literals: numbers, `'single'`/`"double"` quoted strings, `true`,
//!   `false`, `null`, `undefined`.
//! - Operators, loosest to tightest: `?:`, `||`, `&&`, equality
//!   (`===`, `==`, `!==`, `!=`), comparison (`<`, `<=`, `>`, `>=`),
//!   additive (`+`, `-`), multiplicative (`*`, `/`, `%`), unary
//!   (`!`, `-`), parentheses.
//!
//! Semantics follow the source expression dialect: `&&`/`||` return an
//! operand (not a coerced boolean), `+` concatenates when either side is
//! a string, numeric comparison coerces through `f64`, and an absent
//! dependency evaluates as `undefined`.
//!
//! The interface is deliberately narrow (compile + evaluate) so the
//! expression syntax is swappable without touching the graph.

mod compile;
mod eval;

pub use compile::{compile, ExprError};
pub use eval::{truthy, CompiledExpr, DependencyTable};
