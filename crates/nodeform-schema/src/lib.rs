//! # nodeform-schema — Schema Validation Plumbing
//!
//! The node graph validates documents against a *stripped* copy of its
//! schema: extension keywords that drive the reactive engine (computed
//! rules, UI hints) are removed before the schema reaches a standard
//! JSON Schema validator. This crate owns that boundary:
//!
//! - **Stripping** ([`strip_extensions`]): recursive removal of the
//!   non-standard keywords listed in [`EXTENSION_KEYWORDS`].
//! - **Cycle detection** ([`find_ref_cycle`]): a `$ref` chain that loops
//!   back on itself is reported up front so the graph can degrade to a
//!   single stable synthetic error instead of a broken validator.
//! - **Plugin interface** ([`ValidatorPlugin`] / [`CompiledValidator`]):
//!   a pluggable compiler of stripped schema → validator, swappable per
//!   tree build, with a process-wide default backed by the `jsonschema`
//!   crate (Draft 2020-12).
//! - **Issue shape** ([`ValidationIssue`]): keyword, data path, schema
//!   path, message, params. Validation failures are always data, never
//!   `Err`.
//!
//! ## Design
//!
//! The default plugin compiles eagerly and reports violations through
//! `iter_errors`, mirroring how validators are built elsewhere in this
//! workspace's lineage. A schema that cannot be compiled never panics the
//! tree: the caller installs [`FallbackValidator`], which repeats one
//! synthetic issue on every run.

pub mod issue;
pub mod plugin;
pub mod strip;

pub use issue::{IssueKind, ValidationIssue};
pub use plugin::{
    default_plugin, set_default_plugin, CompiledValidator, FallbackValidator, JsonSchemaPlugin,
    PluginError, ValidatorPlugin,
};
pub use strip::{find_ref_cycle, strip_extensions, EXTENSION_KEYWORDS};
