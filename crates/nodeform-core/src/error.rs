//! Tree construction errors.

use nodeform_expr::ExprError;
use nodeform_pointer::PathExprError;
use thiserror::Error;

/// Failure while materializing a node tree from a schema.
///
/// Only construction fails loudly. Once a tree exists, runtime misses
/// (unresolvable dependency paths, schema-invalid values) degrade to
/// `undefined` slots or validation issues instead of errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A schema fragment that should describe a node is not an object.
    #[error("schema fragment at {schema_path} is not an object")]
    InvalidFragment {
        /// Schema location of the offending fragment.
        schema_path: String,
    },

    /// A computed rule failed to compile.
    #[error("invalid {rule} rule at {schema_path}: {source}")]
    InvalidRule {
        /// Rule keyword (`active`, `derive`, `if`, ...).
        rule: String,
        /// Schema location of the fragment carrying the rule.
        schema_path: String,
        #[source]
        source: ExprError,
    },

    /// A watch or injection path failed to parse.
    #[error("invalid path expression {expr:?} at {schema_path}: {source}")]
    InvalidPath {
        /// The offending expression text.
        expr: String,
        /// Schema location of the fragment carrying the path.
        schema_path: String,
        #[source]
        source: PathExprError,
    },

    /// An array schema is missing an `items` fragment but received
    /// element values to materialize.
    #[error("array schema at {schema_path} has no usable items fragment")]
    MissingItems {
        /// Schema location of the array fragment.
        schema_path: String,
    },
}
