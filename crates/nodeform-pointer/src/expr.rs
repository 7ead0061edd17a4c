//! Extended path-expression parsing.
//!
//! The node graph resolves a superset of JSON Pointer syntax:
//!
//! | form        | meaning                                   |
//! |-------------|-------------------------------------------|
//! | *(empty)*   | the node itself                           |
//! | `#`         | the tree root                             |
//! | `@`         | the tree-wide context node                |
//! | `/a/b`      | absolute, resolved from the root          |
//! | `./a`, `a`  | relative to the node                      |
//! | `../a`      | relative to the node's parent             |
//! | `*`         | every child (multi-match resolution only) |
//!
//! This module only tokenizes; the graph walks the resulting
//! [`Segment`] list against its own tree.

use thiserror::Error;

use crate::ops::unescape;

/// Where resolution of a parsed expression starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The node the expression was resolved against.
    Current,
    /// The tree root (`#`, or a leading `/`).
    Root,
    /// The tree-wide context node (`@`).
    Context,
}

/// One navigation step of a parsed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// `..` — step to the parent node.
    Parent,
    /// A named child (array children are named by their index).
    Child(String),
    /// `*` — every child, in tree order.
    Wildcard,
}

/// Malformed expression input.
///
/// Navigation misses are not errors; only genuinely unparseable tokens
/// are rejected, so resolution itself can stay infallible.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathExprError {
    /// A `~` escape not followed by `0` or `1`.
    #[error("invalid escape sequence in segment {segment:?} of {expr:?}")]
    InvalidEscape {
        /// The full expression being parsed.
        expr: String,
        /// The offending segment.
        segment: String,
    },
}

/// A parsed path expression: an anchor plus normalized segments.
///
/// `.` segments are dropped during parsing; `..` survives as
/// [`Segment::Parent`] because it must be applied against the tree, not
/// textually collapsed (a `oneOf` variant and its sibling share a parent
/// but not a textual prefix).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    /// Resolution starting point.
    pub anchor: Anchor,
    /// Steps to apply from the anchor.
    pub segments: Vec<Segment>,
}

impl PathExpr {
    /// Parse an expression. Empty input is the self-expression.
    pub fn parse(expr: &str) -> Result<Self, PathExprError> {
        let (anchor, rest) = match expr {
            "" | "." => return Ok(Self { anchor: Anchor::Current, segments: Vec::new() }),
            "#" | "/" => return Ok(Self { anchor: Anchor::Root, segments: Vec::new() }),
            "@" => return Ok(Self { anchor: Anchor::Context, segments: Vec::new() }),
            _ => {
                if let Some(rest) = expr.strip_prefix("#/") {
                    (Anchor::Root, rest)
                } else if let Some(rest) = expr.strip_prefix("@/") {
                    (Anchor::Context, rest)
                } else if let Some(rest) = expr.strip_prefix('/') {
                    (Anchor::Root, rest)
                } else {
                    (Anchor::Current, expr)
                }
            }
        };

        let mut segments = Vec::new();
        for raw in rest.split('/') {
            match raw {
                "" | "." => {}
                ".." => segments.push(Segment::Parent),
                "*" => segments.push(Segment::Wildcard),
                _ => {
                    if malformed_escape(raw) {
                        return Err(PathExprError::InvalidEscape {
                            expr: expr.to_string(),
                            segment: raw.to_string(),
                        });
                    }
                    segments.push(Segment::Child(unescape(raw)));
                }
            }
        }
        Ok(Self { anchor, segments })
    }

    /// True when any segment is a wildcard, i.e. the expression can only
    /// be fully resolved by multi-match lookup.
    pub fn has_wildcard(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Wildcard))
    }
}

fn malformed_escape(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'~' {
            match bytes.get(i + 1) {
                Some(b'0') | Some(b'1') => i += 2,
                _ => return true,
            }
        } else {
            i += 1;
        }
    }
    false
}
