//! Path-expression resolution against the live tree.
//!
//! Expressions are parsed by `nodeform-pointer` and walked here, node
//! by node. Resolution never fails: a malformed expression or a miss
//! simply yields no match. A child segment can match several nodes at
//! once when sibling combinator branches declare the same property
//! name; [`Node::find`] takes the first in tree order, while
//! [`Node::find_all`] returns all of them.

use nodeform_pointer::{Anchor, PathExpr, Segment};

use crate::node::Node;

impl Node {
    /// Resolve `expr` to the first matching node.
    pub fn find(&self, expr: &str) -> Option<Node> {
        self.resolve(expr).into_iter().next()
    }

    /// Resolve `expr` to every matching node, in tree order.
    pub fn find_all(&self, expr: &str) -> Vec<Node> {
        self.resolve(expr)
    }

    fn resolve(&self, expr: &str) -> Vec<Node> {
        let parsed = match PathExpr::parse(expr) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::debug!(expr, %error, "unresolvable path expression");
                return Vec::new();
            }
        };

        let start = match parsed.anchor {
            Anchor::Current => Some(self.clone()),
            Anchor::Root => Some(self.root()),
            Anchor::Context => self.context(),
        };
        let Some(start) = start else {
            return Vec::new();
        };

        let mut current = vec![start];
        for segment in &parsed.segments {
            let mut next = Vec::new();
            for node in &current {
                match segment {
                    Segment::Parent => {
                        if let Some(parent) = node.parent() {
                            push_unique(&mut next, parent);
                        }
                    }
                    Segment::Child(name) => {
                        for child in node.children() {
                            if child.name() == *name {
                                push_unique(&mut next, child);
                            }
                        }
                    }
                    Segment::Wildcard => {
                        for child in node.children() {
                            push_unique(&mut next, child);
                        }
                    }
                }
            }
            if next.is_empty() {
                return Vec::new();
            }
            current = next;
        }
        current
    }
}

/// Keep tree order while deduplicating (two branch children share a
/// parent, so `../x` from both must not double it).
fn push_unique(nodes: &mut Vec<Node>, node: Node) {
    if !nodes.iter().any(|existing| *existing == node) {
        nodes.push(node);
    }
}
