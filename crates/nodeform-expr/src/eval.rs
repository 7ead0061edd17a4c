//! Compiled expression representation and slot-based evaluation.

use serde_json::Value;

/// Shared, ordered table of dependency paths for one node's rule set.
///
/// Every rule compiled for a node interns into the same table, so the
/// node wires each dependency subscription exactly once and all rules
/// read from one slot array.
#[derive(Debug, Clone, Default)]
pub struct DependencyTable {
    paths: Vec<String>,
}

impl DependencyTable {
    /// Intern a path, returning its stable slot index. Paths are
    /// deduplicated; first appearance wins the slot.
    pub fn intern(&mut self, path: &str) -> usize {
        if let Some(idx) = self.paths.iter().position(|p| p == path) {
            return idx;
        }
        self.paths.push(path.to_string());
        self.paths.len() - 1
    }

    /// The interned paths in slot order.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Number of interned paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// True when no path has been interned.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone)]
pub(crate) enum Ast {
    /// A literal value; `None` is the `undefined` literal.
    Literal(Option<Value>),
    /// A dependency slot index into the shared table.
    Dep(usize),
    Unary(UnaryOp, Box<Ast>),
    Binary(BinOp, Box<Ast>, Box<Ast>),
    Conditional(Box<Ast>, Box<Ast>, Box<Ast>),
}

/// A rule expression compiled against a [`DependencyTable`].
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    ast: Ast,
}

impl CompiledExpr {
    pub(crate) fn new(source: String, ast: Ast) -> Self {
        Self { source, ast }
    }

    /// The original expression text, for diagnostics.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against the current dependency slots. A slot shorter than
    /// the table (or holding `None`) reads as `undefined`.
    pub fn evaluate(&self, slots: &[Option<Value>]) -> Option<Value> {
        eval(&self.ast, slots)
    }

    /// Evaluate and coerce to a boolean via [`truthy`].
    pub fn evaluate_bool(&self, slots: &[Option<Value>]) -> bool {
        truthy(self.evaluate(slots).as_ref())
    }
}

/// Truthiness of a JSON value under the rule dialect: `undefined`, `null`,
/// `false`, `0`, and `""` are false; everything else (including empty
/// arrays and objects) is true.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Build a JSON number from an f64, collapsing to an integer
/// representation when exact so literals compare cleanly against
/// integer-valued documents.
pub(crate) fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        Value::Number(serde_json::Number::from(n as i64))
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn eval(ast: &Ast, slots: &[Option<Value>]) -> Option<Value> {
    match ast {
        Ast::Literal(v) => v.clone(),
        Ast::Dep(idx) => slots.get(*idx).cloned().flatten(),
        Ast::Unary(op, inner) => {
            let v = eval(inner, slots);
            match op {
                UnaryOp::Not => Some(Value::Bool(!truthy(v.as_ref()))),
                UnaryOp::Neg => as_number(v.as_ref()).map(|n| number(-n)),
            }
        }
        Ast::Binary(op, lhs, rhs) => {
            match op {
                // Short-circuit forms return an operand, not a coerced bool.
                BinOp::Or => {
                    let l = eval(lhs, slots);
                    if truthy(l.as_ref()) {
                        l
                    } else {
                        eval(rhs, slots)
                    }
                }
                BinOp::And => {
                    let l = eval(lhs, slots);
                    if truthy(l.as_ref()) {
                        eval(rhs, slots)
                    } else {
                        l
                    }
                }
                _ => {
                    let l = eval(lhs, slots);
                    let r = eval(rhs, slots);
                    binary(*op, l, r)
                }
            }
        }
        Ast::Conditional(cond, then, otherwise) => {
            if truthy(eval(cond, slots).as_ref()) {
                eval(then, slots)
            } else {
                eval(otherwise, slots)
            }
        }
    }
}

fn binary(op: BinOp, l: Option<Value>, r: Option<Value>) -> Option<Value> {
    match op {
        BinOp::Eq => Some(Value::Bool(loose_eq(l.as_ref(), r.as_ref()))),
        BinOp::Ne => Some(Value::Bool(!loose_eq(l.as_ref(), r.as_ref()))),
        BinOp::Lt => compare(l.as_ref(), r.as_ref(), |o| o.is_lt()),
        BinOp::Le => compare(l.as_ref(), r.as_ref(), |o| o.is_le()),
        BinOp::Gt => compare(l.as_ref(), r.as_ref(), |o| o.is_gt()),
        BinOp::Ge => compare(l.as_ref(), r.as_ref(), |o| o.is_ge()),
        BinOp::Add => add(l.as_ref(), r.as_ref()),
        BinOp::Sub => numeric(l.as_ref(), r.as_ref(), |a, b| a - b),
        BinOp::Mul => numeric(l.as_ref(), r.as_ref(), |a, b| a * b),
        BinOp::Div => numeric(l.as_ref(), r.as_ref(), |a, b| a / b),
        BinOp::Rem => numeric(l.as_ref(), r.as_ref(), |a, b| a % b),
        BinOp::Or | BinOp::And => unreachable!("short-circuit handled by caller"),
    }
}

fn as_number(v: Option<&Value>) -> Option<f64> {
    match v {
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    }
}

/// Equality with two deliberate coercions: numbers compare numerically
/// across integer/float representations, and `undefined` equals `null`
/// (absent and explicitly empty fields are interchangeable in rules).
fn loose_eq(l: Option<&Value>, r: Option<&Value>) -> bool {
    let l_nullish = matches!(l, None | Some(Value::Null));
    let r_nullish = matches!(r, None | Some(Value::Null));
    if l_nullish || r_nullish {
        return l_nullish && r_nullish;
    }
    if let (Some(a), Some(b)) = (as_number(l), as_number(r)) {
        return a == b;
    }
    l == r
}

fn compare(
    l: Option<&Value>,
    r: Option<&Value>,
    check: impl Fn(std::cmp::Ordering) -> bool,
) -> Option<Value> {
    let ordering = match (l, r) {
        (Some(Value::String(a)), Some(Value::String(b))) => Some(a.cmp(b)),
        _ => match (as_number(l), as_number(r)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    // Incomparable operands compare false, they do not poison the rule.
    Some(Value::Bool(ordering.is_some_and(check)))
}

fn add(l: Option<&Value>, r: Option<&Value>) -> Option<Value> {
    match (l, r) {
        (Some(Value::String(_)), _) | (_, Some(Value::String(_))) => {
            Some(Value::String(format!("{}{}", stringify(l), stringify(r))))
        }
        _ => numeric(l, r, |a, b| a + b),
    }
}

fn numeric(l: Option<&Value>, r: Option<&Value>, f: impl Fn(f64, f64) -> f64) -> Option<Value> {
    let result = f(as_number(l)?, as_number(r)?);
    if result.is_finite() {
        Some(number(result))
    } else {
        None
    }
}

fn stringify(v: Option<&Value>) -> String {
    match v {
        None => "undefined".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => "null".to_string(),
        Some(other) => other.to_string(),
    }
}
