//! The expression DAG
//!
//! A tagged union rather than a class hierarchy (see design notes): each
//! variant carries its children directly, evaluation dispatches on the
//! tag, and there are no parent pointers — `update` walks strictly
//! top-down from the root. `watch_set` is a sorted, deduplicated vector of
//! keyword tags rather than a hash set, computed once at construction.

use crate::errors::{ArchiverError, ArchiverResult};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Leq,
    Geq,
    Eq,
    Neq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Pos,
    Not,
}

/// One node of the expression DAG. Constructed once by the parser and
/// never restructured; `update` mutates only the `value`/`latched`
/// fields in place.
#[derive(Debug, Clone)]
pub enum Node {
    Constant {
        value: Value,
    },
    /// `e`, `pi`, `true`, `false`.
    Identifier {
        value: Value,
    },
    /// A reference to `actor.keyword` or `actor.keyword.member`.
    KeyValue {
        tag: String,
        /// The `.member` suffix, if the source wrote one; `None` means
        /// "use the keyword's first value". Consumed (but left in place)
        /// by the monitor's registration pass, which resolves it to
        /// `value_index`.
        member: Option<String>,
        /// Resolved by the monitor service at registration time to an
        /// index into the key table's value columns (offset by one for
        /// `raw_id`); `None` until resolved.
        value_index: Option<usize>,
        value: Value,
    },
    Unary {
        op: UnOp,
        child: Box<Node>,
        value: Value,
    },
    Binary {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
        value: Value,
    },
    Conditional {
        cond: Box<Node>,
        then_branch: Box<Node>,
        else_branch: Box<Node>,
        value: Value,
    },
    Call {
        name: String,
        args: Vec<Node>,
        value: Value,
    },
    /// `X when C`: latches `X` whenever `C` is true.
    When {
        value_expr: Box<Node>,
        when_expr: Option<Box<Node>>,
        value: Value,
        latched_true: bool,
    },
}

impl Node {
    pub fn value(&self) -> &Value {
        match self {
            Node::Constant { value }
            | Node::Identifier { value }
            | Node::KeyValue { value, .. }
            | Node::Unary { value, .. }
            | Node::Binary { value, .. }
            | Node::Conditional { value, .. }
            | Node::Call { value, .. }
            | Node::When { value, .. } => value,
        }
    }

    /// The sorted, deduplicated set of keyword tags this node (or any
    /// descendant) depends on.
    pub fn watch_set(&self) -> Vec<String> {
        let mut tags = Vec::new();
        self.collect_tags(&mut tags);
        tags.sort();
        tags.dedup();
        tags
    }

    fn collect_tags(&self, out: &mut Vec<String>) {
        match self {
            Node::Constant { .. } | Node::Identifier { .. } => {}
            Node::KeyValue { tag, .. } => out.push(tag.clone()),
            Node::Unary { child, .. } => child.collect_tags(out),
            Node::Binary { lhs, rhs, .. } => {
                lhs.collect_tags(out);
                rhs.collect_tags(out);
            }
            Node::Conditional {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                cond.collect_tags(out);
                then_branch.collect_tags(out);
                else_branch.collect_tags(out);
            }
            Node::Call { args, .. } => {
                for a in args {
                    a.collect_tags(out);
                }
            }
            Node::When {
                value_expr,
                when_expr,
                ..
            } => {
                value_expr.collect_tags(out);
                if let Some(w) = when_expr {
                    w.collect_tags(out);
                }
            }
        }
    }

    /// Resolves every `KeyValue` node's `.member` suffix (or its absence)
    /// to an index into the values the keyword dispatches, via `lookup`,
    /// which maps a `actor.keyword` tag to its column names in order.
    /// Called once at monitor creation; `update` fails if a node is left
    /// unresolved.
    pub fn resolve_value_indices(&mut self, lookup: &dyn Fn(&str) -> Option<Vec<String>>) -> ArchiverResult<()> {
        match self {
            Node::Constant { .. } | Node::Identifier { .. } => Ok(()),
            Node::KeyValue { tag, member, value_index, .. } => {
                let columns = lookup(tag)
                    .ok_or_else(|| ArchiverError::expression(format!("no schema known for {tag}")))?;
                let index = match member {
                    None => 0,
                    Some(m) => columns
                        .iter()
                        .position(|c| c == m)
                        .ok_or_else(|| ArchiverError::expression(format!("{tag} has no member {m}")))?,
                };
                *value_index = Some(index);
                Ok(())
            }
            Node::Unary { child, .. } => child.resolve_value_indices(lookup),
            Node::Binary { lhs, rhs, .. } => {
                lhs.resolve_value_indices(lookup)?;
                rhs.resolve_value_indices(lookup)
            }
            Node::Conditional { cond, then_branch, else_branch, .. } => {
                cond.resolve_value_indices(lookup)?;
                then_branch.resolve_value_indices(lookup)?;
                else_branch.resolve_value_indices(lookup)
            }
            Node::Call { args, .. } => {
                for a in args.iter_mut() {
                    a.resolve_value_indices(lookup)?;
                }
                Ok(())
            }
            Node::When { value_expr, when_expr, .. } => {
                value_expr.resolve_value_indices(lookup)?;
                if let Some(w) = when_expr.as_mut() {
                    w.resolve_value_indices(lookup)?;
                }
                Ok(())
            }
        }
    }

    /// Propagates an update for `tag` through the DAG, short-circuiting
    /// any subtree whose watch set doesn't mention it. Returns whether
    /// this node's value changed.
    pub fn update(&mut self, tag: &str, values: &[Value]) -> ArchiverResult<bool> {
        if !self.watch_set().iter().any(|t| t == tag) {
            return Ok(false);
        }
        match self {
            Node::Constant { .. } | Node::Identifier { .. } => Ok(false),
            Node::KeyValue { tag: my_tag, value_index, value, .. } => {
                if my_tag != tag {
                    return Ok(false);
                }
                let index = value_index
                    .ok_or_else(|| ArchiverError::expression(format!("{my_tag} has no resolved value index")))?;
                let new_value = values
                    .get(index)
                    .cloned()
                    .ok_or_else(|| ArchiverError::expression(format!("value index {index} out of range for {my_tag}")))?;
                let changed = *value != new_value;
                *value = new_value;
                Ok(changed)
            }
            Node::Unary { op, child, value } => {
                let child_changed = child.update(tag, values)?;
                if !child_changed {
                    return Ok(false);
                }
                let new_value = eval_unary(*op, child.value());
                let changed = *value != new_value;
                *value = new_value;
                Ok(changed)
            }
            Node::Binary { op, lhs, rhs, value } => {
                let l = lhs.update(tag, values)?;
                let r = rhs.update(tag, values)?;
                if !l && !r {
                    return Ok(false);
                }
                let new_value = eval_binary(*op, lhs.value(), rhs.value());
                let changed = *value != new_value;
                *value = new_value;
                Ok(changed)
            }
            Node::Conditional {
                cond,
                then_branch,
                else_branch,
                value,
            } => {
                let c = cond.update(tag, values)?;
                let t = then_branch.update(tag, values)?;
                let e = else_branch.update(tag, values)?;
                if !c && !t && !e {
                    return Ok(false);
                }
                let new_value = match cond.value() {
                    Value::Invalid => Value::Invalid,
                    v => {
                        if is_truthy(v) {
                            then_branch.value().clone()
                        } else {
                            else_branch.value().clone()
                        }
                    }
                };
                let changed = *value != new_value;
                *value = new_value;
                Ok(changed)
            }
            Node::Call { name, args, value } => {
                let mut any_changed = false;
                for a in args.iter_mut() {
                    if a.update(tag, values)? {
                        any_changed = true;
                    }
                }
                if !any_changed {
                    return Ok(false);
                }
                let arg_values: Vec<&Value> = args.iter().map(|a| a.value()).collect();
                let new_value = eval_call(name, &arg_values)?;
                let changed = *value != new_value;
                *value = new_value;
                Ok(changed)
            }
            Node::When {
                value_expr,
                when_expr,
                value,
                latched_true,
            } => {
                let value_changed = value_expr.update(tag, values)?;
                let when_changed = if let Some(w) = when_expr.as_mut() {
                    w.update(tag, values)?
                } else {
                    false
                };
                if !value_changed && !when_changed {
                    return Ok(false);
                }
                let now_true = match when_expr.as_ref() {
                    None => true,
                    Some(w) => is_truthy(w.value()),
                };
                if when_changed && now_true && !*latched_true {
                    *latched_true = true;
                    let new_value = value_expr.value().clone();
                    let changed = *value != new_value;
                    *value = new_value;
                    return Ok(changed);
                }
                if now_true {
                    if value_changed {
                        let new_value = value_expr.value().clone();
                        let changed = *value != new_value;
                        *value = new_value;
                        *latched_true = true;
                        return Ok(changed);
                    }
                    Ok(false)
                } else {
                    *latched_true = false;
                    Ok(false)
                }
            }
        }
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Text(s) => !s.is_empty(),
        Value::Invalid => false,
    }
}

fn eval_unary(op: UnOp, v: &Value) -> Value {
    if v.is_invalid() {
        return Value::Invalid;
    }
    match (op, v) {
        (UnOp::Not, v) => Value::Int(!is_truthy(v) as i64),
        (UnOp::Pos, Value::Int(i)) => Value::Int(*i),
        (UnOp::Pos, Value::Float(f)) => Value::Float(*f),
        (UnOp::Neg, Value::Int(i)) => Value::Int(-i),
        (UnOp::Neg, Value::Float(f)) => Value::Float(-f),
        _ => Value::Invalid,
    }
}

fn eval_binary(op: BinOp, l: &Value, r: &Value) -> Value {
    if l.is_invalid() || r.is_invalid() {
        return Value::Invalid;
    }
    use BinOp::*;
    match op {
        And => Value::Int((is_truthy(l) && is_truthy(r)) as i64),
        Or => Value::Int((is_truthy(l) || is_truthy(r)) as i64),
        Add if matches!((l, r), (Value::Text(_), _) | (_, Value::Text(_))) => {
            Value::Text(format!("{l}{r}"))
        }
        Eq | Neq | Lt | Gt | Leq | Geq if matches!((l, r), (Value::Text(_), Value::Text(_))) => {
            let (Value::Text(a), Value::Text(b)) = (l, r) else { unreachable!() };
            let ord = a.cmp(b);
            Value::Int(compare_op(op, ord) as i64)
        }
        _ => {
            let (a, b) = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Value::Invalid,
            };
            match op {
                Add => numeric_result(l, r, a + b),
                Sub => numeric_result(l, r, a - b),
                Mul => numeric_result(l, r, a * b),
                Div => {
                    if matches!((l, r), (Value::Int(_), Value::Int(_))) {
                        if b == 0.0 {
                            Value::Invalid
                        } else {
                            Value::Int((a as i64) / (b as i64))
                        }
                    } else if b == 0.0 {
                        Value::Invalid
                    } else {
                        Value::Float(a / b)
                    }
                }
                Mod => {
                    if b == 0.0 {
                        Value::Invalid
                    } else if matches!((l, r), (Value::Int(_), Value::Int(_))) {
                        Value::Int((a as i64) % (b as i64))
                    } else {
                        Value::Float(a % b)
                    }
                }
                Lt => Value::Int((a < b) as i64),
                Gt => Value::Int((a > b) as i64),
                Leq => Value::Int((a <= b) as i64),
                Geq => Value::Int((a >= b) as i64),
                Eq => Value::Int((a == b) as i64),
                Neq => Value::Int((a != b) as i64),
                And | Or => unreachable!("handled above"),
            }
        }
    }
}

fn compare_op(op: BinOp, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        BinOp::Eq => ord == Equal,
        BinOp::Neq => ord != Equal,
        BinOp::Lt => ord == Less,
        BinOp::Gt => ord == Greater,
        BinOp::Leq => ord != Greater,
        BinOp::Geq => ord != Less,
        _ => false,
    }
}

fn numeric_result(l: &Value, r: &Value, result: f64) -> Value {
    if matches!((l, r), (Value::Int(_), Value::Int(_))) {
        Value::Int(result as i64)
    } else {
        Value::Float(result)
    }
}

const BUILTINS: &[&str] = &["abs", "int", "float", "max", "min", "round"];

fn eval_call(name: &str, args: &[&Value]) -> ArchiverResult<Value> {
    if args.iter().any(|v| v.is_invalid()) {
        return Ok(Value::Invalid);
    }
    let floats: Option<Vec<f64>> = args.iter().map(|v| v.as_f64()).collect();
    let Some(floats) = floats else {
        return Ok(Value::Invalid);
    };
    match name {
        "abs" if floats.len() == 1 => Ok(numeric_result(args[0], args[0], floats[0].abs())),
        "int" if floats.len() == 1 => Ok(Value::Int(floats[0] as i64)),
        "float" if floats.len() == 1 => Ok(Value::Float(floats[0])),
        "round" if floats.len() == 1 => Ok(Value::Int(floats[0].round() as i64)),
        "max" if floats.len() == 2 => Ok(Value::Float(floats[0].max(floats[1]))),
        "min" if floats.len() == 2 => Ok(Value::Float(floats[0].min(floats[1]))),
        _ if BUILTINS.contains(&name) => {
            Err(ArchiverError::expression(format!("wrong arity for builtin {name}")))
        }
        // Math-library functions (pow, sqrt, sin, cos, ...), checked after
        // the builtins exactly as `Call.evaluate` in the original checks
        // `math.__dict__` first.
        "pow" if floats.len() == 2 => Ok(Value::Float(floats[0].powf(floats[1]))),
        "sqrt" if floats.len() == 1 => Ok(Value::Float(floats[0].sqrt())),
        "sin" if floats.len() == 1 => Ok(Value::Float(floats[0].sin())),
        "cos" if floats.len() == 1 => Ok(Value::Float(floats[0].cos())),
        "tan" if floats.len() == 1 => Ok(Value::Float(floats[0].tan())),
        "log" if floats.len() == 1 => Ok(Value::Float(floats[0].ln())),
        "log10" if floats.len() == 1 => Ok(Value::Float(floats[0].log10())),
        "exp" if floats.len() == 1 => Ok(Value::Float(floats[0].exp())),
        "floor" if floats.len() == 1 => Ok(Value::Float(floats[0].floor())),
        "ceil" if floats.len() == 1 => Ok(Value::Float(floats[0].ceil())),
        other => Err(ArchiverError::expression(format!("unknown function: {other}"))),
    }
}

/// Looks up a named constant: `e`, `pi`, `true`, `false`.
pub fn named_constant(name: &str) -> Option<Value> {
    match name {
        "e" => Some(Value::Float(std::f64::consts::E)),
        "pi" => Some(Value::Float(std::f64::consts::PI)),
        "true" => Some(Value::Int(1)),
        "false" => Some(Value::Int(0)),
        _ => None,
    }
}

/// Resolves a snapshot `keytag -> values` map into a single call to
/// `Node::update`, used by historical replay where updates arrive as
/// discrete `(keytag, values)` pairs rather than one tag at a time.
pub fn replay(node: &mut Node, updates: &[(String, Vec<Value>)]) -> ArchiverResult<Vec<Value>> {
    let mut latched = Vec::new();
    for (tag, values) in updates {
        if node.update(tag, values)? {
            latched.push(node.value().clone());
        }
    }
    Ok(latched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyvalue(tag: &str, index: usize) -> Node {
        Node::KeyValue {
            tag: tag.to_string(),
            member: None,
            value_index: Some(index),
            value: Value::Invalid,
        }
    }

    #[test]
    fn binary_add_waits_for_both_operands() {
        let mut node = Node::Binary {
            op: BinOp::Add,
            lhs: Box::new(keyvalue("a.b", 0)),
            rhs: Box::new(keyvalue("x.y", 0)),
            value: Value::Invalid,
        };
        assert!(node.update("a.b", &[Value::Int(2)]).unwrap());
        assert_eq!(*node.value(), Value::Invalid);
        assert!(node.update("x.y", &[Value::Int(3)]).unwrap());
        assert_eq!(*node.value(), Value::Int(5));
    }

    #[test]
    fn when_latches_on_true_transition_and_freezes() {
        let mut node = Node::When {
            value_expr: Box::new(keyvalue("x.y", 0)),
            when_expr: Some(Box::new(keyvalue("a.b", 0))),
            value: Value::Invalid,
            latched_true: false,
        };
        node.update("a.b", &[Value::Int(0)]).unwrap();
        assert_eq!(*node.value(), Value::Invalid);
        node.update("x.y", &[Value::Int(999)]).unwrap();
        assert_eq!(*node.value(), Value::Invalid);
        assert!(node.update("a.b", &[Value::Int(1)]).unwrap());
        assert_eq!(*node.value(), Value::Int(999));
        assert!(node.update("x.y", &[Value::Int(123)]).unwrap());
        assert_eq!(*node.value(), Value::Int(123));
        node.update("a.b", &[Value::Int(0)]).unwrap();
        let before = node.value().clone();
        node.update("x.y", &[Value::Int(7)]).unwrap();
        assert_eq!(*node.value(), before);
    }

    #[test]
    fn watch_set_is_sorted_and_deduped() {
        let node = Node::Binary {
            op: BinOp::Add,
            lhs: Box::new(keyvalue("x.y", 0)),
            rhs: Box::new(keyvalue("a.b", 0)),
            value: Value::Invalid,
        };
        assert_eq!(node.watch_set(), vec!["a.b".to_string(), "x.y".to_string()]);
    }
}
