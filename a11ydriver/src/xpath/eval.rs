use super::parser::{ArithOp, Axis, CmpOp, Expr, NodeTest, Step};
use super::XPathError;
use crate::snapshot::SnapshotTree;

/// A node of the document model built over a snapshot: the document root,
/// an element (arena index) or an attribute (element index, attribute index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum XNode {
    Root,
    Element(usize),
    Attribute(usize, usize),
}

impl XNode {
    fn order_key(self) -> (usize, usize) {
        match self {
            XNode::Root => (0, 0),
            XNode::Element(i) => (i + 1, 0),
            XNode::Attribute(i, k) => (i + 1, k + 1),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    Nodes(Vec<XNode>),
    Bool(bool),
    Number(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy)]
struct Context {
    node: XNode,
    position: usize,
    size: usize,
}

pub(crate) struct Evaluator<'a> {
    tree: &'a SnapshotTree,
    attributes: Vec<Vec<(&'static str, String)>>,
}

fn sort_nodes(nodes: &mut Vec<XNode>) {
    nodes.sort_by_key(|n| n.order_key());
    nodes.dedup();
}

fn eval_error(message: impl Into<String>) -> XPathError {
    XPathError::Evaluation(message.into())
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(tree: &'a SnapshotTree) -> Self {
        let attributes = tree.nodes().iter().map(|n| n.attributes()).collect();
        Self { tree, attributes }
    }

    /// Evaluates `expr` with the root element as context node.
    pub(crate) fn evaluate_at_root(&self, expr: &Expr) -> Result<Value, XPathError> {
        let node = if self.tree.is_empty() {
            XNode::Root
        } else {
            XNode::Element(0)
        };
        self.eval(
            expr,
            Context {
                node,
                position: 1,
                size: 1,
            },
        )
    }

    fn eval(&self, expr: &Expr, ctx: Context) -> Result<Value, XPathError> {
        Ok(match expr {
            Expr::Or(l, r) => Value::Bool(
                self.boolean(&self.eval(l, ctx)?) || self.boolean(&self.eval(r, ctx)?),
            ),
            Expr::And(l, r) => Value::Bool(
                self.boolean(&self.eval(l, ctx)?) && self.boolean(&self.eval(r, ctx)?),
            ),
            Expr::Compare(op, l, r) => {
                let left = self.eval(l, ctx)?;
                let right = self.eval(r, ctx)?;
                Value::Bool(self.compare(*op, &left, &right))
            }
            Expr::Arith(op, l, r) => {
                let a = self.number(&self.eval(l, ctx)?);
                let b = self.number(&self.eval(r, ctx)?);
                Value::Number(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                    ArithOp::Mod => a % b,
                })
            }
            Expr::Negate(e) => Value::Number(-self.number(&self.eval(e, ctx)?)),
            Expr::Union(l, r) => {
                let (Value::Nodes(mut left), Value::Nodes(right)) =
                    (self.eval(l, ctx)?, self.eval(r, ctx)?)
                else {
                    return Err(eval_error("union operands must be node-sets"));
                };
                left.extend(right);
                sort_nodes(&mut left);
                Value::Nodes(left)
            }
            Expr::Literal(s) => Value::Str(s.clone()),
            Expr::Number(n) => Value::Number(*n),
            Expr::Function(name, args) => self.call(name, args, ctx)?,
            Expr::Path { absolute, steps } => {
                let start = if *absolute { XNode::Root } else { ctx.node };
                Value::Nodes(self.apply_steps(vec![start], steps)?)
            }
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let Value::Nodes(mut nodes) = self.eval(primary, ctx)? else {
                    return Err(eval_error("predicates and steps need a node-set"));
                };
                for predicate in predicates {
                    nodes = self.filter(nodes, predicate)?;
                }
                Value::Nodes(self.apply_steps(nodes, steps)?)
            }
        })
    }

    fn apply_steps(&self, mut current: Vec<XNode>, steps: &[Step]) -> Result<Vec<XNode>, XPathError> {
        for step in steps {
            let mut next = Vec::new();
            for &node in &current {
                let mut selected: Vec<XNode> = self
                    .axis_nodes(node, step.axis)
                    .into_iter()
                    .filter(|&n| self.matches_test(n, step.axis, &step.test))
                    .collect();
                for predicate in &step.predicates {
                    selected = self.filter(selected, predicate)?;
                }
                next.extend(selected);
            }
            sort_nodes(&mut next);
            current = next;
        }
        Ok(current)
    }

    /// Keeps the nodes for which `predicate` holds, numbering them in the
    /// order given.
    fn filter(&self, nodes: Vec<XNode>, predicate: &Expr) -> Result<Vec<XNode>, XPathError> {
        let size = nodes.len();
        let mut kept = Vec::new();
        for (i, node) in nodes.into_iter().enumerate() {
            let ctx = Context {
                node,
                position: i + 1,
                size,
            };
            let keep = match self.eval(predicate, ctx)? {
                Value::Number(n) => n == (i + 1) as f64,
                other => self.boolean(&other),
            };
            if keep {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    fn parent_of(&self, node: XNode) -> Option<XNode> {
        match node {
            XNode::Root => None,
            XNode::Element(i) => Some(
                self.tree
                    .node(i)
                    .parent
                    .map(XNode::Element)
                    .unwrap_or(XNode::Root),
            ),
            XNode::Attribute(i, _) => Some(XNode::Element(i)),
        }
    }

    fn children_of(&self, node: XNode) -> Vec<XNode> {
        match node {
            XNode::Root if !self.tree.is_empty() => vec![XNode::Element(0)],
            XNode::Element(i) => self
                .tree
                .node(i)
                .children
                .iter()
                .map(|&c| XNode::Element(c))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn siblings_of(&self, node: XNode) -> (Vec<XNode>, Vec<XNode>) {
        let XNode::Element(i) = node else {
            return (Vec::new(), Vec::new());
        };
        let Some(parent) = self.tree.node(i).parent else {
            return (Vec::new(), Vec::new());
        };
        let siblings = &self.tree.node(parent).children;
        let at = siblings.iter().position(|&s| s == i).unwrap_or(0);
        let before = siblings[..at].iter().rev().map(|&s| XNode::Element(s)).collect();
        let after = siblings[at + 1..].iter().map(|&s| XNode::Element(s)).collect();
        (before, after)
    }

    /// Nodes along `axis` from `node`, in axis order.
    fn axis_nodes(&self, node: XNode, axis: Axis) -> Vec<XNode> {
        let len = self.tree.len();
        match axis {
            Axis::SelfAxis => vec![node],
            Axis::Child => self.children_of(node),
            Axis::Descendant | Axis::DescendantOrSelf => {
                let mut out = Vec::new();
                if axis == Axis::DescendantOrSelf {
                    out.push(node);
                }
                match node {
                    XNode::Root => out.extend((0..len).map(XNode::Element)),
                    XNode::Element(i) => {
                        out.extend((i + 1..self.tree.node(i).subtree_end).map(XNode::Element))
                    }
                    XNode::Attribute(..) => {}
                }
                out
            }
            Axis::Parent => self.parent_of(node).into_iter().collect(),
            Axis::Ancestor | Axis::AncestorOrSelf => {
                let mut out = Vec::new();
                if axis == Axis::AncestorOrSelf {
                    out.push(node);
                }
                let mut current = self.parent_of(node);
                while let Some(ancestor) = current {
                    out.push(ancestor);
                    current = self.parent_of(ancestor);
                }
                out
            }
            Axis::FollowingSibling => self.siblings_of(node).1,
            Axis::PrecedingSibling => self.siblings_of(node).0,
            Axis::Following => match node {
                XNode::Root => Vec::new(),
                XNode::Element(i) => (self.tree.node(i).subtree_end..len)
                    .map(XNode::Element)
                    .collect(),
                XNode::Attribute(i, _) => (i + 1..len).map(XNode::Element).collect(),
            },
            Axis::Preceding => {
                let i = match node {
                    XNode::Root => return Vec::new(),
                    XNode::Element(i) | XNode::Attribute(i, _) => i,
                };
                let mut ancestors = Vec::new();
                let mut current = self.tree.node(i).parent;
                while let Some(a) = current {
                    ancestors.push(a);
                    current = self.tree.node(a).parent;
                }
                (0..i)
                    .rev()
                    .filter(|j| !ancestors.contains(j))
                    .map(XNode::Element)
                    .collect()
            }
            Axis::Attribute => match node {
                XNode::Element(i) => (0..self.attributes[i].len())
                    .map(|k| XNode::Attribute(i, k))
                    .collect(),
                _ => Vec::new(),
            },
        }
    }

    fn matches_test(&self, node: XNode, axis: Axis, test: &NodeTest) -> bool {
        let principal = match (axis, node) {
            (Axis::Attribute, XNode::Attribute(..)) => true,
            (Axis::Attribute, _) => false,
            (_, XNode::Element(_)) => true,
            _ => false,
        };
        match test {
            NodeTest::Node => true,
            NodeTest::Text => false,
            NodeTest::Wildcard => principal,
            NodeTest::Name(name) => principal && self.node_name(node) == *name,
        }
    }

    fn node_name(&self, node: XNode) -> String {
        match node {
            XNode::Root => String::new(),
            XNode::Element(i) => self.tree.node(i).tag.clone(),
            XNode::Attribute(i, k) => self.attributes[i][k].0.to_string(),
        }
    }

    fn string_value(&self, node: XNode) -> String {
        match node {
            XNode::Attribute(i, k) => self.attributes[i][k].1.clone(),
            // Elements carry no text nodes.
            XNode::Root | XNode::Element(_) => String::new(),
        }
    }

    fn string(&self, value: &Value) -> String {
        match value {
            Value::Nodes(nodes) => nodes
                .first()
                .map(|&n| self.string_value(n))
                .unwrap_or_default(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.clone(),
        }
    }

    fn number(&self, value: &Value) -> f64 {
        match value {
            Value::Number(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => string_to_number(&self.string(other)),
        }
    }

    fn boolean(&self, value: &Value) -> bool {
        match value {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn compare(&self, op: CmpOp, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Nodes(l), Value::Nodes(r)) => l.iter().any(|&a| {
                let a = Value::Str(self.string_value(a));
                r.iter()
                    .any(|&b| self.compare_atomic(op, &a, &Value::Str(self.string_value(b))))
            }),
            (Value::Nodes(_), Value::Bool(_)) => {
                self.compare_atomic(op, &Value::Bool(self.boolean(left)), right)
            }
            (Value::Bool(_), Value::Nodes(_)) => {
                self.compare_atomic(op, left, &Value::Bool(self.boolean(right)))
            }
            (Value::Nodes(l), other) => l
                .iter()
                .any(|&a| self.compare_atomic(op, &self.atomize(a, other), other)),
            (other, Value::Nodes(r)) => r
                .iter()
                .any(|&b| self.compare_atomic(op, other, &self.atomize(b, other))),
            _ => self.compare_atomic(op, left, right),
        }
    }

    /// A node's value shaped like `like` for comparison against it.
    fn atomize(&self, node: XNode, like: &Value) -> Value {
        let s = self.string_value(node);
        match like {
            Value::Number(_) => Value::Number(string_to_number(&s)),
            _ => Value::Str(s),
        }
    }

    fn compare_atomic(&self, op: CmpOp, left: &Value, right: &Value) -> bool {
        match op {
            CmpOp::Eq | CmpOp::NotEq => {
                let equal = if matches!(left, Value::Bool(_)) || matches!(right, Value::Bool(_)) {
                    self.boolean(left) == self.boolean(right)
                } else if matches!(left, Value::Number(_)) || matches!(right, Value::Number(_)) {
                    self.number(left) == self.number(right)
                } else {
                    self.string(left) == self.string(right)
                };
                (op == CmpOp::Eq) == equal
            }
            CmpOp::Lt => self.number(left) < self.number(right),
            CmpOp::Lte => self.number(left) <= self.number(right),
            CmpOp::Gt => self.number(left) > self.number(right),
            CmpOp::Gte => self.number(left) >= self.number(right),
        }
    }

    fn arg_string(&self, args: &[Expr], index: usize, ctx: Context) -> Result<String, XPathError> {
        match args.get(index) {
            Some(arg) => Ok(self.string(&self.eval(arg, ctx)?)),
            None => Ok(self.string_value(ctx.node)),
        }
    }

    fn arg_nodes(&self, args: &[Expr], ctx: Context, function: &str) -> Result<Vec<XNode>, XPathError> {
        match args.first() {
            Some(arg) => match self.eval(arg, ctx)? {
                Value::Nodes(nodes) => Ok(nodes),
                _ => Err(eval_error(format!("{function}() expects a node-set"))),
            },
            None => Ok(vec![ctx.node]),
        }
    }

    fn call(&self, name: &str, args: &[Expr], ctx: Context) -> Result<Value, XPathError> {
        Ok(match name {
            "last" => Value::Number(ctx.size as f64),
            "position" => Value::Number(ctx.position as f64),
            "count" => Value::Number(self.arg_nodes(args, ctx, name)?.len() as f64),
            "name" | "local-name" => Value::Str(
                self.arg_nodes(args, ctx, name)?
                    .first()
                    .map(|&n| self.node_name(n))
                    .unwrap_or_default(),
            ),
            "string" => Value::Str(self.arg_string(args, 0, ctx)?),
            "concat" => {
                let mut out = String::new();
                for i in 0..args.len() {
                    out.push_str(&self.arg_string(args, i, ctx)?);
                }
                Value::Str(out)
            }
            "contains" => {
                let (s, needle) = (self.arg_string(args, 0, ctx)?, self.arg_string(args, 1, ctx)?);
                Value::Bool(s.contains(&needle))
            }
            "starts-with" => {
                let (s, prefix) = (self.arg_string(args, 0, ctx)?, self.arg_string(args, 1, ctx)?);
                Value::Bool(s.starts_with(&prefix))
            }
            "ends-with" => {
                let (s, suffix) = (self.arg_string(args, 0, ctx)?, self.arg_string(args, 1, ctx)?);
                Value::Bool(s.ends_with(&suffix))
            }
            "substring-before" => {
                let (s, sep) = (self.arg_string(args, 0, ctx)?, self.arg_string(args, 1, ctx)?);
                Value::Str(s.find(&sep).map(|at| s[..at].to_string()).unwrap_or_default())
            }
            "substring-after" => {
                let (s, sep) = (self.arg_string(args, 0, ctx)?, self.arg_string(args, 1, ctx)?);
                Value::Str(
                    s.find(&sep)
                        .map(|at| s[at + sep.len()..].to_string())
                        .unwrap_or_default(),
                )
            }
            "substring" => {
                let s = self.arg_string(args, 0, ctx)?;
                let start = self.number(&self.eval(&args[1], ctx)?);
                let length = match args.get(2) {
                    Some(arg) => Some(self.number(&self.eval(arg, ctx)?)),
                    None => None,
                };
                Value::Str(substring(&s, start, length))
            }
            "string-length" => Value::Number(self.arg_string(args, 0, ctx)?.chars().count() as f64),
            "normalize-space" => Value::Str(
                self.arg_string(args, 0, ctx)?
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            "translate" => {
                let s = self.arg_string(args, 0, ctx)?;
                let from: Vec<char> = self.arg_string(args, 1, ctx)?.chars().collect();
                let to: Vec<char> = self.arg_string(args, 2, ctx)?.chars().collect();
                Value::Str(
                    s.chars()
                        .filter_map(|c| match from.iter().position(|&f| f == c) {
                            Some(at) => to.get(at).copied(),
                            None => Some(c),
                        })
                        .collect(),
                )
            }
            "not" => Value::Bool(!self.boolean(&self.eval(&args[0], ctx)?)),
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "boolean" => Value::Bool(self.boolean(&self.eval(&args[0], ctx)?)),
            "number" => match args.first() {
                Some(arg) => Value::Number(self.number(&self.eval(arg, ctx)?)),
                None => Value::Number(string_to_number(&self.string_value(ctx.node))),
            },
            "sum" => Value::Number(
                self.arg_nodes(args, ctx, name)?
                    .iter()
                    .map(|&n| string_to_number(&self.string_value(n)))
                    .sum(),
            ),
            "floor" => Value::Number(self.number(&self.eval(&args[0], ctx)?).floor()),
            "ceiling" => Value::Number(self.number(&self.eval(&args[0], ctx)?).ceil()),
            "round" => {
                let n = self.number(&self.eval(&args[0], ctx)?);
                Value::Number(if n.is_finite() { (n + 0.5).floor() } else { n })
            }
            other => return Err(eval_error(format!("unknown function '{other}'"))),
        })
    }
}

/// XPath `substring()` with its 1-based, rounding semantics.
fn substring(s: &str, start: f64, length: Option<f64>) -> String {
    let start = (start + 0.5).floor();
    let end = match length {
        Some(len) => start + (len + 0.5).floor(),
        None => f64::INFINITY,
    };
    s.chars()
        .enumerate()
        .filter(|(i, _)| {
            let position = (*i + 1) as f64;
            position >= start && position < end
        })
        .map(|(_, c)| c)
        .collect()
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let valid = !digits.is_empty()
        && digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.matches('.').count() <= 1;
    if valid {
        trimmed.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_conversions() {
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number("-1.5"), -1.5);
        assert!(string_to_number("1e3").is_nan());
        assert!(string_to_number("").is_nan());
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
    }

    #[test]
    fn test_substring_semantics() {
        assert_eq!(substring("12345", 2.0, Some(3.0)), "234");
        assert_eq!(substring("12345", 1.5, Some(2.6)), "234");
        assert_eq!(substring("12345", 0.0, Some(3.0)), "12");
        assert_eq!(substring("12345", 3.0, None), "345");
    }
}
