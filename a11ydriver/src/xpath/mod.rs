//! A structural query language over tree snapshots.
//!
//! Supports the XPath 1.0 subset that makes sense for an accessibility tree:
//! elements are named after roles, node properties are attributes, and there
//! are no text nodes. Expressions are compiled once and can then be run
//! against any number of snapshots.

mod eval;
mod lexer;
mod parser;

use crate::snapshot::SnapshotTree;
use eval::{Evaluator, Value, XNode};
use parser::Expr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum XPathError {
    #[error("syntax error at token {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("{0}")]
    Evaluation(String),
}

/// A compiled query.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    pub fn compile(source: &str) -> Result<XPath, XPathError> {
        Ok(XPath {
            source: source.to_string(),
            expr: parser::parse(source)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Runs the query with the snapshot's root element as context node and
    /// returns the selected elements as arena indices in document order.
    ///
    /// Queries that produce anything other than a set of elements are
    /// rejected.
    pub fn select(&self, tree: &SnapshotTree) -> Result<Vec<usize>, XPathError> {
        let evaluator = Evaluator::new(tree);
        match evaluator.evaluate_at_root(&self.expr)? {
            Value::Nodes(nodes) => nodes
                .into_iter()
                .map(|node| match node {
                    XNode::Element(index) => Ok(index),
                    XNode::Root => Err(XPathError::Evaluation(
                        "query selects the document, not an element".to_string(),
                    )),
                    XNode::Attribute(..) => Err(XPathError::Evaluation(
                        "query selects attributes, not elements".to_string(),
                    )),
                })
                .collect(),
            other => Err(XPathError::Evaluation(format!(
                "query evaluates to {}, not a node-set",
                match other {
                    Value::Bool(_) => "a boolean",
                    Value::Number(_) => "a number",
                    _ => "a string",
                }
            ))),
        }
    }
}
