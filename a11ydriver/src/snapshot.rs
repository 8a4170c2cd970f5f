//! Point-in-time copies of a live accessibility tree.
//!
//! A snapshot is an arena of nodes in document (pre-order) order. It is built
//! fresh for every structural query and for every `source` request, then
//! thrown away.

use crate::config::DriverConfig;
use crate::element::Accessible;
use crate::errors::AutomationError;
use crate::state::{StateSet, StateSetExt};
use std::fmt::Write as _;
use tracing::{debug, instrument};

/// One captured node.
#[derive(Debug, Clone)]
pub struct SnapshotNode {
    /// Element name: role name with spaces turned into underscores.
    pub tag: String,
    pub name: String,
    pub role: u32,
    pub description: String,
    pub accessible_id: Option<String>,
    /// Child indices from the session's browsing context to this node.
    pub path: Vec<usize>,
    pub states: StateSet,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// One past the arena index of the last node in this subtree.
    pub subtree_end: usize,
}

impl SnapshotNode {
    /// Attributes in serialization order.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = vec![
            ("name", self.name.clone()),
            ("role", self.role.to_string()),
            ("description", self.description.clone()),
        ];
        if let Some(id) = &self.accessible_id {
            attrs.push(("accessibility-id", id.clone()));
        }
        attrs.push(("path", self.path_string()));
        attrs.push(("states", self.states.describe()));
        attrs
    }

    pub fn path_string(&self) -> String {
        self.path
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Element name for a role name.
pub fn tag_for_role(role_name: &str) -> String {
    if role_name.is_empty() {
        "accessible".to_string()
    } else {
        role_name.replace(' ', "_")
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotTree {
    nodes: Vec<SnapshotNode>,
}

impl SnapshotTree {
    /// Captures the subtree under `root`.
    ///
    /// `base_path` is the path of `root` relative to the browsing context;
    /// every recorded path extends it. Nodes whose toolkit is not allowed by
    /// `config` are left out together with their whole subtree. Descendants
    /// that fail to read are skipped; a failure on `root` itself is returned.
    #[instrument(level = "debug", skip(root, config))]
    pub async fn capture(
        root: &Accessible,
        base_path: &[usize],
        config: &DriverConfig,
    ) -> Result<SnapshotTree, AutomationError> {
        let mut tree = SnapshotTree::default();
        let mut stack: Vec<(Accessible, Vec<usize>, Option<usize>)> =
            vec![(root.clone(), base_path.to_vec(), None)];

        while let Some((accessible, path, parent)) = stack.pop() {
            let is_root = parent.is_none();
            let captured = match read_node(&accessible, &path, parent, config).await {
                Ok(captured) => captured,
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    debug!("dropping {:?} from snapshot: {e}", path);
                    continue;
                }
            };
            let Some((mut node, child_count)) = captured else {
                continue;
            };

            let index = tree.nodes.len();
            node.subtree_end = index + 1;
            tree.nodes.push(node);
            if let Some(parent) = parent {
                tree.nodes[parent].children.push(index);
            }

            // Reversed so the first child is popped first.
            for child_index in (0..child_count).rev() {
                match accessible.child_at(child_index).await {
                    Ok(Some(child)) => {
                        let mut child_path = path.clone();
                        child_path.push(child_index);
                        stack.push((child, child_path, Some(index)));
                    }
                    Ok(None) => {}
                    Err(e) => debug!("child {child_index} of {:?} unreadable: {e}", path),
                }
            }
        }

        tree.compute_subtree_ends();
        Ok(tree)
    }

    fn compute_subtree_ends(&mut self) {
        for index in (0..self.nodes.len()).rev() {
            let end = self.nodes[index]
                .children
                .last()
                .map(|&last| self.nodes[last].subtree_end)
                .unwrap_or(index + 1);
            self.nodes[index].subtree_end = end;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: usize) -> &SnapshotNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[SnapshotNode] {
        &self.nodes
    }

    /// Renders the tree as XML. Pretty output indents by two spaces and ends
    /// with a newline; compact output has no whitespace between elements.
    pub fn to_xml(&self, pretty: bool) -> String {
        let mut out = String::new();
        if !self.nodes.is_empty() {
            self.write_element(0, 0, pretty, &mut out);
        }
        out
    }

    fn write_element(&self, index: usize, depth: usize, pretty: bool, out: &mut String) {
        let node = &self.nodes[index];
        if pretty {
            out.push_str(&"  ".repeat(depth));
        }
        out.push('<');
        out.push_str(&node.tag);
        for (key, value) in node.attributes() {
            let _ = write!(out, " {}=\"{}\"", key, escape_attribute(&value));
        }
        if node.children.is_empty() {
            out.push_str("/>");
            if pretty {
                out.push('\n');
            }
            return;
        }
        out.push('>');
        if pretty {
            out.push('\n');
        }
        for &child in &node.children {
            self.write_element(child, depth + 1, pretty, out);
        }
        if pretty {
            out.push_str(&"  ".repeat(depth));
        }
        let _ = write!(out, "</{}>", node.tag);
        if pretty {
            out.push('\n');
        }
    }
}

/// Reads one node, or `None` when its toolkit is filtered out. The child
/// count is returned alongside.
async fn read_node(
    accessible: &Accessible,
    path: &[usize],
    parent: Option<usize>,
    config: &DriverConfig,
) -> Result<Option<(SnapshotNode, usize)>, AutomationError> {
    let toolkit = accessible.toolkit_name().await?;
    if !config.allows_toolkit(&toolkit) {
        return Ok(None);
    }
    let node = SnapshotNode {
        tag: tag_for_role(&accessible.role_name().await?),
        name: accessible.name().await?,
        role: accessible.role().await?,
        description: accessible.description().await?,
        accessible_id: accessible.accessible_id().await?,
        path: path.to_vec(),
        states: accessible.states().await?,
        parent,
        children: Vec::new(),
        subtree_end: 0,
    };
    Ok(Some((node, accessible.child_count().await?)))
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\n' => escaped.push_str("&#10;"),
            '\r' => escaped.push_str("&#13;"),
            '\t' => escaped.push_str("&#9;"),
            other => escaped.push(other),
        }
    }
    escaped
}
