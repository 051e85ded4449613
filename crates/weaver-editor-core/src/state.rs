//! Immutable snapshot of an editor's tree and selection.

use std::collections::HashMap;

use crate::node::{EditorNode, ExportedNode, NodeBody, NodeKey, NodeKind, ROOT_KEY};
use crate::registry::ROOT_TYPE;
use crate::types::RangeSelection;

/// The node map and selection at one point in time.
///
/// States are produced by [`crate::Editor::update`] and handed to listeners
/// behind an `Arc`; they are never mutated after commit.
#[derive(Clone, Debug, PartialEq)]
pub struct EditorState {
    pub(crate) nodes: HashMap<NodeKey, EditorNode>,
    pub(crate) selection: Option<RangeSelection>,
}

impl Default for EditorState {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorState {
    /// Create a state holding only an empty root.
    pub fn new() -> Self {
        let root = EditorNode::new(ROOT_KEY.into(), ROOT_TYPE.into(), NodeKind::Element);
        let mut nodes = HashMap::new();
        nodes.insert(root.key.clone(), root);
        Self {
            nodes,
            selection: None,
        }
    }

    pub fn node(&self, key: &str) -> Option<&EditorNode> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// Children of `key`, empty when the node is missing or a leaf.
    pub fn children(&self, key: &str) -> &[NodeKey] {
        self.nodes.get(key).map(|n| n.children()).unwrap_or(&[])
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children(ROOT_KEY).is_empty()
    }

    pub fn selection(&self) -> Option<&RangeSelection> {
        self.selection.as_ref()
    }

    /// Position of `key` among its parent's children.
    pub fn index_in_parent(&self, key: &str) -> Option<usize> {
        let parent = self.nodes.get(key)?.parent.as_ref()?;
        self.children(parent).iter().position(|k| k == key)
    }

    /// The child of the root that contains `key` (or `key` itself).
    pub fn top_level_block(&self, key: &str) -> Option<&NodeKey> {
        let mut current = self.nodes.get(key)?;
        loop {
            match current.parent.as_deref() {
                Some(ROOT_KEY) => return Some(&current.key),
                Some(parent) => current = self.nodes.get(parent)?,
                None => return None,
            }
        }
    }

    /// Whether `ancestor` is `key` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: &str, key: &str) -> bool {
        let mut current = Some(key);
        while let Some(k) = current {
            if k == ancestor {
                return true;
            }
            current = self.nodes.get(k).and_then(|n| n.parent.as_deref());
        }
        false
    }

    /// Plain text of a subtree. Top-level blocks are separated by a blank line.
    pub fn text_content(&self) -> String {
        self.children(ROOT_KEY)
            .iter()
            .map(|block| self.node_text(block))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn node_text(&self, key: &str) -> String {
        let Some(node) = self.nodes.get(key) else {
            return String::new();
        };
        match &node.body {
            NodeBody::Text { text } => text.clone(),
            NodeBody::LineBreak => "\n".to_string(),
            NodeBody::Decorator => String::new(),
            NodeBody::Element { children } => {
                children.iter().map(|c| self.node_text(c)).collect()
            }
        }
    }

    /// Key-free export of the subtree rooted at `key`.
    pub fn export_node(&self, key: &str) -> Option<ExportedNode> {
        let node = self.nodes.get(key)?;
        Some(ExportedNode {
            node_type: node.node_type.clone(),
            properties: node.properties.clone(),
            text: node.text().map(str::to_string),
            children: node
                .children()
                .iter()
                .filter_map(|c| self.export_node(c))
                .collect(),
        })
    }

    /// Key-free export of the whole document.
    pub fn export(&self) -> Option<ExportedNode> {
        self.export_node(ROOT_KEY)
    }
}
