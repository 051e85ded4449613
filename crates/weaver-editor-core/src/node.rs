//! Editor tree nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Stable identifier of a node within one editor.
///
/// Keys are local to a peer; they are never written to shared state.
pub type NodeKey = SmolStr;

/// Key of the permanent root element.
pub const ROOT_KEY: &str = "root";

/// Free-form node properties (format flags, heading level, image src, ...).
pub type Properties = BTreeMap<SmolStr, serde_json::Value>;

/// Structural category of a node type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Has ordered children.
    Element,
    /// Leaf holding a run of characters.
    Text,
    /// Leaf standing for a hard line break inside a block.
    LineBreak,
    /// Opaque leaf rendered by the host (images, rules, embeds).
    Decorator,
}

impl NodeKind {
    pub fn is_leaf(self) -> bool {
        !matches!(self, NodeKind::Element)
    }
}

/// Kind-specific payload of a node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeBody {
    Element { children: Vec<NodeKey> },
    Text { text: String },
    LineBreak,
    Decorator,
}

impl NodeBody {
    pub fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Element => NodeBody::Element {
                children: Vec::new(),
            },
            NodeKind::Text => NodeBody::Text {
                text: String::new(),
            },
            NodeKind::LineBreak => NodeBody::LineBreak,
            NodeKind::Decorator => NodeBody::Decorator,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeBody::Element { .. } => NodeKind::Element,
            NodeBody::Text { .. } => NodeKind::Text,
            NodeBody::LineBreak => NodeKind::LineBreak,
            NodeBody::Decorator => NodeKind::Decorator,
        }
    }
}

/// A node in the editor tree.
#[derive(Clone, Debug, PartialEq)]
pub struct EditorNode {
    pub key: NodeKey,
    pub node_type: SmolStr,
    pub parent: Option<NodeKey>,
    pub properties: Properties,
    pub body: NodeBody,
}

impl EditorNode {
    /// Create a detached node with an empty body of the given kind.
    pub fn new(key: NodeKey, node_type: SmolStr, kind: NodeKind) -> Self {
        Self {
            key,
            node_type,
            parent: None,
            properties: Properties::new(),
            body: NodeBody::empty(kind),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.body.kind()
    }

    pub fn is_element(&self) -> bool {
        matches!(self.body, NodeBody::Element { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self.body, NodeBody::Text { .. })
    }

    /// Children of an element; empty for leaves.
    pub fn children(&self) -> &[NodeKey] {
        match &self.body {
            NodeBody::Element { children } => children,
            _ => &[],
        }
    }

    /// Text of a text node.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            NodeBody::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Length in characters (NOT bytes) of a text node, 0 otherwise.
    pub fn text_len(&self) -> usize {
        self.text().map(|t| t.chars().count()).unwrap_or(0)
    }

    /// Whether two text nodes may be merged into one run.
    pub fn can_merge_with(&self, other: &EditorNode) -> bool {
        self.is_text()
            && other.is_text()
            && self.node_type == other.node_type
            && self.properties == other.properties
    }
}

/// Key-free serializable view of a subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportedNode {
    #[serde(rename = "type")]
    pub node_type: SmolStr,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExportedNode>,
}
