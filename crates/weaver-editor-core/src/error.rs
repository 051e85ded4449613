//! Error types for editor updates.

use smol_str::SmolStr;
use thiserror::Error;

use crate::node::{NodeKey, NodeKind};

/// Errors raised by mutation primitives inside an editor update.
///
/// Any error returned from an update closure discards the whole update.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EditorError {
    /// No node with this key exists in the working state.
    #[error("node {0} not found")]
    NodeNotFound(NodeKey),

    /// The node exists but is not of the kind the operation needs.
    #[error("node {key} is a {actual:?} node, expected {expected:?}")]
    WrongKind {
        key: NodeKey,
        expected: NodeKind,
        actual: NodeKind,
    },

    /// The node type was never registered with the editor.
    #[error("node type {0:?} is not registered")]
    UnregisteredType(SmolStr),

    /// Child index past the end of the children list.
    #[error("index {index} out of bounds for {len} children of {parent}")]
    IndexOutOfBounds {
        parent: NodeKey,
        index: usize,
        len: usize,
    },

    /// Character offset past the end of a text node.
    #[error("offset {offset} out of bounds for text node {key} of length {len}")]
    OffsetOutOfBounds {
        key: NodeKey,
        offset: usize,
        len: usize,
    },

    /// A node cannot become its own ancestor.
    #[error("cannot attach {child} below its own descendant {parent}")]
    Cycle { parent: NodeKey, child: NodeKey },

    /// The root node is permanent.
    #[error("the root node cannot be removed or re-parented")]
    RootIsPermanent,
}
