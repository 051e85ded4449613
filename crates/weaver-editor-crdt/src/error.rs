//! Error types for CRDT operations.

use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;
use weaver_editor_core::{EditorError, NodeKey};

use crate::config::ConfigError;

/// Errors that can occur while binding an editor to a shared document.
#[derive(Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum CrdtError {
    /// Failed to import CRDT data. Local state is unchanged.
    #[error("failed to import CRDT data: {0}")]
    #[diagnostic(code(weaver::crdt::import))]
    Import(String),

    /// Failed to export CRDT data.
    #[error("failed to export CRDT data: {0}")]
    #[diagnostic(code(weaver::crdt::export))]
    Export(String),

    /// Loro CRDT error.
    #[error("loro error: {0}")]
    #[diagnostic(code(weaver::crdt::loro))]
    Loro(String),

    /// A peer created a node whose type this editor does not know.
    #[error("node type {node_type:?} is not registered with the editor")]
    #[diagnostic(
        code(weaver::crdt::unregistered_type),
        help("register the node type on every peer before joining the session")
    )]
    UnregisteredNodeType { node_type: SmolStr },

    /// A shared container does not have the shape of a node record.
    #[error("malformed shared node {container}: {reason}")]
    #[diagnostic(code(weaver::crdt::malformed))]
    MalformedNode { container: String, reason: String },

    /// The shadow tree has no entry for an editor node it should mirror.
    #[error("no shadow node for {0}")]
    #[diagnostic(code(weaver::crdt::missing_shadow))]
    MissingShadow(NodeKey),

    /// A property value cannot be represented in the shared document.
    #[error("property {property:?} cannot be stored: {reason}")]
    #[diagnostic(code(weaver::crdt::unsupported_value))]
    UnsupportedValue { property: SmolStr, reason: String },

    /// A remote batch failed to apply, so the editor no longer matches the
    /// document. Local edits are no longer mirrored.
    #[error("binding is out of sync with the shared document: {reason}")]
    #[diagnostic(
        code(weaver::crdt::desynchronized),
        help("rebuild the session from a fresh snapshot")
    )]
    Desynchronized { reason: String },

    /// Presence payload could not be encoded or decoded.
    #[error("presence payload error: {0}")]
    #[diagnostic(code(weaver::crdt::presence))]
    Presence(#[from] postcard::Error),

    #[error(transparent)]
    #[diagnostic(code(weaver::crdt::editor))]
    Editor(#[from] EditorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl CrdtError {
    /// Configuration errors and a desynchronized binding cannot be recovered
    /// from by retrying; the session has to be rebuilt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrdtError::UnregisteredNodeType { .. }
                | CrdtError::Desynchronized { .. }
                | CrdtError::Config(_)
        )
    }
}

impl From<loro::LoroError> for CrdtError {
    fn from(e: loro::LoroError) -> Self {
        CrdtError::Loro(e.to_string())
    }
}
