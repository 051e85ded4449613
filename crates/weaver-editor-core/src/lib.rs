//! weaver-editor-core: tree-shaped rich-text editor model.
//!
//! This crate provides:
//! - `EditorNode` / `NodeRegistry` - element, text, line break and decorator nodes
//! - `Editor` - transactional updates with tags, dirty tracking and listeners
//! - Normalization of adjacent text runs
//! - `UndoManager` trait for history owners

mod editor;
mod error;
mod normalize;

pub mod node;
pub mod registry;
pub mod state;
pub mod types;
pub mod undo;
pub mod update;

pub use editor::{Editor, ListenerId};
pub use error::EditorError;
pub use node::{EditorNode, ExportedNode, NodeBody, NodeKey, NodeKind, Properties, ROOT_KEY};
pub use registry::{NodeClass, NodeRegistry};
pub use smol_str::SmolStr;
pub use state::EditorState;
pub use types::{Affinity, Point, PointKind, RangeSelection};
pub use undo::UndoManager;
pub use update::{EditorUpdate, UpdateOptions, UpdatePayload, tags};
