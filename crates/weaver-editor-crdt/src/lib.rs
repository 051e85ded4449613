//! Bidirectional sync between the weaver editor tree and a Loro document.
//!
//! This crate provides:
//! - `Binding`: shadow tree plus both sync directions (editor → document and
//!   document → editor)
//! - Stable position references for selections and remote cursors
//! - Peer-scoped undo that never reverts remote edits
//! - Ephemeral presence with per-peer clocks and expiry
//! - `CollabSession`: the driver that serializes both directions through one
//!   queue
//!
//! Each editor node is stored as a map holding its type and properties.
//! Elements additionally own a text stream with one marker character per
//! child, followed by the characters of text children, and a list holding
//! the child maps.

mod binding;
mod config;
mod debug;
mod diff;
mod error;
mod local;
mod position;
mod remote;
mod session;

pub mod presence;
pub mod shadow;
pub mod shared;
pub mod undo;

pub use binding::{Binding, CursorSelection, CursorState};
pub use config::{CollabConfig, ConfigError};
pub use debug::{DebugContext, SyncDirection, SyncTrace};
pub use diff::{TextDiff, text_diff};
pub use error::CrdtError;
pub use position::{PositionRef, SavedSelection};
pub use presence::{PresenceChange, PresenceStore, PresenceUpdate, UserState, color_for_peer};
pub use remote::{ChangeBatch, ChangeOrigin};
pub use session::CollabSession;
pub use shadow::{ShadowNode, ShadowTree, ShadowVariant};
pub use undo::CollabUndo;

// Re-export Loro types that consumers need
pub use loro::{ExportMode, LoroDoc, VersionVector};
