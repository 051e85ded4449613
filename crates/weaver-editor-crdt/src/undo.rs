//! Commit origins and peer-scoped undo.

use loro::{LoroDoc, UndoManager as LoroUndoManager};

use crate::config::CollabConfig;
use crate::error::CrdtError;

/// Origin of commits made by the local sync path.
pub const ORIGIN_LOCAL: &str = "local";
/// Prefix of binding-internal commits; never recorded for undo.
pub const SYSTEM_ORIGIN_PREFIX: &str = "sys:";
/// Initial content of a fresh document.
pub const ORIGIN_INIT: &str = "sys:init";
/// Structural repairs (orphan runs, empty root).
pub const ORIGIN_REPAIR: &str = "sys:repair";

/// Whether a local commit origin came from this binding.
pub fn is_binding_origin(origin: &str) -> bool {
    origin == ORIGIN_LOCAL || origin.starts_with(SYSTEM_ORIGIN_PREFIX)
}

/// Undo stack over this peer's own commits.
///
/// Loro's undo manager only records local changes, so imported remote edits
/// are never undone. Binding-internal commits are excluded by origin prefix.
pub struct CollabUndo {
    doc: LoroDoc,
    manager: LoroUndoManager,
    merge_interval_ms: i64,
    max_steps: usize,
}

impl std::fmt::Debug for CollabUndo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabUndo")
            .field("can_undo", &self.manager.can_undo())
            .field("can_redo", &self.manager.can_redo())
            .finish()
    }
}

impl CollabUndo {
    pub fn new(doc: &LoroDoc, config: &CollabConfig) -> Self {
        let merge_interval_ms = config.undo_merge_interval_ms;
        let max_steps = config.max_undo_steps;
        Self {
            doc: doc.clone(),
            manager: Self::build(doc, merge_interval_ms, max_steps),
            merge_interval_ms,
            max_steps,
        }
    }

    fn build(doc: &LoroDoc, merge_interval_ms: i64, max_steps: usize) -> LoroUndoManager {
        let mut manager = LoroUndoManager::new(doc);
        manager.set_merge_interval(merge_interval_ms);
        manager.set_max_undo_steps(max_steps);
        manager.add_exclude_origin_prefix(SYSTEM_ORIGIN_PREFIX);
        manager
    }

    pub fn can_undo(&self) -> bool {
        self.manager.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.manager.can_redo()
    }

    /// Revert the most recent local step. The resulting change reaches the
    /// editor through the document subscription like any other change.
    pub fn undo(&mut self) -> Result<bool, CrdtError> {
        Ok(self.manager.undo()?)
    }

    pub fn redo(&mut self) -> Result<bool, CrdtError> {
        Ok(self.manager.redo()?)
    }

    /// Drop all history.
    pub fn clear(&mut self) {
        self.manager = Self::build(&self.doc, self.merge_interval_ms, self.max_steps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_origins() {
        assert!(is_binding_origin(ORIGIN_LOCAL));
        assert!(is_binding_origin(ORIGIN_INIT));
        assert!(is_binding_origin(ORIGIN_REPAIR));
        assert!(!is_binding_origin(""));
        assert!(!is_binding_origin("undo"));
    }

    #[test]
    fn test_excluded_origins_not_undoable() {
        let doc = LoroDoc::new();
        let mut undo = CollabUndo::new(
            &doc,
            &CollabConfig {
                undo_merge_interval_ms: 0,
                ..Default::default()
            },
        );
        let text = doc.get_text("t");
        text.insert(0, "init").unwrap();
        doc.set_next_commit_origin(ORIGIN_INIT);
        doc.commit();
        assert!(!undo.can_undo());

        text.insert(4, "!").unwrap();
        doc.set_next_commit_origin(ORIGIN_LOCAL);
        doc.commit();
        assert!(undo.can_undo());
        assert!(undo.undo().unwrap());
        assert_eq!(text.to_string(), "init");
    }
}
