//! Collaboration session: one editor, one shared document, one update queue.
//!
//! Editor updates and document change batches are both queued and drained by
//! [`CollabSession::pump`], so the two sync directions never interleave. Every
//! public mutating call pumps before returning.

use std::collections::HashMap;
use std::sync::Arc;

use loro::event::DiffEvent;
use loro::{ExportMode, LoroDoc, Subscription, VersionVector};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, info};
use weaver_editor_core::{
    Editor, EditorError, EditorUpdate, ListenerId, NodeRegistry, Point, ROOT_KEY, RangeSelection,
    UndoManager, UpdateOptions, UpdatePayload, tags,
};

use crate::binding::{Binding, CursorSelection, CursorState};
use crate::config::CollabConfig;
use crate::debug::DebugContext;
use crate::error::CrdtError;
use crate::position::SavedSelection;
use crate::presence::{PresenceChange, PresenceStore, UserState, color_for_peer};
use crate::remote::{ChangeBatch, ChangeOrigin};
use crate::undo::CollabUndo;

/// Drives a [`Binding`] between an [`Editor`] and a [`LoroDoc`].
pub struct CollabSession {
    editor: Editor,
    binding: Binding,
    undo: CollabUndo,
    presence: PresenceStore,
    config: CollabConfig,
    local_rx: UnboundedReceiver<UpdatePayload>,
    remote_rx: UnboundedReceiver<ChangeBatch>,
    /// Selection captured right before the document changed underneath it.
    saved_selection: Option<SavedSelection>,
    last_exported: VersionVector,
    listener: ListenerId,
    _subscription: Subscription,
}

impl std::fmt::Debug for CollabSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabSession")
            .field("peer", &self.binding.client_id())
            .field("editor", &self.editor)
            .field("undo", &self.undo)
            .field("presence", &self.presence)
            .finish_non_exhaustive()
    }
}

impl CollabSession {
    /// Start a session over a fresh document.
    pub fn new(config: CollabConfig, registry: NodeRegistry) -> Result<Self, CrdtError> {
        Self::with_doc(LoroDoc::new(), config, registry)
    }

    /// Start a session over an existing document, e.g. one loaded from a
    /// snapshot. Call [`CollabSession::bootstrap`] before editing.
    pub fn with_doc(
        doc: LoroDoc,
        config: CollabConfig,
        registry: NodeRegistry,
    ) -> Result<Self, CrdtError> {
        if let Some(peer) = config.peer_id {
            doc.set_peer_id(peer)?;
        }

        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let subscription = doc.subscribe_root(Arc::new(move |event: DiffEvent<'_>| {
            let _ = remote_tx.send(ChangeBatch::from_event(&event));
        }));

        let mut editor = Editor::new(registry);
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let listener = editor.register_update_listener(move |payload| {
            let _ = local_tx.send(payload.clone());
        });

        let undo = CollabUndo::new(&doc, &config);
        let binding = Binding::new(doc, &config, DebugContext::new(config.debug));
        let presence = PresenceStore::new(binding.client_id(), config.presence_timeout());
        info!(peer = binding.client_id(), "collaboration session created");

        Ok(Self {
            editor,
            binding,
            undo,
            presence,
            config,
            local_rx,
            remote_rx,
            saved_selection: None,
            last_exported: VersionVector::default(),
            listener,
            _subscription: subscription,
        })
    }

    /// Bring the editor in line with the document.
    ///
    /// An empty document gets one default block, committed under an
    /// internal origin so it is not undoable. Otherwise the editor is
    /// rebuilt from the shared tree.
    pub fn bootstrap(&mut self) -> Result<(), CrdtError> {
        self.pump()?;
        if self.binding.is_shared_empty() {
            let block_type = self.config.default_block_type.clone();
            debug!(%block_type, "initializing empty document");
            self.editor
                .update(UpdateOptions::tagged(tags::COLLAB_BOOTSTRAP), |update| {
                    let block = update.create_node(&block_type)?;
                    update.append_child(ROOT_KEY, &block)?;
                    update.set_selection(Some(RangeSelection::collapsed(Point::element(block, 0))));
                    Ok::<_, EditorError>(())
                })?;
        } else {
            debug!("deriving editor from existing document");
            let batch = ChangeBatch::full(&self.binding);
            self.binding.sync_remote_batch(&mut self.editor, &batch, None)?;
        }
        self.pump()
    }

    /// Run a local editor update and sync it to the document.
    pub fn update<R>(
        &mut self,
        options: UpdateOptions,
        f: impl FnOnce(&mut EditorUpdate<'_>) -> Result<R, EditorError>,
    ) -> Result<R, CrdtError> {
        let result = self.editor.update(options, f)?;
        self.pump()?;
        Ok(result)
    }

    /// Drain both queues until neither has work left.
    ///
    /// Local payloads go first so the shadow tree matches the editor before
    /// any remote batch is applied on top of it.
    pub fn pump(&mut self) -> Result<(), CrdtError> {
        loop {
            while let Ok(payload) = self.local_rx.try_recv() {
                if let Err(e) = self.binding.sync_local_update(&payload) {
                    self.saved_selection = None;
                    return Err(e);
                }
            }
            let Ok(batch) = self.remote_rx.try_recv() else {
                break;
            };
            if batch.origin == ChangeOrigin::Own {
                continue;
            }
            let saved = match self.saved_selection.take() {
                Some(saved) => Some(saved),
                None => self.binding.capture_selection(self.editor.state()),
            };
            if let Err(e) = self
                .binding
                .sync_remote_batch(&mut self.editor, &batch, saved.as_ref())
            {
                self.saved_selection = None;
                return Err(e);
            }
        }
        self.saved_selection = None;
        self.refresh_remote_cursors();
        Ok(())
    }

    /// Import updates or a snapshot from another peer.
    ///
    /// Malformed bytes fail this call only; the editor and document stay as
    /// of the last successful import.
    pub fn import(&mut self, bytes: &[u8]) -> Result<(), CrdtError> {
        self.pump()?;
        self.saved_selection = self.binding.capture_selection(self.editor.state());
        if let Err(e) = self.binding.doc().import(bytes) {
            self.saved_selection = None;
            return Err(CrdtError::Import(e.to_string()));
        }
        self.pump()
    }

    /// Everything since the previous call to this method.
    pub fn export_updates(&mut self) -> Result<Vec<u8>, CrdtError> {
        let bytes = self.export_from(&self.last_exported)?;
        self.last_exported = self.version();
        Ok(bytes)
    }

    pub fn export_from(&self, version: &VersionVector) -> Result<Vec<u8>, CrdtError> {
        self.binding
            .doc()
            .export(ExportMode::updates(version))
            .map_err(|e| CrdtError::Export(e.to_string()))
    }

    pub fn export_snapshot(&self) -> Result<Vec<u8>, CrdtError> {
        self.binding
            .doc()
            .export(ExportMode::Snapshot)
            .map_err(|e| CrdtError::Export(e.to_string()))
    }

    pub fn version(&self) -> VersionVector {
        self.binding.doc().oplog_vv()
    }

    /// Revert this peer's most recent change. Remote changes are untouched.
    pub fn undo(&mut self) -> Result<bool, CrdtError> {
        self.pump()?;
        self.saved_selection = self.binding.capture_selection(self.editor.state());
        let undone = self.undo.undo()?;
        self.pump()?;
        Ok(undone)
    }

    pub fn redo(&mut self) -> Result<bool, CrdtError> {
        self.pump()?;
        self.saved_selection = self.binding.capture_selection(self.editor.state());
        let redone = self.undo.redo()?;
        self.pump()?;
        Ok(redone)
    }

    pub fn selection(&self) -> Option<RangeSelection> {
        self.editor.state().selection().cloned()
    }

    pub fn set_selection(&mut self, selection: Option<RangeSelection>) -> Result<(), CrdtError> {
        self.update(UpdateOptions::tagged(tags::SKIP_SCROLL_INTO_VIEW), |update| {
            update.set_selection(selection);
            Ok(())
        })
    }

    /// Encode the local selection as a presence message.
    pub fn local_presence_update(&mut self) -> Result<Vec<u8>, CrdtError> {
        let mut state = self.presence.local_state().cloned().unwrap_or_else(|| {
            let peer = self.binding.client_id();
            UserState::new(
                self.config.user_name.clone(),
                self.config.user_color.unwrap_or_else(|| color_for_peer(peer)),
            )
        });
        match self.editor.state().selection() {
            Some(selection) => {
                let (anchor, focus) = self.binding.encode_selection(selection);
                state.anchor_pos = anchor;
                state.focus_pos = focus;
                state.focusing = true;
            }
            None => {
                state.anchor_pos = None;
                state.focus_pos = None;
                state.focusing = false;
            }
        }
        self.presence.set_local_state(Some(state)).to_bytes()
    }

    /// Announce that this peer is leaving.
    pub fn leave_presence(&mut self) -> Result<Vec<u8>, CrdtError> {
        self.presence.set_local_state(None).to_bytes()
    }

    /// Apply a presence message from another peer.
    pub fn apply_presence(&mut self, bytes: &[u8]) -> Result<PresenceChange, CrdtError> {
        let change = self.presence.apply(bytes)?;
        self.refresh_remote_cursors();
        Ok(change)
    }

    /// Drop expired peers, then re-resolve every remote cursor against the
    /// current tree. Unresolvable positions leave the cursor without a
    /// selection.
    pub fn refresh_remote_cursors(&mut self) {
        let expired = self.presence.remove_outdated();
        if !expired.is_empty() {
            debug!(?expired, "dropping expired collaborators");
        }
        let mut cursors = HashMap::with_capacity(self.presence.len());
        for (peer, state) in self.presence.states() {
            let anchor = state.anchor_pos.as_ref().and_then(|p| self.binding.decode_point(p));
            let focus = state.focus_pos.as_ref().and_then(|p| self.binding.decode_point(p));
            let selection = match (anchor, focus) {
                (Some(anchor), Some(focus)) => Some(CursorSelection { anchor, focus }),
                _ => None,
            };
            cursors.insert(
                peer,
                CursorState {
                    name: state.name.clone(),
                    color: state.color,
                    selection,
                },
            );
        }
        self.binding.cursors = cursors;
    }

    pub fn remote_cursors(&self) -> &HashMap<u64, CursorState> {
        self.binding.cursors()
    }

    pub fn presence(&self) -> &PresenceStore {
        &self.presence
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    /// Detach from the editor and return it. The document subscription is
    /// dropped with the session.
    pub fn into_editor(mut self) -> Editor {
        self.editor.remove_update_listener(self.listener);
        self.editor
    }
}

impl UndoManager for CollabSession {
    fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    fn undo(&mut self) -> bool {
        CollabSession::undo(self).unwrap_or_else(|e| {
            error!(error = %e, "undo failed");
            false
        })
    }

    fn redo(&mut self) -> bool {
        CollabSession::redo(self).unwrap_or_else(|e| {
            error!(error = %e, "redo failed");
            false
        })
    }

    fn clear_history(&mut self) {
        self.undo.clear();
    }
}
