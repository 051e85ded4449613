//! The editor: owns the current state and runs update transactions.

use std::sync::Arc;

use crate::normalize;
use crate::registry::NodeRegistry;
use crate::state::EditorState;
use crate::update::{EditorUpdate, UpdateOptions, UpdatePayload};

/// Handle returned by [`Editor::register_update_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type UpdateListener = Box<dyn FnMut(&UpdatePayload)>;

/// A tree-shaped rich-text editor.
pub struct Editor {
    state: Arc<EditorState>,
    registry: NodeRegistry,
    next_key: u64,
    listeners: Vec<(ListenerId, UpdateListener)>,
    next_listener: u64,
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Editor {
    /// Create a new editor with an empty root.
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            state: Arc::new(EditorState::new()),
            registry,
            next_key: 0,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn state(&self) -> &Arc<EditorState> {
        &self.state
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Register a listener called after every committed update.
    pub fn register_update_listener(
        &mut self,
        listener: impl FnMut(&UpdatePayload) + 'static,
    ) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_update_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        before != self.listeners.len()
    }

    /// Run `f` against a working copy of the state and commit the result.
    ///
    /// If `f` fails the working copy is discarded and listeners are not
    /// called. Updates that change nothing are not delivered either.
    pub fn update<R, E>(
        &mut self,
        options: UpdateOptions,
        f: impl FnOnce(&mut EditorUpdate<'_>) -> Result<R, E>,
    ) -> Result<R, E> {
        let mut update = EditorUpdate::new(
            (*self.state).clone(),
            &self.registry,
            &mut self.next_key,
            options.tags,
        );
        let result = f(&mut update)?;
        if !options.skip_transforms {
            normalize::normalize(&mut update);
        }
        let finished = update.finish();

        let changed = !finished.dirty_elements.is_empty()
            || !finished.dirty_leaves.is_empty()
            || !finished.normalized.is_empty()
            || finished.state.selection != self.state.selection;
        if !changed {
            return Ok(result);
        }

        let prev_state = std::mem::replace(&mut self.state, Arc::new(finished.state));
        let payload = UpdatePayload {
            prev_state,
            next_state: self.state.clone(),
            dirty_elements: finished.dirty_elements,
            dirty_leaves: finished.dirty_leaves,
            normalized_nodes: finished.normalized,
            tags: finished.tags,
        };
        tracing::trace!(
            dirty_elements = payload.dirty_elements.len(),
            dirty_leaves = payload.dirty_leaves.len(),
            normalized = payload.normalized_nodes.len(),
            tags = ?payload.tags,
            "committing editor update"
        );
        for (_, listener) in self.listeners.iter_mut() {
            listener(&payload);
        }
        Ok(result)
    }
}
