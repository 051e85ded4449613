//! Local → shared: mirror committed editor updates into the document.

use std::collections::{HashMap, HashSet};

use loro::LoroValue;
use smol_str::SmolStr;
use tracing::{debug, trace, warn};
use weaver_editor_core::{
    EditorError, EditorNode, EditorState, NodeKey, NodeKind, ROOT_KEY, UpdatePayload, tags,
};

use crate::binding::Binding;
use crate::debug::SyncDirection;
use crate::diff::text_diff;
use crate::error::CrdtError;
use crate::shared::{AttrMap, SharedMap, SharedSequence, to_loro_value};
use crate::undo::{ORIGIN_INIT, ORIGIN_LOCAL, ORIGIN_REPAIR};

impl Binding {
    /// Mirror one committed editor update into the shared document.
    ///
    /// Updates that were themselves produced from remote or undo changes are
    /// skipped, except for their normalization side effects. Returns whether
    /// anything was committed. Fails with `Desynchronized` once a remote
    /// batch could not be applied.
    pub fn sync_local_update(&mut self, payload: &UpdatePayload) -> Result<bool, CrdtError> {
        let from_shared = payload.has_tag(tags::COLLABORATION) || payload.has_tag(tags::HISTORIC);
        if from_shared && payload.normalized_nodes.is_empty() {
            trace!(tags = ?payload.tags, "skipping update that originated from shared state");
            return Ok(false);
        }
        if let Some(reason) = &self.desynced {
            warn!(%reason, "refusing to mirror local update");
            return Err(CrdtError::Desynchronized {
                reason: reason.clone(),
            });
        }

        let state = payload.next_state.as_ref();
        let mut writes = 0;
        if !payload.normalized_nodes.is_empty() {
            writes += self.reconcile_normalized(state, &payload.normalized_nodes)?;
        }
        if !from_shared && payload.dirty_elements.contains(ROOT_KEY) {
            writes += self.sync_element(state, ROOT_KEY, payload)?;
        }
        if writes == 0 {
            return Ok(false);
        }

        let origin = if payload.has_tag(tags::COLLAB_BOOTSTRAP) {
            ORIGIN_INIT
        } else if payload.has_tag(tags::COLLAB_REPAIR) {
            ORIGIN_REPAIR
        } else {
            ORIGIN_LOCAL
        };
        debug!(writes, origin, "committing local update");
        self.commit(origin, SyncDirection::LocalToShared, writes);
        Ok(true)
    }

    /// Fold text nodes merged away by normalization into their survivors.
    ///
    /// Survivors keep their marker and absorb the runs of removed siblings.
    /// Removed nodes lose their marker first and are detached only after all
    /// of them were processed, so offsets stay consistent throughout.
    fn reconcile_normalized(
        &mut self,
        state: &EditorState,
        keys: &HashSet<NodeKey>,
    ) -> Result<usize, CrdtError> {
        let mut removed: Vec<NodeKey> = keys
            .iter()
            .filter(|key| self.tree.get(key).is_some_and(|n| n.is_text()))
            .filter(|key| !state.node(key).is_some_and(|n| n.is_text()))
            .cloned()
            .collect();
        if removed.is_empty() {
            return Ok(0);
        }
        removed.sort_by_key(|key| {
            let parent = self.tree.get(key).and_then(|n| n.parent.clone());
            (parent, self.tree.offset(key))
        });
        let removed_set: HashSet<NodeKey> = removed.iter().cloned().collect();

        let mut writes = 0;
        let mut absorbed: HashMap<NodeKey, String> = HashMap::new();
        for key in &removed {
            let (Some(offset), Some(parent)) = (
                self.tree.offset(key),
                self.tree.get(key).and_then(|n| n.parent.clone()),
            ) else {
                debug!(%key, "normalized node not attached in shadow tree");
                continue;
            };
            let (stream, _, _) = self.tree.element_parts(&parent)?;
            stream.delete(offset, 1)?;
            writes += 1;

            let text = self.tree.mark_normalized(key).unwrap_or_default();
            if text.is_empty() {
                continue;
            }
            match self.tree.preceding_text_sibling(key, &removed_set) {
                Some(survivor) => absorbed.entry(survivor).or_default().push_str(&text),
                None => {
                    debug!(%key, "dropping run with no preceding text sibling");
                    stream.delete(offset, text.chars().count())?;
                    self.tree.set_text(key, "");
                }
            }
        }

        for key in &removed {
            self.tree.discard(key)?;
            writes += 1;
        }
        for (survivor, text) in absorbed {
            trace!(%survivor, absorbed = text.len(), "absorbing normalized run");
            self.tree.push_text(&survivor, &text);
        }
        Ok(writes)
    }

    /// Diff an element's properties and children against its shadow.
    fn sync_element(
        &mut self,
        state: &EditorState,
        key: &str,
        payload: &UpdatePayload,
    ) -> Result<usize, CrdtError> {
        let node = state
            .node(key)
            .ok_or_else(|| EditorError::NodeNotFound(key.into()))?;
        let mut writes = self.sync_properties(node)?;
        let next = node.children();
        let wanted: HashSet<&NodeKey> = next.iter().collect();

        let current = self.tree.children(key).to_vec();
        for (index, child) in current.iter().enumerate().rev() {
            if !wanted.contains(child) {
                trace!(parent = %key, %child, "removing child");
                self.tree.splice(key, index, 1, None)?;
                writes += 1;
            }
        }

        for (index, child) in next.iter().enumerate() {
            let current = self.tree.children(key);
            if current.get(index) == Some(child) {
                if payload.is_dirty(child) || self.text_drifted(state, child) {
                    writes += self.sync_node(state, child, payload)?;
                }
                continue;
            }
            writes += self.create_shadow(state, key, child)?;
            self.tree.splice(key, index, 0, Some(child))?;
            writes += 1;
        }
        Ok(writes)
    }

    /// A text child whose shadow absorbed a normalized run that the editor
    /// merged elsewhere.
    fn text_drifted(&self, state: &EditorState, key: &str) -> bool {
        match (self.tree.text(key), state.node(key).and_then(|n| n.text())) {
            (Some(shadow), Some(editor)) => shadow != editor,
            _ => false,
        }
    }

    fn sync_node(
        &mut self,
        state: &EditorState,
        key: &str,
        payload: &UpdatePayload,
    ) -> Result<usize, CrdtError> {
        let node = state
            .node(key)
            .ok_or_else(|| EditorError::NodeNotFound(key.into()))?;
        let kind = self
            .tree
            .get(key)
            .map(|n| n.kind())
            .ok_or_else(|| CrdtError::MissingShadow(key.into()))?;
        match kind {
            NodeKind::Element => self.sync_element(state, key, payload),
            NodeKind::Text => Ok(self.sync_text(node)? + self.sync_properties(node)?),
            NodeKind::Decorator => self.sync_properties(node),
            NodeKind::LineBreak => Ok(0),
        }
    }

    /// Apply a text change as one splice into the parent stream.
    fn sync_text(&mut self, node: &EditorNode) -> Result<usize, CrdtError> {
        let Some(next) = node.text() else {
            return Ok(0);
        };
        let Some(prev) = self.tree.text(&node.key) else {
            return Err(CrdtError::MissingShadow(node.key.clone()));
        };
        if prev == next {
            return Ok(0);
        }
        let diff = text_diff(prev, next);
        let (Some(offset), Some(parent)) = (
            self.tree.offset(&node.key),
            self.tree.get(&node.key).and_then(|n| n.parent.clone()),
        ) else {
            warn!(key = %node.key, "text node not attached in shadow tree");
            return Ok(0);
        };
        let (stream, _, _) = self.tree.element_parts(&parent)?;
        let at = offset + 1 + diff.index;
        stream.delete(at, diff.remove)?;
        stream.insert(at, &diff.insert)?;
        self.tree.set_text(&node.key, next);
        Ok(1)
    }

    /// Write changed mirrored properties. Values that cannot be stored are
    /// skipped with a warning.
    fn sync_properties(&mut self, node: &EditorNode) -> Result<usize, CrdtError> {
        let attrs = self
            .tree
            .get(&node.key)
            .map(|n| n.attrs.clone())
            .ok_or_else(|| CrdtError::MissingShadow(node.key.clone()))?;
        let mut writes = 0;
        for name in self.mirrored_properties(node) {
            let current = attrs.get(&name);
            match node.properties.get(&name) {
                Some(value) if current.as_ref() != Some(value) => {
                    match attrs.set(&name, value) {
                        Ok(()) => writes += 1,
                        Err(e) => warn!(key = %node.key, property = %name, error = %e, "skipping property"),
                    }
                }
                None if current.is_some() => {
                    attrs.delete(&name)?;
                    writes += 1;
                }
                _ => {}
            }
        }
        Ok(writes)
    }

    /// Create shared records for a new editor subtree. The subtree root is
    /// registered but not yet placed in its parent's stream.
    ///
    /// A node that is still mirrored elsewhere (it moved) is removed from its
    /// old position first and recreated.
    fn create_shadow(
        &mut self,
        state: &EditorState,
        parent: &str,
        key: &str,
    ) -> Result<usize, CrdtError> {
        let node = state
            .node(key)
            .ok_or_else(|| EditorError::NodeNotFound(key.into()))?;
        let mut writes = 0;
        if let Some(old_parent) = self.tree.get(key).and_then(|n| n.parent.clone()) {
            if let Some(from) = self.tree.children(&old_parent).iter().position(|k| k == key) {
                trace!(%key, from = %old_parent, to = %parent, "recreating moved node");
                self.tree.splice(&old_parent, from, 1, None)?;
                writes += 1;
            }
        }
        let attrs = self
            .tree
            .create_child(parent, key, &node.node_type, node.kind())?;
        writes += 1 + self.write_record(&attrs, node);

        match node.kind() {
            NodeKind::Text => {
                self.tree.set_text(key, node.text().unwrap_or_default());
            }
            NodeKind::Element => {
                for child in node.children() {
                    writes += self.create_shadow(state, key, child)?;
                    self.tree.append(key, child)?;
                    writes += 1;
                }
            }
            NodeKind::LineBreak | NodeKind::Decorator => {}
        }
        Ok(writes)
    }

    /// Write all mirrored properties of a new node.
    ///
    /// If any value cannot be converted the record stays degraded (type
    /// only) and the rest of the batch carries on.
    fn write_record(&mut self, attrs: &AttrMap, node: &EditorNode) -> usize {
        let names = self.mirrored_properties(node);
        let converted: Result<Vec<(SmolStr, LoroValue)>, CrdtError> = names
            .into_iter()
            .filter_map(|name| node.properties.get(&name).map(|v| (name, v)))
            .map(|(name, value)| Ok((name.clone(), to_loro_value(&name, value)?)))
            .collect();
        let values = match converted {
            Ok(values) => values,
            Err(e) => {
                warn!(key = %node.key, node_type = %node.node_type, error = %e, "writing degraded node record");
                return 0;
            }
        };
        let mut writes = 0;
        for (name, value) in values {
            match attrs.set_value(&name, value) {
                Ok(()) => writes += 1,
                Err(e) => warn!(key = %node.key, property = %name, error = %e, "skipping property"),
            }
        }
        writes
    }
}
