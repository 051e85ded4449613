//! Update transactions: options, tags, mutation primitives and payloads.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use smol_str::{SmolStr, format_smolstr};

use crate::error::EditorError;
use crate::node::{EditorNode, NodeBody, NodeKey, NodeKind, ROOT_KEY};
use crate::registry::{NodeRegistry, TEXT_TYPE};
use crate::state::EditorState;
use crate::types::RangeSelection;

/// Well-known update tags.
pub mod tags {
    /// Update applied on behalf of a remote peer.
    pub const COLLABORATION: &str = "collaboration";
    /// Update replaying undo/redo history.
    pub const HISTORIC: &str = "historic";
    /// Hosts should not scroll the caret into view for this update.
    pub const SKIP_SCROLL_INTO_VIEW: &str = "skip-scroll-into-view";
    /// Structural repair issued by the collaboration layer.
    pub const COLLAB_REPAIR: &str = "collab-repair";
    /// Initial content created when a fresh shared document is opened.
    pub const COLLAB_BOOTSTRAP: &str = "collab-bootstrap";
}

/// Options for a single [`crate::Editor::update`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub tags: BTreeSet<SmolStr>,
    /// Skip the normalization pass.
    pub skip_transforms: bool,
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tagged(tag: &str) -> Self {
        Self::default().with_tag(tag)
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(SmolStr::new(tag));
        self
    }

    pub fn skip_transforms(mut self) -> Self {
        self.skip_transforms = true;
        self
    }
}

/// What changed in a committed update. Delivered to update listeners.
#[derive(Clone, Debug)]
pub struct UpdatePayload {
    pub prev_state: Arc<EditorState>,
    pub next_state: Arc<EditorState>,
    /// Elements that changed, or had a descendant change.
    pub dirty_elements: HashSet<NodeKey>,
    /// Leaves that were created or changed.
    pub dirty_leaves: HashSet<NodeKey>,
    /// Text nodes merged or removed by normalization, plus the survivors
    /// that absorbed them.
    pub normalized_nodes: HashSet<NodeKey>,
    pub tags: BTreeSet<SmolStr>,
}

impl UpdatePayload {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_dirty(&self, key: &str) -> bool {
        self.dirty_elements.contains(key) || self.dirty_leaves.contains(key)
    }
}

/// Mutable view handed to update closures.
///
/// All changes are made to a working copy of the state; nothing is visible
/// outside until the closure returns successfully.
pub struct EditorUpdate<'a> {
    pub(crate) state: EditorState,
    registry: &'a NodeRegistry,
    next_key: &'a mut u64,
    pub(crate) dirty_elements: HashSet<NodeKey>,
    pub(crate) dirty_leaves: HashSet<NodeKey>,
    pub(crate) normalized: HashSet<NodeKey>,
    pub(crate) tags: BTreeSet<SmolStr>,
}

pub(crate) struct FinishedUpdate {
    pub state: EditorState,
    pub dirty_elements: HashSet<NodeKey>,
    pub dirty_leaves: HashSet<NodeKey>,
    pub normalized: HashSet<NodeKey>,
    pub tags: BTreeSet<SmolStr>,
}

impl<'a> EditorUpdate<'a> {
    pub(crate) fn new(
        state: EditorState,
        registry: &'a NodeRegistry,
        next_key: &'a mut u64,
        tags: BTreeSet<SmolStr>,
    ) -> Self {
        Self {
            state,
            registry,
            next_key,
            dirty_elements: HashSet::new(),
            dirty_leaves: HashSet::new(),
            normalized: HashSet::new(),
            tags,
        }
    }

    /// The working state, including changes made so far.
    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn registry(&self) -> &NodeRegistry {
        self.registry
    }

    pub fn node(&self, key: &str) -> Option<&EditorNode> {
        self.state.node(key)
    }

    pub fn add_tag(&mut self, tag: &str) {
        self.tags.insert(SmolStr::new(tag));
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Create a detached node of a registered type, with its default properties.
    ///
    /// Nodes still detached when the update ends are discarded.
    pub fn create_node(&mut self, node_type: &str) -> Result<NodeKey, EditorError> {
        let class = self
            .registry
            .get(node_type)
            .ok_or_else(|| EditorError::UnregisteredType(SmolStr::new(node_type)))?;
        *self.next_key += 1;
        let key = format_smolstr!("{}", *self.next_key);
        let mut node = EditorNode::new(key.clone(), class.node_type.clone(), class.kind);
        node.properties = class.defaults.clone();
        self.state.nodes.insert(key.clone(), node);
        self.mark_dirty(&key);
        Ok(key)
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> Result<NodeKey, EditorError> {
        let key = self.create_node(TEXT_TYPE)?;
        self.set_text(&key, text)?;
        Ok(key)
    }

    pub fn append_child(&mut self, parent: &str, child: &str) -> Result<(), EditorError> {
        self.check_attach(parent, child)?;
        self.detach(child);
        let index = self.state.children(parent).len();
        self.insert_child(parent, index, child)
    }

    /// Insert `child` before the child at `index`. An attached child is moved.
    pub fn insert_child(
        &mut self,
        parent: &str,
        index: usize,
        child: &str,
    ) -> Result<(), EditorError> {
        self.check_attach(parent, child)?;
        self.detach(child);
        let children = self.children_mut(parent)?;
        if index > children.len() {
            return Err(EditorError::IndexOutOfBounds {
                parent: parent.into(),
                index,
                len: children.len(),
            });
        }
        children.insert(index, child.into());
        self.node_mut(child)?.parent = Some(parent.into());
        self.mark_dirty(child);
        Ok(())
    }

    /// Detach a node and discard its subtree.
    pub fn remove(&mut self, key: &str) -> Result<(), EditorError> {
        if key == ROOT_KEY {
            return Err(EditorError::RootIsPermanent);
        }
        if !self.state.contains(key) {
            return Err(EditorError::NodeNotFound(key.into()));
        }
        self.detach(key);
        self.drop_subtree(key);
        Ok(())
    }

    /// Replace an element's children wholesale.
    ///
    /// Former children missing from `children` are discarded; listed nodes
    /// attached elsewhere are moved.
    pub fn replace_children(
        &mut self,
        parent: &str,
        children: Vec<NodeKey>,
    ) -> Result<(), EditorError> {
        let current = self.element_children(parent)?.to_vec();
        if current == children {
            return Ok(());
        }
        for child in &children {
            self.check_attach(parent, child)?;
        }
        let keep: HashSet<&NodeKey> = children.iter().collect();
        for old in current.iter().filter(|k| !keep.contains(k)) {
            self.drop_subtree(old);
        }
        for child in &children {
            let attached_here = self
                .state
                .node(child)
                .is_some_and(|n| n.parent.as_deref() == Some(parent));
            if !attached_here {
                self.detach(child);
            }
        }
        let previous: HashSet<NodeKey> = current.into_iter().collect();
        *self.children_mut(parent)? = children.clone();
        for child in &children {
            self.node_mut(child)?.parent = Some(parent.into());
            if !previous.contains(child) {
                self.mark_dirty(child);
            }
        }
        self.mark_dirty(parent);
        Ok(())
    }

    pub fn set_text(&mut self, key: &str, text: &str) -> Result<(), EditorError> {
        let current = self.text_mut(key)?;
        if current != text {
            current.clear();
            current.push_str(text);
            self.mark_dirty(key);
        }
        Ok(())
    }

    /// Insert at a character offset (NOT byte offset!).
    pub fn insert_text(&mut self, key: &str, offset: usize, text: &str) -> Result<(), EditorError> {
        let current = self.text_mut(key)?;
        let byte = char_to_byte(current, offset).ok_or_else(|| EditorError::OffsetOutOfBounds {
            key: key.into(),
            offset,
            len: current.chars().count(),
        })?;
        current.insert_str(byte, text);
        self.mark_dirty(key);
        Ok(())
    }

    /// Delete `len` characters starting at a character offset.
    pub fn delete_text(&mut self, key: &str, offset: usize, len: usize) -> Result<(), EditorError> {
        let current = self.text_mut(key)?;
        let total = current.chars().count();
        let (Some(start), Some(end)) = (
            char_to_byte(current, offset),
            char_to_byte(current, offset + len),
        ) else {
            return Err(EditorError::OffsetOutOfBounds {
                key: key.into(),
                offset: offset + len,
                len: total,
            });
        };
        current.replace_range(start..end, "");
        self.mark_dirty(key);
        Ok(())
    }

    pub fn set_property(
        &mut self,
        key: &str,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), EditorError> {
        let node = self.node_mut(key)?;
        if node.properties.get(name) != Some(&value) {
            node.properties.insert(SmolStr::new(name), value);
            self.mark_dirty(key);
        }
        Ok(())
    }

    pub fn remove_property(&mut self, key: &str, name: &str) -> Result<(), EditorError> {
        if self.node_mut(key)?.properties.remove(name).is_some() {
            self.mark_dirty(key);
        }
        Ok(())
    }

    pub fn set_selection(&mut self, selection: Option<RangeSelection>) {
        self.state.selection = selection;
    }

    pub(crate) fn node_mut(&mut self, key: &str) -> Result<&mut EditorNode, EditorError> {
        self.state
            .nodes
            .get_mut(key)
            .ok_or_else(|| EditorError::NodeNotFound(key.into()))
    }

    fn element_children(&self, key: &str) -> Result<&[NodeKey], EditorError> {
        let node = self
            .state
            .node(key)
            .ok_or_else(|| EditorError::NodeNotFound(key.into()))?;
        match &node.body {
            NodeBody::Element { children } => Ok(children),
            _ => Err(EditorError::WrongKind {
                key: key.into(),
                expected: NodeKind::Element,
                actual: node.kind(),
            }),
        }
    }

    pub(crate) fn children_mut(&mut self, key: &str) -> Result<&mut Vec<NodeKey>, EditorError> {
        let node = self.node_mut(key)?;
        let actual = node.kind();
        match &mut node.body {
            NodeBody::Element { children } => Ok(children),
            _ => Err(EditorError::WrongKind {
                key: key.into(),
                expected: NodeKind::Element,
                actual,
            }),
        }
    }

    fn text_mut(&mut self, key: &str) -> Result<&mut String, EditorError> {
        let node = self.node_mut(key)?;
        let actual = node.kind();
        match &mut node.body {
            NodeBody::Text { text } => Ok(text),
            _ => Err(EditorError::WrongKind {
                key: key.into(),
                expected: NodeKind::Text,
                actual,
            }),
        }
    }

    fn check_attach(&self, parent: &str, child: &str) -> Result<(), EditorError> {
        if child == ROOT_KEY {
            return Err(EditorError::RootIsPermanent);
        }
        self.element_children(parent)?;
        if !self.state.contains(child) {
            return Err(EditorError::NodeNotFound(child.into()));
        }
        if self.state.is_ancestor_or_self(child, parent) {
            return Err(EditorError::Cycle {
                parent: parent.into(),
                child: child.into(),
            });
        }
        Ok(())
    }

    /// Unlink a node from its parent, leaving the subtree in the map.
    fn detach(&mut self, key: &str) {
        let Some(parent) = self.state.nodes.get_mut(key).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Ok(children) = self.children_mut(&parent) {
            children.retain(|k| k != key);
        }
        self.mark_dirty(&parent);
    }

    pub(crate) fn drop_subtree(&mut self, key: &str) {
        let mut stack = vec![NodeKey::from(key)];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.state.nodes.remove(&current) {
                stack.extend(node.children().iter().cloned());
            }
            self.dirty_elements.remove(&current);
            self.dirty_leaves.remove(&current);
        }
    }

    /// Mark a node dirty and every ancestor as a dirty element.
    pub(crate) fn mark_dirty(&mut self, key: &str) {
        let Some(node) = self.state.nodes.get(key) else {
            return;
        };
        if node.is_element() {
            self.dirty_elements.insert(node.key.clone());
        } else {
            self.dirty_leaves.insert(node.key.clone());
        }
        let mut parent = node.parent.clone();
        while let Some(p) = parent {
            parent = self.state.nodes.get(&p).and_then(|n| n.parent.clone());
            self.dirty_elements.insert(p);
        }
    }

    /// Garbage-collect detached nodes and drop a selection that points at
    /// nodes which no longer exist.
    pub(crate) fn finish(mut self) -> FinishedUpdate {
        let mut reachable = HashSet::new();
        let mut stack = vec![NodeKey::from(ROOT_KEY)];
        while let Some(key) = stack.pop() {
            if let Some(node) = self.state.nodes.get(&key) {
                stack.extend(node.children().iter().cloned());
            }
            reachable.insert(key);
        }
        self.state.nodes.retain(|k, _| reachable.contains(k));
        self.dirty_elements.retain(|k| reachable.contains(k));
        self.dirty_leaves.retain(|k| reachable.contains(k));

        let dangling = self
            .state
            .selection
            .as_ref()
            .is_some_and(|s| s.points().any(|p| !self.state.contains(&p.key)));
        if dangling {
            tracing::debug!("dropping selection on removed node");
            self.state.selection = None;
        }

        FinishedUpdate {
            state: self.state,
            dirty_elements: self.dirty_elements,
            dirty_leaves: self.dirty_leaves,
            normalized: self.normalized,
            tags: self.tags,
        }
    }
}

/// Byte index of a character offset; `None` past the end.
pub(crate) fn char_to_byte(text: &str, offset: usize) -> Option<usize> {
    if offset == 0 {
        return Some(0);
    }
    match text.char_indices().nth(offset) {
        Some((byte, _)) => Some(byte),
        None if text.chars().count() == offset => Some(text.len()),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_to_byte() {
        assert_eq!(char_to_byte("héllo", 0), Some(0));
        assert_eq!(char_to_byte("héllo", 2), Some(3));
        assert_eq!(char_to_byte("héllo", 5), Some(6));
        assert_eq!(char_to_byte("héllo", 6), None);
        assert_eq!(char_to_byte("", 0), Some(0));
    }

    #[test]
    fn test_options_builder() {
        let opts = UpdateOptions::tagged(tags::COLLABORATION)
            .with_tag(tags::HISTORIC)
            .skip_transforms();
        assert!(opts.skip_transforms);
        assert!(opts.tags.contains(tags::COLLABORATION));
        assert!(opts.tags.contains(tags::HISTORIC));
    }
}
