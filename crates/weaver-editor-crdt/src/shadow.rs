//! Shadow tree: a per-peer mirror of the editor tree that owns the shared
//! containers backing each node.
//!
//! Nodes live in an arena keyed by editor node key; parent and children are
//! stored as keys. Offsets into marker streams are always recomputed from the
//! children lists and never cached.

use std::collections::{HashMap, HashSet};

use loro::{ContainerID, LoroDoc};
use smol_str::SmolStr;
use weaver_editor_core::{NodeKey, NodeKind, ROOT_KEY};

use crate::error::CrdtError;
use crate::shared::{AttrMap, ChildSlots, MarkerStream, SharedSequence};

/// What a registered container is to its node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerRole {
    /// Marker stream of an element.
    Stream,
    /// Attribute map of any node.
    Attributes,
}

/// Kind-specific shadow state.
#[derive(Clone, Debug)]
pub enum ShadowVariant {
    Element {
        stream: MarkerStream,
        slots: ChildSlots,
        children: Vec<NodeKey>,
    },
    Text {
        /// Last text written to (or read from) the parent stream.
        text: String,
        /// Set once the node's marker was deleted by normalization; the node
        /// is about to be detached and its run absorbed by a sibling.
        normalized: bool,
    },
    LineBreak,
    Decorator,
}

/// One node of the shadow tree.
#[derive(Clone, Debug)]
pub struct ShadowNode {
    pub key: NodeKey,
    pub node_type: SmolStr,
    pub parent: Option<NodeKey>,
    pub attrs: AttrMap,
    pub variant: ShadowVariant,
}

impl ShadowNode {
    pub fn kind(&self) -> NodeKind {
        match self.variant {
            ShadowVariant::Element { .. } => NodeKind::Element,
            ShadowVariant::Text { .. } => NodeKind::Text,
            ShadowVariant::LineBreak => NodeKind::LineBreak,
            ShadowVariant::Decorator => NodeKind::Decorator,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.variant, ShadowVariant::Text { .. })
    }

    /// Length in sequence units: characters for text, 1 for anything else.
    pub fn size(&self) -> usize {
        match &self.variant {
            ShadowVariant::Text { text, .. } => text.chars().count(),
            _ => 1,
        }
    }

    /// Units this node occupies in its parent's stream: its marker plus, for
    /// text, its characters.
    pub fn footprint(&self) -> usize {
        match &self.variant {
            ShadowVariant::Text { text, normalized } => {
                text.chars().count() + usize::from(!*normalized)
            }
            _ => 1,
        }
    }

    pub fn children(&self) -> &[NodeKey] {
        match &self.variant {
            ShadowVariant::Element { children, .. } => children,
            _ => &[],
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.variant {
            ShadowVariant::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn stream(&self) -> Option<&MarkerStream> {
        match &self.variant {
            ShadowVariant::Element { stream, .. } => Some(stream),
            _ => None,
        }
    }
}

/// Arena of shadow nodes plus the container id index.
#[derive(Clone, Debug)]
pub struct ShadowTree {
    nodes: HashMap<NodeKey, ShadowNode>,
    containers: HashMap<ContainerID, (NodeKey, ContainerRole)>,
}

impl ShadowTree {
    /// Create a tree holding only the root, bound to the document's root containers.
    pub fn new(doc: &LoroDoc) -> Self {
        let mut tree = Self {
            nodes: HashMap::new(),
            containers: HashMap::new(),
        };
        tree.register(ShadowNode {
            key: ROOT_KEY.into(),
            node_type: SmolStr::new_static("root"),
            parent: None,
            attrs: AttrMap::root(doc),
            variant: ShadowVariant::Element {
                stream: MarkerStream::root(doc),
                slots: ChildSlots::root(doc),
                children: Vec::new(),
            },
        });
        tree
    }

    pub fn get(&self, key: &str) -> Option<&ShadowNode> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn children(&self, key: &str) -> &[NodeKey] {
        self.nodes.get(key).map(|n| n.children()).unwrap_or(&[])
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.nodes.get(key).and_then(|n| n.text())
    }

    /// Node and role a container belongs to.
    pub fn resolve(&self, id: &ContainerID) -> Option<(&NodeKey, ContainerRole)> {
        self.containers.get(id).map(|(key, role)| (key, *role))
    }

    /// Number of ancestors between a node and the root.
    pub fn depth(&self, key: &str) -> usize {
        let mut depth = 0;
        let mut current = self.nodes.get(key).and_then(|n| n.parent.as_ref());
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes.get(parent).and_then(|n| n.parent.as_ref());
        }
        depth
    }

    /// Add a node to the arena and index its containers.
    pub fn register(&mut self, node: ShadowNode) {
        self.containers
            .insert(node.attrs.id(), (node.key.clone(), ContainerRole::Attributes));
        if let Some(stream) = node.stream() {
            self.containers
                .insert(stream.id(), (node.key.clone(), ContainerRole::Stream));
        }
        self.nodes.insert(node.key.clone(), node);
    }

    /// Create a fresh shared record for `key` inside `parent` and register a
    /// shadow for it. The child is not placed in the parent's stream yet.
    pub fn create_child(
        &mut self,
        parent: &str,
        key: &str,
        node_type: &str,
        kind: NodeKind,
    ) -> Result<AttrMap, CrdtError> {
        let (_, slots, _) = self.element_parts(parent)?;
        let attrs = slots.create(node_type)?;
        let variant = match kind {
            NodeKind::Element => {
                let (stream, slots) = attrs.init_element()?;
                ShadowVariant::Element {
                    stream,
                    slots,
                    children: Vec::new(),
                }
            }
            NodeKind::Text => ShadowVariant::Text {
                text: String::new(),
                normalized: false,
            },
            NodeKind::LineBreak => ShadowVariant::LineBreak,
            NodeKind::Decorator => ShadowVariant::Decorator,
        };
        self.register(ShadowNode {
            key: key.into(),
            node_type: node_type.into(),
            parent: Some(parent.into()),
            attrs: attrs.clone(),
            variant,
        });
        Ok(attrs)
    }

    /// Offset of a node in its parent's stream, or `None` when the node or
    /// its parent link cannot be found.
    pub fn offset(&self, key: &str) -> Option<usize> {
        let parent = self.nodes.get(key)?.parent.as_ref()?;
        self.child_offset(parent, key)
    }

    /// Offset of `child`'s marker within `parent`'s stream.
    pub fn child_offset(&self, parent: &str, child: &str) -> Option<usize> {
        let mut offset = 0;
        for key in self.children(parent) {
            if key == child {
                return Some(offset);
            }
            offset += self.footprint(key);
        }
        None
    }

    /// Stream offset of the boundary before child `index`.
    pub fn index_offset(&self, parent: &str, index: usize) -> usize {
        self.children(parent)
            .iter()
            .take(index)
            .map(|k| self.footprint(k))
            .sum()
    }

    pub fn footprint(&self, key: &str) -> usize {
        self.nodes.get(key).map(|n| n.footprint()).unwrap_or(0)
    }

    /// Append an already-registered child at the end of `parent`.
    pub fn append(&mut self, parent: &str, child: &str) -> Result<(), CrdtError> {
        let index = self.children(parent).len();
        self.splice(parent, index, 0, Some(child))
    }

    /// Remove `delete_count` children starting at `index`, then insert
    /// `insert` (already registered) at `index`.
    ///
    /// Writes both the children list and the marker stream. Removed children
    /// lose their shared record and are destroyed.
    pub fn splice(
        &mut self,
        parent: &str,
        index: usize,
        delete_count: usize,
        insert: Option<&str>,
    ) -> Result<(), CrdtError> {
        let (stream, slots, mut children) = self.element_parts(parent)?;
        let index = index.min(children.len());
        let delete_count = delete_count.min(children.len() - index);
        let offset = self.index_offset(parent, index);

        for child in children.drain(index..index + delete_count) {
            let footprint = self.footprint(&child);
            stream.delete(offset, footprint)?;
            if let Some(node) = self.nodes.get(&child) {
                slots.remove(&node.attrs.reference())?;
            }
            self.destroy(&child);
        }

        if let Some(child) = insert {
            let node = self
                .nodes
                .get_mut(child)
                .ok_or_else(|| CrdtError::MissingShadow(child.into()))?;
            stream.insert_marker(offset, &node.attrs.reference())?;
            if let ShadowVariant::Text { text, .. } = &node.variant {
                stream.insert(offset + 1, text)?;
            }
            node.parent = Some(parent.into());
            children.insert(index, child.into());
        }

        self.set_children(parent, children);
        Ok(())
    }

    /// Replace a children list without touching shared state.
    pub fn set_children(&mut self, parent: &str, next: Vec<NodeKey>) {
        for child in &next {
            if let Some(node) = self.nodes.get_mut(child) {
                node.parent = Some(parent.into());
            }
        }
        if let Some(ShadowVariant::Element { children, .. }) =
            self.nodes.get_mut(parent).map(|n| &mut n.variant)
        {
            *children = next;
        }
    }

    pub fn set_text(&mut self, key: &str, value: &str) {
        if let Some(ShadowVariant::Text { text, .. }) = self.nodes.get_mut(key).map(|n| &mut n.variant)
        {
            text.clear();
            text.push_str(value);
        }
    }

    pub(crate) fn push_text(&mut self, key: &str, extra: &str) {
        if let Some(ShadowVariant::Text { text, .. }) = self.nodes.get_mut(key).map(|n| &mut n.variant)
        {
            text.push_str(extra);
        }
    }

    /// Flag a text node whose marker is gone; returns its cached text.
    pub(crate) fn mark_normalized(&mut self, key: &str) -> Option<String> {
        match self.nodes.get_mut(key).map(|n| &mut n.variant) {
            Some(ShadowVariant::Text { text, normalized }) => {
                *normalized = true;
                Some(text.clone())
            }
            _ => None,
        }
    }

    /// Nearest preceding sibling not in `skip`, if it is a text node.
    pub(crate) fn preceding_text_sibling(
        &self,
        key: &str,
        skip: &HashSet<NodeKey>,
    ) -> Option<NodeKey> {
        let parent = self.nodes.get(key)?.parent.as_ref()?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|k| k == key)?;
        let previous = siblings[..index].iter().rev().find(|k| !skip.contains(*k))?;
        self.nodes
            .get(previous)
            .filter(|n| n.is_text())
            .map(|n| n.key.clone())
    }

    /// Unlink a node from its parent, drop its shared record and destroy it.
    /// The parent stream is not touched.
    pub(crate) fn discard(&mut self, key: &str) -> Result<(), CrdtError> {
        let Some(node) = self.nodes.get(key) else {
            return Ok(());
        };
        let reference = node.attrs.reference();
        if let Some(parent) = node.parent.clone() {
            let (_, slots, mut children) = self.element_parts(&parent)?;
            children.retain(|k| k != key);
            slots.remove(&reference)?;
            self.set_children(&parent, children);
        }
        self.destroy(key);
        Ok(())
    }

    /// Remove a node and its descendants from the arena and the container
    /// index. Shared state is not touched.
    pub fn destroy(&mut self, key: &str) {
        let mut stack = vec![NodeKey::from(key)];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            self.containers.remove(&node.attrs.id());
            if let Some(stream) = node.stream() {
                self.containers.remove(&stream.id());
            }
            stack.extend(node.children().iter().cloned());
        }
    }

    /// Stream, slots and a copy of the children of an element.
    pub(crate) fn element_parts(
        &self,
        key: &str,
    ) -> Result<(MarkerStream, ChildSlots, Vec<NodeKey>), CrdtError> {
        match self.nodes.get(key).map(|n| &n.variant) {
            Some(ShadowVariant::Element {
                stream,
                slots,
                children,
            }) => Ok((stream.clone(), slots.clone(), children.clone())),
            _ => Err(CrdtError::MissingShadow(key.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{StreamItem, configure_styles};

    fn tree() -> (LoroDoc, ShadowTree) {
        let doc = LoroDoc::new();
        configure_styles(&doc);
        let tree = ShadowTree::new(&doc);
        (doc, tree)
    }

    fn add_text(tree: &mut ShadowTree, parent: &str, key: &str, text: &str) {
        tree.create_child(parent, key, "text", NodeKind::Text).unwrap();
        tree.set_text(key, text);
        tree.append(parent, key).unwrap();
    }

    #[test]
    fn test_offsets_follow_footprints() {
        let (doc, mut tree) = tree();
        tree.create_child(ROOT_KEY, "p", "paragraph", NodeKind::Element)
            .unwrap();
        tree.append(ROOT_KEY, "p").unwrap();
        add_text(&mut tree, "p", "a", "ab");
        tree.create_child("p", "br", "linebreak", NodeKind::LineBreak)
            .unwrap();
        tree.append("p", "br").unwrap();
        add_text(&mut tree, "p", "c", "cd");
        doc.commit();

        assert_eq!(tree.offset("a"), Some(0));
        assert_eq!(tree.offset("br"), Some(3));
        assert_eq!(tree.offset("c"), Some(4));
        assert_eq!(tree.index_offset("p", 3), 7);
        assert_eq!(tree.get("a").map(|n| n.size()), Some(2));
        assert_eq!(tree.get("br").map(|n| n.size()), Some(1));

        let stream = tree.get("p").and_then(|n| n.stream()).cloned().unwrap();
        assert_eq!(stream.len(), 7);
        let items = stream.items().unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(items[1], StreamItem::Text("ab".into()));
    }

    #[test]
    fn test_offset_of_unknown_node() {
        let (_doc, tree) = tree();
        assert_eq!(tree.offset("missing"), None);
        assert_eq!(tree.offset(ROOT_KEY), None);
    }

    #[test]
    fn test_splice_replace_at_same_index() {
        let (doc, mut tree) = tree();
        add_text(&mut tree, ROOT_KEY, "a", "one");
        add_text(&mut tree, ROOT_KEY, "b", "two");
        tree.create_child(ROOT_KEY, "c", "text", NodeKind::Text)
            .unwrap();
        tree.set_text("c", "three");
        tree.splice(ROOT_KEY, 0, 1, Some("c")).unwrap();
        doc.commit();

        assert_eq!(tree.children(ROOT_KEY), &["c", "b"]);
        assert!(!tree.contains("a"));
        let stream = MarkerStream::root(&doc);
        let texts: Vec<_> = stream
            .items()
            .unwrap()
            .into_iter()
            .filter_map(|item| match item {
                StreamItem::Text(t) => Some(t),
                StreamItem::Marker(_) => None,
            })
            .collect();
        assert_eq!(texts, vec!["three".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_destroy_unregisters_containers() {
        let (_doc, mut tree) = tree();
        let attrs = tree
            .create_child(ROOT_KEY, "p", "paragraph", NodeKind::Element)
            .unwrap();
        tree.append(ROOT_KEY, "p").unwrap();
        let stream_id = tree.get("p").and_then(|n| n.stream()).map(|s| s.id()).unwrap();
        assert_eq!(
            tree.resolve(&stream_id).map(|(k, r)| (k.clone(), r)),
            Some(("p".into(), ContainerRole::Stream))
        );
        tree.splice(ROOT_KEY, 0, 1, None).unwrap();
        assert!(tree.resolve(&stream_id).is_none());
        assert!(tree.resolve(&attrs.id()).is_none());
    }

    #[test]
    fn test_normalized_footprint_drops_marker() {
        let (_doc, mut tree) = tree();
        add_text(&mut tree, ROOT_KEY, "a", "ab");
        add_text(&mut tree, ROOT_KEY, "b", "cd");
        assert_eq!(tree.footprint("b"), 3);
        assert_eq!(tree.mark_normalized("b").as_deref(), Some("cd"));
        assert_eq!(tree.footprint("b"), 2);
        assert_eq!(
            tree.preceding_text_sibling("b", &HashSet::new()).as_deref(),
            Some("a")
        );
    }
}
