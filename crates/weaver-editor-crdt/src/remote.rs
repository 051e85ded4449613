//! Shared → local: re-derive editor nodes from changed containers.

use std::collections::{HashMap, HashSet};

use loro::event::DiffEvent;
use loro::{ContainerID, EventTriggerKind};
use smol_str::SmolStr;
use tracing::{debug, error, trace, warn};
use weaver_editor_core::{
    Editor, EditorUpdate, NodeKey, NodeKind, Point, ROOT_KEY, RangeSelection, UpdateOptions, tags,
};

use crate::binding::Binding;
use crate::debug::SyncDirection;
use crate::error::CrdtError;
use crate::position::SavedSelection;
use crate::shadow::{ContainerRole, ShadowNode, ShadowVariant};
use crate::shared::{AttrMap, SharedSequence, StreamItem};
use crate::undo::{ORIGIN_REPAIR, is_binding_origin};

/// Where a batch of shared changes came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Committed by this binding; already reflected in the editor.
    Own,
    /// Imported from another peer.
    Remote,
    /// Produced locally by undo/redo.
    UndoReplay,
}

/// Owned summary of one document event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeBatch {
    pub origin: ChangeOrigin,
    pub targets: Vec<ContainerID>,
}

impl ChangeBatch {
    pub fn from_event(event: &DiffEvent<'_>) -> Self {
        let origin = match event.triggered_by {
            EventTriggerKind::Local if is_binding_origin(event.origin) => ChangeOrigin::Own,
            EventTriggerKind::Local => ChangeOrigin::UndoReplay,
            _ => ChangeOrigin::Remote,
        };
        Self {
            origin,
            targets: event.events.iter().map(|e| e.target.clone()).collect(),
        }
    }

    /// A batch that re-derives the whole tree from the root stream.
    pub fn full(binding: &Binding) -> Self {
        Self {
            origin: ChangeOrigin::Remote,
            targets: binding
                .tree
                .get(ROOT_KEY)
                .and_then(|root| root.stream())
                .map(|s| vec![s.id()])
                .unwrap_or_default(),
        }
    }
}

/// A child as read back from a marker stream.
struct DerivedChild {
    reference: SmolStr,
    attrs: AttrMap,
    node_type: SmolStr,
    kind: NodeKind,
    text: String,
}

impl Binding {
    /// Apply a batch of shared changes to the editor.
    ///
    /// Everything lands in one update tagged `collaboration` (plus
    /// `historic` for undo replays) with transforms skipped. The captured
    /// selection is restored inside that update. If the root ends up empty a
    /// separate untagged update inserts a default block so the repair
    /// replicates.
    ///
    /// On failure the shadow tree is rolled back with the editor and the
    /// binding stops mirroring local updates.
    pub fn sync_remote_batch(
        &mut self,
        editor: &mut Editor,
        batch: &ChangeBatch,
        selection: Option<&SavedSelection>,
    ) -> Result<(), CrdtError> {
        if batch.origin == ChangeOrigin::Own {
            trace!("skipping own change batch");
            return Ok(());
        }

        let mut options = UpdateOptions::tagged(tags::COLLABORATION).skip_transforms();
        options = match batch.origin {
            ChangeOrigin::UndoReplay => options.with_tag(tags::HISTORIC),
            _ => options.with_tag(tags::SKIP_SCROLL_INTO_VIEW),
        };

        // The editor discards its working copy on error; the shadow has to
        // follow it back.
        let checkpoint = self.tree.clone();
        let result = editor.update(options, |update| {
            let touched = self.apply_changes(update, &batch.targets)?;
            if let Some(saved) = selection {
                self.restore_selection(update, saved);
            }
            Ok::<_, CrdtError>(touched)
        });

        // Orphan deletions are valid whether or not the batch applied.
        if self.pending_repairs > 0 {
            let repairs = std::mem::take(&mut self.pending_repairs);
            debug!(repairs, "committing structural repairs");
            self.commit(ORIGIN_REPAIR, SyncDirection::LocalToShared, repairs);
        }

        let touched = match result {
            Ok(touched) => touched,
            Err(e) => {
                error!(error = %e, "remote batch failed, shadow rolled back");
                self.tree = checkpoint;
                self.desynced = Some(e.to_string());
                return Err(e);
            }
        };
        let origin = match batch.origin {
            ChangeOrigin::UndoReplay => "undo",
            _ => "remote",
        };
        self.debug.record(SyncDirection::SharedToLocal, origin, touched);

        if editor.state().children(ROOT_KEY).is_empty() {
            let block_type = self.default_block_type.clone();
            debug!(%block_type, "root left empty by remote change, inserting block");
            editor.update(UpdateOptions::tagged(tags::COLLAB_REPAIR), |update| {
                let block = update.create_node(&block_type)?;
                update.append_child(ROOT_KEY, &block)?;
                update.set_selection(Some(RangeSelection::collapsed(Point::element(block, 0))));
                Ok::<_, CrdtError>(())
            })?;
        }
        Ok(())
    }

    /// Re-derive every node a batch touched. Returns the number of editor
    /// nodes changed.
    pub(crate) fn apply_changes(
        &mut self,
        update: &mut EditorUpdate<'_>,
        targets: &[ContainerID],
    ) -> Result<usize, CrdtError> {
        let mut structural: Vec<NodeKey> = Vec::new();
        let mut attributes: Vec<NodeKey> = Vec::new();
        let mut seen = HashSet::new();
        for target in targets {
            match self.tree.resolve(target) {
                Some((key, role)) if seen.insert((key.clone(), role)) => match role {
                    ContainerRole::Stream => structural.push(key.clone()),
                    ContainerRole::Attributes => attributes.push(key.clone()),
                },
                Some(_) => {}
                None => trace!(container = %target, "skipping untracked container"),
            }
        }
        structural.sort_by_key(|key| self.tree.depth(key));

        let mut touched = 0;
        for key in structural {
            if self.tree.contains(&key) {
                touched += self.derive_children(update, &key)?;
            }
        }
        for key in attributes {
            if self.tree.contains(&key) {
                touched += self.derive_properties(update, &key)?;
            }
        }
        Ok(touched)
    }

    /// Rebuild an element's children from its marker stream.
    fn derive_children(
        &mut self,
        update: &mut EditorUpdate<'_>,
        key: &NodeKey,
    ) -> Result<usize, CrdtError> {
        let (stream, slots, current) = self.tree.element_parts(key)?;
        let records = slots.by_reference();

        let mut derived: Vec<DerivedChild> = Vec::new();
        let mut orphans: Vec<(usize, usize)> = Vec::new();
        let mut claimed = HashSet::new();
        let mut owner: Option<usize> = None;
        let mut offset = 0;
        for item in stream.items()? {
            match item {
                StreamItem::Marker(reference) => {
                    owner = None;
                    match records.get(&reference) {
                        Some(attrs) if claimed.insert(reference.clone()) => {
                            let node_type = attrs
                                .node_type()
                                .ok_or_else(|| attrs.malformed("missing node type"))?;
                            let kind = update.registry().kind_of(&node_type).ok_or_else(|| {
                                CrdtError::UnregisteredNodeType {
                                    node_type: node_type.clone(),
                                }
                            })?;
                            owner = Some(derived.len());
                            derived.push(DerivedChild {
                                reference,
                                attrs: attrs.clone(),
                                node_type,
                                kind,
                                text: String::new(),
                            });
                        }
                        _ => {
                            warn!(parent = %key, %reference, "marker without a node record");
                            orphans.push((offset, 1));
                        }
                    }
                    offset += 1;
                }
                StreamItem::Text(run) => {
                    let len = run.chars().count();
                    match owner.and_then(|i| derived.get_mut(i)) {
                        Some(child) if child.kind == NodeKind::Text => child.text = run,
                        _ => {
                            warn!(parent = %key, len, "text run without a text node");
                            orphans.push((offset, len));
                        }
                    }
                    offset += len;
                }
            }
        }

        let mut existing: HashMap<SmolStr, NodeKey> = current
            .iter()
            .filter_map(|k| self.tree.get(k).map(|n| (n.attrs.reference(), k.clone())))
            .collect();
        let mut touched = 0;
        let mut next = Vec::with_capacity(derived.len());
        for child in derived {
            match existing.remove(&child.reference) {
                Some(child_key) => {
                    if child.kind == NodeKind::Text
                        && self.tree.text(&child_key) != Some(child.text.as_str())
                    {
                        self.tree.set_text(&child_key, &child.text);
                        update.set_text(&child_key, &child.text)?;
                        touched += 1;
                    }
                    next.push(child_key);
                }
                None => {
                    next.push(self.materialize(update, key, child)?);
                    touched += 1;
                }
            }
        }
        for (_, gone) in existing {
            trace!(parent = %key, child = %gone, "child removed remotely");
            self.tree.destroy(&gone);
            touched += 1;
        }

        self.tree.set_children(key, next.clone());
        update.replace_children(key, next)?;

        for (at, len) in orphans.into_iter().rev() {
            stream.delete(at, len)?;
            self.pending_repairs += 1;
        }
        Ok(touched)
    }

    /// Create the editor node and shadow for a child first seen in shared state.
    fn materialize(
        &mut self,
        update: &mut EditorUpdate<'_>,
        parent: &NodeKey,
        child: DerivedChild,
    ) -> Result<NodeKey, CrdtError> {
        let key = update.create_node(&child.node_type)?;
        let properties = child.attrs.properties();
        self.observe_properties(&child.node_type, properties.keys());
        for (name, value) in properties {
            update.set_property(&key, &name, value)?;
        }

        let variant = match child.kind {
            NodeKind::Element => {
                let (stream, slots) = child.attrs.element_parts()?;
                ShadowVariant::Element {
                    stream,
                    slots,
                    children: Vec::new(),
                }
            }
            NodeKind::Text => ShadowVariant::Text {
                text: child.text.clone(),
                normalized: false,
            },
            NodeKind::LineBreak => ShadowVariant::LineBreak,
            NodeKind::Decorator => ShadowVariant::Decorator,
        };
        trace!(%parent, %key, node_type = %child.node_type, "materializing remote node");
        self.tree.register(ShadowNode {
            key: key.clone(),
            node_type: child.node_type,
            parent: Some(parent.clone()),
            attrs: child.attrs,
            variant,
        });

        match child.kind {
            NodeKind::Text => update.set_text(&key, &child.text)?,
            NodeKind::Element => {
                self.derive_children(update, &key)?;
            }
            NodeKind::LineBreak | NodeKind::Decorator => {}
        }
        Ok(key)
    }

    /// Copy mirrored properties from a node's attribute map.
    fn derive_properties(
        &mut self,
        update: &mut EditorUpdate<'_>,
        key: &NodeKey,
    ) -> Result<usize, CrdtError> {
        let Some(shadow) = self.tree.get(key) else {
            return Ok(0);
        };
        let node_type = shadow.node_type.clone();
        let shared = shadow.attrs.properties();
        let Some(node) = update.node(key) else {
            return Ok(0);
        };
        let current = node.properties.clone();
        self.observe_properties(&node_type, shared.keys());

        let mut touched = 0;
        for (name, value) in &shared {
            if current.get(name) != Some(value) {
                update.set_property(key, name, value.clone())?;
                touched += 1;
            }
        }
        for name in current.keys() {
            if !shared.contains_key(name) && !self.is_excluded(&node_type, name) {
                update.remove_property(key, name)?;
                touched += 1;
            }
        }
        Ok(touched)
    }
}
