//! The binding between one editor and one shared document.

use std::collections::{HashMap, HashSet};

use loro::LoroDoc;
use smol_str::SmolStr;
use weaver_editor_core::{EditorNode, Point, ROOT_KEY};

use crate::config::CollabConfig;
use crate::debug::{DebugContext, SyncDirection};
use crate::shadow::ShadowTree;
use crate::shared::{SharedSequence, configure_styles, is_reserved};

/// A remote peer's cursor, resolved against this peer's tree.
#[derive(Clone, Debug, PartialEq)]
pub struct CursorState {
    pub name: SmolStr,
    pub color: u32,
    /// `None` while the peer's positions cannot be resolved locally.
    pub selection: Option<CursorSelection>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorSelection {
    pub anchor: Point,
    pub focus: Point,
}

/// Per-peer sync state: the shadow tree, remote cursors and the property
/// mirroring rules.
#[derive(Debug)]
pub struct Binding {
    pub(crate) doc: LoroDoc,
    client_id: u64,
    pub(crate) tree: ShadowTree,
    pub(crate) cursors: HashMap<u64, CursorState>,
    excluded_properties: HashMap<SmolStr, HashSet<SmolStr>>,
    property_cache: HashMap<SmolStr, Vec<SmolStr>>,
    pub(crate) default_block_type: SmolStr,
    /// Repairs written during a remote pass, awaiting their own commit.
    pub(crate) pending_repairs: usize,
    /// Set once a remote batch failed to apply.
    pub(crate) desynced: Option<String>,
    pub(crate) debug: DebugContext,
}

impl Binding {
    /// Create a binding over `doc`. The root shadow is bound to the
    /// document's root containers.
    pub fn new(doc: LoroDoc, config: &CollabConfig, debug: DebugContext) -> Self {
        configure_styles(&doc);
        let tree = ShadowTree::new(&doc);
        let excluded_properties = config
            .excluded_properties
            .iter()
            .map(|(node_type, names)| (node_type.clone(), names.iter().cloned().collect()))
            .collect();
        Self {
            client_id: doc.peer_id(),
            doc,
            tree,
            cursors: HashMap::new(),
            excluded_properties,
            property_cache: HashMap::new(),
            default_block_type: config.default_block_type.clone(),
            pending_repairs: 0,
            desynced: None,
            debug,
        }
    }

    /// The CRDT peer id of this replica.
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn shadow(&self) -> &ShadowTree {
        &self.tree
    }

    pub fn cursors(&self) -> &HashMap<u64, CursorState> {
        &self.cursors
    }

    pub fn debug(&self) -> &DebugContext {
        &self.debug
    }

    pub fn debug_mut(&mut self) -> &mut DebugContext {
        &mut self.debug
    }

    /// Whether a failed remote batch left the editor behind the document.
    pub fn is_desynced(&self) -> bool {
        self.desynced.is_some()
    }

    /// Whether the shared root holds no children yet.
    pub fn is_shared_empty(&self) -> bool {
        self.tree
            .get(ROOT_KEY)
            .and_then(|root| root.stream())
            .is_none_or(|stream| stream.is_empty())
    }

    /// Exclude a property of `node_type` from mirroring.
    pub fn exclude_property(&mut self, node_type: &str, name: &str) {
        self.excluded_properties
            .entry(SmolStr::new(node_type))
            .or_default()
            .insert(SmolStr::new(name));
        if let Some(cached) = self.property_cache.get_mut(node_type) {
            cached.retain(|n| n != name);
        }
    }

    pub fn is_excluded(&self, node_type: &str, name: &str) -> bool {
        is_reserved(name)
            || self
                .excluded_properties
                .get(node_type)
                .is_some_and(|names| names.contains(name))
    }

    /// Mirrored property names for a node's type.
    ///
    /// The list is computed once per type and then extended whenever an
    /// instance carries a property not seen before, so optional properties
    /// added after the first instance are still mirrored.
    pub(crate) fn mirrored_properties(&mut self, node: &EditorNode) -> Vec<SmolStr> {
        self.observe_properties(&node.node_type, node.properties.keys())
    }

    pub(crate) fn observe_properties<'a>(
        &mut self,
        node_type: &SmolStr,
        names: impl IntoIterator<Item = &'a SmolStr>,
    ) -> Vec<SmolStr> {
        let excluded = self.excluded_properties.get(node_type);
        let cached = self.property_cache.entry(node_type.clone()).or_default();
        for name in names {
            if is_reserved(name) || excluded.is_some_and(|e| e.contains(name)) {
                continue;
            }
            if !cached.contains(name) {
                tracing::trace!(%node_type, property = %name, "mirroring new property");
                cached.push(name.clone());
            }
        }
        cached.clone()
    }

    /// Commit pending writes under `origin` and record the pass.
    pub(crate) fn commit(&mut self, origin: &str, direction: SyncDirection, changes: usize) {
        self.doc.set_next_commit_origin(origin);
        self.doc.commit();
        self.debug.record(direction, origin, changes);
    }
}
