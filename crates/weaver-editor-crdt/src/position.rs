//! Mapping between editor points and stable positions in marker streams.
//!
//! A text point at character `i` of child `c` maps into the parent stream at
//! `offset(c) + 1 + i`, biased to the content on its left. An element point
//! before child `i` maps into the element's own stream at the summed
//! footprints of its first `i` children, biased to the right. Positions are
//! stored as Loro cursors so they follow concurrent edits.

use loro::cursor::{Cursor, Side};
use serde::{Deserialize, Serialize};
use weaver_editor_core::{
    Affinity, EditorState, EditorUpdate, Point, PointKind, ROOT_KEY, RangeSelection,
};

use crate::binding::Binding;
use crate::shadow::ContainerRole;

/// A position that survives concurrent edits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRef {
    /// Encoded Loro cursor into a marker stream.
    cursor: Vec<u8>,
    bias: Affinity,
}

impl PositionRef {
    pub fn bias(&self) -> Affinity {
        self.bias
    }
}

/// Local selection captured before shared state changes underneath it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedSelection {
    pub anchor: Option<PositionRef>,
    pub focus: Option<PositionRef>,
    /// Index of the anchor's top-level block, for fallback placement.
    pub block_index: Option<usize>,
}

impl Binding {
    /// Encode an editor point. `None` if the point's node is not mirrored.
    pub fn encode_point(&self, point: &Point) -> Option<PositionRef> {
        let (stream_owner, offset, bias) = match point.kind {
            PointKind::Text => {
                let node = self.tree.get(&point.key)?;
                let parent = node.parent.as_ref()?;
                let intra = point.offset.min(node.size());
                let start = self.tree.child_offset(parent, &point.key)?;
                (parent.clone(), start + 1 + intra, Affinity::Before)
            }
            PointKind::Element => {
                let index = point.offset.min(self.tree.children(&point.key).len());
                let offset = self.tree.index_offset(&point.key, index);
                (point.key.clone(), offset, Affinity::After)
            }
        };
        let stream = self.tree.get(&stream_owner)?.stream()?;
        let cursor = stream.text().get_cursor(offset, Side::default())?;
        Some(PositionRef {
            cursor: cursor.encode(),
            bias,
        })
    }

    /// Resolve a position against the current tree.
    ///
    /// Returns `None` when the stream it points into is no longer mirrored
    /// or the offset falls outside it; callers should fall back rather than
    /// fail. A text node removed from a surviving element does not make its
    /// positions unresolvable: they slide to where the node's run was, the
    /// same way positions inside a run merged away by normalization land in
    /// the sibling that absorbed it.
    pub fn decode_point(&self, position: &PositionRef) -> Option<Point> {
        let cursor = Cursor::decode(&position.cursor).ok()?;
        let (key, role) = self.tree.resolve(&cursor.container)?;
        if role != ContainerRole::Stream {
            return None;
        }
        let offset = self.doc.get_cursor_pos(&cursor).ok()?.current.pos;
        self.point_at(key, offset, position.bias)
    }

    /// Translate a stream offset of element `key` into an editor point.
    pub fn point_at(&self, key: &str, offset: usize, bias: Affinity) -> Option<Point> {
        let children = self.tree.children(key);
        let mut start = 0;
        for (index, child) in children.iter().enumerate() {
            let node = self.tree.get(child)?;
            let end = start + node.footprint();
            match bias {
                Affinity::Before if start < offset && offset <= end => {
                    return Some(if node.is_text() {
                        Point::text(child.clone(), offset - start - 1)
                    } else {
                        Point::element(key, index + 1)
                    });
                }
                Affinity::After if offset == start => {
                    return Some(Point::element(key, index));
                }
                Affinity::After if start < offset && offset < end && node.is_text() => {
                    return Some(Point::text(child.clone(), offset - start - 1));
                }
                _ => {}
            }
            start = end;
        }
        match bias {
            Affinity::Before if offset == 0 => Some(Point::element(key, 0)),
            Affinity::After if offset == start => Some(Point::element(key, children.len())),
            _ => None,
        }
    }

    pub fn encode_selection(
        &self,
        selection: &RangeSelection,
    ) -> (Option<PositionRef>, Option<PositionRef>) {
        (
            self.encode_point(&selection.anchor),
            self.encode_point(&selection.focus),
        )
    }

    /// Capture the local selection so it can be restored after shared state
    /// changes. Must be called while the shadow tree matches the document.
    pub fn capture_selection(&self, state: &EditorState) -> Option<SavedSelection> {
        let selection = state.selection()?;
        let (anchor, focus) = self.encode_selection(selection);
        let block_index = state
            .top_level_block(&selection.anchor.key)
            .and_then(|block| state.index_in_parent(block));
        Some(SavedSelection {
            anchor,
            focus,
            block_index,
        })
    }

    /// Re-resolve a captured selection inside an update, falling back to the
    /// nearest surviving top-level block when it cannot be resolved.
    pub(crate) fn restore_selection(&self, update: &mut EditorUpdate<'_>, saved: &SavedSelection) {
        let anchor = saved.anchor.as_ref().and_then(|p| self.decode_point(p));
        let focus = saved.focus.as_ref().and_then(|p| self.decode_point(p));
        if let (Some(anchor), Some(focus)) = (anchor, focus) {
            update.set_selection(Some(RangeSelection::new(anchor, focus)));
            return;
        }

        let blocks = update.state().children(ROOT_KEY);
        let fallback = match saved.block_index {
            Some(index) if index < blocks.len() => Some(Point::element(blocks[index].clone(), 0)),
            _ => blocks.last().map(|last| {
                let len = update.state().children(last).len();
                Point::element(last.clone(), len)
            }),
        };
        tracing::debug!(?fallback, "selection unresolvable after remote change");
        update.set_selection(fallback.map(RangeSelection::collapsed));
    }
}
