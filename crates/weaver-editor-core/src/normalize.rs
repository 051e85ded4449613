//! Post-update normalization of text runs.
//!
//! Runs on every dirty element unless the update asked to skip transforms:
//! empty text nodes are dropped and adjacent text nodes with identical type
//! and properties are merged into the earlier one.

use crate::node::{NodeBody, NodeKey};
use crate::types::{Point, PointKind};
use crate::update::EditorUpdate;

pub(crate) fn normalize(update: &mut EditorUpdate<'_>) {
    let mut elements: Vec<NodeKey> = update.dirty_elements.iter().cloned().collect();
    elements.sort();
    for key in elements {
        normalize_element(update, &key);
    }
}

fn normalize_element(update: &mut EditorUpdate<'_>, parent: &NodeKey) {
    let children = update.state.children(parent).to_vec();
    let mut survivors: Vec<NodeKey> = Vec::with_capacity(children.len());
    let mut changed = false;

    for child in children {
        let Some(node) = update.state.nodes.get(&child) else {
            continue;
        };
        if !node.is_text() {
            survivors.push(child);
            continue;
        }

        if node.text_len() == 0 {
            let index = survivors.len();
            remap_points(update, &child, |_| Point::element(parent.clone(), index));
            update.state.nodes.remove(&child);
            update.dirty_leaves.remove(&child);
            update.normalized.insert(child);
            changed = true;
            continue;
        }

        let mergeable = survivors
            .last()
            .and_then(|prev| update.state.nodes.get(prev))
            .is_some_and(|prev| prev.can_merge_with(node));
        if !mergeable {
            survivors.push(child);
            continue;
        }

        let Some(prev_key) = survivors.last().cloned() else {
            continue;
        };
        let Some(removed) = update.state.nodes.remove(&child) else {
            continue;
        };
        let mut shift = 0;
        if let Some(prev) = update.state.nodes.get_mut(&prev_key) {
            shift = prev.text_len();
            if let (NodeBody::Text { text }, Some(extra)) = (&mut prev.body, removed.text()) {
                text.push_str(extra);
            }
        }
        tracing::trace!(survivor = %prev_key, merged = %child, "merging adjacent text nodes");
        remap_points(update, &child, |offset| {
            Point::text(prev_key.clone(), shift + offset)
        });
        update.dirty_leaves.remove(&child);
        update.dirty_leaves.insert(prev_key.clone());
        update.normalized.insert(child);
        update.normalized.insert(prev_key);
        changed = true;
    }

    if changed {
        let count = survivors.len();
        if let Ok(list) = update.children_mut(parent) {
            *list = survivors;
        }
        if let Some(selection) = update.state.selection.as_mut() {
            for point in selection.points_mut() {
                if point.kind == PointKind::Element && &point.key == parent {
                    point.offset = point.offset.min(count);
                }
            }
        }
        update.mark_dirty(parent);
    }
}

fn remap_points(update: &mut EditorUpdate<'_>, key: &NodeKey, remap: impl Fn(usize) -> Point) {
    if let Some(selection) = update.state.selection.as_mut() {
        for point in selection.points_mut() {
            if &point.key == key {
                *point = remap(point.offset);
            }
        }
    }
}
