//! Selection types: points, ranges and boundary affinity.

use serde::{Deserialize, Serialize};

use crate::node::NodeKey;

/// Which side of a boundary a position sticks to.
///
/// `Before` binds to the content on the left (the end of the previous child),
/// `After` binds to the content on the right (the start of the next child).
#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Affinity {
    #[default]
    Before,
    After,
}

/// How a point offset is interpreted.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointKind {
    /// Character offset inside a text node.
    Text,
    /// Child index inside an element.
    Element,
}

/// A position in the tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
    pub kind: PointKind,
}

impl Point {
    /// Create a point at a character offset (NOT byte offset!) in a text node.
    pub fn text(key: impl Into<NodeKey>, offset: usize) -> Self {
        Self {
            key: key.into(),
            offset,
            kind: PointKind::Text,
        }
    }

    /// Create a point before the child at `index` of an element.
    pub fn element(key: impl Into<NodeKey>, index: usize) -> Self {
        Self {
            key: key.into(),
            offset: index,
            kind: PointKind::Element,
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == PointKind::Text
    }
}

/// Selection with anchor and focus points.
///
/// The anchor is where the selection started, the focus is where the caret is now.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSelection {
    pub anchor: Point,
    pub focus: Point,
}

impl RangeSelection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self { anchor, focus }
    }

    /// Create a collapsed selection (caret).
    pub fn collapsed(point: Point) -> Self {
        Self {
            anchor: point.clone(),
            focus: point,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    /// Iterate over both points, anchor first.
    pub fn points(&self) -> impl Iterator<Item = &Point> {
        [&self.anchor, &self.focus].into_iter()
    }

    pub(crate) fn points_mut(&mut self) -> impl Iterator<Item = &mut Point> {
        [&mut self.anchor, &mut self.focus].into_iter()
    }
}
