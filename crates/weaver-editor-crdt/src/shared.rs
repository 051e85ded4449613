//! Narrow capability layer over the Loro containers that back the tree.
//!
//! Layout of a node in the shared document:
//!
//! - every node has an attribute map holding `__type` plus its mirrored
//!   properties
//! - an element's map also holds `__text`, its marker stream, and `__nodes`,
//!   the list of its children's attribute maps
//! - each child occupies one U+FFFC marker in its parent's stream, carrying a
//!   `__ref` mark with the child's attribute-map id; a text child's characters
//!   follow its marker directly
//!
//! The root uses the root containers named `root`, so peers that open the
//! same document concurrently share one root.

use std::collections::HashMap;

use loro::{
    Container, ContainerID, ContainerTrait, ExpandType, LoroDoc, LoroList, LoroMap, LoroText,
    LoroValue, StyleConfig, StyleConfigMap, ToJson, ValueOrContainer,
};
use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::CrdtError;

pub const TYPE_KEY: &str = "__type";
pub const STREAM_KEY: &str = "__text";
pub const NODES_KEY: &str = "__nodes";
pub const REF_STYLE: &str = "__ref";
pub const ROOT_CONTAINER: &str = "root";
pub const MARKER: char = '\u{FFFC}';

/// Whether a property name is reserved for the binding itself.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with("__")
}

/// Map-like shared container.
pub trait SharedMap {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), CrdtError>;
    fn delete(&self, key: &str) -> Result<(), CrdtError>;
    fn keys(&self) -> Vec<SmolStr>;
}

/// Sequence-like shared container, indexed in characters.
pub trait SharedSequence {
    fn insert(&self, offset: usize, text: &str) -> Result<(), CrdtError>;
    fn delete(&self, offset: usize, len: usize) -> Result<(), CrdtError>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Configure the marker style on a document. Must run on every peer before
/// any marker is written, otherwise edits next to a marker inherit its ref.
pub fn configure_styles(doc: &LoroDoc) {
    let mut styles = StyleConfigMap::new();
    styles.insert(
        REF_STYLE.into(),
        StyleConfig {
            expand: ExpandType::None,
        },
    );
    doc.config_text_style(styles);
}

/// Attribute map of one node.
#[derive(Clone, Debug)]
pub struct AttrMap(LoroMap);

impl AttrMap {
    pub fn new(map: LoroMap) -> Self {
        Self(map)
    }

    pub fn root(doc: &LoroDoc) -> Self {
        Self(doc.get_map(ROOT_CONTAINER))
    }

    pub fn id(&self) -> ContainerID {
        self.0.id()
    }

    /// The id string used as a marker ref.
    pub fn reference(&self) -> SmolStr {
        SmolStr::new(self.0.id().to_string())
    }

    pub fn node_type(&self) -> Option<SmolStr> {
        match self.0.get(TYPE_KEY)? {
            ValueOrContainer::Value(LoroValue::String(s)) => Some(SmolStr::new(s.as_str())),
            _ => None,
        }
    }

    pub fn set_node_type(&self, node_type: &str) -> Result<(), CrdtError> {
        self.0.insert(TYPE_KEY, node_type)?;
        Ok(())
    }

    pub fn set_value(&self, key: &str, value: LoroValue) -> Result<(), CrdtError> {
        self.0.insert(key, value)?;
        Ok(())
    }

    /// Create the stream and child list of an element record.
    pub fn init_element(&self) -> Result<(MarkerStream, ChildSlots), CrdtError> {
        let stream = self.0.insert_container(STREAM_KEY, LoroText::new())?;
        let slots = self.0.insert_container(NODES_KEY, LoroList::new())?;
        Ok((MarkerStream(stream), ChildSlots(slots)))
    }

    /// The stream and child list of an existing element record.
    pub fn element_parts(&self) -> Result<(MarkerStream, ChildSlots), CrdtError> {
        let stream = match self.0.get(STREAM_KEY) {
            Some(ValueOrContainer::Container(Container::Text(text))) => text,
            _ => return Err(self.malformed("missing marker stream")),
        };
        let slots = match self.0.get(NODES_KEY) {
            Some(ValueOrContainer::Container(Container::List(list))) => list,
            _ => return Err(self.malformed("missing child list")),
        };
        Ok((MarkerStream(stream), ChildSlots(slots)))
    }

    /// Mirrored (non-reserved) properties.
    pub fn properties(&self) -> HashMap<SmolStr, serde_json::Value> {
        let mut props = HashMap::new();
        self.0.for_each(|key, value| {
            if is_reserved(key) {
                return;
            }
            if let ValueOrContainer::Value(value) = value {
                props.insert(SmolStr::new(key), value.to_json_value());
            }
        });
        props
    }

    pub(crate) fn malformed(&self, reason: &str) -> CrdtError {
        CrdtError::MalformedNode {
            container: self.0.id().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl SharedMap for AttrMap {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        match self.0.get(key)? {
            ValueOrContainer::Value(value) => Some(value.to_json_value()),
            ValueOrContainer::Container(_) => None,
        }
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), CrdtError> {
        self.set_value(key, to_loro_value(key, value)?)
    }

    fn delete(&self, key: &str) -> Result<(), CrdtError> {
        self.0.delete(key)?;
        Ok(())
    }

    fn keys(&self) -> Vec<SmolStr> {
        let mut keys = Vec::new();
        self.0.for_each(|key, _| keys.push(SmolStr::new(key)));
        keys
    }
}

/// One item read back from a marker stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamItem {
    /// A child marker carrying the child's attribute-map id.
    Marker(SmolStr),
    /// A run of plain characters.
    Text(String),
}

/// Rich-text delta span as produced by `get_richtext_value`.
#[derive(Debug, Deserialize)]
struct DeltaSpan {
    insert: String,
    #[serde(default)]
    attributes: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Marker stream of one element.
#[derive(Clone, Debug)]
pub struct MarkerStream(LoroText);

impl MarkerStream {
    pub fn root(doc: &LoroDoc) -> Self {
        Self(doc.get_text(ROOT_CONTAINER))
    }

    pub fn id(&self) -> ContainerID {
        self.0.id()
    }

    pub fn text(&self) -> &LoroText {
        &self.0
    }

    /// Insert a child marker at `offset`.
    pub fn insert_marker(&self, offset: usize, reference: &str) -> Result<(), CrdtError> {
        let mut buf = [0u8; 4];
        self.0.insert(offset, MARKER.encode_utf8(&mut buf))?;
        self.0.mark(offset..offset + 1, REF_STYLE, reference)?;
        Ok(())
    }

    /// Read the stream back as markers and text runs.
    pub fn items(&self) -> Result<Vec<StreamItem>, CrdtError> {
        let delta = self.0.get_richtext_value().to_json_value();
        let spans: Vec<DeltaSpan> =
            serde_json::from_value(delta).map_err(|e| CrdtError::MalformedNode {
                container: self.0.id().to_string(),
                reason: e.to_string(),
            })?;

        let mut items: Vec<StreamItem> = Vec::new();
        for span in spans {
            let reference = span
                .attributes
                .as_ref()
                .and_then(|attrs| attrs.get(REF_STYLE))
                .and_then(|value| value.as_str());
            match reference {
                Some(reference) => {
                    // A styled span holds one marker; anything else in it is
                    // content typed before the style was configured.
                    let mut chars = span.insert.chars();
                    if chars.next().is_some() {
                        items.push(StreamItem::Marker(SmolStr::new(reference)));
                    }
                    push_text(&mut items, chars.as_str());
                }
                None => push_text(&mut items, &span.insert),
            }
        }
        Ok(items)
    }
}

fn push_text(items: &mut Vec<StreamItem>, text: &str) {
    if text.is_empty() {
        return;
    }
    match items.last_mut() {
        Some(StreamItem::Text(run)) => run.push_str(text),
        _ => items.push(StreamItem::Text(text.to_string())),
    }
}

impl SharedSequence for MarkerStream {
    fn insert(&self, offset: usize, text: &str) -> Result<(), CrdtError> {
        if !text.is_empty() {
            self.0.insert(offset, text)?;
        }
        Ok(())
    }

    fn delete(&self, offset: usize, len: usize) -> Result<(), CrdtError> {
        if len > 0 {
            self.0.delete(offset, len)?;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.0.len_unicode()
    }
}

/// Child attribute maps of one element.
#[derive(Clone, Debug)]
pub struct ChildSlots(LoroList);

impl ChildSlots {
    pub fn root(doc: &LoroDoc) -> Self {
        Self(doc.get_list(ROOT_CONTAINER))
    }

    /// Create a node record of `node_type` in this element.
    pub fn create(&self, node_type: &str) -> Result<AttrMap, CrdtError> {
        let map = self.0.insert_container(self.0.len(), LoroMap::new())?;
        let attrs = AttrMap(map);
        attrs.set_node_type(node_type)?;
        Ok(attrs)
    }

    /// All child records keyed by their marker ref.
    pub fn by_reference(&self) -> HashMap<SmolStr, AttrMap> {
        let mut maps = HashMap::new();
        for index in 0..self.0.len() {
            if let Some(ValueOrContainer::Container(Container::Map(map))) = self.0.get(index) {
                maps.insert(SmolStr::new(map.id().to_string()), AttrMap(map));
            }
        }
        maps
    }

    /// Delete the record with the given ref. Returns whether it was found.
    pub fn remove(&self, reference: &str) -> Result<bool, CrdtError> {
        for index in 0..self.0.len() {
            if let Some(ValueOrContainer::Container(Container::Map(map))) = self.0.get(index) {
                if map.id().to_string() == reference {
                    self.0.delete(index, 1)?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// Convert a JSON property into a Loro value.
pub fn to_loro_value(property: &str, value: &serde_json::Value) -> Result<LoroValue, CrdtError> {
    use serde_json::Value;

    Ok(match value {
        Value::Null => LoroValue::Null,
        Value::Bool(b) => LoroValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                LoroValue::I64(i)
            } else if let Some(f) = n.as_f64() {
                LoroValue::Double(f)
            } else {
                return Err(CrdtError::UnsupportedValue {
                    property: property.into(),
                    reason: format!("number {n} out of range"),
                });
            }
        }
        Value::String(s) => LoroValue::from(s.as_str()),
        Value::Array(items) => LoroValue::from(
            items
                .iter()
                .map(|item| to_loro_value(property, item))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(map) => LoroValue::from(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), to_loro_value(property, v)?)))
                .collect::<Result<HashMap<String, LoroValue>, CrdtError>>()?,
        ),
    })
}
