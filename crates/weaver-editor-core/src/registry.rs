//! Node type registry.
//!
//! Every node type an editor can hold must be registered up front. Peers in a
//! collaborative session are expected to share the same registrations.

use std::collections::HashMap;

use smol_str::SmolStr;

use crate::node::{NodeKind, Properties};

pub const ROOT_TYPE: &str = "root";
pub const PARAGRAPH_TYPE: &str = "paragraph";
pub const HEADING_TYPE: &str = "heading";
pub const QUOTE_TYPE: &str = "quote";
pub const LIST_TYPE: &str = "list";
pub const LIST_ITEM_TYPE: &str = "listitem";
pub const CODE_TYPE: &str = "code";
pub const TEXT_TYPE: &str = "text";
pub const LINE_BREAK_TYPE: &str = "linebreak";
pub const HORIZONTAL_RULE_TYPE: &str = "horizontalrule";
pub const IMAGE_TYPE: &str = "image";

/// Registration for a single node type.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeClass {
    pub node_type: SmolStr,
    pub kind: NodeKind,
    /// Properties every new instance starts with.
    pub defaults: Properties,
}

impl NodeClass {
    pub fn new(node_type: impl Into<SmolStr>, kind: NodeKind) -> Self {
        Self {
            node_type: node_type.into(),
            kind,
            defaults: Properties::new(),
        }
    }

    pub fn element(node_type: impl Into<SmolStr>) -> Self {
        Self::new(node_type, NodeKind::Element)
    }

    pub fn text(node_type: impl Into<SmolStr>) -> Self {
        Self::new(node_type, NodeKind::Text)
    }

    pub fn line_break(node_type: impl Into<SmolStr>) -> Self {
        Self::new(node_type, NodeKind::LineBreak)
    }

    pub fn decorator(node_type: impl Into<SmolStr>) -> Self {
        Self::new(node_type, NodeKind::Decorator)
    }

    /// Add a default property.
    pub fn with_default(mut self, name: impl Into<SmolStr>, value: serde_json::Value) -> Self {
        self.defaults.insert(name.into(), value);
        self
    }
}

/// Lookup table from type name to [`NodeClass`].
#[derive(Clone, Debug, Default)]
pub struct NodeRegistry {
    classes: HashMap<SmolStr, NodeClass>,
}

impl NodeRegistry {
    /// Create an empty registry. Only the root type is present.
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register(NodeClass::element(ROOT_TYPE));
        registry
    }

    /// Registry with the block, inline and decorator types a rich-text
    /// document normally needs.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(NodeClass::element(PARAGRAPH_TYPE));
        registry.register(NodeClass::element(HEADING_TYPE).with_default("tag", "h1".into()));
        registry.register(NodeClass::element(QUOTE_TYPE));
        registry.register(NodeClass::element(LIST_TYPE).with_default("listType", "bullet".into()));
        registry.register(NodeClass::element(LIST_ITEM_TYPE).with_default("value", 1.into()));
        registry.register(NodeClass::element(CODE_TYPE));
        registry.register(NodeClass::text(TEXT_TYPE).with_default("format", 0.into()));
        registry.register(NodeClass::line_break(LINE_BREAK_TYPE));
        registry.register(NodeClass::decorator(HORIZONTAL_RULE_TYPE));
        registry.register(NodeClass::decorator(IMAGE_TYPE));
        registry
    }

    /// Register a class, replacing any previous registration of the same type.
    pub fn register(&mut self, class: NodeClass) -> Option<NodeClass> {
        self.classes.insert(class.node_type.clone(), class)
    }

    pub fn get(&self, node_type: &str) -> Option<&NodeClass> {
        self.classes.get(node_type)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.classes.contains_key(node_type)
    }

    pub fn kind_of(&self, node_type: &str) -> Option<NodeKind> {
        self.get(node_type).map(|class| class.kind)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry() {
        let registry = NodeRegistry::standard();
        assert_eq!(registry.kind_of("paragraph"), Some(NodeKind::Element));
        assert_eq!(registry.kind_of("text"), Some(NodeKind::Text));
        assert_eq!(registry.kind_of("linebreak"), Some(NodeKind::LineBreak));
        assert_eq!(registry.kind_of("image"), Some(NodeKind::Decorator));
        assert!(registry.get("table").is_none());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = NodeRegistry::new();
        assert!(registry.register(NodeClass::element("callout")).is_none());
        let previous = registry.register(NodeClass::decorator("callout"));
        assert_eq!(previous.map(|c| c.kind), Some(NodeKind::Element));
        assert_eq!(registry.kind_of("callout"), Some(NodeKind::Decorator));
    }

    #[test]
    fn test_defaults() {
        let registry = NodeRegistry::standard();
        let heading = registry.get("heading").unwrap();
        assert_eq!(heading.defaults.get("tag"), Some(&serde_json::json!("h1")));
    }
}
