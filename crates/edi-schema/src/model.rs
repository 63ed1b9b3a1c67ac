//! Mapping model (Edimap): the grammar of one message type.
//!
//! A model is a tree of segment groups. Groups hold segments and nested
//! groups; segments hold fields, fields hold components, components hold
//! sub-components. Every node has a name, a resolved namespace and an
//! occurrence range.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::delimiters::Delimiters;

/// Upper occurrence bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxOccurs {
    Bounded(usize),
    Unbounded,
}

/// Occurrence range of a node. `min <= max` always holds for loaded models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurs {
    pub min: usize,
    pub max: MaxOccurs,
}

impl Occurs {
    pub const ONCE: Self = Self {
        min: 1,
        max: MaxOccurs::Bounded(1),
    };
    pub const OPTIONAL: Self = Self {
        min: 0,
        max: MaxOccurs::Bounded(1),
    };

    pub fn new(min: usize, max: MaxOccurs) -> Self {
        Self { min, max }
    }

    pub fn is_mandatory(&self) -> bool {
        self.min > 0
    }

    /// True once `count` occurrences leave no room for another.
    pub fn max_reached(&self, count: usize) -> bool {
        match self.max {
            MaxOccurs::Bounded(max) => count >= max,
            MaxOccurs::Unbounded => false,
        }
    }

    pub fn is_consistent(&self) -> bool {
        match self.max {
            MaxOccurs::Bounded(max) => self.min <= max,
            MaxOccurs::Unbounded => true,
        }
    }
}

impl fmt::Display for Occurs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            MaxOccurs::Bounded(max) => write!(f, "{}..{}", self.min, max),
            MaxOccurs::Unbounded => write!(f, "{}..*", self.min),
        }
    }
}

/// A namespace resolved from the model's prefix table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
}

/// Primitive type of a value node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    String,
    Numeric,
    Decimal,
    Date,
    Time,
    Binary,
}

/// Type and length constraints of a leaf value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSpec {
    pub data_type: DataType,
    /// Format parameter, e.g. a date pattern
    pub format: Option<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

/// Model identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub name: String,
    pub version: String,
    pub namespace: Option<Namespace>,
}

impl Description {
    /// Registry key: `name:version`, e.g. `ORDERS:D:96A:UN`.
    pub fn lookup_name(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

/// Join the first four components of a message identifier into a lookup key.
pub fn lookup_name<S: AsRef<str>>(components: &[S]) -> String {
    components
        .iter()
        .take(4)
        .map(AsRef::<str>::as_ref)
        .collect::<Vec<_>>()
        .join(":")
}

/// One parsed message grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingModel {
    pub description: Description,
    /// Delimiters for standalone message streams
    pub delimiters: Option<Delimiters>,
    /// Prefix to URI
    pub namespaces: BTreeMap<String, String>,
    pub root: SegmentGroup,
    segment_codes: HashSet<String>,
}

impl MappingModel {
    pub fn new(
        description: Description,
        delimiters: Option<Delimiters>,
        namespaces: BTreeMap<String, String>,
        root: SegmentGroup,
    ) -> Self {
        let mut segment_codes = HashSet::new();
        root.collect_segment_codes(&mut segment_codes);
        Self {
            description,
            delimiters,
            namespaces,
            root,
            segment_codes,
        }
    }

    pub fn lookup_name(&self) -> String {
        self.description.lookup_name()
    }

    /// Whether any segment in the model uses `segcode`.
    pub fn mentions_segment(&self, segcode: &str) -> bool {
        self.segment_codes.contains(segcode)
    }

    /// First segment definition with `segcode`, searched depth first.
    pub fn find_segment(&self, segcode: &str) -> Option<&SegmentDef> {
        self.root.find_segment(segcode)
    }
}

/// A group of segments and nested groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentGroup {
    pub xmltag: String,
    pub namespace: Option<Namespace>,
    pub occurs: Occurs,
    pub items: Vec<GroupItem>,
}

impl SegmentGroup {
    /// Code of the segment that opens this group.
    pub fn trigger_code(&self) -> Option<&str> {
        self.items.first().and_then(GroupItem::trigger_code)
    }

    pub fn find_segment(&self, segcode: &str) -> Option<&SegmentDef> {
        self.items.iter().find_map(|item| match item {
            GroupItem::Segment(segment) if segment.segcode == segcode => Some(segment),
            GroupItem::Segment(_) => None,
            GroupItem::Group(group) => group.find_segment(segcode),
        })
    }

    pub fn node(&self) -> MappingNode {
        MappingNode {
            kind: NodeKind::SegmentGroup,
            xmltag: self.xmltag.clone(),
            segcode: self.trigger_code().map(str::to_string),
            namespace: self.namespace.as_ref().map(|ns| ns.uri.clone()),
            occurs: self.occurs,
        }
    }

    fn collect_segment_codes(&self, codes: &mut HashSet<String>) {
        for item in &self.items {
            match item {
                GroupItem::Segment(segment) => {
                    codes.insert(segment.segcode.clone());
                }
                GroupItem::Group(group) => group.collect_segment_codes(codes),
            }
        }
    }
}

/// Child of a segment group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupItem {
    Segment(SegmentDef),
    Group(SegmentGroup),
}

impl GroupItem {
    /// Segment code that starts an occurrence of this item.
    pub fn trigger_code(&self) -> Option<&str> {
        match self {
            Self::Segment(segment) => Some(&segment.segcode),
            Self::Group(group) => group.trigger_code(),
        }
    }

    pub fn occurs(&self) -> Occurs {
        match self {
            Self::Segment(segment) => segment.occurs,
            Self::Group(group) => group.occurs,
        }
    }

    pub fn node(&self) -> MappingNode {
        match self {
            Self::Segment(segment) => segment.node(),
            Self::Group(group) => group.node(),
        }
    }
}

/// A segment definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDef {
    pub segcode: String,
    pub xmltag: String,
    pub description: Option<String>,
    pub namespace: Option<Namespace>,
    pub occurs: Occurs,
    /// Trailing fields may be left out
    pub truncatable: bool,
    /// Fields beyond the definition are dropped instead of reported
    pub ignore_unmapped_fields: bool,
    pub fields: Vec<FieldDef>,
}

impl SegmentDef {
    pub fn node(&self) -> MappingNode {
        MappingNode {
            kind: NodeKind::Segment,
            xmltag: self.xmltag.clone(),
            segcode: Some(self.segcode.clone()),
            namespace: self.namespace.as_ref().map(|ns| ns.uri.clone()),
            occurs: self.occurs,
        }
    }
}

/// A field (data element) of a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub xmltag: String,
    pub namespace: Option<Namespace>,
    pub required: bool,
    pub truncatable: bool,
    /// Used when the field has no components
    pub value: ValueSpec,
    pub components: Vec<ComponentDef>,
}

impl FieldDef {
    pub fn is_composite(&self) -> bool {
        !self.components.is_empty()
    }
}

/// A component of a composite field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDef {
    pub xmltag: String,
    pub namespace: Option<Namespace>,
    pub required: bool,
    pub truncatable: bool,
    pub value: ValueSpec,
    pub sub_components: Vec<SubComponentDef>,
}

/// A sub-component of a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubComponentDef {
    pub xmltag: String,
    pub namespace: Option<Namespace>,
    pub required: bool,
    pub value: ValueSpec,
}

/// Value-level node of any depth, used to describe it in diagnostics.
pub trait ValueNode {
    fn xmltag(&self) -> &str;
    fn namespace(&self) -> Option<&Namespace>;
    fn required(&self) -> bool;
    fn kind(&self) -> NodeKind;

    /// Descriptor of this node inside segment `segcode`.
    fn node(&self, segcode: &str) -> MappingNode {
        MappingNode {
            kind: self.kind(),
            xmltag: self.xmltag().to_string(),
            segcode: Some(segcode.to_string()),
            namespace: self.namespace().map(|ns| ns.uri.clone()),
            occurs: if self.required() {
                Occurs::ONCE
            } else {
                Occurs::OPTIONAL
            },
        }
    }
}

macro_rules! value_node {
    ($ty:ty, $kind:expr) => {
        impl ValueNode for $ty {
            fn xmltag(&self) -> &str {
                &self.xmltag
            }
            fn namespace(&self) -> Option<&Namespace> {
                self.namespace.as_ref()
            }
            fn required(&self) -> bool {
                self.required
            }
            fn kind(&self) -> NodeKind {
                $kind
            }
        }
    };
}

value_node!(FieldDef, NodeKind::Field);
value_node!(ComponentDef, NodeKind::Component);
value_node!(SubComponentDef, NodeKind::SubComponent);

/// Kind of mapping node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    SegmentGroup,
    Segment,
    Field,
    Component,
    SubComponent,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SegmentGroup => "segment group",
            Self::Segment => "segment",
            Self::Field => "field",
            Self::Component => "component",
            Self::SubComponent => "sub-component",
        };
        f.write_str(label)
    }
}

/// Owned description of a mapping node, carried by diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingNode {
    pub kind: NodeKind,
    pub xmltag: String,
    /// Code of the segment the node belongs to (or opens, for groups)
    pub segcode: Option<String>,
    pub namespace: Option<String>,
    pub occurs: Occurs,
}

impl fmt::Display for MappingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.xmltag)?;
        if let Some(segcode) = &self.segcode {
            write!(f, " [{segcode}]")?;
        }
        Ok(())
    }
}
