//! Versioned control block handler table.
//!
//! Each syntax version has one factory, built on first use from a bundled
//! control-segment model and shared by every interchange of that version.
//! The factory maps segment codes to [`ControlCode`]s, the closed set of
//! control blocks the state machine knows how to handle.

use edi_ir::QName;
use edi_schema::{GroupItem, MappingModel, Namespace, SegmentDef, loader};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

use crate::syntax::{RESERVED_CODE_PREFIX, SyntaxVersion};

static V3: LazyLock<Result<ControlBlockHandlerFactory, edi_schema::Error>> = LazyLock::new(|| {
    ControlBlockHandlerFactory::load(SyntaxVersion::V3, include_str!("../control/v3.yaml"))
});

static V4: LazyLock<Result<ControlBlockHandlerFactory, edi_schema::Error>> = LazyLock::new(|| {
    ControlBlockHandlerFactory::load(SyntaxVersion::V4, include_str!("../control/v4.yaml"))
});

/// Control blocks with a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCode {
    ServiceStringAdvice,
    InterchangeHeader,
    InterchangeTrailer,
    GroupHeader,
    GroupTrailer,
    MessageHeader,
    MessageTrailer,
}

impl ControlCode {
    pub const ALL: [Self; 7] = [
        Self::ServiceStringAdvice,
        Self::InterchangeHeader,
        Self::InterchangeTrailer,
        Self::GroupHeader,
        Self::GroupTrailer,
        Self::MessageHeader,
        Self::MessageTrailer,
    ];

    pub fn segment_code(self) -> &'static str {
        match self {
            Self::ServiceStringAdvice => "UNA",
            Self::InterchangeHeader => "UNB",
            Self::InterchangeTrailer => "UNZ",
            Self::GroupHeader => "UNG",
            Self::GroupTrailer => "UNE",
            Self::MessageHeader => "UNH",
            Self::MessageTrailer => "UNT",
        }
    }

    /// True when the segment carries a grammar in the control model
    pub fn has_segment_grammar(self) -> bool {
        self != Self::ServiceStringAdvice
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment_code())
    }
}

/// Handler table and control-segment grammars of one syntax version
#[derive(Debug)]
pub struct ControlBlockHandlerFactory {
    version: SyntaxVersion,
    namespace: Namespace,
    root_tag: String,
    handlers: HashMap<String, ControlCode>,
    segments: HashMap<String, SegmentDef>,
}

impl ControlBlockHandlerFactory {
    /// The shared factory for `version`.
    ///
    /// # Errors
    ///
    /// Fails when the bundled control model does not load.
    pub fn for_version(version: SyntaxVersion) -> Result<&'static Self, edi_schema::Error> {
        let factory = match version {
            SyntaxVersion::V3 => &*V3,
            SyntaxVersion::V4 => &*V4,
        };
        factory.as_ref().map_err(Clone::clone)
    }

    fn load(version: SyntaxVersion, yaml: &str) -> Result<Self, edi_schema::Error> {
        let model = loader::load_from_yaml(yaml)?
            .into_iter()
            .next()
            .ok_or_else(|| edi_schema::Error::InvalidFormat("empty control model".to_string()))?;
        Self::from_model(version, model)
    }

    /// Build a factory from a control-segment model.
    ///
    /// # Errors
    ///
    /// Fails when the model has no namespace or lacks the grammar of a
    /// handled control segment.
    pub fn from_model(
        version: SyntaxVersion,
        model: MappingModel,
    ) -> Result<Self, edi_schema::Error> {
        let invalid = |reason: String| edi_schema::Error::InvalidModel {
            model: model.lookup_name(),
            reason,
        };

        let namespace = model
            .description
            .namespace
            .clone()
            .or_else(|| model.root.namespace.clone())
            .ok_or_else(|| invalid("control model needs a namespace".to_string()))?;

        let segments: HashMap<String, SegmentDef> = model
            .root
            .items
            .iter()
            .filter_map(|item| match item {
                GroupItem::Segment(segment) => Some((segment.segcode.clone(), segment.clone())),
                GroupItem::Group(_) => None,
            })
            .collect();

        let mut handlers = HashMap::new();
        for code in ControlCode::ALL {
            if code.has_segment_grammar() && !segments.contains_key(code.segment_code()) {
                return Err(invalid(format!("no grammar for control segment {code}")));
            }
            handlers.insert(code.segment_code().to_string(), code);
        }

        debug!(
            "Control block handlers for syntax {}: {} codes, namespace {}",
            version,
            handlers.len(),
            namespace.uri
        );
        Ok(Self {
            version,
            namespace,
            root_tag: model.root.xmltag.clone(),
            handlers,
            segments,
        })
    }

    pub fn version(&self) -> SyntaxVersion {
        self.version
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Handler registered for a segment code
    pub fn handler(&self, code: &str) -> Option<ControlCode> {
        self.handlers.get(code).copied()
    }

    /// Grammar of a control segment
    pub fn segment(&self, code: ControlCode) -> Option<&SegmentDef> {
        self.segments.get(code.segment_code())
    }

    /// True for codes in the service segment range (`UN?`)
    pub fn is_reserved(&self, code: &str) -> bool {
        code.starts_with(RESERVED_CODE_PREFIX)
    }

    /// An envelope element in the control namespace
    pub fn element(&self, local_name: &str) -> QName {
        QName::qualified(
            local_name,
            self.namespace.uri.clone(),
            Some(&self.namespace.prefix),
        )
    }

    /// The document root element
    pub fn root_element(&self) -> QName {
        self.element(&self.root_tag)
    }
}
