#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # edi-adapter-edifact
//!
//! Streaming UN/EDIFACT interchange parser.
//!
//! The parser reads an interchange segment by segment, walks the control
//! blocks (UNB/UNZ, UNG/UNE, UNH/UNT) with a versioned handler table, maps
//! every message body against the mapping model registered for its message
//! type, and pushes the result to an [`edi_ir::EventSink`] as XML-like
//! events. Nothing is buffered beyond the segment being read.
//!
//! ## Example Usage
//!
//! ```rust
//! use edi_adapter_edifact::InterchangeParser;
//! use edi_ir::EventRecorder;
//! use edi_schema::{InMemoryLoader, MappingsRegistry, loader};
//! use std::sync::Arc;
//!
//! let models = loader::load_from_yaml(
//!     "description: { name: PING, version: \"D:01B:UN\" }\n\
//!      root:\n  xmltag: Ping\n  items:\n    - segment: { segcode: FTX, xmltag: text, \
//!      min_occurs: 1, fields: [ { xmltag: value } ] }\n",
//! )
//! .unwrap();
//! let registry = Arc::new(MappingsRegistry::new(InMemoryLoader::new(models)));
//!
//! let input = "UNB+UNOA:4+SENDER+RECEIVER+240101:1200+1'\
//!              UNH+1+PING:D:01B:UN'FTX+hello'UNT+3+1'UNZ+1+1'";
//! let mut recorder = EventRecorder::new();
//! let outcome = InterchangeParser::new(registry)
//!     .parse_str(input, &mut recorder)
//!     .unwrap();
//!
//! assert_eq!(outcome.interchanges[0].messages[0].lookup_name, "PING:D:01B:UN");
//! assert!(recorder.element_names().contains(&"Ping"));
//! ```

pub mod control;
pub mod envelopes;
pub mod handlers;
pub mod message;
pub mod parser;
pub mod reader;
pub mod syntax;

pub use control::{ControlBlockHandlerFactory, ControlCode};
pub use envelopes::{InterchangeSummary, MessageSummary, ParseOutcome};
pub use parser::{InterchangeParser, ParserSettings, parse_message_stream};
pub use reader::SegmentReader;
pub use syntax::SyntaxVersion;

use edi_ir::SegmentPosition;
use edi_schema::{DelimiterError, MappingNode};
use edi_validation::ValidationError;
use thiserror::Error;

/// What went wrong with the structure of the segment stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("unexpected end of stream, expected segment '{expected}'")]
    UnexpectedEndOfStream { expected: String },

    #[error("unexpected segment '{found}', expected {expected}")]
    UnexpectedSegment { expected: String, found: String },

    #[error("segment '{code}' is not part of message model '{model}'")]
    UnmappedSegment { code: String, model: String },

    #[error("malformed segment: {0}")]
    MalformedSegment(String),
}

/// The single failure type of a parse
#[derive(Error, Debug)]
pub enum Error {
    #[error("Encoding error at {position}: {message}")]
    Encoding {
        message: String,
        position: SegmentPosition,
    },

    #[error("Structural error at {position}: {kind}")]
    Structural {
        kind: StructuralError,
        position: SegmentPosition,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Configuration error at {position}: {source}")]
    Configuration {
        source: edi_schema::Error,
        position: SegmentPosition,
    },

    #[error("Invalid delimiters at {position}: {source}")]
    Delimiters {
        source: DelimiterError,
        position: SegmentPosition,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Event sink error: {0}")]
    Sink(#[from] edi_ir::Error),
}

impl Error {
    pub fn encoding(message: impl Into<String>, position: SegmentPosition) -> Self {
        Self::Encoding {
            message: message.into(),
            position,
        }
    }

    pub fn structural(kind: StructuralError, position: SegmentPosition) -> Self {
        Self::Structural { kind, position }
    }

    /// Where the failure happened, when known
    pub fn position(&self) -> Option<&SegmentPosition> {
        match self {
            Self::Encoding { position, .. }
            | Self::Structural { position, .. }
            | Self::Configuration { position, .. }
            | Self::Delimiters { position, .. } => Some(position),
            Self::Validation(error) => Some(&error.position),
            Self::Io(_) | Self::Sink(_) => None,
        }
    }

    /// 1-based ordinal of the offending segment; 0 before the first segment
    pub fn segment_number(&self) -> Option<usize> {
        self.position().map(|p| p.segment_number)
    }

    /// The mapping node a validation failure refers to
    pub fn mapping_node(&self) -> Option<&MappingNode> {
        match self {
            Self::Validation(error) => Some(&error.node),
            _ => None,
        }
    }

    pub fn is_unexpected_end_of_stream(&self) -> bool {
        matches!(
            self,
            Self::Structural {
                kind: StructuralError::UnexpectedEndOfStream { .. },
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_error_mentions_end_of_stream() {
        let err = Error::structural(
            StructuralError::UnexpectedEndOfStream {
                expected: "UNZ".to_string(),
            },
            SegmentPosition::new(4, vec!["UNT".to_string(), "3".to_string()]),
        );
        assert!(err.to_string().contains("unexpected end of stream"));
        assert!(err.is_unexpected_end_of_stream());
        assert_eq!(err.segment_number(), Some(4));
        assert!(err.mapping_node().is_none());
    }

    #[test]
    fn test_configuration_error_names_key() {
        let err = Error::Configuration {
            source: edi_schema::Error::NotFound("IFTMIN:D:96A:UN".to_string()),
            position: SegmentPosition::new(2, vec!["UNH".to_string()]),
        };
        assert!(err.to_string().contains("IFTMIN:D:96A:UN"));
        assert_eq!(err.segment_number(), Some(2));
    }

    #[test]
    fn test_delimiter_error_has_no_ordinal() {
        let err = Error::Delimiters {
            source: DelimiterError::Malformed("short".to_string()),
            position: SegmentPosition::start_of_stream(),
        };
        assert_eq!(err.segment_number(), Some(0));
    }
}
