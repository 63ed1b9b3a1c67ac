//! EDIFACT interchange parser
//!
//! Entry points that wire a [`SegmentReader`], an [`Emitter`] and a
//! [`Validator`] together and run the control block state machine, or map
//! a plain message stream against a single model.

use edi_ir::{Emitter, EventSink, SegmentPosition};
use edi_schema::{Delimiters, MappingModel, MappingsRegistry};
use edi_validation::{ValidationConfig, Validator};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use tracing::debug;

use crate::envelopes::{MessageSummary, ParseOutcome};
use crate::handlers::InterchangeContext;
use crate::message::{MappingOptions, MessageParser, ParseState};
use crate::reader::SegmentReader;
use crate::syntax::{SyntaxVersion, encoding_for_label};
use crate::{Error, Result};

/// Settings of a parse run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    /// Encoding the input is read with until an interchange header
    /// declares another one (default UTF-8)
    pub encoding: Option<String>,
    /// Delimiters to start with; a UNA segment still replaces them
    pub delimiters: Option<Delimiters>,
    /// Force a syntax version instead of reading it from each UNB
    pub syntax_version: Option<SyntaxVersion>,
    pub ignore_newlines: bool,
    pub ignore_empty_nodes: bool,
    pub ignore_unmapped_segments: bool,
    pub validation: ValidationConfig,
}

impl ParserSettings {
    /// The initial encoding.
    ///
    /// # Errors
    ///
    /// Fails when the configured label names no known encoding.
    pub fn initial_encoding(&self) -> Result<&'static Encoding> {
        match self.encoding.as_deref() {
            None => Ok(encoding_rs::UTF_8),
            Some(label) => encoding_for_label(label).ok_or_else(|| {
                Error::encoding(
                    format!("unknown encoding '{label}'"),
                    SegmentPosition::start_of_stream(),
                )
            }),
        }
    }

    fn mapping_options(&self) -> MappingOptions {
        MappingOptions {
            ignore_empty_nodes: self.ignore_empty_nodes,
            ignore_unmapped_segments: self.ignore_unmapped_segments,
        }
    }

    fn state<'a>(&self, reader: SegmentReader<'a>, sink: &'a mut dyn EventSink) -> ParseState<'a> {
        ParseState {
            reader: reader.with_ignore_newlines(self.ignore_newlines),
            emitter: Emitter::new(sink),
            validator: Validator::new(self.validation.clone()),
            options: self.mapping_options(),
        }
    }
}

/// Parser for UN/EDIFACT interchanges
///
/// One parser can be shared by many threads; each call to
/// [`parse`](Self::parse) owns its reader, namespace stack and validator.
/// Only the mappings registry is shared.
#[derive(Debug, Clone)]
pub struct InterchangeParser {
    registry: Arc<MappingsRegistry>,
    settings: ParserSettings,
}

impl InterchangeParser {
    pub fn new(registry: Arc<MappingsRegistry>) -> Self {
        Self {
            registry,
            settings: ParserSettings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ParserSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<MappingsRegistry> {
        &self.registry
    }

    /// Parse a byte stream, pushing events into `sink`.
    ///
    /// # Errors
    ///
    /// Returns the first encoding, structural, configuration or sink error,
    /// and the first validation error under the abort policy.
    pub fn parse<R: Read>(&self, input: R, sink: &mut dyn EventSink) -> Result<ParseOutcome> {
        let encoding = self.settings.initial_encoding()?;
        debug!("Parsing byte stream, initial encoding {}", encoding.name());
        let reader = SegmentReader::from_reader(input, encoding, self.initial_delimiters());
        self.run(reader, sink)
    }

    /// Parse already decoded text. Declared encodings are not applied.
    ///
    /// # Errors
    ///
    /// Same as [`parse`](Self::parse).
    pub fn parse_str(&self, input: &str, sink: &mut dyn EventSink) -> Result<ParseOutcome> {
        let reader = SegmentReader::from_text(input, self.initial_delimiters());
        self.run(reader, sink)
    }

    fn initial_delimiters(&self) -> Delimiters {
        self.settings.delimiters.unwrap_or_default()
    }

    fn run(&self, reader: SegmentReader<'_>, sink: &mut dyn EventSink) -> Result<ParseOutcome> {
        let state = self.settings.state(reader, sink);
        InterchangeContext::new(state, &self.registry, self.settings.syntax_version).run()
    }
}

/// Map a message stream without control blocks against `model`.
///
/// The stream is read with the model's delimiters (UN/EDIFACT defaults when
/// it declares none) unless `settings` supplies some.
///
/// # Errors
///
/// Same as [`InterchangeParser::parse`].
pub fn parse_message_stream<R: Read>(
    model: &MappingModel,
    input: R,
    settings: &ParserSettings,
    sink: &mut dyn EventSink,
) -> Result<ParseOutcome> {
    let delimiters = settings
        .delimiters
        .or(model.delimiters)
        .unwrap_or_default();
    let reader = SegmentReader::from_reader(input, settings.initial_encoding()?, delimiters);
    let mut state = settings.state(reader, sink);

    state.emitter.start_document()?;
    MessageParser::new(model, None).parse(&mut state)?;
    state.emitter.end_document()?;

    let segment_count = state.reader.segment_number();
    Ok(ParseOutcome {
        messages: vec![MessageSummary {
            reference: String::new(),
            lookup_name: model.lookup_name(),
            group_ref: None,
            segment_count,
        }],
        validation_errors: state.validator.into_errors(),
        segment_count,
        ..ParseOutcome::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = ParserSettings::default();
        assert_eq!(settings.initial_encoding().unwrap(), encoding_rs::UTF_8);
        assert!(settings.validation.enabled);
        assert_eq!(settings.syntax_version, None);
        assert!(!settings.ignore_newlines);
    }

    #[test]
    fn test_settings_from_json() {
        let settings: ParserSettings = serde_json::from_str(
            r#"{ "encoding": "ISO-8859-1", "syntax_version": 3, "ignore_newlines": true,
                 "validation": { "policy": "collect", "max_errors": 5 } }"#,
        )
        .unwrap();
        assert_eq!(settings.initial_encoding().unwrap(), encoding_rs::WINDOWS_1252);
        assert_eq!(settings.syntax_version, Some(SyntaxVersion::V3));
        assert!(settings.ignore_newlines);
        assert_eq!(settings.validation.max_errors, 5);
        assert!(settings.validation.enabled);
    }

    #[test]
    fn test_unknown_encoding_label() {
        let settings = ParserSettings {
            encoding: Some("EBCDIC-XYZ".to_string()),
            ..ParserSettings::default()
        };
        let err = settings.initial_encoding().unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
        assert_eq!(err.segment_number(), Some(0));
    }
}
