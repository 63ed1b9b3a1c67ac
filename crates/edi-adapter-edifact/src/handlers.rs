//! Control block state machine.
//!
//! Recursive descent over document, interchange (UNB/UNZ), functional group
//! (UNG/UNE) and message (UNH/UNT) levels. Each level peeks the next
//! segment code, returns on its closing code and dispatches everything else
//! through the [`ControlBlockHandlerFactory`] of the active syntax version.

use edi_ir::SegmentPosition;
use edi_schema::{MappingsRegistry, ValueNode};
use edi_validation::ValidationErrorKind;
use tracing::{debug, info};

use crate::control::{ControlBlockHandlerFactory, ControlCode};
use crate::envelopes::{
    InterchangeSummary, MessageSummary, ParseOutcome, SyntaxIdentifier, control_count,
    element_value,
};
use crate::message::{MessageParser, ParseState, map_segment};
use crate::syntax::{SyntaxVersion, UNA_LENGTH, charset_for, parse_una};
use crate::{Error, Result, StructuralError};

const INTERCHANGE: &str = "interchange";
const GROUP: &str = "group";
const MESSAGE: &str = "interchangeMessage";

/// Structural level the parser is at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Document,
    Interchange,
    Group,
}

impl Level {
    fn accepts(self, code: ControlCode) -> bool {
        match self {
            Self::Document => matches!(
                code,
                ControlCode::ServiceStringAdvice
                    | ControlCode::InterchangeHeader
                    | ControlCode::MessageHeader
            ),
            Self::Interchange => {
                matches!(code, ControlCode::GroupHeader | ControlCode::MessageHeader)
            }
            Self::Group => code == ControlCode::MessageHeader,
        }
    }

    fn closing(self) -> Option<ControlCode> {
        match self {
            Self::Document => None,
            Self::Interchange => Some(ControlCode::InterchangeTrailer),
            Self::Group => Some(ControlCode::GroupTrailer),
        }
    }

    fn expected(self) -> &'static str {
        match self {
            Self::Document => "UNA, UNB or UNH",
            Self::Interchange => "UNG, UNH or UNZ",
            Self::Group => "UNH or UNE",
        }
    }
}

/// Open functional group
struct GroupFrame {
    reference: Option<String>,
    messages: usize,
}

/// Everything one parse run needs besides the input
pub(crate) struct InterchangeContext<'a, 'r> {
    state: ParseState<'a>,
    registry: &'r MappingsRegistry,
    syntax_version: Option<SyntaxVersion>,
    factory: Option<&'static ControlBlockHandlerFactory>,
    root_open: bool,
    interchange: Option<InterchangeSummary>,
    group: Option<GroupFrame>,
    outcome: ParseOutcome,
}

impl<'a, 'r> InterchangeContext<'a, 'r> {
    /// `syntax_version` forces a version; `None` reads it from each UNB.
    pub(crate) fn new(
        state: ParseState<'a>,
        registry: &'r MappingsRegistry,
        syntax_version: Option<SyntaxVersion>,
    ) -> Self {
        Self {
            state,
            registry,
            syntax_version,
            factory: None,
            root_open: false,
            interchange: None,
            group: None,
            outcome: ParseOutcome::default(),
        }
    }

    /// Parse the whole stream.
    pub(crate) fn run(mut self) -> Result<ParseOutcome> {
        self.state.emitter.start_document()?;
        self.parse_level(Level::Document)?;
        self.ensure_root()?;
        self.state.emitter.end_element()?;
        self.state.emitter.end_document()?;

        let mut outcome = self.outcome;
        outcome.segment_count = self.state.reader.segment_number();
        outcome.validation_errors = self.state.validator.into_errors();
        info!(
            "Parsed {} interchange(s), {} message(s), {} segment(s)",
            outcome.interchanges.len(),
            outcome.message_count(),
            outcome.segment_count
        );
        Ok(outcome)
    }

    /// The active factory, or the default one before any UNB was seen.
    fn factory(&self) -> Result<&'static ControlBlockHandlerFactory> {
        if let Some(factory) = self.factory {
            return Ok(factory);
        }
        let version = self.syntax_version.unwrap_or_default();
        ControlBlockHandlerFactory::for_version(version).map_err(|source| Error::Configuration {
            source,
            position: self.state.position(),
        })
    }

    fn ensure_root(&mut self) -> Result<()> {
        if !self.root_open {
            let root = self.factory()?.root_element();
            self.state.emitter.start_element(&root)?;
            self.root_open = true;
        }
        Ok(())
    }

    fn parse_level(&mut self, level: Level) -> Result<()> {
        loop {
            let Some(code) = self.state.reader.peek_code()? else {
                return match level.closing() {
                    Some(closing) => Err(Error::structural(
                        StructuralError::UnexpectedEndOfStream {
                            expected: closing.to_string(),
                        },
                        self.state.position(),
                    )),
                    None => Ok(()),
                };
            };

            if level.closing().is_some_and(|c| c.segment_code() == code) {
                return Ok(());
            }
            self.dispatch(level, &code)?;
        }
    }

    fn dispatch(&mut self, level: Level, code: &str) -> Result<()> {
        let factory = self.factory()?;
        match factory.handler(code) {
            Some(control) if level.accepts(control) => self.handle(control),
            None if factory.is_reserved(code) => {
                self.state.reader.move_to_next_segment()?;
                debug!(
                    "Skipping control segment {} at segment {}: no handler",
                    code,
                    self.state.reader.segment_number()
                );
                Ok(())
            }
            _ => {
                self.state.reader.move_to_next_segment()?;
                Err(Error::structural(
                    StructuralError::UnexpectedSegment {
                        expected: level.expected().to_string(),
                        found: code.to_string(),
                    },
                    self.state.position(),
                ))
            }
        }
    }

    fn handle(&mut self, control: ControlCode) -> Result<()> {
        match control {
            ControlCode::ServiceStringAdvice => self.handle_una(),
            ControlCode::InterchangeHeader => self.handle_interchange(),
            ControlCode::GroupHeader => self.handle_group(),
            ControlCode::MessageHeader => self.handle_message(),
            ControlCode::InterchangeTrailer
            | ControlCode::GroupTrailer
            | ControlCode::MessageTrailer => Err(Error::structural(
                StructuralError::UnexpectedSegment {
                    expected: "a header segment".to_string(),
                    found: control.to_string(),
                },
                self.state.position(),
            )),
        }
    }

    fn handle_una(&mut self) -> Result<()> {
        let raw = self.state.reader.read_raw(UNA_LENGTH)?;
        let delimiters = parse_una(&raw).map_err(|source| Error::Delimiters {
            source,
            position: SegmentPosition::new(0, vec![raw.clone()]),
        })?;
        debug!("Service string advice {:?}", raw);
        self.state.reader.set_delimiters(delimiters);
        Ok(())
    }

    fn handle_interchange(&mut self) -> Result<()> {
        let peeked = self.state.reader.peek_fields(2)?;
        let delimiters = *self.state.reader.delimiters();
        let syntax = peeked
            .get(1)
            .map(|raw| SyntaxIdentifier::from_field(raw, &delimiters))
            .unwrap_or_default();
        let header_position = SegmentPosition::new(self.state.reader.segment_number() + 1, peeked);

        let version = self
            .syntax_version
            .or_else(|| syntax.syntax_version())
            .unwrap_or_default();
        let factory = ControlBlockHandlerFactory::for_version(version).map_err(|source| {
            Error::Configuration {
                source,
                position: header_position.clone(),
            }
        })?;
        // The root element takes the namespace of the first interchange.
        self.factory = Some(factory);
        self.ensure_root()?;

        let code = syntax.charset_code(version);
        let encoding = charset_for(code).ok_or_else(|| {
            Error::encoding(
                format!("unknown character encoding code '{code}'"),
                header_position,
            )
        })?;
        self.state.reader.change_encoding(encoding)?;
        self.state.reader.move_to_next_segment()?;
        debug!(
            "Interchange with syntax {} {}, encoding {}",
            syntax.identifier,
            version,
            encoding.name()
        );

        let summary = InterchangeSummary::from_header(
            self.state.reader.fields(),
            &delimiters,
            version,
            encoding.name(),
        );
        self.state
            .emitter
            .start_element(&factory.element(INTERCHANGE))?;
        self.map_control(factory, ControlCode::InterchangeHeader)?;

        self.interchange = Some(summary);
        self.parse_level(Level::Interchange)?;
        let Some(summary) = self.interchange.take() else {
            return Ok(());
        };

        self.state.reader.move_to_next_segment()?;
        self.map_control(factory, ControlCode::InterchangeTrailer)?;
        let expected = if summary.groups > 0 {
            summary.groups
        } else {
            summary.messages.len()
        };
        self.check_count(factory, ControlCode::InterchangeTrailer, expected)?;
        self.check_reference(
            factory,
            ControlCode::InterchangeTrailer,
            Some(&summary.control_ref),
        )?;
        self.state.emitter.end_element()?;

        self.outcome.interchanges.push(summary);
        Ok(())
    }

    fn handle_group(&mut self) -> Result<()> {
        let factory = self.factory()?;
        self.state.reader.move_to_next_segment()?;
        let reference = element_value(self.state.reader.fields(), 5, self.state.reader.delimiters());

        self.state.emitter.start_element(&factory.element(GROUP))?;
        self.map_control(factory, ControlCode::GroupHeader)?;

        self.group = Some(GroupFrame {
            reference,
            messages: 0,
        });
        self.parse_level(Level::Group)?;
        let Some(group) = self.group.take() else {
            return Ok(());
        };

        self.state.reader.move_to_next_segment()?;
        self.map_control(factory, ControlCode::GroupTrailer)?;
        self.check_count(factory, ControlCode::GroupTrailer, group.messages)?;
        self.check_reference(factory, ControlCode::GroupTrailer, group.reference.as_deref())?;
        self.state.emitter.end_element()?;

        if let Some(interchange) = self.interchange.as_mut() {
            interchange.groups += 1;
        }
        Ok(())
    }

    fn handle_message(&mut self) -> Result<()> {
        self.state.reader.move_to_next_segment()?;
        let header_number = self.state.reader.segment_number();
        let identifier = self
            .state
            .reader
            .fields()
            .get(2)
            .cloned()
            .unwrap_or_default();
        let model = self
            .registry
            .resolve(&identifier, self.state.reader.delimiters())
            .map_err(|source| Error::Configuration {
                source,
                position: self.state.position(),
            })?;
        let reference =
            element_value(self.state.reader.fields(), 1, self.state.reader.delimiters());
        debug!(
            "Message {} mapped with model {}",
            reference.as_deref().unwrap_or_default(),
            model.lookup_name()
        );

        let factory = self.factory()?;
        self.ensure_root()?;
        self.state.emitter.start_element(&factory.element(MESSAGE))?;
        self.map_control(factory, ControlCode::MessageHeader)?;

        MessageParser::new(&model, Some(ControlCode::MessageTrailer.segment_code()))
            .within(factory)
            .parse(&mut self.state)?;

        if !self.state.reader.move_to_next_segment()? {
            return Err(Error::structural(
                StructuralError::UnexpectedEndOfStream {
                    expected: ControlCode::MessageTrailer.to_string(),
                },
                self.state.position(),
            ));
        }
        let trailer = factory.handler(self.state.reader.segment_code());
        if trailer != Some(ControlCode::MessageTrailer) {
            return Err(Error::structural(
                StructuralError::UnexpectedSegment {
                    expected: ControlCode::MessageTrailer.to_string(),
                    found: self.state.reader.segment_code().to_string(),
                },
                self.state.position(),
            ));
        }
        self.map_control(factory, ControlCode::MessageTrailer)?;
        let segment_count = self.state.reader.segment_number() - header_number + 1;
        self.check_count(factory, ControlCode::MessageTrailer, segment_count)?;
        self.check_reference(factory, ControlCode::MessageTrailer, reference.as_deref())?;
        self.state.emitter.end_element()?;

        let summary = MessageSummary {
            reference: reference.unwrap_or_default(),
            lookup_name: model.lookup_name(),
            group_ref: self.group.as_ref().and_then(|g| g.reference.clone()),
            segment_count,
        };
        if let Some(group) = self.group.as_mut() {
            group.messages += 1;
        }
        match self.interchange.as_mut() {
            Some(interchange) => interchange.messages.push(summary),
            None => self.outcome.messages.push(summary),
        }
        Ok(())
    }

    /// Map the current segment with the grammar of `control`.
    fn map_control(
        &mut self,
        factory: &'static ControlBlockHandlerFactory,
        control: ControlCode,
    ) -> Result<()> {
        let segment = factory.segment(control).ok_or_else(|| Error::Configuration {
            source: edi_schema::Error::InvalidModel {
                model: format!("control segments {}", factory.version()),
                reason: format!("no grammar for {control}"),
            },
            position: self.state.position(),
        })?;
        map_segment(&mut self.state, segment)
    }

    /// Compare the trailer's control count (data element 1) with `expected`.
    fn check_count(
        &mut self,
        factory: &'static ControlBlockHandlerFactory,
        trailer: ControlCode,
        expected: usize,
    ) -> Result<()> {
        let delimiters = *self.state.reader.delimiters();
        let fields = self.state.reader.fields();
        if control_count(fields, &delimiters) == Some(expected) {
            return Ok(());
        }
        let found = element_value(fields, 1, &delimiters).unwrap_or_default();
        self.report_mismatch(factory, trailer, 0, expected.to_string(), found)
    }

    /// Compare the trailer's reference (data element 2) with the header's.
    fn check_reference(
        &mut self,
        factory: &'static ControlBlockHandlerFactory,
        trailer: ControlCode,
        expected: Option<&str>,
    ) -> Result<()> {
        let found = element_value(self.state.reader.fields(), 2, self.state.reader.delimiters());
        if found.as_deref() == expected {
            return Ok(());
        }
        self.report_mismatch(
            factory,
            trailer,
            1,
            expected.unwrap_or_default().to_string(),
            found.unwrap_or_default(),
        )
    }

    fn report_mismatch(
        &mut self,
        factory: &'static ControlBlockHandlerFactory,
        trailer: ControlCode,
        field: usize,
        expected: String,
        found: String,
    ) -> Result<()> {
        let node = factory
            .segment(trailer)
            .map(|segment| match segment.fields.get(field) {
                Some(def) => def.node(&segment.segcode),
                None => segment.node(),
            });
        match node {
            Some(node) => self
                .state
                .report(ValidationErrorKind::ControlMismatch { expected, found }, node),
            None => Ok(()),
        }
    }
}
