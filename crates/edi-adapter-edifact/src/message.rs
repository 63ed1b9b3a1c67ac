//! Message body mapping.
//!
//! Walks a mapping model and the segment stream in lock-step. Every segment
//! is located in the model by its code at the current grammar position,
//! split into fields, components and sub-components, checked, and emitted
//! as nested elements.

use edi_ir::{Emitter, QName, SegmentPosition};
use edi_schema::{
    ComponentDef, Delimiters, FieldDef, GroupItem, MappingModel, MappingNode, Namespace,
    SegmentDef, SegmentGroup, ValueNode, ValueSpec,
};
use edi_validation::{
    ValidationError, ValidationErrorKind, Validator, check_max_occurs, check_min_occurs,
    check_value,
};
use tracing::{debug, trace};

use crate::control::ControlBlockHandlerFactory;
use crate::reader::SegmentReader;
use crate::{Error, Result, StructuralError};

/// Switches that change how segments are turned into elements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingOptions {
    /// Emit nothing for empty or truncated fields and components
    pub ignore_empty_nodes: bool,
    /// Skip body segments the message model never mentions
    pub ignore_unmapped_segments: bool,
}

/// Reader, emitter and validator of one parse run
pub struct ParseState<'a> {
    pub reader: SegmentReader<'a>,
    pub emitter: Emitter<'a>,
    pub validator: Validator,
    pub options: MappingOptions,
}

impl ParseState<'_> {
    pub fn position(&self) -> SegmentPosition {
        self.reader.position()
    }

    /// Hand a violation at the current segment to the validator.
    ///
    /// # Errors
    ///
    /// Returns the violation when the policy aborts the parse.
    pub fn report(&mut self, kind: ValidationErrorKind, node: MappingNode) -> Result<()> {
        let error = ValidationError::new(kind, node, self.position());
        self.validator.report(error).map_err(Error::from)
    }
}

/// Element name of a model node
pub fn element_name(xmltag: &str, namespace: Option<&Namespace>) -> QName {
    match namespace {
        Some(ns) => QName::qualified(xmltag, ns.uri.clone(), Some(&ns.prefix)),
        None => QName::local(xmltag),
    }
}

/// Map the current segment of the reader against `segment`.
///
/// # Errors
///
/// Fails on sink errors and on validation errors under the abort policy.
pub fn map_segment(state: &mut ParseState<'_>, segment: &SegmentDef) -> Result<()> {
    let fields = state.reader.fields().to_vec();
    let delimiters = *state.reader.delimiters();
    let values = fields.get(1..).unwrap_or_default();
    trace!("Mapping segment {} as '{}'", segment.segcode, segment.xmltag);

    state
        .emitter
        .start_element(&element_name(&segment.xmltag, segment.namespace.as_ref()))?;

    for (index, def) in segment.fields.iter().enumerate() {
        match values.get(index).map(String::as_str) {
            Some(raw) if !raw.is_empty() => {
                map_field(state, segment, def, raw, &delimiters)?;
            }
            present => {
                if def.required {
                    state.report(
                        ValidationErrorKind::MissingMandatory,
                        def.node(&segment.segcode),
                    )?;
                }
                let emit = present.is_some() || !segment.truncatable;
                if emit && !state.options.ignore_empty_nodes {
                    empty_element(state, def.xmltag(), def.namespace())?;
                }
            }
        }
    }

    let defined = segment.fields.len();
    if values.len() > defined
        && !segment.ignore_unmapped_fields
        && values[defined..].iter().any(|v| !v.is_empty())
    {
        state.report(
            ValidationErrorKind::TooManyFields {
                expected: defined,
                found: values.len(),
            },
            segment.node(),
        )?;
    }

    state.emitter.end_element()?;
    Ok(())
}

fn map_field(
    state: &mut ParseState<'_>,
    segment: &SegmentDef,
    field: &FieldDef,
    raw: &str,
    delimiters: &Delimiters,
) -> Result<()> {
    let components = delimiters.split_components(raw);

    if !field.is_composite() {
        if components.len() > 1 && components[1..].iter().any(|c| !c.is_empty()) {
            state.report(
                ValidationErrorKind::TooManyComponents {
                    expected: 1,
                    found: components.len(),
                },
                field.node(&segment.segcode),
            )?;
        }
        return leaf(state, &segment.segcode, field, &field.value, raw, delimiters);
    }

    state
        .emitter
        .start_element(&element_name(&field.xmltag, field.namespace.as_ref()))?;

    for (index, def) in field.components.iter().enumerate() {
        match components.get(index).copied() {
            Some(raw) if !raw.is_empty() => {
                map_component(state, &segment.segcode, def, raw, delimiters)?;
            }
            present => {
                if def.required {
                    state.report(ValidationErrorKind::MissingMandatory, def.node(&segment.segcode))?;
                }
                let emit = present.is_some() || !field.truncatable;
                if emit && !state.options.ignore_empty_nodes {
                    empty_element(state, &def.xmltag, def.namespace.as_ref())?;
                }
            }
        }
    }

    let defined = field.components.len();
    if components.len() > defined && components[defined..].iter().any(|c| !c.is_empty()) {
        state.report(
            ValidationErrorKind::TooManyComponents {
                expected: defined,
                found: components.len(),
            },
            field.node(&segment.segcode),
        )?;
    }

    state.emitter.end_element()?;
    Ok(())
}

fn map_component(
    state: &mut ParseState<'_>,
    segcode: &str,
    component: &ComponentDef,
    raw: &str,
    delimiters: &Delimiters,
) -> Result<()> {
    if component.sub_components.is_empty() || delimiters.sub_component.is_none() {
        return leaf(state, segcode, component, &component.value, raw, delimiters);
    }

    state
        .emitter
        .start_element(&element_name(&component.xmltag, component.namespace.as_ref()))?;

    let subs = delimiters.split_sub_components(raw);
    for (index, def) in component.sub_components.iter().enumerate() {
        match subs.get(index).copied() {
            Some(raw) if !raw.is_empty() => {
                leaf(state, segcode, def, &def.value, raw, delimiters)?;
            }
            present => {
                if def.required {
                    state.report(ValidationErrorKind::MissingMandatory, def.node(segcode))?;
                }
                let emit = present.is_some() || !component.truncatable;
                if emit && !state.options.ignore_empty_nodes {
                    empty_element(state, &def.xmltag, def.namespace.as_ref())?;
                }
            }
        }
    }

    state.emitter.end_element()?;
    Ok(())
}

fn leaf(
    state: &mut ParseState<'_>,
    segcode: &str,
    node: &dyn ValueNode,
    spec: &ValueSpec,
    raw: &str,
    delimiters: &Delimiters,
) -> Result<()> {
    let value = delimiters.unescape(raw);
    if state.validator.is_enabled() {
        if let Some(kind) = check_value(&value, spec, delimiters.decimal) {
            state.report(kind, node.node(segcode))?;
        }
    }
    state
        .emitter
        .text_element(&element_name(node.xmltag(), node.namespace()), &value)?;
    Ok(())
}

fn empty_element(
    state: &mut ParseState<'_>,
    xmltag: &str,
    namespace: Option<&Namespace>,
) -> Result<()> {
    state
        .emitter
        .start_element(&element_name(xmltag, namespace))?;
    state.emitter.end_element()?;
    Ok(())
}

/// Maps one message body against its model.
pub struct MessageParser<'m> {
    model: &'m MappingModel,
    stop_code: Option<&'m str>,
    control: Option<&'m ControlBlockHandlerFactory>,
    saturated: Option<(String, usize)>,
}

impl<'m> MessageParser<'m> {
    /// Parser that stops in front of `stop_code` (the message trailer), or
    /// at end of stream when there is none.
    pub fn new(model: &'m MappingModel, stop_code: Option<&'m str>) -> Self {
        Self {
            model,
            stop_code,
            control: None,
            saturated: None,
        }
    }

    /// Also end the body at any control segment of `factory` the model does
    /// not map itself.
    #[must_use]
    pub fn within(mut self, factory: &'m ControlBlockHandlerFactory) -> Self {
        self.control = Some(factory);
        self
    }

    /// Emit the model's root element and map every body segment.
    ///
    /// Segments that do not fit their grammar position are reported and,
    /// when the validator lets the parse go on, mapped where they stand.
    ///
    /// # Errors
    ///
    /// Fails on segments the model cannot place, on validation errors under
    /// the abort policy, and on read or sink errors.
    pub fn parse(&mut self, state: &mut ParseState<'_>) -> Result<()> {
        let model = self.model;
        let root = &model.root;
        state
            .emitter
            .start_element(&element_name(&root.xmltag, root.namespace.as_ref()))?;

        self.map_items(state, &root.items)?;

        while let Some(code) = self.next_code(state)? {
            state.reader.move_to_next_segment()?;
            let Some(segment) = model.find_segment(&code) else {
                return Err(Error::structural(
                    StructuralError::UnmappedSegment {
                        code,
                        model: model.lookup_name(),
                    },
                    state.position(),
                ));
            };

            let found = match self.saturated.take() {
                Some((saturated, count)) if saturated == code => count + 1,
                _ => 0,
            };
            let kind = check_max_occurs(segment.occurs, found)
                .unwrap_or(ValidationErrorKind::OutOfSequence { code: code.clone() });
            state.report(kind, segment.node())?;
            if found > 0 {
                self.saturated = Some((code, found));
            }

            debug!("Mapping segment {} outside its grammar position", segment.segcode);
            map_segment(state, segment)?;
        }

        state.emitter.end_element()?;
        Ok(())
    }

    /// Code of the next body segment, `None` at the stop code, at a control
    /// segment or at end of stream. Segments the model never mentions are
    /// skipped when configured.
    fn next_code(&self, state: &mut ParseState<'_>) -> Result<Option<String>> {
        loop {
            let Some(code) = state.reader.peek_code()? else {
                return Ok(None);
            };
            if self.stop_code == Some(code.as_str()) {
                return Ok(None);
            }
            let mentioned = self.model.mentions_segment(&code);
            if !mentioned && self.is_control(&code) {
                return Ok(None);
            }
            if state.options.ignore_unmapped_segments && !mentioned {
                state.reader.move_to_next_segment()?;
                debug!("Ignoring unmapped segment {}", code);
                continue;
            }
            return Ok(Some(code));
        }
    }

    fn is_control(&self, code: &str) -> bool {
        self.control
            .is_some_and(|factory| factory.handler(code).is_some() || factory.is_reserved(code))
    }

    fn map_items(&mut self, state: &mut ParseState<'_>, items: &[GroupItem]) -> Result<()> {
        let mut index = 0;
        let mut count = 0;

        while let Some(item) = items.get(index) {
            let Some(code) = self.next_code(state)? else {
                break;
            };

            if item.trigger_code() == Some(code.as_str()) {
                if item.occurs().max_reached(count) {
                    let later = items[index + 1..]
                        .iter()
                        .any(|next| next.trigger_code() == Some(code.as_str()));
                    if !later {
                        // Leave it to the enclosing group.
                        self.saturated = Some((code, count));
                        break;
                    }
                    index += 1;
                    count = 0;
                    continue;
                }
                self.map_item(state, item)?;
                count += 1;
            } else {
                self.check_min_occurs(state, item, count)?;
                index += 1;
                count = 0;
            }
        }

        if let Some(item) = items.get(index) {
            self.check_min_occurs(state, item, count)?;
            for item in &items[index + 1..] {
                self.check_min_occurs(state, item, 0)?;
            }
        }
        Ok(())
    }

    fn map_item(&mut self, state: &mut ParseState<'_>, item: &GroupItem) -> Result<()> {
        self.saturated = None;
        match item {
            GroupItem::Segment(segment) => {
                state.reader.move_to_next_segment()?;
                map_segment(state, segment)
            }
            GroupItem::Group(group) => self.map_group(state, group),
        }
    }

    fn map_group(&mut self, state: &mut ParseState<'_>, group: &SegmentGroup) -> Result<()> {
        trace!("Entering group '{}'", group.xmltag);
        state
            .emitter
            .start_element(&element_name(&group.xmltag, group.namespace.as_ref()))?;
        self.map_items(state, &group.items)?;
        state.emitter.end_element()?;
        Ok(())
    }

    fn check_min_occurs(
        &self,
        state: &mut ParseState<'_>,
        item: &GroupItem,
        count: usize,
    ) -> Result<()> {
        match check_min_occurs(item.occurs(), count) {
            Some(kind) => state.report(kind, item.node()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::SyntaxVersion;
    use edi_ir::{Event, EventRecorder};
    use edi_schema::loader::load_from_yaml;
    use edi_validation::ValidationConfig;

    const MODEL: &str = r#"
description: { name: TEST, version: "D:01B:UN", namespace: t }
namespaces: { t: "urn:test" }
root:
  xmltag: Message
  items:
    - segment:
        segcode: BGM
        xmltag: Header
        min_occurs: 1
        truncatable: true
        fields:
          - xmltag: name
            truncatable: true
            components:
              - { xmltag: code, required: true }
              - { xmltag: agency }
          - { xmltag: number, required: true }
          - { xmltag: function }
    - segment:
        segcode: DTM
        xmltag: Date
        min_occurs: 1
        fields:
          - { xmltag: value, required: true, data_type: Date }
          - { xmltag: qualifier }
    - group:
        xmltag: Line
        max_occurs: unbounded
        items:
          - segment:
              segcode: LIN
              xmltag: LineItem
              min_occurs: 1
              truncatable: true
              fields:
                - { xmltag: number, required: true, data_type: Numeric }
          - segment:
              segcode: QTY
              xmltag: Quantity
              max_occurs: 2
              truncatable: true
              fields:
                - { xmltag: amount, data_type: Decimal }
    - segment:
        segcode: CNT
        xmltag: Count
        truncatable: true
        fields:
          - { xmltag: total }
"#;

    fn model() -> MappingModel {
        load_from_yaml(MODEL).unwrap().remove(0)
    }

    fn run(
        input: &str,
        validation: ValidationConfig,
        options: MappingOptions,
    ) -> (Result<()>, Vec<Event>, Vec<ValidationError>) {
        let model = model();
        let mut recorder = EventRecorder::new();
        let (result, errors) = {
            let mut state = ParseState {
                reader: SegmentReader::from_text(input, Delimiters::unedifact()),
                emitter: Emitter::new(&mut recorder),
                validator: Validator::new(validation),
                options,
            };
            let result = MessageParser::new(&model, None).parse(&mut state);
            (result, state.validator.into_errors())
        };
        (result, recorder.into_events(), errors)
    }

    fn texts(events: &[Event]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Characters { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn starts(events: &[Event]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::StartElement { name, .. } => Some(name.local_name.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_maps_segments_fields_and_groups() {
        let input = "BGM+220:9+PO?+1'DTM+20240131'LIN+1'QTY+5.5'LIN+2'CNT+2'";
        let (result, events, _) = run(input, ValidationConfig::default(), MappingOptions::default());
        result.unwrap();

        assert_eq!(
            starts(&events),
            [
                "Message", "Header", "name", "code", "agency", "number", "Date", "value",
                "qualifier", "Line", "LineItem", "number", "Quantity", "amount", "Line", "LineItem", "number", "Count",
                "total"
            ]
        );
        assert_eq!(texts(&events), ["220", "9", "PO+1", "20240131", "1", "5.5", "2", "2"]);
    }

    #[test]
    fn test_non_truncatable_segment_emits_empty_fields() {
        let input = "BGM+220+1'DTM+20240131'";
        let (result, events, _) = run(input, ValidationConfig::default(), MappingOptions::default());
        result.unwrap();
        // DTM is not truncatable, so the missing qualifier still appears.
        assert!(starts(&events).contains(&"qualifier"));
        // BGM is, so the missing function does not.
        assert!(!starts(&events).contains(&"function"));

        let options = MappingOptions {
            ignore_empty_nodes: true,
            ..MappingOptions::default()
        };
        let (_, events, _) = run(input, ValidationConfig::default(), options);
        assert!(!starts(&events).contains(&"qualifier"));
    }

    #[test]
    fn test_missing_mandatory_segment() {
        let (result, _, _) = run("BGM+220+1'LIN+1'", ValidationConfig::default(), MappingOptions::default());
        let err = result.unwrap_err();
        let node = err.mapping_node().unwrap();
        assert_eq!(node.segcode.as_deref(), Some("DTM"));
        assert!(matches!(
            err,
            Error::Validation(ValidationError {
                kind: ValidationErrorKind::MinOccurs { min: 1, found: 0 },
                ..
            })
        ));
    }

    #[test]
    fn test_missing_mandatory_value() {
        let (result, _, _) = run("BGM+220'DTM+20240131'", ValidationConfig::default(), MappingOptions::default());
        let err = result.unwrap_err();
        assert_eq!(err.mapping_node().unwrap().xmltag, "number");
        assert_eq!(err.segment_number(), Some(1));
    }

    #[test]
    fn test_invalid_value_type() {
        let (result, _, _) = run("BGM+220+1'DTM+20241301'", ValidationConfig::default(), MappingOptions::default());
        let err = result.unwrap_err();
        assert_eq!(err.mapping_node().unwrap().xmltag, "value");
        assert_eq!(err.segment_number(), Some(2));
    }

    #[test]
    fn test_validation_disabled_passes_values_through() {
        let (result, events, errors) =
            run("BGM+220'DTM+notadate'LIN+x'", ValidationConfig::disabled(), MappingOptions::default());
        result.unwrap();
        assert!(errors.is_empty());
        assert!(texts(&events).contains(&"notadate"));
        assert!(texts(&events).contains(&"x"));
    }

    #[test]
    fn test_collect_policy_gathers_errors() {
        let (result, events, errors) =
            run("BGM+220'DTM+notadate'LIN+x'", ValidationConfig::collecting(), MappingOptions::default());
        result.unwrap();
        assert_eq!(errors.len(), 3);

        let closed = events
            .iter()
            .rev()
            .find(|e| !matches!(e, Event::EndPrefixMapping { .. }));
        assert!(matches!(closed, Some(Event::EndElement { name }) if name.local_name == "Message"));
        let ends = events
            .iter()
            .filter(|e| matches!(e, Event::EndElement { .. }))
            .count();
        assert_eq!(ends, starts(&events).len());
    }

    #[test]
    fn test_out_of_sequence_segment_kept_without_validation() {
        let input = "BGM+220+PO1'DTM+20240131'BGM+220+SECONDPO'";
        let (result, events, _) =
            run(input, ValidationConfig::disabled(), MappingOptions::default());
        result.unwrap();

        assert!(texts(&events).contains(&"SECONDPO"));
        assert_eq!(starts(&events).iter().filter(|n| **n == "Header").count(), 2);

        let (result, _, _) = run(input, ValidationConfig::default(), MappingOptions::default());
        assert!(matches!(
            result.unwrap_err(),
            Error::Validation(ValidationError {
                kind: ValidationErrorKind::OutOfSequence { ref code },
                ..
            }) if code == "BGM"
        ));
    }

    #[test]
    fn test_max_occurs_counts_every_extra_occurrence() {
        let input = "BGM+220+1'DTM+20240131'LIN+1'QTY+1'QTY+2'QTY+3'QTY+4'";
        let (result, events, errors) =
            run(input, ValidationConfig::collecting(), MappingOptions::default());
        result.unwrap();

        let kinds: Vec<_> = errors.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            [
                ValidationErrorKind::MaxOccurs { max: 2, found: 3 },
                ValidationErrorKind::MaxOccurs { max: 2, found: 4 },
            ]
        );
        assert!(texts(&events).ends_with(&["3", "4"]));
    }

    #[test]
    fn test_control_segment_ends_body() {
        let model = model();
        let factory = ControlBlockHandlerFactory::for_version(SyntaxVersion::V4).unwrap();
        let mut recorder = EventRecorder::new();
        let mut state = ParseState {
            reader: SegmentReader::from_text(
                "BGM+220+1'DTM+20240131'XYZ+1'UNH+2+TEST:D:01B:UN'",
                Delimiters::unedifact(),
            ),
            emitter: Emitter::new(&mut recorder),
            validator: Validator::new(ValidationConfig::default()),
            options: MappingOptions {
                ignore_unmapped_segments: true,
                ..MappingOptions::default()
            },
        };

        MessageParser::new(&model, Some("UNT"))
            .within(factory)
            .parse(&mut state)
            .unwrap();
        assert_eq!(state.reader.peek_code().unwrap().as_deref(), Some("UNH"));
        assert_eq!(state.reader.segment_number(), 3);
    }

    #[test]
    fn test_max_occurs_moves_to_parent_group() {
        // A third QTY in one line does not fit.
        let input = "BGM+220+1'DTM+20240131'LIN+1'QTY+1'QTY+2'QTY+3'";
        let (result, _, _) = run(input, ValidationConfig::default(), MappingOptions::default());
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError {
                kind: ValidationErrorKind::MaxOccurs { max: 2, found: 3 },
                ..
            })
        ));
        assert_eq!(err.segment_number(), Some(6));
    }

    #[test]
    fn test_unknown_segment_is_structural() {
        let (result, _, _) = run("BGM+220+1'DTM+20240131'XYZ+1'", ValidationConfig::default(), MappingOptions::default());
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            Error::Structural {
                kind: StructuralError::UnmappedSegment { ref code, .. },
                ..
            } if code == "XYZ"
        ));
    }

    #[test]
    fn test_ignore_unmapped_segments() {
        let options = MappingOptions {
            ignore_unmapped_segments: true,
            ..MappingOptions::default()
        };
        let input = "BGM+220+1'XYZ+1'DTM+20240131'ABC'CNT+1'";
        let (result, events, _) = run(input, ValidationConfig::default(), options);
        result.unwrap();
        assert!(starts(&events).contains(&"Count"));
    }

    #[test]
    fn test_too_many_fields() {
        let (result, _, _) = run("BGM+220+1+9+EXTRA'DTM+20240131'", ValidationConfig::default(), MappingOptions::default());
        assert!(matches!(
            result.unwrap_err(),
            Error::Validation(ValidationError {
                kind: ValidationErrorKind::TooManyFields { expected: 3, found: 4 },
                ..
            })
        ));

        // Trailing empty fields are harmless.
        let (result, _, _) = run("BGM+220+1+9++'DTM+20240131'", ValidationConfig::default(), MappingOptions::default());
        result.unwrap();
    }

    #[test]
    fn test_namespaces_are_declared_once() {
        let input = "BGM+220+1'DTM+20240131'";
        let (_, events, _) = run(input, ValidationConfig::default(), MappingOptions::default());
        let mappings: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, Event::StartPrefixMapping { .. }))
            .collect();
        assert_eq!(mappings.len(), 1);
        assert!(matches!(
            &events[0],
            Event::StartPrefixMapping { prefix, uri } if prefix == "t" && uri == "urn:test"
        ));
    }
}
