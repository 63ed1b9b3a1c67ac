//! EDIFACT envelope data (UNB/UNZ, UNG/UNE, UNH/UNT)
//!
//! Summaries of the control blocks a parse went through, and helpers that
//! read control values out of raw segment fields.

use edi_schema::Delimiters;
use edi_validation::ValidationError;
use serde::Serialize;

use crate::syntax::{SyntaxVersion, declared_charset_code};

/// Syntax identifier of an interchange header (UNB data element S001)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SyntaxIdentifier {
    /// Character repertoire (e.g., "UNOA", "UNOC", "UNOY")
    pub identifier: String,
    /// Syntax version number (e.g., "3", "4")
    pub version: String,
    /// Service code list directory version (version 4 only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_code_list: Option<String>,
    /// Coded character encoding overriding the repertoire (version 4 only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl SyntaxIdentifier {
    /// Read the identifier from the raw, still escaped UNB field.
    pub fn from_field(raw: &str, delimiters: &Delimiters) -> Self {
        let components = components(raw, delimiters);
        let optional = |index: usize| components.get(index).filter(|c| !c.is_empty()).cloned();
        Self {
            identifier: components.first().cloned().unwrap_or_default(),
            version: components.get(1).cloned().unwrap_or_default(),
            service_code_list: optional(2),
            encoding: optional(3),
        }
    }

    /// The syntax version this identifier declares, if it is a known one
    pub fn syntax_version(&self) -> Option<SyntaxVersion> {
        SyntaxVersion::from_version_number(&self.version)
    }

    /// Code that selects the character encoding under `version`
    pub fn charset_code(&self, version: SyntaxVersion) -> &str {
        let components = [
            self.identifier.as_str(),
            self.version.as_str(),
            self.service_code_list.as_deref().unwrap_or_default(),
            self.encoding.as_deref().unwrap_or_default(),
        ];
        declared_charset_code(&components, version)
    }
}

/// One interchange (UNB ... UNZ) that was parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterchangeSummary {
    /// Interchange control reference (UNB data element 0020)
    pub control_ref: String,
    pub syntax_identifier: SyntaxIdentifier,
    pub syntax_version: SyntaxVersion,
    /// Name of the encoding the interchange was decoded with
    pub encoding: String,
    pub sender: String,
    pub recipient: String,
    /// Number of functional groups (UNG ... UNE)
    pub groups: usize,
    pub messages: Vec<MessageSummary>,
}

impl InterchangeSummary {
    /// Summary of an interchange from its header fields, code included.
    pub fn from_header(
        fields: &[String],
        delimiters: &Delimiters,
        syntax_version: SyntaxVersion,
        encoding: &str,
    ) -> Self {
        Self {
            control_ref: element_value(fields, 5, delimiters).unwrap_or_default(),
            syntax_identifier: fields
                .get(1)
                .map(|raw| SyntaxIdentifier::from_field(raw, delimiters))
                .unwrap_or_default(),
            syntax_version,
            encoding: encoding.to_string(),
            sender: element_value(fields, 2, delimiters).unwrap_or_default(),
            recipient: element_value(fields, 3, delimiters).unwrap_or_default(),
            groups: 0,
            messages: Vec::new(),
        }
    }
}

/// One message (UNH ... UNT, or a standalone message stream) that was parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    /// Message reference number (UNH data element 0062), empty for
    /// standalone message streams
    pub reference: String,
    /// Lookup name of the mapping model the body was mapped with
    pub lookup_name: String,
    /// Group reference (UNG data element 0048) when inside a functional group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_ref: Option<String>,
    /// Segments from header to trailer, both included
    pub segment_count: usize,
}

/// What a parse produced besides the event stream
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseOutcome {
    pub interchanges: Vec<InterchangeSummary>,
    /// Messages mapped outside any interchange
    pub messages: Vec<MessageSummary>,
    /// Violations gathered under the collecting validation policy
    pub validation_errors: Vec<ValidationError>,
    /// Number of segments read, UNA excluded
    pub segment_count: usize,
}

impl ParseOutcome {
    /// Every mapped message, in input order
    pub fn all_messages(&self) -> impl Iterator<Item = &MessageSummary> {
        self.interchanges
            .iter()
            .flat_map(|interchange| interchange.messages.iter())
            .chain(self.messages.iter())
    }

    pub fn message_count(&self) -> usize {
        self.all_messages().count()
    }

    /// True when no violation was collected
    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }
}

fn components(raw: &str, delimiters: &Delimiters) -> Vec<String> {
    delimiters
        .split_components(raw)
        .into_iter()
        .map(|component| delimiters.unescape(component).into_owned())
        .collect()
}

/// First component of data element `index` (the segment code is index 0),
/// unescaped. Empty values count as absent.
pub fn element_value(fields: &[String], index: usize, delimiters: &Delimiters) -> Option<String> {
    let raw = fields.get(index)?;
    let first = delimiters.split_components(raw).into_iter().next()?;
    let value = delimiters.unescape(first);
    (!value.is_empty()).then(|| value.into_owned())
}

/// A control count (UNZ, UNE or UNT data element 1), when it is a number
pub fn control_count(fields: &[String], delimiters: &Delimiters) -> Option<usize> {
    element_value(fields, 1, delimiters)?.trim().parse().ok()
}
