//! Event model shared by every producer and consumer in the engine.
//!
//! The parser is a pure producer: it pushes events into an [`EventSink`]
//! one at a time and never holds on to the output tree.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

/// Namespace URI reserved for `xmlns` declarations.
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// A namespace-qualified element or attribute name.
///
/// `prefix` is a hint on input and the resolved prefix once the name has
/// passed through a [`NamespaceStack`](crate::NamespaceStack).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QName {
    pub local_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl QName {
    /// Unqualified name.
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            namespace: None,
            prefix: None,
        }
    }

    /// Name in `namespace`, with an optional preferred prefix.
    pub fn qualified(
        local_name: impl Into<String>,
        namespace: impl Into<String>,
        prefix: Option<&str>,
    ) -> Self {
        Self {
            local_name: local_name.into(),
            namespace: Some(namespace.into()),
            prefix: prefix.map(str::to_string),
        }
    }

    /// `prefix:local` when a non-empty prefix is set, otherwise `local`.
    pub fn qualified_name(&self) -> String {
        match self.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", self.local_name),
            _ => self.local_name.clone(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(uri) => write!(f, "{{{uri}}}{}", self.local_name),
            None => f.write_str(&self.local_name),
        }
    }
}

/// An attribute attached to a start-element event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }

    /// `xmlns:prefix="uri"`, or `xmlns="uri"` for an empty prefix.
    pub fn namespace_declaration(prefix: &str, uri: impl Into<String>) -> Self {
        let local_name = if prefix.is_empty() { "xmlns" } else { prefix };
        Self {
            name: QName::qualified(local_name, XMLNS_NAMESPACE, Some("xmlns")),
            value: uri.into(),
        }
    }

    /// The declared prefix if this attribute is an `xmlns` declaration.
    pub fn declared_prefix(&self) -> Option<&str> {
        if self.name.namespace.as_deref() != Some(XMLNS_NAMESPACE) {
            return None;
        }
        if self.name.local_name == "xmlns" {
            Some("")
        } else {
            Some(&self.name.local_name)
        }
    }
}

/// Push-based consumer of parse events.
///
/// Any error returned by a sink aborts the parse and is handed back to the
/// caller.
pub trait EventSink {
    fn start_document(&mut self) -> Result<()>;

    fn end_document(&mut self) -> Result<()>;

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()>;

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()>;

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()>;

    fn end_element(&mut self, name: &QName) -> Result<()>;

    fn characters(&mut self, text: &str) -> Result<()>;
}

/// A single recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    StartDocument,
    EndDocument,
    StartPrefixMapping { prefix: String, uri: String },
    EndPrefixMapping { prefix: String },
    StartElement {
        name: QName,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attributes: Vec<Attribute>,
    },
    EndElement { name: QName },
    Characters { text: String },
}

/// Sink that keeps every event in order.
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    events: Vec<Event>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Local names of all started elements, in document order.
    pub fn element_names(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::StartElement { name, .. } => Some(name.local_name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for EventRecorder {
    fn start_document(&mut self) -> Result<()> {
        self.events.push(Event::StartDocument);
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.events.push(Event::EndDocument);
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.events.push(Event::StartPrefixMapping {
            prefix: prefix.to_string(),
            uri: uri.to_string(),
        });
        Ok(())
    }

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
        self.events.push(Event::EndPrefixMapping {
            prefix: prefix.to_string(),
        });
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        self.events.push(Event::StartElement {
            name: name.clone(),
            attributes: attributes.to_vec(),
        });
        Ok(())
    }

    fn end_element(&mut self, name: &QName) -> Result<()> {
        self.events.push(Event::EndElement { name: name.clone() });
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.events.push(Event::Characters {
            text: text.to_string(),
        });
        Ok(())
    }
}
