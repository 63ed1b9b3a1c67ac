//! Output sinks for the `parse` and `check` commands

use clap::ValueEnum;
use edi_ir::{Attribute, EventSink, QName};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::fmt::Display;
use std::io::Write;

/// Document format written by `parse`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Namespace-qualified XML, streamed while parsing
    #[default]
    Xml,
    /// The element tree as JSON, with the parse outcome
    Json,
    /// The raw event stream as a JSON array
    Events,
}

fn xml_error(error: impl Display) -> edi_ir::Error {
    edi_ir::Error::sink(format!("XML write failed: {error}"))
}

/// Streams events as XML text.
///
/// Prefix mappings are written as `xmlns` attributes on the element that
/// follows them. Elements without content are written self-closed.
pub struct XmlWriter<W: Write> {
    writer: Writer<W>,
    pending: Option<BytesStart<'static>>,
    declarations: Vec<(String, String)>,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(inner: W, pretty: bool) -> Self {
        let writer = if pretty {
            Writer::new_with_indent(inner, b' ', 2)
        } else {
            Writer::new(inner)
        };
        Self {
            writer,
            pending: None,
            declarations: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn flush_pending(&mut self) -> edi_ir::Result<()> {
        if let Some(start) = self.pending.take() {
            self.writer
                .write_event(Event::Start(start))
                .map_err(xml_error)?;
        }
        Ok(())
    }
}

impl<W: Write> EventSink for XmlWriter<W> {
    fn start_document(&mut self) -> edi_ir::Result<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_error)
    }

    fn end_document(&mut self) -> edi_ir::Result<()> {
        self.flush_pending()?;
        let out = self.writer.get_mut();
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> edi_ir::Result<()> {
        self.declarations.push((prefix.to_string(), uri.to_string()));
        Ok(())
    }

    fn end_prefix_mapping(&mut self, _prefix: &str) -> edi_ir::Result<()> {
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> edi_ir::Result<()> {
        self.flush_pending()?;

        let mut start = BytesStart::new(name.qualified_name());
        for (prefix, uri) in self.declarations.drain(..) {
            let key = if prefix.is_empty() {
                "xmlns".to_string()
            } else {
                format!("xmlns:{prefix}")
            };
            start.push_attribute((key.as_str(), uri.as_str()));
        }
        // declarations arrive as prefix mappings
        for attribute in attributes.iter().filter(|a| a.declared_prefix().is_none()) {
            let key = attribute.name.qualified_name();
            start.push_attribute((key.as_str(), attribute.value.as_str()));
        }
        self.pending = Some(start);
        Ok(())
    }

    fn end_element(&mut self, name: &QName) -> edi_ir::Result<()> {
        let event = match self.pending.take() {
            Some(start) => Event::Empty(start),
            None => Event::End(BytesEnd::new(name.qualified_name())),
        };
        self.writer.write_event(event).map_err(xml_error)
    }

    fn characters(&mut self, text: &str) -> edi_ir::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.flush_pending()?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_error)
    }
}

/// Drops every event; `check` only wants the outcome.
#[derive(Debug, Default)]
pub struct Discard;

impl EventSink for Discard {
    fn start_document(&mut self) -> edi_ir::Result<()> {
        Ok(())
    }

    fn end_document(&mut self) -> edi_ir::Result<()> {
        Ok(())
    }

    fn start_prefix_mapping(&mut self, _prefix: &str, _uri: &str) -> edi_ir::Result<()> {
        Ok(())
    }

    fn end_prefix_mapping(&mut self, _prefix: &str) -> edi_ir::Result<()> {
        Ok(())
    }

    fn start_element(&mut self, _name: &QName, _attributes: &[Attribute]) -> edi_ir::Result<()> {
        Ok(())
    }

    fn end_element(&mut self, _name: &QName) -> edi_ir::Result<()> {
        Ok(())
    }

    fn characters(&mut self, _text: &str) -> edi_ir::Result<()> {
        Ok(())
    }
}
