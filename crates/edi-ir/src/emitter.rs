//! Element emitter.
//!
//! Wraps an [`EventSink`] and routes every start/end element through a
//! [`NamespaceStack`], so producers only deal with qualified names.

use crate::event::{Attribute, EventSink, QName};
use crate::namespace::NamespaceStack;
use crate::{Error, Result};

pub struct Emitter<'s> {
    sink: &'s mut dyn EventSink,
    namespaces: NamespaceStack,
    open: Vec<QName>,
}

impl<'s> Emitter<'s> {
    pub fn new(sink: &'s mut dyn EventSink) -> Self {
        Self {
            sink,
            namespaces: NamespaceStack::new(),
            open: Vec::new(),
        }
    }

    pub fn start_document(&mut self) -> Result<()> {
        self.sink.start_document()
    }

    /// Ends the document. Every element must have been closed.
    pub fn end_document(&mut self) -> Result<()> {
        if let Some(name) = self.open.last() {
            return Err(Error::UnclosedElement {
                name: name.qualified_name(),
            });
        }
        self.sink.end_document()
    }

    pub fn start_element(&mut self, name: &QName) -> Result<()> {
        self.start_element_with_attributes(name, &[])
    }

    pub fn start_element_with_attributes(
        &mut self,
        name: &QName,
        attributes: &[Attribute],
    ) -> Result<()> {
        let resolved = self.namespaces.push(&mut *self.sink, name, attributes)?;
        self.sink.start_element(&resolved, attributes)?;
        self.open.push(resolved);
        Ok(())
    }

    pub fn end_element(&mut self) -> Result<()> {
        let name = self.open.pop().ok_or(Error::NamespaceUnderflow)?;
        self.sink.end_element(&name)?;
        self.namespaces.pop(&mut *self.sink)?;
        Ok(())
    }

    pub fn characters(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.sink.characters(text)
    }

    /// `<name>text</name>` in one call.
    pub fn text_element(&mut self, name: &QName, text: &str) -> Result<()> {
        self.start_element(name)?;
        self.characters(text)?;
        self.end_element()
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn namespaces(&self) -> &NamespaceStack {
        &self.namespaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventRecorder};

    #[test]
    fn test_prefix_mappings_wrap_elements() {
        let mut recorder = EventRecorder::new();
        {
            let mut emitter = Emitter::new(&mut recorder);
            emitter.start_document().unwrap();
            emitter
                .start_element(&QName::qualified("root", "urn:r", Some("r")))
                .unwrap();
            emitter.text_element(&QName::local("leaf"), "v").unwrap();
            assert_eq!(emitter.depth(), 1);
            emitter.end_element().unwrap();
            emitter.end_document().unwrap();
        }

        let events = recorder.into_events();
        assert_eq!(events[0], Event::StartDocument);
        assert_eq!(
            events[1],
            Event::StartPrefixMapping {
                prefix: "r".to_string(),
                uri: "urn:r".to_string()
            }
        );
        assert!(matches!(&events[2], Event::StartElement { name, .. } if name.qualified_name() == "r:root"));
        assert_eq!(
            events[events.len() - 2],
            Event::EndPrefixMapping {
                prefix: "r".to_string()
            }
        );
        assert_eq!(events[events.len() - 1], Event::EndDocument);
    }

    #[test]
    fn test_empty_text_emits_no_characters() {
        let mut recorder = EventRecorder::new();
        {
            let mut emitter = Emitter::new(&mut recorder);
            emitter.text_element(&QName::local("empty"), "").unwrap();
        }
        assert_eq!(recorder.events().len(), 2);
    }

    #[test]
    fn test_unbalanced_end_is_an_error() {
        let mut recorder = EventRecorder::new();
        let mut emitter = Emitter::new(&mut recorder);
        assert!(emitter.end_element().is_err());

        emitter.start_element(&QName::local("open")).unwrap();
        assert!(matches!(
            emitter.end_document(),
            Err(Error::UnclosedElement { .. })
        ));
    }
}
