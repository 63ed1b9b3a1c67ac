//! Namespace declaration stack.
//!
//! Each element entered during a parse pushes one frame. The frame records
//! the prefix mappings that element introduced, either through `xmlns`
//! attributes or because its own namespace was not yet visible. Popping the
//! frame closes exactly those mappings, newest first.

use tracing::trace;

use crate::event::{Attribute, EventSink, QName};
use crate::{Error, Result};

/// Prefix mappings introduced at one element depth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceFrame {
    introduced: Vec<(String, String)>,
}

impl NamespaceFrame {
    /// `(prefix, uri)` pairs in the order their start events were emitted.
    pub fn introduced(&self) -> &[(String, String)] {
        &self.introduced
    }

    fn binds(&self, prefix: &str) -> Option<&str> {
        self.introduced
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }
}

/// Owned, per-parse stack of namespace frames.
#[derive(Debug, Default)]
pub struct NamespaceStack {
    frames: Vec<NamespaceFrame>,
    minted: usize,
}

impl NamespaceStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Enter an element.
    ///
    /// Declarations carried by `attributes` are introduced first, then the
    /// element's own namespace if it is not visible yet. Start-mapping events
    /// are sent to `sink` for every new prefix. Returns `name` with its
    /// resolved prefix filled in.
    pub fn push(
        &mut self,
        sink: &mut dyn EventSink,
        name: &QName,
        attributes: &[Attribute],
    ) -> Result<QName> {
        let mut frame = NamespaceFrame::default();

        for attribute in attributes {
            let Some(prefix) = attribute.declared_prefix() else {
                continue;
            };
            if self.resolve(prefix) != Some(attribute.value.as_str()) {
                frame
                    .introduced
                    .push((prefix.to_string(), attribute.value.clone()));
            }
        }

        let mut resolved = name.clone();
        resolved.prefix = match name.namespace.as_deref() {
            Some(uri) => Some(self.prefix_for(&mut frame, uri, name.prefix.as_deref())),
            None => None,
        };

        for (prefix, uri) in &frame.introduced {
            trace!("start prefix mapping {}={}", prefix, uri);
            sink.start_prefix_mapping(prefix, uri)?;
        }
        self.frames.push(frame);

        Ok(resolved)
    }

    /// Leave the most recently entered element.
    pub fn pop(&mut self, sink: &mut dyn EventSink) -> Result<NamespaceFrame> {
        let frame = self.frames.pop().ok_or(Error::NamespaceUnderflow)?;
        for (prefix, _) in frame.introduced.iter().rev() {
            trace!("end prefix mapping {}", prefix);
            sink.end_prefix_mapping(prefix)?;
        }
        Ok(frame)
    }

    /// URI currently bound to `prefix`.
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.frames.iter().rev().find_map(|frame| frame.binds(prefix))
    }

    /// A prefix currently bound to `uri`, if any.
    pub fn lookup_prefix(&self, uri: &str) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.introduced.iter().rev())
            .find(|(prefix, bound)| bound == uri && self.resolve(prefix) == Some(uri))
            .map(|(prefix, _)| prefix.as_str())
    }

    fn prefix_for(&mut self, frame: &mut NamespaceFrame, uri: &str, hint: Option<&str>) -> String {
        if let Some((prefix, _)) = frame.introduced.iter().rev().find(|(_, u)| u == uri) {
            return prefix.clone();
        }
        if let Some(prefix) = self.lookup_prefix(uri) {
            return prefix.to_string();
        }

        let taken = |stack: &Self, frame: &NamespaceFrame, prefix: &str| {
            frame.binds(prefix).is_some() || stack.resolve(prefix).is_some()
        };

        let prefix = match hint {
            Some(hint) if !taken(self, frame, hint) => hint.to_string(),
            _ => loop {
                self.minted += 1;
                let candidate = format!("ns{}", self.minted);
                if !taken(self, frame, &candidate) {
                    break candidate;
                }
            },
        };
        frame.introduced.push((prefix.clone(), uri.to_string()));
        prefix
    }
}
