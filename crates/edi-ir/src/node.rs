//! In-memory element tree built from an event stream.
//!
//! The parser itself never buffers output; [`TreeBuilder`] is a sink for
//! callers who want the whole document, such as the CLI's JSON output and
//! tests that inspect structure.

use serde::{Deserialize, Serialize};

use crate::event::{Attribute, EventSink, QName};
use crate::{Error, Result};

/// A node in the element tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: QName,

    /// Prefix mappings that started immediately before this element
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<(String, String)>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,

    /// Concatenated character data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            namespaces: Vec::new(),
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.name.local_name
    }

    /// First child with the given local name.
    pub fn child(&self, local_name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.local_name() == local_name)
    }

    /// All children with the given local name.
    pub fn children_named<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children
            .iter()
            .filter(move |c| c.local_name() == local_name)
    }

    /// Follow a path of local names through first matches.
    pub fn find(&self, path: &[&str]) -> Option<&Node> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    /// Text of the node at `path`, if present.
    pub fn text_at(&self, path: &[&str]) -> Option<&str> {
        self.find(path).and_then(|node| node.text.as_deref())
    }
}

/// Sink that assembles a [`Node`] tree.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    stack: Vec<Node>,
    pending_namespaces: Vec<(String, String)>,
    root: Option<Node>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The finished root element.
    pub fn into_root(self) -> Result<Node> {
        if let Some(open) = self.stack.last() {
            return Err(Error::UnclosedElement {
                name: open.name.qualified_name(),
            });
        }
        self.root.ok_or(Error::EmptyDocument)
    }
}

impl EventSink for TreeBuilder {
    fn start_document(&mut self) -> Result<()> {
        self.stack.clear();
        self.pending_namespaces.clear();
        self.root = None;
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.pending_namespaces
            .push((prefix.to_string(), uri.to_string()));
        Ok(())
    }

    fn end_prefix_mapping(&mut self, _prefix: &str) -> Result<()> {
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        let mut node = Node::new(name.clone());
        node.namespaces = std::mem::take(&mut self.pending_namespaces);
        node.attributes = attributes.to_vec();
        self.stack.push(node);
        Ok(())
    }

    fn end_element(&mut self, name: &QName) -> Result<()> {
        let node = self.stack.pop().ok_or(Error::NamespaceUnderflow)?;
        if node.name.local_name != name.local_name {
            return Err(Error::MismatchedEnd {
                expected: node.name.qualified_name(),
                found: name.qualified_name(),
            });
        }
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.root = Some(node),
        }
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        if let Some(node) = self.stack.last_mut() {
            node.text.get_or_insert_with(String::new).push_str(text);
        }
        Ok(())
    }
}
