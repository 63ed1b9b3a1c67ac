#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # edi-ir
//!
//! Event model for the EDI parsing engine.
//!
//! Parsers push namespace-qualified element events into an [`EventSink`].
//! The [`Emitter`] keeps a [`NamespaceStack`] in step with element nesting
//! so prefix mappings always open and close in strict LIFO order.

/// Element emitter that drives the namespace stack.
pub mod emitter;
/// Qualified names, attributes, events and the sink contract.
pub mod event;
/// Positional metadata attached to diagnostics.
pub mod metadata;
/// Namespace declaration stack.
pub mod namespace;
/// Element tree and the sink that builds it.
pub mod node;

pub use emitter::Emitter;
pub use event::{Attribute, Event, EventRecorder, EventSink, QName, XMLNS_NAMESPACE};
pub use metadata::SegmentPosition;
pub use namespace::{NamespaceFrame, NamespaceStack};
pub use node::{Node, TreeBuilder};

use thiserror::Error;

/// Errors raised while emitting or consuming events
#[derive(Error, Debug)]
pub enum Error {
    #[error("Namespace stack underflow: end without matching start")]
    NamespaceUnderflow,

    #[error("Element '{name}' was never closed")]
    UnclosedElement { name: String },

    #[error("End of element '{found}' does not match open element '{expected}'")]
    MismatchedEnd { expected: String, found: String },

    #[error("Document has no root element")]
    EmptyDocument,

    #[error("Event sink failed: {message}")]
    Sink { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a sink failure with a message.
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }
}

/// Crate-local result type for event operations.
pub type Result<T> = std::result::Result<T, Error>;
