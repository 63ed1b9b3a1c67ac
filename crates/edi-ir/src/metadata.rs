//! Positional metadata attached to diagnostics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where in the input stream something happened.
///
/// `segment_number` is 1-based; 0 means no segment had been read yet (for
/// example a broken service string advice). `tokens` are the raw, still
/// escaped field strings of that segment, enough to reproduce the failure
/// from a saved copy of the input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentPosition {
    pub segment_number: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
}

impl SegmentPosition {
    pub fn new(segment_number: usize, tokens: Vec<String>) -> Self {
        Self {
            segment_number,
            tokens,
        }
    }

    /// Position before any segment has been read.
    pub fn start_of_stream() -> Self {
        Self::default()
    }

    /// The segment code, if tokens were captured.
    pub fn segment_code(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }
}

impl fmt::Display for SegmentPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment {}", self.segment_number)?;
        if !self.tokens.is_empty() {
            write!(f, " {:?}", self.tokens)?;
        }
        Ok(())
    }
}
