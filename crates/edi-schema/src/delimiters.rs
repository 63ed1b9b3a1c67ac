//! Delimiter set and escape-aware splitting.
//!
//! Splitting never breaks inside an escape pair: the escape character and
//! the character after it stay together in the token. [`Delimiters::unescape`]
//! strips the escapes once a token reaches a leaf value.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

/// UN/EDIFACT default segment terminator
pub const DEFAULT_SEGMENT_TERMINATOR: char = '\'';
/// UN/EDIFACT default data element separator
pub const DEFAULT_FIELD_SEPARATOR: char = '+';
/// UN/EDIFACT default component data element separator
pub const DEFAULT_COMPONENT_SEPARATOR: char = ':';
/// UN/EDIFACT default release character
pub const DEFAULT_ESCAPE: char = '?';
/// UN/EDIFACT default decimal mark
pub const DEFAULT_DECIMAL_SIGN: char = '.';

/// Problems with a delimiter declaration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DelimiterError {
    #[error("Delimiter {first} and {second} both use {character:?}")]
    Duplicate {
        first: &'static str,
        second: &'static str,
        character: char,
    },

    #[error("Malformed delimiter declaration: {0}")]
    Malformed(String),
}

/// The characters that structure an EDI stream.
///
/// Immutable once established for an interchange; a service string advice
/// replaces the whole value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delimiters {
    pub segment: char,
    pub field: char,
    pub component: char,
    pub sub_component: Option<char>,
    pub escape: Option<char>,
    pub decimal: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::unedifact()
    }
}

impl Delimiters {
    /// UN/EDIFACT level A/B defaults: `'`, `+`, `:`, release `?`, decimal `.`.
    pub const fn unedifact() -> Self {
        Self {
            segment: DEFAULT_SEGMENT_TERMINATOR,
            field: DEFAULT_FIELD_SEPARATOR,
            component: DEFAULT_COMPONENT_SEPARATOR,
            sub_component: None,
            escape: Some(DEFAULT_ESCAPE),
            decimal: DEFAULT_DECIMAL_SIGN,
        }
    }

    /// Check that every delimiter is distinct from every other.
    pub fn validate(&self) -> Result<(), DelimiterError> {
        let mut named: Vec<(&'static str, char)> = vec![
            ("segment terminator", self.segment),
            ("field separator", self.field),
            ("component separator", self.component),
            ("decimal sign", self.decimal),
        ];
        if let Some(sub) = self.sub_component {
            named.push(("sub-component separator", sub));
        }
        if let Some(escape) = self.escape {
            named.push(("escape character", escape));
        }

        for (i, (first, a)) in named.iter().enumerate() {
            if let Some((second, _)) = named[i + 1..].iter().find(|(_, b)| b == a) {
                return Err(DelimiterError::Duplicate {
                    first: *first,
                    second: *second,
                    character: *a,
                });
            }
        }
        Ok(())
    }

    /// True when `c` has structural meaning and must be escaped in data.
    pub fn is_delimiter(&self, c: char) -> bool {
        c == self.segment
            || c == self.field
            || c == self.component
            || Some(c) == self.sub_component
            || Some(c) == self.escape
    }

    /// Split `value` on `separator`, keeping escape pairs intact.
    ///
    /// Every token is preserved, including empty ones between adjacent
    /// separators and a trailing empty token. An empty input yields no
    /// tokens.
    pub fn split<'v>(&self, value: &'v str, separator: char) -> Vec<&'v str> {
        if value.is_empty() {
            return Vec::new();
        }

        let mut tokens = Vec::new();
        let mut start = 0;
        let mut escaped = false;
        for (index, c) in value.char_indices() {
            if escaped {
                escaped = false;
            } else if Some(c) == self.escape {
                escaped = true;
            } else if c == separator {
                tokens.push(&value[start..index]);
                start = index + c.len_utf8();
            }
        }
        tokens.push(&value[start..]);
        tokens
    }

    /// Fields of a raw segment; index 0 is the segment code.
    pub fn split_fields<'v>(&self, segment: &'v str) -> Vec<&'v str> {
        self.split(segment, self.field)
    }

    pub fn split_components<'v>(&self, field: &'v str) -> Vec<&'v str> {
        self.split(field, self.component)
    }

    /// Sub-components, or the whole component when no separator is set.
    pub fn split_sub_components<'v>(&self, component: &'v str) -> Vec<&'v str> {
        match self.sub_component {
            Some(separator) => self.split(component, separator),
            None if component.is_empty() => Vec::new(),
            None => vec![component],
        }
    }

    /// Drop escape characters, keeping what they protect.
    pub fn unescape<'v>(&self, value: &'v str) -> Cow<'v, str> {
        let Some(escape) = self.escape else {
            return Cow::Borrowed(value);
        };
        if !value.contains(escape) {
            return Cow::Borrowed(value);
        }

        let mut out = String::with_capacity(value.len());
        let mut chars = value.chars();
        while let Some(c) = chars.next() {
            if c == escape {
                match chars.next() {
                    Some(next) => out.push(next),
                    None => out.push(c),
                }
            } else {
                out.push(c);
            }
        }
        Cow::Owned(out)
    }

    /// Escape every delimiter character in `value`.
    pub fn escape(&self, value: &str) -> String {
        let Some(escape) = self.escape else {
            return value.to_string();
        };
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            if self.is_delimiter(c) {
                out.push(escape);
            }
            out.push(c);
        }
        out
    }
}
