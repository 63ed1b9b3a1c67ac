//! UN/EDIFACT syntax definitions
//!
//! This module handles the service string advice (UNA), syntax versions and
//! the mapping from syntax identifiers to character encodings.

use edi_schema::{DelimiterError, Delimiters};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

/// Length of a service string advice, `UNA` included
pub const UNA_LENGTH: usize = 9;

/// Prefix shared by every UN/EDIFACT service segment code
pub const RESERVED_CODE_PREFIX: &str = "UN";

/// Syntax version of an interchange (ISO 9735 version 3 or 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SyntaxVersion {
    V3,
    #[default]
    V4,
}

impl SyntaxVersion {
    /// Version declared by the `versionNum` component of a syntax identifier
    pub fn from_version_number(number: &str) -> Option<Self> {
        match number.trim() {
            "1" | "2" | "3" => Some(Self::V3),
            "4" => Some(Self::V4),
            _ => None,
        }
    }
}

impl TryFrom<u8> for SyntaxVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(Self::V3),
            4 => Ok(Self::V4),
            other => Err(format!("unsupported syntax version {other}, expected 3 or 4")),
        }
    }
}

impl From<SyntaxVersion> for u8 {
    fn from(version: SyntaxVersion) -> Self {
        match version {
            SyntaxVersion::V3 => 3,
            SyntaxVersion::V4 => 4,
        }
    }
}

impl FromStr for SyntaxVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number: u8 = s
            .trim()
            .trim_start_matches(['v', 'V'])
            .parse()
            .map_err(|_| format!("invalid syntax version '{s}'"))?;
        Self::try_from(number)
    }
}

impl fmt::Display for SyntaxVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", u8::from(*self))
    }
}

/// Parse a service string advice.
///
/// UNA format: `UNA:+.? '`
/// Positions:   `012345678`
///
/// Position 3 is the component separator, 4 the data element separator,
/// 5 the decimal mark, 6 the release character (a space means none), 7 is
/// reserved and 8 the segment terminator.
///
/// # Errors
///
/// Returns an error when the advice is not 9 characters starting with
/// `UNA` or declares the same character twice.
pub fn parse_una(una: &str) -> Result<Delimiters, DelimiterError> {
    let chars: Vec<char> = una.chars().collect();
    if chars.len() != UNA_LENGTH || !una.starts_with("UNA") {
        return Err(DelimiterError::Malformed(format!(
            "service string advice must be 'UNA' plus 6 characters, got {una:?}"
        )));
    }

    let delimiters = Delimiters {
        component: chars[3],
        field: chars[4],
        decimal: chars[5],
        escape: (chars[6] != ' ').then_some(chars[6]),
        sub_component: None,
        segment: chars[8],
    };
    delimiters.validate()?;
    Ok(delimiters)
}

/// Syntax identifier codes (character repertoires and coded character
/// encodings) and the charset labels they stand for.
const CHARSET_CODES: [(&str, &str); 23] = [
    ("UNOA", "us-ascii"),
    ("UNOB", "us-ascii"),
    ("UNOC", "iso-8859-1"),
    ("UNOD", "iso-8859-2"),
    ("UNOE", "iso-8859-5"),
    ("UNOF", "iso-8859-7"),
    ("UNOG", "iso-8859-3"),
    ("UNOH", "iso-8859-4"),
    ("UNOI", "iso-8859-6"),
    ("UNOJ", "iso-8859-8"),
    ("UNOK", "iso-8859-9"),
    ("UNOL", "iso-8859-15"),
    ("UNOW", "utf-8"),
    ("UNOX", "iso-2022-cn"),
    ("UNOY", "utf-8"),
    ("1", "us-ascii"),
    ("2", "us-ascii"),
    ("3", "ibm500"),
    ("4", "ibm850"),
    ("5", "utf-16"),
    ("6", "utf-32"),
    ("7", "utf-8"),
    ("8", "utf-16"),
];

static CHARSETS: LazyLock<HashMap<&'static str, &'static Encoding>> = LazyLock::new(|| {
    let mut charsets = HashMap::new();
    for (code, label) in CHARSET_CODES {
        match Encoding::for_label(label.as_bytes()) {
            Some(encoding) if encoding != encoding_rs::REPLACEMENT => {
                charsets.insert(code, encoding);
            }
            _ => debug!(
                "Unsupported character set '{}'. Syntax identifier code '{}' cannot be decoded",
                label, code
            ),
        }
    }
    charsets
});

/// Encoding for a syntax identifier code, case-insensitive.
pub fn charset_for(code: &str) -> Option<&'static Encoding> {
    CHARSETS.get(code.trim().to_uppercase().as_str()).copied()
}

/// Encoding label accepted by configuration (`UTF-8`, `ISO-8859-1`, …).
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes()).filter(|e| *e != encoding_rs::REPLACEMENT)
}

/// The code that selects the interchange encoding.
///
/// Syntax version 4 lets the coded character encoding (component index 3)
/// override the repertoire (index 0); version 3 has no override.
pub fn declared_charset_code<'c>(components: &[&'c str], version: SyntaxVersion) -> &'c str {
    let repertoire = components.first().copied().unwrap_or_default();
    match version {
        SyntaxVersion::V4 => components
            .get(3)
            .copied()
            .filter(|code| !code.trim().is_empty())
            .unwrap_or(repertoire),
        SyntaxVersion::V3 => repertoire,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_una_parsing() {
        let delimiters = parse_una("UNA:+.? '").unwrap();
        assert_eq!(delimiters, Delimiters::unedifact());
    }

    #[test]
    fn test_una_custom_separators() {
        let delimiters = parse_una("UNA*=,# ~").unwrap();
        assert_eq!(delimiters.component, '*');
        assert_eq!(delimiters.field, '=');
        assert_eq!(delimiters.decimal, ',');
        assert_eq!(delimiters.escape, Some('#'));
        assert_eq!(delimiters.segment, '~');
    }

    #[test]
    fn test_una_without_release_character() {
        let delimiters = parse_una("UNA:+.  '").unwrap();
        assert_eq!(delimiters.escape, None);
        assert_eq!(delimiters.segment, '\'');
    }

    #[test]
    fn test_una_rejects_duplicates() {
        let err = parse_una("UNA++.? '").unwrap_err();
        assert!(matches!(err, DelimiterError::Duplicate { character: '+', .. }));
    }

    #[test]
    fn test_una_rejects_wrong_length() {
        assert!(matches!(
            parse_una("UNA:+.?'"),
            Err(DelimiterError::Malformed(_))
        ));
        assert!(matches!(
            parse_una("UNB:+.? '"),
            Err(DelimiterError::Malformed(_))
        ));
    }

    #[test]
    fn test_charset_table() {
        assert_eq!(charset_for("UNOC"), Some(encoding_rs::WINDOWS_1252));
        assert_eq!(charset_for("unoy"), Some(encoding_rs::UTF_8));
        assert_eq!(charset_for("UNOD"), Some(encoding_rs::ISO_8859_2));
        assert_eq!(charset_for("UNOL"), Some(encoding_rs::ISO_8859_15));
        assert_eq!(charset_for("7"), Some(encoding_rs::UTF_8));
        assert!(charset_for("UNOA").is_some_and(|e| e.is_ascii_compatible()));
        assert!(charset_for("8").is_some());
    }

    #[test]
    fn test_unsupported_charsets_are_unknown() {
        assert_eq!(charset_for("UNOX"), None);
        assert_eq!(charset_for("3"), None);
        assert_eq!(charset_for("6"), None);
        assert_eq!(charset_for("UNOZ"), None);
    }

    #[test]
    fn test_declared_charset_code() {
        assert_eq!(declared_charset_code(&["UNOC", "4"], SyntaxVersion::V4), "UNOC");
        assert_eq!(
            declared_charset_code(&["UNOB", "4", "", "7"], SyntaxVersion::V4),
            "7"
        );
        assert_eq!(
            declared_charset_code(&["UNOB", "4", "", ""], SyntaxVersion::V4),
            "UNOB"
        );
        assert_eq!(
            declared_charset_code(&["UNOB", "3", "", "7"], SyntaxVersion::V3),
            "UNOB"
        );
        assert_eq!(declared_charset_code(&[], SyntaxVersion::V4), "");
    }

    #[test]
    fn test_syntax_version_parsing() {
        assert_eq!("4".parse::<SyntaxVersion>(), Ok(SyntaxVersion::V4));
        assert_eq!("v3".parse::<SyntaxVersion>(), Ok(SyntaxVersion::V3));
        assert!("5".parse::<SyntaxVersion>().is_err());
        assert_eq!(SyntaxVersion::from_version_number("2"), Some(SyntaxVersion::V3));
        assert_eq!(SyntaxVersion::from_version_number("x"), None);
        assert_eq!(SyntaxVersion::V4.to_string(), "v4");
    }

    #[test]
    fn test_encoding_labels() {
        assert_eq!(encoding_for_label("UTF-8"), Some(encoding_rs::UTF_8));
        assert_eq!(encoding_for_label(" ISO-8859-1 "), Some(encoding_rs::WINDOWS_1252));
        assert_eq!(encoding_for_label("klingon"), None);
    }
}
