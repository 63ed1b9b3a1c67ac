//! Validation rules for leaf values and occurrence counts

use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use edi_schema::{DataType, MaxOccurs, Occurs, ValueSpec};
use regex::Regex;
use std::sync::LazyLock;

use crate::engine::ValidationErrorKind;

static NUMERIC: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(r"^-?\d+$"));
static DECIMAL_POINT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| decimal_pattern('.'));
static DECIMAL_COMMA: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| decimal_pattern(','));

/// Model-declared patterns, compiled once per pattern text.
static PATTERNS: LazyLock<DashMap<String, Result<Regex, regex::Error>>> =
    LazyLock::new(DashMap::new);

fn decimal_pattern(sign: char) -> Result<Regex, regex::Error> {
    let sign = regex::escape(&sign.to_string());
    Regex::new(&format!(r"^-?(\d+({sign}\d*)?|{sign}\d+)$"))
}

/// Validation rule result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleResult {
    pub is_valid: bool,
    pub message: Option<String>,
}

impl RuleResult {
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: Some(message.into()),
        }
    }
}

fn matches(pattern: &LazyLock<Result<Regex, regex::Error>>, value: &str) -> RuleResult {
    match &**pattern {
        Ok(regex) if regex.is_match(value) => RuleResult::valid(),
        Ok(_) => RuleResult::invalid("value does not match the expected format"),
        Err(e) => RuleResult::invalid(format!("pattern unavailable: {e}")),
    }
}

/// Length of a value as EDIFACT counts it: numeric types ignore the sign
/// and the decimal mark.
#[must_use]
pub fn value_length(value: &str, data_type: DataType) -> usize {
    match data_type {
        DataType::Numeric | DataType::Decimal => value.chars().filter(char::is_ascii_digit).count(),
        _ => value.chars().count(),
    }
}

/// Validate length constraints
#[must_use]
pub fn validate_length(value: &str, spec: &ValueSpec) -> RuleResult {
    let len = value_length(value, spec.data_type);

    if let Some(min) = spec.min_length {
        if len < min {
            return RuleResult::invalid(format!("length {len} is less than minimum {min}"));
        }
    }

    if let Some(max) = spec.max_length {
        if len > max {
            return RuleResult::invalid(format!("length {len} exceeds maximum {max}"));
        }
    }

    RuleResult::valid()
}

/// Validate a value against a regex pattern (anchored on both ends)
#[must_use]
pub fn validate_pattern(value: &str, pattern: &str) -> RuleResult {
    match compiled(pattern) {
        Ok(regex) if regex.is_match(value) => RuleResult::valid(),
        Ok(_) => RuleResult::invalid(format!("value does not match pattern '{pattern}'")),
        Err(e) => RuleResult::invalid(format!("invalid pattern '{pattern}': {e}")),
    }
}

fn compiled(pattern: &str) -> Result<Regex, regex::Error> {
    if let Some(cached) = PATTERNS.get(pattern) {
        return cached.value().clone();
    }
    PATTERNS
        .entry(pattern.to_string())
        .or_insert_with(|| Regex::new(&format!("^(?:{pattern})$")))
        .value()
        .clone()
}

/// Translate a `yyyyMMdd`-style pattern into a chrono format string.
///
/// Formats that already contain `%` are returned unchanged.
#[must_use]
pub fn to_chrono_format(format: &str) -> String {
    if format.contains('%') {
        return format.to_string();
    }
    [
        ("yyyy", "%Y"),
        ("yy", "%y"),
        ("MM", "%m"),
        ("dd", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
    ]
    .iter()
    .fold(format.to_string(), |acc, (from, to)| acc.replace(from, to))
}

/// Validate a value's primitive type.
///
/// `decimal_sign` is the active decimal mark. A `format` on a date or time
/// is a date pattern; on a string it is a regex the value must match.
#[must_use]
pub fn validate_data_type(
    value: &str,
    data_type: DataType,
    format: Option<&str>,
    decimal_sign: char,
) -> RuleResult {
    match data_type {
        DataType::String => match format {
            Some(pattern) => validate_pattern(value, pattern),
            None => RuleResult::valid(),
        },
        DataType::Numeric => matches(&NUMERIC, value),
        DataType::Decimal => match decimal_sign {
            '.' => matches(&DECIMAL_POINT, value),
            ',' => matches(&DECIMAL_COMMA, value),
            other => match decimal_pattern(other) {
                Ok(regex) if regex.is_match(value) => RuleResult::valid(),
                Ok(_) => RuleResult::invalid("value is not a decimal number"),
                Err(e) => RuleResult::invalid(format!("pattern unavailable: {e}")),
            },
        },
        DataType::Date => {
            let format = to_chrono_format(format.unwrap_or("%Y%m%d"));
            match NaiveDate::parse_from_str(value, &format) {
                Ok(_) => RuleResult::valid(),
                Err(e) => RuleResult::invalid(format!("not a date in format '{format}': {e}")),
            }
        }
        DataType::Time => {
            let format = match format {
                Some(format) => to_chrono_format(format),
                None if value.len() == 6 => "%H%M%S".to_string(),
                None => "%H%M".to_string(),
            };
            match NaiveTime::parse_from_str(value, &format) {
                Ok(_) => RuleResult::valid(),
                Err(e) => RuleResult::invalid(format!("not a time in format '{format}': {e}")),
            }
        }
        DataType::Binary => RuleResult::valid(),
    }
}

/// Check a non-empty leaf value against its spec.
#[must_use]
pub fn check_value(value: &str, spec: &ValueSpec, decimal_sign: char) -> Option<ValidationErrorKind> {
    let type_result = validate_data_type(value, spec.data_type, spec.format.as_deref(), decimal_sign);
    let result = if type_result.is_valid {
        validate_length(value, spec)
    } else {
        type_result
    };

    if result.is_valid {
        return None;
    }
    Some(ValidationErrorKind::InvalidValue {
        data_type: spec.data_type,
        value: value.to_string(),
        reason: result.message.unwrap_or_default(),
    })
}

/// Violation when fewer than the minimum occurrences were seen.
#[must_use]
pub fn check_min_occurs(occurs: Occurs, count: usize) -> Option<ValidationErrorKind> {
    (count < occurs.min).then_some(ValidationErrorKind::MinOccurs {
        min: occurs.min,
        found: count,
    })
}

/// Violation when `count` occurrences exceed the maximum.
#[must_use]
pub fn check_max_occurs(occurs: Occurs, count: usize) -> Option<ValidationErrorKind> {
    match occurs.max {
        MaxOccurs::Bounded(max) if count > max => {
            Some(ValidationErrorKind::MaxOccurs { max, found: count })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(data_type: DataType) -> ValueSpec {
        ValueSpec {
            data_type,
            ..ValueSpec::default()
        }
    }

    #[test]
    fn test_length_constraints() {
        let bounded = ValueSpec {
            min_length: Some(2),
            max_length: Some(4),
            ..ValueSpec::default()
        };
        assert!(validate_length("ab", &bounded).is_valid);
        assert!(validate_length("abcd", &bounded).is_valid);
        assert!(!validate_length("a", &bounded).is_valid);
        assert!(!validate_length("abcde", &bounded).is_valid);
        // Characters, not bytes.
        assert!(validate_length("äöüß", &bounded).is_valid);
    }

    #[test]
    fn test_numeric_length_ignores_sign_and_mark() {
        let decimal = ValueSpec {
            data_type: DataType::Decimal,
            max_length: Some(3),
            ..ValueSpec::default()
        };
        assert!(validate_length("-1.25", &decimal).is_valid);
        assert!(!validate_length("12.34", &decimal).is_valid);
        assert_eq!(value_length("-1.25", DataType::Decimal), 3);
    }

    #[test]
    fn test_numeric_and_decimal() {
        assert!(validate_data_type("42", DataType::Numeric, None, '.').is_valid);
        assert!(validate_data_type("-7", DataType::Numeric, None, '.').is_valid);
        assert!(!validate_data_type("4.2", DataType::Numeric, None, '.').is_valid);
        assert!(!validate_data_type("", DataType::Numeric, None, '.').is_valid);

        assert!(validate_data_type("10.5", DataType::Decimal, None, '.').is_valid);
        assert!(validate_data_type(".5", DataType::Decimal, None, '.').is_valid);
        assert!(validate_data_type("5.", DataType::Decimal, None, '.').is_valid);
        assert!(!validate_data_type("1.2.3", DataType::Decimal, None, '.').is_valid);
        assert!(!validate_data_type("10,5", DataType::Decimal, None, '.').is_valid);
        assert!(validate_data_type("10,5", DataType::Decimal, None, ',').is_valid);
        assert!(validate_data_type("10|5", DataType::Decimal, None, '|').is_valid);
    }

    #[test]
    fn test_dates_and_times() {
        assert!(validate_data_type("20240131", DataType::Date, None, '.').is_valid);
        assert!(!validate_data_type("20240231", DataType::Date, None, '.').is_valid);
        assert!(validate_data_type("240131", DataType::Date, Some("yyMMdd"), '.').is_valid);
        assert!(validate_data_type("2024-01-31", DataType::Date, Some("%Y-%m-%d"), '.').is_valid);

        assert!(validate_data_type("1230", DataType::Time, None, '.').is_valid);
        assert!(validate_data_type("123059", DataType::Time, None, '.').is_valid);
        assert!(!validate_data_type("2460", DataType::Time, None, '.').is_valid);
        assert!(validate_data_type("12:30", DataType::Time, Some("HH:mm"), '.').is_valid);
    }

    #[test]
    fn test_string_pattern_and_binary() {
        assert!(validate_data_type("ABC", DataType::String, Some("[A-Z]+"), '.').is_valid);
        assert!(!validate_data_type("ABC1", DataType::String, Some("[A-Z]+"), '.').is_valid);
        assert!(!validate_data_type("x", DataType::String, Some("("), '.').is_valid);
        assert!(validate_data_type("\u{0}\u{1}", DataType::Binary, None, '.').is_valid);
    }

    #[test]
    fn test_patterns_are_compiled_once() {
        let pattern = "[A-Z]{2}-\\d{4}";
        assert!(validate_pattern("AB-1234", pattern).is_valid);
        assert!(!validate_pattern("AB-12", pattern).is_valid);
        assert!(PATTERNS.get(pattern).is_some_and(|cached| cached.is_ok()));

        assert!(!validate_pattern("x", "[unclosed").is_valid);
        assert!(PATTERNS.get("[unclosed").is_some_and(|cached| cached.is_err()));
        assert!(!validate_pattern("y", "[unclosed").is_valid);
    }

    #[test]
    fn test_to_chrono_format() {
        assert_eq!(to_chrono_format("yyyyMMdd"), "%Y%m%d");
        assert_eq!(to_chrono_format("HHmmss"), "%H%M%S");
        assert_eq!(to_chrono_format("%d.%m.%Y"), "%d.%m.%Y");
    }

    #[test]
    fn test_check_value_reports_kind() {
        assert_eq!(check_value("123", &spec(DataType::Numeric), '.'), None);

        let kind = check_value("12a", &spec(DataType::Numeric), '.').unwrap();
        assert!(matches!(
            kind,
            ValidationErrorKind::InvalidValue { data_type: DataType::Numeric, ref value, .. } if value == "12a"
        ));

        let long = ValueSpec {
            max_length: Some(2),
            ..ValueSpec::default()
        };
        assert!(check_value("abc", &long, '.').is_some());
    }

    #[test]
    fn test_occurrence_checks() {
        let once = Occurs::ONCE;
        assert_eq!(
            check_min_occurs(once, 0),
            Some(ValidationErrorKind::MinOccurs { min: 1, found: 0 })
        );
        assert_eq!(check_min_occurs(once, 1), None);
        assert_eq!(
            check_max_occurs(once, 2),
            Some(ValidationErrorKind::MaxOccurs { max: 1, found: 2 })
        );
        assert_eq!(check_max_occurs(Occurs::new(0, MaxOccurs::Unbounded), 500), None);
    }
}
