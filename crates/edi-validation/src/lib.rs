#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # edi-validation
//!
//! Rule checks applied while a message is mapped: occurrence ranges,
//! mandatory values, value types and lengths, and control counts.
//!
//! A [`Validator`] decides per violation whether the parse aborts or the
//! error is collected.
//!
//! ## Example Usage
//!
//! ```rust
//! use edi_schema::{DataType, ValueSpec};
//! use edi_validation::{ValidationConfig, Validator, check_value};
//!
//! let spec = ValueSpec { data_type: DataType::Numeric, ..ValueSpec::default() };
//! assert!(check_value("42", &spec, '.').is_none());
//! assert!(check_value("4x", &spec, '.').is_some());
//!
//! let validator = Validator::new(ValidationConfig::collecting());
//! assert!(validator.is_enabled());
//! ```

pub mod engine;
pub mod rules;

pub use engine::{
    ValidationConfig, ValidationError, ValidationErrorKind, ValidationPolicy, Validator,
};
pub use rules::{
    RuleResult, check_max_occurs, check_min_occurs, check_value, validate_data_type,
    validate_length, validate_pattern,
};

/// Result of a rule check that may abort the parse
pub type Result<T> = std::result::Result<T, ValidationError>;
