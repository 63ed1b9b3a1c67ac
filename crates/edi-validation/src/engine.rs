//! Validation engine

use edi_ir::SegmentPosition;
use edi_schema::{DataType, MappingNode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// What happens when a rule is violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Fail the parse on the first violation
    #[default]
    Abort,
    /// Record the violation and keep parsing
    Collect,
}

/// Validation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Check occurrences, mandatory values, types and control counts
    pub enabled: bool,
    pub policy: ValidationPolicy,
    /// Maximum collected errors before aborting anyway (0 = unlimited)
    pub max_errors: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: ValidationPolicy::Abort,
            max_errors: 0,
        }
    }
}

impl ValidationConfig {
    /// Configuration with every check switched off
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Configuration that collects violations instead of aborting
    #[must_use]
    pub fn collecting() -> Self {
        Self {
            policy: ValidationPolicy::Collect,
            ..Self::default()
        }
    }
}

/// The rule a value or structure violated
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationErrorKind {
    #[error("expected at least {min} occurrence(s), found {found}")]
    MinOccurs { min: usize, found: usize },

    #[error("allows at most {max} occurrence(s), found {found}")]
    MaxOccurs { max: usize, found: usize },

    #[error("segment '{code}' appears out of sequence")]
    OutOfSequence { code: String },

    #[error("mandatory value is missing")]
    MissingMandatory,

    #[error("{found} fields where {expected} are defined")]
    TooManyFields { expected: usize, found: usize },

    #[error("{found} components where {expected} are defined")]
    TooManyComponents { expected: usize, found: usize },

    #[error("invalid {data_type:?} value '{value}': {reason}")]
    InvalidValue {
        data_type: DataType,
        value: String,
        reason: String,
    },

    #[error("control value is '{found}', expected '{expected}'")]
    ControlMismatch { expected: String, found: String },
}

/// A rule violation, located in the model and in the input
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Validation error at {position}: {node} {kind}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub node: MappingNode,
    pub position: SegmentPosition,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, node: MappingNode, position: SegmentPosition) -> Self {
        Self {
            kind,
            node,
            position,
        }
    }
}

/// Applies the configured policy to violations found during a parse.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidationConfig,
    collected: Vec<ValidationError>,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            collected: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Handle a violation.
    ///
    /// Returns the error when the parse must stop: always under
    /// [`ValidationPolicy::Abort`], and under collect once `max_errors` is
    /// exceeded. Violations are ignored while validation is disabled.
    ///
    /// # Errors
    ///
    /// Returns the violation when parsing has to abort.
    pub fn report(&mut self, error: ValidationError) -> Result<(), ValidationError> {
        if !self.config.enabled {
            return Ok(());
        }

        match self.config.policy {
            ValidationPolicy::Abort => Err(error),
            ValidationPolicy::Collect => {
                let limit = self.config.max_errors;
                if limit > 0 && self.collected.len() >= limit {
                    debug!("Validation error limit {} exceeded", limit);
                    return Err(error);
                }
                warn!("{}", error);
                self.collected.push(error);
                Ok(())
            }
        }
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.collected
    }

    pub fn has_errors(&self) -> bool {
        !self.collected.is_empty()
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.collected
    }
}
