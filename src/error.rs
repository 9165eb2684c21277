//! Error types for schema construction, validation and document loading.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::PathSegment;

/// Errors raised while building a schema, or thrown while evaluating one
/// when the schema itself turns out to be unusable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("Cannot call allow/valid/invalid with undefined")]
    UndefinedValue,

    #[error("Override must be the first value")]
    OverrideNotFirst,

    #[error("Setting invalid value {value} leaves schema rejecting all values due to previous valid rule")]
    RejectsAllValues { value: String },

    #[error("Cannot merge type {left} with another type: {right}")]
    TypeMismatch { left: String, right: String },

    #[error("Invalid schema object")]
    InvalidSchema,

    #[error("Invalid rule name")]
    InvalidRuleName,

    #[error("Invalid options")]
    InvalidOptions,

    #[error("Unknown rule {name} for type {type_name}")]
    UnknownRule { name: String, type_name: String },

    #[error("Method {method} is not available on type {type_name}")]
    UnsupportedMethod { method: String, type_name: String },

    #[error("{name} {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Options must be of type object")]
    OptionsNotObject,

    #[error("options must have at least one of \"then\", \"otherwise\", or \"switch\"")]
    MissingBranch,

    #[error("Cannot specify then, otherwise, and break all together")]
    ThenOtherwiseBreak,

    #[error("Cannot specify both otherwise and break")]
    OtherwiseAndBreak,

    #[error("Cannot combine \"is\" with \"not\"")]
    IsWithNot,

    #[error("Cannot combine \"switch\" with \"{0}\"")]
    SwitchWith(&'static str),

    #[error("Cannot specify \"otherwise\" inside and outside a \"switch\"")]
    OtherwiseInsideAndOutside,

    #[error("\"{0}\" can not be used with a schema condition")]
    SchemaConditionWith(&'static str),

    #[error("Invalid reference key: {0}")]
    InvalidReferenceKey(String),

    #[error("Invalid separator")]
    InvalidSeparator,

    #[error("Cannot combine prefix with ancestor option")]
    PrefixWithAncestor,

    #[error("Cannot specify relative path with root prefix")]
    RelativeRootPath,

    #[error("Invalid reference exceeds the schema root: {display}")]
    ReferenceExceedsRoot { display: String },

    #[error("Item cannot come after itself: {key} ({chain})")]
    CircularDependency { key: String, chain: String },

    #[error("id cannot contain period character")]
    InvalidId,

    #[error("Schema does not contain path {path}")]
    PathNotFound { path: String },

    #[error("\"{key}\" is not allowed")]
    UnknownPreference { key: String },

    #[error("\"{key}\" must be {expected}")]
    InvalidPreference { key: String, expected: String },

    #[error("error() must return an Error object")]
    EmptyErrorOverride,

    #[error("Invalid message for {code}")]
    InvalidMessage { code: String },

    #[error("Template source cannot contain reserved control characters")]
    InvalidTemplate,

    #[error("Type {type_name} does not support casting to {target}")]
    UnsupportedCast { type_name: String, target: String },

    #[error("Invalid regular expression {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("invalid description at {path}: {message}")]
    InvalidDescription { path: String, message: String },
}

/// A single validation violation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Rendered human-readable message.
    pub message: String,
    /// Location of the offending value inside the validated document.
    pub path: Vec<PathSegment>,
    /// Dotted error code, e.g. `number.min`.
    #[serde(rename = "type")]
    pub code: String,
    /// Machine-readable details (`label`, `key`, `value`, rule arguments).
    pub context: Map<String, Value>,
}

impl ErrorReport {
    /// Returns a context entry by name.
    pub fn context_value(&self, name: &str) -> Option<&Value> {
        self.context.get(name)
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Error supplied by callers through `error()` overrides or hook failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared caller-supplied error.
pub type CustomError = Arc<dyn std::error::Error + Send + Sync>;

/// One entry of a node's error list: an engine report or a caller error.
#[derive(Debug, Clone)]
pub enum Fault {
    Report(ErrorReport),
    Custom(CustomError),
}

impl From<ErrorReport> for Fault {
    fn from(report: ErrorReport) -> Self {
        Fault::Report(report)
    }
}

impl Fault {
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            Fault::Report(report) => Some(report),
            Fault::Custom(_) => None,
        }
    }
}

/// Failure returned by a rule implementation.
#[derive(Debug, Clone)]
pub enum RuleError {
    Report(ErrorReport),
    Schema(SchemaError),
}

impl From<ErrorReport> for RuleError {
    fn from(report: ErrorReport) -> Self {
        RuleError::Report(report)
    }
}

impl From<SchemaError> for RuleError {
    fn from(err: SchemaError) -> Self {
        RuleError::Schema(err)
    }
}

/// Top-level validation failure.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// Engine-produced errors with their flat detail list.
    #[error("{message}")]
    Details {
        message: String,
        details: Vec<ErrorReport>,
    },
    /// A caller error that replaced the engine errors via `error()`.
    #[error("{0}")]
    Custom(CustomError),
}

impl ValidationError {
    pub(crate) fn from_faults(faults: Vec<Fault>) -> Option<Self> {
        let custom = faults.iter().find_map(|fault| match fault {
            Fault::Custom(custom) => Some(Arc::clone(custom)),
            Fault::Report(_) => None,
        });
        if let Some(custom) = custom {
            return Some(ValidationError::Custom(custom));
        }

        let details: Vec<ErrorReport> = faults
            .into_iter()
            .filter_map(|fault| match fault {
                Fault::Report(report) => Some(report),
                Fault::Custom(_) => None,
            })
            .collect();

        if details.is_empty() {
            return None;
        }

        let message = details
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join(". ");
        Some(ValidationError::Details { message, details })
    }

    /// The flat list of violations, absent when a custom error replaced them.
    pub fn details(&self) -> Option<&[ErrorReport]> {
        match self {
            ValidationError::Details { details, .. } => Some(details),
            ValidationError::Custom(_) => None,
        }
    }

    /// True when the error was produced by the engine rather than an override.
    pub fn has_details(&self) -> bool {
        matches!(self, ValidationError::Details { .. })
    }
}

/// Errors from the `attempt` convenience entry point.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Invalid(ValidationError),
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Schema(_) => 2,
            ValidateError::Invalid(_) => 1,
        }
    }
}

/// Errors while loading JSON documents (schemas, payloads, contexts).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            LoadError::InvalidJson { .. } => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(message: &str) -> ErrorReport {
        ErrorReport {
            message: message.into(),
            path: vec![PathSegment::Key("a".into())],
            code: "any.required".into(),
            context: Map::new(),
        }
    }

    #[test]
    fn load_error_exit_codes() {
        let err = LoadError::FileNotFound {
            path: PathBuf::from("payload.json"),
        };
        assert_eq!(err.exit_code(), 3);

        let source = serde_json::from_str::<Value>("{").unwrap_err();
        assert_eq!(LoadError::InvalidJson { source }.exit_code(), 2);
    }

    #[test]
    fn validate_error_exit_codes() {
        assert_eq!(ValidateError::Schema(SchemaError::InvalidId).exit_code(), 2);
        let invalid = ValidationError::from_faults(vec![report("\"a\" is required").into()]).unwrap();
        assert_eq!(ValidateError::Invalid(invalid).exit_code(), 1);
    }

    #[test]
    fn details_join_messages() {
        let err = ValidationError::from_faults(vec![
            report("\"a\" is required").into(),
            report("\"b\" is required").into(),
        ])
        .unwrap();
        assert_eq!(err.to_string(), "\"a\" is required. \"b\" is required");
        assert_eq!(err.details().map(|d| d.len()), Some(2));
    }

    #[test]
    fn custom_error_drops_details() {
        let custom: CustomError = Arc::new(std::io::Error::other("boom"));
        let err = ValidationError::from_faults(vec![Fault::Custom(custom), report("x").into()]).unwrap();
        assert!(!err.has_details());
        assert!(err.details().is_none());
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn custom_error_wins_from_any_position() {
        let custom: CustomError = Arc::new(std::io::Error::other("late"));
        let err = ValidationError::from_faults(vec![report("x").into(), Fault::Custom(custom)]).unwrap();
        assert!(err.details().is_none());
        assert_eq!(err.to_string(), "late");
    }

    #[test]
    fn schema_error_messages() {
        let err = SchemaError::TypeMismatch {
            left: "string".into(),
            right: "number".into(),
        };
        assert_eq!(err.to_string(), "Cannot merge type string with another type: number");

        let err = SchemaError::RejectsAllValues { value: "1".into() };
        assert!(err.to_string().contains("leaves schema rejecting all values"));
    }
}
