//! Core types shared by the engine: path segments, presence, preferences.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::template::Messages;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Structural equality with numeric comparison by value (`1 == 1.0`)
/// and key-order-insensitive objects.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).map(|w| deep_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// One step of a path inside a validated document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    pub fn as_key(&self) -> String {
        match self {
            PathSegment::Key(key) => key.clone(),
            PathSegment::Index(i) => i.to_string(),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Renders a path the way labels show it: `a.b[0].c`.
pub fn path_label(path: &[PathSegment]) -> String {
    let mut label = String::new();
    for segment in path {
        match segment {
            PathSegment::Index(i) => label.push_str(&format!("[{}]", i)),
            PathSegment::Key(key) => {
                if !label.is_empty() {
                    label.push('.');
                }
                label.push_str(key);
            }
        }
    }
    label
}

/// Presence requirement of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Presence {
    #[default]
    Optional,
    Required,
    Forbidden,
}

impl Presence {
    /// Parse a presence value from a string.
    ///
    /// Returns `None` for unknown values (caller should error).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "optional" => Some(Presence::Optional),
            "required" => Some(Presence::Required),
            "forbidden" => Some(Presence::Forbidden),
            _ => None,
        }
    }
}

/// How error labels are derived when a schema has no explicit label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelMode {
    /// Full path, e.g. `a.b[0]`.
    #[default]
    Path,
    /// Last path segment only.
    Key,
    /// No label; messages use the root label.
    Off,
}

/// Error-rendering preferences.
#[derive(Debug, Clone)]
pub struct ErrorPreferences {
    pub label: LabelMode,
    pub language: Option<String>,
    /// Characters wrapped around labels in messages; `None` disables wrapping.
    pub wrap: Option<String>,
}

impl Default for ErrorPreferences {
    fn default() -> Self {
        Self {
            label: LabelMode::Path,
            language: None,
            wrap: Some("\"".to_string()),
        }
    }
}

/// Validation preferences.
///
/// Built with the builder methods or parsed from JSON via
/// [`Preferences::from_json`]. Schema-level overrides are merged with
/// [`Preferences::apply`].
#[derive(Debug, Clone)]
pub struct Preferences {
    /// Stop at the first error (default true).
    pub abort_early: bool,
    /// Coerce values to the schema type when possible (default true).
    pub convert: bool,
    /// External context resolved by `$`-prefixed references.
    pub context: Option<Arc<Value>>,
    /// Disable default values.
    pub no_defaults: bool,
    /// Presence applied to schemas without an explicit presence flag.
    pub presence: Presence,
    /// Allow unknown object keys.
    pub allow_unknown: bool,
    /// Remove unknown object keys instead of failing.
    pub strip_unknown: bool,
    /// Cache generated condition branches within one validation run.
    pub cache: bool,
    pub errors: ErrorPreferences,
    /// Caller message overrides.
    pub messages: Messages,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            abort_early: true,
            convert: true,
            context: None,
            no_defaults: false,
            presence: Presence::Optional,
            allow_unknown: false,
            strip_unknown: false,
            cache: true,
            errors: ErrorPreferences::default(),
            messages: Messages::default(),
        }
    }
}

const PRESENCE_EXPECTED: &str = "one of [required, optional, forbidden]";

impl Preferences {
    /// Parse preferences from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownPreference` for unrecognised keys and
    /// `SchemaError::InvalidPreference` for wrongly typed values.
    pub fn from_json(value: &Value) -> Result<Self, SchemaError> {
        Self::default().apply(value)
    }

    /// Returns a copy with the given JSON overrides applied.
    pub fn apply(&self, overrides: &Value) -> Result<Self, SchemaError> {
        let map = overrides.as_object().ok_or(SchemaError::OptionsNotObject)?;
        let mut prefs = self.clone();

        for (key, value) in map {
            match key.as_str() {
                "abortEarly" => prefs.abort_early = expect_bool(key, value)?,
                "convert" => prefs.convert = expect_bool(key, value)?,
                "noDefaults" => prefs.no_defaults = expect_bool(key, value)?,
                "allowUnknown" => prefs.allow_unknown = expect_bool(key, value)?,
                "stripUnknown" => prefs.strip_unknown = expect_bool(key, value)?,
                "cache" => prefs.cache = expect_bool(key, value)?,
                "context" => {
                    if !value.is_object() {
                        return Err(invalid(key, "of type object"));
                    }
                    prefs.context = Some(Arc::new(value.clone()));
                }
                "presence" => {
                    prefs.presence = value
                        .as_str()
                        .and_then(Presence::parse)
                        .ok_or_else(|| invalid(key, PRESENCE_EXPECTED))?;
                }
                "errors" => apply_error_prefs(&mut prefs.errors, value)?,
                "messages" => prefs.messages = prefs.messages.merge(&Messages::from_json(value)?),
                _ => {
                    return Err(SchemaError::UnknownPreference { key: key.clone() });
                }
            }
        }

        Ok(prefs)
    }

    pub fn abort_early(mut self, abort_early: bool) -> Self {
        self.abort_early = abort_early;
        self
    }

    pub fn convert(mut self, convert: bool) -> Self {
        self.convert = convert;
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(Arc::new(context));
        self
    }

    pub fn no_defaults(mut self, no_defaults: bool) -> Self {
        self.no_defaults = no_defaults;
        self
    }

    pub fn presence(mut self, presence: Presence) -> Self {
        self.presence = presence;
        self
    }

    pub fn allow_unknown(mut self, allow: bool) -> Self {
        self.allow_unknown = allow;
        self
    }

    pub fn strip_unknown(mut self, strip: bool) -> Self {
        self.strip_unknown = strip;
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn label(mut self, label: LabelMode) -> Self {
        self.errors.label = label;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.errors.language = Some(language.into());
        self
    }

    pub fn messages(mut self, messages: Messages) -> Self {
        self.messages = self.messages.merge(&messages);
        self
    }
}

fn apply_error_prefs(errors: &mut ErrorPreferences, value: &Value) -> Result<(), SchemaError> {
    let map = value.as_object().ok_or_else(|| invalid("errors", "of type object"))?;
    for (key, value) in map {
        match key.as_str() {
            "label" => {
                errors.label = match value {
                    Value::String(s) if s == "path" => LabelMode::Path,
                    Value::String(s) if s == "key" => LabelMode::Key,
                    Value::Bool(false) => LabelMode::Off,
                    _ => return Err(invalid("errors.label", "one of [path, key, false]")),
                }
            }
            "language" => {
                errors.language = Some(
                    value
                        .as_str()
                        .ok_or_else(|| invalid("errors.language", "a string"))?
                        .to_string(),
                );
            }
            "wrap" => {
                errors.wrap = match value {
                    Value::String(s) => Some(s.clone()),
                    Value::Bool(false) => None,
                    _ => return Err(invalid("errors.wrap", "a string or false")),
                }
            }
            _ => {
                return Err(SchemaError::UnknownPreference {
                    key: format!("errors.{}", key),
                })
            }
        }
    }
    Ok(())
}

fn expect_bool(key: &str, value: &Value) -> Result<bool, SchemaError> {
    value.as_bool().ok_or_else(|| invalid(key, "a boolean"))
}

fn invalid(key: &str, expected: &str) -> SchemaError {
    SchemaError::InvalidPreference {
        key: key.to_string(),
        expected: expected.to_string(),
    }
}

/// Builds a JSON object from key/value pairs; used for error contexts.
pub fn context_map<I, K>(entries: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    entries.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn presence_parse() {
        assert_eq!(Presence::parse("required"), Some(Presence::Required));
        assert_eq!(Presence::parse("forbidden"), Some(Presence::Forbidden));
        assert_eq!(Presence::parse("yes"), None);
    }

    #[test]
    fn deep_equal_compares_numbers_by_value() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(deep_equal(&json!({"a": [1, 2], "b": 2}), &json!({"b": 2.0, "a": [1, 2]})));
        assert!(!deep_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn path_label_uses_brackets_for_indices() {
        let path = vec![
            PathSegment::Key("a".into()),
            PathSegment::Index(0),
            PathSegment::Key("b".into()),
        ];
        assert_eq!(path_label(&path), "a[0].b");
        assert_eq!(path_label(&[PathSegment::Index(1)]), "[1]");
    }

    #[test]
    fn preferences_from_json() {
        let prefs = Preferences::from_json(&json!({
            "abortEarly": false,
            "presence": "required",
            "context": { "x": 1 },
            "errors": { "label": "key" }
        }))
        .unwrap();
        assert!(!prefs.abort_early);
        assert_eq!(prefs.presence, Presence::Required);
        assert_eq!(prefs.errors.label, LabelMode::Key);
        assert_eq!(prefs.context.as_deref(), Some(&json!({ "x": 1 })));
    }

    #[test]
    fn preferences_reject_unknown_keys() {
        let err = Preferences::from_json(&json!({ "foo": "bar" })).unwrap_err();
        assert_eq!(err.to_string(), "\"foo\" is not allowed");
    }

    #[test]
    fn preferences_reject_wrong_types() {
        let err = Preferences::from_json(&json!({ "convert": "yes" })).unwrap_err();
        assert_eq!(err.to_string(), "\"convert\" must be a boolean");

        let err = Preferences::from_json(&json!({ "presence": "yes" })).unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"presence\" must be one of [required, optional, forbidden]"
        );
    }

    #[test]
    fn preferences_require_object() {
        let err = Preferences::from_json(&json!(4)).unwrap_err();
        assert_eq!(err, SchemaError::OptionsNotObject);
    }
}
