//! Built-in types.
//!
//! Each constructor returns a fresh handle to a shared base schema; the
//! capability tables are built once per process. Rule helpers on
//! [`Schema`] (`min`, `max`, `pattern`, ...) attach the rule of the same
//! name from the schema's type and fail with `UnknownRule` on types that
//! do not define it.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use crate::error::{BoxError, RuleError, SchemaError};
use crate::extend::{ArgDef, Family, RuleArgs, RuleDef, TypeDef};
use crate::schema::{Arg, RuleSpec, Schema};
use crate::template::Messages;
use crate::types::{context_map, deep_equal};
use crate::validator::Helpers;

static ANY: Lazy<Schema> = Lazy::new(|| base(TypeDef::new("any", Family::Any)));
static BOOLEAN: Lazy<Schema> = Lazy::new(|| base(boolean_def()));
static NUMBER: Lazy<Schema> = Lazy::new(|| base(number_def()));
static STRING: Lazy<Schema> = Lazy::new(|| base(string_def()));
static OBJECT: Lazy<Schema> = Lazy::new(|| base(object_def()));
static ARRAY: Lazy<Schema> = Lazy::new(|| base(array_def()));
static ALTERNATIVES: Lazy<Schema> = Lazy::new(|| base(TypeDef::new("alternatives", Family::Alternatives)));

fn base(def: TypeDef) -> Schema {
    Schema::from_def(Arc::new(def))
}

/// Accepts any value.
pub fn any() -> Schema {
    ANY.clone()
}

/// Booleans; `"true"` and `"false"` are converted.
pub fn boolean() -> Schema {
    BOOLEAN.clone()
}

/// Numbers; numeric strings are converted.
pub fn number() -> Schema {
    NUMBER.clone()
}

pub fn string() -> Schema {
    STRING.clone()
}

/// Objects; a JSON object string is parsed when converting.
pub fn object() -> Schema {
    OBJECT.clone()
}

/// Arrays; a JSON array string is parsed when converting.
pub fn array() -> Schema {
    ARRAY.clone()
}

/// A value matching one (or all, or exactly one) of several schemas.
pub fn alternatives() -> Schema {
    ALTERNATIVES.clone()
}

fn messages(pairs: &[(&str, &str)]) -> Messages {
    Messages::from_pairs(pairs.iter().copied()).unwrap_or_default()
}

fn limit_arg(reason: &str, check: fn(&Value) -> bool) -> ArgDef {
    ArgDef::new("limit").assert(check, reason)
}

fn is_count(value: &Value) -> bool {
    value.as_u64().is_some()
}

/// A rule comparing a measure of the value against the `limit` argument.
fn compare(name: &str, code: &'static str, measure: fn(&Value) -> Option<f64>, pass: fn(f64, f64) -> bool) -> RuleDef {
    let check: fn(&Value) -> bool = if code.starts_with("number.") {
        Value::is_number
    } else {
        is_count
    };
    let reason = if code.starts_with("number.") {
        "must be a number"
    } else {
        "must be a positive integer"
    };
    RuleDef::new(name, move |value: &Value, args: &RuleArgs, helpers: &Helpers<'_>| {
        let (Some(limit), Some(actual)) = (args.number("limit"), measure(value)) else {
            return Ok(None);
        };
        if pass(actual, limit) {
            return Ok(None);
        }
        let local = context_map([("limit", args.get("limit").cloned().unwrap_or(Value::Null))]);
        Err(helpers.error(code, local))
    })
    .arg(limit_arg(reason, check))
}

// === boolean ===

fn boolean_def() -> TypeDef {
    let mut def = TypeDef::new("boolean", Family::Boolean);
    def.coerce = Some(Arc::new(|value: &Value, _: &Schema| {
        let text = value.as_str()?.trim().to_ascii_lowercase();
        match text.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        }
    }));
    def.messages = messages(&[("boolean.base", "{{#label}} must be a boolean")]);
    def
}

// === number ===

fn number_def() -> TypeDef {
    let mut def = TypeDef::new("number", Family::Number);
    def.coerce = Some(Arc::new(|value: &Value, _: &Schema| parse_number(value.as_str()?)));

    let as_number: fn(&Value) -> Option<f64> = Value::as_f64;
    for rule in [
        compare("min", "number.min", as_number, |a, l| a >= l),
        compare("max", "number.max", as_number, |a, l| a <= l),
        compare("greater", "number.greater", as_number, |a, l| a > l),
        compare("less", "number.less", as_number, |a, l| a < l),
        RuleDef::new("integer", |value: &Value, _: &RuleArgs, helpers: &Helpers<'_>| {
            match value.as_f64() {
                Some(n) if n.fract() != 0.0 => Err(helpers.error("number.integer", Map::new())),
                _ => Ok(None),
            }
        }),
        RuleDef::new("multiple", |value: &Value, args: &RuleArgs, helpers: &Helpers<'_>| {
            let (Some(base), Some(n)) = (args.number("base"), value.as_f64()) else {
                return Ok(None);
            };
            if (n / base).fract() == 0.0 {
                return Ok(None);
            }
            let local = context_map([("multiple", args.get("base").cloned().unwrap_or(Value::Null))]);
            Err(helpers.error("number.multiple", local))
        })
        .arg(ArgDef::new("base").assert(
            |v| v.as_f64().map_or(false, |n| n > 0.0),
            "must be a positive number",
        )),
    ] {
        def.rules.insert(rule.name.clone(), Arc::new(rule));
    }

    def.casts.insert(
        "string".to_string(),
        Arc::new(|value: &Value| value.is_number().then(|| Value::String(value.to_string()))),
    );
    def.messages = messages(&[
        ("number.base", "{{#label}} must be a number"),
        ("number.min", "{{#label}} must be greater than or equal to {{#limit}}"),
        ("number.max", "{{#label}} must be less than or equal to {{#limit}}"),
        ("number.greater", "{{#label}} must be greater than {{#limit}}"),
        ("number.less", "{{#label}} must be less than {{#limit}}"),
        ("number.integer", "{{#label}} must be an integer"),
        ("number.multiple", "{{#label}} must be a multiple of {{#multiple}}"),
    ]);
    def
}

fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::from(n));
    }
    let n: f64 = text.parse().ok()?;
    if !n.is_finite() {
        return None;
    }
    serde_json::Number::from_f64(n).map(Value::Number)
}

// === string ===

static GUID: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(concat!(
        r"^([\[{(]?)[0-9a-f]{8}([:-]?)[0-9a-f]{4}([:-]?)([0-9a-f])[0-9a-f]{3}",
        r"([:-]?)([0-9a-f])[0-9a-f]{3}([:-]?)[0-9a-f]{12}([\]})]?)$",
    ))
    .case_insensitive(true)
    .build()
    .expect("guid pattern compiles")
});

const GUID_VERSIONS: &[(&str, char)] = &[
    ("uuidv1", '1'),
    ("uuidv2", '2'),
    ("uuidv3", '3'),
    ("uuidv4", '4'),
    ("uuidv5", '5'),
];

/// Version and variant nibbles of a GUID. Brackets must pair up and the
/// separator, once chosen, may only be repeated or left out.
fn guid_nibbles(text: &str) -> Option<(char, char)> {
    let caps = GUID.captures(text)?;
    let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());

    let closing = match group(1) {
        "{" => "}",
        "[" => "]",
        "(" => ")",
        _ => "",
    };
    if group(8) != closing {
        return None;
    }

    let separator = group(2);
    if [3, 5, 7].iter().any(|&i| !group(i).is_empty() && group(i) != separator) {
        return None;
    }

    Some((group(4).chars().next()?, group(6).chars().next()?))
}

fn string_def() -> TypeDef {
    let mut def = TypeDef::new("string", Family::String);

    let length: fn(&Value) -> Option<f64> = |v| v.as_str().map(|s| s.chars().count() as f64);
    for rule in [
        compare("min", "string.min", length, |a, l| a >= l),
        compare("max", "string.max", length, |a, l| a <= l),
        compare("length", "string.length", length, |a, l| a == l),
        RuleDef::new("pattern", |value: &Value, args: &RuleArgs, helpers: &Helpers<'_>| {
            let source = args.get("regex").and_then(Value::as_str).unwrap_or_default();
            let regex = Regex::new(source).map_err(|e| {
                RuleError::Schema(SchemaError::InvalidPattern {
                    pattern: source.to_string(),
                    message: e.to_string(),
                })
            })?;
            check_pattern(&regex, source, value, helpers)
        })
        .multi()
        .arg(ArgDef::new("regex").assert(Value::is_string, "must be a string").literal_only()),
        RuleDef::new("guid", |value: &Value, args: &RuleArgs, helpers: &Helpers<'_>| {
            let Some(text) = value.as_str() else {
                return Ok(None);
            };
            let accepted = match (guid_nibbles(text), args.get("versions").and_then(Value::as_array)) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some((version, variant)), Some(allowed)) => {
                    "89ab".contains(variant.to_ascii_lowercase())
                        && allowed.iter().filter_map(Value::as_str).any(|name| {
                            GUID_VERSIONS
                                .iter()
                                .any(|(known, nibble)| *known == name && *nibble == version)
                        })
                }
            };
            if accepted {
                Ok(None)
            } else {
                Err(helpers.error("string.guid", Map::new()))
            }
        })
        .arg(
            ArgDef::new("versions")
                .assert(
                    |v| {
                        v.as_array().map_or(false, |a| {
                            a.iter().all(|name| {
                                GUID_VERSIONS.iter().any(|(known, _)| Some(*known) == name.as_str())
                            })
                        })
                    },
                    "must be a list of uuidv1, uuidv2, uuidv3, uuidv4, uuidv5",
                )
                .literal_only(),
        ),
    ] {
        def.rules.insert(rule.name.clone(), Arc::new(rule));
    }

    def.casts.insert(
        "number".to_string(),
        Arc::new(|value: &Value| value.as_str().and_then(parse_number)),
    );
    def.messages = messages(&[
        ("string.base", "{{#label}} must be a string"),
        ("string.min", "{{#label}} length must be at least {{#limit}} characters long"),
        ("string.max", "{{#label}} length must be less than or equal to {{#limit}} characters long"),
        ("string.length", "{{#label}} length must be {{#limit}} characters long"),
        (
            "string.pattern.base",
            "{{#label}} with value {{#value}} fails to match the required pattern: {{#regex}}",
        ),
        ("string.guid", "{{#label}} must be a valid GUID"),
    ]);
    def
}

fn check_pattern(regex: &Regex, source: &str, value: &Value, helpers: &Helpers<'_>) -> Result<Option<Value>, RuleError> {
    match value.as_str() {
        Some(text) if !regex.is_match(text) => {
            let local = context_map([("regex", Value::String(source.to_string()))]);
            Err(helpers.error("string.pattern.base", local))
        }
        _ => Ok(None),
    }
}

// === object ===

fn object_def() -> TypeDef {
    let mut def = TypeDef::new("object", Family::Object);
    def.coerce = Some(Arc::new(|value: &Value, _: &Schema| parse_json(value, '{')));

    let size: fn(&Value) -> Option<f64> = |v| v.as_object().map(|m| m.len() as f64);
    for rule in [
        compare("min", "object.min", size, |a, l| a >= l),
        compare("max", "object.max", size, |a, l| a <= l),
        compare("length", "object.length", size, |a, l| a == l),
    ] {
        def.rules.insert(rule.name.clone(), Arc::new(rule));
    }

    def.casts.insert(
        "map".to_string(),
        Arc::new(|value: &Value| {
            let map = value.as_object()?;
            let entries = map
                .iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), v.clone()]))
                .collect();
            Some(Value::Array(entries))
        }),
    );
    def.messages = messages(&[
        ("object.min", "{{#label}} must have at least {{#limit}} keys"),
        ("object.max", "{{#label}} must have less than or equal to {{#limit}} keys"),
        ("object.length", "{{#label}} must have {{#limit}} keys"),
    ]);
    def
}

fn parse_json(value: &Value, open: char) -> Option<Value> {
    let text = value.as_str()?.trim();
    if !text.starts_with(open) {
        return None;
    }
    serde_json::from_str(text).ok()
}

// === array ===

fn array_def() -> TypeDef {
    let mut def = TypeDef::new("array", Family::Array);
    def.coerce = Some(Arc::new(|value: &Value, _: &Schema| parse_json(value, '[')));

    let size: fn(&Value) -> Option<f64> = |v| v.as_array().map(|a| a.len() as f64);
    for rule in [
        compare("min", "array.min", size, |a, l| a >= l),
        compare("max", "array.max", size, |a, l| a <= l),
        compare("length", "array.length", size, |a, l| a == l),
        RuleDef::new("has", |value: &Value, args: &RuleArgs, helpers: &Helpers<'_>| {
            let (Some(schema), Some(items)) = (args.schema("schema"), value.as_array()) else {
                return Ok(None);
            };
            for index in 0..items.len() {
                if helpers.matches_item(schema, value, index)? {
                    return Ok(None);
                }
            }
            match schema.get_label() {
                Some(label) => Err(helpers.error(
                    "array.hasKnown",
                    context_map([("patternLabel", Value::String(label.to_string()))]),
                )),
                None => Err(helpers.error("array.hasUnknown", Map::new())),
            }
        })
        .multi()
        .arg(ArgDef::new("schema").literal_only()),
    ] {
        def.rules.insert(rule.name.clone(), Arc::new(rule));
    }

    def.casts.insert(
        "set".to_string(),
        Arc::new(|value: &Value| {
            let items = value.as_array()?;
            let mut unique: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                if !unique.iter().any(|u| deep_equal(u, item)) {
                    unique.push(item.clone());
                }
            }
            Some(Value::Array(unique))
        }),
    );
    def.messages = messages(&[
        ("array.min", "{{#label}} must contain at least {{#limit}} items"),
        ("array.max", "{{#label}} must contain less than or equal to {{#limit}} items"),
        ("array.length", "{{#label}} must contain {{#limit}} items"),
        (
            "array.hasKnown",
            "{{#label}} does not contain at least one required match for type {{#patternLabel}}",
        ),
        ("array.hasUnknown", "{{#label}} does not contain at least one required match"),
    ]);
    def
}

// === Rule helpers ===

impl Schema {
    /// Lower bound: value for numbers, length for strings and arrays, key
    /// count for objects.
    ///
    /// # Errors
    ///
    /// Fails on types without a `min` rule and on a malformed limit.
    pub fn min(&self, limit: impl Into<Arg>) -> Result<Schema, SchemaError> {
        self.add_rule(RuleSpec::new("min").arg("limit", limit))
    }

    pub fn max(&self, limit: impl Into<Arg>) -> Result<Schema, SchemaError> {
        self.add_rule(RuleSpec::new("max").arg("limit", limit))
    }

    pub fn length(&self, limit: impl Into<Arg>) -> Result<Schema, SchemaError> {
        self.add_rule(RuleSpec::new("length").arg("limit", limit))
    }

    pub fn greater(&self, limit: impl Into<Arg>) -> Result<Schema, SchemaError> {
        self.add_rule(RuleSpec::new("greater").arg("limit", limit))
    }

    pub fn less(&self, limit: impl Into<Arg>) -> Result<Schema, SchemaError> {
        self.add_rule(RuleSpec::new("less").arg("limit", limit))
    }

    pub fn integer(&self) -> Result<Schema, SchemaError> {
        self.add_rule(RuleSpec::new("integer"))
    }

    pub fn multiple(&self, base: impl Into<Arg>) -> Result<Schema, SchemaError> {
        self.add_rule(RuleSpec::new("multiple").arg("base", base))
    }

    /// Require strings to match `pattern`. Several patterns may be added.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::InvalidPattern` for a malformed expression.
    pub fn pattern(&self, pattern: &str) -> Result<Schema, SchemaError> {
        if self.def().rule("pattern").is_none() {
            return Err(SchemaError::UnknownRule {
                name: "pattern".to_string(),
                type_name: self.type_name().to_string(),
            });
        }
        let regex = Regex::new(pattern).map_err(|e| SchemaError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        let source = pattern.to_string();
        self.add_rule(
            RuleSpec::new("pattern")
                .arg("regex", pattern)
                .operate(Arc::new(move |value: &Value, _: &RuleArgs, helpers: &Helpers<'_>| {
                    check_pattern(&regex, &source, value, helpers)
                })),
        )
    }

    /// Require a GUID, optionally limited to the given versions
    /// (`"uuidv4"`, ...).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown version name.
    pub fn guid(&self, versions: &[&str]) -> Result<Schema, SchemaError> {
        let mut spec = RuleSpec::new("guid");
        if let Some(position) = versions
            .iter()
            .position(|v| !GUID_VERSIONS.iter().any(|(known, _)| known == v))
        {
            let names: Vec<&str> = GUID_VERSIONS.iter().map(|(name, _)| *name).collect();
            return Err(SchemaError::InvalidArgument {
                name: format!("version at position {}", position),
                reason: format!("must be one of {}", names.join(", ")),
            });
        }
        if !versions.is_empty() {
            let versions: Vec<Value> = versions.iter().map(|v| Value::from(*v)).collect();
            spec = spec.arg("versions", Value::Array(versions));
        }
        self.add_rule(spec)
    }

    /// Require at least one array item matching `schema`.
    pub fn has(&self, schema: &Schema) -> Result<Schema, SchemaError> {
        self.add_rule(RuleSpec::new("has").arg("schema", schema.clone()))
    }

    /// Ad-hoc rule. An error returned by `check` is reported as
    /// `any.custom` with the error message in the context.
    pub fn custom<F>(&self, check: F) -> Result<Schema, SchemaError>
    where
        F: Fn(&Value, &Helpers<'_>) -> Result<Option<Value>, BoxError> + Send + Sync + 'static,
    {
        self.add_rule(RuleSpec::new("custom").multi().operate(Arc::new(
            move |value: &Value, _: &RuleArgs, helpers: &Helpers<'_>| {
                check(value, helpers).map_err(|err| {
                    helpers.error("any.custom", context_map([("error", Value::String(err.to_string()))]))
                })
            },
        )))
    }
}
