//! Message templates and lookup tables keyed by error code.
//!
//! Templates use `{{#name}}` (or `{#name}`) to interpolate entries of an
//! error's context. `\{` produces a literal brace. The `label` entry is
//! wrapped with the configured quote characters.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::error::SchemaError;

const DEFAULT_LANGUAGE: &str = "";

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Var(String),
}

/// A parsed message template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    /// Parse a template source string.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::InvalidTemplate` if the source contains a NUL
    /// character.
    pub fn parse(source: &str) -> Result<Self, SchemaError> {
        if source.contains('\u{0}') {
            return Err(SchemaError::InvalidTemplate);
        }

        let mut parts = Vec::new();
        let mut text = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '\\' if matches!(chars.peek(), Some((_, '{')) | Some((_, '}'))) => {
                    if let Some((_, escaped)) = chars.next() {
                        text.push(escaped);
                    }
                }
                '{' => {
                    let rest = &source[i..];
                    let (open, close) = if rest.starts_with("{{") {
                        ("{{", "}}")
                    } else {
                        ("{", "}")
                    };
                    match rest[open.len()..].find(close) {
                        Some(end) => {
                            let name = rest[open.len()..open.len() + end].trim();
                            if !text.is_empty() {
                                parts.push(Part::Text(std::mem::take(&mut text)));
                            }
                            parts.push(Part::Var(name.trim_start_matches('#').to_string()));
                            let consumed = open.len() + end + close.len();
                            while chars.peek().map(|(j, _)| *j < i + consumed).unwrap_or(false) {
                                chars.next();
                            }
                        }
                        // Unterminated braces are dropped
                        None => break,
                    }
                }
                _ => text.push(c),
            }
        }

        if !text.is_empty() {
            parts.push(Part::Text(text));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the template against an error context.
    pub fn render(&self, context: &Map<String, Value>, wrap: Option<&str>) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Var(name) => {
                    let Some(value) = context.get(name) else {
                        continue;
                    };
                    let rendered = display_value(value);
                    match (name.as_str(), wrap) {
                        ("label", Some(quote)) => {
                            out.push_str(quote);
                            out.push_str(&rendered);
                            out.push_str(quote);
                        }
                        _ => out.push_str(&rendered),
                    }
                }
            }
        }
        out
    }
}

/// Formats a context value for messages: strings unquoted, arrays as `[a, b]`.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(display_value).collect::<Vec<_>>().join(", ")
        ),
        other => other.to_string(),
    }
}

type Table = HashMap<String, Arc<Template>>;

/// Message tables per language. The unnamed language is the fallback.
#[derive(Debug, Clone, Default)]
pub struct Messages {
    languages: Arc<HashMap<String, Table>>,
}

impl Messages {
    /// Build a default-language table from `(code, template)` pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut table = Table::new();
        for (code, source) in pairs {
            table.insert(code.to_string(), Arc::new(Template::parse(source)?));
        }
        let mut languages = HashMap::new();
        languages.insert(DEFAULT_LANGUAGE.to_string(), table);
        Ok(Self {
            languages: Arc::new(languages),
        })
    }

    /// Parse messages from JSON.
    ///
    /// Accepts `{code: template}` for the default language, or
    /// `{language: {code: template}}` for localized tables; both forms may
    /// be mixed.
    pub fn from_json(value: &Value) -> Result<Self, SchemaError> {
        let map = value.as_object().ok_or(SchemaError::OptionsNotObject)?;
        let mut languages: HashMap<String, Table> = HashMap::new();

        for (code, entry) in map {
            match entry {
                Value::String(source) => {
                    languages
                        .entry(DEFAULT_LANGUAGE.to_string())
                        .or_default()
                        .insert(code.clone(), Arc::new(Template::parse(source)?));
                }
                Value::Object(localized) => {
                    let table = languages.entry(code.clone()).or_default();
                    for (inner, source) in localized {
                        let source = source
                            .as_str()
                            .ok_or_else(|| SchemaError::InvalidMessage { code: inner.clone() })?;
                        table.insert(inner.clone(), Arc::new(Template::parse(source)?));
                    }
                }
                _ => return Err(SchemaError::InvalidMessage { code: code.clone() }),
            }
        }

        Ok(Self {
            languages: Arc::new(languages),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.languages.values().all(|t| t.is_empty())
    }

    /// Returns a new table where entries of `other` replace ours.
    pub fn merge(&self, other: &Messages) -> Messages {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut languages = (*self.languages).clone();
        for (language, table) in other.languages.iter() {
            let target = languages.entry(language.clone()).or_default();
            for (code, template) in table {
                target.insert(code.clone(), Arc::clone(template));
            }
        }
        Messages {
            languages: Arc::new(languages),
        }
    }

    /// Find a template for `code`, preferring the requested language.
    pub fn lookup(&self, code: &str, language: Option<&str>) -> Option<&Template> {
        if let Some(language) = language {
            if let Some(found) = self.languages.get(language).and_then(|t| t.get(code)) {
                return Some(found);
            }
        }
        self.languages
            .get(DEFAULT_LANGUAGE)
            .and_then(|t| t.get(code))
            .map(|t| t.as_ref())
    }
}

/// Messages for codes raised by the engine itself.
pub(crate) static CORE_MESSAGES: Lazy<Messages> = Lazy::new(|| {
    let pairs = [
        ("any.required", "{{#label}} is required"),
        ("any.unknown", "{{#label}} is not allowed"),
        ("any.invalid", "{{#label}} contains an invalid value"),
        ("any.only", "{{#label}} must be one of {{#valids}}"),
        ("any.default", "{{#label}} threw an error when running default method"),
        ("any.failover", "{{#label}} threw an error when running failover method"),
        ("any.custom", "{{#label}} failed custom validation because {{#error}}"),
        ("any.ref", "{{#label}} {{#arg}} references {{#ref}} which {{#reason}}"),
        ("alternatives.any", "{{#label}} does not match any of the allowed types"),
        ("alternatives.all", "{{#label}} does not match all of the required types"),
        ("alternatives.one", "{{#label}} matches more than one allowed type"),
        ("alternatives.types", "{{#label}} must be one of {{#types}}"),
        ("alternatives.match", "{{#label}} does not match any of the allowed types"),
        ("object.base", "{{#label}} must be of type object"),
        ("object.unknown", "{{#label}} is not allowed"),
        ("array.base", "{{#label}} must be an array"),
        ("array.includes", "{{#label}} does not match any of the allowed types"),
        ("array.excludes", "{{#label}} contains an excluded value"),
        ("array.includesRequiredKnowns", "{{#label}} does not contain {{#knownMisses}}"),
        (
            "array.includesRequiredUnknowns",
            "{{#label}} does not contain {{#unknownMisses}} required value(s)",
        ),
        (
            "array.includesRequiredBoth",
            "{{#label}} does not contain {{#knownMisses}} and {{#unknownMisses}} other required value(s)",
        ),
        ("array.orderedLength", "{{#label}} must contain at most {{#limit}} items"),
    ];
    Messages::from_pairs(pairs).unwrap_or_default()
});

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_variables_and_escapes() {
        let template = Template::parse("foo {raw} \\{esc\\}{").unwrap();
        assert_eq!(template.parts[0], Part::Text("foo ".into()));
        assert_eq!(template.parts[1], Part::Var("raw".into()));
        assert_eq!(template.parts[2], Part::Text(" {esc}".into()));
    }

    #[test]
    fn rejects_nul_characters() {
        assert_eq!(Template::parse("\u{0}"), Err(SchemaError::InvalidTemplate));
    }

    #[test]
    fn renders_label_wrapped_and_arrays() {
        let template = Template::parse("{{#label}} must be one of {{#valids}}").unwrap();
        let rendered = template.render(
            &context(json!({ "label": "a", "valids": ["ref:b", 5] })),
            Some("\""),
        );
        assert_eq!(rendered, "\"a\" must be one of [ref:b, 5]");
    }

    #[test]
    fn missing_variables_render_empty() {
        let template = Template::parse("foo {raw} bar").unwrap();
        assert_eq!(template.render(&Map::new(), None), "foo  bar");
    }

    #[test]
    fn localized_lookup_falls_back_to_default() {
        let messages = Messages::from_json(&json!({
            "root": "base",
            "english": { "specific.message": "specific" }
        }))
        .unwrap();
        assert_eq!(
            messages.lookup("specific.message", Some("english")).unwrap().source(),
            "specific"
        );
        assert_eq!(messages.lookup("root", Some("english")).unwrap().source(), "base");
        assert!(messages.lookup("specific.message", None).is_none());
    }

    #[test]
    fn rejects_non_string_messages() {
        let err = Messages::from_json(&json!({ "specific.message": [] })).unwrap_err();
        assert_eq!(err.to_string(), "Invalid message for specific.message");

        let err = Messages::from_json(&json!({ "english": { "x.y": true } })).unwrap_err();
        assert_eq!(err.to_string(), "Invalid message for x.y");
    }

    #[test]
    fn merge_prefers_other() {
        let a = Messages::from_pairs([("a.b", "one")]).unwrap();
        let b = Messages::from_pairs([("a.b", "two")]).unwrap();
        assert_eq!(a.merge(&b).lookup("a.b", None).unwrap().source(), "two");
    }

    #[test]
    fn core_messages_cover_required() {
        assert!(CORE_MESSAGES.lookup("any.required", None).is_some());
    }
}
