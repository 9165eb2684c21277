//! Schemas from JSON descriptions.
//!
//! A description is a JSON object naming a type plus the modifiers to
//! apply, in a fixed order: flags, allowed/denied values, rules, keys and
//! patterns, items, alternatives, conditions, preferences and messages.
//!
//! ```json
//! {
//!   "type": "object",
//!   "keys": {
//!     "kind": { "type": "string", "valid": ["a", "b"] },
//!     "size": {
//!       "type": "number",
//!       "flags": { "presence": "required" },
//!       "rules": [{ "name": "min", "args": { "limit": 1 } }],
//!       "whens": [{ "ref": "kind", "is": "a", "then": { "type": "number", "rules": [{ "name": "max", "args": { "limit": 5 } }] } }]
//!     }
//!   }
//! }
//! ```
//!
//! Anywhere a value is expected, `{"$ref": "path"}` is a reference; any
//! other JSON that is not a description object is compiled as a literal.

use serde_json::{Map, Value};
use tracing::debug;

use crate::catalog;
use crate::compile::compile;
use crate::condition::{Condition, Matcher, SwitchCase, WhenOptions};
use crate::error::SchemaError;
use crate::reference::Reference;
use crate::schema::{Arg, DefaultValue, IntoSchema, MatchMode, RuleSpec, Schema};
use crate::template::Messages;
use crate::types::Presence;
use crate::values::Allowed;

/// Build a schema from its JSON description.
///
/// # Errors
///
/// Returns `SchemaError::InvalidDescription` for malformed descriptions
/// (with the JSON path of the offending entry), or the construction error
/// a modifier raised.
pub fn build(description: &Value) -> Result<Schema, SchemaError> {
    let schema = Builder { path: Vec::new() }.schema(description)?;
    debug!(schema = %schema.type_name(), "schema built from description");
    Ok(schema)
}

const KNOWN_KEYS: &[&str] = &[
    "type", "flags", "allow", "valid", "invalid", "rules", "keys", "patterns", "items", "ordered", "matches",
    "whens", "prefs", "messages",
];

struct Builder {
    path: Vec<String>,
}

impl Builder {
    fn error(&self, message: impl Into<String>) -> SchemaError {
        let path = if self.path.is_empty() {
            "/".to_string()
        } else {
            self.path.join("/")
        };
        SchemaError::InvalidDescription {
            path,
            message: message.into(),
        }
    }

    fn nested<T>(&mut self, segment: impl ToString, f: impl FnOnce(&mut Self) -> Result<T, SchemaError>) -> Result<T, SchemaError> {
        self.path.push(segment.to_string());
        let result = f(self);
        self.path.pop();
        result
    }

    fn schema(&mut self, description: &Value) -> Result<Schema, SchemaError> {
        if let Some(reference) = self.reference(description)? {
            return Ok(reference.into_schema());
        }
        let Some(map) = description.as_object().filter(|m| m.contains_key("type")) else {
            return Ok(compile(description));
        };
        if let Some(unknown) = map.keys().find(|k| !KNOWN_KEYS.contains(&k.as_str())) {
            return Err(self.error(format!("unknown entry \"{}\"", unknown)));
        }

        let type_name = map.get("type").and_then(Value::as_str).unwrap_or_default();
        let mut schema = match type_name {
            "any" => catalog::any(),
            "boolean" => catalog::boolean(),
            "number" => catalog::number(),
            "string" => catalog::string(),
            "object" => catalog::object(),
            "array" => catalog::array(),
            "alternatives" => catalog::alternatives(),
            other => return Err(self.error(format!("unknown type \"{}\"", other))),
        };

        if let Some(flags) = map.get("flags") {
            schema = self.nested("flags", |b| b.flags(schema, flags))?;
        }
        for (key, valid, invalid) in [("allow", false, false), ("valid", true, false), ("invalid", false, true)] {
            let Some(entries) = map.get(key) else {
                continue;
            };
            let values = self.nested(key, |b| b.allowed(entries))?;
            schema = match (valid, invalid) {
                (_, true) => schema.invalid(values)?,
                (true, _) => schema.valid(values)?,
                _ => schema.allow(values)?,
            };
        }
        if let Some(rules) = map.get("rules") {
            schema = self.nested("rules", |b| b.rules(schema, rules))?;
        }
        if let Some(keys) = map.get("keys") {
            let keys = self.nested("keys", |b| b.keys(keys))?;
            schema = schema.keys(keys)?;
        }
        if let Some(patterns) = map.get("patterns") {
            schema = self.nested("patterns", |b| b.patterns(schema, patterns))?;
        }
        if let Some(items) = map.get("items") {
            let items = self.nested("items", |b| b.list(items))?;
            schema = schema.items(items)?;
        }
        if let Some(ordered) = map.get("ordered") {
            let ordered = self.nested("ordered", |b| b.list(ordered))?;
            schema = schema.ordered(ordered)?;
        }
        if let Some(matches) = map.get("matches") {
            schema = self.nested("matches", |b| b.matches(schema, matches))?;
        }
        if let Some(whens) = map.get("whens") {
            schema = self.nested("whens", |b| b.whens(schema, whens))?;
        }
        if let Some(prefs) = map.get("prefs") {
            schema = schema.prefs(prefs.clone())?;
        }
        if let Some(messages) = map.get("messages") {
            schema = schema.messages(Messages::from_json(messages)?);
        }
        Ok(schema)
    }

    fn flags(&mut self, schema: Schema, flags: &Value) -> Result<Schema, SchemaError> {
        let map = flags.as_object().ok_or_else(|| self.error("must be an object"))?;
        let mut schema = schema;
        for (name, value) in map {
            schema = match name.as_str() {
                "presence" => {
                    let presence = value
                        .as_str()
                        .and_then(Presence::parse)
                        .ok_or_else(|| self.error("presence must be one of [required, optional, forbidden]"))?;
                    schema.set_presence(presence)
                }
                "result" => match value.as_str() {
                    Some("strip") => schema.strip(),
                    Some("raw") => schema.raw(),
                    _ => return Err(self.error("result must be one of [strip, raw]")),
                },
                "label" => schema.label(self.string(name, value)?),
                "id" => schema.id(self.string(name, value)?)?,
                "cast" => schema.cast(&self.string(name, value)?)?,
                "default" => schema.default(self.default_value(value)?),
                "failover" => schema.failover(self.default_value(value)?),
                "empty" => {
                    let empty = self.nested("empty", |b| b.schema(value))?;
                    schema.empty(empty)
                }
                "only" if self.boolean(name, value)? => schema.only(),
                "only" => schema,
                "insensitive" if self.boolean(name, value)? => schema.insensitive(),
                "insensitive" => schema,
                "single" => schema.single(self.boolean(name, value)?)?,
                "unknown" => schema.unknown(self.boolean(name, value)?)?,
                "match" => {
                    let mode = match value.as_str() {
                        Some("any") => MatchMode::Any,
                        Some("one") => MatchMode::One,
                        Some("all") => MatchMode::All,
                        _ => return Err(self.error("match must be one of [any, one, all]")),
                    };
                    schema.match_mode(mode)?
                }
                other => return Err(self.error(format!("unknown flag \"{}\"", other))),
            };
        }
        Ok(schema)
    }

    fn string(&self, name: &str, value: &Value) -> Result<String, SchemaError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.error(format!("{} must be a string", name)))
    }

    fn boolean(&self, name: &str, value: &Value) -> Result<bool, SchemaError> {
        value
            .as_bool()
            .ok_or_else(|| self.error(format!("{} must be a boolean", name)))
    }

    fn reference(&self, value: &Value) -> Result<Option<Reference>, SchemaError> {
        match value.as_object().and_then(|m| m.get("$ref")) {
            Some(Value::String(key)) => Ok(Some(Reference::new(key)?)),
            Some(_) => Err(self.error("$ref must be a string")),
            None => Ok(None),
        }
    }

    fn default_value(&self, value: &Value) -> Result<DefaultValue, SchemaError> {
        Ok(match self.reference(value)? {
            Some(reference) => DefaultValue::Ref(reference),
            None => DefaultValue::Value(value.clone()),
        })
    }

    fn allowed(&mut self, entries: &Value) -> Result<Vec<Allowed>, SchemaError> {
        let items = entries.as_array().ok_or_else(|| self.error("must be an array"))?;
        items
            .iter()
            .map(|item| {
                Ok(match self.reference(item)? {
                    Some(reference) => Allowed::Ref(reference),
                    None => Allowed::Value(item.clone()),
                })
            })
            .collect()
    }

    fn rules(&mut self, schema: Schema, rules: &Value) -> Result<Schema, SchemaError> {
        let list = rules.as_array().ok_or_else(|| self.error("must be an array"))?;
        let mut schema = schema;
        for (i, rule) in list.iter().enumerate() {
            schema = self.nested(i, |b| b.rule(schema, rule))?;
        }
        Ok(schema)
    }

    fn rule(&mut self, schema: Schema, rule: &Value) -> Result<Schema, SchemaError> {
        let name = rule
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| self.error("rule name must be a string"))?;
        let empty = Map::new();
        let args = match rule.get("args") {
            None => &empty,
            Some(args) => args.as_object().ok_or_else(|| self.error("args must be an object"))?,
        };

        match name {
            "pattern" => {
                let regex = args
                    .get("regex")
                    .and_then(Value::as_str)
                    .ok_or_else(|| self.error("regex must be a string"))?;
                schema.pattern(regex)
            }
            "has" => {
                let target = args.get("schema").ok_or_else(|| self.error("has requires a schema"))?;
                let target = self.nested("schema", |b| b.schema(target))?;
                schema.has(&target)
            }
            _ => {
                let mut spec = RuleSpec::new(name);
                for (arg, value) in args {
                    let arg_value = match self.reference(value)? {
                        Some(reference) => Arg::Ref(reference),
                        None if is_description(value) => Arg::Schema(self.nested(arg, |b| b.schema(value))?),
                        None => Arg::Value(value.clone()),
                    };
                    spec = spec.arg(arg.clone(), arg_value);
                }
                schema.add_rule(spec)
            }
        }
    }

    fn keys(&mut self, keys: &Value) -> Result<Vec<(String, Schema)>, SchemaError> {
        let map = keys.as_object().ok_or_else(|| self.error("must be an object"))?;
        map.iter()
            .map(|(key, value)| Ok((key.clone(), self.nested(key, |b| b.schema(value))?)))
            .collect()
    }

    fn patterns(&mut self, schema: Schema, patterns: &Value) -> Result<Schema, SchemaError> {
        let list = patterns.as_array().ok_or_else(|| self.error("must be an array"))?;
        let mut schema = schema;
        for (i, pattern) in list.iter().enumerate() {
            schema = self.nested(i, |b| {
                let rule = pattern.get("schema").ok_or_else(|| b.error("pattern requires a schema"))?;
                let rule = b.nested("schema", |b| b.schema(rule))?;
                match (pattern.get("regex"), pattern.get("key")) {
                    (Some(Value::String(regex)), None) => schema.key_pattern(regex, rule),
                    (None, Some(key)) => {
                        let key = b.nested("key", |b| b.schema(key))?;
                        schema.key_pattern_schema(key, rule)
                    }
                    _ => Err(b.error("pattern requires either a regex string or a key schema")),
                }
            })?;
        }
        Ok(schema)
    }

    fn list(&mut self, items: &Value) -> Result<Vec<Schema>, SchemaError> {
        let list = items.as_array().ok_or_else(|| self.error("must be an array"))?;
        list.iter()
            .enumerate()
            .map(|(i, item)| self.nested(i, |b| b.schema(item)))
            .collect()
    }

    fn matches(&mut self, schema: Schema, matches: &Value) -> Result<Schema, SchemaError> {
        let list = matches.as_array().ok_or_else(|| self.error("must be an array"))?;
        let mut schema = schema;
        for (i, item) in list.iter().enumerate() {
            schema = self.nested(i, |b| {
                if is_condition(item) {
                    let (condition, options) = b.condition(item)?;
                    schema.conditional(condition, options)
                } else {
                    schema.try_schemas([b.schema(item)?])
                }
            })?;
        }
        Ok(schema)
    }

    fn whens(&mut self, schema: Schema, whens: &Value) -> Result<Schema, SchemaError> {
        let list = whens.as_array().ok_or_else(|| self.error("must be an array"))?;
        let mut schema = schema;
        for (i, item) in list.iter().enumerate() {
            schema = self.nested(i, |b| {
                let (condition, options) = b.condition(item)?;
                schema.when(condition, options)
            })?;
        }
        Ok(schema)
    }

    fn condition(&mut self, item: &Value) -> Result<(Condition, WhenOptions), SchemaError> {
        let condition = match (item.get("ref"), item.get("schema")) {
            (Some(Value::String(key)), None) => Condition::Ref(Reference::new(key)?),
            (None, Some(subject)) => Condition::Schema(self.nested("schema", |b| b.schema(subject))?),
            _ => return Err(self.error("condition requires either a ref string or a schema")),
        };

        let mut options = WhenOptions::new();
        if let Some(is) = item.get("is") {
            options = options.is(self.matcher(is)?);
        }
        if let Some(not) = item.get("not") {
            options = options.not(self.matcher(not)?);
        }
        if let Some(then) = item.get("then") {
            options = options.then(self.nested("then", |b| b.schema(then))?);
        }
        if let Some(otherwise) = item.get("otherwise") {
            options = options.otherwise(self.nested("otherwise", |b| b.schema(otherwise))?);
        }
        if let Some(cases) = item.get("switch") {
            let list = cases.as_array().ok_or_else(|| self.error("switch must be an array"))?;
            let mut switch = Vec::with_capacity(list.len());
            for (i, case) in list.iter().enumerate() {
                switch.push(self.nested(format!("switch/{}", i), |b| b.case(case))?);
            }
            options = options.switch(switch);
        }
        if item.get("break").and_then(Value::as_bool) == Some(true) {
            options = options.break_on_match();
        }
        Ok((condition, options))
    }

    fn case(&mut self, case: &Value) -> Result<SwitchCase, SchemaError> {
        let is = case.get("is").ok_or_else(|| self.error("case requires is"))?;
        let then = case.get("then").ok_or_else(|| self.error("case requires then"))?;
        let mut built = SwitchCase::new(self.matcher(is)?, self.nested("then", |b| b.schema(then))?);
        if let Some(otherwise) = case.get("otherwise") {
            built = built.otherwise(self.nested("otherwise", |b| b.schema(otherwise))?);
        }
        Ok(built)
    }

    fn matcher(&mut self, value: &Value) -> Result<Matcher, SchemaError> {
        if let Some(reference) = self.reference(value)? {
            return Ok(Matcher::Ref(reference));
        }
        if is_description(value) {
            return Ok(Matcher::Schema(self.schema(value)?));
        }
        Ok(Matcher::Literal(value.clone()))
    }
}

fn is_description(value: &Value) -> bool {
    value.as_object().map_or(false, |m| m.contains_key("type"))
}

fn is_condition(value: &Value) -> bool {
    value
        .as_object()
        .map_or(false, |m| !m.contains_key("type") && (m.contains_key("ref") || m.contains_key("schema")))
}
