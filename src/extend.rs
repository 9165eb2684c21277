//! Type capability tables and rule descriptors.
//!
//! Every schema points at a [`TypeDef`]: its family (which decides the
//! base type check and how children are validated), coercion and
//! validation hooks, named rules, casts and messages. Derived types are
//! built with [`TypeBuilder`] and delegate to their parent for anything
//! they do not define themselves.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{RuleError, SchemaError};
use crate::schema::Schema;
use crate::template::Messages;
use crate::validator::Helpers;

/// Rule implementation: returns `Ok(None)` to keep the value,
/// `Ok(Some(v))` to replace it, or an error report.
pub type RuleFn =
    Arc<dyn Fn(&Value, &RuleArgs, &Helpers<'_>) -> Result<Option<Value>, RuleError> + Send + Sync>;

/// Coercion hook run when `convert` is enabled. `None` leaves the value as is.
pub type CoerceFn = Arc<dyn Fn(&Value, &Schema) -> Option<Value> + Send + Sync>;

/// Type-level validation run after the base check and children.
pub type ValidateFn = Arc<dyn Fn(Value, &Helpers<'_>) -> Result<Value, RuleError> + Send + Sync>;

/// Converts a validated value to another representation. `None` when the
/// value cannot be converted and is kept as is.
pub type CastFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Built-in behaviour a type inherits: base check and children handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Any,
    Boolean,
    Number,
    String,
    Object,
    Array,
    Alternatives,
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Any => "any",
            Family::Boolean => "boolean",
            Family::Number => "number",
            Family::String => "string",
            Family::Object => "object",
            Family::Array => "array",
            Family::Alternatives => "alternatives",
        }
    }

    /// Whether `value` has this family's JSON type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Family::Any | Family::Alternatives => true,
            Family::Boolean => value.is_boolean(),
            Family::Number => value.is_number(),
            Family::String => value.is_string(),
            Family::Object => value.is_object(),
            Family::Array => value.is_array(),
        }
    }
}

/// A schema type's capability table.
pub struct TypeDef {
    pub(crate) name: String,
    pub(crate) family: Family,
    pub(crate) parent: Option<Arc<TypeDef>>,
    pub(crate) coerce: Option<CoerceFn>,
    pub(crate) validate: Option<ValidateFn>,
    pub(crate) rules: HashMap<String, Arc<RuleDef>>,
    pub(crate) casts: HashMap<String, CastFn>,
    pub(crate) messages: Messages,
}

impl fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDef")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TypeDef {
    pub(crate) fn new(name: &str, family: Family) -> Self {
        Self {
            name: name.to_string(),
            family,
            parent: None,
            coerce: None,
            validate: None,
            rules: HashMap::new(),
            casts: HashMap::new(),
            messages: Messages::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Looks up a rule here or in a parent type.
    pub fn rule(&self, name: &str) -> Option<&Arc<RuleDef>> {
        self.rules
            .get(name)
            .or_else(|| self.parent.as_deref().and_then(|p| p.rule(name)))
    }

    pub fn cast(&self, target: &str) -> Option<&CastFn> {
        self.casts
            .get(target)
            .or_else(|| self.parent.as_deref().and_then(|p| p.cast(target)))
    }

    /// Coercion hooks, most derived first.
    pub(crate) fn coercions(&self) -> Vec<&CoerceFn> {
        let mut hooks: Vec<&CoerceFn> = self.coerce.iter().collect();
        if let Some(parent) = &self.parent {
            hooks.extend(parent.coercions());
        }
        hooks
    }

    /// Validation hooks, base type first.
    pub(crate) fn validators(&self) -> Vec<&ValidateFn> {
        let mut hooks = self
            .parent
            .as_deref()
            .map(|p| p.validators())
            .unwrap_or_default();
        hooks.extend(self.validate.iter());
        hooks
    }

    /// Message tables, most derived first.
    pub(crate) fn message_tables(&self) -> Vec<&Messages> {
        let mut tables = vec![&self.messages];
        if let Some(parent) = &self.parent {
            tables.extend(parent.message_tables());
        }
        tables
    }
}

/// Check applied to a rule argument.
#[derive(Clone)]
pub enum ArgCheck {
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
    Schema(Schema),
}

/// Declaration of one rule argument.
#[derive(Clone)]
pub struct ArgDef {
    pub(crate) name: String,
    pub(crate) check: Option<ArgCheck>,
    /// Completes "`<name>` ..." when the check fails, e.g. `must be a number`.
    pub(crate) reason: String,
    pub(crate) allow_ref: bool,
}

impl ArgDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            check: None,
            reason: String::new(),
            allow_ref: true,
        }
    }

    pub fn assert<F>(mut self, check: F, reason: impl Into<String>) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.check = Some(ArgCheck::Predicate(Arc::new(check)));
        self.reason = reason.into();
        self
    }

    pub fn schema(mut self, schema: Schema, reason: impl Into<String>) -> Self {
        self.check = Some(ArgCheck::Schema(schema));
        self.reason = reason.into();
        self
    }

    pub fn literal_only(mut self) -> Self {
        self.allow_ref = false;
        self
    }

    /// Checks a literal or resolved argument value.
    pub(crate) fn accepts(&self, value: &Value) -> Result<bool, SchemaError> {
        match &self.check {
            None => Ok(true),
            Some(ArgCheck::Predicate(check)) => Ok(check(value)),
            Some(ArgCheck::Schema(schema)) => schema.matches(value),
        }
    }
}

/// A named rule a type supports.
#[derive(Clone)]
pub struct RuleDef {
    pub(crate) name: String,
    pub(crate) multi: bool,
    pub(crate) args: Vec<ArgDef>,
    pub(crate) validate: RuleFn,
}

impl fmt::Debug for RuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleDef")
            .field("name", &self.name)
            .field("multi", &self.multi)
            .finish()
    }
}

impl RuleDef {
    pub fn new<F>(name: impl Into<String>, validate: F) -> Self
    where
        F: Fn(&Value, &RuleArgs, &Helpers<'_>) -> Result<Option<Value>, RuleError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            multi: false,
            args: Vec::new(),
            validate: Arc::new(validate),
        }
    }

    /// Allow several instances of the rule on one schema.
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    pub fn arg(mut self, arg: ArgDef) -> Self {
        self.args.push(arg);
        self
    }

    pub(crate) fn arg_def(&self, name: &str) -> Option<&ArgDef> {
        self.args.iter().find(|a| a.name == name)
    }
}

/// Resolved arguments passed to a rule.
#[derive(Debug, Clone, Default)]
pub struct RuleArgs {
    values: Map<String, Value>,
    schemas: Vec<(String, Schema)>,
}

impl RuleArgs {
    pub(crate) fn insert_value(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub(crate) fn insert_schema(&mut self, name: &str, schema: Schema) {
        self.schemas.push((name.to_string(), schema));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// All value arguments, suitable as an error context.
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// Builds a derived type on top of an existing schema.
///
/// The resulting schema keeps the base schema's flags and rules; rules,
/// messages and hooks not defined here are looked up on the base type.
pub struct TypeBuilder {
    base: Schema,
    def: TypeDef,
    invalid_name: bool,
}

impl TypeBuilder {
    pub fn new(name: impl Into<String>, base: &Schema) -> Self {
        let parent = Arc::clone(base.def());
        let name = name.into();
        let mut def = TypeDef::new(&name, parent.family);
        def.parent = Some(parent);
        Self {
            base: base.clone(),
            def,
            invalid_name: false,
        }
    }

    pub fn rule(mut self, rule: RuleDef) -> Self {
        if rule.name.is_empty() {
            self.invalid_name = true;
        }
        self.def.rules.insert(rule.name.clone(), Arc::new(rule));
        self
    }

    pub fn messages(mut self, messages: Messages) -> Self {
        self.def.messages = self.def.messages.merge(&messages);
        self
    }

    pub fn coerce<F>(mut self, coerce: F) -> Self
    where
        F: Fn(&Value, &Schema) -> Option<Value> + Send + Sync + 'static,
    {
        self.def.coerce = Some(Arc::new(coerce));
        self
    }

    pub fn validate<F>(mut self, validate: F) -> Self
    where
        F: Fn(Value, &Helpers<'_>) -> Result<Value, RuleError> + Send + Sync + 'static,
    {
        self.def.validate = Some(Arc::new(validate));
        self
    }

    pub fn cast<F>(mut self, target: impl Into<String>, cast: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.def.casts.insert(target.into(), Arc::new(cast));
        self
    }

    /// Finish the type and return a schema of it.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::InvalidRuleName` if a rule was declared with
    /// an empty name.
    pub fn build(self) -> Result<Schema, SchemaError> {
        if self.invalid_name || self.def.name.is_empty() {
            return Err(SchemaError::InvalidRuleName);
        }
        Ok(self.base.with_def(Arc::new(self.def)))
    }
}
