//! Schema evaluation.
//!
//! [`Schema::validate`] walks a value against a schema tree. Each node is
//! evaluated in a fixed order: conditions are folded into the node, empty
//! values are cleared, defaults and presence are applied, the value is
//! coerced, checked against the allowed and denied sets, then the type's
//! base check, children and rules run. Errors are returned up the tree; in
//! `abort_early` mode the first one stops the walk.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::error::{BoxError, ErrorReport, Fault, RuleError, SchemaError, ValidateError, ValidationError};
use crate::extend::{Family, RuleArgs};
use crate::reference::{Reference, Scope, Shadow};
use crate::schema::{Arg, DefaultValue, ErrorOverride, KeyMatcher, Match, MatchMode, Node, ResultMode, Schema};
use crate::template::{Template, CORE_MESSAGES};
use crate::types::{path_label, LabelMode, PathSegment, Preferences, Presence};
use crate::values::ValueSet;

/// Result of [`Schema::validate`].
#[derive(Debug, Clone)]
pub struct Validation {
    /// The validated (converted, defaulted) value. `None` when the value is
    /// absent or stripped.
    pub value: Option<Value>,
    pub error: Option<ValidationError>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Where in the document a node is being evaluated.
#[derive(Debug, Clone, Default)]
pub(crate) struct State<'a> {
    pub(crate) path: Vec<PathSegment>,
    /// Parent values, innermost first.
    pub(crate) ancestors: Vec<&'a Value>,
}

impl<'a> State<'a> {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    /// State of a child at `segment` inside `parent`.
    pub(crate) fn nest<'b>(&self, segment: PathSegment, parent: &'b Value) -> State<'b>
    where
        'a: 'b,
    {
        let mut path = self.path.clone();
        path.push(segment);
        let mut ancestors: Vec<&'b Value> = Vec::with_capacity(self.ancestors.len() + 1);
        ancestors.push(parent);
        ancestors.extend(self.ancestors.iter().copied());
        State { path, ancestors }
    }
}

/// Value and errors of one evaluated node.
#[derive(Debug, Clone, Default)]
pub(crate) struct Outcome {
    pub(crate) value: Option<Value>,
    pub(crate) errors: Vec<Fault>,
}

impl Outcome {
    fn new(value: Option<Value>, errors: Vec<Fault>) -> Self {
        Self { value, errors }
    }

    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

type CacheKey = (usize, String);

/// Data shared by every node of one validation run.
#[derive(Default)]
struct Mainstay {
    shadow: Shadow,
    /// Generated schemas per (node, selected branches). The base schema is
    /// kept next to its result so the node address stays unique.
    cache: HashMap<CacheKey, (Schema, Schema)>,
}

/// Evaluates schemas for one validation run.
pub(crate) struct Evaluator {
    mainstay: RefCell<Mainstay>,
}

/// What rule and type hooks see of the evaluation.
pub struct Helpers<'a> {
    schema: &'a Schema,
    prefs: &'a Preferences,
    original: Option<&'a Value>,
    value: Option<&'a Value>,
    state: &'a State<'a>,
    evaluator: &'a Evaluator,
}

impl<'a> Helpers<'a> {
    pub fn schema(&self) -> &Schema {
        self.schema
    }

    pub fn prefs(&self) -> &Preferences {
        self.prefs
    }

    /// The value as it was passed in, before conversion.
    pub fn original(&self) -> Option<&Value> {
        self.original
    }

    pub fn path(&self) -> &[PathSegment] {
        &self.state.path
    }

    /// Build an error for the current value.
    pub fn error(&self, code: &str, local: Map<String, Value>) -> RuleError {
        RuleError::Report(
            self.evaluator
                .report(self.schema, code, local, self.value, &self.state.path, self.prefs),
        )
    }

    /// Whether `schema` accepts `value` at the current location.
    ///
    /// # Errors
    ///
    /// Propagates schema errors raised while evaluating `schema`.
    pub fn matches(&self, schema: &Schema, value: &Value) -> Result<bool, SchemaError> {
        self.evaluator.matches(schema, Some(value), self.state, self.prefs)
    }

    /// Whether `schema` accepts the element at `index` of `parent`.
    pub fn matches_item(&self, schema: &Schema, parent: &Value, index: usize) -> Result<bool, SchemaError> {
        let item = parent.get(index);
        let state = self.state.nest(PathSegment::Index(index), parent);
        self.evaluator.matches(schema, item, &state, self.prefs)
    }

    /// Resolve a reference at the current location.
    pub fn resolve(&self, reference: &Reference) -> Result<Option<Value>, SchemaError> {
        self.evaluator.resolve(reference, self.value, self.state, self.prefs)
    }
}

fn context<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

impl Evaluator {
    pub(crate) fn new() -> Self {
        Self {
            mainstay: RefCell::new(Mainstay::default()),
        }
    }

    // === References and matching ===

    pub(crate) fn resolve(
        &self,
        reference: &Reference,
        value: Option<&Value>,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Result<Option<Value>, SchemaError> {
        let mainstay = self.mainstay.borrow();
        let scope = Scope {
            shadow: Some(&mainstay.shadow),
            ..Scope::new(&state.path, &state.ancestors).with_context(prefs.context.as_deref())
        };
        reference.resolve(value, &scope)
    }

    fn find(
        &self,
        set: &ValueSet,
        value: &Value,
        state: &State<'_>,
        prefs: &Preferences,
        insensitive: bool,
    ) -> Result<Option<Value>, SchemaError> {
        let mainstay = self.mainstay.borrow();
        let scope = Scope {
            shadow: Some(&mainstay.shadow),
            ..Scope::new(&state.path, &state.ancestors).with_context(prefs.context.as_deref())
        };
        set.find(value, &scope, insensitive)
    }

    fn describe(
        &self,
        set: &ValueSet,
        value: &Value,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Result<Vec<Value>, SchemaError> {
        let mainstay = self.mainstay.borrow();
        let scope = Scope {
            shadow: Some(&mainstay.shadow),
            ..Scope::new(&state.path, &state.ancestors).with_context(prefs.context.as_deref())
        };
        set.describe(Some(value), &scope)
    }

    /// Validate without keeping results: stripped values recorded while
    /// matching are discarded.
    pub(crate) fn matches(
        &self,
        schema: &Schema,
        value: Option<&Value>,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Result<bool, SchemaError> {
        let prefs = Preferences {
            abort_early: true,
            ..prefs.clone()
        };
        let snapshot = self.snapshot();
        let outcome = self.validate(schema, value, state, &prefs);
        self.restore(snapshot);
        Ok(outcome?.is_ok())
    }

    fn snapshot(&self) -> Shadow {
        self.mainstay.borrow().shadow.clone()
    }

    fn restore(&self, shadow: Shadow) {
        self.mainstay.borrow_mut().shadow = shadow;
    }

    /// Evaluate a default or failover source. The inner error is a failed
    /// producer.
    fn produce(
        &self,
        source: &DefaultValue,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Result<Result<Option<Value>, BoxError>, SchemaError> {
        Ok(match source {
            DefaultValue::Value(value) => Ok(Some(value.clone())),
            DefaultValue::Ref(reference) => Ok(self.resolve(reference, None, state, prefs)?),
            DefaultValue::Producer(producer) => producer(state.ancestors.first().copied(), prefs),
        })
    }

    // === Conditions ===

    /// Fold the node's conditions into a schema for this value. Returns
    /// the schema and the id of the selected branches.
    fn generate(
        &self,
        schema: &Schema,
        value: Option<&Value>,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Result<(Schema, String), SchemaError> {
        let node = schema.node();
        let mut ids = Vec::new();
        let mut branches = Vec::new();

        for (i, when) in node.whens.iter().enumerate() {
            let Some(branch) = when.select(i, value, self, state, prefs)? else {
                continue;
            };
            trace!(path = %path_label(&state.path), branch = %branch.id, "condition matched");
            let (selected, nested) = if branch.schema.node().whens.is_empty() {
                (branch.schema, String::new())
            } else {
                self.generate(&branch.schema, value, state, prefs)?
            };
            ids.push(if nested.is_empty() {
                branch.id
            } else {
                format!("{}({})", branch.id, nested)
            });
            branches.push(selected);
            if when.stop {
                break;
            }
        }

        let id = ids.join(",");
        let key = (Arc::as_ptr(&schema.0) as usize, id.clone());
        if prefs.cache {
            if let Some((_, cached)) = self.mainstay.borrow().cache.get(&key) {
                trace!(path = %path_label(&state.path), "condition cache hit");
                return Ok((cached.clone(), id));
            }
        }

        let mut base = node.clone();
        base.whens.clear();
        let mut generated = Schema::from_node(base);
        for branch in &branches {
            generated = generated.concat(branch)?;
        }

        if prefs.cache {
            self.mainstay
                .borrow_mut()
                .cache
                .insert(key, (schema.clone(), generated.clone()));
        }
        Ok((generated, id))
    }

    // === Evaluation ===

    pub(crate) fn validate(
        &self,
        schema: &Schema,
        value: Option<&Value>,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Result<Outcome, SchemaError> {
        let merged;
        let prefs = match &schema.node().prefs {
            Some(overrides) => {
                merged = prefs.apply(&Value::Object(overrides.clone()))?;
                &merged
            }
            None => prefs,
        };

        let generated;
        let schema = if schema.node().whens.is_empty() {
            schema
        } else {
            generated = self.generate(schema, value, state, prefs)?.0;
            &generated
        };
        let node = schema.node();
        let original = value;
        let mut errors: Vec<Fault> = Vec::new();

        let mut current = value.cloned();
        if let (Some(empty), Some(v)) = (&node.flags.empty, value) {
            if self.matches(empty, Some(v), state, prefs)? {
                trace!(path = %path_label(&state.path), "empty value cleared");
                current = None;
            }
        }

        let presence = node.flags.presence.unwrap_or(prefs.presence);
        let Some(mut value) = current else {
            if !prefs.no_defaults {
                if let Some(source) = &node.flags.default {
                    match self.produce(source, state, prefs)? {
                        Ok(Some(defaulted)) => {
                            return self.finalize(schema, Some(defaulted), errors, original, state, prefs);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            debug!(path = %path_label(&state.path), error = %err, "default producer failed");
                            let local = context([("error", Value::String(err.to_string()))]);
                            errors.push(self.report(schema, "any.default", local, None, &state.path, prefs).into());
                            return self.finalize(schema, None, errors, original, state, prefs);
                        }
                    }
                }
            }
            if presence == Presence::Required {
                errors.push(self.report(schema, "any.required", Map::new(), None, &state.path, prefs).into());
            }
            return self.finalize(schema, None, errors, original, state, prefs);
        };

        if presence == Presence::Forbidden {
            errors.push(self.report(schema, "any.unknown", Map::new(), Some(&value), &state.path, prefs).into());
            return self.finalize(schema, Some(value), errors, original, state, prefs);
        }

        if prefs.convert {
            for coerce in node.def.coercions() {
                if let Some(coerced) = coerce(&value, schema) {
                    value = coerced;
                    break;
                }
            }
        }

        // Allowed and denied values

        let insensitive = node.flags.insensitive.unwrap_or(false);
        if !node.valids.is_empty() {
            if let Some(matched) = self.find(&node.valids, &value, state, prefs, insensitive)? {
                let value = if prefs.convert { matched } else { value };
                return self.finalize(schema, Some(value), errors, original, state, prefs);
            }
            if node.flags.only == Some(true) {
                let valids = self.describe(&node.valids, &value, state, prefs)?;
                let local = context([("valids", Value::Array(valids))]);
                errors.push(self.report(schema, "any.only", local, Some(&value), &state.path, prefs).into());
                if prefs.abort_early {
                    return self.finalize(schema, Some(value), errors, original, state, prefs);
                }
            }
        }

        if !node.invalids.is_empty() && self.find(&node.invalids, &value, state, prefs, insensitive)?.is_some() {
            let invalids = self.describe(&node.invalids, &value, state, prefs)?;
            let local = context([("invalids", Value::Array(invalids))]);
            errors.push(self.report(schema, "any.invalid", local, Some(&value), &state.path, prefs).into());
            if prefs.abort_early {
                return self.finalize(schema, Some(value), errors, original, state, prefs);
            }
        }

        // Base type and children

        let family = node.def.family;
        if family == Family::Array && !value.is_array() && node.flags.single == Some(true) {
            value = Value::Array(vec![value]);
        }
        if !family.accepts(&value) {
            let code = format!("{}.base", family.name());
            errors.push(self.report(schema, &code, Map::new(), Some(&value), &state.path, prefs).into());
            return self.finalize(schema, Some(value), errors, original, state, prefs);
        }

        let children = match family {
            Family::Object => self.validate_object(schema, value, state, prefs)?,
            Family::Array => self.validate_array(schema, value, state, prefs)?,
            Family::Alternatives => self.validate_alternatives(schema, value, state, prefs)?,
            _ => Outcome::new(Some(value), Vec::new()),
        };
        if !children.is_ok() {
            errors.extend(children.errors);
            return self.finalize(schema, children.value, errors, original, state, prefs);
        }
        let Some(mut value) = children.value else {
            return self.finalize(schema, None, errors, original, state, prefs);
        };

        for hook in node.def.validators() {
            let helpers = Helpers {
                schema,
                prefs,
                original,
                value: Some(&value),
                state,
                evaluator: self,
            };
            match hook(value.clone(), &helpers) {
                Ok(updated) => value = updated,
                Err(RuleError::Report(report)) => {
                    errors.push(report.into());
                    return self.finalize(schema, Some(value), errors, original, state, prefs);
                }
                Err(RuleError::Schema(err)) => return Err(err),
            }
        }

        // Rules

        for rule in &node.rules {
            let Some(implementation) = rule.implementation() else {
                continue;
            };

            let mut args = RuleArgs::default();
            let mut failed = None;
            for (name, arg) in &rule.args {
                match arg {
                    Arg::Value(literal) => args.insert_value(name, literal.clone()),
                    Arg::Schema(nested) => args.insert_schema(name, nested.clone()),
                    Arg::Ref(reference) => {
                        let resolved = self.resolve(reference, Some(&value), state, prefs)?;
                        let arg_def = rule.def.as_ref().and_then(|d| d.arg_def(name));
                        let accepted = match (&resolved, arg_def) {
                            (Some(resolved), Some(def)) => def.accepts(resolved)?,
                            (Some(_), None) => true,
                            (None, def) => def.map_or(true, |d| d.check.is_none()),
                        };
                        if !accepted {
                            let reason = arg_def.map(|d| d.reason.clone()).unwrap_or_default();
                            failed = Some(context([
                                ("arg", Value::String(name.clone())),
                                ("ref", Value::String(reference.display())),
                                ("reason", Value::String(reason)),
                            ]));
                            break;
                        }
                        if let Some(resolved) = resolved {
                            args.insert_value(name, resolved);
                        }
                    }
                }
            }

            if let Some(local) = failed {
                errors.push(self.report(schema, "any.ref", local, Some(&value), &state.path, prefs).into());
                if prefs.abort_early {
                    break;
                }
                continue;
            }

            let result = {
                let helpers = Helpers {
                    schema,
                    prefs,
                    original,
                    value: Some(&value),
                    state,
                    evaluator: self,
                };
                implementation(&value, &args, &helpers)
            };
            match result {
                Ok(Some(updated)) => value = updated,
                Ok(None) => {}
                Err(RuleError::Report(report)) => {
                    errors.push(report.into());
                    if prefs.abort_early {
                        break;
                    }
                }
                Err(RuleError::Schema(err)) => return Err(err),
            }
        }

        self.finalize(schema, Some(value), errors, original, state, prefs)
    }

    fn finalize(
        &self,
        schema: &Schema,
        value: Option<Value>,
        errors: Vec<Fault>,
        original: Option<&Value>,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Result<Outcome, SchemaError> {
        let flags = &schema.node().flags;
        let mut value = value;
        let mut errors = errors;

        if !errors.is_empty() {
            if let Some(source) = &flags.failover {
                match self.produce(source, state, prefs)? {
                    Ok(substitute) => {
                        debug!(path = %path_label(&state.path), dropped = errors.len(), "failover applied");
                        value = substitute;
                        errors.clear();
                    }
                    Err(err) => {
                        let local = context([("error", Value::String(err.to_string()))]);
                        errors = vec![self
                            .report(schema, "any.failover", local, value.as_ref(), &state.path, prefs)
                            .into()];
                    }
                }
            }
        }

        if !errors.is_empty() {
            match &flags.error {
                Some(ErrorOverride::Error(custom)) => errors = vec![Fault::Custom(Arc::clone(custom))],
                Some(ErrorOverride::Map(map)) => {
                    errors = map(&errors);
                    if errors.is_empty() {
                        return Err(SchemaError::EmptyErrorOverride);
                    }
                }
                None => {}
            }
        }

        if errors.is_empty() {
            if let (Some(target), Some(current)) = (&flags.cast, &value) {
                if let Some(cast) = schema.def().cast(target).and_then(|cast| cast(current)) {
                    value = Some(cast);
                }
            }
        }

        if let Some(mode) = flags.result {
            if let Some(current) = &value {
                self.mainstay.borrow_mut().shadow.set(&state.path, current.clone());
            }
            value = match mode {
                ResultMode::Strip => None,
                ResultMode::Raw => original.cloned(),
            };
        }

        Ok(Outcome::new(value, errors))
    }

    // === Objects ===

    fn validate_object(
        &self,
        schema: &Schema,
        value: Value,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Result<Outcome, SchemaError> {
        let node = schema.node();
        let terms = &node.terms;
        if terms.keys.is_none() && terms.patterns.is_empty() {
            return Ok(Outcome::new(Some(value), Vec::new()));
        }

        let mut target = value;
        let mut errors = Vec::new();
        let mut unprocessed: Vec<String> = match &target {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };

        for child in terms.keys.iter().flatten() {
            unprocessed.retain(|k| k != &child.key);
            let (outcome, present) = {
                let item = target.get(child.key.as_str());
                let child_state = state.nest(PathSegment::Key(child.key.clone()), &target);
                (self.validate(&child.schema, item, &child_state, prefs)?, item.is_some())
            };
            if !outcome.is_ok() {
                errors.extend(outcome.errors);
                if prefs.abort_early {
                    return Ok(Outcome::new(Some(target), errors));
                }
                continue;
            }
            store(&mut target, &child.key, outcome.value, present, child.schema.is_strip());
        }

        if !terms.patterns.is_empty() {
            for key in unprocessed.clone() {
                for pattern in &terms.patterns {
                    let matched = match &pattern.matcher {
                        KeyMatcher::Regex(regex) => regex.is_match(&key),
                        KeyMatcher::Schema(key_schema) => {
                            let key_value = Value::String(key.clone());
                            self.matches(key_schema, Some(&key_value), state, prefs)?
                        }
                    };
                    if !matched {
                        continue;
                    }

                    unprocessed.retain(|k| k != &key);
                    let (outcome, present) = {
                        let item = target.get(key.as_str());
                        let child_state = state.nest(PathSegment::Key(key.clone()), &target);
                        (self.validate(&pattern.rule, item, &child_state, prefs)?, item.is_some())
                    };
                    if !outcome.is_ok() {
                        errors.extend(outcome.errors);
                        if prefs.abort_early {
                            return Ok(Outcome::new(Some(target), errors));
                        }
                    } else {
                        store(&mut target, &key, outcome.value, present, pattern.rule.is_strip());
                    }
                    break;
                }
            }
        }

        if !unprocessed.is_empty() {
            if prefs.strip_unknown && node.flags.unknown.is_none() {
                if let Value::Object(map) = &mut target {
                    for key in &unprocessed {
                        map.shift_remove(key);
                    }
                }
            } else if !node.flags.unknown.unwrap_or(prefs.allow_unknown) {
                for key in &unprocessed {
                    let mut path = state.path.clone();
                    path.push(PathSegment::Key(key.clone()));
                    let local = context([("child", Value::String(key.clone()))]);
                    let label = self.derived_label(&path, prefs);
                    let report =
                        self.build_report(node, "object.unknown", local, target.get(key.as_str()), &path, label, prefs);
                    errors.push(report.into());
                    if prefs.abort_early {
                        break;
                    }
                }
            }
        }

        Ok(Outcome::new(Some(target), errors))
    }

    // === Arrays ===

    fn validate_array(
        &self,
        schema: &Schema,
        value: Value,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Result<Outcome, SchemaError> {
        let node = schema.node();
        let terms = &node.terms;
        if terms.items.is_empty() && terms.ordered.is_empty() {
            return Ok(Outcome::new(Some(value), Vec::new()));
        }

        let mut exclusions = Vec::new();
        let mut requireds = Vec::new();
        let mut inclusions = Vec::new();
        for item in &terms.items {
            match item.presence() {
                Some(Presence::Forbidden) => exclusions.push(item.optional()),
                Some(Presence::Required) => requireds.push(item.clone()),
                _ => inclusions.push(item.clone()),
            }
        }
        // Inclusions first, then every required schema.
        let patterns: Vec<(&Schema, Option<usize>)> = inclusions
            .iter()
            .map(|s| (s, None))
            .chain(requireds.iter().enumerate().map(|(j, s)| (s, Some(j))))
            .collect();

        let items = match &value {
            Value::Array(items) => items.clone(),
            _ => Vec::new(),
        };
        let mut remaining: Vec<usize> = (0..requireds.len()).collect();
        let mut ordereds: Vec<&Schema> = terms.ordered.iter().collect();
        let mut output: Vec<Value> = Vec::with_capacity(items.len());
        let mut errors: Vec<Fault> = Vec::new();

        'items: for (i, item) in items.iter().enumerate() {
            let item_state = state.nest(PathSegment::Index(i), &value);
            let item_path = item_state.path.as_slice();

            for exclusion in &exclusions {
                if !self.matches(exclusion, Some(item), &item_state, prefs)? {
                    continue;
                }
                let local = context([("pos", Value::from(i)), ("value", item.clone())]);
                errors.push(self.report(schema, "array.excludes", local, Some(item), item_path, prefs).into());
                if prefs.abort_early {
                    return Ok(Outcome::new(Some(value), errors));
                }
                if !ordereds.is_empty() {
                    ordereds.remove(0);
                }
                continue 'items;
            }

            if !terms.ordered.is_empty() {
                if !ordereds.is_empty() {
                    let ordered = ordereds.remove(0);
                    let outcome = self.validate(ordered, Some(item), &item_state, prefs)?;
                    if outcome.is_ok() {
                        if !ordered.is_strip() {
                            output.push(outcome.value.unwrap_or(Value::Null));
                        }
                    } else {
                        errors.extend(outcome.errors);
                        if prefs.abort_early {
                            return Ok(Outcome::new(Some(value), errors));
                        }
                    }
                    continue;
                }
                if terms.items.is_empty() {
                    let local = context([("pos", Value::from(i)), ("limit", Value::from(terms.ordered.len()))]);
                    errors.push(self.report(schema, "array.orderedLength", local, Some(item), item_path, prefs).into());
                    if prefs.abort_early {
                        return Ok(Outcome::new(Some(value), errors));
                    }
                    break;
                }
            }

            let mut checks: Vec<Option<Outcome>> = vec![None; requireds.len()];
            for position in 0..remaining.len() {
                let j = remaining[position];
                let snapshot = self.snapshot();
                let outcome = self.validate(&requireds[j], Some(item), &item_state, prefs)?;
                if outcome.is_ok() {
                    remaining.remove(position);
                    if !requireds[j].is_strip() {
                        output.push(outcome.value.unwrap_or(Value::Null));
                    }
                    continue 'items;
                }
                self.restore(snapshot);
                checks[j] = Some(outcome);
            }

            let mut matched = false;
            for (inclusion, required) in &patterns {
                let cached = required.and_then(|j| checks[j].take());
                let outcome = match cached {
                    Some(outcome) => outcome,
                    None => {
                        let snapshot = self.snapshot();
                        let outcome = self.validate(inclusion, Some(item), &item_state, prefs)?;
                        if outcome.is_ok() {
                            if !inclusion.is_strip() {
                                output.push(outcome.value.unwrap_or(Value::Null));
                            }
                            matched = true;
                            break;
                        }
                        self.restore(snapshot);
                        outcome
                    }
                };

                if patterns.len() == 1 {
                    errors.extend(outcome.errors);
                    if prefs.abort_early {
                        return Ok(Outcome::new(Some(value), errors));
                    }
                    continue 'items;
                }
            }

            if !matched {
                let local = context([("pos", Value::from(i)), ("value", item.clone())]);
                errors.push(self.report(schema, "array.includes", local, Some(item), item_path, prefs).into());
                if prefs.abort_early {
                    return Ok(Outcome::new(Some(value), errors));
                }
            }
        }

        let missing: Vec<&Schema> = remaining
            .iter()
            .map(|&j| &requireds[j])
            .chain(ordereds.iter().copied().filter(|s| s.presence() == Some(Presence::Required)))
            .collect();
        if !missing.is_empty() {
            errors.push(self.missed(schema, &missing, &value, state, prefs).into());
        }

        if !errors.is_empty() {
            return Ok(Outcome::new(Some(value), errors));
        }

        // Trailing ordered items contribute their defaults.
        let mut defaults = Vec::new();
        for ordered in ordereds.iter().rev() {
            let outcome = self.validate(ordered, None, state, prefs)?;
            match outcome.value {
                Some(defaulted) => defaults.push(defaulted),
                None if defaults.is_empty() => {}
                None => defaults.push(Value::Null),
            }
        }
        output.extend(defaults.into_iter().rev());

        Ok(Outcome::new(Some(Value::Array(output)), errors))
    }

    fn missed(
        &self,
        schema: &Schema,
        missing: &[&Schema],
        value: &Value,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> ErrorReport {
        let known: Vec<Value> = missing
            .iter()
            .filter_map(|s| s.get_label().map(Value::from))
            .collect();
        let unknown = missing.len() - known.len();

        let (code, local) = match (known.is_empty(), unknown) {
            (false, 0) => ("array.includesRequiredKnowns", context([("knownMisses", Value::Array(known))])),
            (false, _) => (
                "array.includesRequiredBoth",
                context([
                    ("knownMisses", Value::Array(known)),
                    ("unknownMisses", Value::from(unknown)),
                ]),
            ),
            (true, _) => (
                "array.includesRequiredUnknowns",
                context([("unknownMisses", Value::from(unknown))]),
            ),
        };
        self.report(schema, code, local, Some(value), &state.path, prefs)
    }

    // === Alternatives ===

    fn validate_alternatives(
        &self,
        schema: &Schema,
        value: Value,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Result<Outcome, SchemaError> {
        let node = schema.node();
        let matches = &node.terms.matches;
        let mode = node.flags.match_mode.unwrap_or_default();

        if mode != MatchMode::Any {
            let mut matched = Vec::new();
            let mut failed = Vec::new();
            for item in matches {
                let Match::Schema(candidate) = item else {
                    continue;
                };
                let snapshot = self.snapshot();
                let outcome = self.validate(candidate, Some(&value), state, prefs)?;
                if outcome.is_ok() {
                    matched.push(outcome.value);
                } else {
                    self.restore(snapshot);
                    failed.push(details(&outcome.errors));
                }
            }

            if matched.is_empty() {
                let local = context([("details", Value::Array(failed))]);
                return Ok(self.alternatives_error(schema, "alternatives.any", local, &value, state, prefs));
            }
            if mode == MatchMode::One {
                if matched.len() == 1 {
                    return Ok(Outcome::new(matched.pop().flatten(), Vec::new()));
                }
                return Ok(self.alternatives_error(schema, "alternatives.one", Map::new(), &value, state, prefs));
            }
            if !failed.is_empty() {
                let local = context([("details", Value::Array(failed))]);
                return Ok(self.alternatives_error(schema, "alternatives.all", local, &value, state, prefs));
            }
            let merged = if any_object(schema) {
                matched.into_iter().flatten().reduce(deep_merge)
            } else {
                matched.pop().flatten()
            };
            return Ok(Outcome::new(merged, Vec::new()));
        }

        let mut failures: Vec<(&Schema, Vec<Fault>)> = Vec::new();
        for (i, item) in matches.iter().enumerate() {
            match item {
                Match::Schema(candidate) => {
                    let snapshot = self.snapshot();
                    let outcome = self.validate(candidate, Some(&value), state, prefs)?;
                    if outcome.is_ok() {
                        return Ok(outcome);
                    }
                    self.restore(snapshot);
                    failures.push((candidate, outcome.errors));
                }
                Match::Conditional(when) => {
                    if let Some(branch) = when.select(i, Some(&value), self, state, prefs)? {
                        return self.validate(&branch.schema, Some(&value), state, prefs);
                    }
                }
            }
        }

        Ok(self.unmatched(schema, failures, &value, state, prefs))
    }

    fn alternatives_error(
        &self,
        schema: &Schema,
        code: &str,
        local: Map<String, Value>,
        value: &Value,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Outcome {
        let report = self.report(schema, code, local, Some(value), &state.path, prefs);
        Outcome::new(Some(value.clone()), vec![report.into()])
    }

    /// Pick the most useful error when no alternative matched.
    fn unmatched(
        &self,
        schema: &Schema,
        failures: Vec<(&Schema, Vec<Fault>)>,
        value: &Value,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Outcome {
        if failures.is_empty() {
            return self.alternatives_error(schema, "alternatives.any", Map::new(), value, state, prefs);
        }
        if failures.len() == 1 {
            let errors = failures.into_iter().next().map(|(_, e)| e).unwrap_or_default();
            return Outcome::new(Some(value.clone()), errors);
        }

        let mut types: Vec<Value> = Vec::new();
        let mut complex: Vec<&Fault> = Vec::new();
        let mut analyzable = true;
        for (_, reports) in &failures {
            let [fault] = reports.as_slice() else {
                analyzable = false;
                break;
            };
            let Some(report) = fault.report() else {
                analyzable = false;
                break;
            };
            if report.path.len() != state.path.len() {
                complex.push(fault);
                continue;
            }
            if report.code == "any.only" {
                if let Some(Value::Array(valids)) = report.context_value("valids") {
                    for valid in valids {
                        if !types.contains(valid) {
                            types.push(valid.clone());
                        }
                    }
                }
                continue;
            }
            match report.code.split_once('.') {
                Some((base, "base")) => {
                    let base = Value::String(base.to_string());
                    if !types.contains(&base) {
                        types.push(base);
                    }
                }
                _ => complex.push(fault),
            }
        }

        if analyzable {
            if complex.is_empty() {
                let local = context([("types", Value::Array(types))]);
                return self.alternatives_error(schema, "alternatives.types", local, value, state, prefs);
            }
            if let [single] = complex.as_slice() {
                return Outcome::new(Some(value.clone()), vec![(*single).clone()]);
            }
        }

        let all: Vec<Fault> = failures.into_iter().flat_map(|(_, e)| e).collect();
        let Value::Object(local) = details(&all) else {
            return self.alternatives_error(schema, "alternatives.match", Map::new(), value, state, prefs);
        };
        self.alternatives_error(schema, "alternatives.match", local, value, state, prefs)
    }

    // === Error reports ===

    pub(crate) fn report(
        &self,
        schema: &Schema,
        code: &str,
        local: Map<String, Value>,
        value: Option<&Value>,
        path: &[PathSegment],
        prefs: &Preferences,
    ) -> ErrorReport {
        let label = match schema.get_label() {
            Some(label) => Some(label.to_string()),
            None => self.derived_label(path, prefs),
        };
        self.build_report(schema.node(), code, local, value, path, label, prefs)
    }

    fn derived_label(&self, path: &[PathSegment], prefs: &Preferences) -> Option<String> {
        match (prefs.errors.label, path.last()) {
            (LabelMode::Off, _) => None,
            (LabelMode::Path, Some(_)) => Some(path_label(path)),
            (LabelMode::Key, Some(last)) => Some(last.as_key()),
            (_, None) => Some("value".to_string()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_report(
        &self,
        node: &Node,
        code: &str,
        local: Map<String, Value>,
        value: Option<&Value>,
        path: &[PathSegment],
        label: Option<String>,
        prefs: &Preferences,
    ) -> ErrorReport {
        let mut context = local;
        if let Some(label) = &label {
            context.insert("label".to_string(), Value::String(label.clone()));
        }
        if let Some(value) = value {
            context.entry("value").or_insert_with(|| value.clone());
        }
        if let Some(last) = path.last() {
            let key = match last {
                PathSegment::Key(key) => Value::String(key.clone()),
                PathSegment::Index(i) => Value::from(*i),
            };
            context.insert("key".to_string(), key);
        }

        let message = match template(node, code, prefs) {
            Some(template) => {
                let rendered = template.render(&context, prefs.errors.wrap.as_deref());
                if label.is_none() {
                    rendered.trim().to_string()
                } else {
                    rendered
                }
            }
            None => code.to_string(),
        };

        ErrorReport {
            message,
            path: path.to_vec(),
            code: code.to_string(),
            context,
        }
    }
}

/// Message lookup: caller preferences, the schema, its type chain, then
/// the engine defaults.
fn template<'t>(node: &'t Node, code: &str, prefs: &'t Preferences) -> Option<&'t Template> {
    let language = prefs.errors.language.as_deref();
    prefs
        .messages
        .lookup(code, language)
        .or_else(|| node.messages.as_ref().and_then(|m| m.lookup(code, language)))
        .or_else(|| {
            node.def
                .message_tables()
                .into_iter()
                .find_map(|table| table.lookup(code, language))
        })
        .or_else(|| CORE_MESSAGES.lookup(code, language))
}

/// Write a child result back into its parent object.
fn store(target: &mut Value, key: &str, value: Option<Value>, present: bool, strip: bool) {
    let Value::Object(map) = target else {
        return;
    };
    match value {
        _ if strip => {
            map.shift_remove(key);
        }
        None if present => {
            map.shift_remove(key);
        }
        None => {}
        Some(value) => {
            map.insert(key.to_string(), value);
        }
    }
}

/// `{message, details}` for a failed attempt.
fn details(faults: &[Fault]) -> Value {
    let reports: Vec<&ErrorReport> = faults.iter().filter_map(Fault::report).collect();
    let message = reports
        .iter()
        .map(|r| r.message.as_str())
        .collect::<Vec<_>>()
        .join(". ");
    let details: Vec<Value> = reports
        .iter()
        .filter_map(|r| serde_json::to_value(r).ok())
        .collect();
    let mut out = Map::new();
    out.insert("message".to_string(), Value::String(message));
    out.insert("details".to_string(), Value::Array(details));
    Value::Object(out)
}

fn any_object(schema: &Schema) -> bool {
    schema.node().terms.matches.iter().any(|m| match m {
        Match::Schema(s) => match s.def().family() {
            Family::Object => true,
            Family::Alternatives => any_object(s),
            _ => false,
        },
        Match::Conditional(_) => false,
    })
}

fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target), Value::Object(source)) => {
            for (key, value) in source {
                let merged = match target.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                target.insert(key, merged);
            }
            Value::Object(target)
        }
        (_, source) => source,
    }
}

// === Entry points ===

impl Schema {
    /// Validate `value` with default preferences.
    ///
    /// # Errors
    ///
    /// Returns a `SchemaError` when the schema cannot be evaluated (for
    /// example a reference above the document root). Invalid input is
    /// reported through [`Validation::error`].
    pub fn validate(&self, value: &Value) -> Result<Validation, SchemaError> {
        self.validate_with(Some(value), &Preferences::default())
    }

    /// Validate a possibly absent value with the given preferences.
    pub fn validate_with(&self, value: Option<&Value>, prefs: &Preferences) -> Result<Validation, SchemaError> {
        let evaluator = Evaluator::new();
        let outcome = evaluator.validate(self, value, &State::root(), prefs)?;
        let error = ValidationError::from_faults(outcome.errors);
        debug!(
            schema = %self.type_name(),
            valid = error.is_none(),
            "validation finished"
        );
        Ok(Validation {
            value: outcome.value,
            error,
        })
    }

    /// Validate and return the sanitized value, failing on invalid input.
    ///
    /// # Errors
    ///
    /// Returns `ValidateError::Invalid` for invalid input and
    /// `ValidateError::Schema` when the schema cannot be evaluated.
    pub fn attempt(&self, value: &Value, prefs: &Preferences) -> Result<Option<Value>, ValidateError> {
        let validation = self.validate_with(Some(value), prefs)?;
        match validation.error {
            Some(error) => Err(ValidateError::Invalid(error)),
            None => Ok(validation.value),
        }
    }

    /// Whether the schema accepts `value` with default preferences.
    pub fn matches(&self, value: &Value) -> Result<bool, SchemaError> {
        let evaluator = Evaluator::new();
        evaluator.matches(self, Some(value), &State::root(), &Preferences::default())
    }
}
