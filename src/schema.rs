//! Schema nodes and the modifier algebra.
//!
//! A [`Schema`] is an immutable, cheaply clonable handle to a node. Every
//! modifier returns a new schema (or the same handle when the change is a
//! no-op); published nodes are never mutated, so a schema can appear in
//! many trees and be validated from many threads at once.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};

use crate::catalog;
use crate::condition::{Condition, When, WhenOptions};
use crate::error::{BoxError, CustomError, Fault, SchemaError};
use crate::extend::{Family, RuleDef, RuleFn, TypeDef};
use crate::graph;
use crate::reference::Reference;
use crate::template::Messages;
use crate::types::{Preferences, Presence};
use crate::values::{parse_allowed, Allowed, Entry, ValueSet};

/// Produces a default from the parent value (if any) and the preferences.
pub type DefaultFn =
    Arc<dyn Fn(Option<&Value>, &Preferences) -> Result<Option<Value>, BoxError> + Send + Sync>;

/// Rewrites a node's error list.
pub type ErrorMapFn = Arc<dyn Fn(&[Fault]) -> Vec<Fault> + Send + Sync>;

/// Source of a default or failover value.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Ref(Reference),
    Producer(DefaultFn),
}

impl From<Value> for DefaultValue {
    fn from(value: Value) -> Self {
        DefaultValue::Value(value)
    }
}

impl From<Reference> for DefaultValue {
    fn from(reference: Reference) -> Self {
        DefaultValue::Ref(reference)
    }
}

impl From<&str> for DefaultValue {
    fn from(value: &str) -> Self {
        DefaultValue::Value(Value::from(value))
    }
}

impl From<i32> for DefaultValue {
    fn from(value: i32) -> Self {
        DefaultValue::Value(Value::from(value))
    }
}

impl From<i64> for DefaultValue {
    fn from(value: i64) -> Self {
        DefaultValue::Value(Value::from(value))
    }
}

impl From<bool> for DefaultValue {
    fn from(value: bool) -> Self {
        DefaultValue::Value(Value::from(value))
    }
}

/// Replacement for a node's validation errors.
#[derive(Clone)]
pub enum ErrorOverride {
    Error(CustomError),
    Map(ErrorMapFn),
}

/// What a successful node contributes to its parent's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    /// Omit the value from the output.
    Strip,
    /// Output the original input instead of the converted value.
    Raw,
}

/// How alternatives combine their matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// First success wins.
    #[default]
    Any,
    /// Exactly one must match.
    One,
    /// Every alternative must match.
    All,
}

#[derive(Clone, Default)]
pub(crate) struct Flags {
    pub(crate) presence: Option<Presence>,
    pub(crate) result: Option<ResultMode>,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) failover: Option<DefaultValue>,
    pub(crate) empty: Option<Schema>,
    pub(crate) error: Option<ErrorOverride>,
    pub(crate) id: Option<String>,
    pub(crate) label: Option<String>,
    pub(crate) only: Option<bool>,
    pub(crate) insensitive: Option<bool>,
    pub(crate) cast: Option<String>,
    pub(crate) single: Option<bool>,
    pub(crate) unknown: Option<bool>,
    pub(crate) match_mode: Option<MatchMode>,
}

fn take<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
    if other.is_some() {
        slot.clone_from(other);
    }
}

impl Flags {
    /// Set flags of `other` replace ours; `empty` schemas concatenate.
    fn overlay(&mut self, other: &Flags) -> Result<(), SchemaError> {
        take(&mut self.presence, &other.presence);
        take(&mut self.result, &other.result);
        take(&mut self.default, &other.default);
        take(&mut self.failover, &other.failover);
        take(&mut self.error, &other.error);
        take(&mut self.id, &other.id);
        take(&mut self.label, &other.label);
        take(&mut self.only, &other.only);
        take(&mut self.insensitive, &other.insensitive);
        take(&mut self.cast, &other.cast);
        take(&mut self.single, &other.single);
        take(&mut self.unknown, &other.unknown);
        take(&mut self.match_mode, &other.match_mode);
        if let Some(empty) = &other.empty {
            self.empty = Some(match &self.empty {
                Some(mine) => mine.concat(empty)?,
                None => empty.clone(),
            });
        }
        Ok(())
    }
}

/// A rule argument as given to [`Schema::add_rule`].
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Ref(Reference),
    Schema(Schema),
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<Reference> for Arg {
    fn from(reference: Reference) -> Self {
        Arg::Ref(reference)
    }
}

impl From<Schema> for Arg {
    fn from(schema: Schema) -> Self {
        Arg::Schema(schema)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Value(Value::from(value))
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Value(Value::from(value))
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Value(Value::from(value))
    }
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        Arg::Value(Value::from(value))
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Value(Value::from(value))
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Value(Value::from(value))
    }
}

/// A rule instance to attach with [`Schema::add_rule`].
#[derive(Clone)]
pub struct RuleSpec {
    name: String,
    args: Vec<(String, Arg)>,
    operate: Option<RuleFn>,
    multi: bool,
}

impl RuleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            operate: None,
            multi: false,
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }

    /// Implementation used instead of (or when there is no) type rule.
    pub fn operate(mut self, operate: RuleFn) -> Self {
        self.operate = Some(operate);
        self
    }

    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }
}

#[derive(Clone)]
pub(crate) struct Rule {
    pub(crate) name: String,
    pub(crate) args: Vec<(String, Arg)>,
    pub(crate) def: Option<Arc<RuleDef>>,
    pub(crate) operate: Option<RuleFn>,
    pub(crate) multi: bool,
}

impl Rule {
    pub(crate) fn implementation(&self) -> Option<&RuleFn> {
        self.operate
            .as_ref()
            .or_else(|| self.def.as_ref().map(|d| &d.validate))
    }
}

#[derive(Clone)]
pub(crate) struct Child {
    pub(crate) key: String,
    pub(crate) schema: Schema,
}

#[derive(Clone)]
pub(crate) enum KeyMatcher {
    Regex(Regex),
    Schema(Schema),
}

#[derive(Clone)]
pub(crate) struct KeyPattern {
    pub(crate) matcher: KeyMatcher,
    pub(crate) rule: Schema,
}

#[derive(Clone)]
pub(crate) enum Match {
    Schema(Schema),
    Conditional(When),
}

/// Named collections of nested schemas.
#[derive(Clone, Default)]
pub(crate) struct Terms {
    /// `None` accepts any keys; `Some(vec![])` accepts none.
    pub(crate) keys: Option<Vec<Child>>,
    pub(crate) patterns: Vec<KeyPattern>,
    pub(crate) items: Vec<Schema>,
    pub(crate) ordered: Vec<Schema>,
    pub(crate) matches: Vec<Match>,
}

#[derive(Clone)]
pub(crate) struct Node {
    pub(crate) def: Arc<TypeDef>,
    pub(crate) flags: Flags,
    pub(crate) rules: Vec<Rule>,
    pub(crate) valids: ValueSet,
    pub(crate) invalids: ValueSet,
    pub(crate) terms: Terms,
    pub(crate) whens: Vec<When>,
    pub(crate) prefs: Option<Map<String, Value>>,
    pub(crate) messages: Option<Messages>,
    /// `(levels up, first key)` of every value reference reachable from
    /// this node, relative to the node's own value.
    pub(crate) refs: Vec<(usize, String)>,
}

impl Node {
    /// Recompute `refs` and the evaluation order of object keys.
    pub(crate) fn rebuild(&mut self) -> Result<(), SchemaError> {
        if let Some(children) = &mut self.terms.keys {
            let deps: Vec<(String, Vec<String>)> = children
                .iter()
                .map(|c| (c.key.clone(), c.schema.sibling_refs()))
                .collect();
            let order = graph::order(&deps)?;
            let sorted: Vec<Child> = order.into_iter().map(|i| children[i].clone()).collect();
            *children = sorted;
        }
        self.refresh_refs();
        Ok(())
    }

    pub(crate) fn refresh_refs(&mut self) {
        let mut refs = RefCollector::default();

        for reference in self.valids.references().chain(self.invalids.references()) {
            refs.reference(reference);
        }
        for rule in &self.rules {
            for (_, arg) in &rule.args {
                match arg {
                    Arg::Ref(reference) => refs.reference(reference),
                    Arg::Schema(schema) => refs.schema(schema, 1),
                    Arg::Value(_) => {}
                }
            }
        }
        for flag in [&self.flags.default, &self.flags.failover].into_iter().flatten() {
            if let DefaultValue::Ref(reference) = flag {
                refs.reference(reference);
            }
        }
        if let Some(empty) = &self.flags.empty {
            refs.schema(empty, 0);
        }
        for when in &self.whens {
            refs.when(when);
        }
        for child in self.terms.keys.iter().flatten() {
            refs.schema(&child.schema, 1);
        }
        for pattern in &self.terms.patterns {
            if let KeyMatcher::Schema(schema) = &pattern.matcher {
                refs.schema(schema, 1);
            }
            refs.schema(&pattern.rule, 1);
        }
        for item in self.terms.items.iter().chain(&self.terms.ordered) {
            refs.schema(item, 1);
        }
        for matched in &self.terms.matches {
            match matched {
                Match::Schema(schema) => refs.schema(schema, 0),
                Match::Conditional(when) => refs.when(when),
            }
        }

        self.refs = refs.0;
    }
}

#[derive(Default)]
struct RefCollector(Vec<(usize, String)>);

impl RefCollector {
    fn push(&mut self, entry: (usize, String)) {
        if !self.0.contains(&entry) {
            self.0.push(entry);
        }
    }

    fn reference(&mut self, reference: &Reference) {
        if let Some(dep) = reference.dependency() {
            self.push(dep);
        }
    }

    /// Adds a nested schema's references; `shift` is how many levels below
    /// this node the nested schema's value sits.
    fn schema(&mut self, schema: &Schema, shift: usize) {
        for (ancestor, root) in &schema.0.refs {
            if *ancestor > shift {
                self.push((ancestor - shift, root.clone()));
            }
        }
    }

    fn when(&mut self, when: &When) {
        if let Some(reference) = when.subject_ref() {
            self.reference(reference);
        }
        for schema in when.schemas() {
            self.schema(schema, 0);
        }
    }
}

/// Anything usable where a schema is expected. Literals compile to
/// schemas that only accept them.
pub trait IntoSchema {
    fn into_schema(self) -> Schema;
}

impl IntoSchema for Schema {
    fn into_schema(self) -> Schema {
        self
    }
}

impl IntoSchema for &Schema {
    fn into_schema(self) -> Schema {
        self.clone()
    }
}

impl IntoSchema for Value {
    fn into_schema(self) -> Schema {
        crate::compile::compile(&self)
    }
}

impl IntoSchema for Reference {
    fn into_schema(self) -> Schema {
        Schema::only_values(vec![Entry::Ref(self)])
    }
}

impl IntoSchema for &str {
    fn into_schema(self) -> Schema {
        Value::from(self).into_schema()
    }
}

impl IntoSchema for i32 {
    fn into_schema(self) -> Schema {
        Value::from(self).into_schema()
    }
}

impl IntoSchema for i64 {
    fn into_schema(self) -> Schema {
        Value::from(self).into_schema()
    }
}

impl IntoSchema for f64 {
    fn into_schema(self) -> Schema {
        Value::from(self).into_schema()
    }
}

impl IntoSchema for bool {
    fn into_schema(self) -> Schema {
        Value::from(self).into_schema()
    }
}

/// A compiled validation schema.
#[derive(Clone)]
pub struct Schema(pub(crate) Arc<Node>);

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("type", &self.type_name())
            .field("rules", &self.rule_names())
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SetKind {
    Valids,
    Invalids,
}

impl Schema {
    pub(crate) fn from_def(def: Arc<TypeDef>) -> Self {
        Schema(Arc::new(Node {
            def,
            flags: Flags::default(),
            rules: Vec::new(),
            valids: ValueSet::default(),
            invalids: ValueSet::default(),
            terms: Terms::default(),
            whens: Vec::new(),
            prefs: None,
            messages: None,
            refs: Vec::new(),
        }))
    }

    pub(crate) fn from_node(node: Node) -> Self {
        Schema(Arc::new(node))
    }

    /// An `any` schema accepting only the given entries.
    pub(crate) fn only_values(entries: Vec<Entry>) -> Self {
        let mut node = (*catalog::any().0).clone();
        for entry in entries {
            node.valids.add(entry);
        }
        node.flags.only = Some(true);
        node.refresh_refs();
        Schema::from_node(node)
    }

    pub(crate) fn node(&self) -> &Node {
        &self.0
    }

    fn node_clone(&self) -> Node {
        (*self.0).clone()
    }

    fn mutate(&self, f: impl FnOnce(&mut Node)) -> Schema {
        let mut node = self.node_clone();
        f(&mut node);
        Schema::from_node(node)
    }

    fn mutate_rebuild(&self, f: impl FnOnce(&mut Node) -> Result<(), SchemaError>) -> Result<Schema, SchemaError> {
        let mut node = self.node_clone();
        f(&mut node)?;
        node.rebuild()?;
        Ok(Schema::from_node(node))
    }

    pub(crate) fn with_def(&self, def: Arc<TypeDef>) -> Schema {
        self.mutate(|node| node.def = def)
    }

    /// True when both handles point at the same node.
    pub fn ptr_eq(a: &Schema, b: &Schema) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub fn type_name(&self) -> &str {
        &self.0.def.name
    }

    pub fn def(&self) -> &Arc<TypeDef> {
        &self.0.def
    }

    pub fn presence(&self) -> Option<Presence> {
        self.0.flags.presence
    }

    pub fn get_label(&self) -> Option<&str> {
        self.0.flags.label.as_deref()
    }

    pub fn get_id(&self) -> Option<&str> {
        self.0.flags.id.as_deref()
    }

    pub fn is_strip(&self) -> bool {
        self.0.flags.result == Some(ResultMode::Strip)
    }

    pub fn valids(&self) -> &ValueSet {
        &self.0.valids
    }

    pub fn invalids(&self) -> &ValueSet {
        &self.0.invalids
    }

    /// Names of the attached rules, in evaluation order.
    pub fn rule_names(&self) -> Vec<&str> {
        self.0.rules.iter().map(|r| r.name.as_str()).collect()
    }

    /// Object keys in evaluation order.
    pub fn key_names(&self) -> Vec<&str> {
        self.0
            .terms
            .keys
            .iter()
            .flatten()
            .map(|c| c.key.as_str())
            .collect()
    }

    pub(crate) fn refs(&self) -> &[(usize, String)] {
        &self.0.refs
    }

    /// Keys of the enclosing object this schema reads.
    pub(crate) fn sibling_refs(&self) -> Vec<String> {
        self.0
            .refs
            .iter()
            .filter(|(ancestor, _)| *ancestor == 1)
            .map(|(_, root)| root.clone())
            .collect()
    }

    fn expect_family(&self, family: Family, method: &str) -> Result<(), SchemaError> {
        if self.0.def.family == family {
            Ok(())
        } else {
            Err(SchemaError::UnsupportedMethod {
                method: method.to_string(),
                type_name: self.type_name().to_string(),
            })
        }
    }

    // === Allowed and denied values ===

    /// Add values that are always accepted.
    ///
    /// # Errors
    ///
    /// Fails on an absent value or a misplaced `Override`.
    pub fn allow<I, A>(&self, values: I) -> Result<Schema, SchemaError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Allowed>,
    {
        self.set_values(values.into_iter().map(Into::into).collect(), SetKind::Valids, false)
    }

    /// Add accepted values and reject everything else.
    pub fn valid<I, A>(&self, values: I) -> Result<Schema, SchemaError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Allowed>,
    {
        self.set_values(values.into_iter().map(Into::into).collect(), SetKind::Valids, true)
    }

    /// Add rejected values.
    ///
    /// # Errors
    ///
    /// Besides the argument errors of [`Schema::allow`], fails when the
    /// value is the last member of a `valid()` set.
    pub fn invalid<I, A>(&self, values: I) -> Result<Schema, SchemaError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Allowed>,
    {
        self.set_values(values.into_iter().map(Into::into).collect(), SetKind::Invalids, false)
    }

    /// Accept only the values added with `allow`/`valid`.
    pub fn only(&self) -> Schema {
        if self.0.flags.only == Some(true) {
            return self.clone();
        }
        self.mutate(|node| node.flags.only = Some(true))
    }

    fn set_values(&self, values: Vec<Allowed>, kind: SetKind, only: bool) -> Result<Schema, SchemaError> {
        let (entries, reset) = parse_allowed(values)?;
        if entries.is_empty() {
            return Ok(if only && !self.0.valids.is_empty() {
                self.only()
            } else {
                self.clone()
            });
        }

        let mut node = self.node_clone();
        let rejecting_rest = node.flags.only == Some(true);
        let (target, other) = match kind {
            SetKind::Valids => (&mut node.valids, &mut node.invalids),
            SetKind::Invalids => (&mut node.invalids, &mut node.valids),
        };
        if reset {
            target.clear();
        }
        for entry in entries {
            if other.contains(&entry) {
                other.remove(&entry);
                if other.is_empty() && kind == SetKind::Invalids && rejecting_rest {
                    return Err(SchemaError::RejectsAllValues {
                        value: entry_display(&entry),
                    });
                }
            }
            target.add(entry);
        }
        if only {
            node.flags.only = Some(true);
        }
        node.refresh_refs();
        Ok(Schema::from_node(node))
    }

    // === Presence and result ===

    pub fn required(&self) -> Schema {
        self.set_presence(Presence::Required)
    }

    pub fn optional(&self) -> Schema {
        self.set_presence(Presence::Optional)
    }

    pub fn forbidden(&self) -> Schema {
        self.set_presence(Presence::Forbidden)
    }

    pub fn set_presence(&self, presence: Presence) -> Schema {
        if self.0.flags.presence == Some(presence) {
            return self.clone();
        }
        self.mutate(|node| node.flags.presence = Some(presence))
    }

    /// Validate the value but leave it out of the output.
    pub fn strip(&self) -> Schema {
        self.set_result(ResultMode::Strip)
    }

    /// Output the original input rather than the converted value.
    pub fn raw(&self) -> Schema {
        self.set_result(ResultMode::Raw)
    }

    fn set_result(&self, mode: ResultMode) -> Schema {
        if self.0.flags.result == Some(mode) {
            return self.clone();
        }
        self.mutate(|node| node.flags.result = Some(mode))
    }

    // === Defaults, empty, failover ===

    pub fn default(&self, value: impl Into<DefaultValue>) -> Schema {
        let value = value.into();
        self.mutate(|node| {
            node.flags.default = Some(value);
            node.refresh_refs();
        })
    }

    /// Default computed from the parent value and the preferences.
    /// Producer errors are reported as `any.default`.
    pub fn default_with<F>(&self, producer: F) -> Schema
    where
        F: Fn(Option<&Value>, &Preferences) -> Result<Option<Value>, BoxError> + Send + Sync + 'static,
    {
        self.default(DefaultValue::Producer(Arc::new(producer)))
    }

    /// Value substituted when this node fails; its errors are dropped.
    pub fn failover(&self, value: impl Into<DefaultValue>) -> Schema {
        let value = value.into();
        self.mutate(|node| {
            node.flags.failover = Some(value);
            node.refresh_refs();
        })
    }

    /// Values matching `empty` are treated as absent.
    pub fn empty(&self, empty: impl IntoSchema) -> Schema {
        let empty = empty.into_schema();
        self.mutate(|node| {
            node.flags.empty = Some(empty);
            node.refresh_refs();
        })
    }

    // === Metadata ===

    pub fn label(&self, label: impl Into<String>) -> Schema {
        let label = label.into();
        self.mutate(|node| node.flags.label = Some(label))
    }

    /// Name this schema for [`Schema::extract`] and [`Schema::fork`].
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::InvalidId` if the id contains a period.
    pub fn id(&self, id: impl Into<String>) -> Result<Schema, SchemaError> {
        let id = id.into();
        if id.is_empty() || id.contains('.') {
            return Err(SchemaError::InvalidId);
        }
        Ok(self.mutate(|node| node.flags.id = Some(id)))
    }

    /// Compare strings case-insensitively against allowed values.
    pub fn insensitive(&self) -> Schema {
        self.mutate(|node| node.flags.insensitive = Some(true))
    }

    /// Convert the validated value with the type's cast to `target`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnsupportedCast` if the type has no such cast.
    pub fn cast(&self, target: &str) -> Result<Schema, SchemaError> {
        if self.0.def.cast(target).is_none() {
            return Err(SchemaError::UnsupportedCast {
                type_name: self.type_name().to_string(),
                target: target.to_string(),
            });
        }
        let target = target.to_string();
        Ok(self.mutate(|node| node.flags.cast = Some(target)))
    }

    /// Preference overrides applied while validating this subtree.
    ///
    /// # Errors
    ///
    /// Fails on unknown keys or wrongly typed values.
    pub fn prefs(&self, prefs: Value) -> Result<Schema, SchemaError> {
        Preferences::default().apply(&prefs)?;
        let Value::Object(overrides) = prefs else {
            return Err(SchemaError::OptionsNotObject);
        };
        Ok(self.mutate(|node| {
            let merged = node.prefs.get_or_insert_with(Map::new);
            for (key, value) in overrides {
                merged.insert(key, value);
            }
        }))
    }

    pub fn messages(&self, messages: Messages) -> Schema {
        self.mutate(|node| {
            node.messages = Some(match &node.messages {
                Some(mine) => mine.merge(&messages),
                None => messages,
            })
        })
    }

    /// Replace this node's errors with `error`.
    pub fn error<E>(&self, error: E) -> Schema
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let error: CustomError = Arc::new(error);
        self.mutate(|node| node.flags.error = Some(ErrorOverride::Error(error)))
    }

    /// Rewrite this node's errors. Returning an empty list is reported as
    /// a schema error at validation time.
    pub fn error_with<F>(&self, map: F) -> Schema
    where
        F: Fn(&[Fault]) -> Vec<Fault> + Send + Sync + 'static,
    {
        self.mutate(|node| node.flags.error = Some(ErrorOverride::Map(Arc::new(map))))
    }

    // === Conditions and rules ===

    /// Add a condition evaluated against the live value.
    ///
    /// # Errors
    ///
    /// Returns a `SchemaError` for malformed options.
    pub fn when(&self, condition: impl Into<Condition>, options: WhenOptions) -> Result<Schema, SchemaError> {
        let when = When::parse(condition.into(), options)?;
        Ok(self.mutate(|node| {
            node.whens.push(when);
            node.refresh_refs();
        }))
    }

    /// Attach a rule instance.
    ///
    /// Single-instance rules replace an earlier rule of the same name;
    /// the new instance goes last.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRuleName` for an empty name, `UnknownRule` when the
    /// type has no such rule and no implementation is supplied,
    /// `InvalidOptions` for undeclared arguments and `InvalidArgument` when
    /// a literal argument fails its check.
    pub fn add_rule(&self, spec: RuleSpec) -> Result<Schema, SchemaError> {
        if spec.name.trim().is_empty() {
            return Err(SchemaError::InvalidRuleName);
        }
        let def = self.0.def.rule(&spec.name).cloned();
        if def.is_none() && spec.operate.is_none() {
            return Err(SchemaError::UnknownRule {
                name: spec.name,
                type_name: self.type_name().to_string(),
            });
        }

        if let Some(def) = &def {
            for (name, arg) in &spec.args {
                let arg_def = def.arg_def(name).ok_or(SchemaError::InvalidOptions)?;
                match arg {
                    Arg::Value(value) if !arg_def.accepts(value)? => {
                        return Err(SchemaError::InvalidArgument {
                            name: name.clone(),
                            reason: arg_def.reason.clone(),
                        });
                    }
                    Arg::Ref(_) if !arg_def.allow_ref => {
                        return Err(SchemaError::InvalidArgument {
                            name: name.clone(),
                            reason: "cannot be a reference".to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }

        let multi = spec.multi || def.as_ref().map(|d| d.multi).unwrap_or(false);
        let rule = Rule {
            name: spec.name,
            args: spec.args,
            def,
            operate: spec.operate,
            multi,
        };
        Ok(self.mutate(|node| {
            if !rule.multi {
                node.rules.retain(|r| r.name != rule.name);
            }
            node.rules.push(rule);
            node.refresh_refs();
        }))
    }

    // === Composition ===

    /// Merge `other` into this schema.
    ///
    /// Flags set on `other` win; allowed and denied values union with
    /// `other`'s membership winning per literal; single-instance rules
    /// from `other` replace ours; object keys merge recursively; other
    /// term lists and conditions append.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::TypeMismatch` when both types are concrete
    /// and differ, or a dependency cycle error from the merged keys.
    pub fn concat(&self, other: &Schema) -> Result<Schema, SchemaError> {
        let (left, right) = (self.type_name(), other.type_name());
        if left != "any" && right != "any" && left != right {
            return Err(SchemaError::TypeMismatch {
                left: left.to_string(),
                right: right.to_string(),
            });
        }

        let source = other.node();
        let mut node = self.node_clone();
        if left == "any" && right != "any" {
            node.def = Arc::clone(&source.def);
        }

        node.flags.overlay(&source.flags)?;
        node.valids = ValueSet::merge(&self.0.valids, &source.valids, &source.invalids);
        node.invalids = ValueSet::merge(&self.0.invalids, &source.invalids, &source.valids);

        for rule in &source.rules {
            if !rule.multi {
                node.rules.retain(|r| r.name != rule.name);
            }
            node.rules.push(rule.clone());
        }

        if let Some(incoming) = &source.terms.keys {
            let children = node.terms.keys.get_or_insert_with(Vec::new);
            for child in incoming {
                match children.iter_mut().find(|c| c.key == child.key) {
                    Some(existing) => existing.schema = existing.schema.concat(&child.schema)?,
                    None => children.push(child.clone()),
                }
            }
        }
        node.terms.patterns.extend(source.terms.patterns.iter().cloned());
        node.terms.items.extend(source.terms.items.iter().cloned());
        node.terms.ordered.extend(source.terms.ordered.iter().cloned());
        node.terms.matches.extend(source.terms.matches.iter().cloned());
        node.whens.extend(source.whens.iter().cloned());

        if let Some(prefs) = &source.prefs {
            let merged = node.prefs.get_or_insert_with(Map::new);
            for (key, value) in prefs {
                merged.insert(key.clone(), value.clone());
            }
        }
        if let Some(messages) = &source.messages {
            node.messages = Some(match &node.messages {
                Some(mine) => mine.merge(messages),
                None => messages.clone(),
            });
        }

        node.rebuild()?;
        Ok(Schema::from_node(node))
    }

    // === Objects ===

    /// Declare object keys. Redeclared keys replace the earlier schema.
    ///
    /// # Errors
    ///
    /// Fails on non-object types and on circular key references.
    pub fn keys<I, K, S>(&self, keys: I) -> Result<Schema, SchemaError>
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: IntoSchema,
    {
        self.expect_family(Family::Object, "keys")?;
        let keys: Vec<(String, Schema)> = keys
            .into_iter()
            .map(|(k, s)| (k.into(), s.into_schema()))
            .collect();
        self.mutate_rebuild(|node| {
            let children = node.terms.keys.get_or_insert_with(Vec::new);
            for (key, schema) in keys {
                children.retain(|c| c.key != key);
                children.push(Child { key, schema });
            }
            Ok(())
        })
    }

    /// Validate keys matching `pattern` (not declared by `keys`) with `rule`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::InvalidPattern` for a malformed expression.
    pub fn key_pattern(&self, pattern: &str, rule: impl IntoSchema) -> Result<Schema, SchemaError> {
        self.expect_family(Family::Object, "pattern")?;
        let regex = Regex::new(pattern).map_err(|e| SchemaError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        self.add_pattern(KeyMatcher::Regex(regex), rule.into_schema())
    }

    /// Like [`Schema::key_pattern`] with keys matched by a schema.
    pub fn key_pattern_schema(&self, key: impl IntoSchema, rule: impl IntoSchema) -> Result<Schema, SchemaError> {
        self.expect_family(Family::Object, "pattern")?;
        self.add_pattern(KeyMatcher::Schema(key.into_schema()), rule.into_schema())
    }

    fn add_pattern(&self, matcher: KeyMatcher, rule: Schema) -> Result<Schema, SchemaError> {
        self.mutate_rebuild(|node| {
            node.terms.patterns.push(KeyPattern { matcher, rule });
            Ok(())
        })
    }

    /// Whether keys not declared by `keys` or patterns are allowed.
    pub fn unknown(&self, allow: bool) -> Result<Schema, SchemaError> {
        self.expect_family(Family::Object, "unknown")?;
        Ok(self.mutate(|node| node.flags.unknown = Some(allow)))
    }

    // === Arrays ===

    /// Schemas array items may match. Required items must each be matched
    /// by some element; forbidden items must match none.
    pub fn items<I, S>(&self, items: I) -> Result<Schema, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: IntoSchema,
    {
        self.expect_family(Family::Array, "items")?;
        let items: Vec<Schema> = items.into_iter().map(IntoSchema::into_schema).collect();
        self.mutate_rebuild(|node| {
            node.terms.items.extend(items);
            Ok(())
        })
    }

    /// Positional item schemas.
    pub fn ordered<I, S>(&self, items: I) -> Result<Schema, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: IntoSchema,
    {
        self.expect_family(Family::Array, "ordered")?;
        let items: Vec<Schema> = items.into_iter().map(IntoSchema::into_schema).collect();
        self.mutate_rebuild(|node| {
            node.terms.ordered.extend(items);
            Ok(())
        })
    }

    /// Accept a single non-array value as a one-element array.
    pub fn single(&self, enabled: bool) -> Result<Schema, SchemaError> {
        self.expect_family(Family::Array, "single")?;
        Ok(self.mutate(|node| node.flags.single = Some(enabled)))
    }

    // === Alternatives ===

    /// Add alternative schemas, tried in order.
    pub fn try_schemas<I, S>(&self, schemas: I) -> Result<Schema, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: IntoSchema,
    {
        self.expect_family(Family::Alternatives, "try")?;
        let schemas: Vec<Schema> = schemas.into_iter().map(IntoSchema::into_schema).collect();
        self.mutate_rebuild(|node| {
            node.terms
                .matches
                .extend(schemas.into_iter().map(Match::Schema));
            Ok(())
        })
    }

    /// Add a conditional alternative.
    ///
    /// # Errors
    ///
    /// Fails on malformed options or when a `one`/`all` match mode is set.
    pub fn conditional(&self, condition: impl Into<Condition>, options: WhenOptions) -> Result<Schema, SchemaError> {
        self.expect_family(Family::Alternatives, "conditional")?;
        if self.0.flags.match_mode.unwrap_or_default() != MatchMode::Any {
            return Err(SchemaError::InvalidOptions);
        }
        let when = When::parse(condition.into(), options)?;
        self.mutate_rebuild(|node| {
            node.terms.matches.push(Match::Conditional(when));
            Ok(())
        })
    }

    pub fn match_mode(&self, mode: MatchMode) -> Result<Schema, SchemaError> {
        self.expect_family(Family::Alternatives, "match")?;
        let conditional = self
            .0
            .terms
            .matches
            .iter()
            .any(|m| matches!(m, Match::Conditional(_)));
        if conditional && mode != MatchMode::Any {
            return Err(SchemaError::InvalidOptions);
        }
        Ok(self.mutate(|node| node.flags.match_mode = Some(mode)))
    }
}

fn entry_display(entry: &Entry) -> String {
    match entry {
        Entry::Literal(value) => value.to_string(),
        Entry::Ref(reference) => reference.display(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{alternatives, any, array, number, object, string};
    use serde_json::json;

    #[test]
    fn presence_modifiers_are_idempotent() {
        let required = any().required();
        assert!(Schema::ptr_eq(&required, &required.required()));
        let forbidden = any().forbidden();
        assert!(Schema::ptr_eq(&forbidden, &forbidden.forbidden()));
        let optional = any().optional();
        assert!(Schema::ptr_eq(&optional, &optional.optional()));
        let stripped = any().strip();
        assert!(Schema::ptr_eq(&stripped, &stripped.strip()));
        let raw = any().raw();
        assert!(Schema::ptr_eq(&raw, &raw.raw()));
        assert!(!Schema::ptr_eq(&required, &required.optional()));
    }

    #[test]
    fn invalid_then_allow_moves_the_value() {
        let schema = any().invalid([1]).unwrap().allow([1]).unwrap();
        assert_eq!(schema.valids().len(), 1);
        assert!(schema.invalids().is_empty());
    }

    #[test]
    fn invalidating_the_only_valid_value_fails() {
        let err = any()
            .invalid([1])
            .unwrap()
            .allow([1])
            .unwrap()
            .valid([1])
            .unwrap()
            .invalid([1])
            .unwrap_err();
        assert!(err.to_string().contains("leaves schema rejecting all values"));
    }

    #[test]
    fn allow_rejects_undefined_and_late_override() {
        assert_eq!(
            any().allow([Allowed::Undefined]).unwrap_err(),
            SchemaError::UndefinedValue
        );
        assert_eq!(
            any().allow([Allowed::from("x"), Allowed::Override]).unwrap_err(),
            SchemaError::OverrideNotFirst
        );
    }

    #[test]
    fn lone_override_is_a_noop() {
        let schema = any().allow([1, 2]).unwrap();
        let same = schema.allow([Allowed::Override]).unwrap();
        assert!(Schema::ptr_eq(&schema, &same));
    }

    #[test]
    fn override_resets_the_set() {
        let schema = any()
            .allow([1, 2])
            .unwrap()
            .allow([Allowed::Override, Allowed::from(3)])
            .unwrap();
        assert_eq!(schema.valids().entries(), &[Entry::Literal(json!(3))]);
        assert!(schema.valids().is_override());
    }

    #[test]
    fn single_rules_replace_and_multi_rules_accumulate() {
        let schema = number().min(1).unwrap().max(10).unwrap().min(2).unwrap();
        assert_eq!(schema.rule_names(), vec!["max", "min"]);

        let schema = string().pattern("a").unwrap().pattern("b").unwrap();
        assert_eq!(schema.rule_names(), vec!["pattern", "pattern"]);
    }

    #[test]
    fn add_rule_validates_its_input() {
        assert_eq!(
            number().add_rule(RuleSpec::new("")).unwrap_err(),
            SchemaError::InvalidRuleName
        );
        assert_eq!(
            number().add_rule(RuleSpec::new("min").arg("bogus", 1)).unwrap_err(),
            SchemaError::InvalidOptions
        );
        assert_eq!(
            number().add_rule(RuleSpec::new("min").arg("limit", "x")).unwrap_err().to_string(),
            "limit must be a number"
        );
        assert!(matches!(
            number().add_rule(RuleSpec::new("nope")).unwrap_err(),
            SchemaError::UnknownRule { .. }
        ));
    }

    #[test]
    fn concat_checks_types() {
        let err = number().concat(&string()).unwrap_err();
        assert_eq!(err.to_string(), "Cannot merge type number with another type: string");
        let merged = any().concat(&number()).unwrap();
        assert_eq!(merged.type_name(), "number");
        let merged = number().concat(&any()).unwrap();
        assert_eq!(merged.type_name(), "number");
    }

    #[test]
    fn concat_later_membership_wins() {
        let a = any().allow([1]).unwrap();
        let b = any().invalid([1]).unwrap();
        let merged = a.concat(&b).unwrap();
        assert!(merged.valids().is_empty());
        assert_eq!(merged.invalids().len(), 1);

        let merged = b.concat(&a).unwrap();
        assert!(merged.invalids().is_empty());
        assert_eq!(merged.valids().len(), 1);
    }

    #[test]
    fn concat_merges_keys_recursively() {
        let a = object().keys([("a", number().min(5).unwrap())]).unwrap();
        let b = object()
            .keys([("a", number().min(10).unwrap()), ("b", any())])
            .unwrap();
        let merged = a.concat(&b).unwrap();
        assert_eq!(merged.key_names(), vec!["a", "b"]);
    }

    #[test]
    fn keys_are_ordered_by_references() {
        let schema = object()
            .keys([
                ("a", any().default(Reference::new("b").unwrap())),
                ("b", any()),
            ])
            .unwrap();
        assert_eq!(schema.key_names(), vec!["b", "a"]);
    }

    #[test]
    fn circular_keys_fail() {
        let err = object()
            .keys([
                ("a", any().valid([Reference::new("b").unwrap()]).unwrap()),
                ("b", any().valid([Reference::new("a").unwrap()]).unwrap()),
            ])
            .unwrap_err();
        assert!(matches!(err, SchemaError::CircularDependency { .. }));
    }

    #[test]
    fn nested_references_bubble_up() {
        let inner = object()
            .keys([("x", any().valid([Reference::new("...top").unwrap()]).unwrap())])
            .unwrap();
        assert_eq!(inner.refs(), &[(1, "top".to_string())]);
        let outer = object().keys([("inner", inner), ("top", any())]).unwrap();
        assert_eq!(outer.key_names(), vec!["top", "inner"]);
    }

    #[test]
    fn term_methods_check_the_type() {
        assert!(matches!(
            number().keys([("a", any())]).unwrap_err(),
            SchemaError::UnsupportedMethod { .. }
        ));
        assert!(array().items([any()]).is_ok());
        assert!(alternatives().try_schemas([number(), string()]).is_ok());
    }

    #[test]
    fn id_rejects_periods() {
        assert_eq!(any().id("a.b").unwrap_err(), SchemaError::InvalidId);
        assert_eq!(any().id("a").unwrap().get_id(), Some("a"));
    }

    #[test]
    fn prefs_are_validated() {
        assert!(any().prefs(json!({ "convert": false })).is_ok());
        assert_eq!(
            any().prefs(json!({ "nope": 1 })).unwrap_err().to_string(),
            "\"nope\" is not allowed"
        );
    }

    #[test]
    fn cast_requires_support() {
        assert!(array().cast("set").is_ok());
        assert!(matches!(
            string().cast("set").unwrap_err(),
            SchemaError::UnsupportedCast { .. }
        ));
    }
}
