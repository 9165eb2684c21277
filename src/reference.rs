//! References: path-based pointers into the validated document, the
//! external context, or the local error context.
//!
//! A reference is parsed once at schema-build time and resolved per
//! validation against a [`Scope`] (the current path, the chain of parent
//! values being validated, and the shadow table of stripped values).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::SchemaError;
use crate::types::{deep_equal, PathSegment};

/// Where a reference resolves from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// The document being validated.
    Value,
    /// The `context` preference.
    Global,
    /// The local context of the error or rule being rendered.
    Local,
}

impl RefKind {
    fn as_str(&self) -> &'static str {
        match self {
            RefKind::Value => "value",
            RefKind::Global => "global",
            RefKind::Local => "local",
        }
    }
}

/// How far up the ancestor chain a value reference starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ancestor {
    /// 0 is the value itself, 1 its parent, and so on.
    Depth(usize),
    /// The top-level value.
    Root,
}

/// Transformation applied to a resolved value.
#[derive(Clone)]
pub struct Adjust(Arc<dyn Fn(&Value) -> Value + Send + Sync>);

impl Adjust {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Adjust(Arc::new(f))
    }
}

impl fmt::Debug for Adjust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Adjust(..)")
    }
}

impl PartialEq for Adjust {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Prefix characters recognised at the start of a reference key.
/// An empty prefix never matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Prefixes {
    pub global: String,
    pub local: String,
    pub root: String,
}

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            global: "$".to_string(),
            local: "#".to_string(),
            root: "/".to_string(),
        }
    }
}

/// Options for [`Reference::with_options`].
#[derive(Debug, Clone, PartialEq)]
pub struct RefOptions {
    /// Path separator; `None` treats the whole key as a single segment.
    pub separator: Option<String>,
    pub prefix: Prefixes,
    pub ancestor: Option<usize>,
    pub adjust: Option<Adjust>,
    pub map: Option<Vec<(Value, Value)>>,
    /// The resolved array (or object keys) is a list of candidates.
    pub in_list: bool,
    /// Allow reaching into `[key, value]` entry lists by key.
    pub iterables: bool,
}

impl Default for RefOptions {
    fn default() -> Self {
        Self {
            separator: Some(".".to_string()),
            prefix: Prefixes::default(),
            ancestor: None,
            adjust: None,
            map: None,
            in_list: false,
            iterables: false,
        }
    }
}

impl RefOptions {
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    pub fn no_separator(mut self) -> Self {
        self.separator = None;
        self
    }

    pub fn prefix(mut self, prefix: Prefixes) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn ancestor(mut self, ancestor: usize) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn adjust<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.adjust = Some(Adjust::new(f));
        self
    }

    pub fn map(mut self, table: Vec<(Value, Value)>) -> Self {
        self.map = Some(table);
        self
    }

    pub fn in_list(mut self) -> Self {
        self.in_list = true;
        self
    }

    pub fn iterables(mut self) -> Self {
        self.iterables = true;
        self
    }
}

/// A parsed reference. Equality is structural.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    kind: RefKind,
    path: Vec<String>,
    ancestor: Ancestor,
    separator: Option<char>,
    adjust: Option<Adjust>,
    map: Option<Vec<(Value, Value)>>,
    in_list: bool,
    iterables: bool,
}

impl Reference {
    /// Parse a reference with default options.
    ///
    /// # Errors
    ///
    /// See [`Reference::with_options`].
    pub fn new(key: &str) -> Result<Self, SchemaError> {
        Self::with_options(key, RefOptions::default())
    }

    /// Parse a reference key.
    ///
    /// A leading `$` targets the context, `#` the local context and `/` the
    /// root value. Otherwise a leading run of separators selects the
    /// ancestor: `a` and `..a` are siblings, `.a` is a child of the value
    /// itself, `...a` starts at the grandparent.
    ///
    /// # Errors
    ///
    /// Returns a `SchemaError` for multi-character separators, an explicit
    /// `ancestor` combined with a separator prefix, or a root prefix
    /// followed by a relative path.
    pub fn with_options(key: &str, options: RefOptions) -> Result<Self, SchemaError> {
        let separator = match &options.separator {
            None => None,
            Some(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => return Err(SchemaError::InvalidSeparator),
                }
            }
        };

        let (kind, mut key, root) = split_prefix(key.trim(), separator, &options.prefix);
        let mut ancestor = Ancestor::Depth(1);

        if kind == RefKind::Value {
            if root {
                if let Some(sep) = separator {
                    if key.starts_with(sep) {
                        return Err(SchemaError::RelativeRootPath);
                    }
                }
                ancestor = Ancestor::Root;
            } else if separator.is_some_and(|sep| key.len() == sep.len_utf8() && key.starts_with(sep)) {
                key = String::new();
                ancestor = Ancestor::Depth(0);
            } else if let Some(explicit) = options.ancestor {
                if let Some(sep) = separator {
                    if key.starts_with(sep) {
                        return Err(SchemaError::PrefixWithAncestor);
                    }
                }
                ancestor = Ancestor::Depth(explicit);
            } else if let Some(sep) = separator {
                let leading = key.chars().take_while(|c| *c == sep).count();
                ancestor = Ancestor::Depth(match leading {
                    0 => 1,
                    1 => 0,
                    n => n - 1,
                });
                key = key.chars().skip(leading).collect();
            }
        } else if options.ancestor.is_some() {
            return Err(SchemaError::PrefixWithAncestor);
        }

        let path = match separator {
            Some(_) if key.is_empty() => Vec::new(),
            Some(sep) => key.split(sep).map(str::to_string).collect(),
            None => vec![key],
        };

        Ok(Self {
            kind,
            path,
            ancestor,
            separator,
            adjust: options.adjust,
            map: options.map,
            in_list: options.in_list,
            iterables: options.iterables,
        })
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn ancestor(&self) -> Ancestor {
        self.ancestor
    }

    /// True when the resolved value is a list of candidates.
    pub fn is_in(&self) -> bool {
        self.in_list
    }

    /// The path joined by the separator.
    pub fn key(&self) -> String {
        match self.separator {
            Some(sep) => self.path.join(&sep.to_string()),
            None => self.path.concat(),
        }
    }

    /// Human-readable form used in error contexts, e.g. `ref:a.b`.
    pub fn display(&self) -> String {
        let key = self.key();
        if self.kind != RefKind::Value {
            return format!("ref:{}:{}", self.kind.as_str(), key);
        }
        let Some(sep) = self.separator else {
            return format!("ref:{}", key);
        };
        match self.ancestor {
            Ancestor::Depth(0) => format!("ref:{}{}", sep, key),
            Ancestor::Root => format!("ref:root:{}", key),
            Ancestor::Depth(1) if key.is_empty() => "ref:..".to_string(),
            Ancestor::Depth(1) => format!("ref:{}", key),
            Ancestor::Depth(n) => {
                let lead: String = std::iter::repeat(sep).take(n + 1).collect();
                format!("ref:{}{}", lead, key)
            }
        }
    }

    /// The sibling-relative dependency this reference creates: how many
    /// levels up it starts and the first key it reads there.
    pub(crate) fn dependency(&self) -> Option<(usize, String)> {
        match (self.kind, self.ancestor) {
            (RefKind::Value, Ancestor::Depth(n)) if n > 0 => {
                Some((n, self.path.first().cloned().unwrap_or_default()))
            }
            _ => None,
        }
    }

    /// Resolve the reference against the value under validation.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::ReferenceExceedsRoot` if the reference walks
    /// above the top-level value.
    pub fn resolve(&self, value: Option<&Value>, scope: &Scope<'_>) -> Result<Option<Value>, SchemaError> {
        let resolved = match self.kind {
            RefKind::Global => scope.context.and_then(|c| self.reach(c)),
            RefKind::Local => scope.local.and_then(|c| self.reach(c)),
            RefKind::Value => {
                if let Some(shadow) = scope.shadow {
                    if let Some(found) = shadow.get(&self.absolute(scope.path)) {
                        return Ok(self.adjust(Some(found.clone())));
                    }
                }
                match self.ancestor {
                    Ancestor::Depth(0) => value.and_then(|v| self.reach(v)),
                    Ancestor::Depth(n) => {
                        let target = scope.ancestors.get(n - 1).ok_or_else(|| {
                            SchemaError::ReferenceExceedsRoot {
                                display: self.display(),
                            }
                        })?;
                        self.reach(target)
                    }
                    Ancestor::Root => match scope.ancestors.last() {
                        Some(root) => self.reach(root),
                        None => value.and_then(|v| self.reach(v)),
                    },
                }
            }
        };
        Ok(self.adjust(resolved))
    }

    fn absolute(&self, path: &[PathSegment]) -> Vec<String> {
        let base: &[PathSegment] = match self.ancestor {
            Ancestor::Root => &[],
            Ancestor::Depth(n) => &path[..path.len().saturating_sub(n)],
        };
        base.iter()
            .map(PathSegment::as_key)
            .chain(self.path.iter().cloned())
            .collect()
    }

    fn reach(&self, target: &Value) -> Option<Value> {
        reach(target, &self.path, self.iterables)
    }

    fn adjust(&self, value: Option<Value>) -> Option<Value> {
        let mut value = value;
        if let (Some(adjust), Some(v)) = (&self.adjust, &value) {
            value = Some((adjust.0)(v));
        }
        if let (Some(table), Some(v)) = (&self.map, &value) {
            if let Some((_, to)) = table.iter().find(|(from, _)| deep_equal(from, v)) {
                return Some(to.clone());
            }
        }
        value
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

fn split_prefix(key: &str, separator: Option<char>, prefix: &Prefixes) -> (RefKind, String, bool) {
    let matches = |p: &str| {
        !p.is_empty()
            && separator.map(|s| p != s.to_string()).unwrap_or(true)
            && key.starts_with(p)
    };
    if matches(&prefix.global) {
        return (RefKind::Global, key[prefix.global.len()..].to_string(), false);
    }
    if matches(&prefix.local) {
        return (RefKind::Local, key[prefix.local.len()..].to_string(), false);
    }
    if matches(&prefix.root) {
        return (RefKind::Value, key[prefix.root.len()..].to_string(), true);
    }
    (RefKind::Value, key.to_string(), false)
}

/// Walk `path` down from `target`.
///
/// Objects are descended by key, arrays by index (negative indices count
/// from the end) or `length`. With `iterables`, arrays of `[key, value]`
/// entries are searched by key.
pub fn reach(target: &Value, path: &[String], iterables: bool) -> Option<Value> {
    let mut current = target;
    for (i, segment) in path.iter().enumerate() {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                if iterables && is_entry_list(items) {
                    current = items.iter().find_map(|entry| {
                        let pair = entry.as_array()?;
                        (entry_key(&pair[0]) == *segment).then(|| &pair[1])
                    })?;
                    continue;
                }
                if segment == "length" {
                    return (i == path.len() - 1).then(|| Value::from(items.len()));
                }
                let index: i64 = segment.parse().ok()?;
                let index = if index < 0 { items.len() as i64 + index } else { index };
                current = items.get(usize::try_from(index).ok()?)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

fn is_entry_list(items: &[Value]) -> bool {
    !items.is_empty()
        && items
            .iter()
            .all(|item| item.as_array().map(|pair| pair.len() == 2).unwrap_or(false))
}

fn entry_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Expands a resolved `in` reference into its candidate values.
pub(crate) fn candidates(resolved: Value) -> Vec<Value> {
    match resolved {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(k, _)| Value::String(k)).collect(),
        other => vec![other],
    }
}

/// Values of stripped keys, still visible to references.
#[derive(Debug, Clone, Default)]
pub(crate) struct Shadow {
    values: HashMap<Vec<String>, Value>,
}

impl Shadow {
    pub(crate) fn set(&mut self, path: &[PathSegment], value: Value) {
        self.values
            .insert(path.iter().map(PathSegment::as_key).collect(), value);
    }

    pub(crate) fn get(&self, path: &[String]) -> Option<&Value> {
        self.values.get(path)
    }
}

/// Everything a reference can resolve against.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    /// Path of the value under validation.
    pub path: &'a [PathSegment],
    /// Parent values, innermost first.
    pub ancestors: &'a [&'a Value],
    pub context: Option<&'a Value>,
    pub local: Option<&'a Value>,
    pub(crate) shadow: Option<&'a Shadow>,
}

impl<'a> Scope<'a> {
    pub fn new(path: &'a [PathSegment], ancestors: &'a [&'a Value]) -> Self {
        Self {
            path,
            ancestors,
            context: None,
            local: None,
            shadow: None,
        }
    }

    pub fn with_context(mut self, context: Option<&'a Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_local(mut self, local: Option<&'a Value>) -> Self {
        self.local = local;
        self
    }
}
