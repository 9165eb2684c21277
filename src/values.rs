//! Ordered sets of allowed and denied values.

use serde_json::Value;

use crate::error::SchemaError;
use crate::reference::{candidates, Reference, Scope};
use crate::types::deep_equal;

/// An argument to `allow`, `valid` or `invalid`.
#[derive(Debug, Clone, PartialEq)]
pub enum Allowed {
    Value(Value),
    Ref(Reference),
    /// Resets the set instead of appending. Must be the first argument.
    Override,
    /// An absent value; always rejected.
    Undefined,
}

impl From<Value> for Allowed {
    fn from(value: Value) -> Self {
        Allowed::Value(value)
    }
}

impl From<Option<Value>> for Allowed {
    fn from(value: Option<Value>) -> Self {
        value.map(Allowed::Value).unwrap_or(Allowed::Undefined)
    }
}

impl From<Reference> for Allowed {
    fn from(reference: Reference) -> Self {
        Allowed::Ref(reference)
    }
}

impl From<&str> for Allowed {
    fn from(value: &str) -> Self {
        Allowed::Value(Value::from(value))
    }
}

impl From<String> for Allowed {
    fn from(value: String) -> Self {
        Allowed::Value(Value::from(value))
    }
}

impl From<bool> for Allowed {
    fn from(value: bool) -> Self {
        Allowed::Value(Value::from(value))
    }
}

impl From<i32> for Allowed {
    fn from(value: i32) -> Self {
        Allowed::Value(Value::from(value))
    }
}

impl From<i64> for Allowed {
    fn from(value: i64) -> Self {
        Allowed::Value(Value::from(value))
    }
}

impl From<f64> for Allowed {
    fn from(value: f64) -> Self {
        Allowed::Value(Value::from(value))
    }
}

/// One member of a [`ValueSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Literal(Value),
    Ref(Reference),
}

impl Entry {
    fn same(&self, other: &Entry) -> bool {
        match (self, other) {
            (Entry::Literal(a), Entry::Literal(b)) => deep_equal(a, b),
            (Entry::Ref(a), Entry::Ref(b)) => a == b,
            _ => false,
        }
    }
}

/// Splits an argument list into entries, honouring a leading `Override`.
///
/// Returns the entries and whether the set should be reset.
pub(crate) fn parse_allowed(values: Vec<Allowed>) -> Result<(Vec<Entry>, bool), SchemaError> {
    let mut entries = Vec::with_capacity(values.len());
    let mut reset = false;
    for (i, value) in values.into_iter().enumerate() {
        match value {
            Allowed::Undefined => return Err(SchemaError::UndefinedValue),
            Allowed::Override if i == 0 => reset = true,
            Allowed::Override => return Err(SchemaError::OverrideNotFirst),
            Allowed::Value(v) => entries.push(Entry::Literal(v)),
            Allowed::Ref(r) => entries.push(Entry::Ref(r)),
        }
    }
    Ok((entries, reset))
}

/// An ordered, duplicate-free set of literals and references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSet {
    entries: Vec<Entry>,
    reset: bool,
}

impl ValueSet {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// True when this set replaces, rather than extends, the set it is
    /// concatenated onto.
    pub fn is_override(&self) -> bool {
        self.reset
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.reset = true;
    }

    pub(crate) fn add(&mut self, entry: Entry) {
        if !self.contains(&entry) {
            self.entries.push(entry);
        }
    }

    pub(crate) fn remove(&mut self, entry: &Entry) {
        self.entries.retain(|e| !e.same(entry));
    }

    pub(crate) fn contains(&self, entry: &Entry) -> bool {
        self.entries.iter().any(|e| e.same(entry))
    }

    pub(crate) fn references(&self) -> impl Iterator<Item = &Reference> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Ref(r) => Some(r),
            Entry::Literal(_) => None,
        })
    }

    pub(crate) fn references_mut(&mut self) -> impl Iterator<Item = &mut Reference> {
        self.entries.iter_mut().filter_map(|e| match e {
            Entry::Ref(r) => Some(r),
            Entry::Literal(_) => None,
        })
    }

    /// Union of `target` and `source` minus the members of `remove`.
    /// A resetting `source` replaces `target` outright.
    pub(crate) fn merge(target: &ValueSet, source: &ValueSet, remove: &ValueSet) -> ValueSet {
        let mut merged = if source.reset {
            source.clone()
        } else {
            let mut merged = target.clone();
            for entry in &source.entries {
                merged.add(entry.clone());
            }
            merged
        };
        for entry in &remove.entries {
            merged.remove(entry);
        }
        merged
    }

    /// Find the member matching `value`, returning the matched member
    /// (the resolved value for references).
    ///
    /// # Errors
    ///
    /// Propagates reference resolution errors.
    pub(crate) fn find(
        &self,
        value: &Value,
        scope: &Scope<'_>,
        insensitive: bool,
    ) -> Result<Option<Value>, SchemaError> {
        for entry in &self.entries {
            match entry {
                Entry::Literal(literal) => {
                    if matches(value, literal, insensitive) {
                        return Ok(Some(literal.clone()));
                    }
                }
                Entry::Ref(reference) => {
                    let Some(resolved) = reference.resolve(Some(value), scope)? else {
                        continue;
                    };
                    let options = if reference.is_in() {
                        candidates(resolved)
                    } else {
                        vec![resolved]
                    };
                    if let Some(found) = options.into_iter().find(|c| matches(value, c, insensitive)) {
                        return Ok(Some(found));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Members for error contexts, with references resolved against the
    /// live state. Unresolvable references are listed by display name.
    pub(crate) fn describe(&self, value: Option<&Value>, scope: &Scope<'_>) -> Result<Vec<Value>, SchemaError> {
        let mut listed = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            match entry {
                Entry::Literal(literal) => listed.push(literal.clone()),
                Entry::Ref(reference) => match reference.resolve(value, scope)? {
                    Some(resolved) => listed.push(resolved),
                    None => listed.push(Value::String(reference.display())),
                },
            }
        }
        Ok(listed)
    }
}

fn matches(value: &Value, candidate: &Value, insensitive: bool) -> bool {
    match (value, candidate) {
        (Value::String(a), Value::String(b)) if insensitive => a.to_lowercase() == b.to_lowercase(),
        _ => deep_equal(value, candidate),
    }
}
