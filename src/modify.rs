//! Structural schema rewriting.
//!
//! [`rewrite`] walks every schema and reference reachable from a schema
//! (flags, rule arguments, allowed and denied values, object keys and
//! patterns, array items, alternatives and conditions) and splices in the
//! replacements a [`Rewriter`] returns. Untouched subtrees keep their
//! nodes; a walk without replacements returns `None` so callers can keep
//! the original handle.

use tracing::trace;

use crate::condition::When;
use crate::error::SchemaError;
use crate::reference::Reference;
use crate::schema::{Arg, DefaultValue, KeyMatcher, Match, Node, Schema};

/// Visitor for [`rewrite`]. Returning `Some` replaces the visited item; a
/// replaced schema is not walked further.
pub trait Rewriter {
    fn schema(&mut self, schema: &Schema) -> Option<Schema>;

    fn reference(&mut self, _reference: &Reference) -> Option<Reference> {
        None
    }
}

impl<F> Rewriter for F
where
    F: FnMut(&Schema) -> Option<Schema>,
{
    fn schema(&mut self, schema: &Schema) -> Option<Schema> {
        self(schema)
    }
}

/// Rewrite `schema` and everything below it.
///
/// Returns `Ok(None)` when nothing was replaced.
///
/// # Errors
///
/// Fails when a rewritten object ends up with circular key references.
pub fn rewrite<R: Rewriter + ?Sized>(schema: &Schema, rewriter: &mut R) -> Result<Option<Schema>, SchemaError> {
    if let Some(replacement) = rewriter.schema(schema) {
        return Ok(Some(replacement));
    }

    let mut node = schema.node().clone();
    let mut changed = false;

    if let Some(empty) = &mut node.flags.empty {
        changed |= swap(empty, rewriter)?;
    }
    for source in [&mut node.flags.default, &mut node.flags.failover].into_iter().flatten() {
        if let DefaultValue::Ref(reference) = source {
            changed |= swap_ref(reference, rewriter);
        }
    }
    for rule in &mut node.rules {
        for (_, arg) in &mut rule.args {
            match arg {
                Arg::Ref(reference) => changed |= swap_ref(reference, rewriter),
                Arg::Schema(nested) => changed |= swap(nested, rewriter)?,
                Arg::Value(_) => {}
            }
        }
    }
    for reference in node.valids.references_mut().chain(node.invalids.references_mut()) {
        changed |= swap_ref(reference, rewriter);
    }

    for child in node.terms.keys.iter_mut().flatten() {
        changed |= swap(&mut child.schema, rewriter)?;
    }
    for pattern in &mut node.terms.patterns {
        if let KeyMatcher::Schema(matcher) = &mut pattern.matcher {
            changed |= swap(matcher, rewriter)?;
        }
        changed |= swap(&mut pattern.rule, rewriter)?;
    }
    for item in node.terms.items.iter_mut().chain(node.terms.ordered.iter_mut()) {
        changed |= swap(item, rewriter)?;
    }
    for matched in &mut node.terms.matches {
        match matched {
            Match::Schema(alternative) => changed |= swap(alternative, rewriter)?,
            Match::Conditional(when) => changed |= rewrite_when(when, rewriter)?,
        }
    }
    for when in &mut node.whens {
        changed |= rewrite_when(when, rewriter)?;
    }

    if !changed {
        return Ok(None);
    }
    node.rebuild()?;
    Ok(Some(Schema::from_node(node)))
}

fn swap<R: Rewriter + ?Sized>(slot: &mut Schema, rewriter: &mut R) -> Result<bool, SchemaError> {
    match rewrite(slot, rewriter)? {
        Some(replacement) => {
            *slot = replacement;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn swap_ref<R: Rewriter + ?Sized>(slot: &mut Reference, rewriter: &mut R) -> bool {
    match rewriter.reference(slot) {
        Some(replacement) => {
            *slot = replacement;
            true
        }
        None => false,
    }
}

fn rewrite_when<R: Rewriter + ?Sized>(when: &mut When, rewriter: &mut R) -> Result<bool, SchemaError> {
    let mut changed = false;
    if let Some(subject) = &mut when.subject {
        changed |= swap_ref(subject, rewriter);
    }
    for case in &mut when.cases {
        changed |= swap(&mut case.is, rewriter)?;
        for branch in [&mut case.then, &mut case.otherwise].into_iter().flatten() {
            changed |= swap(branch, rewriter)?;
        }
    }
    Ok(changed)
}

// === Ids ===

#[derive(Debug, Clone, Copy)]
enum Slot {
    Key(usize),
    Item(usize),
    Ordered(usize),
    Match(usize),
}

/// Find the direct child named `segment`: an object key (by its schema id,
/// or by key name when it has none) or any other child by id.
fn locate(node: &Node, segment: &str) -> Option<Slot> {
    let by_id = |schema: &Schema| schema.get_id() == Some(segment);

    if let Some(children) = &node.terms.keys {
        let found = children
            .iter()
            .position(|c| c.schema.get_id().map_or(c.key == segment, |id| id == segment));
        if let Some(index) = found {
            return Some(Slot::Key(index));
        }
    }
    if let Some(index) = node.terms.items.iter().position(by_id) {
        return Some(Slot::Item(index));
    }
    if let Some(index) = node.terms.ordered.iter().position(by_id) {
        return Some(Slot::Ordered(index));
    }
    node.terms
        .matches
        .iter()
        .position(|m| matches!(m, Match::Schema(s) if by_id(s)))
        .map(Slot::Match)
}

fn slot_ref(node: &Node, slot: Slot) -> Option<&Schema> {
    match slot {
        Slot::Key(i) => node.terms.keys.as_ref()?.get(i).map(|c| &c.schema),
        Slot::Item(i) => node.terms.items.get(i),
        Slot::Ordered(i) => node.terms.ordered.get(i),
        Slot::Match(i) => match node.terms.matches.get(i)? {
            Match::Schema(schema) => Some(schema),
            Match::Conditional(_) => None,
        },
    }
}

fn slot_mut(node: &mut Node, slot: Slot) -> Option<&mut Schema> {
    match slot {
        Slot::Key(i) => node.terms.keys.as_mut()?.get_mut(i).map(|c| &mut c.schema),
        Slot::Item(i) => node.terms.items.get_mut(i),
        Slot::Ordered(i) => node.terms.ordered.get_mut(i),
        Slot::Match(i) => match node.terms.matches.get_mut(i)? {
            Match::Schema(schema) => Some(schema),
            Match::Conditional(_) => None,
        },
    }
}

fn not_found(path: &str) -> SchemaError {
    SchemaError::PathNotFound { path: path.to_string() }
}

impl Schema {
    /// The sub-schema at a dotted path of ids or key names.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::PathNotFound` if a segment matches nothing.
    pub fn extract(&self, path: &str) -> Result<Schema, SchemaError> {
        let mut current = self.clone();
        for segment in path.split('.') {
            let node = current.node();
            let next = locate(node, segment)
                .and_then(|slot| slot_ref(node, slot))
                .cloned()
                .ok_or_else(|| not_found(path))?;
            current = next;
        }
        Ok(current)
    }

    /// Replace the sub-schemas at `paths` with `adjuster`'s result.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::PathNotFound` for a path that matches nothing,
    /// or a dependency error when a replaced key introduces a cycle.
    pub fn fork<I, S, F>(&self, paths: I, mut adjuster: F) -> Result<Schema, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnMut(&Schema) -> Schema,
    {
        let mut result = self.clone();
        for path in paths {
            let path = path.as_ref();
            let segments: Vec<&str> = path.split('.').collect();
            result = fork_at(&result, &segments, path, &mut adjuster)?;
            trace!(path = %path, "forked schema");
        }
        Ok(result)
    }

    /// Rewrite with a closure; see [`rewrite`]. Returns `self` when the
    /// closure replaced nothing.
    pub fn rewrite<F>(&self, mut visit: F) -> Result<Schema, SchemaError>
    where
        F: FnMut(&Schema) -> Option<Schema>,
    {
        Ok(rewrite(self, &mut visit)?.unwrap_or_else(|| self.clone()))
    }
}

fn fork_at<F>(schema: &Schema, segments: &[&str], path: &str, adjuster: &mut F) -> Result<Schema, SchemaError>
where
    F: FnMut(&Schema) -> Schema,
{
    let Some((first, rest)) = segments.split_first() else {
        return Ok(adjuster(schema));
    };
    let slot = locate(schema.node(), first).ok_or_else(|| not_found(path))?;
    let mut node = schema.node().clone();
    let target = slot_mut(&mut node, slot).ok_or_else(|| not_found(path))?;
    *target = fork_at(target, rest, path, adjuster)?;
    node.rebuild()?;
    Ok(Schema::from_node(node))
}
