//! Conditional schemas.
//!
//! `when` clauses are normalized at build time into a subject (a
//! reference, or the value itself for schema conditions) and a list of
//! cases. At validation time the first matching case selects a branch,
//! which the evaluator concatenates onto the node being validated.

use serde_json::Value;

use crate::catalog::any;
use crate::error::SchemaError;
use crate::reference::Reference;
use crate::schema::{IntoSchema, Schema};
use crate::types::Preferences;
use crate::validator::{Evaluator, State};

/// What a condition tests.
#[derive(Debug, Clone)]
pub enum Condition {
    /// A reference key, parsed with default options.
    Path(String),
    Ref(Reference),
    /// Validate the value itself against the schema.
    Schema(Schema),
}

impl From<&str> for Condition {
    fn from(path: &str) -> Self {
        Condition::Path(path.to_string())
    }
}

impl From<String> for Condition {
    fn from(path: String) -> Self {
        Condition::Path(path)
    }
}

impl From<Reference> for Condition {
    fn from(reference: Reference) -> Self {
        Condition::Ref(reference)
    }
}

impl From<Schema> for Condition {
    fn from(schema: Schema) -> Self {
        Condition::Schema(schema)
    }
}

/// The `is`/`not` test of a condition.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Matches an equal value; the subject must be present.
    Literal(Value),
    /// Matches the referenced value.
    Ref(Reference),
    /// Matches values the schema accepts.
    Schema(Schema),
}

impl Matcher {
    fn compile(self) -> Schema {
        match self {
            Matcher::Literal(value) => value.into_schema().required(),
            Matcher::Ref(reference) => reference.into_schema(),
            Matcher::Schema(schema) => schema,
        }
    }
}

impl From<Value> for Matcher {
    fn from(value: Value) -> Self {
        Matcher::Literal(value)
    }
}

impl From<Reference> for Matcher {
    fn from(reference: Reference) -> Self {
        Matcher::Ref(reference)
    }
}

impl From<Schema> for Matcher {
    fn from(schema: Schema) -> Self {
        Matcher::Schema(schema)
    }
}

impl From<&str> for Matcher {
    fn from(value: &str) -> Self {
        Matcher::Literal(Value::from(value))
    }
}

impl From<bool> for Matcher {
    fn from(value: bool) -> Self {
        Matcher::Literal(Value::from(value))
    }
}

impl From<i32> for Matcher {
    fn from(value: i32) -> Self {
        Matcher::Literal(Value::from(value))
    }
}

impl From<i64> for Matcher {
    fn from(value: i64) -> Self {
        Matcher::Literal(Value::from(value))
    }
}

impl From<f64> for Matcher {
    fn from(value: f64) -> Self {
        Matcher::Literal(Value::from(value))
    }
}

/// One entry of a `switch`.
#[derive(Debug, Clone)]
pub struct SwitchCase {
    is: Matcher,
    then: Schema,
    otherwise: Option<Schema>,
}

impl SwitchCase {
    pub fn new(is: impl Into<Matcher>, then: impl IntoSchema) -> Self {
        Self {
            is: is.into(),
            then: then.into_schema(),
            otherwise: None,
        }
    }

    /// Only allowed on the last case.
    pub fn otherwise(mut self, otherwise: impl IntoSchema) -> Self {
        self.otherwise = Some(otherwise.into_schema());
        self
    }
}

/// Options of [`Schema::when`].
#[derive(Debug, Clone, Default)]
pub struct WhenOptions {
    is: Option<Matcher>,
    not: Option<Matcher>,
    then: Option<Schema>,
    otherwise: Option<Schema>,
    switch: Option<Vec<SwitchCase>>,
    stop: Option<bool>,
}

impl WhenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is(mut self, is: impl Into<Matcher>) -> Self {
        self.is = Some(is.into());
        self
    }

    /// Negated `is`: swaps `then` and `otherwise`.
    pub fn not(mut self, not: impl Into<Matcher>) -> Self {
        self.not = Some(not.into());
        self
    }

    pub fn then(mut self, then: impl IntoSchema) -> Self {
        self.then = Some(then.into_schema());
        self
    }

    pub fn otherwise(mut self, otherwise: impl IntoSchema) -> Self {
        self.otherwise = Some(otherwise.into_schema());
        self
    }

    pub fn switch(mut self, cases: Vec<SwitchCase>) -> Self {
        self.switch = Some(cases);
        self
    }

    /// Stop evaluating later conditions once this one selects a branch.
    pub fn break_on_match(mut self) -> Self {
        self.stop = Some(true);
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Case {
    pub(crate) is: Schema,
    pub(crate) then: Option<Schema>,
    pub(crate) otherwise: Option<Schema>,
}

/// A normalized condition.
#[derive(Debug, Clone)]
pub(crate) struct When {
    /// `None` tests the value itself.
    pub(crate) subject: Option<Reference>,
    pub(crate) cases: Vec<Case>,
    pub(crate) stop: bool,
}

/// The branch a condition selected, with its cache id.
pub(crate) struct Branch {
    pub(crate) id: String,
    pub(crate) schema: Schema,
}

impl When {
    /// Normalize `when` options.
    ///
    /// # Errors
    ///
    /// Returns a `SchemaError` for option combinations that cannot be
    /// evaluated unambiguously.
    pub(crate) fn parse(condition: Condition, options: WhenOptions) -> Result<Self, SchemaError> {
        let stop = options.stop.unwrap_or(false);

        if let Condition::Schema(schema) = condition {
            if options.is.is_some() {
                return Err(SchemaError::SchemaConditionWith("is"));
            }
            if options.not.is_some() {
                return Err(SchemaError::SchemaConditionWith("not"));
            }
            if options.switch.is_some() {
                return Err(SchemaError::SchemaConditionWith("switch"));
            }
            check_branches(&options)?;
            return Ok(Self {
                subject: None,
                cases: vec![Case {
                    is: schema,
                    then: options.then,
                    otherwise: options.otherwise,
                }],
                stop,
            });
        }

        let subject = match condition {
            Condition::Path(path) => Reference::new(&path)?,
            Condition::Ref(reference) => reference,
            Condition::Schema(_) => return Err(SchemaError::InvalidOptions),
        };

        if options.is.is_some() && options.not.is_some() {
            return Err(SchemaError::IsWithNot);
        }

        let Some(switch) = options.switch else {
            check_branches(&options)?;
            let (matcher, then, otherwise) = match options.not {
                Some(not) => (Some(not), options.otherwise, options.then),
                None => (options.is, options.then, options.otherwise),
            };
            let is = match matcher {
                Some(matcher) => matcher.compile(),
                None => truthy(),
            };
            return Ok(Self {
                subject: Some(subject),
                cases: vec![Case { is, then, otherwise }],
                stop,
            });
        };

        if options.is.is_some() {
            return Err(SchemaError::SwitchWith("is"));
        }
        if options.not.is_some() {
            return Err(SchemaError::SwitchWith("not"));
        }
        if options.then.is_some() {
            return Err(SchemaError::SwitchWith("then"));
        }

        let last = switch.len().saturating_sub(1);
        let mut cases = Vec::with_capacity(switch.len());
        for (i, case) in switch.into_iter().enumerate() {
            let mut otherwise = None;
            if i == last {
                if options.otherwise.is_some() && case.otherwise.is_some() {
                    return Err(SchemaError::OtherwiseInsideAndOutside);
                }
                otherwise = options.otherwise.clone().or(case.otherwise);
                if otherwise.is_some() && stop {
                    return Err(SchemaError::OtherwiseAndBreak);
                }
            } else if case.otherwise.is_some() {
                return Err(SchemaError::InvalidOptions);
            }
            cases.push(Case {
                is: case.is.compile(),
                then: Some(case.then),
                otherwise,
            });
        }

        if cases.is_empty() {
            return Err(SchemaError::MissingBranch);
        }

        Ok(Self {
            subject: Some(subject),
            cases,
            stop,
        })
    }

    pub(crate) fn subject_ref(&self) -> Option<&Reference> {
        self.subject.as_ref()
    }

    /// Every schema the condition holds: matchers and branches.
    pub(crate) fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.cases.iter().flat_map(|case| {
            std::iter::once(&case.is)
                .chain(case.then.iter())
                .chain(case.otherwise.iter())
        })
    }

    /// Evaluate the condition for `value` and return the selected branch.
    ///
    /// `index` is the condition's position, used to build the branch id.
    pub(crate) fn select(
        &self,
        index: usize,
        value: Option<&Value>,
        evaluator: &Evaluator,
        state: &State<'_>,
        prefs: &Preferences,
    ) -> Result<Option<Branch>, SchemaError> {
        let input = match &self.subject {
            Some(reference) => evaluator.resolve(reference, value, state, prefs)?,
            None => value.cloned(),
        };

        for (j, case) in self.cases.iter().enumerate() {
            if evaluator.matches(&case.is, input.as_ref(), state, prefs)? {
                if let Some(then) = &case.then {
                    return Ok(Some(Branch {
                        id: format!("{}.{}", index, j),
                        schema: then.clone(),
                    }));
                }
            } else if let Some(otherwise) = &case.otherwise {
                return Ok(Some(Branch {
                    id: format!("{}.{}o", index, j),
                    schema: otherwise.clone(),
                }));
            }
        }
        Ok(None)
    }
}

fn check_branches(options: &WhenOptions) -> Result<(), SchemaError> {
    if options.then.is_none() && options.otherwise.is_none() {
        return Err(SchemaError::MissingBranch);
    }
    if options.stop.is_some() && options.then.is_some() && options.otherwise.is_some() {
        return Err(SchemaError::ThenOtherwiseBreak);
    }
    Ok(())
}

/// Default matcher: present and not one of `null`, `false`, `0`, `""`.
fn truthy() -> Schema {
    let falsy = [Value::Null, Value::Bool(false), Value::from(0), Value::from("")];
    match any().invalid(falsy) {
        Ok(schema) => schema.required(),
        Err(_) => any().required(),
    }
}
