//! Sieve
//!
//! Declarative validation of JSON values.
//!
//! A [`Schema`] is an immutable description of acceptable values, built
//! from a type constructor and chained modifiers. Every modifier returns a
//! new schema; the original is never changed. Validation walks a value
//! against the schema and returns the sanitized value (converted,
//! defaulted, stripped) or the list of violations.
//!
//! # Example
//!
//! ```
//! use sieve::{number, object, string, Preferences};
//! use serde_json::json;
//!
//! let schema = object()
//!     .keys([
//!         ("name", string().required()),
//!         ("age", number().min(0).unwrap()),
//!     ])
//!     .unwrap();
//!
//! // Strings are converted to numbers by default
//! let result = schema.validate(&json!({ "name": "Ada", "age": "36" })).unwrap();
//! assert!(result.is_valid());
//! assert_eq!(result.value, Some(json!({ "name": "Ada", "age": 36 })));
//!
//! let prefs = Preferences::default().abort_early(false);
//! let result = schema.validate_with(Some(&json!({ "age": -1 })), &prefs).unwrap();
//! let details = result.error.unwrap().details().unwrap().to_vec();
//! assert_eq!(details[0].code, "any.required");
//! assert_eq!(details[1].code, "number.min");
//! ```
//!
//! # References and conditions
//!
//! Values elsewhere in the document are reached with [`Reference`]s
//! (`"a.b"` for a sibling path, `"...x"` for an ancestor, `"$x"` for the
//! external context, `"#x"` for the error-local context). References can
//! stand in for rule limits, allowed values and defaults, and drive
//! `when` conditions. Object keys are evaluated in reference order.
//!
//! # Descriptions
//!
//! Schemas can also be written as JSON and turned into a [`Schema`] with
//! [`build`]; plain literals are compiled with [`compile`].

mod build;
mod catalog;
mod compile;
mod condition;
mod error;
mod extend;
mod graph;
mod loader;
mod modify;
mod reference;
mod schema;
mod template;
mod types;
mod validator;
mod values;

pub use build::build;
pub use catalog::{alternatives, any, array, boolean, number, object, string};
pub use compile::compile;
pub use condition::{Condition, Matcher, SwitchCase, WhenOptions};
pub use error::{
    BoxError, CustomError, ErrorReport, Fault, LoadError, RuleError, SchemaError, ValidateError,
    ValidationError,
};
pub use extend::{
    ArgCheck, ArgDef, CastFn, CoerceFn, Family, RuleArgs, RuleDef, RuleFn, TypeBuilder, TypeDef,
    ValidateFn,
};
pub use loader::{is_url, load_auto, load_json, load_str};
pub use modify::{rewrite, Rewriter};
pub use reference::{reach, Adjust, Ancestor, Prefixes, RefKind, RefOptions, Reference, Scope};
pub use schema::{
    Arg, DefaultFn, DefaultValue, ErrorMapFn, ErrorOverride, IntoSchema, MatchMode, ResultMode,
    RuleSpec, Schema,
};
pub use template::{Messages, Template};
pub use types::{LabelMode, PathSegment, Preferences, Presence};
pub use validator::{Helpers, Validation};
pub use values::{Allowed, Entry, ValueSet};

#[cfg(feature = "remote")]
pub use loader::load_url;
