//! Integration tests for the validation engine: schema algebra,
//! references, conditions and the evaluator.

use serde_json::{json, Value};
use sieve::{
    alternatives, any, array, boolean, build, compile, number, object, string, ArgDef, Messages,
    Preferences, Presence, RefOptions, Reference, RuleDef, RuleSpec, Schema, SchemaError,
    SwitchCase, TypeBuilder, Validation, WhenOptions,
};

fn codes(validation: &Validation) -> Vec<String> {
    validation
        .error
        .as_ref()
        .and_then(|e| e.details())
        .map(|d| d.iter().map(|r| r.code.clone()).collect())
        .unwrap_or_default()
}

fn all_errors() -> Preferences {
    Preferences::default().abort_early(false)
}

mod algebra {
    use super::*;

    #[test]
    fn modifiers_never_touch_the_original() {
        let base = number();
        let required = base.required();
        assert_eq!(base.presence(), None);
        assert_eq!(required.presence(), Some(Presence::Required));

        // No-op modifiers hand back the same instance
        assert!(Schema::ptr_eq(&required, &required.required()));
        assert!(!Schema::ptr_eq(&base, &required));
    }

    #[test]
    fn concat_replaces_single_rules() {
        let left = object().keys([("a", number().min(5).unwrap())]).unwrap();
        let right = object().keys([("a", number().min(10).unwrap())]).unwrap();
        let merged = left.concat(&right).unwrap();

        let result = merged.validate(&json!({ "a": 4 })).unwrap();
        let error = result.error.unwrap();
        let report = &error.details().unwrap()[0];
        assert_eq!(report.code, "number.min");
        assert_eq!(report.context_value("limit"), Some(&json!(10)));

        assert!(left.validate(&json!({ "a": 7 })).unwrap().is_valid());
        assert!(!merged.validate(&json!({ "a": 7 })).unwrap().is_valid());
    }

    #[test]
    fn concat_accumulates_multi_rules() {
        let schema = string()
            .pattern("^a")
            .unwrap()
            .concat(&string().pattern("z$").unwrap())
            .unwrap();
        assert_eq!(schema.rule_names(), vec!["pattern", "pattern"]);
        assert!(schema.validate(&json!("abz")).unwrap().is_valid());
        assert!(!schema.validate(&json!("ab")).unwrap().is_valid());
    }

    #[test]
    fn concat_rejects_mismatched_types() {
        let err = string().concat(&number()).unwrap_err();
        assert_eq!(err.to_string(), "Cannot merge type string with another type: number");

        // any merges into anything
        let merged = number().concat(&any().required()).unwrap();
        assert_eq!(merged.type_name(), "number");
        assert_eq!(merged.presence(), Some(Presence::Required));
    }

    #[test]
    fn concat_moves_values_between_sets() {
        let left = any().valid(["a", "b"]).unwrap();
        let right = any().invalid(["a"]).unwrap();
        let merged = left.concat(&right).unwrap();
        assert!(!merged.validate(&json!("a")).unwrap().is_valid());
        assert!(merged.validate(&json!("b")).unwrap().is_valid());
    }

    #[test]
    fn invalid_cannot_empty_a_valid_set() {
        let err = any().valid(["a"]).unwrap().invalid(["a"]).unwrap_err();
        assert!(matches!(err, SchemaError::RejectsAllValues { .. }));
    }

    #[test]
    fn term_methods_check_the_type() {
        assert!(matches!(
            number().keys([("a", any())]).unwrap_err(),
            SchemaError::UnsupportedMethod { .. }
        ));
        assert!(matches!(
            string().items([any()]).unwrap_err(),
            SchemaError::UnsupportedMethod { .. }
        ));
    }

    #[test]
    fn ids_cannot_contain_periods() {
        assert_eq!(
            any().id("a.b").unwrap_err().to_string(),
            "id cannot contain period character"
        );
        assert_eq!(any().id("ok").unwrap().get_id(), Some("ok"));
    }
}

mod references {
    use super::*;

    #[test]
    fn defaults_follow_sibling_references() {
        let schema = object()
            .keys([
                ("a", any().default(Reference::new("b").unwrap())),
                ("b", any()),
            ])
            .unwrap();
        let result = schema.validate(&json!({ "b": 6 })).unwrap();
        assert_eq!(result.value, Some(json!({ "a": 6, "b": 6 })));
    }

    #[test]
    fn keys_are_ordered_by_dependency() {
        let schema = object()
            .keys([
                ("a", any().default(Reference::new("b").unwrap())),
                ("b", any().default(Reference::new("c").unwrap())),
                ("c", any().default(1)),
            ])
            .unwrap();
        assert_eq!(schema.key_names(), vec!["c", "b", "a"]);
        let result = schema.validate(&json!({})).unwrap();
        assert_eq!(result.value, Some(json!({ "a": 1, "b": 1, "c": 1 })));
    }

    #[test]
    fn circular_keys_fail_at_construction() {
        let err = object()
            .keys([
                ("a", number().min(Reference::new("b").unwrap()).unwrap()),
                ("b", number().min(Reference::new("a").unwrap()).unwrap()),
            ])
            .unwrap_err();
        assert!(matches!(err, SchemaError::CircularDependency { .. }));
    }

    #[test]
    fn parent_references_reach_outer_keys() {
        let schema = object()
            .keys([
                ("max", number()),
                (
                    "inner",
                    object()
                        .keys([("n", number().max(Reference::new("...max").unwrap()).unwrap())])
                        .unwrap(),
                ),
            ])
            .unwrap();
        assert!(schema.validate(&json!({ "max": 5, "inner": { "n": 5 } })).unwrap().is_valid());
        assert_eq!(
            codes(&schema.validate(&json!({ "max": 5, "inner": { "n": 6 } })).unwrap()),
            vec!["number.max"]
        );
    }

    #[test]
    fn context_references() {
        let schema = any().valid([Reference::new("$allowed").unwrap()]).unwrap();
        let prefs = Preferences::default().context(json!({ "allowed": "yes" }));
        assert!(schema.validate_with(Some(&json!("yes")), &prefs).unwrap().is_valid());
        assert!(!schema.validate_with(Some(&json!("no")), &prefs).unwrap().is_valid());
    }

    #[test]
    fn in_references_offer_candidates() {
        let choice = Reference::with_options("options", RefOptions::default().in_list()).unwrap();
        let schema = object()
            .keys([("options", array()), ("pick", any().valid([choice]).unwrap())])
            .unwrap();
        assert!(schema
            .validate(&json!({ "options": ["x", "y"], "pick": "y" }))
            .unwrap()
            .is_valid());
        assert_eq!(
            codes(&schema.validate(&json!({ "options": ["x"], "pick": "z" })).unwrap()),
            vec!["any.only"]
        );
    }

    #[test]
    fn invalid_reference_options() {
        assert_eq!(
            Reference::with_options("a", RefOptions::default().separator("ab")).unwrap_err(),
            SchemaError::InvalidSeparator
        );
        assert_eq!(Reference::new("/.a").unwrap_err(), SchemaError::RelativeRootPath);
    }
}

mod conditions {
    use super::*;

    fn payment() -> Schema {
        object()
            .keys([
                ("kind", string().valid(["card", "cash"]).unwrap()),
                (
                    "number",
                    string()
                        .when(
                            "kind",
                            WhenOptions::new()
                                .is("card")
                                .then(string().required())
                                .otherwise(string().forbidden()),
                        )
                        .unwrap(),
                ),
            ])
            .unwrap()
    }

    #[test]
    fn then_and_otherwise() {
        let schema = payment();
        assert!(schema.validate(&json!({ "kind": "card", "number": "1" })).unwrap().is_valid());
        assert!(schema.validate(&json!({ "kind": "cash" })).unwrap().is_valid());
        assert_eq!(
            codes(&schema.validate(&json!({ "kind": "card" })).unwrap()),
            vec!["any.required"]
        );
        assert_eq!(
            codes(&schema.validate(&json!({ "kind": "cash", "number": "1" })).unwrap()),
            vec!["any.unknown"]
        );
    }

    #[test]
    fn boolean_condition_merges_max() {
        let schema = object()
            .keys([
                ("a", boolean()),
                (
                    "b",
                    number()
                        .when("a", WhenOptions::new().is(true).then(number().max(100).unwrap()))
                        .unwrap(),
                ),
            ])
            .unwrap();
        assert_eq!(
            codes(&schema.validate(&json!({ "a": true, "b": 101 })).unwrap()),
            vec!["number.max"]
        );
        assert!(schema.validate(&json!({ "a": false, "b": 101 })).unwrap().is_valid());
    }

    #[test]
    fn not_inverts_the_match() {
        let schema = object()
            .keys([
                ("a", any()),
                (
                    "b",
                    any()
                        .when("a", WhenOptions::new().not(1).then(any().forbidden()))
                        .unwrap(),
                ),
            ])
            .unwrap();
        assert!(schema.validate(&json!({ "a": 1, "b": 2 })).unwrap().is_valid());
        assert_eq!(codes(&schema.validate(&json!({ "a": 2, "b": 2 })).unwrap()), vec!["any.unknown"]);
    }

    #[test]
    fn switch_picks_the_first_match() {
        let schema = object()
            .keys([
                ("size", string()),
                (
                    "count",
                    number()
                        .when(
                            "size",
                            WhenOptions::new()
                                .switch(vec![
                                    SwitchCase::new("s", number().max(1).unwrap()),
                                    SwitchCase::new("m", number().max(5).unwrap()),
                                ])
                                .otherwise(number().max(10).unwrap()),
                        )
                        .unwrap(),
                ),
            ])
            .unwrap();
        assert!(schema.validate(&json!({ "size": "m", "count": 5 })).unwrap().is_valid());
        assert!(!schema.validate(&json!({ "size": "s", "count": 5 })).unwrap().is_valid());
        assert!(schema.validate(&json!({ "size": "l", "count": 10 })).unwrap().is_valid());
        assert!(!schema.validate(&json!({ "size": "l", "count": 11 })).unwrap().is_valid());
    }

    #[test]
    fn schema_subjects_peek_at_the_value() {
        let schema = any()
            .when(string(), WhenOptions::new().then(string().min(3).unwrap()).otherwise(number()))
            .unwrap();
        assert!(schema.validate(&json!("abc")).unwrap().is_valid());
        assert_eq!(codes(&schema.validate(&json!("ab")).unwrap()), vec!["string.min"]);
        assert!(schema.validate(&json!(4)).unwrap().is_valid());
        assert_eq!(codes(&schema.validate(&json!(true)).unwrap()), vec!["number.base"]);
    }

    #[test]
    fn malformed_options_fail_at_construction() {
        assert_eq!(
            any().when("a", WhenOptions::new().is(1)).unwrap_err(),
            SchemaError::MissingBranch
        );
        assert_eq!(
            any()
                .when("a", WhenOptions::new().is(1).not(2).then(any()))
                .unwrap_err(),
            SchemaError::IsWithNot
        );
    }

    #[test]
    fn conditions_inside_array_items_are_cached_transparently() {
        let item = object()
            .keys([
                ("strict", boolean()),
                (
                    "n",
                    number()
                        .when("strict", WhenOptions::new().is(true).then(number().integer().unwrap()))
                        .unwrap(),
                ),
            ])
            .unwrap();
        let schema = array().items([item]).unwrap();
        let value = json!([
            { "strict": true, "n": 1 },
            { "strict": false, "n": 1.5 },
            { "strict": true, "n": 2.5 }
        ]);
        let cached = schema.validate_with(Some(&value), &all_errors()).unwrap();
        let uncached = schema
            .validate_with(Some(&value), &all_errors().cache(false))
            .unwrap();
        assert_eq!(codes(&cached), vec!["number.integer"]);
        assert_eq!(codes(&cached), codes(&uncached));
    }

    fn stacked_limits() -> Schema {
        object()
            .keys([
                ("loose", boolean()),
                ("tight", boolean()),
                (
                    "n",
                    number()
                        .when(
                            "loose",
                            WhenOptions::new()
                                .is(true)
                                .then(number().max(10).unwrap())
                                .break_on_match(),
                        )
                        .unwrap()
                        .when("tight", WhenOptions::new().is(true).then(number().max(5).unwrap()))
                        .unwrap(),
                ),
            ])
            .unwrap()
    }

    #[test]
    fn break_skips_later_conditions_after_a_match() {
        let schema = stacked_limits();
        assert!(schema
            .validate(&json!({ "loose": true, "tight": true, "n": 7 }))
            .unwrap()
            .is_valid());
        assert_eq!(
            codes(&schema.validate(&json!({ "loose": true, "tight": true, "n": 11 })).unwrap()),
            vec!["number.max"]
        );
    }

    #[test]
    fn break_without_a_match_keeps_going() {
        let schema = stacked_limits();
        let result = schema
            .validate(&json!({ "loose": false, "tight": true, "n": 7 }))
            .unwrap();
        let error = result.error.unwrap();
        let report = &error.details().unwrap()[0];
        assert_eq!(report.code, "number.max");
        assert_eq!(report.context_value("limit"), Some(&json!(5)));
    }
}

mod evaluator {
    use super::*;

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let schema = string().empty("").default("bar");
        assert_eq!(schema.validate(&json!("")).unwrap().value, Some(json!("bar")));
        assert_eq!(schema.validate(&json!("baz")).unwrap().value, Some(json!("baz")));
    }

    #[test]
    fn custom_error_replaces_sibling_details() {
        let schema = object()
            .keys([
                ("a", number()),
                ("b", number().error(std::io::Error::other("b is broken"))),
            ])
            .unwrap();
        let result = schema
            .validate_with(Some(&json!({ "a": "x", "b": "y" })), &all_errors())
            .unwrap();
        let error = result.error.unwrap();
        assert!(!error.has_details());
        assert!(error.details().is_none());
        assert_eq!(error.to_string(), "b is broken");
    }

    #[test]
    fn guid_versions_are_enforced() {
        let schema = string().guid(&["uuidv4"]).unwrap();
        let v5 = "{D1A5279D-B27D-5CD4-A05E-EFDD53D08E8D}";
        assert_eq!(codes(&schema.validate(&json!(v5)).unwrap()), vec!["string.guid"]);
        assert!(string().guid(&["uuidv5"]).unwrap().validate(&json!(v5)).unwrap().is_valid());
    }

    #[test]
    fn errors_carry_paths_and_labels() {
        let schema = object()
            .keys([(
                "items",
                array().items([object().keys([("qty", number().min(1).unwrap())]).unwrap()]).unwrap(),
            )])
            .unwrap();
        let result = schema.validate(&json!({ "items": [{ "qty": 0 }] })).unwrap();
        let error = result.error.unwrap();
        let report = &error.details().unwrap()[0];
        assert_eq!(report.message, "\"items[0].qty\" must be greater than or equal to 1");
        assert_eq!(serde_json::to_value(&report.path).unwrap(), json!(["items", 0, "qty"]));
        assert_eq!(report.context_value("key"), Some(&json!("qty")));
    }

    #[test]
    fn collects_every_error_when_asked() {
        let schema = object()
            .keys([
                ("a", number()),
                ("b", string().required()),
                ("c", boolean()),
            ])
            .unwrap();
        let value = json!({ "a": "x", "c": "maybe", "d": 1 });
        assert_eq!(codes(&schema.validate(&value).unwrap()).len(), 1);
        assert_eq!(
            codes(&schema.validate_with(Some(&value), &all_errors()).unwrap()),
            vec!["number.base", "any.required", "boolean.base", "object.unknown"]
        );
    }

    #[test]
    fn schema_level_prefs_apply_to_the_subtree() {
        let schema = object()
            .keys([(
                "loose",
                object().prefs(json!({ "allowUnknown": true })).unwrap(),
            )])
            .unwrap();
        assert!(schema.validate(&json!({ "loose": { "x": 1 } })).unwrap().is_valid());
        assert!(!schema.validate(&json!({ "loose": {}, "x": 1 })).unwrap().is_valid());
    }

    #[test]
    fn preferences_reject_unknown_keys() {
        let err = Preferences::from_json(&json!({ "nope": true })).unwrap_err();
        assert_eq!(err.to_string(), "\"nope\" is not allowed");
        let err = Preferences::from_json(&json!({ "convert": 1 })).unwrap_err();
        assert_eq!(err.to_string(), "\"convert\" must be a boolean");
    }

    #[test]
    fn convert_off_keeps_strings() {
        let prefs = Preferences::default().convert(false);
        assert_eq!(
            codes(&number().validate_with(Some(&json!("1")), &prefs).unwrap()),
            vec!["number.base"]
        );
    }

    #[test]
    fn alternatives_report_types() {
        let schema = alternatives().try_schemas([number(), boolean()]).unwrap();
        let result = schema.validate(&json!("x")).unwrap();
        let error = result.error.unwrap();
        let report = &error.details().unwrap()[0];
        assert_eq!(report.code, "alternatives.types");
        assert_eq!(report.context_value("types"), Some(&json!(["number", "boolean"])));
    }

    #[test]
    fn attempt_returns_the_sanitized_value() {
        let schema = object().keys([("n", number())]).unwrap();
        let value = schema.attempt(&json!({ "n": "2" }), &Preferences::default()).unwrap();
        assert_eq!(value, Some(json!({ "n": 2 })));
        assert!(schema.attempt(&json!({ "n": "x" }), &Preferences::default()).is_err());
    }

    #[test]
    fn matches_is_a_boolean_check() {
        assert!(number().matches(&json!(1)).unwrap());
        assert!(!number().matches(&json!("x")).unwrap());
    }
}

mod extension {
    use super::*;

    fn even() -> Schema {
        TypeBuilder::new("even", &number())
            .rule(
                RuleDef::new("divisible", |value: &Value, args, helpers| {
                    let by = args.get("by").cloned().unwrap_or(json!(2));
                    match (value.as_f64(), by.as_f64()) {
                        (Some(n), Some(d)) if n % d != 0.0 => {
                            Err(helpers.error("even.divisible", context([("by", by)])))
                        }
                        _ => Ok(None),
                    }
                })
                .arg(ArgDef::new("by").assert(Value::is_number, "must be a number")),
            )
            .messages(
                Messages::from_pairs([("even.divisible", "{{#label}} must divide by {{#by}}")]).unwrap(),
            )
            .build()
            .unwrap()
    }

    fn context<const N: usize>(entries: [(&str, Value); N]) -> serde_json::Map<String, Value> {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn derived_types_keep_base_behaviour() {
        let schema = even().add_rule(RuleSpec::new("divisible").arg("by", 3)).unwrap();
        assert!(schema.validate(&json!("9")).unwrap().is_valid());
        assert_eq!(
            schema.validate(&json!(4)).unwrap().error.unwrap().to_string(),
            "\"value\" must divide by 3"
        );
        // Inherited rules still apply
        let bounded = schema.min(10).unwrap();
        assert_eq!(codes(&bounded.validate(&json!(9)).unwrap()), vec!["number.min"]);
    }

    #[test]
    fn rule_arguments_are_checked() {
        let err = even()
            .add_rule(RuleSpec::new("divisible").arg("by", "x"))
            .unwrap_err();
        assert_eq!(err.to_string(), "by must be a number");
    }
}

mod rewriting {
    use super::*;

    #[test]
    fn rewrite_applies_a_policy_to_every_number() {
        let schema = object()
            .keys([
                ("a", number()),
                ("b", array().items([number()]).unwrap()),
                ("c", string()),
            ])
            .unwrap();
        let floored = schema
            .rewrite(|node: &Schema| -> Option<Schema> {
                (node.type_name() == "number").then(|| node.min(0).ok()).flatten()
            })
            .unwrap();
        assert!(schema.validate(&json!({ "a": -1 })).unwrap().is_valid());
        assert!(!floored.validate(&json!({ "a": -1 })).unwrap().is_valid());
        assert!(!floored.validate(&json!({ "b": [-1] })).unwrap().is_valid());
    }

    #[test]
    fn untouched_rewrites_share_the_tree() {
        let schema = object().keys([("a", number())]).unwrap();
        let same = schema.rewrite(|_: &Schema| -> Option<Schema> { None }).unwrap();
        assert!(Schema::ptr_eq(&schema, &same));
    }

    #[test]
    fn fork_and_extract_by_id() {
        let schema = object()
            .keys([("user", object().keys([("email", string().id("mail").unwrap())]).unwrap())])
            .unwrap();
        assert_eq!(schema.extract("user.mail").unwrap().type_name(), "string");

        let forked = schema.fork(["user.mail"], |s| s.required()).unwrap();
        assert!(schema.validate(&json!({ "user": {} })).unwrap().is_valid());
        assert!(!forked.validate(&json!({ "user": {} })).unwrap().is_valid());
    }
}

mod descriptions {
    use super::*;

    #[test]
    fn literals_and_descriptions_agree() {
        let literal = compile(&json!({ "mode": ["a", "b"] }));
        let described = build(&json!({
            "type": "object",
            "keys": { "mode": { "type": "any", "valid": ["a", "b"] } }
        }))
        .unwrap();
        for value in [json!({ "mode": "a" }), json!({ "mode": "c" }), json!({ "other": 1 })] {
            assert_eq!(
                literal.validate(&value).unwrap().is_valid(),
                described.validate(&value).unwrap().is_valid()
            );
        }
    }

    #[test]
    fn descriptions_support_references() {
        let schema = build(&json!({
            "type": "object",
            "keys": {
                "password": { "type": "string" },
                "confirm": { "type": "string", "valid": [{ "$ref": "password" }] }
            }
        }))
        .unwrap();
        assert!(schema
            .validate(&json!({ "password": "x", "confirm": "x" }))
            .unwrap()
            .is_valid());
        assert_eq!(
            codes(&schema.validate(&json!({ "password": "x", "confirm": "y" })).unwrap()),
            vec!["any.only"]
        );
    }
}
