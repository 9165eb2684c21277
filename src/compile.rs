//! Literal to schema compilation.

use serde_json::Value;

use crate::catalog::{alternatives, any, object};
use crate::schema::{Child, Match, Schema};
use crate::values::Entry;

/// Compile a literal into a schema.
///
/// Primitives accept exactly themselves. An array of primitives accepts
/// any of its members (replacing, not extending, earlier allowed values
/// when concatenated); an array holding objects or arrays becomes
/// alternatives of the compiled members. Objects become object schemas
/// whose keys are compiled recursively. An empty array accepts anything.
pub fn compile(value: &Value) -> Schema {
    match value {
        Value::Array(items) if items.is_empty() => any(),
        Value::Array(items) if items.iter().all(is_primitive) => {
            let mut node = any().node().clone();
            node.valids.clear();
            for item in items {
                node.valids.add(Entry::Literal(item.clone()));
            }
            node.flags.only = Some(true);
            Schema::from_node(node)
        }
        Value::Array(items) => {
            let mut node = alternatives().node().clone();
            node.terms.matches = items.iter().map(|item| Match::Schema(compile(item))).collect();
            node.refresh_refs();
            Schema::from_node(node)
        }
        Value::Object(map) => {
            let mut node = object().node().clone();
            node.terms.keys = Some(
                map.iter()
                    .map(|(key, value)| Child {
                        key: key.clone(),
                        schema: compile(value),
                    })
                    .collect(),
            );
            node.refresh_refs();
            Schema::from_node(node)
        }
        primitive => Schema::only_values(vec![Entry::Literal(primitive.clone())]),
    }
}

fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::string;
    use serde_json::json;

    #[test]
    fn primitives_accept_only_themselves() {
        let schema = compile(&json!("a"));
        assert!(schema.validate(&json!("a")).unwrap().is_valid());
        assert!(!schema.validate(&json!("b")).unwrap().is_valid());
        assert!(compile(&json!(null)).validate(&json!(null)).unwrap().is_valid());
    }

    #[test]
    fn primitive_arrays_override_allowed_values() {
        let schema = compile(&json!([1, "x"]));
        assert!(schema.valids().is_override());
        assert!(schema.validate(&json!("x")).unwrap().is_valid());

        let merged = string().allow(["y"]).unwrap().concat(&schema).unwrap();
        assert_eq!(merged.valids().len(), 2);
    }

    #[test]
    fn nested_arrays_become_alternatives() {
        let schema = compile(&json!([{ "a": 1 }, 2]));
        assert_eq!(schema.type_name(), "alternatives");
        assert!(schema.validate(&json!({ "a": 1 })).unwrap().is_valid());
        assert!(schema.validate(&json!(2)).unwrap().is_valid());
        assert!(!schema.validate(&json!(3)).unwrap().is_valid());
    }

    #[test]
    fn objects_compile_keys() {
        let schema = compile(&json!({ "a": 1, "b": [true, false] }));
        assert_eq!(schema.key_names(), vec!["a", "b"]);
        assert!(schema.validate(&json!({ "a": 1, "b": false })).unwrap().is_valid());
        assert!(!schema.validate(&json!({ "a": 2 })).unwrap().is_valid());
    }
}
