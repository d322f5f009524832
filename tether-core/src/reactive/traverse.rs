//! Deep traversal for deep-watch computations.
//!
//! Reads every reachable value through the tracked accessors so that each
//! nested property subject and each wrapped container subject registers
//! against the active computation.

use std::collections::HashSet;

use crate::reactive::Runtime;
use crate::state::Value;

/// Touch everything reachable from `value`.
pub fn traverse(rt: &Runtime, value: &Value) {
    let mut seen = HashSet::new();
    visit(rt, value, &mut seen);
}

fn visit(rt: &Runtime, value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Object(object) => {
            if object.is_raw() || !seen.insert(object.addr()) {
                return;
            }
            if let Some(observer) = object.observer() {
                observer.subject().record(rt);
            }
            for key in object.keys_untracked() {
                let child = object.get(rt, &key);
                visit(rt, &child, seen);
            }
        }
        Value::Array(array) => {
            if array.is_raw() || !seen.insert(array.addr()) {
                return;
            }
            if let Some(observer) = array.observer() {
                observer.subject().record(rt);
            }
            for child in array.to_vec_untracked() {
                visit(rt, &child, seen);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ComputationOptions;
    use crate::state::{Array, Object};
    use serde_json::json;

    #[test]
    fn deep_evaluation_records_nested_subjects() {
        let rt = Runtime::default();
        let data = Value::from(json!({ "a": { "b": [1, { "c": 2 }] } }));
        rt.observe(&data);

        let root = data.clone();
        let computation = rt
            .computation(
                move |_| Ok(root.clone()),
                |_, _, _| Ok(()),
                ComputationOptions::new().deep(),
            )
            .unwrap();

        // root container, a, a's container, b, b's container, {c}'s
        // container, c
        assert_eq!(computation.dependency_ids().len(), 7);
    }

    #[test]
    fn traverse_terminates_on_cycles() {
        let rt = Runtime::default();
        let object = Object::new();
        let list = Array::new();
        object.insert_untracked("list", Value::Array(list.clone()));
        list.push_untracked(Value::Object(object.clone()));

        traverse(&rt, &Value::Object(object));
    }
}
