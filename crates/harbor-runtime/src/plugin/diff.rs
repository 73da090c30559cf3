//! Structural reconciliation of component trees.
//!
//! Every render builds a fresh tree whose nodes carry freshly minted ids.
//! Reconciling it against the previous tree hands the old id to every node
//! that still occupies the same place, matched by `key` first and then by
//! position and type, so the client keeps per-node state across renders.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Reconcile `new` against `old` and return `new` with inherited ids.
#[must_use]
pub fn diff(old: &Value, new: Value) -> Value {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => Value::Object(diff_node(old, new)),
        (Value::Array(old), Value::Array(new)) => Value::Array(diff_array(old, new)),
        (_, new) => new,
    }
}

fn type_of(value: &Value) -> Option<&Value> {
    value.as_object().and_then(|m| m.get("type"))
}

fn key_of(value: &Value) -> Option<&str> {
    value
        .get("key")
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
}

fn diff_node(old: &Map<String, Value>, mut new: Map<String, Value>) -> Map<String, Value> {
    let same_type = match (old.get("type"), new.get("type")) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    if !same_type {
        return new;
    }
    if let Some(id) = old.get("id") {
        new.insert("id".to_string(), id.clone());
    }
    if let Some(Value::Object(old_props)) = old.get("props")
        && let Some(Value::Object(new_props)) = new.get_mut("props")
    {
        for (name, value) in new_props.iter_mut() {
            if let Some(previous) = old_props.get(name) {
                *value = diff(previous, std::mem::take(value));
            }
        }
    }
    if let Some(previous) = old.get("children")
        && let Some(children) = new.get_mut("children")
    {
        *children = diff(previous, std::mem::take(children));
    }
    new
}

fn diff_array(old: &[Value], new: Vec<Value>) -> Vec<Value> {
    let keyed: HashMap<&str, &Value> = old.iter().filter_map(|v| key_of(v).map(|k| (k, v))).collect();
    new.into_iter()
        .enumerate()
        .map(|(i, node)| {
            let by_key = key_of(&node).and_then(|k| keyed.get(k).copied());
            let matched = by_key.or_else(|| {
                old.get(i).filter(|o| {
                    let old_type = type_of(o).and_then(Value::as_str);
                    old_type.is_some() && old_type == type_of(&node).and_then(Value::as_str)
                })
            });
            match matched {
                Some(previous) => diff(previous, node),
                None => node,
            }
        })
        .collect()
}

/// The last tree sent for one render target.
#[derive(Debug, Default)]
pub struct Reconciler {
    last: Option<Value>,
}

impl Reconciler {
    /// Reconcile `tree` against the previous one and remember the result.
    /// The first tree is returned unchanged and becomes the baseline.
    pub fn apply(&mut self, tree: Value) -> Value {
        let out = match &self.last {
            Some(previous) => diff(previous, tree),
            None => tree,
        };
        self.last = Some(out.clone());
        out
    }

    /// Forget the baseline.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// The last tree returned by [`apply`](Self::apply).
    #[must_use]
    pub fn last(&self) -> Option<&Value> {
        self.last.as_ref()
    }
}
