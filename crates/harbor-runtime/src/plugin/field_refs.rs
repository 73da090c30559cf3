//! Externally addressable field values.
//!
//! A field ref names an input the client renders. The plugin pushes values
//! with `fieldref:set-value`; the client reports edits with
//! `fieldref:send-value`, which updates the ref's current value.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::error::{RuntimeError, RuntimeResult};

/// Field refs of one plugin.
#[derive(Debug)]
pub struct FieldRefs {
    max: usize,
    refs: HashMap<String, Value>,
}

impl FieldRefs {
    /// Allow at most `max` refs.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            max,
            refs: HashMap::new(),
        }
    }

    /// Create a ref, named `name` or a fresh uuid.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidArgument`] when the limit is reached.
    pub fn create(&mut self, name: Option<&str>, initial: Value) -> RuntimeResult<String> {
        let id = name
            .filter(|n| !n.is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
        if !self.refs.contains_key(&id) && self.refs.len() >= self.max {
            return Err(RuntimeError::invalid_argument(
                "ui.fieldRef",
                format!("at most {} field refs per plugin", self.max),
            ));
        }
        self.refs.insert(id.clone(), initial);
        Ok(id)
    }

    /// Current value of `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.refs.get(id)
    }

    /// Record a value reported by the client. Unknown refs are ignored.
    pub fn set_local(&mut self, id: &str, value: Value) -> bool {
        match self.refs.get_mut(id) {
            Some(slot) => {
                *slot = value;
                true
            },
            None => false,
        }
    }

    /// Set `id` and build the `fieldref:set-value` payload.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidArgument`] for unknown refs.
    pub fn set(&mut self, id: &str, value: Value) -> RuntimeResult<Value> {
        if !self.set_local(id, value.clone()) {
            return Err(RuntimeError::invalid_argument(
                "ui.fieldRefSet",
                format!("unknown field ref {id}"),
            ));
        }
        Ok(json!({ "fieldRef": id, "value": value }))
    }

    /// Number of refs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Whether no ref exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}
