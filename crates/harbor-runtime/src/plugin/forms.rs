//! Named forms rendered inside trays and webviews.
//!
//! Fields are plain nodes produced by typed constructors. A form render
//! wraps them into one `form` node carrying the form name; the client
//! answers a submit with `tray:form-submitted {formName, data}`.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::error::{RuntimeError, RuntimeResult};

/// Field constructors and the field type each produces.
pub const FIELD_KINDS: &[(&str, &str)] = &[
    ("inputField", "input"),
    ("numberField", "number"),
    ("selectField", "select"),
    ("checkboxField", "checkbox"),
    ("switchField", "switch"),
    ("radioField", "radio"),
    ("dateField", "date"),
    ("submitButton", "submit"),
];

/// Field type produced by constructor `constructor`.
#[must_use]
pub fn field_type(constructor: &str) -> Option<&'static str> {
    FIELD_KINDS
        .iter()
        .find(|(name, _)| *name == constructor)
        .map(|(_, kind)| *kind)
}

/// Build a field node.
///
/// `name` is required for every field except the submit button, whose
/// first argument is its label.
///
/// # Errors
///
/// [`RuntimeError::InvalidArgument`] for unknown constructors, a missing
/// name, or select and radio fields without options.
pub fn field(constructor: &str, name: Option<&str>, options: &Value) -> RuntimeResult<Value> {
    let op = format!("form.{constructor}");
    let kind = field_type(constructor)
        .ok_or_else(|| RuntimeError::invalid_argument(&op, format!("unknown field {constructor}")))?;

    let mut props: Map<String, Value> = options.as_object().cloned().unwrap_or_default();
    props.insert("fieldType".into(), json!(kind));
    if kind == "submit" {
        if let Some(label) = name {
            props.insert("label".into(), json!(label));
        }
        props.entry("label").or_insert_with(|| json!("Submit"));
    } else {
        let name = name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| RuntimeError::invalid_argument(&op, "field name is required"))?;
        props.insert("name".into(), json!(name));
        props.entry("label").or_insert_with(|| json!(name));
    }
    if matches!(kind, "select" | "radio") {
        let valid = props
            .get("options")
            .and_then(Value::as_array)
            .is_some_and(|o| o.iter().all(|i| i.get("label").is_some() && i.get("value").is_some()));
        if !valid {
            return Err(RuntimeError::invalid_argument(
                &op,
                "options must be objects with a label and a value",
            ));
        }
    }

    Ok(json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "type": "field",
        "props": props,
    }))
}

/// Build the `form` node of form `name`.
///
/// `config.fields` holds the field nodes; every other key is passed through
/// as a prop.
///
/// # Errors
///
/// [`RuntimeError::InvalidArgument`] if `fields` is not an array.
pub fn render(name: &str, config: &Value) -> RuntimeResult<Value> {
    let mut props: Map<String, Value> = config.as_object().cloned().unwrap_or_default();
    match props.get("fields") {
        None | Some(Value::Null) => {
            props.insert("fields".into(), json!([]));
        },
        Some(Value::Array(_)) => {},
        Some(_) => return Err(RuntimeError::invalid_argument("form.render", "fields must be an array")),
    }
    props.insert("name".into(), json!(name));
    Ok(json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "type": "form",
        "props": props,
    }))
}

/// `form:set-values` payload.
#[must_use]
pub fn set_values(name: &str, data: Value) -> Value {
    json!({ "formName": name, "data": data })
}

/// `form:reset` payload. `field` limits the reset to one field.
#[must_use]
pub fn reset(name: &str, field: Option<&str>) -> Value {
    json!({ "formName": name, "fieldToReset": field.unwrap_or_default() })
}

/// Submit handlers by form name.
#[derive(Debug, Default)]
pub struct Forms {
    handlers: HashMap<String, Vec<u64>>,
}

impl Forms {
    /// Register script callback `callback` for submissions of `name`.
    pub fn on_submit(&mut self, name: &str, callback: u64) {
        self.handlers.entry(name.to_string()).or_default().push(callback);
    }

    /// Callbacks to invoke for a submission of `name`.
    #[must_use]
    pub fn handlers(&self, name: &str) -> Vec<u64> {
        self.handlers.get(name).cloned().unwrap_or_default()
    }

    /// Forget every handler, returning their callbacks.
    pub fn clear(&mut self) -> Vec<u64> {
        self.handlers.drain().flat_map(|(_, cbs)| cbs).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_constructors() {
        let f = field("inputField", Some("title"), &json!({ "placeholder": "Title" })).unwrap();
        assert_eq!(f["type"], "field");
        assert_eq!(f["props"]["fieldType"], "input");
        assert_eq!(f["props"]["name"], "title");
        assert_eq!(f["props"]["label"], "title");
        assert_eq!(f["props"]["placeholder"], "Title");

        let s = field("submitButton", Some("Save"), &Value::Null).unwrap();
        assert_eq!(s["props"]["label"], "Save");
        assert!(field("inputField", None, &Value::Null).is_err());
        assert!(field("colorField", Some("c"), &Value::Null).is_err());
        assert!(field("selectField", Some("s"), &json!({ "options": [] })).is_ok());
        assert!(field("radioField", Some("r"), &Value::Null).is_err());
        assert_eq!(FIELD_KINDS.len(), 8);
    }

    #[test]
    fn test_render_and_payloads() {
        let f = field("numberField", Some("count"), &Value::Null).unwrap();
        let form = render("settings", &json!({ "fields": [f], "submitLabel": "Go" })).unwrap();
        assert_eq!(form["type"], "form");
        assert_eq!(form["props"]["name"], "settings");
        assert_eq!(form["props"]["submitLabel"], "Go");
        assert_eq!(form["props"]["fields"].as_array().unwrap().len(), 1);
        assert!(render("x", &json!({ "fields": 3 })).is_err());

        assert_eq!(
            set_values("settings", json!({ "count": 2 })),
            json!({ "formName": "settings", "data": { "count": 2 } })
        );
        assert_eq!(reset("settings", None)["fieldToReset"], "");
        assert_eq!(reset("settings", Some("count"))["fieldToReset"], "count");
    }

    #[test]
    fn test_handlers() {
        let mut forms = Forms::default();
        forms.on_submit("a", 1);
        forms.on_submit("a", 2);
        assert_eq!(forms.handlers("a"), vec![1, 2]);
        assert!(forms.handlers("b").is_empty());
        let mut all = forms.clear();
        all.sort_unstable();
        assert_eq!(all, vec![1, 2]);
    }
}
