//! Component constructors and their prop schemas.
//!
//! Scripts build trees through helpers such as `tray.button("Save", { onClick })`.
//! Each helper ends up in [`build`], which validates the arguments against
//! the component's schema, fills defaults and mints a node
//! `{id, type, props, key?}`.

use harbor_capabilities::CapabilityError;
use harbor_capabilities::dom_filter::{is_dangerous_url, is_unsafe_css};
use serde_json::{Map, Value, json};

use crate::error::{RuntimeError, RuntimeResult};

/// JSON type of a prop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropType {
    /// A string.
    String,
    /// A number.
    Number,
    /// A boolean.
    Boolean,
    /// An array.
    Array,
    /// An object.
    Object,
}

impl PropType {
    /// Name used in error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether `value` has this type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// Default of an omitted prop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropDefault {
    /// Omitted props stay absent.
    None,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A string.
    Str(&'static str),
}

impl PropDefault {
    fn to_value(self) -> Option<Value> {
        match self {
            Self::None => None,
            Self::Bool(b) => Some(json!(b)),
            Self::Int(n) => Some(json!(n)),
            Self::Str(s) => Some(json!(s)),
        }
    }
}

/// Declaration of one prop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropSpec {
    /// Prop name.
    pub name: &'static str,
    /// Expected type.
    pub kind: PropType,
    /// Whether the prop must be present after defaults.
    pub required: bool,
    /// Value of an omitted prop.
    pub default: PropDefault,
    /// Whether the prop may be passed as the first positional argument.
    pub shorthand: bool,
}

impl PropSpec {
    const fn new(name: &'static str, kind: PropType) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: PropDefault::None,
            shorthand: false,
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn shorthand(mut self) -> Self {
        self.shorthand = true;
        self
    }

    const fn default(mut self, value: PropDefault) -> Self {
        self.default = value;
        self
    }
}

/// A component type and its props.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentSpec {
    /// Node type.
    pub kind: &'static str,
    /// Accepted props.
    pub props: &'static [PropSpec],
}

impl ComponentSpec {
    fn shorthand(&self) -> Option<&PropSpec> {
        self.props.iter().find(|p| p.shorthand)
    }

    fn prop(&self, name: &str) -> Option<&PropSpec> {
        self.props.iter().find(|p| p.name == name)
    }
}

use PropType::{Array, Boolean, Number, Object, String as Str};

const STYLE: PropSpec = PropSpec::new("style", Object);
const ITEMS: PropSpec = PropSpec::new("items", Array).shorthand();
const LABEL: PropSpec = PropSpec::new("label", Str).required().shorthand();
const ON_CHANGE: PropSpec = PropSpec::new("onChange", Str);
const FIELD_REF: PropSpec = PropSpec::new("fieldRef", Object);
const DISABLED: PropSpec = PropSpec::new("disabled", Boolean).default(PropDefault::Bool(false));
const SIZE: PropSpec = PropSpec::new("size", Str);
const OPTIONS: PropSpec = PropSpec::new("options", Array).required();

/// Every component scripts may build.
pub const COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec {
        kind: "div",
        props: &[ITEMS, STYLE],
    },
    ComponentSpec {
        kind: "flex",
        props: &[
            ITEMS,
            STYLE,
            PropSpec::new("gap", Number).default(PropDefault::Int(2)),
            PropSpec::new("direction", Str).default(PropDefault::Str("row")),
        ],
    },
    ComponentSpec {
        kind: "stack",
        props: &[ITEMS, STYLE, PropSpec::new("gap", Number).default(PropDefault::Int(2))],
    },
    ComponentSpec {
        kind: "text",
        props: &[PropSpec::new("text", Str).required().shorthand(), STYLE],
    },
    ComponentSpec {
        kind: "button",
        props: &[
            LABEL,
            PropSpec::new("onClick", Str),
            STYLE,
            PropSpec::new("intent", Str),
            DISABLED,
            PropSpec::new("loading", Boolean).default(PropDefault::Bool(false)),
            SIZE,
        ],
    },
    ComponentSpec {
        kind: "input",
        props: &[
            LABEL,
            PropSpec::new("placeholder", Str),
            PropSpec::new("value", Str).default(PropDefault::Str("")),
            ON_CHANGE,
            FIELD_REF,
            STYLE,
            DISABLED,
            SIZE,
        ],
    },
    ComponentSpec {
        kind: "select",
        props: &[
            LABEL,
            PropSpec::new("placeholder", Str),
            OPTIONS,
            PropSpec::new("value", Str).default(PropDefault::Str("")),
            ON_CHANGE,
            FIELD_REF,
            STYLE,
            DISABLED,
            SIZE,
        ],
    },
    ComponentSpec {
        kind: "switch",
        props: &[
            LABEL,
            PropSpec::new("value", Boolean).default(PropDefault::Bool(false)),
            ON_CHANGE,
            FIELD_REF,
            STYLE,
            DISABLED,
            SIZE,
            PropSpec::new("side", Str),
        ],
    },
    ComponentSpec {
        kind: "checkbox",
        props: &[
            LABEL,
            PropSpec::new("value", Boolean).default(PropDefault::Bool(false)),
            ON_CHANGE,
            FIELD_REF,
            STYLE,
            DISABLED,
            SIZE,
        ],
    },
    ComponentSpec {
        kind: "radio-group",
        props: &[
            LABEL,
            PropSpec::new("value", Str).default(PropDefault::Str("")),
            OPTIONS,
            ON_CHANGE,
            FIELD_REF,
            STYLE,
            DISABLED,
            SIZE,
        ],
    },
    ComponentSpec {
        kind: "anchor",
        props: &[
            PropSpec::new("text", Str).required().shorthand(),
            PropSpec::new("href", Str).required(),
            PropSpec::new("target", Str).default(PropDefault::Str("_blank")),
            PropSpec::new("onClick", Str),
            STYLE,
        ],
    },
    ComponentSpec {
        kind: "tabs",
        props: &[ITEMS, PropSpec::new("defaultValue", Str), STYLE],
    },
    ComponentSpec {
        kind: "tabs-list",
        props: &[ITEMS, STYLE],
    },
    ComponentSpec {
        kind: "tabs-trigger",
        props: &[
            PropSpec::new("text", Str).required().shorthand(),
            PropSpec::new("value", Str).required(),
            STYLE,
        ],
    },
    ComponentSpec {
        kind: "tabs-content",
        props: &[ITEMS, PropSpec::new("value", Str).required(), STYLE],
    },
    ComponentSpec {
        kind: "modal",
        props: &[
            ITEMS,
            PropSpec::new("trigger", Object),
            PropSpec::new("title", Str),
            PropSpec::new("description", Str),
            PropSpec::new("footer", Array),
            PropSpec::new("open", Boolean),
            PropSpec::new("onOpenChange", Str),
            STYLE,
        ],
    },
    ComponentSpec {
        kind: "tooltip",
        props: &[
            PropSpec::new("text", Str).required().shorthand(),
            PropSpec::new("item", Object),
            PropSpec::new("side", Str),
            STYLE,
        ],
    },
    ComponentSpec {
        kind: "badge",
        props: &[
            PropSpec::new("text", Str).required().shorthand(),
            PropSpec::new("intent", Str).default(PropDefault::Str("gray")),
            SIZE,
            STYLE,
        ],
    },
    ComponentSpec {
        kind: "alert",
        props: &[
            PropSpec::new("title", Str).required().shorthand(),
            PropSpec::new("description", Str),
            PropSpec::new("intent", Str).default(PropDefault::Str("info")),
            STYLE,
        ],
    },
    ComponentSpec {
        kind: "css",
        props: &[PropSpec::new("css", Str).required().shorthand()],
    },
];

/// Schema of component `kind`.
#[must_use]
pub fn spec(kind: &str) -> Option<&'static ComponentSpec> {
    COMPONENTS.iter().find(|c| c.kind == kind)
}

/// Build a node of type `kind` from the helper's positional arguments.
///
/// # Errors
///
/// - [`RuntimeError::InvalidArgument`] for unknown components, missing
///   required props and props of the wrong type.
/// - [`RuntimeError::Unauthorized`] when a URL or stylesheet is refused by
///   the DOM safety filter.
pub fn build(kind: &str, args: &[Value]) -> RuntimeResult<Value> {
    let op = format!("ui.{kind}");
    let spec = spec(kind).ok_or_else(|| RuntimeError::invalid_argument(&op, format!("unknown component {kind}")))?;

    let mut props = Map::new();
    let mut key = None;
    let mut take_object = |object: &Map<String, Value>, props: &mut Map<String, Value>| {
        for (name, value) in object {
            if name == "key" {
                key = value.as_str().map(str::to_string);
            } else if spec.prop(name).is_some() && !value.is_null() {
                props.insert(name.clone(), value.clone());
            }
        }
    };

    match (args.first(), spec.shorthand()) {
        (Some(first), Some(short)) if short.kind != Object && short.kind.matches(first) => {
            props.insert(short.name.to_string(), first.clone());
            if let Some(Value::Object(rest)) = args.get(1) {
                take_object(rest, &mut props);
            }
        },
        (Some(Value::Object(object)), _) => take_object(object, &mut props),
        (Some(Value::Null) | None, _) => {},
        (Some(other), _) => {
            return Err(RuntimeError::invalid_argument(
                &op,
                format!("expected props object, got {}", json_type(other)),
            ));
        },
    }

    for prop in spec.props {
        match props.get(prop.name) {
            Some(value) if !prop.kind.matches(value) => {
                return Err(RuntimeError::invalid_argument(
                    &op,
                    format!("{} must be a {}, got {}", prop.name, prop.kind.as_str(), json_type(value)),
                ));
            },
            Some(_) => {},
            None => match prop.default.to_value() {
                Some(default) => {
                    props.insert(prop.name.to_string(), default);
                },
                None if prop.required => {
                    return Err(RuntimeError::invalid_argument(&op, format!("{} is required", prop.name)));
                },
                None => {},
            },
        }
    }

    check_content(&op, &props)?;

    let mut node = json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "type": kind,
        "props": props,
    });
    if let Some(key) = key.filter(|k| !k.is_empty()) {
        node["key"] = Value::String(key);
    }
    Ok(node)
}

fn check_content(op: &str, props: &Map<String, Value>) -> RuntimeResult<()> {
    if let Some(options) = props.get("options").and_then(Value::as_array) {
        let valid = options
            .iter()
            .all(|o| o.get("label").is_some() && o.get("value").is_some());
        if !valid {
            return Err(RuntimeError::invalid_argument(
                op,
                "options must be objects with a label and a value",
            ));
        }
    }
    if let Some(href) = props.get("href").and_then(Value::as_str)
        && is_dangerous_url(href)
    {
        return Err(denied(op, href));
    }
    if let Some(css) = props.get("css").and_then(Value::as_str)
        && is_unsafe_css(css)
    {
        return Err(denied(op, "stylesheet"));
    }
    Ok(())
}

pub(crate) fn denied(op: &str, resource: &str) -> RuntimeError {
    RuntimeError::Unauthorized(CapabilityError::Unauthorized {
        operation: op.to_string(),
        resource: resource.to_string(),
        reason: Some("blocked by the DOM safety filter".into()),
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_shorthand_and_defaults() {
        let node = build("button", &[json!("Save"), json!({ "onClick": "save", "bogus": 1 })]).unwrap();
        assert_eq!(node["type"], "button");
        assert_eq!(node["props"]["label"], "Save");
        assert_eq!(node["props"]["onClick"], "save");
        assert_eq!(node["props"]["disabled"], false);
        assert!(node["props"].get("bogus").is_none());
        assert_eq!(node["id"].as_str().unwrap().len(), 36);
    }

    #[test]
    fn test_object_form_and_key() {
        let node = build("flex", &[json!({ "items": [], "key": "row-1" })]).unwrap();
        assert_eq!(node["key"], "row-1");
        assert_eq!(node["props"]["gap"], 2);
        assert_eq!(node["props"]["direction"], "row");
        let stack = build("stack", &[json!([node])]).unwrap();
        assert_eq!(stack["props"]["items"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_validation_errors() {
        let err = build("text", &[]).unwrap_err();
        assert!(err.to_string().contains("text is required"), "{err}");
        let err = build("button", &[json!({ "label": 3 })]).unwrap_err();
        assert!(err.to_string().contains("label must be a string"), "{err}");
        let err = build("select", &[json!("Pick"), json!({ "options": [{ "label": "a" }] })]).unwrap_err();
        assert!(err.to_string().contains("label and a value"));
        assert!(build("marquee", &[]).is_err());
    }

    #[test]
    fn test_filter_on_links_and_css() {
        let err = build("anchor", &[json!("x"), json!({ "href": "javascript:alert(1)" })]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        let err = build("css", &[json!("body { background: url(javascript:x) }")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(build("anchor", &[json!("x"), json!({ "href": "https://example.org" })]).is_ok());
    }

    #[test]
    fn test_every_component_has_one_shorthand_at_most() {
        for c in COMPONENTS {
            assert!(c.props.iter().filter(|p| p.shorthand).count() <= 1, "{}", c.kind);
        }
        assert!(spec("radio-group").is_some());
    }
}
