#![forbid(unsafe_code)]

//! Declarative view compiler.
//!
//! A view description is JSON:
//!
//! - an array compiles to a fragment holding each compiled item;
//! - an object with `type` instantiates that registered component class;
//! - any other object is an element with `tag` (or the configured default);
//! - a scalar is a text leaf.
//!
//! Object keys `name`, `events`, `props` and `content` are structural. Entries
//! of `props` and every other key are properties: string values containing `{...}` become bindings, nested
//! objects and arrays are passed as [`ViewSpec`] values, anything else is
//! assigned as is.
//!
//! # Binding expressions
//!
//! The first brace-balanced `{...}` in a string is the expression; text around
//! it becomes a format (`"Hi {name}!"` formats as `Hi {0}!`). Inside the
//! braces, text up to the first comma is the path and the rest are binding
//! options (`direction=`, `converter=`, `format=`).
//!
//! | expression | source | path |
//! |------------|--------|------|
//! | `{}`       | node   | `model` |
//! | `{a.b}`    | node   | `model.a.b` |
//! | `{#a.b}`   | owner  | `a.b` |

use std::fmt;
use std::rc::Rc;

use weft_core::{Native, Object, Value, WeakObject};
use weft_runtime::{Bindable, BindingKind, BindingSpec};

use crate::component::{ABSTRACT_COMPONENT, ComponentExt};
use crate::element::{ELEMENT, ElementExt};
use crate::env::Env;
use crate::error::{Result, ViewError};

const STRUCTURAL_KEYS: [&str; 6] = ["type", "tag", "name", "events", "props", "content"];

/// An uncompiled view description plus the owner it was written for.
///
/// Stored as a [`Native`] value when a description is assigned to a
/// property, so consumers such as `template` can compile it later.
#[derive(Clone)]
pub struct ViewSpec {
    desc: Rc<serde_json::Value>,
    owner: Option<WeakObject>,
}

impl ViewSpec {
    #[must_use]
    pub fn new(desc: serde_json::Value, owner: Option<&Object>) -> Self {
        Self {
            desc: Rc::new(desc),
            owner: owner.map(Object::downgrade),
        }
    }

    #[must_use]
    pub fn desc(&self) -> &serde_json::Value {
        &self.desc
    }

    #[must_use]
    pub fn owner(&self) -> Option<Object> {
        self.owner.as_ref().and_then(WeakObject::upgrade)
    }

    /// The description read as plain data.
    #[must_use]
    pub fn data(&self) -> Value {
        Value::from_json(&self.desc)
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Native(Native::new(self))
    }

    #[must_use]
    pub fn from_value(value: &Value) -> Option<&ViewSpec> {
        value.as_native()?.downcast_ref::<ViewSpec>()
    }

    pub fn compile(&self) -> Result<Object> {
        compile(&self.desc, self.owner().as_ref())
    }

    /// Compile and append under `node`; arrays attach item by item.
    pub(crate) fn attach_to(&self, node: &Object) -> Result<()> {
        attach_children(node, &self.desc, self.owner().as_ref())
    }
}

impl fmt::Debug for ViewSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewSpec")
            .field("desc", &self.desc)
            .field("owner", &self.owner)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Binding expressions
// ---------------------------------------------------------------------------

/// A `{...}` expression located in a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingExpr<'a> {
    pub prefix: &'a str,
    pub inner: &'a str,
    pub suffix: &'a str,
}

/// Locate the first brace-balanced expression in `text`.
#[must_use]
pub fn find_binding(text: &str) -> Option<BindingExpr<'_>> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset;
                    return Some(BindingExpr {
                        prefix: &text[..start],
                        inner: &text[start + 1..end],
                        suffix: &text[end + 1..],
                    });
                }
            }
            _ => {}
        }
    }
    None
}

impl BindingExpr<'_> {
    /// The binding spec and source object for this expression on `node`.
    pub fn resolve(&self, node: &Object, owner: Option<&Object>) -> Result<(BindingSpec, Object)> {
        let (path, options) = match self.inner.split_once(',') {
            Some((path, options)) => (path.trim(), Some(options)),
            None => (self.inner.trim(), None),
        };
        let (path, source) = match path.strip_prefix('#') {
            Some(rest) => (
                rest.trim().to_string(),
                owner.cloned().unwrap_or_else(|| node.clone()),
            ),
            None if path.is_empty() => ("model".to_string(), node.clone()),
            None => (format!("model.{path}"), node.clone()),
        };
        let text = match options {
            Some(options) => format!("{path},{options}"),
            None => path,
        };
        let mut spec = BindingSpec::parse(&text)?;
        if !self.prefix.is_empty() || !self.suffix.is_empty() {
            let body = spec.format.take().unwrap_or_else(|| "{0}".to_string());
            spec.format = Some(format!("{}{body}{}", self.prefix, self.suffix));
        }
        Ok((spec, source))
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile `desc` in the current [`Env`]. `owner` becomes the owner of every
/// created node and the source of `#` bindings.
pub fn compile(desc: &serde_json::Value, owner: Option<&Object>) -> Result<Object> {
    compile_node(&Env::current(), desc, owner)
}

/// Compile `desc` with `env` made current for the duration.
pub fn compile_in(env: &Env, desc: &serde_json::Value, owner: Option<&Object>) -> Result<Object> {
    let _guard = env.enter();
    compile_node(env, desc, owner)
}

fn compile_node(env: &Env, desc: &serde_json::Value, owner: Option<&Object>) -> Result<Object> {
    match desc {
        serde_json::Value::Array(items) => {
            let fragment = create_element(env, &env.config().fragment_tag, owner)?;
            for item in items {
                compile_node(env, item, owner)?.attach_to(&fragment, None)?;
            }
            Ok(fragment)
        }
        serde_json::Value::Object(map) => compile_object(env, map, owner),
        scalar => compile_scalar_in(env, scalar, owner),
    }
}

fn create_element(env: &Env, tag: &str, owner: Option<&Object>) -> Result<Object> {
    let node = env
        .registry()
        .instantiate(ELEMENT, &[Value::from(tag)])?;
    node.set_owner(owner);
    Ok(node)
}

fn compile_object(
    env: &Env,
    map: &serde_json::Map<String, serde_json::Value>,
    owner: Option<&Object>,
) -> Result<Object> {
    let tag = match map.get("tag") {
        None => None,
        Some(serde_json::Value::String(tag)) => Some(tag.as_str()),
        Some(_) => {
            return Err(ViewError::InvalidDescription {
                reason: "`tag` must be a string".to_string(),
            });
        }
    };
    let node = match map.get("type") {
        None => create_element(env, tag.unwrap_or(&env.config().default_tag), owner)?,
        Some(serde_json::Value::String(name)) => {
            let class = env
                .registry()
                .get(name)
                .ok_or_else(|| ViewError::UnknownType { name: name.clone() })?;
            if !class.is_named(ABSTRACT_COMPONENT) {
                return Err(ViewError::NotAComponent { name: name.clone() });
            }
            let args: Vec<Value> = match tag {
                Some(tag) if class.is_named(ELEMENT) => vec![Value::from(tag)],
                _ => Vec::new(),
            };
            let node = class.instantiate_with(&args)?;
            node.set_owner(owner);
            node
        }
        Some(_) => {
            return Err(ViewError::InvalidDescription {
                reason: "`type` must be a string".to_string(),
            });
        }
    };

    match map.get("name") {
        None => {}
        Some(serde_json::Value::String(name)) => node.set("name", name.as_str()),
        Some(_) => {
            return Err(ViewError::InvalidDescription {
                reason: "`name` must be a string".to_string(),
            });
        }
    }

    if let Some(events) = map.get("events") {
        let events = events.as_object().ok_or_else(|| ViewError::InvalidDescription {
            reason: "`events` must be an object".to_string(),
        })?;
        for (event, handler) in events {
            bind_event(env, &node, event, handler, owner)?;
        }
    }

    if let Some(props) = map.get("props") {
        let props = props.as_object().ok_or_else(|| ViewError::InvalidDescription {
            reason: "`props` must be an object".to_string(),
        })?;
        for (key, value) in props {
            apply_property(&node, key, value, owner)?;
        }
    }
    for (key, value) in map {
        if STRUCTURAL_KEYS.contains(&key.as_str()) {
            continue;
        }
        apply_property(&node, key, value, owner)?;
    }

    if let Some(content) = map.get("content") {
        attach_children_in(env, &node, content, owner)?;
    }
    Ok(node)
}

fn bind_event(
    env: &Env,
    node: &Object,
    event: &str,
    handler: &serde_json::Value,
    owner: Option<&Object>,
) -> Result<()> {
    let text = handler.as_str().ok_or_else(|| ViewError::InvalidDescription {
        reason: format!("handler for `{event}` must be a string"),
    })?;
    if node.element_kind().is_some() && !node.class().has_event(event) {
        node.listen(event);
    }
    let (spec, source) = match find_binding(text) {
        Some(expr) => expr.resolve(node, owner)?,
        None if env.config().resolve_event_methods => (
            BindingSpec::new(text.trim()),
            owner.cloned().unwrap_or_else(|| node.clone()),
        ),
        None => {
            return Err(ViewError::InvalidDescription {
                reason: format!("handler for `{event}` is not a binding: `{text}`"),
            });
        }
    };
    node.set_binding(event, spec.kind(BindingKind::Event), &source)?;
    Ok(())
}

fn apply_property(
    node: &Object,
    key: &str,
    value: &serde_json::Value,
    owner: Option<&Object>,
) -> Result<()> {
    match value {
        serde_json::Value::String(text) => match find_binding(text) {
            Some(expr) => {
                let (spec, source) = expr.resolve(node, owner)?;
                node.set_binding(key, spec, &source)?;
            }
            None => node.set(key, text.as_str()),
        },
        serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
            node.set(key, ViewSpec::new(value.clone(), owner).into_value());
        }
        scalar => node.set(key, Value::from_json(scalar)),
    }
    Ok(())
}

pub(crate) fn attach_children(
    node: &Object,
    content: &serde_json::Value,
    owner: Option<&Object>,
) -> Result<()> {
    attach_children_in(&Env::current(), node, content, owner)
}

fn attach_children_in(
    env: &Env,
    node: &Object,
    content: &serde_json::Value,
    owner: Option<&Object>,
) -> Result<()> {
    match content {
        serde_json::Value::Null => Ok(()),
        serde_json::Value::Array(items) => items
            .iter()
            .try_for_each(|item| compile_node(env, item, owner)?.attach_to(node, None)),
        single => compile_node(env, single, owner)?.attach_to(node, None),
    }
}

pub(crate) fn compile_scalar(json: &serde_json::Value, owner: Option<&Object>) -> Result<Object> {
    compile_scalar_in(&Env::current(), json, owner)
}

fn compile_scalar_in(env: &Env, json: &serde_json::Value, owner: Option<&Object>) -> Result<Object> {
    let leaf = create_element(env, &env.config().text_tag, owner)?;
    match json {
        serde_json::Value::String(text) => match find_binding(text) {
            Some(expr) => {
                let (spec, source) = expr.resolve(&leaf, owner)?;
                leaf.set_binding("text", spec, &source)?;
            }
            None => leaf.set("text", text.as_str()),
        },
        serde_json::Value::Null => {}
        other => leaf.set("text", Value::from_json(other)),
    }
    Ok(leaf)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;
    use weft_backend::MemoryBackend;
    use weft_core::{ClassSpec, Direction, Property, Registry};

    use super::*;
    use crate::component::define_component;
    use crate::config::ViewConfig;
    use crate::element::ElementKind;
    use crate::env::EnvGuard;

    fn setup() -> (Env, MemoryBackend, EnvGuard) {
        let backend = MemoryBackend::new();
        let env = Env::new(
            Registry::new(),
            Rc::new(backend.clone()),
            ViewConfig::default(),
        )
        .expect("env");
        let guard = env.enter();
        (env, backend, guard)
    }

    fn markup(backend: &MemoryBackend, node: &Object) -> String {
        backend.render(node.surface().expect("surface"))
    }

    #[test]
    fn find_binding_balances_braces() {
        let expr = find_binding("a {b, format={0}!} c").expect("binding expression");
        assert_eq!(expr.prefix, "a ");
        assert_eq!(expr.inner, "b, format={0}!");
        assert_eq!(expr.suffix, " c");
        assert!(find_binding("no braces").is_none());
        assert!(find_binding("open {only").is_none());
        assert_eq!(find_binding("{}").expect("binding expression").inner, "");
    }

    #[test]
    fn expressions_resolve_sources_and_paths() {
        let (env, _backend, _guard) = setup();
        let node = env.registry().instantiate(ELEMENT, &[]).expect("instantiate");
        let owner = env.registry().instantiate(ABSTRACT_COMPONENT, &[]).expect("instantiate");

        let (spec, source) = find_binding("{}").expect("binding expression").resolve(&node, Some(&owner)).expect("resolve binding");
        assert_eq!(spec.path, "model");
        assert!(source.ptr_eq(&node));

        let (spec, _) = find_binding("{user.name}").expect("binding expression").resolve(&node, None).expect("resolve binding");
        assert_eq!(spec.path, "model.user.name");

        let (spec, source) = find_binding("{#count, direction=<>}")
            .expect("binding expression")
            .resolve(&node, Some(&owner))
            .expect("resolve binding");
        assert_eq!(spec.path, "count");
        assert_eq!(spec.direction, Some(Direction::Both));
        assert!(source.ptr_eq(&owner));

        let (_, source) = find_binding("{#count}").expect("binding expression").resolve(&node, None).expect("resolve binding");
        assert!(source.ptr_eq(&node));

        let (spec, _) = find_binding("Hi {name}!").expect("binding expression").resolve(&node, None).expect("resolve binding");
        assert_eq!(spec.format.as_deref(), Some("Hi {0}!"));

        assert!(find_binding("{x, bogus=1}").expect("binding expression").resolve(&node, None).is_err());
    }

    #[test]
    fn arrays_compile_to_fragments() {
        let (_env, backend, _guard) = setup();
        let host = compile(&json!({ "tag": "div", "content": [["a", "b"], "c"] }), None).expect("compile");
        assert_eq!(markup(&backend, &host), "<div>abc</div>");
        let fragment = &host.children()[0];
        assert_eq!(fragment.element_kind(), Some(ElementKind::Fragment));
        assert_eq!(fragment.children().len(), 2);
    }

    #[test]
    fn literal_properties_and_attributes() {
        let (_env, backend, _guard) = setup();
        let input = compile(
            &json!({ "tag": "input", "type": "text", "disabled": true, "maxlength": 8 }),
            None,
        );
        // `type` is structural, so it names a component class here.
        assert!(matches!(input, Err(ViewError::UnknownType { .. })));

        let input = compile(&json!({ "tag": "input", "disabled": true, "maxlength": 8 }), None)
            .expect("compile");
        assert_eq!(
            markup(&backend, &input),
            r#"<input disabled="" maxlength="8"></input>"#
        );
    }

    #[test]
    fn props_object_sets_properties() {
        let (_env, backend, _guard) = setup();
        let input = compile(
            &json!({ "tag": "input", "props": { "type": "text", "maxlength": 4 } }),
            None,
        )
        .expect("compile");
        assert_eq!(
            markup(&backend, &input),
            r#"<input maxlength="4" type="text"></input>"#
        );
        assert!(matches!(
            compile(&json!({ "props": [1] }), None),
            Err(ViewError::InvalidDescription { .. })
        ));
    }

    #[test]
    fn unknown_and_non_component_types_fail() {
        let (env, _backend, _guard) = setup();
        assert!(matches!(
            compile(&json!({ "type": "Nope" }), None),
            Err(ViewError::UnknownType { .. })
        ));
        env.registry().define(ClassSpec::new("Plain")).expect("define class");
        assert!(matches!(
            compile(&json!({ "type": "Plain" }), None),
            Err(ViewError::NotAComponent { .. })
        ));
        assert!(matches!(
            compile(&json!({ "tag": 3 }), None),
            Err(ViewError::InvalidDescription { .. })
        ));
    }

    #[test]
    fn model_bindings_follow_the_inherited_model() {
        let (_env, backend, _guard) = setup();
        let card = compile(
            &json!({
                "tag": "p",
                "model": { "name": "Ada" },
                "content": "Hello, {name}!"
            }),
            None,
        )
        .expect("compile");
        assert_eq!(markup(&backend, &card), "<p>Hello, Ada!</p>");

        let person = weft_core::Object::observable_from([("name", Value::from("Grace"))]);
        card.set("model", person.clone());
        assert_eq!(markup(&backend, &card), "<p>Hello, Grace!</p>");
        person.set("name", "Lin");
        assert_eq!(markup(&backend, &card), "<p>Hello, Lin!</p>");
    }

    #[test]
    fn events_bind_owner_methods() {
        let (env, backend, _guard) = setup();
        let presses = Rc::new(Cell::new(0));
        let counter = Rc::clone(&presses);
        let panel = env
            .registry()
            .define(
                ClassSpec::new("Panel")
                    .extends(&env.registry().require(ABSTRACT_COMPONENT).expect("registered class"))
                    .method("press", move |_| {
                        counter.set(counter.get() + 1);
                        Ok(Value::Undefined)
                    }),
            )
            .expect("define class");
        let owner = panel.instantiate().expect("instantiate");
        let view = json!([
            { "tag": "button", "name": "braced", "events": { "click": "{#press}" } },
            { "tag": "button", "name": "bare", "events": { "click": "press" } }
        ]);
        compile(&view, Some(&owner)).expect("compile");
        for name in ["braced", "bare"] {
            let button = owner.view(name).expect("named view");
            backend.dispatch(button.surface().expect("surface"), "click", Value::Null);
        }
        assert_eq!(presses.get(), 2);
    }

    #[test]
    fn bare_event_names_can_be_disabled() {
        let backend = MemoryBackend::new();
        let env = Env::new(
            Registry::new(),
            Rc::new(backend),
            ViewConfig {
                resolve_event_methods: false,
                ..ViewConfig::default()
            },
        )
        .expect("env");
        let result = compile_in(&env, &json!({ "events": { "click": "press" } }), None);
        assert!(matches!(result, Err(ViewError::InvalidDescription { .. })));
    }

    #[test]
    fn typed_nodes_use_registered_components() {
        let (_env, backend, _guard) = setup();
        define_component(
            ClassSpec::new("Badge").property("label", Property::new().value("new")),
            json!({ "tag": "span", "content": "{#label}" }),
        )
        .expect("define component");
        let host = compile(
            &json!({ "tag": "div", "content": [{ "type": "Badge", "label": "hot" }, { "type": "Badge" }] }),
            None,
        )
        .expect("compile");
        assert_eq!(
            markup(&backend, &host),
            "<div><span>hot</span><span>new</span></div>"
        );
    }

    #[test]
    fn nested_descriptions_become_view_specs() {
        let (_env, _backend, _guard) = setup();
        let node = compile(&json!({ "template": { "tag": "li" } }), None).expect("compile");
        let template = node.get("template");
        let spec = ViewSpec::from_value(&template).expect("view spec");
        assert_eq!(spec.desc(), &json!({ "tag": "li" }));
        assert_eq!(spec.compile().expect("compile").tag().as_deref(), Some("li"));
    }
}
