#![forbid(unsafe_code)]

//! Components that own a backend surface.
//!
//! An `Element` is created with a tag. The configured text tag yields a text
//! leaf and the fragment tag yields a node with no surface of its own, whose
//! children are placed directly into the nearest rendering ancestor.
//! Undeclared names read and write attributes; `style.<name>` addresses a
//! single style declaration.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use weft_backend::{Backend, NodeId, SubscriptionId};
use weft_core::{Assign, Class, ClassSpec, Fallback, Invocation, Native, Object, Property, Value};

use crate::component::ComponentExt;
use crate::env::Env;
use crate::template;

pub const ELEMENT: &str = "Element";

/// Resource key holding the backend node as a [`Native`] [`NodeId`].
pub const ROOT_KEY: &str = "@root";
/// Resource key holding the element's tag.
pub const TAG_KEY: &str = "@tag";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Element,
    Text,
    Fragment,
}

pub(crate) struct ElementState {
    backend: Rc<dyn Backend>,
    tag: String,
    kind: ElementKind,
    root: Option<NodeId>,
    listeners: RefCell<AHashMap<String, SubscriptionId>>,
}

/// Element-specific accessors.
pub trait ElementExt {
    fn element_kind(&self) -> Option<ElementKind>;

    fn tag(&self) -> Option<String>;

    /// Forward backend `event`s on this element's surface to `fire`.
    fn listen(&self, event: &str) -> bool;

    fn unlisten(&self, event: &str) -> bool;
}

impl ElementExt for Object {
    fn element_kind(&self) -> Option<ElementKind> {
        self.extension::<ElementState>().map(|st| st.kind)
    }

    fn tag(&self) -> Option<String> {
        self.extension::<ElementState>().map(|st| st.tag.clone())
    }

    fn listen(&self, event: &str) -> bool {
        listen(self, event)
    }

    fn unlisten(&self, event: &str) -> bool {
        let Some(st) = self.extension::<ElementState>() else {
            return false;
        };
        let removed = st.listeners.borrow_mut().remove(event);
        removed.is_some_and(|id| st.backend.unsubscribe(id))
    }
}

pub(crate) fn root_of(node: &Object) -> Option<NodeId> {
    node.extension::<ElementState>()?.root
}

fn listen(node: &Object, event: &str) -> bool {
    let Some(st) = node.extension::<ElementState>() else {
        return false;
    };
    let Some(root) = st.root else {
        return false;
    };
    if st.listeners.borrow().contains_key(event) {
        return true;
    }
    let weak = node.downgrade();
    let name = event.to_string();
    let id = st.backend.subscribe(
        root,
        event,
        Rc::new(move |payload: &Value| {
            if let Some(node) = weak.upgrade() {
                node.fire(&name, payload.clone());
            }
        }),
    );
    st.listeners.borrow_mut().insert(event.to_string(), id);
    true
}

// ---------------------------------------------------------------------------
// Surface placement
// ---------------------------------------------------------------------------

/// Top-level surfaces of `node`: its own root, or its children's when it
/// renders nothing itself.
fn surfaces_of(node: &Object) -> Vec<(NodeId, Rc<dyn Backend>)> {
    if let Some(st) = node.extension::<ElementState>()
        && let Some(root) = st.root
    {
        return vec![(root, Rc::clone(&st.backend))];
    }
    node.children().iter().flat_map(surfaces_of).collect()
}

fn container_of(node: &Object) -> Option<(NodeId, Rc<dyn Backend>)> {
    let mut current = Some(node.clone());
    while let Some(candidate) = current {
        if let Some(st) = candidate.extension::<ElementState>()
            && let Some(root) = st.root
        {
            return Some((root, Rc::clone(&st.backend)));
        }
        current = candidate.parent();
    }
    None
}

/// First surface rendered after `node`, walking up through surfaceless
/// ancestors until one with a surface is reached.
fn next_surface(node: &Object) -> Option<NodeId> {
    let mut current = node.clone();
    loop {
        let parent = current.parent()?;
        let siblings = parent.children();
        let position = siblings.iter().position(|s| s.ptr_eq(&current))?;
        for sibling in &siblings[position + 1..] {
            if let Some((surface, _)) = surfaces_of(sibling).into_iter().next() {
                return Some(surface);
            }
        }
        if root_of(&parent).is_some() {
            return None;
        }
        current = parent;
    }
}

/// Place `node`'s surfaces into its rendering container.
pub(crate) fn mount(node: &Object) {
    let surfaces = surfaces_of(node);
    if surfaces.is_empty() {
        return;
    }
    let Some(parent) = node.parent() else {
        return;
    };
    let Some((container, backend)) = container_of(&parent) else {
        return;
    };
    let before = next_surface(node);
    for (surface, _) in surfaces {
        backend.insert_before(container, surface, before);
    }
}

pub(crate) fn unmount(node: &Object) {
    for (surface, backend) in surfaces_of(node) {
        if let Some(parent) = backend.parent_of(surface) {
            backend.remove_child(parent, surface);
        }
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

fn text_of(node: &Object) -> Value {
    match node.extension::<ElementState>() {
        Some(st) => match st.root {
            Some(root) => Value::from(st.backend.text(root)),
            None => node.stored("text"),
        },
        None => Value::Undefined,
    }
}

fn set_text(node: &Object, value: Value) -> Assign {
    let Some(st) = node.extension::<ElementState>() else {
        return Assign::Rejected;
    };
    match st.root {
        Some(root) => st.backend.set_text(root, &value.to_string()),
        None => node.store("text", value),
    }
    Assign::Stored
}

fn attribute_get(node: &Object, name: &str) -> Option<Value> {
    if name.starts_with('@') {
        return None;
    }
    let st = node.extension::<ElementState>()?;
    let root = st.root.filter(|_| st.kind == ElementKind::Element)?;
    match name.strip_prefix("style.") {
        Some(property) => st.backend.style(root, property).map(Value::from),
        None => st.backend.attribute(root, name).map(Value::from),
    }
}

fn attribute_set(node: &Object, name: &str, value: &Value) -> bool {
    if name.starts_with('@') {
        return false;
    }
    let Some(st) = node.extension::<ElementState>() else {
        return false;
    };
    let Some(root) = st.root.filter(|_| st.kind == ElementKind::Element) else {
        return false;
    };
    if let Some(property) = name.strip_prefix("style.") {
        let text = (!value.is_nullish()).then(|| value.to_string());
        st.backend.set_style(root, property, text.as_deref());
        return true;
    }
    let old = st.backend.attribute(root, name);
    match value {
        Value::Undefined | Value::Null | Value::Bool(false) => {
            st.backend.remove_attribute(root, name);
        }
        Value::Bool(true) => st.backend.set_attribute(root, name, ""),
        other => st.backend.set_attribute(root, name, &other.to_string()),
    }
    if node.is_watched(name) && st.backend.attribute(root, name) != old {
        node.notify(name, Value::from(old));
    }
    true
}

// ---------------------------------------------------------------------------
// Class definition
// ---------------------------------------------------------------------------

fn init_element(inv: &Invocation<'_>) -> weft_core::Result<Value> {
    let this = inv.this();
    let env = Env::current();
    let config = env.config();
    let tag = inv
        .arg(0)
        .as_str()
        .map_or_else(|| config.default_tag.clone(), str::to_string);
    let backend = Rc::clone(env.backend());
    let (kind, root) = if tag == config.fragment_tag {
        (ElementKind::Fragment, None)
    } else if tag == config.text_tag {
        (ElementKind::Text, Some(backend.create_text("")))
    } else {
        (ElementKind::Element, Some(backend.create_element(&tag)))
    };
    this.register(TAG_KEY, Value::from(tag.as_str()));
    if let Some(root) = root {
        this.register(ROOT_KEY, Value::Native(Native::new(root)));
    }
    tracing::trace!(object = this.id(), tag = %tag, ?kind, "element created");
    this.extension_or_init(|| ElementState {
        backend,
        tag,
        kind,
        root,
        listeners: RefCell::new(AHashMap::new()),
    });
    inv.inherited(&[])
}

fn dispose_element(inv: &Invocation<'_>) -> weft_core::Result<Value> {
    let this = inv.this();
    template::release(this);
    let result = inv.inherited_same();
    if let Some(st) = this.extension::<ElementState>() {
        for (_, id) in st.listeners.borrow_mut().drain() {
            st.backend.unsubscribe(id);
        }
        if let Some(root) = st.root {
            st.backend.release(root);
        }
    }
    result
}

pub(crate) fn element_spec(base: &Class) -> ClassSpec {
    ClassSpec::new(ELEMENT)
        .extends(base)
        .property("text", Property::new().get(text_of).set(set_text))
        .property(
            "template",
            Property::new()
                .get(template::template_of)
                .set(template::set_template)
                .serializable(false),
        )
        .property(
            "items",
            Property::new()
                .get(template::items_of)
                .set(template::set_items)
                .serializable(false),
        )
        .fallback(Fallback::new(attribute_get, attribute_set))
        .method("init", init_element)
        .method("listen", |inv| {
            let event = inv.arg(0);
            Ok(Value::Bool(
                event.as_str().is_some_and(|e| inv.this().listen(e)),
            ))
        })
        .method("unlisten", |inv| {
            let event = inv.arg(0);
            Ok(Value::Bool(
                event.as_str().is_some_and(|e| inv.this().unlisten(e)),
            ))
        })
        .method("dispose", dispose_element)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use weft_backend::MemoryBackend;
    use weft_core::Registry;

    use super::*;
    use crate::component::ABSTRACT_COMPONENT;
    use crate::config::ViewConfig;
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

    fn element(env: &Env, tag: &str) -> Object {
        env.registry()
            .instantiate(ELEMENT, &[Value::from(tag)])
            .expect("element")
    }

    #[test]
    fn kinds_follow_configured_tags() {
        let (env, backend, _guard) = setup();
        let div = element(&env, "div");
        let text = element(&env, "#text");
        let fragment = element(&env, "#fragment");
        assert_eq!(div.element_kind(), Some(ElementKind::Element));
        assert_eq!(text.element_kind(), Some(ElementKind::Text));
        assert_eq!(fragment.element_kind(), Some(ElementKind::Fragment));
        assert!(fragment.surface().is_none());
        assert_eq!(backend.node_count(), 2);
        assert_eq!(div.resolve(TAG_KEY), Value::from("div"));
        assert!(div.resolve(ROOT_KEY).as_native().is_some());
    }

    #[test]
    fn missing_tag_uses_default() {
        let (env, _backend, _guard) = setup();
        let node = env.registry().instantiate(ELEMENT, &[]).expect("instantiate");
        assert_eq!(node.tag().as_deref(), Some("div"));
    }

    #[test]
    fn children_render_in_order() {
        let (env, backend, _guard) = setup();
        let list = element(&env, "ul");
        for label in ["a", "c"] {
            let item = element(&env, "li");
            item.set("text", label);
            item.attach_to(&list, None).expect("attach");
        }
        let b = element(&env, "li");
        b.set("text", "b");
        b.attach_to(&list, Some(1)).expect("attach");
        assert_eq!(
            backend.render(list.surface().expect("surface")),
            "<ul><li>a</li><li>b</li><li>c</li></ul>"
        );
        b.detach();
        assert_eq!(
            backend.render(list.surface().expect("surface")),
            "<ul><li>a</li><li>c</li></ul>"
        );
    }

    #[test]
    fn fragments_place_children_in_the_container() {
        let (env, backend, _guard) = setup();
        let host = element(&env, "div");
        let existing = element(&env, "hr");
        existing.attach_to(&host, None).expect("attach");

        let fragment = element(&env, "#fragment");
        for tag in ["i", "b"] {
            element(&env, tag).attach_to(&fragment, None).expect("attach");
        }
        fragment.attach_to(&host, Some(0)).expect("attach");
        assert_eq!(
            backend.render(host.surface().expect("surface")),
            "<div><i></i><b></b><hr></hr></div>"
        );

        // Nested surfaceless components still insert before later siblings.
        let late = element(&env, "em");
        late.attach_to(&fragment, None).expect("attach");
        assert_eq!(
            backend.render(host.surface().expect("surface")),
            "<div><i></i><b></b><em></em><hr></hr></div>"
        );

        fragment.detach();
        assert_eq!(backend.render(host.surface().expect("surface")), "<div><hr></hr></div>");
    }

    #[test]
    fn surfaceless_components_forward_to_container() {
        let (env, backend, _guard) = setup();
        let host = element(&env, "div");
        let wrapper = env.registry().instantiate(ABSTRACT_COMPONENT, &[]).expect("instantiate");
        element(&env, "span").attach_to(&wrapper, None).expect("attach");
        wrapper.attach_to(&host, None).expect("attach");
        assert_eq!(
            backend.render(host.surface().expect("surface")),
            "<div><span></span></div>"
        );
    }

    #[test]
    fn attributes_and_styles_use_the_fallback() {
        let (env, backend, _guard) = setup();
        let input = element(&env, "input");
        input.set("type", "checkbox");
        input.set("checked", true);
        input.set("style.color", "red");
        assert_eq!(input.get("type"), Value::from("checkbox"));
        assert_eq!(input.get("style.color"), Value::from("red"));
        assert!(input.has("checked"));
        assert_eq!(
            backend.render(input.surface().expect("surface")),
            r#"<input checked="" type="checkbox" style="color: red"></input>"#
        );
        input.set("checked", false);
        input.set("style.color", Value::Null);
        assert!(input.get("checked").is_undefined());
        assert_eq!(
            backend.render(input.surface().expect("surface")),
            r#"<input type="checkbox"></input>"#
        );
    }

    #[test]
    fn reserved_names_stay_off_the_surface() {
        let (env, backend, _guard) = setup();
        let node = element(&env, "div");
        node.set("@hidden", 1);
        assert_eq!(node.stored("@hidden"), Value::Int(1));
        assert_eq!(backend.render(node.surface().expect("surface")), "<div></div>");
    }

    #[test]
    fn text_leaf_and_fragment_text() {
        let (env, backend, _guard) = setup();
        let leaf = element(&env, "#text");
        leaf.set("text", 42);
        assert_eq!(backend.text(leaf.surface().expect("surface")), "42");
        assert_eq!(leaf.get("text"), Value::from("42"));

        let fragment = element(&env, "#fragment");
        fragment.set("text", "kept");
        assert_eq!(fragment.get("text"), Value::from("kept"));
    }

    #[test]
    fn listen_forwards_backend_events() {
        let (env, backend, _guard) = setup();
        let button = element(&env, "button");
        let clicks = Rc::new(Cell::new(0));
        let counter = Rc::clone(&clicks);
        button.on("click", move |_, _| counter.set(counter.get() + 1));
        assert!(button.listen("click"));
        assert!(button.listen("click"));
        let surface = button.surface().expect("surface");
        assert_eq!(backend.dispatch(surface, "click", Value::Null), 1);
        assert_eq!(clicks.get(), 1);

        assert!(button.unlisten("click"));
        backend.dispatch(surface, "click", Value::Null);
        assert_eq!(clicks.get(), 1);
    }

    #[test]
    fn dispose_releases_subscriptions_and_unmounts() {
        let (env, backend, _guard) = setup();
        let host = element(&env, "div");
        let button = element(&env, "button");
        button.attach_to(&host, None).expect("attach");
        button.listen("click");
        assert_eq!(backend.subscription_count(), 1);
        button.dispose();
        assert_eq!(backend.subscription_count(), 0);
        assert_eq!(backend.render(host.surface().expect("surface")), "<div></div>");
    }
}
