#![forbid(unsafe_code)]

//! The component tree.
//!
//! `AbstractComponent` is the base class of everything that can appear in a
//! view. Tree state (parent, owner, children, model, resources) lives in a
//! [`ComponentState`] extension on the instance, so subclasses defined at
//! runtime carry it without declaring anything.
//!
//! # Invariants
//!
//! 1. A component has at most one parent; attaching an attached node
//!    detaches it first.
//! 2. Parents hold children strongly; children hold parents and owners weakly.
//! 3. A node without its own model reads its parent's model. Changing the
//!    effective model notifies `model` watchers and propagates to children.
//! 4. A node attached without an owner takes its parent's owner.
//!
//! # Lifecycle events
//!
//! Attach fires `contententer` on the parent, then `enter` on the child.
//! Detach fires `contentleave`, then `leave`. The overridable hook methods
//! `onAttach`, `onDetach`, `onChildAttach` and `onChildDetach` run before the
//! node enters or leaves the parent's children.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use weft_backend::NodeId;
use weft_core::{Assign, Class, ClassSpec, Invocation, List, Object, Property, Value, WeakObject};

use crate::element;
use crate::env::Env;
use crate::error::{Result, ViewError};
use crate::view::{self, ViewSpec};

pub const ABSTRACT_COMPONENT: &str = "AbstractComponent";

/// Resource key holding a node's own name.
pub const NAME_KEY: &str = "@name";
/// Resource key holding the root of a component's declared view.
pub const VIEW_KEY: &str = "@view";

const MAX_OWNER_DEPTH: usize = 256;

thread_local! {
    static DECLARED_VIEWS: RefCell<AHashMap<u64, Rc<serde_json::Value>>> = RefCell::new(AHashMap::new());
}

#[derive(Default)]
pub(crate) struct ComponentState {
    parent: RefCell<Option<WeakObject>>,
    owner: RefCell<Option<WeakObject>>,
    children: RefCell<Vec<Object>>,
    own_model: RefCell<Option<Value>>,
    inherited_model: RefCell<Value>,
    resources: RefCell<AHashMap<String, Value>>,
}

fn state(node: &Object) -> Rc<ComponentState> {
    node.extension_or_init(ComponentState::default)
}

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// Tree operations on component instances.
pub trait ComponentExt {
    fn is_component(&self) -> bool;

    fn parent(&self) -> Option<Object>;

    fn owner(&self) -> Option<Object>;

    fn set_owner(&self, owner: Option<&Object>);

    /// Children in order.
    fn children(&self) -> Vec<Object>;

    /// The effective model: own if set, otherwise inherited.
    fn model(&self) -> Value;

    /// Insert under `parent` at `index` (clamped; `None` appends).
    fn attach_to(&self, parent: &Object, index: Option<usize>) -> Result<()>;

    /// Remove from the current parent. Returns `false` if detached already.
    fn detach(&self) -> bool;

    fn register(&self, name: &str, value: Value);

    fn unregister(&self, name: &str) -> Value;

    /// Look `name` up in own resources, then along the owner chain.
    fn resolve(&self, name: &str) -> Value;

    /// A named component resolved through [`resolve`](Self::resolve).
    fn view(&self, name: &str) -> Option<Object>;

    fn component_name(&self) -> Option<String>;

    /// Backend node of this element, if it renders one.
    fn surface(&self) -> Option<NodeId>;
}

impl ComponentExt for Object {
    fn is_component(&self) -> bool {
        self.is_a(ABSTRACT_COMPONENT)
    }

    fn parent(&self) -> Option<Object> {
        parent_of(self)
    }

    fn owner(&self) -> Option<Object> {
        owner_of(self)
    }

    fn set_owner(&self, owner: Option<&Object>) {
        *state(self).owner.borrow_mut() = owner.map(Object::downgrade);
    }

    fn children(&self) -> Vec<Object> {
        children_of(self)
    }

    fn model(&self) -> Value {
        model_of(self)
    }

    fn attach_to(&self, parent: &Object, index: Option<usize>) -> Result<()> {
        attach(self, parent, index)
    }

    fn detach(&self) -> bool {
        detach(self)
    }

    fn register(&self, name: &str, value: Value) {
        state(self)
            .resources
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    fn unregister(&self, name: &str) -> Value {
        state(self)
            .resources
            .borrow_mut()
            .remove(name)
            .unwrap_or_default()
    }

    fn resolve(&self, name: &str) -> Value {
        resolve(self, name)
    }

    fn view(&self, name: &str) -> Option<Object> {
        match self.resolve(name) {
            Value::Object(obj) if obj.is_component() => Some(obj),
            _ => None,
        }
    }

    fn component_name(&self) -> Option<String> {
        name_of(self)
    }

    fn surface(&self) -> Option<NodeId> {
        element::root_of(self)
    }
}

/// Attach a declared view to `spec` and register the class.
///
/// A spec without an explicit parent extends `AbstractComponent`. Each
/// instance compiles `view` with itself as owner during `init` and attaches
/// the result as its first child. Subclasses that override `init` must call
/// the inherited `init` to get their view.
pub fn define_component(spec: ClassSpec, view: serde_json::Value) -> Result<Class> {
    let env = Env::current();
    let spec = match spec.parent() {
        Some(_) => spec,
        None => spec.extends(&env.registry().require(ABSTRACT_COMPONENT)?),
    };
    let class = env.registry().define(spec)?;
    DECLARED_VIEWS.with(|views| views.borrow_mut().insert(class.id(), Rc::new(view)));
    tracing::debug!(class = %class.name(), "component defined");
    Ok(class)
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

pub(crate) fn parent_of(node: &Object) -> Option<Object> {
    node.extension::<ComponentState>()?
        .parent
        .borrow()
        .as_ref()
        .and_then(WeakObject::upgrade)
}

pub(crate) fn owner_of(node: &Object) -> Option<Object> {
    node.extension::<ComponentState>()?
        .owner
        .borrow()
        .as_ref()
        .and_then(WeakObject::upgrade)
}

pub(crate) fn children_of(node: &Object) -> Vec<Object> {
    node.extension::<ComponentState>()
        .map(|st| st.children.borrow().clone())
        .unwrap_or_default()
}

fn name_of(node: &Object) -> Option<String> {
    let st = node.extension::<ComponentState>()?;
    let resources = st.resources.borrow();
    resources
        .get(NAME_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn is_ancestor(candidate: &Object, node: &Object) -> bool {
    let mut current = parent_of(node);
    while let Some(parent) = current {
        if parent.ptr_eq(candidate) {
            return true;
        }
        current = parent_of(&parent);
    }
    false
}

pub(crate) fn attach(child: &Object, parent: &Object, index: Option<usize>) -> Result<()> {
    for node in [child, parent] {
        if !node.is_component() {
            return Err(ViewError::NotAComponent {
                name: node.class().name().to_string(),
            });
        }
    }
    if child.ptr_eq(parent) || is_ancestor(child, parent) {
        return Err(ViewError::InvalidTree {
            child: child.class().name().to_string(),
            parent: parent.class().name().to_string(),
            reason: "the parent is inside the child",
        });
    }
    detach(child);

    let cs = state(child);
    let ps = state(parent);
    if owner_of(child).is_none() {
        let inherited = ps.owner.borrow().clone();
        *cs.owner.borrow_mut() = inherited;
    }
    if let Some(name) = name_of(child)
        && let Some(owner) = owner_of(child)
    {
        owner.register(&name, Value::Object(child.clone()));
    }

    run_hook(child, "onAttach", parent);
    run_hook(parent, "onChildAttach", child);

    *cs.parent.borrow_mut() = Some(parent.downgrade());
    {
        let mut children = ps.children.borrow_mut();
        let at = index.map_or(children.len(), |i| i.min(children.len()));
        children.insert(at, child.clone());
    }
    inherit_model(child, model_of(parent));
    element::mount(child);

    parent.fire("contententer", child.clone());
    child.fire("enter", parent.clone());
    tracing::trace!(child = child.id(), parent = parent.id(), "attached");
    Ok(())
}

pub(crate) fn detach(child: &Object) -> bool {
    let Some(parent) = parent_of(child) else {
        return false;
    };
    run_hook(child, "onDetach", &parent);
    run_hook(&parent, "onChildDetach", child);
    element::unmount(child);

    state(&parent)
        .children
        .borrow_mut()
        .retain(|c| !c.ptr_eq(child));
    *state(child).parent.borrow_mut() = None;
    inherit_model(child, Value::Undefined);

    parent.fire("contentleave", child.clone());
    child.fire("leave", parent.clone());
    tracing::trace!(child = child.id(), parent = parent.id(), "detached");
    true
}

fn run_hook(node: &Object, hook: &str, arg: &Object) {
    if !node.can(hook) {
        return;
    }
    if let Err(err) = node.call(hook, &[Value::Object(arg.clone())]) {
        tracing::warn!(class = %node.class().name(), hook, error = %err, "lifecycle hook failed");
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

pub(crate) fn model_of(node: &Object) -> Value {
    let Some(st) = node.extension::<ComponentState>() else {
        return Value::Undefined;
    };
    let own = st.own_model.borrow().clone();
    own.unwrap_or_else(|| st.inherited_model.borrow().clone())
}

pub(crate) fn has_own_model(node: &Object) -> bool {
    node.extension::<ComponentState>()
        .is_some_and(|st| st.own_model.borrow().is_some())
}

fn set_model(node: &Object, value: Value) -> Assign {
    let value = match ViewSpec::from_value(&value) {
        Some(spec) => spec.data(),
        None => value,
    };
    let own = (!value.is_undefined()).then_some(value);
    *state(node).own_model.borrow_mut() = own;
    propagate_model(node);
    Assign::Stored
}

fn propagate_model(node: &Object) {
    let model = model_of(node);
    for child in children_of(node) {
        inherit_model(&child, model.clone());
    }
}

fn inherit_model(node: &Object, value: Value) {
    let old = model_of(node);
    let st = state(node);
    *st.inherited_model.borrow_mut() = value;
    if st.own_model.borrow().is_some() {
        return;
    }
    if old.same(&model_of(node)) {
        return;
    }
    node.notify("model", old);
    propagate_model(node);
}

// ---------------------------------------------------------------------------
// Content and resources
// ---------------------------------------------------------------------------

fn content_of(node: &Object) -> Value {
    Value::List(List::from_vec(
        children_of(node).into_iter().map(Value::Object).collect(),
    ))
}

fn set_content(node: &Object, value: Value) -> Assign {
    for child in children_of(node) {
        detach(&child);
        child.dispose();
    }
    if let Err(err) = attach_content(node, &value) {
        tracing::warn!(class = %node.class().name(), error = %err, "content rejected");
    }
    Assign::Stored
}

/// Compile (if needed) and append `value` under `node`.
pub(crate) fn attach_content(node: &Object, value: &Value) -> Result<()> {
    match value {
        Value::Undefined | Value::Null => Ok(()),
        Value::List(list) => list
            .to_vec()
            .iter()
            .try_for_each(|item| attach_content(node, item)),
        Value::Object(obj) if obj.is_component() => attach(obj, node, None),
        Value::Native(native) => match native.downcast_ref::<ViewSpec>() {
            Some(spec) => spec.attach_to(node),
            None => Err(ViewError::InvalidDescription {
                reason: "native content is not a view".to_string(),
            }),
        },
        other => {
            let leaf = view::compile_scalar(&other.to_json(), owner_of(node).as_ref())?;
            attach(&leaf, node, None)
        }
    }
}

fn set_name(node: &Object, value: Value) -> Assign {
    let Some(name) = value.as_str().map(str::to_string) else {
        node.unregister(NAME_KEY);
        return Assign::Stored;
    };
    node.register(NAME_KEY, Value::from(name.as_str()));
    if let Some(owner) = owner_of(node) {
        owner.register(&name, Value::Object(node.clone()));
    }
    Assign::Stored
}

fn resolve(node: &Object, name: &str) -> Value {
    let mut current = Some(node.clone());
    for _ in 0..MAX_OWNER_DEPTH {
        let Some(candidate) = current else {
            return Value::Undefined;
        };
        let found = candidate
            .extension::<ComponentState>()
            .and_then(|st| st.resources.borrow().get(name).cloned());
        if let Some(value) = found {
            return value;
        }
        current = owner_of(&candidate).filter(|owner| !owner.ptr_eq(&candidate));
    }
    tracing::warn!(resource = name, "owner chain too deep");
    Value::Undefined
}

// ---------------------------------------------------------------------------
// Class definition
// ---------------------------------------------------------------------------

fn declared_view(class: &Class) -> Option<Rc<serde_json::Value>> {
    let mut current = Some(class.clone());
    while let Some(class) = current {
        let found = DECLARED_VIEWS.with(|views| views.borrow().get(&class.id()).cloned());
        if found.is_some() {
            return found;
        }
        current = class.parent().cloned();
    }
    None
}

fn build_declared_view(this: &Object) -> Result<()> {
    let Some(desc) = declared_view(this.class()) else {
        return Ok(());
    };
    let root = view::compile(&desc, Some(this))?;
    this.register(VIEW_KEY, Value::Object(root.clone()));
    attach(&root, this, None)
}

fn object_arg(inv: &Invocation<'_>, index: usize) -> weft_core::Result<Object> {
    match inv.arg(index) {
        Value::Object(obj) => Ok(obj),
        other => Err(weft_core::Error::msg(format!(
            "{}: argument {index} must be an object, got {}",
            inv.method().name(),
            other.type_name()
        ))),
    }
}

fn str_arg(inv: &Invocation<'_>, index: usize) -> weft_core::Result<String> {
    inv.arg(index).as_str().map(str::to_string).ok_or_else(|| {
        weft_core::Error::msg(format!(
            "{}: argument {index} must be a string",
            inv.method().name()
        ))
    })
}

fn dispose_component(inv: &Invocation<'_>) -> weft_core::Result<Value> {
    let this = inv.this();
    for child in children_of(this) {
        child.dispose();
    }
    detach(this);
    if let Some(name) = name_of(this)
        && let Some(owner) = owner_of(this)
        && owner.resolve(&name).as_object().is_some_and(|o| o.ptr_eq(this))
    {
        owner.unregister(&name);
    }
    if let Some(st) = this.extension::<ComponentState>() {
        st.children.borrow_mut().clear();
        st.resources.borrow_mut().clear();
        st.own_model.borrow_mut().take();
    }
    inv.inherited_same()
}

fn noop(_: &Invocation<'_>) -> weft_core::Result<Value> {
    Ok(Value::Undefined)
}

pub(crate) fn abstract_component_spec(observable: &Class) -> ClassSpec {
    ClassSpec::new(ABSTRACT_COMPONENT)
        .extends(observable)
        .property(
            "model",
            Property::new().get(model_of).set(set_model).serializable(false),
        )
        .property(
            "owner",
            Property::new()
                .get(|node| Value::from(owner_of(node)))
                .set(|node, value| {
                    node.set_owner(value.as_object());
                    Assign::Stored
                })
                .serializable(false),
        )
        .property(
            "parent",
            Property::new()
                .get(|node| Value::from(parent_of(node)))
                .serializable(false),
        )
        .property(
            "content",
            Property::new()
                .get(content_of)
                .set(set_content)
                .serializable(false),
        )
        .property(
            "name",
            Property::new()
                .get(|node| Value::from(name_of(node)))
                .set(set_name),
        )
        .event("enter")
        .event("leave")
        .event("contententer")
        .event("contentleave")
        .method("init", |inv| {
            build_declared_view(inv.this()).map_err(ViewError::into_core)?;
            Ok(Value::Undefined)
        })
        .method("attach", |inv| {
            let parent = object_arg(inv, 0)?;
            let index = inv.arg(1).as_i64().and_then(|i| usize::try_from(i).ok());
            attach(inv.this(), &parent, index).map_err(ViewError::into_core)?;
            Ok(Value::Undefined)
        })
        .method("detach", |inv| Ok(Value::Bool(detach(inv.this()))))
        .method("register", |inv| {
            let name = str_arg(inv, 0)?;
            inv.this().register(&name, inv.arg(1));
            Ok(Value::Undefined)
        })
        .method("resolve", |inv| Ok(resolve(inv.this(), &str_arg(inv, 0)?)))
        .method("view", |inv| {
            Ok(Value::from(inv.this().view(&str_arg(inv, 0)?)))
        })
        .method("onAttach", noop)
        .method("onDetach", noop)
        .method("onChildAttach", noop)
        .method("onChildDetach", noop)
        .method("dispose", dispose_component)
}
