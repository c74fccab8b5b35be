#![forbid(unsafe_code)]

//! Instances and reflective member access.
//!
//! An [`Object`] owns its value map, listener map, watcher map, binding
//! slots and typed extensions. Everything registered on it by *other*
//! objects (owned listeners and watchers) is held by weak identity only.
//!
//! No `RefCell` borrow of an instance is held while user code runs:
//! handler lists are snapshotted before dispatch and every entry carries an
//! `active` flag so removal during a dispatch cycle is honored.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

use crate::class::{Assign, Class, Member, MemberKind};
use crate::error::{Error, Result};
use crate::observable::Watcher;
use crate::value::{Function, Value};

static OBJECT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static LISTENER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Event handler: `(sender, data)`.
pub type EventHandler = Rc<dyn Fn(&Object, &Value)>;

/// Handle returned by [`Object::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(LISTENER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone)]
struct Listener {
    id: ListenerId,
    owner: Option<WeakObject>,
    handler: EventHandler,
    active: Rc<Cell<bool>>,
}

impl Listener {
    fn new(owner: Option<&Object>, handler: EventHandler) -> Self {
        Self {
            id: ListenerId::next(),
            owner: owner.map(Object::downgrade),
            handler,
            active: Rc::new(Cell::new(true)),
        }
    }

    fn retire(&self) {
        self.active.set(false);
    }
}

#[derive(Default)]
struct EventSlots {
    exclusive: Option<Listener>,
    list: Vec<Listener>,
}

/// A releasable attachment stored in an instance's binding slots.
///
/// Implemented by the binding engine; kept abstract here so the object
/// model does not depend on it.
pub trait Link: Any {
    /// Tear down every registration this link holds.
    fn release(&self);

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

pub(crate) struct ObjectInner {
    id: u64,
    class: Class,
    initializing: Cell<bool>,
    disposed: Cell<bool>,
    values: RefCell<AHashMap<String, Value>>,
    listeners: RefCell<AHashMap<String, EventSlots>>,
    pub(crate) watchers: RefCell<AHashMap<String, Vec<Watcher>>>,
    links: RefCell<AHashMap<String, Rc<dyn Link>>>,
    extensions: RefCell<AHashMap<TypeId, Rc<dyn Any>>>,
}

/// Shared handle to an instance. Cloning shares identity.
#[derive(Clone)]
pub struct Object(Rc<ObjectInner>);

/// Weak identity reference to an [`Object`].
#[derive(Clone)]
pub struct WeakObject {
    id: u64,
    inner: Weak<ObjectInner>,
}

impl WeakObject {
    #[must_use]
    pub fn upgrade(&self) -> Option<Object> {
        self.inner.upgrade().map(Object)
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is(&self, obj: &Object) -> bool {
        self.id == obj.id()
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObject(#{})", self.id)
    }
}

impl Object {
    pub(crate) fn allocate(class: Class) -> Self {
        Self(Rc::new(ObjectInner {
            id: OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            class,
            initializing: Cell::new(true),
            disposed: Cell::new(false),
            values: RefCell::new(AHashMap::new()),
            listeners: RefCell::new(AHashMap::new()),
            watchers: RefCell::new(AHashMap::new()),
            links: RefCell::new(AHashMap::new()),
            extensions: RefCell::new(AHashMap::new()),
        }))
    }

    pub(crate) fn finish_init(&self) {
        self.0.initializing.set(false);
    }

    pub(crate) fn inner(&self) -> &ObjectInner {
        &self.0
    }

    /// A non-observable data bag.
    #[must_use]
    pub fn plain() -> Self {
        let obj = Self::allocate(crate::registry::builtin_object());
        obj.finish_init();
        obj
    }

    /// An observable data bag: every field write notifies watchers.
    #[must_use]
    pub fn observable() -> Self {
        let obj = Self::allocate(crate::registry::builtin_observable());
        obj.finish_init();
        obj
    }

    /// An observable data bag populated from `(name, value)` pairs.
    pub fn observable_from<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let obj = Self::observable();
        for (key, value) in fields {
            obj.store(key.as_ref(), value.into());
        }
        obj
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[must_use]
    pub fn class(&self) -> &Class {
        &self.0.class
    }

    /// Whether this instance's class is `class`, descends from it, or mixes it in.
    #[must_use]
    pub fn is(&self, class: &Class) -> bool {
        self.0.class.is_subclass_of(class)
    }

    /// Name-based variant of [`is`](Self::is).
    #[must_use]
    pub fn is_a(&self, class_name: &str) -> bool {
        self.0.class.is_named(class_name)
    }

    #[must_use]
    pub fn is_initializing(&self) -> bool {
        self.0.initializing.get()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakObject {
        WeakObject {
            id: self.0.id,
            inner: Rc::downgrade(&self.0),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // -----------------------------------------------------------------------
    // Reflection
    // -----------------------------------------------------------------------

    /// Read `name`.
    ///
    /// Properties go through their getter, events read as `Undefined`,
    /// methods read as a bound [`Function`], and undeclared names use the
    /// class fallback accessor or the value map.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        match self.0.class.member(name) {
            Some(Member::Property(slot)) => Rc::clone(slot).read(self),
            Some(Member::Event(_)) => Value::Undefined,
            Some(Member::Method(slot)) => {
                let slot = Rc::clone(slot);
                let this = self.downgrade();
                Value::Function(Function::new(move |args| match this.upgrade() {
                    Some(obj) => slot.invoke(&obj, args),
                    None => Ok(Value::Undefined),
                }))
            }
            None => {
                if let Some(fallback) = self.0.class.fallback()
                    && let Some(value) = fallback.get(self, name)
                {
                    return value;
                }
                self.stored(name)
            }
        }
    }

    /// Write `name`; equal values are skipped on watched properties.
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.assign(name, value.into(), false);
    }

    /// Write `name` and notify even if the value is unchanged.
    pub fn set_forced(&self, name: &str, value: impl Into<Value>) {
        self.assign(name, value.into(), true);
    }

    fn assign(&self, name: &str, value: Value, forced: bool) {
        let member = self.0.class.member(name).cloned();
        match member {
            Some(Member::Property(slot)) => {
                if slot.meta().readonly && !self.is_initializing() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(class = %self.0.class.name(), property = name, "write to readonly property ignored");
                    return;
                }
                let Some(refs) = self.0.class.refs(name) else {
                    slot.write(self, value);
                    return;
                };
                let old = slot.read(self);
                if !forced && old.same(&value) {
                    return;
                }
                let before: Vec<Value> = refs.iter().map(|dependent| self.get(dependent)).collect();
                if slot.write(self, value) == Assign::Rejected {
                    return;
                }
                let new = slot.read(self);
                self.dispatch(name, &new, &old);
                for (dependent, previous) in refs.iter().zip(&before) {
                    let current = self.get(dependent);
                    self.dispatch(dependent, &current, previous);
                }
            }
            Some(Member::Event(_)) => match value {
                Value::Function(f) => {
                    let event = name.to_string();
                    self.upon(name, move |_, data| {
                        if let Err(err) = f.call(std::slice::from_ref(data)) {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(event = %event, error = %err, "event handler failed");
                            #[cfg(not(feature = "tracing"))]
                            let _ = (&event, err);
                        }
                    });
                }
                Value::Undefined | Value::Null => self.clear_upon(name),
                _ => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(event = name, value = value.type_name(), "non-callable assigned to event");
                }
            },
            Some(Member::Method(_)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(class = %self.0.class.name(), method = name, "write to method ignored");
            }
            None => {
                if let Some(fallback) = self.0.class.fallback()
                    && fallback.set(self, name, &value)
                {
                    return;
                }
                if !self.0.class.is_observable() {
                    self.store(name, value);
                    return;
                }
                let old = self.stored(name);
                if !forced && old.same(&value) {
                    return;
                }
                self.store(name, value.clone());
                self.dispatch(name, &value, &old);
            }
        }
    }

    /// Whether `name` is a declared member or a present field.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        if self.0.class.member(name).is_some() || self.0.values.borrow().contains_key(name) {
            return true;
        }
        self.0
            .class
            .fallback()
            .is_some_and(|fallback| fallback.get(self, name).is_some())
    }

    /// Whether `name` is callable through [`call`](Self::call).
    #[must_use]
    pub fn can(&self, name: &str) -> bool {
        match self.0.class.member(name) {
            Some(Member::Method(_)) => true,
            Some(_) => false,
            None => matches!(self.get(name), Value::Function(_)),
        }
    }

    #[must_use]
    pub fn member_kind(&self, name: &str) -> MemberKind {
        self.0
            .class
            .member(name)
            .map_or(MemberKind::Field, Member::kind)
    }

    /// Invoke a method; function-valued fields are callable as well.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        if let Some(slot) = self.0.class.method(name) {
            let slot = Rc::clone(slot);
            return slot.invoke(self, args);
        }
        match self.get(name) {
            Value::Function(f) => f.call(args),
            _ => Err(Error::UnknownMethod {
                class: self.0.class.name().to_string(),
                method: name.to_string(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Raw storage
    // -----------------------------------------------------------------------

    /// Read the value map directly, bypassing accessors.
    #[must_use]
    pub fn stored(&self, name: &str) -> Value {
        self.0.values.borrow().get(name).cloned().unwrap_or_default()
    }

    /// Write the value map directly; no notification.
    pub fn store(&self, name: &str, value: Value) {
        self.0.values.borrow_mut().insert(name.to_string(), value);
    }

    /// Remove a raw field, returning its value.
    pub fn unstore(&self, name: &str) -> Value {
        self.0.values.borrow_mut().remove(name).unwrap_or_default()
    }

    /// Names present in the value map, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.0.values.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Serialize serializable properties followed by plain fields.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for name in self.0.class.properties() {
            if let Some(slot) = self.0.class.property(name)
                && slot.meta().is_serializable()
            {
                map.insert(name.clone(), self.get(name).to_json());
            }
        }
        for key in self.keys() {
            if self.0.class.member(&key).is_none() && !key.starts_with('@') {
                map.insert(key.clone(), self.stored(&key).to_json());
            }
        }
        serde_json::Value::Object(map)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn on(&self, event: &str, handler: impl Fn(&Object, &Value) + 'static) -> ListenerId {
        self.add_listener(event, Listener::new(None, Rc::new(handler)))
    }

    /// Register a handler tagged with `owner` for bulk removal via [`off_owner`](Self::off_owner).
    pub fn on_owned(
        &self,
        event: &str,
        owner: &Object,
        handler: impl Fn(&Object, &Value) + 'static,
    ) -> ListenerId {
        self.add_listener(event, Listener::new(Some(owner), Rc::new(handler)))
    }

    fn add_listener(&self, event: &str, listener: Listener) -> ListenerId {
        let id = listener.id;
        self.0
            .listeners
            .borrow_mut()
            .entry(event.to_string())
            .or_default()
            .list
            .push(listener);
        id
    }

    /// Install the exclusive handler for `event`, replacing any previous one.
    pub fn upon(&self, event: &str, handler: impl Fn(&Object, &Value) + 'static) -> ListenerId {
        let listener = Listener::new(None, Rc::new(handler));
        let id = listener.id;
        let previous = self
            .0
            .listeners
            .borrow_mut()
            .entry(event.to_string())
            .or_default()
            .exclusive
            .replace(listener);
        if let Some(previous) = previous {
            previous.retire();
        }
        id
    }

    pub fn clear_upon(&self, event: &str) {
        let previous = self
            .0
            .listeners
            .borrow_mut()
            .get_mut(event)
            .and_then(|slots| slots.exclusive.take());
        if let Some(previous) = previous {
            previous.retire();
        }
    }

    /// Whether an exclusive handler is installed for `event`.
    #[must_use]
    pub fn has_upon(&self, event: &str) -> bool {
        self.0
            .listeners
            .borrow()
            .get(event)
            .is_some_and(|slots| slots.exclusive.is_some())
    }

    /// Remove a listener by id; also matches the exclusive slot.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.0.listeners.borrow_mut();
        let Some(slots) = listeners.get_mut(event) else {
            return false;
        };
        if slots.exclusive.as_ref().is_some_and(|l| l.id == id) {
            if let Some(l) = slots.exclusive.take() {
                l.retire();
            }
            return true;
        }
        match slots.list.iter().position(|l| l.id == id) {
            Some(pos) => {
                slots.list.remove(pos).retire();
                true
            }
            None => false,
        }
    }

    /// Remove every listener on `event` registered with `owner`.
    pub fn off_owner(&self, event: &str, owner: &Object) -> usize {
        let mut listeners = self.0.listeners.borrow_mut();
        let Some(slots) = listeners.get_mut(event) else {
            return 0;
        };
        let before = slots.list.len();
        slots.list.retain(|l| {
            let keep = !l.owner.as_ref().is_some_and(|o| o.is(owner));
            if !keep {
                l.retire();
            }
            keep
        });
        before - slots.list.len()
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.0.listeners.borrow().get(event).map_or(0, |slots| {
            slots.list.len() + usize::from(slots.exclusive.is_some())
        })
    }

    /// Fire `event`: the exclusive handler first, then listeners in order.
    pub fn fire(&self, event: &str, data: impl Into<Value>) {
        let data = data.into();
        let snapshot: Vec<Listener> = match self.0.listeners.borrow().get(event) {
            Some(slots) => slots
                .exclusive
                .iter()
                .chain(slots.list.iter())
                .cloned()
                .collect(),
            None => return,
        };
        #[cfg(feature = "tracing")]
        tracing::trace!(object = self.0.id, event, handlers = snapshot.len(), "fire");
        for listener in snapshot {
            if listener.active.get() {
                (listener.handler)(self, &data);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Extensions and links
    // -----------------------------------------------------------------------

    /// Typed native state attached to this instance.
    #[must_use]
    pub fn extension<T: Any>(&self) -> Option<Rc<T>> {
        let ext = self.0.extensions.borrow().get(&TypeId::of::<T>()).cloned()?;
        ext.downcast::<T>().ok()
    }

    pub fn extension_or_init<T: Any>(&self, init: impl FnOnce() -> T) -> Rc<T> {
        if let Some(ext) = self.extension::<T>() {
            return ext;
        }
        let ext = Rc::new(init());
        self.0
            .extensions
            .borrow_mut()
            .insert(TypeId::of::<T>(), Rc::clone(&ext) as Rc<dyn Any>);
        ext
    }

    /// Store `link` under `name`, releasing the link it replaces.
    pub fn attach_link(&self, name: &str, link: Rc<dyn Link>) {
        let previous = self.0.links.borrow_mut().insert(name.to_string(), link);
        if let Some(previous) = previous {
            previous.release();
        }
    }

    #[must_use]
    pub fn link(&self, name: &str) -> Option<Rc<dyn Link>> {
        self.0.links.borrow().get(name).cloned()
    }

    /// Remove and release the link stored under `name`.
    pub fn detach_link(&self, name: &str) -> bool {
        let removed = self.0.links.borrow_mut().remove(name);
        match removed {
            Some(link) => {
                link.release();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn link_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.links.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    // -----------------------------------------------------------------------
    // Disposal
    // -----------------------------------------------------------------------

    /// Run the class's `dispose` method once.
    pub fn dispose(&self) {
        if self.0.disposed.replace(true) {
            return;
        }
        if let Err(err) = self.call("dispose", &[]) {
            #[cfg(feature = "tracing")]
            tracing::warn!(class = %self.0.class.name(), error = %err, "dispose failed");
            #[cfg(not(feature = "tracing"))]
            let _ = err;
        }
    }

    /// Clear watchers, listeners and links. Called by the base `dispose`.
    pub fn release(&self) {
        let watchers = std::mem::take(&mut *self.0.watchers.borrow_mut());
        for watcher in watchers.values().flatten() {
            watcher.retire();
        }
        let listeners = std::mem::take(&mut *self.0.listeners.borrow_mut());
        for slots in listeners.values() {
            for listener in slots.exclusive.iter().chain(slots.list.iter()) {
                listener.retire();
            }
        }
        let links = std::mem::take(&mut *self.0.links.borrow_mut());
        for link in links.values() {
            link.release();
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.0.class.name())
            .field("id", &self.0.id)
            .finish()
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Object {}
