#![forbid(unsafe_code)]

//! Live path bindings between objects.
//!
//! A [`Binding`] walks a dotted path from a source object, one hop per
//! segment. Hop *i* holds the object reached after *i* segments and, when
//! that object is observable, a watcher on segment *i*. When hop *i*
//! reports a change the hops after it are torn down and re-resolved, then
//! the terminal value is pushed into the target.
//!
//! # Usage
//!
//! ```ignore
//! use weft_core::Object;
//! use weft_runtime::Bindable;
//!
//! let person = Object::observable_from([("name", "Ada")]);
//! let root = Object::observable_from([("person", person.clone())]);
//! let label = Object::observable();
//!
//! label.set_binding("text", "person.name", &root)?;
//! assert_eq!(label.get("text"), "Ada".into());
//!
//! person.set("name", "Grace");
//! assert_eq!(label.get("text"), "Grace".into());
//! ```
//!
//! # Two-Way Bindings
//!
//! With `<>` (or `->`) the target property is watched as well and changes
//! are converted back and written to the object at the last hop. The
//! binding raises an `updating` flag around every write it performs, and
//! both directions ignore notifications while the flag is up, so a write
//! never echoes back through the binding that made it.
//!
//! # Failure Modes
//!
//! - Intermediate hop missing or not an object: the chain stops there and
//!   the terminal value is `Undefined` until the hop is set.
//! - Target dropped: the binding stays inert; its watchers are removed when
//!   the last handle to it drops.
//! - Event handler returning `Err`: logged at `warn`, not propagated.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use weft_core::{
    Change, Direction, Link, MemberKind, Object, Value, WatchId, WeakObject,
};

use super::converter::Converter;
use super::format::format_value;
use super::spec::{BindingKind, BindingSpec};
use crate::error::{BindingError, Result};

struct Hop {
    object: Object,
    watch: Option<WatchId>,
}

pub(crate) struct BindingInner {
    this: Weak<BindingInner>,
    target: WeakObject,
    name: String,
    kind: BindingKind,
    path: Vec<String>,
    direction: Direction,
    converter: Option<Converter>,
    format: Option<String>,
    source: RefCell<Option<Object>>,
    hops: RefCell<Vec<Hop>>,
    value: RefCell<Value>,
    target_watch: Cell<Option<WatchId>>,
    updating: Cell<bool>,
    released: Cell<bool>,
}

/// Handle to a live binding. Cloning shares the binding.
#[derive(Clone)]
pub struct Binding(Rc<BindingInner>);

impl Binding {
    fn create(target: &Object, name: &str, spec: BindingSpec, source: &Object) -> Result<Self> {
        let kind = match spec.kind {
            Some(kind) => kind,
            None => match target.member_kind(name) {
                MemberKind::Event => BindingKind::Event,
                MemberKind::Method => {
                    return Err(BindingError::NotBindable {
                        class: target.class().name().to_string(),
                        name: name.to_string(),
                    });
                }
                MemberKind::Property | MemberKind::Field => BindingKind::Property,
            },
        };

        let defaults = target
            .class()
            .property(name)
            .and_then(|slot| slot.meta().binding.clone())
            .unwrap_or_default();
        let converter = match (spec.converter, defaults.converter) {
            (Some(converter), _) => Some(converter),
            (None, Some(named)) => Some(
                Converter::named(&named)
                    .ok_or(BindingError::UnknownConverter { name: named })?,
            ),
            (None, None) => None,
        };
        let direction = spec
            .direction
            .or(defaults.direction)
            .unwrap_or_default();
        let format = spec.format.or(defaults.format);
        let path = BindingSpec::new(spec.path).segments();

        if kind == BindingKind::Property {
            target.class().observe(name);
        }

        let inner = Rc::new_cyclic(|this| BindingInner {
            this: this.clone(),
            target: target.downgrade(),
            name: name.to_string(),
            kind,
            path,
            direction,
            converter,
            format,
            source: RefCell::new(Some(source.clone())),
            hops: RefCell::new(Vec::new()),
            value: RefCell::new(Value::Undefined),
            target_watch: Cell::new(None),
            updating: Cell::new(false),
            released: Cell::new(false),
        });

        tracing::debug!(
            target_class = %target.class().name(),
            property = name,
            path = %inner.path.join("."),
            direction = direction.as_str(),
            "binding created"
        );

        target.attach_link(name, Rc::clone(&inner) as Rc<dyn Link>);
        let binding = Self(inner);
        if let Err(err) = binding.0.connect(target) {
            target.detach_link(name);
            return Err(err);
        }
        Ok(binding)
    }

    #[must_use]
    pub fn target(&self) -> Option<Object> {
        self.0.target.upgrade()
    }

    /// Bound target member name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn kind(&self) -> BindingKind {
        self.0.kind
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.0.direction
    }

    #[must_use]
    pub fn path(&self) -> String {
        self.0.path.join(".")
    }

    #[must_use]
    pub fn format(&self) -> Option<&str> {
        self.0.format.as_deref()
    }

    #[must_use]
    pub fn source(&self) -> Option<Object> {
        self.0.source.borrow().clone()
    }

    /// Last value pushed toward the target, after conversion and formatting.
    #[must_use]
    pub fn value(&self) -> Value {
        self.0.value.borrow().clone()
    }

    /// Number of hops currently resolved.
    #[must_use]
    pub fn hop_count(&self) -> usize {
        self.0.hops.borrow().len()
    }

    /// Objects currently held by the hop chain, source first.
    #[must_use]
    pub fn hop_objects(&self) -> Vec<Object> {
        self.0.hops.borrow().iter().map(|h| h.object.clone()).collect()
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.0.released.get()
    }

    /// Re-root the path at `source`: the whole chain is rebuilt and the
    /// target re-synchronized.
    pub fn set_source(&self, source: &Object) -> Result<()> {
        let Some(target) = self.0.target.upgrade() else {
            return Ok(());
        };
        tracing::trace!(property = %self.0.name, source = source.id(), "binding source replaced");
        self.0.teardown();
        self.0.released.set(false);
        *self.0.source.borrow_mut() = Some(source.clone());
        self.0.connect(&target)
    }

    /// Re-read the path and push it into the target.
    pub fn refresh(&self) {
        self.0.rebuild_from(0);
        self.0.update_target();
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Binding) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.0.name)
            .field("path", &self.path())
            .field("direction", &self.0.direction)
            .field("hops", &self.hop_count())
            .field("released", &self.is_released())
            .finish()
    }
}

impl BindingInner {
    /// Build the chain, install the target watcher and run the initial sync.
    fn connect(&self, target: &Object) -> Result<()> {
        self.rebuild_from(0);
        if self.kind == BindingKind::Property && self.direction.writes_source() {
            let this = self.this.clone();
            let id = target.watch(self.name.as_str(), move |change| {
                if let Some(inner) = this.upgrade() {
                    inner.on_target_changed(change);
                }
            })?;
            self.target_watch.set(Some(id));
        }
        if self.direction.reads_source() || self.kind == BindingKind::Event {
            self.update_target();
        } else {
            self.write_source(&target.get(&self.name));
        }
        Ok(())
    }

    /// Drop hops from `start` on and resolve them again.
    fn rebuild_from(&self, start: usize) {
        if self.released.get() {
            return;
        }
        let removed: Vec<Hop> = {
            let mut hops = self.hops.borrow_mut();
            let start = start.min(hops.len());
            hops.drain(start..).collect()
        };
        let first = start.min(self.hops.borrow().len());
        for (offset, hop) in removed.into_iter().enumerate() {
            if let Some(id) = hop.watch {
                hop.object.unwatch(self.path[first + offset].as_str(), id);
            }
        }

        let mut current = if first == 0 {
            self.source.borrow().clone()
        } else {
            let previous = self.hops.borrow()[first - 1].object.clone();
            previous.get(&self.path[first - 1]).as_object().cloned()
        };

        for index in first..self.path.len() {
            let Some(object) = current.take() else {
                break;
            };
            let watch = if object.class().is_observable() {
                let this = self.this.clone();
                object
                    .watch(self.path[index].as_str(), move |_| {
                        if let Some(inner) = this.upgrade() {
                            inner.on_hop_changed(index);
                        }
                    })
                    .ok()
            } else {
                None
            };
            if index + 1 < self.path.len() {
                current = object.get(&self.path[index]).as_object().cloned();
            }
            self.hops.borrow_mut().push(Hop { object, watch });
        }

        tracing::trace!(
            property = %self.name,
            from = first,
            hops = self.hops.borrow().len(),
            "binding chain rebuilt"
        );
    }

    fn on_hop_changed(&self, index: usize) {
        if self.released.get() {
            return;
        }
        self.rebuild_from(index + 1);
        if !self.updating.get() && (self.direction.reads_source() || self.kind == BindingKind::Event) {
            self.update_target();
        }
    }

    fn on_target_changed(&self, change: &Change) {
        if self.released.get() || self.updating.get() {
            return;
        }
        self.write_source(&change.value);
    }

    /// The object at the last hop and the terminal value of the path.
    fn terminal(&self) -> (Option<Object>, Value) {
        let Some(last) = self.path.last() else {
            let source = self.source.borrow().clone();
            return (None, source.map(Value::Object).unwrap_or_default());
        };
        let holder = {
            let hops = self.hops.borrow();
            if hops.len() < self.path.len() {
                return (None, Value::Undefined);
            }
            hops[self.path.len() - 1].object.clone()
        };
        let value = holder.get(last);
        (Some(holder), value)
    }

    fn update_target(&self) {
        if self.released.get() {
            return;
        }
        let Some(target) = self.target.upgrade() else {
            return;
        };
        let (_, raw) = self.terminal();
        match self.kind {
            BindingKind::Property => {
                let mut value = match &self.converter {
                    Some(converter) => converter.convert(&raw),
                    None => raw,
                };
                if let Some(format) = &self.format {
                    value = Value::from(format_value(format, &value));
                }
                *self.value.borrow_mut() = value.clone();
                self.updating.set(true);
                target.set(&self.name, value);
                self.updating.set(false);
            }
            BindingKind::Event => {
                *self.value.borrow_mut() = raw.clone();
                match raw {
                    Value::Function(handler) => {
                        let event = self.name.clone();
                        target.upon(&self.name, move |_, data| {
                            if let Err(err) = handler.call(std::slice::from_ref(data)) {
                                tracing::warn!(event = %event, error = %err, "bound event handler failed");
                            }
                        });
                    }
                    _ => target.clear_upon(&self.name),
                }
            }
        }
    }

    fn write_source(&self, value: &Value) {
        let Some(last) = self.path.last() else {
            return;
        };
        let (Some(holder), _) = self.terminal() else {
            return;
        };
        let value = match &self.converter {
            Some(converter) => converter.convert_back(value),
            None => value.clone(),
        };
        self.updating.set(true);
        holder.set(last, value);
        self.updating.set(false);
    }

    fn teardown(&self) {
        let hops = std::mem::take(&mut *self.hops.borrow_mut());
        for (index, hop) in hops.into_iter().enumerate() {
            if let Some(id) = hop.watch {
                hop.object.unwatch(self.path[index].as_str(), id);
            }
        }
        if let Some(target) = self.target.upgrade() {
            if let Some(id) = self.target_watch.take() {
                target.unwatch(self.name.as_str(), id);
            }
            if self.kind == BindingKind::Event && !self.released.get() {
                target.clear_upon(&self.name);
            }
        }
        self.released.set(true);
    }
}

impl Link for BindingInner {
    fn release(&self) {
        if self.released.get() {
            return;
        }
        tracing::debug!(property = %self.name, path = %self.path.join("."), "binding released");
        self.teardown();
        self.source.borrow_mut().take();
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn std::any::Any> {
        self
    }
}

impl Drop for BindingInner {
    fn drop(&mut self) {
        let hops = std::mem::take(self.hops.get_mut());
        for (index, hop) in hops.into_iter().enumerate() {
            if let Some(id) = hop.watch {
                hop.object.unwatch(self.path[index].as_str(), id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Bindable
// ---------------------------------------------------------------------------

/// Binding operations on [`Object`].
pub trait Bindable {
    /// Bind `name` on `self` to `spec` rooted at `source`, replacing any
    /// existing binding on `name`.
    fn set_binding(
        &self,
        name: &str,
        spec: impl Into<BindingSpec>,
        source: &Object,
    ) -> Result<Binding>;

    fn get_binding(&self, name: &str) -> Option<Binding>;

    /// Release the binding on `name`. Returns whether one existed.
    fn clear_binding(&self, name: &str) -> bool;
}

impl Bindable for Object {
    fn set_binding(
        &self,
        name: &str,
        spec: impl Into<BindingSpec>,
        source: &Object,
    ) -> Result<Binding> {
        Binding::create(self, name, spec.into(), source)
    }

    fn get_binding(&self, name: &str) -> Option<Binding> {
        self.link(name)?
            .into_any()
            .downcast::<BindingInner>()
            .ok()
            .map(Binding)
    }

    fn clear_binding(&self, name: &str) -> bool {
        if self.get_binding(name).is_none() {
            return false;
        }
        self.detach_link(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;
    use weft_core::{BindingDefaults, ClassSpec, Function, Property, Registry};

    fn person(name: &str) -> Object {
        Object::observable_from([("name", name)])
    }

    #[test]
    fn one_way_follows_source() {
        let p = person("Ada");
        let root = Object::observable_from([("person", p.clone())]);
        let label = Object::observable();
        let binding = label.set_binding("text", "person.name", &root).expect("bind");
        assert_eq!(label.get("text"), Value::from("Ada"));
        assert_eq!(binding.hop_count(), 2);
        p.set("name", "Grace");
        assert_eq!(label.get("text"), Value::from("Grace"));
    }

    #[test]
    fn replacing_intermediate_rebinds_without_stale_watchers() {
        let first = person("Ada");
        let second = person("Grace");
        let root = Object::observable_from([("person", first.clone())]);
        let label = Object::observable();
        label.set_binding("text", "person.name", &root).expect("bind");
        assert_eq!(first.watcher_count("name"), 1);

        root.set("person", second.clone());
        assert_eq!(label.get("text"), Value::from("Grace"));
        assert_eq!(first.watcher_count("name"), 0);
        assert_eq!(second.watcher_count("name"), 1);
        assert_eq!(root.watcher_count("person"), 1);

        first.set("name", "stale");
        assert_eq!(label.get("text"), Value::from("Grace"));
    }

    #[test]
    fn missing_hop_yields_undefined_until_set() {
        let root = Object::observable();
        let label = Object::observable();
        let binding = label.set_binding("text", "person.name", &root).expect("bind");
        assert_eq!(binding.hop_count(), 1);
        assert!(label.get("text").is_undefined());
        root.set("person", person("Late"));
        assert_eq!(label.get("text"), Value::from("Late"));
        assert_eq!(binding.hop_count(), 2);
    }

    #[test]
    fn plain_hops_are_read_but_not_watched() {
        let plain = Object::plain();
        plain.set("name", "fixed");
        let root = Object::observable_from([("person", plain.clone())]);
        let label = Object::observable();
        label.set_binding("text", "person.name", &root).expect("bind");
        assert_eq!(label.get("text"), Value::from("fixed"));
        plain.set("name", "changed");
        assert_eq!(label.get("text"), Value::from("fixed"));
    }

    #[test]
    fn format_and_converter() {
        let model = Object::observable_from([("count", 0)]);
        let label = Object::observable();
        let spec = BindingSpec::parse("count, converter=inverted, format=empty: {0}").expect("spec");
        let binding = label.set_binding("text", spec, &model).expect("bind");
        assert_eq!(label.get("text"), Value::from("empty: true"));
        model.set("count", 3);
        assert_eq!(label.get("text"), Value::from("empty: false"));
        assert_eq!(binding.value(), Value::from("empty: false"));
    }

    #[test]
    fn two_way_writes_back_without_echo() {
        let model = Object::observable_from([("value", "a")]);
        let input = Object::observable();
        let writes = Rc::new(Cell::new(0));
        let w = Rc::clone(&writes);
        model
            .watch("value", move |_| w.set(w.get() + 1))
            .expect("watch");

        input
            .set_binding("text", BindingSpec::new("value").direction(Direction::Both), &model)
            .expect("bind");
        assert_eq!(input.get("text"), Value::from("a"));

        input.set("text", "typed");
        assert_eq!(model.get("value"), Value::from("typed"));
        assert_eq!(writes.get(), 1);

        model.set("value", "reset");
        assert_eq!(input.get("text"), Value::from("reset"));
        assert_eq!(writes.get(), 2);
    }

    #[test]
    fn target_to_source_pushes_initial_value() {
        let model = Object::observable_from([("value", "old")]);
        let input = Object::observable_from([("text", "initial")]);
        input
            .set_binding("text", "value, direction=->".parse::<BindingSpec>().expect("spec"), &model)
            .expect("bind");
        assert_eq!(model.get("value"), Value::from("initial"));
        model.set("value", "ignored");
        assert_eq!(input.get("text"), Value::from("initial"));
        input.set("text", "sent");
        assert_eq!(model.get("value"), Value::from("sent"));
    }

    #[test]
    fn property_metadata_supplies_defaults() {
        let registry = Registry::new();
        let class = registry
            .define(
                ClassSpec::new("Toggle")
                    .extends(&registry.observable())
                    .property(
                        "checked",
                        Property::new().value(false).binding(BindingDefaults {
                            direction: Some(Direction::Both),
                            converter: Some("boolean".into()),
                            format: None,
                        }),
                    ),
            )
            .expect("define");
        let toggle = class.instantiate().expect("instantiate");
        let model = Object::observable_from([("done", 1)]);
        let binding = toggle.set_binding("checked", "done", &model).expect("bind");
        assert_eq!(binding.direction(), Direction::Both);
        assert_eq!(toggle.get("checked"), Value::from(true));
        toggle.set("checked", false);
        assert_eq!(model.get("done"), Value::from(false));
    }

    #[test]
    fn event_binding_installs_exclusive_handler() {
        let registry = Registry::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let controller = registry
            .define(
                ClassSpec::new("Controller")
                    .extends(&registry.observable())
                    .method("save", move |inv| {
                        h.set(h.get() + inv.arg(0).as_i64().unwrap_or(0));
                        Ok(Value::Undefined)
                    }),
            )
            .expect("define")
            .instantiate()
            .expect("instantiate");
        let button = registry
            .define(ClassSpec::new("Button").extends(&registry.observable()).event("click"))
            .expect("define")
            .instantiate()
            .expect("instantiate");

        let binding = button.set_binding("click", "save", &controller).expect("bind");
        assert_eq!(binding.kind(), BindingKind::Event);
        button.fire("click", 5);
        assert_eq!(hits.get(), 5);

        assert!(button.clear_binding("click"));
        assert!(!button.has_upon("click"));
    }

    #[test]
    fn explicit_event_kind_on_fields_uses_functions() {
        let called = Rc::new(Cell::new(false));
        let c = Rc::clone(&called);
        let model = Object::observable();
        model.set(
            "onPress",
            Function::new(move |_| {
                c.set(true);
                Ok(Value::Undefined)
            }),
        );
        let target = Object::observable();
        target
            .set_binding("press", BindingSpec::new("onPress").kind(BindingKind::Event), &model)
            .expect("bind");
        target.fire("press", Value::Undefined);
        assert!(called.get());
    }

    #[test]
    fn methods_are_not_bindable() {
        let registry = Registry::new();
        let obj = registry
            .define(ClassSpec::new("M").method("go", |_| Ok(Value::Undefined)))
            .expect("define")
            .instantiate()
            .expect("instantiate");
        assert!(matches!(
            obj.set_binding("go", "x", &Object::observable()),
            Err(BindingError::NotBindable { .. })
        ));
    }

    #[test]
    fn two_way_needs_observable_target() {
        let model = Object::observable_from([("v", 1)]);
        let plain = Object::plain();
        let result = plain.set_binding("v", BindingSpec::new("v").direction(Direction::Both), &model);
        assert!(matches!(result, Err(BindingError::Core(_))));
        assert!(plain.get_binding("v").is_none());
        assert_eq!(model.watcher_count("v"), 0);
    }

    #[test]
    fn clear_replace_and_dispose_release() {
        let model = Object::observable_from([("a", 1), ("b", 2)]);
        let label = Object::observable();
        let first = label.set_binding("text", "a", &model).expect("bind");
        let second = label.set_binding("text", "b", &model).expect("bind");
        assert!(first.is_released());
        assert_eq!(model.watcher_count("a"), 0);
        assert!(label.get_binding("text").is_some_and(|b| b.ptr_eq(&second)));

        assert!(label.clear_binding("text"));
        assert!(!label.clear_binding("text"));
        assert_eq!(model.watcher_count("b"), 0);

        label.set_binding("text", "a", &model).expect("bind");
        label.dispose();
        assert_eq!(model.watcher_count("a"), 0);
    }

    #[test]
    fn set_source_rebuilds_whole_chain() {
        let a = Object::observable_from([("name", "A")]);
        let b = Object::observable_from([("name", "B")]);
        let label = Object::observable();
        let binding = label.set_binding("text", "name", &a).expect("bind");
        binding.set_source(&b).expect("rebind");
        assert_eq!(label.get("text"), Value::from("B"));
        assert_eq!(a.watcher_count("name"), 0);
        a.set("name", "A2");
        assert_eq!(label.get("text"), Value::from("B"));
    }

    #[test]
    fn empty_path_binds_whole_source() {
        let model = Object::observable();
        let target = Object::observable();
        target.set_binding("model", "", &model).expect("bind");
        assert!(target.get("model").same(&Value::from(model)));
    }

    #[derive(Default)]
    struct Seen {
        messages: Vec<String>,
    }

    struct Capture {
        seen: Arc<Mutex<Seen>>,
    }

    impl<S: tracing::Subscriber> Layer<S> for Capture {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            struct Msg(Option<String>);
            impl tracing::field::Visit for Msg {
                fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
                    if field.name() == "message" {
                        self.0 = Some(format!("{value:?}").trim_matches('"').to_string());
                    }
                }
            }
            let mut msg = Msg(None);
            event.record(&mut msg);
            if let Some(message) = msg.0 {
                self.seen.lock().expect("capture lock").messages.push(message);
            }
        }
    }

    #[test]
    fn lifecycle_is_traced() {
        let seen = Arc::new(Mutex::new(Seen::default()));
        let subscriber = tracing_subscriber::registry().with(Capture {
            seen: Arc::clone(&seen),
        });
        let _guard = tracing::subscriber::set_default(subscriber);

        let model = Object::observable_from([("a", 1)]);
        let label = Object::observable();
        label.set_binding("text", "a", &model).expect("bind");
        label.clear_binding("text");

        let seen = seen.lock().expect("capture lock");
        assert!(seen.messages.iter().any(|m| m == "binding created"));
        assert!(seen.messages.iter().any(|m| m == "binding released"));
    }
}
