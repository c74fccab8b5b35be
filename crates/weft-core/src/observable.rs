#![forbid(unsafe_code)]

//! Property watchers and change fan-out.
//!
//! Only instances whose class derives from the built-in `Observable` class
//! accept watchers. Watching a property wraps it on the instance's class
//! (see [`ClassDescriptor::observe`](crate::ClassDescriptor::observe)); from
//! then on every write through [`Object::set`] is identity-guarded and
//! notifies the property plus its one-level `refs`.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::object::{Object, WeakObject};
use crate::value::Value;

static WATCH_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`Object::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

/// Property selection for watch/notify calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Names {
    /// `"*"`
    All,
    List(Vec<String>),
}

impl Names {
    fn resolve(&self, all: impl FnOnce() -> Vec<String>) -> Vec<String> {
        match self {
            Self::All => all(),
            Self::List(names) => names.clone(),
        }
    }
}

impl From<&str> for Names {
    /// `"*"` selects everything; otherwise a comma-separated list.
    fn from(s: &str) -> Self {
        if s.trim() == "*" {
            return Self::All;
        }
        Self::List(
            s.split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl From<String> for Names {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<&[&str]> for Names {
    fn from(names: &[&str]) -> Self {
        Self::List(names.iter().map(|n| (*n).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Names {
    fn from(names: [&str; N]) -> Self {
        Self::List(names.iter().map(|n| (*n).to_string()).collect())
    }
}

impl From<Vec<String>> for Names {
    fn from(names: Vec<String>) -> Self {
        Self::List(names)
    }
}

/// A property change delivered to watchers.
#[derive(Debug, Clone)]
pub struct Change {
    pub target: Object,
    pub property: String,
    pub value: Value,
    /// Value before the write. Dependents report what they computed before it.
    pub old: Value,
    /// The owner the watcher was registered with, if still alive.
    pub owner: Option<Object>,
}

pub type WatchHandler = Rc<dyn Fn(&Change)>;

#[derive(Clone)]
pub(crate) struct Watcher {
    id: WatchId,
    owner: Option<WeakObject>,
    handler: WatchHandler,
    active: Rc<Cell<bool>>,
}

impl Watcher {
    pub(crate) fn retire(&self) {
        self.active.set(false);
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("active", &self.active.get())
            .finish()
    }
}

impl Object {
    /// Watch one or more properties (or fields).
    ///
    /// `"*"` watches every declared property. The same [`WatchId`] covers
    /// all selected names.
    pub fn watch(
        &self,
        names: impl Into<Names>,
        handler: impl Fn(&Change) + 'static,
    ) -> Result<WatchId> {
        self.add_watcher(names.into(), None, Rc::new(handler))
    }

    /// Like [`watch`](Self::watch), tagged with `owner` for [`unwatch_owner`](Self::unwatch_owner).
    pub fn watch_owned(
        &self,
        names: impl Into<Names>,
        owner: &Object,
        handler: impl Fn(&Change) + 'static,
    ) -> Result<WatchId> {
        self.add_watcher(names.into(), Some(owner.downgrade()), Rc::new(handler))
    }

    fn add_watcher(
        &self,
        names: Names,
        owner: Option<WeakObject>,
        handler: WatchHandler,
    ) -> Result<WatchId> {
        if !self.class().is_observable() {
            return Err(Error::NotObservable {
                class: self.class().name().to_string(),
            });
        }
        let id = WatchId(WATCH_ID_COUNTER.fetch_add(1, Ordering::Relaxed));
        let active = Rc::new(Cell::new(true));
        for name in names.resolve(|| self.class().properties().to_vec()) {
            self.class().observe(&name);
            let watcher = Watcher {
                id,
                owner: owner.clone(),
                handler: Rc::clone(&handler),
                active: Rc::clone(&active),
            };
            self.inner()
                .watchers
                .borrow_mut()
                .entry(name)
                .or_default()
                .push(watcher);
        }
        Ok(id)
    }

    /// Remove watcher `id` from the selected names.
    pub fn unwatch(&self, names: impl Into<Names>, id: WatchId) -> bool {
        let names = names.into();
        let mut watchers = self.inner().watchers.borrow_mut();
        let selected = names.resolve(|| watchers.keys().cloned().collect());
        let mut removed = false;
        for name in selected {
            if let Some(list) = watchers.get_mut(&name) {
                list.retain(|w| {
                    let keep = w.id != id;
                    if !keep {
                        w.retire();
                        removed = true;
                    }
                    keep
                });
            }
        }
        watchers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Remove every watcher registered with `owner` on the selected names.
    pub fn unwatch_owner(&self, names: impl Into<Names>, owner: &Object) -> usize {
        let names = names.into();
        let mut watchers = self.inner().watchers.borrow_mut();
        let selected = names.resolve(|| watchers.keys().cloned().collect());
        let mut removed = 0;
        for name in selected {
            if let Some(list) = watchers.get_mut(&name) {
                list.retain(|w| {
                    let keep = !w.owner.as_ref().is_some_and(|o| o.is(owner));
                    if !keep {
                        w.retire();
                        removed += 1;
                    }
                    keep
                });
            }
        }
        watchers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Notify watchers of the selected names with their current value.
    /// `"*"` selects every currently watched name.
    pub fn notify(&self, names: impl Into<Names>, old: impl Into<Value>) {
        let names = names.into();
        let old = old.into();
        let selected = {
            let watchers = self.inner().watchers.borrow();
            let mut all: Vec<String> = watchers.keys().cloned().collect();
            all.sort();
            names.resolve(|| all)
        };
        for name in selected {
            let value = self.get(&name);
            self.dispatch(&name, &value, &old);
        }
    }

    #[must_use]
    pub fn watcher_count(&self, name: &str) -> usize {
        self.inner()
            .watchers
            .borrow()
            .get(name)
            .map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_watched(&self, name: &str) -> bool {
        self.watcher_count(name) > 0
    }

    pub(crate) fn dispatch(&self, name: &str, value: &Value, old: &Value) {
        let snapshot: Vec<Watcher> = match self.inner().watchers.borrow().get(name) {
            Some(list) => list.clone(),
            None => return,
        };
        #[cfg(feature = "tracing")]
        tracing::trace!(
            object = self.id(),
            property = name,
            watchers = snapshot.len(),
            "notify"
        );
        for watcher in snapshot {
            if !watcher.active.get() {
                continue;
            }
            let owner = match &watcher.owner {
                Some(weak) => match weak.upgrade() {
                    Some(owner) => Some(owner),
                    None => continue,
                },
                None => None,
            };
            let change = Change {
                target: self.clone(),
                property: name.to_string(),
                value: value.clone(),
                old: old.clone(),
                owner,
            };
            (watcher.handler)(&change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassSpec, Property};
    use crate::Registry;
    use std::cell::RefCell;

    fn person(registry: &Registry) -> crate::Class {
        registry
            .define(
                ClassSpec::new("Person")
                    .extends(&registry.observable())
                    .property("first", Property::new().value("Ada"))
                    .property("last", Property::new().value("Lovelace"))
                    .property(
                        "full",
                        Property::new()
                            .get(|o| Value::from(format!("{} {}", o.get("first"), o.get("last"))))
                            .depends_on(["first", "last"]),
                    )
                    .property(
                        "initials",
                        Property::new()
                            .get(|o| {
                                Value::from(
                                    o.get("full")
                                        .to_string()
                                        .split(' ')
                                        .filter_map(|p| p.chars().next())
                                        .collect::<String>(),
                                )
                            })
                            .depends_on(["full"]),
                    ),
            )
            .expect("define Person")
    }

    fn log(obj: &Object, names: &str) -> Rc<RefCell<Vec<(String, Value, Value)>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        obj.watch(names, move |c| {
            sink.borrow_mut()
                .push((c.property.clone(), c.value.clone(), c.old.clone()));
        })
        .expect("watch");
        log
    }

    #[test]
    fn plain_objects_refuse_watchers() {
        let obj = Object::plain();
        assert!(matches!(
            obj.watch("x", |_| {}),
            Err(Error::NotObservable { .. })
        ));
    }

    #[test]
    fn identical_write_is_skipped() {
        let registry = Registry::new();
        let p = person(&registry).instantiate().expect("instantiate");
        let seen = log(&p, "first");
        p.set("first", "Ada");
        assert!(seen.borrow().is_empty());
        p.set_forced("first", "Ada");
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn dependents_notified_one_level_only() {
        let registry = Registry::new();
        let p = person(&registry).instantiate().expect("instantiate");
        let seen = log(&p, "first, full, initials");
        p.set("first", "Grace");
        let names: Vec<String> = seen.borrow().iter().map(|(n, _, _)| n.clone()).collect();
        assert_eq!(names, vec!["first", "full"]);
        let (_, full, old) = &seen.borrow()[1];
        assert_eq!(full, &Value::from("Grace Lovelace"));
        assert_eq!(old, &Value::from("Ada Lovelace"));
    }

    #[test]
    fn star_watches_every_property_and_notify_fans_out() {
        let registry = Registry::new();
        let p = person(&registry).instantiate().expect("instantiate");
        let seen = log(&p, "*");
        p.notify("*", Value::Undefined);
        assert_eq!(seen.borrow().len(), 4);
    }

    #[test]
    fn observable_fields_notify() {
        let obj = Object::observable_from([("count", 1)]);
        let seen = log(&obj, "count");
        obj.set("count", 1);
        obj.set("count", 2);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].2, Value::from(1));
    }

    #[test]
    fn watcher_removed_during_cycle_does_not_fire() {
        let obj = Object::observable();
        let fired = Rc::new(Cell::new(false));
        let victim: Rc<Cell<Option<WatchId>>> = Rc::new(Cell::new(None));
        let v = Rc::clone(&victim);
        obj.watch("x", move |c| {
            if let Some(id) = v.get() {
                c.target.unwatch("x", id);
            }
        })
        .expect("watch");
        let f = Rc::clone(&fired);
        victim.set(Some(obj.watch("x", move |_| f.set(true)).expect("watch")));
        obj.set("x", 1);
        assert!(!fired.get());
        assert_eq!(obj.watcher_count("x"), 1);
    }

    #[test]
    fn owned_watchers_carry_owner_and_unwatch_together() {
        let obj = Object::observable();
        let owner = Object::plain();
        let seen_owner = Rc::new(Cell::new(0_u64));
        let s = Rc::clone(&seen_owner);
        obj.watch_owned("a, b", &owner, move |c| {
            s.set(c.owner.as_ref().map_or(0, Object::id));
        })
        .expect("watch");
        obj.set("a", 1);
        assert_eq!(seen_owner.get(), owner.id());
        assert_eq!(obj.unwatch_owner("*", &owner), 2);
        assert!(!obj.is_watched("a"));
    }

    #[test]
    fn dispose_clears_watchers() {
        let obj = Object::observable();
        let _ = log(&obj, "x");
        obj.dispose();
        assert_eq!(obj.watcher_count("x"), 0);
    }
}
