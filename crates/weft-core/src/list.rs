#![forbid(unsafe_code)]

//! Ordered collection with mutation notifications.
//!
//! [`List`] is the iterable primitive consumed by template materialization:
//! every mutation emits exactly one [`ListChange`] describing the delta.
//!
//! # Invariants
//!
//! 1. Handlers observe the list *after* the mutation has been applied.
//! 2. Handlers fire in subscription order.
//! 3. A handler unsubscribed during emission does not fire afterwards.
//! 4. No borrow of the item storage is held while handlers run, so handlers
//!    may read (and mutate) the list re-entrantly. Iteration through
//!    [`List::to_vec`] is a snapshot and does not observe later mutation.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::value::Value;

static CHANGE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`List::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeId(u64);

/// A delta emitted after a list mutation.
#[derive(Debug, Clone)]
pub enum ListChange {
    /// `items` were inserted starting at `index`.
    Add { index: usize, items: Vec<Value> },
    /// `items` were removed; `index` is where the first one used to be.
    Remove { index: usize, items: Vec<Value> },
    /// The item at `index` was replaced.
    Replace { index: usize, old: Value, new: Value },
    /// Items were reordered in place; membership is unchanged.
    Sort,
    /// Contents were replaced wholesale.
    Reset,
}

type ChangeHandler = Rc<dyn Fn(&List, &ListChange)>;

#[derive(Clone)]
struct Subscriber {
    id: ChangeId,
    handler: ChangeHandler,
    active: Rc<Cell<bool>>,
}

struct ListInner {
    items: RefCell<Vec<Value>>,
    subscribers: RefCell<Vec<Subscriber>>,
}

/// Shared, observable, ordered collection of [`Value`]s.
///
/// Cloning a `List` creates a new handle to the same storage.
#[derive(Clone)]
pub struct List(Rc<ListInner>);

impl List {
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    #[must_use]
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(ListInner {
            items: RefCell::new(items),
            subscribers: RefCell::new(Vec::new()),
        }))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.items.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.items.borrow().get(index).cloned()
    }

    /// Snapshot of the current items.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    /// Position of the first item [`same`](Value::same) as `value`.
    #[must_use]
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.0.items.borrow().iter().position(|v| v.same(value))
    }

    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.index_of(value).is_some()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &List) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn push(&self, value: impl Into<Value>) {
        let index = self.len();
        self.insert_all(index, vec![value.into()]);
    }

    pub fn extend(&self, values: impl IntoIterator<Item = Value>) {
        let index = self.len();
        self.insert_all(index, values.into_iter().collect());
    }

    /// Insert one item at `index` (clamped to the length).
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        self.insert_all(index, vec![value.into()]);
    }

    /// Insert items at `index` (clamped to the length). Emits a single `Add`.
    pub fn insert_all(&self, index: usize, values: Vec<Value>) {
        if values.is_empty() {
            return;
        }
        let index = {
            let mut items = self.0.items.borrow_mut();
            let index = index.min(items.len());
            items.splice(index..index, values.iter().cloned());
            index
        };
        self.emit(&ListChange::Add {
            index,
            items: values,
        });
    }

    /// Remove the first item identical to `value`.
    pub fn remove(&self, value: &Value) -> bool {
        match self.index_of(value) {
            Some(index) => self.remove_at(index).is_some(),
            None => false,
        }
    }

    pub fn remove_at(&self, index: usize) -> Option<Value> {
        let removed = {
            let mut items = self.0.items.borrow_mut();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        self.emit(&ListChange::Remove {
            index,
            items: vec![removed.clone()],
        });
        Some(removed)
    }

    /// Replace the item at `index`, returning the previous one.
    pub fn replace(&self, index: usize, value: impl Into<Value>) -> Option<Value> {
        let new = value.into();
        let old = {
            let mut items = self.0.items.borrow_mut();
            let slot = items.get_mut(index)?;
            std::mem::replace(slot, new.clone())
        };
        self.emit(&ListChange::Replace {
            index,
            old: old.clone(),
            new,
        });
        Some(old)
    }

    /// Stable sort; emits `Sort`.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        self.0.items.borrow_mut().sort_by(|a, b| compare(a, b));
        self.emit(&ListChange::Sort);
    }

    /// Replace the contents; emits `Reset`.
    pub fn reset(&self, values: Vec<Value>) {
        *self.0.items.borrow_mut() = values;
        self.emit(&ListChange::Reset);
    }

    pub fn clear(&self) {
        self.reset(Vec::new());
    }

    /// Subscribe to change deltas.
    pub fn subscribe(&self, handler: impl Fn(&List, &ListChange) + 'static) -> ChangeId {
        let id = ChangeId(CHANGE_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed));
        self.0.subscribers.borrow_mut().push(Subscriber {
            id,
            handler: Rc::new(handler),
            active: Rc::new(Cell::new(true)),
        });
        id
    }

    pub fn unsubscribe(&self, id: ChangeId) -> bool {
        let mut subscribers = self.0.subscribers.borrow_mut();
        match subscribers.iter().position(|s| s.id == id) {
            Some(pos) => {
                subscribers.remove(pos).active.set(false);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.0.subscribers.borrow().len()
    }

    fn emit(&self, change: &ListChange) {
        let snapshot: Vec<Subscriber> = self.0.subscribers.borrow().clone();
        for subscriber in snapshot {
            if subscriber.active.get() {
                (subscriber.handler)(self, change);
            }
        }
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("len", &self.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl FromIterator<Value> for List {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(list: &List) -> Rc<RefCell<Vec<ListChange>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        list.subscribe(move |_, change| sink.borrow_mut().push(change.clone()));
        log
    }

    #[test]
    fn insert_emits_add_with_clamped_index() {
        let list = List::from_vec(vec![1.into()]);
        let log = record(&list);
        list.insert(10, 2);
        assert_eq!(list.to_vec(), vec![Value::from(1), Value::from(2)]);
        match &log.borrow()[0] {
            ListChange::Add { index, items } => {
                assert_eq!(*index, 1);
                assert_eq!(items.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn remove_by_identity() {
        let a = Value::from(crate::Object::plain());
        let b = Value::from(crate::Object::plain());
        let list = List::from_vec(vec![a.clone(), b.clone()]);
        let log = record(&list);
        assert!(list.remove(&b));
        assert!(!list.remove(&Value::from(crate::Object::plain())));
        assert_eq!(list.len(), 1);
        assert!(matches!(&log.borrow()[0], ListChange::Remove { index: 1, .. }));
    }

    #[test]
    fn replace_reports_old_and_new() {
        let list = List::from_vec(vec!["a".into()]);
        let log = record(&list);
        assert_eq!(list.replace(0, "b"), Some(Value::from("a")));
        assert_eq!(list.replace(3, "z"), None);
        assert!(matches!(
            &log.borrow()[0],
            ListChange::Replace { index: 0, old, new } if old == &Value::from("a") && new == &Value::from("b")
        ));
    }

    #[test]
    fn sort_and_reset() {
        let list = List::from_vec(vec![3.into(), 1.into(), 2.into()]);
        let log = record(&list);
        list.sort_by(|a, b| a.as_i64().cmp(&b.as_i64()));
        assert_eq!(list.to_vec(), vec![1.into(), 2.into(), 3.into()]);
        list.clear();
        assert!(list.is_empty());
        assert!(matches!(log.borrow()[0], ListChange::Sort));
        assert!(matches!(log.borrow()[1], ListChange::Reset));
    }

    #[test]
    fn unsubscribe_during_emit_is_honored() {
        let list = List::new();
        let fired = Rc::new(Cell::new(0));
        let second: Rc<Cell<Option<ChangeId>>> = Rc::new(Cell::new(None));

        let handle = list.clone();
        let slot = Rc::clone(&second);
        list.subscribe(move |_, _| {
            if let Some(id) = slot.get() {
                handle.unsubscribe(id);
            }
        });
        let f = Rc::clone(&fired);
        second.set(Some(list.subscribe(move |_, _| f.set(f.get() + 1))));

        list.push(1);
        assert_eq!(fired.get(), 0);
        assert_eq!(list.subscriber_count(), 1);
    }

    #[test]
    fn handlers_may_read_reentrantly() {
        let list = List::new();
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        list.subscribe(move |l, _| s.set(l.len()));
        list.extend(vec![1.into(), 2.into()]);
        assert_eq!(seen.get(), 2);
    }
}
