#![forbid(unsafe_code)]

//! List-driven child generation for elements.
//!
//! Setting `template` and `items` on an element generates one child per item,
//! with the item as the child's model. Afterwards the element follows the
//! list's deltas instead of rebuilding: adds insert at the matching position,
//! removes dispose the child whose model is the removed item, replaces
//! reassign the model, sorts reorder and resets regenerate.
//!
//! A template is either a view description (compiled per item) or a
//! function taking the item and returning a component.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use weft_core::{Assign, ChangeId, List, ListChange, Object, Value};

use crate::component::ComponentExt;
use crate::error::{Result, ViewError};
use crate::view::ViewSpec;

#[derive(Default)]
struct TemplateState {
    template: RefCell<Value>,
    items: RefCell<Option<List>>,
    subscription: Cell<Option<ChangeId>>,
    generated: RefCell<Vec<Object>>,
    /// Last known index of the generated block among all children, kept for
    /// when the block is empty.
    start: Cell<Option<usize>>,
}

fn state(node: &Object) -> Rc<TemplateState> {
    node.extension_or_init(TemplateState::default)
}

pub(crate) fn template_of(node: &Object) -> Value {
    node.extension::<TemplateState>()
        .map(|st| st.template.borrow().clone())
        .unwrap_or_default()
}

pub(crate) fn set_template(node: &Object, value: Value) -> Assign {
    *state(node).template.borrow_mut() = value;
    regenerate(node);
    Assign::Stored
}

pub(crate) fn items_of(node: &Object) -> Value {
    node.extension::<TemplateState>()
        .and_then(|st| st.items.borrow().clone())
        .map_or(Value::Undefined, Value::List)
}

pub(crate) fn set_items(node: &Object, value: Value) -> Assign {
    let list = match &value {
        Value::Undefined | Value::Null => None,
        Value::List(list) => Some(list.clone()),
        Value::Native(_) => match ViewSpec::from_value(&value).map(ViewSpec::data) {
            Some(Value::List(list)) => Some(list),
            _ => {
                tracing::warn!(object = node.id(), "items must be a list");
                return Assign::Rejected;
            }
        },
        other => {
            tracing::warn!(object = node.id(), value = other.type_name(), "items must be a list");
            return Assign::Rejected;
        }
    };

    let st = state(node);
    let unchanged = match (&*st.items.borrow(), &list) {
        (Some(current), Some(next)) => current.ptr_eq(next),
        (None, None) => true,
        _ => false,
    };
    if unchanged {
        return Assign::Stored;
    }
    unsubscribe(&st);
    if let Some(list) = &list {
        let weak = node.downgrade();
        let id = list.subscribe(move |list, change| {
            if let Some(node) = weak.upgrade() {
                apply_change(&node, list, change);
            }
        });
        st.subscription.set(Some(id));
    }
    *st.items.borrow_mut() = list;
    regenerate(node);
    Assign::Stored
}

fn unsubscribe(st: &TemplateState) {
    if let Some(id) = st.subscription.take()
        && let Some(list) = &*st.items.borrow()
    {
        list.unsubscribe(id);
    }
}

/// Drop the list subscription. Generated children go with the element's
/// other children.
pub(crate) fn release(node: &Object) {
    if let Some(st) = node.extension::<TemplateState>() {
        unsubscribe(&st);
        st.items.borrow_mut().take();
        st.generated.borrow_mut().clear();
    }
}

/// Children generated from the current items, in list order.
#[must_use]
pub fn generated_children(node: &Object) -> Vec<Object> {
    node.extension::<TemplateState>()
        .map(|st| st.generated.borrow().clone())
        .unwrap_or_default()
}

fn regenerate(node: &Object) {
    let st = state(node);
    let previous = std::mem::take(&mut *st.generated.borrow_mut());
    let start = block_start(node, &st, &previous);
    for child in previous {
        child.detach();
        child.dispose();
    }
    let template = st.template.borrow().clone();
    let Some(items) = st.items.borrow().clone() else {
        return;
    };
    if template.is_nullish() {
        return;
    }
    st.start.set(Some(start));
    for item in items.to_vec() {
        let position = start + st.generated.borrow().len();
        if let Some(child) = generate_at(node, &template, &item, position) {
            st.generated.borrow_mut().push(child);
        }
    }
    tracing::trace!(
        object = node.id(),
        children = st.generated.borrow().len(),
        "template regenerated"
    );
}

fn instantiate(template: &Value, item: &Value) -> Result<Object> {
    match template {
        Value::Function(f) => match f.call(std::slice::from_ref(item))? {
            Value::Object(child) if child.is_component() => Ok(child),
            other => Err(ViewError::InvalidDescription {
                reason: format!("template function returned {}", other.type_name()),
            }),
        },
        _ => match ViewSpec::from_value(template) {
            Some(spec) => spec.compile(),
            None => Err(ViewError::InvalidDescription {
                reason: format!("template must be a view or a function, got {}", template.type_name()),
            }),
        },
    }
}

/// Build the child for `item` and attach it at `position` among all children.
fn generate_at(node: &Object, template: &Value, item: &Value, position: usize) -> Option<Object> {
    let child = match instantiate(template, item) {
        Ok(child) => child,
        Err(err) => {
            tracing::warn!(object = node.id(), error = %err, "template instantiation failed");
            return None;
        }
    };
    child.set("model", item.clone());
    if let Err(err) = child.attach_to(node, Some(position)) {
        tracing::warn!(object = node.id(), error = %err, "generated child rejected");
        child.dispose();
        return None;
    }
    Some(child)
}

/// Index among all children where generated child `at` belongs.
fn child_position(node: &Object, at: usize) -> usize {
    let st = state(node);
    let generated = st.generated.borrow();
    let children = node.children();
    match (generated.get(at), generated.last()) {
        (Some(next), _) => children
            .iter()
            .position(|c| c.ptr_eq(next))
            .unwrap_or(children.len()),
        (None, Some(last)) => children
            .iter()
            .position(|c| c.ptr_eq(last))
            .map_or(children.len(), |p| p + 1),
        (None, None) => block_start(node, &st, &[]),
    }
}

/// Index among all children of the first generated child. An empty block
/// sits where it was last seen, or after the existing children.
fn block_start(node: &Object, st: &TemplateState, generated: &[Object]) -> usize {
    let children = node.children();
    generated
        .first()
        .and_then(|first| children.iter().position(|c| c.ptr_eq(first)))
        .or_else(|| st.start.get())
        .map_or(children.len(), |start| start.min(children.len()))
}

fn remember_start(node: &Object, st: &TemplateState) {
    let first = st.generated.borrow().first().cloned();
    if let Some(first) = first
        && let Some(position) = node.children().iter().position(|c| c.ptr_eq(&first))
    {
        st.start.set(Some(position));
    }
}

/// Position of the generated child for `item`, preferring `index` so equal
/// items resolve to the right child.
fn matching_child(generated: &[Object], index: usize, item: &Value) -> Option<usize> {
    generated
        .get(index)
        .filter(|c| c.model().same(item))
        .map(|_| index)
        .or_else(|| generated.iter().position(|c| c.model().same(item)))
}

fn apply_change(node: &Object, list: &List, change: &ListChange) {
    let st = state(node);
    let template = st.template.borrow().clone();
    if template.is_nullish() {
        return;
    }
    remember_start(node, &st);
    match change {
        ListChange::Add { index, items } => {
            for (offset, item) in items.iter().enumerate() {
                let at = index + offset;
                let position = child_position(node, at);
                if let Some(child) = generate_at(node, &template, item, position) {
                    let mut generated = st.generated.borrow_mut();
                    let at = at.min(generated.len());
                    generated.insert(at, child);
                }
            }
        }
        ListChange::Remove { index, items } => {
            for item in items {
                let position = matching_child(&st.generated.borrow(), *index, item);
                if let Some(position) = position {
                    let child = st.generated.borrow_mut().remove(position);
                    child.detach();
                    child.dispose();
                }
            }
        }
        ListChange::Replace { index, old, new } => {
            let child = {
                let generated = st.generated.borrow();
                matching_child(&generated, *index, old)
                    .or_else(|| (*index < generated.len()).then_some(*index))
                    .map(|position| generated[position].clone())
            };
            if let Some(child) = child {
                child.set("model", new.clone());
            }
        }
        ListChange::Sort => {
            let mut remaining = std::mem::take(&mut *st.generated.borrow_mut());
            let start = block_start(node, &st, &remaining);
            let mut ordered = Vec::with_capacity(remaining.len());
            for item in list.to_vec() {
                if let Some(position) = remaining.iter().position(|c| c.model().same(&item)) {
                    ordered.push(remaining.remove(position));
                }
            }
            ordered.append(&mut remaining);
            for (offset, child) in ordered.iter().enumerate() {
                let position = start + offset;
                let in_place = node.children().get(position).is_some_and(|c| c.ptr_eq(child));
                if !in_place && let Err(err) = child.attach_to(node, Some(position)) {
                    tracing::warn!(object = node.id(), error = %err, "reorder failed");
                }
            }
            *st.generated.borrow_mut() = ordered;
        }
        ListChange::Reset => regenerate(node),
    }
}
