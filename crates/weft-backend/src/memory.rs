#![forbid(unsafe_code)]

//! In-memory [`Backend`].
//!
//! Nodes live in a single table keyed by [`NodeId`]. [`MemoryBackend::render`]
//! prints a subtree as compact markup, which is what snapshot-style tests
//! compare against. [`MemoryBackend::dispatch`] plays the role of the host
//! delivering a native event to a node.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::rc::Rc;

use ahash::AHashMap;
use weft_core::Value;

use crate::{Backend, EventHandler, NodeId, NodeKind, Rect, SubscriptionId};

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: BTreeMap<String, String>,
    styles: BTreeMap<String, String>,
    text: String,
    bounds: Rect,
    /// Created by `set_text` rather than by a caller.
    synthetic: bool,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            styles: BTreeMap::new(),
            text: String::new(),
            bounds: Rect::default(),
            synthetic: false,
        }
    }
}

struct Subscription {
    node: NodeId,
    event: String,
    handler: EventHandler,
}

#[derive(Default)]
struct Tree {
    nodes: AHashMap<NodeId, Node>,
    subscriptions: Vec<(SubscriptionId, Subscription)>,
}

impl Tree {
    fn create(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId::next();
        self.nodes.insert(id, Node::new(kind));
        id
    }

    fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.nodes.get_mut(&child).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
    }

    /// Unlink `child` from the table's view of its former parent. Synthetic
    /// text is dropped, anything else becomes a root.
    fn orphan(&mut self, child: NodeId) {
        if self.nodes.get(&child).is_some_and(|n| n.synthetic) {
            self.nodes.remove(&child);
        } else if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = None;
        }
    }

    fn release(&mut self, node: NodeId) {
        self.detach(node);
        let Some(n) = self.nodes.remove(&node) else {
            return;
        };
        for child in n.children {
            self.orphan(child);
        }
        self.subscriptions.retain(|(_, s)| s.node != node);
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Some(n) = self.nodes.get(&node) else {
            return;
        };
        match n.kind {
            NodeKind::Text => out.push_str(&n.text),
            NodeKind::Element { .. } | NodeKind::Fragment => {
                for child in &n.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    fn render(&self, node: NodeId, out: &mut String) {
        let Some(n) = self.nodes.get(&node) else {
            return;
        };
        match &n.kind {
            NodeKind::Text => out.push_str(&escape(&n.text)),
            NodeKind::Fragment => {
                for child in &n.children {
                    self.render(*child, out);
                }
            }
            NodeKind::Element { tag } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in &n.attributes {
                    let _ = write!(out, " {name}=\"{}\"", escape(value));
                }
                if !n.styles.is_empty() {
                    let style: Vec<String> = n
                        .styles
                        .iter()
                        .map(|(k, v)| format!("{k}: {v}"))
                        .collect();
                    let _ = write!(out, " style=\"{}\"", escape(&style.join("; ")));
                }
                out.push('>');
                for child in &n.children {
                    self.render(*child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// A backend that keeps every node in memory.
///
/// Cloning shares the same tree.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    tree: Rc<RefCell<Tree>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every handler subscribed on `node`.
    /// Returns how many handlers ran.
    pub fn dispatch(&self, node: NodeId, event: &str, payload: impl Into<Value>) -> usize {
        let payload = payload.into();
        let handlers: Vec<EventHandler> = self
            .tree
            .borrow()
            .subscriptions
            .iter()
            .filter(|(_, s)| s.node == node && s.event == event)
            .map(|(_, s)| Rc::clone(&s.handler))
            .collect();
        tracing::trace!(node = node.id(), event, handlers = handlers.len(), "dispatch");
        for handler in &handlers {
            handler(&payload);
        }
        handlers.len()
    }

    /// Compact markup for `node` and its subtree.
    #[must_use]
    pub fn render(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.tree.borrow().render(node, &mut out);
        out
    }

    /// Markup for the children of `node`, without the node itself.
    #[must_use]
    pub fn render_children(&self, node: NodeId) -> String {
        let tree = self.tree.borrow();
        let mut out = String::new();
        if let Some(n) = tree.nodes.get(&node) {
            for child in &n.children {
                tree.render(*child, &mut out);
            }
        }
        out
    }

    pub fn set_bounds(&self, node: NodeId, bounds: Rect) {
        if let Some(n) = self.tree.borrow_mut().nodes.get_mut(&node) {
            n.bounds = bounds;
        }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tree.borrow().nodes.len()
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.tree.borrow().subscriptions.len()
    }

    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.tree.borrow().nodes.contains_key(&node)
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("nodes", &self.node_count())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Backend for MemoryBackend {
    fn create_element(&self, tag: &str) -> NodeId {
        self.tree.borrow_mut().create(NodeKind::Element {
            tag: tag.to_string(),
        })
    }

    fn create_text(&self, text: &str) -> NodeId {
        let mut tree = self.tree.borrow_mut();
        let id = tree.create(NodeKind::Text);
        if let Some(n) = tree.nodes.get_mut(&id) {
            n.text = text.to_string();
        }
        id
    }

    fn create_fragment(&self) -> NodeId {
        self.tree.borrow_mut().create(NodeKind::Fragment)
    }

    fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.tree.borrow().nodes.get(&node).map(|n| n.kind.clone())
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.tree
            .borrow()
            .nodes
            .get(&node)
            .and_then(|n| n.attributes.get(name).cloned())
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        if let Some(n) = self.tree.borrow_mut().nodes.get_mut(&node) {
            n.attributes.insert(name.to_string(), value.to_string());
        }
    }

    fn remove_attribute(&self, node: NodeId, name: &str) {
        if let Some(n) = self.tree.borrow_mut().nodes.get_mut(&node) {
            n.attributes.remove(name);
        }
    }

    fn style(&self, node: NodeId, name: &str) -> Option<String> {
        self.tree
            .borrow()
            .nodes
            .get(&node)
            .and_then(|n| n.styles.get(name).cloned())
    }

    fn set_style(&self, node: NodeId, name: &str, value: Option<&str>) {
        if let Some(n) = self.tree.borrow_mut().nodes.get_mut(&node) {
            match value {
                Some(value) if !value.is_empty() => {
                    n.styles.insert(name.to_string(), value.to_string());
                }
                _ => {
                    n.styles.remove(name);
                }
            }
        }
    }

    fn text(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.tree.borrow().collect_text(node, &mut out);
        out
    }

    fn set_text(&self, node: NodeId, text: &str) {
        let mut tree = self.tree.borrow_mut();
        let Some(kind) = tree.nodes.get(&node).map(|n| n.kind.clone()) else {
            return;
        };
        match kind {
            NodeKind::Text => {
                if let Some(n) = tree.nodes.get_mut(&node) {
                    n.text = text.to_string();
                }
            }
            NodeKind::Element { .. } | NodeKind::Fragment => {
                let children = tree
                    .nodes
                    .get_mut(&node)
                    .map(|n| std::mem::take(&mut n.children))
                    .unwrap_or_default();
                for child in children {
                    tree.orphan(child);
                }
                if !text.is_empty() {
                    let leaf = tree.create(NodeKind::Text);
                    if let Some(n) = tree.nodes.get_mut(&leaf) {
                        n.text = text.to_string();
                        n.parent = Some(node);
                        n.synthetic = true;
                    }
                    if let Some(n) = tree.nodes.get_mut(&node) {
                        n.children.push(leaf);
                    }
                }
            }
        }
    }

    fn insert_before(&self, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        let mut tree = self.tree.borrow_mut();
        if !tree.nodes.contains_key(&parent) || !tree.nodes.contains_key(&child) || parent == child {
            tracing::warn!(parent = parent.id(), child = child.id(), "insert_before on unknown node");
            return;
        }
        let is_fragment = matches!(
            tree.nodes.get(&child).map(|n| &n.kind),
            Some(NodeKind::Fragment)
        );
        let moved: Vec<NodeId> = if is_fragment {
            tree.nodes
                .get_mut(&child)
                .map(|n| std::mem::take(&mut n.children))
                .unwrap_or_default()
        } else {
            vec![child]
        };
        for node in &moved {
            tree.detach(*node);
        }
        let Some(p) = tree.nodes.get_mut(&parent) else {
            return;
        };
        let mut at = before
            .and_then(|b| p.children.iter().position(|c| *c == b))
            .unwrap_or(p.children.len());
        for node in &moved {
            p.children.insert(at, *node);
            at += 1;
        }
        for node in moved {
            if let Some(n) = tree.nodes.get_mut(&node) {
                n.parent = Some(parent);
            }
        }
    }

    fn remove_child(&self, parent: NodeId, child: NodeId) -> bool {
        let mut tree = self.tree.borrow_mut();
        if tree.nodes.get(&child).and_then(|n| n.parent) != Some(parent) {
            return false;
        }
        tree.detach(child);
        true
    }

    fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.tree.borrow().nodes.get(&node).and_then(|n| n.parent)
    }

    fn children_of(&self, node: NodeId) -> Vec<NodeId> {
        self.tree
            .borrow()
            .nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn subscribe(&self, node: NodeId, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.tree.borrow_mut().subscriptions.push((
            id,
            Subscription {
                node,
                event: event.to_string(),
                handler,
            },
        ));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut tree = self.tree.borrow_mut();
        let before = tree.subscriptions.len();
        tree.subscriptions.retain(|(sid, _)| *sid != id);
        tree.subscriptions.len() != before
    }

    fn release(&self, node: NodeId) {
        self.tree.borrow_mut().release(node);
    }

    fn bounds(&self, node: NodeId) -> Rect {
        self.tree
            .borrow()
            .nodes
            .get(&node)
            .map(|n| n.bounds)
            .unwrap_or_default()
    }
}
