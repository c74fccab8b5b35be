#![forbid(unsafe_code)]

//! Rendering backend abstraction for weft.
//!
//! The component layer never touches a concrete surface; it drives a
//! [`Backend`] through opaque [`NodeId`]s. [`MemoryBackend`] keeps the whole
//! tree in memory and is what tests and headless hosts use.
//!
//! # Invariants
//!
//! 1. A node has at most one parent; inserting an attached node moves it.
//! 2. Inserting a fragment moves the fragment's children, not the fragment.
//! 3. Operations on unknown nodes are ignored (reads return empty values).

pub mod memory;

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use weft_core::Value;

pub use memory::MemoryBackend;

static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static SUBSCRIPTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque surface handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Allocate a fresh, process-unique id.
    #[must_use]
    pub fn next() -> Self {
        Self(NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Handle returned by [`Backend::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[must_use]
    pub fn next() -> Self {
        Self(SUBSCRIPTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Layout box of a node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// What kind of surface a node is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element { tag: String },
    Text,
    Fragment,
}

/// Backend event callback; receives the event payload.
pub type EventHandler = Rc<dyn Fn(&Value)>;

/// Low-level surface operations.
pub trait Backend {
    fn create_element(&self, tag: &str) -> NodeId;

    fn create_text(&self, text: &str) -> NodeId;

    fn create_fragment(&self) -> NodeId;

    fn kind(&self, node: NodeId) -> Option<NodeKind>;

    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;

    fn set_attribute(&self, node: NodeId, name: &str, value: &str);

    fn remove_attribute(&self, node: NodeId, name: &str);

    fn style(&self, node: NodeId, name: &str) -> Option<String>;

    /// `None` removes the declaration.
    fn set_style(&self, node: NodeId, name: &str, value: Option<&str>);

    /// Text content; for elements, the concatenated text of descendants.
    fn text(&self, node: NodeId) -> String;

    /// Replace text content; for elements, replaces all children.
    fn set_text(&self, node: NodeId, text: &str);

    /// Insert `child` into `parent` before `before`, or append when `before`
    /// is `None` or not a child of `parent`.
    fn insert_before(&self, parent: NodeId, child: NodeId, before: Option<NodeId>);

    fn append_child(&self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    fn remove_child(&self, parent: NodeId, child: NodeId) -> bool;

    fn parent_of(&self, node: NodeId) -> Option<NodeId>;

    fn children_of(&self, node: NodeId) -> Vec<NodeId>;

    fn subscribe(&self, node: NodeId, event: &str, handler: EventHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Destroy `node` and its subscriptions. Text created by
    /// [`set_text`](Self::set_text) goes with it; other children are only
    /// detached. Later calls with the id are no-ops.
    fn release(&self, node: NodeId);

    fn bounds(&self, node: NodeId) -> Rect;
}
