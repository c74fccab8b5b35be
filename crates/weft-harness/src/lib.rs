#![forbid(unsafe_code)]

//! Test harness for weft.
//!
//! - [`Harness`] owns a [`MemoryBackend`] and an entered [`Env`] so view code
//!   compiled inside a test renders into inspectable markup.
//! - [`Recorder`] captures watcher notifications and events in order.
//! - [`strategies`] holds proptest generators shared by the invariant suites.
//!
//! ```ignore
//! let h = Harness::new()?;
//! let view = h.compile(&json!({ "tag": "p", "content": "hi" }))?;
//! assert_markup!(h, view, "<p>hi</p>");
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use weft_backend::{MemoryBackend, NodeId};
use weft_core::{ListenerId, Names, Object, Registry, Value, WatchId};
use weft_widgets::{ComponentExt, Env, EnvGuard, ViewConfig};

/// Assert that a node renders to the expected markup.
#[macro_export]
macro_rules! assert_markup {
    ($harness:expr, $node:expr, $expected:expr $(,)?) => {{
        let actual = $harness.markup(&$node);
        assert_eq!(actual, $expected, "markup mismatch for {:?}", $node);
    }};
}

// ============================================================================
// Harness
// ============================================================================

/// A private registry and memory backend, entered for the harness lifetime.
pub struct Harness {
    backend: MemoryBackend,
    env: Env,
    _guard: EnvGuard,
}

impl Harness {
    pub fn new() -> weft_widgets::Result<Self> {
        Self::with_config(ViewConfig::default())
    }

    pub fn with_config(config: ViewConfig) -> weft_widgets::Result<Self> {
        let backend = MemoryBackend::new();
        let env = Env::new(Registry::new(), Rc::new(backend.clone()), config)?;
        let guard = env.enter();
        tracing::debug!("harness entered");
        Ok(Self {
            backend,
            env,
            _guard: guard,
        })
    }

    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        self.env.registry()
    }

    #[must_use]
    pub fn backend(&self) -> &MemoryBackend {
        &self.backend
    }

    pub fn compile(&self, desc: &serde_json::Value) -> weft_widgets::Result<Object> {
        weft_widgets::compile(desc, None)
    }

    pub fn element(&self, tag: &str) -> weft_core::Result<Object> {
        self.registry()
            .instantiate(weft_widgets::ELEMENT, &[Value::from(tag)])
    }

    /// Markup of every top-level surface of `node`, concatenated.
    #[must_use]
    pub fn markup(&self, node: &Object) -> String {
        surfaces(node)
            .into_iter()
            .map(|surface| self.backend.render(surface))
            .collect()
    }

    /// Deliver a backend event to the first surface of `node`.
    pub fn dispatch(&self, node: &Object, event: &str, payload: impl Into<Value>) -> usize {
        match surfaces(node).first() {
            Some(surface) => self.backend.dispatch(*surface, event, payload),
            None => 0,
        }
    }
}

/// Top-level backend surfaces of `node`.
#[must_use]
pub fn surfaces(node: &Object) -> Vec<NodeId> {
    match node.surface() {
        Some(surface) => vec![surface],
        None => node.children().iter().flat_map(surfaces).collect(),
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// One captured notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Change {
        property: String,
        value: Value,
        old: Value,
    },
    Event {
        event: String,
        data: Value,
    },
}

/// Ordered log of watcher and event deliveries.
#[derive(Clone, Default)]
pub struct Recorder {
    log: Rc<RefCell<Vec<Record>>>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&self, obj: &Object, names: impl Into<Names>) -> weft_core::Result<WatchId> {
        let log = Rc::clone(&self.log);
        obj.watch(names, move |change| {
            log.borrow_mut().push(Record::Change {
                property: change.property.clone(),
                value: change.value.clone(),
                old: change.old.clone(),
            });
        })
    }

    pub fn listen(&self, obj: &Object, event: &str) -> ListenerId {
        let log = Rc::clone(&self.log);
        let name = event.to_string();
        obj.on(event, move |_, data| {
            log.borrow_mut().push(Record::Event {
                event: name.clone(),
                data: data.clone(),
            });
        })
    }

    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.log.borrow().clone()
    }

    /// New values delivered for `property`, in order.
    #[must_use]
    pub fn values(&self, property: &str) -> Vec<Value> {
        self.log
            .borrow()
            .iter()
            .filter_map(|record| match record {
                Record::Change { property: p, value, .. } if p == property => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Event names delivered, in order.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter_map(|record| match record {
                Record::Event { event, .. } => Some(event.clone()),
                Record::Change { .. } => None,
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.log.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

// ============================================================================
// Strategies
// ============================================================================

pub mod strategies {
    //! proptest generators.

    use proptest::prelude::*;
    use weft_core::{List, Value};

    /// Scalar values with identity semantics.
    pub fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-z]{0,8}".prop_map(|s| Value::from(s.as_str())),
        ]
    }

    /// A mutation applied to a list.
    #[derive(Debug, Clone)]
    pub enum ListOp {
        Push(i64),
        Insert(usize, i64),
        RemoveAt(usize),
        Replace(usize, i64),
        Sort,
        Reset(Vec<i64>),
    }

    impl ListOp {
        /// Apply to `list`, wrapping indices into range.
        pub fn apply(&self, list: &List) {
            let len = list.len();
            match self {
                Self::Push(v) => list.push(*v),
                Self::Insert(i, v) => list.insert(i % (len + 1), *v),
                Self::RemoveAt(i) if len > 0 => {
                    list.remove_at(i % len);
                }
                Self::Replace(i, v) if len > 0 => {
                    list.replace(i % len, *v);
                }
                Self::RemoveAt(_) | Self::Replace(..) => {}
                Self::Sort => list.sort_by(|a, b| a.as_i64().cmp(&b.as_i64())),
                Self::Reset(values) => list.reset(values.iter().map(|v| Value::Int(*v)).collect()),
            }
        }
    }

    /// Sequences of list mutations; indices are taken modulo the length.
    pub fn list_ops(max: usize) -> impl Strategy<Value = Vec<ListOp>> {
        let op = prop_oneof![
            4 => any::<i64>().prop_map(ListOp::Push),
            3 => (any::<usize>(), any::<i64>()).prop_map(|(i, v)| ListOp::Insert(i, v)),
            3 => any::<usize>().prop_map(ListOp::RemoveAt),
            2 => (any::<usize>(), any::<i64>()).prop_map(|(i, v)| ListOp::Replace(i, v)),
            1 => Just(ListOp::Sort),
            1 => proptest::collection::vec(any::<i64>(), 0..4).prop_map(ListOp::Reset),
        ];
        proptest::collection::vec(op, 0..max)
    }
}
