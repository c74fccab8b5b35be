#![forbid(unsafe_code)]

//! Core object model for weft.
//!
//! - [`Value`]: the dynamic value carried by properties, fields and arguments.
//! - [`Registry`] / [`ClassSpec`] / [`Class`]: class definition with single
//!   inheritance, flattened mixins, statics and explicit super dispatch.
//! - [`Object`]: instances with reflective `get`/`set`/`has`/`can`/`call`,
//!   events, typed extensions and releasable link slots.
//! - Watchers on observable instances ([`Object::watch`], [`Change`]).
//! - [`List`]: an ordered collection emitting [`ListChange`] deltas.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`); handles are `!Send`.

pub mod class;
pub mod error;
pub mod list;
pub mod object;
pub mod observable;
pub mod registry;
pub mod value;

pub use class::{
    Assign, BindingDefaults, Class, ClassDescriptor, ClassSpec, Direction, EventSlot, Fallback,
    Invocation, Member, MemberKind, MethodSlot, OBJECT_CLASS, OBSERVABLE_CLASS, Property,
    PropertyMeta, PropertySlot,
};
pub use error::{Error, Result};
pub use list::{ChangeId, List, ListChange};
pub use object::{EventHandler, Link, ListenerId, Object, WeakObject};
pub use observable::{Change, Names, WatchHandler, WatchId};
pub use registry::Registry;
pub use value::{Function, Native, Value};
