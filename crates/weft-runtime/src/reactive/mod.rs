#![forbid(unsafe_code)]

//! Reactive path bindings.
//!
//! - [`BindingSpec`]: path, direction, converter and format of a binding,
//!   built directly or parsed from `"path, direction=<>, converter=name,
//!   format=text"`.
//! - [`Converter`]: value transform with an inverse for writes back to the
//!   source; named converters live in a thread-local table.
//! - [`Binding`]: a live hop chain from a source object to a target
//!   property or event.
//! - [`Bindable`]: `set_binding` / `get_binding` / `clear_binding` on
//!   [`Object`](weft_core::Object).
//!
//! # Architecture
//!
//! A binding is stored in its target's link slot for the bound name, so
//! replacing, clearing or disposing the target releases it. The binding
//! holds the target weakly and the hop objects strongly; watchers it
//! registers on hop objects hold the binding weakly.
//!
//! # Invariants
//!
//! 1. The hop chain never holds more entries than the path has segments.
//! 2. When hop *i* reports a change, only hops after *i* are torn down and
//!    re-resolved; hops up to *i* keep their watchers.
//! 3. A released binding registers nothing and reacts to nothing.
//! 4. A write the binding performs itself never re-enters the binding.

pub mod binding;
pub mod converter;
pub mod format;
pub mod spec;

pub use binding::{Bindable, Binding};
pub use converter::Converter;
pub use format::format_value;
pub use spec::{BindingKind, BindingSpec};
