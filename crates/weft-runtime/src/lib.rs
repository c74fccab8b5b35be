#![forbid(unsafe_code)]

//! Data bindings for weft objects.
//!
//! A binding connects a property (or event) of a target object to a dotted
//! path rooted at a source object and keeps the two synchronized as the
//! path's intermediate objects are replaced. See [`reactive`].

pub mod error;
pub mod reactive;

pub use error::{BindingError, Result};
pub use reactive::{
    Bindable, Binding, BindingKind, BindingSpec, Converter, format_value,
};
