#![forbid(unsafe_code)]

//! weft public facade crate.
//!
//! Re-exports the object model, bindings and (with the default `widgets`
//! feature) the component layer under one name.

pub use weft_core::{
    Class, ClassSpec, Direction, Error, List, ListChange, Object, Property, Registry, Result,
    Value,
};
pub use weft_runtime::{Bindable, Binding, BindingError, BindingSpec, Converter};
#[cfg(feature = "widgets")]
pub use weft_widgets::{ComponentExt, ElementExt, Env, ViewError, compile, define_component};

pub mod prelude {
    pub use weft_core as core;
    pub use weft_runtime as runtime;

    #[cfg(feature = "widgets")]
    pub use weft_backend as backend;
    #[cfg(feature = "widgets")]
    pub use weft_widgets as widgets;

    pub use weft_core::{Assign, ClassSpec, Object, Property, Registry, Value};
    pub use weft_runtime::{Bindable, BindingSpec};
    #[cfg(feature = "widgets")]
    pub use weft_widgets::{ComponentExt, ElementExt, Env};
}
