#![forbid(unsafe_code)]

//! Components, rendering elements and the declarative view compiler.
//!
//! # Role in weft
//! `weft-widgets` turns reactive objects into a component tree that drives a
//! [`Backend`](weft_backend::Backend). Components are ordinary classes
//! derived from `AbstractComponent`; elements own backend surfaces; views
//! are JSON descriptions compiled into trees with bindings wired in.
//!
//! # Primary responsibilities
//! - **Tree**: parent/child/owner links, model inheritance and lifecycle
//!   events ([`ComponentExt`]).
//! - **Elements**: surfaces, attributes, styles and event forwarding
//!   ([`ElementExt`]).
//! - **Templates**: list-driven children that follow list deltas.
//! - **Views**: [`compile`] and [`define_component`].
//!
//! Everything resolves classes and the backend through the current [`Env`].

pub mod component;
pub mod config;
pub mod element;
pub mod env;
pub mod error;
pub mod template;
pub mod view;

use weft_core::Registry;

pub use component::{
    ABSTRACT_COMPONENT, ComponentExt, NAME_KEY, VIEW_KEY, define_component,
};
pub use config::ViewConfig;
pub use element::{ELEMENT, ElementExt, ElementKind, ROOT_KEY, TAG_KEY};
pub use env::{Env, EnvGuard};
pub use error::{Result, ViewError};
pub use template::generated_children;
pub use view::{BindingExpr, ViewSpec, compile, compile_in, find_binding};

/// Define `AbstractComponent` and `Element` in `registry` unless present.
pub fn install(registry: &Registry) -> weft_core::Result<()> {
    let component = match registry.get(ABSTRACT_COMPONENT) {
        Some(class) => class,
        None => registry.define(component::abstract_component_spec(&registry.observable()))?,
    };
    if !registry.contains(ELEMENT) {
        registry.define(element::element_spec(&component))?;
    }
    Ok(())
}
