//! Binding errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BindingError>;

#[derive(Debug, Clone, Error)]
pub enum BindingError {
    #[error("invalid binding `{spec}`: {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("unknown converter: {name}")]
    UnknownConverter { name: String },

    #[error("`{class}::{name}` is a method and cannot be a binding target")]
    NotBindable { class: String, name: String },

    #[error(transparent)]
    Core(#[from] weft_core::Error),
}

impl BindingError {
    pub(crate) fn invalid(spec: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}
