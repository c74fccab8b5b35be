//! View compilation errors.

use thiserror::Error;
use weft_runtime::BindingError;

pub type Result<T> = std::result::Result<T, ViewError>;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("unknown component type: {name}")]
    UnknownType { name: String },

    #[error("`{name}` is not a component class")]
    NotAComponent { name: String },

    #[error("cannot attach {child} under {parent}: {reason}")]
    InvalidTree {
        child: String,
        parent: String,
        reason: &'static str,
    },

    #[error("invalid view description: {reason}")]
    InvalidDescription { reason: String },

    #[error("invalid view config: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] weft_core::Error),

    #[error(transparent)]
    Binding(#[from] BindingError),
}

impl ViewError {
    /// Flatten into a core error so it can cross a method boundary.
    #[must_use]
    pub fn into_core(self) -> weft_core::Error {
        match self {
            Self::Core(err) => err,
            other => weft_core::Error::msg(other.to_string()),
        }
    }
}
