//! Error type for class definition and reflective dispatch.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("class `{class}` is static and cannot be instantiated")]
    StaticInstantiation { class: String },

    #[error("class `{class}` cannot inherit from static class `{parent}`")]
    StaticParent { class: String, parent: String },

    #[error("unknown class: {name}")]
    UnknownClass { name: String },

    #[error("method `{class}::{method}` is abstract")]
    Abstract { class: String, method: String },

    #[error("`{class}` has no method `{method}`")]
    UnknownMethod { class: String, method: String },

    #[error("instances of `{class}` are not observable")]
    NotObservable { class: String },

    #[error("{message}")]
    Custom { message: String },
}

impl Error {
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }

    /// Whether this error signals misuse of the class model itself, as opposed
    /// to a failure raised by user method code.
    #[must_use]
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::StaticInstantiation { .. } | Self::StaticParent { .. } | Self::UnknownClass { .. }
        )
    }
}
