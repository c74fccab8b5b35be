//! Binding specifications.
//!
//! Textual form: `path[, direction=<-|->|<>][, converter=name][, format=text]`.
//! `format` consumes the rest of the string, commas included.

use std::str::FromStr;

use weft_core::Direction;

use super::converter::Converter;
use crate::error::{BindingError, Result};

/// Whether a binding drives a property or an event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Property,
    Event,
}

/// What to bind and how. Unset options fall back to the target property's
/// binding metadata, then to `<-` with no converter and no format.
#[derive(Debug, Clone, Default)]
pub struct BindingSpec {
    pub path: String,
    pub direction: Option<Direction>,
    pub converter: Option<Converter>,
    pub format: Option<String>,
    /// Forces event semantics when the target has no declared member.
    pub kind: Option<BindingKind>,
}

impl BindingSpec {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Parse the textual form.
    pub fn parse(text: &str) -> Result<Self> {
        let (path, mut rest) = match text.split_once(',') {
            Some((path, rest)) => (path.trim(), rest),
            None => (text.trim(), ""),
        };
        let mut spec = Self::new(path);

        loop {
            let trimmed = rest.trim_start();
            if trimmed.is_empty() {
                break;
            }
            if let Some(format) = trimmed.strip_prefix("format=") {
                spec.format = Some(format.to_string());
                break;
            }
            let (option, tail) = trimmed.split_once(',').unwrap_or((trimmed, ""));
            rest = tail;
            let Some((key, value)) = option.split_once('=') else {
                return Err(BindingError::invalid(text, format!("expected key=value, got `{}`", option.trim())));
            };
            let value = value.trim();
            match key.trim() {
                "direction" => {
                    let direction = Direction::parse(value).ok_or_else(|| {
                        BindingError::invalid(text, format!("unknown direction `{value}`"))
                    })?;
                    spec.direction = Some(direction);
                }
                "converter" => {
                    let converter =
                        Converter::named(value).ok_or_else(|| BindingError::UnknownConverter {
                            name: value.to_string(),
                        })?;
                    spec.converter = Some(converter);
                }
                other => {
                    return Err(BindingError::invalid(text, format!("unknown option `{other}`")));
                }
            }
        }

        Ok(spec)
    }

    #[must_use]
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    #[must_use]
    pub fn converter(mut self, converter: Converter) -> Self {
        self.converter = Some(converter);
        self
    }

    #[must_use]
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: BindingKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Path segments; empty for the whole source.
    #[must_use]
    pub fn segments(&self) -> Vec<String> {
        self.path
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl FromStr for BindingSpec {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<&str> for BindingSpec {
    /// A bare path with default options.
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for BindingSpec {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}
