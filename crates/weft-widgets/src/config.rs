//! View compiler configuration.
//!
//! Loaded from JSON ([`ViewConfig::from_json`]) or from `WEFT_*` environment
//! variables ([`ViewConfig::from_env`]); missing keys keep their defaults.

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Tag used for object descriptions without `tag` or `type`.
    pub default_tag: String,
    /// Tag that makes an element a text leaf.
    pub text_tag: String,
    /// Tag that makes an element a fragment with no surface.
    pub fragment_tag: String,
    /// Resolve brace-less event values as methods on the owner.
    pub resolve_event_methods: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            default_tag: "div".to_string(),
            text_tag: "#text".to_string(),
            fragment_tag: "#fragment".to_string(),
            resolve_event_methods: true,
        }
    }
}

impl ViewConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Defaults overridden by `WEFT_DEFAULT_TAG`, `WEFT_TEXT_TAG`,
    /// `WEFT_FRAGMENT_TAG` and `WEFT_RESOLVE_EVENT_METHODS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(tag) = non_empty("WEFT_DEFAULT_TAG") {
            self.default_tag = tag.trim().to_string();
        }
        if let Some(tag) = non_empty("WEFT_TEXT_TAG") {
            self.text_tag = tag.trim().to_string();
        }
        if let Some(tag) = non_empty("WEFT_FRAGMENT_TAG") {
            self.fragment_tag = tag.trim().to_string();
        }
        if let Some(flag) = non_empty("WEFT_RESOLVE_EVENT_METHODS") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.resolve_event_methods = true,
                "0" | "false" | "no" | "off" => self.resolve_event_methods = false,
                other => tracing::warn!(value = other, "ignoring WEFT_RESOLVE_EVENT_METHODS"),
            }
        }
        self
    }
}
