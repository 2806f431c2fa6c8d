//! Editor configuration.
//!
//! Everything is serde-friendly with `#[serde(default)]`, so a host can
//! ship a partial JSON document and inherit the rest.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

pub use crate::sanitize::SanitizeConfig;

/// How paste content is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasteStrategy {
    /// Read the clipboard payload off the paste event only.
    Sync,
    /// Always redirect the paste into the capture surface and poll it.
    Capture,
    /// Synchronous when the event carries a payload, capture otherwise.
    #[default]
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasteConfig {
    pub strategy: PasteStrategy,
    /// Prefer `text/html` over `text/plain` when both are on the clipboard.
    pub prefer_html: bool,
    /// Delay between capture surface polls.
    pub retry_interval_ms: u64,
    /// Delayed polls after the first, immediate one.
    pub max_retries: u32,
}

impl Default for PasteConfig {
    fn default() -> Self {
        Self {
            strategy: PasteStrategy::default(),
            prefer_html: true,
            retry_interval_ms: 50,
            max_retries: 3,
        }
    }
}

impl PasteConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub paste: PasteConfig,
    pub sanitize: SanitizeConfig,
    /// Remove `style` attributes from markup returned by `content()`.
    pub strip_styles_on_read: bool,
    /// Root attribute carrying the emptiness flag.
    pub empty_attribute: SmolStr,
    /// Root attribute carrying the placeholder text.
    pub placeholder_attribute: SmolStr,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            paste: PasteConfig::default(),
            sanitize: SanitizeConfig::default(),
            strip_styles_on_read: true,
            empty_attribute: SmolStr::new_static("empty"),
            placeholder_attribute: SmolStr::new_static("placeholder"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_inherits_defaults() {
        let config: EditorConfig = serde_json::from_str(
            r#"{ "paste": { "strategy": "capture", "max_retries": 5 }, "strip_styles_on_read": false }"#,
        )
        .unwrap();
        assert_eq!(config.paste.strategy, PasteStrategy::Capture);
        assert_eq!(config.paste.max_retries, 5);
        assert_eq!(config.paste.retry_interval(), Duration::from_millis(50));
        assert!(config.paste.prefer_html);
        assert!(!config.strip_styles_on_read);
        assert_eq!(config.empty_attribute, "empty");
        assert_eq!(config.sanitize, SanitizeConfig::default());
    }

    #[test]
    fn test_empty_json_is_default() {
        let config: EditorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EditorConfig::default());
    }
}
