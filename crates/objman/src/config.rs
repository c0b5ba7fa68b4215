//! Finder configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Page size used by `offset_page_result` when no limit is set.
pub const DEFAULT_PAGE_SIZE: u64 = 30;

/// Upper bound for the pages fetched by `find_all_detached`.
pub const DEFAULT_STREAM_PAGE_SIZE: u64 = 100;

/// Settings shared by every finder an object manager creates.
///
/// Missing keys fall back to their defaults, so a partial JSON document is
/// enough:
///
/// ```
/// use objman::FinderConfig;
///
/// let config = FinderConfig::from_json(r#"{ "stream_page_size": 500 }"#).unwrap();
/// assert_eq!(config.stream_page_size, 500);
/// assert_eq!(config.default_page_size, 30);
/// assert!(config.legacy_alias_prefix.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinderConfig {
    /// Page size for `offset_page_result` when no limit was set.
    pub default_page_size: u64,

    /// Largest page `find_all_detached` fetches at once.
    pub stream_page_size: u64,

    /// Deprecated. A textual prefix in `where` conditions that is rewritten
    /// to the finder's alias, e.g. `"t."`.
    pub legacy_alias_prefix: Option<String>,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            stream_page_size: DEFAULT_STREAM_PAGE_SIZE,
            legacy_alias_prefix: None,
        }
    }
}

impl FinderConfig {
    /// Loads the configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or when a page size is zero.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that both page sizes are positive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 {
            return Err(Error::InvalidArgument(String::from(
                "default_page_size must be greater than zero",
            )));
        }
        if self.stream_page_size == 0 {
            return Err(Error::InvalidArgument(String::from(
                "stream_page_size must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Enables the deprecated alias prefix rewrite.
    #[must_use]
    pub fn with_legacy_alias_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.legacy_alias_prefix = Some(prefix.into());
        self
    }
}
