//! Configuration for QuickJS contexts.
//!
//! Limits are applied to the engine runtime when the context is created;
//! `None` leaves the engine default in place.

use serde::{Deserialize, Serialize};

use crate::error::QjsResult;

/// Runtime limits and evaluation defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QjsConfig {
    /// Heap limit in bytes for the engine runtime.
    /// Default: None (unlimited)
    pub memory_limit: Option<usize>,

    /// Maximum native stack the interpreter may use, in bytes.
    /// Default: None (engine default)
    pub max_stack_size: Option<usize>,

    /// Allocation threshold that triggers an engine GC cycle, in bytes.
    /// Default: None (engine default)
    pub gc_threshold: Option<usize>,

    /// Abort `eval` calls that run longer than this.
    /// Default: None (no timeout)
    pub timeout_ms: Option<u64>,

    /// File name reported in stack traces for `eval`.
    /// Default: "<eval>"
    pub default_filename: String,
}

impl Default for QjsConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            max_stack_size: None,
            gc_threshold: None,
            timeout_ms: None,
            default_filename: "<eval>".to_string(),
        }
    }
}

impl QjsConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heap limit in bytes.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set the interpreter stack limit in bytes.
    pub fn max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    /// Set the GC allocation threshold in bytes.
    pub fn gc_threshold(mut self, bytes: usize) -> Self {
        self.gc_threshold = Some(bytes);
        self
    }

    /// Set the evaluation timeout.
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set the file name used for `eval`.
    pub fn default_filename(mut self, name: impl Into<String>) -> Self {
        self.default_filename = name.into();
        self
    }

    /// Load a config from JSON. Missing fields keep their defaults.
    ///
    /// # Example
    ///
    /// ```
    /// use otter_qjs_core::QjsConfig;
    ///
    /// let config = QjsConfig::from_json(r#"{ "timeout_ms": 500 }"#).unwrap();
    /// assert_eq!(config.timeout_ms, Some(500));
    /// assert_eq!(config.default_filename, "<eval>");
    /// ```
    pub fn from_json(json: &str) -> QjsResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
