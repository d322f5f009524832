//! Runtime Configuration
//!
//! Knobs that change how the runtime schedules and reports. Every field has a
//! default, so a partial JSON document is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default re-entry limit for a single computation within one flush.
pub const MAX_UPDATE_COUNT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many times one computation may re-queue itself during a single
    /// flush before it is reported and dropped for the rest of that flush.
    pub max_update_count: usize,

    /// Flush on the next tick (`true`) or synchronously inside the write
    /// that queued the first computation (`false`).
    pub async_flush: bool,

    /// Emit development warnings.
    pub development: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_update_count: MAX_UPDATE_COUNT,
            async_flush: true,
            development: cfg!(debug_assertions),
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_max_update_count(mut self, max_update_count: usize) -> Self {
        self.max_update_count = max_update_count;
        self
    }

    pub fn with_async_flush(mut self, async_flush: bool) -> Self {
        self.async_flush = async_flush;
        self
    }

    pub fn with_development(mut self, development: bool) -> Self {
        self.development = development;
        self
    }
}
