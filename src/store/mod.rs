//! Persisted state.
//!
//! # Data Flow
//! ```text
//! Startup:   StateStore::load("proxyDirectives") → RouteTable
//!            StateStore::load("breakpoints")     → BreakpointStore
//! On change: full set → StateStore::save(key, value)
//! ```
//!
//! # Design Decisions
//! - Full-set load and replace only; no partial updates
//! - Values are plain JSON so the file store stays human-editable

pub mod file;
pub mod memory;

use serde_json::Value;
use thiserror::Error;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Key of the persisted route rule set.
pub const PROXY_DIRECTIVES: &str = "proxyDirectives";

/// Key of the persisted breakpoint list.
pub const BREAKPOINTS: &str = "breakpoints";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State store I/O error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("State store JSON error for '{key}': {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Keyed full-set persistence.
pub trait StateStore: Send + Sync {
    /// The stored value, or `None` if nothing was saved under `key`.
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the value stored under `key`.
    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError>;
}
