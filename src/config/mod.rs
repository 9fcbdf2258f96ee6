//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors at once)
//!     → ProxyConfig (validated)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server applies routes (atomic swap) and upstream credentials
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Invalid reloads are logged and ignored

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BreakpointConfig, BusConfig, CaptureConfig, ListenerConfig, ObservabilityConfig, ProxyConfig,
    TimeoutConfig, TlsConfig, UpstreamConfig, UpstreamCredential, ViewerConfig,
};
pub use validation::{validate_config, validate_routes, ValidationError};
pub use watcher::ConfigWatcher;
