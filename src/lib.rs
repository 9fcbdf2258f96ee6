//! Interactive capture proxy library.
//!
//! Captures request/response pairs, correlates them into Messages and
//! streams them to attached viewers, which filter them and may hold
//! responses at breakpoints.

// Core pipeline
pub mod capture;
pub mod http;
pub mod message;
pub mod routing;

// Viewer side
pub mod breakpoint;
pub mod bus;
pub mod filter;
pub mod viewer;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod store;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use message::{Body, Message};
