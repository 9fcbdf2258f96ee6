//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, route match)
//!     → forward.rs (rewrite Host/method/credentials, send upstream)
//!     → capture correlator (request-only Message, then completion)
//!     → breakpoint gate (optional hold)
//!     → response.rs (upstream, edited or synthetic response)
//!     → Send to client
//!
//! /_viewer/ws → websocket.rs (push channel)
//! ```

pub mod forward;
pub mod response;
pub mod server;
pub mod websocket;

pub use forward::{OutboundRequest, ProxyDispatcher};
pub use server::{AppState, HttpServer};
