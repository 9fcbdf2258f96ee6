//! Capture pipeline error taxonomy.
//!
//! Errors that reach a viewer are carried in the same Message shape as
//! successful traffic; `status()` gives the status of that synthetic Message.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while dispatching and capturing one exchange.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptureError {
    /// No route matched and the request was not absolute-form.
    #[error("No matching proxy configuration found for {path}")]
    RouteNotFound { path: String },

    /// TCP/TLS connect (or request send) to the matched target failed.
    #[error("Error connecting to {target}: {reason}")]
    UpstreamConnect { target: String, reason: String },

    /// The upstream response body could not be read.
    #[error("Error reading response from {target}: {reason}")]
    UpstreamBody { target: String, reason: String },

    /// The originating client went away before completion.
    #[error("Client closed the connection for sequence number {sequence_number}")]
    ClientAbort { sequence_number: u64 },

    /// The response half did not arrive within the idle timeout.
    #[error("No response for sequence number {sequence_number} after {after:?}")]
    CorrelationTimeout { sequence_number: u64, after: Duration },

    /// Nobody approved a held Message within the breakpoint timeout.
    #[error("Breakpoint for sequence number {sequence_number} not released after {after:?}")]
    BreakpointTimeout { sequence_number: u64, after: Duration },
}

impl CaptureError {
    /// Status code of the synthetic Message (and client response).
    pub fn status(&self) -> u16 {
        match self {
            CaptureError::RouteNotFound { .. } | CaptureError::UpstreamConnect { .. } => 404,
            CaptureError::UpstreamBody { .. } => 502,
            CaptureError::CorrelationTimeout { .. } | CaptureError::BreakpointTimeout { .. } => 504,
            CaptureError::ClientAbort { .. } => 499,
        }
    }

    /// Whether this error should become a visible Message.
    pub fn is_visible(&self) -> bool {
        !matches!(self, CaptureError::ClientAbort { .. })
    }
}

/// Errors raised while assembling the server.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to build upstream client: {0}")]
    UpstreamClient(#[from] reqwest::Error),

    #[error("Failed to load TLS certificate: {0}")]
    Tls(#[source] std::io::Error),

    #[error("HTTPS requested but no [listener.tls] certificate is configured")]
    MissingTls,

    #[error("Failed to prepare data directory {path:?}: {source}")]
    DataDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_not_found_message() {
        let err = CaptureError::RouteNotFound { path: "/unknown".into() };
        assert_eq!(err.to_string(), "No matching proxy configuration found for /unknown");
        assert_eq!(err.status(), 404);
        assert!(err.is_visible());
    }

    #[test]
    fn test_client_abort_is_hidden() {
        let err = CaptureError::ClientAbort { sequence_number: 3 };
        assert!(!err.is_visible());
    }
}
