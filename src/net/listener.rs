//! Listen address parsing and binding.
//!
//! # Responsibilities
//! - Parse `[host:]port` as given on the command line or in config
//! - Resolve and bind the proxy's single listening socket

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

/// Default host when only a port is given.
pub const DEFAULT_HOST: &str = "localhost";

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Invalid listen address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// A `[host:]port` listen address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddress {
    pub host: String,
    pub port: u16,
}

impl ListenAddress {
    pub fn parse(address: &str) -> Result<Self, ListenerError> {
        let invalid = |reason: &str| ListenerError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let address = address.trim();
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => (host.trim_start_matches('[').trim_end_matches(']'), port),
            None => (DEFAULT_HOST, address),
        };
        if host.is_empty() {
            return Err(invalid("host must not be empty"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("port must be a number between 0 and 65535"))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Resolve to the first matching socket address.
    pub async fn resolve(&self) -> Result<SocketAddr, ListenerError> {
        let target = self.to_string();
        let resolved = tokio::net::lookup_host(&target)
            .await
            .map_err(|source| ListenerError::Bind {
                address: target.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ListenerError::InvalidAddress {
                address: target.clone(),
                reason: "host did not resolve".to_string(),
            });
        resolved
    }

    pub async fn bind(&self) -> Result<TcpListener, ListenerError> {
        let addr = self.resolve().await?;
        let listener = TcpListener::bind(addr).await.map_err(|source| ListenerError::Bind {
            address: self.to_string(),
            source,
        })?;
        tracing::info!(address = %addr, "Listener bound");
        Ok(listener)
    }
}

impl std::fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl std::str::FromStr for ListenAddress {
    type Err = ListenerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            ListenAddress::parse("9999").unwrap(),
            ListenAddress { host: "localhost".into(), port: 9999 }
        );
        assert_eq!(
            ListenAddress::parse("0.0.0.0:8888").unwrap(),
            ListenAddress { host: "0.0.0.0".into(), port: 8888 }
        );
        assert_eq!(ListenAddress::parse("[::1]:8080").unwrap().to_string(), "[::1]:8080");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(ListenAddress::parse("host:port"), Err(ListenerError::InvalidAddress { .. })));
        assert!(matches!(ListenAddress::parse(":8080"), Err(ListenerError::InvalidAddress { .. })));
        assert!(ListenAddress::parse("70000").is_err());
    }

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let listener = ListenAddress::parse("127.0.0.1:0").unwrap().bind().await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
