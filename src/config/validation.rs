//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function over the parsed config
//! - The same route checks run for the file, the control endpoint and the
//!   push channel, so every route set the proxy accepts passes them

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::routing::{Protocol, RouteRule};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("route {index}: path '{path}' must start with '/' for {protocol} rules")]
    PathNotAbsolute {
        index: usize,
        path: String,
        protocol: Protocol,
    },

    #[error("route {index}: path '{path}' must be a non-zero listen port for {protocol} rules")]
    InvalidListenPort {
        index: usize,
        path: String,
        protocol: Protocol,
    },

    #[error("route {index}: hostname must not be empty")]
    MissingHostname { index: usize },

    #[error("route {index}: port must not be 0")]
    MissingPort { index: usize },

    #[error("listen port {port} is used by more than one route")]
    DuplicateListenPort { port: u16 },

    #[error("{field} must be greater than 0")]
    ZeroLimit { field: &'static str },
}

/// Validate a full route set.
pub fn validate_routes(rules: &[RouteRule]) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut ports = HashSet::new();

    for (index, rule) in rules.iter().enumerate() {
        match rule.protocol {
            Protocol::BrowserForward => {
                if !rule.path.is_empty() && !rule.path.starts_with('/') {
                    errors.push(ValidationError::PathNotAbsolute {
                        index,
                        path: rule.path.clone(),
                        protocol: rule.protocol,
                    });
                }
                continue;
            }
            Protocol::Http | Protocol::Https => {
                if !rule.path.starts_with('/') {
                    errors.push(ValidationError::PathNotAbsolute {
                        index,
                        path: rule.path.clone(),
                        protocol: rule.protocol,
                    });
                }
            }
            // Log sources are named, not bound.
            Protocol::Log => continue,
            _ => match rule.listen_port() {
                Some(port) => {
                    if !ports.insert(port) {
                        errors.push(ValidationError::DuplicateListenPort { port });
                    }
                }
                None => errors.push(ValidationError::InvalidListenPort {
                    index,
                    path: rule.path.clone(),
                    protocol: rule.protocol,
                }),
            },
        }

        if rule.hostname.trim().is_empty() {
            errors.push(ValidationError::MissingHostname { index });
        }
        if rule.port == 0 {
            errors.push(ValidationError::MissingPort { index });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a whole configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = validate_routes(&config.routes).err().unwrap_or_default();

    let limits = [
        ("bus.max_pending", config.bus.max_pending),
        ("bus.max_batch", config.bus.max_batch),
        ("bus.ack_timeout_secs", config.bus.ack_timeout_secs as usize),
        ("viewer.queue_limit", config.viewer.queue_limit),
        ("capture.max_body_bytes", config.capture.max_body_bytes),
        ("timeouts.connect_secs", config.timeouts.connect_secs as usize),
    ];
    for (field, value) in limits {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit { field });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relayed(path: &str) -> RouteRule {
        let mut rule = RouteRule::http(path, "cache", 6379);
        rule.protocol = Protocol::Redis;
        rule
    }

    #[test]
    fn test_valid_rules() {
        let rules = vec![
            RouteRule::http("/api", "localhost", 9000),
            RouteRule::forward(false, "", 0),
            relayed("6380"),
        ];
        assert!(validate_routes(&rules).is_ok());
    }

    #[test]
    fn test_all_errors_reported() {
        let rules = vec![
            RouteRule::http("api", "", 0),
            relayed("/redis"),
            relayed("6380"),
            relayed("6380"),
        ];
        let errors = validate_routes(&rules).unwrap_err();
        assert!(errors.contains(&ValidationError::PathNotAbsolute {
            index: 0,
            path: "api".into(),
            protocol: Protocol::Http
        }));
        assert!(errors.contains(&ValidationError::MissingHostname { index: 0 }));
        assert!(errors.contains(&ValidationError::MissingPort { index: 0 }));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidListenPort { index: 1, .. })));
        assert!(errors.contains(&ValidationError::DuplicateListenPort { port: 6380 }));
    }

    #[test]
    fn test_zero_limits() {
        let mut config = ProxyConfig::default();
        config.bus.max_batch = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::ZeroLimit { field: "bus.max_batch" }]);
    }
}
