//! Routing of inbound connections to upstream ingest destinations.
//!
//! A connection names its destination stream through the `key` query parameter. The router
//! extracts that token and appends it to the configured upstream base URL. The derivation is a
//! pure read of configuration fixed at startup, so a single router is shared by every session
//! without locking.

use log::debug;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use super::session_request::SessionRequest;
use crate::configuration::types::UpstreamConfig;
use crate::error_handling::types::{ConfigError, RoutingError};

/// Query parameter carrying the routing token.
pub const ROUTING_PARAM: &str = "key";

/// Address of the upstream ingest endpoint handed to the transcoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationAddress(String);

impl DestinationAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of routing one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub token: String,
    pub destination: DestinationAddress,
}

#[derive(Debug, Clone)]
pub struct SessionRouter {
    base_url: String,
    max_token_length: Option<usize>,
    token_pattern: Option<Regex>,
}

impl SessionRouter {
    /// Router with the baseline policy: any non-empty token is accepted.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            max_token_length: None,
            token_pattern: None,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, ConfigError> {
        let mut router = Self::new(config.base_url.clone());
        router.max_token_length = config.max_token_length;
        if let Some(pattern) = &config.token_pattern {
            // Anchored so the whole token has to match, not a substring of it.
            let anchored = format!("^(?:{})$", pattern);
            router.token_pattern =
                Some(Regex::new(&anchored).map_err(|e| ConfigError::BadPattern(e.to_string()))?);
        }
        Ok(router)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Extracts the routing token from `request` and derives its destination.
    pub fn route(&self, request: &SessionRequest) -> Result<Route, RoutingError> {
        let token = request
            .param(ROUTING_PARAM)
            .ok_or(RoutingError::MissingToken)?;
        self.check_token(token)?;

        let destination = self.destination_for(token);
        debug!("Routed stream key to {}", destination);
        Ok(Route {
            token: token.to_string(),
            destination,
        })
    }

    pub fn destination_for(&self, token: &str) -> DestinationAddress {
        DestinationAddress(format!("{}/{}", self.base_url, token))
    }

    fn check_token(&self, token: &str) -> Result<(), RoutingError> {
        if token.is_empty() {
            return Err(RoutingError::EmptyToken);
        }
        if let Some(max) = self.max_token_length {
            if token.len() > max {
                return Err(RoutingError::TokenTooLong {
                    len: token.len(),
                    max,
                });
            }
        }
        if let Some(pattern) = &self.token_pattern {
            if !pattern.is_match(token) {
                return Err(RoutingError::MalformedToken(token.to_string()));
            }
        }
        Ok(())
    }
}
