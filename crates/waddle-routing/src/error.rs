//! Error types for the routing table.
//!
//! Table operations themselves never fail: a missing route is a valid answer,
//! not an error. These errors only surface when building the inputs to the
//! table (parsing addresses, loading configuration).

use thiserror::Error;

/// Routing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The address could not be parsed as a JID
    #[error("Invalid address '{input}': {reason}")]
    InvalidAddress {
        /// The rejected input
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RoutingError {
    /// Create a new invalid address error.
    pub fn invalid_address(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
