//! Routing table configuration.
//!
//! # Environment Variables
//!
//! - `WADDLE_XMPP_DOMAIN`: Local server domain. Default: `localhost`
//! - `WADDLE_ROUTING_SUBDOMAINS_LOCAL`: Treat subdomains of the local domain
//!   as hosted here rather than remote. Default: `true`
//! - `WADDLE_ROUTING_PENDING_QUEUE_LIMIT`: Stanzas queued per remote domain
//!   while its outgoing connection is pending. Default: `1000`

use serde::{Deserialize, Serialize};

use crate::RoutingError;

/// Default number of stanzas queued per pending remote domain.
pub const DEFAULT_PENDING_QUEUE_LIMIT: usize = 1000;

/// Configuration for the routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// The local domain for this server
    pub local_domain: String,
    /// Whether subdomains of the local domain (e.g. `muc.waddle.social`)
    /// are hosted here and must never resolve to the remote placeholder
    pub subdomains_are_local: bool,
    /// Maximum stanzas queued per remote domain on the pending placeholder
    pub pending_queue_limit: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self::new("localhost".to_string())
    }
}

impl RoutingConfig {
    /// Create a new routing configuration.
    pub fn new(local_domain: String) -> Self {
        Self {
            local_domain: local_domain.to_ascii_lowercase(),
            subdomains_are_local: true,
            pending_queue_limit: DEFAULT_PENDING_QUEUE_LIMIT,
        }
    }

    /// Set whether subdomains of the local domain count as local.
    pub fn with_subdomains_local(mut self, enabled: bool) -> Self {
        self.subdomains_are_local = enabled;
        self
    }

    /// Set the per-domain pending queue limit.
    pub fn with_pending_queue_limit(mut self, limit: usize) -> Self {
        self.pending_queue_limit = limit;
        self
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid routing configuration, using defaults");
            Self::default()
        })
    }

    /// Load configuration from environment variables.
    pub fn try_from_env() -> Result<Self, RoutingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RoutingError> {
        let domain = lookup("WADDLE_XMPP_DOMAIN").unwrap_or_else(|| "localhost".to_string());
        if domain.trim().is_empty() {
            return Err(RoutingError::config("WADDLE_XMPP_DOMAIN must not be empty"));
        }

        let mut config = Self::new(domain.trim().to_string());

        if let Some(value) = lookup("WADDLE_ROUTING_SUBDOMAINS_LOCAL") {
            config.subdomains_are_local = parse_bool(&value).ok_or_else(|| {
                RoutingError::config(format!(
                    "WADDLE_ROUTING_SUBDOMAINS_LOCAL: expected a boolean, got '{}'",
                    value
                ))
            })?;
        }

        if let Some(value) = lookup("WADDLE_ROUTING_PENDING_QUEUE_LIMIT") {
            config.pending_queue_limit = value.trim().parse().map_err(|e| {
                RoutingError::config(format!("WADDLE_ROUTING_PENDING_QUEUE_LIMIT: {}", e))
            })?;
        }

        Ok(config)
    }

    /// Whether `domain` is served by this server.
    pub fn is_local_domain(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        let local = self.local_domain.to_ascii_lowercase();
        if domain == local {
            return true;
        }
        self.subdomains_are_local
            && domain
                .strip_suffix(local.as_str())
                .is_some_and(|prefix| prefix.len() > 1 && prefix.ends_with('.'))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
