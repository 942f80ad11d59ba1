//! External component lookup.
//!
//! The routing table consults a [`ComponentLookup`] before answering a lookup
//! for an unregistered foreign domain with the pending-remote placeholder.

use std::fmt;

use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::handler::Handler;

/// Answers whether an external component serves a domain.
pub trait ComponentLookup: Send + Sync {
    /// Whether a component is registered for `domain`.
    fn has_component(&self, domain: &str) -> bool;

    /// The component registered for `domain`, if any.
    fn get_component(&self, domain: &str) -> Option<Handler>;
}

/// Registry of external components keyed by the domain they serve.
///
/// Uses DashMap for concurrent access without explicit locking.
pub struct ExternalComponentRegistry {
    components: DashMap<String, Handler>,
}

impl ExternalComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        info!("Creating external component registry");
        Self {
            components: DashMap::new(),
        }
    }

    /// Register a component for `domain`, returning the one it replaces.
    #[instrument(skip(self, handler))]
    pub fn register(&self, domain: &str, handler: Handler) -> Option<Handler> {
        let previous = self.components.insert(domain.to_ascii_lowercase(), handler);
        if previous.is_some() {
            debug!("Replaced existing component registration");
        } else {
            debug!("Registered new component");
        }
        previous
    }

    /// Remove the component for `domain`.
    #[instrument(skip(self))]
    pub fn unregister(&self, domain: &str) -> Option<Handler> {
        let removed = self
            .components
            .remove(&domain.to_ascii_lowercase())
            .map(|(_, handler)| handler);
        if removed.is_none() {
            debug!("Component was not registered");
        }
        removed
    }

    /// Domains with a registered component.
    pub fn domains(&self) -> Vec<String> {
        self.components.iter().map(|r| r.key().clone()).collect()
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether no component is registered.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl ComponentLookup for ExternalComponentRegistry {
    fn has_component(&self, domain: &str) -> bool {
        self.components.contains_key(&domain.to_ascii_lowercase())
    }

    fn get_component(&self, domain: &str) -> Option<Handler> {
        self.components
            .get(&domain.to_ascii_lowercase())
            .map(|entry| entry.value().clone())
    }
}

impl Default for ExternalComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExternalComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalComponentRegistry")
            .field("component_count", &self.components.len())
            .finish()
    }
}
