//! Routing table implementation.
//!
//! Maps addresses to handlers through three levels of `DashMap`s:
//! domain → node → resource.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::entry::{NodeMap, ResourceMap, RoutingEntry};
use super::selection;
use crate::address::Address;
use crate::components::ComponentLookup;
use crate::config::RoutingConfig;
use crate::handler::{same_handler, Handler};
use crate::metrics;
use crate::pending::PendingRemoteSession;
use crate::types::{HandlerKind, LookupOutcome, RouteStats};

/// Address routing table.
///
/// Thread-safe: lookups only take shard read locks, and a domain's node map
/// (or a node's resource map) is created and pruned while holding the write
/// lock of the enclosing key, so two threads never publish competing maps
/// for the same key. Lock order is always outer map before inner map.
///
/// ## Usage
///
/// ```ignore
/// let table = Arc::new(RoutingTable::new(RoutingConfig::new("waddle.social".into())));
///
/// // When a session binds its resource:
/// let session = Arc::new(LocalSession::new(address.clone(), tx));
/// table.add_route(&address, session.clone(), HandlerKind::Session);
///
/// // When routing a stanza:
/// if let Some(handler) = table.get_best_route(&recipient) {
///     handler.deliver(stanza);
/// }
///
/// // When the session closes:
/// table.remove_route(&address);
/// ```
pub struct RoutingTable {
    config: RoutingConfig,
    domains: DashMap<String, RoutingEntry<NodeMap>>,
    components: Option<Arc<dyn ComponentLookup>>,
    pending: Arc<PendingRemoteSession>,
    pending_handler: Handler,
}

impl RoutingTable {
    /// Create an empty routing table for the server described by `config`.
    pub fn new(config: RoutingConfig) -> Self {
        info!(
            local_domain = %config.local_domain,
            subdomains_are_local = config.subdomains_are_local,
            "Creating routing table"
        );
        let pending = Arc::new(PendingRemoteSession::new(&config));
        Self {
            config,
            domains: DashMap::new(),
            components: None,
            pending_handler: Arc::clone(&pending) as Handler,
            pending,
        }
    }

    /// Consult `components` before falling back to the pending-remote placeholder.
    pub fn with_components(mut self, components: Arc<dyn ComponentLookup>) -> Self {
        self.components = Some(components);
        self
    }

    /// Use a shared pending-remote placeholder.
    pub fn with_pending_remote(mut self, pending: Arc<PendingRemoteSession>) -> Self {
        self.pending_handler = Arc::clone(&pending) as Handler;
        self.pending = pending;
        self
    }

    /// Announce foreign domains that need an outgoing connection on `notifier`.
    ///
    /// Replaces the placeholder with one that queues stanzas; without a
    /// notifier the placeholder refuses them.
    pub fn with_remote_notifier(self, notifier: mpsc::UnboundedSender<String>) -> Self {
        let pending = PendingRemoteSession::new(&self.config).with_notifier(notifier);
        self.with_pending_remote(Arc::new(pending))
    }

    /// Get the routing configuration.
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Get the local domain.
    pub fn local_domain(&self) -> &str {
        &self.config.local_domain
    }

    /// Check if a domain is served by this server.
    pub fn is_local_domain(&self, domain: &str) -> bool {
        self.config.is_local_domain(domain)
    }

    /// The pending-remote placeholder, for draining queued stanzas.
    pub fn pending_remote(&self) -> &Arc<PendingRemoteSession> {
        &self.pending
    }

    /// The pending-remote placeholder as a handler, identical to what
    /// lookups return for unregistered foreign domains.
    pub fn pending_remote_handler(&self) -> Handler {
        Arc::clone(&self.pending_handler)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Register `handler` at `address`.
    ///
    /// Sessions are stored under domain → node → resource. Components and
    /// server sessions are stored directly under the domain, replacing
    /// whatever was there. Returns the handler that was displaced, if any.
    #[instrument(skip(self, handler), fields(address = %address, kind = %kind))]
    pub fn add_route(&self, address: &Address, handler: Handler, kind: HandlerKind) -> Option<Handler> {
        let displaced = if kind.is_domain_level() {
            self.add_domain_route(address, handler, kind)
        } else {
            self.add_session_route(address, handler)
        };
        metrics::record_route_added(kind);
        if displaced.is_some() {
            debug!("Replaced existing route");
        } else {
            debug!("Added new route");
        }
        displaced
    }

    fn add_domain_route(&self, address: &Address, handler: Handler, kind: HandlerKind) -> Option<Handler> {
        if !address.is_domain() {
            debug!("Domain-level route ignores node and resource");
        }
        let previous = self
            .domains
            .insert(address.domain().to_string(), RoutingEntry::Direct { kind, handler });
        match previous {
            Some(RoutingEntry::Direct { handler, .. }) => Some(handler),
            Some(RoutingEntry::Nested(nodes)) => {
                warn!(
                    node_count = nodes.len(),
                    "Domain-level route replaced session routes"
                );
                None
            }
            None => None,
        }
    }

    fn add_session_route(&self, address: &Address, handler: Handler) -> Option<Handler> {
        // Held until the session is in place so pruning cannot orphan the node map.
        let mut domain_entry = self
            .domains
            .entry(address.domain().to_string())
            .or_insert_with(|| {
                debug!("Creating node map for domain");
                RoutingEntry::Nested(Arc::new(NodeMap::default()))
            });

        let (nodes, mut displaced) = match &*domain_entry {
            RoutingEntry::Nested(nodes) => (Arc::clone(nodes), None),
            RoutingEntry::Direct { kind, handler } => {
                warn!(previous = %kind, "Session route replaced domain-level route");
                (Arc::new(NodeMap::default()), Some(Arc::clone(handler)))
            }
        };
        if displaced.is_some() {
            *domain_entry = RoutingEntry::Nested(Arc::clone(&nodes));
        }

        let resource = address.resource_key();
        match nodes.entry(address.node_key().to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(RoutingEntry::for_session(resource, handler));
            }
            Entry::Occupied(mut slot) => {
                let node_entry = slot.get_mut();
                let resources = match node_entry {
                    RoutingEntry::Nested(resources) => Arc::clone(resources),
                    RoutingEntry::Direct { handler: bare, .. } => {
                        if resource.is_empty() {
                            let previous = std::mem::replace(bare, handler);
                            return displaced.or(Some(previous));
                        }
                        debug!("Expanding bare node into resource map");
                        let resources = Arc::new(ResourceMap::default());
                        resources.insert(String::new(), Arc::clone(bare));
                        *node_entry = RoutingEntry::Nested(Arc::clone(&resources));
                        resources
                    }
                };
                if let Some(previous) = resources.insert(resource.to_string(), handler) {
                    displaced.get_or_insert(previous);
                }
            }
        }

        displaced
    }

    /// Remove whatever is registered at `address`.
    ///
    /// Empty node and domain maps are pruned. A direct handler (domain-level,
    /// or a lone bare session) is only removed when the address names its
    /// whole key or equals the handler's own address. A bare session that
    /// shares its node with full resources is also removed by its own address.
    #[instrument(skip(self), fields(address = %address))]
    pub fn remove_route(&self, address: &Address) -> Option<Handler> {
        self.remove_matching(address, None)
    }

    /// Remove the route at `address` only if it still points at `handler`.
    ///
    /// Useful on connection teardown, where a newer session may already have
    /// taken over the same address.
    #[instrument(skip(self, handler), fields(address = %address))]
    pub fn remove_handler(&self, address: &Address, handler: &Handler) -> bool {
        self.remove_matching(address, Some(handler)).is_some()
    }

    fn remove_matching(&self, address: &Address, expected: Option<&Handler>) -> Option<Handler> {
        let is_expected = |handler: &Handler| expected.map_or(true, |e| same_handler(e, handler));

        let Entry::Occupied(slot) = self.domains.entry(address.domain().to_string()) else {
            debug!("Domain was not registered");
            return None;
        };

        let (removed, prune) = match slot.get() {
            RoutingEntry::Direct { kind, handler } => {
                if is_expected(handler) && (address.is_domain() || handler.address() == address) {
                    (Some((*kind, Arc::clone(handler))), true)
                } else {
                    (None, false)
                }
            }
            RoutingEntry::Nested(nodes) => {
                let removed = Self::remove_from_nodes(nodes, address, &is_expected)
                    .map(|handler| (HandlerKind::Session, handler));
                (removed, nodes.is_empty())
            }
        };

        if prune {
            slot.remove();
            debug!("Removed domain entry");
        }

        match removed {
            Some((kind, handler)) => {
                metrics::record_route_removed(kind);
                debug!(kind = %kind, "Removed route");
                Some(handler)
            }
            None => {
                debug!("Route was not registered");
                None
            }
        }
    }

    fn remove_from_nodes(
        nodes: &NodeMap,
        address: &Address,
        is_expected: &dyn Fn(&Handler) -> bool,
    ) -> Option<Handler> {
        let Entry::Occupied(slot) = nodes.entry(address.node_key().to_string()) else {
            return None;
        };

        let (removed, prune) = match slot.get() {
            RoutingEntry::Direct { handler, .. } => {
                if is_expected(handler) && (address.is_bare() || handler.address() == address) {
                    (Some(Arc::clone(handler)), true)
                } else {
                    (None, false)
                }
            }
            RoutingEntry::Nested(resources) => {
                let removed = resources
                    .remove_if(address.resource_key(), |_, handler| is_expected(handler))
                    .or_else(|| {
                        // A bare registration moved to the "" slot still answers to its own address.
                        if address.is_bare() {
                            return None;
                        }
                        resources.remove_if("", |_, handler| {
                            is_expected(handler) && handler.address() == address
                        })
                    })
                    .map(|(_, handler)| handler);
                (removed, resources.is_empty())
            }
        };

        if prune {
            slot.remove();
            debug!("Removed node entry");
        }
        removed
    }

    /// Remove every handler whose connection has closed.
    ///
    /// This can be called periodically to clean up sessions that were not
    /// properly unregistered. Returns the number of routes removed.
    pub fn cleanup_stale(&self) -> usize {
        let mut stale: Vec<(Address, Handler)> = Vec::new();
        for domain in self.domains.iter() {
            match domain.value() {
                RoutingEntry::Direct { handler, .. } if handler.is_closed() => {
                    stale.push((Address::domain_only(domain.key().clone()), Arc::clone(handler)));
                }
                RoutingEntry::Direct { .. } => {}
                RoutingEntry::Nested(nodes) => {
                    for node in nodes.iter() {
                        for (resource, handler) in node.value().resources() {
                            if handler.is_closed() {
                                let address = Address::new(
                                    domain.key().clone(),
                                    Some(node.key()),
                                    Some(&resource),
                                );
                                stale.push((address, handler));
                            }
                        }
                    }
                }
            }
        }

        let removed = stale
            .iter()
            .filter(|(address, handler)| self.remove_handler(address, handler))
            .count();
        if removed > 0 {
            info!(count = removed, "Cleaned up stale routes");
        }
        removed
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Resolve exactly `address`.
    ///
    /// A direct handler at the domain or node level answers for everything
    /// below it. Foreign domains with no entry and no component resolve to
    /// the pending-remote placeholder.
    pub fn get_route(&self, address: &Address) -> Option<Handler> {
        let (route, outcome) = self.resolve(address);
        metrics::record_lookup("get_route", outcome);
        route
    }

    /// Resolve `address`, falling back to the bare address and then to the
    /// preferred available session of the user.
    pub fn get_best_route(&self, address: &Address) -> Option<Handler> {
        let (route, outcome) = self.resolve(address);
        if route.is_some() {
            metrics::record_lookup("get_best_route", outcome);
            return route;
        }

        let bare = address.to_bare();
        if bare != *address {
            let (route, outcome) = self.resolve(&bare);
            if route.is_some() {
                debug!(address = %address, "Resolved through bare address");
                metrics::record_lookup("get_best_route", outcome);
                return route;
            }
        }

        let route = address
            .node()
            .and_then(|_| selection::best_session(self.node_resources(address)));
        if route.is_some() {
            debug!(address = %address, "Resolved to preferred session");
        }
        metrics::record_lookup(
            "get_best_route",
            if route.is_some() {
                LookupOutcome::Local
            } else {
                LookupOutcome::Miss
            },
        );
        route
    }

    /// Every handler at or below `address`, without duplicates.
    pub fn get_routes(&self, address: &Address) -> Vec<Handler> {
        let mut routes = Vec::new();
        let outcome = match self.domain_entry(address.domain()) {
            None => {
                let (route, outcome) = self.resolve_unregistered(address.domain());
                routes.extend(route);
                outcome
            }
            Some(RoutingEntry::Direct { handler, .. }) => {
                routes.push(handler);
                LookupOutcome::Local
            }
            Some(RoutingEntry::Nested(nodes)) => {
                if address.node().is_none() {
                    let node_entries: Vec<_> = nodes.iter().map(|e| e.value().clone()).collect();
                    for node_entry in &node_entries {
                        node_entry.collect_into(&mut routes);
                    }
                } else if address.is_bare() {
                    if let Some(node_entry) = Self::node_entry(&nodes, address) {
                        node_entry.collect_into(&mut routes);
                    }
                } else {
                    routes.extend(Self::lookup_node(&nodes, address));
                }
                if routes.is_empty() {
                    LookupOutcome::Miss
                } else {
                    LookupOutcome::Local
                }
            }
        };
        metrics::record_lookup("get_routes", outcome);
        routes
    }

    /// [`get_routes`](Self::get_routes) restricted to available handlers.
    pub fn get_available_routes(&self, address: &Address) -> Vec<Handler> {
        self.get_routes(address)
            .into_iter()
            .filter(|handler| handler.presence().available && !handler.is_closed())
            .collect()
    }

    /// All available sessions of the user at `address` that share the
    /// highest non-negative priority, most preferred first.
    pub fn get_priority_routes(&self, address: &Address) -> Vec<Handler> {
        if address.node().is_none() {
            return Vec::new();
        }
        selection::highest_priority_sessions(self.node_resources(address))
    }

    fn resolve(&self, address: &Address) -> (Option<Handler>, LookupOutcome) {
        let route = match self.domain_entry(address.domain()) {
            None => return self.resolve_unregistered(address.domain()),
            Some(RoutingEntry::Direct { handler, .. }) => Some(handler),
            Some(RoutingEntry::Nested(nodes)) => Self::lookup_node(&nodes, address),
        };
        let outcome = if route.is_some() {
            LookupOutcome::Local
        } else {
            LookupOutcome::Miss
        };
        (route, outcome)
    }

    fn resolve_unregistered(&self, domain: &str) -> (Option<Handler>, LookupOutcome) {
        if let Some(components) = &self.components {
            if components.has_component(domain) {
                return match components.get_component(domain) {
                    Some(component) => (Some(component), LookupOutcome::Component),
                    None => (None, LookupOutcome::Miss),
                };
            }
        }
        if self.config.is_local_domain(domain) {
            (None, LookupOutcome::Miss)
        } else {
            debug!(domain = %domain, "No route to foreign domain, using pending remote session");
            (Some(self.pending_remote_handler()), LookupOutcome::PendingRemote)
        }
    }

    fn domain_entry(&self, domain: &str) -> Option<RoutingEntry<NodeMap>> {
        self.domains.get(domain).map(|entry| entry.value().clone())
    }

    fn node_entry(nodes: &NodeMap, address: &Address) -> Option<RoutingEntry<ResourceMap>> {
        nodes
            .get(address.node_key())
            .map(|entry| entry.value().clone())
    }

    fn lookup_node(nodes: &NodeMap, address: &Address) -> Option<Handler> {
        match Self::node_entry(nodes, address)? {
            RoutingEntry::Direct { handler, .. } => Some(handler),
            RoutingEntry::Nested(resources) => resources
                .get(address.resource_key())
                .map(|entry| Arc::clone(entry.value())),
        }
    }

    /// `(resource, handler)` pairs registered under the node of `address`.
    fn node_resources(&self, address: &Address) -> Vec<(String, Handler)> {
        match self.domain_entry(address.domain()) {
            Some(RoutingEntry::Nested(nodes)) => Self::node_entry(&nodes, address)
                .map(|entry| entry.resources())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Whether a session is registered at `address`, without any fallback.
    pub fn has_client_route(&self, address: &Address) -> bool {
        match self.domain_entry(address.domain()) {
            Some(RoutingEntry::Nested(nodes)) => Self::lookup_node(&nodes, address).is_some(),
            _ => false,
        }
    }

    /// Whether the session registered at `address` authenticated anonymously.
    pub fn is_anonymous_route(&self, address: &Address) -> bool {
        match self.domain_entry(address.domain()) {
            Some(RoutingEntry::Nested(nodes)) => {
                Self::lookup_node(&nodes, address).is_some_and(|handler| handler.is_anonymous())
            }
            _ => false,
        }
    }

    /// Whether a component answers for `domain`, in the table or externally.
    pub fn has_component_route(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        self.has_direct_route(&domain, HandlerKind::Component)
            || self
                .components
                .as_ref()
                .is_some_and(|components| components.has_component(&domain))
    }

    /// Whether an outgoing server session is registered for `domain`.
    pub fn has_server_route(&self, domain: &str) -> bool {
        self.has_direct_route(&domain.to_ascii_lowercase(), HandlerKind::Server)
    }

    fn has_direct_route(&self, domain: &str, expected: HandlerKind) -> bool {
        self.domains.get(domain).is_some_and(|entry| {
            matches!(entry.value(), RoutingEntry::Direct { kind, .. } if *kind == expected)
        })
    }

    /// Every registered session handler.
    pub fn client_routes(&self) -> Vec<Handler> {
        let nested: Vec<Arc<NodeMap>> = self
            .domains
            .iter()
            .filter_map(|entry| match entry.value() {
                RoutingEntry::Nested(nodes) => Some(Arc::clone(nodes)),
                RoutingEntry::Direct { .. } => None,
            })
            .collect();

        let mut sessions = Vec::new();
        for nodes in nested {
            let node_entries: Vec<_> = nodes.iter().map(|e| e.value().clone()).collect();
            for node_entry in &node_entries {
                node_entry.collect_into(&mut sessions);
            }
        }
        sessions
    }

    /// Domains answered by a component registered in the table.
    pub fn component_domains(&self) -> Vec<String> {
        self.direct_domains(HandlerKind::Component)
    }

    /// Domains with an outgoing server session.
    pub fn server_domains(&self) -> Vec<String> {
        self.direct_domains(HandlerKind::Server)
    }

    fn direct_domains(&self, expected: HandlerKind) -> Vec<String> {
        self.domains
            .iter()
            .filter(|entry| {
                matches!(entry.value(), RoutingEntry::Direct { kind, .. } if *kind == expected)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Count the routes currently held.
    pub fn stats(&self) -> RouteStats {
        let mut stats = RouteStats {
            domains: self.domains.len(),
            ..RouteStats::default()
        };
        for entry in self.domains.iter() {
            match entry.value() {
                RoutingEntry::Direct {
                    kind: HandlerKind::Component,
                    ..
                } => stats.components += 1,
                RoutingEntry::Direct {
                    kind: HandlerKind::Server,
                    ..
                } => stats.servers += 1,
                RoutingEntry::Direct {
                    kind: HandlerKind::Session,
                    ..
                } => {}
                RoutingEntry::Nested(_) => {}
            }
        }
        let mut seen = HashSet::new();
        for handler in self.client_routes() {
            if seen.insert(Arc::as_ptr(&handler) as *const ()) {
                stats.sessions += 1;
                if handler.is_anonymous() {
                    stats.anonymous_sessions += 1;
                }
            }
        }
        stats
    }

    /// Whether the table holds no routes.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTable")
            .field("local_domain", &self.config.local_domain)
            .field("domain_count", &self.domains.len())
            .finish()
    }
}
