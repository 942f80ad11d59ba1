//! Values stored at each level of the routing table.

use std::sync::Arc;

use dashmap::DashMap;

use crate::handler::{push_unique, Handler};
use crate::types::HandlerKind;

/// Resource → handler.
pub(crate) type ResourceMap = DashMap<String, Handler>;

/// Node → handler or resource map.
pub(crate) type NodeMap = DashMap<String, RoutingEntry<ResourceMap>>;

/// Value at the domain and node levels.
///
/// Absence is expressed by the key missing from the map, so an entry is
/// always either a direct handler or a non-empty nested map.
pub(crate) enum RoutingEntry<M> {
    /// A single handler answering for everything below this key
    Direct { kind: HandlerKind, handler: Handler },
    /// The next level of the table
    Nested(Arc<M>),
}

impl<M> Clone for RoutingEntry<M> {
    fn clone(&self) -> Self {
        match self {
            RoutingEntry::Direct { kind, handler } => RoutingEntry::Direct {
                kind: *kind,
                handler: Arc::clone(handler),
            },
            RoutingEntry::Nested(map) => RoutingEntry::Nested(Arc::clone(map)),
        }
    }
}

impl RoutingEntry<ResourceMap> {
    /// Node entry for a session registered at `resource`.
    pub(crate) fn for_session(resource: &str, handler: Handler) -> Self {
        if resource.is_empty() {
            return RoutingEntry::Direct {
                kind: HandlerKind::Session,
                handler,
            };
        }
        let resources = ResourceMap::default();
        resources.insert(resource.to_string(), handler);
        RoutingEntry::Nested(Arc::new(resources))
    }

    /// Append every handler under this node, skipping duplicates.
    pub(crate) fn collect_into(&self, out: &mut Vec<Handler>) {
        match self {
            RoutingEntry::Direct { handler, .. } => push_unique(out, handler),
            RoutingEntry::Nested(resources) => {
                for entry in resources.iter() {
                    push_unique(out, entry.value());
                }
            }
        }
    }

    /// `(resource, handler)` pairs under this node.
    pub(crate) fn resources(&self) -> Vec<(String, Handler)> {
        match self {
            RoutingEntry::Direct { handler, .. } => vec![(String::new(), Arc::clone(handler))],
            RoutingEntry::Nested(resources) => resources
                .iter()
                .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::handler::{same_handler, LocalSession};
    use tokio::sync::mpsc;

    fn session(resource: &str) -> Handler {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(LocalSession::new(
            Address::full("example.com", "alice", resource),
            tx,
        ))
    }

    #[test]
    fn test_bare_session_is_direct() {
        let entry = RoutingEntry::for_session("", session("phone"));
        assert!(matches!(entry, RoutingEntry::Direct { kind: HandlerKind::Session, .. }));
        assert_eq!(entry.resources().len(), 1);
        assert_eq!(entry.resources()[0].0, "");
    }

    #[test]
    fn test_full_session_is_nested() {
        let entry = RoutingEntry::for_session("phone", session("phone"));
        let RoutingEntry::Nested(resources) = &entry else {
            panic!("Expected a resource map");
        };
        assert!(resources.contains_key("phone"));
    }

    #[test]
    fn test_collect_into_skips_duplicates() {
        let handler = session("phone");
        let resources = ResourceMap::default();
        resources.insert(String::new(), Arc::clone(&handler));
        resources.insert("phone".to_string(), Arc::clone(&handler));
        let entry = RoutingEntry::Nested(Arc::new(resources));

        let mut out = Vec::new();
        entry.collect_into(&mut out);
        assert_eq!(out.len(), 1);
        assert!(same_handler(&out[0], &handler));
    }
}
