//! # waddle-routing
//!
//! XMPP address routing table for Waddle Social.
//!
//! Given a destination address, the table answers which handler should
//! receive the stanza: a local client session, an external component, an
//! outgoing server-to-server session, or the shared pending-remote
//! placeholder when no connection to a foreign domain exists yet.
//!
//! ## Lookup order
//!
//! 1. A handler registered for the whole domain answers for every address in it
//! 2. Sessions are matched by node, then resource
//! 3. Unregistered domains consult the component lookup
//! 4. Unregistered foreign domains resolve to the [`PendingRemoteSession`]
//!
//! [`RoutingTable::get_best_route`] additionally falls back to the bare
//! address and then to the preferred available session of the user.

pub mod address;
pub mod components;
pub mod config;
pub mod handler;
pub mod metrics;
pub mod pending;
pub mod stanza;
pub mod table;

mod error;
mod types;

pub use address::Address;
pub use components::{ComponentLookup, ExternalComponentRegistry};
pub use config::RoutingConfig;
pub use error::RoutingError;
pub use handler::{
    same_handler, ComponentHandle, Handler, LocalSession, PresenceSnapshot, RouteHandler,
    SendResult,
};
pub use pending::PendingRemoteSession;
pub use stanza::{OutboundStanza, Stanza};
pub use table::RoutingTable;
pub use types::*;
