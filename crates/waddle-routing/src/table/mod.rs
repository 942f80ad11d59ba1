//! Address routing table.
//!
//! Routes are stored per domain. A domain maps either to a single handler
//! (a component or an outgoing server session) or to its nodes, and a node
//! maps either to a single bare session or to its resources.

mod entry;
mod routing_table;
mod selection;

pub use routing_table::RoutingTable;
