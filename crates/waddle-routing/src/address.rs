//! Routing addresses.
//!
//! An [`Address`] is the domain → node → resource triple the routing table is
//! keyed by. Missing parts are stored as empty strings so every level of the
//! table can use plain string keys.

use std::fmt;
use std::str::FromStr;

use jid::{BareJid, FullJid, Jid};
use serde::{Deserialize, Serialize};

use crate::RoutingError;

/// A routable address: `node@domain/resource` with optional node and resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    domain: String,
    node: String,
    resource: String,
}

impl Address {
    /// Create an address from its parts. `None` and `""` are equivalent.
    pub fn new(domain: impl Into<String>, node: Option<&str>, resource: Option<&str>) -> Self {
        let mut domain = domain.into();
        domain.make_ascii_lowercase();
        Self {
            domain,
            node: node.unwrap_or_default().to_string(),
            resource: resource.unwrap_or_default().to_string(),
        }
    }

    /// Address of a whole domain (component or remote server).
    pub fn domain_only(domain: impl Into<String>) -> Self {
        Self::new(domain, None, None)
    }

    /// Bare address: domain and node, no resource.
    pub fn bare(domain: impl Into<String>, node: &str) -> Self {
        Self::new(domain, Some(node), None)
    }

    /// Full address: domain, node and resource.
    pub fn full(domain: impl Into<String>, node: &str, resource: &str) -> Self {
        Self::new(domain, Some(node), Some(resource))
    }

    /// Parse a JID string into an address.
    pub fn parse(input: &str) -> Result<Self, RoutingError> {
        let jid: Jid = input
            .parse()
            .map_err(|e: jid::Error| RoutingError::invalid_address(input, e.to_string()))?;
        Ok(Self::from(&jid))
    }

    /// Domain part.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Node part, `None` when empty.
    pub fn node(&self) -> Option<&str> {
        non_empty(&self.node)
    }

    /// Resource part, `None` when empty.
    pub fn resource(&self) -> Option<&str> {
        non_empty(&self.resource)
    }

    /// Node key used inside the table (`""` when absent).
    pub(crate) fn node_key(&self) -> &str {
        &self.node
    }

    /// Resource key used inside the table (`""` when absent).
    pub(crate) fn resource_key(&self) -> &str {
        &self.resource
    }

    /// Whether the address has no resource.
    pub fn is_bare(&self) -> bool {
        self.resource.is_empty()
    }

    /// Whether the address names a whole domain.
    pub fn is_domain(&self) -> bool {
        self.node.is_empty() && self.resource.is_empty()
    }

    /// Same address with the resource cleared.
    pub fn to_bare(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            node: self.node.clone(),
            resource: String::new(),
        }
    }

    /// Same address with node and resource cleared.
    pub fn to_domain(&self) -> Self {
        Self::domain_only(self.domain.clone())
    }
}

fn non_empty(part: &str) -> Option<&str> {
    if part.is_empty() {
        None
    } else {
        Some(part)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.node.is_empty() {
            write!(f, "{}@", self.node)?;
        }
        f.write_str(&self.domain)?;
        if !self.resource.is_empty() {
            write!(f, "/{}", self.resource)?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<&Jid> for Address {
    fn from(jid: &Jid) -> Self {
        let node = jid.node().map(|n| n.to_string());
        let resource = jid.resource().map(|r| r.to_string());
        Self::new(jid.domain().as_str(), node.as_deref(), resource.as_deref())
    }
}

impl From<Jid> for Address {
    fn from(jid: Jid) -> Self {
        Self::from(&jid)
    }
}

impl From<&FullJid> for Address {
    fn from(jid: &FullJid) -> Self {
        Self::from(Jid::from(jid.clone()))
    }
}

impl From<&BareJid> for Address {
    fn from(jid: &BareJid) -> Self {
        Self::from(Jid::from(jid.clone()))
    }
}
