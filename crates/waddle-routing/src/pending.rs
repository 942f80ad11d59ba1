//! Pending-remote placeholder.
//!
//! When a stanza is addressed to a foreign domain that has no outgoing server
//! session yet, the routing table answers with the shared
//! [`PendingRemoteSession`]. Delivering to it queues the stanza per remote
//! domain until the server-to-server layer has established a connection and
//! drains the queue.
//!
//! Lookups never start connections. The first stanza queued for a domain is
//! announced on the notifier channel; the receiving side decides whether and
//! how to connect. Without a notifier nothing would ever drain the queues,
//! so stanzas are refused with [`SendResult::NotConnected`].

use std::collections::VecDeque;
use std::fmt;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::config::RoutingConfig;
use crate::handler::{RouteHandler, SendResult};
use crate::metrics;
use crate::stanza::Stanza;

/// Placeholder handler standing in for not-yet-established remote sessions.
pub struct PendingRemoteSession {
    address: Address,
    queue_limit: usize,
    queues: DashMap<String, VecDeque<Stanza>>,
    notifier: Option<mpsc::UnboundedSender<String>>,
}

impl PendingRemoteSession {
    /// Create a placeholder for the server described by `config`.
    pub fn new(config: &RoutingConfig) -> Self {
        info!(
            local_domain = %config.local_domain,
            queue_limit = config.pending_queue_limit,
            "Creating pending remote session placeholder"
        );
        Self {
            address: Address::domain_only(config.local_domain.clone()),
            queue_limit: config.pending_queue_limit,
            queues: DashMap::new(),
            notifier: None,
        }
    }

    /// Announce domains that need an outgoing connection on `notifier`.
    pub fn with_notifier(mut self, notifier: mpsc::UnboundedSender<String>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Take every stanza queued for `domain`, oldest first.
    pub fn drain(&self, domain: &str) -> Vec<Stanza> {
        self.queues
            .remove(&domain.to_ascii_lowercase())
            .map(|(_, queue)| queue.into_iter().collect())
            .unwrap_or_default()
    }

    /// Drop everything queued for `domain`, e.g. after the connection failed.
    ///
    /// Returns the number of discarded stanzas.
    pub fn discard(&self, domain: &str) -> usize {
        let discarded = self.drain(domain).len();
        if discarded > 0 {
            debug!(domain = %domain, count = discarded, "Discarded pending stanzas");
        }
        discarded
    }

    /// Number of stanzas queued for `domain`.
    pub fn queued_len(&self, domain: &str) -> usize {
        self.queues
            .get(&domain.to_ascii_lowercase())
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    /// Domains with queued stanzas.
    pub fn queued_domains(&self) -> Vec<String> {
        self.queues.iter().map(|r| r.key().clone()).collect()
    }

    fn notify(&self, domain: String) {
        if let Some(notifier) = &self.notifier {
            if notifier.send(domain).is_err() {
                debug!("Pending connection notifier closed");
            }
        }
    }
}

impl RouteHandler for PendingRemoteSession {
    fn address(&self) -> &Address {
        &self.address
    }

    fn deliver(&self, stanza: Stanza) -> SendResult {
        let Some(domain) = stanza.to_domain() else {
            warn!(stanza = stanza.name(), "Pending remote stanza has no destination");
            return SendResult::NotConnected;
        };

        if self.notifier.is_none() {
            debug!(domain = %domain, "No outgoing connection handler, refusing remote stanza");
            metrics::record_pending_queued(false);
            return SendResult::NotConnected;
        }

        if self.queue_limit == 0 {
            metrics::record_pending_queued(false);
            return SendResult::ChannelFull;
        }

        let mut first = false;
        let accepted = {
            let mut queue = self.queues.entry(domain.clone()).or_insert_with(|| {
                first = true;
                VecDeque::new()
            });
            if queue.len() < self.queue_limit {
                queue.push_back(stanza);
                true
            } else {
                false
            }
        };

        metrics::record_pending_queued(accepted);
        if !accepted {
            warn!(domain = %domain, "Pending queue full, dropping stanza");
            return SendResult::ChannelFull;
        }

        debug!(domain = %domain, "Stanza queued for pending remote session");
        if first {
            self.notify(domain);
        }
        SendResult::Sent
    }
}

impl fmt::Debug for PendingRemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRemoteSession")
            .field("address", &self.address)
            .field("queued_domains", &self.queues.len())
            .field("has_notifier", &self.notifier.is_some())
            .finish()
    }
}
