//! Route handlers.
//!
//! A handler is anything the routing table can resolve an address to: a
//! local client session, an external component, an outgoing server session
//! or the pending-remote placeholder. The table only holds `Arc` references;
//! whoever created a handler owns its lifecycle.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use crate::address::Address;
use crate::stanza::{OutboundStanza, Stanza};
use crate::types::PresenceShow;

/// Result of attempting to deliver a stanza to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Stanza was successfully queued for delivery
    Sent,
    /// The recipient is not currently connected
    NotConnected,
    /// The channel to the recipient is full (backpressure)
    ChannelFull,
    /// The channel to the recipient is closed
    ChannelClosed,
}

/// Presence state used to rank sessions of the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSnapshot {
    /// Whether the resource has sent available presence
    pub available: bool,
    /// Advertised priority (-128..127)
    pub priority: i8,
    /// Advertised `<show/>`
    pub show: PresenceShow,
    /// Last time the resource was active, if known
    pub last_active: Option<DateTime<Utc>>,
}

impl PresenceSnapshot {
    /// Available with priority 0 and no activity information.
    pub fn available() -> Self {
        Self {
            available: true,
            priority: 0,
            show: PresenceShow::Available,
            last_active: None,
        }
    }

    /// Not available.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::available()
        }
    }
}

/// An entity that can receive routed stanzas.
pub trait RouteHandler: Send + Sync + fmt::Debug {
    /// Canonical address of this handler.
    fn address(&self) -> &Address;

    /// Hand a stanza to this handler without blocking.
    fn deliver(&self, stanza: Stanza) -> SendResult;

    /// Presence state used by best-route selection.
    ///
    /// Handlers without a presence notion are always available.
    fn presence(&self) -> PresenceSnapshot {
        PresenceSnapshot::available()
    }

    /// Whether the handler can no longer accept stanzas.
    fn is_closed(&self) -> bool {
        false
    }

    /// Whether the handler is an anonymous client session.
    fn is_anonymous(&self) -> bool {
        false
    }
}

/// Shared reference to a route handler.
pub type Handler = Arc<dyn RouteHandler>;

/// Whether two handler references point at the same handler.
pub fn same_handler(a: &Handler, b: &Handler) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Push `handler` onto `handlers` unless it is already present.
pub(crate) fn push_unique(handlers: &mut Vec<Handler>, handler: &Handler) {
    if !handlers.iter().any(|h| same_handler(h, handler)) {
        handlers.push(Arc::clone(handler));
    }
}

fn send_outbound(
    sender: &mpsc::Sender<OutboundStanza>,
    address: &Address,
    stanza: Stanza,
) -> SendResult {
    match sender.try_send(OutboundStanza::new(stanza)) {
        Ok(()) => {
            debug!(to = %address, "Stanza queued for delivery");
            SendResult::Sent
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(to = %address, "Outbound channel full, applying backpressure");
            SendResult::ChannelFull
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(to = %address, "Outbound channel closed, connection may have dropped");
            SendResult::ChannelClosed
        }
    }
}

const PRESENCE_AVAILABLE: u32 = 1 << 16;

/// Pack availability, priority and show into one word so readers never see
/// a torn update.
fn pack_presence(available: bool, priority: i8, show: PresenceShow) -> u32 {
    let available = if available { PRESENCE_AVAILABLE } else { 0 };
    available | (u32::from(show.rank()) << 8) | u32::from(priority as u8)
}

fn unpack_presence(packed: u32) -> (bool, i8, PresenceShow) {
    (
        packed & PRESENCE_AVAILABLE != 0,
        (packed & 0xff) as u8 as i8,
        PresenceShow::from_rank(((packed >> 8) & 0xff) as u8),
    )
}

/// A client session connected to this server.
///
/// Presence state is kept in atomics so the connection can update it while
/// the routing table reads it from other threads.
#[derive(Debug)]
pub struct LocalSession {
    address: Address,
    stream_id: Uuid,
    sender: mpsc::Sender<OutboundStanza>,
    anonymous: bool,
    /// Availability, priority and show, packed by `pack_presence`
    presence: AtomicU32,
    /// Milliseconds since the epoch, `i64::MIN` when never active
    last_active_ms: AtomicI64,
}

impl LocalSession {
    /// Create a session for `address`, unavailable until initial presence.
    pub fn new(address: Address, sender: mpsc::Sender<OutboundStanza>) -> Self {
        Self {
            address,
            stream_id: Uuid::new_v4(),
            sender,
            anonymous: false,
            presence: AtomicU32::new(pack_presence(false, 0, PresenceShow::Available)),
            last_active_ms: AtomicI64::new(i64::MIN),
        }
    }

    /// Mark the session as authenticated anonymously (SASL ANONYMOUS).
    pub fn with_anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    /// Stream identifier of the underlying connection.
    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    /// Update the presence state for this resource.
    pub fn update_presence(&self, available: bool, priority: i8, show: PresenceShow) {
        self.presence
            .store(pack_presence(available, priority, show), Ordering::Release);
    }

    /// Update the presence state from a broadcast presence stanza.
    pub fn apply_presence(&self, presence: &Presence) {
        let available = presence.type_ == PresenceType::None;
        self.update_presence(
            available,
            presence.priority,
            PresenceShow::from(presence.show.as_ref()),
        );
        self.mark_active();
    }

    /// Record activity now.
    pub fn mark_active(&self) {
        self.mark_active_at(Utc::now());
    }

    /// Record activity at a given instant.
    pub fn mark_active_at(&self, at: DateTime<Utc>) {
        self.last_active_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    fn last_active(&self) -> Option<DateTime<Utc>> {
        match self.last_active_ms.load(Ordering::Relaxed) {
            i64::MIN => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

impl RouteHandler for LocalSession {
    fn address(&self) -> &Address {
        &self.address
    }

    fn deliver(&self, stanza: Stanza) -> SendResult {
        send_outbound(&self.sender, &self.address, stanza)
    }

    fn presence(&self) -> PresenceSnapshot {
        let (available, priority, show) = unpack_presence(self.presence.load(Ordering::Acquire));
        PresenceSnapshot {
            available,
            priority,
            show,
            last_active: self.last_active(),
        }
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn is_anonymous(&self) -> bool {
        self.anonymous
    }
}

/// An external component serving a whole domain.
#[derive(Debug)]
pub struct ComponentHandle {
    address: Address,
    sender: mpsc::Sender<OutboundStanza>,
}

impl ComponentHandle {
    /// Create a component handle for `domain`.
    pub fn new(domain: impl Into<String>, sender: mpsc::Sender<OutboundStanza>) -> Self {
        Self {
            address: Address::domain_only(domain),
            sender,
        }
    }
}

impl RouteHandler for ComponentHandle {
    fn address(&self) -> &Address {
        &self.address
    }

    fn deliver(&self, stanza: Stanza) -> SendResult {
        send_outbound(&self.sender, &self.address, stanza)
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
