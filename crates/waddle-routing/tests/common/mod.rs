//! Shared helpers for routing table integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use jid::{BareJid, Jid};
use tokio::sync::mpsc;
use xmpp_parsers::message::Message;

use waddle_routing::{
    Address, ComponentHandle, Handler, LocalSession, OutboundStanza, RoutingConfig, RoutingTable,
    Stanza,
};

pub const LOCAL_DOMAIN: &str = "waddle.social";

/// Initialize tracing once for the whole test binary.
pub fn init_test() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Create an empty table for [`LOCAL_DOMAIN`].
pub fn create_test_table() -> RoutingTable {
    RoutingTable::new(RoutingConfig::new(LOCAL_DOMAIN.to_string()))
}

/// A connected session and the receiving end of its outbound channel.
///
/// The receiver must be kept alive or the session reports itself closed.
pub struct TestSession {
    pub session: Arc<LocalSession>,
    pub rx: mpsc::Receiver<OutboundStanza>,
}

impl TestSession {
    pub fn new(address: &Address) -> Self {
        let (tx, rx) = mpsc::channel(32);
        Self {
            session: Arc::new(LocalSession::new(address.clone(), tx)),
            rx,
        }
    }

    /// Session that has sent initial presence.
    pub fn available(address: &Address, priority: i8) -> Self {
        let test = Self::new(address);
        test.session
            .update_presence(true, priority, waddle_routing::PresenceShow::Available);
        test
    }

    pub fn handler(&self) -> Handler {
        Arc::clone(&self.session) as Handler
    }
}

/// A component handle and its outbound channel.
pub fn create_component(domain: &str) -> (Handler, mpsc::Receiver<OutboundStanza>) {
    let (tx, rx) = mpsc::channel(32);
    (Arc::new(ComponentHandle::new(domain, tx)), rx)
}

/// A chat message addressed to a bare JID.
pub fn message_to(to: &str) -> Stanza {
    let bare: BareJid = to.parse().unwrap();
    Stanza::Message(Message::new(Some(Jid::from(bare))))
}
