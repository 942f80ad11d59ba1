//! Stanzas carried to route handlers.

use jid::Jid;

/// A stanza handed to a route handler.
#[derive(Debug, Clone)]
pub enum Stanza {
    /// `<message/>` stanza
    Message(xmpp_parsers::message::Message),
    /// `<presence/>` stanza
    Presence(xmpp_parsers::presence::Presence),
    /// `<iq/>` stanza
    Iq(xmpp_parsers::iq::Iq),
}

impl Stanza {
    /// Get the stanza type name for tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
            Stanza::Iq(_) => "iq",
        }
    }

    /// Destination JID, if the stanza carries one.
    pub fn to(&self) -> Option<&Jid> {
        match self {
            Stanza::Message(message) => message.to.as_ref(),
            Stanza::Presence(presence) => presence.to.as_ref(),
            Stanza::Iq(iq) => iq.to.as_ref(),
        }
    }

    /// Domain of the destination JID, if any.
    pub fn to_domain(&self) -> Option<String> {
        self.to().map(|jid| jid.domain().as_str().to_ascii_lowercase())
    }
}

/// A stanza to be sent to a connection.
///
/// This is the message type sent through the outbound channel of
/// session and component handlers.
#[derive(Debug, Clone)]
pub struct OutboundStanza {
    /// The stanza to send
    pub stanza: Stanza,
}

impl OutboundStanza {
    /// Create a new outbound stanza.
    pub fn new(stanza: Stanza) -> Self {
        Self { stanza }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jid::BareJid;
    use xmpp_parsers::message::Message;
    use xmpp_parsers::presence::{Presence, Type as PresenceType};

    #[test]
    fn test_destination_domain() {
        let bare: BareJid = "bob@Remote.Example".parse().unwrap();
        let stanza = Stanza::Message(Message::new(Some(Jid::from(bare))));
        assert_eq!(stanza.name(), "message");
        assert_eq!(stanza.to_domain().as_deref(), Some("remote.example"));
    }

    #[test]
    fn test_missing_destination() {
        let stanza = Stanza::Presence(Presence::new(PresenceType::None));
        assert!(stanza.to().is_none());
        assert!(stanza.to_domain().is_none());
    }
}
