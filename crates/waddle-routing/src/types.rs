//! Common types for the routing table.

use serde::{Deserialize, Serialize};
use xmpp_parsers::presence::Show;

/// How a handler is stored in the routing table.
///
/// Passed at registration time so the table never has to inspect the
/// concrete handler type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerKind {
    /// Client session, stored under domain → node → resource
    Session,
    /// External component answering for a whole domain
    Component,
    /// Established outgoing server-to-server session for a remote domain
    Server,
}

impl HandlerKind {
    /// Whether handlers of this kind are stored directly under their domain.
    pub fn is_domain_level(&self) -> bool {
        matches!(self, HandlerKind::Component | HandlerKind::Server)
    }

    /// Label used for metrics and tracing.
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Session => "session",
            HandlerKind::Component => "component",
            HandlerKind::Server => "server",
        }
    }
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence `<show/>` value of a session, ordered from most to least eager
/// to receive traffic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum PresenceShow {
    /// Free for chat
    Chat,
    /// Available, no `<show/>` element
    #[default]
    Available,
    /// Temporarily away
    Away,
    /// Extended away
    Xa,
    /// Do not disturb
    Dnd,
}

impl PresenceShow {
    /// Rank used when picking between sessions of equal priority (lower wins).
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Decode a rank previously produced by [`PresenceShow::rank`].
    pub(crate) fn from_rank(rank: u8) -> Self {
        match rank {
            0 => PresenceShow::Chat,
            2 => PresenceShow::Away,
            3 => PresenceShow::Xa,
            4 => PresenceShow::Dnd,
            _ => PresenceShow::Available,
        }
    }
}

impl From<Option<&Show>> for PresenceShow {
    fn from(show: Option<&Show>) -> Self {
        match show {
            None => PresenceShow::Available,
            Some(Show::Chat) => PresenceShow::Chat,
            Some(Show::Away) => PresenceShow::Away,
            Some(Show::Xa) => PresenceShow::Xa,
            Some(Show::Dnd) => PresenceShow::Dnd,
        }
    }
}

/// Which branch of the lookup produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Found in the table
    Local,
    /// Answered by the external component lookup
    Component,
    /// Foreign domain, answered with the pending-remote placeholder
    PendingRemote,
    /// Nothing matched
    Miss,
}

impl LookupOutcome {
    /// Label used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOutcome::Local => "local",
            LookupOutcome::Component => "component",
            LookupOutcome::PendingRemote => "pending_remote",
            LookupOutcome::Miss => "miss",
        }
    }
}

/// Snapshot of how many routes the table holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouteStats {
    /// Number of top-level domain entries
    pub domains: usize,
    /// Distinct session handlers
    pub sessions: usize,
    /// Distinct session handlers authenticated anonymously
    pub anonymous_sessions: usize,
    /// Domains answered by a component
    pub components: usize,
    /// Domains answered by an outgoing server session
    pub servers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_rank_order() {
        assert!(PresenceShow::Chat.rank() < PresenceShow::Available.rank());
        assert!(PresenceShow::Available.rank() < PresenceShow::Away.rank());
        assert!(PresenceShow::Away.rank() < PresenceShow::Xa.rank());
        assert!(PresenceShow::Xa.rank() < PresenceShow::Dnd.rank());
    }

    #[test]
    fn test_show_rank_decodes() {
        for show in [
            PresenceShow::Chat,
            PresenceShow::Available,
            PresenceShow::Away,
            PresenceShow::Xa,
            PresenceShow::Dnd,
        ] {
            assert_eq!(PresenceShow::from_rank(show.rank()), show);
        }
    }

    #[test]
    fn test_show_from_presence() {
        assert_eq!(PresenceShow::from(None), PresenceShow::Available);
        assert_eq!(PresenceShow::from(Some(&Show::Dnd)), PresenceShow::Dnd);
        assert_eq!(PresenceShow::from(Some(&Show::Chat)), PresenceShow::Chat);
    }

    #[test]
    fn test_handler_kind_domain_level() {
        assert!(!HandlerKind::Session.is_domain_level());
        assert!(HandlerKind::Component.is_domain_level());
        assert!(HandlerKind::Server.is_domain_level());
        assert_eq!(HandlerKind::Server.to_string(), "server");
    }
}
