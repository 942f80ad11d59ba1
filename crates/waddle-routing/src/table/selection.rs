//! Choosing between several sessions of the same user.
//!
//! A session is eligible when it is open, available and has a non-negative
//! priority. Among eligible sessions the preferred one has the highest
//! priority, then the most eager `<show/>` (chat, available, away, xa, dnd),
//! then the most recent activity, then the smallest resource name.

use std::cmp::Ordering;

use crate::handler::{Handler, PresenceSnapshot};

struct Candidate {
    resource: String,
    presence: PresenceSnapshot,
    handler: Handler,
}

fn eligible(candidates: Vec<(String, Handler)>) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|(_, handler)| !handler.is_closed())
        .map(|(resource, handler)| Candidate {
            presence: handler.presence(),
            resource,
            handler,
        })
        .filter(|c| c.presence.available && c.presence.priority >= 0)
        .collect()
}

/// `Less` means `a` is preferred over `b`.
fn preference(a: &Candidate, b: &Candidate) -> Ordering {
    b.presence
        .priority
        .cmp(&a.presence.priority)
        .then_with(|| a.presence.show.rank().cmp(&b.presence.show.rank()))
        .then_with(|| b.presence.last_active.cmp(&a.presence.last_active))
        .then_with(|| a.resource.cmp(&b.resource))
}

/// The single preferred session, if any is eligible.
pub(crate) fn best_session(candidates: Vec<(String, Handler)>) -> Option<Handler> {
    eligible(candidates)
        .into_iter()
        .min_by(preference)
        .map(|c| c.handler)
}

/// Every eligible session sharing the highest priority, in preference order.
pub(crate) fn highest_priority_sessions(candidates: Vec<(String, Handler)>) -> Vec<Handler> {
    let mut eligible = eligible(candidates);
    let Some(highest) = eligible.iter().map(|c| c.presence.priority).max() else {
        return Vec::new();
    };
    eligible.retain(|c| c.presence.priority == highest);
    eligible.sort_by(preference);
    eligible.into_iter().map(|c| c.handler).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::handler::{same_handler, LocalSession, RouteHandler};
    use crate::stanza::OutboundStanza;
    use crate::types::PresenceShow;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn session(
        resource: &str,
        available: bool,
        priority: i8,
        show: PresenceShow,
    ) -> (Arc<LocalSession>, mpsc::Receiver<OutboundStanza>) {
        let (tx, rx) = mpsc::channel(4);
        let session = Arc::new(LocalSession::new(
            Address::full("example.com", "alice", resource),
            tx,
        ));
        session.update_presence(available, priority, show);
        (session, rx)
    }

    fn candidates(sessions: &[&Arc<LocalSession>]) -> Vec<(String, Handler)> {
        sessions
            .iter()
            .map(|s| {
                let resource = s.address().resource().unwrap_or_default().to_string();
                (resource, Arc::clone(s) as Handler)
            })
            .collect()
    }

    #[test]
    fn test_highest_priority_wins() {
        let (low, _low_rx) = session("low", true, 1, PresenceShow::Chat);
        let (high, _high_rx) = session("high", true, 5, PresenceShow::Dnd);

        let best = best_session(candidates(&[&low, &high])).unwrap();
        assert!(same_handler(&best, &(high as Handler)));
    }

    #[test]
    fn test_show_breaks_priority_tie() {
        let (away, _away_rx) = session("away", true, 1, PresenceShow::Away);
        let (chat, _chat_rx) = session("chat", true, 1, PresenceShow::Chat);

        let best = best_session(candidates(&[&away, &chat])).unwrap();
        assert!(same_handler(&best, &(chat as Handler)));
    }

    #[test]
    fn test_recent_activity_breaks_show_tie() {
        let (older, _older_rx) = session("older", true, 1, PresenceShow::Available);
        let (newer, _newer_rx) = session("newer", true, 1, PresenceShow::Available);
        older.mark_active_at(Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap());
        newer.mark_active_at(Utc.with_ymd_and_hms(2026, 1, 1, 11, 0, 0).unwrap());

        let best = best_session(candidates(&[&older, &newer])).unwrap();
        assert!(same_handler(&best, &(newer as Handler)));
    }

    #[test]
    fn test_resource_name_is_final_tie_break() {
        let (b, _b_rx) = session("b", true, 0, PresenceShow::Available);
        let (a, _a_rx) = session("a", true, 0, PresenceShow::Available);

        let best = best_session(candidates(&[&b, &a])).unwrap();
        assert!(same_handler(&best, &(a as Handler)));
    }

    #[test]
    fn test_ineligible_sessions() {
        let (offline, _offline_rx) = session("offline", false, 10, PresenceShow::Chat);
        let (negative, _negative_rx) = session("negative", true, -1, PresenceShow::Chat);
        let (closed, closed_rx) = session("closed", true, 10, PresenceShow::Chat);
        drop(closed_rx);

        let all = candidates(&[&offline, &negative, &closed]);
        assert!(best_session(all.clone()).is_none());
        assert!(highest_priority_sessions(all).is_empty());
    }

    #[test]
    fn test_highest_priority_sessions() {
        let (a, _a_rx) = session("a", true, 3, PresenceShow::Away);
        let (b, _b_rx) = session("b", true, 3, PresenceShow::Chat);
        let (c, _c_rx) = session("c", true, 1, PresenceShow::Chat);

        let sessions = highest_priority_sessions(candidates(&[&a, &b, &c]));
        assert_eq!(sessions.len(), 2);
        assert!(same_handler(&sessions[0], &(b as Handler)));
        assert!(same_handler(&sessions[1], &(a as Handler)));
    }
}
