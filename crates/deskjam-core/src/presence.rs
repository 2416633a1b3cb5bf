//! Ephemeral per-connection presence: cursor, active tool and user info.

use crate::store::ConnectionId;
use crate::tools::ToolKind;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Display colors handed out to peers by connection id.
pub const PEER_COLORS: [&str; 6] = ["#00fff7", "#ff00c8", "#ffe600", "#00ff5a", "#fff", "#000"];

/// Color assigned to a connection.
pub fn peer_color(connection: ConnectionId) -> &'static str {
    PEER_COLORS[(connection.0 % PEER_COLORS.len() as u64) as usize]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

impl CursorPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<kurbo::Point> for CursorPosition {
    fn from(point: kurbo::Point) -> Self {
        Self::new(point.x, point.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub color: String,
}

/// One connection's presence record. Each update replaces the previous one wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    /// Free-form chat bubble text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Presence of another connection in the same room.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerPresence {
    pub connection_id: ConnectionId,
    pub presence: Presence,
}

impl PeerPresence {
    /// The peer's own color if it announced one, otherwise its palette color.
    pub fn color(&self) -> &str {
        self.presence
            .user
            .as_ref()
            .map(|u| u.color.as_str())
            .unwrap_or_else(|| peer_color(self.connection_id))
    }
}

/// Rate-limits outgoing presence. Updates arriving too early are held, latest wins.
#[derive(Debug, Clone)]
pub struct PresenceThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
    pending: Option<Presence>,
}

impl PresenceThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            pending: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Offer an update. Returns it if it may be sent now; otherwise it becomes pending.
    pub fn offer(&mut self, presence: Presence) -> Option<Presence> {
        self.offer_at(presence, Instant::now())
    }

    pub fn offer_at(&mut self, presence: Presence, now: Instant) -> Option<Presence> {
        if self.is_open(now) {
            self.pending = None;
            self.last_sent = Some(now);
            Some(presence)
        } else {
            self.pending = Some(presence);
            None
        }
    }

    /// The pending update, once the interval has passed.
    pub fn take_due(&mut self) -> Option<Presence> {
        self.take_due_at(Instant::now())
    }

    pub fn take_due_at(&mut self, now: Instant) -> Option<Presence> {
        if self.pending.is_none() || !self.is_open(now) {
            return None;
        }
        self.last_sent = Some(now);
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any pending update and forget the last send time.
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_sent = None;
    }

    fn is_open(&self, now: Instant) -> bool {
        self.last_sent
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f64) -> Presence {
        Presence {
            cursor: Some(CursorPosition::new(x, 0.0)),
            ..Presence::default()
        }
    }

    #[test]
    fn test_first_update_passes() {
        let mut throttle = PresenceThrottle::new(Duration::from_millis(16));
        assert_eq!(throttle.offer_at(at(1.0), Instant::now()), Some(at(1.0)));
        assert!(!throttle.has_pending());
    }

    #[test]
    fn test_burst_keeps_latest_pending() {
        let start = Instant::now();
        let mut throttle = PresenceThrottle::new(Duration::from_millis(16));
        assert!(throttle.offer_at(at(1.0), start).is_some());
        assert!(throttle.offer_at(at(2.0), start + Duration::from_millis(4)).is_none());
        assert!(throttle.offer_at(at(3.0), start + Duration::from_millis(8)).is_none());

        assert_eq!(throttle.take_due_at(start + Duration::from_millis(10)), None);
        assert_eq!(throttle.take_due_at(start + Duration::from_millis(16)), Some(at(3.0)));
        assert_eq!(throttle.take_due_at(start + Duration::from_millis(40)), None);
    }

    #[test]
    fn test_zero_interval_never_holds() {
        let now = Instant::now();
        let mut throttle = PresenceThrottle::new(Duration::ZERO);
        assert!(throttle.offer_at(at(1.0), now).is_some());
        assert!(throttle.offer_at(at(2.0), now).is_some());
    }

    #[test]
    fn test_reset_drops_pending() {
        let now = Instant::now();
        let mut throttle = PresenceThrottle::new(Duration::from_secs(1));
        throttle.offer_at(at(1.0), now);
        throttle.offer_at(at(2.0), now);
        throttle.reset();
        assert!(!throttle.has_pending());
        assert!(throttle.offer_at(at(3.0), now).is_some());
    }

    #[test]
    fn test_peer_color_wraps() {
        assert_eq!(peer_color(ConnectionId(0)), "#00fff7");
        assert_eq!(peer_color(ConnectionId(7)), "#ff00c8");

        let named = PeerPresence {
            connection_id: ConnectionId(2),
            presence: Presence {
                user: Some(UserInfo {
                    name: "ada".into(),
                    color: "#123456".into(),
                }),
                ..Presence::default()
            },
        };
        assert_eq!(named.color(), "#123456");
    }

    #[test]
    fn test_presence_omits_empty_fields() {
        let json = serde_json::to_string(&at(4.0)).expect("serialize");
        assert_eq!(json, r#"{"cursor":{"x":4.0,"y":0.0}}"#);
    }
}
