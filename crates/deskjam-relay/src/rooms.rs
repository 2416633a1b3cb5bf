//! Room registry and per-connection protocol handling.

use dashmap::DashMap;
use deskjam_core::sync::{ClientMessage, ServerMessage, base64_encode};
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::info;

const CHANNEL_CAPACITY: usize = 256;

/// A message tagged with the peer that sent it.
pub type RoomMessage = (String, ServerMessage);

struct Room {
    tx: broadcast::Sender<RoomMessage>,
    peers: HashSet<String>,
    /// Last sync payload, handed to new joiners.
    last_sync: Option<String>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            peers: HashSet::new(),
            last_sync: None,
        }
    }
}

/// Shared application state.
#[derive(Default)]
pub struct AppState {
    rooms: DashMap<String, Room>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Returns its feed, the room's last sync and the peer count.
    pub fn join_room(&self, room_id: &str, peer_id: &str) -> (broadcast::Receiver<RoomMessage>, Option<String>, usize) {
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        room.peers.insert(peer_id.to_string());
        (room.tx.subscribe(), room.last_sync.clone(), room.peers.len())
    }

    /// Remove a peer and drop the room once it is empty.
    pub fn leave_room(&self, room_id: &str, peer_id: &str) {
        let now_empty = match self.rooms.get_mut(room_id) {
            Some(mut room) => {
                room.peers.remove(peer_id);
                room.peers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove(room_id);
            info!("Room {} closed", room_id);
        }
    }

    pub fn update_sync(&self, room_id: &str, data: String) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.last_sync = Some(data);
        }
    }

    pub fn broadcast(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            // No receivers is fine.
            let _ = room.tx.send((from.to_string(), msg));
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |r| r.peers.len())
    }
}

/// One client connection's view of the relay.
pub struct Session {
    peer_id: String,
    room: Option<String>,
    feed: Option<broadcast::Receiver<RoomMessage>>,
}

impl Session {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            room: None,
            feed: None,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn feed_mut(&mut self) -> Option<&mut broadcast::Receiver<RoomMessage>> {
        self.feed.as_mut()
    }

    /// Apply a client message. Returns the replies for this client only.
    pub fn handle(&mut self, state: &AppState, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::Join { room } => {
                self.leave(state);
                let (rx, initial_sync, peer_count) = state.join_room(&room, &self.peer_id);
                self.feed = Some(rx);
                self.room = Some(room.clone());
                state.broadcast(
                    &room,
                    &self.peer_id,
                    ServerMessage::PeerJoined {
                        peer_id: self.peer_id.clone(),
                    },
                );
                info!("Peer {} joined room {}", self.peer_id, room);
                vec![ServerMessage::Joined {
                    room,
                    peer_count,
                    initial_sync,
                }]
            }
            ClientMessage::Leave => {
                self.leave(state);
                Vec::new()
            }
            ClientMessage::Sync { data } => {
                self.relay_sync(state, data);
                Vec::new()
            }
            ClientMessage::Awareness { peer_id, state: presence } => {
                if let Some(room) = &self.room {
                    state.broadcast(
                        room,
                        &self.peer_id,
                        ServerMessage::Awareness {
                            from: self.peer_id.clone(),
                            peer_id,
                            state: presence,
                        },
                    );
                }
                Vec::new()
            }
        }
    }

    /// Parse and apply a text frame. Bad input yields an error reply.
    pub fn handle_text(&mut self, state: &AppState, text: &str) -> Vec<ServerMessage> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.handle(state, msg),
            Err(e) => {
                tracing::warn!("Invalid message from {}: {}", self.peer_id, e);
                vec![ServerMessage::Error {
                    message: format!("Invalid message: {}", e),
                }]
            }
        }
    }

    /// Binary frames carry raw sync bytes.
    pub fn handle_binary(&mut self, state: &AppState, data: &[u8]) {
        self.relay_sync(state, base64_encode(data));
    }

    fn relay_sync(&self, state: &AppState, data: String) {
        if let Some(room) = &self.room {
            state.update_sync(room, data.clone());
            state.broadcast(
                room,
                &self.peer_id,
                ServerMessage::Sync {
                    from: self.peer_id.clone(),
                    data,
                },
            );
        }
    }

    /// Whether a room message should be forwarded to this client.
    pub fn accepts(&self, from: &str) -> bool {
        from != self.peer_id
    }

    pub fn leave(&mut self, state: &AppState) {
        self.feed = None;
        if let Some(room) = self.room.take() {
            state.leave_room(&room, &self.peer_id);
            state.broadcast(
                &room,
                &self.peer_id,
                ServerMessage::PeerLeft {
                    peer_id: self.peer_id.clone(),
                },
            );
            info!("Peer {} left room {}", self.peer_id, room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskjam_core::presence::{CursorPosition, Presence};

    fn join(state: &AppState, peer: &str, room: &str) -> (Session, Vec<ServerMessage>) {
        let mut session = Session::new(peer);
        let replies = session.handle(state, ClientMessage::Join { room: room.into() });
        (session, replies)
    }

    /// Messages from others waiting in a session's feed.
    fn received(session: &mut Session) -> Vec<ServerMessage> {
        let peer = session.peer_id().to_string();
        let mut out = Vec::new();
        if let Some(feed) = session.feed_mut() {
            while let Ok((from, msg)) = feed.try_recv() {
                if from != peer {
                    out.push(msg);
                }
            }
        }
        out
    }

    #[test]
    fn test_join_reports_peer_count_and_last_sync() {
        let state = AppState::new();
        let (mut a, replies) = join(&state, "a", "room");
        assert_eq!(
            replies,
            vec![ServerMessage::Joined {
                room: "room".into(),
                peer_count: 1,
                initial_sync: None
            }]
        );
        a.handle(&state, ClientMessage::Sync { data: "AAEC".into() });

        let (_b, replies) = join(&state, "b", "room");
        assert_eq!(
            replies,
            vec![ServerMessage::Joined {
                room: "room".into(),
                peer_count: 2,
                initial_sync: Some("AAEC".into())
            }]
        );
        assert_eq!(
            received(&mut a),
            vec![ServerMessage::PeerJoined { peer_id: "b".into() }]
        );
    }

    #[test]
    fn test_sync_is_not_echoed_to_sender() {
        let state = AppState::new();
        let (mut a, _) = join(&state, "a", "room");
        let (mut b, _) = join(&state, "b", "room");
        received(&mut a);

        a.handle(&state, ClientMessage::Sync { data: "Zm9v".into() });
        assert!(received(&mut a).is_empty());
        assert_eq!(
            received(&mut b),
            vec![ServerMessage::Sync {
                from: "a".into(),
                data: "Zm9v".into()
            }]
        );
    }

    #[test]
    fn test_awareness_is_relayed_with_sender() {
        let state = AppState::new();
        let (mut a, _) = join(&state, "a", "room");
        let (mut b, _) = join(&state, "b", "room");
        let presence = Presence {
            cursor: Some(CursorPosition::new(3.0, 4.0)),
            ..Presence::default()
        };
        a.handle(
            &state,
            ClientMessage::Awareness {
                peer_id: 7,
                state: presence.clone(),
            },
        );
        assert_eq!(
            received(&mut b),
            vec![ServerMessage::Awareness {
                from: "a".into(),
                peer_id: 7,
                state: presence
            }]
        );
    }

    #[test]
    fn test_empty_rooms_are_dropped() {
        let state = AppState::new();
        let (mut a, _) = join(&state, "a", "room");
        let (mut b, _) = join(&state, "b", "room");
        a.leave(&state);
        assert_eq!(state.peer_count("room"), 1);
        assert_eq!(
            received(&mut b),
            vec![ServerMessage::PeerLeft { peer_id: "a".into() }]
        );
        b.handle(&state, ClientMessage::Leave);
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn test_rejoin_moves_between_rooms() {
        let state = AppState::new();
        let (mut a, _) = join(&state, "a", "one");
        a.handle(&state, ClientMessage::Join { room: "two".into() });
        assert_eq!(a.room(), Some("two"));
        assert_eq!(state.peer_count("one"), 0);
        assert_eq!(state.peer_count("two"), 1);
    }

    #[test]
    fn test_invalid_text_yields_error() {
        let state = AppState::new();
        let mut session = Session::new("a");
        let replies = session.handle_text(&state, "{\"type\":\"dance\"}");
        assert!(matches!(replies.as_slice(), [ServerMessage::Error { .. }]));
    }

    #[test]
    fn test_binary_frames_become_sync() {
        let state = AppState::new();
        let (mut a, _) = join(&state, "a", "room");
        let (mut b, _) = join(&state, "b", "room");
        received(&mut a);
        a.handle_binary(&state, &[1, 2, 3]);
        assert_eq!(
            received(&mut b),
            vec![ServerMessage::Sync {
                from: "a".into(),
                data: base64_encode(&[1, 2, 3])
            }]
        );
    }
}
