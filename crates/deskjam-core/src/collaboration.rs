//! Collaboration session: a [`LoroStore`] kept in sync through the relay.

use crate::crdt::LoroStore;
use crate::store::{ConnectionState, StoreResult};
use crate::sync::{ClientMessage, NativeWebSocket, ServerMessage, SyncEvent};
use std::sync::Arc;

/// Joins a shared [`LoroStore`] to a relay room.
///
/// The host calls [`CollaborationSession::pump`] from its event loop, alongside the
/// adapter's `poll`.
pub struct CollaborationSession {
    store: Arc<LoroStore>,
    socket: NativeWebSocket,
    room: String,
    joined: Option<String>,
}

impl CollaborationSession {
    pub fn new(store: Arc<LoroStore>, room: impl Into<String>) -> Self {
        Self {
            store,
            socket: NativeWebSocket::new(),
            room: room.into(),
            joined: None,
        }
    }

    pub fn store(&self) -> &Arc<LoroStore> {
        &self.store
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// The room the relay confirmed, if any.
    pub fn joined_room(&self) -> Option<&str> {
        self.joined.as_deref()
    }

    /// Start connecting to the relay. The join is sent once the socket opens.
    pub fn connect(&mut self, url: &str) -> Result<(), String> {
        self.socket.connect(url)?;
        self.store
            .set_connection_state(ConnectionState::Connecting)
            .map_err(|e| e.to_string())
    }

    /// Apply incoming events, then flush queued messages to the relay.
    pub fn pump(&mut self) -> StoreResult<()> {
        let events = self.socket.poll_events();
        for reply in self.handle_events(events) {
            if let Err(e) = self.socket.send_message(&reply) {
                log::warn!("Failed to send {:?}: {}", reply, e);
            }
        }
        if self.joined.is_none() {
            return Ok(());
        }
        for msg in self.store.take_outgoing() {
            if let Err(e) = self.socket.send_message(&msg) {
                log::warn!("Failed to flush outgoing message: {}", e);
                break;
            }
        }
        Ok(())
    }

    /// Apply a batch of relay events. An event that fails is logged and skipped.
    pub fn handle_events(&mut self, events: impl IntoIterator<Item = SyncEvent>) -> Vec<ClientMessage> {
        let mut replies = Vec::new();
        for event in events {
            match self.handle_event(event) {
                Ok(mut more) => replies.append(&mut more),
                Err(e) => log::warn!("Skipping relay event: {}", e),
            }
        }
        replies
    }

    /// Apply one relay event to the store. Returns messages to send back.
    pub fn handle_event(&mut self, event: SyncEvent) -> StoreResult<Vec<ClientMessage>> {
        match event {
            SyncEvent::Connected => {
                log::info!("Connected to relay, joining {}", self.room);
                return Ok(vec![ClientMessage::Join {
                    room: self.room.clone(),
                }]);
            }
            SyncEvent::JoinedRoom {
                room,
                peer_count,
                initial_sync,
            } => {
                log::info!("Joined room {} with {} peers", room, peer_count);
                if let Some(bytes) = initial_sync {
                    self.store.import(&bytes)?;
                }
                self.joined = Some(room);
                self.store.set_connection_state(ConnectionState::Connected)?;
                // Publish edits made while offline and re-announce presence.
                self.store.queue_full_sync()?;
                self.store.queue_presence()?;
            }
            SyncEvent::SyncReceived { from, data } => {
                log::debug!("Sync from {} ({} bytes)", from, data.len());
                self.store.import(&data)?;
            }
            SyncEvent::AwarenessReceived {
                from,
                peer_id,
                state,
            } => {
                self.store.apply_awareness(&from, peer_id, state)?;
            }
            SyncEvent::PeerJoined { peer_id } => {
                log::info!("Peer {} joined", peer_id);
                // The relay only holds the last payload it saw, which may lack our edits.
                self.store.queue_full_sync()?;
                self.store.queue_presence()?;
            }
            SyncEvent::PeerLeft { peer_id } => {
                log::info!("Peer {} left", peer_id);
                self.store.remove_peer(&peer_id)?;
            }
            SyncEvent::Disconnected => {
                log::info!("Disconnected from relay");
                self.joined = None;
                self.store.set_connection_state(ConnectionState::Disconnected)?;
            }
            SyncEvent::Error { message } => {
                log::warn!("Relay error: {}", message);
                self.joined = None;
                self.store.set_connection_state(ConnectionState::Error)?;
            }
        }
        Ok(Vec::new())
    }

    /// Decode and apply a raw server message.
    pub fn handle_message(&mut self, json: &str) -> StoreResult<Vec<ClientMessage>> {
        let msg: ServerMessage = serde_json::from_str(json)?;
        match SyncEvent::from_server_message(msg) {
            Some(event) => self.handle_event(event),
            None => Ok(Vec::new()),
        }
    }

    /// Leave the room and close the socket.
    pub fn disconnect(&mut self) {
        if self.joined.take().is_some() {
            let _ = self.socket.send_message(&ClientMessage::Leave);
        }
        self.socket.disconnect();
        if let Err(e) = self.store.set_connection_state(ConnectionState::Disconnected) {
            log::warn!("Failed to mark store disconnected: {}", e);
        }
    }
}

impl Drop for CollaborationSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{CursorPosition, Presence};
    use crate::store::{MapOp, SharedStore};
    use crate::sync::base64_encode;
    use serde_json::json;

    fn session() -> CollaborationSession {
        CollaborationSession::new(Arc::new(LoroStore::new()), "design-desk-jam")
    }

    #[test]
    fn test_connected_requests_join() {
        let mut session = session();
        let replies = session.handle_event(SyncEvent::Connected).expect("event");
        assert_eq!(
            replies,
            vec![ClientMessage::Join {
                room: "design-desk-jam".into()
            }]
        );
    }

    #[test]
    fn test_join_imports_initial_state() {
        let remote = LoroStore::new();
        remote.ensure_map("canvasObjects").expect("ensure");
        let mut bag = crate::attrs::AttributeBag::new();
        bag.insert("type".into(), json!("circle"));
        remote
            .transact("canvasObjects", vec![MapOp::Set { key: "c1".into(), bag }])
            .expect("transact");
        let bytes = remote.export_snapshot().expect("export");

        let mut session = session();
        session
            .handle_event(SyncEvent::JoinedRoom {
                room: "design-desk-jam".into(),
                peer_count: 1,
                initial_sync: Some(bytes),
            })
            .expect("event");

        assert_eq!(session.joined_room(), Some("design-desk-jam"));
        assert_eq!(session.store().status(), ConnectionState::Connected);
        let snapshot = session.store().read("canvasObjects").expect("read").expect("map");
        assert!(snapshot.entries.contains_key("c1"));
    }

    #[test]
    fn test_handle_message_routes_awareness_and_leave() {
        let mut session = session();
        session
            .handle_event(SyncEvent::JoinedRoom {
                room: "r".into(),
                peer_count: 1,
                initial_sync: None,
            })
            .expect("join");
        let json = r#"{"type":"awareness","from":"p1","peer_id":9,"cursor":{"x":1.0,"y":2.0}}"#;
        session.handle_message(json).expect("awareness");

        let others = session.store().others();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].presence.cursor, Some(CursorPosition::new(1.0, 2.0)));

        session
            .handle_message(r#"{"type":"peer_left","peer_id":"p1"}"#)
            .expect("left");
        assert!(session.store().others().is_empty());
    }

    #[test]
    fn test_sync_message_imports() {
        let remote = LoroStore::new();
        remote.ensure_map("m").expect("ensure");
        let data = base64_encode(&remote.export_snapshot().expect("export"));

        let mut session = session();
        let msg = serde_json::to_string(&ServerMessage::Sync {
            from: "p2".into(),
            data,
        })
        .expect("encode");
        session.handle_message(&msg).expect("sync");
        assert!(session.store().read("m").expect("read").is_some());
    }

    #[test]
    fn test_join_requeues_presence() {
        let mut session = session();
        session
            .store()
            .set_presence(&Presence {
                message: Some("hi".into()),
                ..Presence::default()
            })
            .expect("presence");
        session.store().take_outgoing();

        session
            .handle_event(SyncEvent::JoinedRoom {
                room: "r".into(),
                peer_count: 2,
                initial_sync: None,
            })
            .expect("join");
        let outgoing = session.store().take_outgoing();
        assert!(outgoing.iter().any(|m| matches!(m, ClientMessage::Awareness { .. })));
        assert!(outgoing.iter().any(|m| matches!(m, ClientMessage::Sync { .. })));
    }

    #[test]
    fn test_peer_joined_resends_document() {
        let mut session = session();
        session
            .handle_event(SyncEvent::JoinedRoom {
                room: "r".into(),
                peer_count: 1,
                initial_sync: None,
            })
            .expect("join");
        session.store().take_outgoing();

        session
            .handle_event(SyncEvent::PeerJoined { peer_id: "p3".into() })
            .expect("peer joined");
        let outgoing = session.store().take_outgoing();
        assert!(outgoing.iter().any(|m| matches!(m, ClientMessage::Sync { .. })));
    }

    #[test]
    fn test_bad_sync_does_not_drop_later_events() {
        let mut session = session();
        session
            .handle_event(SyncEvent::JoinedRoom {
                room: "r".into(),
                peer_count: 2,
                initial_sync: None,
            })
            .expect("join");

        let replies = session.handle_events(vec![
            SyncEvent::SyncReceived {
                from: "p2".into(),
                data: b"junk".to_vec(),
            },
            SyncEvent::Disconnected,
        ]);
        assert!(replies.is_empty());
        assert_eq!(session.joined_room(), None);
        assert_eq!(session.store().status(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_event_resets_state() {
        let mut session = session();
        session
            .handle_event(SyncEvent::JoinedRoom {
                room: "r".into(),
                peer_count: 1,
                initial_sync: None,
            })
            .expect("join");
        session.handle_event(SyncEvent::Disconnected).expect("event");
        assert_eq!(session.joined_room(), None);
        assert_eq!(session.store().status(), ConnectionState::Disconnected);
    }
}
