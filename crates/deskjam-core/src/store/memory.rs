//! In-process room shared by several connections.

use super::{
    ConnectionId, ConnectionState, MapOp, SharedStore, Snapshot, StoreError, StoreResult,
    Subscribers, Subscription, apply_ops, lock_error, subscribe_shared,
};
use crate::attrs::AttributeBag;
use crate::presence::{PeerPresence, Presence};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

struct ConnectionEntry {
    online: bool,
    presence: Option<Presence>,
    subscribers: Arc<Mutex<Subscribers>>,
}

#[derive(Default)]
struct RoomState {
    maps: HashMap<String, BTreeMap<String, AttributeBag>>,
    connections: BTreeMap<ConnectionId, ConnectionEntry>,
    next_connection: u64,
}

impl RoomState {
    fn snapshot(&self, map: &str) -> Option<Snapshot> {
        self.maps.get(map).map(|entries| Snapshot {
            map: map.to_string(),
            entries: entries.clone(),
        })
    }

    fn entry(&self, id: ConnectionId) -> StoreResult<&ConnectionEntry> {
        match self.connections.get(&id) {
            Some(entry) if entry.online => Ok(entry),
            _ => Err(StoreError::Disconnected),
        }
    }

    /// Deliver a map's snapshot to every online connection, the writer included.
    fn broadcast(&self, map: &str) -> StoreResult<()> {
        let Some(snapshot) = self.snapshot(map) else {
            return Ok(());
        };
        for entry in self.connections.values().filter(|e| e.online) {
            entry.subscribers.lock().map_err(lock_error)?.notify(&snapshot);
        }
        Ok(())
    }
}

/// An in-process room. Cloning yields another handle to the same room.
#[derive(Clone, Default)]
pub struct MemoryRoom {
    state: Arc<Mutex<RoomState>>,
}

impl MemoryRoom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new online connection to this room.
    pub fn connect(&self) -> StoreResult<MemoryConnection> {
        let mut state = self.state.lock().map_err(lock_error)?;
        state.next_connection += 1;
        let id = ConnectionId(state.next_connection);
        state.connections.insert(
            id,
            ConnectionEntry {
                online: true,
                presence: None,
                subscribers: Arc::new(Mutex::new(Subscribers::default())),
            },
        );
        log::info!("Connection {} joined memory room", id);
        Ok(MemoryConnection {
            room: self.clone(),
            id,
        })
    }

    /// Current contents of a map as the room sees it.
    pub fn snapshot(&self, map: &str) -> Option<Snapshot> {
        self.state.lock().ok()?.snapshot(map)
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().map(|s| s.connections.len()).unwrap_or(0)
    }
}

/// One connection to a [`MemoryRoom`].
pub struct MemoryConnection {
    room: MemoryRoom,
    id: ConnectionId,
}

impl MemoryConnection {
    /// Take the connection offline or bring it back.
    ///
    /// While offline, writes fail and nothing is delivered. Coming back online
    /// delivers the current snapshot of every subscribed map.
    pub fn set_online(&self, online: bool) -> StoreResult<()> {
        let mut state = self.room.state.lock().map_err(lock_error)?;
        let entry = state
            .connections
            .get_mut(&self.id)
            .ok_or(StoreError::Disconnected)?;
        if entry.online == online {
            return Ok(());
        }
        entry.online = online;
        if !online {
            entry.presence = None;
            log::info!("Connection {} went offline", self.id);
            return Ok(());
        }

        log::info!("Connection {} back online", self.id);
        let subscribers = entry.subscribers.clone();
        let mut subs = subscribers.lock().map_err(lock_error)?;
        for map in subs.maps() {
            if let Some(snapshot) = state.snapshot(&map) {
                subs.notify(&snapshot);
            }
        }
        Ok(())
    }

    pub fn is_online(&self) -> bool {
        self.status() == ConnectionState::Connected
    }
}

impl SharedStore for MemoryConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn status(&self) -> ConnectionState {
        let online = self
            .room
            .state
            .lock()
            .ok()
            .and_then(|s| s.connections.get(&self.id).map(|e| e.online))
            .unwrap_or(false);
        if online {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn read(&self, map: &str) -> StoreResult<Option<Snapshot>> {
        let state = self.room.state.lock().map_err(lock_error)?;
        state.entry(self.id)?;
        Ok(state.snapshot(map))
    }

    fn ensure_map(&self, map: &str) -> StoreResult<()> {
        let mut state = self.room.state.lock().map_err(lock_error)?;
        state.entry(self.id)?;
        state.maps.entry(map.to_string()).or_default();
        Ok(())
    }

    fn transact(&self, map: &str, ops: Vec<MapOp>) -> StoreResult<()> {
        let mut state = self.room.state.lock().map_err(lock_error)?;
        state.entry(self.id)?;
        let entries = state
            .maps
            .get_mut(map)
            .ok_or_else(|| StoreError::MissingMap(map.to_string()))?;
        apply_ops(entries, ops);
        state.broadcast(map)
    }

    fn subscribe(&self, map: &str) -> StoreResult<Subscription> {
        let subscribers = {
            let state = self.room.state.lock().map_err(lock_error)?;
            state
                .connections
                .get(&self.id)
                .map(|e| e.subscribers.clone())
                .ok_or(StoreError::Disconnected)?
        };
        subscribe_shared(&subscribers, map)
    }

    fn set_presence(&self, presence: &Presence) -> StoreResult<()> {
        let mut state = self.room.state.lock().map_err(lock_error)?;
        match state.connections.get_mut(&self.id) {
            Some(entry) if entry.online => {
                entry.presence = Some(presence.clone());
                Ok(())
            }
            _ => Err(StoreError::Disconnected),
        }
    }

    fn clear_presence(&self) -> StoreResult<()> {
        let mut state = self.room.state.lock().map_err(lock_error)?;
        if let Some(entry) = state.connections.get_mut(&self.id) {
            entry.presence = None;
        }
        Ok(())
    }

    fn others(&self) -> Vec<PeerPresence> {
        let Ok(state) = self.room.state.lock() else {
            return Vec::new();
        };
        if state.entry(self.id).is_err() {
            return Vec::new();
        }
        state
            .connections
            .iter()
            .filter(|(id, entry)| **id != self.id && entry.online)
            .filter_map(|(id, entry)| {
                entry.presence.clone().map(|presence| PeerPresence {
                    connection_id: *id,
                    presence,
                })
            })
            .collect()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if let Ok(mut state) = self.room.state.lock() {
            state.connections.remove(&self.id);
        }
        log::info!("Connection {} left memory room", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::CursorPosition;
    use serde_json::json;

    fn set(key: &str, x: i64) -> MapOp {
        let mut bag = AttributeBag::new();
        bag.insert("x".into(), json!(x));
        MapOp::Set {
            key: key.into(),
            bag,
        }
    }

    #[test]
    fn test_absent_map_reads_none() {
        let room = MemoryRoom::new();
        let conn = room.connect().expect("connect");
        assert_eq!(conn.read("canvasObjects").expect("read"), None);
        conn.ensure_map("canvasObjects").expect("ensure");
        let snapshot = conn.read("canvasObjects").expect("read").expect("map");
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_transact_requires_map() {
        let room = MemoryRoom::new();
        let conn = room.connect().expect("connect");
        assert!(matches!(
            conn.transact("m", vec![set("a", 1)]),
            Err(StoreError::MissingMap(_))
        ));
    }

    #[test]
    fn test_transact_echoes_to_all_subscribers() {
        let room = MemoryRoom::new();
        let a = room.connect().expect("connect");
        let b = room.connect().expect("connect");
        a.ensure_map("m").expect("ensure");
        let sub_a = a.subscribe("m").expect("subscribe");
        let sub_b = b.subscribe("m").expect("subscribe");

        a.transact("m", vec![MapOp::Clear, set("r1", 10)]).expect("transact");

        let seen_a = sub_a.try_latest().expect("echo");
        let seen_b = sub_b.try_latest().expect("delivery");
        assert_eq!(seen_a, seen_b);
        assert_eq!(seen_b.entries["r1"]["x"], json!(10));
    }

    #[test]
    fn test_offline_connection_fails_and_catches_up() {
        let room = MemoryRoom::new();
        let a = room.connect().expect("connect");
        let b = room.connect().expect("connect");
        a.ensure_map("m").expect("ensure");
        let sub_b = b.subscribe("m").expect("subscribe");

        b.set_online(false).expect("offline");
        assert_eq!(b.status(), ConnectionState::Disconnected);
        assert!(matches!(b.transact("m", vec![set("x", 1)]), Err(StoreError::Disconnected)));

        a.transact("m", vec![set("r1", 1)]).expect("transact");
        assert!(sub_b.try_latest().is_none());

        b.set_online(true).expect("online");
        let caught_up = sub_b.try_latest().expect("catch-up snapshot");
        assert!(caught_up.entries.contains_key("r1"));
    }

    #[test]
    fn test_presence_roster() {
        let room = MemoryRoom::new();
        let a = room.connect().expect("connect");
        let b = room.connect().expect("connect");
        let presence = Presence {
            cursor: Some(CursorPosition::new(3.0, 4.0)),
            ..Presence::default()
        };
        b.set_presence(&presence).expect("presence");

        let others = a.others();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].connection_id, b.connection_id());
        assert_eq!(others[0].presence, presence);
        assert!(b.others().is_empty());

        drop(b);
        assert!(a.others().is_empty());
        assert_eq!(room.connection_count(), 1);
    }

    #[test]
    fn test_going_offline_hides_presence() {
        let room = MemoryRoom::new();
        let a = room.connect().expect("connect");
        let b = room.connect().expect("connect");
        b.set_presence(&Presence::default()).expect("presence");
        b.set_online(false).expect("offline");
        assert!(a.others().is_empty());
        assert!(b.set_presence(&Presence::default()).is_err());
    }
}
