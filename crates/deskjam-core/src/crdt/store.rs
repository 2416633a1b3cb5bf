//! `SharedStore` backed by a Loro document.

use super::schema::{CrdtDocument, crdt_error};
use crate::presence::{PeerPresence, Presence};
use crate::store::{
    ConnectionId, ConnectionState, MapOp, SharedStore, Snapshot, StoreError, StoreResult,
    Subscribers, Subscription, lock_error, subscribe_shared,
};
use crate::sync::{ClientMessage, base64_encode};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

struct LoroInner {
    doc: CrdtDocument,
    connection: ConnectionState,
    presence: Option<Presence>,
    /// Remote presence keyed by the relay's peer id.
    peers: BTreeMap<String, PeerPresence>,
    outgoing: Vec<ClientMessage>,
}

impl LoroInner {
    fn snapshot(&self, map: &str) -> Option<Snapshot> {
        self.doc.is_initialized(map).then(|| Snapshot {
            map: map.to_string(),
            entries: self.doc.entries(map),
        })
    }

    /// Queue the full document for broadcast, replacing any older queued sync.
    fn queue_sync(&mut self) -> StoreResult<()> {
        let data = base64_encode(&self.doc.export_snapshot()?);
        self.outgoing.retain(|m| !matches!(m, ClientMessage::Sync { .. }));
        self.outgoing.push(ClientMessage::Sync { data });
        Ok(())
    }

    fn queue_awareness(&mut self) {
        let state = self.presence.clone().unwrap_or_default();
        self.outgoing.retain(|m| !matches!(m, ClientMessage::Awareness { .. }));
        self.outgoing.push(ClientMessage::Awareness {
            peer_id: self.doc.peer_id(),
            state,
        });
    }
}

/// A local-first store: writes always land in the local Loro document and are
/// queued for the relay; remote bytes are merged with [`LoroStore::import`].
pub struct LoroStore {
    inner: Mutex<LoroInner>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl Default for LoroStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LoroStore {
    pub fn new() -> Self {
        Self::from_document(CrdtDocument::new())
    }

    pub fn from_document(doc: CrdtDocument) -> Self {
        Self {
            inner: Mutex::new(LoroInner {
                doc,
                connection: ConnectionState::Disconnected,
                presence: None,
                peers: BTreeMap::new(),
                outgoing: Vec::new(),
            }),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    pub fn set_connection_state(&self, state: ConnectionState) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(lock_error)?;
        if inner.connection != state {
            log::info!("Loro store connection: {:?} -> {:?}", inner.connection, state);
        }
        inner.connection = state;
        if state != ConnectionState::Connected {
            inner.peers.clear();
        }
        Ok(())
    }

    /// Merge remote updates and notify subscribers of every initialized map.
    pub fn import(&self, bytes: &[u8]) -> StoreResult<()> {
        let snapshots: Vec<Snapshot> = {
            let mut inner = self.inner.lock().map_err(lock_error)?;
            inner.doc.import(bytes).map_err(crdt_error)?;
            inner
                .doc
                .initialized_maps()
                .iter()
                .filter_map(|map| inner.snapshot(map))
                .collect()
        };
        log::debug!("Imported {} bytes, {} maps changed", bytes.len(), snapshots.len());
        self.notify(&snapshots)
    }

    pub fn export_snapshot(&self) -> StoreResult<Vec<u8>> {
        self.inner.lock().map_err(lock_error)?.doc.export_snapshot()
    }

    /// Queue the whole document for broadcast.
    pub fn queue_full_sync(&self) -> StoreResult<()> {
        self.inner.lock().map_err(lock_error)?.queue_sync()
    }

    /// Queue this connection's presence for broadcast again.
    pub fn queue_presence(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(lock_error)?;
        if inner.presence.is_some() {
            inner.queue_awareness();
        }
        Ok(())
    }

    /// Drain messages waiting for the relay.
    pub fn take_outgoing(&self) -> Vec<ClientMessage> {
        self.inner
            .lock()
            .map(|mut inner| std::mem::take(&mut inner.outgoing))
            .unwrap_or_default()
    }

    /// Record a peer's presence as relayed from `from`.
    pub fn apply_awareness(&self, from: &str, peer_id: u64, presence: Presence) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(lock_error)?;
        inner.peers.insert(
            from.to_string(),
            PeerPresence {
                connection_id: ConnectionId(peer_id),
                presence,
            },
        );
        Ok(())
    }

    pub fn remove_peer(&self, from: &str) -> StoreResult<()> {
        self.inner.lock().map_err(lock_error)?.peers.remove(from);
        Ok(())
    }

    fn notify(&self, snapshots: &[Snapshot]) -> StoreResult<()> {
        let mut subscribers = self.subscribers.lock().map_err(lock_error)?;
        for snapshot in snapshots {
            subscribers.notify(snapshot);
        }
        Ok(())
    }
}

impl SharedStore for LoroStore {
    fn connection_id(&self) -> ConnectionId {
        self.inner
            .lock()
            .map(|inner| ConnectionId(inner.doc.peer_id()))
            .unwrap_or(ConnectionId(0))
    }

    fn status(&self) -> ConnectionState {
        self.inner
            .lock()
            .map(|inner| inner.connection)
            .unwrap_or(ConnectionState::Error)
    }

    fn read(&self, map: &str) -> StoreResult<Option<Snapshot>> {
        Ok(self.inner.lock().map_err(lock_error)?.snapshot(map))
    }

    fn ensure_map(&self, map: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(lock_error)?;
        if inner.doc.is_initialized(map) {
            return Ok(());
        }
        inner.doc.initialize(map).map_err(crdt_error)?;
        inner.queue_sync()
    }

    fn transact(&self, map: &str, ops: Vec<MapOp>) -> StoreResult<()> {
        let snapshot = {
            let mut inner = self.inner.lock().map_err(lock_error)?;
            if !inner.doc.is_initialized(map) {
                return Err(StoreError::MissingMap(map.to_string()));
            }
            inner.doc.apply(map, ops)?;
            inner.queue_sync()?;
            inner.snapshot(map)
        };
        match snapshot {
            Some(snapshot) => self.notify(&[snapshot]),
            None => Ok(()),
        }
    }

    fn subscribe(&self, map: &str) -> StoreResult<Subscription> {
        subscribe_shared(&self.subscribers, map)
    }

    fn set_presence(&self, presence: &Presence) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(lock_error)?;
        inner.presence = Some(presence.clone());
        inner.queue_awareness();
        Ok(())
    }

    fn clear_presence(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(lock_error)?;
        if inner.presence.take().is_some() {
            inner.queue_awareness();
        }
        Ok(())
    }

    fn others(&self) -> Vec<PeerPresence> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .peers
                    .values()
                    .filter(|p| p.presence != Presence::default())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
