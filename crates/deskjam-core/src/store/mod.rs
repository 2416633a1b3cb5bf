//! Shared-store abstraction: replicated maps of attribute bags plus presence.

mod memory;

pub use memory::{MemoryConnection, MemoryRoom};

use crate::attrs::AttributeBag;
use crate::presence::{PeerPresence, Presence};
pub use crate::sync::ConnectionState;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store is disconnected")]
    Disconnected,
    #[error("Shared map not initialized: {0}")]
    MissingMap(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CRDT error: {0}")]
    Crdt(String),
    #[error("Store error: {0}")]
    Other(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn lock_error(e: impl fmt::Display) -> StoreError {
    StoreError::Other(format!("Lock error: {}", e))
}

/// Identifier of one connection to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One change inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOp {
    Set { key: String, bag: AttributeBag },
    Delete { key: String },
    Clear,
}

/// Full contents of one shared map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub map: String,
    pub entries: BTreeMap<String, AttributeBag>,
}

impl Snapshot {
    pub fn new(map: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Apply ops to an entry table in order.
pub(crate) fn apply_ops(entries: &mut BTreeMap<String, AttributeBag>, ops: Vec<MapOp>) {
    for op in ops {
        match op {
            MapOp::Set { key, bag } => {
                entries.insert(key, bag);
            }
            MapOp::Delete { key } => {
                entries.remove(&key);
            }
            MapOp::Clear => entries.clear(),
        }
    }
}

/// Live feed of snapshots for one map. Dropping it unsubscribes.
pub struct Subscription {
    map: String,
    receiver: Receiver<Snapshot>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(map: impl Into<String>, receiver: Receiver<Snapshot>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            map: map.into(),
            receiver,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn map(&self) -> &str {
        &self.map
    }

    /// The newest queued snapshot; older ones are discarded.
    pub fn try_latest(&self) -> Option<Snapshot> {
        let mut latest = None;
        while let Ok(snapshot) = self.receiver.try_recv() {
            latest = Some(snapshot);
        }
        latest
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("map", &self.map).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Subscriber registry shared by the store backends.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    senders: HashMap<u64, (String, Sender<Snapshot>)>,
}

impl Subscribers {
    pub(crate) fn add(&mut self, map: &str) -> (u64, Receiver<Snapshot>) {
        self.next_id += 1;
        let (tx, rx) = channel();
        self.senders.insert(self.next_id, (map.to_string(), tx));
        (self.next_id, rx)
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.senders.remove(&id);
    }

    pub(crate) fn maps(&self) -> Vec<String> {
        let mut maps: Vec<String> = self.senders.values().map(|(m, _)| m.clone()).collect();
        maps.sort();
        maps.dedup();
        maps
    }

    /// Deliver to every subscriber of the snapshot's map, pruning dead receivers.
    pub(crate) fn notify(&mut self, snapshot: &Snapshot) {
        self.senders.retain(|_, (map, tx)| {
            *map != snapshot.map || tx.send(snapshot.clone()).is_ok()
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }
}

/// Subscribe to a shared `Subscribers` registry, returning a self-cancelling handle.
pub(crate) fn subscribe_shared(subscribers: &Arc<Mutex<Subscribers>>, map: &str) -> StoreResult<Subscription> {
    let (id, rx) = subscribers.lock().map_err(lock_error)?.add(map);
    let registry = Arc::downgrade(subscribers);
    Ok(Subscription::new(map, rx, move || {
        if let Some(registry) = registry.upgrade() {
            if let Ok(mut subs) = registry.lock() {
                subs.remove(id);
            }
        }
    }))
}

/// A replicated store of named maps shared by the connections in a room.
pub trait SharedStore {
    /// This connection's id within the room.
    fn connection_id(&self) -> ConnectionId;

    fn status(&self) -> ConnectionState;

    /// Current contents of a map, or None if it was never initialized.
    fn read(&self, map: &str) -> StoreResult<Option<Snapshot>>;

    /// Create the map empty if it does not exist yet.
    fn ensure_map(&self, map: &str) -> StoreResult<()>;

    /// Apply ops atomically. Subscribers see one snapshot for the whole batch.
    fn transact(&self, map: &str, ops: Vec<MapOp>) -> StoreResult<()>;

    fn subscribe(&self, map: &str) -> StoreResult<Subscription>;

    /// Replace this connection's presence.
    fn set_presence(&self, presence: &Presence) -> StoreResult<()>;

    fn clear_presence(&self) -> StoreResult<()>;

    /// Presence of every other connection.
    fn others(&self) -> Vec<PeerPresence>;
}

impl<T: SharedStore + ?Sized> SharedStore for Arc<T> {
    fn connection_id(&self) -> ConnectionId {
        (**self).connection_id()
    }

    fn status(&self) -> ConnectionState {
        (**self).status()
    }

    fn read(&self, map: &str) -> StoreResult<Option<Snapshot>> {
        (**self).read(map)
    }

    fn ensure_map(&self, map: &str) -> StoreResult<()> {
        (**self).ensure_map(map)
    }

    fn transact(&self, map: &str, ops: Vec<MapOp>) -> StoreResult<()> {
        (**self).transact(map, ops)
    }

    fn subscribe(&self, map: &str) -> StoreResult<Subscription> {
        (**self).subscribe(map)
    }

    fn set_presence(&self, presence: &Presence) -> StoreResult<()> {
        (**self).set_presence(presence)
    }

    fn clear_presence(&self) -> StoreResult<()> {
        (**self).clear_presence()
    }

    fn others(&self) -> Vec<PeerPresence> {
        (**self).others()
    }
}
