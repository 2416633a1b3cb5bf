//! Loro document schema and operations.

use crate::attrs::AttributeBag;
use crate::store::{MapOp, StoreError, StoreResult};
use loro::{ExportMode, LoroDoc, LoroMap, LoroResult, LoroValue, VersionVector};
use std::collections::BTreeMap;
use std::fmt;

/// Registry of initialized shared maps.
pub const MAPS_KEY: &str = "__maps";

pub(crate) fn crdt_error(e: impl fmt::Display) -> StoreError {
    StoreError::Crdt(e.to_string())
}

/// A CRDT-backed document holding any number of shared maps.
///
/// Each shared map is a root `LoroMap` whose values are attribute bags encoded as
/// JSON strings, so concurrent writes to one key resolve to a whole bag.
pub struct CrdtDocument {
    doc: LoroDoc,
}

impl Default for CrdtDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtDocument {
    /// Create a new empty CRDT document.
    pub fn new() -> Self {
        Self { doc: LoroDoc::new() }
    }

    /// Create a CRDT document from a snapshot.
    pub fn from_snapshot(bytes: &[u8]) -> LoroResult<Self> {
        let doc = LoroDoc::new();
        doc.import(bytes)?;
        Ok(Self { doc })
    }

    /// Get the underlying LoroDoc.
    pub fn loro_doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn peer_id(&self) -> u64 {
        self.doc.peer_id()
    }

    fn registry(&self) -> LoroMap {
        self.doc.get_map(MAPS_KEY)
    }

    fn map(&self, name: &str) -> LoroMap {
        self.doc.get_map(name)
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.registry().get(name).is_some()
    }

    /// Names of every initialized map.
    pub fn initialized_maps(&self) -> Vec<String> {
        match self.registry().get_value() {
            LoroValue::Map(map) => {
                let mut names: Vec<String> = map.keys().cloned().collect();
                names.sort();
                names
            }
            _ => Vec::new(),
        }
    }

    /// Record a map as existing. Idempotent.
    pub fn initialize(&mut self, name: &str) -> LoroResult<()> {
        if self.is_initialized(name) {
            return Ok(());
        }
        self.registry().insert(name, true)?;
        self.doc.commit();
        Ok(())
    }

    fn keys(&self, name: &str) -> Vec<String> {
        match self.map(name).get_value() {
            LoroValue::Map(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Decode every entry of a map. Values that are not JSON objects are skipped.
    pub fn entries(&self, name: &str) -> BTreeMap<String, AttributeBag> {
        let mut entries = BTreeMap::new();
        let LoroValue::Map(map) = self.map(name).get_value() else {
            return entries;
        };
        for (key, value) in map.iter() {
            let LoroValue::String(encoded) = value else {
                log::warn!("Skipping non-string entry {} in map {}", key, name);
                continue;
            };
            let encoded = encoded.to_string();
            match serde_json::from_str::<AttributeBag>(&encoded) {
                Ok(bag) => {
                    entries.insert(key.clone(), bag);
                }
                Err(e) => log::warn!("Skipping undecodable entry {} in map {}: {}", key, name, e),
            }
        }
        entries
    }

    /// Apply a batch of ops to one map as a single commit.
    pub fn apply(&mut self, name: &str, ops: Vec<MapOp>) -> StoreResult<()> {
        let map = self.map(name);
        for op in ops {
            match op {
                MapOp::Set { key, bag } => {
                    let encoded = serde_json::to_string(&bag)?;
                    map.insert(&key, encoded).map_err(crdt_error)?;
                }
                MapOp::Delete { key } => {
                    map.delete(&key).map_err(crdt_error)?;
                }
                MapOp::Clear => {
                    for key in self.keys(name) {
                        map.delete(&key).map_err(crdt_error)?;
                    }
                }
            }
        }
        self.doc.commit();
        Ok(())
    }

    /// Export the document as a snapshot (full state).
    pub fn export_snapshot(&self) -> StoreResult<Vec<u8>> {
        self.doc.export(ExportMode::Snapshot).map_err(crdt_error)
    }

    /// Export updates made since a version.
    pub fn export_updates(&self, since: &VersionVector) -> StoreResult<Vec<u8>> {
        self.doc.export(ExportMode::updates(since)).map_err(crdt_error)
    }

    /// Import updates or a snapshot from another document.
    pub fn import(&mut self, bytes: &[u8]) -> LoroResult<()> {
        self.doc.import(bytes)?;
        Ok(())
    }

    /// Get the current version vector.
    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }
}
