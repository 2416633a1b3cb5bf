//! Canvas sync adapter: keeps a local [`Scene`] and a shared map in agreement.
//!
//! Local edits land in the scene first and are published on the next
//! [`CanvasSyncAdapter::poll`] or [`CanvasSyncAdapter::flush`]. Remote snapshots
//! rebuild the scene wholesale without producing local events, so applying one
//! never publishes it back.

use crate::attrs::{AttributeBag, from_bag, to_bag};
use crate::config::{SyncConfig, SyncMode};
use crate::ids::{DrawableId, IdGenerator};
use crate::presence::{CursorPosition, PeerPresence, Presence, PresenceThrottle, UserInfo, peer_color};
use crate::scene::Scene;
use crate::shapes::{Drawable, DrawableKind, ShapeStyle};
use crate::store::{
    ConnectionState, MapOp, SharedStore, StoreError, StoreResult, Subscription,
};
use crate::tools::{self, ToolKind, ToolOptions};
use kurbo::Point;
use std::collections::BTreeMap;

/// Publish state of the adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    /// The scene reflects the last snapshot received.
    #[default]
    Synced,
    /// A local publish has been written and its echo not yet seen.
    LocalEditInFlight,
}

/// Non-blocking notices for the host UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// A publish failed because the store is unreachable. Edits stay local.
    Offline,
    /// The store is reachable again and pending edits were republished.
    Reconnected,
    /// A shared entry could not be decoded and was left out of the scene.
    SkippedEntry { key: String, reason: String },
}

/// Receives the scene whenever it should be redrawn.
pub trait RenderSink {
    fn render(&mut self, scene: &Scene);

    /// Called once when the adapter shuts down.
    fn stop(&mut self) {}
}

pub struct CanvasSyncAdapter<S: SharedStore> {
    store: S,
    config: SyncConfig,
    scene: Scene,
    ids: IdGenerator,
    subscription: Option<Subscription>,
    state: SyncState,
    /// Local changes not yet written to the store.
    dirty: bool,
    offline: bool,
    /// Whether the map has been created and read since mounting.
    loaded: bool,
    /// Map contents as of the last publish or received snapshot.
    last_published: BTreeMap<String, AttributeBag>,
    presence: Presence,
    throttle: PresenceThrottle,
    notices: Vec<SyncNotice>,
    render_sink: Option<Box<dyn RenderSink>>,
    mounted: bool,
}

impl<S: SharedStore> CanvasSyncAdapter<S> {
    /// Attach to the store: create the map if absent, subscribe, and load its contents.
    ///
    /// An unreachable store still mounts, with an empty scene and an
    /// [`SyncNotice::Offline`] notice. The map is loaded once it is back.
    pub fn mount(store: S, config: SyncConfig) -> StoreResult<Self> {
        let namespace = match &config.id_namespace {
            Some(ns) => ns.clone(),
            None => store.connection_id().to_string(),
        };
        Self::mount_with_ids(store, config, IdGenerator::new(namespace))
    }

    /// Like [`CanvasSyncAdapter::mount`], continuing an existing id sequence.
    pub fn mount_with_ids(store: S, config: SyncConfig, ids: IdGenerator) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|e| StoreError::Other(e.to_string()))?;
        let offline = match store.ensure_map(&config.map_name) {
            Ok(()) => false,
            Err(StoreError::Disconnected) => {
                log::warn!("Store unreachable, mounting '{}' offline", config.map_name);
                true
            }
            Err(e) => return Err(e),
        };
        let subscription = store.subscribe(&config.map_name)?;

        let mut presence = Presence::default();
        if let Some(name) = &config.user_name {
            let color = config
                .user_color
                .clone()
                .unwrap_or_else(|| peer_color(store.connection_id()).to_string());
            presence.user = Some(UserInfo {
                name: name.clone(),
                color,
            });
        }

        let throttle = PresenceThrottle::new(config.presence_throttle());
        let mut adapter = Self {
            store,
            config,
            scene: Scene::new(),
            ids,
            subscription: Some(subscription),
            state: SyncState::Synced,
            dirty: false,
            offline,
            loaded: !offline,
            last_published: BTreeMap::new(),
            presence,
            throttle,
            notices: Vec::new(),
            render_sink: None,
            mounted: true,
        };

        if offline {
            adapter.notices.push(SyncNotice::Offline);
        } else {
            if let Some(snapshot) = adapter.store.read(&adapter.config.map_name)? {
                adapter.apply_remote_snapshot(&snapshot.entries);
            }
            if adapter.presence.user.is_some() {
                adapter.store.set_presence(&adapter.presence)?;
            }
        }
        log::info!(
            "Mounted canvas on map '{}' as connection {} ({:?})",
            adapter.config.map_name,
            adapter.store.connection_id(),
            adapter.config.sync_mode
        );
        Ok(adapter)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Mutable scene access. Changes are published on the next poll or flush.
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Whether local changes are waiting to be written.
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.scene.has_pending_events()
    }

    pub fn set_render_sink(&mut self, sink: Box<dyn RenderSink>) {
        self.render_sink = Some(sink);
        self.render();
    }

    pub fn drain_notices(&mut self) -> Vec<SyncNotice> {
        std::mem::take(&mut self.notices)
    }

    // --- publishing ---

    /// Write the whole scene to the shared map, as configured by the sync mode.
    pub fn apply_local_mutation(&mut self) -> StoreResult<()> {
        // Events recorded so far are covered by this publish.
        self.scene.drain_events();
        let entries = self.serialize_scene()?;
        let ops = match self.config.sync_mode {
            SyncMode::FullSnapshot => std::iter::once(MapOp::Clear)
                .chain(entries.iter().map(|(key, bag)| MapOp::Set {
                    key: key.clone(),
                    bag: bag.clone(),
                }))
                .collect(),
            SyncMode::Incremental => diff_ops(&self.last_published, &entries),
        };

        if ops.is_empty() {
            self.dirty = false;
            return Ok(());
        }

        log::debug!(
            "Publishing {} drawables to '{}' ({} ops)",
            entries.len(),
            self.config.map_name,
            ops.len()
        );
        self.state = SyncState::LocalEditInFlight;
        match self.store.transact(&self.config.map_name, ops) {
            Ok(()) => {
                self.last_published = entries;
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                if matches!(e, StoreError::Disconnected) {
                    self.mark_offline();
                }
                log::warn!("Publish to '{}' failed: {}", self.config.map_name, e);
                Err(e)
            }
        }
    }

    fn mark_offline(&mut self) {
        if !self.offline {
            self.offline = true;
            self.notices.push(SyncNotice::Offline);
        }
    }

    fn serialize_scene(&self) -> StoreResult<BTreeMap<String, AttributeBag>> {
        self.scene
            .ordered()
            .enumerate()
            .map(|(z, drawable)| Ok((drawable.id().to_string(), to_bag(drawable, z)?)))
            .collect()
    }

    /// Rebuild the scene from shared map entries. Undecodable entries are skipped.
    pub fn apply_remote_snapshot(&mut self, entries: &BTreeMap<String, AttributeBag>) {
        let mut decoded: Vec<(i64, &String, Drawable)> = Vec::with_capacity(entries.len());
        for (key, bag) in entries {
            match from_bag(key, bag) {
                Ok((drawable, z)) => decoded.push((z, key, drawable)),
                Err(e) => {
                    log::warn!("Skipping shared entry '{}': {}", key, e);
                    self.notices.push(SyncNotice::SkippedEntry {
                        key: key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        decoded.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        for (_, _, drawable) in &decoded {
            self.ids.observe(drawable.id());
        }

        let count = decoded.len();
        let changed = self
            .scene
            .replace_all(decoded.into_iter().map(|(_, _, d)| d).collect());
        // Pending local edits were overwritten by the rebuild.
        self.scene.drain_events();
        self.dirty = false;
        if changed {
            self.scene.clear_history();
        }
        self.last_published = entries.clone();
        self.state = SyncState::Synced;
        log::debug!(
            "Applied snapshot of '{}': {} drawables (changed: {})",
            self.config.map_name,
            count,
            changed
        );
        self.render();
    }

    /// Drive the adapter from the host loop: publish local changes, apply the
    /// newest remote snapshot, send due presence.
    pub fn poll(&mut self) -> StoreResult<()> {
        let status = self.store.status();
        if self.offline && status == ConnectionState::Connected {
            if !self.loaded {
                // Mounted offline: the catch-up snapshot fills the scene unless there are local edits.
                self.store.ensure_map(&self.config.map_name)?;
                self.loaded = true;
            }
            log::info!("Store reachable again, resuming '{}'", self.config.map_name);
            self.offline = false;
            self.notices.push(SyncNotice::Reconnected);
            self.announce_presence();
        }

        let local_edits = self.scene.has_pending_events();
        if local_edits {
            self.dirty = true;
            self.render();
        }
        if self.dirty && !self.offline {
            match self.apply_local_mutation() {
                Ok(()) => {}
                Err(StoreError::Disconnected) => {}
                Err(e) => return Err(e),
            }
        }

        let latest = self.subscription.as_ref().and_then(|s| s.try_latest());
        if let Some(snapshot) = latest {
            if !self.dirty {
                self.apply_remote_snapshot(&snapshot.entries);
            }
        }

        if let Some(presence) = self.throttle.take_due() {
            self.send_presence(&presence);
        }
        Ok(())
    }

    /// Publish pending changes and presence now.
    pub fn flush(&mut self) -> StoreResult<()> {
        if self.is_dirty() {
            self.apply_local_mutation()?;
        }
        if self.throttle.has_pending() {
            self.throttle.reset();
            self.store.set_presence(&self.presence)?;
        }
        Ok(())
    }

    fn render(&mut self) {
        if let Some(sink) = self.render_sink.as_mut() {
            sink.render(&self.scene);
        }
    }

    // --- editing ---

    /// Add a drawable with the default geometry for `kind` and select it.
    ///
    /// Nothing is published until the next poll or flush.
    pub fn add_drawable(&mut self, kind: DrawableKind, position: Point, style: ShapeStyle) -> DrawableId {
        self.scene.push_undo();
        let id = self.ids.next(kind);
        self.scene
            .insert(tools::default_drawable(kind, id.clone(), position, style));
        self.scene.select(id.clone());
        id
    }

    /// Place what a click with `tool` creates. Returns the new ids, outermost first.
    pub fn add_from_tool(&mut self, tool: ToolKind, position: Point, options: &ToolOptions) -> Vec<DrawableId> {
        if !tool.is_placement() {
            return Vec::new();
        }
        self.add_with(|ids| tools::place(tool, ids, position, options))
    }

    /// Insert drawables built with this adapter's ids, as one undo step.
    /// The first one becomes the selection.
    pub fn add_with(&mut self, build: impl FnOnce(&mut IdGenerator) -> Vec<Drawable>) -> Vec<DrawableId> {
        let built = build(&mut self.ids);
        if built.is_empty() {
            return Vec::new();
        }
        self.scene.push_undo();
        let ids: Vec<DrawableId> = built.iter().map(|d| d.id().clone()).collect();
        for drawable in built {
            self.scene.insert(drawable);
        }
        self.scene.select(ids[0].clone());
        ids
    }

    /// Turn a finished stroke into a path.
    pub fn add_stroke(&mut self, tool: ToolKind, points: &[Point], options: &ToolOptions) -> Option<DrawableId> {
        if !tool.is_stroke() || points.is_empty() {
            return None;
        }
        let id = self.ids.next(DrawableKind::Path);
        let path = tools::stroke(tool, id.clone(), points, options)?;
        self.scene.push_undo();
        self.scene.insert(path);
        Some(id)
    }

    /// Delete the selection, group members included.
    pub fn remove_active_selection(&mut self) -> Vec<DrawableId> {
        self.scene.remove_active_selection()
    }

    pub fn duplicate_selected(&mut self) -> Vec<DrawableId> {
        self.scene.duplicate_selected(&mut self.ids)
    }

    pub fn undo(&mut self) -> bool {
        self.scene.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.scene.redo()
    }

    /// Remove every drawable from the canvas.
    pub fn clear(&mut self) {
        self.scene.clear();
    }

    // --- presence ---

    /// Move this connection's cursor. Sent at most once per throttle interval.
    pub fn update_presence(&mut self, cursor: CursorPosition) -> StoreResult<()> {
        self.edit_presence(|p| p.cursor = Some(cursor))
    }

    /// Change any presence field, under the same throttle as cursor moves.
    pub fn edit_presence(&mut self, f: impl FnOnce(&mut Presence)) -> StoreResult<()> {
        f(&mut self.presence);
        let Some(presence) = self.throttle.offer(self.presence.clone()) else {
            return Ok(());
        };
        match self.store.set_presence(&presence) {
            // Sent again on reconnect.
            Err(StoreError::Disconnected) => {
                self.mark_offline();
                Ok(())
            }
            other => other,
        }
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Send the current presence, superseding anything the throttle holds.
    fn announce_presence(&mut self) {
        if self.presence == Presence::default() {
            return;
        }
        self.throttle.reset();
        let presence = self.presence.clone();
        self.send_presence(&presence);
    }

    fn send_presence(&mut self, presence: &Presence) {
        if let Err(e) = self.store.set_presence(presence) {
            log::warn!("Failed to send presence: {}", e);
        }
    }

    /// Presence of the other connections in the room.
    pub fn others(&self) -> Vec<PeerPresence> {
        self.store.others()
    }

    // --- teardown ---

    /// Publish what is pending and detach from the store.
    pub fn unmount(mut self) {
        if self.is_dirty() && !self.offline {
            if let Err(e) = self.apply_local_mutation() {
                log::warn!("Final publish failed: {}", e);
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        self.subscription = None;
        self.throttle.reset();
        if let Err(e) = self.store.clear_presence() {
            log::warn!("Failed to clear presence: {}", e);
        }
        if let Some(sink) = self.render_sink.as_mut() {
            sink.stop();
        }
        log::info!("Unmounted canvas on map '{}'", self.config.map_name);
    }
}

impl<S: SharedStore> Drop for CanvasSyncAdapter<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Ops turning `before` into `after`: changed keys are set, vanished keys deleted.
fn diff_ops(before: &BTreeMap<String, AttributeBag>, after: &BTreeMap<String, AttributeBag>) -> Vec<MapOp> {
    let deletes = before
        .keys()
        .filter(|key| !after.contains_key(*key))
        .map(|key| MapOp::Delete { key: key.clone() });
    let sets = after
        .iter()
        .filter(|(key, bag)| before.get(*key) != Some(*bag))
        .map(|(key, bag)| MapOp::Set {
            key: key.clone(),
            bag: bag.clone(),
        });
    deletes.chain(sets).collect()
}
