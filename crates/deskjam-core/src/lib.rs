//! DeskJam Core Library
//!
//! Keeps a local whiteboard scene in agreement with a replicated shared store,
//! plus the store backends, drawing tools and relay client around it.

pub mod adapter;
pub mod attrs;
pub mod collaboration;
pub mod config;
pub mod crdt;
pub mod ids;
pub mod presence;
pub mod scene;
pub mod shapes;
pub mod slides;
pub mod store;
pub mod sync;
pub mod tools;

pub use adapter::{CanvasSyncAdapter, RenderSink, SyncNotice, SyncState};
pub use attrs::{AttributeBag, DecodeError, from_bag, to_bag};
pub use collaboration::CollaborationSession;
pub use config::{ConfigError, SyncConfig, SyncMode};
pub use crdt::{CrdtDocument, LoroStore};
pub use ids::{DrawableId, IdGenerator};
pub use presence::{CursorPosition, PeerPresence, Presence};
pub use scene::{Scene, SceneEvent, SceneObserver};
pub use shapes::{Drawable, DrawableKind, ShapeStyle};
pub use slides::{SlideDeck, SlideTemplate};
pub use store::{MemoryRoom, SharedStore, StoreError, StoreResult};
pub use sync::{ConnectionState, SyncEvent};
pub use tools::{ToolKind, ToolOptions};
