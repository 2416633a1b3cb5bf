//! CRDT integration using Loro for collaborative editing.
//!
//! # Schema
//!
//! ```text
//! LoroDoc
//! ├── "__maps": LoroMap<name, true>    (registry of initialized shared maps)
//! ├── "canvasObjects": LoroMap<id, json>
//! ├── "slides": LoroMap<slide id, json>
//! └── "objectsBySlide/<slide id>": LoroMap<id, json>
//! ```
//!
//! Every value is an attribute bag serialized as a JSON string. A bag is always
//! written whole, so concurrent edits of one drawable resolve last-writer-wins.

mod schema;
mod store;

pub use schema::{CrdtDocument, MAPS_KEY};
pub use store::LoroStore;

// Re-export Loro types that may be useful for collaboration
pub use loro::{ExportMode, VersionVector};
