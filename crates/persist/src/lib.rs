//! Tile persistence: the store interface plus in-memory and file-backed
//! backends.
//!
//! # Invariants
//! - A store holds at most one value per `TilePos`.
//! - File-backed tiles are checked against their sha256 before decoding; a
//!   mismatch is an error, never a silent miss.
//! - A store whose schema version differs from this build refuses to open.

mod codec;
mod memory;
mod store;

pub use codec::{StoredTile, decode_tile, encode_tile};
pub use memory::MemoryTileStore;
pub use store::{FileTileStore, StoreError, StoreMeta, TileStore};
