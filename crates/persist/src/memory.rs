use std::collections::HashMap;

use lodstream_common::TilePos;
use parking_lot::RwLock;

use crate::store::{StoreError, TileStore};

/// Tile store kept entirely in memory. Never fails.
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    tiles: RwLock<HashMap<TilePos, Vec<u8>>>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.read().is_empty()
    }

    pub fn contains(&self, pos: &TilePos) -> bool {
        self.tiles.read().contains_key(pos)
    }
}

impl TileStore for MemoryTileStore {
    fn get(&self, pos: &TilePos) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tiles.read().get(pos).cloned())
    }

    fn put(&self, pos: &TilePos, bytes: &[u8]) -> Result<(), StoreError> {
        self.tiles.write().insert(*pos, bytes.to_vec());
        Ok(())
    }

    fn remove(&self, pos: &TilePos) -> Result<bool, StoreError> {
        Ok(self.tiles.write().remove(pos).is_some())
    }
}
