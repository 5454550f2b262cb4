use lodstream_common::TilePos;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Self-describing record written for each tile: the position travels with
/// the payload so a misplaced file is detected on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTile<T> {
    pub pos: TilePos,
    pub extra: i64,
    pub data: T,
}

/// CBOR-encode a tile record.
pub fn encode_tile<T: Serialize>(pos: TilePos, extra: i64, data: &T) -> Result<Vec<u8>, StoreError> {
    let record = StoredTile { pos, extra, data };
    let mut buf = Vec::new();
    ciborium::into_writer(&record, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// Decode a record written by [`encode_tile`], checking it belongs to `pos`.
pub fn decode_tile<T: for<'de> Deserialize<'de>>(
    pos: TilePos,
    bytes: &[u8],
) -> Result<StoredTile<T>, StoreError> {
    let record: StoredTile<T> =
        ciborium::from_reader(bytes).map_err(|e| StoreError::CborDecode(e.to_string()))?;
    if record.pos != pos {
        return Err(StoreError::WrongTile {
            requested: pos,
            found: record.pos,
        });
    }
    Ok(record)
}
