//! File-backed tile persistence.
//!
//! Layout inside the store directory:
//! ```text
//! tiles.meta.json                 - schema version and compression level
//! tiles/
//!   L0/
//!     800000008000000080000003.tile.zst
//!   L1/
//!     ...
//! ```
//! Each tile file is the 32-byte sha256 of the compressed payload followed
//! by the zstd-compressed payload. File stems are the hex of
//! [`TilePos::to_bytes`] without the level byte.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use lodstream_common::TilePos;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Current on-disk schema version.
const TILE_SCHEMA_VERSION: u32 = 1;
const DIGEST_LEN: usize = 32;
const TILE_EXT: &str = "tile.zst";

/// Errors from tile persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed for {pos}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        pos: TilePos,
        expected: String,
        actual: String,
    },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("stored tile is for {found}, requested {requested}")]
    WrongTile { requested: TilePos, found: TilePos },
}

/// Storage for encoded tiles, shared between generation workers.
///
/// Values are opaque bytes; see [`crate::encode_tile`] for the format the
/// provider writes.
pub trait TileStore: Send + Sync {
    fn get(&self, pos: &TilePos) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, pos: &TilePos, bytes: &[u8]) -> Result<(), StoreError>;

    /// Returns whether a value was present.
    fn remove(&self, pos: &TilePos) -> Result<bool, StoreError>;
}

/// Metadata stored in tiles.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub compression_level: i32,
}

/// Directory of zstd-compressed tiles with per-file integrity digests.
pub struct FileTileStore {
    root: PathBuf,
    meta: StoreMeta,
    /// Distinguishes this handle's temp files from other handles on the same
    /// directory.
    instance: Uuid,
    tmp_counter: AtomicU64,
}

impl FileTileStore {
    /// Open or create a tile store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_level(path, 3)
    }

    /// Like [`FileTileStore::open`], using `compression_level` for a newly
    /// created store. An existing store keeps its recorded level.
    pub fn open_with_level(path: impl AsRef<Path>, compression_level: i32) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("tiles"))?;

        let meta_path = root.join("tiles.meta.json");
        let meta = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.schema_version != TILE_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: TILE_SCHEMA_VERSION,
                });
            }
            meta
        } else {
            let meta = StoreMeta {
                schema_version: TILE_SCHEMA_VERSION,
                compression_level,
            };
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            meta
        };
        tracing::debug!(root = %root.display(), "opened tile store");

        Ok(Self {
            root,
            meta,
            instance: Uuid::new_v4(),
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    fn level_dir(&self, level: u8) -> PathBuf {
        self.root.join("tiles").join(format!("L{level}"))
    }

    fn tile_path(&self, pos: &TilePos) -> PathBuf {
        let stem: String = pos.to_bytes()[1..]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        self.level_dir(pos.level).join(format!("{stem}.{TILE_EXT}"))
    }

    fn temp_path(&self, dir: &Path) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        dir.join(format!(".{}-{n}.tmp", self.instance.simple()))
    }

    /// Verify every stored tile's digest. Returns the number of tiles checked.
    pub fn verify_integrity(&self) -> Result<usize, StoreError> {
        let mut checked = 0;
        for level_entry in std::fs::read_dir(self.root.join("tiles"))? {
            let level_entry = level_entry?;
            if !level_entry.file_type()?.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(level_entry.path())? {
                let path = entry?.path();
                let Some(pos) = pos_from_path(&path) else {
                    continue;
                };
                let data = std::fs::read(&path)?;
                verified_payload(&pos, &data)?;
                checked += 1;
            }
        }
        Ok(checked)
    }
}

impl TileStore for FileTileStore {
    fn get(&self, pos: &TilePos) -> Result<Option<Vec<u8>>, StoreError> {
        let data = match std::fs::read(self.tile_path(pos)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let compressed = verified_payload(pos, &data)?;
        Ok(Some(zstd_decompress(compressed)?))
    }

    fn put(&self, pos: &TilePos, bytes: &[u8]) -> Result<(), StoreError> {
        let compressed = zstd_compress(bytes, self.meta.compression_level)?;
        let digest = Sha256::digest(&compressed);

        let dir = self.level_dir(pos.level);
        std::fs::create_dir_all(&dir)?;
        let path = self.tile_path(pos);
        // write-then-rename so readers never see a partial file
        let tmp = self.temp_path(&dir);
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&digest)?;
            file.write_all(&compressed)?;
        }
        std::fs::rename(&tmp, &path)?;
        tracing::trace!(%pos, bytes = compressed.len(), "tile spilled");
        Ok(())
    }

    fn remove(&self, pos: &TilePos) -> Result<bool, StoreError> {
        match std::fs::remove_file(self.tile_path(pos)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn pos_from_path(path: &Path) -> Option<TilePos> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(TILE_EXT)?.strip_suffix('.')?;
    let level: u8 = path.parent()?.file_name()?.to_str()?.strip_prefix('L')?.parse().ok()?;
    if stem.len() != 24 {
        return None;
    }
    let mut bytes = vec![level];
    for i in (0..stem.len()).step_by(2) {
        bytes.push(u8::from_str_radix(stem.get(i..i + 2)?, 16).ok()?);
    }
    TilePos::from_bytes(&bytes).ok()
}

fn verified_payload<'a>(pos: &TilePos, data: &'a [u8]) -> Result<&'a [u8], StoreError> {
    if data.len() < DIGEST_LEN {
        return Err(StoreError::IntegrityMismatch {
            pos: *pos,
            expected: format!("at least {DIGEST_LEN} bytes"),
            actual: format!("{} bytes", data.len()),
        });
    }
    let (expected, payload) = data.split_at(DIGEST_LEN);
    let actual = Sha256::digest(payload);
    if actual.as_slice() != expected {
        return Err(StoreError::IntegrityMismatch {
            pos: *pos,
            expected: hex(expected),
            actual: hex(&actual),
        });
    }
    Ok(payload)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}
