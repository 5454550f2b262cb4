use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a viewer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewerId(pub Uuid);

impl ViewerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViewerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.8}", &self.0.to_string()[..8])
    }
}

/// Which axes a LOD mode subdivides.
///
/// Heightmap tiles are columns addressed by (x, z) with y fixed at 0; voxel
/// tiles are cubes addressed by (x, y, z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axes {
    Xz,
    Xyz,
}

impl Axes {
    /// Number of children a tile has one level down.
    pub fn child_count(self) -> usize {
        match self {
            Self::Xz => 4,
            Self::Xyz => 8,
        }
    }

    /// Whether the y coordinate participates in windows and subdivision.
    pub fn has_y(self) -> bool {
        matches!(self, Self::Xyz)
    }
}
