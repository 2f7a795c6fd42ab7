use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of one cell of the tile pyramid. `y` counts rows down from the grid origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u32,
    pub x: i64,
    pub y: i64,
}

impl TileCoord {
    pub fn new(z: u32, x: i64, y: i64) -> Self {
        Self { z, x, y }
    }

    /// Number of columns (and rows) at this zoom level in a power-of-two grid.
    pub fn span(&self) -> i64 {
        1i64 << self.z
    }

    /// Wrap `x` into `[0, 2^z)`. `y` is never wrapped.
    pub fn wrapped(&self) -> Self {
        Self {
            z: self.z,
            x: self.x.rem_euclid(self.span()),
            y: self.y,
        }
    }

    /// How many whole worlds `x` lies away from the canonical one.
    pub fn world_offset(&self) -> i64 {
        self.x.div_euclid(self.span())
    }

    /// The tile one level coarser that covers this one.
    pub fn parent(&self) -> Option<Self> {
        if self.z == 0 {
            return None;
        }
        Some(Self {
            z: self.z - 1,
            x: self.x.div_euclid(2),
            y: self.y.div_euclid(2),
        })
    }

    /// The ancestor at zoom level `z` (itself when `z` equals its own level).
    pub fn ancestor(&self, z: u32) -> Option<Self> {
        if z > self.z {
            return None;
        }
        let shift = 1i64 << (self.z - z);
        Some(Self {
            z,
            x: self.x.div_euclid(shift),
            y: self.y.div_euclid(shift),
        })
    }

    pub fn children(&self) -> [Self; 4] {
        let (z, x, y) = (self.z + 1, self.x * 2, self.y * 2);
        [
            Self::new(z, x, y),
            Self::new(z, x + 1, y),
            Self::new(z, x, y + 1),
            Self::new(z, x + 1, y + 1),
        ]
    }

    /// Normalized cache key; wraps `x` first when `wrap_x` is set.
    pub fn key(&self, wrap_x: bool) -> TileKey {
        let coord = if wrap_x { self.wrapped() } else { *self };
        TileKey(coord.to_string())
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Deterministic `"z/x/y"` string identifying a tile in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey(String);

impl TileKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
