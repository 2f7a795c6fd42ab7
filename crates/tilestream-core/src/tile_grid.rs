use serde::{Deserialize, Serialize};

use crate::geometry::{Extent, Point};
use crate::tile_coord::TileCoord;

/// Half the circumference of the EPSG:3857 world in meters.
pub const WEB_MERCATOR_HALF_SIZE: f64 = 20_037_508.342_789_244;

/// Guards floor/ceil against floating point noise on exact tile boundaries.
const SNAP_EPSILON: f64 = 1e-9;

/// Inclusive range of tile columns and rows at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub z: u32,
    pub min_x: i64,
    pub max_x: i64,
    pub min_y: i64,
    pub max_y: i64,
}

impl TileRange {
    pub fn contains(&self, coord: &TileCoord) -> bool {
        coord.z == self.z
            && coord.x >= self.min_x
            && coord.x <= self.max_x
            && coord.y >= self.min_y
            && coord.y <= self.max_y
    }

    pub fn width(&self) -> i64 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> i64 {
        self.max_y - self.min_y + 1
    }

    pub fn len(&self) -> usize {
        (self.width() * self.height()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major iteration over every coordinate in the range.
    pub fn iter(&self) -> impl Iterator<Item = TileCoord> + '_ {
        (self.min_y..=self.max_y)
            .flat_map(move |y| (self.min_x..=self.max_x).map(move |x| TileCoord::new(self.z, x, y)))
    }

    /// The range of ancestors at level `z` covering this range.
    pub fn parent_range(&self, z: u32) -> Option<TileRange> {
        if z > self.z {
            return None;
        }
        let shift = 1i64 << (self.z - z);
        Some(TileRange {
            z,
            min_x: self.min_x.div_euclid(shift),
            max_x: self.max_x.div_euclid(shift),
            min_y: self.min_y.div_euclid(shift),
            max_y: self.max_y.div_euclid(shift),
        })
    }
}

/// A multi-resolution tile grid anchored at its top-left corner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    pub extent: Extent,
    pub origin: Point,
    /// Map units per pixel for each zoom level, strictly decreasing.
    pub resolutions: Vec<f64>,
    pub tile_size: u32,
}

impl TileGrid {
    /// A square power-of-two grid: one tile at level 0, `2^z` columns at level `z`.
    pub fn xyz(extent: Extent, max_zoom: u32, tile_size: u32) -> Self {
        let base = extent.width().max(extent.height()) / f64::from(tile_size);
        let resolutions = (0..=max_zoom)
            .map(|z| base / f64::from(1u32 << z))
            .collect();
        Self {
            extent,
            origin: extent.top_left(),
            resolutions,
            tile_size,
        }
    }

    /// The EPSG:3857 grid used by common basemap services.
    pub fn web_mercator(max_zoom: u32, tile_size: u32) -> Self {
        let half = WEB_MERCATOR_HALF_SIZE;
        Self::xyz(Extent::new(-half, -half, half, half), max_zoom, tile_size)
    }

    pub fn max_zoom(&self) -> u32 {
        self.resolutions.len().saturating_sub(1) as u32
    }

    pub fn resolution(&self, z: u32) -> Option<f64> {
        self.resolutions.get(z as usize).copied()
    }

    /// Size of one tile in map units at level `z`.
    pub fn tile_span(&self, z: u32) -> Option<f64> {
        self.resolution(z).map(|r| r * f64::from(self.tile_size))
    }

    pub fn columns(&self, z: u32) -> i64 {
        self.tile_span(z)
            .map(|span| (self.extent.width() / span - SNAP_EPSILON).ceil() as i64)
            .unwrap_or(0)
    }

    pub fn rows(&self, z: u32) -> i64 {
        self.tile_span(z)
            .map(|span| (self.extent.height() / span - SNAP_EPSILON).ceil() as i64)
            .unwrap_or(0)
    }

    /// Zoom level for a view resolution. A positive `direction` prefers the
    /// coarser neighbouring level, a negative one the finer, zero the nearest.
    pub fn z_for_resolution(&self, resolution: f64, direction: i32) -> u32 {
        let r = &self.resolutions;
        let n = r.len();
        if n == 0 || r[0] <= resolution {
            return 0;
        }
        if resolution <= r[n - 1] {
            return (n - 1) as u32;
        }
        for i in 1..n {
            if r[i] == resolution {
                return i as u32;
            }
            if r[i] < resolution {
                let z = match direction.signum() {
                    1 => i - 1,
                    -1 => i,
                    _ => {
                        if r[i - 1] - resolution < resolution - r[i] {
                            i - 1
                        } else {
                            i
                        }
                    }
                };
                return z as u32;
            }
        }
        (n - 1) as u32
    }

    /// Tiles at level `z` intersecting `extent`, or `None` when the extent misses
    /// the grid. With `wrap_x` columns are left unclamped so they repeat across
    /// the antimeridian; rows are always clamped.
    pub fn tile_range_for_extent_and_z(
        &self,
        extent: &Extent,
        z: u32,
        wrap_x: bool,
    ) -> Option<TileRange> {
        let span = self.tile_span(z)?;
        if extent.is_empty() {
            return None;
        }
        let overlaps_rows = extent.min_y <= self.extent.max_y && extent.max_y >= self.extent.min_y;
        let overlaps_cols = extent.min_x <= self.extent.max_x && extent.max_x >= self.extent.min_x;
        if !overlaps_rows || (!wrap_x && !overlaps_cols) {
            return None;
        }

        let min_x = ((extent.min_x - self.origin.x) / span + SNAP_EPSILON).floor() as i64;
        let max_x = ((extent.max_x - self.origin.x) / span - SNAP_EPSILON).ceil() as i64 - 1;
        let min_y = ((self.origin.y - extent.max_y) / span + SNAP_EPSILON).floor() as i64;
        let max_y = ((self.origin.y - extent.min_y) / span - SNAP_EPSILON).ceil() as i64 - 1;

        let mut range = TileRange {
            z,
            min_x,
            max_x: max_x.max(min_x),
            min_y,
            max_y: max_y.max(min_y),
        };
        range.min_y = range.min_y.max(0);
        range.max_y = range.max_y.min(self.rows(z) - 1);
        if !wrap_x {
            range.min_x = range.min_x.max(0);
            range.max_x = range.max_x.min(self.columns(z) - 1);
        }
        if range.min_x > range.max_x || range.min_y > range.max_y {
            return None;
        }
        Some(range)
    }

    /// Map-unit extent of a tile. Columns outside the grid yield extents in
    /// neighbouring worlds.
    pub fn tile_coord_extent(&self, coord: &TileCoord) -> Option<Extent> {
        let span = self.tile_span(coord.z)?;
        let min_x = self.origin.x + coord.x as f64 * span;
        let max_y = self.origin.y - coord.y as f64 * span;
        Some(Extent::new(min_x, max_y - span, min_x + span, max_y))
    }

    /// Wrap a coordinate's column into the grid.
    pub fn wrap_x(&self, coord: &TileCoord) -> TileCoord {
        let columns = self.columns(coord.z).max(1);
        TileCoord::new(coord.z, coord.x.rem_euclid(columns), coord.y)
    }

    /// Horizontal shift in map units from the canonical tile to `coord`'s world copy.
    pub fn world_shift(&self, coord: &TileCoord) -> f64 {
        let columns = self.columns(coord.z).max(1);
        coord.x.div_euclid(columns) as f64 * self.extent.width()
    }
}
