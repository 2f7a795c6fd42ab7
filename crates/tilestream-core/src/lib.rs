//! # Tilestream Core
//!
//! Tile coordinate space, power-of-two tile grids, and the tile cache with its
//! load lifecycle, pyramid preload, interim chains and LRU eviction.
//!
//! Nothing here touches the network or the GPU; the renderer crate plugs its
//! own per-tile payload into [`Tile`] and drives the cache once per frame.

pub mod geometry;
pub mod tile_coord;
pub mod tile_grid;
pub mod tile;
pub mod cache;

pub use cache::{TileCache, TileId};
pub use geometry::{Extent, Point};
pub use tile::{Tile, TileState};
pub use tile_coord::{TileCoord, TileKey};
pub use tile_grid::{TileGrid, TileRange};
