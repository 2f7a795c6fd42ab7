use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::Extent;
use crate::tile::{Tile, TileState};
use crate::tile_coord::{TileCoord, TileKey};
use crate::tile_grid::TileGrid;

/// Generational handle to a tile slot. A handle outlives the tile it names:
/// once the tile is evicted the handle simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    index: u32,
    revision: u32,
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.revision)
    }
}

#[derive(Debug)]
struct Entry<D> {
    tile: Tile<D>,
    last_used: u64,
}

#[derive(Debug)]
struct Slot<D> {
    revision: u32,
    entry: Option<Entry<D>>,
}

/// Capacity-bounded tile store with least-recently-used eviction.
///
/// Tiles live in an arena addressed by [`TileId`]; a key index maps each
/// normalized tile key to the current tile for that cell. A tile superseded by
/// a newer generation leaves the index but stays in the arena for as long as
/// some used tile reaches it through its interim chain.
#[derive(Debug)]
pub struct TileCache<D> {
    slots: Vec<Slot<D>>,
    free: Vec<u32>,
    live: usize,
    index: HashMap<TileKey, TileId>,
    capacity: usize,
    generation: u64,
    frame: u64,
    used: HashSet<TileId>,
    superseded: Vec<TileId>,
    wrap_x: bool,
}

impl<D> TileCache<D> {
    pub fn new(capacity: usize, wrap_x: bool) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            index: HashMap::new(),
            capacity,
            generation: 0,
            frame: 0,
            used: HashSet::new(),
            superseded: Vec::new(),
            wrap_x,
        }
    }

    // ── Sizing ───────────────────────────────────────────────────────

    /// Number of tiles held, including superseded ones kept alive as interims.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Grow the capacity to hold at least twice the visible tile count.
    pub fn ensure_capacity_for(&mut self, visible: usize) {
        let wanted = visible.saturating_mul(2);
        if wanted > self.capacity {
            log::debug!("tile cache capacity {} -> {}", self.capacity, wanted);
            self.capacity = wanted;
        }
    }

    pub fn wrap_x(&self) -> bool {
        self.wrap_x
    }

    // ── Generations and frames ───────────────────────────────────────

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Mark every cached tile stale, e.g. after the source URL changed.
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        log::info!("tile source generation is now {}", self.generation);
        self.generation
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Start a new frame: forget which tiles the previous frame used.
    pub fn begin_frame(&mut self) -> u64 {
        self.frame += 1;
        self.used.clear();
        self.frame
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn get(&self, id: TileId) -> Option<&Tile<D>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.revision == id.revision)
            .and_then(|slot| slot.entry.as_ref())
            .map(|entry| &entry.tile)
    }

    pub fn get_mut(&mut self, id: TileId) -> Option<&mut Tile<D>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.revision == id.revision)
            .and_then(|slot| slot.entry.as_mut())
            .map(|entry| &mut entry.tile)
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.get(id).is_some()
    }

    /// Current tile for a coordinate, without creating or touching it.
    pub fn peek(&self, coord: &TileCoord) -> Option<TileId> {
        self.index
            .get(&coord.key(self.wrap_x))
            .copied()
            .filter(|id| self.contains(*id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileId, &Tile<D>)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|entry| {
                (
                    TileId {
                        index: index as u32,
                        revision: slot.revision,
                    },
                    &entry.tile,
                )
            })
        })
    }

    pub fn ids(&self) -> Vec<TileId> {
        self.iter().map(|(id, _)| id).collect()
    }

    // ── Usage tracking ───────────────────────────────────────────────

    /// Record that the current frame needs this tile.
    pub fn mark_used(&mut self, id: TileId) {
        let frame = self.frame;
        if let Some(entry) = self.entry_mut(id) {
            entry.last_used = frame;
            self.used.insert(id);
        }
    }

    pub fn is_used(&self, id: TileId) -> bool {
        self.used.contains(&id)
    }

    /// Tiles held but not needed by the current frame.
    pub fn unused_ids(&self) -> Vec<TileId> {
        self.iter()
            .map(|(id, _)| id)
            .filter(|id| !self.used.contains(id))
            .collect()
    }

    /// Tiles replaced by [`TileCache::get_tile`] since the last call.
    pub fn take_superseded(&mut self) -> Vec<TileId> {
        std::mem::take(&mut self.superseded)
    }

    // ── Interim chains ───────────────────────────────────────────────

    /// Predecessors of `id`, nearest first. Dangling links end the walk.
    pub fn interim_chain(&self, id: TileId) -> Vec<TileId> {
        let mut chain = Vec::new();
        let mut next = self.get(id).and_then(|tile| tile.interim);
        while let Some(current) = next {
            // Links only ever point at older tiles, but stay bounded regardless.
            if chain.len() > self.live || chain.contains(&current) {
                break;
            }
            let Some(tile) = self.get(current) else {
                break;
            };
            chain.push(current);
            next = tile.interim;
        }
        chain
    }

    /// The tile itself when loaded, otherwise the nearest loaded predecessor.
    pub fn find_drawable(&self, id: TileId) -> Option<TileId> {
        if self.get(id)?.is_loaded() {
            return Some(id);
        }
        self.interim_chain(id)
            .into_iter()
            .find(|candidate| self.get(*candidate).is_some_and(|tile| tile.is_loaded()))
    }

    /// Used tiles plus everything on their interim chains.
    fn protected(&self) -> HashSet<TileId> {
        let mut protected = self.used.clone();
        for id in &self.used {
            protected.extend(self.interim_chain(*id));
        }
        protected
    }

    /// Whether eviction may remove this tile in the current frame.
    pub fn is_evictable(&self, id: TileId) -> bool {
        self.contains(id) && !self.protected().contains(&id)
    }

    // ── Eviction ─────────────────────────────────────────────────────

    /// Remove tiles not used this frame, least recently used first, until the
    /// cache is back within capacity. Tiles reachable from a used tile's interim
    /// chain are kept. Returns the evicted tiles so their resources can be freed.
    pub fn schedule_eviction(&mut self) -> Vec<(TileId, Tile<D>)> {
        if self.live <= self.capacity {
            return Vec::new();
        }
        let protected = self.protected();
        let mut candidates: Vec<(u64, TileId)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let entry = slot.entry.as_ref()?;
                let id = TileId {
                    index: index as u32,
                    revision: slot.revision,
                };
                (!protected.contains(&id)).then_some((entry.last_used, id))
            })
            .collect();
        candidates.sort();

        let mut evicted = Vec::new();
        for (_, id) in candidates {
            if self.live <= self.capacity {
                break;
            }
            if let Some(tile) = self.remove(id) {
                evicted.push((id, tile));
            }
        }
        if !evicted.is_empty() {
            log::debug!(
                "evicted {} tiles, {} remain (capacity {})",
                evicted.len(),
                self.live,
                self.capacity
            );
        }
        evicted
    }

    /// Remove one tile regardless of usage.
    pub fn remove(&mut self, id: TileId) -> Option<Tile<D>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.revision != id.revision {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.revision = slot.revision.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        self.used.remove(&id);
        if self.index.get(entry.tile.key()) == Some(&id) {
            self.index.remove(entry.tile.key());
        }
        Some(entry.tile)
    }

    /// Drop every tile, returning them for cleanup.
    pub fn clear(&mut self) -> Vec<(TileId, Tile<D>)> {
        let ids = self.ids();
        ids.into_iter()
            .filter_map(|id| self.remove(id).map(|tile| (id, tile)))
            .collect()
    }

    fn entry_mut(&mut self, id: TileId) -> Option<&mut Entry<D>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.revision == id.revision)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn insert(&mut self, tile: Tile<D>) -> TileId {
        let entry = Entry {
            tile,
            last_used: self.frame,
        };
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            TileId {
                index,
                revision: slot.revision,
            }
        } else {
            self.slots.push(Slot {
                revision: 0,
                entry: Some(entry),
            });
            TileId {
                index: (self.slots.len() - 1) as u32,
                revision: 0,
            }
        }
    }
}

impl<D: Default> TileCache<D> {
    /// The tile for `coord` in the current generation, creating it when absent
    /// or stale. A replaced tile becomes the new tile's interim so its content
    /// keeps drawing until the replacement is loaded. Aborted tiles are replaced
    /// too; errored tiles are returned as they are and never retried here.
    pub fn get_tile(&mut self, coord: TileCoord) -> TileId {
        let key = coord.key(self.wrap_x);
        let mut interim = None;

        if let Some(&id) = self.index.get(&key) {
            let (frame, generation) = (self.frame, self.generation);
            if let Some(entry) = self.entry_mut(id) {
                let state = entry.tile.state();
                if entry.tile.generation() == generation && state != TileState::Abort {
                    entry.last_used = frame;
                    return id;
                }
                interim = match state {
                    // Dead tiles have nothing to show, link past them.
                    TileState::Abort | TileState::Error => entry.tile.interim,
                    _ => Some(id),
                };
                if matches!(state, TileState::Idle | TileState::Loading) {
                    self.superseded.push(id);
                }
            }
        }

        let coord = if self.wrap_x { coord.wrapped() } else { coord };
        let mut tile = Tile::new(coord, key.clone(), self.generation, D::default());
        tile.interim = interim;
        let id = self.insert(tile);
        self.index.insert(key, id);
        id
    }

    /// Make sure the tiles covering `extent` at level `z` and at `preload`
    /// coarser levels exist, and mark them used for this frame. Returned ids
    /// are ordered coarse to fine.
    pub fn manage_tile_pyramid(
        &mut self,
        grid: &TileGrid,
        extent: &Extent,
        z: u32,
        preload: u32,
    ) -> Vec<TileId> {
        let mut needed = Vec::new();
        let min_z = z.saturating_sub(preload);
        for level in min_z..=z {
            let Some(range) = grid.tile_range_for_extent_and_z(extent, level, self.wrap_x) else {
                continue;
            };
            for coord in range.iter() {
                let id = self.get_tile(coord);
                if !self.used.contains(&id) {
                    self.mark_used(id);
                    needed.push(id);
                }
            }
        }
        needed
    }
}
