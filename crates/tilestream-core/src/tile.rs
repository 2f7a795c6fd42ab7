use serde::{Deserialize, Serialize};

use crate::cache::TileId;
use crate::tile_coord::{TileCoord, TileKey};

/// Lifecycle of a cached tile.
///
/// `Idle → Loading → {Loaded, Error, Abort}`. The three right-hand states are
/// terminal: once a tile reaches one of them it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileState {
    Idle,
    Loading,
    Loaded,
    Error,
    Abort,
}

impl TileState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TileState::Loaded | TileState::Error | TileState::Abort)
    }

    /// Whether `self → next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: TileState) -> bool {
        match (self, next) {
            (TileState::Idle, TileState::Loading) => true,
            // Tiles that never started can still be dropped or fail before fetching.
            (TileState::Idle, TileState::Abort | TileState::Error) => true,
            (TileState::Loading, TileState::Loaded | TileState::Error | TileState::Abort) => true,
            _ => false,
        }
    }
}

/// One cached map cell, carrying renderer-specific data `D`.
#[derive(Debug)]
pub struct Tile<D> {
    coord: TileCoord,
    key: TileKey,
    generation: u64,
    state: TileState,
    url: Option<String>,
    pub(crate) interim: Option<TileId>,
    pub data: D,
}

impl<D> Tile<D> {
    pub fn new(coord: TileCoord, key: TileKey, generation: u64, data: D) -> Self {
        Self {
            coord,
            key,
            generation,
            state: TileState::Idle,
            url: None,
            interim: None,
            data,
        }
    }

    /// The (wrapped) coordinate this tile was created for.
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn key(&self) -> &TileKey {
        &self.key
    }

    /// Source generation the tile belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == TileState::Loaded
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn set_url(&mut self, url: String) {
        self.url = Some(url);
    }

    /// The tile this one replaces while it is still loading.
    pub fn interim(&self) -> Option<TileId> {
        self.interim
    }

    /// Apply a lifecycle step. Illegal steps (anything out of a terminal state)
    /// are ignored and reported as `false`.
    pub fn set_state(&mut self, next: TileState) -> bool {
        if !self.state.can_transition_to(next) {
            log::debug!(
                "tile {}: ignoring transition {:?} -> {:?}",
                self.key,
                self.state,
                next
            );
            return false;
        }
        log::debug!("tile {}: {:?} -> {:?}", self.key, self.state, next);
        self.state = next;
        if next == TileState::Loaded {
            // Fresh content is drawable, the staleness chain has served its purpose.
            self.interim = None;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile() -> Tile<()> {
        let coord = TileCoord::new(1, 0, 0);
        Tile::new(coord, coord.key(false), 0, ())
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut tile = tile();
        assert_eq!(tile.state(), TileState::Idle);
        assert!(tile.set_state(TileState::Loading));
        assert!(tile.set_state(TileState::Loaded));
        assert!(tile.is_loaded());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [TileState::Loaded, TileState::Error, TileState::Abort] {
            let mut tile = tile();
            tile.set_state(TileState::Loading);
            assert!(tile.set_state(terminal));
            for next in [TileState::Idle, TileState::Loading, TileState::Loaded, TileState::Error, TileState::Abort] {
                assert!(!tile.set_state(next));
            }
            assert_eq!(tile.state(), terminal);
        }
    }

    #[test]
    fn test_idle_cannot_jump_to_loaded() {
        let mut tile = tile();
        assert!(!tile.set_state(TileState::Loaded));
        assert_eq!(tile.state(), TileState::Idle);
    }
}
