use serde::{Deserialize, Serialize};

use crate::loader::LoaderStats;

/// What one call to `render_frame` did, serializable for a frontend overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSummary {
    pub frame: u64,
    /// Zoom level the frame was rendered at.
    pub z: u32,
    pub viewport: super::Viewport,
    /// Tile cells intersecting the view at `z`.
    pub visible: usize,
    /// Cells drawn from their own or a substitute tile.
    pub drawn: usize,
    /// Cells drawn from an older tile or a coarser ancestor.
    pub interim: usize,
    /// Cells with nothing to show yet.
    pub pending: usize,
    pub failed: usize,
    /// Cells whose tile is still fading in.
    pub fading: usize,
    pub draw_calls: usize,
    /// Tiles that finished loading since the previous frame.
    pub ready: usize,
    pub evicted: usize,
    pub cache_size: usize,
    pub loader: LoaderStats,
}

impl FrameSummary {
    pub fn empty(frame: u64, z: u32, viewport: super::Viewport) -> Self {
        Self {
            frame,
            z,
            viewport,
            visible: 0,
            drawn: 0,
            interim: 0,
            pending: 0,
            failed: 0,
            fading: 0,
            draw_calls: 0,
            ready: 0,
            evicted: 0,
            cache_size: 0,
            loader: LoaderStats::default(),
        }
    }

    /// Every visible cell shows its own, current content at full opacity.
    pub fn is_complete(&self) -> bool {
        self.visible > 0 && self.drawn == self.visible && self.interim == 0 && self.fading == 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
