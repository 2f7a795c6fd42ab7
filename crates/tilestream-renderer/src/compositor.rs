//! Per-frame tile composition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tilestream_core::{Extent, TileCache, TileCoord, TileGrid, TileId, TileState};
use tilestream_io::{SourceConfig, TileFetcher, UrlTemplate};
use tilestream_worker::{LayerId, StyleDescriptor};

use crate::error::RenderError;
use crate::gpu::{DrawCall, GpuContext, ScissorRect};
use crate::loader::{LoaderStats, TileLoader};
use crate::render_data::FrameSummary;
use crate::representation::TileRepresentation;
use crate::viewport::Viewport;

/// A tile chosen to fill one visible cell.
struct Placement {
    tile: TileId,
    z: u32,
    /// Where the tile's content lands, already shifted into the cell's world copy.
    extent: Extent,
    scissor: ScissorRect,
    opacity: f32,
}

/// Draws one tiled vector source.
///
/// Each [`FrameCompositor::render_frame`] plans the needed tiles, starts loads
/// for new ones and draws whatever is ready, falling back to stale or coarser
/// tiles for cells that are still loading. It never waits for a tile. Newly
/// loaded tiles fade in over the configured transition with their nearest
/// loaded ancestor drawn underneath.
pub struct FrameCompositor {
    config: SourceConfig,
    grid: TileGrid,
    template: UrlTemplate,
    cache: TileCache<TileRepresentation>,
    loader: TileLoader,
}

impl FrameCompositor {
    pub fn new(
        config: SourceConfig,
        layer_id: impl Into<LayerId>,
        fetcher: Arc<dyn TileFetcher>,
        style: StyleDescriptor,
    ) -> Result<Self, RenderError> {
        config.validate()?;
        let mut loader = TileLoader::new(&config, layer_id, fetcher)?;
        loader.register_style(style)?;
        Ok(Self {
            grid: config.tile_grid(),
            template: config.url_template(),
            cache: TileCache::new(config.cache_size, config.wrap_x),
            config,
            loader,
        })
    }

    /// Replace the tile grid, e.g. for a non-mercator source.
    pub fn with_grid(mut self, grid: TileGrid) -> Self {
        self.grid = grid;
        self
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn cache(&self) -> &TileCache<TileRepresentation> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TileCache<TileRepresentation> {
        &mut self.cache
    }

    pub fn loader(&self) -> &TileLoader {
        &self.loader
    }

    pub fn stats(&self) -> LoaderStats {
        self.loader.stats()
    }

    /// Point the source at new URLs. Cached tiles become stale and keep
    /// drawing until their replacements load.
    pub fn set_urls(&mut self, urls: Vec<String>) {
        self.template = UrlTemplate::from_list(&urls);
        self.config.urls = urls;
        let generation = self.cache.bump_generation();
        log::info!("tile source changed, generation {}", generation);
    }

    /// Zoom level a viewport renders at.
    pub fn zoom_for(&self, viewport: &Viewport) -> u32 {
        let max_z = self.config.max_zoom.min(self.grid.max_zoom());
        self.grid
            .z_for_resolution(viewport.resolution, self.config.z_direction)
            .clamp(self.config.min_zoom.min(max_z), max_z)
    }

    pub fn render_frame(&mut self, viewport: &Viewport, gpu: &mut dyn GpuContext) -> FrameSummary {
        self.render_frame_at(viewport, gpu, Instant::now())
    }

    /// Render a frame as of `now`, which drives the fade-in of new tiles.
    pub fn render_frame_at(&mut self, viewport: &Viewport, gpu: &mut dyn GpuContext, now: Instant) -> FrameSummary {
        let events = self.loader.poll(&mut self.cache, gpu);
        for &id in &events.ready {
            if let Some(tile) = self.cache.get_mut(id) {
                tile.data.mark_loaded(now);
            }
        }
        let frame = self.cache.begin_frame();
        let z = self.zoom_for(viewport);
        let mut summary = FrameSummary::empty(frame, z, *viewport);
        summary.ready = events.ready.len();

        let view = viewport.extent();
        if let Some(range) = self.grid.tile_range_for_extent_and_z(&view, z, self.config.wrap_x) {
            summary.visible = range.len();
            self.cache.ensure_capacity_for(range.len());

            let resolution = self.grid.resolution(z).unwrap_or(viewport.resolution);
            let needed = view.buffer(self.config.render_buffer * resolution);
            let ids = self.cache.manage_tile_pyramid(&self.grid, &needed, z, self.config.preload);

            for id in self.cache.take_superseded() {
                if let Some(tile) = self.cache.get_mut(id) {
                    self.loader.abort(tile);
                }
            }
            self.start_loads(&ids);

            let mut placements = Vec::with_capacity(summary.visible);
            for coord in range.iter() {
                self.place(coord, viewport, now, &mut placements, &mut summary);
            }
            summary.draw_calls = self.draw(&placements, viewport, gpu);
        } else {
            log::debug!("view {:?} misses the tile grid at z{}", view, z);
        }

        // Anything still loading that this frame no longer needs is abandoned.
        for id in self.cache.unused_ids() {
            if let Some(tile) = self.cache.get_mut(id) {
                if matches!(tile.state(), TileState::Idle | TileState::Loading) {
                    self.loader.abort(tile);
                }
            }
        }

        let evicted = self.cache.schedule_eviction();
        summary.evicted = evicted.len();
        for (_, mut tile) in evicted {
            self.loader.release(&mut tile.data, gpu);
        }
        summary.cache_size = self.cache.len();
        summary.loader = self.loader.stats();
        log::trace!(
            "frame {} z{}: {}/{} cells drawn, {} draw calls",
            frame,
            z,
            summary.drawn,
            summary.visible,
            summary.draw_calls
        );
        summary
    }

    fn start_loads(&mut self, ids: &[TileId]) {
        for &id in ids {
            let Some(tile) = self.cache.get_mut(id) else {
                continue;
            };
            if tile.state() != TileState::Idle {
                continue;
            }
            let coord = tile.coord();
            let (Some(extent), Some(resolution)) =
                (self.grid.tile_coord_extent(&coord), self.grid.resolution(coord.z))
            else {
                tile.set_state(TileState::Error);
                continue;
            };
            if let Some(url) = self.template.expand(&coord) {
                tile.set_url(url);
            }
            self.loader.load(id, tile, extent, resolution);
        }
    }

    /// Choose what to draw for one visible cell: its own tile when loaded,
    /// else the nearest loaded tile on its interim chain, else the nearest
    /// loaded ancestor. Failed cells draw nothing. A tile still fading in gets
    /// its nearest loaded ancestor placed underneath.
    fn place(
        &self,
        coord: TileCoord,
        viewport: &Viewport,
        now: Instant,
        placements: &mut Vec<Placement>,
        summary: &mut FrameSummary,
    ) {
        let Some(cell_extent) = self.grid.tile_coord_extent(&coord) else {
            return;
        };
        // A cell whose tile was evicted mid-frame is simply not ready.
        let own = self.cache.peek(&coord);
        let state = own.and_then(|id| self.cache.get(id)).map(|tile| tile.state());
        if state == Some(TileState::Error) {
            summary.failed += 1;
            return;
        }

        let drawable = own
            .and_then(|id| self.cache.find_drawable(id))
            .or_else(|| self.loaded_ancestor(coord));
        let Some(drawable) = drawable else {
            summary.pending += 1;
            return;
        };
        let Some(tile) = self.cache.get(drawable) else {
            summary.pending += 1;
            return;
        };

        summary.drawn += 1;
        if Some(drawable) != own {
            summary.interim += 1;
        }
        let opacity = tile.data.opacity(now, self.transition());
        if opacity < 1.0 {
            summary.fading += 1;
        }
        let Some(scissor) = viewport.scissor_for(&cell_extent) else {
            return;
        };
        let shift = self.grid.world_shift(&coord);
        if opacity < 1.0 {
            if let Some(under) = self.loaded_ancestor(tile.coord()) {
                self.push_placement(under, shift, scissor, now, placements);
            }
        }
        self.push_placement(drawable, shift, scissor, now, placements);
    }

    fn push_placement(
        &self,
        id: TileId,
        shift: f64,
        scissor: ScissorRect,
        now: Instant,
        placements: &mut Vec<Placement>,
    ) {
        let Some(tile) = self.cache.get(id) else {
            return;
        };
        let Some(extent) = self.grid.tile_coord_extent(&tile.coord()) else {
            return;
        };
        placements.push(Placement {
            tile: id,
            z: tile.coord().z,
            extent: extent.translate(shift, 0.0),
            scissor,
            opacity: tile.data.opacity(now, self.transition()),
        });
    }

    /// The finest drawable tile among the cached ancestors of `coord`.
    fn loaded_ancestor(&self, coord: TileCoord) -> Option<TileId> {
        (0..coord.z)
            .rev()
            .filter_map(|z| coord.ancestor(z))
            .filter_map(|ancestor| self.cache.peek(&ancestor))
            .find_map(|id| self.cache.find_drawable(id))
    }

    fn transition(&self) -> Duration {
        Duration::from_millis(self.config.transition)
    }

    /// Issue the draws, coarse tiles first so finer ones paint over them.
    /// Tiles without geometry are skipped and the scissor is always lifted
    /// once the layer is done.
    fn draw(&self, placements: &[Placement], viewport: &Viewport, gpu: &mut dyn GpuContext) -> usize {
        let mut order: Vec<&Placement> = placements.iter().collect();
        order.sort_by_key(|p| p.z);

        let mut draw_calls = 0;
        let mut scissored = false;
        for placement in order {
            let Some(tile) = self.cache.get(placement.tile) else {
                continue;
            };
            if tile.data.buffers().is_empty() {
                continue;
            }
            let transform = viewport.transform_from(&placement.extent.bottom_left());
            gpu.set_scissor(Some(placement.scissor));
            scissored = true;
            for buffers in tile.data.buffers() {
                gpu.draw_elements(&DrawCall {
                    kind: buffers.kind,
                    vertex_buffer: buffers.vertex_buffer,
                    index_buffer: buffers.index_buffer,
                    index_count: buffers.index_count,
                    stride: buffers.stride,
                    transform,
                    opacity: placement.opacity,
                });
                draw_calls += 1;
            }
        }
        if scissored {
            gpu.set_scissor(None);
        }
        draw_calls
    }

    /// Release every tile's GPU storage and stop the background threads.
    pub fn dispose(&mut self, gpu: &mut dyn GpuContext) {
        for (_, mut tile) in self.cache.clear() {
            self.loader.release(&mut tile.data, gpu);
        }
        self.loader.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilestream_core::Point;
    use tilestream_io::MemoryFetcher;

    use crate::gpu::CommandRecorder;

    fn compositor() -> FrameCompositor {
        let config = SourceConfig {
            urls: vec!["mem://{z}/{x}/{y}".into()],
            render_buffer: 0.0,
            preload: 0,
            fetch_threads: 1,
            transition: 0,
            ..SourceConfig::default()
        };
        FrameCompositor::new(config, "A", Arc::new(MemoryFetcher::new()), StyleDescriptor::default())
            .unwrap()
            .with_grid(TileGrid::xyz(Extent::new(0.0, 0.0, 4096.0, 4096.0), 5, 256))
    }

    #[test]
    fn test_zoom_is_clamped_to_source() {
        let mut compositor = compositor();
        compositor.config.min_zoom = 1;
        compositor.config.max_zoom = 4;
        let vp = Viewport::new(256.0, 256.0);
        assert_eq!(compositor.zoom_for(&vp.with_resolution(100.0)), 1);
        assert_eq!(compositor.zoom_for(&vp.with_resolution(2.0)), 3);
        assert_eq!(compositor.zoom_for(&vp.with_resolution(0.01)), 4);
    }

    #[test]
    fn test_first_frame_starts_loads_and_draws_nothing() {
        let mut compositor = compositor();
        let mut gpu = CommandRecorder::new();
        let vp = Viewport::new(256.0, 256.0)
            .with_center(Point::new(1280.0, 3328.0))
            .with_resolution(2.0);
        let summary = compositor.render_frame(&vp, &mut gpu);
        assert_eq!(summary.z, 3);
        assert_eq!(summary.visible, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.draw_calls, 0);
        assert_eq!(gpu.draws().count(), 0);

        let id = compositor.cache().peek(&TileCoord::new(3, 2, 1)).unwrap();
        let tile = compositor.cache().get(id).unwrap();
        assert_eq!(tile.state(), TileState::Loading);
        assert_eq!(tile.url(), Some("mem://3/2/1"));
    }

    #[test]
    fn test_view_off_grid_renders_empty_frame() {
        let mut compositor = compositor();
        let mut gpu = CommandRecorder::new();
        let vp = Viewport::new(256.0, 256.0)
            .with_center(Point::new(2048.0, 99_999.0))
            .with_resolution(2.0);
        let summary = compositor.render_frame(&vp, &mut gpu);
        assert_eq!(summary.visible, 0);
        assert_eq!(summary.cache_size, 0);
    }
}
