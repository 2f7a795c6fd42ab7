use std::time::{Duration, Instant};

use tilestream_core::Tile;
use tilestream_worker::{ExchangeId, GeometryBuffers, TileGeometry};

use crate::gpu::{BufferHandle, BufferTarget, GeometryKind, GpuContext, GpuError};

/// GPU buffers holding one geometry type of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadedBuffers {
    pub kind: GeometryKind,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub stride: u32,
}

/// Renderer-side payload of a cached tile: the exchange it waits on and the
/// GPU buffers it owns once loaded.
#[derive(Debug, Default)]
pub struct TileRepresentation {
    pending: Option<ExchangeId>,
    buffers: Vec<UploadedBuffers>,
    loaded_at: Option<Instant>,
}

/// A cache tile as the renderer stores it.
pub type RenderTile = Tile<TileRepresentation>;

impl TileRepresentation {
    pub fn pending(&self) -> Option<ExchangeId> {
        self.pending
    }

    pub(crate) fn set_pending(&mut self, exchange_id: ExchangeId) {
        self.pending = Some(exchange_id);
    }

    pub(crate) fn take_pending(&mut self) -> Option<ExchangeId> {
        self.pending.take()
    }

    pub fn buffers(&self) -> &[UploadedBuffers] {
        &self.buffers
    }

    pub fn has_gpu_data(&self) -> bool {
        !self.buffers.is_empty()
    }

    pub fn loaded_at(&self) -> Option<Instant> {
        self.loaded_at
    }

    /// Start the fade-in clock.
    pub fn mark_loaded(&mut self, at: Instant) {
        self.loaded_at = Some(at);
    }

    /// Alpha for drawing at `now`: ramps from 0 to 1 over `transition` after
    /// [`mark_loaded`](Self::mark_loaded). Unmarked tiles are opaque.
    pub fn opacity(&self, now: Instant, transition: Duration) -> f32 {
        match self.loaded_at {
            Some(at) if !transition.is_zero() => {
                let elapsed = now.saturating_duration_since(at).as_secs_f32();
                (elapsed / transition.as_secs_f32()).min(1.0)
            }
            _ => 1.0,
        }
    }

    /// Upload tessellated geometry. Empty geometry types get no buffers. On
    /// failure everything uploaded so far is released again.
    pub fn upload(&mut self, gpu: &mut dyn GpuContext, geometry: TileGeometry) -> Result<(), GpuError> {
        self.release(gpu);
        let parts = [
            (GeometryKind::Polygon, geometry.polygon),
            (GeometryKind::Line, geometry.line),
            (GeometryKind::Point, geometry.point),
        ];
        for (kind, part) in parts {
            if part.is_empty() {
                continue;
            }
            match upload_part(gpu, kind, &part) {
                Ok(uploaded) => self.buffers.push(uploaded),
                Err(e) => {
                    self.release(gpu);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Release GPU storage and forget the pending exchange. Safe to call in
    /// any state and any number of times.
    pub fn dispose(&mut self, gpu: &mut dyn GpuContext) {
        self.pending = None;
        self.loaded_at = None;
        self.release(gpu);
    }

    fn release(&mut self, gpu: &mut dyn GpuContext) {
        for uploaded in self.buffers.drain(..) {
            gpu.release_buffer(uploaded.vertex_buffer);
            gpu.release_buffer(uploaded.index_buffer);
        }
    }
}

fn upload_part(
    gpu: &mut dyn GpuContext,
    kind: GeometryKind,
    part: &GeometryBuffers,
) -> Result<UploadedBuffers, GpuError> {
    let vertex_buffer = gpu.create_buffer(BufferTarget::Vertex, bytemuck::cast_slice(&part.vertices))?;
    let index_buffer = match gpu.create_buffer(BufferTarget::Index, bytemuck::cast_slice(&part.indices)) {
        Ok(handle) => handle,
        Err(e) => {
            gpu.release_buffer(vertex_buffer);
            return Err(e);
        }
    };
    Ok(UploadedBuffers {
        kind,
        vertex_buffer,
        index_buffer,
        index_count: part.indices.len() as u32,
        stride: part.stride as u32,
    })
}
