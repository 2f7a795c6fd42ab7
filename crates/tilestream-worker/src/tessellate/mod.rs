//! Triangulation of render instructions into vertex and index buffers.

pub mod line;
pub mod point;
pub mod polygon;

use serde::{Deserialize, Serialize};

use crate::batch::GeometryBatch;

/// Interleaved `f32` vertices plus a `u32` triangle-list index buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryBuffers {
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    /// Floats per vertex.
    pub stride: usize,
}

impl GeometryBuffers {
    pub fn with_stride(stride: usize) -> Self {
        Self {
            stride,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.vertices.len() / self.stride
        }
    }

    /// Index the next pushed vertex will get.
    pub(crate) fn next_index(&self) -> u32 {
        self.vertex_count() as u32
    }
}

/// Buffers for all three geometry types of one tile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileGeometry {
    pub polygon: GeometryBuffers,
    pub line: GeometryBuffers,
    pub point: GeometryBuffers,
}

impl TileGeometry {
    pub fn is_empty(&self) -> bool {
        self.polygon.is_empty() && self.line.is_empty() && self.point.is_empty()
    }
}

pub fn tessellate(batch: &GeometryBatch) -> TileGeometry {
    TileGeometry {
        polygon: polygon::tessellate(&batch.polygon),
        line: line::tessellate(&batch.line),
        point: point::tessellate(&batch.point),
    }
}

/// Sequential reader over an instruction stream. Running past the end yields
/// `None`, which the tessellators treat as the end of the batch.
pub(crate) struct InstructionReader<'a> {
    data: &'a [f32],
    pos: usize,
}

impl<'a> InstructionReader<'a> {
    pub(crate) fn new(data: &'a [f32]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn take(&mut self, n: usize) -> Option<&'a [f32]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    pub(crate) fn next_count(&mut self) -> Option<usize> {
        self.take(1).map(|v| v[0].max(0.0) as usize)
    }

    pub(crate) fn next_point(&mut self) -> Option<[f32; 2]> {
        self.take(2).map(|v| [v[0], v[1]])
    }
}
