//! Point features expand into one screen-aligned quad each.

use crate::batch::SubBatch;
use crate::tessellate::{GeometryBuffers, InstructionReader};

/// `[x, y, corner]` before the attributes.
pub const POINT_VERTEX_HEADER: usize = 3;

const QUAD_INDICES: [u32; 6] = [0, 1, 3, 1, 2, 3];

pub fn tessellate(batch: &SubBatch) -> GeometryBuffers {
    let mut out = GeometryBuffers::with_stride(POINT_VERTEX_HEADER + batch.attribute_size);
    let mut reader = InstructionReader::new(&batch.instructions);
    while !reader.is_done() {
        let Some(attrs) = reader.take(batch.attribute_size) else {
            break;
        };
        let Some([x, y]) = reader.next_point() else {
            break;
        };
        let base = out.next_index();
        for corner in 0..4 {
            out.vertices.extend_from_slice(&[x, y, corner as f32]);
            out.vertices.extend_from_slice(attrs);
        }
        out.indices.extend(QUAD_INDICES.iter().map(|i| base + i));
    }
    out
}
