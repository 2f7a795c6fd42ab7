//! Line segments expand into quads whose width is resolved at draw time.
//!
//! Every vertex of a segment quad carries the segment end points, the
//! neighbouring line vertices and a join flag word, so a shader can offset it
//! along the miter without the tessellator knowing the stroke width.

use crate::batch::SubBatch;
use crate::tessellate::{GeometryBuffers, InstructionReader};

/// `[x0, y0, x1, y1, prev_x, prev_y, next_x, next_y, join_flags, corner]`.
pub const LINE_VERTEX_HEADER: usize = 10;

pub const JOIN_HAS_PREVIOUS: u32 = 1;
pub const JOIN_HAS_NEXT: u32 = 1 << 1;

const SEGMENT_INDICES: [u32; 6] = [0, 1, 2, 1, 3, 2];

pub fn tessellate(batch: &SubBatch) -> GeometryBuffers {
    let mut out = GeometryBuffers::with_stride(LINE_VERTEX_HEADER + batch.attribute_size);
    let mut reader = InstructionReader::new(&batch.instructions);
    while !reader.is_done() {
        let Some(attrs) = reader.take(batch.attribute_size) else {
            break;
        };
        let (Some(closed), Some(count)) = (reader.take(1), reader.next_count()) else {
            break;
        };
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            match reader.next_point() {
                Some(p) => points.push(p),
                None => return out,
            }
        }
        write_line(&mut out, &points, closed[0] != 0.0, attrs);
    }
    out
}

fn write_line(out: &mut GeometryBuffers, points: &[[f32; 2]], closed: bool, attrs: &[f32]) {
    let n = points.len();
    if n < 2 || (closed && n < 3) {
        return;
    }
    let segments = if closed { n } else { n - 1 };
    for i in 0..segments {
        let start = points[i];
        let end = points[(i + 1) % n];
        let previous = if closed {
            Some(points[(i + n - 1) % n])
        } else {
            i.checked_sub(1).map(|j| points[j])
        };
        let next = if closed {
            Some(points[(i + 2) % n])
        } else {
            points.get(i + 2).copied()
        };
        write_segment(out, start, end, previous, next, attrs);
    }
}

fn write_segment(
    out: &mut GeometryBuffers,
    start: [f32; 2],
    end: [f32; 2],
    previous: Option<[f32; 2]>,
    next: Option<[f32; 2]>,
    attrs: &[f32],
) {
    let mut flags = 0;
    if previous.is_some() {
        flags |= JOIN_HAS_PREVIOUS;
    }
    if next.is_some() {
        flags |= JOIN_HAS_NEXT;
    }
    let previous = previous.unwrap_or(start);
    let next = next.unwrap_or(end);

    let base = out.next_index();
    for corner in 0..4 {
        out.vertices.extend_from_slice(&[
            start[0],
            start[1],
            end[0],
            end[1],
            previous[0],
            previous[1],
            next[0],
            next[1],
            flags as f32,
            corner as f32,
        ]);
        out.vertices.extend_from_slice(attrs);
    }
    out.indices.extend(SEGMENT_INDICES.iter().map(|i| base + i));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(points: &[[f32; 2]], closed: bool, attrs: &[f32]) -> SubBatch {
        let mut instructions = attrs.to_vec();
        instructions.push(if closed { 1.0 } else { 0.0 });
        instructions.push(points.len() as f32);
        for p in points {
            instructions.extend_from_slice(p);
        }
        SubBatch { instructions, attribute_size: attrs.len(), feature_count: 1 }
    }

    fn flags(out: &GeometryBuffers, segment: usize) -> u32 {
        out.vertices[segment * 4 * out.stride + 8] as u32
    }

    #[test]
    fn test_open_line_endpoints_have_no_neighbours() {
        let out = tessellate(&line(&[[0.0, 0.0], [1.0, 0.0], [2.0, 1.0]], false, &[9.0]));
        assert_eq!(out.stride, 11);
        assert_eq!(out.vertex_count(), 8);
        assert_eq!(out.indices.len(), 12);
        assert_eq!(&out.indices[6..], &[4, 5, 6, 5, 7, 6]);
        assert_eq!(flags(&out, 0), JOIN_HAS_NEXT);
        assert_eq!(flags(&out, 1), JOIN_HAS_PREVIOUS);
        // First segment: next vertex is the line's third point.
        assert_eq!(&out.vertices[6..8], &[2.0, 1.0]);
        assert_eq!(out.vertices[10], 9.0);
    }

    #[test]
    fn test_closed_ring_wraps_neighbours() {
        let square = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let out = tessellate(&line(&square, true, &[]));
        assert_eq!(out.vertex_count(), 16);
        for segment in 0..4 {
            assert_eq!(flags(&out, segment), JOIN_HAS_PREVIOUS | JOIN_HAS_NEXT);
        }
        // First segment's previous vertex is the last ring point.
        assert_eq!(&out.vertices[4..6], &[0.0, 1.0]);
    }

    #[test]
    fn test_corners_are_numbered() {
        let out = tessellate(&line(&[[0.0, 0.0], [1.0, 0.0]], false, &[]));
        let corners: Vec<f32> = (0..4).map(|v| out.vertices[v * out.stride + 9]).collect();
        assert_eq!(corners, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(flags(&out, 0), 0);
    }
}
