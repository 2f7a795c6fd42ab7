//! Polygon fill triangulation.
//!
//! Each feature's rings become one closed lyon path; the fill tessellator
//! handles holes and self-intersections under the even-odd rule, so ring
//! winding does not matter.

use lyon::math::point;
use lyon::path::Path;
use lyon::tessellation::{BuffersBuilder, FillOptions, FillTessellator, FillVertex, VertexBuffers};

use crate::batch::SubBatch;
use crate::tessellate::{GeometryBuffers, InstructionReader};

/// `[x, y]` before the attributes.
pub const POLYGON_VERTEX_HEADER: usize = 2;

pub fn tessellate(batch: &SubBatch) -> GeometryBuffers {
    let mut out = GeometryBuffers::with_stride(POLYGON_VERTEX_HEADER + batch.attribute_size);
    let mut tessellator = FillTessellator::new();
    let options = FillOptions::even_odd();
    let mut fill: VertexBuffers<[f32; 2], u32> = VertexBuffers::new();

    let mut reader = InstructionReader::new(&batch.instructions);
    while !reader.is_done() {
        let Some(attrs) = reader.take(batch.attribute_size) else {
            break;
        };
        let Some(ring_count) = reader.next_count() else {
            break;
        };
        let mut lengths = Vec::with_capacity(ring_count);
        for _ in 0..ring_count {
            match reader.next_count() {
                Some(len) => lengths.push(len),
                None => return out,
            }
        }

        let mut path = Path::builder();
        let mut has_exterior = false;
        for (n, len) in lengths.into_iter().enumerate() {
            let mut ring = Vec::with_capacity(len);
            for _ in 0..len {
                match reader.next_point() {
                    Some([x, y]) => ring.push(point(x, y)),
                    None => return out,
                }
            }
            if ring.len() < 3 {
                continue;
            }
            has_exterior |= n == 0;
            path.begin(ring[0]);
            for p in &ring[1..] {
                path.line_to(*p);
            }
            path.end(true);
        }
        if !has_exterior {
            continue;
        }

        fill.vertices.clear();
        fill.indices.clear();
        let result = tessellator.tessellate_path(
            &path.build(),
            &options,
            &mut BuffersBuilder::new(&mut fill, |vertex: FillVertex| vertex.position().to_array()),
        );
        if let Err(e) = result {
            log::debug!("skipping polygon that failed to tessellate: {:?}", e);
            continue;
        }
        append(&mut out, &fill, attrs);
    }
    out
}

/// Copy one feature's fill into the batch buffers, attributes after each vertex.
/// Zero-area triangles are dropped.
fn append(out: &mut GeometryBuffers, fill: &VertexBuffers<[f32; 2], u32>, attrs: &[f32]) {
    let at = |i: u32| fill.vertices.get(i as usize).copied();
    let triangles: Vec<&[u32]> = fill
        .indices
        .chunks_exact(3)
        .filter(|t| match (at(t[0]), at(t[1]), at(t[2])) {
            (Some(a), Some(b), Some(c)) => {
                (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]) != 0.0
            }
            _ => false,
        })
        .collect();
    if triangles.is_empty() {
        return;
    }
    let base = out.next_index();
    for [x, y] in &fill.vertices {
        out.vertices.push(*x);
        out.vertices.push(*y);
        out.vertices.extend_from_slice(attrs);
    }
    out.indices.extend(triangles.into_iter().flatten().map(|i| base + i));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polygon(rings: &[&[[f32; 2]]]) -> SubBatch {
        let mut instructions = vec![rings.len() as f32];
        instructions.extend(rings.iter().map(|r| r.len() as f32));
        for ring in rings {
            for p in ring.iter() {
                instructions.extend_from_slice(p);
            }
        }
        SubBatch { instructions, attribute_size: 0, feature_count: 1 }
    }

    fn cross(o: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
        (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
    }

    fn area(out: &GeometryBuffers) -> f64 {
        out.indices
            .chunks(3)
            .map(|t| {
                let v = |i: u32| {
                    let at = i as usize * out.stride;
                    [f64::from(out.vertices[at]), f64::from(out.vertices[at + 1])]
                };
                cross(v(t[0]), v(t[1]), v(t[2])).abs() / 2.0
            })
            .sum()
    }

    #[test]
    fn test_single_triangle() {
        let out = tessellate(&polygon(&[&[[0.0, 0.0], [4.0, 0.0], [0.0, 3.0]]]));
        assert_eq!(out.vertex_count(), 3);
        assert_eq!(out.indices.len(), 3);
        assert!((area(&out) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_square_either_winding() {
        let ccw = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        let cw = [[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0]];
        for ring in [ccw, cw] {
            let out = tessellate(&polygon(&[&ring]));
            assert_eq!(out.vertex_count(), 4);
            assert_eq!(out.indices.len(), 6);
            assert!((area(&out) - 100.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_concave_polygon() {
        let ring = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [5.0, 3.0], [0.0, 10.0]];
        let out = tessellate(&polygon(&[&ring]));
        assert!((area(&out) - 65.0).abs() < 1e-6);
    }

    #[test]
    fn test_square_with_hole() {
        let outer = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        let hole = [[3.0, 3.0], [7.0, 3.0], [7.0, 7.0], [3.0, 7.0]];
        let out = tessellate(&polygon(&[&outer, &hole]));
        assert_eq!(out.vertex_count(), 8);
        assert!((area(&out) - 84.0).abs() < 1e-6);
    }

    #[test]
    fn test_many_holes_keep_their_area() {
        let outer = [[0.0, 0.0], [400.0, 0.0], [400.0, 400.0], [0.0, 400.0]];
        let holes: Vec<[[f32; 2]; 4]> = (0..20)
            .flat_map(|i| (0..20).map(move |j| (i as f32 * 20.0 + 5.0, j as f32 * 20.0 + 5.0)))
            .map(|(x, y)| [[x, y], [x + 10.0, y], [x + 10.0, y + 10.0], [x, y + 10.0]])
            .collect();
        let mut rings: Vec<&[[f32; 2]]> = vec![&outer];
        rings.extend(holes.iter().map(|h| h.as_slice()));
        let out = tessellate(&polygon(&rings));
        assert!((area(&out) - (160_000.0 - 400.0 * 100.0)).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_ring_is_skipped() {
        let out = tessellate(&polygon(&[&[[0.0, 0.0], [1.0, 1.0]]]));
        assert!(out.is_empty());
        let flat = tessellate(&polygon(&[&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]]]));
        assert!(flat.is_empty());
        assert_eq!(flat.vertex_count(), 0);
    }

    #[test]
    fn test_attributes_follow_each_vertex() {
        let mut batch = polygon(&[&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]]);
        batch.instructions.insert(0, 42.0);
        batch.attribute_size = 1;
        let out = tessellate(&batch);
        assert_eq!(out.stride, 3);
        assert!(out.vertices.chunks(3).all(|v| v[2] == 42.0));
    }

    #[test]
    fn test_features_share_one_buffer() {
        let tri = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let mut batch = polygon(&[&tri]);
        let second = polygon(&[&tri]);
        batch.instructions.extend_from_slice(&second.instructions);
        let out = tessellate(&batch);
        assert_eq!(out.vertex_count(), 6);
        assert!(out.indices[3..].iter().all(|&i| (3..6).contains(&i)));
    }
}
