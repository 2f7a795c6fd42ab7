//! Bucketing of decoded features into per-geometry-type render instructions.
//!
//! Instructions are flat `f32` streams, one record per feature, attributes
//! first so the tessellators can copy them straight into each vertex:
//!
//! * polygon: `[attrs…, ring_count, ring_len…, x, y, …]`
//! * line:    `[attrs…, closed, vertex_count, x, y, …]`
//! * point:   `[attrs…, x, y]`
//!
//! Coordinates are stored relative to the tile origin so they stay precise in
//! single precision.

use tilestream_core::Point;

use crate::mvt::{Feature, FeatureGeometry};
use crate::style::{AttributePlan, CompiledStyle};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubBatch {
    pub instructions: Vec<f32>,
    /// Floats of style attributes at the start of every record.
    pub attribute_size: usize,
    pub feature_count: usize,
}

impl SubBatch {
    fn with_plan(plan: Option<&AttributePlan>) -> Self {
        Self {
            attribute_size: plan.map_or(0, AttributePlan::size),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.feature_count == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryBatch {
    pub polygon: SubBatch,
    pub line: SubBatch,
    pub point: SubBatch,
}

impl GeometryBatch {
    /// Write render instructions for every feature a symbolizer applies to.
    /// Features of a type with no matching symbolizer are left out.
    pub fn from_features(features: &[Feature], style: &CompiledStyle, origin: Point) -> Self {
        let mut batch = Self {
            polygon: SubBatch::with_plan(style.fill.as_ref()),
            line: SubBatch::with_plan(style.stroke.as_ref()),
            point: SubBatch::with_plan(style.point.as_ref()),
        };
        let local = |p: &Point| [(p.x - origin.x) as f32, (p.y - origin.y) as f32];

        for feature in features {
            let layer = feature.layer.as_str();
            match &feature.geometry {
                FeatureGeometry::Polygons(polygons) => {
                    for rings in polygons {
                        if let Some(plan) = applicable(&style.fill, layer) {
                            let out = &mut batch.polygon;
                            plan.extract(&feature.properties, &mut out.instructions);
                            out.instructions.push(rings.len() as f32);
                            out.instructions.extend(rings.iter().map(|ring| ring.len() as f32));
                            for point in rings.iter().flatten() {
                                out.instructions.extend(local(point));
                            }
                            out.feature_count += 1;
                        }
                        if let Some(plan) = applicable(&style.stroke, layer) {
                            for ring in rings {
                                push_line(&mut batch.line, plan, feature, ring, true, &local);
                            }
                        }
                    }
                }
                FeatureGeometry::Lines(lines) => {
                    if let Some(plan) = applicable(&style.stroke, layer) {
                        for line in lines {
                            push_line(&mut batch.line, plan, feature, line, false, &local);
                        }
                    }
                }
                FeatureGeometry::Points(points) => {
                    if let Some(plan) = applicable(&style.point, layer) {
                        let out = &mut batch.point;
                        for point in points {
                            plan.extract(&feature.properties, &mut out.instructions);
                            out.instructions.extend(local(point));
                            out.feature_count += 1;
                        }
                    }
                }
            }
        }
        batch
    }
}

fn applicable<'a>(plan: &'a Option<AttributePlan>, layer: &str) -> Option<&'a AttributePlan> {
    plan.as_ref().filter(|plan| plan.applies_to(layer))
}

fn push_line(
    out: &mut SubBatch,
    plan: &AttributePlan,
    feature: &Feature,
    points: &[Point],
    closed: bool,
    local: &impl Fn(&Point) -> [f32; 2],
) {
    if points.len() < 2 {
        return;
    }
    plan.extract(&feature.properties, &mut out.instructions);
    out.instructions.push(if closed { 1.0 } else { 0.0 });
    out.instructions.push(points.len() as f32);
    for point in points {
        out.instructions.extend(local(point));
    }
    out.feature_count += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvt::Properties;
    use crate::style::{AttributeExpr, AttributeSpec, Literal, StyleDescriptor, Symbolizer};

    fn symbolizer(value: f32) -> Option<Symbolizer> {
        Some(Symbolizer {
            attributes: vec![AttributeSpec::new("v", AttributeExpr::Constant { value: Literal::Number(value) })],
            source_layers: None,
        })
    }

    fn square() -> Vec<Point> {
        vec![
            Point::new(10.0, 10.0),
            Point::new(20.0, 10.0),
            Point::new(20.0, 20.0),
            Point::new(10.0, 20.0),
        ]
    }

    fn feature(geometry: FeatureGeometry) -> Feature {
        Feature {
            layer: "layer".into(),
            id: None,
            geometry,
            properties: Properties::new(),
        }
    }

    #[test]
    fn test_polygon_instructions() {
        let style = StyleDescriptor { fill: symbolizer(5.0), ..Default::default() }.compile().unwrap();
        let features = [feature(FeatureGeometry::Polygons(vec![vec![square()]]))];
        let batch = GeometryBatch::from_features(&features, &style, Point::new(10.0, 10.0));
        assert_eq!(
            batch.polygon.instructions,
            vec![5.0, 1.0, 4.0, 0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0]
        );
        assert!(batch.line.is_empty());
        assert!(batch.point.is_empty());
    }

    #[test]
    fn test_outline_requires_stroke() {
        let style = StyleDescriptor { fill: symbolizer(1.0), stroke: symbolizer(2.0), ..Default::default() }
            .compile()
            .unwrap();
        let features = [feature(FeatureGeometry::Polygons(vec![vec![square()]]))];
        let batch = GeometryBatch::from_features(&features, &style, Point::new(0.0, 0.0));
        assert_eq!(batch.polygon.feature_count, 1);
        assert_eq!(batch.line.feature_count, 1);
        assert_eq!(&batch.line.instructions[..3], &[2.0, 1.0, 4.0]);
    }

    #[test]
    fn test_features_without_symbolizer_are_dropped() {
        let style = StyleDescriptor { point: symbolizer(1.0), ..Default::default() }.compile().unwrap();
        let features = [
            feature(FeatureGeometry::Lines(vec![square()])),
            feature(FeatureGeometry::Points(vec![Point::new(3.0, 4.0), Point::new(5.0, 6.0)])),
        ];
        let batch = GeometryBatch::from_features(&features, &style, Point::new(0.0, 0.0));
        assert!(batch.line.is_empty());
        assert_eq!(batch.point.instructions, vec![1.0, 3.0, 4.0, 1.0, 5.0, 6.0]);
        assert_eq!(batch.point.attribute_size, 1);
    }
}
