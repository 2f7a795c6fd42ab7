//! Mapbox Vector Tile decoding.
//!
//! The protobuf layer comes from `geozero`'s generated `Tile` messages; the
//! geometry command stream is decoded here so that one malformed feature can
//! be skipped without failing the whole tile.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::GzDecoder;
use geozero::mvt::tile::{self, GeomType};
use geozero::mvt::Tile;
use geozero::mvt::Message;
use serde::{Deserialize, Serialize};

use tilestream_core::{Extent, Point};

use crate::error::{MalformedFeature, WorkerError};

/// Layer extent assumed when a layer does not declare one.
pub const DEFAULT_LAYER_EXTENT: u32 = 4096;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// ── Geometry commands ────────────────────────────────────────────────

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

// ── Features ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            PropertyValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            PropertyValue::String(s) => s.trim().parse().ok(),
        }
    }

    /// String form used by match expressions.
    pub fn match_key(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Number(n) => n.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
        }
    }

    fn from_tile_value(value: &tile::Value) -> Option<Self> {
        if let Some(v) = &value.string_value {
            return Some(PropertyValue::String(v.clone()));
        }
        if let Some(v) = value.bool_value {
            return Some(PropertyValue::Bool(v));
        }
        value
            .double_value
            .or(value.float_value.map(f64::from))
            .or(value.int_value.map(|v| v as f64))
            .or(value.uint_value.map(|v| v as f64))
            .or(value.sint_value.map(|v| v as f64))
            .map(PropertyValue::Number)
    }
}

pub type Properties = HashMap<String, PropertyValue>;

/// Feature geometry in map coordinates (y up).
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Points(Vec<Point>),
    Lines(Vec<Vec<Point>>),
    /// Each polygon is a list of rings, exterior first, rings left open.
    Polygons(Vec<Vec<Vec<Point>>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub layer: String,
    pub id: Option<u64>,
    pub geometry: FeatureGeometry,
    pub properties: Properties,
}

// ── Decoding ─────────────────────────────────────────────────────────

/// Decode the protobuf envelope, inflating gzip payloads first.
pub fn decode_tile(raw: &[u8]) -> Result<Tile, WorkerError> {
    if raw.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(raw)
            .read_to_end(&mut inflated)
            .map_err(|e| WorkerError::Decode(format!("gzip: {e}")))?;
        return Tile::decode(inflated.as_slice()).map_err(|e| WorkerError::Decode(e.to_string()));
    }
    Tile::decode(raw).map_err(|e| WorkerError::Decode(e.to_string()))
}

/// Decode every feature of a tile whose footprint is `extent` in map units.
/// Features with malformed geometry are skipped.
pub fn read_features(raw: &[u8], extent: &Extent) -> Result<Vec<Feature>, WorkerError> {
    let tile = decode_tile(raw)?;
    let mut features = Vec::new();
    let mut skipped = 0usize;

    for layer in &tile.layers {
        let layer_extent = f64::from(layer.extent.unwrap_or(DEFAULT_LAYER_EXTENT).max(1));
        let to_map = |x: i32, y: i32| {
            Point::new(
                extent.min_x + f64::from(x) / layer_extent * extent.width(),
                extent.max_y - f64::from(y) / layer_extent * extent.height(),
            )
        };

        for feature in &layer.features {
            match read_geometry(feature, &to_map) {
                Ok(geometry) => features.push(Feature {
                    layer: layer.name.clone(),
                    id: feature.id,
                    geometry,
                    properties: read_properties(layer, feature),
                }),
                Err(e) => {
                    skipped += 1;
                    log::debug!(
                        "skipping feature {:?} in layer '{}': {}",
                        feature.id,
                        layer.name,
                        e
                    );
                }
            }
        }
    }
    if skipped > 0 {
        log::debug!("decoded {} features, skipped {}", features.len(), skipped);
    }
    Ok(features)
}

fn read_properties(layer: &tile::Layer, feature: &tile::Feature) -> Properties {
    let mut properties = Properties::new();
    for pair in feature.tags.chunks_exact(2) {
        let Some(key) = layer.keys.get(pair[0] as usize) else {
            continue;
        };
        let Some(value) = layer.values.get(pair[1] as usize) else {
            continue;
        };
        if let Some(value) = PropertyValue::from_tile_value(value) {
            properties.insert(key.clone(), value);
        }
    }
    properties
}

fn read_geometry(
    feature: &tile::Feature,
    to_map: &impl Fn(i32, i32) -> Point,
) -> Result<FeatureGeometry, MalformedFeature> {
    let paths = decode_paths(&feature.geometry)?;
    if paths.is_empty() {
        return Err(MalformedFeature::Empty);
    }
    let project = |path: &[(i32, i32)]| -> Vec<Point> {
        path.iter().map(|&(x, y)| to_map(x, y)).collect()
    };

    match feature.r#type() {
        GeomType::Point => Ok(FeatureGeometry::Points(
            paths.iter().flat_map(|path| project(path)).collect(),
        )),
        GeomType::Linestring => {
            let lines: Vec<Vec<Point>> = paths
                .iter()
                .filter(|path| path.len() >= 2)
                .map(|path| project(path))
                .collect();
            if lines.is_empty() {
                return Err(MalformedFeature::Empty);
            }
            Ok(FeatureGeometry::Lines(lines))
        }
        GeomType::Polygon => {
            let polygons: Vec<Vec<Vec<Point>>> = classify_rings(paths)
                .into_iter()
                .map(|rings| rings.iter().map(|ring| project(ring)).collect())
                .collect();
            if polygons.is_empty() {
                return Err(MalformedFeature::Empty);
            }
            Ok(FeatureGeometry::Polygons(polygons))
        }
        GeomType::Unknown => Err(MalformedFeature::UnknownType),
    }
}

fn decode_zigzag(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Decode the command stream into paths of tile-space integer coordinates.
/// Every `MoveTo` starts a new path; `ClosePath` is implicit in the output.
fn decode_paths(commands: &[u32]) -> Result<Vec<Vec<(i32, i32)>>, MalformedFeature> {
    let mut paths = Vec::new();
    let mut path: Vec<(i32, i32)> = Vec::new();
    let (mut x, mut y) = (0i32, 0i32);
    let mut cursor = 0usize;

    while cursor < commands.len() {
        let command = commands[cursor];
        cursor += 1;
        let (id, count) = (command & 0x7, (command >> 3) as usize);
        match id {
            CMD_MOVE_TO | CMD_LINE_TO => {
                if cursor + 2 * count > commands.len() {
                    return Err(MalformedFeature::Truncated);
                }
                for _ in 0..count {
                    x = x.wrapping_add(decode_zigzag(commands[cursor]));
                    y = y.wrapping_add(decode_zigzag(commands[cursor + 1]));
                    cursor += 2;
                    if id == CMD_MOVE_TO && !path.is_empty() {
                        paths.push(std::mem::take(&mut path));
                    }
                    path.push((x, y));
                }
            }
            CMD_CLOSE_PATH => {}
            other => return Err(MalformedFeature::UnknownCommand(other)),
        }
    }
    if !path.is_empty() {
        paths.push(path);
    }
    Ok(paths)
}

/// Shoelace area in tile space (y down).
fn signed_area(ring: &[(i32, i32)]) -> f64 {
    let n = ring.len();
    let mut area = 0.0;
    for i in 0..n {
        let (x0, y0) = ring[i];
        let (x1, y1) = ring[(i + 1) % n];
        area += f64::from(x0) * f64::from(y1) - f64::from(x1) * f64::from(y0);
    }
    area / 2.0
}

/// Group rings into polygons. The winding of the first non-degenerate ring
/// marks exteriors; rings with the opposite winding are holes of the polygon
/// before them. Degenerate rings are dropped.
fn classify_rings(paths: Vec<Vec<(i32, i32)>>) -> Vec<Vec<Vec<(i32, i32)>>> {
    let mut polygons: Vec<Vec<Vec<(i32, i32)>>> = Vec::new();
    let mut exterior_sign = 0.0f64;
    for mut ring in paths {
        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        if ring.len() < 3 {
            continue;
        }
        let area = signed_area(&ring);
        if area == 0.0 {
            continue;
        }
        if exterior_sign == 0.0 {
            exterior_sign = area.signum();
        }
        if area.signum() == exterior_sign {
            polygons.push(vec![ring]);
        } else if let Some(polygon) = polygons.last_mut() {
            polygon.push(ring);
        }
    }
    polygons
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn command(id: u32, count: u32) -> u32 {
        (count << 3) | id
    }

    pub(crate) fn zigzag(v: i32) -> u32 {
        ((v << 1) ^ (v >> 31)) as u32
    }

    /// Encode one path as MoveTo + LineTo (+ ClosePath for rings).
    pub(crate) fn encode_path(points: &[(i32, i32)], close: bool, cursor: &mut (i32, i32), out: &mut Vec<u32>) {
        for (i, &(x, y)) in points.iter().enumerate() {
            if i == 0 {
                out.push(command(CMD_MOVE_TO, 1));
            } else if i == 1 {
                out.push(command(CMD_LINE_TO, points.len() as u32 - 1));
            }
            out.push(zigzag(x - cursor.0));
            out.push(zigzag(y - cursor.1));
            *cursor = (x, y);
        }
        if close {
            out.push(command(CMD_CLOSE_PATH, 1));
        }
    }

    #[test]
    fn test_zigzag() {
        for v in [0, 1, -1, 2, -2, 4095, -4096] {
            assert_eq!(decode_zigzag(zigzag(v)), v);
        }
    }

    #[test]
    fn test_decode_square_ring() {
        let mut geometry = Vec::new();
        encode_path(&[(0, 0), (10, 0), (10, 10), (0, 10)], true, &mut (0, 0), &mut geometry);
        let paths = decode_paths(&geometry).unwrap();
        assert_eq!(paths, vec![vec![(0, 0), (10, 0), (10, 10), (0, 10)]]);
    }

    #[test]
    fn test_decode_multipoint() {
        let geometry = vec![command(CMD_MOVE_TO, 2), zigzag(5), zigzag(5), zigzag(3), zigzag(-2)];
        assert_eq!(decode_paths(&geometry).unwrap(), vec![vec![(5, 5)], vec![(8, 3)]]);
    }

    #[test]
    fn test_truncated_geometry_is_malformed() {
        let geometry = vec![command(CMD_MOVE_TO, 1), zigzag(5)];
        assert_eq!(decode_paths(&geometry), Err(MalformedFeature::Truncated));
        assert_eq!(decode_paths(&[command(5, 1)]), Err(MalformedFeature::UnknownCommand(5)));
    }

    #[test]
    fn test_classify_rings_with_hole() {
        let outer = vec![(0, 0), (10, 0), (10, 10), (0, 10)];
        let hole = vec![(2, 2), (2, 8), (8, 8), (8, 2)];
        let other = vec![(20, 20), (30, 20), (30, 30), (20, 30)];
        let polygons = classify_rings(vec![outer.clone(), hole.clone(), other.clone()]);
        assert_eq!(polygons, vec![vec![outer, hole], vec![other]]);
    }

    #[test]
    fn test_read_features_maps_to_extent() {
        let mut geometry = Vec::new();
        encode_path(&[(1024, 1024)], false, &mut (0, 0), &mut geometry);
        let tile = Tile {
            layers: vec![tile::Layer {
                version: 2,
                name: "poi".into(),
                features: vec![
                    tile::Feature {
                        id: Some(7),
                        tags: vec![0, 0],
                        r#type: Some(GeomType::Point as i32),
                        geometry,
                    },
                    tile::Feature {
                        id: Some(8),
                        tags: vec![],
                        r#type: Some(GeomType::Point as i32),
                        geometry: vec![command(CMD_MOVE_TO, 3), 2],
                    },
                ],
                keys: vec!["name".into()],
                values: vec![tile::Value {
                    string_value: Some("fountain".into()),
                    ..Default::default()
                }],
                extent: Some(4096),
            }],
        };
        let raw = tile.encode_to_vec();
        let extent = Extent::new(1024.0, 3072.0, 1536.0, 3584.0);
        let features = read_features(&raw, &extent).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].geometry, FeatureGeometry::Points(vec![Point::new(1152.0, 3456.0)]));
        assert_eq!(
            features[0].properties.get("name"),
            Some(&PropertyValue::String("fountain".into()))
        );
    }

    #[test]
    fn test_gzip_payload() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let tile = Tile { layers: vec![] };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tile.encode_to_vec()).unwrap();
        let raw = encoder.finish().unwrap();
        assert!(read_features(&raw, &Extent::new(0.0, 0.0, 1.0, 1.0)).unwrap().is_empty());
        assert!(matches!(decode_tile(&[0x1f, 0x8b, 0x00]), Err(WorkerError::Decode(_))));
    }
}
