//! Literal style descriptors and the attribute plans compiled from them.
//!
//! A style names up to three symbolizers (fill, stroke, point). Each symbolizer
//! is an ordered list of named attribute expressions; compiling one yields an
//! [`AttributePlan`] whose output length is the same for every feature, so the
//! tessellators can lay out vertices with a fixed stride.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::mvt::{Properties, PropertyValue};

// ── Descriptor ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleDescriptor {
    /// Applied to polygon interiors.
    pub fill: Option<Symbolizer>,
    /// Applied to line features and, when present, polygon outlines.
    pub stroke: Option<Symbolizer>,
    pub point: Option<Symbolizer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Symbolizer {
    pub attributes: Vec<AttributeSpec>,
    /// Restrict the symbolizer to these source layers. `None` matches all.
    pub source_layers: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub value: AttributeExpr,
}

impl AttributeSpec {
    pub fn new(name: impl Into<String>, value: AttributeExpr) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeExpr {
    Constant { value: Literal },
    /// Numeric feature property. Missing or non-numeric values use `default`.
    Property {
        name: String,
        #[serde(default)]
        default: f32,
    },
    Color { value: Literal },
    /// Switch on the string form of a property.
    Match {
        property: String,
        cases: BTreeMap<String, Literal>,
        default: Literal,
    },
}

/// A literal attribute value: a number, a list of numbers, or a CSS hex color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Number(f32),
    Values(Vec<f32>),
    Color(String),
}

impl Literal {
    fn resolve(&self) -> Result<Vec<f32>, WorkerError> {
        match self {
            Literal::Number(n) => Ok(vec![*n]),
            Literal::Values(values) => Ok(values.clone()),
            Literal::Color(text) => parse_hex_color(text).map(|rgba| pack_color(rgba).to_vec()),
        }
    }

    fn resolve_color(&self) -> Result<[f32; 2], WorkerError> {
        match self {
            Literal::Color(text) => parse_hex_color(text).map(pack_color),
            Literal::Values(values) if values.len() == 4 => {
                Ok(pack_color([values[0], values[1], values[2], values[3]]))
            }
            other => Err(WorkerError::InvalidStyle(format!(
                "expected a color, got {other:?}"
            ))),
        }
    }
}

impl StyleDescriptor {
    pub fn from_json(json: &str) -> Result<Self, WorkerError> {
        serde_json::from_str(json).map_err(|e| WorkerError::InvalidStyle(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, WorkerError> {
        serde_json::to_string_pretty(self).map_err(|e| WorkerError::InvalidStyle(e.to_string()))
    }

    pub fn compile(&self) -> Result<CompiledStyle, WorkerError> {
        Ok(CompiledStyle {
            fill: self.fill.as_ref().map(AttributePlan::compile).transpose()?,
            stroke: self.stroke.as_ref().map(AttributePlan::compile).transpose()?,
            point: self.point.as_ref().map(AttributePlan::compile).transpose()?,
        })
    }
}

// ── Colors ───────────────────────────────────────────────────────────

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` into `[r, g, b, a]` with channels in
/// `0..=255` and alpha in `0..=1`.
pub fn parse_hex_color(text: &str) -> Result<[f32; 4], WorkerError> {
    let invalid = || WorkerError::InvalidStyle(format!("invalid color '{text}'"));
    let hex = text.strip_prefix('#').ok_or_else(invalid)?;
    if !hex.is_ascii() {
        return Err(invalid());
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).map(f32::from).map_err(|_| invalid());
    match hex.len() {
        3 => {
            let mut rgb = [0.0; 3];
            for (i, c) in hex.chars().enumerate() {
                rgb[i] = channel(&format!("{c}{c}"))?;
            }
            Ok([rgb[0], rgb[1], rgb[2], 1.0])
        }
        6 | 8 => {
            let r = channel(&hex[0..2])?;
            let g = channel(&hex[2..4])?;
            let b = channel(&hex[4..6])?;
            let a = if hex.len() == 8 {
                channel(&hex[6..8])? / 255.0
            } else {
                1.0
            };
            Ok([r, g, b, a])
        }
        _ => Err(invalid()),
    }
}

/// Pack an RGBA color into two floats, `r * 256 + g` and `b * 256 + a * 255`,
/// each exactly representable in an `f32`.
pub fn pack_color(rgba: [f32; 4]) -> [f32; 2] {
    let [r, g, b, a] = rgba;
    [r * 256.0 + g, b * 256.0 + (a * 255.0).round()]
}

// ── Compiled plans ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum CompiledExpr {
    Constant(Vec<f32>),
    Property { name: String, default: f32 },
    Match {
        property: String,
        cases: HashMap<String, Vec<f32>>,
        default: Vec<f32>,
    },
}

/// Per-symbolizer extraction plan with a fixed output length.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributePlan {
    descriptors: Vec<AttributeDescriptor>,
    exprs: Vec<CompiledExpr>,
    size: usize,
    source_layers: Option<Vec<String>>,
}

impl AttributePlan {
    pub fn compile(symbolizer: &Symbolizer) -> Result<Self, WorkerError> {
        let mut descriptors = Vec::with_capacity(symbolizer.attributes.len());
        let mut exprs = Vec::with_capacity(symbolizer.attributes.len());
        for spec in &symbolizer.attributes {
            let expr = match &spec.value {
                AttributeExpr::Constant { value } => CompiledExpr::Constant(value.resolve()?),
                AttributeExpr::Color { value } => {
                    CompiledExpr::Constant(value.resolve_color()?.to_vec())
                }
                AttributeExpr::Property { name, default } => CompiledExpr::Property {
                    name: name.clone(),
                    default: *default,
                },
                AttributeExpr::Match {
                    property,
                    cases,
                    default,
                } => {
                    let default = default.resolve()?;
                    let mut resolved = HashMap::with_capacity(cases.len());
                    for (key, literal) in cases {
                        let value = literal.resolve()?;
                        if value.len() != default.len() {
                            return Err(WorkerError::InvalidStyle(format!(
                                "attribute '{}': case '{key}' has {} values, default has {}",
                                spec.name,
                                value.len(),
                                default.len()
                            )));
                        }
                        resolved.insert(key.clone(), value);
                    }
                    CompiledExpr::Match {
                        property: property.clone(),
                        cases: resolved,
                        default,
                    }
                }
            };
            let size = match &expr {
                CompiledExpr::Constant(values) => values.len(),
                CompiledExpr::Property { .. } => 1,
                CompiledExpr::Match { default, .. } => default.len(),
            };
            if size == 0 {
                return Err(WorkerError::InvalidStyle(format!(
                    "attribute '{}' is empty",
                    spec.name
                )));
            }
            descriptors.push(AttributeDescriptor {
                name: spec.name.clone(),
                size,
            });
            exprs.push(expr);
        }
        let size = descriptors.iter().map(|d| d.size).sum();
        Ok(Self {
            descriptors,
            exprs,
            size,
            source_layers: symbolizer.source_layers.clone(),
        })
    }

    pub fn descriptors(&self) -> &[AttributeDescriptor] {
        &self.descriptors
    }

    /// Number of floats [`AttributePlan::extract`] appends per feature.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn applies_to(&self, layer: &str) -> bool {
        self.source_layers
            .as_ref()
            .map_or(true, |layers| layers.iter().any(|l| l == layer))
    }

    /// Append exactly [`AttributePlan::size`] values for one feature.
    pub fn extract(&self, properties: &Properties, out: &mut Vec<f32>) {
        for expr in &self.exprs {
            match expr {
                CompiledExpr::Constant(values) => out.extend_from_slice(values),
                CompiledExpr::Property { name, default } => {
                    let value = properties
                        .get(name)
                        .and_then(PropertyValue::as_f64)
                        .map(|v| v as f32)
                        .unwrap_or(*default);
                    out.push(value);
                }
                CompiledExpr::Match {
                    property,
                    cases,
                    default,
                } => {
                    let value = properties
                        .get(property)
                        .and_then(|p| cases.get(&p.match_key()))
                        .unwrap_or(default);
                    out.extend_from_slice(value);
                }
            }
        }
    }
}

/// The compiled form of a [`StyleDescriptor`], owned by the worker's registry.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStyle {
    pub fill: Option<AttributePlan>,
    pub stroke: Option<AttributePlan>,
    pub point: Option<AttributePlan>,
}
