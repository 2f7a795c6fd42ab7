//! Request and response envelopes exchanged with the tessellation worker.

use serde::{Deserialize, Serialize};

use tilestream_core::Extent;

use crate::error::WorkerError;
use crate::style::StyleDescriptor;
use crate::tessellate::TileGeometry;

/// Caller-chosen token pairing one request with exactly one response.
pub type ExchangeId = u64;
pub type LayerId = String;

/// The only wire format the worker decodes.
pub const FORMAT_MVT: &str = "mvt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadTileRequest {
    pub exchange_id: ExchangeId,
    pub layer_id: LayerId,
    pub format: String,
    /// Tile footprint in map units.
    pub extent: Extent,
    pub resolution: f64,
    pub projection_code: String,
    /// Raw payload, moved into the worker and dropped once decoded.
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    RegisterStyle {
        exchange_id: ExchangeId,
        layer_id: LayerId,
        style: StyleDescriptor,
    },
    ReadTile(ReadTileRequest),
}

impl WorkerRequest {
    pub fn exchange_id(&self) -> ExchangeId {
        match self {
            WorkerRequest::RegisterStyle { exchange_id, .. } => *exchange_id,
            WorkerRequest::ReadTile(request) => request.exchange_id,
        }
    }

    pub fn layer_id(&self) -> &str {
        match self {
            WorkerRequest::RegisterStyle { layer_id, .. } => layer_id,
            WorkerRequest::ReadTile(request) => &request.layer_id,
        }
    }
}

/// Tessellated buffers for one tile. Vertices and indices are plain CPU-side
/// vectors; uploading them is the receiver's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileBuffers {
    pub exchange_id: ExchangeId,
    pub layer_id: LayerId,
    pub geometry: TileGeometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerResponse {
    StyleRegistered {
        exchange_id: ExchangeId,
        layer_id: LayerId,
    },
    TileBuffers(TileBuffers),
    Failed {
        exchange_id: ExchangeId,
        layer_id: LayerId,
        error: WorkerError,
    },
}

impl WorkerResponse {
    pub fn exchange_id(&self) -> ExchangeId {
        match self {
            WorkerResponse::StyleRegistered { exchange_id, .. } => *exchange_id,
            WorkerResponse::TileBuffers(buffers) => buffers.exchange_id,
            WorkerResponse::Failed { exchange_id, .. } => *exchange_id,
        }
    }

    pub fn layer_id(&self) -> &str {
        match self {
            WorkerResponse::StyleRegistered { layer_id, .. } => layer_id,
            WorkerResponse::TileBuffers(buffers) => &buffers.layer_id,
            WorkerResponse::Failed { layer_id, .. } => layer_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_is_tagged() {
        let request = WorkerRequest::RegisterStyle {
            exchange_id: 3,
            layer_id: "roads".into(),
            style: StyleDescriptor::default(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "registerStyle");
        assert_eq!(json["exchange_id"], 3);
        assert_eq!(request.layer_id(), "roads");
    }

    #[test]
    fn test_failed_response_carries_ids() {
        let response = WorkerResponse::Failed {
            exchange_id: 9,
            layer_id: "a".into(),
            error: WorkerError::UnsupportedFormat("geojson".into()),
        };
        assert_eq!(response.exchange_id(), 9);
        let back: WorkerResponse = serde_json::from_str(&serde_json::to_string(&response).unwrap()).unwrap();
        assert_eq!(back, response);
    }
}
