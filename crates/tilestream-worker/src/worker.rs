use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::batch::GeometryBatch;
use crate::error::WorkerError;
use crate::mvt;
use crate::protocol::{
    LayerId, ReadTileRequest, TileBuffers, WorkerRequest, WorkerResponse, FORMAT_MVT,
};
use crate::style::CompiledStyle;
use crate::tessellate::{self, TileGeometry};

// ── Layer registry ───────────────────────────────────────────────────

/// Compiled styles by layer id. Lives on the worker thread only.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    styles: HashMap<LayerId, CompiledStyle>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a compiled style, replacing any previous one for the layer.
    pub fn register(&mut self, layer_id: LayerId, style: CompiledStyle) {
        self.styles.insert(layer_id, style);
    }

    pub fn get(&self, layer_id: &str) -> Option<&CompiledStyle> {
        self.styles.get(layer_id)
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}

// ── Request handling ─────────────────────────────────────────────────

/// Serve one request. Every request yields exactly one response carrying the
/// request's exchange id.
pub fn handle_request(registry: &mut LayerRegistry, request: WorkerRequest) -> WorkerResponse {
    match request {
        WorkerRequest::RegisterStyle {
            exchange_id,
            layer_id,
            style,
        } => match style.compile() {
            Ok(compiled) => {
                log::info!("registered style for layer '{}'", layer_id);
                registry.register(layer_id.clone(), compiled);
                WorkerResponse::StyleRegistered {
                    exchange_id,
                    layer_id,
                }
            }
            Err(error) => WorkerResponse::Failed {
                exchange_id,
                layer_id,
                error,
            },
        },
        WorkerRequest::ReadTile(request) => {
            let exchange_id = request.exchange_id;
            let layer_id = request.layer_id.clone();
            match read_tile(registry, request) {
                Ok(geometry) => WorkerResponse::TileBuffers(TileBuffers {
                    exchange_id,
                    layer_id,
                    geometry,
                }),
                Err(error) => {
                    log::warn!("exchange {} for layer '{}' failed: {}", exchange_id, layer_id, error);
                    WorkerResponse::Failed {
                        exchange_id,
                        layer_id,
                        error,
                    }
                }
            }
        }
    }
}

fn read_tile(registry: &LayerRegistry, request: ReadTileRequest) -> Result<TileGeometry, WorkerError> {
    if request.format != FORMAT_MVT {
        return Err(WorkerError::UnsupportedFormat(request.format));
    }
    let style = registry
        .get(&request.layer_id)
        .ok_or_else(|| WorkerError::UnknownLayer(request.layer_id.clone()))?;

    let features = mvt::read_features(&request.raw, &request.extent)?;
    drop(request.raw);

    let batch = GeometryBatch::from_features(&features, style, request.extent.bottom_left());
    let geometry = tessellate::tessellate(&batch);
    log::debug!(
        "exchange {}: {} features -> {} polygon, {} line, {} point indices",
        request.exchange_id,
        features.len(),
        geometry.polygon.indices.len(),
        geometry.line.indices.len(),
        geometry.point.indices.len()
    );
    Ok(geometry)
}

// ── Worker thread ────────────────────────────────────────────────────

/// Handle to the tessellation thread.
///
/// The thread owns its [`LayerRegistry`] and talks to the caller only through
/// two channels. Responses are polled without blocking.
pub struct TessellationWorker {
    requests: Option<flume::Sender<WorkerRequest>>,
    responses: flume::Receiver<WorkerResponse>,
    handle: Option<JoinHandle<()>>,
}

impl TessellationWorker {
    pub fn spawn() -> Result<Self, WorkerError> {
        let (request_tx, request_rx) = flume::unbounded::<WorkerRequest>();
        let (response_tx, response_rx) = flume::unbounded::<WorkerResponse>();
        let handle = thread::Builder::new()
            .name("tilestream-tessellation".into())
            .spawn(move || run(request_rx, response_tx))
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;
        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            handle: Some(handle),
        })
    }

    pub fn post(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.requests
            .as_ref()
            .ok_or(WorkerError::Disconnected)?
            .send(request)
            .map_err(|_| WorkerError::Disconnected)
    }

    /// A sender other threads can post requests through.
    pub fn request_sender(&self) -> Result<flume::Sender<WorkerRequest>, WorkerError> {
        self.requests.clone().ok_or(WorkerError::Disconnected)
    }

    pub fn try_recv(&self) -> Option<WorkerResponse> {
        self.responses.try_recv().ok()
    }

    /// Drain every response that is ready right now.
    pub fn try_iter(&self) -> impl Iterator<Item = WorkerResponse> + '_ {
        self.responses.try_iter()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerResponse> {
        self.responses.recv_timeout(timeout).ok()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Close the request channel and join the thread. The thread exits once
    /// every sender handed out by [`TessellationWorker::request_sender`] is
    /// dropped as well.
    pub fn terminate(&mut self) {
        self.requests = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("tessellation worker panicked");
            }
        }
    }
}

impl Drop for TessellationWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run(requests: flume::Receiver<WorkerRequest>, responses: flume::Sender<WorkerResponse>) {
    let mut registry = LayerRegistry::new();
    log::info!("tessellation worker started");
    for request in requests.iter() {
        if responses.send(handle_request(&mut registry, request)).is_err() {
            break;
        }
    }
    log::info!("tessellation worker stopped with {} layers registered", registry.len());
}
