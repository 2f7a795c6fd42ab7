//! Moves tiles from `Idle` to a terminal state.
//!
//! Fetch threads pull payloads and forward them straight to the tessellation
//! worker; the render thread polls the worker once per frame, matches each
//! response to its pending exchange and uploads the buffers. A response whose
//! exchange was abandoned, or whose tile is gone, is dropped. Abandoned jobs
//! still waiting for a fetch thread are skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};

use tilestream_core::{Extent, TileCache, TileId, TileState};
use tilestream_io::{FetchError, SourceConfig, TileFetcher};
use tilestream_worker::{
    ExchangeId, Exchanges, LayerId, ReadTileRequest, StyleDescriptor, TessellationWorker,
    WorkerRequest, WorkerResponse,
};

use crate::error::RenderError;
use crate::gpu::GpuContext;
use crate::representation::{RenderTile, TileRepresentation};

/// What a pending exchange was opened for.
#[derive(Debug, Clone)]
enum Pending {
    Style,
    Tile { id: TileId, cancelled: Arc<AtomicBool> },
}

struct FetchJob {
    url: String,
    request: ReadTileRequest,
    cancelled: Arc<AtomicBool>,
}

struct FetchFailure {
    exchange_id: ExchangeId,
    error: FetchError,
}

/// Counters over the loader's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderStats {
    pub uploaded: usize,
    pub failed: usize,
    /// Responses that matched no pending exchange or no live tile.
    pub dropped: usize,
}

/// Tiles that reached a terminal state during one [`TileLoader::poll`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadEvents {
    pub ready: Vec<TileId>,
    pub failed: Vec<TileId>,
}

impl LoadEvents {
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.failed.is_empty()
    }
}

pub struct TileLoader {
    layer_id: LayerId,
    format: String,
    projection: String,
    jobs: Option<flume::Sender<FetchJob>>,
    /// Receiver kept to empty the queue on shutdown.
    backlog: flume::Receiver<FetchJob>,
    stop: Arc<AtomicBool>,
    failures: flume::Receiver<FetchFailure>,
    fetch_threads: Vec<JoinHandle<()>>,
    exchanges: Exchanges<Pending>,
    stats: LoaderStats,
    style_ready: bool,
    worker: TessellationWorker,
}

impl TileLoader {
    pub fn new(
        config: &SourceConfig,
        layer_id: impl Into<LayerId>,
        fetcher: Arc<dyn TileFetcher>,
    ) -> Result<Self, RenderError> {
        let worker = TessellationWorker::spawn()?;
        let (job_tx, job_rx) = flume::unbounded::<FetchJob>();
        let (failure_tx, failure_rx) = flume::unbounded::<FetchFailure>();
        let stop = Arc::new(AtomicBool::new(false));

        let mut fetch_threads = Vec::with_capacity(config.fetch_threads);
        for n in 0..config.fetch_threads.max(1) {
            let jobs = job_rx.clone();
            let failures = failure_tx.clone();
            let requests = worker.request_sender()?;
            let fetcher = fetcher.clone();
            let stop = stop.clone();
            let handle = thread::Builder::new()
                .name(format!("tilestream-fetch-{n}"))
                .spawn(move || fetch_loop(fetcher, jobs, requests, failures, stop))?;
            fetch_threads.push(handle);
        }
        log::info!("tile loader started with {} fetch threads", fetch_threads.len());

        Ok(Self {
            layer_id: layer_id.into(),
            format: config.format.clone(),
            projection: config.projection.clone(),
            jobs: Some(job_tx),
            backlog: job_rx,
            stop,
            failures: failure_rx,
            fetch_threads,
            exchanges: Exchanges::new(),
            stats: LoaderStats::default(),
            style_ready: false,
            worker,
        })
    }

    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats
    }

    /// Exchanges still waiting for a response.
    pub fn pending(&self) -> usize {
        self.exchanges.len()
    }

    pub fn style_ready(&self) -> bool {
        self.style_ready
    }

    /// Send the layer's style to the worker. Requests are served in order, so
    /// tiles loaded afterwards already see it.
    pub fn register_style(&mut self, style: StyleDescriptor) -> Result<ExchangeId, RenderError> {
        let exchange_id = self.exchanges.open(Pending::Style);
        let request = WorkerRequest::RegisterStyle {
            exchange_id,
            layer_id: self.layer_id.clone(),
            style,
        };
        if let Err(e) = self.worker.post(request) {
            self.exchanges.abandon(exchange_id);
            return Err(e.into());
        }
        Ok(exchange_id)
    }

    /// Start loading an `Idle` tile: `Idle → Loading` and queue the fetch.
    /// A tile without a URL fails immediately. Returns whether a fetch started.
    pub fn load(&mut self, id: TileId, tile: &mut RenderTile, extent: Extent, resolution: f64) -> bool {
        if tile.state() != TileState::Idle {
            return false;
        }
        let Some(url) = tile.url().map(str::to_string) else {
            log::warn!("tile {} has no URL", tile.key());
            tile.set_state(TileState::Error);
            self.stats.failed += 1;
            return false;
        };
        let Some(jobs) = &self.jobs else {
            tile.set_state(TileState::Error);
            return false;
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let exchange_id = self.exchanges.open(Pending::Tile {
            id,
            cancelled: cancelled.clone(),
        });
        let job = FetchJob {
            url,
            cancelled,
            request: ReadTileRequest {
                exchange_id,
                layer_id: self.layer_id.clone(),
                format: self.format.clone(),
                extent,
                resolution,
                projection_code: self.projection.clone(),
                raw: Vec::new(),
            },
        };
        if jobs.send(job).is_err() {
            self.abandon(exchange_id);
            tile.set_state(TileState::Error);
            return false;
        }
        tile.data.set_pending(exchange_id);
        tile.set_state(TileState::Loading)
    }

    /// Give up on a tile's load. Its response will be dropped on arrival.
    pub fn abort(&mut self, tile: &mut RenderTile) {
        if let Some(exchange_id) = tile.data.take_pending() {
            self.abandon(exchange_id);
        }
        if matches!(tile.state(), TileState::Idle | TileState::Loading) {
            tile.set_state(TileState::Abort);
        }
    }

    /// Free everything an evicted tile holds.
    pub fn release(&mut self, tile: &mut TileRepresentation, gpu: &mut dyn GpuContext) {
        if let Some(exchange_id) = tile.pending() {
            self.abandon(exchange_id);
        }
        tile.dispose(gpu);
    }

    /// Forget an exchange and tell the fetch threads to skip its job.
    fn abandon(&mut self, exchange_id: ExchangeId) {
        if let Some(Pending::Tile { cancelled, .. }) = self.exchanges.settle(exchange_id) {
            cancelled.store(true, Ordering::Relaxed);
        }
    }

    /// Apply every fetch failure and worker response that is ready, without
    /// blocking. Must run on the thread that owns `gpu`.
    pub fn poll(
        &mut self,
        cache: &mut TileCache<TileRepresentation>,
        gpu: &mut dyn GpuContext,
    ) -> LoadEvents {
        let mut events = LoadEvents::default();

        while let Ok(failure) = self.failures.try_recv() {
            let Some(id) = self.settle_tile(failure.exchange_id, cache) else {
                continue;
            };
            if let Some(tile) = cache.get_mut(id) {
                log::warn!("fetching tile {} failed: {}", tile.key(), failure.error);
                tile.data.take_pending();
                tile.set_state(TileState::Error);
            }
            self.stats.failed += 1;
            events.failed.push(id);
        }

        while let Some(response) = self.worker.try_recv() {
            let exchange_id = response.exchange_id();
            match self.exchanges.get(exchange_id).cloned() {
                Some(Pending::Style) => {
                    self.exchanges.settle(exchange_id);
                    self.on_style_response(response);
                    continue;
                }
                Some(Pending::Tile { .. }) => {}
                None => {
                    log::trace!("dropping response to unknown exchange {}", exchange_id);
                    self.stats.dropped += 1;
                    continue;
                }
            }
            let Some(id) = self.settle_tile(exchange_id, cache) else {
                continue;
            };
            let Some(tile) = cache.get_mut(id) else {
                continue;
            };
            tile.data.take_pending();
            match response {
                WorkerResponse::TileBuffers(buffers) => match tile.data.upload(gpu, buffers.geometry) {
                    Ok(()) => {
                        tile.set_state(TileState::Loaded);
                        self.stats.uploaded += 1;
                        events.ready.push(id);
                    }
                    Err(e) => {
                        log::warn!("uploading tile {} failed: {}", tile.key(), e);
                        tile.set_state(TileState::Error);
                        self.stats.failed += 1;
                        events.failed.push(id);
                    }
                },
                WorkerResponse::Failed { error, .. } => {
                    log::warn!("tessellating tile {} failed: {}", tile.key(), error);
                    tile.set_state(TileState::Error);
                    self.stats.failed += 1;
                    events.failed.push(id);
                }
                WorkerResponse::StyleRegistered { .. } => {
                    log::warn!("unexpected style acknowledgement for tile {}", tile.key());
                    tile.set_state(TileState::Error);
                    self.stats.failed += 1;
                    events.failed.push(id);
                }
            }
        }
        events
    }

    /// Settle a tile exchange and return its tile when it is still alive and
    /// loading. Anything else counts as a dropped response.
    fn settle_tile(
        &mut self,
        exchange_id: ExchangeId,
        cache: &TileCache<TileRepresentation>,
    ) -> Option<TileId> {
        let id = match self.exchanges.settle(exchange_id) {
            Some(Pending::Tile { id, .. }) => id,
            _ => {
                log::trace!("dropping result of abandoned exchange {}", exchange_id);
                self.stats.dropped += 1;
                return None;
            }
        };
        let live = cache
            .get(id)
            .is_some_and(|tile| tile.state() == TileState::Loading && tile.data.pending() == Some(exchange_id));
        if !live {
            log::trace!("dropping result for stale tile {}", id);
            self.stats.dropped += 1;
            return None;
        }
        Some(id)
    }

    fn on_style_response(&mut self, response: WorkerResponse) {
        match response {
            WorkerResponse::StyleRegistered { layer_id, .. } => {
                log::info!("style for layer '{}' is ready", layer_id);
                self.style_ready = true;
            }
            WorkerResponse::Failed { layer_id, error, .. } => {
                log::warn!("style for layer '{}' was rejected: {}", layer_id, error);
            }
            WorkerResponse::TileBuffers(_) => {
                log::warn!("unexpected tile buffers for a style exchange");
            }
        }
    }

    /// Stop the fetch threads and the worker. Pending exchanges are abandoned
    /// and queued fetches are discarded; only fetches already in flight finish.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.jobs = None;
        let discarded = self.backlog.drain().count();
        if discarded > 0 {
            log::debug!("discarded {} queued tile fetches", discarded);
        }
        for handle in self.fetch_threads.drain(..) {
            if handle.join().is_err() {
                log::warn!("fetch thread panicked");
            }
        }
        self.worker.terminate();
        self.exchanges = Exchanges::new();
    }
}

impl Drop for TileLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn fetch_loop(
    fetcher: Arc<dyn TileFetcher>,
    jobs: flume::Receiver<FetchJob>,
    requests: flume::Sender<WorkerRequest>,
    failures: flume::Sender<FetchFailure>,
    stop: Arc<AtomicBool>,
) {
    for FetchJob { url, mut request, cancelled } in jobs.iter() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if cancelled.load(Ordering::Relaxed) {
            log::trace!("skipping abandoned fetch of {}", url);
            continue;
        }
        match fetcher.fetch(&url) {
            Ok(raw) => {
                request.raw = raw;
                if requests.send(WorkerRequest::ReadTile(request)).is_err() {
                    break;
                }
            }
            Err(error) => {
                log::debug!("fetch of {} failed: {}", url, error);
                let failure = FetchFailure {
                    exchange_id: request.exchange_id,
                    error,
                };
                if failures.send(failure).is_err() {
                    break;
                }
            }
        }
    }
}
