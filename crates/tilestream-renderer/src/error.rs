use thiserror::Error;

use tilestream_io::ConfigError;
use tilestream_worker::WorkerError;

use crate::gpu::GpuError;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to start fetch thread: {0}")]
    Spawn(#[from] std::io::Error),
}
