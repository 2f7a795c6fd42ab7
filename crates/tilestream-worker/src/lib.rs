//! # Tilestream Worker
//!
//! Off-thread decoding and tessellation of vector tiles.
//!
//! The [`TessellationWorker`] runs on its own thread and owns a registry of
//! compiled layer styles. Callers post [`WorkerRequest`]s and poll
//! [`WorkerResponse`]s, correlating the two by exchange id through
//! [`Exchanges`]. Payloads and buffers move through the channels, never shared.

pub mod batch;
pub mod error;
pub mod exchange;
pub mod mvt;
pub mod protocol;
pub mod style;
pub mod tessellate;
pub mod worker;

pub use batch::{GeometryBatch, SubBatch};
pub use error::WorkerError;
pub use exchange::Exchanges;
pub use protocol::{ExchangeId, LayerId, ReadTileRequest, TileBuffers, WorkerRequest, WorkerResponse, FORMAT_MVT};
pub use style::{AttributeDescriptor, AttributePlan, CompiledStyle, StyleDescriptor, Symbolizer};
pub use tessellate::{GeometryBuffers, TileGeometry};
pub use worker::{handle_request, LayerRegistry, TessellationWorker};
