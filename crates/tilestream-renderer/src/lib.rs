//! # Tilestream Renderer
//!
//! Turns tessellated tiles into draw calls.
//!
//! The [`FrameCompositor`] runs once per frame on the thread that owns the
//! rendering context. It plans which tiles the [`Viewport`] needs, lets the
//! [`TileLoader`] fetch and tessellate new ones in the background, uploads
//! finished geometry through a [`GpuContext`], and draws every ready tile
//! clipped to its own cell. [`CommandRecorder`] is a headless `GpuContext`
//! that records a serializable command list.

pub mod compositor;
pub mod error;
pub mod gpu;
pub mod loader;
pub mod render_data;
pub mod representation;
pub mod viewport;

pub use compositor::FrameCompositor;
pub use error::RenderError;
pub use gpu::{BufferHandle, CommandRecorder, DrawCall, GeometryKind, GpuCommand, GpuContext, GpuError, ScissorRect};
pub use loader::{LoadEvents, LoaderStats, TileLoader};
pub use render_data::FrameSummary;
pub use representation::{RenderTile, TileRepresentation, UploadedBuffers};
pub use viewport::Viewport;
