//! The narrow GPU surface the renderer draws through.
//!
//! [`GpuContext`] is implemented by whatever owns the real rendering context.
//! [`CommandRecorder`] implements it headlessly by recording a serializable
//! command list, which is what the tests and any frontend consumer read back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    #[error("Buffer allocation of {bytes} bytes failed: {message}")]
    Allocation { bytes: usize, message: String },

    #[error("Rendering context lost")]
    ContextLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferTarget {
    Vertex,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Polygon,
    Line,
    Point,
}

/// Clip rectangle in device pixels, origin at the top-left of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }

    pub fn intersects(&self, other: &ScissorRect) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// One indexed triangle-list draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawCall {
    pub kind: GeometryKind,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    /// Floats per vertex.
    pub stride: u32,
    /// Affine transform `[a, b, c, d, e, f]` from tile-local map units to
    /// device pixels: `x' = a·x + c·y + e`, `y' = b·x + d·y + f`.
    pub transform: [f32; 6],
    /// Alpha multiplier in `0..=1`.
    pub opacity: f32,
}

pub trait GpuContext {
    fn create_buffer(&mut self, target: BufferTarget, data: &[u8]) -> Result<BufferHandle, GpuError>;

    /// Free a buffer. Releasing an unknown or already released handle is a no-op.
    fn release_buffer(&mut self, handle: BufferHandle);

    /// Restrict subsequent draws, or lift the restriction with `None`.
    fn set_scissor(&mut self, rect: Option<ScissorRect>);

    fn draw_elements(&mut self, call: &DrawCall);
}

// ── Recording backend ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GpuCommand {
    CreateBuffer {
        handle: BufferHandle,
        target: BufferTarget,
        bytes: usize,
    },
    ReleaseBuffer {
        handle: BufferHandle,
    },
    SetScissor {
        rect: Option<ScissorRect>,
    },
    Draw {
        call: DrawCall,
        scissor: Option<ScissorRect>,
    },
}

/// A [`GpuContext`] that keeps buffer bookkeeping and records every command.
#[derive(Debug, Default)]
pub struct CommandRecorder {
    next_handle: u64,
    live: HashMap<BufferHandle, (BufferTarget, Vec<u8>)>,
    scissor: Option<ScissorRect>,
    commands: Vec<GpuCommand>,
    /// Refuse allocations past this many live bytes.
    byte_limit: Option<usize>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_byte_limit(limit: usize) -> Self {
        Self {
            byte_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Hand over the recorded commands, e.g. once per frame.
    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn draws(&self) -> impl Iterator<Item = (&DrawCall, Option<ScissorRect>)> {
        self.commands.iter().filter_map(|c| match c {
            GpuCommand::Draw { call, scissor } => Some((call, *scissor)),
            _ => None,
        })
    }

    pub fn live_buffers(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> usize {
        self.live.values().map(|(_, data)| data.len()).sum()
    }

    /// Contents of a live buffer.
    pub fn buffer_data(&self, handle: BufferHandle) -> Option<&[u8]> {
        self.live.get(&handle).map(|(_, data)| data.as_slice())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.commands)
    }
}

impl GpuContext for CommandRecorder {
    fn create_buffer(&mut self, target: BufferTarget, data: &[u8]) -> Result<BufferHandle, GpuError> {
        if let Some(limit) = self.byte_limit {
            if self.live_bytes() + data.len() > limit {
                return Err(GpuError::Allocation {
                    bytes: data.len(),
                    message: format!("limit of {limit} bytes reached"),
                });
            }
        }
        self.next_handle += 1;
        let handle = BufferHandle(self.next_handle);
        self.live.insert(handle, (target, data.to_vec()));
        self.commands.push(GpuCommand::CreateBuffer {
            handle,
            target,
            bytes: data.len(),
        });
        Ok(handle)
    }

    fn release_buffer(&mut self, handle: BufferHandle) {
        if self.live.remove(&handle).is_some() {
            self.commands.push(GpuCommand::ReleaseBuffer { handle });
        }
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        self.scissor = rect;
        self.commands.push(GpuCommand::SetScissor { rect });
    }

    fn draw_elements(&mut self, call: &DrawCall) {
        self.commands.push(GpuCommand::Draw {
            call: call.clone(),
            scissor: self.scissor,
        });
    }
}
