//! The graphics backend seam.
//!
//! The engine never talks to a graphics API directly. A backend owns device objects and exposes
//! them as RAII buffer handles: dropping a handle releases the device buffer, so the vertex array
//! cache releases geometry simply by dropping its handles.

use bitflags::bitflags;

use crate::error::BackendError;
use crate::state::topology::{BackendPrimitive, GePrimitive};
use crate::vertex::{DecodedFormat, VertexType};

bitflags! {
    /// Planes written by a clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClearMask: u8 {
        const COLOR = 1 << 0;
        /// Alpha is stored in the stencil plane.
        const STENCIL = 1 << 1;
        const DEPTH = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Inputs to the hardware transform capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareTransformQuery {
    pub primitive: GePrimitive,
    pub vertex_type: VertexType,
    pub through: bool,
}

/// Layout of the vertices referenced by a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexLayout {
    /// Canonical decoder output, transformed by the backend.
    Decoded(DecodedFormat),
    /// [`crate::software::TransformedVertex`] records, already in clip space.
    Transformed,
}

#[derive(Debug)]
pub enum VertexSource<'a, B> {
    Buffer(&'a B),
    Immediate(&'a [u8]),
}

#[derive(Debug)]
pub enum IndexSource<'a, B> {
    Buffer(&'a B),
    Immediate(&'a [u16]),
}

/// One backend draw. Without indices, `vertex_count` vertices are drawn in order.
#[derive(Debug)]
pub struct DrawCommand<'a, B> {
    pub primitive: BackendPrimitive,
    pub layout: VertexLayout,
    pub vertices: VertexSource<'a, B>,
    pub indices: Option<IndexSource<'a, B>>,
    /// Vertices drawn (index count for indexed draws).
    pub vertex_count: usize,
    /// Highest vertex index the draw may reference.
    pub max_index: u32,
    pub primitive_count: usize,
    /// Every vertex is fully opaque, after material state is applied.
    pub full_alpha: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearCommand {
    pub mask: ClearMask,
    /// RGBA8.
    pub color: [u8; 4],
    pub depth: f32,
    pub stencil: u8,
}

pub trait DrawBackend {
    /// Owned device buffer. Dropping it releases the device object.
    type Buffer;

    fn supports_hardware_transform(&self, query: &HardwareTransformQuery) -> bool;

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        size: usize,
    ) -> Result<Self::Buffer, BackendError>;

    fn upload(&mut self, buffer: &Self::Buffer, data: &[u8]) -> Result<(), BackendError>;

    fn draw(&mut self, cmd: &DrawCommand<'_, Self::Buffer>);

    fn clear(&mut self, cmd: &ClearCommand);
}
