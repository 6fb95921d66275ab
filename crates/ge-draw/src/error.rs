use thiserror::Error;

use crate::guest_memory::GuestMemoryError;
use crate::vertex::VertexTypeId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("vertex type {0} has no position component")]
    MissingPosition(VertexTypeId),
    #[error("vertex type {id} uses reserved color format {format}")]
    ReservedColorFormat { id: VertexTypeId, format: u32 },
    #[error("raw vertex data too short: need {needed} bytes, got {actual}")]
    ShortVertexData { needed: usize, actual: usize },
    #[error("batch would decode {requested} vertices (max {max})")]
    TooManyVertices { requested: usize, max: usize },
    #[error(transparent)]
    GuestMemory(#[from] GuestMemoryError),
}

/// Failures reported by a [`crate::DrawBackend`].
///
/// None of these abort a flush; the engine degrades to immediate-mode drawing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("out of buffer memory (requested {requested} bytes)")]
    OutOfMemory { requested: usize },
    #[error("upload of {size} bytes exceeds buffer size {capacity}")]
    UploadTooLarge { size: usize, capacity: usize },
    #[error("device lost")]
    DeviceLost,
}
