//! `ge-draw` turns the draw submissions of an emulated GE command stream into backend draw calls.
//!
//! Currently this crate provides:
//! - A deferred draw accumulator that merges compatible submissions until a flush boundary
//!   (see [`DrawEngine::submit`]).
//! - A vertex array cache that reuses uploaded geometry across flushes, guarded by a two-tier
//!   content hash and a reliability state machine (see [`cache`] and [`hash`]).
//! - A software transform fallback for render state the backend cannot transform itself
//!   (see [`software`]).
//!
//! The vertex decoder, graphics backend and guest memory are collaborators behind traits
//! ([`VertexDecoder`], [`DrawBackend`], [`GuestMemory`]); a reference GE vertex decoder ships in
//! [`vertex::decoder`].

mod batch;
mod config;
mod decode;
mod engine;
mod error;
mod guest_memory;

pub mod backend;
pub mod cache;
pub mod hash;
pub mod index_gen;
pub mod software;
pub mod state;
pub mod stats;
pub mod vertex;

pub use backend::{
    BufferKind, ClearCommand, ClearMask, DrawBackend, DrawCommand, HardwareTransformQuery,
    IndexSource, VertexLayout, VertexSource,
};
pub use batch::{BatchState, DeferredDrawCall, FlushReason};
pub use cache::{
    CachedGeometry, DecimationReport, ReliabilityState, VertexArrayCache, VertexArrayFlags,
    VertexArrayKey, VertexArrayRecord,
};
pub use config::{BatchLimits, DrawEngineConfig, VertexCacheTuning};
pub use engine::DrawEngine;
pub use error::{BackendError, DecodeError};
pub use guest_memory::{GuestMemory, GuestMemoryError, VecGuestMemory};
pub use software::{
    BasicTransformer, SoftwareTransformFallback, TransformedVertex, VertexTransformer,
};
pub use state::{topology::GePrimitive, DrawState, UvScale};
pub use stats::{DrawStats, DrawStatsSnapshot};
pub use vertex::decoder::GeVertexDecoder;
pub use vertex::{VertexDecoder, VertexType, VertexTypeId};
