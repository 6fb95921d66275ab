//! Shared helpers for `ge-draw` integration tests.
//!
//! `RecordingBackend` records every draw and clear instead of talking to a device. Its buffers
//! decrement a shared live counter when dropped, so tests can observe exactly when the engine
//! releases cached geometry.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ge_draw::state::topology::BackendPrimitive;
use ge_draw::vertex::{VTYPE_COL_SHIFT, VTYPE_IDX_SHIFT, VTYPE_POS_SHIFT, VTYPE_THROUGH};
use ge_draw::{
    BackendError, BufferKind, ClearCommand, DrawBackend, DrawCommand, DrawEngine,
    DrawEngineConfig, HardwareTransformQuery, IndexSource, VecGuestMemory, VertexLayout,
    VertexSource, VertexType,
};

/// Float positions only: 12 bytes per raw vertex.
pub const FLOAT_POS: VertexType = VertexType(3 << VTYPE_POS_SHIFT);
/// Float positions with 16-bit indices.
pub const FLOAT_POS_IDX16: VertexType = VertexType((3 << VTYPE_POS_SHIFT) | (2 << VTYPE_IDX_SHIFT));
/// Through-mode 8888 color + 16-bit positions: 12 bytes per raw vertex.
pub const THROUGH_COLOR_POS: VertexType =
    VertexType((7 << VTYPE_COL_SHIFT) | (2 << VTYPE_POS_SHIFT) | VTYPE_THROUGH);

pub const GUEST_RAM: usize = 0x10_0000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug)]
pub struct MockBuffer {
    pub id: u32,
    pub kind: BufferKind,
    pub size: usize,
    pub data: RefCell<Vec<u8>>,
    live: Rc<Cell<usize>>,
}

impl Drop for MockBuffer {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedVertices {
    Buffer(u32),
    Immediate(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedIndices {
    Buffer(u32),
    Immediate(Vec<u16>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub primitive: BackendPrimitive,
    pub layout: VertexLayout,
    pub vertices: RecordedVertices,
    pub indices: Option<RecordedIndices>,
    pub vertex_count: usize,
    pub max_index: u32,
    pub primitive_count: usize,
    pub full_alpha: bool,
}

impl RecordedDraw {
    pub fn is_cached(&self) -> bool {
        matches!(self.vertices, RecordedVertices::Buffer(_))
    }
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub hardware_transform: bool,
    pub fail_buffer_creation: bool,
    pub buffers_created: usize,
    pub uploads: usize,
    pub draws: Vec<RecordedDraw>,
    pub clears: Vec<ClearCommand>,
    next_id: u32,
    live: Rc<Cell<usize>>,
}

impl RecordingBackend {
    pub fn hardware() -> Self {
        Self {
            hardware_transform: true,
            ..Self::default()
        }
    }

    pub fn software() -> Self {
        Self::default()
    }

    /// Buffers created and not yet dropped.
    pub fn live_buffers(&self) -> usize {
        self.live.get()
    }

    /// Shared live-buffer counter, readable after the backend is gone.
    pub fn live_handle(&self) -> Rc<Cell<usize>> {
        self.live.clone()
    }

    pub fn last_draw(&self) -> &RecordedDraw {
        self.draws.last().expect("no draw recorded")
    }
}

impl DrawBackend for RecordingBackend {
    type Buffer = MockBuffer;

    fn supports_hardware_transform(&self, _query: &HardwareTransformQuery) -> bool {
        self.hardware_transform
    }

    fn create_buffer(&mut self, kind: BufferKind, size: usize) -> Result<MockBuffer, BackendError> {
        if self.fail_buffer_creation {
            return Err(BackendError::OutOfMemory { requested: size });
        }
        self.next_id += 1;
        self.buffers_created += 1;
        self.live.set(self.live.get() + 1);
        Ok(MockBuffer {
            id: self.next_id,
            kind,
            size,
            data: RefCell::new(Vec::new()),
            live: self.live.clone(),
        })
    }

    fn upload(&mut self, buffer: &MockBuffer, data: &[u8]) -> Result<(), BackendError> {
        if data.len() > buffer.size {
            return Err(BackendError::UploadTooLarge {
                size: data.len(),
                capacity: buffer.size,
            });
        }
        self.uploads += 1;
        *buffer.data.borrow_mut() = data.to_vec();
        Ok(())
    }

    fn draw(&mut self, cmd: &DrawCommand<'_, MockBuffer>) {
        self.draws.push(RecordedDraw {
            primitive: cmd.primitive,
            layout: cmd.layout,
            vertices: match cmd.vertices {
                VertexSource::Buffer(b) => RecordedVertices::Buffer(b.id),
                VertexSource::Immediate(bytes) => RecordedVertices::Immediate(bytes.to_vec()),
            },
            indices: cmd.indices.as_ref().map(|i| match i {
                IndexSource::Buffer(b) => RecordedIndices::Buffer(b.id),
                IndexSource::Immediate(idx) => RecordedIndices::Immediate(idx.to_vec()),
            }),
            vertex_count: cmd.vertex_count,
            max_index: cmd.max_index,
            primitive_count: cmd.primitive_count,
            full_alpha: cmd.full_alpha,
        });
    }

    fn clear(&mut self, cmd: &ClearCommand) {
        self.clears.push(*cmd);
    }
}

pub type TestEngine = DrawEngine<VecGuestMemory, RecordingBackend>;

pub fn engine(config: DrawEngineConfig, backend: RecordingBackend) -> TestEngine {
    init_tracing();
    DrawEngine::new(config, VecGuestMemory::new(GUEST_RAM), backend)
}

pub fn hardware_engine() -> TestEngine {
    engine(DrawEngineConfig::default(), RecordingBackend::hardware())
}

pub fn write_float_positions(mem: &VecGuestMemory, addr: u32, positions: &[[f32; 3]]) {
    let mut bytes = Vec::with_capacity(positions.len() * 12);
    for p in positions {
        for c in p {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
    }
    mem.write(addr, &bytes).expect("vertex write in range");
}

/// `count` distinct float-position vertices.
pub fn write_vertex_grid(mem: &VecGuestMemory, addr: u32, count: usize) {
    let positions: Vec<[f32; 3]> = (0..count)
        .map(|i| [(i % 16) as f32, (i / 16) as f32, 0.5])
        .collect();
    write_float_positions(mem, addr, &positions);
}

pub fn write_u16_indices(mem: &VecGuestMemory, addr: u32, indices: &[u16]) {
    let bytes: Vec<u8> = indices.iter().flat_map(|i| i.to_le_bytes()).collect();
    mem.write(addr, &bytes).expect("index write in range");
}

/// Through-mode vertex: RGBA8 color, then x/y/z as 16-bit values, padded to 12 bytes.
pub fn through_vertex(color: [u8; 4], x: i16, y: i16, z: u16) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[0..4].copy_from_slice(&color);
    out[4..6].copy_from_slice(&x.to_le_bytes());
    out[6..8].copy_from_slice(&y.to_le_bytes());
    out[8..10].copy_from_slice(&z.to_le_bytes());
    out
}
