//! Software transform fallback.
//!
//! Used when the backend cannot transform the current state itself (rectangles, or state the
//! backend's vertex pipeline does not model). Decoded vertices are transformed on the CPU into
//! [`TransformedVertex`] records; rectangles are expanded into triangles, and a single
//! full-target rectangle in clear mode is turned into a backend clear.

use bytemuck::{Pod, Zeroable};

use crate::backend::ClearCommand;
use crate::state::topology::{BackendPrimitive, GePrimitive};
use crate::state::DrawState;
use crate::vertex::DecodedFormat;

/// A vertex in clip space (or screen space in through mode), ready for a pass-through shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct TransformedVertex {
    pub position: [f32; 4],
    pub uv: [f32; 3],
    pub color0: [u8; 4],
    /// Specular.
    pub color1: [u8; 4],
}

/// One canonical decoded vertex, unpacked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedVertex {
    pub position: [f32; 3],
    pub normal: Option<[f32; 3]>,
    pub uv: Option<[f32; 2]>,
    pub color: Option<[u8; 4]>,
}

fn f32s<const N: usize>(bytes: &[u8], at: usize) -> [f32; N] {
    let mut out = [0.0; N];
    for (i, v) in out.iter_mut().enumerate() {
        let o = at + i * 4;
        *v = f32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
    }
    out
}

impl DecodedVertex {
    /// Unpacks one vertex; `bytes` must hold at least `format.stride` bytes.
    pub fn read(format: &DecodedFormat, bytes: &[u8]) -> Self {
        Self {
            position: f32s(bytes, format.position),
            normal: format.normal.map(|at| f32s(bytes, at)),
            uv: format.uv.map(|at| f32s(bytes, at)),
            color: format
                .color
                .map(|at| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]),
        }
    }
}

/// CPU vertex transform.
pub trait VertexTransformer {
    fn transform(
        &self,
        vertex: &DecodedVertex,
        state: &DrawState,
        through: bool,
    ) -> TransformedVertex;
}

/// Passes through-mode coordinates through and projects everything else with
/// [`DrawState::world_view_proj`]. Unlit: the color is the vertex color or the material ambient.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicTransformer;

impl VertexTransformer for BasicTransformer {
    fn transform(
        &self,
        vertex: &DecodedVertex,
        state: &DrawState,
        through: bool,
    ) -> TransformedVertex {
        let [x, y, z] = vertex.position;
        let position = if through {
            [x, y, z / 65535.0, 1.0]
        } else {
            let m = &state.world_view_proj;
            let v = [x, y, z, 1.0];
            let mut out = [0.0f32; 4];
            for (row, o) in out.iter_mut().enumerate() {
                *o = (0..4).map(|col| m[col * 4 + row] * v[col]).sum();
            }
            out
        };
        let [u, v] = vertex.uv.unwrap_or([0.0, 0.0]);
        TransformedVertex {
            position,
            uv: [u, v, 1.0],
            color0: vertex.color.unwrap_or(state.material_ambient),
            color1: [0; 4],
        }
    }
}

/// What the fallback wants the backend to do.
#[derive(Debug, PartialEq)]
pub enum SoftwareAction<'a> {
    Draw {
        primitive: BackendPrimitive,
        vertices: &'a [TransformedVertex],
        /// `None` for expanded rectangles, which are drawn in order.
        indices: Option<&'a [u16]>,
    },
    Clear(ClearCommand),
}

pub struct SoftwareTransformFallback {
    transformer: Box<dyn VertexTransformer>,
    transformed: Vec<TransformedVertex>,
    expanded: Vec<TransformedVertex>,
}

impl std::fmt::Debug for SoftwareTransformFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareTransformFallback")
            .field("transformed", &self.transformed.len())
            .field("expanded", &self.expanded.len())
            .finish_non_exhaustive()
    }
}

impl Default for SoftwareTransformFallback {
    fn default() -> Self {
        Self::new(Box::new(BasicTransformer))
    }
}

impl SoftwareTransformFallback {
    pub fn new(transformer: Box<dyn VertexTransformer>) -> Self {
        Self {
            transformer,
            transformed: Vec::new(),
            expanded: Vec::new(),
        }
    }

    pub fn set_transformer(&mut self, transformer: Box<dyn VertexTransformer>) {
        self.transformer = transformer;
    }

    /// Transforms `count` decoded vertices and resolves the batch into a draw or a clear.
    ///
    /// `indices` are the merged list indices of the batch; `prim` its output primitive.
    #[allow(clippy::too_many_arguments)]
    pub fn run<'a>(
        &'a mut self,
        prim: GePrimitive,
        format: &DecodedFormat,
        decoded: &[u8],
        count: usize,
        indices: &'a [u16],
        through: bool,
        state: &DrawState,
    ) -> SoftwareAction<'a> {
        self.transformed.clear();
        self.transformed.extend(
            decoded
                .chunks_exact(format.stride)
                .take(count)
                .map(|bytes| {
                    self.transformer
                        .transform(&DecodedVertex::read(format, bytes), state, through)
                }),
        );

        if prim != GePrimitive::Rectangles {
            // Strips arrive as list indices; the strip optimization is not used here.
            let list = match prim {
                GePrimitive::TriangleStrip => GePrimitive::Triangles,
                other => other,
            };
            return SoftwareAction::Draw {
                primitive: BackendPrimitive::from_ge(list),
                vertices: &self.transformed,
                indices: Some(indices),
            };
        }

        if state.clear_mode {
            if let Some(clear) = self.detect_clear(indices, state) {
                return SoftwareAction::Clear(clear);
            }
        }

        self.expanded.clear();
        for pair in indices.chunks_exact(2) {
            let (Some(a), Some(b)) = (
                self.transformed.get(pair[0] as usize),
                self.transformed.get(pair[1] as usize),
            ) else {
                continue;
            };
            let corner = |x: f32, y: f32, u: f32, v: f32| TransformedVertex {
                position: [x, y, b.position[2], b.position[3]],
                uv: [u, v, b.uv[2]],
                ..*b
            };
            let tl = corner(a.position[0], a.position[1], a.uv[0], a.uv[1]);
            let tr = corner(b.position[0], a.position[1], b.uv[0], a.uv[1]);
            let br = corner(b.position[0], b.position[1], b.uv[0], b.uv[1]);
            let bl = corner(a.position[0], b.position[1], a.uv[0], b.uv[1]);
            self.expanded.extend_from_slice(&[tl, tr, br, tl, br, bl]);
        }

        SoftwareAction::Draw {
            primitive: BackendPrimitive::TriangleList,
            vertices: &self.expanded,
            indices: None,
        }
    }

    fn detect_clear(&self, indices: &[u16], state: &DrawState) -> Option<ClearCommand> {
        let [a, b] = indices else {
            return None;
        };
        let a = self.transformed.get(*a as usize)?;
        let b = self.transformed.get(*b as usize)?;

        let min_x = a.position[0].min(b.position[0]);
        let min_y = a.position[1].min(b.position[1]);
        let max_x = a.position[0].max(b.position[0]);
        let max_y = a.position[1].max(b.position[1]);
        let covers = min_x <= 0.0
            && min_y <= 0.0
            && max_x >= state.framebuffer_width as f32
            && max_y >= state.framebuffer_height as f32;
        if !covers || a.color0 != b.color0 || a.position[2] != b.position[2] {
            return None;
        }

        Some(ClearCommand {
            mask: state.clear_mask,
            color: b.color0,
            depth: b.position[2],
            stencil: b.color0[3],
        })
    }
}
