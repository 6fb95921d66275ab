//! Render state consumed by the draw engine.
//!
//! The command-stream interpreter owns the full GE register file; the engine only needs the handful
//! of values that change how vertices are decoded, hashed, or resolved into a clear.

pub mod topology;

use bytemuck::{Pod, Zeroable};

use crate::backend::ClearMask;

/// Per-draw texture coordinate prescale, applied by the decoder outside through mode.
///
/// Not part of the raw vertex bytes, so it is folded into the draw-call identity and the full
/// content hash.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UvScale {
    pub u_scale: f32,
    pub v_scale: f32,
    pub u_offset: f32,
    pub v_offset: f32,
}

impl Default for UvScale {
    fn default() -> Self {
        Self {
            u_scale: 1.0,
            v_scale: 1.0,
            u_offset: 0.0,
            v_offset: 0.0,
        }
    }
}

/// Start of emulated VRAM, where framebuffers live.
pub const VRAM_BASE: u32 = 0x0400_0000;

/// UV generation mode: texture coordinates come from the vertex.
pub const UV_GEN_TEXCOORDS: u8 = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct DrawState {
    /// UV generation mode (2 bits). Changes the decoded texcoords.
    pub uv_gen_mode: u8,
    pub uv_scale: UvScale,
    pub morph_weights: [f32; 8],

    pub clear_mode: bool,
    pub clear_mask: ClearMask,

    pub texture_address: u32,
    pub framebuffer_address: u32,
    pub framebuffer_width: u32,
    pub framebuffer_height: u32,
    /// Set when a draw samples from the framebuffer it renders to. Cleared by the texture cache.
    pub texture_params_dirty: bool,

    /// Material ambient color, RGBA. Used when the vertex has no color.
    pub material_ambient: [u8; 4],
    /// Material color update flag for ambient (bit 0 of the material update register).
    pub material_update_ambient: bool,
    pub lighting_enabled: bool,
    pub ambient_alpha: u8,

    /// Column-major world * view * projection used by the software transform outside through mode.
    pub world_view_proj: [f32; 16],
}

impl Default for DrawState {
    fn default() -> Self {
        #[rustfmt::skip]
        let identity = [
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        Self {
            uv_gen_mode: UV_GEN_TEXCOORDS,
            uv_scale: UvScale::default(),
            morph_weights: [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            clear_mode: false,
            clear_mask: ClearMask::empty(),
            texture_address: 0,
            framebuffer_address: VRAM_BASE,
            framebuffer_width: 480,
            framebuffer_height: 272,
            texture_params_dirty: false,
            material_ambient: [0xff; 4],
            material_update_ambient: false,
            lighting_enabled: false,
            ambient_alpha: 0xff,
            world_view_proj: identity,
        }
    }
}

impl DrawState {
    /// Whether a rectangle draw would sample the framebuffer it renders into.
    pub fn texture_is_render_target(&self) -> bool {
        const ADDR_MASK: u32 = 0x3FFF_FFFF;
        (self.texture_address & ADDR_MASK) == (self.framebuffer_address & ADDR_MASK)
    }

    /// Combines the decoded vertex alpha coverage with material state.
    pub fn resolve_full_alpha(
        &self,
        vertex_full_alpha: bool,
        has_color: bool,
        through: bool,
    ) -> bool {
        let material_opaque = self.material_ambient[3] == 0xff;
        if through {
            vertex_full_alpha && (has_color || material_opaque)
        } else {
            vertex_full_alpha
                && ((has_color && self.material_update_ambient) || material_opaque)
                && (!self.lighting_enabled || self.ambient_alpha == 0xff)
        }
    }
}
