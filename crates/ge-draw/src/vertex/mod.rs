//! GE vertex type words and the vertex decoder seam.

pub mod decoder;

use std::fmt;

use crate::error::DecodeError;
use crate::state::UvScale;

pub const VTYPE_TC_SHIFT: u32 = 0;
pub const VTYPE_TC_MASK: u32 = 3 << VTYPE_TC_SHIFT;
pub const VTYPE_COL_SHIFT: u32 = 2;
pub const VTYPE_COL_MASK: u32 = 7 << VTYPE_COL_SHIFT;
pub const VTYPE_NRM_SHIFT: u32 = 5;
pub const VTYPE_NRM_MASK: u32 = 3 << VTYPE_NRM_SHIFT;
pub const VTYPE_POS_SHIFT: u32 = 7;
pub const VTYPE_POS_MASK: u32 = 3 << VTYPE_POS_SHIFT;
pub const VTYPE_WEIGHT_SHIFT: u32 = 9;
pub const VTYPE_WEIGHT_MASK: u32 = 3 << VTYPE_WEIGHT_SHIFT;
pub const VTYPE_IDX_SHIFT: u32 = 11;
pub const VTYPE_IDX_MASK: u32 = 3 << VTYPE_IDX_SHIFT;
pub const VTYPE_WEIGHTCOUNT_SHIFT: u32 = 14;
pub const VTYPE_WEIGHTCOUNT_MASK: u32 = 7 << VTYPE_WEIGHTCOUNT_SHIFT;
pub const VTYPE_MORPHCOUNT_SHIFT: u32 = 18;
pub const VTYPE_MORPHCOUNT_MASK: u32 = 7 << VTYPE_MORPHCOUNT_SHIFT;
pub const VTYPE_THROUGH: u32 = 1 << 23;

/// Numeric encoding of a vertex component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentFormat {
    None,
    Byte,
    Short,
    Float,
}

impl ComponentFormat {
    fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::None,
            1 => Self::Byte,
            2 => Self::Short,
            _ => Self::Float,
        }
    }

    /// Bytes per component (also the component alignment).
    pub fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Byte => 1,
            Self::Short => 2,
            Self::Float => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    None,
    /// Raw values 1..=3 are reserved by the hardware.
    Reserved(u32),
    Rgb565,
    Rgba5551,
    Rgba4444,
    Rgba8888,
}

impl ColorFormat {
    pub fn size(self) -> usize {
        match self {
            Self::None | Self::Reserved(_) => 0,
            Self::Rgb565 | Self::Rgba5551 | Self::Rgba4444 => 2,
            Self::Rgba8888 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    None,
    U8,
    U16,
    U32,
}

impl IndexFormat {
    pub fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Decodes `count` little-endian indices from `raw`.
    pub fn read_indices(self, raw: &[u8], out: &mut Vec<u32>) {
        out.clear();
        match self {
            Self::None => {}
            Self::U8 => out.extend(raw.iter().map(|&b| b as u32)),
            Self::U16 => out.extend(
                raw.chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]) as u32),
            ),
            Self::U32 => out.extend(
                raw.chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            ),
        }
    }
}

/// A raw GE vertex type word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexType(pub u32);

impl VertexType {
    pub fn texcoord(self) -> ComponentFormat {
        ComponentFormat::from_bits((self.0 & VTYPE_TC_MASK) >> VTYPE_TC_SHIFT)
    }

    pub fn color(self) -> ColorFormat {
        match (self.0 & VTYPE_COL_MASK) >> VTYPE_COL_SHIFT {
            0 => ColorFormat::None,
            4 => ColorFormat::Rgb565,
            5 => ColorFormat::Rgba5551,
            6 => ColorFormat::Rgba4444,
            7 => ColorFormat::Rgba8888,
            other => ColorFormat::Reserved(other),
        }
    }

    pub fn normal(self) -> ComponentFormat {
        ComponentFormat::from_bits((self.0 & VTYPE_NRM_MASK) >> VTYPE_NRM_SHIFT)
    }

    pub fn position(self) -> ComponentFormat {
        ComponentFormat::from_bits((self.0 & VTYPE_POS_MASK) >> VTYPE_POS_SHIFT)
    }

    pub fn weight(self) -> ComponentFormat {
        ComponentFormat::from_bits((self.0 & VTYPE_WEIGHT_MASK) >> VTYPE_WEIGHT_SHIFT)
    }

    pub fn index(self) -> IndexFormat {
        match (self.0 & VTYPE_IDX_MASK) >> VTYPE_IDX_SHIFT {
            0 => IndexFormat::None,
            1 => IndexFormat::U8,
            2 => IndexFormat::U16,
            _ => IndexFormat::U32,
        }
    }

    pub fn weight_count(self) -> usize {
        (((self.0 & VTYPE_WEIGHTCOUNT_MASK) >> VTYPE_WEIGHTCOUNT_SHIFT) + 1) as usize
    }

    pub fn morph_count(self) -> usize {
        (((self.0 & VTYPE_MORPHCOUNT_MASK) >> VTYPE_MORPHCOUNT_SHIFT) + 1) as usize
    }

    pub fn is_through(self) -> bool {
        self.0 & VTYPE_THROUGH != 0
    }

    pub fn has_weights(self) -> bool {
        self.0 & VTYPE_WEIGHT_MASK != 0
    }

    pub fn has_morph(self) -> bool {
        self.0 & VTYPE_MORPHCOUNT_MASK != 0
    }

    pub fn has_color(self) -> bool {
        self.0 & VTYPE_COL_MASK != 0
    }

    /// Decoder key: the decoded output also depends on the UV generation mode, which is packed
    /// into the unused top byte.
    pub fn with_uv_gen_mode(self, uv_gen_mode: u8) -> VertexTypeId {
        VertexTypeId((self.0 & 0x00FF_FFFF) | ((uv_gen_mode as u32 & 3) << 24))
    }
}

impl fmt::Debug for VertexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VertexType(0x{:06x})", self.0)
    }
}

/// Vertex type plus decode-affecting mode bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct VertexTypeId(pub u32);

impl VertexTypeId {
    pub fn vertex_type(self) -> VertexType {
        VertexType(self.0 & 0x00FF_FFFF)
    }

    pub fn uv_gen_mode(self) -> u8 {
        ((self.0 >> 24) & 3) as u8
    }
}

impl fmt::Display for VertexTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Byte offsets of the canonical decoded vertex layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecodedFormat {
    pub stride: usize,
    /// `(offset, count)` of `f32` skinning weights.
    pub weights: Option<(usize, usize)>,
    /// Offset of `f32 x 2` texture coordinates.
    pub uv: Option<usize>,
    /// Offset of RGBA8 color.
    pub color: Option<usize>,
    /// Offset of `f32 x 3` normal.
    pub normal: Option<usize>,
    /// Offset of `f32 x 3` position.
    pub position: usize,
}

/// Per-call inputs to a decode that are not part of the vertex bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParams {
    pub uv_scale: UvScale,
    pub morph_weights: [f32; 8],
}

/// Result of decoding one run of vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedRun {
    pub count: usize,
    pub stride: usize,
    /// Every decoded vertex color had alpha 255 (trivially true without colors).
    pub full_alpha: bool,
}

/// Decodes raw guest vertices into the canonical layout.
///
/// Implementations must be deterministic: identical bytes and parameters produce identical output.
pub trait VertexDecoder {
    /// Size in bytes of one raw guest vertex.
    fn vertex_size(&self, id: VertexTypeId) -> Result<usize, DecodeError>;

    fn decoded_format(&self, id: VertexTypeId) -> Result<DecodedFormat, DecodeError>;

    /// Decodes `count` vertices from `raw`, appending to `out`.
    fn decode(
        &self,
        id: VertexTypeId,
        raw: &[u8],
        count: usize,
        params: &DecodeParams,
        out: &mut Vec<u8>,
    ) -> Result<DecodedRun, DecodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_type_fields() {
        // float pos, 8888 color, u16 texcoords, u16 indices, 2 morph frames, through
        let vt = VertexType(
            (3 << VTYPE_POS_SHIFT)
                | (7 << VTYPE_COL_SHIFT)
                | (2 << VTYPE_TC_SHIFT)
                | (2 << VTYPE_IDX_SHIFT)
                | (1 << VTYPE_MORPHCOUNT_SHIFT)
                | VTYPE_THROUGH,
        );
        assert_eq!(vt.position(), ComponentFormat::Float);
        assert_eq!(vt.color(), ColorFormat::Rgba8888);
        assert_eq!(vt.texcoord(), ComponentFormat::Short);
        assert_eq!(vt.index(), IndexFormat::U16);
        assert_eq!(vt.morph_count(), 2);
        assert!(vt.has_morph());
        assert!(vt.is_through());
        assert!(!vt.has_weights());
    }

    #[test]
    fn uv_gen_mode_changes_decoder_key() {
        let vt = VertexType(3 << VTYPE_POS_SHIFT);
        let a = vt.with_uv_gen_mode(0);
        let b = vt.with_uv_gen_mode(1);
        assert_ne!(a, b);
        assert_eq!(a.vertex_type(), b.vertex_type());
        assert_eq!(b.uv_gen_mode(), 1);
    }

    #[test]
    fn reads_u16_indices() {
        let mut out = Vec::new();
        IndexFormat::U16.read_indices(&[1, 0, 0xff, 0xff], &mut out);
        assert_eq!(out, vec![1, 0xffff]);
    }
}
