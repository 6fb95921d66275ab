//! Reference GE vertex decoder.
//!
//! Covers the component encodings games actually submit (8/16-bit fixed point, floats, the four
//! packed color formats, skinning weights and morph frames). It is not bit-exact with hardware
//! rounding in every corner; the engine only relies on it being deterministic.

use crate::error::DecodeError;
use crate::state::UV_GEN_TEXCOORDS;
use crate::vertex::{
    ColorFormat, ComponentFormat, DecodeParams, DecodedFormat, DecodedRun, VertexDecoder,
    VertexType, VertexTypeId,
};

/// Raw guest layout of one vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawLayout {
    /// Size of one morph frame.
    frame_size: usize,
    /// Size of the whole vertex (all morph frames).
    size: usize,
    weights: usize,
    uv: usize,
    color: usize,
    normal: usize,
    position: usize,
}

fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

fn raw_layout(id: VertexTypeId) -> Result<RawLayout, DecodeError> {
    let vt = id.vertex_type();
    if vt.position() == ComponentFormat::None {
        return Err(DecodeError::MissingPosition(id));
    }
    if let ColorFormat::Reserved(format) = vt.color() {
        return Err(DecodeError::ReservedColorFormat { id, format });
    }

    let mut offset = 0usize;
    let mut biggest = 1usize;
    let mut place = |size: usize, align: usize| -> usize {
        if size == 0 {
            return offset;
        }
        offset = align_up(offset, align);
        let at = offset;
        offset += size;
        biggest = biggest.max(align);
        at
    };

    let weight_fmt = vt.weight();
    let weights = place(weight_fmt.size() * vt.weight_count(), weight_fmt.size());
    let uv = place(vt.texcoord().size() * 2, vt.texcoord().size());
    let color = place(vt.color().size(), vt.color().size());
    let normal = place(vt.normal().size() * 3, vt.normal().size());
    let position = place(vt.position().size() * 3, vt.position().size());

    let frame_size = align_up(offset, biggest);
    Ok(RawLayout {
        frame_size,
        size: frame_size * vt.morph_count(),
        weights,
        uv,
        color,
        normal,
        position,
    })
}

fn decoded_layout(vt: VertexType) -> DecodedFormat {
    let mut stride = 0usize;
    let weights = if vt.has_weights() {
        let at = stride;
        stride += 4 * vt.weight_count();
        Some((at, vt.weight_count()))
    } else {
        None
    };
    let mut field = |present: bool, size: usize| {
        present.then(|| {
            let at = stride;
            stride += size;
            at
        })
    };
    let uv = field(vt.texcoord() != ComponentFormat::None, 8);
    let color = field(vt.has_color(), 4);
    let normal = field(vt.normal() != ComponentFormat::None, 12);
    let position = stride;
    stride += 12;
    DecodedFormat {
        stride,
        weights,
        uv,
        color,
        normal,
        position,
    }
}

fn read_u16(raw: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([raw[at], raw[at + 1]])
}

fn read_f32(raw: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

/// Unsigned component, normalized when `normalize` is set (weights, texcoords).
fn read_unsigned(raw: &[u8], at: usize, fmt: ComponentFormat, normalize: bool) -> f32 {
    match (fmt, normalize) {
        (ComponentFormat::None, _) => 0.0,
        (ComponentFormat::Byte, true) => raw[at] as f32 / 128.0,
        (ComponentFormat::Byte, false) => raw[at] as f32,
        (ComponentFormat::Short, true) => read_u16(raw, at) as f32 / 32768.0,
        (ComponentFormat::Short, false) => read_u16(raw, at) as f32,
        (ComponentFormat::Float, _) => read_f32(raw, at),
    }
}

/// Signed component, normalized when `normalize` is set (normals, positions).
fn read_signed(raw: &[u8], at: usize, fmt: ComponentFormat, normalize: bool) -> f32 {
    match (fmt, normalize) {
        (ComponentFormat::None, _) => 0.0,
        (ComponentFormat::Byte, true) => raw[at] as i8 as f32 / 128.0,
        (ComponentFormat::Byte, false) => raw[at] as i8 as f32,
        (ComponentFormat::Short, true) => read_u16(raw, at) as i16 as f32 / 32768.0,
        (ComponentFormat::Short, false) => read_u16(raw, at) as i16 as f32,
        (ComponentFormat::Float, _) => read_f32(raw, at),
    }
}

fn expand5(v: u16) -> f32 {
    let v = (v & 0x1f) as u32;
    ((v << 3) | (v >> 2)) as f32
}

fn expand6(v: u16) -> f32 {
    let v = (v & 0x3f) as u32;
    ((v << 2) | (v >> 4)) as f32
}

fn read_color(raw: &[u8], at: usize, fmt: ColorFormat) -> [f32; 4] {
    match fmt {
        ColorFormat::None | ColorFormat::Reserved(_) => [255.0; 4],
        ColorFormat::Rgb565 => {
            let c = read_u16(raw, at);
            [expand5(c), expand6(c >> 5), expand5(c >> 11), 255.0]
        }
        ColorFormat::Rgba5551 => {
            let c = read_u16(raw, at);
            let a = if c & 0x8000 != 0 { 255.0 } else { 0.0 };
            [expand5(c), expand5(c >> 5), expand5(c >> 10), a]
        }
        ColorFormat::Rgba4444 => {
            let c = read_u16(raw, at);
            let n = |shift: u16| (((c >> shift) & 0xf) * 17) as f32;
            [n(0), n(4), n(8), n(12)]
        }
        ColorFormat::Rgba8888 => [
            raw[at] as f32,
            raw[at + 1] as f32,
            raw[at + 2] as f32,
            raw[at + 3] as f32,
        ],
    }
}

fn push_f32s(out: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Decoder for the GE vertex type word.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeVertexDecoder;

impl GeVertexDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl VertexDecoder for GeVertexDecoder {
    fn vertex_size(&self, id: VertexTypeId) -> Result<usize, DecodeError> {
        Ok(raw_layout(id)?.size)
    }

    fn decoded_format(&self, id: VertexTypeId) -> Result<DecodedFormat, DecodeError> {
        raw_layout(id)?;
        Ok(decoded_layout(id.vertex_type()))
    }

    fn decode(
        &self,
        id: VertexTypeId,
        raw: &[u8],
        count: usize,
        params: &DecodeParams,
        out: &mut Vec<u8>,
    ) -> Result<DecodedRun, DecodeError> {
        let layout = raw_layout(id)?;
        let vt = id.vertex_type();
        let decoded = decoded_layout(vt);

        let needed = layout.size * count;
        if raw.len() < needed {
            return Err(DecodeError::ShortVertexData {
                needed,
                actual: raw.len(),
            });
        }

        let through = vt.is_through();
        let prescale = !through && id.uv_gen_mode() == UV_GEN_TEXCOORDS;
        let morph_count = vt.morph_count();
        let frame_weight = |m: usize| {
            if morph_count == 1 {
                1.0
            } else {
                params.morph_weights[m]
            }
        };

        let mut full_alpha = true;
        out.reserve(decoded.stride * count);

        for i in 0..count {
            let vertex = &raw[i * layout.size..(i + 1) * layout.size];

            if let Some((_, weight_count)) = decoded.weights {
                let fmt = vt.weight();
                for w in 0..weight_count {
                    let value = read_unsigned(vertex, layout.weights + w * fmt.size(), fmt, true);
                    push_f32s(out, &[value]);
                }
            }

            let mut uv = [0.0f32; 2];
            let mut color = [0.0f32; 4];
            let mut normal = [0.0f32; 3];
            let mut position = [0.0f32; 3];
            for m in 0..morph_count {
                let frame = &vertex[m * layout.frame_size..];
                let weight = frame_weight(m);

                let tc = vt.texcoord();
                for (c, slot) in uv.iter_mut().enumerate() {
                    *slot += weight * read_unsigned(frame, layout.uv + c * tc.size(), tc, !through);
                }

                let rgba = read_color(frame, layout.color, vt.color());
                for (slot, value) in color.iter_mut().zip(rgba) {
                    *slot += weight * value;
                }

                let nrm = vt.normal();
                for (c, slot) in normal.iter_mut().enumerate() {
                    *slot += weight * read_signed(frame, layout.normal + c * nrm.size(), nrm, true);
                }

                let pos = vt.position();
                for (c, slot) in position.iter_mut().enumerate() {
                    let at = layout.position + c * pos.size();
                    let value = if through && c == 2 {
                        // Through-mode depth is unsigned.
                        read_unsigned(frame, at, pos, false)
                    } else {
                        read_signed(frame, at, pos, !through)
                    };
                    *slot += weight * value;
                }
            }

            if decoded.uv.is_some() {
                if prescale {
                    uv[0] = uv[0] * params.uv_scale.u_scale + params.uv_scale.u_offset;
                    uv[1] = uv[1] * params.uv_scale.v_scale + params.uv_scale.v_offset;
                }
                push_f32s(out, &uv);
            }
            if decoded.color.is_some() {
                let rgba = color.map(|c| c.round().clamp(0.0, 255.0) as u8);
                full_alpha &= rgba[3] == 0xff;
                out.extend_from_slice(&rgba);
            }
            if decoded.normal.is_some() {
                push_f32s(out, &normal);
            }
            push_f32s(out, &position);
        }

        Ok(DecodedRun {
            count,
            stride: decoded.stride,
            full_alpha,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UvScale;
    use crate::vertex::{
        VTYPE_COL_SHIFT, VTYPE_MORPHCOUNT_SHIFT, VTYPE_NRM_SHIFT, VTYPE_POS_SHIFT, VTYPE_TC_SHIFT,
        VTYPE_THROUGH, VTYPE_WEIGHTCOUNT_SHIFT, VTYPE_WEIGHT_SHIFT,
    };
    use pretty_assertions::assert_eq;

    fn params() -> DecodeParams {
        DecodeParams {
            uv_scale: UvScale::default(),
            morph_weights: [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        }
    }

    fn f32_at(bytes: &[u8], at: usize) -> f32 {
        read_f32(bytes, at)
    }

    #[test]
    fn layout_aligns_each_component() {
        // u8 texcoords, 565 color, s8 normal, s16 position
        let vt = VertexType(
            (1 << VTYPE_TC_SHIFT)
                | (4 << VTYPE_COL_SHIFT)
                | (1 << VTYPE_NRM_SHIFT)
                | (2 << VTYPE_POS_SHIFT),
        );
        let layout = raw_layout(vt.with_uv_gen_mode(0)).unwrap();
        assert_eq!(layout.uv, 0);
        assert_eq!(layout.color, 2);
        assert_eq!(layout.normal, 4);
        // Normal ends at 7, position aligns to 8.
        assert_eq!(layout.position, 8);
        assert_eq!(layout.size, 14);
    }

    #[test]
    fn weights_and_morph_frames_repeat_layout() {
        // 2 u8 weights, float position, 2 morph frames.
        let vt = VertexType(
            (1 << VTYPE_WEIGHT_SHIFT)
                | (1 << VTYPE_WEIGHTCOUNT_SHIFT)
                | (3 << VTYPE_POS_SHIFT)
                | (1 << VTYPE_MORPHCOUNT_SHIFT),
        );
        let layout = raw_layout(vt.with_uv_gen_mode(0)).unwrap();
        assert_eq!(layout.weights, 0);
        assert_eq!(layout.position, 4);
        assert_eq!(layout.frame_size, 16);
        assert_eq!(layout.size, 32);
    }

    #[test]
    fn missing_position_is_an_error() {
        let id = VertexType(1 << VTYPE_TC_SHIFT).with_uv_gen_mode(0);
        assert_eq!(
            GeVertexDecoder.vertex_size(id),
            Err(DecodeError::MissingPosition(id))
        );
    }

    #[test]
    fn decodes_through_mode_shorts_raw() {
        let id = VertexType((2 << VTYPE_POS_SHIFT) | (7 << VTYPE_COL_SHIFT) | VTYPE_THROUGH)
            .with_uv_gen_mode(0);
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0x10, 0x20, 0x30, 0x80]); // color, alpha 0x80
        raw.extend_from_slice(&(-5i16).to_le_bytes());
        raw.extend_from_slice(&272i16.to_le_bytes());
        raw.extend_from_slice(&0xffffu16.to_le_bytes());
        raw.extend_from_slice(&[0, 0]); // pad to 4

        let mut out = Vec::new();
        let run = GeVertexDecoder
            .decode(id, &raw, 1, &params(), &mut out)
            .unwrap();
        assert_eq!(run.count, 1);
        assert_eq!(run.stride, 16);
        assert!(!run.full_alpha);
        assert_eq!(&out[0..4], &[0x10, 0x20, 0x30, 0x80]);
        assert_eq!(f32_at(&out, 4), -5.0);
        assert_eq!(f32_at(&out, 8), 272.0);
        assert_eq!(f32_at(&out, 12), 65535.0);
    }

    #[test]
    fn prescales_texcoords_outside_through_mode() {
        let id = VertexType((3 << VTYPE_TC_SHIFT) | (3 << VTYPE_POS_SHIFT)).with_uv_gen_mode(0);
        let mut raw = Vec::new();
        for v in [0.5f32, 0.25, 1.0, 2.0, 3.0] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let mut p = params();
        p.uv_scale = UvScale {
            u_scale: 2.0,
            v_scale: 4.0,
            u_offset: 0.5,
            v_offset: 0.0,
        };
        let mut out = Vec::new();
        GeVertexDecoder.decode(id, &raw, 1, &p, &mut out).unwrap();
        assert_eq!(f32_at(&out, 0), 1.5);
        assert_eq!(f32_at(&out, 4), 1.0);
        assert_eq!(f32_at(&out, 8), 1.0);

        // Non-texcoord UV generation skips the prescale.
        let id = id.vertex_type().with_uv_gen_mode(1);
        out.clear();
        GeVertexDecoder.decode(id, &raw, 1, &p, &mut out).unwrap();
        assert_eq!(f32_at(&out, 0), 0.5);
    }

    #[test]
    fn blends_morph_frames() {
        let id = VertexType((3 << VTYPE_POS_SHIFT) | (1 << VTYPE_MORPHCOUNT_SHIFT))
            .with_uv_gen_mode(0);
        let mut raw = Vec::new();
        for v in [0.0f32, 0.0, 0.0, 10.0, 20.0, 30.0] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let mut p = params();
        p.morph_weights[0] = 0.5;
        p.morph_weights[1] = 0.5;
        let mut out = Vec::new();
        GeVertexDecoder.decode(id, &raw, 1, &p, &mut out).unwrap();
        assert_eq!(f32_at(&out, 0), 5.0);
        assert_eq!(f32_at(&out, 4), 10.0);
        assert_eq!(f32_at(&out, 8), 15.0);
    }

    #[test]
    fn short_input_is_rejected() {
        let id = VertexType(3 << VTYPE_POS_SHIFT).with_uv_gen_mode(0);
        let mut out = Vec::new();
        let err = GeVertexDecoder
            .decode(id, &[0u8; 20], 2, &params(), &mut out)
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::ShortVertexData {
                needed: 24,
                actual: 20
            }
        );
    }

    #[test]
    fn packed_colors_expand_to_rgba8() {
        assert_eq!(read_color(&0xffffu16.to_le_bytes(), 0, ColorFormat::Rgb565), [255.0; 4]);
        assert_eq!(
            read_color(&0x7c00u16.to_le_bytes(), 0, ColorFormat::Rgba5551),
            [0.0, 0.0, 255.0, 0.0]
        );
        assert_eq!(
            read_color(&0xf00fu16.to_le_bytes(), 0, ColorFormat::Rgba4444),
            [255.0, 0.0, 0.0, 255.0]
        );
    }
}
