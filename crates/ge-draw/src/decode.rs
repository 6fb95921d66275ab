use tracing::warn;

use crate::batch::DeferredDrawCall;
use crate::error::DecodeError;
use crate::guest_memory::GuestMemory;
use crate::index_gen::IndexGenerator;
use crate::state::UvScale;
use crate::vertex::{DecodeParams, VertexDecoder, VertexTypeId};

/// Decoded indices are 16-bit.
const MAX_DECODED_VERTICES: usize = 1 << 16;

/// Decode cursor and output buffers for the pending batch.
#[derive(Debug)]
pub(crate) struct DecodeState {
    pub index_gen: IndexGenerator,
    /// Canonical decoded vertices, back to back.
    pub decoded: Vec<u8>,
    /// Number of batched calls already decoded.
    pub decode_counter: usize,
    /// Every decoded vertex color so far was fully opaque.
    pub full_alpha: bool,
    raw: Vec<u8>,
    index_bytes: Vec<u8>,
    indices: Vec<u32>,
}

impl Default for DecodeState {
    fn default() -> Self {
        Self {
            index_gen: IndexGenerator::new(),
            decoded: Vec::new(),
            decode_counter: 0,
            full_alpha: true,
            raw: Vec::new(),
            index_bytes: Vec::new(),
            indices: Vec::new(),
        }
    }
}

impl DecodeState {
    pub fn reset(&mut self) {
        self.index_gen.reset();
        self.decoded.clear();
        self.decode_counter = 0;
        self.full_alpha = true;
    }

    /// Decodes every call not yet decoded.
    pub fn decode_all<M: GuestMemory + ?Sized>(
        &mut self,
        calls: &[DeferredDrawCall],
        mem: &M,
        decoder: &dyn VertexDecoder,
        morph_weights: &[f32; 8],
    ) {
        while self.decode_counter < calls.len() {
            self.decode_step(calls, mem, decoder, morph_weights);
        }
        self.index_gen.ensure_prim();
    }

    /// Decodes the next call, plus any following indexed calls that share its vertex source.
    pub fn decode_step<M: GuestMemory + ?Sized>(
        &mut self,
        calls: &[DeferredDrawCall],
        mem: &M,
        decoder: &dyn VertexDecoder,
        morph_weights: &[f32; 8],
    ) {
        let Some(call) = calls.get(self.decode_counter) else {
            return;
        };

        if !call.is_indexed() {
            let count = call.vertex_count as usize;
            let decoded = self.decode_run(
                mem,
                decoder,
                call.vertex_type,
                call.vertex_addr,
                count,
                call.vertex_size,
                params(call.uv_scale, morph_weights),
            );
            match decoded {
                Ok(()) => self.index_gen.add_prim(call.prim, count),
                Err(err) => {
                    warn!(vertex_addr = call.vertex_addr, %err, "dropping undecodable draw call")
                }
            }
            self.decode_counter += 1;
            return;
        }

        let mut lower = call.index_lower;
        let mut upper = call.index_upper;
        let mut end = self.decode_counter + 1;
        while end < calls.len()
            && calls[end].is_indexed()
            && calls[end].vertex_addr == call.vertex_addr
        {
            lower = lower.min(calls[end].index_lower);
            upper = upper.max(calls[end].index_upper);
            end += 1;
        }

        let count = (upper - lower) as usize + 1;
        let start = call
            .vertex_addr
            .wrapping_add(lower.wrapping_mul(call.vertex_size as u32));
        let decoded = self.decode_run(
            mem,
            decoder,
            call.vertex_type,
            start,
            count,
            call.vertex_size,
            params(call.uv_scale, morph_weights),
        );
        match decoded {
            Ok(()) => {
                for member in &calls[self.decode_counter..end] {
                    if let Err(err) = self.translate(mem, member, lower) {
                        warn!(index_addr = ?member.index_addr, %err, "dropping unreadable indices");
                    }
                }
                self.index_gen.advance(count);
            }
            Err(err) => {
                warn!(
                    vertex_addr = call.vertex_addr,
                    calls = end - self.decode_counter,
                    %err,
                    "dropping undecodable indexed draw calls"
                )
            }
        }
        self.decode_counter = end;
    }

    fn translate<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &M,
        call: &DeferredDrawCall,
        lower: u32,
    ) -> Result<(), DecodeError> {
        let Some((addr, len)) = call.index_range() else {
            return Ok(());
        };
        self.index_bytes.clear();
        self.index_bytes.resize(len, 0);
        mem.read(addr, &mut self.index_bytes)?;
        call.vertex_type
            .vertex_type()
            .index()
            .read_indices(&self.index_bytes, &mut self.indices);
        self.index_gen.translate_prim(call.prim, &self.indices, lower);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_run<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &M,
        decoder: &dyn VertexDecoder,
        id: VertexTypeId,
        addr: u32,
        count: usize,
        vertex_size: usize,
        params: DecodeParams,
    ) -> Result<(), DecodeError> {
        let decoded_so_far = self.index_gen.decoded_vertex_count();
        if decoded_so_far + count > MAX_DECODED_VERTICES {
            return Err(DecodeError::TooManyVertices {
                requested: decoded_so_far + count,
                max: MAX_DECODED_VERTICES,
            });
        }

        self.raw.clear();
        self.raw.resize(count * vertex_size, 0);
        mem.read(addr, &mut self.raw)?;

        let mark = self.decoded.len();
        match decoder.decode(id, &self.raw, count, &params, &mut self.decoded) {
            Ok(run) => {
                self.full_alpha &= run.full_alpha;
                Ok(())
            }
            Err(err) => {
                self.decoded.truncate(mark);
                Err(err)
            }
        }
    }
}

fn params(uv_scale: UvScale, morph_weights: &[f32; 8]) -> DecodeParams {
    DecodeParams {
        uv_scale,
        morph_weights: *morph_weights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::topology::GePrimitive;
    use crate::vertex::decoder::GeVertexDecoder;
    use crate::vertex::{VertexType, VTYPE_IDX_SHIFT, VTYPE_POS_SHIFT};
    use crate::VecGuestMemory;
    use pretty_assertions::assert_eq;

    const FLOAT_POS: u32 = 3 << VTYPE_POS_SHIFT;
    const WEIGHTS: [f32; 8] = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];

    fn indexed(vertex_addr: u32, index_addr: u32, lower: u32, upper: u32) -> DeferredDrawCall {
        DeferredDrawCall {
            vertex_addr,
            index_addr: Some(index_addr),
            vertex_type: VertexType(FLOAT_POS | (1 << VTYPE_IDX_SHIFT)).with_uv_gen_mode(0),
            prim: GePrimitive::Triangles,
            vertex_count: 3,
            index_lower: lower,
            index_upper: upper,
            uv_scale: UvScale::default(),
            vertex_size: 12,
        }
    }

    #[test]
    fn shared_vertex_source_decodes_once() {
        let mem = VecGuestMemory::new(0x1000);
        mem.write(0x800, &[2, 3, 4]).unwrap();
        mem.write(0x810, &[4, 5, 6]).unwrap();
        let calls = [indexed(0x100, 0x800, 2, 4), indexed(0x100, 0x810, 4, 6)];

        let mut state = DecodeState::default();
        state.decode_all(&calls, &mem, &GeVertexDecoder, &WEIGHTS);
        assert_eq!(state.decode_counter, 2);
        assert_eq!(state.index_gen.decoded_vertex_count(), 5);
        assert_eq!(state.decoded.len(), 5 * 12);
        assert_eq!(state.index_gen.indices(), &[0, 1, 2, 2, 3, 4]);
    }

    #[test]
    fn undecodable_call_counts_as_zero_vertices() {
        let mem = VecGuestMemory::new(0x100);
        let call = DeferredDrawCall {
            vertex_addr: 0x80,
            index_addr: None,
            vertex_type: VertexType(FLOAT_POS).with_uv_gen_mode(0),
            prim: GePrimitive::Triangles,
            vertex_count: 30,
            index_lower: 0,
            index_upper: 29,
            uv_scale: UvScale::default(),
            vertex_size: 12,
        };

        let mut state = DecodeState::default();
        state.decode_all(&[call], &mem, &GeVertexDecoder, &WEIGHTS);
        assert_eq!(state.decode_counter, 1);
        assert_eq!(state.index_gen.decoded_vertex_count(), 0);
        assert!(state.decoded.is_empty());
        assert_eq!(state.index_gen.prim(), GePrimitive::Points);
    }
}
