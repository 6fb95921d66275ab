//! Content hashes over the raw guest bytes a batch reads.
//!
//! Two tiers: the mini-hash samples a few fixed-size windows per range and is cheap enough to run
//! on every cached flush; the full hash covers every referenced byte plus per-draw parameters that
//! change the decoded output. Both hash raw guest memory, never decoded vertices, so decoder-only
//! differences cannot invalidate a cached record.

use xxhash_rust::xxh3::xxh3_64_with_seed;
use xxhash_rust::xxh32::xxh32;

use crate::batch::DeferredDrawCall;
use crate::guest_memory::{GuestMemory, GuestMemoryError};

const MINI_WINDOW_BYTES: usize = 100;
/// Ranges longer than this many 32-bit words are sampled instead of read end to end.
const MINI_SAMPLE_THRESHOLD_WORDS: usize = 100;
const MINI_WINDOW_SEED: u32 = 0x3A44_B9C4;

const SEED_VERTICES: u64 = 0x1DE8_CAC4;
const SEED_INDEXED_VERTICES: u64 = 0x029F_3EE1;
const SEED_INDICES: u64 = 0x955F_D1CA;
const SEED_UV_SCALE: u64 = 0x0123_e658;

/// Hashes batches of deferred draw calls, reusing one scratch buffer for guest reads.
#[derive(Debug, Default)]
pub struct HashEngine {
    scratch: Vec<u8>,
}

impl HashEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<'a, M: GuestMemory + ?Sized>(
        scratch: &'a mut Vec<u8>,
        mem: &M,
        addr: u32,
        len: usize,
    ) -> Result<&'a [u8], GuestMemoryError> {
        scratch.clear();
        scratch.resize(len, 0);
        mem.read(addr, scratch)?;
        Ok(scratch.as_slice())
    }

    /// Sampled hash of one guest byte range.
    pub fn mini_hash_range<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &M,
        addr: u32,
        len: usize,
    ) -> Result<u32, GuestMemoryError> {
        let words = len / 4;
        if words == 0 {
            return Ok(0);
        }

        if words > MINI_SAMPLE_THRESHOLD_WORDS {
            let step = words / 4;
            let end = words * 4;
            let mut hash = 0u32;
            for word in (0..words).step_by(step) {
                let offset = word * 4;
                let window = MINI_WINDOW_BYTES.min(end - offset);
                let start = addr.wrapping_add(offset as u32);
                let bytes = Self::read(&mut self.scratch, mem, start, window)?;
                hash = hash.wrapping_add(xxh32(bytes, MINI_WINDOW_SEED));
            }
            Ok(hash)
        } else {
            let mut first = [0u8; 4];
            let mut last = [0u8; 4];
            mem.read(addr, &mut first)?;
            mem.read(addr.wrapping_add(((words - 1) * 4) as u32), &mut last)?;
            Ok(u32::from_le_bytes(first).wrapping_add(u32::from_le_bytes(last)))
        }
    }

    /// Sampled hash of a batch. Large batches only sample a subset of their calls.
    pub fn mini_hash<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &M,
        calls: &[DeferredDrawCall],
    ) -> Result<u32, GuestMemoryError> {
        let step = match calls.len() {
            0..=2 => 1,
            3..=7 => 4,
            n => n / 8,
        };

        let mut hash = 0u32;
        for call in calls.iter().step_by(step) {
            let (addr, len) = call.vertex_range();
            hash = hash.wrapping_add(self.mini_hash_range(mem, addr, len)?);
            if let Some((addr, len)) = call.index_range() {
                hash = hash.wrapping_add(self.mini_hash_range(mem, addr, len)?);
            }
        }
        Ok(hash)
    }

    /// Hash of every byte the batch reads, plus the per-call UV prescale.
    ///
    /// Consecutive indexed calls sharing a vertex address are hashed as one vertex range spanning
    /// the union of their index bounds.
    pub fn full_hash<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &M,
        calls: &[DeferredDrawCall],
    ) -> Result<u64, GuestMemoryError> {
        let mut hash = 0u64;
        let mut i = 0;
        while i < calls.len() {
            let call = &calls[i];
            if !call.is_indexed() {
                let (addr, len) = call.vertex_range();
                let bytes = Self::read(&mut self.scratch, mem, addr, len)?;
                hash = hash.wrapping_add(xxh3_64_with_seed(bytes, SEED_VERTICES));
                i += 1;
                continue;
            }

            let mut lower = call.index_lower;
            let mut upper = call.index_upper;
            let mut end = i + 1;
            while end < calls.len()
                && calls[end].is_indexed()
                && calls[end].vertex_addr == call.vertex_addr
            {
                lower = lower.min(calls[end].index_lower);
                upper = upper.max(calls[end].index_upper);
                end += 1;
            }

            let merged = DeferredDrawCall {
                index_lower: lower,
                index_upper: upper,
                ..*call
            };
            let (addr, len) = merged.vertex_range();
            let bytes = Self::read(&mut self.scratch, mem, addr, len)?;
            hash = hash.wrapping_add(xxh3_64_with_seed(bytes, SEED_INDEXED_VERTICES));

            for member in &calls[i..end] {
                if let Some((addr, len)) = member.index_range() {
                    let bytes = Self::read(&mut self.scratch, mem, addr, len)?;
                    hash = hash.wrapping_add(xxh3_64_with_seed(bytes, SEED_INDICES));
                }
            }
            i = end;
        }

        self.scratch.clear();
        for call in calls {
            self.scratch.extend_from_slice(bytemuck::bytes_of(&call.uv_scale));
        }
        hash = hash.wrapping_add(xxh3_64_with_seed(&self.scratch, SEED_UV_SCALE));
        Ok(hash)
    }
}
