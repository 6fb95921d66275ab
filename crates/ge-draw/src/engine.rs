use tracing::{debug, trace, warn};

use crate::backend::{
    BufferKind, DrawBackend, DrawCommand, HardwareTransformQuery, IndexSource, VertexLayout,
    VertexSource,
};
use crate::batch::{BatchState, DeferredDrawCall};
use crate::cache::{
    CachedGeometry, ReliabilityState, VertexArrayCache, VertexArrayFlags, VertexArrayKey,
    VertexArrayRecord,
};
use crate::config::{DrawEngineConfig, VertexCacheTuning};
use crate::decode::DecodeState;
use crate::error::{BackendError, DecodeError};
use crate::guest_memory::{GuestMemory, GuestMemoryError};
use crate::hash::HashEngine;
use crate::software::{SoftwareAction, SoftwareTransformFallback, VertexTransformer};
use crate::state::topology::{BackendPrimitive, GePrimitive};
use crate::state::DrawState;
use crate::stats::{DrawStats, DrawStatsSnapshot};
use crate::vertex::decoder::GeVertexDecoder;
use crate::vertex::{DecodedFormat, IndexFormat, VertexDecoder, VertexType, VertexTypeId};

/// Decoder setup for the vertex type currently being batched.
#[derive(Debug, Clone, Copy)]
struct CurrentFormat {
    id: VertexTypeId,
    vertex_size: usize,
    decoded: DecodedFormat,
}

/// Batches GE draw submissions and turns them into backend draws.
///
/// Single-threaded: the command-stream interpreter calls [`DrawEngine::submit`] for every PRIM
/// command, [`DrawEngine::flush`] before any state change that affects pending draws, and
/// [`DrawEngine::begin_frame`] once per displayed frame.
pub struct DrawEngine<M, B: DrawBackend> {
    config: DrawEngineConfig,
    state: DrawState,
    batch: BatchState,
    decode: DecodeState,
    hasher: HashEngine,
    // Declared before `backend` so cached buffers are released while the backend is alive.
    cache: VertexArrayCache<B::Buffer>,
    decoder: Box<dyn VertexDecoder>,
    software: SoftwareTransformFallback,
    stats: DrawStats,
    frame: u32,
    format: Option<CurrentFormat>,
    index_bytes: Vec<u8>,
    index_values: Vec<u32>,
    memory: M,
    backend: B,
}

impl<M: GuestMemory, B: DrawBackend> DrawEngine<M, B> {
    pub fn new(config: DrawEngineConfig, memory: M, backend: B) -> Self {
        Self {
            config,
            state: DrawState::default(),
            batch: BatchState::with_limits(&config.batch),
            decode: DecodeState::default(),
            hasher: HashEngine::new(),
            cache: VertexArrayCache::new(config.cache),
            decoder: Box::new(GeVertexDecoder::new()),
            software: SoftwareTransformFallback::default(),
            stats: DrawStats::new(),
            frame: 0,
            format: None,
            index_bytes: Vec::new(),
            index_values: Vec::new(),
            memory,
            backend,
        }
    }

    pub fn config(&self) -> &DrawEngineConfig {
        &self.config
    }

    pub fn state(&self) -> &DrawState {
        &self.state
    }

    /// Render state. Flush first if the change must not affect already batched draws.
    pub fn state_mut(&mut self) -> &mut DrawState {
        &mut self.state
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn stats(&self) -> &DrawStats {
        &self.stats
    }

    pub fn stats_snapshot(&self) -> DrawStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache(&self) -> &VertexArrayCache<B::Buffer> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut VertexArrayCache<B::Buffer> {
        &mut self.cache
    }

    pub fn batch(&self) -> &BatchState {
        &self.batch
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Replaces the vertex decoder. Pending draws are flushed with the old one.
    pub fn set_vertex_decoder(&mut self, decoder: Box<dyn VertexDecoder>) {
        self.flush();
        self.decoder = decoder;
        self.format = None;
    }

    pub fn set_vertex_transformer(&mut self, transformer: Box<dyn VertexTransformer>) {
        self.flush();
        self.software.set_transformer(transformer);
    }

    fn setup_format(&mut self, id: VertexTypeId) -> Result<CurrentFormat, DecodeError> {
        if let Some(format) = self.format.filter(|f| f.id == id) {
            return Ok(format);
        }
        let format = CurrentFormat {
            id,
            vertex_size: self.decoder.vertex_size(id)?,
            decoded: self.decoder.decoded_format(id)?,
        };
        self.format = Some(format);
        Ok(format)
    }

    /// Reads a call's indices and returns the inclusive `[lower, upper]` vertex range they use.
    fn index_bounds(
        &mut self,
        addr: u32,
        count: u32,
        format: IndexFormat,
    ) -> Result<(u32, u32), GuestMemoryError> {
        self.index_bytes.clear();
        self.index_bytes.resize(count as usize * format.size(), 0);
        self.memory.read(addr, &mut self.index_bytes)?;
        format.read_indices(&self.index_bytes, &mut self.index_values);
        let lower = self.index_values.iter().copied().min().unwrap_or(0);
        let upper = self.index_values.iter().copied().max().unwrap_or(0);
        Ok((lower, upper))
    }

    /// Records one draw submission and returns the number of raw vertex bytes it covers.
    ///
    /// The pending batch is flushed first when the submission cannot join it. Degenerate draws
    /// (fewer vertices than one primitive) are dropped but still report their size.
    pub fn submit(
        &mut self,
        vertex_addr: u32,
        index_addr: Option<u32>,
        prim: GePrimitive,
        vertex_count: u32,
        vertex_type: VertexType,
    ) -> usize {
        let id = vertex_type.with_uv_gen_mode(self.state.uv_gen_mode);
        let index_format = vertex_type.index();
        let index_addr = index_addr.filter(|_| index_format != IndexFormat::None);
        let bounds = match index_addr {
            None => Ok((0, vertex_count.saturating_sub(1))),
            Some(addr) => self.index_bounds(addr, vertex_count, index_format),
        };
        let referenced = bounds
            .as_ref()
            .map_or(0, |&(lower, upper)| (upper - lower) as usize + 1);

        if let Some(reason) = self.batch.flush_reason(
            &self.config.batch,
            id,
            prim,
            vertex_count as usize,
            referenced,
        ) {
            trace!(%reason, pending = self.batch.len(), "flushing before submission");
            self.flush();
        }

        let prim = self.batch.resolve_prim(prim);
        let format = match self.setup_format(id) {
            Ok(format) => format,
            Err(err) => {
                warn!(?vertex_type, %err, "dropping draw with unsupported vertex type");
                return 0;
            }
        };
        let bytes = vertex_count as usize * format.vertex_size;

        if vertex_count < prim.min_vertices() {
            return bytes;
        }

        let (index_lower, index_upper) = match bounds {
            Ok(bounds) => bounds,
            Err(err) => {
                warn!(index_addr = ?index_addr, %err, "dropping draw with unreadable indices");
                return bytes;
            }
        };
        if referenced > self.config.batch.max_vertices {
            warn!(index_lower, index_upper, "dropping indexed draw referencing too many vertices");
            return bytes;
        }

        self.batch.push(DeferredDrawCall {
            vertex_addr,
            index_addr,
            vertex_type: id,
            prim,
            vertex_count,
            index_lower,
            index_upper,
            uv_scale: self.state.uv_scale,
            vertex_size: format.vertex_size,
        });

        if self.config.software_skinning && vertex_type.has_weights() {
            self.decode.decode_step(
                self.batch.calls(),
                &self.memory,
                self.decoder.as_ref(),
                &self.state.morph_weights,
            );
        }

        if prim == GePrimitive::Rectangles
            && self.state.texture_is_render_target()
            && !self.config.disable_slow_framebuffer_effects
        {
            self.state.texture_params_dirty = true;
            self.flush();
        }

        bytes
    }

    /// Draws everything batched since the last flush. Does nothing when the batch is empty.
    pub fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let Some(format) = self.format.filter(|f| Some(f.id) == self.batch.vertex_type()) else {
            warn!("batch has no decoder setup; discarding");
            self.reset_batch();
            return;
        };

        self.stats.inc_flushes();
        let vertex_type = format.id.vertex_type();
        let primitive = self.batch.calls()[0].prim;
        let hardware = primitive != GePrimitive::Rectangles
            && self.backend.supports_hardware_transform(&HardwareTransformQuery {
                primitive,
                vertex_type,
                through: vertex_type.is_through(),
            });
        trace!(
            calls = self.batch.len(),
            verts = self.batch.vertex_count(),
            hardware,
            "flush"
        );

        if hardware {
            self.flush_hardware(format);
        } else {
            self.flush_software(format);
        }

        self.stats.add_draw_calls(self.batch.len() as u64);
        self.stats.add_verts_submitted(self.batch.vertex_count() as u64);
        self.stats.set_tracked_vertex_arrays(self.cache.len() as u64);
        self.reset_batch();
    }

    fn reset_batch(&mut self) {
        self.decode.reset();
        self.batch.reset();
    }

    fn decode_all(&mut self) {
        self.decode.decode_all(
            self.batch.calls(),
            &self.memory,
            self.decoder.as_ref(),
            &self.state.morph_weights,
        );
    }

    fn flush_hardware(&mut self, format: CurrentFormat) {
        let vertex_type = format.id.vertex_type();
        let use_cache = self.config.vertex_cache
            && !vertex_type.has_morph()
            && !(self.config.software_skinning && vertex_type.has_weights());
        if !use_cache {
            self.decode_all();
            self.draw_immediate(format);
            return;
        }

        let key = VertexArrayKey {
            dcid: self.batch.dcid(),
            vertex_type: format.id,
            prim: self.batch.calls()[0].prim,
        };
        let frame = self.frame;
        let tuning = *self.cache.tuning();
        let record = self.cache.entry(key, frame);

        let outcome = match record.state {
            ReliabilityState::New => {
                let calls = self.batch.calls();
                let hashes = self
                    .hasher
                    .full_hash(&self.memory, calls)
                    .and_then(|full| Ok((full, self.hasher.mini_hash(&self.memory, calls)?)));
                match hashes {
                    Ok((full_hash, mini_hash)) => {
                        debug!(?key, full_hash, mini_hash, "tracking new vertex array");
                        record.full_hash = full_hash;
                        record.mini_hash = mini_hash;
                        record.state = ReliabilityState::Hashing;
                        record.draws_until_next_full_hash = 0;
                        CacheOutcome::Upload
                    }
                    Err(err) => {
                        warn!(?key, %err, "cannot hash vertex array; drawing uncached");
                        record.mark_unreliable();
                        self.stats.inc_unreliable_demotions();
                        CacheOutcome::Immediate
                    }
                }
            }
            ReliabilityState::Hashing => {
                record.touch(frame);
                let verified = verify_hashes(
                    record,
                    &mut self.hasher,
                    &self.memory,
                    self.batch.calls(),
                    &tuning,
                )
                .unwrap_or_else(|err| {
                    warn!(?key, %err, "cannot rehash vertex array");
                    false
                });
                if !verified {
                    record.mark_unreliable();
                    self.stats.inc_unreliable_demotions();
                    CacheOutcome::Immediate
                } else if record.has_buffers() {
                    CacheOutcome::Cached
                } else {
                    CacheOutcome::Upload
                }
            }
            ReliabilityState::Reliable => {
                record.touch(frame);
                if record.has_buffers() {
                    CacheOutcome::Cached
                } else {
                    CacheOutcome::Upload
                }
            }
            ReliabilityState::Unreliable => {
                record.touch(frame);
                CacheOutcome::Immediate
            }
        };
        record.last_frame = frame;

        match outcome {
            CacheOutcome::Cached => self.draw_cached(key, format),
            CacheOutcome::Upload => self.upload_and_draw(key, format),
            CacheOutcome::Immediate => {
                self.decode_all();
                self.draw_immediate(format);
            }
        }
    }

    fn draw_cached(&mut self, key: VertexArrayKey, format: CurrentFormat) {
        let Some(record) = self.cache.get(&key) else {
            return;
        };
        self.stats.inc_cached_draw_calls();
        self.stats.add_cached_verts_drawn(record.num_verts as u64);
        let vertex_full_alpha = record.flags.contains(VertexArrayFlags::VERTEX_FULL_ALPHA);
        let full_alpha = self.resolve_full_alpha(format, vertex_full_alpha);
        draw_record(&mut self.backend, record, format.decoded, full_alpha);
    }

    fn upload_and_draw(&mut self, key: VertexArrayKey, format: CurrentFormat) {
        self.decode_all();
        let gen = &self.decode.index_gen;
        if gen.decoded_vertex_count() == 0 {
            return;
        }

        let use_elements = !gen.seen_only_pure_prims();
        let num_verts = if !use_elements && gen.pure_count() != 0 {
            gen.pure_count()
        } else {
            gen.vertex_count()
        };
        let full_alpha = self.resolve_full_alpha(format, self.decode.full_alpha);

        let Some(record) = self.cache.get_mut(&key) else {
            return;
        };
        record.num_verts = num_verts;
        record.prim = gen.prim();
        record.max_index = gen.max_index();
        record.flags = if self.decode.full_alpha {
            VertexArrayFlags::VERTEX_FULL_ALPHA
        } else {
            VertexArrayFlags::empty()
        };

        match upload_geometry(&mut self.backend, &self.decode, use_elements) {
            Ok(geometry) => {
                debug!(?key, num_verts, indexed = use_elements, "uploaded vertex array");
                record.set_buffers(geometry);
                self.stats.inc_vertex_array_uploads();
                draw_record(&mut self.backend, record, format.decoded, full_alpha);
            }
            Err(err) => {
                warn!(?key, %err, "vertex array buffer creation failed; drawing uncached");
                self.stats.inc_buffer_create_failures();
                self.draw_immediate(format);
            }
        }
    }

    fn draw_immediate(&mut self, format: CurrentFormat) {
        let gen = &self.decode.index_gen;
        self.stats.add_uncached_verts_drawn(gen.vertex_count() as u64);
        if gen.vertex_count() == 0 {
            return;
        }

        let use_elements = !gen.seen_only_pure_prims();
        let vertex_count = if !use_elements && gen.pure_count() != 0 {
            gen.pure_count()
        } else {
            gen.vertex_count()
        };
        let primitive = BackendPrimitive::from_ge(gen.prim());
        let full_alpha = self.resolve_full_alpha(format, self.decode.full_alpha);
        self.backend.draw(&DrawCommand {
            primitive,
            layout: VertexLayout::Decoded(format.decoded),
            vertices: VertexSource::Immediate(&self.decode.decoded),
            indices: use_elements.then(|| IndexSource::Immediate(gen.indices())),
            vertex_count,
            max_index: gen.max_index(),
            primitive_count: primitive.primitive_count(vertex_count),
            full_alpha,
        });
    }

    fn flush_software(&mut self, format: CurrentFormat) {
        self.decode_all();
        let gen = &self.decode.index_gen;
        self.stats.add_uncached_verts_drawn(gen.vertex_count() as u64);
        if gen.vertex_count() == 0 {
            return;
        }

        let full_alpha = self.resolve_full_alpha(format, self.decode.full_alpha);
        let action = self.software.run(
            gen.prim(),
            &format.decoded,
            &self.decode.decoded,
            gen.decoded_vertex_count(),
            gen.indices(),
            format.id.vertex_type().is_through(),
            &self.state,
        );
        match action {
            SoftwareAction::Draw {
                primitive,
                vertices,
                indices,
            } => {
                if vertices.is_empty() {
                    return;
                }
                self.stats.inc_software_transform_draws();
                let vertex_count = indices.map_or(vertices.len(), <[u16]>::len);
                self.backend.draw(&DrawCommand {
                    primitive,
                    layout: VertexLayout::Transformed,
                    vertices: VertexSource::Immediate(bytemuck::cast_slice(vertices)),
                    indices: indices.map(IndexSource::Immediate),
                    vertex_count,
                    max_index: vertices.len() as u32 - 1,
                    primitive_count: primitive.primitive_count(vertex_count),
                    full_alpha,
                });
            }
            SoftwareAction::Clear(clear) => {
                debug!(mask = ?clear.mask, color = ?clear.color, "clear via full-target rectangle");
                self.stats.inc_clears();
                self.backend.clear(&clear);
            }
        }
    }

    fn resolve_full_alpha(&self, format: CurrentFormat, vertex_full_alpha: bool) -> bool {
        let vertex_type = format.id.vertex_type();
        self.state.resolve_full_alpha(
            vertex_full_alpha,
            vertex_type.has_color(),
            vertex_type.is_through(),
        )
    }

    /// Advances the frame counter and runs the cache decimation sweep when it is due.
    pub fn begin_frame(&mut self) {
        self.frame = self.frame.wrapping_add(1);
        self.stats.inc_frames();
        if let Some(report) = self.cache.decimate(self.frame) {
            if report.total() > 0 {
                debug!(
                    frame = self.frame,
                    evicted = report.evicted,
                    unreliable_evicted = report.unreliable_evicted,
                    remaining = self.cache.len(),
                    "vertex cache decimation"
                );
                self.stats.add_decimation_evictions(report.total() as u64);
            }
            self.stats.set_tracked_vertex_arrays(self.cache.len() as u64);
        }
    }

    /// Drops every cached vertex array and its backend buffers.
    pub fn clear_tracked_vertex_arrays(&mut self) {
        debug!(tracked = self.cache.len(), "clearing tracked vertex arrays");
        self.cache.clear();
        self.stats.set_tracked_vertex_arrays(0);
    }
}

impl<M, B: DrawBackend> Drop for DrawEngine<M, B> {
    fn drop(&mut self) {
        self.cache.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheOutcome {
    /// Draw from the record's buffers.
    Cached,
    /// Decode, upload into new buffers, draw from them.
    Upload,
    /// Decode and draw without touching the cache.
    Immediate,
}

/// Checks a hashing record against current guest memory. `Ok(false)` means the contents changed.
fn verify_hashes<M: GuestMemory + ?Sized, T>(
    record: &mut VertexArrayRecord<T>,
    hasher: &mut HashEngine,
    memory: &M,
    calls: &[DeferredDrawCall],
    tuning: &VertexCacheTuning,
) -> Result<bool, GuestMemoryError> {
    if record.draws_until_next_full_hash > 0 {
        record.draws_until_next_full_hash -= 1;
        return Ok(hasher.mini_hash(memory, calls)? == record.mini_hash);
    }

    if hasher.mini_hash(memory, calls)? != record.mini_hash {
        return Ok(false);
    }
    if hasher.full_hash(memory, calls)? != record.full_hash {
        return Ok(false);
    }
    record.schedule_full_hash(tuning);
    record.maybe_promote(tuning);
    Ok(true)
}

fn upload_geometry<B: DrawBackend>(
    backend: &mut B,
    decode: &DecodeState,
    use_elements: bool,
) -> Result<CachedGeometry<B::Buffer>, BackendError> {
    let vertex = backend.create_buffer(BufferKind::Vertex, decode.decoded.len())?;
    backend.upload(&vertex, &decode.decoded)?;

    let index = if use_elements {
        let indices = decode.index_gen.indices();
        let buffer = backend.create_buffer(BufferKind::Index, std::mem::size_of_val(indices))?;
        backend.upload(&buffer, bytemuck::cast_slice(indices))?;
        Some(buffer)
    } else {
        None
    };

    Ok(CachedGeometry { vertex, index })
}

fn draw_record<B: DrawBackend>(
    backend: &mut B,
    record: &VertexArrayRecord<B::Buffer>,
    format: DecodedFormat,
    full_alpha: bool,
) {
    let Some(geometry) = record.buffers() else {
        return;
    };
    let primitive = BackendPrimitive::from_ge(record.prim);
    backend.draw(&DrawCommand {
        primitive,
        layout: VertexLayout::Decoded(format),
        vertices: VertexSource::Buffer(&geometry.vertex),
        indices: geometry.index.as_ref().map(IndexSource::Buffer),
        vertex_count: record.num_verts,
        max_index: record.max_index,
        primitive_count: primitive.primitive_count(record.num_verts),
        full_alpha,
    });
}
