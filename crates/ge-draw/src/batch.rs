use std::fmt;

use crate::config::BatchLimits;
use crate::state::topology::GePrimitive;
use crate::state::UvScale;
use crate::vertex::VertexTypeId;

/// One recorded submission. Addresses point at guest-owned memory that may change before the
/// batch is flushed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeferredDrawCall {
    pub vertex_addr: u32,
    pub index_addr: Option<u32>,
    pub vertex_type: VertexTypeId,
    pub prim: GePrimitive,
    pub vertex_count: u32,
    /// Lowest vertex index referenced (0 for non-indexed calls).
    pub index_lower: u32,
    /// Highest vertex index referenced, inclusive.
    pub index_upper: u32,
    pub uv_scale: UvScale,
    /// Size of one raw guest vertex.
    pub vertex_size: usize,
}

impl DeferredDrawCall {
    pub fn is_indexed(&self) -> bool {
        self.index_addr.is_some()
    }

    pub fn index_size(&self) -> usize {
        self.vertex_type.vertex_type().index().size()
    }

    /// Number of raw vertices this call reads.
    pub fn referenced_vertices(&self) -> usize {
        (self.index_upper - self.index_lower) as usize + 1
    }

    /// Guest byte range `(addr, len)` of the vertices this call reads.
    pub fn vertex_range(&self) -> (u32, usize) {
        let start = self
            .vertex_addr
            .wrapping_add(self.index_lower.wrapping_mul(self.vertex_size as u32));
        (start, self.referenced_vertices() * self.vertex_size)
    }

    /// Guest byte range `(addr, len)` of this call's indices.
    pub fn index_range(&self) -> Option<(u32, usize)> {
        self.index_addr
            .map(|addr| (addr, self.vertex_count as usize * self.index_size()))
    }
}

/// Folds one call into the running draw-call identity.
pub fn mix_dcid(dcid: u32, call: &DeferredDrawCall) -> u32 {
    let mut h = dcid;
    h ^= call.vertex_addr;
    h = h.rotate_left(13);
    h ^= call.index_addr.unwrap_or(0);
    h = h.rotate_left(13);
    h ^= call.vertex_type.0;
    h = h.rotate_left(13);
    h ^= call.vertex_count;
    h = h.rotate_left(13);
    h ^= call.prim.raw();
    // The decoder bakes the prescale into the decoded UVs.
    for word in bytemuck::cast::<UvScale, [u32; 4]>(call.uv_scale) {
        h = h.rotate_left(13);
        h ^= word;
    }
    h
}

/// Why a submission forced the pending batch out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    IncompatiblePrimitive,
    CallLimit,
    VertexLimit,
    FormatChange,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlushReason::IncompatiblePrimitive => "incompatible primitive",
            FlushReason::CallLimit => "draw call limit",
            FlushReason::VertexLimit => "vertex limit",
            FlushReason::FormatChange => "vertex format change",
        };
        f.write_str(s)
    }
}

/// Draw calls accumulated since the last flush.
#[derive(Debug, Default)]
pub struct BatchState {
    calls: Vec<DeferredDrawCall>,
    vertex_count: usize,
    referenced_vertices: usize,
    prev_prim: Option<GePrimitive>,
    dcid: u32,
    vertex_type: Option<VertexTypeId>,
}

impl BatchState {
    pub fn with_limits(limits: &BatchLimits) -> Self {
        Self {
            calls: Vec::with_capacity(limits.max_deferred_draw_calls),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn calls(&self) -> &[DeferredDrawCall] {
        &self.calls
    }

    /// Submitted vertices (not referenced vertices) across the batch.
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Raw vertices the batch will decode, counting each call's referenced index span.
    pub fn referenced_vertices(&self) -> usize {
        self.referenced_vertices
    }

    pub fn prev_prim(&self) -> Option<GePrimitive> {
        self.prev_prim
    }

    pub fn dcid(&self) -> u32 {
        self.dcid
    }

    /// Decoder key shared by every call in the batch.
    pub fn vertex_type(&self) -> Option<VertexTypeId> {
        self.vertex_type
    }

    /// Returns the reason the batch must be flushed before recording the given submission.
    ///
    /// `referenced` is the number of raw vertices the submission reads, which for indexed draws
    /// can exceed `vertex_count`.
    pub fn flush_reason(
        &self,
        limits: &BatchLimits,
        id: VertexTypeId,
        prim: GePrimitive,
        vertex_count: usize,
        referenced: usize,
    ) -> Option<FlushReason> {
        if self.is_empty() {
            return None;
        }
        if !GePrimitive::compatible_with(self.prev_prim, prim) {
            Some(FlushReason::IncompatiblePrimitive)
        } else if self.calls.len() >= limits.max_deferred_draw_calls {
            Some(FlushReason::CallLimit)
        } else if self.vertex_count + vertex_count > limits.max_vertices
            || self.referenced_vertices + referenced > limits.max_vertices
        {
            Some(FlushReason::VertexLimit)
        } else if self.vertex_type != Some(id) {
            Some(FlushReason::FormatChange)
        } else {
            None
        }
    }

    /// Resolves `KeepPrevious` and remembers real primitives for later continuations.
    pub fn resolve_prim(&mut self, prim: GePrimitive) -> GePrimitive {
        if prim == GePrimitive::KeepPrevious {
            self.prev_prim.unwrap_or(GePrimitive::Points)
        } else {
            self.prev_prim = Some(prim);
            prim
        }
    }

    pub fn push(&mut self, call: DeferredDrawCall) {
        self.dcid = mix_dcid(self.dcid, &call);
        self.vertex_count += call.vertex_count as usize;
        self.referenced_vertices += call.referenced_vertices();
        self.vertex_type = Some(call.vertex_type);
        self.calls.push(call);
    }

    pub fn reset(&mut self) {
        self.calls.clear();
        self.vertex_count = 0;
        self.referenced_vertices = 0;
        self.prev_prim = None;
        self.dcid = 0;
        self.vertex_type = None;
    }
}
