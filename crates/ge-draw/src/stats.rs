use std::sync::atomic::{AtomicU64, Ordering};

/// Telemetry counters for the draw engine.
///
/// Updated from the command-stream thread; readable from another thread (e.g. a debug overlay)
/// through [`DrawStats::snapshot`].
#[derive(Debug, Default)]
pub struct DrawStats {
    flushes: AtomicU64,
    draw_calls: AtomicU64,
    verts_submitted: AtomicU64,
    frames: AtomicU64,

    // ---------------------------------------------------------------------
    // Vertex array cache
    // ---------------------------------------------------------------------
    cached_draw_calls: AtomicU64,
    cached_verts_drawn: AtomicU64,
    uncached_verts_drawn: AtomicU64,
    /// Gauge: records currently held by the cache.
    tracked_vertex_arrays: AtomicU64,
    vertex_array_uploads: AtomicU64,
    buffer_create_failures: AtomicU64,
    unreliable_demotions: AtomicU64,
    decimation_evictions: AtomicU64,

    // ---------------------------------------------------------------------
    // Software transform
    // ---------------------------------------------------------------------
    software_transform_draws: AtomicU64,
    clears: AtomicU64,
}

impl DrawStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_flushes(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_draw_calls(&self, n: u64) {
        self.draw_calls.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_verts_submitted(&self, n: u64) {
        self.verts_submitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_frames(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cached_draw_calls(&self) {
        self.cached_draw_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_cached_verts_drawn(&self, n: u64) {
        self.cached_verts_drawn.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_uncached_verts_drawn(&self, n: u64) {
        self.uncached_verts_drawn.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_tracked_vertex_arrays(&self, n: u64) {
        self.tracked_vertex_arrays.store(n, Ordering::Relaxed);
    }

    pub fn inc_vertex_array_uploads(&self) {
        self.vertex_array_uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_buffer_create_failures(&self) {
        self.buffer_create_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unreliable_demotions(&self) {
        self.unreliable_demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_decimation_evictions(&self, n: u64) {
        self.decimation_evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_software_transform_draws(&self) {
        self.software_transform_draws.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_clears(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DrawStatsSnapshot {
        DrawStatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            draw_calls: self.draw_calls.load(Ordering::Relaxed),
            verts_submitted: self.verts_submitted.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),

            cached_draw_calls: self.cached_draw_calls.load(Ordering::Relaxed),
            cached_verts_drawn: self.cached_verts_drawn.load(Ordering::Relaxed),
            uncached_verts_drawn: self.uncached_verts_drawn.load(Ordering::Relaxed),
            tracked_vertex_arrays: self.tracked_vertex_arrays.load(Ordering::Relaxed),
            vertex_array_uploads: self.vertex_array_uploads.load(Ordering::Relaxed),
            buffer_create_failures: self.buffer_create_failures.load(Ordering::Relaxed),
            unreliable_demotions: self.unreliable_demotions.load(Ordering::Relaxed),
            decimation_evictions: self.decimation_evictions.load(Ordering::Relaxed),

            software_transform_draws: self
                .software_transform_draws
                .load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
        }
    }

    /// Returns a JSON object as a string.
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStatsSnapshot {
    pub flushes: u64,
    pub draw_calls: u64,
    pub verts_submitted: u64,
    pub frames: u64,

    pub cached_draw_calls: u64,
    pub cached_verts_drawn: u64,
    pub uncached_verts_drawn: u64,
    pub tracked_vertex_arrays: u64,
    pub vertex_array_uploads: u64,
    pub buffer_create_failures: u64,
    pub unreliable_demotions: u64,
    pub decimation_evictions: u64,

    pub software_transform_draws: u64,
    pub clears: u64,
}

impl DrawStatsSnapshot {
    pub fn to_json(self) -> String {
        // Hand-built: called from debug overlays every frame.
        format!(
            "{{\"flushes\":{},\"draw_calls\":{},\"verts_submitted\":{},\"frames\":{},\"vertex_cache\":{{\"cached_draw_calls\":{},\"cached_verts_drawn\":{},\"uncached_verts_drawn\":{},\"tracked\":{},\"uploads\":{},\"buffer_create_failures\":{},\"unreliable_demotions\":{},\"decimation_evictions\":{}}},\"software_transform_draws\":{},\"clears\":{}}}",
            self.flushes,
            self.draw_calls,
            self.verts_submitted,
            self.frames,
            self.cached_draw_calls,
            self.cached_verts_drawn,
            self.uncached_verts_drawn,
            self.tracked_vertex_arrays,
            self.vertex_array_uploads,
            self.buffer_create_failures,
            self.unreliable_demotions,
            self.decimation_evictions,
            self.software_transform_draws,
            self.clears,
        )
    }
}
