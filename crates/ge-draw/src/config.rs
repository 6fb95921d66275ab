/// Limits that force a flush before a submission is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum number of deferred draw calls held by one batch.
    pub max_deferred_draw_calls: usize,
    /// Maximum number of submitted vertices held by one batch. Decoded indices are 16-bit, so
    /// this must not exceed 65536.
    pub max_vertices: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_deferred_draw_calls: 128,
            max_vertices: 65536,
        }
    }
}

/// Tuning knobs for the vertex array cache.
///
/// Ages are measured in frames (see [`crate::DrawEngine::begin_frame`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexCacheTuning {
    /// The decimation sweep runs once every this many frames.
    pub decimation_interval: u32,
    /// Records that are not unreliable are evicted once unseen for more than this many frames.
    pub kill_age: u32,
    /// Unreliable records are evicted once unseen for more than this many frames.
    pub unreliable_kill_age: u32,
    /// Upper bound on unreliable evictions per sweep.
    pub unreliable_kill_max: usize,
    /// Cap on the number of mini-hash-only flushes between two full hashes.
    pub full_hash_backoff_cap: u32,
    /// Records with at most this many vertices are fully hashed on every flush.
    pub small_buffer_vertices: usize,
    /// Promote a hashing record to reliable after this many verified frames. `None` keeps every
    /// record under verification forever.
    pub reliable_after_frames: Option<u32>,
}

impl Default for VertexCacheTuning {
    fn default() -> Self {
        Self {
            decimation_interval: 17,
            kill_age: 120,
            unreliable_kill_age: 60,
            unreliable_kill_max: 4,
            full_hash_backoff_cap: 24,
            small_buffer_vertices: 64,
            reliable_after_frames: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawEngineConfig {
    /// Reuse uploaded geometry across flushes.
    pub vertex_cache: bool,
    /// Decode skinned vertices on the CPU as they are submitted.
    pub software_skinning: bool,
    /// Skip the extra flush when a rectangle samples from the framebuffer it renders to.
    pub disable_slow_framebuffer_effects: bool,
    pub batch: BatchLimits,
    pub cache: VertexCacheTuning,
}

impl Default for DrawEngineConfig {
    fn default() -> Self {
        Self {
            vertex_cache: true,
            software_skinning: false,
            disable_slow_framebuffer_effects: false,
            batch: BatchLimits::default(),
            cache: VertexCacheTuning::default(),
        }
    }
}
