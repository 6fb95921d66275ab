//! Vertex array cache: uploaded geometry keyed by draw-call identity.
//!
//! Each record walks a small state machine:
//!
//! - `New`: first sighting. The flush hashes, decodes and uploads, then moves the record to
//!   `Hashing`.
//! - `Hashing`: the uploaded buffers are reused while the content hashes keep matching. Full hashes
//!   are spaced out with a capped backoff; mini-hashes run on every flush in between.
//! - `Reliable`: reused without hashing. Only entered when
//!   [`VertexCacheTuning::reliable_after_frames`] is set.
//! - `Unreliable`: a hash mismatched. Buffers are dropped and the key is drawn uncached until the
//!   record ages out.
//!
//! The backoff is a heuristic: a guest that rewrites unsampled bytes on exactly the flushes that
//! skip the full hash is drawn from stale buffers until the next full hash.

use std::fmt;

use bitflags::bitflags;
use hashbrown::HashMap;
use tracing::debug;

use crate::config::VertexCacheTuning;
use crate::state::topology::GePrimitive;
use crate::vertex::VertexTypeId;

/// Identity of a batch as seen by the cache.
///
/// `dcid` covers addresses, counts, vertex types and primitives of every call; the vertex type
/// id and primitive are repeated so that the decode-affecting mode bits always split records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexArrayKey {
    pub dcid: u32,
    pub vertex_type: VertexTypeId,
    pub prim: GePrimitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReliabilityState {
    New,
    Hashing,
    Reliable,
    Unreliable,
}

impl fmt::Display for ReliabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReliabilityState::New => "new",
            ReliabilityState::Hashing => "hashing",
            ReliabilityState::Reliable => "reliable",
            ReliabilityState::Unreliable => "unreliable",
        };
        f.write_str(s)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VertexArrayFlags: u8 {
        /// Every decoded vertex color was fully opaque when the record was uploaded.
        const VERTEX_FULL_ALPHA = 1 << 0;
    }
}

/// Backend buffers holding a record's decoded geometry.
#[derive(Debug)]
pub struct CachedGeometry<B> {
    pub vertex: B,
    /// `None` when the geometry is drawn without indices.
    pub index: Option<B>,
}

#[derive(Debug)]
pub struct VertexArrayRecord<B> {
    pub key: VertexArrayKey,
    pub state: ReliabilityState,
    pub full_hash: u64,
    pub mini_hash: u32,
    /// Vertices drawn from the cached buffers (index count when indexed).
    pub num_verts: usize,
    pub prim: GePrimitive,
    pub max_index: u32,
    pub flags: VertexArrayFlags,
    pub last_frame: u32,
    pub num_draws: u32,
    pub num_frames: u32,
    /// Mini-hash-only flushes left before the next full hash.
    pub draws_until_next_full_hash: u32,
    buffers: Option<CachedGeometry<B>>,
}

impl<B> VertexArrayRecord<B> {
    pub fn new(key: VertexArrayKey, frame: u32) -> Self {
        Self {
            key,
            state: ReliabilityState::New,
            full_hash: 0,
            mini_hash: 0,
            num_verts: 0,
            prim: key.prim,
            max_index: 0,
            flags: VertexArrayFlags::empty(),
            last_frame: frame,
            num_draws: 0,
            num_frames: 0,
            draws_until_next_full_hash: 0,
            buffers: None,
        }
    }

    pub fn buffers(&self) -> Option<&CachedGeometry<B>> {
        self.buffers.as_ref()
    }

    pub fn has_buffers(&self) -> bool {
        self.buffers.is_some()
    }

    /// Stores uploaded geometry. Only hashing and reliable records own buffers.
    pub fn set_buffers(&mut self, buffers: CachedGeometry<B>) {
        debug_assert!(matches!(
            self.state,
            ReliabilityState::Hashing | ReliabilityState::Reliable
        ));
        self.buffers = Some(buffers);
    }

    /// Records a sighting in `frame`.
    pub fn touch(&mut self, frame: u32) {
        self.num_draws += 1;
        if self.last_frame != frame {
            self.num_frames += 1;
        }
    }

    /// Demotes the record and releases its buffers.
    pub fn mark_unreliable(&mut self) {
        debug!(key = ?self.key, from = %self.state, "vertex array demoted to unreliable");
        self.state = ReliabilityState::Unreliable;
        self.buffers = None;
    }

    /// Reschedules the next full hash after a verified match.
    ///
    /// Large buffers back off as they survive more frames, up to the cap. Small buffers are more
    /// likely to be rewritten and are fully hashed every flush.
    pub fn schedule_full_hash(&mut self, tuning: &VertexCacheTuning) {
        self.draws_until_next_full_hash = if self.num_verts > tuning.small_buffer_vertices {
            tuning.full_hash_backoff_cap.min(self.num_frames)
        } else {
            0
        };
    }

    /// Promotes to reliable once enough verified frames have passed, if promotion is enabled.
    pub fn maybe_promote(&mut self, tuning: &VertexCacheTuning) {
        if let Some(after) = tuning.reliable_after_frames {
            if self.state == ReliabilityState::Hashing && self.num_frames >= after {
                debug!(
                    key = ?self.key,
                    frames = self.num_frames,
                    "vertex array promoted to reliable"
                );
                self.state = ReliabilityState::Reliable;
            }
        }
    }

    fn age(&self, frame: u32) -> u32 {
        frame.saturating_sub(self.last_frame)
    }
}

/// Outcome of one decimation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecimationReport {
    pub evicted: usize,
    pub unreliable_evicted: usize,
}

impl DecimationReport {
    pub fn total(&self) -> usize {
        self.evicted + self.unreliable_evicted
    }
}

#[derive(Debug)]
pub struct VertexArrayCache<B> {
    records: HashMap<VertexArrayKey, VertexArrayRecord<B>>,
    tuning: VertexCacheTuning,
    decimation_countdown: u32,
}

impl<B> VertexArrayCache<B> {
    pub fn new(tuning: VertexCacheTuning) -> Self {
        Self {
            records: HashMap::new(),
            tuning,
            decimation_countdown: tuning.decimation_interval,
        }
    }

    pub fn tuning(&self) -> &VertexCacheTuning {
        &self.tuning
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &VertexArrayKey) -> Option<&VertexArrayRecord<B>> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &VertexArrayKey) -> Option<&mut VertexArrayRecord<B>> {
        self.records.get_mut(key)
    }

    /// Returns the record for `key`, creating a `New` one on a miss.
    pub fn entry(&mut self, key: VertexArrayKey, frame: u32) -> &mut VertexArrayRecord<B> {
        self.records
            .entry(key)
            .or_insert_with(|| VertexArrayRecord::new(key, frame))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VertexArrayRecord<B>> {
        self.records.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VertexArrayRecord<B>> {
        self.records.values_mut()
    }

    pub fn remove(&mut self, key: &VertexArrayKey) -> Option<VertexArrayRecord<B>> {
        self.records.remove(key)
    }

    /// Drops every record and its buffers.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Ticks the decimation countdown and sweeps when it expires.
    pub fn decimate(&mut self, frame: u32) -> Option<DecimationReport> {
        self.decimation_countdown = self.decimation_countdown.saturating_sub(1);
        if self.decimation_countdown > 0 {
            return None;
        }
        self.decimation_countdown = self.tuning.decimation_interval.max(1);
        Some(self.sweep(frame))
    }

    /// Evicts records not seen recently. Unreliable records use the shorter age and are capped
    /// per sweep.
    pub fn sweep(&mut self, frame: u32) -> DecimationReport {
        let tuning = self.tuning;
        let mut report = DecimationReport::default();
        self.records.retain(|key, record| {
            let age = record.age(frame);
            let evict = if record.state == ReliabilityState::Unreliable {
                age > tuning.unreliable_kill_age
                    && report.unreliable_evicted < tuning.unreliable_kill_max
            } else {
                age > tuning.kill_age
            };
            if evict {
                debug!(key = ?key, state = %record.state, age, "evicting vertex array");
                if record.state == ReliabilityState::Unreliable {
                    report.unreliable_evicted += 1;
                } else {
                    report.evicted += 1;
                }
            }
            !evict
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::{VertexType, VTYPE_POS_SHIFT};
    use std::cell::Cell;
    use std::rc::Rc;

    struct Tracked(Rc<Cell<u32>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() - 1);
        }
    }

    fn key(dcid: u32) -> VertexArrayKey {
        VertexArrayKey {
            dcid,
            vertex_type: VertexType(3 << VTYPE_POS_SHIFT).with_uv_gen_mode(0),
            prim: GePrimitive::Triangles,
        }
    }

    fn tracked(live: &Rc<Cell<u32>>) -> Tracked {
        live.set(live.get() + 1);
        Tracked(live.clone())
    }

    #[test]
    fn demotion_releases_buffers() {
        let live = Rc::new(Cell::new(0));
        let mut cache = VertexArrayCache::new(VertexCacheTuning::default());
        let record = cache.entry(key(1), 0);
        record.state = ReliabilityState::Hashing;
        record.set_buffers(CachedGeometry {
            vertex: tracked(&live),
            index: Some(tracked(&live)),
        });
        assert_eq!(live.get(), 2);

        record.mark_unreliable();
        assert_eq!(live.get(), 0);
        assert!(!record.has_buffers());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clearing_releases_buffers() {
        let live = Rc::new(Cell::new(0));
        let mut cache = VertexArrayCache::new(VertexCacheTuning::default());
        for dcid in 0..3 {
            let record = cache.entry(key(dcid), 0);
            record.state = ReliabilityState::Hashing;
            record.set_buffers(CachedGeometry {
                vertex: tracked(&live),
                index: None,
            });
        }
        assert_eq!(live.get(), 3);
        cache.clear();
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn backoff_is_capped_and_skipped_for_small_buffers() {
        let tuning = VertexCacheTuning::default();
        let mut record: VertexArrayRecord<()> = VertexArrayRecord::new(key(1), 0);
        record.num_verts = 1000;
        record.num_frames = 5;
        record.schedule_full_hash(&tuning);
        assert_eq!(record.draws_until_next_full_hash, 5);

        record.num_frames = 500;
        record.schedule_full_hash(&tuning);
        assert_eq!(record.draws_until_next_full_hash, 24);

        record.num_verts = 64;
        record.schedule_full_hash(&tuning);
        assert_eq!(record.draws_until_next_full_hash, 0);
    }

    #[test]
    fn touch_counts_frames_once() {
        let mut record: VertexArrayRecord<()> = VertexArrayRecord::new(key(1), 3);
        record.touch(3);
        record.touch(4);
        record.last_frame = 4;
        record.touch(4);
        assert_eq!(record.num_draws, 3);
        assert_eq!(record.num_frames, 1);
    }

    #[test]
    fn sweep_uses_per_state_ages_and_caps_unreliable() {
        let tuning = VertexCacheTuning {
            kill_age: 10,
            unreliable_kill_age: 5,
            unreliable_kill_max: 2,
            ..VertexCacheTuning::default()
        };
        let mut cache: VertexArrayCache<()> = VertexArrayCache::new(tuning);
        cache.entry(key(1), 0).state = ReliabilityState::Hashing;
        cache.entry(key(2), 8).state = ReliabilityState::Hashing;
        for dcid in 10..14 {
            cache.entry(key(dcid), 0).state = ReliabilityState::Unreliable;
        }

        let report = cache.sweep(12);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.unreliable_evicted, 2);
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
        assert_eq!(cache.len(), 3);

        let report = cache.sweep(12);
        assert_eq!(report.unreliable_evicted, 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn decimation_runs_once_per_interval() {
        let tuning = VertexCacheTuning {
            decimation_interval: 3,
            ..VertexCacheTuning::default()
        };
        let mut cache: VertexArrayCache<()> = VertexArrayCache::new(tuning);
        assert_eq!(cache.decimate(1), None);
        assert_eq!(cache.decimate(2), None);
        assert_eq!(cache.decimate(3), Some(DecimationReport::default()));
        assert_eq!(cache.decimate(4), None);
    }

    #[test]
    fn promotion_is_opt_in() {
        let mut record: VertexArrayRecord<()> = VertexArrayRecord::new(key(1), 0);
        record.state = ReliabilityState::Hashing;
        record.num_frames = 1000;
        record.maybe_promote(&VertexCacheTuning::default());
        assert_eq!(record.state, ReliabilityState::Hashing);

        let tuning = VertexCacheTuning {
            reliable_after_frames: Some(100),
            ..VertexCacheTuning::default()
        };
        record.maybe_promote(&tuning);
        assert_eq!(record.state, ReliabilityState::Reliable);
    }
}
