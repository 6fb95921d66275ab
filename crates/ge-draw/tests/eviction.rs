mod common;

use common::*;
use ge_draw::{DrawEngineConfig, GePrimitive, ReliabilityState, VertexCacheTuning};
use pretty_assertions::assert_eq;

fn tuned() -> TestEngine {
    let config = DrawEngineConfig {
        cache: VertexCacheTuning {
            decimation_interval: 5,
            kill_age: 8,
            unreliable_kill_age: 2,
            unreliable_kill_max: 1,
            ..VertexCacheTuning::default()
        },
        ..DrawEngineConfig::default()
    };
    engine(config, RecordingBackend::hardware())
}

fn draw_triangle(engine: &mut TestEngine, addr: u32) {
    engine.submit(addr, None, GePrimitive::Triangles, 3, FLOAT_POS);
    engine.flush();
}

/// Tracks a record at `addr`, then rewrites its middle vertex so the next flush demotes it.
fn make_unreliable(engine: &mut TestEngine, addr: u32) {
    write_vertex_grid(engine.memory(), addr, 3);
    draw_triangle(engine, addr);
    engine.memory().write(addr + 12, &[0xee; 4]).unwrap();
    draw_triangle(engine, addr);
}

fn count_in(engine: &TestEngine, state: ReliabilityState) -> usize {
    engine.cache().iter().filter(|r| r.state == state).count()
}

#[test]
fn stale_records_are_evicted_by_the_sweep() {
    let mut engine = tuned();
    write_vertex_grid(engine.memory(), 0x1000, 3);
    draw_triangle(&mut engine, 0x1000);
    make_unreliable(&mut engine, 0x2000);
    make_unreliable(&mut engine, 0x3000);
    assert_eq!(count_in(&engine, ReliabilityState::Hashing), 1);
    assert_eq!(count_in(&engine, ReliabilityState::Unreliable), 2);
    assert_eq!(engine.backend().live_buffers(), 1);

    // No sweep until the interval elapses.
    for _ in 0..4 {
        engine.begin_frame();
    }
    assert_eq!(engine.cache().len(), 3);

    // Frame 5: unreliable records are past their shorter age, one per sweep.
    engine.begin_frame();
    assert_eq!(count_in(&engine, ReliabilityState::Unreliable), 1);
    assert_eq!(count_in(&engine, ReliabilityState::Hashing), 1);
    assert_eq!(engine.stats_snapshot().decimation_evictions, 1);

    // Frame 10: the hashing record is past the longer age too.
    for _ in 0..5 {
        engine.begin_frame();
    }
    assert!(engine.cache().is_empty());
    assert_eq!(engine.backend().live_buffers(), 0);
    let stats = engine.stats_snapshot();
    assert_eq!(stats.decimation_evictions, 3);
    assert_eq!(stats.tracked_vertex_arrays, 0);
    assert_eq!(stats.frames, 10);
}

#[test]
fn records_drawn_every_frame_survive() {
    let mut engine = tuned();
    write_vertex_grid(engine.memory(), 0x1000, 3);
    for _ in 0..30 {
        draw_triangle(&mut engine, 0x1000);
        engine.begin_frame();
    }
    assert_eq!(engine.cache().len(), 1);
    assert_eq!(count_in(&engine, ReliabilityState::Hashing), 1);
    assert_eq!(engine.stats_snapshot().decimation_evictions, 0);
    assert_eq!(engine.backend().uploads, 1);
}

#[test]
fn evicted_key_starts_over_as_new() {
    let mut engine = tuned();
    make_unreliable(&mut engine, 0x2000);
    for _ in 0..5 {
        engine.begin_frame();
    }
    assert!(engine.cache().is_empty());

    // The key is tracked again from scratch and gets a fresh upload.
    draw_triangle(&mut engine, 0x2000);
    assert_eq!(count_in(&engine, ReliabilityState::Hashing), 1);
    assert_eq!(engine.backend().uploads, 2);
    assert!(engine.backend().last_draw().is_cached());
}
