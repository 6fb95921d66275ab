//! Merges the primitives of one batch into a single 16-bit index list.
//!
//! Strips and fans are always expanded into list indices so that calls of the same class can be
//! concatenated. Batches made of one non-indexed list class (or a single leading triangle strip)
//! are "pure": their indices are the identity, so they can be drawn without an index buffer.

use bitflags::bitflags;

use crate::state::topology::GePrimitive;

bitflags! {
    /// Primitive kinds added to the generator since the last reset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SeenPrims: u16 {
        const POINTS = 1 << 0;
        const LINES = 1 << 1;
        const LINE_STRIP = 1 << 2;
        const TRIANGLES = 1 << 3;
        const TRIANGLE_STRIP = 1 << 4;
        const TRIANGLE_FAN = 1 << 5;
        const RECTANGLES = 1 << 6;
        /// Indices did not map 1:1 onto decoded vertices (indexed input or a partial primitive).
        const NON_PURE = 1 << 7;
    }
}

impl SeenPrims {
    fn for_primitive(prim: GePrimitive) -> Self {
        match prim {
            GePrimitive::Points | GePrimitive::KeepPrevious => Self::POINTS,
            GePrimitive::Lines => Self::LINES,
            GePrimitive::LineStrip => Self::LINE_STRIP,
            GePrimitive::Triangles => Self::TRIANGLES,
            GePrimitive::TriangleStrip => Self::TRIANGLE_STRIP,
            GePrimitive::TriangleFan => Self::TRIANGLE_FAN,
            GePrimitive::Rectangles => Self::RECTANGLES,
        }
    }
}

#[derive(Debug, Default)]
pub struct IndexGenerator {
    indices: Vec<u16>,
    /// Index of the next decoded vertex.
    base: u32,
    prim: Option<GePrimitive>,
    pure_count: usize,
    seen: SeenPrims,
}

impl IndexGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.indices.clear();
        self.base = 0;
        self.prim = None;
        self.pure_count = 0;
        self.seen = SeenPrims::empty();
    }

    pub fn is_empty(&self) -> bool {
        self.base == 0 && self.indices.is_empty()
    }

    /// Adds `count` consecutive decoded vertices drawn as `prim` and advances past them.
    pub fn add_prim(&mut self, prim: GePrimitive, count: usize) {
        let base = self.base;
        let emitted = self.emit(prim, count, |i| base + i as u32);
        let first = self.seen.is_empty();

        if prim == GePrimitive::TriangleStrip {
            if first {
                // A lone leading strip can be drawn as a strip.
                self.seen = SeenPrims::TRIANGLE_STRIP;
                self.prim = Some(GePrimitive::TriangleStrip);
                self.pure_count = count;
            } else {
                self.seen |= SeenPrims::TRIANGLE_STRIP | SeenPrims::TRIANGLES;
                self.prim = Some(GePrimitive::Triangles);
                self.pure_count = 0;
            }
        } else {
            self.seen |= SeenPrims::for_primitive(prim);
            self.prim = Some(output_primitive(prim));
            if emitted == count {
                self.pure_count += count;
            } else {
                self.seen |= SeenPrims::NON_PURE;
            }
        }

        self.advance(count);
    }

    /// Adds an indexed primitive whose vertices were decoded starting at the current base.
    ///
    /// `lower` is the guest index that maps onto the current base; the caller advances once the
    /// whole shared vertex run has been translated.
    pub fn translate_prim(&mut self, prim: GePrimitive, indices: &[u32], lower: u32) {
        let base = self.base;
        self.emit(prim, indices.len(), |i| {
            indices[i].wrapping_sub(lower).wrapping_add(base)
        });
        self.seen |= SeenPrims::for_primitive(prim) | SeenPrims::NON_PURE;
        self.prim = Some(output_primitive(prim));
    }

    pub fn advance(&mut self, count: usize) {
        self.base += count as u32;
    }

    /// Emits list indices for `count` input vertices, where `at(i)` is the decoded index of the
    /// `i`th input vertex. Returns the number of input vertices that formed whole primitives.
    fn emit(&mut self, prim: GePrimitive, count: usize, at: impl Fn(usize) -> u32) -> usize {
        let out = &mut self.indices;
        let mut push = |v: u32| out.push(v as u16);
        match prim {
            GePrimitive::Points | GePrimitive::KeepPrevious => {
                (0..count).for_each(|i| push(at(i)));
                count
            }
            GePrimitive::Lines | GePrimitive::Rectangles => {
                let whole = count - count % 2;
                (0..whole).for_each(|i| push(at(i)));
                whole
            }
            GePrimitive::LineStrip => {
                for i in 1..count {
                    push(at(i - 1));
                    push(at(i));
                }
                count
            }
            GePrimitive::Triangles => {
                let whole = count - count % 3;
                (0..whole).for_each(|i| push(at(i)));
                whole
            }
            GePrimitive::TriangleStrip => {
                for i in 0..count.saturating_sub(2) {
                    if i % 2 == 0 {
                        push(at(i));
                        push(at(i + 1));
                    } else {
                        push(at(i + 1));
                        push(at(i));
                    }
                    push(at(i + 2));
                }
                count
            }
            GePrimitive::TriangleFan => {
                for i in 1..count.saturating_sub(1) {
                    push(at(0));
                    push(at(i));
                    push(at(i + 1));
                }
                count
            }
        }
    }

    /// Output primitive of the merged list. Falls back to points if nothing was added.
    pub fn prim(&self) -> GePrimitive {
        self.prim.unwrap_or(GePrimitive::Points)
    }

    /// Forces the output primitive when nothing could be deduced from the batch.
    pub fn ensure_prim(&mut self) {
        if self.prim.is_none() {
            self.prim = Some(GePrimitive::Points);
        }
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    /// Number of generated indices.
    pub fn vertex_count(&self) -> usize {
        self.indices.len()
    }

    /// Number of decoded vertices consumed so far.
    pub fn decoded_vertex_count(&self) -> usize {
        self.base as usize
    }

    pub fn max_index(&self) -> u32 {
        self.base.saturating_sub(1)
    }

    pub fn pure_count(&self) -> usize {
        self.pure_count
    }

    pub fn seen(&self) -> SeenPrims {
        self.seen
    }

    /// Whether the batch can be drawn without indices.
    pub fn seen_only_pure_prims(&self) -> bool {
        self.seen == SeenPrims::POINTS
            || self.seen == SeenPrims::LINES
            || self.seen == SeenPrims::TRIANGLES
            || self.seen == SeenPrims::TRIANGLE_STRIP
    }
}

fn output_primitive(prim: GePrimitive) -> GePrimitive {
    match prim {
        GePrimitive::Points | GePrimitive::KeepPrevious => GePrimitive::Points,
        GePrimitive::Lines | GePrimitive::LineStrip => GePrimitive::Lines,
        GePrimitive::Triangles | GePrimitive::TriangleStrip | GePrimitive::TriangleFan => {
            GePrimitive::Triangles
        }
        GePrimitive::Rectangles => GePrimitive::Rectangles,
    }
}
