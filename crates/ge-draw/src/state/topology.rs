use std::fmt;

/// GE primitive types as they appear in a PRIM command.
///
/// `KeepPrevious` continues whatever primitive the batch is currently drawing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GePrimitive {
    Points = 0,
    Lines = 1,
    LineStrip = 2,
    Triangles = 3,
    TriangleStrip = 4,
    TriangleFan = 5,
    Rectangles = 6,
    KeepPrevious = 7,
}

/// Topology class shared by primitives whose indices can be merged into one list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveClass {
    Points,
    Lines,
    Triangles,
    Rectangles,
}

impl GePrimitive {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 7 {
            0 => Self::Points,
            1 => Self::Lines,
            2 => Self::LineStrip,
            3 => Self::Triangles,
            4 => Self::TriangleStrip,
            5 => Self::TriangleFan,
            6 => Self::Rectangles,
            _ => Self::KeepPrevious,
        }
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Class of the index list this primitive is merged into. `None` for `KeepPrevious`.
    pub fn class(self) -> Option<PrimitiveClass> {
        match self {
            Self::Points => Some(PrimitiveClass::Points),
            Self::Lines | Self::LineStrip => Some(PrimitiveClass::Lines),
            Self::Triangles | Self::TriangleStrip | Self::TriangleFan => {
                Some(PrimitiveClass::Triangles)
            }
            Self::Rectangles => Some(PrimitiveClass::Rectangles),
            Self::KeepPrevious => None,
        }
    }

    /// Whether `next` can join a batch whose last primitive was `prev`.
    pub fn compatible_with(prev: Option<Self>, next: Self) -> bool {
        match prev {
            None => true,
            Some(_) if next == Self::KeepPrevious => true,
            Some(prev) => prev.class() == next.class(),
        }
    }

    /// Submissions with fewer vertices than this draw nothing.
    pub fn min_vertices(self) -> u32 {
        match self {
            Self::Points | Self::KeepPrevious => 1,
            Self::Lines | Self::LineStrip | Self::Rectangles => 2,
            Self::Triangles | Self::TriangleStrip | Self::TriangleFan => 3,
        }
    }
}

impl fmt::Display for GePrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GePrimitive::Points => "points",
            GePrimitive::Lines => "lines",
            GePrimitive::LineStrip => "line_strip",
            GePrimitive::Triangles => "triangles",
            GePrimitive::TriangleStrip => "triangle_strip",
            GePrimitive::TriangleFan => "triangle_fan",
            GePrimitive::Rectangles => "rectangles",
            GePrimitive::KeepPrevious => "keep_previous",
        };
        f.write_str(s)
    }
}

/// Primitive topologies the backend draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendPrimitive {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl BackendPrimitive {
    /// Backend topology for an index-generator output primitive.
    ///
    /// Rectangles have no backend equivalent; they are drawn as triangle lists once expanded.
    pub fn from_ge(primitive: GePrimitive) -> Self {
        match primitive {
            GePrimitive::Points | GePrimitive::KeepPrevious => Self::PointList,
            GePrimitive::Lines => Self::LineList,
            GePrimitive::LineStrip => Self::LineStrip,
            GePrimitive::Triangles | GePrimitive::Rectangles => Self::TriangleList,
            GePrimitive::TriangleStrip => Self::TriangleStrip,
            GePrimitive::TriangleFan => Self::TriangleFan,
        }
    }

    /// Number of primitives drawn from `vertex_count` vertices (or indices).
    pub fn primitive_count(self, vertex_count: usize) -> usize {
        match self {
            Self::PointList => vertex_count,
            Self::LineList => vertex_count / 2,
            Self::LineStrip => vertex_count.saturating_sub(1),
            Self::TriangleList => vertex_count / 3,
            Self::TriangleStrip | Self::TriangleFan => vertex_count.saturating_sub(2),
        }
    }
}

impl fmt::Display for BackendPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendPrimitive::PointList => "point_list",
            BackendPrimitive::LineList => "line_list",
            BackendPrimitive::LineStrip => "line_strip",
            BackendPrimitive::TriangleList => "triangle_list",
            BackendPrimitive::TriangleStrip => "triangle_strip",
            BackendPrimitive::TriangleFan => "triangle_fan",
        };
        f.write_str(s)
    }
}
