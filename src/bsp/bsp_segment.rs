// src/bsp/bsp_segment.rs
// Line segments (half-edges) and the vertex store with its edge-tip rings.

use crate::bsp::bsp_util::{EdgeGeometry, Point2D};
use crate::bsp::{BuildError, SegmentSide, ANG_EPSILON};

pub type SegmentIndex = usize;
pub type VertexIndex = usize;
pub type SectorIndex = usize;
pub type LineIndex = usize;

/// A directed line segment in the plane; doubles as the half-edge that
/// ends up linked into a leaf ring. All cross-references are indices into
/// the build's arenas.
#[derive(Debug, Clone)]
pub struct Segment {
    pub from: VertexIndex,
    pub to: VertexIndex,

    /// The sector this segment's front faces. May be `None` for partition
    /// caps crossing open space.
    pub sector: Option<SectorIndex>,

    /// The map line this segment lies on; `None` for partition caps.
    pub line: Option<LineIndex>,

    /// Which side of `line` the segment runs along.
    pub side: SegmentSide,

    /// Collinearity grouping: segments sharing a source line are never
    /// considered to intersect each other, whatever the arithmetic says.
    /// Partition caps inherit the partition's line here.
    pub source_line: Option<LineIndex>,

    /// The opposite-direction segment bounding the same line from the
    /// other side, if any.
    pub twin: Option<SegmentIndex>,

    /// Links threading collinear segments that share one original line
    /// side, built up by successive splits.
    pub prev_on_side: Option<SegmentIndex>,
    pub next_on_side: Option<SegmentIndex>,

    /// The superblock currently holding this segment, cleared while the
    /// segment is being partitioned.
    pub block: Option<usize>,

    /// Leaf ring linkage, populated once the segment lands in a leaf.
    pub leaf: Option<usize>,
    pub next_in_leaf: Option<SegmentIndex>,
    pub prev_in_leaf: Option<SegmentIndex>,

    pub geometry: EdgeGeometry,

    /// Set when the collapse-orphans policy deletes this half-edge.
    pub dead: bool,
}

impl Segment {
    pub fn is_map_side(&self) -> bool {
        self.line.is_some()
    }
}

/// Flat arena of segments; indices are stable for the life of a build.
#[derive(Default)]
pub struct SegmentStore {
    segments: Vec<Segment>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, segment: Segment) -> SegmentIndex {
        self.segments.push(segment);
        self.segments.len() - 1
    }

    pub fn get(&self, index: SegmentIndex) -> &Segment {
        &self.segments[index]
    }

    pub fn get_mut(&mut self, index: SegmentIndex) -> &mut Segment {
        &mut self.segments[index]
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// One record per segment emerging from a vertex: the segment leaving
/// along `angle` sits in the `front` slot, the one arriving from that
/// direction in `back`.
#[derive(Debug, Clone)]
pub struct EdgeTip {
    pub angle: f64,
    pub front: Option<SegmentIndex>,
    pub back: Option<SegmentIndex>,
}

/// Extra per-vertex build data: line-owner totals and the edge-tip ring,
/// kept sorted ascending by angle.
#[derive(Debug, Clone, Default)]
pub struct VertexInfo {
    pub one_sided_owners: usize,
    pub two_sided_owners: usize,
    pub tips: Vec<EdgeTip>,
}

/// Owns the coordinates of every vertex a build sees: the input map
/// vertices first, then the vertices created at split points.
pub struct VertexStore {
    origins: Vec<Point2D>,
    infos: Vec<VertexInfo>,
    num_input: usize,
    /// Build vertices whose ownership the caller has claimed.
    released: Vec<bool>,
}

impl VertexStore {
    pub fn new(input: Vec<Point2D>) -> Self {
        let num_input = input.len();
        let infos = vec![VertexInfo::default(); num_input];
        VertexStore {
            origins: input,
            infos,
            num_input,
            released: Vec::new(),
        }
    }

    pub fn origin(&self, vertex: VertexIndex) -> Point2D {
        self.origins[vertex]
    }

    pub fn info(&self, vertex: VertexIndex) -> &VertexInfo {
        &self.infos[vertex]
    }

    pub fn info_mut(&mut self, vertex: VertexIndex) -> &mut VertexInfo {
        &mut self.infos[vertex]
    }

    pub fn num_input(&self) -> usize {
        self.num_input
    }

    /// Create a vertex at a split point, returning its global index.
    pub fn push_build_vertex(&mut self, origin: Point2D) -> VertexIndex {
        self.origins.push(origin);
        self.infos.push(VertexInfo::default());
        self.released.push(false);
        self.origins.len() - 1
    }

    /// Access a build vertex by its build-local index (0 = first vertex
    /// the partitioner created). `None` once released or out of range.
    pub fn build_vertex(&self, index: usize) -> Option<Point2D> {
        if index >= self.released.len() || self.released[index] {
            return None;
        }
        Some(self.origins[self.num_input + index])
    }

    /// Transfer ownership of a build vertex to the caller.
    pub fn release_build_vertex(&mut self, index: usize) -> bool {
        if index >= self.released.len() || self.released[index] {
            return false;
        }
        self.released[index] = true;
        true
    }

    /// Record an edge tip at `vertex`; the ring stays sorted by angle.
    pub fn add_tip(
        &mut self,
        vertex: VertexIndex,
        angle: f64,
        front: Option<SegmentIndex>,
        back: Option<SegmentIndex>,
    ) {
        let tips = &mut self.infos[vertex].tips;
        let at = tips
            .iter()
            .position(|tip| tip.angle >= angle)
            .unwrap_or(tips.len());
        tips.insert(at, EdgeTip { angle, front, back });
    }

    /// Which sector (if any) is open in direction `angle` from `vertex`?
    ///
    /// Returns `Ok(None)` when the direction runs along an edge or into
    /// void space. A vertex without tips means the build is malformed.
    pub fn open_sector_at_angle(
        &self,
        vertex: VertexIndex,
        angle: f64,
        segments: &SegmentStore,
    ) -> Result<Option<SectorIndex>, BuildError> {
        let tips = &self.infos[vertex].tips;
        if tips.is_empty() {
            return Err(BuildError::MissingEdgeTips(vertex));
        }

        // Check whether a tip lies in the exact direction we are probing;
        // that means we are along an edge, which is closed.
        for tip in tips {
            let diff = (tip.angle - angle).abs();
            if diff < ANG_EPSILON || diff > 360.0 - ANG_EPSILON {
                return Ok(None);
            }
        }

        // Find the first tip whose angle is greater than ours; we are on
        // the front side of that tip.
        for tip in tips {
            if angle + ANG_EPSILON < tip.angle {
                return Ok(tip.front.and_then(|seg| segments.get(seg).sector));
            }
        }

        // Our angle is greater than every tip's; the open space is on the
        // back of the tip at the greatest angle.
        let tip = tips.last().unwrap();
        Ok(tip.back.and_then(|seg| segments.get(seg).sector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_segment(sector: Option<SectorIndex>) -> Segment {
        Segment {
            from: 0,
            to: 1,
            sector,
            line: Some(0),
            side: SegmentSide::Front,
            source_line: Some(0),
            twin: None,
            prev_on_side: None,
            next_on_side: None,
            block: None,
            leaf: None,
            next_in_leaf: None,
            prev_in_leaf: None,
            geometry: EdgeGeometry::new(Point2D::new(0.0, 0.0), Point2D::new(64.0, 0.0)),
            dead: false,
        }
    }

    #[test]
    fn test_tips_stay_sorted() {
        let mut store = VertexStore::new(vec![Point2D::new(0.0, 0.0)]);
        store.add_tip(0, 180.0, None, None);
        store.add_tip(0, 0.0, None, None);
        store.add_tip(0, 90.0, None, None);
        let angles: Vec<f64> = store.info(0).tips.iter().map(|t| t.angle).collect();
        assert_eq!(angles, vec![0.0, 90.0, 180.0]);
    }

    #[test]
    fn test_open_sector_queries() {
        let mut segments = SegmentStore::new();
        let front = segments.alloc(test_segment(Some(3)));
        let back = segments.alloc(test_segment(Some(5)));

        let mut store = VertexStore::new(vec![Point2D::new(0.0, 0.0)]);
        store.add_tip(0, 90.0, Some(front), Some(back));
        store.add_tip(0, 270.0, Some(back), Some(front));

        // Probing along a tip is closed.
        assert_eq!(store.open_sector_at_angle(0, 90.0, &segments).unwrap(), None);

        // Between 270 and 90 (through 0) we are behind the greatest tip.
        assert_eq!(
            store.open_sector_at_angle(0, 350.0, &segments).unwrap(),
            Some(3)
        );

        // Between 90 and 270 the first greater tip is 270, front side.
        assert_eq!(
            store.open_sector_at_angle(0, 180.0, &segments).unwrap(),
            Some(5)
        );
    }

    #[test]
    fn test_open_sector_without_tips_is_fatal() {
        let segments = SegmentStore::new();
        let store = VertexStore::new(vec![Point2D::new(0.0, 0.0)]);
        assert!(matches!(
            store.open_sector_at_angle(0, 0.0, &segments),
            Err(BuildError::MissingEdgeTips(0))
        ));
    }

    #[test]
    fn test_build_vertex_release() {
        let mut store = VertexStore::new(vec![Point2D::new(0.0, 0.0)]);
        let v = store.push_build_vertex(Point2D::new(8.0, 8.0));
        assert_eq!(v, 1);
        assert_eq!(store.build_vertex(0), Some(Point2D::new(8.0, 8.0)));
        assert!(store.release_build_vertex(0));
        assert!(!store.release_build_vertex(0));
        assert_eq!(store.build_vertex(0), None);
    }
}
