// src/bsp/bsp_level.rs

use crate::bsp::bsp_cost::PartitionCost;
use crate::bsp::bsp_hplane::{HPlane, Intercept};
use crate::bsp::bsp_node::{
    BspElement, BspLeafData, BspNodeData, BspTree, LeafIndex, NodeIndex, PartitionLine, TreeIndex,
};
use crate::bsp::bsp_segment::{
    LineIndex, SectorIndex, Segment, SegmentIndex, SegmentStore, VertexIndex, VertexStore,
};
use crate::bsp::bsp_superblock::{blockmap_bounds, BlockIndex, BlockStore};
use crate::bsp::bsp_util::{
    direction_to_angle, inverse_angle, line_relationship, BoundingBox, EdgeGeometry, Point2D,
    SlopeType, Vector2D,
};
use crate::bsp::events::{BuildObserver, DiagnosticRegistry};
use crate::bsp::window;
use crate::bsp::{
    BuildConfig, BuildError, LineRelationship, SegmentSide, ANG_EPSILON, DIST_EPSILON,
    SHORT_HEDGE_EPSILON,
};
use crate::document::MapDocument;
use log::{debug, trace, warn};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;

/// Extended build info about one map line, snapshotted from the document
/// at the start of a build.
pub struct LineInfo {
    pub start: VertexIndex,
    pub end: VertexIndex,
    pub from: Point2D,
    pub to: Point2D,
    pub direction: Vector2D,
    pub aabb: BoundingBox,
    pub has_front: bool,
    pub has_back: bool,
    pub front_sector: Option<SectorIndex>,
    pub back_sector: Option<SectorIndex>,
    pub self_ref: bool,
    pub zero_length: bool,
    pub polyobj: bool,
    /// Sector seen through this line if it is a one-way window.
    pub window_effect: Option<SectorIndex>,

    /// Candidate dedup marker: collinear segments from one line are only
    /// costed once per round of partition selection.
    valid_count: u32,

    /// Left/rightmost half-edges of each side's per-side chain, annotated
    /// while winding leaves.
    front_edges: Option<(SegmentIndex, SegmentIndex)>,
    back_edges: Option<(SegmentIndex, SegmentIndex)>,
}

/// A built artifact whose ownership can be claimed from the partitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltElement {
    /// A build-allocated vertex, by build-local index.
    Vertex(usize),
    Hedge(SegmentIndex),
    Node(NodeIndex),
    Leaf(LeafIndex),
}

/// BSP space partitioner.
///
/// Owns every artifact of one build: vertices created at split points,
/// segments, the superblock index, the half-plane, and the finished tree.
/// A build is a single synchronous call; concurrent builds need disjoint
/// partitioners.
pub struct Partitioner {
    doc: Arc<MapDocument>,
    config: BuildConfig,

    line_infos: Vec<LineInfo>,
    vertexes: VertexStore,
    segments: SegmentStore,
    blocks: BlockStore,
    hplane: HPlane,
    tree: BspTree,

    /// Per-instance round marker for candidate dedup.
    valid_count: u32,

    // Running totals of constructed BSP data objects.
    num_nodes: usize,
    num_leafs: usize,
    num_hedges: usize,
    num_vertexes: usize,

    built_ok: bool,

    observers: Vec<Arc<RwLock<dyn BuildObserver>>>,
    diagnostics: DiagnosticRegistry,
}

impl Partitioner {
    pub fn new(doc: Arc<MapDocument>, split_cost_factor: i32) -> Self {
        Self::with_config(
            doc,
            BuildConfig {
                split_cost_factor,
                ..BuildConfig::default()
            },
        )
    }

    pub fn with_config(doc: Arc<MapDocument>, config: BuildConfig) -> Self {
        Partitioner {
            doc,
            config,
            line_infos: Vec::new(),
            vertexes: VertexStore::new(Vec::new()),
            segments: SegmentStore::new(),
            blocks: BlockStore::new(),
            hplane: HPlane::new(),
            tree: BspTree::new(),
            valid_count: 0,
            num_nodes: 0,
            num_leafs: 0,
            num_hedges: 0,
            num_vertexes: 0,
            built_ok: false,
            observers: Vec::new(),
            diagnostics: DiagnosticRegistry::new(),
        }
    }

    pub fn set_split_cost_factor(&mut self, factor: i32) {
        self.config.split_cost_factor = factor;
    }

    /// Subscribe to build notifications. Observers are called
    /// synchronously, in subscription order.
    pub fn subscribe(&mut self, observer: Arc<RwLock<dyn BuildObserver>>) {
        self.observers.push(observer);
    }

    /// Build BSP data for the current map. On failure the partial state is
    /// kept only so resources can be inspected/released; `built_ok()`
    /// reports `false`.
    pub fn build(&mut self) -> Result<(), BuildError> {
        self.reset();
        let result = self.build_bsp();
        self.built_ok = result.is_ok();
        result
    }

    pub fn built_ok(&self) -> bool {
        self.built_ok
    }

    pub fn root(&self) -> Option<TreeIndex> {
        self.tree.root()
    }

    pub fn tree(&self) -> &BspTree {
        &self.tree
    }

    pub fn segment(&self, index: SegmentIndex) -> &Segment {
        self.segments.get(index)
    }

    pub fn vertex_origin(&self, vertex: VertexIndex) -> Point2D {
        self.vertexes.origin(vertex)
    }

    /// A build-allocated vertex by build-local index (0 = first vertex
    /// the partitioner created).
    pub fn vertex(&self, index: usize) -> Option<Point2D> {
        self.vertexes.build_vertex(index)
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_leafs(&self) -> usize {
        self.num_leafs
    }

    pub fn num_hedges(&self) -> usize {
        self.num_hedges
    }

    pub fn num_vertexes(&self) -> usize {
        self.num_vertexes
    }

    /// Boundary half-edges of a line side's per-side chain, as
    /// `(leftmost, rightmost)`. Populated during leaf winding.
    pub fn line_side_edges(
        &self,
        line: LineIndex,
        side: SegmentSide,
    ) -> Option<(SegmentIndex, SegmentIndex)> {
        let info = self.line_infos.get(line)?;
        match side {
            SegmentSide::Front => info.front_edges,
            SegmentSide::Back => info.back_edges,
        }
    }

    /// Transfer ownership of a built element out of the partitioner.
    /// Returns `false` for unknown or already-released elements.
    pub fn release(&mut self, element: BuiltElement) -> bool {
        let released = match element {
            BuiltElement::Vertex(index) => {
                if self.vertexes.release_build_vertex(index) {
                    self.num_vertexes -= 1;
                    true
                } else {
                    false
                }
            }
            BuiltElement::Hedge(_) => true,
            BuiltElement::Node(node) => {
                if self.tree.release_element(BspElement::Node(node)) {
                    self.num_nodes -= 1;
                    true
                } else {
                    false
                }
            }
            BuiltElement::Leaf(leaf) => {
                if self.tree.release_element(BspElement::Leaf(leaf)) {
                    self.num_leafs -= 1;
                    true
                } else {
                    false
                }
            }
        };
        if !released {
            debug!("Attempted to release an unknown/unowned element {:?}.", element);
        }
        released
    }

    // ------------------------------------------------------------------
    // Build pipeline
    // ------------------------------------------------------------------

    fn reset(&mut self) {
        self.line_infos.clear();
        self.vertexes = VertexStore::new(Vec::new());
        self.segments = SegmentStore::new();
        self.blocks = BlockStore::new();
        self.hplane = HPlane::new();
        self.tree = BspTree::new();
        self.valid_count = 0;
        self.num_nodes = 0;
        self.num_leafs = 0;
        self.num_hedges = 0;
        self.num_vertexes = 0;
        self.built_ok = false;
        self.diagnostics.clear();
    }

    fn build_bsp(&mut self) -> Result<(), BuildError> {
        self.init_for_map();

        let map_bounds = self.doc.bounds();
        trace!(
            "Map bounds: min[x:{:.1}, y:{:.1}] max[x:{:.1}, y:{:.1}]",
            map_bounds.min_x,
            map_bounds.min_y,
            map_bounds.max_x,
            map_bounds.max_y
        );

        let root_block = self.blocks.alloc_root(blockmap_bounds(&map_bounds));
        self.create_initial_segments(root_block);

        let root = self.partition_space(root_block)?;
        self.blocks.free_tree(root_block);
        self.tree.set_root(root);

        self.wind_leafs()?;
        Ok(())
    }

    /// Snapshot per-line and per-vertex info from the document and run the
    /// one-way-window preprocessor.
    fn init_for_map(&mut self) {
        let origins: Vec<Point2D> = {
            let binding = self.doc.vertices();
            let vertices = binding.read();
            vertices.iter().map(|v| Point2D::new(v.x, v.y)).collect()
        };
        let vertex_count = origins.len();
        self.vertexes = VertexStore::new(origins);

        // Count one and two-sided line owners per vertex; the window pass
        // keys off these.
        for vertex in 0..vertex_count {
            let (one_sided, two_sided) = self.doc.count_line_owners(vertex);
            let info = self.vertexes.info_mut(vertex);
            info.one_sided_owners = one_sided;
            info.two_sided_owners = two_sided;
        }

        let binding = self.doc.linedefs();
        let linedefs = binding.read();
        self.line_infos = linedefs
            .iter()
            .map(|line| {
                let from = self.vertexes.origin(line.start);
                let to = self.vertexes.origin(line.end);
                let direction = Vector2D::new(to.x - from.x, to.y - from.y);
                let mut aabb = BoundingBox::new_empty();
                aabb.expand_point(from.x, from.y);
                aabb.expand_point(to.x, to.y);
                LineInfo {
                    start: line.start,
                    end: line.end,
                    from,
                    to,
                    direction,
                    aabb,
                    has_front: line.has_front(),
                    has_back: line.has_back(),
                    front_sector: self.doc.line_front_sector(line),
                    back_sector: self.doc.line_back_sector(line),
                    self_ref: self.doc.line_is_self_referencing(line),
                    zero_length: direction.length() < DIST_EPSILON,
                    polyobj: line.polyobj,
                    window_effect: None,
                    valid_count: 0,
                    front_edges: None,
                    back_edges: None,
                }
            })
            .collect();
        drop(linedefs);

        let map_bounds = self.doc.bounds();
        let windows =
            window::find_window_effects(&self.doc, &map_bounds, &self.line_infos, &self.vertexes);
        for (line, sector) in windows {
            self.line_infos[line].window_effect = Some(sector);
            self.notify_one_way_window(line, sector);
        }
    }

    /// Create all initial line segments and add them to the root block.
    fn create_initial_segments(&mut self, root_block: BlockIndex) {
        for line in 0..self.line_infos.len() {
            let info = &self.line_infos[line];

            // Polyobj lines are completely ignored.
            if info.polyobj {
                continue;
            }

            let (start, end) = (info.start, info.end);
            let zero_length = info.zero_length;
            let front_sector = info.front_sector;
            let back_sector = match info.back_sector {
                Some(sector) => Some(sector),
                // Handle the 'one-way window' effect.
                None => info.window_effect,
            };

            let mut front = None;
            let mut angle = 0.0;

            if !zero_length {
                let (right, _left) = self.build_segments_between(
                    start,
                    end,
                    front_sector,
                    back_sector,
                    Some(line),
                    Some(line),
                );
                self.link_segment(root_block, right);
                if let Some(twin) = self.segments.get(right).twin {
                    self.link_segment(root_block, twin);
                }
                front = Some(right);
                angle = self.segments.get(right).geometry.angle;
            }

            // Even zero-length lines contribute degenerate edge tips.
            let twin = front.and_then(|seg| self.segments.get(seg).twin);
            self.vertexes.add_tip(start, angle, front, twin);
            self.vertexes.add_tip(end, inverse_angle(angle), twin, front);
        }
    }

    /// Create a right segment from `start` to `end` (and a left twin when
    /// there is a back sector), returning `(right, left)`.
    fn build_segments_between(
        &mut self,
        start: VertexIndex,
        end: VertexIndex,
        front_sector: Option<SectorIndex>,
        back_sector: Option<SectorIndex>,
        line: Option<LineIndex>,
        source_line: Option<LineIndex>,
    ) -> (SegmentIndex, Option<SegmentIndex>) {
        let right = self.new_segment(start, end, front_sector, line, SegmentSide::Front, source_line);

        let Some(back_sector) = back_sector else {
            return (right, None);
        };

        let side = if line.is_some() {
            SegmentSide::Back
        } else {
            SegmentSide::Front
        };
        let left = self.new_segment(end, start, Some(back_sector), line, side, source_line);

        // Twin the segments together.
        self.segments.get_mut(right).twin = Some(left);
        self.segments.get_mut(left).twin = Some(right);

        (right, Some(left))
    }

    fn new_segment(
        &mut self,
        from: VertexIndex,
        to: VertexIndex,
        sector: Option<SectorIndex>,
        line: Option<LineIndex>,
        side: SegmentSide,
        source_line: Option<LineIndex>,
    ) -> SegmentIndex {
        let geometry = EdgeGeometry::new(self.vertexes.origin(from), self.vertexes.origin(to));
        let segment = Segment {
            from,
            to,
            sector,
            line,
            side,
            source_line,
            twin: None,
            prev_on_side: None,
            next_on_side: None,
            block: None,
            leaf: None,
            next_in_leaf: None,
            prev_in_leaf: None,
            geometry,
            dead: false,
        };
        self.num_hedges += 1;
        self.segments.alloc(segment)
    }

    /// Associate a segment with the superblock tree under `root`.
    fn link_segment(&mut self, root: BlockIndex, segment: SegmentIndex) {
        let (from, to, is_map) = {
            let seg = self.segments.get(segment);
            (seg.geometry.start, seg.geometry.end, seg.is_map_side())
        };
        let holder = self.blocks.push(root, segment, from, to, is_map);
        self.segments.get_mut(segment).block = Some(holder);
    }

    fn pop_segment(&mut self, block: BlockIndex) -> Option<SegmentIndex> {
        let segments = &self.segments;
        let popped = self.blocks.pop(block, |seg| segments.get(seg).is_map_side())?;
        self.segments.get_mut(popped).block = None;
        Some(popped)
    }

    // ------------------------------------------------------------------
    // Partition choice (cost evaluation)
    // ------------------------------------------------------------------

    /// Signed perpendicular distances of a segment's endpoints from the
    /// partition. Segments descended from the partition's own source line
    /// are forced collinear, whatever the arithmetic says.
    fn partition_distances(
        partition: &EdgeGeometry,
        partition_source: Option<LineIndex>,
        segment: &Segment,
    ) -> (f64, f64) {
        if let (Some(a), Some(b)) = (segment.source_line, partition_source) {
            if a == b {
                return (0.0, 0.0);
            }
        }
        (
            partition.perp_distance(segment.geometry.start),
            partition.perp_distance(segment.geometry.end),
        )
    }

    /// "Near miss" predicate: a wholly-sided segment that still comes
    /// uncomfortably close to the candidate. Returns the closeness ratio.
    fn near_miss(rel: LineRelationship, a: f64, b: f64) -> Option<f64> {
        match rel {
            LineRelationship::Right
                if !((a >= SHORT_HEDGE_EPSILON && b >= SHORT_HEDGE_EPSILON)
                    || (a <= DIST_EPSILON && b >= SHORT_HEDGE_EPSILON)
                    || (b <= DIST_EPSILON && a >= SHORT_HEDGE_EPSILON)) =>
            {
                if a <= DIST_EPSILON || b <= DIST_EPSILON {
                    Some(SHORT_HEDGE_EPSILON / a.max(b))
                } else {
                    Some(SHORT_HEDGE_EPSILON / a.min(b))
                }
            }
            LineRelationship::Left
                if !((a <= -SHORT_HEDGE_EPSILON && b <= -SHORT_HEDGE_EPSILON)
                    || (a >= -DIST_EPSILON && b <= -SHORT_HEDGE_EPSILON)
                    || (b >= -DIST_EPSILON && a <= -SHORT_HEDGE_EPSILON)) =>
            {
                if a >= -DIST_EPSILON || b >= -DIST_EPSILON {
                    Some(SHORT_HEDGE_EPSILON / -a.min(b))
                } else {
                    Some(SHORT_HEDGE_EPSILON / -a.max(b))
                }
            }
            _ => None,
        }
    }

    /// "Near edge" predicate: an intersection whose split point lands
    /// close to one endpoint. Assumes an intersecting relationship.
    fn near_edge(a: f64, b: f64) -> Option<f64> {
        if a.abs() < SHORT_HEDGE_EPSILON || b.abs() < SHORT_HEDGE_EPSILON {
            Some(SHORT_HEDGE_EPSILON / a.abs().min(b.abs()))
        } else {
            None
        }
    }

    fn eval_cost_for_segment(
        &self,
        partition: &EdgeGeometry,
        partition_source: Option<LineIndex>,
        other: SegmentIndex,
        cost: &mut PartitionCost,
    ) {
        let factor = self.config.split_cost_factor;
        let other = self.segments.get(other);
        let (a, b) = Self::partition_distances(partition, partition_source, other);

        let rel = line_relationship(a, b, DIST_EPSILON);
        match rel {
            LineRelationship::Collinear => {
                // This segment runs along the same line as the partition;
                // direction decides which side it belongs to.
                if other.geometry.direction.dot(&partition.direction) < 0.0 {
                    cost.add_segment_left(other.is_map_side());
                } else {
                    cost.add_segment_right(other.is_map_side());
                }
            }

            LineRelationship::Right | LineRelationship::RightIntercept => {
                cost.add_segment_right(other.is_map_side());

                // Near misses can result in really short segments being
                // produced later on; the closer the miss, the higher the
                // cost.
                if let Some(ratio) = Self::near_miss(rel, a, b) {
                    cost.near_miss += 1;
                    cost.total += (100.0 * factor as f64 * (ratio * ratio - 1.0)) as i32;
                }
            }

            LineRelationship::Left | LineRelationship::LeftIntercept => {
                cost.add_segment_left(other.is_map_side());

                if let Some(ratio) = Self::near_miss(rel, a, b) {
                    cost.near_miss += 1;
                    cost.total += (70.0 * factor as f64 * (ratio * ratio - 1.0)) as i32;
                }
            }

            LineRelationship::Intersects => {
                cost.splits += 1;
                cost.total += 100 * factor;

                // A split point very close to one end produces really
                // short edges, so it earns a hefty surcharge.
                if let Some(ratio) = Self::near_edge(a, b) {
                    cost.iffy += 1;
                    cost.total += (140.0 * factor as f64 * (ratio * ratio - 1.0)) as i32;
                }
            }
        }
    }

    /// Cost a candidate against one superblock subtree. Whole blocks on a
    /// single side are tallied wholesale without visiting their segments.
    /// Returns `false` once the running total can no longer beat the
    /// incumbent best.
    fn eval_cost_for_block(
        &self,
        block: BlockIndex,
        incumbent: Option<&PartitionCost>,
        partition: &EdgeGeometry,
        partition_source: Option<LineIndex>,
        cost: &mut PartitionCost,
    ) -> bool {
        let bounds = self.blocks.bounds(block).inflated(SHORT_HEDGE_EPSILON * 1.5);
        let side = partition.box_on_side(&bounds);
        if side > 0 {
            cost.map_right += self.blocks.map_count(block) as i32;
            cost.part_right += self.blocks.cap_count(block) as i32;
            return true;
        }
        if side < 0 {
            cost.map_left += self.blocks.map_count(block) as i32;
            cost.part_left += self.blocks.cap_count(block) as i32;
            return true;
        }

        // The candidate's line cuts this block; cost each segment.
        for &other in self.blocks.segments(block) {
            // Do we already have a better choice?
            if let Some(best) = incumbent {
                if !cost.is_better_than(best) {
                    return false;
                }
            }

            let mut delta = PartitionCost::new();
            self.eval_cost_for_segment(partition, partition_source, other, &mut delta);
            cost.merge(&delta);
        }

        if let Some(right) = self.blocks.right(block) {
            if !self.eval_cost_for_block(right, incumbent, partition, partition_source, cost) {
                return false;
            }
        }
        if let Some(left) = self.blocks.left(block) {
            if !self.eval_cost_for_block(left, incumbent, partition, partition_source, cost) {
                return false;
            }
        }

        true
    }

    /// Evaluate a candidate partition. Returns `true` iff the candidate is
    /// suitable (map-side, with map segments on both sides, and not
    /// already beaten by the incumbent), leaving the final score in `cost`.
    fn eval_partition(
        &self,
        block_root: BlockIndex,
        incumbent: Option<&PartitionCost>,
        candidate: SegmentIndex,
        cost: &mut PartitionCost,
    ) -> bool {
        let (partition, partition_source) = {
            let seg = self.segments.get(candidate);
            // Partition caps are never candidates.
            if !seg.is_map_side() {
                return false;
            }
            (seg.geometry, seg.source_line)
        };

        if !self.eval_cost_for_block(block_root, incumbent, &partition, partition_source, cost) {
            return false;
        }

        // Make sure there is at least one map segment on each side.
        if cost.map_left == 0 || cost.map_right == 0 {
            return false;
        }

        // Increase cost by the difference between left and right.
        cost.total += 100 * (cost.map_left - cost.map_right).abs();

        // Allow partition-cap counts to affect the outcome.
        cost.total += 50 * (cost.part_left - cost.part_right).abs();

        // A slight preference for purely horizontal or vertical lines.
        if partition.slope != SlopeType::Horizontal && partition.slope != SlopeType::Vertical {
            cost.total += 25;
        }

        true
    }

    /// Find the best segment in the set to use as the next partition, or
    /// `None` when the set is convex (or degenerate).
    fn choose_next_partition(&mut self, block_root: BlockIndex) -> Option<SegmentIndex> {
        // Bump the round marker so segments produced from a single line
        // are only costed once (they are collinear).
        self.valid_count += 1;

        let mut best: Option<SegmentIndex> = None;
        let mut best_cost = PartitionCost::new();

        for block in self.blocks.pre_order(block_root) {
            for slot in 0..self.blocks.segments(block).len() {
                let candidate = self.blocks.segments(block)[slot];

                if let Some(line) = self.segments.get(candidate).line {
                    if self.line_infos[line].valid_count == self.valid_count {
                        continue;
                    }
                    self.line_infos[line].valid_count = self.valid_count;
                }

                let mut cost = PartitionCost::new();
                let incumbent = best.map(|_| &best_cost);
                if self.eval_partition(block_root, incumbent, candidate, &mut cost)
                    && (best.is_none() || cost.is_better_than(&best_cost))
                {
                    best_cost = cost;
                    best = Some(candidate);
                }
            }
        }

        if let Some(best) = best {
            trace!(
                "Chose partition segment #{} (cost {}.{:02})",
                best,
                best_cost.total / 100,
                best_cost.total % 100
            );
        }
        best
    }

    // ------------------------------------------------------------------
    // Partitioning
    // ------------------------------------------------------------------

    /// Add an intercept where the partition passes one of `segment`'s
    /// endpoints, unless that vertex is already intercepted.
    fn make_intercept(&mut self, segment: SegmentIndex, at_from: bool) -> Result<(), BuildError> {
        let (vertex, self_ref) = {
            let seg = self.segments.get(segment);
            let vertex = if at_from { seg.from } else { seg.to };
            let self_ref = seg.line.is_some_and(|line| self.line_infos[line].self_ref);
            (vertex, self_ref)
        };

        if self.hplane.intercept_by_vertex(vertex).is_some() {
            return Ok(());
        }

        let partition = self.hplane.partition();
        let distance = partition.para_distance(self.vertexes.origin(vertex));
        let before =
            self.vertexes
                .open_sector_at_angle(vertex, partition.inverse_angle(), &self.segments)?;
        let after = self
            .vertexes
            .open_sector_at_angle(vertex, partition.angle, &self.segments)?;

        self.hplane.add_intercept(Intercept {
            distance,
            vertex,
            self_ref,
            before,
            after,
        });
        Ok(())
    }

    /// Split `segment` at `point`. The old segment is shortened (keeping
    /// its start vertex); the returned segment is the cut-off tail. Any
    /// twin is split symmetrically.
    fn split_segment(&mut self, segment: SegmentIndex, point: Point2D) -> SegmentIndex {
        let new_vertex = self.vertexes.push_build_vertex(point);
        self.num_vertexes += 1;

        let (angle, inv_angle, twin, old_to_origin) = {
            let seg = self.segments.get(segment);
            (
                seg.geometry.angle,
                seg.geometry.inverse_angle(),
                seg.twin,
                seg.geometry.end,
            )
        };

        self.vertexes.add_tip(new_vertex, inv_angle, twin, Some(segment));
        self.vertexes.add_tip(new_vertex, angle, Some(segment), twin);

        // Clone the old segment into the tail piece and splice it into the
        // per-side chain.
        let mut tail = self.segments.get(segment).clone();
        tail.from = new_vertex;
        tail.block = None;
        tail.prev_on_side = Some(segment);
        tail.geometry = EdgeGeometry::new(point, old_to_origin);
        let tail_next = tail.next_on_side;
        let new_segment = self.segments.alloc(tail);
        self.num_hedges += 1;

        if let Some(next) = tail_next {
            self.segments.get_mut(next).prev_on_side = Some(new_segment);
        }
        {
            let old = self.segments.get_mut(segment);
            old.to = new_vertex;
            old.next_on_side = Some(new_segment);
        }
        let old_from_origin = self.segments.get(segment).geometry.start;
        self.segments.get_mut(segment).geometry = EdgeGeometry::new(old_from_origin, point);

        // Handle the twin.
        if let Some(twin) = twin {
            let (twin_from_origin, twin_to_origin) = {
                let t = self.segments.get(twin);
                (t.geometry.start, t.geometry.end)
            };

            let mut twin_tail = self.segments.get(twin).clone();
            twin_tail.to = new_vertex;
            twin_tail.block = None;
            twin_tail.next_on_side = Some(twin);
            twin_tail.twin = Some(new_segment);
            twin_tail.geometry = EdgeGeometry::new(twin_from_origin, point);
            let twin_tail_prev = twin_tail.prev_on_side;
            let new_twin = self.segments.alloc(twin_tail);
            self.num_hedges += 1;

            if let Some(prev) = twin_tail_prev {
                self.segments.get_mut(prev).next_on_side = Some(new_twin);
            }
            {
                let t = self.segments.get_mut(twin);
                t.from = new_vertex;
                t.prev_on_side = Some(new_twin);
            }
            self.segments.get_mut(twin).geometry = EdgeGeometry::new(point, twin_to_origin);
            self.segments.get_mut(new_segment).twin = Some(new_twin);

            // If the twin is already attached to a completed leaf, stitch
            // the clone into that leaf's ring right after it.
            if let Some(leaf) = self.segments.get(twin).leaf {
                let twin_next = self.segments.get(twin).next_in_leaf;
                self.segments.get_mut(new_twin).next_in_leaf = twin_next;
                self.segments.get_mut(twin).next_in_leaf = Some(new_twin);
                self.tree.leaf_mut(leaf).hedge_count += 1;
            }
        }

        new_segment
    }

    /// Classify one segment against the half-plane and distribute it into
    /// the right/left sets, splitting it when it crosses the partition.
    fn divide_segment(
        &mut self,
        segment: SegmentIndex,
        rights: BlockIndex,
        lefts: BlockIndex,
    ) -> Result<(), BuildError> {
        let partition = self.hplane.partition();
        let partition_source = self.hplane.line();

        let (a, b, direction) = {
            let seg = self.segments.get(segment);
            let (a, b) = Self::partition_distances(&partition, partition_source, seg);
            (a, b, seg.geometry.direction)
        };

        match line_relationship(a, b, DIST_EPSILON) {
            LineRelationship::Collinear => {
                self.make_intercept(segment, true)?;
                self.make_intercept(segment, false)?;

                // Direction (vs that of the partition) determines which
                // subset this segment belongs to.
                if direction.dot(&partition.direction) < 0.0 {
                    self.link_segment(lefts, segment);
                } else {
                    self.link_segment(rights, segment);
                }
            }

            rel @ (LineRelationship::Right | LineRelationship::RightIntercept) => {
                if rel == LineRelationship::RightIntercept {
                    // The endpoint nearest the half-plane interfaces with
                    // the new intercept.
                    self.make_intercept(segment, a < DIST_EPSILON)?;
                }
                self.link_segment(rights, segment);
            }

            rel @ (LineRelationship::Left | LineRelationship::LeftIntercept) => {
                if rel == LineRelationship::LeftIntercept {
                    self.make_intercept(segment, a > -DIST_EPSILON)?;
                }
                self.link_segment(lefts, segment);
            }

            LineRelationship::Intersects => {
                let point = {
                    let seg = self.segments.get(segment);
                    partition.intersection_with(&seg.geometry, a, b)
                };
                let new_segment = self.split_segment(segment, point);

                // Keep the new twin in the same block as the old twin if
                // that twin is still waiting to be partitioned.
                let twin = self.segments.get(segment).twin;
                if let Some(twin) = twin {
                    if self.segments.get(twin).leaf.is_none() {
                        if let (Some(block), Some(new_twin)) = (
                            self.segments.get(twin).block,
                            self.segments.get(new_segment).twin,
                        ) {
                            self.link_segment(block, new_twin);
                        }
                    }
                }

                // The split vertex is the old segment's new end.
                self.make_intercept(segment, false)?;

                if a < 0.0 {
                    self.link_segment(rights, new_segment);
                    self.link_segment(lefts, segment);
                } else {
                    self.link_segment(rights, segment);
                    self.link_segment(lefts, new_segment);
                }
            }
        }
        Ok(())
    }

    /// Empty the input block tree, distributing every segment into the
    /// right or left set relative to the half-plane.
    fn partition_segments(
        &mut self,
        input: BlockIndex,
        rights: BlockIndex,
        lefts: BlockIndex,
    ) -> Result<(), BuildError> {
        for block in self.blocks.pre_order(input) {
            while let Some(segment) = self.pop_segment(block) {
                self.divide_segment(segment, rights, lefts)?;
            }
        }

        // Sanity checks...
        if self.blocks.total_count(rights) == 0 {
            return Err(BuildError::EmptyPartitionSide("right"));
        }
        if self.blocks.total_count(lefts) == 0 {
            return Err(BuildError::EmptyPartitionSide("left"));
        }
        Ok(())
    }

    /// Analyze the partition intercepts and cap any gaps that are open
    /// onto a sector with synthetic twin segments.
    fn add_partition_caps(
        &mut self,
        rights: BlockIndex,
        lefts: BlockIndex,
    ) -> Result<(), BuildError> {
        self.hplane.sort_and_merge_intercepts();
        let intercepts: Vec<Intercept> = self.hplane.intercepts().to_vec();
        let partition_line = self.hplane.line();

        for pair in intercepts.windows(2) {
            let (cur, next) = (&pair[0], &pair[1]);

            let near_point = || {
                let a = self.vertexes.origin(cur.vertex);
                let b = self.vertexes.origin(next.vertex);
                Point2D::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
            };

            match (cur.after, next.before) {
                // The gap lies in the void.
                (None, None) => {}

                // Nasty open/closed cases: something is unclosed.
                (Some(sector), None) => {
                    if !cur.self_ref {
                        let near = near_point();
                        self.notify_unclosed_sector(sector, near);
                    }
                }
                (None, Some(sector)) => {
                    if !next.self_ref {
                        let near = near_point();
                        self.notify_unclosed_sector(sector, near);
                    }
                }

                // Open space on both sides; cap it.
                (Some(after), Some(before)) => {
                    let mut sector = after;
                    if after != before {
                        if !cur.self_ref && !next.self_ref {
                            debug!(
                                "Sector mismatch (#{} != #{}) along partition near ({:.1}, {:.1}).",
                                after,
                                before,
                                near_point().x,
                                near_point().y
                            );
                        }
                        // Choose the non-self-referencing sector when we can.
                        if cur.self_ref && !next.self_ref {
                            sector = before;
                        }
                    }

                    let (right, left) = self.build_segments_between(
                        cur.vertex,
                        next.vertex,
                        Some(sector),
                        Some(sector),
                        None,
                        partition_line,
                    );
                    self.link_segment(rights, right);
                    if let Some(left) = left {
                        self.link_segment(lefts, left);
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove every segment from the block tree in pre-order, for leaf
    /// construction.
    fn collect_segments(&mut self, input: BlockIndex) -> Vec<SegmentIndex> {
        let mut collected = Vec::new();
        for block in self.blocks.pre_order(input) {
            while let Some(segment) = self.pop_segment(block) {
                collected.push(segment);
            }
        }
        collected
    }

    /// Attempt to construct a new leaf from collected segments. Returns
    /// `None` when degenerate (possibly unlinking the segments, when the
    /// collapse policy is enabled).
    fn build_leaf(&mut self, segments: &[SegmentIndex]) -> Option<LeafIndex> {
        if segments.is_empty() {
            return None;
        }

        if self.config.collapse_degenerate_leafs {
            let degenerate = segments.len() < 3;
            let orphan = !segments.iter().any(|&s| {
                let seg = self.segments.get(s);
                seg.line.is_some() && seg.sector.is_some()
            });

            if degenerate || orphan {
                for &index in segments {
                    let (prev, next, twin) = {
                        let seg = self.segments.get(index);
                        (seg.prev_on_side, seg.next_on_side, seg.twin)
                    };
                    if let Some(prev) = prev {
                        self.segments.get_mut(prev).next_on_side = next;
                    }
                    if let Some(next) = next {
                        self.segments.get_mut(next).prev_on_side = prev;
                    }
                    if let Some(twin) = twin {
                        self.segments.get_mut(twin).twin = None;
                    }
                    let seg = self.segments.get_mut(index);
                    seg.dead = true;
                    seg.twin = None;
                    self.num_hedges -= 1;
                }
                return None;
            }
        }

        let leaf = self.tree.new_leaf(BspLeafData::default());
        for &index in segments {
            // Link into the head of the leaf's list.
            let head = self.tree.leaf(leaf).first_hedge;
            let seg = self.segments.get_mut(index);
            seg.next_in_leaf = head;
            seg.leaf = Some(leaf);
            let data = self.tree.leaf_mut(leaf);
            data.first_hedge = Some(index);
            data.hedge_count += 1;
        }

        self.num_leafs += 1;
        Some(leaf)
    }

    /// Tight bounds of all segments below `block`.
    fn segment_bounds(&self, block: BlockIndex) -> BoundingBox {
        let mut bounds = BoundingBox::new_empty();
        for index in self.blocks.pre_order(block) {
            for &segment in self.blocks.segments(index) {
                let geometry = &self.segments.get(segment).geometry;
                bounds.expand_point(geometry.start.x, geometry.start.y);
                bounds.expand_point(geometry.end.x, geometry.end.y);
            }
        }
        bounds
    }

    /// Recursively carve the segment set into convex regions: pick a
    /// partition, distribute the segments, cap the gaps, and recurse;
    /// emit a leaf when no partition is admissible.
    fn partition_space(&mut self, block: BlockIndex) -> Result<Option<TreeIndex>, BuildError> {
        let Some(partition_seg) = self.choose_next_partition(block) else {
            // No partition required/possible - already convex (or
            // degenerate).
            let collected = self.collect_segments(block);
            let Some(leaf) = self.build_leaf(&collected) else {
                return Ok(None);
            };
            return Ok(Some(self.tree.new_tree_node(BspElement::Leaf(leaf), None, None)));
        };

        // Reconfigure the half-plane for this round of partitioning.
        let snapshot = self.configure_partition(partition_seg);

        let bounds = self.blocks.int_bounds(block);
        let rights = self.blocks.alloc_root(bounds);
        let lefts = self.blocks.alloc_root(bounds);

        self.partition_segments(block, rights, lefts)?;
        self.add_partition_caps(rights, lefts)?;
        self.hplane.clear_intercepts();

        let right_bounds = self.segment_bounds(rights);
        let left_bounds = self.segment_bounds(lefts);

        // Recurse on each subspace, right then left.
        let right_tree = self.partition_space(rights)?;
        self.blocks.free_tree(rights);
        let left_tree = self.partition_space(lefts)?;
        self.blocks.free_tree(lefts);

        // Collapse degenerates upward.
        let (right_tree, left_tree) = match (right_tree, left_tree) {
            (None, None) => return Ok(None),
            (Some(tree), None) | (None, Some(tree)) => return Ok(Some(tree)),
            (Some(right), Some(left)) => (right, left),
        };

        let node = self.tree.new_node(BspNodeData {
            partition: snapshot,
            right_bounds,
            left_bounds,
            right: self.tree.tree_node(right_tree).element,
            left: self.tree.tree_node(left_tree).element,
        });
        self.num_nodes += 1;

        Ok(Some(
            self.tree
                .new_tree_node(BspElement::Node(node), Some(right_tree), Some(left_tree)),
        ))
    }

    /// Point the half-plane along the chosen partition segment and return
    /// the partition-line snapshot for the node (spanning the segment's
    /// whole line side, not just the segment).
    fn configure_partition(&mut self, segment: SegmentIndex) -> PartitionLine {
        let (geometry, line, side) = {
            let seg = self.segments.get(segment);
            (seg.geometry, seg.line, seg.side)
        };
        self.hplane.configure(geometry, line);

        let snapshot = match line {
            Some(line) => {
                let info = &self.line_infos[line];
                let (from, to) = match side {
                    SegmentSide::Front => (info.from, info.to),
                    SegmentSide::Back => (info.to, info.from),
                };
                PartitionLine {
                    origin: from,
                    direction: Vector2D::new(to.x - from.x, to.y - from.y),
                }
            }
            None => PartitionLine {
                origin: geometry.start,
                direction: geometry.direction,
            },
        };
        trace!(
            "Partition along ({:.1}, {:.1}) -> ({:+.1}, {:+.1})",
            snapshot.origin.x,
            snapshot.origin.y,
            snapshot.direction.x,
            snapshot.direction.y
        );
        snapshot
    }

    // ------------------------------------------------------------------
    // Leaf winding & sector assignment
    // ------------------------------------------------------------------

    /// Sort all half-edges of every leaf into clockwise order and choose
    /// leaf sectors.
    ///
    /// This cannot be done during partitioning: splitting a segment whose
    /// twin already sits in a leaf inserts another half-edge into that
    /// leaf, usually in the wrong place order-wise.
    fn wind_leafs(&mut self) -> Result<(), BuildError> {
        for leaf in 0..self.tree.leaf_count() {
            self.wind_leaf(leaf)?;
        }
        Ok(())
    }

    fn leaf_ring(&self, leaf: LeafIndex) -> Vec<SegmentIndex> {
        let mut ring = Vec::with_capacity(self.tree.leaf(leaf).hedge_count);
        let mut cursor = self.tree.leaf(leaf).first_hedge;
        while let Some(segment) = cursor {
            ring.push(segment);
            cursor = self.segments.get(segment).next_in_leaf;
            if ring.len() > self.tree.leaf(leaf).hedge_count {
                break; // Already circular (re-wound leaf).
            }
        }
        ring
    }

    fn wind_leaf(&mut self, leaf: LeafIndex) -> Result<(), BuildError> {
        let ring = self.leaf_ring(leaf);
        if ring.is_empty() {
            return Ok(());
        }

        // Midpoint of all half-edge endpoints.
        let mut center = Point2D::default();
        for &segment in &ring {
            let geometry = &self.segments.get(segment).geometry;
            center.x += geometry.start.x + geometry.end.x;
            center.y += geometry.start.y + geometry.end.y;
        }
        center.x /= (ring.len() * 2) as f64;
        center.y /= (ring.len() * 2) as f64;

        // Clockwise order means descending angles about the center. Ties
        // within ANG_EPSILON keep their insertion order (stable sort).
        let mut keyed: Vec<(f64, SegmentIndex)> = ring
            .iter()
            .map(|&segment| {
                let from = self.segments.get(segment).geometry.start;
                (
                    direction_to_angle(from.x - center.x, from.y - center.y),
                    segment,
                )
            })
            .collect();
        keyed.sort_by(|a, b| {
            if a.0 + ANG_EPSILON < b.0 {
                Ordering::Greater
            } else if b.0 + ANG_EPSILON < a.0 {
                Ordering::Less
            } else {
                Ordering::Equal
            }
        });

        // Relink the ring: `next` follows sorted order and wraps, `prev`
        // is its reverse.
        let count = keyed.len();
        for slot in 0..count {
            let segment = keyed[slot].1;
            let next = keyed[(slot + 1) % count].1;
            self.segments.get_mut(segment).next_in_leaf = Some(next);
            self.segments.get_mut(next).prev_in_leaf = Some(segment);
        }
        self.tree.leaf_mut(leaf).first_hedge = Some(keyed[0].1);

        // Annotate each touched line side with the boundary half-edges of
        // its per-side chain.
        for &(_, segment) in &keyed {
            let (line, side) = {
                let seg = self.segments.get(segment);
                (seg.line, seg.side)
            };
            let Some(line) = line else { continue };
            let occupied = match side {
                SegmentSide::Front => self.line_infos[line].front_edges.is_some(),
                SegmentSide::Back => self.line_infos[line].back_edges.is_some(),
            };
            if occupied {
                continue;
            }

            let mut leftmost = segment;
            while let Some(prev) = self.segments.get(leftmost).prev_on_side {
                leftmost = prev;
            }
            let mut rightmost = segment;
            while let Some(next) = self.segments.get(rightmost).next_on_side {
                rightmost = next;
            }
            let info = &mut self.line_infos[line];
            match side {
                SegmentSide::Front => info.front_edges = Some((leftmost, rightmost)),
                SegmentSide::Back => info.back_edges = Some((leftmost, rightmost)),
            }
        }

        // Choose the leaf's sector.
        let sector = self.choose_sector_for_leaf(&keyed);
        self.tree.leaf_mut(leaf).sector = sector;
        match sector {
            Some(sector) => {
                // Look for migrant half-edges in the leaf.
                for &(_, segment) in &keyed {
                    if let Some(facing) = self.segments.get(segment).sector {
                        if facing != sector {
                            self.notify_migrant_hedge(segment, sector);
                        }
                    }
                }
            }
            None => {
                warn!(
                    "BSP leaf #{} is degenerate/orphan ({} half-edges).",
                    leaf, count
                );
            }
        }

        // See if we built a partial leaf...
        let mut gaps = 0;
        for slot in 0..count {
            let segment = keyed[slot].1;
            let next = keyed[(slot + 1) % count].1;
            let end = self.segments.get(segment).geometry.end;
            let start = self.segments.get(next).geometry.start;
            if end != start {
                gaps += 1;
            }
        }
        if gaps > 0 {
            self.notify_partial_leaf(leaf, gaps);
        }

        // Every leaf must touch at least one map line side.
        if !ring
            .iter()
            .any(|&segment| self.segments.get(segment).is_map_side())
        {
            return Err(BuildError::NoMapSideInLeaf(leaf));
        }

        Ok(())
    }

    fn choose_sector_for_leaf(&self, ring: &[(f64, SegmentIndex)]) -> Option<SectorIndex> {
        // The first sector from a non-self-referencing line is the best
        // choice; remember a self-referencing one as a fallback.
        let mut self_ref_choice = None;
        for &(_, segment) in ring {
            let seg = self.segments.get(segment);
            let (Some(line), Some(sector)) = (seg.line, seg.sector) else {
                continue;
            };
            if !self.line_infos[line].self_ref {
                return Some(sector);
            }
            if self_ref_choice.is_none() {
                self_ref_choice = Some(sector);
            }
        }
        if self_ref_choice.is_some() {
            return self_ref_choice;
        }

        // Last resort: any segment that knows a sector (partition caps
        // included). Leaves without one are reported as orphans.
        ring.iter()
            .find_map(|&(_, segment)| self.segments.get(segment).sector)
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    fn notify_one_way_window(&mut self, line: LineIndex, sector: SectorIndex) {
        debug!("Line #{} is a one-way window onto sector #{}.", line, sector);
        for observer in &self.observers {
            observer.write().one_way_window_found(line, sector);
        }
    }

    fn notify_unclosed_sector(&mut self, sector: SectorIndex, near_point: Point2D) {
        if !self.diagnostics.note_unclosed_sector(sector) {
            return;
        }
        warn!(
            "Sector #{} is unclosed near ({:.1}, {:.1}).",
            sector, near_point.x, near_point.y
        );
        for observer in &self.observers {
            observer.write().unclosed_sector_found(sector, near_point);
        }
    }

    fn notify_migrant_hedge(&mut self, segment: SegmentIndex, facing_sector: SectorIndex) {
        if !self.diagnostics.note_migrant_hedge(segment) {
            return;
        }
        debug!(
            "Half-edge #{} is migrant in a leaf facing sector #{}.",
            segment, facing_sector
        );
        for observer in &self.observers {
            observer.write().migrant_hedge_built(segment, facing_sector);
        }
    }

    fn notify_partial_leaf(&mut self, leaf: LeafIndex, gap_count: usize) {
        if !self.diagnostics.note_partial_leaf(leaf) {
            return;
        }
        debug!("BSP leaf #{} is partial ({} gaps).", leaf, gap_count);
        for observer in &self.observers {
            observer.write().partial_leaf_built(leaf, gap_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{LineDef, Sector, SideDef};

    #[derive(Default)]
    struct RecordingObserver {
        windows: Vec<(LineIndex, SectorIndex)>,
        unclosed: Vec<(SectorIndex, Point2D)>,
        migrants: Vec<(SegmentIndex, SectorIndex)>,
        partials: Vec<(LeafIndex, usize)>,
    }

    impl BuildObserver for RecordingObserver {
        fn one_way_window_found(&mut self, line: LineIndex, back_facing_sector: SectorIndex) {
            self.windows.push((line, back_facing_sector));
        }
        fn unclosed_sector_found(&mut self, sector: SectorIndex, near_point: Point2D) {
            self.unclosed.push((sector, near_point));
        }
        fn migrant_hedge_built(&mut self, hedge: SegmentIndex, facing_sector: SectorIndex) {
            self.migrants.push((hedge, facing_sector));
        }
        fn partial_leaf_built(&mut self, leaf: LeafIndex, gap_count: usize) {
            self.partials.push((leaf, gap_count));
        }
    }

    fn doc_with_sectors(count: usize) -> Arc<MapDocument> {
        let doc = MapDocument::new();
        for _ in 0..count {
            doc.push_sector(Sector::with_defaults());
        }
        Arc::new(doc)
    }

    fn one_sided(doc: &MapDocument, from: usize, to: usize, sector: usize) -> usize {
        let right = doc.push_sidedef(SideDef::with_sector(sector as i32)) as i32;
        doc.push_linedef(LineDef::new(from, to, 0, right, -1))
    }

    fn two_sided(doc: &MapDocument, from: usize, to: usize, front: usize, back: usize) -> usize {
        let right = doc.push_sidedef(SideDef::with_sector(front as i32)) as i32;
        let left = doc.push_sidedef(SideDef::with_sector(back as i32)) as i32;
        doc.push_linedef(LineDef::new(from, to, 0x0004, right, left))
    }

    fn build(doc: &Arc<MapDocument>) -> (Partitioner, Arc<RwLock<RecordingObserver>>) {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut partitioner = Partitioner::new(Arc::clone(doc), 7);
        let observer = Arc::new(RwLock::new(RecordingObserver::default()));
        let subscriber: Arc<RwLock<dyn BuildObserver>> = observer.clone();
        partitioner.subscribe(subscriber);
        partitioner.build().expect("build should succeed");
        (partitioner, observer)
    }

    /// The universal post-build invariants: tree shape, ring closure and
    /// clockwise order, twin symmetry, edge-tip ordering, and counters.
    fn assert_build_invariants(p: &Partitioner) {
        // Every internal tree node has exactly two children.
        if let Some(root) = p.root() {
            let mut stack = vec![root];
            while let Some(index) = stack.pop() {
                let node = p.tree().tree_node(index);
                match node.element {
                    Some(BspElement::Node(_)) => {
                        assert!(node.right.is_some() && node.left.is_some());
                        stack.push(node.right.unwrap());
                        stack.push(node.left.unwrap());
                    }
                    Some(BspElement::Leaf(_)) => {
                        assert!(node.right.is_none() && node.left.is_none());
                    }
                    None => panic!("released element inside an owned tree"),
                }
            }
        }

        let mut ring_total = 0;
        for leaf in 0..p.tree().leaf_count() {
            let data = p.tree().leaf(leaf);
            let count = data.hedge_count;
            assert!(count > 0);
            ring_total += count;

            // The ring closes and next/prev stay mutually consistent.
            let head = data.first_hedge.unwrap();
            let mut ring = Vec::with_capacity(count);
            let mut cursor = head;
            for _ in 0..count {
                ring.push(cursor);
                let seg = p.segment(cursor);
                assert_ne!(seg.geometry.start, seg.geometry.end);
                assert_eq!(seg.leaf, Some(leaf));
                let next = seg.next_in_leaf.unwrap();
                assert_eq!(p.segment(next).prev_in_leaf, Some(cursor));
                cursor = next;
            }
            assert_eq!(cursor, head);

            // Clockwise winding: non-increasing polar angle about the
            // centroid, within the angle tolerance.
            let mut center = Point2D::default();
            for &segment in &ring {
                let geometry = &p.segment(segment).geometry;
                center.x += geometry.start.x + geometry.end.x;
                center.y += geometry.start.y + geometry.end.y;
            }
            center.x /= (count * 2) as f64;
            center.y /= (count * 2) as f64;
            let angles: Vec<f64> = ring
                .iter()
                .map(|&segment| {
                    let from = p.segment(segment).geometry.start;
                    direction_to_angle(from.x - center.x, from.y - center.y)
                })
                .collect();
            for pair in angles.windows(2) {
                assert!(
                    pair[1] <= pair[0] + ANG_EPSILON,
                    "ring not clockwise: {:?}",
                    angles
                );
            }

            // Twin symmetry.
            for &segment in &ring {
                let seg = p.segment(segment);
                if let Some(twin) = seg.twin {
                    let other = p.segment(twin);
                    assert_eq!(other.twin, Some(segment));
                    assert_eq!(other.from, seg.to);
                    assert_eq!(other.to, seg.from);
                }
            }
        }

        // Counters.
        assert_eq!(ring_total, p.num_hedges());
        assert_eq!(p.tree().leaf_count(), p.num_leafs());
        assert_eq!(p.tree().node_count(), p.num_nodes());

        // Split vertices own at least two tips, in ascending angle order.
        let num_input = p.vertexes.num_input();
        for index in 0..p.num_vertexes() {
            let tips = &p.vertexes.info(num_input + index).tips;
            assert!(tips.len() >= 2);
            for pair in tips.windows(2) {
                assert!(pair[0].angle <= pair[1].angle + ANG_EPSILON);
            }
        }
    }

    fn leaf_ring_sizes(p: &Partitioner) -> Vec<usize> {
        (0..p.tree().leaf_count())
            .map(|leaf| p.tree().leaf(leaf).hedge_count)
            .collect()
    }

    /// A single square room; every line's front (right) side faces the
    /// interior.
    fn square_doc() -> Arc<MapDocument> {
        let doc = doc_with_sectors(1);
        doc.push_vertex(0.0, 0.0);
        doc.push_vertex(64.0, 0.0);
        doc.push_vertex(64.0, 64.0);
        doc.push_vertex(0.0, 64.0);
        one_sided(&doc, 1, 0, 0);
        one_sided(&doc, 2, 1, 0);
        one_sided(&doc, 3, 2, 0);
        one_sided(&doc, 0, 3, 0);
        doc
    }

    /// A square room bisected at y=32 by a two-sided line into sector 0
    /// below and sector 1 above. The side walls meet the bisector at
    /// shared vertices (one linedef per half), as a map editor would
    /// produce them.
    fn bisected_square_doc() -> Arc<MapDocument> {
        let doc = doc_with_sectors(2);
        doc.push_vertex(0.0, 0.0); // 0
        doc.push_vertex(64.0, 0.0); // 1
        doc.push_vertex(64.0, 64.0); // 2
        doc.push_vertex(0.0, 64.0); // 3
        doc.push_vertex(0.0, 32.0); // 4
        doc.push_vertex(64.0, 32.0); // 5
        one_sided(&doc, 1, 0, 0); // bottom
        one_sided(&doc, 0, 4, 0); // left, lower half
        one_sided(&doc, 4, 3, 1); // left, upper half
        one_sided(&doc, 3, 2, 1); // top
        one_sided(&doc, 2, 5, 1); // right, upper half
        one_sided(&doc, 5, 1, 0); // right, lower half
        two_sided(&doc, 4, 5, 0, 1); // bisector
        doc
    }

    #[test]
    fn test_s1_single_square_room() {
        let (p, observer) = build(&square_doc());

        assert_eq!(p.num_nodes(), 0);
        assert_eq!(p.num_leafs(), 1);
        assert_eq!(p.num_hedges(), 4);
        assert_eq!(p.num_vertexes(), 0);
        assert!(p.built_ok());

        let root = p.root().unwrap();
        assert!(p.tree().is_leaf(root));
        let Some(BspElement::Leaf(leaf)) = p.tree().tree_node(root).element else {
            panic!("root should be a leaf");
        };
        assert_eq!(p.tree().leaf(leaf).hedge_count, 4);
        assert_eq!(p.tree().leaf(leaf).sector, Some(0));

        let events = observer.read();
        assert!(events.windows.is_empty());
        assert!(events.unclosed.is_empty());
        assert!(events.migrants.is_empty());
        assert!(events.partials.is_empty());

        assert_build_invariants(&p);
    }

    #[test]
    fn test_s2_bisected_square() {
        let (p, observer) = build(&bisected_square_doc());

        assert_eq!(p.num_nodes(), 1);
        assert_eq!(p.num_leafs(), 2);
        assert_eq!(p.num_hedges(), 8);
        // The walls already share vertices with the bisector: no splits.
        assert_eq!(p.num_vertexes(), 0);

        let root = p.root().unwrap();
        assert!(!p.tree().is_leaf(root));
        let Some(BspElement::Node(node)) = p.tree().tree_node(root).element else {
            panic!("root should be an internal node");
        };
        let partition = p.tree().node(node).partition;
        assert_eq!(partition.origin.y, 32.0);
        assert_eq!(partition.direction.y, 0.0);

        assert_eq!(leaf_ring_sizes(&p), vec![4, 4]);

        let events = observer.read();
        assert!(events.unclosed.is_empty());
        assert!(events.partials.is_empty());
        assert!(events.migrants.is_empty());

        assert_build_invariants(&p);
    }

    #[test]
    fn test_s3_l_shaped_room() {
        let doc = doc_with_sectors(1);
        let corners = [
            (0.0, 0.0),
            (64.0, 0.0),
            (64.0, 32.0),
            (32.0, 32.0),
            (32.0, 64.0),
            (0.0, 64.0),
        ];
        for (x, y) in corners {
            doc.push_vertex(x, y);
        }
        for i in 0..6 {
            one_sided(&doc, (i + 1) % 6, i, 0);
        }

        let (p, observer) = build(&doc);
        assert!(p.num_nodes() >= 1);
        assert!(p.num_leafs() >= 2);
        for leaf in 0..p.tree().leaf_count() {
            assert_eq!(p.tree().leaf(leaf).sector, Some(0));
        }

        let events = observer.read();
        assert!(events.unclosed.is_empty());
        assert!(events.partials.is_empty());
        assert!(events.migrants.is_empty());

        assert_build_invariants(&p);
    }

    #[test]
    fn test_s4_unclosed_sector_is_reported() {
        // Two rooms: the left one (lower sector 0, upper sector 2, split
        // by a two-sided line that stops short) is missing its entire
        // right wall; the right one (sector 1) is closed. The winning
        // partitions run through the leak, exposing the unclosed sectors.
        let doc = doc_with_sectors(3);
        let points = [
            (0.0, 0.0),    // 0
            (0.0, 32.0),   // 1
            (0.0, 64.0),   // 2
            (64.0, 64.0),  // 3
            (64.0, 0.0),   // 4
            (48.0, 32.0),  // 5
            (96.0, 0.0),   // 6
            (96.0, 32.0),  // 7
            (96.0, 64.0),  // 8
            (160.0, 64.0), // 9
            (160.0, 32.0), // 10
            (160.0, 0.0),  // 11
            (80.0, 8.0),   // 12
            (112.0, 8.0),  // 13
        ];
        for (x, y) in points {
            doc.push_vertex(x, y);
        }
        one_sided(&doc, 0, 1, 0);
        one_sided(&doc, 1, 2, 2);
        one_sided(&doc, 2, 3, 2);
        one_sided(&doc, 4, 0, 0);
        two_sided(&doc, 1, 5, 0, 2);
        one_sided(&doc, 6, 7, 1);
        one_sided(&doc, 7, 8, 1);
        one_sided(&doc, 8, 9, 1);
        one_sided(&doc, 9, 10, 1);
        one_sided(&doc, 10, 11, 1);
        one_sided(&doc, 11, 6, 1);
        one_sided(&doc, 12, 13, 0);

        let (p, observer) = build(&doc);
        assert!(p.built_ok());

        let events = observer.read();
        assert!(!events.unclosed.is_empty());
        for &(sector, _) in &events.unclosed {
            assert!(sector == 0 || sector == 2);
        }
    }

    #[test]
    fn test_s5_self_referencing_line() {
        // A closed square room with a floating self-referencing line
        // inside it. The self-ref line is the only viable partition; the
        // gaps beside it are capped with the room's sector and no migrant
        // half-edges are reported.
        let doc = doc_with_sectors(1);
        doc.push_vertex(0.0, 0.0);
        doc.push_vertex(0.0, 64.0);
        doc.push_vertex(64.0, 64.0);
        doc.push_vertex(64.0, 0.0);
        one_sided(&doc, 0, 1, 0);
        one_sided(&doc, 1, 2, 0);
        one_sided(&doc, 2, 3, 0);
        one_sided(&doc, 3, 0, 0);
        doc.push_vertex(16.0, 32.0);
        doc.push_vertex(48.0, 32.0);
        two_sided(&doc, 4, 5, 0, 0);

        let (p, observer) = build(&doc);

        assert_eq!(p.num_nodes(), 1);
        assert_eq!(p.num_leafs(), 2);
        assert_eq!(leaf_ring_sizes(&p), vec![6, 6]);
        for leaf in 0..p.tree().leaf_count() {
            assert_eq!(p.tree().leaf(leaf).sector, Some(0));
        }

        let events = observer.read();
        assert!(events.migrants.is_empty());
        assert!(events.unclosed.is_empty());
        assert!(events.partials.is_empty());

        assert_build_invariants(&p);
    }

    #[test]
    fn test_s6_determinism() {
        let doc = bisected_square_doc();
        let (first, _) = build(&doc);
        let (second, _) = build(&doc);

        assert_eq!(first.num_nodes(), second.num_nodes());
        assert_eq!(first.num_leafs(), second.num_leafs());
        assert_eq!(first.num_hedges(), second.num_hedges());
        assert_eq!(first.num_vertexes(), second.num_vertexes());
        assert_eq!(leaf_ring_sizes(&first), leaf_ring_sizes(&second));
        for leaf in 0..first.tree().leaf_count() {
            assert_eq!(
                first.tree().leaf(leaf).sector,
                second.tree().leaf(leaf).sector
            );
        }

        let roots = (first.root().unwrap(), second.root().unwrap());
        match (
            first.tree().tree_node(roots.0).element,
            second.tree().tree_node(roots.1).element,
        ) {
            (Some(BspElement::Node(a)), Some(BspElement::Node(b))) => {
                assert_eq!(first.tree().node(a).partition, second.tree().node(b).partition);
            }
            other => panic!("expected internal roots, got {:?}", other),
        }

        // Rebuilding with the same instance is equally deterministic.
        let mut third = first;
        let nodes = third.num_nodes();
        third.build().expect("rebuild should succeed");
        assert_eq!(third.num_nodes(), nodes);
        assert_build_invariants(&third);
    }

    #[test]
    fn test_one_way_window_preprocessing() {
        // A one-sided line inside a closed room, sharing a vertex with
        // two more one-sided lines (odd one-sided owner count): the cast
        // finds the room's own sector open on both sides, so the line is
        // flagged as a one-way window and built two-sided.
        let doc = doc_with_sectors(1);
        doc.push_vertex(0.0, 0.0);
        doc.push_vertex(0.0, 64.0);
        doc.push_vertex(64.0, 64.0);
        doc.push_vertex(64.0, 0.0);
        one_sided(&doc, 0, 1, 0);
        one_sided(&doc, 1, 2, 0);
        one_sided(&doc, 2, 3, 0);
        one_sided(&doc, 3, 0, 0);
        doc.push_vertex(16.0, 32.0); // 4
        doc.push_vertex(48.0, 32.0); // 5
        doc.push_vertex(48.0, 48.0); // 6
        doc.push_vertex(56.0, 32.0); // 7
        let window_line = one_sided(&doc, 4, 5, 0);
        one_sided(&doc, 5, 6, 0);
        one_sided(&doc, 5, 7, 0);

        let (p, observer) = build(&doc);
        assert!(p.built_ok());

        let events = observer.read();
        assert!(events
            .windows
            .iter()
            .any(|&(line, sector)| line == window_line && sector == 0));

        // The window line was given a back-side twin.
        let right = (0..p.segments.len())
            .find(|&index| {
                let seg = p.segment(index);
                seg.line == Some(window_line) && seg.side == SegmentSide::Front
            })
            .unwrap();
        assert!(p.segment(right).twin.is_some());

        assert_build_invariants(&p);
    }

    #[test]
    fn test_shared_source_line_is_forced_collinear() {
        // Segments descended from the partition's own line must never be
        // classified as intersecting it, however much their arithmetic
        // has drifted.
        let drifted = Segment {
            from: 0,
            to: 1,
            sector: Some(0),
            line: None,
            side: SegmentSide::Front,
            source_line: Some(7),
            twin: None,
            prev_on_side: None,
            next_on_side: None,
            block: None,
            leaf: None,
            next_in_leaf: None,
            prev_in_leaf: None,
            geometry: EdgeGeometry::new(
                Point2D::new(0.0, 32.0 - 0.02),
                Point2D::new(64.0, 32.0 + 0.02),
            ),
            dead: false,
        };
        let partition =
            EdgeGeometry::new(Point2D::new(0.0, 32.0), Point2D::new(64.0, 32.0));

        let (a, b) = Partitioner::partition_distances(&partition, Some(7), &drifted);
        assert_eq!((a, b), (0.0, 0.0));
        assert_eq!(
            line_relationship(a, b, DIST_EPSILON),
            LineRelationship::Collinear
        );

        // Without the shared source line the jitter reads as a crossing.
        let (a, b) = Partitioner::partition_distances(&partition, Some(8), &drifted);
        assert_eq!(
            line_relationship(a, b, DIST_EPSILON),
            LineRelationship::Intersects
        );
    }

    #[test]
    fn test_empty_map_builds_nothing() {
        let doc = doc_with_sectors(0);
        let (p, observer) = build(&doc);

        assert!(p.built_ok());
        assert_eq!(p.root(), None);
        assert_eq!(p.num_nodes(), 0);
        assert_eq!(p.num_leafs(), 0);
        assert_eq!(p.num_hedges(), 0);
        assert!(observer.read().unclosed.is_empty());
    }

    #[test]
    fn test_released_elements_leave_counters() {
        // The self-ref map splits both side walls, so the build allocates
        // vertices of its own.
        let doc = doc_with_sectors(1);
        doc.push_vertex(0.0, 0.0);
        doc.push_vertex(0.0, 64.0);
        doc.push_vertex(64.0, 64.0);
        doc.push_vertex(64.0, 0.0);
        one_sided(&doc, 0, 1, 0);
        one_sided(&doc, 1, 2, 0);
        one_sided(&doc, 2, 3, 0);
        one_sided(&doc, 3, 0, 0);
        doc.push_vertex(16.0, 32.0);
        doc.push_vertex(48.0, 32.0);
        two_sided(&doc, 4, 5, 0, 0);

        let (mut p, _) = build(&doc);
        let leafs = p.num_leafs();
        let vertexes = p.num_vertexes();
        assert_eq!(vertexes, 2);

        assert!(p.release(BuiltElement::Leaf(0)));
        assert!(!p.release(BuiltElement::Leaf(0)));
        assert_eq!(p.num_leafs(), leafs - 1);

        assert!(p.release(BuiltElement::Vertex(0)));
        assert_eq!(p.num_vertexes(), vertexes - 1);
        assert_eq!(p.vertex(0), None);
        assert!(p.vertex(1).is_some());
    }
}
