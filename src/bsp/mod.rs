// src/bsp/mod.rs
pub mod bsp_cost;
pub mod bsp_hplane;
pub mod bsp_level;
pub mod bsp_node;
pub mod bsp_segment;
pub mod bsp_superblock;
pub mod bsp_util;
pub mod events;
mod window; // Not public, run internally at the start of a build

pub use bsp_level::{BuiltElement, Partitioner};
pub use bsp_node::{BspElement, BspTree};
pub use bsp_util::{BoundingBox, Point2D, Vector2D};
pub use events::BuildObserver;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distance epsilon: positions closer than this along or across a line are
/// considered coincident.
pub const DIST_EPSILON: f64 = 1.0 / 128.0;

/// Threshold below which a produced half-edge counts as undesirably short;
/// drives the near-miss and iffy-split cost surcharges.
pub const SHORT_HEDGE_EPSILON: f64 = 4.0;

/// Angle epsilon in degrees for edge-tip and winding comparisons.
pub const ANG_EPSILON: f64 = 1.0 / 1024.0;

/// Superblocks at or below this size along both axes stop subdividing.
pub const BLOCK_LEAF_SIZE: i32 = 256;

/// The possible logical relationships between a line segment and a
/// partition line, classified from the signed perpendicular distances of
/// the segment's endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineRelationship {
    Collinear,
    Right,
    /// Right of the partition, with one vertex on it.
    RightIntercept,
    Left,
    /// Left of the partition, with one vertex on it.
    LeftIntercept,
    Intersects,
}

/// Which side of its linedef a segment runs along.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentSide {
    Front, // Right side of linedef
    Back,  // Left side of linedef
}

/// Tunables for a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Cost factor attributed to splitting a segment. Typical value 7.
    pub split_cost_factor: i32,

    /// Collapse leaves that are degenerate (fewer than three segments) or
    /// orphaned (no segment bound to a sector-bearing line side) upward,
    /// deleting their half-edges. Off by default.
    pub collapse_degenerate_leafs: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            split_cost_factor: 7,
            collapse_degenerate_leafs: false,
        }
    }
}

/// Fatal build failures. Non-fatal findings are reported through
/// [`BuildObserver`] instead and never abort the build.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A vertex was queried for its open sector but owns no edge tips;
    /// the input geometry is malformed.
    #[error("vertex #{0} has no edge tips")]
    MissingEdgeTips(usize),

    /// Partitioning left one side of the half-plane with no segments.
    #[error("{0} segment set is empty along the partition")]
    EmptyPartitionSide(&'static str),

    /// A finished leaf contains no half-edge bound to a map line side.
    #[error("BSP leaf #{0} has no line-linked half-edge")]
    NoMapSideInLeaf(usize),
}
