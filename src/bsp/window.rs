// src/bsp/window.rs
// One-way window detection: a one-sided line whose back actually opens
// into the sector its front faces (a map trick for see-through walls).
// Such lines are treated as two-sided during initial segment creation.

use crate::bsp::bsp_level::LineInfo;
use crate::bsp::bsp_segment::{LineIndex, SectorIndex, VertexStore};
use crate::bsp::bsp_util::{BoundingBox, Point2D};
use crate::bsp::DIST_EPSILON;
use crate::document::MapDocument;
use log::trace;

/// Scan every line for the window effect, returning `(line, sector)`
/// pairs to decorate the line infos with.
pub(crate) fn find_window_effects(
    doc: &MapDocument,
    map_bounds: &BoundingBox,
    line_infos: &[LineInfo],
    vertexes: &VertexStore,
) -> Vec<(LineIndex, SectorIndex)> {
    let mut found = Vec::new();
    for (index, info) in line_infos.iter().enumerate() {
        if !might_have_window_effect(info, vertexes) {
            continue;
        }
        if let Some(sector) = test_for_window_effect(doc, map_bounds, line_infos, index) {
            trace!("Line #{} carries a window effect onto sector #{}.", index, sector);
            found.push((index, sector));
        }
    }
    found
}

/// Cheap pre-filter: look for an odd number of one-sided line owners on
/// either endpoint of a one-sided line (idea courtesy of Graham Jackson).
fn might_have_window_effect(info: &LineInfo, vertexes: &VertexStore) -> bool {
    if info.polyobj {
        return false;
    }
    if info.has_front && info.has_back {
        return false;
    }
    if !info.has_front {
        return false;
    }

    for vertex in [info.start, info.end] {
        let owners = vertexes.info(vertex);
        if owners.one_sided_owners % 2 == 1
            && owners.one_sided_owners + owners.two_sided_owners > 1
        {
            return true;
        }
    }

    false
}

/// Cast a ray from the line's midpoint perpendicular to its dominant
/// axis and find the nearest line hit on each side. If the open sector
/// behind the test line equals its front sector, the line is a window.
fn test_for_window_effect(
    doc: &MapDocument,
    map_bounds: &BoundingBox,
    line_infos: &[LineInfo],
    index: LineIndex,
) -> Option<SectorIndex> {
    let test = &line_infos[index];
    let mid = Point2D::new(
        (test.from.x + test.to.x) / 2.0,
        (test.from.y + test.to.y) / 2.0,
    );
    let cast_horizontal = test.direction.x.abs() < test.direction.y.abs();

    let mut scan_region = *map_bounds;
    if cast_horizontal {
        scan_region.min_y = test.aabb.min_y - DIST_EPSILON;
        scan_region.max_y = test.aabb.max_y + DIST_EPSILON;
    } else {
        scan_region.min_x = test.aabb.min_x - DIST_EPSILON;
        scan_region.max_x = test.aabb.max_x + DIST_EPSILON;
    }

    // Nearest hit on each side: (distance, open sector there).
    let mut front: (f64, Option<SectorIndex>) = (f64::MAX, None);
    let mut back: (f64, Option<SectorIndex>) = (f64::MAX, None);

    doc.lines_box_iterator(&scan_region, |other_index, _line| {
        if other_index == index {
            return true;
        }
        let other = &line_infos[other_index];
        if other.has_front && other.has_back && other.self_ref {
            return true;
        }

        let (distance, is_front, hit_sector);
        if cast_horizontal {
            if other.direction.y.abs() < DIST_EPSILON {
                return true;
            }
            if other.aabb.max_y < mid.y - DIST_EPSILON || other.aabb.min_y > mid.y + DIST_EPSILON
            {
                return true;
            }

            let signed = (other.from.x
                + (mid.y - other.from.y) * other.direction.x / other.direction.y)
                - mid.x;
            is_front = (test.direction.y > 0.0) != (signed > 0.0);
            distance = signed.abs();

            let hits_back =
                (test.direction.y > 0.0) ^ (other.direction.y > 0.0) ^ !is_front;
            hit_sector = if hits_back {
                other.back_sector
            } else {
                other.front_sector
            };
        } else {
            if other.direction.x.abs() < DIST_EPSILON {
                return true;
            }
            if other.aabb.max_x < mid.x - DIST_EPSILON || other.aabb.min_x > mid.x + DIST_EPSILON
            {
                return true;
            }

            let signed = (other.from.y
                + (mid.x - other.from.x) * other.direction.y / other.direction.x)
                - mid.y;
            is_front = (test.direction.x > 0.0) == (signed > 0.0);
            distance = signed.abs();

            let hits_back =
                (test.direction.x > 0.0) ^ (other.direction.x > 0.0) ^ !is_front;
            hit_sector = if hits_back {
                other.back_sector
            } else {
                other.front_sector
            };
        }

        // Too close? (overlapping lines?)
        if distance < DIST_EPSILON {
            return true;
        }

        let nearest = if is_front { &mut front } else { &mut back };
        if distance < nearest.0 {
            *nearest = (distance, hit_sector);
        }
        true
    });

    let (Some(back_open), Some(front_open)) = (back.1, front.1) else {
        return None;
    };
    (test.front_sector == Some(back_open)).then_some(front_open)
}
