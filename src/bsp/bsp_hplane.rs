// src/bsp/bsp_hplane.rs
// The current binary space half-plane and its intercept list.

use crate::bsp::bsp_segment::{LineIndex, SectorIndex, VertexIndex};
use crate::bsp::bsp_util::EdgeGeometry;
use crate::bsp::DIST_EPSILON;
use std::cmp::Ordering;

/// A point where the partition line crosses a vertex, with the sectors
/// open on the partition's either side immediately before and after it
/// (along the partition direction). `None` means that direction is closed.
#[derive(Debug, Clone)]
pub struct Intercept {
    pub distance: f64,
    pub vertex: VertexIndex,
    /// The intercepting segment came from a self-referencing line.
    pub self_ref: bool,
    pub before: Option<SectorIndex>,
    pub after: Option<SectorIndex>,
}

/// The half-plane the current partition round subdivides along.
#[derive(Default)]
pub struct HPlane {
    geometry: Option<EdgeGeometry>,
    /// Map line of the partition segment; caps built along this plane
    /// inherit it as their source line.
    line: Option<LineIndex>,
    intercepts: Vec<Intercept>,
}

impl HPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconfigure the half-plane to coincide with a partition segment.
    /// Any intercepts from an earlier round are discarded.
    pub fn configure(&mut self, geometry: EdgeGeometry, line: Option<LineIndex>) {
        self.geometry = Some(geometry);
        self.line = line;
        self.intercepts.clear();
    }

    pub fn partition(&self) -> EdgeGeometry {
        self.geometry
            .expect("half-plane queried before being configured")
    }

    pub fn line(&self) -> Option<LineIndex> {
        self.line
    }

    pub fn clear_intercepts(&mut self) {
        self.intercepts.clear();
    }

    pub fn intercepts(&self) -> &[Intercept] {
        &self.intercepts
    }

    pub fn intercept_by_vertex(&self, vertex: VertexIndex) -> Option<&Intercept> {
        self.intercepts.iter().find(|i| i.vertex == vertex)
    }

    /// Insert a new intercept, keeping the list ordered by distance.
    /// Scans from the back: intercepts arrive in roughly ascending order.
    pub fn add_intercept(&mut self, intercept: Intercept) {
        let mut at = self.intercepts.len();
        while at > 0 && intercept.distance < self.intercepts[at - 1].distance {
            at -= 1;
        }
        self.intercepts.insert(at, intercept);
    }

    /// Sort intercepts by distance and merge neighbours closer than
    /// `DIST_EPSILON`. The surviving intercept inherits any open sector
    /// its partner knew about; a self-referencing intercept merged with a
    /// normal one loses the self-ref marking.
    pub fn sort_and_merge_intercepts(&mut self) {
        self.intercepts.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
        });

        let mut index = 0;
        while index + 1 < self.intercepts.len() {
            let gap = self.intercepts[index + 1].distance - self.intercepts[index].distance;
            if gap > DIST_EPSILON {
                index += 1;
                continue;
            }

            let other = self.intercepts.remove(index + 1);
            let cur = &mut self.intercepts[index];

            if cur.self_ref && !other.self_ref {
                if cur.before.is_some() && other.before.is_some() {
                    cur.before = other.before;
                }
                if cur.after.is_some() && other.after.is_some() {
                    cur.after = other.after;
                }
                cur.self_ref = false;
            }

            if cur.before.is_none() {
                cur.before = other.before;
            }
            if cur.after.is_none() {
                cur.after = other.after;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::bsp_util::Point2D;

    fn intercept(distance: f64, vertex: VertexIndex) -> Intercept {
        Intercept {
            distance,
            vertex,
            self_ref: false,
            before: None,
            after: None,
        }
    }

    fn configured() -> HPlane {
        let mut hplane = HPlane::new();
        hplane.configure(
            EdgeGeometry::new(Point2D::new(0.0, 0.0), Point2D::new(64.0, 0.0)),
            Some(0),
        );
        hplane
    }

    #[test]
    fn test_intercepts_kept_sorted() {
        let mut hplane = configured();
        hplane.add_intercept(intercept(32.0, 0));
        hplane.add_intercept(intercept(8.0, 1));
        hplane.add_intercept(intercept(64.0, 2));
        let distances: Vec<f64> = hplane.intercepts().iter().map(|i| i.distance).collect();
        assert_eq!(distances, vec![8.0, 32.0, 64.0]);
    }

    #[test]
    fn test_merge_inherits_open_sectors() {
        let mut hplane = configured();
        let mut a = intercept(16.0, 0);
        a.after = Some(4);
        let mut b = intercept(16.0 + DIST_EPSILON / 2.0, 1);
        b.before = Some(2);
        hplane.add_intercept(a);
        hplane.add_intercept(b);

        hplane.sort_and_merge_intercepts();
        assert_eq!(hplane.intercepts().len(), 1);
        let merged = &hplane.intercepts()[0];
        assert_eq!(merged.before, Some(2));
        assert_eq!(merged.after, Some(4));
    }

    #[test]
    fn test_merge_clears_self_ref_against_normal_partner() {
        let mut hplane = configured();
        let mut a = intercept(16.0, 0);
        a.self_ref = true;
        a.after = Some(1);
        let mut b = intercept(16.0, 1);
        b.after = Some(7);
        hplane.add_intercept(a);
        hplane.add_intercept(b);

        hplane.sort_and_merge_intercepts();
        let merged = &hplane.intercepts()[0];
        assert!(!merged.self_ref);
        // The non-self-ref partner's sector wins when both are open.
        assert_eq!(merged.after, Some(7));
    }

    #[test]
    fn test_distant_intercepts_do_not_merge() {
        let mut hplane = configured();
        hplane.add_intercept(intercept(16.0, 0));
        hplane.add_intercept(intercept(17.0, 1));
        hplane.sort_and_merge_intercepts();
        assert_eq!(hplane.intercepts().len(), 2);
    }
}
