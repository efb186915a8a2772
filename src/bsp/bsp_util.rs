// src/bsp/bsp_util.rs
// Geometry and other helper functions specific to BSP.

use crate::bsp::{LineRelationship, DIST_EPSILON};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Point2D { x, y }
    }

    pub fn distance_to(&self, other: &Point2D) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2D {
    pub x: f64,
    pub y: f64,
}

impl Vector2D {
    pub fn new(x: f64, y: f64) -> Self {
        Vector2D { x, y }
    }

    pub fn dot(&self, other: &Vector2D) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Gross orientation of a line's direction vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlopeType {
    Horizontal,
    Vertical,
    Positive,
    Negative,
}

impl SlopeType {
    pub fn classify(dx: f64, dy: f64) -> Self {
        if dx == 0.0 {
            SlopeType::Vertical
        } else if dy == 0.0 {
            SlopeType::Horizontal
        } else if dx * dy > 0.0 {
            SlopeType::Positive
        } else {
            SlopeType::Negative
        }
    }
}

/// Angle of a direction vector in degrees, normalized to [0, 360).
pub fn direction_to_angle(dx: f64, dy: f64) -> f64 {
    let mut angle = dy.atan2(dx).to_degrees();
    if angle < 0.0 {
        angle += 360.0;
    }
    angle
}

/// The opposite direction, normalized to [0, 360).
pub fn inverse_angle(angle: f64) -> f64 {
    if angle < 180.0 {
        angle + 180.0
    } else {
        angle - 180.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new_empty() -> Self {
        BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn expand_point(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn combine(&mut self, other: &BoundingBox) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Grow the box by `amount` on every side.
    pub fn inflated(&self, amount: f64) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x - amount,
            min_y: self.min_y - amount,
            max_x: self.max_x + amount,
            max_y: self.max_y + amount,
        }
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.max_x >= other.min_x
            && self.min_x <= other.max_x
            && self.max_y >= other.min_y
            && self.min_y <= other.max_y
    }
}

/// Precomputed geometry for a directed line in the plane, shared between
/// segments and the current half-plane.
///
/// `perp` and `para` are line coefficients chosen so that the signed
/// perpendicular distance of a point (positive = right of the direction)
/// and the parallel distance along the line from the start both reduce to
/// a dot product plus the coefficient, divided by the length.
#[derive(Debug, Clone, Copy)]
pub struct EdgeGeometry {
    pub start: Point2D,
    pub end: Point2D,
    pub direction: Vector2D,
    pub length: f64,
    pub angle: f64,
    pub perp: f64,
    pub para: f64,
    pub slope: SlopeType,
}

impl EdgeGeometry {
    pub fn new(start: Point2D, end: Point2D) -> Self {
        let direction = Vector2D::new(end.x - start.x, end.y - start.y);
        EdgeGeometry {
            start,
            end,
            direction,
            length: direction.length(),
            angle: direction_to_angle(direction.x, direction.y),
            perp: start.y * direction.x - start.x * direction.y,
            para: -start.x * direction.x - start.y * direction.y,
            slope: SlopeType::classify(direction.x, direction.y),
        }
    }

    pub fn inverse_angle(&self) -> f64 {
        inverse_angle(self.angle)
    }

    /// Signed perpendicular distance of `point`; positive on the right.
    pub fn perp_distance(&self, point: Point2D) -> f64 {
        (point.x * self.direction.y - point.y * self.direction.x + self.perp) / self.length
    }

    /// Distance of `point` along the line, measured from `start`.
    pub fn para_distance(&self, point: Point2D) -> f64 {
        (point.x * self.direction.x + point.y * self.direction.y + self.para) / self.length
    }

    fn point_on_side(&self, x: f64, y: f64) -> i32 {
        let dist = self.perp_distance(Point2D::new(x, y));
        if dist < -DIST_EPSILON {
            -1
        } else if dist > DIST_EPSILON {
            1
        } else {
            0
        }
    }

    /// Test a whole box against this line: 1 if the box lies entirely on
    /// the right, -1 entirely on the left, 0 if the line cuts it.
    ///
    /// Horizontal and vertical lines get exact coordinate comparisons; for
    /// the sloped cases only the two corners straddling the direction need
    /// checking.
    pub fn box_on_side(&self, bounds: &BoundingBox) -> i32 {
        match self.slope {
            SlopeType::Vertical => {
                let mut p1 = if bounds.min_x > self.start.x { 1 } else { -1 };
                let mut p2 = if bounds.max_x > self.start.x { 1 } else { -1 };
                if self.direction.y < 0.0 {
                    p1 = -p1;
                    p2 = -p2;
                }
                if p1 == p2 {
                    p1
                } else {
                    0
                }
            }
            SlopeType::Horizontal => {
                let mut p1 = if bounds.min_y < self.start.y { 1 } else { -1 };
                let mut p2 = if bounds.max_y < self.start.y { 1 } else { -1 };
                if self.direction.x < 0.0 {
                    p1 = -p1;
                    p2 = -p2;
                }
                if p1 == p2 {
                    p1
                } else {
                    0
                }
            }
            SlopeType::Positive => {
                let p1 = self.point_on_side(bounds.min_x, bounds.max_y);
                let p2 = self.point_on_side(bounds.max_x, bounds.min_y);
                if p1 == p2 && p1 != 0 {
                    p1
                } else {
                    0
                }
            }
            SlopeType::Negative => {
                let p1 = self.point_on_side(bounds.min_x, bounds.min_y);
                let p2 = self.point_on_side(bounds.max_x, bounds.max_y);
                if p1 == p2 && p1 != 0 {
                    p1
                } else {
                    0
                }
            }
        }
    }

    /// Intersection of this line with a segment whose endpoint
    /// perpendicular distances are `perp_from` / `perp_to`. Takes advantage
    /// of axis-aligned cases to pick a 'nice' intersection point.
    pub fn intersection_with(&self, seg: &EdgeGeometry, perp_from: f64, perp_to: f64) -> Point2D {
        // Horizontal partition against vertical segment.
        if self.slope == SlopeType::Horizontal && seg.slope == SlopeType::Vertical {
            return Point2D::new(seg.start.x, self.start.y);
        }

        // Vertical partition against horizontal segment.
        if self.slope == SlopeType::Vertical && seg.slope == SlopeType::Horizontal {
            return Point2D::new(self.start.x, seg.start.y);
        }

        // 0 = start, 1 = end.
        let ds = perp_from / (perp_from - perp_to);

        let x = if seg.slope == SlopeType::Vertical {
            seg.start.x
        } else {
            seg.start.x + seg.direction.x * ds
        };
        let y = if seg.slope == SlopeType::Horizontal {
            seg.start.y
        } else {
            seg.start.y + seg.direction.y * ds
        };

        Point2D::new(x, y)
    }
}

/// Classify a segment against a partition from the signed perpendicular
/// distances of its endpoints.
pub fn line_relationship(a: f64, b: f64, dist_epsilon: f64) -> LineRelationship {
    // Collinear with the partition plane?
    if a.abs() <= dist_epsilon && b.abs() <= dist_epsilon {
        return LineRelationship::Collinear;
    }

    // Right of the partition plane?
    if a > -dist_epsilon && b > -dist_epsilon {
        // Close enough to intercept?
        if a < dist_epsilon || b < dist_epsilon {
            return LineRelationship::RightIntercept;
        }
        return LineRelationship::Right;
    }

    // Left of the partition plane?
    if a < dist_epsilon && b < dist_epsilon {
        // Close enough to intercept?
        if a > -dist_epsilon || b > -dist_epsilon {
            return LineRelationship::LeftIntercept;
        }
        return LineRelationship::Left;
    }

    LineRelationship::Intersects
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn geometry(x1: f64, y1: f64, x2: f64, y2: f64) -> EdgeGeometry {
        EdgeGeometry::new(Point2D::new(x1, y1), Point2D::new(x2, y2))
    }

    #[test]
    fn test_perp_distance_sign() {
        // Eastward line through the origin: below is right (positive).
        let east = geometry(0.0, 0.0, 64.0, 0.0);
        assert_approx_eq!(east.perp_distance(Point2D::new(10.0, -8.0)), 8.0);
        assert_approx_eq!(east.perp_distance(Point2D::new(10.0, 8.0)), -8.0);
        assert_approx_eq!(east.perp_distance(Point2D::new(10.0, 0.0)), 0.0);
    }

    #[test]
    fn test_para_distance_measures_from_start() {
        let diag = geometry(8.0, 8.0, 16.0, 16.0);
        assert_approx_eq!(diag.para_distance(Point2D::new(8.0, 8.0)), 0.0);
        assert_approx_eq!(
            diag.para_distance(Point2D::new(16.0, 16.0)),
            (128.0f64).sqrt()
        );
        // A point behind the start measures negative.
        assert!(diag.para_distance(Point2D::new(0.0, 0.0)) < 0.0);
    }

    #[test]
    fn test_angles() {
        assert_approx_eq!(geometry(0.0, 0.0, 10.0, 0.0).angle, 0.0);
        assert_approx_eq!(geometry(0.0, 0.0, 0.0, 10.0).angle, 90.0);
        assert_approx_eq!(geometry(0.0, 0.0, -10.0, 0.0).angle, 180.0);
        assert_approx_eq!(geometry(0.0, 0.0, 0.0, -10.0).angle, 270.0);
        assert_approx_eq!(inverse_angle(90.0), 270.0);
        assert_approx_eq!(inverse_angle(270.0), 90.0);
    }

    #[test]
    fn test_slope_classification() {
        assert_eq!(SlopeType::classify(5.0, 0.0), SlopeType::Horizontal);
        assert_eq!(SlopeType::classify(0.0, -3.0), SlopeType::Vertical);
        assert_eq!(SlopeType::classify(2.0, 2.0), SlopeType::Positive);
        assert_eq!(SlopeType::classify(2.0, -2.0), SlopeType::Negative);
    }

    #[test]
    fn test_line_relationship_table() {
        let eps = DIST_EPSILON;
        assert_eq!(
            line_relationship(0.0, 0.0, eps),
            LineRelationship::Collinear
        );
        assert_eq!(line_relationship(5.0, 3.0, eps), LineRelationship::Right);
        assert_eq!(
            line_relationship(0.0, 3.0, eps),
            LineRelationship::RightIntercept
        );
        assert_eq!(line_relationship(-5.0, -3.0, eps), LineRelationship::Left);
        assert_eq!(
            line_relationship(-5.0, 0.0, eps),
            LineRelationship::LeftIntercept
        );
        assert_eq!(
            line_relationship(-5.0, 5.0, eps),
            LineRelationship::Intersects
        );
    }

    #[test]
    fn test_box_on_side_axis_aligned() {
        let north = geometry(32.0, 0.0, 32.0, 64.0);
        let right_box = BoundingBox::new(40.0, 0.0, 60.0, 60.0);
        let left_box = BoundingBox::new(0.0, 0.0, 30.0, 60.0);
        let straddling = BoundingBox::new(0.0, 0.0, 60.0, 60.0);
        assert_eq!(north.box_on_side(&right_box), 1);
        assert_eq!(north.box_on_side(&left_box), -1);
        assert_eq!(north.box_on_side(&straddling), 0);

        // Reversing the direction swaps the sides.
        let south = geometry(32.0, 64.0, 32.0, 0.0);
        assert_eq!(south.box_on_side(&right_box), -1);
        assert_eq!(south.box_on_side(&left_box), 1);
    }

    #[test]
    fn test_box_on_side_sloped() {
        let diag = geometry(0.0, 0.0, 64.0, 64.0);
        let below = BoundingBox::new(32.0, 0.0, 60.0, 20.0);
        let above = BoundingBox::new(0.0, 40.0, 20.0, 60.0);
        let straddling = BoundingBox::new(0.0, 0.0, 64.0, 64.0);
        assert_eq!(diag.box_on_side(&below), 1);
        assert_eq!(diag.box_on_side(&above), -1);
        assert_eq!(diag.box_on_side(&straddling), 0);
    }

    #[test]
    fn test_intersection_prefers_nice_points() {
        let horizontal = geometry(0.0, 32.0, 64.0, 32.0);
        let vertical = geometry(16.0, 0.0, 16.0, 64.0);
        let a = horizontal.perp_distance(vertical.start);
        let b = horizontal.perp_distance(vertical.end);
        let point = horizontal.intersection_with(&vertical, a, b);
        assert_eq!(point, Point2D::new(16.0, 32.0));

        // General case: parameterized along the segment.
        let diag = geometry(0.0, 0.0, 64.0, 64.0);
        let cross = geometry(64.0, 0.0, 0.0, 64.0);
        let a = diag.perp_distance(cross.start);
        let b = diag.perp_distance(cross.end);
        let point = diag.intersection_with(&cross, a, b);
        assert_approx_eq!(point.x, 32.0);
        assert_approx_eq!(point.y, 32.0);
    }
}
