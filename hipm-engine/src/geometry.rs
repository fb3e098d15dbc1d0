//! Planar geometry primitives
//!
//! All angles are derived with `atan2` so near-vertical and near-horizontal
//! lines behave identically. Degenerate inputs (coincident points, parallel
//! lines) yield `None` rather than NaN.

use serde::{Deserialize, Serialize};

/// Lengths below this are treated as zero
pub const EPSILON: f64 = 1e-9;

/// A point in image pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    pub fn midpoint(&self, other: &Point2D) -> Point2D {
        Point2D::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Point2D {
        Point2D::new(self.x + dx, self.y + dy)
    }

    /// Vector from `self` to `other`
    fn to(&self, other: &Point2D) -> (f64, f64) {
        (other.x - self.x, other.y - self.y)
    }
}

fn cross(a: (f64, f64), b: (f64, f64)) -> f64 {
    a.0 * b.1 - a.1 * b.0
}

fn dot(a: (f64, f64), b: (f64, f64)) -> f64 {
    a.0 * b.0 + a.1 * b.1
}

/// Angle in degrees, in [0, 180], between rays `origin→a` and `origin→b`
pub fn ray_angle(origin: &Point2D, a: &Point2D, b: &Point2D) -> Option<f64> {
    let u = origin.to(a);
    let v = origin.to(b);
    if origin.distance(a) < EPSILON || origin.distance(b) < EPSILON {
        return None;
    }
    Some(cross(u, v).atan2(dot(u, v)).abs().to_degrees())
}

/// Acute angle in degrees, in [0, 90], between line `p0-p1` and line `q0-q1`
pub fn line_angle(p0: &Point2D, p1: &Point2D, q0: &Point2D, q1: &Point2D) -> Option<f64> {
    let u = p0.to(p1);
    let v = q0.to(q1);
    if p0.distance(p1) < EPSILON || q0.distance(q1) < EPSILON {
        return None;
    }
    let angle = cross(u, v).atan2(dot(u, v)).abs().to_degrees();
    Some(if angle > 90.0 { 180.0 - angle } else { angle })
}

/// Signed perpendicular distance of `p` from the line through `a` and `b`
///
/// Sign follows the cross product of `a→b` and `a→p`: for a line running
/// toward +x, points with larger y are positive.
pub fn signed_distance(p: &Point2D, a: &Point2D, b: &Point2D) -> Option<f64> {
    let len = a.distance(b);
    if len < EPSILON {
        return None;
    }
    Some(cross(a.to(b), a.to(p)) / len)
}

/// Unsigned perpendicular distance of `p` from the line through `a` and `b`
pub fn perpendicular_distance(p: &Point2D, a: &Point2D, b: &Point2D) -> Option<f64> {
    signed_distance(p, a, b).map(f64::abs)
}

/// Intersection of the infinite lines `a0-a1` and `b0-b1`
pub fn line_intersection(
    a0: &Point2D,
    a1: &Point2D,
    b0: &Point2D,
    b1: &Point2D,
) -> Option<Point2D> {
    let r = a0.to(a1);
    let s = b0.to(b1);
    let denom = cross(r, s);
    if denom.abs() < EPSILON {
        return None;
    }
    let t = cross(a0.to(b0), s) / denom;
    Some(Point2D::new(a0.x + t * r.0, a0.y + t * r.1))
}

/// Parameter `t` of the projection of `p` onto `a + t (b - a)`
pub fn projection_parameter(p: &Point2D, a: &Point2D, b: &Point2D) -> Option<f64> {
    let r = a.to(b);
    let len_sq = dot(r, r);
    if len_sq < EPSILON * EPSILON {
        return None;
    }
    Some(dot(a.to(p), r) / len_sq)
}

/// Arithmetic mean of a point set
pub fn centroid(points: &[Point2D]) -> Option<Point2D> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(Point2D::new(sx / n, sy / n))
}

/// Shoelace area of a closed polygon
pub fn polygon_area(points: &[Point2D]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(p, q)| p.x * q.y - q.x * p.y)
        .sum();
    twice.abs() / 2.0
}
