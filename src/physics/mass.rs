//! Closed-form mass properties for the shapes bodies are built from.
//!
//! Moments are about the body's center of gravity,
//! with shapes positioned relative to it by the given offsets.
//! Polygon functions expect counter-clockwise convex vertex lists
//! and give negative areas for clockwise ones.

use crate::math as m;
use std::f64::consts::PI;

/// Moment of inertia for a hollow circle (annulus) with inner radius `r1`
/// and outer radius `r2`, centered at `offset` from the center of gravity.
/// A solid circle has an inner radius of zero.
pub fn moment_for_circle(mass: f64, r1: f64, r2: f64, offset: m::Vec2) -> f64 {
    mass * (0.5 * (r1 * r1 + r2 * r2) + offset.mag_sq())
}

/// Area of a hollow circle.
pub fn area_for_circle(r1: f64, r2: f64) -> f64 {
    PI * (r1 * r1 - r2 * r2).abs()
}

/// Moment of inertia for a thin line segment. Rounded ends are ignored.
pub fn moment_for_segment(mass: f64, a: m::Vec2, b: m::Vec2) -> f64 {
    let length = m::dist(a, b);
    let offset = (a + b) * 0.5;
    mass * (length * length / 12.0 + offset.mag_sq())
}

/// Area of a segment fattened to a capsule with radius `r`.
pub fn area_for_segment(a: m::Vec2, b: m::Vec2, r: f64) -> f64 {
    r * (PI * r + 2.0 * m::dist(a, b))
}

/// Moment of inertia for a solid polygon, with its vertices moved by `offset`.
pub fn moment_for_poly(mass: f64, verts: &[m::Vec2], offset: m::Vec2) -> f64 {
    let mut sum1 = 0.0;
    let mut sum2 = 0.0;
    for (i, &v) in verts.iter().enumerate() {
        let v1 = v + offset;
        let v2 = verts[(i + 1) % verts.len()] + offset;

        let a = m::cross(v2, v1);
        let b = v1.dot(v1) + v1.dot(v2) + v2.dot(v2);

        sum1 += a * b;
        sum2 += a;
    }
    if sum2 == 0.0 {
        return 0.0;
    }
    (mass * sum1) / (6.0 * sum2)
}

/// Signed area of a polygon using the shoelace formula.
/// Positive for counter-clockwise winding.
pub fn area_for_poly(verts: &[m::Vec2]) -> f64 {
    let sum: f64 = verts
        .iter()
        .enumerate()
        .map(|(i, &v)| m::cross(v, verts[(i + 1) % verts.len()]))
        .sum();
    sum / 2.0
}

/// Centroid of a solid polygon.
///
/// Zero-area polygons have no well-defined centroid;
/// the average of the vertices is returned for those instead.
pub fn centroid_for_poly(verts: &[m::Vec2]) -> m::Vec2 {
    let mut sum = 0.0;
    let mut vsum = m::Vec2::zero();
    for (i, &v1) in verts.iter().enumerate() {
        let v2 = verts[(i + 1) % verts.len()];
        let cross = m::cross(v1, v2);
        sum += cross;
        vsum += (v1 + v2) * cross;
    }
    if sum == 0.0 {
        if verts.is_empty() {
            return m::Vec2::zero();
        }
        let total = verts.iter().fold(m::Vec2::zero(), |acc, &v| acc + v);
        return total / verts.len() as f64;
    }
    vsum / (3.0 * sum)
}

/// Move a polygon's vertices so that its centroid is at the origin.
pub fn recenter_poly(verts: &mut [m::Vec2]) {
    let centroid = centroid_for_poly(verts);
    for v in verts {
        *v -= centroid;
    }
}

/// Moment of inertia for a solid box centered on the center of gravity.
pub fn moment_for_box(mass: f64, width: f64, height: f64) -> f64 {
    mass * (width * width + height * height) / 12.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn rect(l: f64, b: f64, r: f64, t: f64) -> Vec<m::Vec2> {
        vec![
            m::Vec2::new(l, b),
            m::Vec2::new(r, b),
            m::Vec2::new(r, t),
            m::Vec2::new(l, t),
        ]
    }

    #[test]
    fn polygon_area_sign_follows_winding() {
        let ccw = rect(0.0, 0.0, 2.0, 3.0);
        assert_abs_diff_eq!(area_for_poly(&ccw), 6.0);
        let cw: Vec<m::Vec2> = ccw.iter().rev().copied().collect();
        assert_abs_diff_eq!(area_for_poly(&cw), -6.0);
    }

    #[test]
    fn recentered_polygon_keeps_area() {
        let mut tri = vec![
            m::Vec2::new(1.0, 1.0),
            m::Vec2::new(4.0, 1.5),
            m::Vec2::new(2.0, 5.0),
        ];
        let area = area_for_poly(&tri);
        let centroid = centroid_for_poly(&tri);
        assert_abs_diff_eq!(centroid.x, 7.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(centroid.y, 7.5 / 3.0, epsilon = 1e-12);

        recenter_poly(&mut tri);
        assert_abs_diff_eq!(area_for_poly(&tri), area, epsilon = 1e-12);
        let new_centroid = centroid_for_poly(&tri);
        assert_abs_diff_eq!(new_centroid.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(new_centroid.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn box_moment_matches_polygon_moment() {
        let verts = rect(-1.0, -0.5, 1.0, 0.5);
        assert_abs_diff_eq!(
            moment_for_poly(3.0, &verts, m::Vec2::zero()),
            moment_for_box(3.0, 2.0, 1.0),
            epsilon = 1e-12
        );
        // parallel axis theorem
        let offset = m::Vec2::new(2.0, 0.0);
        assert_abs_diff_eq!(
            moment_for_poly(3.0, &verts, offset),
            moment_for_box(3.0, 2.0, 1.0) + 3.0 * 4.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn round_shapes() {
        assert_abs_diff_eq!(
            moment_for_circle(2.0, 0.0, 1.0, m::Vec2::zero()),
            1.0
        );
        assert_abs_diff_eq!(
            moment_for_circle(2.0, 0.0, 1.0, m::Vec2::new(0.0, 2.0)),
            9.0
        );
        assert_abs_diff_eq!(area_for_circle(0.0, 2.0), 4.0 * PI);
        assert_abs_diff_eq!(area_for_circle(1.0, 2.0), 3.0 * PI);

        let a = m::Vec2::new(-1.0, 0.0);
        let b = m::Vec2::new(1.0, 0.0);
        assert_abs_diff_eq!(moment_for_segment(3.0, a, b), 1.0);
        assert_abs_diff_eq!(area_for_segment(a, b, 0.5), 0.25 * PI + 2.0);
    }
}
