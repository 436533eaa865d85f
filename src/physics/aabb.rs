use crate::math as m;

/// Axis-aligned bounding box.
///
/// Boxes attached to live shapes always have `min <= max` on both axes.
/// Intersection tests are inclusive at the edges, so boxes that only touch
/// are considered overlapping.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct AABB {
    pub min: m::Vec2,
    pub max: m::Vec2,
}

impl AABB {
    /// Create a box from its edges.
    #[inline]
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            min: m::Vec2::new(left, bottom),
            max: m::Vec2::new(right, top),
        }
    }

    /// A box around a circle.
    #[inline]
    pub fn for_circle(center: m::Vec2, radius: f64) -> Self {
        Self::new(
            center.x - radius,
            center.y - radius,
            center.x + radius,
            center.y + radius,
        )
    }

    /// The smallest box that contains both given points.
    #[inline]
    pub fn from_points(p1: m::Vec2, p2: m::Vec2) -> Self {
        Self {
            min: p1.min_by_component(p2),
            max: p1.max_by_component(p2),
        }
    }

    #[inline]
    pub fn zero() -> Self {
        Self {
            min: m::Vec2::zero(),
            max: m::Vec2::zero(),
        }
    }

    #[inline]
    pub fn left(&self) -> f64 {
        self.min.x
    }
    #[inline]
    pub fn bottom(&self) -> f64 {
        self.min.y
    }
    #[inline]
    pub fn right(&self) -> f64 {
        self.max.x
    }
    #[inline]
    pub fn top(&self) -> f64 {
        self.max.y
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn center(&self) -> m::Vec2 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Whether the box satisfies `min <= max` with finite values.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.x.is_finite()
            && self.min.y.is_finite()
            && self.max.x.is_finite()
            && self.max.y.is_finite()
            && self.min.x <= self.max.x
            && self.min.y <= self.max.y
    }

    /// Check whether two boxes overlap. Touching edges count as overlapping.
    #[inline]
    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    /// The overlapping region of two boxes, if there is one.
    pub fn intersection(&self, other: &AABB) -> Option<AABB> {
        if self.intersects(other) {
            Some(AABB {
                min: self.min.max_by_component(other.min),
                max: self.max.min_by_component(other.max),
            })
        } else {
            None
        }
    }

    /// Check whether `other` lies completely within this box.
    #[inline]
    pub fn contains(&self, other: &AABB) -> bool {
        self.min.x <= other.min.x
            && self.max.x >= other.max.x
            && self.min.y <= other.min.y
            && self.max.y >= other.max.y
    }

    #[inline]
    pub fn contains_point(&self, point: m::Vec2) -> bool {
        self.min.x <= point.x
            && self.max.x >= point.x
            && self.min.y <= point.y
            && self.max.y >= point.y
    }

    /// The union of two boxes.
    #[inline]
    pub fn merged(&self, other: &AABB) -> AABB {
        AABB {
            min: self.min.min_by_component(other.min),
            max: self.max.max_by_component(other.max),
        }
    }

    /// Area of the union of two boxes.
    #[inline]
    pub fn merged_area(&self, other: &AABB) -> f64 {
        self.merged(other).area()
    }

    /// Grow the box to contain the given point.
    #[inline]
    pub fn expanded_to(&self, point: m::Vec2) -> AABB {
        AABB {
            min: self.min.min_by_component(point),
            max: self.max.max_by_component(point),
        }
    }

    /// Grow the box by `amount` on every side.
    #[inline]
    pub fn padded(&self, amount: f64) -> AABB {
        let pad = m::Vec2::new(amount, amount);
        AABB {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Grow the box in the direction of `offset`, covering where it would be
    /// after being moved by that offset.
    #[inline]
    pub fn swept(&self, offset: m::Vec2) -> AABB {
        self.merged(&AABB {
            min: self.min + offset,
            max: self.max + offset,
        })
    }

    /// Closest point to `point` inside the box.
    #[inline]
    pub fn clamp_point(&self, point: m::Vec2) -> m::Vec2 {
        m::Vec2::new(
            m::clamp(point.x, self.min.x, self.max.x),
            m::clamp(point.y, self.min.y, self.max.y),
        )
    }

    /// Wrap a point toroidally into the box.
    pub fn wrap_point(&self, point: m::Vec2) -> m::Vec2 {
        let w = self.width();
        let h = self.height();
        let x = if w > 0.0 {
            self.min.x + (point.x - self.min.x).rem_euclid(w)
        } else {
            self.min.x
        };
        let y = if h > 0.0 {
            self.min.y + (point.y - self.min.y).rem_euclid(h)
        } else {
            self.min.y
        };
        m::Vec2::new(x, y)
    }

    /// Check whether the line segment from `a` to `b` passes through the box.
    pub fn intersects_segment(&self, a: m::Vec2, b: m::Vec2) -> bool {
        // slab test over the parametric segment a + t(b - a), t in [0, 1]
        let dir = b - a;
        let mut t_min: f64 = 0.0;
        let mut t_max: f64 = 1.0;
        for (start, d, lo, hi) in [
            (a.x, dir.x, self.min.x, self.max.x),
            (a.y, dir.y, self.min.y, self.max.y),
        ] {
            if d == 0.0 {
                if start < lo || start > hi {
                    return false;
                }
            } else {
                let t1 = (lo - start) / d;
                let t2 = (hi - start) / d;
                t_min = t_min.max(t1.min(t2));
                t_max = t_max.min(t1.max(t2));
                if t_min > t_max {
                    return false;
                }
            }
        }
        true
    }
}

impl Default for AABB {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_are_inclusive() {
        let a = AABB::new(0.0, 0.0, 1.0, 1.0);
        let b = AABB::new(1.0, 0.0, 2.0, 1.0);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(a.contains_point(m::Vec2::new(1.0, 1.0)));
        let c = AABB::new(1.0 + 1e-9, 0.0, 2.0, 1.0);
        assert!(!a.intersects(&c));
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn merge_is_union() {
        let a = AABB::new(0.0, 0.0, 1.0, 1.0);
        let b = AABB::new(-1.0, 0.5, 0.5, 3.0);
        let merged = a.merged(&b);
        assert_eq!(merged, AABB::new(-1.0, 0.0, 1.0, 3.0));
        assert!(merged.contains(&a));
        assert!(merged.contains(&b));
        assert_eq!(a.merged_area(&b), 6.0);
        assert_eq!(
            a.expanded_to(m::Vec2::new(2.0, -1.0)),
            AABB::new(0.0, -1.0, 2.0, 1.0)
        );
    }

    #[test]
    fn segment_slabs() {
        let a = AABB::new(0.0, 0.0, 1.0, 1.0);
        assert!(a.intersects_segment(m::Vec2::new(-1.0, 0.5), m::Vec2::new(2.0, 0.5)));
        assert!(!a.intersects_segment(m::Vec2::new(-1.0, 2.0), m::Vec2::new(2.0, 2.0)));
        assert!(!a.intersects_segment(m::Vec2::new(-3.0, 0.5), m::Vec2::new(-2.0, 0.5)));
        // vertical segment inside
        assert!(a.intersects_segment(m::Vec2::new(0.5, -1.0), m::Vec2::new(0.5, 0.2)));
    }

    #[test]
    fn clamp_and_wrap() {
        let a = AABB::new(0.0, 0.0, 2.0, 2.0);
        assert_eq!(a.clamp_point(m::Vec2::new(3.0, -1.0)), m::Vec2::new(2.0, 0.0));
        assert_eq!(a.wrap_point(m::Vec2::new(3.0, -1.0)), m::Vec2::new(1.0, 1.0));
        assert!(!AABB::new(1.0, 0.0, 0.0, 1.0).is_valid());
    }
}
