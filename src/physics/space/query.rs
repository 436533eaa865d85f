//! Spatial queries against the shapes of a space.
//!
//! Queries use the shape positions from the end of the last step
//! (or from when the shape was added / rehashed, for static shapes).

use super::Space;
use crate::{
    math as m,
    physics::{
        shape::{NearestPointInfo, SegmentQueryInfo, ALL_LAYERS},
        Shape, ShapeKey, AABB,
    },
};

/// Restricts which shapes a query can find.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryFilter {
    /// Only shapes sharing at least one layer bit with this are found.
    pub layers: u32,
    /// Shapes in this group are skipped. Zero means no group.
    pub group: u32,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            layers: ALL_LAYERS,
            group: 0,
        }
    }
}

impl QueryFilter {
    #[inline]
    pub fn accepts(&self, shape: &Shape) -> bool {
        shape.layers & self.layers != 0 && (self.group == 0 || shape.group != self.group)
    }
}

impl Space {
    /// Call a function on every shape in the space whose bounding box overlaps the given one,
    /// static shapes first.
    fn visit_hashes(&self, aabb: AABB, mut f: impl FnMut(ShapeKey, &Shape)) {
        let entities = &self.entities;
        let mut visit = |key: ShapeKey| {
            if let Some(shape) = entities.get_shape(key) {
                f(key, shape);
            }
        };
        self.static_hash.query(aabb, &mut visit);
        self.active_hash.query(aabb, &mut visit);
    }

    /// Call a function on every shape containing the given point.
    pub fn point_query(
        &self,
        point: m::Vec2,
        filter: QueryFilter,
        mut f: impl FnMut(ShapeKey, &Shape),
    ) {
        let _span = tracy_span!("point query", "point_query");
        self.visit_hashes(AABB::from_points(point, point), |key, shape| {
            if filter.accepts(shape) && shape.point_query(point) {
                f(key, shape);
            }
        });
    }

    /// Find a shape containing the given point, preferring non-sensors.
    pub fn point_query_first(&self, point: m::Vec2, filter: QueryFilter) -> Option<ShapeKey> {
        let mut found: Option<(ShapeKey, bool)> = None;
        self.point_query(point, filter, |key, shape| match found {
            Some((_, false)) => {}
            _ if !shape.sensor => found = Some((key, false)),
            None => found = Some((key, true)),
            _ => {}
        });
        found.map(|(key, _)| key)
    }

    /// Call a function on every shape within `max_dist` of the given point,
    /// along with the closest point on its surface.
    pub fn nearest_point_query(
        &self,
        point: m::Vec2,
        max_dist: f64,
        filter: QueryFilter,
        mut f: impl FnMut(ShapeKey, &Shape, NearestPointInfo),
    ) {
        let _span = tracy_span!("nearest point query", "nearest_point_query");
        self.visit_hashes(AABB::for_circle(point, max_dist), |key, shape| {
            if !filter.accepts(shape) {
                return;
            }
            let info = shape.nearest_point_query(point);
            if info.dist <= max_dist {
                f(key, shape, info);
            }
        });
    }

    /// The shape closest to the given point within `max_dist`, if any.
    /// Sensors are ignored.
    pub fn nearest_point_query_nearest(
        &self,
        point: m::Vec2,
        max_dist: f64,
        filter: QueryFilter,
    ) -> Option<(ShapeKey, NearestPointInfo)> {
        let mut nearest: Option<(ShapeKey, NearestPointInfo)> = None;
        self.nearest_point_query(point, max_dist, filter, |key, shape, info| {
            if shape.sensor {
                return;
            }
            if nearest.map_or(true, |(_, best)| info.dist < best.dist) {
                nearest = Some((key, info));
            }
        });
        nearest
    }

    /// Call a function on every shape the line segment from `a` to `b` hits.
    pub fn segment_query(
        &self,
        a: m::Vec2,
        b: m::Vec2,
        filter: QueryFilter,
        mut f: impl FnMut(ShapeKey, &Shape, SegmentQueryInfo),
    ) {
        let _span = tracy_span!("segment query", "segment_query");
        let entities = &self.entities;
        let mut visit = |key: ShapeKey| {
            if let Some(shape) = entities.get_shape(key) {
                if filter.accepts(shape) {
                    if let Some(info) = shape.segment_query(a, b) {
                        f(key, shape, info);
                    }
                }
            }
            // keep walking the whole segment
            1.0
        };
        self.static_hash.segment_query(a, b, &mut visit);
        self.active_hash.segment_query(a, b, &mut visit);
    }

    /// The first shape the line segment from `a` to `b` hits, if any. Sensors are ignored.
    pub fn segment_query_first(
        &self,
        a: m::Vec2,
        b: m::Vec2,
        filter: QueryFilter,
    ) -> Option<(ShapeKey, SegmentQueryInfo)> {
        let _span = tracy_span!("segment query", "segment_query_first");
        let entities = &self.entities;
        let mut first: Option<(ShapeKey, SegmentQueryInfo)> = None;
        let mut visit = |key: ShapeKey| {
            let hit = entities
                .get_shape(key)
                .filter(|shape| !shape.sensor && filter.accepts(shape))
                .and_then(|shape| shape.segment_query(a, b));
            if let Some(info) = hit {
                if first.map_or(true, |(_, best)| info.t < best.t) {
                    first = Some((key, info));
                }
            }
            // cells past the closest hit so far can't contain anything closer
            first.map_or(1.0, |(_, best)| best.t)
        };
        self.static_hash.segment_query(a, b, &mut visit);
        self.active_hash.segment_query(a, b, &mut visit);
        first
    }

    /// Call a function on every shape whose bounding box overlaps the given one.
    pub fn bb_query(&self, aabb: AABB, filter: QueryFilter, mut f: impl FnMut(ShapeKey, &Shape)) {
        let _span = tracy_span!("bounding box query", "bb_query");
        self.visit_hashes(aabb, |key, shape| {
            if filter.accepts(shape) && shape.aabb().intersects(&aabb) {
                f(key, shape);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{Body, SpaceParams};
    use approx::assert_abs_diff_eq;

    fn scene() -> (Space, ShapeKey, ShapeKey, ShapeKey) {
        let mut space = Space::new(SpaceParams::default()).expect("valid params");
        let static_body = space.static_body();
        let wall = space
            .add_shape(
                static_body,
                Shape::segment(m::Vec2::new(5.0, -5.0), m::Vec2::new(5.0, 5.0), 0.0)
                    .expect("valid segment"),
            )
            .expect("valid shape");
        let body = space
            .add_body(Body::new(1.0, 1.0).with_pose([2.0, 0.0]))
            .expect("valid body");
        let ball = space
            .add_shape(
                body,
                Shape::circle(1.0, m::Vec2::zero())
                    .expect("valid circle")
                    .with_layers(0b10),
            )
            .expect("valid shape");
        let sensor = space
            .add_shape(
                static_body,
                Shape::new_box(2.0, 2.0).expect("valid box").as_sensor(),
            )
            .expect("valid shape");
        (space, wall, ball, sensor)
    }

    #[test]
    fn point_queries() {
        let (space, _, ball, sensor) = scene();
        let mut found = Vec::new();
        space.point_query(m::Vec2::new(2.5, 0.0), QueryFilter::default(), |k, _| {
            found.push(k)
        });
        assert_eq!(found, vec![ball]);

        let layer_1 = QueryFilter {
            layers: 0b01,
            group: 0,
        };
        assert_eq!(space.point_query_first(m::Vec2::new(2.5, 0.0), layer_1), None);
        // sensors are found if there's nothing else
        assert_eq!(
            space.point_query_first(m::Vec2::new(0.5, 0.5), QueryFilter::default()),
            Some(sensor)
        );
    }

    #[test]
    fn nearest_point() {
        let (space, wall, ball, _) = scene();
        let (key, info) = space
            .nearest_point_query_nearest(m::Vec2::new(4.0, 0.0), 2.0, QueryFilter::default())
            .expect("something nearby");
        // the ball's surface at x = 3 and the wall at x = 5 are equally far
        assert!(key == wall || key == ball);
        assert_abs_diff_eq!(info.dist, 1.0, epsilon = 1e-12);

        let mut count = 0;
        space.nearest_point_query(m::Vec2::new(4.0, 0.0), 0.5, QueryFilter::default(), |_, _, _| {
            count += 1
        });
        assert_eq!(count, 0);
    }

    #[test]
    fn segment_queries() {
        let (space, wall, ball, _) = scene();
        let (key, info) = space
            .segment_query_first(m::Vec2::new(0.0, 0.0), m::Vec2::new(10.0, 0.0), QueryFilter::default())
            .expect("hits the ball");
        assert_eq!(key, ball);
        assert_abs_diff_eq!(info.t, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(info.normal.x, -1.0, epsilon = 1e-12);

        let mut hits = Vec::new();
        space.segment_query(
            m::Vec2::new(0.0, 2.0),
            m::Vec2::new(10.0, 2.0),
            QueryFilter::default(),
            |k, _, info| hits.push((k, info.t)),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, wall);
        assert_abs_diff_eq!(hits[0].1, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn bb_query_finds_overlapping_boxes() {
        let (space, wall, ball, sensor) = scene();
        let mut found = Vec::new();
        space.bb_query(AABB::new(2.5, -0.5, 6.0, 0.5), QueryFilter::default(), |k, _| {
            found.push(k)
        });
        found.sort_by_key(|k| k.index().to_bits());
        let mut expected = vec![wall, ball];
        expected.sort_by_key(|k| k.index().to_bits());
        assert_eq!(found, expected);
        assert!(!found.contains(&sensor));
    }

    #[test]
    fn queries_can_nest() {
        let (space, wall, ball, _) = scene();
        let mut found = Vec::new();
        space.bb_query(AABB::new(2.5, -0.5, 6.0, 0.5), QueryFilter::default(), |outer, _| {
            let first = space
                .segment_query_first(m::Vec2::zero(), m::Vec2::new(10.0, 0.0), QueryFilter::default())
                .map(|(key, _)| key);
            found.push((outer, first));
        });
        found.sort_by_key(|(k, _)| k.index().to_bits());
        let mut expected = vec![(wall, Some(ball)), (ball, Some(ball))];
        expected.sort_by_key(|(k, _)| k.index().to_bits());
        assert_eq!(found, expected);
    }
}
