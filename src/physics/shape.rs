//! Geometric shapes attached to bodies, and queries against them.

use super::{mass, AABB};
use crate::math as m;

/// Reasons a shape can't be created from the given geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("a polygon needs at least 3 vertices")]
    TooFewVertices,
    #[error("polygon is not convex or has repeated vertices")]
    NotConvex,
    #[error("polygon has zero area")]
    ZeroArea,
    #[error("polygon vertices are in clockwise order, they must be counter-clockwise")]
    Clockwise,
    #[error("radius must be positive for circles and non-negative for segments")]
    InvalidRadius,
    #[error("shape geometry contains NaN or infinite values")]
    NonFinite,
}

/// Determines how the surface of a shape responds to collisions.
///
/// The coefficients of two colliding shapes are multiplied together.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct Material {
    /// Restitution coefficient. 0 is perfectly inelastic, 1 perfectly elastic.
    pub elasticity: f64,
    /// Coulomb friction coefficient.
    pub friction: f64,
    /// Velocity of the surface itself, used for conveyor belts and the like.
    /// Only affects friction.
    pub surface_velocity: m::Vec2,
}

impl Default for Material {
    fn default() -> Self {
        Material {
            elasticity: 0.0,
            friction: 0.0,
            surface_velocity: m::Vec2::zero(),
        }
    }
}

/// A face of a polygon as a half-plane: points `p` with `n.dot(p) <= d` are inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Axis {
    pub n: m::Vec2,
    pub d: f64,
}

/// A convex polygon with counter-clockwise winding.
///
/// Axis `i` is the face from vertex `i` to vertex `i + 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    pub(crate) verts: Vec<m::Vec2>,
    pub(crate) axes: Vec<Axis>,
}

impl Polygon {
    /// Check the vertices and precompute face normals.
    pub fn new(verts: &[m::Vec2]) -> Result<Self, ShapeError> {
        if verts.iter().any(|v| !v.x.is_finite() || !v.y.is_finite()) {
            return Err(ShapeError::NonFinite);
        }
        if verts.len() < 3 {
            return Err(ShapeError::TooFewVertices);
        }
        let area = mass::area_for_poly(verts);
        if area == 0.0 {
            return Err(ShapeError::ZeroArea);
        }
        if area < 0.0 {
            return Err(ShapeError::Clockwise);
        }
        let n = verts.len();
        for i in 0..n {
            let a = verts[i];
            let b = verts[(i + 1) % n];
            let c = verts[(i + 2) % n];
            if m::cross(b - a, c - b) <= 0.0 {
                return Err(ShapeError::NotConvex);
            }
        }

        let verts = verts.to_vec();
        let axes = Self::compute_axes(&verts);
        Ok(Polygon { verts, axes })
    }

    fn compute_axes(verts: &[m::Vec2]) -> Vec<Axis> {
        (0..verts.len())
            .map(|i| {
                let a = verts[i];
                let b = verts[(i + 1) % verts.len()];
                let n = m::right_normal(b - a).normalized();
                Axis { n, d: n.dot(a) }
            })
            .collect()
    }

    #[inline]
    pub fn verts(&self) -> &[m::Vec2] {
        &self.verts
    }

    #[inline]
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Smallest projection of the polygon onto `n`, minus `d`.
    pub(crate) fn value_on_axis(&self, n: m::Vec2, d: f64) -> f64 {
        self.verts
            .iter()
            .map(|v| n.dot(*v))
            .fold(f64::INFINITY, f64::min)
            - d
    }

    /// Whether a point is inside the polygon or on its boundary.
    pub fn contains_point(&self, p: m::Vec2) -> bool {
        self.contains_point_within(p, 0.0)
    }

    /// Whether a point is inside the polygon grown by `slack` along every face normal.
    pub fn contains_point_within(&self, p: m::Vec2, slack: f64) -> bool {
        self.axes.iter().all(|ax| ax.n.dot(p) - ax.d <= slack)
    }

    fn transform(&self, pose: &m::Pose, out: &mut Polygon) {
        out.verts.clear();
        out.verts.extend(self.verts.iter().map(|v| *pose * *v));
        out.axes.clear();
        out.axes.extend(self.axes.iter().map(|ax| {
            let n = pose.rotation * ax.n;
            Axis {
                n,
                d: n.dot(pose.translation) + ax.d,
            }
        }));
    }
}

/// The geometry of a shape.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeKind {
    Circle {
        offset: m::Vec2,
        radius: f64,
    },
    /// A line segment with rounded ends of the given radius, i.e. a capsule.
    Segment {
        a: m::Vec2,
        b: m::Vec2,
        radius: f64,
    },
    Poly(Polygon),
}

/// A shape is geometry attached to a body, plus the properties that decide
/// what it collides with and how.
///
/// All geometry is given in the body's local coordinates.
/// A copy transformed to world space is kept up to date by the [`Space`][super::Space]
/// before every step and whenever shapes are reindexed.
#[derive(Clone, Debug)]
pub struct Shape {
    kind: ShapeKind,
    world: ShapeKind,
    aabb: AABB,
    pub material: Material,
    /// Sensors call collision handlers but never generate collision responses.
    pub sensor: bool,
    /// User-defined type used to pick a [`CollisionHandler`][super::CollisionHandler].
    pub collision_type: u32,
    /// Shapes in the same non-zero group don't collide.
    pub group: u32,
    /// Shapes only collide if they share at least one layer bit.
    pub layers: u32,
    /// Arbitrary data for the user to associate the shape with their own things.
    pub user_data: u64,
}

/// Layer mask that collides with every other layer.
pub const ALL_LAYERS: u32 = !0;

impl Shape {
    fn from_kind(kind: ShapeKind) -> Self {
        Shape {
            world: kind.clone(),
            kind,
            aabb: AABB::zero(),
            material: Material::default(),
            sensor: false,
            collision_type: 0,
            group: 0,
            layers: ALL_LAYERS,
            user_data: 0,
        }
    }

    /// A circle with its center at `offset` from the body's center of gravity.
    pub fn circle(radius: f64, offset: m::Vec2) -> Result<Self, ShapeError> {
        if !radius.is_finite() || !offset.x.is_finite() || !offset.y.is_finite() {
            return Err(ShapeError::NonFinite);
        }
        if radius <= 0.0 {
            return Err(ShapeError::InvalidRadius);
        }
        Ok(Self::from_kind(ShapeKind::Circle { offset, radius }))
    }

    /// A line segment from `a` to `b` thickened by `radius`.
    pub fn segment(a: m::Vec2, b: m::Vec2, radius: f64) -> Result<Self, ShapeError> {
        if [a.x, a.y, b.x, b.y, radius].iter().any(|x| !x.is_finite()) {
            return Err(ShapeError::NonFinite);
        }
        if radius < 0.0 {
            return Err(ShapeError::InvalidRadius);
        }
        Ok(Self::from_kind(ShapeKind::Segment { a, b, radius }))
    }

    /// A convex polygon with counter-clockwise vertices, each moved by `offset`.
    pub fn poly(verts: &[m::Vec2], offset: m::Vec2) -> Result<Self, ShapeError> {
        let moved: Vec<m::Vec2> = verts.iter().map(|v| *v + offset).collect();
        Ok(Self::from_kind(ShapeKind::Poly(Polygon::new(&moved)?)))
    }

    /// A rectangle centered on the body's center of gravity.
    pub fn new_box(width: f64, height: f64) -> Result<Self, ShapeError> {
        let hw = width / 2.0;
        let hh = height / 2.0;
        Self::poly(
            &[
                m::Vec2::new(-hw, -hh),
                m::Vec2::new(hw, -hh),
                m::Vec2::new(hw, hh),
                m::Vec2::new(-hw, hh),
            ],
            m::Vec2::zero(),
        )
    }

    //
    // builder-style setters
    //

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_elasticity(mut self, elasticity: f64) -> Self {
        self.material.elasticity = elasticity;
        self
    }

    pub fn with_friction(mut self, friction: f64) -> Self {
        self.material.friction = friction;
        self
    }

    pub fn with_surface_velocity(mut self, surface_velocity: m::Vec2) -> Self {
        self.material.surface_velocity = surface_velocity;
        self
    }

    pub fn with_collision_type(mut self, collision_type: u32) -> Self {
        self.collision_type = collision_type;
        self
    }

    pub fn with_group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers;
        self
    }

    pub fn as_sensor(mut self) -> Self {
        self.sensor = true;
        self
    }

    //
    // accessors
    //

    /// Geometry in body-local coordinates.
    #[inline]
    pub fn kind(&self) -> &ShapeKind {
        &self.kind
    }

    /// Geometry in world coordinates as of the last update.
    #[inline]
    pub fn world(&self) -> &ShapeKind {
        &self.world
    }

    /// World-space bounding box as of the last update.
    #[inline]
    pub fn aabb(&self) -> AABB {
        self.aabb
    }

    /// Area of the shape's geometry.
    pub fn area(&self) -> f64 {
        match &self.kind {
            ShapeKind::Circle { radius, .. } => mass::area_for_circle(0.0, *radius),
            ShapeKind::Segment { a, b, radius } => mass::area_for_segment(*a, *b, *radius),
            ShapeKind::Poly(poly) => mass::area_for_poly(&poly.verts),
        }
    }

    /// Moment of inertia of the shape about the body's center of gravity,
    /// if it had the given mass.
    pub fn moment(&self, mass: f64) -> f64 {
        match &self.kind {
            ShapeKind::Circle { offset, radius } => {
                mass::moment_for_circle(mass, 0.0, *radius, *offset)
            }
            ShapeKind::Segment { a, b, .. } => mass::moment_for_segment(mass, *a, *b),
            ShapeKind::Poly(poly) => mass::moment_for_poly(mass, &poly.verts, m::Vec2::zero()),
        }
    }

    /// Recompute world-space geometry and bounding box from the pose of the owning body.
    pub fn update(&mut self, pose: &m::Pose) -> AABB {
        self.aabb = match &self.kind {
            ShapeKind::Circle { offset, radius } => {
                let center = *pose * *offset;
                self.world = ShapeKind::Circle {
                    offset: center,
                    radius: *radius,
                };
                AABB::for_circle(center, *radius)
            }
            ShapeKind::Segment { a, b, radius } => {
                let (a, b) = (*pose * *a, *pose * *b);
                self.world = ShapeKind::Segment {
                    a,
                    b,
                    radius: *radius,
                };
                AABB::from_points(a, b).padded(*radius)
            }
            ShapeKind::Poly(poly) => {
                // reuse the vertex buffers of the previous update
                if !matches!(self.world, ShapeKind::Poly(_)) {
                    self.world = ShapeKind::Poly(poly.clone());
                }
                match &mut self.world {
                    ShapeKind::Poly(w_poly) => {
                        poly.transform(pose, w_poly);
                        let first = w_poly.verts[0];
                        w_poly
                            .verts
                            .iter()
                            .fold(AABB::from_points(first, first), |bb, v| bb.expanded_to(*v))
                    }
                    _ => self.aabb,
                }
            }
        };
        self.aabb
    }

    //
    // queries
    //

    /// Check whether a point in world coordinates is inside the shape or on its surface.
    pub fn point_query(&self, point: m::Vec2) -> bool {
        self.aabb.contains_point(point) && self.nearest_point_query(point).dist <= 0.0
    }

    /// Find the point on the shape's surface closest to the given point,
    /// and the signed distance to it (negative if the point is inside the shape).
    pub fn nearest_point_query(&self, point: m::Vec2) -> NearestPointInfo {
        match &self.world {
            ShapeKind::Circle { offset, radius } => nearest_on_circle(point, *offset, *radius),
            ShapeKind::Segment { a, b, radius } => {
                let closest = m::closest_point_on_segment(point, *a, *b);
                nearest_on_circle(point, closest, *radius)
            }
            ShapeKind::Poly(poly) => {
                let n = poly.verts.len();
                let mut outside = false;
                let mut min_dist = f64::INFINITY;
                let mut closest = point;
                for i in 0..n {
                    if poly.axes[i].n.dot(point) - poly.axes[i].d > 0.0 {
                        outside = true;
                    }
                    let on_edge =
                        m::closest_point_on_segment(point, poly.verts[i], poly.verts[(i + 1) % n]);
                    let dist = m::dist(point, on_edge);
                    if dist < min_dist {
                        min_dist = dist;
                        closest = on_edge;
                    }
                }
                NearestPointInfo {
                    point: closest,
                    dist: if outside { min_dist } else { -min_dist },
                }
            }
        }
    }

    /// Find where the line segment from `a` to `b` in world coordinates first hits the shape.
    ///
    /// Segments starting inside the shape don't hit the surface they start inside of.
    pub fn segment_query(&self, a: m::Vec2, b: m::Vec2) -> Option<SegmentQueryInfo> {
        match &self.world {
            ShapeKind::Circle { offset, radius } => circle_segment_query(*offset, *radius, a, b),
            ShapeKind::Segment {
                a: seg_a,
                b: seg_b,
                radius,
            } => capsule_segment_query(*seg_a, *seg_b, *radius, a, b),
            ShapeKind::Poly(poly) => poly_segment_query(poly, a, b),
        }
    }
}

/// Result of a nearest point query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NearestPointInfo {
    /// Closest point on the shape's surface.
    pub point: m::Vec2,
    /// Distance to the point, negative if inside the shape.
    pub dist: f64,
}

/// Result of a segment query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentQueryInfo {
    /// Fraction along the segment where the hit happened, between 0 and 1.
    pub t: f64,
    /// Surface normal at the hit point.
    pub normal: m::Vec2,
}

impl SegmentQueryInfo {
    /// The point where the queried segment from `a` to `b` hit.
    #[inline]
    pub fn hit_point(&self, a: m::Vec2, b: m::Vec2) -> m::Vec2 {
        m::lerp(a, b, self.t)
    }

    /// Distance along the queried segment from `a` to `b` to the hit.
    #[inline]
    pub fn hit_dist(&self, a: m::Vec2, b: m::Vec2) -> f64 {
        m::dist(a, b) * self.t
    }
}

fn nearest_on_circle(point: m::Vec2, center: m::Vec2, radius: f64) -> NearestPointInfo {
    let delta = point - center;
    let d = delta.mag();
    let dir = if d > 0.0 { delta / d } else { m::Vec2::unit_x() };
    NearestPointInfo {
        point: center + dir * radius,
        dist: d - radius,
    }
}

fn circle_segment_query(
    center: m::Vec2,
    radius: f64,
    a: m::Vec2,
    b: m::Vec2,
) -> Option<SegmentQueryInfo> {
    // solve |a + t(b - a) - center| = r for the smaller t
    let a = a - center;
    let b = b - center;
    let qa = a.dot(a) - 2.0 * a.dot(b) + b.dot(b);
    let qb = -2.0 * a.dot(a) + 2.0 * a.dot(b);
    let qc = a.dot(a) - radius * radius;
    if qa == 0.0 {
        return None;
    }
    let det = qb * qb - 4.0 * qa * qc;
    if det < 0.0 {
        return None;
    }
    let t = (-qb - det.sqrt()) / (2.0 * qa);
    if (0.0..=1.0).contains(&t) {
        Some(SegmentQueryInfo {
            t,
            normal: m::normalize_safe(m::lerp(a, b, t)),
        })
    } else {
        None
    }
}

fn capsule_segment_query(
    seg_a: m::Vec2,
    seg_b: m::Vec2,
    radius: f64,
    a: m::Vec2,
    b: m::Vec2,
) -> Option<SegmentQueryInfo> {
    let seg_dir = seg_b - seg_a;
    let mut best: Option<SegmentQueryInfo> = None;
    let mut consider = |hit: Option<SegmentQueryInfo>| {
        if let Some(hit) = hit {
            if best.map_or(true, |b| hit.t < b.t) {
                best = Some(hit);
            }
        }
    };

    let len_sq = seg_dir.mag_sq();
    if len_sq > 0.0 {
        // flat sides, with the normal facing the query start
        let mut n = m::left_normal(seg_dir).normalized();
        if a.dot(n) < seg_a.dot(n) {
            n = -n;
        }
        let an = a.dot(n);
        let bn = b.dot(n);
        if an != bn {
            let d = seg_a.dot(n) + radius;
            let t = (d - an) / (bn - an);
            if t > 0.0 && t < 1.0 {
                let point = m::lerp(a, b, t);
                let along = (point - seg_a).dot(seg_dir) / len_sq;
                if (0.0..=1.0).contains(&along) {
                    consider(Some(SegmentQueryInfo { t, normal: n }));
                }
            }
        }
    }
    // rounded ends
    if radius > 0.0 {
        consider(circle_segment_query(seg_a, radius, a, b));
        consider(circle_segment_query(seg_b, radius, a, b));
    }
    best
}

fn poly_segment_query(poly: &Polygon, a: m::Vec2, b: m::Vec2) -> Option<SegmentQueryInfo> {
    let n = poly.verts.len();
    let mut best: Option<SegmentQueryInfo> = None;
    for i in 0..n {
        let axis = poly.axes[i];
        let an = axis.n.dot(a);
        // starts behind this face
        if axis.d > an {
            continue;
        }
        let bn = axis.n.dot(b);
        if an == bn {
            continue;
        }
        let t = (axis.d - an) / (bn - an);
        if !(0.0..=1.0).contains(&t) {
            continue;
        }
        let point = m::lerp(a, b, t);
        let v0 = poly.verts[i];
        let edge = poly.verts[(i + 1) % n] - v0;
        let along = (point - v0).dot(edge) / edge.mag_sq();
        if (0.0..=1.0).contains(&along) && best.map_or(true, |b| t < b.t) {
            best = Some(SegmentQueryInfo { t, normal: axis.n });
        }
    }
    best
}
