//! Types, aliases and helper operations for doing math with `ultraviolet`.
use std::f64::consts::PI;
pub use ultraviolet as uv;

/// A Pose has a rotation and a translation, no scaling.
///
/// Bodies store their position and orientation as a Pose.
/// The rotation part is a rotor, which is renormalized after every increment
/// so that integrating many small rotations doesn't drift.
pub type Pose = uv::DIsometry2;
pub type Vec2 = uv::DVec2;
pub type Rotor2 = uv::DRotor2;

/// An angle in either degrees or radians.
/// Default conversion from f64 is in degrees.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum Angle {
    Rad(f64),
    Deg(f64),
}
impl Angle {
    /// Get the angle as degrees.
    #[inline]
    pub fn deg(&self) -> f64 {
        match self {
            Angle::Rad(rad) => rad * 180.0 / PI,
            Angle::Deg(deg) => *deg,
        }
    }

    /// Get the angle as radians.
    #[inline]
    pub fn rad(&self) -> f64 {
        match self {
            Angle::Rad(rad) => *rad,
            Angle::Deg(deg) => deg * PI / 180.0,
        }
    }
}
impl Default for Angle {
    fn default() -> Self {
        Angle::Rad(0.0)
    }
}
impl From<Angle> for Rotor2 {
    #[inline]
    fn from(ang: Angle) -> Rotor2 {
        Rotor2::from_angle(ang.rad())
    }
}
impl From<Rotor2> for Angle {
    #[inline]
    fn from(rotor: Rotor2) -> Self {
        Angle::Rad(-rotor.bv.xy.atan2(rotor.s) * 2.0)
    }
}

/// A wrapper type to indicate a vector should always be normalized.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Unit<T>(T);

impl Unit<Vec2> {
    pub fn new_normalize(v: Vec2) -> Self {
        Unit(v.normalized())
    }

    pub const fn new_unchecked(v: Vec2) -> Self {
        Unit(v)
    }

    pub fn unit_x() -> Self {
        Unit(Vec2::unit_x())
    }

    pub fn unit_y() -> Self {
        Unit(Vec2::unit_y())
    }

    #[inline]
    pub fn into_inner(self) -> Vec2 {
        self.0
    }
}

impl std::ops::Mul<Unit<Vec2>> for Rotor2 {
    type Output = Unit<Vec2>;

    fn mul(self, rhs: Unit<Vec2>) -> Self::Output {
        Unit(self * rhs.0)
    }
}

impl<T> std::ops::Deref for Unit<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> std::ops::Neg for Unit<T>
where
    T: std::ops::Neg,
{
    type Output = Unit<<T as std::ops::Neg>::Output>;

    fn neg(self) -> Self::Output {
        Unit(-self.0)
    }
}

/// A builder to create [`Pose`][self::Pose]s.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct PoseBuilder {
    position: [f64; 2],
    rotation: Angle,
}
impl PoseBuilder {
    pub fn new() -> Self {
        PoseBuilder {
            position: [0.0, 0.0],
            rotation: Angle::default(),
        }
    }
    #[inline]
    pub fn with_position(mut self, pos: impl Into<[f64; 2]>) -> Self {
        self.position = pos.into();
        self
    }
    #[inline]
    pub fn with_rotation(mut self, angle: Angle) -> Self {
        self.rotation = angle;
        self
    }
    #[inline]
    pub fn build(self) -> Pose {
        Pose::new(
            Vec2::new(self.position[0], self.position[1]),
            self.rotation.into(),
        )
    }
}
impl Default for PoseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
impl From<PoseBuilder> for Pose {
    fn from(iso: PoseBuilder) -> Pose {
        iso.build()
    }
}
impl From<[f64; 2]> for PoseBuilder {
    fn from(vec: [f64; 2]) -> Self {
        PoseBuilder::new().with_position(vec)
    }
}
impl From<Vec2> for PoseBuilder {
    fn from(vec: Vec2) -> Self {
        PoseBuilder::new().with_position(vec)
    }
}
impl From<Angle> for PoseBuilder {
    fn from(angle: Angle) -> Self {
        PoseBuilder::new().with_rotation(angle)
    }
}
impl From<Pose> for PoseBuilder {
    fn from(pose: Pose) -> Self {
        PoseBuilder::new()
            .with_position(pose.translation)
            .with_rotation(Angle::from(pose.rotation))
    }
}

/// Module to (de)serialize `Pose`s in `PoseBuilder` format without manually converting,
/// using the serde attribute `#[serde(with = "serde_pose")]`.
#[cfg(feature = "serde-types")]
pub mod serde_pose {
    use super::*;

    pub fn serialize<S>(pose: &Pose, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::Serialize;
        PoseBuilder::from(*pose).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Pose, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::Deserialize;
        PoseBuilder::deserialize(deserializer).map(|p| p.build())
    }
}

// Vec2 utils

#[inline]
pub fn left_normal(v: Vec2) -> Vec2 {
    Vec2::new(-v.y, v.x)
}
#[inline]
pub fn right_normal(v: Vec2) -> Vec2 {
    Vec2::new(v.y, -v.x)
}
#[inline]
pub fn unit_left_normal(u: Unit<Vec2>) -> Unit<Vec2> {
    Unit::new_unchecked(left_normal(*u))
}
#[inline]
pub fn unit_right_normal(u: Unit<Vec2>) -> Unit<Vec2> {
    Unit::new_unchecked(right_normal(*u))
}

/// 2D cross product, i.e. the z component of the 3D cross product.
#[inline]
pub fn cross(a: Vec2, b: Vec2) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Cross product of a scalar (angular quantity) and a vector.
#[inline]
pub fn cross_sv(s: f64, v: Vec2) -> Vec2 {
    s * left_normal(v)
}

/// Unit vector pointing in the direction of the given angle in radians.
#[inline]
pub fn for_angle(rad: f64) -> Vec2 {
    Vec2::new(rad.cos(), rad.sin())
}

/// Angle in radians of the given vector.
#[inline]
pub fn to_angle(v: Vec2) -> f64 {
    v.y.atan2(v.x)
}

/// Rotate `v` by the rotation represented by unit vector `rot` (complex multiplication).
#[inline]
pub fn rotate(v: Vec2, rot: Vec2) -> Vec2 {
    Vec2::new(v.x * rot.x - v.y * rot.y, v.x * rot.y + v.y * rot.x)
}

/// Inverse of [`rotate`][self::rotate].
#[inline]
pub fn unrotate(v: Vec2, rot: Vec2) -> Vec2 {
    Vec2::new(v.x * rot.x + v.y * rot.y, v.y * rot.x - v.x * rot.y)
}

/// Projection of `v` onto `onto`.
#[inline]
pub fn project(v: Vec2, onto: Vec2) -> Vec2 {
    onto * (v.dot(onto) / onto.dot(onto))
}

/// Normalize a vector, leaving the zero vector as zero instead of producing NaNs.
#[inline]
pub fn normalize_safe(v: Vec2) -> Vec2 {
    let mag = v.mag();
    if mag == 0.0 {
        Vec2::zero()
    } else {
        v / mag
    }
}

/// Clamp the length of a vector to at most `len`.
#[inline]
pub fn clamp_mag(v: Vec2, len: f64) -> Vec2 {
    if v.mag_sq() > len * len {
        normalize_safe(v) * len
    } else {
        v
    }
}

#[inline]
pub fn lerp(a: Vec2, b: Vec2, t: f64) -> Vec2 {
    a * (1.0 - t) + b * t
}

#[inline]
pub fn dist(a: Vec2, b: Vec2) -> f64 {
    (a - b).mag()
}

#[inline]
pub fn dist_sq(a: Vec2, b: Vec2) -> f64 {
    (a - b).mag_sq()
}

/// Check whether two points are within `d` of each other.
#[inline]
pub fn near(a: Vec2, b: Vec2, d: f64) -> bool {
    dist_sq(a, b) < d * d
}

/// Closest point to `p` on the line segment from `a` to `b`.
pub fn closest_point_on_segment(p: Vec2, a: Vec2, b: Vec2) -> Vec2 {
    let delta = a - b;
    let len_sq = delta.mag_sq();
    if len_sq == 0.0 {
        return a;
    }
    let t = ((p - b).dot(delta) / len_sq).clamp(0.0, 1.0);
    b + delta * t
}

#[inline]
pub(crate) fn clamp(x: f64, min: f64, max: f64) -> f64 {
    x.max(min).min(max)
}

// pose utils

/// Unit vector form of a pose's rotation, i.e. `(cos a, sin a)`.
#[inline]
pub fn rotation_vector(pose: &Pose) -> Vec2 {
    pose.rotation * Vec2::unit_x()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rotate_matches_rotor() {
        let v = Vec2::new(1.5, -0.5);
        for ang in [0.0, 0.3, PI / 2.0, 2.5, -1.0] {
            let by_rotor = Rotor2::from_angle(ang) * v;
            let by_complex = rotate(v, for_angle(ang));
            assert_abs_diff_eq!(by_rotor.x, by_complex.x, epsilon = 1e-12);
            assert_abs_diff_eq!(by_rotor.y, by_complex.y, epsilon = 1e-12);
            let back = unrotate(by_complex, for_angle(ang));
            assert_abs_diff_eq!(back.x, v.x, epsilon = 1e-12);
            assert_abs_diff_eq!(back.y, v.y, epsilon = 1e-12);
        }
    }

    #[test]
    fn angle_rotor_roundtrip() {
        for ang in [0.0, 0.7, -2.0, 3.0] {
            let rotor: Rotor2 = Angle::Rad(ang).into();
            assert_abs_diff_eq!(Angle::from(rotor).rad(), ang, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(Angle::Deg(180.0).rad(), PI);
    }

    #[test]
    fn vector_helpers() {
        assert_eq!(cross(Vec2::unit_x(), Vec2::unit_y()), 1.0);
        assert_eq!(normalize_safe(Vec2::zero()), Vec2::zero());
        assert_abs_diff_eq!(clamp_mag(Vec2::new(3.0, 4.0), 1.0).mag(), 1.0, epsilon = 1e-12);
        assert_eq!(clamp_mag(Vec2::new(0.3, 0.4), 1.0), Vec2::new(0.3, 0.4));
        assert_eq!(
            closest_point_on_segment(Vec2::new(0.5, 1.0), Vec2::zero(), Vec2::unit_x()),
            Vec2::new(0.5, 0.0)
        );
        assert_eq!(
            closest_point_on_segment(Vec2::new(3.0, 1.0), Vec2::zero(), Vec2::unit_x()),
            Vec2::unit_x()
        );
        // exact floating point equality, no epsilon
        assert_ne!(Vec2::new(0.1 + 0.2, 0.0), Vec2::new(0.3, 0.0));
    }
}
