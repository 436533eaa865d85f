//! Rigid body physics: bodies, shapes, collision detection and a sequential impulse solver.
//!
//! Everything lives in a [`Space`][self::Space]. Each call to [`Space::step`] runs
//! the broad phase over two spatial hashes (one for static shapes, one for the rest),
//! computes contacts for overlapping pairs into persistent [`Arbiter`][self::Arbiter]s,
//! solves contacts and [`Constraint`][self::Constraint]s with a fixed number of iterations
//! and finally moves the bodies.

use crate::math as m;

pub mod aabb;
pub use aabb::AABB;

pub mod arbiter;
pub use arbiter::{Arbiter, ArbiterState};

pub mod body;
pub use body::{Body, BodyType, Mass};

pub mod collision;
pub use collision::{Contact, ContactResult};

pub mod constraint;
pub use constraint::{
    Constraint, ConstraintKind, DampedRotarySpring, DampedSpring, GearJoint, GrooveJoint,
    PinJoint, PivotJoint, RatchetJoint, RotaryLimitJoint, SimpleMotor, SlideJoint,
};

mod constraint_set;
pub use constraint_set::{ConstraintKey, ConstraintSet};

mod entity_set;
pub use entity_set::{BodyKey, EntitySet, ShapeKey};

pub mod handler;
pub use handler::{CollisionHandler, HandlerRegistry};

pub mod hash_set;

pub mod mass;

pub mod shape;
pub use shape::{Material, Shape, ShapeError, ShapeKind, ALL_LAYERS};

pub mod spatial_hash;
pub use spatial_hash::SpatialHashParams;

mod space;
pub use space::{QueryFilter, Space, SpaceError, SpaceParams};

/// Velocity of a body.
///
// Equivalent to a Vec3 but with names for the translational and rotational part.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Velocity {
    /// Linear velocity in metres per second.
    pub linear: m::Vec2,
    /// Angular velocity in radians per second.
    pub angular: f64,
}

impl Velocity {
    /// Get the linear velocity of a point offset from the center of mass.
    #[inline]
    pub fn point_velocity(&self, offset: m::Vec2) -> m::Vec2 {
        let tangent = m::left_normal(offset) * self.angular;
        self.linear + tangent
    }
}

impl std::ops::Add for Velocity {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            linear: self.linear + other.linear,
            angular: self.angular + other.angular,
        }
    }
}
impl std::ops::AddAssign for Velocity {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}
impl std::ops::Mul<f64> for Velocity {
    type Output = Velocity;

    fn mul(self, rhs: f64) -> Self::Output {
        Velocity {
            linear: self.linear * rhs,
            angular: self.angular * rhs,
        }
    }
}
