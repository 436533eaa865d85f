//! Joints, springs and motors restricting the relative motion of two bodies.
//!
//! Every constraint kind is solved with the same protocol as contacts:
//! [`prepare`][Solve::prepare] computes effective masses and bias velocities once per step,
//! [`apply_cached_impulse`][Solve::apply_cached_impulse] warm starts with the impulse
//! accumulated on the previous step,
//! and [`apply_impulse`][Solve::apply_impulse] runs once per solver iteration.

mod joints;
mod rotary;
mod springs;

pub use joints::{GrooveJoint, PinJoint, PivotJoint, SlideJoint};
pub use rotary::{GearJoint, RatchetJoint, RotaryLimitJoint, SimpleMotor};
pub use springs::{DampedRotarySpring, DampedSpring};

use super::{Body, BodyKey};
use crate::math as m;

/// A constraint between two bodies.
///
/// To attach something to the world, use the [`Space`][super::Space]'s static body.
#[derive(Clone, Debug)]
pub struct Constraint {
    pub(crate) bodies: (BodyKey, BodyKey),
    /// Largest force the constraint can apply. Infinite by default.
    pub max_force: f64,
    /// Fraction of the constraint's error corrected each step.
    pub bias_coef: f64,
    /// Largest speed at which error is corrected. Infinite by default.
    pub max_bias: f64,
    /// Arbitrary data for the user to associate the constraint with their own things.
    pub user_data: u64,
    /// Type-specific parameters. Public so that e.g. motor rates can be changed in place.
    pub kind: ConstraintKind,
}

/// Default fraction of a constraint's error corrected per step.
pub const DEFAULT_BIAS_COEF: f64 = 0.1;

impl Constraint {
    pub fn new(a: BodyKey, b: BodyKey, kind: impl Into<ConstraintKind>) -> Self {
        Self {
            bodies: (a, b),
            max_force: f64::INFINITY,
            bias_coef: DEFAULT_BIAS_COEF,
            max_bias: f64::INFINITY,
            user_data: 0,
            kind: kind.into(),
        }
    }

    pub fn with_max_force(mut self, max_force: f64) -> Self {
        self.max_force = max_force;
        self
    }

    pub fn with_bias_coef(mut self, bias_coef: f64) -> Self {
        self.bias_coef = bias_coef;
        self
    }

    pub fn with_max_bias(mut self, max_bias: f64) -> Self {
        self.max_bias = max_bias;
        self
    }

    /// The bodies this constraint connects.
    #[inline]
    pub fn bodies(&self) -> (BodyKey, BodyKey) {
        self.bodies
    }

    /// Magnitude of the impulse applied on the last step.
    /// Divide by the timestep to get the force.
    #[inline]
    pub fn impulse(&self) -> f64 {
        self.kind.solver_ref().impulse()
    }

    #[inline]
    pub(crate) fn limits(&self) -> Limits {
        Limits {
            max_force: self.max_force,
            bias_coef: self.bias_coef,
            max_bias: self.max_bias,
        }
    }

    pub(crate) fn init(&mut self, a: &Body, b: &Body) {
        self.kind.solver().init(a, b);
    }

    /// Returns false if the constraint can't act this step, e.g. between two infinite masses.
    pub(crate) fn prepare(&mut self, a: &Body, b: &Body, dt: f64) -> bool {
        let limits = self.limits();
        self.kind.solver().prepare(a, b, &limits, dt)
    }

    pub(crate) fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, coef: f64) {
        self.kind.solver().apply_cached_impulse(a, b, coef);
    }

    pub(crate) fn apply_impulse(&mut self, a: &mut Body, b: &mut Body) {
        self.kind.solver().apply_impulse(a, b);
    }
}

/// The different kinds of constraints.
#[derive(Clone, Debug)]
pub enum ConstraintKind {
    Pin(PinJoint),
    Slide(SlideJoint),
    Pivot(PivotJoint),
    Groove(GrooveJoint),
    DampedSpring(DampedSpring),
    DampedRotarySpring(DampedRotarySpring),
    RotaryLimit(RotaryLimitJoint),
    Ratchet(RatchetJoint),
    Gear(GearJoint),
    SimpleMotor(SimpleMotor),
}

impl ConstraintKind {
    fn solver(&mut self) -> &mut dyn Solve {
        match self {
            ConstraintKind::Pin(c) => c,
            ConstraintKind::Slide(c) => c,
            ConstraintKind::Pivot(c) => c,
            ConstraintKind::Groove(c) => c,
            ConstraintKind::DampedSpring(c) => c,
            ConstraintKind::DampedRotarySpring(c) => c,
            ConstraintKind::RotaryLimit(c) => c,
            ConstraintKind::Ratchet(c) => c,
            ConstraintKind::Gear(c) => c,
            ConstraintKind::SimpleMotor(c) => c,
        }
    }

    fn solver_ref(&self) -> &dyn Solve {
        match self {
            ConstraintKind::Pin(c) => c,
            ConstraintKind::Slide(c) => c,
            ConstraintKind::Pivot(c) => c,
            ConstraintKind::Groove(c) => c,
            ConstraintKind::DampedSpring(c) => c,
            ConstraintKind::DampedRotarySpring(c) => c,
            ConstraintKind::RotaryLimit(c) => c,
            ConstraintKind::Ratchet(c) => c,
            ConstraintKind::Gear(c) => c,
            ConstraintKind::SimpleMotor(c) => c,
        }
    }
}

macro_rules! impl_into_kind {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for ConstraintKind {
            fn from(c: $ty) -> Self {
                ConstraintKind::$variant(c)
            }
        })*
    };
}
impl_into_kind!(
    PinJoint => Pin,
    SlideJoint => Slide,
    PivotJoint => Pivot,
    GrooveJoint => Groove,
    DampedSpring => DampedSpring,
    DampedRotarySpring => DampedRotarySpring,
    RotaryLimitJoint => RotaryLimit,
    RatchetJoint => Ratchet,
    GearJoint => Gear,
    SimpleMotor => SimpleMotor,
);

/// Settings shared by every constraint kind.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Limits {
    pub max_force: f64,
    pub bias_coef: f64,
    pub max_bias: f64,
}

impl Limits {
    /// Velocity that corrects the given error by the bias fraction over one step.
    #[inline]
    pub fn bias(&self, error: f64, dt: f64) -> f64 {
        m::clamp(-self.bias_coef * error / dt, -self.max_bias, self.max_bias)
    }

    #[inline]
    pub fn bias_vec(&self, error: m::Vec2, dt: f64) -> m::Vec2 {
        m::clamp_mag(error * (-self.bias_coef / dt), self.max_bias)
    }

    /// Largest impulse the constraint can apply in one step.
    #[inline]
    pub fn max_impulse(&self, dt: f64) -> f64 {
        self.max_force * dt
    }
}

/// The solver protocol every constraint kind implements.
pub(crate) trait Solve {
    /// Called once when the constraint is added to a space,
    /// for kinds that measure their rest state from the bodies' initial positions.
    fn init(&mut self, _a: &Body, _b: &Body) {}

    /// Compute effective masses and bias velocities for this step.
    /// Returns false if the effective mass is degenerate,
    /// in which case the constraint stays inert for the step.
    fn prepare(&mut self, a: &Body, b: &Body, limits: &Limits, dt: f64) -> bool;

    /// Reapply the impulse accumulated on the previous step, scaled by `coef`.
    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, coef: f64);

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body);

    fn impulse(&self) -> f64;
}

//
// shared solver math, also used for contacts
//

/// Velocity of the point at offset `r2` on `b` relative to the point at offset `r1` on `a`.
#[inline]
pub(crate) fn relative_velocity(a: &Body, b: &Body, r1: m::Vec2, r2: m::Vec2) -> m::Vec2 {
    b.velocity.point_velocity(r2) - a.velocity.point_velocity(r1)
}

#[inline]
pub(crate) fn normal_relative_velocity(
    a: &Body,
    b: &Body,
    r1: m::Vec2,
    r2: m::Vec2,
    n: m::Vec2,
) -> f64 {
    relative_velocity(a, b, r1, r2).dot(n)
}

/// Apply an impulse to `b` and the opposite impulse to `a`.
#[inline]
pub(crate) fn apply_impulses(a: &mut Body, b: &mut Body, r1: m::Vec2, r2: m::Vec2, j: m::Vec2) {
    a.apply_impulse(-j, r1);
    b.apply_impulse(j, r2);
}

#[inline]
pub(crate) fn apply_bias_impulses(
    a: &mut Body,
    b: &mut Body,
    r1: m::Vec2,
    r2: m::Vec2,
    j: m::Vec2,
) {
    a.apply_bias_impulse(-j, r1);
    b.apply_bias_impulse(j, r2);
}

/// Inverse effective mass of two bodies along direction `n`.
#[inline]
pub(crate) fn k_scalar(a: &Body, b: &Body, r1: m::Vec2, r2: m::Vec2, n: m::Vec2) -> f64 {
    let rcn1 = m::cross(r1, n);
    let rcn2 = m::cross(r2, n);
    a.inv_mass() + b.inv_mass() + a.inv_moment() * rcn1 * rcn1 + b.inv_moment() * rcn2 * rcn2
}

/// Invert an inverse effective mass, or None if it's degenerate.
#[inline]
pub(crate) fn effective_mass(k: f64) -> Option<f64> {
    if k > 0.0 && k.is_finite() {
        Some(1.0 / k)
    } else {
        None
    }
}

/// Effective mass matrix of two bodies for point-to-point constraints,
/// as its two rows. None if the matrix is singular.
pub(crate) fn k_tensor(
    a: &Body,
    b: &Body,
    r1: m::Vec2,
    r2: m::Vec2,
) -> Option<(m::Vec2, m::Vec2)> {
    let m_sum = a.inv_mass() + b.inv_mass();
    let (mut k11, mut k12, mut k21, mut k22) = (m_sum, 0.0, 0.0, m_sum);

    for (r, i_inv) in [(r1, a.inv_moment()), (r2, b.inv_moment())] {
        let xsq = r.x * r.x * i_inv;
        let ysq = r.y * r.y * i_inv;
        let nxy = -r.x * r.y * i_inv;
        k11 += ysq;
        k12 += nxy;
        k21 += nxy;
        k22 += xsq;
    }

    let det = k11 * k22 - k12 * k21;
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    let det_inv = 1.0 / det;
    Some((
        m::Vec2::new(k22 * det_inv, -k12 * det_inv),
        m::Vec2::new(-k21 * det_inv, k11 * det_inv),
    ))
}

#[inline]
pub(crate) fn mult_k(v: m::Vec2, k1: m::Vec2, k2: m::Vec2) -> m::Vec2 {
    m::Vec2::new(v.dot(k1), v.dot(k2))
}

/// Tracks a body's angle across full turns,
/// since the rotor only represents angles in (-pi, pi].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct UnwoundAngle {
    total: f64,
    last: f64,
}

impl UnwoundAngle {
    pub fn new(angle: f64) -> Self {
        Self {
            total: angle,
            last: angle,
        }
    }

    /// Advance by the shortest rotation from the last seen angle to `angle`.
    pub fn update(&mut self, angle: f64) -> f64 {
        use std::f64::consts::{PI, TAU};
        let mut delta = (angle - self.last).rem_euclid(TAU);
        if delta > PI {
            delta -= TAU;
        }
        self.last = angle;
        self.total += delta;
        self.total
    }
}
