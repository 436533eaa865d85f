use super::{SpaceError, Velocity};
use crate::math as m;

/// How a body takes part in the simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum BodyType {
    /// Responds to forces and collisions.
    Dynamic,
    /// Moves with the velocity it is given but isn't pushed by anything.
    Kinematic,
    /// Never moves.
    Static,
}

/// A body is something that moves, a rigid body with mass and moment of inertia.
/// Attach shapes to a body to make it collide with other things.
///
/// Position and velocity can be freely modified between steps.
/// Changes made while a step is running (i.e. from collision handlers)
/// don't play well with the solver.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Body {
    /// Position of the center of gravity and orientation of the body.
    #[cfg_attr(feature = "serde-types", serde(with = "crate::math::serde_pose"))]
    pub pose: m::Pose,
    pub velocity: Velocity,
    /// Force accumulated since the last call to [`reset_forces`][Self::reset_forces].
    /// Forces are not cleared automatically after a step.
    pub force: m::Vec2,
    pub torque: f64,
    /// Maximum speed the body can reach by integrating forces.
    pub v_limit: f64,
    /// Maximum angular speed the body can reach by integrating torque.
    pub w_limit: f64,
    /// Arbitrary data for the user to associate the body with their own things.
    pub user_data: u64,
    mass: Mass,
    moment: Mass,
    body_type: BodyType,
    // pseudo-velocity used to push overlapping objects apart without adding momentum
    #[cfg_attr(feature = "serde-types", serde(skip))]
    pub(crate) bias_velocity: Velocity,
}

impl Body {
    /// Create a dynamic body with the given mass and moment of inertia.
    /// Either can be infinite, e.g. for a body that moves but never rotates.
    ///
    /// See the [`mass`][super::mass] module for ways to compute the moment of inertia.
    pub fn new(mass: f64, moment: f64) -> Self {
        Self::with_type(BodyType::Dynamic, Mass::new(mass), Mass::new(moment))
    }

    /// Kinematic bodies are not affected by forces or collisions,
    /// but they move with their velocity and push dynamic bodies out of the way.
    pub fn new_kinematic() -> Self {
        Self::with_type(BodyType::Kinematic, Mass::Infinite, Mass::Infinite)
    }

    /// Static bodies do not move at all.
    pub fn new_static() -> Self {
        Self::with_type(BodyType::Static, Mass::Infinite, Mass::Infinite)
    }

    fn with_type(body_type: BodyType, mass: Mass, moment: Mass) -> Self {
        Self {
            pose: m::Pose::identity(),
            velocity: Velocity::default(),
            force: m::Vec2::zero(),
            torque: 0.0,
            v_limit: f64::INFINITY,
            w_limit: f64::INFINITY,
            user_data: 0,
            mass,
            moment,
            body_type,
            bias_velocity: Velocity::default(),
        }
    }

    /// Set the pose of the body in a builder-like chain.
    pub fn with_pose(mut self, pose: impl Into<m::PoseBuilder>) -> Self {
        self.pose = pose.into().build();
        self
    }

    /// Set the velocity of the body in a builder-like chain.
    pub fn with_velocity(mut self, vel: Velocity) -> Self {
        self.velocity = vel;
        self
    }

    //
    // accessors
    //

    #[inline]
    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.body_type == BodyType::Static
    }

    /// Whether collisions and constraints can change this body's velocity.
    #[inline]
    pub fn sees_forces(&self) -> bool {
        self.body_type == BodyType::Dynamic
            && !matches!((self.mass, self.moment), (Mass::Infinite, Mass::Infinite))
    }

    #[inline]
    pub fn position(&self) -> m::Vec2 {
        self.pose.translation
    }

    #[inline]
    pub fn set_position(&mut self, pos: m::Vec2) {
        self.pose.translation = pos;
    }

    /// Orientation of the body in radians.
    #[inline]
    pub fn angle(&self) -> f64 {
        m::Angle::from(self.pose.rotation).rad()
    }

    #[inline]
    pub fn set_angle(&mut self, angle: m::Angle) {
        self.pose.rotation = angle.into();
    }

    /// The body's rotation as the unit vector `(cos a, sin a)`.
    #[inline]
    pub fn rotation_vector(&self) -> m::Vec2 {
        m::rotation_vector(&self.pose)
    }

    #[inline]
    pub fn mass(&self) -> Mass {
        self.mass
    }

    #[inline]
    pub fn moment(&self) -> Mass {
        self.moment
    }

    #[inline]
    pub(crate) fn inv_mass(&self) -> f64 {
        match self.body_type {
            BodyType::Dynamic => self.mass.inv(),
            _ => 0.0,
        }
    }

    #[inline]
    pub(crate) fn inv_moment(&self) -> f64 {
        match self.body_type {
            BodyType::Dynamic => self.moment.inv(),
            _ => 0.0,
        }
    }

    /// Change the mass of a dynamic body. Has no effect on static and kinematic ones.
    ///
    /// The mass must be positive. Infinity is allowed.
    pub fn set_mass(&mut self, mass: f64) -> Result<(), SpaceError> {
        check_mass(mass)?;
        if self.body_type == BodyType::Dynamic {
            self.mass = Mass::new(mass);
        }
        Ok(())
    }

    /// Change the moment of inertia of a dynamic body.
    /// Has no effect on static and kinematic ones.
    ///
    /// The moment must be positive. Infinity is allowed.
    pub fn set_moment(&mut self, moment: f64) -> Result<(), SpaceError> {
        check_mass(moment)?;
        if self.body_type == BodyType::Dynamic {
            self.moment = Mass::new(moment);
        }
        Ok(())
    }

    /// Convert a point in body-local coordinates to world coordinates.
    #[inline]
    pub fn local_to_world(&self, point: m::Vec2) -> m::Vec2 {
        self.pose * point
    }

    /// Convert a point in world coordinates to body-local coordinates.
    #[inline]
    pub fn world_to_local(&self, point: m::Vec2) -> m::Vec2 {
        self.pose.inversed() * point
    }

    /// Kinetic energy of the body. Infinite masses don't contribute.
    pub fn kinetic_energy(&self) -> f64 {
        let linear = match self.mass {
            Mass::Finite { mass, .. } => mass * self.velocity.linear.mag_sq(),
            Mass::Infinite => 0.0,
        };
        let angular = match self.moment {
            Mass::Finite { mass, .. } => mass * self.velocity.angular * self.velocity.angular,
            Mass::Infinite => 0.0,
        };
        0.5 * (linear + angular)
    }

    //
    // forces and impulses
    //

    /// Zero the accumulated force and torque.
    #[inline]
    pub fn reset_forces(&mut self) {
        self.force = m::Vec2::zero();
        self.torque = 0.0;
    }

    #[inline]
    pub fn apply_torque(&mut self, torque: f64) {
        self.torque += torque;
    }

    /// Add a force acting on the given point in world coordinates.
    pub fn apply_force_at_world_point(&mut self, force: m::Vec2, point: m::Vec2) {
        self.force += force;
        self.torque += m::cross(point - self.pose.translation, force);
    }

    /// Add a force acting on the given point in body-local coordinates.
    /// The force itself is in world coordinates.
    pub fn apply_force_at_local_point(&mut self, force: m::Vec2, point: m::Vec2) {
        self.apply_force_at_world_point(force, self.local_to_world(point));
    }

    /// Immediately change the velocity of the body
    /// as if hit at the given point in world coordinates.
    pub fn apply_impulse_at_world_point(&mut self, impulse: m::Vec2, point: m::Vec2) {
        self.apply_impulse(impulse, point - self.pose.translation);
    }

    /// Immediately change the velocity of the body
    /// as if hit at the given point in body-local coordinates.
    pub fn apply_impulse_at_local_point(&mut self, impulse: m::Vec2, point: m::Vec2) {
        self.apply_impulse_at_world_point(impulse, self.local_to_world(point));
    }

    /// Apply an impulse at an offset from the center of gravity, both in world orientation.
    #[inline]
    pub(crate) fn apply_impulse(&mut self, impulse: m::Vec2, offset: m::Vec2) {
        self.velocity.linear += impulse * self.inv_mass();
        self.velocity.angular += self.inv_moment() * m::cross(offset, impulse);
    }

    #[inline]
    pub(crate) fn apply_bias_impulse(&mut self, impulse: m::Vec2, offset: m::Vec2) {
        self.bias_velocity.linear += impulse * self.inv_mass();
        self.bias_velocity.angular += self.inv_moment() * m::cross(offset, impulse);
    }

    //
    // integration
    //

    /// Integrate forces and gravity into velocity.
    ///
    /// `damping` is the fraction of velocity retained over this timestep.
    /// Only dynamic bodies are affected, and only in the components where their mass is finite.
    pub(crate) fn integrate_velocity(&mut self, gravity: m::Vec2, damping: f64, dt: f64) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        if let Mass::Finite { inverse, .. } = self.mass {
            let vel = self.velocity.linear * damping + (gravity + self.force * inverse) * dt;
            self.velocity.linear = m::clamp_mag(vel, self.v_limit);
        }
        if let Mass::Finite { inverse, .. } = self.moment {
            let w = self.velocity.angular * damping + self.torque * inverse * dt;
            self.velocity.angular = m::clamp(w, -self.w_limit, self.w_limit);
        }
    }

    /// Move the body with its velocity plus the bias velocity accumulated during solving,
    /// then discard the bias velocity.
    pub(crate) fn integrate_position(&mut self, dt: f64) {
        if self.body_type == BodyType::Static {
            return;
        }
        let vel = self.velocity + self.bias_velocity;
        self.pose.translation += vel.linear * dt;
        let rotation = vel.angular * dt;
        if rotation != 0.0 {
            self.pose.prepend_rotation(m::Rotor2::from_angle(rotation));
            self.pose.rotation.normalize();
        }
        self.bias_velocity = Velocity::default();
    }
}

#[inline]
fn check_mass(value: f64) -> Result<(), SpaceError> {
    // also false for NaN
    if value > 0.0 {
        Ok(())
    } else {
        Err(SpaceError::InvalidMass)
    }
}

/// Mass or moment of inertia of a body, which can be infinite.
///
/// This stores both a mass value and its inverse, because calculating inverse mass
/// is expensive and needed a lot in physics calculations.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum Mass {
    Finite { mass: f64, inverse: f64 },
    Infinite,
}

impl Mass {
    /// Infinite values give [`Mass::Infinite`][Mass::Infinite].
    #[inline]
    pub fn new(mass: f64) -> Self {
        if mass.is_infinite() {
            Mass::Infinite
        } else {
            Mass::Finite {
                mass,
                inverse: 1.0 / mass,
            }
        }
    }

    /// Get the inverse of the mass, which is zero if the mass is infinite.
    #[inline]
    pub fn inv(&self) -> f64 {
        match self {
            Mass::Finite { inverse, .. } => *inverse,
            Mass::Infinite => 0.0,
        }
    }

    /// Get the mass itself, `f64::INFINITY` if infinite.
    #[inline]
    pub fn value(&self) -> f64 {
        match self {
            Mass::Finite { mass, .. } => *mass,
            Mass::Infinite => f64::INFINITY,
        }
    }
}

impl From<f64> for Mass {
    #[inline]
    fn from(mass: f64) -> Self {
        Mass::new(mass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    #[test]
    fn velocity_integration() {
        let mut body = Body::new(2.0, 1.0);
        body.force = m::Vec2::new(4.0, 0.0);
        body.torque = 3.0;
        body.integrate_velocity(m::Vec2::new(0.0, -10.0), 1.0, 0.5);
        assert_eq!(body.velocity.linear, m::Vec2::new(1.0, -5.0));
        assert_eq!(body.velocity.angular, 1.5);

        // damping applies to the existing velocity only
        body.reset_forces();
        body.integrate_velocity(m::Vec2::zero(), 0.5, 0.5);
        assert_eq!(body.velocity.linear, m::Vec2::new(0.5, -2.5));
        assert_eq!(body.velocity.angular, 0.75);

        body.v_limit = 1.0;
        body.w_limit = 0.1;
        body.integrate_velocity(m::Vec2::new(100.0, 0.0), 1.0, 1.0);
        assert_abs_diff_eq!(body.velocity.linear.mag(), 1.0, epsilon = 1e-12);
        assert_eq!(body.velocity.angular, 0.1);
    }

    #[test]
    fn infinite_mass_ignores_forces() {
        let mut particle = Body::new(1.0, f64::INFINITY);
        particle.torque = 10.0;
        particle.integrate_velocity(m::Vec2::new(0.0, -1.0), 1.0, 1.0);
        assert_eq!(particle.velocity.linear, m::Vec2::new(0.0, -1.0));
        assert_eq!(particle.velocity.angular, 0.0);

        let mut kinematic = Body::new_kinematic().with_velocity(Velocity {
            linear: m::Vec2::new(1.0, 0.0),
            angular: 0.0,
        });
        kinematic.integrate_velocity(m::Vec2::new(0.0, -1.0), 1.0, 1.0);
        kinematic.integrate_position(2.0);
        assert_eq!(kinematic.velocity.linear, m::Vec2::new(1.0, 0.0));
        assert_eq!(kinematic.position(), m::Vec2::new(2.0, 0.0));

        let mut stat = Body::new_static().with_velocity(Velocity {
            linear: m::Vec2::new(1.0, 0.0),
            angular: 1.0,
        });
        stat.integrate_position(1.0);
        assert_eq!(stat.position(), m::Vec2::zero());
        assert_eq!(stat.inv_mass(), 0.0);
    }

    #[test]
    fn invalid_mass_changes_are_rejected() {
        let mut body = Body::new(2.0, 3.0);
        for bad in [0.0, -1.0, f64::NAN] {
            assert_eq!(body.set_mass(bad), Err(SpaceError::InvalidMass));
            assert_eq!(body.set_moment(bad), Err(SpaceError::InvalidMass));
        }
        assert_eq!(body.mass(), Mass::new(2.0));
        assert_eq!(body.moment(), Mass::new(3.0));

        assert_eq!(body.set_mass(4.0), Ok(()));
        assert_eq!(body.set_moment(f64::INFINITY), Ok(()));
        assert_eq!(body.inv_mass(), 0.25);
        assert_eq!(body.inv_moment(), 0.0);

        // static bodies stay infinite
        let mut stat = Body::new_static();
        assert_eq!(stat.set_mass(1.0), Ok(()));
        assert_eq!(stat.mass(), Mass::Infinite);
    }

    #[test]
    fn rotation_stays_normalized() {
        let mut body = Body::new(1.0, 1.0).with_velocity(Velocity {
            linear: m::Vec2::zero(),
            angular: 1.0,
        });
        let dt = 1.0 / 60.0;
        for _ in 0..6000 {
            body.integrate_position(dt);
        }
        let rot = body.rotation_vector();
        assert_abs_diff_eq!(rot.mag(), 1.0, epsilon = 1e-12);
        // 100 radians in total
        let expected = m::for_angle(100.0 % (2.0 * PI));
        assert_abs_diff_eq!(rot.x, expected.x, epsilon = 1e-9);
        assert_abs_diff_eq!(rot.y, expected.y, epsilon = 1e-9);
    }

    #[test]
    fn impulses_and_coordinates() {
        let mut body = Body::new(2.0, 4.0).with_pose(
            m::PoseBuilder::new()
                .with_position([1.0, 1.0])
                .with_rotation(m::Angle::Deg(90.0)),
        );
        let world = body.local_to_world(m::Vec2::new(1.0, 0.0));
        assert_abs_diff_eq!(world.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(world.y, 2.0, epsilon = 1e-12);
        let local = body.world_to_local(world);
        assert_abs_diff_eq!(local.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(local.y, 0.0, epsilon = 1e-12);

        // hit the tip of the body sideways
        body.apply_impulse_at_local_point(m::Vec2::new(-2.0, 0.0), m::Vec2::new(1.0, 0.0));
        assert_abs_diff_eq!(body.velocity.linear.x, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(body.velocity.angular, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(body.kinetic_energy(), 0.5 * (2.0 + 4.0 * 0.25), epsilon = 1e-12);

        body.apply_force_at_world_point(m::Vec2::new(0.0, 3.0), m::Vec2::new(2.0, 1.0));
        assert_eq!(body.force, m::Vec2::new(0.0, 3.0));
        assert_eq!(body.torque, 3.0);
        body.reset_forces();
        assert_eq!(body.force, m::Vec2::zero());
        assert_eq!(body.torque, 0.0);
    }

    #[test]
    fn mass_from_values() {
        assert_eq!(Mass::new(f64::INFINITY), Mass::Infinite);
        assert_eq!(Mass::new(4.0).inv(), 0.25);
        assert_eq!(Mass::Infinite.inv(), 0.0);
        assert_eq!(Mass::Infinite.value(), f64::INFINITY);
    }
}
