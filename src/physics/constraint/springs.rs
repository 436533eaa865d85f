use super::{
    apply_impulses, effective_mass, k_scalar, normal_relative_velocity, Limits, Solve,
    UnwoundAngle,
};
use crate::{math as m, physics::Body};

/// A spring with damping between two anchor points.
///
/// Spring forces are applied as-is every step and aren't limited by `max_force`.
#[derive(Clone, Debug)]
pub struct DampedSpring {
    pub anchor1: m::Vec2,
    pub anchor2: m::Vec2,
    /// Distance the spring wants to be at.
    pub rest_length: f64,
    /// Spring constant (Young's modulus).
    pub stiffness: f64,
    /// How soft to make the damping of the spring.
    pub damping: f64,
    r1: m::Vec2,
    r2: m::Vec2,
    n: m::Vec2,
    n_mass: f64,
    v_coef: f64,
    // damped relative velocity the iterations steer towards
    target_vrn: f64,
    spring_impulse: f64,
}

impl DampedSpring {
    pub fn new(
        anchor1: m::Vec2,
        anchor2: m::Vec2,
        rest_length: f64,
        stiffness: f64,
        damping: f64,
    ) -> Self {
        Self {
            anchor1,
            anchor2,
            rest_length,
            stiffness,
            damping,
            r1: m::Vec2::zero(),
            r2: m::Vec2::zero(),
            n: m::Vec2::zero(),
            n_mass: 0.0,
            v_coef: 0.0,
            target_vrn: 0.0,
            spring_impulse: 0.0,
        }
    }

    /// Force pushing the anchors apart at the given distance.
    #[inline]
    fn spring_force(&self, dist: f64) -> f64 {
        (self.rest_length - dist) * self.stiffness
    }
}

impl Solve for DampedSpring {
    fn prepare(&mut self, a: &Body, b: &Body, _limits: &Limits, dt: f64) -> bool {
        self.r1 = a.pose.rotation * self.anchor1;
        self.r2 = b.pose.rotation * self.anchor2;
        let delta = (b.position() + self.r2) - (a.position() + self.r1);
        let dist = delta.mag();
        self.n = m::normalize_safe(delta);

        let k = k_scalar(a, b, self.r1, self.r2, self.n);
        self.target_vrn = 0.0;
        self.spring_impulse = self.spring_force(dist) * dt;
        match effective_mass(k) {
            Some(n_mass) => {
                self.n_mass = n_mass;
                self.v_coef = 1.0 - (-self.damping * dt * k).exp();
                true
            }
            None => {
                self.n_mass = 0.0;
                self.v_coef = 0.0;
                self.spring_impulse = 0.0;
                false
            }
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, _coef: f64) {
        // the spring force itself, damping is solved iteratively
        apply_impulses(a, b, self.r1, self.r2, self.n * self.spring_impulse);
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body) {
        let vrn = normal_relative_velocity(a, b, self.r1, self.r2, self.n);
        // damping is applied once per step, later iterations only correct drift
        let v_damp = (self.target_vrn - vrn) * self.v_coef;
        self.target_vrn = vrn + v_damp;
        apply_impulses(a, b, self.r1, self.r2, self.n * (v_damp * self.n_mass));
    }

    fn impulse(&self) -> f64 {
        0.0
    }
}

/// An angular spring with damping, acting on the relative angle of two bodies.
#[derive(Clone, Debug)]
pub struct DampedRotarySpring {
    /// Relative angle (second body minus first) in radians the spring wants to be at.
    pub rest_angle: f64,
    pub stiffness: f64,
    pub damping: f64,
    angle_a: UnwoundAngle,
    angle_b: UnwoundAngle,
    i_sum: f64,
    w_coef: f64,
    target_wrn: f64,
    spring_impulse: f64,
}

impl DampedRotarySpring {
    pub fn new(rest_angle: f64, stiffness: f64, damping: f64) -> Self {
        Self {
            rest_angle,
            stiffness,
            damping,
            angle_a: UnwoundAngle::default(),
            angle_b: UnwoundAngle::default(),
            i_sum: 0.0,
            w_coef: 0.0,
            target_wrn: 0.0,
            spring_impulse: 0.0,
        }
    }
}

impl Solve for DampedRotarySpring {
    fn init(&mut self, a: &Body, b: &Body) {
        self.angle_a = UnwoundAngle::new(a.angle());
        self.angle_b = UnwoundAngle::new(b.angle());
    }

    fn prepare(&mut self, a: &Body, b: &Body, _limits: &Limits, dt: f64) -> bool {
        let relative = self.angle_b.update(b.angle()) - self.angle_a.update(a.angle());
        let moment = a.inv_moment() + b.inv_moment();
        self.target_wrn = 0.0;
        match effective_mass(moment) {
            Some(i_sum) => {
                self.i_sum = i_sum;
                self.w_coef = 1.0 - (-self.damping * dt * moment).exp();
                self.spring_impulse = (self.rest_angle - relative) * self.stiffness * dt;
                true
            }
            None => {
                self.i_sum = 0.0;
                self.w_coef = 0.0;
                self.spring_impulse = 0.0;
                false
            }
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, _coef: f64) {
        a.velocity.angular -= self.spring_impulse * a.inv_moment();
        b.velocity.angular += self.spring_impulse * b.inv_moment();
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body) {
        let wr = b.velocity.angular - a.velocity.angular;
        let w_damp = (self.target_wrn - wr) * self.w_coef;
        self.target_wrn = wr + w_damp;
        let j_damp = w_damp * self.i_sum;
        a.velocity.angular -= j_damp * a.inv_moment();
        b.velocity.angular += j_damp * b.inv_moment();
    }

    fn impulse(&self) -> f64 {
        0.0
    }
}
