use super::{effective_mass, Limits, Solve, UnwoundAngle};
use crate::{math as m, physics::Body};

#[inline]
fn apply_angular_impulse(a: &mut Body, b: &mut Body, j: f64) {
    a.velocity.angular -= j * a.inv_moment();
    b.velocity.angular += j * b.inv_moment();
}

//
// Rotary limit
//

/// Keeps the relative angle of two bodies (second minus first) within a range.
#[derive(Clone, Debug)]
pub struct RotaryLimitJoint {
    pub min: f64,
    pub max: f64,
    angle_a: UnwoundAngle,
    angle_b: UnwoundAngle,
    i_sum: f64,
    bias: f64,
    j_acc: f64,
    j_max: f64,
    at_limit: bool,
    below_min: bool,
}

impl RotaryLimitJoint {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            angle_a: UnwoundAngle::default(),
            angle_b: UnwoundAngle::default(),
            i_sum: 0.0,
            bias: 0.0,
            j_acc: 0.0,
            j_max: 0.0,
            at_limit: false,
            below_min: false,
        }
    }
}

impl Solve for RotaryLimitJoint {
    fn init(&mut self, a: &Body, b: &Body) {
        self.angle_a = UnwoundAngle::new(a.angle());
        self.angle_b = UnwoundAngle::new(b.angle());
    }

    fn prepare(&mut self, a: &Body, b: &Body, limits: &Limits, dt: f64) -> bool {
        let dist = self.angle_b.update(b.angle()) - self.angle_a.update(a.angle());
        let error = if dist > self.max {
            self.max - dist
        } else if dist < self.min {
            self.min - dist
        } else {
            0.0
        };
        self.at_limit = error != 0.0;
        self.below_min = error > 0.0;
        self.bias = limits.bias(error, dt);
        self.j_max = limits.max_impulse(dt);
        if !self.at_limit {
            self.j_acc = 0.0;
        }

        match effective_mass(a.inv_moment() + b.inv_moment()) {
            Some(i_sum) => {
                self.i_sum = i_sum;
                true
            }
            None => {
                self.i_sum = 0.0;
                self.j_acc = 0.0;
                self.at_limit = false;
                error == 0.0
            }
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, coef: f64) {
        self.j_acc *= coef;
        apply_angular_impulse(a, b, self.j_acc);
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body) {
        if !self.at_limit {
            return;
        }
        let wr = b.velocity.angular - a.velocity.angular;
        let j = -(self.bias + wr) * self.i_sum;
        let j_old = self.j_acc;
        // below the minimum the joint may only push the angle up, above it only down
        self.j_acc = if self.below_min {
            m::clamp(j_old + j, 0.0, self.j_max)
        } else {
            m::clamp(j_old + j, -self.j_max, 0.0)
        };
        apply_angular_impulse(a, b, self.j_acc - j_old);
    }

    fn impulse(&self) -> f64 {
        self.j_acc.abs()
    }
}

//
// Ratchet
//

/// Lets the relative angle of two bodies change freely in one direction,
/// clicking into place every `ratchet` radians, like a socket wrench.
/// The sign of `ratchet` gives the direction of free rotation.
#[derive(Clone, Debug)]
pub struct RatchetJoint {
    /// Angle of the current click position.
    pub angle: f64,
    /// Offset of the click positions.
    pub phase: f64,
    /// Distance between click positions.
    pub ratchet: f64,
    angle_a: UnwoundAngle,
    angle_b: UnwoundAngle,
    i_sum: f64,
    bias: f64,
    j_acc: f64,
    j_max: f64,
    at_limit: bool,
}

impl RatchetJoint {
    pub fn new(phase: f64, ratchet: f64) -> Self {
        Self {
            angle: 0.0,
            phase,
            ratchet,
            angle_a: UnwoundAngle::default(),
            angle_b: UnwoundAngle::default(),
            i_sum: 0.0,
            bias: 0.0,
            j_acc: 0.0,
            j_max: 0.0,
            at_limit: false,
        }
    }
}

impl Solve for RatchetJoint {
    fn init(&mut self, a: &Body, b: &Body) {
        self.angle_a = UnwoundAngle::new(a.angle());
        self.angle_b = UnwoundAngle::new(b.angle());
        self.angle = b.angle() - a.angle();
    }

    fn prepare(&mut self, a: &Body, b: &Body, limits: &Limits, dt: f64) -> bool {
        let delta = self.angle_b.update(b.angle()) - self.angle_a.update(a.angle());
        let diff = self.angle - delta;
        let mut error = 0.0;
        if diff * self.ratchet > 0.0 {
            error = diff;
        } else if self.ratchet != 0.0 {
            // moved in the free direction, advance the click position
            self.angle = ((delta - self.phase) / self.ratchet).floor() * self.ratchet + self.phase;
        }

        self.at_limit = error != 0.0;
        self.bias = limits.bias(error, dt);
        self.j_max = limits.max_impulse(dt);
        if !self.at_limit {
            self.j_acc = 0.0;
        }

        match effective_mass(a.inv_moment() + b.inv_moment()) {
            Some(i_sum) => {
                self.i_sum = i_sum;
                true
            }
            None => {
                self.i_sum = 0.0;
                self.j_acc = 0.0;
                self.at_limit = false;
                error == 0.0
            }
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, coef: f64) {
        self.j_acc *= coef;
        apply_angular_impulse(a, b, self.j_acc);
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body) {
        if !self.at_limit {
            return;
        }
        let wr = b.velocity.angular - a.velocity.angular;
        let ratchet = self.ratchet;
        let j = -(self.bias + wr) * self.i_sum;
        let j_old = self.j_acc;
        self.j_acc = m::clamp((j_old + j) * ratchet, 0.0, self.j_max * ratchet.abs()) / ratchet;
        apply_angular_impulse(a, b, self.j_acc - j_old);
    }

    fn impulse(&self) -> f64 {
        self.j_acc.abs()
    }
}

//
// Gear
//

/// Keeps the angular velocity ratio of two bodies constant.
#[derive(Clone, Debug)]
pub struct GearJoint {
    /// Initial angular offset of the two bodies.
    pub phase: f64,
    /// Ratio of the second body's rotation to the first's.
    /// Must be non-zero and finite.
    pub ratio: f64,
    angle_a: UnwoundAngle,
    angle_b: UnwoundAngle,
    i_sum: f64,
    bias: f64,
    j_acc: f64,
    j_max: f64,
}

impl GearJoint {
    pub fn new(phase: f64, ratio: f64) -> Self {
        Self {
            phase,
            ratio,
            angle_a: UnwoundAngle::default(),
            angle_b: UnwoundAngle::default(),
            i_sum: 0.0,
            bias: 0.0,
            j_acc: 0.0,
            j_max: 0.0,
        }
    }

    #[inline]
    fn ratio_inv(&self) -> f64 {
        1.0 / self.ratio
    }

    fn apply_gear_impulse(&self, a: &mut Body, b: &mut Body, j: f64) {
        // unusable ratio, prepare left the joint inert
        if self.i_sum == 0.0 {
            return;
        }
        a.velocity.angular -= j * a.inv_moment() * self.ratio_inv();
        b.velocity.angular += j * b.inv_moment();
    }
}

impl Solve for GearJoint {
    fn init(&mut self, a: &Body, b: &Body) {
        self.angle_a = UnwoundAngle::new(a.angle());
        self.angle_b = UnwoundAngle::new(b.angle());
    }

    fn prepare(&mut self, a: &Body, b: &Body, limits: &Limits, dt: f64) -> bool {
        let angle_a = self.angle_a.update(a.angle());
        let angle_b = self.angle_b.update(b.angle());
        self.j_max = limits.max_impulse(dt);

        let usable = self.ratio != 0.0 && self.ratio.is_finite();
        let i_sum = if usable {
            effective_mass(a.inv_moment() * self.ratio_inv() + self.ratio * b.inv_moment())
        } else {
            None
        };
        match i_sum {
            Some(i_sum) => {
                self.i_sum = i_sum;
                self.bias = limits.bias(angle_b * self.ratio - angle_a - self.phase, dt);
                true
            }
            None => {
                self.i_sum = 0.0;
                self.bias = 0.0;
                self.j_acc = 0.0;
                false
            }
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, coef: f64) {
        self.j_acc *= coef;
        self.apply_gear_impulse(a, b, self.j_acc);
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body) {
        if self.i_sum == 0.0 {
            return;
        }
        let wr = b.velocity.angular * self.ratio - a.velocity.angular;
        let j = (self.bias - wr) * self.i_sum;
        let j_old = self.j_acc;
        self.j_acc = m::clamp(j_old + j, -self.j_max, self.j_max);
        self.apply_gear_impulse(a, b, self.j_acc - j_old);
    }

    fn impulse(&self) -> f64 {
        self.j_acc.abs()
    }
}

//
// Simple motor
//

/// Drives the relative angular velocity of two bodies towards a constant rate.
/// Set `max_force` on the constraint to limit its torque.
#[derive(Clone, Debug)]
pub struct SimpleMotor {
    /// Target angular velocity of the first body relative to the second.
    pub rate: f64,
    i_sum: f64,
    j_acc: f64,
    j_max: f64,
}

impl SimpleMotor {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            i_sum: 0.0,
            j_acc: 0.0,
            j_max: 0.0,
        }
    }
}

impl Solve for SimpleMotor {
    fn prepare(&mut self, a: &Body, b: &Body, limits: &Limits, dt: f64) -> bool {
        self.j_max = limits.max_impulse(dt);
        match effective_mass(a.inv_moment() + b.inv_moment()) {
            Some(i_sum) => {
                self.i_sum = i_sum;
                true
            }
            None => {
                self.i_sum = 0.0;
                self.j_acc = 0.0;
                false
            }
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, coef: f64) {
        self.j_acc *= coef;
        apply_angular_impulse(a, b, self.j_acc);
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body) {
        let wr = b.velocity.angular - a.velocity.angular + self.rate;
        let j = -wr * self.i_sum;
        let j_old = self.j_acc;
        self.j_acc = m::clamp(j_old + j, -self.j_max, self.j_max);
        apply_angular_impulse(a, b, self.j_acc - j_old);
    }

    fn impulse(&self) -> f64 {
        self.j_acc.abs()
    }
}
