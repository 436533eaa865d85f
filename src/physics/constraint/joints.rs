use super::{
    apply_impulses, effective_mass, k_scalar, k_tensor, mult_k, normal_relative_velocity,
    relative_velocity, Limits, Solve,
};
use crate::{math as m, physics::Body};

/// World-space offset of a body-local anchor from the body's center of gravity.
#[inline]
fn anchor_offset(body: &Body, anchor: m::Vec2) -> m::Vec2 {
    body.pose.rotation * anchor
}

//
// Pin
//

/// Keeps two anchor points at a fixed distance, like a massless rod.
///
/// The distance is measured from the bodies' positions when the joint is added to a space.
#[derive(Clone, Debug)]
pub struct PinJoint {
    /// Anchor on the first body in its local coordinates.
    pub anchor1: m::Vec2,
    /// Anchor on the second body in its local coordinates.
    pub anchor2: m::Vec2,
    /// Distance the joint keeps between the anchors.
    pub dist: f64,
    r1: m::Vec2,
    r2: m::Vec2,
    n: m::Vec2,
    n_mass: f64,
    jn_acc: f64,
    jn_max: f64,
    bias: f64,
}

impl PinJoint {
    pub fn new(anchor1: m::Vec2, anchor2: m::Vec2) -> Self {
        Self {
            anchor1,
            anchor2,
            dist: 0.0,
            r1: m::Vec2::zero(),
            r2: m::Vec2::zero(),
            n: m::Vec2::zero(),
            n_mass: 0.0,
            jn_acc: 0.0,
            jn_max: 0.0,
            bias: 0.0,
        }
    }
}

impl Solve for PinJoint {
    fn init(&mut self, a: &Body, b: &Body) {
        self.dist = m::dist(a.local_to_world(self.anchor1), b.local_to_world(self.anchor2));
    }

    fn prepare(&mut self, a: &Body, b: &Body, limits: &Limits, dt: f64) -> bool {
        self.r1 = anchor_offset(a, self.anchor1);
        self.r2 = anchor_offset(b, self.anchor2);
        let delta = (b.position() + self.r2) - (a.position() + self.r1);
        let dist = delta.mag();
        self.n = m::normalize_safe(delta);

        self.bias = limits.bias(dist - self.dist, dt);
        self.jn_max = limits.max_impulse(dt);
        match effective_mass(k_scalar(a, b, self.r1, self.r2, self.n)) {
            Some(n_mass) => {
                self.n_mass = n_mass;
                true
            }
            None => {
                self.n_mass = 0.0;
                self.jn_acc = 0.0;
                false
            }
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, coef: f64) {
        self.jn_acc *= coef;
        apply_impulses(a, b, self.r1, self.r2, self.n * self.jn_acc);
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body) {
        let vrn = normal_relative_velocity(a, b, self.r1, self.r2, self.n);
        let jn = (self.bias - vrn) * self.n_mass;
        let jn_old = self.jn_acc;
        self.jn_acc = m::clamp(jn_old + jn, -self.jn_max, self.jn_max);
        apply_impulses(a, b, self.r1, self.r2, self.n * (self.jn_acc - jn_old));
    }

    fn impulse(&self) -> f64 {
        self.jn_acc.abs()
    }
}

//
// Slide
//

/// Keeps the distance between two anchor points within a range, like a chain.
#[derive(Clone, Debug)]
pub struct SlideJoint {
    pub anchor1: m::Vec2,
    pub anchor2: m::Vec2,
    pub min: f64,
    pub max: f64,
    r1: m::Vec2,
    r2: m::Vec2,
    n: m::Vec2,
    n_mass: f64,
    jn_acc: f64,
    jn_max: f64,
    bias: f64,
    at_limit: bool,
}

impl SlideJoint {
    pub fn new(anchor1: m::Vec2, anchor2: m::Vec2, min: f64, max: f64) -> Self {
        Self {
            anchor1,
            anchor2,
            min,
            max,
            r1: m::Vec2::zero(),
            r2: m::Vec2::zero(),
            n: m::Vec2::zero(),
            n_mass: 0.0,
            jn_acc: 0.0,
            jn_max: 0.0,
            bias: 0.0,
            at_limit: false,
        }
    }
}

impl Solve for SlideJoint {
    fn prepare(&mut self, a: &Body, b: &Body, limits: &Limits, dt: f64) -> bool {
        self.r1 = anchor_offset(a, self.anchor1);
        self.r2 = anchor_offset(b, self.anchor2);
        let delta = (b.position() + self.r2) - (a.position() + self.r1);
        let dist = delta.mag();

        // the normal points in the direction that resolves the violated limit
        let (error, n) = if dist > self.max {
            (dist - self.max, m::normalize_safe(delta))
        } else if dist < self.min {
            (self.min - dist, -m::normalize_safe(delta))
        } else {
            (0.0, m::normalize_safe(delta))
        };
        self.n = n;
        self.at_limit = error > 0.0 && n != m::Vec2::zero();
        self.bias = limits.bias(error, dt);
        self.jn_max = limits.max_impulse(dt);
        if !self.at_limit {
            self.jn_acc = 0.0;
        }

        match effective_mass(k_scalar(a, b, self.r1, self.r2, self.n)) {
            Some(n_mass) => {
                self.n_mass = n_mass;
                true
            }
            None => {
                self.n_mass = 0.0;
                self.jn_acc = 0.0;
                self.at_limit = false;
                // a slack joint has nothing to solve anyway
                error <= 0.0
            }
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, coef: f64) {
        self.jn_acc *= coef;
        apply_impulses(a, b, self.r1, self.r2, self.n * self.jn_acc);
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body) {
        if !self.at_limit {
            return;
        }
        let vrn = normal_relative_velocity(a, b, self.r1, self.r2, self.n);
        let jn = (self.bias - vrn) * self.n_mass;
        let jn_old = self.jn_acc;
        // only ever pulls back towards the allowed range
        self.jn_acc = m::clamp(jn_old + jn, -self.jn_max, 0.0);
        apply_impulses(a, b, self.r1, self.r2, self.n * (self.jn_acc - jn_old));
    }

    fn impulse(&self) -> f64 {
        self.jn_acc.abs()
    }
}

//
// Pivot
//

/// Joins two anchor points together, letting the bodies rotate around the shared point.
#[derive(Clone, Debug)]
pub struct PivotJoint {
    pub anchor1: m::Vec2,
    pub anchor2: m::Vec2,
    r1: m::Vec2,
    r2: m::Vec2,
    k1: m::Vec2,
    k2: m::Vec2,
    j_acc: m::Vec2,
    j_max_len: f64,
    bias: m::Vec2,
}

impl PivotJoint {
    pub fn new(anchor1: m::Vec2, anchor2: m::Vec2) -> Self {
        Self {
            anchor1,
            anchor2,
            r1: m::Vec2::zero(),
            r2: m::Vec2::zero(),
            k1: m::Vec2::zero(),
            k2: m::Vec2::zero(),
            j_acc: m::Vec2::zero(),
            j_max_len: 0.0,
            bias: m::Vec2::zero(),
        }
    }
}

impl Solve for PivotJoint {
    fn prepare(&mut self, a: &Body, b: &Body, limits: &Limits, dt: f64) -> bool {
        self.r1 = anchor_offset(a, self.anchor1);
        self.r2 = anchor_offset(b, self.anchor2);
        let delta = (b.position() + self.r2) - (a.position() + self.r1);
        self.bias = limits.bias_vec(delta, dt);
        self.j_max_len = limits.max_impulse(dt);

        match k_tensor(a, b, self.r1, self.r2) {
            Some((k1, k2)) => {
                self.k1 = k1;
                self.k2 = k2;
                true
            }
            None => {
                self.k1 = m::Vec2::zero();
                self.k2 = m::Vec2::zero();
                self.j_acc = m::Vec2::zero();
                false
            }
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, coef: f64) {
        self.j_acc *= coef;
        apply_impulses(a, b, self.r1, self.r2, self.j_acc);
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body) {
        let vr = relative_velocity(a, b, self.r1, self.r2);
        let j = mult_k(self.bias - vr, self.k1, self.k2);
        let j_old = self.j_acc;
        self.j_acc = m::clamp_mag(j_old + j, self.j_max_len);
        apply_impulses(a, b, self.r1, self.r2, self.j_acc - j_old);
    }

    fn impulse(&self) -> f64 {
        self.j_acc.mag()
    }
}

//
// Groove
//

/// Lets an anchor on the second body slide along a line segment (the groove)
/// fixed to the first body, rotating freely.
#[derive(Clone, Debug)]
pub struct GrooveJoint {
    /// Start of the groove in the first body's local coordinates.
    pub groove_a: m::Vec2,
    /// End of the groove in the first body's local coordinates.
    pub groove_b: m::Vec2,
    /// Anchor on the second body.
    pub anchor2: m::Vec2,
    groove_n: m::Vec2,
    groove_tn: m::Vec2,
    // -1 or 1 when the anchor is past an end of the groove, 0 otherwise
    clamp: f64,
    r1: m::Vec2,
    r2: m::Vec2,
    k1: m::Vec2,
    k2: m::Vec2,
    j_acc: m::Vec2,
    j_max_len: f64,
    bias: m::Vec2,
}

impl GrooveJoint {
    pub fn new(groove_a: m::Vec2, groove_b: m::Vec2, anchor2: m::Vec2) -> Self {
        Self {
            groove_a,
            groove_b,
            anchor2,
            groove_n: m::left_normal(m::normalize_safe(groove_b - groove_a)),
            groove_tn: m::Vec2::zero(),
            clamp: 0.0,
            r1: m::Vec2::zero(),
            r2: m::Vec2::zero(),
            k1: m::Vec2::zero(),
            k2: m::Vec2::zero(),
            j_acc: m::Vec2::zero(),
            j_max_len: 0.0,
            bias: m::Vec2::zero(),
        }
    }

    fn constrain(&self, j: m::Vec2) -> m::Vec2 {
        let n = self.groove_tn;
        // past an end the joint can push back along the groove, otherwise only across it
        let j_clamp = if self.clamp * m::cross(j, n) > 0.0 {
            j
        } else {
            m::project(j, n)
        };
        m::clamp_mag(j_clamp, self.j_max_len)
    }
}

impl Solve for GrooveJoint {
    fn prepare(&mut self, a: &Body, b: &Body, limits: &Limits, dt: f64) -> bool {
        // groove in world space
        let ta = a.local_to_world(self.groove_a);
        let tb = a.local_to_world(self.groove_b);
        let n = a.pose.rotation * self.groove_n;
        let d = ta.dot(n);
        self.groove_tn = n;
        self.r2 = anchor_offset(b, self.anchor2);

        // find the closest point on the groove to the anchor
        let td = m::cross(b.position() + self.r2, n);
        if td <= m::cross(ta, n) {
            self.clamp = 1.0;
            self.r1 = ta - a.position();
        } else if td >= m::cross(tb, n) {
            self.clamp = -1.0;
            self.r1 = tb - a.position();
        } else {
            self.clamp = 0.0;
            self.r1 = m::left_normal(n) * -td + n * d - a.position();
        }

        self.j_max_len = limits.max_impulse(dt);
        let delta = (b.position() + self.r2) - (a.position() + self.r1);
        self.bias = limits.bias_vec(delta, dt);

        match k_tensor(a, b, self.r1, self.r2) {
            Some((k1, k2)) => {
                self.k1 = k1;
                self.k2 = k2;
                true
            }
            None => {
                self.k1 = m::Vec2::zero();
                self.k2 = m::Vec2::zero();
                self.j_acc = m::Vec2::zero();
                false
            }
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, coef: f64) {
        self.j_acc *= coef;
        apply_impulses(a, b, self.r1, self.r2, self.j_acc);
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body) {
        let vr = relative_velocity(a, b, self.r1, self.r2);
        let j = mult_k(self.bias - vr, self.k1, self.k2);
        let j_old = self.j_acc;
        self.j_acc = self.constrain(j_old + j);
        apply_impulses(a, b, self.r1, self.r2, self.j_acc - j_old);
    }

    fn impulse(&self) -> f64 {
        self.j_acc.mag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn limits() -> Limits {
        Limits {
            max_force: f64::INFINITY,
            bias_coef: 0.0,
            max_bias: f64::INFINITY,
        }
    }

    fn v(x: f64, y: f64) -> m::Vec2 {
        m::Vec2::new(x, y)
    }

    #[test]
    fn pin_stops_separating_velocity() {
        let mut a = Body::new(1.0, 1.0);
        let mut b = Body::new(1.0, 1.0).with_pose([2.0, 0.0]);
        b.velocity.linear = v(1.0, 0.0);
        let mut pin = PinJoint::new(m::Vec2::zero(), m::Vec2::zero());
        pin.init(&a, &b);
        assert_abs_diff_eq!(pin.dist, 2.0);

        assert!(pin.prepare(&a, &b, &limits(), 0.1));
        pin.apply_cached_impulse(&mut a, &mut b, 1.0);
        for _ in 0..5 {
            pin.apply_impulse(&mut a, &mut b);
        }
        // momentum is shared, relative velocity along the rod removed
        assert_abs_diff_eq!(a.velocity.linear.x, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(b.velocity.linear.x, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(pin.impulse(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn slide_joint_is_slack_within_range() {
        let mut a = Body::new(1.0, 1.0);
        let mut b = Body::new(1.0, 1.0).with_pose([2.0, 0.0]);
        b.velocity.linear = v(1.0, 0.0);
        let mut slide = SlideJoint::new(m::Vec2::zero(), m::Vec2::zero(), 1.0, 3.0);
        assert!(slide.prepare(&a, &b, &limits(), 0.1));
        slide.apply_impulse(&mut a, &mut b);
        assert_eq!(b.velocity.linear.x, 1.0);

        // stretched past the maximum, pulled back but not pushed
        let mut b = Body::new(1.0, 1.0).with_pose([4.0, 0.0]);
        b.velocity.linear = v(1.0, 0.0);
        assert!(slide.prepare(&a, &b, &limits(), 0.1));
        slide.apply_impulse(&mut a, &mut b);
        assert_abs_diff_eq!(b.velocity.linear.x, 0.5, epsilon = 1e-12);
        b.velocity.linear = v(-1.0, 0.0);
        a.velocity.linear = m::Vec2::zero();
        slide.apply_impulse(&mut a, &mut b);
        assert!(b.velocity.linear.x <= -0.5);
    }

    #[test]
    fn pivot_matches_point_velocities() {
        let mut a = Body::new(1.0, 0.5);
        let mut b = Body::new(2.0, 1.0).with_pose([1.0, 0.0]);
        a.velocity.linear = v(0.0, 1.0);
        let mut pivot = PivotJoint::new(v(0.5, 0.0), v(-0.5, 0.0));
        assert!(pivot.prepare(&a, &b, &limits(), 0.1));
        for _ in 0..10 {
            pivot.apply_impulse(&mut a, &mut b);
        }
        let vr = relative_velocity(&a, &b, v(0.5, 0.0), v(-0.5, 0.0));
        assert_abs_diff_eq!(vr.mag(), 0.0, epsilon = 1e-9);

        // two static bodies can't be solved
        assert!(!pivot.prepare(&Body::new_static(), &Body::new_static(), &limits(), 0.1));
    }

    #[test]
    fn groove_allows_sliding_along() {
        let mut a = Body::new_static();
        let mut b = Body::new(1.0, 1.0).with_pose([0.5, 0.0]);
        b.velocity.linear = v(1.0, 1.0);
        let mut groove = GrooveJoint::new(v(0.0, 0.0), v(2.0, 0.0), m::Vec2::zero());
        assert!(groove.prepare(&a, &b, &limits(), 0.1));
        for _ in 0..10 {
            groove.apply_impulse(&mut a, &mut b);
        }
        assert_abs_diff_eq!(b.velocity.linear.x, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(b.velocity.linear.y, 0.0, epsilon = 1e-9);
    }
}
