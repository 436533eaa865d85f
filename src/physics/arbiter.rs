//! Persistent contact state between pairs of shapes.

use super::{
    collision::{Contact, ContactResult},
    constraint::{
        apply_bias_impulses, apply_impulses, effective_mass, k_scalar, relative_velocity,
    },
    Body, BodyKey, Shape, ShapeKey,
};
use crate::math as m;

/// Solver settings for contacts, taken from the space's parameters once per step.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ContactParams {
    pub bias_coef: f64,
    pub slop: f64,
    pub max_bias: f64,
    pub warm_start: f64,
}

/// A contact point along with the solver state it accumulates over its lifetime.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SolverContact {
    pub contact: Contact,
    r1: m::Vec2,
    r2: m::Vec2,
    n_mass: f64,
    t_mass: f64,
    // restitution target velocity
    bounce: f64,
    // speculative contacts may close this much of their gap per second
    approach: f64,
    bias: f64,
    jn_acc: f64,
    jt_acc: f64,
    j_bias: f64,
}

impl SolverContact {
    fn new(contact: Contact) -> Self {
        Self {
            contact,
            r1: m::Vec2::zero(),
            r2: m::Vec2::zero(),
            n_mass: 0.0,
            t_mass: 0.0,
            bounce: 0.0,
            approach: 0.0,
            bias: 0.0,
            jn_acc: 0.0,
            jt_acc: 0.0,
            j_bias: 0.0,
        }
    }
}

/// Where an arbiter is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArbiterState {
    /// The shapes started touching on this step.
    FirstCollision,
    /// The shapes have been touching for more than one step.
    Normal,
    /// A `begin` handler rejected the pair. It's ignored until the shapes separate.
    Ignore,
}

/// The contact record of two touching shapes.
///
/// An arbiter is created when the shapes' bounding boxes overlap and they produce contacts,
/// lives for as long as they keep producing contacts on every step,
/// and carries the impulses solved on the previous step over to the next one.
///
/// Collision handlers receive arbiters with the shapes in the order
/// of the collision types the handler was registered with.
/// Everything that depends on order ([`shapes`][Self::shapes], [`bodies`][Self::bodies],
/// contact normals and total impulses) is presented that way.
#[derive(Clone, Debug)]
pub struct Arbiter {
    shapes: (ShapeKey, ShapeKey),
    bodies: (BodyKey, BodyKey),
    pub(crate) contacts: Vec<SolverContact>,
    /// Restitution coefficient for this step. Can be changed in a `pre_solve` handler.
    pub elasticity: f64,
    /// Friction coefficient for this step. Can be changed in a `pre_solve` handler.
    pub friction: f64,
    /// Relative surface velocity for this step. Can be changed in a `pre_solve` handler.
    pub surface_velocity: m::Vec2,
    pub(crate) swapped: bool,
    pub(crate) state: ArbiterState,
    // step on which contacts were last found
    pub(crate) stamp: u64,
}

impl Arbiter {
    pub(crate) fn new(
        shapes: (ShapeKey, ShapeKey),
        bodies: (BodyKey, BodyKey),
        swapped: bool,
        stamp: u64,
    ) -> Self {
        Self {
            shapes,
            bodies,
            contacts: Vec::with_capacity(2),
            elasticity: 0.0,
            friction: 0.0,
            surface_velocity: m::Vec2::zero(),
            swapped,
            state: ArbiterState::FirstCollision,
            stamp,
        }
    }

    //
    // handler-facing accessors
    //

    /// The two shapes, in handler order.
    #[inline]
    pub fn shapes(&self) -> (ShapeKey, ShapeKey) {
        if self.swapped {
            (self.shapes.1, self.shapes.0)
        } else {
            self.shapes
        }
    }

    /// The bodies of the two shapes, in handler order.
    #[inline]
    pub fn bodies(&self) -> (BodyKey, BodyKey) {
        if self.swapped {
            (self.bodies.1, self.bodies.0)
        } else {
            self.bodies
        }
    }

    /// The shapes in the order they're solved, which normals in the solver refer to.
    #[inline]
    pub(crate) fn solver_shapes(&self) -> (ShapeKey, ShapeKey) {
        self.shapes
    }

    #[inline]
    pub(crate) fn solver_bodies(&self) -> (BodyKey, BodyKey) {
        self.bodies
    }

    #[inline]
    pub fn state(&self) -> ArbiterState {
        self.state
    }

    /// True on the first step the shapes touch.
    #[inline]
    pub fn is_first_contact(&self) -> bool {
        self.state == ArbiterState::FirstCollision
    }

    #[inline]
    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Contacts of the current step, with normals pointing from the first shape
    /// to the second in handler order.
    pub fn contacts(&self) -> impl '_ + Iterator<Item = Contact> {
        let swapped = self.swapped;
        self.contacts.iter().map(move |c| {
            if swapped {
                Contact {
                    normal: -c.contact.normal,
                    ..c.contact
                }
            } else {
                c.contact
            }
        })
    }

    /// Sum of the normal impulses applied on the last step,
    /// as applied to the second shape in handler order.
    pub fn total_impulse(&self) -> m::Vec2 {
        let sum = self
            .contacts
            .iter()
            .fold(m::Vec2::zero(), |acc, c| acc + *c.contact.normal * c.jn_acc);
        if self.swapped {
            -sum
        } else {
            sum
        }
    }

    /// Like [`total_impulse`][Self::total_impulse] but including friction.
    pub fn total_impulse_with_friction(&self) -> m::Vec2 {
        let sum = self.contacts.iter().fold(m::Vec2::zero(), |acc, c| {
            let n = *c.contact.normal;
            acc + n * c.jn_acc + m::left_normal(n) * c.jt_acc
        });
        if self.swapped {
            -sum
        } else {
            sum
        }
    }

    //
    // solver
    //

    /// Replace the contacts with a new set from the narrow phase,
    /// carrying accumulated impulses over to contacts with matching feature ids,
    /// and reset the surface properties from the shapes' materials.
    pub(crate) fn update(&mut self, contacts: &ContactResult, s1: &Shape, s2: &Shape, stamp: u64) {
        let old = std::mem::take(&mut self.contacts);
        for &contact in contacts.iter() {
            let mut new = SolverContact::new(contact);
            if let Some(prev) = old.iter().find(|o| o.contact.id == contact.id) {
                new.jn_acc = prev.jn_acc;
                new.jt_acc = prev.jt_acc;
            }
            self.contacts.push(new);
        }

        self.elasticity = s1.material.elasticity * s2.material.elasticity;
        self.friction = s1.material.friction * s2.material.friction;
        self.surface_velocity = s1.material.surface_velocity - s2.material.surface_velocity;
        self.stamp = stamp;
    }

    /// Compute effective masses, bias and bounce velocities for each contact.
    /// Returns false if any contact had to be made inert because its mass was degenerate.
    pub(crate) fn prepare(&mut self, a: &Body, b: &Body, params: &ContactParams, dt: f64) -> bool {
        let mut ok = true;
        let elasticity = self.elasticity;
        for con in &mut self.contacts {
            let n = *con.contact.normal;
            con.r1 = con.contact.point - a.position();
            con.r2 = con.contact.point - b.position();

            let n_mass = effective_mass(k_scalar(a, b, con.r1, con.r2, n));
            let t_mass = effective_mass(k_scalar(a, b, con.r1, con.r2, m::left_normal(n)));
            match (n_mass, t_mass) {
                (Some(n_mass), Some(t_mass)) => {
                    con.n_mass = n_mass;
                    con.t_mass = t_mass;
                }
                _ => {
                    con.n_mass = 0.0;
                    con.t_mass = 0.0;
                    con.jn_acc = 0.0;
                    con.jt_acc = 0.0;
                    ok = false;
                }
            }

            let dist = con.contact.dist;
            if dist > 0.0 {
                // speculative contact, allowed to close the gap but not bounce
                con.approach = dist / dt;
                con.bias = 0.0;
                con.bounce = 0.0;
            } else {
                con.approach = 0.0;
                con.bias = (params.bias_coef / dt * (-dist - params.slop).max(0.0))
                    .min(params.max_bias);
                con.bounce = relative_velocity(a, b, con.r1, con.r2).dot(n) * elasticity;
            }
            con.j_bias = 0.0;
            con.jn_acc *= params.warm_start;
            con.jt_acc *= params.warm_start;
        }
        ok
    }

    pub(crate) fn apply_cached_impulse(&self, a: &mut Body, b: &mut Body) {
        for con in &self.contacts {
            let n = *con.contact.normal;
            let j = n * con.jn_acc + m::left_normal(n) * con.jt_acc;
            apply_impulses(a, b, con.r1, con.r2, j);
        }
    }

    /// One iteration of the sequential impulse solver.
    ///
    /// `elastic_coef` scales the restitution target:
    /// with separate elastic iterations the regular ones run with zero.
    pub(crate) fn apply_impulse(&mut self, a: &mut Body, b: &mut Body, elastic_coef: f64) {
        let friction = self.friction;
        let surface_vel = self.surface_velocity;
        for con in &mut self.contacts {
            let n = *con.contact.normal;
            let t = m::left_normal(n);
            let (r1, r2) = (con.r1, con.r2);

            // position correction through bias velocities
            let vb1 = a.bias_velocity.point_velocity(r1);
            let vb2 = b.bias_velocity.point_velocity(r2);
            let vbn = (vb2 - vb1).dot(n);
            let jbn = (con.bias - vbn) * con.n_mass;
            let jbn_old = con.j_bias;
            con.j_bias = (jbn_old + jbn).max(0.0);
            apply_bias_impulses(a, b, r1, r2, n * (con.j_bias - jbn_old));

            // normal and friction impulses
            let vr = relative_velocity(a, b, r1, r2);
            let vrn = vr.dot(n);
            let jn = -(con.bounce * elastic_coef + con.approach + vrn) * con.n_mass;
            let jn_old = con.jn_acc;
            // contacts only push
            con.jn_acc = (jn_old + jn).max(0.0);

            let vrt = (vr + surface_vel).dot(t);
            let jt_max = friction * con.jn_acc;
            let jt = -vrt * con.t_mass;
            let jt_old = con.jt_acc;
            con.jt_acc = m::clamp(jt_old + jt, -jt_max, jt_max);

            apply_impulses(
                a,
                b,
                r1,
                r2,
                n * (con.jn_acc - jn_old) + t * (con.jt_acc - jt_old),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{collision::collide, hash_set::HashValue};
    use approx::assert_abs_diff_eq;
    use thunderdome as td;

    fn keys() -> ((ShapeKey, ShapeKey), (BodyKey, BodyKey)) {
        let mut arena = td::Arena::new();
        let i1 = arena.insert(());
        let i2 = arena.insert(());
        (
            (
                ShapeKey {
                    space: 0,
                    index: i1,
                },
                ShapeKey {
                    space: 0,
                    index: i2,
                },
            ),
            (
                BodyKey {
                    space: 0,
                    index: i1,
                },
                BodyKey {
                    space: 0,
                    index: i2,
                },
            ),
        )
    }

    fn params() -> ContactParams {
        ContactParams {
            bias_coef: 0.1,
            slop: 0.0,
            max_bias: f64::INFINITY,
            warm_start: 1.0,
        }
    }

    fn contact(id: HashValue, dist: f64) -> Contact {
        Contact {
            point: m::Vec2::new(0.0, 0.5),
            normal: m::Unit::unit_y(),
            dist,
            id,
        }
    }

    fn circle_at(x: f64, y: f64) -> Shape {
        let mut s = Shape::circle(0.5, m::Vec2::zero())
            .expect("valid circle")
            .with_friction(0.5)
            .with_elasticity(0.5);
        s.update(&m::PoseBuilder::new().with_position([x, y]).build());
        s
    }

    #[test]
    fn update_keeps_impulses_of_matching_features() {
        let (shapes, bodies) = keys();
        let s1 = circle_at(0.0, 0.0);
        let s2 = circle_at(0.0, 0.9);
        let mut arb = Arbiter::new(shapes, bodies, false, 0);
        arb.update(&ContactResult::Two(contact(1, -0.1), contact(2, -0.1)), &s1, &s2, 1);
        arb.contacts[0].jn_acc = 3.0;
        arb.contacts[1].jn_acc = 4.0;

        arb.update(&ContactResult::Two(contact(2, -0.1), contact(7, -0.1)), &s1, &s2, 2);
        assert_eq!(arb.contacts[0].jn_acc, 4.0);
        assert_eq!(arb.contacts[1].jn_acc, 0.0);
        assert_eq!(arb.stamp, 2);
        assert_abs_diff_eq!(arb.friction, 0.25);
        assert_abs_diff_eq!(arb.elasticity, 0.25);
    }

    #[test]
    fn contact_stops_approach_without_pulling() {
        let (shapes, bodies) = keys();
        let s1 = circle_at(0.0, 0.0);
        let s2 = circle_at(0.0, 0.9);
        let mut ground = Body::new_static();
        let mut ball = Body::new(1.0, 1.0).with_pose([0.0, 0.9]);
        ball.velocity.linear = m::Vec2::new(0.0, -2.0);

        let mut arb = Arbiter::new(shapes, bodies, false, 0);
        arb.update(&collide(&s1, &s2, 0.0), &s1, &s2, 1);
        arb.elasticity = 0.0;
        assert!(arb.prepare(&ground, &ball, &params(), 0.1));
        arb.apply_cached_impulse(&mut ground, &mut ball);
        for _ in 0..10 {
            arb.apply_impulse(&mut ground, &mut ball, 1.0);
        }
        assert_abs_diff_eq!(ball.velocity.linear.y, 0.0, epsilon = 1e-9);
        assert!(arb.total_impulse().y > 0.0);
        // overlap of 0.1 is corrected through the bias velocity only
        assert!(ball.bias_velocity.linear.y > 0.0);

        // separating bodies are left alone
        let mut arb = Arbiter::new(shapes, bodies, false, 0);
        arb.update(&collide(&s1, &s2, 0.0), &s1, &s2, 1);
        ball.velocity.linear = m::Vec2::new(0.0, 1.0);
        assert!(arb.prepare(&ground, &ball, &params(), 0.1));
        arb.apply_impulse(&mut ground, &mut ball, 1.0);
        assert_abs_diff_eq!(ball.velocity.linear.y, 1.0);
    }

    #[test]
    fn restitution_and_friction() {
        let (shapes, bodies) = keys();
        let s1 = circle_at(0.0, 0.0);
        let s2 = circle_at(0.0, 1.0);
        let mut ground = Body::new_static();
        let mut ball = Body::new(1.0, f64::INFINITY).with_pose([0.0, 1.0]);
        ball.velocity.linear = m::Vec2::new(1.0, -2.0);

        let mut arb = Arbiter::new(shapes, bodies, false, 0);
        arb.update(&collide(&s1, &s2, 0.0), &s1, &s2, 1);
        arb.elasticity = 1.0;
        arb.friction = 0.1;
        assert!(arb.prepare(&ground, &ball, &params(), 0.1));
        for _ in 0..10 {
            arb.apply_impulse(&mut ground, &mut ball, 1.0);
        }
        assert_abs_diff_eq!(ball.velocity.linear.y, 2.0, epsilon = 1e-9);
        // friction limited by the normal impulse of 4
        assert_abs_diff_eq!(ball.velocity.linear.x, 0.6, epsilon = 1e-9);
    }

    #[test]
    fn swapped_view() {
        let (shapes, bodies) = keys();
        let s1 = circle_at(0.0, 0.0);
        let s2 = circle_at(0.0, 0.9);
        let mut arb = Arbiter::new(shapes, bodies, true, 0);
        arb.update(&collide(&s1, &s2, 0.0), &s1, &s2, 1);
        assert_eq!(arb.shapes(), (shapes.1, shapes.0));
        assert_eq!(arb.bodies(), (bodies.1, bodies.0));
        let c = arb.contacts().next().expect("one contact");
        assert_abs_diff_eq!(c.normal.y, -1.0);
        assert_eq!(arb.solver_shapes(), shapes);
    }

    #[test]
    fn degenerate_contact_is_inert() {
        let (shapes, bodies) = keys();
        let s1 = circle_at(0.0, 0.0);
        let s2 = circle_at(0.0, 0.9);
        let mut a = Body::new_static();
        let mut b = Body::new_static();
        let mut arb = Arbiter::new(shapes, bodies, false, 0);
        arb.update(&collide(&s1, &s2, 0.0), &s1, &s2, 1);
        assert!(!arb.prepare(&a, &b, &params(), 0.1));
        arb.apply_impulse(&mut a, &mut b, 1.0);
        assert_eq!(arb.total_impulse(), m::Vec2::zero());
    }
}
