use approx::assert_abs_diff_eq;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rigidframe::{
    collision::collide,
    constraint::{DampedSpring, PinJoint},
    mass,
    physics::{BodyKey, ShapeKey},
    Body, Constraint, Shape, Space, SpaceError, SpaceParams, Vec2, Velocity,
};

const DT: f64 = 1.0 / 60.0;

fn space_with_gravity(gravity: f64) -> Space {
    Space::new(SpaceParams {
        gravity: Vec2::new(0.0, gravity),
        ..Default::default()
    })
    .expect("valid params")
}

/// Static box with its top surface at y = 0.
fn add_ground(space: &mut Space) -> ShapeKey {
    let ground = space
        .add_body(Body::new_static().with_pose([0.0, -0.5]))
        .expect("valid body");
    space
        .add_shape(
            ground,
            Shape::new_box(20.0, 1.0)
                .expect("valid box")
                .with_friction(0.8),
        )
        .expect("valid shape")
}

fn add_box(space: &mut Space, pos: [f64; 2]) -> (BodyKey, ShapeKey) {
    let body = space
        .add_body(Body::new(1.0, mass::moment_for_box(1.0, 1.0, 1.0)).with_pose(pos))
        .expect("valid body");
    let shape = space
        .add_shape(
            body,
            Shape::new_box(1.0, 1.0)
                .expect("valid box")
                .with_friction(0.8),
        )
        .expect("valid shape");
    (body, shape)
}

#[test]
fn free_bodies_move_with_their_velocity() {
    let mut space = space_with_gravity(0.0);
    let vel = Velocity {
        linear: Vec2::new(1.5, -2.0),
        angular: 0.0,
    };
    let body = space
        .add_body(Body::new(2.0, 1.0).with_velocity(vel))
        .expect("valid body");
    space.step(0.25);

    let body = space.body(body).expect("body exists");
    assert_eq!(body.velocity, vel);
    assert_eq!(body.position(), Vec2::new(0.375, -0.5));
}

#[test]
fn overlapping_circles() {
    let mut c1 = Shape::circle(1.0, Vec2::zero()).expect("valid circle");
    let mut c2 = Shape::circle(0.5, Vec2::zero()).expect("valid circle");
    c1.update(&rigidframe::PoseBuilder::new().with_position([1.0, 1.0]).build());
    c2.update(&rigidframe::PoseBuilder::new().with_position([1.0, 2.2]).build());

    let contacts = collide(&c1, &c2, 0.0);
    assert_eq!(contacts.len(), 1);
    let contact = contacts.iter().next().expect("one contact");
    assert_abs_diff_eq!(contact.depth(), 0.3, epsilon = 1e-12);
    assert_abs_diff_eq!(contact.normal.x, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(contact.normal.y, 1.0, epsilon = 1e-12);
}

#[test]
fn recentering_keeps_area() {
    let mut verts = vec![
        Vec2::new(1.0, 1.0),
        Vec2::new(4.0, 1.0),
        Vec2::new(5.0, 3.0),
        Vec2::new(2.0, 4.0),
    ];
    let area = mass::area_for_poly(&verts);
    mass::recenter_poly(&mut verts);
    assert_abs_diff_eq!(mass::area_for_poly(&verts), area, epsilon = 1e-12);
    let centroid = mass::centroid_for_poly(&verts);
    assert_abs_diff_eq!(centroid.x, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(centroid.y, 0.0, epsilon = 1e-12);
}

#[test]
fn stacked_boxes_come_to_rest() {
    let mut space = space_with_gravity(-10.0);
    add_ground(&mut space);
    let (lower, _) = add_box(&mut space, [0.0, 0.5]);
    let (upper, _) = add_box(&mut space, [0.0, 1.5]);

    for _ in 0..300 {
        space.step(DT);
    }

    let slop = space.params().collision_slop;
    let lower = space.body(lower).expect("body exists");
    let upper = space.body(upper).expect("body exists");
    for body in [lower, upper] {
        assert!(body.velocity.linear.mag() < 0.05, "{:?}", body.velocity);
        assert!(body.velocity.angular.abs() < 0.05, "{:?}", body.velocity);
    }
    let ground_overlap = -(lower.position().y - 0.5);
    let box_overlap = (lower.position().y + 0.5) - (upper.position().y - 0.5);
    assert!(ground_overlap <= slop + 0.02, "{}", ground_overlap);
    assert!(box_overlap <= slop + 0.02, "{}", box_overlap);
    // and they didn't slide off each other
    assert_abs_diff_eq!(upper.position().x, lower.position().x, epsilon = 0.01);
}

#[test]
fn pin_keeps_distance_under_perturbation() {
    let mut space = space_with_gravity(0.0);
    let a = space.add_body(Body::new(1.0, 1.0)).expect("valid body");
    let b = space
        .add_body(Body::new(1.0, 1.0).with_pose([2.0, 0.0]))
        .expect("valid body");
    space
        .add_constraint(Constraint::new(
            a,
            b,
            PinJoint::new(Vec2::zero(), Vec2::zero()),
        ))
        .expect("valid constraint");

    for i in 0..600 {
        let t = i as f64 * DT;
        let body = space.body_mut(b).expect("body exists");
        body.force = Vec2::new(t.cos(), (2.0 * t).sin()) * 0.5;
        space.step(DT);
    }

    let pa = space.body(a).expect("body exists").position();
    let pb = space.body(b).expect("body exists").position();
    assert_abs_diff_eq!((pb - pa).mag(), 2.0, epsilon = 0.02);
    // the pair as a whole did get pushed around
    assert!(pa.mag() > 0.1);
}

#[test]
fn spring_damping_ignores_iteration_count() {
    let relative_velocity = |iterations: usize| {
        let mut space = Space::new(SpaceParams {
            iterations,
            ..Default::default()
        })
        .expect("valid params");
        let a = space
            .add_body(Body::new(1.0, 1.0).with_velocity(Velocity {
                linear: Vec2::new(-1.0, 0.0),
                angular: 0.0,
            }))
            .expect("valid body");
        let b = space
            .add_body(
                Body::new(1.0, 1.0)
                    .with_pose([2.0, 0.0])
                    .with_velocity(Velocity {
                        linear: Vec2::new(1.0, 0.0),
                        angular: 0.0,
                    }),
            )
            .expect("valid body");
        space
            .add_constraint(Constraint::new(
                a,
                b,
                DampedSpring::new(Vec2::zero(), Vec2::zero(), 2.0, 0.0, 5.0),
            ))
            .expect("valid constraint");
        space.step(DT);
        let va = space.body(a).expect("body exists").velocity.linear.x;
        let vb = space.body(b).expect("body exists").velocity.linear.x;
        vb - va
    };

    let once = relative_velocity(1);
    let many = relative_velocity(10);
    assert_abs_diff_eq!(once, many, epsilon = 1e-9);
    // unit masses on both ends, so the effective inverse mass is 2
    assert_abs_diff_eq!(once, 2.0 * (-5.0 * DT * 2.0).exp(), epsilon = 1e-9);
}

#[test]
fn zero_mass_is_rejected_in_a_running_space() {
    let mut space = space_with_gravity(-10.0);
    let key = space.add_body(Body::new(1.0, 1.0)).expect("valid body");
    space.step(DT);

    let body = space.body_mut(key).expect("body exists");
    assert_eq!(body.set_mass(0.0), Err(SpaceError::InvalidMass));
    assert_eq!(body.set_moment(-2.0), Err(SpaceError::InvalidMass));
    space.step(DT);

    let body = space.body(key).expect("body exists");
    assert!(body.velocity.linear.x.is_finite() && body.velocity.linear.y.is_finite());
    assert_abs_diff_eq!(body.velocity.linear.y, -20.0 * DT, epsilon = 1e-12);
}

#[test]
fn removed_shape_leaves_no_arbiter() {
    let mut space = space_with_gravity(-10.0);
    let ground = add_ground(&mut space);
    let (body, shape) = add_box(&mut space, [0.0, 0.5]);
    for _ in 0..5 {
        space.step(DT);
    }
    assert_eq!(space.contacts_of(shape).count(), 1);
    assert_eq!(space.contacts_of(ground).count(), 1);

    space.remove_shape(shape).expect("shape exists");
    assert_eq!(space.arbiters().count(), 0);
    for _ in 0..5 {
        space.step(DT);
    }
    assert_eq!(space.contacts_of(ground).count(), 0);
    // nothing holds the body up anymore
    assert!(space.body(body).expect("body exists").velocity.linear.y < -0.5);
}

#[test]
fn random_pile_stays_in_container() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut space = space_with_gravity(-10.0);
    let walls = space.static_body();
    for (a, b) in [
        ((-5.0, 0.0), (5.0, 0.0)),
        ((-5.0, 0.0), (-5.0, 20.0)),
        ((5.0, 0.0), (5.0, 20.0)),
    ] {
        let wall = Shape::segment(Vec2::new(a.0, a.1), Vec2::new(b.0, b.1), 0.1)
            .expect("valid segment")
            .with_friction(0.5);
        space.add_shape(walls, wall).expect("valid shape");
    }

    let mut bodies = Vec::new();
    for _ in 0..40 {
        let radius = rng.gen_range(0.2..0.5);
        let pos = [rng.gen_range(-4.0..4.0), rng.gen_range(1.0..8.0)];
        let body = space
            .add_body(
                Body::new(1.0, mass::moment_for_circle(1.0, 0.0, radius, Vec2::zero()))
                    .with_pose(pos),
            )
            .expect("valid body");
        space
            .add_shape(
                body,
                Shape::circle(radius, Vec2::zero())
                    .expect("valid circle")
                    .with_friction(0.5),
            )
            .expect("valid shape");
        bodies.push(body);
    }

    for _ in 0..600 {
        space.step(DT);
    }

    for key in bodies {
        let body = space.body(key).expect("body exists");
        let pos = body.position();
        assert!(pos.x.is_finite() && pos.y.is_finite());
        assert!(pos.x.abs() < 5.0 && pos.y > -0.2, "{:?}", pos);
    }
}

#[cfg(feature = "serde-types")]
#[test]
fn serialized_body_steps_the_same() {
    let mut original = Body::new(2.0, 0.5)
        .with_pose(
            rigidframe::PoseBuilder::new()
                .with_position([1.0, 2.0])
                .with_rotation(rigidframe::Angle::Deg(30.0)),
        )
        .with_velocity(Velocity {
            linear: Vec2::new(0.5, 3.0),
            angular: 1.2,
        });
    original.v_limit = 100.0;
    original.w_limit = 100.0;

    let text = ron::to_string(&original).expect("serializes");
    let restored: Body = ron::from_str(&text).expect("deserializes");
    assert_eq!(restored.velocity, original.velocity);
    assert_eq!(restored.position(), original.position());
    assert_abs_diff_eq!(restored.angle(), original.angle(), epsilon = 1e-12);

    let mut final_states = Vec::new();
    for body in [original, restored] {
        let mut space = space_with_gravity(-10.0);
        let key = space.add_body(body).expect("valid body");
        for _ in 0..60 {
            space.step(DT);
        }
        let body = space.body(key).expect("body exists");
        final_states.push((body.position(), body.angle(), body.velocity));
    }
    let (p1, a1, v1) = final_states[0];
    let (p2, a2, v2) = final_states[1];
    assert_abs_diff_eq!(p1.x, p2.x, epsilon = 1e-9);
    assert_abs_diff_eq!(p1.y, p2.y, epsilon = 1e-9);
    assert_abs_diff_eq!(a1, a2, epsilon = 1e-9);
    assert_eq!(v1, v2);
}
