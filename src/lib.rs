/// Open a tracy profiling zone that ends when the returned value is dropped.
/// Does nothing unless the `tracy` feature is enabled and a client is running.
macro_rules! tracy_span {
    ($name:expr, $fn_name:expr) => {
        tracy_client::Client::running()
            .map(|client| client.span_alloc(Some($name), $fn_name, file!(), line!(), 0))
    };
}

pub mod math;
#[cfg(feature = "serde-types")]
pub use math::serde_pose;
pub use math::{uv, Angle, Pose, PoseBuilder, Rotor2, Unit, Vec2};

pub mod physics;
pub use physics::{
    body::{Body, BodyType, Mass},
    collision::{self, Contact, ContactResult},
    constraint::{self, Constraint, ConstraintKind},
    mass, Arbiter, ArbiterState, BodyKey, CollisionHandler, ConstraintKey, EntitySet,
    HandlerRegistry, Material, QueryFilter, Shape, ShapeError, ShapeKey, ShapeKind, Space,
    SpaceError, SpaceParams, SpatialHashParams, Velocity, AABB,
};
