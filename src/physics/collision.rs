pub mod shape_shape;
pub use shape_shape::{collide, Contact, ContactIterator, ContactResult};
