use super::{
    hash_set::{HashKey, HashValue},
    Body, Shape,
};

use thunderdome as td;

/// Key type to look up a body stored in a [`Space`][super::Space].
///
/// Keys remember which space created them,
/// so a key from one space never finds anything in another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BodyKey {
    pub(super) space: u32,
    pub(super) index: td::Index,
}

impl BodyKey {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    /// Useful for creating your own mappings from bodies to other things.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.index
    }
}

/// Key type to look up a shape stored in a [`Space`][super::Space].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    pub(super) space: u32,
    pub(super) index: td::Index,
}

impl ShapeKey {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.index
    }
}

impl HashKey for ShapeKey {
    #[inline]
    fn hash_value(&self) -> HashValue {
        self.index.to_bits()
    }
}

/// Bodies and shapes stored in a space.
///
/// Each shape is attached to exactly one body.
/// Insertion and removal go through the [`Space`][super::Space],
/// which keeps its spatial indices in sync.
#[derive(Debug)]
pub struct EntitySet {
    space: u32,
    pub(super) bodies: td::Arena<Body>,
    pub(super) shapes: td::Arena<Shape>,
    // parallel to `shapes`, filled with insert_at using the shape's index
    pub(super) shape_bodies: td::Arena<BodyKey>,
}

impl EntitySet {
    pub(super) fn new(space: u32) -> Self {
        Self {
            space,
            bodies: td::Arena::new(),
            shapes: td::Arena::new(),
            shape_bodies: td::Arena::new(),
        }
    }

    /// Whether the key was created by this set's space.
    #[inline]
    pub(super) fn owns_body(&self, key: BodyKey) -> bool {
        key.space == self.space
    }

    #[inline]
    pub(super) fn owns_shape(&self, key: ShapeKey) -> bool {
        key.space == self.space
    }

    #[inline]
    pub(super) fn body_key(&self, index: td::Index) -> BodyKey {
        BodyKey {
            space: self.space,
            index,
        }
    }

    #[inline]
    pub(super) fn shape_key(&self, index: td::Index) -> ShapeKey {
        ShapeKey {
            space: self.space,
            index,
        }
    }

    /// Access a [`Body`][super::Body] in the space, if it still exists.
    #[inline]
    pub fn get_body(&self, body: BodyKey) -> Option<&Body> {
        if !self.owns_body(body) {
            return None;
        }
        self.bodies.get(body.index)
    }

    /// Mutably access a [`Body`][super::Body] in the space, if it still exists.
    #[inline]
    pub fn get_body_mut(&mut self, body: BodyKey) -> Option<&mut Body> {
        if !self.owns_body(body) {
            return None;
        }
        self.bodies.get_mut(body.index)
    }

    /// Access a [`Shape`][super::Shape] in the space, if it still exists.
    #[inline]
    pub fn get_shape(&self, shape: ShapeKey) -> Option<&Shape> {
        if !self.owns_shape(shape) {
            return None;
        }
        self.shapes.get(shape.index)
    }

    /// Mutably access a [`Shape`][super::Shape] in the space, if it still exists.
    ///
    /// Only the shape's surface and filtering properties can be changed this way,
    /// its geometry is fixed at creation.
    #[inline]
    pub fn get_shape_mut(&mut self, shape: ShapeKey) -> Option<&mut Shape> {
        if !self.owns_shape(shape) {
            return None;
        }
        self.shapes.get_mut(shape.index)
    }

    /// The body a shape is attached to, if the shape still exists.
    #[inline]
    pub fn shape_body(&self, shape: ShapeKey) -> Option<BodyKey> {
        if !self.owns_shape(shape) {
            return None;
        }
        self.shape_bodies.get(shape.index).copied()
    }

    /// Access the Body connected to the given Shape, if both still exist.
    #[inline]
    pub fn get_shape_body(&self, shape: ShapeKey) -> Option<&Body> {
        self.shape_body(shape).and_then(|b| self.bodies.get(b.index))
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Iterate over all bodies, including the space's static body.
    pub fn bodies(&self) -> impl '_ + Iterator<Item = (BodyKey, &Body)> {
        self.bodies
            .iter()
            .map(move |(index, body)| (self.body_key(index), body))
    }

    pub fn bodies_mut(&mut self) -> impl '_ + Iterator<Item = (BodyKey, &mut Body)> {
        let space = self.space;
        self.bodies
            .iter_mut()
            .map(move |(index, body)| (BodyKey { space, index }, body))
    }

    pub fn shapes(&self) -> impl '_ + Iterator<Item = (ShapeKey, &Shape)> {
        self.shapes
            .iter()
            .map(move |(index, shape)| (self.shape_key(index), shape))
    }

    /// Keys of the shapes attached to a body.
    pub fn body_shapes(&self, body: BodyKey) -> impl '_ + Iterator<Item = ShapeKey> {
        self.shape_bodies
            .iter()
            .filter(move |(_, b)| **b == body)
            .map(move |(index, _)| self.shape_key(index))
    }

    //
    // mutation, only through the Space
    //

    pub(super) fn insert_body(&mut self, body: Body) -> BodyKey {
        let index = self.bodies.insert(body);
        self.body_key(index)
    }

    /// Attach a shape to a body that is known to exist.
    pub(super) fn attach_shape(&mut self, body: BodyKey, shape: Shape) -> ShapeKey {
        let index = self.shapes.insert(shape);
        self.shape_bodies.insert_at(index, body);
        self.shape_key(index)
    }

    pub(super) fn remove_body(&mut self, body: BodyKey) -> Option<Body> {
        if !self.owns_body(body) {
            return None;
        }
        self.bodies.remove(body.index)
    }

    pub(super) fn remove_shape(&mut self, shape: ShapeKey) -> Option<Shape> {
        if !self.owns_shape(shape) {
            return None;
        }
        self.shape_bodies.remove(shape.index);
        self.shapes.remove(shape.index)
    }

    /// Mutable access to both bodies of a pair at once.
    /// None if either is missing or they're the same body.
    pub(super) fn body_pair_mut(
        &mut self,
        a: BodyKey,
        b: BodyKey,
    ) -> Option<(&mut Body, &mut Body)> {
        if a.index == b.index || !self.owns_body(a) || !self.owns_body(b) {
            return None;
        }
        match self.bodies.get2_mut(a.index, b.index) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }
}
