//! Callbacks for reacting to and modifying collisions.

use super::{Arbiter, EntitySet};
use std::collections::HashMap;

/// Hooks into the lifecycle of a colliding pair of shapes.
///
/// Handlers are registered for a pair of [`collision_type`][super::Shape::collision_type]s
/// with [`HandlerRegistry::insert`]. The arbiter given to each method presents the shapes
/// in the order of the registered types, so for a handler registered with `(PLAYER, WALL)`
/// the first shape of [`Arbiter::shapes`] is always the player.
///
/// All methods have default implementations that accept the collision and do nothing,
/// so implement only the ones you need.
pub trait CollisionHandler {
    /// The shapes started touching on this step.
    /// Return false to ignore the collision until they separate.
    fn begin(&mut self, _arbiter: &mut Arbiter, _entities: &EntitySet) -> bool {
        true
    }

    /// The shapes are touching and their contacts are about to be solved.
    /// Return false to skip the collision on this step only.
    ///
    /// Elasticity, friction and surface velocity of the arbiter
    /// can be overridden here for this step.
    fn pre_solve(&mut self, _arbiter: &mut Arbiter, _entities: &EntitySet) -> bool {
        true
    }

    /// The contacts have been solved and impulses can be read from the arbiter.
    fn post_solve(&mut self, _arbiter: &mut Arbiter, _entities: &EntitySet) {}

    /// The shapes stopped touching, or one of them was removed from the space.
    /// Called for every pair that `begin` was called for,
    /// regardless of what `begin` returned.
    fn separate(&mut self, _arbiter: &mut Arbiter, _entities: &EntitySet) {}
}

/// Handler used for pairs nothing was registered for. Accepts every collision.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHandler;

impl CollisionHandler for DefaultHandler {}

/// Collision handlers of a space, looked up by pairs of collision types.
pub struct HandlerRegistry {
    handlers: HashMap<(u32, u32), Box<dyn CollisionHandler>>,
    default: Box<dyn CollisionHandler>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("pairs", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            default: Box::new(DefaultHandler),
        }
    }
}

impl HandlerRegistry {
    /// Register a handler for collisions between shapes of types `a` and `b`,
    /// replacing any earlier one for the same pair in either order.
    pub fn insert(&mut self, a: u32, b: u32, handler: impl CollisionHandler + 'static) {
        self.handlers.remove(&(b, a));
        self.handlers.insert((a, b), Box::new(handler));
    }

    /// Unregister the handler for a pair of types, in either order.
    /// Returns whether there was one.
    pub fn remove(&mut self, a: u32, b: u32) -> bool {
        self.handlers.remove(&(a, b)).is_some() || self.handlers.remove(&(b, a)).is_some()
    }

    /// Set the handler used for pairs with no registered handler.
    pub fn set_default(&mut self, handler: impl CollisionHandler + 'static) {
        self.default = Box::new(handler);
    }

    /// Whether the registered pair is the reverse of `(a, b)`.
    /// Handlers see shapes in registration order, so arbiters of reversed pairs are swapped.
    pub(crate) fn is_swapped(&self, a: u32, b: u32) -> bool {
        a != b && !self.handlers.contains_key(&(a, b)) && self.handlers.contains_key(&(b, a))
    }

    /// The handler for a pair of types, or the default one.
    pub(crate) fn get_mut(&mut self, a: u32, b: u32) -> &mut dyn CollisionHandler {
        let key = if self.handlers.contains_key(&(a, b)) {
            (a, b)
        } else {
            (b, a)
        };
        match self.handlers.get_mut(&key) {
            Some(h) => h.as_mut(),
            None => self.default.as_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rejector;
    impl CollisionHandler for Rejector {
        fn begin(&mut self, _: &mut Arbiter, _: &EntitySet) -> bool {
            false
        }
    }

    #[test]
    fn lookup_in_either_order() {
        let mut reg = HandlerRegistry::default();
        reg.insert(1, 2, Rejector);
        assert!(!reg.is_swapped(1, 2));
        assert!(reg.is_swapped(2, 1));
        assert!(!reg.is_swapped(3, 3));
        assert!(!reg.is_swapped(1, 3));

        // registering the reverse replaces the earlier one
        reg.insert(2, 1, DefaultHandler);
        assert!(reg.is_swapped(1, 2));
        assert!(reg.remove(1, 2));
        assert!(!reg.remove(2, 1));
        assert!(!reg.is_swapped(1, 2));
    }
}
