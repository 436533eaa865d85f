use super::Constraint;

use thunderdome as td;

/// Key type to look up a constraint stored in a [`Space`][super::Space].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConstraintKey {
    pub(super) space: u32,
    pub(super) index: td::Index,
}

/// Constraints stored in a space, solved in the order they were inserted.
#[derive(Clone, Debug)]
pub struct ConstraintSet {
    space: u32,
    pub(super) constraints: td::Arena<Constraint>,
    pub(super) order: Vec<ConstraintKey>,
}

impl ConstraintSet {
    #[inline]
    pub(super) fn new(space: u32) -> Self {
        Self {
            space,
            constraints: td::Arena::new(),
            order: Vec::new(),
        }
    }

    #[inline]
    pub(super) fn insert(&mut self, constraint: Constraint) -> ConstraintKey {
        let key = ConstraintKey {
            space: self.space,
            index: self.constraints.insert(constraint),
        };
        self.order.push(key);
        key
    }

    /// Access a Constraint in the space, if it still exists.
    #[inline]
    pub fn get(&self, key: ConstraintKey) -> Option<&Constraint> {
        if key.space != self.space {
            return None;
        }
        self.constraints.get(key.index)
    }

    /// Mutably access a Constraint in the space, if it still exists.
    #[inline]
    pub fn get_mut(&mut self, key: ConstraintKey) -> Option<&mut Constraint> {
        if key.space != self.space {
            return None;
        }
        self.constraints.get_mut(key.index)
    }

    /// Remove a constraint, returning it if it still existed.
    pub(super) fn remove(&mut self, key: ConstraintKey) -> Option<Constraint> {
        if key.space != self.space {
            return None;
        }
        let removed = self.constraints.remove(key.index)?;
        // keep the solving order of the rest
        self.order.retain(|k| *k != key);
        Some(removed)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Iterate over constraints in solving order.
    pub fn iter(&self) -> impl '_ + Iterator<Item = (ConstraintKey, &Constraint)> {
        self.order
            .iter()
            .filter_map(move |k| self.constraints.get(k.index).map(|c| (*k, c)))
    }

    /// Whether any constraint is attached to the given body.
    pub(super) fn references_body(&self, body: super::BodyKey) -> bool {
        self.constraints
            .iter()
            .any(|(_, c)| c.bodies.0 == body || c.bodies.1 == body)
    }
}
