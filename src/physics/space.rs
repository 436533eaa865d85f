use super::{
    arbiter::{ArbiterState, ContactParams},
    collision::collide,
    hash_set::{hash_pair, HashKey, HashSet},
    spatial_hash::{SpatialHash, SpatialHashParams},
    Arbiter, Body, BodyKey, BodyType, Constraint, ConstraintKey, ConstraintSet, EntitySet,
    HandlerRegistry, Shape, ShapeKey, AABB,
};
use crate::math as m;

use std::sync::atomic::{AtomicU32, Ordering};
use thunderdome as td;

mod query;
pub use query::QueryFilter;

// every space gets its own id so that keys can't be mixed up between them
static NEXT_SPACE_ID: AtomicU32 = AtomicU32::new(0);

/// Global parameters of a [`Space`][self::Space].
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct SpaceParams {
    /// Acceleration applied to every dynamic body.
    pub gravity: m::Vec2,
    /// Fraction of velocity retained after one second. 1.0 means no damping.
    pub damping: f64,
    /// Number of solver iterations per step. Not checked for convergence,
    /// more iterations always cost more and give stiffer results.
    pub iterations: usize,
    /// Extra iterations run before velocity integration that treat contacts as fully elastic
    /// (up to their elasticity). Improves the look of stacks of bouncy objects.
    /// When nonzero, the regular iterations ignore restitution.
    pub elastic_iterations: usize,
    /// Fraction of contact overlap corrected per step.
    pub bias_coef: f64,
    /// Amount of overlap between shapes that is allowed without correcting it.
    /// Some overlap keeps contacts stable between steps.
    pub collision_slop: f64,
    /// Largest speed at which overlap is corrected.
    pub max_bias: f64,
    /// Fraction of the previous step's impulses applied at the start of a step.
    pub warm_start: f64,
    /// Shapes closer than this are considered touching,
    /// which lets fast-moving objects be caught a step before they overlap.
    pub collision_margin: f64,
    /// Spatial hash for shapes attached to static bodies.
    pub static_hash: SpatialHashParams,
    /// Spatial hash for everything else.
    pub active_hash: SpatialHashParams,
}

impl Default for SpaceParams {
    fn default() -> Self {
        Self {
            gravity: m::Vec2::zero(),
            damping: 1.0,
            iterations: 10,
            elastic_iterations: 0,
            bias_coef: 0.1,
            collision_slop: 0.1,
            max_bias: f64::INFINITY,
            warm_start: 1.0,
            collision_margin: 0.0,
            static_hash: SpatialHashParams::default(),
            active_hash: SpatialHashParams::default(),
        }
    }
}

impl SpaceParams {
    fn validate(&self) -> Result<(), SpaceError> {
        let check = |ok: bool, what: &'static str| {
            if ok {
                Ok(())
            } else {
                Err(SpaceError::InvalidParams(what))
            }
        };
        check(
            self.gravity.x.is_finite() && self.gravity.y.is_finite(),
            "gravity must be finite",
        )?;
        check(
            self.damping > 0.0 && self.damping <= 1.0,
            "damping must be in (0, 1]",
        )?;
        check(
            self.bias_coef >= 0.0 && self.bias_coef.is_finite(),
            "bias_coef must be finite and non-negative",
        )?;
        check(
            self.collision_slop >= 0.0 && self.collision_slop.is_finite(),
            "collision_slop must be finite and non-negative",
        )?;
        check(self.max_bias >= 0.0, "max_bias must be non-negative")?;
        check(
            (0.0..=1.0).contains(&self.warm_start),
            "warm_start must be in [0, 1]",
        )?;
        check(
            self.collision_margin >= 0.0 && self.collision_margin.is_finite(),
            "collision_margin must be finite and non-negative",
        )?;
        check(
            self.static_hash.is_valid(),
            "static_hash needs a positive finite cell size and bucket count",
        )?;
        check(
            self.active_hash.is_valid(),
            "active_hash needs a positive finite cell size and bucket count",
        )?;
        Ok(())
    }
}

/// Errors from changing the contents of a [`Space`][self::Space].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SpaceError {
    #[error("invalid space parameters: {0}")]
    InvalidParams(&'static str),
    #[error("key belongs to a different space")]
    ForeignKey,
    #[error("body does not exist in the space")]
    UnknownBody,
    #[error("shape does not exist in the space")]
    UnknownShape,
    #[error("constraint does not exist in the space")]
    UnknownConstraint,
    #[error("constraint attached to the same body twice")]
    SameBody,
    #[error("body is still used by a constraint")]
    BodyInUse,
    #[error("the space's own static body can't be removed")]
    StaticBody,
    #[error("dynamic bodies need a positive mass and moment of inertia")]
    InvalidMass,
}

/// Entry of the arbiter lookup table, keyed by the unordered pair of shapes.
#[derive(Clone, Copy, Debug)]
struct ArbiterEntry {
    shapes: (ShapeKey, ShapeKey),
    index: td::Index,
}

fn arbiter_entry_eq(key: &(ShapeKey, ShapeKey), entry: &ArbiterEntry) -> bool {
    *key == entry.shapes || (key.1, key.0) == entry.shapes
}

#[inline]
fn pair_hash(a: ShapeKey, b: ShapeKey) -> u64 {
    hash_pair(a.hash_value(), b.hash_value())
}

/// The world where bodies live and collide.
///
/// A space owns its bodies, shapes and constraints, which are accessed with keys
/// returned when inserting them. Call [`step`][Self::step] to move the simulation forward.
#[derive(Debug)]
pub struct Space {
    id: u32,
    params: SpaceParams,
    entities: EntitySet,
    constraints: ConstraintSet,
    handlers: HandlerRegistry,
    static_body: BodyKey,
    static_hash: SpatialHash<ShapeKey>,
    active_hash: SpatialHash<ShapeKey>,
    arbiters: td::Arena<Arbiter>,
    arbiter_table: HashSet<(ShapeKey, ShapeKey), ArbiterEntry>,
    // arbiters solved on the current step, in the order they were found
    solved_arbiters: Vec<td::Index>,
    // reused between steps to avoid allocation
    pair_buf: Vec<(ShapeKey, ShapeKey)>,
    stamp: u64,
}

impl Space {
    pub fn new(params: SpaceParams) -> Result<Self, SpaceError> {
        params.validate()?;

        let id = NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed);
        let mut entities = EntitySet::new(id);
        let static_body = entities.insert_body(Body::new_static());
        log::debug!("created space {}", id);

        Ok(Self {
            id,
            params,
            entities,
            constraints: ConstraintSet::new(id),
            handlers: HandlerRegistry::default(),
            static_body,
            static_hash: SpatialHash::new(params.static_hash),
            active_hash: SpatialHash::new(params.active_hash),
            arbiters: td::Arena::new(),
            arbiter_table: HashSet::new(params.active_hash.count, arbiter_entry_eq),
            solved_arbiters: Vec::new(),
            pair_buf: Vec::new(),
            stamp: 0,
        })
    }

    //
    // accessors
    //

    #[inline]
    pub fn params(&self) -> &SpaceParams {
        &self.params
    }

    /// Change the parameters of the space.
    /// Spatial hashes are rebuilt if their parameters changed.
    pub fn set_params(&mut self, params: SpaceParams) -> Result<(), SpaceError> {
        params.validate()?;
        let old = std::mem::replace(&mut self.params, params);
        if (old.static_hash.cell_dim, old.static_hash.count)
            != (params.static_hash.cell_dim, params.static_hash.count)
        {
            self.static_hash.resize(params.static_hash);
        }
        if (old.active_hash.cell_dim, old.active_hash.count)
            != (params.active_hash.cell_dim, params.active_hash.count)
        {
            self.active_hash.resize(params.active_hash);
        }
        Ok(())
    }

    #[inline]
    pub fn set_gravity(&mut self, gravity: m::Vec2) {
        if gravity.x.is_finite() && gravity.y.is_finite() {
            self.params.gravity = gravity;
        } else {
            log::warn!("ignoring non-finite gravity {:?}", gravity);
        }
    }

    /// The body every space has built in, for attaching static geometry and constraints to.
    #[inline]
    pub fn static_body(&self) -> BodyKey {
        self.static_body
    }

    #[inline]
    pub fn entities(&self) -> &EntitySet {
        &self.entities
    }

    /// Mutable access to bodies and shapes.
    ///
    /// Moving a static body this way requires [`rehash_static`][Self::rehash_static]
    /// afterwards for its shapes to collide in their new place.
    #[inline]
    pub fn entities_mut(&mut self) -> &mut EntitySet {
        &mut self.entities
    }

    #[inline]
    pub fn body(&self, key: BodyKey) -> Option<&Body> {
        self.entities.get_body(key)
    }

    #[inline]
    pub fn body_mut(&mut self, key: BodyKey) -> Option<&mut Body> {
        self.entities.get_body_mut(key)
    }

    #[inline]
    pub fn shape(&self, key: ShapeKey) -> Option<&Shape> {
        self.entities.get_shape(key)
    }

    #[inline]
    pub fn shape_mut(&mut self, key: ShapeKey) -> Option<&mut Shape> {
        self.entities.get_shape_mut(key)
    }

    #[inline]
    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    #[inline]
    pub fn constraint_mut(&mut self, key: ConstraintKey) -> Option<&mut Constraint> {
        self.constraints.get_mut(key)
    }

    #[inline]
    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    /// All arbiters currently in the space, i.e. pairs of shapes that were touching
    /// on the last step, including ones ignored by a collision handler.
    pub fn arbiters(&self) -> impl '_ + Iterator<Item = &Arbiter> {
        self.arbiters.iter().map(|(_, arb)| arb)
    }

    /// Arbiters involving the given shape.
    pub fn contacts_of(&self, shape: ShapeKey) -> impl '_ + Iterator<Item = &Arbiter> {
        self.arbiters().filter(move |arb| {
            let (a, b) = arb.solver_shapes();
            a == shape || b == shape
        })
    }

    //
    // adding and removing things
    //

    fn check_body_key(&self, key: BodyKey) -> Result<(), SpaceError> {
        if !self.entities.owns_body(key) {
            Err(SpaceError::ForeignKey)
        } else if self.entities.get_body(key).is_none() {
            Err(SpaceError::UnknownBody)
        } else {
            Ok(())
        }
    }

    pub fn add_body(&mut self, body: Body) -> Result<BodyKey, SpaceError> {
        if body.body_type() == BodyType::Dynamic
            && !(body.mass().value() > 0.0 && body.moment().value() > 0.0)
        {
            return Err(SpaceError::InvalidMass);
        }
        let key = self.entities.insert_body(body);
        log::debug!("added body {:?}", key.index);
        Ok(key)
    }

    /// Remove a body along with all shapes attached to it.
    ///
    /// Constraints attached to the body must be removed first.
    pub fn remove_body(&mut self, key: BodyKey) -> Result<Body, SpaceError> {
        self.check_body_key(key)?;
        if key == self.static_body {
            return Err(SpaceError::StaticBody);
        }
        if self.constraints.references_body(key) {
            return Err(SpaceError::BodyInUse);
        }
        let shapes: Vec<ShapeKey> = self.entities.body_shapes(key).collect();
        for shape in shapes {
            self.remove_shape(shape)?;
        }
        let body = self
            .entities
            .remove_body(key)
            .ok_or(SpaceError::UnknownBody)?;
        log::debug!("removed body {:?}", key.index);
        Ok(body)
    }

    /// Attach a shape to a body in the space.
    pub fn add_shape(&mut self, body: BodyKey, mut shape: Shape) -> Result<ShapeKey, SpaceError> {
        self.check_body_key(body)?;
        let body_ref = self
            .entities
            .get_body(body)
            .ok_or(SpaceError::UnknownBody)?;
        let is_static = body_ref.is_static();
        let aabb = shape.update(&body_ref.pose);

        let key = self.entities.attach_shape(body, shape);
        if is_static {
            self.static_hash.insert(key, aabb);
        } else {
            self.active_hash.insert(key, aabb);
        }
        log::debug!(
            "added {} shape {:?} to body {:?}",
            if is_static { "static" } else { "active" },
            key.index,
            body.index
        );
        Ok(key)
    }

    /// Remove a shape from the space.
    ///
    /// Arbiters the shape was part of are removed as well,
    /// calling [`separate`][super::CollisionHandler::separate] on their handlers.
    pub fn remove_shape(&mut self, key: ShapeKey) -> Result<Shape, SpaceError> {
        if !self.entities.owns_shape(key) {
            return Err(SpaceError::ForeignKey);
        }
        if self.entities.get_shape(key).is_none() {
            return Err(SpaceError::UnknownShape);
        }

        self.drop_arbiters(|arb| {
            let (a, b) = arb.solver_shapes();
            a == key || b == key
        });
        if !self.active_hash.remove(key) {
            self.static_hash.remove(key);
        }
        let shape = self
            .entities
            .remove_shape(key)
            .ok_or(SpaceError::UnknownShape)?;
        log::debug!("removed shape {:?}", key.index);
        Ok(shape)
    }

    pub fn add_constraint(&mut self, mut constraint: Constraint) -> Result<ConstraintKey, SpaceError> {
        let (a, b) = constraint.bodies();
        self.check_body_key(a)?;
        self.check_body_key(b)?;
        if a == b {
            return Err(SpaceError::SameBody);
        }
        match (self.entities.get_body(a), self.entities.get_body(b)) {
            (Some(body_a), Some(body_b)) => constraint.init(body_a, body_b),
            _ => return Err(SpaceError::UnknownBody),
        }
        let key = self.constraints.insert(constraint);
        log::debug!("added constraint {:?}", key.index);
        Ok(key)
    }

    pub fn remove_constraint(&mut self, key: ConstraintKey) -> Result<Constraint, SpaceError> {
        if key.space != self.id {
            return Err(SpaceError::ForeignKey);
        }
        let constraint = self
            .constraints
            .remove(key)
            .ok_or(SpaceError::UnknownConstraint)?;
        log::debug!("removed constraint {:?}", key.index);
        Ok(constraint)
    }

    /// Remove the arbiters matching a predicate, calling `separate` on them.
    fn drop_arbiters(&mut self, mut pred: impl FnMut(&Arbiter) -> bool) {
        let arbiters = &self.arbiters;
        let mut dropped = Vec::new();
        self.arbiter_table.retain(|entry| {
            let drop = arbiters.get(entry.index).map(&mut pred).unwrap_or(true);
            if drop {
                dropped.push(entry.index);
            }
            !drop
        });
        self.solved_arbiters.retain(|idx| !dropped.contains(idx));
        for idx in dropped {
            if let Some(arb) = self.arbiters.remove(idx) {
                self.separate(arb);
            }
        }
    }

    fn separate(&mut self, mut arb: Arbiter) {
        let (s1, s2) = arb.solver_shapes();
        let types = (
            self.entities.get_shape(s1).map(|s| s.collision_type),
            self.entities.get_shape(s2).map(|s| s.collision_type),
        );
        if let (Some(t1), Some(t2)) = types {
            self.handlers
                .get_mut(t1, t2)
                .separate(&mut arb, &self.entities);
        }
        log::debug!("shapes {:?} and {:?} separated", s1.index, s2.index);
    }

    //
    // spatial hash maintenance
    //

    /// Recompute the positions of all static shapes.
    /// Needed after moving a static body.
    pub fn rehash_static(&mut self) {
        let _span = tracy_span!("rehash static", "rehash_static");
        let entities = &mut self.entities;
        for (index, shape) in entities.shapes.iter_mut() {
            let body = entities
                .shape_bodies
                .get(index)
                .and_then(|b| entities.bodies.get(b.index));
            if let Some(body) = body.filter(|b| b.is_static()) {
                shape.update(&body.pose);
            }
        }
        let entities = &self.entities;
        self.static_hash.rehash(|key| {
            entities
                .get_shape(key)
                .map(|s| s.aabb())
                .unwrap_or_else(AABB::zero)
        });
    }

    /// Recompute the position of a single shape, e.g. after moving its body manually.
    pub fn rehash_shape(&mut self, key: ShapeKey) -> Result<(), SpaceError> {
        if !self.entities.owns_shape(key) {
            return Err(SpaceError::ForeignKey);
        }
        let body_key = self
            .entities
            .shape_body(key)
            .ok_or(SpaceError::UnknownShape)?;
        let pose = self
            .entities
            .get_body(body_key)
            .ok_or(SpaceError::UnknownBody)?
            .pose;
        let aabb = self
            .entities
            .get_shape_mut(key)
            .ok_or(SpaceError::UnknownShape)?
            .update(&pose);
        if self.active_hash.contains(key) {
            self.active_hash.update(key, aabb);
        } else {
            self.static_hash.update(key, aabb);
        }
        Ok(())
    }

    pub fn resize_static_hash(&mut self, params: SpatialHashParams) -> Result<(), SpaceError> {
        if !params.is_valid() {
            return Err(SpaceError::InvalidParams(
                "static_hash needs a positive finite cell size and bucket count",
            ));
        }
        self.params.static_hash = params;
        self.static_hash.resize(params);
        Ok(())
    }

    pub fn resize_active_hash(&mut self, params: SpatialHashParams) -> Result<(), SpaceError> {
        if !params.is_valid() {
            return Err(SpaceError::InvalidParams(
                "active_hash needs a positive finite cell size and bucket count",
            ));
        }
        self.params.active_hash = params;
        self.active_hash.resize(params);
        Ok(())
    }

    //
    // stepping
    //

    /// Move the simulation forward by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        let _span = tracy_span!("step", "step");
        if !(dt > 0.0 && dt.is_finite()) {
            log::warn!("ignoring step with invalid timestep {}", dt);
            return;
        }
        self.stamp += 1;

        self.update_active_shapes();
        self.find_pairs(dt);
        self.process_pairs();
        self.drop_stale_arbiters();
        self.solve(dt);
        self.post_solve();
        self.integrate_positions(dt);

        log::trace!(
            "step {}: {} candidate pairs, {} arbiters, {} solved",
            self.stamp,
            self.pair_buf.len(),
            self.arbiters.len(),
            self.solved_arbiters.len(),
        );
    }

    /// Move the world geometry of non-static shapes to where their bodies are.
    fn update_active_shapes(&mut self) {
        let entities = &mut self.entities;
        for (index, shape) in entities.shapes.iter_mut() {
            let body = entities
                .shape_bodies
                .get(index)
                .and_then(|b| entities.bodies.get(b.index));
            if let Some(body) = body.filter(|b| !b.is_static()) {
                shape.update(&body.pose);
            }
        }
    }

    /// Broad phase: gather pairs of shapes whose bounding boxes overlap into `pair_buf`.
    fn find_pairs(&mut self, dt: f64) {
        let _span = tracy_span!("find pairs", "find_pairs");
        let margin = self.params.collision_margin;
        let entities = &self.entities;
        // sweep boxes along the velocity to catch fast movers
        let hash_aabb = move |key: ShapeKey| match (
            entities.get_shape(key),
            entities.get_shape_body(key),
        ) {
            (Some(shape), Some(body)) => shape
                .aabb()
                .swept(body.velocity.linear * dt)
                .padded(margin),
            _ => AABB::zero(),
        };

        self.pair_buf.clear();
        let pairs = &mut self.pair_buf;
        let static_hash = &self.static_hash;
        self.active_hash.each(|key, _| {
            static_hash.query(hash_aabb(key), |other| pairs.push((key, other)));
        });
        self.active_hash
            .rehash_and_query_pairs(hash_aabb, |older, newer| pairs.push((older, newer)));
    }

    /// Narrow phase: update or create arbiters for the pairs found by the broad phase
    /// and run `begin` and `pre_solve` handlers on them.
    fn process_pairs(&mut self) {
        let _span = tracy_span!("collide", "process_pairs");
        self.solved_arbiters.clear();
        let margin = self.params.collision_margin;
        let stamp = self.stamp;

        for &(ka, kb) in &self.pair_buf {
            if !self.can_collide(ka, kb) {
                continue;
            }

            let hash = pair_hash(ka, kb);
            let existing = self.arbiter_table.find(hash, &(ka, kb)).map(|e| e.index);
            // an existing arbiter keeps the shape order it was created with
            let (k1, k2) = match existing.and_then(|idx| self.arbiters.get(idx)) {
                Some(arb) => arb.solver_shapes(),
                None => (ka, kb),
            };
            let (Some(s1), Some(s2)) = (self.entities.get_shape(k1), self.entities.get_shape(k2))
            else {
                continue;
            };
            let contacts = collide(s1, s2, margin);
            if contacts.is_empty() {
                continue;
            }

            let idx = match existing {
                Some(idx) => idx,
                None => {
                    let (Some(b1), Some(b2)) =
                        (self.entities.shape_body(k1), self.entities.shape_body(k2))
                    else {
                        continue;
                    };
                    let idx = self.arbiters.insert(Arbiter::new((k1, k2), (b1, b2), false, stamp));
                    self.arbiter_table.insert_with(hash, &(k1, k2), |_| ArbiterEntry {
                        shapes: (k1, k2),
                        index: idx,
                    });
                    log::debug!("shapes {:?} and {:?} started touching", k1.index, k2.index);
                    idx
                }
            };
            let Some(arb) = self.arbiters.get_mut(idx) else {
                continue;
            };
            arb.update(&contacts, s1, s2, stamp);
            arb.swapped = self
                .handlers
                .is_swapped(s1.collision_type, s2.collision_type);
            if arb.state == ArbiterState::Ignore {
                continue;
            }

            let handler = self.handlers.get_mut(s1.collision_type, s2.collision_type);
            if arb.state == ArbiterState::FirstCollision && !handler.begin(arb, &self.entities) {
                arb.state = ArbiterState::Ignore;
                continue;
            }
            let accepted = handler.pre_solve(arb, &self.entities);
            if accepted && !s1.sensor && !s2.sensor {
                self.solved_arbiters.push(idx);
            } else {
                // post_solve won't be called for this one
                arb.state = ArbiterState::Normal;
            }
        }
    }

    /// Filters that keep pairs out of the narrow phase.
    fn can_collide(&self, ka: ShapeKey, kb: ShapeKey) -> bool {
        let (Some(s1), Some(s2)) = (self.entities.get_shape(ka), self.entities.get_shape(kb))
        else {
            return false;
        };
        let (Some(b1), Some(b2)) = (self.entities.shape_body(ka), self.entities.shape_body(kb))
        else {
            return false;
        };
        if b1 == b2 {
            return false;
        }
        if s1.group != 0 && s1.group == s2.group {
            return false;
        }
        if s1.layers & s2.layers == 0 {
            return false;
        }
        // at least one of the bodies has to be able to respond
        match (self.entities.get_body(b1), self.entities.get_body(b2)) {
            (Some(a), Some(b)) => a.sees_forces() || b.sees_forces(),
            _ => false,
        }
    }

    /// Remove arbiters whose shapes didn't touch on this step.
    fn drop_stale_arbiters(&mut self) {
        let stamp = self.stamp;
        self.drop_arbiters(|arb| arb.stamp != stamp);
    }

    fn solve(&mut self, dt: f64) {
        let params = self.params;
        let contact_params = ContactParams {
            bias_coef: params.bias_coef,
            slop: params.collision_slop,
            max_bias: params.max_bias,
            warm_start: params.warm_start,
        };
        let entities = &mut self.entities;
        let arbiters = &mut self.arbiters;
        let solved = &self.solved_arbiters;
        let constraints = &mut self.constraints;

        let mut degenerate = 0;
        {
            let _span = tracy_span!("prepare", "solve");
            for &idx in solved {
                let Some(arb) = arbiters.get_mut(idx) else {
                    continue;
                };
                let (ka, kb) = arb.solver_bodies();
                if let (Some(a), Some(b)) = (entities.get_body(ka), entities.get_body(kb)) {
                    if !arb.prepare(a, b, &contact_params, dt) {
                        degenerate += 1;
                    }
                }
            }
            for key in &constraints.order {
                let Some(c) = constraints.constraints.get_mut(key.index) else {
                    continue;
                };
                let (ka, kb) = c.bodies();
                if let (Some(a), Some(b)) = (entities.get_body(ka), entities.get_body(kb)) {
                    if !c.prepare(a, b, dt) {
                        degenerate += 1;
                    }
                }
            }
            if degenerate > 0 {
                log::warn!(
                    "{} contacts or constraints had a degenerate effective mass and were skipped",
                    degenerate
                );
            }

            for &idx in solved {
                let Some(arb) = arbiters.get(idx) else {
                    continue;
                };
                let (ka, kb) = arb.solver_bodies();
                if let Some((a, b)) = entities.body_pair_mut(ka, kb) {
                    arb.apply_cached_impulse(a, b);
                }
            }
            for key in &constraints.order {
                let Some(c) = constraints.constraints.get_mut(key.index) else {
                    continue;
                };
                let (ka, kb) = c.bodies();
                if let Some((a, b)) = entities.body_pair_mut(ka, kb) {
                    c.apply_cached_impulse(a, b, params.warm_start);
                }
            }
        }

        for _ in 0..params.elastic_iterations {
            solve_iteration(entities, arbiters, solved, constraints, 1.0);
        }

        {
            let _span = tracy_span!("integrate velocities", "solve");
            let damping = params.damping.powf(dt);
            for (_, body) in entities.bodies.iter_mut() {
                body.integrate_velocity(params.gravity, damping, dt);
            }
        }

        let _span = tracy_span!("iterate", "solve");
        let elastic_coef = if params.elastic_iterations == 0 {
            1.0
        } else {
            0.0
        };
        for _ in 0..params.iterations {
            solve_iteration(entities, arbiters, solved, constraints, elastic_coef);
        }
    }

    fn post_solve(&mut self) {
        for &idx in &self.solved_arbiters {
            let Some(arb) = self.arbiters.get_mut(idx) else {
                continue;
            };
            let (s1, s2) = arb.solver_shapes();
            if let (Some(s1), Some(s2)) = (self.entities.get_shape(s1), self.entities.get_shape(s2))
            {
                self.handlers
                    .get_mut(s1.collision_type, s2.collision_type)
                    .post_solve(arb, &self.entities);
            }
            arb.state = ArbiterState::Normal;
        }
    }

    fn integrate_positions(&mut self, dt: f64) {
        let _span = tracy_span!("integrate positions", "integrate_positions");
        for (_, body) in self.entities.bodies.iter_mut() {
            body.integrate_position(dt);
        }
        // keep shapes in sync with their bodies for queries made between steps
        self.update_active_shapes();
        let entities = &self.entities;
        let margin = self.params.collision_margin;
        self.active_hash.rehash(|key| {
            entities
                .get_shape(key)
                .map(|s| s.aabb().padded(margin))
                .unwrap_or_else(AABB::zero)
        });
    }
}

/// One pass of sequential impulses over contacts and then constraints.
fn solve_iteration(
    entities: &mut EntitySet,
    arbiters: &mut td::Arena<Arbiter>,
    solved: &[td::Index],
    constraints: &mut ConstraintSet,
    elastic_coef: f64,
) {
    for &idx in solved {
        let Some(arb) = arbiters.get_mut(idx) else {
            continue;
        };
        let (ka, kb) = arb.solver_bodies();
        if let Some((a, b)) = entities.body_pair_mut(ka, kb) {
            arb.apply_impulse(a, b, elastic_coef);
        }
    }
    for key in &constraints.order {
        let Some(c) = constraints.constraints.get_mut(key.index) else {
            continue;
        };
        let (ka, kb) = c.bodies();
        if let Some((a, b)) = entities.body_pair_mut(ka, kb) {
            c.apply_impulse(a, b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{CollisionHandler, PinJoint, Velocity};
    use approx::assert_abs_diff_eq;
    use std::{cell::RefCell, rc::Rc};

    fn circle(r: f64) -> Shape {
        Shape::circle(r, m::Vec2::zero()).expect("valid circle")
    }

    #[test]
    fn invalid_params_are_rejected() {
        let bad = [
            SpaceParams {
                damping: 0.0,
                ..Default::default()
            },
            SpaceParams {
                warm_start: 1.5,
                ..Default::default()
            },
            SpaceParams {
                gravity: m::Vec2::new(f64::NAN, 0.0),
                ..Default::default()
            },
            SpaceParams {
                active_hash: SpatialHashParams {
                    cell_dim: 0.0,
                    count: 10,
                },
                ..Default::default()
            },
        ];
        for params in bad {
            assert!(matches!(
                Space::new(params),
                Err(SpaceError::InvalidParams(_))
            ));
        }
        assert!(Space::new(SpaceParams::default()).is_ok());
    }

    #[test]
    fn keys_are_checked() {
        let mut space = Space::new(SpaceParams::default()).expect("valid params");
        let mut other = Space::new(SpaceParams::default()).expect("valid params");
        let body = space.add_body(Body::new(1.0, 1.0)).expect("valid body");
        let other_body = other.add_body(Body::new(1.0, 1.0)).expect("valid body");

        assert!(space.body(other_body).is_none());
        assert_eq!(space.add_shape(other_body, circle(1.0)), Err(SpaceError::ForeignKey));
        assert_eq!(space.remove_body(space.static_body()).err(), Some(SpaceError::StaticBody));
        assert_eq!(
            space.add_body(Body::new(0.0, 1.0)).err(),
            Some(SpaceError::InvalidMass)
        );
        assert_eq!(
            space
                .add_constraint(Constraint::new(
                    body,
                    body,
                    PinJoint::new(m::Vec2::zero(), m::Vec2::zero())
                ))
                .err(),
            Some(SpaceError::SameBody)
        );

        let pin = space
            .add_constraint(Constraint::new(
                space.static_body(),
                body,
                PinJoint::new(m::Vec2::zero(), m::Vec2::zero()),
            ))
            .expect("valid constraint");
        assert_eq!(space.remove_body(body).err(), Some(SpaceError::BodyInUse));
        space.remove_constraint(pin).expect("constraint exists");
        assert_eq!(
            space.remove_constraint(pin).err(),
            Some(SpaceError::UnknownConstraint)
        );
        space.remove_body(body).expect("body exists");
        assert_eq!(space.remove_body(body).err(), Some(SpaceError::UnknownBody));
    }

    #[test]
    fn removing_a_body_removes_its_shapes() {
        let mut space = Space::new(SpaceParams::default()).expect("valid params");
        let body = space.add_body(Body::new(1.0, 1.0)).expect("valid body");
        let s1 = space.add_shape(body, circle(1.0)).expect("valid shape");
        let s2 = space.add_shape(body, circle(0.5)).expect("valid shape");
        assert_eq!(space.entities().body_shapes(body).count(), 2);
        space.remove_body(body).expect("body exists");
        assert!(space.shape(s1).is_none());
        assert!(space.shape(s2).is_none());
        assert_eq!(space.entities().shape_count(), 0);
    }

    #[derive(Default)]
    struct Counts {
        begin: usize,
        pre_solve: usize,
        post_solve: usize,
        separate: usize,
        first_shape_type: Option<u32>,
    }

    struct Recorder {
        counts: Rc<RefCell<Counts>>,
        accept: bool,
    }

    impl CollisionHandler for Recorder {
        fn begin(&mut self, arb: &mut Arbiter, entities: &EntitySet) -> bool {
            let mut counts = self.counts.borrow_mut();
            counts.begin += 1;
            counts.first_shape_type = entities.get_shape(arb.shapes().0).map(|s| s.collision_type);
            self.accept
        }
        fn pre_solve(&mut self, _: &mut Arbiter, _: &EntitySet) -> bool {
            self.counts.borrow_mut().pre_solve += 1;
            true
        }
        fn post_solve(&mut self, _: &mut Arbiter, _: &EntitySet) {
            self.counts.borrow_mut().post_solve += 1;
        }
        fn separate(&mut self, _: &mut Arbiter, _: &EntitySet) {
            self.counts.borrow_mut().separate += 1;
        }
    }

    /// A ball moving slowly into a static floor,
    /// with the handler registered in floor-ball order.
    fn ball_on_floor(handler: Recorder) -> (Space, BodyKey, ShapeKey) {
        let mut space = Space::new(SpaceParams::default()).expect("valid params");
        let floor = Shape::segment(m::Vec2::new(-5.0, 0.0), m::Vec2::new(5.0, 0.0), 0.0)
            .expect("valid segment")
            .with_collision_type(2);
        let static_body = space.static_body();
        space.add_shape(static_body, floor).expect("valid shape");
        space.handlers_mut().insert(2, 1, handler);

        let ball = space
            .add_body(
                Body::new(1.0, 1.0)
                    .with_pose([0.0, 0.95])
                    .with_velocity(Velocity {
                        linear: m::Vec2::new(0.0, -1.0),
                        angular: 0.0,
                    }),
            )
            .expect("valid body");
        let ball_shape = space
            .add_shape(ball, circle(1.0).with_collision_type(1))
            .expect("valid shape");
        (space, ball, ball_shape)
    }

    #[test]
    fn handler_lifecycle() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let (mut space, ball, ball_shape) = ball_on_floor(Recorder {
            counts: counts.clone(),
            accept: true,
        });

        space.step(0.01);
        {
            let c = counts.borrow();
            assert_eq!((c.begin, c.pre_solve, c.post_solve, c.separate), (1, 1, 1, 0));
            // shapes presented in the order of the registered types
            assert_eq!(c.first_shape_type, Some(2));
        }
        let arb = space.contacts_of(ball_shape).next().expect("touching");
        assert_eq!(arb.shapes().1, ball_shape);
        // impulse on the ball points up
        assert!(arb.total_impulse().y > 0.0);
        assert!(arb.contacts().all(|c| c.normal.y > 0.0));
        assert!(space.body(ball).expect("exists").velocity.linear.y > -1e-9);

        space.step(0.01);
        assert_eq!(counts.borrow().begin, 1);
        assert_eq!(counts.borrow().pre_solve, 2);

        // lift the ball away
        let body = space.body_mut(ball).expect("exists");
        body.set_position(m::Vec2::new(0.0, 5.0));
        body.velocity = Velocity::default();
        space.step(0.01);
        assert_eq!(counts.borrow().separate, 1);
        assert_eq!(space.arbiters().count(), 0);
    }

    #[test]
    fn rejected_begin_ignores_until_separation() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let (mut space, ball, ball_shape) = ball_on_floor(Recorder {
            counts: counts.clone(),
            accept: false,
        });
        for _ in 0..3 {
            space.step(0.01);
        }
        {
            let c = counts.borrow();
            assert_eq!((c.begin, c.pre_solve, c.post_solve), (1, 0, 0));
        }
        // passes through the floor untouched
        assert_abs_diff_eq!(
            space.body(ball).expect("exists").velocity.linear.y,
            -1.0,
            epsilon = 1e-12
        );
        let arb = space.contacts_of(ball_shape).next().expect("still tracked");
        assert_eq!(arb.state(), ArbiterState::Ignore);

        space.remove_shape(ball_shape).expect("shape exists");
        assert_eq!(counts.borrow().separate, 1);
        assert_eq!(space.arbiters().count(), 0);
    }

    #[test]
    fn filters() {
        let mut space = Space::new(SpaceParams::default()).expect("valid params");
        let a = space.add_body(Body::new(1.0, 1.0)).expect("valid body");
        let b = space
            .add_body(Body::new(1.0, 1.0).with_pose([0.5, 0.0]))
            .expect("valid body");
        let sa = space
            .add_shape(a, circle(1.0).with_group(3).with_layers(0b01))
            .expect("valid shape");
        let sb = space
            .add_shape(b, circle(1.0).with_group(3).with_layers(0b11))
            .expect("valid shape");
        // same group
        space.step(0.01);
        assert_eq!(space.arbiters().count(), 0);

        space.shape_mut(sb).expect("exists").group = 4;
        space.shape_mut(sb).expect("exists").layers = 0b10;
        // no shared layers
        space.step(0.01);
        assert_eq!(space.arbiters().count(), 0);

        space.shape_mut(sb).expect("exists").layers = 0b01;
        space.step(0.01);
        assert_eq!(space.contacts_of(sa).count(), 1);

        // same body never collides
        let sc = space.add_shape(a, circle(1.0)).expect("valid shape");
        space.step(0.01);
        assert!(space
            .contacts_of(sc)
            .all(|arb| arb.shapes() != (sa, sc) && arb.shapes() != (sc, sa)));
    }

    #[test]
    fn sensors_report_without_pushing() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut space = Space::new(SpaceParams::default()).expect("valid params");
        space.handlers_mut().set_default(Recorder {
            counts: counts.clone(),
            accept: true,
        });
        let sensor = circle(1.0).as_sensor();
        let static_body = space.static_body();
        space.add_shape(static_body, sensor).expect("valid shape");
        let ball = space
            .add_body(Body::new(1.0, 1.0).with_velocity(Velocity {
                linear: m::Vec2::new(1.0, 0.0),
                angular: 0.0,
            }))
            .expect("valid body");
        space.add_shape(ball, circle(0.5)).expect("valid shape");
        space.step(0.01);
        let c = counts.borrow();
        assert_eq!((c.begin, c.pre_solve, c.post_solve), (1, 1, 0));
        assert_eq!(
            space.body(ball).expect("exists").velocity.linear,
            m::Vec2::new(1.0, 0.0)
        );
    }

    #[test]
    fn invalid_step_does_nothing() {
        let mut space = Space::new(SpaceParams::default()).expect("valid params");
        let body = space
            .add_body(Body::new(1.0, 1.0).with_velocity(Velocity {
                linear: m::Vec2::new(1.0, 0.0),
                angular: 0.0,
            }))
            .expect("valid body");
        space.step(0.0);
        space.step(f64::NAN);
        assert_eq!(space.body(body).expect("exists").position(), m::Vec2::zero());
    }
}
