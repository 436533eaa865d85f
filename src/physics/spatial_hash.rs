//! The spatial hash is responsible for detecting pairs of possibly
//! intersecting objects for further, more accurate narrow phase inspection.

use super::{
    hash_set::{next_prime, HashKey, HashSet},
    AABB,
};
use crate::math as m;

use std::cell::Cell;

/// Parameters for the creation of a spatial hash.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct SpatialHashParams {
    /// Side length of a grid cell. Reducing it reduces unnecessary collision checks
    /// but makes large objects span many cells.
    ///
    /// A likely good value is around the size of a typical object in your scene.
    pub cell_dim: f64,
    /// Expected number of objects, used to size the bucket table.
    /// Rounded up to the next prime in an internal table.
    pub count: usize,
}

impl Default for SpatialHashParams {
    fn default() -> Self {
        Self {
            cell_dim: 2.0,
            count: 1000,
        }
    }
}

impl SpatialHashParams {
    pub(crate) fn is_valid(&self) -> bool {
        self.cell_dim.is_finite() && self.cell_dim > 0.0 && self.count > 0
    }
}

#[derive(Clone, Copy, Debug)]
struct Entry<K> {
    key: K,
    aabb: AABB,
    // too many cells to insert into the grid, kept in a separate list instead
    oversized: bool,
}

#[derive(Clone, Copy, Debug)]
struct Slot<K> {
    key: K,
    idx: usize,
}

fn slot_eq<K: HashKey>(key: &K, slot: &Slot<K>) -> bool {
    *key == slot.key
}

/// An inclusive rectangle of grid cells.
#[derive(Clone, Copy, Debug)]
struct CellRange {
    l: i64,
    b: i64,
    r: i64,
    t: i64,
}

impl CellRange {
    fn cell_count(&self) -> i128 {
        (self.r as i128 - self.l as i128 + 1) * (self.t as i128 - self.b as i128 + 1)
    }
}

/// Bucket of the grid cell at `(x, y)`.
#[inline]
fn bucket_for(x: i64, y: i64, bucket_count: usize) -> usize {
    let hash = (x as u64).wrapping_mul(1640531513) ^ (y as u64).wrapping_mul(2654435789);
    (hash % bucket_count as u64) as usize
}

/// Tracks which objects a query has already reported.
enum Seen {
    /// Objects stamped with this value were seen.
    Stamp(u32),
    /// For queries started from inside another query's callback,
    /// which must leave the outer query's stamps alone.
    List(Vec<usize>),
}

impl Seen {
    fn first_visit(&mut self, timestamps: &[Cell<u32>], idx: usize) -> bool {
        match self {
            Seen::Stamp(ts) => timestamps[idx].replace(*ts) != *ts,
            Seen::List(seen) => {
                if seen.contains(&idx) {
                    false
                } else {
                    seen.push(idx);
                    true
                }
            }
        }
    }
}

/// Marks the hash as being queried until dropped.
struct QueryGuard<'a>(&'a Cell<bool>);

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// A uniform grid hashed into a fixed number of buckets.
///
/// The grid covers all of space: cells far apart may end up in the same bucket,
/// so every hit is additionally checked against the bounding box it was inserted with.
/// The hash is only an index over the objects' bounding boxes and is
/// rebuilt whenever those move.
#[derive(Debug)]
pub struct SpatialHash<K: HashKey> {
    cell_dim: f64,
    buckets: Vec<Vec<usize>>,
    slots: HashSet<K, Slot<K>>,
    entries: Vec<Option<Entry<K>>>,
    free_entries: Vec<usize>,
    oversized: Vec<usize>,
    // timestamping used to keep track of which objects were already checked by a query.
    // Cells so that queries can run through a shared reference.
    last_timestamp: Cell<u32>,
    timestamps: Vec<Cell<u32>>,
    querying: Cell<bool>,
}

impl<K: HashKey> SpatialHash<K> {
    /// Create a new spatial hash. See [`SpatialHashParams`][self::SpatialHashParams]
    /// for explanation.
    ///
    /// Parameters are expected to be valid;
    /// [`Space`][crate::physics::Space] checks them before getting here.
    pub fn new(params: SpatialHashParams) -> Self {
        let bucket_count = next_prime(params.count);
        SpatialHash {
            cell_dim: params.cell_dim,
            buckets: vec![Vec::new(); bucket_count],
            slots: HashSet::new(params.count, slot_eq),
            entries: Vec::with_capacity(params.count),
            free_entries: Vec::new(),
            oversized: Vec::new(),
            last_timestamp: Cell::new(0),
            timestamps: Vec::with_capacity(params.count),
            querying: Cell::new(false),
        }
    }

    #[inline]
    pub fn cell_dim(&self) -> f64 {
        self.cell_dim
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of objects in the hash.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn contains(&self, key: K) -> bool {
        self.slots.contains(key.hash_value(), &key)
    }

    /// The bounding box an object was last inserted with.
    pub fn aabb(&self, key: K) -> Option<AABB> {
        let slot = self.slots.find(key.hash_value(), &key)?;
        self.entries[slot.idx].map(|e| e.aabb)
    }

    /// Change the cell size and bucket count, reinserting every object.
    pub fn resize(&mut self, params: SpatialHashParams) {
        self.cell_dim = params.cell_dim;
        self.buckets = vec![Vec::new(); next_prime(params.count)];
        self.reinsert_all();
    }

    #[inline]
    fn bucket_index(&self, x: i64, y: i64) -> usize {
        bucket_for(x, y, self.buckets.len())
    }

    fn cell_range(&self, aabb: &AABB) -> CellRange {
        // `as` casts saturate, so infinite or NaN boxes still give a (huge) finite range
        CellRange {
            l: (aabb.min.x / self.cell_dim).floor() as i64,
            b: (aabb.min.y / self.cell_dim).floor() as i64,
            r: (aabb.max.x / self.cell_dim).floor() as i64,
            t: (aabb.max.y / self.cell_dim).floor() as i64,
        }
    }

    fn is_oversized(&self, range: &CellRange) -> bool {
        range.cell_count() > self.buckets.len() as i128
    }

    fn next_timestamp(&self) -> u32 {
        if self.last_timestamp.get() == u32::MAX {
            self.reset_timestamps();
        }
        let ts = self.last_timestamp.get() + 1;
        self.last_timestamp.set(ts);
        ts
    }

    fn begin_query(&self) -> (Seen, Option<QueryGuard<'_>>) {
        if self.querying.replace(true) {
            (Seen::List(Vec::new()), None)
        } else {
            let seen = Seen::Stamp(self.next_timestamp());
            (seen, Some(QueryGuard(&self.querying)))
        }
    }

    fn reset_timestamps(&self) {
        self.last_timestamp.set(0);
        for ts in &self.timestamps {
            ts.set(0);
        }
    }

    fn hash_entry(&mut self, idx: usize) {
        let Some(entry) = self.entries[idx] else {
            return;
        };
        let range = self.cell_range(&entry.aabb);
        if self.is_oversized(&range) {
            if let Some(e) = &mut self.entries[idx] {
                e.oversized = true;
            }
            self.oversized.push(idx);
            return;
        }
        if let Some(e) = &mut self.entries[idx] {
            e.oversized = false;
        }
        for x in range.l..=range.r {
            for y in range.b..=range.t {
                let bucket_idx = self.bucket_index(x, y);
                let bucket = &mut self.buckets[bucket_idx];
                // distant cells can share a bucket
                if !bucket.contains(&idx) {
                    bucket.push(idx);
                }
            }
        }
    }

    fn unhash_entry(&mut self, idx: usize) {
        let Some(entry) = self.entries[idx] else {
            return;
        };
        if entry.oversized {
            self.oversized.retain(|&i| i != idx);
            return;
        }
        let range = self.cell_range(&entry.aabb);
        for x in range.l..=range.r {
            for y in range.b..=range.t {
                let bucket_idx = self.bucket_index(x, y);
                self.buckets[bucket_idx].retain(|&i| i != idx);
            }
        }
    }

    fn reinsert_all(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.oversized.clear();
        for idx in 0..self.entries.len() {
            self.hash_entry(idx);
        }
    }

    /// Insert an object into every cell its bounding box touches.
    /// If the object was already in the hash, its bounding box is updated.
    pub fn insert(&mut self, key: K, aabb: AABB) {
        if let Some(slot) = self.slots.find(key.hash_value(), &key) {
            let idx = slot.idx;
            self.unhash_entry(idx);
            if let Some(e) = &mut self.entries[idx] {
                e.aabb = aabb;
            }
            self.hash_entry(idx);
            return;
        }

        let entry = Entry {
            key,
            aabb,
            oversized: false,
        };
        let idx = match self.free_entries.pop() {
            Some(idx) => {
                self.entries[idx] = Some(entry);
                idx
            }
            None => {
                self.entries.push(Some(entry));
                self.timestamps.push(Cell::new(0));
                self.entries.len() - 1
            }
        };
        self.slots
            .insert_with(key.hash_value(), &key, |&key| Slot { key, idx });
        self.hash_entry(idx);
    }

    /// Move a single object to the cells of a new bounding box.
    #[inline]
    pub fn update(&mut self, key: K, aabb: AABB) {
        self.insert(key, aabb);
    }

    /// Remove an object, returning whether it was in the hash.
    pub fn remove(&mut self, key: K) -> bool {
        let Some(slot) = self.slots.remove(key.hash_value(), &key) else {
            return false;
        };
        self.unhash_entry(slot.idx);
        self.entries[slot.idx] = None;
        self.free_entries.push(slot.idx);
        true
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.slots.clear();
        self.entries.clear();
        self.free_entries.clear();
        self.oversized.clear();
        self.timestamps.clear();
        self.last_timestamp.set(0);
    }

    /// Call a function on every object and the bounding box it was inserted with.
    pub fn each(&self, mut f: impl FnMut(K, &AABB)) {
        for entry in self.entries.iter().flatten() {
            f(entry.key, &entry.aabb);
        }
    }

    /// Rebuild the whole hash from scratch with new bounding boxes for every object.
    pub fn rehash(&mut self, mut get_aabb: impl FnMut(K) -> AABB) {
        for entry in self.entries.iter_mut().flatten() {
            entry.aabb = get_aabb(entry.key);
        }
        self.reinsert_all();
    }

    /// Rebuild the hash with new bounding boxes and report every pair of objects
    /// whose boxes overlap, each pair exactly once.
    ///
    /// Objects are inserted one at a time and tested against everything inserted
    /// before them, so the first key of a reported pair is always the older insertion.
    pub fn rehash_and_query_pairs(
        &mut self,
        mut get_aabb: impl FnMut(K) -> AABB,
        mut on_pair: impl FnMut(K, K),
    ) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.oversized.clear();
        self.reset_timestamps();

        for idx in 0..self.entries.len() {
            let Some(entry) = &mut self.entries[idx] else {
                continue;
            };
            entry.aabb = get_aabb(entry.key);
            let (key, aabb) = (entry.key, entry.aabb);

            let ts = self.next_timestamp();
            self.timestamps[idx].set(ts);
            let range = self.cell_range(&aabb);
            let oversized = self.is_oversized(&range);

            let entries = &self.entries;
            let timestamps = &self.timestamps;
            let mut test = |other: usize| {
                if timestamps[other].replace(ts) == ts {
                    return;
                }
                if let Some(other_entry) = &entries[other] {
                    if aabb.intersects(&other_entry.aabb) {
                        on_pair(other_entry.key, key);
                    }
                }
            };

            for &other in &self.oversized {
                test(other);
            }
            if oversized {
                // test against everything in the grid, bucket by bucket
                for bucket in &self.buckets {
                    for &other in bucket {
                        test(other);
                    }
                }
            } else {
                for x in range.l..=range.r {
                    for y in range.b..=range.t {
                        for &other in &self.buckets[self.bucket_index(x, y)] {
                            test(other);
                        }
                    }
                }
            }

            self.hash_entry(idx);
        }
    }

    /// Call a function once for every object whose bounding box overlaps the given one.
    pub fn query(&self, aabb: AABB, mut f: impl FnMut(K)) {
        let (mut seen, _guard) = self.begin_query();
        let range = self.cell_range(&aabb);

        let entries = &self.entries;
        let timestamps = &self.timestamps;
        let mut visit = |idx: usize| {
            if !seen.first_visit(timestamps, idx) {
                return;
            }
            if let Some(entry) = &entries[idx] {
                if aabb.intersects(&entry.aabb) {
                    f(entry.key);
                }
            }
        };

        for &idx in &self.oversized {
            visit(idx);
        }
        if range.cell_count() > self.buckets.len() as i128 {
            // the query covers more cells than there are buckets,
            // cheaper to just look at every bucket once
            for bucket in &self.buckets {
                for &idx in bucket {
                    visit(idx);
                }
            }
            return;
        }
        for x in range.l..=range.r {
            for y in range.b..=range.t {
                for &idx in &self.buckets[self.bucket_index(x, y)] {
                    visit(idx);
                }
            }
        }
    }

    /// Call a function once for every object whose bounding box contains the given point.
    pub fn point_query(&self, point: m::Vec2, mut f: impl FnMut(K)) {
        self.query(AABB { min: point, max: point }, |key| f(key));
    }

    /// Walk the cells along the line segment from `a` to `b` in order,
    /// calling a function on the objects found in each.
    ///
    /// The function returns the fraction along the segment where it hit the object
    /// (or anything >= 1.0 for no hit). Cells beyond the closest hit so far aren't visited.
    pub fn segment_query(&self, a: m::Vec2, b: m::Vec2, mut f: impl FnMut(K) -> f64) {
        let (mut seen, _guard) = self.begin_query();
        let mut t_exit: f64 = 1.0;

        let entries = &self.entries;
        let timestamps = &self.timestamps;
        let seg_aabb = AABB::from_points(a, b);
        let mut visit = |idx: usize, t_exit: &mut f64| {
            if !seen.first_visit(timestamps, idx) {
                return;
            }
            if let Some(entry) = &entries[idx] {
                if seg_aabb.intersects(&entry.aabb) {
                    *t_exit = t_exit.min(f(entry.key));
                }
            }
        };

        for &idx in &self.oversized {
            visit(idx, &mut t_exit);
        }

        let a = a / self.cell_dim;
        let b = b / self.cell_dim;
        let mut cell_x = a.x.floor() as i64;
        let mut cell_y = a.y.floor() as i64;

        let (x_inc, temp_h) = if b.x > a.x {
            (1, a.x.floor() + 1.0 - a.x)
        } else {
            (-1, a.x - a.x.floor())
        };
        let (y_inc, temp_v) = if b.y > a.y {
            (1, a.y.floor() + 1.0 - a.y)
        } else {
            (-1, a.y - a.y.floor())
        };

        // fraction of the segment needed to cross one cell along each axis
        let dt_dx = 1.0 / (b.x - a.x).abs();
        let dt_dy = 1.0 / (b.y - a.y).abs();

        // avoid 0 * inf when starting exactly on a cell boundary of an axis we don't move along
        let mut next_h = if temp_h != 0.0 { temp_h * dt_dx } else { dt_dx };
        let mut next_v = if temp_v != 0.0 { temp_v * dt_dy } else { dt_dy };

        let mut t = 0.0;
        while t < t_exit {
            for &idx in &self.buckets[self.bucket_index(cell_x, cell_y)] {
                visit(idx, &mut t_exit);
            }

            if next_v < next_h {
                cell_y += y_inc;
                t = next_v;
                next_v += dt_dy;
            } else {
                cell_x += x_inc;
                t = next_h;
                next_h += dt_dx;
            }
        }
    }
}
