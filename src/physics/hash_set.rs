//! A chained hash set where the caller supplies the hash and the identity check.
//!
//! Used for the arbiter table, where entries are looked up by an unordered pair
//! of shapes, and for the handle storage of the spatial hash.
//! Unlike `std::collections::HashSet` the stored element doesn't need to be its own key,
//! which lets us intern entries: look up with a light key, create the full element only
//! when it doesn't exist yet, and get back the canonical stored one either way.

pub type HashValue = u64;

const HASH_COEF: HashValue = 3344921057;

/// Keys that can be stored in hash-based containers.
pub trait HashKey: Copy + Eq {
    fn hash_value(&self) -> HashValue;
}

impl HashKey for u32 {
    #[inline]
    fn hash_value(&self) -> HashValue {
        *self as HashValue
    }
}

impl HashKey for usize {
    #[inline]
    fn hash_value(&self) -> HashValue {
        *self as HashValue
    }
}

/// Combine two hash values into one, independent of argument order.
#[inline]
pub fn hash_pair(a: HashValue, b: HashValue) -> HashValue {
    a.wrapping_mul(HASH_COEF) ^ b.wrapping_mul(HASH_COEF)
}

// roughly doubling primes to use as table sizes
const PRIMES: &[usize] = &[
    5, 13, 23, 47, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613,
    393241, 786433, 1572869, 3145739, 6291469, 12582917, 25165843, 50331653, 100663319,
    201326611, 402653189, 805306457, 1610612741,
];

/// Smallest table size from the prime table that is at least `n`.
pub(crate) fn next_prime(n: usize) -> usize {
    PRIMES
        .iter()
        .copied()
        .find(|&p| p >= n)
        .unwrap_or(PRIMES[PRIMES.len() - 1])
}

#[derive(Clone, Debug)]
struct Bin<T> {
    hash: HashValue,
    elt: T,
}

/// A hash set storing elements of type `T`, looked up with keys of type `K`.
///
/// Resizing only happens on insertion, never while iterating
/// (the borrow checker makes sure of that anyway).
#[derive(Clone)]
pub struct HashSet<K: ?Sized, T> {
    eql: fn(&K, &T) -> bool,
    bins: Vec<Vec<Bin<T>>>,
    len: usize,
}

impl<K: ?Sized, T: std::fmt::Debug> std::fmt::Debug for HashSet<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<K: ?Sized, T> HashSet<K, T> {
    /// Create a set with room for about `size` elements before resizing.
    /// `eql` decides whether a stored element matches a lookup key.
    pub fn new(size: usize, eql: fn(&K, &T) -> bool) -> Self {
        let bin_count = next_prime(size.max(1));
        Self {
            eql,
            bins: (0..bin_count).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn bin_index(&self, hash: HashValue) -> usize {
        (hash % self.bins.len() as HashValue) as usize
    }

    fn position(&self, hash: HashValue, key: &K) -> Option<(usize, usize)> {
        let eql = self.eql;
        let idx = self.bin_index(hash);
        self.bins[idx]
            .iter()
            .position(|bin| bin.hash == hash && eql(key, &bin.elt))
            .map(|pos| (idx, pos))
    }

    fn grow(&mut self) {
        let new_count = next_prime(self.bins.len() + 1);
        if new_count <= self.bins.len() {
            // largest table size reached, just keep chaining
            return;
        }
        let old_bins = std::mem::replace(
            &mut self.bins,
            (0..new_count).map(|_| Vec::new()).collect(),
        );
        for bin in old_bins.into_iter().flatten() {
            let idx = self.bin_index(bin.hash);
            self.bins[idx].push(bin);
        }
    }

    /// Insert an element for `key` if none exists yet,
    /// returning the stored element in either case.
    ///
    /// `make` is only called if the key wasn't found.
    pub fn insert_with(
        &mut self,
        hash: HashValue,
        key: &K,
        make: impl FnOnce(&K) -> T,
    ) -> &mut T {
        if let Some((idx, pos)) = self.position(hash, key) {
            return &mut self.bins[idx][pos].elt;
        }

        if self.len >= self.bins.len() {
            self.grow();
        }
        let idx = self.bin_index(hash);
        self.bins[idx].push(Bin {
            hash,
            elt: make(key),
        });
        self.len += 1;
        let last = self.bins[idx].len() - 1;
        &mut self.bins[idx][last].elt
    }

    pub fn find(&self, hash: HashValue, key: &K) -> Option<&T> {
        self.position(hash, key)
            .map(|(idx, pos)| &self.bins[idx][pos].elt)
    }

    pub fn find_mut(&mut self, hash: HashValue, key: &K) -> Option<&mut T> {
        self.position(hash, key)
            .map(move |(idx, pos)| &mut self.bins[idx][pos].elt)
    }

    #[inline]
    pub fn contains(&self, hash: HashValue, key: &K) -> bool {
        self.position(hash, key).is_some()
    }

    /// Remove the element matching `key`, returning it if it existed.
    pub fn remove(&mut self, hash: HashValue, key: &K) -> Option<T> {
        let (idx, pos) = self.position(hash, key)?;
        self.len -= 1;
        // order within a bin doesn't matter
        Some(self.bins[idx].swap_remove(pos).elt)
    }

    /// Keep only the elements for which `f` returns true.
    pub fn retain(&mut self, mut f: impl FnMut(&mut T) -> bool) {
        let mut removed = 0;
        for bin in &mut self.bins {
            let before = bin.len();
            bin.retain_mut(|b| f(&mut b.elt));
            removed += before - bin.len();
        }
        self.len -= removed;
    }

    pub fn clear(&mut self) {
        for bin in &mut self.bins {
            bin.clear();
        }
        self.len = 0;
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = &T> {
        self.bins.iter().flatten().map(|b| &b.elt)
    }

    pub fn iter_mut(&mut self) -> impl '_ + Iterator<Item = &mut T> {
        self.bins.iter_mut().flatten().map(|b| &mut b.elt)
    }
}
