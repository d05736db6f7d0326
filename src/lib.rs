//! StripedMap: a fixed-capacity concurrent map from string keys to `i32` values.
//!
//! Keys hash into a fixed array of buckets. Each bucket keeps its keys in a sorted
//! chain with a binary-searchable index and cached min/max/length. Buckets are guarded
//! by a smaller pool of stripe locks: bucket `b` is always guarded by stripe `b % L`.
//! Single-key operations lock exactly one stripe for their whole duration.
//!
//! Aggregates (`size`, `min`, `max`) visit the buckets in index order and lock one
//! stripe at a time, so their result is not an atomic snapshot of the whole map:
//! writers may change buckets that were already visited or not yet reached.
//!
//! ```
//! use stripemap::StripedMap;
//!
//! let map = StripedMap::new();
//! map.insert("alice", 10);
//! map.insert("bob", 20);
//! assert_eq!(map.search("bob"), Ok(20));
//! assert_eq!(map.size(), 2);
//! assert_eq!(map.max(), Some(20));
//! assert!(map.delete("carl").is_err());
//! ```

mod bucket;
mod error;

use std::fmt;
use std::hash::BuildHasher;
use std::ops::Range;
use std::sync::LazyLock;
use std::thread;
use std::time::Instant;

use ahash::{AHashMap, RandomState};
use parking_lot::Mutex;

use crate::bucket::Bucket;
pub use crate::error::{Error, Result};

// ================================================================================================
// CONSTANTS AND GLOBAL VARIABLES
// ================================================================================================

/// Bucket count used by `StripedMap::new`
pub const DEFAULT_BUCKETS: usize = 16384;

/// Stripe lock count used by `StripedMap::new`
pub const DEFAULT_STRIPES: usize = 128;

/// Smallest bucket array a capacity hint can produce
const MIN_BUCKETS: usize = 256;

/// Mean chain length targeted when sizing from a capacity hint
const TARGET_CHAIN_LEN: usize = 20;

/// `sample_key` starts probing at `bucket_count / SAMPLE_START_DIVISOR`
const SAMPLE_START_DIVISOR: usize = 5;

// Global cached CPU count to avoid repeated OS queries
static CPU_COUNT: LazyLock<usize> = LazyLock::new(|| {
    thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
});

#[inline(always)]
fn cpu_count() -> usize {
    *CPU_COUNT
}

// ================================================================================================
// CONFIGURATION
// ================================================================================================

/// Fixed geometry of a map, chosen once at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapConfig {
    /// Number of buckets (N). Never changes after construction.
    pub buckets: usize,
    /// Number of stripe locks (L). Must be nonzero and smaller than `buckets`.
    pub stripes: usize,
    /// Worker threads used by `build`.
    pub build_threads: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS,
            stripes: DEFAULT_STRIPES,
            build_threads: cpu_count(),
        }
    }
}

impl MapConfig {
    /// Derives the bucket count from the number of keys expected.
    ///
    /// Targets chains of about 20 entries, with at least 256 buckets.
    pub fn with_capacity(size_hint: usize) -> Self {
        let buckets = (size_hint / TARGET_CHAIN_LEN).max(MIN_BUCKETS);
        Self {
            buckets,
            stripes: DEFAULT_STRIPES.min(buckets / 2),
            build_threads: cpu_count(),
        }
    }

    /// Checks the construction rules.
    pub fn validate(&self) -> Result<()> {
        if self.buckets == 0 {
            return Err(Error::InvalidConfig("bucket count must be nonzero".into()));
        }
        if self.stripes == 0 {
            return Err(Error::InvalidConfig("stripe count must be nonzero".into()));
        }
        if self.stripes >= self.buckets {
            return Err(Error::InvalidConfig(format!(
                "stripe count {} must be smaller than bucket count {}",
                self.stripes, self.buckets
            )));
        }
        if self.build_threads == 0 {
            return Err(Error::InvalidConfig(
                "build thread count must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

/// Which key `sample_key` returns from the bucket it lands on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyPosition {
    /// The smallest key in the bucket
    First,
    /// The key at rank `len / 2 - 1` (rank 0 for a single-entry bucket)
    Middle,
    /// The largest key in the bucket
    Last,
}

// ================================================================================================
// MAIN STRUCTURE
// ================================================================================================

/// Concurrent string -> i32 map over a fixed bucket array and striped locks.
pub struct StripedMap<S = RandomState> {
    // stripes[s] holds buckets s, s + L, s + 2L, ... at local index b / L
    stripes: Box<[Mutex<Box<[Bucket]>>]>,
    bucket_count: usize,
    build_threads: usize,
    hasher: S,
}

// ================================================================================================
// CONSTRUCTORS
// ================================================================================================

impl StripedMap<RandomState> {
    /// Create a map with 16384 buckets and 128 stripes.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    /// Create a map sized for about `size_hint` keys.
    ///
    /// The bucket array is never resized; more keys only make the chains longer.
    pub fn with_capacity(size_hint: usize) -> Self {
        Self::with_capacity_and_hasher(size_hint, RandomState::new())
    }

    /// Create a map with an explicit geometry.
    pub fn with_config(config: MapConfig) -> Result<Self> {
        Self::with_config_and_hasher(config, RandomState::new())
    }
}

impl<S: BuildHasher> StripedMap<S> {
    /// Create a map with the default geometry and the provided hasher.
    ///
    /// The hasher is fixed for the lifetime of the map, so every operation routes a
    /// given key to the same bucket.
    pub fn with_hasher(hasher: S) -> Self {
        Self::from_config(MapConfig::default(), hasher)
    }

    /// Create a map sized for about `size_hint` keys with the provided hasher.
    pub fn with_capacity_and_hasher(size_hint: usize, hasher: S) -> Self {
        Self::from_config(MapConfig::with_capacity(size_hint), hasher)
    }

    /// Create a map with an explicit geometry and hasher.
    pub fn with_config_and_hasher(config: MapConfig, hasher: S) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config(config, hasher))
    }

    // Callers guarantee `config` is valid.
    fn from_config(config: MapConfig, hasher: S) -> Self {
        let MapConfig {
            buckets,
            stripes: stripe_count,
            build_threads,
        } = config;

        let stripes: Box<[Mutex<Box<[Bucket]>>]> = (0..stripe_count)
            .map(|s| {
                let local: Box<[Bucket]> = (s..buckets)
                    .step_by(stripe_count)
                    .map(|_| Bucket::new())
                    .collect();
                Mutex::new(local)
            })
            .collect();

        tracing::debug!(
            buckets,
            stripes = stripe_count,
            build_threads,
            "created striped map"
        );

        Self {
            stripes,
            bucket_count: buckets,
            build_threads,
            hasher,
        }
    }

    // ============================================================================================
    // ROUTING
    // ============================================================================================

    /// Number of buckets (N).
    #[inline(always)]
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Number of stripe locks (L).
    #[inline(always)]
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Bucket that `key` lives in: `hash(key) mod N`.
    #[inline(always)]
    pub fn bucket_index(&self, key: &str) -> usize {
        (self.hasher.hash_one(key) as usize) % self.bucket_count
    }

    /// Stripe guarding `bucket`: `bucket mod L`.
    #[inline(always)]
    pub fn stripe_index(&self, bucket: usize) -> usize {
        bucket % self.stripes.len()
    }

    /// Run `f` on bucket `bucket` while holding its stripe lock.
    #[inline(always)]
    fn with_bucket<R>(&self, bucket: usize, f: impl FnOnce(&mut Bucket) -> R) -> R {
        let mut guard = self.stripes[self.stripe_index(bucket)].lock();
        f(&mut guard[bucket / self.stripes.len()])
    }

    /// Fold over every bucket in index order, holding one stripe lock at a time.
    fn fold_buckets<T>(&self, init: T, mut f: impl FnMut(T, &Bucket) -> T) -> T {
        let mut acc = init;
        for b in 0..self.bucket_count {
            acc = self.with_bucket(b, |bucket| f(acc, &*bucket));
        }
        acc
    }

    // ============================================================================================
    // PUBLIC API METHODS
    // ============================================================================================

    /// Inserts a key-value pair, overwriting the value if the key is present.
    ///
    /// Returns the previous value on overwrite. Never fails.
    pub fn insert(&self, key: &str, value: i32) -> Option<i32> {
        let b = self.bucket_index(key);
        self.with_bucket(b, |bucket| bucket.insert(key, value))
    }

    /// Removes `key` and returns its value.
    ///
    /// Fails with `Error::KeyNotFound` if the key is absent.
    pub fn delete(&self, key: &str) -> Result<i32> {
        let b = self.bucket_index(key);
        let result = self.with_bucket(b, |bucket| bucket.delete(key));
        if result.is_err() {
            tracing::trace!(key, bucket = b, "delete missed");
        }
        result
    }

    /// Returns the value stored for `key`.
    ///
    /// Fails with `Error::KeyNotFound` if the key is absent.
    pub fn search(&self, key: &str) -> Result<i32> {
        let b = self.bucket_index(key);
        self.with_bucket(b, |bucket| bucket.search(key))
    }

    /// Check whether the given key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.search(key).is_ok()
    }

    /// Number of stored keys, summed bucket by bucket.
    ///
    /// Not a snapshot: concurrent writers may be counted in some buckets and not in
    /// others.
    pub fn size(&self) -> usize {
        self.fold_buckets(0, |total, bucket| total + bucket.len())
    }

    /// Alias for `size`.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.size()
    }

    /// Returns true if no bucket holds a key.
    pub fn is_empty(&self) -> bool {
        self.fold_buckets(true, |empty, bucket| empty && bucket.is_empty())
    }

    /// Smallest stored value, or `None` when every bucket is empty.
    ///
    /// Same weak consistency as `size`.
    pub fn min(&self) -> Option<i32> {
        self.fold_buckets(None, |acc, bucket| merge(acc, bucket.min(), i32::min))
    }

    /// Largest stored value, or `None` when every bucket is empty.
    ///
    /// Same weak consistency as `size`.
    pub fn max(&self) -> Option<i32> {
        self.fold_buckets(None, |acc, bucket| merge(acc, bucket.max(), i32::max))
    }

    /// Returns a key that is currently stored, picked from the first non-empty bucket
    /// found by probing from `bucket_count / 5` onward (wrapping around).
    ///
    /// Useful for driving lookups with keys known to be present. Returns `None` if the
    /// map is empty.
    pub fn sample_key(&self, position: KeyPosition) -> Option<String> {
        let n = self.bucket_count;
        let start = n / SAMPLE_START_DIVISOR;
        (0..n)
            .map(|offset| (start + offset) % n)
            .find_map(|b| self.with_bucket(b, |bucket| bucket.sample(position)))
    }

    /// Collects every key-value pair, bucket by bucket.
    ///
    /// Same weak consistency as `size`. Pairs within a bucket come out in key order.
    pub fn snapshot(&self) -> Vec<(String, i32)> {
        self.fold_buckets(Vec::new(), |mut out, bucket| {
            out.extend(bucket.iter().map(|(k, v)| (k.to_string(), v)));
            out
        })
    }

    /// Removes all key-value pairs, one bucket at a time.
    pub fn clear(&self) {
        for b in 0..self.bucket_count {
            self.with_bucket(b, Bucket::clear);
        }
    }

    // ============================================================================================
    // BULK BUILD
    // ============================================================================================

    /// Inserts `pairs` from `build_threads` workers over contiguous chunks.
    ///
    /// Duplicate keys are collapsed to their last occurrence first, so the outcome does
    /// not depend on how the workers interleave.
    fn populate(&self, pairs: Vec<(String, i32)>)
    where
        S: Sync,
    {
        let started = Instant::now();
        let total = pairs.len();

        let latest: AHashMap<String, i32> = pairs.into_iter().collect();
        let pairs: Vec<(String, i32)> = latest.into_iter().collect();
        let threads = self.build_threads.min(pairs.len()).max(1);

        tracing::debug!(pairs = total, distinct = pairs.len(), threads, "building map");

        thread::scope(|scope| {
            let handles: Vec<_> = partition(pairs.len(), threads)
                .into_iter()
                .map(|range| {
                    let chunk = &pairs[range];
                    scope.spawn(move || {
                        for (key, value) in chunk {
                            self.insert(key, *value);
                        }
                    })
                })
                .collect();

            for handle in handles {
                if let Err(payload) = handle.join() {
                    std::panic::resume_unwind(payload);
                }
            }
        });

        tracing::debug!(
            pairs = total,
            threads,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "map built"
        );
    }
}

impl StripedMap<RandomState> {
    /// Builds a map from a batch of pairs using parallel workers.
    ///
    /// The map is sized from `pairs.len()`. On duplicate keys the last pair in input
    /// order wins, exactly as if the pairs were inserted sequentially.
    pub fn build(pairs: Vec<(String, i32)>) -> Self {
        Self::build_with_hasher(pairs, RandomState::new())
    }

    /// Like `build`, with an explicit geometry and worker count.
    pub fn build_with_config(pairs: Vec<(String, i32)>, config: MapConfig) -> Result<Self> {
        let map = Self::with_config(config)?;
        map.populate(pairs);
        Ok(map)
    }
}

impl<S: BuildHasher + Sync> StripedMap<S> {
    /// Like `build`, with the provided hasher.
    pub fn build_with_hasher(pairs: Vec<(String, i32)>, hasher: S) -> Self {
        let map = Self::with_capacity_and_hasher(pairs.len(), hasher);
        map.populate(pairs);
        map
    }
}

// ================================================================================================
// STANDARD TRAIT IMPLEMENTATIONS
// ================================================================================================

impl<S: BuildHasher + Default> Default for StripedMap<S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<S> fmt::Debug for StripedMap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripedMap")
            .field("buckets", &self.bucket_count)
            .field("stripes", &self.stripes.len())
            .field("build_threads", &self.build_threads)
            .finish_non_exhaustive()
    }
}

impl<S: BuildHasher + Default> FromIterator<(String, i32)> for StripedMap<S> {
    fn from_iter<T: IntoIterator<Item = (String, i32)>>(iter: T) -> Self {
        let map = StripedMap::with_hasher(S::default());
        for (k, v) in iter {
            let _ = map.insert(&k, v);
        }
        map
    }
}

impl<S: BuildHasher> Extend<(String, i32)> for StripedMap<S> {
    fn extend<T: IntoIterator<Item = (String, i32)>>(&mut self, iter: T) {
        for (k, v) in iter {
            let _ = self.insert(&k, v);
        }
    }
}

// ================================================================================================
// UTILITY FUNCTIONS
// ================================================================================================

/// Split `len` items into `parts` contiguous ranges; the last range takes the remainder.
fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let chunk_size = len / parts;
    (0..parts)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i == parts - 1 {
                len
            } else {
                start + chunk_size
            };
            start..end
        })
        .collect()
}

/// Fold one bucket's optional stat into the running result; empty buckets are skipped.
#[inline(always)]
fn merge(acc: Option<i32>, stat: Option<i32>, pick: fn(i32, i32) -> i32) -> Option<i32> {
    match (acc, stat) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, b) => a.or(b),
    }
}
