//! Bucket: the key-sorted collision chain behind one slot of the bucket array.
//!
//! The chain is an owned singly linked list, each entry owned by its predecessor
//! (or by the bucket for the head). Alongside it the bucket keeps a derived index
//! (`keys` and `values`, parallel to the chain) for binary search, and the cached
//! min/max of the stored values. The index is rebuilt by one pass over the chain
//! after every structural change; it must never be observed stale.
//!
//! A bucket is not synchronized on its own. Every call happens while the caller
//! holds the stripe lock that guards it.

use std::iter;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::KeyPosition;

// ================================================================================================
// INTERNAL DATA STRUCTURES
// ================================================================================================

/// Chain entry. The key is fixed at creation, the value is overwritten in place.
struct Entry {
    key: Arc<str>,
    value: i32,
    next: Option<Box<Entry>>,
}

/// Sorted chain plus its derived search index and cached stats
#[derive(Default)]
pub(crate) struct Bucket {
    head: Option<Box<Entry>>,
    // Chain keys in ascending order; shares key allocations with the entries.
    keys: Vec<Arc<str>>,
    // values[i] is the value of the entry whose key is keys[i]
    values: Vec<i32>,
    // (min, max) over the chain, None when empty
    bounds: Option<(i32, i32)>,
}

// ================================================================================================
// BUCKET IMPLEMENTATION
// ================================================================================================

impl Bucket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts `key` or overwrites its value. Returns the previous value on overwrite.
    ///
    /// An overwrite leaves the chain topology alone; a new key is spliced in front of
    /// the first entry with a greater key and the index is rebuilt.
    pub(crate) fn insert(&mut self, key: &str, value: i32) -> Option<i32> {
        match self.find(key) {
            Ok(pos) => {
                let old = std::mem::replace(&mut self.values[pos], value);
                if let Some(entry) = self.link_at(pos).as_deref_mut() {
                    entry.value = value;
                }
                self.bounds = self.values.iter().copied().fold(None, widen);
                Some(old)
            }
            Err(pos) => {
                let link = self.link_at(pos);
                let next = link.take();
                *link = Some(Box::new(Entry {
                    key: Arc::from(key),
                    value,
                    next,
                }));
                self.rebuild();
                None
            }
        }
    }

    /// Unlinks `key` from the chain and returns its value.
    pub(crate) fn delete(&mut self, key: &str) -> Result<i32> {
        let pos = self
            .find(key)
            .map_err(|_| Error::KeyNotFound(key.to_string()))?;

        let link = self.link_at(pos);
        let Some(mut entry) = link.take() else {
            // index claims an entry the chain does not have
            self.rebuild();
            return Err(Error::KeyNotFound(key.to_string()));
        };
        *link = entry.next.take();
        self.rebuild();
        Ok(entry.value)
    }

    pub(crate) fn search(&self, key: &str) -> Result<i32> {
        self.find(key)
            .map(|pos| self.values[pos])
            .map_err(|_| Error::KeyNotFound(key.to_string()))
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Smallest stored value, or None for an empty bucket.
    #[inline(always)]
    pub(crate) fn min(&self) -> Option<i32> {
        self.bounds.map(|(lo, _)| lo)
    }

    /// Largest stored value, or None for an empty bucket.
    #[inline(always)]
    pub(crate) fn max(&self) -> Option<i32> {
        self.bounds.map(|(_, hi)| hi)
    }

    /// Walks the chain in key order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, i32)> + '_ {
        iter::successors(self.head.as_deref(), |entry| entry.next.as_deref())
            .map(|entry| (&*entry.key, entry.value))
    }

    /// Picks a stored key by its rank in the bucket.
    pub(crate) fn sample(&self, position: KeyPosition) -> Option<String> {
        let idx = match position {
            KeyPosition::First => 0,
            KeyPosition::Middle => (self.keys.len() / 2).saturating_sub(1),
            KeyPosition::Last => self.keys.len().checked_sub(1)?,
        };
        self.keys.get(idx).map(|key| key.to_string())
    }

    /// Drops every entry and resets the index.
    pub(crate) fn clear(&mut self) {
        self.unlink_all();
        self.rebuild();
    }

    // ============================================================================================
    // INTERNAL HELPERS
    // ============================================================================================

    /// Binary search over the index: `Ok(pos)` on a hit, `Err(pos)` with the insertion point.
    #[inline(always)]
    fn find(&self, key: &str) -> std::result::Result<usize, usize> {
        self.keys.binary_search_by(|probe| str::cmp(probe, key))
    }

    /// The link that owns the entry at chain position `pos` (`head` for 0).
    ///
    /// For `pos == len` this is the empty link after the tail.
    fn link_at(&mut self, pos: usize) -> &mut Option<Box<Entry>> {
        let mut link = &mut self.head;
        for _ in 0..pos {
            match link {
                Some(entry) => link = &mut entry.next,
                None => break,
            }
        }
        link
    }

    /// Recomputes the index and cached stats with a single pass over the chain.
    fn rebuild(&mut self) {
        self.keys.clear();
        self.values.clear();
        let mut bounds = None;

        let mut cur = self.head.as_deref();
        while let Some(entry) = cur {
            self.keys.push(Arc::clone(&entry.key));
            self.values.push(entry.value);
            bounds = widen(bounds, entry.value);
            cur = entry.next.as_deref();
        }

        self.bounds = bounds;
    }

    /// Frees the chain front to back, so dropping a long chain does not recurse.
    fn unlink_all(&mut self) {
        let mut cur = self.head.take();
        while let Some(mut entry) = cur {
            cur = entry.next.take();
        }
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        self.unlink_all();
    }
}

#[inline(always)]
fn widen(bounds: Option<(i32, i32)>, value: i32) -> Option<(i32, i32)> {
    match bounds {
        Some((lo, hi)) => Some((lo.min(value), hi.max(value))),
        None => Some((value, value)),
    }
}

// ================================================================================================
// TESTS
// ================================================================================================
