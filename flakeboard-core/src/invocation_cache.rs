// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A bounded cache of recently read invocation records.
//!
//! Purely an optimization: it avoids re-reading the same bundle twice
//! within one parse pass. The only correctness requirement is the capacity
//! bound; eviction order is least-recently-used.

use crate::reader::InvocationRecord;
use camino::{Utf8Path, Utf8PathBuf};
use lru::LruCache;
use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

/// Default number of invocation records kept in memory.
pub const DEFAULT_CAPACITY: usize = 16;

/// A capacity-bounded LRU cache of invocation records, keyed by bundle
/// location. Safe to share across tasks.
#[derive(Debug)]
pub struct InvocationCache {
    inner: Mutex<LruCache<Utf8PathBuf, Arc<InvocationRecord>>>,
}

impl InvocationCache {
    /// Creates a cache holding at most `capacity` records.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Creates a cache with [`DEFAULT_CAPACITY`].
    pub fn with_default_capacity() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CAPACITY).expect("default capacity is non-zero"))
    }

    /// Returns the cached record for `location`, promoting it to
    /// most-recently-used.
    pub fn get(&self, location: &Utf8Path) -> Option<Arc<InvocationRecord>> {
        let mut inner = self.inner.lock().expect("invocation cache lock poisoned");
        inner.get(location).cloned()
    }

    /// Inserts a record, evicting the least-recently-used entry if the
    /// cache is full.
    pub fn insert(&self, location: Utf8PathBuf, record: Arc<InvocationRecord>) {
        let mut inner = self.inner.lock().expect("invocation cache lock poisoned");
        inner.put(location, record);
    }

    /// Returns the number of cached records.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("invocation cache lock poisoned");
        inner.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_record() -> Arc<InvocationRecord> {
        Arc::new(InvocationRecord {
            actions: Vec::new(),
            issues: Vec::new(),
            metadata_ref: None,
        })
    }

    #[test]
    fn capacity_bound_is_enforced() {
        let cache = InvocationCache::new(NonZeroUsize::new(2).unwrap());
        cache.insert("/a.xcresult".into(), empty_record());
        cache.insert("/b.xcresult".into(), empty_record());
        cache.insert("/c.xcresult".into(), empty_record());

        assert_eq!(cache.len(), 2);
        // `/a` was the least recently used entry.
        assert!(cache.get(Utf8Path::new("/a.xcresult")).is_none());
        assert!(cache.get(Utf8Path::new("/b.xcresult")).is_some());
        assert!(cache.get(Utf8Path::new("/c.xcresult")).is_some());
    }

    #[test]
    fn get_promotes_to_most_recently_used() {
        let cache = InvocationCache::new(NonZeroUsize::new(2).unwrap());
        cache.insert("/a.xcresult".into(), empty_record());
        cache.insert("/b.xcresult".into(), empty_record());

        // Touch `/a`, then insert a third entry: `/b` should be evicted.
        assert!(cache.get(Utf8Path::new("/a.xcresult")).is_some());
        cache.insert("/c.xcresult".into(), empty_record());

        assert!(cache.get(Utf8Path::new("/a.xcresult")).is_some());
        assert!(cache.get(Utf8Path::new("/b.xcresult")).is_none());
    }

    #[test]
    fn miss_on_empty_cache() {
        let cache = InvocationCache::with_default_capacity();
        assert!(cache.is_empty());
        assert!(cache.get(Utf8Path::new("/a.xcresult")).is_none());
    }
}
