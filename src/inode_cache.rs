//! Inode cache: the host-provided "which `Inode` is live for inode number N"
//! registry this driver assumes at its boundary, providing the per-inode
//! mutex that every caller must take after the superblock lock, never
//! before.
//!
//! `SimpleInodeCache` is the crate's own default, used by tests and any
//! host that doesn't already have an inode cache of its own: unbounded, no
//! eviction, a `BTreeMap` keyed by inode number behind one mutex guarding
//! the map structure (not the inodes themselves — each entry is its own
//! `spin::Mutex<Inode>` so unrelated inodes don't serialize on each other).

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use spin::Mutex;

use crate::error::Result;
use crate::inode::Inode;

/// A shared, individually-lockable inode handle.
pub type InodeHandle = Arc<Mutex<Inode>>;

/// Looks up or inserts the in-memory `Inode` for a given inode number.
pub trait InodeCache {
    /// Returns the cached handle for `ino`, inserting `make` freshly-loaded
    /// content if it isn't already resident.
    fn get_or_insert(&self, ino: u32, make: impl FnOnce() -> Result<Inode>) -> Result<InodeHandle>;

    /// Drops the cached handle for `ino`, if any. Used after `put_super`
    /// or, defensively, if a caller wants to force a reload.
    fn evict(&self, ino: u32);
}

pub struct SimpleInodeCache {
    entries: Mutex<BTreeMap<u32, InodeHandle>>,
}

impl SimpleInodeCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for SimpleInodeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeCache for SimpleInodeCache {
    fn get_or_insert(&self, ino: u32, make: impl FnOnce() -> Result<Inode>) -> Result<InodeHandle> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&ino) {
            return Ok(existing.clone());
        }
        let inode = make()?;
        let handle: InodeHandle = Arc::new(Mutex::new(inode));
        entries.insert(ino, handle.clone());
        Ok(handle)
    }

    fn evict(&self, ino: u32) {
        self.entries.lock().remove(&ino);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::RawInode;

    #[test]
    fn repeated_get_or_insert_returns_the_same_handle() {
        let cache = SimpleInodeCache::new();
        let mut calls = 0;
        let h1 = cache
            .get_or_insert(1, || {
                calls += 1;
                Ok(Inode::from_raw(1, &RawInode::zeroed()))
            })
            .unwrap();
        let h2 = cache
            .get_or_insert(1, || {
                calls += 1;
                Ok(Inode::from_raw(1, &RawInode::zeroed()))
            })
            .unwrap();
        assert!(Arc::ptr_eq(&h1, &h2));
        assert_eq!(calls, 1);
    }

    #[test]
    fn evict_forces_a_fresh_load() {
        let cache = SimpleInodeCache::new();
        cache
            .get_or_insert(1, || Ok(Inode::from_raw(1, &RawInode::zeroed())))
            .unwrap();
        cache.evict(1);
        let mut calls = 0;
        cache
            .get_or_insert(1, || {
                calls += 1;
                Ok(Inode::from_raw(1, &RawInode::zeroed()))
            })
            .unwrap();
        assert_eq!(calls, 1);
    }
}
