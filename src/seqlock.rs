//! Seqlock: the block-map cache's lock-free read path (Design Note "Seqlock
//! cache"). Modeled as `{sequence_counter, payload}`: writers increment
//! odd-then-write-then-increment-even; readers snapshot the sequence, read
//! the payload, snapshot again, and retry if the two snapshots differ or
//! either is odd. The writer side is serialized by a plain mutex external
//! to this type (the per-inode `cache_writer_mutex` in `inode.rs`); only
//! one writer may call `write()` at a time, but any number of readers may
//! call `read()` concurrently with it.
//!
//! Grounded directly on `read_seqbegin`/`read_seqretry`/`write_seqlock`/
//! `write_sequnlock` as used on `cached_block_seqlocks[i]` in the original
//! source; xv6-style kernels have no per-inode block-map cache to borrow
//! this from, so it is built from first principles here using
//! `core::sync::atomic`.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct Seqlock<T> {
    sequence: AtomicUsize,
    payload: UnsafeCell<T>,
}

// SAFETY: `Seqlock<T>` hands out owned copies of `T` from `read()` and only
// mutates `payload` from a single serialized writer, so sharing across
// threads is sound as long as `T` itself is `Send`.
unsafe impl<T: Send> Sync for Seqlock<T> {}

impl<T: Copy> Seqlock<T> {
    pub const fn new(init: T) -> Self {
        Self {
            sequence: AtomicUsize::new(0),
            payload: UnsafeCell::new(init),
        }
    }

    /// Lock-free optimistic read. Never blocks; spins only while a writer
    /// is mid-update (the writer-held region is a bounded fixed-size copy,
    /// so the spin always converges).
    pub fn read(&self) -> T {
        loop {
            let seq1 = self.sequence.load(Ordering::Acquire);
            if seq1 & 1 != 0 {
                spin_loop();
                continue;
            }
            // SAFETY: odd `seq1` was ruled out above, so no writer holds
            // the lock at this instant; any writer that starts afterward
            // will be caught by the sequence mismatch below.
            let val = unsafe { *self.payload.get() };
            let seq2 = self.sequence.load(Ordering::Acquire);
            if seq1 == seq2 {
                return val;
            }
            spin_loop();
        }
    }

    /// Replaces the payload. Caller must ensure no other `write()` runs
    /// concurrently (serialize with the per-inode cache writer mutex).
    pub fn write(&self, new: T) {
        let seq = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(seq.wrapping_add(1), Ordering::Release);
        // SAFETY: the external writer mutex guarantees exclusivity here.
        unsafe {
            *self.payload.get() = new;
        }
        self.sequence.store(seq.wrapping_add(2), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_after_write_observes_new_value() {
        let lock = Seqlock::new(0u32);
        lock.write(42);
        assert_eq!(lock.read(), 42);
    }

    #[test]
    fn sequential_writes_are_all_observable() {
        let lock = Seqlock::new((0u64, [0u32; 4]));
        for i in 1..8u64 {
            lock.write((i, [i as u32; 4]));
            assert_eq!(lock.read(), (i, [i as u32; 4]));
        }
    }
}
