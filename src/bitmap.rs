//! Bitmap allocator: two independent allocators (inode, data-block), each
//! keyed by its own mutex: `inode_bitmap_lock` is always taken before
//! `data_bitmap_lock`, never reversed.
//!
//! First-fit scan order is `(block, byte, bit)`, LSB-first within a byte.
//! The original source's loop computes
//! the same kind of `(block, word, bit)` index but iterates a word count
//! equal to the *byte* size of a block, which over- or under-reads past a
//! block boundary depending on word width — an artifact of the C source's
//! `unsigned long` assumption, not a behavior this driver reproduces; the
//! corrected, portable formula below (each block contributes exactly
//! `BLOCK_SIZE * 8` contiguous bit positions) is used instead, per
//! DESIGN.md.

use crate::device::{BlockDevice, Buffer};
use crate::error::{Error, Result};
use crate::layout::BLOCK_SIZE;

/// One of the two bitmap regions described by the superblock.
pub struct BitmapAllocator {
    block_start: u32,
    block_count: u32,
    lock: spin::Mutex<()>,
}

/// A single bit claimed from a `BitmapAllocator`.
///
/// Holds the dirty buffer that recorded the claim and the position of the
/// bit within it, so the claim can be rolled back (bit cleared, buffer
/// dropped unsynced) or committed (buffer flushed) by the caller — the
/// allocator itself never decides which; that is the orchestrator's job.
pub struct BitClaim {
    /// 0-based position of the claimed bit within the whole bitmap region.
    pub index: u32,
    pub buffer: Buffer,
    byte_index: usize,
    bit: u8,
}

impl BitClaim {
    /// Clears the bit and discards the buffer without writing it back,
    /// restoring the region to exactly its pre-claim on-disk state.
    pub fn rollback(mut self) {
        self.buffer.data_mut()[self.byte_index] &= !(1 << self.bit);
        // Buffer is dropped here without a sync(): nothing was ever
        // written to the device, so no explicit "undo" write is needed.
    }

    /// Flushes the claim to the device, making it durable.
    pub fn commit(mut self, dev: &dyn BlockDevice) -> Result<()> {
        self.buffer.sync(dev)
    }
}

impl BitmapAllocator {
    pub const fn new(block_start: u32, block_count: u32) -> Self {
        Self {
            block_start,
            block_count,
            lock: spin::Mutex::new(()),
        }
    }

    /// Scans for the first clear bit and sets it in-buffer. The returned
    /// `BitClaim`'s buffer is dirty but not yet synced; the caller commits
    /// or rolls back explicitly.
    pub fn alloc_bit(&self, dev: &dyn BlockDevice) -> Result<BitClaim> {
        let _guard = self.lock.lock();
        for i in 0..self.block_count {
            let block = self.block_start + i;
            let mut buf = Buffer::read(dev, block)?;
            for byte_index in 0..BLOCK_SIZE {
                let byte = buf.data()[byte_index];
                if byte == 0xFF {
                    continue;
                }
                for bit in 0..8u8 {
                    if byte & (1 << bit) == 0 {
                        buf.data_mut()[byte_index] |= 1 << bit;
                        let index = (i as usize) * (BLOCK_SIZE * 8)
                            + byte_index * 8
                            + bit as usize;
                        return Ok(BitClaim {
                            index: index as u32,
                            buffer: buf,
                            byte_index,
                            bit,
                        });
                    }
                }
            }
        }
        Err(Error::NoSpace)
    }

    /// Clears a previously committed bit, e.g. for future reclamation
    /// support. Unused by `create`/`mkdir`/`link` today since nothing in
    /// this driver unlinks yet, kept so the allocator's interface is
    /// symmetric.
    pub fn free_bit(&self, dev: &dyn BlockDevice, index: u32) -> Result<()> {
        let _guard = self.lock.lock();
        let block = self.block_start + index / (BLOCK_SIZE as u32 * 8);
        let bit_in_block = (index % (BLOCK_SIZE as u32 * 8)) as usize;
        let byte_index = bit_in_block / 8;
        let bit = (bit_in_block % 8) as u8;
        let mut buf = Buffer::read(dev, block)?;
        buf.data_mut()[byte_index] &= !(1 << bit);
        buf.sync(dev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mem::MemDevice;

    #[test]
    fn first_fit_returns_lowest_clear_bit() {
        let dev = MemDevice::new(4);
        let alloc = BitmapAllocator::new(0, 1);
        let c0 = alloc.alloc_bit(&dev).unwrap();
        assert_eq!(c0.index, 0);
        c0.commit(&dev).unwrap();

        let c1 = alloc.alloc_bit(&dev).unwrap();
        assert_eq!(c1.index, 1);
        c1.commit(&dev).unwrap();
    }

    #[test]
    fn rollback_leaves_bitmap_untouched() {
        let dev = MemDevice::new(4);
        let alloc = BitmapAllocator::new(0, 1);
        let claim = alloc.alloc_bit(&dev).unwrap();
        assert_eq!(claim.index, 0);
        claim.rollback();

        let reclaimed = alloc.alloc_bit(&dev).unwrap();
        assert_eq!(reclaimed.index, 0, "rolled-back bit must be reusable");
    }

    #[test]
    fn exhaustion_reports_no_space() {
        let dev = MemDevice::new(1);
        let alloc = BitmapAllocator::new(0, 1);
        for i in 0..(BLOCK_SIZE * 8) {
            let c = alloc.alloc_bit(&dev).unwrap();
            assert_eq!(c.index as usize, i);
            c.commit(&dev).unwrap();
        }
        assert_eq!(alloc.alloc_bit(&dev).unwrap_err(), Error::NoSpace);
    }
}
