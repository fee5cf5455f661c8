//! Block device abstraction.
//!
//! The host provides a block-addressable device; this crate never assumes
//! anything about it beyond block-granular read/write. `Buffer` is the
//! RAII buffer handle used throughout: callers read a block into one,
//! mutate it, and `sync()` it through the device when the change must be
//! durable before returning to the caller — mirroring `write_inode(wait)`
//! and the rule that both bitmap writes must be marked dirty before the
//! operation returns success.

use crate::error::{Error, Result};
use crate::layout::BLOCK_SIZE;

/// A block-addressable device presenting fixed `BLOCK_SIZE` blocks.
///
/// Block 0 is reserved/unused; block 1 is the superblock.
pub trait BlockDevice {
    fn read_block(&self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()>;
    fn write_block(&self, index: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()>;
}

/// An in-memory copy of one block, owned until dropped.
///
/// Replaces a manual `brelse`/`bp.free(ctx)` pairing with RAII (Design
/// Note 1): there is no separate release call, and a buffer that was never
/// marked dirty costs nothing extra to drop. A dirty buffer that is dropped
/// without `sync()` silently loses its write — callers that need durability
/// must call `sync()` explicitly, matching `write_inode(wait=true)`.
pub struct Buffer {
    block: u32,
    data: [u8; BLOCK_SIZE],
    dirty: bool,
}

impl Buffer {
    pub fn read(dev: &dyn BlockDevice, block: u32) -> Result<Self> {
        let mut data = [0u8; BLOCK_SIZE];
        dev.read_block(block, &mut data)?;
        Ok(Self {
            block,
            data,
            dirty: false,
        })
    }

    /// A buffer full of zeros, not yet backed by a read. Used when a
    /// freshly allocated block is about to be fully overwritten, avoiding
    /// a useless read of stale/uninitialized device content.
    pub fn zeroed(block: u32) -> Self {
        Self {
            block,
            data: [0u8; BLOCK_SIZE],
            dirty: true,
        }
    }

    pub fn block(&self) -> u32 {
        self.block
    }

    pub fn data(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        self.dirty = true;
        &mut self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Flushes this buffer to the device if dirty. A buffer that reports
    /// "requested but not up-to-date" after the underlying write is
    /// surfaced as `Error::Io` by the device implementation.
    pub fn sync(&mut self, dev: &dyn BlockDevice) -> Result<()> {
        if self.dirty {
            dev.write_block(self.block, &self.data)?;
            self.dirty = false;
        }
        Ok(())
    }
}

/// Casts the leading bytes of a block buffer to `&T` / `&mut T`.
///
/// # Safety
/// `T` must be `#[repr(C)]`, contain no padding, and be no larger than
/// `BLOCK_SIZE - offset`. All on-disk structs in `layout.rs` satisfy this
/// via `zerocopy::{AsBytes, FromBytes}`.
pub fn cast_at<T: zerocopy::FromBytes + zerocopy::AsBytes>(
    buf: &[u8; BLOCK_SIZE],
    offset: usize,
) -> T {
    T::read_from(&buf[offset..offset + core::mem::size_of::<T>()])
        .expect("cast_at: buffer too small for T")
}

pub fn write_at<T: zerocopy::AsBytes>(buf: &mut [u8; BLOCK_SIZE], offset: usize, value: &T) {
    let bytes = value.as_bytes();
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

pub fn u32_at(buf: &[u8; BLOCK_SIZE], index: usize) -> u32 {
    let off = index * core::mem::size_of::<u32>();
    u32::from_ne_bytes(buf[off..off + 4].try_into().expect("u32_at: slice len"))
}

pub fn set_u32_at(buf: &mut [u8; BLOCK_SIZE], index: usize, value: u32) {
    let off = index * core::mem::size_of::<u32>();
    buf[off..off + 4].copy_from_slice(&value.to_ne_bytes());
}

#[cfg(any(test, feature = "std"))]
pub mod mem {
    //! An in-memory `BlockDevice` used by the crate's own tests, standing
    //! in for a real kernel's block device.
    use super::*;
    use alloc::vec::Vec;
    use spin::Mutex;

    pub struct MemDevice {
        blocks: Mutex<Vec<[u8; BLOCK_SIZE]>>,
    }

    impl MemDevice {
        pub fn new(block_count: usize) -> Self {
            Self {
                blocks: Mutex::new(alloc::vec![[0u8; BLOCK_SIZE]; block_count]),
            }
        }
    }

    impl BlockDevice for MemDevice {
        fn read_block(&self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
            let blocks = self.blocks.lock();
            let block = blocks.get(index as usize).ok_or(Error::Io)?;
            buf.copy_from_slice(block);
            Ok(())
        }

        fn write_block(&self, index: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
            let mut blocks = self.blocks.lock();
            let block = blocks.get_mut(index as usize).ok_or(Error::Io)?;
            block.copy_from_slice(buf);
            Ok(())
        }
    }
}
