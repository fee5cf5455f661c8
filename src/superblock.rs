//! Superblock lifecycle: read, magic check, mount-counter bookkeeping.
//!
//! Grounded on `tfs_fill_super`/`tfs_sync_super` in the original source:
//! read block 1, verify `magic`, increment `mnt_count` and flush it
//! durably (mount-counter increments are always durable, independent of
//! any later rollback), then the caller loads the root inode.
//!
//! The "`size`" superblock field is `s_maxbytes` in the source
//! (`sb->s_maxbytes = tfs_sb->size`), not a block count — kept under that
//! name here, but documented as "maximum file offset" to avoid confusion
//! with the bitmap regions' block counts.

use crate::device::{cast_at, write_at, BlockDevice, Buffer};
use crate::error::{Error, Result};
use crate::layout::{RawSuperblock, MAGIC};

/// Block index the superblock always lives at.
pub const SUPERBLOCK_BLOCK: u32 = 1;

pub struct Superblock {
    pub raw: RawSuperblock,
}

impl Superblock {
    /// Reads and validates the superblock. Returns `Error::InvalidArg` on
    /// magic mismatch (the source's `-EINVAL`), `Error::Io` on a failed
    /// read.
    pub fn load(dev: &dyn BlockDevice) -> Result<Self> {
        let buf = Buffer::read(dev, SUPERBLOCK_BLOCK)?;
        let raw = cast_at::<RawSuperblock>(buf.data(), 0);
        if raw.magic != MAGIC {
            return Err(Error::InvalidArg);
        }
        Ok(Self { raw })
    }

    /// Increments the mount counter and flushes the superblock block
    /// synchronously, mirroring `tfs_fill_super`'s
    /// `mark_buffer_dirty`/`sync_dirty_buffer` pair. Durable regardless of
    /// anything that fails later in `mount`.
    pub fn record_mount(&mut self, dev: &dyn BlockDevice) -> Result<()> {
        self.raw.mnt_count = self.raw.mnt_count.wrapping_add(1);
        self.flush(dev)
    }

    pub fn flush(&self, dev: &dyn BlockDevice) -> Result<()> {
        let mut buf = Buffer::read(dev, SUPERBLOCK_BLOCK)?;
        write_at(buf.data_mut(), 0, &self.raw);
        buf.sync(dev)
    }

    /// `s_maxbytes`: the largest valid file offset on this filesystem.
    pub fn max_bytes(&self) -> u64 {
        self.raw.size as u64
    }

    /// The `show_options` hook's one required field.
    pub fn show_options(&self) -> alloc::string::String {
        alloc::format!("inode_bitmap_blocks={}", self.raw.inode_bitmap_blocks)
    }
}
