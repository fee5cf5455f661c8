//! Inode table I/O and the in-memory inode extension.
//!
//! On-disk inode layout and position: `shift = ino * INODE_SIZE`, `block =
//! inode_table_block_start + shift / BLOCK_SIZE`, `offset = shift mod
//! BLOCK_SIZE`, grounded on `tfs_inode_get`'s identical arithmetic in the
//! original source.

use crate::device::{cast_at, write_at, BlockDevice, Buffer};
use crate::error::Result;
use crate::layout::{FileMode, RawInode, BLOCK_SIZE, DIRECT_BLOCKS_PER_INODE, INODE_SIZE};
use crate::seqlock::Seqlock;
use crate::superblock::Superblock;

/// Number of consecutive indirect-region blocks one cache slot covers.
pub const CACHE_GROUP: usize = 4;
/// Number of cache slots per inode.
pub const CACHE_SLOTS: usize = 2;
/// Sentinel `first_logical_block` meaning "this slot holds nothing",
/// distinct from any real logical block index including 0 (Design Note
/// "Sentinel cache key").
const EMPTY_FIRST_LOGICAL: u64 = u64::MAX;

#[derive(Clone, Copy)]
pub struct CacheEntry {
    pub first_logical_block: u64,
    pub blocks: [u32; CACHE_GROUP],
}

impl CacheEntry {
    const EMPTY: Self = Self {
        first_logical_block: EMPTY_FIRST_LOGICAL,
        blocks: [0; CACHE_GROUP],
    };
}

/// Two-slot seqlock-protected block-map cache.
pub struct BlockMapCache {
    slots: [Seqlock<CacheEntry>; CACHE_SLOTS],
    /// Guards `cached_next_slot` and serializes all cache writers. Taken
    /// after both bitmap locks and the per-inode lock in the ordering
    /// every caller must follow.
    writer: spin::Mutex<usize>,
}

impl BlockMapCache {
    pub const fn new() -> Self {
        Self {
            slots: [Seqlock::new(CacheEntry::EMPTY), Seqlock::new(CacheEntry::EMPTY)],
            writer: spin::Mutex::new(0),
        }
    }

    /// Lock-free read of every slot's current snapshot. Each element is
    /// torn-free (the seqlock already resolved any writer race); the
    /// caller still must check `first_logical_block` against what it
    /// wants.
    pub fn snapshot(&self) -> [CacheEntry; CACHE_SLOTS] {
        let mut out = [CacheEntry::EMPTY; CACHE_SLOTS];
        for i in 0..CACHE_SLOTS {
            out[i] = self.slots[i].read();
        }
        out
    }

    /// Installs a freshly read group of indirect-region blocks into a
    /// slot: reuse a slot already tagged with `rounded_logical` if one
    /// exists, else the round-robin `cached_next_slot`. Always advances
    /// `cached_next_slot` afterward, matching the source's unconditional
    /// `ti->cached_next_slot++` regardless of whether a slot was reused.
    pub fn update(&self, rounded_logical: u64, blocks: [u32; CACHE_GROUP]) {
        let mut next = self.writer.lock();
        let mut slot = *next;
        for i in 0..CACHE_SLOTS {
            if self.slots[i].read().first_logical_block == rounded_logical {
                slot = i;
                break;
            }
        }
        self.slots[slot].write(CacheEntry {
            first_logical_block: rounded_logical,
            blocks,
        });
        *next = (slot + 1) % CACHE_SLOTS;
    }
}

/// The in-memory inode: on-disk fields plus the block-map cache extension.
/// Lives behind the host's `InodeCache` (one instance per live inode
/// number), guarded by the per-inode mutex the host's cache provides —
/// always taken after the superblock lock, never before.
pub struct Inode {
    pub ino: u32,
    pub mode: FileMode,
    pub uid: u32,
    pub gid: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub atime: u32,
    pub nlink: u32,
    pub size: u32,
    pub blocks: u32,
    pub data_blocks: [u32; DIRECT_BLOCKS_PER_INODE],
    pub root_indirect_data_block: u32,
    pub dirty: bool,
    pub cache: BlockMapCache,
}

impl Inode {
    pub fn from_raw(ino: u32, raw: &RawInode) -> Self {
        Self {
            ino,
            mode: FileMode::from_bits_truncate(raw.mode),
            uid: raw.uid,
            gid: raw.gid,
            ctime: raw.ctime,
            mtime: raw.mtime,
            atime: raw.atime,
            nlink: raw.hard_link_count,
            size: raw.size,
            blocks: raw.blocks,
            data_blocks: raw.data_blocks,
            root_indirect_data_block: raw.root_indirect_data_block,
            dirty: false,
            cache: BlockMapCache::new(),
        }
    }

    pub fn to_raw(&self) -> RawInode {
        RawInode {
            mode: self.mode.bits(),
            uid: self.uid,
            gid: self.gid,
            ctime: self.ctime,
            mtime: self.mtime,
            atime: self.atime,
            hard_link_count: self.nlink,
            size: self.size,
            blocks: self.blocks,
            data_blocks: self.data_blocks,
            root_indirect_data_block: self.root_indirect_data_block,
            pad: [0; 8],
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Computes the `(block, offset)` of inode `ino`'s 64-byte record.
pub fn inode_location(sb: &Superblock, ino: u32) -> (u32, usize) {
    let shift = (ino as usize) * INODE_SIZE;
    let block = sb.raw.inode_table_block_start + (shift / BLOCK_SIZE) as u32;
    let offset = shift % BLOCK_SIZE;
    (block, offset)
}

pub fn read_disk_inode(dev: &dyn BlockDevice, sb: &Superblock, ino: u32) -> Result<RawInode> {
    let (block, offset) = inode_location(sb, ino);
    let buf = Buffer::read(dev, block)?;
    Ok(cast_at::<RawInode>(buf.data(), offset))
}

/// Writes a 64-byte inode record. Marks the buffer dirty and, when `wait`,
/// flushes synchronously; `wait = false` leaves the write pending for the
/// host to flush later.
pub fn write_disk_inode(
    dev: &dyn BlockDevice,
    sb: &Superblock,
    ino: u32,
    raw: &RawInode,
    wait: bool,
) -> Result<()> {
    let (block, offset) = inode_location(sb, ino);
    let mut buf = Buffer::read(dev, block)?;
    write_at(buf.data_mut(), offset, raw);
    if wait {
        buf.sync(dev)?;
    }
    Ok(())
}
