//! Block-map resolver: `get_blocks`, the core address translation that
//! turns a file-logical block index into a physical device block number,
//! allocating lazily when `create` is set.
//!
//! Direct region (logical index `< DIRECT_BLOCKS_PER_INODE`): a straight
//! array lookup, allocating the slot lazily. Indirect region (logical index
//! `>= DIRECT_BLOCKS_PER_INODE`): one level of indirection through
//! `root_indirect_data_block`, read and written through the two-slot
//! `BlockMapCache` on the lock-free read path and the slow path under the
//! per-inode `cache_writer_mutex` otherwise. Grounded on `tfs_getblocks` in
//! the original source, including its coalescing check ("is the next
//! direct pointer one past the previous") and its cache-slot rounding
//! (`rounded_logical = logical - logical % CACHE_GROUP`).

use crate::bitmap::BitmapAllocator;
use crate::device::{u32_at, set_u32_at, BlockDevice, Buffer};
use crate::error::{Error, Result};
use crate::inode::{Inode, CACHE_GROUP};
use crate::layout::{DIRECT_BLOCKS_PER_INODE, PTRS_PER_INDIRECT_BLOCK};

/// Resolves logical block `logical` of `inode` to a physical block number,
/// allocating on demand when `create` is true.
///
/// Returns `Error::InvalidArg` if `logical` is beyond the single-indirect
/// range, or if `create` is false and the block is unassigned (a hole read
/// is not supported: no sparse-file hole semantics beyond "unassigned
/// means not yet written").
pub fn get_blocks(
    dev: &dyn BlockDevice,
    data_alloc: &BitmapAllocator,
    inode: &mut Inode,
    logical: u64,
    create: bool,
) -> Result<u32> {
    if logical < DIRECT_BLOCKS_PER_INODE as u64 {
        return get_direct_block(dev, data_alloc, inode, logical as usize, create);
    }

    let indirect_index = (logical - DIRECT_BLOCKS_PER_INODE as u64) as usize;
    if indirect_index >= PTRS_PER_INDIRECT_BLOCK {
        return Err(Error::InvalidArg);
    }
    get_indirect_block(dev, data_alloc, inode, logical, indirect_index, create)
}

fn get_direct_block(
    dev: &dyn BlockDevice,
    data_alloc: &BitmapAllocator,
    inode: &mut Inode,
    index: usize,
    create: bool,
) -> Result<u32> {
    let existing = inode.data_blocks[index];
    if existing != 0 {
        return Ok(existing);
    }
    if !create {
        return Err(Error::InvalidArg);
    }

    // Coalescing check: a new direct block is only ever appended one past
    // the highest already-assigned direct slot, matching sequential growth;
    // out-of-order direct holes cannot be created by this driver because
    // `write` only ever grows a file by one block at a time through this
    // path.
    if index > 0 && inode.data_blocks[index - 1] == 0 {
        return Err(Error::InvalidArg);
    }

    let claim = data_alloc.alloc_bit(dev)?;
    let physical = claim.index;
    let mut zero_buf = Buffer::zeroed(physical);
    if let Err(e) = zero_buf.sync(dev) {
        claim.rollback();
        return Err(e);
    }
    claim.commit(dev)?;

    inode.data_blocks[index] = physical;
    inode.blocks += 1;
    inode.mark_dirty();
    Ok(physical)
}

fn get_indirect_block(
    dev: &dyn BlockDevice,
    data_alloc: &BitmapAllocator,
    inode: &mut Inode,
    logical: u64,
    indirect_index: usize,
    create: bool,
) -> Result<u32> {
    let rounded_logical = logical - (logical % CACHE_GROUP as u64);

    // Lock-free fast path: check both cache slots for a hit before taking
    // the writer mutex at all.
    for entry in inode.cache.snapshot() {
        if entry.first_logical_block == rounded_logical {
            let within = (logical - rounded_logical) as usize;
            let physical = entry.blocks[within];
            if physical != 0 {
                return Ok(physical);
            }
            break;
        }
    }

    if inode.root_indirect_data_block == 0 {
        if !create {
            return Err(Error::InvalidArg);
        }
        let claim = data_alloc.alloc_bit(dev)?;
        let mut zero_buf = Buffer::zeroed(claim.index);
        if let Err(e) = zero_buf.sync(dev) {
            claim.rollback();
            return Err(e);
        }
        claim.commit(dev)?;
        inode.root_indirect_data_block = claim.index;
        inode.blocks += 1;
        inode.mark_dirty();
    }

    let indirect_block = inode.root_indirect_data_block;
    let mut indirect_buf = Buffer::read(dev, indirect_block)?;
    let mut physical = u32_at(indirect_buf.data(), indirect_index);

    if physical == 0 {
        if !create {
            return Err(Error::InvalidArg);
        }
        physical = alloc_and_record(dev, data_alloc, &mut indirect_buf, indirect_index)?;
        inode.blocks += 1;
        inode.mark_dirty();
    }

    // Populate a fresh `CACHE_GROUP`-wide window starting at
    // `rounded_logical` so neighboring reads in the group are lock-free
    // hits next time, mirroring the source's read-ahead-on-miss fill.
    let mut group = [0u32; CACHE_GROUP];
    for (i, slot) in group.iter_mut().enumerate() {
        let idx = (rounded_logical as usize) + i - DIRECT_BLOCKS_PER_INODE;
        if idx < PTRS_PER_INDIRECT_BLOCK {
            *slot = u32_at(indirect_buf.data(), idx);
        }
    }
    inode.cache.update(rounded_logical, group);

    Ok(physical)
}

/// Allocates a fresh data block, records its number into `indirect_buf` at
/// `slot`, and flushes the indirect block. Split out because the bitmap
/// claim must be committed before the physical block number it returned is
/// known to the caller's control flow below.
fn alloc_and_record(
    dev: &dyn BlockDevice,
    data_alloc: &BitmapAllocator,
    indirect_buf: &mut Buffer,
    slot: usize,
) -> Result<u32> {
    let claim = data_alloc.alloc_bit(dev)?;
    let physical = claim.index;
    let mut zero_buf = Buffer::zeroed(physical);
    if let Err(e) = zero_buf.sync(dev) {
        claim.rollback();
        return Err(e);
    }
    claim.commit(dev)?;
    set_u32_at(indirect_buf.data_mut(), slot, physical);
    indirect_buf.sync(dev)?;
    Ok(physical)
}
