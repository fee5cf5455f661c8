//! Inode lifecycle orchestrators: `create`, `mkdir`, `link`. Each claims one
//! or more bits across the two allocators and a directory dentry slot, and
//! must roll every claim back atomically if any later step fails —
//! grounded on `tfs_new_inode` in the original source and the
//! `scopeguard::guard` rollback structure `Ufs::create`/`Ufs::link` use
//! elsewhere in this crate's lineage.

use scopeguard::{guard, ScopeGuard};

use crate::bitmap::BitmapAllocator;
use crate::device::BlockDevice;
use crate::dir::{lookup, new_default_dentries, set_link};
use crate::error::{Error, Result};
use crate::inode::{write_disk_inode, Inode};
use crate::layout::{FileMode, RawInode};
use crate::superblock::Superblock;

/// Allocates a fresh inode bit, builds its in-memory record, and writes the
/// default dentries `.`/`..` into it if `mode.is_dir()` — the shared core
/// of `create` and `mkdir`, which differ only in whether a data block is
/// pre-allocated and which mode bits are passed in.
///
/// On any failure the inode bit (and, if claimed, the data bit) are rolled
/// back before returning — the caller's own `parent` dentry is never
/// touched unless this succeeds.
fn new_inode(
    dev: &dyn BlockDevice,
    sb: &Superblock,
    inode_alloc: &BitmapAllocator,
    data_alloc: &BitmapAllocator,
    mode: FileMode,
    parent_ino: u32,
    now: u32,
) -> Result<Inode> {
    let inode_claim = inode_alloc.alloc_bit(dev)?;
    let ino = inode_claim.index;
    // Rolled back automatically unless disarmed via `ScopeGuard::into_inner`
    // below.
    let inode_claim = guard(inode_claim, |c| c.rollback());

    let mut raw = RawInode::zeroed();
    raw.mode = mode.bits();
    raw.ctime = now;
    raw.mtime = now;
    raw.atime = now;
    raw.hard_link_count = 1;
    let mut inode = Inode::from_raw(ino, &raw);

    if mode.is_dir() {
        let data_claim = data_alloc.alloc_bit(dev)?;
        let data_claim = guard(data_claim, |c| c.rollback());
        let data_block = data_claim.index;
        new_default_dentries(dev, data_block, ino, parent_ino)?;
        inode.data_blocks[0] = data_block;
        inode.blocks = 1;
        inode.size = crate::layout::DENTRY_SIZE as u32 * 2;
        inode.nlink = 2; // "." plus the parent's link to this directory.

        // Commit the data claim: durable, no further rollback.
        ScopeGuard::into_inner(data_claim).commit(dev)?;
    }

    write_disk_inode(dev, sb, ino, &inode.to_raw(), true)?;

    // Commit the inode claim: durable, no further rollback.
    ScopeGuard::into_inner(inode_claim).commit(dev)?;

    Ok(inode)
}

/// Creates a regular file named `name` in `parent`, linking it in on
/// success.
///
/// `name`'s Exists check runs before any bit is allocated (matching
/// `tfs_create`'s `tfs_find_dentry`-then-`tfs_new_inode` order), so the
/// common "name already taken" failure never has anything to roll back.
/// The inode bit is still freed if `set_link` fails for any other reason
/// (e.g. the parent's own page growth runs out of data blocks).
pub fn create(
    dev: &dyn BlockDevice,
    sb: &Superblock,
    inode_alloc: &BitmapAllocator,
    data_alloc: &BitmapAllocator,
    parent: &mut Inode,
    name: &[u8],
    mode: FileMode,
    now: u32,
) -> Result<Inode> {
    let mode = (mode & !FileMode::S_IFMT) | FileMode::S_IFREG;
    if lookup(dev, data_alloc, parent, name)?.is_some() {
        return Err(Error::Exists);
    }
    let inode = new_inode(dev, sb, inode_alloc, data_alloc, mode, parent.ino, now)?;
    if let Err(e) = set_link(dev, data_alloc, parent, name, inode.ino, mode) {
        inode_alloc.free_bit(dev, inode.ino)?;
        return Err(e);
    }
    Ok(inode)
}

/// Creates a directory named `name` under `parent`: allocates the new
/// inode (with its default `.`/`..` page), links it into `parent`, and
/// bumps `parent.nlink` for the child's `..` entry.
///
/// Same Exists-before-allocation ordering as `create`. If `set_link` still
/// fails afterward (e.g. the parent's own page growth runs out of data
/// blocks), both the inode bit *and* the directory's already-committed
/// data bit (its `.`/`..` page) are freed — leaving neither bitmap with a
/// block no live inode points to.
pub fn mkdir(
    dev: &dyn BlockDevice,
    sb: &Superblock,
    inode_alloc: &BitmapAllocator,
    data_alloc: &BitmapAllocator,
    parent: &mut Inode,
    name: &[u8],
    mode: FileMode,
    now: u32,
) -> Result<Inode> {
    let mode = (mode & !FileMode::S_IFMT) | FileMode::S_IFDIR;
    if lookup(dev, data_alloc, parent, name)?.is_some() {
        return Err(Error::Exists);
    }
    let inode = new_inode(dev, sb, inode_alloc, data_alloc, mode, parent.ino, now)?;
    if let Err(e) = set_link(dev, data_alloc, parent, name, inode.ino, mode) {
        inode_alloc.free_bit(dev, inode.ino)?;
        data_alloc.free_bit(dev, inode.data_blocks[0])?;
        return Err(e);
    }
    parent.nlink += 1;
    parent.mark_dirty();
    Ok(inode)
}

/// Hard-links `target` into `parent` under `name`. No new inode is
/// allocated; only the dentry is added, `target.nlink` incremented, and
/// `target.ctime` stamped to `now` (`inode->i_ctime = CURRENT_TIME_SEC` in
/// the original source's `tfs_link`).
pub fn link(
    dev: &dyn BlockDevice,
    data_alloc: &BitmapAllocator,
    parent: &mut Inode,
    target: &mut Inode,
    name: &[u8],
    now: u32,
) -> Result<()> {
    if target.mode.is_dir() {
        // Hard links to directories would break the single-parent `..`
        // invariant `dir.c` relies on; the source never permits this path.
        return Err(Error::InvalidArg);
    }
    set_link(dev, data_alloc, parent, name, target.ino, target.mode)?;
    target.nlink += 1;
    target.ctime = now;
    target.mark_dirty();
    Ok(())
}
