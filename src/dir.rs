//! Directory engine: fixed 32-byte dentries, one page (= one block) at a
//! time, linear scan. Grounded on `driver/dir.c`'s `tfs_find_entry`/
//! `tfs_add_link`/`tfs_make_empty`/`tfs_readdir`.

use alloc::vec::Vec;

use crate::bitmap::BitmapAllocator;
use crate::blockmap::get_blocks;
use crate::device::{cast_at, write_at, BlockDevice, Buffer};
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::layout::{DentryType, FileMode, RawDentry, BLOCK_SIZE, DENTRY_NAME_LEN, DENTRY_SIZE};

/// Number of dentry slots per page.
const DENTRIES_PER_PAGE: usize = BLOCK_SIZE / DENTRY_SIZE;

/// A located dentry: which page it's on, its byte offset within that page,
/// and a copy of its content.
pub struct DentrySlot {
    pub page_index: u64,
    pub offset: usize,
    pub dentry: RawDentry,
}

/// Bytes actually occupied by dentries on the directory's last page, per
/// `inode.size`: a partially-filled final page still has `DENTRIES_PER_PAGE`
/// physical slots, but only the ones below this clamp were ever written
/// (`driver/dir.c`'s `lastbyte_in_page` clamp).
fn valid_bytes_on_page(inode: &Inode, page_index: u64) -> usize {
    let page_start = page_index * BLOCK_SIZE as u64;
    let remaining = (inode.size as u64).saturating_sub(page_start);
    remaining.min(BLOCK_SIZE as u64) as usize
}

fn num_pages(inode: &Inode) -> u64 {
    if inode.size == 0 {
        0
    } else {
        (inode.size as u64 + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64
    }
}

/// Scans `dir`'s pages for a dentry named `name`. Returns `None` if absent.
pub fn lookup(
    dev: &dyn BlockDevice,
    data_alloc: &BitmapAllocator,
    dir: &mut Inode,
    name: &[u8],
) -> Result<Option<u32>> {
    if name.len() > DENTRY_NAME_LEN {
        return Err(Error::NameTooLong);
    }
    for page_index in 0..num_pages(dir) {
        let physical = get_blocks(dev, data_alloc, dir, page_index, false)?;
        let buf = Buffer::read(dev, physical)?;
        let valid = valid_bytes_on_page(dir, page_index);
        let slot_count = valid / DENTRY_SIZE;
        for slot in 0..slot_count {
            let dentry = cast_at::<RawDentry>(buf.data(), slot * DENTRY_SIZE);
            if !dentry.is_free() && dentry.name_bytes() == name {
                return Ok(Some(dentry.inode));
            }
        }
    }
    Ok(None)
}

/// Finds the first free slot across `dir`'s existing pages — either a
/// previously-freed dentry mid-page (`tfs_find_entry`'s scan-the-whole-page
/// behavior) or the next slot past the current end of the last page — or,
/// failing that, slot 0 of a brand-new page past the current end of the
/// directory.
///
/// Returns `(page_index, offset_within_page)`.
pub fn find_free_slot(
    dev: &dyn BlockDevice,
    data_alloc: &BitmapAllocator,
    dir: &mut Inode,
) -> Result<(u64, usize)> {
    let pages = num_pages(dir);
    for page_index in 0..pages {
        let physical = get_blocks(dev, data_alloc, dir, page_index, false)?;
        let buf = Buffer::read(dev, physical)?;
        let valid = valid_bytes_on_page(dir, page_index);
        let slot_count = valid / DENTRY_SIZE;
        for slot in 0..slot_count {
            let dentry = cast_at::<RawDentry>(buf.data(), slot * DENTRY_SIZE);
            if dentry.is_free() {
                return Ok((page_index, slot * DENTRY_SIZE));
            }
        }
        if slot_count < DENTRIES_PER_PAGE {
            return Ok((page_index, slot_count * DENTRY_SIZE));
        }
    }
    Ok((pages, 0))
}

/// Writes a new `(name, inode, kind)` dentry into the first available slot,
/// growing `dir` by one page if every existing page is full. The whole
/// 32-byte record is zeroed before the fields are filled, matching the
/// source's `memset(de, 0, sizeof(*de))` ahead of `tfs_set_link`'s field
/// writes (so stale bytes from a previously freed dentry never leak through
/// `name`'s unused tail).
pub fn set_link(
    dev: &dyn BlockDevice,
    data_alloc: &BitmapAllocator,
    dir: &mut Inode,
    name: &[u8],
    ino: u32,
    mode: FileMode,
) -> Result<()> {
    if name.len() > DENTRY_NAME_LEN {
        return Err(Error::NameTooLong);
    }
    if lookup(dev, data_alloc, dir, name)?.is_some() {
        return Err(Error::Exists);
    }

    let (page_index, offset) = find_free_slot(dev, data_alloc, dir)?;
    let physical = get_blocks(dev, data_alloc, dir, page_index, true)?;
    let mut buf = Buffer::read(dev, physical)?;

    let mut dentry = RawDentry::zeroed();
    dentry.kind = DentryType::from_mode(mode) as u32;
    dentry.inode = ino;
    dentry.len = name.len() as u32;
    dentry.name[..name.len()].copy_from_slice(name);
    write_at(buf.data_mut(), offset, &dentry);
    buf.sync(dev)?;

    let end = page_index * BLOCK_SIZE as u64 + offset as u64 + DENTRY_SIZE as u64;
    if end as u32 > dir.size {
        dir.size = end as u32;
        dir.mark_dirty();
    }
    Ok(())
}

/// Writes the default `.` and `..` dentries into a brand-new directory's
/// first page (`tfs_make_empty`), called once right after `mkdir`
/// allocates the directory's first data block.
pub fn new_default_dentries(
    dev: &dyn BlockDevice,
    dir_block: u32,
    self_ino: u32,
    parent_ino: u32,
) -> Result<()> {
    let mut buf = Buffer::zeroed(dir_block);

    let mut dot = RawDentry::zeroed();
    dot.kind = DentryType::Directory as u32;
    dot.inode = self_ino;
    dot.len = 1;
    dot.name[0] = b'.';
    write_at(buf.data_mut(), 0, &dot);

    let mut dotdot = RawDentry::zeroed();
    dotdot.kind = DentryType::Directory as u32;
    dotdot.inode = parent_ino;
    dotdot.len = 2;
    dotdot.name[0] = b'.';
    dotdot.name[1] = b'.';
    write_at(buf.data_mut(), DENTRY_SIZE, &dotdot);

    buf.sync(dev)
}

/// Lists every live dentry across `dir`'s valid pages, in on-disk order,
/// mirroring `tfs_readdir`'s page-then-slot iteration. Free slots and
/// slots whose `kind` is `Unknown` are both skipped — the latter can only
/// arise from a corrupt or foreign image, since `set_link` always tags a
/// live dentry with a concrete type.
pub fn readdir(
    dev: &dyn BlockDevice,
    data_alloc: &BitmapAllocator,
    dir: &mut Inode,
) -> Result<Vec<DentrySlot>> {
    let mut out = Vec::new();
    for page_index in 0..num_pages(dir) {
        let physical = get_blocks(dev, data_alloc, dir, page_index, false)?;
        let buf = Buffer::read(dev, physical)?;
        let valid = valid_bytes_on_page(dir, page_index);
        let slot_count = valid / DENTRY_SIZE;
        for slot in 0..slot_count {
            let dentry = cast_at::<RawDentry>(buf.data(), slot * DENTRY_SIZE);
            if !dentry.is_free() && dentry.kind != DentryType::Unknown as u32 {
                out.push(DentrySlot {
                    page_index,
                    offset: slot * DENTRY_SIZE,
                    dentry,
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mem::MemDevice;
    use crate::layout::RawInode;

    fn fresh_dir() -> Inode {
        let mut raw = RawInode::zeroed();
        raw.mode = FileMode::S_IFDIR.bits();
        Inode::from_raw(1, &raw)
    }

    #[test]
    fn default_dentries_are_found_by_lookup() {
        let dev = MemDevice::new(16);
        let alloc = BitmapAllocator::new(8, 1);
        let mut dir = fresh_dir();

        let physical = get_blocks(&dev, &alloc, &mut dir, 0, true).unwrap();
        new_default_dentries(&dev, physical, 1, 1).unwrap();
        dir.size = DENTRY_SIZE as u32 * 2;

        assert_eq!(lookup(&dev, &alloc, &mut dir, b".").unwrap(), Some(1));
        assert_eq!(lookup(&dev, &alloc, &mut dir, b"..").unwrap(), Some(1));
        assert_eq!(lookup(&dev, &alloc, &mut dir, b"missing").unwrap(), None);
    }

    #[test]
    fn set_link_rejects_duplicate_names() {
        let dev = MemDevice::new(16);
        let alloc = BitmapAllocator::new(8, 1);
        let mut dir = fresh_dir();

        set_link(&dev, &alloc, &mut dir, b"a", 5, FileMode::S_IFREG).unwrap();
        assert_eq!(
            set_link(&dev, &alloc, &mut dir, b"a", 6, FileMode::S_IFREG).unwrap_err(),
            Error::Exists
        );
    }

    #[test]
    fn set_link_grows_directory_size_by_one_dentry() {
        let dev = MemDevice::new(16);
        let alloc = BitmapAllocator::new(8, 1);
        let mut dir = fresh_dir();
        assert_eq!(dir.size, 0);

        set_link(&dev, &alloc, &mut dir, b"a", 5, FileMode::S_IFREG).unwrap();
        assert_eq!(dir.size, DENTRY_SIZE as u32);

        set_link(&dev, &alloc, &mut dir, b"b", 6, FileMode::S_IFREG).unwrap();
        assert_eq!(dir.size, DENTRY_SIZE as u32 * 2);
    }

    #[test]
    fn readdir_lists_every_live_entry() {
        let dev = MemDevice::new(16);
        let alloc = BitmapAllocator::new(8, 1);
        let mut dir = fresh_dir();
        set_link(&dev, &alloc, &mut dir, b"a", 5, FileMode::S_IFREG).unwrap();
        set_link(&dev, &alloc, &mut dir, b"b", 6, FileMode::S_IFDIR).unwrap();

        let entries = readdir(&dev, &alloc, &mut dir).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].dentry.name_bytes(), b"a");
        assert_eq!(entries[1].dentry.name_bytes(), b"b");
    }

    #[test]
    fn readdir_skips_unknown_kind_entries() {
        let dev = MemDevice::new(16);
        let alloc = BitmapAllocator::new(8, 1);
        let mut dir = fresh_dir();
        set_link(&dev, &alloc, &mut dir, b"a", 5, FileMode::S_IFREG).unwrap();

        // Simulate a corrupt/foreign dentry by writing one directly with
        // kind left at its zeroed (Unknown) value.
        let physical = get_blocks(&dev, &alloc, &mut dir, 0, true).unwrap();
        let mut buf = Buffer::read(&dev, physical).unwrap();
        let mut stray = RawDentry::zeroed();
        stray.inode = 9;
        stray.len = 1;
        stray.name[0] = b'z';
        write_at(buf.data_mut(), DENTRY_SIZE, &stray);
        buf.sync(&dev).unwrap();
        dir.size = DENTRY_SIZE as u32 * 2;

        let entries = readdir(&dev, &alloc, &mut dir).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dentry.name_bytes(), b"a");
    }

    #[test]
    fn name_too_long_is_rejected() {
        let dev = MemDevice::new(16);
        let alloc = BitmapAllocator::new(8, 1);
        let mut dir = fresh_dir();
        let long_name = [b'x'; DENTRY_NAME_LEN + 1];
        assert_eq!(
            set_link(&dev, &alloc, &mut dir, &long_name, 5, FileMode::S_IFREG).unwrap_err(),
            Error::NameTooLong
        );
    }
}
