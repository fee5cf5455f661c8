//! Driver for the Trivial Filesystem: on-disk layout, bitmap allocator,
//! block-map resolver, directory engine, and the inode-lifecycle
//! orchestrators that sit above them.
//!
//! `no_std` by design: the host supplies a `BlockDevice`; everything
//! else — the inode cache, the page cache, dentry name hashing — lives
//! inside this crate, generalized behind the `InodeCache`/`PageCache`
//! traits so a real VFS can still own its own versions of those if it
//! already has one.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod bitmap;
pub mod blockmap;
pub mod device;
pub mod dir;
pub mod error;
pub mod inode;
pub mod inode_cache;
pub mod layout;
pub mod ops;
pub mod pagecache;
pub mod seqlock;
pub mod superblock;

use alloc::string::String;
use alloc::vec::Vec;

use device::{BlockDevice, Buffer};
use error::{Error, Result};
use inode::{read_disk_inode, write_disk_inode, Inode};
use inode_cache::{InodeCache, InodeHandle, SimpleInodeCache};
use layout::{DentryType, FileMode, BLOCK_SIZE};
use pagecache::{DirectPageCache, PageCache};
use superblock::Superblock;

/// Origin for `llseek`, mirroring `SEEK_SET`/`SEEK_CUR`/`SEEK_END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Set(i64),
    Current(i64),
    End(i64),
}

/// One entry returned by `readdir`: name, inode number, dentry type tag.
pub struct DirEntry {
    pub name: Vec<u8>,
    pub ino: u32,
    pub kind: DentryType,
}

/// Ties the on-disk structures together into the operations a host VFS
/// actually calls: `mount`, `lookup`, `create`, `mkdir`, `link`, `readdir`,
/// `read`, `write`, `llseek`, `fsync`, `bmap`, `getblocks`, `truncate`,
/// `write_begin`/`write_end`.
pub struct Filesystem<D: BlockDevice> {
    dev: D,
    sb: spin::Mutex<Superblock>,
    inode_bitmap: bitmap::BitmapAllocator,
    data_bitmap: bitmap::BitmapAllocator,
    inodes: SimpleInodeCache,
}

impl<D: BlockDevice> Filesystem<D> {
    /// `fill_super`: reads and validates the superblock, builds the two
    /// bitmap allocators from its region fields, increments and flushes
    /// the mount counter, and loads the root inode.
    pub fn mount(dev: D) -> Result<Self> {
        let mut sb = Superblock::load(&dev)?;
        sb.record_mount(&dev)?;

        let inode_bitmap =
            bitmap::BitmapAllocator::new(sb.raw.inode_bitmap_block_start, sb.raw.inode_bitmap_blocks);
        let data_bitmap =
            bitmap::BitmapAllocator::new(sb.raw.data_bitmap_block_start, sb.raw.data_bitmap_blocks);

        let fs = Self {
            dev,
            sb: spin::Mutex::new(sb),
            inode_bitmap,
            data_bitmap,
            inodes: SimpleInodeCache::new(),
        };
        // Touching the root inode here surfaces a corrupt image (bad
        // on-disk inode record) as a mount-time error rather than on the
        // first lookup.
        fs.get_inode(layout::ROOT_INO)?;
        Ok(fs)
    }

    /// `put_super`: drops every cached inode. There is no dirty-inode
    /// sweep here because every mutator above already flushes durably
    /// before returning; nothing is left pending.
    pub fn unmount(self) {}

    pub fn show_options(&self) -> String {
        self.sb.lock().show_options()
    }

    fn get_inode(&self, ino: u32) -> Result<InodeHandle> {
        let sb = self.sb.lock();
        self.inodes
            .get_or_insert(ino, || read_disk_inode(&self.dev, &sb, ino).map(|raw| Inode::from_raw(ino, &raw)))
    }

    /// Flushes an inode's in-memory record back to its disk slot if dirty.
    ///
    /// Locks the superblock before the inode, matching every other path
    /// that holds both (`create`/`mkdir`) — never the reverse, so two
    /// callers racing a writeback against a `create` can't deadlock on
    /// each other's lock order.
    fn writeback(&self, handle: &InodeHandle) -> Result<()> {
        let sb = self.sb.lock();
        let mut inode = handle.lock();
        if inode.dirty {
            write_disk_inode(&self.dev, &sb, inode.ino, &inode.to_raw(), true)?;
            inode.dirty = false;
        }
        Ok(())
    }

    pub fn lookup(&self, dir_ino: u32, name: &[u8]) -> Result<Option<u32>> {
        let dir = self.get_inode(dir_ino)?;
        let mut dir = dir.lock();
        dir::lookup(&self.dev, &self.data_bitmap, &mut dir, name)
    }

    pub fn readdir(&self, dir_ino: u32) -> Result<Vec<DirEntry>> {
        let dir = self.get_inode(dir_ino)?;
        let mut dir = dir.lock();
        let slots = dir::readdir(&self.dev, &self.data_bitmap, &mut dir)?;
        Ok(slots
            .into_iter()
            .map(|s| DirEntry {
                name: s.dentry.name_bytes().to_vec(),
                ino: s.dentry.inode,
                kind: match s.dentry.kind {
                    1 => DentryType::Regular,
                    2 => DentryType::Directory,
                    3 => DentryType::Fifo,
                    4 => DentryType::Char,
                    5 => DentryType::Block,
                    6 => DentryType::Symlink,
                    7 => DentryType::Socket,
                    _ => DentryType::Unknown,
                },
            })
            .collect())
    }

    pub fn create(&self, parent_ino: u32, name: &[u8], mode: FileMode, now: u32) -> Result<u32> {
        let parent = self.get_inode(parent_ino)?;
        let new_inode = {
            let sb = self.sb.lock();
            let mut parent = parent.lock();
            ops::create(&self.dev, &sb, &self.inode_bitmap, &self.data_bitmap, &mut parent, name, mode, now)?
        };
        let ino = new_inode.ino;
        self.inodes.get_or_insert(ino, || Ok(new_inode))?;
        self.writeback(&parent)?;
        Ok(ino)
    }

    pub fn mkdir(&self, parent_ino: u32, name: &[u8], mode: FileMode, now: u32) -> Result<u32> {
        let parent = self.get_inode(parent_ino)?;
        let new_inode = {
            let sb = self.sb.lock();
            let mut parent = parent.lock();
            ops::mkdir(&self.dev, &sb, &self.inode_bitmap, &self.data_bitmap, &mut parent, name, mode, now)?
        };
        let ino = new_inode.ino;
        self.inodes.get_or_insert(ino, || Ok(new_inode))?;
        self.writeback(&parent)?;
        Ok(ino)
    }

    pub fn link(&self, parent_ino: u32, target_ino: u32, name: &[u8], now: u32) -> Result<()> {
        if parent_ino == target_ino {
            // A directory can never be its own hard-linked, non-directory
            // target; reject up front rather than locking the same inode
            // handle twice below.
            return Err(Error::InvalidArg);
        }
        let parent = self.get_inode(parent_ino)?;
        let target = self.get_inode(target_ino)?;
        {
            // Two distinct per-inode locks are taken together here, unlike
            // every other operation in this file; order by inode number
            // (not call-argument order) so a concurrent `link` the other
            // way around can't deadlock against this one.
            if parent_ino < target_ino {
                let mut parent = parent.lock();
                let mut target = target.lock();
                ops::link(&self.dev, &self.data_bitmap, &mut parent, &mut target, name, now)?;
            } else {
                let mut target = target.lock();
                let mut parent = parent.lock();
                ops::link(&self.dev, &self.data_bitmap, &mut parent, &mut target, name, now)?;
            }
        }
        self.writeback(&parent)?;
        self.writeback(&target)?;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, stopping at
    /// `inode.size`. Returns the number of bytes actually read.
    pub fn read(&self, ino: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let handle = self.get_inode(ino)?;
        let mut inode = handle.lock();
        let cache = DirectPageCache::new(&self.data_bitmap);

        let size = inode.size as u64;
        if offset >= size {
            return Ok(0);
        }
        let to_read = (size - offset).min(buf.len() as u64) as usize;
        let mut done = 0;
        while done < to_read {
            let pos = offset + done as u64;
            let page_index = pos / BLOCK_SIZE as u64;
            let page_off = (pos % BLOCK_SIZE as u64) as usize;
            let chunk = (BLOCK_SIZE - page_off).min(to_read - done);
            let page = cache.readpage(&self.dev, &mut inode, page_index)?;
            buf[done..done + chunk].copy_from_slice(&page.data[page_off..page_off + chunk]);
            done += chunk;
        }
        Ok(done)
    }

    /// Writes `buf` at `offset`, growing the file (and allocating new
    /// blocks lazily through `write_begin`) as needed.
    pub fn write(&self, ino: u32, offset: u64, buf: &[u8]) -> Result<usize> {
        let handle = self.get_inode(ino)?;
        let mut inode = handle.lock();
        let cache = DirectPageCache::new(&self.data_bitmap);

        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let page_index = pos / BLOCK_SIZE as u64;
            let page_off = (pos % BLOCK_SIZE as u64) as usize;
            let chunk = (BLOCK_SIZE - page_off).min(buf.len() - done);

            let mut page = cache.write_begin(&self.dev, &mut inode, page_index)?;
            page.data[page_off..page_off + chunk].copy_from_slice(&buf[done..done + chunk]);
            let new_size = (pos + chunk as u64) as u32;
            cache.commit_write(&self.dev, &page, &mut inode, new_size)?;
            done += chunk;
        }
        drop(inode);
        self.writeback(&handle)?;
        Ok(done)
    }

    /// Resolves the physical block backing logical block `logical` of
    /// `ino`, allocating it first if `create`.
    pub fn getblocks(&self, ino: u32, logical: u64, create: bool) -> Result<u32> {
        let handle = self.get_inode(ino)?;
        let mut inode = handle.lock();
        let physical = blockmap::get_blocks(&self.dev, &self.data_bitmap, &mut inode, logical, create)?;
        drop(inode);
        if create {
            self.writeback(&handle)?;
        }
        Ok(physical)
    }

    /// Read-only form of `getblocks`, never allocates.
    pub fn bmap(&self, ino: u32, logical: u64) -> Result<u32> {
        self.getblocks(ino, logical, false)
    }

    /// `write_begin`/`write_end` as a single host-facing pair: the host
    /// mutates the page between the two calls (used when a caller wants
    /// page-level control instead of `write`'s buffer-at-a-time loop).
    pub fn write_begin(&self, ino: u32, page_index: u64) -> Result<pagecache::Page> {
        let handle = self.get_inode(ino)?;
        let mut inode = handle.lock();
        let cache = DirectPageCache::new(&self.data_bitmap);
        cache.write_begin(&self.dev, &mut inode, page_index)
    }

    pub fn write_end(&self, ino: u32, page: &pagecache::Page, new_size: u32) -> Result<()> {
        let handle = self.get_inode(ino)?;
        let mut inode = handle.lock();
        let cache = DirectPageCache::new(&self.data_bitmap);
        cache.commit_write(&self.dev, page, &mut inode, new_size)?;
        drop(inode);
        self.writeback(&handle)
    }

    /// `tfs_truncate`: the source defers to `block_truncate_page`, which
    /// only zero-fills the tail of the page straddling the new size — no
    /// block is ever freed, since this driver has no unlink/reclaim path to
    /// call. Shrinking `new_size` below the current size zero-fills the
    /// retained tail of its page and updates `inode.size`; growing it
    /// only updates `inode.size` and leaves the gap to be filled by a
    /// later `write` (sparse reads of that gap are not supported, per
    /// `get_blocks`'s `create = false` behavior).
    pub fn truncate(&self, ino: u32, new_size: u32) -> Result<()> {
        let handle = self.get_inode(ino)?;
        let mut inode = handle.lock();
        if new_size < inode.size {
            let page_index = new_size as u64 / BLOCK_SIZE as u64;
            let page_off = (new_size as u64 % BLOCK_SIZE as u64) as usize;
            if page_off != 0 {
                if let Ok(physical) =
                    blockmap::get_blocks(&self.dev, &self.data_bitmap, &mut inode, page_index, false)
                {
                    let mut buf = Buffer::read(&self.dev, physical)?;
                    for b in &mut buf.data_mut()[page_off..] {
                        *b = 0;
                    }
                    buf.sync(&self.dev)?;
                }
            }
        }
        inode.size = new_size;
        inode.mark_dirty();
        drop(inode);
        self.writeback(&handle)
    }

    /// `fsync(datasync)`: flushes the inode's on-disk record. When
    /// `datasync` is set, metadata fields that don't affect how to read
    /// the data back (`atime`) need not be durable, but this driver
    /// always writes the whole 64-byte record — there is no per-field
    /// write path to split it.
    pub fn fsync(&self, ino: u32, _datasync: bool) -> Result<()> {
        let handle = self.get_inode(ino)?;
        self.writeback(&handle)
    }

    /// `llseek`: computes the new offset from `whence`, rejecting a
    /// negative result, one beyond `s_maxbytes`, or one beyond the inode's
    /// current size — `SEEK_END` is bounds-checked the same way as
    /// `SEEK_SET`, a resolution recorded in DESIGN.md. `pos` is the caller's
    /// current file position, against which `SeekFrom::Current` is
    /// resolved; this driver keeps no open-file state of its own, so the
    /// caller (whatever tracks the file descriptor) supplies it.
    pub fn llseek(&self, ino: u32, pos: u64, whence: SeekFrom) -> Result<u64> {
        let handle = self.get_inode(ino)?;
        let sb = self.sb.lock();
        let inode = handle.lock();

        let resolved: i64 = match whence {
            SeekFrom::Set(off) => off,
            SeekFrom::Current(off) => pos as i64 + off,
            SeekFrom::End(k) => inode.size as i64 + k,
        };

        if resolved < 0 || resolved as u64 > sb.max_bytes() || resolved as u64 > inode.size as u64 {
            return Err(Error::InvalidArg);
        }
        Ok(resolved as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device::mem::MemDevice;
    use device::write_at;
    use layout::{RawSuperblock, MAGIC};

    fn make_image() -> MemDevice {
        let dev = MemDevice::new(64);
        let sb = RawSuperblock {
            magic: MAGIC,
            inode_bitmap_blocks: 1,
            data_bitmap_blocks: 1,
            inode_table_entries: 64,
            inode_table_blocks: 4,
            data_blocks_per_inode: 4,
            size: (BLOCK_SIZE * (4 + 256)) as u32,
            mnt_count: 0,
            max_mnt_count: 100,
            inode_bitmap_block_start: 2,
            data_bitmap_block_start: 3,
            inode_table_block_start: 4,
            root_dir_data_block_start: 8,
            tmp_dir_data_block_start: 9,
            reserve_data_block_start: 10,
            data_block_start: 11,
        };
        let mut block = [0u8; BLOCK_SIZE];
        write_at(&mut block, 0, &sb);
        dev.write_block(1, &block).unwrap();

        // Mark inode bit 0 (unused) and ROOT_INO (1) allocated.
        let mut bitmap_block = [0u8; BLOCK_SIZE];
        bitmap_block[0] = 0b0000_0011;
        dev.write_block(2, &bitmap_block).unwrap();

        // The data bitmap addresses the whole device from block 0 (the
        // original source never offsets a freshly allocated bit by
        // `data_block_start` — mkfs is the one that pre-marks the reserved
        // low blocks as busy). Blocks 0-10 are reserved (boot block,
        // superblock, both bitmaps, inode table); block 11 is the root
        // directory's own data page, also pre-marked busy by mkfs.
        let mut data_bitmap_block = [0u8; BLOCK_SIZE];
        data_bitmap_block[0] = 0xFF; // bits 0-7
        data_bitmap_block[1] = 0x0F; // bits 8-11
        dev.write_block(3, &data_bitmap_block).unwrap();

        let mut root_raw = layout::RawInode::zeroed();
        root_raw.mode = FileMode::S_IFDIR.bits();
        root_raw.hard_link_count = 2;
        root_raw.data_blocks[0] = 11;
        root_raw.blocks = 1;
        root_raw.size = layout::DENTRY_SIZE as u32 * 2;
        let (block, offset) = inode::inode_location(
            &Superblock {
                raw: RawSuperblock {
                    inode_table_block_start: 4,
                    ..sb
                },
            },
            layout::ROOT_INO,
        );
        let mut inode_block = [0u8; BLOCK_SIZE];
        write_at(&mut inode_block, offset, &root_raw);
        dev.write_block(block, &inode_block).unwrap();

        dir::new_default_dentries(&dev, 11, layout::ROOT_INO, layout::ROOT_INO).unwrap();

        dev
    }

    #[test]
    fn mount_loads_root_and_lists_default_dentries() {
        let dev = make_image();
        let fs = Filesystem::mount(dev).unwrap();

        let entries = fs.readdir(layout::ROOT_INO).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, b".");
        assert_eq!(entries[1].name, b"..");
    }

    #[test]
    fn create_then_write_then_read_round_trips() {
        let dev = make_image();
        let fs = Filesystem::mount(dev).unwrap();

        let ino = fs
            .create(layout::ROOT_INO, b"f", FileMode::S_IRUSR | FileMode::S_IWUSR, 1000)
            .unwrap();

        let payload = [7u8; 5000];
        let written = fs.write(ino, 0, &payload).unwrap();
        assert_eq!(written, 5000);

        let mut out = [0u8; 5000];
        let read = fs.read(ino, 0, &mut out).unwrap();
        assert_eq!(read, 5000);
        assert_eq!(&out[..], &payload[..]);
    }

    #[test]
    fn mkdir_then_lookup_from_root() {
        let dev = make_image();
        let fs = Filesystem::mount(dev).unwrap();

        let ino = fs.mkdir(layout::ROOT_INO, b"a", FileMode::S_IRWXU, 1000).unwrap();
        assert_eq!(fs.lookup(layout::ROOT_INO, b"a").unwrap(), Some(ino));

        let entries = fs.readdir(ino).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, b".");
        assert_eq!(entries[1].name, b"..");
    }

    #[test]
    fn link_creates_a_second_name_for_the_same_inode() {
        let dev = make_image();
        let fs = Filesystem::mount(dev).unwrap();

        let ino = fs
            .create(layout::ROOT_INO, b"f", FileMode::S_IRUSR, 1000)
            .unwrap();
        fs.link(layout::ROOT_INO, ino, b"g", 2000).unwrap();

        assert_eq!(fs.lookup(layout::ROOT_INO, b"g").unwrap(), Some(ino));
    }

    #[test]
    fn link_stamps_ctime_on_the_target() {
        let dev = make_image();
        let fs = Filesystem::mount(dev).unwrap();

        let ino = fs
            .create(layout::ROOT_INO, b"f", FileMode::S_IRUSR, 1000)
            .unwrap();
        fs.link(layout::ROOT_INO, ino, b"g", 2000).unwrap();

        let handle = fs.get_inode(ino).unwrap();
        assert_eq!(handle.lock().ctime, 2000);
    }

    #[test]
    fn link_rejects_an_inode_linked_to_itself() {
        let dev = make_image();
        let fs = Filesystem::mount(dev).unwrap();
        assert_eq!(
            fs.link(layout::ROOT_INO, layout::ROOT_INO, b"g", 1000)
                .unwrap_err(),
            Error::InvalidArg
        );
    }

    #[test]
    fn llseek_rejects_negative_and_past_size() {
        let dev = make_image();
        let fs = Filesystem::mount(dev).unwrap();
        let ino = fs
            .create(layout::ROOT_INO, b"f", FileMode::S_IRUSR, 1000)
            .unwrap();
        fs.write(ino, 0, &[1, 2, 3, 4]).unwrap();

        assert_eq!(fs.llseek(ino, 0, SeekFrom::Set(2)).unwrap(), 2);
        assert_eq!(fs.llseek(ino, 0, SeekFrom::End(0)).unwrap(), 4);
        assert_eq!(
            fs.llseek(ino, 0, SeekFrom::Set(-1)).unwrap_err(),
            Error::InvalidArg
        );
        assert_eq!(
            fs.llseek(ino, 0, SeekFrom::End(1)).unwrap_err(),
            Error::InvalidArg
        );
    }

    #[test]
    fn llseek_current_resolves_against_the_caller_supplied_position() {
        let dev = make_image();
        let fs = Filesystem::mount(dev).unwrap();
        let ino = fs
            .create(layout::ROOT_INO, b"f", FileMode::S_IRUSR, 1000)
            .unwrap();
        fs.write(ino, 0, &[1, 2, 3, 4]).unwrap();

        assert_eq!(fs.llseek(ino, 0, SeekFrom::Current(2)).unwrap(), 2);
        assert_eq!(fs.llseek(ino, 2, SeekFrom::Current(2)).unwrap(), 4);
        assert_eq!(
            fs.llseek(ino, 1, SeekFrom::Current(-5001)).unwrap_err(),
            Error::InvalidArg
        );
    }

    #[test]
    fn mkdir_exhaustion_rolls_back_the_inode_bit_when_no_data_bit_remains() {
        let dev = make_image();
        // Pre-fill the one-block data bitmap entirely so no data bit is
        // left for `mkdir`'s directory-page allocation; the root's own
        // block (bit 0) is already one of these.
        let saturated = [0xFFu8; BLOCK_SIZE];
        dev.write_block(3, &saturated).unwrap();
        let fs = Filesystem::mount(dev).unwrap();

        let err = fs.mkdir(layout::ROOT_INO, b"a", FileMode::S_IRWXU, 1000).unwrap_err();
        assert_eq!(err, Error::NoSpace);

        // The inode bit claimed for the failed mkdir must have rolled
        // back: the next `create`, which needs no data bit, must reuse
        // inode number 2 (the first free inode bit after the root).
        let file_ino = fs
            .create(layout::ROOT_INO, b"f", FileMode::S_IRUSR, 1000)
            .unwrap();
        assert_eq!(file_ino, 2);
    }
}
