//! On-disk layout: the superblock, the 64-byte inode record, and the
//! 32-byte directory entry. All integers are little-endian (the host
//! architecture is assumed little-endian here, matching the on-disk images
//! this driver is built to read) unsigned 32-bit unless noted.
//!
//! Field order and sizes are taken from `tfs.h` in the original source and
//! must not be reordered: the structs are read and written by casting a
//! raw block buffer directly, the same way `BufData` is cast to `Dinode`
//! elsewhere in this crate's lineage.

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

/// Size in bytes of one device block.
pub const BLOCK_SIZE: usize = 1024;
/// Size in bytes of one on-disk inode record.
pub const INODE_SIZE: usize = 64;
/// `ino * INODE_SIZE == ino << INODE_SIZE_BITS`.
pub const INODE_SIZE_BITS: u32 = 6;
/// Number of direct block pointers held in an inode.
pub const DIRECT_BLOCKS_PER_INODE: usize = 4;
/// Max length, in bytes, of a directory entry name.
pub const DENTRY_NAME_LEN: usize = 20;
/// Size in bytes of one directory entry.
pub const DENTRY_SIZE: usize = 32;
/// Filesystem magic, checked by `mount`.
pub const MAGIC: u32 = 0x1234;
/// Inode number of the root directory.
pub const ROOT_INO: u32 = 1;
/// Inode number the source reserves for a temporary directory; the
/// superblock carries a region for it but this driver never touches it.
pub const TMP_DIR_INO: u32 = 2;
/// Hard-coded mount counter ceiling from the source.
pub const MAX_MNT_COUNT: u32 = 100;
/// Number of `u32` block pointers that fit in one indirect block.
pub const PTRS_PER_INDIRECT_BLOCK: usize = BLOCK_SIZE / core::mem::size_of::<u32>();
/// Largest representable file size under one level of indirection.
pub const MAX_FILE_BLOCKS: usize = DIRECT_BLOCKS_PER_INODE + PTRS_PER_INDIRECT_BLOCK;

const_assert_eq!(DENTRY_SIZE, 4 + 4 + 4 + DENTRY_NAME_LEN);

/// On-disk superblock, read from block index 1.
///
/// Invariant: region ranges (`*_block_start` fields) are non-overlapping
/// and strictly ordered; `max_mnt_count == MAX_MNT_COUNT`.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct RawSuperblock {
    pub magic: u32,
    pub inode_bitmap_blocks: u32,
    pub data_bitmap_blocks: u32,
    pub inode_table_entries: u32,
    pub inode_table_blocks: u32,
    pub data_blocks_per_inode: u32,
    pub size: u32,
    pub mnt_count: u32,
    pub max_mnt_count: u32,
    pub inode_bitmap_block_start: u32,
    pub data_bitmap_block_start: u32,
    pub inode_table_block_start: u32,
    pub root_dir_data_block_start: u32,
    pub tmp_dir_data_block_start: u32,
    pub reserve_data_block_start: u32,
    pub data_block_start: u32,
}

const_assert_eq!(core::mem::size_of::<RawSuperblock>(), 64);

/// On-disk inode record, 64 bytes (`INODE_SIZE`).
///
/// Invariants: `hard_link_count >= 1` while live; `size <= BLOCK_SIZE *
/// (DIRECT_BLOCKS_PER_INODE + PTRS_PER_INDIRECT_BLOCK)`; each entry of
/// `data_blocks` and `root_indirect_data_block` is either 0 (unassigned) or
/// a valid allocated data block number.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct RawInode {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub atime: u32,
    pub hard_link_count: u32,
    pub size: u32,
    pub blocks: u32,
    pub data_blocks: [u32; DIRECT_BLOCKS_PER_INODE],
    pub root_indirect_data_block: u32,
    pub pad: [u8; 8],
}

const_assert_eq!(core::mem::size_of::<RawInode>(), INODE_SIZE);

impl RawInode {
    pub const fn zeroed() -> Self {
        Self {
            mode: 0,
            uid: 0,
            gid: 0,
            ctime: 0,
            mtime: 0,
            atime: 0,
            hard_link_count: 0,
            size: 0,
            blocks: 0,
            data_blocks: [0; DIRECT_BLOCKS_PER_INODE],
            root_indirect_data_block: 0,
            pad: [0; 8],
        }
    }
}

/// On-disk directory entry, 32 bytes (`DENTRY_SIZE`).
///
/// `inode == 0` marks a free slot. `name` is not null-terminated; only the
/// first `len` bytes are meaningful.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct RawDentry {
    pub kind: u32,
    pub inode: u32,
    pub len: u32,
    pub name: [u8; DENTRY_NAME_LEN],
}

const_assert_eq!(core::mem::size_of::<RawDentry>(), DENTRY_SIZE);

impl RawDentry {
    pub const fn zeroed() -> Self {
        Self {
            kind: DentryType::Unknown as u32,
            inode: 0,
            len: 0,
            name: [0; DENTRY_NAME_LEN],
        }
    }

    pub fn is_free(&self) -> bool {
        self.inode == 0
    }

    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..(self.len as usize).min(DENTRY_NAME_LEN)]
    }
}

/// Dentry `type` tag, mirroring the source's `DT_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DentryType {
    Unknown = 0,
    Regular = 1,
    Directory = 2,
    Fifo = 3,
    Char = 4,
    Block = 5,
    Symlink = 6,
    Socket = 7,
}

impl DentryType {
    pub fn from_mode(mode: FileMode) -> Self {
        if mode.contains(FileMode::S_IFDIR) {
            DentryType::Directory
        } else if mode.contains(FileMode::S_IFREG) {
            DentryType::Regular
        } else if mode.contains(FileMode::S_IFIFO) {
            DentryType::Fifo
        } else if mode.contains(FileMode::S_IFCHR) {
            DentryType::Char
        } else if mode.contains(FileMode::S_IFBLK) {
            DentryType::Block
        } else if mode.contains(FileMode::S_IFLNK) {
            DentryType::Symlink
        } else if mode.contains(FileMode::S_IFSOCK) {
            DentryType::Socket
        } else {
            DentryType::Unknown
        }
    }
}

bitflags::bitflags! {
    /// POSIX-style file type and permission bits, stored verbatim in
    /// `RawInode::mode`.
    pub struct FileMode: u32 {
        const S_IFIFO  = 0o010000;
        const S_IFCHR  = 0o020000;
        const S_IFDIR  = 0o040000;
        const S_IFBLK  = 0o060000;
        const S_IFREG  = 0o100000;
        const S_IFLNK  = 0o120000;
        const S_IFSOCK = 0o140000;
        const S_IFMT   = 0o170000;

        const S_IRWXU = 0o700;
        const S_IRUSR = 0o400;
        const S_IWUSR = 0o200;
        const S_IXUSR = 0o100;
        const S_IRWXG = 0o070;
        const S_IRGRP = 0o040;
        const S_IWGRP = 0o020;
        const S_IXGRP = 0o010;
        const S_IRWXO = 0o007;
        const S_IROTH = 0o004;
        const S_IWOTH = 0o002;
        const S_IXOTH = 0o001;
    }
}

impl FileMode {
    pub fn is_dir(self) -> bool {
        (self & FileMode::S_IFMT) == FileMode::S_IFDIR
    }

    pub fn is_regular(self) -> bool {
        (self & FileMode::S_IFMT) == FileMode::S_IFREG
    }
}
