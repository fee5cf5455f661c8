//! Page-cache adapter: the host-provided page cache this driver drives
//! through `write_begin`/`write_end`/`readpage`/`writepage`, mirroring the
//! `address_space_operations` hooks `driver/file.c` implements. Page size is
//! fixed at `BLOCK_SIZE` (see DESIGN.md for why): with no multi-block pages,
//! each page maps to exactly one `bmap` lookup and this adapter is a thin
//! pass-through to `blockmap::get_blocks`.

use alloc::vec::Vec;

use crate::bitmap::BitmapAllocator;
use crate::blockmap::get_blocks;
use crate::device::{BlockDevice, Buffer};
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::layout::BLOCK_SIZE;

/// One page of file content, exactly one block wide.
pub struct Page {
    pub index: u64,
    pub data: [u8; BLOCK_SIZE],
}

/// The page-cache side of a read/write: resolves the page's backing block
/// (allocating it on a write) and moves bytes between the page and the
/// device.
pub trait PageCache {
    /// `write_begin`: ensures the page at `index` is mapped (allocating on
    /// demand) and returns it loaded with current on-disk content, or
    /// zeroed if the block was just allocated.
    fn write_begin(&self, dev: &dyn BlockDevice, inode: &mut Inode, index: u64) -> Result<Page>;

    /// `write_end` / `commit_write`: flushes `page` back to its mapped
    /// block and updates `inode.size` if the write extended the file.
    fn commit_write(
        &self,
        dev: &dyn BlockDevice,
        page: &Page,
        inode: &mut Inode,
        new_size: u32,
    ) -> Result<()>;

    /// `readpage`: loads the page at `index`. `Error::InvalidArg` if the
    /// page lies past the inode's allocated blocks.
    fn readpage(&self, dev: &dyn BlockDevice, inode: &mut Inode, index: u64) -> Result<Page>;

    /// `writepage`: flushes an already-populated page without touching
    /// `inode.size` (used by `fsync`, not by a size-extending write).
    fn writepage(&self, dev: &dyn BlockDevice, inode: &mut Inode, page: &Page) -> Result<()> {
        let physical = get_blocks(dev, self.data_alloc_hint(), inode, page.index, false)?;
        let mut buf = Buffer::zeroed(physical);
        buf.data_mut().copy_from_slice(&page.data);
        buf.sync(dev)
    }

    /// `readpages` / `writepages`: the batch forms of the single-page hooks
    /// above, used by sequential scans (`readdir`, bulk write). The default
    /// implementation simply loops; a host with real readahead may
    /// override it.
    fn readpages(&self, dev: &dyn BlockDevice, inode: &mut Inode, indices: &[u64]) -> Result<Vec<Page>> {
        let mut pages = Vec::with_capacity(indices.len());
        for &idx in indices {
            pages.push(self.readpage(dev, inode, idx)?);
        }
        Ok(pages)
    }

    fn writepages(&self, dev: &dyn BlockDevice, inode: &mut Inode, pages: &[Page]) -> Result<()> {
        for page in pages {
            self.writepage(dev, inode, page)?;
        }
        Ok(())
    }

    /// `bmap`: the read-only logical-to-physical query used by `ioctl(FIBMAP)`
    /// style callers; never allocates.
    fn bmap(&self, dev: &dyn BlockDevice, inode: &mut Inode, index: u64) -> Result<u32> {
        get_blocks(dev, self.data_alloc_hint(), inode, index, false)
    }

    /// Gives the default trait-method bodies above access to the
    /// allocator without widening every signature; implementors simply
    /// return the allocator they were constructed with.
    fn data_alloc_hint(&self) -> &BitmapAllocator;
}

/// Default `PageCache` used outside a real kernel context: resolves pages
/// directly against a `BlockDevice`, with no separate cache layer of its
/// own (the device is assumed to be a `MemDevice` already holding
/// everything in memory).
pub struct DirectPageCache<'a> {
    data_alloc: &'a BitmapAllocator,
}

impl<'a> DirectPageCache<'a> {
    pub fn new(data_alloc: &'a BitmapAllocator) -> Self {
        Self { data_alloc }
    }
}

impl<'a> PageCache for DirectPageCache<'a> {
    fn write_begin(&self, dev: &dyn BlockDevice, inode: &mut Inode, index: u64) -> Result<Page> {
        let physical = get_blocks(dev, self.data_alloc, inode, index, true)?;
        let buf = Buffer::read(dev, physical)?;
        Ok(Page {
            index,
            data: *buf.data(),
        })
    }

    fn commit_write(
        &self,
        dev: &dyn BlockDevice,
        page: &Page,
        inode: &mut Inode,
        new_size: u32,
    ) -> Result<()> {
        let physical = get_blocks(dev, self.data_alloc, inode, page.index, true)?;
        let mut buf = Buffer::zeroed(physical);
        buf.data_mut().copy_from_slice(&page.data);
        buf.sync(dev)?;
        if new_size > inode.size {
            inode.size = new_size;
            inode.mark_dirty();
        }
        Ok(())
    }

    fn readpage(&self, dev: &dyn BlockDevice, inode: &mut Inode, index: u64) -> Result<Page> {
        let physical = get_blocks(dev, self.data_alloc, inode, index, false)?;
        if physical == 0 {
            return Err(Error::InvalidArg);
        }
        let buf = Buffer::read(dev, physical)?;
        Ok(Page {
            index,
            data: *buf.data(),
        })
    }

    fn data_alloc_hint(&self) -> &BitmapAllocator {
        self.data_alloc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mem::MemDevice;
    use crate::layout::RawInode;

    #[test]
    fn write_then_read_round_trips_through_a_page() {
        let dev = MemDevice::new(16);
        let alloc = BitmapAllocator::new(8, 1);
        let cache = DirectPageCache::new(&alloc);
        let mut inode = Inode::from_raw(5, &RawInode::zeroed());

        let mut page = cache.write_begin(&dev, &mut inode, 0).unwrap();
        page.data[0] = 0xAB;
        cache.commit_write(&dev, &page, &mut inode, BLOCK_SIZE as u32).unwrap();
        assert_eq!(inode.size, BLOCK_SIZE as u32);

        let read_back = cache.readpage(&dev, &mut inode, 0).unwrap();
        assert_eq!(read_back.data[0], 0xAB);
    }

    #[test]
    fn readpage_past_allocation_is_invalid_arg() {
        let dev = MemDevice::new(16);
        let alloc = BitmapAllocator::new(8, 1);
        let cache = DirectPageCache::new(&alloc);
        let mut inode = Inode::from_raw(5, &RawInode::zeroed());
        assert_eq!(
            cache.readpage(&dev, &mut inode, 0).unwrap_err(),
            Error::InvalidArg
        );
    }
}
