use alloc::sync::Arc;
use spin::Mutex;

use crate::{
    bitmap::Bitmap,
    block_cache::BlockIo,
    block_dev::BlockDevice,
    error::{FsError, FsResult},
    layout::{DiskInode, DiskInodeType, SuperBlock},
    vfs::Inode,
    BLOCK_SIZE,
};

/// The whole metadata context of one filesystem instance: device + cache,
/// both bitmaps, and the area geometry. Every engine operation goes through
/// one `Mutex<ReefFileSystem>`, so independent instances are fully isolated
/// and a port to a concurrent environment starts from one coarse lock.
pub struct ReefFileSystem {
    pub io: BlockIo,
    pub inode_bitmap: Bitmap,
    pub data_bitmap: Bitmap,
    inode_block_start: u32,
    data_block_start: u32,
}

/// Superblock counters as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStat {
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub block_size: usize,
}

type DataBlock = [u8; BLOCK_SIZE];

impl ReefFileSystem {
    /// Format the device and create a ReefFileSystem on it.
    /// # Parameter
    /// * 'block_device' - Block device.
    /// * 'total_blocks' - Total number of device blocks.
    /// * 'inode_bitmap_blocks' - The number of blocks occupied by the inode
    ///   bitmap.
    /// # Return
    /// * A new ReefFileSystem.
    pub fn create(
        block_device: Arc<dyn BlockDevice>,
        total_blocks: u32,
        inode_bitmap_blocks: u32,
    ) -> Arc<Mutex<Self>> {
        let io = BlockIo::new(block_device);
        // Block 0 is the super block, so the inode bitmap starts at block 1
        let inode_bitmap = Bitmap::new(1, inode_bitmap_blocks as usize);
        let inode_quantity = inode_bitmap.maximum();
        // ceil
        let inode_blocks_quantity =
            ((inode_quantity * core::mem::size_of::<DiskInode>() + BLOCK_SIZE - 1) / BLOCK_SIZE)
                as u32;
        let inode_total_blocks = inode_bitmap_blocks + inode_blocks_quantity;
        assert!(
            total_blocks > inode_total_blocks + 2,
            "Not enough blocks to hold the metadata areas."
        );
        let data_total_blocks = total_blocks - 1 - inode_total_blocks;
        // ceil
        let data_bitmap_blocks = (data_total_blocks + 4096) / 4097;
        let data_blocks_quantity = data_total_blocks - data_bitmap_blocks;
        let data_bitmap = Bitmap::new(
            (inode_total_blocks + 1) as usize,
            data_bitmap_blocks as usize,
        );
        let mut fs = Self {
            io: io.clone(),
            inode_bitmap,
            data_bitmap,
            inode_block_start: inode_bitmap_blocks + 1,
            data_block_start: inode_total_blocks + data_bitmap_blocks + 1,
        };
        for i in 0..total_blocks as usize {
            io.block(i).lock().modify(0, |data_block: &mut DataBlock| {
                for byte in data_block {
                    *byte = 0;
                }
            })
        }
        // write the super block
        io.block(0).lock().modify(0, |super_block: &mut SuperBlock| {
            super_block.initialize(
                total_blocks,
                inode_bitmap_blocks,
                inode_blocks_quantity,
                data_bitmap_blocks,
                data_blocks_quantity,
            );
        });
        // create the root directory at inode 0
        assert_eq!(fs.alloc_inode(), Ok(0));
        let (root_inode_block_id, root_inode_block_offset) = fs.inode_position(0);
        io.block(root_inode_block_id as usize)
            .lock()
            .modify(root_inode_block_offset, |inode: &mut DiskInode| {
                inode.initialize(DiskInodeType::Directory);
            });
        io.sync_all();
        Arc::new(Mutex::new(fs))
    }

    /// Mount an existing filesystem from device block 0. The superblock must
    /// pass magic, format-version and checksum verification before any of
    /// its geometry is trusted.
    pub fn open(block_device: Arc<dyn BlockDevice>) -> FsResult<Arc<Mutex<Self>>> {
        let io = BlockIo::new(block_device);
        io.block(0).lock().read(0, |super_block: &SuperBlock| {
            if !super_block.is_valid() {
                return Err(FsError::Corrupt);
            }
            let fs = Self {
                io: io.clone(),
                inode_bitmap: Bitmap::new(1, super_block.inode_bitmap_blocks as usize),
                data_bitmap: Bitmap::new(
                    1 + super_block.inode_bitmap_blocks as usize
                        + super_block.inode_area_blocks as usize,
                    super_block.data_bitmap_blocks as usize,
                ),
                inode_block_start: 1 + super_block.inode_bitmap_blocks,
                data_block_start: 1
                    + super_block.inode_bitmap_blocks
                    + super_block.inode_area_blocks
                    + super_block.data_bitmap_blocks,
            };
            Ok(Arc::new(Mutex::new(fs)))
        })
    }

    /// Reserve an inode slot (the first free bitmap bit, which is also the
    /// inode id).
    pub fn alloc_inode(&mut self) -> FsResult<u32> {
        self.inode_bitmap
            .alloc(&self.io)
            .map(|id| id as u32)
            .ok_or(FsError::TableFull)
    }

    /// Return an inode slot to the table.
    pub fn dealloc_inode(&mut self, inode_id: u32) {
        self.inode_bitmap.dealloc(&self.io, inode_id as usize);
    }

    /// Allocate one data block.
    /// # Return
    /// * Device block id, or OutOfSpace with all counters unchanged.
    pub fn alloc_data(&mut self) -> FsResult<u32> {
        let bit = self
            .data_bitmap
            .alloc(&self.io)
            .ok_or(FsError::OutOfSpace)?;
        self.adjust_free_blocks(-1);
        Ok(bit as u32 + self.data_block_start)
    }

    /// Zero the block payload and return it to the free pool.
    /// # Parameter
    /// * 'block_id' - Device block id.
    pub fn dealloc_data(&mut self, block_id: u32) {
        self.io
            .block(block_id as usize)
            .lock()
            .modify(0, |data_block: &mut DataBlock| {
                data_block.iter_mut().for_each(|b| *b = 0);
            });
        self.data_bitmap.dealloc(
            &self.io,
            (block_id - self.data_block_start) as usize,
        );
        self.adjust_free_blocks(1);
    }

    // The superblock's free count moves in the same cache transaction as the
    // bitmap bit, so the two can never drift apart.
    fn adjust_free_blocks(&mut self, delta: i32) {
        self.io.block(0).lock().modify(0, |super_block: &mut SuperBlock| {
            let free_blocks = (super_block.free_blocks as i32 + delta) as u32;
            super_block.set_free_blocks(free_blocks);
        });
    }

    /// Get the block number and offset of the block where the inode is
    /// located.
    /// # Parameter
    /// * 'inode_id' - Inode id.
    /// # Return
    /// * (block id, offset)
    pub fn inode_position(&self, inode_id: u32) -> (u32, usize) {
        let inode_size = core::mem::size_of::<DiskInode>();
        let block_id = inode_id / (BLOCK_SIZE / inode_size) as u32 + self.inode_block_start;
        let offset = (inode_id as usize % (BLOCK_SIZE / inode_size)) * inode_size;
        (block_id, offset)
    }

    /// Current superblock counters.
    pub fn stat(&self) -> FsStat {
        self.io.block(0).lock().read(0, |super_block: &SuperBlock| FsStat {
            total_blocks: super_block.total_blocks,
            free_blocks: super_block.free_blocks,
            block_size: BLOCK_SIZE,
        })
    }

    /// Flush all dirty cached blocks to the device.
    pub fn sync(&self) {
        self.io.sync_all();
    }

    /// Get the root directory inode.
    pub fn root_inode(fs: &Arc<Mutex<Self>>) -> Inode {
        let io = fs.lock().io.clone();
        let (block_id, offset) = fs.lock().inode_position(0);
        Inode::new(block_id as usize, offset, Arc::clone(fs), io)
    }
}
