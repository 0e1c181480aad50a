use alloc::vec::Vec;

use crate::{
    block_cache::BlockIo, BLOCK_SIZE, DIRENTRY_SIZE, INODE_DIRECT_COUNT, INODE_INDIRECT_COUNT,
    NAME_LENGTH_LIMIT, REEF_MAGIC, REEF_VERSION,
};

/// Bitwise CRC32 (IEEE polynomial) over a run of words, little-endian byte
/// order.
fn crc32(words: &[u32]) -> u32 {
    let mut crc = u32::MAX;
    for word in words {
        for byte in word.to_le_bytes() {
            crc ^= byte as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
            }
        }
    }
    !crc
}

#[repr(C)]
pub struct SuperBlock {
    magic: u32,
    version: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub inode_bitmap_blocks: u32,
    pub inode_area_blocks: u32,
    pub data_bitmap_blocks: u32,
    pub data_area_blocks: u32,
    checksum: u32,
}

impl SuperBlock {
    pub fn initialize(
        &mut self,
        total_blocks: u32,
        inode_bitmap_blocks: u32,
        inode_area_blocks: u32,
        data_bitmap_blocks: u32,
        data_area_blocks: u32,
    ) {
        *self = Self {
            magic: REEF_MAGIC,
            version: REEF_VERSION,
            total_blocks,
            // every data block starts out free
            free_blocks: data_area_blocks,
            inode_bitmap_blocks,
            inode_area_blocks,
            data_bitmap_blocks,
            data_area_blocks,
            checksum: 0,
        };
        self.checksum = self.compute_checksum();
    }

    fn compute_checksum(&self) -> u32 {
        crc32(&[
            self.magic,
            self.version,
            self.total_blocks,
            self.free_blocks,
            self.inode_bitmap_blocks,
            self.inode_area_blocks,
            self.data_bitmap_blocks,
            self.data_area_blocks,
        ])
    }

    /// Magic, format version and checksum must all verify before any other
    /// field is trusted.
    pub fn is_valid(&self) -> bool {
        self.magic == REEF_MAGIC
            && self.version == REEF_VERSION
            && self.checksum == self.compute_checksum()
    }

    /// Adjust the free-data-block count, keeping the checksum fresh.
    pub fn set_free_blocks(&mut self, free_blocks: u32) {
        assert!(free_blocks <= self.data_area_blocks);
        self.free_blocks = free_blocks;
        self.checksum = self.compute_checksum();
    }
}

#[derive(PartialEq)]
pub enum DiskInodeType {
    File,
    Directory,
}

#[repr(C)]
pub struct DiskInode {
    pub size: u32,
    pub direct: [u32; INODE_DIRECT_COUNT],
    pub indirect: u32,
    type_: DiskInodeType,
}

type IndirectBlock = [u32; INODE_INDIRECT_COUNT];
type DataBlock = [u8; BLOCK_SIZE];

impl DiskInode {
    pub fn initialize(&mut self, type_: DiskInodeType) {
        self.size = 0;
        self.direct.iter_mut().for_each(|v| *v = 0);
        self.indirect = 0;
        self.type_ = type_;
    }
    /// Determine whether the current Inode is a directory.
    pub fn is_directory(&self) -> bool {
        self.type_ == DiskInodeType::Directory
    }
    /// Determine whether the current Inode is a file.
    pub fn is_file(&self) -> bool {
        self.type_ == DiskInodeType::File
    }
    /// Get actual block number by the linear data block number inside the
    /// Inode, resolving through the indirect block when needed.
    /// # Parameter
    /// * 'inner_id' - Linear data block number inside the Inode.
    /// * 'io' - Block cache handle.
    /// # Return
    /// * Actual block number.
    pub fn get_block_id(&self, inner_id: u32, io: &BlockIo) -> u32 {
        let inner_id = inner_id as usize;
        if inner_id < INODE_DIRECT_COUNT {
            self.direct[inner_id]
        } else {
            io.block(self.indirect as usize)
                .lock()
                .read(0, |indirect_block: &IndirectBlock| {
                    indirect_block[inner_id - INODE_DIRECT_COUNT]
                })
        }
    }
    /// Calculate the number of data blocks contained in the current Inode.
    pub fn data_blocks(&self) -> u32 {
        Self::data_blocks_by_size(self.size)
    }
    /// Calculate the number of blocks required to save size bytes.
    fn data_blocks_by_size(size: u32) -> u32 {
        // rounded up
        (size + BLOCK_SIZE as u32 - 1) / BLOCK_SIZE as u32
    }
    /// Calculate the number of blocks required to save `size` bytes of data,
    /// including the indirect index block once the direct range is exceeded.
    pub fn total_blocks_by_size(size: u32) -> u32 {
        let data_blocks = Self::data_blocks_by_size(size);
        let mut total = data_blocks;
        if data_blocks > INODE_DIRECT_COUNT as u32 {
            total += 1;
        }
        total
    }
    /// Calculate the number of blocks required to increase the Inode to its
    /// new size.
    pub fn blocks_num_needed(&self, new_size: u32) -> u32 {
        assert!(new_size > self.size);
        Self::total_blocks_by_size(new_size) - Self::total_blocks_by_size(self.size)
    }
    /// Add new blocks to the Inode.
    /// The new blocks must include data blocks and the index block when the
    /// growth crosses the direct range.
    /// # Parameter
    /// * 'new_size' - New size of Inode.
    /// * 'new_blocks' - The new blocks the Inode will contain.
    /// * 'io' - Block cache handle.
    pub fn increase_size(&mut self, new_size: u32, new_blocks: Vec<u32>, io: &BlockIo) {
        let mut current_block = self.data_blocks();
        self.size = new_size;
        let mut total_blocks = self.data_blocks();
        let mut new_blocks = new_blocks.into_iter();
        // fill direct blocks
        while current_block < total_blocks.min(INODE_DIRECT_COUNT as u32) {
            self.direct[current_block as usize] = new_blocks.next().unwrap();
            current_block += 1;
        }
        // The indirect tier needs an index block of its own the first time
        // the direct range is crossed.
        if total_blocks > INODE_DIRECT_COUNT as u32 {
            if current_block == INODE_DIRECT_COUNT as u32 {
                self.indirect = new_blocks.next().unwrap();
            }
            current_block -= INODE_DIRECT_COUNT as u32;
            total_blocks -= INODE_DIRECT_COUNT as u32;
            io.block(self.indirect as usize)
                .lock()
                .modify(0, |indirect_block: &mut IndirectBlock| {
                    while current_block < total_blocks {
                        indirect_block[current_block as usize] = new_blocks.next().unwrap();
                        current_block += 1;
                    }
                });
        }
        // All new blocks should be consumed
        assert!(new_blocks.next().is_none());
    }
    /// Clear the Inode and return all blocks that need to be recycled: the
    /// direct blocks, then the blocks behind the indirect index, then the
    /// index block itself. Pointer fields go back to the unallocated
    /// sentinel.
    /// # Parameter
    /// * 'io' - Block cache handle.
    /// # Return
    /// * All blocks that need to be recycled.
    pub fn clear_size(&mut self, io: &BlockIo) -> Vec<u32> {
        let total_recycle = Self::total_blocks_by_size(self.size);
        let mut data_recycle = self.data_blocks();
        let mut collector: Vec<u32> = Vec::with_capacity(total_recycle as usize);
        // Recycle direct blocks.
        let mut current_data_block = 0;
        while current_data_block < data_recycle.min(INODE_DIRECT_COUNT as u32) {
            collector.push(self.direct[current_data_block as usize]);
            self.direct[current_data_block as usize] = 0;
            current_data_block += 1;
        }
        // Recycle the indirect tier.
        if data_recycle > INODE_DIRECT_COUNT as u32 {
            collector.push(self.indirect);
            current_data_block -= INODE_DIRECT_COUNT as u32;
            data_recycle -= INODE_DIRECT_COUNT as u32;
            io.block(self.indirect as usize)
                .lock()
                .read(0, |indirect_block: &IndirectBlock| {
                    while current_data_block < data_recycle {
                        collector.push(indirect_block[current_data_block as usize]);
                        current_data_block += 1;
                    }
                });
            self.indirect = 0;
        }
        self.size = 0;
        assert_eq!(
            collector.len(),
            total_recycle as usize,
            "The number of recycled blocks is not equal to the total number of Inode blocks."
        );
        collector
    }
    /// Read bytes from the file into the buffer, walking direct then
    /// indirect blocks in logical order.
    /// # Parameter
    /// * 'offset' - File offset
    /// * 'buffer' - Buffer in memory
    /// * 'io' - Block cache handle.
    /// # Return
    /// * Length of bytes read successfully.
    pub fn read_at(&self, offset: usize, buffer: &mut [u8], io: &BlockIo) -> usize {
        // Start offset in file
        let mut start = offset;
        // End offset in file
        let end = (self.size as usize).min(start + buffer.len());
        if end <= start {
            return 0;
        }
        let mut read_size = 0;
        let mut buffer_offset = 0;
        loop {
            let curr_block = start / BLOCK_SIZE;
            let inner_start = start % BLOCK_SIZE;
            let inner_end = match start + BLOCK_SIZE > end {
                true => end % BLOCK_SIZE,
                false => BLOCK_SIZE,
            };
            let curr_len = inner_end - inner_start;
            io.block(self.get_block_id(curr_block as u32, io) as usize)
                .lock()
                .read(0, |data_block: &DataBlock| {
                    buffer[buffer_offset..buffer_offset + curr_len]
                        .copy_from_slice(&data_block[inner_start..inner_end]);
                });
            read_size += curr_len;
            buffer_offset += curr_len;
            start += curr_len;
            if start == end {
                break;
            }
        }
        read_size
    }
    /// Write bytes from the buffer into the file. Capacity for the full
    /// range must have been ensured by the caller.
    /// # Parameter
    /// * 'offset' - File offset
    /// * 'buffer' - Buffer in memory
    /// * 'io' - Block cache handle.
    /// # Return
    /// * Length of bytes written successfully.
    pub fn write_at(&mut self, offset: usize, buffer: &[u8], io: &BlockIo) -> usize {
        assert!(
            offset + buffer.len() <= self.size as usize,
            "The file length is too small and cannot be written to the buffer"
        );
        // Start offset in file
        let mut start = offset;
        // End offset in file
        let end = start + buffer.len();
        if end <= start {
            return 0;
        }
        let mut write_size = 0;
        let mut buffer_offset = 0;
        loop {
            let curr_block = start / BLOCK_SIZE;
            let inner_start = start % BLOCK_SIZE;
            let inner_end = match start + BLOCK_SIZE > end {
                true => end % BLOCK_SIZE,
                false => BLOCK_SIZE,
            };
            let curr_len = inner_end - inner_start;
            io.block(self.get_block_id(curr_block as u32, io) as usize)
                .lock()
                .modify(0, |data_block: &mut DataBlock| {
                    data_block[inner_start..inner_end]
                        .copy_from_slice(&buffer[buffer_offset..buffer_offset + curr_len]);
                });
            write_size += curr_len;
            buffer_offset += curr_len;
            start += curr_len;
            if start == end {
                break;
            }
        }
        write_size
    }
}

#[repr(C)]
pub struct DirEntry {
    name: [u8; NAME_LENGTH_LIMIT + 1], // The end must be '\0'.
    inode_number: u32,
}

impl DirEntry {
    /// Create an empty directory entry. The all-zero name is the free-slot
    /// sentinel.
    pub fn empty() -> Self {
        Self {
            name: [0; NAME_LENGTH_LIMIT + 1],
            inode_number: 0,
        }
    }

    /// Create a new directory entry from a file name and inode number.
    /// # Parameter
    /// * 'name' - File name, max length is NAME_LENGTH_LIMIT, end with '\0'
    /// * 'inode_number' - File inode number.
    /// # Return
    /// * A directory entry.
    pub fn new(name: &str, inode_number: u32) -> Self {
        assert!(
            name.len() < NAME_LENGTH_LIMIT + 1,
            "File name is too long."
        );
        let mut name_arr = [0; NAME_LENGTH_LIMIT + 1];
        name_arr[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            name: name_arr,
            inode_number,
        }
    }

    /// Convert a directory entry to u8 slice.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            core::slice::from_raw_parts(self as *const _ as usize as *const u8, DIRENTRY_SIZE)
        }
    }

    /// Convert a directory entry to mutable u8 slice.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            core::slice::from_raw_parts_mut(self as *mut _ as usize as *mut u8, DIRENTRY_SIZE)
        }
    }

    /// Get the file name, not including '\0'.
    pub fn get_name(&self) -> &str {
        let len = (0..NAME_LENGTH_LIMIT + 1)
            .find(|i| self.name[*i] == 0)
            .unwrap();
        core::str::from_utf8(&self.name[..len]).unwrap()
    }

    /// Get inode number.
    pub fn get_inode_number(&self) -> u32 {
        self.inode_number
    }

    /// Whether this slot holds no entry.
    pub fn is_empty(&self) -> bool {
        self.name[0] == 0
    }
}
