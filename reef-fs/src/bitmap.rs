use crate::{block_cache::BlockIo, BLOCK_SIZE};

const BLOCK_BITS: usize = BLOCK_SIZE * 8;
type BitmapBlock = [u64; BLOCK_BITS / 64];

/// Free/used tracking kept outside the block payload, so no data pattern can
/// ever be misread as an allocation flag.
pub struct Bitmap {
    start_block_id: usize,
    blocks: usize,
}

impl Bitmap {
    pub fn new(start_block_id: usize, blocks: usize) -> Self {
        Self {
            start_block_id,
            blocks,
        }
    }

    /// First-fit scan for a free bit. Marks it used and returns its index
    /// inside the bitmap (not a device block number). Returns None when every
    /// bit is taken; the bitmap is left unchanged in that case.
    pub fn alloc(&self, io: &BlockIo) -> Option<usize> {
        for block_id in 0..self.blocks {
            let free_block_position = io.block(self.start_block_id + block_id).lock().modify(
                0,
                |bitmap_block: &mut BitmapBlock| {
                    if let Some((bitmap_position, inner_position)) = bitmap_block
                        .iter()
                        .enumerate()
                        .find(|(_, bit64)| **bit64 != u64::MAX)
                        .map(|(bitmap_position, bit64)| {
                            (bitmap_position, bit64.trailing_ones() as usize)
                        })
                    {
                        bitmap_block[bitmap_position] |= 1 << inner_position;
                        Some(block_id * BLOCK_BITS + bitmap_position * 64 + inner_position)
                    } else {
                        None
                    }
                },
            );
            if free_block_position.is_some() {
                return free_block_position;
            }
        }
        None
    }

    /// Return a bit to the pool. Freeing a bit that is not currently set is a
    /// caller bug (ownership is tracked above this layer) and asserts.
    /// # Parameter
    /// * 'io' - Block cache handle.
    /// * 'bit_position' - Bit index inside the bitmap.
    pub fn dealloc(&self, io: &BlockIo, bit_position: usize) {
        let block_position = bit_position / BLOCK_BITS;
        let block_inner_position = bit_position % BLOCK_BITS;
        let bitmap_position = block_inner_position / 64;
        let inner_position = block_inner_position % 64;
        io.block(self.start_block_id + block_position).lock().modify(
            0,
            |bitmap_block: &mut BitmapBlock| {
                assert!(bitmap_block[bitmap_position] & (1 << inner_position) > 0);
                bitmap_block[bitmap_position] &= !(1 << inner_position);
            },
        )
    }

    pub fn maximum(&self) -> usize {
        self.blocks * BLOCK_BITS
    }
}
