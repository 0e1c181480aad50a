#![no_std]
extern crate alloc;
pub mod bitmap;
pub mod block_cache;
pub mod block_dev;
pub mod error;
pub mod handle;
pub mod layout;
pub mod rfs;
pub mod vfs;

pub const BLOCK_SIZE: usize = 512;
pub const MAX_BLOCK_CACHE_QUANTITY: usize = 16;
pub const REEF_MAGIC: u32 = 0x5245_4653;
pub const REEF_VERSION: u32 = 1;
pub const INODE_DIRECT_COUNT: usize = 10;
pub const INODE_INDIRECT_COUNT: usize = BLOCK_SIZE / 4;
pub const INODE_MAX_BLOCKS: usize = INODE_DIRECT_COUNT + INODE_INDIRECT_COUNT;
pub const INODE_MAX_SIZE: usize = INODE_MAX_BLOCKS * BLOCK_SIZE;
pub const NAME_LENGTH_LIMIT: usize = 27;
pub const DIRENTRY_SIZE: usize = 32;
