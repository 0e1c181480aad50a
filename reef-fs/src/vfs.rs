use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use spin::{Mutex, MutexGuard};

use crate::{
    block_cache::BlockIo,
    error::{FsError, FsResult},
    layout::{DirEntry, DiskInode, DiskInodeType},
    rfs::ReefFileSystem,
    DIRENTRY_SIZE, INODE_MAX_SIZE, NAME_LENGTH_LIMIT,
};

/// In-memory view of one on-disk inode. The root directory is the inode with
/// id 0; name-based operations live on it.
pub struct Inode {
    block_id: usize,
    block_offset: usize,
    fs: Arc<Mutex<ReefFileSystem>>,
    io: BlockIo,
}

impl core::fmt::Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("block_id", &self.block_id)
            .field("block_offset", &self.block_offset)
            .finish()
    }
}

impl PartialEq for Inode {
    fn eq(&self, other: &Self) -> bool {
        self.block_id == other.block_id && self.block_offset == other.block_offset
    }
}

impl Inode {
    pub fn new(
        block_id: usize,
        block_offset: usize,
        fs: Arc<Mutex<ReefFileSystem>>,
        io: BlockIo,
    ) -> Self {
        Self {
            block_id,
            block_offset,
            fs,
            io,
        }
    }

    fn read_disk_inode<V>(&self, func: impl FnOnce(&DiskInode) -> V) -> V {
        self.io
            .block(self.block_id)
            .lock()
            .read(self.block_offset, func)
    }

    fn modify_disk_inode<V>(&self, func: impl FnOnce(&mut DiskInode) -> V) -> V {
        self.io
            .block(self.block_id)
            .lock()
            .modify(self.block_offset, func)
    }

    /// Scan the directory for an exact, case-sensitive name match, skipping
    /// free slots.
    /// # Return
    /// * (slot index, inode id) of the match.
    fn find_entry(&self, name: &str, disk_inode: &DiskInode) -> Option<(usize, u32)> {
        assert!(disk_inode.is_directory());
        let file_count = disk_inode.size as usize / DIRENTRY_SIZE;
        let mut dirent = DirEntry::empty();
        for i in 0..file_count {
            let len = disk_inode.read_at(i * DIRENTRY_SIZE, dirent.as_bytes_mut(), &self.io);
            assert_eq!(len, DIRENTRY_SIZE);
            if !dirent.is_empty() && dirent.get_name() == name {
                return Some((i, dirent.get_inode_number()));
            }
        }
        None
    }

    /// Find a file inode by its name.
    pub fn find(&self, name: &str) -> Option<Arc<Inode>> {
        let fs = self.fs.lock();
        self.read_disk_inode(|disk_inode| {
            self.find_entry(name, disk_inode).map(|(_, inode_id)| {
                let (block_id, block_offset) = fs.inode_position(inode_id);
                Arc::new(Self::new(
                    block_id as usize,
                    block_offset,
                    Arc::clone(&self.fs),
                    self.io.clone(),
                ))
            })
        })
    }

    /// Whether a file with this name exists.
    pub fn exists(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Current size in bytes.
    pub fn len(&self) -> u32 {
        let _fs = self.fs.lock();
        self.read_disk_inode(|disk_inode| disk_inode.size)
    }

    /// Grow the inode to hold `new_size` bytes. All needed blocks (data plus
    /// the index block when the growth crosses the direct range) are
    /// allocated before any pointer is threaded in; a mid-allocation failure
    /// returns every block already taken and leaves the inode untouched, so
    /// size never disagrees with the populated block set.
    fn increase_size(
        &self,
        new_size: u32,
        disk_inode: &mut DiskInode,
        fs: &mut MutexGuard<ReefFileSystem>,
    ) -> FsResult<()> {
        if new_size <= disk_inode.size {
            return Ok(());
        }
        if new_size as usize > INODE_MAX_SIZE {
            return Err(FsError::Overflow);
        }
        let blocks_needed = disk_inode.blocks_num_needed(new_size);
        let mut new_blocks: Vec<u32> = Vec::with_capacity(blocks_needed as usize);
        for _ in 0..blocks_needed {
            match fs.alloc_data() {
                Ok(block_id) => new_blocks.push(block_id),
                Err(e) => {
                    for block_id in new_blocks {
                        fs.dealloc_data(block_id);
                    }
                    return Err(e);
                }
            }
        }
        disk_inode.increase_size(new_size, new_blocks, &self.io);
        Ok(())
    }

    /// Create an empty file under this directory.
    /// Names must be 1..=NAME_LENGTH_LIMIT bytes; anything else cannot fit a
    /// directory slot and is rejected as Overflow. A deleted entry's slot is
    /// reused before the directory grows.
    /// # Return
    /// * The new file's inode, or AlreadyExists / TableFull / OutOfSpace.
    pub fn create_file(&self, name: &str) -> FsResult<Arc<Inode>> {
        let mut fs = self.fs.lock();
        if name.is_empty() || name.len() > NAME_LENGTH_LIMIT {
            return Err(FsError::Overflow);
        }
        // one pass over the slots: duplicate check and first free slot
        let (taken, free_slot) = self.read_disk_inode(|root_inode: &DiskInode| {
            assert!(root_inode.is_directory());
            let file_count = root_inode.size as usize / DIRENTRY_SIZE;
            let mut dirent = DirEntry::empty();
            let mut free_slot = None;
            for i in 0..file_count {
                root_inode.read_at(i * DIRENTRY_SIZE, dirent.as_bytes_mut(), &self.io);
                if dirent.is_empty() {
                    if free_slot.is_none() {
                        free_slot = Some(i);
                    }
                } else if dirent.get_name() == name {
                    return (true, None);
                }
            }
            (false, free_slot)
        });
        if taken {
            return Err(FsError::AlreadyExists);
        }
        let new_inode_id = fs.alloc_inode()?;
        let (block_id, block_offset) = fs.inode_position(new_inode_id);
        self.io
            .block(block_id as usize)
            .lock()
            .modify(block_offset, |new_inode: &mut DiskInode| {
                new_inode.initialize(DiskInodeType::File);
            });
        let stored: FsResult<()> = self.modify_disk_inode(|root_inode| {
            let slot = match free_slot {
                Some(slot) => slot,
                None => {
                    let file_count = root_inode.size as usize / DIRENTRY_SIZE;
                    let new_size = ((file_count + 1) * DIRENTRY_SIZE) as u32;
                    // a directory that cannot grow any further has no free slot
                    self.increase_size(new_size, root_inode, &mut fs)
                        .map_err(|e| match e {
                            FsError::Overflow => FsError::TableFull,
                            other => other,
                        })?;
                    file_count
                }
            };
            let dirent = DirEntry::new(name, new_inode_id);
            root_inode.write_at(slot * DIRENTRY_SIZE, dirent.as_bytes(), &self.io);
            Ok(())
        });
        if let Err(e) = stored {
            fs.dealloc_inode(new_inode_id);
            return Err(e);
        }
        drop(fs);
        self.io.sync_all();
        Ok(Arc::new(Self::new(
            block_id as usize,
            block_offset,
            Arc::clone(&self.fs),
            self.io.clone(),
        )))
    }

    /// Delete a file by name. Every block the inode owns goes back to the
    /// pool first (direct, indirect-referenced, then the index block), then
    /// the inode slot, and only then is the name slot cleared; a crash in
    /// between leaks blocks instead of double-using them.
    pub fn delete_file(&self, name: &str) -> FsResult<()> {
        let mut fs = self.fs.lock();
        let entry = self.read_disk_inode(|root_inode| {
            assert!(root_inode.is_directory());
            self.find_entry(name, root_inode)
        });
        let (slot, inode_id) = entry.ok_or(FsError::NotFound)?;
        let (block_id, block_offset) = fs.inode_position(inode_id);
        let recycled = self
            .io
            .block(block_id as usize)
            .lock()
            .modify(block_offset, |disk_inode: &mut DiskInode| {
                assert!(disk_inode.is_file());
                let blocks = disk_inode.clear_size(&self.io);
                disk_inode.initialize(DiskInodeType::File);
                blocks
            });
        for block in recycled {
            fs.dealloc_data(block);
        }
        fs.dealloc_inode(inode_id);
        self.modify_disk_inode(|root_inode| {
            let dirent = DirEntry::empty();
            root_inode.write_at(slot * DIRENTRY_SIZE, dirent.as_bytes(), &self.io);
        });
        drop(fs);
        self.io.sync_all();
        Ok(())
    }

    /// Names of all files under this directory, in slot order.
    pub fn list(&self) -> Vec<String> {
        let _fs = self.fs.lock();
        self.read_disk_inode(|disk_inode: &DiskInode| {
            assert!(disk_inode.is_directory());
            let file_count = disk_inode.size as usize / DIRENTRY_SIZE;
            let mut names = Vec::new();
            for i in 0..file_count {
                let mut dirent = DirEntry::empty();
                let len = disk_inode.read_at(i * DIRENTRY_SIZE, dirent.as_bytes_mut(), &self.io);
                assert_eq!(len, DIRENTRY_SIZE);
                if !dirent.is_empty() {
                    names.push(dirent.get_name().to_string());
                }
            }
            names
        })
    }

    /// Read from a byte offset. Returns the number of bytes copied, which is
    /// capped by the file size.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let _fs = self.fs.lock();
        self.read_disk_inode(|disk_inode: &DiskInode| disk_inode.read_at(offset, buf, &self.io))
    }

    /// Write at a byte offset, growing the file as needed. Capacity for the
    /// whole range is secured up front, so a failed write changes nothing.
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> FsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if offset + buf.len() > INODE_MAX_SIZE {
            return Err(FsError::Overflow);
        }
        let mut fs = self.fs.lock();
        let written = self.modify_disk_inode(|disk_inode: &mut DiskInode| {
            self.increase_size((offset + buf.len()) as u32, disk_inode, &mut fs)?;
            Ok(disk_inode.write_at(offset, buf, &self.io))
        });
        drop(fs);
        if written.is_ok() {
            self.io.sync_all();
        }
        written
    }

    /// Free the file's content, returning every block to the pool. Size goes
    /// back to zero; the inode itself stays.
    pub fn clear(&self) {
        let mut fs = self.fs.lock();
        self.modify_disk_inode(|disk_inode: &mut DiskInode| {
            let recycled = disk_inode.clear_size(&self.io);
            for block_id in recycled {
                fs.dealloc_data(block_id);
            }
        });
        drop(fs);
        self.io.sync_all();
    }

    /// Name-based read: copies up to `buf.len()` bytes from offset 0.
    /// # Return
    /// * Bytes actually copied (capped by the file size), or NotFound.
    pub fn read_file(&self, name: &str, buf: &mut [u8]) -> FsResult<usize> {
        let inode = self.find(name).ok_or(FsError::NotFound)?;
        Ok(inode.read_at(0, buf))
    }

    /// Name-based write: a full replace from offset 0, never an append. The
    /// previous content is freed first; afterwards the file size equals
    /// `data.len()`.
    pub fn write_file(&self, name: &str, data: &[u8]) -> FsResult<usize> {
        let inode = self.find(name).ok_or(FsError::NotFound)?;
        inode.clear();
        inode.write_at(0, data)
    }
}
