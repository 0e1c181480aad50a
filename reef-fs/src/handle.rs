use alloc::{sync::Arc, vec, vec::Vec};
use bitflags::bitflags;

use crate::{
    error::{FsError, FsResult},
    vfs::Inode,
};

bitflags! {
    pub struct OpenFlags: u32 {
        const READ_ONLY = 0;
        const WRITE_ONLY = 1 << 0;
        const READ_WRITE = 1 << 1;
        const CREATE = 1 << 9;
        const TRUNC = 1 << 10;
    }
}

impl OpenFlags {
    pub fn read_write(&self) -> (bool, bool) {
        if self.is_empty() {
            (true, false)
        } else if self.contains(Self::WRITE_ONLY) {
            (false, true)
        } else {
            (true, true)
        }
    }
}

/// A caller-held cursor over one open file: the inode plus a position that
/// advances with every transfer. Two handles on the same file are independent
/// cursors over shared, unsynchronized storage.
pub struct FileHandle {
    readable: bool,
    writable: bool,
    inode: Arc<Inode>,
    offset: usize,
}

impl FileHandle {
    /// Open a file by name under `root`. CREATE makes the file when it is
    /// absent; TRUNC drops existing content. The cursor starts at 0.
    pub fn open(root: &Inode, name: &str, flags: OpenFlags) -> FsResult<FileHandle> {
        let (readable, writable) = flags.read_write();
        let inode = if flags.contains(OpenFlags::CREATE) {
            match root.find(name) {
                Some(inode) => {
                    if flags.contains(OpenFlags::TRUNC) {
                        inode.clear();
                    }
                    inode
                }
                None => root.create_file(name)?,
            }
        } else {
            let inode = root.find(name).ok_or(FsError::NotFound)?;
            if flags.contains(OpenFlags::TRUNC) {
                inode.clear();
            }
            inode
        };
        Ok(Self {
            readable,
            writable,
            inode,
            offset: 0,
        })
    }

    /// Current cursor position.
    pub fn pos(&self) -> usize {
        self.offset
    }

    /// Read from the cursor, advancing it by the bytes transferred. A handle
    /// opened without read access transfers zero bytes.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        if !self.readable {
            return 0;
        }
        let read_size = self.inode.read_at(self.offset, buf);
        self.offset += read_size;
        read_size
    }

    /// Write at the cursor, advancing it by the bytes transferred. A handle
    /// opened without write access transfers zero bytes.
    pub fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        if !self.writable {
            return Ok(0);
        }
        let write_size = self.inode.write_at(self.offset, buf)?;
        self.offset += write_size;
        Ok(write_size)
    }

    /// Read everything from the cursor to the end of the file. Another
    /// handle may have truncated the file in the meantime, leaving this
    /// cursor past the end; that reads as empty.
    pub fn read_all(&mut self) -> Vec<u8> {
        let len = (self.inode.len() as usize).saturating_sub(self.offset);
        let mut data = vec![0u8; len];
        let read_size = self.read(&mut data);
        data.truncate(read_size);
        data
    }

    /// Release the handle. It holds no resource besides the cursor value, so
    /// this is a plain consume, kept explicit to match the call surface
    /// rather than hidden behind Drop.
    pub fn close(self) {}
}
