//! mkfs-reef - format a reef-fs disk image and pack host files into it.
//!
//! Usage:
//!   mkfs-reef --output fs.img --size 2M
//!   mkfs-reef --output fs.img --size 2M --dir ./payload

use clap::Parser;
use reef_fs::block_dev::BlockDevice;
use reef_fs::rfs::ReefFileSystem;
use reef_fs::BLOCK_SIZE;
use std::fs::{read_dir, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

struct BlockFile(Mutex<File>);

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("Error occurred when seeking");
        assert_eq!(file.read(buf).unwrap(), BLOCK_SIZE, "Not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("Error occurred when seeking");
        assert_eq!(file.write(buf).unwrap(), BLOCK_SIZE, "Not a complete block!");
    }
}

#[derive(Parser)]
#[command(name = "mkfs-reef")]
#[command(about = "Create reef-fs disk images")]
struct Args {
    /// Output disk image file
    #[arg(short, long)]
    output: PathBuf,

    /// Image size (e.g. 512K, 2M)
    #[arg(short, long, default_value = "2M")]
    size: String,

    /// Directory of files to pack into the image
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Blocks reserved for the inode bitmap
    #[arg(long, default_value_t = 1)]
    inode_bitmap_blocks: u32,
}

fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    let (num_str, mult) = if s.ends_with("M") || s.ends_with("MB") {
        (s.trim_end_matches("MB").trim_end_matches("M"), 1024 * 1024)
    } else if s.ends_with("K") || s.ends_with("KB") {
        (s.trim_end_matches("KB").trim_end_matches("K"), 1024)
    } else {
        (s.as_str(), 1)
    };
    num_str.parse::<u64>().ok().map(|n| n * mult)
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();
    let size = parse_size(&args.size).expect("unparsable --size");
    assert_eq!(
        size % BLOCK_SIZE as u64,
        0,
        "--size must be a multiple of the block size"
    );
    let device = Arc::new(BlockFile(Mutex::new({
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&args.output)?;
        f.set_len(size)?;
        f
    })));
    let total_blocks = (size / BLOCK_SIZE as u64) as u32;
    let fs = ReefFileSystem::create(device, total_blocks, args.inode_bitmap_blocks);
    let root = ReefFileSystem::root_inode(&fs);
    if let Some(dir) = &args.dir {
        for entry in read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry
                .file_name()
                .into_string()
                .expect("non-UTF-8 file name");
            let mut data = Vec::new();
            File::open(entry.path())?.read_to_end(&mut data)?;
            let inode = root
                .create_file(&name)
                .unwrap_or_else(|e| panic!("create {}: {:?}", name, e));
            inode
                .write_at(0, &data)
                .unwrap_or_else(|e| panic!("write {}: {:?}", name, e));
            println!("packed {} ({} bytes)", name, data.len());
        }
    }
    fs.lock().sync();
    let stat = fs.lock().stat();
    println!(
        "{}: {} blocks total, {} free",
        args.output.display(),
        stat.total_blocks,
        stat.free_blocks
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_fs::error::FsError;
    use reef_fs::handle::{FileHandle, OpenFlags};
    use reef_fs::vfs::Inode;
    use reef_fs::{INODE_MAX_SIZE, REEF_MAGIC};
    use spin::Mutex as SpinMutex;
    use std::path::Path;
    use tempfile::TempDir;

    const TEST_BLOCKS: u64 = 4096;

    fn image_device(path: &Path, blocks: u64) -> Arc<BlockFile> {
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .unwrap();
        f.set_len(blocks * BLOCK_SIZE as u64).unwrap();
        Arc::new(BlockFile(Mutex::new(f)))
    }

    fn fresh_fs(dir: &TempDir, blocks: u64) -> (Arc<SpinMutex<ReefFileSystem>>, Inode) {
        let device = image_device(&dir.path().join("fs.img"), blocks);
        let fs = ReefFileSystem::create(device, blocks as u32, 1);
        let root = ReefFileSystem::root_inode(&fs);
        (fs, root)
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|_| rand::random::<u8>()).collect()
    }

    #[test]
    fn create_then_exists_and_list() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        assert!(!root.exists("alpha"));
        root.create_file("alpha").unwrap();
        root.create_file("beta").unwrap();
        assert!(root.exists("alpha"));
        assert!(root.exists("beta"));
        assert_eq!(root.list(), vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn duplicate_create_keeps_content() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        root.create_file("dup").unwrap();
        root.write_file("dup", b"untouched").unwrap();
        assert_eq!(root.create_file("dup"), Err(FsError::AlreadyExists));
        let mut buf = [0u8; 32];
        let len = root.read_file("dup", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"untouched");
    }

    #[test]
    fn round_trip_various_sizes() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        root.create_file("blob").unwrap();
        // spans: sub-block, exact block, direct boundary, first indirect
        // byte, deep into the indirect range
        for len in [
            1,
            BLOCK_SIZE,
            4 * BLOCK_SIZE + 37,
            10 * BLOCK_SIZE,
            10 * BLOCK_SIZE + 1,
            100 * BLOCK_SIZE + BLOCK_SIZE / 7,
        ] {
            let data = random_bytes(len);
            root.write_file("blob", &data).unwrap();
            let mut buf = vec![0u8; len + 64];
            let read = root.read_file("blob", &mut buf).unwrap();
            assert_eq!(read, len, "length mismatch for {} bytes", len);
            assert_eq!(&buf[..read], &data[..], "content mismatch for {} bytes", len);
        }
    }

    #[test]
    fn empty_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        root.create_file("hollow").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(root.read_file("hollow", &mut buf), Ok(0));
        assert_eq!(root.write_file("hollow", b""), Ok(0));
        let inode = root.find("hollow").unwrap();
        assert_eq!(inode.len(), 0);
    }

    #[test]
    fn indirect_block_accounting() {
        // 512-byte blocks, 10 direct pointers: 6000 bytes needs 12 data
        // blocks, so the indirect index block must appear exactly once.
        let dir = TempDir::new().unwrap();
        let (fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        let free_start = fs.lock().stat().free_blocks;
        root.create_file("big").unwrap();
        // the first entry grows the directory by one block
        assert_eq!(fs.lock().stat().free_blocks, free_start - 1);
        let data = random_bytes(6000);
        root.write_file("big", &data).unwrap();
        assert_eq!(fs.lock().stat().free_blocks, free_start - 1 - 12 - 1);
        let mut buf = vec![0u8; 6000];
        assert_eq!(root.read_file("big", &mut buf), Ok(6000));
        assert_eq!(buf, data);
    }

    #[test]
    fn delete_returns_blocks_and_frees_name() {
        let dir = TempDir::new().unwrap();
        let (fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        root.create_file("victim").unwrap();
        let free_after_create = fs.lock().stat().free_blocks;
        root.write_file("victim", &random_bytes(6000)).unwrap();
        root.delete_file("victim").unwrap();
        assert!(!root.exists("victim"));
        // all 13 content blocks are back; the directory keeps its block
        assert_eq!(fs.lock().stat().free_blocks, free_after_create);
        assert_eq!(root.delete_file("victim"), Err(FsError::NotFound));
        // the slot is reusable
        root.create_file("successor").unwrap();
        assert_eq!(root.list(), vec!["successor".to_string()]);
    }

    #[test]
    fn session_continuity() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        root.create_file("tape").unwrap();
        let data = random_bytes(3000);
        root.write_file("tape", &data).unwrap();

        let mut split = FileHandle::open(&root, "tape", OpenFlags::READ_ONLY).unwrap();
        let mut first = vec![0u8; 1500];
        let mut second = vec![0u8; 1500];
        assert_eq!(split.read(&mut first), 1500);
        assert_eq!(split.pos(), 1500);
        assert_eq!(split.read(&mut second), 1500);

        let mut whole = FileHandle::open(&root, "tape", OpenFlags::READ_ONLY).unwrap();
        let mut all = vec![0u8; 3000];
        assert_eq!(whole.read(&mut all), 3000);
        assert_eq!([first, second].concat(), all);
        assert_eq!(all, data);
        split.close();
        whole.close();
    }

    #[test]
    fn handle_write_appends_across_calls() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        let mut handle =
            FileHandle::open(&root, "log", OpenFlags::READ_WRITE | OpenFlags::CREATE).unwrap();
        assert_eq!(handle.write(b"hello, ").unwrap(), 7);
        assert_eq!(handle.write(b"world").unwrap(), 5);
        assert_eq!(handle.pos(), 12);
        let mut buf = [0u8; 32];
        let len = root.read_file("log", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"hello, world");
    }

    #[test]
    fn handle_read_all_from_cursor() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        root.create_file("doc").unwrap();
        root.write_file("doc", b"prefix|payload").unwrap();
        let mut handle = FileHandle::open(&root, "doc", OpenFlags::READ_ONLY).unwrap();
        let mut skip = [0u8; 7];
        handle.read(&mut skip);
        assert_eq!(handle.read_all(), b"payload".to_vec());
    }

    #[test]
    fn handle_create_and_trunc() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        assert_eq!(
            FileHandle::open(&root, "fresh", OpenFlags::READ_ONLY).err(),
            Some(FsError::NotFound)
        );
        let mut handle =
            FileHandle::open(&root, "fresh", OpenFlags::READ_WRITE | OpenFlags::CREATE).unwrap();
        handle.write(b"first pass").unwrap();
        handle.close();
        let mut handle = FileHandle::open(
            &root,
            "fresh",
            OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::TRUNC,
        )
        .unwrap();
        assert_eq!(root.find("fresh").unwrap().len(), 0);
        handle.write(b"second").unwrap();
        let mut buf = [0u8; 32];
        let len = root.read_file("fresh", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"second");
    }

    #[test]
    fn write_only_handle_reads_nothing() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        root.create_file("sealed").unwrap();
        root.write_file("sealed", b"secret").unwrap();
        let mut handle = FileHandle::open(&root, "sealed", OpenFlags::WRITE_ONLY).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(handle.read(&mut buf), 0);
        assert_eq!(handle.pos(), 0);
    }

    #[test]
    fn out_of_space_leaves_state_consistent() {
        // small image: the allocator runs dry long before the capacity
        // ceiling of a single file
        let dir = TempDir::new().unwrap();
        let (fs, root) = fresh_fs(&dir, 450);
        root.create_file("a").unwrap();
        let free = fs.lock().stat().free_blocks;
        assert!(free > 12, "geometry changed, rewrite this test");
        // more data blocks than the pool holds
        let too_big = (free as usize + 1) * BLOCK_SIZE;
        let a = root.find("a").unwrap();
        assert_eq!(a.write_at(0, &random_bytes(too_big)), Err(FsError::OutOfSpace));
        assert_eq!(a.len(), 0);
        assert_eq!(fs.lock().stat().free_blocks, free);
        // drain the pool exactly: free - 1 data blocks plus the index block
        let fill = (free as usize - 1) * BLOCK_SIZE;
        assert_eq!(a.write_at(0, &random_bytes(fill)), Ok(fill));
        assert_eq!(fs.lock().stat().free_blocks, 0);
        // scenario B: with nothing free, one more block fails and the count
        // stays at zero
        root.create_file("b").unwrap();
        let b = root.find("b").unwrap();
        assert_eq!(b.write_at(0, &random_bytes(1)), Err(FsError::OutOfSpace));
        assert_eq!(b.len(), 0);
        assert_eq!(fs.lock().stat().free_blocks, 0);
    }

    #[test]
    fn overflow_past_capacity_ceiling() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        root.create_file("max").unwrap();
        let data = random_bytes(INODE_MAX_SIZE);
        assert_eq!(root.write_file("max", &data), Ok(INODE_MAX_SIZE));
        let inode = root.find("max").unwrap();
        assert_eq!(
            inode.write_at(INODE_MAX_SIZE, b"x"),
            Err(FsError::Overflow)
        );
        assert_eq!(inode.len() as usize, INODE_MAX_SIZE);
        let oversized = random_bytes(INODE_MAX_SIZE + 1);
        assert_eq!(root.write_file("max", &oversized), Err(FsError::Overflow));
    }

    #[test]
    fn full_replace_shrinks() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        root.create_file("note").unwrap();
        root.write_file("note", &random_bytes(3000)).unwrap();
        root.write_file("note", b"short").unwrap();
        assert_eq!(root.find("note").unwrap().len(), 5);
        let mut buf = vec![0u8; 3000];
        assert_eq!(root.read_file("note", &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"short");
    }

    #[test]
    fn rejects_unusable_names() {
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        assert_eq!(root.create_file(""), Err(FsError::Overflow));
        let long = "n".repeat(reef_fs::NAME_LENGTH_LIMIT + 1);
        assert_eq!(root.create_file(&long), Err(FsError::Overflow));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fs.img");
        let data = random_bytes(6000);
        {
            let device = image_device(&path, TEST_BLOCKS);
            let fs = ReefFileSystem::create(device, TEST_BLOCKS as u32, 1);
            let root = ReefFileSystem::root_inode(&fs);
            root.create_file("keep").unwrap();
            root.write_file("keep", &data).unwrap();
            fs.lock().sync();
        }
        let device = image_device(&path, TEST_BLOCKS);
        let fs = ReefFileSystem::open(device).unwrap();
        let root = ReefFileSystem::root_inode(&fs);
        assert_eq!(root.list(), vec!["keep".to_string()]);
        let mut buf = vec![0u8; 6000];
        assert_eq!(root.read_file("keep", &mut buf), Ok(6000));
        assert_eq!(buf, data);
    }

    #[test]
    fn corrupt_superblock_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fs.img");
        {
            let device = image_device(&path, TEST_BLOCKS);
            let fs = ReefFileSystem::create(device, TEST_BLOCKS as u32, 1);
            fs.lock().sync();
        }
        // scribble over the magic number
        {
            let mut f = OpenOptions::new().write(true).open(&path).unwrap();
            f.write_all(&(!REEF_MAGIC).to_le_bytes()).unwrap();
        }
        let device = image_device(&path, TEST_BLOCKS);
        assert_eq!(
            ReefFileSystem::open(device).err(),
            Some(FsError::Corrupt)
        );
    }

    #[test]
    fn directory_full_reports_table_full() {
        // the directory's slot table is bounded by the root inode's own
        // capacity ceiling: 138 blocks of 16 entries each
        let dir = TempDir::new().unwrap();
        let (_fs, root) = fresh_fs(&dir, TEST_BLOCKS);
        let capacity = INODE_MAX_SIZE / reef_fs::DIRENTRY_SIZE;
        for i in 0..capacity {
            root.create_file(&format!("f{}", i)).unwrap();
        }
        assert_eq!(root.create_file("straw"), Err(FsError::TableFull));
        // deleting any file makes its slot available again
        root.delete_file("f17").unwrap();
        root.create_file("straw").unwrap();
        assert!(root.exists("straw"));
    }

    #[test]
    fn instances_share_nothing() {
        let dir = TempDir::new().unwrap();
        let (_fs1, root1) = fresh_fs(&dir, TEST_BLOCKS);
        let device2 = image_device(&dir.path().join("other.img"), TEST_BLOCKS);
        let fs2 = ReefFileSystem::create(device2, TEST_BLOCKS as u32, 1);
        let root2 = ReefFileSystem::root_inode(&fs2);
        root1.create_file("same").unwrap();
        root2.create_file("same").unwrap();
        root1.write_file("same", b"left").unwrap();
        root2.write_file("same", b"right").unwrap();
        let mut buf = [0u8; 8];
        let len = root1.read_file("same", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"left");
        let len = root2.read_file("same", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"right");
    }
}
