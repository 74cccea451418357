//! On-disk hash table for the device database
//!
//! Bulk insert during build, keyed lookup afterwards. The file is built once
//! by [`HashDbWriter`] and never modified in place; readers map it with
//! [`HashDb`].
//!
//! # File layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ page 0: header (bucket_size bytes, zero filled)              │
//! │   magic "DEVHASH\0" | version u32 | bucket_size u32          │
//! │   bucket_count u32 | reserved u32 | record_count u64         │
//! │   directory_offset u64                                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │ data region: [key_len u16][value_len u32][key][value] ...    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ bucket directory: bucket_count pages, then overflow pages    │
//! │   [slot_count u32][reserved u32][next_overflow u64]          │
//! │   [hash u64][record_offset u64] * slot_count                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Buckets are chosen by the low bits of the
//! FNV-1a hash of the raw key bytes; keys are compared byte for byte.

use fnv::FnvHashMap;
use memmap2::Mmap;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::hash::Hasher;
use std::io::{BufWriter, ErrorKind, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// File magic
pub const MAGIC: [u8; 8] = *b"DEVHASH\0";

/// On-disk format version
pub const VERSION: u32 = 1;

/// Default bucket page size
pub const DEFAULT_BUCKET_SIZE: u32 = 8192;

/// Smallest accepted bucket page size
pub const MIN_BUCKET_SIZE: u32 = 256;

/// Largest accepted bucket page size
pub const MAX_BUCKET_SIZE: u32 = 1 << 16;

const HEADER_LEN: usize = 40;
const PAGE_HEADER_LEN: usize = 16;
const SLOT_LEN: usize = 16;
const RECORD_HEADER_LEN: usize = 6;

/// Errors from building or reading a hash database
#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to lock: {0}")]
    Lock(Errno),

    #[error("invalid bucket size {0} (power of two between 256 and 65536 required)")]
    BucketSize(u32),

    #[error("key of {0} bytes is too large")]
    KeyTooLarge(usize),

    #[error("value of {0} bytes is too large")]
    ValueTooLarge(usize),

    #[error("corrupt database: {0}")]
    Corrupt(String),
}

/// Result type for hash database operations
pub type Result<T> = std::result::Result<T, DbError>;

/// Summary of a finished build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DbStats {
    /// Live records (unique keys)
    pub records: u64,
    /// Puts that replaced an earlier value for the same key
    pub superseded: u64,
    pub bucket_count: u32,
    pub overflow_pages: u64,
    /// Final file size
    pub bytes: u64,
}

/// Check a bucket page size
pub fn validate_bucket_size(bucket_size: u32) -> Result<()> {
    if !(MIN_BUCKET_SIZE..=MAX_BUCKET_SIZE).contains(&bucket_size) || !bucket_size.is_power_of_two()
    {
        return Err(DbError::BucketSize(bucket_size));
    }
    Ok(())
}

/// FNV-1a over the raw key bytes
pub fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(key);
    hasher.finish()
}

fn slots_per_page(bucket_size: u32) -> usize {
    (bucket_size as usize - PAGE_HEADER_LEN) / SLOT_LEN
}

/// Power-of-two bucket count that leaves primary pages about half full
fn bucket_count_for(records: usize, per_page: usize) -> u32 {
    let fill = (per_page / 2).max(1);
    let needed = records.div_ceil(fill).max(1);
    needed.next_power_of_two() as u32
}

/// Exclusive writer for a fresh database file
///
/// The file is opened, locked with `flock(LOCK_EX)` and only then
/// truncated, so a second builder pointed at the same path waits instead of
/// clobbering a build in progress. The lock is released when the writer is
/// dropped, or by the [`SealedDb`] returned from [`HashDbWriter::close`].
pub struct HashDbWriter {
    path: PathBuf,
    out: BufWriter<File>,
    _lock: Flock<File>,
    bucket_size: u32,
    index: FnvHashMap<Vec<u8>, u64>,
    cursor: u64,
    superseded: u64,
}

impl HashDbWriter {
    /// Create (or truncate) `path` and take the build lock
    pub fn create(path: impl AsRef<Path>, bucket_size: u32) -> Result<Self> {
        validate_bucket_size(bucket_size)?;
        let path = path.as_ref().to_path_buf();

        let lock = loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .mode(0o644)
                .open(&path)?;

            let lock = Flock::lock(file, FlockArg::LockExclusive)
                .map_err(|(_, errno)| DbError::Lock(errno))?;

            // A previous holder may have renamed the file away while we
            // waited; only the inode still linked at `path` may be reused.
            let held = lock.metadata()?;
            match std::fs::metadata(&path) {
                Ok(current) if current.dev() == held.dev() && current.ino() == held.ino() => {
                    break lock
                }
                Ok(_) => {
                    debug!(path = %path.display(), "build file replaced while waiting for lock")
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %path.display(), "build file renamed while waiting for lock")
                }
                Err(e) => return Err(e.into()),
            }
        };
        trace!(path = %path.display(), "took exclusive lock");

        let file = lock.try_clone()?;
        file.set_len(0)?;

        let mut out = BufWriter::new(file);
        out.write_all(&vec![0u8; bucket_size as usize])?;

        Ok(Self {
            path,
            out,
            _lock: lock,
            bucket_size,
            index: FnvHashMap::default(),
            cursor: u64::from(bucket_size),
            superseded: 0,
        })
    }

    /// Append a record; returns `true` when it replaced an earlier value
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let key_len = u16::try_from(key.len()).map_err(|_| DbError::KeyTooLarge(key.len()))?;
        let value_len =
            u32::try_from(value.len()).map_err(|_| DbError::ValueTooLarge(value.len()))?;

        let offset = self.cursor;
        self.out.write_all(&key_len.to_le_bytes())?;
        self.out.write_all(&value_len.to_le_bytes())?;
        self.out.write_all(key)?;
        self.out.write_all(value)?;
        self.cursor += (RECORD_HEADER_LEN + key.len() + value.len()) as u64;

        let replaced = self.index.insert(key.to_vec(), offset).is_some();
        if replaced {
            self.superseded += 1;
        }
        Ok(replaced)
    }

    /// Write the bucket directory and header, then flush and sync
    ///
    /// The build lock stays held by the returned [`SealedDb`].
    pub fn close(mut self) -> Result<SealedDb> {
        let bsize = u64::from(self.bucket_size);
        let per_page = slots_per_page(self.bucket_size);
        let bucket_count = bucket_count_for(self.index.len(), per_page);
        let mask = u64::from(bucket_count) - 1;

        let mut buckets: Vec<Vec<(u64, u64)>> = vec![Vec::new(); bucket_count as usize];
        for (key, &offset) in &self.index {
            let hash = hash_key(key);
            buckets[(hash & mask) as usize].push((hash, offset));
        }

        let directory_offset = self.cursor;
        let mut overflow_cursor = directory_offset + u64::from(bucket_count) * bsize;
        let mut overflow = Vec::new();

        for slots in &mut buckets {
            // Sorted by record offset so identical builds give identical files.
            slots.sort_unstable_by_key(|&(_, offset)| offset);

            let chunks: Vec<&[(u64, u64)]> = if slots.is_empty() {
                vec![&[]]
            } else {
                slots.chunks(per_page).collect()
            };

            let mut next_offsets = Vec::with_capacity(chunks.len().saturating_sub(1));
            for _ in 1..chunks.len() {
                next_offsets.push(overflow_cursor);
                overflow_cursor += bsize;
            }

            for (i, chunk) in chunks.iter().enumerate() {
                let next = next_offsets.get(i).copied().unwrap_or(0);
                let page = encode_page(chunk, next, self.bucket_size);
                if i == 0 {
                    self.out.write_all(&page)?;
                } else {
                    overflow.push(page);
                }
            }
        }

        for page in &overflow {
            self.out.write_all(page)?;
        }

        let mut header = [0u8; HEADER_LEN];
        header[0..8].copy_from_slice(&MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        header[12..16].copy_from_slice(&self.bucket_size.to_le_bytes());
        header[16..20].copy_from_slice(&bucket_count.to_le_bytes());
        header[24..32].copy_from_slice(&(self.index.len() as u64).to_le_bytes());
        header[32..40].copy_from_slice(&directory_offset.to_le_bytes());

        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&header)?;
        self.out.flush()?;
        self.out.get_ref().sync_all()?;

        let stats = DbStats {
            records: self.index.len() as u64,
            superseded: self.superseded,
            bucket_count,
            overflow_pages: overflow.len() as u64,
            bytes: overflow_cursor,
        };
        debug!(path = %self.path.display(), ?stats, "hash table closed");

        let HashDbWriter {
            path, out, _lock, ..
        } = self;
        drop(out);
        Ok(SealedDb {
            path,
            stats,
            _lock,
        })
    }
}

/// A fully written database file, still locked
///
/// Renaming it into place while the lock is held keeps a waiting builder
/// from reusing the inode after it has been published.
pub struct SealedDb {
    path: PathBuf,
    stats: DbStats,
    _lock: Flock<File>,
}

impl SealedDb {
    pub fn stats(&self) -> DbStats {
        self.stats
    }

    /// Atomically move the file onto `dest`, then release the lock
    pub fn rename_to(self, dest: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::rename(&self.path, dest.as_ref())?;
        trace!(from = %self.path.display(), to = %dest.as_ref().display(), "renamed");
        Ok(())
    }
}

fn encode_page(slots: &[(u64, u64)], next: u64, bucket_size: u32) -> Vec<u8> {
    let mut page = vec![0u8; bucket_size as usize];
    page[0..4].copy_from_slice(&(slots.len() as u32).to_le_bytes());
    page[8..16].copy_from_slice(&next.to_le_bytes());
    for (i, &(hash, offset)) in slots.iter().enumerate() {
        let at = PAGE_HEADER_LEN + i * SLOT_LEN;
        page[at..at + 8].copy_from_slice(&hash.to_le_bytes());
        page[at + 8..at + 16].copy_from_slice(&offset.to_le_bytes());
    }
    page
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2)?.try_into().ok().map(u16::from_le_bytes)
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4)?.try_into().ok().map(u32::from_le_bytes)
}

fn read_u64(buf: &[u8], at: usize) -> Option<u64> {
    buf.get(at..at + 8)?.try_into().ok().map(u64::from_le_bytes)
}

fn corrupt(msg: impl Into<String>) -> DbError {
    DbError::Corrupt(msg.into())
}

/// Read-only view of a published database
pub struct HashDb {
    map: Mmap,
    bucket_size: u32,
    bucket_count: u32,
    record_count: u64,
    directory_offset: u64,
}

impl std::fmt::Debug for HashDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashDb")
            .field("bucket_size", &self.bucket_size)
            .field("bucket_count", &self.bucket_count)
            .field("record_count", &self.record_count)
            .field("bytes", &self.map.len())
            .finish()
    }
}

impl HashDb {
    /// Map and validate a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN as u64 {
            return Err(corrupt(format!("file is {len} bytes, shorter than the header")));
        }

        // Databases are replaced by rename, never rewritten in place.
        let map = unsafe { Mmap::map(&file) }?;
        Self::from_map(map)
    }

    fn from_map(map: Mmap) -> Result<Self> {
        if map.get(0..8) != Some(&MAGIC[..]) {
            return Err(corrupt("bad magic"));
        }
        let version = read_u32(&map, 8).ok_or_else(|| corrupt("truncated header"))?;
        if version != VERSION {
            return Err(corrupt(format!("unsupported version {version}")));
        }
        let bucket_size = read_u32(&map, 12).ok_or_else(|| corrupt("truncated header"))?;
        validate_bucket_size(bucket_size)
            .map_err(|_| corrupt(format!("bucket size {bucket_size}")))?;
        let bucket_count = read_u32(&map, 16).ok_or_else(|| corrupt("truncated header"))?;
        if bucket_count == 0 || !bucket_count.is_power_of_two() {
            return Err(corrupt(format!("bucket count {bucket_count}")));
        }
        let record_count = read_u64(&map, 24).ok_or_else(|| corrupt("truncated header"))?;
        let directory_offset = read_u64(&map, 32).ok_or_else(|| corrupt("truncated header"))?;

        let directory_end = u64::from(bucket_count)
            .checked_mul(u64::from(bucket_size))
            .and_then(|n| n.checked_add(directory_offset))
            .ok_or_else(|| corrupt("directory overflows"))?;
        if directory_offset < u64::from(bucket_size) || directory_end > map.len() as u64 {
            return Err(corrupt("bucket directory out of bounds"));
        }

        Ok(Self {
            map,
            bucket_size,
            bucket_count,
            record_count,
            directory_offset,
        })
    }

    /// Number of live records
    pub fn len(&self) -> u64 {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Look up a key by exact byte comparison
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        let hash = hash_key(key);
        let bucket = hash & (u64::from(self.bucket_count) - 1);
        let start = self.directory_offset + bucket * u64::from(self.bucket_size);

        for page in self.chain(start) {
            let (slots, _) = page?;
            for (slot_hash, offset) in slots {
                if slot_hash != hash {
                    continue;
                }
                let (k, v) = self.record(offset)?;
                if k == key {
                    return Ok(Some(v));
                }
            }
        }
        Ok(None)
    }

    /// Every live `(key, value)` pair, in bucket order
    pub fn entries(&self) -> Result<Vec<(&[u8], &[u8])>> {
        let bound = self.map.len() / RECORD_HEADER_LEN;
        let mut out = Vec::with_capacity((self.record_count as usize).min(bound));
        for bucket in 0..u64::from(self.bucket_count) {
            let start = self.directory_offset + bucket * u64::from(self.bucket_size);
            for page in self.chain(start) {
                let (slots, _) = page?;
                for (_, offset) in slots {
                    out.push(self.record(offset)?);
                }
            }
        }
        if out.len() as u64 != self.record_count {
            return Err(corrupt(format!(
                "header claims {} records, directory holds {}",
                self.record_count,
                out.len()
            )));
        }
        Ok(out)
    }

    fn chain(&self, start: u64) -> PageChain<'_> {
        PageChain {
            db: self,
            next: start,
            remaining: self.map.len() as u64 / u64::from(self.bucket_size),
        }
    }

    fn page(&self, offset: u64) -> Result<(Vec<(u64, u64)>, u64)> {
        let bsize = self.bucket_size as usize;
        let start = usize::try_from(offset).map_err(|_| corrupt("page offset"))?;
        if offset < self.directory_offset {
            return Err(corrupt(format!("page at {offset} inside data region")));
        }
        let page = start
            .checked_add(bsize)
            .and_then(|end| self.map.get(start..end))
            .ok_or_else(|| corrupt(format!("page at {offset} out of bounds")))?;

        let count = read_u32(page, 0).unwrap_or(0) as usize;
        if count > slots_per_page(self.bucket_size) {
            return Err(corrupt(format!("page at {offset} claims {count} slots")));
        }
        let next = read_u64(page, 8).unwrap_or(0);

        let slots = (0..count)
            .map(|i| {
                let at = PAGE_HEADER_LEN + i * SLOT_LEN;
                (
                    read_u64(page, at).unwrap_or(0),
                    read_u64(page, at + 8).unwrap_or(0),
                )
            })
            .collect();
        Ok((slots, next))
    }

    fn record(&self, offset: u64) -> Result<(&[u8], &[u8])> {
        let data_end = self.directory_offset as usize;
        let at = usize::try_from(offset).map_err(|_| corrupt("record offset"))?;
        if offset < u64::from(self.bucket_size)
            || at.checked_add(RECORD_HEADER_LEN).map_or(true, |end| end > data_end)
        {
            return Err(corrupt(format!("record at {offset} out of bounds")));
        }
        let key_len = read_u16(&self.map, at).ok_or_else(|| corrupt("record header"))? as usize;
        let value_len =
            read_u32(&self.map, at + 2).ok_or_else(|| corrupt("record header"))? as usize;

        let key_start = at + RECORD_HEADER_LEN;
        let value_start = key_start + key_len;
        let value_end = value_start
            .checked_add(value_len)
            .filter(|&end| end <= data_end)
            .ok_or_else(|| corrupt(format!("record at {offset} overruns data region")))?;

        Ok((
            &self.map[key_start..value_start],
            &self.map[value_start..value_end],
        ))
    }
}

/// Walks a bucket's primary page and its overflow chain
struct PageChain<'a> {
    db: &'a HashDb,
    next: u64,
    remaining: u64,
}

impl Iterator for PageChain<'_> {
    type Item = Result<(Vec<(u64, u64)>, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == 0 {
            return None;
        }
        if self.remaining == 0 {
            self.next = 0;
            return Some(Err(corrupt("overflow chain does not terminate")));
        }
        self.remaining -= 1;

        match self.db.page(self.next) {
            Ok((slots, next)) => {
                self.next = next;
                Some(Ok((slots, next)))
            }
            Err(e) => {
                self.next = 0;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build(dir: &TempDir, bucket_size: u32, pairs: &[(&[u8], &[u8])]) -> (PathBuf, DbStats) {
        let path = dir.path().join("test.db");
        let mut writer = HashDbWriter::create(&path, bucket_size).unwrap();
        for (k, v) in pairs {
            writer.put(k, v).unwrap();
        }
        let stats = writer.close().unwrap().stats();
        (path, stats)
    }

    #[test]
    fn test_put_get() {
        let dir = TempDir::new().unwrap();
        let (path, stats) = build(
            &dir,
            DEFAULT_BUCKET_SIZE,
            &[(b"alpha", b"one\0"), (b"beta", b"two\0")],
        );
        assert_eq!(stats.records, 2);

        let db = HashDb::open(&path).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.get(b"alpha").unwrap(), Some(&b"one\0"[..]));
        assert_eq!(db.get(b"beta").unwrap(), Some(&b"two\0"[..]));
        assert_eq!(db.get(b"gamma").unwrap(), None);
    }

    #[test]
    fn test_last_put_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.db");
        let mut writer = HashDbWriter::create(&path, DEFAULT_BUCKET_SIZE).unwrap();
        assert!(!writer.put(b"k", b"first").unwrap());
        assert!(writer.put(b"k", b"second").unwrap());
        let stats = writer.close().unwrap().stats();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.superseded, 1);

        let db = HashDb::open(&path).unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(&b"second"[..]));
        assert_eq!(db.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_database() {
        let dir = TempDir::new().unwrap();
        let (path, stats) = build(&dir, DEFAULT_BUCKET_SIZE, &[]);
        assert_eq!(stats.records, 0);
        assert_eq!(stats.bucket_count, 1);

        let db = HashDb::open(&path).unwrap();
        assert!(db.is_empty());
        assert_eq!(db.get(b"anything").unwrap(), None);
        assert!(db.entries().unwrap().is_empty());
    }

    #[test]
    fn test_many_records_small_pages() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.db");
        let mut writer = HashDbWriter::create(&path, MIN_BUCKET_SIZE).unwrap();
        let keys: Vec<Vec<u8>> = (0u32..2000).map(|i| i.to_le_bytes().to_vec()).collect();
        for key in &keys {
            let mut value = key.clone();
            value.push(0);
            writer.put(key, &value).unwrap();
        }
        let stats = writer.close().unwrap().stats();
        assert_eq!(stats.records, 2000);

        let db = HashDb::open(&path).unwrap();
        for key in &keys {
            let value = db.get(key).unwrap().unwrap();
            assert_eq!(&value[..4], &key[..]);
        }
        assert_eq!(db.entries().unwrap().len(), 2000);
    }

    #[test]
    fn test_overflow_chain() {
        // 40 records on 256-byte pages (15 slots) gives 8 buckets. Pick keys
        // that all land in bucket 0 so it needs two overflow pages.
        let keys: Vec<Vec<u8>> = (0u32..)
            .map(|i| i.to_le_bytes().to_vec())
            .filter(|k| hash_key(k) & 7 == 0)
            .take(40)
            .collect();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.db");
        let mut writer = HashDbWriter::create(&path, MIN_BUCKET_SIZE).unwrap();
        for key in &keys {
            writer.put(key, b"x\0").unwrap();
        }
        let stats = writer.close().unwrap().stats();
        assert_eq!(stats.bucket_count, 8);
        assert_eq!(stats.overflow_pages, 2);

        let db = HashDb::open(&path).unwrap();
        for key in &keys {
            assert_eq!(db.get(key).unwrap(), Some(&b"x\0"[..]));
        }
        assert_eq!(db.get(&u32::MAX.to_le_bytes()).unwrap(), None);
        assert_eq!(db.entries().unwrap().len(), 40);
    }

    #[test]
    fn test_encode_page() {
        let slots = [(1u64, 256u64); 3];
        let page = encode_page(&slots, 4096, MIN_BUCKET_SIZE);
        assert_eq!(page.len(), MIN_BUCKET_SIZE as usize);
        assert_eq!(read_u32(&page, 0), Some(3));
        assert_eq!(read_u64(&page, 8), Some(4096));
        assert_eq!(read_u64(&page, PAGE_HEADER_LEN + 8), Some(256));
    }

    #[test]
    fn test_bucket_count_sizing() {
        let per_page = slots_per_page(DEFAULT_BUCKET_SIZE);
        assert_eq!(per_page, 511);
        assert_eq!(bucket_count_for(0, per_page), 1);
        assert_eq!(bucket_count_for(255, per_page), 1);
        assert_eq!(bucket_count_for(256, per_page), 2);
        assert_eq!(bucket_count_for(10_000, per_page), 64);
    }

    #[test]
    fn test_rejects_bad_bucket_size() {
        assert!(matches!(validate_bucket_size(100), Err(DbError::BucketSize(100))));
        assert!(matches!(validate_bucket_size(3000), Err(DbError::BucketSize(3000))));
        assert!(validate_bucket_size(4096).is_ok());

        let dir = TempDir::new().unwrap();
        let result = HashDbWriter::create(dir.path().join("x.db"), 1000);
        assert!(matches!(result, Err(DbError::BucketSize(1000))));
    }

    #[test]
    fn test_create_truncates_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.db");
        std::fs::write(&path, vec![0xAAu8; 100_000]).unwrap();

        let writer = HashDbWriter::create(&path, DEFAULT_BUCKET_SIZE).unwrap();
        let stats = writer.close().unwrap().stats();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), stats.bytes);
        assert!(stats.bytes < 100_000);
    }

    #[test]
    fn test_identical_builds_are_identical_files() {
        let dir = TempDir::new().unwrap();
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0u64..500)
            .map(|i| (i.to_ne_bytes().to_vec(), format!("dev{i}\0").into_bytes()))
            .collect();

        let mut files = Vec::new();
        for name in ["a.db", "b.db"] {
            let path = dir.path().join(name);
            let mut writer = HashDbWriter::create(&path, DEFAULT_BUCKET_SIZE).unwrap();
            for (k, v) in &pairs {
                writer.put(k, v).unwrap();
            }
            writer.close().unwrap();
            files.push(std::fs::read(&path).unwrap());
        }
        assert_eq!(files[0], files[1]);
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.db");

        std::fs::write(&path, b"short").unwrap();
        assert!(matches!(HashDb::open(&path), Err(DbError::Corrupt(_))));

        std::fs::write(&path, vec![0x55u8; 8192]).unwrap();
        assert!(matches!(HashDb::open(&path), Err(DbError::Corrupt(_))));
    }

    #[test]
    fn test_open_rejects_truncated_directory() {
        let dir = TempDir::new().unwrap();
        let (path, _) = build(&dir, DEFAULT_BUCKET_SIZE, &[(b"k", b"v\0")]);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
        assert!(matches!(HashDb::open(&path), Err(DbError::Corrupt(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = HashDb::open(dir.path().join("missing.db"));
        assert!(matches!(result, Err(DbError::Io(_))));
    }

    #[test]
    fn test_waiting_builder_does_not_touch_published_file() {
        use std::sync::mpsc;
        use std::time::Duration;

        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("dev.tmp");
        let dest = dir.path().join("dev.db");

        let mut first = HashDbWriter::create(&tmp, DEFAULT_BUCKET_SIZE).unwrap();
        first.put(b"key", b"first\0").unwrap();

        let (tx, rx) = mpsc::channel();
        let tmp2 = tmp.clone();
        let waiter = std::thread::spawn(move || {
            let mut second = HashDbWriter::create(&tmp2, DEFAULT_BUCKET_SIZE).unwrap();
            tx.send(()).unwrap();
            second.put(b"key", b"second\0").unwrap();
            second.close().unwrap().stats()
        });

        std::thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err(), "second builder must wait for the lock");

        first.close().unwrap().rename_to(&dest).unwrap();
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        waiter.join().unwrap();

        let db = HashDb::open(&dest).unwrap();
        assert_eq!(db.get(b"key").unwrap(), Some(&b"first\0"[..]));
        let scratch = HashDb::open(&tmp).unwrap();
        assert_eq!(scratch.get(b"key").unwrap(), Some(&b"second\0"[..]));
    }

    #[test]
    fn test_hash_is_stable() {
        // FNV-1a 64 offset basis for the empty input
        assert_eq!(hash_key(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(hash_key(b"abc"), hash_key(b"abc"));
        assert_ne!(hash_key(b"abc"), hash_key(b"abd"));
    }
}
