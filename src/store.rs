//! # Store
//!
//! A [`Store`] is one append-only, indexed log: a pair of sibling files
//! `<base>.index` and `<base>.data`, each managed by a [`BlockMap`].
//!
//! ## Index Layout
//!
//! The index file is a sequence of fixed-size blocks; each block is a
//! sequence of cache lines:
//!
//! ```text
//! line:  [ base: i64 ][ slot 0: i32 ][ slot 1: i32 ] ... [ slot N-1 ]
//!          8 bytes      4 bytes each, N = (line size - 8) / 4
//! ```
//!
//! `base` is the absolute data-file offset of the first record described by
//! the line. Each slot is a cumulative end offset relative to `base`:
//! positive for a data record, negative for a padding entry (whose magnitude
//! is the data-block end relative to `base`), zero for "not yet written".
//! Record `seq` maps to a slot by pure arithmetic, which is what makes
//! random access O(1).
//!
//! ## Recovery
//!
//! `open` scans the index backwards for the last non-zero slot and caches
//! the resulting sequence number. The scan tolerates zero-filled tails left
//! by a crash between the data write and the index publication: such a
//! record simply does not exist. What it does not tolerate is a non-zero
//! slot after a zero slot inside one line, or a negative line base; both
//! mean the file is not an index this geometry wrote, and `open` refuses
//! with [`Error::Corrupt`].
//!
//! ## Concurrency
//!
//! One appender, any number of tailers and excerpts, all on user threads;
//! the store itself only holds the block maps (internally locked) and two
//! atomics. Readers observe records via the acquire/release protocol
//! described in [`crate::block_map`]. Single-writer discipline is not
//! enforced by a lock: a second appender is detected at `finish()` and
//! reported as [`Error::ConcurrentWriter`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use tracing::debug;

use crate::appender::Appender;
use crate::block_map::BlockMap;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::excerpt::Excerpt;
use crate::tailer::Tailer;

/// Appends `suffix` to the final path component.
fn sibling(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// An append-only indexed log over two memory-mapped files.
pub struct Store {
    base_path: PathBuf,
    config: StoreConfig,
    index: BlockMap,
    data: BlockMap,
    last_index: AtomicI64,
    closed: AtomicBool,
}

impl Store {
    /// Opens (creating if absent) the store at `base_path`, creating the
    /// parent directory if needed, and recovers the last written index from
    /// the file contents.
    pub fn open(base_path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let base_path = base_path.as_ref().to_path_buf();
        if let Some(parent) = base_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let index = BlockMap::open(&sibling(&base_path, ".index"), config.index_block_size)?;
        let data = BlockMap::open(&sibling(&base_path, ".data"), config.data_block_size)?;

        let store = Self {
            base_path,
            config,
            index,
            data,
            last_index: AtomicI64::new(-1),
            closed: AtomicBool::new(false),
        };
        let last = store.recover_last_index()?;
        store.last_index.store(last, Ordering::Relaxed);
        debug!(
            base = %store.base_path.display(),
            last_written_index = last,
            "store opened"
        );
        Ok(store)
    }

    /// The sequence number of the most recently committed record (padding
    /// entries included), or -1 when the store is empty. Cached; maintained
    /// by the appender and by [`Store::find_last_index`].
    pub fn last_written_index(&self) -> i64 {
        self.last_index.load(Ordering::Relaxed)
    }

    /// Number of committed records, `last_written_index() + 1`.
    pub fn size(&self) -> i64 {
        self.last_written_index() + 1
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Single-writer cursor positioned at the end of the log.
    pub fn appender(&self) -> Result<Appender<'_>> {
        self.check_open()?;
        Appender::new(self)
    }

    /// Sequential reader positioned before the first record.
    pub fn tailer(&self) -> Result<Tailer<'_>> {
        self.check_open()?;
        Tailer::new(self)
    }

    /// Random-access reader.
    pub fn excerpt(&self) -> Result<Excerpt<'_>> {
        self.check_open()?;
        Excerpt::new(self)
    }

    /// Re-runs the recovery scan against the file contents and refreshes
    /// the cached value.
    pub fn find_last_index(&self) -> Result<i64> {
        self.check_open()?;
        let last = self.recover_last_index()?;
        self.last_index.store(last, Ordering::Relaxed);
        Ok(last)
    }

    /// Closes both block maps. Fails with [`Error::InUse`] while any
    /// appender, tailer or excerpt still pins a block.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.index.close()?;
        self.data.close()?;
        debug!(base = %self.base_path.display(), "store closed");
        Ok(())
    }

    /// Deletes both backing files. The store must be closed first.
    pub fn clear(&self) -> Result<()> {
        if !self.closed.load(Ordering::Acquire) {
            return Err(Error::InUse("store must be closed before clear".into()));
        }
        for path in [self.index.path(), self.data.path()] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    pub(crate) fn index_blocks(&self) -> &BlockMap {
        &self.index
    }

    pub(crate) fn data_blocks(&self) -> &BlockMap {
        &self.data
    }

    pub(crate) fn incr_last_index(&self) {
        self.last_index.fetch_add(1, Ordering::AcqRel);
    }

    /// Backward scan for the largest sequence number with a non-zero slot.
    ///
    /// Blocks past the last used one carry a zero base in their first line
    /// and are skipped. Within the newest used block, the last active line
    /// is the one whose successor's base is still zero (or the final line);
    /// the answer is that line's first sequence number plus its count of
    /// filled slots, minus one.
    fn recover_last_index(&self) -> Result<i64> {
        let ibs = self.config.index_block_size;
        let cls = self.config.cache_line_size;
        let epl = self.config.entries_per_line();
        let epb = self.config.entries_per_block();

        let file_len = self.index.size();
        if file_len == 0 {
            return Ok(-1);
        }
        if file_len % ibs != 0 {
            return Err(Error::Corrupt(format!(
                "index length {file_len} is not a multiple of the block size {ibs}"
            )));
        }

        let lines_per_block = (ibs / cls) as usize;
        for block_idx in (0..file_len / ibs).rev() {
            let block = self.index.acquire(block_idx)?;
            if block_idx > 0 && block.load_i64(0) == 0 {
                continue;
            }

            for line in 0..lines_per_block {
                let line_off = line * cls as usize;
                let last_line =
                    line + 1 == lines_per_block || block.load_i64(line_off + cls as usize) == 0;
                if !last_line {
                    continue;
                }

                let base = block.load_i64(line_off);
                if base < 0 {
                    return Err(Error::Corrupt(format!(
                        "negative line base {base} at block {block_idx} line {line}"
                    )));
                }

                let mut filled = 0i64;
                for slot in 0..epl as usize {
                    if block.load_i32(line_off + 8 + slot * 4) == 0 {
                        // Everything after the first gap must be zero.
                        for rest in slot + 1..epl as usize {
                            if block.load_i32(line_off + 8 + rest * 4) != 0 {
                                return Err(Error::Corrupt(format!(
                                    "slot {rest} written after a gap at slot {slot} \
                                     in block {block_idx} line {line}"
                                )));
                            }
                        }
                        break;
                    }
                    filled += 1;
                }

                let first_seq = (block_idx * epb) as i64 + line as i64 * epl as i64;
                return Ok(first_seq + filled - 1);
            }
        }
        Ok(-1)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
