//! # Block-Granular Memory Mapping
//!
//! This module implements [`BlockMap`], a lazy map from block index to a
//! pinned, memory-mapped window over one backing file. It is the only layer
//! that touches the OS; everything above it works in absolute file offsets.
//!
//! ## Mapping Model
//!
//! The backing file is a concatenation of fixed-size blocks. Each block gets
//! its own mapping, created on first acquire:
//!
//! ```text
//! file:   [ block 0 ][ block 1 ][ block 2 ] ...
//! maps:     mmap #0     mmap #1    (absent)
//! ```
//!
//! Acquiring a block past the end of the file extends the file first
//! (`set_len`, zero-filled by the OS) and then maps the new range. Because
//! every block has an independent mapping, a mapped block's address never
//! moves: there is no whole-file remap on growth, so readers keep valid
//! pointers while the writer extends the file.
//!
//! ## Pinning
//!
//! [`BlockMap::acquire`] returns a [`Block`] handle that pins the mapping:
//! the pin is the handle's `Arc`, so cloning pins again and dropping
//! releases. A block whose pins are all dropped stays cached; once the cache
//! holds more than a handful of unpinned blocks, the least recently used are
//! unmapped. `close()` refuses with [`Error::InUse`] while any pin exists.
//!
//! ## Access and Safety Contract
//!
//! A mapped block is shared between one writer thread and any number of
//! reader threads, so [`Block`] never hands out `&mut` slices. It exposes:
//!
//! - atomic cell access (`load_i32`/`store_i32`, `load_i64`/`store_i64`)
//!   with acquire/release ordering, used for index cells, and
//! - plain byte-range access (`bytes`, `write_at`), used for record
//!   payloads.
//!
//! The byte-range calls are safe functions with a contract the store layer
//! upholds: a range is either (a) owned by the single writer and not yet
//! published, or (b) published through a release-stored index cell and from
//! then on never written again. Readers only form slices over published
//! ranges after an acquire load of the publishing cell, which establishes
//! the happens-before edge that makes the plain reads race-free.
//!
//! All accessors bounds-check against the block length and panic on
//! overrun; offsets handed to the atomic accessors must be naturally
//! aligned, which the index geometry guarantees (cells at multiples of 4
//! and 8 within a page-aligned mapping).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use memmap2::{MmapOptions, MmapRaw};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Unpinned blocks kept mapped; beyond this the least recently used are
/// unmapped on the next acquire.
const MAX_CACHED_BLOCKS: usize = 16;

/// Lazy block-index → mapped-window table for one backing file.
pub struct BlockMap {
    path: PathBuf,
    block_size: u64,
    inner: Mutex<Inner>,
}

struct Inner {
    file: Option<std::fs::File>,
    file_len: u64,
    blocks: HashMap<u64, Cached>,
    tick: u64,
}

struct Cached {
    block: Arc<Mapped>,
    last_used: u64,
}

struct Mapped {
    map: MmapRaw,
    index: u64,
}

impl BlockMap {
    /// Opens (creating if absent) the backing file at `path` with the given
    /// block size. The file is not extended until a block is acquired.
    pub fn open(path: &Path, block_size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let file_len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            block_size,
            inner: Mutex::new(Inner {
                file: Some(file),
                file_len,
                blocks: HashMap::new(),
                tick: 0,
            }),
        })
    }

    /// Returns a pinned handle to block `index`, extending the file
    /// (zero-filled) when the block lies past the current end.
    pub fn acquire(&self, index: u64) -> Result<Block> {
        let mut guard = self.inner.lock();
        let Inner {
            file,
            file_len,
            blocks,
            tick,
        } = &mut *guard;
        let Some(file) = file.as_ref() else {
            return Err(Error::Closed);
        };

        *tick += 1;
        if let Some(cached) = blocks.get_mut(&index) {
            cached.last_used = *tick;
            return Ok(Block {
                mapped: cached.block.clone(),
            });
        }

        let offset = index * self.block_size;
        let end = offset + self.block_size;
        if *file_len < end {
            file.set_len(end)?;
            *file_len = end;
        }

        let map = MmapOptions::new()
            .offset(offset)
            .len(self.block_size as usize)
            .map_raw(file)?;

        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is a kernel hint and does not
        // move or invalidate the mapping. The pointer and length come
        // straight from the mapping created above, so the range is valid.
        unsafe {
            libc::madvise(
                map.as_mut_ptr() as *mut libc::c_void,
                map.len(),
                libc::MADV_WILLNEED,
            );
        }

        Self::evict_unpinned(blocks);

        let block = Arc::new(Mapped { map, index });
        blocks.insert(
            index,
            Cached {
                block: block.clone(),
                last_used: *tick,
            },
        );
        Ok(Block { mapped: block })
    }

    /// Physical length of the backing file in bytes; 0 for a fresh store.
    pub fn size(&self) -> u64 {
        self.inner.lock().file_len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Flushes every mapped block, unmaps them, and closes the file.
    ///
    /// Fails with [`Error::InUse`] while any [`Block`] handle is alive;
    /// closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.file.is_none() {
            return Ok(());
        }

        let pinned = inner
            .blocks
            .values()
            .filter(|c| Arc::strong_count(&c.block) > 1)
            .count();
        if pinned > 0 {
            return Err(Error::InUse(format!("{pinned} block(s) still pinned")));
        }

        for cached in inner.blocks.values() {
            cached.block.map.flush()?;
        }
        inner.blocks.clear();
        inner.file = None;
        Ok(())
    }

    /// Unmaps least-recently-used unpinned blocks down to the cache cap.
    fn evict_unpinned(blocks: &mut HashMap<u64, Cached>) {
        while blocks.len() >= MAX_CACHED_BLOCKS {
            let victim = blocks
                .iter()
                .filter(|(_, c)| Arc::strong_count(&c.block) == 1)
                .min_by_key(|(_, c)| c.last_used)
                .map(|(&idx, _)| idx);
            match victim {
                Some(idx) => {
                    blocks.remove(&idx);
                }
                None => break,
            }
        }
    }
}

impl Drop for BlockMap {
    fn drop(&mut self) {
        // Pinned handles keep their own Arc; flushing is best-effort here.
        let mut inner = self.inner.lock();
        for cached in inner.blocks.values() {
            let _ = cached.block.map.flush();
        }
        inner.blocks.clear();
        inner.file = None;
    }
}

/// Pinned handle to one mapped block.
///
/// Cloning pins the block again; dropping the last handle releases it back
/// to the map's cache. See the module docs for the access contract.
#[derive(Clone)]
pub struct Block {
    mapped: Arc<Mapped>,
}

impl Block {
    /// Block index within the backing file.
    pub fn index(&self) -> u64 {
        self.mapped.index
    }

    /// Mapped length in bytes (always the map's block size).
    pub fn len(&self) -> usize {
        self.mapped.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len()),
            "range {offset}..{} out of block bounds {}",
            offset.wrapping_add(len),
            self.len()
        );
    }

    #[inline]
    fn atomic_i32(&self, offset: usize) -> &AtomicI32 {
        self.check(offset, 4);
        debug_assert!(offset % 4 == 0, "unaligned i32 cell at {offset}");
        // SAFETY: the range is in bounds (checked above), 4-aligned (the
        // mapping is page-aligned and the offset is a multiple of 4), and
        // this cell is only ever accessed atomically, so shared references
        // to the AtomicI32 cannot race. The mapping outlives the reference
        // via the Arc held by self.
        unsafe { &*(self.mapped.map.as_mut_ptr().add(offset) as *const AtomicI32) }
    }

    #[inline]
    fn atomic_i64(&self, offset: usize) -> &AtomicI64 {
        self.check(offset, 8);
        debug_assert!(offset % 8 == 0, "unaligned i64 cell at {offset}");
        // SAFETY: as for atomic_i32, with 8-byte cells at 8-aligned offsets.
        unsafe { &*(self.mapped.map.as_mut_ptr().add(offset) as *const AtomicI64) }
    }

    /// Acquire-loads the 4-byte cell at `offset`.
    #[inline]
    pub fn load_i32(&self, offset: usize) -> i32 {
        self.atomic_i32(offset).load(Ordering::Acquire)
    }

    /// Release-stores `value` into the 4-byte cell at `offset`. This is the
    /// publication primitive: all plain writes sequenced before it become
    /// visible to readers that acquire-load the cell.
    #[inline]
    pub fn store_i32(&self, offset: usize, value: i32) {
        self.atomic_i32(offset).store(value, Ordering::Release);
    }

    /// Acquire-loads the 8-byte cell at `offset`.
    #[inline]
    pub fn load_i64(&self, offset: usize) -> i64 {
        self.atomic_i64(offset).load(Ordering::Acquire)
    }

    /// Release-stores `value` into the 8-byte cell at `offset`.
    #[inline]
    pub fn store_i64(&self, offset: usize, value: i64) {
        self.atomic_i64(offset).store(value, Ordering::Release);
    }

    /// Borrows `len` bytes starting at `offset`.
    ///
    /// Contract: the range must already be published (or written by the
    /// caller itself); see the module docs.
    #[inline]
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.check(offset, len);
        // SAFETY: in bounds per check; the mapping outlives the slice via
        // the Arc in self. Freedom from data races is the module-level
        // contract: published ranges are never written again.
        unsafe { std::slice::from_raw_parts(self.mapped.map.as_ptr().add(offset), len) }
    }

    /// Copies `src` into the block at `offset`.
    ///
    /// Contract: single-writer; the range must not be published yet.
    #[inline]
    pub fn write_at(&self, offset: usize, src: &[u8]) {
        self.check(offset, src.len());
        // SAFETY: in bounds per check; `src` cannot overlap the mapping
        // (it is a live &[u8] while the mapping is only reachable through
        // raw pointers here). Race freedom is the single-writer contract.
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.mapped.map.as_mut_ptr().add(offset),
                src.len(),
            );
        }
    }

    /// msyncs the whole block to its backing file.
    pub fn flush(&self) -> Result<()> {
        self.mapped.map.flush()?;
        Ok(())
    }
}
