//! Shared positioning state for the three cursor types.
//!
//! Appender, tailer and random-access excerpt all walk the same two files,
//! so they share one struct holding the pinned blocks, the index position
//! and the current record window, plus the `seq → (block, line, slot)`
//! arithmetic. The three public types specialize behavior on top; there is
//! no dynamic dispatch on the hot paths.
//!
//! All positions are absolute file offsets. Translation to in-block offsets
//! happens at the [`Block`] access boundary.

use crate::block_map::Block;
use crate::error::{Error, Result};
use crate::store::Store;

pub(crate) struct Cursor<'a> {
    pub(crate) store: &'a Store,
    pub(crate) index_block: Block,
    pub(crate) data_block: Block,
    /// Absolute index-file offset of the current index block.
    pub(crate) index_start: u64,
    /// Absolute index-file offset of the next index cell (line base or slot).
    pub(crate) index_pos: u64,
    /// Absolute data-file offset of the current data block.
    pub(crate) data_start: u64,
    /// Absolute data-file offset of the first record described by the
    /// current index line.
    pub(crate) base_for_line: u64,
    /// Current record window, absolute data-file offsets.
    pub(crate) start: u64,
    pub(crate) limit: u64,
    pub(crate) seq: i64,
    pub(crate) padding: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(store: &'a Store) -> Result<Self> {
        let index_block = store.index_blocks().acquire(0)?;
        let data_block = store.data_blocks().acquire(0)?;
        Ok(Self {
            store,
            index_block,
            data_block,
            index_start: 0,
            index_pos: 0,
            data_start: 0,
            base_for_line: 0,
            start: 0,
            limit: 0,
            seq: -1,
            padding: false,
        })
    }

    #[inline]
    pub(crate) fn dbs(&self) -> u64 {
        self.store.config().data_block_size
    }

    #[inline]
    pub(crate) fn ibs(&self) -> u64 {
        self.store.config().index_block_size
    }

    #[inline]
    pub(crate) fn cls(&self) -> u64 {
        self.store.config().cache_line_size
    }

    #[inline]
    pub(crate) fn line_mask(&self) -> u64 {
        self.store.config().cache_line_mask()
    }

    #[inline]
    pub(crate) fn epl(&self) -> u64 {
        self.store.config().entries_per_line()
    }

    #[inline]
    pub(crate) fn epb(&self) -> u64 {
        self.store.config().entries_per_block()
    }

    pub(crate) fn to_start(&mut self) -> Result<()> {
        self.load_index_block_containing(0)?;
        self.load_data_block_containing(0)?;
        self.index_pos = 0;
        self.base_for_line = 0;
        self.start = 0;
        self.limit = 0;
        self.seq = -1;
        self.padding = false;
        Ok(())
    }

    pub(crate) fn load_index_block_containing(&mut self, offset: u64) -> Result<()> {
        let idx = offset / self.ibs();
        if self.index_block.index() != idx {
            self.index_block = self.store.index_blocks().acquire(idx)?;
        }
        self.index_start = idx * self.ibs();
        Ok(())
    }

    /// Advances to the next index block and rewinds `index_pos` to its start.
    pub(crate) fn load_next_index_block(&mut self) -> Result<()> {
        self.load_index_block_containing(self.index_start + self.ibs())?;
        self.index_pos = self.index_start;
        Ok(())
    }

    pub(crate) fn load_data_block_containing(&mut self, offset: u64) -> Result<()> {
        let idx = offset / self.dbs();
        if self.data_block.index() != idx {
            self.data_block = self.store.data_blocks().acquire(idx)?;
        }
        self.data_start = idx * self.dbs();
        Ok(())
    }

    /// Acquire-loads the 4-byte slot at absolute index offset `pos`.
    #[inline]
    pub(crate) fn slot_at(&self, pos: u64) -> i32 {
        self.index_block.load_i32((pos - self.index_start) as usize)
    }

    /// Release-stores a slot; this is the record publication point.
    #[inline]
    pub(crate) fn store_slot(&self, pos: u64, value: i32) {
        self.index_block
            .store_i32((pos - self.index_start) as usize, value);
    }

    /// Acquire-loads the 8-byte line base at absolute index offset `pos`.
    #[inline]
    pub(crate) fn base_at(&self, pos: u64) -> i64 {
        self.index_block.load_i64((pos - self.index_start) as usize)
    }

    #[inline]
    pub(crate) fn store_base(&self, pos: u64, value: i64) {
        self.index_block
            .store_i64((pos - self.index_start) as usize, value);
    }

    /// Bytes of the current record window.
    pub(crate) fn bytes(&self) -> &[u8] {
        if self.limit <= self.start {
            return &[];
        }
        self.data_block.bytes(
            (self.start - self.data_start) as usize,
            (self.limit - self.start) as usize,
        )
    }

    /// Positions on `seq` for reading. Returns `true` when a data record is
    /// present there; `false` with `padding` set when the slot holds a
    /// padding entry, and `false` with `padding` clear when the slot is not
    /// yet written.
    pub(crate) fn index_for_read(&mut self, l: i64) -> Result<bool> {
        if l < 0 {
            self.to_start()?;
            self.padding = true;
            return Ok(false);
        }
        let epb = self.epb() as i64;
        let epl = self.epl() as i64;
        let block = (l / epb) as u64;
        self.load_index_block_containing(block * self.ibs())?;
        let rem = l % epb;
        let line_off = self.index_start + (rem / epl) as u64 * self.cls();
        let slot = (rem % epl) as u64;
        let slot_off = line_off + 8 + slot * 4;

        // Slot first: its acquire pairs with the appender's release and
        // makes the line base and the record bytes visible.
        let end_rel = self.slot_at(slot_off);
        let base = self.base_at(line_off);
        if base < 0 {
            return Err(Error::Corrupt(format!("negative line base {base}")));
        }
        let base = base as u64;
        self.base_for_line = base;
        self.index_pos = slot_off;
        self.seq = l;

        let start_rel = if slot == 0 {
            0
        } else {
            self.slot_at(slot_off - 4).unsigned_abs() as u64
        };
        let start = base + start_rel;

        if end_rel > 0 {
            let end = base + end_rel as u64;
            self.load_data_block_containing(start)?;
            if end < start || end > self.data_start + self.dbs() {
                return Err(Error::Corrupt(format!(
                    "record {l} spans data blocks: {start}..{end}"
                )));
            }
            self.start = start;
            self.limit = end;
            self.index_pos += 4;
            self.padding = false;
            Ok(true)
        } else if end_rel == 0 {
            self.start = start;
            self.limit = start;
            self.padding = false;
            Ok(false)
        } else {
            self.padding = true;
            Ok(false)
        }
    }

    /// Positions for appending at `seq`, i.e. just past the end of record
    /// `seq - 1`. `seq` 0 positions at the start of both files.
    pub(crate) fn index_for_append(&mut self, l: i64) -> Result<()> {
        if l < 0 {
            return Err(Error::IndexOutOfBounds(l));
        }
        if l == 0 {
            self.to_start()?;
            self.seq = 0;
            return Ok(());
        }

        // The end of the previous record is where this one starts.
        let prev = l - 1;
        let epb = self.epb() as i64;
        let epl = self.epl() as i64;
        let block = (prev / epb) as u64;
        self.load_index_block_containing(block * self.ibs())?;
        let rem = prev % epb;
        let line_off = self.index_start + (rem / epl) as u64 * self.cls();
        let slot_off = line_off + 8 + (rem % epl) as u64 * 4;

        let base = self.base_at(line_off);
        if base < 0 {
            return Err(Error::Corrupt(format!("negative line base {base}")));
        }
        let end = base as u64 + self.slot_at(slot_off).unsigned_abs() as u64;

        self.base_for_line = base as u64;
        self.load_data_block_containing(end)?;
        self.start = end;
        self.limit = end;
        self.seq = l;
        self.index_pos = slot_off + 4;
        self.padding = false;
        Ok(())
    }
}
