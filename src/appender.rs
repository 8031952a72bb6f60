//! # Appender
//!
//! The single-writer cursor. An excerpt is written in three steps:
//!
//! ```text
//! appender.start_excerpt(cap)?;   // reserve cap bytes, rolling the data
//!                                 // block (with a padding entry) if the
//!                                 // reservation would cross its end
//! appender.write(payload);        // plain stores into the data window
//! appender.finish()?;             // release-store the index slot
//! ```
//!
//! `finish` is the publication point: the release store of the 4-byte slot
//! is what makes the record (and, at a line boundary, the preceding line
//! base) visible to readers. Nothing before it is observable.
//!
//! Exactly one appender may write to a store at a time. This is not
//! enforced with a lock; a second appender is detected by the sequence
//! check in `finish` and reported as [`Error::ConcurrentWriter`].
//!
//! Writing past the reserved capacity, finishing without a matching start,
//! or finishing an empty excerpt at a line start are programmer errors and
//! fail fast.

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::store::Store;

pub struct Appender<'a> {
    cur: Cursor<'a>,
    /// Absolute data-file offset one past the last byte written so far.
    write_pos: u64,
    in_excerpt: bool,
    next_synchronous: bool,
}

impl<'a> Appender<'a> {
    pub(crate) fn new(store: &'a Store) -> Result<Self> {
        let mut appender = Self {
            cur: Cursor::new(store)?,
            write_pos: 0,
            in_excerpt: false,
            next_synchronous: store.config().synchronous_mode,
        };
        appender.seek_to_end()?;
        Ok(appender)
    }

    /// Repositions at the end of the log; any excerpt in progress is
    /// discarded.
    pub fn seek_to_end(&mut self) -> Result<()> {
        self.cur.index_for_append(self.cur.store.size())?;
        self.write_pos = self.cur.start;
        self.in_excerpt = false;
        Ok(())
    }

    /// Sequence number the next finished excerpt will receive.
    pub fn seq(&self) -> i64 {
        self.cur.seq
    }

    /// Starts an excerpt with the configured default capacity.
    pub fn start_excerpt_default(&mut self) -> Result<()> {
        self.start_excerpt(self.cur.store.config().message_capacity)
    }

    /// Reserves `capacity` writable bytes for the next record.
    ///
    /// When the reservation would cross the current data block's end, the
    /// block's remaining tail is committed as a padding entry (consuming a
    /// sequence number) and the excerpt starts at the next block.
    pub fn start_excerpt(&mut self, capacity: u64) -> Result<()> {
        let store = self.cur.store;
        store.check_open()?;
        if self.cur.seq != store.size() {
            self.seek_to_end()?;
        }

        let dbs = self.cur.dbs();
        if capacity >= dbs {
            return Err(Error::CapacityTooLarge {
                capacity,
                data_block_size: dbs,
            });
        }

        if self.cur.start + capacity > self.cur.data_start + dbs {
            self.ensure_index_line()?;
            self.write_padded_entry()?;
            self.advance_data_block()?;
        }
        self.ensure_index_line()?;

        self.cur.limit = self.cur.start + capacity;
        self.write_pos = self.cur.start;
        self.in_excerpt = true;
        self.next_synchronous = store.config().synchronous_mode;
        Ok(())
    }

    /// Appends `bytes` to the open excerpt.
    ///
    /// Panics when no excerpt is open or the write overruns the reserved
    /// capacity.
    pub fn write(&mut self, bytes: &[u8]) {
        assert!(self.in_excerpt, "write outside start_excerpt/finish");
        let end = self.write_pos + bytes.len() as u64;
        assert!(
            end <= self.cur.limit,
            "write of {} bytes overruns the excerpt capacity",
            bytes.len()
        );
        self.cur
            .data_block
            .write_at((self.write_pos - self.cur.data_start) as usize, bytes);
        self.write_pos = end;
    }

    /// Appends a native-endian i64.
    pub fn write_i64(&mut self, value: i64) {
        self.write(&value.to_ne_bytes());
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write(&[value]);
    }

    /// Unwritten bytes left in the open excerpt.
    pub fn remaining(&self) -> u64 {
        self.cur.limit.saturating_sub(self.write_pos)
    }

    /// Commits the open excerpt: publishes the index slot, advances the
    /// sequence, and opens the next index line eagerly when the slot filled
    /// its line. In synchronous mode the data block is flushed before the
    /// index block.
    pub fn finish(&mut self) -> Result<()> {
        assert!(self.in_excerpt, "finish without start_excerpt");
        self.in_excerpt = false;

        let store = self.cur.store;
        store.check_open()?;
        if self.cur.seq != store.size() {
            return Err(Error::ConcurrentWriter {
                seq: self.cur.seq,
                size: store.size(),
            });
        }

        debug_assert!(self.write_pos <= self.cur.data_start + self.cur.dbs());
        let rel = self.write_pos - self.cur.base_for_line;
        debug_assert!(rel > 0, "empty excerpt at a line start");
        if rel == 0 {
            return Err(Error::Corrupt(
                "empty excerpt at a line start cannot be published".into(),
            ));
        }

        self.cur.store_slot(self.cur.index_pos, rel as i32);
        self.cur.index_pos += 4;
        self.cur.seq += 1;
        store.incr_last_index();
        self.cur.start = self.write_pos;

        // Crossing into a new line within the same block: write its base
        // now so it is in place before any of the line's slots.
        if self.cur.index_pos & self.cur.line_mask() == 0
            && self.cur.index_pos - self.cur.index_start < self.cur.ibs()
        {
            self.cur.base_for_line += rel;
            self.cur
                .store_base(self.cur.index_pos, self.cur.base_for_line as i64);
            self.cur.index_pos += 8;
        }

        if self.next_synchronous {
            self.cur.data_block.flush()?;
            self.cur.index_block.flush()?;
        }
        Ok(())
    }

    /// Forces a roll to the next data block, committing the current block's
    /// remaining tail as a padding entry (one sequence number). A no-op
    /// entry-wise when the block is already exactly full.
    pub fn add_padded_entry(&mut self) -> Result<()> {
        let store = self.cur.store;
        store.check_open()?;
        if self.cur.seq != store.size() {
            self.seek_to_end()?;
        }

        self.ensure_index_line()?;
        self.write_padded_entry()?;
        self.advance_data_block()?;
        self.ensure_index_line()?;
        self.cur.limit = self.cur.start;
        self.in_excerpt = false;
        Ok(())
    }

    /// Overrides synchronous mode for the excerpt currently open. Reset to
    /// the configured value by the next `start_excerpt`.
    pub fn set_next_synchronous(&mut self, synchronous: bool) {
        self.next_synchronous = synchronous;
    }

    pub fn next_synchronous(&self) -> bool {
        self.next_synchronous
    }

    /// Publishes the current block's tail `[base_for_line + prev, block end)`
    /// as a padding entry. The slot stores the block end relative to the
    /// line base, negated; readers derive the padding length from the
    /// previous slot.
    fn write_padded_entry(&mut self) -> Result<()> {
        let block_end = self.cur.data_start + self.cur.dbs();
        debug_assert!(block_end >= self.cur.base_for_line);
        let rel = block_end - self.cur.base_for_line;
        if rel == 0 {
            return Ok(());
        }

        self.cur.store_slot(self.cur.index_pos, -(rel as i32));
        self.cur.index_pos += 4;
        self.cur.seq += 1;
        self.cur.store.incr_last_index();
        Ok(())
    }

    fn advance_data_block(&mut self) -> Result<()> {
        let next = self.cur.data_start + self.cur.dbs();
        self.cur.load_data_block_containing(next)?;
        self.cur.start = next;
        self.write_pos = next;
        Ok(())
    }

    /// Opens a fresh index line when the cursor sits at a line start,
    /// loading the next index block first when the current one is full.
    fn ensure_index_line(&mut self) -> Result<()> {
        match self.cur.index_pos & self.cur.line_mask() {
            0 => self.new_index_line(),
            4 => {
                debug_assert!(false, "index cursor misaligned at {}", self.cur.index_pos);
                Err(Error::Corrupt(format!(
                    "index cursor misaligned at {}",
                    self.cur.index_pos
                )))
            }
            _ => Ok(()),
        }
    }

    fn new_index_line(&mut self) -> Result<()> {
        if self.cur.index_pos >= self.cur.index_start + self.cur.ibs() {
            self.cur.load_next_index_block()?;
        }
        self.cur.base_for_line = self.cur.start;
        debug_assert!(
            self.cur.seq == 0 || self.cur.base_for_line > 0,
            "no line base to write"
        );
        debug_assert!(self.cur.base_for_line < 1 << 48, "line base out of bounds");
        self.cur
            .store_base(self.cur.index_pos, self.cur.base_for_line as i64);
        self.cur.index_pos += 8;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::tempdir;

    fn test_config() -> StoreConfig {
        StoreConfig {
            data_block_size: 4096,
            index_block_size: 4096,
            cache_line_size: 64,
            message_capacity: 1024,
            synchronous_mode: false,
        }
    }

    #[test]
    fn rejects_capacity_at_or_above_block_size() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("q"), test_config()).unwrap();
        let mut appender = store.appender().unwrap();
        assert!(matches!(
            appender.start_excerpt(4096),
            Err(Error::CapacityTooLarge { .. })
        ));
        appender.start_excerpt(4095).unwrap();
    }

    #[test]
    #[should_panic(expected = "overruns the excerpt capacity")]
    fn overrunning_reserved_capacity_panics() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("q"), test_config()).unwrap();
        let mut appender = store.appender().unwrap();
        appender.start_excerpt(4).unwrap();
        appender.write(&[0u8; 8]);
    }

    #[test]
    fn restarting_an_excerpt_discards_it() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("q"), test_config()).unwrap();
        let mut appender = store.appender().unwrap();

        appender.start_excerpt(16).unwrap();
        appender.write(b"abandoned");
        appender.start_excerpt(16).unwrap();
        appender.write(b"kept");
        appender.finish().unwrap();

        let mut excerpt = store.excerpt().unwrap();
        assert!(excerpt.index(0).unwrap());
        assert_eq!(excerpt.bytes(), b"kept");
    }
}
