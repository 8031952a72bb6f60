//! # Tailer
//!
//! The sequential reader. `next_index()` polls the next index slot with an
//! acquire load; a zero slot means "nothing published yet" and the caller
//! retries later. A negative slot is a padding entry: the tailer notes it
//! (`was_padding`), steps past it, and tries the following slot in the same
//! call, so callers only ever see data records. The padding flag is still
//! observable when a poll comes back empty right after a block roll.
//!
//! A non-zero slot acquire-synchronizes with the appender's release store,
//! which makes the record bytes and the line base visible; `bytes()` is a
//! zero-copy view into the mapped data block.

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::store::Store;

pub struct Tailer<'a> {
    cur: Cursor<'a>,
}

impl<'a> Tailer<'a> {
    pub(crate) fn new(store: &'a Store) -> Result<Self> {
        Ok(Self {
            cur: Cursor::new(store)?,
        })
    }

    /// Repositions before the first record.
    pub fn to_start(&mut self) -> Result<()> {
        self.cur.to_start()
    }

    /// Repositions after the last committed record, so the next
    /// `next_index()` returns the next record appended.
    pub fn to_end(&mut self) -> Result<()> {
        let size = self.cur.store.size();
        self.cur.index_for_read(size)?;
        self.cur.seq = size - 1;
        // When parked on the first slot of a still-unopened line, rewind to
        // the line start so its base is re-read once the appender writes it.
        if self.cur.index_pos & self.cur.line_mask() == 8 {
            self.cur.index_pos -= 8;
        }
        Ok(())
    }

    /// Advances to the next data record.
    ///
    /// Returns `false` when the log end is reached; the position is
    /// unchanged and the call can simply be repeated later. After a `false`,
    /// `was_padding()` tells whether the last consumed entry was a padding
    /// entry (the log rolled to a new data block and the first record there
    /// is not published yet).
    pub fn next_index(&mut self) -> Result<bool> {
        self.cur.store.check_open()?;
        loop {
            if self.cur.index_pos & self.cur.line_mask() == 0 {
                if self.cur.index_pos >= self.cur.index_start + self.cur.ibs() {
                    self.cur.load_next_index_block()?;
                }
                let base = self.cur.base_at(self.cur.index_pos);
                if base == 0 && self.cur.index_pos != 0 {
                    // Line not opened by the appender yet.
                    return Ok(false);
                }
                if base < 0 {
                    return Err(Error::Corrupt(format!("negative line base {base}")));
                }
                self.cur.base_for_line = base as u64;
                self.cur.index_pos += 8;
                // Records are contiguous: a new line's base is the previous
                // record's end.
                self.cur.limit = base as u64;
            }

            let mut off = self.cur.slot_at(self.cur.index_pos);
            if off == 0 {
                // Safety-net reread before declaring the slot unready.
                off = self.cur.slot_at(self.cur.index_pos);
            }
            if off == 0 {
                return Ok(false);
            }

            self.cur.index_pos += 4;
            self.cur.seq += 1;

            let start = self.cur.limit;
            let end = self.cur.base_for_line + off.unsigned_abs() as u64;
            if off > 0 {
                if end > self.cur.data_start + self.cur.dbs() {
                    self.cur.load_data_block_containing(start)?;
                }
                if end < start || end > self.cur.data_start + self.cur.dbs() {
                    return Err(Error::Corrupt(format!(
                        "record {} spans data blocks: {start}..{end}",
                        self.cur.seq
                    )));
                }
                self.cur.start = start;
                self.cur.limit = end;
                self.cur.padding = false;
                return Ok(true);
            }

            // Padding entry: note it, step past, try the next slot.
            self.cur.start = start;
            self.cur.limit = end;
            self.cur.padding = true;
        }
    }

    /// Bytes of the record returned by the last successful `next_index()`.
    pub fn bytes(&self) -> &[u8] {
        self.cur.bytes()
    }

    /// Sequence number of the last consumed entry, -1 before the first.
    pub fn seq(&self) -> i64 {
        self.cur.seq
    }

    /// Whether the last consumed entry was a padding entry.
    pub fn was_padding(&self) -> bool {
        self.cur.padding
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
    fn empty_store_is_not_ready() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("q"), test_config()).unwrap();
        let mut tailer = store.tailer().unwrap();
        assert!(!tailer.next_index().unwrap());
        assert_eq!(tailer.seq(), -1);
    }

    #[test]
    fn to_end_skips_existing_records() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("q"), test_config()).unwrap();
        let mut appender = store.appender().unwrap();
        for _ in 0..3 {
            appender.start_excerpt(8).unwrap();
            appender.write(b"old");
            appender.finish().unwrap();
        }

        let mut tailer = store.tailer().unwrap();
        tailer.to_end().unwrap();
        assert!(!tailer.next_index().unwrap());

        appender.start_excerpt(8).unwrap();
        appender.write(b"new");
        appender.finish().unwrap();

        assert!(tailer.next_index().unwrap());
        assert_eq!(tailer.bytes(), b"new");
        assert_eq!(tailer.seq(), 3);
    }
}
