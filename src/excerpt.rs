//! # Excerpt
//!
//! The random-access reader. `index(seq)` resolves a sequence number to its
//! record window in O(1): the slot position is pure arithmetic, the record
//! start is the previous slot's cumulative end (or the line base for the
//! first slot), and the record end is the slot's own value.
//!
//! `find_match` and `find_range` run binary searches over the committed
//! range using a caller-supplied comparator, with the usual lower/upper
//! bound semantics. A probe that lands on a padding entry steps back one
//! sequence number and compares there.

use std::cmp::Ordering;

use crate::cursor::Cursor;
use crate::error::Result;
use crate::store::Store;

pub struct Excerpt<'a> {
    cur: Cursor<'a>,
}

impl<'a> Excerpt<'a> {
    pub(crate) fn new(store: &'a Store) -> Result<Self> {
        Ok(Self {
            cur: Cursor::new(store)?,
        })
    }

    /// Positions on `seq`.
    ///
    /// Returns `true` when a data record is present. Returns `false` with
    /// `was_padding()` set for a padding entry, and with it clear for a slot
    /// not yet written (or a negative `seq`, which resets before the start).
    pub fn index(&mut self, seq: i64) -> Result<bool> {
        self.cur.store.check_open()?;
        self.cur.index_for_read(seq)
    }

    /// Advances to the next data record, skipping padding entries.
    ///
    /// Returns `false` at the end of the log; the position is unchanged so
    /// the call can be repeated later.
    pub fn next_index(&mut self) -> Result<bool> {
        let mut l = self.cur.seq + 1;
        loop {
            if self.index(l)? {
                return Ok(true);
            }
            if self.cur.padding {
                l += 1;
                continue;
            }
            // Unready: park before the unread slot so the next call retries.
            self.cur.seq = l - 1;
            return Ok(false);
        }
    }

    /// Repositions before the first record.
    pub fn to_start(&mut self) -> Result<()> {
        self.cur.to_start()
    }

    /// Repositions after the last committed record.
    pub fn to_end(&mut self) -> Result<()> {
        let size = self.cur.store.size();
        self.cur.index_for_read(size)?;
        self.cur.seq = size - 1;
        Ok(())
    }

    /// Bytes of the record selected by the last successful positioning.
    pub fn bytes(&self) -> &[u8] {
        self.cur.bytes()
    }

    pub fn len(&self) -> usize {
        (self.cur.limit - self.cur.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.cur.limit == self.cur.start
    }

    /// Sequence number of the current position.
    pub fn seq(&self) -> i64 {
        self.cur.seq
    }

    /// Whether the last `index()` landed on a padding entry.
    pub fn was_padding(&self) -> bool {
        self.cur.padding
    }

    /// Native-endian i64 at `offset` within the current record.
    ///
    /// Panics when the record is shorter than `offset + 8`.
    pub fn read_i64_at(&self, offset: usize) -> i64 {
        let bytes = self.cur.bytes();
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[offset..offset + 8]);
        i64::from_ne_bytes(buf)
    }

    /// Binary search over the committed range.
    ///
    /// The comparator returns `Less` when the probed record sorts before the
    /// target, `Greater` after, `Equal` on a match. Returns a matching
    /// sequence number, or the bitwise complement of the insertion point
    /// when there is no match.
    pub fn find_match<F>(&mut self, mut compare: F) -> Result<i64>
    where
        F: FnMut(&Excerpt<'a>) -> Ordering,
    {
        let mut lo = 0i64;
        let mut hi = self.cur.store.last_written_index();
        while lo <= hi {
            let mut mid = (lo + hi) >> 1;
            if !self.index(mid)? {
                // Padding: compare one record earlier.
                if mid > lo {
                    mid -= 1;
                    self.index(mid)?;
                } else {
                    break;
                }
            }
            match compare(self) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid - 1,
                Ordering::Equal => return Ok(mid),
            }
        }
        Ok(!lo)
    }

    /// Binary search for the whole run of records the comparator considers
    /// `Equal`. Returns `(first, after_last)`; an empty range positioned at
    /// the insertion point when nothing matches.
    pub fn find_range<F>(&mut self, mut compare: F) -> Result<(i64, i64)>
    where
        F: FnMut(&Excerpt<'a>) -> Ordering,
    {
        let last = self.cur.store.last_written_index();
        let (mut lo1, mut hi1) = (0i64, last);
        let (mut lo2, mut hi2) = (0i64, last);
        let mut both = true;

        // Lower bound; tracks the upper search range until the first hit.
        while lo1 <= hi1 {
            let mut mid = (lo1 + hi1) >> 1;
            if !self.index(mid)? {
                if mid > lo1 {
                    mid -= 1;
                    self.index(mid)?;
                } else {
                    break;
                }
            }
            match compare(self) {
                Ordering::Less => {
                    lo1 = mid + 1;
                    if both {
                        lo2 = lo1;
                    }
                }
                Ordering::Greater => {
                    hi1 = mid - 1;
                    if both {
                        hi2 = hi1;
                    }
                }
                Ordering::Equal => {
                    hi1 = mid - 1;
                    if both {
                        lo2 = mid + 1;
                    }
                    both = false;
                }
            }
        }

        // Upper bound.
        while lo2 <= hi2 {
            let mut mid = (lo2 + hi2) >> 1;
            if !self.index(mid)? {
                if mid > lo2 {
                    mid -= 1;
                    self.index(mid)?;
                } else {
                    break;
                }
            }
            match compare(self) {
                Ordering::Greater => hi2 = mid - 1,
                _ => lo2 = mid + 1,
            }
        }

        Ok((lo1, lo2))
    }
}
