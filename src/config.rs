//! # Store Configuration
//!
//! This module centralizes the knobs that define a store's on-disk geometry.
//! The values are interdependent; the derived quantities below are computed
//! from them and used throughout the crate:
//!
//! ```text
//! cache_line_size (CL, 64 bytes)
//!       │
//!       ├─> entries_per_line = (CL - 8) / 4
//!       │     Each index line holds an 8-byte base offset followed by
//!       │     4-byte slots. CL must be a power of two ≥ 16 so a line never
//!       │     straddles an index block and the line mask is cheap.
//!       │
//! index_block_size (IB, 16 MiB)
//!       │
//!       └─> entries_per_block = IB / CL * entries_per_line
//!
//! data_block_size (DB, 64 MiB)
//!       │
//!       ├─> message_capacity must stay < DB: a record never crosses a
//!       │     data block boundary.
//!       │
//!       └─> entries_per_line * DB must fit in i32: slots are 4-byte
//!             cumulative offsets from the line base.
//! ```
//!
//! Geometry is fixed at store creation. Opening an existing pair of files
//! with a different geometry reads garbage; callers own that discipline (the
//! format carries no self-describing header).

use crate::error::{Error, Result};

/// Default data block size: 64 MiB.
pub const DEFAULT_DATA_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// Default index block size: 16 MiB.
pub const DEFAULT_INDEX_BLOCK_SIZE: u64 = 16 * 1024 * 1024;

/// Default index cache line size.
pub const DEFAULT_CACHE_LINE_SIZE: u64 = 64;

/// Default capacity reserved by [`crate::Appender::start_excerpt_default`].
pub const DEFAULT_MESSAGE_CAPACITY: u64 = 128 * 1024;

/// Smallest permitted block size for either backing file.
pub const MIN_BLOCK_SIZE: u64 = 4096;

/// Smallest permitted cache line size: an 8-byte line base plus two slots.
pub const MIN_CACHE_LINE_SIZE: u64 = 16;

/// Geometry and behavior of a store.
///
/// `Default` gives the production geometry; [`StoreConfig::small`] is sized
/// for tools and tests that create many short-lived stores.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Size of one data block. Power of two, at least [`MIN_BLOCK_SIZE`].
    pub data_block_size: u64,
    /// Size of one index block. Power of two, at least [`MIN_BLOCK_SIZE`].
    pub index_block_size: u64,
    /// Size of one index cache line. Power of two, at least
    /// [`MIN_CACHE_LINE_SIZE`], divides `index_block_size`.
    pub cache_line_size: u64,
    /// Capacity reserved when no explicit capacity is given.
    pub message_capacity: u64,
    /// When set, `finish()` flushes the data block and then the index block
    /// before returning.
    pub synchronous_mode: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_block_size: DEFAULT_DATA_BLOCK_SIZE,
            index_block_size: DEFAULT_INDEX_BLOCK_SIZE,
            cache_line_size: DEFAULT_CACHE_LINE_SIZE,
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            synchronous_mode: false,
        }
    }
}

impl StoreConfig {
    /// A small geometry: 16 MiB data blocks, 4 MiB index blocks.
    pub fn small() -> Self {
        Self {
            data_block_size: 16 * 1024 * 1024,
            index_block_size: 4 * 1024 * 1024,
            message_capacity: 16 * 1024,
            ..Self::default()
        }
    }

    /// Number of 4-byte entries per index cache line.
    #[inline]
    pub fn entries_per_line(&self) -> u64 {
        (self.cache_line_size - 8) / 4
    }

    /// Number of entries per index block.
    #[inline]
    pub fn entries_per_block(&self) -> u64 {
        self.index_block_size / self.cache_line_size * self.entries_per_line()
    }

    #[inline]
    pub(crate) fn cache_line_mask(&self) -> u64 {
        self.cache_line_size - 1
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if !self.data_block_size.is_power_of_two() || self.data_block_size < MIN_BLOCK_SIZE {
            return invalid(format!(
                "data_block_size {} must be a power of two >= {}",
                self.data_block_size, MIN_BLOCK_SIZE
            ));
        }
        if !self.index_block_size.is_power_of_two() || self.index_block_size < MIN_BLOCK_SIZE {
            return invalid(format!(
                "index_block_size {} must be a power of two >= {}",
                self.index_block_size, MIN_BLOCK_SIZE
            ));
        }
        if !self.cache_line_size.is_power_of_two()
            || self.cache_line_size < MIN_CACHE_LINE_SIZE
            || self.cache_line_size >= self.index_block_size
        {
            return invalid(format!(
                "cache_line_size {} must be a power of two in [{}, index_block_size)",
                self.cache_line_size, MIN_CACHE_LINE_SIZE
            ));
        }
        if self.message_capacity == 0 || self.message_capacity >= self.data_block_size {
            return invalid(format!(
                "message_capacity {} must be in (0, data_block_size)",
                self.message_capacity
            ));
        }
        // Slots are i32 offsets from the line base; a full line of maximal
        // records must stay representable.
        if self
            .entries_per_line()
            .checked_mul(self.data_block_size)
            .is_none_or(|v| v > i32::MAX as u64)
        {
            return invalid(format!(
                "entries_per_line ({}) * data_block_size ({}) must fit in i32",
                self.entries_per_line(),
                self.data_block_size
            ));
        }
        Ok(())
    }
}
