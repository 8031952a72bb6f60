//! Error types for chronolog.
//!
//! All fallible operations return [`Result<T>`], aliased to
//! `Result<T, Error>`, so `?` propagates errors throughout the crate.
//!
//! I/O failures abort the current operation; an appender that hits one is in
//! an undefined position and must be reconstructed. Readers may simply retry.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation on a store or block map after `close()`.
    #[error("store is closed")]
    Closed,

    /// The resource cannot be closed or cleared yet.
    #[error("still in use: {0}")]
    InUse(String),

    /// `start_excerpt` with a capacity that cannot fit in one data block.
    #[error("capacity too large: {capacity} >= data block size {data_block_size}")]
    CapacityTooLarge { capacity: u64, data_block_size: u64 },

    /// Negative sequence number passed to appender positioning.
    #[error("index out of bounds: {0}")]
    IndexOutOfBounds(i64),

    /// `finish()` observed a sequence number that does not match the store
    /// size: more than one appender is writing at the same time.
    #[error("store appended by more than one appender, seq={seq}, size={size}")]
    ConcurrentWriter { seq: i64, size: i64 },

    /// The index file contents cannot be made sense of.
    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
