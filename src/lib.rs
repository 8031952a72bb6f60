//! # chronolog - Append-Only Indexed Log
//!
//! chronolog is an embedded, append-only persistent log over memory-mapped
//! files, indexed by a dense 64-bit sequence number. One writer appends;
//! any number of readers tail the log or jump straight to a sequence
//! number, without locks on any hot path.
//!
//! ## Quick Start
//!
//! ```ignore
//! use chronolog::{Store, StoreConfig};
//!
//! let store = Store::open("./logs/events", StoreConfig::default())?;
//!
//! let mut appender = store.appender()?;
//! appender.start_excerpt(64)?;
//! appender.write(b"hello");
//! appender.finish()?;
//!
//! let mut tailer = store.tailer()?;
//! while tailer.next_index()? {
//!     println!("{}: {:?}", tailer.seq(), tailer.bytes());
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │   Appender   │   Tailer   │   Excerpt     │
//! ├───────────────────────────────────────────┤
//! │           Cursor (shared state)           │
//! ├───────────────────────────────────────────┤
//! │       Store (<base>.index / .data)        │
//! ├───────────────────────────────────────────┤
//! │     BlockMap (pinned mmap windows)        │
//! └───────────────────────────────────────────┘
//! ```
//!
//! Records live in the data file, packed back to back inside fixed-size
//! blocks; a record never crosses a block boundary (the unused tail becomes
//! a padding entry). The index file maps each sequence number to a 4-byte
//! slot; writing that slot with release semantics is what commits a record,
//! and readers acquire-load it to observe the record without locking.
//!
//! ## Durability
//!
//! By default the OS decides when pages reach disk. With
//! `synchronous_mode`, `finish()` msyncs the data block and then the index
//! block, so a record whose slot survives a crash has its bytes on disk
//! too. Either way, reopening a store recovers the last committed sequence
//! number from the file contents alone.
//!
//! ## Module Overview
//!
//! - [`block_map`]: mapped block windows with pinning and eviction
//! - [`store`]: the store itself, recovery, cursors
//! - [`appender`] / [`tailer`] / [`excerpt`]: the three cursor types
//! - [`pool`]: refcounted pool of stores for time-rolled sequences
//! - [`config`]: geometry and behavior knobs
//!
//! ## Byte Order
//!
//! All on-disk integers are native-endian; a store is not portable across
//! architectures with different byte order.

pub mod appender;
pub mod block_map;
pub mod config;
mod cursor;
pub mod error;
pub mod excerpt;
pub mod pool;
pub mod store;
pub mod tailer;

pub use appender::Appender;
pub use block_map::{Block, BlockMap};
pub use config::{
    StoreConfig, DEFAULT_CACHE_LINE_SIZE, DEFAULT_DATA_BLOCK_SIZE, DEFAULT_INDEX_BLOCK_SIZE,
    DEFAULT_MESSAGE_CAPACITY,
};
pub use error::{Error, Result};
pub use excerpt::Excerpt;
pub use pool::{
    Direction, NoopStoreFileListener, RollDetails, StoreFileListener, StorePool, StoreSupplier,
};
pub use store::Store;
pub use tailer::Tailer;
