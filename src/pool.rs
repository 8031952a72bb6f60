//! # Store Pool
//!
//! Refcounted pool of stores for a time-rolled sequence of logs. The pool
//! keys stores by `(cycle, epoch)`, reserves an existing entry on acquire,
//! and asks a [`StoreSupplier`] to open or create the store on a miss. The
//! supplier owns naming and rolling policy; the pool owns lifecycle: when
//! the last reference to a cycle is released, the store is closed and the
//! [`StoreFileListener`] is told its file is no longer in use.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::store::Store;

/// Direction of cycle traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Identity of one store within a rolled sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RollDetails {
    pub cycle: i64,
    pub epoch: i64,
}

/// Opens and enumerates per-cycle stores on behalf of the pool.
pub trait StoreSupplier: Send + Sync {
    /// Opens the store for `cycle`, creating it when `create_if_absent`;
    /// `None` when the cycle does not exist and creation was not requested.
    fn acquire(&self, cycle: i64, create_if_absent: bool) -> Result<Option<Arc<Store>>>;

    /// The nearest populated cycle after (or before) `current`.
    fn next_cycle(&self, current: i64, direction: Direction) -> Result<Option<i64>>;

    /// Populated cycles in `lo..=hi`, sorted.
    fn cycles(&self, lo: i64, hi: i64) -> Result<BTreeSet<i64>>;
}

/// Notifications when the pool starts and stops using a store's files.
pub trait StoreFileListener: Send + Sync {
    fn on_acquired(&self, _cycle: i64, _file: &Path) {}
    fn on_released(&self, _cycle: i64, _file: &Path) {}
}

/// Listener that ignores every notification.
pub struct NoopStoreFileListener;

impl StoreFileListener for NoopStoreFileListener {}

struct PoolEntry {
    store: Arc<Store>,
    refs: usize,
}

pub struct StorePool {
    supplier: Box<dyn StoreSupplier>,
    listener: Box<dyn StoreFileListener>,
    epoch: i64,
    stores: Mutex<HashMap<RollDetails, PoolEntry>>,
    closed: AtomicBool,
}

impl StorePool {
    pub fn new(
        supplier: Box<dyn StoreSupplier>,
        epoch: i64,
        listener: Box<dyn StoreFileListener>,
    ) -> Self {
        Self {
            supplier,
            listener,
            epoch,
            stores: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    /// Returns the pooled store for `cycle`, reserving it. Every successful
    /// acquire must be paired with a [`StorePool::release`].
    pub fn acquire(&self, cycle: i64, create_if_absent: bool) -> Result<Option<Arc<Store>>> {
        self.check_open()?;
        let key = RollDetails {
            cycle,
            epoch: self.epoch,
        };

        let mut stores = self.stores.lock();
        if let Some(entry) = stores.get_mut(&key) {
            entry.refs += 1;
            return Ok(Some(entry.store.clone()));
        }

        let Some(store) = self.supplier.acquire(cycle, create_if_absent)? else {
            return Ok(None);
        };
        self.listener.on_acquired(cycle, store.base_path());
        stores.insert(
            key,
            PoolEntry {
                store: store.clone(),
                refs: 1,
            },
        );
        Ok(Some(store))
    }

    /// Drops one reservation of `store`. On the last release the store is
    /// closed and the listener notified.
    pub fn release(&self, store: &Arc<Store>) -> Result<()> {
        let mut stores = self.stores.lock();
        let mut found = None;
        for (key, entry) in stores.iter_mut() {
            if Arc::ptr_eq(&entry.store, store) {
                entry.refs -= 1;
                found = Some((*key, entry.refs));
                break;
            }
        }

        match found {
            None => {
                warn!(
                    base = %store.base_path().display(),
                    "released store was not registered in the pool"
                );
                Ok(())
            }
            Some((key, 0)) => {
                if let Some(entry) = stores.remove(&key) {
                    drop(stores);
                    entry.store.close()?;
                    self.listener.on_released(key.cycle, entry.store.base_path());
                }
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    /// The nearest populated cycle after (or before) `current`.
    pub fn next_cycle(&self, current: i64, direction: Direction) -> Result<Option<i64>> {
        self.check_open()?;
        self.supplier.next_cycle(current, direction)
    }

    /// Populated cycles in `lo..=hi`, sorted.
    pub fn cycles_between(&self, lo: i64, hi: i64) -> Result<BTreeSet<i64>> {
        self.check_open()?;
        self.supplier.cycles(lo, hi)
    }

    /// Closes every pooled store regardless of outstanding reservations and
    /// marks the pool closed. Closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let entries: Vec<_> = self.stores.lock().drain().collect();
        let mut first_err = None;
        for (key, entry) in entries {
            match entry.store.close() {
                Ok(()) => self.listener.on_released(key.cycle, entry.store.base_path()),
                Err(e) => first_err = first_err.or(Some(e)),
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}
