//! The set of transactions awaiting a terminal outcome.

use crate::metrics;
use alloy::primitives::TxHash;
use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Transaction hashes with a live confirmation tracker.
///
/// Inserts and removals happen under one lock, and the pending gauge is set
/// while that lock is held, so the gauge never lags behind a concurrent
/// update.
#[derive(Debug, Default)]
pub struct PendingSet {
    inner: Mutex<HashSet<TxHash>>,
}

impl PendingSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<TxHash>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a hash. Returns `false` if it was already present.
    pub fn insert(&self, tx_hash: TxHash) -> bool {
        let mut set = self.lock();
        let inserted = set.insert(tx_hash);
        metrics::tx_pending().set(set.len() as f64);
        inserted
    }

    /// Remove a hash. Returns `false` if it was not present.
    pub fn remove(&self, tx_hash: &TxHash) -> bool {
        let mut set = self.lock();
        let removed = set.remove(tx_hash);
        metrics::tx_pending().set(set.len() as f64);
        removed
    }

    /// True if the hash is awaiting confirmation.
    pub fn contains(&self, tx_hash: &TxHash) -> bool {
        self.lock().contains(tx_hash)
    }

    /// Number of transactions awaiting confirmation.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing is awaiting confirmation.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
