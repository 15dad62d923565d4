//! Insert-once nullifier registry.
//!
//! The registry is the only cross-escrow atomicity primitive: when two
//! withdrawals race on overlapping secrets, whichever inserts first wins and
//! the other observes [`NullifierError::AlreadyUsed`]. Entries are never
//! removed.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::{Nullifier, NullifierError, Result};

/// A linearizable set of consumed nullifiers.
///
/// Share it between escrows with an `Arc`; every method takes `&self`.
#[derive(Debug, Default)]
pub struct NullifierRegistry {
    used: Mutex<HashSet<Nullifier>>,
}

impl NullifierRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // Mutations are a single insert or a pre-checked batch; a poisoned set is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashSet<Nullifier>> {
        self.used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `nullifier` has been recorded.
    pub fn contains(&self, nullifier: &Nullifier) -> bool {
        self.lock().contains(nullifier)
    }

    /// Record `nullifier`.
    ///
    /// # Errors
    ///
    /// - [`NullifierError::AlreadyUsed`] if it is already present
    pub fn insert(&self, nullifier: Nullifier) -> Result<()> {
        if !self.lock().insert(nullifier) {
            return Err(NullifierError::AlreadyUsed(nullifier));
        }
        debug!(nullifier = %hex::encode(nullifier), "nullifier recorded");
        Ok(())
    }

    /// Record every nullifier in `batch`, or none of them.
    ///
    /// # Errors
    ///
    /// - [`NullifierError::AlreadyUsed`] naming the first nullifier that is
    ///   already present or repeated within the batch; nothing is inserted
    pub fn insert_all(&self, batch: &[Nullifier]) -> Result<()> {
        let mut used = self.lock();

        let mut seen = HashSet::with_capacity(batch.len());
        for nullifier in batch {
            if used.contains(nullifier) || !seen.insert(*nullifier) {
                return Err(NullifierError::AlreadyUsed(*nullifier));
            }
        }

        used.extend(batch.iter().copied());
        debug!(count = batch.len(), "nullifier batch recorded");
        Ok(())
    }

    /// Number of recorded nullifiers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
