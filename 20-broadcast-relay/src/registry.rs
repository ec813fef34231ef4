//! The shared set of currently connected peers.
//!
//! Every runtime core keeps one [`Registry`] and hands it by reference (or
//! `Arc`) to whatever accepts, serves, or tears down connections. There is no
//! process-wide global: two relays in one process have two registries.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::peer::PeerId;

/// Live peers keyed by id, guarded by a single mutex.
///
/// `H` is whatever handle the broadcast engine needs to write to a peer. The
/// lock is only held for the map operation itself; callers take a
/// [`snapshot_excluding`](Registry::snapshot_excluding) and do their I/O after
/// the guard is gone.
pub struct Registry<H> {
    peers: Mutex<HashMap<PeerId, H>>,
}

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
        }
    }

    // A panic while holding the guard cannot leave the map half-updated, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, H>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `handle` under `id`.
    pub fn add(&self, id: PeerId, handle: H) {
        self.lock().insert(id, handle);
    }

    /// Inserts `handle` unless the registry already holds `limit` peers.
    ///
    /// The size check and the insert happen under one lock acquisition.
    /// Returns `false` (and drops `handle`) when the peer was refused.
    pub fn try_add(&self, id: PeerId, handle: H, limit: Option<usize>) -> bool {
        let mut peers = self.lock();
        if limit.is_some_and(|limit| peers.len() >= limit) {
            return false;
        }
        peers.insert(id, handle);
        true
    }

    /// Removes `id`, returning its handle. Removing an absent id is a no-op.
    pub fn remove(&self, id: PeerId) -> Option<H> {
        self.lock().remove(&id)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of every registered peer, sorted.
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<_> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl<H: Clone> Registry<H> {
    /// Clones the handle of every peer except `sender`.
    pub fn snapshot_excluding(&self, sender: PeerId) -> Vec<(PeerId, H)> {
        self.lock()
            .iter()
            .filter(|(id, _)| **id != sender)
            .map(|(id, handle)| (*id, handle.clone()))
            .collect()
    }
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}
