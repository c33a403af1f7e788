// src/dedup.rs
//! Dedup index: "has this mention already been recorded?"
//!
//! Lookups go straight to the platform table by permalink. Writers take a
//! per-key lock around check-then-insert so two concurrent fetch cycles can
//! never both decide the same permalink is new.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::Platform;
use crate::store::MentionStore;

/// Prune dead lock entries once the map grows past this size.
const PRUNE_AT: usize = 1024;

#[derive(Clone)]
pub struct DedupIndex {
    store: MentionStore,
    locks: Arc<KeyedLocks>,
}

impl DedupIndex {
    pub fn new(store: MentionStore) -> Self {
        Self {
            store,
            locks: Arc::new(KeyedLocks::default()),
        }
    }

    /// `true` when `key` is already stored for `platform`.
    ///
    /// Fails open: a lookup error is logged and reported as "not seen", the
    /// unique index catches the duplicate at insert time.
    pub async fn exists(&self, platform: Platform, key: &str) -> bool {
        match self.store.mention_exists(platform, key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(%platform, key, error = %e, "dedup lookup failed; re-checking at insert");
                false
            }
        }
    }

    /// Exclusive writer slot for one `(platform, key)`; held across check and insert.
    pub async fn lock(&self, platform: Platform, key: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(format!("{platform}:{key}")).await
    }
}

/// Lazily created per-key async mutexes. Entries are held weakly and dropped
/// once no writer references them.
#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub async fn lock(&self, key: String) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            if map.len() >= PRUNE_AT {
                map.retain(|_, w| w.strong_count() > 0);
            }
            match map.get(&key).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let fresh = Arc::new(AsyncMutex::new(()));
                    map.insert(key, Arc::downgrade(&fresh));
                    fresh
                }
            }
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
