//! Best-effort per-record lock built on a store marker.
//!
//! The marker holds the absolute expiry of the lock in microseconds since the
//! epoch. A writer that outlives its expiry silently loses exclusivity.

use std::thread;

use chrono::Utc;
use tracing::{debug, trace, warn};

use crate::config::LockSettings;
use crate::database::Database;
use crate::error::{ModelplusError, Result};
use crate::key::Key;

pub const LOCK: &str = "_lock";

pub struct Mutex {
    db: Database,
    key: Key,
    settings: LockSettings,
}

impl Mutex {
    /// `record_key` is the `<Namespace>:<id>` of the record being guarded.
    pub fn new(db: Database, record_key: Key, settings: LockSettings) -> Self {
        Self {
            db,
            key: record_key.child(LOCK),
            settings,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Retries until the marker is absent or expired and our conditional write
    /// wins, giving up after `max_attempts`.
    pub fn lock(&self) -> Result<MutexGuard<'_>> {
        let store = self.db.store();
        let ttl = self.settings.ttl().as_micros() as i64;
        for attempt in 1..=self.settings.max_attempts {
            let now = Utc::now().timestamp_micros();
            let observed = store.get_marker(&self.key)?;
            // an unreadable marker counts as expired
            let live = observed
                .as_deref()
                .and_then(|m| m.parse::<i64>().ok())
                .is_some_and(|expiry| expiry > now);
            if !live {
                let expiry = (now + ttl).to_string();
                if store.swap_marker(&self.key, observed.as_deref(), &expiry)? {
                    debug!(key = %self.key, attempt, "lock acquired");
                    return Ok(MutexGuard {
                        mutex: self,
                        released: false,
                    });
                }
                trace!(key = %self.key, attempt, "lost the race for the lock");
            } else {
                trace!(key = %self.key, attempt, "lock is held");
            }
            if attempt < self.settings.max_attempts {
                thread::sleep(self.settings.retry_interval());
            }
        }
        warn!(key = %self.key, attempts = self.settings.max_attempts, "giving up on lock");
        Err(ModelplusError::LockTimeout {
            key: self.key.to_string(),
            attempts: self.settings.max_attempts,
        })
    }

    /// Deletes the marker whoever holds it.
    pub fn unlock(&self) -> Result<()> {
        self.db.store().delete_marker(&self.key)?;
        debug!(key = %self.key, "lock released");
        Ok(())
    }

    pub fn is_locked(&self) -> Result<bool> {
        let now = Utc::now().timestamp_micros();
        Ok(self
            .db
            .store()
            .get_marker(&self.key)?
            .and_then(|m| m.parse::<i64>().ok())
            .is_some_and(|expiry| expiry > now))
    }

    /// Runs `critical` while holding the lock.
    pub fn with_lock<T>(&self, critical: impl FnOnce() -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let outcome = critical();
        guard.release()?;
        outcome
    }
}

/// Unlocks when dropped.
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
    released: bool,
}

impl MutexGuard<'_> {
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.mutex.unlock()
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.mutex.unlock() {
            warn!(key = %self.mutex.key, error = %e, "could not release lock");
        }
    }
}
