//! Per-user and global admission control for fetches.
//!
//! Admission is fail-fast: a caller either gets a slot in both its own pool and
//! the global pool right away, or gets an error and holds nothing.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::error::DownloadError;
use crate::core::config::limits::USER_POOL_PRUNE_THRESHOLD;

/// A held slot in both the user's pool and the global pool.
///
/// Dropping it releases both, on every exit path.
#[derive(Debug)]
pub struct GatePermit {
    user_id: i64,
    _user: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl GatePermit {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Releases both slots now.
    pub fn release(self) {
        drop(self);
    }
}

pub struct ConcurrencyGate {
    max_per_user: usize,
    max_global: usize,
    global: Arc<Semaphore>,
    users: DashMap<i64, Arc<Semaphore>>,
    /// Makes check-and-take atomic across both pools
    admission: Mutex<()>,
    prune_threshold: usize,
}

impl ConcurrencyGate {
    pub fn new(max_per_user: usize, max_global: usize) -> Self {
        Self::with_prune_threshold(max_per_user, max_global, USER_POOL_PRUNE_THRESHOLD)
    }

    /// Like [`ConcurrencyGate::new`] with a custom size at which idle user pools are pruned.
    pub fn with_prune_threshold(max_per_user: usize, max_global: usize, prune_threshold: usize) -> Self {
        Self {
            max_per_user,
            max_global,
            global: Arc::new(Semaphore::new(max_global)),
            users: DashMap::new(),
            admission: Mutex::new(()),
            prune_threshold,
        }
    }

    pub fn max_per_user(&self) -> usize {
        self.max_per_user
    }

    pub fn max_global(&self) -> usize {
        self.max_global
    }

    /// Takes one slot for `user_id`. Never waits.
    ///
    /// # Errors
    ///
    /// - `TooManyUserDownloads` if the user's pool is exhausted (checked first;
    ///   no global slot is consumed)
    /// - `ServerBusy` if the global pool is exhausted
    pub fn acquire(&self, user_id: i64) -> Result<GatePermit, DownloadError> {
        let _guard = match self.admission.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if self.users.len() > self.prune_threshold {
            self.prune_idle();
        }

        let user_pool = self
            .users
            .entry(user_id)
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_user)))
            .clone();

        let user_permit = user_pool
            .try_acquire_owned()
            .map_err(|_| DownloadError::TooManyUserDownloads {
                limit: self.max_per_user,
            })?;

        // On failure the user permit is dropped here, so nothing stays held
        let global_permit = Arc::clone(&self.global)
            .try_acquire_owned()
            .map_err(|_| DownloadError::ServerBusy)?;

        Ok(GatePermit {
            user_id,
            _user: user_permit,
            _global: global_permit,
        })
    }

    /// Drops user pools with no outstanding permits.
    ///
    /// A pool is idle when the map holds the only reference to it (permits keep
    /// their semaphore alive), so removing it cannot lose a held slot.
    pub fn prune_idle(&self) -> usize {
        let before = self.users.len();
        self.users.retain(|_, pool| Arc::strong_count(pool) > 1);
        let removed = before.saturating_sub(self.users.len());
        if removed > 0 {
            log::debug!("Pruned {} idle user pools", removed);
        }
        removed
    }

    /// Slots currently held across all users.
    pub fn active_global(&self) -> usize {
        self.max_global.saturating_sub(self.global.available_permits())
    }

    /// Slots currently held by one user.
    pub fn active_for(&self, user_id: i64) -> usize {
        self.users
            .get(&user_id)
            .map(|pool| self.max_per_user.saturating_sub(pool.available_permits()))
            .unwrap_or(0)
    }

    /// Number of user pools currently tracked.
    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}
