//! Process-wide bandwidth budget.
//!
//! A token bucket shared by every worker. Its capacity is one chunk and it
//! refills continuously at the configured rate, so over any window of length
//! `T` at most `rate * T + chunk` bytes are withdrawn. Withdrawals are
//! serialized under one lock.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;

/// Longest single wait before cancellation is re-checked.
const MAX_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct BudgetState {
    tokens: f64,
    last_refill: Instant,
    active_workers: usize,
    consumed: u64,
}

/// Shared token bucket plus the active-worker gauge.
#[derive(Debug)]
pub struct TransferBudget {
    rate: Option<u64>,
    capacity: f64,
    state: Mutex<BudgetState>,
    changed: Condvar,
}

impl TransferBudget {
    /// Create a budget for `rate` bytes per second (`None` for unlimited).
    ///
    /// The bucket starts full.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(rate: Option<u64>, chunk_size: usize) -> Self {
        let capacity = chunk_size.max(1) as f64;
        Self {
            rate: rate.filter(|r| *r > 0),
            capacity,
            state: Mutex::new(BudgetState {
                tokens: capacity,
                last_refill: Instant::now(),
                active_workers: 0,
                consumed: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// An unlimited budget.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(None, 1)
    }

    /// Configured ceiling in bytes per second.
    #[must_use]
    pub const fn rate(&self) -> Option<u64> {
        self.rate
    }

    fn state(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `bytes` tokens are withdrawn.
    ///
    /// Returns `false` if `cancel` fired while waiting, in which case nothing
    /// was withdrawn.
    pub fn acquire(&self, bytes: usize, cancel: &CancelToken) -> bool {
        let mut state = self.state();
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            match self.withdraw_locked(&mut state, bytes, Instant::now()) {
                Ok(()) => return true,
                Err(wait) => {
                    log::trace!("Bandwidth budget exhausted, waiting {wait:?}");
                    state = self
                        .changed
                        .wait_timeout(state, wait.min(MAX_WAIT))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Withdraw `bytes` at time `now` without blocking.
    ///
    /// # Errors
    ///
    /// * How long to wait before the withdrawal can succeed
    pub fn try_withdraw(&self, bytes: usize, now: Instant) -> Result<(), Duration> {
        let mut state = self.state();
        self.withdraw_locked(&mut state, bytes, now)
    }

    #[allow(clippy::cast_precision_loss)]
    fn withdraw_locked(
        &self,
        state: &mut BudgetState,
        bytes: usize,
        now: Instant,
    ) -> Result<(), Duration> {
        let Some(rate) = self.rate else {
            state.consumed += bytes as u64;
            return Ok(());
        };
        let rate = rate as f64;

        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = elapsed
            .as_secs_f64()
            .mul_add(rate, state.tokens)
            .min(self.capacity);
        state.last_refill = state.last_refill.max(now);

        // A chunk larger than the bucket may go through once the bucket is full.
        let needed = (bytes as f64).min(self.capacity);
        if state.tokens + f64::EPSILON >= needed {
            state.tokens -= bytes as f64;
            state.consumed += bytes as u64;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((needed - state.tokens) / rate))
        }
    }

    /// Register an active worker for the lifetime of the returned guard.
    #[must_use]
    pub fn enter(&self) -> ActiveWorker<'_> {
        self.state().active_workers += 1;
        ActiveWorker { budget: self }
    }

    /// Workers currently holding an [`ActiveWorker`] guard.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.state().active_workers
    }

    /// Total bytes withdrawn so far.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.state().consumed
    }
}

/// Guard that counts a worker as active until dropped.
#[derive(Debug)]
pub struct ActiveWorker<'a> {
    budget: &'a TransferBudget,
}

impl Drop for ActiveWorker<'_> {
    fn drop(&mut self) {
        let mut state = self.budget.state();
        state.active_workers = state.active_workers.saturating_sub(1);
        drop(state);
        self.budget.changed.notify_all();
    }
}
