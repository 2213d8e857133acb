// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::logger::{extract_guard, IncMetric, METRICS};
use crate::timer::{Scheduler, TimerHandle};

/// Errors associated with the migration phase controller.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum PhaseError {
    /// The pre-copy timer is already armed
    TimerAlreadyArmed,
    /// Failed to arm the pre-copy timer: {0}
    Timer(io::Error),
}

/// Migration phase of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Memory is still pushed to the peer while the guest runs.
    PreCopy,
    /// Ownership has been handed off. Remaining pages move on fault.
    PostCopy,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PreCopy => write!(f, "pre-copy"),
            Phase::PostCopy => write!(f, "post-copy"),
        }
    }
}

/// Two-state pre-copy/post-copy machine with a one-shot readiness timer.
///
/// The timer only reports that the pre-copy budget is spent. Moving to post-copy is always
/// an explicit [`MigrationPhase::enter_post_copy`] call.
#[derive(Debug)]
pub struct MigrationPhase {
    post_copy: AtomicBool,
    timer_armed: AtomicBool,
    timer_expired: AtomicBool,
    // Only touched by the expiry path and by waiters.
    expired_lock: Mutex<bool>,
    expired_cond: Condvar,
}

impl MigrationPhase {
    /// Creates a controller in pre-copy with no timer armed.
    pub fn new() -> Arc<Self> {
        Arc::new(MigrationPhase {
            post_copy: AtomicBool::new(false),
            timer_armed: AtomicBool::new(false),
            timer_expired: AtomicBool::new(false),
            expired_lock: Mutex::new(false),
            expired_cond: Condvar::new(),
        })
    }

    /// Arms the pre-copy timer on `scheduler`. Only one timer can be armed at a time.
    pub fn start_timer(
        self: &Arc<Self>,
        scheduler: &dyn Scheduler,
        duration: Duration,
    ) -> Result<TimerHandle, PhaseError> {
        if self
            .timer_armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PhaseError::TimerAlreadyArmed);
        }

        let phase = Arc::clone(self);
        let handle = scheduler
            .schedule_once(duration, Box::new(move || phase.on_timer_expired()))
            .map_err(|err| {
                self.timer_armed.store(false, Ordering::Release);
                PhaseError::Timer(err)
            })?;
        info!("Pre-copy timer armed for {} ms", duration.as_millis());
        Ok(handle)
    }

    /// Cancels an armed timer so a new one can be started.
    pub fn cancel_timer(&self, scheduler: &dyn Scheduler, handle: &TimerHandle) {
        scheduler.cancel(handle);
        self.timer_armed.store(false, Ordering::Release);
        debug!("Pre-copy timer cancelled");
    }

    /// Expiry callback. Only the first call has an effect.
    pub fn on_timer_expired(&self) {
        self.timer_armed.store(false, Ordering::Release);
        if self.timer_expired.swap(true, Ordering::AcqRel) {
            return;
        }
        METRICS.phase.timer_expirations.inc();
        info!("Pre-copy timer expired");

        let mut expired = extract_guard(self.expired_lock.lock());
        *expired = true;
        self.expired_cond.notify_all();
    }

    /// Whether the pre-copy budget is spent.
    pub fn is_timer_expired(&self) -> bool {
        self.timer_expired.load(Ordering::Acquire)
    }

    /// Whether a timer is currently armed.
    pub fn is_timer_armed(&self) -> bool {
        self.timer_armed.load(Ordering::Acquire)
    }

    /// Blocks until the timer expires or `timeout` elapses. Returns whether it expired.
    ///
    /// A timeout too large to be represented as a deadline, such as [`Duration::MAX`],
    /// waits without a deadline.
    pub fn wait_timer_expired(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut expired = extract_guard(self.expired_lock.lock());
        while !*expired {
            expired = match deadline {
                None => extract_guard(self.expired_cond.wait(expired)),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    extract_guard(self.expired_cond.wait_timeout(expired, deadline - now)).0
                }
            };
        }
        true
    }

    /// Moves the session to post-copy. There is no way back.
    pub fn enter_post_copy(&self) {
        if !self.post_copy.swap(true, Ordering::AcqRel) {
            METRICS.phase.post_copy_entries.inc();
            info!("Entering post-copy");
        }
    }

    /// Whether the session is still in pre-copy.
    pub fn is_pre_copy(&self) -> bool {
        !self.post_copy.load(Ordering::Acquire)
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        match self.is_pre_copy() {
            true => Phase::PreCopy,
            false => Phase::PostCopy,
        }
    }
}
