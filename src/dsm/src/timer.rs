// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};
use timerfd::{ClockId, SetTimeFlags, TimerFd, TimerState};
use vmm_sys_util::epoll::{ControlOperation, Epoll, EpollEvent, EventSet};
use vmm_sys_util::eventfd::EventFd;

use crate::logger::extract_guard;

/// Callback run once when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Wraps a scheduler-specific id.
    pub fn new(id: u64) -> Self {
        TimerHandle(id)
    }

    /// The scheduler-specific id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Provider of delayed one-shot callbacks.
pub trait Scheduler: Send + Sync {
    /// Runs `callback` once, `delay` from now, on a thread owned by the scheduler.
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> io::Result<TimerHandle>;

    /// Prevents a pending callback from running. A timer that already fired is left alone.
    fn cancel(&self, handle: &TimerHandle);
}

const TIMER_TOKEN: u64 = 0;
const CANCEL_TOKEN: u64 = 1;

type PendingTimers = Arc<Mutex<HashMap<u64, Arc<EventFd>>>>;

/// [`Scheduler`] backed by one timerfd and one detached worker thread per timer.
///
/// The worker sleeps in epoll on the timerfd and on a cancel eventfd. A timer counts as
/// cancelled once it is gone from the pending map, so firing and cancelling never both win.
#[derive(Debug, Default)]
pub struct TimerFdScheduler {
    next_id: AtomicU64,
    pending: PendingTimers,
}

impl TimerFdScheduler {
    /// Creates a scheduler with no pending timers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers that neither fired nor got cancelled yet.
    pub fn pending(&self) -> usize {
        extract_guard(self.pending.lock()).len()
    }
}

impl Scheduler for TimerFdScheduler {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> io::Result<TimerHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut timer_fd = TimerFd::new_custom(ClockId::Monotonic, true, true)?;
        // A zero duration would disarm the timer.
        let delay = delay.max(Duration::from_nanos(1));
        timer_fd.set_state(TimerState::Oneshot(delay), SetTimeFlags::Default);

        let cancel_evt = Arc::new(EventFd::new(libc::EFD_NONBLOCK)?);
        let epoll = Epoll::new()?;
        epoll.ctl(
            ControlOperation::Add,
            timer_fd.as_raw_fd(),
            EpollEvent::new(EventSet::IN, TIMER_TOKEN),
        )?;
        epoll.ctl(
            ControlOperation::Add,
            cancel_evt.as_raw_fd(),
            EpollEvent::new(EventSet::IN, CANCEL_TOKEN),
        )?;

        extract_guard(self.pending.lock()).insert(id, cancel_evt);

        let pending = self.pending.clone();
        let spawned = thread::Builder::new()
            .name(String::from("dsm_mig_timer"))
            .spawn(move || run_timer(id, timer_fd, epoll, pending, callback));
        if let Err(err) = spawned {
            extract_guard(self.pending.lock()).remove(&id);
            return Err(err);
        }

        debug!("Armed timer {id} for {delay:?}");
        Ok(TimerHandle(id))
    }

    fn cancel(&self, handle: &TimerHandle) {
        let removed = extract_guard(self.pending.lock()).remove(&handle.0);
        if let Some(cancel_evt) = removed {
            debug!("Cancelling timer {}", handle.0);
            if let Err(err) = cancel_evt.write(1) {
                // The worker still exits without calling back once the timer fires.
                warn!("Failed to wake timer {}: {err}", handle.0);
            }
        }
    }
}

fn run_timer(
    id: u64,
    timer_fd: TimerFd,
    epoll: Epoll,
    pending: PendingTimers,
    callback: TimerCallback,
) {
    let mut events = [EpollEvent::default(); 2];
    loop {
        match epoll.wait(-1, &mut events[..]) {
            Ok(_) => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                error!("Timer {id} stopped waiting: {err}");
                extract_guard(pending.lock()).remove(&id);
                return;
            }
        }
    }

    // Whoever takes the entry out of the map decides the outcome.
    let fired = extract_guard(pending.lock()).remove(&id).is_some();
    if fired {
        timer_fd.read();
        callback();
    }
}
