// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-running predicate consulted by background workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Answers "should background work continue?".
///
/// When `is_ok` turns false, registration refresh stops and workers exit at
/// their next wake-up.
pub trait ProcessLifecycle: Send + Sync {
    /// True while the process is running normally.
    fn is_ok(&self) -> bool;
}

/// Lifecycle that never stops.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRunning;

impl ProcessLifecycle for AlwaysRunning {
    fn is_ok(&self) -> bool {
        true
    }
}

/// Lifecycle backed by an atomic flag, cleared by [`RunFlag::stop`].
#[derive(Debug)]
pub struct RunFlag {
    running: AtomicBool,
}

impl RunFlag {
    /// New flag in the running state.
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
        }
    }

    /// Request all gated workers to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLifecycle for RunFlag {
    fn is_ok(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Join a worker thread, unless the caller is that worker.
///
/// Disposal may run on a worker thread (e.g. a callback dropping its own
/// subscriber); joining there would deadlock, so the thread is left to finish
/// on its own.
pub(crate) fn join_unless_current(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    let name = handle.thread().name().unwrap_or("worker").to_string();
    if handle.join().is_err() {
        log::error!("[Lifecycle] worker '{}' panicked", name);
    }
}
