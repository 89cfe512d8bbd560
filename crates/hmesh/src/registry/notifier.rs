// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ordered event dispatch.
//!
//! The registry enqueues one job per event while it still holds its state
//! lock, so the queue order equals the transition order. A single worker
//! drains the queue, which keeps Connected-before-Disconnected per pair and
//! keeps user callbacks off the registry's locks.

use crate::error::{Error, Result};
use crate::lifecycle::join_unless_current;
use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct EventNotifier {
    tx: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventNotifier {
    pub(crate) fn start(name: &str) -> Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in rx.iter() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        log::error!("[EventNotifier] event job panicked");
                    }
                }
                log::trace!("[EventNotifier] queue closed, worker exiting");
            })
            .map_err(Error::WorkerSpawn)?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a job. Returns false when it was discarded after shutdown.
    pub(crate) fn enqueue(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let queued = match self.tx.lock().as_ref() {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        };
        if !queued {
            log::debug!("[EventNotifier] event job discarded after shutdown");
        }
        queued
    }

    /// Stop accepting jobs, drain the queue and join the worker.
    pub(crate) fn shutdown(&self) {
        self.tx.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            join_unless_current(worker);
        }
    }
}

impl Drop for EventNotifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn jobs_run_in_enqueue_order() {
        let notifier = EventNotifier::start("hmesh-notify-test").expect("spawn notifier");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = seen.clone();
            notifier.enqueue(move || seen.lock().push(i));
        }
        notifier.shutdown();
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_job_does_not_stop_worker() {
        let notifier = EventNotifier::start("hmesh-notify-test").expect("spawn notifier");
        let seen = Arc::new(Mutex::new(0));
        notifier.enqueue(|| panic!("job failure"));
        let s = seen.clone();
        assert!(notifier.enqueue(move || *s.lock() += 1));
        notifier.shutdown();
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn enqueue_after_shutdown_is_discarded() {
        let notifier = EventNotifier::start("hmesh-notify-test").expect("spawn notifier");
        notifier.shutdown();
        assert!(!notifier.enqueue(|| panic!("never runs")));
    }
}
