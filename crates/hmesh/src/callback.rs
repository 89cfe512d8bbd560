// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-handler callback slot.
//!
//! Every receive or event callback in hmesh lives in a [`CallbackSlot`]:
//!
//! - at most one handler is installed; `set` replaces it atomically
//! - invocations through one slot are serialized
//! - a handler panic is caught and logged, the invoking worker survives
//! - `clear`/`close` wait for an in-flight invocation to finish, unless they
//!   are called from inside that invocation
//!
//! After `close` the slot ignores `set` and never invokes again.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

// Handler and closed flag change together, so a `set` racing `close` can
// never leave a handler behind.
struct Installed<F: ?Sized> {
    handler: Option<Arc<F>>,
    closed: bool,
}

pub(crate) struct CallbackSlot<F: ?Sized> {
    installed: Mutex<Installed<F>>,
    exec: Mutex<()>,
    running_on: Mutex<Option<ThreadId>>,
}

impl<F: ?Sized> CallbackSlot<F> {
    pub(crate) fn new() -> Self {
        Self {
            installed: Mutex::new(Installed {
                handler: None,
                closed: false,
            }),
            exec: Mutex::new(()),
            running_on: Mutex::new(None),
        }
    }

    /// Install or replace the handler. Returns false once the slot is closed.
    pub(crate) fn set(&self, handler: Arc<F>) -> bool {
        let mut installed = self.installed.lock();
        if installed.closed {
            return false;
        }
        installed.handler = Some(handler);
        true
    }

    /// Detach the handler and wait for a running invocation to return.
    pub(crate) fn clear(&self) {
        self.installed.lock().handler.take();
        self.wait_idle();
    }

    /// Detach for good.
    pub(crate) fn close(&self) {
        {
            let mut installed = self.installed.lock();
            installed.closed = true;
            installed.handler.take();
        }
        self.wait_idle();
    }

    #[cfg(test)]
    pub(crate) fn is_set(&self) -> bool {
        self.installed.lock().handler.is_some()
    }

    fn wait_idle(&self) {
        if *self.running_on.lock() == Some(thread::current().id()) {
            return;
        }
        drop(self.exec.lock());
    }

    /// Run `call` with the current handler. Returns false if nothing ran.
    pub(crate) fn invoke(&self, call: impl FnOnce(&F)) -> bool {
        let _exec = self.exec.lock();
        let handler = {
            let installed = self.installed.lock();
            match &installed.handler {
                Some(handler) if !installed.closed => handler.clone(),
                _ => return false,
            }
        };

        *self.running_on.lock() = Some(thread::current().id());
        let outcome = catch_unwind(AssertUnwindSafe(|| call(&handler)));
        *self.running_on.lock() = None;

        if outcome.is_err() {
            log::error!("[CallbackSlot] handler panicked, worker continues");
        }
        true
    }
}

impl<F: ?Sized> Default for CallbackSlot<F> {
    fn default() -> Self {
        Self::new()
    }
}
