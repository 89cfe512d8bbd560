// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fan-out of one logical call and collection of the answers.
//!
//! Every dispatched request carries a clone of one reply sender; the
//! aggregator keeps only the receiver. The call therefore ends on the first of:
//!
//! - every dispatched server answered
//! - every remaining server went away (all reply senders dropped)
//! - the deadline passed
//! - the caller cancelled
//!
//! Dropping the aggregator drops the receiver, so late answers fail to send
//! and are discarded on the server side.

use super::types::{RequestEnvelope, ServiceResponse};
use crate::core::{EntityId, ServiceId};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::registry::Registry;
use crossbeam::channel::{at, never, select, unbounded, Receiver};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why collection stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CallEnd {
    /// Still collecting.
    Open,
    /// Every dispatched server answered.
    Complete,
    /// Remaining servers dropped the request.
    ServersGone,
    /// Deadline passed.
    TimedOut,
    /// Caller cancelled.
    Cancelled,
}

enum Step {
    Reply(ServiceResponse),
    Gone,
    Deadline,
    Cancel,
}

pub(crate) struct CallAggregator {
    service_name: String,
    method: String,
    replies: Receiver<ServiceResponse>,
    pending: BTreeMap<EntityId, Arc<ServiceId>>,
    deadline: Option<Instant>,
    end: CallEnd,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl CallAggregator {
    /// Send `request` to every reachable server. `None` waits without a deadline.
    pub fn dispatch(
        registry: &Registry,
        servers: &[Arc<ServiceId>],
        method: &str,
        request: &[u8],
        timeout: Option<Duration>,
    ) -> Self {
        let deadline = timeout.map(|t| Instant::now() + t);
        let (reply_tx, replies) = unbounded();
        let payload: Arc<[u8]> = Arc::from(request);

        let mut pending = BTreeMap::new();
        for server in servers {
            let Some(queue) = registry.server_queue(server.entity_id) else {
                log::debug!("[CallAggregator] server {} unreachable", server);
                continue;
            };
            let envelope = RequestEnvelope {
                method: method.to_string(),
                payload: payload.clone(),
                reply: reply_tx.clone(),
                deadline,
            };
            if queue.send(envelope).is_ok() {
                pending.insert(server.entity_id, server.clone());
            }
        }
        // Only the envelopes hold reply senders from here on.
        drop(reply_tx);

        let service_name = servers
            .first()
            .map(|s| s.service_name.clone())
            .unwrap_or_default();
        let end = if pending.is_empty() {
            CallEnd::Complete
        } else {
            CallEnd::Open
        };
        Self {
            service_name,
            method: method.to_string(),
            replies,
            pending,
            deadline,
            end,
            diagnostics: registry.diagnostics().clone(),
        }
    }

    /// Number of servers still expected to answer.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn end(&self) -> CallEnd {
        self.end
    }

    /// Next in-time response, or `None` once the call is over.
    pub fn next_response(&mut self, cancel: &Receiver<()>) -> Option<ServiceResponse> {
        let replies = self.replies.clone();
        while self.end == CallEnd::Open {
            let timer = self.deadline.map_or_else(never, at);
            let step = select! {
                recv(replies) -> reply => reply.map_or(Step::Gone, Step::Reply),
                recv(timer) -> _ => Step::Deadline,
                recv(cancel) -> _ => Step::Cancel,
            };
            match step {
                Step::Reply(response) => {
                    if self.pending.remove(&response.server_id.entity_id).is_none() {
                        continue;
                    }
                    if self.pending.is_empty() {
                        self.end = CallEnd::Complete;
                    }
                    return Some(response);
                }
                Step::Gone => self.end = CallEnd::ServersGone,
                Step::Deadline => self.close_timed_out(),
                Step::Cancel => self.end = CallEnd::Cancelled,
            }
        }
        None
    }

    /// Collect every in-time response.
    pub fn collect(mut self, cancel: &Receiver<()>) -> Vec<ServiceResponse> {
        let mut responses = Vec::with_capacity(self.pending.len());
        while let Some(response) = self.next_response(cancel) {
            responses.push(response);
        }
        responses
    }

    fn close_timed_out(&mut self) {
        self.end = CallEnd::TimedOut;
        for server in self.pending.values() {
            self.diagnostics.report(Diagnostic::CallTimeout {
                service: self.service_name.clone(),
                method: self.method.clone(),
                server: (**server).clone(),
            });
        }
    }
}
