// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Diagnostic sink for conditions that are not errors of the calling API.
//!
//! Carrier failures, expiries, dropped messages and call timeouts are surfaced
//! here instead of as `Err` values. The default [`LogSink`] forwards to the
//! `log` facade; tests inject a collecting sink.

use crate::core::{EntityId, ServiceId, TopicId};
use crate::transport::TransportLayer;
use std::fmt;

/// One diagnostic condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// A carrier failed to initialize or reported a failure.
    LayerUnavailable {
        /// Affected carrier.
        layer: TransportLayer,
        /// Failure description.
        reason: String,
    },
    /// A previously failed carrier is usable again.
    LayerRecovered {
        /// Affected carrier.
        layer: TransportLayer,
    },
    /// A remote topic endpoint was not refreshed in time.
    TopicExpired {
        /// Expired endpoint.
        topic: TopicId,
    },
    /// A remote service instance was not refreshed in time.
    ServiceExpired {
        /// Expired instance.
        service: ServiceId,
    },
    /// A subscriber detected a send-clock gap.
    MessagesDropped {
        /// Receiving subscriber.
        subscriber: TopicId,
        /// Sending publisher.
        publisher: EntityId,
        /// Number of missing samples.
        count: u64,
    },
    /// A hand-off to one subscriber inbox failed.
    SendFailed {
        /// Sending publisher.
        publisher: TopicId,
        /// Carrier used.
        layer: TransportLayer,
        /// Failure description.
        reason: String,
    },
    /// A server did not answer a call in time.
    CallTimeout {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
        /// Server that timed out.
        server: ServiceId,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::LayerUnavailable { layer, reason } => {
                write!(f, "layer {} unavailable: {}", layer, reason)
            }
            Diagnostic::LayerRecovered { layer } => write!(f, "layer {} recovered", layer),
            Diagnostic::TopicExpired { topic } => write!(f, "topic endpoint {} expired", topic),
            Diagnostic::ServiceExpired { service } => {
                write!(f, "service instance {} expired", service)
            }
            Diagnostic::MessagesDropped {
                subscriber,
                publisher,
                count,
            } => write!(
                f,
                "{} lost {} message(s) from publisher {}",
                subscriber, count, publisher
            ),
            Diagnostic::SendFailed {
                publisher,
                layer,
                reason,
            } => write!(f, "{} send over {} failed: {}", publisher, layer, reason),
            Diagnostic::CallTimeout {
                service,
                method,
                server,
            } => write!(f, "call {}::{} to {} timed out", service, method, server),
        }
    }
}

/// Receiver of [`Diagnostic`] events.
///
/// Called from worker threads and from `send`; implementations must be cheap
/// and must not call back into the registry.
pub trait DiagnosticSink: Send + Sync {
    /// Report one condition.
    fn report(&self, diagnostic: Diagnostic);
}

/// Default sink: forwards to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::LayerRecovered { .. }
            | Diagnostic::TopicExpired { .. }
            | Diagnostic::ServiceExpired { .. } => log::info!("[Diagnostics] {}", diagnostic),
            Diagnostic::MessagesDropped { .. } | Diagnostic::CallTimeout { .. } => {
                log::debug!("[Diagnostics] {}", diagnostic)
            }
            Diagnostic::LayerUnavailable { .. } | Diagnostic::SendFailed { .. } => {
                log::warn!("[Diagnostics] {}", diagnostic)
            }
        }
    }
}

/// Sink that records everything, for inspection in tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: parking_lot::Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded diagnostics.
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.lock().clone()
    }

    /// Number of recorded diagnostics matching `pred`.
    pub fn count(&self, pred: impl Fn(&Diagnostic) -> bool) -> usize {
        self.events.lock().iter().filter(|d| pred(d)).count()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.events.lock().push(diagnostic);
    }
}
