// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process carriers and carrier health.
//!
//! Each carrier models the delivery semantics of its real counterpart on top
//! of a bounded subscriber inbox:
//!
//! | Carrier        | Full inbox behavior                               |
//! |----------------|---------------------------------------------------|
//! | SharedMemory   | block up to `shm.acknowledge_timeout_ms`, then fail |
//! | UdpMulticast   | drop the sample (best effort, still handed off)   |
//! | Tcp            | block up to `tcp.send_timeout_ms`, then fail      |
//!
//! A TCP session to one subscriber gives up after `tcp.max_reconnections`
//! consecutive failed sends beyond the first: it stops blocking and only
//! hands off when the inbox has room. The next successful send restores it.
//!
//! [`CarrierSet`] owns one instance of each carrier for a registry. A carrier
//! whose tunables are invalid fails initialization and stays unavailable until
//! a reload fixes it. Runtime failures can be reported and cleared; every
//! health change goes to the diagnostic sink.

use super::{LayerSet, TransportLayer};
use crate::config::{ShmConfig, TcpConfig, TransportConfig, UdpConfig};
use crate::core::{EntityId, TopicId, TypeDescriptor};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use arc_swap::ArcSwap;
use crossbeam::channel::{SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One published sample on its way to a subscriber inbox.
#[derive(Clone, Debug)]
pub struct Sample {
    /// Sending publisher.
    pub sender: Arc<TopicId>,
    /// Publisher's type descriptor.
    pub descriptor: TypeDescriptor,
    /// Payload bytes, shared between all receivers of one send.
    pub payload: Arc<[u8]>,
    /// Send timestamp in microseconds.
    pub send_timestamp: i64,
    /// Publisher send clock.
    pub send_clock: u64,
    /// Connection session of the (publisher, subscriber) pair it was routed on.
    pub session: u64,
    /// Carrier the sample travelled on.
    pub layer: TransportLayer,
}

/// Hand-off failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CarrierError {
    /// Carrier is not initialized or marked failed.
    Unavailable,
    /// Inbox stayed full for the carrier's bounded wait.
    Full,
    /// Receiving inbox is gone.
    Closed,
}

impl fmt::Display for CarrierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CarrierError::Unavailable => write!(f, "carrier unavailable"),
            CarrierError::Full => write!(f, "receiver inbox full"),
            CarrierError::Closed => write!(f, "receiver inbox closed"),
        }
    }
}

impl std::error::Error for CarrierError {}

/// Moves one sample into one subscriber inbox.
pub trait Carrier: Send + Sync {
    /// Which layer this carrier implements.
    fn layer(&self) -> TransportLayer;

    /// Hand a sample to the inbox of `subscriber`.
    fn deliver(
        &self,
        subscriber: EntityId,
        inbox: &Sender<Sample>,
        sample: Sample,
    ) -> Result<(), CarrierError>;
}

fn send_bounded(
    inbox: &Sender<Sample>,
    sample: Sample,
    wait: Duration,
) -> Result<(), CarrierError> {
    match inbox.send_timeout(sample, wait) {
        Ok(()) => Ok(()),
        Err(SendTimeoutError::Timeout(_)) => Err(CarrierError::Full),
        Err(SendTimeoutError::Disconnected(_)) => Err(CarrierError::Closed),
    }
}

/// Shared memory carrier.
#[derive(Debug)]
pub struct ShmCarrier {
    acknowledge_timeout: Duration,
}

impl ShmCarrier {
    /// Validate tunables and create the carrier.
    pub fn init(config: &ShmConfig) -> Result<Self, String> {
        if config.memfile_min_size_bytes == 0 {
            return Err("shm.memfile_min_size_bytes is 0".to_string());
        }
        if config.memfile_buffer_count == 0 {
            return Err("shm.memfile_buffer_count is 0".to_string());
        }
        Ok(Self {
            acknowledge_timeout: Duration::from_millis(config.acknowledge_timeout_ms),
        })
    }
}

impl Carrier for ShmCarrier {
    fn layer(&self) -> TransportLayer {
        TransportLayer::SharedMemory
    }

    fn deliver(
        &self,
        _subscriber: EntityId,
        inbox: &Sender<Sample>,
        sample: Sample,
    ) -> Result<(), CarrierError> {
        send_bounded(inbox, sample, self.acknowledge_timeout)
    }
}

/// UDP multicast carrier.
#[derive(Debug)]
pub struct UdpCarrier {
    _port: u16,
}

impl UdpCarrier {
    /// Validate tunables and create the carrier.
    pub fn init(config: &UdpConfig) -> Result<Self, String> {
        if config.port == 0 {
            return Err("udp.port is 0".to_string());
        }
        if config.send_buffer == 0 || config.receive_buffer == 0 {
            return Err("udp socket buffer size is 0".to_string());
        }
        Ok(Self { _port: config.port })
    }
}

impl Carrier for UdpCarrier {
    fn layer(&self) -> TransportLayer {
        TransportLayer::UdpMulticast
    }

    fn deliver(
        &self,
        _subscriber: EntityId,
        inbox: &Sender<Sample>,
        sample: Sample,
    ) -> Result<(), CarrierError> {
        match inbox.try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(dropped)) => {
                log::trace!(
                    "[UdpCarrier] receiver inbox full, dropping clock {} from {}",
                    dropped.send_clock,
                    dropped.sender
                );
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(CarrierError::Closed),
        }
    }
}

/// TCP carrier.
#[derive(Debug)]
pub struct TcpCarrier {
    send_timeout: Duration,
    max_reconnections: u32,
    /// Consecutive failed sends per subscriber session; absent when healthy.
    failures: Mutex<HashMap<EntityId, u32>>,
}

impl TcpCarrier {
    /// Validate tunables and create the carrier.
    pub fn init(config: &TcpConfig) -> Result<Self, String> {
        if config.number_executor_reader == 0 || config.number_executor_writer == 0 {
            return Err("tcp executor thread count is 0".to_string());
        }
        Ok(Self {
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            max_reconnections: config.max_reconnections,
            failures: Mutex::new(HashMap::new()),
        })
    }

    fn gave_up(&self, subscriber: EntityId) -> bool {
        self.failures
            .lock()
            .get(&subscriber)
            .is_some_and(|failed| *failed > self.max_reconnections)
    }

    fn record(&self, subscriber: EntityId, result: Result<(), CarrierError>) {
        let mut failures = self.failures.lock();
        match result {
            Err(CarrierError::Full) => {
                let failed = failures.entry(subscriber).or_insert(0);
                *failed = failed.saturating_add(1);
                if *failed == self.max_reconnections.saturating_add(1) {
                    log::warn!(
                        "[TcpCarrier] session to {} gave up after {} reconnection attempts",
                        subscriber,
                        self.max_reconnections
                    );
                }
            }
            Ok(()) => {
                if failures.remove(&subscriber).is_some() {
                    log::debug!("[TcpCarrier] session to {} re-established", subscriber);
                }
            }
            Err(_) => {
                failures.remove(&subscriber);
            }
        }
    }
}

impl Carrier for TcpCarrier {
    fn layer(&self) -> TransportLayer {
        TransportLayer::Tcp
    }

    fn deliver(
        &self,
        subscriber: EntityId,
        inbox: &Sender<Sample>,
        sample: Sample,
    ) -> Result<(), CarrierError> {
        let wait = if self.gave_up(subscriber) {
            Duration::ZERO
        } else {
            self.send_timeout
        };
        let result = send_bounded(inbox, sample, wait);
        self.record(subscriber, result);
        result
    }
}

struct Carriers {
    shm: Result<ShmCarrier, String>,
    udp: Result<UdpCarrier, String>,
    tcp: Result<TcpCarrier, String>,
}

impl Carriers {
    fn init(config: &TransportConfig) -> Self {
        Self {
            shm: ShmCarrier::init(&config.shm),
            udp: UdpCarrier::init(&config.udp),
            tcp: TcpCarrier::init(&config.tcp),
        }
    }

    fn get(&self, layer: TransportLayer) -> Result<&dyn Carrier, &str> {
        match layer {
            TransportLayer::SharedMemory => self.shm.as_ref().map(|c| c as &dyn Carrier),
            TransportLayer::UdpMulticast => self.udp.as_ref().map(|c| c as &dyn Carrier),
            TransportLayer::Tcp => self.tcp.as_ref().map(|c| c as &dyn Carrier),
        }
        .map_err(String::as_str)
    }

    fn init_failed(&self) -> LayerSet {
        TransportLayer::ALL
            .into_iter()
            .filter(|layer| self.get(*layer).is_err())
            .collect()
    }
}

/// Carriers of one registry plus their health.
pub struct CarrierSet {
    carriers: ArcSwap<Carriers>,
    runtime_failed: Mutex<LayerSet>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl CarrierSet {
    /// Initialize all carriers, reporting the ones that fail.
    pub fn new(config: &TransportConfig, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        let carriers = Carriers::init(config);
        for layer in carriers.init_failed().iter() {
            if let Err(reason) = carriers.get(layer) {
                diagnostics.report(Diagnostic::LayerUnavailable {
                    layer,
                    reason: reason.to_string(),
                });
            }
        }
        Self {
            carriers: ArcSwap::from_pointee(carriers),
            runtime_failed: Mutex::new(LayerSet::EMPTY),
            diagnostics,
        }
    }

    /// Re-initialize from new tunables. Returns true if availability changed.
    pub fn reload(&self, config: &TransportConfig) -> bool {
        let runtime_failed = *self.runtime_failed.lock();
        let before = self.carriers.load().init_failed().union(runtime_failed);
        let carriers = Carriers::init(config);
        let after = carriers.init_failed().union(runtime_failed);

        for layer in TransportLayer::ALL {
            match (before.contains(layer), after.contains(layer)) {
                (false, true) => {
                    let reason = carriers
                        .get(layer)
                        .err()
                        .unwrap_or("carrier failed")
                        .to_string();
                    self.diagnostics
                        .report(Diagnostic::LayerUnavailable { layer, reason });
                }
                (true, false) => self.diagnostics.report(Diagnostic::LayerRecovered { layer }),
                _ => {}
            }
        }
        self.carriers.store(Arc::new(carriers));
        before != after
    }

    /// Carriers that may not be advertised or used right now.
    pub fn failed(&self) -> LayerSet {
        self.carriers
            .load()
            .init_failed()
            .union(*self.runtime_failed.lock())
    }

    /// True if the carrier can be used.
    pub fn is_available(&self, layer: TransportLayer) -> bool {
        !self.failed().contains(layer)
    }

    /// Mark a carrier failed at runtime. Returns true if it was available before.
    pub fn report_failure(&self, layer: TransportLayer, reason: &str) -> bool {
        let was_available = self.is_available(layer);
        self.runtime_failed.lock().insert(layer);
        if was_available {
            self.diagnostics.report(Diagnostic::LayerUnavailable {
                layer,
                reason: reason.to_string(),
            });
        }
        was_available
    }

    /// Clear a runtime failure. Returns true if the carrier became available.
    pub fn clear_failure(&self, layer: TransportLayer) -> bool {
        let was_available = self.is_available(layer);
        self.runtime_failed.lock().remove(layer);
        let now_available = self.is_available(layer);
        if !was_available && now_available {
            self.diagnostics
                .report(Diagnostic::LayerRecovered { layer });
        }
        !was_available && now_available
    }

    /// Drop per-subscriber session state after its link went away.
    pub fn forget_session(&self, subscriber: EntityId) {
        if let Ok(tcp) = &self.carriers.load().tcp {
            tcp.failures.lock().remove(&subscriber);
        }
    }

    /// Deliver through the given carrier if it is healthy.
    pub fn deliver(
        &self,
        layer: TransportLayer,
        subscriber: EntityId,
        inbox: &Sender<Sample>,
        sample: Sample,
    ) -> Result<(), CarrierError> {
        if self.runtime_failed.lock().contains(layer) {
            return Err(CarrierError::Unavailable);
        }
        let carriers = self.carriers.load();
        let carrier = carriers
            .get(layer)
            .map_err(|_| CarrierError::Unavailable)?;
        carrier.deliver(subscriber, inbox, sample)
    }
}

impl fmt::Debug for CarrierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarrierSet")
            .field("failed", &self.failed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use crossbeam::channel::bounded;
    use std::time::Instant;

    const SUB: EntityId = EntityId::from_raw(9);

    fn sample(clock: u64) -> Sample {
        Sample {
            sender: Arc::new(TopicId {
                topic_name: "t".to_string(),
                entity_id: EntityId::from_raw(1),
                host_name: "h".to_string(),
                process_id: 1,
            }),
            descriptor: TypeDescriptor::default(),
            payload: Arc::from(&b"x"[..]),
            send_timestamp: 0,
            send_clock: clock,
            session: 1,
            layer: TransportLayer::UdpMulticast,
        }
    }

    #[test]
    fn udp_drops_on_full_inbox() {
        let carrier = UdpCarrier::init(&UdpConfig::default()).expect("valid udp config");
        let (tx, rx) = bounded(1);
        assert_eq!(carrier.deliver(SUB, &tx, sample(1)), Ok(()));
        assert_eq!(carrier.deliver(SUB, &tx, sample(2)), Ok(()));
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.recv().map(|s| s.send_clock), Ok(1));
    }

    #[test]
    fn shm_blocks_then_reports_full() {
        let config = ShmConfig {
            acknowledge_timeout_ms: 1,
            ..ShmConfig::default()
        };
        let carrier = ShmCarrier::init(&config).expect("valid shm config");
        let (tx, _rx) = bounded(1);
        assert_eq!(carrier.deliver(SUB, &tx, sample(1)), Ok(()));
        assert_eq!(carrier.deliver(SUB, &tx, sample(2)), Err(CarrierError::Full));
    }

    #[test]
    fn closed_inbox() {
        let carrier = TcpCarrier::init(&TcpConfig::default()).expect("valid tcp config");
        let (tx, rx) = bounded(1);
        drop(rx);
        assert_eq!(carrier.deliver(SUB, &tx, sample(1)), Err(CarrierError::Closed));
    }

    #[test]
    fn tcp_session_gives_up_after_max_reconnections() {
        let config = TcpConfig {
            send_timeout_ms: 200,
            max_reconnections: 1,
            ..TcpConfig::default()
        };
        let carrier = TcpCarrier::init(&config).expect("valid tcp config");
        let (tx, rx) = bounded(1);
        assert_eq!(carrier.deliver(SUB, &tx, sample(1)), Ok(()));

        // First failure plus one reconnection attempt each wait the full timeout.
        for clock in 2..=3 {
            let started = Instant::now();
            assert_eq!(carrier.deliver(SUB, &tx, sample(clock)), Err(CarrierError::Full));
            assert!(started.elapsed() >= Duration::from_millis(200));
        }

        // Given up: fails without blocking.
        let started = Instant::now();
        assert_eq!(carrier.deliver(SUB, &tx, sample(4)), Err(CarrierError::Full));
        assert!(started.elapsed() < Duration::from_millis(150));

        // Another subscriber's session is unaffected.
        let (other_tx, _other_rx) = bounded(1);
        assert_eq!(
            carrier.deliver(EntityId::from_raw(10), &other_tx, sample(1)),
            Ok(())
        );

        // Room in the inbox restores the session.
        assert_eq!(rx.recv().map(|s| s.send_clock), Ok(1));
        assert_eq!(carrier.deliver(SUB, &tx, sample(5)), Ok(()));
        assert!(!carrier.gave_up(SUB));
    }

    #[test]
    fn invalid_tunables_fail_init() {
        let sink = Arc::new(CollectingSink::new());
        let mut config = TransportConfig::default();
        config.shm.memfile_buffer_count = 0;
        config.tcp.number_executor_writer = 0;

        let set = CarrierSet::new(&config, sink.clone());
        assert_eq!(
            set.failed(),
            LayerSet::only(TransportLayer::SharedMemory).with(TransportLayer::Tcp)
        );
        assert_eq!(sink.events().len(), 2);

        let (tx, _rx) = bounded(4);
        assert_eq!(
            set.deliver(TransportLayer::SharedMemory, SUB, &tx, sample(1)),
            Err(CarrierError::Unavailable)
        );

        assert!(set.reload(&TransportConfig::default()));
        assert!(set.failed().is_empty());
        assert_eq!(
            sink.count(|d| matches!(d, Diagnostic::LayerRecovered { .. })),
            2
        );
    }

    #[test]
    fn runtime_failure_and_recovery() {
        let sink = Arc::new(CollectingSink::new());
        let set = CarrierSet::new(&TransportConfig::default(), sink.clone());
        assert!(set.report_failure(TransportLayer::UdpMulticast, "interface down"));
        assert!(!set.report_failure(TransportLayer::UdpMulticast, "interface down"));
        assert!(!set.is_available(TransportLayer::UdpMulticast));
        assert!(set.clear_failure(TransportLayer::UdpMulticast));
        assert!(!set.clear_failure(TransportLayer::UdpMulticast));
        assert_eq!(sink.events().len(), 2);
    }
}
