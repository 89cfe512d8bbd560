// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic

//! Connected/Disconnected event derivation across restarts, partitions and
//! carrier failures.

use crossbeam::channel::{unbounded, Receiver};
use hmesh::{
    CollectingSink, ConnectionState, Diagnostic, Domain, EntityId, EventKind, LayerConfig,
    MeshConfig, Publisher, Registry, Subscriber, TopicEvent, TransportLayer, TypeDescriptor,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(3);

fn fast_config(host: &str) -> MeshConfig {
    let mut config = MeshConfig::default();
    config.registration.refresh_ms = 20;
    config.registration.timeout_ms = 2_000;
    config.registration.host_name = Some(host.to_string());
    config
}

fn expiring_config(host: &str) -> MeshConfig {
    let mut config = fast_config(host);
    config.registration.refresh_ms = 10;
    config.registration.timeout_ms = 80;
    config
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn events_of(subscriber: &Subscriber) -> Receiver<TopicEvent> {
    let (tx, rx) = unbounded();
    subscriber
        .set_event_callback(move |event| {
            let _ = tx.send(event.clone());
        })
        .expect("event callback");
    rx
}

fn next_kind(events: &Receiver<TopicEvent>, kind: EventKind) -> TopicEvent {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = events
            .recv_timeout(remaining)
            .unwrap_or_else(|_| panic!("no {:?} event within {:?}", kind, WAIT));
        if event.kind == kind {
            return event;
        }
    }
}

#[test]
fn connect_then_disconnect_on_both_sides() {
    let domain = Domain::new();
    let registry_a = Registry::new(&domain, fast_config("host-a")).expect("registry a");
    let registry_b = Registry::new(&domain, fast_config("host-b")).expect("registry b");

    let subscriber = Subscriber::new(&registry_b, "odom", None).expect("subscriber");
    let sub_events = events_of(&subscriber);

    let (pub_tx, pub_events) = unbounded();
    let descriptor = TypeDescriptor::named("Odometry", "proto");
    let publisher = Publisher::builder(&registry_a, "odom")
        .descriptor(descriptor.clone())
        .on_event(move |event| {
            let _ = pub_tx.send(event.clone());
        })
        .build()
        .expect("publisher");

    let connected = next_kind(&sub_events, EventKind::Connected);
    assert_eq!(&connected.peer, publisher.topic_id());
    assert_eq!(connected.peer_descriptor, descriptor);
    assert_eq!(connected.layer, Some(TransportLayer::UdpMulticast));
    let connected = next_kind(&pub_events, EventKind::Connected);
    assert_eq!(&connected.peer, subscriber.topic_id());

    let publisher_id = publisher.topic_id().clone();
    drop(publisher);
    let disconnected = next_kind(&sub_events, EventKind::Disconnected);
    assert_eq!(disconnected.peer, publisher_id);
    assert!(disconnected.time_us >= connected.time_us);
    assert_eq!(
        registry_b.connection_state(&publisher_id, subscriber.topic_id()),
        ConnectionState::Unmatched
    );
}

#[test]
fn connection_state_inspection() {
    let domain = Domain::new();
    let registry = Registry::new(&domain, fast_config("host-a")).expect("registry");
    let publisher =
        Publisher::new(&registry, "a", TypeDescriptor::named("A", "raw")).expect("publisher");
    let other = Subscriber::new(&registry, "b", None).expect("subscriber");
    let typed = Subscriber::new(&registry, "a", Some(TypeDescriptor::named("B", "raw")))
        .expect("subscriber");
    let plain = Subscriber::new(&registry, "a", None).expect("subscriber");

    assert_eq!(
        registry.connection_state(publisher.topic_id(), other.topic_id()),
        ConnectionState::Unmatched
    );
    assert_eq!(
        registry.connection_state(publisher.topic_id(), typed.topic_id()),
        ConnectionState::Matched
    );
    assert_eq!(
        registry.connection_state(publisher.topic_id(), plain.topic_id()),
        ConnectionState::Connected(TransportLayer::SharedMemory)
    );

    plain.set_layer_config(LayerConfig::none()).expect("layers");
    assert_eq!(
        registry.connection_state(publisher.topic_id(), plain.topic_id()),
        ConnectionState::Disconnected
    );
    plain.set_layer_config(LayerConfig::all()).expect("layers");
    assert_eq!(
        registry.connection_state(publisher.topic_id(), plain.topic_id()),
        ConnectionState::Connected(TransportLayer::SharedMemory)
    );
}

#[test]
fn events_stay_ordered_across_random_restarts() {
    let domain = Domain::new();
    let registry_a = Registry::new(&domain, fast_config("host-a")).expect("registry a");
    let registry_b = Registry::new(&domain, fast_config("host-b")).expect("registry b");
    let subscriber = Subscriber::new(&registry_a, "restart", None).expect("subscriber");
    let events = events_of(&subscriber);

    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let mut live: Vec<Publisher> = Vec::new();
    let mut created = 0usize;
    for _ in 0..60 {
        if live.is_empty() || (live.len() < 4 && rng.bool()) {
            let registry = if rng.bool() { &registry_a } else { &registry_b };
            live.push(
                Publisher::new(registry, "restart", TypeDescriptor::default()).expect("publisher"),
            );
            created += 1;
        } else {
            let index = rng.usize(..live.len());
            live.swap_remove(index).dispose();
        }
    }
    live.clear();

    let mut per_peer: HashMap<EntityId, Vec<EventKind>> = HashMap::new();
    for _ in 0..created * 2 {
        let event = events.recv_timeout(WAIT).expect("event");
        per_peer
            .entry(event.peer.entity_id)
            .or_default()
            .push(event.kind);
    }
    assert_eq!(per_peer.len(), created);
    for kinds in per_peer.values() {
        assert_eq!(kinds, &[EventKind::Connected, EventKind::Disconnected]);
    }
    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn partition_expires_then_reconnects() {
    let domain = Domain::new();
    let sink = Arc::new(CollectingSink::new());
    let registry_a = Registry::builder(&domain)
        .config(expiring_config("host-a"))
        .diagnostics(sink.clone())
        .build()
        .expect("registry a");
    let registry_b = Registry::new(&domain, expiring_config("host-b")).expect("registry b");

    let subscriber = Subscriber::new(&registry_a, "hb", None).expect("subscriber");
    let events = events_of(&subscriber);
    let publisher = Publisher::new(&registry_b, "hb", TypeDescriptor::default()).expect("publisher");
    next_kind(&events, EventKind::Connected);

    domain.detach(&registry_b);
    assert!(domain.is_detached(&registry_b));
    let disconnected = next_kind(&events, EventKind::Disconnected);
    assert_eq!(&disconnected.peer, publisher.topic_id());
    assert!(wait_until(|| {
        sink.count(|d| {
            matches!(d, Diagnostic::TopicExpired { topic } if topic == publisher.topic_id())
        }) >= 1
    }));
    // Samples no longer cross the partition.
    assert!(!publisher.send(b"lost", None).expect("send"));

    domain.reattach(&registry_b);
    let reconnected = next_kind(&events, EventKind::Connected);
    assert_eq!(&reconnected.peer, publisher.topic_id());
    assert!(publisher.is_connected());
}

#[test]
fn carrier_failure_reroutes_without_events() {
    let domain = Domain::new();
    let sink = Arc::new(CollectingSink::new());
    let registry = Registry::builder(&domain)
        .config(fast_config("host-a"))
        .diagnostics(sink.clone())
        .build()
        .expect("registry");
    let subscriber = Subscriber::new(&registry, "fallback", None).expect("subscriber");
    let events = events_of(&subscriber);
    let publisher =
        Publisher::new(&registry, "fallback", TypeDescriptor::default()).expect("publisher");
    next_kind(&events, EventKind::Connected);

    registry.report_layer_failure(TransportLayer::SharedMemory, "memfile lost");
    assert_eq!(
        registry.connection_state(publisher.topic_id(), subscriber.topic_id()),
        ConnectionState::Connected(TransportLayer::UdpMulticast)
    );
    assert_eq!(
        sink.count(|d| matches!(
            d,
            Diagnostic::LayerUnavailable {
                layer: TransportLayer::SharedMemory,
                ..
            }
        )),
        1
    );

    registry.report_layer_failure(TransportLayer::UdpMulticast, "socket closed");
    next_kind(&events, EventKind::Disconnected);
    assert!(!publisher.send(b"x", None).expect("send"));

    registry.clear_layer_failure(TransportLayer::SharedMemory);
    next_kind(&events, EventKind::Connected);
    assert_eq!(
        registry.connection_state(publisher.topic_id(), subscriber.topic_id()),
        ConnectionState::Connected(TransportLayer::SharedMemory)
    );
    assert_eq!(
        sink.count(|d| matches!(d, Diagnostic::LayerRecovered { .. })),
        1
    );
}
