// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer table and connection state machine.
//!
//! ```text
//! Unmatched ──(same topic name)──► Matched ──(compatible + select=Some)──► Connected
//!                                                                            │   ▲
//!                                          (vanished / nothing selectable)   ▼   │
//!                                                                       Disconnected
//! ```
//!
//! Pairs are tracked only when at least one side is a local endpoint; remote
//! registries track their own side. A pair whose endpoint vanished is removed
//! after its Disconnected transition, so a restarted peer (new entity id) always
//! starts a fresh pair.
//!
//! Everything here is plain data manipulated under the registry lock. The
//! caller turns the returned transitions into events.

use super::announce::{EndpointRole, ServiceRecord, TopicRecord};
use crate::callback::CallbackSlot;
use crate::config::{LayerConfig, LayerPriority};
use crate::core::{EntityId, ServiceId};
use crate::pubsub::event::EventHandler;
use crate::service::types::{ClientEventHandler, ClientEventKind};
use crate::transport::{select, LayerSet, TransportLayer};
use arc_swap::ArcSwap;
use crossbeam::channel::Sender;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Connection state of one publisher/subscriber pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not a pair (unknown endpoint or different topic names).
    Unmatched,
    /// Same topic, but never connected (incompatible types or no common carrier).
    Matched,
    /// Samples flow over the given carrier.
    Connected(TransportLayer),
    /// Was connected, currently nothing selectable.
    Disconnected,
}

/// One outgoing link of a local publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Route {
    pub subscriber: EntityId,
    pub layer: TransportLayer,
    /// Changes every time the pair reconnects.
    pub session: u64,
}

pub(crate) type RouteTable = ArcSwap<Vec<Route>>;

pub(crate) struct LocalTopic {
    pub layers: LayerConfig,
    pub events: Arc<CallbackSlot<EventHandler>>,
    /// Publishers only.
    pub routes: Option<Arc<RouteTable>>,
    /// Subscribers only: publishers whose send clock must be forgotten.
    pub clock_resets: Option<Sender<EntityId>>,
}

pub(crate) enum Origin {
    Local(LocalTopic),
    Remote { last_seen: Instant },
}

pub(crate) struct TopicEntry {
    pub record: TopicRecord,
    pub origin: Origin,
}

impl TopicEntry {
    fn local(&self) -> Option<&LocalTopic> {
        match &self.origin {
            Origin::Local(local) => Some(local),
            Origin::Remote { .. } => None,
        }
    }

    fn is_local(&self) -> bool {
        self.local().is_some()
    }
}

pub(crate) struct ServiceEntry {
    pub record: ServiceRecord,
    /// `None` for local servers.
    pub last_seen: Option<Instant>,
}

pub(crate) struct LocalClient {
    pub id: Arc<ServiceId>,
    pub host_filter: Option<String>,
    pub events: Arc<CallbackSlot<ClientEventHandler>>,
    connected: BTreeMap<EntityId, Arc<ServiceId>>,
}

impl LocalClient {
    pub fn new(
        id: Arc<ServiceId>,
        host_filter: Option<String>,
        events: Arc<CallbackSlot<ClientEventHandler>>,
    ) -> Self {
        Self {
            id,
            host_filter,
            events,
            connected: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PairPhase {
    Matched,
    /// Carrier and session number of the current connection.
    Connected(TransportLayer, u64),
    Disconnected,
}

/// Pair transition into Connected or Disconnected.
#[derive(Clone, Debug)]
pub(crate) struct Transition {
    pub publisher: TopicRecord,
    pub subscriber: TopicRecord,
    pub connected: bool,
    pub layer: Option<TransportLayer>,
}

/// Client view change for one server.
#[derive(Clone, Debug)]
pub(crate) struct ClientTransition {
    pub client: EntityId,
    pub server: Arc<ServiceId>,
    pub kind: ClientEventKind,
}

#[derive(Default)]
pub(crate) struct RegistryState {
    topics: BTreeMap<EntityId, TopicEntry>,
    pairs: BTreeMap<(EntityId, EntityId), PairPhase>,
    last_session: u64,
    services: BTreeMap<EntityId, ServiceEntry>,
    clients: BTreeMap<EntityId, LocalClient>,
}

fn host_matches(filter: Option<&str>, host: &str) -> bool {
    filter.map_or(true, |wanted| wanted.is_empty() || wanted == host)
}

impl RegistryState {
    // -------------------------------------------------------------------
    // Topics
    // -------------------------------------------------------------------

    pub fn insert_local_topic(&mut self, record: TopicRecord, local: LocalTopic) {
        self.topics.insert(
            record.entity_id(),
            TopicEntry {
                record,
                origin: Origin::Local(local),
            },
        );
    }

    /// Insert or refresh a remote record. Returns true if anything but the
    /// liveness stamp changed.
    pub fn upsert_remote_topic(&mut self, record: TopicRecord, now: Instant) -> bool {
        let id = record.entity_id();
        match self.topics.get_mut(&id) {
            Some(entry) => {
                if entry.is_local() {
                    return false;
                }
                entry.origin = Origin::Remote { last_seen: now };
                if entry.record == record {
                    return false;
                }
                entry.record = record;
                true
            }
            None => {
                self.topics.insert(
                    id,
                    TopicEntry {
                        record,
                        origin: Origin::Remote { last_seen: now },
                    },
                );
                true
            }
        }
    }

    /// Change the configured carriers of a local endpoint. Returns the new
    /// record when the advertisement changed.
    pub fn set_local_layers(
        &mut self,
        id: EntityId,
        layers: Option<LayerConfig>,
        priority: Option<LayerPriority>,
        failed: LayerSet,
    ) -> Option<TopicRecord> {
        let entry = self.topics.get_mut(&id)?;
        let Origin::Local(local) = &mut entry.origin else {
            return None;
        };
        if let Some(layers) = layers {
            local.layers = layers;
        }
        if let Some(priority) = priority {
            entry.record.layers.priority = priority;
        }
        entry.record.layers.enabled = local.layers.enabled_set().difference(failed);
        Some(entry.record.clone())
    }

    /// Recompute every local advertisement against the failed carrier set.
    /// Returns the records that changed.
    pub fn refresh_local_advertisements(&mut self, failed: LayerSet) -> Vec<TopicRecord> {
        let mut changed = Vec::new();
        for entry in self.topics.values_mut() {
            if let Origin::Local(local) = &entry.origin {
                let enabled = local.layers.enabled_set().difference(failed);
                if enabled != entry.record.layers.enabled {
                    entry.record.layers.enabled = enabled;
                    changed.push(entry.record.clone());
                }
            }
        }
        changed
    }

    /// Remove an endpoint. Connected pairs involving it produce Disconnected
    /// transitions, then every pair involving it is dropped.
    pub fn remove_topic(&mut self, id: EntityId) -> (Option<TopicEntry>, Vec<Transition>) {
        let Some(entry) = self.topics.remove(&id) else {
            return (None, Vec::new());
        };

        let keys: Vec<(EntityId, EntityId)> = self
            .pairs
            .keys()
            .filter(|(p, s)| *p == id || *s == id)
            .copied()
            .collect();

        let mut transitions = Vec::new();
        for key in keys {
            let Some(PairPhase::Connected(layer, _)) = self.pairs.remove(&key) else {
                continue;
            };
            let peer_id = if key.0 == id { key.1 } else { key.0 };
            let Some(peer) = self.topics.get(&peer_id) else {
                continue;
            };
            let (publisher, subscriber) = match entry.record.role {
                EndpointRole::Publisher => (entry.record.clone(), peer.record.clone()),
                EndpointRole::Subscriber => (peer.record.clone(), entry.record.clone()),
            };
            transitions.push(Transition {
                publisher,
                subscriber,
                connected: false,
                layer: Some(layer),
            });
        }
        (Some(entry), transitions)
    }

    /// Drive every tracked pair toward its desired state.
    pub fn reconcile(&mut self) -> Vec<Transition> {
        let mut transitions = Vec::new();
        let topics = &self.topics;
        let pairs = &mut self.pairs;
        let last_session = &mut self.last_session;

        let publishers = topics
            .values()
            .filter(|e| e.record.role == EndpointRole::Publisher);
        for p in publishers {
            let subscribers = topics.values().filter(|e| {
                e.record.role == EndpointRole::Subscriber
                    && e.record.id.topic_name == p.record.id.topic_name
            });
            for s in subscribers {
                if !p.is_local() && !s.is_local() {
                    continue;
                }
                let desired = if p.record.descriptor.is_compatible(&s.record.descriptor) {
                    select(
                        p.record.layers.enabled,
                        &s.record.layers,
                        p.record.id.host_name == s.record.id.host_name,
                    )
                } else {
                    None
                };

                let key = (p.record.entity_id(), s.record.entity_id());
                let previous = pairs.get(&key).copied();
                let next = match (previous, desired) {
                    (Some(PairPhase::Connected(old, session)), Some(layer)) => {
                        if old != layer {
                            log::debug!(
                                "[Registry] route {} -> {} switched {} -> {}",
                                p.record.id,
                                s.record.id,
                                old,
                                layer
                            );
                        }
                        PairPhase::Connected(layer, session)
                    }
                    (_, Some(layer)) => {
                        transitions.push(Transition {
                            publisher: p.record.clone(),
                            subscriber: s.record.clone(),
                            connected: true,
                            layer: Some(layer),
                        });
                        *last_session += 1;
                        PairPhase::Connected(layer, *last_session)
                    }
                    (Some(PairPhase::Connected(old, _)), None) => {
                        transitions.push(Transition {
                            publisher: p.record.clone(),
                            subscriber: s.record.clone(),
                            connected: false,
                            layer: Some(old),
                        });
                        PairPhase::Disconnected
                    }
                    (Some(phase), None) => phase,
                    (None, None) => PairPhase::Matched,
                };
                pairs.insert(key, next);
            }
        }
        transitions
    }

    /// Publish the connected subscribers of every local publisher.
    pub fn publish_routes(&self) {
        for (id, entry) in &self.topics {
            let Some(table) = entry.local().and_then(|l| l.routes.as_ref()) else {
                continue;
            };
            let routes: Vec<Route> = self
                .pairs
                .range((*id, EntityId::from_raw(0))..=(*id, EntityId::from_raw(u64::MAX)))
                .filter_map(|((_, sub), phase)| match phase {
                    PairPhase::Connected(layer, session) => Some(Route {
                        subscriber: *sub,
                        layer: *layer,
                        session: *session,
                    }),
                    _ => None,
                })
                .collect();
            if **table.load() != routes {
                table.store(Arc::new(routes));
            }
        }
    }

    pub fn connection_state(&self, publisher: EntityId, subscriber: EntityId) -> ConnectionState {
        if let Some(phase) = self.pairs.get(&(publisher, subscriber)) {
            return match phase {
                PairPhase::Matched => ConnectionState::Matched,
                PairPhase::Connected(layer, _) => ConnectionState::Connected(*layer),
                PairPhase::Disconnected => ConnectionState::Disconnected,
            };
        }
        match (self.topics.get(&publisher), self.topics.get(&subscriber)) {
            (Some(p), Some(s))
                if p.record.role == EndpointRole::Publisher
                    && s.record.role == EndpointRole::Subscriber
                    && p.record.id.topic_name == s.record.id.topic_name =>
            {
                ConnectionState::Matched
            }
            _ => ConnectionState::Unmatched,
        }
    }

    /// Number of Connected pairs the endpoint takes part in.
    pub fn connected_peers(&self, id: EntityId) -> usize {
        self.pairs
            .iter()
            .filter(|((p, s), phase)| {
                (*p == id || *s == id) && matches!(phase, PairPhase::Connected(..))
            })
            .count()
    }

    pub fn topic_events(&self, id: EntityId) -> Option<Arc<CallbackSlot<EventHandler>>> {
        self.topics
            .get(&id)
            .and_then(|e| e.local())
            .map(|l| l.events.clone())
    }

    pub fn clock_resets(&self, id: EntityId) -> Option<Sender<EntityId>> {
        self.topics
            .get(&id)
            .and_then(|e| e.local())
            .and_then(|l| l.clock_resets.clone())
    }

    pub fn local_topic_records(&self) -> Vec<TopicRecord> {
        self.topics
            .values()
            .filter(|e| e.is_local())
            .map(|e| e.record.clone())
            .collect()
    }

    /// Known endpoints of a topic, local and remote.
    pub fn topic_records(&self, topic_name: &str) -> Vec<TopicRecord> {
        self.topics
            .values()
            .filter(|e| e.record.id.topic_name == topic_name)
            .map(|e| e.record.clone())
            .collect()
    }

    // -------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------

    pub fn insert_local_service(&mut self, record: ServiceRecord) {
        self.services.insert(
            record.entity_id(),
            ServiceEntry {
                record,
                last_seen: None,
            },
        );
    }

    pub fn set_local_methods(
        &mut self,
        id: EntityId,
        methods: Vec<crate::service::ServiceMethodInformation>,
    ) -> Option<ServiceRecord> {
        let entry = self.services.get_mut(&id)?;
        if entry.last_seen.is_some() {
            return None;
        }
        entry.record.methods = methods;
        Some(entry.record.clone())
    }

    /// Insert or refresh a remote server. Returns true if it is new or its
    /// advertised methods changed.
    pub fn upsert_remote_service(&mut self, record: ServiceRecord, now: Instant) -> bool {
        match self.services.get_mut(&record.entity_id()) {
            Some(entry) => {
                if entry.last_seen.is_none() {
                    return false;
                }
                entry.last_seen = Some(now);
                if entry.record == record {
                    return false;
                }
                entry.record = record;
                true
            }
            None => {
                self.services.insert(
                    record.entity_id(),
                    ServiceEntry {
                        record,
                        last_seen: Some(now),
                    },
                );
                true
            }
        }
    }

    pub fn remove_service(&mut self, id: EntityId) -> Option<ServiceEntry> {
        self.services.remove(&id)
    }

    pub fn local_service_records(&self) -> Vec<ServiceRecord> {
        self.services
            .values()
            .filter(|e| e.last_seen.is_none())
            .map(|e| e.record.clone())
            .collect()
    }

    /// Servers of a service, ordered by entity id.
    pub fn resolve_servers(&self, service_name: &str, host_filter: Option<&str>) -> Vec<Arc<ServiceId>> {
        self.services
            .values()
            .filter(|e| {
                e.record.id.service_name == service_name
                    && host_matches(host_filter, &e.record.id.host_name)
            })
            .map(|e| e.record.id.clone())
            .collect()
    }

    pub fn service_methods(&self, server: EntityId) -> Option<Vec<crate::service::ServiceMethodInformation>> {
        self.services.get(&server).map(|e| e.record.methods.clone())
    }

    // -------------------------------------------------------------------
    // Clients
    // -------------------------------------------------------------------

    pub fn insert_client(&mut self, client: LocalClient) {
        self.clients.insert(client.id.entity_id, client);
    }

    pub fn remove_client(&mut self, id: EntityId) -> Option<LocalClient> {
        self.clients.remove(&id)
    }

    pub fn set_client_host_filter(&mut self, id: EntityId, host_filter: Option<String>) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.host_filter = host_filter;
        }
    }

    pub fn client_connected(&self, id: EntityId) -> bool {
        self.clients
            .get(&id)
            .map_or(false, |c| !c.connected.is_empty())
    }

    pub fn client_events(&self, id: EntityId) -> Option<Arc<CallbackSlot<ClientEventHandler>>> {
        self.clients.get(&id).map(|c| c.events.clone())
    }

    /// Bring every client's connected-server view up to date.
    pub fn reconcile_clients(&mut self) -> Vec<ClientTransition> {
        let mut transitions = Vec::new();
        for (client_id, client) in self.clients.iter_mut() {
            let current: BTreeMap<EntityId, Arc<ServiceId>> = self
                .services
                .iter()
                .filter(|(_, e)| {
                    e.record.id.service_name == client.id.service_name
                        && host_matches(client.host_filter.as_deref(), &e.record.id.host_name)
                })
                .map(|(id, e)| (*id, e.record.id.clone()))
                .collect();

            for (id, server) in &client.connected {
                if !current.contains_key(id) {
                    transitions.push(ClientTransition {
                        client: *client_id,
                        server: server.clone(),
                        kind: ClientEventKind::Disconnected,
                    });
                }
            }
            for (id, server) in &current {
                if !client.connected.contains_key(id) {
                    transitions.push(ClientTransition {
                        client: *client_id,
                        server: server.clone(),
                        kind: ClientEventKind::Connected,
                    });
                }
            }
            client.connected = current;
        }
        transitions
    }

    // -------------------------------------------------------------------
    // Liveness
    // -------------------------------------------------------------------

    /// Remote topic endpoints and services not refreshed within `timeout`.
    pub fn stale_entries(&self, now: Instant, timeout: Duration) -> (Vec<EntityId>, Vec<EntityId>) {
        let stale = |seen: Instant| now.saturating_duration_since(seen) > timeout;
        let topics = self
            .topics
            .iter()
            .filter(|(_, e)| matches!(e.origin, Origin::Remote { last_seen } if stale(last_seen)))
            .map(|(id, _)| *id)
            .collect();
        let services = self
            .services
            .iter()
            .filter(|(_, e)| e.last_seen.map_or(false, stale))
            .map(|(id, _)| *id)
            .collect();
        (topics, services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TopicId, TypeDescriptor};
    use crate::transport::LayerAdvertisement;

    fn record(raw: u64, role: EndpointRole, topic: &str, host: &str, enabled: LayerSet) -> TopicRecord {
        TopicRecord {
            id: Arc::new(TopicId {
                topic_name: topic.to_string(),
                entity_id: EntityId::from_raw(raw),
                host_name: host.to_string(),
                process_id: 1,
            }),
            role,
            descriptor: TypeDescriptor::named("Imu", "proto"),
            layers: LayerAdvertisement::new(enabled, LayerPriority::default()),
        }
    }

    fn local(layers: LayerConfig, publisher: bool) -> LocalTopic {
        LocalTopic {
            layers,
            events: Arc::new(CallbackSlot::new()),
            routes: publisher.then(|| Arc::new(ArcSwap::from_pointee(Vec::new()))),
            clock_resets: None,
        }
    }

    #[test]
    fn local_pair_connects_over_shm() {
        let mut state = RegistryState::default();
        state.insert_local_topic(
            record(1, EndpointRole::Publisher, "imu", "a", LayerSet::all()),
            local(LayerConfig::all(), true),
        );
        state.insert_local_topic(
            record(2, EndpointRole::Subscriber, "imu", "a", LayerSet::all()),
            local(LayerConfig::all(), false),
        );

        let transitions = state.reconcile();
        assert_eq!(transitions.len(), 1);
        assert!(transitions[0].connected);
        assert_eq!(
            state.connection_state(EntityId::from_raw(1), EntityId::from_raw(2)),
            ConnectionState::Connected(TransportLayer::SharedMemory)
        );

        // Reconcile is idempotent.
        assert!(state.reconcile().is_empty());
        state.publish_routes();
        assert_eq!(state.connected_peers(EntityId::from_raw(1)), 1);
    }

    #[test]
    fn different_topics_are_unmatched() {
        let mut state = RegistryState::default();
        state.insert_local_topic(
            record(1, EndpointRole::Publisher, "imu", "a", LayerSet::all()),
            local(LayerConfig::all(), true),
        );
        state.insert_local_topic(
            record(2, EndpointRole::Subscriber, "gps", "a", LayerSet::all()),
            local(LayerConfig::all(), false),
        );
        assert!(state.reconcile().is_empty());
        assert_eq!(
            state.connection_state(EntityId::from_raw(1), EntityId::from_raw(2)),
            ConnectionState::Unmatched
        );
    }

    #[test]
    fn losing_all_carriers_disconnects_and_recovers() {
        let mut state = RegistryState::default();
        state.insert_local_topic(
            record(1, EndpointRole::Publisher, "imu", "a", LayerSet::all()),
            local(LayerConfig::all(), true),
        );
        state.insert_local_topic(
            record(2, EndpointRole::Subscriber, "imu", "a", LayerSet::all()),
            local(LayerConfig::all(), false),
        );
        assert_eq!(state.reconcile().len(), 1);

        state.set_local_layers(EntityId::from_raw(1), Some(LayerConfig::none()), None, LayerSet::EMPTY);
        let down = state.reconcile();
        assert_eq!(down.len(), 1);
        assert!(!down[0].connected);
        assert_eq!(
            state.connection_state(EntityId::from_raw(1), EntityId::from_raw(2)),
            ConnectionState::Disconnected
        );

        state.set_local_layers(
            EntityId::from_raw(1),
            Some(LayerConfig::only(TransportLayer::UdpMulticast)),
            None,
            LayerSet::EMPTY,
        );
        let up = state.reconcile();
        assert_eq!(up.len(), 1);
        assert_eq!(up[0].layer, Some(TransportLayer::UdpMulticast));
    }

    #[test]
    fn carrier_switch_is_silent() {
        let mut state = RegistryState::default();
        state.insert_local_topic(
            record(1, EndpointRole::Publisher, "imu", "a", LayerSet::all()),
            local(LayerConfig::all(), true),
        );
        state.insert_local_topic(
            record(2, EndpointRole::Subscriber, "imu", "a", LayerSet::all()),
            local(LayerConfig::all(), false),
        );
        state.reconcile();

        let changed = state.refresh_local_advertisements(LayerSet::only(TransportLayer::SharedMemory));
        assert_eq!(changed.len(), 2);
        assert!(state.reconcile().is_empty());
        assert_eq!(
            state.connection_state(EntityId::from_raw(1), EntityId::from_raw(2)),
            ConnectionState::Connected(TransportLayer::UdpMulticast)
        );
    }

    #[test]
    fn removing_endpoint_disconnects_then_forgets_pair() {
        let mut state = RegistryState::default();
        state.insert_local_topic(
            record(1, EndpointRole::Publisher, "imu", "a", LayerSet::all()),
            local(LayerConfig::all(), true),
        );
        let now = Instant::now();
        assert!(state.upsert_remote_topic(
            record(7, EndpointRole::Subscriber, "imu", "b", LayerSet::all()),
            now
        ));
        let up = state.reconcile();
        assert_eq!(up[0].layer, Some(TransportLayer::UdpMulticast));

        let (entry, down) = state.remove_topic(EntityId::from_raw(7));
        assert!(entry.is_some());
        assert_eq!(down.len(), 1);
        assert!(!down[0].connected);
        assert_eq!(
            state.connection_state(EntityId::from_raw(1), EntityId::from_raw(7)),
            ConnectionState::Unmatched
        );
    }

    #[test]
    fn remote_refresh_without_change_is_quiet() {
        let mut state = RegistryState::default();
        let now = Instant::now();
        let rec = record(7, EndpointRole::Subscriber, "imu", "b", LayerSet::all());
        assert!(state.upsert_remote_topic(rec.clone(), now));
        assert!(!state.upsert_remote_topic(rec, now + Duration::from_millis(5)));

        let (topics, _) = state.stale_entries(now + Duration::from_millis(10), Duration::from_millis(20));
        assert!(topics.is_empty());
        let (topics, _) = state.stale_entries(now + Duration::from_millis(30), Duration::from_millis(20));
        assert_eq!(topics, vec![EntityId::from_raw(7)]);
    }

    #[test]
    fn remote_service_method_change_is_reported() {
        use crate::service::ServiceMethodInformation;

        let id = Arc::new(ServiceId {
            service_name: "math".to_string(),
            entity_id: EntityId::from_raw(40),
            host_name: "b".to_string(),
            process_id: 2,
        });
        let advertised = |methods: &[&str]| ServiceRecord {
            id: id.clone(),
            methods: methods
                .iter()
                .map(|m| ServiceMethodInformation::untyped(*m))
                .collect(),
        };
        let mut state = RegistryState::default();
        let now = Instant::now();

        assert!(state.upsert_remote_service(advertised(&["add"]), now));
        assert!(!state.upsert_remote_service(advertised(&["add"]), now));
        assert!(state.upsert_remote_service(advertised(&["add", "mul"]), now));
        assert_eq!(
            state.service_methods(id.entity_id).map(|m| m.len()),
            Some(2)
        );
    }
}
