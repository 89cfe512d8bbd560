// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-scoped discovery directory.
//!
//! A [`Registry`] stands for one process on one host. It keeps:
//!
//! - the local endpoints created through it (publishers, subscribers, service
//!   servers and clients)
//! - the remote endpoints learned from peer registries over the [`Domain`]
//! - the connection state of every publisher/subscriber pair with a local side
//!
//! # Architecture
//!
//! ```text
//! Registry
//! +-- state: Mutex<RegistryState>      peer table + pair state machine
//! +-- carriers: CarrierSet             carrier instances + health
//! +-- notifier: EventNotifier          ordered callback dispatch (1 thread)
//! +-- refresh worker                   re-announce + expire (1 thread, Weak ref)
//! ```
//!
//! Every mutation follows the same sequence: lock state, apply, reconcile,
//! publish routes, enqueue events, unlock, then broadcast to peers. Broadcasts
//! never happen under the state lock, so two registries announcing to each
//! other cannot deadlock.

pub mod announce;
pub(crate) mod notifier;
pub mod state;

pub use announce::EndpointRole;
pub use state::ConnectionState;

use crate::callback::CallbackSlot;
use crate::config::{LayerConfig, LayerPriority, MeshConfig, TransportConfig};
use crate::core::{local_host_name, now_micros, EntityId, ServiceId, TopicId, TypeDescriptor};
use crate::diagnostics::{Diagnostic, DiagnosticSink, LogSink};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::lifecycle::{join_unless_current, AlwaysRunning, ProcessLifecycle};
use crate::pubsub::event::{EventHandler, EventKind, TopicEvent};
use crate::service::types::{ClientEvent, ClientEventHandler, RequestEnvelope};
use crate::service::ServiceMethodInformation;
use crate::transport::{CarrierError, CarrierSet, LayerAdvertisement, Sample, TransportLayer};
use announce::{Announcement, ServiceRecord, TopicRecord};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use notifier::EventNotifier;
use parking_lot::{Mutex, RwLock};
use state::{ClientTransition, LocalClient, LocalTopic, RegistryState, Route, RouteTable, Transition};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Everything a local publisher or subscriber registers.
pub(crate) struct TopicRegistration {
    pub id: Arc<TopicId>,
    pub role: EndpointRole,
    pub descriptor: TypeDescriptor,
    pub layers: LayerConfig,
    pub priority: LayerPriority,
    pub events: Arc<CallbackSlot<EventHandler>>,
    /// Publishers only.
    pub routes: Option<Arc<RouteTable>>,
    /// Subscribers only.
    pub clock_resets: Option<Sender<EntityId>>,
}

struct RefreshWorker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Builder for [`Registry`].
pub struct RegistryBuilder {
    domain: Arc<Domain>,
    config: MeshConfig,
    lifecycle: Arc<dyn ProcessLifecycle>,
    diagnostics: Arc<dyn DiagnosticSink>,
    process_id: u32,
}

impl RegistryBuilder {
    /// Use the given configuration (defaults otherwise).
    pub fn config(mut self, config: MeshConfig) -> Self {
        self.config = config;
        self
    }

    /// Gate background workers on this predicate.
    pub fn lifecycle(mut self, lifecycle: Arc<dyn ProcessLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Report diagnostics to this sink instead of the log.
    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Process id stamped on endpoint identities.
    pub fn process_id(mut self, process_id: u32) -> Self {
        self.process_id = process_id;
        self
    }

    /// Validate the configuration, start workers and join the domain.
    pub fn build(self) -> Result<Arc<Registry>> {
        self.config.validate()?;

        let host_name = self
            .config
            .registration
            .host_name
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(local_host_name);
        let carriers = CarrierSet::new(&self.config.transport, self.diagnostics.clone());
        let notifier = EventNotifier::start("hmesh-notify")?;

        let registry = Arc::new(Registry {
            id: EntityId::generate(),
            host_name,
            process_id: self.process_id,
            config: RwLock::new(self.config),
            domain: self.domain,
            carriers,
            lifecycle: self.lifecycle,
            diagnostics: self.diagnostics,
            state: Mutex::new(RegistryState::default()),
            notifier,
            shutdown: AtomicBool::new(false),
            refresh: Mutex::new(None),
        });

        registry.domain.join(&registry);
        registry.start_refresh_worker()?;

        log::debug!(
            "[Registry] {} started on host '{}' (pid {})",
            registry.id,
            registry.host_name,
            registry.process_id
        );
        Ok(registry)
    }
}

/// Discovery directory of one simulated process.
pub struct Registry {
    id: EntityId,
    host_name: String,
    process_id: u32,
    config: RwLock<MeshConfig>,
    domain: Arc<Domain>,
    carriers: CarrierSet,
    lifecycle: Arc<dyn ProcessLifecycle>,
    diagnostics: Arc<dyn DiagnosticSink>,
    state: Mutex<RegistryState>,
    notifier: EventNotifier,
    shutdown: AtomicBool,
    refresh: Mutex<Option<RefreshWorker>>,
}

impl Registry {
    /// Start building a registry attached to `domain`.
    pub fn builder(domain: &Arc<Domain>) -> RegistryBuilder {
        RegistryBuilder {
            domain: domain.clone(),
            config: MeshConfig::default(),
            lifecycle: Arc::new(AlwaysRunning),
            diagnostics: Arc::new(LogSink),
            process_id: std::process::id(),
        }
    }

    /// Registry with the given configuration and default collaborators.
    pub fn new(domain: &Arc<Domain>, config: MeshConfig) -> Result<Arc<Self>> {
        Self::builder(domain).config(config).build()
    }

    /// Registry identity.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Host name stamped on local endpoints.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Process id stamped on local endpoints.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Domain this registry is attached to.
    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> MeshConfig {
        self.config.read().clone()
    }

    pub(crate) fn diagnostics(&self) -> &Arc<dyn DiagnosticSink> {
        &self.diagnostics
    }

    /// False once shut down or when the lifecycle predicate says stop.
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire) && self.lifecycle.is_ok()
    }

    /// New endpoints and sends are refused once shut down or stopped by the
    /// lifecycle predicate.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if !self.is_running() {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    /// State of the pair (publisher, subscriber).
    pub fn connection_state(&self, publisher: &TopicId, subscriber: &TopicId) -> ConnectionState {
        self.state
            .lock()
            .connection_state(publisher.entity_id, subscriber.entity_id)
    }

    /// Endpoints of a topic known to this registry, local and remote.
    pub fn topic_endpoints(&self, topic_name: &str) -> Vec<(EndpointRole, TopicId)> {
        self.state
            .lock()
            .topic_records(topic_name)
            .into_iter()
            .map(|r| (r.role, (*r.id).clone()))
            .collect()
    }

    /// Server instances of a service known to this registry.
    pub fn service_instances(&self, service_name: &str) -> Vec<ServiceId> {
        self.resolve_servers(service_name, None)
            .into_iter()
            .map(|id| (*id).clone())
            .collect()
    }

    /// Carriers currently unusable in this registry.
    pub fn failed_layers(&self) -> crate::transport::LayerSet {
        self.carriers.failed()
    }

    // -------------------------------------------------------------------
    // Carrier health and reconfiguration
    // -------------------------------------------------------------------

    /// Replace carrier tunables and re-run selection for every local endpoint.
    pub fn reload_transport_config(&self, transport: TransportConfig) {
        self.config.write().transport = transport.clone();
        if self.carriers.reload(&transport) {
            self.readvertise();
        }
    }

    /// Mark a carrier failed. Links using it move to the next common carrier
    /// or disconnect.
    pub fn report_layer_failure(&self, layer: TransportLayer, reason: &str) {
        if self.carriers.report_failure(layer, reason) {
            self.readvertise();
        }
    }

    /// Clear a carrier failure reported with [`Registry::report_layer_failure`].
    pub fn clear_layer_failure(&self, layer: TransportLayer) {
        if self.carriers.clear_failure(layer) {
            self.readvertise();
        }
    }

    fn readvertise(&self) {
        let failed = self.carriers.failed();
        let announcements: Vec<Announcement> = {
            let mut state = self.state.lock();
            let changed = state.refresh_local_advertisements(failed);
            self.settle_topics(&mut state, Vec::new());
            changed.into_iter().map(Announcement::Topic).collect()
        };
        self.domain.broadcast(self.id, &announcements);
    }

    // -------------------------------------------------------------------
    // Local topic endpoints
    // -------------------------------------------------------------------

    pub(crate) fn topic_id(&self, topic_name: &str) -> Result<Arc<TopicId>> {
        if topic_name.is_empty() {
            return Err(Error::InvalidArgument("topic name is empty".to_string()));
        }
        Ok(Arc::new(TopicId {
            topic_name: topic_name.to_string(),
            entity_id: EntityId::generate(),
            host_name: self.host_name.clone(),
            process_id: self.process_id,
        }))
    }

    pub(crate) fn service_id(&self, service_name: &str) -> Result<Arc<ServiceId>> {
        if service_name.is_empty() {
            return Err(Error::InvalidArgument("service name is empty".to_string()));
        }
        Ok(Arc::new(ServiceId {
            service_name: service_name.to_string(),
            entity_id: EntityId::generate(),
            host_name: self.host_name.clone(),
            process_id: self.process_id,
        }))
    }

    pub(crate) fn register_topic(
        self: &Arc<Self>,
        registration: TopicRegistration,
    ) -> Result<RegistrationToken> {
        self.ensure_open()?;
        let TopicRegistration {
            id,
            role,
            descriptor,
            layers,
            priority,
            events,
            routes,
            clock_resets,
        } = registration;
        let record = TopicRecord {
            id: id.clone(),
            role,
            descriptor,
            layers: LayerAdvertisement::new(
                layers.enabled_set().difference(self.carriers.failed()),
                priority,
            ),
        };
        {
            let mut state = self.state.lock();
            state.insert_local_topic(
                record.clone(),
                LocalTopic {
                    layers,
                    events,
                    routes,
                    clock_resets,
                },
            );
            self.settle_topics(&mut state, Vec::new());
        }
        log::debug!("[Registry] registered {:?} {}", role, id);
        self.domain
            .broadcast(self.id, &[Announcement::Topic(record)]);
        Ok(RegistrationToken::new(self, Registration::Topic(id.entity_id)))
    }

    pub(crate) fn update_topic_layers(
        &self,
        id: EntityId,
        layers: Option<LayerConfig>,
        priority: Option<LayerPriority>,
    ) {
        let failed = self.carriers.failed();
        let record = {
            let mut state = self.state.lock();
            let record = state.set_local_layers(id, layers, priority, failed);
            self.settle_topics(&mut state, Vec::new());
            record
        };
        if let Some(record) = record {
            self.domain
                .broadcast(self.id, &[Announcement::Topic(record)]);
        }
    }

    fn unregister_topic(&self, id: EntityId) {
        let removed = {
            let mut state = self.state.lock();
            let (entry, transitions) = state.remove_topic(id);
            self.settle_topics(&mut state, transitions);
            entry.is_some()
        };
        if removed {
            log::debug!("[Registry] unregistered topic endpoint {}", id);
            self.domain
                .broadcast(self.id, &[Announcement::TopicGone(id)]);
        }
    }

    /// Subscribers a local publisher is connected to, or publishers a local
    /// subscriber is connected to.
    pub(crate) fn connected_peers(&self, id: EntityId) -> usize {
        self.state.lock().connected_peers(id)
    }

    /// Reconcile, publish routes and queue events. Caller holds the state lock.
    fn settle_topics(&self, state: &mut RegistryState, mut transitions: Vec<Transition>) {
        transitions.extend(state.reconcile());
        state.publish_routes();
        if transitions.is_empty() {
            return;
        }

        let time_us = now_micros();
        for transition in transitions {
            let kind = if transition.connected {
                EventKind::Connected
            } else {
                EventKind::Disconnected
            };
            log::debug!(
                "[Registry] {:?} {} -> {} ({:?})",
                kind,
                transition.publisher.id,
                transition.subscriber.id,
                transition.layer
            );

            if !transition.connected {
                let publisher = transition.publisher.entity_id();
                let subscriber = transition.subscriber.entity_id();
                // Receive-side clock and carrier session state restart with the next connection.
                if let Some(resets) = state.clock_resets(subscriber) {
                    let _ = resets.send(publisher);
                }
                self.carriers.forget_session(subscriber);
            }

            let sides = [
                (&transition.publisher, &transition.subscriber),
                (&transition.subscriber, &transition.publisher),
            ];
            for (own, peer) in sides {
                let Some(slot) = state.topic_events(own.entity_id()) else {
                    continue;
                };
                let event = TopicEvent {
                    kind,
                    peer: (*peer.id).clone(),
                    peer_descriptor: peer.descriptor.clone(),
                    layer: transition.layer,
                    time_us,
                };
                self.notifier.enqueue(move || {
                    slot.invoke(|handler| handler(&event));
                });
            }
        }
    }

    /// Hand a sample to the subscriber behind `route`.
    pub(crate) fn deliver(&self, route: &Route, sample: Sample) -> std::result::Result<(), CarrierError> {
        let inbox = self
            .domain
            .inbox(self.id, route.subscriber)
            .ok_or(CarrierError::Closed)?;
        self.carriers
            .deliver(route.layer, route.subscriber, &inbox, sample)
    }

    pub(crate) fn register_inbox(&self, subscriber: EntityId, inbox: Sender<Sample>) {
        self.domain.register_inbox(self.id, subscriber, inbox);
    }

    pub(crate) fn remove_inbox(&self, subscriber: EntityId) {
        self.domain.remove_inbox(subscriber);
    }

    // -------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------

    pub(crate) fn register_server(
        self: &Arc<Self>,
        id: Arc<ServiceId>,
        methods: Vec<ServiceMethodInformation>,
        requests: Sender<RequestEnvelope>,
    ) -> Result<RegistrationToken> {
        self.ensure_open()?;
        let record = ServiceRecord {
            id: id.clone(),
            methods,
        };
        self.domain
            .register_server(self.id, id.entity_id, requests);
        {
            let mut state = self.state.lock();
            state.insert_local_service(record.clone());
            self.settle_clients(&mut state);
        }
        log::debug!("[Registry] registered service server {}", id);
        self.domain
            .broadcast(self.id, &[Announcement::Service(record)]);
        Ok(RegistrationToken::new(self, Registration::Server(id.entity_id)))
    }

    pub(crate) fn update_server_methods(&self, id: EntityId, methods: Vec<ServiceMethodInformation>) {
        let record = self.state.lock().set_local_methods(id, methods);
        if let Some(record) = record {
            self.domain
                .broadcast(self.id, &[Announcement::Service(record)]);
        }
    }

    fn unregister_server(&self, id: EntityId) {
        self.domain.remove_server(id);
        let removed = {
            let mut state = self.state.lock();
            let removed = state.remove_service(id).is_some();
            self.settle_clients(&mut state);
            removed
        };
        if removed {
            log::debug!("[Registry] unregistered service server {}", id);
            self.domain
                .broadcast(self.id, &[Announcement::ServiceGone(id)]);
        }
    }

    pub(crate) fn register_client(
        self: &Arc<Self>,
        id: Arc<ServiceId>,
        host_filter: Option<String>,
        events: Arc<CallbackSlot<ClientEventHandler>>,
    ) -> Result<RegistrationToken> {
        self.ensure_open()?;
        let entity_id = id.entity_id;
        {
            let mut state = self.state.lock();
            state.insert_client(LocalClient::new(id, host_filter, events));
            self.settle_clients(&mut state);
        }
        Ok(RegistrationToken::new(self, Registration::Client(entity_id)))
    }

    pub(crate) fn set_client_host_filter(&self, id: EntityId, host_filter: Option<String>) {
        let mut state = self.state.lock();
        state.set_client_host_filter(id, host_filter);
        self.settle_clients(&mut state);
    }

    pub(crate) fn client_connected(&self, id: EntityId) -> bool {
        self.state.lock().client_connected(id)
    }

    fn unregister_client(&self, id: EntityId) {
        self.state.lock().remove_client(id);
    }

    /// Servers of a service, optionally restricted to one host.
    pub(crate) fn resolve_servers(&self, service_name: &str, host_filter: Option<&str>) -> Vec<Arc<ServiceId>> {
        self.state.lock().resolve_servers(service_name, host_filter)
    }

    pub(crate) fn server_methods(&self, server: EntityId) -> Option<Vec<ServiceMethodInformation>> {
        self.state.lock().service_methods(server)
    }

    /// Request queue of a server, if reachable from this registry.
    pub(crate) fn server_queue(&self, server: EntityId) -> Option<Sender<RequestEnvelope>> {
        self.domain.server(self.id, server)
    }

    fn settle_clients(&self, state: &mut RegistryState) {
        let transitions: Vec<ClientTransition> = state.reconcile_clients();
        if transitions.is_empty() {
            return;
        }
        let time_us = now_micros();
        for transition in transitions {
            let Some(slot) = state.client_events(transition.client) else {
                continue;
            };
            log::debug!(
                "[Registry] client {} {:?} server {}",
                transition.client,
                transition.kind,
                transition.server
            );
            let event = ClientEvent {
                kind: transition.kind,
                server: (*transition.server).clone(),
                time_us,
            };
            self.notifier.enqueue(move || {
                slot.invoke(|handler| handler(&event));
            });
        }
    }

    // -------------------------------------------------------------------
    // Registration exchange
    // -------------------------------------------------------------------

    /// Current registrations of every local endpoint.
    pub(crate) fn local_announcements(&self) -> Vec<Announcement> {
        let state = self.state.lock();
        state
            .local_topic_records()
            .into_iter()
            .map(Announcement::Topic)
            .chain(
                state
                    .local_service_records()
                    .into_iter()
                    .map(Announcement::Service),
            )
            .collect()
    }

    /// Re-announce every local endpoint to reachable peers.
    pub(crate) fn announce_all(&self) {
        let announcements = self.local_announcements();
        self.domain.broadcast(self.id, &announcements);
    }

    /// Apply announcements received from another registry.
    pub(crate) fn apply_remote(&self, from: EntityId, announcements: &[Announcement]) {
        if from == self.id || self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut topics_changed = false;
        let mut services_changed = false;
        let mut transitions = Vec::new();

        for announcement in announcements {
            match announcement {
                Announcement::Topic(record) => {
                    topics_changed |= state.upsert_remote_topic(record.clone(), now);
                }
                Announcement::TopicGone(id) => {
                    let (entry, mut gone) = state.remove_topic(*id);
                    topics_changed |= entry.is_some();
                    transitions.append(&mut gone);
                }
                Announcement::Service(record) => {
                    services_changed |= state.upsert_remote_service(record.clone(), now);
                }
                Announcement::ServiceGone(id) => {
                    services_changed |= state.remove_service(*id).is_some();
                }
            }
        }

        if topics_changed {
            self.settle_topics(&mut state, transitions);
        }
        if services_changed {
            self.settle_clients(&mut state);
        }
    }

    /// Drop remote entries whose refresh is overdue.
    fn expire_stale(&self) {
        let timeout = self.config.read().registration.timeout();
        let mut expired_topics = Vec::new();
        let mut expired_services = Vec::new();
        {
            let mut state = self.state.lock();
            let (topics, services) = state.stale_entries(Instant::now(), timeout);
            if topics.is_empty() && services.is_empty() {
                return;
            }
            let mut transitions = Vec::new();
            for id in topics {
                let (entry, mut gone) = state.remove_topic(id);
                if let Some(entry) = entry {
                    expired_topics.push(entry.record.id);
                }
                transitions.append(&mut gone);
            }
            for id in services {
                if let Some(entry) = state.remove_service(id) {
                    expired_services.push(entry.record.id);
                }
            }
            self.settle_topics(&mut state, transitions);
            self.settle_clients(&mut state);
        }

        for topic in expired_topics {
            self.diagnostics.report(Diagnostic::TopicExpired {
                topic: (*topic).clone(),
            });
        }
        for service in expired_services {
            self.diagnostics.report(Diagnostic::ServiceExpired {
                service: (*service).clone(),
            });
        }
    }

    fn start_refresh_worker(self: &Arc<Self>) -> Result<()> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let weak: Weak<Registry> = Arc::downgrade(self);
        let interval = self.config.read().registration.refresh_interval();

        let handle = thread::Builder::new()
            .name("hmesh-refresh".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let Some(registry) = weak.upgrade() else {
                    break;
                };
                if !registry.is_running() {
                    log::debug!("[Registry] {} refresh stopped", registry.id);
                    break;
                }
                registry.announce_all();
                registry.expire_stale();
            })
            .map_err(Error::WorkerSpawn)?;

        *self.refresh.lock() = Some(RefreshWorker {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Stop workers, withdraw every local registration and leave the domain.
    ///
    /// Endpoints still alive afterwards can no longer reach peers; creating
    /// new endpoints fails with [`Error::Shutdown`].
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(worker) = self.refresh.lock().take() {
            drop(worker.stop);
            join_unless_current(worker.handle);
        }

        let gone: Vec<Announcement> = self
            .local_announcements()
            .into_iter()
            .filter_map(|a| match a {
                Announcement::Topic(record) => Some(Announcement::TopicGone(record.entity_id())),
                Announcement::Service(record) => {
                    Some(Announcement::ServiceGone(record.entity_id()))
                }
                _ => None,
            })
            .collect();
        self.domain.broadcast(self.id, &gone);
        self.domain.leave(self.id);
        self.notifier.shutdown();

        log::debug!("[Registry] {} shut down", self.id);
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.id)
            .field("host_name", &self.host_name)
            .field("process_id", &self.process_id)
            .field("carriers", &self.carriers)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Registration {
    Topic(EntityId),
    Server(EntityId),
    Client(EntityId),
}

/// Keeps one endpoint registered; unregisters on release or drop.
#[derive(Debug)]
pub(crate) struct RegistrationToken {
    registry: Weak<Registry>,
    registration: Option<Registration>,
}

impl RegistrationToken {
    fn new(registry: &Arc<Registry>, registration: Registration) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            registration: Some(registration),
        }
    }

    /// Unregister now. Idempotent.
    pub(crate) fn release(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match registration {
            Registration::Topic(id) => registry.unregister_topic(id),
            Registration::Server(id) => registry.unregister_server(id),
            Registration::Client(id) => registry.unregister_client(id),
        }
    }
}

impl Drop for RegistrationToken {
    fn drop(&mut self) {
        self.release();
    }
}
