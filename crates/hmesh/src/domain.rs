// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process medium shared by registries.
//!
//! A [`Domain`] stands in for the network and IPC fabric: it carries
//! registration announcements between registries, resolves subscriber inboxes
//! and service request queues, and can cut a registry off to simulate a crash
//! or partition.
//!
//! ```text
//!   Registry A ─┐                      ┌─ Registry B
//!               ├── announcements ────►│
//!   Publisher ──┼── inbox(sub) ───────►│── Subscriber worker
//!   Client ─────┼── server(id) ───────►│── ServiceServer pool
//!               └──────── Domain ──────┘
//! ```
//!
//! A detached registry keeps working locally but neither sends nor receives
//! anything across the boundary. Its peers notice through registration expiry.

use crate::core::EntityId;
use crate::registry::announce::Announcement;
use crate::registry::Registry;
use crate::service::RequestEnvelope;
use crate::transport::Sample;
use crossbeam::channel::Sender;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

struct Endpoint<T> {
    owner: EntityId,
    sender: Sender<T>,
}

/// Shared medium connecting registries.
#[derive(Default)]
pub struct Domain {
    members: RwLock<HashMap<EntityId, Weak<Registry>>>,
    detached: RwLock<HashSet<EntityId>>,
    inboxes: DashMap<EntityId, Endpoint<Sample>>,
    servers: DashMap<EntityId, Endpoint<RequestEnvelope>>,
}

impl Domain {
    /// Create an empty domain.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of live registries attached to this domain.
    pub fn registry_count(&self) -> usize {
        self.members
            .read()
            .values()
            .filter(|member| member.strong_count() > 0)
            .count()
    }

    /// Cut a registry off from every other registry.
    pub fn detach(&self, registry: &Registry) {
        if self.detached.write().insert(registry.id()) {
            log::debug!("[Domain] registry {} detached", registry.id());
        }
    }

    /// Reconnect a detached registry and exchange registrations right away.
    pub fn reattach(&self, registry: &Arc<Registry>) {
        if !self.detached.write().remove(&registry.id()) {
            return;
        }
        log::debug!("[Domain] registry {} reattached", registry.id());
        self.sync_with_peers(registry);
        registry.announce_all();
    }

    /// True if the registry is currently cut off.
    pub fn is_detached(&self, registry: &Registry) -> bool {
        self.detached.read().contains(&registry.id())
    }

    fn reachable(&self, from: EntityId, to: EntityId) -> bool {
        if from == to {
            return true;
        }
        let detached = self.detached.read();
        !detached.contains(&from) && !detached.contains(&to)
    }

    fn peers_of(&self, id: EntityId) -> Vec<Arc<Registry>> {
        let members: Vec<(EntityId, Arc<Registry>)> = self
            .members
            .read()
            .iter()
            .filter(|(member_id, _)| **member_id != id)
            .filter_map(|(member_id, weak)| weak.upgrade().map(|r| (*member_id, r)))
            .collect();
        members
            .into_iter()
            .filter(|(member_id, _)| self.reachable(id, *member_id))
            .map(|(_, registry)| registry)
            .collect()
    }

    // -------------------------------------------------------------------
    // Registration plumbing
    // -------------------------------------------------------------------

    pub(crate) fn join(&self, registry: &Arc<Registry>) {
        self.members
            .write()
            .insert(registry.id(), Arc::downgrade(registry));
        self.sync_with_peers(registry);
    }

    pub(crate) fn leave(&self, id: EntityId) {
        self.members.write().remove(&id);
        self.detached.write().remove(&id);
        self.inboxes.retain(|_, endpoint| endpoint.owner != id);
        self.servers.retain(|_, endpoint| endpoint.owner != id);
    }

    /// Pull every peer's local registrations into `registry`.
    fn sync_with_peers(&self, registry: &Arc<Registry>) {
        for peer in self.peers_of(registry.id()) {
            let records = peer.local_announcements();
            registry.apply_remote(peer.id(), &records);
        }
    }

    /// Deliver announcements from `from` to every reachable peer.
    pub(crate) fn broadcast(&self, from: EntityId, announcements: &[Announcement]) {
        if announcements.is_empty() || !self.members.read().contains_key(&from) {
            return;
        }
        for peer in self.peers_of(from) {
            peer.apply_remote(from, announcements);
        }
    }

    // -------------------------------------------------------------------
    // Data and service paths
    // -------------------------------------------------------------------

    pub(crate) fn register_inbox(&self, owner: EntityId, subscriber: EntityId, sender: Sender<Sample>) {
        self.inboxes.insert(subscriber, Endpoint { owner, sender });
    }

    pub(crate) fn remove_inbox(&self, subscriber: EntityId) {
        self.inboxes.remove(&subscriber);
    }

    /// Inbox of a subscriber as seen from registry `from`.
    pub(crate) fn inbox(&self, from: EntityId, subscriber: EntityId) -> Option<Sender<Sample>> {
        let endpoint = self.inboxes.get(&subscriber)?;
        if !self.reachable(from, endpoint.owner) {
            return None;
        }
        Some(endpoint.sender.clone())
    }

    pub(crate) fn register_server(
        &self,
        owner: EntityId,
        server: EntityId,
        sender: Sender<RequestEnvelope>,
    ) {
        self.servers.insert(server, Endpoint { owner, sender });
    }

    pub(crate) fn remove_server(&self, server: EntityId) {
        self.servers.remove(&server);
    }

    /// Request queue of a service server as seen from registry `from`.
    pub(crate) fn server(&self, from: EntityId, server: EntityId) -> Option<Sender<RequestEnvelope>> {
        let endpoint = self.servers.get(&server)?;
        if !self.reachable(from, endpoint.owner) {
            return None;
        }
        Some(endpoint.sender.clone())
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("registries", &self.registry_count())
            .field("inboxes", &self.inboxes.len())
            .field("servers", &self.servers.len())
            .finish()
    }
}
