// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher endpoint.
//!
//! `send` reads the current route snapshot (one `arc_swap` load), stamps the
//! sample with the next send clock and hands it to the carrier of every
//! connected subscriber. It never waits for discovery.

use super::event::{EventHandler, TopicEvent};
use crate::callback::CallbackSlot;
use crate::config::{LayerConfig, LayerPriority, PublisherConfig};
use crate::core::{now_micros, TopicId, TypeDescriptor};
use crate::diagnostics::Diagnostic;
use crate::error::{Error, Result};
use crate::registry::state::RouteTable;
use crate::registry::{EndpointRole, Registry, RegistrationToken, TopicRegistration};
use crate::transport::Sample;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Builder for [`Publisher`].
pub struct PublisherBuilder {
    registry: Arc<Registry>,
    topic_name: String,
    descriptor: TypeDescriptor,
    config: Option<PublisherConfig>,
    on_event: Option<Arc<EventHandler>>,
}

impl PublisherBuilder {
    /// Type descriptor advertised with the topic.
    pub fn descriptor(mut self, descriptor: TypeDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Override the registry's publisher defaults.
    pub fn config(mut self, config: PublisherConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Install the event callback before registration, so no event is missed.
    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TopicEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(handler));
        self
    }

    /// Register the publisher.
    pub fn build(self) -> Result<Publisher> {
        let config = self
            .config
            .unwrap_or_else(|| self.registry.config().publisher);
        let id = self.registry.topic_id(&self.topic_name)?;
        let events: Arc<CallbackSlot<EventHandler>> = Arc::new(CallbackSlot::new());
        if let Some(handler) = self.on_event {
            events.set(handler);
        }
        let routes: Arc<RouteTable> = Arc::new(ArcSwap::from_pointee(Vec::new()));

        let token = self.registry.register_topic(TopicRegistration {
            id: id.clone(),
            role: EndpointRole::Publisher,
            descriptor: self.descriptor.clone(),
            layers: config.layers,
            priority: config.priority,
            events: events.clone(),
            routes: Some(routes.clone()),
            clock_resets: None,
        })?;

        Ok(Publisher {
            registry: self.registry,
            id,
            descriptor: self.descriptor,
            routes,
            events,
            clock: AtomicU64::new(0),
            send_lock: Mutex::new(()),
            token: Mutex::new(token),
            disposed: AtomicBool::new(false),
        })
    }
}

/// Writes samples to every connected subscriber of one topic.
pub struct Publisher {
    registry: Arc<Registry>,
    id: Arc<TopicId>,
    descriptor: TypeDescriptor,
    routes: Arc<RouteTable>,
    events: Arc<CallbackSlot<EventHandler>>,
    clock: AtomicU64,
    send_lock: Mutex<()>,
    token: Mutex<RegistrationToken>,
    disposed: AtomicBool,
}

impl Publisher {
    /// Start building a publisher for `topic_name`.
    pub fn builder(registry: &Arc<Registry>, topic_name: &str) -> PublisherBuilder {
        PublisherBuilder {
            registry: registry.clone(),
            topic_name: topic_name.to_string(),
            descriptor: TypeDescriptor::default(),
            config: None,
            on_event: None,
        }
    }

    /// Publisher with the registry's default configuration.
    pub fn new(registry: &Arc<Registry>, topic_name: &str, descriptor: TypeDescriptor) -> Result<Self> {
        Self::builder(registry, topic_name)
            .descriptor(descriptor)
            .build()
    }

    /// Send one sample.
    ///
    /// `timestamp` defaults to now (microseconds since the UNIX epoch); an
    /// explicit value is passed through unchanged. Returns `Ok(false)` when no
    /// subscriber is connected, no carrier accepted the sample, or the
    /// registry is no longer running.
    pub fn send(&self, payload: &[u8], timestamp: Option<i64>) -> Result<bool> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed(format!("publisher {}", self.id)));
        }
        if !self.registry.is_running() {
            return Ok(false);
        }
        let routes = self.routes.load_full();
        if routes.is_empty() {
            return Ok(false);
        }

        let _ordered = self.send_lock.lock();
        let send_clock = self.clock.fetch_add(1, Ordering::AcqRel) + 1;
        let send_timestamp = timestamp.unwrap_or_else(now_micros);
        let payload: Arc<[u8]> = Arc::from(payload);

        let mut handed_off = 0usize;
        for route in routes.iter() {
            let sample = Sample {
                sender: self.id.clone(),
                descriptor: self.descriptor.clone(),
                payload: payload.clone(),
                send_timestamp,
                send_clock,
                session: route.session,
                layer: route.layer,
            };
            match self.registry.deliver(route, sample) {
                Ok(()) => handed_off += 1,
                Err(err) => {
                    log::debug!(
                        "[Publisher] {} -> {} over {} failed: {}",
                        self.id,
                        route.subscriber,
                        route.layer,
                        err
                    );
                    self.registry.diagnostics().report(Diagnostic::SendFailed {
                        publisher: (*self.id).clone(),
                        layer: route.layer,
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok(handed_off > 0)
    }

    /// Install or replace the event callback.
    pub fn set_event_callback<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&TopicEvent) + Send + Sync + 'static,
    {
        if !self.events.set(Arc::new(handler)) {
            return Err(Error::Disposed(format!("publisher {}", self.id)));
        }
        Ok(())
    }

    /// Remove the event callback, waiting for a running invocation.
    pub fn remove_event_callback(&self) {
        self.events.clear();
    }

    /// Change the carriers this publisher writes on.
    pub fn set_layer_config(&self, layers: LayerConfig) -> Result<()> {
        self.ensure_alive()?;
        self.registry
            .update_topic_layers(self.id.entity_id, Some(layers), None);
        Ok(())
    }

    /// Change the advertised carrier preference.
    pub fn set_layer_priority(&self, priority: LayerPriority) -> Result<()> {
        self.ensure_alive()?;
        self.registry
            .update_topic_layers(self.id.entity_id, None, Some(priority));
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed(format!("publisher {}", self.id)));
        }
        Ok(())
    }

    /// Endpoint identity.
    pub fn topic_id(&self) -> &TopicId {
        &self.id
    }

    /// Topic name.
    pub fn topic_name(&self) -> &str {
        &self.id.topic_name
    }

    /// Advertised type descriptor.
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.routes.load().len()
    }

    /// True if at least one subscriber is connected.
    pub fn is_connected(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Clock of the last sample sent (0 before the first hand-off).
    pub fn send_clock(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Unregister, wait for a running event callback and release routes.
    ///
    /// Idempotent; also performed on drop. Later `send` calls fail with
    /// [`Error::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.token.lock().release();
        self.events.close();
        self.routes.store(Arc::new(Vec::new()));
        log::debug!("[Publisher] {} disposed", self.id);
    }

    /// True once disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("subscribers", &self.subscriber_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
