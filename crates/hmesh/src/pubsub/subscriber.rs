// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber endpoint.
//!
//! ```text
//! carriers ──► inbox (bounded, FIFO) ──► delivery worker ──► ClockTracker ──► receive callback
//!                                                         └─► Dropped event on clock gaps
//! ```
//!
//! One worker per subscriber, so callbacks of one subscriber never overlap and
//! samples of one publisher arrive in send order.

use super::clock::{ClockTracker, ClockVerdict};
use super::event::{EventHandler, EventKind, ReceiveData, ReceiveHandler, TopicEvent};
use crate::callback::CallbackSlot;
use crate::config::{LayerConfig, LayerPriority, SubscriberConfig};
use crate::core::{now_micros, EntityId, TopicId, TypeDescriptor};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::{Error, Result};
use crate::lifecycle::join_unless_current;
use crate::registry::{EndpointRole, Registry, RegistrationToken, TopicRegistration};
use crate::transport::Sample;
use crossbeam::channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Builder for [`Subscriber`].
pub struct SubscriberBuilder {
    registry: Arc<Registry>,
    topic_name: String,
    descriptor: Option<TypeDescriptor>,
    config: Option<SubscriberConfig>,
    on_receive: Option<Arc<ReceiveHandler>>,
    on_event: Option<Arc<EventHandler>>,
}

impl SubscriberBuilder {
    /// Only connect to publishers with a compatible descriptor.
    pub fn descriptor(mut self, descriptor: TypeDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Override the registry's subscriber defaults.
    pub fn config(mut self, config: SubscriberConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Install the receive callback before registration.
    pub fn on_receive<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ReceiveData<'_>) + Send + Sync + 'static,
    {
        self.on_receive = Some(Arc::new(handler));
        self
    }

    /// Install the event callback before registration.
    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TopicEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(handler));
        self
    }

    /// Start the delivery worker and register the subscriber.
    pub fn build(self) -> Result<Subscriber> {
        let config = self
            .config
            .unwrap_or_else(|| self.registry.config().subscriber);
        if config.inbox_capacity == 0 {
            return Err(Error::InvalidConfig(
                "subscriber inbox_capacity must be > 0".to_string(),
            ));
        }
        let id = self.registry.topic_id(&self.topic_name)?;

        let receive: Arc<CallbackSlot<ReceiveHandler>> = Arc::new(CallbackSlot::new());
        if let Some(handler) = self.on_receive {
            receive.set(handler);
        }
        let events: Arc<CallbackSlot<EventHandler>> = Arc::new(CallbackSlot::new());
        if let Some(handler) = self.on_event {
            events.set(handler);
        }
        let drops = Arc::new(AtomicU64::new(0));

        let (inbox_tx, inbox_rx) = bounded::<Sample>(config.inbox_capacity);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (reset_tx, reset_rx) = unbounded::<EntityId>();
        let worker = DeliveryWorker {
            id: id.clone(),
            receive: receive.clone(),
            events: events.clone(),
            drops: drops.clone(),
            diagnostics: self.registry.diagnostics().clone(),
            clocks: ClockTracker::new(config.drop_out_of_order_messages),
        };
        let handle = thread::Builder::new()
            .name("hmesh-sub".to_string())
            .spawn(move || worker.run(inbox_rx, reset_rx, stop_rx))
            .map_err(Error::WorkerSpawn)?;

        self.registry.register_inbox(id.entity_id, inbox_tx);
        let registration = self.registry.register_topic(TopicRegistration {
            id: id.clone(),
            role: EndpointRole::Subscriber,
            descriptor: self.descriptor.clone().unwrap_or_default(),
            layers: config.layers,
            priority: config.priority,
            events: events.clone(),
            routes: None,
            clock_resets: Some(reset_tx),
        });
        let token = match registration {
            Ok(token) => token,
            Err(err) => {
                self.registry.remove_inbox(id.entity_id);
                drop(stop_tx);
                join_unless_current(handle);
                return Err(err);
            }
        };

        Ok(Subscriber {
            registry: self.registry,
            id,
            descriptor: self.descriptor,
            receive,
            events,
            drops,
            token: Mutex::new(token),
            stop: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(handle)),
            disposed: AtomicBool::new(false),
        })
    }
}

/// Receives samples from every connected publisher of one topic.
pub struct Subscriber {
    registry: Arc<Registry>,
    id: Arc<TopicId>,
    descriptor: Option<TypeDescriptor>,
    receive: Arc<CallbackSlot<ReceiveHandler>>,
    events: Arc<CallbackSlot<EventHandler>>,
    drops: Arc<AtomicU64>,
    token: Mutex<RegistrationToken>,
    stop: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Subscriber {
    /// Start building a subscriber for `topic_name`.
    pub fn builder(registry: &Arc<Registry>, topic_name: &str) -> SubscriberBuilder {
        SubscriberBuilder {
            registry: registry.clone(),
            topic_name: topic_name.to_string(),
            descriptor: None,
            config: None,
            on_receive: None,
            on_event: None,
        }
    }

    /// Subscriber with the registry's defaults. `None` accepts any type.
    pub fn new(
        registry: &Arc<Registry>,
        topic_name: &str,
        descriptor: Option<TypeDescriptor>,
    ) -> Result<Self> {
        let builder = Self::builder(registry, topic_name);
        match descriptor {
            Some(descriptor) => builder.descriptor(descriptor).build(),
            None => builder.build(),
        }
    }

    /// Install or replace the receive callback. At most one is active.
    pub fn set_receive_callback<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&ReceiveData<'_>) + Send + Sync + 'static,
    {
        if !self.receive.set(Arc::new(handler)) {
            return Err(Error::Disposed(format!("subscriber {}", self.id)));
        }
        Ok(())
    }

    /// Detach the receive callback; returns after any running invocation.
    pub fn remove_receive_callback(&self) {
        self.receive.clear();
    }

    /// Install or replace the event callback.
    pub fn set_event_callback<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&TopicEvent) + Send + Sync + 'static,
    {
        if !self.events.set(Arc::new(handler)) {
            return Err(Error::Disposed(format!("subscriber {}", self.id)));
        }
        Ok(())
    }

    /// Remove the event callback.
    pub fn remove_event_callback(&self) {
        self.events.clear();
    }

    /// Change the carriers this subscriber accepts.
    pub fn set_layer_config(&self, layers: LayerConfig) -> Result<()> {
        self.ensure_alive()?;
        self.registry
            .update_topic_layers(self.id.entity_id, Some(layers), None);
        Ok(())
    }

    /// Change the receive-side carrier preference.
    pub fn set_layer_priority(&self, priority: LayerPriority) -> Result<()> {
        self.ensure_alive()?;
        self.registry
            .update_topic_layers(self.id.entity_id, None, Some(priority));
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed(format!("subscriber {}", self.id)));
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

    /// Type filter, `None` when any type is accepted.
    pub fn descriptor(&self) -> Option<&TypeDescriptor> {
        self.descriptor.as_ref()
    }

    /// Number of currently connected publishers.
    pub fn publisher_count(&self) -> usize {
        if self.is_disposed() {
            return 0;
        }
        self.registry.connected_peers(self.id.entity_id)
    }

    /// True if at least one publisher is connected.
    pub fn is_connected(&self) -> bool {
        self.publisher_count() > 0
    }

    /// Samples detected as lost through send clock gaps.
    pub fn message_drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Unregister, stop delivery and wait for running callbacks.
    ///
    /// Safe to call from inside this subscriber's own callbacks. Idempotent;
    /// also performed on drop.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.token.lock().release();
        self.registry.remove_inbox(self.id.entity_id);
        self.receive.close();
        self.events.close();
        self.stop.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            join_unless_current(worker);
        }
        log::debug!("[Subscriber] {} disposed", self.id);
    }

    /// True once disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("message_drops", &self.message_drops())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct DeliveryWorker {
    id: Arc<TopicId>,
    receive: Arc<CallbackSlot<ReceiveHandler>>,
    events: Arc<CallbackSlot<EventHandler>>,
    drops: Arc<AtomicU64>,
    diagnostics: Arc<dyn DiagnosticSink>,
    clocks: ClockTracker,
}

impl DeliveryWorker {
    fn run(mut self, inbox: Receiver<Sample>, resets: Receiver<EntityId>, stop: Receiver<()>) {
        loop {
            select! {
                recv(inbox) -> sample => match sample {
                    Ok(sample) => self.deliver(&sample),
                    Err(_) => break,
                },
                recv(resets) -> publisher => match publisher {
                    Ok(publisher) => {
                        self.clocks.forget(publisher);
                        log::trace!("[Subscriber] {} reset send clock of {}", self.id, publisher);
                    }
                    // Unregistered.
                    Err(_) => break,
                },
                recv(stop) -> _ => break,
            }
        }
        log::trace!("[Subscriber] {} delivery worker exiting", self.id);
    }

    fn deliver(&mut self, sample: &Sample) {
        match self.clocks.check(sample.sender.entity_id, sample.session, sample.send_clock) {
            ClockVerdict::Deliver => {}
            ClockVerdict::Drop => {
                log::trace!(
                    "[Subscriber] {} dropping clock {} from {}",
                    self.id,
                    sample.send_clock,
                    sample.sender
                );
                return;
            }
            ClockVerdict::DeliverOutOfOrder => {
                log::warn!(
                    "[Subscriber] {} received out-of-order clock {} from {}",
                    self.id,
                    sample.send_clock,
                    sample.sender
                );
            }
            ClockVerdict::DeliverAfterGap { missing } => self.report_gap(sample, missing),
        }

        let data = ReceiveData {
            sender: &sample.sender,
            descriptor: &sample.descriptor,
            payload: &sample.payload,
            send_timestamp: sample.send_timestamp,
            send_clock: sample.send_clock,
            layer: sample.layer,
        };
        self.receive.invoke(|handler| handler(&data));
    }

    fn report_gap(&self, sample: &Sample, missing: u64) {
        self.drops.fetch_add(missing, Ordering::Relaxed);
        self.diagnostics.report(Diagnostic::MessagesDropped {
            subscriber: (*self.id).clone(),
            publisher: sample.sender.entity_id,
            count: missing,
        });
        let event = TopicEvent {
            kind: EventKind::Dropped { count: missing },
            peer: (*sample.sender).clone(),
            peer_descriptor: sample.descriptor.clone(),
            layer: Some(sample.layer),
            time_us: now_micros(),
        };
        self.events.invoke(|handler| handler(&event));
    }
}
