// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service client.
//!
//! Servers are resolved through the registry at every call, so a call reaches
//! whatever servers are known at that moment. Two call styles:
//!
//! - [`ServiceClient::call_with_response`] blocks and returns every in-time answer
//! - [`ServiceClient::call_with_callback`] returns at once and hands answers to
//!   a callback on a collector thread

use super::aggregator::{CallAggregator, CallEnd};
use super::types::{ClientEvent, ClientEventHandler, ServiceMethodInformation, ServiceResponse};
use crate::callback::CallbackSlot;
use crate::core::ServiceId;
use crate::error::{Error, Result};
use crate::lifecycle::join_unless_current;
use crate::registry::{Registry, RegistrationToken};
use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Builder for [`ServiceClient`].
pub struct ServiceClientBuilder {
    registry: Arc<Registry>,
    service_name: String,
    host_filter: Option<String>,
    on_event: Option<Arc<ClientEventHandler>>,
}

impl ServiceClientBuilder {
    /// Only call servers running on `host_name`.
    pub fn host_filter(mut self, host_name: impl Into<String>) -> Self {
        self.host_filter = Some(host_name.into());
        self
    }

    /// Install the event callback before registration, so no event is missed.
    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(handler));
        self
    }

    /// Register the client.
    pub fn build(self) -> Result<ServiceClient> {
        let id = self.registry.service_id(&self.service_name)?;
        let events: Arc<CallbackSlot<ClientEventHandler>> = Arc::new(CallbackSlot::new());
        if let Some(handler) = self.on_event {
            events.set(handler);
        }
        let token =
            self.registry
                .register_client(id.clone(), self.host_filter.clone(), events.clone())?;
        let (cancel_tx, cancel_rx) = bounded::<()>(0);

        Ok(ServiceClient {
            registry: self.registry,
            id,
            host_filter: RwLock::new(self.host_filter),
            events,
            token: Mutex::new(token),
            cancel: Mutex::new(Some(cancel_tx)),
            cancelled: cancel_rx,
            collectors: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }
}

/// Calls the methods of one named service on every matching server.
pub struct ServiceClient {
    registry: Arc<Registry>,
    id: Arc<ServiceId>,
    host_filter: RwLock<Option<String>>,
    events: Arc<CallbackSlot<ClientEventHandler>>,
    token: Mutex<RegistrationToken>,
    /// Dropped on dispose; every in-flight call watches `cancelled`.
    cancel: Mutex<Option<Sender<()>>>,
    cancelled: Receiver<()>,
    collectors: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl ServiceClient {
    /// Start building a client for `service_name`.
    pub fn builder(registry: &Arc<Registry>, service_name: &str) -> ServiceClientBuilder {
        ServiceClientBuilder {
            registry: registry.clone(),
            service_name: service_name.to_string(),
            host_filter: None,
            on_event: None,
        }
    }

    /// Client reaching servers on every host.
    pub fn new(registry: &Arc<Registry>, service_name: &str) -> Result<Self> {
        Self::builder(registry, service_name).build()
    }

    /// Call `method` on every server and wait for the answers.
    ///
    /// Returns one response per server that answered before `timeout`;
    /// servers that did not are absent. `None` waits until every server
    /// answered or went away. No server resolved gives an empty vector.
    pub fn call_with_response(
        &self,
        method: &str,
        request: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<ServiceResponse>> {
        let aggregator = self.dispatch(method, request, timeout)?;
        Ok(aggregator.collect(&self.cancelled))
    }

    /// [`call_with_response`](Self::call_with_response) with the configured
    /// `service.default_timeout_ms`.
    pub fn call(&self, method: &str, request: &[u8]) -> Result<Vec<ServiceResponse>> {
        let timeout = self.registry.config().service.default_timeout();
        self.call_with_response(method, request, Some(timeout))
    }

    /// Call `method` on every server without blocking.
    ///
    /// `on_response` runs on a collector thread once per in-time answer.
    /// Returns `Ok(false)` when no server could be reached.
    pub fn call_with_callback<F>(
        &self,
        method: &str,
        request: &[u8],
        on_response: F,
        timeout: Option<Duration>,
    ) -> Result<bool>
    where
        F: Fn(&ServiceResponse) + Send + 'static,
    {
        let mut aggregator = self.dispatch(method, request, timeout)?;
        if aggregator.pending() == 0 {
            return Ok(false);
        }

        let cancelled = self.cancelled.clone();
        let client = self.id.clone();
        let handle = thread::Builder::new()
            .name("hmesh-call".to_string())
            .spawn(move || {
                while let Some(response) = aggregator.next_response(&cancelled) {
                    if catch_unwind(AssertUnwindSafe(|| on_response(&response))).is_err() {
                        log::error!("[ServiceClient] {} response callback panicked", client);
                    }
                }
                log::trace!(
                    "[ServiceClient] {} call finished: {:?}",
                    client,
                    aggregator.end()
                );
            })
            .map_err(Error::WorkerSpawn)?;

        let mut collectors = self.collectors.lock();
        collectors.retain(|collector| !collector.is_finished());
        collectors.push(handle);
        Ok(true)
    }

    fn dispatch(
        &self,
        method: &str,
        request: &[u8],
        timeout: Option<Duration>,
    ) -> Result<CallAggregator> {
        self.ensure_alive()?;
        if method.is_empty() {
            return Err(Error::InvalidArgument("method name is empty".to_string()));
        }
        let servers = self
            .registry
            .resolve_servers(&self.id.service_name, self.host_filter.read().as_deref());
        log::trace!(
            "[ServiceClient] {} calling '{}' on {} server(s)",
            self.id,
            method,
            servers.len()
        );
        Ok(CallAggregator::dispatch(
            &self.registry,
            &servers,
            method,
            request,
            timeout,
        ))
    }

    /// One handle per currently known server.
    pub fn instances(&self) -> Vec<ClientInstance> {
        if self.is_disposed() {
            return Vec::new();
        }
        self.registry
            .resolve_servers(&self.id.service_name, self.host_filter.read().as_deref())
            .into_iter()
            .map(|server| ClientInstance {
                registry: self.registry.clone(),
                server,
                cancelled: self.cancelled.clone(),
            })
            .collect()
    }

    /// Restrict calls to servers on `host_name`; `None` lifts the restriction.
    pub fn set_host_filter(&self, host_name: Option<&str>) {
        let host_filter = host_name.map(str::to_string);
        *self.host_filter.write() = host_filter.clone();
        self.registry
            .set_client_host_filter(self.id.entity_id, host_filter);
    }

    /// True if at least one matching server is known.
    pub fn is_connected(&self) -> bool {
        !self.is_disposed() && self.registry.client_connected(self.id.entity_id)
    }

    /// Install or replace the event callback.
    pub fn set_event_callback<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        if !self.events.set(Arc::new(handler)) {
            return Err(Error::Disposed(format!("service client {}", self.id)));
        }
        Ok(())
    }

    /// Remove the event callback, waiting for a running invocation.
    pub fn remove_event_callback(&self) {
        self.events.clear();
    }

    /// Client identity.
    pub fn service_id(&self) -> &ServiceId {
        &self.id
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed(format!("service client {}", self.id)));
        }
        Ok(())
    }

    /// Unregister, cancel in-flight calls and wait for their collectors.
    ///
    /// Idempotent; also performed on drop.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.token.lock().release();
        self.events.close();
        self.cancel.lock().take();
        let collectors = std::mem::take(&mut *self.collectors.lock());
        collectors.into_iter().for_each(join_unless_current);
        log::debug!("[ServiceClient] {} disposed", self.id);
    }

    /// True once disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("id", &self.id)
            .field("host_filter", &*self.host_filter.read())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Handle on one server of a [`ServiceClient`]'s service.
#[derive(Clone)]
pub struct ClientInstance {
    registry: Arc<Registry>,
    server: Arc<ServiceId>,
    cancelled: Receiver<()>,
}

impl ClientInstance {
    /// Server this instance calls.
    pub fn server_id(&self) -> &ServiceId {
        &self.server
    }

    /// Methods the server currently advertises.
    pub fn methods(&self) -> Vec<ServiceMethodInformation> {
        self.registry
            .server_methods(self.server.entity_id)
            .unwrap_or_default()
    }

    /// Call `method` on this server only.
    ///
    /// Always yields exactly one response: [`CallState::Timeouted`] when the
    /// deadline passes, [`CallState::Failed`] when the server is unreachable
    /// or goes away before answering.
    ///
    /// [`CallState::Timeouted`]: super::CallState::Timeouted
    /// [`CallState::Failed`]: super::CallState::Failed
    pub fn call_with_response(
        &self,
        method: &str,
        request: &[u8],
        timeout: Option<Duration>,
    ) -> Result<ServiceResponse> {
        // The client's cancel sender is gone once it is disposed or dropped.
        if let Err(TryRecvError::Disconnected) = self.cancelled.try_recv() {
            return Err(Error::Disposed(format!(
                "service client of {}",
                self.server.service_name
            )));
        }
        if method.is_empty() {
            return Err(Error::InvalidArgument("method name is empty".to_string()));
        }
        let mut aggregator = CallAggregator::dispatch(
            &self.registry,
            std::slice::from_ref(&self.server),
            method,
            request,
            timeout,
        );
        if aggregator.pending() == 0 {
            return Ok(ServiceResponse::failed(
                (*self.server).clone(),
                ServiceMethodInformation::untyped(method),
                "server unreachable",
            ));
        }
        if let Some(response) = aggregator.next_response(&self.cancelled) {
            return Ok(response);
        }
        match aggregator.end() {
            CallEnd::TimedOut => Ok(ServiceResponse::timeouted((*self.server).clone(), method)),
            CallEnd::Cancelled => Err(Error::Disposed(format!(
                "service client of {}",
                self.server.service_name
            ))),
            CallEnd::Open | CallEnd::Complete | CallEnd::ServersGone => {
                Ok(ServiceResponse::failed(
                    (*self.server).clone(),
                    ServiceMethodInformation::untyped(method),
                    "server went away",
                ))
            }
        }
    }
}

impl std::fmt::Debug for ClientInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientInstance")
            .field("server", &self.server)
            .finish()
    }
}
