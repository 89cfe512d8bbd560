// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service server.
//!
//! Requests arrive on one queue registered with the [`Domain`](crate::domain::Domain)
//! and are drained by a pool of executor threads. Each request is answered on
//! the reply channel it carries; answers nobody waits for any more are dropped.

use super::types::{MethodHandler, RequestEnvelope, ServiceMethodInformation, ServiceResponse};
use crate::core::{ServiceId, TypeDescriptor};
use crate::error::{Error, Result};
use crate::lifecycle::join_unless_current;
use crate::registry::{Registry, RegistrationToken};
use crossbeam::channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

struct MethodEntry {
    info: ServiceMethodInformation,
    handler: Arc<dyn MethodHandler>,
}

/// State shared between the server handle and its executors.
struct ServerCore {
    id: Arc<ServiceId>,
    methods: RwLock<BTreeMap<String, MethodEntry>>,
    requests_processed: AtomicU64,
}

impl ServerCore {
    fn method_infos(methods: &BTreeMap<String, MethodEntry>) -> Vec<ServiceMethodInformation> {
        methods.values().map(|entry| entry.info.clone()).collect()
    }

    fn process(&self, request: RequestEnvelope) {
        if request.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::trace!(
                "[ServiceServer] {} skipping expired '{}' request",
                self.id,
                request.method
            );
            return;
        }

        let entry = self
            .methods
            .read()
            .get(&request.method)
            .map(|entry| (entry.info.clone(), entry.handler.clone()));

        let response = match entry {
            None => {
                log::debug!(
                    "[ServiceServer] {} has no method '{}'",
                    self.id,
                    request.method
                );
                ServiceResponse::failed(
                    (*self.id).clone(),
                    ServiceMethodInformation::untyped(&request.method),
                    format!("method '{}' not found", request.method),
                )
            }
            Some((info, handler)) => {
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| handler.handle(&info, &request.payload)));
                match outcome {
                    Ok(Ok(response)) => {
                        ServiceResponse::executed((*self.id).clone(), info, response)
                    }
                    Ok(Err(message)) => {
                        log::warn!(
                            "[ServiceServer] {} method '{}' failed: {}",
                            self.id,
                            info.method_name,
                            message
                        );
                        ServiceResponse::failed((*self.id).clone(), info, message)
                    }
                    Err(_) => {
                        log::error!(
                            "[ServiceServer] {} method '{}' panicked",
                            self.id,
                            info.method_name
                        );
                        ServiceResponse::failed(
                            (*self.id).clone(),
                            info,
                            "method handler panicked",
                        )
                    }
                }
            }
        };

        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        if request.reply.send(response).is_err() {
            log::trace!(
                "[ServiceServer] {} discarding late '{}' response",
                self.id,
                request.method
            );
        }
    }

    fn run(&self, requests: Receiver<RequestEnvelope>, stop: Receiver<()>) {
        loop {
            select! {
                recv(requests) -> request => match request {
                    Ok(request) => self.process(request),
                    Err(_) => break,
                },
                recv(stop) -> _ => break,
            }
        }
        log::trace!("[ServiceServer] {} executor exiting", self.id);
    }
}

/// Serves the methods of one named service.
///
/// # Example
///
/// ```rust
/// use hmesh::{Domain, Registry, MeshConfig, TypeDescriptor};
/// use hmesh::service::{ServiceServer, ServiceMethodInformation};
///
/// let domain = Domain::new();
/// let registry = Registry::new(&domain, MeshConfig::default())?;
/// let server = ServiceServer::new(&registry, "math")?;
/// server.add_method(
///     "echo",
///     TypeDescriptor::default(),
///     TypeDescriptor::default(),
///     |_: &ServiceMethodInformation, request: &[u8]| -> Result<Vec<u8>, String> {
///         Ok(request.to_vec())
///     },
/// )?;
/// assert_eq!(server.methods().len(), 1);
/// # Ok::<(), hmesh::Error>(())
/// ```
pub struct ServiceServer {
    registry: Arc<Registry>,
    core: Arc<ServerCore>,
    token: Mutex<RegistrationToken>,
    stop: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl ServiceServer {
    /// Start the executor pool and register the server with no methods.
    pub fn new(registry: &Arc<Registry>, service_name: &str) -> Result<Self> {
        let id = registry.service_id(service_name)?;
        let threads = registry.config().service.server_threads;
        if threads == 0 {
            return Err(Error::InvalidConfig(
                "service.server_threads must be > 0".to_string(),
            ));
        }
        let core = Arc::new(ServerCore {
            id: id.clone(),
            methods: RwLock::new(BTreeMap::new()),
            requests_processed: AtomicU64::new(0),
        });

        let (request_tx, request_rx) = unbounded::<RequestEnvelope>();
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let core = core.clone();
            let requests = request_rx.clone();
            let stop = stop_rx.clone();
            let spawned = thread::Builder::new()
                .name("hmesh-srv".to_string())
                .spawn(move || core.run(requests, stop));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    drop(stop_tx);
                    workers.into_iter().for_each(join_unless_current);
                    return Err(Error::WorkerSpawn(err));
                }
            }
        }

        let token = match registry.register_server(id.clone(), Vec::new(), request_tx) {
            Ok(token) => token,
            Err(err) => {
                drop(stop_tx);
                workers.into_iter().for_each(join_unless_current);
                return Err(err);
            }
        };
        log::info!("[ServiceServer] {} started ({} executors)", id, threads);

        Ok(Self {
            registry: registry.clone(),
            core,
            token: Mutex::new(token),
            stop: Mutex::new(Some(stop_tx)),
            workers: Mutex::new(workers),
            disposed: AtomicBool::new(false),
        })
    }

    /// Register `handler` for `method_name`.
    ///
    /// Re-adding a method with the same types replaces its handler. Different
    /// types fail with [`Error::MethodConflict`].
    pub fn add_method<H: MethodHandler>(
        &self,
        method_name: &str,
        request_type: TypeDescriptor,
        response_type: TypeDescriptor,
        handler: H,
    ) -> Result<()> {
        self.ensure_alive()?;
        if method_name.is_empty() {
            return Err(Error::InvalidArgument("method name is empty".to_string()));
        }
        let info = ServiceMethodInformation::new(method_name, request_type, response_type);

        let mut methods = self.core.methods.write();
        if let Some(existing) = methods.get(method_name) {
            if existing.info != info {
                return Err(Error::MethodConflict(format!(
                    "{} on service {}",
                    method_name, self.core.id.service_name
                )));
            }
        }
        methods.insert(
            method_name.to_string(),
            MethodEntry {
                info,
                handler: Arc::new(handler),
            },
        );
        self.registry
            .update_server_methods(self.core.id.entity_id, ServerCore::method_infos(&methods));
        log::debug!("[ServiceServer] {} added method '{}'", self.core.id, method_name);
        Ok(())
    }

    /// Detach the handler of `method_name`. Returns false if it was not registered.
    pub fn remove_method(&self, method_name: &str) -> bool {
        if self.is_disposed() {
            return false;
        }
        let mut methods = self.core.methods.write();
        if methods.remove(method_name).is_none() {
            return false;
        }
        self.registry
            .update_server_methods(self.core.id.entity_id, ServerCore::method_infos(&methods));
        true
    }

    /// Methods currently served, ordered by name.
    pub fn methods(&self) -> Vec<ServiceMethodInformation> {
        ServerCore::method_infos(&self.core.methods.read())
    }

    /// Server identity.
    pub fn service_id(&self) -> &ServiceId {
        &self.core.id
    }

    /// Service name.
    pub fn service_name(&self) -> &str {
        &self.core.id.service_name
    }

    /// Requests answered so far, failures included.
    pub fn requests_processed(&self) -> u64 {
        self.core.requests_processed.load(Ordering::Relaxed)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed(format!("service server {}", self.core.id)));
        }
        Ok(())
    }

    /// Unregister and stop the executors after their current request.
    ///
    /// Queued requests are dropped; their callers see the server as gone.
    /// Idempotent; also performed on drop.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.token.lock().release();
        self.stop.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        workers.into_iter().for_each(join_unless_current);
        log::info!("[ServiceServer] {} stopped", self.core.id);
    }

    /// True once disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for ServiceServer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ServiceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceServer")
            .field("id", &self.core.id)
            .field("methods", &self.core.methods.read().len())
            .field("requests_processed", &self.requests_processed())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::types::CallState;
    use crate::{Domain, MeshConfig};
    use std::time::Duration;

    fn server() -> (Arc<Registry>, ServiceServer) {
        let domain = Domain::new();
        let registry = Registry::new(&domain, MeshConfig::default()).expect("registry");
        let server = ServiceServer::new(&registry, "calc").expect("server");
        (registry, server)
    }

    fn request(method: &str, payload: &[u8]) -> (RequestEnvelope, Receiver<ServiceResponse>) {
        let (reply, replies) = unbounded();
        let envelope = RequestEnvelope {
            method: method.to_string(),
            payload: Arc::from(payload),
            reply,
            deadline: None,
        };
        (envelope, replies)
    }

    fn echo(_: &ServiceMethodInformation, request: &[u8]) -> std::result::Result<Vec<u8>, String> {
        Ok(request.to_vec())
    }

    #[test]
    fn handler_trait_with_closure() {
        let handler = |_: &ServiceMethodInformation, payload: &[u8]| -> std::result::Result<Vec<u8>, String> {
            Ok(payload.iter().rev().copied().collect())
        };
        let info = ServiceMethodInformation::untyped("rev");
        assert_eq!(handler.handle(&info, b"abc"), Ok(b"cba".to_vec()));
    }

    #[test]
    fn conflicting_types_are_rejected() {
        let (_registry, server) = server();
        let int = TypeDescriptor::named("i32", "raw");
        let text = TypeDescriptor::named("string", "raw");
        server
            .add_method("conv", int.clone(), text.clone(), echo)
            .expect("first add");
        // Same types: handler replaced.
        server
            .add_method("conv", int.clone(), text.clone(), echo)
            .expect("replace");
        let err = server
            .add_method("conv", text, int, echo)
            .expect_err("conflict");
        assert!(matches!(err, Error::MethodConflict(_)));
        assert_eq!(server.methods().len(), 1);
    }

    #[test]
    fn empty_method_name_is_invalid() {
        let (_registry, server) = server();
        let err = server
            .add_method("", TypeDescriptor::default(), TypeDescriptor::default(), echo)
            .expect_err("empty name");
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn process_answers_known_and_unknown_methods() {
        let (_registry, server) = server();
        server
            .add_method("echo", TypeDescriptor::default(), TypeDescriptor::default(), echo)
            .expect("add");

        let (envelope, replies) = request("echo", b"hi");
        server.core.process(envelope);
        let response = replies.recv_timeout(Duration::from_secs(1)).expect("reply");
        assert_eq!(response.call_state, CallState::Executed);
        assert_eq!(response.response, b"hi");
        assert!(response.error_message.is_none());

        let (envelope, replies) = request("nope", b"");
        server.core.process(envelope);
        let response = replies.recv_timeout(Duration::from_secs(1)).expect("reply");
        assert_eq!(response.call_state, CallState::Failed);
        assert_eq!(
            response.error_message.as_deref(),
            Some("method 'nope' not found")
        );
        assert_eq!(server.requests_processed(), 2);
    }

    #[test]
    fn handler_error_and_panic_become_failed() {
        let (_registry, server) = server();
        server
            .add_method(
                "fail",
                TypeDescriptor::default(),
                TypeDescriptor::default(),
                |_: &ServiceMethodInformation, _: &[u8]| -> std::result::Result<Vec<u8>, String> {
                    Err("bad input".to_string())
                },
            )
            .expect("add fail");
        server
            .add_method(
                "boom",
                TypeDescriptor::default(),
                TypeDescriptor::default(),
                |_: &ServiceMethodInformation, _: &[u8]| -> std::result::Result<Vec<u8>, String> {
                    panic!("handler bug")
                },
            )
            .expect("add boom");

        let (envelope, replies) = request("fail", b"");
        server.core.process(envelope);
        let response = replies.recv().expect("reply");
        assert_eq!(response.call_state, CallState::Failed);
        assert_eq!(response.error_message.as_deref(), Some("bad input"));

        let (envelope, replies) = request("boom", b"");
        server.core.process(envelope);
        let response = replies.recv().expect("reply");
        assert_eq!(response.call_state, CallState::Failed);
        assert!(response.response.is_empty());
    }

    #[test]
    fn expired_request_is_skipped() {
        let (_registry, server) = server();
        server
            .add_method("echo", TypeDescriptor::default(), TypeDescriptor::default(), echo)
            .expect("add");
        let (mut envelope, replies) = request("echo", b"x");
        envelope.deadline = Some(Instant::now());
        server.core.process(envelope);
        assert!(replies.recv().is_err());
        assert_eq!(server.requests_processed(), 0);
    }

    #[test]
    fn remove_method_and_dispose() {
        let (registry, server) = server();
        server
            .add_method("echo", TypeDescriptor::default(), TypeDescriptor::default(), echo)
            .expect("add");
        assert!(server.remove_method("echo"));
        assert!(!server.remove_method("echo"));
        assert_eq!(registry.service_instances("calc").len(), 1);

        server.dispose();
        assert!(server.is_disposed());
        assert!(registry.service_instances("calc").is_empty());
        let err = server
            .add_method("echo", TypeDescriptor::default(), TypeDescriptor::default(), echo)
            .expect_err("disposed");
        assert!(matches!(err, Error::Disposed(_)));
    }
}
