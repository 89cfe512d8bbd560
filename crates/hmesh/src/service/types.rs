// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service call value types.

use crate::core::{ServiceId, TypeDescriptor};
use crossbeam::channel::Sender;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one server's part of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Handler ran and returned a response.
    Executed,
    /// Method missing, handler error or handler panic.
    Failed,
    /// No response before the deadline.
    Timeouted,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Executed => write!(f, "executed"),
            CallState::Failed => write!(f, "failed"),
            CallState::Timeouted => write!(f, "timeouted"),
        }
    }
}

/// Signature of one service method.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct ServiceMethodInformation {
    /// Method name.
    pub method_name: String,
    /// Request type.
    pub request_type: TypeDescriptor,
    /// Response type.
    pub response_type: TypeDescriptor,
}

impl ServiceMethodInformation {
    /// Create method information.
    pub fn new(
        method_name: impl Into<String>,
        request_type: TypeDescriptor,
        response_type: TypeDescriptor,
    ) -> Self {
        Self {
            method_name: method_name.into(),
            request_type,
            response_type,
        }
    }

    /// Information for a method name without known types.
    pub fn untyped(method_name: impl Into<String>) -> Self {
        Self::new(method_name, TypeDescriptor::default(), TypeDescriptor::default())
    }
}

/// One server's answer to a call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceResponse {
    /// Answering server.
    pub server_id: ServiceId,
    /// Method that was called.
    pub method_information: ServiceMethodInformation,
    /// Response bytes (empty unless executed).
    pub response: Vec<u8>,
    /// Outcome.
    pub call_state: CallState,
    /// Set iff the call failed or timed out.
    pub error_message: Option<String>,
}

impl ServiceResponse {
    pub(crate) fn executed(
        server_id: ServiceId,
        method_information: ServiceMethodInformation,
        response: Vec<u8>,
    ) -> Self {
        Self {
            server_id,
            method_information,
            response,
            call_state: CallState::Executed,
            error_message: None,
        }
    }

    pub(crate) fn failed(
        server_id: ServiceId,
        method_information: ServiceMethodInformation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            server_id,
            method_information,
            response: Vec::new(),
            call_state: CallState::Failed,
            error_message: Some(message.into()),
        }
    }

    pub(crate) fn timeouted(server_id: ServiceId, method_name: &str) -> Self {
        Self {
            server_id,
            method_information: ServiceMethodInformation::untyped(method_name),
            response: Vec::new(),
            call_state: CallState::Timeouted,
            error_message: Some("timeout".to_string()),
        }
    }

    /// True if the handler ran successfully.
    pub fn is_executed(&self) -> bool {
        self.call_state == CallState::Executed
    }
}

/// Kind of a service client event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientEventKind {
    /// A matching server appeared.
    Connected,
    /// A matching server went away.
    Disconnected,
}

/// Event delivered to a service client event callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientEvent {
    /// What happened.
    pub kind: ClientEventKind,
    /// Server concerned.
    pub server: ServiceId,
    /// Event time in microseconds since the UNIX epoch.
    pub time_us: i64,
}

pub(crate) type ClientEventHandler = dyn Fn(&ClientEvent) + Send + Sync;

/// Handles calls to one service method.
///
/// `Err(message)` turns into a [`CallState::Failed`] response carrying the
/// message. Closures with the matching signature implement this trait.
pub trait MethodHandler: Send + Sync + 'static {
    /// Handle one request.
    fn handle(&self, method: &ServiceMethodInformation, request: &[u8]) -> Result<Vec<u8>, String>;
}

impl<F> MethodHandler for F
where
    F: Fn(&ServiceMethodInformation, &[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static,
{
    fn handle(&self, method: &ServiceMethodInformation, request: &[u8]) -> Result<Vec<u8>, String> {
        self(method, request)
    }
}

/// One request travelling to a server's executor pool.
pub(crate) struct RequestEnvelope {
    pub method: String,
    pub payload: Arc<[u8]>,
    pub reply: Sender<ServiceResponse>,
    pub deadline: Option<Instant>,
}
