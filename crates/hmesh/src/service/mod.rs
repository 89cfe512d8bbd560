// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/response service calls over the registry.
//!
//! A [`ServiceServer`] registers named methods; a [`ServiceClient`] fans one
//! call out to every matching server and gathers the answers, each tagged
//! with a [`CallState`].

pub(crate) mod aggregator;
pub mod client;
pub mod server;
pub mod types;

pub use client::{ClientInstance, ServiceClient, ServiceClientBuilder};
pub use server::ServiceServer;
pub use types::{
    CallState, ClientEvent, ClientEventKind, MethodHandler, ServiceMethodInformation,
    ServiceResponse,
};

pub(crate) use types::RequestEnvelope;
