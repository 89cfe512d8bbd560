// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hmesh - brokerless publish/subscribe and service calls
//!
//! Processes exchange named, typed data ("topics") and request/response calls
//! ("services") without a broker. Every process owns a [`Registry`] that
//! discovers its peers, picks a carrier per publisher/subscriber link and
//! reports connectivity changes as events.
//!
//! ## Quick Start
//!
//! ```rust
//! use hmesh::{Domain, MeshConfig, Publisher, Registry, Subscriber, TypeDescriptor};
//!
//! fn main() -> hmesh::Result<()> {
//!     let domain = Domain::new();
//!     let registry = Registry::new(&domain, MeshConfig::default())?;
//!
//!     let descriptor = TypeDescriptor::named("Temperature", "raw");
//!     let subscriber = Subscriber::new(&registry, "sensors/temperature", Some(descriptor.clone()))?;
//!     subscriber.set_receive_callback(|data| {
//!         println!("{} bytes from {}", data.payload.len(), data.sender);
//!     })?;
//!
//!     let publisher = Publisher::new(&registry, "sensors/temperature", descriptor)?;
//!     publisher.send(&21.5f32.to_le_bytes(), None)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |   Publisher / Subscriber          ServiceServer / ServiceClient      |
//! +---------------------------------------------------------------------+
//! |   Registry: peer table, pair state machine, event notifier          |
//! +---------------------------------------------------------------------+
//! |   LayerSelector + CarrierSet: shared memory | UDP multicast | TCP   |
//! +---------------------------------------------------------------------+
//! |   Domain: medium shared by the registries of every simulated host   |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Registry`] | Per-process discovery directory, factory handle for endpoints |
//! | [`Publisher`] | Sends samples to every connected subscriber of a topic |
//! | [`Subscriber`] | Receives samples, one callback at a time |
//! | [`ServiceServer`] | Serves named methods |
//! | [`ServiceClient`] | Calls a method on every matching server |
//! | [`MeshConfig`] | Registration, carrier and endpoint defaults |

mod callback;
/// Configuration structures and YAML loading.
pub mod config;
/// Identifiers, type descriptors and clocks.
pub mod core;
/// Diagnostic events and sinks.
pub mod diagnostics;
/// In-process medium connecting registries.
pub mod domain;
/// Error type.
pub mod error;
/// Process-running predicate for background workers.
pub mod lifecycle;
/// Publishers, subscribers and their events.
pub mod pubsub;
/// Discovery directory and connection state machine.
pub mod registry;
/// Service servers, clients and call aggregation.
pub mod service;
/// Carrier kinds, selection and delivery.
pub mod transport;

pub use config::{
    LayerConfig, LayerPriority, MeshConfig, PublisherConfig, RegistrationConfig, ServiceConfig,
    SubscriberConfig, TransportConfig,
};
pub use crate::core::{EntityId, ServiceId, TopicId, TypeDescriptor};
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticSink, LogSink};
pub use domain::Domain;
pub use error::{Error, Result};
pub use lifecycle::{AlwaysRunning, ProcessLifecycle, RunFlag};
pub use pubsub::{EventKind, Publisher, ReceiveData, Subscriber, TopicEvent};
pub use registry::{ConnectionState, EndpointRole, Registry, RegistryBuilder};
pub use service::{
    CallState, ClientInstance, ServiceClient, ServiceMethodInformation, ServiceResponse,
    ServiceServer,
};
pub use transport::{LayerSet, TransportLayer};

/// hmesh version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
