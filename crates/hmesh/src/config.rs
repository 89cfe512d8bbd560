// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! hmesh configuration.
//!
//! # Architecture
//!
//! - [`MeshConfig`] aggregates every section and is handed to the registry at
//!   construction time.
//! - [`PublisherConfig`] / [`SubscriberConfig`] carry per-role enabled layers
//!   and the local/remote priority lists.
//! - [`TransportConfig`] carries process-wide carrier tunables.
//!
//! Defaults follow the classic layer setup: SHM > UDP > TCP for same-host
//! peers, UDP > TCP across hosts, TCP reception disabled on subscribers.
//!
//! With the `config-loaders` feature a YAML document can be loaded:
//!
//! ```yaml
//! registration:
//!   refresh_ms: 100
//!   timeout_ms: 1000
//! publisher:
//!   layers: { shm: true, udp: true, tcp: false }
//!   priority:
//!     local: [shm, udp]
//!     remote: [udp]
//! subscriber:
//!   drop_out_of_order_messages: false
//! ```

use crate::error::{Error, Result};
use crate::transport::{LayerSet, TransportLayer};
use std::time::Duration;

#[cfg(feature = "config-loaders")]
use serde::Deserialize;

// =======================================================================
// Layer enable flags and priorities
// =======================================================================

/// Per-carrier enable flags for one endpoint role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-loaders", derive(Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(default))]
pub struct LayerConfig {
    /// Shared memory carrier enabled.
    pub shm: bool,
    /// UDP multicast carrier enabled.
    pub udp: bool,
    /// TCP carrier enabled.
    pub tcp: bool,
}

impl LayerConfig {
    /// Every carrier enabled.
    pub const fn all() -> Self {
        Self {
            shm: true,
            udp: true,
            tcp: true,
        }
    }

    /// Every carrier disabled.
    pub const fn none() -> Self {
        Self {
            shm: false,
            udp: false,
            tcp: false,
        }
    }

    /// Only the given carrier enabled.
    pub const fn only(layer: TransportLayer) -> Self {
        Self::none().with(layer, true)
    }

    /// Builder-style toggle.
    #[must_use]
    pub const fn with(mut self, layer: TransportLayer, enabled: bool) -> Self {
        match layer {
            TransportLayer::SharedMemory => self.shm = enabled,
            TransportLayer::UdpMulticast => self.udp = enabled,
            TransportLayer::Tcp => self.tcp = enabled,
        }
        self
    }

    /// Whether a carrier is enabled.
    pub const fn is_enabled(&self, layer: TransportLayer) -> bool {
        match layer {
            TransportLayer::SharedMemory => self.shm,
            TransportLayer::UdpMulticast => self.udp,
            TransportLayer::Tcp => self.tcp,
        }
    }

    /// Enabled carriers as a set.
    pub fn enabled_set(&self) -> LayerSet {
        TransportLayer::ALL
            .into_iter()
            .filter(|layer| self.is_enabled(*layer))
            .collect()
    }
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self::all()
    }
}

/// Ordered carrier preference, one list for same-host peers and one for
/// cross-host peers.
///
/// Lists may omit carriers (an omitted carrier is never chosen) but must not
/// contain duplicates.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-loaders", derive(Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(try_from = "RawLayerPriority"))]
pub struct LayerPriority {
    local: Vec<TransportLayer>,
    remote: Vec<TransportLayer>,
}

impl LayerPriority {
    /// Create a priority pair, rejecting duplicate entries.
    pub fn new(local: Vec<TransportLayer>, remote: Vec<TransportLayer>) -> Result<Self> {
        check_unique("local", &local)?;
        check_unique("remote", &remote)?;
        Ok(Self { local, remote })
    }

    /// Same-host ordering.
    pub fn local(&self) -> &[TransportLayer] {
        &self.local
    }

    /// Cross-host ordering.
    pub fn remote(&self) -> &[TransportLayer] {
        &self.remote
    }

    /// Ordering for the given host relation.
    pub fn for_host(&self, same_host: bool) -> &[TransportLayer] {
        if same_host {
            &self.local
        } else {
            &self.remote
        }
    }
}

impl Default for LayerPriority {
    fn default() -> Self {
        Self {
            local: vec![
                TransportLayer::SharedMemory,
                TransportLayer::UdpMulticast,
                TransportLayer::Tcp,
            ],
            remote: vec![TransportLayer::UdpMulticast, TransportLayer::Tcp],
        }
    }
}

fn check_unique(which: &str, list: &[TransportLayer]) -> Result<()> {
    let mut seen = LayerSet::EMPTY;
    for layer in list {
        if seen.contains(*layer) {
            return Err(Error::InvalidConfig(format!(
                "duplicate layer '{}' in {} priority list",
                layer, which
            )));
        }
        seen.insert(*layer);
    }
    Ok(())
}

#[cfg(feature = "config-loaders")]
#[derive(Deserialize)]
struct RawLayerPriority {
    #[serde(default)]
    local: Vec<TransportLayer>,
    #[serde(default)]
    remote: Vec<TransportLayer>,
}

#[cfg(feature = "config-loaders")]
impl TryFrom<RawLayerPriority> for LayerPriority {
    type Error = Error;

    fn try_from(raw: RawLayerPriority) -> Result<Self> {
        LayerPriority::new(raw.local, raw.remote)
    }
}

// =======================================================================
// Role configuration
// =======================================================================

/// Publisher role configuration.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config-loaders", derive(Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(default))]
pub struct PublisherConfig {
    /// Carriers the publisher may write on.
    pub layers: LayerConfig,
    /// Advertised preference (selection follows the subscriber's list).
    pub priority: LayerPriority,
}

/// Subscriber role configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-loaders", derive(Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(default))]
pub struct SubscriberConfig {
    /// Carriers the subscriber accepts.
    pub layers: LayerConfig,
    /// Receiver preference, decides the carrier of every incoming link.
    pub priority: LayerPriority,
    /// Drop samples whose send clock is older than the last delivered one.
    pub drop_out_of_order_messages: bool,
    /// Inbox capacity (samples) between carriers and the delivery worker.
    pub inbox_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            layers: LayerConfig::all().with(TransportLayer::Tcp, false),
            priority: LayerPriority::default(),
            drop_out_of_order_messages: true,
            inbox_capacity: 1024,
        }
    }
}

// =======================================================================
// Carrier tunables
// =======================================================================

/// Shared memory carrier tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-loaders", derive(Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(default))]
pub struct ShmConfig {
    /// Default memory file size for new publishers.
    pub memfile_min_size_bytes: usize,
    /// Number of buffers per memory file (must be >= 1).
    pub memfile_buffer_count: usize,
    /// Longest time a send may block on a full subscriber inbox.
    pub acknowledge_timeout_ms: u64,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            memfile_min_size_bytes: 4096,
            memfile_buffer_count: 1,
            acknowledge_timeout_ms: 5,
        }
    }
}

/// UDP multicast carrier tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-loaders", derive(Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(default))]
pub struct UdpConfig {
    /// Multicast port.
    pub port: u16,
    /// Socket send buffer in bytes.
    pub send_buffer: usize,
    /// Socket receive buffer in bytes.
    pub receive_buffer: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            port: 14002,
            send_buffer: 5 * 1024 * 1024,
            receive_buffer: 5 * 1024 * 1024,
        }
    }
}

/// TCP carrier tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-loaders", derive(Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(default))]
pub struct TcpConfig {
    /// Reader executor thread count.
    pub number_executor_reader: usize,
    /// Writer executor thread count.
    pub number_executor_writer: usize,
    /// Consecutive failed sends a session retries with the full send timeout
    /// before it gives up and stops blocking on that subscriber.
    pub max_reconnections: u32,
    /// Longest time a send may block on a full subscriber inbox.
    pub send_timeout_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            number_executor_reader: 4,
            number_executor_writer: 4,
            max_reconnections: 5,
            send_timeout_ms: 100,
        }
    }
}

/// Process-wide carrier tunables.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config-loaders", derive(Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(default))]
pub struct TransportConfig {
    /// Shared memory tunables.
    pub shm: ShmConfig,
    /// UDP multicast tunables.
    pub udp: UdpConfig,
    /// TCP tunables.
    pub tcp: TcpConfig,
}

// =======================================================================
// Registration and services
// =======================================================================

/// Discovery refresh and liveness settings.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-loaders", derive(Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(default))]
pub struct RegistrationConfig {
    /// Re-announcement period of local entities.
    pub refresh_ms: u64,
    /// Remote entries expire when not refreshed within this window.
    pub timeout_ms: u64,
    /// Host name override (defaults to the machine host name).
    pub host_name: Option<String>,
}

impl RegistrationConfig {
    /// Re-announcement period.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }

    /// Liveness window.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            refresh_ms: 1000,
            timeout_ms: 10_000,
            host_name: None,
        }
    }
}

/// Service subsystem settings.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-loaders", derive(Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(default))]
pub struct ServiceConfig {
    /// Request executor threads per service server.
    pub server_threads: usize,
    /// Timeout used by [`crate::service::ServiceClient::call`].
    pub default_timeout_ms: u64,
}

impl ServiceConfig {
    /// Timeout used by [`crate::service::ServiceClient::call`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server_threads: 2,
            default_timeout_ms: 1000,
        }
    }
}

/// Complete hmesh configuration.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config-loaders", derive(Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(default))]
pub struct MeshConfig {
    /// Discovery settings.
    pub registration: RegistrationConfig,
    /// Carrier tunables.
    pub transport: TransportConfig,
    /// Publisher defaults.
    pub publisher: PublisherConfig,
    /// Subscriber defaults.
    pub subscriber: SubscriberConfig,
    /// Service settings.
    pub service: ServiceConfig,
}

impl MeshConfig {
    /// Check values that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.registration.refresh_ms == 0 {
            return Err(Error::InvalidConfig(
                "registration.refresh_ms must be > 0".to_string(),
            ));
        }
        if self.registration.timeout_ms <= self.registration.refresh_ms {
            return Err(Error::InvalidConfig(format!(
                "registration.timeout_ms ({}) must exceed refresh_ms ({})",
                self.registration.timeout_ms, self.registration.refresh_ms
            )));
        }
        if self.subscriber.inbox_capacity == 0 {
            return Err(Error::InvalidConfig(
                "subscriber.inbox_capacity must be > 0".to_string(),
            ));
        }
        if self.service.server_threads == 0 {
            return Err(Error::InvalidConfig(
                "service.server_threads must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a YAML document.
    #[cfg(feature = "config-loaders")]
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: MeshConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a YAML file.
    #[cfg(feature = "config-loaders")]
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ConfigFileNotFound(path.display().to_string())
            } else {
                Error::IoError(e)
            }
        })?;
        Self::from_yaml_str(&content)
    }
}
