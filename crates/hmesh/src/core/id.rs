// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint identifiers.
//!
//! Every publisher, subscriber, service server and service client instance gets
//! a fresh [`EntityId`]. A restarted peer therefore shows up as a new entity,
//! which is what keeps the connection state machine monotonic per incarnation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque process-unique identifier of one endpoint instance.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EntityId(u64);

impl EntityId {
    /// Allocate a new entity id.
    ///
    /// Ids are drawn from a counter seeded with wall-clock nanoseconds and the
    /// process id, so ids from different processes are unlikely to collide.
    pub fn generate() -> Self {
        static COUNTER: OnceLock<AtomicU64> = OnceLock::new();
        let counter = COUNTER.get_or_init(|| AtomicU64::new(initial_seed()));
        Self(counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Create from a raw value (tests, foreign registrations).
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

fn initial_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // Keep the low bits free for the counter, mix the pid into the high bits.
    (nanos << 16) ^ (u64::from(std::process::id()) << 48)
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({:016x})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identity of one publisher or subscriber endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TopicId {
    /// Topic name the endpoint is bound to.
    pub topic_name: String,
    /// Unique endpoint instance id.
    pub entity_id: EntityId,
    /// Host the endpoint lives on.
    pub host_name: String,
    /// Process id of the owning process.
    pub process_id: u32,
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}#{}",
            self.topic_name, self.host_name, self.process_id, self.entity_id
        )
    }
}

/// Identity of one service server or client instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceId {
    /// Service name.
    pub service_name: String,
    /// Unique instance id.
    pub entity_id: EntityId,
    /// Host the instance lives on.
    pub host_name: String,
    /// Process id of the owning process.
    pub process_id: u32,
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}#{}",
            self.service_name, self.host_name, self.process_id, self.entity_id
        )
    }
}

/// Best-effort local host name.
///
/// Reads `HOSTNAME` (Unix shells) or `COMPUTERNAME` (Windows), falling back to
/// `"localhost"`.
#[must_use]
pub fn local_host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_unique() {
        let ids: HashSet<EntityId> = (0..1000).map(|_| EntityId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn topic_id_display() {
        let id = TopicId {
            topic_name: "imu".to_string(),
            entity_id: EntityId::from_raw(0xab),
            host_name: "robot".to_string(),
            process_id: 42,
        };
        assert_eq!(id.to_string(), "imu@robot:42#00000000000000ab");
    }

    #[test]
    fn host_name_is_never_empty() {
        assert!(!local_host_name().is_empty());
    }
}
