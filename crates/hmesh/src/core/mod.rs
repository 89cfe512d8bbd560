// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Leaf value types: identifiers, type descriptors and clocks.

pub mod id;
pub mod types;

pub use id::{local_host_name, EntityId, ServiceId, TopicId};
pub use types::TypeDescriptor;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in microseconds since the UNIX epoch.
#[must_use]
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
