// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic type descriptors.
//!
//! The core never looks inside a schema. Descriptors are built by the type
//! system integration layer and only stored, advertised and compared here.

use std::fmt;
use std::sync::Arc;

/// Immutable description of what a topic or service method carries.
///
/// Two descriptors are compatible iff `type_name` and `encoding` match. The
/// schema bytes are informational and may be empty.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct TypeDescriptor {
    type_name: Arc<str>,
    encoding: Arc<str>,
    descriptor: Arc<[u8]>,
}

impl TypeDescriptor {
    /// Create a descriptor with a binary schema.
    pub fn new(
        type_name: impl Into<Arc<str>>,
        encoding: impl Into<Arc<str>>,
        descriptor: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            encoding: encoding.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Create a descriptor without schema bytes.
    pub fn named(type_name: impl Into<Arc<str>>, encoding: impl Into<Arc<str>>) -> Self {
        Self::new(type_name, encoding, Vec::new())
    }

    /// Type name, e.g. `"pb.sensors.Imu"`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Encoding, e.g. `"proto"` or `"raw"`.
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Binary schema blob (may be empty).
    pub fn descriptor_bytes(&self) -> &[u8] {
        &self.descriptor
    }

    /// True when no type name was given.
    pub fn is_unspecified(&self) -> bool {
        self.type_name.is_empty()
    }

    /// Compatibility check used by endpoint matching.
    ///
    /// An unspecified descriptor on either side matches anything.
    pub fn is_compatible(&self, other: &TypeDescriptor) -> bool {
        if self.is_unspecified() || other.is_unspecified() {
            return true;
        }
        self.type_name == other.type_name && self.encoding == other.encoding
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_name", &self.type_name)
            .field("encoding", &self.encoding)
            .field("descriptor_len", &self.descriptor.len())
            .finish()
    }
}
