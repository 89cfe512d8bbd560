// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport layers (carriers) and per-link layer selection.
//!
//! # Modules
//!
//! - `selector` - receiver-priority layer selection for one publisher->subscriber link
//! - `carrier` - in-process carriers (SHM, UDP multicast, TCP) and their health tracking
//!
//! The set of carriers is closed: [`TransportLayer`] is an enum and every match
//! over it is exhaustive.

pub mod carrier;
pub mod selector;

pub use carrier::{Carrier, CarrierError, CarrierSet, Sample};
pub use selector::{select, LayerAdvertisement};

use std::fmt;
use std::str::FromStr;

/// A concrete mechanism for moving bytes between endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "config-loaders", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(try_from = "String"))]
pub enum TransportLayer {
    /// Shared memory files, same host only.
    SharedMemory,
    /// UDP multicast groups.
    UdpMulticast,
    /// TCP sessions.
    Tcp,
}

impl TransportLayer {
    /// All carriers, in declaration order.
    pub const ALL: [TransportLayer; 3] = [
        TransportLayer::SharedMemory,
        TransportLayer::UdpMulticast,
        TransportLayer::Tcp,
    ];

    /// Short configuration name ("shm", "udp", "tcp").
    pub const fn as_str(self) -> &'static str {
        match self {
            TransportLayer::SharedMemory => "shm",
            TransportLayer::UdpMulticast => "udp",
            TransportLayer::Tcp => "tcp",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            TransportLayer::SharedMemory => 0b001,
            TransportLayer::UdpMulticast => 0b010,
            TransportLayer::Tcp => 0b100,
        }
    }
}

impl fmt::Display for TransportLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unknown layer names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLayer(pub String);

impl fmt::Display for UnknownLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown transport layer '{}' (expected shm, udp or tcp)", self.0)
    }
}

impl std::error::Error for UnknownLayer {}

impl FromStr for TransportLayer {
    type Err = UnknownLayer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shm" => Ok(TransportLayer::SharedMemory),
            "udp" | "udp_mc" => Ok(TransportLayer::UdpMulticast),
            "tcp" => Ok(TransportLayer::Tcp),
            _ => Err(UnknownLayer(s.to_string())),
        }
    }
}

impl TryFrom<String> for TransportLayer {
    type Error = UnknownLayer;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Set of carriers, e.g. the layers enabled on one endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LayerSet(u8);

impl LayerSet {
    /// No carrier.
    pub const EMPTY: LayerSet = LayerSet(0);

    /// Every carrier.
    pub const fn all() -> Self {
        LayerSet(0b111)
    }

    /// Set with a single carrier.
    pub const fn only(layer: TransportLayer) -> Self {
        LayerSet(layer.bit())
    }

    /// Add a carrier.
    pub fn insert(&mut self, layer: TransportLayer) {
        self.0 |= layer.bit();
    }

    /// Remove a carrier.
    pub fn remove(&mut self, layer: TransportLayer) {
        self.0 &= !layer.bit();
    }

    /// Builder-style insert.
    #[must_use]
    pub const fn with(self, layer: TransportLayer) -> Self {
        LayerSet(self.0 | layer.bit())
    }

    /// Membership test.
    pub const fn contains(&self, layer: TransportLayer) -> bool {
        self.0 & layer.bit() != 0
    }

    /// Carriers present in both sets.
    #[must_use]
    pub const fn intersection(&self, other: LayerSet) -> LayerSet {
        LayerSet(self.0 & other.0)
    }

    /// Carriers present in either set.
    #[must_use]
    pub const fn union(&self, other: LayerSet) -> LayerSet {
        LayerSet(self.0 | other.0)
    }

    /// Carriers in `self` but not in `other`.
    #[must_use]
    pub const fn difference(&self, other: LayerSet) -> LayerSet {
        LayerSet(self.0 & !other.0)
    }

    /// True when no carrier is in the set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate in [`TransportLayer::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = TransportLayer> + '_ {
        TransportLayer::ALL
            .into_iter()
            .filter(move |layer| self.contains(*layer))
    }
}

impl FromIterator<TransportLayer> for LayerSet {
    fn from_iter<I: IntoIterator<Item = TransportLayer>>(iter: I) -> Self {
        let mut set = LayerSet::EMPTY;
        for layer in iter {
            set.insert(layer);
        }
        set
    }
}

impl fmt::Debug for LayerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_layer_names() {
        assert_eq!("shm".parse(), Ok(TransportLayer::SharedMemory));
        assert_eq!(" UDP ".parse(), Ok(TransportLayer::UdpMulticast));
        assert_eq!("udp_mc".parse(), Ok(TransportLayer::UdpMulticast));
        assert_eq!("tcp".parse(), Ok(TransportLayer::Tcp));
        assert!("quic".parse::<TransportLayer>().is_err());
    }

    #[test]
    fn layer_set_operations() {
        let a = LayerSet::only(TransportLayer::SharedMemory).with(TransportLayer::Tcp);
        let b: LayerSet = [TransportLayer::Tcp, TransportLayer::UdpMulticast]
            .into_iter()
            .collect();

        assert_eq!(a.intersection(b), LayerSet::only(TransportLayer::Tcp));
        assert_eq!(a.difference(b), LayerSet::only(TransportLayer::SharedMemory));
        assert!(LayerSet::EMPTY.is_empty());
        assert_eq!(LayerSet::all().iter().count(), 3);

        let mut c = LayerSet::all();
        c.remove(TransportLayer::UdpMulticast);
        assert!(!c.contains(TransportLayer::UdpMulticast));
        assert_eq!(format!("{:?}", c), "{SharedMemory, Tcp}");
    }
}
