// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Carrier selection for one publisher->subscriber link.
//!
//! ```text
//! publisher.enabled  ∩  subscriber.enabled  = candidates
//!                           |
//!            subscriber.priority.local   (same host)
//!            subscriber.priority.remote  (other host)
//!                           |
//!            first listed carrier in candidates  -> winner
//! ```
//!
//! The receiving side owns the preference: it knows which carriers it can
//! drain cheaply. A carrier absent from the subscriber's list is never used,
//! even if both sides enable it.

use super::{LayerSet, TransportLayer};
use crate::config::LayerPriority;

/// What an endpoint advertises about its carriers.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LayerAdvertisement {
    /// Carriers enabled (and healthy) on the endpoint.
    pub enabled: LayerSet,
    /// Endpoint preference lists.
    pub priority: LayerPriority,
}

impl LayerAdvertisement {
    /// Create an advertisement.
    pub fn new(enabled: LayerSet, priority: LayerPriority) -> Self {
        Self { enabled, priority }
    }

    /// Same advertisement with unhealthy carriers removed.
    #[must_use]
    pub fn without(&self, failed: LayerSet) -> Self {
        Self {
            enabled: self.enabled.difference(failed),
            priority: self.priority.clone(),
        }
    }
}

/// Pick the carrier for one link, or `None` if the sides share no listed carrier.
///
/// Pure and deterministic: identical inputs always give the identical winner.
#[must_use]
pub fn select(
    publisher_layers: LayerSet,
    subscriber: &LayerAdvertisement,
    same_host: bool,
) -> Option<TransportLayer> {
    let candidates = publisher_layers.intersection(subscriber.enabled);
    if candidates.is_empty() {
        return None;
    }
    subscriber
        .priority
        .for_host(same_host)
        .iter()
        .copied()
        .find(|layer| candidates.contains(*layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransportLayer::{SharedMemory, Tcp, UdpMulticast};

    fn priority(local: &[TransportLayer], remote: &[TransportLayer]) -> LayerPriority {
        LayerPriority::new(local.to_vec(), remote.to_vec()).expect("unique priorities")
    }

    #[test]
    fn default_prefers_shm_locally_and_udp_remotely() {
        let sub = LayerAdvertisement::new(LayerSet::all(), LayerPriority::default());
        assert_eq!(select(LayerSet::all(), &sub, true), Some(SharedMemory));
        assert_eq!(select(LayerSet::all(), &sub, false), Some(UdpMulticast));
    }

    #[test]
    fn subscriber_priority_wins() {
        // Publisher would rather use TCP, subscriber ranks SHM first.
        let sub = LayerAdvertisement::new(
            LayerSet::only(SharedMemory).with(Tcp),
            priority(&[SharedMemory, Tcp], &[Tcp]),
        );
        let publisher = LayerSet::only(Tcp).with(SharedMemory);
        assert_eq!(select(publisher, &sub, true), Some(SharedMemory));
    }

    #[test]
    fn fallback_to_next_common_carrier() {
        let sub = LayerAdvertisement::new(LayerSet::all(), LayerPriority::default());
        let publisher = LayerSet::only(Tcp);
        assert_eq!(select(publisher, &sub, true), Some(Tcp));
        assert_eq!(select(publisher, &sub, false), Some(Tcp));
    }

    #[test]
    fn empty_intersection_is_none() {
        let sub = LayerAdvertisement::new(LayerSet::only(SharedMemory), LayerPriority::default());
        assert_eq!(select(LayerSet::only(Tcp), &sub, true), None);
        assert_eq!(select(LayerSet::EMPTY, &sub, true), None);
    }

    #[test]
    fn unlisted_carrier_is_never_chosen() {
        // Both enable UDP, but the subscriber's remote list only names TCP.
        let sub = LayerAdvertisement::new(LayerSet::all(), priority(&[SharedMemory], &[Tcp]));
        let publisher = LayerSet::only(UdpMulticast);
        assert_eq!(select(publisher, &sub, false), None);
        assert_eq!(select(publisher, &sub, true), None);
    }

    #[test]
    fn shm_is_not_used_across_hosts_with_default_lists() {
        let sub = LayerAdvertisement::new(LayerSet::only(SharedMemory), LayerPriority::default());
        assert_eq!(select(LayerSet::all(), &sub, false), None);
    }

    #[test]
    fn failed_carrier_is_masked() {
        let sub = LayerAdvertisement::new(LayerSet::all(), LayerPriority::default());
        let degraded = sub.without(LayerSet::only(SharedMemory));
        assert_eq!(select(LayerSet::all(), &degraded, true), Some(UdpMulticast));
    }

    #[test]
    fn selection_is_deterministic() {
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..200 {
            let mut pub_set = LayerSet::EMPTY;
            let mut sub_set = LayerSet::EMPTY;
            for layer in TransportLayer::ALL {
                if rng.bool() {
                    pub_set.insert(layer);
                }
                if rng.bool() {
                    sub_set.insert(layer);
                }
            }
            let mut order = TransportLayer::ALL.to_vec();
            rng.shuffle(&mut order);
            let sub = LayerAdvertisement::new(sub_set, priority(&order, &order[1..]));
            let same_host = rng.bool();
            let first = select(pub_set, &sub, same_host);
            assert_eq!(first, select(pub_set, &sub, same_host));
            if let Some(layer) = first {
                assert!(pub_set.contains(layer) && sub_set.contains(layer));
            }
        }
    }
}
