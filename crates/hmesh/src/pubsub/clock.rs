// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-publisher send clock tracking on the receive side.

use crate::core::EntityId;
use std::collections::HashMap;

/// What to do with an incoming sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ClockVerdict {
    /// Next expected sample.
    Deliver,
    /// Deliver, `missing` samples were lost before it.
    DeliverAfterGap { missing: u64 },
    /// Older than the last delivered sample, delivery allowed by configuration.
    DeliverOutOfOrder,
    /// Duplicate, or out of order while out-of-order delivery is disabled.
    Drop,
}

/// Session and last delivered send clock per publisher.
///
/// Each reconnect of a pair starts a new session; a higher session restarts
/// the sequence so the samples missed while disconnected are not counted as
/// drops.
#[derive(Debug, Default)]
pub(crate) struct ClockTracker {
    last: HashMap<EntityId, (u64, u64)>,
    drop_out_of_order: bool,
}

impl ClockTracker {
    pub fn new(drop_out_of_order: bool) -> Self {
        Self {
            last: HashMap::new(),
            drop_out_of_order,
        }
    }

    /// Classify `clock` from `publisher` and record it if it will be delivered.
    pub fn check(&mut self, publisher: EntityId, session: u64, clock: u64) -> ClockVerdict {
        let Some((current, last)) = self.last.get_mut(&publisher) else {
            // First sample from this publisher, whatever its clock.
            self.last.insert(publisher, (session, clock));
            return ClockVerdict::Deliver;
        };

        if session > *current {
            *current = session;
            *last = clock;
            return ClockVerdict::Deliver;
        }
        if session < *current {
            // Queued before the last reconnect.
            return ClockVerdict::Deliver;
        }

        if clock == *last {
            return ClockVerdict::Drop;
        }
        if clock < *last {
            return if self.drop_out_of_order {
                ClockVerdict::Drop
            } else {
                ClockVerdict::DeliverOutOfOrder
            };
        }

        let missing = clock - *last - 1;
        *last = clock;
        if missing == 0 {
            ClockVerdict::Deliver
        } else {
            ClockVerdict::DeliverAfterGap { missing }
        }
    }

    /// Drop the state kept for `publisher`.
    pub fn forget(&mut self, publisher: EntityId) {
        self.last.remove(&publisher);
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.last.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: EntityId = EntityId::from_raw(1);

    #[test]
    fn in_order_sequence() {
        let mut tracker = ClockTracker::new(true);
        for clock in 1..=5 {
            assert_eq!(tracker.check(P, 1, clock), ClockVerdict::Deliver);
        }
    }

    #[test]
    fn duplicate_is_always_dropped() {
        let mut tracker = ClockTracker::new(false);
        assert_eq!(tracker.check(P, 1, 3), ClockVerdict::Deliver);
        assert_eq!(tracker.check(P, 1, 3), ClockVerdict::Drop);
    }

    #[test]
    fn gap_is_reported_and_delivered() {
        let mut tracker = ClockTracker::new(true);
        tracker.check(P, 1, 1);
        assert_eq!(
            tracker.check(P, 1, 5),
            ClockVerdict::DeliverAfterGap { missing: 3 }
        );
        assert_eq!(tracker.check(P, 1, 6), ClockVerdict::Deliver);
    }

    #[test]
    fn out_of_order_handling() {
        let mut strict = ClockTracker::new(true);
        strict.check(P, 1, 10);
        assert_eq!(strict.check(P, 1, 9), ClockVerdict::Drop);

        let mut lenient = ClockTracker::new(false);
        lenient.check(P, 1, 10);
        assert_eq!(lenient.check(P, 1, 9), ClockVerdict::DeliverOutOfOrder);
        // The high-water mark does not move back.
        assert_eq!(lenient.check(P, 1, 11), ClockVerdict::Deliver);
    }

    #[test]
    fn publishers_are_tracked_independently() {
        let mut tracker = ClockTracker::new(true);
        let q = EntityId::from_raw(2);
        tracker.check(P, 1, 1);
        tracker.check(q, 1, 7);
        assert_eq!(tracker.check(P, 1, 2), ClockVerdict::Deliver);
        assert_eq!(tracker.check(q, 1, 8), ClockVerdict::Deliver);
    }

    #[test]
    fn reconnect_session_restarts_the_sequence() {
        let mut tracker = ClockTracker::new(true);
        tracker.check(P, 1, 1);
        tracker.check(P, 1, 2);
        // Clocks 3..=6 went to other subscribers while this pair was down.
        assert_eq!(tracker.check(P, 2, 7), ClockVerdict::Deliver);
        assert_eq!(tracker.check(P, 2, 9), ClockVerdict::DeliverAfterGap { missing: 1 });
        // A straggler of the old session is delivered without moving the mark.
        assert_eq!(tracker.check(P, 1, 3), ClockVerdict::Deliver);
        assert_eq!(tracker.check(P, 2, 10), ClockVerdict::Deliver);
    }

    #[test]
    fn forgotten_publisher_restarts_without_gap() {
        let mut tracker = ClockTracker::new(true);
        tracker.check(P, 1, 1);
        tracker.check(P, 1, 2);
        tracker.forget(P);
        assert_eq!(tracker.tracked(), 0);
        assert_eq!(tracker.check(P, 2, 9), ClockVerdict::Deliver);
        assert_eq!(tracker.check(P, 2, 10), ClockVerdict::Deliver);
        tracker.forget(EntityId::from_raw(42));
        assert_eq!(tracker.tracked(), 1);
    }
}
