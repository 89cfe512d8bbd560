// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic endpoint events and received-sample views.

use crate::core::{TopicId, TypeDescriptor};
use crate::transport::TransportLayer;

/// Kind of a topic endpoint event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A link to the peer became usable.
    Connected,
    /// A previously connected link went away.
    Disconnected,
    /// Samples from the peer publisher were lost (send clock gap).
    Dropped {
        /// Number of missing samples.
        count: u64,
    },
}

/// Event delivered to a publisher or subscriber event callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicEvent {
    /// What happened.
    pub kind: EventKind,
    /// Endpoint on the other side of the link.
    pub peer: TopicId,
    /// Peer's advertised type descriptor.
    pub peer_descriptor: TypeDescriptor,
    /// Carrier of the link, when known.
    pub layer: Option<TransportLayer>,
    /// Event time in microseconds since the UNIX epoch.
    pub time_us: i64,
}

/// Borrowed view of one received sample, valid for the duration of the callback.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveData<'a> {
    /// Publisher that sent the sample.
    pub sender: &'a TopicId,
    /// Publisher's type descriptor.
    pub descriptor: &'a TypeDescriptor,
    /// Payload bytes.
    pub payload: &'a [u8],
    /// Timestamp given at send time, in microseconds.
    pub send_timestamp: i64,
    /// Publisher send clock of this sample.
    pub send_clock: u64,
    /// Carrier the sample arrived on.
    pub layer: TransportLayer,
}

pub(crate) type EventHandler = dyn Fn(&TopicEvent) + Send + Sync;
pub(crate) type ReceiveHandler = dyn Fn(&ReceiveData<'_>) + Send + Sync;
