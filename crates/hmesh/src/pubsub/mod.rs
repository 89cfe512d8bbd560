// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish/subscribe endpoints.

mod clock;
pub mod event;
pub mod publisher;
pub mod subscriber;

pub use event::{EventKind, ReceiveData, TopicEvent};
pub use publisher::{Publisher, PublisherBuilder};
pub use subscriber::{Subscriber, SubscriberBuilder};
