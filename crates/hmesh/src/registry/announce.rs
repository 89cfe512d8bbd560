// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registration records exchanged between registries.

use crate::core::{EntityId, ServiceId, TopicId, TypeDescriptor};
use crate::service::ServiceMethodInformation;
use crate::transport::LayerAdvertisement;
use std::sync::Arc;

/// Role of a topic endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    /// Writes samples.
    Publisher,
    /// Reads samples.
    Subscriber,
}

/// What a registry advertises about one topic endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TopicRecord {
    pub id: Arc<TopicId>,
    pub role: EndpointRole,
    /// Unspecified for subscribers created without a type filter.
    pub descriptor: TypeDescriptor,
    pub layers: LayerAdvertisement,
}

impl TopicRecord {
    pub fn entity_id(&self) -> EntityId {
        self.id.entity_id
    }
}

/// What a registry advertises about one service server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ServiceRecord {
    pub id: Arc<ServiceId>,
    pub methods: Vec<ServiceMethodInformation>,
}

impl ServiceRecord {
    pub fn entity_id(&self) -> EntityId {
        self.id.entity_id
    }
}

/// One registration message.
#[derive(Clone, Debug)]
pub(crate) enum Announcement {
    /// Register or refresh a topic endpoint.
    Topic(TopicRecord),
    /// Topic endpoint disposed.
    TopicGone(EntityId),
    /// Register or refresh a service server.
    Service(ServiceRecord),
    /// Service server disposed.
    ServiceGone(EntityId),
}
