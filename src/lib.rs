// This file is part of Astarte.
//
// Copyright 2024 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod connection;
pub mod crypto;
pub mod error;
pub mod interface;
pub mod introspection;
#[cfg(test)]
pub(crate) mod mock;
pub mod options;
pub mod pairing;
pub mod payload;
pub mod properties;
mod shared;
pub mod store;
mod topic;
pub mod types;

use std::{collections::HashMap, fmt, ops::Deref, sync::Arc};

use rumqttc::QoS;
use tokio::sync::mpsc;
use tracing::debug;

// Re-export chrono since timestamps are part of the public API.
pub use chrono;

pub use crate::error::Error;
pub use crate::interface::Interface;
pub use crate::options::{DeviceBuilder, MqttConfig};
pub use crate::types::{AstarteType, Timestamp};

use crate::{
    interface::{Aggregation, InterfaceError, InterfaceType, Mapping, Ownership},
    store::{PropertyStore, StoredProp},
    types::TypeError,
};

pub(crate) use crate::shared::SharedDevice;

/// Sender end of the channel for the [`DeviceEvent`]s.
pub(crate) type EventSender = mpsc::Sender<Result<DeviceEvent, Error>>;
/// Receiver end of the channel for the [`DeviceEvent`]s.
pub type EventReceiver = mpsc::Receiver<Result<DeviceEvent, Error>>;

/// Payload of a data event received from Astarte.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An individual datastream value.
    Individual {
        /// The received value.
        data: AstarteType,
        /// Timestamp sent by the server, if any.
        timestamp: Option<Timestamp>,
    },
    /// An object aggregate, keyed by endpoint name.
    Object {
        /// The received entries.
        data: HashMap<String, AstarteType>,
        /// Timestamp sent by the server, if any.
        timestamp: Option<Timestamp>,
    },
    /// A server owned property was set.
    PropertySet(AstarteType),
    /// A server owned property was unset.
    PropertyUnset,
}

/// Event delivered to the application through the [`EventReceiver`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The session with Astarte is fully established.
    Connected,
    /// The device disconnected from Astarte.
    Disconnected,
    /// Data received on an interface.
    Data {
        /// Interface on which the event has been triggered.
        interface: String,
        /// Path to the endpoint for which the event has been triggered.
        path: String,
        /// Payload of the event.
        data: Value,
    },
}

impl DeviceEvent {
    pub(crate) fn data(interface: &str, path: &str, data: Value) -> Self {
        DeviceEvent::Data {
            interface: interface.to_string(),
            path: path.to_string(),
            data,
        }
    }
}

/// Astarte device implementation.
///
/// Provides the functionality to transmit and receive individual and object
/// datastreams as well as properties, while a single task drives the
/// connection with [`AstarteDeviceSdk::poll`].
pub struct AstarteDeviceSdk<S> {
    pub(crate) shared: Arc<SharedDevice<S>>,
}

/// Manual implementation of [`Clone`] since the inner shared device is
/// behind an [`Arc`].
impl<S> Clone for AstarteDeviceSdk<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> Deref for AstarteDeviceSdk<S> {
    type Target = SharedDevice<S>;

    fn deref(&self) -> &Self::Target {
        &self.shared
    }
}

impl<S> AstarteDeviceSdk<S>
where
    S: PropertyStore,
{
    pub(crate) fn client_id(&self) -> crate::topic::ClientId<&str> {
        self.mqtt.client_id()
    }

    /// Sends an individual datastream value on an interface.
    ///
    /// ```no_run
    /// # use astarte_device_runtime::{options::{DeviceBuilder, MqttConfig}};
    /// # #[tokio::main]
    /// # async fn main() {
    /// # let mqtt_config = MqttConfig::new("realm", "device_id", "secret", "pairing_url");
    /// # let (device, _rx) = DeviceBuilder::new().build(mqtt_config).unwrap();
    /// device
    ///     .send("my.interface.Name", "/endpoint/path", 42_i32)
    ///     .await
    ///     .unwrap();
    /// # }
    /// ```
    pub async fn send<D>(
        &self,
        interface_name: &str,
        interface_path: &str,
        data: D,
    ) -> Result<(), Error>
    where
        D: TryInto<AstarteType> + Send,
    {
        self.send_individual_impl(interface_name, interface_path, data, None)
            .await
    }

    /// Sends an individual datastream value with an explicit timestamp.
    pub async fn send_with_timestamp<D>(
        &self,
        interface_name: &str,
        interface_path: &str,
        data: D,
        timestamp: Timestamp,
    ) -> Result<(), Error>
    where
        D: TryInto<AstarteType> + Send,
    {
        self.send_individual_impl(interface_name, interface_path, data, Some(timestamp))
            .await
    }

    /// Sends an object aggregate on an interface.
    ///
    /// The entries are keyed by endpoint name, relative to the common
    /// publish path.
    pub async fn send_object(
        &self,
        interface_name: &str,
        interface_path: &str,
        data: HashMap<String, AstarteType>,
    ) -> Result<(), Error> {
        self.send_object_impl(interface_name, interface_path, data, None)
            .await
    }

    /// Sends an object aggregate with an explicit timestamp.
    pub async fn send_object_with_timestamp(
        &self,
        interface_name: &str,
        interface_path: &str,
        data: HashMap<String, AstarteType>,
        timestamp: Timestamp,
    ) -> Result<(), Error> {
        self.send_object_impl(interface_name, interface_path, data, Some(timestamp))
            .await
    }

    /// Sets a device owned property.
    ///
    /// The property is published with QoS 2 and written to the cache only
    /// once the broker acknowledges the publish, so a cached value is always
    /// one the server received. The acknowledgement is driven by
    /// [`AstarteDeviceSdk::poll`], which must run concurrently for this call
    /// to complete.
    pub async fn set_property<D>(
        &self,
        interface_name: &str,
        interface_path: &str,
        data: D,
    ) -> Result<(), Error>
    where
        D: TryInto<AstarteType> + Send,
    {
        let data = data.try_into().map_err(|_| TypeError::Conversion)?;

        let interface = self.device_interface(interface_name, InterfaceType::Properties)?;

        let mapping = interface.require_mapping(interface_path)?;
        mapping.validate(&data)?;

        let buf = payload::serialize_individual(&data, None)?;

        self.publish_property(interface_name, interface_path, buf)
            .await?;

        self.store
            .store_prop(StoredProp {
                interface: interface_name,
                path: interface_path,
                value: &data,
                interface_major: interface.version_major(),
                ownership: Ownership::Device,
            })
            .await?;

        debug!(
            "property {}{} acknowledged and cached",
            interface_name, interface_path
        );

        Ok(())
    }

    /// Unsets a device owned property.
    ///
    /// The mapping must declare `allow_unset`. Publishes an empty payload
    /// with QoS 2 and deletes the cached value once the broker acknowledges
    /// it. As for [`AstarteDeviceSdk::set_property`], the acknowledgement is
    /// driven by [`AstarteDeviceSdk::poll`].
    pub async fn unset_property(
        &self,
        interface_name: &str,
        interface_path: &str,
    ) -> Result<(), Error> {
        let interface = self.device_interface(interface_name, InterfaceType::Properties)?;

        let mapping = interface.require_mapping(interface_path)?;

        if !mapping.allow_unset() {
            return Err(InterfaceError::UnsetNotAllowed {
                endpoint: mapping.endpoint().to_string(),
            }
            .into());
        }

        self.publish_property(interface_name, interface_path, Vec::new())
            .await?;

        self.store.delete_prop(interface_name, interface_path).await?;

        debug!(
            "property {}{} unset acknowledged and removed from the cache",
            interface_name, interface_path
        );

        Ok(())
    }

    /// Returns the cached value of a property, when present.
    ///
    /// Stale values cached for a previous major version of the interface are
    /// deleted and reported as missing.
    pub async fn property(
        &self,
        interface_name: &str,
        interface_path: &str,
    ) -> Result<Option<AstarteType>, Error> {
        let Some(interface) = self.introspection.get(interface_name) else {
            return Ok(None);
        };

        self.store
            .load_prop_checked(interface_name, interface_path, interface.version_major())
            .await
            .map_err(Error::from)
    }

    async fn send_individual_impl<D>(
        &self,
        interface_name: &str,
        interface_path: &str,
        data: D,
        timestamp: Option<Timestamp>,
    ) -> Result<(), Error>
    where
        D: TryInto<AstarteType> + Send,
    {
        debug!("sending {} {}", interface_name, interface_path);

        let data = data.try_into().map_err(|_| TypeError::Conversion)?;

        let interface = self.device_interface(interface_name, InterfaceType::Datastream)?;

        if interface.aggregation() != Aggregation::Individual {
            return Err(InterfaceError::Unsupported {
                reason: "object interfaces take aggregates, use send_object",
            }
            .into());
        }

        let mapping = interface.require_mapping(interface_path)?;
        mapping.validate(&data)?;
        check_timestamp(mapping, &timestamp)?;

        let buf = payload::serialize_individual(&data, timestamp)?;

        self.publish_value(
            interface_name,
            interface_path,
            mapping.reliability().into(),
            buf,
        )
        .await
    }

    async fn send_object_impl(
        &self,
        interface_name: &str,
        interface_path: &str,
        data: HashMap<String, AstarteType>,
        timestamp: Option<Timestamp>,
    ) -> Result<(), Error>
    where
        S: PropertyStore,
    {
        debug!("sending object {} {}", interface_name, interface_path);

        let interface = self.device_interface(interface_name, InterfaceType::Datastream)?;

        if interface.aggregation() != Aggregation::Object {
            return Err(InterfaceError::Unsupported {
                reason: "individual interfaces take single values, use send",
            }
            .into());
        }

        interface.check_object_path(interface_path)?;

        let mut reliability = rumqttc::QoS::AtMostOnce;

        for (endpoint, value) in &data {
            let mapping = interface.object_entry_mapping(interface_path, endpoint)?;

            mapping.validate(value)?;
            check_timestamp(mapping, &timestamp)?;

            reliability = mapping.reliability().into();
        }

        let buf = payload::serialize_object(&data, timestamp)?;

        self.publish_value(interface_name, interface_path, reliability, buf)
            .await
    }

    /// Looks up a device owned interface of the given type.
    fn device_interface(
        &self,
        interface_name: &str,
        interface_type: InterfaceType,
    ) -> Result<&Interface, Error> {
        let interface = self.introspection.get(interface_name).ok_or_else(|| {
            InterfaceError::InterfaceNotFound {
                name: interface_name.to_string(),
            }
        })?;

        if interface.ownership() != Ownership::Device {
            return Err(InterfaceError::Unsupported {
                reason: "the interface is server owned",
            }
            .into());
        }

        if interface.interface_type() != interface_type {
            let reason = match interface_type {
                InterfaceType::Datastream => "the interface is a properties one, use set_property",
                InterfaceType::Properties => "the interface is a datastream one, use send",
            };

            return Err(InterfaceError::Unsupported { reason }.into());
        }

        Ok(interface)
    }

    async fn publish_value(
        &self,
        interface_name: &str,
        interface_path: &str,
        qos: QoS,
        buf: Vec<u8>,
    ) -> Result<(), Error> {
        let topic = format!("{}/{}{}", self.client_id(), interface_name, interface_path);

        self.mqtt.publish(topic, qos, buf).await.map_err(Error::from)
    }

    /// Publishes a property set or unset with QoS 2, completing only once
    /// the broker acknowledges it.
    async fn publish_property(
        &self,
        interface_name: &str,
        interface_path: &str,
        buf: Vec<u8>,
    ) -> Result<(), Error> {
        let topic = format!("{}/{}{}", self.client_id(), interface_name, interface_path);

        self.mqtt
            .publish_awaiting_ack(topic, QoS::ExactlyOnce, buf)
            .await
            .map_err(Error::from)
    }
}

fn check_timestamp(mapping: &Mapping, timestamp: &Option<Timestamp>) -> Result<(), Error> {
    if mapping.explicit_timestamp() && timestamp.is_none() {
        return Err(InterfaceError::MissingTimestamp {
            endpoint: mapping.endpoint().to_string(),
        }
        .into());
    }

    Ok(())
}

impl<S> fmt::Debug for AstarteDeviceSdk<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AstarteDeviceSdk")
            .field("introspection", &self.introspection)
            .finish_non_exhaustive()
    }
}
