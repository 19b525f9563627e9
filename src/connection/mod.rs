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

//! Lifecycle of the connection to Astarte.
//!
//! The device moves through `Disconnected -> Connecting -> Connected`,
//! driven only by [`AstarteDeviceSdk::poll`]. A new session that cannot be
//! resumed runs the full handshake: control and server interface
//! subscriptions, introspection publish, `emptyCache`, the replay of the
//! cached device owned properties and the purge properties list. The device
//! is connected once every handshake message has been acknowledged.

use std::sync::atomic::Ordering;

use rumqttc::{ConnAck, ConnectReturnCode, Packet, Publish, QoS, SubscribeReasonCode};
use tracing::{debug, error, trace, warn};

pub mod mqtt;

use crate::{
    error::Error,
    interface::{Aggregation, Ownership},
    payload,
    properties,
    store::{wrapper, PropertyStore, StoredProp},
    AstarteDeviceSdk, DeviceEvent, Value,
};

use self::mqtt::MqttError;

/// Internal connection state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    /// Initial state, or after a disconnection.
    Disconnected,
    /// Waiting for the broker CONNACK.
    Connecting {
        /// Instant after which the CONNACK wait times out.
        connack_deadline: tokio::time::Instant,
    },
    /// CONNACK received, waiting for the handshake ACKs to drain.
    Handshake,
    /// Session fully established.
    Connected,
}

impl<S> AstarteDeviceSdk<S>
where
    S: PropertyStore,
{
    /// Connects the device to Astarte.
    ///
    /// Pairs the device when no transport is attached yet: the pairing API
    /// is called to discover the broker and to exchange a freshly generated
    /// key and CSR for the client certificate. The call returns once the
    /// MQTT CONNECT is initiated, the session is established by [`poll`]
    /// (see [`AstarteDeviceSdk::poll`]).
    pub async fn connect(&self) -> Result<(), Error> {
        match self.state().await {
            ConnectionState::Connecting { .. } | ConnectionState::Handshake => {
                warn!("connect called while the device is connecting");

                return Err(Error::AlreadyConnecting);
            }
            ConnectionState::Connected => {
                warn!("connect called while the device is already connected");

                return Err(Error::AlreadyConnected);
            }
            ConnectionState::Disconnected => {}
        }

        if !self.mqtt.is_attached().await {
            self.pair_and_attach().await?;
        }

        let connack_deadline = tokio::time::Instant::now() + self.config.connection_timeout;

        debug!("device connection state -> CONNECTING");
        self.set_state(ConnectionState::Connecting { connack_deadline })
            .await;

        Ok(())
    }

    #[cfg(not(test))]
    async fn pair_and_attach(&self) -> Result<(), Error> {
        let (client, eventloop) = crate::pairing::connect_transport(&self.config).await?;

        self.mqtt.attach(client, eventloop).await;

        Ok(())
    }

    // Tests attach the mocked transport before calling connect.
    #[cfg(test)]
    async fn pair_and_attach(&self) -> Result<(), Error> {
        Err(Error::Mqtt(MqttError::Detached))
    }

    /// Disconnects the device, sending the MQTT DISCONNECT.
    ///
    /// Errors with [`Error::DeviceNotReady`] when the device is already
    /// disconnected.
    pub async fn disconnect(&self) -> Result<(), Error> {
        if matches!(self.state().await, ConnectionState::Disconnected) {
            error!("disconnection request for a disconnected device will be ignored");

            return Err(Error::DeviceNotReady);
        }

        self.mqtt.disconnect().await?;
        self.drop_to_disconnected().await;

        Ok(())
    }

    /// Advances the device state machine.
    ///
    /// Must be called periodically by a single task: it drives the session
    /// establishment, receives data and dispatches the events. Blocks at
    /// most for the configured poll timeout and returns normally when the
    /// window elapses without data.
    pub async fn poll(&self) -> Result<(), Error> {
        match self.state().await {
            ConnectionState::Disconnected => {
                if !self.mqtt.is_attached().await {
                    return Err(Error::DeviceNotReady);
                }
            }
            ConnectionState::Connecting { connack_deadline } => {
                if tokio::time::Instant::now() >= connack_deadline {
                    error!("timed out while waiting for the broker CONNACK");

                    self.drop_to_disconnected().await;

                    return Err(Error::Timeout);
                }
            }
            ConnectionState::Handshake => {
                if self.subscription_failure.load(Ordering::Acquire) {
                    error!("subscription request has been denied, irrecoverable error");

                    return Err(Error::Subscription);
                }

                if !self.mqtt.has_pending_outgoing().await {
                    self.finish_handshake().await?;
                }
            }
            ConnectionState::Connected => {}
        }

        match self.mqtt.poll(self.config.poll_timeout).await {
            Ok(Some(packet)) => self.handle_packet(packet).await,
            Ok(None) => Ok(()),
            Err(err) => {
                error!("error while polling the connection: {err}");

                self.drop_to_disconnected().await;

                Err(err.into())
            }
        }
    }

    async fn handle_packet(&self, packet: Packet) -> Result<(), Error> {
        match packet {
            Packet::ConnAck(connack) => self.handle_connack(connack).await,
            Packet::SubAck(suback) => {
                let failure = suback
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));

                if failure {
                    error!("subscription rejected by the broker");

                    self.subscription_failure.store(true, Ordering::Release);
                }

                Ok(())
            }
            Packet::Publish(publish) => self.handle_publish(publish).await,
            Packet::Disconnect => {
                warn!("broker disconnected the device");

                self.drop_to_disconnected().await;

                Ok(())
            }
            packet => {
                trace!("packet received {:?}", packet);

                Ok(())
            }
        }
    }

    async fn handle_connack(&self, connack: ConnAck) -> Result<(), Error> {
        if connack.code != ConnectReturnCode::Success {
            self.drop_to_disconnected().await;

            return Err(Error::Mqtt(MqttError::Connack(connack.code)));
        }

        self.mqtt.clear_pending().await;

        let canonical = self.introspection.canonical_string();

        if connack.session_present && self.store.check_introspection(&canonical).await? {
            debug!("session resumed, device connection state -> CONNECTED");
            self.set_state(ConnectionState::Connected).await;
            self.send_event(Ok(DeviceEvent::Connected)).await;

            return Ok(());
        }

        self.subscription_failure.store(false, Ordering::Release);

        self.setup_subscriptions().await?;
        self.send_introspection(canonical).await?;
        self.send_emptycache().await?;
        self.send_device_properties().await?;
        self.send_purge_device_properties().await?;

        debug!("handshake sent, device connection state -> CONNECTING");
        self.set_state(ConnectionState::Handshake).await;

        Ok(())
    }

    async fn finish_handshake(&self) -> Result<(), Error> {
        self.store
            .store_introspection_str(&self.introspection.canonical_string())
            .await?;

        debug!("handshake acknowledged, device connection state -> CONNECTED");
        self.set_state(ConnectionState::Connected).await;
        self.send_event(Ok(DeviceEvent::Connected)).await;

        Ok(())
    }

    async fn setup_subscriptions(&self) -> Result<(), Error> {
        let client_id = self.client_id();

        self.mqtt
            .subscribe(format!("{client_id}/control/consumer/properties"))
            .await?;

        let server_interfaces = self
            .introspection
            .iter()
            .filter(|interface| interface.ownership() == Ownership::Server);

        for interface in server_interfaces {
            self.mqtt
                .subscribe(format!(
                    "{client_id}/{}/#",
                    interface.interface_name()
                ))
                .await?;
        }

        Ok(())
    }

    async fn send_introspection(&self, canonical: String) -> Result<(), Error> {
        debug!("sending introspection: {}", canonical);

        let topic = self.client_id().to_string();

        self.mqtt
            .publish(topic, QoS::ExactlyOnce, canonical.into_bytes())
            .await
            .map_err(Error::from)
    }

    async fn send_emptycache(&self) -> Result<(), Error> {
        let topic = format!("{}/control/emptyCache", self.client_id());
        debug!("sending emptyCache to {}", topic);

        self.mqtt
            .publish(topic, QoS::ExactlyOnce, b"1".to_vec())
            .await
            .map_err(Error::from)
    }

    /// Replays the device owned cached properties.
    ///
    /// Entries whose interface or major version is no longer in the
    /// introspection are purged from the cache instead of being sent.
    async fn send_device_properties(&self) -> Result<(), Error> {
        let props = self.store.load_all_props().await?;

        for prop in props {
            if !self
                .introspection
                .contains_major(&prop.interface, prop.interface_major)
            {
                warn!(
                    "deleting cached property {}{} no longer in the introspection",
                    prop.interface, prop.path
                );

                self.store.delete_prop(&prop.interface, &prop.path).await?;

                continue;
            }

            if prop.ownership != Ownership::Device {
                continue;
            }

            debug!(
                "sending device owned property = {}{}",
                prop.interface, prop.path
            );

            let topic = format!("{}/{}{}", self.client_id(), prop.interface, prop.path);
            let buf = payload::serialize_individual(&prop.value, None)?;

            self.mqtt.publish(topic, QoS::ExactlyOnce, buf).await?;
        }

        Ok(())
    }

    /// Publishes the list of the device owned cached properties, so the
    /// server can delete any extra one.
    async fn send_purge_device_properties(&self) -> Result<(), Error> {
        let device_props = self.store.device_props().await?;

        let list = wrapper::join_props_paths(&device_props);
        let buf = properties::serialize_props(&list)?;

        let topic = format!("{}/control/producer/properties", self.client_id());
        debug!("sending purge properties to {}", topic);

        self.mqtt.publish(topic, QoS::ExactlyOnce, buf).await?;

        Ok(())
    }

    async fn handle_publish(&self, publish: Publish) -> Result<(), Error> {
        debug!("incoming publish on {}", publish.topic);

        let parsed = match crate::topic::ParsedTopic::try_parse(self.client_id(), &publish.topic) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("discarding message on an unexpected topic: {err}");

                return Ok(());
            }
        };

        match parsed {
            crate::topic::ParsedTopic::PurgeProperties => {
                self.reconcile_server_properties(&publish.payload).await
            }
            crate::topic::ParsedTopic::InterfacePath { interface, path } => {
                match self.dispatch_data(interface, path, &publish.payload).await {
                    Ok(Some(event)) => {
                        self.send_event(Ok(event)).await;

                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    // Store failures compromise the cache consistency.
                    Err(err @ Error::Store(_)) => Err(err),
                    Err(err) => {
                        warn!("error while handling a received message: {err}");

                        self.send_event(Err(err)).await;

                        Ok(())
                    }
                }
            }
        }
    }

    async fn dispatch_data(
        &self,
        interface: &str,
        path: &str,
        buf: &[u8],
    ) -> Result<Option<DeviceEvent>, Error> {
        let Some(iface) = self.introspection.get(interface) else {
            warn!("unknown interface {}, dropping the message", interface);

            return Ok(None);
        };

        if iface.is_properties() {
            let mapping = iface.require_mapping(path)?;

            if buf.is_empty() {
                if !mapping.allow_unset() {
                    warn!(
                        "received an unset for the mapping {}{} without allow_unset",
                        interface, path
                    );
                }

                self.store.delete_prop(interface, path).await?;

                return Ok(Some(DeviceEvent::data(interface, path, Value::PropertyUnset)));
            }

            let (value, _timestamp) = payload::deserialize_individual(mapping, buf)?;

            self.store
                .store_prop(StoredProp {
                    interface,
                    path,
                    value: &value,
                    interface_major: iface.version_major(),
                    ownership: iface.ownership(),
                })
                .await?;

            return Ok(Some(DeviceEvent::data(
                interface,
                path,
                Value::PropertySet(value),
            )));
        }

        match iface.aggregation() {
            Aggregation::Individual => {
                let mapping = iface.require_mapping(path)?;

                let (data, timestamp) = payload::deserialize_individual(mapping, buf)?;

                Ok(Some(DeviceEvent::data(
                    interface,
                    path,
                    Value::Individual { data, timestamp },
                )))
            }
            Aggregation::Object => {
                iface.check_object_path(path)?;

                let (data, timestamp) = payload::deserialize_object(iface, path, buf)?;

                Ok(Some(DeviceEvent::data(
                    interface,
                    path,
                    Value::Object { data, timestamp },
                )))
            }
        }
    }

    /// Deletes the cached server owned properties absent from the
    /// authoritative list sent by the server.
    async fn reconcile_server_properties(&self, buf: &[u8]) -> Result<(), Error> {
        debug!("reconciling the server owned properties");

        let paths = match properties::extract_set_properties(buf) {
            Ok(paths) => paths,
            Err(err) => {
                warn!("couldn't parse the properties list: {err}");

                return Ok(());
            }
        };

        let stored = self.store.server_props().await?;

        for prop in stored {
            let entry = format!("{}{}", prop.interface, prop.path);

            if !paths.contains(&entry) {
                debug!("deleting the server property {} not in the list", entry);

                self.store.delete_prop(&prop.interface, &prop.path).await?;
            }
        }

        Ok(())
    }

    pub(crate) async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub(crate) async fn set_state(&self, state: ConnectionState) {
        *self.state.lock().await = state;
    }

    /// Detaches the transport and emits the disconnection event.
    async fn drop_to_disconnected(&self) {
        self.mqtt.detach().await;

        let previous = {
            let mut state = self.state.lock().await;

            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };

        if !matches!(previous, ConnectionState::Disconnected) {
            debug!("device connection state -> DISCONNECTED");

            self.send_event(Ok(DeviceEvent::Disconnected)).await;
        }
    }

    pub(crate) async fn send_event(&self, event: Result<DeviceEvent, Error>) {
        if self.tx.send(event).await.is_err() {
            error!("the event receiver has been dropped, discarding the event");
        }
    }
}
