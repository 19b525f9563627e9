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

//! Thin typed layer over the rumqttc client.
//!
//! Tracks the outstanding acknowledgements of the session:
//! [`Mqtt::has_pending_outgoing`] is true while any QoS > 0 publish or any
//! subscribe has not been acknowledged by the broker yet. Requests enter a
//! queue when handed to the client, are matched to their packet id when the
//! event loop processes them, and leave the in flight set on the matching
//! `PUBACK`/`PUBCOMP`/`SUBACK`. A publish sent with
//! [`Mqtt::publish_awaiting_ack`] additionally carries a notifier that is
//! resolved by the acknowledgement, so the caller can order side effects
//! after it.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use rumqttc::{ClientError, ConnectionError, Event, Outgoing, Packet, QoS};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, trace};

#[cfg(test)]
pub(crate) use crate::mock::{MockAsyncClient as AsyncClient, MockEventLoop as EventLoop};
#[cfg(not(test))]
pub(crate) use rumqttc::{AsyncClient, EventLoop};

use crate::topic::ClientId;

/// Error from the MQTT transport layer.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// Couldn't hand the request to the MQTT client.
    #[error("couldn't send the request to the MQTT client")]
    Client(#[from] ClientError),
    /// The connection to the broker failed.
    #[error("MQTT connection error")]
    Connection(#[from] ConnectionError),
    /// The broker refused the connection.
    #[error("the broker refused the connection: {0:?}")]
    Connack(rumqttc::ConnectReturnCode),
    /// The transport is not attached, the device needs to connect first.
    #[error("the MQTT transport is not attached")]
    Detached,
    /// The session was closed before the message was acknowledged.
    #[error("the session was closed before the message was acknowledged")]
    Interrupted,
}

/// Bookkeeping of the unacknowledged requests of the session.
///
/// Requests have no packet id until the event loop processes them, so they
/// are queued in submission order first: publishes and subscribes are
/// distinct [`Outgoing`] events, hence the two queues.
#[derive(Debug, Default)]
struct AckTracking {
    /// QoS > 0 publishes handed to the client, waiting for their packet id.
    ///
    /// An entry carries the notifier of a caller awaiting the ACK, if any.
    queued_publishes: VecDeque<Option<oneshot::Sender<()>>>,
    /// Subscribes handed to the client, waiting for their packet id.
    queued_subscribes: usize,
    /// Packet ids in flight, with the notifier to resolve on the ACK.
    inflight: HashMap<u16, Option<oneshot::Sender<()>>>,
}

impl AckTracking {
    fn is_empty(&self) -> bool {
        self.queued_publishes.is_empty() && self.queued_subscribes == 0 && self.inflight.is_empty()
    }

    /// Dropping the queued notifiers wakes the waiters with an error.
    fn clear(&mut self) {
        self.queued_publishes.clear();
        self.queued_subscribes = 0;
        self.inflight.clear();
    }
}

/// Wrapper over the MQTT client and event loop of a session.
///
/// The client is attached on connect and detached on disconnect, so a
/// detached device cannot publish. All the topics are prefixed with the
/// device [`ClientId`].
pub(crate) struct Mqtt {
    client_id: ClientId,
    client: RwLock<Option<AsyncClient>>,
    eventloop: Mutex<Option<EventLoop>>,
    acks: Mutex<AckTracking>,
}

impl Mqtt {
    pub(crate) fn new(realm: String, device_id: String) -> Self {
        Self {
            client_id: ClientId { realm, device_id },
            client: RwLock::new(None),
            eventloop: Mutex::new(None),
            acks: Mutex::new(AckTracking::default()),
        }
    }

    pub(crate) fn client_id(&self) -> ClientId<&str> {
        self.client_id.as_ref()
    }

    pub(crate) async fn attach(&self, client: AsyncClient, eventloop: EventLoop) {
        *self.client.write().await = Some(client);
        *self.eventloop.lock().await = Some(eventloop);

        self.clear_pending().await;
    }

    pub(crate) async fn detach(&self) {
        self.client.write().await.take();
        self.eventloop.lock().await.take();

        self.clear_pending().await;
    }

    pub(crate) async fn is_attached(&self) -> bool {
        self.client.read().await.is_some()
    }

    /// Subscribes to a topic, always at QoS 2.
    pub(crate) async fn subscribe(&self, topic: String) -> Result<(), MqttError> {
        debug!("subscribing to {}", topic);

        let client = self.client.read().await;
        let client = client.as_ref().ok_or(MqttError::Detached)?;

        // The lock is held across the send, so the queue order matches the
        // order of the requests in the client.
        let mut acks = self.acks.lock().await;
        acks.queued_subscribes += 1;

        if let Err(err) = client.subscribe(topic, QoS::ExactlyOnce).await {
            acks.queued_subscribes -= 1;

            return Err(err.into());
        }

        Ok(())
    }

    /// Publishes a payload, retain is always false.
    pub(crate) async fn publish(
        &self,
        topic: String,
        qos: QoS,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        self.publish_with_notifier(topic, qos, payload, None).await?;

        Ok(())
    }

    /// Publishes a payload and waits for the broker acknowledgement, the
    /// `PUBACK` of a QoS 1 or the `PUBCOMP` of a QoS 2 publish.
    ///
    /// The acknowledgement is received by the event loop, so the connection
    /// must be polled concurrently for this future to resolve. Errors with
    /// [`MqttError::Interrupted`] when the session is closed first.
    pub(crate) async fn publish_awaiting_ack(
        &self,
        topic: String,
        qos: QoS,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        debug_assert_ne!(qos, QoS::AtMostOnce);

        let (tx, rx) = oneshot::channel();

        self.publish_with_notifier(topic, qos, payload, Some(tx))
            .await?;

        rx.await.map_err(|_| MqttError::Interrupted)
    }

    async fn publish_with_notifier(
        &self,
        topic: String,
        qos: QoS,
        payload: Vec<u8>,
        notifier: Option<oneshot::Sender<()>>,
    ) -> Result<(), MqttError> {
        trace!("publishing {} bytes on {}", payload.len(), topic);

        let client = self.client.read().await;
        let client = client.as_ref().ok_or(MqttError::Detached)?;

        if qos == QoS::AtMostOnce {
            let _ = client.publish(topic, qos, false, payload).await?;

            return Ok(());
        }

        // The lock is held across the send, so the queue order matches the
        // order of the requests in the client.
        let mut acks = self.acks.lock().await;
        acks.queued_publishes.push_back(notifier);

        if let Err(err) = client.publish(topic, qos, false, payload).await {
            acks.queued_publishes.pop_back();

            return Err(err.into());
        }

        Ok(())
    }

    /// Sends the MQTT disconnect and detaches the transport.
    pub(crate) async fn disconnect(&self) -> Result<(), MqttError> {
        {
            let client = self.client.read().await;
            let client = client.as_ref().ok_or(MqttError::Detached)?;

            let _ = client.disconnect().await?;
        }

        self.detach().await;

        Ok(())
    }

    /// True while any non QoS 0 publish or subscribe lacks its ACK.
    pub(crate) async fn has_pending_outgoing(&self) -> bool {
        !self.acks.lock().await.is_empty()
    }

    pub(crate) async fn clear_pending(&self) {
        self.acks.lock().await.clear();
    }

    /// Polls the event loop for at most `timeout`, returning the next
    /// incoming packet or [`None`] when the window elapses without data.
    ///
    /// Outgoing events only update the ACK tracking and don't consume the
    /// poll window.
    pub(crate) async fn poll(&self, timeout: Duration) -> Result<Option<Packet>, MqttError> {
        let mut lock = self.eventloop.lock().await;
        let eventloop = lock.as_mut().ok_or(MqttError::Detached)?;

        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let remaining = deadline - now;

            let event = match tokio::time::timeout(remaining, eventloop.poll()).await {
                Ok(res) => res?,
                Err(_elapsed) => return Ok(None),
            };

            match event {
                Event::Incoming(packet) => {
                    self.track_incoming(&packet).await;

                    return Ok(Some(packet));
                }
                Event::Outgoing(outgoing) => {
                    trace!("MQTT outgoing = {:?}", outgoing);

                    self.track_outgoing(&outgoing).await;
                }
            }
        }
    }

    async fn track_outgoing(&self, outgoing: &Outgoing) {
        match outgoing {
            // pkid 0 is a QoS 0 publish, which is never acknowledged
            Outgoing::Publish(pkid) if *pkid != 0 => {
                let mut acks = self.acks.lock().await;

                // An empty queue means the event loop is retransmitting a
                // publish from a previous session.
                let notifier = acks.queued_publishes.pop_front().flatten();

                acks.inflight.insert(*pkid, notifier);
            }
            Outgoing::Subscribe(pkid) => {
                let mut acks = self.acks.lock().await;

                acks.queued_subscribes = acks.queued_subscribes.saturating_sub(1);
                acks.inflight.insert(*pkid, None);
            }
            _ => {}
        }
    }

    async fn track_incoming(&self, packet: &Packet) {
        let pkid = match packet {
            Packet::PubAck(puback) => puback.pkid,
            Packet::PubComp(pubcomp) => pubcomp.pkid,
            Packet::SubAck(suback) => suback.pkid,
            _ => return,
        };

        if let Some(notifier) = self.acks.lock().await.inflight.remove(&pkid) {
            if let Some(tx) = notifier {
                let _ = tx.send(());
            }
        }
    }
}

impl std::fmt::Debug for Mqtt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mqtt")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rumqttc::{PubAck, PubComp, SubAck, SubscribeReasonCode};

    use super::*;

    fn detached_mqtt() -> Mqtt {
        Mqtt::new("realm".to_string(), "device_id".to_string())
    }

    #[test]
    fn client_id_display() {
        let mqtt = detached_mqtt();

        assert_eq!(mqtt.client_id().to_string(), "realm/device_id");
    }

    #[tokio::test]
    async fn publish_on_detached_transport() {
        let mqtt = detached_mqtt();

        let err = mqtt
            .publish("t".to_string(), QoS::AtMostOnce, vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, MqttError::Detached));
    }

    #[tokio::test]
    async fn pending_tracking_publish_qos2() {
        let mqtt = detached_mqtt();

        assert!(!mqtt.has_pending_outgoing().await);

        // the request was handed to the client
        mqtt.acks.lock().await.queued_publishes.push_back(None);
        assert!(mqtt.has_pending_outgoing().await);

        // the event loop processed it
        mqtt.track_outgoing(&Outgoing::Publish(1)).await;
        assert!(mqtt.has_pending_outgoing().await);

        // QoS 2 frees the pkid on PUBCOMP
        mqtt.track_incoming(&Packet::PubComp(PubComp { pkid: 1 })).await;
        assert!(!mqtt.has_pending_outgoing().await);
    }

    #[tokio::test]
    async fn pending_tracking_publish_qos1() {
        let mqtt = detached_mqtt();

        mqtt.acks.lock().await.queued_publishes.push_back(None);
        mqtt.track_outgoing(&Outgoing::Publish(3)).await;

        mqtt.track_incoming(&Packet::PubAck(PubAck { pkid: 3 })).await;

        assert!(!mqtt.has_pending_outgoing().await);
    }

    #[tokio::test]
    async fn pending_tracking_qos0_is_ignored() {
        let mqtt = detached_mqtt();

        mqtt.track_outgoing(&Outgoing::Publish(0)).await;

        assert!(!mqtt.has_pending_outgoing().await);
    }

    #[tokio::test]
    async fn pending_tracking_subscribe() {
        let mqtt = detached_mqtt();

        mqtt.acks.lock().await.queued_subscribes += 1;
        mqtt.track_outgoing(&Outgoing::Subscribe(7)).await;
        assert!(mqtt.has_pending_outgoing().await);

        mqtt.track_incoming(&Packet::SubAck(SubAck {
            pkid: 7,
            return_codes: vec![SubscribeReasonCode::Success(QoS::ExactlyOnce)],
        }))
        .await;

        assert!(!mqtt.has_pending_outgoing().await);
    }

    #[tokio::test]
    async fn notifier_resolves_on_the_ack() {
        let mqtt = detached_mqtt();

        let (tx, rx) = oneshot::channel();
        mqtt.acks.lock().await.queued_publishes.push_back(Some(tx));

        mqtt.track_outgoing(&Outgoing::Publish(1)).await;
        mqtt.track_incoming(&Packet::PubComp(PubComp { pkid: 1 })).await;

        rx.await.unwrap();
        assert!(!mqtt.has_pending_outgoing().await);
    }

    #[tokio::test]
    async fn clear_pending_interrupts_the_waiters() {
        let mqtt = detached_mqtt();

        let (tx, rx) = oneshot::channel();
        mqtt.acks.lock().await.queued_publishes.push_back(Some(tx));

        mqtt.clear_pending().await;

        assert!(rx.await.is_err());
        assert!(!mqtt.has_pending_outgoing().await);
    }

    #[tokio::test]
    async fn retransmission_without_a_queued_request() {
        let mqtt = detached_mqtt();

        // e.g. rumqttc re-sending an in flight publish after a reconnection
        mqtt.track_outgoing(&Outgoing::Publish(9)).await;
        assert!(mqtt.has_pending_outgoing().await);

        mqtt.track_incoming(&Packet::PubComp(PubComp { pkid: 9 })).await;
        assert!(!mqtt.has_pending_outgoing().await);
    }

    #[tokio::test]
    async fn poll_times_out_without_data() {
        let mqtt = detached_mqtt();

        let mut eventloop = EventLoop::default();
        // Outgoing events don't consume the poll window, so an event loop
        // that only yields them times out without data.
        eventloop
            .expect_poll()
            .returning(|| Ok(Event::Outgoing(Outgoing::PingReq)));

        mqtt.attach(AsyncClient::default(), eventloop).await;

        let polled = mqtt.poll(Duration::from_millis(10)).await.unwrap();

        assert_eq!(polled, None);
    }
}
