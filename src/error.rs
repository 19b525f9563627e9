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

//! Error types for the Astarte device runtime.

use crate::connection::mqtt::MqttError;
use crate::crypto::CryptoError;
use crate::interface::InterfaceError;
use crate::pairing::PairingError;
use crate::payload::PayloadError;
use crate::properties::PropertiesError;
use crate::store::error::StoreError;
use crate::topic::TopicError;
use crate::types::TypeError;

/// Astarte error.
///
/// Possible errors returned by the functions of the device runtime.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid interface, mapping or validation failure.
    #[error("invalid interface")]
    Interface(#[from] InterfaceError),

    /// Errors when converting between Astarte types.
    #[error("couldn't convert to an Astarte type")]
    Types(#[from] TypeError),

    /// Errors that can occur handling the payload.
    #[error("couldn't process the payload")]
    Payload(#[from] PayloadError),

    /// Error while handling the properties control payloads.
    #[error("couldn't handle the properties list")]
    Properties(#[from] PropertiesError),

    /// Private key or CSR generation failed.
    #[error("couldn't generate the device credentials")]
    Crypto(#[from] CryptoError),

    /// Error while pairing the device with Astarte.
    #[error("couldn't pair the device")]
    Pairing(#[from] PairingError),

    /// Error returned by a store operation.
    #[error("couldn't complete the store operation")]
    Store(#[from] StoreError),

    /// Received a message on an invalid topic.
    #[error("invalid topic {}", .0.topic())]
    Topic(#[from] TopicError),

    /// Error from the MQTT transport.
    #[error("MQTT transport error")]
    Mqtt(#[from] MqttError),

    /// Connect called while the device is connecting.
    #[error("the device is already connecting")]
    AlreadyConnecting,

    /// Connect called while the device is connected.
    #[error("the device is already connected")]
    AlreadyConnected,

    /// Operation requiring a session on a disconnected device.
    #[error("the device is not connected")]
    DeviceNotReady,

    /// The broker CONNACK didn't arrive in time.
    #[error("timed out while waiting for the broker CONNACK")]
    Timeout,

    /// A handshake subscription was rejected, the session cannot recover.
    #[error("a subscription request was rejected by the broker")]
    Subscription,
}
