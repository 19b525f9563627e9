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

//! State shared between the cloned handles of a device.

use std::sync::atomic::AtomicBool;

use tokio::sync::Mutex;

use crate::{
    connection::{mqtt::Mqtt, ConnectionState},
    introspection::Introspection,
    options::MqttConfig,
    store::wrapper::StoreWrapper,
    EventSender,
};

/// Inner state of an [`AstarteDeviceSdk`](crate::AstarteDeviceSdk), shared
/// behind an [`Arc`](std::sync::Arc) by all its clones.
pub struct SharedDevice<S> {
    pub(crate) config: MqttConfig,
    pub(crate) introspection: Introspection,
    pub(crate) store: StoreWrapper<S>,
    pub(crate) mqtt: Mqtt,
    pub(crate) state: Mutex<ConnectionState>,
    pub(crate) subscription_failure: AtomicBool,
    pub(crate) tx: EventSender,
}
