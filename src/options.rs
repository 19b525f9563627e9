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

//! Provides the functionality to configure and build an instance of the
//! [`AstarteDeviceSdk`].

use std::{
    ffi::OsStr,
    fmt::Debug,
    io,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
    sync::Arc,
    time::Duration,
};

use base64::Engine;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::{
    connection::{mqtt::Mqtt, ConnectionState},
    interface::{Interface, InterfaceError},
    introspection::Introspection,
    store::{memory::MemoryStore, wrapper::StoreWrapper, PropertyStore},
    AstarteDeviceSdk, EventReceiver, SharedDevice,
};

/// Size in bytes of a decoded device id (128 bit UUID).
const DEVICE_ID_LEN: usize = 16;

/// Capacity of the device event channel.
const EVENT_CHANNEL_SIZE: usize = 50;

/// Astarte builder error.
///
/// Possible errors used by the builder module.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum BuilderError {
    /// Error while adding an interface.
    #[error("error creating interface")]
    Interface(#[from] InterfaceError),

    /// Couldn't read the interfaces directory.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The device id is not a 22 characters base64 URL encoded UUID.
    #[error("invalid device id: '{0}'")]
    InvalidDeviceId(String),
}

/// Configuration for the MQTT connection of a device.
#[derive(Clone)]
pub struct MqttConfig {
    pub(crate) realm: String,
    pub(crate) device_id: String,
    pub(crate) credentials_secret: String,
    pub(crate) pairing_url: String,
    pub(crate) ignore_ssl_errors: bool,
    pub(crate) keepalive: Duration,
    pub(crate) http_timeout: Duration,
    pub(crate) connection_timeout: Duration,
    pub(crate) poll_timeout: Duration,
}

impl Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("realm", &self.realm)
            .field("device_id", &self.device_id)
            .field("credentials_secret", &"REDACTED")
            .field("pairing_url", &self.pairing_url)
            .field("ignore_ssl_errors", &self.ignore_ssl_errors)
            .field("keepalive", &self.keepalive)
            .field("http_timeout", &self.http_timeout)
            .field("connection_timeout", &self.connection_timeout)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

impl MqttConfig {
    /// Creates the configuration for the given device.
    ///
    /// The pairing URL is the base URL of the Astarte pairing API, e.g.
    /// `https://api.astarte.example/pairing`.
    pub fn new(realm: &str, device_id: &str, credentials_secret: &str, pairing_url: &str) -> Self {
        Self {
            realm: realm.to_owned(),
            device_id: device_id.to_owned(),
            credentials_secret: credentials_secret.to_owned(),
            pairing_url: pairing_url.to_owned(),
            ignore_ssl_errors: false,
            keepalive: Duration::from_secs(30),
            http_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_millis(500),
        }
    }

    /// Configures the keep alive timeout.
    ///
    /// The MQTT broker will be pinged when no data exchange has happened for
    /// the duration of the keep alive timeout.
    pub fn keepalive(mut self, duration: Duration) -> Self {
        self.keepalive = duration;

        self
    }

    /// Ignores TLS/SSL certificate errors and accepts a `mqtt://` broker.
    ///
    /// Only meant for development setups.
    pub fn ignore_ssl_errors(mut self) -> Self {
        self.ignore_ssl_errors = true;

        self
    }

    /// Timeout of the pairing HTTP calls.
    pub fn http_timeout(mut self, duration: Duration) -> Self {
        self.http_timeout = duration;

        self
    }

    /// Timeout for the broker CONNACK after initiating the connection.
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.connection_timeout = duration;

        self
    }

    /// Maximum blocking time of a single [`AstarteDeviceSdk::poll`] call.
    pub fn poll_timeout(mut self, duration: Duration) -> Self {
        self.poll_timeout = duration;

        self
    }
}

/// Structure used to configure and build an instance of the
/// [`AstarteDeviceSdk`].
#[derive(Clone)]
pub struct DeviceBuilder<S> {
    pub(crate) introspection: Introspection,
    pub(crate) store: S,
}

impl<S> Debug for DeviceBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuilder")
            .field("introspection", &self.introspection)
            // We manually implement Debug to avoid a trait bound on `S`.
            .finish_non_exhaustive()
    }
}

impl DeviceBuilder<MemoryStore> {
    /// Creates a builder backed by an in memory property store.
    pub fn new() -> Self {
        DeviceBuilder {
            introspection: Introspection::new(),
            store: MemoryStore::new(),
        }
    }
}

impl Default for DeviceBuilder<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> DeviceBuilder<S> {
    /// Adds an [`Interface`] to the device introspection.
    ///
    /// Errors on duplicated interface names.
    pub fn interface(mut self, interface: Interface) -> Result<Self, BuilderError> {
        debug!("adding interface {}", interface.interface_name());

        self.introspection.add(interface)?;

        Ok(self)
    }

    /// Adds an interface from its JSON definition.
    pub fn interface_str(self, json: &str) -> Result<Self, BuilderError> {
        let interface = json.parse()?;

        self.interface(interface)
    }

    /// Adds a single interface from the provided `.json` file.
    pub fn interface_file(self, file_path: &Path) -> Result<Self, BuilderError> {
        let interface = Interface::from_file(file_path)?;

        self.interface(interface)
    }

    /// Adds all the interfaces from the `.json` files contained in the
    /// specified folder.
    pub fn interface_directory<P>(self, interfaces_directory: P) -> Result<Self, BuilderError>
    where
        P: AsRef<Path>,
    {
        walk_dir_json(interfaces_directory)?
            .iter()
            .try_fold(self, |acc, path| acc.interface_file(path))
    }

    /// Sets the backing storage for the device properties.
    pub fn store<T>(self, store: T) -> DeviceBuilder<T>
    where
        T: PropertyStore,
    {
        DeviceBuilder {
            introspection: self.introspection,
            store,
        }
    }

    /// Builds the device and the receiving end of its event channel.
    ///
    /// The device is created disconnected, call
    /// [`AstarteDeviceSdk::connect`] to pair it and initiate the session.
    pub fn build(self, config: MqttConfig) -> Result<(AstarteDeviceSdk<S>, EventReceiver), BuilderError>
    where
        S: PropertyStore,
    {
        validate_device_id(&config.device_id)?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let mqtt = Mqtt::new(config.realm.clone(), config.device_id.clone());

        let device = AstarteDeviceSdk {
            shared: Arc::new(SharedDevice {
                config,
                introspection: self.introspection,
                store: StoreWrapper::new(self.store),
                mqtt,
                state: Mutex::new(ConnectionState::Disconnected),
                subscription_failure: AtomicBool::new(false),
                tx,
            }),
        };

        Ok((device, rx))
    }
}

/// Checks that the device id is a base64 URL encoded 128 bit identifier.
fn validate_device_id(device_id: &str) -> Result<(), BuilderError> {
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(device_id)
        .map_err(|_| BuilderError::InvalidDeviceId(device_id.to_string()))?;

    if decoded.len() != DEVICE_ID_LEN {
        return Err(BuilderError::InvalidDeviceId(device_id.to_string()));
    }

    Ok(())
}

/// Walks a directory returning an array of json files.
fn walk_dir_json<P>(path: P) -> Result<Vec<PathBuf>, io::Error>
where
    P: AsRef<Path>,
{
    std::fs::read_dir(path)?
        .map(|res| {
            res.and_then(|entry| {
                let path = entry.path();
                let metadata = entry.metadata()?;

                Ok((path, metadata))
            })
        })
        .filter_map(|res| match res {
            Ok((path, metadata)) => {
                if metadata.is_file() && path.extension() == Some(OsStr::new("json")) {
                    Some(Ok(path))
                } else {
                    None
                }
            }
            Err(e) => Some(Err(e)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::interface::tests::{DEVICE_DATASTREAM, SERVER_DATASTREAM};

    use super::*;

    const DEVICE_ID: &str = "2TBn-jNESuuHamE2Zo1anA";

    #[test]
    fn build_with_interfaces() {
        let (device, _rx) = DeviceBuilder::new()
            .interface_str(DEVICE_DATASTREAM)
            .unwrap()
            .interface_str(SERVER_DATASTREAM)
            .unwrap()
            .build(MqttConfig::new(
                "realm",
                DEVICE_ID,
                "secret",
                "https://api.astarte.example/pairing",
            ))
            .unwrap();

        assert_eq!(device.introspection.len(), 2);
    }

    #[test]
    fn duplicated_interfaces_are_rejected() {
        let res = DeviceBuilder::new()
            .interface_str(DEVICE_DATASTREAM)
            .unwrap()
            .interface_str(DEVICE_DATASTREAM);

        assert!(matches!(
            res,
            Err(BuilderError::Interface(
                InterfaceError::InterfaceAlreadyPresent { .. }
            ))
        ));
    }

    #[test]
    fn invalid_device_id_is_rejected() {
        for device_id in ["", "short", "spaces are not base64url!!", "2TBn-jNESuuHamE2Zo1an"] {
            let res = DeviceBuilder::new().build(MqttConfig::new(
                "realm",
                device_id,
                "secret",
                "https://api.astarte.example/pairing",
            ));

            assert!(
                matches!(res, Err(BuilderError::InvalidDeviceId(_))),
                "accepted the invalid device id '{device_id}'"
            );
        }
    }

    #[test]
    fn interface_directory() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(dir.path().join("device.json"), DEVICE_DATASTREAM).unwrap();
        std::fs::write(dir.path().join("server.json"), SERVER_DATASTREAM).unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "not an interface").unwrap();

        let builder = DeviceBuilder::new()
            .interface_directory(dir.path())
            .unwrap();

        assert_eq!(builder.introspection.len(), 2);
    }

    #[test]
    fn config_debug_redacts_the_secret() {
        let config = MqttConfig::new("realm", DEVICE_ID, "secret", "https://example.com");

        let debug = format!("{config:?}");

        assert!(!debug.contains("secret\""));
        assert!(debug.contains("REDACTED"));
    }
}
