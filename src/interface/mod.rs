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

//! Astarte interface definitions.
//!
//! An interface is a versioned schema describing one logical stream of data
//! between the device and Astarte. It is parsed from its JSON definition and
//! validated at construction, so every instance in the introspection is well
//! formed.
//!
//! <https://docs.astarte-platform.org/astarte/latest/040-interface_schema.html>

use std::{fmt::Display, path::Path, str::FromStr};

use serde::Deserialize;

pub mod error;
pub mod mapping;

pub use self::error::InterfaceError;
pub use self::mapping::{Mapping, MappingType, Reliability};

use self::mapping::endpoint;

/// Ownership of an interface: the side allowed to publish on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    /// The device publishes, the server consumes.
    Device,
    /// The server publishes, the device consumes.
    Server,
}

/// Kind of data carried by the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    /// Non retained flow of values.
    Datastream,
    /// Retained key/value pairs with last-write-wins semantics.
    Properties,
}

/// Aggregation of the interface mappings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Each mapping is published independently.
    #[default]
    Individual,
    /// All the mappings under a common path are published as one document.
    Object,
}

#[derive(Debug, Clone, Deserialize)]
struct InterfaceDef {
    interface_name: String,
    version_major: i32,
    version_minor: i32,
    #[serde(rename = "type")]
    interface_type: InterfaceType,
    ownership: Ownership,
    #[serde(default)]
    aggregation: Aggregation,
    mappings: Vec<Mapping>,
}

/// A validated Astarte interface.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "InterfaceDef")]
pub struct Interface {
    name: String,
    version_major: i32,
    version_minor: i32,
    interface_type: InterfaceType,
    ownership: Ownership,
    aggregation: Aggregation,
    mappings: Vec<Mapping>,
}

impl TryFrom<InterfaceDef> for Interface {
    type Error = InterfaceError;

    fn try_from(def: InterfaceDef) -> Result<Self, Self::Error> {
        let interface = Interface {
            name: def.interface_name,
            version_major: def.version_major,
            version_minor: def.version_minor,
            interface_type: def.interface_type,
            ownership: def.ownership,
            aggregation: def.aggregation,
            mappings: def.mappings,
        };

        interface.validate()?;

        Ok(interface)
    }
}

impl FromStr for Interface {
    type Err = InterfaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(InterfaceError::from)
    }
}

impl Interface {
    /// Parses the interface from a `.json` definition file.
    pub fn from_file(path: &Path) -> Result<Self, InterfaceError> {
        let json = std::fs::read_to_string(path)?;

        Interface::from_str(&json)
    }

    fn validate(&self) -> Result<(), InterfaceError> {
        if self.name.is_empty() {
            return Err(InterfaceError::EmptyName);
        }

        if self.version_major == 0 && self.version_minor == 0 {
            return Err(InterfaceError::MajorMinor);
        }

        if self.mappings.is_empty() {
            return Err(InterfaceError::EmptyMappings);
        }

        for (i, mapping) in self.mappings.iter().enumerate() {
            if let Some(duplicate) = self.mappings[..i]
                .iter()
                .find(|prev| prev.endpoint() == mapping.endpoint())
            {
                return Err(InterfaceError::DuplicateMapping {
                    endpoint: duplicate.endpoint().to_string(),
                    duplicate: mapping.endpoint().to_string(),
                });
            }

            if self.interface_type == InterfaceType::Datastream && mapping.allow_unset() {
                return Err(InterfaceError::DatastreamUnset {
                    endpoint: mapping.endpoint().to_string(),
                });
            }
        }

        if self.aggregation == Aggregation::Object {
            self.validate_object()?;
        }

        Ok(())
    }

    fn validate_object(&self) -> Result<(), InterfaceError> {
        if self.interface_type == InterfaceType::Properties {
            return Err(InterfaceError::PropertiesWithObject);
        }

        // Every endpoint shares the levels before the last one.
        let mut prefixes = self.mappings.iter().map(|mapping| {
            endpoint::object_prefix(mapping.endpoint()).ok_or_else(|| {
                InterfaceError::ObjectEndpointTooShort(mapping.endpoint().to_string())
            })
        });

        let first = prefixes
            .next()
            .ok_or(InterfaceError::EmptyMappings)??
            .to_string();

        for prefix in prefixes {
            if prefix? != first {
                return Err(InterfaceError::InconsistentEndpoints);
            }
        }

        let consistent = self.mappings.windows(2).all(|pair| {
            pair[0].reliability() == pair[1].reliability()
                && pair[0].explicit_timestamp() == pair[1].explicit_timestamp()
        });

        if !consistent {
            return Err(InterfaceError::InconsistentMapping);
        }

        Ok(())
    }

    /// Name of the interface.
    pub fn interface_name(&self) -> &str {
        &self.name
    }

    /// Major version of the interface.
    pub fn version_major(&self) -> i32 {
        self.version_major
    }

    /// Minor version of the interface.
    pub fn version_minor(&self) -> i32 {
        self.version_minor
    }

    /// Ownership of the interface.
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Kind of the interface.
    pub fn interface_type(&self) -> InterfaceType {
        self.interface_type
    }

    /// Aggregation of the interface mappings.
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Returns true for properties interfaces.
    pub fn is_properties(&self) -> bool {
        self.interface_type == InterfaceType::Properties
    }

    /// Iterates over the interface mappings, in definition order.
    pub fn iter_mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.iter()
    }

    /// Finds the mapping whose compiled endpoint matches the path.
    pub fn mapping(&self, path: &str) -> Option<&Mapping> {
        self.mappings.iter().find(|mapping| mapping.is_match(path))
    }

    /// Finds the mapping for the path, or errors with the missing path.
    pub(crate) fn require_mapping(&self, path: &str) -> Result<&Mapping, InterfaceError> {
        self.mapping(path).ok_or_else(|| InterfaceError::MappingNotFound {
            path: path.to_string(),
        })
    }

    /// Checks that a publish path is the common prefix of this object
    /// interface, i.e. it is one level short of the interface endpoints.
    pub(crate) fn check_object_path(&self, path: &str) -> Result<(), InterfaceError> {
        debug_assert_eq!(self.aggregation, Aggregation::Object);

        let matches = self.mappings.first().is_some_and(|mapping| {
            endpoint::levels(mapping.endpoint()) == endpoint::levels(path) + 1
                && endpoint::object_prefix(mapping.endpoint())
                    .and_then(|prefix| endpoint::compile_endpoint(prefix).ok())
                    .is_some_and(|regex| regex.is_match(path))
        });

        if !matches {
            return Err(InterfaceError::MappingPathMismatch {
                path: path.to_string(),
            });
        }

        Ok(())
    }

    /// Finds the mapping of one entry of an object aggregate, by the publish
    /// path and the endpoint name relative to it.
    pub(crate) fn object_entry_mapping(
        &self,
        path: &str,
        endpoint_name: &str,
    ) -> Result<&Mapping, InterfaceError> {
        let full = format!("{path}/{endpoint_name}");

        self.require_mapping(&full)
    }
}

impl Display for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.name, self.version_major, self.version_minor
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    pub(crate) const DEVICE_DATASTREAM: &str = r#"{
        "interface_name": "org.astarte-platform.test.DeviceDatastream",
        "version_major": 0,
        "version_minor": 1,
        "type": "datastream",
        "ownership": "device",
        "mappings": [
            {
                "endpoint": "/uptimeSeconds",
                "type": "integer",
                "reliability": "guaranteed",
                "explicit_timestamp": true
            },
            {
                "endpoint": "/%{sensor_id}/value",
                "type": "double"
            }
        ]
    }"#;

    pub(crate) const SERVER_DATASTREAM: &str = r#"{
        "interface_name": "org.astarte-platform.test.ServerDatastream",
        "version_major": 0,
        "version_minor": 1,
        "type": "datastream",
        "ownership": "server",
        "mappings": [
            {
                "endpoint": "/led",
                "type": "boolean"
            }
        ]
    }"#;

    pub(crate) const DEVICE_OBJECT: &str = r#"{
        "interface_name": "org.astarte-platform.test.DeviceAggregate",
        "version_major": 0,
        "version_minor": 1,
        "type": "datastream",
        "ownership": "device",
        "aggregation": "object",
        "mappings": [
            {
                "endpoint": "/%{sensor_id}/latitude",
                "type": "double",
                "reliability": "unique"
            },
            {
                "endpoint": "/%{sensor_id}/longitude",
                "type": "double",
                "reliability": "unique"
            }
        ]
    }"#;

    pub(crate) const DEVICE_PROPERTIES: &str = r#"{
        "interface_name": "org.astarte-platform.test.DeviceProperties",
        "version_major": 0,
        "version_minor": 1,
        "type": "properties",
        "ownership": "device",
        "mappings": [
            {
                "endpoint": "/%{led_id}/enable",
                "type": "boolean",
                "allow_unset": true
            },
            {
                "endpoint": "/name",
                "type": "string"
            }
        ]
    }"#;

    pub(crate) const SERVER_PROPERTIES: &str = r#"{
        "interface_name": "org.astarte-platform.test.ServerProperties",
        "version_major": 0,
        "version_minor": 1,
        "type": "properties",
        "ownership": "server",
        "mappings": [
            {
                "endpoint": "/%{led_id}/enable",
                "type": "boolean",
                "allow_unset": true
            }
        ]
    }"#;

    #[test]
    fn parse_device_datastream() {
        let interface = Interface::from_str(DEVICE_DATASTREAM).unwrap();

        assert_eq!(
            interface.interface_name(),
            "org.astarte-platform.test.DeviceDatastream"
        );
        assert_eq!(interface.version_major(), 0);
        assert_eq!(interface.version_minor(), 1);
        assert_eq!(interface.ownership(), Ownership::Device);
        assert_eq!(interface.interface_type(), InterfaceType::Datastream);
        assert_eq!(interface.aggregation(), Aggregation::Individual);

        let mapping = interface.mapping("/uptimeSeconds").unwrap();
        assert_eq!(mapping.mapping_type(), MappingType::Integer);
        assert_eq!(mapping.reliability(), Reliability::Guaranteed);

        let parametric = interface.mapping("/sensor1/value").unwrap();
        assert_eq!(parametric.endpoint(), "/%{sensor_id}/value");

        assert!(interface.mapping("/sensor1/unknown").is_none());
    }

    #[test]
    fn object_path_check() {
        let interface = Interface::from_str(DEVICE_OBJECT).unwrap();

        assert!(interface.check_object_path("/gps1").is_ok());
        assert!(matches!(
            interface.check_object_path("/gps1/latitude"),
            Err(InterfaceError::MappingPathMismatch { .. })
        ));

        let mapping = interface.object_entry_mapping("/gps1", "latitude").unwrap();
        assert_eq!(mapping.mapping_type(), MappingType::Double);

        assert!(matches!(
            interface.object_entry_mapping("/gps1", "altitude"),
            Err(InterfaceError::MappingNotFound { .. })
        ));
    }

    #[test]
    fn reject_zero_version() {
        let json = DEVICE_DATASTREAM.replace(r#""version_minor": 1"#, r#""version_minor": 0"#);

        let err = Interface::from_str(&json).unwrap_err();

        // The failure comes from serde's try_from, so it surfaces as a
        // parse error wrapping the validation message.
        assert!(err.to_string().contains("cannot parse interface JSON") || matches!(err, InterfaceError::Parse(_)));
    }

    #[test]
    fn reject_duplicated_endpoints() {
        let json = r#"{
            "interface_name": "com.test.Duplicate",
            "version_major": 0,
            "version_minor": 1,
            "type": "datastream",
            "ownership": "device",
            "mappings": [
                {"endpoint": "/value", "type": "double"},
                {"endpoint": "/value", "type": "integer"}
            ]
        }"#;

        assert!(Interface::from_str(json).is_err());
    }

    #[test]
    fn reject_inconsistent_object() {
        let json = r#"{
            "interface_name": "com.test.Object",
            "version_major": 0,
            "version_minor": 1,
            "type": "datastream",
            "ownership": "device",
            "aggregation": "object",
            "mappings": [
                {"endpoint": "/a/one", "type": "double"},
                {"endpoint": "/b/two", "type": "double"}
            ]
        }"#;

        assert!(Interface::from_str(json).is_err());
    }

    #[test]
    fn reject_datastream_allow_unset() {
        let json = r#"{
            "interface_name": "com.test.Wrong",
            "version_major": 0,
            "version_minor": 1,
            "type": "datastream",
            "ownership": "device",
            "mappings": [
                {"endpoint": "/value", "type": "double", "allow_unset": true}
            ]
        }"#;

        assert!(Interface::from_str(json).is_err());
    }

    #[test]
    fn display_is_introspection_triple() {
        let interface = Interface::from_str(SERVER_DATASTREAM).unwrap();

        assert_eq!(
            interface.to_string(),
            "org.astarte-platform.test.ServerDatastream:0:1"
        );
    }
}
