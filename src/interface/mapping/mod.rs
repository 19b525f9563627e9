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

//! Mappings of an interface, with their path template and QoS metadata.

use std::fmt::{self, Display};

use regex::Regex;
use serde::Deserialize;

use crate::types::AstarteType;

use super::error::InterfaceError;

pub mod endpoint;

use endpoint::compile_endpoint;

/// Types supported by a mapping.
///
/// <https://docs.astarte-platform.org/astarte/latest/040-interface_schema.html#astarte-mapping-schema-type>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    /// Double precision floating point.
    Double,
    /// 32 bit signed integer.
    Integer,
    /// Boolean.
    Boolean,
    /// 64 bit signed integer.
    LongInteger,
    /// UTF-8 string.
    String,
    /// Opaque binary blob.
    BinaryBlob,
    /// UTC timestamp.
    DateTime,
    /// Array of doubles.
    DoubleArray,
    /// Array of 32 bit signed integers.
    IntegerArray,
    /// Array of booleans.
    BooleanArray,
    /// Array of 64 bit signed integers.
    LongIntegerArray,
    /// Array of strings.
    StringArray,
    /// Array of binary blobs.
    BinaryBlobArray,
    /// Array of UTC timestamps.
    DateTimeArray,
}

impl MappingType {
    /// Returns true for the array types.
    pub fn is_array(self) -> bool {
        matches!(
            self,
            MappingType::DoubleArray
                | MappingType::IntegerArray
                | MappingType::BooleanArray
                | MappingType::LongIntegerArray
                | MappingType::StringArray
                | MappingType::BinaryBlobArray
                | MappingType::DateTimeArray
        )
    }

    /// Scalar type of an array type.
    ///
    /// Errors when called on a type that is already scalar.
    pub fn try_scalar(self) -> Result<MappingType, InterfaceError> {
        match self {
            MappingType::DoubleArray => Ok(MappingType::Double),
            MappingType::IntegerArray => Ok(MappingType::Integer),
            MappingType::BooleanArray => Ok(MappingType::Boolean),
            MappingType::LongIntegerArray => Ok(MappingType::LongInteger),
            MappingType::StringArray => Ok(MappingType::String),
            MappingType::BinaryBlobArray => Ok(MappingType::BinaryBlob),
            MappingType::DateTimeArray => Ok(MappingType::DateTime),
            scalar => Err(InterfaceError::NotAnArray(scalar)),
        }
    }

    /// Stable numeric tag, used to persist the type alongside a cached
    /// property value.
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            MappingType::Double => 0,
            MappingType::Integer => 1,
            MappingType::Boolean => 2,
            MappingType::LongInteger => 3,
            MappingType::String => 4,
            MappingType::BinaryBlob => 5,
            MappingType::DateTime => 6,
            MappingType::DoubleArray => 7,
            MappingType::IntegerArray => 8,
            MappingType::BooleanArray => 9,
            MappingType::LongIntegerArray => 10,
            MappingType::StringArray => 11,
            MappingType::BinaryBlobArray => 12,
            MappingType::DateTimeArray => 13,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Option<MappingType> {
        let mapping_type = match tag {
            0 => MappingType::Double,
            1 => MappingType::Integer,
            2 => MappingType::Boolean,
            3 => MappingType::LongInteger,
            4 => MappingType::String,
            5 => MappingType::BinaryBlob,
            6 => MappingType::DateTime,
            7 => MappingType::DoubleArray,
            8 => MappingType::IntegerArray,
            9 => MappingType::BooleanArray,
            10 => MappingType::LongIntegerArray,
            11 => MappingType::StringArray,
            12 => MappingType::BinaryBlobArray,
            13 => MappingType::DateTimeArray,
            _ => return None,
        };

        Some(mapping_type)
    }
}

impl Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MappingType::Double => "double",
            MappingType::Integer => "integer",
            MappingType::Boolean => "boolean",
            MappingType::LongInteger => "longinteger",
            MappingType::String => "string",
            MappingType::BinaryBlob => "binaryblob",
            MappingType::DateTime => "datetime",
            MappingType::DoubleArray => "doublearray",
            MappingType::IntegerArray => "integerarray",
            MappingType::BooleanArray => "booleanarray",
            MappingType::LongIntegerArray => "longintegerarray",
            MappingType::StringArray => "stringarray",
            MappingType::BinaryBlobArray => "binaryblobarray",
            MappingType::DateTimeArray => "datetimearray",
        };

        write!(f, "{name}")
    }
}

/// Delivery guarantee of a datastream mapping, maps one to one to the MQTT
/// QoS of its publishes.
///
/// <https://docs.astarte-platform.org/astarte/latest/040-interface_schema.html#astarte-mapping-schema-reliability>
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    /// Fire and forget, QoS 0.
    #[default]
    Unreliable,
    /// Delivered at least once, QoS 1.
    Guaranteed,
    /// Delivered exactly once, QoS 2.
    Unique,
}

impl From<Reliability> for rumqttc::QoS {
    fn from(value: Reliability) -> Self {
        match value {
            Reliability::Unreliable => rumqttc::QoS::AtMostOnce,
            Reliability::Guaranteed => rumqttc::QoS::AtLeastOnce,
            Reliability::Unique => rumqttc::QoS::ExactlyOnce,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MappingDef {
    endpoint: String,
    #[serde(rename = "type")]
    mapping_type: MappingType,
    #[serde(default)]
    reliability: Reliability,
    #[serde(default)]
    explicit_timestamp: bool,
    #[serde(default)]
    allow_unset: bool,
}

/// A single path template of an interface, with its declared type and
/// delivery metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "MappingDef")]
pub struct Mapping {
    endpoint: String,
    regex: Regex,
    mapping_type: MappingType,
    reliability: Reliability,
    explicit_timestamp: bool,
    allow_unset: bool,
}

impl TryFrom<MappingDef> for Mapping {
    type Error = InterfaceError;

    fn try_from(def: MappingDef) -> Result<Self, Self::Error> {
        let regex = compile_endpoint(&def.endpoint)?;

        Ok(Self {
            endpoint: def.endpoint,
            regex,
            mapping_type: def.mapping_type,
            reliability: def.reliability,
            explicit_timestamp: def.explicit_timestamp,
            allow_unset: def.allow_unset,
        })
    }
}

impl Mapping {
    /// The endpoint template of the mapping.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The declared type.
    pub fn mapping_type(&self) -> MappingType {
        self.mapping_type
    }

    /// Delivery guarantee of the mapping.
    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    /// Whether publishes must carry an explicit timestamp.
    pub fn explicit_timestamp(&self) -> bool {
        self.explicit_timestamp
    }

    /// Whether the property can be unset.
    pub fn allow_unset(&self) -> bool {
        self.allow_unset
    }

    /// Checks the path against the compiled endpoint regex.
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Validates a value against the mapping type.
    ///
    /// Doubles and double arrays must be finite on top of the tag check.
    pub fn validate(&self, value: &AstarteType) -> Result<(), InterfaceError> {
        let incompatible = || InterfaceError::MappingIncompatible {
            expected: self.mapping_type,
            got: value.display_type(),
        };

        if value.mapping_type() != self.mapping_type {
            return Err(incompatible());
        }

        match value {
            AstarteType::Double(v) if !v.is_finite() => Err(incompatible()),
            AstarteType::DoubleArray(arr) if arr.iter().any(|v| !v.is_finite()) => {
                Err(incompatible())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(json: &str) -> Mapping {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn deserialize_with_defaults() {
        let mapping = mapping(r#"{"endpoint": "/button", "type": "boolean"}"#);

        assert_eq!(mapping.endpoint(), "/button");
        assert_eq!(mapping.mapping_type(), MappingType::Boolean);
        assert_eq!(mapping.reliability(), Reliability::Unreliable);
        assert!(!mapping.explicit_timestamp());
        assert!(!mapping.allow_unset());
    }

    #[test]
    fn deserialize_full() {
        let mapping = mapping(
            r#"{
                "endpoint": "/%{sensor_id}/value",
                "type": "double",
                "reliability": "unique",
                "explicit_timestamp": true,
                "allow_unset": true
            }"#,
        );

        assert_eq!(mapping.reliability(), Reliability::Unique);
        assert!(mapping.explicit_timestamp());
        assert!(mapping.allow_unset());
        assert!(mapping.is_match("/sensor1/value"));
        assert!(!mapping.is_match("/sensor1/other"));
    }

    #[test]
    fn validate_type_and_finiteness() {
        let double = mapping(r#"{"endpoint": "/value", "type": "double"}"#);

        assert!(double.validate(&AstarteType::Double(1.5)).is_ok());
        assert!(matches!(
            double.validate(&AstarteType::Double(f64::NAN)),
            Err(InterfaceError::MappingIncompatible { .. })
        ));
        assert!(matches!(
            double.validate(&AstarteType::Integer(3)),
            Err(InterfaceError::MappingIncompatible { .. })
        ));

        let arr = mapping(r#"{"endpoint": "/value", "type": "doublearray"}"#);
        assert!(arr.validate(&AstarteType::DoubleArray(vec![1.0, 2.0])).is_ok());
        assert!(arr
            .validate(&AstarteType::DoubleArray(vec![1.0, f64::INFINITY]))
            .is_err());
    }

    #[test]
    fn integer_mapping_rejects_double() {
        let integer = mapping(r#"{"endpoint": "/value", "type": "integer"}"#);

        assert!(matches!(
            integer.validate(&AstarteType::Double(1.5)),
            Err(InterfaceError::MappingIncompatible { .. })
        ));
    }

    #[test]
    fn type_tag_round_trip() {
        for tag in 0..=13 {
            let mapping_type = MappingType::from_u8(tag).unwrap();
            assert_eq!(mapping_type.as_u8(), tag);
        }

        assert_eq!(MappingType::from_u8(14), None);
    }

    #[test]
    fn scalar_of_array() {
        assert_eq!(
            MappingType::DoubleArray.try_scalar().unwrap(),
            MappingType::Double
        );
        assert!(matches!(
            MappingType::Double.try_scalar(),
            Err(InterfaceError::NotAnArray(MappingType::Double))
        ));
    }
}
