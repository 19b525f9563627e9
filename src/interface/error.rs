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

//! Errors generated by the interface module.

use std::io;

use super::mapping::{endpoint::EndpointError, MappingType};

/// Error for parsing and validating an interface, or validating data
/// against its mappings.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum InterfaceError {
    /// Couldn't parse the interface JSON.
    #[error("cannot parse interface JSON")]
    Parse(#[from] serde_json::Error),
    /// Cannot read the interface file.
    #[error("cannot read interface file")]
    Io(#[from] io::Error),
    /// The interface name is empty.
    #[error("interface with an empty name")]
    EmptyName,
    /// Both major and minor are 0.
    #[error("wrong major and minor")]
    MajorMinor,
    /// The interface has no mappings.
    #[error("interface with no mappings")]
    EmptyMappings,
    /// Error while parsing an endpoint.
    #[error("invalid endpoint")]
    InvalidEndpoint(#[from] EndpointError),
    /// The interface endpoints must all be unique.
    #[error("duplicate endpoint mapping '{endpoint}' and '{duplicate}'")]
    DuplicateMapping {
        /// First occurrence of the endpoint.
        endpoint: String,
        /// Duplicated occurrence.
        duplicate: String,
    },
    /// Properties interfaces only support individual aggregation.
    #[error("properties interface with object aggregation")]
    PropertiesWithObject,
    /// Only properties mappings can be unset.
    #[error("datastream mapping '{endpoint}' with allow_unset")]
    DatastreamUnset {
        /// Offending endpoint.
        endpoint: String,
    },
    /// The object interface mappings must share retention and timestamp flags.
    #[error("object with inconsistent mappings")]
    InconsistentMapping,
    /// The object interface must have the same levels for every mapping,
    /// except the last one.
    #[error("object with inconsistent endpoints")]
    InconsistentEndpoints,
    /// The object interface endpoints should have at least 2 levels.
    #[error("object endpoint should have at least 2 levels: '{0}'")]
    ObjectEndpointTooShort(String),
    /// The interface is not present in the device introspection.
    #[error("couldn't find interface '{name}'")]
    InterfaceNotFound {
        /// Name of the missing interface.
        name: String,
    },
    /// The interface is already present in the device introspection.
    #[error("interface '{name}' already present")]
    InterfaceAlreadyPresent {
        /// Name of the duplicated interface.
        name: String,
    },
    /// The interface has no mapping matching the given path.
    #[error("couldn't find the mapping '{path}' in the interface")]
    MappingNotFound {
        /// Path without a matching mapping.
        path: String,
    },
    /// The path doesn't match the interface object prefix.
    #[error("path '{path}' doesn't match the object mappings of the interface")]
    MappingPathMismatch {
        /// Offending path.
        path: String,
    },
    /// The value is incompatible with the type declared by the mapping.
    #[error("value of type {got} incompatible with the mapping type {expected}")]
    MappingIncompatible {
        /// Type declared by the mapping.
        expected: MappingType,
        /// Type of the value.
        got: &'static str,
    },
    /// The mapping requires an explicit timestamp.
    #[error("missing timestamp for mapping '{endpoint}' with explicit_timestamp")]
    MissingTimestamp {
        /// Endpoint of the mapping.
        endpoint: String,
    },
    /// The mapping doesn't support being unset.
    #[error("mapping '{endpoint}' cannot be unset")]
    UnsetNotAllowed {
        /// Endpoint of the mapping.
        endpoint: String,
    },
    /// Conversion from an array type to its scalar was called on a scalar.
    #[error("type {0} is not an array type")]
    NotAnArray(MappingType),
    /// The operation is not supported by the interface type, aggregation or
    /// ownership (e.g. streaming on a server-owned interface).
    #[error("the interface doesn't support the operation: {reason}")]
    Unsupported {
        /// Short description of the mismatch.
        reason: &'static str,
    },
}
