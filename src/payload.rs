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

//! Serialization and deserialization of the Astarte BSON payloads.
//!
//! A published message is a BSON document with the value under `v` and an
//! optional UTC timestamp under `t`. For object aggregations `v` is a
//! subdocument keyed by endpoint name. Decoding is strict: the document must
//! parse completely and every element must match the type declared by the
//! target mapping. Decoded values are owned, the transport buffer can be
//! released right after the call.

use std::collections::HashMap;

use bson::{Bson, Document};

use crate::{
    interface::{Interface, InterfaceError, Mapping, MappingType},
    types::{AstarteType, Timestamp, TypeError},
};

/// Errors that can occur handling the payload.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// Couldn't serialize the payload to BSON.
    #[error("couldn't serialize the payload to BSON")]
    Serialize(#[from] bson::ser::Error),
    /// Couldn't parse the payload document.
    #[error("couldn't deserialize the payload from BSON")]
    Deserialize(#[from] bson::de::Error),
    /// The document has no `v` field.
    #[error("the payload is missing the value field 'v'")]
    MissingValue,
    /// The `t` field is not a BSON UTC datetime.
    #[error("the payload timestamp 't' is not a BSON datetime")]
    InvalidTimestamp,
    /// An object payload whose `v` field is not a subdocument.
    #[error("the object payload value is not a document")]
    NotAnObject,
    /// An element doesn't match the type declared by the mapping.
    #[error("couldn't decode the value for the mapping")]
    Type(#[from] TypeError),
    /// An object entry doesn't belong to any mapping of the interface.
    #[error("invalid object entry")]
    Mapping(#[from] InterfaceError),
}

fn envelope(value: Bson, timestamp: Option<Timestamp>) -> Document {
    let mut doc = Document::new();

    doc.insert("v", value);

    if let Some(timestamp) = timestamp {
        doc.insert("t", Bson::DateTime(timestamp.into()));
    }

    doc
}

fn split_envelope(buf: &[u8]) -> Result<(Bson, Option<Timestamp>), PayloadError> {
    let mut doc = Document::from_reader(buf)?;

    let value = doc.remove("v").ok_or(PayloadError::MissingValue)?;

    let timestamp = match doc.remove("t") {
        Some(Bson::DateTime(t)) => Some(t.to_chrono()),
        Some(_) => return Err(PayloadError::InvalidTimestamp),
        None => None,
    };

    Ok((value, timestamp))
}

/// Serializes an individual value, with an optional explicit timestamp.
pub(crate) fn serialize_individual(
    value: &AstarteType,
    timestamp: Option<Timestamp>,
) -> Result<Vec<u8>, PayloadError> {
    let doc = envelope(Bson::from(value.clone()), timestamp);

    bson::to_vec(&doc).map_err(PayloadError::from)
}

/// Serializes an object aggregate, `v` being the endpoint keyed subdocument.
pub(crate) fn serialize_object(
    entries: &HashMap<String, AstarteType>,
    timestamp: Option<Timestamp>,
) -> Result<Vec<u8>, PayloadError> {
    let mut value = Document::new();

    for (endpoint, entry) in entries {
        value.insert(endpoint, Bson::from(entry.clone()));
    }

    let doc = envelope(Bson::Document(value), timestamp);

    bson::to_vec(&doc).map_err(PayloadError::from)
}

/// Deserializes an individual value against the mapping that matched the
/// publish path.
pub(crate) fn deserialize_individual(
    mapping: &Mapping,
    buf: &[u8],
) -> Result<(AstarteType, Option<Timestamp>), PayloadError> {
    let (value, timestamp) = split_envelope(buf)?;

    let data = AstarteType::try_from_bson(mapping.mapping_type(), value)?;

    Ok((data, timestamp))
}

/// Deserializes an object aggregate published on `path`, validating every
/// entry against the mapping of its endpoint.
pub(crate) fn deserialize_object(
    interface: &Interface,
    path: &str,
    buf: &[u8],
) -> Result<(HashMap<String, AstarteType>, Option<Timestamp>), PayloadError> {
    let (value, timestamp) = split_envelope(buf)?;

    let Bson::Document(doc) = value else {
        return Err(PayloadError::NotAnObject);
    };

    let entries = doc
        .into_iter()
        .map(|(endpoint, element)| {
            let mapping = interface.object_entry_mapping(path, &endpoint)?;
            let data = AstarteType::try_from_bson(mapping.mapping_type(), element)?;

            Ok((endpoint, data))
        })
        .collect::<Result<HashMap<String, AstarteType>, PayloadError>>()?;

    Ok((entries, timestamp))
}

/// Deserializes a value stored in the property cache, whose type tag was
/// persisted alongside the envelope.
pub(crate) fn deserialize_stored(
    mapping_type: MappingType,
    buf: &[u8],
) -> Result<AstarteType, PayloadError> {
    let (value, _timestamp) = split_envelope(buf)?;

    AstarteType::try_from_bson(mapping_type, value).map_err(PayloadError::from)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use crate::interface::tests::{DEVICE_DATASTREAM, DEVICE_OBJECT};

    use super::*;

    fn double_mapping() -> Mapping {
        serde_json::from_str(r#"{"endpoint": "/value", "type": "double"}"#).unwrap()
    }

    #[test]
    fn individual_round_trip_all_types() {
        for value in crate::types::tests::all_types() {
            let mapping_json = format!(
                r#"{{"endpoint": "/value", "type": "{}"}}"#,
                value.mapping_type()
            );
            let mapping: Mapping = serde_json::from_str(&mapping_json).unwrap();

            let buf = serialize_individual(&value, None).unwrap();
            let (decoded, timestamp) = deserialize_individual(&mapping, &buf).unwrap();

            assert_eq!(decoded, value);
            assert_eq!(timestamp, None);
        }
    }

    #[test]
    fn timestamp_is_carried_in_t() {
        let timestamp = Utc.timestamp_opt(1537449422, 0).unwrap();

        let buf =
            serialize_individual(&AstarteType::Integer(42), Some(timestamp)).unwrap();

        let doc = Document::from_reader(buf.as_slice()).unwrap();
        assert!(doc.contains_key("t"));

        let (decoded, decoded_ts) = deserialize_individual(
            &serde_json::from_str(r#"{"endpoint": "/value", "type": "integer"}"#).unwrap(),
            &buf,
        )
        .unwrap();

        assert_eq!(decoded, AstarteType::Integer(42));
        assert_eq!(decoded_ts, Some(timestamp));
    }

    #[test]
    fn no_timestamp_no_t_field() {
        let buf = serialize_individual(&AstarteType::Integer(42), None).unwrap();

        let doc = Document::from_reader(buf.as_slice()).unwrap();
        assert!(!doc.contains_key("t"));
    }

    #[test]
    fn missing_value_is_rejected() {
        let doc = bson::doc! { "other": 3 };
        let buf = bson::to_vec(&doc).unwrap();

        let err = deserialize_individual(&double_mapping(), &buf).unwrap_err();

        assert!(matches!(err, PayloadError::MissingValue));
    }

    #[test]
    fn truncated_document_is_rejected() {
        let buf = serialize_individual(&AstarteType::Integer(42), None).unwrap();

        let err = deserialize_individual(&double_mapping(), &buf[..buf.len() - 2]).unwrap_err();

        assert!(matches!(err, PayloadError::Deserialize(_)));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let buf = serialize_individual(&AstarteType::Integer(42), None).unwrap();

        let err = deserialize_individual(&double_mapping(), &buf).unwrap_err();

        assert!(matches!(err, PayloadError::Type(_)));
    }

    #[test]
    fn object_round_trip() {
        let interface = Interface::from_str(DEVICE_OBJECT).unwrap();

        let entries = HashMap::from([
            ("latitude".to_string(), AstarteType::Double(45.64)),
            ("longitude".to_string(), AstarteType::Double(11.89)),
        ]);

        let buf = serialize_object(&entries, None).unwrap();
        let (decoded, timestamp) = deserialize_object(&interface, "/gps1", &buf).unwrap();

        assert_eq!(decoded, entries);
        assert_eq!(timestamp, None);
    }

    #[test]
    fn object_with_unknown_endpoint_is_rejected() {
        let interface = Interface::from_str(DEVICE_OBJECT).unwrap();

        let doc = bson::doc! { "v": { "altitude": 320.0 } };
        let buf = bson::to_vec(&doc).unwrap();

        let err = deserialize_object(&interface, "/gps1", &buf).unwrap_err();

        assert!(matches!(err, PayloadError::Mapping(_)));
    }

    #[test]
    fn object_value_must_be_a_document() {
        let interface = Interface::from_str(DEVICE_OBJECT).unwrap();

        let doc = bson::doc! { "v": 3.2 };
        let buf = bson::to_vec(&doc).unwrap();

        let err = deserialize_object(&interface, "/gps1", &buf).unwrap_err();

        assert!(matches!(err, PayloadError::NotAnObject));
    }

    #[test]
    fn stored_value_round_trip() {
        let value = AstarteType::LongInteger(55);
        let buf = serialize_individual(&value, None).unwrap();

        let decoded = deserialize_stored(MappingType::LongInteger, &buf).unwrap();

        assert_eq!(decoded, value);
    }

    #[test]
    fn individual_decode_from_raw_doc() {
        // Same shape the broker publishes for a server datastream.
        let interface = Interface::from_str(DEVICE_DATASTREAM).unwrap();
        let mapping = interface.mapping("/uptimeSeconds").unwrap();

        let doc = bson::doc! { "v": 3600 };
        let buf = bson::to_vec(&doc).unwrap();

        let (decoded, _) = deserialize_individual(mapping, &buf).unwrap();

        assert_eq!(decoded, AstarteType::Integer(3600));
    }
}
