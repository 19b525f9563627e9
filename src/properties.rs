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

//! Codec for the properties control payloads.
//!
//! Both the `control/producer/properties` publish and the
//! `control/consumer/properties` message carry a `;` joined list of
//! `interface/path` entries, zlib compressed and prefixed with the 4 byte
//! big endian length of the uncompressed string.

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use tracing::warn;

/// Error handling the properties control payloads.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PropertiesError {
    /// The payload is too short to contain the length prefix.
    #[error("the payload is too short: {0} bytes")]
    Prefix(usize),
    /// Couldn't inflate or deflate the properties list.
    #[error("couldn't process the compressed properties list")]
    Compression(#[from] std::io::Error),
}

/// Extracts the set of `interface/path` entries from a consumer properties
/// payload.
pub(crate) fn extract_set_properties(bdata: &[u8]) -> Result<Vec<String>, PropertiesError> {
    if bdata.len() < 4 {
        return Err(PropertiesError::Prefix(bdata.len()));
    }

    let (prefix, data) = bdata.split_at(4);
    // The prefix length is checked above.
    let expected = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);

    let mut decoder = ZlibDecoder::new(data);
    let mut list = String::new();
    decoder.read_to_string(&mut list)?;

    if list.len() != expected as usize {
        warn!(
            "properties list length {} doesn't match the declared {}",
            list.len(),
            expected
        );
    }

    Ok(list
        .split(';')
        .filter(|entry| !entry.is_empty())
        .map(ToString::to_string)
        .collect())
}

/// Builds the producer properties payload from a `;` joined list.
pub(crate) fn serialize_props(list: &str) -> Result<Vec<u8>, PropertiesError> {
    let len = list.len() as u32;

    let mut payload = Vec::with_capacity(4 + list.len());
    payload.extend_from_slice(&len.to_be_bytes());

    let mut encoder = ZlibEncoder::new(payload, Compression::default());
    encoder.write_all(list.as_bytes())?;

    encoder.finish().map_err(PropertiesError::from)
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    pub(crate) const PROPERTIES_LIST: &str =
        "com.test.Properties/button;com.test.Properties/uptimeSeconds";

    pub(crate) fn properties_payload() -> Vec<u8> {
        serialize_props(PROPERTIES_LIST).unwrap()
    }

    #[test]
    fn round_trip() {
        let payload = properties_payload();

        let entries = extract_set_properties(&payload).unwrap();

        assert_eq!(
            entries,
            [
                "com.test.Properties/button",
                "com.test.Properties/uptimeSeconds"
            ]
        );
    }

    #[test]
    fn prefix_is_big_endian_uncompressed_length() {
        let payload = properties_payload();

        let len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);

        assert_eq!(len as usize, PROPERTIES_LIST.len());
    }

    #[test]
    fn empty_list() {
        let payload = serialize_props("").unwrap();

        let entries = extract_set_properties(&payload).unwrap();

        assert!(entries.is_empty());
    }

    #[test]
    fn short_payload_is_rejected() {
        let err = extract_set_properties(&[0, 0]).unwrap_err();

        assert!(matches!(err, PropertiesError::Prefix(2)));
    }

    #[test]
    fn garbage_payload_is_rejected() {
        let err = extract_set_properties(&[0, 0, 0, 10, 1, 2, 3, 4]).unwrap_err();

        assert!(matches!(err, PropertiesError::Compression(_)));
    }
}
