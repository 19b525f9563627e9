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

//! Compiles a mapping endpoint template into an anchored regex.
//!
//! Endpoints are slash delimited and may contain parametric levels in the
//! form `%{name}`, which match any single non-empty level of a path.

use regex::Regex;

/// Error while parsing an endpoint template.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EndpointError {
    /// The endpoint must start with a slash.
    #[error("endpoint must start with a slash: '{0}'")]
    Prefix(String),
    /// The endpoint has an empty level.
    #[error("endpoint has an empty level: '{0}'")]
    EmptyLevel(String),
    /// A level contains a malformed parameter.
    #[error("endpoint level '{level}' has an invalid parameter")]
    Parameter {
        /// Offending level.
        level: String,
    },
    /// The compiled pattern was rejected by the regex engine.
    #[error("couldn't compile the endpoint '{endpoint}'")]
    Compile {
        /// Source endpoint.
        endpoint: String,
        /// Regex compile error.
        #[source]
        source: regex::Error,
    },
}

fn is_valid_parameter(param: &str) -> bool {
    let mut chars = param.chars();

    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Compiles the endpoint template into an anchored regex where every
/// `%{name}` level becomes `[^/]+`.
pub(crate) fn compile_endpoint(endpoint: &str) -> Result<Regex, EndpointError> {
    let rest = endpoint
        .strip_prefix('/')
        .ok_or_else(|| EndpointError::Prefix(endpoint.to_string()))?;

    if rest.is_empty() {
        return Err(EndpointError::EmptyLevel(endpoint.to_string()));
    }

    let mut pattern = String::from("^");

    for level in rest.split('/') {
        if level.is_empty() {
            return Err(EndpointError::EmptyLevel(endpoint.to_string()));
        }

        pattern.push('/');

        match level.strip_prefix("%{").and_then(|l| l.strip_suffix('}')) {
            Some(param) => {
                if !is_valid_parameter(param) {
                    return Err(EndpointError::Parameter {
                        level: level.to_string(),
                    });
                }

                pattern.push_str("[^/]+");
            }
            None => {
                if level.contains("%{") || level.contains('}') {
                    return Err(EndpointError::Parameter {
                        level: level.to_string(),
                    });
                }

                pattern.push_str(&regex::escape(level));
            }
        }
    }

    pattern.push('$');

    Regex::new(&pattern).map_err(|source| EndpointError::Compile {
        endpoint: endpoint.to_string(),
        source,
    })
}

/// Number of levels of the endpoint, ignoring the leading slash.
pub(crate) fn levels(endpoint: &str) -> usize {
    endpoint.chars().filter(|c| *c == '/').count()
}

/// The endpoint template without its last level, used as the common
/// prefix of an object aggregation.
pub(crate) fn object_prefix(endpoint: &str) -> Option<&str> {
    endpoint.rfind('/').filter(|idx| *idx > 0).map(|idx| &endpoint[..idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_literal_endpoint() {
        let regex = compile_endpoint("/boiler/temperature").unwrap();

        assert!(regex.is_match("/boiler/temperature"));
        assert!(!regex.is_match("/boiler/temperature/extra"));
        assert!(!regex.is_match("/prefix/boiler/temperature"));
        assert!(!regex.is_match("/boiler"));
    }

    #[test]
    fn compile_parametric_endpoint() {
        let regex = compile_endpoint("/%{sensor_id}/value").unwrap();

        assert!(regex.is_match("/boiler1/value"));
        assert!(regex.is_match("/any-th.ing/value"));
        assert!(!regex.is_match("//value"));
        assert!(!regex.is_match("/a/b/value"));
    }

    #[test]
    fn literal_levels_are_escaped() {
        let regex = compile_endpoint("/v1.0/value").unwrap();

        assert!(regex.is_match("/v1.0/value"));
        assert!(!regex.is_match("/v1x0/value"));
    }

    #[test]
    fn reject_invalid_endpoints() {
        assert!(matches!(
            compile_endpoint("no/slash"),
            Err(EndpointError::Prefix(_))
        ));
        assert!(matches!(
            compile_endpoint("/"),
            Err(EndpointError::EmptyLevel(_))
        ));
        assert!(matches!(
            compile_endpoint("/a//b"),
            Err(EndpointError::EmptyLevel(_))
        ));
        assert!(matches!(
            compile_endpoint("/%{1invalid}/value"),
            Err(EndpointError::Parameter { .. })
        ));
        assert!(matches!(
            compile_endpoint("/half%{param}/value"),
            Err(EndpointError::Parameter { .. })
        ));
    }

    #[test]
    fn prefix_and_levels() {
        assert_eq!(object_prefix("/%{id}/value"), Some("/%{id}"));
        assert_eq!(object_prefix("/value"), None);
        assert_eq!(levels("/a/b/c"), 3);
    }
}
