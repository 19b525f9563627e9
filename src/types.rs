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

//! Astarte types and conversions from and to the BSON wire representation.

use bson::{spec::BinarySubtype, Binary, Bson};
use chrono::{DateTime, Utc};

use crate::interface::mapping::MappingType;

/// Timestamp attached to a datastream value, in UTC.
pub type Timestamp = DateTime<Utc>;

/// Error when converting between Rust native values and [`AstarteType`].
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    /// The Rust value cannot be represented as an Astarte type.
    #[error("couldn't convert the value to an Astarte type")]
    Conversion,
    /// The BSON element doesn't match the type declared by the mapping.
    #[error("BSON element incompatible with the mapping type {expected}")]
    FromBson {
        /// Type declared by the mapping.
        expected: MappingType,
    },
}

/// A typed value exchanged with Astarte.
///
/// Tagged union over the types a mapping can declare. Arrays are homogeneous
/// and carry their length, binary blobs are distinct from strings, and
/// datetimes travel as 64 bit UTC milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub enum AstarteType {
    /// A double precision value, must be finite to be published.
    Double(f64),
    /// A 32 bit signed integer.
    Integer(i32),
    /// A boolean.
    Boolean(bool),
    /// A 64 bit signed integer.
    LongInteger(i64),
    /// An UTF-8 string.
    String(String),
    /// An opaque sequence of bytes.
    BinaryBlob(Vec<u8>),
    /// An UTC timestamp.
    DateTime(Timestamp),
    /// Array of doubles.
    DoubleArray(Vec<f64>),
    /// Array of 32 bit signed integers.
    IntegerArray(Vec<i32>),
    /// Array of booleans.
    BooleanArray(Vec<bool>),
    /// Array of 64 bit signed integers.
    LongIntegerArray(Vec<i64>),
    /// Array of UTF-8 strings.
    StringArray(Vec<String>),
    /// Array of binary blobs.
    BinaryBlobArray(Vec<Vec<u8>>),
    /// Array of UTC timestamps.
    DateTimeArray(Vec<Timestamp>),
}

impl AstarteType {
    /// Returns the mapping type this value is an instance of.
    pub fn mapping_type(&self) -> MappingType {
        match self {
            AstarteType::Double(_) => MappingType::Double,
            AstarteType::Integer(_) => MappingType::Integer,
            AstarteType::Boolean(_) => MappingType::Boolean,
            AstarteType::LongInteger(_) => MappingType::LongInteger,
            AstarteType::String(_) => MappingType::String,
            AstarteType::BinaryBlob(_) => MappingType::BinaryBlob,
            AstarteType::DateTime(_) => MappingType::DateTime,
            AstarteType::DoubleArray(_) => MappingType::DoubleArray,
            AstarteType::IntegerArray(_) => MappingType::IntegerArray,
            AstarteType::BooleanArray(_) => MappingType::BooleanArray,
            AstarteType::LongIntegerArray(_) => MappingType::LongIntegerArray,
            AstarteType::StringArray(_) => MappingType::StringArray,
            AstarteType::BinaryBlobArray(_) => MappingType::BinaryBlobArray,
            AstarteType::DateTimeArray(_) => MappingType::DateTimeArray,
        }
    }

    /// Name of the contained type, used in logs.
    pub fn display_type(&self) -> &'static str {
        match self {
            AstarteType::Double(_) => "double",
            AstarteType::Integer(_) => "integer",
            AstarteType::Boolean(_) => "boolean",
            AstarteType::LongInteger(_) => "long integer",
            AstarteType::String(_) => "string",
            AstarteType::BinaryBlob(_) => "binary blob",
            AstarteType::DateTime(_) => "datetime",
            AstarteType::DoubleArray(_) => "double array",
            AstarteType::IntegerArray(_) => "integer array",
            AstarteType::BooleanArray(_) => "boolean array",
            AstarteType::LongIntegerArray(_) => "long integer array",
            AstarteType::StringArray(_) => "string array",
            AstarteType::BinaryBlobArray(_) => "binary blob array",
            AstarteType::DateTimeArray(_) => "datetime array",
        }
    }

    /// Decodes a BSON element into the type declared by the mapping.
    ///
    /// The decode is strict: an element whose BSON type doesn't match the
    /// mapping type is rejected. The only widening accepted is a 32 bit
    /// integer into a `longinteger` mapping, since brokers may re-encode
    /// small values.
    pub(crate) fn try_from_bson(mapping_type: MappingType, bson: Bson) -> Result<Self, TypeError> {
        let err = || TypeError::FromBson {
            expected: mapping_type,
        };

        let value = match (mapping_type, bson) {
            (MappingType::Double, Bson::Double(v)) => AstarteType::Double(v),
            (MappingType::Integer, Bson::Int32(v)) => AstarteType::Integer(v),
            (MappingType::Boolean, Bson::Boolean(v)) => AstarteType::Boolean(v),
            (MappingType::LongInteger, Bson::Int64(v)) => AstarteType::LongInteger(v),
            (MappingType::LongInteger, Bson::Int32(v)) => AstarteType::LongInteger(v.into()),
            (MappingType::String, Bson::String(v)) => AstarteType::String(v),
            (MappingType::BinaryBlob, Bson::Binary(b)) => AstarteType::BinaryBlob(b.bytes),
            (MappingType::DateTime, Bson::DateTime(d)) => AstarteType::DateTime(d.to_chrono()),
            (array_type, Bson::Array(elements)) => {
                let scalar = array_type.try_scalar().map_err(|_| err())?;

                let scalars = elements
                    .into_iter()
                    .map(|el| AstarteType::try_from_bson(scalar, el))
                    .collect::<Result<Vec<AstarteType>, TypeError>>()?;

                AstarteType::collect_array(array_type, scalars).ok_or_else(err)?
            }
            _ => return Err(err()),
        };

        Ok(value)
    }

    fn collect_array(array_type: MappingType, scalars: Vec<AstarteType>) -> Option<Self> {
        macro_rules! collect {
            ($variant:tt) => {
                scalars
                    .into_iter()
                    .map(|v| match v {
                        AstarteType::$variant(val) => Some(val),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?
            };
        }

        let array = match array_type {
            MappingType::DoubleArray => AstarteType::DoubleArray(collect!(Double)),
            MappingType::IntegerArray => AstarteType::IntegerArray(collect!(Integer)),
            MappingType::BooleanArray => AstarteType::BooleanArray(collect!(Boolean)),
            MappingType::LongIntegerArray => AstarteType::LongIntegerArray(collect!(LongInteger)),
            MappingType::StringArray => AstarteType::StringArray(collect!(String)),
            MappingType::BinaryBlobArray => AstarteType::BinaryBlobArray(collect!(BinaryBlob)),
            MappingType::DateTimeArray => AstarteType::DateTimeArray(collect!(DateTime)),
            _ => return None,
        };

        Some(array)
    }
}

impl From<AstarteType> for Bson {
    fn from(value: AstarteType) -> Self {
        match value {
            AstarteType::Double(v) => Bson::Double(v),
            AstarteType::Integer(v) => Bson::Int32(v),
            AstarteType::Boolean(v) => Bson::Boolean(v),
            AstarteType::LongInteger(v) => Bson::Int64(v),
            AstarteType::String(v) => Bson::String(v),
            AstarteType::BinaryBlob(v) => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: v,
            }),
            AstarteType::DateTime(v) => Bson::DateTime(v.into()),
            AstarteType::DoubleArray(arr) => arr.into_iter().collect(),
            AstarteType::IntegerArray(arr) => arr.into_iter().collect(),
            AstarteType::BooleanArray(arr) => arr.into_iter().collect(),
            AstarteType::LongIntegerArray(arr) => arr.into_iter().collect(),
            AstarteType::StringArray(arr) => arr.into_iter().collect(),
            AstarteType::BinaryBlobArray(arr) => arr
                .into_iter()
                .map(|bytes| {
                    Bson::Binary(Binary {
                        subtype: BinarySubtype::Generic,
                        bytes,
                    })
                })
                .collect(),
            AstarteType::DateTimeArray(arr) => arr
                .into_iter()
                .map(|d| Bson::DateTime(d.into()))
                .collect(),
        }
    }
}

macro_rules! impl_type_conversion_traits {
    ( {$( ($typ:ty, $variant:tt) ,)*}) => {
        $(
            impl From<$typ> for AstarteType {
                fn from(d: $typ) -> Self {
                    AstarteType::$variant(d)
                }
            }

            impl From<&$typ> for AstarteType {
                fn from(d: &$typ) -> Self {
                    AstarteType::$variant(d.clone())
                }
            }
        )*
    };
}

impl_type_conversion_traits!({
    (f64, Double),
    (i32, Integer),
    (bool, Boolean),
    (i64, LongInteger),
    (String, String),
    (Vec<u8>, BinaryBlob),
    (Timestamp, DateTime),
    (Vec<f64>, DoubleArray),
    (Vec<i32>, IntegerArray),
    (Vec<bool>, BooleanArray),
    (Vec<i64>, LongIntegerArray),
    (Vec<String>, StringArray),
    (Vec<Vec<u8>>, BinaryBlobArray),
    (Vec<Timestamp>, DateTimeArray),
});

impl From<&str> for AstarteType {
    fn from(d: &str) -> Self {
        AstarteType::String(d.to_owned())
    }
}

macro_rules! impl_reverse_type_conversion_traits {
    ($(($typ:ty, $variant:tt),)*) => {
        $(
            impl TryFrom<AstarteType> for $typ {
                type Error = TypeError;

                fn try_from(var: AstarteType) -> Result<Self, Self::Error> {
                    if let AstarteType::$variant(val) = var {
                        Ok(val)
                    } else {
                        Err(TypeError::Conversion)
                    }
                }
            }
        )*
    };
}

impl_reverse_type_conversion_traits!(
    (f64, Double),
    (i32, Integer),
    (bool, Boolean),
    (String, String),
    (Vec<u8>, BinaryBlob),
    (Timestamp, DateTime),
    (Vec<f64>, DoubleArray),
    (Vec<i32>, IntegerArray),
    (Vec<bool>, BooleanArray),
    (Vec<i64>, LongIntegerArray),
    (Vec<String>, StringArray),
    (Vec<Vec<u8>>, BinaryBlobArray),
    (Vec<Timestamp>, DateTimeArray),
);

impl TryFrom<AstarteType> for i64 {
    type Error = TypeError;

    fn try_from(var: AstarteType) -> Result<Self, Self::Error> {
        match var {
            AstarteType::LongInteger(val) => Ok(val),
            AstarteType::Integer(val) => Ok(val.into()),
            _ => Err(TypeError::Conversion),
        }
    }
}
