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

//! Durable storage for the device properties.
//!
//! The store is the state that survives a restart: the cached properties and
//! the fingerprint of the last introspection declared to Astarte. It drives
//! session resynchronization after a reconnect.

use std::{error::Error as StdError, fmt::Debug};

use async_trait::async_trait;

use crate::{interface::Ownership, types::AstarteType};

pub mod error;
pub mod memory;
pub mod sqlite;
pub(crate) mod wrapper;

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

/// Trait providing compatibility with Astarte devices to databases.
///
/// Any database implementing this trait can be used as permanent storage for
/// the properties of an Astarte device.
///
/// Every mutation must be atomic: a concurrent reader, or a reader after a
/// crash, observes either the previous value or the complete new one, never
/// a torn write.
#[async_trait]
pub trait PropertyStore: Clone + Debug + Send + Sync + 'static
where
    // NOTE: the bounds are required to be compatible with the tokio tasks, with an additional Sync
    //       bound to further restrict the error type.
    Self::Err: StdError + Send + Sync + 'static,
{
    /// Reason for a failed operation.
    type Err;

    /// Stores a property, overwriting a previous value at the same
    /// (interface, path).
    async fn store_prop(&self, prop: StoredProp<&str, &AstarteType>) -> Result<(), Self::Err>;

    /// Loads a property with its major version, or [`None`] when missing.
    async fn load_prop(&self, interface: &str, path: &str)
        -> Result<Option<StoredProp>, Self::Err>;

    /// Deletes a property, doing nothing when it is missing.
    async fn delete_prop(&self, interface: &str, path: &str) -> Result<(), Self::Err>;

    /// Removes all saved properties from the store.
    async fn clear(&self) -> Result<(), Self::Err>;

    /// Retrieves all the stored properties. The order is implementation
    /// defined, but stable within the returned snapshot.
    async fn load_all_props(&self) -> Result<Vec<StoredProp>, Self::Err>;

    /// Retrieves the device owned stored properties.
    async fn device_props(&self) -> Result<Vec<StoredProp>, Self::Err>;

    /// Retrieves the server owned stored properties.
    async fn server_props(&self) -> Result<Vec<StoredProp>, Self::Err>;

    /// Persists the introspection fingerprint.
    async fn store_introspection(&self, fingerprint: &[u8]) -> Result<(), Self::Err>;

    /// Loads the stored introspection fingerprint, if any.
    async fn load_introspection(&self) -> Result<Option<Vec<u8>>, Self::Err>;
}

/// Data structure used to return stored properties by a database
/// implementing the [`PropertyStore`] trait.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProp<S = String, V = AstarteType> {
    /// Interface name of the property.
    pub interface: S,
    /// Path of the property's mapping.
    pub path: S,
    /// Value of the property.
    pub value: V,
    /// Major version of the interface.
    ///
    /// Stored to check that the cached property is still compatible with the
    /// interface declared in the current introspection.
    pub interface_major: i32,
    /// Ownership of the property.
    pub ownership: Ownership,
}

impl StoredProp {
    /// Converts the stored property into a reference to its values.
    pub fn as_ref(&self) -> StoredProp<&str, &AstarteType> {
        self.into()
    }
}

impl<'a> From<&'a StoredProp> for StoredProp<&'a str, &'a AstarteType> {
    fn from(value: &'a StoredProp) -> Self {
        Self {
            interface: &value.interface,
            path: &value.path,
            value: &value.value,
            interface_major: value.interface_major,
            ownership: value.ownership,
        }
    }
}
