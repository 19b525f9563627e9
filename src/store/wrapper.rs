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

//! Wrapper over a generic [`PropertyStore`] erasing its error type and
//! adding the device level helpers over the raw key/value contract.

use tracing::{error, trace};

use crate::{introspection::Introspection, types::AstarteType};

use super::{error::StoreError, PropertyStore, StoredProp};

/// Wrapper for a generic [`PropertyStore`] to convert the error in
/// [`StoreError`].
#[derive(Debug, Clone)]
pub(crate) struct StoreWrapper<S> {
    pub(crate) store: S,
}

impl<S> StoreWrapper<S>
where
    S: PropertyStore,
{
    pub(crate) fn new(store: S) -> Self {
        Self { store }
    }

    pub(crate) async fn store_prop(
        &self,
        prop: StoredProp<&str, &AstarteType>,
    ) -> Result<(), StoreError> {
        self.store.store_prop(prop).await.map_err(StoreError::store)
    }

    pub(crate) async fn load_prop(
        &self,
        interface: &str,
        path: &str,
    ) -> Result<Option<StoredProp>, StoreError> {
        self.store
            .load_prop(interface, path)
            .await
            .map_err(StoreError::load)
    }

    /// Loads a property, checking the stored major version against the one of
    /// the interface in the current introspection.
    ///
    /// A property stored for a different major is stale: it is deleted and
    /// reported as missing.
    pub(crate) async fn load_prop_checked(
        &self,
        interface: &str,
        path: &str,
        interface_major: i32,
    ) -> Result<Option<AstarteType>, StoreError> {
        let Some(prop) = self.load_prop(interface, path).await? else {
            return Ok(None);
        };

        if prop.interface_major != interface_major {
            error!(
                "version mismatch for property {}{} (stored {}, interface {}), deleting it",
                interface, path, prop.interface_major, interface_major
            );

            self.delete_prop(interface, path).await?;

            return Ok(None);
        }

        Ok(Some(prop.value))
    }

    pub(crate) async fn delete_prop(&self, interface: &str, path: &str) -> Result<(), StoreError> {
        self.store
            .delete_prop(interface, path)
            .await
            .map_err(StoreError::delete)
    }

    pub(crate) async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear().await.map_err(StoreError::clear)
    }

    pub(crate) async fn load_all_props(&self) -> Result<Vec<StoredProp>, StoreError> {
        self.store.load_all_props().await.map_err(StoreError::load_all)
    }

    pub(crate) async fn device_props(&self) -> Result<Vec<StoredProp>, StoreError> {
        self.store.device_props().await.map_err(StoreError::load_all)
    }

    pub(crate) async fn server_props(&self) -> Result<Vec<StoredProp>, StoreError> {
        self.store.server_props().await.map_err(StoreError::load_all)
    }

    /// Produces the `;` joined list of `interface/path` entries for all the
    /// cached properties, in iteration order.
    pub(crate) async fn properties_string(&self) -> Result<String, StoreError> {
        let props = self.load_all_props().await?;

        Ok(join_props_paths(&props))
    }

    /// Checks the canonical introspection string against the stored
    /// fingerprint. Returns false when no fingerprint is stored yet, or when
    /// the introspection changed.
    pub(crate) async fn check_introspection(&self, canonical: &str) -> Result<bool, StoreError> {
        let stored = self
            .store
            .load_introspection()
            .await
            .map_err(StoreError::load_introspection)?;

        let current = Introspection::fingerprint_of(canonical);

        let matches = stored.as_deref() == Some(current.as_slice());

        trace!("introspection fingerprint match: {}", matches);

        Ok(matches)
    }

    /// Stores the fingerprint of the canonical introspection string.
    pub(crate) async fn store_introspection_str(&self, canonical: &str) -> Result<(), StoreError> {
        let fingerprint = Introspection::fingerprint_of(canonical);

        self.store
            .store_introspection(&fingerprint)
            .await
            .map_err(StoreError::store_introspection)
    }
}

/// Joins the `interface/path` entries of the given properties with `;`.
pub(crate) fn join_props_paths(props: &[StoredProp]) -> String {
    let mut out = String::new();

    for prop in props {
        if !out.is_empty() {
            out.push(';');
        }

        out.push_str(&prop.interface);
        out.push_str(&prop.path);
    }

    out
}
