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

//! In memory property store, without persistence across restarts.
//!
//! Useful for tests and for devices that accept re-declaring every property
//! on each session.

use std::{collections::HashMap, convert::Infallible, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{interface::Ownership, types::AstarteType};

use super::{PropertyStore, StoredProp};

/// Data structure providing an implementation of an in memory Key Value Store.
///
/// Can be used by an Astarte device to store temporarily properties while
/// connected.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    store: Arc<RwLock<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    props: HashMap<Key, Value>,
    introspection: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    interface: String,
    path: String,
}

#[derive(Debug, Clone)]
struct Value {
    value: AstarteType,
    interface_major: i32,
    ownership: Ownership,
}

impl MemoryStore {
    /// Creates an empty in memory store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn props_with(&self, filter: Option<Ownership>) -> Vec<StoredProp> {
        let store = self.store.read().await;

        store
            .props
            .iter()
            .filter(|(_, value)| filter.map_or(true, |ownership| value.ownership == ownership))
            .map(|(key, value)| StoredProp {
                interface: key.interface.clone(),
                path: key.path.clone(),
                value: value.value.clone(),
                interface_major: value.interface_major,
                ownership: value.ownership,
            })
            .collect()
    }
}

#[async_trait]
impl PropertyStore for MemoryStore {
    type Err = Infallible;

    async fn store_prop(&self, prop: StoredProp<&str, &AstarteType>) -> Result<(), Self::Err> {
        let key = Key {
            interface: prop.interface.to_string(),
            path: prop.path.to_string(),
        };
        let value = Value {
            value: prop.value.clone(),
            interface_major: prop.interface_major,
            ownership: prop.ownership,
        };

        let mut store = self.store.write().await;

        store.props.insert(key, value);

        Ok(())
    }

    async fn load_prop(
        &self,
        interface: &str,
        path: &str,
    ) -> Result<Option<StoredProp>, Self::Err> {
        let key = Key {
            interface: interface.to_string(),
            path: path.to_string(),
        };

        let store = self.store.read().await;

        Ok(store.props.get(&key).map(|value| StoredProp {
            interface: interface.to_string(),
            path: path.to_string(),
            value: value.value.clone(),
            interface_major: value.interface_major,
            ownership: value.ownership,
        }))
    }

    async fn delete_prop(&self, interface: &str, path: &str) -> Result<(), Self::Err> {
        let key = Key {
            interface: interface.to_string(),
            path: path.to_string(),
        };

        let mut store = self.store.write().await;

        store.props.remove(&key);

        Ok(())
    }

    async fn clear(&self) -> Result<(), Self::Err> {
        let mut store = self.store.write().await;

        store.props.clear();

        Ok(())
    }

    async fn load_all_props(&self) -> Result<Vec<StoredProp>, Self::Err> {
        Ok(self.props_with(None).await)
    }

    async fn device_props(&self) -> Result<Vec<StoredProp>, Self::Err> {
        Ok(self.props_with(Some(Ownership::Device)).await)
    }

    async fn server_props(&self) -> Result<Vec<StoredProp>, Self::Err> {
        Ok(self.props_with(Some(Ownership::Server)).await)
    }

    async fn store_introspection(&self, fingerprint: &[u8]) -> Result<(), Self::Err> {
        let mut store = self.store.write().await;

        store.introspection = Some(fingerprint.to_vec());

        Ok(())
    }

    async fn load_introspection(&self) -> Result<Option<Vec<u8>>, Self::Err> {
        let store = self.store.read().await;

        Ok(store.introspection.clone())
    }
}
