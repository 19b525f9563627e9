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

//! The set of interfaces a device claims to support.
//!
//! The introspection is communicated to Astarte on connect as a `;` joined
//! list of `name:major:minor` entries. Interfaces are kept sorted by name so
//! the canonical string, and the fingerprint derived from it, are stable
//! across restarts and insertion orders.

use std::collections::BTreeMap;

use itertools::Itertools;
use sha2::{Digest, Sha256};

use crate::interface::{Interface, InterfaceError};

/// Size in bytes of the introspection fingerprint.
pub const FINGERPRINT_LEN: usize = 32;

/// Ordered set of the interfaces installed on the device, unique by name.
#[derive(Debug, Clone, Default)]
pub struct Introspection {
    interfaces: BTreeMap<String, Interface>,
}

impl Introspection {
    /// Creates an empty introspection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the introspection from the given interfaces.
    ///
    /// Errors with [`InterfaceError::InterfaceAlreadyPresent`] on duplicated
    /// interface names.
    pub fn from_iter<I>(interfaces: I) -> Result<Self, InterfaceError>
    where
        I: IntoIterator<Item = Interface>,
    {
        let mut introspection = Self::new();

        for interface in interfaces {
            introspection.add(interface)?;
        }

        Ok(introspection)
    }

    /// Adds an interface, erroring if one with the same name is present.
    pub fn add(&mut self, interface: Interface) -> Result<(), InterfaceError> {
        let name = interface.interface_name().to_string();

        if self.interfaces.contains_key(&name) {
            return Err(InterfaceError::InterfaceAlreadyPresent { name });
        }

        self.interfaces.insert(name, interface);

        Ok(())
    }

    /// Removes the interface with the given name.
    pub fn remove(&mut self, interface_name: &str) -> Result<Interface, InterfaceError> {
        self.interfaces
            .remove(interface_name)
            .ok_or_else(|| InterfaceError::InterfaceNotFound {
                name: interface_name.to_string(),
            })
    }

    /// Returns the interface with the given name.
    pub fn get(&self, interface_name: &str) -> Option<&Interface> {
        self.interfaces.get(interface_name)
    }

    /// Iterates over the interfaces, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }

    /// Number of installed interfaces.
    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    /// Returns true when no interface is installed.
    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Returns true when an interface with the given name and major version
    /// is installed.
    pub fn contains_major(&self, interface_name: &str, version_major: i32) -> bool {
        self.get(interface_name)
            .is_some_and(|interface| interface.version_major() == version_major)
    }

    /// The canonical introspection string: `name:major:minor` entries joined
    /// by `;`, sorted by name, without a trailing separator. Empty when no
    /// interfaces are installed.
    pub fn canonical_string(&self) -> String {
        self.iter().map(Interface::to_string).join(";")
    }

    /// SHA-256 fingerprint of a canonical introspection string, persisted to
    /// detect introspection changes across sessions.
    pub fn fingerprint_of(canonical: &str) -> [u8; FINGERPRINT_LEN] {
        let mut hash = Sha256::default();
        hash.update(canonical.as_bytes());

        hash.finalize().into()
    }

    /// Fingerprint of this introspection.
    pub fn fingerprint(&self) -> [u8; FINGERPRINT_LEN] {
        Self::fingerprint_of(&self.canonical_string())
    }
}
