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

//! Error types for the property store.

use std::error::Error as StdError;

type DynError = Box<dyn StdError + Send + Sync>;

/// Error returned by a store operation.
///
/// Wraps the error of the concrete store implementation, tagging the
/// operation that failed.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Couldn't store the property.
    #[error("could not store the property")]
    Store(#[source] DynError),
    /// Couldn't load the property.
    #[error("could not load the property")]
    Load(#[source] DynError),
    /// Couldn't delete the property.
    #[error("could not delete the property")]
    Delete(#[source] DynError),
    /// Couldn't clear the stored properties.
    #[error("could not clear the stored properties")]
    Clear(#[source] DynError),
    /// Couldn't load the stored properties.
    #[error("could not load the stored properties")]
    LoadAll(#[source] DynError),
    /// Couldn't store the introspection fingerprint.
    #[error("could not store the introspection fingerprint")]
    StoreIntrospection(#[source] DynError),
    /// Couldn't load the introspection fingerprint.
    #[error("could not load the introspection fingerprint")]
    LoadIntrospection(#[source] DynError),
}

impl StoreError {
    pub(crate) fn store(err: impl Into<DynError>) -> Self {
        StoreError::Store(err.into())
    }

    pub(crate) fn load(err: impl Into<DynError>) -> Self {
        StoreError::Load(err.into())
    }

    pub(crate) fn delete(err: impl Into<DynError>) -> Self {
        StoreError::Delete(err.into())
    }

    pub(crate) fn clear(err: impl Into<DynError>) -> Self {
        StoreError::Clear(err.into())
    }

    pub(crate) fn load_all(err: impl Into<DynError>) -> Self {
        StoreError::LoadAll(err.into())
    }

    pub(crate) fn store_introspection(err: impl Into<DynError>) -> Self {
        StoreError::StoreIntrospection(err.into())
    }

    pub(crate) fn load_introspection(err: impl Into<DynError>) -> Self {
        StoreError::LoadIntrospection(err.into())
    }
}
