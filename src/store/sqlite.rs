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

//! Provides an Astarte sqlite database for the device properties.
//!
//! Values are stored as their BSON payload envelope in a SQLite BLOB,
//! together with the numeric tag of the mapping type, the interface major
//! version and the ownership. Every mutation is a single UPSERT or DELETE in
//! WAL mode, so readers observe the old row or the new one, never a torn
//! value.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::{
    interface::{mapping::MappingType, Ownership},
    payload::{self, PayloadError},
    types::AstarteType,
};

use super::{PropertyStore, StoredProp};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS properties (
        interface TEXT NOT NULL,
        path TEXT NOT NULL,
        interface_major INTEGER NOT NULL,
        ownership INTEGER NOT NULL,
        stored_type INTEGER NOT NULL,
        value BLOB NOT NULL,
        PRIMARY KEY (interface, path)
    );
    CREATE TABLE IF NOT EXISTS introspection (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        fingerprint BLOB NOT NULL
    );
";

/// Error returned by the [`SqliteStore`].
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    /// Error returned when the database connection fails.
    #[error("could not open the database")]
    Open(#[source] rusqlite::Error),
    /// Error returned when a query fails.
    #[error("could not execute the query")]
    Query(#[from] rusqlite::Error),
    /// Error returned when the decode of a stored property fails.
    #[error("could not decode the stored property")]
    Decode(#[from] PayloadError),
    /// The stored ownership column is not a valid value.
    #[error("unrecognized ownership value {0}")]
    Ownership(i64),
    /// The stored type tag is not a valid mapping type.
    #[error("unrecognized stored type tag {0}")]
    StoredType(i64),
}

fn ownership_to_i64(ownership: Ownership) -> i64 {
    match ownership {
        Ownership::Device => 0,
        Ownership::Server => 1,
    }
}

fn ownership_from_i64(value: i64) -> Result<Ownership, SqliteError> {
    match value {
        0 => Ok(Ownership::Device),
        1 => Ok(Ownership::Server),
        other => Err(SqliteError::Ownership(other)),
    }
}

/// Raw row of the properties table, decoded outside of the query closure.
#[derive(Debug)]
struct PropRecord {
    interface: String,
    path: String,
    interface_major: i32,
    ownership: i64,
    stored_type: i64,
    value: Vec<u8>,
}

impl TryFrom<PropRecord> for StoredProp {
    type Error = SqliteError;

    fn try_from(record: PropRecord) -> Result<Self, Self::Error> {
        let ownership = ownership_from_i64(record.ownership)?;

        let tag = u8::try_from(record.stored_type)
            .ok()
            .and_then(MappingType::from_u8)
            .ok_or(SqliteError::StoredType(record.stored_type))?;

        let value = payload::deserialize_stored(tag, &record.value)?;

        Ok(StoredProp {
            interface: record.interface,
            path: record.path,
            value,
            interface_major: record.interface_major,
            ownership,
        })
    }
}

/// Data structure providing an implementation of a sqlite database.
///
/// Can be used by an Astarte device to store permanently properties values.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the sqlite database at the given path.
    ///
    /// ```no_run
    /// use astarte_device_runtime::store::sqlite::SqliteStore;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let database = SqliteStore::open("path/to/database/file.sqlite")
    ///         .await
    ///         .unwrap();
    /// }
    /// ```
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SqliteError> {
        let connection = Connection::open(path).map_err(SqliteError::Open)?;

        Self::init(connection)
    }

    /// Creates an in memory sqlite database.
    pub async fn in_memory() -> Result<Self, SqliteError> {
        let connection = Connection::open_in_memory().map_err(SqliteError::Open)?;

        Self::init(connection)
    }

    fn init(connection: Connection) -> Result<Self, SqliteError> {
        // A single atomic write per mutation, durable across power loss.
        let _: String =
            connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        connection.execute_batch(SCHEMA)?;

        debug!("property database ready");

        Ok(SqliteStore {
            db: Arc::new(Mutex::new(connection)),
        })
    }

    async fn props_where(&self, filter: Option<Ownership>) -> Result<Vec<StoredProp>, SqliteError> {
        let db = self.db.lock().await;

        let (query, params) = match filter {
            Some(ownership) => (
                "SELECT interface, path, interface_major, ownership, stored_type, value
                 FROM properties WHERE ownership = ?1",
                vec![ownership_to_i64(ownership)],
            ),
            None => (
                "SELECT interface, path, interface_major, ownership, stored_type, value
                 FROM properties",
                vec![],
            ),
        };

        let mut statement = db.prepare(query)?;

        let records = statement
            .query_map(rusqlite::params_from_iter(params), |row| {
                Ok(PropRecord {
                    interface: row.get(0)?,
                    path: row.get(1)?,
                    interface_major: row.get(2)?,
                    ownership: row.get(3)?,
                    stored_type: row.get(4)?,
                    value: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<PropRecord>, rusqlite::Error>>()?;

        records.into_iter().map(StoredProp::try_from).collect()
    }
}

#[async_trait]
impl PropertyStore for SqliteStore {
    type Err = SqliteError;

    async fn store_prop(&self, prop: StoredProp<&str, &AstarteType>) -> Result<(), Self::Err> {
        debug!(
            "storing property {}{} in the database ({:?})",
            prop.interface, prop.path, prop.value
        );

        let buf = payload::serialize_individual(prop.value, None)?;
        let tag = i64::from(prop.value.mapping_type().as_u8());

        let db = self.db.lock().await;

        db.execute(
            "INSERT OR REPLACE INTO properties
                 (interface, path, interface_major, ownership, stored_type, value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                prop.interface,
                prop.path,
                prop.interface_major,
                ownership_to_i64(prop.ownership),
                tag,
                buf
            ],
        )?;

        Ok(())
    }

    async fn load_prop(
        &self,
        interface: &str,
        path: &str,
    ) -> Result<Option<StoredProp>, Self::Err> {
        let record = {
            let db = self.db.lock().await;

            db.query_row(
                "SELECT interface, path, interface_major, ownership, stored_type, value
                 FROM properties WHERE interface = ?1 AND path = ?2",
                rusqlite::params![interface, path],
                |row| {
                    Ok(PropRecord {
                        interface: row.get(0)?,
                        path: row.get(1)?,
                        interface_major: row.get(2)?,
                        ownership: row.get(3)?,
                        stored_type: row.get(4)?,
                        value: row.get(5)?,
                    })
                },
            )
            .optional()?
        };

        let Some(record) = record else {
            return Ok(None);
        };

        trace!("loaded property {}{}", interface, path);

        StoredProp::try_from(record).map(Some)
    }

    async fn delete_prop(&self, interface: &str, path: &str) -> Result<(), Self::Err> {
        let db = self.db.lock().await;

        db.execute(
            "DELETE FROM properties WHERE interface = ?1 AND path = ?2",
            rusqlite::params![interface, path],
        )?;

        Ok(())
    }

    async fn clear(&self) -> Result<(), Self::Err> {
        let db = self.db.lock().await;

        db.execute("DELETE FROM properties", [])?;

        Ok(())
    }

    async fn load_all_props(&self) -> Result<Vec<StoredProp>, Self::Err> {
        self.props_where(None).await
    }

    async fn device_props(&self) -> Result<Vec<StoredProp>, Self::Err> {
        self.props_where(Some(Ownership::Device)).await
    }

    async fn server_props(&self) -> Result<Vec<StoredProp>, Self::Err> {
        self.props_where(Some(Ownership::Server)).await
    }

    async fn store_introspection(&self, fingerprint: &[u8]) -> Result<(), Self::Err> {
        let db = self.db.lock().await;

        db.execute(
            "INSERT OR REPLACE INTO introspection (id, fingerprint) VALUES (0, ?1)",
            rusqlite::params![fingerprint],
        )?;

        Ok(())
    }

    async fn load_introspection(&self) -> Result<Option<Vec<u8>>, Self::Err> {
        let db = self.db.lock().await;

        db.query_row("SELECT fingerprint FROM introspection WHERE id = 0", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(SqliteError::from)
    }
}
