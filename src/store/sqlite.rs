// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! SQLite-backed tag store
//!
//! All datapoints live in a single `datapoints` table keyed by address. Values are
//! stored as `REAL` whatever their wire type; digital generic registers hold their
//! bitfield as an integral `REAL`.
//!
//! The connection sits behind a `Mutex` and is only held for the duration of one
//! statement (or one upsert transaction). Bit read-modify-writes are serialized per
//! generic base by the [`BitOverlay`], which never holds the connection lock itself.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};

use super::{DataPoint, StoreError, TagStore};
use crate::config::TagConfig;
use crate::registers::overlay::{BitOverlay, BitfieldStore};
use crate::registers::{DataType, TagAddress, TagType};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS datapoints (
    address TEXT PRIMARY KEY NOT NULL,
    description TEXT,
    tag TEXT NOT NULL,
    value REAL,
    datatype TEXT,
    last_update TEXT
)";

/// Prefix of the tag name given to auto-created generic registers
pub const GENERIC_TAG_PREFIX: &str = "GenericAddressTag";

/// Tag name of the generic register hosting the bits of `base`
pub fn generic_tag(base: u16) -> String {
    format!("{}{}", GENERIC_TAG_PREFIX, base)
}

/// Description of the generic register hosting the bits of `base`
pub fn generic_description(base: u16) -> String {
    format!("Generic Digital Address for {}", base)
}

/// Row as read from the table, nullable columns included
#[derive(Debug)]
struct RawRow {
    address: String,
    tag: String,
    description: Option<String>,
    datatype: Option<String>,
    value: Option<f64>,
    last_update: Option<String>,
}

impl RawRow {
    fn is_digital_bit(&self) -> bool {
        let digital = self
            .datatype
            .as_deref()
            .and_then(|datatype| datatype.parse::<TagType>().ok())
            .is_some_and(|tag_type| tag_type.is_digital());
        digital
            && self
                .address
                .parse::<TagAddress>()
                .is_ok_and(|address| address.is_bit())
    }

    fn into_datapoint(self, value: f64) -> DataPoint {
        DataPoint {
            tag: self.tag,
            description: self.description.unwrap_or_default(),
            address: self.address,
            datatype: self.datatype.unwrap_or_default(),
            value,
            last_update: self.last_update.unwrap_or_default(),
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Tag store persisted in a SQLite database
pub struct SqliteTagStore {
    conn: Mutex<Connection>,
    overlay: BitOverlay,
}

impl SqliteTagStore {
    /// Open (or create) the database file at `path` and make sure the table exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        info!("Opening tag database {}", path.as_ref().display());
        let store = Self::from_connection(Connection::open(path)?);
        store.create_table()?;
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self::from_connection(Connection::open_in_memory()?);
        store.create_table()?;
        Ok(store)
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            overlay: BitOverlay::new(),
        }
    }

    /// Create the `datapoints` table if it does not exist yet
    pub fn create_table(&self) -> Result<(), StoreError> {
        self.conn()?.execute(CREATE_TABLE, [])?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn row_by_address(&self, address: &str) -> Result<Option<RawRow>, StoreError> {
        let row = self
            .conn()?
            .query_row(
                "SELECT address, tag, description, datatype, value, last_update
                 FROM datapoints WHERE address = ?1",
                params![address],
                |row| {
                    Ok(RawRow {
                        address: row.get(0)?,
                        tag: row.get(1)?,
                        description: row.get(2)?,
                        datatype: row.get(3)?,
                        value: row.get(4)?,
                        last_update: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn address_of_tag(&self, tag: &str) -> Result<String, StoreError> {
        self.conn()?
            .query_row(
                "SELECT address FROM datapoints WHERE tag = ?1",
                params![tag],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(tag.to_string()))
    }

    /// Update the value column, returns the number of rows changed
    fn update_value(&self, address: &str, value: f64) -> Result<usize, StoreError> {
        let changed = self.conn()?.execute(
            "UPDATE datapoints SET value = ?1, last_update = ?2 WHERE address = ?3",
            params![value, timestamp(), address],
        )?;
        Ok(changed)
    }
}

impl BitfieldStore for SqliteTagStore {
    fn load_bitfield(&self, base: u16) -> Result<Option<u64>, StoreError> {
        let value: Option<Option<f64>> = self
            .conn()?
            .query_row(
                "SELECT value FROM datapoints WHERE address = ?1",
                params![base.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten().map(|field| field as u64))
    }

    fn store_bitfield(&self, base: u16, field: u64) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO datapoints (address, description, tag, datatype, value, last_update)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(address) DO UPDATE SET
                value = excluded.value,
                last_update = excluded.last_update",
            params![
                base.to_string(),
                generic_description(base),
                generic_tag(base),
                DataType::Digital.as_str(),
                field as f64,
                timestamp()
            ],
        )?;
        Ok(())
    }

    fn bit_addresses(&self, base: u16) -> Result<Vec<String>, StoreError> {
        // `_` is a LIKE wildcard, escape it so "10_%" does not match "100"
        let pattern = format!("{}\\_%", base);
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT address FROM datapoints WHERE address LIKE ?1 ESCAPE '\\'")?;
        let addresses = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(addresses)
    }

    fn store_bit_view(&self, address: &str, bit_value: u8) -> Result<(), StoreError> {
        self.update_value(address, f64::from(bit_value))?;
        Ok(())
    }
}

impl TagStore for SqliteTagStore {
    fn upsert_tags(&self, tags: &[TagConfig]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = timestamp();

        for tag in tags {
            if let TagAddress::Bit { base, .. } = tag.address.parse::<TagAddress>()? {
                tx.execute(
                    "INSERT INTO datapoints (address, description, tag, datatype, value, last_update)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5)
                     ON CONFLICT(address) DO UPDATE SET
                        description = excluded.description,
                        tag = excluded.tag,
                        datatype = excluded.datatype",
                    params![
                        base.to_string(),
                        generic_description(base),
                        generic_tag(base),
                        DataType::Digital.as_str(),
                        now
                    ],
                )?;
            }

            tx.execute(
                "INSERT INTO datapoints (address, description, tag, datatype, last_update)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(address) DO UPDATE SET
                    description = excluded.description,
                    tag = excluded.tag,
                    datatype = excluded.datatype",
                params![tag.address, tag.description, tag.tag, tag.datatype, now],
            )?;
            debug!("Registered tag {} at {} ({})", tag.tag, tag.address, tag.datatype);
        }

        tx.commit()?;
        info!("Registered {} tags", tags.len());
        Ok(())
    }

    fn data_type_of(&self, address: &str) -> Result<TagType, StoreError> {
        let datatype: Option<Option<String>> = self
            .conn()?
            .query_row(
                "SELECT datatype FROM datapoints WHERE address = ?1",
                params![address],
                |row| row.get(0),
            )
            .optional()?;
        match datatype {
            None => Err(StoreError::NotFound(address.to_string())),
            Some(datatype) => Ok(datatype.unwrap_or_default().parse::<TagType>()?),
        }
    }

    fn get_by_address(&self, address: &str) -> Result<DataPoint, StoreError> {
        let row = self
            .row_by_address(address)?
            .ok_or_else(|| StoreError::NotFound(address.to_string()))?;

        let value = if row.is_digital_bit() {
            f64::from(self.overlay.get_bit(self, address)?)
        } else {
            row.value
                .ok_or_else(|| StoreError::NoValue(address.to_string()))?
        };
        Ok(row.into_datapoint(value))
    }

    fn set_value(&self, address: &str, value: f64) -> Result<(), StoreError> {
        // SQLite binds NaN as NULL, which would erase the value
        if !value.is_finite() {
            return Err(StoreError::NonFinite(address.to_string()));
        }
        let tag_type = self.data_type_of(address)?;

        if tag_type.is_digital() {
            match address.parse::<TagAddress>()? {
                TagAddress::Bit { .. } => {
                    self.overlay.set_bit(self, address, value)?;
                }
                TagAddress::Register(base) => {
                    // saturating: negative values clear the field
                    self.overlay.store_field(self, base, value as u64)?;
                }
            }
            return Ok(());
        }

        if self.update_value(address, value)? == 0 {
            return Err(StoreError::NotFound(address.to_string()));
        }
        Ok(())
    }

    fn get_by_tag(&self, tag: &str) -> Result<DataPoint, StoreError> {
        let address = self.address_of_tag(tag)?;
        self.get_by_address(&address)
    }

    fn set_by_tag(&self, tag: &str, value: f64) -> Result<(), StoreError> {
        let address = self.address_of_tag(tag)?;
        self.set_value(&address, value)
    }

    fn set_bit(&self, address: &str, value: f64) -> Result<u64, StoreError> {
        self.overlay.set_bit(self, address, value)
    }

    fn get_bit(&self, address: &str) -> Result<u8, StoreError> {
        self.overlay.get_bit(self, address)
    }

    fn propagate_digital(&self, base: u16) -> Result<usize, StoreError> {
        self.overlay.propagate(self, base)
    }

    fn healthcheck(&self) -> Result<(), StoreError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM datapoints", [], |row| row.get(0))?;
        debug!("Healthcheck: {} datapoints", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(tag: &str, address: &str, datatype: &str) -> TagConfig {
        TagConfig {
            tag: tag.to_string(),
            description: format!("{} description", tag),
            address: address.to_string(),
            datatype: datatype.to_string(),
        }
    }

    fn store_with(tags: &[TagConfig]) -> SqliteTagStore {
        let store = SqliteTagStore::open_in_memory().unwrap();
        store.upsert_tags(tags).unwrap();
        store
    }

    #[test]
    fn test_upsert_creates_generic_register() {
        let store = store_with(&[tag("Alarm", "10_1", "digital_1")]);

        let generic = store.get_by_address("10").unwrap();
        assert_eq!(generic.tag, "GenericAddressTag10");
        assert_eq!(generic.description, "Generic Digital Address for 10");
        assert_eq!(generic.datatype, "digital");
        assert_eq!(generic.value, 0.0);
    }

    #[test]
    fn test_upsert_refreshes_metadata_only() {
        let store = store_with(&[tag("Valid", "4", "float32")]);
        store.set_value("4", 12.5).unwrap();

        let mut renamed = tag("Renamed", "4", "float32");
        renamed.description = "new".to_string();
        store.upsert_tags(&[renamed]).unwrap();

        let row = store.get_by_address("4").unwrap();
        assert_eq!(row.tag, "Renamed");
        assert_eq!(row.description, "new");
        assert_eq!(row.value, 12.5);
    }

    #[test]
    fn test_set_and_get_value_refreshes_timestamp() {
        let store = store_with(&[tag("Valid", "4", "float32")]);
        store.set_value("4", 100.0).unwrap();

        let row = store.get_by_address("4").unwrap();
        assert_eq!(row.value, 100.0);
        assert!(chrono::DateTime::parse_from_rfc3339(&row.last_update).is_ok());
        assert_eq!(store.get_by_tag("Valid").unwrap(), row);
    }

    #[test]
    fn test_unknown_address_is_not_found() {
        let store = store_with(&[]);
        assert!(store.get_by_address("0").unwrap_err().is_not_found());
        assert!(store.set_value("0", 1.0).unwrap_err().is_not_found());
        assert!(store.data_type_of("0").unwrap_err().is_not_found());
        assert!(store.get_by_tag("Nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_null_value_is_no_value() {
        let store = store_with(&[tag("Test", "2", "float32")]);
        assert!(matches!(
            store.get_by_address("2"),
            Err(StoreError::NoValue(_))
        ));
    }

    #[test]
    fn test_data_type_keeps_discriminator() {
        let store = store_with(&[tag("Alarm", "10_3", "digital_3")]);
        let tag_type = store.data_type_of("10_3").unwrap();
        assert!(tag_type.is_digital());
        assert_eq!(tag_type.bit, Some(3));
        assert_eq!(store.data_type_of("10").unwrap(), TagType::plain(DataType::Digital));
    }

    #[test]
    fn test_sub_bit_write_updates_generic_register() {
        let store = store_with(&[
            tag("D0", "10_0", "digital_0"),
            tag("D1", "10_1", "digital_1"),
        ]);
        store.set_value("10_0", 1.0).unwrap();
        store.set_by_tag("D1", 1.0).unwrap();

        assert_eq!(store.get_by_address("10").unwrap().value, 3.0);
        assert_eq!(store.get_by_address("10_0").unwrap().value, 1.0);

        store.set_value("10_1", 0.0).unwrap();
        assert_eq!(store.get_by_address("10").unwrap().value, 1.0);
        assert_eq!(store.get_by_address("10_0").unwrap().value, 1.0);
        assert_eq!(store.get_by_address("10_1").unwrap().value, 0.0);
    }

    #[test]
    fn test_generic_write_propagates_to_sub_bits() {
        let store = store_with(&[
            tag("D0", "10_0", "digital_0"),
            tag("D2", "10_2", "digital_2"),
            tag("Other", "100", "uint16"),
        ]);
        store.set_value("100", 7.0).unwrap();
        store.set_value("10", 5.0).unwrap();

        assert_eq!(store.get_by_address("10_0").unwrap().value, 1.0);
        assert_eq!(store.get_by_address("10_2").unwrap().value, 1.0);
        assert_eq!(store.get_by_address("100").unwrap().value, 7.0);
        assert_eq!(store.bit_addresses(10).unwrap().len(), 2);
    }

    #[test]
    fn test_propagate_digital_refreshes_stale_rows() {
        let store = store_with(&[
            tag("D0", "10_0", "digital_0"),
            tag("D1", "10_1", "digital_1"),
        ]);
        store.set_value("10_0", 1.0).unwrap();
        // bypasses the overlay, leaving the sub-bit rows stale
        store.store_bitfield(10, 0b10).unwrap();

        assert_eq!(store.propagate_digital(10).unwrap(), 2);
        assert_eq!(store.row_by_address("10_0").unwrap().unwrap().value, Some(0.0));
        assert_eq!(store.row_by_address("10_1").unwrap().unwrap().value, Some(1.0));
    }

    #[test]
    fn test_set_bit_creates_missing_generic_register() {
        let store = store_with(&[]);
        assert_eq!(store.get_bit("20_4").unwrap(), 0);
        assert_eq!(store.set_bit("20_4", 1.0).unwrap(), 16);
        assert_eq!(store.get_bit("20_4").unwrap(), 1);
        assert_eq!(store.get_by_address("20").unwrap().tag, "GenericAddressTag20");
    }

    #[test]
    fn test_non_finite_value_is_rejected() {
        let store = store_with(&[tag("Valid", "4", "float32")]);
        store.set_value("4", 12.5).unwrap();

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                store.set_value("4", value),
                Err(StoreError::NonFinite(_))
            ));
        }
        assert_eq!(store.get_by_address("4").unwrap().value, 12.5);
    }

    #[test]
    fn test_concurrent_sub_bit_writes_keep_every_bit() {
        let store = store_with(&[
            tag("D0", "10_0", "digital_0"),
            tag("D1", "10_1", "digital_1"),
            tag("D2", "10_2", "digital_2"),
            tag("D3", "10_3", "digital_3"),
        ]);

        std::thread::scope(|scope| {
            for bit in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    let address = format!("10_{}", bit);
                    for _ in 0..200 {
                        store.set_value(&address, 0.0).unwrap();
                        store.set_value(&address, 1.0).unwrap();
                    }
                });
            }
        });

        assert_eq!(store.get_by_address("10").unwrap().value, 15.0);
        for bit in 0..4 {
            let address = format!("10_{}", bit);
            assert_eq!(store.get_by_address(&address).unwrap().value, 1.0);
        }
    }

    #[test]
    fn test_generic_write_is_not_lost_to_concurrent_bit_writes() {
        let store = store_with(&[tag("D0", "10_0", "digital_0")]);

        for _ in 0..200 {
            store.set_value("10", 0.0).unwrap();
            let start = std::sync::Barrier::new(5);

            std::thread::scope(|scope| {
                for _ in 0..4 {
                    let (store, start) = (&store, &start);
                    scope.spawn(move || {
                        start.wait();
                        store.set_value("10_0", 1.0).unwrap();
                    });
                }
                let (store, start) = (&store, &start);
                scope.spawn(move || {
                    start.wait();
                    store.set_value("10", 4.0).unwrap();
                });
            });

            // bit 0 writers never clear bit 2, whichever side ran last
            let field = store.get_by_address("10").unwrap().value as u64;
            assert_ne!(field & 0b100, 0, "generic write lost, field {:#06b}", field);
        }
    }

    #[test]
    fn test_healthcheck() {
        let store = store_with(&[]);
        assert!(store.healthcheck().is_ok());
    }

    #[test]
    fn test_open_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.db");
        {
            let store = SqliteTagStore::open(&path).unwrap();
            store.upsert_tags(&[tag("Valid", "4", "float32")]).unwrap();
            store.set_value("4", 42.0).unwrap();
        }
        let store = SqliteTagStore::open(&path).unwrap();
        assert_eq!(store.get_by_address("4").unwrap().value, 42.0);
    }
}
