//! Loader for BridgeDB's SQLite store.
//!
//! BridgeDB keeps one row per bridge in its `Bridges` table:
//!
//! ```text
//! id | hex_key | address | or_port | distributor | first_seen | last_seen
//! ```
//!
//! `last_seen` is refreshed every time BridgeDB ingests a new round of
//! bridge descriptors, so the newest `last_seen` value marks the bridges
//! that are currently online. Anything older has dropped out.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::{Error, Result};

use super::address::{parse_port, resolve_host};
use super::types::{Bridge, Distributor, Registry};

/// Timestamp layout BridgeDB writes into `first_seen` / `last_seen`.
pub const LAST_SEEN_LAYOUT: &str = "%Y-%m-%d %H:%M";

const LATEST_LAST_SEEN_QUERY: &str =
    "SELECT last_seen FROM Bridges ORDER BY last_seen DESC LIMIT 1";

const ONLINE_BRIDGES_QUERY: &str =
    "SELECT hex_key, address, or_port, distributor, first_seen, last_seen
     FROM Bridges WHERE last_seen = ?1 AND or_port IS NOT NULL";

/// Open the store read-only. A missing file is an error rather than a new,
/// empty database.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::Database(format!("Failed to open {}: {}", path.display(), e)))
}

/// Load every bridge from the most recent harvest round that has an
/// OR port.
///
/// A single undecodable row fails the whole load.
pub fn load_database(conn: &Connection) -> Result<Registry> {
    let latest: Option<Value> = conn
        .query_row(LATEST_LAST_SEEN_QUERY, [], |row| row.get(0))
        .optional()
        .map_err(|e| Error::Database(format!("Failed to query latest last_seen: {}", e)))?;

    let mut registry = Registry::new();
    let latest = match latest {
        Some(v) => v,
        None => {
            tracing::warn!("Bridges table is empty");
            return Ok(registry);
        }
    };

    let mut stmt = conn
        .prepare(ONLINE_BRIDGES_QUERY)
        .map_err(|e| Error::Database(format!("Failed to prepare query: {}", e)))?;

    let mut rows = stmt
        .query(params![latest])
        .map_err(|e| Error::Database(format!("Failed to query bridges: {}", e)))?;

    while let Some(row) = rows
        .next()
        .map_err(|e| Error::Database(format!("Failed to read bridge: {}", e)))?
    {
        let fingerprint = text_column(row.get::<_, Value>(0)?, "hex_key")?;
        if fingerprint.is_empty() {
            return Err(Error::Database("empty hex_key".to_string()));
        }
        let address = resolve_host(&text_column(row.get::<_, Value>(1)?, "address")?)?;
        let port = port_column(row.get::<_, Value>(2)?)?;
        let distributor: Distributor = text_column(row.get::<_, Value>(3)?, "distributor")?.parse()?;

        let mut bridge = Bridge::new(fingerprint);
        bridge.address = address;
        bridge.port = port;
        bridge.distributor = Some(distributor);
        bridge.first_seen = timestamp_column(row.get::<_, Value>(4)?, &bridge.fingerprint);
        bridge.last_seen = timestamp_column(row.get::<_, Value>(5)?, &bridge.fingerprint);

        if let Some(previous) = registry.insert(bridge) {
            tracing::warn!(
                fingerprint = previous.fingerprint.as_str(),
                "Duplicate fingerprint in Bridges table, keeping the last row"
            );
        }
    }

    tracing::debug!(bridges = registry.len(), "Loaded bridges from SQLite");
    Ok(registry)
}

/// SQLite is loosely typed; BridgeDB has written both integers and text
/// into the same columns over the years.
fn text_column(value: Value, column: &str) -> Result<String> {
    match value {
        Value::Text(s) => Ok(s),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Null => Err(Error::Database(format!("column {} is NULL", column))),
        other => Err(Error::Database(format!(
            "column {} has unexpected type {:?}",
            column,
            other.data_type()
        ))),
    }
}

fn port_column(value: Value) -> Result<u16> {
    match value {
        Value::Integer(i) => u16::try_from(i).map_err(|_| Error::InvalidPort(i.to_string())),
        other => parse_port(&text_column(other, "or_port")?),
    }
}

fn timestamp_column(value: Value, fingerprint: &str) -> Option<NaiveDateTime> {
    let parsed = match &value {
        Value::Text(s) => NaiveDateTime::parse_from_str(s, LAST_SEEN_LAYOUT)
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .ok(),
        Value::Integer(secs) => DateTime::from_timestamp(*secs, 0).map(|dt| dt.naive_utc()),
        _ => None,
    };
    if parsed.is_none() {
        tracing::debug!(fingerprint = fingerprint, value = ?value, "Unparsable timestamp");
    }
    parsed
}
