//! Per-app key/value state
//!
//! `version` is the write timestamp in milliseconds. A write carrying an
//! older version than the stored one is ignored (last writer wins).

use rusqlite::{params, Connection, OptionalExtension};

/// One state value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub app_id: String,
    pub key: String,
    pub data: Vec<u8>,
    pub version: i64,
}

/// Write a value unless a newer version is already stored.
///
/// Returns whether the write was applied.
pub fn put_state(
    conn: &Connection,
    app_id: &str,
    key: &str,
    data: &[u8],
    version: i64,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT INTO app_state (app_id, key, data, version) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(app_id, key) DO UPDATE SET
            data = excluded.data,
            version = excluded.version
         WHERE excluded.version >= app_state.version",
        params![app_id, key, data, version],
    )?;
    Ok(changed > 0)
}

pub fn get_state(conn: &Connection, app_id: &str, key: &str) -> rusqlite::Result<Option<StateEntry>> {
    conn.query_row(
        "SELECT data, version FROM app_state WHERE app_id = ?1 AND key = ?2",
        params![app_id, key],
        |row| {
            Ok(StateEntry {
                app_id: app_id.to_string(),
                key: key.to_string(),
                data: row.get(0)?,
                version: row.get(1)?,
            })
        },
    )
    .optional()
}

/// All keys stored for an app, sorted by key
pub fn list_state(conn: &Connection, app_id: &str) -> rusqlite::Result<Vec<StateEntry>> {
    let mut stmt =
        conn.prepare("SELECT key, data, version FROM app_state WHERE app_id = ?1 ORDER BY key")?;
    let entries = stmt
        .query_map([app_id], |row| {
            Ok(StateEntry {
                app_id: app_id.to_string(),
                key: row.get(0)?,
                data: row.get(1)?,
                version: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn count_state(conn: &Connection) -> rusqlite::Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM app_state", [], |row| row.get(0))
}
