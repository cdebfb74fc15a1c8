//! Cached manifests
//!
//! One row per app ID. Freshness is decided by the caller (lazy expiry): rows
//! stay in place after `cache_expiry` until a sweep removes them.

use rusqlite::{params, Connection, OptionalExtension};

use crate::bundle::Manifest;

/// A manifest held in the local cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedApp {
    pub manifest: Manifest,
    pub installed_at: i64,
    pub last_used: i64,
    /// `installed_at + manifest.cache_duration`
    pub cache_expiry: i64,
}

impl CachedApp {
    /// Fresh while `now <= cache_expiry`
    pub fn is_fresh(&self, now: i64) -> bool {
        now <= self.cache_expiry
    }
}

/// Expiry timestamp for a manifest installed at `now`
pub fn expiry_for(manifest: &Manifest, now: i64) -> i64 {
    let duration = i64::try_from(manifest.cache_duration).unwrap_or(i64::MAX);
    now.saturating_add(duration)
}

fn parse_app_row(row: &rusqlite::Row) -> rusqlite::Result<CachedApp> {
    let json: String = row.get(0)?;
    let manifest = Manifest::from_json(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(CachedApp {
        manifest,
        installed_at: row.get(1)?,
        last_used: row.get(2)?,
        cache_expiry: row.get(3)?,
    })
}

/// Insert or replace the manifest for its app ID
pub fn upsert_app(conn: &Connection, manifest: &Manifest, now: i64) -> rusqlite::Result<CachedApp> {
    let json = manifest
        .to_json()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let cache_expiry = expiry_for(manifest, now);

    conn.execute(
        "INSERT INTO cached_apps (app_id, version, manifest_json, installed_at, last_used, cache_expiry)
         VALUES (?1, ?2, ?3, ?4, ?4, ?5)
         ON CONFLICT(app_id) DO UPDATE SET
            version = excluded.version,
            manifest_json = excluded.manifest_json,
            installed_at = excluded.installed_at,
            last_used = excluded.last_used,
            cache_expiry = excluded.cache_expiry",
        params![manifest.app_id, manifest.version, json, now, cache_expiry],
    )?;

    Ok(CachedApp {
        manifest: manifest.clone(),
        installed_at: now,
        last_used: now,
        cache_expiry,
    })
}

/// Get the cached row regardless of freshness
pub fn get_app(conn: &Connection, app_id: &str) -> rusqlite::Result<Option<CachedApp>> {
    conn.query_row(
        "SELECT manifest_json, installed_at, last_used, cache_expiry
         FROM cached_apps WHERE app_id = ?1",
        [app_id],
        parse_app_row,
    )
    .optional()
}

/// Record a cache hit
pub fn touch_app(conn: &Connection, app_id: &str, now: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE cached_apps SET last_used = ?2 WHERE app_id = ?1",
        params![app_id, now],
    )?;
    Ok(())
}

/// Delete an app row. Returns whether a row existed.
pub fn delete_app(conn: &Connection, app_id: &str) -> rusqlite::Result<bool> {
    let deleted = conn.execute("DELETE FROM cached_apps WHERE app_id = ?1", [app_id])?;
    Ok(deleted > 0)
}

/// App IDs whose expiry is strictly before `now`
pub fn expired_app_ids(conn: &Connection, now: i64) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT app_id FROM cached_apps WHERE cache_expiry < ?1 ORDER BY cache_expiry",
    )?;
    let ids = stmt
        .query_map([now], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Summary rows for every cached app: (app_id, version, cache_expiry)
pub fn list_apps(conn: &Connection) -> rusqlite::Result<Vec<(String, u32, i64)>> {
    let mut stmt =
        conn.prepare("SELECT app_id, version, cache_expiry FROM cached_apps ORDER BY app_id")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Number of cached apps
pub fn count_apps(conn: &Connection) -> rusqlite::Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM cached_apps", [], |row| row.get(0))
}
