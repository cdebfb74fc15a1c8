//! Database schema definitions
//!
//! All statements are idempotent so opening an existing database is safe.

use rusqlite::Connection;

/// Creates all required database tables
pub fn create_all_tables(conn: &Connection) -> rusqlite::Result<()> {
    create_local_node_table(conn)?;
    create_app_tables(conn)?;
    create_chunk_tables(conn)?;
    create_state_table(conn)?;
    create_name_claims_table(conn)?;
    Ok(())
}

/// Local node table: this node's Ed25519 key pair (single row)
pub fn create_local_node_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS local_node (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            private_key BLOB NOT NULL CHECK (length(private_key) = 32),
            public_key BLOB NOT NULL CHECK (length(public_key) = 32),
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Cached manifests, keyed by app ID
///
/// `manifest_json` is the manifest exactly as received. `cache_expiry` is
/// `installed_at + cacheDuration` in milliseconds.
pub fn create_app_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cached_apps (
            app_id TEXT PRIMARY KEY NOT NULL,
            version INTEGER NOT NULL,
            manifest_json TEXT NOT NULL,
            installed_at INTEGER NOT NULL,
            last_used INTEGER NOT NULL,
            cache_expiry INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cached_apps_expiry ON cached_apps(cache_expiry)",
        [],
    )?;
    Ok(())
}

/// Content-addressed chunks plus the owner index
///
/// A chunk stays cached while at least one row in `chunk_owners` references
/// it. `owner_app_id` records the app that first brought the bytes in.
pub fn create_chunk_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cached_chunks (
            hash BLOB PRIMARY KEY NOT NULL CHECK (length(hash) = 32),
            data BLOB NOT NULL,
            size INTEGER NOT NULL,
            owner_app_id TEXT NOT NULL,
            cached_at INTEGER NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            last_accessed INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chunk_owners (
            hash BLOB NOT NULL REFERENCES cached_chunks(hash) ON DELETE CASCADE,
            app_id TEXT NOT NULL,
            PRIMARY KEY (hash, app_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chunk_owners_app ON chunk_owners(app_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cached_chunks_lru
         ON cached_chunks(last_accessed, access_count)",
        [],
    )?;
    Ok(())
}

/// Per-app key/value state, last writer wins by `version`
pub fn create_state_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS app_state (
            app_id TEXT NOT NULL,
            key TEXT NOT NULL,
            data BLOB NOT NULL,
            version INTEGER NOT NULL,
            PRIMARY KEY (app_id, key)
        )",
        [],
    )?;
    Ok(())
}

/// Local friendly-name claims (not replicated)
pub fn create_name_claims_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS name_claims (
            name TEXT PRIMARY KEY NOT NULL,
            owner_address TEXT NOT NULL,
            claimed_at INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}
