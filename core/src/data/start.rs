//! Database initialization and startup
//!
//! Opens the SQLite database and ensures all required tables exist.

use std::path::Path;

use rusqlite::Connection;

use super::schema::create_all_tables;

/// Error type for database startup
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// Parent directory could not be created
    #[error("failed to prepare database directory: {0}")]
    Directory(#[from] std::io::Error),
    /// SQLite error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Opens the database at `db_path` and ensures all required tables exist
///
/// Creates the parent directory if needed, enables WAL journaling and
/// foreign keys (chunk owner rows cascade on chunk deletion).
pub fn start_db(db_path: &Path) -> Result<Connection, StartError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;

    // PRAGMA journal_mode returns the new mode, so it has to be queried
    let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    create_all_tables(&conn)?;
    Ok(conn)
}

/// Create an in-memory database (tests and ephemeral nodes)
pub fn start_memory_db() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    // WAL does not apply to in-memory databases
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_all_tables(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_db_creates_file_and_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mooring.db");

        let conn = start_db(&path).unwrap();
        assert!(path.exists());

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'cached_apps'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reopen_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mooring.db");

        {
            let conn = start_db(&path).unwrap();
            conn.execute(
                "INSERT INTO name_claims (name, owner_address, claimed_at) VALUES ('CHAT', 'aa', 1)",
                [],
            )
            .unwrap();
        }

        let conn = start_db(&path).unwrap();
        let owner: String = conn
            .query_row("SELECT owner_address FROM name_claims WHERE name = 'CHAT'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(owner, "aa");
    }

    #[test]
    fn test_memory_db_enables_foreign_keys() {
        let conn = start_memory_db().unwrap();
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
