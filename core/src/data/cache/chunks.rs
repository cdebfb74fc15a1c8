//! Content-addressed chunk store
//!
//! # Tables
//!
//! - `cached_chunks`: chunk bytes keyed by BLAKE3 hash, with access stats
//! - `chunk_owners`: reverse index hash -> app IDs referencing the chunk
//!
//! A chunk is deleted once its owner set becomes empty. Owner rows cascade
//! when a chunk is evicted directly.

use rusqlite::{params, Connection, OptionalExtension};

use crate::bundle::ContentHash;

/// Chunk bytes plus bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedChunk {
    pub hash: ContentHash,
    pub data: Vec<u8>,
    /// App that first brought the chunk in
    pub owner_app_id: String,
    pub cached_at: i64,
    pub access_count: u64,
    pub last_accessed: i64,
}

/// Eviction candidate as (hash, size)
pub type ChunkSize = (ContentHash, u64);

pub(crate) fn parse_hash(vec: &[u8], column: usize) -> rusqlite::Result<ContentHash> {
    <[u8; 32]>::try_from(vec).map(ContentHash).map_err(|_| {
        rusqlite::Error::InvalidColumnType(column, "hash".to_string(), rusqlite::types::Type::Blob)
    })
}

fn size_to_sql(size: usize) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Store chunk bytes (if absent) and record `owner_app_id` as an owner
pub fn insert_chunk(
    conn: &Connection,
    hash: &ContentHash,
    data: &[u8],
    owner_app_id: &str,
    now: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO cached_chunks
            (hash, data, size, owner_app_id, cached_at, access_count, last_accessed)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?5)",
        params![hash.as_bytes().as_slice(), data, size_to_sql(data.len()), owner_app_id, now],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO chunk_owners (hash, app_id) VALUES (?1, ?2)",
        params![hash.as_bytes().as_slice(), owner_app_id],
    )?;
    Ok(())
}

/// Fetch a chunk and count the access
pub fn get_chunk_and_touch(
    conn: &Connection,
    hash: &ContentHash,
    now: i64,
) -> rusqlite::Result<Option<CachedChunk>> {
    let updated = conn.execute(
        "UPDATE cached_chunks SET access_count = access_count + 1, last_accessed = ?2
         WHERE hash = ?1",
        params![hash.as_bytes().as_slice(), now],
    )?;
    if updated == 0 {
        return Ok(None);
    }

    conn.query_row(
        "SELECT hash, data, owner_app_id, cached_at, access_count, last_accessed
         FROM cached_chunks WHERE hash = ?1",
        [hash.as_bytes().as_slice()],
        |row| {
            let hash_vec: Vec<u8> = row.get(0)?;
            Ok(CachedChunk {
                hash: parse_hash(&hash_vec, 0)?,
                data: row.get(1)?,
                owner_app_id: row.get(2)?,
                cached_at: row.get(3)?,
                access_count: row.get(4)?,
                last_accessed: row.get(5)?,
            })
        },
    )
    .optional()
}

/// Check presence without touching access stats
pub fn has_chunk(conn: &Connection, hash: &ContentHash) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM cached_chunks WHERE hash = ?1",
            [hash.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Delete a chunk outright (owner rows cascade)
pub fn delete_chunk(conn: &Connection, hash: &ContentHash) -> rusqlite::Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM cached_chunks WHERE hash = ?1",
        [hash.as_bytes().as_slice()],
    )?;
    Ok(deleted > 0)
}

/// Delete chunks that no app references any more
pub fn delete_orphan_chunks(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM cached_chunks
         WHERE NOT EXISTS (SELECT 1 FROM chunk_owners o WHERE o.hash = cached_chunks.hash)",
        [],
    )
}

/// Make `app_id` own exactly the cached chunks among `hashes`, then drop
/// chunks left without owners. Returns the number of chunks deleted.
pub fn rebind_owners(
    conn: &Connection,
    app_id: &str,
    hashes: &[ContentHash],
) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM chunk_owners WHERE app_id = ?1", [app_id])?;

    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO chunk_owners (hash, app_id)
         SELECT hash, ?2 FROM cached_chunks WHERE hash = ?1",
    )?;
    for hash in hashes {
        stmt.execute(params![hash.as_bytes().as_slice(), app_id])?;
    }

    delete_orphan_chunks(conn)
}

/// Remove `app_id` from every owner set and delete chunks it was the last
/// owner of. Returns the number of chunks deleted.
pub fn release_app_chunks(conn: &Connection, app_id: &str) -> rusqlite::Result<usize> {
    rebind_owners(conn, app_id, &[])
}

/// App IDs that reference a chunk
pub fn owners_of(conn: &Connection, hash: &ContentHash) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT app_id FROM chunk_owners WHERE hash = ?1 ORDER BY app_id")?;
    let owners = stmt
        .query_map([hash.as_bytes().as_slice()], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(owners)
}

/// Chunks in eviction order: least recently accessed first, then least
/// accessed
pub fn eviction_order(conn: &Connection) -> rusqlite::Result<Vec<ChunkSize>> {
    let mut stmt = conn.prepare(
        "SELECT hash, size FROM cached_chunks
         ORDER BY last_accessed ASC, access_count ASC, cached_at ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let hash_vec: Vec<u8> = row.get(0)?;
            Ok((parse_hash(&hash_vec, 0)?, row.get(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Number of chunks and their total size in bytes
pub fn chunk_totals(conn: &Connection) -> rusqlite::Result<(u64, u64)> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM cached_chunks",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}
