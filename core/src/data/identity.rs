//! Local node identity
//!
//! The node's deployer key pair is generated on first start and persisted in
//! the `local_node` table. The secret key is zeroed from memory on drop.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::security::create_key_pair::{generate_key_pair, key_pair_from_bytes, KeyPair};

/// Local node identity stored in the database
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalIdentity {
    pub private_key: [u8; 32],
    #[zeroize(skip)]
    pub public_key: [u8; 32],
    #[zeroize(skip)]
    pub created_at: i64,
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("private_key", &"[REDACTED]")
            .field("public_key", &hex::encode(self.public_key))
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl LocalIdentity {
    /// Hex encoded public key (the node's `senderAddress`)
    pub fn address(&self) -> String {
        hex::encode(self.public_key)
    }

    pub fn to_key_pair(&self) -> KeyPair {
        key_pair_from_bytes(&self.private_key)
    }
}

fn parse_key(vec: Vec<u8>, column: usize, name: &str) -> rusqlite::Result<[u8; 32]> {
    <[u8; 32]>::try_from(vec.as_slice()).map_err(|_| {
        rusqlite::Error::InvalidColumnType(column, name.to_string(), rusqlite::types::Type::Blob)
    })
}

/// Load the local identity, creating it on first use
pub fn get_or_create_identity(conn: &Connection, now: i64) -> rusqlite::Result<LocalIdentity> {
    if let Some(identity) = get_identity(conn)? {
        return Ok(identity);
    }

    let key_pair = generate_key_pair();
    match conn.execute(
        "INSERT INTO local_node (id, private_key, public_key, created_at) VALUES (1, ?1, ?2, ?3)",
        params![
            key_pair.private_key.as_slice(),
            key_pair.public_key.as_slice(),
            now
        ],
    ) {
        Ok(_) => {}
        // Another process won the race; load theirs
        Err(rusqlite::Error::SqliteFailure(ref err, _))
            if err.code == ErrorCode::ConstraintViolation => {}
        Err(e) => return Err(e),
    }

    get_identity(conn)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Get the existing identity, if any
pub fn get_identity(conn: &Connection) -> rusqlite::Result<Option<LocalIdentity>> {
    conn.query_row(
        "SELECT private_key, public_key, created_at FROM local_node WHERE id = 1",
        [],
        |row| {
            Ok(LocalIdentity {
                private_key: parse_key(row.get(0)?, 0, "private_key")?,
                public_key: parse_key(row.get(1)?, 1, "public_key")?,
                created_at: row.get(2)?,
            })
        },
    )
    .optional()
}
