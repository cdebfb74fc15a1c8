//! Local name claims
//!
//! Binds a friendly name to the address of the node that claimed it. Claims
//! are local only: two peers may each hold a claim for the same name and
//! each resolves its own. First local claim wins.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::codec::{is_valid, sanitize, CodecError};
use crate::data::clock::Clock;

/// A locally recorded name claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameClaim {
    pub name: String,
    pub owner_address: String,
    pub claimed_at: i64,
}

/// Outcome of a claim attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The name is now bound to the requested owner (new or repeated claim)
    Claimed(NameClaim),
    /// Another owner already holds the name; the existing claim is returned
    AlreadyClaimed(NameClaim),
}

impl ClaimOutcome {
    pub fn claim(&self) -> &NameClaim {
        match self {
            ClaimOutcome::Claimed(c) | ClaimOutcome::AlreadyClaimed(c) => c,
        }
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }
}

/// Errors from the claim registry
#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    #[error(transparent)]
    Invalid(#[from] CodecError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Sanitize and validate a raw name
pub fn canonical_name(raw: &str) -> Result<String, CodecError> {
    let name = sanitize(raw);
    if name.is_empty() {
        return Err(CodecError::EmptyName(raw.to_string()));
    }
    if !is_valid(&name) {
        return Err(CodecError::InvalidName(raw.to_string()));
    }
    Ok(name)
}

fn parse_claim_row(row: &rusqlite::Row) -> rusqlite::Result<NameClaim> {
    Ok(NameClaim {
        name: row.get(0)?,
        owner_address: row.get(1)?,
        claimed_at: row.get(2)?,
    })
}

/// Get the claim for a canonical name
pub fn get_claim(conn: &Connection, name: &str) -> rusqlite::Result<Option<NameClaim>> {
    conn.query_row(
        "SELECT name, owner_address, claimed_at FROM name_claims WHERE name = ?1",
        [name],
        parse_claim_row,
    )
    .optional()
}

/// Insert a claim unless the name is taken. Returns the stored claim and
/// whether this call created it.
pub fn insert_claim(
    conn: &Connection,
    name: &str,
    owner_address: &str,
    now: i64,
) -> rusqlite::Result<(NameClaim, bool)> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO name_claims (name, owner_address, claimed_at) VALUES (?1, ?2, ?3)",
        params![name, owner_address, now],
    )?;
    let claim = get_claim(conn, name)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
    Ok((claim, inserted > 0))
}

/// All claims, sorted by name
pub fn list_claims(conn: &Connection) -> rusqlite::Result<Vec<NameClaim>> {
    let mut stmt =
        conn.prepare("SELECT name, owner_address, claimed_at FROM name_claims ORDER BY name")?;
    let claims = stmt
        .query_map([], parse_claim_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(claims)
}

/// Async access to the claim table
#[derive(Clone)]
pub struct NameRegistry {
    db: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for NameRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameRegistry").finish_non_exhaustive()
    }
}

impl NameRegistry {
    pub fn new(db: Arc<Mutex<Connection>>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Claim `raw` (sanitized first) for `owner_address`.
    ///
    /// Re-claiming by the same owner is idempotent.
    pub async fn register_name(
        &self,
        raw: &str,
        owner_address: &str,
    ) -> Result<ClaimOutcome, NamingError> {
        let name = canonical_name(raw)?;
        let now = self.clock.now_millis();
        let db = self.db.lock().await;
        let (claim, inserted) = insert_claim(&db, &name, owner_address, now)?;

        if inserted {
            info!(name = %claim.name, owner = %claim.owner_address, "claimed name");
            Ok(ClaimOutcome::Claimed(claim))
        } else if claim.owner_address == owner_address {
            Ok(ClaimOutcome::Claimed(claim))
        } else {
            debug!(name = %claim.name, owner = %claim.owner_address, "name already claimed");
            Ok(ClaimOutcome::AlreadyClaimed(claim))
        }
    }

    /// Local claim for `raw`, if any
    pub async fn lookup_name(&self, raw: &str) -> Result<Option<NameClaim>, NamingError> {
        let name = canonical_name(raw)?;
        let db = self.db.lock().await;
        Ok(get_claim(&db, &name)?)
    }

    pub async fn list(&self) -> Result<Vec<NameClaim>, NamingError> {
        let db = self.db.lock().await;
        Ok(list_claims(&db)?)
    }
}
