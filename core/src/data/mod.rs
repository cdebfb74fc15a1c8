//! Data layer for the Mooring node DB
//!
//! Provides storage and retrieval for:
//! - Local node identity (key pair)
//! - Cached manifests, content-addressed chunks and their owner index
//! - Per-app key/value state
//! - Local friendly-name claims (SQL lives in `naming::claims`)
//!
//! Organized by concern:
//! - `cache/` - apps, chunks and state, plus the async `Cache` facade
//! - `clock` - injectable millisecond clock
//! - `schema`, `start` - table definitions and database startup

pub mod cache;
pub mod clock;
pub mod identity;
pub mod schema;
pub mod start;

pub use cache::{
    Cache, CacheError, CacheStats, CachedApp, CachedChunk, CleanupReport, ClearReport,
    EvictionReport, StateEntry,
};
pub use clock::{current_timestamp_millis, Clock, ManualClock, SystemClock};
pub use identity::{get_identity, get_or_create_identity, LocalIdentity};
pub use schema::create_all_tables;
pub use start::{start_db, start_memory_db, StartError};
