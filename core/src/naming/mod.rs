//! Friendly names
//!
//! - `codec`: bijective name <-> address mapping
//! - `claims`: local first-claim-wins name table

pub mod claims;
pub mod codec;

pub use claims::{ClaimOutcome, NameClaim, NameRegistry, NamingError};
pub use codec::{decode, encode, is_name_form, is_valid, sanitize, strict_name, CodecError};
