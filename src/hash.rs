//! bcrypt helpers.
//!
//! The encoded bcrypt string (`$2b$<cost>$<salt+digest>`) carries the cost it
//! was produced with, so the store can tell whether an entry is weaker than the
//! current target without any side table.

use crate::error::{Error, Result};
use bcrypt::HashParts;

/// Lowest cost bcrypt accepts.
pub const MIN_COST: u32 = 4;

/// Highest cost bcrypt accepts.
pub const MAX_COST: u32 = 31;

pub use bcrypt::DEFAULT_COST;

#[must_use]
pub const fn is_valid_cost(cost: u32) -> bool {
    cost >= MIN_COST && cost <= MAX_COST
}

/// Hash `password` with a fresh salt at `cost`.
///
/// # Errors
/// Returns `Error::Hashing` if the cost is out of range or salt generation fails.
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    Ok(bcrypt::hash(password, cost)?)
}

/// Check `password` against an encoded hash.
///
/// # Errors
/// Returns `Error::InvalidHash` if `hash` is not a bcrypt string.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    bcrypt::verify(password, hash).map_err(|_| Error::InvalidHash)
}

/// Recover the cost factor embedded in an encoded hash.
///
/// # Errors
/// Returns `Error::InvalidHash` if the cost cannot be decoded or is out of range.
pub fn hash_cost(hash: &str) -> Result<u32> {
    let parts: HashParts = hash.parse().map_err(|_| Error::InvalidHash)?;
    let cost = parts.get_cost();
    if is_valid_cost(cost) {
        Ok(cost)
    } else {
        Err(Error::InvalidHash)
    }
}
