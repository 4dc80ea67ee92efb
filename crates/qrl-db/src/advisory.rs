//! Postgres advisory locks for singleton schedules (reconciliation,
//! expiration sweep). The key is derived deterministically from the lock
//! name so every instance computes the same 31-bit key.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};

/// Low 31 bits of SHA-256(name), always non-negative and stable across
/// processes and platforms.
pub fn advisory_key(name: &str) -> i32 {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let raw = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (raw & 0x7FFF_FFFF) as i32
}

/// Try to take the session-scoped advisory lock. `false` means another
/// instance holds it — callers treat that as "not my turn", a no-op.
pub async fn try_lock(pool: &PgPool, name: &str) -> Result<bool> {
    let key = advisory_key(name);
    let row = sqlx::query("select pg_try_advisory_lock($1::int) as locked")
        .bind(key)
        .fetch_one(pool)
        .await
        .context("advisory try_lock failed")?;
    Ok(row.try_get("locked")?)
}

pub async fn unlock(pool: &PgPool, name: &str) -> Result<bool> {
    let key = advisory_key(name);
    let row = sqlx::query("select pg_advisory_unlock($1::int) as unlocked")
        .bind(key)
        .fetch_one(pool)
        .await
        .context("advisory unlock failed")?;
    Ok(row.try_get("unlocked")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic_and_non_negative() {
        let a = advisory_key("reconciliation");
        let b = advisory_key("reconciliation");
        assert_eq!(a, b);
        assert!(a >= 0);
    }

    #[test]
    fn different_names_yield_different_keys() {
        assert_ne!(advisory_key("reconciliation"), advisory_key("expiration_check"));
    }

    #[test]
    fn key_fits_31_bits() {
        for name in ["a", "reconciliation", "expiration_check", "outbox_cleaner"] {
            let key = advisory_key(name);
            assert!(key >= 0 && (key as u32) <= 0x7FFF_FFFF);
        }
    }
}
