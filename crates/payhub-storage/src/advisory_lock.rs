//! Advisory-locked transactional scope keyed by an arbitrary string
//! (spec.md 4.3): hash to a 63-bit integer and take a transaction-scoped
//! Postgres advisory lock (`pg_advisory_xact_lock`), released automatically
//! on commit or rollback.

use std::future::Future;

use sha2::{Digest, Sha256};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::StorageError;

/// Hash an arbitrary string key to a 63-bit signed integer suitable for
/// `pg_advisory_xact_lock(bigint)`. Deterministic across processes (unlike
/// `std::collections::hash_map::DefaultHasher`, which is keyed randomly
/// per-process), since the lock must mean the same thing to every replica.
pub fn hash_lock_key(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (i64::from_be_bytes(bytes)) & 0x7FFF_FFFF_FFFF_FFFF
}

/// Run `f` inside a transaction, committing on `Ok` and rolling back on
/// `Err`.
pub async fn in_transaction<F, Fut, T>(pool: &PgPool, f: F) -> Result<T, StorageError>
where
    F: FnOnce(Transaction<'static, Postgres>) -> Fut,
    Fut: Future<Output = Result<(T, Transaction<'static, Postgres>), StorageError>>,
{
    let tx = pool.begin().await?;
    match f(tx).await {
        Ok((value, tx)) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => Err(e),
    }
}

/// Like [`in_transaction`], but first takes a transaction-scoped advisory
/// lock on `lock_key`. The lock is held for the lifetime of the
/// transaction and released implicitly by the commit/rollback.
pub async fn in_advisory_locked_transaction<F, Fut, T>(
    pool: &PgPool,
    lock_key: &str,
    f: F,
) -> Result<T, StorageError>
where
    F: FnOnce(Transaction<'static, Postgres>) -> Fut,
    Fut: Future<Output = Result<(T, Transaction<'static, Postgres>), StorageError>>,
{
    let mut tx = pool.begin().await?;
    let id = hash_lock_key(lock_key);
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    match f(tx).await {
        Ok((value, tx)) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_fits_63_bits() {
        let a = hash_lock_key("idempotency:abc:merchant_1");
        let b = hash_lock_key("idempotency:abc:merchant_1");
        assert_eq!(a, b);
        assert!(a >= 0);
    }

    #[test]
    fn different_keys_hash_differently() {
        assert_ne!(
            hash_lock_key("idempotency:abc:merchant_1"),
            hash_lock_key("idempotency:abc:merchant_2")
        );
    }
}
