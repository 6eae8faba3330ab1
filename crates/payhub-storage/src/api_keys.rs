//! Lookup side of the `api_keys` table (spec.md section 3's `ApiKey`
//! entity). The core only ever consumes a resolved `merchant_id`
//! attribution string; everything else about key issuance and permission
//! checks belongs to the external authentication collaborator (spec.md
//! section 1's "API-key authentication" Non-goal). This module exists so
//! that collaborator — here, `payhub-api`'s development stand-in — has a
//! real table to resolve against instead of an in-memory map.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::StorageError;
use crate::Storage;

#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRow {
    pub id: Uuid,
    pub merchant_id: String,
    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Storage {
    /// Looks up the `api_keys` row by its stored hash (already computed
    /// with `payhub_crypto::hash_api_key`). Returns `None` for an unknown
    /// hash; an inactive key is still returned so the caller can
    /// distinguish "no such key" (401) from "key disabled" (403).
    pub async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRow>, StorageError> {
        self.note(
            sqlx::query_as::<_, ApiKeyRow>(
                "SELECT id, merchant_id, active, last_used_at FROM api_keys WHERE key_hash = $1",
            )
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await,
        )
    }

    pub async fn touch_api_key_last_used(&self, id: Uuid) -> Result<(), StorageError> {
        self.note(
            sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await,
        )?;
        Ok(())
    }
}
