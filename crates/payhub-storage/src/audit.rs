use serde_json::Value as JsonValue;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::StorageError;
use crate::Storage;

pub struct NewAuditLog<'a> {
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub action: &'a str,
    pub old_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
    pub actor: Option<&'a str>,
    pub actor_type: Option<&'a str>,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

impl Storage {
    pub async fn insert_audit_log(&self, entry: NewAuditLog<'_>) -> Result<(), StorageError> {
        self.note(insert(&self.pool, entry).await)
    }

    /// Audit emission from inside a step that already owns a transaction
    /// (spec.md 4.7's saga steps write the audit row in the same
    /// transaction as the state change it describes).
    pub async fn insert_audit_log_tx(
        tx: &mut Transaction<'static, Postgres>,
        entry: NewAuditLog<'_>,
    ) -> Result<(), StorageError> {
        insert(&mut **tx, entry).await.map_err(StorageError::Database)
    }
}

async fn insert<'c, E>(executor: E, entry: NewAuditLog<'_>) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO audit_logs \
         (id, entity_type, entity_id, action, old_value, new_value, actor, actor_type, \
          ip_address, user_agent, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())",
    )
    .bind(Uuid::new_v4())
    .bind(entry.entity_type)
    .bind(entry.entity_id)
    .bind(entry.action)
    .bind(entry.old_value)
    .bind(entry.new_value)
    .bind(entry.actor)
    .bind(entry.actor_type)
    .bind(entry.ip_address)
    .bind(entry.user_agent)
    .execute(executor)
    .await
    .map(|_| ())
}
