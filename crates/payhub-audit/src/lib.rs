//! # PayHub Audit
//!
//! Append-only entity-change log (spec.md section 3): a typed facade over
//! [`payhub_storage`]'s audit table. Call sites build an [`AuditEntry`] with
//! the entity/action named, and call [`record`] or [`record_tx`] rather
//! than constructing a [`payhub_storage::NewAuditLog`] by hand at every
//! saga step.

use serde_json::Value as JsonValue;
use sqlx::{Postgres, Transaction};

use payhub_storage::{NewAuditLog, Storage, StorageError};

pub mod entity {
    pub const PAYMENT: &str = "payment";
    pub const REFUND: &str = "refund";
    pub const WEBHOOK_EVENT: &str = "webhook_event";
}

pub mod action {
    pub const PAYMENT_CREATED: &str = "payment.created";
    pub const PAYMENT_STATUS_CHANGED: &str = "payment.status_changed";
    pub const REFUND_CREATED: &str = "refund.created";
    pub const REFUND_STATUS_CHANGED: &str = "refund.status_changed";
}

/// A pending audit entry, built incrementally then written with
/// [`record`] (against the pool) or [`record_tx`] (inside an open
/// transaction, so the audit row commits atomically with the state
/// change it describes).
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub entity_type: &'static str,
    pub entity_id: String,
    pub action: &'static str,
    pub old_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
    pub actor: Option<String>,
    pub actor_type: Option<String>,
}

impl AuditEntry {
    pub fn new(entity_type: &'static str, entity_id: impl Into<String>, action: &'static str) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            action,
            old_value: None,
            new_value: None,
            actor: None,
            actor_type: None,
        }
    }

    pub fn with_new_value(mut self, value: JsonValue) -> Self {
        self.new_value = Some(value);
        self
    }

    pub fn with_old_value(mut self, value: JsonValue) -> Self {
        self.old_value = Some(value);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>, actor_type: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self.actor_type = Some(actor_type.into());
        self
    }

    fn into_new_audit_log(&self) -> NewAuditLog<'_> {
        NewAuditLog {
            entity_type: self.entity_type,
            entity_id: &self.entity_id,
            action: self.action,
            old_value: self.old_value.clone(),
            new_value: self.new_value.clone(),
            actor: self.actor.as_deref(),
            actor_type: self.actor_type.as_deref(),
            ip_address: None,
            user_agent: None,
        }
    }
}

pub async fn record(storage: &Storage, entry: &AuditEntry) -> Result<(), StorageError> {
    storage.insert_audit_log(entry.into_new_audit_log()).await
}

pub async fn record_tx(
    tx: &mut Transaction<'static, Postgres>,
    entry: &AuditEntry,
) -> Result<(), StorageError> {
    Storage::insert_audit_log_tx(tx, entry.into_new_audit_log()).await
}
