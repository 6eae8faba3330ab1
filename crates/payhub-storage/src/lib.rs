//! # PayHub Storage
//!
//! The persistence adapter (spec.md section 4.3): parameterized queries
//! over a bounded Postgres pool, transactional scopes, and advisory-locked
//! transactional scopes keyed by an arbitrary string. Every other service
//! crate depends on [`Storage`] rather than talking to `sqlx` directly.

pub mod advisory_lock;
pub mod error;
pub mod pool;

mod api_keys;
mod audit;
mod idempotency;
mod payments;
mod refunds;
mod webhooks;

use std::sync::Arc;

use sqlx::PgPool;

pub use api_keys::ApiKeyRow;
pub use audit::NewAuditLog;
pub use error::StorageError;
pub use payments::{status_str, Pagination};
pub use pool::{ConnectionMonitor, PoolConfig};

/// The persistence adapter. Cheap to clone (wraps a pooled `PgPool` and an
/// `Arc<ConnectionMonitor>`); every task handling a request clones its own
/// handle rather than sharing a `&Storage`.
#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
    monitor: Arc<ConnectionMonitor>,
}

impl Storage {
    pub fn new(pool: PgPool, monitor: Arc<ConnectionMonitor>) -> Self {
        Self { pool, monitor }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Classifies `result`'s error (if any) and feeds the connection-error
    /// monitor so a sustained outage escalates to shutdown (spec.md 4.3).
    fn note<T>(&self, result: Result<T, sqlx::Error>) -> Result<T, StorageError> {
        match result {
            Ok(v) => {
                self.monitor.record_success();
                Ok(v)
            }
            Err(e) => {
                if is_connection_error(&e) {
                    self.monitor.record_error();
                }
                Err(StorageError::Database(e))
            }
        }
    }
}

fn is_connection_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}
