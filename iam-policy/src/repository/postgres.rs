//! PostgreSQL-backed binding store
//!
//! Rows live in `iam_policy_bindings`:
//!
//! ```sql
//! CREATE TABLE iam_policy_bindings (
//!     iam_policy_bindings_id BIGSERIAL PRIMARY KEY,
//!     resource      TEXT   NOT NULL,
//!     binding_index BIGINT NOT NULL,
//!     role          TEXT   NOT NULL,
//!     member_index  BIGINT NOT NULL,
//!     member        TEXT   NOT NULL
//! );
//! CREATE INDEX ON iam_policy_bindings (resource, member);
//! ```
//!
//! Writers serialize per resource on a transaction-scoped advisory lock, so
//! a freshness check and the replace that follows it cannot interleave with
//! another writer on the same resource. Readers take no locks and only see
//! committed row sets.

use crate::{
    config::DatabaseConfig,
    error::StoreError,
    models::PolicyBinding,
    repository::{BindingStore, BindingTransaction},
};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Postgres, Row, Transaction,
};
use std::time::Duration;
use tracing::{debug, info};

const SELECT_BINDINGS: &str =
    "SELECT resource, binding_index, role, member_index, member FROM iam_policy_bindings";

/// PostgreSQL-backed binding store
#[derive(Clone)]
pub struct PostgresBindingStore {
    pool: PgPool,
}

impl PostgresBindingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        info!("Binding store connection pool created");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn binding_from_row(row: &PgRow) -> Result<PolicyBinding, StoreError> {
    Ok(PolicyBinding {
        resource: row.try_get("resource")?,
        binding_index: row.try_get("binding_index")?,
        role: row.try_get("role")?,
        member_index: row.try_get("member_index")?,
        member: row.try_get("member")?,
    })
}

fn bindings_from_rows(rows: &[PgRow]) -> Result<Vec<PolicyBinding>, StoreError> {
    rows.iter().map(binding_from_row).collect()
}

#[async_trait]
impl BindingStore for PostgresBindingStore {
    async fn read_own_policy(&self, resource: &str) -> Result<Vec<PolicyBinding>, StoreError> {
        let rows = sqlx::query(&format!("{} WHERE resource = $1", SELECT_BINDINGS))
            .bind(resource)
            .fetch_all(&self.pool)
            .await?;

        debug!("Read {} binding rows for {}", rows.len(), resource);
        bindings_from_rows(&rows)
    }

    async fn read_matching(
        &self,
        resources: &[String],
        members: &[String],
    ) -> Result<Vec<PolicyBinding>, StoreError> {
        let rows = sqlx::query(&format!(
            "{} WHERE resource = ANY($1) AND member = ANY($2)",
            SELECT_BINDINGS
        ))
        .bind(resources.to_vec())
        .bind(members.to_vec())
        .fetch_all(&self.pool)
        .await?;

        debug!(
            "Matched {} binding rows across {} resources",
            rows.len(),
            resources.len()
        );
        bindings_from_rows(&rows)
    }

    async fn begin_exclusive(
        &self,
        resource: &str,
    ) -> Result<Box<dyn BindingTransaction>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("Failed to start transaction: {}", e)))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(resource)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("Failed to lock resource: {}", e)))?;

        Ok(Box::new(PostgresBindingTransaction { tx }))
    }
}

/// Write transaction holding the resource's advisory lock until it ends
pub struct PostgresBindingTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BindingTransaction for PostgresBindingTransaction {
    async fn read_own_policy(&mut self, resource: &str) -> Result<Vec<PolicyBinding>, StoreError> {
        let rows = sqlx::query(&format!("{} WHERE resource = $1", SELECT_BINDINGS))
            .bind(resource)
            .fetch_all(&mut *self.tx)
            .await?;

        bindings_from_rows(&rows)
    }

    async fn replace_all(
        &mut self,
        resource: &str,
        rows: &[PolicyBinding],
    ) -> Result<(), StoreError> {
        if let Some(row) = rows.iter().find(|row| row.resource != resource) {
            return Err(StoreError::InvalidRow(format!(
                "row for '{}' written to '{}'",
                row.resource, resource
            )));
        }

        let deleted = sqlx::query("DELETE FROM iam_policy_bindings WHERE resource = $1")
            .bind(resource)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();

        if !rows.is_empty() {
            let binding_indexes: Vec<i64> = rows.iter().map(|r| r.binding_index).collect();
            let roles: Vec<String> = rows.iter().map(|r| r.role.clone()).collect();
            let member_indexes: Vec<i64> = rows.iter().map(|r| r.member_index).collect();
            let members: Vec<String> = rows.iter().map(|r| r.member.clone()).collect();

            sqlx::query(
                r#"
                INSERT INTO iam_policy_bindings (
                    resource, binding_index, role, member_index, member
                )
                SELECT $1, binding_index, role, member_index, member
                FROM UNNEST($2::BIGINT[], $3::TEXT[], $4::BIGINT[], $5::TEXT[])
                    AS t(binding_index, role, member_index, member)
                "#,
            )
            .bind(resource)
            .bind(binding_indexes)
            .bind(roles)
            .bind(member_indexes)
            .bind(members)
            .execute(&mut *self.tx)
            .await?;
        }

        debug!(
            "Replaced {} binding rows with {} on {}",
            deleted,
            rows.len(),
            resource
        );
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("Failed to commit transaction: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("Failed to roll back transaction: {}", e)))
    }
}
