//! [`TemplateStore`] backed by the `sql_templates` PostgreSQL table.
//!
//! The scheduler only reads templates and stamps `last_execution`; template
//! CRUD lives elsewhere.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use tilecast_core::{StoreError, TemplateDescriptor, TemplateId, TemplateInfo};
use tilecast_live::TemplateStore;

#[derive(Debug, sqlx::FromRow)]
struct TemplateRow {
    id: i64,
    name: String,
    description: Option<String>,
    query: String,
    widget_type: Option<String>,
    refresh_rate: i32,
    last_execution: Option<DateTime<Utc>>,
}

impl From<TemplateRow> for TemplateDescriptor {
    fn from(row: TemplateRow) -> Self {
        let interval = i64::from(row.refresh_rate);
        TemplateDescriptor {
            id: row.id,
            query: row.query,
            refresh_interval_secs: interval,
            last_executed_at: row.last_execution,
            info: TemplateInfo {
                name: row.name,
                description: row.description,
                refresh_rate: interval,
                widget_type: row.widget_type,
            },
        }
    }
}

/// Connection failures put the scheduler into backoff; anything else is a
/// failed statement.
fn map_db_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        other => StoreError::Query(other.to_string()),
    }
}

pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn list_schedulable(&self) -> Result<Vec<TemplateDescriptor>, StoreError> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            "SELECT id, name, description, query, widget_type, refresh_rate, last_execution
             FROM sql_templates
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(rows.into_iter().map(TemplateDescriptor::from).collect())
    }

    async fn record_execution(&self, template_id: TemplateId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sql_templates SET last_execution = $2 WHERE id = $1")
            .bind(template_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(template_id));
        }
        Ok(())
    }
}
