//! [`QueryExecutor`] that runs template SQL on PostgreSQL and returns the
//! rows as a JSON array.

use async_trait::async_trait;
use sqlx::PgPool;

use tilecast_core::ExecutionError;
use tilecast_live::QueryExecutor;

/// Trim whitespace and trailing semicolons so the query can be nested as a
/// subquery.
pub fn strip_sql(query: &str) -> &str {
    query.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// Wrap `query` so the database aggregates at most `max_rows` rows into a
/// single JSON array.
pub fn wrap_query(query: &str, max_rows: u32) -> String {
    format!(
        "SELECT COALESCE(json_agg(t), '[]'::json) FROM (SELECT * FROM ({}) AS q LIMIT {}) AS t",
        strip_sql(query),
        max_rows
    )
}

pub struct PgQueryExecutor {
    pool: PgPool,
    max_rows: u32,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool, max_rows: u32) -> Self {
        Self { pool, max_rows }
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn execute(&self, query: &str) -> Result<serde_json::Value, ExecutionError> {
        if strip_sql(query).is_empty() {
            return Err(ExecutionError::Query("empty query".to_string()));
        }

        let sql = wrap_query(query, self.max_rows);
        sqlx::query_scalar::<_, serde_json::Value>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) => ExecutionError::Query(db.message().to_string()),
                other => ExecutionError::Other(other.to_string()),
            })
    }
}
