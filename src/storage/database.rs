//! SQLite database layer for profiling data
//!
//! This module provides async database operations with:
//! - Connection pooling
//! - Automatic migrations
//! - WAL mode for concurrent reads/writes

use super::models::{
    ClearStats, NewQuery, ProfilerStats, QueryRecord, RequestMetadata, RequestPage, RequestRecord,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

const REQUEST_COLUMNS: &str = "id, method, path, query_params, headers, raw_body, body, \
                               start_time, end_time, time_taken, total_queries";

/// Profiling database handle
///
/// Manages the SQLite connection pool and provides CRUD operations.
pub struct ProfilerDb {
    pool: SqlitePool,
}

impl ProfilerDb {
    /// Create a new database connection with automatic migration
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite database URL (e.g., "sqlite:./data/profiler.db")
    /// * `max_connections` - Pool size
    ///
    /// # Example
    ///
    /// ```ignore
    /// let db = ProfilerDb::connect("sqlite:./data/profiler.db", 5).await?;
    /// ```
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .foreign_keys(true)
            .pragma("synchronous", "NORMAL");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .context("Failed to connect to profiler database")?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .context("Failed to run profiler database migrations")?;

        tracing::info!("Profiler database migrations completed");
        Ok(())
    }

    /// Insert a pending request record (terminal fields left NULL)
    pub async fn insert_request(
        &self,
        meta: &RequestMetadata,
        start_time: DateTime<Utc>,
    ) -> sqlx::Result<RequestRecord> {
        let result = sqlx::query(
            "INSERT INTO middleware_requests (method, path, query_params, headers, raw_body, body, start_time)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&meta.method)
        .bind(&meta.path)
        .bind(&meta.query_params)
        .bind(meta.headers.to_string())
        .bind(&meta.raw_body)
        .bind(&meta.body)
        .bind(start_time)
        .execute(&self.pool)
        .await?;

        Ok(RequestRecord {
            id: result.last_insert_rowid(),
            method: meta.method.clone(),
            path: meta.path.clone(),
            query_params: meta.query_params.clone(),
            headers: meta.headers.clone(),
            raw_body: meta.raw_body.clone(),
            body: meta.body.clone(),
            start_time: Some(start_time),
            end_time: None,
            time_taken: None,
            total_queries: None,
        })
    }

    pub async fn get_request(&self, id: i64) -> sqlx::Result<Option<RequestRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM middleware_requests WHERE id = ?",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(request_from_row))
    }

    /// Set the terminal fields of a pending request
    ///
    /// Only rows whose `end_time` is still NULL are touched; returns the
    /// number of rows updated (0 or 1).
    pub async fn finalize_request(
        &self,
        id: i64,
        end_time: DateTime<Utc>,
        time_taken: Option<f64>,
        total_queries: i64,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query(
            "UPDATE middleware_requests
             SET end_time = ?, time_taken = ?, total_queries = ?
             WHERE id = ? AND end_time IS NULL",
        )
        .bind(end_time)
        .bind(time_taken)
        .bind(total_queries)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn insert_query(&self, query: &NewQuery) -> sqlx::Result<QueryRecord> {
        let result = sqlx::query(
            "INSERT INTO middleware_query (query, time_taken, traceback, request_id)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&query.query)
        .bind(query.time_taken)
        .bind(&query.traceback)
        .bind(query.request_id)
        .execute(&self.pool)
        .await?;

        Ok(QueryRecord {
            id: result.last_insert_rowid(),
            request_id: query.request_id,
            query: query.query.clone(),
            time_taken: query.time_taken,
            traceback: query.traceback.clone(),
        })
    }

    pub async fn get_query(&self, id: i64) -> sqlx::Result<Option<QueryRecord>> {
        let row = sqlx::query(
            "SELECT id, request_id, query, time_taken, traceback FROM middleware_query WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(query_from_row))
    }

    /// Queries of one request in capture order
    pub async fn queries_for_request(&self, request_id: i64) -> sqlx::Result<Vec<QueryRecord>> {
        let rows = sqlx::query(
            "SELECT id, request_id, query, time_taken, traceback
             FROM middleware_query
             WHERE request_id = ?
             ORDER BY id ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(query_from_row).collect())
    }

    /// Sum of statement time for one request, in milliseconds
    pub async fn query_time_total(&self, request_id: i64) -> sqlx::Result<f64> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(time_taken), 0.0) FROM middleware_query WHERE request_id = ?",
        )
        .bind(request_id)
        .fetch_one(&self.pool)
        .await
    }

    /// List request records newest first
    ///
    /// `page` is 1-based; `limit` is clamped to at least 1.
    pub async fn list_requests(&self, page: u32, limit: u32) -> sqlx::Result<RequestPage> {
        let page = page.max(1);
        let limit = limit.max(1);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM middleware_requests")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM middleware_requests ORDER BY id DESC LIMIT ? OFFSET ?",
            REQUEST_COLUMNS
        ))
        .bind(i64::from(limit))
        .bind(i64::from(page - 1) * i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let total = total as u64;
        Ok(RequestPage {
            page,
            limit,
            total,
            total_pages: total.div_ceil(u64::from(limit)),
            requests: rows.iter().map(request_from_row).collect(),
        })
    }

    /// Delete every request and query record
    pub async fn clear_all(&self) -> sqlx::Result<ClearStats> {
        let mut tx = self.pool.begin().await?;

        let queries = sqlx::query("DELETE FROM middleware_query")
            .execute(&mut *tx)
            .await?;
        let requests = sqlx::query("DELETE FROM middleware_requests")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let stats = ClearStats {
            requests_deleted: requests.rows_affected(),
            queries_deleted: queries.rows_affected(),
        };
        tracing::info!(
            requests_deleted = stats.requests_deleted,
            queries_deleted = stats.queries_deleted,
            "Cleared profiling data"
        );

        Ok(stats)
    }

    pub async fn stats(&self) -> sqlx::Result<ProfilerStats> {
        let (request_count, pending_count, avg_time_taken): (i64, i64, Option<f64>) =
            sqlx::query_as(
                "SELECT COUNT(*), COALESCE(SUM(end_time IS NULL), 0), AVG(time_taken)
                 FROM middleware_requests",
            )
            .fetch_one(&self.pool)
            .await?;

        let (query_count, slowest_query): (i64, Option<f64>) =
            sqlx::query_as("SELECT COUNT(*), MAX(time_taken) FROM middleware_query")
                .fetch_one(&self.pool)
                .await?;

        Ok(ProfilerStats {
            request_count: request_count as u64,
            query_count: query_count as u64,
            pending_count: pending_count as u64,
            avg_time_taken,
            slowest_query,
        })
    }

    /// Get the underlying connection pool (for advanced usage)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn request_from_row(row: &SqliteRow) -> RequestRecord {
    let headers: String = row.get("headers");
    RequestRecord {
        id: row.get("id"),
        method: row.get("method"),
        path: row.get("path"),
        query_params: row.get("query_params"),
        headers: serde_json::from_str(&headers)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new())),
        raw_body: row.get("raw_body"),
        body: row.get("body"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        time_taken: row.get("time_taken"),
        total_queries: row.get("total_queries"),
    }
}

fn query_from_row(row: &SqliteRow) -> QueryRecord {
    QueryRecord {
        id: row.get("id"),
        request_id: row.get("request_id"),
        query: row.get::<Option<String>, _>("query").unwrap_or_default(),
        time_taken: row.get::<Option<f64>, _>("time_taken").unwrap_or_default(),
        traceback: row.get::<Option<String>, _>("traceback").unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn create_test_db() -> ProfilerDb {
        ProfilerDb::connect("sqlite::memory:", 1).await.unwrap()
    }

    fn sample_metadata() -> RequestMetadata {
        RequestMetadata {
            method: "POST".to_string(),
            path: "/items".to_string(),
            query_params: "debug=1".to_string(),
            headers: json!({"content-type": "application/json"}),
            raw_body: r#"{"name":"a"}"#.to_string(),
            body: r#"{"name":"a"}"#.to_string(),
        }
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let db = create_test_db().await;
        let start = Utc::now();

        let inserted = db.insert_request(&sample_metadata(), start).await.unwrap();
        let loaded = db.get_request(inserted.id).await.unwrap().unwrap();
        assert_eq!(loaded, inserted);
        assert!(!loaded.is_finalized());

        let end = start + chrono::Duration::microseconds(1_234_567);
        assert_eq!(
            db.finalize_request(inserted.id, end, Some(1234.567), 2).await.unwrap(),
            1
        );

        let loaded = db.get_request(inserted.id).await.unwrap().unwrap();
        assert_eq!(loaded.start_time, Some(start));
        assert_eq!(loaded.end_time, Some(end));
        assert_eq!(loaded.time_taken, Some(1234.567));
        assert_eq!(loaded.total_queries, Some(2));
    }

    #[tokio::test]
    async fn test_finalize_only_once() {
        let db = create_test_db().await;
        let record = db.insert_request(&sample_metadata(), Utc::now()).await.unwrap();

        assert_eq!(db.finalize_request(record.id, Utc::now(), None, 0).await.unwrap(), 1);
        assert_eq!(db.finalize_request(record.id, Utc::now(), None, 5).await.unwrap(), 0);

        let loaded = db.get_request(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.total_queries, Some(0));
    }

    #[tokio::test]
    async fn test_query_round_trip_and_total() {
        let db = create_test_db().await;
        let record = db.insert_request(&sample_metadata(), Utc::now()).await.unwrap();

        for (i, time_taken) in [0.125, 2.5].into_iter().enumerate() {
            db.insert_query(&NewQuery {
                request_id: record.id,
                query: format!("SELECT {}", i),
                time_taken,
                traceback: "   0: app::handler\n".to_string(),
            })
            .await
            .unwrap();
        }

        let queries = db.queries_for_request(record.id).await.unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].query, "SELECT 0");
        assert_eq!(db.get_query(queries[1].id).await.unwrap().unwrap(), queries[1]);
        assert_eq!(db.query_time_total(record.id).await.unwrap(), 2.625);
    }

    #[tokio::test]
    async fn test_query_requires_existing_request() {
        let db = create_test_db().await;
        let result = db
            .insert_query(&NewQuery {
                request_id: 999,
                query: "SELECT 1".to_string(),
                time_taken: 0.0,
                traceback: String::new(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_requests_pagination() {
        let db = create_test_db().await;
        for _ in 0..5 {
            db.insert_request(&sample_metadata(), Utc::now()).await.unwrap();
        }

        let page = db.list_requests(2, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.requests.len(), 2);
        assert_eq!(page.requests[0].id, 3);

        let last = db.list_requests(3, 2).await.unwrap();
        assert_eq!(last.requests.len(), 1);
        assert_eq!(last.requests[0].id, 1);
    }

    #[tokio::test]
    async fn test_clear_all_and_stats() {
        let db = create_test_db().await;
        let record = db.insert_request(&sample_metadata(), Utc::now()).await.unwrap();
        db.insert_query(&NewQuery {
            request_id: record.id,
            query: "SELECT 1".to_string(),
            time_taken: 1.5,
            traceback: String::new(),
        })
        .await
        .unwrap();

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.request_count, 1);
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.query_count, 1);
        assert_eq!(stats.slowest_query, Some(1.5));

        let cleared = db.clear_all().await.unwrap();
        assert_eq!(cleared.requests_deleted, 1);
        assert_eq!(cleared.queries_deleted, 1);
        assert!(db.get_request(record.id).await.unwrap().is_none());
    }
}
