//! Request and query recorders
//!
//! [`RequestRecorder`] opens a pending request record before the handler
//! runs and finalizes it exactly once afterwards. [`QueryRecorder`] writes
//! the tracer's buffer, one independent insert per statement.

use super::tracer::{round_millis, StatementRecord};
use crate::error::ProfilerError;
use crate::metrics;
use crate::storage::{NewQuery, ProfilerDb, RequestMetadata, RequestRecord};
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct RequestRecorder {
    db: Arc<ProfilerDb>,
}

impl RequestRecorder {
    pub fn new(db: Arc<ProfilerDb>) -> Self {
        Self { db }
    }

    /// Persist a pending record with `start_time = now`
    pub async fn begin(&self, meta: &RequestMetadata) -> Result<RequestRecord, ProfilerError> {
        let record = self.db.insert_request(meta, Utc::now()).await?;

        tracing::debug!(
            request_id = record.id,
            method = %record.method,
            path = %record.path,
            "Request record created"
        );
        Ok(record)
    }

    /// Set end time, duration and statement count on a pending record
    ///
    /// Fails with [`ProfilerError::RecordNotFound`] if the record is gone and
    /// [`ProfilerError::AlreadyFinalized`] on a second call. A record without
    /// a start time gets no duration.
    pub async fn finalize(
        &self,
        id: i64,
        statement_count: usize,
    ) -> Result<RequestRecord, ProfilerError> {
        let mut record = self
            .db
            .get_request(id)
            .await?
            .ok_or(ProfilerError::RecordNotFound(id))?;

        if record.is_finalized() {
            return Err(ProfilerError::AlreadyFinalized(id));
        }

        let end_time = Utc::now();
        let time_taken = record
            .start_time
            .filter(|start| *start <= end_time)
            .map(|start| round_millis(end_time - start));
        let total_queries = statement_count as i64;

        let updated = self
            .db
            .finalize_request(id, end_time, time_taken, total_queries)
            .await?;
        if updated == 0 {
            // Lost a race with a concurrent finalize or an external delete.
            return match self.db.get_request(id).await? {
                Some(_) => Err(ProfilerError::AlreadyFinalized(id)),
                None => Err(ProfilerError::RecordNotFound(id)),
            };
        }

        record.end_time = Some(end_time);
        record.time_taken = time_taken;
        record.total_queries = Some(total_queries);

        tracing::debug!(
            request_id = id,
            time_taken = ?time_taken,
            total_queries = total_queries,
            "Request record finalized"
        );
        Ok(record)
    }
}

#[derive(Clone)]
pub struct QueryRecorder {
    db: Arc<ProfilerDb>,
}

impl QueryRecorder {
    pub fn new(db: Arc<ProfilerDb>) -> Self {
        Self { db }
    }

    /// Persist `statements` in buffer order, returning how many were written
    ///
    /// Each insert stands alone: a failed insert is logged and skipped and
    /// earlier inserts are kept.
    pub async fn persist(&self, request_id: i64, statements: &[StatementRecord]) -> usize {
        let mut persisted = 0;

        for statement in statements {
            let query = NewQuery {
                request_id,
                query: statement.text.clone(),
                time_taken: statement.duration_ms(),
                traceback: statement.stack.clone(),
            };

            match self.db.insert_query(&query).await {
                Ok(_) => {
                    persisted += 1;
                    metrics::record_statement(query.time_taken);
                }
                Err(e) => {
                    metrics::record_persist_error("query");
                    tracing::warn!(
                        error = %e,
                        request_id = request_id,
                        "Failed to persist query record"
                    );
                }
            }
        }

        persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn create_test_db() -> Arc<ProfilerDb> {
        Arc::new(ProfilerDb::connect("sqlite::memory:", 1).await.unwrap())
    }

    fn metadata() -> RequestMetadata {
        RequestMetadata {
            method: "GET".to_string(),
            path: "/items".to_string(),
            headers: json!({}),
            ..Default::default()
        }
    }

    fn statement(text: &str, micros: i64) -> StatementRecord {
        let start_time = Utc::now();
        StatementRecord {
            start_time,
            end_time: start_time + chrono::Duration::microseconds(micros),
            text: text.to_string(),
            stack: "   0: app::handler\n".to_string(),
        }
    }

    #[tokio::test]
    async fn test_begin_then_finalize() {
        let db = create_test_db().await;
        let recorder = RequestRecorder::new(db.clone());

        let record = recorder.begin(&metadata()).await.unwrap();
        assert!(record.start_time.is_some());
        assert!(record.end_time.is_none());
        assert!(record.total_queries.is_none());

        let finalized = recorder.finalize(record.id, 0).await.unwrap();
        assert_eq!(finalized.total_queries, Some(0));
        assert!(finalized.end_time.unwrap() >= finalized.start_time.unwrap());
        assert!(finalized.time_taken.unwrap() >= 0.0);

        let stored = db.get_request(record.id).await.unwrap().unwrap();
        assert_eq!(stored, finalized);
    }

    #[tokio::test]
    async fn test_finalize_twice_is_rejected() {
        let db = create_test_db().await;
        let recorder = RequestRecorder::new(db);

        let record = recorder.begin(&metadata()).await.unwrap();
        recorder.finalize(record.id, 1).await.unwrap();

        let err = recorder.finalize(record.id, 3).await.unwrap_err();
        assert!(matches!(err, ProfilerError::AlreadyFinalized(id) if id == record.id));
    }

    #[tokio::test]
    async fn test_finalize_missing_record() {
        let db = create_test_db().await;
        let recorder = RequestRecorder::new(db.clone());

        let record = recorder.begin(&metadata()).await.unwrap();
        db.clear_all().await.unwrap();

        let err = recorder.finalize(record.id, 0).await.unwrap_err();
        assert!(matches!(err, ProfilerError::RecordNotFound(_)));
        assert!(!err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_persist_in_order_with_rounded_durations() {
        let db = create_test_db().await;
        let record = RequestRecorder::new(db.clone()).begin(&metadata()).await.unwrap();

        let statements = vec![statement("SELECT 1", 1_500), statement("SELECT 2", 2)];
        let persisted = QueryRecorder::new(db.clone())
            .persist(record.id, &statements)
            .await;
        assert_eq!(persisted, 2);

        let queries = db.queries_for_request(record.id).await.unwrap();
        assert_eq!(queries[0].query, "SELECT 1");
        assert_eq!(queries[0].time_taken, 1.5);
        assert_eq!(queries[1].query, "SELECT 2");
        assert_eq!(queries[1].time_taken, 0.002);
        assert_eq!(queries[1].traceback, "   0: app::handler\n");
    }

    #[tokio::test]
    async fn test_persist_skips_failures() {
        let db = create_test_db().await;

        // No owning request row: every insert violates the foreign key.
        let persisted = QueryRecorder::new(db.clone())
            .persist(4242, &[statement("SELECT 1", 10)])
            .await;
        assert_eq!(persisted, 0);
        assert_eq!(db.stats().await.unwrap().query_count, 0);
    }
}
