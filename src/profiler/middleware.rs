//! Profiling middleware
//!
//! Per request: Idle → Capturing → Finalizing → Idle. Excluded paths go
//! straight to the handler. Profiled requests get a pending request record
//! and a fresh tracer; the handler runs inside the tracer's scope, and the
//! tracer is detached and its buffer recorded however the handler exits.

use super::body::{buffer_body, render_body, render_headers, RenderedBody};
use super::tracer::{StatementRecord, StatementTracer};
use super::Profiler;
use crate::engine::{with_scope, ScopeId};
use crate::metrics;
use crate::error::ProfilerError;
use crate::storage::{RequestMetadata, RequestRecord};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Profiling middleware
///
/// Install with `axum::middleware::from_fn_with_state(profiler, profile_middleware)`.
pub async fn profile_middleware(
    State(profiler): State<Arc<Profiler>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if !profiler.should_profile(&path) {
        return next.run(req).await;
    }

    let settings = profiler.settings();

    // Read the body once and replay the same bytes downstream. Bodies over
    // the capture limit still reach the handler in full, unrecorded.
    let (parts, body) = req.into_parts();
    let buffered = buffer_body(body, settings.max_body_bytes).await;
    let rendered = match &buffered.captured {
        Some(bytes) => render_body(&parts.headers, bytes).await,
        None => RenderedBody::default(),
    };
    let meta = RequestMetadata {
        method: parts.method.to_string(),
        path: path.clone(),
        query_params: parts.uri.query().unwrap_or_default().to_string(),
        headers: render_headers(&parts.headers, &settings.redact_headers),
        raw_body: rendered.raw,
        body: rendered.rendered,
    };
    let req = Request::from_parts(parts, buffered.replay);

    let method = meta.method.clone();
    let record = match begin_record(profiler.clone(), meta).await {
        Ok(record) => record,
        Err(e) => {
            metrics::record_persist_error("request");
            tracing::warn!(path = %path, error = %e, "Failed to create request record, not profiling");
            return next.run(req).await;
        }
    };
    metrics::record_profiled_request(&method);

    let scope = ScopeId::next();
    let tracer = StatementTracer::new(scope, settings.stack_policy);
    if let Err(e) = tracer.attach(profiler.engine()) {
        tracing::error!(request_id = record.id, error = %e, "Statement tracer lifecycle violation");
    }
    let guard = CaptureGuard {
        profiler: profiler.clone(),
        request_id: record.id,
        tracer: Some(tracer),
    };

    let outcome = with_scope(scope, AssertUnwindSafe(next.run(req)).catch_unwind()).await;

    guard.finish().await;

    match outcome {
        Ok(response) => response,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Insert the pending request record on its own task
///
/// If the request future is dropped before the insert settles, the task
/// finalizes the record it created with no statements.
async fn begin_record(
    profiler: Arc<Profiler>,
    meta: RequestMetadata,
) -> Result<RequestRecord, ProfilerError> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let result = profiler.requests.begin(&meta).await;
        if let Err(Ok(record)) = tx.send(result) {
            tracing::warn!(request_id = record.id, "Request cancelled while creating its record");
            record_capture(profiler, record.id, Vec::new()).await;
        }
    });

    rx.await
        .map_err(|_| ProfilerError::Task("request record insert was dropped".to_string()))?
}

/// Owns the attached tracer for the duration of the handler
///
/// `finish` records normally; dropping an unfinished guard (the request
/// future was cancelled) detaches immediately and records on a spawned task.
struct CaptureGuard {
    profiler: Arc<Profiler>,
    request_id: i64,
    tracer: Option<StatementTracer>,
}

impl CaptureGuard {
    async fn finish(mut self) {
        let Some(tracer) = self.tracer.take() else {
            return;
        };
        let records = detach_and_collect(self.request_id, tracer);

        // Spawned so the bookkeeping completes even if this future is dropped.
        let task = tokio::spawn(record_capture(
            self.profiler.clone(),
            self.request_id,
            records,
        ));
        if let Err(e) = task.await {
            tracing::error!(request_id = self.request_id, error = %e, "Profiling bookkeeping task failed");
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let Some(tracer) = self.tracer.take() else {
            return;
        };

        tracing::warn!(request_id = self.request_id, "Request cancelled while profiling");
        let records = detach_and_collect(self.request_id, tracer);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(record_capture(self.profiler.clone(), self.request_id, records));
            }
            Err(_) => {
                tracing::error!(
                    request_id = self.request_id,
                    "No runtime available, request record left unfinalized"
                );
            }
        }
    }
}

fn detach_and_collect(request_id: i64, tracer: StatementTracer) -> Vec<StatementRecord> {
    if let Err(e) = tracer.detach() {
        tracing::error!(request_id = request_id, error = %e, "Statement tracer lifecycle violation");
    }
    tracer.records()
}

/// Persist the buffered statements, then finalize the request record
async fn record_capture(profiler: Arc<Profiler>, request_id: i64, records: Vec<StatementRecord>) {
    let persisted = profiler.queries.persist(request_id, &records).await;

    match profiler.requests.finalize(request_id, persisted).await {
        Ok(record) => {
            tracing::info!(
                request_id = request_id,
                method = %record.method,
                path = %record.path,
                statements = persisted,
                time_taken_ms = ?record.time_taken,
                "Request profiled"
            );
        }
        Err(e) if e.is_contract_violation() => {
            tracing::error!(request_id = request_id, error = %e, "Request finalization lifecycle violation");
        }
        Err(e) => {
            metrics::record_persist_error("request");
            tracing::warn!(request_id = request_id, error = %e, "Failed to finalize request record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::profiler::{ExclusionRules, ProfilerSettings};
    use crate::storage::ProfilerDb;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn create_test_profiler() -> Arc<Profiler> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = ProfilerDb::connect("sqlite::memory:", 1).await.unwrap();
        Arc::new(Profiler::new(
            Arc::new(Engine::new(pool)),
            Arc::new(db),
            ExclusionRules::default(),
            ProfilerSettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_begin_record_returns_pending_record() {
        let profiler = create_test_profiler().await;
        let meta = RequestMetadata {
            method: "GET".to_string(),
            path: "/items".to_string(),
            headers: json!({}),
            ..Default::default()
        };

        let record = begin_record(profiler.clone(), meta).await.unwrap();
        assert!(!record.is_finalized());
    }

    #[tokio::test]
    async fn test_record_finalized_when_cancelled_during_begin() {
        let profiler = create_test_profiler().await;
        let meta = RequestMetadata {
            method: "GET".to_string(),
            path: "/slow".to_string(),
            headers: json!({}),
            ..Default::default()
        };

        // Poll once so the insert task is spawned, then drop the waiter.
        let mut waiting = Box::pin(begin_record(profiler.clone(), meta));
        assert!(futures::poll!(&mut waiting).is_pending());
        drop(waiting);

        let mut finalized = None;
        for _ in 0..50 {
            let page = profiler.db().list_requests(1, 10).await.unwrap();
            if let Some(record) = page.requests.into_iter().find(|r| r.is_finalized()) {
                finalized = Some(record);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let record = finalized.expect("request record was never finalized");
        assert_eq!(record.path, "/slow");
        assert_eq!(record.total_queries, Some(0));
    }
}
