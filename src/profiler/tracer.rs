//! Statement tracer
//!
//! A [`StatementTracer`] belongs to exactly one profiling scope. While
//! attached to an [`Engine`] it receives the engine's execution hooks,
//! ignores every statement issued outside its scope, and buffers one
//! [`StatementRecord`] per statement its scope completes.

use super::stack::{self, StackPolicy};
use crate::engine::{
    Engine, ExecutionContext, ExecutionListener, ExecutionOutcome, ListenerId, ScopeId, Statement,
};
use crate::error::ProfilerError;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One captured statement, buffered until the request completes
#[derive(Debug, Clone, PartialEq)]
pub struct StatementRecord {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Rendered SQL, or the statement's native text when rendering is unsupported
    pub text: String,
    pub stack: String,
}

impl StatementRecord {
    /// `end - start` in milliseconds, rounded to 3 decimals
    pub fn duration_ms(&self) -> f64 {
        round_millis(self.end_time - self.start_time)
    }
}

/// Milliseconds rounded to 3 decimal places; negative spans clamp to zero
pub fn round_millis(elapsed: chrono::Duration) -> f64 {
    let nanos = elapsed
        .num_nanoseconds()
        .unwrap_or_else(|| elapsed.num_microseconds().unwrap_or(i64::MAX).saturating_mul(1000));
    let millis = (nanos.max(0) as f64 / 1_000.0).round() / 1_000.0;
    millis.max(0.0)
}

/// Hook pair installed on the engine while attached
struct TracerHooks {
    scope: ScopeId,
    policy: StackPolicy,
    records: Mutex<Vec<StatementRecord>>,
}

impl TracerHooks {
    fn records(&self) -> MutexGuard<'_, Vec<StatementRecord>> {
        // A panicking hook leaves the buffer itself intact.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn owns(&self, ctx: &ExecutionContext) -> bool {
        ctx.scope() == Some(self.scope)
    }
}

impl ExecutionListener for TracerHooks {
    fn before_execute(&self, ctx: &ExecutionContext, _statement: &Statement) {
        if self.owns(ctx) {
            ctx.mark_started(Utc::now());
        }
    }

    fn after_execute(
        &self,
        ctx: &ExecutionContext,
        statement: &Statement,
        outcome: &ExecutionOutcome,
    ) {
        if !self.owns(ctx) {
            return;
        }

        let now = Utc::now();
        let start_time = ctx.started_at().unwrap_or(now);
        let end_time = now.max(start_time);

        let text = match statement.compile(ctx.dialect()) {
            Ok(compiled) => compiled.sql,
            Err(_) => statement.to_string(),
        };

        if let ExecutionOutcome::Failed(error) = outcome {
            tracing::debug!(scope = %self.scope, error = %error, "Captured failed statement");
        }

        let record = StatementRecord {
            start_time,
            end_time,
            text,
            stack: stack::capture(&self.policy),
        };
        self.records().push(record);
    }
}

struct Attachment {
    engine: Arc<Engine>,
    listener_id: ListenerId,
}

/// Request-scoped statement capture
pub struct StatementTracer {
    hooks: Arc<TracerHooks>,
    attached: AtomicBool,
    attachment: Mutex<Option<Attachment>>,
}

impl StatementTracer {
    pub fn new(scope: ScopeId, policy: StackPolicy) -> Self {
        Self {
            hooks: Arc::new(TracerHooks {
                scope,
                policy,
                records: Mutex::new(Vec::new()),
            }),
            attached: AtomicBool::new(false),
            attachment: Mutex::new(None),
        }
    }

    pub fn scope(&self) -> ScopeId {
        self.hooks.scope
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Install the tracer's hooks on `engine`
    ///
    /// Fails with [`ProfilerError::AlreadyAttached`] if already attached.
    pub fn attach(&self, engine: &Arc<Engine>) -> Result<(), ProfilerError> {
        if self
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProfilerError::AlreadyAttached(self.scope().to_string()));
        }

        let listener_id = engine.listen(self.hooks.clone());
        *self.lock_attachment() = Some(Attachment {
            engine: engine.clone(),
            listener_id,
        });

        tracing::debug!(scope = %self.scope(), "Statement tracer attached");
        Ok(())
    }

    /// Remove the tracer's hooks
    ///
    /// Fails with [`ProfilerError::NotAttached`] if not attached.
    pub fn detach(&self) -> Result<(), ProfilerError> {
        if self
            .attached
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProfilerError::NotAttached(self.scope().to_string()));
        }

        if let Some(attachment) = self.lock_attachment().take() {
            attachment.engine.remove(attachment.listener_id);
        }

        tracing::debug!(
            scope = %self.scope(),
            captured = self.len(),
            "Statement tracer detached"
        );
        Ok(())
    }

    /// Snapshot of the buffer in completion order
    pub fn records(&self) -> Vec<StatementRecord> {
        self.hooks.records().clone()
    }

    pub fn len(&self) -> usize {
        self.hooks.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_attachment(&self) -> MutexGuard<'_, Option<Attachment>> {
        self.attachment
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for StatementTracer {
    fn drop(&mut self) {
        if self.is_attached() {
            tracing::warn!(scope = %self.scope(), "Statement tracer dropped while attached, detaching");
            let _ = self.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::with_scope;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_engine() -> Arc<Engine> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let engine = Engine::new(pool);
        engine
            .execute(&Statement::text("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)"))
            .await
            .unwrap();
        Arc::new(engine)
    }

    #[tokio::test]
    async fn test_attach_twice_fails() {
        let engine = create_test_engine().await;
        let tracer = StatementTracer::new(ScopeId::next(), StackPolicy::default());

        tracer.attach(&engine).unwrap();
        let err = tracer.attach(&engine).unwrap_err();
        assert!(matches!(err, ProfilerError::AlreadyAttached(_)));
        assert_eq!(engine.listener_count(), 1);

        tracer.detach().unwrap();
        assert_eq!(engine.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_detach_when_not_attached_fails() {
        let tracer = StatementTracer::new(ScopeId::next(), StackPolicy::default());
        assert!(matches!(tracer.detach(), Err(ProfilerError::NotAttached(_))));

        let engine = create_test_engine().await;
        tracer.attach(&engine).unwrap();
        tracer.detach().unwrap();
        assert!(matches!(tracer.detach(), Err(ProfilerError::NotAttached(_))));
    }

    #[tokio::test]
    async fn test_captures_only_own_scope() {
        let engine = create_test_engine().await;
        let scope = ScopeId::next();
        let tracer = StatementTracer::new(scope, StackPolicy::default());
        tracer.attach(&engine).unwrap();

        // Outside any scope
        engine
            .execute(&Statement::insert("items").value("name", "outside").into())
            .await
            .unwrap();
        // Another request's scope
        with_scope(ScopeId::next(), async {
            engine
                .execute(&Statement::insert("items").value("name", "other").into())
                .await
                .unwrap();
        })
        .await;
        with_scope(scope, async {
            engine
                .execute(&Statement::insert("items").value("name", "mine").into())
                .await
                .unwrap();
            engine
                .execute(&Statement::text("SELECT count(*) FROM items"))
                .await
                .unwrap();
        })
        .await;

        tracer.detach().unwrap();
        let records = tracer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, r#"INSERT INTO "items" ("name") VALUES (?)"#);
        // Raw text is recorded in its native form
        assert_eq!(records[1].text, "SELECT count(*) FROM items");
        for record in &records {
            assert!(record.end_time >= record.start_time);
            assert!(record.duration_ms() >= 0.0);
        }
    }

    #[tokio::test]
    async fn test_no_capture_after_detach() {
        let engine = create_test_engine().await;
        let scope = ScopeId::next();
        let tracer = StatementTracer::new(scope, StackPolicy::default());
        tracer.attach(&engine).unwrap();
        tracer.detach().unwrap();

        with_scope(scope, async {
            engine.execute(&Statement::text("SELECT 1")).await.unwrap();
        })
        .await;

        assert!(tracer.is_empty());
    }

    #[tokio::test]
    async fn test_drop_detaches() {
        let engine = create_test_engine().await;
        {
            let tracer = StatementTracer::new(ScopeId::next(), StackPolicy::default());
            tracer.attach(&engine).unwrap();
            assert_eq!(engine.listener_count(), 1);
        }
        assert_eq!(engine.listener_count(), 0);
    }

    #[test]
    fn test_round_millis() {
        assert_eq!(round_millis(chrono::Duration::nanoseconds(1_234_567)), 1.235);
        assert_eq!(round_millis(chrono::Duration::milliseconds(250)), 250.0);
        assert_eq!(round_millis(chrono::Duration::nanoseconds(-5)), 0.0);
        assert_eq!(round_millis(chrono::Duration::zero()), 0.0);
    }
}
