//! Instrumented database engine
//!
//! [`Engine`] wraps an sqlx SQLite pool and dispatches paired
//! before/after execution hooks to every registered [`ExecutionListener`].
//! Each execution carries its own [`ExecutionContext`], tagged with the
//! profiling scope of the task that issued it, so listeners can tell
//! which request a statement belongs to even when many requests share
//! the engine.

pub mod scope;
pub mod statement;

pub use scope::{current_scope, in_current_scope, with_scope, ScopeId};
pub use statement::{CompileError, CompiledStatement, Dialect, Statement, Value};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteQueryResult, SqliteRow,
};
use sqlx::Sqlite;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Handle returned by [`Engine::listen`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Per-execution state shared by the before and after hooks
#[derive(Debug)]
pub struct ExecutionContext {
    execution_id: u64,
    scope: Option<ScopeId>,
    dialect: Dialect,
    started_at: OnceLock<DateTime<Utc>>,
}

impl ExecutionContext {
    fn new(execution_id: u64, scope: Option<ScopeId>, dialect: Dialect) -> Self {
        Self {
            execution_id,
            scope,
            dialect,
            started_at: OnceLock::new(),
        }
    }

    pub fn execution_id(&self) -> u64 {
        self.execution_id
    }

    /// Profiling scope of the task that issued the statement
    pub fn scope(&self) -> Option<ScopeId> {
        self.scope
    }

    /// Dialect of the engine running the statement
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Record the start timestamp; later calls keep the first value
    pub fn mark_started(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        *self.started_at.get_or_init(|| at)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.get().copied()
    }
}

/// Result summary handed to after-execute hooks
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Rows(usize),
    Affected(u64),
    Failed(String),
}

/// Engine-scoped execution hooks
pub trait ExecutionListener: Send + Sync {
    fn before_execute(&self, ctx: &ExecutionContext, statement: &Statement);

    fn after_execute(
        &self,
        ctx: &ExecutionContext,
        statement: &Statement,
        outcome: &ExecutionOutcome,
    );
}

/// Error returned by engine execution
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to compile statement: {0}")]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Database engine with execution hooks
pub struct Engine {
    pool: SqlitePool,
    dialect: Dialect,
    listeners: DashMap<ListenerId, Arc<dyn ExecutionListener>>,
    next_listener_id: AtomicU64,
    next_execution_id: AtomicU64,
}

impl Engine {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            dialect: Dialect::Sqlite,
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            next_execution_id: AtomicU64::new(1),
        }
    }

    /// Open a pooled SQLite engine
    ///
    /// # Example
    ///
    /// ```ignore
    /// let engine = Engine::connect("sqlite:./data/app.db", 5).await?;
    /// ```
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .context("Failed to connect to application database")?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Register a hook pair, returning the id needed to remove it
    pub fn listen(&self, listener: Arc<dyn ExecutionListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        id
    }

    /// Remove a hook pair; returns false if it was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Render a statement to SQL text, falling back to its native form
    pub fn render(&self, statement: &Statement) -> String {
        match statement.compile(self.dialect) {
            Ok(compiled) => compiled.sql,
            Err(_) => statement.to_string(),
        }
    }

    pub async fn execute(&self, statement: &Statement) -> Result<SqliteQueryResult, EngineError> {
        let (sql, params) = self.prepare(statement)?;
        let ctx = self.before(statement);

        let result = bind_all(sqlx::query(&sql), &params).execute(&self.pool).await;

        let outcome = match &result {
            Ok(done) => ExecutionOutcome::Affected(done.rows_affected()),
            Err(e) => ExecutionOutcome::Failed(e.to_string()),
        };
        self.after(&ctx, statement, &outcome);

        Ok(result?)
    }

    pub async fn fetch_all(&self, statement: &Statement) -> Result<Vec<SqliteRow>, EngineError> {
        let (sql, params) = self.prepare(statement)?;
        let ctx = self.before(statement);

        let result = bind_all(sqlx::query(&sql), &params).fetch_all(&self.pool).await;

        let outcome = match &result {
            Ok(rows) => ExecutionOutcome::Rows(rows.len()),
            Err(e) => ExecutionOutcome::Failed(e.to_string()),
        };
        self.after(&ctx, statement, &outcome);

        Ok(result?)
    }

    pub async fn fetch_optional(
        &self,
        statement: &Statement,
    ) -> Result<Option<SqliteRow>, EngineError> {
        let (sql, params) = self.prepare(statement)?;
        let ctx = self.before(statement);

        let result = bind_all(sqlx::query(&sql), &params)
            .fetch_optional(&self.pool)
            .await;

        let outcome = match &result {
            Ok(row) => ExecutionOutcome::Rows(usize::from(row.is_some())),
            Err(e) => ExecutionOutcome::Failed(e.to_string()),
        };
        self.after(&ctx, statement, &outcome);

        Ok(result?)
    }

    fn prepare(&self, statement: &Statement) -> Result<(String, Vec<Value>), CompileError> {
        match statement {
            Statement::Text(sql) => Ok((sql.clone(), Vec::new())),
            other => {
                let compiled = other.compile(self.dialect)?;
                Ok((compiled.sql, compiled.params))
            }
        }
    }

    fn before(&self, statement: &Statement) -> ExecutionContext {
        let id = self.next_execution_id.fetch_add(1, Ordering::Relaxed);
        let ctx = ExecutionContext::new(id, current_scope(), self.dialect);

        for listener in self.snapshot() {
            listener.before_execute(&ctx, statement);
        }
        ctx
    }

    fn after(&self, ctx: &ExecutionContext, statement: &Statement, outcome: &ExecutionOutcome) {
        for listener in self.snapshot() {
            listener.after_execute(ctx, statement, outcome);
        }
    }

    // Hooks run outside the map's shard locks so they may attach/detach.
    fn snapshot(&self) -> Vec<Arc<dyn ExecutionListener>> {
        self.listeners.iter().map(|entry| entry.value().clone()).collect()
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [Value],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<i64>),
            Value::Integer(v) => query.bind(*v),
            Value::Real(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl ExecutionListener for Recording {
        fn before_execute(&self, ctx: &ExecutionContext, _statement: &Statement) {
            ctx.mark_started(Utc::now());
            self.events
                .lock()
                .unwrap()
                .push(format!("before:{}", ctx.execution_id()));
        }

        fn after_execute(
            &self,
            ctx: &ExecutionContext,
            _statement: &Statement,
            outcome: &ExecutionOutcome,
        ) {
            assert!(ctx.started_at().is_some());
            self.events
                .lock()
                .unwrap()
                .push(format!("after:{}:{:?}", ctx.execution_id(), outcome));
        }
    }

    async fn create_test_engine() -> Engine {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        Engine::new(pool)
    }

    #[tokio::test]
    async fn test_hooks_fire_in_pairs() {
        let engine = create_test_engine().await;
        let listener = Arc::new(Recording::default());
        let id = engine.listen(listener.clone());

        engine
            .execute(&Statement::text("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)"))
            .await
            .unwrap();
        engine
            .execute(&Statement::insert("t").value("name", "a").into())
            .await
            .unwrap();

        let events = listener.events.lock().unwrap().clone();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], "before:1");
        assert!(events[1].starts_with("after:1:Affected"));
        assert_eq!(events[3], "after:2:Affected(1)");

        assert!(engine.remove(id));
        assert!(!engine.remove(id));
        assert_eq!(engine.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_statement_reports_failure() {
        let engine = create_test_engine().await;
        let listener = Arc::new(Recording::default());
        engine.listen(listener.clone());

        let result = engine.execute(&Statement::text("SELECT * FROM missing")).await;
        assert!(matches!(result, Err(EngineError::Database(_))));

        let events = listener.events.lock().unwrap().clone();
        assert!(events[1].contains("Failed"));
    }

    #[tokio::test]
    async fn test_fetch_binds_parameters() {
        let engine = create_test_engine().await;
        engine
            .execute(&Statement::text("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)"))
            .await
            .unwrap();
        for name in ["a", "b", "c"] {
            engine
                .execute(&Statement::insert("t").value("name", name).into())
                .await
                .unwrap();
        }

        let rows = engine
            .fetch_all(&Statement::select("t").order_by("id", true).limit(2).into())
            .await
            .unwrap();
        let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
        assert_eq!(names, vec!["c", "b"]);

        let row = engine
            .fetch_optional(&Statement::select("t").filter("name", "z").into())
            .await
            .unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn test_render_falls_back_to_native_text() {
        let engine = create_test_engine().await;
        assert_eq!(engine.render(&Statement::text("SELECT 1")), "SELECT 1");
        assert_eq!(
            engine.render(&Statement::delete("t").filter("id", 3i64).into()),
            r#"DELETE FROM "t" WHERE "id" = ?"#
        );
    }
}
