//! Task-local profiling scope
//!
//! The middleware runs each profiled handler inside [`with_scope`]; every
//! statement the handler executes picks the scope up from the task and
//! carries it on its execution context.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

tokio::task_local! {
    static PROFILING_SCOPE: ScopeId;
}

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// Identifier of one request's profiling scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Allocate a process-unique scope id
    pub fn next() -> Self {
        Self(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Scope of the current task, if it is being profiled
pub fn current_scope() -> Option<ScopeId> {
    PROFILING_SCOPE.try_with(|scope| *scope).ok()
}

/// Run `fut` with `scope` as the task's profiling scope
pub async fn with_scope<F: Future>(scope: ScopeId, fut: F) -> F::Output {
    PROFILING_SCOPE.scope(scope, fut).await
}

/// Carry the caller's scope into a future that will run on another task
///
/// ```ignore
/// tokio::spawn(in_current_scope(async move { engine.execute(&stmt).await }));
/// ```
pub fn in_current_scope<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    let scope = current_scope();
    async move {
        match scope {
            Some(scope) => PROFILING_SCOPE.scope(scope, fut).await,
            None => fut.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scope_visible_inside_only() {
        assert_eq!(current_scope(), None);

        let scope = ScopeId::next();
        let seen = with_scope(scope, async { current_scope() }).await;
        assert_eq!(seen, Some(scope));
        assert_eq!(current_scope(), None);
    }

    #[tokio::test]
    async fn test_scope_propagates_to_spawned_task() {
        let scope = ScopeId::next();
        let seen = with_scope(scope, async {
            let plain = tokio::spawn(async { current_scope() }).await.unwrap();
            let carried = tokio::spawn(in_current_scope(async { current_scope() }))
                .await
                .unwrap();
            (plain, carried)
        })
        .await;

        assert_eq!(seen, (None, Some(scope)));
    }

    #[test]
    fn test_scope_ids_unique() {
        assert_ne!(ScopeId::next(), ScopeId::next());
    }
}
