//! Request-scoped SQL statement profiler
//!
//! ## Flow
//!
//! ```text
//! request ─▶ exclusion check ─▶ RequestRecorder::begin
//!                                   │
//!          StatementTracer::attach ◀┘
//!                 │
//!        handler runs inside its ScopeId (statements tagged per task)
//!                 │
//!          StatementTracer::detach ─▶ QueryRecorder::persist ─▶ RequestRecorder::finalize
//! ```
//!
//! Detach and finalize run on every exit path: normal return, handler
//! panic (resumed afterwards) and cancellation (via a drop guard).

pub mod body;
pub mod exclusion;
pub mod middleware;
pub mod recorder;
pub mod stack;
pub mod tracer;

pub use exclusion::ExclusionRules;
pub use middleware::profile_middleware;
pub use recorder::{QueryRecorder, RequestRecorder};
pub use stack::StackPolicy;
pub use tracer::{round_millis, StatementRecord, StatementTracer};

use crate::config::ProfilerConfig;
use crate::engine::Engine;
use crate::storage::ProfilerDb;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Runtime settings of the profiling middleware
#[derive(Debug, Clone)]
pub struct ProfilerSettings {
    pub enabled: bool,
    pub max_body_bytes: usize,
    pub redact_headers: Vec<String>,
    pub stack_policy: StackPolicy,
}

impl Default for ProfilerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_body_bytes: 10 * 1024 * 1024,
            redact_headers: vec![
                "authorization".to_string(),
                "cookie".to_string(),
                "proxy-authorization".to_string(),
            ],
            stack_policy: StackPolicy::default(),
        }
    }
}

impl From<&ProfilerConfig> for ProfilerSettings {
    fn from(cfg: &ProfilerConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            max_body_bytes: cfg.max_body_bytes,
            redact_headers: cfg.redact_headers.clone(),
            stack_policy: StackPolicy {
                filter_internal: cfg.filter_internal_frames,
                max_frames: cfg.max_stack_frames,
            },
        }
    }
}

/// Shared profiler state handed to the middleware
pub struct Profiler {
    engine: Arc<Engine>,
    db: Arc<ProfilerDb>,
    requests: RequestRecorder,
    queries: QueryRecorder,
    exclusions: ArcSwap<ExclusionRules>,
    settings: ProfilerSettings,
}

impl Profiler {
    pub fn new(
        engine: Arc<Engine>,
        db: Arc<ProfilerDb>,
        exclusions: ExclusionRules,
        settings: ProfilerSettings,
    ) -> Self {
        Self {
            engine,
            requests: RequestRecorder::new(db.clone()),
            queries: QueryRecorder::new(db.clone()),
            db,
            exclusions: ArcSwap::from_pointee(exclusions),
            settings,
        }
    }

    pub fn from_config(engine: Arc<Engine>, db: Arc<ProfilerDb>, cfg: &ProfilerConfig) -> Self {
        Self::new(engine, db, cfg.exclusions(), ProfilerSettings::from(cfg))
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn db(&self) -> &Arc<ProfilerDb> {
        &self.db
    }

    pub fn settings(&self) -> &ProfilerSettings {
        &self.settings
    }

    /// Whether `path` should be profiled at all
    pub fn should_profile(&self, path: &str) -> bool {
        self.settings.enabled && !self.exclusions.load().is_excluded(path)
    }

    /// Swap the exclusion rules (used on config reload)
    pub fn set_exclusions(&self, rules: ExclusionRules) {
        self.exclusions.store(Arc::new(rules));
    }

    pub fn exclusions(&self) -> Arc<ExclusionRules> {
        self.exclusions.load_full()
    }
}
