//! Persistence for profiling data
//!
//! Two tables back the profiler: `middleware_requests` holds one row per
//! profiled request and `middleware_query` one row per captured statement.
//! Every operation acquires its own pooled connection, so independent
//! writes never wait on a shared long-lived handle.

pub mod database;
pub mod models;

pub use database::ProfilerDb;
pub use models::{
    ClearStats, NewQuery, ProfilerStats, QueryRecord, RequestMetadata, RequestPage,
    RequestRecord,
};
