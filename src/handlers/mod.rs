//! HTTP surfaces
//!
//! - items: demo CRUD application running on the profiled engine
//! - profiler_api: JSON viewer over recorded requests and statements
//! - metrics_handler: Prometheus exposition

pub mod items;
pub mod metrics_handler;
pub mod profiler_api;
