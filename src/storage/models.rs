//! Persisted profiling records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One profiled inbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: i64,
    pub method: String,
    pub path: String,
    pub query_params: String,
    /// Header name to value, serialized as a JSON object
    pub headers: serde_json::Value,
    pub raw_body: String,
    pub body: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Total request time in milliseconds
    pub time_taken: Option<f64>,
    pub total_queries: Option<i64>,
}

impl RequestRecord {
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Everything known about a request before its handler runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMetadata {
    pub method: String,
    pub path: String,
    pub query_params: String,
    pub headers: serde_json::Value,
    pub raw_body: String,
    pub body: String,
}

/// One captured statement linked to its request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: i64,
    pub request_id: i64,
    pub query: String,
    /// Statement time in milliseconds
    pub time_taken: f64,
    pub traceback: String,
}

/// Query record before insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewQuery {
    pub request_id: i64,
    pub query: String,
    pub time_taken: f64,
    pub traceback: String,
}

/// One page of request records, newest first
#[derive(Debug, Clone, Serialize)]
pub struct RequestPage {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
    pub requests: Vec<RequestRecord>,
}

/// Row counts across both tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerStats {
    pub request_count: u64,
    pub query_count: u64,
    pub pending_count: u64,
    pub avg_time_taken: Option<f64>,
    pub slowest_query: Option<f64>,
}

/// Rows removed by a bulk clear
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearStats {
    pub requests_deleted: u64,
    pub queries_deleted: u64,
}
