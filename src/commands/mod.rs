//! Command implementations for the CLI
//!
//! - serve: Start the profiled demo server
//! - requests: Browse, summarize and clear recorded requests
//! - config: Configuration display and validation

pub mod config;
pub mod requests;
pub mod serve;
