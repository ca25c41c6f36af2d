//! Paths that are never profiled
//!
//! The viewer endpoints read the profiler's own tables; profiling them
//! would write a new request record every time one is inspected.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRules {
    /// Paths matched exactly
    #[serde(default)]
    pub exact: Vec<String>,
    /// Paths matched by prefix
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self {
            exact: vec!["/all_request".to_string()],
            prefixes: vec![
                "/request_detail".to_string(),
                "/request_query".to_string(),
                "/favicon".to_string(),
                "/metrics".to_string(),
            ],
        }
    }
}

impl ExclusionRules {
    pub fn none() -> Self {
        Self {
            exact: Vec::new(),
            prefixes: Vec::new(),
        }
    }

    /// Check the raw request path
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exact.iter().any(|p| p == path)
            || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}
