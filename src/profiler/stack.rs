//! Call-stack capture for statement records
//!
//! Stacks are captured with [`Backtrace::force_capture`] regardless of
//! `RUST_BACKTRACE`. By default the frames of the capture machinery itself
//! (backtrace internals, the tracer hooks, engine dispatch) are removed so
//! the first frame shown is the code that issued the statement.

use std::backtrace::Backtrace;

/// Symbol prefixes treated as profiler-internal
const INTERNAL_PREFIXES: &[&str] = &[
    "std::backtrace",
    "std::backtrace_rs",
    "sql_profiler::profiler::stack::",
    "sql_profiler::profiler::tracer::",
    "sql_profiler::engine::Engine::before",
    "sql_profiler::engine::Engine::after",
];

/// How call stacks are captured and trimmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPolicy {
    /// Drop frames belonging to the profiler's own capture path
    pub filter_internal: bool,
    /// Keep at most this many frames
    pub max_frames: Option<usize>,
}

impl Default for StackPolicy {
    fn default() -> Self {
        Self {
            filter_internal: true,
            max_frames: None,
        }
    }
}

/// Capture and format the current call stack
pub fn capture(policy: &StackPolicy) -> String {
    let backtrace = Backtrace::force_capture();
    format_frames(&backtrace.to_string(), policy)
}

/// Filter a rendered backtrace frame by frame
///
/// A frame is a `N: symbol` line followed by any indented `at file:line`
/// lines. Kept frames retain their original numbering.
pub fn format_frames(rendered: &str, policy: &StackPolicy) -> String {
    let mut out = String::new();
    let mut kept = 0usize;
    let mut keep_current = false;

    for line in rendered.lines() {
        if let Some(symbol) = frame_symbol(line) {
            keep_current = !(policy.filter_internal && is_internal(symbol));
            if keep_current {
                if policy.max_frames.is_some_and(|max| kept >= max) {
                    break;
                }
                kept += 1;
            }
        }

        if keep_current {
            out.push_str(line);
            out.push('\n');
        }
    }

    out
}

/// Symbol of a frame header line like `  12: app::handler`
fn frame_symbol(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let (index, rest) = trimmed.split_once(": ")?;
    if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(rest.trim())
}

fn is_internal(symbol: &str) -> bool {
    // Trait impls render as `<Type as Trait>::method`.
    let symbol = symbol.trim_start_matches('<');
    INTERNAL_PREFIXES
        .iter()
        .any(|prefix| symbol.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERED: &str = "   0: std::backtrace::Backtrace::force_capture
             at /rustc/library/std/src/backtrace.rs:312:13
   1: sql_profiler::profiler::stack::capture
             at ./src/profiler/stack.rs:40:21
   2: <sql_profiler::profiler::tracer::TracerHooks as sql_profiler::engine::ExecutionListener>::after_execute
             at ./src/profiler/tracer.rs:90:21
   3: sql_profiler::engine::Engine::after
   4: app::handlers::create_item
             at ./src/handlers.rs:12:5
   5: tokio::runtime::task::harness::poll
";

    #[test]
    fn test_internal_frames_filtered() {
        let formatted = format_frames(RENDERED, &StackPolicy::default());
        assert!(formatted.starts_with("   4: app::handlers::create_item"));
        assert!(formatted.contains("at ./src/handlers.rs:12:5"));
        assert!(formatted.contains("5: tokio::runtime"));
        assert!(!formatted.contains("sql_profiler::"));
    }

    #[test]
    fn test_unfiltered_keeps_everything() {
        let policy = StackPolicy {
            filter_internal: false,
            max_frames: None,
        };
        let formatted = format_frames(RENDERED, &policy);
        assert_eq!(formatted.lines().count(), RENDERED.lines().count());
    }

    #[test]
    fn test_max_frames() {
        let policy = StackPolicy {
            filter_internal: true,
            max_frames: Some(1),
        };
        let formatted = format_frames(RENDERED, &policy);
        assert_eq!(
            formatted,
            "   4: app::handlers::create_item\n             at ./src/handlers.rs:12:5\n"
        );
    }

    #[test]
    fn test_capture_is_not_empty() {
        let stack = capture(&StackPolicy::default());
        assert!(!stack.is_empty());
    }
}
