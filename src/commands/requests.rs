//! Request record CLI commands
//!
//! Browse the profiler database from the terminal.

use anyhow::Result;
use colored::Colorize;
use sql_profiler::config;
use sql_profiler::storage::{ProfilerDb, RequestRecord};
use std::io::{self, BufRead, Write};
use std::path::Path;

async fn open_db(config_path: &Path) -> Result<ProfilerDb> {
    let cfg = config::load_config(config_path)?;
    let url = cfg.profiler.database_url(&cfg.database);
    ProfilerDb::connect(url, 1).await
}

/// List one page of request records
pub async fn list(config_path: &Path, page: u32, limit: u32) -> Result<()> {
    let db = open_db(config_path).await?;
    let result = db.list_requests(page, limit).await?;

    println!(
        "{}",
        format!(
            "Requests (page {} of {}, {} total)",
            result.page,
            result.total_pages.max(1),
            result.total
        )
        .bold()
        .underline()
    );
    println!();

    if result.requests.is_empty() {
        println!("{}", "No requests recorded".dimmed());
        return Ok(());
    }

    println!(
        "{:>6}  {:<7} {:<40} {:>10} {:>8}",
        "ID".bold(),
        "METHOD".bold(),
        "PATH".bold(),
        "TIME".bold(),
        "QUERIES".bold()
    );
    for request in &result.requests {
        println!(
            "{:>6}  {:<7} {:<40} {:>10} {:>8}",
            request.id,
            request.method.cyan(),
            truncate(&request.path, 40),
            format_time(request.time_taken),
            request
                .total_queries
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    Ok(())
}

/// Show one request and its statements
pub async fn show(config_path: &Path, id: i64, with_stack: bool) -> Result<()> {
    let db = open_db(config_path).await?;

    let Some(request) = db.get_request(id).await? else {
        anyhow::bail!("Request {} not found", id);
    };
    let queries = db.queries_for_request(id).await?;

    print_request(&request);
    println!(
        "{:<16} {}",
        "Query Time:".bold(),
        format_time(Some(queries.iter().map(|q| q.time_taken).sum()))
    );
    println!();

    if queries.is_empty() {
        println!("{}", "No statements recorded".dimmed());
        return Ok(());
    }

    for (i, query) in queries.iter().enumerate() {
        println!(
            "{}. {} {}",
            i + 1,
            format_time(Some(query.time_taken)).yellow(),
            query.query
        );
        if with_stack {
            for line in query.traceback.lines() {
                println!("     {}", line.dimmed());
            }
        }
    }

    Ok(())
}

/// Show database statistics
pub async fn stats(config_path: &Path) -> Result<()> {
    let db = open_db(config_path).await?;
    let stats = db.stats().await?;

    println!("{}", "Profiler Database Statistics".bold().underline());
    println!();
    println!("{:<30} {:>15}", "Requests:", stats.request_count);
    println!("{:<30} {:>15}", "  Unfinalized:", stats.pending_count);
    println!("{:<30} {:>15}", "Statements:", stats.query_count);
    println!(
        "{:<30} {:>15}",
        "Average Request Time:",
        format_time(stats.avg_time_taken)
    );
    println!(
        "{:<30} {:>15}",
        "Slowest Statement:",
        format_time(stats.slowest_query)
    );

    Ok(())
}

/// Delete every recorded request and statement
pub async fn clear(config_path: &Path, yes: bool) -> Result<()> {
    if !yes && !confirm("Delete all recorded requests and statements?")? {
        println!("{}", "Aborted".yellow());
        return Ok(());
    }

    let db = open_db(config_path).await?;
    let cleared = db.clear_all().await?;

    println!("{}", "Cleared profiling data".green().bold());
    println!("{:<30} {:>15}", "  Requests Deleted:", cleared.requests_deleted);
    println!("{:<30} {:>15}", "  Statements Deleted:", cleared.queries_deleted);

    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn print_request(request: &RequestRecord) {
    println!(
        "{}",
        format!("Request #{}", request.id).bold().underline()
    );
    println!();
    println!("{:<16} {} {}", "Request:".bold(), request.method.cyan(), request.path);
    if !request.query_params.is_empty() {
        println!("{:<16} {}", "Query String:".bold(), request.query_params);
    }
    if let Some(start) = request.start_time {
        println!("{:<16} {}", "Started:".bold(), start.to_rfc3339());
    }
    println!("{:<16} {}", "Total Time:".bold(), format_time(request.time_taken));
    match request.total_queries {
        Some(n) => println!("{:<16} {}", "Statements:".bold(), n),
        None => println!("{:<16} {}", "Statements:".bold(), "unfinalized".red()),
    }
    if !request.body.is_empty() {
        println!("{:<16} {}", "Body:".bold(), request.body);
    }
}

/// Format milliseconds
fn format_time(ms: Option<f64>) -> String {
    match ms {
        Some(ms) if ms >= 1000.0 => format!("{:.2}s", ms / 1000.0),
        Some(ms) => format!("{:.3}ms", ms),
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Some(1.5)), "1.500ms");
        assert_eq!(format_time(Some(2500.0)), "2.50s");
        assert_eq!(format_time(None), "-");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("/items", 40), "/items");
        assert_eq!(truncate("/items/1234567890", 10), "/items/...");
    }
}
