use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use sql_profiler::{config, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let command = args.get_command();

    // Logging follows the configured level/format; fall back to defaults
    // so `config validate` can still report a broken file.
    let server = config::load_config(&args.config)
        .map(|cfg| cfg.server)
        .unwrap_or_default();
    init_tracing(&server.log_level, &server.log_format);

    match command {
        cli::Commands::Serve => {
            commands::serve::execute(&args.config).await?;
        }
        cli::Commands::List { page, limit } => {
            commands::requests::list(&args.config, page, limit).await?;
        }
        cli::Commands::Show { id, stack } => {
            commands::requests::show(&args.config, id, stack).await?;
        }
        cli::Commands::Stats => {
            commands::requests::stats(&args.config).await?;
        }
        cli::Commands::Clear { yes } => {
            commands::requests::clear(&args.config, yes).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args.config)?,
        },
        cli::Commands::Version => {
            println!("SQL Profiler v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
