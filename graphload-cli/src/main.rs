//! graphload command-line interface
//!
//! Loads an entity schema and JSON record sets, then creates, updates,
//! deletes, previews or diffs them against a SQLite database.

mod cli;

use anyhow::Result;
use clap::Parser;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.global.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    if cli.global.no_color {
        colored::control::set_override(false);
    }

    cli::run(cli).await
}
