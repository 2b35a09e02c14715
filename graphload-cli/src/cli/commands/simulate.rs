//! Delete preview

use std::path::Path;

use anyhow::{Context, Result};
use colored::*;

use crate::cli::{ChunkArgs, GlobalArgs, Session, input};

pub async fn handle_simulate(global: &GlobalArgs, schema_path: &Path, input_path: &Path) -> Result<()> {
    let session = Session::open(global, &ChunkArgs::default(), schema_path).await?;
    let sets = input::load_record_sets(input_path)?;

    let preview = session
        .orchestrator()
        .simulate_all(&sets)
        .await
        .context("Simulation failed")?;

    println!("{}", "Rows that would be removed".bold());
    for (entity, count) in preview.counts() {
        println!("  {} {}", entity.cyan(), count.to_string().bold());
    }
    println!("  {} {}", "total".bold(), preview.total());

    let nullified = preview.nullified_counts();
    if !nullified.is_empty() {
        println!();
        println!("{}", "References that would be cleared".bold());
        for (entity, count) in nullified {
            println!("  {} {}", entity.cyan(), count);
        }
    }

    if preview.is_blocked() {
        println!();
        println!("{}", "Delete would be blocked by".bright_red().bold());
        for (entity, keys) in preview.blocking() {
            let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
            println!("  {} {}", entity.cyan(), keys.join(", "));
        }
    }

    session.store.close().await;
    Ok(())
}
