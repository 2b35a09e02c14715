//! Mutating commands: create, update and delete

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use colored::*;

use graphload::bulk::{BulkOutcome, DeleteSummary, MultiOutcome};
use graphload::records::RecordSet;

use crate::cli::{ChunkArgs, GlobalArgs, Session, input};

pub async fn handle_create(
    global: &GlobalArgs,
    chunks: &ChunkArgs,
    schema_path: &Path,
    input_path: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let session = Session::open(global, chunks, schema_path).await?;
    let sets = input::load_record_sets(input_path)?;

    let start = Instant::now();
    let outcome = session
        .orchestrator()
        .create_all(sets)
        .await
        .context("Create failed")?;

    for (entity, result) in &outcome.results {
        let saved = result.result.iter().filter(|r| r.is_saved()).count();
        println!(
            "  {} {} created {}/{}",
            status_mark(result),
            entity.cyan(),
            saved.to_string().bold(),
            result.result.len()
        );
        print_failures(result);
    }
    print_skipped(&outcome);

    if let Some(path) = output {
        let json = input::record_sets_to_json(
            outcome
                .results
                .iter()
                .map(|(entity, result)| (entity.as_str(), result.result.as_slice())),
        );
        let text = serde_json::to_string_pretty(&json).context("Failed to format created records")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write output to: {}", path.display()))?;
        println!("Created records saved to: {}", path.display().to_string().bright_green());
    }

    println!("Finished in {:.2}s", start.elapsed().as_secs_f64());
    session.store.close().await;
    finish(outcome.is_complete())
}

pub async fn handle_update(
    global: &GlobalArgs,
    chunks: &ChunkArgs,
    schema_path: &Path,
    entity: &str,
    input_path: &Path,
    fields: &[String],
) -> Result<()> {
    let session = Session::open(global, chunks, schema_path).await?;
    let sets = input::load_record_sets(input_path)?;

    let records = take_entity(sets, entity)
        .with_context(|| format!("Input file has no records for '{}'", entity))?;
    let total = records.len();

    let outcome = session
        .executor()
        .update(entity, records, fields)
        .await
        .context("Update failed")?;

    println!(
        "  {} {} updated {} of {} rows ({})",
        status_mark(&outcome),
        entity.cyan(),
        outcome.result.to_string().bold(),
        total,
        fields.join(", ").dimmed()
    );
    print_failures(&outcome);

    session.store.close().await;
    finish(outcome.is_complete())
}

pub async fn handle_delete(
    global: &GlobalArgs,
    chunks: &ChunkArgs,
    schema_path: &Path,
    input_path: &Path,
) -> Result<()> {
    let session = Session::open(global, chunks, schema_path).await?;
    let sets = input::load_record_sets(input_path)?;

    let outcome = session
        .orchestrator()
        .delete_all(sets)
        .await
        .context("Delete failed")?;

    let mut overall = DeleteSummary::default();
    for (entity, result) in &outcome.results {
        println!(
            "  {} {} removed {} rows",
            status_mark(result),
            entity.cyan(),
            result.result.total.to_string().bold()
        );
        for (affected, count) in &result.result.by_entity {
            println!("       {} {}", affected, count);
        }
        print_failures(result);
        overall.merge(&result.result);
    }
    print_skipped(&outcome);
    println!("{} rows removed in total", overall.total.to_string().bold());

    session.store.close().await;
    finish(outcome.is_complete())
}

fn take_entity(sets: Vec<RecordSet>, entity: &str) -> Option<Vec<graphload::records::Instance>> {
    sets.into_iter().find(|s| s.entity == entity).map(|s| s.records)
}

fn status_mark<T>(outcome: &BulkOutcome<T>) -> ColoredString {
    if outcome.is_complete() {
        "✓".bright_green()
    } else {
        "✗".bright_red()
    }
}

fn print_failures<T>(outcome: &BulkOutcome<T>) {
    for failure in &outcome.failures {
        println!(
            "       {} chunk {} (records {}..{}): {}",
            "failed".red(),
            failure.index,
            failure.offset,
            failure.offset + failure.len,
            failure.error
        );
    }
}

fn print_skipped<T>(outcome: &MultiOutcome<T>) {
    for name in &outcome.skipped {
        println!("  {} {} skipped", "-".dimmed(), name.dimmed());
    }
}

fn finish(complete: bool) -> Result<()> {
    if complete {
        Ok(())
    } else {
        anyhow::bail!("Some chunks failed; committed chunks were kept")
    }
}
