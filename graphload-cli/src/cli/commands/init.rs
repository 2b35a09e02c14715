//! Install tables for a schema

use std::path::Path;

use anyhow::{Context, Result};
use colored::*;

use crate::cli::{ChunkArgs, GlobalArgs, Session};

pub async fn handle_init(global: &GlobalArgs, schema_path: &Path) -> Result<()> {
    let session = Session::open(global, &ChunkArgs::default(), schema_path).await?;

    session
        .store
        .install_schema(&session.schema)
        .await
        .context("Failed to install schema")?;

    println!(
        "{} Installed {} entity types into {}",
        "✓".bright_green(),
        session.schema.len().to_string().bold(),
        session.config.storage.path.display().to_string().cyan()
    );

    session.store.close().await;
    Ok(())
}
