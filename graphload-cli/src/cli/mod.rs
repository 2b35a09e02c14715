//! Command definitions and shared session setup

pub mod commands;
pub mod input;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use graphload::bulk::{BulkExecutor, Orchestrator};
use graphload::config::AppConfig;
use graphload::metadata::Schema;
use graphload::storage::{SqliteOptions, SqliteStore};

#[derive(Parser)]
#[command(name = "graphload")]
#[command(author, version, about = "Dependency-aware bulk loader for relational data")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Configuration file (defaults to ./graphload.toml, then the user config dir)
    #[arg(long, global = true, env = "GRAPHLOAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file, overrides [storage].path
    #[arg(long, global = true, env = "GRAPHLOAD_DATABASE")]
    pub database: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Chunking overrides for mutating commands
#[derive(Args, Debug, Clone, Default)]
pub struct ChunkArgs {
    /// Records per chunk transaction
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Chunks executed concurrently
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the tables described by a schema
    Init {
        /// Schema TOML file
        #[arg(short, long)]
        schema: PathBuf,
    },

    /// Show the creation order for an input file without writing anything
    Plan {
        #[arg(short, long)]
        schema: PathBuf,
        /// JSON record sets
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Create every record set of an input file in dependency order
    Create {
        #[arg(short, long)]
        schema: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
        #[command(flatten)]
        chunks: ChunkArgs,
        /// Only show the plan
        #[arg(long)]
        dry_run: bool,
        /// Write the created records (with keys) to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write selected fields of saved records of one entity type
    Update {
        #[arg(short, long)]
        schema: PathBuf,
        /// Entity type to update
        #[arg(short, long)]
        entity: String,
        #[arg(short, long)]
        input: PathBuf,
        /// Fields to write, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        fields: Vec<String>,
        #[command(flatten)]
        chunks: ChunkArgs,
    },

    /// Delete saved records, dependents first
    Delete {
        #[arg(short, long)]
        schema: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
        #[command(flatten)]
        chunks: ChunkArgs,
        /// Only show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Show what deleting the records of an input file would remove
    Simulate {
        #[arg(short, long)]
        schema: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compare two input files entity by entity
    Diff {
        #[arg(short, long)]
        schema: PathBuf,
        #[arg(long)]
        first: PathBuf,
        #[arg(long)]
        second: PathBuf,
        /// Fields compared for records without keys, comma separated
        #[arg(short, long, value_delimiter = ',')]
        fields: Vec<String>,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let global = cli.global;
    match cli.command {
        Commands::Init { schema } => commands::init::handle_init(&global, &schema).await,
        Commands::Plan { schema, input } => commands::plan::handle_plan(&schema, &input),
        Commands::Create {
            schema,
            input,
            chunks,
            dry_run,
            output,
        } => {
            if dry_run {
                commands::plan::handle_plan(&schema, &input)
            } else {
                commands::write::handle_create(&global, &chunks, &schema, &input, output.as_deref())
                    .await
            }
        }
        Commands::Update {
            schema,
            entity,
            input,
            fields,
            chunks,
        } => commands::write::handle_update(&global, &chunks, &schema, &entity, &input, &fields).await,
        Commands::Delete {
            schema,
            input,
            chunks,
            dry_run,
        } => {
            if dry_run {
                commands::simulate::handle_simulate(&global, &schema, &input).await
            } else {
                commands::write::handle_delete(&global, &chunks, &schema, &input).await
            }
        }
        Commands::Simulate { schema, input } => {
            commands::simulate::handle_simulate(&global, &schema, &input).await
        }
        Commands::Diff {
            schema,
            first,
            second,
            fields,
        } => commands::diff::handle_diff(&schema, &first, &second, &fields),
    }
}

/// Loaded configuration, schema and open database for one command
pub struct Session {
    pub config: AppConfig,
    pub schema: Arc<Schema>,
    pub store: SqliteStore,
}

impl Session {
    pub async fn open(global: &GlobalArgs, chunks: &ChunkArgs, schema_path: &Path) -> Result<Self> {
        let mut config = AppConfig::discover(global.config.as_deref())?;
        if let Some(path) = &global.database {
            config.storage.path = path.clone();
        }
        if let Some(size) = chunks.chunk_size {
            config.bulk.chunk_size = size;
        }
        if let Some(concurrency) = chunks.concurrency {
            config.bulk.max_concurrency = concurrency;
        }
        config
            .bulk
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid chunk settings: {}", e))?;

        let schema = load_schema(schema_path)?;

        let store = SqliteStore::open(&config.storage.path, SqliteOptions::from(&config.storage))
            .await
            .with_context(|| format!("Failed to open database: {}", config.storage.path.display()))?;

        Ok(Self {
            config,
            schema: Arc::new(schema),
            store,
        })
    }

    pub fn executor(&self) -> BulkExecutor {
        let bulk = self
            .config
            .bulk
            .clone()
            .clamp_to_pool(self.config.storage.max_connections);
        BulkExecutor::new(Arc::new(self.store.clone()), self.schema.clone(), bulk)
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.executor())
    }
}

pub fn load_schema(path: &Path) -> Result<Schema> {
    Schema::load(path).with_context(|| format!("Failed to load schema: {}", path.display()))
}
