//! GraphQL whitelist operator tool.
//!
//! Run with: `graphql-whitelist --whitelist whitelist.yaml add query.graphql`
//!
//! Subcommands:
//! - `normalize FILE`: print the canonical form of a query
//! - `id FILE`: print the query id of a query
//! - `add FILE...`: whitelist queries in the whitelist file
//! - `check FILE`: exit with status 1 unless the query is whitelisted
//!
//! `-` reads the query from stdin.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use graphql_query_whitelist::{
    fingerprint, normalize, FileStore, GraphQLRequest, QueryRepository, QueryWhitelist,
    RequestParams, WhitelistConfig,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Manage and check a GraphQL query whitelist.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Whitelist file, overriding `store.whitelist_file` from the config
    #[arg(short, long, global = true)]
    whitelist: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the canonical form of a query
    Normalize { file: PathBuf },
    /// Print the query id of a query
    Id { file: PathBuf },
    /// Add queries to the whitelist
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Exit with status 1 unless the query is whitelisted
    Check { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays machine-readable
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    debug!("Config file: {}", args.config.display());
    let config = WhitelistConfig::load(&args.config)
        .await
        .context("Failed to load config file")?;

    match &args.command {
        Command::Normalize { file } => {
            let query = read_query(file).await?;
            let normalized = normalize(&query).context("Failed to normalize query")?;
            print!("{}", normalized.canonical);
        }
        Command::Id { file } => {
            let query = read_query(file).await?;
            let normalized = normalize(&query).context("Failed to normalize query")?;
            println!("{}", fingerprint(&normalized.canonical));
        }
        Command::Add { files } => {
            let store = open_store(&args, &config).await?;
            let repository = QueryRepository::new(store.clone());
            for file in files {
                let query = read_query(file).await?;
                let query_id = repository
                    .put(&query)
                    .await
                    .with_context(|| format!("Failed to whitelist {}", file.display()))?;
                println!("{}\t{}", query_id, file.display());
            }
            info!(
                path = %store.path().display(),
                entries = store.len().await,
                "Whitelist updated"
            );
        }
        Command::Check { file } => {
            let store = open_store(&args, &config).await?;
            let whitelist = QueryWhitelist::new(store).with_settings(&config.settings);

            let query = read_query(file).await?;
            let verdict = whitelist
                .evaluate(&GraphQLRequest::post(RequestParams {
                    query: Some(query),
                    ..RequestParams::default()
                }))
                .await;

            match (verdict.annotation, verdict.violation) {
                (Some(annotation), None) => println!("whitelisted\t{}", annotation.query_id),
                (_, Some(violation)) => {
                    println!("rejected\t{}", violation);
                    return Ok(ExitCode::FAILURE);
                }
                (None, None) => return Ok(ExitCode::FAILURE),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn open_store(args: &Args, config: &WhitelistConfig) -> Result<Arc<FileStore>> {
    let path = args
        .whitelist
        .clone()
        .or_else(|| config.store.whitelist_file.clone())
        .context("No whitelist file configured; pass --whitelist or set store.whitelist_file")?;

    let store = FileStore::open(&path)
        .await
        .with_context(|| format!("Failed to open whitelist {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn read_query(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut query = String::new();
        tokio::io::stdin()
            .read_to_string(&mut query)
            .await
            .context("Failed to read query from stdin")?;
        return Ok(query);
    }

    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))
}
