//! MemoryGraph CLI
//!
//! Migrate a memory graph between backends, inspect relationships, and
//! probe backend health.

use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use memorygraph::config::DEFAULT_SQLITE_PATH;
use memorygraph::graph::{traverse, TraversalOptions};
use memorygraph::migration::retry::DEFAULT_CALL_TIMEOUT;
use memorygraph::migration::{ProgressCallback, ProgressEvent};
use memorygraph::{
    open_backend, BackendConfig, BackendType, Direction, MigrationManager, MigrationOptions,
    RelationshipType,
};

#[derive(Parser)]
#[command(name = "memorygraph")]
#[command(about = "Memory graph storage and cross-backend migration")]
#[command(version)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every memory and relationship from one backend to another
    Migrate(MigrateArgs),
    /// Show memories related to a memory
    Related {
        /// Memory ID
        id: String,
        #[command(flatten)]
        backend: BackendArgs,
        /// Maximum hops from the start memory
        #[arg(short, long, default_value = "2")]
        depth: usize,
        /// outgoing, incoming, or both
        #[arg(long, default_value = "both")]
        direction: String,
        /// Relationship types to follow (comma-separated)
        #[arg(short = 'T', long)]
        types: Option<String>,
        /// Print the traversal as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that a backend is reachable
    Health {
        #[command(flatten)]
        backend: BackendArgs,
    },
}

#[derive(Args)]
struct MigrateArgs {
    /// Source backend
    #[arg(long, env = "MEMORY_BACKEND", default_value = "sqlite")]
    from: String,
    #[arg(long, env = "MEMORY_SQLITE_PATH")]
    from_path: Option<String>,
    #[arg(long)]
    from_uri: Option<String>,
    #[arg(long)]
    from_username: Option<String>,
    #[arg(long)]
    from_password: Option<String>,
    #[arg(long)]
    from_api_key: Option<String>,

    /// Target backend
    #[arg(long)]
    to: String,
    #[arg(long)]
    to_path: Option<String>,
    #[arg(long)]
    to_uri: Option<String>,
    #[arg(long)]
    to_username: Option<String>,
    #[arg(long)]
    to_password: Option<String>,
    #[arg(long)]
    to_api_key: Option<String>,

    /// Validate and project counts without writing to the target
    #[arg(long)]
    dry_run: bool,
    /// Leave memories that already exist on the target untouched
    #[arg(long)]
    skip_duplicates: bool,
    /// Skip post-import verification
    #[arg(long)]
    no_verify: bool,
    /// Abort if the target already holds memories
    #[arg(long)]
    require_empty_target: bool,
    #[arg(long, default_value = "100")]
    batch_size: usize,
    /// Entities compared field by field during verification
    #[arg(long, default_value = "10")]
    sample_size: usize,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct BackendArgs {
    /// Backend type
    #[arg(long, env = "MEMORY_BACKEND", default_value = "sqlite")]
    backend: String,
    #[arg(long, env = "MEMORY_SQLITE_PATH")]
    path: Option<String>,
    #[arg(long)]
    uri: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long, env = "MEMORYGRAPH_API_KEY")]
    api_key: Option<String>,
}

impl BackendArgs {
    fn config(&self) -> anyhow::Result<BackendConfig> {
        build_config(
            &self.backend,
            self.path.as_deref(),
            self.uri.as_deref(),
            self.username.clone(),
            self.password.clone(),
            self.api_key.clone(),
        )
    }
}

fn build_config(
    backend: &str,
    path: Option<&str>,
    uri: Option<&str>,
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
) -> anyhow::Result<BackendConfig> {
    let backend_type: BackendType = backend.parse()?;
    let mut config = BackendConfig::new(backend_type)
        .with_credentials(username, password)
        .with_api_key(api_key);

    match path {
        Some(path) => config = config.with_path(path),
        None if backend_type == BackendType::Sqlite => {
            config = config.with_path(DEFAULT_SQLITE_PATH)
        }
        None => {}
    }
    if let Some(uri) = uri {
        config = config.with_uri(uri);
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Migrate(args) => {
            let code = migrate(args).await?;
            std::process::exit(code);
        }
        Commands::Related {
            id,
            backend,
            depth,
            direction,
            types,
            json,
        } => {
            let direction: Direction = direction.parse().map_err(anyhow::Error::msg)?;
            let mut options = TraversalOptions::with_depth(depth)
                .direction(direction)
                .with_call_timeout(DEFAULT_CALL_TIMEOUT);
            if let Some(types) = types {
                options = options.types(
                    types
                        .split(',')
                        .map(|t| RelationshipType::from(t.trim()))
                        .collect(),
                );
            }

            let config = backend.config()?;
            let adapter = open_backend(&config)
                .await
                .with_context(|| format!("opening {}", config.describe()))?;
            let outcome = traverse(adapter.as_ref(), &id, &options).await;
            adapter.close().await?;
            let result = outcome?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "{} related memories within {} hops of {}:",
                    result.nodes.len().saturating_sub(1),
                    depth,
                    id
                );
                for node in result.nodes.iter().skip(1) {
                    println!(
                        "  [{}] {} ({}) {}",
                        node.depth,
                        node.memory.id,
                        node.memory.memory_type.as_str(),
                        node.memory.title
                    );
                }
                println!(
                    "Visited {} nodes, examined {} edges, pruned {} revisits",
                    result.stats.nodes_visited,
                    result.stats.edges_examined,
                    result.stats.revisits_pruned
                );
            }
        }
        Commands::Health { backend } => {
            let config = backend.config()?;
            let adapter = open_backend(&config)
                .await
                .with_context(|| format!("opening {}", config.describe()))?;
            let health = adapter.health_check().await;
            adapter.close().await?;
            let health = health?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            if !health.healthy {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn migrate(args: MigrateArgs) -> anyhow::Result<i32> {
    let source = build_config(
        &args.from,
        args.from_path.as_deref(),
        args.from_uri.as_deref(),
        args.from_username.clone(),
        args.from_password.clone(),
        args.from_api_key.clone(),
    )
    .context("invalid source backend")?;
    let target = build_config(
        &args.to,
        args.to_path.as_deref(),
        args.to_uri.as_deref(),
        args.to_username.clone(),
        args.to_password.clone(),
        args.to_api_key.clone(),
    )
    .context("invalid target backend")?;

    let options = MigrationOptions {
        dry_run: args.dry_run,
        skip_duplicates: args.skip_duplicates,
        verify: !args.no_verify,
        require_empty_target: args.require_empty_target,
        batch_size: args.batch_size.max(1),
        sample_size: args.sample_size,
        ..Default::default()
    };

    let progress: ProgressCallback = Arc::new(|event: &ProgressEvent| {
        debug!(
            phase = %event.phase,
            kind = %event.kind,
            processed = event.processed,
            total = event.total,
            "Progress"
        );
    });
    let manager = MigrationManager::new(options).with_progress(progress);

    let abort = manager.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling migration");
            abort.abort();
        }
    });

    let result = manager.migrate_configs(&source, &target).await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.summary());
    }
    Ok(result.exit_code())
}
