use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use tokio::task;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use workflow_index::{
    api::{self, AppState},
    builder::write_snapshot,
    config::Config,
    Corpus, IndexBuilder, IndexStore, ServiceResolver, StoreOptions, WorkflowAnalyzer,
};

#[derive(Parser, Debug)]
#[command(name = "workflow-index", version, about = "Workflow document index and search service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load (or rebuild) the index and serve the HTTP API.
    Serve {
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Index the workflows directory and write a snapshot.
    Build {
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workflow_index=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve {
        dir: None,
        snapshot: None,
    }) {
        Command::Serve { dir, snapshot } => {
            apply_overrides(&mut config, dir, snapshot);
            serve(config).await
        }
        Command::Build { dir, out } => {
            apply_overrides(&mut config, dir, out);
            build(config).await
        }
    }
}

fn apply_overrides(config: &mut Config, dir: Option<PathBuf>, snapshot: Option<PathBuf>) {
    if let Some(dir) = dir {
        config.workflows_dir = dir;
    }
    if let Some(snapshot) = snapshot {
        config.snapshot_path = snapshot;
    }
}

fn index_builder(config: &Config) -> Result<IndexBuilder> {
    let resolver = match &config.service_map {
        Some(path) => ServiceResolver::from_path(path)
            .with_context(|| format!("loading service map {}", path.display()))?,
        None => ServiceResolver::builtin().context("loading built-in service map")?,
    };
    info!(services = resolver.len(), "Service map ready");
    Ok(IndexBuilder::new(WorkflowAnalyzer::new(resolver)))
}

async fn build(config: Config) -> Result<()> {
    let builder = index_builder(&config)?;
    let corpus = Corpus::new(config.workflows_dir.clone());
    let out = config.snapshot_path.clone();

    let report = task::spawn_blocking(move || builder.build(&corpus))
        .await
        .context("index build task failed")??;

    if let Some(err) = &report.empty_corpus {
        warn!("{err}");
    }
    write_snapshot(&report.snapshot, &out)
        .with_context(|| format!("writing snapshot {}", out.display()))?;

    info!(
        workflows = report.snapshot.workflows.len(),
        errors = report.errors(),
        out = %out.display(),
        "Snapshot written"
    );
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let builder = index_builder(&config)?;
    let corpus = Corpus::new(config.workflows_dir.clone());
    let options = StoreOptions {
        snapshot_path: config.snapshot_path.clone(),
        policy: config.missing_policy,
        rebuild_timeout: Some(config.rebuild_timeout),
    };

    let store = {
        let corpus = corpus.clone();
        task::spawn_blocking(move || IndexStore::open(&options, &builder, &corpus))
            .await
            .context("index load task failed")?
    };
    info!(
        workflows = store.stats().total,
        source = ?store.source(),
        "Index ready"
    );

    let bind_addr = config.bind_addr;
    let state = AppState::new(config, store, corpus);

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/api/stats", get(api::stats))
        .route("/api/workflows", get(api::search_workflows))
        .route("/api/search/deep", get(api::deep_search_workflows))
        .route("/api/workflows/{filename}", get(api::get_workflow))
        .route(
            "/api/workflows/{filename}/diagram",
            get(api::get_workflow_diagram),
        )
        .route(
            "/api/workflows/{filename}/download",
            get(api::download_workflow),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!("workflow-index listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
