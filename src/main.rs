//! coderag-server binary — wires every capability provider (Postgres, Redis,
//! Qdrant, Jina, Anthropic) into the durable ingestion orchestrator and the
//! query agent pipeline, then serves the HTTP/SSE surface.

mod acquire;
mod agent;
mod config;
mod db;
mod embeddings;
mod error;
mod http;
mod llm;
mod metrics;
mod model;
mod orchestrator;
mod parse;
mod ratelimit;
mod secrets;
mod session_store;
mod vector_index;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info};

use crate::agent::PipelineDeps;
use crate::config::Config;
use crate::db::CodebaseRepository;
use crate::embeddings::{EmbeddingProvider, JinaEmbeddingProvider};
use crate::http::AppContext;
use crate::llm::{AnthropicProvider, LlmProvider};
use crate::orchestrator::workflow::PostgresWorkflowRuntime;
use crate::orchestrator::{spawn_session_sweep, IngestionOrchestrator};
use crate::ratelimit::ConcurrentQueryGate;
use crate::session_store::{RateLimiter, SessionStore};
use crate::vector_index::{QdrantIndex, VectorIndex};

/// Retrieval-augmented code understanding service. All settings are sourced
/// from the environment; these flags only override the bind address for
/// local runs without needing to export `BACKEND_HOST`/`BACKEND_PORT`.
#[derive(Parser)]
#[command(name = "coderag-server", version, about, long_about = None)]
struct Cli {
    /// Override BACKEND_HOST
    #[arg(long)]
    host: Option<String>,

    /// Override BACKEND_PORT
    #[arg(long)]
    port: Option<u16>,
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coderag=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    if let Some(host) = cli.host {
        config.backend_host = host;
    }
    if let Some(port) = cli.port {
        config.backend_port = port;
    }
    let config = Arc::new(config);

    let db = match CodebaseRepository::connect(&config.postgres_url).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "failed to connect to postgres");
            std::process::exit(1);
        }
    };
    if let Err(e) = db.migrate().await {
        error!(error = %e, "failed to run postgres migrations");
        std::process::exit(1);
    }

    let workflow_pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.postgres_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "failed to connect workflow runtime to postgres");
            std::process::exit(1);
        }
    };
    let workflow_runtime = Arc::new(PostgresWorkflowRuntime::new(workflow_pool));
    if let Err(e) = workflow_runtime.migrate().await {
        error!(error = %e, "failed to run workflow runtime migrations");
        std::process::exit(1);
    }

    let vector_index: Arc<dyn VectorIndex> = match QdrantIndex::new(&config.qdrant_url, &config.qdrant_collection) {
        Ok(index) => {
            if let Err(e) = index.ensure_collection(768).await {
                error!(error = %e, "failed to ensure qdrant collection");
                std::process::exit(1);
            }
            Arc::new(index)
        }
        Err(e) => {
            error!(error = %e, "failed to construct qdrant client");
            std::process::exit(1);
        }
    };

    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(JinaEmbeddingProvider::new(config.jina_api_key.clone()));
    let llm: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::new(
        config.anthropic_api_url.clone(),
        config.anthropic_api_key.clone(),
        config.anthropic_model.clone(),
    ));

    let session_store = match SessionStore::connect(
        &config.redis_url,
        config.redis_ttl_seconds,
        config.session_timeout_seconds,
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to connect to redis session store");
            std::process::exit(1);
        }
    };

    let rate_limit_conn = match redis::Client::open(config.redis_url.as_str()) {
        Ok(client) => match redis::aio::ConnectionManager::new(client).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "failed to connect rate limiter to redis");
                std::process::exit(1);
            }
        },
        Err(e) => {
            error!(error = %e, "failed to build redis client for rate limiter");
            std::process::exit(1);
        }
    };
    let rate_limiter = Arc::new(RateLimiter::new(rate_limit_conn, config.rate_limit_per_hour));

    let orchestrator = Arc::new(IngestionOrchestrator::new(
        workflow_runtime,
        db.clone(),
        vector_index.clone(),
        embeddings.clone(),
        config.clone(),
    ));

    let pipeline = Arc::new(PipelineDeps {
        embeddings: embeddings.clone(),
        vector_index: vector_index.clone(),
        llm,
        session_store: session_store.clone(),
        default_top_k: config.default_top_k_results,
        max_top_k: config.max_top_k_results,
    });

    let query_gate = Arc::new(ConcurrentQueryGate::new(config.rate_limit_concurrent_queries));

    tokio::spawn(spawn_session_sweep(session_store.clone(), db.clone(), Duration::from_secs(86_400)));

    metrics::install();

    let ctx = AppContext {
        config: config.clone(),
        db,
        orchestrator,
        pipeline,
        session_store,
        rate_limiter,
        query_gate,
        start_time: Instant::now(),
    };

    let app = http::router(ctx);

    let addr = format!("{}:{}", config.backend_host, config.backend_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %addr, error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };

    info!(address = %addr, "coderag-server listening");

    if let Err(e) = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
