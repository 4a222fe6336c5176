mod logging;
mod routes;

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Instant,
};

use anyhow::{bail, Context};
use nyai_agent::{AnthropicBackend, AutoRagClient, OllamaBackend};
use nyai_core::{
    assistant::Assistant,
    citation::{CitationCache, CitationEnhancer, CitationResolver},
    config::Config,
    db::Db,
    feedback::FeedbackService,
    flow::FlowBackend,
    flows::Flows,
    history::HistoryWriter,
    parser::StructuredInfoParser,
};
use tokio::sync::{broadcast, watch};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{logging::BroadcastLayer, routes::AppState};

const DEFAULT_LOG_FILTER: &str = "nyai_server=info,nyai_core=info,nyai_agent=info,tower_http=debug";

fn build_backend(config: &Config) -> anyhow::Result<Arc<dyn FlowBackend>> {
    let backend: Arc<dyn FlowBackend> = match config.backend.as_str() {
        "ollama" => Arc::new(
            OllamaBackend::new(&config.ollama_base_url, &config.model)
                .with_timeout(config.flow_timeout_s),
        ),
        "anthropic" => Arc::new(
            AnthropicBackend::new(&config.anthropic_api_key, &config.model)
                .with_timeout(config.flow_timeout_s),
        ),
        other => bail!("unknown BACKEND {other:?} (expected \"ollama\" or \"anthropic\")"),
    };
    Ok(backend)
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
    shutdown_tx.send_replace(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (log_tx, _) = broadcast::channel::<String>(1024);
    let log_ring = Arc::new(Mutex::new(VecDeque::new()));
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .with(BroadcastLayer {
            tx: log_tx.clone(),
            ring: Arc::clone(&log_ring),
        })
        .init();

    let config = Config::from_env()?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {:?}", config.data_dir))?;

    let mut db = Db::open(&config.db_path())?;
    db.migrate()?;
    config.seed_db(&db)?;
    let config = config.load_from_db(&db);
    let db = Arc::new(db);

    let backend = build_backend(&config)?;
    info!(backend = %config.backend, model = %backend.model(), "flow backend ready");

    let flows = Flows::new(backend);
    let cache = Arc::new(CitationCache::new(
        config.citation_cache_capacity,
        config.citation_cache_ttl(),
    ));
    let enhancer = CitationEnhancer::new(
        CitationResolver::new(flows.clone(), cache),
        config.citation_batch_size,
    );
    let parser = StructuredInfoParser::new(flows.clone(), enhancer.clone());

    let retriever = Arc::new(
        AutoRagClient::new(
            &config.cloudflare_account_id,
            &config.cloudflare_autorag_name,
            &config.cloudflare_api_token,
        )
        .with_timeout(config.flow_timeout_s),
    );

    let (history, history_worker) =
        HistoryWriter::spawn(db.clone(), config.history_retry_policy());

    let assistant = Assistant::new(
        flows.clone(),
        parser,
        retriever,
        history,
        Arc::clone(&db),
        config.assistant_settings(),
    );

    let (shutdown_tx, shutdown) = watch::channel(false);
    let state = Arc::new(AppState {
        feedback: FeedbackService::new(Arc::clone(&db)),
        db,
        assistant: Arc::new(assistant),
        enhancer,
        sessions: Mutex::new(HashMap::new()),
        start_time: Instant::now(),
        log_tx,
        log_ring,
        shutdown,
        backend: config.backend.clone(),
        model: flows.model().to_string(),
    });

    let app = routes::router(state);

    let addr = format!("{}:{}", config.web_bind, config.web_port);
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    // The router held the last history writer handle; let queued records land.
    if let Err(e) = history_worker.await {
        tracing::warn!("history writer ended abnormally: {e}");
    }

    Ok(())
}
